// Subprocess helpers shared by the e2e harness
pub mod command;
pub mod process;
