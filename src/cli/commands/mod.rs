// Verb handlers. Each validates its flags before the first runtime call.

pub mod common;
pub mod config_file;
pub mod container;
pub mod create;
pub mod events;
pub mod exec;
pub mod image;
pub mod info;
pub mod lifecycle;
pub mod logs;
pub mod sandbox;
pub mod stats;
