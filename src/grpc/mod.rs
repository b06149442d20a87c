pub mod client;
pub mod connection;
pub mod context;
pub mod endpoint;
pub mod retry;


pub use client::CriClient;
pub use connection::CriConnection;
pub use context::RequestContext;
pub use endpoint::EndpointAddr;
