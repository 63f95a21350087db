pub mod client;
pub mod protocol;
pub mod server;

pub use client::TcpClient;
pub use protocol::{Request, Response};
pub use server::{handle_request, process_connection};

// Re-export Bytes for convenience
pub use bytes::Bytes;
