//! Request protocol, connection loop and client.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::send_payload;
pub use protocol::{Request, Response};
pub use server::{IpcServer, RequestHandler};
