//! Client side of the request protocol.

use crate::defaults;
use crate::error::{IvecdError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Send `payload` to the server at `addr` (`host:port`).
///
/// Returns the server's reply, read with a single receive of up to
/// `max_reply` bytes, or `None` for the quit sentinel, which gets no reply.
///
/// # Errors
/// Returns `IvecdError::Connection` if connecting, sending or receiving fails.
pub async fn send_payload(addr: &str, payload: &str, max_reply: usize) -> Result<Option<String>> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| IvecdError::Connection {
            message: format!("Failed to connect to {}: {}", addr, e),
        })?;

    stream
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| IvecdError::Connection {
            message: format!("Failed to send request: {}", e),
        })?;

    if payload == defaults::QUIT_SENTINEL {
        return Ok(None);
    }

    let mut buf = vec![0u8; max_reply];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| IvecdError::Connection {
            message: format!("Failed to read reply: {}", e),
        })?;

    Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned()))
}
