//! TCP connection loop.
//!
//! Connections are served one at a time: accept, read one payload, run the
//! handler to completion, send the acknowledgment, close. A `quit` payload
//! ends the loop and drops the listener.

use crate::config::ServerConfig;
use crate::error::{IvecdError, Result};
use crate::ipc::protocol::{Request, Response};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Handler trait for extraction requests.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    /// Run the batch named by `specifier` and report how it went.
    async fn handle(&self, specifier: String) -> Response;
}

/// Serial request server on a TCP port.
pub struct IpcServer {
    listener: TcpListener,
    config: ServerConfig,
}

impl IpcServer {
    /// Bind the listening socket. Failure here is fatal for the daemon.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| IvecdError::Socket {
                message: format!("Failed to bind to {}: {}", addr, e),
            })?;
        Ok(Self {
            listener,
            config: config.clone(),
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| IvecdError::Socket {
            message: format!("Failed to read local address: {}", e),
        })
    }

    /// Serve connections until a `quit` request arrives.
    pub async fn run<H>(self, handler: H) -> Result<()>
    where
        H: RequestHandler,
    {
        info!("Server started on {}. Waiting.", self.local_addr()?);
        let mut buf = vec![0u8; self.config.max_request_bytes];

        loop {
            let mut stream = match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    stream
                }
                Err(e) => {
                    self.pause(&format!("Failed to accept connection: {}", e))
                        .await;
                    continue;
                }
            };

            let n = match stream.read(&mut buf).await {
                Ok(0) => continue,
                Ok(n) => n,
                Err(e) => {
                    self.pause(&format!("Failed to read from client: {}", e))
                        .await;
                    continue;
                }
            };

            match Request::parse(&buf[..n]) {
                Request::Quit => {
                    info!("Server terminating.");
                    break;
                }
                Request::Extract { specifier } => {
                    let response = handler.handle(specifier).await;
                    if !response.success() {
                        warn!("Request finished without producing any vectors");
                    }
                    if let Err(e) = self.acknowledge(&mut stream).await {
                        warn!("{}", e);
                    }
                }
            }
        }

        Ok(())
    }

    async fn acknowledge(&self, stream: &mut TcpStream) -> Result<()> {
        let to_conn_err = |e: std::io::Error| IvecdError::Connection {
            message: format!("Failed to send acknowledgment: {}", e),
        };
        stream
            .write_all(self.config.ack.as_bytes())
            .await
            .map_err(to_conn_err)?;
        stream.flush().await.map_err(to_conn_err)?;
        stream.shutdown().await.map_err(to_conn_err)
    }

    async fn pause(&self, message: &str) {
        warn!("{}; retrying in {:?}", message, self.config.retry_pause());
        tokio::time::sleep(self.config.retry_pause()).await;
    }
}
