//! Generic frame server with pluggable handlers.

use crate::{frame, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Trait implemented by anything that answers frames.
///
/// One handler instance serves all connections concurrently; implementations
/// hold their own synchronization.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    /// Handle one request frame and produce the reply frame.
    async fn handle(&self, frame: Vec<u8>) -> Result<Vec<u8>>;
}

/// TCP server that feeds inbound frames to a [`FrameHandler`].
///
/// A connection may carry any number of request/reply exchanges; most
/// fleetmesh clients send one and disconnect.
pub struct FrameServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl FrameServer {
    /// Bind to the given address. Use port 0 to pick an ephemeral port.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "frame server listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address the server actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the accept loop onto the runtime and return its handle.
    ///
    /// Aborting the returned handle stops the server; in-flight connection
    /// tasks finish their current exchange.
    pub fn spawn<H: FrameHandler>(self, handler: H) -> JoinHandle<()> {
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, peer)) => {
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, peer, handler).await {
                                debug!(peer = %peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        })
    }
}

async fn serve_connection<H: FrameHandler>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
) -> Result<()> {
    loop {
        let request = match frame::read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(crate::WireError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };

        match handler.handle(request).await {
            Ok(reply) => frame::write_frame(&mut stream, &reply).await?,
            Err(e) => {
                // The handler decides what failure looks like on the wire;
                // reaching here means it could not even produce a reply.
                warn!(peer = %peer, error = %e, "handler failed, dropping connection");
                return Err(e);
            }
        }
    }
}
