//! # fleet-wire
//!
//! Message-passing socket transport for fleetmesh.
//!
//! Every coordination exchange in the fleet (registry operations, lease
//! requests, telemetry pushes, bus publishes, routed business traffic)
//! travels as a length-prefixed JSON frame over a short-lived TCP
//! connection. This crate provides:
//!
//! - The frame codec (4-byte big-endian length prefix + payload)
//! - A request/reply client with explicit per-call timeouts
//! - A generic frame server with pluggable async handlers
//!
//! ## Example
//!
//! ```rust,no_run
//! use fleet_wire::{FrameServer, FrameHandler, request_raw};
//! use async_trait::async_trait;
//! use std::time::Duration;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl FrameHandler for Echo {
//!     async fn handle(&self, frame: Vec<u8>) -> fleet_wire::Result<Vec<u8>> {
//!         Ok(frame)
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = FrameServer::bind("127.0.0.1:0").await?;
//! let addr = server.local_addr().to_string();
//! server.spawn(Echo);
//!
//! let reply = request_raw(&addr, b"ping", Duration::from_secs(1)).await?;
//! assert_eq!(reply, b"ping");
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

pub mod client;
pub mod frame;
pub mod server;

// Re-export commonly used items
pub use client::{call, request_raw};
pub use frame::{read_frame, write_frame, MAX_FRAME_SIZE};
pub use server::{FrameHandler, FrameServer};

/// Result type for wire operations
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors that can occur on the wire
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    #[error("Connection closed before a full frame arrived")]
    ConnectionClosed,

    #[error("Handler error: {0}")]
    Handler(String),
}

impl From<WireError> for fleet_core::Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Timeout(d) => fleet_core::Error::timeout(format!("wire call after {:?}", d)),
            WireError::Io(e) => fleet_core::Error::network(e.to_string()),
            WireError::ConnectionClosed => {
                fleet_core::Error::network("connection closed mid-frame")
            }
            other => fleet_core::Error::protocol(other.to_string()),
        }
    }
}
