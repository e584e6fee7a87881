//! Request/reply client over short-lived connections.
//!
//! Every call opens a fresh connection, sends one frame, reads one frame,
//! and closes. The whole exchange is bounded by the caller's timeout; no
//! call in the fleet may block indefinitely.

use crate::{frame, Result, WireError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::trace;

/// Send a raw frame and wait for the raw reply frame.
pub async fn request_raw(addr: &str, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
    tokio::time::timeout(timeout, async {
        let mut stream = TcpStream::connect(addr).await?;
        frame::write_frame(&mut stream, payload).await?;
        let reply = frame::read_frame(&mut stream).await?;
        trace!(addr = %addr, sent = payload.len(), received = reply.len(), "wire round-trip");
        Ok(reply)
    })
    .await
    .map_err(|_| WireError::Timeout(timeout))?
}

/// Send a typed request and decode the typed reply.
pub async fn call<Req, Resp>(addr: &str, request: &Req, timeout: Duration) -> Result<Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let payload = serde_json::to_vec(request)?;
    let reply = request_raw(addr, &payload, timeout).await?;
    Ok(serde_json::from_slice(&reply)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{FrameHandler, FrameServer};
    use async_trait::async_trait;
    use serde::Deserialize;

    struct Upper;

    #[async_trait]
    impl FrameHandler for Upper {
        async fn handle(&self, frame: Vec<u8>) -> Result<Vec<u8>> {
            Ok(frame.to_ascii_uppercase())
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Ping {
        seq: u64,
    }

    struct PingReply;

    #[async_trait]
    impl FrameHandler for PingReply {
        async fn handle(&self, frame: Vec<u8>) -> Result<Vec<u8>> {
            let ping: Ping = serde_json::from_slice(&frame)?;
            Ok(serde_json::to_vec(&Ping { seq: ping.seq + 1 })?)
        }
    }

    #[tokio::test]
    async fn test_raw_round_trip() {
        let server = FrameServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().to_string();
        server.spawn(Upper);

        let reply = request_raw(&addr, b"hello", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b"HELLO");
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let server = FrameServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().to_string();
        server.spawn(PingReply);

        let reply: Ping = call(&addr, &Ping { seq: 7 }, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.seq, 8);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_an_error() {
        // Port 1 is essentially never listening.
        let result = request_raw("127.0.0.1:1", b"x", Duration::from_millis(500)).await;
        assert!(result.is_err());
    }
}
