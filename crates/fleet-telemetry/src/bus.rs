//! Shared bus publishing.
//!
//! The bus is the fleet's second telemetry leg: even with both hubs dark,
//! peer consumers subscribed to the bus keep seeing snapshots. Publishing
//! here is deliberately independent of hub state and never fails the
//! caller - an unreachable bus is logged and reported as `false`.

use chrono::{DateTime, Utc};
use fleet_core::config::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// One message on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    /// Subject the message is published under
    pub subject: String,

    /// Payload
    pub data: serde_json::Value,

    /// When the publisher stamped it
    pub published_at: DateTime<Utc>,
}

/// Publisher for the shared publish/subscribe bus
#[derive(Debug, Clone)]
pub struct BusPublisher {
    addr: String,
    timeout: Duration,
}

impl BusPublisher {
    /// Create a publisher from configuration
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            addr: config.bus_addr.clone(),
            timeout: config.publish_timeout(),
        }
    }

    /// Create a publisher for a specific bus address
    pub fn for_addr(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Publish a payload under a subject. Returns whether the bus
    /// acknowledged it.
    pub async fn publish(&self, subject: &str, data: &serde_json::Value) -> bool {
        let envelope = BusEnvelope {
            subject: subject.to_string(),
            data: data.clone(),
            published_at: Utc::now(),
        };

        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(subject = subject, error = %e, "unencodable bus payload");
                return false;
            }
        };

        match fleet_wire::request_raw(&self.addr, &payload, self.timeout).await {
            Ok(_ack) => {
                debug!(subject = subject, bus = %self.addr, "published to bus");
                true
            }
            Err(e) => {
                // Bus loss is its own failure domain, kept apart from hub
                // trouble in the logs.
                warn!(
                    subject = subject,
                    bus = %self.addr,
                    error = %e,
                    "bus unavailable, message not mirrored"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_wire::{FrameHandler, FrameServer};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct RecordingBus {
        envelopes: Arc<Mutex<Vec<BusEnvelope>>>,
    }

    #[async_trait]
    impl FrameHandler for RecordingBus {
        async fn handle(&self, frame: Vec<u8>) -> fleet_wire::Result<Vec<u8>> {
            let envelope: BusEnvelope = serde_json::from_slice(&frame)?;
            self.envelopes.lock().await.push(envelope);
            Ok(b"ok".to_vec())
        }
    }

    #[tokio::test]
    async fn test_publish_delivers_envelope() {
        let envelopes = Arc::new(Mutex::new(Vec::new()));
        let server = FrameServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().to_string();
        server.spawn(RecordingBus {
            envelopes: envelopes.clone(),
        });

        let publisher = BusPublisher::for_addr(addr, Duration::from_secs(1));
        let delivered = publisher
            .publish("fleet.telemetry", &serde_json::json!({"agent": "vision-0"}))
            .await;

        assert!(delivered);
        let seen = envelopes.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].subject, "fleet.telemetry");
        assert_eq!(seen[0].data["agent"], "vision-0");
    }

    #[tokio::test]
    async fn test_unreachable_bus_reports_false() {
        let publisher = BusPublisher::for_addr("127.0.0.1:1", Duration::from_millis(300));
        let delivered = publisher
            .publish("fleet.telemetry", &serde_json::json!({}))
            .await;
        assert!(!delivered);
    }
}
