//! Lease wire protocol.

use serde::{Deserialize, Serialize};

/// Requests a lease client can send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LeaseRequest {
    /// Ask for a VRAM grant
    Acquire {
        /// Requesting client's name
        client: String,
        /// Model the memory is for
        model_name: String,
        /// Estimated VRAM in megabytes
        vram_estimate_mb: u64,
        /// Lower numbers are more urgent
        priority: u32,
        /// Seconds before the server may reclaim the grant
        ttl_seconds: u64,
    },

    /// Give a grant back. Unknown ids acknowledge anyway.
    Release { lease_id: String },

    /// Server statistics
    Stats,
}

/// Responses the lease server sends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LeaseResponse {
    /// Outcome of an acquire
    Acquired {
        granted: bool,
        /// Present when granted
        lease_id: Option<String>,
        /// Suggested wait before retrying a denial
        retry_after_ms: u64,
    },

    /// Release acknowledged (always, releases are idempotent)
    Released,

    /// Statistics result
    Stats { stats: LeaseStats },

    /// Malformed request
    Error { message: String },
}

/// Lease server statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseStats {
    /// Configured VRAM budget in megabytes
    pub budget_mb: u64,

    /// VRAM currently leased out
    pub leased_mb: u64,

    /// Active lease count
    pub active_leases: usize,

    /// Grants since start
    pub grants_total: u64,

    /// Denials since start
    pub denials_total: u64,

    /// Explicit releases since start
    pub releases_total: u64,

    /// TTL reclaims since start
    pub reclaims_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_wire_shape() {
        let request = LeaseRequest::Acquire {
            client: "translator-1".to_string(),
            model_name: "whisper-large".to_string(),
            vram_estimate_mb: 6144,
            priority: 2,
            ttl_seconds: 300,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["op"], "acquire");
        assert_eq!(json["vram_estimate_mb"], 6144);
    }

    #[test]
    fn test_denied_reply_round_trip() {
        let reply = LeaseResponse::Acquired {
            granted: false,
            lease_id: None,
            retry_after_ms: 750,
        };
        let bytes = serde_json::to_vec(&reply).unwrap();
        let parsed: LeaseResponse = serde_json::from_slice(&bytes).unwrap();
        match parsed {
            LeaseResponse::Acquired {
                granted,
                lease_id,
                retry_after_ms,
            } => {
                assert!(!granted);
                assert!(lease_id.is_none());
                assert_eq!(retry_after_ms, 750);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }
}
