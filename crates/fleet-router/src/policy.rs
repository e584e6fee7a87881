//! Routing policy with per-request freshness.

use crate::{Result, RouterError};
use fleet_core::config::RouterConfig;
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Live view of the routing policy.
///
/// The traffic split is resolved fresh on every request, in order:
/// a programmatic override (operator tooling), then the per-port
/// environment variable, then the configured value. Ramping traffic is
/// therefore a config-reload or env change, never a restart.
#[derive(Debug)]
pub struct PolicyHandle {
    config: RouterConfig,
    override_percent: RwLock<Option<u8>>,
}

impl PolicyHandle {
    /// Create a handle over a validated configuration
    pub fn new(config: RouterConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RouterError::Policy(e.to_string()))?;
        Ok(Self {
            config,
            override_percent: RwLock::new(None),
        })
    }

    /// The underlying static configuration
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Environment variable carrying the split for a frontend port
    pub fn env_var(frontend_port: u16) -> String {
        format!("FLEETMESH_ROUTER_TRAFFIC_PERCENT_{}", frontend_port)
    }

    /// Current percentage of traffic destined for the new backend.
    ///
    /// Read this per request; its value may change between any two calls.
    pub fn traffic_percent_to_new(&self) -> u8 {
        if let Some(percent) = *self.override_percent.read() {
            return percent;
        }

        if let Ok(raw) = std::env::var(Self::env_var(self.config.frontend_port)) {
            match raw.parse::<u8>() {
                Ok(percent) if percent <= 100 => return percent,
                _ => {
                    warn!(
                        frontend_port = self.config.frontend_port,
                        value = %raw,
                        "ignoring out-of-range traffic percent override"
                    );
                }
            }
        }

        self.config.traffic_percent_to_new
    }

    /// Set a runtime override, e.g. from operator tooling
    pub fn set_traffic_percent(&self, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(RouterError::Policy(format!(
                "traffic percent {} out of range 0..=100",
                percent
            )));
        }
        *self.override_percent.write() = Some(percent);
        debug!(percent = percent, "traffic split override set");
        Ok(())
    }

    /// Drop the runtime override, falling back to env/config
    pub fn clear_override(&self) {
        *self.override_percent.write() = None;
    }
}
