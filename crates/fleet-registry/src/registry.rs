//! In-memory registry table.

use crate::{RegistryError, Result};
use chrono::{DateTime, Utc};
use fleet_core::{AgentIdentity, AgentName};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One registered agent.
///
/// Owned exclusively by the registry; mutated only through
/// register/deregister/heartbeat and the liveness machinery.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Where the agent's endpoints live
    pub identity: AgentIdentity,

    /// What the agent can do, as free-form capability strings
    pub capabilities: BTreeSet<String>,

    /// Wall-clock registration time, for operator tooling
    pub registered_at: DateTime<Utc>,

    /// Monotonic instant of the last heartbeat or re-registration
    pub last_seen: Instant,

    /// Consecutive failed health polls
    pub poll_failures: u32,
}

impl RegistryEntry {
    /// Seconds since this entry was last refreshed
    pub fn age_seconds(&self) -> u64 {
        self.last_seen.elapsed().as_secs()
    }
}

/// Registry statistics for operator tooling
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RegistryStats {
    /// Registered agents
    pub total_agents: usize,

    /// Agents per capability
    pub agents_by_capability: HashMap<String, usize>,
}

/// The directory mapping agent names to network locations.
///
/// Operations on a given name are linearizable through the table lock;
/// reads on different names proceed in parallel under the shared lock.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    entries: Arc<RwLock<HashMap<AgentName, RegistryEntry>>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, or refresh it if the name is already known.
    ///
    /// Re-registering updates the location and capabilities and refreshes
    /// `last_seen`; it never errors. This is the fleet's recovery path
    /// after a registry restart.
    pub async fn register(&self, identity: AgentIdentity, capabilities: BTreeSet<String>) {
        let mut entries = self.entries.write().await;
        let name = identity.name.clone();

        match entries.get_mut(&name) {
            Some(existing) => {
                existing.identity = identity;
                existing.capabilities = capabilities;
                existing.last_seen = Instant::now();
                existing.poll_failures = 0;
                debug!(agent = %name, "re-registered agent, refreshed location");
            }
            None => {
                entries.insert(
                    name.clone(),
                    RegistryEntry {
                        identity,
                        capabilities,
                        registered_at: Utc::now(),
                        last_seen: Instant::now(),
                        poll_failures: 0,
                    },
                );
                info!(agent = %name, "registered agent");
            }
        }
    }

    /// Remove an agent by name
    pub async fn deregister(&self, name: &AgentName) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.remove(name).is_some() {
            info!(agent = %name, "deregistered agent");
            Ok(())
        } else {
            Err(RegistryError::NotFound(name.to_string()))
        }
    }

    /// Look up an agent's endpoints by name
    pub async fn lookup(&self, name: &AgentName) -> Result<AgentIdentity> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .map(|entry| entry.identity.clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Refresh an agent's `last_seen`
    pub async fn heartbeat(&self, name: &AgentName) -> Result<()> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(name) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                entry.poll_failures = 0;
                Ok(())
            }
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    /// All agents advertising a capability
    pub async fn discover(&self, capability: &str) -> Vec<AgentIdentity> {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|entry| entry.capabilities.contains(capability))
            .map(|entry| entry.identity.clone())
            .collect()
    }

    /// Drop entries whose `last_seen` exceeds the staleness window.
    ///
    /// Returns the names that were dropped. A stale agent simply
    /// disappears from discovery; restarting it is someone else's job.
    pub async fn expire_stale(&self, staleness_window: Duration) -> Vec<AgentName> {
        let mut entries = self.entries.write().await;
        let stale: Vec<AgentName> = entries
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed() > staleness_window)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &stale {
            entries.remove(name);
            warn!(agent = %name, "dropped stale agent (missed heartbeats)");
        }

        stale
    }

    /// Record a failed health poll; returns the consecutive failure count
    pub async fn record_poll_failure(&self, name: &AgentName) -> u32 {
        let mut entries = self.entries.write().await;
        match entries.get_mut(name) {
            Some(entry) => {
                entry.poll_failures += 1;
                entry.poll_failures
            }
            None => 0,
        }
    }

    /// Snapshot of every entry, for the poller and tooling
    pub async fn snapshot(&self) -> Vec<RegistryEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let entries = self.entries.read().await;
        let mut agents_by_capability: HashMap<String, usize> = HashMap::new();
        for entry in entries.values() {
            for capability in &entry.capabilities {
                *agents_by_capability.entry(capability.clone()).or_insert(0) += 1;
            }
        }
        RegistryStats {
            total_agents: entries.len(),
            agents_by_capability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, main_port: u16) -> AgentIdentity {
        AgentIdentity::new(name, "127.0.0.1", main_port, main_port + 1)
    }

    fn caps(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_register_lookup_round_trip() {
        let registry = ServiceRegistry::new();
        registry
            .register(identity("translator-1", 5800), caps(&["translate"]))
            .await;

        let found = registry.lookup(&"translator-1".into()).await.unwrap();
        assert_eq!(found.host, "127.0.0.1");
        assert_eq!(found.main_port, 5800);
        assert_eq!(found.health_port, 5801);
    }

    #[tokio::test]
    async fn test_lookup_unknown_is_typed_not_found() {
        let registry = ServiceRegistry::new();
        let err = registry.lookup(&"ghost".into()).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reregistration_is_idempotent_and_updates_location() {
        let registry = ServiceRegistry::new();
        registry
            .register(identity("vision-0", 6000), caps(&["detect"]))
            .await;
        // Same name, new port: must update, not error.
        registry
            .register(identity("vision-0", 6100), caps(&["detect", "ocr"]))
            .await;

        let found = registry.lookup(&"vision-0".into()).await.unwrap();
        assert_eq!(found.main_port, 6100);
        assert_eq!(registry.stats().await.total_agents, 1);
    }

    #[tokio::test]
    async fn test_deregister_unknown_errors() {
        let registry = ServiceRegistry::new();
        assert!(matches!(
            registry.deregister(&"ghost".into()).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_prevents_expiry() {
        let registry = ServiceRegistry::new();
        registry
            .register(identity("translator-1", 5800), caps(&["translate"]))
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        registry.heartbeat(&"translator-1".into()).await.unwrap();

        let dropped = registry.expire_stale(Duration::from_millis(50)).await;
        assert!(dropped.is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let dropped = registry.expire_stale(Duration::from_millis(50)).await;
        assert_eq!(dropped, vec![AgentName::new("translator-1")]);
        assert!(registry.lookup(&"translator-1".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_discover_by_capability() {
        let registry = ServiceRegistry::new();
        registry
            .register(identity("translator-1", 5800), caps(&["translate"]))
            .await;
        registry
            .register(identity("translator-2", 5810), caps(&["translate"]))
            .await;
        registry
            .register(identity("vision-0", 6000), caps(&["detect"]))
            .await;

        let translators = registry.discover("translate").await;
        assert_eq!(translators.len(), 2);
        assert_eq!(registry.discover("speak").await.len(), 0);
    }

    #[tokio::test]
    async fn test_stats_by_capability() {
        let registry = ServiceRegistry::new();
        registry
            .register(identity("a", 1000), caps(&["translate", "detect"]))
            .await;
        registry.register(identity("b", 2000), caps(&["detect"])).await;

        let stats = registry.stats().await;
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.agents_by_capability.get("detect"), Some(&2));
        assert_eq!(stats.agents_by_capability.get("translate"), Some(&1));
    }
}
