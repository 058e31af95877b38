use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::debug;

/// Maps a connection id to the set of roles it currently holds. Implemented
/// by the embedding application against its role service.
pub trait RoleProvider: Send + Sync {
    fn roles_of(&self, connection_id: &str) -> BoxFuture<'_, HashSet<String>>;
}

/// Fixed in-memory role table. Useful for tests and for deployments where
/// role assignment is known up front.
#[derive(Debug, Default)]
pub struct StaticRoles {
    grants: DashMap<String, HashSet<String>>,
}

impl StaticRoles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, connection_id: impl Into<String>, role: impl Into<String>) {
        self.grants
            .entry(connection_id.into())
            .or_default()
            .insert(role.into());
    }
}

impl RoleProvider for StaticRoles {
    fn roles_of(&self, connection_id: &str) -> BoxFuture<'_, HashSet<String>> {
        let roles = self
            .grants
            .get(connection_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Box::pin(async move { roles })
    }
}

/// Filters transport participation by role. Lookups are cached per
/// connection id for the lifetime of the connection; events dropped for
/// missing roles are counted for telemetry.
pub struct RoleGate {
    provider: Arc<dyn RoleProvider>,
    cache: DashMap<String, HashSet<String>>,
    dropped: AtomicU64,
}

impl RoleGate {
    pub fn new(provider: Arc<dyn RoleProvider>) -> Self {
        Self {
            provider,
            cache: DashMap::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Whether `connection_id` holds at least one of `allowed`. An empty
    /// allowed set is unrestricted and always passes.
    pub async fn holds_any(&self, connection_id: &str, allowed: &HashSet<String>) -> bool {
        if allowed.is_empty() {
            return true;
        }
        let roles = match self.cache.get(connection_id).map(|e| e.value().clone()) {
            Some(cached) => cached,
            None => {
                let resolved = self.provider.roles_of(connection_id).await;
                self.cache
                    .insert(connection_id.to_string(), resolved.clone());
                resolved
            }
        };
        roles.iter().any(|role| allowed.contains(role))
    }

    /// Drop the cached roles for a departed connection.
    pub fn forget(&self, connection_id: &str) {
        if self.cache.remove(connection_id).is_some() {
            debug!(connection_id, "forgot cached roles");
        }
    }

    pub fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of inbound events silently dropped by the gate.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
