//! Instance registry: thread-safe tracking of live client instances.
//!
//! Every client registers itself at construction and is removed by an
//! explicit `dispose()`. The registry exists so a host that restarts or
//! shuts down with several clients alive can close all of them in one
//! orderly sweep instead of leaking orphaned connections.

use crate::client::StreamingClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info, warn};

/// Outcome of a [`ClientRegistry::cleanup_all`] sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Mutex-guarded map of all live (undisposed) client instances.
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, Arc<StreamingClient>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry. Clients built without an explicit registry
    /// end up here.
    pub fn global() -> &'static Arc<ClientRegistry> {
        static GLOBAL: OnceLock<Arc<ClientRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ClientRegistry::new()))
    }

    /// Adds a client. Re-registering the same id replaces the entry.
    pub fn register(&self, client: Arc<StreamingClient>) {
        let client_id = client.client_id().to_string();
        let previous = self.lock().insert(client_id.clone(), client);
        if previous.is_some() {
            warn!(%client_id, "client id registered twice");
        } else {
            debug!(%client_id, "client registered");
        }
    }

    /// Removes a client. A double unregister is a no-op.
    ///
    /// Returns true if an entry was removed.
    pub fn unregister(&self, client_id: &str) -> bool {
        let removed = self.lock().remove(client_id).is_some();
        if removed {
            debug!(%client_id, "client unregistered");
        }
        removed
    }

    /// Number of live instances. A best-effort snapshot: no ordering
    /// guarantee with concurrent register/unregister.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// True if `client_id` is currently registered.
    pub fn contains(&self, client_id: &str) -> bool {
        self.lock().contains_key(client_id)
    }

    /// Cleans up every registered instance and removes it.
    ///
    /// Operates on a snapshot — clients registered concurrently with the
    /// sweep are untouched, and no lock is held while instances close their
    /// sockets. Per-instance failures are tallied and reported, never
    /// escalated: one badly wedged client does not stop the batch.
    pub fn cleanup_all(&self) -> CleanupReport {
        let snapshot: Vec<Arc<StreamingClient>> = self.lock().values().cloned().collect();
        info!(count = snapshot.len(), "cleaning up all registered clients");

        let mut report = CleanupReport::default();
        for client in snapshot {
            match client.cleanup() {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!(client_id = %client.client_id(), error = %e, "client cleanup failed");
                    report.failed += 1;
                }
            }
            self.unregister(client.client_id());
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "cleanup sweep finished"
        );
        report
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<StreamingClient>>> {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
