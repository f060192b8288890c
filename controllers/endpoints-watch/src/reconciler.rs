//! Endpoints reconciliation logic.
//!
//! Tracks the ready addresses of every Endpoints object and logs when they
//! change or when the object goes away.

use async_trait::async_trait;
use informer::{Reconciler, RemoveReconciler};
use resources::{object_key, Endpoints, Resource};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// Reconciler for Endpoints resources.
#[derive(Debug, Default)]
pub struct EndpointsReconciler {
    /// Last reported ready addresses per key, sorted
    ready: Mutex<HashMap<String, Vec<String>>>,
}

impl EndpointsReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ready addresses last seen for `key`.
    #[cfg(test)]
    pub fn ready_addresses(&self, key: &str) -> Option<Vec<String>> {
        self.ready.lock().ok()?.get(key).cloned()
    }

    pub fn tracked(&self) -> usize {
        self.ready.lock().map(|ready| ready.len()).unwrap_or_default()
    }

    /// Keys currently holding reported addresses.
    pub fn tracked_keys(&self) -> Vec<String> {
        self.ready
            .lock()
            .map(|ready| ready.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Reconciler<Endpoints> for EndpointsReconciler {
    async fn reconcile(&self, endpoints: Endpoints) -> anyhow::Result<()> {
        let key = endpoints.key();
        let mut addresses: Vec<String> = endpoints.ready_ips().map(str::to_string).collect();
        addresses.sort();
        addresses.dedup();

        let mut ready = self
            .ready
            .lock()
            .map_err(|e| anyhow::anyhow!("ready address table poisoned: {e}"))?;

        if ready.get(&key) == Some(&addresses) {
            debug!("Endpoints {} unchanged ({} ready)", key, addresses.len());
            return Ok(());
        }

        if addresses.is_empty() {
            info!("Endpoints {} has no ready addresses", key);
        } else {
            info!("Endpoints {} ready addresses: {}", key, addresses.join(", "));
        }
        ready.insert(key, addresses);
        Ok(())
    }

    fn as_remover(&self) -> Option<&dyn RemoveReconciler> {
        Some(self)
    }
}

#[async_trait]
impl RemoveReconciler for EndpointsReconciler {
    async fn remove(&self, namespace: Option<&str>, name: &str) -> anyhow::Result<()> {
        let key = object_key(namespace, name);
        let removed = self
            .ready
            .lock()
            .map_err(|e| anyhow::anyhow!("ready address table poisoned: {e}"))?
            .remove(&key);

        if removed.is_some() {
            info!("Endpoints {} deleted", key);
        }
        Ok(())
    }
}
