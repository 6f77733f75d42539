//! Network registry
//!
//! Mapping from network ID to membership object. All access goes through
//! one dedicated lock, held only for the map operation itself.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::network::{Network, NetworkId};

/// The set of currently joined networks
#[derive(Default)]
pub struct NetworkRegistry {
    networks: Mutex<HashMap<NetworkId, Arc<Network>>>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a joined network
    pub fn get(&self, nwid: NetworkId) -> Option<Arc<Network>> {
        self.networks.lock().get(&nwid).cloned()
    }

    pub fn contains(&self, nwid: NetworkId) -> bool {
        self.networks.lock().contains_key(&nwid)
    }

    /// Insert a network if absent, building it under the lock.
    ///
    /// Returns the network and whether it was newly created.
    pub(crate) fn insert_with(
        &self,
        nwid: NetworkId,
        build: impl FnOnce() -> Arc<Network>,
    ) -> (Arc<Network>, bool) {
        let mut networks = self.networks.lock();
        if let Some(existing) = networks.get(&nwid) {
            return (existing.clone(), false);
        }
        let network = build();
        networks.insert(nwid, network.clone());
        (network, true)
    }

    pub(crate) fn remove(&self, nwid: NetworkId) -> Option<Arc<Network>> {
        self.networks.lock().remove(&nwid)
    }

    /// All joined networks, in no particular order
    pub fn snapshot(&self) -> Vec<Arc<Network>> {
        self.networks.lock().values().cloned().collect()
    }

    /// Networks whose configuration is at least `delay_ms` old at `now`
    pub(crate) fn stale_since(&self, now: u64, delay_ms: u64) -> Vec<NetworkId> {
        self.networks
            .lock()
            .values()
            .filter(|n| now.saturating_sub(n.last_config_update()) >= delay_ms)
            .map(|n| n.id())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.networks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.lock().is_empty()
    }
}
