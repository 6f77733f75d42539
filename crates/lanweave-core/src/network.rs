//! Virtual network membership
//!
//! A [`Network`] is the membership object for one joined virtual
//! network: its configuration state, multicast subscriptions, and
//! last-config-refresh timestamp. Networks are created by `join`,
//! destroyed by `leave` or node teardown, and live in the
//! [`NetworkRegistry`](crate::registry::NetworkRegistry).

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use lanweave_crypto::Address;

use crate::host::ConfigOperation;
use crate::services::Context;

/// A 64-bit virtual network identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub u64);

impl NetworkId {
    pub fn to_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for NetworkId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl std::fmt::Debug for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NetworkId({:016x})", self.0)
    }
}

/// A 48-bit Ethernet MAC address
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mac(u64);

impl Mac {
    pub fn new(raw: u64) -> Self {
        Self(raw & 0xffff_ffff_ffff)
    }

    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        let mut raw = 0u64;
        for b in bytes {
            raw = (raw << 8) | u64::from(b);
        }
        Self(raw)
    }

    pub fn to_bytes(self) -> [u8; 6] {
        let mut bytes = [0u8; 6];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (self.0 >> (8 * (5 - i))) as u8;
        }
        bytes
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }

    /// The stable MAC a node's tap uses on a network, derived from the
    /// node address and the network ID. Always unicast and locally
    /// administered.
    pub fn from_address(address: Address, nwid: NetworkId) -> Self {
        let a = address.as_bytes();
        let mut bytes = [0u8; 6];
        bytes[0] = 0x02;
        for i in 0..5 {
            bytes[i + 1] = a[i] ^ ((nwid.0 >> (8 * (4 - i))) as u8);
        }
        Self::from_bytes(bytes)
    }

    pub fn is_multicast(self) -> bool {
        (self.0 >> 40) & 0x01 != 0
    }
}

impl From<u64> for Mac {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

impl std::fmt::Display for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = self.to_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl std::fmt::Debug for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mac({})", self)
    }
}

/// A multicast group: a multicast MAC plus an additional distinguishing
/// information field (e.g. the IP for broadcast-like groups)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MulticastGroup {
    pub mac: Mac,
    pub adi: u32,
}

impl std::fmt::Display for MulticastGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{:08x}", self.mac, self.adi)
    }
}

/// Configuration state of a joined network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// Waiting for the controller's first configuration
    RequestingConfiguration,

    /// Configured and operating
    Ok,

    /// The controller refused this node membership
    AccessDenied,

    /// The controller does not know this network
    NotFound,
}

/// External-facing snapshot of one network's configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualNetworkConfig {
    pub nwid: NetworkId,
    pub mac: Mac,
    pub name: String,
    pub status: NetworkStatus,
    pub revision: u64,
    pub last_config_update: u64,
    pub multicast_subscriptions: Vec<MulticastGroup>,
}

struct NetworkState {
    name: String,
    status: NetworkStatus,
    revision: u64,
    last_config_update: u64,
    subscriptions: Vec<MulticastGroup>,
}

/// Membership state for a single virtual network
pub struct Network {
    id: NetworkId,
    mac: Mac,
    state: Mutex<NetworkState>,
}

impl Network {
    /// Create the membership object and report the network up to the
    /// embedder so its tap can be created.
    pub(crate) fn new(ctx: &Context<'_>, id: NetworkId) -> Arc<Self> {
        let network = Arc::new(Self {
            id,
            mac: Mac::from_address(ctx.identity.address(), id),
            state: Mutex::new(NetworkState {
                name: String::new(),
                status: NetworkStatus::RequestingConfiguration,
                revision: 0,
                last_config_update: 0,
                subscriptions: Vec::new(),
            }),
        });
        ctx.host
            .virtual_network_config(id, ConfigOperation::Up, &network.external_config());
        network
    }

    pub fn id(&self) -> NetworkId {
        self.id
    }

    /// The MAC this node's tap uses on this network
    pub fn mac(&self) -> Mac {
        self.mac
    }

    /// Add a multicast subscription; duplicates are ignored
    pub fn multicast_subscribe(&self, group: MulticastGroup) {
        let mut state = self.state.lock();
        if !state.subscriptions.contains(&group) {
            state.subscriptions.push(group);
        }
    }

    /// Remove a multicast subscription; absent is a no-op
    pub fn multicast_unsubscribe(&self, group: MulticastGroup) {
        self.state.lock().subscriptions.retain(|g| *g != group);
    }

    pub fn multicast_subscriptions(&self) -> Vec<MulticastGroup> {
        self.state.lock().subscriptions.clone()
    }

    /// Wall-clock time of the last configuration update (0 if never)
    pub fn last_config_update(&self) -> u64 {
        self.state.lock().last_config_update
    }

    /// Record a configuration received from the controller and report it
    /// to the embedder.
    pub fn config_received(&self, ctx: &Context<'_>, name: &str, revision: u64) {
        {
            let mut state = self.state.lock();
            state.name = name.to_string();
            state.status = NetworkStatus::Ok;
            state.revision = revision;
            state.last_config_update = ctx.now;
        }
        ctx.host.virtual_network_config(
            self.id,
            ConfigOperation::ConfigUpdate,
            &self.external_config(),
        );
    }

    /// A fresh snapshot of the external-facing configuration view
    pub fn external_config(&self) -> VirtualNetworkConfig {
        let state = self.state.lock();
        VirtualNetworkConfig {
            nwid: self.id,
            mac: self.mac,
            name: state.name.clone(),
            status: state.status,
            revision: state.revision,
            last_config_update: state.last_config_update,
            multicast_subscriptions: state.subscriptions.clone(),
        }
    }

    /// Tear the network down: drop subscriptions and tell the embedder
    /// to destroy the tap.
    pub(crate) fn destroy(&self, ctx: &Context<'_>) {
        {
            let mut state = self.state.lock();
            state.subscriptions.clear();
            state.status = NetworkStatus::NotFound;
        }
        ctx.host
            .virtual_network_config(self.id, ConfigOperation::Destroy, &self.external_config());
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Network({})", self.id)
    }
}
