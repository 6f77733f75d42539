//! LanWeave Node Core
//!
//! The host-embeddable control plane of a LanWeave node: a single
//! long-lived [`Node`] that encrypts, routes, and delivers Ethernet
//! frames between cryptographically identified participants across the
//! public Internet, as if they shared a local LAN.
//!
//! The node creates no threads and opens no sockets. The embedder drives
//! it: wire packets go in through [`Node::process_wire_packet`], tap
//! frames through [`Node::process_virtual_network_frame`], and a
//! background tick through [`Node::process_background_tasks`] no later
//! than the deadline returned by the previous call. All I/O comes back
//! out through the [`HostCallbacks`] surface supplied at construction.
//!
//! The packet switch, peer topology, and multicast engine are composed
//! as opaque services behind the traits in [`services`].

pub mod config;
pub mod defaults;
pub mod dictionary;
pub mod error;
pub mod host;
pub mod network;
pub mod node;
pub mod registry;
pub mod services;
pub mod version;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::NodeConfig;
pub use dictionary::Dictionary;
pub use error::{CoreError, CoreResult, ServiceError};
pub use host::{ConfigOperation, Event, HostCallbacks};
pub use network::{
    Mac, MulticastGroup, Network, NetworkId, NetworkStatus, VirtualNetworkConfig,
};
pub use node::{Node, NodeStatus, PeerSnapshot};
pub use registry::NetworkRegistry;
pub use services::{Context, Multicaster, Peer, ServiceFactories, Switch, Topology};
pub use version::Version;

pub use lanweave_crypto::{Address, Identity};

use std::time::Duration;

/// Release version, major component
pub const VERSION_MAJOR: u16 = 0;

/// Release version, minor component
pub const VERSION_MINOR: u16 = 9;

/// Release version, revision component
pub const VERSION_REVISION: u16 = 2;

/// Interval between peer liveness sweeps
pub const PING_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Interval between housekeeping passes (expired peer and group cleanup)
pub const HOUSEKEEPING_PERIOD: Duration = Duration::from_secs(120);

/// A network whose configuration is older than this is refreshed
pub const NETWORK_AUTOCONF_DELAY: Duration = Duration::from_secs(60);

/// Finest granularity of the background deadline
pub const CORE_TIMER_GRANULARITY: Duration = Duration::from_millis(500);

/// Ping-check intervals of supernode silence per desperation step
pub const DESPERATION_INCREMENT: u64 = 2;
