//! Collaborator subsystem contracts
//!
//! The packet switch, the peer topology and the multicast engine are
//! separate subsystems composed behind these traits. The node owns one
//! boxed instance of each and threads a borrowed [`Context`] into every
//! call; subsystems never store references back into the node.

use std::net::SocketAddr;
use std::sync::Arc;

use lanweave_crypto::{Address, Identity};

use crate::dictionary::Dictionary;
use crate::error::ServiceError;
use crate::host::HostCallbacks;
use crate::network::{Mac, Network, NetworkId};

/// Borrowed environment record threaded through subsystem calls.
///
/// Lifetime is bounded by the node operation that created it.
pub struct Context<'a> {
    /// The embedder's callback surface
    pub host: &'a dyn HostCallbacks,

    /// The node's identity
    pub identity: &'a Identity,

    /// Current wall-clock time in milliseconds
    pub now: u64,

    /// Current desperation level, fed to outbound transmissions
    pub desperation: u32,
}

/// The packet codec and cryptographic switch
pub trait Switch: Send + Sync {
    /// Decode and dispatch one wire packet.
    ///
    /// Malformed packets are dropped silently; an error means an
    /// unexpected internal failure, not an invalid packet.
    fn on_remote_packet(
        &self,
        ctx: &Context<'_>,
        remote: SocketAddr,
        link_desperation: u32,
        data: &[u8],
    ) -> Result<(), ServiceError>;

    /// Encrypt one Ethernet frame from the tap and route it toward the
    /// appropriate peer(s).
    fn on_local_ethernet(
        &self,
        ctx: &Context<'_>,
        network: &Arc<Network>,
        src_mac: Mac,
        dst_mac: Mac,
        ether_type: u16,
        vlan_id: u16,
        data: &[u8],
    ) -> Result<(), ServiceError>;

    /// Send a configuration request for a network toward its controller.
    fn request_network_config(
        &self,
        ctx: &Context<'_>,
        nwid: NetworkId,
    ) -> Result<(), ServiceError>;

    /// Run the switch's own timers.
    ///
    /// Returns the relative interval in milliseconds until it next wants
    /// to run.
    fn timer_tasks(&self, ctx: &Context<'_>) -> Result<u64, ServiceError>;
}

/// Read-only view of one peer during topology iteration
pub trait Peer {
    fn address(&self) -> Address;

    /// Wall-clock time of the last packet received from this peer
    fn last_receive(&self) -> u64;

    /// Whether the peer counts as alive under the topology's liveness rule
    fn alive(&self, now: u64) -> bool;

    /// Send a ping/keepalive toward this peer
    fn ping_and_keepalive(&self, ctx: &Context<'_>, now: u64);
}

/// The peer-to-peer topology and path database
pub trait Topology: Send + Sync {
    /// Replace the supernode set from a root topology `supernodes` entry
    fn set_supernodes(&self, supernodes: &Dictionary);

    /// Check a stored root topology against the compiled-in signing key
    fn authenticate_root_topology(&self, root_topology: &Dictionary) -> bool;

    /// Addresses of the current supernodes
    fn supernode_addresses(&self) -> Vec<Address>;

    /// Visit every known peer
    fn each_peer(&self, f: &mut dyn FnMut(&dyn Peer));

    /// Drop expired peers
    fn clean(&self, now: u64) -> Result<(), ServiceError>;
}

/// The multicast propagation engine
pub trait Multicaster: Send + Sync {
    /// Drop expired multicast group state
    fn clean(&self, now: u64) -> Result<(), ServiceError>;
}

/// Builders for the collaborator subsystems.
///
/// Invoked in a fixed order during node construction (switch,
/// multicaster, topology). A failing builder aborts construction and the
/// subsystems already built are dropped in reverse order.
pub struct ServiceFactories {
    pub switch: Box<dyn FnOnce(&Context<'_>) -> Result<Box<dyn Switch>, ServiceError> + Send>,
    pub multicaster:
        Box<dyn FnOnce(&Context<'_>) -> Result<Box<dyn Multicaster>, ServiceError> + Send>,
    pub topology:
        Box<dyn FnOnce(&Context<'_>) -> Result<Box<dyn Topology>, ServiceError> + Send>,
}
