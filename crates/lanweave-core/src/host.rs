//! Host embedding contract
//!
//! The embedder supplies one [`HostCallbacks`] object at construction;
//! it is the node's sole I/O surface. All callbacks are synchronous and
//! may block the calling entry point. Wire-send and tap-deliver may be
//! invoked from within any public node operation; embedders must not
//! recursively call node operations from inside a callback on the same
//! thread.

use std::net::SocketAddr;

use crate::network::{Mac, NetworkId, VirtualNetworkConfig};
use crate::version::Version;

/// Persistent storage keys used by the node
pub mod storage_keys {
    pub const IDENTITY_SECRET: &str = "identity.secret";
    pub const IDENTITY_PUBLIC: &str = "identity.public";
    pub const ROOT_TOPOLOGY: &str = "root-topology";
}

/// Node-level events reported through the status callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The node is constructed and operational
    Up,

    /// No supernode has been heard from recently
    Offline,

    /// Supernode contact (re)established
    Online,

    /// A peer reported running a newer release than any seen so far
    SawMoreRecentVersion(Version),

    /// Another node on the wire claims this node's address
    FatalErrorIdentityCollision,
}

/// Configuration lifecycle events for a joined network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOperation {
    /// The network came up and its tap should be created
    Up,

    /// The network's configuration changed
    ConfigUpdate,

    /// The network is administratively down
    Down,

    /// The network was left and its tap should be torn down
    Destroy,
}

/// The embedder's callback surface
pub trait HostCallbacks: Send + Sync {
    /// Read a chunk of the named stored object.
    ///
    /// Returns `<= 0` if the object does not exist. Otherwise writes up
    /// to `buf.len()` bytes of the object starting at `read_offset` into
    /// `buf`, sets `*total_len` to the full object length, and returns
    /// the number of bytes written.
    fn data_store_get(
        &self,
        name: &str,
        buf: &mut [u8],
        read_offset: u64,
        total_len: &mut u64,
    ) -> i64;

    /// Atomically write or overwrite the named stored object.
    ///
    /// `secure` requests storage appropriate for secrets. Returns
    /// whether the write succeeded.
    fn data_store_put(&self, name: &str, data: &[u8], secure: bool) -> bool;

    /// Transmit a UDP datagram to the given address. Silent drops are
    /// permitted.
    fn wire_packet_send(&self, remote: SocketAddr, link_desperation: u32, data: &[u8]);

    /// Deliver a decrypted Ethernet frame upward to the tap belonging to
    /// `nwid`.
    fn virtual_network_frame(
        &self,
        nwid: NetworkId,
        src_mac: Mac,
        dst_mac: Mac,
        ether_type: u16,
        vlan_id: u16,
        data: &[u8],
    );

    /// Report a configuration lifecycle event for a joined network.
    fn virtual_network_config(
        &self,
        nwid: NetworkId,
        op: ConfigOperation,
        config: &VirtualNetworkConfig,
    );

    /// Report a node-level event.
    fn status_event(&self, event: Event);
}

/// Read a whole object from the embedder's store.
///
/// The callback may deliver the value in chunks; keep appending until
/// the accumulated length reaches the reported total. A non-positive
/// return means the object is absent and yields an empty result.
pub(crate) fn fetch_object(host: &dyn HostCallbacks, name: &str) -> Vec<u8> {
    let mut buf = [0u8; 16384];
    let mut out: Vec<u8> = Vec::new();
    let mut total: u64 = 0;
    loop {
        let n = host.data_store_get(name, &mut buf, out.len() as u64, &mut total);
        if n <= 0 {
            return Vec::new();
        }
        let n = (n as usize).min(buf.len());
        out.extend_from_slice(&buf[..n]);
        if out.len() as u64 >= total {
            return out;
        }
    }
}
