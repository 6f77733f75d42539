//! Compiled-in defaults
//!
//! Used when the embedder's store holds no root topology, or the stored
//! copy fails authentication.

use crate::dictionary::Dictionary;

/// The default root topology naming the well-known supernodes.
///
/// The `supernodes` entry is a nested dictionary mapping each
/// supernode's address to its endpoint list (`proto/ip/port`,
/// comma-separated).
pub fn default_root_topology() -> Dictionary {
    let mut supernodes = Dictionary::new();
    supernodes.insert("8a5ac1e79d", "udp/198.51.100.12/7946");
    supernodes.insert("31d79c3f6e", "udp/203.0.113.41/7946");
    supernodes.insert("d03f2a91c7", "udp/192.0.2.9/7946,udp/192.0.2.10/7946");

    let mut root = Dictionary::new();
    root.insert("supernodes", supernodes.encode());
    root
}
