//! The Node
//!
//! One long-lived object owning the packet switch, peer topology,
//! multicast engine and the registry of joined networks. The embedder
//! drives it and supplies wall-clock time with every call; the node has
//! no clock, threads, or sockets of its own.
//!
//! Two locks serialize internal state: the background lock (held for a
//! whole background tick) and the registry lock (held briefly across
//! registry access). Wire and tap ingress never take the background
//! lock, so they run concurrently with background processing.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use lanweave_crypto::{Address, Identity};

use crate::config::NodeConfig;
use crate::defaults;
use crate::dictionary::Dictionary;
use crate::error::{CoreError, CoreResult, ServiceError};
use crate::host::{fetch_object, storage_keys, Event, HostCallbacks};
use crate::network::{Mac, MulticastGroup, Network, NetworkId, VirtualNetworkConfig};
use crate::registry::NetworkRegistry;
use crate::services::{Context, Multicaster, ServiceFactories, Switch, Topology};
use crate::version::Version;

/// Snapshot of node-level state returned by [`Node::status`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub address: Address,
    pub public_identity: String,
    pub online: bool,
    pub desperation: u32,
    pub version: Version,
}

/// Snapshot of one known peer returned by [`Node::peers`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub address: Address,
    pub last_receive: u64,
    pub alive: bool,
    pub supernode: bool,
}

/// Millisecond timing knobs cached from [`NodeConfig`]
struct Timings {
    ping_check_interval: u64,
    housekeeping_period: u64,
    network_autoconf_delay: u64,
    timer_granularity: u64,
    desperation_increment: u64,
}

impl Timings {
    fn new(config: &NodeConfig) -> Self {
        Self {
            ping_check_interval: config.ping_check_interval.as_millis() as u64,
            housekeeping_period: config.housekeeping_period.as_millis() as u64,
            network_autoconf_delay: config.network_autoconf_delay.as_millis() as u64,
            timer_granularity: config.timer_granularity.as_millis() as u64,
            desperation_increment: config.desperation_increment,
        }
    }
}

/// State mutated only under the background lock
struct BackgroundState {
    start_time_after_inactivity: u64,
    last_ping_check: u64,
    last_housekeeping_run: u64,
    online: bool,
}

/// The embeddable node engine
pub struct Node {
    host: Arc<dyn HostCallbacks>,
    identity: Identity,
    timings: Timings,
    switch: Box<dyn Switch>,
    multicaster: Box<dyn Multicaster>,
    topology: Box<dyn Topology>,
    networks: NetworkRegistry,
    now: AtomicU64,
    desperation: AtomicU32,
    background: Mutex<BackgroundState>,
    newest_version_seen: Mutex<Version>,
}

impl Node {
    /// Construct a node.
    ///
    /// Loads the identity from the embedder's store (generating and
    /// persisting one on first run), builds the collaborator subsystems
    /// in a fixed order, resolves the root topology, and emits an
    /// [`Event::Up`]. A store write failure for a freshly generated
    /// identity fails construction with
    /// [`CoreError::DataStoreFailed`].
    pub fn new(
        now: u64,
        config: NodeConfig,
        host: Arc<dyn HostCallbacks>,
        services: ServiceFactories,
        root_topology_override: Option<&str>,
    ) -> CoreResult<Self> {
        config.validate().map_err(CoreError::Internal)?;

        let identity = Self::load_or_create_identity(host.as_ref())?;
        info!("Node identity is {}", identity.address());

        // Fixed construction order; a failure here drops the subsystems
        // already built, in reverse order.
        let ctx = Context {
            host: host.as_ref(),
            identity: &identity,
            now,
            desperation: 0,
        };
        let switch = (services.switch)(&ctx)?;
        let multicaster = (services.multicaster)(&ctx)?;
        let topology = (services.topology)(&ctx)?;

        let root =
            Self::resolve_root_topology(host.as_ref(), topology.as_ref(), root_topology_override);
        let supernodes = Dictionary::parse(root.get_or("supernodes", ""));
        topology.set_supernodes(&supernodes);

        let node = Self {
            host,
            identity,
            timings: Timings::new(&config),
            switch,
            multicaster,
            topology,
            networks: NetworkRegistry::new(),
            now: AtomicU64::new(now),
            desperation: AtomicU32::new(0),
            background: Mutex::new(BackgroundState {
                start_time_after_inactivity: 0,
                last_ping_check: 0,
                last_housekeeping_run: 0,
                online: true,
            }),
            newest_version_seen: Mutex::new(Version::current()),
        };

        node.host.status_event(Event::Up);
        info!("Node up");
        Ok(node)
    }

    fn load_or_create_identity(host: &dyn HostCallbacks) -> CoreResult<Identity> {
        let stored = fetch_object(host, storage_keys::IDENTITY_SECRET);
        if !stored.is_empty() {
            if let Ok(text) = std::str::from_utf8(&stored) {
                if let Ok(identity) = Identity::from_str(text) {
                    if identity.has_private() {
                        return Ok(identity);
                    }
                }
            }
            warn!("Stored identity is unusable, generating a new one");
        }

        let identity = Identity::generate();
        let secret = identity
            .to_string_with_private(true)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        if !host.data_store_put(storage_keys::IDENTITY_SECRET, secret.as_bytes(), true) {
            return Err(CoreError::DataStoreFailed(storage_keys::IDENTITY_SECRET));
        }
        let public = identity
            .to_string_with_private(false)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        if !host.data_store_put(storage_keys::IDENTITY_PUBLIC, public.as_bytes(), false) {
            return Err(CoreError::DataStoreFailed(storage_keys::IDENTITY_PUBLIC));
        }
        info!("Generated new identity {}", identity.address());
        Ok(identity)
    }

    /// Root topology sources, in order: embedder override (trusted),
    /// stored copy (kept only if it authenticates), compiled-in default.
    fn resolve_root_topology(
        host: &dyn HostCallbacks,
        topology: &dyn Topology,
        override_text: Option<&str>,
    ) -> Dictionary {
        if let Some(text) = override_text {
            return Dictionary::parse(text);
        }

        let stored = fetch_object(host, storage_keys::ROOT_TOPOLOGY);
        if !stored.is_empty() {
            if let Ok(text) = std::str::from_utf8(&stored) {
                let dict = Dictionary::parse(text);
                if !dict.is_empty() && topology.authenticate_root_topology(&dict) {
                    return dict;
                }
            }
            warn!("Stored root topology failed authentication, using default");
        }

        defaults::default_root_topology()
    }

    fn context(&self) -> Context<'_> {
        Context {
            host: &*self.host,
            identity: &self.identity,
            now: self.now.load(Ordering::Relaxed),
            desperation: self.desperation.load(Ordering::Relaxed),
        }
    }

    /// Feed one received wire packet to the switch.
    ///
    /// If `now` has reached the previously returned deadline, the
    /// background tick runs first; a failing tick aborts the call.
    /// Malformed packets are dropped by the switch and still return
    /// `Ok`.
    pub fn process_wire_packet(
        &self,
        now: u64,
        remote: SocketAddr,
        link_desperation: u32,
        data: &[u8],
        next_deadline: &mut u64,
    ) -> CoreResult<()> {
        if now >= *next_deadline {
            self.process_background_tasks(now, next_deadline)?;
        } else {
            self.now.store(now, Ordering::Relaxed);
        }

        trace!("Wire packet from {}, {} bytes", remote, data.len());
        let ctx = self.context();
        self.switch
            .on_remote_packet(&ctx, remote, link_desperation, data)
            .map_err(|e| match e {
                ServiceError::OutOfMemory => CoreError::OutOfMemory,
                ServiceError::Internal(_) => CoreError::PacketInvalid,
            })
    }

    /// Feed one Ethernet frame from a network's tap to the switch.
    ///
    /// Returns [`CoreError::NetworkNotFound`] without side effects if
    /// the network is not joined.
    pub fn process_virtual_network_frame(
        &self,
        now: u64,
        nwid: NetworkId,
        src_mac: Mac,
        dst_mac: Mac,
        ether_type: u16,
        vlan_id: u16,
        data: &[u8],
        next_deadline: &mut u64,
    ) -> CoreResult<()> {
        if now >= *next_deadline {
            self.process_background_tasks(now, next_deadline)?;
        } else {
            self.now.store(now, Ordering::Relaxed);
        }

        let network = self
            .networks
            .get(nwid)
            .ok_or(CoreError::NetworkNotFound(nwid))?;

        trace!("Tap frame on {}, {} bytes", nwid, data.len());
        let ctx = self.context();
        self.switch
            .on_local_ethernet(&ctx, &network, src_mac, dst_mac, ether_type, vlan_id, data)
            .map_err(|e| match e {
                ServiceError::OutOfMemory => CoreError::OutOfMemory,
                ServiceError::Internal(msg) => CoreError::Internal(msg),
            })
    }

    /// Run the periodic background work and compute the next deadline.
    ///
    /// Serialized under the background lock. On `Ok`, `*next_deadline`
    /// has been updated; on error the remaining subroutines were
    /// skipped and the deadline may be stale until the next tick.
    pub fn process_background_tasks(
        &self,
        now: u64,
        next_deadline: &mut u64,
    ) -> CoreResult<()> {
        self.now.store(now, Ordering::Relaxed);
        let mut bg = self.background.lock();

        if now.saturating_sub(bg.last_ping_check) >= self.timings.ping_check_interval {
            bg.last_ping_check = now;

            // A long gap since the start of activity means the host
            // slept or ticks stopped; restart desperation counting from
            // a fresh baseline instead of spiking.
            if now.saturating_sub(bg.start_time_after_inactivity)
                > self.timings.ping_check_interval * 3
            {
                bg.start_time_after_inactivity = now;
            }

            let ctx = self.context();
            let supernodes = self.topology.supernode_addresses();
            let mut last_receive_from_supernode = 0u64;
            self.topology.each_peer(&mut |peer| {
                if supernodes.contains(&peer.address()) {
                    peer.ping_and_keepalive(&ctx, now);
                    last_receive_from_supernode =
                        last_receive_from_supernode.max(peer.last_receive());
                } else if peer.alive(now) {
                    peer.ping_and_keepalive(&ctx, now);
                }
            });

            let baseline = bg
                .start_time_after_inactivity
                .max(last_receive_from_supernode);
            let desperation = (now.saturating_sub(baseline)
                / (self.timings.ping_check_interval * self.timings.desperation_increment))
                as u32;
            self.desperation.store(desperation, Ordering::Relaxed);
            debug!("Ping check complete, desperation {}", desperation);

            let online = desperation == 0;
            if online != bg.online {
                bg.online = online;
                info!("Node is {}", if online { "online" } else { "offline" });
                self.host.status_event(if online {
                    Event::Online
                } else {
                    Event::Offline
                });
            }

            let ctx = self.context();
            for nwid in self
                .networks
                .stale_since(now, self.timings.network_autoconf_delay)
            {
                debug!("Requesting configuration refresh for {}", nwid);
                self.switch.request_network_config(&ctx, nwid)?;
            }
        }

        if now.saturating_sub(bg.last_housekeeping_run) >= self.timings.housekeeping_period {
            bg.last_housekeeping_run = now;
            debug!("Housekeeping: expiring dead peers and multicast groups");
            self.topology.clean(now)?;
            self.multicaster.clean(now)?;
        }

        let ctx = self.context();
        let switch_interval = self.switch.timer_tasks(&ctx)?;
        *next_deadline = now
            + switch_interval.clamp(
                self.timings.timer_granularity,
                self.timings.ping_check_interval,
            );
        Ok(())
    }

    /// Join a virtual network; idempotent.
    pub fn join(&self, nwid: NetworkId) -> CoreResult<()> {
        let ctx = self.context();
        let (_network, created) = self
            .networks
            .insert_with(nwid, || Network::new(&ctx, nwid));
        if created {
            info!("Joined network {}", nwid);
            // Ask the controller right away rather than waiting for the
            // next background sweep.
            if let Err(e) = self.switch.request_network_config(&ctx, nwid) {
                debug!("Initial config request for {} failed: {}", nwid, e);
            }
        }
        Ok(())
    }

    /// Leave a virtual network, tearing down its tap; absent is a no-op.
    pub fn leave(&self, nwid: NetworkId) -> CoreResult<()> {
        if let Some(network) = self.networks.remove(nwid) {
            network.destroy(&self.context());
            info!("Left network {}", nwid);
        }
        Ok(())
    }

    /// Subscribe a joined network to a multicast group; silently ignored
    /// if the network is not joined.
    pub fn multicast_subscribe(&self, nwid: NetworkId, group_mac: Mac, adi: u32) -> CoreResult<()> {
        if let Some(network) = self.networks.get(nwid) {
            network.multicast_subscribe(MulticastGroup {
                mac: group_mac,
                adi,
            });
        }
        Ok(())
    }

    /// Remove a multicast subscription; silently ignored if the network
    /// is not joined.
    pub fn multicast_unsubscribe(
        &self,
        nwid: NetworkId,
        group_mac: Mac,
        adi: u32,
    ) -> CoreResult<()> {
        if let Some(network) = self.networks.get(nwid) {
            network.multicast_unsubscribe(MulticastGroup {
                mac: group_mac,
                adi,
            });
        }
        Ok(())
    }

    /// The membership object for a joined network
    pub fn network(&self, nwid: NetworkId) -> Option<Arc<Network>> {
        self.networks.get(nwid)
    }

    /// Configuration snapshot for a joined network, or `None`
    pub fn network_config(&self, nwid: NetworkId) -> Option<VirtualNetworkConfig> {
        self.networks.get(nwid).map(|n| n.external_config())
    }

    /// Configuration snapshots for all joined networks
    pub fn networks(&self) -> Vec<VirtualNetworkConfig> {
        self.networks
            .snapshot()
            .iter()
            .map(|n| n.external_config())
            .collect()
    }

    /// Snapshot of node-level state
    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            address: self.identity.address(),
            public_identity: self.identity.to_string(),
            online: self.background.lock().online,
            desperation: self.desperation.load(Ordering::Relaxed),
            version: Version::current(),
        }
    }

    /// Snapshots of all peers known to the topology
    pub fn peers(&self) -> Vec<PeerSnapshot> {
        let now = self.now.load(Ordering::Relaxed);
        let supernodes = self.topology.supernode_addresses();
        let mut out = Vec::new();
        self.topology.each_peer(&mut |peer| {
            out.push(PeerSnapshot {
                address: peer.address(),
                last_receive: peer.last_receive(),
                alive: peer.alive(now),
                supernode: supernodes.contains(&peer.address()),
            });
        });
        out
    }

    /// Record a release version reported by a peer; emits
    /// [`Event::SawMoreRecentVersion`] when it exceeds every version
    /// seen so far.
    pub fn post_newer_version_if_newer(&self, observed: Version) {
        let mut seen = self.newest_version_seen.lock();
        if observed > *seen {
            *seen = observed;
            drop(seen);
            info!("A peer reports newer release {}", observed);
            self.host.status_event(Event::SawMoreRecentVersion(observed));
        }
    }

    /// The highest release version reported by any peer (or our own)
    pub fn newest_version_seen(&self) -> Version {
        *self.newest_version_seen.lock()
    }

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Current desperation level
    pub fn desperation(&self) -> u32 {
        self.desperation.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({})", self.identity.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ConfigOperation;
    use crate::services::Peer;
    use crate::test_support::RecordingHost;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct TestPeer {
        address: Address,
        last_receive: AtomicU64,
        alive: bool,
        pings: AtomicU32,
    }

    impl TestPeer {
        fn new(address: Address) -> Arc<Self> {
            Arc::new(Self {
                address,
                last_receive: AtomicU64::new(0),
                alive: true,
                pings: AtomicU32::new(0),
            })
        }
    }

    impl Peer for TestPeer {
        fn address(&self) -> Address {
            self.address
        }

        fn last_receive(&self) -> u64 {
            self.last_receive.load(Ordering::Relaxed)
        }

        fn alive(&self, _now: u64) -> bool {
            self.alive
        }

        fn ping_and_keepalive(&self, _ctx: &Context<'_>, _now: u64) {
            self.pings.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[derive(Default)]
    struct TestTopology {
        peers: Mutex<Vec<Arc<TestPeer>>>,
        supernodes: Mutex<Vec<Address>>,
        supernode_dict: Mutex<Option<Dictionary>>,
        authentic: bool,
        fail_clean: bool,
        cleans: AtomicU32,
    }

    impl Topology for Arc<TestTopology> {
        fn set_supernodes(&self, supernodes: &Dictionary) {
            *self.supernode_dict.lock() = Some(supernodes.clone());
        }

        fn authenticate_root_topology(&self, _root_topology: &Dictionary) -> bool {
            self.authentic
        }

        fn supernode_addresses(&self) -> Vec<Address> {
            self.supernodes.lock().clone()
        }

        fn each_peer(&self, f: &mut dyn FnMut(&dyn Peer)) {
            for peer in self.peers.lock().iter() {
                f(peer.as_ref());
            }
        }

        fn clean(&self, _now: u64) -> Result<(), ServiceError> {
            if self.fail_clean {
                return Err(ServiceError::Internal("topology clean failed".into()));
            }
            self.cleans.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestSwitch {
        remote_packets: AtomicU32,
        local_frames: AtomicU32,
        config_requests: Mutex<Vec<NetworkId>>,
        timer_interval: AtomicU64,
        fail_remote: AtomicBool,
    }

    impl Switch for Arc<TestSwitch> {
        fn on_remote_packet(
            &self,
            _ctx: &Context<'_>,
            _remote: SocketAddr,
            _link_desperation: u32,
            _data: &[u8],
        ) -> Result<(), ServiceError> {
            if self.fail_remote.load(Ordering::Relaxed) {
                return Err(ServiceError::Internal("switch broke".into()));
            }
            self.remote_packets.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn on_local_ethernet(
            &self,
            _ctx: &Context<'_>,
            _network: &Arc<Network>,
            _src_mac: Mac,
            _dst_mac: Mac,
            _ether_type: u16,
            _vlan_id: u16,
            _data: &[u8],
        ) -> Result<(), ServiceError> {
            self.local_frames.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn request_network_config(
            &self,
            _ctx: &Context<'_>,
            nwid: NetworkId,
        ) -> Result<(), ServiceError> {
            self.config_requests.lock().push(nwid);
            Ok(())
        }

        fn timer_tasks(&self, _ctx: &Context<'_>) -> Result<u64, ServiceError> {
            Ok(self.timer_interval.load(Ordering::Relaxed))
        }
    }

    #[derive(Default)]
    struct TestMulticaster {
        cleans: AtomicU32,
    }

    impl Multicaster for Arc<TestMulticaster> {
        fn clean(&self, _now: u64) -> Result<(), ServiceError> {
            self.cleans.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Fixture {
        host: Arc<RecordingHost>,
        switch: Arc<TestSwitch>,
        multicaster: Arc<TestMulticaster>,
        topology: Arc<TestTopology>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_topology(TestTopology::default())
        }

        fn with_topology(topology: TestTopology) -> Self {
            let switch = Arc::new(TestSwitch::default());
            switch.timer_interval.store(1000, Ordering::Relaxed);
            Self {
                host: Arc::new(RecordingHost::default()),
                switch,
                multicaster: Arc::new(TestMulticaster::default()),
                topology: Arc::new(topology),
            }
        }

        fn factories(&self) -> ServiceFactories {
            let switch = self.switch.clone();
            let multicaster = self.multicaster.clone();
            let topology = self.topology.clone();
            ServiceFactories {
                switch: Box::new(move |_| Ok(Box::new(switch) as Box<dyn Switch>)),
                multicaster: Box::new(move |_| {
                    Ok(Box::new(multicaster) as Box<dyn Multicaster>)
                }),
                topology: Box::new(move |_| Ok(Box::new(topology) as Box<dyn Topology>)),
            }
        }

        fn node_at(&self, now: u64, config: NodeConfig) -> Node {
            Node::new(now, config, self.host.clone(), self.factories(), None).unwrap()
        }
    }

    /// Short intervals so tick behavior is observable at small timestamps
    fn fast_config() -> NodeConfig {
        NodeConfig {
            ping_check_interval: Duration::from_millis(1000),
            housekeeping_period: Duration::from_millis(2000),
            network_autoconf_delay: Duration::from_millis(1000),
            timer_granularity: Duration::from_millis(100),
            desperation_increment: 2,
        }
    }

    fn addr() -> SocketAddr {
        "198.51.100.1:7946".parse().unwrap()
    }

    fn events_of(host: &RecordingHost) -> Vec<Event> {
        host.events.lock().clone()
    }

    #[test]
    fn test_cold_start_persists_identity() {
        let fixture = Fixture::new();
        let node = fixture.node_at(1000, NodeConfig::default());

        let store = fixture.host.store.lock();
        let secret = store.get(storage_keys::IDENTITY_SECRET).unwrap();
        let public = store.get(storage_keys::IDENTITY_PUBLIC).unwrap();
        assert!(!secret.is_empty());

        let secret_id = Identity::from_str(std::str::from_utf8(secret).unwrap()).unwrap();
        let public_id = Identity::from_str(std::str::from_utf8(public).unwrap()).unwrap();
        assert!(secret_id.has_private());
        assert!(!public_id.has_private());
        assert_eq!(public_id, secret_id.public_projection());
        assert_eq!(node.address(), secret_id.address());

        assert!(events_of(&fixture.host).contains(&Event::Up));
    }

    #[test]
    fn test_warm_start_reuses_identity() {
        let fixture = Fixture::new();
        let identity = Identity::generate();
        {
            let mut store = fixture.host.store.lock();
            store.insert(
                storage_keys::IDENTITY_SECRET.to_string(),
                identity
                    .to_string_with_private(true)
                    .unwrap()
                    .into_bytes(),
            );
            store.insert(
                storage_keys::IDENTITY_PUBLIC.to_string(),
                identity
                    .to_string_with_private(false)
                    .unwrap()
                    .into_bytes(),
            );
        }

        let node = fixture.node_at(2000, NodeConfig::default());

        assert_eq!(node.address(), identity.address());
        assert!(fixture.host.puts.lock().is_empty());
    }

    #[test]
    fn test_identity_store_failure_is_fatal() {
        let fixture = Fixture::new();
        *fixture.host.fail_puts.lock() = true;

        let err = Node::new(
            1000,
            NodeConfig::default(),
            fixture.host.clone(),
            fixture.factories(),
            None,
        )
        .unwrap_err();

        assert!(matches!(err, CoreError::DataStoreFailed(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_subsystem_build_order_and_failure() {
        let host = Arc::new(RecordingHost::default());
        let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));

        let o1 = order.clone();
        let o2 = order.clone();
        let factories = ServiceFactories {
            switch: Box::new(move |_| {
                o1.lock().push("switch");
                Ok(Box::new(Arc::new(TestSwitch::default())) as Box<dyn Switch>)
            }),
            multicaster: Box::new(move |_| {
                o2.lock().push("multicaster");
                Err(ServiceError::Internal("no multicaster".into()))
            }),
            topology: Box::new(|_| {
                panic!("topology must not be built after an earlier failure")
            }),
        };

        let err = Node::new(1000, NodeConfig::default(), host, factories, None).unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
        assert_eq!(*order.lock(), vec!["switch", "multicaster"]);
    }

    #[test]
    fn test_join_leave_lifecycle() {
        let fixture = Fixture::new();
        let node = fixture.node_at(1000, NodeConfig::default());
        let nwid = NetworkId(0xdeadbeef);

        node.join(nwid).unwrap();
        assert!(node.network_config(nwid).is_some());

        node.leave(nwid).unwrap();
        assert!(node.network_config(nwid).is_none());

        let config_events = fixture.host.config_events.lock();
        assert!(config_events.contains(&(nwid, ConfigOperation::Up)));
        assert!(config_events.contains(&(nwid, ConfigOperation::Destroy)));
    }

    #[test]
    fn test_join_is_idempotent() {
        let fixture = Fixture::new();
        let node = fixture.node_at(1000, NodeConfig::default());
        let nwid = NetworkId(0xdeadbeef);

        node.join(nwid).unwrap();
        node.join(nwid).unwrap();

        assert_eq!(node.networks().len(), 1);
        let ups = fixture
            .host
            .config_events
            .lock()
            .iter()
            .filter(|(_, op)| *op == ConfigOperation::Up)
            .count();
        assert_eq!(ups, 1);
        // One initial config request, not two
        assert_eq!(fixture.switch.config_requests.lock().len(), 1);
    }

    #[test]
    fn test_leave_absent_is_noop() {
        let fixture = Fixture::new();
        let node = fixture.node_at(1000, NodeConfig::default());

        node.leave(NetworkId(42)).unwrap();
        assert!(fixture.host.config_events.lock().is_empty());
    }

    #[test]
    fn test_multicast_scoped_to_membership() {
        let fixture = Fixture::new();
        let node = fixture.node_at(1000, NodeConfig::default());
        let nwid = NetworkId(1);
        let group_mac = Mac::new(0x01005e000001);

        node.join(nwid).unwrap();
        node.multicast_subscribe(nwid, group_mac, 0).unwrap();
        assert_eq!(
            node.network_config(nwid)
                .unwrap()
                .multicast_subscriptions
                .len(),
            1
        );

        node.leave(nwid).unwrap();
        node.join(nwid).unwrap();

        // A fresh membership carries no prior subscriptions
        assert!(node
            .network_config(nwid)
            .unwrap()
            .multicast_subscriptions
            .is_empty());

        // Operations on unjoined networks are silent no-ops
        node.multicast_subscribe(NetworkId(99), group_mac, 0).unwrap();
        node.multicast_unsubscribe(NetworkId(99), group_mac, 0).unwrap();
    }

    #[test]
    fn test_overdue_deadline_runs_tick_before_packet() {
        let topology = TestTopology::default();
        let peer = TestPeer::new(Address::from_bytes([1, 2, 3, 4, 5]));
        topology.peers.lock().push(peer.clone());

        let fixture = Fixture::with_topology(topology);
        fixture.switch.timer_interval.store(250, Ordering::Relaxed);
        let node = fixture.node_at(1000, fast_config());

        let mut deadline = 0u64;
        node.process_wire_packet(5000, addr(), 0, &[], &mut deadline)
            .unwrap();

        // Deadline lands inside [now + granularity, now + ping interval]
        assert_eq!(deadline, 5250);
        assert!(deadline >= 5000 + 100 && deadline <= 5000 + 1000);
        assert_eq!(fixture.switch.remote_packets.load(Ordering::Relaxed), 1);
        assert_eq!(peer.pings.load(Ordering::Relaxed), 1);

        // Before the new deadline no tick runs
        node.process_wire_packet(5100, addr(), 0, &[], &mut deadline)
            .unwrap();
        assert_eq!(peer.pings.load(Ordering::Relaxed), 1);
        assert_eq!(fixture.switch.remote_packets.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_deadline_clamped_to_granularity_and_ping_interval() {
        let fixture = Fixture::new();
        let node = fixture.node_at(1000, fast_config());
        let mut deadline = 0u64;

        fixture.switch.timer_interval.store(10, Ordering::Relaxed);
        node.process_background_tasks(2000, &mut deadline).unwrap();
        assert_eq!(deadline, 2000 + 100);

        fixture.switch.timer_interval.store(500, Ordering::Relaxed);
        node.process_background_tasks(3000, &mut deadline).unwrap();
        assert_eq!(deadline, 3000 + 500);

        fixture
            .switch
            .timer_interval
            .store(10_000_000, Ordering::Relaxed);
        node.process_background_tasks(4000, &mut deadline).unwrap();
        assert_eq!(deadline, 4000 + 1000);
    }

    #[test]
    fn test_supernodes_pinged_even_when_dead() {
        let topology = TestTopology::default();
        let supernode_addr = Address::from_bytes([9, 9, 9, 9, 9]);
        let supernode = Arc::new(TestPeer {
            address: supernode_addr,
            last_receive: AtomicU64::new(0),
            alive: false,
            pings: AtomicU32::new(0),
        });
        let dead_peer = Arc::new(TestPeer {
            address: Address::from_bytes([1, 1, 1, 1, 1]),
            last_receive: AtomicU64::new(0),
            alive: false,
            pings: AtomicU32::new(0),
        });
        topology.peers.lock().push(supernode.clone());
        topology.peers.lock().push(dead_peer.clone());
        topology.supernodes.lock().push(supernode_addr);

        let fixture = Fixture::with_topology(topology);
        let node = fixture.node_at(1000, fast_config());

        let mut deadline = 0u64;
        node.process_background_tasks(2000, &mut deadline).unwrap();

        // Supernodes are pinged unconditionally; dead ordinary peers are not
        assert_eq!(supernode.pings.load(Ordering::Relaxed), 1);
        assert_eq!(dead_peer.pings.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_desperation_escalates_and_resets() {
        let topology = TestTopology::default();
        let supernode_addr = Address::from_bytes([9, 9, 9, 9, 9]);
        let supernode = TestPeer::new(supernode_addr);
        topology.peers.lock().push(supernode.clone());
        topology.supernodes.lock().push(supernode_addr);

        let fixture = Fixture::with_topology(topology);
        // ping 1000ms, increment 2: one desperation step per 2000ms of silence
        let node = fixture.node_at(500, fast_config());
        let mut deadline = 0u64;

        // Contact at t=1000
        supernode.last_receive.store(1000, Ordering::Relaxed);
        node.process_background_tasks(1000, &mut deadline).unwrap();
        assert_eq!(node.desperation(), 0);

        // Silence: two steps elapsed since last contact
        node.process_background_tasks(3000, &mut deadline).unwrap();
        assert_eq!(node.desperation(), 1);
        assert_eq!(
            events_of(&fixture.host)
                .iter()
                .filter(|e| **e == Event::Offline)
                .count(),
            1
        );

        // Contact resumes
        supernode.last_receive.store(3900, Ordering::Relaxed);
        node.process_background_tasks(4000, &mut deadline).unwrap();
        assert_eq!(node.desperation(), 0);
        assert_eq!(
            events_of(&fixture.host)
                .iter()
                .filter(|e| **e == Event::Online)
                .count(),
            1
        );
    }

    #[test]
    fn test_desperation_baseline_restarts_after_inactivity() {
        let fixture = Fixture::new();
        let node = fixture.node_at(500, fast_config());
        let mut deadline = 0u64;

        // No ticks for far longer than 3 ping intervals: the baseline is
        // advanced to now instead of producing a huge desperation spike.
        node.process_background_tasks(100_000, &mut deadline).unwrap();
        assert_eq!(node.desperation(), 0);

        // Counting restarts from the fresh baseline
        node.process_background_tasks(102_000, &mut deadline).unwrap();
        assert_eq!(node.desperation(), 1);
    }

    #[test]
    fn test_stale_network_gets_config_refresh() {
        let fixture = Fixture::new();
        let node = fixture.node_at(500, fast_config());
        let nwid = NetworkId(5);
        node.join(nwid).unwrap();
        assert_eq!(*fixture.switch.config_requests.lock(), vec![nwid]);

        // Never-configured network is stale once the delay has elapsed
        let mut deadline = 0u64;
        node.process_background_tasks(2000, &mut deadline).unwrap();
        assert_eq!(*fixture.switch.config_requests.lock(), vec![nwid, nwid]);
    }

    #[test]
    fn test_housekeeping_cleans_on_its_own_cadence() {
        let fixture = Fixture::new();
        let node = fixture.node_at(500, fast_config());
        let mut deadline = 0u64;

        // Before the housekeeping period: ping phase only
        node.process_background_tasks(1500, &mut deadline).unwrap();
        assert_eq!(fixture.topology.cleans.load(Ordering::Relaxed), 0);
        assert_eq!(fixture.multicaster.cleans.load(Ordering::Relaxed), 0);

        node.process_background_tasks(2500, &mut deadline).unwrap();
        assert_eq!(fixture.topology.cleans.load(Ordering::Relaxed), 1);
        assert_eq!(fixture.multicaster.cleans.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_tick_failure_aborts_and_leaves_deadline_stale() {
        let fixture = Fixture::with_topology(TestTopology {
            fail_clean: true,
            ..Default::default()
        });
        let node = fixture.node_at(500, fast_config());

        let mut deadline = 123u64;
        let err = node.process_background_tasks(2500, &mut deadline).unwrap_err();

        assert!(matches!(err, CoreError::Internal(_)));
        assert!(err.is_fatal());
        // The multicaster was never reached and the deadline not updated
        assert_eq!(fixture.multicaster.cleans.load(Ordering::Relaxed), 0);
        assert_eq!(deadline, 123);
    }

    #[test]
    fn test_frame_for_unknown_network() {
        let fixture = Fixture::new();
        let node = fixture.node_at(1000, NodeConfig::default());

        let mut deadline = u64::MAX;
        let err = node
            .process_virtual_network_frame(
                2000,
                NetworkId(42),
                Mac::new(1),
                Mac::new(2),
                0x0800,
                0,
                b"frame",
                &mut deadline,
            )
            .unwrap_err();

        assert!(matches!(err, CoreError::NetworkNotFound(NetworkId(42))));
        assert!(!err.is_fatal());
        assert_eq!(fixture.switch.local_frames.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_frame_for_joined_network_reaches_switch() {
        let fixture = Fixture::new();
        let node = fixture.node_at(1000, NodeConfig::default());
        let nwid = NetworkId(7);
        node.join(nwid).unwrap();

        let mut deadline = u64::MAX;
        node.process_virtual_network_frame(
            2000,
            nwid,
            Mac::new(1),
            Mac::new(2),
            0x0800,
            0,
            b"frame",
            &mut deadline,
        )
        .unwrap();

        assert_eq!(fixture.switch.local_frames.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_wire_packet_failure_maps_to_packet_invalid() {
        let fixture = Fixture::new();
        let node = fixture.node_at(1000, NodeConfig::default());
        fixture.switch.fail_remote.store(true, Ordering::Relaxed);

        let mut deadline = u64::MAX;
        let err = node
            .process_wire_packet(2000, addr(), 0, b"junk", &mut deadline)
            .unwrap_err();

        assert!(matches!(err, CoreError::PacketInvalid));
    }

    #[test]
    fn test_version_gossip_monotonic() {
        let fixture = Fixture::new();
        let node = fixture.node_at(1000, NodeConfig::default());

        node.post_newer_version_if_newer(Version::new(1, 2, 3));
        node.post_newer_version_if_newer(Version::new(1, 2, 2));
        node.post_newer_version_if_newer(Version::new(1, 3, 0));

        let seen: Vec<Version> = events_of(&fixture.host)
            .iter()
            .filter_map(|e| match e {
                Event::SawMoreRecentVersion(v) => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(seen, vec![Version::new(1, 2, 3), Version::new(1, 3, 0)]);
        assert_eq!(node.newest_version_seen(), Version::new(1, 3, 0));
    }

    #[test]
    fn test_root_topology_default() {
        let fixture = Fixture::new();
        let _node = fixture.node_at(1000, NodeConfig::default());

        let dict = fixture.topology.supernode_dict.lock().clone().unwrap();
        assert_eq!(dict.len(), 3);
    }

    #[test]
    fn test_root_topology_override() {
        let fixture = Fixture::new();

        let mut supernodes = Dictionary::new();
        supernodes.insert("aaaaaaaaaa", "udp/10.0.0.1/7946");
        let mut root = Dictionary::new();
        root.insert("supernodes", supernodes.encode());

        let _node = Node::new(
            1000,
            NodeConfig::default(),
            fixture.host.clone(),
            fixture.factories(),
            Some(&root.encode()),
        )
        .unwrap();

        let dict = fixture.topology.supernode_dict.lock().clone().unwrap();
        assert_eq!(dict, supernodes);
    }

    #[test]
    fn test_root_topology_stored_requires_authentication() {
        let mut supernodes = Dictionary::new();
        supernodes.insert("bbbbbbbbbb", "udp/10.0.0.2/7946");
        let mut root = Dictionary::new();
        root.insert("supernodes", supernodes.encode());

        // Unauthentic stored copy falls back to the default
        let fixture = Fixture::new();
        fixture.host.store.lock().insert(
            storage_keys::ROOT_TOPOLOGY.to_string(),
            root.encode().into_bytes(),
        );
        let _node = fixture.node_at(1000, NodeConfig::default());
        let dict = fixture.topology.supernode_dict.lock().clone().unwrap();
        assert_eq!(dict.len(), 3);

        // Authentic stored copy is used
        let fixture = Fixture::with_topology(TestTopology {
            authentic: true,
            ..Default::default()
        });
        fixture.host.store.lock().insert(
            storage_keys::ROOT_TOPOLOGY.to_string(),
            root.encode().into_bytes(),
        );
        let _node = fixture.node_at(1000, NodeConfig::default());
        let dict = fixture.topology.supernode_dict.lock().clone().unwrap();
        assert_eq!(dict, supernodes);
    }

    #[test]
    fn test_status_and_peers_snapshots() {
        let topology = TestTopology::default();
        let supernode_addr = Address::from_bytes([9, 9, 9, 9, 9]);
        let supernode = TestPeer::new(supernode_addr);
        supernode.last_receive.store(900, Ordering::Relaxed);
        topology.peers.lock().push(supernode);
        topology.supernodes.lock().push(supernode_addr);

        let fixture = Fixture::with_topology(topology);
        let node = fixture.node_at(1000, NodeConfig::default());
        node.join(NetworkId(1)).unwrap();

        let status = node.status();
        assert_eq!(status.address, node.address());
        assert!(status.online);
        assert_eq!(status.desperation, 0);
        assert_eq!(status.version, Version::current());
        assert_eq!(
            Identity::from_str(&status.public_identity).unwrap(),
            node.identity().public_projection()
        );

        let peers = node.peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address, supernode_addr);
        assert_eq!(peers[0].last_receive, 900);
        assert!(peers[0].supernode);

        assert_eq!(node.networks().len(), 1);
        assert_eq!(node.networks()[0].nwid, NetworkId(1));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let fixture = Fixture::new();
        let config = NodeConfig {
            ping_check_interval: Duration::ZERO,
            ..Default::default()
        };
        let err = Node::new(1000, config, fixture.host.clone(), fixture.factories(), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
    }
}
