//! Shared test fixtures

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::Mutex;

use crate::host::{ConfigOperation, Event, HostCallbacks};
use crate::network::{Mac, NetworkId, VirtualNetworkConfig};

/// In-memory host that records every callback
#[derive(Default)]
pub(crate) struct RecordingHost {
    pub store: Mutex<HashMap<String, Vec<u8>>>,
    /// Names written through `data_store_put`, in order
    pub puts: Mutex<Vec<String>>,
    /// When set, every `data_store_put` fails
    pub fail_puts: Mutex<bool>,
    pub events: Mutex<Vec<Event>>,
    pub config_events: Mutex<Vec<(NetworkId, ConfigOperation)>>,
    pub wire_sends: Mutex<Vec<(SocketAddr, u32, Vec<u8>)>>,
}

impl HostCallbacks for RecordingHost {
    fn data_store_get(
        &self,
        name: &str,
        buf: &mut [u8],
        read_offset: u64,
        total_len: &mut u64,
    ) -> i64 {
        let store = self.store.lock();
        let Some(data) = store.get(name) else {
            return -1;
        };
        *total_len = data.len() as u64;
        let offset = read_offset as usize;
        if offset >= data.len() {
            return 0;
        }
        let n = (data.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n as i64
    }

    fn data_store_put(&self, name: &str, data: &[u8], _secure: bool) -> bool {
        if *self.fail_puts.lock() {
            return false;
        }
        self.puts.lock().push(name.to_string());
        self.store.lock().insert(name.to_string(), data.to_vec());
        true
    }

    fn wire_packet_send(&self, remote: SocketAddr, link_desperation: u32, data: &[u8]) {
        self.wire_sends
            .lock()
            .push((remote, link_desperation, data.to_vec()));
    }

    fn virtual_network_frame(
        &self,
        _nwid: NetworkId,
        _src_mac: Mac,
        _dst_mac: Mac,
        _ether_type: u16,
        _vlan_id: u16,
        _data: &[u8],
    ) {
    }

    fn virtual_network_config(
        &self,
        nwid: NetworkId,
        op: ConfigOperation,
        _config: &VirtualNetworkConfig,
    ) {
        self.config_events.lock().push((nwid, op));
    }

    fn status_event(&self, event: Event) {
        self.events.lock().push(event);
    }
}
