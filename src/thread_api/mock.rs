//! An in-memory [`ThreadApi`] used by the collector's scenario tests, in
//! place of a real NCP: requests are recorded and responses are injected
//! by the test driving it rather than coming from a live Thread stack.

use super::{RouterInfo, ThisNodeInfo, ThreadApi, ThreadApiEvent};
use crate::domain::{Eui64, Rloc16};
use crate::error::BorderRouterError;
use crate::ipv6::NetworkPrefixes;
use crate::tlv::TlvType;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One observed call into the mock, recorded for test assertions (e.g.
/// scenario 4's "at least two retry sends are observed").
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    /// `send_diagnostic_get(dest, request_tlvs)`
    SendDiagnosticGet(Ipv6Addr, Vec<TlvType>),
    /// `send_diagnostic_reset(dest, counter_tlvs)`
    SendDiagnosticReset(Ipv6Addr, Vec<TlvType>),
    /// `query_child_table(router_rloc16)`
    QueryChildTable(Rloc16),
    /// `query_child_ip6_addrs(router_rloc16)`
    QueryChildIp6Addrs(Rloc16),
    /// `query_router_neighbors(router_rloc16)`
    QueryRouterNeighbors(Rloc16),
    /// `start_energy_scan(dest, ...)`
    StartEnergyScan(Ipv6Addr),
}

/// Mock `ThreadApi` backing a test: routers/this-node info are configured
/// up front, requests are recorded, and responses are injected via
/// [`MockThreadApi::push_event`] for the loop under test to observe through
/// [`MockThreadApi::take_events`].
pub struct MockThreadApi {
    routers: Mutex<HashMap<u8, RouterInfo>>,
    this_node: ThisNodeInfo,
    this_ext_address: Eui64,
    prefixes: NetworkPrefixes,
    calls: Mutex<Vec<RecordedCall>>,
    events_tx: mpsc::UnboundedSender<ThreadApiEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<ThreadApiEvent>>,
    border_router_origins: Mutex<Vec<Rloc16>>,
    srp_hosts: Mutex<Vec<(Ipv6Addr, String)>>,
    fail_sends: Mutex<bool>,
}

impl MockThreadApi {
    /// Builds a mock with the given node identity and mesh-local prefix.
    #[must_use]
    pub fn new(this_ext_address: Eui64, this_node: ThisNodeInfo, prefixes: NetworkPrefixes) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            routers: Mutex::new(HashMap::new()),
            this_node,
            this_ext_address,
            prefixes,
            calls: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(events_rx),
            border_router_origins: Mutex::new(Vec::new()),
            srp_hosts: Mutex::new(Vec::new()),
            fail_sends: Mutex::new(false),
        }
    }

    /// Registers a router so `get_router_info` can find it.
    pub fn add_router(&self, router_id: u8, info: RouterInfo) {
        self.routers.lock().unwrap().insert(router_id, info);
    }

    /// Removes a router so `get_router_info` no longer finds it.
    pub fn remove_router(&self, router_id: u8) {
        self.routers.lock().unwrap().remove(&router_id);
    }

    /// Marks `rloc16` as a route origin, so `is_border_router_origin`
    /// returns true for it.
    pub fn mark_border_router_origin(&self, rloc16: Rloc16) {
        self.border_router_origins.lock().unwrap().push(rloc16);
    }

    /// Registers an SRP host record for longest-prefix-match lookup.
    pub fn add_srp_host(&self, addr: Ipv6Addr, hostname: &str) {
        self.srp_hosts
            .lock()
            .unwrap()
            .push((addr, hostname.to_string()));
    }

    /// Queues a response event for the loop under test to pick up.
    pub fn push_event(&self, event: ThreadApiEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Drains all currently queued events (non-blocking).
    pub fn take_events(&self) -> Vec<ThreadApiEvent> {
        let mut rx = self.events_rx.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    /// Returns every call recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Counts how many `send_diagnostic_get` calls targeted `dest`.
    #[must_use]
    pub fn diagnostic_get_send_count(&self, dest: Ipv6Addr) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RecordedCall::SendDiagnosticGet(d, _) if *d == dest))
            .count()
    }

    /// Makes every subsequent send fail with `TransportFail`, to exercise
    /// the "no message buffers" failure path.
    pub fn fail_sends(&self) {
        *self.fail_sends.lock().unwrap() = true;
    }
}

#[async_trait]
impl ThreadApi for MockThreadApi {
    async fn send_diagnostic_get(
        &self,
        dest: Ipv6Addr,
        request_tlvs: &[TlvType],
    ) -> Result<(), BorderRouterError> {
        if *self.fail_sends.lock().unwrap() {
            return Err(BorderRouterError::TransportFail("no buffers".into()));
        }
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall::SendDiagnosticGet(dest, request_tlvs.to_vec()));
        Ok(())
    }

    async fn send_diagnostic_reset(
        &self,
        dest: Ipv6Addr,
        counter_tlvs: &[TlvType],
    ) -> Result<(), BorderRouterError> {
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall::SendDiagnosticReset(dest, counter_tlvs.to_vec()));
        Ok(())
    }

    async fn query_child_table(&self, router_rloc16: Rloc16) -> Result<(), BorderRouterError> {
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall::QueryChildTable(router_rloc16));
        Ok(())
    }

    async fn query_child_ip6_addrs(&self, router_rloc16: Rloc16) -> Result<(), BorderRouterError> {
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall::QueryChildIp6Addrs(router_rloc16));
        Ok(())
    }

    async fn query_router_neighbors(
        &self,
        router_rloc16: Rloc16,
    ) -> Result<(), BorderRouterError> {
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall::QueryRouterNeighbors(router_rloc16));
        Ok(())
    }

    fn get_router_info(&self, router_id: u8) -> Option<RouterInfo> {
        self.routers.lock().unwrap().get(&router_id).copied()
    }

    fn get_mesh_local_prefix(&self) -> NetworkPrefixes {
        self.prefixes
    }

    fn get_rloc16(&self) -> Rloc16 {
        self.this_node.rloc16
    }

    fn this_ext_address(&self) -> Eui64 {
        self.this_ext_address
    }

    fn this_node_info(&self) -> ThisNodeInfo {
        self.this_node.clone()
    }

    fn is_border_router_origin(&self, rloc16: Rloc16) -> bool {
        self.border_router_origins.lock().unwrap().contains(&rloc16)
    }

    fn border_routing_counters(&self) -> serde_json::Value {
        serde_json::json!({ "packetsForwarded": 0 })
    }

    fn lookup_srp_hostname(&self, addrs: &[Ipv6Addr]) -> Option<String> {
        let hosts = self.srp_hosts.lock().unwrap();
        let mut best: Option<(&Ipv6Addr, &String, u32)> = None;
        for addr in addrs {
            for (host_addr, name) in hosts.iter() {
                let shared = addr
                    .octets()
                    .iter()
                    .zip(host_addr.octets().iter())
                    .take_while(|(a, b)| a == b)
                    .count() as u32;
                if shared > best.map_or(0, |(_, _, s)| s) {
                    best = Some((host_addr, name, shared));
                }
            }
        }
        best.map(|(_, name, _)| name.clone())
    }

    async fn start_energy_scan(
        &self,
        dest: Ipv6Addr,
        _channel_mask: &[u8],
        _count: u32,
        _period: u16,
        _scan_duration: u16,
    ) -> Result<(), BorderRouterError> {
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall::StartEnergyScan(dest));
        Ok(())
    }

    fn poll_events(&self) -> Vec<ThreadApiEvent> {
        self.take_events()
    }
}
