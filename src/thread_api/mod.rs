//! Thin, synchronous-in-spirit facade over the Thread stack. This is the
//! trait seam through which the collector and action handlers reach the
//! NCP/RCP, the CoAP/DTLS stack, and the mDNS/SRP advertising proxy — all
//! out of scope here.
//!
//! Requests return as soon as they are accepted for sending; responses
//! arrive later as [`ThreadApiEvent`]s delivered back into the owning loop,
//! so submitting a diagnostic request returns immediately and the response
//! arrives later as a callback on the same loop.

pub mod mock;

use crate::domain::{Eui64, ExtAddress, Rloc16};
use crate::error::BorderRouterError;
use crate::ipv6::NetworkPrefixes;
use crate::tlv::{Tlv, TlvType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;

/// A router's basic identity, as returned by `GetRouterInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterInfo {
    /// The router's rloc16.
    pub rloc16: Rloc16,
    /// The router's extended address.
    pub ext_address: ExtAddress,
}

/// One entry of a router's child table (`QueryChildTable`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEntry {
    /// The child's rloc16.
    pub rloc16: Rloc16,
    /// The child's extended address.
    pub ext_address: ExtAddress,
    /// True if the child keeps its receiver on when idle (a candidate
    /// "FTD child" candidate for re-querying).
    pub rx_on_when_idle: bool,
    /// True if the child is a full Thread device (FTD).
    pub is_ftd: bool,
}

impl ChildEntry {
    /// True when the child is rx-on-when-idle and device-type FTD.
    #[must_use]
    pub fn is_ftd_full_time(&self) -> bool {
        self.rx_on_when_idle && self.is_ftd
    }
}

/// One entry of `QueryChildIp6Addrs`: the IPv6 addresses reported for one
/// child rloc16.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildIp6Entry {
    /// The child's rloc16.
    pub rloc16: Rloc16,
    /// The IPv6 addresses reported for that child.
    pub addrs: Vec<Ipv6Addr>,
}

/// One entry of `QueryRouterNeighbors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterNeighborEntry {
    /// The neighboring router's rloc16.
    pub rloc16: Rloc16,
    /// Average RSSI observed from that neighbor.
    pub average_rssi: i8,
}

/// Thread leader data, as exposed on `ThisDevice` node info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderData {
    /// Partition id of the current Thread partition.
    pub partition_id: u32,
    /// Thread network data version.
    pub data_version: u8,
}

/// One row of an energy scan report (`getEnergyScanTask`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyScanRow {
    /// The scanned channel.
    pub channel: u8,
    /// Maximum RSSI observed on that channel during the scan window.
    pub max_rssi: i8,
}

/// Node-level information used to populate `ThisDevice`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThisNodeInfo {
    /// Stable border-agent identifier.
    pub border_agent_id: String,
    /// Current border-agent connection state, as a short human label.
    pub border_agent_state: String,
    /// Current leader data.
    pub leader_data: LeaderData,
    /// Thread network name.
    pub network_name: String,
    /// This node's rloc16.
    pub rloc16: Rloc16,
    /// This node's rloc IPv6 address.
    pub rloc_address: Ipv6Addr,
    /// Count of routers currently in the Thread partition.
    pub router_count: u32,
}

/// Asynchronously delivered Thread-stack responses. Every variant that
/// concerns a unicast exchange carries the responding node's rloc16 so the
/// collector can match it against its current cycle's destination and
/// discard stale callbacks that arrive after the originating cycle was
/// cancelled.
#[derive(Debug, Clone, PartialEq)]
pub enum ThreadApiEvent {
    /// A Diagnostic Get response carrying decoded TLVs.
    DiagnosticGetResponse {
        /// The address the response came from.
        from: Ipv6Addr,
        /// Decoded TLVs carried in the response.
        tlvs: Vec<Tlv>,
    },
    /// A Diagnostic Get attempt failed to even get a response (parse error
    /// or no response at the transport layer); the caller's retry/timeout
    /// policy governs what happens next.
    DiagnosticGetFailed {
        /// The address that was targeted.
        to: Ipv6Addr,
    },
    /// One page of a `QueryChildTable` stream; `done` marks the final page.
    ChildTableResult {
        /// The router that was queried.
        router_rloc16: Rloc16,
        /// Entries in this page.
        entries: Vec<ChildEntry>,
        /// True if this is the final page of the stream.
        done: bool,
    },
    /// One page of a `QueryChildIp6Addrs` stream.
    ChildIp6Result {
        /// The router that was queried.
        router_rloc16: Rloc16,
        /// Entries in this page.
        entries: Vec<ChildIp6Entry>,
        /// True if this is the final page of the stream.
        done: bool,
    },
    /// One page of a `QueryRouterNeighbors` stream.
    RouterNeighborsResult {
        /// The router that was queried.
        router_rloc16: Rloc16,
        /// Entries in this page.
        entries: Vec<RouterNeighborEntry>,
        /// True if this is the final page of the stream.
        done: bool,
    },
    /// A fresh energy scan measurement row.
    EnergyScanRow(EnergyScanRow),
}

/// Synchronous-facade adapter over the Thread stack's diagnostic and
/// node-info APIs. All send methods return as soon as the
/// request is accepted by the transport; the eventual response is
/// delivered as a [`ThreadApiEvent`].
#[async_trait]
pub trait ThreadApi: Send + Sync {
    /// Sends a unicast Diagnostic Get for the given request-TLV types.
    ///
    /// # Errors
    ///
    /// Returns [`BorderRouterError::ResourceExhausted`] if no message
    /// buffers are available, or [`BorderRouterError::InvalidState`] if the
    /// transport cannot currently send.
    async fn send_diagnostic_get(
        &self,
        dest: Ipv6Addr,
        request_tlvs: &[TlvType],
    ) -> Result<(), BorderRouterError>;

    /// Sends a multicast Diagnostic Reset for the given counter TLV types.
    ///
    /// # Errors
    ///
    /// See [`ThreadApi::send_diagnostic_get`].
    async fn send_diagnostic_reset(
        &self,
        dest: Ipv6Addr,
        counter_tlvs: &[TlvType],
    ) -> Result<(), BorderRouterError>;

    /// Issues a `QueryChildTable` mesh-diag query against a router.
    ///
    /// # Errors
    ///
    /// Returns [`BorderRouterError::Busy`] if the sub-resource is already
    /// in use; the caller retries on the next tick.
    async fn query_child_table(&self, router_rloc16: Rloc16) -> Result<(), BorderRouterError>;

    /// Issues a `QueryChildIp6Addrs` mesh-diag query against a router.
    ///
    /// # Errors
    ///
    /// See [`ThreadApi::query_child_table`].
    async fn query_child_ip6_addrs(&self, router_rloc16: Rloc16) -> Result<(), BorderRouterError>;

    /// Issues a `QueryRouterNeighbors` mesh-diag query against a router.
    ///
    /// # Errors
    ///
    /// See [`ThreadApi::query_child_table`].
    async fn query_router_neighbors(&self, router_rloc16: Rloc16)
    -> Result<(), BorderRouterError>;

    /// Looks up a router's identity by router id (0..=62). Returns `None`
    /// if no router currently holds that id.
    fn get_router_info(&self, router_id: u8) -> Option<RouterInfo>;

    /// Returns this node's mesh-local and rloc prefixes.
    fn get_mesh_local_prefix(&self) -> NetworkPrefixes;

    /// Returns this node's own rloc16.
    fn get_rloc16(&self) -> Rloc16;

    /// Returns this node's own extended address.
    fn this_ext_address(&self) -> Eui64;

    /// Returns this node's full node info, for populating `ThisDevice`.
    fn this_node_info(&self) -> ThisNodeInfo;

    /// True iff `rloc16` appears as a route origin in the local Network
    /// Data (the `BorderRouter` service-role flag).
    fn is_border_router_origin(&self, rloc16: Rloc16) -> bool;

    /// Returns the local border-routing counters extension TLV value for
    /// this node, attached only to this node's own `NetworkDiagnostics`
    /// item.
    fn border_routing_counters(&self) -> serde_json::Value;

    /// SRP host lookup (`GetNextHost`): finds the hostname whose SRP host
    /// record address is the longest-prefix match among `addrs`.
    fn lookup_srp_hostname(&self, addrs: &[Ipv6Addr]) -> Option<String>;

    /// Starts an energy scan on the given channels; measurement rows
    /// stream back as [`ThreadApiEvent::EnergyScanRow`].
    ///
    /// # Errors
    ///
    /// Returns [`BorderRouterError::Busy`] if a scan is already active.
    async fn start_energy_scan(
        &self,
        dest: Ipv6Addr,
        channel_mask: &[u8],
        count: u32,
        period: u16,
        scan_duration: u16,
    ) -> Result<(), BorderRouterError>;

    /// Drains every [`ThreadApiEvent`] delivered since the last call
    /// (non-blocking). The owning loop calls this once per tick, before
    /// advancing the action queue, and dispatches each event to the
    /// collector or the active energy scan.
    fn poll_events(&self) -> Vec<ThreadApiEvent>;
}
