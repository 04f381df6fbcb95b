//! Diagnostic collection item payloads.

use super::item::{CollectionItem, ItemMeta};
use crate::domain::{ItemUuid, Rloc16};
use crate::ipv6::ServiceRoleFlags;
use crate::thread_api::{ChildEntry, ChildIp6Entry, EnergyScanRow, RouterNeighborEntry};
use crate::tlv::Tlv;
use serde_json::{Map, Value, json};

fn tlvs_to_json(tlvs: &[Tlv]) -> Value {
    json!(
        tlvs.iter()
            .map(|t| serde_json::to_value(t).unwrap_or(Value::Null))
            .collect::<Vec<_>>()
    )
}

/// One router's network-diagnostic response, plus the mesh-diag query
/// results attached for router rlocs.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkDiagnosticsItem {
    /// Shared envelope.
    pub meta: ItemMeta,
    /// The responding node's rloc16.
    pub rloc16: Rloc16,
    /// The raw response TLVs, plus any extension TLVs (service-role flags,
    /// border-routing counters) the collector appended.
    pub tlvs: Vec<Tlv>,
    /// Child-table entries, attached only for a responding router.
    pub children: Vec<ChildEntry>,
    /// Child-ipv6 entries, attached only for a responding router.
    pub children_ip6: Vec<ChildIp6Entry>,
    /// Router-neighbor entries, attached only for a responding router.
    pub neighbors: Vec<RouterNeighborEntry>,
    /// Service-role flags derived from the node's `Ip6AddrList`.
    pub service_roles: ServiceRoleFlags,
    /// True iff this node's rloc16 is a route origin in the local Network
    /// Data.
    pub is_border_router: bool,
    /// Local border-routing counters, attached only to this node's own
    /// item.
    pub border_routing_counters: Option<Value>,
}

/// One energy-scan report.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyScanReportItem {
    /// Shared envelope.
    pub meta: ItemMeta,
    /// Per-channel measurement rows collected so far.
    pub rows: Vec<EnergyScanRow>,
}

/// Either subtype of diagnostic-collection item.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticItem {
    /// A network-diagnostic response.
    NetworkDiagnostics(NetworkDiagnosticsItem),
    /// An energy-scan report.
    EnergyScanReport(EnergyScanReportItem),
}

impl DiagnosticItem {
    fn meta_ref(&self) -> &ItemMeta {
        match self {
            Self::NetworkDiagnostics(item) => &item.meta,
            Self::EnergyScanReport(item) => &item.meta,
        }
    }

    fn meta_mut_ref(&mut self) -> &mut ItemMeta {
        match self {
            Self::NetworkDiagnostics(item) => &mut item.meta,
            Self::EnergyScanReport(item) => &mut item.meta,
        }
    }

    /// The item's own uuid (also its collection key).
    #[must_use]
    pub fn uuid(&self) -> ItemUuid {
        self.meta_ref().uuid
    }
}

impl CollectionItem for DiagnosticItem {
    fn item_id(&self) -> String {
        self.meta_ref().uuid.to_string()
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::NetworkDiagnostics(_) => "networkDiagnostics",
            Self::EnergyScanReport(_) => "energyScanReport",
        }
    }

    fn meta(&self) -> &ItemMeta {
        self.meta_ref()
    }

    fn meta_mut(&mut self) -> &mut ItemMeta {
        self.meta_mut_ref()
    }

    fn own_attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        match self {
            Self::NetworkDiagnostics(item) => {
                attrs.insert("rloc16".to_string(), json!(item.rloc16.to_hex4()));
                attrs.insert("tlvs".to_string(), tlvs_to_json(&item.tlvs));
                if !item.children.is_empty() {
                    attrs.insert(
                        "children".to_string(),
                        json!(
                            item.children
                                .iter()
                                .map(|c| json!({
                                    "rloc16": c.rloc16.to_hex4(),
                                    "extAddress": c.ext_address.to_hex(),
                                    "rxOnWhenIdle": c.rx_on_when_idle,
                                    "isFtd": c.is_ftd,
                                }))
                                .collect::<Vec<_>>()
                        ),
                    );
                }
                if !item.children_ip6.is_empty() {
                    attrs.insert(
                        "childrenIp6".to_string(),
                        json!(
                            item.children_ip6
                                .iter()
                                .map(|c| json!({
                                    "rloc16": c.rloc16.to_hex4(),
                                    "addrs": c.addrs.iter().map(ToString::to_string).collect::<Vec<_>>(),
                                }))
                                .collect::<Vec<_>>()
                        ),
                    );
                }
                if !item.neighbors.is_empty() {
                    attrs.insert(
                        "neighbors".to_string(),
                        json!(
                            item.neighbors
                                .iter()
                                .map(|n| json!({
                                    "rloc16": n.rloc16.to_hex4(),
                                    "averageRssi": n.average_rssi,
                                }))
                                .collect::<Vec<_>>()
                        ),
                    );
                }
                attrs.insert(
                    "serviceRoles".to_string(),
                    json!({
                        "leader": item.service_roles.leader,
                        "primaryBbr": item.service_roles.primary_bbr,
                        "hostsService": item.service_roles.hosts_service,
                        "borderRouter": item.is_border_router,
                    }),
                );
                if let Some(counters) = &item.border_routing_counters {
                    attrs.insert("borderRoutingCounters".to_string(), counters.clone());
                }
            }
            Self::EnergyScanReport(item) => {
                attrs.insert(
                    "rows".to_string(),
                    json!(
                        item.rows
                            .iter()
                            .map(|r| json!({ "channel": r.channel, "maxRssi": r.max_rssi }))
                            .collect::<Vec<_>>()
                    ),
                );
            }
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::now;

    #[test]
    fn item_id_is_meta_uuid() {
        let meta = ItemMeta::new(now());
        let expected = meta.uuid.to_string();
        let item = DiagnosticItem::NetworkDiagnostics(NetworkDiagnosticsItem {
            meta,
            rloc16: Rloc16::new(0x0800),
            tlvs: vec![],
            children: vec![],
            children_ip6: vec![],
            neighbors: vec![],
            service_roles: ServiceRoleFlags::default(),
            is_border_router: false,
            border_routing_counters: None,
        });
        assert_eq!(item.item_id(), expected);
    }

    #[test]
    fn energy_scan_report_type_name() {
        let item = DiagnosticItem::EnergyScanReport(EnergyScanReportItem {
            meta: ItemMeta::new(now()),
            rows: vec![EnergyScanRow {
                channel: 11,
                max_rssi: -80,
            }],
        });
        assert_eq!(item.type_name(), "energyScanReport");
    }
}
