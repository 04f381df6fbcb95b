//! Device collection item payloads.

use super::item::{CollectionItem, ItemMeta};
use crate::domain::{Eui64, ExtAddress, MlEidIid, Rloc16};
use serde_json::{Map, Value, json};
use std::net::Ipv6Addr;

/// A device's role within the mesh, as derived from its `ShortAddress` TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    /// Role not yet learned.
    Unknown,
    /// Low 9 bits of the rloc16 are nonzero.
    Child,
    /// Low 9 bits of the rloc16 are zero.
    Router,
}

impl DeviceRole {
    /// The role implied by a rloc16's low 9 bits.
    #[must_use]
    pub fn from_rloc16(rloc16: Rloc16) -> Self {
        if rloc16.is_child() {
            Self::Child
        } else {
            Self::Router
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Child => "child",
            Self::Router => "router",
        }
    }
}

/// Node-level info attached only to this node's own `ThisDevice` item.
#[derive(Debug, Clone, PartialEq)]
pub struct ThisDeviceInfo {
    /// Stable border-agent identifier.
    pub border_agent_id: String,
    /// Current border-agent connection state, as a short human label.
    pub border_agent_state: String,
    /// Current partition id.
    pub leader_partition_id: u32,
    /// Current network data version.
    pub leader_data_version: u8,
    /// Thread network name.
    pub network_name: String,
    /// This node's rloc16.
    pub rloc16: Rloc16,
    /// This node's rloc IPv6 address.
    pub rloc_address: Ipv6Addr,
    /// Count of routers currently in the partition.
    pub router_count: u32,
}

/// The shared fields of every device-collection item, common to plain
/// devices, children, and `ThisDevice`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFields {
    /// The device's extended address; also the collection key.
    pub ext_address: ExtAddress,
    /// `"child"`, `"router"`, or `""` if not yet learned.
    pub role: DeviceRole,
    /// The 64-bit IID of the device's mesh-local EID; zero until learned.
    pub ml_eid_iid: MlEidIid,
    /// The device's IEEE EUI-64; zero until learned.
    pub eui64: Eui64,
    /// The device's off-mesh-routable global IPv6 address, if reported.
    pub omr_ipv6: Option<Ipv6Addr>,
    /// The device's SRP-registered hostname, if one was found.
    pub hostname: Option<String>,
    /// `rx_on_when_idle` MLE mode flag.
    pub rx_on_when_idle: bool,
    /// `is_ftd` (full Thread device) MLE mode flag.
    pub is_ftd: bool,
    /// Forces `needs_update` to `false` regardless of the three-field
    /// check, the way a router's mode flags are always treated as
    /// settled once observed.
    pub needs_update_forced_false: bool,
}

impl DeviceFields {
    /// A freshly discovered device with nothing learned yet: zeroed
    /// identifiers, empty role, `needs_update = true`.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            ext_address: ExtAddress::ZERO,
            role: DeviceRole::Unknown,
            ml_eid_iid: ExtAddress::ZERO,
            eui64: ExtAddress::ZERO,
            omr_ipv6: None,
            hostname: None,
            rx_on_when_idle: false,
            is_ftd: false,
            needs_update_forced_false: false,
        }
    }

    /// `needs_update` is true whenever any of `ml_eid_iid`, `eui64`,
    /// `omr_ipv6` is zero/absent, unless a
    /// router has explicitly forced it false.
    #[must_use]
    pub fn needs_update(&self) -> bool {
        if self.needs_update_forced_false {
            return false;
        }
        self.ml_eid_iid.is_zero() || self.eui64.is_zero() || self.omr_ipv6.is_none()
    }

    /// Upserts the non-empty fields of `update` onto `self`: only fields
    /// that are non-empty on `update` overwrite the corresponding field
    /// on `self`.
    pub fn merge_non_empty(&mut self, update: &Self) {
        if !update.ext_address.is_zero() {
            self.ext_address = update.ext_address;
        }
        if !matches!(update.role, DeviceRole::Unknown) {
            self.role = update.role;
        }
        if !update.ml_eid_iid.is_zero() {
            self.ml_eid_iid = update.ml_eid_iid;
        }
        if !update.eui64.is_zero() {
            self.eui64 = update.eui64;
        }
        if update.omr_ipv6.is_some() {
            self.omr_ipv6 = update.omr_ipv6;
        }
        if update.hostname.is_some() {
            self.hostname.clone_from(&update.hostname);
        }
        if update.rx_on_when_idle {
            self.rx_on_when_idle = true;
        }
        if update.is_ftd {
            self.is_ftd = true;
        }
        if update.needs_update_forced_false {
            self.needs_update_forced_false = true;
        }
    }

    fn write_attributes(&self, attrs: &mut Map<String, Value>) {
        attrs.insert("extAddress".to_string(), json!(self.ext_address.to_hex()));
        attrs.insert("role".to_string(), json!(self.role.as_str()));
        attrs.insert("mlEidIid".to_string(), json!(self.ml_eid_iid.to_hex()));
        attrs.insert("eui64".to_string(), json!(self.eui64.to_hex()));
        attrs.insert(
            "omrIpv6".to_string(),
            self.omr_ipv6.map_or(Value::Null, |a| json!(a.to_string())),
        );
        attrs.insert(
            "hostname".to_string(),
            self.hostname.clone().map_or(Value::Null, Value::String),
        );
        attrs.insert("rxOnWhenIdle".to_string(), json!(self.rx_on_when_idle));
        attrs.insert("isFtd".to_string(), json!(self.is_ftd));
        attrs.insert("needsUpdate".to_string(), json!(self.needs_update()));
    }
}

/// Either an ordinary device/child item, or this node's own `ThisDevice`
/// item.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceItem {
    /// A remote device discovered via diagnostics or discovery.
    Device {
        /// Shared envelope (uuid, timestamps).
        meta: ItemMeta,
        /// Device-specific fields.
        fields: DeviceFields,
    },
    /// This node's own entry, carrying additional node-level info.
    ThisDevice {
        /// Shared envelope.
        meta: ItemMeta,
        /// Device-specific fields.
        fields: DeviceFields,
        /// Node-level info attached only to this subtype.
        info: ThisDeviceInfo,
    },
}

impl DeviceItem {
    /// Builds a plain device item.
    #[must_use]
    pub fn new(meta: ItemMeta, fields: DeviceFields) -> Self {
        Self::Device { meta, fields }
    }

    /// Builds a `ThisDevice` item.
    #[must_use]
    pub fn new_this_device(meta: ItemMeta, fields: DeviceFields, info: ThisDeviceInfo) -> Self {
        Self::ThisDevice { meta, fields, info }
    }

    /// Borrows the shared device fields regardless of subtype.
    #[must_use]
    pub fn fields(&self) -> &DeviceFields {
        match self {
            Self::Device { fields, .. } | Self::ThisDevice { fields, .. } => fields,
        }
    }

    /// Mutably borrows the shared device fields regardless of subtype.
    pub fn fields_mut(&mut self) -> &mut DeviceFields {
        match self {
            Self::Device { fields, .. } | Self::ThisDevice { fields, .. } => fields,
        }
    }
}

impl CollectionItem for DeviceItem {
    fn item_id(&self) -> String {
        self.fields().ext_address.to_hex()
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Device { .. } => "device",
            Self::ThisDevice { .. } => "thisDevice",
        }
    }

    fn meta(&self) -> &ItemMeta {
        match self {
            Self::Device { meta, .. } | Self::ThisDevice { meta, .. } => meta,
        }
    }

    fn meta_mut(&mut self) -> &mut ItemMeta {
        match self {
            Self::Device { meta, .. } | Self::ThisDevice { meta, .. } => meta,
        }
    }

    fn own_attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        self.fields().write_attributes(&mut attrs);
        if let Self::ThisDevice { info, .. } = self {
            attrs.insert(
                "borderAgentId".to_string(),
                json!(info.border_agent_id),
            );
            attrs.insert(
                "borderAgentState".to_string(),
                json!(info.border_agent_state),
            );
            attrs.insert(
                "leaderData".to_string(),
                json!({
                    "partitionId": info.leader_partition_id,
                    "dataVersion": info.leader_data_version,
                }),
            );
            attrs.insert("networkName".to_string(), json!(info.network_name));
            attrs.insert("rloc16".to_string(), json!(info.rloc16.to_hex4()));
            attrs.insert(
                "rlocAddress".to_string(),
                json!(info.rloc_address.to_string()),
            );
            attrs.insert("routerCount".to_string(), json!(info.router_count));
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::now;

    fn fields_with_addr(addr: ExtAddress) -> DeviceFields {
        let mut f = DeviceFields::empty();
        f.ext_address = addr;
        f
    }

    #[test]
    fn needs_update_true_until_all_three_fields_learned() {
        let mut f = DeviceFields::empty();
        assert!(f.needs_update());
        f.ml_eid_iid = ExtAddress([1; 8]);
        f.eui64 = ExtAddress([2; 8]);
        assert!(f.needs_update(), "omr_ipv6 still missing");
        f.omr_ipv6 = Some("2001:db8::1".parse().unwrap());
        assert!(!f.needs_update());
    }

    #[test]
    fn merge_non_empty_preserves_existing_when_update_is_empty() {
        let mut existing = fields_with_addr(ExtAddress([1; 8]));
        existing.hostname = Some("existing-host".to_string());
        let update = DeviceFields::empty();
        existing.merge_non_empty(&update);
        assert_eq!(existing.hostname, Some("existing-host".to_string()));
    }

    #[test]
    fn item_id_is_ext_address_hex() {
        let item = DeviceItem::new(ItemMeta::new(now()), fields_with_addr(ExtAddress([0xaa; 8])));
        assert_eq!(item.item_id(), "aaaaaaaaaaaaaaaa");
    }
}
