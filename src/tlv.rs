//! Network-diagnostic TLV types.
//!
//! The wire TLV codec itself is out of scope: the Thread stack's diagnostic
//! API hands us already-decoded values. This module only models the decoded
//! shape and the TLV-name vocabulary exposed to action requesters.

use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;

/// The diagnostic TLV type tags, in the wire order
/// the Thread network-diagnostic TLV type field uses (0..=31). Request-TLVs
/// are types 0..=28 excluding 29..=31; query-TLVs are exactly 29..=31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[non_exhaustive]
pub enum TlvType {
    /// `extAddress`
    ExtAddress = 0,
    /// `rloc16` (a.k.a. `ShortAddress`)
    ShortAddress = 1,
    /// `mode`
    Mode = 2,
    /// `timeout`
    Timeout = 3,
    /// `connectivity`
    Connectivity = 4,
    /// `route`
    Route = 5,
    /// `leaderData`
    LeaderData = 6,
    /// `networkData`
    NetworkData = 7,
    /// `ip6AddressList`
    Ip6AddrList = 8,
    /// `macCounters`
    MacCounters = 9,
    /// `batteryLevel`
    BatteryLevel = 14,
    /// `supplyVoltage`
    SupplyVoltage = 15,
    /// `childTable`
    ChildTable = 16,
    /// `channelPages`
    ChannelPages = 17,
    /// `maxChildTimeout`
    MaxChildTimeout = 19,
    /// `ldevid`
    LDevId = 25,
    /// `idev`
    IDevId = 26,
    /// `eui64`
    Eui64 = 23,
    /// `version`
    Version = 24,
    /// `vendorName`
    VendorName = 20,
    /// `vendorModel`
    VendorModel = 21,
    /// `vendorSwVersion`
    VendorSwVersion = 22,
    /// `threadStackVersion`
    ThreadStackVersion = 28,
    /// `children` — mesh-diag query, streamed
    Children = 29,
    /// `childrenIp6` — mesh-diag query, streamed
    ChildrenIp6 = 30,
    /// `neighbors` — mesh-diag query, streamed
    Neighbors = 31,
    /// `mleCounters`
    MleCounters = 32,
}

impl TlvType {
    /// True for the three mesh-diag query TLVs (29, 30, 31); false for the
    /// plain request TLVs that a single Diagnostic Get response carries.
    #[must_use]
    pub fn is_query(&self) -> bool {
        matches!(self, Self::Children | Self::ChildrenIp6 | Self::Neighbors)
    }

    /// Parses the case-sensitive TLV name vocabulary accepted in action requests.
    ///
    /// # Errors
    ///
    /// Returns the unrecognized name back so the caller can report it as an
    /// `InvalidArgs` error.
    pub fn parse_name(name: &str) -> Result<Self, String> {
        Ok(match name {
            "extAddress" => Self::ExtAddress,
            "rloc16" => Self::ShortAddress,
            "mode" => Self::Mode,
            "timeout" => Self::Timeout,
            "connectivity" => Self::Connectivity,
            "route" => Self::Route,
            "leaderData" => Self::LeaderData,
            "networkData" => Self::NetworkData,
            "ip6AddressList" => Self::Ip6AddrList,
            "macCounters" => Self::MacCounters,
            "batteryLevel" => Self::BatteryLevel,
            "supplyVoltage" => Self::SupplyVoltage,
            "childTable" => Self::ChildTable,
            "channelPages" => Self::ChannelPages,
            "maxChildTimeout" => Self::MaxChildTimeout,
            "ldevid" => Self::LDevId,
            "idev" => Self::IDevId,
            "eui64" => Self::Eui64,
            "version" => Self::Version,
            "vendorName" => Self::VendorName,
            "vendorModel" => Self::VendorModel,
            "vendorSwVersion" => Self::VendorSwVersion,
            "threadStackVersion" => Self::ThreadStackVersion,
            "children" => Self::Children,
            "childrenIp6" => Self::ChildrenIp6,
            "neighbors" => Self::Neighbors,
            "mleCounters" => Self::MleCounters,
            other => return Err(other.to_string()),
        })
    }
}

/// A single decoded network-diagnostic TLV value.
///
/// The value payload is intentionally loose (`serde_json::Value`) since the
/// wire codec is out of scope here; what the collector cares about is the
/// type tag (for merge-by-type and extraction of `ShortAddress`/`ExtAddress`
/// values) and, for a handful of well-known types, a typed accessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tlv {
    /// The TLV's type tag.
    pub tlv_type: TlvType,
    /// The decoded value, shaped per `tlv_type`.
    pub value: TlvValue,
}

/// Decoded TLV payloads for the type tags the collector inspects directly;
/// everything else round-trips as an opaque JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum TlvValue {
    /// `ExtAddress` TLV payload.
    ExtAddress(crate::domain::ExtAddress),
    /// `ShortAddress` (rloc16) TLV payload.
    ShortAddress(crate::domain::Rloc16),
    /// `Eui64` TLV payload.
    Eui64(crate::domain::Eui64),
    /// `Ip6AddrList` TLV payload.
    Ip6AddrList(Vec<Ipv6Addr>),
    /// Any other TLV, carried as opaque JSON.
    Opaque(serde_json::Value),
}

impl Tlv {
    /// Convenience constructor for an `ExtAddress` TLV.
    #[must_use]
    pub fn ext_address(addr: crate::domain::ExtAddress) -> Self {
        Self {
            tlv_type: TlvType::ExtAddress,
            value: TlvValue::ExtAddress(addr),
        }
    }

    /// Convenience constructor for a `ShortAddress` TLV.
    #[must_use]
    pub fn short_address(rloc: crate::domain::Rloc16) -> Self {
        Self {
            tlv_type: TlvType::ShortAddress,
            value: TlvValue::ShortAddress(rloc),
        }
    }

    /// Convenience constructor for an `Eui64` TLV.
    #[must_use]
    pub fn eui64(addr: crate::domain::Eui64) -> Self {
        Self {
            tlv_type: TlvType::Eui64,
            value: TlvValue::Eui64(addr),
        }
    }

    /// Convenience constructor for an `Ip6AddrList` TLV.
    #[must_use]
    pub fn ip6_addr_list(addrs: Vec<Ipv6Addr>) -> Self {
        Self {
            tlv_type: TlvType::Ip6AddrList,
            value: TlvValue::Ip6AddrList(addrs),
        }
    }

    /// Extracts the rloc16 from a `ShortAddress` TLV, if this is one.
    #[must_use]
    pub fn as_short_address(&self) -> Option<crate::domain::Rloc16> {
        match &self.value {
            TlvValue::ShortAddress(r) => Some(*r),
            _ => None,
        }
    }

    /// Extracts the ext address from an `ExtAddress` TLV, if this is one.
    #[must_use]
    pub fn as_ext_address(&self) -> Option<crate::domain::ExtAddress> {
        match &self.value {
            TlvValue::ExtAddress(a) => Some(*a),
            _ => None,
        }
    }

    /// Extracts the ipv6 list from an `Ip6AddrList` TLV, if this is one.
    #[must_use]
    pub fn as_ip6_addr_list(&self) -> Option<&[Ipv6Addr]> {
        match &self.value {
            TlvValue::Ip6AddrList(addrs) => Some(addrs),
            _ => None,
        }
    }
}

/// Merges `incoming` into `existing` the way a diagnostic update folds a
/// fresh response into an item's stored TLVs: for
/// every TLV type present in `incoming`, the incoming value replaces any
/// existing value of the same type (last-writer-wins); TLVs only present in
/// `existing` are retained; TLVs only present in `incoming` are appended.
/// Preserves the invariant that at most one TLV per type is present.
pub fn merge_tlvs(existing: &mut Vec<Tlv>, incoming: Vec<Tlv>) {
    for new_tlv in incoming {
        if let Some(slot) = existing
            .iter_mut()
            .find(|t| t.tlv_type == new_tlv.tlv_type)
        {
            *slot = new_tlv;
        } else {
            existing.push(new_tlv);
        }
    }
}
