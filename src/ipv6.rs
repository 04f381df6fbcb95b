//! IPv6 classification of reported node addresses, and destination-string
//! resolution for unicast diagnostic requests.

use crate::domain::{ExtAddress, Rloc16};
use std::net::Ipv6Addr;

/// The node's mesh-local prefix (the high 64 bits of its mesh-local EID
/// space) plus its RLOC prefix (mesh-local prefix with the IID's `0000:00ff:
/// fe00:xxxx` RLOC pattern implied), as learned from the Thread stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkPrefixes {
    /// High 64 bits of the mesh-local prefix.
    pub mesh_local_prefix: [u8; 8],
}

impl NetworkPrefixes {
    /// Builds the full mesh-local IPv6 address for a 64-bit IID.
    #[must_use]
    pub fn mleid(&self, iid: ExtAddress) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets[..8].copy_from_slice(&self.mesh_local_prefix);
        octets[8..].copy_from_slice(&iid.0);
        Ipv6Addr::from(octets)
    }

    /// Builds the RLOC IPv6 address for a given rloc16:
    /// `mesh_local_prefix ‖ 0000:00ff:fe00 ‖ rloc16`.
    #[must_use]
    pub fn rloc_address(&self, rloc16: Rloc16) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets[..8].copy_from_slice(&self.mesh_local_prefix);
        octets[8..14].copy_from_slice(&[0x00, 0x00, 0x00, 0xff, 0xfe, 0x00]);
        octets[14..16].copy_from_slice(&rloc16.into_inner().to_be_bytes());
        Ipv6Addr::from(octets)
    }

    /// True if `addr`'s first 64 bits equal this node's mesh-local prefix.
    #[must_use]
    pub fn is_mesh_local(&self, addr: &Ipv6Addr) -> bool {
        addr.octets()[..8] == self.mesh_local_prefix
    }
}

/// A resolved destination: a concrete IPv6 address, plus (for the
/// mlEid-or-device-id case) the original 16-hex-char identifier, used by
/// callers to prime the device-collection lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDestination {
    /// The address to send the unicast diagnostic request to.
    pub address: Ipv6Addr,
}

/// Error resolving a `destination` string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DestinationError {
    /// Neither empty, 16 hex chars, nor 4 hex chars.
    #[error("destination has invalid length {0}; expected 0, 4, or 16 hex characters")]
    InvalidLength(usize),
    /// The 4- or 16-char string contained non-hex characters.
    #[error("destination is not valid hex")]
    InvalidHex,
}

/// Resolves a `destination` string. `lookup_device_mleid`
/// is consulted when `destination` is 16 hex chars and names an existing
/// device item rather than being used directly as a literal MLEID-IID.
///
/// Returns `Ok(None)` for the empty string (discovery mode has no single
/// destination).
pub fn resolve_destination(
    destination: &str,
    prefixes: &NetworkPrefixes,
    lookup_device_mleid: impl FnOnce(&str) -> Option<ExtAddress>,
) -> Result<Option<ResolvedDestination>, DestinationError> {
    match destination.len() {
        0 => Ok(None),
        16 => {
            let iid = if let Some(learned) = lookup_device_mleid(destination) {
                learned
            } else {
                ExtAddress::parse_hex(destination).map_err(|_| DestinationError::InvalidHex)?
            };
            Ok(Some(ResolvedDestination {
                address: prefixes.mleid(iid),
            }))
        }
        4 => {
            let rloc = Rloc16::parse_hex4(destination).map_err(|_| DestinationError::InvalidHex)?;
            Ok(Some(ResolvedDestination {
                address: prefixes.rloc_address(rloc),
            }))
        }
        other => Err(DestinationError::InvalidLength(other)),
    }
}

/// The classification of one reported address within a node's
/// `Ip6AddrList`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedAddrs {
    /// The 64-bit IID of the mesh-local address, if one was present.
    pub mleid_iid: Option<ExtAddress>,
    /// The last non-link-local, non-multicast, non-RLOC/ALOC address seen
    /// (last one wins when more than one is reported).
    pub omr: Option<Ipv6Addr>,
}

/// True for an RLOC/ALOC-shaped address: bytes `[8..14] == 00 00 00 FF FE 00`.
#[must_use]
pub fn is_rloc_or_aloc(addr: &Ipv6Addr) -> bool {
    addr.octets()[8..14] == [0x00, 0x00, 0x00, 0xff, 0xfe, 0x00]
}

/// True for `fe80::/10` link-local addresses.
#[must_use]
pub fn is_link_local(addr: &Ipv6Addr) -> bool {
    let o = addr.octets();
    o[0] == 0xfe && (o[1] & 0xc0) == 0x80
}

/// True for `ff00::/8` through `ff0f::/8` multicast addresses, i.e. the
/// high byte is `0xff` (the full multicast range).
#[must_use]
pub fn is_multicast_in_range(addr: &Ipv6Addr) -> bool {
    addr.octets()[0] == 0xff
}

/// Classifies a list of addresses reported for one node.
#[must_use]
pub fn classify_addrs(addrs: &[Ipv6Addr], prefixes: &NetworkPrefixes) -> ClassifiedAddrs {
    let mut out = ClassifiedAddrs::default();
    for addr in addrs {
        if is_rloc_or_aloc(addr) {
            continue;
        }
        if prefixes.is_mesh_local(addr) {
            let mut iid = [0u8; 8];
            iid.copy_from_slice(&addr.octets()[8..]);
            out.mleid_iid = Some(ExtAddress(iid));
            continue;
        }
        if is_link_local(addr) || is_multicast_in_range(addr) {
            continue;
        }
        out.omr = Some(*addr);
    }
    out
}

/// Service-role flags derived from a node's ALOC addresses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRoleFlags {
    /// `aloc16 == 0xfc00`
    pub leader: bool,
    /// `aloc16 == 0xfc38`
    pub primary_bbr: bool,
    /// `aloc16 ∈ [0xfc10, 0xfc2f]`
    pub hosts_service: bool,
}

/// Scans `addrs` for ALOC-form addresses (`fd<mesh-local>::0:00ff:fe00:
/// <aloc16>`) and derives service-role flags. `is_border_router` is passed
/// in separately since it depends on whether the node's rloc16 appears as a
/// route origin in the local Network Data, not on its reported addresses.
#[must_use]
pub fn service_role_flags(addrs: &[Ipv6Addr], prefixes: &NetworkPrefixes) -> ServiceRoleFlags {
    let mut flags = ServiceRoleFlags::default();
    for addr in addrs {
        if !prefixes.is_mesh_local(addr) || !is_rloc_or_aloc(addr) {
            continue;
        }
        let aloc16 = u16::from_be_bytes([addr.octets()[14], addr.octets()[15]]);
        match aloc16 {
            0xfc00 => flags.leader = true,
            0xfc38 => flags.primary_bbr = true,
            0xfc10..=0xfc2f => flags.hosts_service = true,
            _ => {}
        }
    }
    flags
}
