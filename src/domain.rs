//! Domain newtypes shared across the collector, collections, and action queue.
//!
//! Bounded and identifier values are modeled as `nutype` newtypes rather than
//! raw primitives, following the same pattern the rest of this codebase uses
//! for its domain values.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an [`crate::actions::Action`].
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct ActionId(Uuid);

impl ActionId {
    /// Generates a fresh random action id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for a collection item that is not keyed by a stable
/// domain id (diagnostics items; device items use [`ExtAddress`] instead).
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct ItemUuid(Uuid);

impl ItemUuid {
    /// Generates a fresh random item id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// A Thread routing locator. The low 9 bits identify a child when nonzero;
/// a router id occupies bits 15..10 (`router_id << 10`).
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct Rloc16(u16);

impl Rloc16 {
    /// Maximum router id assignable by the Thread network.
    pub const MAX_ROUTER_ID: u8 = 62;

    /// Builds the rloc16 for a router id, per `router_id << 10`.
    #[must_use]
    pub fn for_router_id(router_id: u8) -> Self {
        Self::new(u16::from(router_id) << 10)
    }

    /// True if the low 9 bits are nonzero, i.e. this rloc addresses a child.
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.into_inner() & 0x01ff != 0
    }

    /// The router id this rloc belongs to (its own router id if it is a
    /// router rloc, or its parent router's id if it is a child rloc).
    #[must_use]
    pub fn router_id(&self) -> u8 {
        (self.into_inner() >> 10) as u8
    }

    /// Parses a 4-hex-character rloc16, as accepted in destination strings.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not exactly 4 hex characters.
    pub fn parse_hex4(s: &str) -> Result<Self, std::num::ParseIntError> {
        u16::from_str_radix(s, 16).map(Self::new)
    }

    /// Renders as 4 lowercase hex characters.
    #[must_use]
    pub fn to_hex4(&self) -> String {
        format!("{:04x}", self.into_inner())
    }
}

/// An 8-byte extended (IEEE EUI-64-like) MAC address, used as the stable
/// device-collection item id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtAddress(pub [u8; 8]);

impl ExtAddress {
    /// The all-zero sentinel used before a device's ext address is learned.
    pub const ZERO: Self = Self([0u8; 8]);

    /// True if every byte is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 8]
    }

    /// Lowercase 16-hex-character rendering, used as the device item id.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a 16-hex-character ext address.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not exactly 16 hex characters.
    pub fn parse_hex(s: &str) -> Result<Self, ExtAddressParseError> {
        if s.len() != 16 {
            return Err(ExtAddressParseError::WrongLength(s.len()));
        }
        let bytes = hex::decode(s).map_err(ExtAddressParseError::InvalidHex)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Display for ExtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Error parsing a 16-hex-character `ExtAddress`/EUI-64/MLEID-IID string.
#[derive(Debug, thiserror::Error)]
pub enum ExtAddressParseError {
    /// The string was not exactly 16 characters long.
    #[error("expected 16 hex characters, got {0}")]
    WrongLength(usize),
    /// The string contained non-hex characters.
    #[error("invalid hex: {0}")]
    InvalidHex(hex::FromHexError),
}

/// The 64-bit interface identifier of a device's mesh-local EID.
pub type MlEidIid = ExtAddress;

/// An 8-byte IEEE EUI-64.
pub type Eui64 = ExtAddress;

/// Timeout for one collector cycle, clamped to `[10_000, 100_000]` ms:
/// `configure()` clamps out-of-range inputs rather than rejecting them.
#[nutype(
    validate(greater_or_equal = 10_000, less_or_equal = 100_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)
)]
pub struct CollectorTimeoutMs(u64);

impl CollectorTimeoutMs {
    /// Clamps an arbitrary millisecond value into the valid range.
    #[must_use]
    pub fn clamp(ms: u64) -> Self {
        Self::try_new(ms.clamp(10_000, 100_000)).expect("clamp stays in range")
    }
}

/// Freshness bound for collector results, clamped to `[30_000, 300_000]` ms.
#[nutype(
    validate(greater_or_equal = 30_000, less_or_equal = 300_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)
)]
pub struct CollectorMaxAgeMs(u64);

impl CollectorMaxAgeMs {
    /// Clamps an arbitrary millisecond value into the valid range.
    #[must_use]
    pub fn clamp(ms: u64) -> Self {
        Self::try_new(ms.clamp(30_000, 300_000)).expect("clamp stays in range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rloc16_child_vs_router() {
        let router = Rloc16::for_router_id(2);
        assert!(!router.is_child());
        let child = Rloc16::new(router.into_inner() | 0x0001);
        assert!(child.is_child());
        assert_eq!(child.router_id(), 2);
    }

    #[test]
    fn ext_address_round_trips_through_hex() {
        let addr = ExtAddress([0xaa; 8]);
        assert_eq!(addr.to_hex(), "aaaaaaaaaaaaaaaa");
        assert_eq!(ExtAddress::parse_hex("aaaaaaaaaaaaaaaa").unwrap(), addr);
    }

    #[test]
    fn ext_address_rejects_wrong_length() {
        assert!(matches!(
            ExtAddress::parse_hex("aabb"),
            Err(ExtAddressParseError::WrongLength(4))
        ));
    }

    #[test]
    fn timeout_clamps_into_range() {
        assert_eq!(CollectorTimeoutMs::clamp(0).into_inner(), 10_000);
        assert_eq!(CollectorTimeoutMs::clamp(1_000_000).into_inner(), 100_000);
        assert_eq!(CollectorTimeoutMs::clamp(50_000).into_inner(), 50_000);
    }
}
