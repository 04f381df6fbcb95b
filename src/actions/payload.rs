//! Per-type action attribute schemas, parsing, and validation.

use crate::error::BorderRouterError;
use crate::tlv::TlvType;
use serde_json::{Map, Value, json};

/// `addThreadDeviceTask` attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct AddThreadDeviceAttrs {
    /// 16-hex-char EUI-64 of the joiner.
    pub eui: String,
    /// Joiner PSK-d.
    pub pskd: String,
    /// Caller-requested timeout, in milliseconds.
    pub timeout_ms: u64,
}

/// `getNetworkDiagnosticTask` attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct GetNetworkDiagnosticAttrs {
    /// `""`, a 16-hex device id/MLEID-IID, or a 4-hex rloc16.
    pub destination: String,
    /// Parsed, validated TLV-name list.
    pub types: Vec<TlvType>,
    /// Caller-requested timeout, in milliseconds.
    pub timeout_ms: u64,
}

/// `resetNetworkDiagCounterTask` attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetNetworkDiagCounterAttrs {
    /// Counter TLV types to reset (`macCounter`/`mleCounter`).
    pub types: Vec<TlvType>,
    /// Caller-requested timeout, in milliseconds.
    pub timeout_ms: u64,
}

/// `getEnergyScanTask` attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct GetEnergyScanAttrs {
    /// Destination identifier (16-hex device id or MLEID-IID).
    pub destination: String,
    /// Channels to scan, each in `11..=26`.
    pub channel_mask: Vec<u8>,
    /// Number of per-channel measurement rows requested.
    pub count: u32,
    /// Scan period, in milliseconds.
    pub period: u16,
    /// Per-channel scan duration, in milliseconds.
    pub scan_duration: u16,
    /// Caller-requested timeout, in milliseconds.
    pub timeout_ms: u64,
}

/// A validated action payload, one variant per accepted action type,
/// modeled as a closed tagged enum with a per-variant handler rather
/// than a dynamic dispatch table, since the type set is fixed.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    /// `addThreadDeviceTask`.
    AddThreadDevice(AddThreadDeviceAttrs),
    /// `getNetworkDiagnosticTask`.
    GetNetworkDiagnostic(GetNetworkDiagnosticAttrs),
    /// `resetNetworkDiagCounterTask`.
    ResetNetworkDiagCounter(ResetNetworkDiagCounterAttrs),
    /// `getEnergyScanTask`.
    GetEnergyScan(GetEnergyScanAttrs),
}

impl ActionPayload {
    /// The action type name as accepted over the wire.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::AddThreadDevice(_) => "addThreadDeviceTask",
            Self::GetNetworkDiagnostic(_) => "getNetworkDiagnosticTask",
            Self::ResetNetworkDiagCounter(_) => "resetNetworkDiagCounterTask",
            Self::GetEnergyScan(_) => "getEnergyScanTask",
        }
    }

    /// The caller-requested timeout for this action, in milliseconds.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        match self {
            Self::AddThreadDevice(a) => a.timeout_ms,
            Self::GetNetworkDiagnostic(a) => a.timeout_ms,
            Self::ResetNetworkDiagCounter(a) => a.timeout_ms,
            Self::GetEnergyScan(a) => a.timeout_ms,
        }
    }

    /// Re-renders the validated attributes back to their json:api shape,
    /// for `GET /api/actions` responses.
    #[must_use]
    pub fn attributes_json(&self) -> Map<String, Value> {
        let value = match self {
            Self::AddThreadDevice(a) => json!({
                "eui": a.eui,
                "pskd": a.pskd,
                "timeout": a.timeout_ms,
            }),
            Self::GetNetworkDiagnostic(a) => json!({
                "destination": a.destination,
                "types": a.types.iter().map(tlv_name).collect::<Vec<_>>(),
                "timeout": a.timeout_ms,
            }),
            Self::ResetNetworkDiagCounter(a) => json!({
                "types": a.types.iter().map(reset_counter_name).collect::<Vec<_>>(),
                "timeout": a.timeout_ms,
            }),
            Self::GetEnergyScan(a) => json!({
                "destination": a.destination,
                "channelMask": a.channel_mask,
                "count": a.count,
                "period": a.period,
                "scanDuration": a.scan_duration,
                "timeout": a.timeout_ms,
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Parses and validates a `{type, attributes}` submission entry.
    ///
    /// # Errors
    ///
    /// Returns [`BorderRouterError::InvalidArgs`] if `type_name` is
    /// unrecognized or `attributes` fails type-specific validation.
    pub fn parse(type_name: &str, attributes: &Value) -> Result<Self, BorderRouterError> {
        let Value::Object(attrs) = attributes else {
            return Err(BorderRouterError::InvalidArgs(
                "attributes must be an object".to_string(),
            ));
        };
        match type_name {
            "addThreadDeviceTask" => parse_add_thread_device(attrs).map(Self::AddThreadDevice),
            "getNetworkDiagnosticTask" => {
                parse_get_network_diagnostic(attrs).map(Self::GetNetworkDiagnostic)
            }
            "resetNetworkDiagCounterTask" => {
                parse_reset_network_diag_counter(attrs).map(Self::ResetNetworkDiagCounter)
            }
            "getEnergyScanTask" => parse_get_energy_scan(attrs).map(Self::GetEnergyScan),
            other => Err(BorderRouterError::InvalidArgs(format!(
                "unknown action type {other}"
            ))),
        }
    }
}

fn tlv_name(t: &TlvType) -> String {
    // round-trips through the same name table `TlvType::parse_name` accepts
    serde_json::to_value(t)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Renders `MacCounters`/`MleCounters` back to the singular
/// `macCounter`/`mleCounter` names `resetNetworkDiagCounterTask` accepts.
fn reset_counter_name(t: &TlvType) -> &'static str {
    match t {
        TlvType::MacCounters => "macCounter",
        TlvType::MleCounters => "mleCounter",
        _ => "",
    }
}

fn get_str<'a>(attrs: &'a Map<String, Value>, key: &str) -> Result<&'a str, BorderRouterError> {
    attrs
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| BorderRouterError::InvalidArgs(format!("missing or non-string {key}")))
}

fn get_u64(attrs: &Map<String, Value>, key: &str) -> Result<u64, BorderRouterError> {
    attrs
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| BorderRouterError::InvalidArgs(format!("missing or non-integer {key}")))
}

fn parse_tlv_names(attrs: &Map<String, Value>) -> Result<Vec<TlvType>, BorderRouterError> {
    let raw = attrs
        .get("types")
        .and_then(Value::as_array)
        .ok_or_else(|| BorderRouterError::InvalidArgs("missing types array".to_string()))?;
    raw.iter()
        .map(|v| {
            let name = v
                .as_str()
                .ok_or_else(|| BorderRouterError::InvalidArgs("TLV name must be a string".to_string()))?;
            TlvType::parse_name(name)
                .map_err(|bad| BorderRouterError::InvalidArgs(format!("unknown TLV name {bad}")))
        })
        .collect()
}

/// Valid 16-hex-char identifier (eui64/destination), lowercase or
/// uppercase hex digits only.
fn is_hex_of_len(s: &str, len: usize) -> bool {
    s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_add_thread_device(
    attrs: &Map<String, Value>,
) -> Result<AddThreadDeviceAttrs, BorderRouterError> {
    let eui = get_str(attrs, "eui")?.to_string();
    if !is_hex_of_len(&eui, 16) {
        return Err(BorderRouterError::InvalidArgs(
            "eui must be 16 hex characters".to_string(),
        ));
    }
    let pskd = get_str(attrs, "pskd")?.to_string();
    validate_pskd(&pskd)?;
    let timeout_ms = get_u64(attrs, "timeout")?;
    Ok(AddThreadDeviceAttrs {
        eui,
        pskd,
        timeout_ms,
    })
}

/// PSK-d: 6..32 uppercase alphanumeric characters, excluding `I O Q Z`.
fn validate_pskd(pskd: &str) -> Result<(), BorderRouterError> {
    if !(6..=32).contains(&pskd.len()) {
        return Err(BorderRouterError::InvalidArgs(
            "pskd must be 6..32 characters".to_string(),
        ));
    }
    let excluded = ['I', 'O', 'Q', 'Z'];
    let valid = pskd
        .chars()
        .all(|c| c.is_ascii_uppercase() && !excluded.contains(&c) || c.is_ascii_digit());
    if !valid {
        return Err(BorderRouterError::InvalidArgs(
            "pskd must be uppercase alphanumeric excluding I, O, Q, Z".to_string(),
        ));
    }
    Ok(())
}

fn parse_get_network_diagnostic(
    attrs: &Map<String, Value>,
) -> Result<GetNetworkDiagnosticAttrs, BorderRouterError> {
    let destination = get_str(attrs, "destination")?.to_string();
    if !matches!(destination.len(), 0 | 4 | 16) {
        return Err(BorderRouterError::InvalidArgs(format!(
            "destination has invalid length {}",
            destination.len()
        )));
    }
    let types = parse_tlv_names(attrs)?;
    let timeout_ms = get_u64(attrs, "timeout")?;
    Ok(GetNetworkDiagnosticAttrs {
        destination,
        types,
        timeout_ms,
    })
}

/// `resetNetworkDiagCounterTask`'s `types` vocabulary is the singular
/// `macCounter`/`mleCounter` pair, distinct from the plural
/// `macCounters`/`mleCounters` TLV names `parse_tlv_names` accepts for
/// `getNetworkDiagnosticTask`'s `types`.
fn parse_reset_network_diag_counter(
    attrs: &Map<String, Value>,
) -> Result<ResetNetworkDiagCounterAttrs, BorderRouterError> {
    let raw = attrs
        .get("types")
        .and_then(Value::as_array)
        .ok_or_else(|| BorderRouterError::InvalidArgs("missing types array".to_string()))?;
    let types = raw
        .iter()
        .map(|v| {
            let name = v
                .as_str()
                .ok_or_else(|| BorderRouterError::InvalidArgs("TLV name must be a string".to_string()))?;
            match name {
                "macCounter" => Ok(TlvType::MacCounters),
                "mleCounter" => Ok(TlvType::MleCounters),
                other => Err(BorderRouterError::InvalidArgs(format!(
                    "resetNetworkDiagCounterTask only accepts macCounter/mleCounter, got {other}"
                ))),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    let timeout_ms = get_u64(attrs, "timeout")?;
    Ok(ResetNetworkDiagCounterAttrs { types, timeout_ms })
}

fn parse_get_energy_scan(
    attrs: &Map<String, Value>,
) -> Result<GetEnergyScanAttrs, BorderRouterError> {
    let destination = get_str(attrs, "destination")?.to_string();
    if !is_hex_of_len(&destination, 16) {
        return Err(BorderRouterError::InvalidArgs(
            "energy scan destination must be 16 hex characters".to_string(),
        ));
    }
    let channel_mask: Vec<u8> = attrs
        .get("channelMask")
        .and_then(Value::as_array)
        .ok_or_else(|| BorderRouterError::InvalidArgs("missing channelMask".to_string()))?
        .iter()
        .map(|v| {
            let ch = v
                .as_u64()
                .ok_or_else(|| BorderRouterError::InvalidArgs("channel must be an integer".to_string()))?;
            if !(11..=26).contains(&ch) {
                return Err(BorderRouterError::InvalidArgs(format!(
                    "channel {ch} out of range 11..26"
                )));
            }
            Ok(ch as u8)
        })
        .collect::<Result<_, BorderRouterError>>()?;
    let count = u32::try_from(get_u64(attrs, "count")?)
        .map_err(|_| BorderRouterError::InvalidArgs("count out of range".to_string()))?;
    let period = u16::try_from(get_u64(attrs, "period")?)
        .map_err(|_| BorderRouterError::InvalidArgs("period out of range".to_string()))?;
    let scan_duration = u16::try_from(get_u64(attrs, "scanDuration")?)
        .map_err(|_| BorderRouterError::InvalidArgs("scanDuration out of range".to_string()))?;
    let timeout_ms = get_u64(attrs, "timeout")?;
    Ok(GetEnergyScanAttrs {
        destination,
        channel_mask,
        count,
        period,
        scan_duration,
        timeout_ms,
    })
}
