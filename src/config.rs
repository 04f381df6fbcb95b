//! Runtime configuration for the Thread Border Router control plane.
//!
//! A flat struct of tunables with a `Default` impl, using `nutype`-clamped
//! fields for the values that carry hard bounds.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Maximum number of actions the action queue holds at once
/// (`TASK_QUEUE_MAX`).
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)
)]
pub struct TaskQueueMax(usize);

/// Maximum number of items the devices collection holds
/// (`MAX_DEVICES_COLLECTION_ITEMS`).
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)
)]
pub struct MaxDevicesItems(usize);

/// Maximum number of items the diagnostics collection holds
/// (`MAX_DIAG_COLLECTION_ITEMS`).
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)
)]
pub struct MaxDiagItems(usize);

/// Period between action-queue ticks, in milliseconds: invoked on a fixed
/// period, roughly every two seconds.
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)
)]
pub struct TickPeriodMs(u64);

/// Delay before retrying an outstanding FTD child Diagnostic Get
/// (`RETRY_DELAY_FTD`).
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)
)]
pub struct RetryDelayFtdMs(u64);

/// Full control-plane configuration, constructed once at agent start and
/// passed by reference into every subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorderRouterConfig {
    /// Bound on the action queue's length.
    pub task_queue_max: TaskQueueMax,
    /// Bound on the devices collection's length.
    pub max_devices_items: MaxDevicesItems,
    /// Bound on the diagnostics collection's length.
    pub max_diag_items: MaxDiagItems,
    /// How often the action queue tick runs.
    pub tick_period_ms: TickPeriodMs,
    /// Delay between FTD-child re-query retries while the collector is in
    /// `QueryPhase::Waiting`.
    pub retry_delay_ftd_ms: RetryDelayFtdMs,
    /// Default collector cycle timeout before clamping, in milliseconds.
    pub default_collector_timeout_ms: u64,
    /// Default collector freshness bound before clamping, in milliseconds.
    pub default_collector_max_age_ms: u64,
    /// Default retry budget for a collector cycle.
    pub default_collector_retries: u32,
    /// Address the REST API listens on.
    pub listen_addr: SocketAddr,
}

impl Default for BorderRouterConfig {
    fn default() -> Self {
        Self {
            task_queue_max: TaskQueueMax::try_new(100).expect("100 > 0"),
            max_devices_items: MaxDevicesItems::try_new(200).expect("200 > 0"),
            max_diag_items: MaxDiagItems::try_new(200).expect("200 > 0"),
            tick_period_ms: TickPeriodMs::try_new(2_000).expect("2000 > 0"),
            retry_delay_ftd_ms: RetryDelayFtdMs::try_new(5_000).expect("5000 > 0"),
            default_collector_timeout_ms: 30_000,
            default_collector_max_age_ms: 120_000,
            default_collector_retries: 3,
            listen_addr: "127.0.0.1:8080".parse().expect("valid default listen address"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = BorderRouterConfig::default();
        assert_eq!(config.task_queue_max.into_inner(), 100);
        assert_eq!(config.max_devices_items.into_inner(), 200);
        assert_eq!(config.max_diag_items.into_inner(), 200);
    }
}
