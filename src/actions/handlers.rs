//! Per-type action handlers.
//!
//! Each handler gets three hooks: `process` (Pending -> Active, issues the
//! underlying request), `evaluate` (Active -> terminal, polls for
//! completion), and `clean` (runs once when an action is stopped, deleted,
//! or times out, releasing whatever shared resource it was holding).

use crate::actions::{Action, ActionPayload, HandlerOutcome, Relationship};
use crate::allowlist::{AllowList, Commissioner, CommissionerState, JoinerState};
use crate::collections::Collections;
use crate::collections::diagnostic::{DiagnosticItem, EnergyScanReportItem};
use crate::collector::{Collector, CollectorTick, RelationshipKind};
use crate::config::BorderRouterConfig;
use crate::domain::ActionId;
use crate::error::BorderRouterError;
use crate::ipv6::resolve_destination;
use crate::thread_api::{EnergyScanRow, ThreadApi};
use std::net::Ipv6Addr;
use tracing::warn;

/// The multicast group `Diagnostic Reset` is sent to: the realm-local
/// All-Thread-Nodes address.
const ALL_THREAD_NODES: Ipv6Addr = Ipv6Addr::new(0xff03, 0, 0, 0, 0, 0, 0, 1);

/// Tracks the single concurrently-active energy scan.
#[derive(Debug, Default)]
pub struct EnergyScanState {
    active: Option<ActiveScan>,
}

#[derive(Debug)]
struct ActiveScan {
    action_id: ActionId,
    rows: Vec<EnergyScanRow>,
}

impl EnergyScanState {
    /// Builds an idle scan tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no scan is active, or the active scan belongs to `action_id`.
    fn available_to(&self, action_id: ActionId) -> bool {
        self.active.as_ref().is_none_or(|s| s.action_id == action_id)
    }

    fn claim(&mut self, action_id: ActionId) {
        if self.active.is_none() {
            self.active = Some(ActiveScan {
                action_id,
                rows: Vec::new(),
            });
        }
    }

    /// Appends a freshly delivered measurement row to the active scan, if
    /// one is running.
    pub fn push_row(&mut self, row: EnergyScanRow) {
        if let Some(scan) = &mut self.active {
            scan.rows.push(row);
        }
    }

    fn rows_len(&self, action_id: ActionId) -> Option<usize> {
        self.active
            .as_ref()
            .filter(|s| s.action_id == action_id)
            .map(|s| s.rows.len())
    }

    fn take_rows(&mut self, action_id: ActionId) -> Option<Vec<EnergyScanRow>> {
        if self.active.as_ref().is_some_and(|s| s.action_id == action_id) {
            self.active.take().map(|s| s.rows)
        } else {
            None
        }
    }

    fn clear_if(&mut self, action_id: ActionId) {
        if self.active.as_ref().is_some_and(|s| s.action_id == action_id) {
            self.active = None;
        }
    }
}

/// Everything a handler needs reaches it through this borrow bundle, so the
/// queue's `tick` stays agnostic of what any individual action type touches.
pub struct ActionContext<'a> {
    /// Adapter over the Thread stack.
    pub thread_api: &'a dyn ThreadApi,
    /// The mesh network-diagnostic collector (shared, at most one cycle
    /// active across all `getNetworkDiagnosticTask` actions).
    pub collector: &'a mut Collector,
    /// The devices/diagnostics collections the collector writes into.
    pub collections: &'a mut Collections,
    /// Pending joiners and their lifecycle.
    pub allow_list: &'a mut AllowList,
    /// Commissioner utility seam.
    pub commissioner: &'a dyn Commissioner,
    /// The single concurrently-active energy scan, if any.
    pub energy_scan: &'a mut EnergyScanState,
    /// Ids of other actions a handler has decided must be stopped this tick
    /// (e.g. an add-thread-device action superseded by a fresher one for
    /// the same EUI-64). Drained by [`crate::actions::ActionQueue::tick`]
    /// after every action's `process`/`evaluate` has run.
    pub stop_requests: &'a mut Vec<ActionId>,
    /// Runtime configuration, for the collector defaults
    /// `getNetworkDiagnosticTask` configures itself with.
    pub config: &'a BorderRouterConfig,
}

/// `process`: Pending -> Active.
pub async fn process(action: &mut Action, ctx: &mut ActionContext<'_>, now_ms: u64) -> HandlerOutcome {
    match &action.payload {
        ActionPayload::AddThreadDevice(attrs) => {
            match ctx.commissioner.state() {
                CommissionerState::Inactive => {
                    if ctx.commissioner.start().await.is_err() {
                        return HandlerOutcome::Failure("commissioner failed to start".to_string());
                    }
                    HandlerOutcome::Retry
                }
                CommissionerState::Petitioning => HandlerOutcome::Retry,
                CommissionerState::Active => {
                    // A non-terminal entry for this EUI-64 already belongs to
                    // an earlier action: stop that action first, then take
                    // over the slot with a fresh AddJoiner.
                    if let Some(existing) = ctx.allow_list.find(&attrs.eui) {
                        if !existing.state.is_terminal() && existing.action_id != action.id {
                            ctx.stop_requests.push(existing.action_id);
                            let _ = ctx.commissioner.remove_joiner(&attrs.eui).await;
                            ctx.allow_list.remove(&attrs.eui);
                        }
                    }
                    if ctx.allow_list.find(&attrs.eui).is_none() {
                        ctx.allow_list.add(
                            attrs.eui.clone(),
                            action.id,
                            attrs.timeout_ms / 1000,
                            attrs.pskd.clone(),
                        );
                    }
                    if ctx
                        .commissioner
                        .add_joiner(&attrs.eui, &attrs.pskd, attrs.timeout_ms / 1000)
                        .await
                        .is_err()
                    {
                        return HandlerOutcome::Failure("commissioner rejected AddJoiner".to_string());
                    }
                    ctx.allow_list.mark_pending(&attrs.eui);
                    HandlerOutcome::Success
                }
            }
        }

        ActionPayload::GetNetworkDiagnostic(attrs) => {
            if !ctx.collector.is_idle() {
                return HandlerOutcome::Retry;
            }
            if let Err(e) = ctx.collector.configure(
                attrs.timeout_ms,
                ctx.config.default_collector_max_age_ms,
                ctx.config.default_collector_retries,
                ctx.config.retry_delay_ftd_ms.into_inner(),
                now_ms,
            ) {
                return match e {
                    BorderRouterError::InvalidState(_) => HandlerOutcome::Retry,
                    other => HandlerOutcome::Failure(other.to_string()),
                };
            }
            let prefixes = ctx.thread_api.get_mesh_local_prefix();
            let resolved = resolve_destination(&attrs.destination, &prefixes, |device_id| {
                ctx.collections.lookup_device_mleid(device_id)
            });
            match resolved {
                Ok(None) => match ctx.collector.start_discovery(ctx.thread_api, now_ms).await {
                    Ok(()) => HandlerOutcome::Success,
                    Err(BorderRouterError::InvalidState(_)) => HandlerOutcome::Retry,
                    Err(e) => HandlerOutcome::Failure(e.to_string()),
                },
                Ok(Some(dest)) => {
                    match ctx
                        .collector
                        .handle_action(
                            ctx.thread_api,
                            dest.address,
                            &attrs.types,
                            RelationshipKind::Diagnostics,
                            action.id,
                            now_ms,
                        )
                        .await
                    {
                        Ok(()) => HandlerOutcome::Success,
                        Err(BorderRouterError::InvalidState(_)) => HandlerOutcome::Retry,
                        Err(e) => HandlerOutcome::Failure(e.to_string()),
                    }
                }
                Err(e) => HandlerOutcome::Failure(e.to_string()),
            }
        }

        ActionPayload::ResetNetworkDiagCounter(attrs) => {
            match ctx
                .thread_api
                .send_diagnostic_reset(ALL_THREAD_NODES, &attrs.types)
                .await
            {
                Ok(()) => HandlerOutcome::Success,
                Err(e) => HandlerOutcome::Failure(e.to_string()),
            }
        }

        ActionPayload::GetEnergyScan(attrs) => {
            if !ctx.energy_scan.available_to(action.id) {
                return HandlerOutcome::Retry;
            }
            let prefixes = ctx.thread_api.get_mesh_local_prefix();
            let resolved = resolve_destination(&attrs.destination, &prefixes, |device_id| {
                ctx.collections.lookup_device_mleid(device_id)
            });
            let dest = match resolved {
                Ok(Some(r)) => r.address,
                Ok(None) => {
                    return HandlerOutcome::Failure(
                        "getEnergyScanTask requires a destination".to_string(),
                    );
                }
                Err(e) => return HandlerOutcome::Failure(e.to_string()),
            };
            match ctx
                .thread_api
                .start_energy_scan(
                    dest,
                    &attrs.channel_mask,
                    attrs.count,
                    attrs.period,
                    attrs.scan_duration,
                )
                .await
            {
                Ok(()) => {
                    ctx.energy_scan.claim(action.id);
                    HandlerOutcome::Success
                }
                Err(BorderRouterError::Busy(_)) => HandlerOutcome::Retry,
                Err(e) => HandlerOutcome::Failure(e.to_string()),
            }
        }
    }
}

/// `evaluate`: Active -> terminal.
pub async fn evaluate(action: &mut Action, ctx: &mut ActionContext<'_>, now_ms: u64) -> HandlerOutcome {
    match &action.payload {
        ActionPayload::AddThreadDevice(attrs) => {
            let Some(entry) = ctx.allow_list.find(&attrs.eui) else {
                return HandlerOutcome::Failure("allow-list entry disappeared".to_string());
            };
            match entry.state {
                JoinerState::Joined => HandlerOutcome::Completed(None),
                JoinerState::JoinFailed | JoinerState::Expired => {
                    HandlerOutcome::Failure(format!("joiner did not complete: {:?}", entry.state))
                }
                JoinerState::New | JoinerState::PendingJoiner | JoinerState::JoinAttempted => {
                    HandlerOutcome::Retry
                }
            }
        }

        ActionPayload::GetNetworkDiagnostic(_) => {
            match ctx.collector.poll(ctx.thread_api, ctx.collections, now_ms).await {
                CollectorTick::Finished(outcome) => {
                    if outcome.success {
                        let relationship = outcome.relationship_kind.zip(outcome.item_id).map(
                            |(kind, id)| Relationship {
                                kind: kind.as_str().to_string(),
                                id,
                            },
                        );
                        HandlerOutcome::Completed(relationship)
                    } else {
                        warn!(action_id = %action.id, "network diagnostic cycle timed out");
                        HandlerOutcome::Stopped
                    }
                }
                CollectorTick::Running | CollectorTick::Idle => HandlerOutcome::Retry,
            }
        }

        ActionPayload::ResetNetworkDiagCounter(_) => HandlerOutcome::Completed(None),

        ActionPayload::GetEnergyScan(attrs) => {
            let Some(len) = ctx.energy_scan.rows_len(action.id) else {
                return HandlerOutcome::Failure("energy scan state disappeared".to_string());
            };
            if len < attrs.count as usize {
                return HandlerOutcome::Retry;
            }
            let Some(rows) = ctx.energy_scan.take_rows(action.id) else {
                return HandlerOutcome::Failure("energy scan rows disappeared".to_string());
            };
            let item = EnergyScanReportItem {
                meta: crate::collections::item::ItemMeta::new(crate::collections::now()),
                rows,
            };
            let id = ctx.collections.diagnostics.add(DiagnosticItem::EnergyScanReport(item));
            HandlerOutcome::Completed(Some(Relationship {
                kind: "diagnostics".to_string(),
                id,
            }))
        }
    }
}

/// `clean`: runs exactly once for an action leaving the queue via deletion
/// or timeout, releasing whatever shared resource its `process` claimed.
pub async fn clean(action: &mut Action, ctx: &mut ActionContext<'_>) {
    match &action.payload {
        ActionPayload::AddThreadDevice(attrs) => {
            // Ownership check by action id, not just eui64: if this action
            // was superseded by a fresher one for the same EUI-64, the
            // allow-list entry already belongs to that other action and
            // must not be torn down here.
            if ctx.allow_list.find_by_action(action.id).is_some() {
                let _ = ctx.commissioner.remove_joiner(&attrs.eui).await;
                ctx.allow_list.remove(&attrs.eui);
            }
            if ctx.allow_list.non_terminal_count() == 0
                && matches!(ctx.commissioner.state(), CommissionerState::Active)
            {
                let _ = ctx.commissioner.stop().await;
            }
        }
        ActionPayload::GetNetworkDiagnostic(_) => {
            if action.status == crate::actions::ActionStatus::Active {
                ctx.collector.cancel();
            }
        }
        ActionPayload::ResetNetworkDiagCounter(_) => {}
        ActionPayload::GetEnergyScan(_) => {
            ctx.energy_scan.clear_if(action.id);
        }
    }
}
