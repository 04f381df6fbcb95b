//! The action queue: a FIFO of typed actions with a per-type handler
//! table, timeout enforcement, and bounded size with eviction of terminal
//! entries.
//!
//! Statuses form a closed set with an explicit `can_transition_to` check,
//! so a status can never revert once terminal.

pub mod handlers;
pub mod payload;

use crate::domain::ActionId;
use crate::error::BorderRouterError;
pub use payload::{
    AddThreadDeviceAttrs, ActionPayload, GetEnergyScanAttrs, GetNetworkDiagnosticAttrs,
    ResetNetworkDiagCounterAttrs,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use tracing::{debug, instrument, warn};

/// An action's lifecycle status. Progresses
/// `Pending -> Active -> {Completed, Failed, Stopped}` and never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    /// Submitted, not yet picked up by a tick.
    Pending,
    /// Picked up; the handler's `process` has returned success at least once.
    Active,
    /// Terminal: the handler's `evaluate` reported success.
    Completed,
    /// Terminal: the handler reported failure, or a validation/transport
    /// error occurred.
    Failed,
    /// Terminal: the action's deadline elapsed, or it was explicitly
    /// cancelled via `DELETE /api/actions`.
    Stopped,
}

impl ActionStatus {
    /// True for any of the three terminal statuses.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Active | Self::Failed | Self::Stopped),
            Self::Active => matches!(
                next,
                Self::Completed | Self::Failed | Self::Stopped
            ),
            Self::Completed | Self::Failed | Self::Stopped => false,
        }
    }

    fn transition_to(&mut self, next: Self) -> Result<(), BorderRouterError> {
        if !self.can_transition_to(next) {
            return Err(BorderRouterError::InvalidState(format!(
                "action cannot transition from {self:?} to {next:?}"
            )));
        }
        *self = next;
        Ok(())
    }
}

/// The `{kind, id}` relationship an Action is stamped with once it
/// completes against a collection item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// `"devices"` or `"diagnostics"`.
    pub kind: String,
    /// The related item's id.
    pub id: String,
}

/// One entry in the action queue.
#[derive(Debug, Clone)]
pub struct Action {
    /// Unique id, assigned at submission.
    pub id: ActionId,
    /// The action's type-specific, already-validated payload.
    pub payload: ActionPayload,
    /// Current lifecycle status.
    pub status: ActionStatus,
    /// Submission time, in milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Deadline; `timeout_at <= created_at + configured_timeout`.
    pub timeout_at: u64,
    /// The last tick at which this action was evaluated.
    pub last_evaluated_at: Option<u64>,
    /// Set only when `status == Completed`.
    pub relationship: Option<Relationship>,
    marked_for_delete: bool,
}

impl Action {
    fn new(id: ActionId, payload: ActionPayload, created_at: u64, timeout_ms: u64) -> Self {
        Self {
            id,
            payload,
            status: ActionStatus::Pending,
            created_at,
            timeout_at: created_at + timeout_ms,
            last_evaluated_at: None,
            relationship: None,
            marked_for_delete: false,
        }
    }

    /// The action type name, as accepted in `POST /api/actions` bodies.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.payload.type_name()
    }

    /// Renders this action as a json:api resource object.
    #[must_use]
    pub fn to_json_api(&self) -> Value {
        let mut attrs: Map<String, Value> = Map::new();
        attrs.insert("status".to_string(), json!(self.status));
        attrs.insert(
            "attributes".to_string(),
            Value::Object(self.payload.attributes_json()),
        );
        if let Some(rel) = &self.relationship {
            attrs.insert(
                "relationship".to_string(),
                json!({ "kind": rel.kind, "id": rel.id }),
            );
        }
        json!({
            "type": self.type_name(),
            "id": self.id.to_string(),
            "attributes": attrs,
        })
    }
}

/// Outcome of a handler's `process`/`evaluate` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// `process`: move Pending -> Active. `evaluate`: no terminal meaning.
    Success,
    /// Terminal failure; the action moves to `Failed`.
    Failure(String),
    /// Terminal stop (e.g. resource no longer obtainable); moves to `Stopped`.
    Stopped,
    /// No state change this tick (busy/waiting on a sub-resource).
    Retry,
    /// `evaluate` only: the action is done and should complete, optionally
    /// with a relationship to stamp.
    Completed(Option<Relationship>),
}

/// Bounded FIFO of [`Action`]s.
#[derive(Debug)]
pub struct ActionQueue {
    entries: VecDeque<Action>,
    max_size: usize,
}

impl ActionQueue {
    /// Builds an empty queue bounded at `max_size`.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size,
        }
    }

    /// Number of actions currently held (including terminal, not yet
    /// evicted entries).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the queue holds no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The queue's configured capacity, reported as `limit` in the action
    /// API's collection meta.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Count of actions with non-terminal status.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|a| !a.status.is_terminal())
            .count()
    }

    fn evictable_count(&self) -> usize {
        self.entries.iter().filter(|a| a.status.is_terminal()).count()
    }

    /// Submits a batch of already-validated payloads. All-or-nothing: if
    /// accepting the whole batch would exceed `max_size` even after
    /// evicting every currently terminal entry, nothing is enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`BorderRouterError::ResourceExhausted`] if the batch would
    /// overflow the queue.
    #[instrument(skip(self, payloads))]
    pub fn submit(
        &mut self,
        payloads: Vec<ActionPayload>,
        now_ms: u64,
    ) -> Result<Vec<ActionId>, BorderRouterError> {
        let room = self.max_size - (self.entries.len() - self.evictable_count());
        if payloads.len() > room {
            warn!(
                requested = payloads.len(),
                room, "action queue submission rejected: would overflow"
            );
            return Err(BorderRouterError::ResourceExhausted(
                "action queue is full".to_string(),
            ));
        }

        // make room by evicting terminal entries, oldest first, only as
        // much as is needed for the incoming batch
        let mut to_evict = (self.entries.len() + payloads.len()).saturating_sub(self.max_size);
        if to_evict > 0 {
            let mut remaining = VecDeque::with_capacity(self.entries.len());
            while let Some(entry) = self.entries.pop_front() {
                if to_evict > 0 && entry.status.is_terminal() {
                    to_evict -= 1;
                    continue;
                }
                remaining.push_back(entry);
            }
            self.entries = remaining;
        }

        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let id = ActionId::generate();
            let timeout_ms = payload.timeout_ms();
            self.entries.push_back(Action::new(id, payload, now_ms, timeout_ms));
            ids.push(id);
        }
        Ok(ids)
    }

    /// Looks up an action by id.
    #[must_use]
    pub fn get(&self, id: ActionId) -> Option<&Action> {
        self.entries.iter().find(|a| a.id == id)
    }

    /// Iterates every action currently held, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.entries.iter()
    }

    /// Marks every action for deletion; the next tick will run each
    /// handler's `clean` exactly once and remove the entry.
    pub fn mark_all_for_delete(&mut self) {
        for entry in &mut self.entries {
            entry.marked_for_delete = true;
        }
    }

    /// Runs one tick: advances every pending/active
    /// action through its handler's `process`/`evaluate`, enforces
    /// deadlines, and removes entries marked for deletion. `ctx` threads
    /// through the collector/collections/thread-api/allow-list the
    /// handlers need.
    #[instrument(skip(self, ctx))]
    pub async fn tick(&mut self, ctx: &mut handlers::ActionContext<'_>, now_ms: u64) {
        let mut remaining = VecDeque::with_capacity(self.entries.len());
        while let Some(mut action) = self.entries.pop_front() {
            if action.marked_for_delete {
                handlers::clean(&mut action, ctx).await;
                action.status = ActionStatus::Stopped;
                debug!(action_id = %action.id, "action removed via DELETE");
                continue;
            }

            if !action.status.is_terminal() {
                if action.timeout_at < now_ms {
                    handlers::clean(&mut action, ctx).await;
                    let _ = action.status.transition_to(ActionStatus::Stopped);
                } else if action.status == ActionStatus::Pending {
                    match handlers::process(&mut action, ctx, now_ms).await {
                        HandlerOutcome::Success => {
                            let _ = action.status.transition_to(ActionStatus::Active);
                        }
                        HandlerOutcome::Failure(reason) => {
                            warn!(action_id = %action.id, %reason, "action failed during process");
                            let _ = action.status.transition_to(ActionStatus::Failed);
                        }
                        HandlerOutcome::Stopped => {
                            let _ = action.status.transition_to(ActionStatus::Stopped);
                        }
                        HandlerOutcome::Retry | HandlerOutcome::Completed(_) => {}
                    }
                } else if action.status == ActionStatus::Active {
                    match handlers::evaluate(&mut action, ctx, now_ms).await {
                        HandlerOutcome::Completed(relationship) => {
                            action.relationship = relationship;
                            let _ = action.status.transition_to(ActionStatus::Completed);
                        }
                        HandlerOutcome::Failure(reason) => {
                            warn!(action_id = %action.id, %reason, "action failed during evaluate");
                            let _ = action.status.transition_to(ActionStatus::Failed);
                        }
                        HandlerOutcome::Stopped => {
                            let _ = action.status.transition_to(ActionStatus::Stopped);
                        }
                        HandlerOutcome::Success | HandlerOutcome::Retry => {}
                    }
                }
                action.last_evaluated_at = Some(now_ms);
            }
            remaining.push_back(action);
        }
        self.entries = remaining;

        // Apply any stop requests a handler raised this tick (e.g. an
        // add-thread-device action superseded by a fresher one for the same
        // EUI-64). `clean` runs once, just as it would for a deadline-driven
        // stop.
        if !ctx.stop_requests.is_empty() {
            let ids = std::mem::take(ctx.stop_requests);
            for action in &mut self.entries {
                if ids.contains(&action.id) && !action.status.is_terminal() {
                    handlers::clean(action, ctx).await;
                    let _ = action.status.transition_to(ActionStatus::Stopped);
                    debug!(action_id = %action.id, "action stopped: superseded");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::payload::ResetNetworkDiagCounterAttrs;

    fn dummy_payload() -> ActionPayload {
        ActionPayload::ResetNetworkDiagCounter(ResetNetworkDiagCounterAttrs {
            types: vec![crate::tlv::TlvType::MacCounters],
            timeout_ms: 10_000,
        })
    }

    #[test]
    fn status_never_reverts_once_terminal() {
        let mut status = ActionStatus::Pending;
        status.transition_to(ActionStatus::Active).unwrap();
        status.transition_to(ActionStatus::Completed).unwrap();
        assert!(status.transition_to(ActionStatus::Active).is_err());
    }

    #[test]
    fn submission_rejected_when_queue_full_of_non_terminal_actions() {
        let mut queue = ActionQueue::new(2);
        queue.submit(vec![dummy_payload(), dummy_payload()], 0).unwrap();
        let result = queue.submit(vec![dummy_payload()], 0);
        assert!(matches!(
            result,
            Err(BorderRouterError::ResourceExhausted(_))
        ));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn submission_accepted_after_evicting_terminal_entries() {
        let mut queue = ActionQueue::new(2);
        let ids = queue.submit(vec![dummy_payload(), dummy_payload()], 0).unwrap();
        for entry in queue.entries.iter_mut() {
            entry.status = ActionStatus::Completed;
        }
        let _ = ids;
        queue.submit(vec![dummy_payload()], 0).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn queue_overflow_rejection_at_one_hundred_non_terminal() {
        let mut queue = ActionQueue::new(100);
        let batch: Vec<_> = (0..100).map(|_| dummy_payload()).collect();
        queue.submit(batch, 0).unwrap();
        assert_eq!(queue.len(), 100);
        let result = queue.submit(vec![dummy_payload()], 0);
        assert!(matches!(
            result,
            Err(BorderRouterError::ResourceExhausted(_))
        ));
        assert_eq!(queue.len(), 100);
    }

    #[tokio::test]
    async fn superseding_add_thread_device_stops_the_earlier_action_on_tick() {
        use crate::allowlist::mock::MockCommissioner;
        use crate::allowlist::{AllowList, CommissionerState};
        use crate::collections::Collections;
        use crate::collector::Collector;
        use crate::domain::{Eui64, Rloc16};
        use crate::thread_api::mock::MockThreadApi;
        use crate::thread_api::{LeaderData, ThisNodeInfo};
        use crate::actions::handlers::{ActionContext, EnergyScanState};

        let api = MockThreadApi::new(
            Eui64([0xee; 8]),
            ThisNodeInfo {
                border_agent_id: "ba-1".into(),
                border_agent_state: "connected".into(),
                leader_data: LeaderData {
                    partition_id: 1,
                    data_version: 1,
                },
                network_name: "test-net".into(),
                rloc16: Rloc16::new(0x0000),
                rloc_address: "fd00::1".parse().unwrap(),
                router_count: 1,
            },
            crate::ipv6::NetworkPrefixes {
                mesh_local_prefix: [0xfd, 0x00, 0xde, 0xad, 0xbe, 0xef, 0x00, 0x00],
            },
        );
        let commissioner = MockCommissioner::new();
        commissioner.set_state(CommissionerState::Active);
        let mut collector = Collector::new();
        let mut collections = Collections::new(10, 10);
        let mut allow_list = AllowList::new();
        let mut energy_scan = EnergyScanState::new();
        let config = crate::config::BorderRouterConfig::default();

        let mut queue = ActionQueue::new(10);
        let attrs = crate::actions::payload::AddThreadDeviceAttrs {
            eui: "aabbccddeeff0011".into(),
            pskd: "J01NME2".into(),
            timeout_ms: 120_000,
        };
        let first_ids = queue
            .submit(vec![ActionPayload::AddThreadDevice(attrs.clone())], 0)
            .unwrap();

        {
            let mut stop_requests = Vec::new();
            let mut ctx = ActionContext {
                thread_api: &api,
                collector: &mut collector,
                collections: &mut collections,
                allow_list: &mut allow_list,
                commissioner: &commissioner,
                energy_scan: &mut energy_scan,
                stop_requests: &mut stop_requests,
                config: &config,
            };
            queue.tick(&mut ctx, 0).await;
        }
        assert_eq!(queue.get(first_ids[0]).unwrap().status, ActionStatus::Active);

        let second_ids = queue
            .submit(vec![ActionPayload::AddThreadDevice(attrs)], 0)
            .unwrap();

        {
            let mut stop_requests = Vec::new();
            let mut ctx = ActionContext {
                thread_api: &api,
                collector: &mut collector,
                collections: &mut collections,
                allow_list: &mut allow_list,
                commissioner: &commissioner,
                energy_scan: &mut energy_scan,
                stop_requests: &mut stop_requests,
                config: &config,
            };
            queue.tick(&mut ctx, 0).await;
        }

        assert_eq!(queue.get(first_ids[0]).unwrap().status, ActionStatus::Stopped);
        assert_eq!(queue.get(second_ids[0]).unwrap().status, ActionStatus::Active);
        assert_eq!(
            allow_list.find("aabbccddeeff0011").unwrap().action_id,
            second_ids[0]
        );
    }
}
