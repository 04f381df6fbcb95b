//! The mesh network-diagnostic collector: the state machine at the heart of
//! the control plane. One [`Collector`] instance is owned by
//! the agent loop; at most one collection cycle may be active at a time.

use crate::collections::Collections;
use crate::collections::device::{DeviceFields, DeviceItem, DeviceRole, ThisDeviceInfo};
use crate::collections::diagnostic::{DiagnosticItem, NetworkDiagnosticsItem};
use crate::domain::{ActionId, CollectorMaxAgeMs, CollectorTimeoutMs, Eui64, Rloc16};
use crate::error::BorderRouterError;
use crate::ipv6::{classify_addrs, service_role_flags};
use crate::thread_api::{ChildEntry, ChildIp6Entry, RouterNeighborEntry, ThreadApi, ThreadApiEvent};
use crate::tlv::{Tlv, TlvType, TlvValue, merge_tlvs};
use std::collections::HashMap;
use std::net::Ipv6Addr;
use tracing::{debug, instrument, warn};

/// The collector's own phase, gating `configure`/`start`. `phase` and
/// [`QueryPhase`] stay in lockstep, so a single field captures both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No cycle active; `configure`/`start_*` may be called.
    Idle,
    /// Waiting for the initial unicast Diagnostic Get response.
    Waiting,
    /// Issuing/awaiting mesh-diag sub-queries (`handle_next_query`).
    Pending,
    /// Sub-queries complete; scanning for newly discovered FTD children.
    Done,
}

/// Alias kept distinct from [`Phase`] purely for vocabulary fidelity at
/// call sites that think in terms of sub-query progress rather than the
/// cycle as a whole.
pub type QueryPhase = Phase;

/// Which collection a finished cycle's results are written into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// Results become (or update) `devices` collection items.
    Devices,
    /// Results become `diagnostics` collection items.
    Diagnostics,
}

impl RelationshipKind {
    /// The json:api relationship `kind` string stamped onto the Action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Devices => "devices",
            Self::Diagnostics => "diagnostics",
        }
    }
}

#[derive(Debug, Clone)]
struct DiagEntry {
    start_time: u64,
    tlvs: Vec<Tlv>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubQueryStatus {
    NotStarted,
    InFlight,
    Complete,
}

#[derive(Debug, Clone)]
struct SubQuery<T> {
    update_time: u64,
    status: SubQueryStatus,
    entries: Vec<T>,
}

impl<T> SubQuery<T> {
    fn fresh() -> Self {
        Self {
            update_time: 0,
            status: SubQueryStatus::NotStarted,
            entries: Vec::new(),
        }
    }
}

/// Outcome of a finished collector cycle, handed back to the caller (an
/// action-queue handler) so it can stamp the Action's relationship and
/// invoke its completion callback.
#[derive(Debug, Clone)]
pub struct CollectorOutcome {
    /// `true` on success, `false` on timeout.
    pub success: bool,
    /// Which collection the results were written into, if any (`None` when
    /// the cycle produced nothing to relate, e.g. an empty discovery).
    pub relationship_kind: Option<RelationshipKind>,
    /// The last item id created/updated during finalisation, stamped onto
    /// the Action's `relationship.id`.
    pub item_id: Option<String>,
    /// The action this cycle was running on behalf of, if it was a unicast
    /// `handle_action` cycle rather than a discovery.
    pub action_ref: Option<ActionId>,
}

/// Result of one [`Collector::poll`] call.
#[derive(Debug, Clone)]
pub enum CollectorTick {
    /// No cycle is active.
    Idle,
    /// A cycle is active and still running.
    Running,
    /// A cycle just finished; its action/collections bookkeeping is in
    /// `outcome`.
    Finished(CollectorOutcome),
}

/// The mesh network-diagnostic collector.
#[derive(Debug)]
pub struct Collector {
    phase: Phase,
    timeout_at: u64,
    max_age: u64,
    max_retries: u32,
    retries: u32,
    last_attempt_at: u64,
    retry_delay_ms: u64,
    dest_ip6: Option<Ipv6Addr>,
    relationship_kind: Option<RelationshipKind>,
    action_ref: Option<ActionId>,
    request_tlvs: Vec<TlvType>,
    query_tlvs: Vec<TlvType>,
    diag_set: HashMap<Rloc16, DiagEntry>,
    child_tables: HashMap<Rloc16, SubQuery<ChildEntry>>,
    child_ip6s: HashMap<Rloc16, SubQuery<ChildIp6Entry>>,
    router_neighbors: HashMap<Rloc16, SubQuery<RouterNeighborEntry>>,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    /// Builds an idle collector with no cycle active.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            timeout_at: 0,
            max_age: 0,
            max_retries: 0,
            retries: 0,
            last_attempt_at: 0,
            retry_delay_ms: 5_000,
            dest_ip6: None,
            relationship_kind: None,
            action_ref: None,
            request_tlvs: Vec::new(),
            query_tlvs: Vec::new(),
            diag_set: HashMap::new(),
            child_tables: HashMap::new(),
            child_ip6s: HashMap::new(),
            router_neighbors: HashMap::new(),
        }
    }

    /// True iff no cycle is currently active.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// Which collection the active cycle (if any) is writing into.
    #[must_use]
    pub fn active_relationship(&self) -> Option<RelationshipKind> {
        if self.is_idle() { None } else { self.relationship_kind }
    }

    /// Count of `diag_set` entries not yet carrying any response TLVs, for
    /// the collection API's `pending` meta field.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.diag_set.values().filter(|e| e.tlvs.is_empty()).count()
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// `configure(timeout_ms, max_age_ms, retries) → Ok | InvalidState`.
    /// Clamps the timeout into `[10_000, 100_000]` ms and `max_age` into
    /// `[30_000, 300_000]` ms.
    ///
    /// # Errors
    ///
    /// Returns [`BorderRouterError::InvalidState`] if a cycle is already
    /// active.
    pub fn configure(
        &mut self,
        timeout_ms: u64,
        max_age_ms: u64,
        retries: u32,
        retry_delay_ms: u64,
        now_ms: u64,
    ) -> Result<(), BorderRouterError> {
        if !self.is_idle() {
            return Err(BorderRouterError::InvalidState(
                "collector cycle already active".to_string(),
            ));
        }
        let timeout = CollectorTimeoutMs::clamp(timeout_ms);
        let max_age = CollectorMaxAgeMs::clamp(max_age_ms);
        self.timeout_at = now_ms + timeout.into_inner();
        self.max_age = now_ms.saturating_sub(max_age.into_inner());
        self.max_retries = retries;
        self.retries = 0;
        self.retry_delay_ms = retry_delay_ms;
        Ok(())
    }

    /// `start_discovery(relationship_kind)` — the no-destination discovery
    /// entry point. Seeds default TLV sets,
    /// refreshes the router set from `GetRouterInfo`, ages out stale child
    /// entries, and issues one unicast Diagnostic Get per router.
    ///
    /// # Errors
    ///
    /// Returns [`BorderRouterError::InvalidState`] if a cycle is already
    /// active, or propagates a transport failure from the first send.
    #[instrument(skip(self, thread_api))]
    pub async fn start_discovery(
        &mut self,
        thread_api: &dyn ThreadApi,
        now_ms: u64,
    ) -> Result<(), BorderRouterError> {
        if !self.is_idle() {
            return Err(BorderRouterError::InvalidState(
                "collector cycle already active".to_string(),
            ));
        }
        self.relationship_kind = Some(RelationshipKind::Devices);
        self.dest_ip6 = None;
        self.request_tlvs = vec![TlvType::ExtAddress, TlvType::ShortAddress, TlvType::Ip6AddrList];
        self.query_tlvs = vec![TlvType::Children, TlvType::ChildrenIp6, TlvType::Neighbors];

        let mut routers = Vec::new();
        for router_id in 0..=Rloc16::MAX_ROUTER_ID {
            if let Some(info) = thread_api.get_router_info(router_id) {
                routers.push((Rloc16::for_router_id(router_id), info));
            }
        }
        let live: std::collections::HashSet<Rloc16> = routers.iter().map(|(r, _)| *r).collect();

        // delete router entries for ids no longer present
        self.diag_set
            .retain(|rloc, _| rloc.is_child() || live.contains(rloc));
        // age out child entries whose start_time predates the freshness bound
        let max_age = self.max_age;
        self.diag_set
            .retain(|rloc, entry| !rloc.is_child() || entry.start_time >= max_age);

        self.child_tables.retain(|rloc, _| live.contains(rloc));
        self.child_ip6s.retain(|rloc, _| live.contains(rloc));
        self.router_neighbors.retain(|rloc, _| live.contains(rloc));

        let prefixes = thread_api.get_mesh_local_prefix();
        for (rloc, _info) in &routers {
            self.diag_set
                .entry(*rloc)
                .or_insert_with(|| DiagEntry {
                    start_time: now_ms,
                    tlvs: Vec::new(),
                })
                .start_time = now_ms;
            self.child_tables.entry(*rloc).or_insert_with(SubQuery::fresh);
            self.child_ip6s.entry(*rloc).or_insert_with(SubQuery::fresh);
            self.router_neighbors.entry(*rloc).or_insert_with(SubQuery::fresh);

            let addr = prefixes.rloc_address(*rloc);
            thread_api
                .send_diagnostic_get(addr, &self.request_tlvs)
                .await?;
        }

        self.last_attempt_at = now_ms;
        self.retries = 0;
        self.set_phase(Phase::Pending);
        Ok(())
    }

    /// `handle_action(action)` — the unicast entry point. `types` is the caller's already-parsed TLV-name
    /// list; this splits it into request/query TLVs, appends `ShortAddress`
    /// if the caller didn't ask for it, and sends one unicast Diagnostic
    /// Get.
    ///
    /// # Errors
    ///
    /// Returns [`BorderRouterError::InvalidState`] if a cycle is already
    /// active, or propagates a transport failure from the send.
    #[instrument(skip(self, thread_api))]
    pub async fn handle_action(
        &mut self,
        thread_api: &dyn ThreadApi,
        dest: Ipv6Addr,
        types: &[TlvType],
        relationship_kind: RelationshipKind,
        action_ref: ActionId,
        now_ms: u64,
    ) -> Result<(), BorderRouterError> {
        if !self.is_idle() {
            return Err(BorderRouterError::InvalidState(
                "collector cycle already active".to_string(),
            ));
        }
        self.relationship_kind = Some(relationship_kind);
        self.action_ref = Some(action_ref);
        self.dest_ip6 = Some(dest);

        let (mut request_tlvs, query_tlvs): (Vec<TlvType>, Vec<TlvType>) =
            types.iter().copied().partition(|t| !t.is_query());
        if !request_tlvs.contains(&TlvType::ShortAddress) {
            request_tlvs.push(TlvType::ShortAddress);
        }
        self.request_tlvs = request_tlvs;
        self.query_tlvs = query_tlvs;

        thread_api
            .send_diagnostic_get(dest, &self.request_tlvs)
            .await?;
        self.last_attempt_at = now_ms;
        self.retries = 0;
        self.set_phase(Phase::Waiting);
        Ok(())
    }

    /// `cancel()` — idempotent: resets both phases to Idle. Any
    /// [`ThreadApiEvent`] that arrives afterwards for this cycle is ignored
    /// by [`Collector::on_event`] since `phase == Idle` at that point.
    pub fn cancel(&mut self) {
        self.phase = Phase::Idle;
        self.dest_ip6 = None;
        self.relationship_kind = None;
        self.action_ref = None;
        self.diag_set.clear();
        self.child_tables.clear();
        self.child_ip6s.clear();
        self.router_neighbors.clear();
    }

    /// Feeds one asynchronously delivered [`ThreadApiEvent`] into the
    /// collector. Late events that arrive after cancellation (`phase ==
    /// Idle`) are silently dropped.
    #[instrument(skip(self, event))]
    pub fn on_event(&mut self, event: ThreadApiEvent, now_ms: u64) {
        if self.is_idle() {
            debug!("dropping stale thread-api event after cancel/finalize");
            return;
        }
        match event {
            ThreadApiEvent::DiagnosticGetResponse { tlvs, .. } => {
                self.update_diag(tlvs, now_ms);
            }
            ThreadApiEvent::DiagnosticGetFailed { .. } => {
                // retry/timeout policy in poll() governs what happens next
            }
            ThreadApiEvent::ChildTableResult {
                router_rloc16,
                entries,
                done,
            } => {
                let state = self
                    .child_tables
                    .entry(router_rloc16)
                    .or_insert_with(SubQuery::fresh);
                state.entries.extend(entries);
                state.update_time = now_ms;
                state.status = if done {
                    SubQueryStatus::Complete
                } else {
                    SubQueryStatus::InFlight
                };
            }
            ThreadApiEvent::ChildIp6Result {
                router_rloc16,
                entries,
                done,
            } => {
                let state = self
                    .child_ip6s
                    .entry(router_rloc16)
                    .or_insert_with(SubQuery::fresh);
                state.entries.extend(entries);
                state.update_time = now_ms;
                state.status = if done {
                    SubQueryStatus::Complete
                } else {
                    SubQueryStatus::InFlight
                };
            }
            ThreadApiEvent::RouterNeighborsResult {
                router_rloc16,
                entries,
                done,
            } => {
                let state = self
                    .router_neighbors
                    .entry(router_rloc16)
                    .or_insert_with(SubQuery::fresh);
                state.entries.extend(entries);
                state.update_time = now_ms;
                state.status = if done {
                    SubQueryStatus::Complete
                } else {
                    SubQueryStatus::InFlight
                };
            }
            ThreadApiEvent::EnergyScanRow(_) => {
                // energy scans are tracked by the action queue's own
                // per-type handler, not the diagnostic collector.
            }
        }
    }

    /// `update_diag` — response merging.
    /// Extracts the `ShortAddress` TLV to find `key = rloc16`; merges
    /// incoming TLVs into the existing set last-writer-wins per type; resets
    /// `start_time`; primes the three query maps for a freshly seen unicast
    /// destination.
    fn update_diag(&mut self, tlvs: Vec<Tlv>, now_ms: u64) {
        let Some(key) = tlvs.iter().find_map(Tlv::as_short_address) else {
            debug!("dropping diagnostic response with no ShortAddress TLV");
            return;
        };
        let is_new = !self.diag_set.contains_key(&key);
        let entry = self.diag_set.entry(key).or_insert_with(|| DiagEntry {
            start_time: now_ms,
            tlvs: Vec::new(),
        });
        merge_tlvs(&mut entry.tlvs, tlvs);
        entry.start_time = now_ms;

        if is_new && self.dest_ip6.is_some() {
            self.child_tables.entry(key).or_insert_with(SubQuery::fresh);
            self.child_ip6s.entry(key).or_insert_with(SubQuery::fresh);
            self.router_neighbors.entry(key).or_insert_with(SubQuery::fresh);
        }

        if matches!(self.phase, Phase::Waiting) {
            self.set_phase(Phase::Pending);
        }
    }

    /// `continue` — the poll decision tree. Invoked
    /// on a timer and on every response callback.
    #[instrument(skip(self, thread_api, collections))]
    pub async fn poll(
        &mut self,
        thread_api: &dyn ThreadApi,
        collections: &mut Collections,
        now_ms: u64,
    ) -> CollectorTick {
        if self.is_idle() {
            return CollectorTick::Idle;
        }
        if self.timeout_at < now_ms {
            return self.finalize(thread_api, collections, false);
        }

        match self.phase {
            Phase::Idle => unreachable!("checked above"),
            Phase::Waiting => {
                if now_ms.saturating_sub(self.last_attempt_at) >= self.retry_delay_ms {
                    if self.retries < self.max_retries {
                        if let Some(dest) = self.dest_ip6 {
                            let _ = thread_api
                                .send_diagnostic_get(dest, &self.request_tlvs)
                                .await;
                        }
                        self.retries += 1;
                        self.last_attempt_at = now_ms;
                    } else {
                        return self.finalize(thread_api, collections, false);
                    }
                }
                CollectorTick::Running
            }
            Phase::Pending => {
                let all_issued = self.handle_next_query(thread_api, now_ms).await;
                if all_issued {
                    self.set_phase(Phase::Done);
                }
                CollectorTick::Running
            }
            Phase::Done => {
                self.discover_ftd_children(thread_api, now_ms).await;
                if self.all_diag_filled() {
                    self.finalize(thread_api, collections, true)
                } else {
                    CollectorTick::Running
                }
            }
        }
    }

    /// `handle_next_query` — iterates the configured query-TLV list and, per
    /// router entry not yet complete, issues the corresponding mesh-diag
    /// query. Returns `true` once every configured sub-query has reached
    /// [`SubQueryStatus::Complete`] for every known router.
    async fn handle_next_query(&mut self, thread_api: &dyn ThreadApi, now_ms: u64) -> bool {
        let routers: Vec<Rloc16> = self
            .diag_set
            .keys()
            .copied()
            .filter(|r| !r.is_child())
            .collect();
        let mut all_done = true;

        for rloc in routers {
            if self.query_tlvs.contains(&TlvType::Children) {
                all_done &= Self::drive_sub_query(
                    &mut self.child_tables,
                    rloc,
                    now_ms,
                    |r| thread_api.query_child_table(r),
                )
                .await;
            }
            if self.query_tlvs.contains(&TlvType::ChildrenIp6) {
                all_done &= Self::drive_sub_query(
                    &mut self.child_ip6s,
                    rloc,
                    now_ms,
                    |r| thread_api.query_child_ip6_addrs(r),
                )
                .await;
            }
            if self.query_tlvs.contains(&TlvType::Neighbors) {
                all_done &= Self::drive_sub_query(
                    &mut self.router_neighbors,
                    rloc,
                    now_ms,
                    |r| thread_api.query_router_neighbors(r),
                )
                .await;
            }
        }
        all_done
    }

    async fn drive_sub_query<T, F, Fut>(
        map: &mut HashMap<Rloc16, SubQuery<T>>,
        rloc: Rloc16,
        now_ms: u64,
        send: F,
    ) -> bool
    where
        F: FnOnce(Rloc16) -> Fut,
        Fut: std::future::Future<Output = Result<(), BorderRouterError>>,
    {
        let state = map.entry(rloc).or_insert_with(SubQuery::fresh);
        match state.status {
            SubQueryStatus::Complete => true,
            SubQueryStatus::InFlight => false,
            SubQueryStatus::NotStarted => {
                // Busy/NoBufs/InvalidArgs: retry next tick, state unchanged
                if send(rloc).await.is_ok() {
                    state.status = SubQueryStatus::InFlight;
                    state.update_time = now_ms;
                }
                false
            }
        }
    }

    /// `query_phase = Done` step: scans `child_tables` for FTD
    /// ("rx-on-when-idle and device-type FTD") children not yet in
    /// `diag_set`, seeds a placeholder entry, and schedules another
    /// Diagnostic Get for each.
    async fn discover_ftd_children(&mut self, thread_api: &dyn ThreadApi, now_ms: u64) {
        let prefixes = thread_api.get_mesh_local_prefix();
        let new_children: Vec<Rloc16> = self
            .child_tables
            .values()
            .flat_map(|state| state.entries.iter())
            .filter(|child| child.is_ftd_full_time())
            .map(|child| child.rloc16)
            .filter(|rloc| !self.diag_set.contains_key(rloc))
            .collect();

        for child_rloc in new_children {
            self.diag_set.insert(
                child_rloc,
                DiagEntry {
                    start_time: now_ms,
                    tlvs: Vec::new(),
                },
            );
            let addr = prefixes.rloc_address(child_rloc);
            let _ = thread_api
                .send_diagnostic_get(addr, &self.request_tlvs)
                .await;
        }
    }

    fn all_diag_filled(&self) -> bool {
        !self.diag_set.is_empty() && self.diag_set.values().all(|e| !e.tlvs.is_empty())
    }

    /// Finalisation: writes results into the
    /// `devices` or `diagnostics` collection, stamps the outcome, and resets
    /// the collector to Idle. Partial results are persisted on timeout as
    /// well as on success.
    fn finalize(
        &mut self,
        thread_api: &dyn ThreadApi,
        collections: &mut Collections,
        success: bool,
    ) -> CollectorTick {
        let relationship_kind = self.relationship_kind;
        let action_ref = self.action_ref;
        let mut last_item_id = None;

        match relationship_kind {
            Some(RelationshipKind::Devices) => {
                let prefixes = thread_api.get_mesh_local_prefix();
                let this_ext = thread_api.this_ext_address();
                let this_node = thread_api.this_node_info();
                for (rloc, entry) in &self.diag_set {
                    if entry.tlvs.is_empty() {
                        continue;
                    }
                    if let Some(id) = fill_device(
                        collections,
                        *rloc,
                        entry,
                        &self.child_tables,
                        &self.child_ip6s,
                        &prefixes,
                        this_ext,
                        &this_node,
                        thread_api,
                    ) {
                        last_item_id = Some(id);
                    }
                }
            }
            Some(RelationshipKind::Diagnostics) => {
                let prefixes = thread_api.get_mesh_local_prefix();
                let this_rloc16 = thread_api.get_rloc16();
                for (rloc, entry) in &self.diag_set {
                    if entry.tlvs.is_empty() {
                        continue;
                    }
                    let id = fill_diagnostic(
                        collections,
                        *rloc,
                        entry,
                        &self.child_tables,
                        &self.child_ip6s,
                        &self.router_neighbors,
                        &prefixes,
                        this_rloc16,
                        thread_api,
                    );
                    last_item_id = Some(id);
                }
            }
            None => {}
        }

        self.cancel();
        CollectorTick::Finished(CollectorOutcome {
            success,
            relationship_kind,
            item_id: last_item_id,
            action_ref,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn fill_device(
    collections: &mut Collections,
    rloc: Rloc16,
    entry: &DiagEntry,
    child_tables: &HashMap<Rloc16, SubQuery<ChildEntry>>,
    child_ip6s: &HashMap<Rloc16, SubQuery<ChildIp6Entry>>,
    prefixes: &crate::ipv6::NetworkPrefixes,
    this_ext: Eui64,
    this_node: &crate::thread_api::ThisNodeInfo,
    thread_api: &dyn ThreadApi,
) -> Option<String> {
    let mut fields = DeviceFields::empty();
    let mut last_id = None;

    for tlv in &entry.tlvs {
        match &tlv.value {
            TlvValue::ExtAddress(addr) => fields.ext_address = *addr,
            TlvValue::ShortAddress(srloc) => {
                fields.role = DeviceRole::from_rloc16(*srloc);
                if matches!(fields.role, DeviceRole::Router) {
                    fields.rx_on_when_idle = true;
                    fields.is_ftd = true;
                    fields.needs_update_forced_false = true;
                    last_id = emit_children(
                        collections,
                        rloc,
                        child_tables,
                        child_ip6s,
                        prefixes,
                        this_ext,
                        this_node,
                    )
                    .or(last_id);
                }
            }
            TlvValue::Eui64(addr) => fields.eui64 = *addr,
            TlvValue::Ip6AddrList(addrs) => {
                let classified = classify_addrs(addrs, prefixes);
                if let Some(iid) = classified.mleid_iid {
                    fields.ml_eid_iid = iid;
                }
                fields.omr_ipv6 = classified.omr;
                fields.hostname = thread_api.lookup_srp_hostname(addrs);
            }
            TlvValue::Opaque(_) => {}
        }
    }

    if fields.ext_address.is_zero() {
        warn!(rloc = %rloc.to_hex4(), "dropping device with no ExtAddress TLV in response");
        return last_id;
    }

    let id = upsert_device(collections, fields, this_ext, this_node);
    Some(id).or(last_id)
}

fn emit_children(
    collections: &mut Collections,
    router_rloc: Rloc16,
    child_tables: &HashMap<Rloc16, SubQuery<ChildEntry>>,
    child_ip6s: &HashMap<Rloc16, SubQuery<ChildIp6Entry>>,
    prefixes: &crate::ipv6::NetworkPrefixes,
    this_ext: Eui64,
    this_node: &crate::thread_api::ThisNodeInfo,
) -> Option<String> {
    let children = child_tables.get(&router_rloc)?;
    let ip6s = child_ip6s.get(&router_rloc);
    let mut last_id = None;

    for child in &children.entries {
        let mut fields = DeviceFields::empty();
        fields.ext_address = child.ext_address;
        fields.role = DeviceRole::Child;
        fields.rx_on_when_idle = child.rx_on_when_idle;
        fields.is_ftd = child.is_ftd;

        if let Some(addrs) = ip6s
            .and_then(|s| s.entries.iter().find(|e| e.rloc16 == child.rloc16))
            .map(|e| e.addrs.as_slice())
        {
            let classified = classify_addrs(addrs, prefixes);
            if let Some(iid) = classified.mleid_iid {
                fields.ml_eid_iid = iid;
            }
            fields.omr_ipv6 = classified.omr;
        }

        last_id = Some(upsert_device(collections, fields, this_ext, this_node));
    }
    last_id
}

fn upsert_device(
    collections: &mut Collections,
    mut fields: DeviceFields,
    this_ext: Eui64,
    this_node: &crate::thread_api::ThisNodeInfo,
) -> String {
    use crate::collections::item::CollectionItem;

    let id = fields.ext_address.to_hex();
    // `created_at`/`uuid` are immutable once set: reuse the existing item's
    // meta, only bumping `updated_at`, rather than minting a fresh one on
    // every upsert.
    let meta = if let Some(existing) = collections.devices.get(&id) {
        let mut merged = existing.fields().clone();
        merged.merge_non_empty(&fields);
        fields = merged;
        let mut meta = existing.meta().clone();
        meta.touch(crate::collections::now());
        meta
    } else {
        crate::collections::item::ItemMeta::new(crate::collections::now())
    };
    let item = if fields.ext_address == this_ext {
        DeviceItem::new_this_device(
            meta,
            fields,
            ThisDeviceInfo {
                border_agent_id: this_node.border_agent_id.clone(),
                border_agent_state: this_node.border_agent_state.clone(),
                leader_partition_id: this_node.leader_data.partition_id,
                leader_data_version: this_node.leader_data.data_version,
                network_name: this_node.network_name.clone(),
                rloc16: this_node.rloc16,
                rloc_address: this_node.rloc_address,
                router_count: this_node.router_count,
            },
        )
    } else {
        DeviceItem::new(meta, fields)
    };
    collections.devices.add(item)
}

#[allow(clippy::too_many_arguments)]
fn fill_diagnostic(
    collections: &mut Collections,
    rloc: Rloc16,
    entry: &DiagEntry,
    child_tables: &HashMap<Rloc16, SubQuery<ChildEntry>>,
    child_ip6s: &HashMap<Rloc16, SubQuery<ChildIp6Entry>>,
    router_neighbors: &HashMap<Rloc16, SubQuery<RouterNeighborEntry>>,
    prefixes: &crate::ipv6::NetworkPrefixes,
    this_rloc16: Rloc16,
    thread_api: &dyn ThreadApi,
) -> String {
    let ip6_list = entry
        .tlvs
        .iter()
        .find_map(Tlv::as_ip6_addr_list)
        .unwrap_or(&[]);
    let service_roles = service_role_flags(ip6_list, prefixes);
    let is_border_router = thread_api.is_border_router_origin(rloc);
    let border_routing_counters = (rloc == this_rloc16).then(|| thread_api.border_routing_counters());

    let item = NetworkDiagnosticsItem {
        meta: crate::collections::item::ItemMeta::new(crate::collections::now()),
        rloc16: rloc,
        tlvs: entry.tlvs.clone(),
        children: child_tables
            .get(&rloc)
            .map(|s| s.entries.clone())
            .unwrap_or_default(),
        children_ip6: child_ip6s
            .get(&rloc)
            .map(|s| s.entries.clone())
            .unwrap_or_default(),
        neighbors: router_neighbors
            .get(&rloc)
            .map(|s| s.entries.clone())
            .unwrap_or_default(),
        service_roles,
        is_border_router,
        border_routing_counters,
    };
    collections
        .diagnostics
        .add(DiagnosticItem::NetworkDiagnostics(item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipv6::NetworkPrefixes;
    use crate::domain::ExtAddress;
    use crate::thread_api::mock::MockThreadApi;
    use crate::thread_api::{RouterInfo, ThisNodeInfo};
    use crate::thread_api::LeaderData;

    fn prefixes() -> NetworkPrefixes {
        NetworkPrefixes {
            mesh_local_prefix: [0xfd, 0x00, 0xde, 0xad, 0xbe, 0xef, 0x00, 0x00],
        }
    }

    fn mock_api() -> MockThreadApi {
        MockThreadApi::new(
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
            prefixes(),
        )
    }

    fn collections() -> Collections {
        Collections::new(200, 200)
    }

    #[tokio::test]
    async fn configure_rejects_when_cycle_active() {
        let api = mock_api();
        let mut collector = Collector::new();
        collector
            .handle_action(
                &api,
                "fd00::1".parse().unwrap(),
                &[TlvType::ExtAddress],
                RelationshipKind::Diagnostics,
                ActionId::generate(),
                0,
            )
            .await
            .unwrap();
        assert!(matches!(
            collector.configure(10_000, 30_000, 1, 5_000, 0),
            Err(BorderRouterError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn unicast_diagnostic_all_requested_tlvs_land_in_diagnostics_collection() {
        let api = mock_api();
        let mut collector = Collector::new();
        collector.configure(10_000, 30_000, 2, 100, 0).unwrap();
        let action_id = ActionId::generate();
        collector
            .handle_action(
                &api,
                "fd00::1".parse().unwrap(),
                &[TlvType::ExtAddress, TlvType::ShortAddress, TlvType::Ip6AddrList],
                RelationshipKind::Diagnostics,
                action_id,
                0,
            )
            .await
            .unwrap();

        collector.on_event(
            ThreadApiEvent::DiagnosticGetResponse {
                from: "fd00::1".parse().unwrap(),
                tlvs: vec![
                    Tlv::ext_address(ExtAddress([0xaa; 8])),
                    Tlv::short_address(Rloc16::new(0x0800)),
                    Tlv::ip6_addr_list(vec![
                        "fd00::1".parse().unwrap(),
                        "fe80::2".parse().unwrap(),
                        "ff02::1".parse().unwrap(),
                    ]),
                ],
            },
            0,
        );

        let mut collections = collections();
        // query_tlvs empty here (no query TLVs requested) so Pending completes immediately
        let tick = collector.poll(&api, &mut collections, 1).await;
        let tick = match tick {
            CollectorTick::Running => collector.poll(&api, &mut collections, 1).await,
            other => other,
        };
        match tick {
            CollectorTick::Finished(outcome) => {
                assert!(outcome.success);
                assert_eq!(outcome.relationship_kind, Some(RelationshipKind::Diagnostics));
                assert_eq!(outcome.action_ref, Some(action_id));
                let id = outcome.item_id.unwrap();
                assert!(collections.diagnostics.get(&id).is_some());
            }
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn device_upsert_preserves_created_at_and_uuid_across_updates() {
        use crate::collections::item::CollectionItem;

        let api = mock_api();
        let mut collections = collections();

        let mut first_cycle = Collector::new();
        first_cycle.configure(10_000, 30_000, 2, 100, 0).unwrap();
        first_cycle
            .handle_action(
                &api,
                "fd00::1".parse().unwrap(),
                &[TlvType::ExtAddress, TlvType::ShortAddress],
                RelationshipKind::Devices,
                ActionId::generate(),
                0,
            )
            .await
            .unwrap();
        first_cycle.on_event(
            ThreadApiEvent::DiagnosticGetResponse {
                from: "fd00::1".parse().unwrap(),
                tlvs: vec![
                    Tlv::ext_address(ExtAddress([0xaa; 8])),
                    Tlv::short_address(Rloc16::new(0x0801)),
                ],
            },
            0,
        );
        let tick = first_cycle.poll(&api, &mut collections, 1).await;
        let tick = match tick {
            CollectorTick::Running => first_cycle.poll(&api, &mut collections, 1).await,
            other => other,
        };
        let id = match tick {
            CollectorTick::Finished(outcome) => outcome.item_id.unwrap(),
            other => panic!("expected Finished, got {other:?}"),
        };
        let first_meta = collections.devices.get(&id).unwrap().meta().clone();

        let mut second_cycle = Collector::new();
        second_cycle.configure(10_000, 30_000, 2, 100, 0).unwrap();
        second_cycle
            .handle_action(
                &api,
                "fd00::1".parse().unwrap(),
                &[TlvType::ExtAddress, TlvType::ShortAddress],
                RelationshipKind::Devices,
                ActionId::generate(),
                1_000,
            )
            .await
            .unwrap();
        second_cycle.on_event(
            ThreadApiEvent::DiagnosticGetResponse {
                from: "fd00::1".parse().unwrap(),
                tlvs: vec![
                    Tlv::ext_address(ExtAddress([0xaa; 8])),
                    Tlv::short_address(Rloc16::new(0x0801)),
                ],
            },
            1_000,
        );
        let tick = second_cycle.poll(&api, &mut collections, 1_001).await;
        let tick = match tick {
            CollectorTick::Running => second_cycle.poll(&api, &mut collections, 1_001).await,
            other => other,
        };
        match tick {
            CollectorTick::Finished(outcome) => assert_eq!(outcome.item_id.unwrap(), id),
            other => panic!("expected Finished, got {other:?}"),
        }

        let second_meta = collections.devices.get(&id).unwrap().meta().clone();
        assert_eq!(second_meta.uuid, first_meta.uuid);
        assert_eq!(second_meta.created_at, first_meta.created_at);
        assert!(second_meta.updated_at >= first_meta.updated_at);
    }

    #[tokio::test]
    async fn retries_then_times_out_with_no_response() {
        let api = mock_api();
        let mut collector = Collector::new();
        collector.configure(200, 30_000, 2, 10, 0).unwrap();
        let dest: Ipv6Addr = "fd00::1".parse().unwrap();
        collector
            .handle_action(
                &api,
                dest,
                &[TlvType::ExtAddress],
                RelationshipKind::Diagnostics,
                ActionId::generate(),
                0,
            )
            .await
            .unwrap();

        let mut collections = collections();
        let mut now = 0u64;
        let mut finished = false;
        for _ in 0..50 {
            now += 20;
            match collector.poll(&api, &mut collections, now).await {
                CollectorTick::Finished(outcome) => {
                    assert!(!outcome.success);
                    finished = true;
                    break;
                }
                CollectorTick::Running | CollectorTick::Idle => {}
            }
        }
        assert!(finished, "expected cycle to time out");
        assert!(api.diagnostic_get_send_count(dest) >= 2, "expected at least one retry");
        assert!(collections.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn discovery_issues_one_diagnostic_get_per_known_router() {
        let api = mock_api();
        api.add_router(
            1,
            RouterInfo {
                rloc16: Rloc16::for_router_id(1),
                ext_address: ExtAddress([0x11; 8]),
            },
        );
        api.add_router(
            2,
            RouterInfo {
                rloc16: Rloc16::for_router_id(2),
                ext_address: ExtAddress([0x22; 8]),
            },
        );
        let mut collector = Collector::new();
        collector.configure(10_000, 30_000, 1, 5_000, 0).unwrap();
        collector.start_discovery(&api, 0).await.unwrap();

        let prefixes = prefixes();
        let dest1 = prefixes.rloc_address(Rloc16::for_router_id(1));
        let dest2 = prefixes.rloc_address(Rloc16::for_router_id(2));
        assert_eq!(api.diagnostic_get_send_count(dest1), 1);
        assert_eq!(api.diagnostic_get_send_count(dest2), 1);
    }

    #[tokio::test]
    async fn ftd_child_is_merged_in_and_requeried_for_a_second_diagnostic_get() {
        use crate::thread_api::{ChildEntry, ChildIp6Entry};

        let api = mock_api();
        let mut collector = Collector::new();
        collector.configure(10_000, 30_000, 2, 100, 0).unwrap();
        let router_rloc = Rloc16::for_router_id(2);
        let router_addr = prefixes().rloc_address(router_rloc);

        collector
            .handle_action(
                &api,
                router_addr,
                &[TlvType::ShortAddress, TlvType::Children, TlvType::ChildrenIp6],
                RelationshipKind::Devices,
                ActionId::generate(),
                0,
            )
            .await
            .unwrap();

        // Router responds, identifying itself at `router_rloc`.
        collector.on_event(
            ThreadApiEvent::DiagnosticGetResponse {
                from: router_addr,
                tlvs: vec![
                    Tlv::ext_address(ExtAddress([0x02; 8])),
                    Tlv::short_address(router_rloc),
                ],
            },
            0,
        );

        let mut collections = collections();
        // Pending -> issues query_child_table/query_child_ip6_addrs for the router.
        assert!(matches!(
            collector.poll(&api, &mut collections, 1).await,
            CollectorTick::Running
        ));

        let child_rloc = Rloc16::new(0x0801);
        collector.on_event(
            ThreadApiEvent::ChildTableResult {
                router_rloc16: router_rloc,
                entries: vec![ChildEntry {
                    rloc16: child_rloc,
                    ext_address: ExtAddress([0x77; 8]),
                    rx_on_when_idle: true,
                    is_ftd: true,
                }],
                done: true,
            },
            1,
        );
        collector.on_event(
            ThreadApiEvent::ChildIp6Result {
                router_rloc16: router_rloc,
                entries: vec![ChildIp6Entry {
                    rloc16: child_rloc,
                    addrs: vec![
                        prefixes().mleid(ExtAddress([0, 0, 0, 0, 0, 0, 0, 0x77])),
                        "fe80::77".parse().unwrap(),
                    ],
                }],
                done: true,
            },
            1,
        );

        // Pending -> query sub-queries now complete -> phase advances to Done,
        // which schedules a second Diagnostic Get against the FTD child.
        assert!(matches!(
            collector.poll(&api, &mut collections, 2).await,
            CollectorTick::Running
        ));
        assert_eq!(api.diagnostic_get_send_count(prefixes().rloc_address(child_rloc)), 1);

        // Let the child's own Diagnostic Get come back so the cycle can finish.
        collector.on_event(
            ThreadApiEvent::DiagnosticGetResponse {
                from: prefixes().rloc_address(child_rloc),
                tlvs: vec![
                    Tlv::ext_address(ExtAddress([0x77; 8])),
                    Tlv::short_address(child_rloc),
                ],
            },
            3,
        );

        let outcome = match collector.poll(&api, &mut collections, 3).await {
            CollectorTick::Finished(outcome) => outcome,
            other => panic!("expected Finished, got {other:?}"),
        };
        assert!(outcome.success);

        let child = collections
            .devices
            .get(&ExtAddress([0x77; 8]).to_hex())
            .expect("child device item inserted");
        assert!(matches!(child, DeviceItem::Device { .. }));
        assert_eq!(child.fields().role, DeviceRole::Child);
        assert_eq!(child.fields().ml_eid_iid, ExtAddress([0, 0, 0, 0, 0, 0, 0, 0x77]));
        assert!(child.fields().omr_ipv6.is_none());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut collector = Collector::new();
        collector.cancel();
        collector.cancel();
        assert!(collector.is_idle());
    }

    #[test]
    fn stale_events_after_cancel_are_dropped() {
        let mut collector = Collector::new();
        collector.cancel();
        collector.on_event(
            ThreadApiEvent::DiagnosticGetResponse {
                from: "fd00::1".parse().unwrap(),
                tlvs: vec![],
            },
            0,
        );
        assert!(collector.is_idle());
    }
}
