//! Shared application state and the background tick loop: one event loop
//! owns the collector, the action queue, and both collections, while the
//! REST handlers only enqueue actions and read collections.
//!
//! The handlers and the tick loop share one [`SharedState`]
//! (`Arc<tokio::sync::Mutex<AppState>>`), a single cooperative lock rather
//! than per-field locks, since every tick touches most of the fields
//! together.

use crate::actions::ActionQueue;
use crate::actions::handlers::{ActionContext, EnergyScanState};
use crate::allowlist::{AllowList, Commissioner};
use crate::collections::Collections;
use crate::collector::Collector;
use crate::config::BorderRouterConfig;
use crate::thread_api::{ThreadApi, ThreadApiEvent};
use crate::time::SharedTimeProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

/// Everything one running control plane needs, guarded by a single
/// cooperative lock.
pub struct AppState {
    /// Runtime configuration, fixed for the process's lifetime.
    pub config: BorderRouterConfig,
    /// Adapter over the Thread stack.
    pub thread_api: Arc<dyn ThreadApi>,
    /// Commissioner utility seam.
    pub commissioner: Arc<dyn Commissioner>,
    /// The mesh network-diagnostic collector.
    pub collector: Collector,
    /// The `devices`/`diagnostics` collections.
    pub collections: Collections,
    /// The action queue.
    pub actions: ActionQueue,
    /// Pending joiners.
    pub allow_list: AllowList,
    /// The single concurrently-active energy scan, if any.
    pub energy_scan: EnergyScanState,
    /// Clock used for tick timestamps and, by the collection API's
    /// synchronous discovery endpoints, for bounding how long a request
    /// waits on a collector cycle.
    pub time_provider: SharedTimeProvider,
}

impl AppState {
    /// Builds the initial state for a fresh process.
    #[must_use]
    pub fn new(
        config: BorderRouterConfig,
        thread_api: Arc<dyn ThreadApi>,
        commissioner: Arc<dyn Commissioner>,
        time_provider: SharedTimeProvider,
    ) -> Self {
        let actions = ActionQueue::new(config.task_queue_max.into_inner());
        let collections = Collections::new(
            config.max_devices_items.into_inner(),
            config.max_diag_items.into_inner(),
        );
        Self {
            config,
            thread_api,
            commissioner,
            collector: Collector::new(),
            collections,
            actions,
            allow_list: AllowList::new(),
            energy_scan: EnergyScanState::new(),
            time_provider,
        }
    }
}

/// Shared, lock-guarded application state.
pub type SharedState = Arc<Mutex<AppState>>;

/// Runs the action-queue/collector tick loop forever, until the
/// process exits. Spawned once from `main`.
#[instrument(skip(state))]
pub async fn run_tick_loop(state: SharedState) {
    let period_ms = state.lock().await.config.tick_period_ms.into_inner();
    let mut interval = tokio::time::interval(Duration::from_millis(period_ms));
    loop {
        interval.tick().await;
        let mut guard = state.lock().await;
        let now_ms = guard.time_provider.now_ms();
        let AppState {
            config,
            thread_api,
            collector,
            collections,
            actions,
            allow_list,
            commissioner,
            energy_scan,
            ..
        } = &mut *guard;
        for event in thread_api.poll_events() {
            match event {
                ThreadApiEvent::EnergyScanRow(row) => energy_scan.push_row(row),
                other => collector.on_event(other, now_ms),
            }
        }
        for event in commissioner.poll_joiner_events() {
            allow_list.apply_event(&event);
        }

        let mut stop_requests = Vec::new();
        let mut ctx = ActionContext {
            thread_api: thread_api.as_ref(),
            collector,
            collections,
            allow_list,
            commissioner: commissioner.as_ref(),
            energy_scan,
            stop_requests: &mut stop_requests,
            config: &*config,
        };
        actions.tick(&mut ctx, now_ms).await;
    }
}
