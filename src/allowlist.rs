//! Allow-list / commissioner gating: tracks pending joiners
//! and their lifecycle, gates the commissioner's active state, and bridges
//! joiner events into action completion.
//!
//! The allow-list is modeled as an owned, insertion-ordered `Vec`:
//! membership tests are linear, which is fine given the small
//! per-network joiner cardinality.

use crate::domain::ActionId;
use crate::error::BorderRouterError;
use async_trait::async_trait;

/// An allow-list entry's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinerState {
    /// Entry created, commissioner not yet asked to add the joiner.
    New,
    /// `AddJoiner` issued; waiting for the joiner to attempt to join.
    PendingJoiner,
    /// The joiner began a DTLS handshake (`Start` event).
    JoinAttempted,
    /// The joiner completed commissioning (`Finalize` event).
    Joined,
    /// The joiner was removed while mid-handshake (`Removed` while
    /// `JoinAttempted`).
    JoinFailed,
    /// The joiner was removed while still pending (`Removed` while
    /// `PendingJoiner`), e.g. its timeout elapsed with no attempt.
    Expired,
}

impl JoinerState {
    /// True for the three terminal states an add-thread-device action's
    /// `evaluate` step treats as done.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Joined | Self::JoinFailed | Self::Expired)
    }
}

/// Joiner lifecycle events delivered by the commissioner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinerEvent {
    /// The joiner began a DTLS handshake.
    Start {
        /// The joiner's EUI-64, 16 lowercase hex characters.
        eui64: String,
    },
    /// The joiner completed commissioning.
    Finalize {
        /// The joiner's EUI-64.
        eui64: String,
    },
    /// The joiner was removed from the commissioner's active set.
    Removed {
        /// The joiner's EUI-64.
        eui64: String,
    },
}

/// One tracked joiner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowListEntry {
    /// 16-hex-char EUI-64.
    pub eui64: String,
    /// The add-thread-device action this entry is bound to.
    pub action_id: ActionId,
    /// Joiner timeout, in seconds.
    pub timeout_s: u64,
    /// Joiner PSK-d.
    pub pskd: String,
    /// Current lifecycle state.
    pub state: JoinerState,
}

/// The commissioner's own coarse state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissionerState {
    /// No petition outstanding; no joiners accepted.
    Inactive,
    /// `Commissioner Start` requested; petition in flight.
    Petitioning,
    /// Petition accepted; joiners may be added.
    Active,
}

/// External collaborator seam for the commissioner utility (out of scope
///; modeled as a trait so the allow-list can be tested
/// without a real commissioner process).
#[async_trait]
pub trait Commissioner: Send + Sync {
    /// Requests commissioner start (`Petition -> Active`, callback driven).
    ///
    /// # Errors
    ///
    /// Returns [`BorderRouterError::Busy`] if a petition is already in
    /// flight, or [`BorderRouterError::TransportFail`] if the request could
    /// not be sent.
    async fn start(&self) -> Result<(), BorderRouterError>;

    /// Requests commissioner stop, posted once the allow-list drops to zero
    /// non-terminal entries.
    ///
    /// # Errors
    ///
    /// Returns [`BorderRouterError::TransportFail`] if the request could
    /// not be sent.
    async fn stop(&self) -> Result<(), BorderRouterError>;

    /// Issues `AddJoiner` for a newly tracked entry.
    ///
    /// # Errors
    ///
    /// Returns [`BorderRouterError::InvalidState`] if the commissioner is
    /// not currently active.
    async fn add_joiner(
        &self,
        eui64: &str,
        pskd: &str,
        timeout_s: u64,
    ) -> Result<(), BorderRouterError>;

    /// Removes a joiner, e.g. when superseding a stale entry for the same
    /// EUI-64.
    ///
    /// # Errors
    ///
    /// See [`Commissioner::add_joiner`].
    async fn remove_joiner(&self, eui64: &str) -> Result<(), BorderRouterError>;

    /// Current coarse commissioner state.
    fn state(&self) -> CommissionerState;

    /// Drains every [`JoinerEvent`] delivered since the last call
    /// (non-blocking). The owning loop calls this once per tick and applies
    /// each event to the allow-list.
    fn poll_joiner_events(&self) -> Vec<JoinerEvent>;
}

/// The allow-list: tracks pending joiners and gates the commissioner's
/// active state.
#[derive(Debug, Default)]
pub struct AllowList {
    entries: Vec<AllowListEntry>,
}

impl AllowList {
    /// Builds an empty allow-list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the entry for `eui64`, if tracked.
    #[must_use]
    pub fn find(&self, eui64: &str) -> Option<&AllowListEntry> {
        self.entries.iter().find(|e| e.eui64 == eui64)
    }

    /// Finds the entry for `eui64`, mutably.
    pub fn find_mut(&mut self, eui64: &str) -> Option<&mut AllowListEntry> {
        self.entries.iter_mut().find(|e| e.eui64 == eui64)
    }

    /// Finds the entry bound to `action_id`, if any.
    #[must_use]
    pub fn find_by_action(&self, action_id: ActionId) -> Option<&AllowListEntry> {
        self.entries.iter().find(|e| e.action_id == action_id)
    }

    /// Count of entries not yet in a terminal state.
    #[must_use]
    pub fn non_terminal_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.state.is_terminal()).count()
    }

    /// Adds a new tracked joiner in [`JoinerState::New`].
    pub fn add(&mut self, eui64: String, action_id: ActionId, timeout_s: u64, pskd: String) {
        self.entries.push(AllowListEntry {
            eui64,
            action_id,
            timeout_s,
            pskd,
            state: JoinerState::New,
        });
    }

    /// Removes the entry for `eui64`, e.g. on `clean` for a completed or
    /// stopped add-thread-device action.
    pub fn remove(&mut self, eui64: &str) {
        self.entries.retain(|e| e.eui64 != eui64);
    }

    /// Marks an entry as having had `AddJoiner` issued.
    pub fn mark_pending(&mut self, eui64: &str) {
        if let Some(entry) = self.find_mut(eui64) {
            entry.state = JoinerState::PendingJoiner;
        }
    }

    /// Applies a joiner event's state transition:
    /// `Start -> JoinAttempted`, `Finalize -> Joined`, `Removed` while
    /// `PendingJoiner -> Expired`, `Removed` while `JoinAttempted ->
    /// JoinFailed`.
    pub fn apply_event(&mut self, event: &JoinerEvent) {
        let (eui64, transition): (&str, fn(JoinerState) -> Option<JoinerState>) = match event {
            JoinerEvent::Start { eui64 } => (eui64, |s| {
                matches!(s, JoinerState::PendingJoiner).then_some(JoinerState::JoinAttempted)
            }),
            JoinerEvent::Finalize { eui64 } => {
                (eui64, |_| Some(JoinerState::Joined))
            }
            JoinerEvent::Removed { eui64 } => (eui64, |s| match s {
                JoinerState::PendingJoiner => Some(JoinerState::Expired),
                JoinerState::JoinAttempted => Some(JoinerState::JoinFailed),
                _ => None,
            }),
        };
        if let Some(entry) = self.find_mut(eui64) {
            if let Some(next) = transition(entry.state) {
                entry.state = next;
            }
        }
    }
}

/// An in-memory [`Commissioner`], used both by tests and as the
/// commissioner-utility stand-in the binary wires up by default — the real
/// commissioner/joiner DTLS exchange is out of scope here, mirroring
/// [`crate::thread_api::mock::MockThreadApi`]'s role for the NCP/CoAP stack.
pub mod mock {
    use super::{Commissioner, CommissionerState, JoinerEvent};
    use crate::error::BorderRouterError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory [`Commissioner`] for allow-list/handler tests.
    #[derive(Debug, Default)]
    pub struct MockCommissioner {
        state: Mutex<CommissionerState>,
        pub joiners_added: Mutex<Vec<String>>,
        joiner_events: Mutex<Vec<JoinerEvent>>,
    }

    impl MockCommissioner {
        #[must_use]
        pub fn new() -> Self {
            Self {
                state: Mutex::new(CommissionerState::Inactive),
                joiners_added: Mutex::new(Vec::new()),
                joiner_events: Mutex::new(Vec::new()),
            }
        }

        pub fn set_state(&self, state: CommissionerState) {
            *self.state.lock().unwrap() = state;
        }

        /// Queues a joiner lifecycle event for the owning loop to apply on
        /// its next tick.
        pub fn push_joiner_event(&self, event: JoinerEvent) {
            self.joiner_events.lock().unwrap().push(event);
        }
    }

    #[async_trait]
    impl Commissioner for MockCommissioner {
        async fn start(&self) -> Result<(), BorderRouterError> {
            *self.state.lock().unwrap() = CommissionerState::Active;
            Ok(())
        }

        async fn stop(&self) -> Result<(), BorderRouterError> {
            *self.state.lock().unwrap() = CommissionerState::Inactive;
            Ok(())
        }

        async fn add_joiner(
            &self,
            eui64: &str,
            _pskd: &str,
            _timeout_s: u64,
        ) -> Result<(), BorderRouterError> {
            self.joiners_added.lock().unwrap().push(eui64.to_string());
            Ok(())
        }

        async fn remove_joiner(&self, _eui64: &str) -> Result<(), BorderRouterError> {
            Ok(())
        }

        fn state(&self) -> CommissionerState {
            *self.state.lock().unwrap()
        }

        fn poll_joiner_events(&self) -> Vec<JoinerEvent> {
            std::mem::take(&mut self.joiner_events.lock().unwrap())
        }
    }
}

impl Default for CommissionerState {
    fn default() -> Self {
        Self::Inactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ActionId;

    #[test]
    fn start_then_removed_while_pending_expires() {
        let mut list = AllowList::new();
        list.add("aabbccddeeff0011".into(), ActionId::generate(), 120, "PASSWORD1".into());
        list.mark_pending("aabbccddeeff0011");
        list.apply_event(&JoinerEvent::Removed {
            eui64: "aabbccddeeff0011".into(),
        });
        assert_eq!(list.find("aabbccddeeff0011").unwrap().state, JoinerState::Expired);
    }

    #[test]
    fn start_then_finalize_joins() {
        let mut list = AllowList::new();
        list.add("aabbccddeeff0011".into(), ActionId::generate(), 120, "PASSWORD1".into());
        list.mark_pending("aabbccddeeff0011");
        list.apply_event(&JoinerEvent::Start {
            eui64: "aabbccddeeff0011".into(),
        });
        assert_eq!(
            list.find("aabbccddeeff0011").unwrap().state,
            JoinerState::JoinAttempted
        );
        list.apply_event(&JoinerEvent::Finalize {
            eui64: "aabbccddeeff0011".into(),
        });
        assert_eq!(list.find("aabbccddeeff0011").unwrap().state, JoinerState::Joined);
    }

    #[test]
    fn removed_while_join_attempted_fails() {
        let mut list = AllowList::new();
        list.add("aabbccddeeff0011".into(), ActionId::generate(), 120, "PASSWORD1".into());
        list.mark_pending("aabbccddeeff0011");
        list.apply_event(&JoinerEvent::Start {
            eui64: "aabbccddeeff0011".into(),
        });
        list.apply_event(&JoinerEvent::Removed {
            eui64: "aabbccddeeff0011".into(),
        });
        assert_eq!(list.find("aabbccddeeff0011").unwrap().state, JoinerState::JoinFailed);
    }

    #[test]
    fn non_terminal_count_drops_to_zero_once_all_terminal() {
        let mut list = AllowList::new();
        list.add("aabbccddeeff0011".into(), ActionId::generate(), 120, "PASSWORD1".into());
        assert_eq!(list.non_terminal_count(), 1);
        list.find_mut("aabbccddeeff0011").unwrap().state = JoinerState::Joined;
        assert_eq!(list.non_terminal_count(), 0);
    }
}
