//! Process-wide reactive call state
//!
//! [`CallStore`] holds the calls currently in progress, the historical call
//! log, the UI selection, the dial-pad flag, and the last global error. It
//! is mutated only through its action methods; the call manager drives all
//! call-state mutations, UI intents may only touch selection and dial-pad
//! visibility. Each action takes the single write lock, so actions are
//! atomic, non-interleaved reaction steps.
//!
//! Consumers that want to react to changes subscribe to the store's update
//! feed:
//!
//! ```rust,no_run
//! # use calldesk_core::store::CallStore;
//! # async fn example(store: &CallStore) {
//! let mut updates = store.subscribe();
//! while let Ok(update) = updates.recv().await {
//!     println!("store changed: {:?}", update);
//! }
//! # }
//! ```

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::call::{Call, CallHangupReason};
use crate::error::VoipError;

/// Change notification emitted after a store action commits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreUpdate {
    ActiveCallsChanged,
    CallLogChanged,
    SelectionChanged,
    ErrorChanged,
    DialPadChanged,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Calls not yet in a terminal status
    active_calls: Vec<Call>,
    /// Terminal calls, newest first
    call_log: Vec<Call>,
    /// Call the UI is currently showing controls for
    selected_call_id: Option<String>,
    /// Last manager/adapter-global error, for UI display
    current_error: Option<VoipError>,
    /// Whether the dial pad overlay is open
    dial_pad_open: bool,
}

/// Reactive state container for in-progress and historical calls
#[derive(Debug)]
pub struct CallStore {
    state: RwLock<StoreState>,
    update_tx: broadcast::Sender<StoreUpdate>,
}

impl CallStore {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(crate::events::EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            update_tx,
        }
    }

    /// Subscribe to store change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.update_tx.subscribe()
    }

    fn notify(&self, update: StoreUpdate) {
        // No receivers is fine; the store does not care who listens.
        let _ = self.update_tx.send(update);
    }

    /// Merge-upsert a call into the active set
    ///
    /// Merges by id, preserving fields the incoming snapshot does not
    /// carry. If the merged result is terminal the entry is routed straight
    /// to the log instead of staying active - a safety net mirroring the
    /// manager's own finalize path. When exactly one active call exists and
    /// none is selected, it becomes the UI selection.
    pub async fn add_or_update_active_call(&self, call: Call) {
        let mut state = self.state.write().await;

        let merged = match state.active_calls.iter_mut().find(|c| c.id == call.id) {
            Some(existing) => {
                existing.merge_from(&call);
                existing.clone()
            }
            None => {
                if state.call_log.iter().any(|c| c.id == call.id) {
                    warn!(call_id = %call.id, status = ?call.status,
                        "ignoring update for a call already finalized");
                    return;
                }
                state.active_calls.push(call.clone());
                call
            }
        };

        if merged.status.is_terminal() {
            debug!(call_id = %merged.id, status = ?merged.status,
                "active-call update carried a terminal status, moving to log");
            Self::finalize_locked(&mut state, merged, None);
            drop(state);
            self.notify(StoreUpdate::ActiveCallsChanged);
            self.notify(StoreUpdate::CallLogChanged);
            return;
        }

        if state.selected_call_id.is_none() && state.active_calls.len() == 1 {
            state.selected_call_id = Some(merged.id.clone());
            drop(state);
            self.notify(StoreUpdate::ActiveCallsChanged);
            self.notify(StoreUpdate::SelectionChanged);
            return;
        }

        drop(state);
        self.notify(StoreUpdate::ActiveCallsChanged);
    }

    /// Move a call to the log, completing its terminal bookkeeping
    ///
    /// The authoritative finalize path. Removes the active entry (merging
    /// the incoming terminal snapshot over it), ensures `end_time` and
    /// `duration_seconds`, upserts into the log newest-first, and clears
    /// selection plus the dial-pad flag when the finalized call was
    /// selected. Finalizing a call already in the log is a no-op returning
    /// the logged record with `false`, so a duplicate terminal event cannot
    /// rewrite history or double side effects.
    pub async fn finalize_call(
        &self,
        incoming: Call,
        reason: Option<CallHangupReason>,
    ) -> (Call, bool) {
        let mut state = self.state.write().await;

        if let Some(logged) = state.call_log.iter().find(|c| c.id == incoming.id) {
            debug!(call_id = %incoming.id, "call already finalized, ignoring duplicate terminal event");
            return (logged.clone(), false);
        }

        let finalized = Self::finalize_locked(&mut state, incoming, reason);
        drop(state);
        self.notify(StoreUpdate::ActiveCallsChanged);
        self.notify(StoreUpdate::CallLogChanged);
        (finalized, true)
    }

    fn finalize_locked(
        state: &mut StoreState,
        incoming: Call,
        reason: Option<CallHangupReason>,
    ) -> Call {
        let mut call = match state.active_calls.iter().position(|c| c.id == incoming.id) {
            Some(index) => {
                let mut existing = state.active_calls.remove(index);
                existing.merge_from(&incoming);
                existing
            }
            None => incoming,
        };
        call.finalize(reason);

        if state.selected_call_id.as_deref() == Some(call.id.as_str()) {
            state.selected_call_id = None;
            state.dial_pad_open = false;
        }

        // Both callers bail out earlier when the id is already logged.
        state.call_log.insert(0, call.clone());
        call
    }

    /// Upsert a terminal call into the log, newest first
    pub async fn add_ended_call_to_log(&self, call: Call) {
        let mut state = self.state.write().await;
        match state.call_log.iter_mut().find(|c| c.id == call.id) {
            Some(existing) => *existing = call,
            None => state.call_log.insert(0, call),
        }
        drop(state);
        self.notify(StoreUpdate::CallLogChanged);
    }

    /// Set the mute flag on an active call (manager-tracked, not a status)
    pub async fn set_call_muted(&self, call_id: &str, muted: bool) {
        let mut state = self.state.write().await;
        if let Some(call) = state.active_calls.iter_mut().find(|c| c.id == call_id) {
            call.is_muted = Some(muted);
            drop(state);
            self.notify(StoreUpdate::ActiveCallsChanged);
        }
    }

    /// UI intent: select a call (or clear the selection)
    pub async fn set_selected_call(&self, call_id: Option<String>) {
        let mut state = self.state.write().await;
        state.selected_call_id = call_id;
        drop(state);
        self.notify(StoreUpdate::SelectionChanged);
    }

    /// UI intent: open or close the dial pad
    pub async fn set_dial_pad_open(&self, open: bool) {
        let mut state = self.state.write().await;
        state.dial_pad_open = open;
        drop(state);
        self.notify(StoreUpdate::DialPadChanged);
    }

    /// Record a global (non-call-scoped) error for UI display
    pub async fn set_error(&self, error: VoipError) {
        let mut state = self.state.write().await;
        state.current_error = Some(error);
        drop(state);
        self.notify(StoreUpdate::ErrorChanged);
    }

    /// Clear the global error
    pub async fn clear_error(&self) {
        let mut state = self.state.write().await;
        state.current_error = None;
        drop(state);
        self.notify(StoreUpdate::ErrorChanged);
    }

    // ===== SNAPSHOT GETTERS =====

    /// Snapshot of the calls currently in progress
    pub async fn active_calls(&self) -> Vec<Call> {
        self.state.read().await.active_calls.clone()
    }

    /// Snapshot of one active call by id
    pub async fn active_call(&self, call_id: &str) -> Option<Call> {
        self.state
            .read()
            .await
            .active_calls
            .iter()
            .find(|c| c.id == call_id)
            .cloned()
    }

    /// Snapshot of the historical log, newest first
    pub async fn call_log(&self) -> Vec<Call> {
        self.state.read().await.call_log.clone()
    }

    /// Whether the call is present in the log
    pub async fn is_in_log(&self, call_id: &str) -> bool {
        self.state
            .read()
            .await
            .call_log
            .iter()
            .any(|c| c.id == call_id)
    }

    /// Currently selected call id, if any
    pub async fn selected_call_id(&self) -> Option<String> {
        self.state.read().await.selected_call_id.clone()
    }

    /// Last recorded global error, if any
    pub async fn current_error(&self) -> Option<VoipError> {
        self.state.read().await.current_error.clone()
    }

    /// Whether the dial pad overlay is open
    pub async fn is_dial_pad_open(&self) -> bool {
        self.state.read().await.dial_pad_open
    }
}

impl Default for CallStore {
    fn default() -> Self {
        Self::new()
    }
}
