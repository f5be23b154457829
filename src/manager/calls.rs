//! Public call operations for the call manager
//!
//! These are the methods the UI layer calls: start, answer, reject, end,
//! mute, hold, and DTMF. Every operation is routed to the owning adapter
//! through the session-ownership map, and every adapter invocation is
//! guarded so an unexpected panic inside a backend surfaces as a typed
//! `ADAPTER_EXCEPTION` instead of tearing down the caller.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info};

use crate::adapter::VoipAdapter;
use crate::call::{Call, CallContext, CallSession};
use crate::error::{VoipError, VoipErrorCode, VoipResult};

impl super::CallManager {
    /// Start an outbound call to `target_number`
    ///
    /// Selects an adapter (preferred system, then the number's routing
    /// metadata, then first registered), initiates the call, records the
    /// session's owner, and seeds the store's active entry with the
    /// caller-supplied contact and subject context.
    pub async fn start_call(
        &self,
        target_number: &str,
        context: CallContext,
    ) -> VoipResult<CallSession> {
        let adapter = self.select_adapter(&context).await?;
        let system = adapter.system_name().to_string();

        info!(target = %target_number, system = %system, "starting outbound call");
        let session = self
            .guarded(&system, adapter.initiate_call(target_number, &context))
            .await?;

        self.session_owners
            .insert(session.session_id.clone(), system);
        let call = Call::from_session(&session).with_context(&context);
        self.store.add_or_update_active_call(call).await;

        // The session's terminal event can race initiation (a backend
        // disconnect, an instantly dropped call). Ownership entries are
        // removed at finalization, so one inserted after that point would
        // never be cleaned up; re-check and release it here.
        if self.store.is_in_log(&session.session_id).await {
            self.session_owners.remove(&session.session_id);
        }

        Ok(session)
    }

    /// Answer an inbound call currently ringing
    pub async fn answer_call(&self, session_id: &str) -> VoipResult<()> {
        let (system, adapter) = self.route(session_id)?;
        self.guarded(&system, adapter.answer_call(session_id)).await
    }

    /// Reject an inbound call currently ringing
    pub async fn reject_call(&self, session_id: &str) -> VoipResult<()> {
        let (system, adapter) = self.route(session_id)?;
        self.guarded(&system, adapter.reject_call(session_id)).await
    }

    /// End a call
    ///
    /// Idempotent at this layer: ending a session that is already in the
    /// call log is a benign no-op, whether the ownership entry is gone or
    /// the adapter has already released the session.
    pub async fn end_call(&self, session_id: &str) -> VoipResult<()> {
        let (system, adapter) = match self.route(session_id) {
            Ok(routed) => routed,
            Err(err) => {
                if self.store.is_in_log(session_id).await {
                    debug!(session_id = %session_id, "end requested for already-ended call, ignoring");
                    return Ok(());
                }
                return Err(err);
            }
        };

        match self.guarded(&system, adapter.end_call(session_id)).await {
            Ok(()) => Ok(()),
            Err(err)
                if err.code == VoipErrorCode::SessionNotFound
                    && self.store.is_in_log(session_id).await =>
            {
                debug!(session_id = %session_id, "adapter already released ended session, ignoring");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Mute or unmute an active call
    ///
    /// On success the store's active entry reflects the new mute flag.
    pub async fn mute_call(&self, session_id: &str, mute: bool) -> VoipResult<()> {
        let (system, adapter) = self.route(session_id)?;
        self.guarded(&system, adapter.mute_call(session_id, mute))
            .await?;
        self.store.set_call_muted(session_id, mute).await;
        Ok(())
    }

    /// Hold or resume an active call
    ///
    /// The resulting `on_hold`/`answered` status change arrives through the
    /// adapter's event stream and is projected into the store from there.
    pub async fn hold_call(&self, session_id: &str, hold: bool) -> VoipResult<()> {
        let (system, adapter) = self.route(session_id)?;
        self.guarded(&system, adapter.hold_call(session_id, hold))
            .await
    }

    /// Send a DTMF tone on an answered call
    pub async fn send_dtmf(&self, session_id: &str, tone: &str) -> VoipResult<()> {
        let (system, adapter) = self.route(session_id)?;
        self.guarded(&system, adapter.send_dtmf(session_id, tone))
            .await
    }

    /// Resolve the owning adapter for a session
    fn route(&self, session_id: &str) -> VoipResult<(String, Arc<dyn VoipAdapter>)> {
        let system = self
            .session_owners
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| VoipError::session_adapter_not_found(session_id))?;
        let adapter = self
            .adapter(&system)
            .ok_or_else(|| VoipError::session_adapter_not_found(session_id))?;
        Ok((system, adapter))
    }

    #[cfg(test)]
    pub(crate) fn owns_session(&self, session_id: &str) -> bool {
        self.session_owners.contains_key(session_id)
    }

    /// Run an adapter call, converting an escaped panic into a typed error
    ///
    /// Expected domain failures come back as `Err(VoipError)` from the
    /// adapter itself; this guard only exists for bugs inside a backend.
    pub(crate) async fn guarded<T>(
        &self,
        system: &str,
        operation: impl std::future::Future<Output = VoipResult<T>>,
    ) -> VoipResult<T> {
        match std::panic::AssertUnwindSafe(operation).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(system = %system, detail = %detail, "adapter call panicked");
                Err(VoipError::adapter_exception(system, detail))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use crate::adapter::VoipAdapter;
    use crate::call::{Call, CallContext, CallHangupReason, CallSession, CallStatus};
    use crate::error::{VoipError, VoipResult};
    use crate::events::{AdapterEvent, EVENT_CHANNEL_CAPACITY};
    use crate::manager::{CallManager, CallManagerConfig};
    use crate::notes::NullNoteClient;
    use crate::store::CallStore;

    /// Backend whose calls drop and finalize before initiation returns
    struct InstantDropAdapter {
        event_tx: broadcast::Sender<AdapterEvent>,
    }

    impl InstantDropAdapter {
        fn new() -> Self {
            let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
            Self { event_tx }
        }
    }

    #[async_trait]
    impl VoipAdapter for InstantDropAdapter {
        fn system_name(&self) -> &str {
            "instant-drop"
        }

        async fn is_configured(&self) -> bool {
            true
        }

        async fn connect(&self) -> VoipResult<()> {
            Ok(())
        }

        async fn disconnect(&self) -> VoipResult<()> {
            Ok(())
        }

        async fn initiate_call(
            &self,
            target_number: &str,
            _context: &CallContext,
        ) -> VoipResult<CallSession> {
            let mut session = CallSession::new_outbound(
                "drop-1".to_string(),
                "instant-drop",
                "crm-user",
                target_number,
                None,
            );
            session.transition(CallStatus::Disconnected);

            let mut call = Call::from_session(&session);
            call.finalize(Some(CallHangupReason::RemoteHangup));
            let _ = self.event_tx.send(AdapterEvent::Disconnected {
                call,
                reason: CallHangupReason::RemoteHangup,
                timestamp: chrono::Utc::now(),
            });

            // Leave room for the terminal event to be projected before the
            // session is handed back to the caller.
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(session)
        }

        async fn answer_call(&self, session_id: &str) -> VoipResult<()> {
            Err(VoipError::session_not_found(session_id))
        }

        async fn reject_call(&self, session_id: &str) -> VoipResult<()> {
            Err(VoipError::session_not_found(session_id))
        }

        async fn end_call(&self, session_id: &str) -> VoipResult<()> {
            Err(VoipError::session_not_found(session_id))
        }

        async fn mute_call(&self, session_id: &str, _mute: bool) -> VoipResult<()> {
            Err(VoipError::session_not_found(session_id))
        }

        async fn hold_call(&self, session_id: &str, _hold: bool) -> VoipResult<()> {
            Err(VoipError::session_not_found(session_id))
        }

        async fn send_dtmf(&self, session_id: &str, _tone: &str) -> VoipResult<()> {
            Err(VoipError::session_not_found(session_id))
        }

        async fn call_status(&self, session_id: &str) -> VoipResult<CallStatus> {
            Err(VoipError::session_not_found(session_id))
        }

        fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
            self.event_tx.subscribe()
        }
    }

    #[tokio::test]
    async fn ownership_released_when_call_ends_during_initiation() {
        let store = Arc::new(CallStore::new());
        let manager = CallManager::new(
            CallManagerConfig::default(),
            Arc::clone(&store),
            Arc::new(NullNoteClient),
        );
        assert!(
            manager
                .register_adapter(Arc::new(InstantDropAdapter::new()))
                .await
        );

        let session = manager
            .start_call("2101234567", CallContext::default())
            .await
            .unwrap();

        assert!(store.is_in_log(&session.session_id).await);
        assert!(store.active_calls().await.is_empty());
        // No stale routing entry may survive the lost race.
        assert!(!manager.owns_session(&session.session_id));
    }
}
