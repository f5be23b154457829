//! Timer-driven reference backend
//!
//! [`SimulatedAdapter`] exercises every legal call-state transition without
//! any network signaling: outbound calls ring, get answered, and hang up on
//! timers; inbound calls are injected through
//! [`simulate_incoming_call`](SimulatedAdapter::simulate_incoming_call) and
//! time out to `missed` if nobody answers. Every session keeps handles to
//! its pending timer tasks, and every path that ends a session aborts them
//! before touching status, so a stale timer can never fire a transition out
//! of a terminal state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::call::{Call, CallContext, CallHangupReason, CallSession, CallStatus};
use crate::error::{VoipError, VoipResult};
use crate::events::{AdapterEvent, EVENT_CHANNEL_CAPACITY};

use super::VoipAdapter;

/// Timing configuration for the simulated backend
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Whether the adapter reports itself as configured
    pub configured: bool,
    /// Identity used as the `from` party on outbound calls
    pub local_identity: String,
    /// Delay from `initiating` to `ringing_outbound`
    pub ring_delay: Duration,
    /// Delay from `ringing_outbound` to `answered`
    pub answer_delay: Duration,
    /// Bounds for the randomized talk time before auto hang-up
    pub min_call_duration: Duration,
    pub max_call_duration: Duration,
    /// Bounds for the randomized inbound ring window before `missed`
    pub min_inbound_ring: Duration,
    pub max_inbound_ring: Duration,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            configured: true,
            local_identity: "crm-user".to_string(),
            ring_delay: Duration::from_millis(1500),
            answer_delay: Duration::from_secs(3),
            min_call_duration: Duration::from_secs(5),
            max_call_duration: Duration::from_secs(30),
            min_inbound_ring: Duration::from_secs(15),
            max_inbound_ring: Duration::from_secs(20),
        }
    }
}

impl SimulatedConfig {
    /// Millisecond-scale timings for tests
    pub fn fast() -> Self {
        Self {
            ring_delay: Duration::from_millis(20),
            answer_delay: Duration::from_millis(30),
            min_call_duration: Duration::from_millis(120),
            max_call_duration: Duration::from_millis(200),
            min_inbound_ring: Duration::from_millis(60),
            max_inbound_ring: Duration::from_millis(100),
            ..Self::default()
        }
    }
}

/// One tracked session plus its pending timer handles
#[derive(Debug)]
struct SimSession {
    session: CallSession,
    is_muted: bool,
    timers: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
struct SimInner {
    system_name: String,
    config: SimulatedConfig,
    connected: AtomicBool,
    sessions: DashMap<String, SimSession>,
    event_tx: broadcast::Sender<AdapterEvent>,
}

/// Reference telephony backend driving the state machine on timers
#[derive(Debug, Clone)]
pub struct SimulatedAdapter {
    inner: Arc<SimInner>,
}

impl SimulatedAdapter {
    /// Create a simulated adapter named `"simulated"`
    pub fn new(config: SimulatedConfig) -> Self {
        Self::with_name("simulated", config)
    }

    /// Create a simulated adapter with an explicit system name
    ///
    /// Useful for registering several simulated backends side by side.
    pub fn with_name(system_name: &str, config: SimulatedConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SimInner {
                system_name: system_name.to_string(),
                config,
                connected: AtomicBool::new(false),
                sessions: DashMap::new(),
                event_tx,
            }),
        }
    }

    /// Inject an inbound call, as if the backend signaled one
    ///
    /// Creates a session in `ringing_inbound` and emits `incoming_call`.
    /// If nobody answers within the configured ring window the session
    /// auto-transitions to `missed`.
    pub async fn simulate_incoming_call(&self, from: &str) -> VoipResult<CallSession> {
        let inner = &self.inner;
        if !inner.connected.load(Ordering::SeqCst) {
            return Err(VoipError::not_connected(&inner.system_name));
        }

        let session_id = format!("sim-{}", Uuid::new_v4());
        let session = CallSession::new_inbound(
            session_id.clone(),
            &inner.system_name,
            from,
            &inner.config.local_identity,
        );
        inner.sessions.insert(
            session_id.clone(),
            SimSession {
                session: session.clone(),
                is_muted: false,
                timers: Vec::new(),
            },
        );

        info!(session_id = %session_id, from = %from, "simulated inbound call ringing");
        inner.emit(AdapterEvent::IncomingCall {
            session: session.clone(),
            timestamp: chrono::Utc::now(),
        });

        let ring_window = inner.random_range(
            inner.config.min_inbound_ring,
            inner.config.max_inbound_ring,
        );
        let driver = Arc::clone(inner);
        let id = session_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ring_window).await;
            // Answer/reject/end abort this task first; the atomic
            // check-and-remove covers an abort landing too late.
            driver.timeout_if_still_ringing(&id);
        });
        inner.track_timer(&session_id, handle);

        Ok(session)
    }
}

impl SimInner {
    fn emit(&self, event: AdapterEvent) {
        // No subscribers is fine; events are dropped on the floor then.
        let _ = self.event_tx.send(event);
    }

    fn random_range(&self, min: Duration, max: Duration) -> Duration {
        let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
        if hi <= lo {
            return min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }

    fn with_session<T>(&self, session_id: &str, f: impl FnOnce(&SimSession) -> T) -> Option<T> {
        self.sessions.get(session_id).map(|entry| f(entry.value()))
    }

    fn track_timer(&self, session_id: &str, handle: JoinHandle<()>) {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) => entry.timers.push(handle),
            // Session ended between spawn and registration; the task's own
            // status re-check makes the stray timer harmless, but don't
            // leave it running.
            None => handle.abort(),
        }
    }

    /// Apply a non-terminal transition and emit `status_change`
    ///
    /// Silently skips when the session is gone or the transition is no
    /// longer legal (a timer racing an explicit operation).
    fn transition(&self, session_id: &str, next: CallStatus) -> bool {
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            debug!(session_id = %session_id, status = ?next, "skipping transition for released session");
            return false;
        };
        if !entry.session.status.can_transition_to(next) {
            warn!(session_id = %session_id, from = ?entry.session.status, to = ?next,
                "skipping illegal transition");
            return false;
        }
        entry.session.transition(next);
        let snapshot = entry.session.clone();
        drop(entry);

        self.emit(AdapterEvent::StatusChange {
            session: snapshot,
            timestamp: chrono::Utc::now(),
        });
        true
    }

    /// Terminal path: cancel timers, stamp the terminal status, emit
    /// `disconnected`, drop tracking
    ///
    /// Timer cancellation happens before any status mutation so a pending
    /// timer cannot resurrect the finished call.
    fn end_session(&self, session_id: &str, terminal: CallStatus, reason: CallHangupReason) -> bool {
        let Some((_, sim)) = self.sessions.remove(session_id) else {
            return false;
        };
        self.finish(sim, terminal, reason);
        true
    }

    /// Terminal path for the inbound ring timeout
    ///
    /// Check-and-remove is atomic, so an answer landing at the same instant
    /// either wins (the session is answered, nothing is removed) or loses
    /// (the session is gone before the answer looks it up).
    fn timeout_if_still_ringing(&self, session_id: &str) {
        let removed = self
            .sessions
            .remove_if(session_id, |_, s| {
                s.session.status == CallStatus::RingingInbound
            });
        if let Some((_, sim)) = removed {
            debug!(session_id = %session_id, "inbound ring window elapsed, marking missed");
            self.finish(sim, CallStatus::Missed, CallHangupReason::Missed);
        }
    }

    fn finish(&self, mut sim: SimSession, terminal: CallStatus, reason: CallHangupReason) {
        debug_assert!(terminal.is_terminal());
        for timer in sim.timers.drain(..) {
            timer.abort();
        }
        sim.session.transition(terminal);

        let mut call = Call::from_session(&sim.session);
        call.is_muted = Some(sim.is_muted);
        call.finalize(Some(reason));

        info!(session_id = %sim.session.session_id, status = ?terminal, reason = %reason.as_str(),
            duration = ?call.duration_seconds, "session ended");
        self.emit(AdapterEvent::Disconnected {
            call,
            reason,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Drive an answered session: random talk time, then auto hang-up
    fn schedule_auto_hangup(self: &Arc<Self>, session_id: &str) {
        let talk_time = self.random_range(self.config.min_call_duration, self.config.max_call_duration);
        let driver = Arc::clone(self);
        let id = session_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(talk_time).await;
            if driver.sessions.contains_key(&id) {
                debug!(session_id = %id, "simulated talk time over, hanging up");
                driver.end_session(&id, CallStatus::Disconnected, CallHangupReason::LocalHangup);
            }
        });
        self.track_timer(session_id, handle);
    }
}

#[async_trait]
impl VoipAdapter for SimulatedAdapter {
    fn system_name(&self) -> &str {
        &self.inner.system_name
    }

    async fn is_configured(&self) -> bool {
        self.inner.config.configured
    }

    async fn connect(&self) -> VoipResult<()> {
        let inner = &self.inner;
        if inner.connected.swap(true, Ordering::SeqCst) {
            warn!(system = %inner.system_name, "connect() called while already connected");
            return Ok(());
        }
        info!(system = %inner.system_name, "simulated backend connected");
        inner.emit(AdapterEvent::Connected {
            system: inner.system_name.clone(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> VoipResult<()> {
        let inner = &self.inner;
        if !inner.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // Release every owned session with a terminal event instead of
        // silently dropping it.
        let session_ids: Vec<String> = inner.sessions.iter().map(|e| e.key().clone()).collect();
        for session_id in session_ids {
            inner.end_session(
                &session_id,
                CallStatus::Disconnected,
                CallHangupReason::LocalHangup,
            );
        }

        info!(system = %inner.system_name, "simulated backend disconnected");
        inner.emit(AdapterEvent::AdapterDisconnected {
            system: inner.system_name.clone(),
        });
        Ok(())
    }

    async fn initiate_call(
        &self,
        target_number: &str,
        context: &CallContext,
    ) -> VoipResult<CallSession> {
        let inner = &self.inner;
        if !inner.connected.load(Ordering::SeqCst) {
            return Err(VoipError::not_connected(&inner.system_name));
        }

        let session_id = format!("sim-{}", Uuid::new_v4());
        let session = CallSession::new_outbound(
            session_id.clone(),
            &inner.system_name,
            &inner.config.local_identity,
            target_number,
            context.subject.clone(),
        );
        inner.sessions.insert(
            session_id.clone(),
            SimSession {
                session: session.clone(),
                is_muted: false,
                timers: Vec::new(),
            },
        );

        info!(session_id = %session_id, target = %target_number, "simulated outbound call initiating");
        inner.emit(AdapterEvent::StatusChange {
            session: session.clone(),
            timestamp: chrono::Utc::now(),
        });

        // One driver task walks the outbound leg through ringing and
        // answered, then hands over to the auto-hangup timer. Each step
        // re-checks legality, so an explicit end/reject simply starves it.
        let ring_delay = inner.config.ring_delay;
        let answer_delay = inner.config.answer_delay;
        let driver = Arc::clone(inner);
        let id = session_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ring_delay).await;
            if !driver.transition(&id, CallStatus::RingingOutbound) {
                return;
            }
            tokio::time::sleep(answer_delay).await;
            if !driver.transition(&id, CallStatus::Answered) {
                return;
            }
            driver.schedule_auto_hangup(&id);
        });
        inner.track_timer(&session_id, handle);

        Ok(session)
    }

    async fn answer_call(&self, session_id: &str) -> VoipResult<()> {
        let inner = &self.inner;
        let status = inner
            .with_session(session_id, |s| (s.session.direction, s.session.status))
            .ok_or_else(|| VoipError::session_not_found_or_not_inbound(session_id))?;

        match status {
            (crate::call::CallDirection::Inbound, CallStatus::RingingInbound) => {}
            (crate::call::CallDirection::Outbound, _) => {
                return Err(VoipError::session_not_found_or_not_inbound(session_id));
            }
            _ => return Err(VoipError::call_not_ringing(session_id)),
        }

        // Cancel the missed-call timeout before the status changes.
        if let Some(mut entry) = inner.sessions.get_mut(session_id) {
            for timer in entry.timers.drain(..) {
                timer.abort();
            }
        }
        // The ring timeout can still win between the status check above and
        // here; losing that race is a failed answer, not a silent success.
        if !inner.transition(session_id, CallStatus::Answered) {
            return Err(VoipError::call_not_ringing(session_id));
        }
        inner.schedule_auto_hangup(session_id);
        Ok(())
    }

    async fn reject_call(&self, session_id: &str) -> VoipResult<()> {
        let inner = &self.inner;
        let status = inner
            .with_session(session_id, |s| (s.session.direction, s.session.status))
            .ok_or_else(|| VoipError::session_not_found_or_not_inbound(session_id))?;

        match status {
            (crate::call::CallDirection::Inbound, CallStatus::RingingInbound) => {}
            (crate::call::CallDirection::Outbound, _) => {
                return Err(VoipError::session_not_found_or_not_inbound(session_id));
            }
            _ => return Err(VoipError::call_not_ringing(session_id)),
        }

        inner.end_session(session_id, CallStatus::Missed, CallHangupReason::Missed);
        Ok(())
    }

    async fn end_call(&self, session_id: &str) -> VoipResult<()> {
        if self.inner.end_session(
            session_id,
            CallStatus::Disconnected,
            CallHangupReason::LocalHangup,
        ) {
            Ok(())
        } else {
            Err(VoipError::session_not_found(session_id))
        }
    }

    async fn mute_call(&self, session_id: &str, mute: bool) -> VoipResult<()> {
        let inner = &self.inner;
        let mut entry = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| VoipError::session_not_found(session_id))?;
        // Only an answered call has media to mute; a held call does not.
        if entry.session.status != CallStatus::Answered {
            return Err(VoipError::call_not_active(session_id));
        }
        entry.is_muted = mute;
        debug!(session_id = %session_id, mute, "simulated mute toggled");
        Ok(())
    }

    async fn hold_call(&self, session_id: &str, hold: bool) -> VoipResult<()> {
        let inner = &self.inner;
        let status = inner
            .with_session(session_id, |s| s.session.status)
            .ok_or_else(|| VoipError::session_not_found(session_id))?;
        if !status.is_active() {
            return Err(VoipError::call_not_active(session_id));
        }

        match (status, hold) {
            (CallStatus::Answered, true) => {
                inner.transition(session_id, CallStatus::OnHold);
            }
            (CallStatus::OnHold, false) => {
                inner.transition(session_id, CallStatus::Answered);
            }
            // Already in the requested state.
            _ => debug!(session_id = %session_id, hold, "hold request is a no-op"),
        }
        Ok(())
    }

    async fn send_dtmf(&self, session_id: &str, tone: &str) -> VoipResult<()> {
        let inner = &self.inner;
        let status = inner
            .with_session(session_id, |s| s.session.status)
            .ok_or_else(|| VoipError::session_not_found(session_id))?;
        if status != CallStatus::Answered {
            return Err(VoipError::call_not_active(session_id));
        }
        debug!(session_id = %session_id, tone = %tone, "simulated DTMF sent");
        Ok(())
    }

    async fn call_status(&self, session_id: &str) -> VoipResult<CallStatus> {
        self.inner
            .with_session(session_id, |s| s.session.status)
            .ok_or_else(|| VoipError::session_not_found(session_id))
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.inner.event_tx.subscribe()
    }
}
