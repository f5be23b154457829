//! Telephony backend adapters
//!
//! An adapter is an in-process capability object integrating one underlying
//! telephony system. It owns the sessions it creates, enforces the call
//! state machine on them, and publishes lifecycle events on a broadcast
//! channel. A real backend adapter would translate this same contract onto
//! its own wire signaling; the crate ships [`SimulatedAdapter`] as the
//! timer-driven reference implementation.

pub mod simulated;

pub use simulated::{SimulatedAdapter, SimulatedConfig};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::call::{CallContext, CallSession, CallStatus};
use crate::error::VoipResult;
use crate::events::AdapterEvent;

/// Capability interface every telephony backend implements
///
/// # Failure semantics
///
/// Methods never panic for expected domain failures - they return a
/// [`VoipError`](crate::error::VoipError) value. Preconditions (listed per
/// method) fail without mutating any state.
///
/// # Event emission
///
/// Adapters publish [`AdapterEvent`]s through the channel handed out by
/// [`subscribe`](VoipAdapter::subscribe). For a single session, events must
/// be emitted in the order the transitions happened; publishing must not
/// suspend.
#[async_trait]
pub trait VoipAdapter: Send + Sync {
    /// Name of the backend system, unique per registered adapter
    fn system_name(&self) -> &str;

    /// Readiness check; the manager only registers adapters that answer true
    async fn is_configured(&self) -> bool;

    /// Establish the adapter's connection to its backend
    ///
    /// Connecting twice is a no-op with a warning, not an error.
    async fn connect(&self) -> VoipResult<()>;

    /// Tear down the backend connection
    ///
    /// Releases every session the adapter owns, emitting a terminal event
    /// for each rather than silently dropping them.
    async fn disconnect(&self) -> VoipResult<()>;

    /// Start an outbound call attempt
    ///
    /// Fails fast with `NOT_CONNECTED` when the adapter is not connected.
    async fn initiate_call(
        &self,
        target_number: &str,
        context: &CallContext,
    ) -> VoipResult<CallSession>;

    /// Answer an inbound session currently in `ringing_inbound`
    ///
    /// Otherwise returns `SESSION_NOT_FOUND_OR_NOT_INBOUND` or
    /// `CALL_NOT_RINGING` without mutating state.
    async fn answer_call(&self, session_id: &str) -> VoipResult<()>;

    /// Reject an inbound session currently in `ringing_inbound`
    async fn reject_call(&self, session_id: &str) -> VoipResult<()>;

    /// End any session the adapter still tracks, in any non-terminal state
    ///
    /// Transitions to `disconnected`, fills `end_time`, emits the terminal
    /// event, then drops internal tracking of the session.
    async fn end_call(&self, session_id: &str) -> VoipResult<()>;

    /// Mute or unmute an answered call (`CALL_NOT_ACTIVE` otherwise)
    ///
    /// A held call has no media to mute and is rejected too.
    async fn mute_call(&self, session_id: &str, mute: bool) -> VoipResult<()>;

    /// Hold or resume an active call (`CALL_NOT_ACTIVE` otherwise)
    async fn hold_call(&self, session_id: &str, hold: bool) -> VoipResult<()>;

    /// Send a DTMF tone; valid only in `answered`
    async fn send_dtmf(&self, session_id: &str, tone: &str) -> VoipResult<()>;

    /// Current status of a tracked session
    async fn call_status(&self, session_id: &str) -> VoipResult<CallStatus>;

    /// Subscribe to the adapter's lifecycle event stream
    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent>;
}
