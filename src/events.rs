//! Adapter event types
//!
//! Backends publish lifecycle events on a broadcast channel as a closed set
//! of tagged payloads; the manager consumes one stream per adapter and
//! projects each event into the call store. Per-adapter channel FIFO gives
//! the per-session ordering guarantee: an adapter must emit events for a
//! session in the order they happened, and the channel preserves it.
//!
//! Emission must never block or suspend; anything asynchronous a consumer
//! wants to do in reaction to an event (such as writing a call-history
//! note) runs on its own task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{Call, CallHangupReason, CallSession};
use crate::error::VoipError;

/// Default capacity for adapter event channels
///
/// Lagging receivers drop the oldest events; sized generously relative to
/// realistic per-adapter call volume.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle event emitted by a telephony backend adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AdapterEvent {
    /// A session's status changed; carries a full session snapshot
    StatusChange {
        session: CallSession,
        timestamp: DateTime<Utc>,
    },
    /// A session reached a terminal status and left adapter tracking
    ///
    /// The payload is the completed call projection, with `end_time` set
    /// and `duration_seconds` already derived by the adapter.
    Disconnected {
        call: Call,
        reason: CallHangupReason,
        timestamp: DateTime<Utc>,
    },
    /// A backend fault; session-scoped when `session_id` is present
    Error {
        error: VoipError,
        session_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A new inbound call is ringing
    IncomingCall {
        session: CallSession,
        timestamp: DateTime<Utc>,
    },
    /// The adapter established its backend connection
    Connected { system: String },
    /// The adapter lost or tore down its backend connection
    ///
    /// Sessions the adapter owned have already received terminal events.
    AdapterDisconnected { system: String },
}

impl AdapterEvent {
    /// Session id this event concerns, if it is session-scoped
    pub fn session_id(&self) -> Option<&str> {
        match self {
            AdapterEvent::StatusChange { session, .. } => Some(&session.session_id),
            AdapterEvent::Disconnected { call, .. } => Some(&call.id),
            AdapterEvent::Error { session_id, .. } => session_id.as_deref(),
            AdapterEvent::IncomingCall { session, .. } => Some(&session.session_id),
            AdapterEvent::Connected { .. } | AdapterEvent::AdapterDisconnected { .. } => None,
        }
    }

    /// Short name of the event for logs
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterEvent::StatusChange { .. } => "status_change",
            AdapterEvent::Disconnected { .. } => "disconnected",
            AdapterEvent::Error { .. } => "error",
            AdapterEvent::IncomingCall { .. } => "incoming_call",
            AdapterEvent::Connected { .. } => "connected",
            AdapterEvent::AdapterDisconnected { .. } => "adapter_disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallSession;

    #[test]
    fn session_scoped_events_expose_session_id() {
        let session =
            CallSession::new_outbound("s1".into(), "simulated", "100", "2101234567", None);
        let event = AdapterEvent::StatusChange {
            session,
            timestamp: Utc::now(),
        };
        assert_eq!(event.session_id(), Some("s1"));
        assert_eq!(event.kind(), "status_change");

        let global = AdapterEvent::AdapterDisconnected {
            system: "simulated".into(),
        };
        assert_eq!(global.session_id(), None);
    }
}
