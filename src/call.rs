//! Call vocabulary for the orchestration layer
//!
//! This module defines the shared data types: the call status state machine,
//! hangup reasons, the adapter-internal [`CallSession`], and the
//! store/UI-facing [`Call`] record. All actual signaling is delegated to the
//! backend adapters; these types carry no behavior beyond state-machine
//! predicates and the session-to-call projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current status of a call
///
/// The full vocabulary is kept for UI/wire compatibility; backends only
/// drive the transitions listed on [`CallStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// No call activity
    Idle,
    /// Outbound attempt created, not yet ringing
    Initiating,
    /// Outbound call ringing at the remote party
    RingingOutbound,
    /// Inbound call ringing locally, awaiting answer/reject
    RingingInbound,
    /// Call is established and media is flowing
    Answered,
    /// Call is established but parked on hold
    OnHold,
    /// Reserved: mute is tracked as a flag on [`Call`], not a status
    Muted,
    /// Backend is still setting up the call leg
    Connecting,
    /// Inbound call ended without being answered
    Missed,
    /// Call was diverted to voicemail
    Voicemail,
    /// Call ended normally
    Disconnected,
    /// Call ended due to an error
    Failed,
    /// Remote party was busy
    Busy,
}

impl CallStatus {
    /// Whether no further transition is legal from this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Disconnected
                | CallStatus::Failed
                | CallStatus::Missed
                | CallStatus::Busy
                | CallStatus::Voicemail
        )
    }

    /// Whether the call is established (mute/hold/DTMF are meaningful)
    pub fn is_active(&self) -> bool {
        matches!(self, CallStatus::Answered | CallStatus::OnHold)
    }

    /// Canonical snake_case string form
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Idle => "idle",
            CallStatus::Initiating => "initiating",
            CallStatus::RingingOutbound => "ringing_outbound",
            CallStatus::RingingInbound => "ringing_inbound",
            CallStatus::Answered => "answered",
            CallStatus::OnHold => "on_hold",
            CallStatus::Muted => "muted",
            CallStatus::Connecting => "connecting",
            CallStatus::Missed => "missed",
            CallStatus::Voicemail => "voicemail",
            CallStatus::Disconnected => "disconnected",
            CallStatus::Failed => "failed",
            CallStatus::Busy => "busy",
        }
    }

    /// Whether `next` is a legal transition from this status
    ///
    /// Adapters enforce this; the manager trusts adapter-emitted events.
    /// Any non-terminal status may fail.
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == CallStatus::Failed {
            return true;
        }
        match (self, next) {
            (CallStatus::Initiating, CallStatus::RingingOutbound) => true,
            (CallStatus::RingingOutbound, CallStatus::Answered) => true,
            (CallStatus::RingingOutbound, CallStatus::Busy) => true,
            (CallStatus::RingingInbound, CallStatus::Answered) => true,
            (CallStatus::RingingInbound, CallStatus::Missed) => true,
            (CallStatus::RingingInbound, CallStatus::Voicemail) => true,
            (CallStatus::Answered, CallStatus::OnHold) => true,
            (CallStatus::OnHold, CallStatus::Answered) => true,
            (CallStatus::Answered, CallStatus::Disconnected) => true,
            (CallStatus::OnHold, CallStatus::Disconnected) => true,
            (CallStatus::Initiating, CallStatus::Disconnected) => true,
            (CallStatus::RingingOutbound, CallStatus::Disconnected) => true,
            (CallStatus::RingingInbound, CallStatus::Disconnected) => true,
            (CallStatus::Connecting, CallStatus::Answered) => true,
            (CallStatus::Connecting, CallStatus::Disconnected) => true,
            _ => false,
        }
    }
}

/// Classified cause attached to a call once, at the terminal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallHangupReason {
    LocalHangup,
    RemoteHangup,
    NetworkError,
    CallRejected,
    CallFailed,
    AnsweredElsewhere,
    Timeout,
    Unauthorized,
    Missed,
    Unknown,
}

impl CallHangupReason {
    /// Canonical snake_case string form
    pub fn as_str(&self) -> &'static str {
        match self {
            CallHangupReason::LocalHangup => "local_hangup",
            CallHangupReason::RemoteHangup => "remote_hangup",
            CallHangupReason::NetworkError => "network_error",
            CallHangupReason::CallRejected => "call_rejected",
            CallHangupReason::CallFailed => "call_failed",
            CallHangupReason::AnsweredElsewhere => "answered_elsewhere",
            CallHangupReason::Timeout => "timeout",
            CallHangupReason::Unauthorized => "unauthorized",
            CallHangupReason::Missed => "missed",
            CallHangupReason::Unknown => "unknown",
        }
    }
}

/// Direction of a call (from the local user's perspective)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Minimal reference to a CRM contact, passed in by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRef {
    /// CRM contact id
    pub id: String,
    /// Name shown in the call UI and the history note
    pub display_name: String,
}

/// VoIP-integration metadata attached to a phone number
///
/// Looked up by the CRM per number and handed to the manager through
/// [`CallContext`]; drives adapter selection for outbound calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoipRouting {
    /// Backend system this number prefers, if any
    pub system: Option<String>,
    /// Whether dialing this number is permitted at all
    pub allow_dialing: bool,
}

impl Default for VoipRouting {
    fn default() -> Self {
        Self {
            system: None,
            allow_dialing: true,
        }
    }
}

/// Context supplied when starting an outbound call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallContext {
    /// Contact the call is associated with, if known
    pub contact: Option<ContactRef>,
    /// Free-text subject shown in the UI and the history note
    pub subject: Option<String>,
    /// CRM user placing the call
    pub user_id: Option<String>,
    /// Per-number routing metadata
    pub routing: Option<VoipRouting>,
}

/// Adapter-internal, ephemeral representation of one call attempt
///
/// Owned exclusively by the adapter that created it. The manager never
/// mutates a session directly; it only observes events describing it. The
/// session is removed from adapter tracking once a terminal event has been
/// emitted for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    /// Adapter-scoped unique id
    pub session_id: String,
    /// Optional link to a persisted CRM call record
    pub call_id: Option<String>,
    /// Current status, see [`CallStatus`]
    pub status: CallStatus,
    /// Direction of the call
    pub direction: CallDirection,
    /// Calling party (number or backend identity)
    pub from: String,
    /// Called party
    pub to: String,
    /// The number as dialed
    pub target_number: String,
    /// Optional free-text context
    pub subject: Option<String>,
    /// When the attempt was created
    pub start_time: DateTime<Utc>,
    /// When the status last changed
    pub last_status_update: DateTime<Utc>,
    /// First moment the call was answered
    pub connected_time: Option<DateTime<Utc>>,
    /// When the call reached a terminal status
    pub end_time: Option<DateTime<Utc>>,
    /// Name of the owning backend adapter
    pub voip_system: String,
}

impl CallSession {
    /// Create a new outbound session in `initiating`
    pub fn new_outbound(
        session_id: String,
        voip_system: &str,
        from: &str,
        target_number: &str,
        subject: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            call_id: None,
            status: CallStatus::Initiating,
            direction: CallDirection::Outbound,
            from: from.to_string(),
            to: target_number.to_string(),
            target_number: target_number.to_string(),
            subject,
            start_time: now,
            last_status_update: now,
            connected_time: None,
            end_time: None,
            voip_system: voip_system.to_string(),
        }
    }

    /// Create a new inbound session in `ringing_inbound`
    pub fn new_inbound(session_id: String, voip_system: &str, from: &str, to: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            call_id: None,
            status: CallStatus::RingingInbound,
            direction: CallDirection::Inbound,
            from: from.to_string(),
            to: to.to_string(),
            target_number: from.to_string(),
            subject: None,
            start_time: now,
            last_status_update: now,
            connected_time: None,
            end_time: None,
            voip_system: voip_system.to_string(),
        }
    }

    /// Apply a status transition, stamping the bookkeeping timestamps
    ///
    /// First transition to `answered` sets `connected_time`; terminal
    /// transitions set `end_time`.
    pub fn transition(&mut self, next: CallStatus) {
        let now = Utc::now();
        self.status = next;
        self.last_status_update = now;
        if next == CallStatus::Answered && self.connected_time.is_none() {
            self.connected_time = Some(now);
        }
        if next.is_terminal() && self.end_time.is_none() {
            self.end_time = Some(now);
        }
    }
}

/// Cross-system, store/UI-facing call record
///
/// Superset of [`CallSession`]: `id` equals the session id once bound. A
/// call held in the store's active set never has a terminal status; a call
/// in the log always does, with `end_time` set and `duration_seconds`
/// derived when `start_time` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    /// Call id (== session id once bound)
    pub id: String,
    /// Associated CRM contact, if known
    pub contact_id: Option<String>,
    /// Display name for the counterparty
    pub contact_display_name: Option<String>,
    /// CRM user on the call
    pub user_id: Option<String>,
    /// Backend-side call identifier (e.g. a provider call SID)
    pub voip_call_sid: Option<String>,
    /// Current status
    pub status: CallStatus,
    /// Direction of the call
    pub direction: CallDirection,
    /// Calling party
    pub from: String,
    /// Called party
    pub to: String,
    /// The number as dialed
    pub target_number: String,
    /// Optional free-text context
    pub subject: Option<String>,
    /// When the attempt was created
    pub start_time: DateTime<Utc>,
    /// When the status last changed
    pub last_status_update: DateTime<Utc>,
    /// First moment the call was answered
    pub connected_time: Option<DateTime<Utc>>,
    /// When the call reached a terminal status
    pub end_time: Option<DateTime<Utc>>,
    /// Name of the owning backend adapter
    pub voip_system: String,
    /// Recording references, if the backend produced any
    pub recordings: Option<Vec<String>>,
    /// Whether the microphone is muted (manager-tracked flag)
    pub is_muted: Option<bool>,
    /// Whether the call is on hold (derived from status)
    pub is_on_hold: Option<bool>,
    /// Error text attached when the call failed
    pub error_message: Option<String>,
    /// Classified cause, attached once at finalization
    pub hangup_reason: Option<CallHangupReason>,
    /// Whole seconds from `start_time` to `end_time`; computed once,
    /// never recomputed after being set
    pub duration_seconds: Option<i64>,
}

impl Call {
    /// Project an adapter session into a call record
    pub fn from_session(session: &CallSession) -> Self {
        Self {
            id: session.session_id.clone(),
            contact_id: None,
            contact_display_name: None,
            user_id: None,
            voip_call_sid: None,
            status: session.status,
            direction: session.direction,
            from: session.from.clone(),
            to: session.to.clone(),
            target_number: session.target_number.clone(),
            subject: session.subject.clone(),
            start_time: session.start_time,
            last_status_update: session.last_status_update,
            connected_time: session.connected_time,
            end_time: session.end_time,
            voip_system: session.voip_system.clone(),
            recordings: None,
            is_muted: None,
            is_on_hold: Some(session.status == CallStatus::OnHold),
            error_message: None,
            hangup_reason: None,
            duration_seconds: None,
        }
    }

    /// Merge a fresher snapshot of the same call into this record
    ///
    /// Preserves fields the incoming snapshot does not carry: optional
    /// fields only overwrite when the incoming value is present,
    /// `connected_time` keeps its first value, and `duration_seconds` is
    /// never overwritten once set.
    pub fn merge_from(&mut self, incoming: &Call) {
        debug_assert_eq!(self.id, incoming.id);
        self.status = incoming.status;
        self.last_status_update = incoming.last_status_update;
        self.is_on_hold = Some(incoming.status == CallStatus::OnHold);

        if self.connected_time.is_none() {
            self.connected_time = incoming.connected_time;
        }
        if self.end_time.is_none() {
            self.end_time = incoming.end_time;
        }
        if self.duration_seconds.is_none() {
            self.duration_seconds = incoming.duration_seconds;
        }
        if incoming.contact_id.is_some() {
            self.contact_id = incoming.contact_id.clone();
        }
        if incoming.contact_display_name.is_some() {
            self.contact_display_name = incoming.contact_display_name.clone();
        }
        if incoming.user_id.is_some() {
            self.user_id = incoming.user_id.clone();
        }
        if incoming.voip_call_sid.is_some() {
            self.voip_call_sid = incoming.voip_call_sid.clone();
        }
        if incoming.subject.is_some() {
            self.subject = incoming.subject.clone();
        }
        if incoming.recordings.is_some() {
            self.recordings = incoming.recordings.clone();
        }
        if incoming.is_muted.is_some() {
            self.is_muted = incoming.is_muted;
        }
        if incoming.error_message.is_some() {
            self.error_message = incoming.error_message.clone();
        }
        if self.hangup_reason.is_none() {
            self.hangup_reason = incoming.hangup_reason;
        }
    }

    /// Attach contact and user context from an outbound call request
    pub fn with_context(mut self, context: &CallContext) -> Self {
        if let Some(contact) = &context.contact {
            self.contact_id = Some(contact.id.clone());
            self.contact_display_name = Some(contact.display_name.clone());
        }
        if context.subject.is_some() {
            self.subject = context.subject.clone();
        }
        if context.user_id.is_some() {
            self.user_id = context.user_id.clone();
        }
        self
    }

    /// Complete the record for the call log
    ///
    /// Ensures `end_time` is set, derives `duration_seconds` exactly once,
    /// and attaches the hangup reason if none was recorded yet. Safe to call
    /// more than once; later calls change nothing.
    pub fn finalize(&mut self, reason: Option<CallHangupReason>) {
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
        if self.duration_seconds.is_none() {
            if let Some(end) = self.end_time {
                self.duration_seconds = Some((end - self.start_time).num_seconds().max(0));
            }
        }
        if self.hangup_reason.is_none() {
            self.hangup_reason = reason;
        }
        self.last_status_update = self.end_time.unwrap_or_else(Utc::now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn terminal_statuses_are_closed() {
        for terminal in [
            CallStatus::Disconnected,
            CallStatus::Failed,
            CallStatus::Missed,
            CallStatus::Busy,
            CallStatus::Voicemail,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(CallStatus::Answered));
            assert!(!terminal.can_transition_to(CallStatus::Failed));
        }
    }

    #[test]
    fn outbound_happy_path_is_legal() {
        assert!(CallStatus::Initiating.can_transition_to(CallStatus::RingingOutbound));
        assert!(CallStatus::RingingOutbound.can_transition_to(CallStatus::Answered));
        assert!(CallStatus::Answered.can_transition_to(CallStatus::OnHold));
        assert!(CallStatus::OnHold.can_transition_to(CallStatus::Answered));
        assert!(CallStatus::Answered.can_transition_to(CallStatus::Disconnected));
    }

    #[test]
    fn any_nonterminal_status_may_fail() {
        assert!(CallStatus::Initiating.can_transition_to(CallStatus::Failed));
        assert!(CallStatus::RingingInbound.can_transition_to(CallStatus::Failed));
        assert!(CallStatus::OnHold.can_transition_to(CallStatus::Failed));
    }

    #[test]
    fn session_transition_stamps_timestamps() {
        let mut session =
            CallSession::new_outbound("s1".into(), "simulated", "100", "2101234567", None);
        assert!(session.connected_time.is_none());

        session.transition(CallStatus::RingingOutbound);
        session.transition(CallStatus::Answered);
        let first_connected = session.connected_time.expect("connected_time set");

        session.transition(CallStatus::OnHold);
        session.transition(CallStatus::Answered);
        assert_eq!(session.connected_time, Some(first_connected));

        session.transition(CallStatus::Disconnected);
        assert!(session.end_time.is_some());
    }

    #[test]
    fn finalize_derives_duration_once() {
        let session =
            CallSession::new_outbound("s1".into(), "simulated", "100", "2101234567", None);
        let mut call = Call::from_session(&session);
        call.start_time = Utc::now() - Duration::seconds(90);
        call.end_time = Some(call.start_time + Duration::seconds(65));
        call.status = CallStatus::Disconnected;

        call.finalize(Some(CallHangupReason::LocalHangup));
        assert_eq!(call.duration_seconds, Some(65));
        assert_eq!(call.hangup_reason, Some(CallHangupReason::LocalHangup));

        // A second finalization must not move anything.
        call.end_time = Some(call.start_time + Duration::seconds(300));
        call.finalize(Some(CallHangupReason::RemoteHangup));
        assert_eq!(call.duration_seconds, Some(65));
        assert_eq!(call.hangup_reason, Some(CallHangupReason::LocalHangup));
    }

    #[test]
    fn merge_preserves_fields_missing_from_snapshot() {
        let session =
            CallSession::new_outbound("s1".into(), "simulated", "100", "2101234567", None);
        let mut stored = Call::from_session(&session).with_context(&CallContext {
            contact: Some(ContactRef {
                id: "c1".into(),
                display_name: "Maria".into(),
            }),
            subject: Some("renewal".into()),
            user_id: None,
            routing: None,
        });

        let mut updated = session.clone();
        updated.transition(CallStatus::RingingOutbound);
        let snapshot = Call::from_session(&updated);

        stored.merge_from(&snapshot);
        assert_eq!(stored.status, CallStatus::RingingOutbound);
        assert_eq!(stored.contact_id.as_deref(), Some("c1"));
        assert_eq!(stored.subject.as_deref(), Some("renewal"));
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(CallStatus::RingingInbound).unwrap(),
            "ringing_inbound"
        );
        assert_eq!(
            serde_json::to_value(CallHangupReason::LocalHangup).unwrap(),
            "local_hangup"
        );
        assert_eq!(CallHangupReason::Missed.as_str(), "missed");
    }
}
