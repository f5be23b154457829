//! Adapter event projection
//!
//! One projection task per registered adapter drains that adapter's event
//! stream and translates each event into call-store mutations. Projection
//! steps are short and never suspend on anything but the store lock; the
//! note side effect runs fire-and-forget on its own task so it cannot block
//! the event loop, and its failures are logged and swallowed.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::call::{Call, CallHangupReason, CallStatus};
use crate::events::AdapterEvent;
use crate::notes::CreateNoteRequest;

impl super::CallManager {
    /// Project one adapter event into the store
    pub(crate) async fn handle_adapter_event(&self, system: &str, event: AdapterEvent) {
        debug!(system = %system, kind = event.kind(), session_id = ?event.session_id(),
            "projecting adapter event");

        match event {
            AdapterEvent::StatusChange { session, .. } => {
                if self.store.is_in_log(&session.session_id).await {
                    warn!(session_id = %session.session_id, status = ?session.status,
                        "status change for finalized call, ignoring");
                    return;
                }
                if session.status.is_terminal() {
                    // Terminal transitions normally arrive as `disconnected`;
                    // honor a stray one through the same finalize path.
                    self.finalize_and_log(Call::from_session(&session), None)
                        .await;
                    return;
                }
                if self.store.active_call(&session.session_id).await.is_none() {
                    // Weak fallback: the manager has no record of this
                    // session; surface it rather than dropping it.
                    warn!(session_id = %session.session_id, system = %system,
                        "status change for unknown session, constructing minimal call");
                }
                self.store
                    .add_or_update_active_call(Call::from_session(&session))
                    .await;
            }

            AdapterEvent::IncomingCall { session, .. } => {
                info!(session_id = %session.session_id, from = %session.from, system = %system,
                    "incoming call ringing");
                self.session_owners
                    .insert(session.session_id.clone(), system.to_string());
                let call = Call::from_session(&session);
                let call_id = call.id.clone();
                self.store.add_or_update_active_call(call).await;
                self.store.set_selected_call(Some(call_id)).await;
            }

            AdapterEvent::Disconnected { call, reason, .. } => {
                self.finalize_and_log(call, Some(reason)).await;
            }

            AdapterEvent::Error {
                error,
                session_id: Some(session_id),
                ..
            } => {
                warn!(session_id = %session_id, code = %error.code, message = %error.message,
                    "session-scoped adapter error, failing call");
                let mut call = match self.store.active_call(&session_id).await {
                    Some(active) => active,
                    None => minimal_failed_call(&session_id, system),
                };
                call.status = CallStatus::Failed;
                call.error_message = Some(error.message.clone());
                call.last_status_update = Utc::now();
                self.finalize_and_log(call, Some(CallHangupReason::CallFailed))
                    .await;
            }

            AdapterEvent::Error {
                error,
                session_id: None,
                ..
            } => {
                error!(system = %system, code = %error.code, message = %error.message,
                    "adapter-global error");
                self.store.set_error(error).await;
            }

            AdapterEvent::Connected { system } => {
                info!(system = %system, "adapter connected to its backend");
            }

            AdapterEvent::AdapterDisconnected { system } => {
                // Owned sessions already received terminal events.
                warn!(system = %system, "adapter disconnected from its backend");
            }
        }
    }

    /// Move a call into the log and kick off the history-note side effect
    ///
    /// Exactly-once: the store reports whether this terminal event was the
    /// first one, and only then are the ownership entry released and the
    /// note written.
    pub(crate) async fn finalize_and_log(&self, call: Call, reason: Option<CallHangupReason>) {
        let (finalized, newly_finalized) = self.store.finalize_call(call, reason).await;
        if !newly_finalized {
            return;
        }
        self.session_owners.remove(&finalized.id);
        info!(call_id = %finalized.id, status = ?finalized.status,
            reason = ?finalized.hangup_reason, duration = ?finalized.duration_seconds,
            "call finalized");

        let Some(contact_id) = finalized.contact_id.clone() else {
            debug!(call_id = %finalized.id, "no contact on call, skipping history note");
            return;
        };

        let request = CreateNoteRequest::call_log(
            contact_id,
            format_call_note(&finalized),
            self.config.note_author_display_name.clone(),
        );
        let notes = std::sync::Arc::clone(&self.notes);
        let call_id = finalized.id.clone();
        // Fire-and-forget: note-keeping failures never surface to the
        // caller of a call operation and are never retried.
        tokio::spawn(async move {
            if let Err(error) = notes.create_note(request).await {
                warn!(call_id = %call_id, %error, "failed to create call-history note");
            }
        });
    }
}

/// Minimal record for a failed session the store has never seen
fn minimal_failed_call(session_id: &str, system: &str) -> Call {
    let now = Utc::now();
    Call {
        id: session_id.to_string(),
        contact_id: None,
        contact_display_name: None,
        user_id: None,
        voip_call_sid: None,
        status: CallStatus::Failed,
        direction: crate::call::CallDirection::Outbound,
        from: String::new(),
        to: String::new(),
        target_number: String::new(),
        subject: None,
        start_time: now,
        last_status_update: now,
        connected_time: None,
        end_time: None,
        voip_system: system.to_string(),
        recordings: None,
        is_muted: None,
        is_on_hold: None,
        error_message: None,
        hangup_reason: None,
        duration_seconds: None,
    }
}

/// Format the call-history note body
///
/// Includes direction, counterparties, optional subject, final status,
/// hangup reason, duration, backend name, backend call id, and the error
/// message when present.
pub(crate) fn format_call_note(call: &Call) -> String {
    let direction = match call.direction {
        crate::call::CallDirection::Outbound => "Outbound call",
        crate::call::CallDirection::Inbound => "Inbound call",
    };
    let counterparty = call
        .contact_display_name
        .as_deref()
        .unwrap_or(&call.target_number);

    let mut lines = vec![format!(
        "{} with {} ({} -> {})",
        direction, counterparty, call.from, call.to
    )];
    if let Some(subject) = &call.subject {
        lines.push(format!("Subject: {subject}"));
    }
    lines.push(format!("Status: {}", call.status.as_str()));
    lines.push(format!(
        "Hangup reason: {}",
        call.hangup_reason
            .map(|r| r.as_str())
            .unwrap_or(CallHangupReason::Unknown.as_str())
    ));
    let seconds = call.duration_seconds.unwrap_or(0);
    lines.push(format!("Duration: {}m {}s", seconds / 60, seconds % 60));
    lines.push(format!("Backend: {}", call.voip_system));
    lines.push(format!(
        "Backend call id: {}",
        call.voip_call_sid.as_deref().unwrap_or(&call.id)
    ));
    if let Some(error) = &call.error_message {
        lines.push(format!("Error: {error}"));
    }
    lines.join("\n")
}
