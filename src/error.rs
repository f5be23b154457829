//! Error types and handling for the call orchestration layer
//!
//! This module defines the single domain error type used across adapters,
//! the call manager, and the call store.
//!
//! # Error Categories
//!
//! Errors fall into a few groups that map to different recovery strategies:
//!
//! - **Precondition violations** (`NOT_CONNECTED`, `SESSION_NOT_FOUND*`,
//!   `CALL_NOT_RINGING`, `CALL_NOT_ACTIVE`) - the operation fails and no
//!   state is mutated; the caller can inspect call state and retry.
//! - **Routing failures** (`NO_ADAPTER_AVAILABLE`, `SESSION_ADAPTER_NOT_FOUND`) -
//!   the manager could not map the request onto a backend.
//! - **Backend faults** (`ADAPTER_EXCEPTION` and adapter-specific codes) -
//!   wrapped at the manager boundary and surfaced; never propagated as panics.
//!
//! Adapter and manager methods never panic for expected domain failures:
//! they return a [`VoipError`] value.
//!
//! # Usage
//!
//! ```rust
//! use calldesk_core::error::{VoipError, VoipErrorCode};
//!
//! let err = VoipError::new(VoipErrorCode::NoAdapterAvailable, "no telephony backend registered");
//! assert_eq!(err.code.as_str(), "NO_ADAPTER_AVAILABLE");
//! assert!(err.is_routing());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for call orchestration operations
pub type VoipResult<T> = Result<T, VoipError>;

/// Closed set of error codes surfaced by adapters and the call manager
///
/// Serializes as the canonical SCREAMING_SNAKE string so UI layers and
/// logs see stable, grep-able codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoipErrorCode {
    /// Adapter operation attempted before `connect()` succeeded
    NotConnected,
    /// Adapter does not track the requested session
    SessionNotFound,
    /// Answer/reject requested for a session that is unknown or not inbound
    SessionNotFoundOrNotInbound,
    /// Answer/reject requested while the call is not in `ringing_inbound`
    CallNotRinging,
    /// Mute/hold/DTMF requested while the call is not active
    CallNotActive,
    /// No registered adapter qualifies for an outbound call
    NoAdapterAvailable,
    /// The manager has no ownership record for the session
    SessionAdapterNotFound,
    /// An adapter call panicked; caught and wrapped at the manager boundary
    AdapterException,
    /// Unexpected internal fault
    Internal,
}

impl VoipErrorCode {
    /// Canonical string form of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            VoipErrorCode::NotConnected => "NOT_CONNECTED",
            VoipErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            VoipErrorCode::SessionNotFoundOrNotInbound => "SESSION_NOT_FOUND_OR_NOT_INBOUND",
            VoipErrorCode::CallNotRinging => "CALL_NOT_RINGING",
            VoipErrorCode::CallNotActive => "CALL_NOT_ACTIVE",
            VoipErrorCode::NoAdapterAvailable => "NO_ADAPTER_AVAILABLE",
            VoipErrorCode::SessionAdapterNotFound => "SESSION_ADAPTER_NOT_FOUND",
            VoipErrorCode::AdapterException => "ADAPTER_EXCEPTION",
            VoipErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for VoipErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain error for call orchestration operations
///
/// Constructed at the failure site and never mutated afterwards. Carries an
/// optional structured `details` payload (e.g. the offending session id or
/// the backend's raw error) and the construction timestamp.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct VoipError {
    /// Stable error code, see [`VoipErrorCode`]
    pub code: VoipErrorCode,
    /// Human-readable description of the failure
    pub message: String,
    /// Optional structured context for logs and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// When the error was constructed
    pub timestamp: DateTime<Utc>,
}

impl VoipError {
    /// Create a new error with the given code and message
    pub fn new(code: VoipErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a structured details payload
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Adapter operation attempted while disconnected
    pub fn not_connected(system: &str) -> Self {
        Self::new(
            VoipErrorCode::NotConnected,
            format!("adapter '{system}' is not connected"),
        )
    }

    /// Adapter does not track the session
    pub fn session_not_found(session_id: &str) -> Self {
        Self::new(
            VoipErrorCode::SessionNotFound,
            format!("no session with id '{session_id}'"),
        )
        .with_details(serde_json::json!({ "session_id": session_id }))
    }

    /// Answer/reject for an unknown or non-inbound session
    pub fn session_not_found_or_not_inbound(session_id: &str) -> Self {
        Self::new(
            VoipErrorCode::SessionNotFoundOrNotInbound,
            format!("session '{session_id}' is unknown or not an inbound call"),
        )
        .with_details(serde_json::json!({ "session_id": session_id }))
    }

    /// Answer/reject while the call is not ringing
    pub fn call_not_ringing(session_id: &str) -> Self {
        Self::new(
            VoipErrorCode::CallNotRinging,
            format!("session '{session_id}' is not in ringing_inbound"),
        )
        .with_details(serde_json::json!({ "session_id": session_id }))
    }

    /// Mute/hold/DTMF while the call is not active
    pub fn call_not_active(session_id: &str) -> Self {
        Self::new(
            VoipErrorCode::CallNotActive,
            format!("session '{session_id}' is not an active call"),
        )
        .with_details(serde_json::json!({ "session_id": session_id }))
    }

    /// No registered adapter qualifies for the outbound call
    pub fn no_adapter_available(reason: impl Into<String>) -> Self {
        Self::new(VoipErrorCode::NoAdapterAvailable, reason)
    }

    /// The manager has no ownership record for the session
    pub fn session_adapter_not_found(session_id: &str) -> Self {
        Self::new(
            VoipErrorCode::SessionAdapterNotFound,
            format!("no owning adapter known for session '{session_id}'"),
        )
        .with_details(serde_json::json!({ "session_id": session_id }))
    }

    /// Wrap a panic that escaped an adapter call
    pub fn adapter_exception(system: &str, detail: impl Into<String>) -> Self {
        Self::new(
            VoipErrorCode::AdapterException,
            format!("adapter '{system}' raised an unexpected fault"),
        )
        .with_details(serde_json::json!({ "detail": detail.into() }))
    }

    /// Unexpected internal fault
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(VoipErrorCode::Internal, message)
    }

    /// Whether the error is a local precondition violation (no state changed)
    pub fn is_precondition(&self) -> bool {
        matches!(
            self.code,
            VoipErrorCode::NotConnected
                | VoipErrorCode::SessionNotFound
                | VoipErrorCode::SessionNotFoundOrNotInbound
                | VoipErrorCode::CallNotRinging
                | VoipErrorCode::CallNotActive
        )
    }

    /// Whether the error is a manager routing failure
    pub fn is_routing(&self) -> bool {
        matches!(
            self.code,
            VoipErrorCode::NoAdapterAvailable | VoipErrorCode::SessionAdapterNotFound
        )
    }

    /// Error category for metrics and structured logging
    pub fn category(&self) -> &'static str {
        match self.code {
            VoipErrorCode::NotConnected
            | VoipErrorCode::SessionNotFound
            | VoipErrorCode::SessionNotFoundOrNotInbound
            | VoipErrorCode::CallNotRinging
            | VoipErrorCode::CallNotActive => "precondition",
            VoipErrorCode::NoAdapterAvailable | VoipErrorCode::SessionAdapterNotFound => "routing",
            VoipErrorCode::AdapterException => "backend",
            VoipErrorCode::Internal => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_strings_are_canonical() {
        assert_eq!(VoipErrorCode::NotConnected.as_str(), "NOT_CONNECTED");
        assert_eq!(
            VoipErrorCode::SessionNotFoundOrNotInbound.as_str(),
            "SESSION_NOT_FOUND_OR_NOT_INBOUND"
        );
        assert_eq!(
            VoipErrorCode::NoAdapterAvailable.as_str(),
            "NO_ADAPTER_AVAILABLE"
        );
    }

    #[test]
    fn serializes_code_as_screaming_snake() {
        let err = VoipError::not_connected("simulated");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "NOT_CONNECTED");
        assert!(json["message"].as_str().unwrap().contains("simulated"));
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = VoipError::no_adapter_available("no telephony backend registered");
        let text = err.to_string();
        assert!(text.starts_with("NO_ADAPTER_AVAILABLE"));
        assert!(text.contains("no telephony backend registered"));
    }

    #[test]
    fn categories_group_codes() {
        assert_eq!(VoipError::call_not_ringing("s1").category(), "precondition");
        assert_eq!(
            VoipError::session_adapter_not_found("s1").category(),
            "routing"
        );
        assert_eq!(
            VoipError::adapter_exception("simulated", "boom").category(),
            "backend"
        );
        assert!(VoipError::call_not_active("s1").is_precondition());
        assert!(!VoipError::internal("x").is_precondition());
    }
}
