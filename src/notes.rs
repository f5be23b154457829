//! External note/record-keeping collaborator contract
//!
//! The call manager asks this collaborator to persist one formatted
//! call-history note per finalized call that has a contact. The manager
//! does not inspect persistence guarantees: note failures are logged and
//! swallowed, never retried, and never surfaced as call-operation failures.

use async_trait::async_trait;

/// Request to persist one note against a CRM entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNoteRequest {
    /// CRM entity the note attaches to (the call's contact)
    pub entity_id: String,
    /// Entity kind, `"contact"` for call-history notes
    pub entity_type: String,
    /// Formatted note body
    pub content: String,
    /// Display name shown as the note author
    pub author_display_name: String,
    /// Note kind, `"call_log"` for call-history notes
    pub note_type: String,
    /// Note visibility, `"team"` for call-history notes
    pub visibility: String,
}

impl CreateNoteRequest {
    /// Build a call-log note for a contact
    pub fn call_log(
        contact_id: impl Into<String>,
        content: impl Into<String>,
        author_display_name: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: contact_id.into(),
            entity_type: "contact".to_string(),
            content: content.into(),
            author_display_name: author_display_name.into(),
            note_type: "call_log".to_string(),
            visibility: "team".to_string(),
        }
    }
}

/// Note persistence collaborator, implemented by the embedding CRM
#[async_trait]
pub trait NoteClient: Send + Sync {
    /// Persist one note; errors are reported to the caller for logging only
    async fn create_note(&self, request: CreateNoteRequest) -> anyhow::Result<()>;
}

/// No-op note client for embedding without a CRM backend
///
/// Logs the note at debug level and drops it.
#[derive(Debug, Default)]
pub struct NullNoteClient;

#[async_trait]
impl NoteClient for NullNoteClient {
    async fn create_note(&self, request: CreateNoteRequest) -> anyhow::Result<()> {
        tracing::debug!(
            entity_id = %request.entity_id,
            note_type = %request.note_type,
            "dropping note (no note backend configured)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_log_request_uses_contact_defaults() {
        let request = CreateNoteRequest::call_log("c1", "Outbound call", "Maria");
        assert_eq!(request.entity_type, "contact");
        assert_eq!(request.note_type, "call_log");
        assert_eq!(request.visibility, "team");
        assert_eq!(request.entity_id, "c1");
    }
}
