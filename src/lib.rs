//! calldesk-core: call-session orchestration layer for CRM applications
//!
//! This crate is the telephony core a CRM front end embeds: a protocol
//! abstraction over heterogeneous telephony backends, a state machine
//! governing each call's lifecycle, and an orchestrating manager that
//! routes calls to backends, reconciles asynchronous lifecycle events into
//! shared state, and hands finished calls off to the CRM's note keeping.
//!
//! ## Architecture
//! ```text
//! UI intents -> CallManager -> VoipAdapter (simulated | real backends)
//!                   |                |
//!                   v                v  lifecycle events
//!               CallStore  <-  event projection
//!                   |
//!                   v
//!            NoteClient (call-history notes)
//! ```
//!
//! The crate focuses on:
//! - The [`adapter::VoipAdapter`] capability interface any backend satisfies
//! - [`adapter::SimulatedAdapter`], the timer-driven reference backend
//! - [`manager::CallManager`], routing operations and projecting events
//! - [`store::CallStore`], the reactive container for active and logged calls
//!
//! Real signaling (SIP/WebRTC), media handling, and CRM data management are
//! out of scope; backends and the note collaborator plug in behind traits.

pub mod adapter;
pub mod call;
pub mod error;
pub mod events;
pub mod manager;
pub mod notes;
pub mod store;

// Public API exports
pub use adapter::{SimulatedAdapter, SimulatedConfig, VoipAdapter};
pub use call::{
    Call, CallContext, CallDirection, CallHangupReason, CallSession, CallStatus, ContactRef,
    VoipRouting,
};
pub use error::{VoipError, VoipErrorCode, VoipResult};
pub use events::AdapterEvent;
pub use manager::{CallManager, CallManagerConfig};
pub use notes::{CreateNoteRequest, NoteClient, NullNoteClient};
pub use store::{CallStore, StoreUpdate};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
