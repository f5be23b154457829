//! Call manager: the orchestrating service of the crate
//!
//! [`CallManager`] owns the set of registered telephony adapters, selects an
//! adapter for each outbound call, routes in-call operations to the owning
//! adapter through its private session-ownership map, projects adapter
//! events into the [`CallStore`], and hands finalized calls off to the
//! external note collaborator.
//!
//! The manager is an explicitly constructed, `Arc`-shared service - one
//! instance per process by convention, wired up at startup:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use calldesk_core::{
//!     CallManager, CallManagerConfig, CallStore, VoipAdapter,
//!     adapter::{SimulatedAdapter, SimulatedConfig},
//!     notes::NullNoteClient,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(CallStore::new());
//! let manager = CallManager::new(
//!     CallManagerConfig::default(),
//!     Arc::clone(&store),
//!     Arc::new(NullNoteClient),
//! );
//!
//! let adapter = Arc::new(SimulatedAdapter::new(SimulatedConfig::default()));
//! adapter.connect().await?;
//! manager.register_adapter(adapter).await;
//!
//! let session = manager.start_call("2101234567", Default::default()).await?;
//! println!("dialing, session {}", session.session_id);
//! # Ok(())
//! # }
//! ```

mod calls;
mod events;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::VoipAdapter;
use crate::call::CallContext;
use crate::error::{VoipError, VoipResult};
use crate::notes::NoteClient;
use crate::store::CallStore;

/// Configuration for the call manager
#[derive(Debug, Clone)]
pub struct CallManagerConfig {
    /// Backend system to prefer for outbound calls, when registered
    pub preferred_system: Option<String>,
    /// Author name stamped on call-history notes
    pub note_author_display_name: String,
}

impl Default for CallManagerConfig {
    fn default() -> Self {
        Self {
            preferred_system: None,
            note_author_display_name: "CRM".to_string(),
        }
    }
}

/// Orchestrating service routing calls between adapters, store, and notes
pub struct CallManager {
    pub(crate) config: CallManagerConfig,
    pub(crate) store: Arc<CallStore>,
    pub(crate) notes: Arc<dyn NoteClient>,
    /// Registered adapters by system name
    adapters: DashMap<String, Arc<dyn VoipAdapter>>,
    /// Registration order, for deterministic fallback selection
    registration_order: RwLock<Vec<String>>,
    /// Session id to owning system name; the sole routing authority for
    /// in-call operations. Entries are removed exactly when the terminal
    /// event for the session is processed.
    pub(crate) session_owners: DashMap<String, String>,
    /// One projection task per adapter, aborted on shutdown
    projection_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for CallManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallManager")
            .field("config", &self.config)
            .field("adapters", &self.adapters.len())
            .field("session_owners", &self.session_owners.len())
            .finish()
    }
}

impl CallManager {
    /// Create a new manager over the given store and note collaborator
    pub fn new(
        config: CallManagerConfig,
        store: Arc<CallStore>,
        notes: Arc<dyn NoteClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            notes,
            adapters: DashMap::new(),
            registration_order: RwLock::new(Vec::new()),
            session_owners: DashMap::new(),
            projection_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Register a telephony backend adapter
    ///
    /// Skips (with a warning) adapters that report themselves unconfigured
    /// and duplicate system names. On success, subscribes to the adapter's
    /// event stream for the adapter's whole lifetime and returns `true`.
    pub async fn register_adapter(self: &Arc<Self>, adapter: Arc<dyn VoipAdapter>) -> bool {
        let system = adapter.system_name().to_string();

        if !adapter.is_configured().await {
            warn!(system = %system, "skipping registration of unconfigured adapter");
            return false;
        }
        if self.adapters.contains_key(&system) {
            warn!(system = %system, "adapter already registered, ignoring duplicate");
            return false;
        }

        let mut events = adapter.subscribe();
        self.adapters.insert(system.clone(), adapter);
        self.registration_order.write().await.push(system.clone());

        let manager = Arc::clone(self);
        let task_system = system.clone();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => manager.handle_adapter_event(&task_system, event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(system = %task_system, skipped, "adapter event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(system = %task_system, "adapter event stream closed");
        });
        self.projection_tasks.lock().await.push(handle);

        info!(system = %system, "registered telephony adapter");
        true
    }

    /// Registered adapter by system name
    pub fn adapter(&self, system: &str) -> Option<Arc<dyn VoipAdapter>> {
        self.adapters.get(system).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered adapters
    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// Pick the adapter for an outbound call
    ///
    /// A number whose routing metadata forbids dialing is never dialed, no
    /// matter what is registered. Otherwise the precedence is: the
    /// configured `preferred_system` when registered, then the system named
    /// in the routing metadata, then the first registered adapter.
    pub(crate) async fn select_adapter(
        &self,
        context: &CallContext,
    ) -> VoipResult<Arc<dyn VoipAdapter>> {
        if let Some(routing) = &context.routing {
            if !routing.allow_dialing {
                return Err(VoipError::no_adapter_available(
                    "dialing is disallowed for this number",
                ));
            }
        }

        if let Some(preferred) = &self.config.preferred_system {
            if let Some(adapter) = self.adapter(preferred) {
                debug!(system = %preferred, "selected preferred adapter");
                return Ok(adapter);
            }
            warn!(system = %preferred, "preferred system not registered, falling back");
        }

        if let Some(routing) = &context.routing {
            if let Some(system) = &routing.system {
                if let Some(adapter) = self.adapter(system) {
                    debug!(system = %system, "selected adapter from number routing metadata");
                    return Ok(adapter);
                }
                warn!(system = %system, "routing metadata names an unregistered system, falling back");
            }
        }

        for system in self.registration_order.read().await.iter() {
            if let Some(adapter) = self.adapter(system) {
                debug!(system = %system, "selected first registered adapter");
                return Ok(adapter);
            }
        }

        Err(VoipError::no_adapter_available(
            "no telephony backend registered",
        ))
    }

    /// Disconnect every adapter and stop event projection
    ///
    /// Adapters finalize their owned sessions on disconnect; projection
    /// tasks are aborted afterwards.
    pub async fn shutdown(&self) {
        for entry in self.adapters.iter() {
            if let Err(error) = entry.value().disconnect().await {
                warn!(system = %entry.key(), %error, "adapter disconnect failed during shutdown");
            }
        }
        // Give the projection tasks a chance to drain the terminal events.
        tokio::task::yield_now().await;
        for handle in self.projection_tasks.lock().await.drain(..) {
            handle.abort();
        }
        info!("call manager shut down");
    }
}
