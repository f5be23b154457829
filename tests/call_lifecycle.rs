//! End-to-end call lifecycle scenarios against the simulated backend
//!
//! Exercises the manager/store/adapter wiring: outbound and inbound flows,
//! terminal-state invariants, idempotent end, hold/mute preconditions, and
//! adapter selection.

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use calldesk_core::{
    adapter::{SimulatedAdapter, SimulatedConfig},
    notes::{CreateNoteRequest, NoteClient},
    CallContext, CallHangupReason, CallManager, CallManagerConfig, CallStatus, CallStore,
    ContactRef, VoipAdapter, VoipErrorCode, VoipRouting,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("calldesk_core=debug")
        .with_test_writer()
        .try_init();
}

/// Poll a condition until it holds or two seconds elapse
macro_rules! wait_for {
    ($what:expr, $cond:expr) => {{
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if $cond {
                break;
            }
            if Instant::now() >= deadline {
                panic!("timed out waiting for {}", $what);
            }
            sleep(Duration::from_millis(5)).await;
        }
    }};
}

/// Note client that records every request it receives
#[derive(Default)]
struct RecordingNoteClient {
    requests: Mutex<Vec<CreateNoteRequest>>,
}

#[async_trait::async_trait]
impl NoteClient for RecordingNoteClient {
    async fn create_note(&self, request: CreateNoteRequest) -> anyhow::Result<()> {
        self.requests.lock().await.push(request);
        Ok(())
    }
}

impl RecordingNoteClient {
    async fn count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

struct Fixture {
    manager: Arc<CallManager>,
    store: Arc<CallStore>,
    notes: Arc<RecordingNoteClient>,
    adapter: SimulatedAdapter,
}

async fn fixture_with(config: SimulatedConfig, manager_config: CallManagerConfig) -> Fixture {
    init_tracing();
    let store = Arc::new(CallStore::new());
    let notes = Arc::new(RecordingNoteClient::default());
    let manager = CallManager::new(
        manager_config,
        Arc::clone(&store),
        Arc::clone(&notes) as Arc<dyn NoteClient>,
    );

    let adapter = SimulatedAdapter::new(config);
    adapter.connect().await.expect("connect simulated adapter");
    assert!(manager.register_adapter(Arc::new(adapter.clone())).await);

    Fixture {
        manager,
        store,
        notes,
        adapter,
    }
}

async fn fixture() -> Fixture {
    fixture_with(SimulatedConfig::fast(), CallManagerConfig::default()).await
}

fn maria() -> CallContext {
    CallContext {
        contact: Some(ContactRef {
            id: "c1".into(),
            display_name: "Maria".into(),
        }),
        subject: None,
        user_id: None,
        routing: None,
    }
}

async fn status_of(f: &Fixture, id: &str) -> Option<CallStatus> {
    f.store.active_call(id).await.map(|c| c.status)
}

#[tokio::test]
#[serial]
async fn outbound_happy_path() {
    let f = fixture().await;
    let session = f
        .manager
        .start_call("2101234567", maria())
        .await
        .expect("start call");
    let id = session.session_id.clone();
    assert_eq!(session.status, CallStatus::Initiating);

    // The single active call becomes the UI selection.
    wait_for!(
        "call selected",
        f.store.selected_call_id().await.as_deref() == Some(id.as_str())
    );

    wait_for!(
        "call answered",
        status_of(&f, &id).await == Some(CallStatus::Answered)
    );
    assert!(f
        .store
        .active_call(&id)
        .await
        .expect("answered call active")
        .connected_time
        .is_some());

    // The simulated backend hangs up on its own after the talk window.
    wait_for!("call finalized", f.store.is_in_log(&id).await);

    let log = f.store.call_log().await;
    assert_eq!(log.len(), 1);
    let call = &log[0];
    assert_eq!(call.status, CallStatus::Disconnected);
    assert_eq!(call.contact_id.as_deref(), Some("c1"));
    assert_eq!(call.hangup_reason, Some(CallHangupReason::LocalHangup));
    assert!(call.connected_time.is_some());
    assert!(call.duration_seconds.is_some());
    assert!(f.store.active_calls().await.is_empty());
    assert_eq!(f.store.selected_call_id().await, None);

    // Exactly one history note, carrying the contact and the backend.
    wait_for!("note created", f.notes.count().await == 1);
    let requests = f.notes.requests.lock().await;
    assert_eq!(requests[0].entity_id, "c1");
    assert_eq!(requests[0].note_type, "call_log");
    assert!(requests[0].content.contains("Maria"));
    assert!(requests[0].content.contains("Backend: simulated"));
}

#[tokio::test]
#[serial]
async fn inbound_without_answer_becomes_missed() {
    let f = fixture().await;
    let session = f
        .adapter
        .simulate_incoming_call("6971234567")
        .await
        .expect("simulate inbound");
    let id = session.session_id.clone();

    wait_for!(
        "inbound call active and selected",
        status_of(&f, &id).await == Some(CallStatus::RingingInbound)
            && f.store.selected_call_id().await.as_deref() == Some(id.as_str())
    );

    // Nobody answers; the ring window elapses.
    wait_for!("missed call logged", f.store.is_in_log(&id).await);

    let log = f.store.call_log().await;
    assert_eq!(log[0].status, CallStatus::Missed);
    assert_eq!(log[0].hangup_reason, Some(CallHangupReason::Missed));
    assert!(f.store.active_calls().await.is_empty());
}

#[tokio::test]
#[serial]
async fn rejected_inbound_is_missed_with_no_stale_timers() {
    let f = fixture().await;
    let session = f
        .adapter
        .simulate_incoming_call("6971234567")
        .await
        .expect("simulate inbound");
    let id = session.session_id.clone();

    wait_for!(
        "inbound call active",
        f.store.active_call(&id).await.is_some()
    );

    f.manager.reject_call(&id).await.expect("reject call");
    wait_for!("rejected call logged", f.store.is_in_log(&id).await);

    let logged = f.store.call_log().await[0].clone();
    assert_eq!(logged.status, CallStatus::Missed);
    assert_eq!(logged.hangup_reason, Some(CallHangupReason::Missed));

    // Outlast the ring and talk windows: no stale timer may fire another
    // transition for this session.
    sleep(Duration::from_millis(300)).await;
    let log = f.store.call_log().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, CallStatus::Missed);
    assert_eq!(log[0].end_time, logged.end_time);
    assert!(f.store.active_calls().await.is_empty());
}

#[tokio::test]
#[serial]
async fn answered_inbound_runs_like_an_active_call() {
    let f = fixture().await;
    let session = f
        .adapter
        .simulate_incoming_call("6971234567")
        .await
        .expect("simulate inbound");
    let id = session.session_id.clone();

    wait_for!(
        "inbound call active",
        f.store.active_call(&id).await.is_some()
    );
    f.manager.answer_call(&id).await.expect("answer call");

    wait_for!(
        "inbound call answered",
        status_of(&f, &id).await == Some(CallStatus::Answered)
    );

    wait_for!("inbound call finalized", f.store.is_in_log(&id).await);
    let log = f.store.call_log().await;
    assert_eq!(log[0].status, CallStatus::Disconnected);
    assert!(log[0].connected_time.is_some());
}

#[tokio::test]
#[serial]
async fn start_call_without_adapters_fails_and_leaves_store_untouched() {
    init_tracing();
    let store = Arc::new(CallStore::new());
    let manager = CallManager::new(
        CallManagerConfig::default(),
        Arc::clone(&store),
        Arc::new(RecordingNoteClient::default()),
    );

    let err = manager
        .start_call("2101234567", CallContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, VoipErrorCode::NoAdapterAvailable);
    assert_eq!(err.code.as_str(), "NO_ADAPTER_AVAILABLE");

    assert!(store.active_calls().await.is_empty());
    assert!(store.call_log().await.is_empty());
    assert!(store.current_error().await.is_none());
}

#[tokio::test]
#[serial]
async fn hold_and_unhold_round_trip() {
    // Long talk window so the auto hang-up cannot race the hold checks.
    let config = SimulatedConfig {
        min_call_duration: Duration::from_secs(5),
        max_call_duration: Duration::from_secs(5),
        ..SimulatedConfig::fast()
    };
    let f = fixture_with(config, CallManagerConfig::default()).await;
    let session = f
        .manager
        .start_call("2101234567", CallContext::default())
        .await
        .expect("start call");
    let id = session.session_id.clone();

    wait_for!(
        "call answered",
        status_of(&f, &id).await == Some(CallStatus::Answered)
    );

    f.manager.hold_call(&id, true).await.expect("hold");
    wait_for!(
        "call on hold",
        f.store
            .active_call(&id)
            .await
            .map(|c| c.status == CallStatus::OnHold && c.is_on_hold == Some(true))
            .unwrap_or(false)
    );

    f.manager.hold_call(&id, false).await.expect("unhold");
    wait_for!(
        "call resumed",
        f.store
            .active_call(&id)
            .await
            .map(|c| c.status == CallStatus::Answered && c.is_on_hold == Some(false))
            .unwrap_or(false)
    );
}

#[tokio::test]
#[serial]
async fn hold_before_answer_is_rejected() {
    // Slow answer keeps the call in ringing_outbound long enough to poke it.
    let config = SimulatedConfig {
        answer_delay: Duration::from_secs(5),
        ..SimulatedConfig::fast()
    };
    let f = fixture_with(config, CallManagerConfig::default()).await;
    let session = f
        .manager
        .start_call("2101234567", CallContext::default())
        .await
        .expect("start call");
    let id = session.session_id.clone();

    wait_for!(
        "call ringing",
        matches!(
            f.adapter.call_status(&id).await,
            Ok(CallStatus::RingingOutbound)
        )
    );

    let err = f.manager.hold_call(&id, true).await.unwrap_err();
    assert_eq!(err.code, VoipErrorCode::CallNotActive);
    assert_eq!(
        f.adapter.call_status(&id).await.unwrap(),
        CallStatus::RingingOutbound
    );
}

#[tokio::test]
#[serial]
async fn mute_sets_store_flag_only_when_answered() {
    let config = SimulatedConfig {
        min_call_duration: Duration::from_secs(5),
        max_call_duration: Duration::from_secs(5),
        ..SimulatedConfig::fast()
    };
    let f = fixture_with(config, CallManagerConfig::default()).await;
    let session = f
        .manager
        .start_call("2101234567", CallContext::default())
        .await
        .expect("start call");
    let id = session.session_id.clone();

    // Too early: still initiating or ringing.
    let err = f.manager.mute_call(&id, true).await.unwrap_err();
    assert_eq!(err.code, VoipErrorCode::CallNotActive);

    wait_for!(
        "call answered",
        status_of(&f, &id).await == Some(CallStatus::Answered)
    );

    f.manager.mute_call(&id, true).await.expect("mute");
    assert_eq!(f.store.active_call(&id).await.unwrap().is_muted, Some(true));

    f.manager.mute_call(&id, false).await.expect("unmute");
    assert_eq!(
        f.store.active_call(&id).await.unwrap().is_muted,
        Some(false)
    );

    f.manager
        .send_dtmf(&id, "5")
        .await
        .expect("dtmf while answered");
}

#[tokio::test]
#[serial]
async fn double_end_is_idempotent_with_one_note() {
    let f = fixture().await;
    let session = f
        .manager
        .start_call("2101234567", maria())
        .await
        .expect("start call");
    let id = session.session_id.clone();

    wait_for!(
        "call answered",
        status_of(&f, &id).await == Some(CallStatus::Answered)
    );

    f.manager.end_call(&id).await.expect("first end");
    wait_for!("call logged", f.store.is_in_log(&id).await);

    // Second end after finalization: benign no-op.
    f.manager.end_call(&id).await.expect("second end");

    assert_eq!(f.store.call_log().await.len(), 1);
    wait_for!("note created", f.notes.count().await == 1);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(f.notes.count().await, 1);
}

#[tokio::test]
#[serial]
async fn duplicate_and_unconfigured_registrations_are_skipped() {
    let f = fixture().await;
    assert_eq!(f.manager.adapter_count(), 1);

    // Same system name again: warn + no-op.
    let duplicate = Arc::new(SimulatedAdapter::new(SimulatedConfig::fast()));
    assert!(!f.manager.register_adapter(duplicate).await);
    assert_eq!(f.manager.adapter_count(), 1);

    // Unconfigured adapters never register.
    let unconfigured = Arc::new(SimulatedAdapter::with_name(
        "unconfigured",
        SimulatedConfig {
            configured: false,
            ..SimulatedConfig::fast()
        },
    ));
    assert!(!f.manager.register_adapter(unconfigured).await);
    assert_eq!(f.manager.adapter_count(), 1);
}

#[tokio::test]
#[serial]
async fn preferred_system_wins_but_never_overrides_dialing_veto() {
    init_tracing();
    let store = Arc::new(CallStore::new());
    let manager = CallManager::new(
        CallManagerConfig {
            preferred_system: Some("backup".into()),
            ..CallManagerConfig::default()
        },
        Arc::clone(&store),
        Arc::new(RecordingNoteClient::default()),
    );

    let primary = SimulatedAdapter::with_name("primary", SimulatedConfig::fast());
    let backup = SimulatedAdapter::with_name("backup", SimulatedConfig::fast());
    primary.connect().await.unwrap();
    backup.connect().await.unwrap();
    assert!(manager.register_adapter(Arc::new(primary)).await);
    assert!(manager.register_adapter(Arc::new(backup)).await);

    // Preferred system wins over registration order.
    let session = manager
        .start_call("2101234567", CallContext::default())
        .await
        .unwrap();
    assert_eq!(session.voip_system, "backup");

    // A number whose routing metadata forbids dialing is never dialed,
    // preferred system or not.
    let err = manager
        .start_call(
            "2107654321",
            CallContext {
                routing: Some(VoipRouting {
                    system: None,
                    allow_dialing: false,
                }),
                ..CallContext::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, VoipErrorCode::NoAdapterAvailable);

    manager.shutdown().await;
}

#[tokio::test]
#[serial]
async fn routing_metadata_drives_selection_without_preferred_system() {
    init_tracing();
    let store = Arc::new(CallStore::new());
    let manager = CallManager::new(
        CallManagerConfig::default(),
        Arc::clone(&store),
        Arc::new(RecordingNoteClient::default()),
    );

    let primary = SimulatedAdapter::with_name("primary", SimulatedConfig::fast());
    let secondary = SimulatedAdapter::with_name("secondary", SimulatedConfig::fast());
    primary.connect().await.unwrap();
    secondary.connect().await.unwrap();
    assert!(manager.register_adapter(Arc::new(primary)).await);
    assert!(manager.register_adapter(Arc::new(secondary)).await);

    // Metadata names the secondary system.
    let session = manager
        .start_call(
            "2101234567",
            CallContext {
                routing: Some(VoipRouting {
                    system: Some("secondary".into()),
                    allow_dialing: true,
                }),
                ..CallContext::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(session.voip_system, "secondary");

    // No metadata at all: first registered adapter wins.
    let session = manager
        .start_call("2100000000", CallContext::default())
        .await
        .unwrap();
    assert_eq!(session.voip_system, "primary");

    manager.shutdown().await;
}

#[tokio::test]
#[serial]
async fn selected_call_termination_closes_dial_pad() {
    let f = fixture().await;
    let session = f
        .manager
        .start_call("2101234567", CallContext::default())
        .await
        .expect("start call");
    let id = session.session_id.clone();

    wait_for!(
        "call selected",
        f.store.selected_call_id().await.as_deref() == Some(id.as_str())
    );
    f.store.set_dial_pad_open(true).await;

    f.manager.end_call(&id).await.expect("end call");
    wait_for!("call logged", f.store.is_in_log(&id).await);

    assert_eq!(f.store.selected_call_id().await, None);
    assert!(!f.store.is_dial_pad_open().await);
}

#[tokio::test]
#[serial]
async fn unknown_session_operations_return_typed_errors() {
    let f = fixture().await;

    let err = f.manager.answer_call("sim-missing").await.unwrap_err();
    assert_eq!(err.code, VoipErrorCode::SessionAdapterNotFound);

    // end_call on a session nobody ever knew about is an error, not a no-op.
    let err = f.manager.end_call("sim-missing").await.unwrap_err();
    assert_eq!(err.code, VoipErrorCode::SessionAdapterNotFound);
}
