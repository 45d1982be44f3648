//! Lifecycle tests for the presence tracker, mirror and watcher.

use std::sync::Arc;
use std::time::Duration;

use konvo_common::{millis_to_iso, ManualClock};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;

use super::*;
use crate::backend::{Backend, FaultPlan, MemoryBackend, StorePath};

const START: i64 = 1_700_000_000_000;

struct Fixture {
    backend: Arc<MemoryBackend>,
    clock: Arc<ManualClock>,
    tracker: PresenceTracker,
    events: broadcast::Receiver<PresenceEvent>,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new(START));
    let backend = Arc::new(MemoryBackend::with_clock(clock.clone()));
    let tracker = PresenceTracker::new(backend.clone(), clock.clone(), PresenceConfig::default());
    let events = tracker.subscribe();
    Fixture {
        backend,
        clock,
        tracker,
        events,
    }
}

fn status_of(backend: &MemoryBackend, user_id: &str) -> Option<PresenceState> {
    backend
        .value(&StorePath::ephemeral(format!("status/{user_id}")))
        .map(|value| PresenceState::from_value(&value).unwrap())
}

fn profile_state(backend: &MemoryBackend, user_id: &str) -> Option<String> {
    backend
        .document("users", user_id)
        .and_then(|doc| doc["status"]["state"].as_str().map(str::to_string))
}

async fn wait_for<F>(events: &mut broadcast::Receiver<PresenceEvent>, matches: F) -> PresenceEvent
where
    F: Fn(&PresenceEvent) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for presence event")
}

async fn eventually<F>(check: F)
where
    F: Fn() -> bool,
{
    timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn is_armed(event: &PresenceEvent) -> bool {
    matches!(event, PresenceEvent::CompensationArmed { .. })
}

fn is_online(event: &PresenceEvent) -> bool {
    matches!(event, PresenceEvent::Online { .. })
}

#[tokio::test]
async fn setup_writes_online_and_waits_for_connection() {
    let f = fixture();
    assert_eq!(f.tracker.setup_presence("u1").await, SetupOutcome::Started);

    assert_eq!(status_of(&f.backend, "u1"), Some(PresenceState::online(START)));
    let profile = f.backend.document("users", "u1").unwrap();
    assert_eq!(profile["status"], json!({"state": "online", "lastChanged": START}));
    assert_eq!(profile["lastSeen"], json!(millis_to_iso(START)));

    assert_eq!(f.tracker.phase().await, PresencePhase::Armed);
    assert_eq!(f.tracker.user_id().await.as_deref(), Some("u1"));
    assert_eq!(f.backend.compensation_registrations(), 0);
}

#[tokio::test]
async fn connected_arms_compensation_before_going_online() {
    let mut f = fixture();
    f.tracker.setup_presence("u1").await;
    f.backend.connect();

    wait_for(&mut f.events, is_armed).await;
    wait_for(&mut f.events, is_online).await;

    assert_eq!(f.backend.pending_compensations(), 1);
    assert_eq!(f.tracker.phase().await, PresencePhase::Online);
}

#[tokio::test]
async fn every_reconnect_rearms_the_compensation() {
    let mut f = fixture();
    f.tracker.setup_presence("u1").await;

    f.backend.connect();
    wait_for(&mut f.events, is_armed).await;
    wait_for(&mut f.events, is_online).await;

    f.clock.advance(1_000);
    f.backend.disconnect();
    assert_eq!(status_of(&f.backend, "u1").unwrap().state, PresenceStatus::Offline);

    f.backend.connect();
    wait_for(&mut f.events, is_armed).await;
    wait_for(&mut f.events, is_online).await;
    assert_eq!(f.backend.compensation_registrations(), 2);
    assert!(status_of(&f.backend, "u1").unwrap().is_online());

    f.clock.advance(1_000);
    f.backend.disconnect();
    assert_eq!(
        status_of(&f.backend, "u1"),
        Some(PresenceState::offline(START + 1_000))
    );
}

#[tokio::test]
async fn disconnect_without_go_offline_reaches_the_profile() {
    let mut f = fixture();
    let mirror = PresenceMirror::new(f.backend.clone(), PresenceConfig::default());
    mirror.watch("u1");

    f.tracker.setup_presence("u1").await;
    f.backend.connect();
    wait_for(&mut f.events, is_armed).await;
    wait_for(&mut f.events, is_online).await;
    assert_eq!(profile_state(&f.backend, "u1").as_deref(), Some("online"));

    f.backend.disconnect();

    let backend = f.backend.clone();
    eventually(move || profile_state(&backend, "u1").as_deref() == Some("offline")).await;
    let profile = f.backend.document("users", "u1").unwrap();
    assert_eq!(profile["lastSeen"], json!(millis_to_iso(START)));
}

#[tokio::test]
async fn mirror_keeps_other_profile_fields() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(
        &StorePath::document("users", "u2"),
        json!({"displayName": "Bo"}),
    );
    let mirror = PresenceMirror::new(backend.clone(), PresenceConfig::default());
    mirror.watch("u2");
    assert_eq!(mirror.watching(), 1);

    backend
        .write(
            &StorePath::ephemeral("status/u2"),
            PresenceState::offline(5_000).to_value(),
        )
        .await
        .unwrap();

    let probe = backend.clone();
    eventually(move || profile_state(&probe, "u2").as_deref() == Some("offline")).await;
    let profile = backend.document("users", "u2").unwrap();
    assert_eq!(profile["displayName"], json!("Bo"));
    assert_eq!(profile["lastSeen"], json!(millis_to_iso(5_000)));

    assert!(mirror.unwatch("u2"));
    assert_eq!(mirror.watching(), 0);
    assert_eq!(backend.active_subscriptions(&StorePath::ephemeral("status/u2")), 0);
}

#[tokio::test]
async fn setup_is_idempotent_per_user() {
    let f = fixture();
    assert_eq!(f.tracker.setup_presence("u1").await, SetupOutcome::Started);
    assert_eq!(f.tracker.setup_presence("u1").await, SetupOutcome::AlreadyActive);
    assert_eq!(f.tracker.setup_presence("u2").await, SetupOutcome::Ignored);
    assert_eq!(f.tracker.setup_presence("  ").await, SetupOutcome::Ignored);

    assert_eq!(f.backend.active_connectivity_subscriptions(), 1);
    assert_eq!(f.tracker.user_id().await.as_deref(), Some("u1"));
    assert_eq!(status_of(&f.backend, "u2"), None);
}

#[tokio::test]
async fn cleanup_detaches_without_writing() {
    let mut f = fixture();
    f.tracker.setup_presence("u1").await;
    f.backend.connect();
    wait_for(&mut f.events, is_online).await;
    wait_for(&mut f.events, is_online).await;

    f.tracker.cleanup().await;
    assert_eq!(f.tracker.phase().await, PresencePhase::Uninitialized);
    assert!(!f.tracker.unload_attached().await);
    assert_eq!(f.backend.active_connectivity_subscriptions(), 0);
    assert!(status_of(&f.backend, "u1").unwrap().is_online());

    // The compensation armed before cleanup still belongs to the server.
    f.backend.disconnect();
    assert_eq!(status_of(&f.backend, "u1"), Some(PresenceState::offline(START)));

    let sentinel = PresenceState::offline(1);
    f.backend
        .seed(&StorePath::ephemeral("status/u1"), sentinel.to_value());
    f.tracker.go_online().await;
    f.backend.connect();
    settle().await;

    assert_eq!(status_of(&f.backend, "u1"), Some(sentinel));
    assert_eq!(f.backend.compensation_registrations(), 1);
}

#[tokio::test]
async fn a_new_user_can_be_set_up_after_cleanup() {
    let f = fixture();
    f.tracker.setup_presence("u1").await;
    f.tracker.cleanup().await;

    assert_eq!(f.tracker.setup_presence("u2").await, SetupOutcome::Started);
    assert_eq!(f.tracker.user_id().await.as_deref(), Some("u2"));
    assert!(status_of(&f.backend, "u2").unwrap().is_online());
}

#[tokio::test]
async fn transitions_before_setup_are_ignored() {
    let f = fixture();
    f.tracker.go_online().await;
    f.tracker.go_offline().await;
    f.tracker.cleanup().await;
    f.tracker.handle_before_unload().await;

    assert_eq!(f.tracker.phase().await, PresencePhase::Uninitialized);
    assert!(f.backend.documents_in("users").is_empty());
}

#[tokio::test]
async fn both_writes_share_one_timestamp() {
    let f = fixture();
    f.tracker.setup_presence("u1").await;
    f.clock.set(START + 42_000);
    f.tracker.go_offline().await;

    assert_eq!(
        status_of(&f.backend, "u1"),
        Some(PresenceState::offline(START + 42_000))
    );
    let profile = f.backend.document("users", "u1").unwrap();
    assert_eq!(profile["status"]["lastChanged"], json!(START + 42_000));
    assert_eq!(profile["lastSeen"], json!(millis_to_iso(START + 42_000)));
    assert_eq!(f.tracker.phase().await, PresencePhase::Offline);
}

#[tokio::test]
async fn failed_ephemeral_write_is_swallowed() {
    let mut f = fixture();
    f.backend.set_faults(FaultPlan {
        ephemeral_writes: true,
        ..FaultPlan::none()
    });

    assert_eq!(f.tracker.setup_presence("u1").await, SetupOutcome::Started);
    let event = wait_for(&mut f.events, |e| {
        matches!(e, PresenceEvent::WriteFailed { .. })
    })
    .await;
    assert!(matches!(
        event,
        PresenceEvent::WriteFailed {
            target: WriteTarget::Ephemeral,
            ..
        }
    ));

    f.tracker.go_offline().await;
    assert_eq!(f.tracker.phase().await, PresencePhase::Armed);
    assert_eq!(f.backend.document("users", "u1"), None);
}

#[tokio::test]
async fn failed_durable_write_still_transitions() {
    let mut f = fixture();
    f.tracker.setup_presence("u1").await;
    f.backend.set_faults(FaultPlan {
        document_writes: true,
        ..FaultPlan::none()
    });

    f.tracker.go_offline().await;
    wait_for(&mut f.events, |e| {
        matches!(
            e,
            PresenceEvent::WriteFailed {
                target: WriteTarget::Durable,
                ..
            }
        )
    })
    .await;
    assert_eq!(f.tracker.phase().await, PresencePhase::Offline);
    assert_eq!(status_of(&f.backend, "u1").unwrap().state, PresenceStatus::Offline);
    assert_eq!(profile_state(&f.backend, "u1").as_deref(), Some("online"));
}

#[tokio::test]
async fn no_online_write_without_compensation() {
    let mut f = fixture();
    f.tracker.setup_presence("u1").await;
    f.tracker.go_offline().await;
    f.backend.set_faults(FaultPlan {
        compensations: true,
        ..FaultPlan::none()
    });

    f.backend.connect();
    wait_for(&mut f.events, |e| {
        matches!(
            e,
            PresenceEvent::WriteFailed {
                target: WriteTarget::Compensation,
                ..
            }
        )
    })
    .await;
    settle().await;

    assert_eq!(f.backend.pending_compensations(), 0);
    assert_eq!(status_of(&f.backend, "u1").unwrap().state, PresenceStatus::Offline);
}

#[tokio::test]
async fn unload_goes_offline_only_while_attached() {
    let f = fixture();
    f.tracker.setup_presence("u1").await;
    assert!(f.tracker.unload_attached().await);

    f.tracker.handle_before_unload().await;
    assert_eq!(status_of(&f.backend, "u1").unwrap().state, PresenceStatus::Offline);

    f.tracker.cleanup().await;
    f.backend
        .seed(&StorePath::ephemeral("status/u1"), PresenceState::online(9).to_value());
    f.tracker.handle_before_unload().await;
    assert_eq!(status_of(&f.backend, "u1"), Some(PresenceState::online(9)));
}

#[tokio::test]
async fn sign_out_goes_offline_then_cleans_up() {
    let mut f = fixture();
    f.tracker.setup_presence("u1").await;
    f.tracker.sign_out().await;

    wait_for(&mut f.events, |e| matches!(e, PresenceEvent::Reset { .. })).await;
    assert_eq!(f.tracker.phase().await, PresencePhase::Uninitialized);
    assert_eq!(status_of(&f.backend, "u1").unwrap().state, PresenceStatus::Offline);
    assert_eq!(profile_state(&f.backend, "u1").as_deref(), Some("offline"));
}

#[tokio::test]
async fn watcher_reports_absent_status_as_offline() {
    let clock = Arc::new(ManualClock::new(START));
    let backend = Arc::new(MemoryBackend::with_clock(clock.clone()));
    let watcher = StatusWatcher::new(backend.clone(), clock.clone(), PresenceConfig::default());

    let mut stream = watcher.watch("u3");
    assert_eq!(stream.user_id(), "u3");
    assert_eq!(stream.next().await, Some(PresenceState::offline(START)));

    backend
        .write(
            &StorePath::ephemeral("status/u3"),
            PresenceState::online(START + 1).to_value(),
        )
        .await
        .unwrap();
    assert_eq!(stream.next().await, Some(PresenceState::online(START + 1)));

    backend
        .write(&StorePath::ephemeral("status/u3"), json!("garbage"))
        .await
        .unwrap();
    assert_eq!(stream.next().await, Some(PresenceState::offline(START)));
}

#[tokio::test]
async fn watching_again_replaces_the_stream() {
    let backend = Arc::new(MemoryBackend::new());
    let clock = Arc::new(ManualClock::new(0));
    let watcher = StatusWatcher::new(backend.clone(), clock, PresenceConfig::default());

    let mut first = watcher.watch("u1");
    let mut second = watcher.watch("u1");
    assert_eq!(watcher.active(), 1);
    assert_eq!(first.next().await, None);
    assert!(second.next().await.is_some());

    assert!(watcher.unwatch("u1"));
    assert_eq!(second.next().await, None);
    assert_eq!(backend.active_subscriptions(&StorePath::ephemeral("status/u1")), 0);
}
