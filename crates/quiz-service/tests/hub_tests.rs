//! Hub integration tests.
//!
//! Runs the hub actor alone with `RecordingDepartures` so membership,
//! back-pressure and departure reporting can be observed without the
//! session layer.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use quiz_service::actors::{HubActor, HubHandle, ServerEvent};
use quiz_service::models::{Quiz, UserId};
use quiz_test_utils::{
    profile, FakeConnection, InMemoryRepository, QuizFixture, RecordingDepartures,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const HOST: UserId = 1;
const ALICE: UserId = 2;
const BOB: UserId = 3;

struct TestHub {
    hub: HubHandle,
    departures: RecordingDepartures,
    quiz: Quiz,
}

impl TestHub {
    fn start() -> Self {
        let departures = RecordingDepartures::new();
        let (hub, _task) =
            HubActor::spawn(Arc::new(departures.clone()), 64, CancellationToken::new());
        let quiz = InMemoryRepository::new()
            .insert_quiz(QuizFixture::new("ABC123", HOST).question("2+2?", &["3", "4"], "4"));
        Self {
            hub,
            departures,
            quiz,
        }
    }

    async fn connect(&self, user_id: UserId, capacity: usize) -> FakeConnection {
        FakeConnection::register(
            self.hub.clone(),
            &self.quiz,
            profile(user_id, &format!("user{user_id}")),
            capacity,
        )
        .await
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.hub.cancel();
    }
}

#[tokio::test]
async fn test_participant_count_excludes_host() -> Result<(), anyhow::Error> {
    let hub = TestHub::start();

    let host = hub.connect(HOST, 16).await;
    assert_eq!(host.outcome.participant_count, 0);

    let alice = hub.connect(ALICE, 16).await;
    assert_eq!(alice.outcome.participant_count, 1);
    let bob = hub.connect(BOB, 16).await;
    assert_eq!(bob.outcome.participant_count, 2);

    let snapshot = hub.hub.snapshot("ABC123").await?.expect("room");
    assert_eq!(snapshot.participant_count, 2);
    assert_eq!(snapshot.connection_count, 3);
    assert_eq!(snapshot.host.map(|h| h.user_id), Some(HOST));

    bob.disconnect().await;
    let snapshot = hub.hub.snapshot("ABC123").await?.expect("room");
    assert_eq!(snapshot.participant_count, 1);

    Ok(())
}

#[tokio::test]
async fn test_unregister_twice_reports_one_departure() -> Result<(), anyhow::Error> {
    let hub = TestHub::start();
    let _host = hub.connect(HOST, 16).await;
    let alice = hub.connect(ALICE, 16).await;

    alice.disconnect().await;
    alice.disconnect().await;

    let seen = hub.departures.wait_for(1, Duration::from_secs(1)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(seen, vec![("ABC123".to_string(), hub.quiz.id, ALICE)]);
    assert_eq!(hub.departures.departures().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_host_departure_is_not_reported() -> Result<(), anyhow::Error> {
    let hub = TestHub::start();
    let host = hub.connect(HOST, 16).await;

    host.disconnect().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(hub.departures.departures().is_empty());
    assert!(hub.hub.snapshot("ABC123").await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_full_queue_drops_connection_without_blocking() -> Result<(), anyhow::Error> {
    let hub = TestHub::start();
    let mut host = hub.connect(HOST, 64).await;

    // Registration fills both slots with participant_list and participant_update.
    let mut alice = hub.connect(ALICE, 2).await;

    tokio::time::timeout(
        Duration::from_secs(1),
        hub.hub
            .broadcast("ABC123", &ServerEvent::ParticipantUpdate { count: 99 }),
    )
    .await??;

    let seen = hub.departures.wait_for(1, Duration::from_secs(1)).await;
    assert_eq!(seen, vec![("ABC123".to_string(), hub.quiz.id, ALICE)]);
    assert!(alice.is_closed().await);

    let snapshot = hub.hub.snapshot("ABC123").await?.expect("room");
    assert_eq!(snapshot.participant_count, 0);

    // The host still gets the broadcast and the re-announced count.
    let mut counts = Vec::new();
    while let Some(event) = host.next_event(Duration::from_millis(100)).await {
        if event["type"] == "participant_update" {
            counts.push(event["data"]["count"].as_u64().unwrap());
        }
    }
    assert!(counts.contains(&99));
    assert_eq!(counts.last(), Some(&0));

    Ok(())
}

#[tokio::test]
async fn test_send_to_user_targets_current_connection() -> Result<(), anyhow::Error> {
    let hub = TestHub::start();
    let mut stale = hub.connect(ALICE, 16).await;
    let mut current = hub.connect(ALICE, 16).await;
    let mut bob = hub.connect(BOB, 16).await;
    current.drain();
    bob.drain();

    hub.hub
        .send_to_user("ABC123", ALICE, &ServerEvent::wait_for_others())
        .await?;

    assert!(current.wait_for("quiz_end_wait").await.is_some());
    assert!(stale.is_closed().await);
    assert!(bob.next_event(Duration::from_millis(100)).await.is_none());

    // Unknown rooms and users are ignored.
    hub.hub
        .send_to_user("ZZZ999", ALICE, &ServerEvent::wait_for_others())
        .await?;
    hub.hub
        .send_to_user("ABC123", 42, &ServerEvent::wait_for_others())
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_cancel_closes_every_queue() -> Result<(), anyhow::Error> {
    let hub = TestHub::start();
    let mut host = hub.connect(HOST, 16).await;
    let mut alice = hub.connect(ALICE, 16).await;

    hub.hub.cancel();

    assert!(host.is_closed().await);
    assert!(alice.is_closed().await);
    assert!(hub.hub.is_cancelled());

    Ok(())
}
