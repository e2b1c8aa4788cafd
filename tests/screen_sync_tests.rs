//! End-to-end tests of a cafe screen against the in-memory repository

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use studycafe_sync::cache::{CacheEvent, ResourceCache};
use studycafe_sync::config::{ImageCacheConfig, SeatSyncConfig};
use studycafe_sync::model::{CafeDetail, CafeUsage, Rect, ResourceKey, SeatId, SeatRecord, SessionInfo};
use studycafe_sync::reconcile::SaveOutcome;
use studycafe_sync::screen::{CafeScreen, SEATS, SESSIONS, USAGE};
use studycafe_sync::testing::{BytesDecoder, MockCafeRepository, MockImageSource, MockOp, RepoCall};
use tokio::sync::mpsc;
use tokio::time::timeout;

const CAFE: i64 = 1;

fn cafe() -> CafeDetail {
    CafeDetail {
        id: CAFE,
        name: "Test Cafe".to_string(),
        address: Some("Seoul".to_string()),
        image_keys: vec![ResourceKey::new("cafes/1/front.png"), ResourceKey::new("cafes/1/room.png")],
    }
}

fn seats() -> Vec<SeatRecord> {
    vec![
        SeatRecord::new(SeatId::Existing(1), "A-1", Rect::new(0.0, 0.0, 1.0, 1.0)),
        SeatRecord::new(SeatId::Existing(2), "A-2", Rect::new(1.0, 0.0, 1.0, 1.0)),
        SeatRecord::new(SeatId::Existing(3), "A-3", Rect::new(2.0, 0.0, 1.0, 1.0)),
    ]
}

fn repository() -> Arc<MockCafeRepository> {
    Arc::new(
        MockCafeRepository::new()
            .with_cafe(cafe())
            .with_usage(CafeUsage {
                total_seats: 3,
                occupied_seats: 1,
            })
            .with_seats(seats())
            .with_sessions(vec![SessionInfo {
                id: 10,
                seat_id: 1,
                user_name: "lee".to_string(),
                started_at: Utc::now(),
                ends_at: None,
            }]),
    )
}

fn images(source: &Arc<MockImageSource>) -> ResourceCache {
    ResourceCache::new(source.clone(), Arc::new(BytesDecoder), &ImageCacheConfig::default()).unwrap()
}

fn attach(repo: &Arc<MockCafeRepository>, images: ResourceCache) -> (CafeScreen, mpsc::UnboundedReceiver<String>) {
    let config = SeatSyncConfig {
        settle_delay_ms: 1,
        ..SeatSyncConfig::default()
    };
    CafeScreen::attach(CAFE, repo.clone(), images, &config)
}

async fn wait_for_ready(events: &mut tokio::sync::broadcast::Receiver<CacheEvent>, count: usize) {
    let mut ready = 0;
    while ready < count {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("image event")
            .expect("open channel");
        if matches!(event, CacheEvent::Ready(_)) {
            ready += 1;
        }
    }
}

#[tokio::test]
async fn test_refresh_loads_every_section_and_images() {
    let repo = repository();
    let source = Arc::new(MockImageSource::new());
    let cache = images(&source);
    let mut events = cache.subscribe();
    let (screen, _messages) = attach(&repo, cache);

    let summary = screen.refresh().await;
    assert!(summary.all_succeeded());

    let state = screen.state();
    assert_eq!(state.cafe_info.data().map(|c| c.name), Some("Test Cafe".to_string()));
    assert_eq!(state.usage.data().map(|u| u.available_seats()), Some(2));
    assert_eq!(state.seats.data().map(|s| s.len()), Some(3));
    assert_eq!(state.sessions.data().map(|s| s.len()), Some(1));
    assert!(!state.is_loading());

    wait_for_ready(&mut events, 2).await;
    let cafe_images = state.cafe_images();
    assert_eq!(cafe_images.len(), 2);
    assert!(cafe_images.iter().all(|(_, image)| image.is_some()));
}

#[tokio::test]
async fn test_failing_section_is_isolated_and_reported() {
    let repo = repository();
    repo.fail(MockOp::Sessions, "network error");
    let source = Arc::new(MockImageSource::new());
    let (screen, mut messages) = attach(&repo, images(&source));

    let summary = screen.refresh().await;
    assert_eq!(summary.failure(SESSIONS), Some("network error"));

    let state = screen.state();
    assert_eq!(state.cafe_info.data().map(|c| c.name), Some("Test Cafe".to_string()));
    assert!(state.cafe_info.error().is_none());
    assert_eq!(state.sessions.error().as_deref(), Some("network error"));
    assert!(state.sessions.data().is_none());

    let message = messages.recv().await.unwrap();
    assert!(message.contains("network error"));
}

#[tokio::test]
async fn test_stale_data_survives_failed_refetch() {
    let repo = repository();
    let source = Arc::new(MockImageSource::new());
    let (screen, _messages) = attach(&repo, images(&source));

    screen.refresh().await;
    repo.fail(MockOp::CafeUsage, "timeout");
    screen.refresh().await;

    let usage = screen.state().usage.snapshot();
    assert_eq!(usage.data.map(|u| u.total_seats), Some(3));
    assert_eq!(usage.error.as_deref(), Some("timeout"));
    assert!(!usage.is_loading);
}

#[tokio::test]
async fn test_slow_section_keeps_screen_loading() {
    let repo = repository();
    repo.delay(MockOp::Sessions, Duration::from_millis(300));
    repo.fail(MockOp::CafeUsage, "boom");
    let source = Arc::new(MockImageSource::new());
    let (screen, _messages) = attach(&repo, images(&source));
    let screen = Arc::new(screen);

    let pass = {
        let screen = screen.clone();
        tokio::spawn(async move { screen.refresh().await })
    };

    let mut usage = screen.state().usage.subscribe();
    usage.wait_for(|s| s.error.is_some()).await.unwrap();
    assert!(screen.state().is_loading());
    assert!(screen.state().loading_sections().contains(&SESSIONS));
    assert!(!screen.state().loading_sections().contains(&USAGE));

    let summary = pass.await.unwrap();
    assert_eq!(summary.failure(USAGE), Some("boom"));
    assert!(!screen.state().is_loading());
}

#[tokio::test]
async fn test_edit_and_save_round_trip() {
    let repo = repository();
    let source = Arc::new(MockImageSource::new());
    let (screen, mut messages) = attach(&repo, images(&source));
    screen.refresh().await;
    repo.clear_calls();

    let mut editor = screen.editor().unwrap();
    editor.remove(&SeatId::Existing(2));
    editor.relabel(&SeatId::Existing(1), "Window");
    editor.add("B-1", Rect::new(0.0, 1.0, 1.0, 1.0));

    let outcome = screen.save_seat_config(editor.seats()).await;
    assert_eq!(outcome, SaveOutcome::Saved);
    assert_eq!(messages.recv().await.unwrap(), "좌석 정보가 저장되었습니다");

    assert_eq!(
        repo.calls(),
        vec![
            RepoCall::DeleteSeat(2),
            RepoCall::UpdateSeats(vec![1]),
            RepoCall::CreateSeats(vec!["B-1".to_string()]),
            RepoCall::Seats,
        ]
    );

    let saved = screen.state().seats.data().unwrap();
    assert_eq!(saved, repo.server_seats());
    assert!(saved.iter().all(|seat| !seat.id.is_new()));

    // Saving the same edits again finds nothing to do
    let editor = screen.editor().unwrap();
    assert!(!editor.is_dirty());
    assert_eq!(screen.save_seat_config(editor.seats()).await, SaveOutcome::NoChanges);
}

#[tokio::test]
async fn test_seat_section_loading_during_save() {
    let repo = repository();
    repo.delay(MockOp::UpdateSeats, Duration::from_millis(200));
    let source = Arc::new(MockImageSource::new());
    let (screen, _messages) = attach(&repo, images(&source));
    screen.refresh().await;
    let screen = Arc::new(screen);

    let mut editor = screen.editor().unwrap();
    editor.relabel(&SeatId::Existing(3), "Corner");
    let edited = editor.seats().to_vec();

    let mut seats = screen.state().seats.subscribe();
    let save = {
        let screen = screen.clone();
        tokio::spawn(async move { screen.save_seat_config(&edited).await })
    };

    seats.wait_for(|s| s.is_loading).await.unwrap();
    assert_eq!(screen.state().loading_sections(), vec![SEATS]);

    assert_eq!(save.await.unwrap(), SaveOutcome::Saved);
    assert!(!screen.state().seats.is_loading());
    assert_eq!(screen.state().seats.data().unwrap()[2].label, "Corner");
}

#[tokio::test]
async fn test_refresh_leaves_seats_to_running_save() {
    let repo = repository();
    repo.delay(MockOp::UpdateSeats, Duration::from_millis(300));
    let source = Arc::new(MockImageSource::new());
    let (screen, _messages) = attach(&repo, images(&source));
    screen.refresh().await;
    repo.clear_calls();
    let screen = Arc::new(screen);

    let mut editor = screen.editor().unwrap();
    editor.relabel(&SeatId::Existing(2), "Aisle");
    let edited = editor.seats().to_vec();

    let mut seats = screen.state().seats.subscribe();
    let save = {
        let screen = screen.clone();
        tokio::spawn(async move { screen.save_seat_config(&edited).await })
    };
    seats.wait_for(|s| s.is_loading).await.unwrap();

    let summary = screen.refresh().await;
    assert!(summary.all_succeeded());
    assert!(!summary.succeeded.contains(&SEATS));
    assert!(screen.state().seats.is_loading());
    assert!(!save.is_finished());
    assert_eq!(screen.state().seats.data().unwrap()[1].label, "A-2");

    assert_eq!(save.await.unwrap(), SaveOutcome::Saved);
    assert!(!screen.state().is_loading());
    assert_eq!(screen.state().seats.data().unwrap()[1].label, "Aisle");
    let seat_reads = repo.calls().into_iter().filter(|call| *call == RepoCall::Seats).count();
    assert_eq!(seat_reads, 1);
}

#[tokio::test]
async fn test_detach_stops_pending_sections() {
    let repo = repository();
    repo.delay(MockOp::Seats, Duration::from_secs(30));
    let source = Arc::new(MockImageSource::new());
    let (screen, _messages) = attach(&repo, images(&source));
    let screen = Arc::new(screen);

    let pass = {
        let screen = screen.clone();
        tokio::spawn(async move { screen.refresh().await })
    };

    let state = screen.state();
    state.cafe_info.subscribe().wait_for(|s| s.data.is_some()).await.unwrap();
    state.usage.subscribe().wait_for(|s| s.data.is_some()).await.unwrap();
    state.sessions.subscribe().wait_for(|s| s.data.is_some()).await.unwrap();
    assert_eq!(state.loading_sections(), vec![SEATS]);
    screen.detach();
    assert!(!screen.is_attached());

    let summary = timeout(Duration::from_secs(5), pass).await.unwrap().unwrap();
    assert_eq!(summary.cancelled, vec![SEATS]);
    assert!(screen.state().seats.data().is_none());
    assert!(!screen.state().is_loading());

    let edited = seats();
    assert_eq!(screen.save_seat_config(&edited).await, SaveOutcome::Cancelled);
}

#[tokio::test]
async fn test_image_fetch_outlives_screen() {
    let repo = repository();
    let source = Arc::new(MockImageSource::new());
    source.hold();
    let cache = images(&source);
    let mut events = cache.subscribe();

    {
        let (screen, _messages) = attach(&repo, cache.clone());
        screen.refresh().await;
        assert!(cache.is_in_flight(&ResourceKey::new("cafes/1/front.png")));
    }

    source.release();
    wait_for_ready(&mut events, 2).await;
    assert!(cache.contains(&ResourceKey::new("cafes/1/front.png")));
    assert!(cache.contains(&ResourceKey::new("cafes/1/room.png")));
}

#[tokio::test]
async fn test_save_before_load_is_rejected() {
    let repo = repository();
    let source = Arc::new(MockImageSource::new());
    let (screen, mut messages) = attach(&repo, images(&source));

    let outcome = screen.save_seat_config(&seats()).await;
    assert_eq!(outcome, SaveOutcome::NotLoaded);
    assert_eq!(messages.recv().await.unwrap(), outcome.message());
    assert!(repo.calls().is_empty());
}
