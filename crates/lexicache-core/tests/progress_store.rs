mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use common::{progress_store, progress_store_with_token, record, Failure, MockService, OTHER_USER, USER};
use lexicache_core::auth::StaticToken;
use lexicache_core::cache::{CacheKey, EntryState};
use lexicache_core::clock::Clock;
use lexicache_core::models::{Category, ProgressUpdate};
use lexicache_core::store::{ProgressEvent, Source};
use lexicache_core::StoreError;

fn seeded() -> Arc<MockService> {
    MockService::with_records(vec![
        record("vocab-1", 2, false),
        record("grammar-1", 1, true),
        record("grammar-2", 0, false),
    ])
}

// ============================================================================
// Freshness
// ============================================================================

#[tokio::test]
async fn test_second_read_serves_same_cached_object() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    let first = store.read_all(USER, false).await;
    assert_eq!(first.source, Source::Network);
    assert_eq!(first.data.len(), 3);
    assert_eq!(store.state(&CacheKey::Global), EntryState::Fresh);

    clock.advance(Duration::seconds(1));
    let second = store.read_all(USER, false).await;

    assert_eq!(second.source, Source::Cache);
    assert!(Arc::ptr_eq(&first.data, &second.data));
    assert_eq!(service.progress_calls(), 1);
}

#[tokio::test]
async fn test_reads_within_expiry_never_refetch() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    store.read_all(USER, false).await;
    for _ in 0..9 {
        clock.advance(Duration::seconds(30));
        let snapshot = store.read_all(USER, false).await;
        assert_eq!(snapshot.source, Source::Cache);
    }

    // 4m30s after the fetch
    assert_eq!(service.progress_calls(), 1);
}

#[tokio::test]
async fn test_expired_cache_refetches_once() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    store.read_all(USER, false).await;
    clock.advance(Duration::minutes(6));
    assert_eq!(store.state(&CacheKey::Global), EntryState::Stale);

    let refreshed = store.read_all(USER, false).await;
    assert_eq!(refreshed.source, Source::Network);
    assert_eq!(refreshed.fetched_at, Some(clock.now()));

    let again = store.read_all(USER, false).await;
    assert_eq!(again.source, Source::Cache);
    assert_eq!(service.progress_calls(), 2);
}

#[tokio::test]
async fn test_forced_read_always_fetches() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    let first = store.read_all(USER, false).await;

    clock.advance(Duration::seconds(2));
    let forced = store.read_all(USER, true).await;
    assert_eq!(forced.source, Source::Network);
    assert!(forced.fetched_at > first.fetched_at);

    // Inside the debounce window too
    let forced_again = store.read_all(USER, true).await;
    assert_eq!(forced_again.source, Source::Network);
    assert_eq!(service.progress_calls(), 3);
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test]
async fn test_concurrent_reads_share_one_request() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    service.hold();
    let (a, b, c, ()) = tokio::join!(
        store.read_all(USER, false),
        store.read_all(USER, false),
        store.read_all(USER, false),
        async {
            service.entered().await;
            assert_eq!(store.state(&CacheKey::Global), EntryState::Loading);
            service.release();
        },
    );

    assert_eq!(service.progress_calls(), 1);
    assert!(Arc::ptr_eq(&a.data, &b.data));
    assert!(Arc::ptr_eq(&b.data, &c.data));
    assert!(a.error.is_none() && b.error.is_none() && c.error.is_none());
    assert_eq!(store.state(&CacheKey::Global), EntryState::Fresh);
}

#[tokio::test]
async fn test_concurrent_reads_from_spawned_tasks() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = Arc::new(progress_store(&service, &clock));

    service.hold();
    let handles: Vec<_> = (0..5)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.read_all(USER, false).await })
        })
        .collect();

    service.entered().await;
    // Let the remaining tasks attach to the in-flight request
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    service.release();

    for handle in handles {
        let snapshot = handle.await.expect("read task panicked");
        assert_eq!(snapshot.data.len(), 3);
    }
    assert_eq!(service.progress_calls(), 1);
}

#[tokio::test]
async fn test_abandoned_read_is_no_longer_loading() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    service.hold();
    tokio::select! {
        _ = store.read_all(USER, false) => panic!("request should still be held"),
        _ = service.entered() => {}
    }
    assert_eq!(store.state(&CacheKey::Global), EntryState::Empty);
    service.release();

    clock.advance(Duration::milliseconds(600));
    let snapshot = store.read_all(USER, false).await;
    assert_eq!(snapshot.source, Source::Network);
    assert_eq!(service.progress_calls(), 2);
}

#[tokio::test]
async fn test_failed_fetch_is_debounced() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);
    service.fail_with(Failure::Server);

    let failed = store.read_all(USER, false).await;
    assert_eq!(failed.source, Source::Default);
    assert!(failed.data.is_empty());
    assert!(failed.should_show_error());

    // Immediately reading again reports the same failure without a request
    let debounced = store.read_all(USER, false).await;
    assert!(matches!(debounced.error, Some(StoreError::Transport(_))));
    assert_eq!(service.progress_calls(), 1);

    service.fail_with(Failure::None);
    clock.advance(Duration::milliseconds(600));
    let recovered = store.read_all(USER, false).await;
    assert_eq!(recovered.source, Source::Network);
    assert!(store.last_error(&CacheKey::Global).is_none());
    assert_eq!(service.progress_calls(), 2);
}

// ============================================================================
// Failures and credentials
// ============================================================================

#[tokio::test]
async fn test_failure_serves_stale_data() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    let fresh = store.read_all(USER, false).await;
    clock.advance(Duration::minutes(10));
    service.fail_with(Failure::Server);

    let stale = store.read_all(USER, false).await;
    assert_eq!(stale.source, Source::Stale);
    assert!(Arc::ptr_eq(&fresh.data, &stale.data));
    assert!(stale.error.as_ref().is_some_and(StoreError::is_transient));
    assert!(!stale.should_show_error());
    assert!(store.last_error(&CacheKey::Global).is_some());
}

#[tokio::test]
async fn test_unauthorized_response_maps_to_auth_required() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);
    service.fail_with(Failure::Unauthorized);

    let snapshot = store.read_all(USER, false).await;
    assert!(matches!(snapshot.error, Some(StoreError::AuthRequired)));
}

#[tokio::test]
async fn test_missing_token_returns_default() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store_with_token(&service, &clock, StaticToken::none());

    let all = store.read_all(USER, false).await;
    assert_eq!(all.source, Source::Default);
    assert!(all.data.is_empty());
    assert!(matches!(all.error, Some(StoreError::AuthRequired)));

    let exercise = store.read_exercise(USER, "vocab-1", false).await;
    assert_eq!(exercise.data.exercise_id, "vocab-1");
    assert_eq!(exercise.data.attempt_count(), 0);

    let update = store
        .apply_attempt(USER, "vocab-1", ProgressUpdate::new(5.0, true, true))
        .await;
    assert!(matches!(update, Err(StoreError::AuthRequired)));

    assert_eq!(service.progress_calls(), 0);
    assert_eq!(service.exercise_calls(), 0);
    assert_eq!(service.update_calls(), 0);
}

// ============================================================================
// Identity
// ============================================================================

#[tokio::test]
async fn test_identity_change_invalidates_everything() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);
    let mut events = store.subscribe();

    store.read_all(USER, false).await;
    store.read_exercise(USER, "speaking-1", false).await;
    assert!(!store.detect_identity_change(USER));

    assert!(store.detect_identity_change(OTHER_USER));
    assert_eq!(store.state(&CacheKey::Global), EntryState::Stale);
    assert_eq!(store.state(&CacheKey::exercise("speaking-1")), EntryState::Stale);

    let mut saw_change = false;
    while let Ok(event) = events.try_recv() {
        if event == (ProgressEvent::IdentityChanged { user_id: OTHER_USER.to_string() }) {
            saw_change = true;
        }
    }
    assert!(saw_change);

    // Still well within the expiry and the debounce window
    let snapshot = store.read_all(OTHER_USER, false).await;
    assert_eq!(snapshot.source, Source::Network);
    assert_eq!(service.progress_calls(), 2);
}

#[tokio::test]
async fn test_previous_user_data_never_served_after_switch() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    store.read_all(USER, false).await;
    service.fail_with(Failure::Server);

    let snapshot = store.read_all(OTHER_USER, false).await;
    assert_eq!(snapshot.source, Source::Default);
    assert!(snapshot.data.is_empty());
    assert!(snapshot.error.is_some());
}

#[tokio::test]
async fn test_fetch_in_flight_during_identity_change_is_not_cached() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    service.hold();
    let (old, ()) = tokio::join!(store.read_all(USER, false), async {
        service.entered().await;
        store.detect_identity_change(OTHER_USER);
        service.release();
    });

    // The caller still receives what it asked for
    assert_eq!(old.data.len(), 3);
    assert_eq!(store.state(&CacheKey::Global), EntryState::Empty);

    let snapshot = store.read_all(OTHER_USER, false).await;
    assert_eq!(snapshot.source, Source::Network);
    assert_eq!(service.progress_calls(), 2);
}

// ============================================================================
// Exercise reads
// ============================================================================

#[tokio::test]
async fn test_exercise_read_uses_fresh_global_collection() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    store.read_all(USER, false).await;
    let snapshot = store.read_exercise(USER, "vocab-1", false).await;
    assert_eq!(snapshot.source, Source::Cache);
    assert_eq!(snapshot.data.attempt_count(), 2);
    assert_eq!(service.exercise_calls(), 0);
}

#[tokio::test]
async fn test_invalidated_exercise_is_refetched_despite_global() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    store.read_exercise(USER, "vocab-1", false).await;
    store.read_all(USER, false).await;
    assert_eq!(service.exercise_calls(), 1);

    let key = CacheKey::exercise("vocab-1");
    store.invalidate(Some(&key));
    assert_eq!(store.state(&key), EntryState::Stale);

    let snapshot = store.read_exercise(USER, "vocab-1", false).await;
    assert_eq!(snapshot.source, Source::Network);
    assert_eq!(service.exercise_calls(), 2);
    assert_eq!(store.state(&key), EntryState::Fresh);
}

#[tokio::test]
async fn test_invalidating_exercise_known_only_from_global() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    store.read_all(USER, false).await;
    let key = CacheKey::exercise("grammar-1");
    assert_eq!(store.state(&key), EntryState::Empty);

    store.invalidate(Some(&key));
    assert_eq!(store.state(&key), EntryState::Stale);

    let snapshot = store.read_exercise(USER, "grammar-1", false).await;
    assert_eq!(snapshot.source, Source::Network);
    assert!(snapshot.data.completed);
    assert_eq!(service.exercise_calls(), 1);
}

#[tokio::test]
async fn test_unknown_exercise_yields_empty_record() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    let snapshot = store.read_exercise(USER, "grammar-9", false).await;
    assert_eq!(snapshot.source, Source::Network);
    assert_eq!(snapshot.data.exercise_id, "grammar-9");
    assert!(!snapshot.data.completed);
    assert_eq!(store.state(&CacheKey::exercise("grammar-9")), EntryState::Fresh);

    clock.advance(Duration::seconds(5));
    store.read_exercise(USER, "grammar-9", false).await;
    assert_eq!(service.exercise_calls(), 1);
}

// ============================================================================
// Progress updates
// ============================================================================

#[tokio::test]
async fn test_completed_attempt_invalidates_global() {
    let service = MockService::with_records(vec![record("ex-1", 1, false)]);
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    let before = store.read_all(USER, false).await;
    let mut events = store.subscribe();
    clock.advance(Duration::seconds(10));

    let updated = store
        .apply_attempt(USER, "ex-1", ProgressUpdate::new(12.5, true, true))
        .await
        .expect("update should succeed");
    assert!(updated.completed);
    assert_eq!(store.state(&CacheKey::Global), EntryState::Stale);

    let mut invalidated = false;
    while let Ok(event) = events.try_recv() {
        invalidated |= event == ProgressEvent::Invalidated(Some(CacheKey::Global));
    }
    assert!(invalidated);

    let after = store.read_all(USER, false).await;
    assert_eq!(after.source, Source::Network);
    assert!(after.data[0].completed);
    assert_eq!(service.progress_calls(), 2);

    // Readers holding the old collection are unaffected
    assert!(!before.data[0].completed);
    assert_eq!(before.data[0].attempt_count(), 1);
}

#[tokio::test]
async fn test_completion_during_first_fetch_is_not_overwritten() {
    let service = MockService::with_records(vec![record("grammar-1", 1, false)]);
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    service.hold_progress();
    let (first, ()) = tokio::join!(store.read_all(USER, false), async {
        service.entered().await;
        let updated = store
            .apply_attempt(USER, "grammar-1", ProgressUpdate::new(9.0, true, true))
            .await
            .expect("update should succeed");
        assert!(updated.completed);
        service.release_progress();
    });

    // The caller receives the response built before the update
    assert!(!first.data[0].completed);
    assert_ne!(store.state(&CacheKey::Global), EntryState::Fresh);

    let next = store.read_all(USER, false).await;
    assert_eq!(next.source, Source::Network);
    assert!(next.data[0].completed);
    assert_eq!(store.aggregate().grammar.completed, 1);
    assert_eq!(service.progress_calls(), 2);
}

#[tokio::test]
async fn test_attempt_during_first_fetch_is_not_lost() {
    let service = MockService::with_records(vec![record("vocab-1", 1, false)]);
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    service.hold_progress();
    let (first, ()) = tokio::join!(store.read_all(USER, false), async {
        service.entered().await;
        store
            .apply_attempt(USER, "vocab-1", ProgressUpdate::new(4.0, false, false))
            .await
            .expect("update should succeed");
        service.release_progress();
    });
    assert_eq!(first.data[0].attempt_count(), 1);

    let next = store.read_all(USER, false).await;
    assert_eq!(next.source, Source::Network);
    assert_eq!(next.data[0].attempt_count(), 2);

    let exercise = store.read_exercise(USER, "vocab-1", false).await;
    assert_eq!(exercise.source, Source::Cache);
    assert_eq!(exercise.data.attempt_count(), 2);
}

#[tokio::test]
async fn test_incomplete_attempt_patches_cache_without_refetch() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    store.read_all(USER, false).await;
    let updated = store
        .apply_attempt(
            USER,
            "vocab-1",
            ProgressUpdate::new(8.0, false, false).with_answer("la casa"),
        )
        .await
        .expect("update should succeed");
    assert_eq!(updated.attempt_count(), 3);

    let all = store.read_all(USER, false).await;
    assert_eq!(all.source, Source::Cache);
    let vocab = all
        .data
        .iter()
        .find(|r| r.exercise_id == "vocab-1")
        .expect("record present");
    assert_eq!(vocab.attempt_count(), 3);
    assert_eq!(
        vocab.latest_attempt().and_then(|a| a.user_answer.as_deref()),
        Some("la casa")
    );

    let exercise = store.read_exercise(USER, "vocab-1", false).await;
    assert_eq!(exercise.source, Source::Cache);
    assert_eq!(exercise.data, updated);
    assert_eq!(service.progress_calls(), 1);
    assert_eq!(service.exercise_calls(), 0);
}

#[tokio::test]
async fn test_new_exercise_is_appended_to_global() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    store.read_all(USER, false).await;
    store
        .apply_attempt(USER, "speaking-3", ProgressUpdate::new(3.0, false, false))
        .await
        .expect("update should succeed");

    let all = store.read_all(USER, false).await;
    assert_eq!(all.data.len(), 4);
    assert_eq!(all.data[3].category(), Some(Category::Pronunciation));
}

#[tokio::test]
async fn test_attempts_are_append_only() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    let initial = store.read_exercise(USER, "vocab-1", false).await.data;
    let mut previous = initial.attempts().to_vec();

    for (i, correct) in [false, true].into_iter().enumerate() {
        let updated = store
            .apply_attempt(USER, "vocab-1", ProgressUpdate::new(4.0 + i as f64, correct, false))
            .await
            .expect("update should succeed");

        assert_eq!(updated.attempt_count(), previous.len() + 1);
        assert_eq!(&updated.attempts()[..previous.len()], previous.as_slice());
        previous = updated.attempts().to_vec();
    }
}

#[tokio::test]
async fn test_failed_attempt_leaves_cache_and_resyncs() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    let before = store.read_all(USER, false).await;
    service.fail_with(Failure::Rejected);

    let result = store
        .apply_attempt(USER, "vocab-1", ProgressUpdate::new(6.0, true, true))
        .await;
    match result {
        Err(StoreError::Application(message)) => assert_eq!(message, "Request rejected"),
        other => panic!("expected rejection, got {:?}", other),
    }

    // One forced refetch of the exercise to resync
    assert_eq!(service.exercise_calls(), 1);

    service.fail_with(Failure::None);
    let after = store.read_all(USER, false).await;
    assert_eq!(after.source, Source::Cache);
    assert!(Arc::ptr_eq(&before.data, &after.data));
}

// ============================================================================
// Invalidation, aggregate, clear
// ============================================================================

#[tokio::test]
async fn test_invalidate_forces_refetch_but_keeps_data() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    store.read_all(USER, false).await;
    store.invalidate(Some(&CacheKey::Global));
    assert_eq!(store.state(&CacheKey::Global), EntryState::Stale);

    service.fail_with(Failure::Server);
    let stale = store.read_all(USER, false).await;
    assert_eq!(stale.source, Source::Stale);
    assert_eq!(stale.data.len(), 3);
    assert_eq!(service.progress_calls(), 2);

    service.fail_with(Failure::None);
    store.invalidate(None);
    let fresh = store.read_all(USER, false).await;
    assert_eq!(fresh.source, Source::Network);
    assert_eq!(service.progress_calls(), 3);
}

#[tokio::test]
async fn test_aggregate_counts_completed_by_category() {
    let service = MockService::with_records(vec![
        record("vocab-1", 1, true),
        record("vocab-2", 2, true),
        record("grammar-1", 1, true),
        record("grammar-2", 1, true),
        record("grammar-3", 1, true),
        record("speaking-1", 1, false),
    ]);
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);

    assert_eq!(store.aggregate().overall().completed, 0);
    store.read_all(USER, false).await;

    let aggregate = store.aggregate();
    assert_eq!(aggregate.vocabulary.completed, 2);
    assert_eq!(aggregate.vocabulary.total, 4);
    // Clamped to the catalog size
    assert_eq!(aggregate.grammar.completed, 2);
    assert_eq!(aggregate.pronunciation.completed, 0);
    assert_eq!(aggregate.pronunciation.total, 3);
}

#[tokio::test]
async fn test_clear_cache_empties_everything() {
    let service = seeded();
    let clock = Clock::manual(Utc::now());
    let store = progress_store(&service, &clock);
    let mut events = store.subscribe();

    store.read_all(USER, false).await;
    store.clear_cache();

    assert_eq!(store.state(&CacheKey::Global), EntryState::Empty);
    assert_eq!(store.aggregate().overall().completed, 0);

    let mut cleared = false;
    while let Ok(event) = events.try_recv() {
        cleared |= event == ProgressEvent::Cleared;
    }
    assert!(cleared);

    store.read_all(USER, false).await;
    assert_eq!(service.progress_calls(), 2);
}
