//! Cached exercise progress.
//!
//! `ProgressStore` holds the learner's full progress collection (`Global`)
//! and individually fetched exercise records. Reads serve a fresh cache
//! entry without touching the network, otherwise go through a
//! `FetchCoordinator` so that concurrent readers share one request. Progress
//! updates are never applied locally ahead of the server: the cache only
//! changes once the backend has confirmed the new record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::ProgressService;
use crate::auth::{IdentityGuard, TokenProvider};
use crate::cache::{CacheKey, CachedData, EntryState};
use crate::catalog::CatalogProvider;
use crate::clock::Clock;
use crate::config::StoreSettings;
use crate::models::{AggregateProgress, ProgressRecord, ProgressUpdate};
use crate::sync::{FetchCoordinator, Fetched};
use crate::StoreError;

use super::{with_timeout, Snapshot};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Change notifications for consumers that derive state from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// New data was written for the key
    Updated(CacheKey),
    /// The key (or every key, for `None`) must be refetched before it is fresh again
    Invalidated(Option<CacheKey>),
    /// A different user signed in; everything cached is now stale
    IdentityChanged { user_id: String },
    /// The cache was emptied
    Cleared,
}

type GlobalEntry = CachedData<Arc<Vec<ProgressRecord>>>;

#[derive(Default)]
struct ProgressState {
    identity: IdentityGuard,
    /// Bumped on identity change and clear; results fetched under an older
    /// epoch are returned to their caller but never cached.
    epoch: u64,
    global: Option<GlobalEntry>,
    exercises: HashMap<String, CachedData<ProgressRecord>>,
    errors: HashMap<CacheKey, StoreError>,
    /// Lowest fetch generation still allowed to write each key. Raised by
    /// confirmed updates so that fetches started before them are discarded.
    floors: HashMap<CacheKey, u64>,
}

impl ProgressState {
    fn accepts(&self, epoch: u64, key: &CacheKey, generation: u64, stored: Option<u64>) -> bool {
        let floor = self.floors.get(key).copied().unwrap_or(0);
        self.epoch == epoch && generation >= floor && stored.map_or(true, |g| g < generation)
    }
}

pub struct ProgressStore {
    service: Arc<dyn ProgressService>,
    tokens: Arc<dyn TokenProvider>,
    catalog: Arc<dyn CatalogProvider>,
    clock: Clock,
    settings: StoreSettings,
    state: Mutex<ProgressState>,
    global_fetches: FetchCoordinator<CacheKey, Arc<Vec<ProgressRecord>>>,
    exercise_fetches: FetchCoordinator<CacheKey, Option<ProgressRecord>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl ProgressStore {
    pub fn new(
        service: Arc<dyn ProgressService>,
        tokens: Arc<dyn TokenProvider>,
        catalog: Arc<dyn CatalogProvider>,
        settings: StoreSettings,
    ) -> Self {
        Self::with_clock(service, tokens, catalog, settings, Clock::system())
    }

    pub fn with_clock(
        service: Arc<dyn ProgressService>,
        tokens: Arc<dyn TokenProvider>,
        catalog: Arc<dyn CatalogProvider>,
        settings: StoreSettings,
        clock: Clock,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            global_fetches: FetchCoordinator::new(clock.clone(), settings.debounce, settings.request_timeout),
            exercise_fetches: FetchCoordinator::new(clock.clone(), settings.debounce, settings.request_timeout),
            service,
            tokens,
            catalog,
            clock,
            settings,
            state: Mutex::new(ProgressState::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: ProgressEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn expiry(&self) -> Duration {
        self.settings.cache_expiry
    }

    // ===== Reads =====

    /// The learner's full progress collection.
    ///
    /// Serves the cached collection while it is fresh. Otherwise fetches it,
    /// joining a fetch already in flight. When no fetch is possible the last
    /// collection fetched for `user_id` is served, or an empty one.
    pub async fn read_all(&self, user_id: &str, force: bool) -> Snapshot<Arc<Vec<ProgressRecord>>> {
        let Some(token) = self.tokens.token() else {
            debug!("No token available, serving empty progress");
            return Snapshot::placeholder(Arc::default(), Some(StoreError::AuthRequired));
        };
        self.detect_identity_change(user_id);

        let key = CacheKey::Global;
        let now = self.clock.now();
        let epoch = {
            let state = self.lock();
            if !force {
                if let Some(cached) = state
                    .global
                    .as_ref()
                    .filter(|c| c.is_fresh(now, self.expiry(), user_id))
                {
                    debug!(key = %key, "Serving cached progress");
                    return Snapshot::cached(Arc::clone(&cached.data), cached.cached_at);
                }
            }
            state.epoch
        };

        let service = Arc::clone(&self.service);
        let fetched = self
            .global_fetches
            .fetch(&key, force, move || async move {
                service.get_all_progress(&token).await.map(Arc::new)
            })
            .await;

        match fetched {
            None => self.global_fallback(user_id, None),
            Some(Fetched {
                generation,
                result: Ok(records),
                joined,
            }) => {
                let fetched_at = self.clock.now();
                let stored = {
                    let mut state = self.lock();
                    let stored = state.global.as_ref().map(|c| c.generation);
                    if !state.accepts(epoch, &key, generation, stored) {
                        false
                    } else {
                        state.global = Some(CachedData::fetched(
                            Arc::clone(&records),
                            fetched_at,
                            Some(user_id.to_string()),
                            generation,
                        ));
                        state.errors.remove(&key);
                        true
                    }
                };
                if stored {
                    debug!(key = %key, count = records.len(), generation, "Progress cached");
                    self.notify(ProgressEvent::Updated(key));
                } else if !joined {
                    debug!(key = %key, generation, "Discarding superseded progress fetch");
                }
                Snapshot::network(records, fetched_at)
            }
            Some(Fetched { result: Err(e), .. }) => {
                let err = StoreError::from(e);
                warn!(key = %key, error = %err, "Failed to fetch progress");
                self.record_error(epoch, key, &err);
                self.global_fallback(user_id, Some(err))
            }
        }
    }

    /// One exercise's record; an exercise without progress yields an empty record.
    ///
    /// A fresh global collection containing the exercise also counts as a
    /// cache hit.
    pub async fn read_exercise(&self, user_id: &str, exercise_id: &str, force: bool) -> Snapshot<ProgressRecord> {
        let Some(token) = self.tokens.token() else {
            debug!(exercise_id, "No token available, serving empty record");
            return Snapshot::placeholder(ProgressRecord::empty(exercise_id), Some(StoreError::AuthRequired));
        };
        self.detect_identity_change(user_id);

        let key = CacheKey::exercise(exercise_id);
        let now = self.clock.now();
        let epoch = {
            let state = self.lock();
            if !force {
                let entry = state.exercises.get(exercise_id);
                if let Some(cached) = entry.filter(|c| c.is_fresh(now, self.expiry(), user_id)) {
                    return Snapshot::cached(cached.data.clone(), cached.cached_at);
                }
                // An explicitly invalidated exercise is refetched even when
                // the collection still holds it
                let invalidated = entry.is_some_and(|c| c.invalidated);
                if let Some(global) = state
                    .global
                    .as_ref()
                    .filter(|c| !invalidated && c.is_fresh(now, self.expiry(), user_id))
                {
                    if let Some(record) = global.data.iter().find(|r| r.exercise_id == exercise_id) {
                        return Snapshot::cached(record.clone(), global.cached_at);
                    }
                }
            }
            state.epoch
        };

        let service = Arc::clone(&self.service);
        let id = exercise_id.to_string();
        let fetched = self
            .exercise_fetches
            .fetch(&key, force, move || async move {
                service.get_exercise_progress(&token, &id).await
            })
            .await;

        match fetched {
            None => self.exercise_fallback(user_id, exercise_id, None),
            Some(Fetched {
                generation,
                result: Ok(record),
                ..
            }) => {
                let record = record.unwrap_or_else(|| ProgressRecord::empty(exercise_id));
                let fetched_at = self.clock.now();
                let stored = {
                    let mut state = self.lock();
                    let stored = state.exercises.get(exercise_id).map(|c| c.generation);
                    if !state.accepts(epoch, &key, generation, stored) {
                        false
                    } else {
                        state.exercises.insert(
                            exercise_id.to_string(),
                            CachedData::fetched(record.clone(), fetched_at, Some(user_id.to_string()), generation),
                        );
                        state.errors.remove(&key);
                        true
                    }
                };
                if stored {
                    debug!(key = %key, attempts = record.attempt_count(), "Exercise progress cached");
                    self.notify(ProgressEvent::Updated(key));
                }
                Snapshot::network(record, fetched_at)
            }
            Some(Fetched { result: Err(e), .. }) => {
                let err = StoreError::from(e);
                warn!(key = %key, error = %err, "Failed to fetch exercise progress");
                self.record_error(epoch, key, &err);
                self.exercise_fallback(user_id, exercise_id, Some(err))
            }
        }
    }

    fn record_error(&self, epoch: u64, key: CacheKey, err: &StoreError) {
        let mut state = self.lock();
        if state.epoch == epoch {
            state.errors.insert(key, err.clone());
        }
    }

    /// Last collection fetched for `user_id`, or an empty one.
    fn global_fallback(&self, user_id: &str, error: Option<StoreError>) -> Snapshot<Arc<Vec<ProgressRecord>>> {
        let state = self.lock();
        let error = error.or_else(|| state.errors.get(&CacheKey::Global).cloned());
        match state
            .global
            .as_ref()
            .filter(|c| c.owner.as_deref() == Some(user_id))
        {
            Some(cached) => Snapshot::stale(Arc::clone(&cached.data), cached.cached_at, error),
            None => Snapshot::placeholder(Arc::default(), error),
        }
    }

    fn exercise_fallback(&self, user_id: &str, exercise_id: &str, error: Option<StoreError>) -> Snapshot<ProgressRecord> {
        let state = self.lock();
        let error = error.or_else(|| state.errors.get(&CacheKey::exercise(exercise_id)).cloned());
        let owned = |owner: &Option<String>| owner.as_deref() == Some(user_id);

        if let Some(cached) = state.exercises.get(exercise_id).filter(|c| owned(&c.owner)) {
            return Snapshot::stale(cached.data.clone(), cached.cached_at, error);
        }
        let from_global = state.global.as_ref().filter(|c| owned(&c.owner)).and_then(|global| {
            global
                .data
                .iter()
                .find(|r| r.exercise_id == exercise_id)
                .map(|record| (record.clone(), global.cached_at))
        });
        match from_global {
            Some((record, cached_at)) => Snapshot::stale(record, cached_at, error),
            None => Snapshot::placeholder(ProgressRecord::empty(exercise_id), error),
        }
    }

    // ===== Invalidation and identity =====

    /// Mark one key, or every key, as needing a refetch. Cached data stays
    /// available as a fallback.
    pub fn invalidate(&self, key: Option<&CacheKey>) {
        {
            let mut state = self.lock();
            match key {
                None => {
                    if let Some(global) = state.global.as_mut() {
                        global.invalidate();
                    }
                    state.exercises.values_mut().for_each(CachedData::invalidate);
                }
                Some(CacheKey::Global) => {
                    if let Some(global) = state.global.as_mut() {
                        global.invalidate();
                    }
                }
                Some(CacheKey::Exercise(id)) => {
                    if !state.exercises.contains_key(id) {
                        // Track the copy held by the collection so the key reads as stale
                        let copied = state.global.as_ref().and_then(|global| {
                            global
                                .data
                                .iter()
                                .find(|r| &r.exercise_id == id)
                                .map(|record| CachedData::fetched(record.clone(), global.cached_at, global.owner.clone(), 0))
                        });
                        if let Some(copied) = copied {
                            state.exercises.insert(id.clone(), copied);
                        }
                    }
                    if let Some(entry) = state.exercises.get_mut(id) {
                        entry.invalidate();
                    }
                }
            }
        }

        match key {
            None => {
                self.global_fetches.invalidate(None);
                self.exercise_fetches.invalidate(None);
            }
            Some(key @ CacheKey::Global) => self.global_fetches.invalidate(Some(key)),
            Some(key @ CacheKey::Exercise(_)) => self.exercise_fetches.invalidate(Some(key)),
        }
        debug!(key = ?key, "Progress invalidated");
        self.notify(ProgressEvent::Invalidated(key.cloned()));
    }

    /// Record `user_id` as the active user. When it differs from the last
    /// user seen, everything cached becomes stale and fetches in flight for
    /// the previous user can no longer write to the cache.
    pub fn detect_identity_change(&self, user_id: &str) -> bool {
        let changed = {
            let mut state = self.lock();
            let changed = state.identity.observe(user_id);
            if changed {
                state.epoch += 1;
                if let Some(global) = state.global.as_mut() {
                    global.invalidate();
                }
                state.exercises.values_mut().for_each(CachedData::invalidate);
                state.errors.clear();
            }
            changed
        };

        if changed {
            self.global_fetches.reset();
            self.exercise_fetches.reset();
            self.notify(ProgressEvent::IdentityChanged {
                user_id: user_id.to_string(),
            });
        }
        changed
    }

    /// Drop all cached progress, for example on logout.
    pub fn clear_cache(&self) {
        {
            let mut state = self.lock();
            state.epoch += 1;
            state.identity.forget();
            state.global = None;
            state.exercises.clear();
            state.errors.clear();
            state.floors.clear();
        }
        self.global_fetches.reset();
        self.exercise_fetches.reset();
        info!("Progress cache cleared");
        self.notify(ProgressEvent::Cleared);
    }

    // ===== Accessors =====

    pub fn state(&self, key: &CacheKey) -> EntryState {
        let loading = match key {
            CacheKey::Global => self.global_fetches.is_in_flight(key),
            CacheKey::Exercise(_) => self.exercise_fetches.is_in_flight(key),
        };
        if loading {
            return EntryState::Loading;
        }

        let now = self.clock.now();
        let expiry = self.expiry();
        let state = self.lock();
        let user = state.identity.current();
        match key {
            CacheKey::Global => entry_state(state.global.as_ref(), now, expiry, user),
            CacheKey::Exercise(id) => entry_state(state.exercises.get(id), now, expiry, user),
        }
    }

    /// Per-category completion computed from the cached collection of the
    /// active user, against the catalog's exercise counts.
    pub fn aggregate(&self) -> AggregateProgress {
        let totals = self.catalog.totals();
        let state = self.lock();
        let user = state.identity.current();
        match state.global.as_ref().filter(|c| user.is_some() && c.owner.as_deref() == user) {
            Some(cached) => AggregateProgress::compute(&cached.data, &totals),
            None => AggregateProgress::compute(&[], &totals),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Error from the most recent failed fetch of `key`, cleared by the next success.
    pub fn last_error(&self, key: &CacheKey) -> Option<StoreError> {
        self.lock().errors.get(key).cloned()
    }

    // ===== Mutations =====

    /// Submit an attempt and cache the record the server returns.
    ///
    /// Nothing is written locally before the server confirms. On failure the
    /// exercise is refetched once so the local copy matches the server, and
    /// the original error is returned.
    pub async fn apply_attempt(
        &self,
        user_id: &str,
        exercise_id: &str,
        update: ProgressUpdate,
    ) -> Result<ProgressRecord, StoreError> {
        let token = self.tokens.token().ok_or(StoreError::AuthRequired)?;
        self.detect_identity_change(user_id);
        let epoch = self.lock().epoch;

        let request = self.service.update_quiz_progress(&token, exercise_id, &update);
        match with_timeout(self.settings.request_timeout, request).await {
            Ok(record) => {
                info!(
                    exercise_id,
                    correct = update.is_correct,
                    completed = record.completed,
                    "Attempt recorded"
                );
                self.reconcile(user_id, exercise_id, epoch, &record);
                Ok(record)
            }
            Err(err) => {
                warn!(exercise_id, error = %err, "Failed to record attempt");
                if !matches!(err, StoreError::AuthRequired) {
                    let resync = self.read_exercise(user_id, exercise_id, true).await;
                    debug!(exercise_id, source = ?resync.source, "Resynced exercise after failed update");
                }
                Err(err)
            }
        }
    }

    /// Write a server-confirmed record into the exercise entry and the
    /// global collection.
    fn reconcile(&self, user_id: &str, exercise_id: &str, epoch: u64, record: &ProgressRecord) {
        let exercise_generation = self.exercise_fetches.next_generation();
        let global_generation = self.global_fetches.next_generation();
        let now = self.clock.now();
        let key = CacheKey::exercise(exercise_id);

        let patched = {
            let mut state = self.lock();
            if state.epoch != epoch {
                debug!(exercise_id, "User changed during update, not caching result");
                return;
            }
            state.floors.insert(key.clone(), exercise_generation);
            state.floors.insert(CacheKey::Global, global_generation);
            state.exercises.insert(
                exercise_id.to_string(),
                CachedData::fetched(record.clone(), now, Some(user_id.to_string()), exercise_generation),
            );
            state.errors.remove(&key);

            let patched = if let Some(global) = state
                .global
                .as_mut()
                .filter(|c| c.owner.as_deref() == Some(user_id))
            {
                // Readers holding the previous collection keep their copy
                let records = Arc::make_mut(&mut global.data);
                match records.iter_mut().find(|r| r.exercise_id == exercise_id) {
                    Some(existing) => *existing = record.clone(),
                    None => records.push(record.clone()),
                }
                global.generation = global_generation;
                if record.completed {
                    global.invalidate();
                }
                true
            } else {
                false
            };
            patched
        };

        self.notify(ProgressEvent::Updated(key));
        if !patched && !record.completed {
            // Fetches already in flight predate the update and will be
            // discarded, so the next read must not be debounced
            self.global_fetches.invalidate(Some(&CacheKey::Global));
        }
        if record.completed {
            self.global_fetches.invalidate(Some(&CacheKey::Global));
            debug!(exercise_id, "Exercise completed, global progress invalidated");
            self.notify(ProgressEvent::Invalidated(Some(CacheKey::Global)));
        }
    }
}

fn entry_state<T>(
    entry: Option<&CachedData<T>>,
    now: DateTime<Utc>,
    expiry: Duration,
    user: Option<&str>,
) -> EntryState {
    match (entry, user) {
        (None, _) => EntryState::Empty,
        (Some(cached), Some(user)) if cached.is_fresh(now, expiry, user) => EntryState::Fresh,
        (Some(_), _) => EntryState::Stale,
    }
}
