//! Deduplicating, debounced fetches.
//!
//! A `FetchCoordinator` tracks, per key, the fetch currently in flight and
//! when the last fetch started. Readers that arrive while a fetch is in
//! flight await the same shared future instead of issuing another request.
//! Non-forced fetches that start too soon after the previous one are
//! refused, and the caller serves whatever it has cached.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::api::ApiError;
use crate::clock::Clock;

pub type FetchResult<T> = Result<T, Arc<ApiError>>;

type SharedFetch<T> = Shared<BoxFuture<'static, FetchResult<T>>>;

/// Outcome of a fetch that was started or joined.
#[derive(Debug)]
pub struct Fetched<T> {
    /// Generation of the request that produced `result`
    pub generation: u64,
    pub result: FetchResult<T>,
    /// True when this caller attached to a request someone else started
    pub joined: bool,
}

enum Plan<T> {
    Join(SharedFetch<T>, u64),
    Start(SharedFetch<T>, u64),
    Debounced,
}

struct InFlight<T> {
    generation: u64,
    future: SharedFetch<T>,
    /// Callers currently awaiting `future`
    waiters: usize,
}

struct Inner<K, T> {
    in_flight: HashMap<K, InFlight<T>>,
    last_started: HashMap<K, DateTime<Utc>>,
    next_generation: u64,
}

pub struct FetchCoordinator<K, T> {
    inner: Mutex<Inner<K, T>>,
    clock: Clock,
    debounce: chrono::Duration,
    timeout: Duration,
}

impl<K, T> FetchCoordinator<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(clock: Clock, debounce: chrono::Duration, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                in_flight: HashMap::new(),
                last_started: HashMap::new(),
                next_generation: 1,
            }),
            clock,
            debounce,
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch `key`, joining an in-flight request when possible.
    ///
    /// `start` is only called when a new request is actually issued. Returns
    /// `None` when a non-forced fetch is debounced. Forced fetches always
    /// issue a new request, which supersedes any request already in flight.
    pub async fn fetch<F, Fut>(&self, key: &K, force: bool, start: F) -> Option<Fetched<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let (future, generation, joined) = match self.plan(key, force, start) {
            Plan::Debounced => return None,
            Plan::Join(future, generation) => (future, generation, true),
            Plan::Start(future, generation) => (future, generation, false),
        };

        let mut waiter = Waiter {
            coordinator: self,
            key,
            generation,
            completed: false,
        };
        let result = future.await;
        waiter.completed = true;
        drop(waiter);

        Some(Fetched {
            generation,
            result,
            joined,
        })
    }

    /// Decide between joining, starting and debouncing, and register a new
    /// request, all under one lock.
    fn plan<F, Fut>(&self, key: &K, force: bool, start: F) -> Plan<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let now = self.clock.now();
        let mut inner = self.lock();

        if !force {
            if let Some(existing) = inner.in_flight.get_mut(key) {
                existing.waiters += 1;
                debug!(key = %key, generation = existing.generation, "Joining in-flight fetch");
                return Plan::Join(existing.future.clone(), existing.generation);
            }
            if let Some(last) = inner.last_started.get(key) {
                if now - *last < self.debounce {
                    debug!(key = %key, "Fetch debounced");
                    return Plan::Debounced;
                }
            }
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let timeout = self.timeout;
        let request = start();
        let future = async move {
            match tokio::time::timeout(timeout, request).await {
                Ok(result) => result.map_err(Arc::new),
                Err(_) => Err(Arc::new(ApiError::Timeout)),
            }
        }
        .boxed()
        .shared();

        if let Some(previous) = inner.in_flight.insert(
            key.clone(),
            InFlight {
                generation,
                future: future.clone(),
                waiters: 1,
            },
        ) {
            debug!(key = %key, superseded = previous.generation, generation, "Fetch superseded");
        } else {
            debug!(key = %key, generation, force, "Fetch started");
        }
        inner.last_started.insert(key.clone(), now);

        Plan::Start(future, generation)
    }

    /// A caller stopped waiting for `generation`, either with its result or
    /// because it was dropped. The request is forgotten once it completed or
    /// nobody is left waiting for it.
    fn leave(&self, key: &K, generation: u64, completed: bool) {
        let mut inner = self.lock();
        let remove = match inner.in_flight.get_mut(key) {
            Some(entry) if entry.generation == generation => {
                entry.waiters = entry.waiters.saturating_sub(1);
                completed || entry.waiters == 0
            }
            _ => false,
        };
        if remove {
            if !completed {
                debug!(key = %key, generation, "Fetch abandoned by all callers");
            }
            inner.in_flight.remove(key);
        }
    }

    /// Reserve a generation for a write that did not come from a fetch, so
    /// that fetches started before it cannot overwrite it.
    pub fn next_generation(&self) -> u64 {
        let mut inner = self.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;
        generation
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.lock().in_flight.contains_key(key)
    }

    /// Forget debounce timestamps for one key, or all keys, so the next read refetches.
    pub fn invalidate(&self, key: Option<&K>) {
        let mut inner = self.lock();
        match key {
            Some(key) => {
                inner.last_started.remove(key);
            }
            None => inner.last_started.clear(),
        }
    }

    /// Forget everything, including in-flight requests. Callers already
    /// awaiting those requests still receive their results.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.in_flight.clear();
        inner.last_started.clear();
    }
}

/// Deregisters a caller from its in-flight request on every exit path,
/// including the caller's future being dropped mid-await.
struct Waiter<'a, K, T>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    T: Clone + Send + Sync + 'static,
{
    coordinator: &'a FetchCoordinator<K, T>,
    key: &'a K,
    generation: u64,
    completed: bool,
}

impl<K, T> Drop for Waiter<'_, K, T>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.coordinator.leave(self.key, self.generation, self.completed);
    }
}
