//! On-demand hydration of full per-type records ("full sessions").
//!
//! Records are fetched the first time an item is expanded or edited and then
//! served from memory until invalidated. There is no background
//! revalidation: a record scrolled past is never fetched again on its own.

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::model::{DetailKey, DetailRecord, FeedError, ItemType};
use crate::source::DetailSource;

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<DetailRecord>, FeedError>>>;

struct InFlight {
    ticket: u64,
    fetch: SharedFetch,
}

struct HydratorState {
    records: LruCache<DetailKey, Arc<DetailRecord>>,
    in_flight: HashMap<DetailKey, InFlight>,
    next_ticket: u64,
}

/// Cache of detail records with per-key request de-duplication.
///
/// Concurrent callers asking for the same key share one in-flight fetch.
/// Invalidating a key drops both its cached record and its in-flight entry;
/// a fetch that settles after that is handed to its waiters but not stored.
#[derive(Clone)]
pub struct DetailHydrator {
    source: Arc<dyn DetailSource>,
    state: Arc<Mutex<HydratorState>>,
}

fn lock(state: &Mutex<HydratorState>) -> MutexGuard<'_, HydratorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DetailHydrator {
    pub fn new(source: Arc<dyn DetailSource>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            state: Arc::new(Mutex::new(HydratorState {
                records: LruCache::new(capacity),
                in_flight: HashMap::new(),
                next_ticket: 0,
            })),
        }
    }

    /// Return the cached record for `(item_type, source_id)` or fetch it.
    pub async fn get_full_session(
        &self,
        item_type: ItemType,
        source_id: &str,
    ) -> Result<Arc<DetailRecord>, FeedError> {
        let key = DetailKey::new(item_type, source_id);
        let fetch = {
            let mut state = lock(&self.state);
            if let Some(record) = state.records.get(&key) {
                tracing::debug!(key = %key, "Detail cache hit");
                return Ok(Arc::clone(record));
            }
            match state.in_flight.get(&key) {
                Some(in_flight) => {
                    tracing::debug!(key = %key, "Joining in-flight detail fetch");
                    in_flight.fetch.clone()
                }
                None => self.start_fetch(&mut state, key),
            }
        };
        fetch.await
    }

    fn start_fetch(&self, state: &mut HydratorState, key: DetailKey) -> SharedFetch {
        state.next_ticket = state.next_ticket.wrapping_add(1);
        let ticket = state.next_ticket;
        tracing::debug!(key = %key, ticket, "Detail cache miss, fetching");

        let source = Arc::clone(&self.source);
        let shared_state = Arc::clone(&self.state);
        let fetch_key = key.clone();
        let fetch = async move {
            let result = source
                .fetch_full(fetch_key.item_type, &fetch_key.source_id)
                .await
                .map(Arc::new)
                .map_err(FeedError::from);

            let mut state = lock(&shared_state);
            let current = state
                .in_flight
                .get(&fetch_key)
                .is_some_and(|f| f.ticket == ticket);
            if current {
                state.in_flight.remove(&fetch_key);
                match &result {
                    Ok(record) => {
                        state.records.put(fetch_key.clone(), Arc::clone(record));
                    }
                    Err(e) => {
                        tracing::warn!(key = %fetch_key, error = %e, "Detail fetch failed");
                    }
                }
            } else {
                tracing::debug!(key = %fetch_key, ticket, "Detail fetch settled after invalidation, not caching");
            }
            result
        }
        .boxed()
        .shared();

        state.in_flight.insert(
            key,
            InFlight {
                ticket,
                fetch: fetch.clone(),
            },
        );
        fetch
    }

    /// Drop a key so the next `get_full_session` issues a fresh fetch.
    /// Returns true if anything was cached or in flight.
    pub fn invalidate(&self, key: &DetailKey) -> bool {
        let mut state = lock(&self.state);
        let cached = state.records.pop(key).is_some();
        let in_flight = state.in_flight.remove(key).is_some();
        if cached || in_flight {
            tracing::debug!(key = %key, cached, in_flight, "Invalidated detail record");
        }
        cached || in_flight
    }

    /// Drop a record that no longer exists, returning the cached copy.
    pub fn evict(&self, key: &DetailKey) -> Option<Arc<DetailRecord>> {
        let mut state = lock(&self.state);
        state.in_flight.remove(key);
        let evicted = state.records.pop(key);
        if evicted.is_some() {
            tracing::debug!(key = %key, "Evicted detail record");
        }
        evicted
    }

    /// Invalidate and fetch again.
    pub async fn refetch(
        &self,
        item_type: ItemType,
        source_id: &str,
    ) -> Result<Arc<DetailRecord>, FeedError> {
        self.invalidate(&DetailKey::new(item_type, source_id));
        self.get_full_session(item_type, source_id).await
    }

    /// Cached record without touching recency or fetching.
    pub fn peek(&self, key: &DetailKey) -> Option<Arc<DetailRecord>> {
        lock(&self.state).records.peek(key).cloned()
    }

    pub fn is_in_flight(&self, key: &DetailKey) -> bool {
        lock(&self.state).in_flight.contains_key(key)
    }

    /// Evict every cached record whose key fails `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&DetailKey) -> bool) -> usize {
        let mut state = lock(&self.state);
        let doomed: Vec<DetailKey> = state
            .records
            .iter()
            .filter(|(key, _)| !keep(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            state.records.pop(key);
        }
        if !doomed.is_empty() {
            tracing::debug!(evicted = doomed.len(), "Evicted unreferenced detail records");
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
