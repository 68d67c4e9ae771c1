//! The feed engine: pagination, optimistic mutations and change events.
//!
//! All cache access goes through [`FeedEngine`]. Each operation takes the
//! state lock for its synchronous part only (optimistic apply, reconcile,
//! rollback) and releases it while the remote call is pending, so other
//! interactions keep going. Resolutions re-check that the state they assumed
//! still holds (feed open, refresh epoch, pin generation) and turn into
//! no-ops otherwise.
//!
//! # Architecture
//!
//! - [`pagination`] - `fetch_next_page`, `refresh`, `load_pinned`
//! - [`mutation`] - `toggle_pin`, `delete_item`, `edit_and_save`
//! - [`events`] - [`FeedEvent`] published on a broadcast channel
//! - [`confirm`] - injected consent for destructive actions

mod confirm;
mod events;
mod mutation;
mod pagination;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

use crate::cache::{partition, FeedCache, FeedSnapshot, Partitioned};
use crate::config::Config;
use crate::detail::DetailHydrator;
use crate::model::{
    DetailKey, DetailRecord, FeedContext, FeedError, FeedItem, ItemId, ItemType,
};
use crate::source::{DetailSource, FeedMutations, FeedSource};

pub use confirm::{AlwaysConfirm, Confirm, ConfirmAction};
pub use events::FeedEvent;
pub use mutation::{DeleteOutcome, EditOutcome, MutationKind, PinOutcome};
pub use pagination::{FetchOutcome, PageStatus, PinnedOutcome, RefreshOutcome};

use mutation::{MutationKey, PinTracker};
use pagination::PaginationState;

const DEFAULT_DETAIL_CAPACITY: usize = 256;
const DEFAULT_EVENT_BUFFER: usize = 256;

struct EngineState {
    /// Set by `shutdown`; every later resolution is a no-op.
    closed: bool,
    cache: FeedCache,
    paging: HashMap<FeedContext, PaginationState>,
    /// Outstanding pin toggles per (feed, item).
    pins: HashMap<(FeedContext, ItemId), PinTracker>,
    /// Delete/edit mutations awaiting the server.
    in_flight: HashSet<MutationKey>,
    /// Source of refresh epochs and pin generations. Never reused, so a
    /// resolution from a closed-and-reopened view cannot pass as current.
    next_ticket: u64,
}

impl EngineState {
    fn ticket(&mut self) -> u64 {
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.next_ticket
    }
}

struct Inner {
    feeds: Arc<dyn FeedSource>,
    mutations: Arc<dyn FeedMutations>,
    hydrator: DetailHydrator,
    confirm: Arc<dyn Confirm>,
    events: broadcast::Sender<FeedEvent>,
    state: Mutex<EngineState>,
}

/// Client-side engine behind the unified feed. Cheap to clone.
#[derive(Clone)]
pub struct FeedEngine {
    inner: Arc<Inner>,
}

/// Builder for [`FeedEngine`].
pub struct EngineBuilder {
    feeds: Arc<dyn FeedSource>,
    mutations: Arc<dyn FeedMutations>,
    details: Arc<dyn DetailSource>,
    confirm: Arc<dyn Confirm>,
    detail_capacity: usize,
    event_buffer: usize,
}

impl EngineBuilder {
    pub fn confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn detail_capacity(mut self, capacity: usize) -> Self {
        self.detail_capacity = capacity;
        self
    }

    pub fn event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer;
        self
    }

    /// Take cache sizes from the loaded configuration.
    pub fn config(self, config: &Config) -> Self {
        self.detail_capacity(config.detail_cache_capacity)
            .event_buffer(config.event_buffer)
    }

    pub fn build(self) -> FeedEngine {
        let (events, _) = broadcast::channel(self.event_buffer.max(1));
        FeedEngine {
            inner: Arc::new(Inner {
                feeds: self.feeds,
                mutations: self.mutations,
                hydrator: DetailHydrator::new(self.details, self.detail_capacity),
                confirm: self.confirm,
                events,
                state: Mutex::new(EngineState {
                    closed: false,
                    cache: FeedCache::new(),
                    paging: HashMap::new(),
                    pins: HashMap::new(),
                    in_flight: HashSet::new(),
                    next_ticket: 0,
                }),
            }),
        }
    }
}

impl FeedEngine {
    pub fn builder(
        feeds: Arc<dyn FeedSource>,
        mutations: Arc<dyn FeedMutations>,
        details: Arc<dyn DetailSource>,
    ) -> EngineBuilder {
        EngineBuilder {
            feeds,
            mutations,
            details,
            confirm: Arc::new(AlwaysConfirm),
            detail_capacity: DEFAULT_DETAIL_CAPACITY,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Builder for a source implementing all three collaborator traits.
    pub fn from_source<S>(source: Arc<S>) -> EngineBuilder
    where
        S: FeedSource + FeedMutations + DetailSource + 'static,
    {
        Self::builder(source.clone(), source.clone(), source)
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: FeedEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Receive change events. Slow receivers lag rather than block the engine.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.inner.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Feed lifecycle
    // ------------------------------------------------------------------------

    /// Open an empty feed for `context`. Returns false if already open.
    pub fn open_feed(&self, context: &FeedContext) -> Result<bool, FeedError> {
        let mut state = self.lock();
        if state.closed {
            return Err(FeedError::Closed);
        }
        let opened = state.cache.open(context);
        if opened {
            let view = state.ticket();
            state
                .paging
                .insert(context.clone(), PaginationState::new(view));
            tracing::debug!(context = %context, "Opened feed");
        }
        Ok(opened)
    }

    /// Tear down a feed view. Fetches and mutations still in flight for it
    /// resolve as no-ops.
    pub fn close_feed(&self, context: &FeedContext) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.cache.close(context).is_none() {
            return false;
        }
        state.paging.remove(context);
        state.pins.retain(|(c, _), _| c != context);
        self.prune_details(state);
        tracing::debug!(context = %context, "Closed feed");
        self.emit(FeedEvent::FeedClosed(context.clone()));
        true
    }

    /// Stop accepting operations; everything in flight resolves as a no-op.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.closed = true;
        tracing::debug!("Feed engine shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().closed
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    /// Current snapshot of a feed, shared with the engine (copy-on-write).
    pub fn snapshot(&self, context: &FeedContext) -> Option<Arc<FeedSnapshot>> {
        self.lock().cache.snapshot(context)
    }

    pub fn partitions(&self, context: &FeedContext) -> Option<Partitioned> {
        self.snapshot(context).map(|snap| partition(&snap))
    }

    pub fn pinned_feed(&self, context: &FeedContext) -> Vec<FeedItem> {
        self.partitions(context)
            .map(|p| p.pinned)
            .unwrap_or_default()
    }

    pub fn unpinned_feed(&self, context: &FeedContext) -> Vec<FeedItem> {
        self.partitions(context)
            .map(|p| p.unpinned)
            .unwrap_or_default()
    }

    /// Look a record up in any open feed.
    pub fn find_record(&self, item_type: ItemType, source_id: &str) -> Option<FeedItem> {
        self.lock().cache.find_record(item_type, source_id)
    }

    // ------------------------------------------------------------------------
    // Details
    // ------------------------------------------------------------------------

    pub fn hydrator(&self) -> &DetailHydrator {
        &self.inner.hydrator
    }

    /// Full record behind a feed item, fetched on first use.
    pub async fn get_full_session(
        &self,
        item_type: ItemType,
        source_id: &str,
    ) -> Result<Arc<DetailRecord>, FeedError> {
        if self.is_shut_down() {
            return Err(FeedError::Closed);
        }
        self.inner
            .hydrator
            .get_full_session(item_type, source_id)
            .await
    }

    /// Drop detail records no open feed references any more.
    fn prune_details(&self, state: &EngineState) {
        self.inner
            .hydrator
            .retain(|key: &DetailKey| state.cache.references(key));
    }
}
