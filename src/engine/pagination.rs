//! Cursor pagination, pull-to-refresh and pinned-subset loading.

use crate::model::{Cursor, FeedContext, FeedError, FeedItem};

use super::{EngineState, FeedEngine, FeedEvent};

/// Per-feed paging bookkeeping.
#[derive(Debug, Clone)]
pub(super) struct PaginationState {
    pub(super) next_cursor: Option<Cursor>,
    pub(super) has_next_page: bool,
    pub(super) fetching: bool,
    pub(super) refreshing: bool,
    pub(super) loading_pinned: bool,
    /// Replaced by every refresh; resolutions from an older epoch are dropped.
    pub(super) epoch: u64,
    /// Fixed for the lifetime of one open view. Survives refreshes, so pin
    /// and delete resolutions only go stale when the feed is closed.
    pub(super) view: u64,
    pub(super) last_error: Option<FeedError>,
}

impl PaginationState {
    pub(super) fn new(view: u64) -> Self {
        Self {
            next_cursor: None,
            has_next_page: true,
            fetching: false,
            refreshing: false,
            loading_pinned: false,
            epoch: view,
            view,
            last_error: None,
        }
    }
}

/// What a feed's pagination is doing right now.
#[derive(Debug, Clone, PartialEq)]
pub enum PageStatus {
    /// More pages may exist and nothing is loading.
    Ready,
    Fetching,
    Refreshing,
    /// The last fetch failed. Existing pages are intact and the next
    /// `fetch_next_page` retries from the same cursor.
    Failed(FeedError),
    EndOfData,
}

/// Result of [`FeedEngine::fetch_next_page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Appended { added: usize, has_next_page: bool },
    /// A fetch or refresh was already running; nothing was issued.
    AlreadyFetching,
    /// The source reported no more pages; nothing was issued.
    EndOfData,
    /// The feed was refreshed, closed or shut down while this fetch was
    /// pending, so its result was dropped.
    Discarded,
}

/// Result of [`FeedEngine::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed {
        /// Items in the new first page.
        items: usize,
        /// Whether the pinned subset was reloaded too. When false the
        /// previous pinned list is still shown.
        pinned_confirmed: bool,
    },
    AlreadyRefreshing,
    Discarded,
}

/// Result of [`FeedEngine::load_pinned`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinnedOutcome {
    Loaded(usize),
    AlreadyLoading,
    Discarded,
}

impl EngineState {
    /// Identity of the open view of `context`, if any.
    pub(super) fn view(&self, context: &FeedContext) -> Option<u64> {
        self.paging.get(context).map(|paging| paging.view)
    }

    /// Whether a resolution started at `epoch` may still touch `context`.
    fn is_current(&self, context: &FeedContext, epoch: u64) -> bool {
        !self.closed
            && self
                .paging
                .get(context)
                .is_some_and(|paging| paging.epoch == epoch)
    }
}

impl FeedEngine {
    /// Fetch the page after the last one loaded and append it.
    ///
    /// At most one fetch per feed is in flight; extra triggers (scroll
    /// events) return [`FetchOutcome::AlreadyFetching`]. Once the source has
    /// reported the end of data no further request is made. On failure the
    /// existing pages are kept and the error is returned and recorded in
    /// [`page_status`](Self::page_status).
    pub async fn fetch_next_page(
        &self,
        context: &FeedContext,
    ) -> Result<FetchOutcome, FeedError> {
        let (cursor, epoch) = {
            let mut state = self.lock();
            if state.closed {
                return Err(FeedError::Closed);
            }
            let paging = state
                .paging
                .get_mut(context)
                .ok_or_else(|| FeedError::UnknownFeed(context.clone()))?;
            if paging.fetching || paging.refreshing {
                tracing::debug!(context = %context, "Page fetch already in flight, ignoring trigger");
                return Ok(FetchOutcome::AlreadyFetching);
            }
            if !paging.has_next_page {
                tracing::debug!(context = %context, "End of feed reached, not fetching");
                return Ok(FetchOutcome::EndOfData);
            }
            paging.fetching = true;
            paging.last_error = None;
            (paging.next_cursor.clone(), paging.epoch)
        };

        tracing::debug!(context = %context, cursor = ?cursor, "Fetching feed page");
        let result = self.inner.feeds.fetch_page(cursor.as_ref(), context).await;

        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.is_current(context, epoch) {
            tracing::debug!(context = %context, "Discarding stale page fetch");
            return Ok(FetchOutcome::Discarded);
        }
        let Some(paging) = state.paging.get_mut(context) else {
            return Ok(FetchOutcome::Discarded);
        };
        paging.fetching = false;

        match result {
            Ok(page) => {
                let has_next_page = page.next_cursor.is_some();
                paging.next_cursor = page.next_cursor.clone();
                paging.has_next_page = has_next_page;
                let added = state
                    .cache
                    .get_mut(context)
                    .map(|snap| snap.append_page(page))
                    .unwrap_or(0);
                self.overlay_pending_pins(state, context);
                tracing::debug!(context = %context, added, has_next_page, "Appended feed page");
                self.emit(FeedEvent::PageAppended {
                    context: context.clone(),
                    added,
                    has_next_page,
                });
                Ok(FetchOutcome::Appended {
                    added,
                    has_next_page,
                })
            }
            Err(e) => {
                let error = FeedError::from(e);
                tracing::warn!(context = %context, error = %error, "Feed page fetch failed");
                paging.last_error = Some(error.clone());
                self.emit(FeedEvent::FetchFailed {
                    context: context.clone(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Replace the feed with a fresh first page, then reload the pinned
    /// subset.
    ///
    /// Fetches still pending from before the refresh are dropped when they
    /// settle. If the first page fails the old pages stay. If only the
    /// pinned reload fails the refresh still counts and the previous pinned
    /// list is kept.
    pub async fn refresh(&self, context: &FeedContext) -> Result<RefreshOutcome, FeedError> {
        let epoch = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.closed {
                return Err(FeedError::Closed);
            }
            let epoch = state.ticket();
            let paging = state
                .paging
                .get_mut(context)
                .ok_or_else(|| FeedError::UnknownFeed(context.clone()))?;
            if paging.refreshing {
                return Ok(RefreshOutcome::AlreadyRefreshing);
            }
            paging.epoch = epoch;
            paging.refreshing = true;
            paging.fetching = false;
            paging.loading_pinned = false;
            paging.last_error = None;
            paging.epoch
        };

        tracing::debug!(context = %context, epoch, "Refreshing feed");
        let first = self.inner.feeds.fetch_page(None, context).await;

        let items = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if !state.is_current(context, epoch) {
                return Ok(RefreshOutcome::Discarded);
            }
            let Some(paging) = state.paging.get_mut(context) else {
                return Ok(RefreshOutcome::Discarded);
            };
            match first {
                Ok(page) => {
                    paging.has_next_page = page.next_cursor.is_some();
                    paging.next_cursor = page.next_cursor.clone();
                    let items = page.items.len();
                    if let Some(snap) = state.cache.get_mut(context) {
                        snap.replace_pages(page);
                    }
                    self.overlay_pending_pins(state, context);
                    self.emit(FeedEvent::Refreshed {
                        context: context.clone(),
                    });
                    items
                }
                Err(e) => {
                    let error = FeedError::from(e);
                    tracing::warn!(context = %context, error = %error, "Feed refresh failed");
                    paging.refreshing = false;
                    paging.last_error = Some(error.clone());
                    self.emit(FeedEvent::FetchFailed {
                        context: context.clone(),
                        error: error.clone(),
                    });
                    return Err(error);
                }
            }
        };

        let pinned = self.inner.feeds.fetch_pinned(context).await;

        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.is_current(context, epoch) {
            return Ok(RefreshOutcome::Discarded);
        }
        if let Some(paging) = state.paging.get_mut(context) {
            paging.refreshing = false;
        }
        let pinned_confirmed = match pinned {
            Ok(pinned) => {
                self.install_pinned(state, context, pinned);
                true
            }
            Err(e) => {
                tracing::warn!(context = %context, error = %e, "Pinned reload failed, keeping previous pinned items");
                false
            }
        };
        self.prune_details(state);
        tracing::info!(context = %context, items, pinned_confirmed, "Feed refreshed");
        Ok(RefreshOutcome::Refreshed {
            items,
            pinned_confirmed,
        })
    }

    /// Load the confirmed pinned subset for a feed.
    pub async fn load_pinned(&self, context: &FeedContext) -> Result<PinnedOutcome, FeedError> {
        let epoch = {
            let mut state = self.lock();
            if state.closed {
                return Err(FeedError::Closed);
            }
            let paging = state
                .paging
                .get_mut(context)
                .ok_or_else(|| FeedError::UnknownFeed(context.clone()))?;
            if paging.loading_pinned || paging.refreshing {
                return Ok(PinnedOutcome::AlreadyLoading);
            }
            paging.loading_pinned = true;
            paging.epoch
        };

        let result = self.inner.feeds.fetch_pinned(context).await;

        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.is_current(context, epoch) {
            tracing::debug!(context = %context, "Discarding stale pinned load");
            return Ok(PinnedOutcome::Discarded);
        }
        if let Some(paging) = state.paging.get_mut(context) {
            paging.loading_pinned = false;
        }
        match result {
            Ok(pinned) => {
                let loaded = pinned.len();
                self.install_pinned(state, context, pinned);
                Ok(PinnedOutcome::Loaded(loaded))
            }
            Err(e) => {
                tracing::warn!(context = %context, error = %e, "Pinned load failed");
                Err(e.into())
            }
        }
    }

    pub fn page_status(&self, context: &FeedContext) -> Option<PageStatus> {
        let state = self.lock();
        let paging = state.paging.get(context)?;
        Some(if paging.refreshing {
            PageStatus::Refreshing
        } else if paging.fetching {
            PageStatus::Fetching
        } else if let Some(error) = &paging.last_error {
            PageStatus::Failed(error.clone())
        } else if !paging.has_next_page {
            PageStatus::EndOfData
        } else {
            PageStatus::Ready
        })
    }

    /// False once the source reported the end of data for this feed.
    pub fn has_next_page(&self, context: &FeedContext) -> bool {
        self.lock()
            .paging
            .get(context)
            .is_some_and(|paging| paging.has_next_page)
    }

    fn install_pinned(&self, state: &mut EngineState, context: &FeedContext, pinned: Vec<FeedItem>) {
        let Some(snap) = state.cache.get_mut(context) else {
            return;
        };
        snap.replace_pinned(pinned);
        self.overlay_pending_pins(state, context);
        self.emit(FeedEvent::PinnedLoaded {
            context: context.clone(),
        });
    }
}
