use crate::model::{DetailKey, FeedContext, FeedError, ItemId, SecondaryCache};

/// Change notifications published by the engine.
///
/// Rendering layers subscribe through [`FeedEngine::subscribe`](super::FeedEngine::subscribe)
/// and re-read the affected feed's partitions; events carry ids, not data.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A page was appended to a feed.
    ///
    /// Fields:
    /// - `added`: Items actually added (duplicates skipped)
    /// - `has_next_page`: False once the source reported end of data
    PageAppended {
        context: FeedContext,
        added: usize,
        has_next_page: bool,
    },
    /// A page fetch failed; existing pages were kept and more may exist.
    FetchFailed {
        context: FeedContext,
        error: FeedError,
    },
    /// The feed's pages were replaced by a fresh first page.
    Refreshed { context: FeedContext },
    /// A confirmed pinned subset was installed.
    PinnedLoaded { context: FeedContext },
    /// An item moved between partitions (optimistically or after reconciling).
    PinChanged {
        context: FeedContext,
        id: ItemId,
        pinned: bool,
    },
    /// A failed pin toggle was undone.
    PinRolledBack {
        context: FeedContext,
        id: ItemId,
        pinned: bool,
    },
    ItemRemoved { context: FeedContext, id: ItemId },
    /// A failed delete put the item back in place.
    ItemRestored { context: FeedContext, id: ItemId },
    /// A saved edit moved the item to the head of its partition.
    ItemMovedToTop { context: FeedContext, id: ItemId },
    DetailInvalidated(DetailKey),
    /// A type-specific cache outside the feed must be reloaded.
    SecondaryInvalidated(SecondaryCache),
    FeedClosed(FeedContext),
}
