//! Feed data model: summary items, pages, detail records and the error taxonomy.

mod types;

pub use types::{
    Cursor, DetailKey, DetailRecord, FeedContext, FeedError, FeedItem, ItemId, ItemType, Page,
    SecondaryCache, SourceError,
};
