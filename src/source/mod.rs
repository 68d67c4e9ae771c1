//! Remote collaborators consumed by the engine.
//!
//! The engine never talks to the network directly; it calls these traits:
//!
//! - [`FeedSource`] - cursor-paginated feed pages and the pinned subset
//! - [`FeedMutations`] - pin toggle, delete and edit endpoints
//! - [`DetailSource`] - full per-type records
//!
//! [`HttpSource`] implements all three over a JSON REST API.

mod http;

use async_trait::async_trait;

use crate::model::{Cursor, DetailRecord, FeedContext, FeedItem, ItemId, ItemType, Page, SourceError};

pub use http::{HttpSource, HttpSourceError};

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the page following `cursor` (`None` = start of feed).
    async fn fetch_page(
        &self,
        cursor: Option<&Cursor>,
        context: &FeedContext,
    ) -> Result<Page, SourceError>;

    /// Fetch the pinned subset in pin order.
    async fn fetch_pinned(&self, context: &FeedContext) -> Result<Vec<FeedItem>, SourceError>;
}

#[async_trait]
pub trait FeedMutations: Send + Sync {
    /// Flip the pin flag server-side; returns the item as the server now sees it.
    async fn toggle_pin(
        &self,
        id: &ItemId,
        item_type: ItemType,
        context: &FeedContext,
    ) -> Result<FeedItem, SourceError>;

    async fn delete_item(&self, source_id: &str, item_type: ItemType) -> Result<(), SourceError>;

    /// Save an edit; `payload` carries the record's `source_id` plus the changed fields.
    async fn edit_item(
        &self,
        item_type: ItemType,
        payload: &serde_json::Value,
    ) -> Result<FeedItem, SourceError>;
}

#[async_trait]
pub trait DetailSource: Send + Sync {
    async fn fetch_full(
        &self,
        item_type: ItemType,
        source_id: &str,
    ) -> Result<DetailRecord, SourceError>;
}
