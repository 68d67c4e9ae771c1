//! Local feed cache.
//!
//! - [`FeedSnapshot`] - one feed context's pages and pinned subset, with
//!   undoable transforms
//! - [`partition`] - pinned/unpinned views over a snapshot
//! - [`FeedCache`] - snapshots of every open context

mod partition;
mod snapshot;
mod store;

pub use partition::{partition, Partitioned};
pub use snapshot::{FeedSnapshot, PinPlacement, Removal, Slot};
pub use store::FeedCache;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::DateTime;

    use crate::model::{Cursor, FeedContext, FeedItem, ItemType, Page};

    pub fn item(id: &str, pinned: bool) -> FeedItem {
        let ts = DateTime::from_timestamp(1_704_067_200, 0).unwrap();
        FeedItem {
            id: id.into(),
            item_type: ItemType::Notes,
            source_id: format!("src-{id}"),
            title: format!("Item {id}"),
            created_at: ts,
            updated_at: ts,
            pinned,
            feed_context: FeedContext::main(),
            extra_fields: serde_json::json!({}),
        }
    }

    pub fn page(ids: &[&str], next: Option<&str>) -> Page {
        Page {
            items: ids.iter().map(|id| item(id, false)).collect(),
            next_cursor: next.map(|c| Cursor(c.to_string())),
        }
    }
}
