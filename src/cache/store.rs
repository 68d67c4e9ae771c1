use std::collections::HashMap;
use std::sync::Arc;

use super::snapshot::{FeedSnapshot, Removal};
use crate::model::{DetailKey, FeedContext, FeedItem, ItemType};

/// Snapshots of every open feed context.
///
/// Snapshots are shared as `Arc<FeedSnapshot>` so views can hold on to the
/// version they rendered; writers go through `Arc::make_mut`, which only
/// copies when a reader still holds the old version.
#[derive(Debug, Default)]
pub struct FeedCache {
    feeds: HashMap<FeedContext, Arc<FeedSnapshot>>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an empty feed. Returns false if it was already open.
    pub fn open(&mut self, context: &FeedContext) -> bool {
        if self.feeds.contains_key(context) {
            return false;
        }
        self.feeds
            .insert(context.clone(), Arc::new(FeedSnapshot::new()));
        true
    }

    pub fn close(&mut self, context: &FeedContext) -> Option<Arc<FeedSnapshot>> {
        self.feeds.remove(context)
    }

    pub fn is_open(&self, context: &FeedContext) -> bool {
        self.feeds.contains_key(context)
    }

    pub fn contexts(&self) -> impl Iterator<Item = &FeedContext> {
        self.feeds.keys()
    }

    pub fn snapshot(&self, context: &FeedContext) -> Option<Arc<FeedSnapshot>> {
        self.feeds.get(context).cloned()
    }

    pub fn get_mut(&mut self, context: &FeedContext) -> Option<&mut FeedSnapshot> {
        self.feeds.get_mut(context).map(Arc::make_mut)
    }

    /// Whether any open feed still shows the record behind `key`.
    pub fn references(&self, key: &DetailKey) -> bool {
        self.feeds
            .values()
            .any(|snap| snap.holds_record(key.item_type, &key.source_id))
    }

    /// First cached summary of a record, in any open feed.
    pub fn find_record(&self, item_type: ItemType, source_id: &str) -> Option<FeedItem> {
        self.feeds
            .values()
            .find_map(|snap| snap.find_record(item_type, source_id).cloned())
    }

    /// Remove a record from every feed holding it.
    pub fn remove_everywhere(
        &mut self,
        item_type: ItemType,
        source_id: &str,
    ) -> Vec<(FeedContext, Removal)> {
        let mut removals = Vec::new();
        for (context, snap) in self.feeds.iter_mut() {
            if !snap.holds_record(item_type, source_id) {
                continue;
            }
            if let Some(removal) = Arc::make_mut(snap).remove_record(item_type, source_id) {
                removals.push((context.clone(), removal));
            }
        }
        removals
    }

    /// Undo [`remove_everywhere`](Self::remove_everywhere). Feeds closed in the
    /// meantime are skipped. Returns the contexts that were restored.
    pub fn restore_everywhere(&mut self, removals: &[(FeedContext, Removal)]) -> Vec<FeedContext> {
        removals
            .iter()
            .filter_map(|(context, removal)| {
                let snap = self.get_mut(context)?;
                snap.restore(removal);
                Some(context.clone())
            })
            .collect()
    }

    /// Apply a saved summary and move it to the head of its partition in every
    /// feed holding the record. Returns the contexts that changed.
    pub fn move_to_top_everywhere(&mut self, saved: &FeedItem) -> Vec<FeedContext> {
        let mut moved = Vec::new();
        for (context, snap) in self.feeds.iter_mut() {
            if !snap.holds_record(saved.item_type, &saved.source_id) {
                continue;
            }
            if Arc::make_mut(snap).move_to_top(saved) {
                moved.push(context.clone());
            }
        }
        moved
    }

    /// Refresh summaries in place (no reordering) in every feed.
    pub fn update_everywhere(&mut self, saved: &FeedItem) {
        for snap in self.feeds.values_mut() {
            if snap.holds_record(saved.item_type, &saved.source_id) {
                Arc::make_mut(snap).update_record(saved);
            }
        }
    }
}
