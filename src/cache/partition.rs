use std::collections::HashSet;

use super::snapshot::FeedSnapshot;
use crate::model::{FeedItem, ItemId};

/// The two mutually exclusive views rendered from one snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partitioned {
    /// Pinned subset in pin order, then items the server flagged pinned that
    /// the subset does not list yet, in feed order.
    pub pinned: Vec<FeedItem>,
    /// Everything else, in feed order.
    pub unpinned: Vec<FeedItem>,
}

impl Partitioned {
    pub fn pinned_ids(&self) -> Vec<&str> {
        self.pinned.iter().map(|i| i.id.as_str()).collect()
    }

    pub fn unpinned_ids(&self) -> Vec<&str> {
        self.unpinned.iter().map(|i| i.id.as_str()).collect()
    }
}

/// Split a snapshot into pinned and unpinned views. Never re-sorts.
pub fn partition(snapshot: &FeedSnapshot) -> Partitioned {
    let listed: HashSet<&ItemId> = snapshot.pinned().iter().map(|i| &i.id).collect();
    let mut pinned = snapshot.pinned().to_vec();
    let mut unpinned = Vec::with_capacity(snapshot.len());

    for item in snapshot.items() {
        if listed.contains(&item.id) {
            continue;
        }
        if item.pinned {
            pinned.push(item.clone());
        } else {
            unpinned.push(item.clone());
        }
    }

    Partitioned { pinned, unpinned }
}
