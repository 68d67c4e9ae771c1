use std::collections::{HashMap, HashSet};

use crate::model::{FeedItem, ItemId, ItemType, Page};

// ============================================================================
// Undo Records
// ============================================================================

/// Position of an item inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Index within one fetched page.
    Page { page: usize, index: usize },
    /// Index within the pinned subset.
    Pinned { index: usize },
}

/// Items taken out of a snapshot, with the slots they occupied at removal time.
///
/// Entries are kept in removal order; [`FeedSnapshot::restore`] replays them
/// backwards so every item lands on its exact prior index.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    entries: Vec<(Slot, FeedItem)>,
}

impl Removal {
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.entries.iter().map(|(slot, _)| *slot)
    }

    /// The removed summary (any copy; all copies describe the same record).
    pub fn item(&self) -> Option<&FeedItem> {
        self.entries.first().map(|(_, item)| item)
    }
}

/// Where an item sat relative to the pinned subset before a pin change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinPlacement {
    pub pinned: bool,
    /// Index in the pinned subset, `None` if not listed there.
    pub pinned_index: Option<usize>,
    /// Whether a copy sits in the fetched pages.
    pub in_pages: bool,
}

// ============================================================================
// Snapshot
// ============================================================================

/// Cached state of one feed context: fetched pages in server order plus the
/// independently ordered pinned subset.
///
/// Every mutation is a transform over the prior value. The `&mut self`
/// methods apply in place and hand back what is needed to undo them; the
/// `with_*`/`without_*` variants leave `self` untouched and return a new
/// snapshot, for callers that want before/after values side by side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    pages: Vec<Page>,
    pinned: Vec<FeedItem>,
    /// Ids present in `pages`.
    index: HashSet<ItemId>,
    /// Placement before each item's latest pin flip. Flipping straight back
    /// returns the item there instead of appending it.
    pin_origins: HashMap<ItemId, PinPlacement>,
}

impl FeedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-fetched pages and a pinned subset.
    pub fn from_parts(pages: Vec<Page>, pinned: Vec<FeedItem>) -> Self {
        let mut snapshot = Self {
            pinned,
            ..Self::default()
        };
        for page in pages {
            snapshot.append_page(page);
        }
        snapshot
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn pinned(&self) -> &[FeedItem] {
        &self.pinned
    }

    /// Fetched items in feed order.
    pub fn items(&self) -> impl Iterator<Item = &FeedItem> {
        self.pages.iter().flat_map(|p| p.items.iter())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty() && self.pinned.is_empty()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.index.contains(id) || self.pinned_index(id).is_some()
    }

    pub fn find(&self, id: &ItemId) -> Option<&FeedItem> {
        self.items()
            .find(|item| &item.id == id)
            .or_else(|| self.pinned.iter().find(|item| &item.id == id))
    }

    pub fn find_record(&self, item_type: ItemType, source_id: &str) -> Option<&FeedItem> {
        self.items()
            .chain(self.pinned.iter())
            .find(|item| item.is_record(item_type, source_id))
    }

    pub fn holds_record(&self, item_type: ItemType, source_id: &str) -> bool {
        self.find_record(item_type, source_id).is_some()
    }

    fn page_slot(&self, id: &ItemId) -> Option<(usize, usize)> {
        if !self.index.contains(id) {
            return None;
        }
        self.pages.iter().enumerate().find_map(|(p, page)| {
            page.items
                .iter()
                .position(|item| &item.id == id)
                .map(|i| (p, i))
        })
    }

    fn pinned_index(&self, id: &ItemId) -> Option<usize> {
        self.pinned.iter().position(|item| &item.id == id)
    }

    /// Current pin state; `None` if the item is not cached.
    pub fn is_pinned(&self, id: &ItemId) -> Option<bool> {
        self.pin_placement(id).map(|p| p.pinned)
    }

    pub fn pin_placement(&self, id: &ItemId) -> Option<PinPlacement> {
        let pinned_index = self.pinned_index(id);
        let page_item = self
            .page_slot(id)
            .map(|(p, i)| &self.pages[p].items[i]);
        if pinned_index.is_none() && page_item.is_none() {
            return None;
        }
        Some(PinPlacement {
            pinned: pinned_index.is_some() || page_item.is_some_and(|item| item.pinned),
            pinned_index,
            in_pages: page_item.is_some(),
        })
    }

    // ------------------------------------------------------------------------
    // Pagination
    // ------------------------------------------------------------------------

    /// Append one page, skipping items already present. Returns how many were added.
    pub fn append_page(&mut self, page: Page) -> usize {
        let Page { items, next_cursor } = page;
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            if self.index.insert(item.id.clone()) {
                kept.push(item);
            } else {
                tracing::debug!(id = %item.id, "Skipping duplicate feed item");
            }
        }
        let added = kept.len();
        self.pages.push(Page {
            items: kept,
            next_cursor,
        });
        added
    }

    /// Drop every fetched page and start over from `first`.
    pub fn replace_pages(&mut self, first: Page) -> usize {
        self.pages.clear();
        self.index.clear();
        self.pin_origins.clear();
        self.append_page(first)
    }

    /// Install a confirmed pinned subset and align page copies with it.
    pub fn replace_pinned(&mut self, pinned: Vec<FeedItem>) {
        self.pin_origins.clear();
        let ids: HashSet<&ItemId> = pinned.iter().map(|item| &item.id).collect();
        for item in self.pages.iter_mut().flat_map(|p| p.items.iter_mut()) {
            item.pinned = ids.contains(&item.id);
        }
        self.pinned = pinned
            .into_iter()
            .map(|mut item| {
                item.pinned = true;
                item
            })
            .collect();
    }

    // ------------------------------------------------------------------------
    // Pin
    // ------------------------------------------------------------------------

    /// Move an item into (appended, pin-time order) or out of the pinned
    /// subset. Returns the placement before the change.
    ///
    /// Undoing the previous flip puts the item back where it was before it,
    /// so pinning twice in a row is a no-op on order.
    pub fn set_pinned(&mut self, id: &ItemId, pinned: bool) -> Option<PinPlacement> {
        let prior = self.pin_placement(id)?;
        if prior.pinned == pinned {
            return Some(prior);
        }
        if let Some(origin) = self.pin_origins.get(id).copied() {
            if origin.pinned == pinned {
                self.restore_pin(id, &origin);
                return Some(prior);
            }
        }
        self.pin_origins.insert(id.clone(), prior);
        let mut copy = self.find(id)?.clone();
        copy.pinned = pinned;
        self.set_page_flag(id, pinned);

        if pinned {
            self.pinned.push(copy);
        } else {
            if let Some(i) = prior.pinned_index {
                self.pinned.remove(i);
            }
            if !prior.in_pages {
                // Never seen in a fetched page: surface it at the head of the feed.
                self.insert_top(copy);
            }
        }
        Some(prior)
    }

    /// Put an item back exactly where `placement` says it was.
    pub fn restore_pin(&mut self, id: &ItemId, placement: &PinPlacement) -> bool {
        self.pin_origins.remove(id);
        let Some(current) = self.pin_placement(id) else {
            return false;
        };
        let Some(copy) = self.find(id).cloned() else {
            return false;
        };

        if let Some(i) = current.pinned_index {
            self.pinned.remove(i);
        }
        if let (true, Some(i)) = (placement.pinned, placement.pinned_index) {
            let mut item = copy.clone();
            item.pinned = true;
            let at = i.min(self.pinned.len());
            self.pinned.insert(at, item);
        }

        if current.in_pages && !placement.in_pages {
            if let Some((p, i)) = self.page_slot(id) {
                self.pages[p].items.remove(i);
                self.index.remove(id);
            }
        } else if !current.in_pages && placement.in_pages {
            self.insert_top(copy);
        }
        self.set_page_flag(id, placement.pinned);
        true
    }

    fn set_page_flag(&mut self, id: &ItemId, pinned: bool) {
        if let Some((p, i)) = self.page_slot(id) {
            self.pages[p].items[i].pinned = pinned;
        }
    }

    fn insert_top(&mut self, item: FeedItem) {
        if self.pages.is_empty() {
            self.pages.push(Page::default());
        }
        self.index.insert(item.id.clone());
        self.pages[0].items.insert(0, item);
    }

    // ------------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------------

    /// Remove every copy of a record (pinned subset first, then pages).
    pub fn remove_record(&mut self, item_type: ItemType, source_id: &str) -> Option<Removal> {
        let mut entries = Vec::new();

        while let Some(i) = self
            .pinned
            .iter()
            .position(|item| item.is_record(item_type, source_id))
        {
            entries.push((Slot::Pinned { index: i }, self.pinned.remove(i)));
        }

        let Self { pages, index, .. } = self;
        for (p, page) in pages.iter_mut().enumerate() {
            while let Some(i) = page
                .items
                .iter()
                .position(|item| item.is_record(item_type, source_id))
            {
                let item = page.items.remove(i);
                index.remove(&item.id);
                entries.push((Slot::Page { page: p, index: i }, item));
            }
        }
        for (_, item) in &entries {
            self.pin_origins.remove(&item.id);
        }

        if entries.is_empty() {
            None
        } else {
            Some(Removal { entries })
        }
    }

    /// Undo a [`Removal`]. Copies that reappeared since (e.g. via a fetch) are
    /// not duplicated.
    pub fn restore(&mut self, removal: &Removal) {
        for (slot, item) in removal.entries.iter().rev() {
            match *slot {
                Slot::Pinned { index } => {
                    if self.pinned_index(&item.id).is_some() {
                        continue;
                    }
                    let at = index.min(self.pinned.len());
                    self.pinned.insert(at, item.clone());
                }
                Slot::Page { page, index } => {
                    if self.index.contains(&item.id) {
                        continue;
                    }
                    if self.pages.is_empty() {
                        self.pages.push(Page::default());
                    }
                    let p = page.min(self.pages.len() - 1);
                    let items = &mut self.pages[p].items;
                    let at = index.min(items.len());
                    items.insert(at, item.clone());
                    self.index.insert(item.id.clone());
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Edit
    // ------------------------------------------------------------------------

    /// Apply a saved summary and move the record to the head of its partition:
    /// the pinned subset if it is pinned, otherwise the first page.
    pub fn move_to_top(&mut self, saved: &FeedItem) -> bool {
        let (item_type, source_id) = (saved.item_type, saved.source_id.as_str());

        if let Some(i) = self
            .pinned
            .iter()
            .position(|item| item.is_record(item_type, source_id))
        {
            let mut item = self.pinned.remove(i);
            merge_summary(&mut item, saved);
            self.pin_origins.remove(&item.id);
            self.pinned.insert(0, item);
            // The page copy stays put; it is hidden from the unpinned view.
            self.update_record_in_pages(saved);
            return true;
        }

        let slot = self.pages.iter().enumerate().find_map(|(p, page)| {
            page.items
                .iter()
                .position(|item| item.is_record(item_type, source_id))
                .map(|i| (p, i))
        });
        let Some((p, i)) = slot else {
            return false;
        };
        if self.pages[p].items[i].pinned {
            // Flagged pinned by the server but not listed yet: list it first.
            self.update_record_in_pages(saved);
            let item = self.pages[p].items[i].clone();
            self.pin_origins.remove(&item.id);
            self.pinned.insert(0, item);
            return true;
        }
        let mut item = self.pages[p].items.remove(i);
        merge_summary(&mut item, saved);
        self.pin_origins.remove(&item.id);
        self.pages[0].items.insert(0, item);
        true
    }

    /// Refresh every cached copy of a record with a server summary, in place.
    pub fn update_record(&mut self, saved: &FeedItem) {
        for item in self.pinned.iter_mut() {
            if item.is_record(saved.item_type, &saved.source_id) {
                merge_summary(item, saved);
            }
        }
        self.update_record_in_pages(saved);
    }

    fn update_record_in_pages(&mut self, saved: &FeedItem) {
        for item in self.pages.iter_mut().flat_map(|p| p.items.iter_mut()) {
            if item.is_record(saved.item_type, &saved.source_id) {
                merge_summary(item, saved);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Snapshot-in / snapshot-out
    // ------------------------------------------------------------------------

    pub fn with_page(&self, page: Page) -> Self {
        let mut next = self.clone();
        next.append_page(page);
        next
    }

    pub fn with_pinned(&self, id: &ItemId, pinned: bool) -> Option<(Self, PinPlacement)> {
        let mut next = self.clone();
        let prior = next.set_pinned(id, pinned)?;
        Some((next, prior))
    }

    pub fn without_record(&self, item_type: ItemType, source_id: &str) -> (Self, Option<Removal>) {
        let mut next = self.clone();
        let removal = next.remove_record(item_type, source_id);
        (next, removal)
    }

    pub fn with_restored(&self, removal: &Removal) -> Self {
        let mut next = self.clone();
        next.restore(removal);
        next
    }

    pub fn with_on_top(&self, saved: &FeedItem) -> Self {
        let mut next = self.clone();
        next.move_to_top(saved);
        next
    }
}

/// Copy the server-owned summary fields. Local keys (`id`, `pinned`,
/// `feed_context`) stay as cached.
fn merge_summary(target: &mut FeedItem, saved: &FeedItem) {
    target.title = saved.title.clone();
    target.created_at = saved.created_at;
    target.updated_at = saved.updated_at;
    target.extra_fields = saved.extra_fields.clone();
}
