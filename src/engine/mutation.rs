//! Optimistic pin, delete and edit.
//!
//! Each mutation applies its change to the cache before the server call and
//! reconciles afterwards:
//!
//! | Server answer  | Pin                     | Delete                | Edit                  |
//! |----------------|-------------------------|-----------------------|-----------------------|
//! | success        | adopt server pin state  | invalidate side caches| move to top, refetch  |
//! | not found      | drop record everywhere  | treat as deleted      | drop record everywhere|
//! | conflict       | keep optimistic state   | keep optimistic state | leave cache as is     |
//! | other error    | roll back, report       | restore, report       | report                |

use serde_json::Value;

use crate::model::{
    DetailKey, FeedContext, FeedError, FeedItem, ItemId, ItemType, SourceError,
};

use super::{ConfirmAction, EngineState, FeedEngine, FeedEvent};
use crate::cache::PinPlacement;

/// The kinds of optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Pin,
    Delete,
    Edit,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) struct MutationKey {
    pub(super) kind: MutationKind,
    pub(super) record: DetailKey,
}

/// Outstanding pin toggles for one item in one feed.
///
/// Only the most recent toggle reconciles or rolls back. Older ones still
/// report what the server did with them, which matters once the most recent
/// one has failed: the item then follows the newest state the server
/// actually confirmed.
#[derive(Debug, Clone)]
pub(super) struct PinTracker {
    pub(super) record: DetailKey,
    /// Generation of the most recent toggle.
    pub(super) generation: u64,
    /// Placement before the first toggle of this burst.
    pub(super) baseline: PinPlacement,
    /// Pin state the cache should show; re-applied over fetched data.
    pub(super) intent: bool,
    /// Newest server-confirmed pin state and the toggle that confirmed it.
    pub(super) confirmed: bool,
    pub(super) confirmed_generation: u64,
    /// Set once the most recent toggle has settled.
    pub(super) latest_settled: bool,
    pub(super) outstanding: u32,
}

/// What a settled toggle does to the cache.
enum PinResolution {
    Adopt(bool),
    Revert { to: bool, exact: Option<PinPlacement> },
    Remove,
    Keep,
}

/// Result of [`FeedEngine::toggle_pin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    /// The server accepted the toggle; `pinned` is the state it reported.
    Confirmed { pinned: bool },
    /// A later toggle of the same item owns the outcome.
    Superseded,
    /// The record no longer exists and was dropped from every feed.
    Removed,
    /// The feed was closed or the engine shut down before the server answered.
    Discarded,
}

/// Result of [`FeedEngine::delete_item`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The server no longer had the record; it was removed locally all the same.
    AlreadyGone,
    /// The user declined; nothing changed.
    Cancelled,
    /// A delete of the same record was already in flight.
    Coalesced,
    /// The server reported a conflicting change; the optimistic removal stands.
    Superseded,
    Discarded,
}

/// Result of [`FeedEngine::edit_and_save`].
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
    /// Saved; the item now heads its partition.
    Saved(FeedItem),
    /// The record no longer exists and was dropped from every feed.
    Removed,
    /// An edit of the same record was already in flight.
    Coalesced,
    /// A newer version exists on the server; the cache was left alone.
    Superseded,
    Discarded,
}

impl FeedEngine {
    // ------------------------------------------------------------------------
    // Pin
    // ------------------------------------------------------------------------

    /// Flip an item's pin state in `context`.
    ///
    /// The item moves between partitions immediately. Rapid repeated toggles
    /// each reach the server, but only the most recent one decides the
    /// outcome; a stale resolution never overrides it. When the most recent
    /// toggle fails the item goes back to the last state the server
    /// confirmed, at its exact prior position if that is where it started.
    pub async fn toggle_pin(
        &self,
        id: &ItemId,
        item_type: ItemType,
        context: &FeedContext,
    ) -> Result<PinOutcome, FeedError> {
        let unknown = || FeedError::UnknownItem {
            id: id.clone(),
            context: context.clone(),
        };
        let (generation, view, record) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.closed {
                return Err(FeedError::Closed);
            }
            let view = state
                .view(context)
                .ok_or_else(|| FeedError::UnknownFeed(context.clone()))?;
            let snap = state
                .cache
                .get_mut(context)
                .ok_or_else(|| FeedError::UnknownFeed(context.clone()))?;
            let record = snap.find(id).map(FeedItem::detail_key).ok_or_else(unknown)?;
            let current = snap.is_pinned(id).ok_or_else(unknown)?;
            let intent = !current;
            let previous = snap.set_pinned(id, intent).ok_or_else(unknown)?;

            let generation = state.ticket();
            let tracker = state
                .pins
                .entry((context.clone(), id.clone()))
                .or_insert_with(|| PinTracker {
                    record: record.clone(),
                    generation,
                    baseline: previous,
                    intent,
                    confirmed: previous.pinned,
                    confirmed_generation: 0,
                    latest_settled: false,
                    outstanding: 0,
                });
            tracker.generation = generation;
            tracker.intent = intent;
            tracker.latest_settled = false;
            tracker.outstanding += 1;

            tracing::debug!(context = %context, id = %id, pinned = intent, generation, "Optimistic pin toggle");
            self.emit(FeedEvent::PinChanged {
                context: context.clone(),
                id: id.clone(),
                pinned: intent,
            });
            (generation, view, record)
        };

        let result = self.inner.mutations.toggle_pin(id, item_type, context).await;

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed || state.view(context) != Some(view) {
            tracing::debug!(context = %context, id = %id, "Pin toggle settled after its view closed");
            return Ok(PinOutcome::Discarded);
        }
        let key = (context.clone(), id.clone());
        let Some(tracker) = state.pins.get_mut(&key) else {
            tracing::debug!(context = %context, id = %id, "Pin toggle settled after feed closed");
            return Ok(PinOutcome::Discarded);
        };
        tracker.outstanding = tracker.outstanding.saturating_sub(1);
        let latest = tracker.generation == generation;

        let (resolution, outcome) = match &result {
            Err(SourceError::NotFound) => (PinResolution::Remove, Ok(PinOutcome::Removed)),
            Ok(server) => {
                let newer = generation > tracker.confirmed_generation;
                if newer {
                    tracker.confirmed = server.pinned;
                    tracker.confirmed_generation = generation;
                }
                if latest || (newer && tracker.latest_settled) {
                    tracker.latest_settled = true;
                    tracker.intent = server.pinned;
                    (
                        PinResolution::Adopt(server.pinned),
                        Ok(PinOutcome::Confirmed {
                            pinned: server.pinned,
                        }),
                    )
                } else {
                    (PinResolution::Keep, Ok(PinOutcome::Superseded))
                }
            }
            Err(SourceError::Conflict) => {
                if latest {
                    tracker.latest_settled = true;
                }
                (PinResolution::Keep, Ok(PinOutcome::Superseded))
            }
            Err(e) if latest => {
                tracker.latest_settled = true;
                tracker.intent = tracker.confirmed;
                let exact = (tracker.confirmed == tracker.baseline.pinned).then_some(tracker.baseline);
                (
                    PinResolution::Revert {
                        to: tracker.confirmed,
                        exact,
                    },
                    Err(FeedError::from(e.clone())),
                )
            }
            Err(_) => (PinResolution::Keep, Ok(PinOutcome::Superseded)),
        };
        if tracker.outstanding == 0 {
            state.pins.remove(&key);
        }

        match resolution {
            PinResolution::Keep => {
                tracing::debug!(context = %context, id = %id, generation, "Pin toggle superseded, keeping local state");
            }
            PinResolution::Remove => {
                tracing::info!(record = %record, "Pinned record no longer exists, removing it");
                self.purge_record(state, &record);
            }
            PinResolution::Adopt(pinned) => {
                if let Ok(server) = &result {
                    state.cache.update_everywhere(server);
                }
                let Some(snap) = state.cache.get_mut(context) else {
                    return Ok(PinOutcome::Discarded);
                };
                if snap.is_pinned(id).is_some_and(|current| current != pinned) {
                    tracing::info!(context = %context, id = %id, pinned, "Adopting server pin state");
                    snap.set_pinned(id, pinned);
                    self.emit(FeedEvent::PinChanged {
                        context: context.clone(),
                        id: id.clone(),
                        pinned,
                    });
                }
            }
            PinResolution::Revert { to, exact } => {
                tracing::warn!(context = %context, id = %id, pinned = to, "Pin toggle failed, rolling back");
                if let Some(snap) = state.cache.get_mut(context) {
                    match exact {
                        Some(placement) => {
                            snap.restore_pin(id, &placement);
                        }
                        None => {
                            snap.set_pinned(id, to);
                        }
                    }
                }
                self.emit(FeedEvent::PinRolledBack {
                    context: context.clone(),
                    id: id.clone(),
                    pinned: to,
                });
            }
        }
        outcome
    }

    // ------------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------------

    /// Delete a record after asking the configured [`Confirm`](super::Confirm).
    ///
    /// The record disappears from every open feed before the server call and
    /// is put back at its exact prior positions if the call fails.
    pub async fn delete_item(
        &self,
        source_id: &str,
        item_type: ItemType,
    ) -> Result<DeleteOutcome, FeedError> {
        let record = DetailKey::new(item_type, source_id);
        let key = MutationKey {
            kind: MutationKind::Delete,
            record: record.clone(),
        };

        let title = {
            let mut state = self.lock();
            if state.closed {
                return Err(FeedError::Closed);
            }
            if !state.in_flight.insert(key.clone()) {
                tracing::debug!(record = %record, "Delete already in flight, coalescing");
                return Ok(DeleteOutcome::Coalesced);
            }
            state
                .cache
                .find_record(item_type, source_id)
                .map(|item| item.title)
        };

        let action = ConfirmAction::DeleteItem {
            item_type,
            source_id: source_id.to_string(),
            title,
        };
        if !self.inner.confirm.confirm(&action).await {
            self.lock().in_flight.remove(&key);
            tracing::debug!(record = %record, "Delete cancelled");
            return Ok(DeleteOutcome::Cancelled);
        }

        let removals = {
            let mut state = self.lock();
            if state.closed {
                state.in_flight.remove(&key);
                return Ok(DeleteOutcome::Discarded);
            }
            let removals: Vec<_> = state
                .cache
                .remove_everywhere(item_type, source_id)
                .into_iter()
                .filter_map(|(context, removal)| {
                    let view = state.view(&context)?;
                    Some((view, context, removal))
                })
                .collect();
            for (_, context, removal) in &removals {
                if let Some(item) = removal.item() {
                    self.emit(FeedEvent::ItemRemoved {
                        context: context.clone(),
                        id: item.id.clone(),
                    });
                }
            }
            tracing::debug!(record = %record, feeds = removals.len(), "Optimistic delete");
            removals
        };

        let result = self.inner.mutations.delete_item(source_id, item_type).await;

        let mut guard = self.lock();
        let state = &mut *guard;
        state.in_flight.remove(&key);
        if state.closed {
            return Ok(DeleteOutcome::Discarded);
        }

        match result {
            Ok(()) => {
                self.finish_delete(state, &record);
                tracing::info!(record = %record, "Deleted");
                Ok(DeleteOutcome::Deleted)
            }
            Err(SourceError::NotFound) => {
                self.finish_delete(state, &record);
                tracing::info!(record = %record, "Record already gone on server");
                Ok(DeleteOutcome::AlreadyGone)
            }
            Err(SourceError::Conflict) => {
                tracing::debug!(record = %record, "Delete conflicted, keeping local state");
                Ok(DeleteOutcome::Superseded)
            }
            Err(e) => {
                tracing::warn!(record = %record, error = %e, "Delete failed, restoring item");
                // Only the views the item was taken from get it back.
                let still_open: Vec<_> = removals
                    .into_iter()
                    .filter(|(view, context, _)| state.view(context) == Some(*view))
                    .map(|(_, context, removal)| (context, removal))
                    .collect();
                let restored = state.cache.restore_everywhere(&still_open);
                for (context, removal) in &still_open {
                    if !restored.contains(context) {
                        continue;
                    }
                    if let Some(item) = removal.item() {
                        self.emit(FeedEvent::ItemRestored {
                            context: context.clone(),
                            id: item.id.clone(),
                        });
                    }
                }
                Err(e.into())
            }
        }
    }

    fn finish_delete(&self, state: &mut EngineState, record: &DetailKey) {
        state.pins.retain(|_, tracker| tracker.record != *record);
        self.inner.hydrator.evict(record);
        for cache in record.item_type.secondary_caches() {
            self.emit(FeedEvent::SecondaryInvalidated(*cache));
        }
    }

    // ------------------------------------------------------------------------
    // Edit
    // ------------------------------------------------------------------------

    /// Save `patch` (a JSON object of changed fields) for an item.
    ///
    /// Nothing changes locally until the server answers. On success the item
    /// moves to the head of its partition in every feed and its cached
    /// detail record is dropped so the next view refetches it.
    pub async fn edit_and_save(
        &self,
        id: &ItemId,
        context: &FeedContext,
        patch: Value,
    ) -> Result<EditOutcome, FeedError> {
        let Value::Object(mut fields) = patch else {
            return Err(FeedError::InvalidPatch("patch must be a JSON object".into()));
        };
        if fields.is_empty() {
            return Err(FeedError::InvalidPatch("patch has no fields".into()));
        }

        let (record, key) = {
            let mut state = self.lock();
            if state.closed {
                return Err(FeedError::Closed);
            }
            let snap = state
                .cache
                .snapshot(context)
                .ok_or_else(|| FeedError::UnknownFeed(context.clone()))?;
            let record = snap
                .find(id)
                .map(FeedItem::detail_key)
                .ok_or_else(|| FeedError::UnknownItem {
                    id: id.clone(),
                    context: context.clone(),
                })?;
            let key = MutationKey {
                kind: MutationKind::Edit,
                record: record.clone(),
            };
            if !state.in_flight.insert(key.clone()) {
                tracing::debug!(record = %record, "Edit already in flight, coalescing");
                return Ok(EditOutcome::Coalesced);
            }
            (record, key)
        };

        fields.insert(
            "source_id".to_string(),
            Value::String(record.source_id.to_string()),
        );
        let payload = Value::Object(fields);

        let result = self.inner.mutations.edit_item(record.item_type, &payload).await;

        let mut guard = self.lock();
        let state = &mut *guard;
        state.in_flight.remove(&key);
        if state.closed {
            return Ok(EditOutcome::Discarded);
        }

        match result {
            Ok(saved) => {
                let moved = state.cache.move_to_top_everywhere(&saved);
                for context in moved {
                    let moved_id = state
                        .cache
                        .snapshot(&context)
                        .and_then(|snap| {
                            snap.find_record(saved.item_type, &saved.source_id)
                                .map(|item| item.id.clone())
                        });
                    if let Some(id) = moved_id {
                        self.emit(FeedEvent::ItemMovedToTop { context, id });
                    }
                }
                self.inner.hydrator.invalidate(&record);
                self.emit(FeedEvent::DetailInvalidated(record.clone()));
                tracing::info!(record = %record, "Saved edit");
                Ok(EditOutcome::Saved(saved))
            }
            Err(SourceError::NotFound) => {
                tracing::info!(record = %record, "Edited record no longer exists, removing it");
                self.purge_record(state, &record);
                Ok(EditOutcome::Removed)
            }
            Err(SourceError::Conflict) => {
                tracing::debug!(record = %record, "Edit conflicted with a newer version");
                Ok(EditOutcome::Superseded)
            }
            Err(e) => {
                tracing::warn!(record = %record, error = %e, "Edit failed");
                Err(e.into())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Shared
    // ------------------------------------------------------------------------

    /// Whether a mutation of `kind` is awaiting the server for `record`.
    pub fn is_pending(&self, kind: MutationKind, record: &DetailKey) -> bool {
        let state = self.lock();
        match kind {
            MutationKind::Pin => state.pins.values().any(|t| t.record == *record),
            MutationKind::Delete | MutationKind::Edit => state.in_flight.contains(&MutationKey {
                kind,
                record: record.clone(),
            }),
        }
    }

    /// Drop a record the server says no longer exists from every feed.
    fn purge_record(&self, state: &mut EngineState, record: &DetailKey) {
        let removals = state
            .cache
            .remove_everywhere(record.item_type, &record.source_id);
        for (context, removal) in removals {
            if let Some(item) = removal.item() {
                self.emit(FeedEvent::ItemRemoved {
                    context,
                    id: item.id.clone(),
                });
            }
        }
        state.pins.retain(|_, tracker| tracker.record != *record);
        self.inner.hydrator.evict(record);
    }

    /// Re-apply the intent of pin toggles still awaiting the server after a
    /// page or pinned list came in from the source.
    pub(super) fn overlay_pending_pins(&self, state: &mut EngineState, context: &FeedContext) {
        let EngineState { cache, pins, .. } = state;
        let Some(snap) = cache.get_mut(context) else {
            return;
        };
        for ((c, id), tracker) in pins.iter() {
            if c != context {
                continue;
            }
            if snap.is_pinned(id).is_some_and(|pinned| pinned != tracker.intent) {
                snap.set_pinned(id, tracker.intent);
            }
        }
    }
}
