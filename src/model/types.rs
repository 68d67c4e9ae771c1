use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors reported by the remote collaborators (feed, mutation, detail sources).
///
/// `Clone` so a single in-flight request can hand the same failure to every
/// caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Transport-level or server-side failure. Retryable.
    #[error("Network error: {0}")]
    Network(String),

    /// The record no longer exists on the server.
    #[error("Record not found")]
    NotFound,

    /// The server rejected the payload.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The server considers this mutation stale or superseded.
    #[error("Conflicting mutation")]
    Conflict,
}

impl SourceError {
    /// Returns true if repeating the request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Network(_))
    }
}

/// Errors returned by the feed engine and detail hydrator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// Remote call failed; existing cache state was kept or rolled back.
    #[error("{0}")]
    Source(#[from] SourceError),

    /// The patch passed to an edit was rejected before reaching the server.
    #[error("Invalid edit: {0}")]
    InvalidPatch(String),

    /// No cached item with this id in the given feed context.
    #[error("Unknown feed item '{id}' in context '{context}'")]
    UnknownItem { id: ItemId, context: FeedContext },

    /// The feed context was never opened or has been closed.
    #[error("Feed context '{0}' is not open")]
    UnknownFeed(FeedContext),

    /// The engine was shut down.
    #[error("Feed engine has been shut down")]
    Closed,
}

impl FeedError {
    /// Returns true for failures that leave "more pages may exist" semantics intact.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Source(e) => e.is_retryable(),
            FeedError::InvalidPatch(_)
            | FeedError::UnknownItem { .. }
            | FeedError::UnknownFeed(_)
            | FeedError::Closed => false,
        }
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Unique feed key of a [`FeedItem`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Arc<str>);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Scoping key of an independent feed instance ("main", "notes", ...).
///
/// Compared by exact match only; no two contexts share pin state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedContext(Arc<str>);

impl FeedContext {
    pub const MAIN: &'static str = "main";

    pub fn main() -> Self {
        Self::from(Self::MAIN)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FeedContext {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for FeedContext {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for FeedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque pagination continuation token, passed back to the source unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Record Types
// ============================================================================

/// Kind of personal-tracking record behind a feed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Notes,
    GymSessions,
    TodoLists,
    Weight,
    GlobalReminders,
    LocalReminders,
    ActivitySessions,
}

impl ItemType {
    pub const ALL: [ItemType; 7] = [
        ItemType::Notes,
        ItemType::GymSessions,
        ItemType::TodoLists,
        ItemType::Weight,
        ItemType::GlobalReminders,
        ItemType::LocalReminders,
        ItemType::ActivitySessions,
    ];

    /// Wire name, also used as the REST path segment.
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Notes => "notes",
            ItemType::GymSessions => "gym_sessions",
            ItemType::TodoLists => "todo_lists",
            ItemType::Weight => "weight",
            ItemType::GlobalReminders => "global_reminders",
            ItemType::LocalReminders => "local_reminders",
            ItemType::ActivitySessions => "activity_sessions",
        }
    }

    /// Caches outside the feed that hold derived data for this record type
    /// and must be dropped once a record of this type is deleted.
    pub fn secondary_caches(self) -> &'static [SecondaryCache] {
        match self {
            ItemType::Weight => &[SecondaryCache::WeightHistory],
            ItemType::GymSessions => &[SecondaryCache::ExerciseHistory],
            ItemType::ActivitySessions => &[SecondaryCache::ActivityStats],
            ItemType::GlobalReminders | ItemType::LocalReminders => {
                &[SecondaryCache::ReminderSchedule]
            }
            ItemType::Notes | ItemType::TodoLists => &[],
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown item type '{s}'"))
    }
}

/// Type-specific derived caches kept by the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecondaryCache {
    WeightHistory,
    ExerciseHistory,
    ActivityStats,
    ReminderSchedule,
}

/// Summary record for one entry of the aggregated feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub source_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub pinned: bool,
    pub feed_context: FeedContext,
    #[serde(default)]
    pub extra_fields: serde_json::Value,
}

impl FeedItem {
    /// Key of the underlying record, shared across feed contexts.
    pub fn detail_key(&self) -> DetailKey {
        DetailKey::new(self.item_type, self.source_id.clone())
    }

    pub fn is_record(&self, item_type: ItemType, source_id: &str) -> bool {
        self.item_type == item_type && self.source_id == source_id
    }
}

/// One page of the cursor-paginated feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<FeedItem>,
    #[serde(default)]
    pub next_cursor: Option<Cursor>,
}

/// Key of a full per-type record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DetailKey {
    pub item_type: ItemType,
    pub source_id: Arc<str>,
}

impl DetailKey {
    pub fn new(item_type: ItemType, source_id: impl Into<Arc<str>>) -> Self {
        Self {
            item_type,
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for DetailKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.item_type, self.source_id)
    }
}

/// The complete, type-specific record backing a feed item ("full session").
///
/// Opaque beyond its key and update timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub source_id: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl DetailRecord {
    pub fn key(&self) -> DetailKey {
        DetailKey::new(self.item_type, self.source_id.clone())
    }
}
