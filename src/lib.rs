//! Client-side engine for a unified feed of personal-tracking records.
//!
//! Weigh-ins, workouts, activities, notes, reminders and to-do lists share
//! one cursor-paginated feed with a pinned section on top. [`FeedEngine`]
//! keeps the cached pages, applies pin/delete/edit optimistically with
//! rollback, and hydrates full records on demand.

pub mod cache;
pub mod config;
pub mod detail;
pub mod engine;
pub mod model;
pub mod source;

pub use config::Config;
pub use detail::DetailHydrator;
pub use engine::{FeedEngine, FeedEvent};
pub use model::{FeedContext, FeedError, FeedItem, ItemId, ItemType, SourceError};
