use async_trait::async_trait;

use crate::model::ItemType;

/// Destructive operations that need the user's consent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmAction {
    /// Delete a record and remove it from every feed.
    DeleteItem {
        item_type: ItemType,
        source_id: String,
        /// Cached title, if the record is on screen anywhere.
        title: Option<String>,
    },
}

impl ConfirmAction {
    /// One-line prompt suitable for a dialog or terminal.
    pub fn prompt(&self) -> String {
        match self {
            ConfirmAction::DeleteItem {
                item_type,
                source_id,
                title,
            } => match title {
                Some(title) => format!("Delete {item_type} \"{title}\"?"),
                None => format!("Delete {item_type} {source_id}?"),
            },
        }
    }
}

/// Asks whether a destructive action may proceed.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, action: &ConfirmAction) -> bool;
}

/// Approves everything. Used when the caller has already asked.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

#[async_trait]
impl Confirm for AlwaysConfirm {
    async fn confirm(&self, _action: &ConfirmAction) -> bool {
        true
    }
}
