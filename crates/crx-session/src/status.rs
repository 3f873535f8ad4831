//! Pending change summaries.
//!
//! A [`PendingChanges`] value is a snapshot of what the next save would
//! send to the backend, in the order it would be sent.

use serde::{Deserialize, Serialize};

/// Unsaved changes of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChanges {
    /// Backend paths staged for deletion.
    pub removed: Vec<String>,
    /// Staged moves, in registration order.
    pub moved: Vec<ChangeEntry>,
    /// Local paths staged for creation.
    pub added: Vec<String>,
    /// Loaded items changed locally.
    pub modified: Vec<String>,
}

impl PendingChanges {
    /// Create an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if there are no changes of any kind.
    pub fn is_clean(&self) -> bool {
        self.removed.is_empty()
            && self.moved.is_empty()
            && self.added.is_empty()
            && self.modified.is_empty()
    }

    /// Total number of entries across all categories.
    pub fn total_entries(&self) -> usize {
        self.removed.len() + self.moved.len() + self.added.len() + self.modified.len()
    }
}

/// A single staged move.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Path before the move.
    pub from: String,
    /// Path after the move.
    pub to: String,
}

impl ChangeEntry {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_is_clean() {
        let changes = PendingChanges::new();
        assert!(changes.is_clean());
        assert_eq!(changes.total_entries(), 0);
    }

    #[test]
    fn summary_with_move_is_not_clean() {
        let mut changes = PendingChanges::new();
        changes.moved.push(ChangeEntry::new("/a", "/b"));
        assert!(!changes.is_clean());
        assert_eq!(changes.total_entries(), 1);
    }
}
