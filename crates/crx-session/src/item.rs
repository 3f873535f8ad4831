//! Lifecycle state shared by nodes and properties.

use std::fmt;

use crate::error::{RepositoryError, RepositoryResult};
use crate::node::NodeRef;
use crate::property::PropertyRef;

/// Lifecycle state of an item within one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemState {
    /// Created locally, never saved.
    New,
    /// Matches the backend as last seen.
    Clean,
    /// Loaded, then changed locally.
    Modified,
    /// Removed locally or gone from the backend.
    Deleted,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemState::New => "new",
            ItemState::Clean => "clean",
            ItemState::Modified => "modified",
            ItemState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Path and state bookkeeping embedded in every node and property.
#[derive(Clone, Debug)]
pub(crate) struct ItemCore {
    path: String,
    old_path: Option<String>,
    state: ItemState,
}

impl ItemCore {
    pub(crate) fn new(path: impl Into<String>, state: ItemState) -> Self {
        Self {
            path: path.into(),
            old_path: None,
            state,
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn old_path(&self) -> Option<&str> {
        self.old_path.as_deref()
    }

    pub(crate) fn state(&self) -> ItemState {
        self.state
    }

    /// Fail with `InvalidItemState` if the item was removed.
    pub(crate) fn check_state(&self) -> RepositoryResult<()> {
        if self.state == ItemState::Deleted {
            return Err(RepositoryError::InvalidItemState(format!(
                "{} has been removed",
                self.path
            )));
        }
        Ok(())
    }

    /// Record a local change. New items stay new.
    pub(crate) fn set_modified(&mut self) -> RepositoryResult<()> {
        self.check_state()?;
        if self.state == ItemState::Clean {
            self.state = ItemState::Modified;
        }
        Ok(())
    }

    pub(crate) fn set_deleted(&mut self) {
        self.state = ItemState::Deleted;
    }

    /// Forget local changes, e.g. when a refresh restores backend state.
    pub(crate) fn set_clean(&mut self) {
        self.state = ItemState::Clean;
    }

    /// Accept the backend's confirmation of a save.
    pub(crate) fn confirm_saved(&mut self) {
        if self.state != ItemState::Deleted {
            self.state = ItemState::Clean;
        }
        self.old_path = None;
    }

    pub(crate) fn clear_old_path(&mut self) {
        self.old_path = None;
    }

    /// Move the item to `path`, remembering the first backend path of a
    /// persisted item until the move is saved.
    pub(crate) fn set_path(&mut self, path: String) {
        if self.old_path.is_none() && self.state != ItemState::New && path != self.path {
            self.old_path = Some(std::mem::replace(&mut self.path, path));
        } else {
            self.path = path;
        }
    }

    pub(crate) fn set_old_path(&mut self, old_path: Option<String>) {
        self.old_path = old_path;
    }
}

/// A node or property handle as stored in the identity map.
#[derive(Clone, Debug)]
pub enum Item {
    Node(NodeRef),
    Property(PropertyRef),
}

impl Item {
    pub fn path(&self) -> String {
        match self {
            Item::Node(n) => n.path(),
            Item::Property(p) => p.path(),
        }
    }

    pub fn state(&self) -> ItemState {
        match self {
            Item::Node(n) => n.state(),
            Item::Property(p) => p.state(),
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Item::Node(_))
    }

    pub fn as_node(&self) -> Option<&NodeRef> {
        match self {
            Item::Node(n) => Some(n),
            Item::Property(_) => None,
        }
    }

    pub fn as_property(&self) -> Option<&PropertyRef> {
        match self {
            Item::Property(p) => Some(p),
            Item::Node(_) => None,
        }
    }

    /// Returns `true` if both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Item) -> bool {
        match (self, other) {
            (Item::Node(a), Item::Node(b)) => a.ptr_eq(b),
            (Item::Property(a), Item::Property(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub(crate) fn old_path(&self) -> Option<String> {
        match self {
            Item::Node(n) => n.old_path(),
            Item::Property(p) => p.old_path(),
        }
    }

    pub(crate) fn set_path(&self, path: String) {
        match self {
            Item::Node(n) => n.set_path(path),
            Item::Property(p) => p.set_path(path),
        }
    }

    pub(crate) fn set_deleted(&self) {
        match self {
            Item::Node(n) => n.set_deleted(),
            Item::Property(p) => p.set_deleted(),
        }
    }

    pub(crate) fn confirm_saved(&self) {
        match self {
            Item::Node(n) => n.confirm_saved(),
            Item::Property(p) => p.confirm_saved(),
        }
    }

    pub(crate) fn clear_old_path(&self) {
        match self {
            Item::Node(n) => n.clear_old_path(),
            Item::Property(p) => p.clear_old_path(),
        }
    }
}

impl From<NodeRef> for Item {
    fn from(n: NodeRef) -> Self {
        Item::Node(n)
    }
}

impl From<PropertyRef> for Item {
    fn from(p: PropertyRef) -> Self {
        Item::Property(p)
    }
}
