//! Query results.
//!
//! Queries are executed by the backend; a [`QueryResult`] only holds the
//! returned rows. Nodes behind the rows are resolved through the session's
//! identity map, either lazily with [`QueryResult::nodes`] or up front with
//! [`QueryResult::prefetch_nodes`].

use crx_transport::QueryRow;

use crate::error::{RepositoryError, RepositoryResult};
use crate::node::NodeRef;
use crate::object_manager::ObjectManager;

/// Rows returned by one query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    rows: Vec<QueryRow>,
}

impl QueryResult {
    pub fn new(rows: Vec<QueryRow>) -> Self {
        Self { rows }
    }

    /// Column names across all rows, in first-seen order.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for column in self.rows.iter().flat_map(|r| r.columns.iter()) {
            if !names.contains(&column.name) {
                names.push(column.name.clone());
            }
        }
        names
    }

    /// Selector names across all rows, in first-seen order.
    pub fn selector_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for selector in self
            .rows
            .iter()
            .flat_map(|r| r.columns.iter())
            .filter_map(|c| c.selector.as_ref())
        {
            if !names.contains(selector) {
                names.push(selector.clone());
            }
        }
        names
    }

    pub fn rows(&self) -> &[QueryRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Paths of the nodes behind the rows, skipping rows without one.
    pub fn paths(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|r| r.path().map(str::to_string))
            .collect()
    }

    /// Iterate the result nodes, loading each one when it is reached.
    pub fn nodes<'a>(&self, om: &'a mut ObjectManager) -> NodeIterator<'a> {
        NodeIterator {
            paths: self.paths(),
            om,
            position: 0,
        }
    }

    /// Load all result nodes with one batch lookup.
    pub fn prefetch_nodes(&self, om: &mut ObjectManager) -> RepositoryResult<Vec<NodeRef>> {
        om.get_nodes_by_path(&self.paths())
    }
}

/// Lazy iterator over the nodes of a [`QueryResult`].
pub struct NodeIterator<'a> {
    paths: Vec<String>,
    om: &'a mut ObjectManager,
    position: usize,
}

impl NodeIterator<'_> {
    /// Number of result nodes, loaded or not.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Continue iteration at the node with `target` path.
    pub fn seek(&mut self, target: &str) -> RepositoryResult<()> {
        let index = self
            .paths
            .iter()
            .position(|p| p == target)
            .ok_or_else(|| {
                RepositoryError::ItemNotFound(format!("invalid seek position: {target}"))
            })?;
        self.position = index;
        Ok(())
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }
}

impl Iterator for NodeIterator<'_> {
    type Item = RepositoryResult<NodeRef>;

    fn next(&mut self) -> Option<Self::Item> {
        let target = self.paths.get(self.position)?.clone();
        self.position += 1;
        Some(self.om.get_node(&target, crx_types::path::ROOT))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.paths.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}
