//! Cached access to backend node type definitions.

use std::collections::BTreeMap;
use std::sync::Arc;

use crx_transport::{NodeTypeDefinition, Transport};
use tracing::debug;

use crate::error::{RepositoryError, RepositoryResult};

/// Node type lookups for one session.
///
/// Definitions are fetched from the transport on first use and kept for the
/// lifetime of the session.
pub struct NodeTypeManager {
    transport: Arc<dyn Transport>,
    cache: BTreeMap<String, NodeTypeDefinition>,
    complete: bool,
}

impl NodeTypeManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cache: BTreeMap::new(),
            complete: false,
        }
    }

    fn fetch(&mut self, names: &[String]) -> RepositoryResult<()> {
        debug!(?names, "fetching node types");
        for def in self.transport.get_node_types(names)? {
            self.cache.insert(def.name.clone(), def);
        }
        if names.is_empty() {
            self.complete = true;
        }
        Ok(())
    }

    /// Look up one definition. Unknown names are a constraint violation.
    pub fn node_type(&mut self, name: &str) -> RepositoryResult<NodeTypeDefinition> {
        if !self.cache.contains_key(name) && !self.complete {
            self.fetch(&[name.to_string()])?;
        }
        self.cache
            .get(name)
            .cloned()
            .ok_or_else(|| RepositoryError::ConstraintViolation(format!("no such node type: {name}")))
    }

    pub fn has_node_type(&mut self, name: &str) -> RepositoryResult<bool> {
        match self.node_type(name) {
            Ok(_) => Ok(true),
            Err(RepositoryError::ConstraintViolation(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every definition the backend knows.
    pub fn all_node_types(&mut self) -> RepositoryResult<Vec<NodeTypeDefinition>> {
        if !self.complete {
            self.fetch(&[])?;
        }
        Ok(self.cache.values().cloned().collect())
    }

    pub fn primary_node_types(&mut self) -> RepositoryResult<Vec<NodeTypeDefinition>> {
        Ok(self.all_node_types()?.into_iter().filter(|t| !t.is_mixin).collect())
    }

    pub fn mixin_node_types(&mut self) -> RepositoryResult<Vec<NodeTypeDefinition>> {
        Ok(self.all_node_types()?.into_iter().filter(|t| t.is_mixin).collect())
    }

    /// All direct and inherited supertypes of `name`, nearest first.
    pub fn supertypes(&mut self, name: &str) -> RepositoryResult<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        let mut queue = self.node_type(name)?.supertypes;
        while !queue.is_empty() {
            let next = queue.remove(0);
            if out.contains(&next) || next == name {
                continue;
            }
            queue.extend(self.node_type(&next)?.supertypes);
            out.push(next);
        }
        Ok(out)
    }

    /// Returns `true` if `type_name` is `other` or inherits from it.
    pub fn is_node_type(&mut self, type_name: &str, other: &str) -> RepositoryResult<bool> {
        if type_name == other {
            return Ok(true);
        }
        Ok(self.supertypes(type_name)?.iter().any(|s| s == other))
    }

    /// The default primary type of the first child node definition that
    /// declares one, searching `parent_type` before its supertypes.
    pub fn default_child_type(&mut self, parent_type: &str) -> RepositoryResult<Option<String>> {
        let mut chain = vec![parent_type.to_string()];
        chain.extend(self.supertypes(parent_type)?);
        for name in chain {
            let def = self.node_type(&name)?;
            if let Some(t) = def
                .child_node_definitions
                .iter()
                .find_map(|c| c.default_primary_type.clone())
            {
                return Ok(Some(t));
            }
        }
        Ok(None)
    }

    /// Drop all cached definitions.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.complete = false;
    }
}

impl std::fmt::Debug for NodeTypeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTypeManager")
            .field("cached", &self.cache.len())
            .field("complete", &self.complete)
            .finish()
    }
}
