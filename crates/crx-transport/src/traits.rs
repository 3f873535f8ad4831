use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{TransportError, TransportResult};
use crate::node_type::NodeTypeDefinition;
use crate::query::{Query, QueryRow};
use crate::record::{NodeRecord, NodeWrite, PropertyRecord};

/// Login credentials passed to [`Transport::login`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            password: password.into(),
        }
    }
}

/// The storage backend a session reads from and writes to.
///
/// All implementations must satisfy these invariants:
/// - Paths are absolute and normalized by the caller.
/// - `store_node` creates the node and its whole subtree in one call.
/// - `delete_item` on a node removes its subtree.
/// - Missing items are reported as [`TransportError::ItemNotFound`], never as
///   a generic backend error.
///
/// Every call blocks. Implementations decide whether batch calls are
/// executed as one round trip.
pub trait Transport: Send + Sync {
    /// Open the given workspace. Returns the workspace name actually used.
    fn login(&self, credentials: &Credentials, workspace: &str) -> TransportResult<String>;

    /// Release any state held for the session.
    fn logout(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Create an empty workspace.
    fn create_workspace(&self, name: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported(format!("create workspace {name}")))
    }

    /// Fetch one node record.
    fn get_node(&self, path: &str) -> TransportResult<NodeRecord>;

    /// Fetch several node records.
    ///
    /// Missing paths are omitted from the result. The default implementation
    /// calls `get_node()` for each path.
    fn get_nodes(&self, paths: &[String]) -> TransportResult<BTreeMap<String, NodeRecord>> {
        let mut out = BTreeMap::new();
        for path in paths {
            match self.get_node(path) {
                Ok(record) => {
                    out.insert(path.clone(), record);
                }
                Err(TransportError::ItemNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Resolve a node identifier to the node's path.
    fn get_node_path_for_identifier(&self, identifier: &str) -> TransportResult<String>;

    /// Fetch the content of a binary property that arrived length-only.
    ///
    /// Multi-valued binaries return one entry per value.
    fn get_binary(&self, path: &str) -> TransportResult<Vec<Bytes>>;

    /// Create a node together with its new subtree.
    fn store_node(&self, node: &NodeWrite) -> TransportResult<()>;

    /// Create or overwrite one property of an existing node.
    fn store_property(&self, path: &str, property: &PropertyRecord) -> TransportResult<()>;

    /// Delete a node (with its subtree) or a property.
    fn delete_item(&self, path: &str) -> TransportResult<()>;

    /// Move a node and its subtree.
    fn move_node(&self, src: &str, dst: &str) -> TransportResult<()>;

    /// Returns `true` if the backend honors `begin_transaction`/`commit`/`rollback`.
    fn supports_transactions(&self) -> bool {
        false
    }

    fn begin_transaction(&self) -> TransportResult<()> {
        Ok(())
    }

    fn commit(&self) -> TransportResult<()> {
        Ok(())
    }

    fn rollback(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Fetch node type definitions. An empty `names` slice requests all types.
    fn get_node_types(&self, names: &[String]) -> TransportResult<Vec<NodeTypeDefinition>>;

    /// Execute a query and return its raw rows.
    fn query(&self, query: &Query) -> TransportResult<Vec<QueryRow>>;

    /// Registered namespaces, prefix to URI.
    fn namespaces(&self) -> TransportResult<BTreeMap<String, String>>;

    fn register_namespace(&self, prefix: &str, uri: &str) -> TransportResult<()>;

    fn unregister_namespace(&self, prefix: &str) -> TransportResult<()>;
}
