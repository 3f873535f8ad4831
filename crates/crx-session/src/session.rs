//! The session façade.
//!
//! A [`Session`] is the entry point for clients: it logs into a workspace,
//! owns the [`ObjectManager`] for that login, and exposes path based reads,
//! moves and removals, save and refresh, user transactions, namespaces and
//! queries. After [`logout`](Session::logout) every call fails with
//! [`RepositoryError::NotLive`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crx_transport::{Query, Transport, TransportError};
use crx_types::path;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{RepositoryError, RepositoryResult};
use crate::item::Item;
use crate::node::NodeRef;
use crate::object_manager::ObjectManager;
use crate::property::PropertyRef;
use crate::query::QueryResult;
use crate::status::PendingChanges;

/// One login to one workspace.
pub struct Session {
    om: ObjectManager,
    transport: Arc<dyn Transport>,
    workspace: String,
    user_id: String,
    live: bool,
}

impl Session {
    /// Log into the workspace named by `config`.
    ///
    /// With `auto_create_workspace`, a workspace the backend does not know is
    /// created first.
    pub fn login(transport: Arc<dyn Transport>, config: &SessionConfig) -> RepositoryResult<Self> {
        let credentials = config.credentials();
        let workspace = match transport.login(&credentials, &config.workspace) {
            Ok(ws) => ws,
            Err(TransportError::NoSuchWorkspace(ws)) if config.auto_create_workspace => {
                info!(workspace = %ws, "creating missing workspace");
                transport.create_workspace(&ws)?;
                transport.login(&credentials, &ws)?
            }
            Err(e) => return Err(e.into()),
        };
        info!(user = %credentials.user_id, workspace = %workspace, "logged in");
        Ok(Self {
            om: ObjectManager::new(transport.clone()),
            transport,
            workspace,
            user_id: credentials.user_id,
            live: true,
        })
    }

    pub fn workspace_name(&self) -> &str {
        &self.workspace
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    fn check_live(&self) -> RepositoryResult<()> {
        if self.live {
            Ok(())
        } else {
            Err(RepositoryError::NotLive)
        }
    }

    /// The object manager, for node and property operations.
    pub fn object_manager(&mut self) -> RepositoryResult<&mut ObjectManager> {
        self.check_live()?;
        Ok(&mut self.om)
    }

    /// End the session. Unsaved changes are discarded. Calling it twice is
    /// harmless.
    pub fn logout(&mut self) -> RepositoryResult<()> {
        if !self.live {
            return Ok(());
        }
        self.live = false;
        self.om.clear();
        self.transport.logout()?;
        info!(user = %self.user_id, workspace = %self.workspace, "logged out");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn root_node(&mut self) -> RepositoryResult<NodeRef> {
        self.node(path::ROOT)
    }

    /// The node at `abs_path`, or an `[identifier]` reference.
    pub fn node(&mut self, abs_path: &str) -> RepositoryResult<NodeRef> {
        self.object_manager()?
            .get_node_by_path(abs_path)
            .map_err(RepositoryError::into_path_not_found)
    }

    pub fn node_by_identifier(&mut self, identifier: &str) -> RepositoryResult<NodeRef> {
        self.object_manager()?.get_node_by_identifier(identifier)
    }

    /// Nodes at `paths`; missing ones are left out.
    pub fn nodes(&mut self, paths: &[String]) -> RepositoryResult<Vec<NodeRef>> {
        self.object_manager()?.get_nodes_by_path(paths)
    }

    /// Nodes with the given identifiers; unknown identifiers are left out.
    pub fn nodes_by_identifier(&mut self, identifiers: &[String]) -> RepositoryResult<Vec<NodeRef>> {
        let om = self.object_manager()?;
        let mut nodes = Vec::with_capacity(identifiers.len());
        for id in identifiers {
            match om.get_node_by_identifier(id) {
                Ok(node) => nodes.push(node),
                Err(RepositoryError::ItemNotFound(_)) => {
                    debug!(identifier = %id, "skipping unknown identifier");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(nodes)
    }

    pub fn property(&mut self, abs_path: &str) -> RepositoryResult<PropertyRef> {
        self.object_manager()?
            .get_property_by_path(abs_path)
            .map_err(RepositoryError::into_path_not_found)
    }

    /// The node or, failing that, the property at `abs_path`.
    pub fn item(&mut self, abs_path: &str) -> RepositoryResult<Item> {
        match self.node(abs_path) {
            Ok(node) => Ok(Item::Node(node)),
            Err(RepositoryError::PathNotFound(_)) => self.property(abs_path).map(Item::Property),
            Err(e) => Err(e),
        }
    }

    pub fn item_exists(&mut self, abs_path: &str) -> RepositoryResult<bool> {
        Ok(self.node_exists(abs_path)? || self.property_exists(abs_path)?)
    }

    pub fn node_exists(&mut self, abs_path: &str) -> RepositoryResult<bool> {
        exists(self.node(abs_path))
    }

    pub fn property_exists(&mut self, abs_path: &str) -> RepositoryResult<bool> {
        exists(self.property(abs_path))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Move the node at `src` to `dst`.
    ///
    /// The parent of `dst` must exist, and nothing may exist at `dst`.
    pub fn move_item(&mut self, src: &str, dst: &str) -> RepositoryResult<()> {
        let om = self.object_manager()?;
        let dst = om.normalize_path(dst)?;
        let parent = om
            .get_node_by_path(&path::parent(&dst))
            .map_err(RepositoryError::into_path_not_found)?;
        let name = path::name(&dst);
        if parent.has_node(om, name)? || parent.has_property(om, name)? {
            return Err(RepositoryError::ItemExists(dst));
        }
        om.move_node(src, &dst)
            .map_err(RepositoryError::into_path_not_found)
    }

    /// Remove the node or property at `abs_path`.
    pub fn remove_item(&mut self, abs_path: &str) -> RepositoryResult<()> {
        let om = self.object_manager()?;
        match om.get_node_by_path(abs_path) {
            Ok(node) => node.remove(om),
            Err(RepositoryError::ItemNotFound(_)) => om.get_property_by_path(abs_path)?.remove(om),
            Err(e) => Err(e),
        }
    }

    pub fn save(&mut self) -> RepositoryResult<()> {
        self.object_manager()?.save()
    }

    pub fn refresh(&mut self, keep_changes: bool) -> RepositoryResult<()> {
        self.object_manager()?.refresh(keep_changes)
    }

    pub fn has_pending_changes(&self) -> RepositoryResult<bool> {
        self.check_live()?;
        Ok(self.om.has_pending_changes())
    }

    pub fn pending_changes(&self) -> RepositoryResult<PendingChanges> {
        self.check_live()?;
        Ok(self.om.pending_changes())
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Open a backend transaction spanning several saves.
    pub fn begin_transaction(&mut self) -> RepositoryResult<()> {
        self.check_live()?;
        if !self.transport.supports_transactions() {
            return Err(RepositoryError::Transport(TransportError::Unsupported(
                "transactions".to_string(),
            )));
        }
        if self.om.in_user_transaction() {
            return Err(RepositoryError::Transport(TransportError::Transaction(
                "transaction already open".to_string(),
            )));
        }
        self.transport
            .begin_transaction()
            .map_err(RepositoryError::Transport)?;
        self.om.set_user_transaction(true);
        debug!("began user transaction");
        Ok(())
    }

    pub fn commit_transaction(&mut self) -> RepositoryResult<()> {
        self.require_transaction()?;
        self.transport.commit().map_err(RepositoryError::Transport)?;
        self.om.set_user_transaction(false);
        debug!("committed user transaction");
        Ok(())
    }

    /// Undo everything saved since the transaction began. Loaded items are
    /// dropped from the identity map.
    pub fn rollback_transaction(&mut self) -> RepositoryResult<()> {
        self.require_transaction()?;
        self.om.set_user_transaction(false);
        self.om.clear();
        self.transport.rollback().map_err(RepositoryError::Transport)?;
        debug!("rolled back user transaction");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.om.in_user_transaction()
    }

    fn require_transaction(&self) -> RepositoryResult<()> {
        self.check_live()?;
        if !self.om.in_user_transaction() {
            return Err(RepositoryError::Transport(TransportError::Transaction(
                "no open transaction".to_string(),
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Namespaces
    // ------------------------------------------------------------------

    fn namespaces(&self) -> RepositoryResult<BTreeMap<String, String>> {
        self.check_live()?;
        Ok(self.transport.namespaces()?)
    }

    pub fn namespace_prefixes(&self) -> RepositoryResult<Vec<String>> {
        Ok(self.namespaces()?.into_keys().collect())
    }

    pub fn namespace_uri(&self, prefix: &str) -> RepositoryResult<String> {
        self.namespaces()?
            .remove(prefix)
            .ok_or_else(|| RepositoryError::ItemNotFound(format!("namespace prefix {prefix}")))
    }

    pub fn namespace_prefix(&self, uri: &str) -> RepositoryResult<String> {
        self.namespaces()?
            .into_iter()
            .find(|(_, u)| u == uri)
            .map(|(p, _)| p)
            .ok_or_else(|| RepositoryError::ItemNotFound(format!("namespace {uri}")))
    }

    pub fn register_namespace(&self, prefix: &str, uri: &str) -> RepositoryResult<()> {
        self.check_live()?;
        Ok(self.transport.register_namespace(prefix, uri)?)
    }

    pub fn unregister_namespace(&self, prefix: &str) -> RepositoryResult<()> {
        self.check_live()?;
        Ok(self.transport.unregister_namespace(prefix)?)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn query(&self, language: &str, statement: &str) -> RepositoryResult<QueryResult> {
        self.execute_query(&Query::new(language, statement))
    }

    /// Run a query with an explicit limit or offset.
    pub fn execute_query(&self, query: &Query) -> RepositoryResult<QueryResult> {
        self.check_live()?;
        debug!(language = %query.language, statement = %query.statement, "query");
        Ok(QueryResult::new(self.transport.query(query)?))
    }
}

fn exists<T>(result: RepositoryResult<T>) -> RepositoryResult<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(RepositoryError::PathNotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("workspace", &self.workspace)
            .field("user_id", &self.user_id)
            .field("live", &self.live)
            .field("om", &self.om)
            .finish()
    }
}
