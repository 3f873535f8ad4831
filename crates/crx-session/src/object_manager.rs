//! The session's identity map and change tracker.
//!
//! The [`ObjectManager`] owns every item a session has loaded or created.
//! It guarantees one instance per path, stages additions, removals and
//! moves, and replays them against the [`Transport`] on [`save`].
//!
//! # Path coordinates
//!
//! Cached items always carry their *local* path, the path the session sees
//! after pending moves. Staged removals are kept in *backend* coordinates
//! so they can be sent before any move is replayed. Two walks translate
//! between the two:
//!
//! - [`resolve_backend_path`] walks the moves newest first, mapping a
//!   destination prefix back to its source.
//! - [`resolve_local_path`] walks them oldest first, mapping a source prefix
//!   to its destination.
//!
//! # Save order
//!
//! 1. Deletes, in path order.
//! 2. Moves, in registration order.
//! 3. Creates: top-level additions only, each new node carrying its whole
//!    new subtree.
//! 4. Updates: modified properties, each path written once.
//!
//! The whole sequence runs inside a backend transaction unless the caller
//! already owns one. On failure the transaction is rolled back and local
//! state stays pending.
//!
//! [`save`]: ObjectManager::save
//! [`resolve_backend_path`]: ObjectManager::resolve_backend_path
//! [`resolve_local_path`]: ObjectManager::resolve_local_path

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use crx_transport::{NodeRecord, NodeTypeDefinition, NodeWrite, Transport};
use crx_types::{path, PropertyType, Value};
use tracing::{debug, info, warn};

use crate::error::{RepositoryError, RepositoryResult};
use crate::item::{Item, ItemState};
use crate::node::{Node, NodeRef};
use crate::node_type::NodeTypeManager;
use crate::property::PropertyRef;
use crate::status::{ChangeEntry, PendingChanges};

/// Identity map and pending changes of one session.
pub struct ObjectManager {
    transport: Arc<dyn Transport>,
    node_types: NodeTypeManager,
    objects_by_path: BTreeMap<String, Item>,
    /// Identifier to local path. Checked against `objects_by_path` before use.
    objects_by_uuid: HashMap<String, String>,
    items_add: BTreeSet<String>,
    /// Backend paths.
    items_remove: BTreeSet<String>,
    nodes_move: Vec<(String, String)>,
    user_transaction: bool,
}

impl ObjectManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            node_types: NodeTypeManager::new(transport.clone()),
            transport,
            objects_by_path: BTreeMap::new(),
            objects_by_uuid: HashMap::new(),
            items_add: BTreeSet::new(),
            items_remove: BTreeSet::new(),
            nodes_move: Vec::new(),
            user_transaction: false,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn node_types(&mut self) -> &mut NodeTypeManager {
        &mut self.node_types
    }

    pub fn node_type(&mut self, name: &str) -> RepositoryResult<NodeTypeDefinition> {
        self.node_types.node_type(name)
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    /// Normalize an absolute path or resolve an `[identifier]` reference.
    ///
    /// `..` above the root is dropped.
    pub fn normalize_path(&mut self, p: &str) -> RepositoryResult<String> {
        if p.is_empty() {
            return Err(RepositoryError::InvalidPath("empty path".to_string()));
        }
        if let Some(id) = path::identifier_reference(p) {
            return self.path_for_identifier(id);
        }
        if !path::is_absolute(p) {
            return Err(RepositoryError::InvalidPath(format!("{p} is not absolute")));
        }
        let normalized = path::normalize(p);
        path::validate_absolute(&normalized)?;
        Ok(normalized)
    }

    /// Join `rel` below `root` and normalize. A leading `/` on `rel` is
    /// ignored.
    pub fn absolute_path(&self, root: &str, rel: &str) -> String {
        let root = root.trim_matches('/');
        let rel = rel.trim_start_matches('/');
        if root.is_empty() {
            path::normalize(&format!("/{rel}"))
        } else {
            path::normalize(&format!("/{root}/{rel}"))
        }
    }

    /// Map a local path to where the backend stores it before pending moves
    /// are replayed.
    pub fn resolve_backend_path(&self, local: &str) -> String {
        let mut p = local.to_string();
        for (src, dst) in self.nodes_move.iter().rev() {
            if let Some(rebased) = path::rebase(&p, dst, src) {
                p = rebased;
            }
        }
        p
    }

    /// Map a backend path to the path the session sees after pending moves.
    pub fn resolve_local_path(&self, backend: &str) -> String {
        let mut p = backend.to_string();
        for (src, dst) in &self.nodes_move {
            if let Some(rebased) = path::rebase(&p, src, dst) {
                p = rebased;
            }
        }
        p
    }

    /// The backend path to fetch for `local`, or `None` if the item is
    /// hidden by a pending removal or moved away.
    fn backend_location(&self, local: &str) -> Option<String> {
        let mut p = local.to_string();
        for (src, dst) in self.nodes_move.iter().rev() {
            if let Some(rebased) = path::rebase(&p, dst, src) {
                p = rebased;
            } else if path::is_descendant_or_self(&p, src) {
                return None;
            }
        }
        if self
            .items_remove
            .iter()
            .any(|r| path::is_descendant_or_self(&p, r))
        {
            return None;
        }
        Some(p)
    }

    /// Returns `true` if reads of `local` are hidden by a pending removal or
    /// a pending move away from it.
    pub fn is_path_masked(&self, local: &str) -> bool {
        self.backend_location(local).is_none()
    }

    /// Returns `true` if `p` is the source of a pending move.
    pub fn is_node_moved(&self, p: &str) -> bool {
        self.nodes_move.iter().any(|(src, _)| src == p)
    }

    /// Returns `true` if `p` is staged for removal.
    pub fn is_item_deleted(&self, p: &str) -> bool {
        self.items_remove.contains(p) || self.items_remove.contains(&self.resolve_backend_path(p))
    }

    /// Names of pending move destinations directly below `parent`.
    pub(crate) fn moved_in_children(&self, parent: &str) -> Vec<String> {
        self.nodes_move
            .iter()
            .map(|(_, dst)| dst)
            .filter(|dst| path::parent(dst) == parent && !self.is_path_masked(dst))
            .map(|dst| path::name(dst).to_string())
            .collect()
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// A node by bare identifier, or by `rel` resolved against `root`.
    pub fn get_node(&mut self, identifier_or_rel: &str, root: &str) -> RepositoryResult<NodeRef> {
        if path::is_identifier(identifier_or_rel) {
            let target = self.path_for_identifier(identifier_or_rel)?;
            let node = self.get_node_by_path(&target)?;
            self.objects_by_uuid
                .insert(identifier_or_rel.to_string(), target);
            return Ok(node);
        }
        let target = self.absolute_path(root, identifier_or_rel);
        self.get_node_by_path(&target)
    }

    pub fn get_node_by_identifier(&mut self, identifier: &str) -> RepositoryResult<NodeRef> {
        self.get_node(identifier, path::ROOT)
    }

    /// The node at `abs`, from the identity map or the backend.
    pub fn get_node_by_path(&mut self, abs: &str) -> RepositoryResult<NodeRef> {
        let local = self.normalize_path(abs)?;
        match self.objects_by_path.get(&local) {
            Some(Item::Node(node)) => return Ok(node.clone()),
            Some(Item::Property(_)) => {
                return Err(RepositoryError::ItemNotFound(format!(
                    "{local} is a property"
                )))
            }
            None => {}
        }
        let backend = self
            .backend_location(&local)
            .ok_or_else(|| RepositoryError::ItemNotFound(local.clone()))?;
        debug!(path = %local, backend = %backend, "fetching node");
        let record = self.transport.get_node(&backend)?;
        Ok(self.register_fetched(&local, &backend, &record))
    }

    /// Nodes at `paths`, in input order. Cache misses are fetched with one
    /// batch call; missing and masked paths are left out.
    pub fn get_nodes_by_path(&mut self, paths: &[String]) -> RepositoryResult<Vec<NodeRef>> {
        let mut locals = Vec::with_capacity(paths.len());
        for p in paths {
            locals.push(self.normalize_path(p)?);
        }

        let mut misses: Vec<(String, String)> = Vec::new();
        for local in &locals {
            if self.objects_by_path.contains_key(local) || misses.iter().any(|(l, _)| l == local) {
                continue;
            }
            if let Some(backend) = self.backend_location(local) {
                misses.push((local.clone(), backend));
            }
        }
        if !misses.is_empty() {
            let backend_paths: Vec<String> = misses.iter().map(|(_, b)| b.clone()).collect();
            debug!(count = backend_paths.len(), "fetching nodes");
            let records = self.transport.get_nodes(&backend_paths)?;
            for (local, backend) in &misses {
                if let Some(record) = records.get(backend) {
                    self.register_fetched(local, backend, record);
                }
            }
        }

        Ok(locals
            .iter()
            .filter_map(|p| self.get_cached_node(p))
            .collect())
    }

    /// The property at `abs`.
    pub fn get_property_by_path(&mut self, abs: &str) -> RepositoryResult<PropertyRef> {
        let local = self.normalize_path(abs)?;
        if local == path::ROOT {
            return Err(RepositoryError::PathNotFound(local));
        }
        let node = self
            .get_node_by_path(&path::parent(&local))
            .map_err(RepositoryError::into_path_not_found)?;
        node.property(self, path::name(&local))
    }

    /// The node at `p` if it is already loaded.
    pub fn get_cached_node(&self, p: &str) -> Option<NodeRef> {
        self.objects_by_path.get(p).and_then(Item::as_node).cloned()
    }

    fn register_fetched(&mut self, local: &str, backend: &str, record: &NodeRecord) -> NodeRef {
        let mut node = Node::from_record(self, local, record);
        if backend != local {
            node.set_old_path(Some(backend.to_string()));
        }
        let node = NodeRef::new(node);
        if let Some(id) = node.identifier() {
            self.objects_by_uuid.insert(id, local.to_string());
        }
        self.objects_by_path
            .insert(local.to_string(), Item::Node(node.clone()));
        node
    }

    // ------------------------------------------------------------------
    // Identifiers
    // ------------------------------------------------------------------

    fn cached_identifier_path(&mut self, id: &str) -> Option<String> {
        let target = self.objects_by_uuid.get(id)?.clone();
        let valid = matches!(
            self.objects_by_path.get(&target),
            Some(Item::Node(n)) if n.identifier().as_deref() == Some(id)
        );
        if valid {
            Some(target)
        } else {
            self.objects_by_uuid.remove(id);
            None
        }
    }

    fn path_for_identifier(&mut self, id: &str) -> RepositoryResult<String> {
        if let Some(target) = self.cached_identifier_path(id) {
            return Ok(target);
        }
        debug!(identifier = id, "resolving identifier");
        let backend = self.transport.get_node_path_for_identifier(id)?;
        Ok(self.resolve_local_path(&backend))
    }

    pub(crate) fn index_identifier(&mut self, id: &str, local: &str) {
        self.objects_by_uuid.insert(id.to_string(), local.to_string());
    }

    pub(crate) fn unindex_path(&mut self, local: &str) {
        self.objects_by_uuid.retain(|_, p| p != local);
    }

    // ------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------

    /// Register a new item and stage it for creation.
    pub fn add_item(&mut self, abs: &str, item: Item) -> RepositoryResult<()> {
        let local = self.normalize_path(abs)?;
        if self.objects_by_path.contains_key(&local) {
            return Err(RepositoryError::ItemExists(local));
        }
        if let Item::Node(node) = &item {
            if let Some(id) = node.identifier() {
                self.objects_by_uuid.insert(id, local.clone());
            }
        }
        self.items_add.insert(local.clone());
        self.objects_by_path.insert(local, item);
        Ok(())
    }

    /// Unmap an item and stage its removal. With `property` set, removes the
    /// named property of the node at `abs`; otherwise the node and its
    /// cached subtree.
    ///
    /// A removal that only undoes a pending addition is not sent to the
    /// backend.
    pub fn remove_item(&mut self, abs: &str, property: Option<&str>) -> RepositoryResult<()> {
        let node_path = self.normalize_path(abs)?;
        if self.get_cached_node(&node_path).is_none() {
            return Err(RepositoryError::Internal(format!(
                "{node_path} is not loaded"
            )));
        }

        if let Some(name) = property {
            let prop_path = path::join(&node_path, name);
            if !self.items_add.remove(&prop_path) {
                let backend = self.resolve_backend_path(&prop_path);
                self.items_remove.insert(backend);
            }
            self.objects_by_path.remove(&prop_path);
            debug!(path = %prop_path, "staged property removal");
            return Ok(());
        }

        if self
            .nodes_move
            .iter()
            .any(|(_, dst)| path::is_descendant_or_self(dst, &node_path))
        {
            return Err(RepositoryError::Internal(format!(
                "cannot remove {node_path}: it holds the destination of an unsaved move; save first"
            )));
        }
        let backend = self.resolve_backend_path(&node_path);
        if self
            .move_sources()
            .iter()
            .any(|src| path::is_descendant_or_self(src, &backend))
        {
            return Err(RepositoryError::Internal(format!(
                "cannot remove {node_path}: it holds the source of an unsaved move; save first"
            )));
        }

        self.evict_subtree(&node_path);
        let was_added = self.items_add.contains(&node_path);
        self.items_add
            .retain(|p| !path::is_descendant_or_self(p, &node_path));
        if !was_added {
            self.items_remove.retain(|p| !path::is_descendant(p, &backend));
            self.items_remove.insert(backend);
        }
        debug!(path = %node_path, elided = was_added, "staged node removal");
        Ok(())
    }

    /// Source of every staged move, in backend coordinates before any move
    /// is replayed.
    fn move_sources(&self) -> Vec<String> {
        self.nodes_move
            .iter()
            .enumerate()
            .map(|(i, (src, _))| {
                let mut p = src.clone();
                for (earlier_src, earlier_dst) in self.nodes_move[..i].iter().rev() {
                    if let Some(rebased) = path::rebase(&p, earlier_dst, earlier_src) {
                        p = rebased;
                    }
                }
                p
            })
            .collect()
    }

    /// Stage a move of the node at `src` to `dst`.
    ///
    /// Cached items below `src` are rewritten immediately. Moving a node that
    /// was only added in this session sends nothing to the backend.
    pub fn move_node(&mut self, src: &str, dst: &str) -> RepositoryResult<()> {
        let src = self.normalize_path(src)?;
        let dst = self.normalize_path(dst)?;
        if path::is_descendant_or_self(&dst, &src) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "cannot move {src} to {dst}"
            )));
        }
        self.get_node_by_path(&src)?;
        if self.objects_by_path.contains_key(&dst) {
            return Err(RepositoryError::ItemExists(dst));
        }

        let persisted = self.rewrite_item_paths(&src, &dst);
        if persisted {
            match self.nodes_move.iter_mut().find(|(s, _)| *s == src) {
                Some(entry) => entry.1 = dst.clone(),
                None => self.nodes_move.push((src.clone(), dst.clone())),
            }
        }
        debug!(src = %src, dst = %dst, elided = !persisted, "staged move");
        Ok(())
    }

    /// Rewrite cached paths, child lists, staged additions and identifier
    /// entries from `src` to `dst`. Returns `false` if the moved node is
    /// itself a pending addition.
    fn rewrite_item_paths(&mut self, src: &str, dst: &str) -> bool {
        if let Some(old_parent) = self.get_cached_node(&path::parent(src)) {
            old_parent.unset_child(path::name(src));
        }
        if let Some(new_parent) = self.get_cached_node(&path::parent(dst)) {
            new_parent.add_child(path::name(dst));
        }

        let moved: Vec<String> = self
            .objects_by_path
            .keys()
            .filter(|p| path::is_descendant_or_self(p, src))
            .cloned()
            .collect();
        for old in moved {
            let (Some(item), Some(new)) = (self.objects_by_path.remove(&old), path::rebase(&old, src, dst))
            else {
                continue;
            };
            item.set_path(new.clone());
            self.objects_by_path.insert(new, item);
        }

        let was_added = self.items_add.contains(src);
        let adds: Vec<String> = self
            .items_add
            .iter()
            .filter(|p| path::is_descendant_or_self(p, src))
            .cloned()
            .collect();
        for old in adds {
            self.items_add.remove(&old);
            if let Some(new) = path::rebase(&old, src, dst) {
                self.items_add.insert(new);
            }
        }

        for p in self.objects_by_uuid.values_mut() {
            if let Some(new) = path::rebase(p, src, dst) {
                *p = new;
            }
        }
        !was_added
    }

    /// Drop a node the backend no longer has, together with its cached
    /// subtree.
    ///
    /// With `keep_changes`, a pending addition or move destination is kept
    /// and `false` is returned. Without it, pending moves into the subtree are
    /// discarded too.
    pub fn purge_disappeared_node(&mut self, p: &str, keep_changes: bool) -> bool {
        let protected = self.items_add.contains(p) || self.nodes_move.iter().any(|(_, dst)| dst == p);
        if keep_changes && protected {
            return false;
        }
        self.evict_subtree(p);
        self.items_add.retain(|a| !path::is_descendant_or_self(a, p));
        if !keep_changes {
            self.nodes_move
                .retain(|(_, dst)| !path::is_descendant_or_self(dst, p));
        }
        debug!(path = p, "purged node");
        true
    }

    fn evict_subtree(&mut self, root: &str) {
        let doomed: Vec<String> = self
            .objects_by_path
            .keys()
            .filter(|k| path::is_descendant_or_self(k, root))
            .cloned()
            .collect();
        for k in doomed {
            if let Some(item) = self.objects_by_path.remove(&k) {
                item.set_deleted();
            }
        }
        self.objects_by_uuid
            .retain(|_, p| !path::is_descendant_or_self(p, root));
    }

    /// Forget a staged addition that turned out to exist in the backend.
    pub(crate) fn discard_add(&mut self, p: &str) {
        self.items_add.remove(p);
        self.objects_by_path.remove(p);
    }

    /// Forget a staged removal.
    pub(crate) fn unstage_removal(&mut self, p: &str) {
        let backend = self.resolve_backend_path(p);
        self.items_remove.remove(p);
        self.items_remove.remove(&backend);
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn has_pending_changes(&self) -> bool {
        !self.items_add.is_empty()
            || !self.items_remove.is_empty()
            || !self.nodes_move.is_empty()
            || self
                .objects_by_path
                .values()
                .any(|i| matches!(i.state(), ItemState::New | ItemState::Modified))
    }

    /// What the next save would send.
    pub fn pending_changes(&self) -> PendingChanges {
        PendingChanges {
            removed: self.items_remove.iter().cloned().collect(),
            moved: self
                .nodes_move
                .iter()
                .map(|(src, dst)| ChangeEntry::new(src.clone(), dst.clone()))
                .collect(),
            added: self.items_add.iter().cloned().collect(),
            modified: self
                .objects_by_path
                .iter()
                .filter(|(_, i)| i.state() == ItemState::Modified)
                .map(|(p, _)| p.clone())
                .collect(),
        }
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// Persist all pending changes.
    pub fn save(&mut self) -> RepositoryResult<()> {
        let own_transaction = !self.user_transaction;
        if own_transaction {
            self.transport
                .begin_transaction()
                .map_err(RepositoryError::Transport)?;
        }
        if let Err(e) = self.dispatch() {
            if own_transaction {
                if let Err(rollback) = self.transport.rollback() {
                    warn!(error = %rollback, "rollback after failed save failed");
                }
            }
            return Err(e);
        }
        if own_transaction {
            self.transport.commit().map_err(RepositoryError::Transport)?;
        }

        let summary = self.pending_changes();
        self.reconcile();
        info!(
            removed = summary.removed.len(),
            moved = summary.moved.len(),
            added = summary.added.len(),
            modified = summary.modified.len(),
            "saved session"
        );
        Ok(())
    }

    fn dispatch(&self) -> RepositoryResult<()> {
        let transport = &self.transport;

        for p in &self.items_remove {
            debug!(path = %p, "delete");
            transport.delete_item(p).map_err(RepositoryError::Transport)?;
        }

        for (src, dst) in &self.nodes_move {
            debug!(src = %src, dst = %dst, "move");
            transport
                .move_node(src, dst)
                .map_err(RepositoryError::Transport)?;
        }

        let mut written: BTreeSet<String> = BTreeSet::new();
        for p in &self.items_add {
            if self.items_add.iter().any(|a| path::is_descendant(p, a)) {
                continue;
            }
            match self.objects_by_path.get(p) {
                Some(Item::Node(node)) => {
                    let write = self.node_write(node);
                    debug!(path = %p, nodes = write.paths().len(), "create node");
                    transport
                        .store_node(&write)
                        .map_err(RepositoryError::Transport)?;
                }
                Some(Item::Property(prop)) => {
                    debug!(path = %p, "create property");
                    transport
                        .store_property(p, &prop.to_record())
                        .map_err(RepositoryError::Transport)?;
                    written.insert(p.clone());
                }
                None => {
                    return Err(RepositoryError::Internal(format!(
                        "{p} is staged for creation but not loaded"
                    )))
                }
            }
        }

        for item in self.objects_by_path.values() {
            let props = match item {
                Item::Node(node) if node.is_modified() => node.modified_properties(),
                Item::Property(prop) if prop.is_modified() => vec![prop.clone()],
                _ => continue,
            };
            for prop in props {
                let p = prop.path();
                if !written.insert(p.clone()) {
                    continue;
                }
                debug!(path = %p, "update property");
                transport
                    .store_property(&p, &prop.to_record())
                    .map_err(RepositoryError::Transport)?;
            }
        }
        Ok(())
    }

    /// A new node and its new descendants as one write.
    fn node_write(&self, node: &NodeRef) -> NodeWrite {
        let node_path = node.path();
        let record = node.to_record();
        let children = record
            .children
            .iter()
            .filter_map(|name| self.get_cached_node(&path::join(&node_path, name)))
            .filter(NodeRef::is_new)
            .map(|child| self.node_write(&child))
            .collect();
        NodeWrite {
            path: node_path,
            record,
            children,
        }
    }

    fn reconcile(&mut self) {
        for item in self.objects_by_path.values() {
            if matches!(item.state(), ItemState::New | ItemState::Modified) {
                item.confirm_saved();
            }
            item.clear_old_path();
        }
        self.objects_by_uuid.clear();
        for (p, item) in &self.objects_by_path {
            if let Some(id) = item.as_node().and_then(NodeRef::identifier) {
                self.objects_by_uuid.insert(id, p.clone());
            }
        }
        self.items_add.clear();
        self.items_remove.clear();
        self.nodes_move.clear();
    }

    // ------------------------------------------------------------------
    // Refresh and teardown
    // ------------------------------------------------------------------

    /// Reload every cached node.
    ///
    /// Without `keep_changes` all pending changes are dropped: new and moved
    /// items are evicted and the rest return to their backend state.
    pub fn refresh(&mut self, keep_changes: bool) -> RepositoryResult<()> {
        if !keep_changes {
            self.items_add.clear();
            self.items_remove.clear();
            self.nodes_move.clear();
            let stale: Vec<String> = self
                .objects_by_path
                .iter()
                .filter(|(_, i)| i.state() == ItemState::New || i.old_path().is_some())
                .map(|(p, _)| p.clone())
                .collect();
            for p in stale {
                if let Some(item) = self.objects_by_path.remove(&p) {
                    item.set_deleted();
                }
            }
        }

        let mut nodes: Vec<String> = self
            .objects_by_path
            .iter()
            .filter(|(_, i)| i.is_node())
            .map(|(p, _)| p.clone())
            .collect();
        nodes.sort_by_key(|p| path::depth(p));
        for p in nodes {
            let Some(node) = self.get_cached_node(&p) else {
                continue;
            };
            if node.is_new() {
                continue;
            }
            node.refresh_internal(self, keep_changes, true)?;
        }
        debug!(keep_changes, cached = self.objects_by_path.len(), "refreshed session");
        Ok(())
    }

    /// Drop the identity map and all pending changes.
    pub fn clear(&mut self) {
        self.objects_by_path.clear();
        self.objects_by_uuid.clear();
        self.items_add.clear();
        self.items_remove.clear();
        self.nodes_move.clear();
    }

    // ------------------------------------------------------------------
    // Binaries and transactions
    // ------------------------------------------------------------------

    /// Content of a binary property, loaded from the backend on first use.
    /// Non-binary values are returned in their string form.
    pub fn binary_content(&mut self, prop: &PropertyRef) -> RepositoryResult<Vec<Bytes>> {
        prop.check_state()?;
        if let Some(value) = prop.value() {
            return Ok(value
                .convert(PropertyType::Binary)?
                .values()
                .iter()
                .map(|v| match v {
                    Value::Binary(b) => b.clone(),
                    other => Bytes::from(other.to_string()),
                })
                .collect());
        }
        let backend = self.resolve_backend_path(&prop.path());
        debug!(path = %backend, "loading binary");
        let content = self.transport.get_binary(&backend)?;
        prop.cache_binary(&content);
        Ok(content)
    }

    /// Mark whether the caller owns a backend transaction. While set, save
    /// neither begins nor commits one.
    pub fn set_user_transaction(&mut self, active: bool) {
        self.user_transaction = active;
    }

    pub fn in_user_transaction(&self) -> bool {
        self.user_transaction
    }
}

impl std::fmt::Debug for ObjectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectManager")
            .field("cached", &self.objects_by_path.len())
            .field("identifiers", &self.objects_by_uuid.len())
            .field("items_add", &self.items_add)
            .field("items_remove", &self.items_remove)
            .field("nodes_move", &self.nodes_move)
            .field("user_transaction", &self.user_transaction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crx_transport::{InMemoryTransport, PropertyRecord, TransportCall, TransportError};
    use crx_types::{BinaryLength, PropertyValue};

    const ID: &str = "0189b1c6-7a2e-7cc0-9b7e-3f1a2b3c4d5e";

    fn fixture() -> Arc<InMemoryTransport> {
        let t = Arc::new(InMemoryTransport::new());
        t.insert_node(
            "/a",
            NodeRecord::new("nt:unstructured")
                .with_property(PropertyRecord::new("title", PropertyType::String, "x")),
        )
        .unwrap();
        t.insert_node("/a/b", NodeRecord::new("nt:unstructured")).unwrap();
        t.insert_node("/a/b/deep", NodeRecord::new("nt:unstructured")).unwrap();
        t.insert_node("/a/c", NodeRecord::new("nt:unstructured")).unwrap();
        t.insert_node(
            "/ref",
            NodeRecord::new("nt:unstructured")
                .with_mixin("mix:referenceable")
                .with_property(PropertyRecord::new("jcr:uuid", PropertyType::String, ID)),
        )
        .unwrap();
        t.insert_node(
            "/file",
            NodeRecord::new("nt:unstructured").with_property(PropertyRecord::new(
                "data",
                PropertyType::Binary,
                Bytes::from_static(b"hello"),
            )),
        )
        .unwrap();
        t
    }

    fn manager() -> (Arc<InMemoryTransport>, ObjectManager) {
        let t = fixture();
        let om = ObjectManager::new(t.clone());
        (t, om)
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    #[test]
    fn normalize_path_resolves_dots() {
        let (_, mut om) = manager();
        assert_eq!(om.normalize_path("/a/./b/../c").unwrap(), "/a/c");
        assert_eq!(om.normalize_path("/a/../../b").unwrap(), "/b");
        assert!(matches!(om.normalize_path(""), Err(RepositoryError::InvalidPath(_))));
        assert!(matches!(om.normalize_path("a/b"), Err(RepositoryError::InvalidPath(_))));
    }

    #[test]
    fn normalize_path_resolves_identifier_references() {
        let (_, mut om) = manager();
        assert_eq!(om.normalize_path(&format!("[{ID}]")).unwrap(), "/ref");
    }

    #[test]
    fn absolute_path_joins_below_root() {
        let (_, om) = manager();
        assert_eq!(om.absolute_path("/", "a/b"), "/a/b");
        assert_eq!(om.absolute_path("/a/", "/b/../c"), "/a/c");
        assert_eq!(om.absolute_path("/a", ""), "/a");
    }

    // ------------------------------------------------------------------
    // Identity map
    // ------------------------------------------------------------------

    #[test]
    fn lookups_return_the_same_instance() {
        let (t, mut om) = manager();
        let first = om.get_node_by_path("/a").unwrap();
        let second = om.get_node_by_path("/a/./b/..").unwrap();
        let third = om.get_node("a", "/").unwrap();
        assert!(first.ptr_eq(&second));
        assert!(first.ptr_eq(&third));
        let fetches = t
            .calls()
            .into_iter()
            .filter(|c| matches!(c, TransportCall::GetNode(_)))
            .count();
        assert_eq!(fetches, 1);
    }

    #[test]
    fn local_writes_are_read_without_transport_calls() {
        let (t, mut om) = manager();
        let a = om.get_node_by_path("/a").unwrap();
        a.set_property(&mut om, "title", Some(PropertyValue::from("y")), None)
            .unwrap();
        t.clear_calls();
        let again = om.get_node_by_path("/a").unwrap();
        assert_eq!(
            om.get_property_by_path("/a/title").unwrap().string().unwrap(),
            "y"
        );
        assert_eq!(again.property(&mut om, "title").unwrap().string().unwrap(), "y");
        assert!(t.calls().is_empty());
    }

    #[test]
    fn added_items_are_read_back_without_transport_calls() {
        let (t, mut om) = manager();
        let staged = NodeRef::new(Node::new_local("/fresh", "nt:unstructured"));
        om.add_item("/fresh", Item::Node(staged.clone())).unwrap();
        let a = om.get_node_by_path("/a").unwrap();
        let n = a.add_node(&mut om, "n", None).unwrap();
        t.clear_calls();

        assert!(om.get_node_by_path("/fresh").unwrap().ptr_eq(&staged));
        let found = om.get_node_by_path("/a/n").unwrap();
        assert!(found.ptr_eq(&n));
        assert!(found.is_new());
        assert!(om.get_node("n", "/a").unwrap().ptr_eq(&n));
        assert!(t.calls().is_empty());
    }

    #[test]
    fn batch_lookup_fetches_misses_once() {
        let (t, mut om) = manager();
        om.get_node_by_path("/a").unwrap();
        t.clear_calls();
        let paths: Vec<String> = ["/a/c", "/a", "/missing", "/a/b"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let nodes = om.get_nodes_by_path(&paths).unwrap();
        let got: Vec<String> = nodes.iter().map(NodeRef::path).collect();
        assert_eq!(got, vec!["/a/c", "/a", "/a/b"]);
        assert_eq!(
            t.calls(),
            vec![TransportCall::GetNodes(vec![
                "/a/c".into(),
                "/missing".into(),
                "/a/b".into()
            ])]
        );
    }

    #[test]
    fn property_lookup_misses_are_path_not_found() {
        let (_, mut om) = manager();
        assert!(matches!(
            om.get_property_by_path("/a/nothing"),
            Err(RepositoryError::PathNotFound(_))
        ));
        assert!(matches!(
            om.get_property_by_path("/nowhere/x"),
            Err(RepositoryError::PathNotFound(_))
        ));
    }

    // ------------------------------------------------------------------
    // Identifiers
    // ------------------------------------------------------------------

    #[test]
    fn identifier_lookup_asks_transport_once() {
        let (t, mut om) = manager();
        let first = om.get_node_by_identifier(ID).unwrap();
        let second = om.get_node(ID, "/a").unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(first.path(), "/ref");
        let lookups = t
            .calls()
            .into_iter()
            .filter(|c| matches!(c, TransportCall::GetNodePathForIdentifier(_)))
            .count();
        assert_eq!(lookups, 1);
    }

    #[test]
    fn identifier_follows_pending_move() {
        let (_, mut om) = manager();
        om.move_node("/ref", "/a/ref").unwrap();
        let node = om.get_node_by_identifier(ID).unwrap();
        assert_eq!(node.path(), "/a/ref");
    }

    #[test]
    fn unknown_identifier_is_item_not_found() {
        let (_, mut om) = manager();
        assert!(matches!(
            om.get_node_by_identifier("00000000-0000-0000-0000-000000000000"),
            Err(RepositoryError::ItemNotFound(_))
        ));
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    #[test]
    fn removal_masks_node_and_descendants() {
        let (t, mut om) = manager();
        let b = om.get_node_by_path("/a/b").unwrap();
        b.remove(&mut om).unwrap();
        t.clear_calls();
        assert!(matches!(om.get_node_by_path("/a/b"), Err(RepositoryError::ItemNotFound(_))));
        assert!(matches!(
            om.get_node_by_path("/a/b/deep"),
            Err(RepositoryError::ItemNotFound(_))
        ));
        assert!(t.calls().is_empty());
        assert!(om.is_item_deleted("/a/b"));
        let a = om.get_node_by_path("/a").unwrap();
        assert_eq!(a.child_names(), vec!["c"]);
    }

    #[test]
    fn removal_requires_loaded_node() {
        let (_, mut om) = manager();
        assert!(matches!(
            om.remove_item("/a", None),
            Err(RepositoryError::Internal(_))
        ));
    }

    #[test]
    fn removing_a_move_destination_ancestor_is_refused() {
        let (_, mut om) = manager();
        om.move_node("/a/c", "/ref/c").unwrap();
        let r = om.get_node_by_path("/ref").unwrap();
        assert!(matches!(r.remove(&mut om), Err(RepositoryError::Internal(_))));
    }

    #[test]
    fn removing_a_move_source_ancestor_is_refused() {
        let (t, mut om) = manager();
        om.move_node("/a/b", "/x").unwrap();
        let a = om.get_node_by_path("/a").unwrap();
        assert!(matches!(a.remove(&mut om), Err(RepositoryError::Internal(_))));
        assert!(!a.is_deleted());
        assert!(om.pending_changes().removed.is_empty());

        t.clear_calls();
        om.save().unwrap();
        assert_eq!(
            t.write_calls(),
            vec![TransportCall::Move {
                src: "/a/b".into(),
                dst: "/x".into()
            }]
        );
        om.get_node_by_path("/a").unwrap().remove(&mut om).unwrap();
        om.save().unwrap();
        assert!(t.peek("/a").is_none());
        assert!(t.peek("/x/deep").is_some());
    }

    #[test]
    fn removing_a_sibling_of_a_move_source_is_allowed() {
        let (t, mut om) = manager();
        om.move_node("/a/b", "/x").unwrap();
        let c = om.get_node_by_path("/a/c").unwrap();
        c.remove(&mut om).unwrap();
        om.save().unwrap();
        assert!(t.peek("/a/c").is_none());
        assert!(t.peek("/x").is_some());
    }

    #[test]
    fn removing_new_node_unstages_it() {
        let (t, mut om) = manager();
        let a = om.get_node_by_path("/a").unwrap();
        let n = a.add_node(&mut om, "n", None).unwrap();
        n.add_node(&mut om, "inner", None).unwrap();
        n.remove(&mut om).unwrap();
        let changes = om.pending_changes();
        assert!(changes.added.is_empty());
        assert!(changes.removed.is_empty());
        t.clear_calls();
        om.save().unwrap();
        assert!(t.write_calls().is_empty());
    }

    // ------------------------------------------------------------------
    // Moves
    // ------------------------------------------------------------------

    #[test]
    fn move_rewrites_paths_and_fetches_at_backend_path() {
        let (t, mut om) = manager();
        let b = om.get_node_by_path("/a/b").unwrap();
        om.move_node("/a/b", "/moved").unwrap();
        assert_eq!(b.path(), "/moved");
        assert_eq!(b.old_path().as_deref(), Some("/a/b"));
        assert!(om.is_node_moved("/a/b"));
        assert!(om.get_node_by_path("/moved").unwrap().ptr_eq(&b));
        assert!(matches!(om.get_node_by_path("/a/b"), Err(RepositoryError::ItemNotFound(_))));

        t.clear_calls();
        let deep = om.get_node_by_path("/moved/deep").unwrap();
        assert_eq!(t.calls(), vec![TransportCall::GetNode("/a/b/deep".into())]);
        assert_eq!(deep.path(), "/moved/deep");
        assert_eq!(deep.old_path().as_deref(), Some("/a/b/deep"));
    }

    #[test]
    fn move_updates_cached_parents() {
        let (_, mut om) = manager();
        let a = om.get_node_by_path("/a").unwrap();
        let r = om.get_node_by_path("/ref").unwrap();
        om.move_node("/a/b", "/ref/b").unwrap();
        assert_eq!(a.child_names(), vec!["c"]);
        assert_eq!(r.child_names(), vec!["b"]);
    }

    #[test]
    fn parent_loaded_after_move_lists_the_moved_child() {
        let (_, mut om) = manager();
        om.move_node("/a/c", "/ref/c").unwrap();
        let r = om.get_node_by_path("/ref").unwrap();
        assert_eq!(r.child_names(), vec!["c"]);
        let a = om.get_node_by_path("/a").unwrap();
        assert_eq!(a.child_names(), vec!["b"]);
    }

    #[test]
    fn chained_moves_resolve_both_ways() {
        let (_, mut om) = manager();
        om.move_node("/a/b", "/x").unwrap();
        om.move_node("/x", "/y").unwrap();
        assert_eq!(om.resolve_backend_path("/y/deep"), "/a/b/deep");
        assert_eq!(om.resolve_local_path("/a/b/deep"), "/y/deep");
        assert!(om.is_path_masked("/x"));
        assert!(om.is_path_masked("/a/b"));
        assert!(!om.is_path_masked("/y"));
    }

    #[test]
    fn moving_a_new_node_is_elided() {
        let (t, mut om) = manager();
        let a = om.get_node_by_path("/a").unwrap();
        let n = a.add_node(&mut om, "n", None).unwrap();
        om.move_node("/a/n", "/n2").unwrap();
        assert_eq!(n.path(), "/n2");
        assert!(om.pending_changes().moved.is_empty());
        assert_eq!(om.pending_changes().added, vec!["/n2"]);

        t.clear_calls();
        om.save().unwrap();
        assert_eq!(t.write_calls(), vec![TransportCall::StoreNode("/n2".into())]);
        assert!(t.peek("/n2").is_some());
    }

    #[test]
    fn move_below_itself_is_refused() {
        let (_, mut om) = manager();
        assert!(matches!(
            om.move_node("/a", "/a/inside"),
            Err(RepositoryError::ConstraintViolation(_))
        ));
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    #[test]
    fn save_orders_delete_move_create_update() {
        let (t, mut om) = manager();
        let a = om.get_node_by_path("/a").unwrap();
        a.set_property(&mut om, "title", Some(PropertyValue::from("y")), None)
            .unwrap();
        let root = om.get_node_by_path("/").unwrap();
        root.add_node(&mut om, "e", None).unwrap();
        om.move_node("/a/c", "/d").unwrap();
        a.node(&mut om, "b").unwrap().remove(&mut om).unwrap();

        t.clear_calls();
        om.save().unwrap();
        assert_eq!(
            t.calls(),
            vec![
                TransportCall::Begin,
                TransportCall::Delete("/a/b".into()),
                TransportCall::Move {
                    src: "/a/c".into(),
                    dst: "/d".into()
                },
                TransportCall::StoreNode("/e".into()),
                TransportCall::StoreProperty("/a/title".into()),
                TransportCall::Commit,
            ]
        );
        assert!(!om.has_pending_changes());
        assert_eq!(a.state(), ItemState::Clean);
        assert!(t.peek("/d").is_some());
        assert!(t.peek("/a/b/deep").is_none());
    }

    #[test]
    fn new_subtree_is_one_write() {
        let (t, mut om) = manager();
        let a = om.get_node_by_path("/a").unwrap();
        let n = a.add_node(&mut om, "n", None).unwrap();
        n.set_property(&mut om, "k", Some(PropertyValue::from(3i64)), None)
            .unwrap();
        let child = n.add_node(&mut om, "child", None).unwrap();
        child
            .set_property(&mut om, "deep", Some(PropertyValue::from(true)), None)
            .unwrap();

        t.clear_calls();
        om.save().unwrap();
        assert_eq!(t.write_calls(), vec![TransportCall::StoreNode("/a/n".into())]);
        let stored = t.peek("/a/n").unwrap();
        assert_eq!(stored.children, vec!["child"]);
        assert!(stored.property("k").is_some());
        assert!(t.peek("/a/n/child").unwrap().property("deep").is_some());
        assert!(!n.is_new());
        assert!(!child.is_new());
    }

    #[test]
    fn failed_save_rolls_back_and_keeps_changes() {
        let (t, mut om) = manager();
        let b = om.get_node_by_path("/a/b").unwrap();
        b.remove(&mut om).unwrap();
        let root = om.get_node_by_path("/").unwrap();
        let e = root.add_node(&mut om, "e", None).unwrap();
        t.fail_next(
            TransportCall::StoreNode("/e".into()),
            TransportError::Backend("disk full".into()),
        )
        .unwrap();

        let err = om.save().unwrap_err();
        assert_eq!(err, RepositoryError::Transport(TransportError::Backend("disk full".into())));
        assert!(t.calls().contains(&TransportCall::Rollback));
        assert!(!t.in_transaction());
        assert!(t.peek("/a/b").is_some());
        assert!(e.is_new());
        assert!(om.has_pending_changes());
        assert!(om.is_item_deleted("/a/b"));

        om.save().unwrap();
        assert!(t.peek("/a/b").is_none());
        assert!(t.peek("/e").is_some());
    }

    #[test]
    fn save_inside_user_transaction_does_not_commit() {
        let (t, mut om) = manager();
        om.set_user_transaction(true);
        let a = om.get_node_by_path("/a").unwrap();
        a.set_property(&mut om, "title", Some(PropertyValue::from("y")), None)
            .unwrap();
        t.clear_calls();
        om.save().unwrap();
        assert_eq!(t.calls(), vec![TransportCall::StoreProperty("/a/title".into())]);
    }

    #[test]
    fn property_removal_is_saved_as_delete() {
        let (t, mut om) = manager();
        let a = om.get_node_by_path("/a").unwrap();
        a.set_property(&mut om, "title", None, None).unwrap();
        t.clear_calls();
        om.save().unwrap();
        assert_eq!(t.write_calls(), vec![TransportCall::Delete("/a/title".into())]);
        assert!(t.peek("/a").unwrap().property("title").is_none());
    }

    #[test]
    fn save_reindexes_assigned_identifiers() {
        let (t, mut om) = manager();
        let a = om.get_node_by_path("/a").unwrap();
        a.add_mixin(&mut om, "mix:referenceable").unwrap();
        let id = a.identifier().unwrap();
        om.save().unwrap();
        let stored = t.peek("/a").unwrap();
        assert_eq!(stored.mixin_types, vec!["mix:referenceable"]);
        assert!(stored.property("jcr:uuid").is_some());
        assert!(om.get_node_by_identifier(&id).unwrap().ptr_eq(&a));
    }

    // ------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------

    #[test]
    fn refresh_without_keep_discards_everything() {
        let (_, mut om) = manager();
        let a = om.get_node_by_path("/a").unwrap();
        let n = a.add_node(&mut om, "n", None).unwrap();
        let c = om.get_node_by_path("/a/c").unwrap();
        om.move_node("/a/c", "/c2").unwrap();
        a.node(&mut om, "b").unwrap().remove(&mut om).unwrap();

        om.refresh(false).unwrap();
        assert!(!om.has_pending_changes());
        assert!(n.is_deleted());
        assert!(c.is_deleted());
        assert_eq!(a.child_names(), vec!["b", "c"]);
        assert_eq!(om.get_node_by_path("/a/c").unwrap().path(), "/a/c");
        assert_eq!(a.state(), ItemState::Clean);
    }

    #[test]
    fn refresh_with_keep_preserves_pending_work() {
        let (t, mut om) = manager();
        let a = om.get_node_by_path("/a").unwrap();
        let n = a.add_node(&mut om, "n", None).unwrap();
        t.insert_node("/a/remote", NodeRecord::new("nt:unstructured"))
            .unwrap();
        om.refresh(true).unwrap();
        assert!(n.is_new());
        assert_eq!(a.child_names(), vec!["b", "c", "remote", "n"]);
        assert!(om.has_pending_changes());
    }

    // ------------------------------------------------------------------
    // Binaries
    // ------------------------------------------------------------------

    #[test]
    fn binaries_load_on_first_access() {
        let (t, mut om) = manager();
        let data = om.get_property_by_path("/file/data").unwrap();
        assert!(data.is_length_only());
        assert_eq!(data.length(), BinaryLength::Single(5));
        t.clear_calls();
        let content = data.binary(&mut om).unwrap();
        assert_eq!(content, vec![Bytes::from_static(b"hello")]);
        assert_eq!(t.calls(), vec![TransportCall::GetBinary("/file/data".into())]);
        t.clear_calls();
        data.binary(&mut om).unwrap();
        assert!(t.calls().is_empty());
        assert_eq!(data.string().unwrap(), "hello");
    }

    #[test]
    fn non_binary_values_read_as_bytes() {
        let (_, mut om) = manager();
        let title = om.get_property_by_path("/a/title").unwrap();
        assert_eq!(title.binary(&mut om).unwrap(), vec![Bytes::from_static(b"x")]);
    }
}
