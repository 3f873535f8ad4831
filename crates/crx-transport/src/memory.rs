//! In-memory transport for tests, fixtures and ephemeral use.
//!
//! [`InMemoryTransport`] keeps every workspace as a path-keyed map of
//! [`NodeRecord`]s behind a `RwLock`. Binary properties are stored with full
//! content but served length-only, so sessions exercise lazy binary loading.
//!
//! Besides implementing [`Transport`], it records every call it receives
//! ([`TransportCall`]), can fail a chosen call once ([`fail_next`]), and loads
//! and dumps JSON fixtures.
//!
//! [`fail_next`]: InMemoryTransport::fail_next

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use crx_types::path;
use crx_types::{BinaryLength, PropertyType, PropertyValue, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};
use crate::node_type::{builtin_node_types, NodeTypeDefinition};
use crate::query::{Query, QueryRow};
use crate::record::{NodeRecord, NodeWrite, PropertyRecord, RecordValue};
use crate::traits::{Credentials, Transport};

/// Workspace used when none is named.
pub const DEFAULT_WORKSPACE: &str = "default";

const PRIMARY_TYPE: &str = "jcr:primaryType";
const MIXIN_TYPES: &str = "jcr:mixinTypes";
const UUID: &str = "jcr:uuid";

/// A call received by an [`InMemoryTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportCall {
    Login(String),
    Logout,
    CreateWorkspace(String),
    GetNode(String),
    GetNodes(Vec<String>),
    GetNodePathForIdentifier(String),
    GetBinary(String),
    StoreNode(String),
    StoreProperty(String),
    Delete(String),
    Move { src: String, dst: String },
    Begin,
    Commit,
    Rollback,
    GetNodeTypes(Vec<String>),
    Query(String),
    Namespaces,
    RegisterNamespace(String),
    UnregisterNamespace(String),
}

impl TransportCall {
    /// Returns `true` for calls that change stored content.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            TransportCall::StoreNode(_)
                | TransportCall::StoreProperty(_)
                | TransportCall::Delete(_)
                | TransportCall::Move { .. }
        )
    }
}

type Workspace = BTreeMap<String, NodeRecord>;

fn empty_workspace() -> Workspace {
    let mut nodes = BTreeMap::new();
    nodes.insert(path::ROOT.to_string(), NodeRecord::new("rep:root"));
    nodes
}

fn builtin_namespaces() -> BTreeMap<String, String> {
    [
        ("", ""),
        ("jcr", "http://www.jcp.org/jcr/1.0"),
        ("nt", "http://www.jcp.org/jcr/nt/1.0"),
        ("mix", "http://www.jcp.org/jcr/mix/1.0"),
        ("xml", "http://www.w3.org/XML/1998/namespace"),
        ("rep", "internal"),
    ]
    .into_iter()
    .map(|(p, u)| (p.to_string(), u.to_string()))
    .collect()
}

#[derive(Debug)]
struct Inner {
    workspaces: BTreeMap<String, Workspace>,
    active: String,
    snapshot: Option<Workspace>,
    namespaces: BTreeMap<String, String>,
    node_types: Vec<NodeTypeDefinition>,
    queries: BTreeMap<String, Vec<QueryRow>>,
    calls: Vec<TransportCall>,
    failures: Vec<(TransportCall, TransportError)>,
}

impl Inner {
    /// Record `call`, returning the injected failure for it if one is armed.
    fn record(&mut self, call: TransportCall) -> TransportResult<()> {
        let armed = self.failures.iter().position(|(c, _)| *c == call);
        self.calls.push(call);
        match armed {
            Some(i) => Err(self.failures.remove(i).1),
            None => Ok(()),
        }
    }

    fn nodes(&self) -> TransportResult<&Workspace> {
        self.workspaces
            .get(&self.active)
            .ok_or_else(|| TransportError::NoSuchWorkspace(self.active.clone()))
    }

    fn nodes_mut(&mut self) -> TransportResult<&mut Workspace> {
        let active = self.active.clone();
        self.workspaces
            .get_mut(&active)
            .ok_or(TransportError::NoSuchWorkspace(active))
    }
}

/// An in-memory implementation of [`Transport`].
///
/// The transport is shared by all sessions that log into it; `login` selects
/// the workspace every subsequent call works on.
pub struct InMemoryTransport {
    inner: RwLock<Inner>,
    transactions: bool,
}

impl InMemoryTransport {
    /// Create a transport with one empty default workspace.
    pub fn new() -> Self {
        let mut workspaces = BTreeMap::new();
        workspaces.insert(DEFAULT_WORKSPACE.to_string(), empty_workspace());
        Self {
            inner: RwLock::new(Inner {
                workspaces,
                active: DEFAULT_WORKSPACE.to_string(),
                snapshot: None,
                namespaces: builtin_namespaces(),
                node_types: builtin_node_types(),
                queries: BTreeMap::new(),
                calls: Vec::new(),
                failures: Vec::new(),
            }),
            transactions: true,
        }
    }

    /// Builder-style: report no transaction support.
    pub fn without_transactions(mut self) -> Self {
        self.transactions = false;
        self
    }

    fn read(&self) -> TransportResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| TransportError::Backend(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> TransportResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| TransportError::Backend(format!("lock poisoned: {e}")))
    }

    // ------------------------------------------------------------------
    // Test and fixture helpers (not recorded as calls)
    // ------------------------------------------------------------------

    /// Insert a node below an existing parent, appending it to the parent's
    /// child list. Replaces an existing record at `path`.
    pub fn insert_node(&self, path: &str, record: NodeRecord) -> TransportResult<()> {
        let mut inner = self.write()?;
        let nodes = inner.nodes_mut()?;
        insert_into(nodes, path, record)
    }

    /// The stored record at `path`, with binary content inline.
    pub fn peek(&self, path: &str) -> Option<NodeRecord> {
        self.read().ok()?.nodes().ok()?.get(path).cloned()
    }

    /// Paths of all nodes in the active workspace, sorted.
    pub fn paths(&self) -> Vec<String> {
        let Ok(inner) = self.read() else {
            return Vec::new();
        };
        inner
            .nodes()
            .map(|n| n.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Register a node type definition, replacing one with the same name.
    pub fn register_node_type(&self, definition: NodeTypeDefinition) -> TransportResult<()> {
        let mut inner = self.write()?;
        inner.node_types.retain(|t| t.name != definition.name);
        inner.node_types.push(definition);
        Ok(())
    }

    /// Serve `rows` for every query with exactly this statement.
    pub fn add_query_result(&self, statement: &str, rows: Vec<QueryRow>) -> TransportResult<()> {
        self.write()?.queries.insert(statement.to_string(), rows);
        Ok(())
    }

    /// Fail the next call equal to `call` with `error`. The call is still
    /// recorded. Each armed failure fires once.
    pub fn fail_next(&self, call: TransportCall, error: TransportError) -> TransportResult<()> {
        self.write()?.failures.push((call, error));
        Ok(())
    }

    /// All calls received so far, oldest first.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.read().map(|i| i.calls.clone()).unwrap_or_default()
    }

    /// Only the content-changing calls received so far.
    pub fn write_calls(&self) -> Vec<TransportCall> {
        self.calls().into_iter().filter(TransportCall::is_write).collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut inner) = self.write() {
            inner.calls.clear();
        }
    }

    /// Returns `true` while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.read().map(|i| i.snapshot.is_some()).unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    /// Load a single-workspace fixture.
    ///
    /// Nodes whose parent is missing are skipped, as are length-only
    /// property values. Child lists are reconciled with the nodes present:
    /// unknown names are dropped, unlisted children are appended.
    pub fn from_fixture_json(json: &str) -> TransportResult<Self> {
        let fixture: Fixture = serde_json::from_str(json)?;

        let mut candidates: Vec<(String, NodeRecord)> = fixture
            .nodes
            .into_iter()
            .map(|(p, r)| (path::normalize(&p), r))
            .collect();
        candidates.sort_by_key(|(p, _)| path::depth(p));

        let mut nodes: Workspace = BTreeMap::new();
        for (node_path, mut record) in candidates {
            if !path::is_absolute(&node_path) {
                warn!(path = %node_path, "skipping fixture node with relative path");
                continue;
            }
            if node_path != path::ROOT && !nodes.contains_key(&path::parent(&node_path)) {
                warn!(path = %node_path, "skipping fixture node without parent");
                continue;
            }
            record.properties.retain(|p| {
                if p.value.is_length_only() {
                    warn!(path = %node_path, property = %p.name, "skipping length-only fixture value");
                    false
                } else {
                    true
                }
            });
            nodes.insert(node_path, record);
        }
        nodes
            .entry(path::ROOT.to_string())
            .or_insert_with(|| NodeRecord::new("rep:root"));

        let all: BTreeSet<String> = nodes.keys().cloned().collect();
        for (node_path, record) in nodes.iter_mut() {
            let present: Vec<String> = all
                .iter()
                .filter(|p| p.as_str() != path::ROOT && path::parent(p) == *node_path)
                .map(|p| path::name(p).to_string())
                .collect();
            record.children.retain(|name| {
                let keep = present.contains(name);
                if !keep {
                    warn!(path = %node_path, child = %name, "dropping unknown fixture child");
                }
                keep
            });
            record.children.dedup();
            for name in present {
                if !record.children.contains(&name) {
                    record.children.push(name);
                }
            }
        }

        let transport = Self::new();
        {
            let mut inner = transport.write()?;
            inner.workspaces.clear();
            inner.workspaces.insert(fixture.workspace.clone(), nodes);
            inner.active = fixture.workspace;
            inner.namespaces.extend(fixture.namespaces);
            inner.queries = fixture.queries;
        }
        debug!(nodes = transport.paths().len(), "loaded fixture");
        Ok(transport)
    }

    /// Dump the active workspace as a fixture.
    pub fn to_fixture_json(&self) -> TransportResult<String> {
        let inner = self.read()?;
        let builtin = builtin_namespaces();
        let fixture = Fixture {
            workspace: inner.active.clone(),
            nodes: inner.nodes()?.clone(),
            namespaces: inner
                .namespaces
                .iter()
                .filter(|(p, _)| !builtin.contains_key(*p))
                .map(|(p, u)| (p.clone(), u.clone()))
                .collect(),
            queries: inner.queries.clone(),
        };
        Ok(serde_json::to_string_pretty(&fixture)?)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (active, count) = self
            .read()
            .map(|i| (i.active.clone(), i.nodes().map(|n| n.len()).unwrap_or(0)))
            .unwrap_or_default();
        f.debug_struct("InMemoryTransport")
            .field("workspace", &active)
            .field("node_count", &count)
            .field("transactions", &self.transactions)
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct Fixture {
    #[serde(default = "default_workspace")]
    workspace: String,
    nodes: BTreeMap<String, NodeRecord>,
    #[serde(default)]
    namespaces: BTreeMap<String, String>,
    #[serde(default)]
    queries: BTreeMap<String, Vec<QueryRow>>,
}

fn default_workspace() -> String {
    DEFAULT_WORKSPACE.to_string()
}

// ----------------------------------------------------------------------
// Tree helpers
// ----------------------------------------------------------------------

fn insert_into(nodes: &mut Workspace, node_path: &str, record: NodeRecord) -> TransportResult<()> {
    if node_path != path::ROOT {
        let parent = nodes
            .get_mut(&path::parent(node_path))
            .ok_or_else(|| TransportError::ItemNotFound(path::parent(node_path)))?;
        let name = path::name(node_path).to_string();
        if !parent.children.contains(&name) {
            parent.children.push(name);
        }
    }
    nodes.insert(node_path.to_string(), record);
    Ok(())
}

fn subtree_paths(nodes: &Workspace, root: &str) -> Vec<String> {
    nodes
        .keys()
        .filter(|p| path::is_descendant_or_self(p, root))
        .cloned()
        .collect()
}

fn identifier_of(record: &NodeRecord) -> Option<&str> {
    match &record.property(UUID)?.value {
        RecordValue::Inline(v) => v.as_str(),
        RecordValue::LengthOnly(_) => None,
    }
}

/// Find a REFERENCE property outside the subtree at `root` that points into it.
fn find_referrer(nodes: &Workspace, root: &str) -> Option<(String, String)> {
    let targets: BTreeMap<&str, &str> = nodes
        .iter()
        .filter(|(p, _)| path::is_descendant_or_self(p, root))
        .filter_map(|(p, r)| identifier_of(r).map(|id| (id, p.as_str())))
        .collect();
    if targets.is_empty() {
        return None;
    }
    for (node_path, record) in nodes {
        if path::is_descendant_or_self(node_path, root) {
            continue;
        }
        for prop in &record.properties {
            if prop.property_type != PropertyType::Reference {
                continue;
            }
            if let RecordValue::Inline(value) = &prop.value {
                for v in value.values() {
                    if let Some(target) = v.as_str().and_then(|id| targets.get(id)) {
                        return Some((
                            target.to_string(),
                            path::join(node_path, &prop.name),
                        ));
                    }
                }
            }
        }
    }
    None
}

fn length_only(property: &PropertyRecord) -> PropertyRecord {
    let lengths = match &property.value {
        RecordValue::Inline(PropertyValue::Single(v)) => BinaryLength::Single(binary_len(v)),
        RecordValue::Inline(PropertyValue::Multiple(vs)) => {
            BinaryLength::Multiple(vs.iter().map(binary_len).collect())
        }
        RecordValue::LengthOnly(l) => l.clone(),
    };
    PropertyRecord::length_only(property.name.clone(), lengths)
}

fn binary_len(value: &Value) -> u64 {
    match value {
        Value::Binary(b) => b.len() as u64,
        other => other.to_string().len() as u64,
    }
}

fn binary_content(value: &Value) -> Bytes {
    match value {
        Value::Binary(b) => b.clone(),
        other => Bytes::from(other.to_string()),
    }
}

fn served(record: &NodeRecord) -> NodeRecord {
    let mut out = record.clone();
    for prop in out.properties.iter_mut() {
        if prop.property_type == PropertyType::Binary {
            *prop = length_only(prop);
        }
    }
    out
}

fn store_write(nodes: &mut Workspace, write: &NodeWrite) -> TransportResult<()> {
    if nodes.contains_key(&write.path) {
        return Err(TransportError::ItemExists(write.path.clone()));
    }
    if write.record.properties.iter().any(|p| p.value.is_length_only()) {
        return Err(TransportError::ConstraintViolation(format!(
            "{} carries a binary without content",
            write.path
        )));
    }
    let mut record = write.record.clone();
    record.children.clear();
    insert_into(nodes, &write.path, record)?;
    for child in &write.children {
        store_write(nodes, child)?;
    }
    Ok(())
}

impl Transport for InMemoryTransport {
    fn login(&self, credentials: &Credentials, workspace: &str) -> TransportResult<String> {
        let mut inner = self.write()?;
        inner.record(TransportCall::Login(workspace.to_string()))?;
        if !inner.workspaces.contains_key(workspace) {
            return Err(TransportError::NoSuchWorkspace(workspace.to_string()));
        }
        inner.active = workspace.to_string();
        debug!(user = %credentials.user_id, workspace, "login");
        Ok(workspace.to_string())
    }

    fn logout(&self) -> TransportResult<()> {
        self.write()?.record(TransportCall::Logout)
    }

    fn create_workspace(&self, name: &str) -> TransportResult<()> {
        let mut inner = self.write()?;
        inner.record(TransportCall::CreateWorkspace(name.to_string()))?;
        if inner.workspaces.contains_key(name) {
            return Err(TransportError::ItemExists(name.to_string()));
        }
        inner.workspaces.insert(name.to_string(), empty_workspace());
        Ok(())
    }

    fn get_node(&self, path: &str) -> TransportResult<NodeRecord> {
        let mut inner = self.write()?;
        inner.record(TransportCall::GetNode(path.to_string()))?;
        inner
            .nodes()?
            .get(path)
            .map(served)
            .ok_or_else(|| TransportError::ItemNotFound(path.to_string()))
    }

    fn get_nodes(&self, paths: &[String]) -> TransportResult<BTreeMap<String, NodeRecord>> {
        let mut inner = self.write()?;
        inner.record(TransportCall::GetNodes(paths.to_vec()))?;
        let nodes = inner.nodes()?;
        Ok(paths
            .iter()
            .filter_map(|p| nodes.get(p).map(|r| (p.clone(), served(r))))
            .collect())
    }

    fn get_node_path_for_identifier(&self, identifier: &str) -> TransportResult<String> {
        let mut inner = self.write()?;
        inner.record(TransportCall::GetNodePathForIdentifier(identifier.to_string()))?;
        inner
            .nodes()?
            .iter()
            .find(|(_, r)| identifier_of(r) == Some(identifier))
            .map(|(p, _)| p.clone())
            .ok_or_else(|| TransportError::ItemNotFound(identifier.to_string()))
    }

    fn get_binary(&self, property_path: &str) -> TransportResult<Vec<Bytes>> {
        let mut inner = self.write()?;
        inner.record(TransportCall::GetBinary(property_path.to_string()))?;
        let not_found = || TransportError::ItemNotFound(property_path.to_string());
        let record = inner
            .nodes()?
            .get(&path::parent(property_path))
            .ok_or_else(not_found)?;
        let prop = record.property(path::name(property_path)).ok_or_else(not_found)?;
        if prop.property_type != PropertyType::Binary {
            return Err(TransportError::ConstraintViolation(format!(
                "{property_path} is not a binary property"
            )));
        }
        match &prop.value {
            RecordValue::Inline(v) => Ok(v.values().iter().map(binary_content).collect()),
            RecordValue::LengthOnly(_) => Err(TransportError::Backend(format!(
                "{property_path} has no stored content"
            ))),
        }
    }

    fn store_node(&self, node: &NodeWrite) -> TransportResult<()> {
        let mut inner = self.write()?;
        inner.record(TransportCall::StoreNode(node.path.clone()))?;
        store_write(inner.nodes_mut()?, node)?;
        debug!(path = %node.path, nodes = node.paths().len(), "stored node");
        Ok(())
    }

    fn store_property(&self, property_path: &str, property: &PropertyRecord) -> TransportResult<()> {
        let mut inner = self.write()?;
        inner.record(TransportCall::StoreProperty(property_path.to_string()))?;
        let parent_path = path::parent(property_path);
        let record = inner
            .nodes_mut()?
            .get_mut(&parent_path)
            .ok_or_else(|| TransportError::ItemNotFound(parent_path.clone()))?;

        let names = |v: &RecordValue| -> Vec<String> {
            match v {
                RecordValue::Inline(v) => v.values().iter().map(ToString::to_string).collect(),
                RecordValue::LengthOnly(_) => Vec::new(),
            }
        };
        match property.name.as_str() {
            PRIMARY_TYPE => {
                if let Some(name) = names(&property.value).into_iter().next() {
                    record.primary_type = name;
                }
                return Ok(());
            }
            MIXIN_TYPES => {
                record.mixin_types = names(&property.value);
                return Ok(());
            }
            _ => {}
        }

        let existing = record.properties.iter().position(|p| p.name == property.name);
        match (existing, property.value.is_length_only()) {
            (Some(i), true) if record.properties[i].property_type == PropertyType::Binary => {}
            (_, true) => {
                return Err(TransportError::ConstraintViolation(format!(
                    "{property_path} carries a binary without content"
                )));
            }
            (Some(i), false) => record.properties[i] = property.clone(),
            (None, false) => record.properties.push(property.clone()),
        }
        Ok(())
    }

    fn delete_item(&self, item_path: &str) -> TransportResult<()> {
        let mut inner = self.write()?;
        inner.record(TransportCall::Delete(item_path.to_string()))?;
        if item_path == path::ROOT {
            return Err(TransportError::ConstraintViolation(
                "cannot delete the root node".to_string(),
            ));
        }
        let nodes = inner.nodes_mut()?;
        if nodes.contains_key(item_path) {
            if let Some((target, referrer)) = find_referrer(nodes, item_path) {
                return Err(TransportError::ReferentialIntegrity {
                    path: target,
                    referrer,
                });
            }
            for p in subtree_paths(nodes, item_path) {
                nodes.remove(&p);
            }
            let name = path::name(item_path);
            if let Some(parent) = nodes.get_mut(&path::parent(item_path)) {
                parent.children.retain(|c| c != name);
            }
            return Ok(());
        }
        let name = path::name(item_path);
        let parent = nodes
            .get_mut(&path::parent(item_path))
            .ok_or_else(|| TransportError::ItemNotFound(item_path.to_string()))?;
        let before = parent.properties.len();
        parent.properties.retain(|p| p.name != name);
        if parent.properties.len() == before {
            return Err(TransportError::ItemNotFound(item_path.to_string()));
        }
        Ok(())
    }

    fn move_node(&self, src: &str, dst: &str) -> TransportResult<()> {
        let mut inner = self.write()?;
        inner.record(TransportCall::Move {
            src: src.to_string(),
            dst: dst.to_string(),
        })?;
        let nodes = inner.nodes_mut()?;
        if !nodes.contains_key(src) {
            return Err(TransportError::ItemNotFound(src.to_string()));
        }
        if nodes.contains_key(dst) {
            return Err(TransportError::ItemExists(dst.to_string()));
        }
        if path::is_descendant_or_self(dst, src) {
            return Err(TransportError::ConstraintViolation(format!(
                "cannot move {src} below itself"
            )));
        }
        let dst_parent = path::parent(dst);
        if !nodes.contains_key(&dst_parent) {
            return Err(TransportError::ItemNotFound(dst_parent));
        }

        for old in subtree_paths(nodes, src) {
            if let (Some(record), Some(new)) = (nodes.remove(&old), path::rebase(&old, src, dst)) {
                nodes.insert(new, record);
            }
        }
        let src_name = path::name(src);
        if let Some(parent) = nodes.get_mut(&path::parent(src)) {
            parent.children.retain(|c| c != src_name);
        }
        if let Some(parent) = nodes.get_mut(&dst_parent) {
            parent.children.push(path::name(dst).to_string());
        }
        Ok(())
    }

    fn supports_transactions(&self) -> bool {
        self.transactions
    }

    fn begin_transaction(&self) -> TransportResult<()> {
        let mut inner = self.write()?;
        inner.record(TransportCall::Begin)?;
        if !self.transactions {
            return Ok(());
        }
        if inner.snapshot.is_some() {
            return Err(TransportError::Transaction(
                "transaction already open".to_string(),
            ));
        }
        inner.snapshot = Some(inner.nodes()?.clone());
        Ok(())
    }

    fn commit(&self) -> TransportResult<()> {
        let mut inner = self.write()?;
        inner.record(TransportCall::Commit)?;
        if !self.transactions {
            return Ok(());
        }
        inner
            .snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| TransportError::Transaction("no open transaction".to_string()))
    }

    fn rollback(&self) -> TransportResult<()> {
        let mut inner = self.write()?;
        inner.record(TransportCall::Rollback)?;
        if !self.transactions {
            return Ok(());
        }
        let snapshot = inner
            .snapshot
            .take()
            .ok_or_else(|| TransportError::Transaction("no open transaction".to_string()))?;
        *inner.nodes_mut()? = snapshot;
        Ok(())
    }

    fn get_node_types(&self, names: &[String]) -> TransportResult<Vec<NodeTypeDefinition>> {
        let mut inner = self.write()?;
        inner.record(TransportCall::GetNodeTypes(names.to_vec()))?;
        Ok(inner
            .node_types
            .iter()
            .filter(|t| names.is_empty() || names.contains(&t.name))
            .cloned()
            .collect())
    }

    fn query(&self, query: &Query) -> TransportResult<Vec<QueryRow>> {
        let mut inner = self.write()?;
        inner.record(TransportCall::Query(query.statement.clone()))?;
        let rows = inner.queries.get(&query.statement).cloned().unwrap_or_default();
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    fn namespaces(&self) -> TransportResult<BTreeMap<String, String>> {
        let mut inner = self.write()?;
        inner.record(TransportCall::Namespaces)?;
        Ok(inner.namespaces.clone())
    }

    fn register_namespace(&self, prefix: &str, uri: &str) -> TransportResult<()> {
        let mut inner = self.write()?;
        inner.record(TransportCall::RegisterNamespace(prefix.to_string()))?;
        if builtin_namespaces().contains_key(prefix) || prefix.to_lowercase().starts_with("xml") {
            return Err(TransportError::ConstraintViolation(format!(
                "namespace prefix {prefix} is reserved"
            )));
        }
        if inner.namespaces.iter().any(|(p, u)| u == uri && p != prefix) {
            return Err(TransportError::ConstraintViolation(format!(
                "namespace {uri} is already registered"
            )));
        }
        inner.namespaces.insert(prefix.to_string(), uri.to_string());
        Ok(())
    }

    fn unregister_namespace(&self, prefix: &str) -> TransportResult<()> {
        let mut inner = self.write()?;
        inner.record(TransportCall::UnregisterNamespace(prefix.to_string()))?;
        if builtin_namespaces().contains_key(prefix) {
            return Err(TransportError::ConstraintViolation(format!(
                "namespace prefix {prefix} is reserved"
            )));
        }
        inner
            .namespaces
            .remove(prefix)
            .map(|_| ())
            .ok_or_else(|| TransportError::ItemNotFound(prefix.to_string()))
    }
}
