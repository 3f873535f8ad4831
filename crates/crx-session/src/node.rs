//! Nodes and their handles.
//!
//! A [`NodeRef`] is a cheap, clonable handle to a node owned by the
//! session's [`ObjectManager`]. Operations that may load other items or
//! stage changes take the manager explicitly.
//!
//! # State machine
//!
//! Nodes share the [`ItemState`] lifecycle with properties. Loading a node
//! yields `Clean`; the first local change makes it `Modified`; `add_node`
//! produces `New` children; `remove` and backend disappearance end in
//! `Deleted`. A refresh without keeping changes returns a loaded node to
//! `Clean`.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use crx_transport::{NodeRecord, NodeTypeDefinition, PropertyRecord, TransportError};
use crx_types::path;
use crx_types::{filter_names, NameFilter, PropertyType, PropertyValue, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RepositoryError, RepositoryResult};
use crate::item::{Item, ItemCore, ItemState};
use crate::object_manager::ObjectManager;
use crate::property::{Property, PropertyRef};

/// Property exposing the primary node type.
pub const PRIMARY_TYPE: &str = "jcr:primaryType";
/// Property exposing the mixin node types.
pub const MIXIN_TYPES: &str = "jcr:mixinTypes";
/// Property holding the identifier of a referenceable node.
pub const UUID: &str = "jcr:uuid";

const ROOT_TYPE: &str = "rep:root";
const REFERENCEABLE: &str = "mix:referenceable";

fn is_type_property(name: &str) -> bool {
    name == PRIMARY_TYPE || name == MIXIN_TYPES
}

fn primary_type_record(primary_type: &str) -> PropertyRecord {
    PropertyRecord::new(PRIMARY_TYPE, PropertyType::Name, primary_type)
}

fn mixin_types_record(mixins: &[String]) -> PropertyRecord {
    PropertyRecord::new(
        MIXIN_TYPES,
        PropertyType::Name,
        PropertyValue::Multiple(mixins.iter().map(|m| Value::from(m.as_str())).collect()),
    )
}

fn loaded_value(om: &mut ObjectManager, property: &PropertyRef) -> RepositoryResult<PropertyValue> {
    if let Some(value) = property.value() {
        return Ok(value);
    }
    property.binary(om)?;
    property.value().ok_or_else(|| {
        RepositoryError::Internal(format!("binary content of {} was not cached", property.path()))
    })
}

/// A property value as returned by [`NodeRef::property_values`].
///
/// When dereferencing, REFERENCE, WEAKREFERENCE and PATH values resolve to
/// the nodes they point at.
#[derive(Clone, Debug)]
pub enum PropertyContent {
    Value(PropertyValue),
    Node(NodeRef),
    Nodes(Vec<NodeRef>),
}

impl PropertyContent {
    pub fn as_value(&self) -> Option<&PropertyValue> {
        match self {
            PropertyContent::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// A content node.
#[derive(Debug)]
pub struct Node {
    core: ItemCore,
    primary_type: String,
    mixin_types: Vec<String>,
    properties: BTreeMap<String, PropertyRef>,
    /// Removed locally, not yet saved.
    deleted_properties: BTreeMap<String, PropertyRef>,
    /// Child names in document order.
    nodes: Vec<String>,
    index: usize,
}

impl Node {
    /// Build a node from a backend record.
    ///
    /// Children that are locally removed or moved away are left out;
    /// children moved here by pending moves are appended.
    pub(crate) fn from_record(om: &ObjectManager, node_path: &str, record: &NodeRecord) -> Self {
        let mut properties = BTreeMap::new();
        let mut type_records = vec![primary_type_record(&record.primary_type)];
        if !record.mixin_types.is_empty() {
            type_records.push(mixin_types_record(&record.mixin_types));
        }
        for rec in type_records.iter().chain(
            record
                .properties
                .iter()
                .filter(|p| !is_type_property(&p.name)),
        ) {
            properties.insert(
                rec.name.clone(),
                PropertyRef::new(Property::from_record(node_path, rec)),
            );
        }

        let mut nodes: Vec<String> = Vec::new();
        for name in &record.children {
            let child = path::join(node_path, name);
            if !om.is_path_masked(&child) && !nodes.contains(name) {
                nodes.push(name.clone());
            }
        }
        for name in om.moved_in_children(node_path) {
            if !nodes.contains(&name) {
                nodes.push(name);
            }
        }

        Self {
            core: ItemCore::new(node_path, ItemState::Clean),
            primary_type: record.primary_type.clone(),
            mixin_types: record.mixin_types.clone(),
            properties,
            deleted_properties: BTreeMap::new(),
            nodes,
            index: 1,
        }
    }

    /// A node created in this session.
    pub(crate) fn new_local(node_path: &str, primary_type: &str) -> Self {
        let mut properties = BTreeMap::new();
        let mut primary = Property::from_record(node_path, &primary_type_record(primary_type));
        primary.mark_new();
        properties.insert(PRIMARY_TYPE.to_string(), PropertyRef::new(primary));
        Self {
            core: ItemCore::new(node_path, ItemState::New),
            primary_type: primary_type.to_string(),
            mixin_types: Vec::new(),
            properties,
            deleted_properties: BTreeMap::new(),
            nodes: Vec::new(),
            index: 1,
        }
    }

    pub(crate) fn set_old_path(&mut self, old_path: Option<String>) {
        self.core.set_old_path(old_path);
    }
}

/// Shared handle to a [`Node`].
///
/// Handles compare by identity: the identity map guarantees one node
/// instance per path, so [`ptr_eq`](Self::ptr_eq) tells whether two lookups
/// returned the same node.
#[derive(Clone)]
pub struct NodeRef(Rc<RefCell<Node>>);

impl NodeRef {
    pub(crate) fn new(node: Node) -> Self {
        Self(Rc::new(RefCell::new(node)))
    }

    fn borrow(&self) -> Ref<'_, Node> {
        self.0.borrow()
    }

    fn borrow_mut(&self) -> RefMut<'_, Node> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn path(&self) -> String {
        self.borrow().core.path().to_string()
    }

    pub fn name(&self) -> String {
        path::name(self.borrow().core.path()).to_string()
    }

    /// Backend path before the first unsaved move, if any.
    pub fn old_path(&self) -> Option<String> {
        self.borrow().core.old_path().map(str::to_string)
    }

    pub fn state(&self) -> ItemState {
        self.borrow().core.state()
    }

    pub fn is_new(&self) -> bool {
        self.state() == ItemState::New
    }

    pub fn is_modified(&self) -> bool {
        self.state() == ItemState::Modified
    }

    pub fn is_deleted(&self) -> bool {
        self.state() == ItemState::Deleted
    }

    pub fn primary_type(&self) -> String {
        self.borrow().primary_type.clone()
    }

    pub fn mixin_types(&self) -> Vec<String> {
        self.borrow().mixin_types.clone()
    }

    /// Same-name sibling index. Always 1.
    pub fn index(&self) -> usize {
        self.borrow().index
    }

    /// The `jcr:uuid` value of a referenceable node.
    pub fn identifier(&self) -> Option<String> {
        let node = self.borrow();
        let prop = node.properties.get(UUID)?;
        prop.value()?.as_str().map(str::to_string)
    }

    /// Child names in document order.
    pub fn child_names(&self) -> Vec<String> {
        self.borrow().nodes.clone()
    }

    pub fn property_names(&self) -> Vec<String> {
        self.borrow().properties.keys().cloned().collect()
    }

    pub fn has_nodes(&self) -> bool {
        !self.borrow().nodes.is_empty()
    }

    pub fn has_properties(&self) -> bool {
        !self.borrow().properties.is_empty()
    }

    fn check_state(&self) -> RepositoryResult<()> {
        self.borrow().core.check_state()
    }

    fn set_modified(&self) -> RepositoryResult<()> {
        self.borrow_mut().core.set_modified()
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// The node at `rel_path` relative to this node.
    pub fn node(&self, om: &mut ObjectManager, rel_path: &str) -> RepositoryResult<NodeRef> {
        self.check_state()?;
        let target = om.absolute_path(&self.path(), rel_path);
        om.get_node_by_path(&target)
            .map_err(RepositoryError::into_path_not_found)
    }

    /// Children whose names pass `filter`, in document order.
    pub fn nodes(
        &self,
        om: &mut ObjectManager,
        filter: Option<&NameFilter>,
    ) -> RepositoryResult<Vec<NodeRef>> {
        self.check_state()?;
        let node_path = self.path();
        let paths: Vec<String> = filter_names(filter, &self.child_names())?
            .iter()
            .map(|name| path::join(&node_path, name))
            .collect();
        om.get_nodes_by_path(&paths)
    }

    pub fn has_node(&self, om: &mut ObjectManager, rel_path: &str) -> RepositoryResult<bool> {
        match self.node(om, rel_path) {
            Ok(_) => Ok(true),
            Err(RepositoryError::PathNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The property at `rel_path`. A plain name is looked up on this node.
    pub fn property(&self, om: &mut ObjectManager, rel_path: &str) -> RepositoryResult<PropertyRef> {
        self.check_state()?;
        let node_path = self.path();
        if rel_path.contains('/') {
            return om.get_property_by_path(&om.absolute_path(&node_path, rel_path));
        }
        self.borrow()
            .properties
            .get(rel_path)
            .cloned()
            .ok_or_else(|| RepositoryError::PathNotFound(path::join(&node_path, rel_path)))
    }

    /// Properties whose names pass `filter`, sorted by name.
    pub fn properties(&self, filter: Option<&NameFilter>) -> RepositoryResult<Vec<PropertyRef>> {
        self.check_state()?;
        let names = filter_names(filter, &self.property_names())?;
        let node = self.borrow();
        Ok(names
            .iter()
            .filter_map(|n| node.properties.get(n).cloned())
            .collect())
    }

    pub fn has_property(&self, om: &mut ObjectManager, rel_path: &str) -> RepositoryResult<bool> {
        match self.property(om, rel_path) {
            Ok(_) => Ok(true),
            Err(RepositoryError::PathNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn parent(&self, om: &mut ObjectManager) -> RepositoryResult<NodeRef> {
        let node_path = self.path();
        if node_path == path::ROOT {
            return Err(RepositoryError::ItemNotFound(
                "the root node has no parent".to_string(),
            ));
        }
        om.get_node_by_path(&path::parent(&node_path))
    }

    /// The item named by the primary type's primary item name.
    pub fn primary_item(&self, om: &mut ObjectManager) -> RepositoryResult<Item> {
        self.check_state()?;
        let node_path = self.path();
        let missing = || {
            RepositoryError::ItemNotFound(format!("no primary item found for node {node_path}"))
        };
        let name = self.primary_node_type(om)?.primary_item_name.ok_or_else(missing)?;
        if self.borrow().nodes.contains(&name) {
            return Ok(Item::Node(self.node(om, &name)?));
        }
        match self.property(om, &name) {
            Ok(p) => Ok(Item::Property(p)),
            Err(RepositoryError::PathNotFound(_)) => Err(missing()),
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// The value of property `name`, converted to `property_type` when
    /// given. Length-only binaries are loaded first.
    pub fn property_value(
        &self,
        om: &mut ObjectManager,
        name: &str,
        property_type: Option<PropertyType>,
    ) -> RepositoryResult<PropertyValue> {
        let property = self.property(om, name)?;
        let value = loaded_value(om, &property)?;
        match property_type {
            Some(t) => Ok(value.convert(t)?),
            None => Ok(value),
        }
    }

    /// Values of the properties whose names pass `filter`, keyed by name.
    ///
    /// With `dereference`, reference and path properties come back as the
    /// nodes they point at; otherwise as their string values.
    pub fn property_values(
        &self,
        om: &mut ObjectManager,
        filter: Option<&NameFilter>,
        dereference: bool,
    ) -> RepositoryResult<BTreeMap<String, PropertyContent>> {
        let node_path = self.path();
        let mut out = BTreeMap::new();
        for property in self.properties(filter)? {
            let property_type = property.property_type();
            let value = loaded_value(om, &property)?;
            let content = if dereference && property_type.is_reference() {
                let mut targets = Vec::new();
                for v in value.values() {
                    let target = v.to_string();
                    let node = if property_type == PropertyType::Path {
                        om.get_node_by_path(&om.absolute_path(&node_path, &target))?
                    } else {
                        om.get_node_by_identifier(&target)?
                    };
                    targets.push(node);
                }
                if property.is_multiple() {
                    PropertyContent::Nodes(targets)
                } else {
                    match targets.pop() {
                        Some(node) => PropertyContent::Node(node),
                        None => PropertyContent::Nodes(Vec::new()),
                    }
                }
            } else {
                PropertyContent::Value(value)
            };
            out.insert(property.name(), content);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Node types
    // ------------------------------------------------------------------

    pub fn primary_node_type(&self, om: &mut ObjectManager) -> RepositoryResult<NodeTypeDefinition> {
        om.node_types().node_type(&self.primary_type())
    }

    pub fn mixin_node_types(&self, om: &mut ObjectManager) -> RepositoryResult<Vec<NodeTypeDefinition>> {
        self.mixin_types()
            .iter()
            .map(|m| om.node_types().node_type(m))
            .collect()
    }

    /// Returns `true` if the primary type or a mixin is `name` or inherits
    /// from it.
    pub fn is_node_type(&self, om: &mut ObjectManager, name: &str) -> RepositoryResult<bool> {
        let ntm = om.node_types();
        if ntm.is_node_type(&self.primary_type(), name)? {
            return Ok(true);
        }
        for mixin in self.mixin_types() {
            if ntm.is_node_type(&mixin, name)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Add a mixin type. `mix:referenceable` (and mixins inheriting from it)
    /// assign a fresh identifier when the node has none.
    pub fn add_mixin(&self, om: &mut ObjectManager, mixin: &str) -> RepositoryResult<()> {
        self.check_state()?;
        let def = om.node_types().node_type(mixin)?;
        if !def.is_mixin {
            return Err(RepositoryError::ConstraintViolation(format!(
                "{mixin} is not a mixin type"
            )));
        }
        if self.borrow().mixin_types.iter().any(|m| m == mixin) {
            return Ok(());
        }
        let mixins = {
            let mut node = self.borrow_mut();
            node.mixin_types.push(mixin.to_string());
            node.mixin_types.clone()
        };
        let value = PropertyValue::Multiple(mixins.iter().map(|m| Value::from(m.as_str())).collect());
        self.store_property(om, MIXIN_TYPES, Some(value), Some(PropertyType::Name))?;
        if self.identifier().is_none() && om.node_types().is_node_type(mixin, REFERENCEABLE)? {
            let id = Uuid::now_v7().to_string();
            debug!(path = %self.path(), identifier = %id, "assigned identifier");
            self.store_property(om, UUID, Some(PropertyValue::from(id)), Some(PropertyType::String))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Add a child node.
    ///
    /// A multi-segment `rel_path` adds below the node it names. Without an
    /// explicit type, children of the root become `nt:unstructured`; other
    /// parents use the first child definition with a default primary type.
    pub fn add_node(
        &self,
        om: &mut ObjectManager,
        rel_path: &str,
        primary_type: Option<&str>,
    ) -> RepositoryResult<NodeRef> {
        self.check_state()?;
        let node_path = self.path();
        let target = om.absolute_path(&node_path, rel_path);
        let target_parent = path::parent(&target);
        if target_parent != node_path {
            let parent = match om.get_node_by_path(&target_parent) {
                Ok(parent) => parent,
                Err(RepositoryError::ItemNotFound(msg)) => {
                    if om.get_property_by_path(&target_parent).is_ok() {
                        return Err(RepositoryError::ConstraintViolation(format!(
                            "cannot add a node below property {target_parent}"
                        )));
                    }
                    return Err(RepositoryError::PathNotFound(msg));
                }
                Err(e) => return Err(e),
            };
            return parent.add_node(om, path::name(&target), primary_type);
        }

        let name = path::name(&target).to_string();
        if name.is_empty() || name.contains(['[', ']']) {
            return Err(RepositoryError::InvalidPath(format!(
                "index not allowed in name of new node: {rel_path}"
            )));
        }

        if self.borrow().nodes.contains(&name) {
            return Err(RepositoryError::ItemExists(target));
        }

        let type_name = match primary_type {
            Some(t) => {
                let def = om.node_types().node_type(t)?;
                if def.is_mixin {
                    return Err(RepositoryError::ConstraintViolation(format!(
                        "cannot add a node with mixin type {t}"
                    )));
                }
                if def.is_abstract {
                    return Err(RepositoryError::ConstraintViolation(format!(
                        "cannot add a node with abstract type {t}"
                    )));
                }
                t.to_string()
            }
            None => {
                let parent_type = self.primary_type();
                if parent_type == ROOT_TYPE {
                    "nt:unstructured".to_string()
                } else {
                    om.node_types()
                        .default_child_type(&parent_type)?
                        .ok_or_else(|| {
                            RepositoryError::ConstraintViolation(format!(
                                "no child definition of {parent_type} gives a default type for {name}; specify the type explicitly"
                            ))
                        })?
                }
            }
        };

        let child = NodeRef::new(Node::new_local(&target, &type_name));
        om.add_item(&target, Item::Node(child.clone()))?;
        {
            let mut node = self.borrow_mut();
            node.nodes.push(name);
            node.core.set_modified()?;
        }
        debug!(path = %target, primary_type = %type_name, "added node");
        Ok(child)
    }

    /// Move child `src` right before child `dest`, or to the end if `dest`
    /// is `None`.
    ///
    /// The new order is local only: saving does not send it to the backend.
    pub fn order_before(&self, src: &str, dest: Option<&str>) -> RepositoryResult<()> {
        self.check_state()?;
        if Some(src) == dest {
            return Ok(());
        }
        let mut node = self.borrow_mut();
        let not_child = |name: &str| {
            RepositoryError::ItemNotFound(format!("{name} is not a child of {}", node.core.path()))
        };
        let old = node.nodes.iter().position(|n| n == src).ok_or_else(|| not_child(src))?;
        let new = match dest {
            Some(d) => {
                let pos = node.nodes.iter().position(|n| n == d).ok_or_else(|| not_child(d))?;
                Some(if old < pos { pos - 1 } else { pos })
            }
            None => None,
        };
        let moved = node.nodes.remove(old);
        match new {
            Some(pos) => node.nodes.insert(pos, moved),
            None => node.nodes.push(moved),
        }
        node.core.set_modified()?;
        warn!(
            path = %node.core.path(),
            src,
            dest = dest.unwrap_or("<end>"),
            "child order changed locally; reordering is not persisted on save"
        );
        Ok(())
    }

    /// Create, update or (with `None`) remove a property.
    ///
    /// The type properties are protected; use [`add_mixin`](Self::add_mixin).
    pub fn set_property(
        &self,
        om: &mut ObjectManager,
        name: &str,
        value: Option<PropertyValue>,
        property_type: Option<PropertyType>,
    ) -> RepositoryResult<Option<PropertyRef>> {
        if is_type_property(name) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "{name} is protected"
            )));
        }
        self.store_property(om, name, value, property_type)
    }

    fn store_property(
        &self,
        om: &mut ObjectManager,
        name: &str,
        value: Option<PropertyValue>,
        property_type: Option<PropertyType>,
    ) -> RepositoryResult<Option<PropertyRef>> {
        self.check_state()?;
        if name.is_empty() || name.contains(['/', '[', ']']) {
            return Err(RepositoryError::InvalidPath(format!(
                "{name} is not a valid property name"
            )));
        }
        let node_path = self.path();
        let existing = self.borrow().properties.get(name).cloned();

        let Some(value) = value else {
            let Some(prop) = existing else {
                return Ok(None);
            };
            om.remove_item(&node_path, Some(name))?;
            {
                let mut node = self.borrow_mut();
                node.properties.remove(name);
                if !prop.is_new() {
                    node.deleted_properties.insert(name.to_string(), prop.clone());
                }
                node.core.set_modified()?;
            }
            prop.set_deleted();
            if name == UUID {
                om.unindex_path(&node_path);
            }
            return Ok(None);
        };

        let prop = match existing {
            Some(prop) => {
                prop.assign(value, property_type)?;
                prop
            }
            None => {
                let prop = PropertyRef::new(Property::new_local(
                    &node_path,
                    name,
                    value,
                    property_type,
                )?);
                om.add_item(&prop.path(), Item::Property(prop.clone()))?;
                let mut node = self.borrow_mut();
                node.deleted_properties.remove(name);
                node.properties.insert(name.to_string(), prop.clone());
                prop
            }
        };
        self.set_modified()?;
        if name == UUID {
            if let Some(id) = self.identifier() {
                om.index_identifier(&id, &node_path);
            }
        }
        Ok(Some(prop))
    }

    /// Remove this node and its subtree.
    pub fn remove(&self, om: &mut ObjectManager) -> RepositoryResult<()> {
        self.check_state()?;
        let node_path = self.path();
        if node_path == path::ROOT {
            return Err(RepositoryError::ConstraintViolation(
                "cannot remove the root node".to_string(),
            ));
        }
        om.remove_item(&node_path, None)?;
        if let Some(parent) = om.get_cached_node(&path::parent(&node_path)) {
            parent.unset_child(path::name(&node_path));
            if !parent.is_deleted() {
                parent.set_modified()?;
            }
        }
        self.set_deleted();
        Ok(())
    }

    /// Reload from the backend.
    ///
    /// With `keep_changes`, local modifications and removals survive and
    /// only untouched state is updated. Without it the node ends clean.
    pub fn refresh(&self, om: &mut ObjectManager, keep_changes: bool) -> RepositoryResult<()> {
        self.refresh_internal(om, keep_changes, false)
    }

    pub(crate) fn refresh_internal(
        &self,
        om: &mut ObjectManager,
        keep_changes: bool,
        internal: bool,
    ) -> RepositoryResult<()> {
        let (node_path, state, primary_type) = {
            let node = self.borrow();
            (
                node.core.path().to_string(),
                node.core.state(),
                node.primary_type.clone(),
            )
        };
        if !internal && state == ItemState::Deleted {
            return Err(RepositoryError::InvalidItemState(format!(
                "{node_path} has been removed and cannot be refreshed"
            )));
        }
        if state == ItemState::New {
            if keep_changes {
                return Ok(());
            }
            om.purge_disappeared_node(&node_path, false);
            if let Some(parent) = om.get_cached_node(&path::parent(&node_path)) {
                parent.unset_child(path::name(&node_path));
            }
            self.set_deleted();
            return Ok(());
        }

        let backend_path = om.resolve_backend_path(&node_path);
        debug!(path = %node_path, backend = %backend_path, keep_changes, "refreshing node");
        match om.transport().get_node(&backend_path) {
            Ok(record) => self.merge_record(om, &record, keep_changes),
            Err(TransportError::ItemNotFound(_)) => {
                if !om.purge_disappeared_node(&node_path, keep_changes) {
                    return Err(RepositoryError::Internal(format!(
                        "{node_path} should be purged and not kept"
                    )));
                }
                self.merge_record(om, &NodeRecord::new(primary_type), false)?;
                if !internal {
                    self.set_deleted();
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Merge a freshly fetched record into this node.
    fn merge_record(
        &self,
        om: &mut ObjectManager,
        record: &NodeRecord,
        keep_changes: bool,
    ) -> RepositoryResult<()> {
        let node_path = self.path();
        let old_nodes = self.child_names();

        let mut nodes: Vec<String> = Vec::new();
        for name in &record.children {
            let child_path = path::join(&node_path, name);
            let deleted_here = keep_changes
                && !old_nodes.contains(name)
                && om
                    .get_cached_node(&child_path)
                    .map_or(false, |c| c.is_deleted());
            if !deleted_here && !om.is_path_masked(&child_path) && !nodes.contains(name) {
                nodes.push(name.clone());
            }
        }
        for name in old_nodes.iter().filter(|n| !record.children.contains(n)) {
            let child_path = path::join(&node_path, name);
            if !om.purge_disappeared_node(&child_path, keep_changes) && !nodes.contains(name) {
                nodes.push(name.clone());
            }
        }

        let mut discarded: Vec<String> = Vec::new();
        let mut unstaged: Vec<String> = Vec::new();
        {
            let mut node = self.borrow_mut();
            let mixins_kept = keep_changes
                && node
                    .properties
                    .get(MIXIN_TYPES)
                    .map_or(false, |p| p.is_new() || p.is_modified());
            node.primary_type = record.primary_type.clone();
            if !mixins_kept {
                node.mixin_types = record.mixin_types.clone();
            }

            let mut incoming = vec![primary_type_record(&record.primary_type)];
            if !record.mixin_types.is_empty() {
                incoming.push(mixin_types_record(&record.mixin_types));
            }
            incoming.extend(
                record
                    .properties
                    .iter()
                    .filter(|p| !is_type_property(&p.name))
                    .cloned(),
            );

            let mut stale: BTreeSet<String> = node.properties.keys().cloned().collect();
            for rec in &incoming {
                stale.remove(&rec.name);
                if let Some(prop) = node.properties.get(&rec.name).cloned() {
                    if keep_changes && (prop.is_modified() || prop.is_new()) {
                        continue;
                    }
                    if prop.is_new() {
                        discarded.push(prop.path());
                    }
                    prop.update_from_record(rec, keep_changes);
                } else if let Some(prop) = node.deleted_properties.get(&rec.name).cloned() {
                    if keep_changes {
                        continue;
                    }
                    node.deleted_properties.remove(&rec.name);
                    unstaged.push(prop.path());
                    prop.update_from_record(rec, false);
                    prop.set_clean();
                    node.properties.insert(rec.name.clone(), prop);
                } else {
                    node.properties.insert(
                        rec.name.clone(),
                        PropertyRef::new(Property::from_record(&node_path, rec)),
                    );
                }
            }
            for name in stale {
                let Some(prop) = node.properties.get(&name).cloned() else {
                    continue;
                };
                if prop.is_new() {
                    if keep_changes {
                        continue;
                    }
                    discarded.push(prop.path());
                }
                prop.set_deleted();
                node.properties.remove(&name);
            }

            if !keep_changes {
                for (_, prop) in std::mem::take(&mut node.deleted_properties) {
                    unstaged.push(prop.path());
                }
                if node.core.state() != ItemState::Deleted {
                    node.core.set_clean();
                }
            }
            node.nodes = nodes;
        }
        for p in discarded {
            om.discard_add(&p);
        }
        for p in unstaged {
            om.unstage_removal(&p);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Crate-internal bookkeeping
    // ------------------------------------------------------------------

    pub(crate) fn unset_child(&self, name: &str) {
        self.borrow_mut().nodes.retain(|n| n != name);
    }

    pub(crate) fn add_child(&self, name: &str) {
        let mut node = self.borrow_mut();
        if !node.nodes.iter().any(|n| n == name) {
            node.nodes.push(name.to_string());
        }
    }

    /// Move the node and its properties to `new_path`.
    pub(crate) fn set_path(&self, new_path: String) {
        let mut node = self.borrow_mut();
        for (name, prop) in node.properties.iter().chain(node.deleted_properties.iter()) {
            prop.set_path(path::join(&new_path, name));
        }
        node.core.set_path(new_path);
    }

    /// Mark the node and all its properties deleted.
    pub(crate) fn set_deleted(&self) {
        let mut node = self.borrow_mut();
        node.core.set_deleted();
        for prop in node.properties.values() {
            prop.set_deleted();
        }
    }

    pub(crate) fn confirm_saved(&self) {
        let mut node = self.borrow_mut();
        node.core.confirm_saved();
        for prop in node.properties.values() {
            prop.confirm_saved();
        }
        node.deleted_properties.clear();
    }

    pub(crate) fn clear_old_path(&self) {
        let node = self.borrow();
        for prop in node.properties.values() {
            prop.clear_old_path();
        }
        drop(node);
        self.borrow_mut().core.clear_old_path();
    }

    /// Properties changed since load, excluding new ones.
    pub(crate) fn modified_properties(&self) -> Vec<PropertyRef> {
        self.borrow()
            .properties
            .values()
            .filter(|p| p.is_modified())
            .cloned()
            .collect()
    }

    /// The record sent to the backend when this node is created.
    pub(crate) fn to_record(&self) -> NodeRecord {
        let node = self.borrow();
        NodeRecord {
            primary_type: node.primary_type.clone(),
            mixin_types: node.mixin_types.clone(),
            properties: node
                .properties
                .iter()
                .filter(|(name, _)| !is_type_property(name))
                .map(|(_, p)| p.to_record())
                .collect(),
            children: node.nodes.clone(),
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(n) => f
                .debug_struct("NodeRef")
                .field("path", &n.core.path())
                .field("primary_type", &n.primary_type)
                .field("state", &n.core.state())
                .field("children", &n.nodes.len())
                .field("properties", &n.properties.len())
                .finish(),
            Err(_) => f.write_str("NodeRef(<borrowed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use bytes::Bytes;
    use crx_transport::{InMemoryTransport, NodeTypeDefinition as TypeDef, Transport, TransportCall};
    use crx_types::BinaryLength;

    fn setup() -> (Arc<InMemoryTransport>, ObjectManager) {
        let transport = Arc::new(InMemoryTransport::new());
        transport
            .insert_node(
                "/a",
                NodeRecord::new("nt:unstructured")
                    .with_property(PropertyRecord::new("title", PropertyType::String, "x")),
            )
            .unwrap();
        transport
            .insert_node("/a/b", NodeRecord::new("nt:unstructured"))
            .unwrap();
        transport
            .insert_node("/a/c", NodeRecord::new("nt:unstructured"))
            .unwrap();
        let om = ObjectManager::new(transport.clone());
        (transport, om)
    }

    fn string(node: &NodeRef, om: &mut ObjectManager, name: &str) -> String {
        node.property(om, name).unwrap().string().unwrap()
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    #[test]
    fn loaded_node_exposes_type_properties() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        assert_eq!(a.state(), ItemState::Clean);
        assert_eq!(a.child_names(), vec!["b", "c"]);
        assert_eq!(string(&a, &mut om, PRIMARY_TYPE), "nt:unstructured");
        assert!(!a.has_property(&mut om, MIXIN_TYPES).unwrap());
        assert_eq!(a.index(), 1);
        assert_eq!(a.name(), "a");
    }

    #[test]
    fn navigation_maps_misses_to_path_not_found() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        assert!(a.node(&mut om, "b").unwrap().ptr_eq(&om.get_node_by_path("/a/b").unwrap()));
        assert!(matches!(a.node(&mut om, "zz"), Err(RepositoryError::PathNotFound(_))));
        assert!(a.has_node(&mut om, "c").unwrap());
        assert!(!a.has_node(&mut om, "zz").unwrap());
        assert!(matches!(a.property(&mut om, "nope"), Err(RepositoryError::PathNotFound(_))));
        assert_eq!(a.property(&mut om, "b/jcr:primaryType").unwrap().string().unwrap(), "nt:unstructured");
        let parent = a.node(&mut om, "b").unwrap().parent(&mut om).unwrap();
        assert!(parent.ptr_eq(&a));
    }

    #[test]
    fn nodes_filter_in_document_order() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        let all: Vec<String> = a.nodes(&mut om, None).unwrap().iter().map(NodeRef::name).collect();
        assert_eq!(all, vec!["b", "c"]);
        let filter = NameFilter::from("c");
        let some: Vec<String> = a.nodes(&mut om, Some(&filter)).unwrap().iter().map(NodeRef::name).collect();
        assert_eq!(some, vec!["c"]);
        let props: Vec<String> = a
            .properties(Some(&NameFilter::from("jcr:*")))
            .unwrap()
            .iter()
            .map(PropertyRef::name)
            .collect();
        assert_eq!(props, vec![PRIMARY_TYPE]);
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    const TARGET_ID: &str = "0192a0c4-5b6e-7a3c-9f21-3d4e5f607182";

    fn insert_file(transport: &InMemoryTransport) {
        transport.insert_node("/doc", NodeRecord::new("nt:file")).unwrap();
        transport
            .insert_node(
                "/doc/jcr:content",
                NodeRecord::new("nt:resource")
                    .with_property(PropertyRecord::new(
                        "jcr:data",
                        PropertyType::Binary,
                        Bytes::from_static(b"body"),
                    ))
                    .with_property(PropertyRecord::new("jcr:mimeType", PropertyType::String, "text/plain")),
            )
            .unwrap();
    }

    fn insert_links(transport: &InMemoryTransport) {
        transport
            .insert_node(
                "/target",
                NodeRecord::new("nt:unstructured")
                    .with_mixin("mix:referenceable")
                    .with_property(PropertyRecord::new(UUID, PropertyType::String, TARGET_ID)),
            )
            .unwrap();
        transport
            .insert_node(
                "/holder",
                NodeRecord::new("nt:unstructured")
                    .with_property(PropertyRecord::new("ref", PropertyType::Reference, TARGET_ID))
                    .with_property(PropertyRecord::new("refs", PropertyType::WeakReference, vec![TARGET_ID]))
                    .with_property(PropertyRecord::new("link", PropertyType::Path, "../a"))
                    .with_property(PropertyRecord::new("label", PropertyType::String, "t")),
            )
            .unwrap();
    }

    #[test]
    fn primary_item_follows_the_node_type() {
        let (transport, mut om) = setup();
        insert_file(&transport);
        let doc = om.get_node_by_path("/doc").unwrap();
        let content = match doc.primary_item(&mut om).unwrap() {
            Item::Node(n) => n,
            other => panic!("expected a node, got {other:?}"),
        };
        assert!(content.ptr_eq(&om.get_node_by_path("/doc/jcr:content").unwrap()));
        match content.primary_item(&mut om).unwrap() {
            Item::Property(p) => assert_eq!(p.path(), "/doc/jcr:content/jcr:data"),
            other => panic!("expected a property, got {other:?}"),
        }
    }

    #[test]
    fn primary_item_missing_is_item_not_found() {
        let (transport, mut om) = setup();
        transport.insert_node("/empty", NodeRecord::new("nt:file")).unwrap();
        let empty = om.get_node_by_path("/empty").unwrap();
        assert!(matches!(empty.primary_item(&mut om), Err(RepositoryError::ItemNotFound(_))));
        let a = om.get_node_by_path("/a").unwrap();
        assert!(matches!(a.primary_item(&mut om), Err(RepositoryError::ItemNotFound(_))));
    }

    #[test]
    fn property_value_converts_on_request() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        a.set_property(&mut om, "count", Some(PropertyValue::from("42")), None)
            .unwrap();
        assert_eq!(a.property_value(&mut om, "title", None).unwrap(), PropertyValue::from("x"));
        assert_eq!(
            a.property_value(&mut om, "count", Some(PropertyType::Long)).unwrap(),
            PropertyValue::Single(Value::Long(42))
        );
        assert!(matches!(
            a.property_value(&mut om, "title", Some(PropertyType::Long)),
            Err(RepositoryError::Type(_))
        ));
        assert!(matches!(
            a.property_value(&mut om, "nope", None),
            Err(RepositoryError::PathNotFound(_))
        ));
    }

    #[test]
    fn property_value_loads_length_only_binaries() {
        let (transport, mut om) = setup();
        insert_file(&transport);
        let content = om.get_node_by_path("/doc/jcr:content").unwrap();
        assert!(content.property(&mut om, "jcr:data").unwrap().is_length_only());
        assert_eq!(
            content.property_value(&mut om, "jcr:data", None).unwrap(),
            PropertyValue::Single(Value::Binary(Bytes::from_static(b"body")))
        );
        assert_eq!(
            content.property_value(&mut om, "jcr:data", Some(PropertyType::String)).unwrap(),
            PropertyValue::from("body")
        );
    }

    #[test]
    fn property_values_dereference_links() {
        let (transport, mut om) = setup();
        insert_links(&transport);
        let holder = om.get_node_by_path("/holder").unwrap();
        let target = om.get_node_by_path("/target").unwrap();
        let a = om.get_node_by_path("/a").unwrap();

        let values = holder.property_values(&mut om, None, true).unwrap();
        match &values["ref"] {
            PropertyContent::Node(n) => assert!(n.ptr_eq(&target)),
            other => panic!("expected a node, got {other:?}"),
        }
        match &values["refs"] {
            PropertyContent::Nodes(ns) => {
                assert_eq!(ns.len(), 1);
                assert!(ns[0].ptr_eq(&target));
            }
            other => panic!("expected nodes, got {other:?}"),
        }
        match &values["link"] {
            PropertyContent::Node(n) => assert!(n.ptr_eq(&a)),
            other => panic!("expected a node, got {other:?}"),
        }
        assert_eq!(values["label"].as_value(), Some(&PropertyValue::from("t")));
        assert!(values.contains_key(PRIMARY_TYPE));
    }

    #[test]
    fn property_values_without_dereference_keep_strings() {
        let (transport, mut om) = setup();
        insert_links(&transport);
        let holder = om.get_node_by_path("/holder").unwrap();
        let filter = NameFilter::from("ref*|link");
        let values = holder.property_values(&mut om, Some(&filter), false).unwrap();
        let names: Vec<&str> = values.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["link", "ref", "refs"]);
        assert_eq!(values["ref"].as_value(), Some(&PropertyValue::from(TARGET_ID)));
        assert_eq!(values["link"].as_value(), Some(&PropertyValue::from("../a")));
        assert_eq!(
            values["refs"].as_value(),
            Some(&PropertyValue::from(vec![TARGET_ID]))
        );
    }

    // ------------------------------------------------------------------
    // add_node
    // ------------------------------------------------------------------

    #[test]
    fn add_node_infers_type_from_definitions() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        let n = a.add_node(&mut om, "n", None).unwrap();
        assert_eq!(n.primary_type(), "nt:unstructured");
        assert!(n.is_new());
        assert_eq!(a.state(), ItemState::Modified);
        assert_eq!(a.child_names(), vec!["b", "c", "n"]);
    }

    #[test]
    fn add_node_below_root_defaults_to_unstructured() {
        let (_, mut om) = setup();
        let root = om.get_node_by_path("/").unwrap();
        let n = root.add_node(&mut om, "top", None).unwrap();
        assert_eq!(n.primary_type(), "nt:unstructured");
        assert_eq!(n.path(), "/top");
    }

    #[test]
    fn add_node_delegates_to_real_parent() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        let d = a.add_node(&mut om, "b/d", None).unwrap();
        assert_eq!(d.path(), "/a/b/d");
        let b = om.get_node_by_path("/a/b").unwrap();
        assert_eq!(b.child_names(), vec!["d"]);
        assert!(matches!(
            a.add_node(&mut om, "missing/d", None),
            Err(RepositoryError::PathNotFound(_))
        ));
        assert!(matches!(
            a.add_node(&mut om, "title/d", None),
            Err(RepositoryError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn add_node_rejects_bad_types_and_names() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        assert!(matches!(
            a.add_node(&mut om, "m", Some("mix:referenceable")),
            Err(RepositoryError::ConstraintViolation(_))
        ));
        assert!(matches!(
            a.add_node(&mut om, "m", Some("nt:base")),
            Err(RepositoryError::ConstraintViolation(_))
        ));
        assert!(matches!(
            a.add_node(&mut om, "m[2]", Some("nt:unstructured")),
            Err(RepositoryError::InvalidPath(_))
        ));
        assert!(matches!(
            a.add_node(&mut om, "b", Some("nt:unstructured")),
            Err(RepositoryError::ItemExists(_))
        ));
    }

    #[test]
    fn add_node_without_default_type_fails() {
        let (transport, mut om) = setup();
        transport
            .register_node_type(TypeDef::primary("app:strict"))
            .unwrap();
        let root = om.get_node_by_path("/").unwrap();
        let strict = root.add_node(&mut om, "s", Some("app:strict")).unwrap();
        assert!(matches!(
            strict.add_node(&mut om, "x", None),
            Err(RepositoryError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn add_node_reports_existing_child_before_type_inference() {
        let (transport, mut om) = setup();
        transport
            .register_node_type(TypeDef::primary("app:strict"))
            .unwrap();
        transport
            .insert_node("/s", NodeRecord::new("app:strict"))
            .unwrap();
        transport
            .insert_node("/s/kid", NodeRecord::new("nt:unstructured"))
            .unwrap();
        let strict = om.get_node_by_path("/s").unwrap();
        assert!(matches!(
            strict.add_node(&mut om, "kid", None),
            Err(RepositoryError::ItemExists(_))
        ));
        assert!(matches!(
            strict.add_node(&mut om, "other", None),
            Err(RepositoryError::ConstraintViolation(_))
        ));
    }

    // ------------------------------------------------------------------
    // order_before
    // ------------------------------------------------------------------

    #[test]
    fn order_before_repositions_children() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        a.add_node(&mut om, "d", None).unwrap();
        a.order_before("d", Some("b")).unwrap();
        assert_eq!(a.child_names(), vec!["d", "b", "c"]);
        a.order_before("d", Some("c")).unwrap();
        assert_eq!(a.child_names(), vec!["b", "d", "c"]);
        a.order_before("b", None).unwrap();
        assert_eq!(a.child_names(), vec!["d", "c", "b"]);
        assert!(matches!(a.order_before("zz", None), Err(RepositoryError::ItemNotFound(_))));
        assert!(matches!(a.order_before("b", Some("zz")), Err(RepositoryError::ItemNotFound(_))));
    }

    // ------------------------------------------------------------------
    // set_property
    // ------------------------------------------------------------------

    #[test]
    fn set_property_creates_and_updates() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        let p = a
            .set_property(&mut om, "count", Some(PropertyValue::from(1i64)), None)
            .unwrap()
            .unwrap();
        assert!(p.is_new());
        assert!(om.pending_changes().added.contains(&"/a/count".to_string()));
        let title = a
            .set_property(&mut om, "title", Some(PropertyValue::from("y")), None)
            .unwrap()
            .unwrap();
        assert!(title.is_modified());
        assert!(a.is_modified());
    }

    #[test]
    fn set_property_none_removes() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        let title = a.property(&mut om, "title").unwrap();
        assert!(a.set_property(&mut om, "title", None, None).unwrap().is_none());
        assert!(title.is_deleted());
        assert!(!a.has_property(&mut om, "title").unwrap());
        assert_eq!(om.pending_changes().removed, vec!["/a/title"]);
        assert!(a.set_property(&mut om, "never", None, None).unwrap().is_none());
    }

    #[test]
    fn removing_new_property_unstages_it() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        a.set_property(&mut om, "tmp", Some(PropertyValue::from("v")), None).unwrap();
        a.set_property(&mut om, "tmp", None, None).unwrap();
        let changes = om.pending_changes();
        assert!(changes.added.is_empty());
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn type_properties_are_protected() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        assert!(matches!(
            a.set_property(&mut om, PRIMARY_TYPE, Some(PropertyValue::from("nt:folder")), None),
            Err(RepositoryError::ConstraintViolation(_))
        ));
        assert!(matches!(
            a.set_property(&mut om, "a/b", Some(PropertyValue::from("x")), None),
            Err(RepositoryError::InvalidPath(_))
        ));
    }

    #[test]
    fn property_set_value_goes_through_node() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        let title = a.property(&mut om, "title").unwrap();
        title.set_value(&mut om, Some(PropertyValue::from("z")), None).unwrap();
        assert_eq!(title.string().unwrap(), "z");
        assert!(a.is_modified());
        title.remove(&mut om).unwrap();
        assert!(title.is_deleted());
    }

    // ------------------------------------------------------------------
    // Mixins and identifiers
    // ------------------------------------------------------------------

    #[test]
    fn referenceable_mixin_assigns_identifier() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        a.add_mixin(&mut om, "mix:referenceable").unwrap();
        let id = a.identifier().unwrap();
        assert!(path::is_identifier(&id));
        assert_eq!(a.mixin_types(), vec!["mix:referenceable"]);
        assert!(a.is_node_type(&mut om, "mix:referenceable").unwrap());
        assert!(a.is_node_type(&mut om, "nt:base").unwrap());
        assert!(om.get_node(&id, "/").unwrap().ptr_eq(&a));
        assert!(matches!(
            a.add_mixin(&mut om, "nt:folder"),
            Err(RepositoryError::ConstraintViolation(_))
        ));
    }

    // ------------------------------------------------------------------
    // remove
    // ------------------------------------------------------------------

    #[test]
    fn remove_detaches_from_parent() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        let b = a.node(&mut om, "b").unwrap();
        b.remove(&mut om).unwrap();
        assert!(b.is_deleted());
        assert_eq!(a.child_names(), vec!["c"]);
        assert!(a.is_modified());
        assert!(matches!(
            b.set_property(&mut om, "x", Some(PropertyValue::from("y")), None),
            Err(RepositoryError::InvalidItemState(_))
        ));
        let root = om.get_node_by_path("/").unwrap();
        assert!(matches!(root.remove(&mut om), Err(RepositoryError::ConstraintViolation(_))));
    }

    // ------------------------------------------------------------------
    // refresh
    // ------------------------------------------------------------------

    #[test]
    fn refresh_is_idempotent() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        a.refresh(&mut om, false).unwrap();
        let first = (a.state(), a.child_names(), a.property_names(), string(&a, &mut om, "title"));
        a.refresh(&mut om, false).unwrap();
        let second = (a.state(), a.child_names(), a.property_names(), string(&a, &mut om, "title"));
        assert_eq!(first, second);
        assert_eq!(first.0, ItemState::Clean);
    }

    #[test]
    fn refresh_keep_changes_merges_backend_state() {
        let (transport, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        a.set_property(&mut om, "title", Some(PropertyValue::from("y")), None).unwrap();

        transport
            .store_property("/a/title", &PropertyRecord::new("title", PropertyType::String, "z"))
            .unwrap();
        transport
            .store_property("/a/extra", &PropertyRecord::new("extra", PropertyType::String, "e"))
            .unwrap();

        a.refresh(&mut om, true).unwrap();
        assert_eq!(string(&a, &mut om, "title"), "y");
        assert_eq!(string(&a, &mut om, "extra"), "e");
        assert!(a.is_modified());

        a.refresh(&mut om, false).unwrap();
        assert_eq!(string(&a, &mut om, "title"), "z");
        assert_eq!(a.state(), ItemState::Clean);
    }

    #[test]
    fn refresh_updates_length_only_binaries() {
        let (transport, mut om) = setup();
        transport
            .insert_node(
                "/f",
                NodeRecord::new("nt:unstructured")
                    .with_property(PropertyRecord::new(
                        "data",
                        PropertyType::Binary,
                        Bytes::from_static(b"hello"),
                    ))
                    .with_property(PropertyRecord::new(
                        "draft",
                        PropertyType::Binary,
                        Bytes::from_static(b"old"),
                    )),
            )
            .unwrap();
        let f = om.get_node_by_path("/f").unwrap();
        let data = f.property(&mut om, "data").unwrap();
        assert_eq!(data.binary(&mut om).unwrap(), vec![Bytes::from_static(b"hello")]);
        assert!(!data.is_length_only());
        let draft = f.property(&mut om, "draft").unwrap();
        f.set_property(
            &mut om,
            "draft",
            Some(PropertyValue::from(Bytes::from_static(b"local"))),
            None,
        )
        .unwrap();

        transport
            .store_property(
                "/f/data",
                &PropertyRecord::new("data", PropertyType::Binary, Bytes::from_static(b"hello world")),
            )
            .unwrap();
        transport
            .store_property(
                "/f/draft",
                &PropertyRecord::new("draft", PropertyType::Binary, Bytes::from_static(b"remote")),
            )
            .unwrap();
        f.refresh(&mut om, true).unwrap();

        assert!(draft.is_modified());
        assert_eq!(draft.value(), Some(PropertyValue::from(Bytes::from_static(b"local"))));

        assert!(data.is_length_only());
        assert_eq!(data.property_type(), PropertyType::Binary);
        assert_eq!(data.length(), BinaryLength::Single(11));
        assert_eq!(data.state(), ItemState::Clean);
        assert_eq!(data.binary(&mut om).unwrap(), vec![Bytes::from_static(b"hello world")]);
    }

    #[test]
    fn refresh_without_keep_restores_deleted_property() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        a.set_property(&mut om, "title", None, None).unwrap();
        a.refresh(&mut om, true).unwrap();
        assert!(!a.has_property(&mut om, "title").unwrap());
        a.refresh(&mut om, false).unwrap();
        assert_eq!(string(&a, &mut om, "title"), "x");
        assert!(om.pending_changes().removed.is_empty());
    }

    #[test]
    fn refresh_purges_vanished_children_and_keeps_new_ones() {
        let (transport, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        let b = a.node(&mut om, "b").unwrap();
        a.add_node(&mut om, "fresh", None).unwrap();
        transport.delete_item("/a/b").unwrap();

        a.refresh(&mut om, true).unwrap();
        assert!(b.is_deleted());
        assert_eq!(a.child_names(), vec!["c", "fresh"]);
        assert!(om.get_cached_node("/a/b").is_none());

        a.refresh(&mut om, false).unwrap();
        assert_eq!(a.child_names(), vec!["c"]);
        assert!(om.pending_changes().added.is_empty());
    }

    #[test]
    fn refresh_of_vanished_node_marks_it_deleted() {
        let (transport, mut om) = setup();
        let c = om.get_node_by_path("/a/c").unwrap();
        transport.delete_item("/a/c").unwrap();
        c.refresh(&mut om, false).unwrap();
        assert!(c.is_deleted());
        assert!(om.get_cached_node("/a/c").is_none());
        assert!(matches!(c.refresh(&mut om, false), Err(RepositoryError::InvalidItemState(_))));
    }

    #[test]
    fn refresh_of_new_node() {
        let (_, mut om) = setup();
        let a = om.get_node_by_path("/a").unwrap();
        let n = a.add_node(&mut om, "n", None).unwrap();
        n.refresh(&mut om, true).unwrap();
        assert!(n.is_new());
        n.refresh(&mut om, false).unwrap();
        assert!(n.is_deleted());
        assert_eq!(a.child_names(), vec!["b", "c"]);
    }

    #[test]
    fn refresh_reports_backend_path_of_moved_node() {
        let (transport, mut om) = setup();
        let c = om.get_node_by_path("/a/c").unwrap();
        om.move_node("/a/c", "/moved").unwrap();
        transport.clear_calls();
        c.refresh(&mut om, true).unwrap();
        assert_eq!(transport.calls(), vec![TransportCall::GetNode("/a/c".into())]);
        assert_eq!(c.path(), "/moved");
    }
}
