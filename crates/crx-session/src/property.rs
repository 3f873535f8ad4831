//! Properties and their handles.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use crx_transport::{PropertyRecord, RecordValue};
use crx_types::path;
use crx_types::{BinaryLength, PropertyType, PropertyValue, Value};

use crate::error::{RepositoryError, RepositoryResult};
use crate::item::{ItemCore, ItemState};
use crate::node::NodeRef;
use crate::object_manager::ObjectManager;

/// A typed property owned by a node.
#[derive(Debug)]
pub struct Property {
    core: ItemCore,
    name: String,
    property_type: PropertyType,
    value: RecordValue,
}

impl Property {
    /// A property loaded from the backend.
    pub(crate) fn from_record(parent_path: &str, record: &PropertyRecord) -> Self {
        Self {
            core: ItemCore::new(path::join(parent_path, &record.name), ItemState::Clean),
            name: record.name.clone(),
            property_type: record.property_type,
            value: record.value.clone(),
        }
    }

    /// A property created in this session.
    pub(crate) fn new_local(
        parent_path: &str,
        name: &str,
        value: PropertyValue,
        property_type: Option<PropertyType>,
    ) -> RepositoryResult<Self> {
        let (property_type, value) = typed(value, property_type, None)?;
        Ok(Self {
            core: ItemCore::new(path::join(parent_path, name), ItemState::New),
            name: name.to_string(),
            property_type,
            value: RecordValue::Inline(value),
        })
    }

    pub(crate) fn mark_new(&mut self) {
        self.core = ItemCore::new(self.core.path().to_string(), ItemState::New);
    }

    pub(crate) fn to_record(&self) -> PropertyRecord {
        PropertyRecord {
            name: self.name.clone(),
            property_type: self.property_type,
            value: self.value.clone(),
        }
    }
}

/// Resolve the stored type of `value`: an explicit type wins, then the
/// current type of an existing property, then the value's natural type.
fn typed(
    value: PropertyValue,
    explicit: Option<PropertyType>,
    current: Option<PropertyType>,
) -> RepositoryResult<(PropertyType, PropertyValue)> {
    let target = explicit
        .filter(|t| *t != PropertyType::Undefined)
        .or(current.filter(|t| *t != PropertyType::Undefined))
        .unwrap_or_else(|| value.natural_type());
    let converted = value.convert(target)?;
    Ok((target, converted))
}

/// Shared handle to a [`Property`].
///
/// Handles compare by identity: two handles are the same property only if
/// [`ptr_eq`](Self::ptr_eq) holds.
#[derive(Clone)]
pub struct PropertyRef(Rc<RefCell<Property>>);

impl PropertyRef {
    pub(crate) fn new(property: Property) -> Self {
        Self(Rc::new(RefCell::new(property)))
    }

    pub(crate) fn borrow(&self) -> Ref<'_, Property> {
        self.0.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, Property> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &PropertyRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn name(&self) -> String {
        self.borrow().name.clone()
    }

    pub fn path(&self) -> String {
        self.borrow().core.path().to_string()
    }

    pub fn parent_path(&self) -> String {
        path::parent(self.borrow().core.path())
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

    pub fn property_type(&self) -> PropertyType {
        self.borrow().property_type
    }

    pub fn is_multiple(&self) -> bool {
        self.borrow().value.is_multiple()
    }

    /// Returns `true` while a binary value is known only by its length.
    pub fn is_length_only(&self) -> bool {
        self.borrow().value.is_length_only()
    }

    /// The value, or `None` for a binary whose content has not been loaded
    /// yet (see [`binary`](Self::binary)).
    pub fn value(&self) -> Option<PropertyValue> {
        match &self.borrow().value {
            RecordValue::Inline(v) => Some(v.clone()),
            RecordValue::LengthOnly(_) => None,
        }
    }

    /// Byte length of each value. Non-binary values report the length of
    /// their string form.
    pub fn length(&self) -> BinaryLength {
        fn len(v: &Value) -> u64 {
            match v {
                Value::Binary(b) => b.len() as u64,
                other => other.to_string().len() as u64,
            }
        }
        match &self.borrow().value {
            RecordValue::LengthOnly(l) => l.clone(),
            RecordValue::Inline(PropertyValue::Single(v)) => BinaryLength::Single(len(v)),
            RecordValue::Inline(PropertyValue::Multiple(vs)) => {
                BinaryLength::Multiple(vs.iter().map(len).collect())
            }
        }
    }

    fn single(&self, target: PropertyType) -> RepositoryResult<Value> {
        let p = self.borrow();
        match &p.value {
            RecordValue::Inline(PropertyValue::Single(v)) => Ok(v.convert(target)?),
            RecordValue::Inline(PropertyValue::Multiple(_)) => Err(
                RepositoryError::ConstraintViolation(format!("{} is multi-valued", p.core.path())),
            ),
            RecordValue::LengthOnly(_) => Err(RepositoryError::InvalidItemState(format!(
                "{}: binary content not loaded",
                p.core.path()
            ))),
        }
    }

    pub fn string(&self) -> RepositoryResult<String> {
        Ok(self.single(PropertyType::String)?.to_string())
    }

    pub fn long(&self) -> RepositoryResult<i64> {
        match self.single(PropertyType::Long)? {
            Value::Long(v) => Ok(v),
            other => Err(RepositoryError::Internal(format!("long conversion produced {other:?}"))),
        }
    }

    pub fn double(&self) -> RepositoryResult<f64> {
        match self.single(PropertyType::Double)? {
            Value::Double(v) => Ok(v),
            other => Err(RepositoryError::Internal(format!("double conversion produced {other:?}"))),
        }
    }

    pub fn boolean(&self) -> RepositoryResult<bool> {
        match self.single(PropertyType::Boolean)? {
            Value::Boolean(v) => Ok(v),
            other => Err(RepositoryError::Internal(format!("boolean conversion produced {other:?}"))),
        }
    }

    pub fn date(&self) -> RepositoryResult<DateTime<FixedOffset>> {
        match self.single(PropertyType::Date)? {
            Value::Date(v) => Ok(v),
            other => Err(RepositoryError::Internal(format!("date conversion produced {other:?}"))),
        }
    }

    /// Binary content of every value, loading it from the backend if only
    /// the length is known.
    pub fn binary(&self, om: &mut ObjectManager) -> RepositoryResult<Vec<Bytes>> {
        om.binary_content(self)
    }

    /// Set a new value through the owning node. `None` removes the property.
    pub fn set_value(
        &self,
        om: &mut ObjectManager,
        value: Option<PropertyValue>,
        property_type: Option<PropertyType>,
    ) -> RepositoryResult<()> {
        self.borrow().core.check_state()?;
        let name = self.name();
        self.parent(om)?.set_property(om, &name, value, property_type)?;
        Ok(())
    }

    /// Remove the property through the owning node.
    pub fn remove(&self, om: &mut ObjectManager) -> RepositoryResult<()> {
        self.set_value(om, None, None)
    }

    pub fn parent(&self, om: &mut ObjectManager) -> RepositoryResult<NodeRef> {
        om.get_node_by_path(&self.parent_path())
    }

    // ------------------------------------------------------------------
    // Crate-internal mutators
    // ------------------------------------------------------------------

    pub(crate) fn check_state(&self) -> RepositoryResult<()> {
        self.borrow().core.check_state()
    }

    /// Assign a locally set value and record the change.
    pub(crate) fn assign(
        &self,
        value: PropertyValue,
        property_type: Option<PropertyType>,
    ) -> RepositoryResult<()> {
        let mut p = self.borrow_mut();
        p.core.check_state()?;
        let (t, v) = typed(value, property_type, Some(p.property_type))?;
        p.property_type = t;
        p.value = RecordValue::Inline(v);
        p.core.set_modified()
    }

    /// Take the backend's value. A length-only record keeps the type and only
    /// refreshes the length, unless a kept local change must survive.
    pub(crate) fn update_from_record(&self, record: &PropertyRecord, keep_changes: bool) {
        let mut p = self.borrow_mut();
        if keep_changes && p.core.state() == ItemState::Modified {
            return;
        }
        match &record.value {
            RecordValue::LengthOnly(_) => {
                p.value = record.value.clone();
            }
            RecordValue::Inline(_) => {
                p.property_type = record.property_type;
                p.value = record.value.clone();
            }
        }
        p.core.set_clean();
    }

    /// Cache loaded binary content without changing the item state.
    pub(crate) fn cache_binary(&self, content: &[Bytes]) {
        let mut p = self.borrow_mut();
        let value = if p.value.is_multiple() {
            PropertyValue::Multiple(content.iter().cloned().map(Value::Binary).collect())
        } else {
            match content.first() {
                Some(b) => PropertyValue::Single(Value::Binary(b.clone())),
                None => PropertyValue::Multiple(Vec::new()),
            }
        };
        p.value = RecordValue::Inline(value);
    }

    pub(crate) fn to_record(&self) -> PropertyRecord {
        self.borrow().to_record()
    }

    pub(crate) fn set_path(&self, path: String) {
        self.borrow_mut().core.set_path(path);
    }

    pub(crate) fn old_path(&self) -> Option<String> {
        self.borrow().core.old_path().map(str::to_string)
    }

    pub(crate) fn set_deleted(&self) {
        self.borrow_mut().core.set_deleted();
    }

    pub(crate) fn set_clean(&self) {
        self.borrow_mut().core.set_clean();
    }

    pub(crate) fn confirm_saved(&self) {
        self.borrow_mut().core.confirm_saved();
    }

    pub(crate) fn clear_old_path(&self) {
        self.borrow_mut().core.clear_old_path();
    }
}

impl fmt::Debug for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(p) => f
                .debug_struct("PropertyRef")
                .field("path", &p.core.path())
                .field("type", &p.property_type)
                .field("state", &p.core.state())
                .finish(),
            Err(_) => f.write_str("PropertyRef(<borrowed>)"),
        }
    }
}
