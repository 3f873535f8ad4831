//! Records exchanged between a session and its backend.
//!
//! A [`NodeRecord`] is what a backend returns for one node: its types, its
//! properties, and the names of its children. Children are never expanded;
//! the session fetches them on demand.

use crx_types::{BinaryLength, PropertyType, PropertyValue};
use serde::{Deserialize, Serialize};

/// The value part of a [`PropertyRecord`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RecordValue {
    /// The full value.
    Inline(PropertyValue),
    /// A binary whose content was not transferred, only its length.
    LengthOnly(BinaryLength),
}

impl RecordValue {
    /// Returns `true` if only the binary length was transferred.
    pub fn is_length_only(&self) -> bool {
        matches!(self, RecordValue::LengthOnly(_))
    }

    /// Returns `true` for multi-valued content.
    pub fn is_multiple(&self) -> bool {
        match self {
            RecordValue::Inline(v) => v.is_multiple(),
            RecordValue::LengthOnly(l) => l.is_multiple(),
        }
    }
}

/// One property of a node, with its declared type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub name: String,
    pub property_type: PropertyType,
    pub value: RecordValue,
}

impl PropertyRecord {
    /// Create an inline property record.
    pub fn new(
        name: impl Into<String>,
        property_type: PropertyType,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self {
            name: name.into(),
            property_type,
            value: RecordValue::Inline(value.into()),
        }
    }

    /// Create a length-only binary record.
    pub fn length_only(name: impl Into<String>, length: BinaryLength) -> Self {
        Self {
            name: name.into(),
            property_type: PropertyType::Binary,
            value: RecordValue::LengthOnly(length),
        }
    }
}

/// The stored representation of one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub primary_type: String,
    #[serde(default)]
    pub mixin_types: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyRecord>,
    /// Child node names in document order.
    #[serde(default)]
    pub children: Vec<String>,
}

impl NodeRecord {
    /// Create a record with no properties or children.
    pub fn new(primary_type: impl Into<String>) -> Self {
        Self {
            primary_type: primary_type.into(),
            mixin_types: Vec::new(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style: add a property.
    pub fn with_property(mut self, property: PropertyRecord) -> Self {
        self.properties.push(property);
        self
    }

    /// Builder-style: add a mixin type.
    pub fn with_mixin(mut self, mixin: impl Into<String>) -> Self {
        self.mixin_types.push(mixin.into());
        self
    }

    /// Builder-style: add a child name.
    pub fn with_child(mut self, name: impl Into<String>) -> Self {
        self.children.push(name.into());
        self
    }

    /// Look up a property record by name.
    pub fn property(&self, name: &str) -> Option<&PropertyRecord> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// A new node to create, together with its whole new subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeWrite {
    pub path: String,
    pub record: NodeRecord,
    pub children: Vec<NodeWrite>,
}

impl NodeWrite {
    /// Paths of this node and every node below it, parents first.
    pub fn paths(&self) -> Vec<String> {
        let mut out = vec![self.path.clone()];
        for child in &self.children {
            out.extend(child.paths());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_parts() {
        let record = NodeRecord::new("nt:unstructured")
            .with_mixin("mix:referenceable")
            .with_property(PropertyRecord::new("title", PropertyType::String, "x"))
            .with_child("child");
        assert_eq!(record.mixin_types, vec!["mix:referenceable"]);
        assert_eq!(record.children, vec!["child"]);
        assert_eq!(
            record.property("title").map(|p| &p.value),
            Some(&RecordValue::Inline(PropertyValue::from("x")))
        );
        assert!(record.property("missing").is_none());
    }

    #[test]
    fn length_only_records_are_binary() {
        let p = PropertyRecord::length_only("data", BinaryLength::Multiple(vec![1, 2]));
        assert_eq!(p.property_type, PropertyType::Binary);
        assert!(p.value.is_length_only());
        assert!(p.value.is_multiple());
    }

    #[test]
    fn node_write_paths_are_parent_first() {
        let write = NodeWrite {
            path: "/a".into(),
            record: NodeRecord::new("nt:unstructured").with_child("b"),
            children: vec![NodeWrite {
                path: "/a/b".into(),
                record: NodeRecord::new("nt:unstructured"),
                children: vec![],
            }],
        };
        assert_eq!(write.paths(), vec!["/a", "/a/b"]);
    }

    #[test]
    fn record_json_defaults_missing_lists() {
        let record: NodeRecord = serde_json::from_str(r#"{"primary_type":"nt:folder"}"#).unwrap();
        assert!(record.properties.is_empty());
        assert!(record.children.is_empty());
    }
}
