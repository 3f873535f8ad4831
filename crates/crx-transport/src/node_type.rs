//! Node type definitions.
//!
//! Backends own the type system; sessions fetch definitions through
//! [`Transport::get_node_types`](crate::Transport::get_node_types) and cache
//! them. [`builtin_node_types`] is the small standard set every backend in
//! this workspace serves.

use crx_types::PropertyType;
use serde::{Deserialize, Serialize};

/// Definition of a child node slot in a node type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildNodeDefinition {
    /// Child name, or `*` for any name.
    pub name: String,
    #[serde(default)]
    pub required_primary_types: Vec<String>,
    #[serde(default)]
    pub default_primary_type: Option<String>,
    #[serde(default)]
    pub auto_created: bool,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub protected: bool,
}

impl ChildNodeDefinition {
    /// A residual (`*`) definition with a default type.
    pub fn residual(default_primary_type: Option<&str>) -> Self {
        Self {
            name: "*".to_string(),
            required_primary_types: vec!["nt:base".to_string()],
            default_primary_type: default_primary_type.map(str::to_string),
            auto_created: false,
            mandatory: false,
            protected: false,
        }
    }
}

/// Definition of a property slot in a node type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub required_type: PropertyType,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub auto_created: bool,
    #[serde(default)]
    pub protected: bool,
}

impl PropertyDefinition {
    fn new(name: &str, required_type: PropertyType) -> Self {
        Self {
            name: name.to_string(),
            required_type,
            multiple: false,
            mandatory: false,
            auto_created: false,
            protected: false,
        }
    }
}

/// A node type as served by a backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTypeDefinition {
    pub name: String,
    #[serde(default)]
    pub is_mixin: bool,
    #[serde(default)]
    pub is_abstract: bool,
    /// Direct supertypes.
    #[serde(default)]
    pub supertypes: Vec<String>,
    #[serde(default)]
    pub child_node_definitions: Vec<ChildNodeDefinition>,
    #[serde(default)]
    pub property_definitions: Vec<PropertyDefinition>,
    #[serde(default)]
    pub primary_item_name: Option<String>,
}

impl NodeTypeDefinition {
    /// A concrete primary type with `nt:base` as its only supertype.
    pub fn primary(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_mixin: false,
            is_abstract: false,
            supertypes: if name == "nt:base" {
                Vec::new()
            } else {
                vec!["nt:base".to_string()]
            },
            child_node_definitions: Vec::new(),
            property_definitions: Vec::new(),
            primary_item_name: None,
        }
    }

    /// A mixin type with no supertypes.
    pub fn mixin(name: &str) -> Self {
        Self {
            is_mixin: true,
            supertypes: Vec::new(),
            ..Self::primary(name)
        }
    }
}

/// The standard node types served by the in-memory backend.
pub fn builtin_node_types() -> Vec<NodeTypeDefinition> {
    let mut base = NodeTypeDefinition::primary("nt:base");
    base.is_abstract = true;
    base.property_definitions = vec![
        PropertyDefinition {
            mandatory: true,
            auto_created: true,
            protected: true,
            ..PropertyDefinition::new("jcr:primaryType", PropertyType::Name)
        },
        PropertyDefinition {
            multiple: true,
            protected: true,
            ..PropertyDefinition::new("jcr:mixinTypes", PropertyType::Name)
        },
    ];

    let mut unstructured = NodeTypeDefinition::primary("nt:unstructured");
    unstructured.child_node_definitions =
        vec![ChildNodeDefinition::residual(Some("nt:unstructured"))];
    unstructured.property_definitions = vec![
        PropertyDefinition::new("*", PropertyType::Undefined),
        PropertyDefinition {
            multiple: true,
            ..PropertyDefinition::new("*", PropertyType::Undefined)
        },
    ];

    let mut hierarchy = NodeTypeDefinition::primary("nt:hierarchyNode");
    hierarchy.is_abstract = true;

    let mut folder = NodeTypeDefinition::primary("nt:folder");
    folder.supertypes = vec!["nt:hierarchyNode".to_string()];
    folder.child_node_definitions = vec![ChildNodeDefinition {
        required_primary_types: vec!["nt:hierarchyNode".to_string()],
        ..ChildNodeDefinition::residual(None)
    }];

    let mut file = NodeTypeDefinition::primary("nt:file");
    file.supertypes = vec!["nt:hierarchyNode".to_string()];
    file.primary_item_name = Some("jcr:content".to_string());
    file.child_node_definitions = vec![ChildNodeDefinition {
        name: "jcr:content".to_string(),
        mandatory: true,
        ..ChildNodeDefinition::residual(None)
    }];

    let mut resource = NodeTypeDefinition::primary("nt:resource");
    resource.primary_item_name = Some("jcr:data".to_string());
    resource.property_definitions = vec![
        PropertyDefinition {
            mandatory: true,
            ..PropertyDefinition::new("jcr:data", PropertyType::Binary)
        },
        PropertyDefinition::new("jcr:mimeType", PropertyType::String),
        PropertyDefinition::new("jcr:lastModified", PropertyType::Date),
    ];

    let mut root = NodeTypeDefinition::primary("rep:root");
    root.supertypes = vec!["nt:unstructured".to_string()];
    root.child_node_definitions = vec![ChildNodeDefinition::residual(None)];

    let mut referenceable = NodeTypeDefinition::mixin("mix:referenceable");
    referenceable.property_definitions = vec![PropertyDefinition {
        mandatory: true,
        auto_created: true,
        protected: true,
        ..PropertyDefinition::new("jcr:uuid", PropertyType::String)
    }];

    let mut versionable = NodeTypeDefinition::mixin("mix:versionable");
    versionable.supertypes = vec!["mix:referenceable".to_string()];
    versionable.property_definitions = vec![PropertyDefinition {
        protected: true,
        ..PropertyDefinition::new("jcr:isCheckedOut", PropertyType::Boolean)
    }];

    vec![
        base,
        unstructured,
        hierarchy,
        folder,
        file,
        resource,
        root,
        referenceable,
        versionable,
    ]
}
