//! Query requests and raw result rows.
//!
//! Backends execute queries; this crate only carries them. A row is an
//! ordered list of named columns, one of which is `jcr:path`.

use crx_types::Value;
use serde::{Deserialize, Serialize};

/// Name of the column that identifies the node of a row.
pub const PATH_COLUMN: &str = "jcr:path";

/// A query to execute on the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub language: String,
    pub statement: String,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

impl Query {
    pub fn new(language: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            statement: statement.into(),
            limit: None,
            offset: None,
        }
    }
}

/// One column of a result row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryColumn {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub selector: Option<String>,
}

impl QueryColumn {
    pub fn new(name: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            name: name.into(),
            value,
            selector: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }
}

/// One raw result row.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    pub columns: Vec<QueryColumn>,
}

impl QueryRow {
    pub fn new(columns: Vec<QueryColumn>) -> Self {
        Self { columns }
    }

    /// Value of the first column with `name`.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.value.as_ref())
    }

    /// The node path of this row, if it has one.
    pub fn path(&self) -> Option<&str> {
        self.value(PATH_COLUMN).and_then(Value::as_str)
    }
}
