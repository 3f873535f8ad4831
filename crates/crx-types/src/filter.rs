//! Name glob filters for child nodes and properties.
//!
//! A glob is one or more `|`-separated patterns. `*` matches any run of
//! characters; every other character matches itself. A name passes the filter
//! if it matches any pattern in any of the globs.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A single glob or a list of globs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameFilter {
    Glob(String),
    Globs(Vec<String>),
}

impl NameFilter {
    fn patterns(&self) -> Vec<&str> {
        let globs: Vec<&str> = match self {
            NameFilter::Glob(g) => vec![g.as_str()],
            NameFilter::Globs(gs) => gs.iter().map(String::as_str).collect(),
        };
        globs
            .into_iter()
            .flat_map(|g| g.split('|'))
            .map(str::trim)
            .collect()
    }

    /// Compile the filter into one anchored regular expression.
    pub fn compile(&self) -> Result<Regex, TypeError> {
        let alternatives: Vec<String> = self
            .patterns()
            .into_iter()
            .map(|p| {
                p.split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(".*")
            })
            .collect();
        let pattern = format!("^(?:{})$", alternatives.join("|"));
        Regex::new(&pattern).map_err(|e| TypeError::InvalidPattern(e.to_string()))
    }

    /// Returns `true` if `name` passes the filter.
    pub fn matches(&self, name: &str) -> Result<bool, TypeError> {
        Ok(self.compile()?.is_match(name))
    }
}

impl From<&str> for NameFilter {
    fn from(g: &str) -> Self {
        NameFilter::Glob(g.to_string())
    }
}

impl From<Vec<&str>> for NameFilter {
    fn from(gs: Vec<&str>) -> Self {
        NameFilter::Globs(gs.into_iter().map(str::to_string).collect())
    }
}

/// Keep the names that pass `filter`, in input order.
///
/// `None` passes every name through unchanged, duplicates included.
pub fn filter_names<S: AsRef<str>>(
    filter: Option<&NameFilter>,
    names: &[S],
) -> Result<Vec<String>, TypeError> {
    let re = filter.map(NameFilter::compile).transpose()?;
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let name = name.as_ref();
        if re.as_ref().map_or(true, |re| re.is_match(name)) {
            out.push(name.to_string());
        }
    }
    Ok(out)
}
