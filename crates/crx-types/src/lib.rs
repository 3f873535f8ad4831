//! Foundation types for crx, a session-scoped content repository client.
//!
//! This crate provides the value, path and naming primitives shared by the
//! transport boundary and the session layer. Every other crx crate depends on
//! `crx-types`.
//!
//! # Key Types
//!
//! - [`PropertyType`]: the fixed enumeration of repository property types
//! - [`Value`]: a single typed property value
//! - [`PropertyValue`]: a scalar or multi-valued property value
//! - [`BinaryLength`]: byte length(s) of a binary property not yet loaded
//! - [`NameFilter`]: glob filter applied to child node and property names
//!
//! # Paths
//!
//! The [`path`] module holds the string-level path algebra: normalization of
//! `.`/`..` segments, absolute path construction, ancestry checks and prefix
//! rebasing used when nodes move.

pub mod error;
pub mod filter;
pub mod path;
pub mod value;

pub use error::TypeError;
pub use filter::{filter_names, NameFilter};
pub use value::{BinaryLength, PropertyType, PropertyValue, Value};
