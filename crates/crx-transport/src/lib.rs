//! The backend boundary of crx.
//!
//! A session never talks to storage directly. Every read and write goes
//! through the [`Transport`] trait, which exchanges plain records rather than
//! session objects so that backends stay independent of the item model.
//!
//! # Modules
//!
//! - [`error`]: [`TransportError`] with one variant per failure kind
//! - [`record`]: [`NodeRecord`], [`PropertyRecord`], [`RecordValue`] and [`NodeWrite`]
//! - [`node_type`]: node type definitions served by backends
//! - [`query`]: [`Query`] requests and raw [`QueryRow`] results
//! - [`traits`]: the [`Transport`] trait and [`Credentials`]
//! - [`memory`]: [`InMemoryTransport`], a reference backend used by tests and the CLI

pub mod error;
pub mod memory;
pub mod node_type;
pub mod query;
pub mod record;
pub mod traits;

pub use error::{TransportError, TransportResult};
pub use memory::{InMemoryTransport, TransportCall};
pub use node_type::{ChildNodeDefinition, NodeTypeDefinition, PropertyDefinition};
pub use query::{Query, QueryColumn, QueryRow};
pub use record::{NodeRecord, NodeWrite, PropertyRecord, RecordValue};
pub use traits::{Credentials, Transport};
