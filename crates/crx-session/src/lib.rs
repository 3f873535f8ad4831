//! Session-scoped object management for crx.
//!
//! A [`Session`] mediates between in-memory items and a [`Transport`]
//! backend. Its [`ObjectManager`] keeps exactly one [`NodeRef`] per path,
//! records every local change, and replays the changes in a consistent
//! order on save: deletes, then moves, then creates, then updates.
//!
//! ```no_run
//! use std::sync::Arc;
//! use crx_session::{Session, SessionConfig};
//! use crx_transport::InMemoryTransport;
//! use crx_types::PropertyValue;
//!
//! # fn main() -> crx_session::RepositoryResult<()> {
//! let mut session = Session::login(Arc::new(InMemoryTransport::new()), &SessionConfig::default())?;
//! let root = session.root_node()?;
//! let om = session.object_manager()?;
//! let page = root.add_node(om, "page", None)?;
//! page.set_property(om, "title", Some(PropertyValue::from("Hello")), None)?;
//! session.save()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`session`]: the [`Session`] façade
//! - [`object_manager`]: identity map, pending changes and the save algorithm
//! - [`node`] / [`property`]: item handles and their state machine
//! - [`item`]: [`Item`] and [`ItemState`]
//! - [`node_type`]: cached node type definitions
//! - [`query`]: [`QueryResult`] and the lazy [`NodeIterator`]
//! - [`status`]: [`PendingChanges`] summaries
//! - [`config`]: [`SessionConfig`], loadable from TOML
//! - [`error`]: [`RepositoryError`]
//!
//! [`Transport`]: crx_transport::Transport

pub mod config;
pub mod error;
pub mod item;
pub mod node;
pub mod node_type;
pub mod object_manager;
pub mod property;
pub mod query;
pub mod session;
pub mod status;

pub use config::SessionConfig;
pub use error::{RepositoryError, RepositoryResult};
pub use item::{Item, ItemState};
pub use node::{Node, NodeRef, PropertyContent, MIXIN_TYPES, PRIMARY_TYPE, UUID};
pub use node_type::NodeTypeManager;
pub use object_manager::ObjectManager;
pub use property::{Property, PropertyRef};
pub use query::{NodeIterator, QueryResult};
pub use session::Session;
pub use status::{ChangeEntry, PendingChanges};
