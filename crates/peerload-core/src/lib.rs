//! Core types and traits for peerload.
//!
//! This crate provides the foundations the rest of the workspace builds on:
//!
//! - `Value`/`Row` for dynamically-typed query results
//! - `Model` and `Entity` traits for struct mapping and result-set tracking
//! - `ResultSet`/`PeerGroup`/`PeerLink`, the sibling-tracking machinery
//! - `Relation`, `ForeignKey` and `ReverseOne`, the lazily-resolved relation fields
//! - `Connection`, the driver seam
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod field;
pub mod model;
pub mod peers;
pub mod relation;
pub mod row;
pub mod value;

pub use connection::{Connection, Dialect};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind,
    RelationError, RelationErrorKind, Result, TypeError,
};
pub use field::{FieldInfo, ReferentialAction};
pub use model::{BaseManager, Entity, Model};
pub use peers::{PeerGroup, PeerLink, ResultSet};
pub use relation::{
    FetchRequest, ForeignKey, Relation, RelationFetcher, RelationInfo, RelationKind,
    RelationSlot, ReverseOne,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::{Value, ValueKey};
