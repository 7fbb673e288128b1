//! Model and entity traits.
//!
//! [`Model`] maps a struct to a table. [`Entity`] is the opt-in that lets
//! the records of a model remember which query produced them, so relation
//! access can batch across siblings.

use crate::Result;
use crate::field::FieldInfo;
use crate::peers::PeerLink;
use crate::relation::RelationInfo;
use crate::row::Row;
use crate::value::Value;

/// Trait for types that can be mapped to database tables.
///
/// # Example
///
/// ```ignore
/// impl Model for Team {
///     const TABLE_NAME: &'static str = "teams";
///     const PRIMARY_KEY: &'static [&'static str] = &["id"];
///
///     fn fields() -> &'static [FieldInfo] { &[] }
///
///     fn to_row(&self) -> Vec<(&'static str, Value)> {
///         vec![("id", Value::BigInt(self.id)), ("name", self.name.clone().into())]
///     }
///
///     fn from_row(row: &Row) -> Result<Self> {
///         Ok(Self { id: row.get_named("id")?, name: row.get_named("name")?, peers: PeerLink::new() })
///     }
///
///     fn primary_key_value(&self) -> Vec<Value> { vec![Value::BigInt(self.id)] }
/// }
/// ```
pub trait Model: Sized + Send + Sync {
    /// The name of the database table.
    const TABLE_NAME: &'static str;

    /// The primary key column name(s).
    const PRIMARY_KEY: &'static [&'static str];

    /// Relation metadata for this model.
    ///
    /// Models with no relations can rely on the default empty slice.
    const RELATIONSHIPS: &'static [RelationInfo] = &[];

    /// Get field metadata for all columns.
    fn fields() -> &'static [FieldInfo];

    /// Convert this model instance to a row of values.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct a model instance from a database row.
    #[allow(clippy::result_large_err)]
    fn from_row(row: &Row) -> Result<Self>;

    /// Get the value of the primary key field(s).
    fn primary_key_value(&self) -> Vec<Value>;

    /// Get a column value by name.
    ///
    /// The default goes through [`Model::to_row`]; override it when that is
    /// expensive.
    fn field_value(&self, column: &str) -> Option<Value> {
        self.to_row()
            .into_iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }
}

/// Which manager executes relation traversal for an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaseManager {
    /// Results are wrapped in tracked result sets and batch on access.
    #[default]
    Tracking,
    /// Results are returned untracked; every relation access fetches alone.
    Plain,
}

impl BaseManager {
    pub const fn name(self) -> &'static str {
        match self {
            BaseManager::Tracking => "tracking",
            BaseManager::Plain => "plain",
        }
    }

    pub const fn is_tracking(self) -> bool {
        matches!(self, BaseManager::Tracking)
    }
}

/// A model whose records carry a link to the result set that produced them.
///
/// Implementors hold a [`PeerLink<Self>`] field and return it from
/// [`Entity::peer_link`]. The link is invisible to equality, hashing and
/// serialization.
pub trait Entity: Model + 'static {
    /// Manager used when this entity is reached through a relation.
    const BASE_MANAGER: BaseManager = BaseManager::Tracking;

    fn peer_link(&self) -> &PeerLink<Self>;
}
