//! Single-valued relations and their lazy, sibling-batched resolution.
//!
//! A relation is declared once per entity type as a [`Relation`] descriptor
//! and backed on each record by a cache slot:
//!
//! - [`ForeignKey<T>`] for many-to-one and one-to-one fields (holds the key
//!   column value plus the slot)
//! - [`ReverseOne<T>`] for the reverse side of a one-to-one
//!
//! The first [`Relation::get`] on any record of a tracked result set resolves
//! the relation for every sibling that still needs it, with one query.
//!
//! ```ignore
//! impl Hero {
//!     pub const TEAM: Relation<Hero, Team> =
//!         Relation::many_to_one("team", "team_id", hero_team).nullable(true);
//! }
//!
//! let heroes = session.objects::<Hero>().all(&cx).await?;
//! for hero in &heroes {
//!     // one query for the whole result set, on the first iteration
//!     let team = Hero::TEAM.get(&cx, &session, hero).await?;
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, OnceLock};

use asupersync::{Cx, Outcome};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Result;
use crate::error::{Error, RelationError, RelationErrorKind};
use crate::field::ReferentialAction;
use crate::model::Entity;
use crate::peers::ResultSet;
use crate::row::Row;
use crate::value::{Value, ValueKey};

/// The kind of a single-valued relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// The source holds a foreign key to the target (`hero.team`).
    ManyToOne,
    /// Like `ManyToOne`, with a unique key column.
    OneToOne,
    /// The target holds a unique foreign key to the source (`team.headquarters`).
    ReverseOneToOne,
}

impl RelationKind {
    /// Whether the key column lives on the source table.
    pub const fn is_forward(self) -> bool {
        matches!(self, RelationKind::ManyToOne | RelationKind::OneToOne)
    }
}

/// Static metadata for one relation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationInfo {
    /// Field name on the source entity
    pub name: &'static str,
    pub kind: RelationKind,
    pub source_table: &'static str,
    pub target_table: &'static str,
    /// Key column: on the source for forward relations, on the target for
    /// reverse ones.
    pub column: &'static str,
    pub nullable: bool,
    pub on_delete: ReferentialAction,
}

impl RelationInfo {
    /// `source_table.name`, for messages.
    pub fn label(&self) -> String {
        format!("{}.{}", self.source_table, self.name)
    }
}

/// One batched fetch, as handed to a [`RelationFetcher`].
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub relation: RelationInfo,
    /// Target column matched against `keys`
    pub column: &'static str,
    /// Distinct, non-null keys
    pub keys: Vec<Value>,
    /// Number of records whose slot this fetch resolves
    pub siblings: usize,
    /// Where the triggering [`Relation::get`] was called
    pub caller: &'static Location<'static>,
}

/// Executes the one query behind a batched resolution.
///
/// This trait lives in `peerload-core` so relations can resolve without
/// depending on the query layer; `peerload-session` implements it for
/// `Session`.
pub trait RelationFetcher: Sync {
    /// Fetch every `T` whose `request.column` is one of `request.keys`.
    ///
    /// The returned set should be built the way `T::BASE_MANAGER` says, so
    /// relations on the fetched targets batch too.
    fn fetch_targets<T: Entity>(
        &self,
        cx: &Cx,
        request: FetchRequest,
    ) -> impl Future<Output = Outcome<ResultSet<T>, Error>> + Send;
}

/// Per-record cache cell for one relation.
///
/// Unset until first resolved; then holds the target or `None` forever.
/// Concurrent writers race benignly: the first write wins and later writes
/// are ignored.
pub struct RelationSlot<T> {
    cell: OnceLock<Option<Arc<T>>>,
}

/// Reverse one-to-one fields are a bare slot; the key is the record's own
/// primary key.
pub type ReverseOne<T> = RelationSlot<T>;

impl<T> RelationSlot<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// A slot that is already resolved.
    pub fn resolved_with(value: Option<Arc<T>>) -> Self {
        let slot = Self::new();
        slot.resolve(value);
        slot
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }

    /// `None` while unset, `Some(None)` when resolved to no target.
    pub fn resolved(&self) -> Option<Option<&Arc<T>>> {
        self.cell.get().map(Option::as_ref)
    }

    /// The cached target, without fetching.
    pub fn get(&self) -> Option<&T> {
        self.cell.get().and_then(|v| v.as_deref())
    }

    /// Resolve the slot. Returns `false` (and changes nothing) if it was
    /// already resolved.
    pub fn resolve(&self, value: Option<Arc<T>>) -> bool {
        self.cell.set(value).is_ok()
    }
}

impl<T> Default for RelationSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for RelationSlot<T> {
    fn clone(&self) -> Self {
        match self.cell.get() {
            Some(value) => Self::resolved_with(value.clone()),
            None => Self::new(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RelationSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            None => f.write_str("Unset"),
            Some(None) => f.write_str("Resolved(None)"),
            Some(Some(v)) => f.debug_tuple("Resolved").field(v).finish(),
        }
    }
}

impl<T> PartialEq for RelationSlot<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<T> Serialize for RelationSlot<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_none()
    }
}

impl<'de, T> Deserialize<'de> for RelationSlot<T> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        IgnoredAny::deserialize(deserializer)?;
        Ok(Self::new())
    }
}

/// A many-to-one or one-to-one field: the key column value plus its cache.
///
/// Serializes as the key alone; a deserialized `ForeignKey` is unresolved.
/// Equality compares keys only.
pub struct ForeignKey<T> {
    key: Option<Value>,
    slot: RelationSlot<T>,
}

impl<T> ForeignKey<T> {
    /// A reference by key. `Value::Null` is treated as no reference.
    pub fn new(key: Option<Value>) -> Self {
        Self {
            key: key.filter(|v| !v.is_null()),
            slot: RelationSlot::new(),
        }
    }

    pub fn from_fk(key: impl Into<Value>) -> Self {
        Self::new(Some(key.into()))
    }

    pub const fn null() -> Self {
        Self {
            key: None,
            slot: RelationSlot::new(),
        }
    }

    /// Read the key column `column` from `row`.
    #[allow(clippy::result_large_err)]
    pub fn decode(row: &Row, column: &str) -> Result<Self> {
        Ok(Self::new(Some(row.get_named::<Value>(column)?)))
    }

    pub fn key(&self) -> Option<&Value> {
        self.key.as_ref()
    }

    /// The key as a value for `to_row`, `Value::Null` when absent.
    pub fn key_value(&self) -> Value {
        self.key.clone().unwrap_or(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        self.key.is_none()
    }

    pub fn slot(&self) -> &RelationSlot<T> {
        &self.slot
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.is_resolved()
    }

    /// The cached target, without fetching.
    pub fn get(&self) -> Option<&T> {
        self.slot.get()
    }
}

impl<T> Default for ForeignKey<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Clone for ForeignKey<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ForeignKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignKey")
            .field("key", &self.key)
            .field("slot", &self.slot)
            .finish()
    }
}

impl<T> PartialEq for ForeignKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Serialize for ForeignKey<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.key.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for ForeignKey<T> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self::new(Option::<Value>::deserialize(deserializer)?))
    }
}

enum Access<S, T> {
    Forward(fn(&S) -> &ForeignKey<T>),
    Reverse(fn(&S) -> &ReverseOne<T>),
}

impl<S, T> Clone for Access<S, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, T> Copy for Access<S, T> {}

/// Descriptor binding a relation field on `S` to target entity `T`.
///
/// Declare one per field, usually as an associated const, and resolve
/// through [`Relation::get`].
pub struct Relation<S, T> {
    info: RelationInfo,
    access: Access<S, T>,
}

impl<S, T> Clone for Relation<S, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, T> Copy for Relation<S, T> {}

impl<S, T> fmt::Debug for Relation<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Relation").field(&self.info).finish()
    }
}

impl<S: Entity, T: Entity> Relation<S, T> {
    const fn build(
        name: &'static str,
        kind: RelationKind,
        column: &'static str,
        access: Access<S, T>,
    ) -> Self {
        Self {
            info: RelationInfo {
                name,
                kind,
                source_table: S::TABLE_NAME,
                target_table: T::TABLE_NAME,
                column,
                nullable: false,
                on_delete: ReferentialAction::NoAction,
            },
            access,
        }
    }

    /// `S.column` references the primary key of `T`.
    pub const fn many_to_one(
        name: &'static str,
        column: &'static str,
        field: fn(&S) -> &ForeignKey<T>,
    ) -> Self {
        Self::build(name, RelationKind::ManyToOne, column, Access::Forward(field))
    }

    /// Unique `S.column` references the primary key of `T`.
    pub const fn one_to_one(
        name: &'static str,
        column: &'static str,
        field: fn(&S) -> &ForeignKey<T>,
    ) -> Self {
        Self::build(name, RelationKind::OneToOne, column, Access::Forward(field))
    }

    /// Unique `T.remote_column` references the primary key of `S`.
    pub const fn reverse_one_to_one(
        name: &'static str,
        remote_column: &'static str,
        field: fn(&S) -> &ReverseOne<T>,
    ) -> Self {
        Self::build(
            name,
            RelationKind::ReverseOneToOne,
            remote_column,
            Access::Reverse(field),
        )
    }

    pub const fn nullable(mut self, nullable: bool) -> Self {
        self.info.nullable = nullable;
        self
    }

    pub const fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.info.on_delete = action;
        self
    }

    pub const fn info(&self) -> RelationInfo {
        self.info
    }

    /// The cache slot for this relation on `record`.
    pub fn slot<'a>(&self, record: &'a S) -> &'a RelationSlot<T> {
        match self.access {
            Access::Forward(field) => field(record).slot(),
            Access::Reverse(field) => field(record),
        }
    }

    /// The key identifying `record`'s target, `None` when null.
    pub fn key(&self, record: &S) -> Option<Value> {
        self.lookup_key(record).map(ValueKey::into_value)
    }

    fn lookup_key(&self, record: &S) -> Option<ValueKey> {
        match self.access {
            Access::Forward(field) => field(record).key().cloned().and_then(Value::into_key),
            Access::Reverse(_) => single_key(record.primary_key_value()),
        }
    }

    /// The key under which a fetched target answers a sibling's lookup.
    fn target_key(&self, target: &T) -> Option<ValueKey> {
        match self.access {
            Access::Forward(_) => single_key(target.primary_key_value()),
            Access::Reverse(_) => target.field_value(self.info.column)?.into_key(),
        }
    }

    /// Column on `T` that fetched rows are matched by.
    #[allow(clippy::result_large_err)]
    fn target_column(&self) -> Result<&'static str> {
        let (keyed_table, pk) = if self.info.kind.is_forward() {
            (T::TABLE_NAME, T::PRIMARY_KEY)
        } else {
            (S::TABLE_NAME, S::PRIMARY_KEY)
        };
        match pk {
            [column] if self.info.kind.is_forward() => Ok(*column),
            [_] => Ok(self.info.column),
            [] => Err(self.error(
                RelationErrorKind::MissingPrimaryKey,
                format!("'{}' declares no primary key", keyed_table),
            )),
            _ => Err(self.error(
                RelationErrorKind::CompositeKey,
                format!("'{}' has a composite primary key", keyed_table),
            )),
        }
    }

    fn error(&self, kind: RelationErrorKind, message: String) -> Error {
        Error::Relation(RelationError {
            kind,
            relation: self.info.label(),
            message,
        })
    }

    /// The cached value: `None` if unresolved, `Some(None)` if resolved to
    /// nothing.
    pub fn cached<'a>(&self, record: &'a S) -> Option<Option<&'a Arc<T>>> {
        self.slot(record).resolved()
    }

    /// Place an already-known `target` in `record`'s slot.
    ///
    /// Only seeds an unresolved slot whose key matches the target. Returns
    /// whether the slot now holds `target`.
    pub fn seed(&self, record: &S, target: Arc<T>) -> bool {
        let matches = match (self.lookup_key(record), self.target_key(&target)) {
            (Some(own), Some(theirs)) => own == theirs,
            _ => false,
        };
        matches && self.slot(record).resolve(Some(target))
    }

    /// Resolve this relation on `record`.
    ///
    /// Cached slots answer immediately. Otherwise every sibling in
    /// `record`'s result set whose slot is still unset is resolved by one
    /// fetch through `fetcher`, and `record`'s value is returned. A failed
    /// fetch writes no slot.
    ///
    /// The call site is captured here and reported with the fetch.
    #[track_caller]
    pub fn get<'a, F>(
        &'a self,
        cx: &'a Cx,
        fetcher: &'a F,
        record: &'a S,
    ) -> impl Future<Output = Outcome<Option<Arc<T>>, Error>> + 'a
    where
        F: RelationFetcher + ?Sized,
    {
        self.resolve(cx, fetcher, record, Location::caller())
    }

    async fn resolve<F>(
        &self,
        cx: &Cx,
        fetcher: &F,
        record: &S,
        caller: &'static Location<'static>,
    ) -> Outcome<Option<Arc<T>>, Error>
    where
        F: RelationFetcher + ?Sized,
    {
        let slot = self.slot(record);
        if let Some(value) = slot.resolved() {
            return Outcome::Ok(value.cloned());
        }

        if self.lookup_key(record).is_none() {
            if !self.info.nullable && self.info.kind.is_forward() {
                tracing::warn!(
                    target: "peerload::relation",
                    relation = %self.info.label(),
                    "NULL key on a non-nullable relation"
                );
            }
            slot.resolve(None);
            return Outcome::Ok(slot.resolved().flatten().cloned());
        }

        let column = match self.target_column() {
            Ok(column) => column,
            Err(e) => return Outcome::Err(e),
        };

        let group = record.peer_link().group();
        let peers = group
            .as_ref()
            .map(|g| g.live_members())
            .unwrap_or_default();
        let mut pending: Vec<&S> = peers
            .iter()
            .map(|peer| &**peer)
            .filter(|peer| !self.slot(peer).is_resolved())
            .collect();
        if !pending.iter().any(|peer| std::ptr::eq(*peer, record)) {
            pending.push(record);
        }

        let mut keyed = Vec::with_capacity(pending.len());
        let mut unkeyed = Vec::new();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for peer in pending {
            match self.lookup_key(peer) {
                Some(key) => {
                    if seen.insert(key.clone()) {
                        keys.push(key.value().clone());
                    }
                    keyed.push((peer, key));
                }
                None => unkeyed.push(peer),
            }
        }

        let group_id = group.as_ref().map_or(0, |g| g.id());
        let siblings = keyed.len() + unkeyed.len();
        let distinct = keys.len();
        tracing::debug!(
            target: "peerload::relation",
            relation = %self.info.label(),
            group = group_id,
            siblings,
            keys = distinct,
            "resolving relation for siblings"
        );

        let request = FetchRequest {
            relation: self.info,
            column,
            keys,
            siblings,
            caller,
        };
        let targets = match fetcher.fetch_targets::<T>(cx, request).await {
            Outcome::Ok(targets) => targets,
            Outcome::Err(e) => {
                tracing::debug!(
                    target: "peerload::relation",
                    relation = %self.info.label(),
                    error = %e,
                    "batched fetch failed; no slot resolved"
                );
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut by_key: HashMap<ValueKey, Arc<T>> = HashMap::with_capacity(targets.len());
        for target in &targets {
            if let Some(key) = self.target_key(target) {
                by_key.entry(key).or_insert_with(|| Arc::clone(target));
            }
        }

        for (peer, key) in &keyed {
            self.slot(peer).resolve(by_key.get(key).cloned());
        }
        for peer in &unkeyed {
            self.slot(peer).resolve(None);
        }

        tracing::debug!(
            target: "peerload::relation",
            relation = %self.info.label(),
            group = group_id,
            rows = targets.len(),
            dangling = distinct.saturating_sub(by_key.len()),
            "relation resolved"
        );

        if let Some(group) = &group {
            if targets.is_tracked() && !targets.is_empty() {
                group.retain(Arc::new(targets));
            }
        }

        Outcome::Ok(slot.resolved().flatten().cloned())
    }
}

fn single_key(mut values: Vec<Value>) -> Option<ValueKey> {
    if values.len() == 1 {
        values.pop().and_then(Value::into_key)
    } else {
        None
    }
}
