//! Result-set tracking.
//!
//! A [`ResultSet`] is what one query execution returns. When tracked, it owns
//! a [`PeerGroup`] and every record holds a [`PeerLink`] back to that group.
//! The ownership graph is one-directional:
//!
//! ```text
//! ResultSet --strong--> records
//! ResultSet --strong--> PeerGroup --weak--> records
//! record --PeerLink (weak)--> PeerGroup
//! ```
//!
//! Dropping the `ResultSet` drops the group; records the caller still holds
//! keep working and simply stop batching.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Index;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::{BaseManager, Entity};

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// The records materialized by one query execution.
pub struct PeerGroup<M> {
    id: u64,
    members: Vec<Weak<M>>,
    /// Result sets fetched on behalf of this group (relation targets).
    /// Holding them keeps chained relations batching while this group lives.
    retained: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,
}

impl<M> PeerGroup<M> {
    fn new(records: &[Arc<M>]) -> Self {
        Self {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            members: records.iter().map(Arc::downgrade).collect(),
            retained: Mutex::new(Vec::new()),
        }
    }

    /// Process-unique id, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of records the query produced.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members that have not been dropped, in query order.
    pub fn live_members(&self) -> Vec<Arc<M>> {
        self.members.iter().filter_map(Weak::upgrade).collect()
    }

    /// Keep `value` alive for as long as this group is alive.
    pub fn retain<R: Any + Send + Sync>(&self, value: Arc<R>) {
        self.retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
    }

    pub fn retained_count(&self) -> usize {
        self.retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<M> fmt::Debug for PeerGroup<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerGroup")
            .field("id", &self.id)
            .field("members", &self.members.len())
            .field("retained", &self.retained_count())
            .finish()
    }
}

/// A record's non-owning back-reference to its [`PeerGroup`].
///
/// Set at most once. Clones, deserialized copies and default values start
/// unlinked. Two links always compare equal and hash to nothing, so the
/// link never changes a model's `PartialEq`/`Hash`.
pub struct PeerLink<M> {
    group: OnceLock<Weak<PeerGroup<M>>>,
}

impl<M> PeerLink<M> {
    pub const fn new() -> Self {
        Self {
            group: OnceLock::new(),
        }
    }

    /// Link to `group`. Returns `false` if this link was already set.
    pub fn attach(&self, group: &Arc<PeerGroup<M>>) -> bool {
        self.group.set(Arc::downgrade(group)).is_ok()
    }

    /// The group, if this record came from a query and the group is alive.
    pub fn group(&self) -> Option<Arc<PeerGroup<M>>> {
        self.group.get().and_then(Weak::upgrade)
    }

    /// Whether a group was ever attached (alive or not).
    pub fn is_attached(&self) -> bool {
        self.group.get().is_some()
    }
}

impl<M> Default for PeerLink<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for PeerLink<M> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for PeerLink<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.group() {
            Some(group) => write!(f, "PeerLink(group {})", group.id()),
            None if self.is_attached() => f.write_str("PeerLink(dropped)"),
            None => f.write_str("PeerLink(none)"),
        }
    }
}

impl<M> PartialEq for PeerLink<M> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<M> Eq for PeerLink<M> {}

impl<M> Hash for PeerLink<M> {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

impl<M> Serialize for PeerLink<M> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_none()
    }
}

impl<'de, M> Deserialize<'de> for PeerLink<M> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        IgnoredAny::deserialize(deserializer)?;
        Ok(Self::new())
    }
}

/// The ordered output of one query execution.
///
/// This is the handle callers keep; it owns the records and, when tracked,
/// the [`PeerGroup`] that lets relation access batch across them.
pub struct ResultSet<M: Entity> {
    records: Vec<Arc<M>>,
    group: Option<Arc<PeerGroup<M>>>,
}

impl<M: Entity> ResultSet<M> {
    /// Wrap `models` and link every record to one new group.
    pub fn tracked(models: Vec<M>) -> Self {
        let records: Vec<Arc<M>> = models.into_iter().map(Arc::new).collect();
        let group = Arc::new(PeerGroup::new(&records));
        for record in &records {
            if !record.peer_link().attach(&group) {
                tracing::warn!(
                    target: "peerload::peers",
                    entity = M::TABLE_NAME,
                    group = group.id(),
                    "record already belongs to a result set; it will not batch with this one"
                );
            }
        }
        tracing::trace!(
            target: "peerload::peers",
            entity = M::TABLE_NAME,
            group = group.id(),
            records = records.len(),
            "tracked result set"
        );
        Self {
            records,
            group: Some(group),
        }
    }

    /// Wrap `models` without linking them. Relation access fetches per record.
    pub fn untracked(models: Vec<M>) -> Self {
        Self {
            records: models.into_iter().map(Arc::new).collect(),
            group: None,
        }
    }

    /// Build the way `manager` would.
    pub fn with_manager(models: Vec<M>, manager: BaseManager) -> Self {
        match manager {
            BaseManager::Tracking => Self::tracked(models),
            BaseManager::Plain => Self::untracked(models),
        }
    }

    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            group: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_tracked(&self) -> bool {
        self.group.is_some()
    }

    pub fn group(&self) -> Option<&Arc<PeerGroup<M>>> {
        self.group.as_ref()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<M>> {
        self.records.get(index)
    }

    pub fn first(&self) -> Option<&Arc<M>> {
        self.records.first()
    }

    pub fn records(&self) -> &[Arc<M>] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<M>> {
        self.records.iter()
    }

    /// Copy out the record handles. The copies keep batching only while
    /// this result set (or another holder of its group) is alive.
    pub fn to_vec(&self) -> Vec<Arc<M>> {
        self.records.clone()
    }
}

impl<M: Entity> Clone for ResultSet<M> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
            group: self.group.clone(),
        }
    }
}

impl<M: Entity> Default for ResultSet<M> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<M: Entity> Index<usize> for ResultSet<M> {
    type Output = Arc<M>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.records[index]
    }
}

impl<'a, M: Entity> IntoIterator for &'a ResultSet<M> {
    type Item = &'a Arc<M>;
    type IntoIter = std::slice::Iter<'a, Arc<M>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl<M: Entity + fmt::Debug> fmt::Debug for ResultSet<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("group", &self.group.as_ref().map(|g| g.id()))
            .field("records", &self.records)
            .finish()
    }
}
