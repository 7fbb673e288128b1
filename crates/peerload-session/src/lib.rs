//! Session, managers and batched relation fetching for peerload.
//!
//! `peerload-session` is the **execution layer**. A [`Session`] owns a
//! `Connection`, hands out per-entity [`Manager`]s, and implements
//! `RelationFetcher` so relation descriptors can resolve through it.
//!
//! # Role In The Architecture
//!
//! - **Managers**: `session.objects::<M>()` runs queries into tracked result
//!   sets; reverse traversal and fetched relation targets follow
//!   `M::BASE_MANAGER`.
//! - **Batched fetching**: one `IN` query per relation resolution, optionally
//!   chunked for drivers with parameter limits.
//! - **N+1 detection**: every fetch is counted; relations that keep
//!   resolving one record at a time are reported under `peerload::n1`.
//! - **Checks**: [`check_entity`] validates entity declarations up front.
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(conn);
//!
//! let heroes = session.objects::<Hero>().all(&cx).await?;
//! for hero in &heroes {
//!     // first iteration fetches the team of every hero in one query
//!     let team = Hero::TEAM.get(&cx, &session, hero).await?;
//! }
//! ```

pub mod checks;
pub mod config;
pub mod manager;
pub mod n1_detection;

pub use checks::{CheckLevel, CheckMessage, check_entity};
pub use config::SessionConfig;
pub use manager::Manager;
pub use n1_detection::{CallSite, FetchStats, FetchTracker, MAX_CALL_SITES, RelationCounts};

use std::sync::{Mutex, PoisonError};

use peerload_core::{
    Connection, Cx, Entity, Error, FetchRequest, Outcome, RelationFetcher, ResultSet,
};
use peerload_query::{Expr, Select};

/// A connection plus the bookkeeping relation resolution needs.
///
/// `Session` is `Sync`: relation access only needs `&Session`, so records
/// may resolve relations from concurrent tasks sharing one session.
pub struct Session<C: Connection> {
    connection: C,
    config: SessionConfig,
    tracker: Mutex<FetchTracker>,
}

impl<C: Connection> Session<C> {
    pub fn new(connection: C) -> Self {
        Self::with_config(connection, SessionConfig::default())
    }

    pub fn with_config(connection: C, config: SessionConfig) -> Self {
        let mut tracker = FetchTracker::new().with_threshold(config.n1_threshold);
        if !config.track_fetches {
            tracker.disable();
        }
        Self {
            connection,
            config,
            tracker: Mutex::new(tracker),
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Query entry point for `M`.
    pub fn objects<M: Entity>(&self) -> Manager<'_, C, M> {
        Manager::new(self)
    }

    /// Turn fetch tracking on with a new warning threshold.
    pub fn enable_fetch_tracking(&self, threshold: usize) {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        tracker.set_threshold(threshold);
        tracker.enable();
    }

    pub fn disable_fetch_tracking(&self) {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .disable();
    }

    #[must_use]
    pub fn fetch_stats(&self) -> FetchStats {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats()
    }

    /// Where single-record fetches were triggered, up to
    /// [`MAX_CALL_SITES`] per relation.
    #[must_use]
    pub fn fetch_call_sites(&self) -> Vec<CallSite> {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .call_sites()
            .to_vec()
    }

    /// Reset fetch counts, e.g. at the start of a request.
    pub fn reset_fetch_stats(&self) {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }

    /// Fetch every `T` whose `request.column` is one of `request.keys`.
    ///
    /// Keys are split by `max_batch_size`; all chunks land in one result
    /// set built per `T::BASE_MANAGER`.
    #[tracing::instrument(
        level = "debug",
        skip(self, cx, request),
        fields(
            relation = %request.relation.label(),
            keys = request.keys.len(),
            siblings = request.siblings
        )
    )]
    pub async fn fetch_by_keys<T: Entity>(
        &self,
        cx: &Cx,
        request: FetchRequest,
    ) -> Outcome<ResultSet<T>, Error> {
        if request.keys.is_empty() {
            return Outcome::Ok(ResultSet::empty());
        }

        let chunk_size = self.config.chunk_size(request.keys.len());
        let mut models = Vec::with_capacity(request.keys.len());
        let mut queries = 0_usize;
        for chunk in request.keys.chunks(chunk_size) {
            let select = Select::<T>::new().filter(Expr::col(request.column).in_list(chunk.to_vec()));
            queries += 1;
            match select.all(cx, &self.connection).await {
                Outcome::Ok(batch) => models.extend(batch),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        let rows = models.len();
        tracing::debug!(queries, rows, "fetched relation targets");

        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_at(
                request.relation.source_table,
                request.relation.name,
                request.siblings,
                rows,
                request.caller,
            );

        Outcome::Ok(ResultSet::with_manager(models, T::BASE_MANAGER))
    }
}

impl<C: Connection> RelationFetcher for Session<C> {
    fn fetch_targets<T: Entity>(
        &self,
        cx: &Cx,
        request: FetchRequest,
    ) -> impl Future<Output = Outcome<ResultSet<T>, Error>> + Send {
        self.fetch_by_keys::<T>(cx, request)
    }
}
