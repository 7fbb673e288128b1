//! N+1 detection for relation fetches.
//!
//! Tracked result sets resolve a relation for every sibling with one query,
//! so a healthy workload records a handful of *batched* fetches. Records
//! that lost their siblings (untracked managers, standalone records, dropped
//! result sets, deserialized copies) fall back to one query per record; the
//! tracker counts those *single* fetches and warns when a relation keeps
//! producing them. The first [`MAX_CALL_SITES`] single fetches of each
//! relation keep the location of the `Relation::get` call behind them.
//!
//! ```ignore
//! session.enable_fetch_tracking(3);
//!
//! for hero in heroes.to_vec() {
//!     // fine while `heroes` is alive: one query total
//!     Hero::TEAM.get(&cx, &session, &hero).await;
//! }
//!
//! let stats = session.fetch_stats();
//! assert_eq!(stats.single_fetches, 0);
//! ```

use std::collections::HashMap;
use std::panic::Location;

use serde::Serialize;

/// Counters for one `(entity, relation)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelationCounts {
    /// Fetches that resolved two or more records
    pub batched: usize,
    /// Fetches that resolved exactly one record
    pub single: usize,
    /// Target rows returned across all fetches
    pub rows: usize,
}

impl RelationCounts {
    pub fn total(&self) -> usize {
        self.batched + self.single
    }
}

/// Call sites kept per `(entity, relation)` pair.
pub const MAX_CALL_SITES: usize = 5;

/// Where a single-record fetch was triggered.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub entity: &'static str,
    pub relation: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub timestamp: std::time::Instant,
}

/// Snapshot of tracker state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub total_fetches: usize,
    pub batched_fetches: usize,
    pub single_fetches: usize,
    pub rows: usize,
    /// Distinct `(entity, relation)` pairs fetched
    pub relations: usize,
    /// Pairs whose single fetches reached the threshold
    pub potential_n1: usize,
}

/// Counts relation fetches per `(entity, relation)`.
#[derive(Debug)]
pub struct FetchTracker {
    counts: HashMap<(&'static str, &'static str), RelationCounts>,
    threshold: usize,
    enabled: bool,
    call_sites: Vec<CallSite>,
}

impl Default for FetchTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchTracker {
    /// Enabled tracker with a threshold of 3.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            threshold: 3,
            enabled: true,
            call_sites: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// [`FetchTracker::record_at`] with the caller's location.
    #[track_caller]
    pub fn record(
        &mut self,
        entity: &'static str,
        relation: &'static str,
        siblings: usize,
        rows: usize,
    ) {
        self.record_at(entity, relation, siblings, rows, Location::caller());
    }

    /// Record one fetch that resolved `siblings` records and returned `rows`,
    /// triggered from `caller`.
    ///
    /// Warns once per pair when its single-record fetches reach the threshold.
    pub fn record_at(
        &mut self,
        entity: &'static str,
        relation: &'static str,
        siblings: usize,
        rows: usize,
        caller: &'static Location<'static>,
    ) {
        if !self.enabled {
            return;
        }

        let counts = self.counts.entry((entity, relation)).or_default();
        counts.rows += rows;
        if siblings > 1 {
            counts.batched += 1;
            return;
        }
        counts.single += 1;
        let single = counts.single;

        if single <= MAX_CALL_SITES {
            self.call_sites.push(CallSite {
                entity,
                relation,
                file: caller.file(),
                line: caller.line(),
                timestamp: std::time::Instant::now(),
            });
        }

        if single == self.threshold {
            self.emit_warning(entity, relation, single);
        }
    }

    fn emit_warning(&self, entity: &'static str, relation: &'static str, count: usize) {
        tracing::warn!(
            target: "peerload::n1",
            entity,
            relation,
            single_fetches = count,
            threshold = self.threshold,
            "relation resolved one record at a time; records are not batching with their siblings"
        );

        let sites = self
            .call_sites
            .iter()
            .filter(|s| s.entity == entity && s.relation == relation);
        for (i, site) in sites.enumerate() {
            tracing::debug!(
                target: "peerload::n1",
                index = i,
                file = site.file,
                line = site.line,
                "  [{}] {}:{}",
                i,
                site.file,
                site.line
            );
        }
    }

    /// Clear all counts and call sites. The threshold and enabled flag stay.
    pub fn reset(&mut self) {
        self.counts.clear();
        self.call_sites.clear();
    }

    #[must_use]
    pub fn counts_for(&self, entity: &'static str, relation: &'static str) -> RelationCounts {
        self.counts
            .get(&(entity, relation))
            .copied()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn stats(&self) -> FetchStats {
        let mut stats = FetchStats {
            relations: self.counts.len(),
            ..FetchStats::default()
        };
        for counts in self.counts.values() {
            stats.batched_fetches += counts.batched;
            stats.single_fetches += counts.single;
            stats.rows += counts.rows;
            if self.threshold > 0 && counts.single >= self.threshold {
                stats.potential_n1 += 1;
            }
        }
        stats.total_fetches = stats.batched_fetches + stats.single_fetches;
        stats
    }

    #[must_use]
    pub fn call_sites(&self) -> &[CallSite] {
        &self.call_sites
    }
}
