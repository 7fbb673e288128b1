//! Session configuration.

/// Configuration for [`Session`](crate::Session) behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Whether relation fetches are counted by the fetch tracker.
    pub track_fetches: bool,
    /// Number of single-record fetches per relation before the tracker warns.
    pub n1_threshold: usize,
    /// Split batched `IN` lists into chunks of at most this many keys.
    ///
    /// Useful for drivers with a bound-parameter limit (SQLite: 999 or
    /// 32766 depending on build).
    pub max_batch_size: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            track_fetches: true,
            n1_threshold: 3,
            max_batch_size: None,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn track_fetches(mut self, value: bool) -> Self {
        self.track_fetches = value;
        self
    }

    #[must_use]
    pub fn n1_threshold(mut self, threshold: usize) -> Self {
        self.n1_threshold = threshold;
        self
    }

    /// Cap the number of keys per batched query. Zero means no cap.
    #[must_use]
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = (size > 0).then_some(size);
        self
    }

    /// Key chunk size for one batched fetch of `total` keys.
    pub(crate) fn chunk_size(&self, total: usize) -> usize {
        self.max_batch_size.unwrap_or(total).max(1)
    }
}
