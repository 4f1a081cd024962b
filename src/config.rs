//! Plain-data engine configuration: no I/O, a `Default` impl, a handful of
//! tunables the rest of the crate reads rather than hardcodes.

use std::time::Duration;

/// Retry backoff vector used by the retry-with-progress helper and the AI
/// snapshot composer.
pub const DEFAULT_BACKOFFS_MS: &[u64] = &[1000, 2000, 4000, 8000];

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default timeout for [`crate::progress::execute_with_progress`] when
    /// no explicit timeout or parent progress is supplied (30s).
    pub default_progress_timeout: Duration,
    /// Default timeout passed to the runtime adapter's `goto`.
    pub default_navigation_timeout: Duration,
    /// Backoff vector used by the AI snapshot composer and by
    /// `Frame::retry_with_progress_and_timeouts` generally.
    pub ai_snapshot_backoffs_ms: Vec<u64>,
    /// The iframe-availability probe's own timeout.
    pub iframe_availability_timeout: Duration,
    /// The child-frame resolution timeout.
    pub iframe_resolution_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_progress_timeout: Duration::from_secs(30),
            default_navigation_timeout: Duration::from_secs(30),
            ai_snapshot_backoffs_ms: DEFAULT_BACKOFFS_MS.to_vec(),
            iframe_availability_timeout: Duration::from_secs(1),
            iframe_resolution_timeout: Duration::from_secs(3),
        }
    }
}
