use std::path::PathBuf;
use std::time::Duration;

/// Intersection-ratio thresholds the host should register so both "just
/// became visible" and "just became hidden" edges around the visibility
/// threshold are reported precisely.
pub const INTERSECTION_THRESHOLDS: [f64; 6] = [0.0, 0.1, 0.25, 0.5, 0.75, 1.0];

/// Tracker configuration with tunable thresholds and intervals.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Collector endpoint receiving flush payloads.
    pub endpoint: String,
    pub project_id: String,
    pub share_token: String,
    /// SQLite file backing the local flush backup.
    pub backup_path: PathBuf,

    /// Fraction of a section's area that must be in the viewport for the
    /// section to count as visible.
    pub visibility_threshold: f64,
    /// Interval between periodic flushes.
    pub flush_interval: Duration,
    /// Interval between fallback sampler polls.
    pub sampler_interval: Duration,
    /// Minimum spacing between scroll-driven samples.
    pub scroll_throttle: Duration,
    /// Delays before re-attempting attachment of sections missing from the
    /// layout (late-mounted content).
    pub attach_retry_delays: Vec<Duration>,
    /// Backups older than this are discarded instead of re-sent.
    pub backup_max_age: Duration,
    /// Timeout for awaited collector requests.
    pub request_timeout: Duration,
    /// Timeout for the keep-alive fallback of the final flush.
    pub unload_timeout: Duration,
}

impl TrackerConfig {
    pub fn new(
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        share_token: impl Into<String>,
        backup_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            project_id: project_id.into(),
            share_token: share_token.into(),
            backup_path: backup_path.into(),
            visibility_threshold: 0.10,
            flush_interval: Duration::from_secs(10),
            sampler_interval: Duration::from_secs(3),
            scroll_throttle: Duration::from_millis(500),
            attach_retry_delays: vec![
                Duration::from_millis(300),
                Duration::from_millis(1000),
                Duration::from_millis(3000),
            ],
            backup_max_age: Duration::from_secs(60 * 60),
            request_timeout: Duration::from_secs(10),
            unload_timeout: Duration::from_secs(3),
        }
    }

    /// One storage key per (project, share token) pair.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.project_id, self.share_token)
    }
}
