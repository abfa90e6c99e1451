//! Run configuration: the struct every supervisor and worker is handed,
//! built once by [`crate::cli`] from argv + environment.

use std::path::PathBuf;

use pgx_config::WorkDirMode;

/// One migration run's full configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub source_uri: String,
    pub target_uri: String,
    pub workdir: PathBuf,
    pub mode: WorkDirMode,

    /// Number of copy-worker threads.
    pub table_jobs: usize,
    /// Number of index-worker threads.
    pub index_jobs: usize,
    /// Number of vacuum-worker threads.
    pub vacuum_jobs: usize,

    /// Tables whose `estimated_bytes` exceeds this are candidates for
    /// partitioned copy.
    pub split_tables_larger_than: i64,

    /// `max-retries = 0` disables retrying.
    pub max_retries: u32,
    /// Total wall-clock time a single part's retry loop may spend
    /// sleeping between attempts before giving up regardless of
    /// `max_retries` remaining.
    pub retry_time_budget: std::time::Duration,

    /// Fail-fast is a run-wide flag: once set, every worker's next
    /// `fail_on_abort()` check returns an error.
    pub fail_fast: bool,

    /// `--not-consistent` mode skips snapshot setup.
    pub not_consistent: bool,

    /// Auxiliary single-shot processes can each be disabled
    /// independently (useful for re-running just one phase by hand).
    pub skip_vacuum: bool,
    pub skip_blobs: bool,
    pub skip_sequences: bool,
    pub skip_extension_config: bool,

    /// Binary COPY format is faster but opaque on the wire; text format
    /// is easier to debug.
    pub binary_copy: bool,

    /// Identity fields threaded into every [`crate::task::WorkerTask`]'s
    /// UPID.
    pub node: String,
    pub username: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source_uri: String::new(),
            target_uri: String::new(),
            workdir: PathBuf::new(),
            mode: WorkDirMode::Fresh,
            table_jobs: 4,
            index_jobs: 4,
            vacuum_jobs: 4,
            split_tables_larger_than: 8 * 1024 * 1024 * 1024,
            max_retries: 4,
            retry_time_budget: std::time::Duration::from_secs(30),
            fail_fast: true,
            not_consistent: false,
            skip_vacuum: false,
            skip_blobs: false,
            skip_sequences: false,
            skip_extension_config: false,
            binary_copy: true,
            node: hostname(),
            username: "pgxfer".to_string(),
        }
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}
