use thiserror::Error;

/// Error kinds, not types: every fallible call in the core still returns
/// `anyhow::Result`, but call sites that need to *branch* on what kind
/// of failure happened (run-state preconditions, retry eligibility)
/// match on this enum instead of downcasting strings.
#[derive(Debug, Error)]
pub enum PgxError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("work directory is busy (owned by live pid {pid})")]
    WorkdirBusy { pid: i32 },

    #[error("a previous run was interrupted; pass --resume or --restart")]
    ResumeRequired,

    #[error("work directory already holds a complete run; pass --restart to redo it")]
    UseRestart,

    #[error("schema discovery failed: {0}")]
    SchemaDiscovery(String),

    #[error("transient connection failure: {0}")]
    Transient(String),

    #[error("data copy failed for {qualified_name} part {part}: {reason}")]
    DataCopy {
        qualified_name: String,
        part: i32,
        reason: String,
    },

    #[error("index build failed for {index_name}: {reason}")]
    IndexBuild { index_name: String, reason: String },

    #[error("constraint install failed for {constraint_name}: {reason}")]
    Constraint {
        constraint_name: String,
        reason: String,
    },

    #[error("interrupted by signal")]
    Interrupted,

    #[error("internal invariant violated: {0}")]
    Bug(String),
}

impl PgxError {
    /// Transient connection-class failures are the only ones the retry
    /// policy in `pgx-tools::retry` is allowed to act on.
    pub fn is_transient(&self) -> bool {
        matches!(self, PgxError::Transient(_))
    }
}
