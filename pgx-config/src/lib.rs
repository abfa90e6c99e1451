//! Work directory layout, pidfile locking, and XDG path resolution for
//! `pgxfer` runs.
//!
//! Mirrors the teacher's `pbs-config` crate — the small, low-level
//! layer that owns "where things live on disk" so the orchestrator
//! doesn't have to hardcode paths.

pub mod workdir;

pub use workdir::{WorkDirLayout, WorkDirMode};

use anyhow::{Context, Error};

/// `xdg::BaseDirectories` scoped to `pgxfer`, used to resolve
/// `XDG_RUNTIME_DIR`/`TMPDIR` (default work directory location) and
/// `XDG_DATA_HOME` (CDC follow-subsystem data, out of scope for now but
/// still resolved as part of the documented environment).
pub fn base_directories() -> Result<xdg::BaseDirectories, Error> {
    xdg::BaseDirectories::with_prefix(pgx_buildcfg::PROGRAM_NAME).map_err(Error::from)
}

/// Default work directory root when none is given on the command line:
/// `$XDG_RUNTIME_DIR/pgxfer`, falling back to `$TMPDIR/pgxfer`.
pub fn default_workdir_root() -> Result<std::path::PathBuf, Error> {
    if let Ok(dirs) = base_directories() {
        if let Ok(runtime_dir) = dirs.get_runtime_directory() {
            return Ok(runtime_dir.clone());
        }
    }
    let tmpdir = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
    Ok(std::path::PathBuf::from(tmpdir).join(pgx_buildcfg::PROGRAM_NAME))
}

/// `$XDG_DATA_HOME`-rooted directory reserved for the logical-decoding
/// follow subsystem (spec's CDC non-goal); resolved now so the layout
/// exists even though nothing writes to it yet.
pub fn cdc_data_home() -> Result<std::path::PathBuf, Error> {
    base_directories()
        .map(|dirs| dirs.get_data_home())
        .context("failed to resolve XDG_DATA_HOME")
}
