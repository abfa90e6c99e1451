//! Build-time constants and default path macros for `pgxfer`.
//!
//! Mirrors the teacher's `pbs-buildcfg` crate: a tiny, dependency-free
//! crate that every other workspace member can pull in for package
//! version strings and default filesystem locations, without pulling in
//! the rest of the orchestrator.

pub const PGXFER_PKG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION_MAJOR"),
    ".",
    env!("CARGO_PKG_VERSION_MINOR"),
);
pub const PGXFER_PKG_RELEASE: &str = env!("CARGO_PKG_VERSION_PATCH");
pub const PGXFER_PKG_REPOID: &str = env!("REPOID");

/// Name used both as the XDG application prefix and as the basename of
/// the pidfile/catalog files inside a run's work directory.
pub const PROGRAM_NAME: &str = "pgxfer";

#[macro_export]
macro_rules! PGXFER_WORKDIR_SCHEMA_SUBDIR_M {
    () => {
        "schema"
    };
}

#[macro_export]
macro_rules! PGXFER_WORKDIR_RUN_SUBDIR_M {
    () => {
        "run"
    };
}

#[macro_export]
macro_rules! PGXFER_WORKDIR_CDC_SUBDIR_M {
    () => {
        "cdc"
    };
}

/// `workdir/schema` — pre-data/post-data dump archives, roles, catalog db.
pub const WORKDIR_SCHEMA_SUBDIR: &str = PGXFER_WORKDIR_SCHEMA_SUBDIR_M!();
/// `workdir/run` — phase checkpoints plus per-table/per-index progress markers.
pub const WORKDIR_RUN_SUBDIR: &str = PGXFER_WORKDIR_RUN_SUBDIR_M!();
/// `workdir/cdc` — reserved for the (out of scope) logical-decoding follow subsystem.
pub const WORKDIR_CDC_SUBDIR: &str = PGXFER_WORKDIR_CDC_SUBDIR_M!();

/// pidfile name, directly under the work directory.
pub const PIDFILE_NAME: &str = "pgxfer.pid";

/// exported-snapshot token file, directly under the work directory.
pub const SNAPSHOT_FILE_NAME: &str = "snapshot";

/// name of the embedded catalog database, under `workdir/schema`.
pub const CATALOG_DB_NAME: &str = "catalog.db";
