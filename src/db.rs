//! Connection helpers shared by every worker: one dedicated
//! single-thread Tokio runtime per OS thread, one `PgConnection` to the
//! source and one to the target, and the target session GUCs the copy
//! and index workers both want (a large `maintenance_work_mem`, async
//! commit).
//!
//! Grounded on `adamtc007-ob-poc`'s `sqlx::postgres::PgConnectOptions`
//! usage (the pack's only real-world example of talking to Postgres
//! with `sqlx`), adapted from a shared `PgPool` to a single
//! `PgConnection` per worker, since connections here are never shared
//! across threads.

use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tokio::runtime::Runtime;

/// Builds the current-thread runtime every worker thread uses to drive
/// its `sqlx` connections. A full multi-thread runtime would be
/// wasted: each worker only ever has one or two connections in flight
/// at a time.
pub fn worker_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building worker tokio runtime")
}

pub async fn connect(uri: &str) -> Result<PgConnection> {
    let opts = PgConnectOptions::from_str(uri).with_context(|| format!("parsing uri {uri}"))?;
    PgConnection::connect_with(&opts)
        .await
        .with_context(|| format!("connecting to {uri}"))
}

/// Every worker's source connection binds its transaction to the
/// exported snapshot so every read sees the same point in time.
pub async fn bind_snapshot(conn: &mut PgConnection, snapshot_id: &str) -> Result<()> {
    sqlx::query("BEGIN ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *conn)
        .await
        .context("opening repeatable-read transaction")?;
    // SET TRANSACTION SNAPSHOT takes a literal, not a bind parameter;
    // exported snapshot ids are server-generated tokens (e.g.
    // "00000003-00000001-1") with no quotes to escape.
    let query = format!("SET TRANSACTION SNAPSHOT '{snapshot_id}'");
    sqlx::query(&query)
        .execute(&mut *conn)
        .await
        .context("binding exported snapshot")?;
    Ok(())
}

/// Target-session GUCs for bulk loads: a large `maintenance_work_mem` speeds up the index
/// builds that follow, and `synchronous_commit = off` avoids paying for
/// a WAL flush per `COPY` chunk on a migration target that can be
/// re-run from the source if it crashes mid-flight.
pub async fn set_target_guards(conn: &mut PgConnection) -> Result<()> {
    sqlx::query("SET maintenance_work_mem = '1GB'")
        .execute(&mut *conn)
        .await
        .context("setting maintenance_work_mem")?;
    sqlx::query("SET synchronous_commit = off")
        .execute(&mut *conn)
        .await
        .context("setting synchronous_commit")?;
    Ok(())
}

/// Classifies a `sqlx::Error` as transient (connection-class, retry
/// eligible) or not.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // Class 08 (connection exception) and 57P03 (cannot connect
            // now) are the only SQLSTATEs treated as connection-class;
            // DDL/constraint failures are never retried.
            db_err
                .code()
                .map(|code| code.starts_with("08") || code == "57P03")
                .unwrap_or(false)
        }
        _ => false,
    }
}
