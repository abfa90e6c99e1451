//! Snapshot manager: exports one source-side snapshot identifier so
//! every worker's source transaction reads the same point-in-time view,
//! and persists the token under the work directory.
//!
//! `pg_export_snapshot()`'s token stays valid only while the exporting
//! transaction remains open, so [`export_and_hold`] spawns a dedicated
//! thread that keeps that transaction (and its one connection) open for
//! as long as the caller needs the snapshot, separate from the
//! connection schema discovery or any copy/blob/extension-config worker
//! actually reads through. A resumed run has no such connection left
//! alive from the prior process — the catalog's cached schema is reused
//! and the remaining work simply runs `--not-consistent`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Row};

/// A live export: `id` stays valid only until [`SnapshotManager::close`]
/// is called. Every worker binds its own source connection to `id` via
/// [`crate::db::bind_snapshot`] rather than sharing the holder's own
/// connection.
pub struct SnapshotManager {
    id: String,
    stop_tx: mpsc::Sender<()>,
    holder: JoinHandle<Result<()>>,
}

impl SnapshotManager {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tells the holder thread to `COMMIT` and close its connection,
    /// and blocks until it has. Call this only after every worker that
    /// might still bind to this snapshot has finished.
    pub fn close(self) -> Result<()> {
        let _ = self.stop_tx.send(());
        self.holder
            .join()
            .map_err(|_| anyhow::anyhow!("snapshot-holder thread panicked"))?
    }
}

/// Exports a snapshot on its own dedicated connection and keeps that
/// connection's transaction open on a background thread until
/// [`SnapshotManager::close`] is called, returning `None` when
/// `not_consistent` is set. The snapshot id is persisted to
/// `snapshot_file` before this function returns.
pub fn export_and_hold(
    source_uri: &str,
    snapshot_file: &Path,
    not_consistent: bool,
) -> Result<Option<SnapshotManager>> {
    if not_consistent {
        return Ok(None);
    }

    let (ready_tx, ready_rx) = mpsc::channel::<Result<String>>();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let source_uri = source_uri.to_string();
    let snapshot_file = snapshot_file.to_path_buf();

    let holder = std::thread::Builder::new()
        .name("snapshot-holder".to_string())
        .spawn(move || hold_snapshot(source_uri, snapshot_file, ready_tx, stop_rx))
        .context("spawning snapshot-holder thread")?;

    match ready_rx.recv() {
        Ok(Ok(id)) => Ok(Some(SnapshotManager { id, stop_tx, holder })),
        Ok(Err(err)) => {
            let _ = holder.join();
            Err(err)
        }
        Err(_) => match holder.join() {
            Ok(Err(err)) => Err(err),
            _ => Err(anyhow::anyhow!("snapshot-holder thread exited before reporting a result")),
        },
    }
}

/// Runs on the dedicated holder thread: opens the export transaction,
/// reports the id (or error) back to the caller, then blocks on
/// `stop_rx` until told to close, keeping the transaction open for that
/// entire span.
fn hold_snapshot(
    source_uri: String,
    snapshot_file: PathBuf,
    ready_tx: mpsc::Sender<Result<String>>,
    stop_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let runtime = crate::db::worker_runtime()?;
    runtime.block_on(async move {
        let mut conn = crate::db::connect(&source_uri).await?;
        match export_snapshot_on(&mut conn, &snapshot_file).await {
            Ok(id) => {
                let _ = ready_tx.send(Ok(id));
                // Blocking recv is fine: this thread holds one idle
                // transaction open and does nothing else for its life.
                let _ = stop_rx.recv();
                sqlx::query("COMMIT")
                    .execute(&mut conn)
                    .await
                    .context("closing snapshot-export transaction")?;
                let _ = Connection::close(conn).await;
                Ok(())
            }
            Err(err) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut conn).await;
                let _ = ready_tx.send(Err(anyhow::anyhow!("{err:#}")));
                Ok(())
            }
        }
    })
}

async fn export_snapshot_on(conn: &mut PgConnection, snapshot_file: &Path) -> Result<String> {
    sqlx::query("BEGIN ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *conn)
        .await
        .context("opening snapshot-export transaction")?;
    let row = sqlx::query("SELECT pg_export_snapshot() AS id")
        .fetch_one(&mut *conn)
        .await
        .context("pg_export_snapshot()")?;
    let id: String = row.get("id");
    fs::write(snapshot_file, &id).with_context(|| format!("writing {}", snapshot_file.display()))?;
    Ok(id)
}

/// Loads a previously exported snapshot token, if the file exists. Kept
/// for diagnostics/inspection of a work directory; the live pipeline
/// gets its snapshot id straight from the [`SnapshotManager`] returned
/// by `export_and_hold`, not by re-reading this file.
pub fn read_snapshot_file(snapshot_file: &Path) -> Result<Option<String>> {
    if !snapshot_file.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(snapshot_file)
        .with_context(|| format!("reading {}", snapshot_file.display()))?;
    Ok(Some(contents.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_snapshot_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("snapshot");
        assert!(read_snapshot_file(&path).unwrap().is_none());
    }

    #[test]
    fn reads_back_written_token() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("snapshot");
        fs::write(&path, "00000003-0000001B-1\n").unwrap();
        assert_eq!(
            read_snapshot_file(&path).unwrap(),
            Some("00000003-0000001B-1".to_string())
        );
    }

    #[test]
    fn not_consistent_skips_export() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("snapshot");
        let manager = export_and_hold("postgres://unused", &path, true).unwrap();
        assert!(manager.is_none());
        assert!(!path.exists());
    }
}
