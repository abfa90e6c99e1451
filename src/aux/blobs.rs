//! Blob copy (spec §2.9): streams `pg_largeobject_metadata` then
//! `pg_largeobject` straight across, the same COPY-to-COPY pumping
//! [`crate::copy::worker::pump`] uses for ordinary tables. Metadata
//! goes first so a large object's row in `pg_largeobject` never
//! arrives on the target before the object it belongs to exists.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::task::WorkerTask;
use crate::{task_error, task_log};

pub fn run_blob_copy(worker: Arc<WorkerTask>, config: Config) -> Result<()> {
    let runtime = crate::db::worker_runtime()?;
    runtime.block_on(copy_blobs(worker, config))
}

async fn copy_blobs(worker: Arc<WorkerTask>, config: Config) -> Result<()> {
    let mut source = crate::db::connect(&config.source_uri).await?;
    let mut target = crate::db::connect(&config.target_uri).await?;

    let layout = pgx_config::WorkDirLayout::new(&config.workdir);
    if let Some(snapshot_id) = crate::snapshot::read_snapshot_file(&layout.snapshot_file())? {
        crate::db::bind_snapshot(&mut source, &snapshot_id).await?;
    }

    for (table, columns) in [
        ("pg_catalog.pg_largeobject_metadata", "(oid, lomowner, lomacl)"),
        ("pg_catalog.pg_largeobject", "(loid, pageno, data)"),
    ] {
        worker.fail_on_abort()?;
        let read = format!("COPY {table} {columns} TO STDOUT (FORMAT binary)");
        let write = format!("COPY {table} {columns} FROM STDIN (FORMAT binary)");
        match crate::copy::worker::pump(&mut source, &mut target, &read, &write).await {
            Ok(bytes) => task_log!(worker, "copied {bytes} bytes from {table}"),
            Err(err) => {
                task_error!(worker, "copying {table}: {err:#}");
                if config.fail_fast {
                    return Err(err);
                }
            }
        }
    }

    let _ = sqlx::Connection::close(source).await;
    let _ = sqlx::Connection::close(target).await;
    Ok(())
}
