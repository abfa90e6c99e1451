//! Extension-config data copy (spec §2.9): copies the data of tables an
//! installed extension marked via `pg_extension_config_dump`, honoring
//! each relation's filter expression the same way `pg_dump` does, since
//! the pre-data restore already created the table (and the extension
//! itself) but never populates its data.

use std::sync::Arc;

use anyhow::{Context, Result};
use pgx_catalog::Catalog;

use crate::config::Config;
use crate::task::WorkerTask;
use crate::{task_error, task_log};

pub fn run_extension_config_copy(worker: Arc<WorkerTask>, catalog: Arc<Catalog>, config: Config) -> Result<()> {
    let runtime = crate::db::worker_runtime()?;
    runtime.block_on(copy_all(worker, catalog, config))
}

async fn copy_all(worker: Arc<WorkerTask>, catalog: Arc<Catalog>, config: Config) -> Result<()> {
    let mut source = crate::db::connect(&config.source_uri).await?;
    let mut target = crate::db::connect(&config.target_uri).await?;

    let layout = pgx_config::WorkDirLayout::new(&config.workdir);
    if let Some(snapshot_id) = crate::snapshot::read_snapshot_file(&layout.snapshot_file())? {
        crate::db::bind_snapshot(&mut source, &snapshot_id).await?;
    }

    let mut extensions = Vec::new();
    catalog.iter_extensions(|ext| {
        extensions.push(ext.clone());
        true
    })?;

    let mut copied = 0;
    for ext in &extensions {
        for rel in &ext.config_relations {
            worker.fail_on_abort()?;
            let filter = rel
                .filter_expr
                .as_deref()
                .map(|expr| format!(" WHERE {expr}"))
                .unwrap_or_default();
            let read = format!("COPY (SELECT * FROM {}{filter}) TO STDOUT (FORMAT binary)", rel.qualified_name);
            let write = format!("COPY {} FROM STDIN (FORMAT binary)", rel.qualified_name);

            match crate::copy::worker::pump(&mut source, &mut target, &read, &write).await {
                Ok(bytes) => {
                    task_log!(worker, "copied {bytes} bytes of extension config {}", rel.qualified_name);
                    copied += 1;
                }
                Err(err) => {
                    task_error!(worker, "copying extension config {}: {err:#}", rel.qualified_name);
                    if config.fail_fast {
                        return Err(err);
                    }
                }
            }
        }
    }

    task_log!(worker, "copied {copied} extension config relations across {} extensions", extensions.len());
    let _ = sqlx::Connection::close(source).await;
    let _ = sqlx::Connection::close(target).await;
    Ok(())
}
