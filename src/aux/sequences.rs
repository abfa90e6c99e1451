//! Sequence reset (spec §2.9, §4.9's aux sibling): copies each source
//! sequence's `last_value`/`is_called` onto the matching target
//! sequence via `setval`, after table data copy so the values being
//! set already reflect every row the sequence backs.

use std::sync::Arc;

use anyhow::{Context, Result};
use pgx_catalog::Catalog;

use crate::config::Config;
use crate::task::WorkerTask;
use crate::{task_error, task_log};

pub fn run_sequence_reset(worker: Arc<WorkerTask>, catalog: Arc<Catalog>, config: Config) -> Result<()> {
    let runtime = crate::db::worker_runtime()?;
    runtime.block_on(reset_all(worker, catalog, config))
}

async fn reset_all(worker: Arc<WorkerTask>, catalog: Arc<Catalog>, config: Config) -> Result<()> {
    let mut target = crate::db::connect(&config.target_uri).await?;

    let mut sequences = Vec::new();
    catalog.iter_sequences(|seq| {
        sequences.push(seq.clone());
        true
    })?;

    let mut reset = 0;
    for seq in sequences {
        worker.fail_on_abort()?;
        let result = sqlx::query("SELECT setval($1, $2, $3)")
            .bind(&seq.qualified_name)
            .bind(seq.last_value)
            .bind(seq.is_called)
            .execute(&mut target)
            .await;

        match result {
            Ok(_) => reset += 1,
            Err(err) => {
                task_error!(worker, "resetting sequence {}: {err:#}", seq.qualified_name);
                if config.fail_fast {
                    return Err(anyhow::anyhow!(err).context(format!("setval({})", seq.qualified_name)));
                }
            }
        }
    }

    task_log!(worker, "reset {reset} sequences");
    let _ = target.close().await;
    Ok(())
}
