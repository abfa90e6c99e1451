//! Index worker loop: one long-lived target connection, consuming
//! `IndexJob`s until `Stop`.

use std::sync::Arc;

use anyhow::{Context, Result};
use pgx_catalog::{Catalog, IndexLockOutcome};
use pgx_tools::queue::{Message, Queue};
use pgx_tools::task_liveness::{current_pid_and_start, is_owner_alive};
use sqlx::Connection;

use crate::config::Config;
use crate::index::constraint::install_constraints;
use crate::index::IndexJob;
use crate::task::WorkerTask;
use crate::vacuum::VacuumJob;
use crate::{task_error, task_log, task_warn};

pub fn run_index_worker(
    worker: Arc<WorkerTask>,
    catalog: Arc<Catalog>,
    queue: Queue<IndexJob>,
    vacuum_queue: Option<Queue<VacuumJob>>,
    config: Config,
) -> Result<()> {
    let runtime = crate::db::worker_runtime()?;
    runtime.block_on(index_worker_loop(worker, catalog, queue, vacuum_queue, config))
}

async fn index_worker_loop(
    worker: Arc<WorkerTask>,
    catalog: Arc<Catalog>,
    queue: Queue<IndexJob>,
    vacuum_queue: Option<Queue<VacuumJob>>,
    config: Config,
) -> Result<()> {
    let mut target = crate::db::connect(&config.target_uri).await?;
    crate::db::set_target_guards(&mut target).await?;

    loop {
        worker.fail_on_abort()?;
        let job = match queue.recv().context("receiving from index queue")? {
            Message::Stop => break,
            Message::Work(job) => job,
        };

        if let Err(err) = build_one_index(&worker, &catalog, &mut target, &vacuum_queue, &config, &job).await {
            task_error!(worker, "building index {}: {err:#}", job.qualified_table);
            catalog.index_summary_finish(&job.qualified_table, now(), Some(&err.to_string()))?;
            if config.fail_fast {
                return Err(err);
            }
        }
    }

    let _ = target.close().await;
    Ok(())
}

async fn build_one_index(
    worker: &Arc<WorkerTask>,
    catalog: &Arc<Catalog>,
    target: &mut sqlx::PgConnection,
    vacuum_queue: &Option<Queue<VacuumJob>>,
    config: &Config,
    job: &IndexJob,
) -> Result<()> {
    let Some(index) = catalog.lookup_index_by_oid(job.oid)? else {
        task_warn!(worker, "index oid {} vanished from catalog, skipping", job.oid.0);
        return Ok(());
    };

    let (pid, pstart) = current_pid_and_start()?;
    let outcome =
        catalog.index_summary_try_acquire(&index.name, &index.qualified_table, pid, pstart, now(), is_owner_alive)?;
    match outcome {
        IndexLockOutcome::AlreadyDone => {
            task_log!(worker, "index {} already done, skipping", index.name);
        }
        IndexLockOutcome::Busy { pid } => {
            task_warn!(worker, "index {} owned by live pid {pid}, skipping", index.name);
            return Ok(());
        }
        IndexLockOutcome::Acquired => {
            // Non-PK/UNIQUE constraint indexes (EXCLUDE) are created by
            // their own ALTER TABLE ADD CONSTRAINT, not here.
            let skip_concurrent_build = index.is_constraint && !index.is_primary && !index.is_unique;
            if !skip_concurrent_build {
                let ddl = if matches!(config.mode, pgx_config::WorkDirMode::Resume) {
                    inject_if_not_exists(&index.definition)
                } else {
                    index.definition.clone()
                };
                sqlx::query(&ddl)
                    .execute(&mut *target)
                    .await
                    .with_context(|| format!("executing index DDL for {}", index.name))?;
            } else {
                task_log!(worker, "{} backs a non-unique constraint, deferring to ALTER TABLE", index.name);
            }
            catalog.index_summary_finish(&index.name, now(), None)?;
        }
    }

    if catalog.indexes_done(&index.qualified_table, table_index_count(catalog, &index.qualified_table)?)?
        && catalog.claim_last_index_owner(&index.qualified_table, pid)?
    {
        task_log!(worker, "all indexes of {} done, installing constraints", index.qualified_table);
        install_constraints(worker, catalog, target, &index.qualified_table).await?;

        if let Some(vacuum_queue) = vacuum_queue {
            vacuum_queue
                .send_work(VacuumJob {
                    qualified_name: index.qualified_table.clone(),
                })
                .context("enqueueing vacuum job after index build")?;
        }
    }

    Ok(())
}

fn table_index_count(catalog: &Catalog, qualified_table: &str) -> Result<i32> {
    Ok(catalog
        .lookup_table_by_qualified_name(qualified_table)?
        .map(|t| t.index_count)
        .unwrap_or(0))
}

/// Injects `IF NOT EXISTS` right after `CREATE [UNIQUE] INDEX`, used in
/// resume mode so a partially-applied DDL from an interrupted run
/// doesn't fail the retry.
fn inject_if_not_exists(definition: &str) -> String {
    if let Some(pos) = definition.find("INDEX ") {
        let (head, tail) = definition.split_at(pos + "INDEX ".len());
        if tail.starts_with("IF NOT EXISTS") {
            return definition.to_string();
        }
        format!("{head}IF NOT EXISTS {tail}")
    } else {
        definition.to_string()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_if_not_exists_once() {
        let ddl = "CREATE UNIQUE INDEX orders_pkey ON public.orders USING btree (id)";
        let injected = inject_if_not_exists(ddl);
        assert_eq!(
            injected,
            "CREATE UNIQUE INDEX IF NOT EXISTS orders_pkey ON public.orders USING btree (id)"
        );
        assert_eq!(inject_if_not_exists(&injected), injected);
    }
}
