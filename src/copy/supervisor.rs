//! Copy supervisor: creates the copy queue, spawns copy-workers, feeds
//! every table (or table part) into the queue, then drains.

use std::sync::Arc;

use anyhow::{Context, Result};
use pgx_catalog::Catalog;
use pgx_tools::queue::Queue;

use crate::config::Config;
use crate::copy::worker::{enqueue_next_stage, run_copy_worker, NextStageQueues, TablePart};
use crate::index::IndexJob;
use crate::task::WorkerTask;
use crate::vacuum::VacuumJob;

pub struct CopySupervisorOutcome {
    pub tables_enqueued: usize,
    pub parts_enqueued: usize,
}

/// Runs the whole copy stage to completion: spawns `config.table_jobs`
/// copy-workers, feeds them every table/part from the catalog, sends
/// one STOP per worker, and joins. Indexes and vacuum-eligible tables
/// are handed to `index_queue`/`vacuum_queue` directly by whichever
/// worker finishes a table's last part.
pub fn run_copy_stage(
    catalog: Arc<Catalog>,
    config: &Config,
    snapshot_id: Option<String>,
    index_queue: Queue<IndexJob>,
    vacuum_queue: Option<Queue<VacuumJob>>,
) -> Result<CopySupervisorOutcome> {
    // Unbounded for the same non-blocking-send reason as the
    // index/vacuum queues (spec §4.4).
    let queue: Queue<TablePart> = Queue::unbounded();
    let next_stage = NextStageQueues {
        index_queue,
        vacuum_queue,
    };

    let mut handles = Vec::with_capacity(config.table_jobs);
    for n in 0..config.table_jobs {
        let worker_catalog = catalog.clone();
        let worker_queue = queue.clone();
        let worker_config = config.clone();
        let worker_snapshot = snapshot_id.clone();
        let worker_next_stage = next_stage.clone();
        let handle = WorkerTask::spawn_thread(
            "copy-worker",
            Some(n.to_string()),
            &config.username,
            &config.node,
            move |task| run_copy_worker(task, worker_catalog, worker_queue, worker_next_stage, worker_config, worker_snapshot),
        )
        .context("spawning copy worker thread")?;
        handles.push(handle);
    }

    let truncate_runtime = crate::db::worker_runtime().context("building supervisor truncate runtime")?;
    let mut truncate_conn = truncate_runtime
        .block_on(crate::db::connect(&config.target_uri))
        .context("connecting to target for pre-partition truncate")?;

    let mut tables_enqueued = 0;
    let mut parts_enqueued = 0;
    let mut enqueue_err: Option<anyhow::Error> = None;
    catalog.iter_tables(|table| {
        tables_enqueued += 1;
        let part_count = table
            .partition_plan
            .as_ref()
            .map(|p| p.part_count() as i32)
            .unwrap_or(0)
            .max(1);

        if part_count > 1 {
            // A resumed run may already have every part of this table
            // marked done in the catalog from a prior process; in that
            // case the table must not be touched again; truncating it
            // here would silently discard already-copied data (only the
            // unpartitioned path below re-truncates, inside the same
            // transaction as its own COPY).
            match catalog.table_copy_done(&table.qualified_name, part_count) {
                Ok(true) => {
                    if let Err(err) = enqueue_next_stage(&catalog, &next_stage, &table.qualified_name, table.index_count) {
                        enqueue_err = Some(err);
                        return false;
                    }
                    return true;
                }
                Ok(false) => {}
                Err(err) => {
                    enqueue_err = Some(err.context(format!("checking copy status of {}", table.qualified_name)));
                    return false;
                }
            }
        }

        if part_count <= 1 {
            let sent = queue.send_work(TablePart {
                oid: table.oid,
                qualified_name: table.qualified_name.clone(),
                part_number: 0,
                part_count: 1,
            });
            parts_enqueued += 1;
            if let Err(err) = sent {
                enqueue_err = Some(anyhow::anyhow!("enqueueing {}: {err}", table.qualified_name));
                return false;
            }
        } else {
            // Truncating once upfront, outside any worker's
            // transaction, empties the table before any part starts
            // writing; FREEZE itself still only applies to the
            // unpartitioned path.
            let truncate = truncate_runtime.block_on(
                sqlx::query(&format!("TRUNCATE {}", table.qualified_name)).execute(&mut truncate_conn),
            );
            if truncate.is_err() {
                log::debug!("no TRUNCATE privilege on {}, copying without it", table.qualified_name);
            }
            for range in &table.partition_plan.as_ref().unwrap().ranges {
                let sent = queue.send_work(TablePart {
                    oid: table.oid,
                    qualified_name: table.qualified_name.clone(),
                    part_number: range.part_number,
                    part_count,
                });
                parts_enqueued += 1;
                if let Err(err) = sent {
                    enqueue_err = Some(anyhow::anyhow!("enqueueing {} part {}: {err}", table.qualified_name, range.part_number));
                    return false;
                }
            }
        }
        true
    })?;

    let _ = truncate_runtime.block_on(async { sqlx::Connection::close(truncate_conn).await });

    if let Some(err) = enqueue_err {
        return Err(err);
    }

    queue
        .send_stop_to_all(config.table_jobs)
        .context("sending STOP to copy workers")?;

    let mut first_err = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => first_err.get_or_insert(err),
            Err(_) => first_err.get_or_insert(anyhow::anyhow!("copy worker thread panicked")),
        };
    }

    // Announce end-of-input to the index stage regardless of outcome:
    // index-workers block on this queue and would otherwise hang if the
    // copy stage failed.
    next_stage
        .index_queue
        .send_stop_to_all(config.index_jobs)
        .context("sending STOP to index workers")?;

    if let Some(err) = first_err {
        return Err(err);
    }

    Ok(CopySupervisorOutcome {
        tables_enqueued,
        parts_enqueued,
    })
}
