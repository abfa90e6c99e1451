//! Vacuum supervisor & workers (spec §4.10): `vacuum_jobs` workers each
//! consuming a dedicated vacuum queue and running `VACUUM ANALYZE`.
//! A separate queue from the copy/index stages so vacuum can never
//! block index work, and its STOP propagation is independent of both
//! (spec §4.10 "this stage uses its own queue...").

use std::sync::Arc;

use anyhow::{Context, Result};
use pgx_tools::queue::{Message, Queue};
use sqlx::Connection;

use crate::config::Config;
use crate::task::WorkerTask;
use crate::{task_error, task_log};

#[derive(Debug, Clone)]
pub struct VacuumJob {
    pub qualified_name: String,
}

pub struct VacuumSupervisorOutcome {
    pub tables_vacuumed: usize,
}

/// Spawns `config.vacuum_jobs` vacuum-workers against `queue` and joins
/// them. STOP messages are *not* sent here: vacuum-eligible tables
/// arrive from both the copy stage (zero-index tables) and the index
/// stage (post-constraint tables), so only the root orchestrator knows
/// when both have finished feeding this queue (spec §4.10 "STOP
/// propagation is independent of the index stage"). Callers therefore
/// run this concurrently with the copy/index stages, sending STOP here
/// only once both have drained.
pub fn run_vacuum_stage(config: &Config, queue: Queue<VacuumJob>) -> Result<VacuumSupervisorOutcome> {
    let mut handles = Vec::with_capacity(config.vacuum_jobs);
    for n in 0..config.vacuum_jobs {
        let worker_queue = queue.clone();
        let worker_config = config.clone();
        let handle = WorkerTask::spawn_thread(
            "vacuum-worker",
            Some(n.to_string()),
            &config.username,
            &config.node,
            move |task| run_vacuum_worker(task, worker_queue, worker_config),
        )
        .context("spawning vacuum worker thread")?;
        handles.push(handle);
    }

    let mut tables_vacuumed = 0;
    let mut first_err = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(count)) => tables_vacuumed += count,
            Ok(Err(err)) => first_err.get_or_insert(err),
            Err(_) => first_err.get_or_insert(anyhow::anyhow!("vacuum worker thread panicked")),
        };
    }
    if let Some(err) = first_err {
        return Err(err);
    }

    Ok(VacuumSupervisorOutcome { tables_vacuumed })
}

fn run_vacuum_worker(worker: Arc<WorkerTask>, queue: Queue<VacuumJob>, config: Config) -> Result<usize> {
    let runtime = crate::db::worker_runtime()?;
    runtime.block_on(vacuum_worker_loop(worker, queue, config))
}

async fn vacuum_worker_loop(worker: Arc<WorkerTask>, queue: Queue<VacuumJob>, config: Config) -> Result<usize> {
    let mut target = crate::db::connect(&config.target_uri).await?;
    let mut done = 0;

    loop {
        worker.fail_on_abort()?;
        let job = match queue.recv().context("receiving from vacuum queue")? {
            Message::Stop => break,
            Message::Work(job) => job,
        };

        let ddl = format!("VACUUM ANALYZE {}", job.qualified_name);
        if let Err(err) = sqlx::query(&ddl).execute(&mut target).await {
            task_error!(worker, "vacuuming {}: {err:#}", job.qualified_name);
            if config.fail_fast {
                return Err(anyhow::anyhow!(err).context(format!("VACUUM ANALYZE {}", job.qualified_name)));
            }
            continue;
        }
        task_log!(worker, "vacuumed {}", job.qualified_name);
        done += 1;
    }

    let _ = target.close().await;
    Ok(done)
}
