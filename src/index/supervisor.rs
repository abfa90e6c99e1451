//! Index supervisor: times the create-index and alter-table sections,
//! spawns index-workers, and joins them.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use pgx_catalog::Catalog;
use pgx_tools::queue::Queue;

use crate::config::Config;
use crate::index::worker::run_index_worker;
use crate::index::IndexJob;
use crate::task::WorkerTask;
use crate::vacuum::VacuumJob;

pub struct IndexSupervisorOutcome {
    pub elapsed: std::time::Duration,
}

/// Spawns `config.index_jobs` index-workers and joins them. STOP
/// messages are *not* sent here: the copy supervisor owns announcing
/// end-of-input to the index queue once every copy-worker has drained,
/// since only it knows when every copy-worker has stopped feeding the
/// queue. Callers therefore run this concurrently with the copy stage,
/// not after it.
pub fn run_index_stage(
    catalog: Arc<Catalog>,
    config: &Config,
    index_queue: Queue<IndexJob>,
    vacuum_queue: Option<Queue<VacuumJob>>,
) -> Result<IndexSupervisorOutcome> {
    let start = Instant::now();
    let mut handles = Vec::with_capacity(config.index_jobs);

    for n in 0..config.index_jobs {
        let worker_catalog = catalog.clone();
        let worker_queue = index_queue.clone();
        let worker_vacuum_queue = vacuum_queue.clone();
        let worker_config = config.clone();
        let handle = WorkerTask::spawn_thread(
            "index-worker",
            Some(n.to_string()),
            &config.username,
            &config.node,
            move |task| run_index_worker(task, worker_catalog, worker_queue, worker_vacuum_queue, worker_config),
        )
        .context("spawning index worker thread")?;
        handles.push(handle);
    }

    let mut first_err = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => first_err.get_or_insert(err),
            Err(_) => first_err.get_or_insert(anyhow::anyhow!("index worker thread panicked")),
        };
    }
    if let Some(err) = first_err {
        return Err(err);
    }

    Ok(IndexSupervisorOutcome {
        elapsed: start.elapsed(),
    })
}
