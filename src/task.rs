//! Worker task bookkeeping: one [`WorkerTask`] per thread spawned by a
//! supervisor (copy worker, index worker, vacuum worker, or an
//! auxiliary single-shot process). Grounded on the shape of the
//! teacher's `WorkerTask`/`UPID` (`src/server/worker_task.rs`): a
//! process-wide registry of live workers plus a per-worker abort flag,
//! adapted from `tokio::spawn` futures to plain OS threads and from a
//! dedicated `FileLogger` to the `log` crate macros everything else in
//! this workspace already uses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::Result;
use chrono::Utc;
use once_cell::sync::Lazy;
use pgx_api_types::UPID;
use pgx_tools::task_liveness::current_pid_and_start;

#[macro_export]
macro_rules! task_error {
    ($task:expr, $($fmt:tt)+) => {{ log::error!("{}: {}", $task.upid(), format_args!($($fmt)+)) }};
}

#[macro_export]
macro_rules! task_warn {
    ($task:expr, $($fmt:tt)+) => {{ log::warn!("{}: {}", $task.upid(), format_args!($($fmt)+)) }};
}

#[macro_export]
macro_rules! task_log {
    ($task:expr, $($fmt:tt)+) => {{ log::info!("{}: {}", $task.upid(), format_args!($($fmt)+)) }};
}

static WORKER_TASK_NEXT_ID: AtomicUsize = AtomicUsize::new(0);

static WORKER_TASK_LIST: Lazy<Mutex<HashMap<usize, Arc<WorkerTask>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Handle to one running worker. Supervisors hold the `JoinHandle`
/// returned by [`WorkerTask::spawn_thread`]; the worker closure itself
/// only ever sees the `Arc<WorkerTask>`, checking [`WorkerTask::abort_requested`]
/// between units of work the way the teacher's workers check
/// `fail_on_abort`.
pub struct WorkerTask {
    task_id: usize,
    upid: UPID,
    abort_requested: AtomicBool,
}

impl std::fmt::Display for WorkerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.upid.fmt(f)
    }
}

impl WorkerTask {
    fn new(worker_type: &str, worker_id: Option<String>, username: &str, node: &str) -> Result<Arc<Self>> {
        let (pid, pstart) = current_pid_and_start()?;
        let task_id = WORKER_TASK_NEXT_ID.fetch_add(1, Ordering::SeqCst);

        let upid = UPID {
            pid,
            pstart,
            starttime: Utc::now().timestamp(),
            worker_type: worker_type.to_string(),
            worker_id,
            username: username.to_string(),
            node: node.to_string(),
        };

        let worker = Arc::new(WorkerTask {
            task_id,
            upid,
            abort_requested: AtomicBool::new(false),
        });

        WORKER_TASK_LIST
            .lock()
            .unwrap()
            .insert(task_id, worker.clone());

        Ok(worker)
    }

    /// Spawns `f` on a dedicated OS thread, registering a `WorkerTask`
    /// for its lifetime and deregistering it when `f` returns. One OS
    /// thread with its own DB connection stands in here for what would
    /// otherwise be a forked worker process.
    pub fn spawn_thread<F>(
        worker_type: &str,
        worker_id: Option<String>,
        username: &str,
        node: &str,
        f: F,
    ) -> Result<JoinHandle<Result<()>>>
    where
        F: Send + 'static + FnOnce(Arc<WorkerTask>) -> Result<()>,
    {
        let worker = WorkerTask::new(worker_type, worker_id, username, node)?;
        let task_id = worker.task_id;
        let thread_name = worker.upid.to_string();

        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let result = f(worker);
                WORKER_TASK_LIST.lock().unwrap().remove(&task_id);
                result
            })?;

        Ok(handle)
    }

    pub fn upid(&self) -> &UPID {
        &self.upid
    }

    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    pub fn fail_on_abort(&self) -> Result<()> {
        if self.abort_requested() {
            anyhow::bail!("task '{}': abort requested", self.upid);
        }
        Ok(())
    }
}

/// Snapshot of every currently-registered worker, for the CLI summary
/// report and for `SIGTERM` handling (request_abort on all of them).
pub fn running_worker_tasks() -> Vec<Arc<WorkerTask>> {
    WORKER_TASK_LIST.lock().unwrap().values().cloned().collect()
}

pub fn request_abort_all() {
    for worker in running_worker_tasks() {
        worker.request_abort();
    }
}
