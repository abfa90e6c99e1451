//! Root orchestrator: wires every component together for one migration
//! run, with a run-wide fail-fast flag any stage can trip.
//!
//! ```text
//! root
//! ├── copy-supervisor
//! │    └── copy-worker × table-jobs
//! ├── index-supervisor
//! │    └── index-worker × index-jobs
//! ├── vacuum-supervisor
//! │    └── vacuum-worker × vacuum-jobs
//! ├── blob-copier (optional)
//! └── sequence-resetter (optional)
//! ```
//!
//! The copy/index/vacuum supervisors and the auxiliary single-shot
//! processes all run as
//! concurrent siblings rather than sequential stages: nothing about a
//! table's sequence values or large objects depends on whether that
//! table's indexes are built yet, since both read from the catalog's
//! discovery-time snapshot rather than live source state.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use pgx_api_types::RunSection;
use pgx_catalog::Catalog;
use pgx_config::{WorkDirLayout, WorkDirMode};
use pgx_tools::queue::Queue;

use crate::config::Config;
use crate::external::{DumpRestoreClient, ProcessDumpRestoreClient, RestoreOptions};
use crate::index::IndexJob;
use crate::task::WorkerTask;
use crate::vacuum::VacuumJob;
use crate::{copy, index, signal, source, task, vacuum};

pub struct RunSummary {
    pub tables_enqueued: usize,
    pub parts_enqueued: usize,
}

/// Runs one migration end to end against an already-parsed [`Config`].
/// Installs signal handlers, prepares the work directory, and either
/// resumes or starts fresh depending on [`Config::mode`].
pub fn run(config: Config) -> Result<RunSummary> {
    signal::install_handlers().context("installing signal handlers")?;
    let watchdog = spawn_signal_watchdog();

    let layout = WorkDirLayout::new(&config.workdir);
    let (mut state, _pidfile_guard) = layout.prepare(config.mode).context("preparing work directory")?;

    let client = ProcessDumpRestoreClient::default();

    if !state.is_done(RunSection::SchemaDump) {
        dump_schema(&client, &config, &layout)?;
        layout.mark_section_done(RunSection::SchemaDump)?;
        state.mark_done(RunSection::SchemaDump);
    }

    let catalog = Arc::new(Catalog::open(layout.catalog_db()).context("opening catalog")?);

    // A snapshot token exported by a prior process is worthless here:
    // `pg_export_snapshot()`'s token stays valid only while the
    // exporting transaction is open, and that transaction's connection
    // closed along with the process that ran discovery. A resumed run
    // therefore proceeds `--not-consistent` for whatever work remains,
    // same as `snapshot.rs`'s own module docs describe. On a fresh run,
    // `discover_schema` hands back a live `SnapshotManager` whose
    // background thread keeps the exporting transaction open; it must
    // stay open until every copy/blob/extension-config worker spawned
    // by `run_pipeline` below has finished binding to and using it.
    let snapshot = if catalog.table_count()? == 0 {
        discover_schema(&config, &layout, &catalog)?
    } else {
        log::info!("resuming with an already-populated catalog; remaining workers run without a shared snapshot");
        None
    };
    let snapshot_id = snapshot.as_ref().map(|s| s.id().to_string());

    if !state.is_done(RunSection::PreDataRestore) {
        restore_pre_data(&client, &config, &layout)?;
        layout.mark_section_done(RunSection::PreDataRestore)?;
        state.mark_done(RunSection::PreDataRestore);
    }

    let pipeline_result = run_pipeline(&config, &layout, catalog.clone(), snapshot_id, &mut state);

    if let Some(snapshot) = snapshot {
        if let Err(err) = snapshot.close() {
            log::warn!("closing snapshot-export transaction: {err:#}");
        }
    }
    let summary = pipeline_result?;

    if !state.is_done(RunSection::PostDataRestore) {
        restore_post_data(&client, &config, &layout)?;
        layout.mark_section_done(RunSection::PostDataRestore)?;
        state.mark_done(RunSection::PostDataRestore);
    }

    watchdog.stop();
    Arc::try_unwrap(catalog)
        .map_err(|_| anyhow::anyhow!("catalog still referenced by a live worker"))?
        .close()?;

    Ok(summary)
}

fn dump_schema(client: &ProcessDumpRestoreClient, config: &Config, layout: &WorkDirLayout) -> Result<()> {
    client
        .dump_pre_data(&config.source_uri, &layout.schema_dir().join("pre.dump"))
        .context("dumping pre-data section")?;
    client
        .dump_post_data(&config.source_uri, &layout.schema_dir().join("post.dump"))
        .context("dumping post-data section")?;
    client
        .dump_roles(&config.source_uri, &layout.schema_dir().join("roles.sql"))
        .context("dumping roles")?;
    Ok(())
}

fn restore_pre_data(client: &ProcessDumpRestoreClient, config: &Config, layout: &WorkDirLayout) -> Result<()> {
    client
        .restore_roles(&config.target_uri, &layout.schema_dir().join("roles.sql"))
        .context("restoring roles")?;
    client
        .restore(
            &config.target_uri,
            &layout.schema_dir().join("pre.dump"),
            &RestoreOptions {
                drop_if_exists: config.mode == WorkDirMode::Restart,
                no_owner: false,
                use_list: None,
            },
        )
        .context("restoring pre-data section")
}

fn restore_post_data(client: &ProcessDumpRestoreClient, _config: &Config, layout: &WorkDirLayout) -> Result<()> {
    client
        .restore(
            &config.target_uri,
            &layout.schema_dir().join("post.dump"),
            &RestoreOptions::default(),
        )
        .context("restoring post-data section")
}

/// Exports the source snapshot (unless `--not-consistent`) on a
/// dedicated connection that the returned [`crate::snapshot::SnapshotManager`]
/// keeps open in the background, then runs schema discovery on its own,
/// separate connection — bound to that same snapshot, exactly like
/// every copy/blob/extension-config worker that opens a source
/// connection later in the run.
fn discover_schema(
    config: &Config,
    layout: &WorkDirLayout,
    catalog: &Catalog,
) -> Result<Option<crate::snapshot::SnapshotManager>> {
    let snapshot = crate::snapshot::export_and_hold(&config.source_uri, &layout.snapshot_file(), config.not_consistent)?;

    let runtime = crate::db::worker_runtime()?;
    runtime.block_on(async {
        let mut conn = crate::db::connect(&config.source_uri).await?;
        if let Some(snapshot) = &snapshot {
            crate::db::bind_snapshot(&mut conn, snapshot.id()).await?;
        }

        source::discover_all(&mut conn, catalog, config)
            .await
            .context("discovering source schema")?;

        if snapshot.is_some() {
            sqlx::query("COMMIT").execute(&mut conn).await.context("closing discovery transaction")?;
        }
        let _ = sqlx::Connection::close(conn).await;

        Ok(())
    })?;

    Ok(snapshot)
}

/// Spawns the copy/index/vacuum supervisors and the enabled auxiliary
/// processes as concurrent sibling threads, joins all of them, and
/// marks the coarse-phase checkpoints their success unlocks.
fn run_pipeline(
    config: &Config,
    layout: &WorkDirLayout,
    catalog: Arc<Catalog>,
    snapshot_id: Option<String>,
    state: &mut pgx_api_types::RunState,
) -> Result<RunSummary> {
    // Unbounded: spec §4.4 requires `send` never to block once a queue
    // is created, which a `crossbeam_channel::bounded` sender can't
    // guarantee once it's full.
    let index_queue: Queue<IndexJob> = Queue::unbounded();
    let vacuum_queue: Queue<VacuumJob> = Queue::unbounded();
    let vacuum_queue_opt = if config.skip_vacuum { None } else { Some(vacuum_queue.clone()) };

    let vacuum_handle = (!config.skip_vacuum).then(|| {
        let config = config.clone();
        let queue = vacuum_queue.clone();
        std::thread::spawn(move || vacuum::run_vacuum_stage(&config, queue).map(|o| o.tables_vacuumed))
    });

    let copy_handle = {
        let config = config.clone();
        let catalog = catalog.clone();
        let index_queue = index_queue.clone();
        let vacuum_queue_opt = vacuum_queue_opt.clone();
        std::thread::spawn(move || copy::supervisor::run_copy_stage(catalog, &config, snapshot_id, index_queue, vacuum_queue_opt))
    };

    let index_handle = {
        let config = config.clone();
        let catalog = catalog.clone();
        let index_queue = index_queue.clone();
        let vacuum_queue_opt = vacuum_queue_opt.clone();
        std::thread::spawn(move || index::supervisor::run_index_stage(catalog, &config, index_queue, vacuum_queue_opt))
    };

    let mut aux_handles: Vec<(&'static str, JoinHandle<Result<()>>)> = Vec::new();
    if !config.skip_sequences {
        aux_handles.push(("sequence-reset", spawn_aux(config, "sequence-resetter", {
            let catalog = catalog.clone();
            let config = config.clone();
            move |worker| crate::aux::run_sequence_reset(worker, catalog, config)
        })?));
    }
    if !config.skip_blobs {
        aux_handles.push(("blob-copy", spawn_aux(config, "blob-copier", {
            let config = config.clone();
            move |worker| crate::aux::run_blob_copy(worker, config)
        })?));
    }
    if !config.skip_extension_config {
        aux_handles.push(("extension-config-copy", spawn_aux(config, "extension-config-copier", {
            let catalog = catalog.clone();
            let config = config.clone();
            move |worker| crate::aux::run_extension_config_copy(worker, catalog, config)
        })?));
    }

    let copy_outcome = join_stage(copy_handle, config, "copy supervisor");
    let index_outcome = join_stage(index_handle, config, "index supervisor");

    // Only the orchestrator knows both upstream stages have stopped
    // feeding the vacuum queue, so only it can safely announce
    // end-of-input.
    if let Some(queue) = &vacuum_queue_opt {
        queue
            .send_stop_to_all(config.vacuum_jobs)
            .context("sending STOP to vacuum workers")?;
    }
    let vacuum_outcome = vacuum_handle.map(|h| join_result(h, config, "vacuum supervisor"));

    let mut first_err = None;
    for (name, handle) in aux_handles {
        if let Err(err) = join_result(handle, config, name) {
            first_err.get_or_insert(err);
        }
    }

    let copy_outcome = copy_outcome?;
    index_outcome?;
    if let Some(outcome) = vacuum_outcome {
        outcome?;
    }
    if let Some(err) = first_err {
        return Err(err);
    }

    layout.mark_section_done(RunSection::TableCopy)?;
    state.mark_done(RunSection::TableCopy);
    layout.mark_section_done(RunSection::IndexCopy)?;
    state.mark_done(RunSection::IndexCopy);
    // Each aux process is gated on its own skip flag: skip_vacuum,
    // skip_sequences, and skip_blobs are independent knobs, so running
    // sequences/blobs while vacuum is skipped must still record their
    // own completion markers.
    if !config.skip_sequences {
        layout.mark_section_done(RunSection::SequenceCopy)?;
        state.mark_done(RunSection::SequenceCopy);
    }
    if !config.skip_blobs {
        layout.mark_section_done(RunSection::BlobsCopy)?;
        state.mark_done(RunSection::BlobsCopy);
    }

    Ok(RunSummary {
        tables_enqueued: copy_outcome.tables_enqueued,
        parts_enqueued: copy_outcome.parts_enqueued,
    })
}

fn spawn_aux<F>(config: &Config, worker_type: &str, f: F) -> Result<JoinHandle<Result<()>>>
where
    F: FnOnce(Arc<WorkerTask>) -> Result<()> + Send + 'static,
{
    WorkerTask::spawn_thread(worker_type, None, &config.username, &config.node, f)
}

fn join_stage<T>(handle: JoinHandle<Result<T>>, config: &Config, name: &str) -> Result<T> {
    join_result(handle, config, name)
}

fn join_result<T>(handle: JoinHandle<Result<T>>, config: &Config, name: &str) -> Result<T> {
    match handle.join() {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(err)) => {
            log::error!("{name} failed: {err:#}");
            if config.fail_fast {
                // Stands in for signalling the whole process group in a
                // fork/exec model: every other worker's next
                // `fail_on_abort()` check now returns an error too.
                task::request_abort_all();
            }
            Err(err)
        }
        Err(_) => {
            let err = anyhow::anyhow!("{name} thread panicked");
            if config.fail_fast {
                task::request_abort_all();
            }
            Err(err)
        }
    }
}

struct Watchdog {
    stop: Arc<std::sync::atomic::AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    fn stop(mut self) {
        self.stop.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Polls the global `SIGINT`/`SIGTERM`/`SIGQUIT` flag and escalates to
/// every live [`WorkerTask`]; every blocking loop checks its own abort
/// flag after each message it processes.
fn spawn_signal_watchdog() -> Watchdog {
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let watch_stop = stop.clone();
    let handle = std::thread::spawn(move || {
        while !watch_stop.load(std::sync::atomic::Ordering::SeqCst) {
            if signal::asked_to_stop() {
                task::request_abort_all();
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    });
    Watchdog {
        stop,
        handle: Some(handle),
    }
}
