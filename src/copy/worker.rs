//! Copy worker loop: one OS thread, one source connection bound to the
//! shared snapshot, one long-lived target connection, consuming
//! `{TABLE_PART, oid, part}` messages until it sees `Stop`.

use std::sync::Arc;

use anyhow::{Context, Result};
use pgx_api_types::{Oid, PartitionKey};
use pgx_catalog::{Catalog, TableLockOutcome};
use pgx_tools::queue::{Message, Queue};
use pgx_tools::task_liveness::{current_pid_and_start, is_owner_alive};
use sqlx::Connection;

use crate::config::Config;
use crate::index::IndexJob;
use crate::task::WorkerTask;
use crate::vacuum::VacuumJob;
use crate::{task_error, task_log, task_warn};

/// One unit of copy work: a table (whole, or a single part of it).
#[derive(Debug, Clone)]
pub struct TablePart {
    pub oid: Oid,
    pub qualified_name: String,
    pub part_number: i32,
    pub part_count: i32,
}

/// Handed to every copy worker so the one that finishes a table's last
/// part can hand the table straight to the next stage, without the
/// supervisor having to poll the catalog.
#[derive(Clone)]
pub struct NextStageQueues {
    pub index_queue: Queue<IndexJob>,
    pub vacuum_queue: Option<Queue<VacuumJob>>,
}

pub fn run_copy_worker(
    worker: Arc<WorkerTask>,
    catalog: Arc<Catalog>,
    queue: Queue<TablePart>,
    next_stage: NextStageQueues,
    config: Config,
    snapshot_id: Option<String>,
) -> Result<()> {
    let runtime = crate::db::worker_runtime()?;
    runtime.block_on(copy_worker_loop(worker, catalog, queue, next_stage, config, snapshot_id))
}

async fn copy_worker_loop(
    worker: Arc<WorkerTask>,
    catalog: Arc<Catalog>,
    queue: Queue<TablePart>,
    next_stage: NextStageQueues,
    config: Config,
    snapshot_id: Option<String>,
) -> Result<()> {
    let mut source = crate::db::connect(&config.source_uri).await?;
    if let Some(snapshot_id) = &snapshot_id {
        crate::db::bind_snapshot(&mut source, snapshot_id).await?;
    }
    let mut target = crate::db::connect(&config.target_uri).await?;
    crate::db::set_target_guards(&mut target).await?;

    loop {
        worker.fail_on_abort()?;
        let part = match queue.recv().context("receiving from copy queue")? {
            Message::Stop => break,
            Message::Work(part) => part,
        };

        if let Err(err) =
            copy_one_part(&worker, &catalog, &mut source, &mut target, &next_stage, &config, &part).await
        {
            task_error!(worker, "copying {} part {}: {err:#}", part.qualified_name, part.part_number);
            catalog.table_summary_finish(
                &part.qualified_name,
                part.part_number,
                now(),
                0,
                0,
                Some(&err.to_string()),
            )?;
            if config.fail_fast {
                return Err(err);
            }
        }
    }

    let _ = source.close().await;
    let _ = target.close().await;
    Ok(())
}

async fn copy_one_part(
    worker: &Arc<WorkerTask>,
    catalog: &Arc<Catalog>,
    source: &mut sqlx::PgConnection,
    target: &mut sqlx::PgConnection,
    next_stage: &NextStageQueues,
    config: &Config,
    part: &TablePart,
) -> Result<()> {
    let (pid, pstart) = current_pid_and_start()?;
    let outcome = catalog.table_summary_try_acquire(
        &part.qualified_name,
        part.part_number,
        part.part_count,
        pid,
        pstart,
        now(),
        is_owner_alive,
    )?;
    match outcome {
        TableLockOutcome::AlreadyDone => {
            task_log!(worker, "{} part {} already done, skipping", part.qualified_name, part.part_number);
            return Ok(());
        }
        TableLockOutcome::Busy { pid } => {
            task_warn!(worker, "{} part {} owned by live pid {pid}, skipping", part.qualified_name, part.part_number);
            return Ok(());
        }
        TableLockOutcome::Acquired => {}
    }

    let Some(table) = catalog.lookup_table_by_qualified_name(&part.qualified_name)? else {
        // Dropped after enumeration: warn and move on.
        task_warn!(worker, "{} vanished before copy, skipping", part.qualified_name);
        return Ok(());
    };

    sqlx::query(&format!("LOCK TABLE {} IN ACCESS SHARE MODE", table.qualified_name))
        .execute(&mut *source)
        .await
        .with_context(|| format!("locking {} for read", table.qualified_name))?;

    let attrs: Vec<&str> = table.attributes.iter().map(|a| a.name.as_str()).collect();
    let attr_list = attrs.join(", ");
    let read_query = build_read_query(&table, part, &attr_list, config.binary_copy);

    if part.part_count <= 1 {
        // Unpartitioned: TRUNCATE and COPY share one transaction, which
        // is what makes FREEZE legal — freeze is used only for
        // unpartitioned tables where a fresh truncate preceded the copy
        // in the same transaction. Whether we hold the TRUNCATE
        // privilege is probed once up front (it decides the write
        // query's FREEZE option), but the TRUNCATE itself is reissued
        // at the start of every retry attempt, since a ROLLBACK after a
        // failed attempt undoes it along with everything the COPY
        // wrote.
        let truncate_sql = format!("TRUNCATE {}", table.qualified_name);
        sqlx::query("BEGIN").execute(&mut *target).await?;
        let truncated = sqlx::query(&truncate_sql).execute(&mut *target).await.is_ok();
        sqlx::query("ROLLBACK").execute(&mut *target).await?;

        let write_query = build_write_query(&table.qualified_name, &attr_list, config.binary_copy, truncated);
        let truncate_first = truncated.then_some(truncate_sql.as_str());
        let bytes = retry_copy_in_transaction(worker, source, target, truncate_first, &read_query, &write_query, config)
            .await?;
        finish_part(catalog, part, bytes)?;
    } else {
        let write_query = build_write_query(&table.qualified_name, &attr_list, config.binary_copy, false);
        let bytes = retry_copy_in_transaction(worker, source, target, None, &read_query, &write_query, config).await?;
        finish_part(catalog, part, bytes)?;
    }

    if part.part_count > 1 {
        if catalog.table_copy_done(&part.qualified_name, part.part_count)?
            && catalog.claim_table_copy_done_owner(&part.qualified_name, pid)?
        {
            enqueue_next_stage(catalog, next_stage, &table.qualified_name, table.index_count)?;
        }
    } else {
        enqueue_next_stage(catalog, next_stage, &table.qualified_name, table.index_count)?;
    }

    Ok(())
}

/// Runs one `BEGIN; [truncate_first;] pump(); COMMIT` attempt, retrying
/// the whole transaction on a connection-class failure. The transaction
/// boundary is what keeps a retried attempt from duplicating rows a
/// prior, partially-streamed `COPY FROM STDIN` already wrote: a
/// transient failure rolls the partial write back before the next
/// attempt starts, so every attempt sees the target table exactly as it
/// was before the first one began.
async fn retry_copy_in_transaction(
    worker: &Arc<WorkerTask>,
    source: &mut sqlx::PgConnection,
    target: &mut sqlx::PgConnection,
    truncate_first: Option<&str>,
    read_query: &str,
    write_query: &str,
    config: &Config,
) -> Result<i64> {
    // `Backoff::next_delay` and `sleep_interruptible` are both
    // synchronous; the sleep below blocks this worker's own
    // single-thread runtime, which is fine since the worker has nothing
    // else to do while a copy is in flight.
    let mut backoff = pgx_tools::retry::Backoff::with_time_budget(config.max_retries, Some(config.retry_time_budget));
    loop {
        worker.fail_on_abort()?;
        sqlx::query("BEGIN").execute(&mut *target).await?;
        if let Some(truncate_sql) = truncate_first {
            sqlx::query(truncate_sql)
                .execute(&mut *target)
                .await
                .context("re-truncating target on copy retry")?;
        }
        match pump(source, target, read_query, write_query).await {
            Ok(bytes) => {
                sqlx::query("COMMIT").execute(&mut *target).await?;
                return Ok(bytes);
            }
            Err(err) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *target).await;
                let transient = err
                    .downcast_ref::<sqlx::Error>()
                    .map(crate::db::is_transient)
                    .unwrap_or(false);
                if !transient {
                    return Err(err);
                }
                match backoff.next_delay() {
                    Some(delay) => {
                        log::warn!(
                            "transient copy failure on attempt {}, retrying in {delay:?}: {err:#}",
                            backoff.attempt()
                        );
                        if !pgx_tools::retry::sleep_interruptible(delay, || worker.abort_requested()) {
                            return Err(anyhow::anyhow!("copy interrupted during retry backoff"));
                        }
                    }
                    None => return Err(err),
                }
            }
        }
    }
}

/// Streams one `COPY ... TO STDOUT` into a `COPY ... FROM STDIN` a
/// chunk at a time. Shared with the auxiliary blob and extension-config
/// copiers (`src/aux/`), which have the same "read on source, write on
/// target" shape without the partitioning/retry/locking around it.
pub(crate) async fn pump(
    source: &mut sqlx::PgConnection,
    target: &mut sqlx::PgConnection,
    read_query: &str,
    write_query: &str,
) -> Result<i64> {
    use futures_util::TryStreamExt;

    let mut read_stream = source
        .copy_out_raw(read_query)
        .await
        .with_context(|| format!("opening COPY TO STDOUT: {read_query}"))?;
    let mut write_sink = target
        .copy_in_raw(write_query)
        .await
        .with_context(|| format!("opening COPY FROM STDIN: {write_query}"))?;

    let mut bytes = 0i64;
    while let Some(chunk) = read_stream
        .try_next()
        .await
        .context("reading COPY chunk from source")?
    {
        bytes += chunk.len() as i64;
        write_sink
            .send(chunk)
            .await
            .context("writing COPY chunk to target")?;
    }
    write_sink.finish().await.context("finishing COPY FROM STDIN")?;
    Ok(bytes)
}

fn finish_part(catalog: &Catalog, part: &TablePart, bytes: i64) -> Result<()> {
    catalog.table_summary_finish(&part.qualified_name, part.part_number, now(), bytes, 0, None)
}

/// Hands a fully-copied table to the index or vacuum stage. Called both
/// from a copy-worker that just finished the table's last part, and from
/// the copy supervisor when it finds a table already marked done on
/// resume (no `WorkerTask` exists there, hence plain `log::` macros
/// rather than `task_log!`/`task_warn!`).
pub(crate) fn enqueue_next_stage(
    catalog: &Catalog,
    next_stage: &NextStageQueues,
    qualified_table: &str,
    index_count: i32,
) -> Result<()> {
    if index_count == 0 {
        log::info!("{qualified_table} has no indexes, ready for vacuum");
        if let Some(vacuum_queue) = &next_stage.vacuum_queue {
            vacuum_queue
                .send_work(VacuumJob {
                    qualified_name: qualified_table.to_string(),
                })
                .context("enqueueing vacuum job")?;
        }
        return Ok(());
    }

    log::info!("all parts of {qualified_table} copied, enqueueing {index_count} index(es)");
    let mut enqueued = 0;
    catalog.iter_indexes_for_table(qualified_table, |index| {
        enqueued += 1;
        next_stage
            .index_queue
            .send_work(IndexJob {
                oid: index.oid,
                qualified_table: qualified_table.to_string(),
            })
            .is_ok()
    })?;
    if enqueued != index_count {
        log::warn!("expected {index_count} indexes for {qualified_table}, enqueued {enqueued}");
    }
    Ok(())
}

fn build_read_query(table: &pgx_api_types::SourceTable, part: &TablePart, attr_list: &str, binary: bool) -> String {
    let format = if binary { " (FORMAT binary)" } else { "" };
    let base = match &table.partition_key {
        None => format!("COPY {} ({attr_list}) TO STDOUT{format}", table.qualified_name),
        Some(PartitionKey::Integer { column, .. }) => {
            let range = table
                .partition_plan
                .as_ref()
                .and_then(|p| p.ranges.iter().find(|r| r.part_number == part.part_number))
                .expect("part_number present in plan");
            let predicate = if range.is_null_bucket() {
                format!("{column} IS NULL")
            } else if range.is_open_ended() {
                format!("{column} >= {}", range.min)
            } else {
                format!("{column} BETWEEN {} AND {}", range.min, range.max)
            };
            format!(
                "COPY (SELECT {attr_list} FROM {} WHERE {predicate}) TO STDOUT{format}",
                table.qualified_name
            )
        }
        Some(PartitionKey::Ctid) => {
            let range = table
                .partition_plan
                .as_ref()
                .and_then(|p| p.ranges.iter().find(|r| r.part_number == part.part_number))
                .expect("part_number present in plan");
            let predicate = if range.is_open_ended() {
                format!("ctid >= '({},0)'::tid", range.min)
            } else {
                format!("ctid >= '({},0)'::tid AND ctid < '({},0)'::tid", range.min, range.max)
            };
            format!(
                "COPY (SELECT {attr_list} FROM {} WHERE {predicate}) TO STDOUT{format}",
                table.qualified_name
            )
        }
    };
    base
}

fn build_write_query(qualified_name: &str, attr_list: &str, binary: bool, freeze: bool) -> String {
    let mut opts = Vec::new();
    if binary {
        opts.push("FORMAT binary".to_string());
    }
    if freeze {
        opts.push("FREEZE".to_string());
    }
    if opts.is_empty() {
        format!("COPY {qualified_name} ({attr_list}) FROM STDIN")
    } else {
        format!("COPY {qualified_name} ({attr_list}) FROM STDIN ({})", opts.join(", "))
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
