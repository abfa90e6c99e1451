//! Progress-record-as-lock operations over `TableSummary`/
//! "IndexSummary" rows, which act as locks: compare-and-set updates to
//! these rows decide index/constraint ownership between racing workers.

use anyhow::Result;
use rusqlite::{params, OptionalExtension};

use crate::Catalog;

/// Result of attempting to start work on a `(table, part)`.
#[derive(Debug, PartialEq, Eq)]
pub enum TableLockOutcome {
    /// No prior row, or a prior row whose owner is dead: the caller may
    /// proceed and a fresh "in progress" row now exists with its pid.
    Acquired,
    /// A live process already owns this `(table, part)`.
    Busy { pid: i32 },
    /// A row exists with `done_time != 0` and no error: already done.
    AlreadyDone,
}

#[derive(Debug, PartialEq, Eq)]
pub enum IndexLockOutcome {
    Acquired,
    Busy { pid: i32 },
    AlreadyDone,
}

impl Catalog {
    /// Attempts to start (or resume ownership of) work on one table
    /// part. `is_owner_alive` lets the caller supply the pid+starttime
    /// liveness check (`pgx-tools::task_liveness::is_owner_alive`)
    /// without this crate depending on `pgx-tools` for a single
    /// predicate.
    pub fn table_summary_try_acquire(
        &self,
        qualified_name: &str,
        part_number: i32,
        part_count: i32,
        pid: i32,
        pstart: u64,
        now: i64,
        is_owner_alive: impl Fn(i32, u64) -> bool,
    ) -> Result<TableLockOutcome> {
        self.with_conn(|conn| {
            let existing: Option<(i32, u64, i64, Option<String>)> = conn
                .query_row(
                    "SELECT pid, pstart, done_time, error FROM table_summary
                     WHERE qualified_name = ?1 AND part_number = ?2",
                    params![qualified_name, part_number],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            if let Some((existing_pid, existing_pstart, done_time, error)) = existing {
                if done_time != 0 && error.is_none() {
                    return Ok(TableLockOutcome::AlreadyDone);
                }
                if done_time == 0 && is_owner_alive(existing_pid, existing_pstart) {
                    return Ok(TableLockOutcome::Busy { pid: existing_pid });
                }
                // stale or previously-failed row: reclaim it.
                conn.execute(
                    "UPDATE table_summary
                     SET pid = ?1, pstart = ?2, start_time = ?3, done_time = 0, error = NULL
                     WHERE qualified_name = ?4 AND part_number = ?5",
                    params![pid, pstart, now, qualified_name, part_number],
                )?;
                return Ok(TableLockOutcome::Acquired);
            }

            conn.execute(
                "INSERT INTO table_summary
                    (qualified_name, part_number, part_count, pid, pstart, start_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![qualified_name, part_number, part_count, pid, pstart, now],
            )?;
            Ok(TableLockOutcome::Acquired)
        })
    }

    pub fn table_summary_finish(
        &self,
        qualified_name: &str,
        part_number: i32,
        done_time: i64,
        bytes: i64,
        rows: i64,
        error: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE table_summary
                 SET done_time = ?1, bytes = ?2, rows = ?3, error = ?4
                 WHERE qualified_name = ?5 AND part_number = ?6",
                params![done_time, bytes, rows, error, qualified_name, part_number],
            )?;
            Ok(())
        })
    }

    /// `true` once every part of `qualified_name` has a `done_time != 0`
    /// and no error, and at least one part row exists.
    pub fn table_copy_done(&self, qualified_name: &str, part_count: i32) -> Result<bool> {
        self.with_conn(|conn| {
            let done_parts: i32 = conn.query_row(
                "SELECT COUNT(*) FROM table_summary
                 WHERE qualified_name = ?1 AND done_time != 0 AND error IS NULL",
                params![qualified_name],
                |row| row.get(0),
            )?;
            Ok(done_parts >= part_count)
        })
    }

    pub fn index_summary_try_acquire(
        &self,
        index_name: &str,
        qualified_table: &str,
        pid: i32,
        pstart: u64,
        now: i64,
        is_owner_alive: impl Fn(i32, u64) -> bool,
    ) -> Result<IndexLockOutcome> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO table_indexes_done_owner (qualified_table, owner_pid)
                 VALUES (?1, NULL)",
                params![qualified_table],
            )?;

            let existing: Option<(i32, u64, i64, Option<String>)> = conn
                .query_row(
                    "SELECT pid, pstart, done_time, error FROM index_summary WHERE index_name = ?1",
                    params![index_name],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            if let Some((existing_pid, existing_pstart, done_time, error)) = existing {
                if done_time != 0 && error.is_none() {
                    return Ok(IndexLockOutcome::AlreadyDone);
                }
                if done_time == 0 && is_owner_alive(existing_pid, existing_pstart) {
                    return Ok(IndexLockOutcome::Busy { pid: existing_pid });
                }
                conn.execute(
                    "UPDATE index_summary
                     SET pid = ?1, pstart = ?2, start_time = ?3, done_time = 0, error = NULL
                     WHERE index_name = ?4",
                    params![pid, pstart, now, index_name],
                )?;
                return Ok(IndexLockOutcome::Acquired);
            }

            conn.execute(
                "INSERT INTO index_summary
                    (index_name, qualified_table, pid, pstart, start_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![index_name, qualified_table, pid, pstart, now],
            )?;
            Ok(IndexLockOutcome::Acquired)
        })
    }

    pub fn index_summary_finish(
        &self,
        index_name: &str,
        done_time: i64,
        error: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE index_summary SET done_time = ?1, error = ?2 WHERE index_name = ?3",
                params![done_time, error, index_name],
            )?;
            Ok(())
        })
    }

    /// `true` once every registered index of `qualified_table` is done
    /// without error (spec invariant: "if indexCount(table) == 0 then
    /// indexesDone(table) is trivially true"). `index_count` is the
    /// catalog's `tables.index_count`, passed in so a table with zero
    /// indexes doesn't need a row in `index_summary` at all.
    pub fn indexes_done(&self, qualified_table: &str, index_count: i32) -> Result<bool> {
        if index_count == 0 {
            return Ok(true);
        }
        self.with_conn(|conn| {
            let done: i32 = conn.query_row(
                "SELECT COUNT(*) FROM index_summary
                 WHERE qualified_table = ?1 AND done_time != 0 AND error IS NULL",
                params![qualified_table],
                |row| row.get(0),
            )?;
            Ok(done >= index_count)
        })
    }

    /// Compare-and-set ownership transition: a worker that just
    /// finished an index calls this to find out whether it is the one
    /// responsible for installing `qualified_table`'s constraints and
    /// enqueueing the table for vacuum. Only the first caller after all
    /// indexes are done gets `true`; every later caller (including a
    /// retried call from the same worker) gets `false`.
    pub fn claim_last_index_owner(&self, qualified_table: &str, pid: i32) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE table_indexes_done_owner
                 SET owner_pid = ?1
                 WHERE qualified_table = ?2 AND owner_pid IS NULL",
                params![pid, qualified_table],
            )?;
            Ok(updated == 1)
        })
    }

    /// Compare-and-set ownership transition: a copy worker that
    /// just finished a part calls this to find out whether it is the
    /// one responsible for enqueueing `qualified_table`'s indexes (or,
    /// for a zero-index table, the table itself for vacuum). Only the
    /// first caller after every part is done gets `true`.
    pub fn claim_table_copy_done_owner(&self, qualified_table: &str, pid: i32) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO table_copy_done_owner (qualified_table, owner_pid)
                 VALUES (?1, NULL)",
                params![qualified_table],
            )?;
            let updated = conn.execute(
                "UPDATE table_copy_done_owner
                 SET owner_pid = ?1
                 WHERE qualified_table = ?2 AND owner_pid IS NULL",
                params![pid, qualified_table],
            )?;
            Ok(updated == 1)
        })
    }

    pub fn upsert_process_info(
        &self,
        qualified_table: &str,
        pid: i32,
        pstart: u64,
        role: &str,
        now: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO process_info (qualified_table, pid, pstart, role, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(qualified_table) DO UPDATE SET
                    pid = excluded.pid,
                    pstart = excluded.pstart,
                    role = excluded.role,
                    updated_at = excluded.updated_at",
                params![qualified_table, pid, pstart, role, now],
            )?;
            Ok(())
        })
    }

    pub fn delete_process(&self, qualified_table: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM process_info WHERE qualified_table = ?1",
                params![qualified_table],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always_dead(_pid: i32, _pstart: u64) -> bool {
        false
    }

    #[test]
    fn table_lock_is_exclusive_while_owner_alive() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(tmp.path().join("c.db")).unwrap();

        let first = catalog
            .table_summary_try_acquire("public.orders", 0, 1, 100, 1, 0, |_, _| true)
            .unwrap();
        assert_eq!(first, TableLockOutcome::Acquired);

        let second = catalog
            .table_summary_try_acquire("public.orders", 0, 1, 200, 1, 0, |_, _| true)
            .unwrap();
        assert_eq!(second, TableLockOutcome::Busy { pid: 100 });
    }

    #[test]
    fn stale_owner_is_reclaimed() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(tmp.path().join("c.db")).unwrap();

        catalog
            .table_summary_try_acquire("public.orders", 0, 1, 100, 1, 0, |_, _| true)
            .unwrap();

        let reclaimed = catalog
            .table_summary_try_acquire("public.orders", 0, 1, 200, 1, 0, always_dead)
            .unwrap();
        assert_eq!(reclaimed, TableLockOutcome::Acquired);
    }

    #[test]
    fn only_one_worker_claims_last_index_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(tmp.path().join("c.db")).unwrap();

        catalog
            .index_summary_try_acquire("orders_pkey", "public.orders", 1, 1, 0, |_, _| true)
            .unwrap();
        catalog.index_summary_finish("orders_pkey", 10, None).unwrap();

        let first = catalog.claim_last_index_owner("public.orders", 1).unwrap();
        let second = catalog.claim_last_index_owner("public.orders", 2).unwrap();
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn zero_index_table_is_trivially_done() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(tmp.path().join("c.db")).unwrap();
        assert!(catalog.indexes_done("public.orders", 0).unwrap());
    }

    #[test]
    fn only_one_worker_claims_table_copy_done_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(tmp.path().join("c.db")).unwrap();

        let first = catalog.claim_table_copy_done_owner("public.big", 11).unwrap();
        let second = catalog.claim_table_copy_done_owner("public.big", 12).unwrap();
        assert!(first);
        assert!(!second);
    }
}
