//! Embedded schema cache and progress ledger for a `pgxfer` run.
//!
//! Backed by `rusqlite` in WAL mode, the way the closest analogue in
//! the retrieval pack (a SQLite-backed event store) opens its database:
//! one file under the work directory, one writer at a time, readers
//! never blocked indefinitely.

mod entities;
mod progress;
mod schema;

pub use progress::{IndexLockOutcome, TableLockOutcome};

use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// The catalog itself. Workers each hold an `Arc<Catalog>` and take the
/// inner mutex per-statement; one writer at a time with readers never
/// blocked indefinitely is all that's required, and `rusqlite` + WAL
/// mode gives us that without a separate named semaphore (the mutex
/// takes the role a process-wide log-serialization primitive would
/// play, scoped down to this one database).
pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    /// Opens (creating if needed) the catalog database at `path` and
    /// ensures the schema exists.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening catalog db at {}", path.as_ref().display()))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            ",
        )
        .context("configuring catalog pragmas")?;

        schema::create_schema(&conn).context("creating catalog schema")?;

        Ok(Catalog {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn).context("catalog query failed")
    }

    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner().unwrap();
        conn.close().map_err(|(_, err)| err).context("closing catalog db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_and_creates_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(tmp.path().join("catalog.db")).expect("opens catalog");
        catalog.close().unwrap();
    }
}
