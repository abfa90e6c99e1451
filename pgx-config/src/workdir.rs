//! Work directory preparation: layout, pidfile ownership, and
//! checkpoint-marker inspection.
//!
//! Grounded on the teacher's `open_backup_lockfile` (`pbs-config/src/lib.rs`)
//! for the pidfile-as-lock pattern, generalized from a single advisory
//! lock to the fcntl-based `ProcessLocker` (`pgx-tools::process_locker`)
//! so a stale pidfile's liveness can be checked by pid+starttime rather
//! than by lock-held-or-not alone.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use pgx_api_types::progress::{RunSection, RunState};
use pgx_api_types::PgxError;
use pgx_tools::task_liveness::{current_pid_and_start, is_owner_alive};

/// How the caller wants to treat an existing work directory, passed to
/// `prepare(workdir, {restart, resume, auxiliary})`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkDirMode {
    /// Fail unless the directory is fresh or already complete.
    Fresh,
    /// Wipe any existing state and start over.
    Restart,
    /// Continue a previously interrupted run.
    Resume,
}

/// Filesystem layout of a single run's work directory.
pub struct WorkDirLayout {
    pub root: PathBuf,
}

const PIDFILE_NAME: &str = "pgxfer.pid";
const SNAPSHOT_FILE_NAME: &str = "snapshot";

struct Checkpoint {
    section: RunSection,
    file_name: &'static str,
}

const CHECKPOINTS: &[Checkpoint] = &[
    Checkpoint {
        section: RunSection::SchemaDump,
        file_name: "dump-pre.done",
    },
    Checkpoint {
        section: RunSection::PreDataRestore,
        file_name: "restore-pre.done",
    },
    Checkpoint {
        section: RunSection::TableCopy,
        file_name: "tables.done",
    },
    Checkpoint {
        section: RunSection::IndexCopy,
        file_name: "indexes.done",
    },
    Checkpoint {
        section: RunSection::SequenceCopy,
        file_name: "sequences.done",
    },
    Checkpoint {
        section: RunSection::BlobsCopy,
        file_name: "blobs.done",
    },
    Checkpoint {
        section: RunSection::PostDataRestore,
        file_name: "restore-post.done",
    },
];

impl WorkDirLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        WorkDirLayout { root: root.into() }
    }

    pub fn pidfile(&self) -> PathBuf {
        self.root.join(PIDFILE_NAME)
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE_NAME)
    }

    pub fn schema_dir(&self) -> PathBuf {
        self.root.join(pgx_buildcfg::WORKDIR_SCHEMA_SUBDIR)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join(pgx_buildcfg::WORKDIR_RUN_SUBDIR)
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.run_dir().join("tables")
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.run_dir().join("indexes")
    }

    pub fn cdc_dir(&self) -> PathBuf {
        self.root.join(pgx_buildcfg::WORKDIR_CDC_SUBDIR)
    }

    pub fn catalog_db(&self) -> PathBuf {
        self.schema_dir().join(pgx_buildcfg::CATALOG_DB_NAME)
    }

    fn checkpoint_path(&self, section: RunSection) -> PathBuf {
        let file_name = CHECKPOINTS
            .iter()
            .find(|c| c.section == section)
            .expect("every RunSection has a checkpoint entry")
            .file_name;
        self.run_dir().join(file_name)
    }

    /// Creates `workdir/{schema,run,run/tables,run/indexes,cdc}` (spec
    /// §4.1 "Creates `workdir/{schema, run, run/tables, run/indexes, cdc}`").
    fn create_dirs(&self) -> Result<()> {
        for dir in [
            &self.schema_dir(),
            &self.tables_dir(),
            &self.indexes_dir(),
            &self.cdc_dir(),
        ] {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }

    /// Reads every checkpoint marker present on disk into a [`RunState`].
    fn read_run_state(&self) -> RunState {
        let mut state = RunState::default();
        for checkpoint in CHECKPOINTS {
            if self.checkpoint_path(checkpoint.section).exists() {
                state.mark_done(checkpoint.section);
            }
        }
        state
    }

    pub fn mark_section_done(&self, section: RunSection) -> Result<()> {
        let path = self.checkpoint_path(section);
        fs::write(&path, []).with_context(|| format!("writing checkpoint {}", path.display()))
    }

    /// Registers the calling process as the owner of `workdir` and
    /// returns the `RunState` computed from whatever checkpoint markers
    /// already exist.
    ///
    /// - `Fresh`: if a live owner exists, fails with `WorkdirBusy`; if a
    ///   stale pidfile is found its lock is simply re-acquired (a dead
    ///   process cannot hold an fcntl lock, so this is safe without
    ///   extra bookkeeping); a directory already `all_done()` fails with
    ///   `UseRestart`, and a partially-done one fails with
    ///   `ResumeRequired`.
    /// - `Restart`: wipes `run/` and `schema/` (keeping nothing) before
    ///   recreating the layout.
    /// - `Resume`: continues an interrupted run if one exists; on a
    ///   directory that didn't exist yet, per spec §4.1's policy table
    ///   "fresh" + "resume" both start, so this degrades to a fresh
    ///   start rather than failing.
    /// Returns the computed `RunState` plus the exclusive pidfile guard;
    /// the caller must hold the guard for the run's full lifetime so a
    /// second `prepare()` elsewhere sees a live owner and fails with
    /// `WorkdirBusy` rather than colliding.
    pub fn prepare(
        &self,
        mode: WorkDirMode,
    ) -> Result<(RunState, pgx_tools::process_locker::ProcessLockExclusiveGuard)> {
        let existed = self.root.exists();
        if existed && mode == WorkDirMode::Restart {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("clearing {}", self.root.display()))?;
        }
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating {}", self.root.display()))?;
        self.create_dirs()?;

        let guard = self.acquire_pidfile()?;

        let state = self.read_run_state();

        match mode {
            WorkDirMode::Fresh => {
                if state.all_done() && existed {
                    bail!(PgxError::UseRestart);
                }
                if !state.all_done() && has_any_progress(&state) {
                    bail!(PgxError::ResumeRequired);
                }
            }
            // Spec §4.1's policy table has no "directory doesn't exist"
            // cell of its own: a directory that didn't exist before this
            // call is the "fresh" row, and "fresh" + "resume" => start.
            WorkDirMode::Resume => {}
            WorkDirMode::Restart => {}
        }

        Ok((state, guard))
    }

    /// Opens (creating if needed) the pidfile and takes an exclusive
    /// `ProcessLocker` lock, stamping it with our own pid/starttime. If
    /// another live process already holds it, returns `WorkdirBusy`.
    fn acquire_pidfile(&self) -> Result<pgx_tools::process_locker::ProcessLockExclusiveGuard> {
        let pidfile = self.pidfile();
        let locker = pgx_tools::process_locker::ProcessLocker::new(&pidfile)?;

        let prior = fs::read_to_string(&pidfile).unwrap_or_default();
        if let Some((pid, pstart)) = parse_pidfile(&prior) {
            if is_owner_alive(pid, pstart) {
                bail!(PgxError::WorkdirBusy { pid });
            }
            log::info!("reclaiming stale pidfile left by pid {pid}");
        }

        let guard = pgx_tools::process_locker::ProcessLocker::try_exclusive_lock(locker)
            .context("another pgxfer run holds this work directory")?;

        let (pid, pstart) = current_pid_and_start()?;
        fs::write(
            &pidfile,
            format!("{pid}:{pstart}:{}\n", pgx_buildcfg::PGXFER_PKG_VERSION),
        )
        .with_context(|| format!("writing {}", pidfile.display()))?;

        Ok(guard)
    }
}

fn parse_pidfile(contents: &str) -> Option<(i32, u64)> {
    let mut parts = contents.trim().splitn(3, ':');
    let pid = parts.next()?.parse().ok()?;
    let pstart = parts.next()?.parse().ok()?;
    Some((pid, pstart))
}

fn has_any_progress(state: &RunState) -> bool {
    state.schema_dump_done
        || state.pre_data_restored
        || state.table_copy_done
        || state.index_copy_done
        || state.sequence_copy_done
        || state.blobs_copy_done
        || state.post_data_restored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_workdir_has_no_progress() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = WorkDirLayout::new(tmp.path().join("run1"));
        let (state, _guard) = layout.prepare(WorkDirMode::Fresh).expect("prepares cleanly");
        assert!(!state.all_done());
        assert!(!has_any_progress(&state));
    }

    #[test]
    fn resume_without_prior_run_starts_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = WorkDirLayout::new(tmp.path().join("missing"));
        let (state, _guard) = layout.prepare(WorkDirMode::Resume).expect("fresh + resume starts");
        assert!(!state.all_done());
        assert!(!has_any_progress(&state));
    }

    #[test]
    fn restart_clears_prior_checkpoints() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("run1");
        let layout = WorkDirLayout::new(&root);
        {
            let (_state, _guard) = layout.prepare(WorkDirMode::Fresh).unwrap();
            layout.mark_section_done(RunSection::SchemaDump).unwrap();
        }

        let layout = WorkDirLayout::new(&root);
        let (state, _guard) = layout.prepare(WorkDirMode::Restart).unwrap();
        assert!(!state.schema_dump_done);
    }
}
