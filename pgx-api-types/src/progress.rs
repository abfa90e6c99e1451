use serde::{Deserialize, Serialize};

/// One coarse phase of a run, matching one `run/*.done` checkpoint
/// marker on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunSection {
    SchemaDump,
    PreDataRestore,
    TableCopy,
    IndexCopy,
    SequenceCopy,
    BlobsCopy,
    PostDataRestore,
}

/// Catalog-backed run state: one boolean per coarse phase, computed by
/// re-checking the work directory's `.done` markers on startup.
/// Mutated only on completion of each section; inspected
/// on startup to decide restart vs. resume vs. refuse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub schema_dump_done: bool,
    pub pre_data_restored: bool,
    pub table_copy_done: bool,
    pub index_copy_done: bool,
    pub sequence_copy_done: bool,
    pub blobs_copy_done: bool,
    pub post_data_restored: bool,
}

impl RunState {
    pub fn all_done(&self) -> bool {
        self.schema_dump_done
            && self.pre_data_restored
            && self.table_copy_done
            && self.index_copy_done
            && self.sequence_copy_done
            && self.blobs_copy_done
            && self.post_data_restored
    }

    pub fn is_done(&self, section: RunSection) -> bool {
        match section {
            RunSection::SchemaDump => self.schema_dump_done,
            RunSection::PreDataRestore => self.pre_data_restored,
            RunSection::TableCopy => self.table_copy_done,
            RunSection::IndexCopy => self.index_copy_done,
            RunSection::SequenceCopy => self.sequence_copy_done,
            RunSection::BlobsCopy => self.blobs_copy_done,
            RunSection::PostDataRestore => self.post_data_restored,
        }
    }

    pub fn mark_done(&mut self, section: RunSection) {
        match section {
            RunSection::SchemaDump => self.schema_dump_done = true,
            RunSection::PreDataRestore => self.pre_data_restored = true,
            RunSection::TableCopy => self.table_copy_done = true,
            RunSection::IndexCopy => self.index_copy_done = true,
            RunSection::SequenceCopy => self.sequence_copy_done = true,
            RunSection::BlobsCopy => self.blobs_copy_done = true,
            RunSection::PostDataRestore => self.post_data_restored = true,
        }
    }
}

/// Progress row for a single table's data copy.
/// `pid != 0 && done_time == 0` means "in progress"; a dead `pid` with
/// `done_time == 0` means the row is reclaimable by a later run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    pub qualified_name: String,
    pub part_number: i32,
    pub part_count: i32,
    pub pid: i32,
    pub pstart: u64,
    pub start_time: i64,
    pub done_time: i64,
    pub bytes: i64,
    pub rows: i64,
    pub error: Option<String>,
}

impl TableSummary {
    pub fn is_done(&self) -> bool {
        self.done_time != 0 && self.error.is_none()
    }

    pub fn is_in_progress(&self) -> bool {
        self.pid != 0 && self.done_time == 0
    }

    pub fn is_failed(&self) -> bool {
        self.done_time != 0 && self.error.is_some()
    }
}

/// Progress row for a single index build. Same in-progress/reclaimable
/// semantics as [`TableSummary`], plus an `indexes_done_owner`
/// compare-and-set field: the worker that successfully claims "last
/// index for this table" also becomes responsible for installing the
/// table's constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSummary {
    pub index_name: String,
    pub qualified_table: String,
    pub pid: i32,
    pub pstart: u64,
    pub start_time: i64,
    pub done_time: i64,
    pub error: Option<String>,
    pub indexes_done_owner: Option<i32>,
}

impl IndexSummary {
    pub fn is_done(&self) -> bool {
        self.done_time != 0 && self.error.is_none()
    }

    pub fn is_in_progress(&self) -> bool {
        self.pid != 0 && self.done_time == 0
    }
}
