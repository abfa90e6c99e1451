use serde::{Deserialize, Serialize};

use crate::oid::Oid;
use crate::partition::{PartitionKey, PartitionPlan};

/// A source-side column, as discovered by schema inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAttribute {
    pub name: String,
    pub attnum: i32,
    pub type_oid: Oid,
    pub type_name: String,
    pub not_null: bool,
    pub collation: Option<String>,
}

/// A source-side table. `partition_key`/`partition_plan` are populated
/// by the partition planner once the copy supervisor decides the table
/// is large enough to split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceTable {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
    pub qualified_name: String,
    pub estimated_rows: i64,
    pub estimated_bytes: i64,
    pub exclude_data: bool,
    pub restore_list_name: String,
    pub partition_key: Option<PartitionKey>,
    pub partition_plan: Option<PartitionPlan>,
    pub index_count: i32,
    pub constraint_count: i32,
    pub attributes: Vec<SourceAttribute>,
}

/// A source-side index. `is_constraint` marks indexes backing a
/// `UNIQUE`/`PRIMARY KEY` constraint, which are installed as
/// constraints rather than bare `CREATE INDEX`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceIndex {
    pub oid: Oid,
    pub name: String,
    pub qualified_table: String,
    pub definition: String,
    pub is_constraint: bool,
    pub is_primary: bool,
    pub is_unique: bool,
    /// Name of the constraint this index backs, if any, used to build
    /// `ALTER TABLE ... ADD CONSTRAINT <c> ...`.
    pub constraint_name: Option<String>,
    /// Full `pg_get_constraintdef()` output, used verbatim for
    /// constraints that are neither PRIMARY KEY nor UNIQUE (e.g.
    /// `EXCLUDE`), which can't use `... USING INDEX`.
    pub constraint_def: Option<String>,
    pub deferrable: bool,
    pub initially_deferred: bool,
}

/// A source-side sequence, copied by the auxiliary sequence-reset pass
/// after data copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSequence {
    pub oid: Oid,
    pub qualified_name: String,
    pub last_value: i64,
    pub is_called: bool,
}

/// A non-default collation referenced by a table's columns; collected
/// so pre-data restore can confirm the target has a matching collation
/// before `CREATE TABLE` runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCollation {
    pub oid: Oid,
    pub schema: String,
    pub name: String,
}

/// An extension the source database has installed. `config_relations`
/// lists tables marked via `pg_extension_config_dump`, whose data
/// (subject to the filter expression) is copied by the
/// extension-config aux pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceExtension {
    pub name: String,
    pub schema: String,
    pub version: String,
    pub config_relations: Vec<ExtensionConfigRelation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionConfigRelation {
    pub qualified_name: String,
    pub filter_expr: Option<String>,
}

/// A dependency edge between two catalog objects, used to order
/// pre-data/post-data restore steps that aren't already implied by the
/// dump's own TOC ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDependency {
    pub object_qualified_name: String,
    pub depends_on_qualified_name: String,
}
