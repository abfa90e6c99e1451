//! Basic data types shared by every `pgxfer` workspace member.
//!
//! Mirrors the teacher's `pbs-api-types` crate: a small, dependency-light
//! crate that both the catalog and the orchestrator depend on, so that
//! neither has to depend on the other just to share a struct.

pub mod error;
pub mod oid;
pub mod partition;
pub mod progress;
pub mod schema;
pub mod upid;

pub use error::PgxError;
pub use oid::Oid;
pub use partition::{PartitionKey, PartitionPlan, PartitionRange};
pub use progress::{IndexSummary, RunSection, RunState, TableSummary};
pub use schema::{
    ExtensionConfigRelation, SourceAttribute, SourceCollation, SourceDependency, SourceExtension,
    SourceIndex, SourceSequence, SourceTable,
};
pub use upid::UPID;
