//! Index supervisor, index workers, and the constraint installer.

pub mod constraint;
pub mod supervisor;
pub mod worker;

use pgx_api_types::Oid;

/// One unit of index work: build a single index.
#[derive(Debug, Clone)]
pub struct IndexJob {
    pub oid: Oid,
    pub qualified_table: String,
}
