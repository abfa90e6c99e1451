//! Schema discovery: the queries that populate [`pgx_catalog::Catalog`]
//! from the source database's `pg_catalog` (spec §2 "Catalog is
//! populated up-front from the source", §4.6's partition-key candidate
//! selection).
//!
//! Out of scope per spec §1 is the *reproduction* of the schema on the
//! target (that's the dump/restore external collaborator, §6); this
//! module only reads, it never issues DDL.

mod attributes;
mod collations;
mod dependencies;
mod extensions;
mod indexes;
mod sequences;
pub mod tables;

pub use attributes::discover_attributes;
pub use collations::discover_collations;
pub use dependencies::discover_dependencies;
pub use extensions::discover_extensions;
pub use indexes::discover_indexes;
pub use sequences::discover_sequences;
pub use tables::{discover_partition_key_candidate, discover_tables};

use anyhow::{Context, Result};
use pgx_catalog::Catalog;
use sqlx::postgres::PgConnection;

use crate::config::Config;

/// Runs every discovery query against `conn` (which must already be
/// inside the exported-snapshot transaction, see [`crate::snapshot`])
/// and populates `catalog`. Partition plans are computed here too,
/// since they need the same min/max queries this module already runs
/// (spec §4.6 "deterministic given the same catalog inputs").
pub async fn discover_all(conn: &mut PgConnection, catalog: &Catalog, config: &Config) -> Result<()> {
    let mut tables = discover_tables(conn).await.context("discovering tables")?;
    for table in &mut tables {
        table.attributes = discover_attributes(conn, table.oid)
            .await
            .with_context(|| format!("discovering attributes for {}", table.qualified_name))?;

        if table.estimated_bytes > config.split_tables_larger_than {
            if let Some(candidate) = discover_partition_key_candidate(conn, table.oid).await? {
                let plan = crate::copy::partition::plan_table(conn, table, &candidate, config).await?;
                if plan.is_partitioned() {
                    table.partition_key = plan.key.clone();
                    table.partition_plan = Some(plan);
                }
            }
        }

        catalog.add_table(table)?;
    }

    for table in &tables {
        let indexes = discover_indexes(conn, table.oid)
            .await
            .with_context(|| format!("discovering indexes for {}", table.qualified_name))?;
        for index in &indexes {
            catalog.add_index(index)?;
        }
    }

    for seq in discover_sequences(conn).await.context("discovering sequences")? {
        catalog.add_sequence(&seq)?;
    }

    for collation in discover_collations(conn)
        .await
        .context("discovering collations")?
    {
        catalog.add_collation(&collation)?;
    }

    for ext in discover_extensions(conn)
        .await
        .context("discovering extensions")?
    {
        catalog.add_extension(&ext)?;
    }

    for dep in discover_dependencies(conn)
        .await
        .context("discovering dependencies")?
    {
        catalog.add_dependency(&dep.object_qualified_name, &dep.depends_on_qualified_name)?;
    }

    Ok(())
}
