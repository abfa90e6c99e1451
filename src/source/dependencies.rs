//! Cross-table dependency edges (spec §3 "SourceDependency"), collected
//! as a flat list of pairs — no graph walk is needed at run time, the
//! orchestrator only uses this to filter post-data objects that
//! reference excluded tables.

use anyhow::{Context, Result};
use pgx_api_types::SourceDependency;
use sqlx::postgres::PgConnection;
use sqlx::Row;

const DEPENDENCY_QUERY: &str = "
    SELECT
        dn.nspname AS dep_schema, dc.relname AS dep_name,
        rn.nspname AS ref_schema, rc.relname AS ref_name
    FROM pg_depend d
    JOIN pg_class dc ON dc.oid = d.objid AND dc.relkind IN ('r', 'p')
    JOIN pg_namespace dn ON dn.oid = dc.relnamespace
    JOIN pg_class rc ON rc.oid = d.refobjid AND rc.relkind IN ('r', 'p')
    JOIN pg_namespace rn ON rn.oid = rc.relnamespace
    WHERE d.deptype = 'n'
      AND dc.oid <> rc.oid
      AND dn.nspname NOT IN ('pg_catalog', 'information_schema')
      AND rn.nspname NOT IN ('pg_catalog', 'information_schema')
";

pub async fn discover_dependencies(conn: &mut PgConnection) -> Result<Vec<SourceDependency>> {
    let rows = sqlx::query(DEPENDENCY_QUERY)
        .fetch_all(&mut *conn)
        .await
        .context("querying pg_depend")?;

    let mut deps = Vec::with_capacity(rows.len());
    for row in rows {
        let dep_schema: String = row.try_get("dep_schema")?;
        let dep_name: String = row.try_get("dep_name")?;
        let ref_schema: String = row.try_get("ref_schema")?;
        let ref_name: String = row.try_get("ref_name")?;
        deps.push(SourceDependency {
            object_qualified_name: format!("{dep_schema}.{dep_name}"),
            depends_on_qualified_name: format!("{ref_schema}.{ref_name}"),
        });
    }
    Ok(deps)
}
