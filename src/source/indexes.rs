//! Index + constraint discovery (spec §3 "SourceIndex", §4.7 step 2
//! "the source's `pg_get_indexdef(...)` verbatim", §4.8 constraint
//! metadata for the installer).

use anyhow::{Context, Result};
use pgx_api_types::{Oid, SourceIndex};
use sqlx::postgres::PgConnection;
use sqlx::Row;

const INDEX_QUERY: &str = "
    SELECT
        ic.oid::bigint AS oid,
        ic.relname AS name,
        tn.nspname AS table_schema,
        tc.relname AS table_name,
        pg_get_indexdef(ic.oid) AS definition,
        (co.oid IS NOT NULL) AS is_constraint,
        i.indisprimary AS is_primary,
        i.indisunique AS is_unique,
        co.conname AS constraint_name,
        CASE WHEN co.contype NOT IN ('p', 'u') THEN pg_get_constraintdef(co.oid) END AS constraint_def,
        COALESCE(co.condeferrable, false) AS deferrable,
        COALESCE(co.condeferred, false) AS initially_deferred
    FROM pg_index i
    JOIN pg_class ic ON ic.oid = i.indexrelid
    JOIN pg_class tc ON tc.oid = i.indrelid
    JOIN pg_namespace tn ON tn.oid = tc.relnamespace
    LEFT JOIN pg_constraint co ON co.conindid = ic.oid
    WHERE i.indrelid = $1::oid
    ORDER BY ic.relname
";

pub async fn discover_indexes(conn: &mut PgConnection, table_oid: Oid) -> Result<Vec<SourceIndex>> {
    let rows = sqlx::query(INDEX_QUERY)
        .bind(table_oid.0 as i64)
        .fetch_all(&mut *conn)
        .await
        .context("querying pg_index")?;

    let mut indexes = Vec::with_capacity(rows.len());
    for row in rows {
        let table_schema: String = row.try_get("table_schema")?;
        let table_name: String = row.try_get("table_name")?;
        indexes.push(SourceIndex {
            oid: Oid(row.try_get::<i64, _>("oid")? as u32),
            name: row.try_get("name")?,
            qualified_table: format!("{table_schema}.{table_name}"),
            definition: row.try_get("definition")?,
            is_constraint: row.try_get("is_constraint")?,
            is_primary: row.try_get("is_primary")?,
            is_unique: row.try_get("is_unique")?,
            constraint_name: row.try_get("constraint_name")?,
            constraint_def: row.try_get("constraint_def")?,
            deferrable: row.try_get("deferrable")?,
            initially_deferred: row.try_get("initially_deferred")?,
        });
    }
    Ok(indexes)
}
