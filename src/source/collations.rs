use anyhow::{Context, Result};
use pgx_api_types::{Oid, SourceCollation};
use sqlx::postgres::PgConnection;
use sqlx::Row;

const COLLATION_QUERY: &str = "
    SELECT c.oid::bigint AS oid, n.nspname AS schema_name, c.collname AS name
    FROM pg_collation c
    JOIN pg_namespace n ON n.oid = c.collnamespace
    WHERE n.nspname NOT IN ('pg_catalog')
    ORDER BY n.nspname, c.collname
";

pub async fn discover_collations(conn: &mut PgConnection) -> Result<Vec<SourceCollation>> {
    let rows = sqlx::query(COLLATION_QUERY)
        .fetch_all(&mut *conn)
        .await
        .context("querying pg_collation")?;

    let mut collations = Vec::with_capacity(rows.len());
    for row in rows {
        collations.push(SourceCollation {
            oid: Oid(row.try_get::<i64, _>("oid")? as u32),
            schema: row.try_get("schema_name")?,
            name: row.try_get("name")?,
        });
    }
    Ok(collations)
}
