use anyhow::{Context, Result};
use pgx_api_types::{Oid, SourceAttribute};
use sqlx::postgres::PgConnection;
use sqlx::Row;

const ATTRIBUTE_QUERY: &str = "
    SELECT a.attname, a.attnum, a.atttypid::bigint AS atttypid, t.typname, a.attnotnull, co.collname
    FROM pg_attribute a
    JOIN pg_type t ON t.oid = a.atttypid
    LEFT JOIN pg_collation co ON co.oid = a.attcollation
    WHERE a.attrelid = $1::oid AND a.attnum > 0 AND NOT a.attisdropped
    ORDER BY a.attnum
";

pub async fn discover_attributes(conn: &mut PgConnection, table_oid: Oid) -> Result<Vec<SourceAttribute>> {
    let rows = sqlx::query(ATTRIBUTE_QUERY)
        .bind(table_oid.0 as i64)
        .fetch_all(&mut *conn)
        .await
        .context("querying pg_attribute")?;

    let mut attrs = Vec::with_capacity(rows.len());
    for row in rows {
        attrs.push(SourceAttribute {
            name: row.try_get("attname")?,
            attnum: row.try_get("attnum")?,
            type_oid: Oid(row.try_get::<i64, _>("atttypid")? as u32),
            type_name: row.try_get("typname")?,
            not_null: row.try_get("attnotnull")?,
            collation: row.try_get("collname")?,
        });
    }
    Ok(attrs)
}
