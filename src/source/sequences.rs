use anyhow::{Context, Result};
use pgx_api_types::{Oid, SourceSequence};
use sqlx::postgres::PgConnection;
use sqlx::Row;

const SEQUENCE_QUERY: &str = "
    SELECT c.oid::bigint AS oid, n.nspname AS schema_name, c.relname AS name
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind = 'S'
      AND n.nspname NOT IN ('pg_catalog', 'information_schema')
    ORDER BY n.nspname, c.relname
";

pub async fn discover_sequences(conn: &mut PgConnection) -> Result<Vec<SourceSequence>> {
    let rows = sqlx::query(SEQUENCE_QUERY)
        .fetch_all(&mut *conn)
        .await
        .context("querying pg_class for sequences")?;

    let mut sequences = Vec::with_capacity(rows.len());
    for row in rows {
        let schema: String = row.try_get("schema_name")?;
        let name: String = row.try_get("name")?;
        let oid = Oid(row.try_get::<i64, _>("oid")? as u32);
        let qualified_name = format!("{schema}.{name}");

        // `pg_sequences.last_value` is only NULL when the caller lacks
        // privilege; it says nothing about whether the sequence has
        // ever been advanced. `is_called` only exists on the sequence
        // relation itself, so we read it the same way pg_dump does:
        // SELECT straight from the sequence.
        let state = sqlx::query(&format!("SELECT last_value, is_called FROM {qualified_name}"))
            .fetch_optional(&mut *conn)
            .await
            .with_context(|| format!("reading sequence state for {qualified_name}"))?;

        let (last_value, is_called) = match state {
            Some(row) => (row.try_get("last_value")?, row.try_get("is_called")?),
            None => (1, false),
        };

        sequences.push(SourceSequence {
            oid,
            qualified_name,
            last_value,
            is_called,
        });
    }
    Ok(sequences)
}
