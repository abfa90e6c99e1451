//! Table enumeration and partition-key candidate selection (spec §4.6
//! "a partition key candidate selected by the schema discovery query
//! (prefer primary key; else unique; else `ctid`)").

use anyhow::{Context, Result};
use pgx_api_types::{Oid, PartitionKey, SourceTable};
use sqlx::postgres::PgConnection;
use sqlx::Row;

/// A table's estimated size is `pg_total_relation_size`, matching what
/// the supervisor compares against `splitTablesLargerThan` (spec §4.6).
/// System schemas are excluded; `pg_catalog`/`information_schema`/
/// `pg_toast` objects are never user data to migrate.
const TABLE_QUERY: &str = "
    SELECT
        c.oid::bigint AS oid,
        n.nspname AS schema_name,
        c.relname AS name,
        GREATEST(c.reltuples, 0)::bigint AS estimated_rows,
        pg_total_relation_size(c.oid) AS estimated_bytes,
        (SELECT count(*) FROM pg_index i WHERE i.indrelid = c.oid) AS index_count,
        (SELECT count(*) FROM pg_constraint co WHERE co.conrelid = c.oid
            AND co.contype IN ('p','u','x')) AS constraint_count
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p')
      AND n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
    ORDER BY n.nspname, c.relname
";

pub async fn discover_tables(conn: &mut PgConnection) -> Result<Vec<SourceTable>> {
    let rows = sqlx::query(TABLE_QUERY)
        .fetch_all(&mut *conn)
        .await
        .context("querying pg_class for tables")?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        let schema: String = row.try_get("schema_name")?;
        let name: String = row.try_get("name")?;
        let oid: u32 = row.try_get::<i64, _>("oid")? as u32;
        tables.push(SourceTable {
            oid: Oid(oid),
            qualified_name: format!("{schema}.{name}"),
            restore_list_name: format!("TABLE DATA {schema} {name}"),
            schema,
            name,
            estimated_rows: row.try_get("estimated_rows")?,
            estimated_bytes: row.try_get("estimated_bytes")?,
            exclude_data: false,
            partition_key: None,
            partition_plan: None,
            index_count: row.try_get::<i64, _>("index_count")? as i32,
            constraint_count: row.try_get::<i64, _>("constraint_count")? as i32,
            attributes: Vec::new(),
        });
    }
    Ok(tables)
}

/// A usable single-column integer key, before the planner has computed
/// ranges against it.
#[derive(Debug, Clone)]
pub enum PartitionKeyCandidate {
    Integer { column: String, nullable: bool },
    Ctid,
}

impl From<&PartitionKeyCandidate> for PartitionKey {
    fn from(c: &PartitionKeyCandidate) -> Self {
        match c {
            PartitionKeyCandidate::Integer { column, nullable } => PartitionKey::Integer {
                column: column.clone(),
                nullable: *nullable,
            },
            PartitionKeyCandidate::Ctid => PartitionKey::Ctid,
        }
    }
}

/// Single-column integer primary key, else single-column integer
/// unique key, else `ctid`. Multi-column keys are never candidates
/// (spec §4.6 "a suitable single-column integer key").
const PK_CANDIDATE_QUERY: &str = "
    SELECT a.attname, a.attnotnull, t.typname
    FROM pg_constraint co
    JOIN pg_attribute a ON a.attrelid = co.conrelid AND a.attnum = co.conkey[1]
    JOIN pg_type t ON t.oid = a.atttypid
    WHERE co.conrelid = $1::oid
      AND co.contype = 'p'
      AND array_length(co.conkey, 1) = 1
      AND t.typname IN ('int2', 'int4', 'int8')
";

const UNIQUE_CANDIDATE_QUERY: &str = "
    SELECT a.attname, a.attnotnull, t.typname
    FROM pg_constraint co
    JOIN pg_attribute a ON a.attrelid = co.conrelid AND a.attnum = co.conkey[1]
    JOIN pg_type t ON t.oid = a.atttypid
    WHERE co.conrelid = $1::oid
      AND co.contype = 'u'
      AND array_length(co.conkey, 1) = 1
      AND t.typname IN ('int2', 'int4', 'int8')
    ORDER BY co.oid
    LIMIT 1
";

pub async fn discover_partition_key_candidate(
    conn: &mut PgConnection,
    table_oid: Oid,
) -> Result<Option<PartitionKeyCandidate>> {
    if let Some(row) = sqlx::query(PK_CANDIDATE_QUERY)
        .bind(table_oid.0 as i64)
        .fetch_optional(&mut *conn)
        .await
        .context("querying primary-key partition candidate")?
    {
        let column: String = row.try_get("attname")?;
        let not_null: bool = row.try_get("attnotnull")?;
        return Ok(Some(PartitionKeyCandidate::Integer {
            column,
            nullable: !not_null,
        }));
    }

    if let Some(row) = sqlx::query(UNIQUE_CANDIDATE_QUERY)
        .bind(table_oid.0 as i64)
        .fetch_optional(&mut *conn)
        .await
        .context("querying unique partition candidate")?
    {
        let column: String = row.try_get("attname")?;
        let not_null: bool = row.try_get("attnotnull")?;
        return Ok(Some(PartitionKeyCandidate::Integer {
            column,
            nullable: !not_null,
        }));
    }

    Ok(Some(PartitionKeyCandidate::Ctid))
}
