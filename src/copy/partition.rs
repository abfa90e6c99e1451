//! Partition planner: decides how many parts a table is split into and
//! the exact, disjoint, contiguous ranges each part covers.
//!
//! Grounded on the same min/max-bucketing idea the teacher uses for
//! chunk digest ranges in `pbs-datastore`, but the query shape here is
//! plain Postgres aggregate SQL rather than anything borrowed
//! verbatim.

use anyhow::{Context, Result};
use pgx_api_types::{PartitionPlan, PartitionRange, SourceTable};
use sqlx::postgres::PgConnection;
use sqlx::Row;

use crate::config::Config;
use crate::source::tables::PartitionKeyCandidate;

/// Computes `parts = ceil(size / threshold)`, then asks
/// [`plan_integer`] or [`plan_ctid`] to turn that count into ranges.
/// `parts <= 1`, or a candidate that doesn't resolve to a usable
/// integer/ctid key, both produce an empty (unpartitioned) plan.
pub async fn plan_table(
    conn: &mut PgConnection,
    table: &SourceTable,
    candidate: &PartitionKeyCandidate,
    config: &Config,
) -> Result<PartitionPlan> {
    let threshold = config.split_tables_larger_than.max(1);
    let parts = ((table.estimated_bytes as f64) / (threshold as f64)).ceil() as i64;
    if parts <= 1 {
        return Ok(PartitionPlan::empty());
    }
    let parts = i32::try_from(parts).unwrap_or(i32::MAX);

    match candidate {
        PartitionKeyCandidate::Integer { column, nullable } => {
            plan_integer(conn, table, column, *nullable, parts).await
        }
        PartitionKeyCandidate::Ctid => plan_ctid(conn, table, parts).await,
    }
}

async fn plan_integer(
    conn: &mut PgConnection,
    table: &SourceTable,
    column: &str,
    nullable: bool,
    parts: i32,
) -> Result<PartitionPlan> {
    let query = format!(
        "SELECT min({column}) AS lo, max({column}) AS hi FROM {}",
        table.qualified_name
    );
    let row = sqlx::query(&query)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("querying min/max({column}) for {}", table.qualified_name))?;
    let lo: Option<i64> = row.try_get("lo")?;
    let hi: Option<i64> = row.try_get("hi")?;

    let (Some(lo), Some(hi)) = (lo, hi) else {
        // Table is empty (or every value is NULL): nothing to split.
        return Ok(PartitionPlan::empty());
    };
    if hi < lo {
        return Ok(PartitionPlan::empty());
    }

    let parts = parts.max(1) as i64;
    let span = hi - lo + 1;
    if parts <= 1 {
        return Ok(PartitionPlan::empty());
    }
    let parts = parts.min(span);
    if parts <= 1 {
        return Ok(PartitionPlan::empty());
    }

    let width = span / parts;
    let mut ranges = Vec::with_capacity(parts as usize + if nullable { 1 } else { 0 });
    let mut cur = lo;
    for p in 0..parts {
        let part_number = p as i32 + 1;
        let is_last = p == parts - 1;
        let range_max = if is_last { hi } else { cur + width - 1 };
        let estimated_count = (range_max - cur + 1).max(0);
        ranges.push(PartitionRange {
            part_number,
            part_count: parts as i32,
            min: cur,
            max: if is_last { -1 } else { range_max },
            estimated_count,
        });
        cur = range_max + 1;
    }

    if nullable {
        ranges.push(PartitionRange {
            part_number: parts as i32 + 1,
            part_count: parts as i32 + 1,
            min: -1,
            max: -1,
            estimated_count: 0,
        });
        let n = ranges.len() as i32;
        for r in &mut ranges {
            r.part_count = n;
        }
    }

    let plan = PartitionPlan {
        key: Some((&PartitionKeyCandidate::Integer {
            column: column.to_string(),
            nullable,
        })
            .into()),
        ranges,
    };
    plan.validate_integer_coverage()
        .map_err(|e| anyhow::anyhow!("partition planner produced an invalid plan: {e}"))?;
    Ok(plan)
}

async fn plan_ctid(conn: &mut PgConnection, table: &SourceTable, parts: i32) -> Result<PartitionPlan> {
    let query = format!(
        "SELECT GREATEST(pg_relation_size('{0}'::regclass) / current_setting('block_size')::bigint, 1)::bigint AS pages",
        table.qualified_name
    );
    let row = sqlx::query(&query)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("estimating page count for {}", table.qualified_name))?;
    let pages: i64 = row.try_get("pages")?;

    let parts = parts.max(1) as i64;
    if pages <= parts {
        return Ok(PartitionPlan::empty());
    }

    let width = pages / parts;
    let mut ranges = Vec::with_capacity(parts as usize);
    let mut cur: i64 = 0;
    for p in 0..parts {
        let part_number = p as i32 + 1;
        let is_last = p == parts - 1;
        let range_max = if is_last { -1 } else { cur + width };
        let estimated_count = if is_last { pages - cur } else { width };
        ranges.push(PartitionRange {
            part_number,
            part_count: parts as i32,
            min: cur,
            max: range_max,
            estimated_count,
        });
        cur = if is_last { pages } else { cur + width };
    }

    Ok(PartitionPlan {
        key: Some(pgx_api_types::PartitionKey::Ctid),
        ranges,
    })
}
