//! Constraint installer: turns each constraint-backed index of one
//! table into an `ALTER TABLE ... ADD CONSTRAINT`.
//!
//! Constraints are executed serially within a table (`ALTER TABLE`
//! takes an exclusive lock); the caller already serializes table by
//! table since only one index-worker ever wins `claim_last_index_owner`
//! for a given table.

use std::sync::Arc;

use anyhow::{Context, Result};
use pgx_catalog::Catalog;

use crate::task::WorkerTask;
use crate::{task_log, task_warn};

pub async fn install_constraints(
    worker: &Arc<WorkerTask>,
    catalog: &Catalog,
    target: &mut sqlx::PgConnection,
    qualified_table: &str,
) -> Result<()> {
    let mut constraints = Vec::new();
    catalog.iter_indexes_for_table(qualified_table, |index| {
        if let Some(name) = &index.constraint_name {
            constraints.push((name.clone(), index.clone()));
        }
        true
    })?;

    for (name, index) in constraints {
        if constraint_exists_on_target(target, qualified_table, &name).await? {
            task_log!(worker, "constraint {name} on {qualified_table} already present, skipping");
            continue;
        }

        let mut ddl = if index.is_primary {
            format!(
                "ALTER TABLE {qualified_table} ADD CONSTRAINT {name} PRIMARY KEY USING INDEX {}",
                index.name
            )
        } else if index.is_unique {
            format!(
                "ALTER TABLE {qualified_table} ADD CONSTRAINT {name} UNIQUE USING INDEX {}",
                index.name
            )
        } else {
            let Some(def) = &index.constraint_def else {
                task_warn!(worker, "constraint {name} on {qualified_table} has no definition, skipping");
                continue;
            };
            format!("ALTER TABLE {qualified_table} ADD CONSTRAINT {name} {def}")
        };

        if index.deferrable {
            ddl.push_str(" DEFERRABLE");
            if index.initially_deferred {
                ddl.push_str(" INITIALLY DEFERRED");
            }
        }

        sqlx::query(&ddl)
            .execute(&mut *target)
            .await
            .with_context(|| format!("installing constraint {name} on {qualified_table}"))?;
        task_log!(worker, "installed constraint {name} on {qualified_table}");
    }

    Ok(())
}

async fn constraint_exists_on_target(
    target: &mut sqlx::PgConnection,
    qualified_table: &str,
    constraint_name: &str,
) -> Result<bool> {
    let row: Option<(i32,)> = sqlx::query_as(
        "SELECT 1 FROM pg_constraint co
         JOIN pg_class c ON c.oid = co.conrelid
         WHERE co.conname = $1 AND c.oid = $2::regclass",
    )
    .bind(constraint_name)
    .bind(qualified_table)
    .fetch_optional(&mut *target)
    .await
    .context("checking existing constraints on target")?;
    Ok(row.is_some())
}
