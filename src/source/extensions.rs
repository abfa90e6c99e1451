//! Extension discovery (spec §3 "SourceExtension"). Extensions are
//! recreated on the target by the pre-data restore step from the
//! dump's own `CREATE EXTENSION` statements; what we track here is
//! only the `pg_extension_config_dump`-marked relations the
//! extension-config aux pass needs to copy after data copy completes.

use anyhow::{Context, Result};
use pgx_api_types::{ExtensionConfigRelation, SourceExtension};
use sqlx::postgres::PgConnection;
use sqlx::Row;

const EXTENSION_QUERY: &str = "
    SELECT e.extname AS name, n.nspname AS schema, e.extversion AS version,
           e.extconfig::bigint[] AS extconfig, e.extcondition
    FROM pg_extension e
    JOIN pg_namespace n ON n.oid = e.extnamespace
    ORDER BY e.extname
";

pub async fn discover_extensions(conn: &mut PgConnection) -> Result<Vec<SourceExtension>> {
    let rows = sqlx::query(EXTENSION_QUERY)
        .fetch_all(&mut *conn)
        .await
        .context("querying pg_extension")?;

    let mut extensions = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get("name")?;
        let extconfig: Option<Vec<i64>> = row.try_get("extconfig")?;
        let extcondition: Option<Vec<String>> = row.try_get("extcondition")?;

        let mut config_relations = Vec::new();
        if let Some(oids) = extconfig {
            for (idx, raw_oid) in oids.into_iter().enumerate() {
                let qualified_name = resolve_relation_name(conn, raw_oid)
                    .await
                    .with_context(|| format!("resolving extconfig relation for {name}"))?;
                let filter_expr = extcondition
                    .as_ref()
                    .and_then(|conds| conds.get(idx))
                    .filter(|c| !c.is_empty())
                    .cloned();
                config_relations.push(ExtensionConfigRelation {
                    qualified_name,
                    filter_expr,
                });
            }
        }

        extensions.push(SourceExtension {
            name,
            schema: row.try_get("schema")?,
            version: row.try_get("version")?,
            config_relations,
        });
    }
    Ok(extensions)
}

async fn resolve_relation_name(conn: &mut PgConnection, oid: i64) -> Result<String> {
    let row = sqlx::query(
        "SELECT n.nspname AS schema_name, c.relname AS name
         FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace
         WHERE c.oid = $1::oid",
    )
    .bind(oid)
    .fetch_one(&mut *conn)
    .await
    .context("querying pg_class for extconfig relation")?;
    let schema: String = row.try_get("schema_name")?;
    let name: String = row.try_get("name")?;
    Ok(format!("{schema}.{name}"))
}
