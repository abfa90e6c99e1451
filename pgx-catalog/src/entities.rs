//! Schema-entity storage: `add`, `lookup_by_oid`/`lookup_by_name`, and
//! lazy `iter` cursors over the tables/indexes/sequences/etc. cached
//! from the source database.

use anyhow::Result;
use pgx_api_types::{
    ExtensionConfigRelation, Oid, PartitionKey, PartitionPlan, SourceAttribute, SourceCollation,
    SourceExtension, SourceIndex, SourceSequence, SourceTable,
};
use rusqlite::{params, OptionalExtension};

use crate::Catalog;

impl Catalog {
    pub fn add_table(&self, table: &SourceTable) -> Result<()> {
        let partition_key_json = table
            .partition_key
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let partition_plan_json = table
            .partition_plan
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tables
                    (oid, schema_name, name, qualified_name, estimated_rows, estimated_bytes,
                     exclude_data, restore_list_name, partition_key_json, partition_plan_json,
                     index_count, constraint_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(oid) DO UPDATE SET
                    estimated_rows = excluded.estimated_rows,
                    estimated_bytes = excluded.estimated_bytes,
                    partition_key_json = excluded.partition_key_json,
                    partition_plan_json = excluded.partition_plan_json",
                params![
                    table.oid.0,
                    table.schema,
                    table.name,
                    table.qualified_name,
                    table.estimated_rows,
                    table.estimated_bytes,
                    table.exclude_data,
                    table.restore_list_name,
                    partition_key_json,
                    partition_plan_json,
                    table.index_count,
                    table.constraint_count,
                ],
            )?;
            for attr in &table.attributes {
                conn.execute(
                    "INSERT OR REPLACE INTO attributes
                        (table_oid, attnum, name, type_oid, type_name, not_null, collation)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        table.oid.0,
                        attr.attnum,
                        attr.name,
                        attr.type_oid.0,
                        attr.type_name,
                        attr.not_null,
                        attr.collation,
                    ],
                )?;
            }
            Ok(())
        })
    }

    pub fn lookup_table_by_oid(&self, oid: Oid) -> Result<Option<SourceTable>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT oid, schema_name, name, qualified_name, estimated_rows, estimated_bytes,
                        exclude_data, restore_list_name, partition_key_json, partition_plan_json,
                        index_count, constraint_count
                 FROM tables WHERE oid = ?1",
                params![oid.0],
                row_to_table_header,
            )
            .optional()
        })?;
        let Some(mut table) = row else { return Ok(None) };
        table.attributes = self.attributes_for_table(oid)?;
        Ok(Some(table))
    }

    pub fn lookup_table_by_qualified_name(&self, qualified_name: &str) -> Result<Option<SourceTable>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT oid, schema_name, name, qualified_name, estimated_rows, estimated_bytes,
                        exclude_data, restore_list_name, partition_key_json, partition_plan_json,
                        index_count, constraint_count
                 FROM tables WHERE qualified_name = ?1",
                params![qualified_name],
                row_to_table_header,
            )
            .optional()
        })?;
        let Some(mut table) = row else { return Ok(None) };
        table.attributes = self.attributes_for_table(table.oid)?;
        Ok(Some(table))
    }

    fn attributes_for_table(&self, oid: Oid) -> Result<Vec<SourceAttribute>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, attnum, type_oid, type_name, not_null, collation
                 FROM attributes WHERE table_oid = ?1 ORDER BY attnum",
            )?;
            let rows = stmt.query_map(params![oid.0], |row| {
                Ok(SourceAttribute {
                    name: row.get(0)?,
                    attnum: row.get(1)?,
                    type_oid: Oid(row.get::<_, u32>(2)?),
                    type_name: row.get(3)?,
                    not_null: row.get(4)?,
                    collation: row.get(5)?,
                })
            })?;
            rows.collect()
        })
    }

    /// Tables ordered `(descending estimated_bytes, schema, name)`, a
    /// deterministic order so a run visits the biggest tables first
    /// regardless of which worker asks. `f` returning `false`
    /// stops iteration early without reading the rest of the cursor.
    pub fn iter_tables(&self, mut f: impl FnMut(&SourceTable) -> bool) -> Result<()> {
        let headers = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT oid, schema_name, name, qualified_name, estimated_rows, estimated_bytes,
                        exclude_data, restore_list_name, partition_key_json, partition_plan_json,
                        index_count, constraint_count
                 FROM tables
                 ORDER BY estimated_bytes DESC, schema_name ASC, name ASC",
            )?;
            let rows = stmt.query_map([], row_to_table_header)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        for mut table in headers {
            table.attributes = self.attributes_for_table(table.oid)?;
            if !f(&table) {
                break;
            }
        }
        Ok(())
    }

    pub fn table_count(&self) -> Result<i64> {
        self.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM tables", [], |row| row.get(0)))
    }

    pub fn add_index(&self, index: &SourceIndex) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO indexes
                    (oid, name, qualified_table, definition, is_constraint, is_primary, is_unique,
                     constraint_name, constraint_def, deferrable, initially_deferred)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(oid) DO NOTHING",
                params![
                    index.oid.0,
                    index.name,
                    index.qualified_table,
                    index.definition,
                    index.is_constraint,
                    index.is_primary,
                    index.is_unique,
                    index.constraint_name,
                    index.constraint_def,
                    index.deferrable,
                    index.initially_deferred,
                ],
            )?;
            Ok(())
        })
    }

    /// Indexes ordered `(schema, table)`.
    pub fn iter_indexes_for_table(
        &self,
        qualified_table: &str,
        mut f: impl FnMut(&SourceIndex) -> bool,
    ) -> Result<()> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT oid, name, qualified_table, definition, is_constraint, is_primary, is_unique,
                        constraint_name, constraint_def, deferrable, initially_deferred
                 FROM indexes WHERE qualified_table = ?1 ORDER BY qualified_table, name",
            )?;
            let rows = stmt.query_map(params![qualified_table], row_to_index)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        for index in &rows {
            if !f(index) {
                break;
            }
        }
        Ok(())
    }

    pub fn lookup_index_by_oid(&self, oid: Oid) -> Result<Option<SourceIndex>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT oid, name, qualified_table, definition, is_constraint, is_primary, is_unique,
                        constraint_name, constraint_def, deferrable, initially_deferred
                 FROM indexes WHERE oid = ?1",
                params![oid.0],
                row_to_index,
            )
            .optional()
        })
    }

    pub fn add_sequence(&self, seq: &SourceSequence) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sequences (oid, qualified_name, last_value, is_called)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(oid) DO UPDATE SET
                    last_value = excluded.last_value, is_called = excluded.is_called",
                params![seq.oid.0, seq.qualified_name, seq.last_value, seq.is_called],
            )?;
            Ok(())
        })
    }

    pub fn iter_sequences(&self, mut f: impl FnMut(&SourceSequence) -> bool) -> Result<()> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT oid, qualified_name, last_value, is_called FROM sequences ORDER BY qualified_name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(SourceSequence {
                    oid: Oid(row.get::<_, u32>(0)?),
                    qualified_name: row.get(1)?,
                    last_value: row.get(2)?,
                    is_called: row.get(3)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        for seq in &rows {
            if !f(seq) {
                break;
            }
        }
        Ok(())
    }

    pub fn add_collation(&self, collation: &SourceCollation) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO collations (oid, schema_name, name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(oid) DO NOTHING",
                params![collation.oid.0, collation.schema, collation.name],
            )?;
            Ok(())
        })
    }

    pub fn iter_collations(&self, mut f: impl FnMut(&SourceCollation) -> bool) -> Result<()> {
        let rows = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT oid, schema_name, name FROM collations ORDER BY schema_name, name")?;
            let rows = stmt.query_map([], |row| {
                Ok(SourceCollation {
                    oid: Oid(row.get::<_, u32>(0)?),
                    schema: row.get(1)?,
                    name: row.get(2)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        for c in &rows {
            if !f(c) {
                break;
            }
        }
        Ok(())
    }

    pub fn add_extension(&self, ext: &SourceExtension) -> Result<()> {
        let config_relations_json = serde_json::to_string(&ext.config_relations)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO extensions (name, schema_name, version, config_relations_json)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    version = excluded.version,
                    config_relations_json = excluded.config_relations_json",
                params![ext.name, ext.schema, ext.version, config_relations_json],
            )?;
            Ok(())
        })
    }

    pub fn iter_extensions(&self, mut f: impl FnMut(&SourceExtension) -> bool) -> Result<()> {
        let rows: Vec<(String, String, String, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, schema_name, version, config_relations_json
                 FROM extensions ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        for (name, schema, version, config_relations_json) in &rows {
            let config_relations: Vec<ExtensionConfigRelation> =
                serde_json::from_str(config_relations_json)?;
            let ext = SourceExtension {
                name: name.clone(),
                schema: schema.clone(),
                version: version.clone(),
                config_relations,
            };
            if !f(&ext) {
                break;
            }
        }
        Ok(())
    }

    pub fn add_dependency(&self, object_qualified_name: &str, depends_on: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO dependencies (object_qualified_name, depends_on_qualified_name)
                 VALUES (?1, ?2)",
                params![object_qualified_name, depends_on],
            )?;
            Ok(())
        })
    }

    /// Dependency edges grouped by the referenced object, per spec
    /// §4.2's "dependencies grouped by referenced object" ordering.
    pub fn iter_dependents_of(
        &self,
        depends_on: &str,
        mut f: impl FnMut(&str) -> bool,
    ) -> Result<()> {
        let rows: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT object_qualified_name FROM dependencies
                 WHERE depends_on_qualified_name = ?1 ORDER BY object_qualified_name",
            )?;
            let rows = stmt.query_map(params![depends_on], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        for name in &rows {
            if !f(name) {
                break;
            }
        }
        Ok(())
    }
}

fn row_to_index(row: &rusqlite::Row) -> rusqlite::Result<SourceIndex> {
    Ok(SourceIndex {
        oid: Oid(row.get::<_, u32>(0)?),
        name: row.get(1)?,
        qualified_table: row.get(2)?,
        definition: row.get(3)?,
        is_constraint: row.get(4)?,
        is_primary: row.get(5)?,
        is_unique: row.get(6)?,
        constraint_name: row.get(7)?,
        constraint_def: row.get(8)?,
        deferrable: row.get(9)?,
        initially_deferred: row.get(10)?,
    })
}

fn row_to_table_header(row: &rusqlite::Row) -> rusqlite::Result<SourceTable> {
    let partition_key_json: Option<String> = row.get(8)?;
    let partition_plan_json: Option<String> = row.get(9)?;
    Ok(SourceTable {
        oid: Oid(row.get::<_, u32>(0)?),
        schema: row.get(1)?,
        name: row.get(2)?,
        qualified_name: row.get(3)?,
        estimated_rows: row.get(4)?,
        estimated_bytes: row.get(5)?,
        exclude_data: row.get(6)?,
        restore_list_name: row.get(7)?,
        partition_key: partition_key_json
            .map(|s| serde_json::from_str::<PartitionKey>(&s))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e)))?,
        partition_plan: partition_plan_json
            .map(|s| serde_json::from_str::<PartitionPlan>(&s))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e)))?,
        index_count: row.get(10)?,
        constraint_count: row.get(11)?,
        attributes: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> SourceTable {
        SourceTable {
            oid: Oid(16401),
            schema: "public".to_string(),
            name: "orders".to_string(),
            qualified_name: "public.orders".to_string(),
            estimated_rows: 1_000_000,
            estimated_bytes: 512_000_000,
            exclude_data: false,
            restore_list_name: "TABLE DATA public orders".to_string(),
            partition_key: None,
            partition_plan: None,
            index_count: 1,
            constraint_count: 1,
            attributes: vec![SourceAttribute {
                name: "id".to_string(),
                attnum: 1,
                type_oid: Oid(23),
                type_name: "int4".to_string(),
                not_null: true,
                collation: None,
            }],
        }
    }

    #[test]
    fn round_trips_a_table_with_attributes() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(tmp.path().join("c.db")).unwrap();
        let table = sample_table();
        catalog.add_table(&table).unwrap();

        let fetched = catalog
            .lookup_table_by_qualified_name("public.orders")
            .unwrap()
            .expect("table present");
        assert_eq!(fetched.oid, table.oid);
        assert_eq!(fetched.attributes.len(), 1);
        assert_eq!(fetched.attributes[0].name, "id");
    }

    #[test]
    fn iter_tables_visits_every_row() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(tmp.path().join("c.db")).unwrap();
        catalog.add_table(&sample_table()).unwrap();

        let mut seen = Vec::new();
        catalog
            .iter_tables(|t| {
                seen.push(t.qualified_name.clone());
                true
            })
            .unwrap();
        assert_eq!(seen, vec!["public.orders".to_string()]);
    }
}
