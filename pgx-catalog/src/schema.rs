use rusqlite::Connection;

/// Creates every catalog table if it does not already exist. Split out
/// of `lib.rs` since it is long and purely declarative.
pub(crate) fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tables (
            oid INTEGER PRIMARY KEY,
            schema_name TEXT NOT NULL,
            name TEXT NOT NULL,
            qualified_name TEXT NOT NULL UNIQUE,
            estimated_rows INTEGER NOT NULL,
            estimated_bytes INTEGER NOT NULL,
            exclude_data INTEGER NOT NULL,
            restore_list_name TEXT NOT NULL,
            partition_key_json TEXT,
            partition_plan_json TEXT,
            index_count INTEGER NOT NULL,
            constraint_count INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS attributes (
            table_oid INTEGER NOT NULL REFERENCES tables(oid),
            attnum INTEGER NOT NULL,
            name TEXT NOT NULL,
            type_oid INTEGER NOT NULL,
            type_name TEXT NOT NULL,
            not_null INTEGER NOT NULL,
            collation TEXT,
            PRIMARY KEY (table_oid, attnum)
        );

        CREATE TABLE IF NOT EXISTS indexes (
            oid INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            qualified_table TEXT NOT NULL,
            definition TEXT NOT NULL,
            is_constraint INTEGER NOT NULL,
            is_primary INTEGER NOT NULL,
            is_unique INTEGER NOT NULL,
            constraint_name TEXT,
            constraint_def TEXT,
            deferrable INTEGER NOT NULL DEFAULT 0,
            initially_deferred INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS sequences (
            oid INTEGER PRIMARY KEY,
            qualified_name TEXT NOT NULL,
            last_value INTEGER NOT NULL,
            is_called INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS collations (
            oid INTEGER PRIMARY KEY,
            schema_name TEXT NOT NULL,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS extensions (
            name TEXT PRIMARY KEY,
            schema_name TEXT NOT NULL,
            version TEXT NOT NULL,
            config_relations_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dependencies (
            object_qualified_name TEXT NOT NULL,
            depends_on_qualified_name TEXT NOT NULL,
            PRIMARY KEY (object_qualified_name, depends_on_qualified_name)
        );

        -- Progress + lock record for one (table, part). An entry with
        -- pid != 0 and done_time == 0 means 'in progress'; done_time > 0
        -- means finished, with error set on failure. At most one row per
        -- (qualified_name, part_number) may have done_time == 0.
        CREATE TABLE IF NOT EXISTS table_summary (
            qualified_name TEXT NOT NULL,
            part_number INTEGER NOT NULL,
            part_count INTEGER NOT NULL,
            pid INTEGER NOT NULL,
            pstart INTEGER NOT NULL,
            start_time INTEGER NOT NULL,
            done_time INTEGER NOT NULL DEFAULT 0,
            bytes INTEGER NOT NULL DEFAULT 0,
            rows INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            PRIMARY KEY (qualified_name, part_number)
        );

        CREATE TABLE IF NOT EXISTS index_summary (
            index_name TEXT PRIMARY KEY,
            qualified_table TEXT NOT NULL,
            pid INTEGER NOT NULL,
            pstart INTEGER NOT NULL,
            start_time INTEGER NOT NULL,
            done_time INTEGER NOT NULL DEFAULT 0,
            error TEXT
        );

        -- One row per table, created the first time any index for that
        -- table is registered. owner_pid is set exactly once, by
        -- whichever worker's compare-and-set UPDATE (WHERE owner_pid IS
        -- NULL) wins the race to observe 'last index of table done'.
        -- That worker, and only that worker, installs the table's
        -- constraints and enqueues it for vacuum.
        CREATE TABLE IF NOT EXISTS table_indexes_done_owner (
            qualified_table TEXT PRIMARY KEY,
            owner_pid INTEGER
        );

        -- Same compare-and-set pattern as table_indexes_done_owner, one
        -- step earlier in the pipeline: the worker that observes 'last
        -- part of this table just finished' is the one that enqueues
        -- the table's indexes (or, for a table with no indexes at all,
        -- enqueues it directly for vacuum).
        CREATE TABLE IF NOT EXISTS table_copy_done_owner (
            qualified_table TEXT PRIMARY KEY,
            owner_pid INTEGER
        );

        CREATE TABLE IF NOT EXISTS process_info (
            qualified_table TEXT PRIMARY KEY,
            pid INTEGER NOT NULL,
            pstart INTEGER NOT NULL,
            role TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_table_summary_qname
            ON table_summary(qualified_name);
        CREATE INDEX IF NOT EXISTS idx_index_summary_qtable
            ON index_summary(qualified_table);
        ",
    )
}
