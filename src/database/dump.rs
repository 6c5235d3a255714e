//! Textual SQL dump of an open database.
//!
//! Emits the same shape as the sqlite3 shell's `.dump`: a transaction wrapper,
//! each table's CREATE followed by its rows as INSERT statements, then
//! indexes, triggers and views in catalog order, then `user_version` when it
//! is set. Virtual tables are declared
//! but their rows and shadow tables are left out: the module recreates its
//! shadow tables on CREATE, and reading the rows may need a tokenizer this
//! process does not have.

use rusqlite::Connection;

use crate::errors::Result;

/// Opening statement of a dump
pub const BEGIN_STATEMENT: &str = "BEGIN TRANSACTION;";

/// Closing statement of a dump
pub const COMMIT_STATEMENT: &str = "COMMIT;";

/// One row of `sqlite_master`
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub kind: String,
    pub name: String,
    pub sql: String,
}

impl SchemaEntry {
    pub fn is_table(&self) -> bool {
        self.kind == "table"
    }

    pub fn is_virtual_table(&self) -> bool {
        self.is_table() && is_virtual_table_declaration(&self.sql)
    }

    fn is_internal(&self) -> bool {
        self.name.starts_with("sqlite_")
    }
}

/// The catalog of a database, in creation order
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    pub entries: Vec<SchemaEntry>,
}

impl SchemaSnapshot {
    /// Read every catalog entry that carries SQL
    pub fn read(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT type, name, sql FROM sqlite_master WHERE sql IS NOT NULL ORDER BY rowid",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(SchemaEntry {
                    kind: row.get(0)?,
                    name: row.get(1)?,
                    sql: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn virtual_tables(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.entries.iter().filter(|e| e.is_virtual_table())
    }

    /// Whether a table is one of the backing tables of a virtual table
    pub fn is_shadow_table(&self, entry: &SchemaEntry) -> bool {
        entry.is_table()
            && !entry.is_virtual_table()
            && self
                .virtual_tables()
                .any(|vt| entry.name.starts_with(&format!("{}_", vt.name)))
    }
}

/// Quote an identifier for use in generated SQL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Build the query that renders each row of `table` as an INSERT statement.
///
/// Columns are listed explicitly so generated columns are skipped.
fn insert_rows_query(table: &str, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(",");
    let values = columns
        .iter()
        .map(|c| format!("quote({})", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(" || ',' || ");
    let prefix = format!("INSERT INTO {}({}) VALUES(", quote_identifier(table), column_list)
        .replace('\'', "''");
    format!(
        "SELECT '{}' || {} || ');' FROM {}",
        prefix,
        values,
        quote_identifier(table)
    )
}

fn with_terminator(sql: &str) -> String {
    let trimmed = sql.trim_end();
    if trimmed.ends_with(';') {
        trimmed.to_string()
    } else {
        format!("{};", trimmed)
    }
}

/// Walk the dump of `conn`, handing each statement to `emit` in order
pub fn for_each_statement<F>(conn: &Connection, snapshot: &SchemaSnapshot, mut emit: F) -> Result<()>
where
    F: FnMut(&str) -> Result<()>,
{
    emit(BEGIN_STATEMENT)?;

    for entry in snapshot.entries.iter().filter(|e| e.is_table()) {
        if entry.is_internal() || snapshot.is_shadow_table(entry) {
            log::debug!("Dump: skipping internal table {}", entry.name);
            continue;
        }

        emit(&with_terminator(&entry.sql))?;

        if entry.is_virtual_table() {
            continue;
        }

        let columns = column_names(conn, &entry.name)?;
        if columns.is_empty() {
            continue;
        }

        let mut stmt = conn.prepare(&insert_rows_query(&entry.name, &columns))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let insert: String = row.get(0)?;
            emit(&insert)?;
        }
    }

    for entry in snapshot.entries.iter().filter(|e| !e.is_table()) {
        if entry.is_internal() {
            continue;
        }
        emit(&with_terminator(&entry.sql))?;
    }

    // The application's migration level lives in the header, not the catalog
    let user_version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if user_version != 0 {
        emit(&format!("PRAGMA user_version = {};", user_version))?;
    }

    emit(COMMIT_STATEMENT)
}

/// Whether a dump statement declares a virtual table
pub fn is_virtual_table_declaration(statement: &str) -> bool {
    statement
        .trim_start()
        .get(..20)
        .map_or(false, |head| head.eq_ignore_ascii_case("CREATE VIRTUAL TABLE"))
}

/// Whether a dump statement only delimits the transaction
pub fn is_transaction_boundary(statement: &str) -> bool {
    let normalized = statement
        .trim()
        .trim_end_matches(';')
        .trim()
        .to_ascii_uppercase();
    matches!(
        normalized.as_str(),
        "BEGIN" | "BEGIN TRANSACTION" | "COMMIT" | "COMMIT TRANSACTION" | "END" | "END TRANSACTION" | "ROLLBACK"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, data BLOB);
             INSERT INTO items (name, data) VALUES ('it''s', x'00ff');
             INSERT INTO items (name, data) VALUES (NULL, NULL);
             CREATE INDEX items_name ON items (name);
             CREATE VIRTUAL TABLE items_fts USING fts5(name);
             CREATE VIEW named AS SELECT name FROM items WHERE name IS NOT NULL;",
        )
        .unwrap();
        conn
    }

    fn collect(conn: &Connection) -> Vec<String> {
        let snapshot = SchemaSnapshot::read(conn).unwrap();
        let mut out = Vec::new();
        for_each_statement(conn, &snapshot, |s| {
            out.push(s.to_string());
            Ok(())
        })
        .unwrap();
        out
    }

    #[test]
    fn test_dump_shape() {
        let statements = collect(&sample_db());

        assert_eq!(statements.first().map(String::as_str), Some(BEGIN_STATEMENT));
        assert_eq!(statements.last().map(String::as_str), Some(COMMIT_STATEMENT));
        assert!(statements[1].starts_with("CREATE TABLE items"));
        assert!(statements.contains(
            &"INSERT INTO \"items\"(\"id\",\"name\",\"data\") VALUES(1,'it''s',X'00FF');".to_string()
        ));
        assert!(statements.contains(
            &"INSERT INTO \"items\"(\"id\",\"name\",\"data\") VALUES(2,NULL,NULL);".to_string()
        ));

        // Index and view come after all table data
        let index_pos = statements.iter().position(|s| s.starts_with("CREATE INDEX")).unwrap();
        let last_insert = statements.iter().rposition(|s| s.starts_with("INSERT")).unwrap();
        assert!(index_pos > last_insert);
        assert!(statements.iter().any(|s| s.starts_with("CREATE VIEW named")));
    }

    #[test]
    fn test_dump_skips_fts_shadow_tables() {
        let statements = collect(&sample_db());

        assert!(statements
            .iter()
            .any(|s| s.starts_with("CREATE VIRTUAL TABLE items_fts")));
        assert!(!statements.iter().any(|s| s.contains("items_fts_data")));
        assert!(!statements.iter().any(|s| s.contains("items_fts_config")));
    }

    #[test]
    fn test_dump_replays_into_fresh_database() {
        let source = sample_db();
        let target = Connection::open_in_memory().unwrap();
        for statement in collect(&source) {
            target.execute_batch(&statement).unwrap();
        }

        let count: i64 = target
            .query_row("SELECT count(*) FROM items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
        let name: String = target
            .query_row("SELECT name FROM named", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "it's");
    }

    #[test]
    fn test_dump_carries_user_version() {
        let conn = sample_db();
        conn.pragma_update(None, "user_version", 1100).unwrap();

        let statements = collect(&conn);
        let n = statements.len();
        assert_eq!(statements[n - 2], "PRAGMA user_version = 1100;");
        assert_eq!(statements[n - 1], COMMIT_STATEMENT);

        // Unset version is left out
        assert!(!collect(&sample_db()).iter().any(|s| s.starts_with("PRAGMA")));
    }

    #[test]
    fn test_virtual_table_declaration() {
        assert!(is_virtual_table_declaration("  create virtual table t USING fts5(x);"));
        assert!(!is_virtual_table_declaration("CREATE TABLE t (x);"));
        assert!(!is_virtual_table_declaration(
            "INSERT INTO t VALUES('CREATE VIRTUAL TABLE x');"
        ));
    }

    #[test]
    fn test_transaction_boundaries() {
        assert!(is_transaction_boundary(BEGIN_STATEMENT));
        assert!(is_transaction_boundary(COMMIT_STATEMENT));
        assert!(is_transaction_boundary("  commit ;"));
        assert!(!is_transaction_boundary("INSERT INTO t VALUES('BEGIN');"));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("plain"), "\"plain\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
