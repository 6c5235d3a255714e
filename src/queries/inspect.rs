//! Table listing for the `inspect` command

use rusqlite::Connection;

use super::models::TableSummary;
use crate::database::dump::{quote_identifier, SchemaSnapshot};
use crate::errors::Result;

/// Every ordinary table with its columns and row count, in catalog order.
///
/// Virtual tables and their backing tables are left out.
pub fn table_summaries(conn: &Connection) -> Result<Vec<TableSummary>> {
    let snapshot = SchemaSnapshot::read(conn)?;
    let mut summaries = Vec::new();

    for entry in &snapshot.entries {
        if !entry.is_table()
            || entry.is_virtual_table()
            || entry.name.starts_with("sqlite_")
            || snapshot.is_shadow_table(entry)
        {
            continue;
        }

        let table = quote_identifier(&entry.name);
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let rows: i64 =
            conn.query_row(&format!("SELECT count(*) FROM {}", table), [], |row| row.get(0))?;

        summaries.push(TableSummary {
            name: entry.name.clone(),
            columns,
            rows,
        });
    }

    Ok(summaries)
}
