use std::path::Path;

use anyhow::{bail, Result};

use signal_archive::database::decrypt_database;
use signal_archive::keys::{parse_hex_key, resolve_key_file, LibsecretStore};
use signal_archive::queries::{table_summaries, SchemaContract};

use crate::OutputFormat;

pub fn run(
    database: &Path,
    key: Option<&str>,
    config: Option<&Path>,
    format: &OutputFormat,
) -> Result<()> {
    let key = match (key, config) {
        (Some(hex), _) => parse_hex_key(hex)?,
        (None, Some(path)) => resolve_key_file(path, &LibsecretStore::default())?,
        (None, None) => bail!("Either --key or --config is required"),
    };

    let session = decrypt_database(database, key)?;
    let conn = session.connection()?;
    let tables = table_summaries(conn)?;
    let schema = SchemaContract::detect(conn);

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "storage": session.kind(),
                "user_version": schema.as_ref().ok().map(|s| s.user_version),
                "schema_error": schema.as_ref().err().map(|e| e.to_string()),
                "tables": tables,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("Decrypted {} ({})", database.display(), session.kind());
            match &schema {
                Ok(contract) => println!(
                    "Schema version {} (sender column {})",
                    contract.user_version, contract.sender_column
                ),
                Err(e) => println!("{}", e),
            }
            println!();

            let width = tables.iter().map(|t| t.name.len()).max().unwrap_or(0);
            for table in &tables {
                println!(
                    "{:<width$}  {:>8} rows  {} columns",
                    table.name,
                    table.rows,
                    table.columns.len(),
                    width = width
                );
            }
        }
    }

    Ok(())
}
