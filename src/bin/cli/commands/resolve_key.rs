use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use zeroize::Zeroizing;

use signal_archive::keys::{resolve_key_file, CredentialStore, LibsecretStore, StaticCredentialStore};

use crate::OutputFormat;

/// Secret from the flag, or stdin when the flag is "-"
fn read_secret(secret: String) -> Result<Zeroizing<String>> {
    if secret != "-" {
        return Ok(Zeroizing::new(secret));
    }
    let mut buf = Zeroizing::new(String::new());
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read secret from stdin")?;
    let trimmed = Zeroizing::new(buf.trim_end_matches(['\r', '\n']).to_string());
    Ok(trimmed)
}

pub fn run(config: &Path, secret: Option<String>, format: &OutputFormat) -> Result<()> {
    let store: Box<dyn CredentialStore> = match secret {
        Some(secret) => Box::new(StaticCredentialStore::new(read_secret(secret)?.as_str())),
        None => Box::new(LibsecretStore::default()),
    };

    let key = resolve_key_file(config, store.as_ref())?;
    let key_hex = Zeroizing::new(key.to_hex());

    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "key": key_hex.as_str() })),
        OutputFormat::Plain => println!("{}", key_hex.as_str()),
    }
    log::info!("Resolved a {}-byte key from {:?}", key.len(), config);
    Ok(())
}
