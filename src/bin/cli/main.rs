mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::serve::ServeArgs;

#[derive(Parser)]
#[command(
    name = "signal-archive",
    about = "Decrypt a Signal Desktop archive and browse it locally",
    version
)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve(ServeArgs),

    /// List tables and row counts of a decrypted database
    Inspect {
        /// Encrypted db.sqlite
        database: PathBuf,
        /// Literal 64-character hex key
        #[arg(long, conflicts_with = "config", required_unless_present = "config")]
        key: Option<String>,
        /// Signal config.json to resolve the key from
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the database key resolved from a config.json
    ResolveKey {
        /// Signal config.json
        config: PathBuf,
        /// Keyring secret to use instead of querying the credential store
        /// (use "-" to read it from stdin)
        #[arg(long)]
        secret: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    match cli.command {
        None => commands::serve::run(ServeArgs::default())?,
        Some(Command::Serve(args)) => commands::serve::run(args)?,
        Some(Command::Inspect {
            database,
            key,
            config,
        }) => {
            commands::inspect::run(&database, key.as_deref(), config.as_deref(), &cli.format)?;
        }
        Some(Command::ResolveKey { config, secret }) => {
            commands::resolve_key::run(&config, secret, &cli.format)?;
        }
    }

    Ok(())
}
