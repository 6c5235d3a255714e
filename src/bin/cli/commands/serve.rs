use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use signal_archive::config::ServerConfig;
use signal_archive::keys::LibsecretStore;
use signal_archive::server::{self, AppState};
use signal_archive::session::SessionManager;

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// TOML file with server settings
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Address to listen on, e.g. 127.0.0.1:8000
    #[arg(long)]
    pub bind: Option<String>,
    /// Signal directory used by init-volume when none is given
    #[arg(long)]
    pub signal_path: Option<PathBuf>,
    /// Built frontend to serve at /
    #[arg(long)]
    pub static_dir: Option<PathBuf>,
    /// Largest accepted upload, in megabytes
    #[arg(long)]
    pub max_upload_mb: Option<usize>,
}

impl ServeArgs {
    /// File settings first, then flags on top
    fn resolve(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(path) = self.signal_path {
            config.default_signal_path = path;
        }
        if let Some(dir) = self.static_dir {
            config.static_dir = Some(dir);
        }
        if let Some(mb) = self.max_upload_mb {
            config.max_upload_mb = mb;
        }
        Ok(config)
    }
}

pub fn run(args: ServeArgs) -> Result<()> {
    let config = args.resolve()?;
    let addr = config.bind_addr()?;

    let sessions = SessionManager::new(Arc::new(LibsecretStore::default()));
    let state = Arc::new(AppState::new(sessions, config));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime
        .block_on(server::serve(addr, state))
        .with_context(|| format!("Server on {} failed", addr))?;

    log::info!("Signal archive server stopped");
    Ok(())
}
