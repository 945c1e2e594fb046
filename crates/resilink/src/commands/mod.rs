//! Command handlers, one module per subcommand.

pub mod config_cmd;
pub mod diagnose;
pub mod fetch;
pub mod limits;
pub mod ping;

use resilink_config::Settings;
use resilink_core::SafeClient;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Route a parsed command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Ping => ping::handle(global).await,
        Command::Diagnose => diagnose::handle(global).await,
        Command::Fetch(args) => fetch::handle(args, global).await,
        Command::Limits(args) => limits::handle(args, global),
        Command::Config(args) => config_cmd::handle(args, global),
    }
}

/// Settings file plus environment, overlaid with CLI flags.
pub fn resolve_settings(global: &GlobalOpts) -> Result<Settings, CliError> {
    let mut settings = match &global.config {
        Some(path) => resilink_config::load_from(path)?,
        None => resilink_config::load_settings()?,
    };

    if let Some(ref url) = global.backend_url {
        settings.backend_url = Some(url.clone());
    }
    if let Some(ref key) = global.anon_key {
        settings.anon_key = Some(key.clone());
        settings.anon_key_env = None;
    }
    if let Some(platform) = global.platform {
        settings.platform = Some(platform);
    }
    if global.fallback {
        settings.fallback_mode = true;
    }
    Ok(settings)
}

/// Production client for the configured backend.
pub fn connect(settings: &Settings) -> Result<SafeClient, CliError> {
    let backend = settings.to_backend_config()?;
    let runtime = settings.to_runtime_config();
    tracing::debug!(url = %backend.url, platform = %runtime.platform, "connecting");
    Ok(SafeClient::connect(&backend, runtime)?)
}
