use resilink_config::{ConfigError, Settings};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(resilink_config::config_path);

    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let mut settings = super::resolve_settings(global)?;
            if settings.anon_key.is_some() {
                settings.anon_key = Some(REDACTED.into());
            }
            let out = output::render_single(
                global.output,
                &settings,
                |s| toml_view(s).unwrap_or_default(),
                |s| s.backend_url.clone().unwrap_or_default(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Init {
            anon_key_env,
            force,
        } => {
            if path.exists() && !force {
                return Err(CliError::AlreadyExists {
                    path: path.display().to_string(),
                });
            }

            let settings = Settings {
                backend_url: global.backend_url.clone(),
                anon_key: global.anon_key.clone(),
                anon_key_env,
                platform: global.platform,
                fallback_mode: global.fallback,
                ..Settings::default()
            };
            settings.backend_url()?;

            resilink_config::save_to(&settings, &path)?;
            output::print_output(&format!("wrote {}", path.display()), global.quiet);
            Ok(())
        }
    }
}

fn toml_view(settings: &Settings) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(settings)?)
}
