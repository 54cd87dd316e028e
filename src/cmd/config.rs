//! Configuration view and validation commands: `dependify config`.

use std::path::Path;

use anyhow::Result;
use dependify::config::{CONFIG_DIR, CONFIG_FILE, DependifyConfig};

use super::super::ConfigCommands;

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(unset)")
}

fn print_effective(config: &DependifyConfig) {
    println!("[server]");
    println!("  port = {}", config.server.port);
    println!("  frontend_url = \"{}\"", config.server.frontend_url);
    println!("  public_url = \"{}\"", config.public_url());
    println!(
        "  pipeline_url = {}",
        or_unset(config.server.pipeline_url.as_deref())
    );
    println!("  feed_capacity = {}", config.server.feed_capacity);
    println!(
        "  auth_rate_per_minute = {}",
        config.server.auth_rate_per_minute
    );
    println!("  jobs_rate_per_hour = {}", config.server.jobs_rate_per_hour);
    println!(
        "  finished_job_ttl_secs = {}",
        config.server.finished_job_ttl_secs
    );
    println!(
        "  api_secret_key = {}",
        if config.server.api_secret_key.is_some() {
            "(set)"
        } else {
            "(unset)"
        }
    );
    println!();

    println!("[client]");
    println!("  api_url = \"{}\"", config.client.api_url);
    println!("  feed_url = \"{}\"", config.feed_url());
    match config.session_file() {
        Some(path) => println!("  session_file = \"{}\"", path.display()),
        None => println!("  session_file = (in memory)"),
    }
    println!(
        "  max_resubscribe_attempts = {}",
        config.client.max_resubscribe_attempts
    );
    println!(
        "  resubscribe_backoff_ms = {}",
        config.client.resubscribe_backoff_ms
    );
    println!();

    println!("[github]");
    println!(
        "  client_id = {}",
        or_unset(config.github.client_id.as_deref())
    );
    println!(
        "  client_secret = {}",
        if config.github.client_secret.is_some() {
            "(set)"
        } else {
            "(unset)"
        }
    );
    println!("  redirect_uri = \"{}\"", config.github.redirect_uri);
    println!();
}

pub fn cmd_config(
    project_dir: &Path,
    config: &DependifyConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Dependify Configuration");
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Run 'dependify config init' to create one.");
            }
            println!();
            println!("Effective values (with env overrides):");
            println!();
            print_effective(config);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if config_path.exists() {
                // Surface parse errors even though `config` already loaded it.
                DependifyConfig::load(&config_path)?;
            } else {
                println!("No {} found. Using defaults.", CONFIG_FILE);
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            DependifyConfig::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] port, frontend_url, pipeline_url");
            println!("  - [client] api_url, max_resubscribe_attempts");
            println!("  - [github] client_id, redirect_uri");
            println!();
            println!(
                "Keep GITHUB_CLIENT_SECRET and API_SECRET_KEY in the environment or a .env file."
            );
            println!();
        }
    }

    Ok(())
}
