use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dependify::config::DependifyConfig;
use dependify::telemetry::{self, TelemetryConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "dependify")]
#[command(version, about = "Repository modernization dashboard")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write daily-rolling JSON logs to this directory
    #[arg(long, global = true, env = "DEPENDIFY_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Directory holding `.dependify/dependify.toml` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the progress hub (OAuth exchange, job intake, WebSocket feed)
    Serve {
        /// Port to serve on (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (permissive CORS, bind all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Sign in with GitHub
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Submit a repository for modernization
    Submit {
        /// `owner/name` or a github.com URL
        repository: String,

        /// Follow progress until the job finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// Follow a job's live progress feed
    Watch { job_id: String },
    /// Review a finished job's changes
    Diff {
        job_id: String,

        /// File to show (defaults to the first changed file)
        #[arg(short, long)]
        file: Option<String>,

        /// Print the pull request description instead of the diff
        #[arg(long)]
        markdown: bool,

        /// Print the changelog as JSON
        #[arg(long, conflicts_with = "markdown")]
        json: bool,

        /// Unchanged lines shown around each hunk
        #[arg(long, default_value = "3")]
        context: usize,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum AuthCommands {
    /// Print (and open) the GitHub authorization URL
    Login {
        /// Don't open a browser
        #[arg(long)]
        no_open: bool,
    },
    /// Complete sign-in with the URL GitHub redirected to
    Callback { url: String },
    /// Show the current session
    Status {
        /// Check the session with the backend; a rejected session is removed
        #[arg(long)]
        verify: bool,
    },
    /// Forget the stored session
    Logout,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Check configuration for problems
    Validate,
    /// Write a default dependify.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _log_guard = telemetry::init(&TelemetryConfig {
        verbose: cli.verbose,
        json: cli.log_json,
        log_dir: cli.log_dir.clone(),
    })?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = DependifyConfig::resolve(&project_dir)?;

    match cli.command {
        Commands::Serve { port, dev } => cmd::cmd_serve(config, port, dev).await?,
        Commands::Auth { command } => cmd::cmd_auth(&config, command).await?,
        Commands::Submit { repository, watch } => {
            cmd::cmd_submit(&config, &repository, watch, cli.verbose).await?
        }
        Commands::Watch { job_id } => cmd::cmd_watch(&config, &job_id, cli.verbose).await?,
        Commands::Diff {
            job_id,
            file,
            markdown,
            json,
            context,
        } => {
            let format = if json {
                cmd::DiffFormat::Json
            } else if markdown {
                cmd::DiffFormat::Markdown
            } else {
                cmd::DiffFormat::Unified
            };
            cmd::cmd_diff(&config, &job_id, file.as_deref(), format, context).await?
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, &config, command)?,
    }

    Ok(())
}
