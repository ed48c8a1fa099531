use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "prlens")]
#[command(version, about = "Pull request documentation and AI code review")]
pub struct Cli {
    /// Path to the config file. Defaults to ./prlens.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the browser UI and the analysis WebSocket
    Serve {
        /// Interface to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Open the UI in a browser once the server is up
        #[arg(long)]
        open: bool,

        /// Development mode: permissive CORS, no browser
        #[arg(long)]
        dev: bool,
    },
    /// Analyze one pull request from the terminal
    Analyze {
        /// Pull request ID
        #[arg(long)]
        pr: String,

        /// Repository name (defaults to the configured default repository)
        #[arg(short, long)]
        repo: Option<String>,

        /// Issue key to include as context, e.g. ABC-123
        #[arg(short, long)]
        issue: Option<String>,

        /// Skip documentation generation
        #[arg(long)]
        no_docs: bool,

        /// Skip code review generation
        #[arg(long)]
        no_review: bool,

        /// Write the result JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the effective configuration and check service connectivity
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();
    prlens::logging::init(cli.verbose, cli.log_json);

    let config = prlens::config::AppConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            open,
            dev,
        } => {
            cmd::cmd_serve(config, host, port, open, dev).await?;
        }
        Commands::Analyze {
            pr,
            repo,
            issue,
            no_docs,
            no_review,
            output,
        } => {
            let args = cmd::AnalyzeArgs {
                pr,
                repo,
                issue,
                documentation: !no_docs,
                code_review: !no_review,
                output,
            };
            cmd::cmd_analyze(config, args).await?;
        }
        Commands::Config => cmd::cmd_config(&config, cli.config.as_deref()).await?,
    }

    Ok(())
}
