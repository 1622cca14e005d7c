mod check_cmd;
mod config;
mod recognize_cmd;

use std::io;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use htnrec_core::InsertionMode;

#[derive(Parser)]
#[command(
    name = "htnrec",
    about = "Recognize hierarchical plans from partial observations"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an htnrec config file with the default settings
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Load and validate a domain file
    Check {
        /// Path to the domain TOML file
        domain: String,
    },
    /// Recognize the plan behind a problem's observations
    Recognize {
        /// Path to the domain TOML file
        domain: String,
        /// Path to the problem TOML file
        problem: String,
        /// Most unobserved positions to hypothesize
        #[arg(long)]
        max_level: Option<usize>,
        /// Where hypothesized actions may go: suffix or anywhere
        #[arg(long)]
        insertion: Option<InsertionMode>,
    },
    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        recognizer: config::RecognizerSection::defaults(),
    };
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(force)?;
        }
        Commands::Check { domain } => {
            check_cmd::run_check(&domain)?;
        }
        Commands::Recognize {
            domain,
            problem,
            max_level,
            insertion,
        } => {
            let config = config::resolve(max_level, insertion)?;
            let code = recognize_cmd::run_recognize(&domain, &problem, config).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "htnrec", &mut io::stdout());
        }
    }

    Ok(())
}
