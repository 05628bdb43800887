use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

mod commands;
mod context;
mod logging;

use context::CliContext;

#[derive(Parser, Debug)]
#[command(
    name = "pywarden",
    version,
    about = "Provision a private Python runtime and run code against it"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print progress events as JSON lines instead of text.
    #[arg(long, global = true)]
    json_progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Init {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    Config {
        #[arg(long)]
        print: bool,
    },
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Install the interpreter and create the shared environment if needed.
    Ensure,
    Install {
        /// Install into this consumer's isolated directory.
        #[arg(long)]
        consumer: Option<String>,
        /// Requirements manifest (isolated installs only).
        #[arg(short = 'r', long = "requirements", requires = "consumer")]
        requirements: Option<PathBuf>,
        /// Reinstall even when the manifest is unchanged.
        #[arg(long)]
        force: bool,
        /// Use the consumer's own virtual environment instead of a directory.
        #[arg(long, requires = "consumer")]
        venv: bool,
        packages: Vec<String>,
    },
    List {
        #[arg(long)]
        consumer: Option<String>,
        #[arg(long, requires = "consumer")]
        venv: bool,
    },
    /// Consumers that have an isolated directory or, with --venv, their own
    /// virtual environment.
    Consumers {
        #[arg(long)]
        venv: bool,
    },
    /// Deletes a consumer's isolated directory and virtual environment.
    Remove {
        #[arg(long)]
        consumer: String,
    },
    Run {
        #[command(flatten)]
        exec: ExecArgs,
        script: PathBuf,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    Exec {
        #[command(flatten)]
        exec: ExecArgs,
        code: String,
    },
    /// Start a long-running script, stream its output and wait for it.
    Spawn {
        #[command(flatten)]
        exec: ExecArgs,
        script: PathBuf,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ExecArgs {
    #[arg(long)]
    pub consumer: Option<String>,
    #[arg(long)]
    pub cwd: Option<PathBuf>,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Extra environment variable, KEY=VALUE.
    #[arg(short = 'e', long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,
    /// Extra module search path entry.
    #[arg(long = "search-path")]
    pub search_paths: Vec<PathBuf>,
    /// Run in the consumer's own virtual environment, synced to this manifest.
    #[arg(short = 'r', long = "requirements", requires = "consumer")]
    pub requirements: Option<PathBuf>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { path, force } = &cli.command {
        return init_config(path.clone(), *force);
    }

    let ctx = CliContext::load(cli.config.clone(), cli.json_progress)?;
    logging::init_tracing(&ctx.config.logging);

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Config { print } => {
            if print {
                commands::config::print_effective(&ctx)
            } else {
                Ok(())
            }
        }
        Commands::Status { json } => commands::status::execute(&ctx, json).await,
        Commands::Ensure => commands::status::ensure(&ctx).await,
        Commands::Install {
            consumer,
            requirements,
            force,
            venv,
            packages,
        } => {
            commands::install::execute(
                &ctx,
                commands::install::InstallInputs {
                    consumer,
                    requirements,
                    force,
                    venv,
                    packages,
                },
            )
            .await
        }
        Commands::List { consumer, venv } => commands::packages::list(&ctx, consumer, venv).await,
        Commands::Consumers { venv } => commands::packages::consumers(&ctx, venv),
        Commands::Remove { consumer } => commands::packages::remove(&ctx, &consumer),
        Commands::Run { exec, script, args } => {
            let target = commands::run::RunTarget::Script { script, args };
            commands::run::execute(&ctx, exec, target).await
        }
        Commands::Exec { exec, code } => {
            commands::run::execute(&ctx, exec, commands::run::RunTarget::Code(code)).await
        }
        Commands::Spawn { exec, script, args } => {
            commands::run::spawn(&ctx, exec, script, args).await
        }
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let paths = pywarden_core::config::ConfigPaths::resolve()?;
    let config_path = path.unwrap_or(paths.config_path);
    if config_path.exists() && !force {
        return Err(anyhow::anyhow!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        ));
    }
    let config = pywarden_core::config::Config::default_config();
    config.save(&config_path)?;
    println!("Config written to {}", config_path.display());
    Ok(())
}
