mod config;
mod eval;
mod logging;

use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grapio::{Configuration, FeatureFlagLoader};
use tokio_util::sync::CancellationToken;

use crate::config::{CliConfig, Overrides};
use crate::eval::FlagKind;

#[derive(Parser, Debug)]
#[command(name = "grapio")]
#[command(version)]
#[command(about = "Synchronize and evaluate Grapio feature flags", long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short = 'c', long = "config", default_value = "grapio.toml", global = true)]
    config: String,

    /// Never contact the server; serve the local cache as is
    #[arg(long, global = true)]
    offline: bool,

    /// Name this client identifies itself with
    #[arg(long, global = true)]
    requester: Option<String>,

    /// Grapio server address, e.g. http://localhost:3278
    #[arg(long, global = true)]
    server: Option<String>,

    /// SQLite connection string for the local cache
    #[arg(long = "connection-string", global = true)]
    connection_string: Option<String>,

    /// Seconds between refresh passes
    #[arg(long = "refresh-interval", global = true)]
    refresh_interval: Option<i64>,

    /// Log at debug level
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the configuration and report every problem
    Validate,
    /// Download the flag set once and replace the local cache
    Sync,
    /// Resolve a single flag and print the result as JSON
    Eval {
        /// Flag key to resolve (case-sensitive)
        flag_key: String,

        /// Type to resolve the flag as
        #[arg(short = 'k', long = "kind", value_enum, default_value = "bool")]
        kind: FlagKind,

        /// Value to return when the flag cannot be resolved
        #[arg(short = 'd', long = "default")]
        default: Option<String>,

        /// Resolve from the local cache without syncing first
        #[arg(long = "no-sync")]
        no_sync: bool,
    },
    /// Sync, then keep refreshing until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(args.verbose)?;

    let mut cli_config = CliConfig::load(&args.config);
    cli_config.apply_env_overrides();
    cli_config.apply_cli_overrides(Overrides {
        offline: args.offline,
        requester: args.requester,
        server: args.server,
        connection_string: args.connection_string,
        refresh_interval: args.refresh_interval,
    });
    let mut config = cli_config.grapio;

    match args.cmd {
        Command::Validate => run_validate(&config),
        Command::Sync => run_sync(config).await,
        Command::Eval {
            flag_key,
            kind,
            default,
            no_sync,
        } => {
            if no_sync {
                config.offline = true;
            }
            run_eval(config, &flag_key, kind, default.as_deref()).await
        }
        Command::Run => run_refresher(config).await,
    }
}

fn run_validate(config: &Configuration) -> Result<()> {
    let violations = grapio::validate(config);
    if violations.is_empty() {
        println!("\u{2713} configuration is valid");
        return Ok(());
    }

    for violation in &violations {
        eprintln!("\u{2717} {}", violation);
    }
    process::exit(1);
}

async fn run_sync(config: Configuration) -> Result<()> {
    let offline = config.offline;
    let grapio = grapio::init().configuration(config).build()?;
    if offline {
        tracing::warn!("offline mode is enabled, nothing to synchronize");
        return Ok(());
    }

    grapio
        .loader()
        .load_flags(&CancellationToken::new())
        .await
        .context("synchronization failed")?;
    println!("\u{2713} feature flags synchronized");
    Ok(())
}

async fn run_eval(
    config: Configuration,
    flag_key: &str,
    kind: FlagKind,
    default: Option<&str>,
) -> Result<()> {
    let grapio = grapio::init().configuration(config).build()?;
    let provider = grapio.provider();
    if let Err(e) = provider.initialize(&CancellationToken::new()).await {
        // Resolution reports the provider as not ready.
        tracing::error!("failed to synchronize feature flags: {}", e);
    }

    let out = eval::evaluate(&provider, flag_key, kind, default).await?;
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn run_refresher(config: Configuration) -> Result<()> {
    let grapio = grapio::init().configuration(config).build()?;
    let cancel = CancellationToken::new();

    let handle = grapio
        .start(cancel.clone())
        .await
        .context("initial synchronization failed")?;
    let Some(handle) = handle else {
        tracing::warn!("offline mode is enabled, nothing to refresh");
        return Ok(());
    };

    tracing::info!(
        interval = grapio.configuration().refresh_interval,
        "refreshing feature flags, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("shutting down");
    handle.stop().await?;
    Ok(())
}
