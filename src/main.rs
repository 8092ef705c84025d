//! Observer Zero - realtime presence counter
//!
//! `serve` runs the aggregator that counts live observer sessions and
//! broadcasts rate-limited updates. `load` runs the harness that opens and
//! maintains thousands of sessions against it.

mod cli;
mod config;
mod error;
mod harness;
mod logging;
mod protocol;
mod server;
mod version;

use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::ObserverConfig;
use crate::error::{Error, Result};

fn main() {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => {
            // Config commands use minimal logging
            logging::init_simple(tracing::Level::WARN)?;
            handle_config_command(subcommand)
        }
        Commands::Serve {
            config,
            port,
            testing,
            debug,
        } => {
            let mut config = ObserverConfig::load(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            config.server.testing_mode |= testing;
            config.server.debug_mode |= debug;

            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;
            log_startup("Starting aggregator");
            run_server(config)
        }
        Commands::Load {
            config,
            url,
            target,
        } => {
            let mut config = ObserverConfig::load(config.as_deref())?;
            if let Some(url) = url {
                config.harness.url = url;
                config.validate()?;
            }

            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;
            log_startup("Starting load harness");
            run_harness(config, target)
        }
    }
}

fn log_startup(message: &str) {
    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "{}", message
    );
}

fn build_runtime(worker_threads: usize) -> Result<tokio::runtime::Runtime> {
    let threads = if worker_threads > 0 {
        worker_threads
    } else {
        num_cpus::get()
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(threads)
        .thread_name("observer-zero")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))
}

/// Serve until Ctrl+C
fn run_server(config: ObserverConfig) -> Result<()> {
    let runtime = build_runtime(config.server.worker_threads)?;

    runtime.block_on(async move {
        let handle = server::start(&config.server).await?;
        info!(url = %handle.ws_url(), "Accepting observers");

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        handle.shutdown().await;
        Ok::<(), Error>(())
    })
}

fn run_harness(config: ObserverConfig, target: Option<usize>) -> Result<()> {
    let runtime = build_runtime(0)?;
    runtime.block_on(harness::run(&config.harness, target))
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: cli::ConfigSubcommand) -> Result<()> {
    use cli::ConfigSubcommand;

    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = ObserverConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            config::init_config(path.as_deref(), force)?;
        }
        ConfigSubcommand::Validate { config } => {
            ObserverConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
