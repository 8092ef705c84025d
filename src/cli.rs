//! CLI argument parsing using clap v4

use clap::{Parser, Subcommand};

/// Observer Zero - realtime presence counter
///
/// Runs the presence aggregator, or a load harness that holds thousands of
/// observer sessions open against it.
#[derive(Parser, Debug)]
#[command(name = "observer-zero")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the presence aggregator
    Serve {
        /// Path to configuration file
        #[arg(short, long, env = "OBSERVER_CONFIG")]
        config: Option<String>,

        /// Listen port (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable the /force-count debug endpoint
        #[arg(long)]
        testing: bool,

        /// Log every connect and disconnect
        #[arg(long)]
        debug: bool,
    },

    /// Run the load harness (reads commands from stdin)
    Load {
        /// Path to configuration file
        #[arg(short, long, env = "OBSERVER_CONFIG")]
        config: Option<String>,

        /// Aggregator WebSocket URL (overrides configuration)
        #[arg(short, long)]
        url: Option<String>,

        /// Pool size to reach before reading commands
        #[arg(short, long)]
        target: Option<usize>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::parse_from(["observer-zero", "serve"]);
        match cli.command {
            Commands::Serve { config, port, testing, debug } => {
                assert!(config.is_none());
                assert!(port.is_none());
                assert!(!testing);
                assert!(!debug);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_with_overrides() {
        let cli = Cli::parse_from(["observer-zero", "serve", "--port", "4000", "--testing", "--debug"]);
        match cli.command {
            Commands::Serve { port, testing, debug, .. } => {
                assert_eq!(port, Some(4000));
                assert!(testing);
                assert!(debug);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_load_with_target() {
        let cli = Cli::parse_from([
            "observer-zero",
            "load",
            "--url",
            "ws://127.0.0.1:4000/ws",
            "--target",
            "250",
        ]);
        match cli.command {
            Commands::Load { url, target, .. } => {
                assert_eq!(url.as_deref(), Some("ws://127.0.0.1:4000/ws"));
                assert_eq!(target, Some(250));
            }
            _ => panic!("Expected Load command"),
        }
    }

    #[test]
    fn test_load_rejects_negative_target() {
        assert!(Cli::try_parse_from(["observer-zero", "load", "--target", "-5"]).is_err());
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["observer-zero", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["observer-zero", "config", "init", "--force"]);
        match cli.command {
            Commands::Config { subcommand: ConfigSubcommand::Init { path, force } } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
