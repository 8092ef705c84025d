//! Line-oriented control surface for the load harness

use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::HarnessSettings;
use crate::error::{Error, Result};
use crate::protocol::parse_count;

use super::pool::{AdjustOutcome, PoolConfig, PoolManager};

/// Time given to close frames before the process exits
const CLOSE_FLUSH: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Adjust to the configured maximum
    RampToMax,
    SetTarget(usize),
    DisconnectAll,
    Status,
    Exit,
    Help,
}

impl FromStr for ControlCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or("").to_lowercase();

        let command = match verb.as_str() {
            "1" | "max" => ControlCommand::RampToMax,
            "2" | "set" => {
                let raw = parts.next().unwrap_or("");
                ControlCommand::SetTarget(parse_target(raw)?)
            }
            "3" | "disconnect" => ControlCommand::DisconnectAll,
            "4" | "status" => ControlCommand::Status,
            "5" | "exit" | "quit" => ControlCommand::Exit,
            "help" | "?" => ControlCommand::Help,
            _ => {
                return Err(Error::Protocol(format!(
                    "Unknown command '{}'. Type 'help' for the command list.",
                    line.trim()
                )))
            }
        };

        if let Some(extra) = parts.next() {
            return Err(Error::Protocol(format!("Unexpected argument '{}'", extra)));
        }
        Ok(command)
    }
}

/// Parse a pool size
pub fn parse_target(input: &str) -> Result<usize> {
    let count = parse_count(input)?;
    usize::try_from(count).map_err(|_| Error::invalid_target(input, "too large"))
}

pub fn print_help(max_clients: usize) {
    println!("Commands:");
    println!("  1 | max          ramp up to {} sessions", max_clients);
    println!("  2 N | set N      adjust the pool to N sessions");
    println!("  3 | disconnect   close every session");
    println!("  4 | status       show the pool health report");
    println!("  5 | exit         disconnect and quit");
}

/// Run the harness until exit, EOF or Ctrl+C
pub async fn run(settings: &HarnessSettings, initial_target: Option<usize>) -> Result<()> {
    let pool = PoolManager::new(PoolConfig::from(settings));
    info!(url = %settings.url, max_clients = settings.max_clients, "Load harness ready");
    print_help(settings.max_clients);

    if let Some(target) = initial_target {
        spawn_adjust(&pool, target);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<ControlCommand>() {
                        Ok(command) => {
                            if !execute(&pool, command, settings.max_clients) {
                                break;
                            }
                        }
                        Err(e) => eprint!("{}", e.format_for_terminal()),
                    }
                }
                Ok(None) => {
                    if initial_target.is_some() {
                        info!("Input closed, holding the pool until Ctrl+C");
                        let _ = tokio::signal::ctrl_c().await;
                    }
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read command input");
                    break;
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
        }
    }

    let closed = pool.disconnect_all();
    tokio::time::sleep(CLOSE_FLUSH).await;
    info!(closed, "Load harness stopped");
    Ok(())
}

/// Apply one command; returns false when the harness should stop
fn execute(pool: &PoolManager, command: ControlCommand, max_clients: usize) -> bool {
    match command {
        ControlCommand::RampToMax => spawn_adjust(pool, max_clients),
        ControlCommand::SetTarget(target) => spawn_adjust(pool, target),
        ControlCommand::DisconnectAll => {
            let closed = pool.disconnect_all();
            println!("Closed {} sessions", closed);
        }
        ControlCommand::Status => {
            let report = pool.health_check();
            println!("{}", report);
            if let Some(count) = report.reported_count {
                println!("Aggregator reports {} observers", count);
            }
            if let Some(target) = pool.ramp_target() {
                println!("Ramping towards {}", target);
            } else if !report.is_healthy() {
                println!(
                    "{} sessions are not connected; use '2 N' to reset the pool",
                    report.unreconciled()
                );
            }
        }
        ControlCommand::Help => print_help(max_clients),
        ControlCommand::Exit => return false,
    }
    true
}

/// Adjust in the background so status stays responsive
fn spawn_adjust(pool: &PoolManager, target: usize) {
    let pool = pool.clone();
    tokio::spawn(async move {
        match pool.adjust(target).await {
            Ok(AdjustOutcome::Ramped(report)) => println!(
                "Ramp to {} {} after {:.1}s: {} (delta {})",
                report.target,
                if report.cancelled { "cancelled" } else { "finished" },
                report.elapsed.as_secs_f64(),
                report.health,
                report.delta()
            ),
            Ok(AdjustOutcome::Shrunk { removed, pool_size }) => {
                println!("Closed {} sessions, pool size {}", removed, pool_size)
            }
            Ok(AdjustOutcome::Unchanged { pool_size }) => {
                println!("Pool already at {}", pool_size)
            }
            Err(e) => eprint!("{}", e.format_for_terminal()),
        }
    });
}
