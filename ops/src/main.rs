use clap::{Parser, Subcommand};
use log::{error, info, warn};
use ops::{aws, run_backup_within, send_console_command, update_dns_within};
use shared::config::{BackupConfig, ConsoleConfig, DnsConfig};
use shared::LaunchEvent;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot the shared filesystem to the backup bucket once
    Backup {
        /// Seconds before in-flight uploads are abandoned
        #[arg(long, default_value = "60")]
        deadline_secs: u64,
    },
    /// Run the backup on a fixed interval until Ctrl+C
    Schedule {
        /// Seconds between two runs
        #[arg(long, default_value = "3600")]
        interval_secs: u64,
        /// Seconds before a single run is abandoned
        #[arg(long, default_value = "60")]
        deadline_secs: u64,
    },
    /// Point the public DNS record at a launched instance
    UpdateDns {
        /// Instance that was launched
        #[arg(long, required_unless_present = "event", conflicts_with = "event")]
        instance_id: Option<String>,
        /// Launch event as JSON, or `-` to read it from stdin
        #[arg(long)]
        event: Option<PathBuf>,
        /// Seconds before the update is abandoned
        #[arg(long, default_value = "20")]
        deadline_secs: u64,
    },
    /// Send a command to the running game server's console
    Console {
        /// Command to run, e.g. `list`
        #[arg(required = true)]
        command: Vec<String>,
    },
}

/// Main-method of the operations tool.
/// Validates configuration before any cloud call, then runs the chosen operation.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    // Parse command line arguments
    let args = Args::parse();

    match args.command {
        Command::Backup { deadline_secs } => {
            let config = BackupConfig::from_env()?;
            let ctx = aws::load_context().await;

            let deadline = Duration::from_secs(deadline_secs);
            let summary = run_backup_within(&ctx, &config, deadline).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Schedule {
            interval_secs,
            deadline_secs,
        } => {
            let config = BackupConfig::from_env()?;
            run_schedule(
                &config,
                Duration::from_secs(interval_secs),
                Duration::from_secs(deadline_secs),
            )
            .await;
        }
        Command::UpdateDns {
            instance_id,
            event,
            deadline_secs,
        } => {
            let config = DnsConfig::from_env()?;
            let event = match (instance_id, event) {
                (Some(id), _) => LaunchEvent::for_instance(id),
                (None, Some(path)) => read_event(&path)?,
                (None, None) => return Err("either --instance-id or --event is required".into()),
            };
            let ctx = aws::load_context().await;

            let deadline = Duration::from_secs(deadline_secs);
            let ack = update_dns_within(&ctx, &config, &event, deadline).await?;
            println!("{}", serde_json::to_string_pretty(&ack)?);
        }
        Command::Console { command } => {
            let config = ConsoleConfig::from_env()?;
            let ctx = aws::load_context().await;

            let reply = send_console_command(&ctx, &config, &command.join(" ")).await?;
            println!("{}", reply);
        }
    }

    Ok(())
}

fn read_event(path: &Path) -> Result<LaunchEvent, Box<dyn std::error::Error>> {
    let raw = if path == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        raw
    } else {
        std::fs::read_to_string(path)?
    };
    Ok(serde_json::from_str(&raw)?)
}

/// Runs one backup per tick. A failed run is logged and the next tick still fires.
async fn run_schedule(config: &BackupConfig, period: Duration, deadline: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    ticker.tick().await;
    info!("Backing up every {:?}", period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping the scheduler");
                return;
            }
        }

        // Fresh clients per run, as for a one-off invocation
        let run = async {
            let ctx = aws::load_context().await;
            run_backup_within(&ctx, config, deadline).await
        };

        tokio::select! {
            result = run => match result {
                Ok(summary) if summary.is_success() => {
                    info!(
                        "Scheduled backup {} uploaded {} file(s)",
                        summary.run_key, summary.uploaded
                    );
                }
                Ok(summary) => {
                    warn!(
                        "Scheduled backup {} had {} failure(s)",
                        summary.run_key,
                        summary.failures.len()
                    );
                }
                Err(e) => error!("Scheduled backup failed: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, abandoning the running backup");
                return;
            }
        }
    }
}
