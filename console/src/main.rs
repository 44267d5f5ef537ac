use clap::Parser;
use console::{send_command_with, ConsoleOptions};
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Console host to connect to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Console port
    #[arg(short, long, env = "CONSOLE_PORT", default_value = "25575")]
    port: u16,

    /// Shared console credential
    #[arg(long, env = "CONSOLE_CREDENTIAL", hide_env_values = true)]
    credential: String,

    /// Milliseconds of silence that end a multi-packet reply
    #[arg(long, default_value = "250")]
    idle_timeout_ms: u64,

    /// Command to run, e.g. `list` or `say hello`
    #[arg(required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let command = args.command.join(" ");

    let options = ConsoleOptions {
        idle_timeout: Duration::from_millis(args.idle_timeout_ms),
        ..ConsoleOptions::default()
    };

    info!("Sending console command to {}:{}", args.host, args.port);
    let reply =
        send_command_with(&args.host, args.port, &args.credential, &command, options).await?;
    println!("{}", reply);

    Ok(())
}
