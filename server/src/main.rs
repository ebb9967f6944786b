use clap::Parser;
use log::{error, info};
use server::config::EngineConfig;
use server::host::{Host, HostMessage, HostSettings};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Simulation steps per second
    #[arg(short, long, default_value = "20")]
    ticks_per_second: u32,

    /// Seconds of synthetic traffic before shutting down
    #[arg(short, long, default_value = "30")]
    duration: u64,

    /// Number of honest clients
    #[arg(long, default_value = "4")]
    honest: usize,

    /// Number of clients sending too many movement updates
    #[arg(long, default_value = "1")]
    flooders: usize,

    /// Updates a flooder sends per tick
    #[arg(long, default_value = "2.0")]
    flood_factor: f64,

    /// Stall the server after every n-th window (0 = never)
    #[arg(long, default_value = "0")]
    stall_every: u64,

    /// Length of a simulated stall in milliseconds
    #[arg(long, default_value = "2000")]
    stall_ms: u64,

    /// Override the idle time after which entities are swept, in seconds
    #[arg(long)]
    sweep_idle: Option<u64>,

    /// Reload the configuration every n seconds
    #[arg(long)]
    reload_every: Option<u64>,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                error!("{}; falling back to defaults", e);
                EngineConfig::default()
            }
        },
        None => EngineConfig::default(),
    };
    if let Some(secs) = args.sweep_idle {
        config.sweep_idle_secs = secs;
    }

    let settings = HostSettings {
        tick_rate: args.ticks_per_second,
        duration: Duration::from_secs(args.duration),
        honest: args.honest,
        flooders: args.flooders,
        flood_factor: args.flood_factor,
        stall_every: args.stall_every,
        stall: Duration::from_millis(args.stall_ms),
        reload_every: args.reload_every.filter(|&secs| secs > 0).map(Duration::from_secs),
        config_path: args.config.clone(),
        ..HostSettings::default()
    };

    let mut host = Host::new(settings, config);

    let shutdown = host.sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown.send(HostMessage::Shutdown);
        }
    });

    let summaries = host.run().await?;

    println!("{:<12} {:<8} {:>8} {:>9} {:>10}", "player", "profile", "moves", "setbacks", "violations");
    for summary in summaries {
        println!(
            "{:<12} {:<8} {:>8} {:>9} {:>10.2}",
            summary.id.as_str(),
            summary.profile,
            summary.moves,
            summary.setbacks,
            summary.violation_level
        );
    }

    Ok(())
}
