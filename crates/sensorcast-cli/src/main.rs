//! CLI for sensorcast: collect measurements and deliver them, caching what
//! cannot be sent.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sensorcast")]
#[command(about = "sensorcast: store-and-forward sensor telemetry")]
#[command(version = sensorcast_core::VERSION)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "sensorcast.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read every sensor, publish, and replay cached records, in a loop
    Run {
        /// Run a single round and exit
        #[arg(long)]
        once: bool,

        /// Time between rounds (e.g. "30s", "5m"); overrides collector.interval_secs
        #[arg(long)]
        interval: Option<String>,
    },

    /// Replay cached records now
    Drain {
        /// Only drain this device key (default: every device with cache files)
        #[arg(long)]
        device: Option<String>,
    },

    /// Show what is waiting in the cache
    Status,

    /// Read one configured sensor and print the measurement as JSON
    Read {
        /// Sensor name from the configuration
        #[arg(long)]
        sensor: String,
    },

    /// Print a system statistics measurement for this host as JSON
    System,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { once, interval } => {
            commands::run::run(&cli.config, once, interval.as_deref());
        }
        Commands::Drain { device } => commands::drain::run(&cli.config, device.as_deref()),
        Commands::Status => commands::status::run(&cli.config),
        Commands::Read { sensor } => commands::read::run(&cli.config, &sensor),
        Commands::System => commands::read::run_system(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "sensorcast",
            "run",
            "--once",
            "--interval",
            "30s",
            "--config",
            "/etc/sensorcast.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/sensorcast.toml"));
        match cli.command {
            Commands::Run { once, interval } => {
                assert!(once);
                assert_eq!(interval.as_deref(), Some("30s"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_default_config_path() {
        let cli = Cli::try_parse_from(["sensorcast", "status"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("sensorcast.toml"));
    }

    #[test]
    fn test_cli_read_requires_sensor() {
        assert!(Cli::try_parse_from(["sensorcast", "read"]).is_err());
        let cli = Cli::try_parse_from(["sensorcast", "read", "--sensor", "porch"]).unwrap();
        assert!(matches!(cli.command, Commands::Read { sensor } if sensor == "porch"));
    }
}
