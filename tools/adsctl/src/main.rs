//! adsctl - console for the ads-rx client
//!
//! Loads connection settings, connects to a simulated controller seeded with
//! the configured symbols and prints the data, error, acknowledgement and
//! state streams. Reads, writes and pauses are issued from stdin.

mod commands;
mod output;

use ads_rx::sim::SimController;
use ads_rx::{AdsRxClient, AdsState, ClientOptions, Settings, SymbolDescriptor};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use common::LogConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

use crate::commands::Command;
use crate::output::{spawn_printers, Printer};

#[derive(Parser)]
#[command(name = "adsctl")]
#[command(about = "Watch and write PLC variables through the ads-rx client")]
#[command(version)]
struct Cli {
    /// Settings file (YAML, TOML or JSON); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Client options file (health interval, retry policy, watched services)
    #[arg(long)]
    options: Option<PathBuf>,

    /// AMS net id, overrides the settings file
    #[arg(short, long)]
    address: Option<String>,

    /// AMS port, overrides the settings file
    #[arg(short, long)]
    port: Option<u16>,

    /// Symbol table of the simulated controller
    #[arg(long)]
    symbols: Option<PathBuf>,

    /// Extra simulated symbol as NAME=TYPE, e.g. .Tag1=DINT
    #[arg(short = 's', long = "symbol")]
    symbol: Vec<String>,

    /// Start the simulated controller in Stop
    #[arg(long)]
    stopped: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info", env = "ADSCTL_LOG_LEVEL")]
    log_level: String,

    /// Directory for a daily log file
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SymbolFile {
    #[serde(default)]
    symbols: Vec<SymbolDescriptor>,
}

fn parse_symbol(arg: &str) -> Result<SymbolDescriptor> {
    let (name, type_name) = arg
        .split_once('=')
        .with_context(|| format!("symbol '{}' must look like NAME=TYPE", arg))?;
    let name = name.trim().trim_start_matches('.');
    if name.is_empty() {
        return Err(anyhow!("symbol '{}' has no name", arg));
    }
    Ok(SymbolDescriptor::primitive(name, type_name.trim()))
}

/// Simulated controller holding every configured variable
fn seed_controller(cli: &Cli, settings: &Settings) -> Result<SimController> {
    let controller = SimController::new();
    let mut declared = HashSet::new();

    if let Some(path) = &cli.symbols {
        let file: SymbolFile = common::load_config_from_file(path)
            .with_context(|| format!("loading symbols from {}", path.display()))?;
        for symbol in file.symbols {
            declared.insert(symbol.name.to_uppercase());
            controller.add_symbol(symbol);
        }
    }
    for arg in &cli.symbol {
        let symbol = parse_symbol(arg)?;
        declared.insert(symbol.name.to_uppercase());
        controller.add_symbol(symbol);
    }

    let configured = settings
        .notifications
        .iter()
        .map(|n| &n.variable)
        .chain(settings.write_variables.iter().map(|w| &w.variable));
    for variable in configured {
        let name = variable.trim().trim_start_matches('.');
        let root = name.split('.').next().unwrap_or(name);
        if declared.insert(root.to_uppercase()) {
            warn!("No symbol declared for {}, simulating it as DINT", variable);
            controller.add_symbol(SymbolDescriptor::primitive(root, "DINT"));
        }
    }

    if cli.stopped {
        controller.set_ads_state(AdsState::Stop);
    }
    Ok(controller)
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(Some(path.as_path()))
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::defaults(),
    };
    if let Some(address) = &cli.address {
        settings.ads_address = address.clone();
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    common::init_with_config(LogConfig {
        service_name: "adsctl".to_string(),
        log_dir: cli.log_dir.clone(),
        level: cli.log_level.parse().unwrap_or(Level::INFO),
        enable_json: cli.json,
    })
    .map_err(|e| anyhow!("failed to initialize logging: {}", e))?;

    let settings = load_settings(&cli)?;
    let options: ClientOptions = match &cli.options {
        Some(path) => common::load_config_from_file(path)
            .with_context(|| format!("loading client options from {}", path.display()))?,
        None => ClientOptions::default(),
    };
    let controller = seed_controller(&cli, &settings)?;

    let client = AdsRxClient::builder(controller.transport_factory())
        .service_monitor(controller.service_monitor())
        .options(options)
        .build();

    let shutdown = common::shutdown_token();
    let mut printers = spawn_printers(&client, Printer { json: cli.json }, &shutdown);

    info!("Connecting to {}", settings.endpoint());
    client.connect(settings).await;
    if !cli.json {
        println!("{}", commands::HELP);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line.context("reading stdin")?,
        };
        let Some(line) = line else {
            // stdin closed, keep streaming until a shutdown signal
            shutdown.cancelled().await;
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(command) => match commands::execute(&client, command) {
                Ok(true) => {},
                Ok(false) => break,
                Err(e) => eprintln!("! {:#}", e),
            },
            Err(e) => eprintln!("! {:#}", e),
        }
    }

    shutdown.cancel();
    client.dispose().await;
    while printers.join_next().await.is_some() {}
    info!("adsctl stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbol() {
        let symbol = parse_symbol(".Tag1=DINT").unwrap();
        assert_eq!(symbol.name, "Tag1");
        assert_eq!(symbol.type_name, "DINT");
        assert_eq!(symbol.size, 4);

        assert!(parse_symbol(".Tag1").is_err());
        assert!(parse_symbol("=BOOL").is_err());
    }

    #[test]
    fn test_configured_variables_are_simulated() {
        let cli = Cli::parse_from(["adsctl", "--symbol", "Speed=REAL"]);
        let settings = Settings {
            notifications: vec![ads_rx::Notification::new(100, ".Speed"), ads_rx::Notification::new(100, ".Counter")],
            ..Settings::default()
        };
        let controller = seed_controller(&cli, &settings).unwrap();
        assert_eq!(controller.value(".Speed"), Some(ads_rx::PlcValue::Real(0.0)));
        assert_eq!(controller.value(".Counter"), Some(ads_rx::PlcValue::DInt(0)));
    }
}
