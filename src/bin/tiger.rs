//! CLI entry point for tiger-daq
//!
//! Inspect and drive the devices listed in a configuration file.
//!
//! # Usage
//!
//! ```bash
//! tiger check
//! tiger --config rig.toml list stage
//! tiger get shutter PLogicOutputState
//! tiger set stage "MotorSpeed(mm/s)-X" 1.5
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tiger_core::wire::WireAdapter;
use tiger_daq::config::{SerialConfig, TigerConfig, DEFAULT_CONFIG_PATH};
use tiger_daq::logging::{self, LoggingConfig, OutputFormat};
use tiger_daq::session::{self, Session};
use tracing::info;

#[derive(Parser)]
#[command(name = "tiger")]
#[command(about = "ASI Tiger controller device properties", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration without opening the port
    Check,

    /// List the properties of one device, or of every enabled device
    List {
        /// Device ID
        device: Option<String>,

        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read a property
    Get {
        /// Device ID
        device: String,
        /// Property name
        property: String,
    },

    /// Write a property
    Set {
        /// Device ID
        device: String,
        /// Property name
        property: String,
        /// Value as text (label, number or string)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TigerConfig::load_from(&cli.config)?;
    config.validate()?;
    logging::init(LoggingConfig::from_config(&config)?.with_format(cli.log_format))?;
    tiger_driver_asi::link();

    match cli.command {
        Commands::Check => {
            session::validate_devices(&config)?;
            println!(
                "{}: {} device(s) OK",
                cli.config.display(),
                config.devices.len()
            );
            Ok(())
        }
        Commands::List { device, json } => {
            let wire = open_wire(&config.serial).await?;
            let mut session = match &device {
                Some(id) => Session::open_one(&config, id, wire).await?,
                None => Session::open(&config, wire).await?,
            };
            list(&mut session, json)
        }
        Commands::Get { device, property } => {
            let wire = open_wire(&config.serial).await?;
            let mut session = Session::open_one(&config, &device, wire).await?;
            println!("{}", session.get(&device, &property).await?);
            Ok(())
        }
        Commands::Set {
            device,
            property,
            value,
        } => {
            let wire = open_wire(&config.serial).await?;
            let mut session = Session::open_one(&config, &device, wire).await?;
            session.set(&device, &property, &value).await?;
            info!(device = %device, property = %property, value = %value, "property written");
            Ok(())
        }
    }
}

fn list(session: &mut Session, json: bool) -> Result<()> {
    let ids: Vec<String> = session.ids().map(str::to_string).collect();
    for id in ids {
        let descriptors = session.device(&id)?.descriptors();
        if json {
            println!("{}", serde_json::to_string_pretty(&descriptors)?);
            continue;
        }
        println!("[{}]", id);
        for descriptor in descriptors {
            let access = if descriptor.read_only { "ro" } else { "rw" };
            let labels = descriptor.labels();
            if labels.is_empty() {
                println!("  {:<40} {:<12} {}", descriptor.name, descriptor.kind, access);
            } else {
                println!(
                    "  {:<40} {:<12} {}  [{}]",
                    descriptor.name,
                    descriptor.kind,
                    access,
                    labels.join(" | ")
                );
            }
        }
    }
    Ok(())
}

#[cfg(feature = "serial")]
async fn open_wire(serial: &SerialConfig) -> Result<Arc<dyn WireAdapter>> {
    use anyhow::Context;
    use std::time::Duration;
    use tiger_core::serial::{open_serial_async, wrap_shared, SerialHub};

    let port = open_serial_async(&serial.port, serial.baud_rate, "Tiger")
        .await
        .context("Failed to open controller port")?;
    let hub = SerialHub::with_timeout(
        wrap_shared(Box::new(port)),
        Duration::from_millis(serial.timeout_ms),
    );
    Ok(Arc::new(hub))
}

#[cfg(not(feature = "serial"))]
async fn open_wire(serial: &SerialConfig) -> Result<Arc<dyn WireAdapter>> {
    anyhow::bail!(
        "cannot open {}: built without the `serial` feature",
        serial.port
    )
}
