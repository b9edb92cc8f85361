//! One-shot Modbus device client.
//!
//! Loads a device definition, opens the device, performs a single read or
//! write and prints the result as one JSON line.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use devicelink_common::LoggingConfig;
use devicelink_modbus::config::DeviceServiceConfig;
use devicelink_modbus::{CommandInfo, ModbusClient, PrimaryTable};
use std::path::PathBuf;
use tracing::info;

/// Read or write registers and coils on a Modbus (TCP/RTU/ASCII) device.
#[derive(Parser, Debug)]
#[command(name = "devicelink-modbus")]
#[command(about = "Reads or writes one register range on a Modbus device")]
#[command(version)]
struct Args {
    /// Path to device configuration file (JSON5 format)
    #[arg(short, long, default_value = "modbus.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Read a range and print the raw response bytes
    Read {
        #[command(flatten)]
        range: Range,
    },
    /// Write a range from hex-encoded bytes
    Write {
        #[command(flatten)]
        range: Range,

        /// Value bytes as hex, e.g. "00ff" or "0x00ff"
        #[arg(long)]
        value: String,
    },
}

#[derive(clap::Args, Debug)]
struct Range {
    /// DISCRETES_INPUT, COILS, INPUT_REGISTERS, HOLDING_REGISTERS (or discrete, coil, input, holding)
    #[arg(short, long)]
    table: PrimaryTable,

    /// Starting address (0-based)
    #[arg(short, long)]
    address: u16,

    /// Number of registers or bits
    #[arg(short = 'n', long, default_value_t = 1)]
    count: u16,
}

impl Range {
    fn command(&self) -> CommandInfo {
        CommandInfo::new(self.table, self.address, self.count)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = DeviceServiceConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    devicelink_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Loaded configuration from {:?}", args.config);

    let device = &config.device;
    let connection = device
        .connection_info()
        .with_context(|| format!("Device '{}' has no usable connection", device.name))?;
    info!("Device '{}' at {}", device.name, connection);

    let mut client = ModbusClient::with_options(&connection, device.transport_options())
        .with_context(|| format!("Failed to prepare {}", connection))?;
    client
        .open_connection()
        .await
        .with_context(|| format!("Failed to open {}", connection))?;

    let outcome = run(&mut client, &args.action).await;

    // Close even when the request failed; the request error wins.
    let closed = client.close_connection().await;
    let (command, bytes) = outcome?;
    closed.context("Failed to close connection")?;

    let result = serde_json::json!({
        "device": device.name,
        "operation": match args.action {
            Action::Read { .. } => "read",
            Action::Write { .. } => "write",
        },
        "table": command.primary_table,
        "address": command.starting_address,
        "count": command.length,
        "value": hex::encode(&bytes),
        "timestamp": chrono::Utc::now().timestamp_millis(),
    });
    println!("{}", result);

    Ok(())
}

async fn run(client: &mut ModbusClient, action: &Action) -> Result<(CommandInfo, Vec<u8>)> {
    match action {
        Action::Read { range } => {
            let command = range.command();
            let bytes = client
                .get_value(&command)
                .await
                .with_context(|| format!("Read {} failed", command))?;
            Ok((command, bytes))
        }
        Action::Write { range, value } => {
            let command = range.command();
            let bytes = decode_hex(value)?;
            client
                .set_value(&command, &bytes)
                .await
                .with_context(|| format!("Write {} failed", command))?;
            Ok((command, bytes))
        }
    }
}

fn decode_hex(input: &str) -> Result<Vec<u8>> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);

    if digits.is_empty() {
        bail!("hex value is empty");
    }
    hex::decode(digits).with_context(|| format!("invalid hex value {:?}", input))
}
