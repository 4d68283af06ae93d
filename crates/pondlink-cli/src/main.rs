//! # pondlink
//!
//! Command-line caller for the PondLink BLE provisioning core.
//!
//! ```bash
//! # Find nearby boards
//! pondlink scan --duration 10
//!
//! # Send Wi-Fi credentials to a board
//! pondlink provision --device F4:65:0B:4A:8A:C6 --ssid HomeNet --password secret123
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pondlink_ble::{
    addr, BleCentral, DiscoveredDevice, ProvisioningConfig, WifiCredentials, WriteMode,
};
use tracing::info;
use uuid::Uuid;

mod logging;

#[derive(Parser)]
#[command(name = "pondlink")]
#[command(about = "BLE Wi-Fi provisioning tool for PondLink boards", version)]
struct Cli {
    /// Additionally write JSON logs to the platform log directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby boards
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value_t = pondlink_ble::DEFAULT_SCAN_DURATION.as_secs())]
        duration: u64,
        /// Restrict the scan to boards advertising this service UUID
        #[arg(short, long)]
        service: Option<Uuid>,
        /// Print the scan report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send Wi-Fi credentials to a board
    Provision {
        /// Board address (with or without colons)
        #[arg(short, long)]
        device: String,
        /// Wi-Fi network name
        #[arg(long)]
        ssid: Option<String>,
        /// Wi-Fi password
        #[arg(long)]
        password: Option<String>,
        /// Credentials file (SSID on line 1, password on line 2)
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Provisioning config TOML (GATT UUIDs, chunking, timeouts)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Read a characteristic on a board
    Read {
        /// Board address (with or without colons)
        #[arg(short, long)]
        device: String,
        /// GATT service UUID
        #[arg(short, long)]
        service: Uuid,
        /// GATT characteristic UUID
        #[arg(short = 'u', long)]
        characteristic: Uuid,
    },
    /// Write a raw value to a characteristic on a board
    Write {
        /// Board address (with or without colons)
        #[arg(short, long)]
        device: String,
        /// GATT service UUID
        #[arg(short, long)]
        service: Uuid,
        /// GATT characteristic UUID
        #[arg(short = 'u', long)]
        characteristic: Uuid,
        /// UTF-8 value to write
        value: String,
        /// Use an unacknowledged (fire-and-forget) write
        #[arg(long)]
        unacknowledged: bool,
    },
    /// Stream notifications from a characteristic
    Monitor {
        /// Board address (with or without colons)
        #[arg(short, long)]
        device: String,
        /// GATT service UUID
        #[arg(short, long)]
        service: Uuid,
        /// GATT characteristic UUID
        #[arg(short = 'u', long)]
        characteristic: Uuid,
        /// How long to monitor, in seconds
        #[arg(long, default_value = "30")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_file)?;

    let central = BleCentral::native()
        .await
        .context("could not initialise the Bluetooth stack")?;

    let result = run(&central, cli.command).await;
    central.shutdown().await.ok();
    result
}

async fn run(central: &BleCentral, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Scan {
            duration,
            service,
            json,
        } => scan(central, duration, service, json).await,
        Commands::Provision {
            device,
            ssid,
            password,
            file,
            config,
        } => provision(central, &device, ssid, password, file, config).await,
        Commands::Read {
            device,
            service,
            characteristic,
        } => read(central, &device, service, characteristic).await,
        Commands::Write {
            device,
            service,
            characteristic,
            value,
            unacknowledged,
        } => {
            let mode = if unacknowledged {
                WriteMode::Unacknowledged
            } else {
                WriteMode::Acknowledged
            };
            connect(central, &device, service).await?;
            central
                .write(&device, service, characteristic, value.as_bytes(), mode)
                .await?;
            println!("Wrote {} bytes to {characteristic}", value.len());
            Ok(())
        }
        Commands::Monitor {
            device,
            service,
            characteristic,
            duration,
        } => monitor(central, &device, service, characteristic, duration).await,
    }
}

#[derive(serde::Serialize)]
struct ScanReport {
    devices: Vec<DiscoveredDevice>,
    scan_duration_secs: u64,
    scanned_at_utc: String,
}

async fn scan(
    central: &BleCentral,
    duration: u64,
    service: Option<Uuid>,
    json: bool,
) -> anyhow::Result<()> {
    info!(duration, "scanning for boards");
    central
        .start_scan(service.map(|uuid| vec![uuid]), Duration::from_secs(duration))
        .await?;

    // The scan stops itself at the deadline; wait it out plus a grace tick.
    tokio::time::sleep(Duration::from_secs(duration) + Duration::from_millis(200)).await;
    if let Some(error) = central.take_last_scan_error() {
        return Err(error.into());
    }

    let devices = central.devices();
    if json {
        let report = ScanReport {
            devices,
            scan_duration_secs: duration,
            scanned_at_utc: chrono::Utc::now().to_rfc3339(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Found {} device(s):", devices.len());
    for device in devices {
        let name = device.name.as_deref().unwrap_or("Unknown");
        let rssi = device
            .rssi
            .map_or_else(|| "N/A".to_string(), |rssi| format!("{rssi} dBm"));
        println!("  {name} ({}) RSSI: {rssi}", device.id);
    }
    Ok(())
}

async fn provision(
    central: &BleCentral,
    device: &str,
    ssid: Option<String>,
    password: Option<String>,
    file: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    if !addr::is_valid_address(device) {
        bail!("'{device}' does not look like a board address");
    }

    let (ssid, password) = match (ssid, password, file) {
        (Some(ssid), Some(password), _) => (ssid, password),
        (None, None, Some(path)) => read_credentials_file(&path)?,
        _ => bail!("provide either --ssid and --password, or --file"),
    };

    let config = load_config(config_path)?;
    let credentials = WifiCredentials::new(ssid, password);

    println!("Provisioning {} ...", addr::format_address(device));
    central.provision_wifi(device, &credentials, &config).await?;

    if config.notify_characteristic_uuid.is_some() {
        println!("Board acknowledged the new Wi-Fi credentials.");
    } else {
        println!("Credentials sent. The board will join the network shortly.");
    }
    Ok(())
}

async fn read(
    central: &BleCentral,
    device: &str,
    service: Uuid,
    characteristic: Uuid,
) -> anyhow::Result<()> {
    connect(central, device, service).await?;
    let value = central.read(device, service, characteristic).await?;
    println!("{}", render_value(&value));
    Ok(())
}

async fn monitor(
    central: &BleCentral,
    device: &str,
    service: Uuid,
    characteristic: Uuid,
    duration: u64,
) -> anyhow::Result<()> {
    connect(central, device, service).await?;
    let mut stream = central.monitor(device, service, characteristic).await?;

    let deadline = tokio::time::sleep(Duration::from_secs(duration));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            frame = stream.recv() => match frame {
                Some(value) => println!("{}", render_value(&value)),
                None => break,
            }
        }
    }
    Ok(())
}

async fn connect(central: &BleCentral, device: &str, service: Uuid) -> anyhow::Result<()> {
    if !addr::is_valid_address(device) {
        bail!("'{device}' does not look like a board address");
    }
    let config = ProvisioningConfig {
        service_uuid: service,
        ..Default::default()
    };
    central.connect(device, &config).await?;
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ProvisioningConfig> {
    match path {
        Some(path) => ProvisioningConfig::load(&path)
            .with_context(|| format!("could not load config from {}", path.display())),
        None => {
            let default_path = ProvisioningConfig::default_path()?;
            if default_path.exists() {
                Ok(ProvisioningConfig::load(&default_path)?)
            } else {
                Ok(ProvisioningConfig::default())
            }
        }
    }
}

/// SSID on line 1, password on line 2.
fn read_credentials_file(path: &Path) -> anyhow::Result<(String, String)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    let mut lines = content.lines();
    let ssid = lines
        .next()
        .context("missing SSID on line 1")?
        .trim()
        .to_string();
    let password = lines
        .next()
        .context("missing password on line 2")?
        .trim()
        .to_string();
    Ok((ssid, password))
}

fn render_value(value: &[u8]) -> String {
    match std::str::from_utf8(value) {
        Ok(text) => text.to_string(),
        Err(_) => value.iter().map(|byte| format!("{byte:02x}")).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wifi.txt");
        std::fs::write(&path, "HomeNet\nsecret123\n").unwrap();

        let (ssid, password) = read_credentials_file(&path).unwrap();
        assert_eq!(ssid, "HomeNet");
        assert_eq!(password, "secret123");
    }

    #[test]
    fn test_read_credentials_file_missing_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wifi.txt");
        std::fs::write(&path, "HomeNet\n").unwrap();

        assert!(read_credentials_file(&path).is_err());
    }

    #[test]
    fn test_render_value_prefers_utf8() {
        assert_eq!(render_value(b"OK connected"), "OK connected");
        assert_eq!(render_value(&[0xde, 0xad]), "dead");
    }

    #[test]
    fn test_cli_parses_scan_and_provision() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::parse_from([
            "pondlink",
            "provision",
            "--device",
            "F4:65:0B:4A:8A:C6",
            "--ssid",
            "HomeNet",
            "--password",
            "secret123",
        ]);
        assert!(matches!(cli.command, Commands::Provision { .. }));
    }
}
