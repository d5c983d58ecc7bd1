//! EVKMS device CLI
//!
//! Thin wrapper around evkms-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Show this device's identity and the topics it listens on
//! evkms-device info
//!
//! # Run an in-process subset simulation over a local bus
//! evkms-device simulate --devices 4
//! ```
//!
//! The device identity defaults come from the same environment variables the
//! deployed firmware reads: `DEVICE_GUID` and `SUBSET_IDENTIFIER`.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::RngCore;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use evkms_core::topics;
use evkms_core::transport::{InboundMessage, LocalBus, Publisher};
use evkms_core::types::DeviceGuid;
use evkms_core::{crypto, DeviceSession};

/// EVKMS device - vector-based pairwise key management
#[derive(Parser)]
#[command(name = "evkms-device")]
#[command(version = "0.1.0")]
#[command(about = "EVKMS device - vector-based pairwise key management")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Device GUID in <subset>_device@<n> form
    #[arg(long, env = "DEVICE_GUID", default_value = "subset1_device@1")]
    device_guid: String,

    /// Subset identifier shared with discovery/alert peers
    #[arg(long, env = "SUBSET_IDENTIFIER", default_value = "LR01")]
    subset: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show this device's identity and subscription set
    Info,

    /// Run an in-process subset simulation over a local bus
    Simulate {
        /// Number of devices in the subset
        #[arg(short, long, default_value_t = 3)]
        devices: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Info => info_command(&cli.device_guid, &cli.subset),
        Commands::Simulate { devices } => simulate(&cli.subset, devices),
    }
}

fn info_command(device_guid: &str, subset: &str) -> Result<()> {
    let bus = LocalBus::new();
    let session = DeviceSession::new(DeviceGuid::new(device_guid), subset, bus);

    println!("Device:  {}", session.identity());
    println!("Subset:  {}", session.subset());
    match session.identity().local_position() {
        Some(position) => println!("Position: {} (vector index {})", position, position - 1),
        None => println!("Position: none (GUID has no @<n> marker)"),
    }
    println!("Subscriptions:");
    for filter in session.subscriptions() {
        println!("  {}", filter);
    }
    Ok(())
}

/// One simulated device: a session plus its subscription queue
struct SimDevice {
    session: Arc<DeviceSession>,
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl SimDevice {
    fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.rx.try_recv() {
            self.session.on_message(&msg.topic, &msg.payload);
            handled += 1;
        }
        handled
    }
}

fn pump_until_quiet(devices: &mut [SimDevice]) {
    loop {
        let handled: usize = devices.iter_mut().map(|d| d.pump()).sum();
        if handled == 0 {
            break;
        }
    }
}

/// Drive a whole subset lifecycle in-process: provisioning, discovery,
/// scheduled refresh and a revocation, printing the key table at each step.
fn simulate(subset: &str, device_count: usize) -> Result<()> {
    anyhow::ensure!(device_count >= 2, "simulation needs at least 2 devices");

    let gateway = "gw-sim";
    let bus = LocalBus::new();

    // Current-vector secrets the gateway would have computed for this subset
    let vector: Vec<String> = (0..device_count)
        .map(|_| {
            let mut bytes = [0u8; 16];
            rand::rng().fill_bytes(&mut bytes);
            hex::encode(bytes)
        })
        .collect();

    let mut devices: Vec<SimDevice> = (1..=device_count)
        .map(|position| {
            let guid = DeviceGuid::new(format!("{subset}_device@{position}"));
            let session = Arc::new(DeviceSession::new(guid, subset, bus.clone()));
            let rx = bus.subscribe(session.subscriptions());
            SimDevice { session, rx }
        })
        .collect();

    println!("== Provisioning {device_count} devices ==");
    for (index, device) in devices.iter().enumerate() {
        let payload = serde_json::json!({
            "secret_i": vector[index],
            "Vectore_p": vector,
            "Vectore_c": vector,
            "Vectore_n": vector,
            "alpha": 5,
            "taskId": format!("sim-provision-{}", index + 1),
        });
        bus.publish(
            &format!("iot_network/{gateway}/devices/{}/config", device.session.identity()),
            serde_json::to_vec(&payload)?,
        );
    }
    pump_until_quiet(&mut devices);

    println!("== Discovery rounds ==");
    for index in 0..devices.len() {
        if let Err(e) = devices[index].session.broadcast_discovery() {
            info!(error = %e, "Broadcast skipped");
        }
        pump_until_quiet(&mut devices);
    }
    print_key_table(&devices);

    println!("== Scheduled key refresh ==");
    let refresh = serde_json::json!({
        "type": "SCHEDULED_KEY_REFRESH",
        "refreshNonce": crypto::generate_nonce(),
        "issuer": gateway,
        "taskId": "sim-refresh",
    });
    bus.publish(&topics::alert_topic(subset), serde_json::to_vec(&refresh)?);
    pump_until_quiet(&mut devices);
    print_key_table(&devices);

    let revoked = devices[device_count - 1].session.identity().clone();
    println!("== Revoking {revoked} ==");
    let alert = serde_json::json!({
        "type": "REVOCATION_ALERT",
        "revokedGuid": revoked.as_str(),
        "issuer": gateway,
    });
    bus.publish(&topics::alert_topic(subset), serde_json::to_vec(&alert)?);
    pump_until_quiet(&mut devices);
    print_key_table(&devices);

    Ok(())
}

fn print_key_table(devices: &[SimDevice]) {
    for device in devices {
        let session = &device.session;
        let revoked = if session.is_self_revoked() {
            " [REVOKED]"
        } else {
            ""
        };
        println!("{}{}", session.identity(), revoked);

        let mut peers = session.pairwise_peers();
        peers.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        for peer in peers {
            if let Some(record) = session.pairwise_key(&peer) {
                println!(
                    "  {:<24} {:?}  fingerprint {}",
                    peer.as_str(),
                    record.state,
                    &crypto::key_fingerprint(&record.key)[..16],
                );
            }
        }
    }
}
