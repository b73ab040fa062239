//! vitals-serial: reads the sensor controller over USB serial and relays every
//! telemetry frame to the gateway's `/sensor-data` endpoint.
//!
//! Runs until Ctrl+C. The only fatal error is failing to open the port.

use anyhow::Context;
use clap::Parser;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitals_core::{
    available_ports, IngestError, IngestLoop, RelayClient, SerialByteSource, StopSignal, DEFAULT_BAUD_RATE,
    DEFAULT_RELAY_URL,
};

#[derive(Parser, Debug)]
#[command(name = "vitals-serial")]
#[command(about = "Sensor controller serial reader and HTTP relay", long_about = None)]
struct Args {
    /// Serial port (e.g. COM3, /dev/ttyUSB0)
    #[arg(long, required_unless_present = "list_ports")]
    port: Option<String>,

    /// Ingress endpoint that receives each frame as JSON
    #[arg(long, env = "VITALS_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    url: String,

    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Bound on each relay call (milliseconds)
    #[arg(long, default_value = "5000")]
    relay_timeout_ms: u64,

    /// Bound on each serial read, and so on how fast Ctrl+C is noticed (milliseconds)
    #[arg(long, default_value = "500")]
    read_timeout_ms: u64,

    /// Print the serial ports the OS knows about and exit
    #[arg(long)]
    list_ports: bool,
}

fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[vitals-serial] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.list_ports {
        return list_ports();
    }
    let port = args.port.context("--port is required")?;

    tracing::info!(
        port = %port,
        baud_rate = args.baud,
        url = %args.url,
        "vitals serial reader starting"
    );

    let relay = RelayClient::new(args.url.clone(), Duration::from_millis(args.relay_timeout_ms))
        .context("building relay client")?;

    let source = match SerialByteSource::open(&port, args.baud, Duration::from_millis(args.read_timeout_ms)) {
        Ok(source) => source,
        Err(e @ IngestError::Open { .. }) => {
            eprintln!("✗ {e}");
            eprintln!();
            eprintln!("Troubleshooting:");
            eprintln!("1. Check that the sensor controller is connected via USB");
            eprintln!("2. Verify the port name (Device Manager on Windows, `ls /dev/tty*` elsewhere)");
            eprintln!("3. Make sure no other program is using the serial port");
            eprintln!("4. Run with --list-ports to see the ports this machine offers");
            process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let stop = StopSignal::new();
    let on_interrupt = stop.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nStopping serial reader...");
        on_interrupt.stop();
    })
    .context("installing Ctrl+C handler")?;

    let relay = Arc::new(relay);
    let summary = IngestLoop::new(source, Arc::clone(&relay), stop).run();
    let counts = relay.counts();
    tracing::info!(
        frames = summary.frames,
        acked = counts.acked,
        unreachable = counts.unreachable,
        rejected = counts.rejected,
        "relay totals"
    );
    Ok(())
}

fn list_ports() -> anyhow::Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for p in ports {
        println!("{}\t{}\t{}", p.device, p.description, p.hwid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_required_unless_listing() {
        assert!(Args::try_parse_from(["vitals-serial"]).is_err());
        let args = Args::try_parse_from(["vitals-serial", "--list-ports"]).unwrap();
        assert!(args.list_ports);
    }

    #[test]
    fn defaults_match_controller_firmware() {
        let args = Args::try_parse_from(["vitals-serial", "--port", "/dev/ttyUSB0"]).unwrap();
        assert_eq!(args.baud, 115_200);
        assert_eq!(args.relay_timeout_ms, 5000);
        assert_eq!(args.port.as_deref(), Some("/dev/ttyUSB0"));
    }
}
