//! Telemetry Receiver CLI Application
//!
//! Starts the receiver with every enabled transport and runs until a fatal
//! error occurs. Decoded samples are written to the log at debug level in
//! place of a dashboard.
//!
//! ```text
//! telemetry-receiver-cli <own_ip> <peer_ip> [port]
//! ```
//!
//! UDP telemetry binds `own_ip:port`, the control channel `own_ip:5001` and
//! FlexRay `own_ip:5002`. Snapshots are sent to `peer_ip:port`.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use telemetry_receiver::config::DEFAULT_DATA_PORT;
use telemetry_receiver::{ReceiverConfig, Runtime, SignalBus, Transport};

mod config;

/// Telemetry Receiver - Ingest speed and RPM over CAN, LIN, UDP and FlexRay
#[derive(Parser, Debug)]
#[command(name = "telemetry-receiver-cli")]
#[command(about = "Receive vehicle telemetry and serve log snapshots to a peer", long_about = None)]
#[command(version)]
struct Args {
    /// Local address for UDP telemetry, control and FlexRay sockets
    #[arg(value_name = "OWN_IP", requires = "peer_ip")]
    own_ip: Option<IpAddr>,

    /// Address of the peer that receives log snapshots
    #[arg(value_name = "PEER_IP")]
    peer_ip: Option<IpAddr>,

    /// UDP telemetry port, also the peer's snapshot port
    #[arg(value_name = "PORT", default_value_t = DEFAULT_DATA_PORT)]
    port: u16,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for the JSON logs
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// SocketCAN interface name
    #[arg(long, value_name = "NAME")]
    can_interface: Option<String>,

    /// PLIN device path
    #[arg(long, value_name = "PATH")]
    lin_device: Option<PathBuf>,

    /// Do not start the CAN listener
    #[arg(long)]
    no_can: bool,

    /// Do not start the LIN listener
    #[arg(long)]
    no_lin: bool,

    /// Do not start the FlexRay listener
    #[arg(long)]
    no_flexray: bool,

    /// Keep existing log contents at startup
    #[arg(long)]
    keep_logs: bool,

    /// Print the resolved configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    log::info!("Telemetry Receiver CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using receiver library v{}", telemetry_receiver::VERSION);

    let config = build_config(&args)?;
    if args.print_config {
        print!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
        return Ok(());
    }

    let bus = Arc::new(SignalBus::new());
    bus.subscribe(|event| {
        log::debug!(
            "[{}] Speed: {:.2} km/h, RPM: {} (decoded {})",
            event.transport,
            event.sample.speed_kmh,
            event.sample.rpm,
            event.sample.received_at.format("%H:%M:%S%.3f")
        );
    });

    let runtime = Runtime::start(config, bus).context("Failed to start receiver")?;

    match runtime.wait() {
        Some(fatal) => {
            runtime.shutdown();
            Err(fatal).context("Receiver stopped")
        }
        None => {
            runtime.shutdown();
            Ok(())
        }
    }
}

/// Layer CLI arguments over the config file (or the defaults)
fn build_config(args: &Args) -> Result<ReceiverConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => ReceiverConfig::new(),
    };

    if let (Some(own_ip), Some(peer_ip)) = (args.own_ip, args.peer_ip) {
        config = config.with_addresses(own_ip, peer_ip, args.port);
    }
    if let Some(dir) = &args.log_dir {
        config = config.with_log_dir(dir);
    }
    if let Some(interface) = &args.can_interface {
        config = config.with_can_interface(interface);
    }
    if let Some(device) = &args.lin_device {
        config = config.with_lin_device(device);
    }
    if args.no_can {
        config = config.with_transport(Transport::Can, false);
    }
    if args.no_lin {
        config = config.with_transport(Transport::Lin, false);
    }
    if args.no_flexray {
        config = config.with_transport(Transport::FlexRay, false);
    }
    if args.keep_logs {
        config.clear_logs_on_start = false;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    // Listener threads interleave, so every line carries a local wall-clock
    // time with milliseconds: [LEVEL 2024-05-01 12:00:00.123 target] message
    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                record.level(),
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.target(),
                record.args()
            )
        })
        .init();
}
