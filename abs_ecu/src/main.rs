//! # ABS ECU Daemon Binary
//!
//! Distance-triggered braking control: ultrasonic telemetry in over CAN,
//! proportional braking out over sysfs PWM, commanded state reported
//! back onto the bus.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (can0, pwmchip0/pwm0, 1 ms period, 300 mm / 50 mm)
//! abs_ecu
//!
//! # Explicit hardware and thresholds
//! abs_ecu --can can1 --pwmchip 1 --pwm 0 --period 2000000 \
//!         --threshold 400 --min-distance 80
//!
//! # TOML configuration with flag overrides, verbose logging
//! abs_ecu --config /etc/abs/ecu.toml --verbose
//! ```
//!
//! Requires access to `/sys/class/pwm` and a CAN interface.

#![deny(warnings)]

use abs_common::config::{ConfigError, EcuConfig};
use abs_ecu::can::SocketCan;
use abs_ecu::core::EcuCore;
use abs_ecu::pwm::{PwmSession, SysfsPwm};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// ABS ECU - distance-triggered braking control daemon
#[derive(Parser, Debug)]
#[command(name = "abs_ecu")]
#[command(version)]
#[command(about = "Distance-triggered braking control daemon (CAN in, sysfs PWM out)")]
#[command(long_about = None)]
struct Args {
    /// Path to TOML configuration file. Flags override file values.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// CAN interface to listen on
    #[arg(long, value_name = "IFNAME")]
    can: Option<String>,

    /// Sysfs PWM chip number
    #[arg(long, value_name = "N")]
    pwmchip: Option<u32>,

    /// PWM channel on the chip
    #[arg(long, value_name = "M")]
    pwm: Option<u32>,

    /// PWM period in nanoseconds
    #[arg(long, value_name = "NS")]
    period: Option<u64>,

    /// Braking threshold distance in millimetres
    #[arg(long, value_name = "MM")]
    threshold: Option<u16>,

    /// Full-braking distance in millimetres
    #[arg(long = "min-distance", value_name = "MM")]
    min_distance: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("ECU startup failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    setup_tracing(&args);

    info!("ABS ECU v{} starting...", env!("CARGO_PKG_VERSION"));

    // Resolve and validate the configuration before any hardware is
    // touched.
    let config = resolve_config(&args)?;
    info!(
        "config: can={} pwmchip={} pwm={} period={}ns threshold={}mm min-distance={}mm",
        config.can_interface,
        config.pwm_chip,
        config.pwm_channel,
        config.period_ns,
        config.threshold_mm,
        config.min_distance_mm
    );

    // Transport first: a bind failure leaves no actuator state to
    // unwind.
    let transport = SocketCan::open(&config.can_interface)?;
    info!("listening on CAN interface {}", transport.interface());

    let session = PwmSession::new(SysfsPwm::new(config.pwm_chip, config.pwm_channel));
    let mut core = EcuCore::new(config, transport, session);

    // Setup signal handler.
    let running = core.running_flag();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    // Actuator up, then the loop; teardown runs whichever way we leave.
    let result = core.init().and_then(|()| core.run());
    core.shutdown();
    result?;

    info!("ABS ECU shutdown complete");
    Ok(())
}

/// Merge config file (if any), CLI overrides and defaults, then
/// validate.
fn resolve_config(args: &Args) -> Result<EcuConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => {
            info!("loading configuration from {:?}", path);
            EcuConfig::load(path)?
        }
        None => EcuConfig::default(),
    };

    if let Some(can) = &args.can {
        config.can_interface = can.clone();
    }
    if let Some(chip) = args.pwmchip {
        config.pwm_chip = chip;
    }
    if let Some(channel) = args.pwm {
        config.pwm_channel = channel;
    }
    if let Some(period) = args.period {
        config.period_ns = period;
    }
    if let Some(threshold) = args.threshold {
        config.threshold_mm = threshold;
    }
    if let Some(min_distance) = args.min_distance {
        config.min_distance_mm = min_distance;
    }
    config.verbose = config.verbose || args.verbose;

    config.validate()?;
    Ok(config)
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
