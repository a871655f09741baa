use chrono::FixedOffset;
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use std::fmt::Display;
use tokio::time::Duration;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::EnvFilter;
use wittypi::*;

type Board = WittyPi<LinuxI2c, FixedOffset>;

/// Format used for clock and schedule times in reports
const TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// I2C bus number (/dev/i2c-N)
    #[arg(long, default_value_t = 1)]
    bus: u8,
    /// Address of the RTC chip
    #[arg(long, default_value = "0x68", value_parser = parse_address)]
    rtc_address: u16,
    /// Address of the power-management microcontroller
    #[arg(long, default_value = "0x69", value_parser = parse_address)]
    mc_address: u16,
    /// Local UTC offset such as +02:00 (defaults to the host's)
    #[arg(long, allow_hyphen_values = true)]
    utc_offset: Option<FixedOffset>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connectivity, clock, schedules and power readings
    Status,
    /// Print the status report periodically until Ctrl-C
    Watch {
        /// Seconds between reports
        #[arg(short, long, default_value_t = 60)]
        interval: u64,
    },
    /// Show the next scheduled startup
    Startup,
    /// Show the next scheduled shutdown
    Shutdown,
    /// Schedule the startup
    SetStartup {
        /// "<day> <hour>:<minute>", ?? for any day or hour (e.g. "?? 07:30")
        schedule: String,
    },
    /// Schedule the shutdown
    SetShutdown {
        /// "<day> <hour>:<minute>", ?? for any day or hour (e.g. "?? 22:00")
        schedule: String,
    },
    /// Remove the startup schedule
    ClearStartup,
    /// Remove the shutdown schedule
    ClearShutdown,
    /// Show or set the low-voltage threshold
    LowVoltage {
        /// Threshold in volts (5.1-25.3, anything else disables it)
        #[arg(short, long)]
        volts: Option<f32>,
    },
    /// Show or set the recovery-voltage threshold
    RecoveryVoltage {
        /// Threshold in volts (5.1-25.3, anything else disables it)
        #[arg(short, long)]
        volts: Option<f32>,
    },
    /// Show or set the delay between shutdown and power cut
    PowerCutDelay {
        /// Delay in seconds
        #[arg(short, long)]
        seconds: Option<f32>,
    },
    /// Show the RTC temperature
    Temperature,
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("wittypi=info")),
        )
        .compact()
        .init();

    // Initialize color-eyre for pretty error reporting
    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    let config = BoardConfig {
        i2c_bus: cli.bus,
        rtc_address: cli.rtc_address,
        mc_address: cli.mc_address,
    };
    let board = match cli.utc_offset {
        Some(offset) => WittyPi::new(LinuxI2c::new(config.i2c_bus), config, offset),
        None => WittyPi::from_config(config),
    };

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => print_status(&board),
        Commands::Watch { interval } => watch(&board, interval).await?,
        Commands::Startup => {
            println!("Next startup: {}", describe_schedule(board.startup_time()));
        }
        Commands::Shutdown => {
            println!("Next shutdown: {}", describe_schedule(board.shutdown_time()));
        }
        Commands::SetStartup { schedule } => {
            board.set_startup_time(&schedule)?;
            println!("Next startup: {}", describe_schedule(board.startup_time()));
        }
        Commands::SetShutdown { schedule } => {
            board.set_shutdown_time(&schedule)?;
            println!("Next shutdown: {}", describe_schedule(board.shutdown_time()));
        }
        Commands::ClearStartup => board.clear_startup_time()?,
        Commands::ClearShutdown => board.clear_shutdown_time()?,
        Commands::LowVoltage { volts } => {
            let threshold = match volts {
                Some(v) => board.set_low_voltage_threshold(v)?,
                None => board.low_voltage_threshold()?,
            };
            println!("Low voltage threshold: {}", threshold);
        }
        Commands::RecoveryVoltage { volts } => {
            let threshold = match volts {
                Some(v) => board.set_recovery_voltage_threshold(v)?,
                None => board.recovery_voltage_threshold()?,
            };
            println!("Recovery voltage threshold: {}", threshold);
        }
        Commands::PowerCutDelay { seconds } => {
            if let Some(s) = seconds {
                board.set_power_cut_delay(s)?;
            }
            println!("Power cut delay: {}s", board.power_cut_delay()?);
        }
        Commands::Temperature => {
            println!("Temperature: {:.2}°C", board.temperature()?);
        }
    }

    Ok(())
}

/// Parse an I2C address given in decimal or 0x-prefixed hex
fn parse_address(text: &str) -> std::result::Result<u16, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid I2C address '{}': {}", text, e))
}

/// Render a reading, or "unknown" when it could not be read
fn show<T, D: Display>(reading: wittypi::Result<T>, render: impl FnOnce(T) -> D) -> String {
    match reading {
        Ok(value) => render(value).to_string(),
        Err(e) => {
            warn!("Read failed: {}", e);
            "unknown".to_string()
        }
    }
}

fn describe_schedule(next: wittypi::Result<Option<ScheduleOccurrence<FixedOffset>>>) -> String {
    show(next, |next| match next {
        Some(o) => format!("{} ({})", o.local.format(TIME_FORMAT), o.display),
        None => "Never".to_string(),
    })
}

/// Print the full status report, one line per reading
#[instrument(skip(board))]
fn print_status(board: &Board) {
    println!("WittyPi is connected: {}", show(board.is_mc_connected(), |c| c));
    println!("WittyPi RTC is connected: {}", show(board.is_rtc_connected(), |c| c));
    println!("Firmware version: {}", show(board.firmware_version(), |v| v));
    let (time, timestamp) = match board.rtc_timestamp() {
        Ok(t) => (t.local.format(TIME_FORMAT).to_string(), t.unix.to_string()),
        Err(e) => {
            warn!("Read failed: {}", e);
            ("unknown".to_string(), "unknown".to_string())
        }
    };
    println!("WittyPi RTC time: {}", time);
    println!("WittyPi timestamp: {}", timestamp);
    println!("Next startup: {}", describe_schedule(board.startup_time()));
    println!("Next shutdown: {}", describe_schedule(board.shutdown_time()));
    println!();
    println!("Power mode: {}", show(board.power_mode(), |m| m));
    println!(
        "Input voltage: {}",
        show(board.input_voltage(), |v| format!("{:.2}V", v))
    );
    println!(
        "Output voltage: {}",
        show(board.output_voltage(), |v| format!("{:.2}V", v))
    );
    println!(
        "Output current: {}",
        show(board.output_current(), |a| format!("{:.2}A", a))
    );
    println!(
        "Temperature: {}",
        show(board.temperature(), |t| format!("{:.2}°C", t))
    );
    println!();
    println!(
        "Low voltage threshold: {}",
        show(board.low_voltage_threshold(), |t| t)
    );
    println!(
        "Recovery voltage threshold: {}",
        show(board.recovery_voltage_threshold(), |t| t)
    );
    println!("Dummy load duration: {}", show(board.dummy_load_duration(), |d| d));
    println!(
        "Power cut delay after shutdown: {}",
        show(board.power_cut_delay(), |d| format!("{}s", d))
    );
}

/// Reprint the status report every `interval` seconds until Ctrl-C
#[instrument(skip(board))]
async fn watch(board: &Board, interval: u64) -> Result<()> {
    info!("Reporting every {}s, press Ctrl-C to stop", interval);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                print_status(board);
                println!();
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Stopping status reports");
                return Ok(());
            }
        }
    }
}
