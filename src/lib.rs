/*!
 # WittyPi Real-Time Clock and Power Management Library

 A Rust library for the WittyPi add-on board of the Raspberry Pi.
 It talks to the board's RTC chip and power-management microcontroller over I2C.

 ## Features

 * RTC and microcontroller connectivity checks
 * RTC timestamp reading
 * Input/output voltage and output current
 * RTC temperature sensor
 * Low-voltage and recovery-voltage thresholds
 * Power cut delay
 * Recurring startup and shutdown schedules

 ## Example

 ```no_run
 use wittypi::*;

 fn main() -> Result<()> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let board = WittyPi::from_config(BoardConfig::default());

     println!("Input voltage: {:.2}V", board.input_voltage()?);

     // Power on every day at 07:30
     board.set_startup_time("?? 07:30")?;
     match board.startup_time()? {
         Some(next) => println!("Next startup: {}", next.local),
         None => println!("Next startup: Never"),
     }

     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the WittyPi library
#[derive(Error, Debug)]
pub enum Error {
    /// A register transaction with a device failed
    #[error("I2C transaction with device {addr:#04x} failed: {source}")]
    Transport {
        addr: u16,
        #[source]
        source: std::io::Error,
    },

    /// Opening or configuring the I2C bus failed
    #[error(transparent)]
    I2c(#[from] rppal::i2c::Error),

    /// Schedule string could not be parsed
    #[error("Malformed schedule '{0}', expected \"<day> <hour>:<minute>\" with ?? for any day or hour")]
    MalformedSchedule(String),

    /// Value out of range
    #[error("Value {0} out of range ({1}..{2})")]
    ValueOutOfRange(u32, u32, u32),

    /// Power cut delay outside what the firmware accepts
    #[error("Power cut delay {value}s out of range (0.0..{max})")]
    PowerCutDelayOutOfRange { value: f32, max: f32 },

    /// Register contents do not form a valid date and time
    #[error("Invalid date/time in RTC registers: {0}")]
    InvalidDateTime(String),

    /// Day is set while the hour is left open, which no recurrence covers
    #[error("Unsupported schedule: day {day} with wildcard hour")]
    UnsupportedSchedule { day: u8, hour: u8 },

    /// General error
    #[error("Error: {0}")]
    General(String),
}

impl Error {
    /// True when the device did not acknowledge its address
    /// (`EREMOTEIO`), i.e. it is not on the bus.
    pub fn is_device_absent(&self) -> bool {
        match self {
            Error::Transport { source, .. } => source.raw_os_error() == Some(bus::EREMOTEIO),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod bcd;
pub mod bus;
pub mod device;
pub mod registers;
pub mod schedule;

// Re-export key types
pub use bus::{BusProvider, I2cBus, LinuxI2c};
pub use device::{BoardConfig, PowerMode, RtcTimestamp, Status, VoltageThreshold, WittyPi};
pub use schedule::{
    RecurrencePattern, ScheduleCodec, ScheduleOccurrence, ScheduleTime, WILDCARD_DECODED,
    WILDCARD_RAW_WRITE,
};
