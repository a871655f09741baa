use chrono::{DateTime, FixedOffset, Local, NaiveDate, TimeZone, Utc};
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::bcd::{bcd_to_dec, decode_all};
use crate::bus::{BusProvider, I2cBus, LinuxI2c};
use crate::registers::{
    ScheduleRegisters, FIRMWARE_LONG_POWER_CUT, MC, MC_ADDRESS, RTC_ADDRESS, RTC_CONTROL,
    RTC_CONTROL_ALARM_ENABLE, RTC_CONTROL_CONVERT_TEMP, RTC_TEMP_LSB, RTC_TEMP_MSB, RTC_TIME,
    SHUTDOWN, STARTUP, THRESHOLD_DISABLED,
};
use crate::schedule::{ScheduleCodec, ScheduleOccurrence, ScheduleTime};
use crate::{Error, Result};

/// Power cut delay limit of older firmware, in seconds
const POWER_CUT_DELAY_MAX: f32 = 8.0;

/// Power cut delay limit from firmware 35 on, in seconds
const POWER_CUT_DELAY_MAX_LONG: f32 = 25.0;

/// Time the RTC needs for a forced temperature conversion
const TEMPERATURE_CONVERSION: Duration = Duration::from_millis(200);

/// Bus and device addresses of the board
#[derive(Debug, Clone, Copy)]
pub struct BoardConfig {
    /// I2C bus number (`/dev/i2c-N`)
    pub i2c_bus: u8,
    /// Address of the RTC chip
    pub rtc_address: u16,
    /// Address of the power-management microcontroller
    pub mc_address: u16,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            rtc_address: RTC_ADDRESS,
            mc_address: MC_ADDRESS,
        }
    }
}

/// Source powering the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    /// 5V over USB
    Usb5V,
    /// VIN through the LDO regulator
    LdoVin,
    /// Value not known to this library
    Unknown(u8),
}

impl From<u8> for PowerMode {
    fn from(value: u8) -> Self {
        match value {
            0 => PowerMode::Usb5V,
            1 => PowerMode::LdoVin,
            other => PowerMode::Unknown(other),
        }
    }
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerMode::Usb5V => write!(f, "5V (USB)"),
            PowerMode::LdoVin => write!(f, "VIN (LDO)"),
            PowerMode::Unknown(v) => write!(f, "unknown ({})", v),
        }
    }
}

/// Low-voltage or recovery-voltage threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoltageThreshold {
    /// Threshold turned off
    Disabled,
    /// Threshold in volts
    Volts(f32),
}

impl VoltageThreshold {
    /// Decodes a threshold register (0.1V steps, 255 = disabled)
    pub fn from_register(value: u8) -> Self {
        if value == THRESHOLD_DISABLED {
            VoltageThreshold::Disabled
        } else {
            VoltageThreshold::Volts(value as f32 / 10.0)
        }
    }

    /// Register value for `volts`. Anything outside 5.1V..25.3V disables the threshold.
    pub fn register_for(volts: f32) -> u8 {
        let tenths = (volts * 10.0).round();
        if 50.0 < tenths && tenths < 254.0 {
            tenths as u8
        } else {
            THRESHOLD_DISABLED
        }
    }
}

impl fmt::Display for VoltageThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoltageThreshold::Disabled => write!(f, "disabled"),
            VoltageThreshold::Volts(v) => write!(f, "{:.1}V", v),
        }
    }
}

/// Current RTC time
#[derive(Debug, Clone)]
pub struct RtcTimestamp<Tz: TimeZone> {
    pub utc: DateTime<Utc>,
    pub local: DateTime<Tz>,
    /// Seconds since the Unix epoch
    pub unix: i64,
}

/// Snapshot of the board's clock and power readings
#[derive(Debug, Clone)]
pub struct Status<Tz: TimeZone> {
    pub rtc: RtcTimestamp<Tz>,
    pub input_voltage: f32,
    pub output_voltage: f32,
    pub output_current: f32,
    pub temperature: f32,
}

/// Combines an integer register and a hundredths register
pub fn combine_reading(integer: u8, hundredths: u8) -> f32 {
    integer as f32 + hundredths as f32 / 100.0
}

/// Decodes the RTC temperature: 10-bit two's complement in 0.25°C steps
pub fn temperature_from_registers(msb: u8, lsb: u8) -> f32 {
    let quarters = ((msb as i8 as i16) << 2) | (lsb >> 6) as i16;
    quarters as f32 * 0.25
}

/// Builds the UTC time from the seven RTC time registers
/// (second, minute, hour, weekday, day, month, year).
pub fn timestamp_from_registers(raw: &[u8]) -> Result<DateTime<Utc>> {
    let decoded = decode_all(raw);
    match decoded[..] {
        [second, minute, hour, _weekday, day, month, year] => {
            NaiveDate::from_ymd_opt(2000 + year as i32, month as u32, day as u32)
                .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
                .map(|dt| dt.and_utc())
                .ok_or_else(|| {
                    Error::InvalidDateTime(format!(
                        "20{:02}-{:02}-{:02} {:02}:{:02}:{:02}",
                        year, month, day, hour, minute, second
                    ))
                })
        }
        _ => Err(Error::General(format!(
            "expected 7 RTC time registers, got {}",
            raw.len()
        ))),
    }
}

/// Driver for the WittyPi board
pub struct WittyPi<P: BusProvider, Tz: TimeZone> {
    provider: P,
    config: BoardConfig,
    codec: ScheduleCodec<Tz>,
}

impl WittyPi<LinuxI2c, FixedOffset> {
    /// Creates a driver on the configured Linux I2C bus, reporting local
    /// times in the host's current UTC offset
    pub fn from_config(config: BoardConfig) -> Self {
        let offset = *Local::now().offset();
        debug!("Using local UTC offset {}", offset);
        Self::new(LinuxI2c::new(config.i2c_bus), config, offset)
    }
}

impl<P: BusProvider, Tz: TimeZone> WittyPi<P, Tz> {
    /// Creates a driver with an explicit bus provider and local timezone
    pub fn new(provider: P, config: BoardConfig, local: Tz) -> Self {
        Self {
            provider,
            config,
            codec: ScheduleCodec::new(local),
        }
    }

    /// The board configuration
    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    /// The schedule codec
    pub fn codec(&self) -> &ScheduleCodec<Tz> {
        &self.codec
    }

    /// Runs `f` on a freshly opened bus, released when `f` returns
    fn with_bus<T>(&self, f: impl FnOnce(&mut P::Bus) -> Result<T>) -> Result<T> {
        let mut bus = self.provider.open()?;
        f(&mut bus)
    }

    fn read_mc(&self, register: u8) -> Result<u8> {
        self.with_bus(|bus| bus.read_byte_data(self.config.mc_address, register))
    }

    fn write_mc(&self, register: u8, value: u8) -> Result<()> {
        self.with_bus(|bus| bus.write_byte_data(self.config.mc_address, register, value))
    }

    fn read_reading(&self, integer: u8, hundredths: u8) -> Result<f32> {
        self.with_bus(|bus| {
            let i = bus.read_byte_data(self.config.mc_address, integer)?;
            let d = bus.read_byte_data(self.config.mc_address, hundredths)?;
            Ok(combine_reading(i, d))
        })
    }

    fn probe(&self, addr: u16) -> Result<bool> {
        match self.with_bus(|bus| bus.read_byte(addr)) {
            Ok(_) => Ok(true),
            Err(e) if e.is_device_absent() => {
                debug!("No device answering at {:#04x}", addr);
                Ok(false)
            }
            Err(e) => {
                error!("Probing {:#04x} failed: {}", addr, e);
                Err(e)
            }
        }
    }

    /// Checks whether the RTC chip answers on the bus
    #[instrument(skip(self))]
    pub fn is_rtc_connected(&self) -> Result<bool> {
        self.probe(self.config.rtc_address)
    }

    /// Checks whether the microcontroller answers on the bus
    #[instrument(skip(self))]
    pub fn is_mc_connected(&self) -> Result<bool> {
        self.probe(self.config.mc_address)
    }

    /// Firmware version of the microcontroller
    #[instrument(skip(self))]
    pub fn firmware_version(&self) -> Result<u8> {
        let version = bcd_to_dec(self.read_mc(MC.id)?);
        debug!("Firmware version {}", version);
        Ok(version)
    }

    /// Input voltage in volts
    #[instrument(skip(self))]
    pub fn input_voltage(&self) -> Result<f32> {
        self.read_reading(MC.voltage_in_i, MC.voltage_in_d)
    }

    /// Output voltage in volts
    #[instrument(skip(self))]
    pub fn output_voltage(&self) -> Result<f32> {
        self.read_reading(MC.voltage_out_i, MC.voltage_out_d)
    }

    /// Output current in amperes
    #[instrument(skip(self))]
    pub fn output_current(&self) -> Result<f32> {
        self.read_reading(MC.current_out_i, MC.current_out_d)
    }

    /// Source currently powering the board
    #[instrument(skip(self))]
    pub fn power_mode(&self) -> Result<PowerMode> {
        Ok(self.read_mc(MC.power_mode)?.into())
    }

    /// Dummy load duration, as stored by the firmware
    #[instrument(skip(self))]
    pub fn dummy_load_duration(&self) -> Result<u8> {
        self.read_mc(MC.conf_dummy_load)
    }

    /// Input voltage below which the board shuts down
    #[instrument(skip(self))]
    pub fn low_voltage_threshold(&self) -> Result<VoltageThreshold> {
        Ok(VoltageThreshold::from_register(
            self.read_mc(MC.conf_low_voltage)?,
        ))
    }

    /// Input voltage at which the board powers back up
    #[instrument(skip(self))]
    pub fn recovery_voltage_threshold(&self) -> Result<VoltageThreshold> {
        Ok(VoltageThreshold::from_register(
            self.read_mc(MC.conf_recovery_voltage)?,
        ))
    }

    /// Sets the low-voltage threshold; values outside 5.1V..25.3V disable it
    #[instrument(skip(self))]
    pub fn set_low_voltage_threshold(&self, volts: f32) -> Result<VoltageThreshold> {
        self.set_threshold(MC.conf_low_voltage, volts)
    }

    /// Sets the recovery-voltage threshold; values outside 5.1V..25.3V disable it
    #[instrument(skip(self))]
    pub fn set_recovery_voltage_threshold(&self, volts: f32) -> Result<VoltageThreshold> {
        self.set_threshold(MC.conf_recovery_voltage, volts)
    }

    fn set_threshold(&self, register: u8, volts: f32) -> Result<VoltageThreshold> {
        let value = VoltageThreshold::register_for(volts);
        if value == THRESHOLD_DISABLED {
            warn!("Threshold {}V outside 5.1V..25.3V, disabling it", volts);
        }
        self.write_mc(register, value)?;
        let threshold = VoltageThreshold::from_register(value);
        info!("Threshold set to {}", threshold);
        Ok(threshold)
    }

    /// Delay between shutdown and power cut, in seconds
    #[instrument(skip(self))]
    pub fn power_cut_delay(&self) -> Result<f32> {
        Ok(self.read_mc(MC.conf_power_cut_delay)? as f32 / 10.0)
    }

    /// Sets the delay between shutdown and power cut.
    ///
    /// Firmware before version 35 accepts up to 8 seconds, later ones up to 25.
    #[instrument(skip(self))]
    pub fn set_power_cut_delay(&self, seconds: f32) -> Result<()> {
        let max = if self.firmware_version()? >= FIRMWARE_LONG_POWER_CUT {
            POWER_CUT_DELAY_MAX_LONG
        } else {
            POWER_CUT_DELAY_MAX
        };
        if !(0.0..=max).contains(&seconds) {
            warn!("Power cut delay {}s out of range (0.0..{})", seconds, max);
            return Err(Error::PowerCutDelayOutOfRange {
                value: seconds,
                max,
            });
        }
        self.write_mc(MC.conf_power_cut_delay, (seconds * 10.0).round() as u8)?;
        info!("Power cut delay set to {}s", seconds);
        Ok(())
    }

    /// Reads the RTC clock
    #[instrument(skip(self))]
    pub fn rtc_timestamp(&self) -> Result<RtcTimestamp<Tz>> {
        let raw = self.read_rtc(&RTC_TIME)?;
        let utc = timestamp_from_registers(&raw)?;
        trace!("RTC time {}", utc);
        Ok(RtcTimestamp {
            utc,
            local: utc.with_timezone(self.codec.timezone()),
            unix: utc.timestamp(),
        })
    }

    /// Temperature of the RTC chip in °C
    #[instrument(skip(self))]
    pub fn temperature(&self) -> Result<f32> {
        let rtc = self.config.rtc_address;
        self.with_bus(|bus| {
            let control = bus.read_byte_data(rtc, RTC_CONTROL)?;
            trace!("RTC control was {:#04x}", control);
            bus.write_byte_data(
                rtc,
                RTC_CONTROL,
                RTC_CONTROL_ALARM_ENABLE | RTC_CONTROL_CONVERT_TEMP,
            )?;
            thread::sleep(TEMPERATURE_CONVERSION);
            let msb = bus.read_byte_data(rtc, RTC_TEMP_MSB)?;
            let lsb = bus.read_byte_data(rtc, RTC_TEMP_LSB)?;
            Ok(temperature_from_registers(msb, lsb))
        })
    }

    /// Next scheduled startup, `None` when unset
    pub fn startup_time(&self) -> Result<Option<ScheduleOccurrence<Tz>>> {
        self.startup_time_at(Utc::now())
    }

    /// Next scheduled startup relative to `now`
    #[instrument(skip(self))]
    pub fn startup_time_at(&self, now: DateTime<Utc>) -> Result<Option<ScheduleOccurrence<Tz>>> {
        let time = self.read_schedule(&STARTUP)?;
        self.codec.next_occurrence_at(&time, now)
    }

    /// Next scheduled shutdown, `None` when unset
    pub fn shutdown_time(&self) -> Result<Option<ScheduleOccurrence<Tz>>> {
        self.shutdown_time_at(Utc::now())
    }

    /// Next scheduled shutdown relative to `now`
    #[instrument(skip(self))]
    pub fn shutdown_time_at(&self, now: DateTime<Utc>) -> Result<Option<ScheduleOccurrence<Tz>>> {
        let time = self.read_schedule(&SHUTDOWN)?;
        self.codec.next_occurrence_at(&time, now)
    }

    /// Sets the startup schedule, e.g. `"?? 07:30"` for every day at 07:30
    #[instrument(skip(self))]
    pub fn set_startup_time(&self, schedule: &str) -> Result<()> {
        self.write_schedule(&STARTUP, schedule)
    }

    /// Sets the shutdown schedule, e.g. `"?? 22:00"` for every day at 22:00
    #[instrument(skip(self))]
    pub fn set_shutdown_time(&self, schedule: &str) -> Result<()> {
        self.write_schedule(&SHUTDOWN, schedule)
    }

    /// Removes the startup schedule
    #[instrument(skip(self))]
    pub fn clear_startup_time(&self) -> Result<()> {
        self.clear_schedule(&STARTUP)
    }

    /// Removes the shutdown schedule
    #[instrument(skip(self))]
    pub fn clear_shutdown_time(&self) -> Result<()> {
        self.clear_schedule(&SHUTDOWN)
    }

    /// Reads clock, voltages, current and temperature
    #[instrument(skip(self))]
    pub fn status(&self) -> Result<Status<Tz>> {
        Ok(Status {
            rtc: self.rtc_timestamp()?,
            input_voltage: self.input_voltage()?,
            output_voltage: self.output_voltage()?,
            output_current: self.output_current()?,
            temperature: self.temperature()?,
        })
    }

    fn read_rtc(&self, registers: &[u8]) -> Result<Vec<u8>> {
        let rtc = self.config.rtc_address;
        self.with_bus(|bus| {
            registers
                .iter()
                .map(|&register| bus.read_byte_data(rtc, register))
                .collect()
        })
    }

    fn read_schedule(&self, registers: &ScheduleRegisters) -> Result<ScheduleTime> {
        let raw = self.read_rtc(&registers.read_order())?;
        trace!("Schedule registers {:02x?}", raw);
        ScheduleTime::from_registers(&raw)
    }

    fn write_schedule(&self, registers: &ScheduleRegisters, schedule: &str) -> Result<()> {
        let time = ScheduleTime::parse(schedule)?;
        // only minute, hour and day are written
        if time.second.is_some() {
            return Err(Error::MalformedSchedule(schedule.to_string()));
        }
        let bytes = time.register_bytes();
        let rtc = self.config.rtc_address;
        debug!("Writing schedule {} as {:02x?}", time, bytes);

        self.with_bus(|bus| {
            bus.write_byte_data(rtc, RTC_CONTROL, RTC_CONTROL_ALARM_ENABLE)?;
            for (register, value) in registers.write_order().into_iter().zip(bytes) {
                bus.write_byte_data(rtc, register, value)?;
            }
            Ok(())
        })?;

        info!("Schedule set to {}", time);
        Ok(())
    }

    fn clear_schedule(&self, registers: &ScheduleRegisters) -> Result<()> {
        let rtc = self.config.rtc_address;
        self.with_bus(|bus| {
            for register in registers.write_order() {
                bus.write_byte_data(rtc, register, 0)?;
            }
            Ok(())
        })?;
        info!("Schedule cleared");
        Ok(())
    }
}
