/*!
 # Register map

 Register offsets of the RTC chip and the power-management microcontroller
 on the WittyPi 3 / WittyPi 3 Mini.

 [`MC`] mirrors the full firmware register map, including configuration
 registers the driver does not touch.
*/

/// Default I2C address of the RTC chip
pub const RTC_ADDRESS: u16 = 0x68;

/// Default I2C address of the power-management microcontroller
pub const MC_ADDRESS: u16 = 0x69;

/// RTC time registers (seconds .. year, in address order)
pub const RTC_TIME: [u8; 7] = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

/// RTC control register
pub const RTC_CONTROL: u8 = 0x0E;

/// Control value enabling the alarm interrupts, written before any schedule change
pub const RTC_CONTROL_ALARM_ENABLE: u8 = 0x07;

/// Control bit forcing a temperature conversion
pub const RTC_CONTROL_CONVERT_TEMP: u8 = 0x20;

/// RTC temperature, integer part (two's complement)
pub const RTC_TEMP_MSB: u8 = 0x11;

/// RTC temperature, fraction in the top two bits
pub const RTC_TEMP_LSB: u8 = 0x12;

/// Alarm registers holding a schedule
#[derive(Debug, Clone, Copy)]
pub struct ScheduleRegisters {
    /// Seconds (only the startup alarm has one)
    pub second: Option<u8>,
    /// Minutes
    pub minute: u8,
    /// Hours
    pub hour: u8,
    /// Day of month
    pub day: u8,
}

impl ScheduleRegisters {
    /// Registers to read, in increasing address order
    pub fn read_order(&self) -> Vec<u8> {
        self.second
            .into_iter()
            .chain([self.minute, self.hour, self.day])
            .collect()
    }

    /// Registers to write: minute, hour, day
    pub fn write_order(&self) -> [u8; 3] {
        [self.minute, self.hour, self.day]
    }
}

/// Startup alarm (RTC alarm 1)
pub const STARTUP: ScheduleRegisters = ScheduleRegisters {
    second: Some(0x07),
    minute: 0x08,
    hour: 0x09,
    day: 0x0A,
};

/// Shutdown alarm (RTC alarm 2)
pub const SHUTDOWN: ScheduleRegisters = ScheduleRegisters {
    second: None,
    minute: 0x0B,
    hour: 0x0C,
    day: 0x0D,
};

/// Microcontroller registers
#[derive(Debug, Clone, Copy)]
pub struct McRegisters {
    /// Firmware id
    pub id: u8,
    /// Input voltage, integer part
    pub voltage_in_i: u8,
    /// Input voltage, hundredths
    pub voltage_in_d: u8,
    /// Output voltage, integer part
    pub voltage_out_i: u8,
    /// Output voltage, hundredths
    pub voltage_out_d: u8,
    /// Output current, integer part
    pub current_out_i: u8,
    /// Output current, hundredths
    pub current_out_d: u8,
    /// Power mode (0 = 5V USB, 1 = VIN through LDO)
    pub power_mode: u8,
    /// Low-voltage shutdown flag
    pub lv_shutdown: u8,
    /// Slave address
    pub conf_address: u8,
    /// Default-on flag
    pub conf_default_on: u8,
    /// Pulse interval
    pub conf_pulse_interval: u8,
    /// Low-voltage threshold in 0.1V, 255 = disabled
    pub conf_low_voltage: u8,
    /// LED blink
    pub conf_blink_led: u8,
    /// Power cut delay in 0.1s
    pub conf_power_cut_delay: u8,
    /// Recovery voltage threshold in 0.1V, 255 = disabled
    pub conf_recovery_voltage: u8,
    /// Dummy load duration
    pub conf_dummy_load: u8,
    /// Input voltage calibration
    pub conf_adj_vin: u8,
    /// Output voltage calibration
    pub conf_adj_vout: u8,
    /// Output current calibration
    pub conf_adj_iout: u8,
}

/// Predefined microcontroller register offsets
pub const MC: McRegisters = McRegisters {
    id: 0,
    voltage_in_i: 1,
    voltage_in_d: 2,
    voltage_out_i: 3,
    voltage_out_d: 4,
    current_out_i: 5,
    current_out_d: 6,
    power_mode: 7,
    lv_shutdown: 8,
    conf_address: 9,
    conf_default_on: 10,
    conf_pulse_interval: 11,
    conf_low_voltage: 12,
    conf_blink_led: 13,
    conf_power_cut_delay: 14,
    conf_recovery_voltage: 15,
    conf_dummy_load: 16,
    conf_adj_vin: 17,
    conf_adj_vout: 18,
    conf_adj_iout: 19,
};

/// Threshold register value meaning "disabled"
pub const THRESHOLD_DISABLED: u8 = 255;

/// Firmware from which the power cut delay accepts up to 25 seconds
pub const FIRMWARE_LONG_POWER_CUT: u8 = 35;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_reads_second_first() {
        assert_eq!(STARTUP.read_order(), vec![7, 8, 9, 10]);
        assert_eq!(STARTUP.write_order(), [8, 9, 10]);
    }

    #[test]
    fn mc_table_spans_registers_0_to_19() {
        assert_eq!(MC.id, 0);
        assert_eq!(MC.conf_low_voltage, 12);
        assert_eq!(MC.conf_power_cut_delay, 14);
        assert_eq!(MC.conf_recovery_voltage, 15);
        assert_eq!(MC.conf_adj_iout, 19);
    }

    #[test]
    fn shutdown_has_no_second_register() {
        assert_eq!(SHUTDOWN.read_order(), vec![11, 12, 13]);
        assert_eq!(SHUTDOWN.write_order(), [11, 12, 13]);
    }
}
