/*!
 # I2C bus access

 The driver never holds the bus between calls. Every operation asks a
 [`BusProvider`] for a fresh handle, runs its register transactions and
 drops the handle on return, including on error paths.
*/

use rppal::i2c::{self, I2c};
use tracing::{debug, instrument, trace};

use crate::{Error, Result};

/// errno reported by the kernel when no device acknowledges the address
pub const EREMOTEIO: i32 = 121;

/// Byte-level register access on an open bus
pub trait I2cBus {
    /// Reads a single byte from the device without selecting a register
    fn read_byte(&mut self, addr: u16) -> Result<u8>;

    /// Reads one register of the device
    fn read_byte_data(&mut self, addr: u16, register: u8) -> Result<u8>;

    /// Writes one register of the device
    fn write_byte_data(&mut self, addr: u16, register: u8, value: u8) -> Result<()>;
}

/// Hands out a bus handle scoped to a single driver call
pub trait BusProvider {
    type Bus: I2cBus;

    fn open(&self) -> Result<Self::Bus>;
}

/// Linux `/dev/i2c-N` bus provider
#[derive(Debug, Clone, Copy)]
pub struct LinuxI2c {
    bus: u8,
}

impl LinuxI2c {
    pub fn new(bus: u8) -> Self {
        Self { bus }
    }
}

impl BusProvider for LinuxI2c {
    type Bus = LinuxI2cBus;

    #[instrument]
    fn open(&self) -> Result<LinuxI2cBus> {
        debug!("Opening I2C bus {}", self.bus);
        let i2c = I2c::with_bus(self.bus)?;
        Ok(LinuxI2cBus { i2c, slave: None })
    }
}

/// Open handle on a Linux I2C bus
pub struct LinuxI2cBus {
    i2c: I2c,
    /// Slave address currently selected on the handle
    slave: Option<u16>,
}

impl LinuxI2cBus {
    fn select(&mut self, addr: u16) -> Result<()> {
        if self.slave != Some(addr) {
            trace!("Selecting slave address {:#04x}", addr);
            self.i2c.set_slave_address(addr)?;
            self.slave = Some(addr);
        }
        Ok(())
    }
}

/// Keeps the OS error of a failed transaction so absent devices can be told apart.
fn transport_error(addr: u16, err: i2c::Error) -> Error {
    match err {
        i2c::Error::Io(source) => Error::Transport { addr, source },
        other => Error::I2c(other),
    }
}

impl I2cBus for LinuxI2cBus {
    fn read_byte(&mut self, addr: u16) -> Result<u8> {
        self.select(addr)?;
        let value = self
            .i2c
            .smbus_receive_byte()
            .map_err(|e| transport_error(addr, e))?;
        trace!("i2c read {:#04x}: {:#04x}", addr, value);
        Ok(value)
    }

    fn read_byte_data(&mut self, addr: u16, register: u8) -> Result<u8> {
        self.select(addr)?;
        let value = self
            .i2c
            .smbus_read_byte(register)
            .map_err(|e| transport_error(addr, e))?;
        trace!(
            "i2c read {:#04x} reg {:#04x}: {:#04x}",
            addr,
            register,
            value
        );
        Ok(value)
    }

    fn write_byte_data(&mut self, addr: u16, register: u8, value: u8) -> Result<()> {
        self.select(addr)?;
        trace!(
            "i2c write {:#04x} reg {:#04x}: {:#04x}",
            addr,
            register,
            value
        );
        self.i2c
            .smbus_write_byte(register, value)
            .map_err(|e| transport_error(addr, e))
    }
}
