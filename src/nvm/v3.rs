//! NVMCTRL versions 3 and 5
//!
//! Present on AVR EA (P:3) and AVR EB (P:5). Paged writes through separate
//! flash and EEPROM page buffers, a three bit error code in STATUS, and an
//! explicit NOCMD after every command. User row and boot row are flash
//! pages, fuses are EEPROM cells.

use embedded_hal::blocking::delay::DelayMs;

use super::{Core, ErrorField, Nvm, Registers, StatusLayout, Variant, WriteOptions};
use crate::device::{MemoryKind, NvmVersion};
use crate::error::Phase;
use crate::link::ReadWrite;
use crate::timeout::Clock;
use crate::Error;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Command {
    /// Clear the current command
    NoCmd = 0x00,

    /// No operation
    Noop = 0x01,

    /// Write the flash page buffer
    FlashPageWrite = 0x04,

    /// Erase then write the flash page buffer
    FlashPageEraseWrite = 0x05,

    /// Erase the flash page addressed by the next write
    FlashPageErase = 0x08,

    /// Clear the flash page buffer
    FlashPageBufferClear = 0x0F,

    /// Write the EEPROM page buffer
    EepromPageWrite = 0x14,

    /// Erase then write the EEPROM page buffer
    EepromPageEraseWrite = 0x15,

    /// Erase the EEPROM page addressed by the next write
    EepromPageErase = 0x17,

    /// Clear the EEPROM page buffer
    EepromPageBufferClear = 0x1F,

    /// Erase flash, EEPROM (unless EESAVE) and lockbits
    ChipErase = 0x20,

    /// Erase all of EEPROM
    EepromErase = 0x30,
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c as u8
    }
}

const STATUS: StatusLayout = StatusLayout {
    flash_busy_bp: 1,
    eeprom_busy_bp: 0,
    error: ErrorField::Code { bm: 0x70, bp: 4 },
};

pub static VARIANT_P3: Variant = Variant {
    version: NvmVersion::P3,
    registers: Registers {
        ctrla: 0x00,
        status: 0x06,
        data: 0x08,
        addr: 0x0C,
    },
    status: STATUS,
};

pub static VARIANT_P5: Variant = Variant {
    version: NvmVersion::P5,
    registers: Registers {
        ctrla: 0x00,
        status: 0x06,
        data: 0x08,
        addr: 0x0C,
    },
    status: STATUS,
};

pub struct NvmPaged<'a, RW, C> {
    core: Core<'a, RW, C>,
}

impl<'a, RW, C> NvmPaged<'a, RW, C>
where
    RW: ReadWrite,
    C: Clock + DelayMs<u32>,
{
    pub fn new(core: Core<'a, RW, C>) -> Self {
        Self { core }
    }

    pub(crate) fn core_mut(&mut self) -> &mut Core<'a, RW, C> {
        &mut self.core
    }

    /// Wait for completion and remove the command from the controller
    fn finish(&mut self, phase: Phase) -> Result<(), Error<RW::Error>> {
        self.core.complete(phase, Command::NoCmd.into())
    }

    /// Check an address lies in a flash-like row (user row or boot row)
    fn check_row(&self, address: u32) -> Result<(), Error<RW::Error>> {
        let device = self.core.device();
        let in_row = [MemoryKind::UserRow, MemoryKind::BootRow]
            .iter()
            .filter_map(|k| device.region(*k))
            .any(|r| r.contains(address));

        if in_row {
            Ok(())
        } else {
            error!("Address 0x{:06x} is not in the user or boot row", address);
            Err(Error::InvalidArgument("address outside user/boot row"))
        }
    }

    /// Write a page through the page buffer
    ///
    /// `command` commits the buffer, `clear` is the matching buffer clear.
    fn write_nvm(
        &mut self,
        address: u32,
        data: &[u8],
        word_access: bool,
        command: Command,
        clear: Command,
        options: &WriteOptions,
    ) -> Result<(), Error<RW::Error>> {
        self.core.check_load(data, word_access)?;

        self.core.wait_ready(Phase::BeforePageBufferClear)?;

        debug!("Clear page buffer");
        self.core.execute(clear.into())?;

        if let Err(e) = self.core.wait_ready(Phase::AfterPageBufferClear) {
            return Err(self
                .core
                .abort(Phase::AfterPageBufferClear, Command::NoCmd.into(), e));
        }

        if let Err(e) = self.core.load(address, data, word_access, options.block_size) {
            return Err(self
                .core
                .abort(Phase::AfterPageWrite, Command::NoCmd.into(), e));
        }

        debug!("Committing data");
        self.core.execute(command.into())?;
        self.core.pause(options.pagewrite_delay_ms);

        self.finish(Phase::AfterPageWrite)
    }

    /// Run a command with no data phase
    fn erase(
        &mut self,
        command: Command,
        before: Phase,
        after: Phase,
    ) -> Result<(), Error<RW::Error>> {
        self.core.wait_ready(before)?;
        self.core.execute(command.into())?;
        self.finish(after)
    }
}

impl<'a, RW, C> Nvm for NvmPaged<'a, RW, C>
where
    RW: ReadWrite,
    C: Clock + DelayMs<u32>,
{
    type Error = RW::Error;

    fn version(&self) -> NvmVersion {
        self.core.variant().version
    }

    fn chip_erase(&mut self) -> Result<(), Error<RW::Error>> {
        debug!("Chip erase using NVM CTRL");
        self.erase(
            Command::ChipErase,
            Phase::BeforeChipErase,
            Phase::AfterChipErase,
        )
    }

    fn erase_flash_page(&mut self, address: u32) -> Result<(), Error<RW::Error>> {
        debug!("Erase flash page at address 0x{:08X}", address);

        self.core.wait_ready(Phase::BeforePageErase)?;

        // Dummy write selects the page
        self.core.write_data(address, &[0xFF])?;

        self.core.execute(Command::FlashPageErase.into())?;
        self.finish(Phase::AfterPageErase)
    }

    fn erase_eeprom(&mut self) -> Result<(), Error<RW::Error>> {
        debug!("Erase EEPROM");
        self.erase(
            Command::EepromErase,
            Phase::BeforeEepromErase,
            Phase::AfterEepromErase,
        )
    }

    /// User row is a single flash page here, `size` is unused
    fn erase_user_row(&mut self, address: u32, _size: usize) -> Result<(), Error<RW::Error>> {
        debug!("Erase user row");
        self.check_row(address)?;
        self.erase_flash_page(address)
    }

    fn write_flash(
        &mut self,
        address: u32,
        data: &[u8],
        options: &WriteOptions,
    ) -> Result<(), Error<RW::Error>> {
        self.write_nvm(
            address,
            data,
            options.word_access,
            Command::FlashPageWrite,
            Command::FlashPageBufferClear,
            options,
        )
    }

    fn write_user_row(&mut self, address: u32, data: &[u8]) -> Result<(), Error<RW::Error>> {
        self.check_row(address)?;
        self.write_nvm(
            address,
            data,
            true,
            Command::FlashPageWrite,
            Command::FlashPageBufferClear,
            &WriteOptions::default(),
        )
    }

    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<(), Error<RW::Error>> {
        self.write_nvm(
            address,
            data,
            false,
            Command::EepromPageEraseWrite,
            Command::EepromPageBufferClear,
            &WriteOptions::default(),
        )
    }

    fn write_fuse(&mut self, address: u32, data: &[u8]) -> Result<(), Error<RW::Error>> {
        if data.is_empty() {
            return Err(Error::InvalidArgument("empty fuse write"));
        }
        self.write_eeprom(address, data)
    }
}
