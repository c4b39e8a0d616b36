//! NVMCTRL versions 2 and 4
//!
//! Present on AVR DA/DB/DD (P:2) and AVR DU (P:4). There is no page buffer:
//! a write command is loaded into CTRLA and words are written directly to
//! their flash location, then the command is cleared. Fuses are EEPROM
//! cells.

use embedded_hal::blocking::delay::DelayMs;

use super::{BulkMode, Core, ErrorField, Nvm, Registers, StatusLayout, Variant, WriteOptions};
use crate::device::NvmVersion;
use crate::error::Phase;
use crate::link::ReadWrite;
use crate::timeout::Clock;
use crate::Error;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Command {
    /// Clear the current command
    NoCmd = 0x00,

    /// No operation
    Nop = 0x01,

    /// Enable flash write, data is written as it arrives
    FlashWrite = 0x02,

    /// Erase the flash page addressed by the next write
    FlashPageErase = 0x08,

    /// Enable EEPROM write
    EepromWrite = 0x12,

    /// Enable EEPROM erase and write
    EepromEraseWrite = 0x13,

    /// Erase flash, EEPROM (unless EESAVE) and lockbits
    ChipErase = 0x20,

    /// Erase EEPROM
    EepromErase = 0x30,
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c as u8
    }
}

const REGISTERS: Registers = Registers {
    ctrla: 0x00,
    status: 0x02,
    data: 0x06,
    addr: 0x08,
};

const STATUS: StatusLayout = StatusLayout {
    flash_busy_bp: 0,
    eeprom_busy_bp: 1,
    error: ErrorField::Flag { bp: 2 },
};

pub static VARIANT_P2: Variant = Variant {
    version: NvmVersion::P2,
    registers: REGISTERS,
    status: STATUS,
};

pub static VARIANT_P4: Variant = Variant {
    version: NvmVersion::P4,
    registers: REGISTERS,
    status: STATUS,
};

/// Streaming bulk writes reload the write command on 32KiB boundaries
pub const BULK_SECTION_MASK: u32 = 0x7FFF;

pub struct NvmWordWrite<'a, RW, C> {
    core: Core<'a, RW, C>,
}

impl<'a, RW, C> NvmWordWrite<'a, RW, C>
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

    fn write_nvm(
        &mut self,
        address: u32,
        data: &[u8],
        options: &WriteOptions,
    ) -> Result<(), Error<RW::Error>> {
        self.core.check_load(data, options.word_access)?;

        if options.bulk == BulkMode::Off || address & BULK_SECTION_MASK == 0 {
            self.core.wait_ready(Phase::BeforeCommand)?;

            debug!("NVM write command");
            self.core.execute(Command::FlashWrite.into())?;
        }

        if let Err(e) = self
            .core
            .load(address, data, options.word_access, options.block_size)
        {
            return Err(self
                .core
                .abort(Phase::AfterDataWrite, Command::NoCmd.into(), e));
        }

        if options.bulk != BulkMode::Streaming {
            self.finish(Phase::AfterDataWrite)?;
        }

        Ok(())
    }
}

impl<'a, RW, C> Nvm for NvmWordWrite<'a, RW, C>
where
    RW: ReadWrite,
    C: Clock + DelayMs<u32>,
{
    type Error = RW::Error;

    fn version(&self) -> NvmVersion {
        self.core.variant().version
    }

    fn chip_erase(&mut self) -> Result<(), Error<RW::Error>> {
        info!("Chip erase using NVM CTRL");

        self.core.wait_ready(Phase::BeforeChipErase)?;
        self.core.execute(Command::ChipErase.into())?;
        self.core.wait_ready(Phase::AfterChipErase)
    }

    fn write_flash(
        &mut self,
        address: u32,
        data: &[u8],
        options: &WriteOptions,
    ) -> Result<(), Error<RW::Error>> {
        self.write_nvm(address, data, options)
    }

    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<(), Error<RW::Error>> {
        self.core.wait_ready(Phase::BeforeCommand)?;

        debug!("NVM EEPROM erase/write command");
        self.core.execute(Command::EepromEraseWrite.into())?;

        if let Err(e) = self.core.write_data(address, data) {
            return Err(self
                .core
                .abort(Phase::AfterDataWrite, Command::NoCmd.into(), e));
        }

        self.finish(Phase::AfterDataWrite)
    }

    fn write_fuse(&mut self, address: u32, data: &[u8]) -> Result<(), Error<RW::Error>> {
        if data.is_empty() {
            return Err(Error::InvalidArgument("empty fuse write"));
        }
        self.write_eeprom(address, data)
    }
}
