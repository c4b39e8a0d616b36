//! NVMCTRL version 0
//!
//! Present on tinyAVR 0/1/2 and megaAVR 0. Paged writes through a page
//! buffer that must be cleared before loading, no read-while-write, fuses
//! written with a dedicated command through the ADDR/DATA registers.

use core::ops::RangeInclusive;

use embedded_hal::blocking::delay::DelayMs;

use super::{BulkMode, Core, ErrorField, Nvm, Registers, StatusLayout, Variant, WriteOptions};
use crate::device::NvmVersion;
use crate::error::Phase;
use crate::link::ReadWrite;
use crate::timeout::Clock;
use crate::Error;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Command {
    /// No operation
    Nop = 0x00,

    /// Write the page buffer to memory
    WritePage = 0x01,

    /// Erase a page
    ErasePage = 0x02,

    /// Erase then write the page buffer to memory
    EraseWritePage = 0x03,

    /// Clear the page buffer
    PageBufferClear = 0x04,

    /// Erase flash, EEPROM (unless EESAVE) and lockbits
    ChipErase = 0x05,

    /// Erase EEPROM
    EraseEeprom = 0x06,

    /// Write the fuse at ADDR with DATAL
    WriteFuse = 0x07,
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c as u8
    }
}

pub static VARIANT: Variant = Variant {
    version: NvmVersion::P0,
    registers: Registers {
        ctrla: 0x00,
        status: 0x02,
        data: 0x06,
        addr: 0x08,
    },
    status: StatusLayout {
        flash_busy_bp: 0,
        eeprom_busy_bp: 1,
        error: ErrorField::Flag { bp: 2 },
    },
};

/// Single byte flash writes in this window hit a fuse or the lockbyte
pub const FUSE_WINDOW: RangeInclusive<u32> = 0x1280..=0x128A;

/// Bulk writes always prepare the page buffer at these addresses
pub const BULK_ANCHORS: [u32; 2] = [0x4000, 0x8000];

/// Largest odd-length chunk written with byte access
pub const MAX_ODD_CHUNK: usize = 256;

/// Fuse write pause for lockbyte/fuse writes arriving through `write_flash`
pub const LOCKBYTE_WRITE_DELAY_MS: u32 = 2;

pub struct NvmP0<'a, RW, C> {
    core: Core<'a, RW, C>,
}

impl<'a, RW, C> NvmP0<'a, RW, C>
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

    fn clear_page_buffer(&mut self) -> Result<(), Error<RW::Error>> {
        self.core.wait_ready(Phase::BeforePageBufferClear)?;

        debug!("Clear page buffer");
        self.core.execute(Command::PageBufferClear.into())?;

        self.core.wait_ready(Phase::AfterPageBufferClear)
    }

    /// Write a page of data
    ///
    /// Streaming bulk writes only prepare the page buffer at the anchor
    /// addresses or when byte access is used, and skip the trailing ready
    /// check entirely.
    fn write_nvm(
        &mut self,
        address: u32,
        data: &[u8],
        word_access: bool,
        command: Command,
        options: &WriteOptions,
    ) -> Result<(), Error<RW::Error>> {
        self.core.check_load(data, word_access)?;

        let prepare = options.bulk == BulkMode::Off
            || BULK_ANCHORS.contains(&address)
            || !word_access;

        if prepare {
            self.clear_page_buffer()?;
        }

        self.core
            .load(address, data, word_access, options.block_size)?;

        debug!("Committing data");
        self.core.execute(command.into())?;
        self.core.pause(options.pagewrite_delay_ms);

        if options.bulk != BulkMode::Streaming {
            self.core.wait_ready(Phase::AfterPageWrite)?;
        }

        Ok(())
    }

    fn write_fuse_delayed(
        &mut self,
        address: u32,
        data: &[u8],
        delay_ms: u32,
    ) -> Result<(), Error<RW::Error>> {
        let value = match data.first() {
            Some(v) => *v,
            None => return Err(Error::InvalidArgument("empty fuse write")),
        };

        self.core.wait_ready(Phase::BeforeFuseWrite)?;

        let regs = &self.core.variant().registers;
        let (addr, datal) = (regs.addr, regs.data);

        debug!("Load NVM address");
        self.core.write_register(addr, (address & 0xFF) as u8)?;
        self.core
            .write_register(addr + 1, ((address >> 8) & 0xFF) as u8)?;

        debug!("Load fuse data");
        self.core.write_register(datal, value)?;

        debug!("Execute fuse write");
        self.core.execute(Command::WriteFuse.into())?;

        self.core.pause(delay_ms);
        self.core.wait_ready(Phase::AfterFuseWrite)
    }
}

impl<'a, RW, C> Nvm for NvmP0<'a, RW, C>
where
    RW: ReadWrite,
    C: Clock + DelayMs<u32>,
{
    type Error = RW::Error;

    fn version(&self) -> NvmVersion {
        NvmVersion::P0
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
        if data.len() == 1 && FUSE_WINDOW.contains(&address) {
            info!(
                "Write to address 0x{:06x} (which is either the lockbyte or a fuse)",
                address
            );
            return self.write_fuse_delayed(address, data, LOCKBYTE_WRITE_DELAY_MS);
        }

        // Flash is word addressed, an odd tail (only ever the end of an
        // upload) goes in with byte access
        if data.len() % 2 == 1 && data.len() <= MAX_ODD_CHUNK {
            let tail = WriteOptions {
                bulk: BulkMode::Off,
                ..options.clone()
            };
            return self.write_nvm(address, data, false, Command::WritePage, &tail);
        }

        self.write_nvm(
            address,
            data,
            options.word_access,
            Command::WritePage,
            options,
        )
    }

    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<(), Error<RW::Error>> {
        self.write_nvm(
            address,
            data,
            false,
            Command::EraseWritePage,
            &WriteOptions::default(),
        )
    }

    fn write_fuse(&mut self, address: u32, data: &[u8]) -> Result<(), Error<RW::Error>> {
        let delay = self.core.options().fuse_write_delay_ms;
        self.write_fuse_delayed(address, data, delay)
    }
}
