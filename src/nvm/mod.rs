//! NVM controller drivers.
//!
//! Each silicon generation of NVMCTRL has its own command set, status layout
//! and page buffer discipline. The shared skeleton for every mutating
//! operation is
//!
//! 1. poll STATUS until ready, failing on timeout or a write error
//! 2. write the command to CTRLA
//! 3. load data for commands that move data
//! 4. poll STATUS again
//! 5. on controllers with NOCMD, clear CTRLA whatever the wait returned
//!
//! [`NvmController`] selects the implementation for a device descriptor.

use core::fmt::Debug;

use embedded_hal::blocking::delay::DelayMs;

use crate::device::{DeviceInfo, NvmVersion};
use crate::error::Phase;
use crate::link::ReadWrite;
use crate::timeout::{Clock, Timeout};
use crate::{Error, Options};

pub mod v0;
pub mod v1;
pub mod v3;

pub use v0::NvmP0;
pub use v1::NvmWordWrite;
pub use v3::NvmPaged;

/// Bulk write mode for whole-flash uploads
///
/// Streaming skips the per-chunk page buffer clear (except at anchor
/// addresses) and the trailing ready check. The caller must finish a stream
/// with a [`BulkMode::Final`] or [`BulkMode::Off`] write, otherwise the last
/// page is never confirmed written.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum BulkMode {
    /// Full ready / clear / ready / load / commit / ready sequence
    Off,
    /// Mid-stream chunk
    Streaming,
    /// Last chunk of a stream, performs the trailing ready check
    Final,
}

impl Default for BulkMode {
    fn default() -> Self {
        BulkMode::Off
    }
}

/// Per-call flash write options
#[derive(Clone, PartialEq, Debug)]
pub struct WriteOptions {
    /// Load the page buffer with word stores
    pub word_access: bool,
    /// Bytes per transport transfer for word stores
    pub block_size: usize,
    pub bulk: BulkMode,
    /// Pause after the commit command
    pub pagewrite_delay_ms: u32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            word_access: true,
            block_size: 2,
            bulk: BulkMode::Off,
            pagewrite_delay_ms: 0,
        }
    }
}

/// NVMCTRL register offsets
#[derive(Clone, PartialEq, Debug)]
pub struct Registers {
    pub ctrla: u8,
    pub status: u8,
    /// 16-bit
    pub data: u8,
    /// 16 or 24-bit
    pub addr: u8,
}

/// Encoding of write errors in the STATUS register
#[derive(Clone, PartialEq, Debug)]
pub enum ErrorField {
    /// Single write error bit
    Flag { bp: u8 },
    /// Multi-bit error code
    Code { bm: u8, bp: u8 },
}

#[derive(Clone, PartialEq, Debug)]
pub struct StatusLayout {
    pub flash_busy_bp: u8,
    pub eeprom_busy_bp: u8,
    pub error: ErrorField,
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum StatusError {
    Flag,
    Code(u8),
}

/// Decoded STATUS snapshot
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Status {
    pub flash_busy: bool,
    pub eeprom_busy: bool,
    pub error: Option<StatusError>,
}

impl Status {
    pub fn busy(&self) -> bool {
        self.flash_busy || self.eeprom_busy
    }
}

impl StatusLayout {
    pub fn decode(&self, status: u8) -> Status {
        let error = match self.error {
            ErrorField::Flag { bp } if status & (1 << bp) != 0 => Some(StatusError::Flag),
            ErrorField::Code { bm, bp } if status & bm != 0 => {
                Some(StatusError::Code((status & bm) >> bp))
            }
            _ => None,
        };

        Status {
            flash_busy: status & (1 << self.flash_busy_bp) != 0,
            eeprom_busy: status & (1 << self.eeprom_busy_bp) != 0,
            error,
        }
    }
}

/// Constant table describing one controller generation
#[derive(Clone, PartialEq, Debug)]
pub struct Variant {
    pub version: NvmVersion,
    pub registers: Registers,
    pub status: StatusLayout,
}

impl Variant {
    /// Default ready deadline, coded-error controllers are polled briefly
    pub fn ready_timeout_ms(&self, options: &Options) -> u32 {
        match self.status.error {
            ErrorField::Flag { .. } => options.legacy_ready_timeout_ms,
            ErrorField::Code { .. } => options.ready_timeout_ms,
        }
    }
}

/// Outcome of a ready poll that did not fail outright
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Readiness {
    Ready,
    /// Legacy write error bit set
    WriteError,
    TimedOut,
}

impl Readiness {
    fn check<E: Debug>(self, phase: Phase) -> Result<(), Error<E>> {
        match self {
            Readiness::Ready => Ok(()),
            Readiness::WriteError => Err(Error::WriteFailed(phase)),
            Readiness::TimedOut => Err(Error::ReadyTimeout(phase)),
        }
    }
}

/// State and register plumbing shared by every controller generation
pub struct Core<'a, RW, C> {
    rw: &'a mut RW,
    device: &'a DeviceInfo,
    clock: C,
    options: Options,
    variant: &'static Variant,
}

impl<'a, RW, C> Core<'a, RW, C>
where
    RW: ReadWrite,
    C: Clock + DelayMs<u32>,
{
    pub fn new(
        rw: &'a mut RW,
        device: &'a DeviceInfo,
        clock: C,
        options: Options,
        variant: &'static Variant,
    ) -> Self {
        Self {
            rw,
            device,
            clock,
            options,
            variant,
        }
    }

    pub fn variant(&self) -> &'static Variant {
        self.variant
    }

    pub fn device(&self) -> &'a DeviceInfo {
        self.device
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    fn register(&self, offset: u8) -> u32 {
        self.device.nvmctrl_base + offset as u32
    }

    pub(crate) fn write_register(&mut self, offset: u8, value: u8) -> Result<(), Error<RW::Error>> {
        let address = self.register(offset);
        self.rw.write_byte(address, value)
    }

    /// Write a command to CTRLA
    pub(crate) fn execute(&mut self, command: u8) -> Result<(), Error<RW::Error>> {
        debug!("NVMCMD {} executing", command);
        self.write_register(self.variant.registers.ctrla, command)
    }

    pub fn read_status(&mut self) -> Result<Status, Error<RW::Error>> {
        let address = self.register(self.variant.registers.status);
        let status = self.rw.read_byte(address)?;
        Ok(self.variant.status.decode(status))
    }

    /// Poll STATUS until the controller is idle
    ///
    /// Coded errors are raised immediately, the legacy error bit is
    /// returned for the caller to act on.
    pub fn poll_ready(&mut self, timeout_ms: u32) -> Result<Readiness, Error<RW::Error>> {
        let timeout = Timeout::new(self.clock.clone(), timeout_ms);

        debug!("Wait NVM ready");
        while !timeout.expired() {
            let status = self.read_status()?;

            match status.error {
                Some(StatusError::Code(code)) => {
                    error!("NVM error ({})", code);
                    return Err(Error::Controller { code });
                }
                Some(StatusError::Flag) => {
                    error!("NVM error");
                    return Ok(Readiness::WriteError);
                }
                None => (),
            }

            if !status.busy() {
                return Ok(Readiness::Ready);
            }

            if self.options.poll_delay_ms > 0 {
                self.clock.delay_ms(self.options.poll_delay_ms);
            }
        }

        error!("Wait NVM ready timed out");
        Ok(Readiness::TimedOut)
    }

    /// Wait for ready with the generation's default deadline
    pub(crate) fn wait_ready(&mut self, phase: Phase) -> Result<(), Error<RW::Error>> {
        let timeout_ms = self.variant.ready_timeout_ms(&self.options);
        self.poll_ready(timeout_ms)?.check(phase)
    }

    /// Wait for ready then clear CTRLA, reporting the wait failure first
    pub(crate) fn complete(&mut self, phase: Phase, nocmd: u8) -> Result<(), Error<RW::Error>> {
        let ready = self.wait_ready(phase);

        debug!("Clear NVM command");
        let cleared = self.execute(nocmd);

        ready?;
        cleared
    }

    /// Reject word loads of odd length before any command is issued
    pub(crate) fn check_load(
        &self,
        data: &[u8],
        word_access: bool,
    ) -> Result<(), Error<RW::Error>> {
        if word_access && data.len() % 2 != 0 {
            error!("Word write of {} bytes", data.len());
            return Err(Error::InvalidArgument("word write of odd length"));
        }
        Ok(())
    }

    /// Run the NOCMD tail after a failed data phase, keeping the data error
    pub(crate) fn abort(
        &mut self,
        phase: Phase,
        nocmd: u8,
        err: Error<RW::Error>,
    ) -> Error<RW::Error> {
        if let Err(e) = self.complete(phase, nocmd) {
            warn!("NVM cleanup after failed load: {}", e);
        }
        err
    }

    /// Load data into the page buffer or straight into NVM
    pub(crate) fn load(
        &mut self,
        address: u32,
        data: &[u8],
        word_access: bool,
        block_size: usize,
    ) -> Result<(), Error<RW::Error>> {
        if word_access {
            self.rw.write_data_words(address, data, block_size)
        } else {
            self.rw.write_data(address, data)
        }
    }

    pub(crate) fn write_data(&mut self, address: u32, data: &[u8]) -> Result<(), Error<RW::Error>> {
        self.rw.write_data(address, data)
    }

    pub(crate) fn pause(&mut self, ms: u32) {
        if ms > 0 {
            self.clock.delay_ms(ms);
        }
    }
}

/// NVM operations common to all controller generations
///
/// Operations a generation does not implement fail with
/// [`Error::Unsupported`].
pub trait Nvm {
    type Error: Debug;

    fn version(&self) -> NvmVersion;

    /// Erase flash, EEPROM (unless EESAVE) and lockbits
    ///
    /// Not possible on locked devices, those must be erased with the chip
    /// erase key instead.
    fn chip_erase(&mut self) -> Result<(), Error<Self::Error>>;

    fn write_flash(
        &mut self,
        address: u32,
        data: &[u8],
        options: &WriteOptions,
    ) -> Result<(), Error<Self::Error>>;

    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<(), Error<Self::Error>>;

    /// Write one fuse byte
    fn write_fuse(&mut self, address: u32, data: &[u8]) -> Result<(), Error<Self::Error>>;

    fn write_user_row(&mut self, _address: u32, _data: &[u8]) -> Result<(), Error<Self::Error>> {
        Err(Error::Unsupported {
            operation: "write_user_row",
            version: self.version(),
        })
    }

    fn erase_flash_page(&mut self, _address: u32) -> Result<(), Error<Self::Error>> {
        Err(Error::Unsupported {
            operation: "erase_flash_page",
            version: self.version(),
        })
    }

    fn erase_eeprom(&mut self) -> Result<(), Error<Self::Error>> {
        Err(Error::Unsupported {
            operation: "erase_eeprom",
            version: self.version(),
        })
    }

    fn erase_user_row(&mut self, _address: u32, _size: usize) -> Result<(), Error<Self::Error>> {
        Err(Error::Unsupported {
            operation: "erase_user_row",
            version: self.version(),
        })
    }
}

/// Controller for any supported generation, chosen from the descriptor
pub enum NvmController<'a, RW, C> {
    P0(NvmP0<'a, RW, C>),
    P2(NvmWordWrite<'a, RW, C>),
    P3(NvmPaged<'a, RW, C>),
    P4(NvmWordWrite<'a, RW, C>),
    P5(NvmPaged<'a, RW, C>),
}

macro_rules! dispatch {
    ($self:ident, $n:ident => $e:expr) => {
        match $self {
            NvmController::P0($n) => $e,
            NvmController::P2($n) => $e,
            NvmController::P3($n) => $e,
            NvmController::P4($n) => $e,
            NvmController::P5($n) => $e,
        }
    };
}

impl<'a, RW, C> NvmController<'a, RW, C>
where
    RW: ReadWrite,
    C: Clock + DelayMs<u32>,
{
    /// Bind a controller for `device` to a register interface
    pub fn new(rw: &'a mut RW, device: &'a DeviceInfo, clock: C, options: Options) -> Self {
        debug!(
            "Using NVM {} controller for {}",
            device.nvm_version, device.name
        );

        match device.nvm_version {
            NvmVersion::P0 => Self::P0(NvmP0::new(Core::new(
                rw,
                device,
                clock,
                options,
                &v0::VARIANT,
            ))),
            NvmVersion::P2 => Self::P2(NvmWordWrite::new(Core::new(
                rw,
                device,
                clock,
                options,
                &v1::VARIANT_P2,
            ))),
            NvmVersion::P3 => Self::P3(NvmPaged::new(Core::new(
                rw,
                device,
                clock,
                options,
                &v3::VARIANT_P3,
            ))),
            NvmVersion::P4 => Self::P4(NvmWordWrite::new(Core::new(
                rw,
                device,
                clock,
                options,
                &v1::VARIANT_P4,
            ))),
            NvmVersion::P5 => Self::P5(NvmPaged::new(Core::new(
                rw,
                device,
                clock,
                options,
                &v3::VARIANT_P5,
            ))),
        }
    }

    /// Poll for ready with an explicit deadline
    ///
    /// Returns false on timeout or a legacy write error, coded errors are
    /// raised.
    pub fn wait_ready_with(&mut self, timeout_ms: u32) -> Result<bool, Error<RW::Error>> {
        let r = dispatch!(self, n => n.core_mut().poll_ready(timeout_ms))?;
        Ok(r == Readiness::Ready)
    }
}

impl<'a, RW, C> Nvm for NvmController<'a, RW, C>
where
    RW: ReadWrite,
    C: Clock + DelayMs<u32>,
{
    type Error = RW::Error;

    fn version(&self) -> NvmVersion {
        dispatch!(self, n => n.version())
    }

    fn chip_erase(&mut self) -> Result<(), Error<RW::Error>> {
        dispatch!(self, n => n.chip_erase())
    }

    fn write_flash(
        &mut self,
        address: u32,
        data: &[u8],
        options: &WriteOptions,
    ) -> Result<(), Error<RW::Error>> {
        dispatch!(self, n => n.write_flash(address, data, options))
    }

    fn write_eeprom(&mut self, address: u32, data: &[u8]) -> Result<(), Error<RW::Error>> {
        dispatch!(self, n => n.write_eeprom(address, data))
    }

    fn write_fuse(&mut self, address: u32, data: &[u8]) -> Result<(), Error<RW::Error>> {
        dispatch!(self, n => n.write_fuse(address, data))
    }

    fn write_user_row(&mut self, address: u32, data: &[u8]) -> Result<(), Error<RW::Error>> {
        dispatch!(self, n => n.write_user_row(address, data))
    }

    fn erase_flash_page(&mut self, address: u32) -> Result<(), Error<RW::Error>> {
        dispatch!(self, n => n.erase_flash_page(address))
    }

    fn erase_eeprom(&mut self) -> Result<(), Error<RW::Error>> {
        dispatch!(self, n => n.erase_eeprom())
    }

    fn erase_user_row(&mut self, address: u32, size: usize) -> Result<(), Error<RW::Error>> {
        dispatch!(self, n => n.erase_user_row(address, size))
    }
}
