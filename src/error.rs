use core::fmt::{self, Debug};

use crate::device::NvmVersion;

/// Step of an NVM operation a ready poll belonged to
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Phase {
    BeforeChipErase,
    AfterChipErase,
    BeforePageBufferClear,
    AfterPageBufferClear,
    AfterPageWrite,
    BeforeCommand,
    AfterDataWrite,
    BeforeFuseWrite,
    AfterFuseWrite,
    BeforePageErase,
    AfterPageErase,
    BeforeEepromErase,
    AfterEepromErase,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::BeforeChipErase => "before chip erase",
            Phase::AfterChipErase => "after chip erase",
            Phase::BeforePageBufferClear => "before page buffer clear",
            Phase::AfterPageBufferClear => "after page buffer clear",
            Phase::AfterPageWrite => "after page write",
            Phase::BeforeCommand => "before command write",
            Phase::AfterDataWrite => "after data write",
            Phase::BeforeFuseWrite => "before fuse write",
            Phase::AfterFuseWrite => "after fuse write",
            Phase::BeforePageErase => "before flash page erase",
            Phase::AfterPageErase => "after flash page erase",
            Phase::BeforeEepromErase => "before EEPROM erase",
            Phase::AfterEepromErase => "after EEPROM erase",
        };
        f.write_str(s)
    }
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError: Debug> {
    /// Underlying serial port failed
    #[error("serial error: {0:?}")]
    Serial(SerialError),

    /// Target did not acknowledge a store
    #[error("no ACK received from target")]
    NoAck,

    /// Target responded with an unexpected byte count or value
    #[error("invalid response from target")]
    InvalidResponse,

    /// NVM controller did not report ready before the deadline
    #[error("timeout waiting for NVM controller ready {0}")]
    ReadyTimeout(Phase),

    /// Legacy controllers flag write errors without a code
    #[error("NVM write error {0}")]
    WriteFailed(Phase),

    /// Coded error from the NVM controller status register
    #[error("NVM controller error (code {code})")]
    Controller { code: u8 },

    /// Operation not implemented by this controller generation
    #[error("{operation} is not supported by NVM {version} controllers")]
    Unsupported {
        operation: &'static str,
        version: NvmVersion,
    },

    /// Target did not enter NVM programming mode
    #[error("failed to enter NVM programming mode")]
    ProgModeFailed,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl<SerialError: Debug> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}
