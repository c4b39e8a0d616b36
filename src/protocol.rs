//! UPDI physical and data-link constants.

/// Break character, sent as the opening handshake and as the double break
pub const UPDI_BREAK: u8 = 0x00;

/// Synchronisation character prefixing every instruction
pub const UPDI_SYNC: u8 = 0x55;

/// Acknowledge returned by the target after stores
pub const UPDI_ACK: u8 = 0x40;

/// Maximum number of repeats for a single REPEAT instruction
pub const MAX_REPEAT: usize = 256;

/// Baud rate used for the double break
pub const DOUBLE_BREAK_BAUD: usize = 300;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Instruction {
    /// Load from data space using direct addressing
    Lds = 0x00,

    /// Store to data space using direct addressing
    Sts = 0x40,

    /// Load from data space through the pointer register
    Ld = 0x20,

    /// Store to data space through the pointer register
    St = 0x60,

    /// Load from the UPDI control and status space
    Ldcs = 0x80,

    /// Store to the UPDI control and status space
    Stcs = 0xC0,

    /// Repeat the next instruction
    Repeat = 0xA0,

    /// Send a key, or request the system information block
    Key = 0xE0,
}

impl From<Instruction> for u8 {
    fn from(i: Instruction) -> u8 {
        i as u8
    }
}

/// Pointer access modes for LD/ST
pub const PTR: u8 = 0x00;
pub const PTR_INC: u8 = 0x04;
pub const PTR_ADDRESS: u8 = 0x08;

/// Address sizes for LDS/STS
pub const ADDRESS_16: u8 = 0x04;
pub const ADDRESS_24: u8 = 0x08;

/// Data sizes
pub const DATA_8: u8 = 0x00;
pub const DATA_16: u8 = 0x01;
pub const DATA_24: u8 = 0x02;

/// REPEAT with a one byte count
pub const REPEAT_BYTE: u8 = 0x00;

/// KEY instruction: send a 64-bit key
pub const KEY_KEY: u8 = 0x00;
pub const KEY_64: u8 = 0x00;

/// Key enabling NVM programming
pub const KEY_NVM: &[u8; 8] = b"NVMProg ";

/// Control and status space registers
pub const CS_STATUSA: u8 = 0x00;
pub const CS_CTRLA: u8 = 0x02;
pub const CS_CTRLB: u8 = 0x03;

pub const ASI_KEY_STATUS: u8 = 0x07;
pub const ASI_RESET_REQ: u8 = 0x08;
pub const ASI_SYS_STATUS: u8 = 0x0B;

/// CTRLA: inter-byte delay enable
pub const CTRLA_IBDLY_BIT: u8 = 7;
/// CTRLA: response signature disable
pub const CTRLA_RSD_BIT: u8 = 3;
/// CTRLB: collision detection disable
pub const CTRLB_CCDETDIS_BIT: u8 = 3;
/// CTRLB: UPDI disable
pub const CTRLB_UPDIDIS_BIT: u8 = 2;

pub const KEY_STATUS_NVMPROG_BIT: u8 = 4;
pub const SYS_STATUS_NVMPROG_BIT: u8 = 3;
pub const SYS_STATUS_LOCKSTATUS_BIT: u8 = 0;

/// Written to ASI_RESET_REQ to hold the target in reset
pub const RESET_REQ_VALUE: u8 = 0x59;
