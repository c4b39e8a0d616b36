//! AVR UPDI NVM programmer.
//!
//! Drives the on-chip NVM controller of UPDI parts (tinyAVR 0/1/2,
//! megaAVR 0, AVR DA/DB/DD/DU/EA/EB) through data-space register access over
//! a single wire serial link.

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

pub mod device;
pub mod error;
pub mod link;
pub mod nvm;
pub mod physical;
pub mod protocol;
pub mod timeout;

#[cfg(feature = "linux")]
pub mod linux;

pub use device::{DeviceInfo, NvmVersion};
pub use error::{Error, Phase};
pub use link::{ReadWrite, UpdiLink};
pub use nvm::{BulkMode, Nvm, NvmController, WriteOptions};
pub use physical::{SerialPort, UpdiPhysical};
pub use timeout::{Clock, StdClock, Timeout};

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout waiting for legacy (P:0, P:2, P:4) NVM controllers to become ready
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "10000"))]
    pub legacy_ready_timeout_ms: u32,

    /// Timeout waiting for modern (P:3, P:5) NVM controllers to become ready
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub ready_timeout_ms: u32,

    /// Period between NVM status polls and empty serial reads
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0"))]
    pub poll_delay_ms: u32,

    /// Pause after a fuse write before checking for completion
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub fuse_write_delay_ms: u32,

    /// Number of empty serial reads tolerated before a receive gives up
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "3"))]
    pub receive_retries: u32,

    /// Serial port read timeout
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1000"))]
    pub read_timeout_ms: u32,

    /// Period to wait after a double break before draining the echo
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub break_settle_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            legacy_ready_timeout_ms: 10_000,
            ready_timeout_ms: 100,
            poll_delay_ms: 0,
            fuse_write_delay_ms: 1,
            receive_retries: 3,
            read_timeout_ms: 1000,
            break_settle_ms: 100,
        }
    }
}
