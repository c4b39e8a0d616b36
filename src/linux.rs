use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use linux_embedded_hal::{Delay, Serial};
use serial_core::{
    BaudRate, CharSize, Error as SerialError, ErrorKind, FlowControl, SerialDevice as _,
    SerialPortSettings as _, StopBits as CoreStopBits,
};

use crate::physical::{LineConfig, Parity, SerialPort, StopBits, UpdiPhysical};
use crate::{Error, Options};

fn io_kind(e: SerialError) -> IoErrorKind {
    match e.kind() {
        ErrorKind::Io(k) => k,
        ErrorKind::NoDevice => IoErrorKind::NotFound,
        ErrorKind::InvalidInput => IoErrorKind::InvalidInput,
    }
}

impl SerialPort<IoErrorKind> for Serial {
    fn configure(&mut self, line: &LineConfig) -> Result<(), IoErrorKind> {
        let mut settings = self.0.read_settings().map_err(io_kind)?;

        settings.set_char_size(CharSize::Bits8);
        settings
            .set_baud_rate(BaudRate::from_speed(line.baud))
            .map_err(io_kind)?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(match line.parity {
            Parity::None => serial_core::Parity::ParityNone,
            Parity::Even => serial_core::Parity::ParityEven,
        });
        settings.set_stop_bits(match line.stop_bits {
            StopBits::One => CoreStopBits::Stop1,
            StopBits::Two => CoreStopBits::Stop2,
        });

        self.0.write_settings(&settings).map_err(io_kind)
    }

    fn set_rts(&mut self, level: bool) -> Result<(), IoErrorKind> {
        self.0.set_rts(level).map_err(io_kind)
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), IoErrorKind> {
        self.0.set_dtr(level).map_err(io_kind)
    }
}

impl UpdiPhysical<Serial, Delay, IoErrorKind> {
    /// Open a linux serial port as a UPDI physical layer
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, Error<IoErrorKind>> {
        debug!("Opening serial port {}", port.as_ref().display());

        // Open port
        let mut port = Serial::open(port.as_ref()).map_err(io_kind)?;

        port.0
            .set_timeout(Duration::from_millis(options.read_timeout_ms as u64))
            .map_err(io_kind)?;

        Self::new(port, Delay {}, baud, options)
    }
}
