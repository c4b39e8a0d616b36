//! UPDI physical layer over a half-duplex serial line.
//!
//! UPDI is a single wire interface, everything transmitted is echoed back on
//! the receive line and must be drained before reading responses.

use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use crate::protocol::{DOUBLE_BREAK_BAUD, UPDI_BREAK};
use crate::{Error, Options};

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Parity {
    None,
    Even,
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum StopBits {
    One,
    Two,
}

/// Serial line configuration (always 8 data bits)
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct LineConfig {
    pub baud: usize,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl LineConfig {
    /// Line settings for normal UPDI traffic (8E2)
    pub fn updi(baud: usize) -> Self {
        Self {
            baud,
            parity: Parity::Even,
            stop_bits: StopBits::Two,
        }
    }

    /// Line settings for the double break (300 baud 8E1)
    ///
    /// A 0x00 character at 300 baud holds the line low for ~33ms, which
    /// exceeds the 24.6ms minimum break duration.
    pub fn double_break() -> Self {
        Self {
            baud: DOUBLE_BREAK_BAUD,
            parity: Parity::Even,
            stop_bits: StopBits::One,
        }
    }
}

pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {
    fn configure(&mut self, line: &LineConfig) -> Result<(), E>;
    fn set_rts(&mut self, level: bool) -> Result<(), E>;
    fn set_dtr(&mut self, level: bool) -> Result<(), E>;
}

pub struct UpdiPhysical<P, D, E> {
    port: P,
    delay: D,
    line: LineConfig,
    options: Options,
    _err: PhantomData<E>,
}

impl<P, D, E> UpdiPhysical<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Configure the port for UPDI and send the opening break
    pub fn new(port: P, delay: D, baud: usize, options: Options) -> Result<Self, Error<E>> {
        let mut p = Self {
            port,
            delay,
            line: LineConfig::updi(baud),
            options,
            _err: PhantomData,
        };

        p.initialise()?;

        // Send an initial break as handshake
        p.send(&[UPDI_BREAK])?;

        Ok(p)
    }

    fn initialise(&mut self) -> Result<(), Error<E>> {
        info!("Configuring port at {} baud", self.line.baud);

        self.port.configure(&self.line)?;
        self.port.set_dtr(false)?;
        self.port.set_rts(false)?;

        Ok(())
    }

    /// Current session baud rate
    pub fn baud(&self) -> usize {
        self.line.baud
    }

    /// Switch the session to a new baud rate
    pub fn change_baud(&mut self, baud: usize) -> Result<(), Error<E>> {
        info!("Switching to {} baud", baud);

        self.line.baud = baud;
        self.port.configure(&self.line)?;

        Ok(())
    }

    /// Send bytes and drain the echo
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        debug!("send {} bytes", data.len());
        trace!("data: {:02x?}", data);

        for b in data {
            block!(self.port.write(*b))?;
        }
        block!(self.port.flush())?;

        // Everything we send comes back
        let echo = self.receive(data.len())?;
        if echo.len() != data.len() {
            debug!("Echo incomplete ({} of {} bytes)", echo.len(), data.len());
        }

        Ok(())
    }

    /// Receive up to `size` bytes
    ///
    /// Empty reads are retried `receive_retries` times in total before
    /// returning whatever was collected. Short reads are logged, not raised,
    /// callers must check the length.
    pub fn receive(&mut self, size: usize) -> Result<Vec<u8>, Error<E>> {
        let mut response = Vec::with_capacity(size);
        let mut retry = self.options.receive_retries;

        while response.len() < size && retry > 0 {
            match self.port.read() {
                Ok(v) => response.push(v),
                Err(nb::Error::WouldBlock) => {
                    retry -= 1;
                    if self.options.poll_delay_ms > 0 {
                        self.delay.delay_ms(self.options.poll_delay_ms);
                    }
                }
                Err(nb::Error::Other(e)) => return Err(e.into()),
            }
        }

        if response.len() == size {
            trace!("Received expected number of bytes: {:02x?}", response);
        } else if response.is_empty() {
            debug!(
                "Expected {} bytes but received nothing, check connections",
                size
            );
        } else {
            debug!(
                "Expected {} bytes but received only {}",
                size,
                response.len()
            );
        }

        Ok(response)
    }

    /// Send a double break to reset the UPDI port
    ///
    /// This is a single break lasting at least twice a normal break, used to
    /// resynchronise a target whose UPDI state is unknown. The line is
    /// dropped to 300 baud, one 0x00 is sent and drained, then the session
    /// settings are restored.
    pub fn send_double_break(&mut self) -> Result<(), Error<E>> {
        info!("Sending double break");

        self.port.configure(&LineConfig::double_break())?;
        self.port.set_dtr(false)?;
        self.port.set_rts(false)?;

        block!(self.port.write(UPDI_BREAK))?;
        block!(self.port.flush())?;

        self.delay.delay_ms(self.options.break_settle_ms);

        // Discard the break echo
        let _ = self.receive(1)?;

        info!("Double break sent, re-initialising port");

        self.initialise()
    }
}
