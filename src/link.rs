//! UPDI data link and data-space register access.

use core::fmt::Debug;

use embedded_hal::blocking::delay::DelayMs;

use crate::device::AddressWidth;
use crate::physical::{SerialPort, UpdiPhysical};
use crate::protocol::*;
use crate::timeout::{Clock, Timeout};
use crate::Error;

/// Byte and word access to the target data space
///
/// This is the only path the NVM controllers use to reach the target.
pub trait ReadWrite {
    type Error: Debug;

    fn read_byte(&mut self, address: u32) -> Result<u8, Error<Self::Error>>;

    fn write_byte(&mut self, address: u32, value: u8) -> Result<(), Error<Self::Error>>;

    /// Byte-granular bulk write
    fn write_data(&mut self, address: u32, data: &[u8]) -> Result<(), Error<Self::Error>>;

    /// Word-granular bulk write, `block_size` bytes per transport transfer
    fn write_data_words(
        &mut self,
        address: u32,
        data: &[u8],
        block_size: usize,
    ) -> Result<(), Error<Self::Error>>;

    fn read_data(&mut self, address: u32, size: usize) -> Result<Vec<u8>, Error<Self::Error>>;
}

pub struct UpdiLink<P, D, E, C> {
    phy: UpdiPhysical<P, D, E>,
    width: AddressWidth,
    clock: C,
    progmode_timeout_ms: u32,
}

impl<P, D, E, C> UpdiLink<P, D, E, C>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: Debug,
    C: Clock,
{
    pub fn new(phy: UpdiPhysical<P, D, E>, width: AddressWidth, clock: C) -> Self {
        Self {
            phy,
            width,
            clock,
            progmode_timeout_ms: 100,
        }
    }

    /// Bring up the data link, double-breaking once if the target is silent
    pub fn init(&mut self) -> Result<(), Error<E>> {
        self.init_datalink()?;
        if self.check()? {
            return Ok(());
        }

        info!("UPDI not responding, sending double break");
        self.phy.send_double_break()?;

        self.init_datalink()?;
        if self.check()? {
            return Ok(());
        }

        error!("UPDI initialisation failed");
        Err(Error::InvalidResponse)
    }

    fn init_datalink(&mut self) -> Result<(), Error<E>> {
        // Collision detection off, inter-byte delay on
        self.stcs(CS_CTRLB, 1 << CTRLB_CCDETDIS_BIT)?;
        self.stcs(CS_CTRLA, 1 << CTRLA_IBDLY_BIT)
    }

    fn check(&mut self) -> Result<bool, Error<E>> {
        match self.ldcs(CS_STATUSA) {
            Ok(v) if v != 0 => {
                debug!("UPDI init OK (STATUSA 0x{:02x})", v);
                Ok(true)
            }
            Ok(_) | Err(Error::InvalidResponse) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Load a control/status register
    pub fn ldcs(&mut self, address: u8) -> Result<u8, Error<E>> {
        self.phy
            .send(&[UPDI_SYNC, u8::from(Instruction::Ldcs) | (address & 0x0F)])?;
        let r = self.phy.receive(1)?;
        match r.as_slice() {
            [v] => Ok(*v),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Store a control/status register
    pub fn stcs(&mut self, address: u8, value: u8) -> Result<(), Error<E>> {
        self.phy.send(&[
            UPDI_SYNC,
            u8::from(Instruction::Stcs) | (address & 0x0F),
            value,
        ])
    }

    /// Send a 64-bit key
    pub fn key(&mut self, key: &[u8; 8]) -> Result<(), Error<E>> {
        debug!("Sending key");
        self.phy
            .send(&[UPDI_SYNC, u8::from(Instruction::Key) | KEY_KEY | KEY_64])?;

        // Keys go out LSB first
        let mut k = *key;
        k.reverse();
        self.phy.send(&k)
    }

    fn address_bytes(&self, address: u32) -> (u8, Vec<u8>) {
        let a = address.to_le_bytes();
        match self.width {
            AddressWidth::Bits16 => (ADDRESS_16, a[..2].to_vec()),
            AddressWidth::Bits24 => (ADDRESS_24, a[..3].to_vec()),
        }
    }

    fn wait_ack(&mut self) -> Result<(), Error<E>> {
        match self.phy.receive(1)?.as_slice() {
            [UPDI_ACK] => Ok(()),
            r => {
                error!("Expected ACK, received {:02x?}", r);
                Err(Error::NoAck)
            }
        }
    }

    fn ld(&mut self, address: u32) -> Result<u8, Error<E>> {
        let (size, addr) = self.address_bytes(address);

        let mut frame = vec![UPDI_SYNC, u8::from(Instruction::Lds) | size | DATA_8];
        frame.extend_from_slice(&addr);
        self.phy.send(&frame)?;

        match self.phy.receive(1)?.as_slice() {
            [v] => Ok(*v),
            _ => Err(Error::InvalidResponse),
        }
    }

    fn st(&mut self, address: u32, value: u8) -> Result<(), Error<E>> {
        let (size, addr) = self.address_bytes(address);

        let mut frame = vec![UPDI_SYNC, u8::from(Instruction::Sts) | size | DATA_8];
        frame.extend_from_slice(&addr);
        self.phy.send(&frame)?;
        self.wait_ack()?;

        self.phy.send(&[value])?;
        self.wait_ack()
    }

    fn st16(&mut self, address: u32, value: [u8; 2]) -> Result<(), Error<E>> {
        let (size, addr) = self.address_bytes(address);

        let mut frame = vec![UPDI_SYNC, u8::from(Instruction::Sts) | size | DATA_16];
        frame.extend_from_slice(&addr);
        self.phy.send(&frame)?;
        self.wait_ack()?;

        self.phy.send(&value)?;
        self.wait_ack()
    }

    fn st_ptr(&mut self, address: u32) -> Result<(), Error<E>> {
        let a = address.to_le_bytes();
        let (data_size, addr) = match self.width {
            AddressWidth::Bits16 => (DATA_16, &a[..2]),
            AddressWidth::Bits24 => (DATA_24, &a[..3]),
        };

        let mut frame = vec![
            UPDI_SYNC,
            u8::from(Instruction::St) | PTR_ADDRESS | data_size,
        ];
        frame.extend_from_slice(addr);
        self.phy.send(&frame)?;
        self.wait_ack()
    }

    fn repeat(&mut self, count: usize) -> Result<(), Error<E>> {
        if count == 0 || count > MAX_REPEAT {
            return Err(Error::InvalidArgument("repeat count out of range"));
        }

        self.phy.send(&[
            UPDI_SYNC,
            u8::from(Instruction::Repeat) | REPEAT_BYTE,
            (count - 1) as u8,
        ])
    }

    fn st_ptr_inc(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        self.phy.send(&[
            UPDI_SYNC,
            u8::from(Instruction::St) | PTR_INC | DATA_8,
            data[0],
        ])?;
        self.wait_ack()?;

        for b in &data[1..] {
            self.phy.send(&[*b])?;
            self.wait_ack()?;
        }

        Ok(())
    }

    fn st_ptr_inc16(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        self.phy.send(&[
            UPDI_SYNC,
            u8::from(Instruction::St) | PTR_INC | DATA_16,
            data[0],
            data[1],
        ])?;
        self.wait_ack()?;

        for w in data[2..].chunks(2) {
            self.phy.send(w)?;
            self.wait_ack()?;
        }

        Ok(())
    }

    /// Word stores with response signatures disabled
    ///
    /// No ACKs are returned, so data is streamed `block_size` bytes per send.
    fn st_ptr_inc16_rsd(&mut self, data: &[u8], block_size: usize) -> Result<(), Error<E>> {
        debug!(
            "ST16 to *ptr++ with RSD, {} bytes in blocks of {}",
            data.len(),
            block_size
        );

        self.stcs(CS_CTRLA, (1 << CTRLA_IBDLY_BIT) | (1 << CTRLA_RSD_BIT))?;
        self.repeat(data.len() / 2)?;
        self.phy
            .send(&[UPDI_SYNC, u8::from(Instruction::St) | PTR_INC | DATA_16])?;

        for block in data.chunks(block_size) {
            self.phy.send(block)?;
        }

        self.stcs(CS_CTRLA, 1 << CTRLA_IBDLY_BIT)
    }

    fn ld_ptr_inc(&mut self, size: usize) -> Result<Vec<u8>, Error<E>> {
        self.phy
            .send(&[UPDI_SYNC, u8::from(Instruction::Ld) | PTR_INC | DATA_8])?;

        let data = self.phy.receive(size)?;
        if data.len() != size {
            return Err(Error::InvalidResponse);
        }

        Ok(data)
    }

    fn reset(&mut self, apply: bool) -> Result<(), Error<E>> {
        let v = if apply { RESET_REQ_VALUE } else { 0x00 };
        self.stcs(ASI_RESET_REQ, v)
    }

    /// Check whether the target is in NVM programming mode
    pub fn in_prog_mode(&mut self) -> Result<bool, Error<E>> {
        let status = self.ldcs(ASI_SYS_STATUS)?;
        Ok(status & (1 << SYS_STATUS_NVMPROG_BIT) != 0)
    }

    /// Enter NVM programming mode using the NVMProg key
    ///
    /// Locked parts will not enter programming mode, they must be unlocked
    /// with the chip erase key first.
    pub fn enter_progmode(&mut self) -> Result<(), Error<E>> {
        if self.in_prog_mode()? {
            debug!("Already in NVM programming mode");
            return Ok(());
        }

        info!("Entering NVM programming mode");
        self.key(KEY_NVM)?;

        let key_status = self.ldcs(ASI_KEY_STATUS)?;
        debug!("Key status = 0x{:02x}", key_status);
        if key_status & (1 << KEY_STATUS_NVMPROG_BIT) == 0 {
            error!("Key not accepted");
            return Err(Error::ProgModeFailed);
        }

        self.reset(true)?;
        self.reset(false)?;

        let timeout = Timeout::new(self.clock.clone(), self.progmode_timeout_ms);
        while !timeout.expired() {
            let status = self.ldcs(ASI_SYS_STATUS)?;
            if status & (1 << SYS_STATUS_LOCKSTATUS_BIT) != 0 {
                continue;
            }
            if status & (1 << SYS_STATUS_NVMPROG_BIT) != 0 {
                info!("Now in NVM programming mode");
                return Ok(());
            }
        }

        error!("Timeout waiting for NVM programming mode");
        Err(Error::ProgModeFailed)
    }

    /// Reset the target and disable UPDI
    pub fn leave_progmode(&mut self) -> Result<(), Error<E>> {
        info!("Leaving NVM programming mode");

        self.reset(true)?;
        self.reset(false)?;
        self.stcs(
            CS_CTRLB,
            (1 << CTRLB_UPDIDIS_BIT) | (1 << CTRLB_CCDETDIS_BIT),
        )
    }
}

impl<P, D, E, C> ReadWrite for UpdiLink<P, D, E, C>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: Debug,
    C: Clock,
{
    type Error = E;

    fn read_byte(&mut self, address: u32) -> Result<u8, Error<E>> {
        self.ld(address)
    }

    fn write_byte(&mut self, address: u32, value: u8) -> Result<(), Error<E>> {
        self.st(address, value)
    }

    fn write_data(&mut self, address: u32, data: &[u8]) -> Result<(), Error<E>> {
        match data.len() {
            0 => Ok(()),
            1 => self.st(address, data[0]),
            2 => {
                self.st(address, data[0])?;
                self.st(address + 1, data[1])
            }
            _ => {
                for (i, chunk) in data.chunks(MAX_REPEAT).enumerate() {
                    self.st_ptr(address + (i * MAX_REPEAT) as u32)?;
                    self.repeat(chunk.len())?;
                    self.st_ptr_inc(chunk)?;
                }
                Ok(())
            }
        }
    }

    fn write_data_words(
        &mut self,
        address: u32,
        data: &[u8],
        block_size: usize,
    ) -> Result<(), Error<E>> {
        if data.len() % 2 != 0 {
            return Err(Error::InvalidArgument("word write of odd length"));
        }

        match data.len() {
            0 => Ok(()),
            2 => self.st16(address, [data[0], data[1]]),
            _ => {
                let max = MAX_REPEAT * 2;
                for (i, chunk) in data.chunks(max).enumerate() {
                    self.st_ptr(address + (i * max) as u32)?;
                    if block_size <= 2 {
                        self.repeat(chunk.len() / 2)?;
                        self.st_ptr_inc16(chunk)?;
                    } else {
                        self.st_ptr_inc16_rsd(chunk, block_size)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn read_data(&mut self, address: u32, size: usize) -> Result<Vec<u8>, Error<E>> {
        if size == 1 {
            return self.ld(address).map(|v| vec![v]);
        }

        let mut data = Vec::with_capacity(size);
        let mut offset = 0;
        while offset < size {
            let n = (size - offset).min(MAX_REPEAT);
            self.st_ptr(address + offset as u32)?;
            if n > 1 {
                self.repeat(n)?;
            }
            data.extend(self.ld_ptr_inc(n)?);
            offset += n;
        }

        Ok(data)
    }
}
