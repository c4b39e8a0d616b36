#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use updi_nvm::device::DeviceInfo;
use updi_nvm::link::ReadWrite;
use updi_nvm::nvm::NvmController;
use updi_nvm::physical::{LineConfig, SerialPort};
use updi_nvm::protocol::*;
use updi_nvm::timeout::Clock;
use updi_nvm::{Error, Options};

#[derive(Clone, Debug, PartialEq)]
pub struct FakeError;

/// Clock that moves forward by `step` ms every time it is sampled
#[derive(Clone)]
pub struct FakeClock {
    now: Rc<Cell<u64>>,
    step: u64,
    delays: Rc<RefCell<Vec<u32>>>,
}

impl FakeClock {
    pub fn new(step: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            step,
            delays: Rc::new(RefCell::new(vec![])),
        }
    }

    pub fn delays(&self) -> Vec<u32> {
        self.delays.borrow().clone()
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        let t = self.now.get();
        self.now.set(t + self.step);
        t
    }
}

impl DelayMs<u32> for FakeClock {
    fn delay_ms(&mut self, ms: u32) {
        self.delays.borrow_mut().push(ms);
        self.now.set(self.now.get() + ms as u64);
    }
}

/// Register facade operation, as seen by the target
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Read(u32),
    Write(u32, u8),
    Data(u32, Vec<u8>),
    Words(u32, Vec<u8>, usize),
}

/// Recording register facade
///
/// Reads of the status register return scripted values, falling back to
/// `idle_status` once the script runs out. Everything else is backed by a
/// sparse memory.
pub struct FakeRegisters {
    pub ops: Vec<Op>,
    pub memory: HashMap<u32, u8>,
    status_address: u32,
    status: VecDeque<u8>,
    pub idle_status: u8,
    /// Block writes fail with a missing ACK
    pub fail_data: bool,
}

impl FakeRegisters {
    pub fn new(status_address: u32) -> Self {
        Self {
            ops: vec![],
            memory: HashMap::new(),
            status_address,
            status: VecDeque::new(),
            idle_status: 0x00,
            fail_data: false,
        }
    }

    /// Status register at `nvmctrl_base + offset` for `device`
    pub fn for_device(device: &DeviceInfo, status_offset: u8) -> Self {
        Self::new(device.nvmctrl_base + status_offset as u32)
    }

    pub fn script_status(&mut self, values: &[u8]) {
        self.status.extend(values.iter().copied());
    }

    /// All single byte writes to `address`, in order
    pub fn writes_to(&self, address: u32) -> Vec<u8> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Write(a, v) if *a == address => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Operations with status polling removed
    pub fn transfers(&self) -> Vec<Op> {
        let s = self.status_address;
        self.ops
            .iter()
            .filter(|op| **op != Op::Read(s))
            .cloned()
            .collect()
    }

    pub fn status_reads(&self) -> usize {
        let s = self.status_address;
        self.ops.iter().filter(|op| **op == Op::Read(s)).count()
    }
}

impl ReadWrite for FakeRegisters {
    type Error = FakeError;

    fn read_byte(&mut self, address: u32) -> Result<u8, Error<FakeError>> {
        self.ops.push(Op::Read(address));
        if address == self.status_address {
            return Ok(self.status.pop_front().unwrap_or(self.idle_status));
        }
        Ok(*self.memory.get(&address).unwrap_or(&0xFF))
    }

    fn write_byte(&mut self, address: u32, value: u8) -> Result<(), Error<FakeError>> {
        self.ops.push(Op::Write(address, value));
        self.memory.insert(address, value);
        Ok(())
    }

    fn write_data(&mut self, address: u32, data: &[u8]) -> Result<(), Error<FakeError>> {
        self.ops.push(Op::Data(address, data.to_vec()));
        if self.fail_data {
            return Err(Error::NoAck);
        }
        for (i, b) in data.iter().enumerate() {
            self.memory.insert(address + i as u32, *b);
        }
        Ok(())
    }

    fn write_data_words(
        &mut self,
        address: u32,
        data: &[u8],
        block_size: usize,
    ) -> Result<(), Error<FakeError>> {
        self.ops
            .push(Op::Words(address, data.to_vec(), block_size));
        if self.fail_data {
            return Err(Error::NoAck);
        }
        for (i, b) in data.iter().enumerate() {
            self.memory.insert(address + i as u32, *b);
        }
        Ok(())
    }

    fn read_data(&mut self, address: u32, size: usize) -> Result<Vec<u8>, Error<FakeError>> {
        Ok((0..size as u32)
            .map(|i| *self.memory.get(&(address + i)).unwrap_or(&0xFF))
            .collect())
    }
}

/// Options with short deadlines so timeouts resolve quickly
pub fn fast_options() -> Options {
    Options {
        legacy_ready_timeout_ms: 50,
        ready_timeout_ms: 20,
        ..Options::default()
    }
}

/// Instruction decoder state of the simulated target
#[derive(Clone, Debug, PartialEq)]
enum Rx {
    Idle,
    Opcode,
    Address { op: u8, bytes: Vec<u8>, len: usize },
    StoreData { address: u32, bytes: Vec<u8>, len: usize },
    CsValue(u8),
    Pointer { bytes: Vec<u8>, len: usize },
    PtrData { bytes: Vec<u8>, len: usize, remaining: usize },
    RepeatCount,
    Key(Vec<u8>),
}

/// Simulated UPDI target state, shared with the test body
pub struct TargetState {
    pub memory: HashMap<u32, u8>,
    pub cs: [u8; 16],
    pub lines: Vec<LineConfig>,
    pub tx: Vec<u8>,
    pub rx: VecDeque<u8>,
    pub reads: usize,
    pub rts: Vec<bool>,
    pub dtr: Vec<bool>,
    /// Target ignores everything until a double break
    pub asleep: bool,
    /// Target drops ACKs
    pub mute: bool,
    pointer: u32,
    repeat: usize,
    state: Rx,
}

impl TargetState {
    fn new() -> Self {
        let mut cs = [0u8; 16];
        // UPDI revision in STATUSA
        cs[CS_STATUSA as usize] = 0x30;

        Self {
            memory: HashMap::new(),
            cs,
            lines: vec![],
            tx: vec![],
            rx: VecDeque::new(),
            reads: 0,
            rts: vec![],
            dtr: vec![],
            asleep: false,
            mute: false,
            pointer: 0,
            repeat: 0,
            state: Rx::Idle,
        }
    }

    fn ack(&mut self) {
        if !self.mute && self.cs[CS_CTRLA as usize] & (1 << CTRLA_RSD_BIT) == 0 {
            self.rx.push_back(UPDI_ACK);
        }
    }

    fn read(&self, address: u32) -> u8 {
        *self.memory.get(&address).unwrap_or(&0xFF)
    }

    fn take_repeat(&mut self) -> usize {
        let n = self.repeat + 1;
        self.repeat = 0;
        n
    }

    fn address_len(op: u8) -> usize {
        if (op >> 2) & 0x03 == 2 {
            3
        } else {
            2
        }
    }

    fn load_cs(&self, address: u8) -> u8 {
        match address {
            ASI_SYS_STATUS => {
                if self.cs[ASI_KEY_STATUS as usize] & (1 << KEY_STATUS_NVMPROG_BIT) != 0
                    && self.cs[ASI_RESET_REQ as usize] == 0
                {
                    1 << SYS_STATUS_NVMPROG_BIT
                } else {
                    0x00
                }
            }
            a => self.cs[a as usize],
        }
    }

    fn feed(&mut self, b: u8) {
        let state = std::mem::replace(&mut self.state, Rx::Idle);

        self.state = match state {
            Rx::Idle if b == UPDI_SYNC => Rx::Opcode,
            Rx::Idle => Rx::Idle,
            Rx::Opcode => self.decode(b),
            Rx::CsValue(a) => {
                self.cs[a as usize] = b;
                Rx::Idle
            }
            Rx::Address { op, mut bytes, len } => {
                bytes.push(b);
                if bytes.len() < len {
                    Rx::Address { op, bytes, len }
                } else {
                    let mut a = [0u8; 4];
                    a[..len].copy_from_slice(&bytes);
                    let address = u32::from_le_bytes(a);

                    if op & 0xE0 == u8::from(Instruction::Lds) {
                        let v = self.read(address);
                        self.rx.push_back(v);
                        Rx::Idle
                    } else {
                        self.ack();
                        Rx::StoreData {
                            address,
                            bytes: vec![],
                            len: (op & 0x03) as usize + 1,
                        }
                    }
                }
            }
            Rx::StoreData {
                address,
                mut bytes,
                len,
            } => {
                bytes.push(b);
                if bytes.len() < len {
                    Rx::StoreData {
                        address,
                        bytes,
                        len,
                    }
                } else {
                    for (i, v) in bytes.iter().enumerate() {
                        self.memory.insert(address + i as u32, *v);
                    }
                    self.ack();
                    Rx::Idle
                }
            }
            Rx::Pointer { mut bytes, len } => {
                bytes.push(b);
                if bytes.len() < len {
                    Rx::Pointer { bytes, len }
                } else {
                    let mut a = [0u8; 4];
                    a[..len].copy_from_slice(&bytes);
                    self.pointer = u32::from_le_bytes(a);
                    self.ack();
                    Rx::Idle
                }
            }
            Rx::PtrData {
                mut bytes,
                len,
                remaining,
            } => {
                bytes.push(b);
                if bytes.len() < len {
                    Rx::PtrData {
                        bytes,
                        len,
                        remaining,
                    }
                } else {
                    for v in bytes {
                        self.memory.insert(self.pointer, v);
                        self.pointer += 1;
                    }
                    self.ack();
                    if remaining > 1 {
                        Rx::PtrData {
                            bytes: vec![],
                            len,
                            remaining: remaining - 1,
                        }
                    } else {
                        Rx::Idle
                    }
                }
            }
            Rx::RepeatCount => {
                self.repeat = b as usize;
                Rx::Idle
            }
            Rx::Key(mut k) => {
                k.push(b);
                if k.len() < 8 {
                    Rx::Key(k)
                } else {
                    k.reverse();
                    if k.as_slice() == &KEY_NVM[..] {
                        self.cs[ASI_KEY_STATUS as usize] |= 1 << KEY_STATUS_NVMPROG_BIT;
                    }
                    Rx::Idle
                }
            }
        };
    }

    fn decode(&mut self, op: u8) -> Rx {
        match op & 0xE0 {
            0x80 => {
                let v = self.load_cs(op & 0x0F);
                self.rx.push_back(v);
                Rx::Idle
            }
            0xC0 => Rx::CsValue(op & 0x0F),
            0x00 | 0x40 => Rx::Address {
                op,
                bytes: vec![],
                len: Self::address_len(op),
            },
            0x20 => {
                // LD *ptr++
                for _ in 0..self.take_repeat() {
                    let v = self.read(self.pointer);
                    self.rx.push_back(v);
                    self.pointer += 1;
                }
                Rx::Idle
            }
            0x60 => {
                let len = (op & 0x03) as usize + 1;
                if (op >> 2) & 0x03 == 2 {
                    Rx::Pointer { bytes: vec![], len }
                } else {
                    Rx::PtrData {
                        bytes: vec![],
                        len,
                        remaining: self.take_repeat(),
                    }
                }
            }
            0xA0 => Rx::RepeatCount,
            0xE0 => Rx::Key(vec![]),
            _ => Rx::Idle,
        }
    }
}

/// Serial port wired to a simulated UPDI target
///
/// Every byte written is echoed, then fed to the target which queues any
/// response behind the echo.
#[derive(Clone)]
pub struct SimPort(pub Rc<RefCell<TargetState>>);

impl SimPort {
    pub fn new() -> Self {
        SimPort(Rc::new(RefCell::new(TargetState::new())))
    }

    pub fn state(&self) -> std::cell::RefMut<'_, TargetState> {
        self.0.borrow_mut()
    }
}

impl Write<u8> for SimPort {
    type Error = FakeError;

    fn write(&mut self, b: u8) -> nb::Result<(), FakeError> {
        let mut s = self.0.borrow_mut();
        s.tx.push(b);
        s.rx.push_back(b);

        let double_break = s
            .lines
            .last()
            .map(|l| *l == LineConfig::double_break())
            .unwrap_or(false);

        if double_break {
            s.asleep = false;
            s.state = Rx::Idle;
        } else if !s.asleep {
            s.feed(b);
        }
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), FakeError> {
        Ok(())
    }
}

impl Read<u8> for SimPort {
    type Error = FakeError;

    fn read(&mut self) -> nb::Result<u8, FakeError> {
        let mut s = self.0.borrow_mut();
        s.reads += 1;
        s.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl SerialPort<FakeError> for SimPort {
    fn configure(&mut self, line: &LineConfig) -> Result<(), FakeError> {
        self.0.borrow_mut().lines.push(*line);
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<(), FakeError> {
        self.0.borrow_mut().rts.push(level);
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), FakeError> {
        self.0.borrow_mut().dtr.push(level);
        Ok(())
    }
}

/// Register facade for a legacy (P0, P2, P4) controller, STATUS at offset 2
pub fn legacy_registers(device: &DeviceInfo) -> FakeRegisters {
    FakeRegisters::for_device(device, 0x02)
}

/// Register facade for a modern (P3, P5) controller, STATUS at offset 6
pub fn modern_registers(device: &DeviceInfo) -> FakeRegisters {
    FakeRegisters::for_device(device, 0x06)
}

/// Run `f` against a controller bound to `regs`
pub fn with_nvm<T, F>(
    device: &DeviceInfo,
    regs: &mut FakeRegisters,
    clock: FakeClock,
    options: Options,
    f: F,
) -> T
where
    F: FnOnce(&mut NvmController<FakeRegisters, FakeClock>) -> T,
{
    let mut nvm = NvmController::new(regs, device, clock, options);
    f(&mut nvm)
}
