#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::num::ParseIntError;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};
use embedded_hal::blocking::delay::DelayMs;
use indicatif::{ProgressBar, ProgressStyle};

use updi_nvm::device::{DeviceInfo, MemoryKind, MemoryRegion};
use updi_nvm::{
    BulkMode, Clock, Nvm, NvmController, Options, ReadWrite, StdClock, UpdiLink, UpdiPhysical,
    WriteOptions,
};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    #[structopt(subcommand)]
    command: Command,

    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    /// Target part name
    #[structopt(long, default_value = "avr64da28")]
    device: String,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Command {
    /// Erase flash, EEPROM (unless EESAVE is set) and lockbits
    Erase,

    /// Write a raw binary image to flash
    WriteFlash {
        /// Binary image file
        #[structopt(parse(from_os_str))]
        file: PathBuf,

        /// Offset from the start of flash
        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        offset: u32,

        /// Skip intermediate ready checks while streaming pages
        #[structopt(long)]
        bulk: bool,

        /// Bytes per serial transfer, larger than 2 disables response signatures
        #[structopt(long, default_value = "2")]
        block_size: usize,
    },

    /// Write hex encoded data to EEPROM
    WriteEeprom {
        /// Offset from the start of EEPROM
        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        offset: u32,

        /// Data as a hex string
        data: HexData,
    },

    /// Write a single fuse
    WriteFuse {
        /// Fuse index
        #[structopt(parse(try_from_str = parse_u32))]
        index: u32,

        /// Fuse value as a hex string
        data: HexData,
    },

    /// Write hex encoded data to the user row
    WriteUserRow {
        /// Offset from the start of the user row
        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        offset: u32,

        /// Data as a hex string
        data: HexData,
    },

    /// Erase all of EEPROM
    EraseEeprom,

    /// Erase the user row
    EraseUserRow,

    /// Read and hex dump a memory region
    Read {
        /// Region to read (flash, eeprom, fuses, lockbits, signatures, userrow, bootrow, sram)
        #[structopt(long, default_value = "signatures", parse(try_from_str = parse_memory))]
        memory: MemoryKind,

        /// Offset from the start of the region
        #[structopt(long, default_value = "0", parse(try_from_str = parse_u32))]
        offset: u32,

        /// Number of bytes, defaults to the rest of the region
        #[structopt(long, parse(try_from_str = parse_u32))]
        length: Option<u32>,
    },
}

/// Hex encoded command line data
#[derive(Clone, Debug)]
pub struct HexData(Vec<u8>);

impl FromStr for HexData {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s.trim_start_matches("0x")).map(HexData)
    }
}

fn parse_u32(s: &str) -> Result<u32, ParseIntError> {
    match s.strip_prefix("0x") {
        Some(h) => u32::from_str_radix(h, 16),
        None => s.parse(),
    }
}

fn parse_memory(s: &str) -> Result<MemoryKind, String> {
    let kind = match s.to_ascii_lowercase().replace(&['-', '_'][..], "").as_str() {
        "flash" => MemoryKind::Flash,
        "eeprom" => MemoryKind::Eeprom,
        "fuses" => MemoryKind::Fuses,
        "lockbits" => MemoryKind::Lockbits,
        "signatures" => MemoryKind::Signatures,
        "userrow" => MemoryKind::UserRow,
        "bootrow" => MemoryKind::BootRow,
        "sram" => MemoryKind::InternalSram,
        _ => return Err(format!("unknown memory region '{}'", s)),
    };
    Ok(kind)
}

/// Split a write into chunks that do not cross page boundaries
fn pages(address: u32, data: &[u8], page_size: u32) -> Vec<(u32, &[u8])> {
    let page_size = page_size.max(1);
    let mut chunks = vec![];
    let mut offset = 0;

    while offset < data.len() {
        let a = address + offset as u32;
        let room = (page_size - a % page_size) as usize;
        let n = room.min(data.len() - offset);
        chunks.push((a, &data[offset..offset + n]));
        offset += n;
    }

    chunks
}

/// Check a write of `len` bytes at `offset` fits in a region
fn check_fits(
    device: &DeviceInfo,
    region: &MemoryRegion,
    offset: u32,
    len: usize,
) -> anyhow::Result<u32> {
    if offset as u64 + len as u64 > region.size as u64 {
        let name = device
            .region_at(region.address)
            .map(|(kind, _)| format!("{:?}", kind))
            .unwrap_or_else(|| "region".to_string());
        bail!(
            "{} bytes at offset 0x{:x} exceed {} size ({})",
            len,
            offset,
            name,
            bytefmt::format(region.size as u64)
        );
    }
    Ok(region.address + offset)
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    let device = DeviceInfo::by_name(&o.device)
        .ok_or_else(|| anyhow!("Unknown device '{}'", o.device))?;

    info!("Connecting to serial port");

    let phy = UpdiPhysical::linux(&o.port, o.baud, o.options.clone())
        .context("Error connecting to serial port")?;

    let mut link = UpdiLink::new(phy, device.address_width, StdClock::new());

    info!("Connecting to {} over UPDI", device.name);

    link.init().context("Error initialising UPDI link")?;
    link.enter_progmode()
        .context("Error entering programming mode")?;

    let res = run(&mut link, device, &o);

    if let Err(e) = link.leave_progmode() {
        error!("Error leaving programming mode: {}", e);
    }

    res
}

fn run<RW>(link: &mut RW, device: &DeviceInfo, o: &Args) -> anyhow::Result<()>
where
    RW: ReadWrite,
    RW::Error: Send + Sync + 'static,
{
    match &o.command {
        Command::Read {
            memory,
            offset,
            length,
        } => read(link, device, *memory, *offset, *length),
        command => {
            let nvm = NvmController::new(link, device, StdClock::new(), o.options.clone());
            execute(nvm, device, command)
        }
    }
}

fn execute<RW, C>(
    mut nvm: NvmController<RW, C>,
    device: &DeviceInfo,
    command: &Command,
) -> anyhow::Result<()>
where
    RW: ReadWrite,
    RW::Error: Send + Sync + 'static,
    C: Clock + DelayMs<u32>,
{
    match command {
        Command::Erase => {
            nvm.chip_erase()?;
            info!("Chip erase complete");
        }
        Command::WriteFlash {
            file,
            offset,
            bulk,
            block_size,
        } => {
            let mut data = std::fs::read(file)
                .with_context(|| format!("Error reading {}", file.display()))?;

            // Word written flash takes whole words, pad with the erased value
            if device.flash.word_access() && data.len() % 2 == 1 {
                debug!("Padding odd length image");
                data.push(0xFF);
            }

            let address = check_fits(device, &device.flash, *offset, data.len())?;

            info!(
                "Writing {} to flash at 0x{:06x}",
                bytefmt::format(data.len() as u64),
                address
            );

            write_flash(&mut nvm, &device.flash, address, &data, *bulk, *block_size)?;
        }
        Command::WriteEeprom { offset, data } => {
            let address = check_fits(device, &device.eeprom, *offset, data.0.len())?;
            for (a, chunk) in pages(address, &data.0, device.eeprom.page_size) {
                nvm.write_eeprom(a, chunk)?;
            }
            info!("Wrote {} bytes to EEPROM", data.0.len());
        }
        Command::WriteFuse { index, data } => {
            if data.0.len() != 1 {
                bail!("Fuse writes take exactly one byte");
            }
            let address = check_fits(device, &device.fuses, *index, 1)?;
            nvm.write_fuse(address, &data.0)?;
            info!("Fuse {} set to 0x{:02x}", index, data.0[0]);
        }
        Command::WriteUserRow { offset, data } => {
            let address = check_fits(device, &device.user_row, *offset, data.0.len())?;
            for (a, chunk) in pages(address, &data.0, device.user_row.page_size) {
                nvm.write_user_row(a, chunk)?;
            }
            info!("Wrote {} bytes to user row", data.0.len());
        }
        Command::EraseEeprom => {
            nvm.erase_eeprom()?;
            info!("EEPROM erased");
        }
        Command::EraseUserRow => {
            nvm.erase_user_row(device.user_row.address, device.user_row.size as usize)?;
            info!("User row erased");
        }
        Command::Read { .. } => bail!("Read does not use the NVM controller"),
    }

    Ok(())
}

fn write_flash<RW, C>(
    nvm: &mut NvmController<RW, C>,
    flash: &MemoryRegion,
    address: u32,
    data: &[u8],
    bulk: bool,
    block_size: usize,
) -> anyhow::Result<()>
where
    RW: ReadWrite,
    RW::Error: Send + Sync + 'static,
    C: Clock + DelayMs<u32>,
{
    let chunks = pages(address, data, flash.page_size);

    let pb = ProgressBar::new(data.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .progress_chars("#>-"),
    );

    let last = chunks.len().saturating_sub(1);
    for (i, (a, chunk)) in chunks.iter().enumerate() {
        let mode = match (bulk, i == last) {
            (false, _) => BulkMode::Off,
            (true, false) => BulkMode::Streaming,
            (true, true) => BulkMode::Final,
        };

        let options = WriteOptions {
            word_access: flash.word_access(),
            block_size,
            bulk: mode,
            ..WriteOptions::default()
        };

        nvm.write_flash(*a, chunk, &options)
            .with_context(|| format!("Error writing flash page at 0x{:06x}", a))?;

        pb.inc(chunk.len() as u64);
    }

    pb.finish_with_message("Write complete");

    Ok(())
}

fn read<RW>(
    link: &mut RW,
    device: &DeviceInfo,
    memory: MemoryKind,
    offset: u32,
    length: Option<u32>,
) -> anyhow::Result<()>
where
    RW: ReadWrite,
    RW::Error: Send + Sync + 'static,
{
    let region = device
        .region(memory)
        .ok_or_else(|| anyhow!("{} has no {:?} region", device.name, memory))?;

    let length = length.unwrap_or_else(|| region.size.saturating_sub(offset));
    let address = check_fits(device, region, offset, length as usize)?;

    info!("Reading {} bytes from 0x{:06x}", length, address);

    let data = link.read_data(address, length as usize)?;

    for (i, line) in data.chunks(16).enumerate() {
        println!("{:06x}: {}", address as usize + i * 16, hex::encode(line));
    }

    Ok(())
}
