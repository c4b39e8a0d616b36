//! Device descriptors.
//!
//! Static per-part memory maps and NVM controller parameters, collected from
//! the Microchip device packs.

use core::fmt;

/// NVM controller generation, as reported by the target SIB `P:n` field
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum NvmVersion {
    /// tinyAVR 0/1/2, megaAVR 0: paged writes, no RWW
    P0,
    /// AVR DA/DB/DD: word writes, no page buffer
    P2,
    /// AVR EA: paged writes with coded errors
    P3,
    /// AVR DU: word writes, no page buffer
    P4,
    /// AVR EB: paged writes with coded errors
    P5,
}

impl fmt::Display for NvmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            NvmVersion::P0 => 0,
            NvmVersion::P2 => 2,
            NvmVersion::P3 => 3,
            NvmVersion::P4 => 4,
            NvmVersion::P5 => 5,
        };
        write!(f, "P:{}", n)
    }
}

/// How a chip erase affects a memory region
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChipEraseEffect {
    AlwaysErased,
    /// Erased unless preserved by a fuse setting (EESAVE / BOOTROW)
    ConditionallyErased,
    NotErased,
}

/// Data-space address width used by the UPDI link
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AddressWidth {
    Bits16,
    Bits24,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MemoryKind {
    Flash,
    Eeprom,
    Fuses,
    Lockbits,
    Signatures,
    UserRow,
    BootRow,
    InternalSram,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MemoryRegion {
    pub address: u32,
    pub size: u32,
    pub page_size: u32,
    pub read_size: u32,
    pub write_size: u32,
    pub chip_erase_effect: ChipEraseEffect,
    pub isolated_erase: bool,
}

impl MemoryRegion {
    /// Check whether `address` falls within the region
    pub fn contains(&self, address: u32) -> bool {
        address >= self.address && address < self.address + self.size
    }

    /// Regions with multi-byte write granularity must be written as words
    pub fn word_access(&self) -> bool {
        self.write_size >= 2
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct DeviceInfo {
    pub name: &'static str,
    pub nvm_version: NvmVersion,

    pub flash: MemoryRegion,
    pub eeprom: MemoryRegion,
    pub fuses: MemoryRegion,
    pub lockbits: MemoryRegion,
    pub signatures: MemoryRegion,
    pub user_row: MemoryRegion,
    pub boot_row: Option<MemoryRegion>,
    pub internal_sram: MemoryRegion,

    pub nvmctrl_base: u32,
    pub syscfg_base: u32,
    pub ocd_base: u32,
    pub address_width: AddressWidth,
    pub prog_clock_khz: u32,
    pub hv_implementation: u8,
    pub device_id: u32,
}

impl DeviceInfo {
    /// Fetch a region descriptor, if the part has one
    pub fn region(&self, kind: MemoryKind) -> Option<&MemoryRegion> {
        match kind {
            MemoryKind::Flash => Some(&self.flash),
            MemoryKind::Eeprom => Some(&self.eeprom),
            MemoryKind::Fuses => Some(&self.fuses),
            MemoryKind::Lockbits => Some(&self.lockbits),
            MemoryKind::Signatures => Some(&self.signatures),
            MemoryKind::UserRow => Some(&self.user_row),
            MemoryKind::BootRow => self.boot_row.as_ref(),
            MemoryKind::InternalSram => Some(&self.internal_sram),
        }
    }

    /// Locate the region containing an address
    pub fn region_at(&self, address: u32) -> Option<(MemoryKind, &MemoryRegion)> {
        const KINDS: [MemoryKind; 8] = [
            MemoryKind::Flash,
            MemoryKind::Eeprom,
            MemoryKind::Fuses,
            MemoryKind::Lockbits,
            MemoryKind::Signatures,
            MemoryKind::UserRow,
            MemoryKind::BootRow,
            MemoryKind::InternalSram,
        ];

        KINDS
            .iter()
            .filter_map(|k| self.region(*k).map(|r| (*k, r)))
            .find(|(_, r)| r.contains(address))
    }

    /// Look up a built-in descriptor by part name
    pub fn by_name(name: &str) -> Option<&'static DeviceInfo> {
        DEVICES
            .iter()
            .copied()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }
}

const fn region(
    address: u32,
    size: u32,
    page_size: u32,
    read_size: u32,
    write_size: u32,
    chip_erase_effect: ChipEraseEffect,
    isolated_erase: bool,
) -> MemoryRegion {
    MemoryRegion {
        address,
        size,
        page_size,
        read_size,
        write_size,
        chip_erase_effect,
        isolated_erase,
    }
}

use ChipEraseEffect::*;

/// Built-in descriptors
pub const DEVICES: &[&DeviceInfo] = &[&ATTINY817, &AVR64DA28, &AVR64DU32, &AVR64EA48];

pub const ATTINY817: DeviceInfo = DeviceInfo {
    name: "attiny817",
    nvm_version: NvmVersion::P0,
    flash: region(0x8000, 0x2000, 0x40, 2, 2, AlwaysErased, false),
    eeprom: region(0x1400, 0x80, 0x20, 1, 1, ConditionallyErased, true),
    fuses: region(0x1280, 0x0A, 0x01, 1, 1, NotErased, false),
    lockbits: region(0x128A, 0x1, 0x01, 1, 1, AlwaysErased, false),
    signatures: region(0x1100, 0x3, 0x01, 1, 0, NotErased, false),
    user_row: region(0x1300, 0x20, 0x20, 1, 1, NotErased, true),
    boot_row: None,
    internal_sram: region(0x3E00, 0x200, 0x01, 1, 1, NotErased, false),
    nvmctrl_base: 0x1000,
    syscfg_base: 0x0F00,
    ocd_base: 0x0F80,
    address_width: AddressWidth::Bits16,
    prog_clock_khz: 900,
    hv_implementation: 0,
    device_id: 0x1E9320,
};

pub const AVR64DA28: DeviceInfo = DeviceInfo {
    name: "avr64da28",
    nvm_version: NvmVersion::P2,
    flash: region(0x80_0000, 0x10000, 0x200, 2, 2, AlwaysErased, true),
    eeprom: region(0x1400, 0x200, 0x1, 1, 1, ConditionallyErased, true),
    fuses: region(0x1050, 0x09, 0x01, 1, 1, NotErased, false),
    lockbits: region(0x1040, 0x4, 0x01, 1, 1, AlwaysErased, false),
    signatures: region(0x1100, 0x40, 0x01, 1, 0, NotErased, false),
    user_row: region(0x1080, 0x20, 0x20, 1, 1, NotErased, true),
    boot_row: None,
    internal_sram: region(0x6000, 0x2000, 0x01, 1, 1, NotErased, false),
    nvmctrl_base: 0x1000,
    syscfg_base: 0x0F00,
    ocd_base: 0x0F80,
    address_width: AddressWidth::Bits24,
    prog_clock_khz: 1800,
    hv_implementation: 1,
    device_id: 0x1E9615,
};

pub const AVR64DU32: DeviceInfo = DeviceInfo {
    name: "avr64du32",
    nvm_version: NvmVersion::P4,
    flash: region(0x80_0000, 0x10000, 0x200, 2, 0x200, AlwaysErased, true),
    eeprom: region(0x1400, 0x100, 0x1, 1, 1, ConditionallyErased, true),
    fuses: region(0x1050, 0x0C, 0x01, 1, 1, NotErased, false),
    lockbits: region(0x1040, 0x4, 0x01, 1, 1, AlwaysErased, false),
    signatures: region(0x1080, 0x40, 0x01, 1, 0, NotErased, false),
    user_row: region(0x1200, 0x200, 0x200, 1, 1, NotErased, true),
    boot_row: Some(region(0x1100, 0x100, 0x100, 1, 1, ConditionallyErased, true)),
    internal_sram: region(0x6000, 0x2000, 0x01, 1, 1, NotErased, false),
    nvmctrl_base: 0x1000,
    syscfg_base: 0x0F00,
    ocd_base: 0x0F80,
    address_width: AddressWidth::Bits24,
    prog_clock_khz: 1800,
    hv_implementation: 2,
    device_id: 0x1E9621,
};

pub const AVR64EA48: DeviceInfo = DeviceInfo {
    name: "avr64ea48",
    nvm_version: NvmVersion::P3,
    flash: region(0x80_0000, 0x10000, 0x200, 2, 2, AlwaysErased, true),
    eeprom: region(0x1400, 0x200, 0x8, 1, 1, ConditionallyErased, true),
    fuses: region(0x1050, 0x10, 0x01, 1, 1, NotErased, false),
    lockbits: region(0x1040, 0x4, 0x01, 1, 1, AlwaysErased, false),
    signatures: region(0x1100, 0x80, 0x01, 1, 0, NotErased, false),
    user_row: region(0x1080, 0x40, 0x40, 1, 1, NotErased, true),
    boot_row: None,
    internal_sram: region(0x6800, 0x1800, 0x01, 1, 1, NotErased, false),
    nvmctrl_base: 0x1000,
    syscfg_base: 0x0F00,
    ocd_base: 0x0F80,
    address_width: AddressWidth::Bits24,
    prog_clock_khz: 1800,
    hv_implementation: 1,
    device_id: 0x1E961E,
};
