use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::port::Port;

/// Contiguous range of flash, `[start, start + length)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: u32,
    pub length: u32,
}

impl Region {
    pub const fn new(start: u32, length: u32) -> Self { Self { start, length } }
    pub fn end(&self) -> u32 { self.start + self.length }
    pub fn overlaps(&self, other: &Region) -> bool {
        self.start < other.end() && other.start < self.end()
    }
    pub fn contains(&self, other: &Region) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfiguration {
    /// Region the host is allowed to erase and program.
    pub application: Region,
    /// Region holding the bootloader image itself.
    pub bootloader: Region,
    /// Bootloader owned page holding the staged copy of the boot vector.
    pub bootloader_data: Region,
    /// Stack pointer and reset vector fetched by the core on reset.
    pub boot_vector: Region,
}

impl Default for MemoryConfiguration {
    fn default() -> Self {
        Self {
            application: Region::new(0x0800_0000, 0x3_7800),
            bootloader_data: Region::new(0x0803_7800, 0x800),
            bootloader: Region::new(0x0803_8000, 0x8000),
            boot_vector: Region::new(0x0800_0000, 8),
        }
    }
}

impl MemoryConfiguration {
    pub fn validate(&self, port: &Port) -> Result<()> {
        let flash = port.flash();
        let flash_region = Region::new(flash.start, flash.end - flash.start);
        let named = [
            ("application", &self.application),
            ("bootloader", &self.bootloader),
            ("bootloader data", &self.bootloader_data),
        ];

        for (name, region) in named.iter() {
            ensure!(region.length > 0, "[Memory Map] The {} region is empty", name);
            ensure!(
                flash_region.contains(region),
                "[Memory Map] The {} region lies outside of the {} flash",
                name,
                port
            );
            ensure!(
                region.start % flash.erase_granularity == 0
                    && region.length % flash.erase_granularity == 0,
                "[Memory Map] The {} region is not aligned to {} byte erase pages",
                name,
                flash.erase_granularity
            );
        }

        for (i, (name, region)) in named.iter().enumerate() {
            for (other_name, other) in named.iter().skip(i + 1) {
                ensure!(
                    !region.overlaps(other),
                    "[Memory Map] The {} and {} regions overlap",
                    name,
                    other_name
                );
            }
        }

        ensure!(
            self.boot_vector.length == 8,
            "[Memory Map] The boot vector must hold exactly a stack pointer and an entry point"
        );
        ensure!(
            self.boot_vector.start == flash.start,
            "[Memory Map] The boot vector must sit at the reset fetch address 0x{:08X}",
            flash.start
        );
        ensure!(
            self.application.start == self.boot_vector.start,
            "[Memory Map] The application region must begin with the boot vector"
        );
        ensure!(
            self.boot_vector.length % flash.write_granularity == 0,
            "[Memory Map] The boot vector is not a multiple of the {} byte write granularity",
            flash.write_granularity
        );
        ensure!(
            self.bootloader_data.length >= self.boot_vector.length,
            "[Memory Map] The bootloader data region is too small to stage the boot vector"
        );
        Ok(())
    }
}
