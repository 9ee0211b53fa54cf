use std::{fs::OpenOptions, io::Write, path::Path};

use anyhow::Result;

use crate::{memory::Region, Configuration};

/// Generates `config.rs`, the set of constants describing the memory map,
/// flash geometry and chain protocol parameters of a particular build.
pub fn generate_constants(out_dir: &Path, configuration: &Configuration) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(out_dir.join("config.rs"))?;
    file.write_all(render_constants(configuration).as_bytes())?;
    Ok(())
}

fn region(name: &str, region: &Region) -> String {
    format!(
        "pub const {}: Region = Region::new(0x{:08X}, 0x{:X});\n",
        name, region.start, region.length
    )
}

pub(crate) fn render_constants(configuration: &Configuration) -> String {
    let flash = configuration.port.flash();
    let memory = &configuration.memory;
    let chain = &configuration.chain;
    let console = &configuration.console;

    let mut code = String::from("// Generated by the build script. Do not edit.\n");
    code.push_str(&format!("pub const PORT: &str = \"{}\";\n", configuration.port));
    code.push_str(&format!("pub const FLASH_START: u32 = 0x{:08X};\n", flash.start));
    code.push_str(&format!("pub const FLASH_END: u32 = 0x{:08X};\n", flash.end));
    code.push_str(&format!("pub const ERASE_GRANULARITY: usize = {};\n", flash.erase_granularity));
    code.push_str(&format!("pub const WRITE_GRANULARITY: usize = {};\n", flash.write_granularity));
    code.push_str(&region("APPLICATION", &memory.application));
    code.push_str(&region("BOOTLOADER", &memory.bootloader));
    code.push_str(&region("BOOTLOADER_DATA", &memory.bootloader_data));
    code.push_str(&region("BOOT_VECTOR", &memory.boot_vector));
    code.push_str(&format!("pub const BROADCAST_ADDRESS: u8 = 0x{:02X};\n", chain.broadcast_address));
    code.push_str(&format!("pub const ADDRESS_BASE: u8 = {};\n", chain.address_base));
    code.push_str(&format!("pub const MAX_DEVICES: usize = {};\n", chain.max_devices));
    code.push_str(&format!("pub const BOOTSCAN_DELAY_MS: u32 = {};\n", chain.bootscan_delay_ms));
    code.push_str(&format!(
        "pub const BOOT_TO_ADDRESS_DELAY_MS: u32 = {};\n",
        chain.boot_to_address_delay_ms
    ));
    code.push_str(&format!("pub const RELAY_POLL_LIMIT: u32 = {};\n", chain.relay_poll_limit));
    code.push_str(&format!("pub const BAUD_RATE: u32 = {};\n", console.baud_rate));
    code.push_str(&format!("pub const MAX_PAYLOAD_LENGTH: usize = {};\n", console.max_payload_length));
    code
}
