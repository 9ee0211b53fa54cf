use std::{fs::OpenOptions, io::Write, path::Path};

use anyhow::Result;

use crate::Configuration;

/// Generates the linker script `memory.x`, which places the bootloader image
/// in its own region at the top of flash and seeds the boot vector with the
/// bootloader's initial stack pointer and reset handler.
pub fn generate_linker_script(out_dir: &Path, configuration: &Configuration) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(out_dir.join("memory.x"))?;
    file.write_all(render_linker_script(configuration).as_bytes())?;
    Ok(())
}

pub(crate) fn render_linker_script(configuration: &Configuration) -> String {
    let memory = &configuration.memory;
    let ram = configuration.port.ram();
    format!(
        "MEMORY\n\
         {{\n\
             BOOT_VECTOR : ORIGIN = 0x{:08X}, LENGTH = {}\n\
             FLASH : ORIGIN = 0x{:08X}, LENGTH = {}K\n\
             RAM : ORIGIN = 0x{:08X}, LENGTH = {}K\n\
         }}\n\
         \n\
         SECTIONS\n\
         {{\n\
             .boot_vector ORIGIN(BOOT_VECTOR) :\n\
             {{\n\
                 LONG(_stack_start);\n\
                 LONG(Reset);\n\
             }} > BOOT_VECTOR\n\
         }} INSERT AFTER .vector_table;\n",
        memory.boot_vector.start,
        memory.boot_vector.length,
        memory.bootloader.start,
        memory.bootloader.length / 1024,
        ram.origin,
        ram.size / 1024,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bootloader_is_linked_at_the_top_of_flash() {
        // Given
        let configuration = Configuration::default();

        // When
        let script = render_linker_script(&configuration);

        // Then
        assert!(script.contains("FLASH : ORIGIN = 0x08038000, LENGTH = 32K"));
        assert!(script.contains("BOOT_VECTOR : ORIGIN = 0x08000000, LENGTH = 8"));
        assert!(script.contains("RAM : ORIGIN = 0x20000000, LENGTH = 64K"));
    }
}
