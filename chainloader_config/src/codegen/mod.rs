//! Generation of the source and linker files the firmware includes.
use std::path::Path;

use anyhow::Result;

use crate::Configuration;

mod constants;
mod linker_script;

pub use constants::generate_constants;
pub use linker_script::generate_linker_script;

/// Writes every generated artifact into `out_dir`.
pub fn generate_modules<P: AsRef<Path>>(out_dir: P, configuration: &Configuration) -> Result<()> {
    generate_constants(out_dir.as_ref(), configuration)?;
    generate_linker_script(out_dir.as_ref(), configuration)?;
    Ok(())
}
