use anyhow::Result;
use chainloader_config::{codegen::generate_modules, Configuration};
use std::{env, path::PathBuf};

fn main() -> Result<()> { process_configuration() }

fn process_configuration() -> Result<()> {
    println!("cargo:rerun-if-env-changed=CHAINLOADER_CONFIG");
    println!("cargo:rerun-if-changed=build.rs");

    let configuration: Configuration = match env::var("CHAINLOADER_CONFIG") {
        Ok(config) if !config.trim().is_empty() => ron::from_str(&config)?,
        _ => Configuration::default(),
    };

    configuration.validate()?;
    validate_feature_flags_against_configuration(&configuration);

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    generate_modules(&out_dir, &configuration)?;

    if env::var("CARGO_CFG_TARGET_ARCH").map(|arch| arch == "arm").unwrap_or(false) {
        println!("cargo:rustc-link-search={}", out_dir.display());
    }
    Ok(())
}

fn validate_feature_flags_against_configuration(configuration: &Configuration) {
    let targets_arm = env::var("CARGO_CFG_TARGET_ARCH").map(|arch| arch == "arm").unwrap_or(false);
    let flag = configuration.port.feature_flag();
    let supplied = env::var(format!("CARGO_FEATURE_{}", flag.to_uppercase())).is_ok();
    if targets_arm && !supplied {
        panic!(
            "\n\nThe configuration targets the {} port, but its feature flag hasn't been \
            supplied. Please build again with `--features={}`\n\n",
            configuration.port, flag,
        );
    }
}
