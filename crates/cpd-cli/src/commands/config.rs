//! `cpd config` — validation and hashing of the layered configuration.

use std::process::ExitCode;

use anyhow::Result;

pub fn validate(config_paths: &[String]) -> Result<ExitCode> {
    let loaded = super::load(config_paths)?;
    let errors = loaded.validation_errors();
    if errors.is_empty() {
        println!("config ok");
        println!("config_hash={}", loaded.config_hash);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("configuration validation failed:");
        for error in &errors {
            eprintln!("  - {error}");
        }
        Ok(ExitCode::FAILURE)
    }
}

pub fn hash(config_paths: &[String]) -> Result<ExitCode> {
    let loaded = super::load(config_paths)?;
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(ExitCode::SUCCESS)
}
