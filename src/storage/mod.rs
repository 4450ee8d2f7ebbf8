//! Storage Layer
//!
//! Resolves the per-user configuration and data directories. Diagnostic
//! artifacts default to `<data_dir>/outputs/`.

use anyhow::Result;
use std::path::PathBuf;

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "clicktext", "clicktext")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

/// Default location of `config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

/// Default root for diagnostic artifacts
pub fn get_output_dir() -> Result<PathBuf> {
    let output_dir = get_data_dir()?.join("outputs");
    std::fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}
