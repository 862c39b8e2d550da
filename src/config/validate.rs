// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{CiError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::CiError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.daemon, raw.cluster))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_timings(cfg)?;
    validate_intake_conventions(cfg)?;
    validate_cluster(cfg)?;
    Ok(())
}

fn validate_timings(cfg: &RawConfigFile) -> Result<()> {
    let daemon = &cfg.daemon;
    if daemon.tick_interval.is_zero() {
        return Err(CiError::ConfigError(
            "[daemon].tick_interval must be > 0".to_string(),
        ));
    }
    if daemon.repository_scan_interval.is_zero() {
        return Err(CiError::ConfigError(
            "[daemon].repository_scan_interval must be > 0".to_string(),
        ));
    }
    if daemon.lock_timeout.is_zero() {
        return Err(CiError::ConfigError(
            "[daemon].lock_timeout must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_intake_conventions(cfg: &RawConfigFile) -> Result<()> {
    let suffix = &cfg.daemon.script_suffix;
    if suffix.len() < 2 || !suffix.starts_with('.') {
        return Err(CiError::ConfigError(format!(
            "[daemon].script_suffix must look like \".sh\" (got {suffix:?})"
        )));
    }
    if cfg.daemon.temp_prefix.trim().is_empty() {
        return Err(CiError::ConfigError(
            "[daemon].temp_prefix must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_cluster(cfg: &RawConfigFile) -> Result<()> {
    if cfg.cluster.dir.as_os_str().is_empty() {
        return Err(CiError::ConfigError(
            "[cluster].dir must not be empty".to_string(),
        ));
    }
    Ok(())
}
