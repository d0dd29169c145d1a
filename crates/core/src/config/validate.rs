use super::{Config, ConfigError};

/// Validate a loaded configuration before wiring the process together.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.anna.domain.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "ANNA_DOMAIN must be set to the upstream catalog host".to_string(),
        ));
    }

    if let Some(archive_id) = &config.anna.archive_id {
        if archive_id.is_empty() || !archive_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::ValidationError(format!(
                "ANNA_ARCHIVE_ID must be a decimal shard index, got {:?}",
                archive_id
            )));
        }
    }

    if config.anna.sync_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "ANNA_SYNC_INTERVAL_SECS must be greater than zero".to_string(),
        ));
    }

    Ok(())
}
