use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Connection parallelism, core type and check cadence are usable
/// - HTTP timeout is not 0
/// - Codec level is a valid zstd level
/// - Capacity section (if present) describes a grantable reservation
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let connection = &config.connection;
    if connection.max_parallel_jobs == 0 {
        return Err(ConfigError::ValidationError(
            "connection.max_parallel_jobs must be at least 1".to_string(),
        ));
    }
    if connection.core_type.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "connection.core_type cannot be empty".to_string(),
        ));
    }
    if connection.info_check_every == 0 {
        return Err(ConfigError::ValidationError(
            "connection.info_check_every must be at least 1".to_string(),
        ));
    }

    if config.http.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "http.timeout_secs cannot be 0".to_string(),
        ));
    }

    if !(1..=22).contains(&config.codec.level) {
        return Err(ConfigError::ValidationError(format!(
            "codec.level must be between 1 and 22, got {}",
            config.codec.level
        )));
    }

    if let Some(capacity) = &config.capacity {
        capacity
            .spec()
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("capacity: {}", e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CapacityConfig, CodecConfig};
    use crate::connection::ConnectionConfig;

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_parallelism_fails() {
        let config = Config {
            connection: ConnectionConfig {
                max_parallel_jobs: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_codec_level_range() {
        let config = Config {
            codec: CodecConfig { level: 23 },
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_capacity() {
        let mut config = Config {
            capacity: Some(CapacityConfig {
                core_type: "c1".to_string(),
                num_cores: 0,
                max_duration_hours: None,
            }),
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());

        if let Some(capacity) = config.capacity.as_mut() {
            capacity.num_cores = 4;
        }
        assert!(validate_config(&config).is_ok());
    }
}
