use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_backends(config)?;
    validate_release_urls(config)?;
    validate_transport(config)?;
    validate_tuning(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn validate_backends(config: &AppConfig) -> Result<(), ConfigError> {
    if config.backends.is_empty() {
        return Err(validation_err("backends cannot be empty"));
    }
    for url in config.backends.as_slice() {
        if !is_http_url(url) {
            return Err(validation_err(format!(
                "backend '{url}' must start with http:// or https://"
            )));
        }
    }
    Ok(())
}

fn validate_release_urls(config: &AppConfig) -> Result<(), ConfigError> {
    for url in &config.release_urls {
        if !is_http_url(url.trim()) {
            return Err(validation_err(format!(
                "release url '{url}' must start with http:// or https://"
            )));
        }
    }
    Ok(())
}

fn validate_transport(config: &AppConfig) -> Result<(), ConfigError> {
    let transport = &config.transport;
    if transport.connect_timeout_secs == 0 {
        return Err(validation_err(
            "transport.connect_timeout_secs must be greater than 0",
        ));
    }
    if transport.request_timeout_secs == 0 {
        return Err(validation_err(
            "transport.request_timeout_secs must be greater than 0",
        ));
    }
    if transport.pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "transport.pool_max_idle_per_host must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_tuning(config: &AppConfig) -> Result<(), ConfigError> {
    if config.retry.max_attempts == 0 {
        return Err(validation_err("retry.max_attempts must be greater than 0"));
    }
    if config.stream.channel_capacity == 0 {
        return Err(validation_err(
            "stream.channel_capacity must be greater than 0",
        ));
    }
    if config.reconcile.overlap_window_chars == 0 {
        return Err(validation_err(
            "reconcile.overlap_window_chars must be greater than 0",
        ));
    }
    if config.reconcile.recent_fragment_capacity == 0 {
        return Err(validation_err(
            "reconcile.recent_fragment_capacity must be greater than 0",
        ));
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "DISABLED", "TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR", "CRITICAL",
];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level '{}' is invalid. Must be one of: {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}
