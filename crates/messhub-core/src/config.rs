use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so tests can drive it with a
/// plain `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let backend_url = require("MESSHUB_BACKEND_URL")?;
    let backend_anon_key = require("MESSHUB_BACKEND_ANON_KEY")?;

    let env = parse_environment(&or_default("MESSHUB_ENV", "development"));
    let log_level = or_default("MESSHUB_LOG_LEVEL", "info");
    let state_dir = PathBuf::from(or_default("MESSHUB_STATE_DIR", "./.messhub"));
    let stores_path = PathBuf::from(or_default("MESSHUB_STORES_PATH", "./config/stores.yaml"));

    let request_timeout_secs: u64 =
        parse_var(&lookup, "MESSHUB_REQUEST_TIMEOUT_SECS")?.unwrap_or(30);
    let retry_max_attempts: u32 = parse_var(&lookup, "MESSHUB_RETRY_MAX_ATTEMPTS")?.unwrap_or(3);
    if retry_max_attempts == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "MESSHUB_RETRY_MAX_ATTEMPTS".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    let retry_base_delay_ms: u64 =
        parse_var(&lookup, "MESSHUB_RETRY_BASE_DELAY_MS")?.unwrap_or(1000);
    let store_max_retries: u32 = parse_var(&lookup, "MESSHUB_STORE_MAX_RETRIES")?.unwrap_or(3);
    let store_backoff_base_ms: u64 =
        parse_var(&lookup, "MESSHUB_STORE_BACKOFF_BASE_MS")?.unwrap_or(1000);
    let store_backoff_cap_ms: u64 =
        parse_var(&lookup, "MESSHUB_STORE_BACKOFF_CAP_MS")?.unwrap_or(10_000);
    let error_throttle_ms: u64 = parse_var(&lookup, "MESSHUB_ERROR_THROTTLE_MS")?.unwrap_or(1000);
    let lookup_timeout_ms: Option<u64> = parse_var(&lookup, "MESSHUB_LOOKUP_TIMEOUT_MS")?;

    Ok(AppConfig {
        backend_url,
        backend_anon_key,
        env,
        log_level,
        state_dir,
        stores_path,
        request_timeout_secs,
        retry_max_attempts,
        retry_base_delay_ms,
        store_max_retries,
        store_backoff_base_ms,
        store_backoff_cap_ms,
        error_throttle_ms,
        lookup_timeout_ms,
    })
}

/// `None` when `var` is unset; an error when it is set but does not parse.
fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let Ok(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
