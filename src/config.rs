//! Configuration loader: merges env vars, .env file, and config.toml.

use common::config::{FallbackPolicy, SyncConfig};
use common::{Coordinates, Error};
use std::path::Path;

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_non_negative_u32(raw: &str, env_name: &str) -> Result<u32, Error> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

fn parse_fallback(raw: &str) -> Result<FallbackPolicy, Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "surface" | "error" => Ok(FallbackPolicy::Surface),
        "placeholder" | "synthetic" => Ok(FallbackPolicy::Placeholder),
        _ => Err(Error::Config(
            "AQI_SYNC_FALLBACK must be one of: surface, placeholder".into(),
        )),
    }
}

fn validate_config(config: &SyncConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.provider.api_token.trim().is_empty() {
        issues.push("WAQI_TOKEN is required (set in .env or environment)".into());
    }
    if config.provider.base_url.trim().is_empty() {
        issues.push("provider.base_url must not be empty".into());
    }
    if config.provider.requests_per_sec == 0 {
        issues.push("provider.requests_per_sec must be > 0".into());
    }
    if config.provider.request_timeout_secs == 0 {
        issues.push("provider.request_timeout_secs must be > 0".into());
    }

    if config.locations.is_empty() {
        issues.push("locations must contain at least one location".into());
    }
    for (i, location) in config.locations.iter().enumerate() {
        if location.name.trim().is_empty() {
            issues.push(format!("locations[{}] has an empty name", i));
        }
        if let Err(e) = Coordinates::new(location.lat, location.lng).validate() {
            issues.push(format!("locations[{}] ({}): {}", i, location.name, e));
        }
    }

    issues.extend(config.poller.issues());
    issues.extend(config.cache.issues());
    issues.extend(config.insights.issues());

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply environment overrides. `lookup` is `std::env::var` outside tests.
fn apply_env_overrides<F>(config: &mut SyncConfig, lookup: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = lookup("WAQI_TOKEN") {
        config.provider.api_token = token.trim().to_string();
    }
    if let Some(url) = lookup("AQI_SYNC_BASE_URL") {
        config.provider.base_url = url.trim().to_string();
    }
    if let Some(raw) = lookup("AQI_SYNC_POLL_INTERVAL_MS") {
        config.poller.poll_interval_ms = parse_positive_u64(&raw, "AQI_SYNC_POLL_INTERVAL_MS")?;
    }
    if let Some(raw) = lookup("AQI_SYNC_MIN_FETCH_INTERVAL_MS") {
        config.poller.min_fetch_interval_ms = raw.trim().parse::<u64>().map_err(|_| {
            Error::Config("AQI_SYNC_MIN_FETCH_INTERVAL_MS must be an integer >= 0".into())
        })?;
    }
    if let Some(raw) = lookup("AQI_SYNC_MAX_RETRIES") {
        config.poller.max_retries = parse_non_negative_u32(&raw, "AQI_SYNC_MAX_RETRIES")?;
    }
    if let Some(raw) = lookup("AQI_SYNC_RETRY_DELAY_MS") {
        config.poller.retry_delay_ms = parse_positive_u64(&raw, "AQI_SYNC_RETRY_DELAY_MS")?;
    }
    if let Some(raw) = lookup("AQI_SYNC_FALLBACK") {
        config.fallback = parse_fallback(&raw)?;
    }
    Ok(())
}

pub fn load_config() -> Result<SyncConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults.
    let mut config = SyncConfig::default();

    // 3. Try loading config.toml if it exists.
    let config_path = Path::new("config.toml");
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| Error::Config(format!("Failed to read config.toml: {}", e)))?;
        config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config.toml: {}", e)))?;
    }

    // 4. Override with environment variables (highest priority).
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    // 5. Validate.
    validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::LocationConfig;
    use std::collections::HashMap;

    fn valid() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.provider.api_token = "demo-token".into();
        config
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_with_token_are_valid() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_missing_token_rejected() {
        let err = validate_config(&SyncConfig::default()).unwrap_err();
        assert!(err.to_string().contains("WAQI_TOKEN"));
    }

    #[test]
    fn test_issues_are_collected() {
        let mut config = valid();
        config.locations = vec![LocationConfig {
            name: "Nowhere".into(),
            lat: 123.0,
            lng: 0.0,
        }];
        config.poller.poll_interval_ms = 0;
        config.cache.report_ttl_ms = 0;

        let msg = validate_config(&config).unwrap_err().to_string();
        assert!(msg.contains("locations[0] (Nowhere)"));
        assert!(msg.contains("poller.poll_interval_ms"));
        assert!(msg.contains("cache.report_ttl_ms"));
    }

    #[test]
    fn test_empty_locations_rejected() {
        let mut config = valid();
        config.locations.clear();
        let msg = validate_config(&config).unwrap_err().to_string();
        assert!(msg.contains("at least one location"));
    }

    #[test]
    fn test_env_overrides_applied() {
        let vars = env(&[
            ("WAQI_TOKEN", " abc123 "),
            ("AQI_SYNC_POLL_INTERVAL_MS", "120000"),
            ("AQI_SYNC_MIN_FETCH_INTERVAL_MS", "0"),
            ("AQI_SYNC_MAX_RETRIES", "5"),
            ("AQI_SYNC_FALLBACK", "Placeholder"),
        ]);
        let mut config = SyncConfig::default();
        apply_env_overrides(&mut config, |name| vars.get(name).cloned()).unwrap();

        assert_eq!(config.provider.api_token, "abc123");
        assert_eq!(config.poller.poll_interval_ms, 120_000);
        assert_eq!(config.poller.min_fetch_interval_ms, 0);
        assert_eq!(config.poller.max_retries, 5);
        assert_eq!(config.fallback, FallbackPolicy::Placeholder);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_bad_env_values_rejected() {
        let vars = env(&[("AQI_SYNC_POLL_INTERVAL_MS", "0")]);
        let mut config = SyncConfig::default();
        assert!(apply_env_overrides(&mut config, |name| vars.get(name).cloned()).is_err());

        let vars = env(&[("AQI_SYNC_FALLBACK", "maybe")]);
        let err = apply_env_overrides(&mut config, |name| vars.get(name).cloned()).unwrap_err();
        assert!(err.to_string().contains("surface, placeholder"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            fallback = "placeholder"

            [poller]
            poll_interval_ms = 600000

            [[locations]]
            name = "Fresno"
            lat = 36.7378
            lng = -119.7871
            "#,
        )
        .unwrap();

        assert_eq!(config.poller.poll_interval_ms, 600_000);
        assert_eq!(config.poller.min_fetch_interval_ms, 60_000);
        assert_eq!(config.locations.len(), 1);
        assert_eq!(config.fallback, FallbackPolicy::Placeholder);
        assert_eq!(config.insights.bands.len(), 6);
    }
}
