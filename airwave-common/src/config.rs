//! Configuration loading and tiered resolution
//!
//! Follows the priority order used throughout the workspace this crate grew
//! from: explicit argument > environment variable > TOML config file >
//! compiled default. Each tier is optional; the first tier that yields a
//! value wins.

use crate::{Error, Result};
use std::path::PathBuf;

/// Path to the user's `airwave.toml`, following OS conventions.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("airwave").join("airwave.toml"))
}

/// Path to the default data directory (library database, etc.).
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("airwave"))
        .unwrap_or_else(|| PathBuf::from("./airwave_data"))
}

/// Load and parse a TOML config file into `T`, returning `None` if the file
/// does not exist. Parse errors are surfaced, not swallowed.
pub fn load_toml_config<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    let value = toml::from_str(&text)
        .map_err(|e| Error::Config(format!("invalid TOML in {}: {e}", path.display())))?;
    Ok(Some(value))
}

/// Resolve a string-valued setting with the standard tier order.
///
/// `env_var` is checked first, then `toml_value` (already extracted by the
/// caller from a loaded config file), then `default`.
pub fn resolve_str(env_var: &str, toml_value: Option<&str>, default: &str) -> String {
    if let Ok(v) = std::env::var(env_var) {
        return v;
    }
    if let Some(v) = toml_value {
        return v.to_string();
    }
    default.to_string()
}

/// Resolve a numeric setting with the standard tier order. Malformed
/// environment values are ignored in favor of the next tier rather than
/// causing a hard failure.
pub fn resolve_f64(env_var: &str, toml_value: Option<f64>, default: f64) -> f64 {
    if let Ok(v) = std::env::var(env_var) {
        if let Ok(parsed) = v.parse() {
            return parsed;
        }
    }
    toml_value.unwrap_or(default)
}

/// Resolve an integer setting with the standard tier order.
pub fn resolve_usize(env_var: &str, toml_value: Option<usize>, default: usize) -> usize {
    if let Ok(v) = std::env::var(env_var) {
        if let Ok(parsed) = v.parse() {
            return parsed;
        }
    }
    toml_value.unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_str_falls_back_through_tiers() {
        assert_eq!(resolve_str("AIRWAVE_NONEXISTENT_KEY", None, "default"), "default");
        assert_eq!(resolve_str("AIRWAVE_NONEXISTENT_KEY", Some("toml"), "default"), "toml");
    }

    #[test]
    fn resolve_f64_ignores_malformed_env() {
        std::env::set_var("AIRWAVE_TEST_MALFORMED_F64", "not-a-number");
        assert_eq!(resolve_f64("AIRWAVE_TEST_MALFORMED_F64", Some(0.5), 0.1), 0.5);
        std::env::remove_var("AIRWAVE_TEST_MALFORMED_F64");
    }
}
