//! Environment Configuration Loader
//!
//! Loads environment variables from the canonical location: `/etc/omniflow/environment`
//! and exposes typed settings for the engine and its built-in executors.
//!
//! ## Usage
//!
//! Call `load_environment()` early in main() before reading any config:
//!
//! ```rust
//! use omniflow_core::config::{load_environment, OmniflowConfig};
//!
//! load_environment();
//! let config = OmniflowConfig::from_env();
//! assert!(config.http_timeout_secs > 0);
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default path for the environment file
pub const DEFAULT_ENV_FILE: &str = "/etc/omniflow/environment";

/// Alternative paths to check (in order of priority)
pub const ENV_FILE_PATHS: &[&str] = &["/etc/omniflow/environment", ".env"];

/// Variable naming a custom environment file
pub const ENV_FILE_VAR: &str = "OMNIFLOW_ENV_FILE";

/// Load environment variables from the canonical configuration file.
///
/// This function:
/// 1. Checks `$OMNIFLOW_ENV_FILE` if set
/// 2. Checks `/etc/omniflow/environment` (system-wide)
/// 3. Falls back to `.env` in current directory (development)
///
/// Existing environment variables are never overridden.
/// Returns the path that was loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var(ENV_FILE_VAR) {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

/// Try to load an environment file from the given path.
fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);

    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for (key, value) in parse_env_content(&content) {
                if std::env::var(&key).is_err() {
                    debug!("Loaded: {}={}", key, mask_secret(&key, &value));
                    std::env::set_var(&key, &value);
                    loaded_count += 1;
                } else {
                    skipped_count += 1;
                    debug!("Skipped (already set): {}", key);
                }
            }

            info!(
                "Loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );

            Some(path.to_string())
        }
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            None
        }
    }
}

/// Parse the full content of an environment file, skipping comments and blanks.
pub fn parse_env_content(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_env_line)
        .collect()
}

/// Parse a single environment line into key-value pair.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    // Handle: KEY=VALUE, KEY="VALUE", KEY='VALUE', export KEY=VALUE
    let line = line.strip_prefix("export ").unwrap_or(line);
    let mut parts = line.splitn(2, '=');
    let key = parts.next()?.trim();
    let value = parts.next()?.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

fn mask_secret<'a>(key: &str, value: &'a str) -> &'a str {
    if key.contains("KEY") || key.contains("TOKEN") || key.contains("SECRET") {
        "***"
    } else {
        value
    }
}

/// Get an optional configuration value; empty values count as unset.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Typed settings consumed by the engine, the built-in executors and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct OmniflowConfig {
    /// Base URL of the DeepSeek chat-completions API
    pub deepseek_base_url: String,
    /// Request timeout for outbound HTTP calls
    pub http_timeout_secs: u64,
    /// Artificial latency applied by mock executor responses
    pub mock_latency_ms: u64,
    /// Wall-clock budget for one sandboxed CUSTOM node
    pub sandbox_timeout_ms: u64,
    /// Maximum iterations of any one loop in a sandboxed script
    pub sandbox_loop_iteration_limit: u64,
    /// Maximum size of user code accepted by the sandbox
    pub sandbox_max_code_bytes: usize,
    /// Sandboxed scripts allowed to hold a worker thread at once
    pub sandbox_max_concurrent_scripts: usize,
    /// Default run timeout applied by the CLI when none is given
    pub run_timeout_ms: Option<u64>,
    /// Fixed seed for the SAMPLER node (entropy-seeded when unset)
    pub sampler_seed: Option<u64>,
}

impl Default for OmniflowConfig {
    fn default() -> Self {
        Self {
            deepseek_base_url: "https://api.deepseek.com/v1".to_string(),
            http_timeout_secs: 120,
            mock_latency_ms: 0,
            sandbox_timeout_ms: 5_000,
            sandbox_loop_iteration_limit: 1_000_000,
            sandbox_max_code_bytes: 64 * 1024,
            sandbox_max_concurrent_scripts: 4,
            run_timeout_ms: None,
            sampler_seed: None,
        }
    }
}

impl OmniflowConfig {
    /// Build settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| get_config_opt(key))
    }

    /// Build settings from an arbitrary key lookup, falling back to defaults
    /// for missing or unparseable values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            deepseek_base_url: lookup("OMNIFLOW_DEEPSEEK_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.deepseek_base_url),
            http_timeout_secs: parse_u64("OMNIFLOW_HTTP_TIMEOUT_SECS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.http_timeout_secs),
            mock_latency_ms: parse_u64("OMNIFLOW_MOCK_LATENCY_MS")
                .unwrap_or(defaults.mock_latency_ms),
            sandbox_timeout_ms: parse_u64("OMNIFLOW_SANDBOX_TIMEOUT_MS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.sandbox_timeout_ms),
            sandbox_loop_iteration_limit: parse_u64("OMNIFLOW_SANDBOX_LOOP_LIMIT")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.sandbox_loop_iteration_limit),
            sandbox_max_code_bytes: parse_u64("OMNIFLOW_SANDBOX_MAX_CODE_BYTES")
                .filter(|v| *v > 0)
                .map(|v| v as usize)
                .unwrap_or(defaults.sandbox_max_code_bytes),
            sandbox_max_concurrent_scripts: parse_u64("OMNIFLOW_SANDBOX_MAX_CONCURRENT")
                .filter(|v| *v > 0)
                .map(|v| v as usize)
                .unwrap_or(defaults.sandbox_max_concurrent_scripts),
            run_timeout_ms: parse_u64("OMNIFLOW_RUN_TIMEOUT_MS").filter(|v| *v > 0),
            sampler_seed: parse_u64("OMNIFLOW_SAMPLER_SEED"),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn mock_latency(&self) -> Duration {
        Duration::from_millis(self.mock_latency_ms)
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.sandbox_timeout_ms)
    }
}
