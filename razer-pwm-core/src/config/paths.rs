//! Default path resolution for configuration files
//!
//! Uses XDG Base Directory specification when available, with sensible fallbacks.

use std::path::PathBuf;

/// Environment variable overriding the configuration file location
pub const CONFIG_ENV_VAR: &str = "RAZER_PWM_CONFIG";

/// Returns the default path for the static configuration file.
///
/// Uses XDG config directory if available:
/// - Linux/macOS: `~/.config/razer-pwm/config.toml`
/// - Fallback: `/etc/razer-pwm/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("razer-pwm")
        .join("config.toml")
}
