//! Configuration loading
//!
//! Reads the static TOML configuration, creating it with defaults when the
//! file does not exist yet.

use razer_pwm_core::{default_config_path, RazerPwmError, Result, StaticConfig, CONFIG_ENV_VAR};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// Resolve the configuration path: CLI flag > environment variable > default
pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    cli.unwrap_or_else(|| {
        std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path)
    })
}

/// Load and validate the static config, creating it with defaults if missing
pub async fn load_config(path: &Path) -> Result<StaticConfig> {
    let config = if !path.exists() {
        info!(
            "Config not found at {}. Creating with defaults.",
            path.display()
        );

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                RazerPwmError::Config(format!(
                    "Failed to create config directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let config = StaticConfig::default();
        let toml_str = config
            .to_toml()
            .map_err(|e| RazerPwmError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, &toml_str)
            .await
            .map_err(|e| RazerPwmError::Config(format!("Failed to write config file: {}", e)))?;
        config
    } else {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| RazerPwmError::Config(format!("Failed to read config file: {}", e)))?;
        StaticConfig::from_toml(&content)
            .map_err(|e| RazerPwmError::Config(format!("Failed to parse config file: {}", e)))?
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_creates_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("razer-pwm").join("config.toml");

        let config = load_config(&config_path).await.unwrap();
        assert!(config_path.exists());
        assert_eq!(config.poller.interval_ms, 1000);

        // Second load reads the file back
        let reloaded = load_config(&config_path).await.unwrap();
        assert_eq!(reloaded.guard.name, config.guard.name);
    }

    #[tokio::test]
    async fn test_load_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            "[poller]\ninterval_ms = 250\n\n[channels]\n2 = 75\n",
        )
        .await
        .unwrap();

        let config = load_config(&config_path).await.unwrap();
        assert_eq!(config.poller.interval_ms, 250);
        assert_eq!(config.startup_power(2), 75);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_values() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[shutdown]\npower_percent = 140\n")
            .await
            .unwrap();

        assert!(matches!(
            load_config(&config_path).await,
            Err(RazerPwmError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[poller\n").await.unwrap();

        let err = load_config(&config_path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_cli_path_wins() {
        let path = resolve_config_path(Some(PathBuf::from("/tmp/custom.toml")));
        assert_eq!(path, PathBuf::from("/tmp/custom.toml"));
    }
}
