//! Configuration types for the Razer PWM daemon
//!
//! Configuration is a single [`StaticConfig`] TOML file, loaded once at
//! startup. Mutable state (requested channel power) is never persisted.

mod paths;
mod static_config;

pub use paths::{default_config_path, CONFIG_ENV_VAR};
pub use static_config::{
    GuardConfig, PollerConfig, ProtocolConfig, ShutdownConfig, StaticConfig,
};
