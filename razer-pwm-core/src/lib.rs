//! Razer PWM Core Library
//!
//! Shared types, errors, and configuration for the Razer PWM fan controller
//! workspace. This crate is used by both the hardware crate and the daemon.

pub mod board;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use board::*;
pub use config::{
    default_config_path, GuardConfig, PollerConfig, ProtocolConfig, ShutdownConfig,
    StaticConfig, CONFIG_ENV_VAR,
};
pub use error::*;
pub use types::*;
