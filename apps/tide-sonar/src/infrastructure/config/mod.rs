//! Configuration Module
//!
//! Environment-driven configuration for the detector service.

mod settings;

pub use settings::{
    ConfigError, License, MarketSettings, ProducerSettings, RelaySettings, ServerSettings,
    SonarConfig, SourceKind, SourceSettings,
};
