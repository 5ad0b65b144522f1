//! meshd controller: configuration, topology and startup wiring around the
//! event dispatcher.

pub mod config;
pub mod controller;
pub mod topology;

pub use config::{load_config, Config, ConfigError};
pub use controller::{Controller, StartupError, ENTITY_STORES};
pub use topology::StandaloneTopology;
