//! Configuration for the raw ingestion coordination core.
//!
//! Settings are loaded from layered files under `configuration/` with `APP_`-prefixed
//! environment overrides, see [`load::load_config`].

pub mod environment;
pub mod load;
pub mod shared;

pub use load::{Config, LoadConfigError, load_config, load_config_from};
