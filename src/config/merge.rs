//! Config composition: layered sources merged into one `SyncConfig`.

pub mod service;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};

/// Empty builder; defaults come from `#[serde(default)]` on the config types.
pub(crate) fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(config::Config::builder())
}
