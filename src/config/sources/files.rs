//! TOML file sources: global (`$XDG_CONFIG_HOME/hashsync/config.toml`) and workspace.

use crate::config::xdg;
use crate::config::WORKSPACE_CONFIG_FILE;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File, FileFormat};
use std::path::Path;
use tracing::debug;

pub fn add_file(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
    required: bool,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    debug!(path = %path.display(), required, "Adding config file source");
    Ok(builder.add_source(
        File::from(path)
            .format(FileFormat::Toml)
            .required(required),
    ))
}

/// Global config file; skipped when the config home cannot be determined.
pub fn add_global_file(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    match xdg::global_config_path() {
        Ok(path) => add_file(builder, &path, false),
        Err(_) => Ok(builder),
    }
}

pub fn add_workspace_file(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    add_file(builder, &workspace_root.join(WORKSPACE_CONFIG_FILE), false)
}
