pub mod doctor;
pub mod init;
pub mod models;
pub mod serve;

use physiogold_config::{AppConfig, ConfigError};
use std::path::{Path, PathBuf};

/// Load from `--config` when given, else from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}

pub fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::default_path)
}
