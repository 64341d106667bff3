pub mod types;

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Result, SynthError};

pub const CONFIG_FILE_NAME: &str = ".chartify.toml";

/// Get the global config file path (~/.chartify.toml)
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(CONFIG_FILE_NAME))
}

/// Get the local config file path (<input>/.chartify.toml)
pub fn local_config_path(input_dir: &Path) -> PathBuf {
    input_dir.join(CONFIG_FILE_NAME)
}

/// Load configuration.
///
/// An explicit path must exist. Otherwise the input directory is checked
/// first, then the home directory, then defaults apply. A file that exists
/// but does not parse is an error.
pub fn load_config(explicit: Option<&Path>, input_dir: Option<&Path>) -> Result<types::Config> {
    if let Some(path) = explicit {
        return read_config(path);
    }

    if let Some(dir) = input_dir {
        let local = local_config_path(dir);
        if local.is_file() {
            return read_config(&local);
        }
    }

    if let Some(global) = global_config_path() {
        if global.is_file() {
            return read_config(&global);
        }
    }

    debug!("No {} found, using defaults", CONFIG_FILE_NAME);
    Ok(types::Config::default())
}

fn read_config(path: &Path) -> Result<types::Config> {
    let content = fs::read_to_string(path)
        .map_err(|e| SynthError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| SynthError::Config(format!("{}: {}", path.display(), e)))?;
    debug!("Loaded configuration from {}", path.display());
    Ok(config)
}
