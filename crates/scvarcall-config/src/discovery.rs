//! Finding config files and stacking them over the defaults.
//!
//! Two layers are consulted, lowest precedence first:
//!
//! | Layer   | Location                                      |
//! |---------|-----------------------------------------------|
//! | user    | `$SCVARCALL_CONFIG_DIR/config.toml`, else `<config dir>/scvarcall/config.toml` |
//! | project | `./scvarcall.toml` (the submission directory) |
//!
//! Discovery itself never fails. An absent layer is skipped and a broken
//! one is reported through [`LayerStatus::Rejected`] so the caller can warn.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, ScvarcallConfig};

const APP_DIR: &str = "scvarcall";
const USER_FILE: &str = "config.toml";
const PROJECT_FILE: &str = "scvarcall.toml";
const CONFIG_DIR_ENV: &str = "SCVARCALL_CONFIG_DIR";

/// Which layer a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    User,
    Project,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layer::User => "user",
            Layer::Project => "project",
        })
    }
}

/// What happened when a layer's file was consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerStatus {
    Absent,
    Applied,
    /// The file exists but could not be used; holds the reason.
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub layer: Layer,
    pub path: PathBuf,
    pub status: LayerStatus,
}

/// Merged configuration plus a record of every file consulted.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ScvarcallConfig,
    /// Lowest precedence first.
    pub sources: Vec<ConfigSource>,
}

impl LoadedConfig {
    /// Files that contributed to [`LoadedConfig::config`].
    pub fn loaded_from(&self) -> impl Iterator<Item = &Path> {
        self.sources
            .iter()
            .filter(|s| s.status == LayerStatus::Applied)
            .map(|s| s.path.as_path())
    }

    /// Files that were found but skipped, with the reason.
    pub fn rejected(&self) -> impl Iterator<Item = (&ConfigSource, &str)> {
        self.sources.iter().filter_map(|s| match &s.status {
            LayerStatus::Rejected(reason) => Some((s, reason.as_str())),
            _ => None,
        })
    }
}

/// Discover both layers, looking for the project file in `project_dir`
/// (the working directory when `None`).
pub fn load_config(project_dir: Option<&Path>) -> LoadedConfig {
    load_config_with_options(project_dir, user_config_dir().as_deref())
}

/// Like [`load_config`] but with the user config directory given
/// explicitly. `None` skips the user layer.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    user_dir: Option<&Path>,
) -> LoadedConfig {
    let project_dir = project_dir.unwrap_or(Path::new("."));
    let candidates = user_dir
        .map(|dir| (Layer::User, dir.join(USER_FILE)))
        .into_iter()
        .chain([(Layer::Project, project_dir.join(PROJECT_FILE))]);

    let mut config = ScvarcallConfig::new();
    let sources = candidates
        .map(|(layer, path)| {
            let status = apply_layer(&mut config, &path);
            ConfigSource {
                layer,
                path,
                status,
            }
        })
        .collect();

    LoadedConfig { config, sources }
}

/// Read and parse one file. Used for `--config`, where failure is fatal.
pub fn load_config_file(path: &Path) -> Result<ScvarcallConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    ScvarcallConfig::from_toml(&text)
}

/// Directory holding the user config file and the rolling logs.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join(APP_DIR)),
    }
}

fn apply_layer(config: &mut ScvarcallConfig, path: &Path) -> LayerStatus {
    if !path.is_file() {
        return LayerStatus::Absent;
    }
    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            LayerStatus::Applied
        }
        Err(e) => LayerStatus::Rejected(e.to_string()),
    }
}
