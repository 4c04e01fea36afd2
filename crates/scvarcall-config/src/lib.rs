//! Configuration system for the scvarcall pipeline.
//!
//! Provides TOML-based configuration with:
//! - Executable locations for the external tools (`[tools]`)
//! - Batch scheduler submission settings (`[scheduler]`)
//! - Chunking and polling parameters (`[pipeline]`)
//! - Config file layering (XDG user config + project-local overrides)
//!
//! Every field has a built-in default, so running without any config file
//! is the normal case.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, Layer, LayerStatus, LoadedConfig, load_config, load_config_file,
    load_config_with_options, user_config_dir,
};
pub use error::{ConfigError, Result};
pub use types::*;
