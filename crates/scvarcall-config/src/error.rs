//! Errors raised while reading or checking configuration.

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render config as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Parsed fine, but the value cannot drive a run.
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}
