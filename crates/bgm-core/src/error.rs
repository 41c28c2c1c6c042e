//! Error taxonomy for backends, the dispatcher and configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Everything a playback backend (or the dispatcher forwarding to one) can report.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cannot open asset {}: {source}", path.display())]
    AssetUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported asset {}: {reason}", path.display())]
    DecodeUnsupported { path: PathBuf, reason: String },

    #[error("audio engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("volume {0} is outside [0, 1]")]
    InvalidVolume(f32),

    #[error("resume requested while not paused")]
    NotPaused,

    #[error("backend has been torn down")]
    BackendTornDown,

    #[error("audio engine failure: {0}")]
    EngineFailure(String),
}

impl BackendError {
    pub(crate) fn unsupported(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DecodeUnsupported {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Rejects volumes outside `[0, 1]`, NaN included.
pub fn validate_volume(volume: f32) -> Result<f32, BackendError> {
    if (0.0..=1.0).contains(&volume) {
        Ok(volume)
    } else {
        Err(BackendError::InvalidVolume(volume))
    }
}

/// Failure to load or validate a [`crate::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
