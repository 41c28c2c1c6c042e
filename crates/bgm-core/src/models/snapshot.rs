use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::AudioContentKind;

/// Point-in-time view of a dispatcher, serialised for embedders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub kind: Option<AudioContentKind>,
    pub path: Option<PathBuf>,
    pub playing: bool,
    pub paused: bool,
    pub volume: f32,
    pub position_ms: u64,
}

impl PlaybackSnapshot {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
