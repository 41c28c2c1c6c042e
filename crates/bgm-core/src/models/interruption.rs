use serde::{Deserialize, Serialize};

/// Audio-session interruption reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interruption {
    /// Another party took the audio output (incoming call, other app).
    Began,
    /// Output ownership came back.
    Ended,
}
