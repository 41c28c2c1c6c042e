//! Content kinds — the tag that selects a backend.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which backend an asset needs. Always supplied by the caller, never sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioContentKind {
    /// Compressed or PCM audio streamed through the decoder (OGG, MP3, FLAC, WAV...).
    StreamedHighQuality,
    /// Note data rendered by the built-in synthesizer (Standard MIDI Files).
    SynthesizedSequence,
}

impl AudioContentKind {
    pub const ALL: [AudioContentKind; 2] = [
        AudioContentKind::StreamedHighQuality,
        AudioContentKind::SynthesizedSequence,
    ];

    /// Parse the short names used by the CLI and the C surface.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "streamed" | "streamed_high_quality" | "hq" => Some(Self::StreamedHighQuality),
            "sequenced" | "synthesized_sequence" | "midi" => Some(Self::SynthesizedSequence),
            _ => None,
        }
    }
}

impl fmt::Display for AudioContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StreamedHighQuality => "streamed_high_quality",
            Self::SynthesizedSequence => "synthesized_sequence",
        })
    }
}
