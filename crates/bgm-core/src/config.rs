//! Runtime configuration.
//!
//! Plain JSON on disk, every field optional:
//!
//! ```json
//! { "output": "device", "loop_tracks": true, "sequencer": { "waveform": "square" } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound on `buffer_seconds`; background music never needs more.
pub const MAX_BUFFER_SECONDS: f32 = 60.0;
/// Upper bound on `sequencer.sample_rate`.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Where rendered samples go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// The default output device of the cpal host.
    #[default]
    Device,
    /// Headless sink that consumes samples at real-time rate and discards them.
    Null,
}

/// Oscillator shape used by the sequencer backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    #[default]
    Triangle,
    Saw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub sample_rate: u32,
    pub waveform: Waveform,
    /// Peak amplitude of a single full-velocity voice.
    pub gain: f32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            waveform: Waveform::default(),
            gain: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output: OutputMode,
    /// Restart a track from the top when it reaches the end.
    pub loop_tracks: bool,
    /// Resume on `Interruption::Ended` when the interruption paused playback.
    pub resume_after_interruption: bool,
    /// Capacity of the sample ring between producer and output, in seconds.
    pub buffer_seconds: f32,
    pub sequencer: SequencerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output: OutputMode::default(),
            loop_tracks: true,
            resume_after_interruption: true,
            buffer_seconds: 4.0,
            sequencer: SequencerConfig::default(),
        }
    }
}

impl Config {
    /// Defaults with the null output sink — no audio hardware needed.
    pub fn headless() -> Self {
        Self {
            output: OutputMode::Null,
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_seconds.is_nan() || self.buffer_seconds <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "buffer_seconds must be positive, got {}",
                self.buffer_seconds
            )));
        }
        if self.buffer_seconds > MAX_BUFFER_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "buffer_seconds must be at most {}, got {}",
                MAX_BUFFER_SECONDS, self.buffer_seconds
            )));
        }
        if self.sequencer.sample_rate == 0 || self.sequencer.sample_rate > MAX_SAMPLE_RATE {
            return Err(ConfigError::Invalid(format!(
                "sequencer.sample_rate must be within 1..={}, got {}",
                MAX_SAMPLE_RATE, self.sequencer.sample_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.sequencer.gain) {
            return Err(ConfigError::Invalid(format!(
                "sequencer.gain must be within [0, 1], got {}",
                self.sequencer.gain
            )));
        }
        Ok(())
    }
}
