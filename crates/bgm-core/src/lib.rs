//! bgm-core — background music playback for game engines.
//!
//! One dispatcher, interchangeable engines. Game code asks for a track and
//! says what kind of content it is; the dispatcher keeps exactly one backend
//! alive for that kind and forwards transport controls to it.
//!
//! # Architecture
//!
//! ```text
//! Layer 0: Transport (producer thread -> ring -> cpal or null sink)
//! Layer 1: Backends (symphonia streams, midly-driven synth)
//! Layer 2: Factory + Dispatcher (kind -> backend, switch on demand)
//! Layer 3: Embedders (FFI, CLI, interruption feeds)
//! ```

pub mod backends;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod factory;
pub mod interruption;
pub mod models;

#[cfg(any(test, feature = "test-fixtures"))]
#[doc(hidden)]
pub mod fixtures;

pub use backends::{AudioBackend, Backend, HighQualityBackend, SequencedBackend};
pub use config::{Config, OutputMode, SequencerConfig, Waveform};
pub use dispatcher::{attach_interruptions, MusicDispatcher, SharedDispatcher};
pub use error::{validate_volume, BackendError, ConfigError};
pub use factory::{BackendFactory, MakeBackend};
pub use interruption::{HandlerResult, InterruptionBroadcaster};
pub use models::{AudioContentKind, Interruption, PlaybackSnapshot};
