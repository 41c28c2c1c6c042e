use std::path::Path;

use crate::error::BackendError;
use crate::models::AudioContentKind;

pub mod high_quality;
pub mod sequenced;
mod transport;

pub use high_quality::HighQualityBackend;
pub use sequenced::SequencedBackend;

/// Contract every playback engine satisfies.
///
/// All methods take `&self`; backends manage their own concurrency because
/// their render threads run independently of the control thread.
///
/// - `pause` is a no-op when not playing or already paused.
/// - `resume` fails with [`BackendError::NotPaused`] unless paused.
/// - `stop` is idempotent and resets the position.
/// - `tear_down` may be called any number of times; afterwards every other
///   operation fails with [`BackendError::BackendTornDown`].
pub trait AudioBackend: Send + Sync {
    /// The content kind this backend plays.
    fn kind(&self) -> AudioContentKind;
    fn play(&self, path: &Path, kind: AudioContentKind) -> Result<(), BackendError>;
    fn pause(&self) -> Result<(), BackendError>;
    fn resume(&self) -> Result<(), BackendError>;
    fn set_volume(&self, volume: f32) -> Result<(), BackendError>;
    fn stop(&self) -> Result<(), BackendError>;
    fn tear_down(&self) -> Result<(), BackendError>;
    fn is_playing(&self) -> bool;
    fn is_paused(&self) -> bool;
    fn volume(&self) -> f32;
    fn position_ms(&self) -> u64;
    /// The track ended on its own (never while looping).
    fn is_finished(&self) -> bool;
    /// A render thread gave up with an error.
    fn is_error(&self) -> bool;
}

pub(crate) fn ensure_kind(
    own: AudioContentKind,
    requested: AudioContentKind,
    path: &Path,
) -> Result<(), BackendError> {
    if own == requested {
        Ok(())
    } else {
        Err(BackendError::unsupported(
            path,
            format!("{} content cannot be played by the {} backend", requested, own),
        ))
    }
}

/// The closed set of backends, one variant per [`AudioContentKind`].
pub enum Backend {
    HighQuality(HighQualityBackend),
    Sequenced(SequencedBackend),
}

impl Backend {
    /// Process-unique instance id.
    pub fn id(&self) -> u64 {
        match self {
            Self::HighQuality(b) => b.id(),
            Self::Sequenced(b) => b.id(),
        }
    }

    fn inner(&self) -> &dyn AudioBackend {
        match self {
            Self::HighQuality(b) => b,
            Self::Sequenced(b) => b,
        }
    }
}

impl AudioBackend for Backend {
    fn kind(&self) -> AudioContentKind {
        self.inner().kind()
    }

    fn play(&self, path: &Path, kind: AudioContentKind) -> Result<(), BackendError> {
        self.inner().play(path, kind)
    }

    fn pause(&self) -> Result<(), BackendError> {
        self.inner().pause()
    }

    fn resume(&self) -> Result<(), BackendError> {
        self.inner().resume()
    }

    fn set_volume(&self, volume: f32) -> Result<(), BackendError> {
        self.inner().set_volume(volume)
    }

    fn stop(&self) -> Result<(), BackendError> {
        self.inner().stop()
    }

    fn tear_down(&self) -> Result<(), BackendError> {
        self.inner().tear_down()
    }

    fn is_playing(&self) -> bool {
        self.inner().is_playing()
    }

    fn is_paused(&self) -> bool {
        self.inner().is_paused()
    }

    fn volume(&self) -> f32 {
        self.inner().volume()
    }

    fn position_ms(&self) -> u64 {
        self.inner().position_ms()
    }

    fn is_finished(&self) -> bool {
        self.inner().is_finished()
    }

    fn is_error(&self) -> bool {
        self.inner().is_error()
    }
}
