//! Music dispatcher — one stable playback surface over swappable backends.
//!
//! Owns at most one live backend. `play` with a different content kind tears
//! the current backend down before the factory builds the next one, so two
//! engines never render at once. Everything else forwards to whichever
//! backend is active, or succeeds as a no-op when none is.
//!
//! The dispatcher is single-owner (`&mut self`); share it across threads as a
//! [`SharedDispatcher`], whose lock also serialises backend switches against
//! interruption callbacks arriving on platform threads.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backends::AudioBackend;
use crate::config::Config;
use crate::error::{validate_volume, BackendError};
use crate::factory::{BackendFactory, MakeBackend};
use crate::interruption::InterruptionBroadcaster;
use crate::models::{AudioContentKind, Interruption, PlaybackSnapshot};

/// Reported by [`MusicDispatcher::volume`] before any volume was set and
/// while no backend is active.
pub const DEFAULT_VOLUME: f32 = 1.0;

pub type SharedDispatcher<F = BackendFactory> = Arc<Mutex<MusicDispatcher<F>>>;

struct Active<B> {
    backend: B,
    kind: AudioContentKind,
    /// Asset of the last successful `play`.
    path: Option<PathBuf>,
}

pub struct MusicDispatcher<F: MakeBackend = BackendFactory> {
    factory: F,
    active: Option<Active<F::Backend>>,
    /// Last volume set explicitly; re-applied to every backend created later.
    volume: Option<f32>,
    resume_after_interruption: bool,
    /// Playback was paused by an interruption, not by the caller.
    paused_by_interruption: bool,
}

impl MusicDispatcher<BackendFactory> {
    pub fn new(config: Config) -> Self {
        let resume = config.resume_after_interruption;
        Self::with_factory(BackendFactory::new(config), resume)
    }

    pub fn shared(config: Config) -> SharedDispatcher {
        Arc::new(Mutex::new(Self::new(config)))
    }
}

impl<F: MakeBackend> MusicDispatcher<F> {
    pub fn with_factory(factory: F, resume_after_interruption: bool) -> Self {
        Self {
            factory,
            active: None,
            volume: None,
            resume_after_interruption,
            paused_by_interruption: false,
        }
    }

    /// Play `path` on the backend for `kind`, switching backends if needed.
    ///
    /// If building the new backend fails, no backend is active afterwards.
    /// If the backend's own `play` fails, the backend stays active so volume
    /// and stop remain controllable.
    pub fn play(&mut self, path: impl AsRef<Path>, kind: AudioContentKind) -> Result<(), BackendError> {
        let path = path.as_ref();
        self.paused_by_interruption = false;

        let active = match self.active.take() {
            Some(active) if active.kind == kind => active,
            previous => {
                if let Some(old) = previous {
                    release(old.backend, "switching content kind");
                }
                let backend = self.factory.create(kind)?;
                if let Some(volume) = self.volume {
                    if let Err(e) = backend.set_volume(volume) {
                        log::warn!("bgm: could not carry volume {} over to {}: {}", volume, kind, e);
                    }
                }
                Active {
                    backend,
                    kind,
                    path: None,
                }
            }
        };

        let active = self.active.insert(active);
        let result = active.backend.play(path, kind);
        active.path = result.is_ok().then(|| path.to_path_buf());
        if let Err(e) = &result {
            log::warn!("bgm: play {} as {} failed: {}", path.display(), kind, e);
        }
        result
    }

    pub fn pause(&mut self) -> Result<(), BackendError> {
        self.paused_by_interruption = false;
        match &self.active {
            Some(active) => active.backend.pause(),
            None => Ok(()),
        }
    }

    pub fn resume(&mut self) -> Result<(), BackendError> {
        self.paused_by_interruption = false;
        match &self.active {
            Some(active) => active.backend.resume(),
            None => Ok(()),
        }
    }

    /// Validated here, so backends never see an out-of-range volume. With no
    /// backend active the value is kept for the next one.
    pub fn set_volume(&mut self, volume: f32) -> Result<(), BackendError> {
        let volume = validate_volume(volume)?;
        if let Some(active) = &self.active {
            active.backend.set_volume(volume)?;
        }
        self.volume = Some(volume);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), BackendError> {
        self.paused_by_interruption = false;
        match &self.active {
            Some(active) => active.backend.stop(),
            None => Ok(()),
        }
    }

    /// Tear the active backend down and discard it. The next `play` builds a
    /// fresh one.
    pub fn tear_down(&mut self) -> Result<(), BackendError> {
        self.paused_by_interruption = false;
        match self.active.take() {
            Some(active) => active.backend.tear_down(),
            None => Ok(()),
        }
    }

    pub fn playing(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| a.backend.is_playing())
            .unwrap_or(false)
    }

    pub fn paused(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| a.backend.is_paused())
            .unwrap_or(false)
    }

    pub fn volume(&self) -> f32 {
        match &self.active {
            Some(active) => active.backend.volume(),
            None => self.volume.unwrap_or(DEFAULT_VOLUME),
        }
    }

    /// Kind of the active backend.
    pub fn kind(&self) -> Option<AudioContentKind> {
        self.active.as_ref().map(|a| a.kind)
    }

    pub fn path(&self) -> Option<&Path> {
        self.active.as_ref().and_then(|a| a.path.as_deref())
    }

    pub fn backend(&self) -> Option<&F::Backend> {
        self.active.as_ref().map(|a| &a.backend)
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            kind: self.kind(),
            path: self.path().map(Path::to_path_buf),
            playing: self.playing(),
            paused: self.paused(),
            volume: self.volume(),
            position_ms: self
                .active
                .as_ref()
                .map(|a| a.backend.position_ms())
                .unwrap_or(0),
        }
    }

    /// Pause on `Began`; on `Ended` resume only what the interruption paused.
    pub fn handle_interruption(&mut self, event: Interruption) -> Result<(), BackendError> {
        match event {
            Interruption::Began => {
                if self.playing() && !self.paused() {
                    self.pause()?;
                    self.paused_by_interruption = true;
                }
                Ok(())
            }
            Interruption::Ended => {
                let interrupted = std::mem::take(&mut self.paused_by_interruption);
                if interrupted && self.resume_after_interruption && self.paused() {
                    self.resume()
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl<F: MakeBackend> Drop for MusicDispatcher<F> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            release(active.backend, "shutting down");
        }
    }
}

/// Register `dispatcher` as an interruption listener.
///
/// The handler holds a weak reference; once the dispatcher is dropped it
/// silently does nothing.
pub fn attach_interruptions<F>(dispatcher: &SharedDispatcher<F>, broadcaster: &InterruptionBroadcaster)
where
    F: MakeBackend + Send + 'static,
{
    let weak: Weak<Mutex<MusicDispatcher<F>>> = Arc::downgrade(dispatcher);
    broadcaster.add_handler(move |event| {
        let Some(dispatcher) = weak.upgrade() else {
            return Ok(());
        };
        let result = dispatcher.lock().handle_interruption(event);
        result.map_err(Into::into)
    });
}

/// Tear down a backend that is being discarded. Failures are logged only.
fn release<B: AudioBackend>(backend: B, reason: &str) {
    if let Err(e) = backend.tear_down() {
        log::warn!(
            "bgm: teardown of {} backend failed while {}: {}",
            backend.kind(),
            reason,
            e
        );
    }
}
