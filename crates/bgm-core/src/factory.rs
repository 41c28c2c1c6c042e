//! Backend construction — one fresh instance per request, no caching.

use crate::backends::{AudioBackend, Backend, HighQualityBackend, SequencedBackend};
use crate::config::Config;
use crate::error::BackendError;
use crate::models::AudioContentKind;

/// Seam between the dispatcher and backend construction.
pub trait MakeBackend {
    type Backend: AudioBackend;

    /// Build a new backend for `kind`, propagating its initializer's error.
    fn create(&self, kind: AudioContentKind) -> Result<Self::Backend, BackendError>;
}

/// Maps each [`AudioContentKind`] to its [`Backend`] variant.
#[derive(Debug, Clone, Default)]
pub struct BackendFactory {
    config: Config,
}

impl BackendFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl MakeBackend for BackendFactory {
    type Backend = Backend;

    fn create(&self, kind: AudioContentKind) -> Result<Backend, BackendError> {
        let backend = match kind {
            AudioContentKind::StreamedHighQuality => {
                Backend::HighQuality(HighQualityBackend::new(&self.config)?)
            }
            AudioContentKind::SynthesizedSequence => {
                Backend::Sequenced(SequencedBackend::new(&self.config)?)
            }
        };
        log::debug!("bgm: created {} backend #{}", kind, backend.id());
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_kind_maps_to_its_variant() {
        let factory = BackendFactory::new(Config::headless());
        for kind in AudioContentKind::ALL {
            let backend = factory.create(kind).unwrap();
            assert_eq!(backend.kind(), kind);
            match (kind, &backend) {
                (AudioContentKind::StreamedHighQuality, Backend::HighQuality(_)) => {}
                (AudioContentKind::SynthesizedSequence, Backend::Sequenced(_)) => {}
                _ => panic!("{} produced the wrong variant", kind),
            }
        }
    }

    #[test]
    fn every_call_builds_a_fresh_instance() {
        let factory = BackendFactory::new(Config::headless());
        for kind in AudioContentKind::ALL {
            let a = factory.create(kind).unwrap();
            let b = factory.create(kind).unwrap();
            assert_ne!(a.id(), b.id());
        }
    }

    #[test]
    fn fresh_backends_are_idle() {
        let factory = BackendFactory::new(Config::headless());
        let backend = factory.create(AudioContentKind::StreamedHighQuality).unwrap();
        assert!(!backend.is_playing());
        assert!(!backend.is_paused());
        assert!(!backend.is_error());
    }
}
