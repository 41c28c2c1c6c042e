//! Streaming backend — symphonia decode into the shared transport.
//!
//! Handles everything symphonia's default registry probes: MP3, FLAC, AAC,
//! OGG/Vorbis, WAV, ALAC. The file is opened and probed synchronously in
//! `play` so unreadable or unsupported assets fail the call itself instead of
//! surfacing later on a worker thread.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use super::transport::{SampleSource, Transport};
use super::{ensure_kind, AudioBackend};
use crate::config::Config;
use crate::error::BackendError;
use crate::models::AudioContentKind;

/// Decoder-driven backend for [`AudioContentKind::StreamedHighQuality`].
pub struct HighQualityBackend {
    transport: Transport,
}

impl HighQualityBackend {
    pub const DEFAULT_VOLUME: f32 = 1.0;

    /// Acquire the output engine. Fails with `EngineUnavailable` when the
    /// configured output cannot be opened.
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let transport = Transport::open(config, Self::DEFAULT_VOLUME)?;
        log::debug!("bgm: high-quality backend #{} ready", transport.id());
        Ok(Self { transport })
    }

    /// Process-unique instance id.
    pub fn id(&self) -> u64 {
        self.transport.id()
    }
}

impl AudioBackend for HighQualityBackend {
    fn kind(&self) -> AudioContentKind {
        AudioContentKind::StreamedHighQuality
    }

    fn play(&self, path: &Path, kind: AudioContentKind) -> Result<(), BackendError> {
        self.transport.stop()?;
        ensure_kind(self.kind(), kind, path)?;

        let source = SymphoniaSource::open(path)?;
        log::info!(
            "bgm: streaming {} ({}Hz, {}ch)",
            path.display(),
            source.sample_rate,
            source.channels
        );
        self.transport.start(Box::new(source))
    }

    fn pause(&self) -> Result<(), BackendError> {
        self.transport.pause()
    }

    fn resume(&self) -> Result<(), BackendError> {
        self.transport.resume()
    }

    fn set_volume(&self, volume: f32) -> Result<(), BackendError> {
        self.transport.set_volume(volume)
    }

    fn stop(&self) -> Result<(), BackendError> {
        self.transport.stop()
    }

    fn tear_down(&self) -> Result<(), BackendError> {
        self.transport.tear_down()
    }

    fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    fn is_paused(&self) -> bool {
        self.transport.is_paused()
    }

    fn volume(&self) -> f32 {
        self.transport.volume()
    }

    fn position_ms(&self) -> u64 {
        self.transport.position_ms()
    }

    fn is_finished(&self) -> bool {
        self.transport.is_finished()
    }

    fn is_error(&self) -> bool {
        self.transport.is_error()
    }
}

/// An opened, probed file plus its decoder.
struct SymphoniaSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
}

impl SymphoniaSource {
    fn open(path: &Path) -> Result<Self, BackendError> {
        let file = File::open(path).map_err(|source| BackendError::AssetUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| BackendError::unsupported(path, e))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| BackendError::unsupported(path, "no default track"))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| BackendError::unsupported(path, e))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate: params.sample_rate.unwrap_or(44_100),
            channels: params.channels.map(|c| c.count() as u16).unwrap_or(2),
        })
    }
}

impl SampleSource for SymphoniaSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn next_block(&mut self) -> Result<Option<Vec<f32>>, BackendError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(BackendError::EngineFailure(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    return Ok(Some(buf.samples().to_vec()));
                }
                // A corrupt packet is skipped, not fatal
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("bgm: skipping undecodable packet: {}", e);
                }
                Err(e) => return Err(BackendError::EngineFailure(e.to_string())),
            }
        }
    }

    fn rewind(&mut self) -> Result<(), BackendError> {
        self.format
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time: Time::new(0, 0.0),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| BackendError::EngineFailure(format!("rewind failed: {}", e)))?;
        self.decoder.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn plays_wav() {
        let dir = tempfile::tempdir().unwrap();
        let track = fixtures::write_wav(dir.path(), "track.wav", 3.0);

        let backend = HighQualityBackend::new(&Config::headless()).unwrap();
        assert_eq!(backend.volume(), HighQualityBackend::DEFAULT_VOLUME);
        backend
            .play(&track, AudioContentKind::StreamedHighQuality)
            .unwrap();
        assert!(backend.is_playing());
        assert!(!backend.is_paused());

        backend.pause().unwrap();
        assert!(backend.is_paused());
        backend.resume().unwrap();
        backend.stop().unwrap();
        assert!(!backend.is_playing());
        assert!(!backend.is_paused());
    }

    #[test]
    fn missing_file_is_unreadable() {
        let backend = HighQualityBackend::new(&Config::headless()).unwrap();
        let err = backend
            .play(
                Path::new("/nonexistent/e1m1.ogg"),
                AudioContentKind::StreamedHighQuality,
            )
            .unwrap_err();
        assert!(matches!(err, BackendError::AssetUnreadable { .. }));
        assert!(!backend.is_playing());
    }

    #[test]
    fn garbage_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.ogg");
        std::fs::write(&path, b"definitely not an ogg stream").unwrap();

        let backend = HighQualityBackend::new(&Config::headless()).unwrap();
        let err = backend
            .play(&path, AudioContentKind::StreamedHighQuality)
            .unwrap_err();
        assert!(matches!(err, BackendError::DecodeUnsupported { .. }));
    }

    #[test]
    fn midi_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let theme = fixtures::write_midi(dir.path(), "theme.mid");

        let backend = HighQualityBackend::new(&Config::headless()).unwrap();
        let err = backend
            .play(&theme, AudioContentKind::StreamedHighQuality)
            .unwrap_err();
        assert!(matches!(err, BackendError::DecodeUnsupported { .. }));
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let track = fixtures::write_wav(dir.path(), "track.wav", 1.0);

        let backend = HighQualityBackend::new(&Config::headless()).unwrap();
        let err = backend
            .play(&track, AudioContentKind::SynthesizedSequence)
            .unwrap_err();
        assert!(matches!(err, BackendError::DecodeUnsupported { .. }));
    }

    #[test]
    fn decodes_every_sample() {
        let dir = tempfile::tempdir().unwrap();
        let track = fixtures::write_wav(dir.path(), "short.wav", 0.5);

        let mut source = SymphoniaSource::open(&track).unwrap();
        assert_eq!(source.sample_rate(), fixtures::WAV_RATE);
        assert_eq!(source.channels(), 1);

        let mut total = 0;
        while let Some(block) = source.next_block().unwrap() {
            total += block.len();
        }
        assert_eq!(total, (fixtures::WAV_RATE / 2) as usize);

        source.rewind().unwrap();
        assert!(source.next_block().unwrap().is_some());
    }

    #[test]
    fn torn_down_backend_refuses_work() {
        let dir = tempfile::tempdir().unwrap();
        let track = fixtures::write_wav(dir.path(), "track.wav", 1.0);

        let backend = HighQualityBackend::new(&Config::headless()).unwrap();
        backend
            .play(&track, AudioContentKind::StreamedHighQuality)
            .unwrap();
        backend.tear_down().unwrap();
        backend.tear_down().unwrap();
        assert!(!backend.is_playing());
        assert!(matches!(
            backend.play(&track, AudioContentKind::StreamedHighQuality),
            Err(BackendError::BackendTornDown)
        ));
        assert!(matches!(backend.stop(), Err(BackendError::BackendTornDown)));
        assert!(matches!(backend.resume(), Err(BackendError::BackendTornDown)));
    }
}
