//! Sequencer backend — Standard MIDI Files rendered by a small oscillator synth.
//!
//! `play` reads and parses the whole file up front (midly), flattens every
//! track into one time-ordered list of note events using the tempo map, and
//! hands a [`Synth`] to the shared transport. Channel 10 (percussion) is
//! skipped; a tone generator has nothing sensible to play there.

use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use super::transport::{SampleSource, Transport};
use super::{ensure_kind, AudioBackend};
use crate::config::{Config, SequencerConfig, Waveform};
use crate::error::BackendError;
use crate::models::AudioContentKind;

/// Frames rendered per producer block.
const BLOCK_FRAMES: usize = 512;
/// Voices beyond this steal the oldest one.
const MAX_VOICES: usize = 32;
const ATTACK_SECONDS: f32 = 0.005;
const RELEASE_SECONDS: f32 = 0.08;
/// Silence rendered past the last event so released voices fade out.
const TAIL_SECONDS: f64 = 0.12;
const PERCUSSION_CHANNEL: u8 = 9;
/// Microseconds per quarter note until the first tempo event (120 bpm).
const DEFAULT_TEMPO: u32 = 500_000;

/// Synth-driven backend for [`AudioContentKind::SynthesizedSequence`].
pub struct SequencedBackend {
    transport: Transport,
    synth: SequencerConfig,
}

impl SequencedBackend {
    pub const DEFAULT_VOLUME: f32 = 0.8;

    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let transport = Transport::open(config, Self::DEFAULT_VOLUME)?;
        log::debug!("bgm: sequenced backend #{} ready", transport.id());
        Ok(Self {
            transport,
            synth: config.sequencer.clone(),
        })
    }

    /// Process-unique instance id.
    pub fn id(&self) -> u64 {
        self.transport.id()
    }
}

impl AudioBackend for SequencedBackend {
    fn kind(&self) -> AudioContentKind {
        AudioContentKind::SynthesizedSequence
    }

    fn play(&self, path: &Path, kind: AudioContentKind) -> Result<(), BackendError> {
        self.transport.stop()?;
        ensure_kind(self.kind(), kind, path)?;

        let bytes = std::fs::read(path).map_err(|source| BackendError::AssetUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let score = Score::parse(&bytes).map_err(|e| BackendError::unsupported(path, e))?;
        log::info!(
            "bgm: sequencing {} ({} notes, {:.1}s)",
            path.display(),
            score.events.len(),
            score.length_seconds
        );
        self.transport.start(Box::new(Synth::new(score, &self.synth)))
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

// ---------------------------------------------------------------------------
// Score
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
struct NoteEvent {
    seconds: f64,
    channel: u8,
    key: u8,
    /// Zero means note off.
    velocity: u8,
}

/// A flattened, time-ordered note list.
#[derive(Debug, Clone, Default)]
struct Score {
    events: Vec<NoteEvent>,
    length_seconds: f64,
}

impl Score {
    fn parse(bytes: &[u8]) -> Result<Self, String> {
        let smf = Smf::parse(bytes).map_err(|e| e.to_string())?;

        // (tick, track, order within track, event)
        let mut timeline = Vec::new();
        for (track_idx, track) in smf.tracks.iter().enumerate() {
            let mut tick: u64 = 0;
            for (order, event) in track.iter().enumerate() {
                tick += event.delta.as_int() as u64;
                timeline.push((tick, track_idx, order, event.kind));
            }
        }
        timeline.sort_by_key(|&(tick, track, order, _)| (tick, track, order));

        let mut clock = TickClock::new(smf.header.timing);
        let mut events = Vec::new();
        let mut length_seconds = 0.0;

        for (tick, _, _, kind) in timeline {
            clock.advance_to(tick);
            let seconds = clock.seconds;
            length_seconds = seconds;
            match kind {
                TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => clock.set_tempo(tempo.as_int()),
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    if channel == PERCUSSION_CHANNEL {
                        continue;
                    }
                    let (key, velocity) = match message {
                        MidiMessage::NoteOn { key, vel } => (key.as_int(), vel.as_int()),
                        MidiMessage::NoteOff { key, .. } => (key.as_int(), 0),
                        _ => continue,
                    };
                    events.push(NoteEvent {
                        seconds,
                        channel,
                        key,
                        velocity,
                    });
                }
                _ => {}
            }
        }

        Ok(Self {
            events,
            length_seconds,
        })
    }
}

/// Converts absolute ticks to seconds across tempo changes.
struct TickClock {
    timing: Timing,
    tempo: u32,
    tick: u64,
    seconds: f64,
}

impl TickClock {
    fn new(timing: Timing) -> Self {
        Self {
            timing,
            tempo: DEFAULT_TEMPO,
            tick: 0,
            seconds: 0.0,
        }
    }

    fn seconds_per_tick(&self) -> f64 {
        match self.timing {
            Timing::Metrical(ppq) => {
                self.tempo as f64 / 1_000_000.0 / ppq.as_int().max(1) as f64
            }
            Timing::Timecode(fps, subframes) => {
                1.0 / (fps.as_f32() as f64 * subframes.max(1) as f64)
            }
        }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        self.seconds + tick.saturating_sub(self.tick) as f64 * self.seconds_per_tick()
    }

    /// Move the anchor forward; ticks must be fed in non-decreasing order.
    fn advance_to(&mut self, tick: u64) {
        self.seconds = self.seconds_at(tick);
        self.tick = tick;
    }

    /// Applies from the current anchor onwards.
    fn set_tempo(&mut self, tempo: u32) {
        self.tempo = tempo.max(1);
    }
}

// ---------------------------------------------------------------------------
// Synth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Voice {
    channel: u8,
    key: u8,
    phase: f32,
    step: f32,
    amplitude: f32,
    envelope: f32,
    releasing: bool,
}

/// Polyphonic oscillator bank driven by a [`Score`]. Renders mono.
struct Synth {
    score: Score,
    waveform: Waveform,
    gain: f32,
    sample_rate: u32,
    next_event: usize,
    cursor: u64,
    end_frame: u64,
    voices: Vec<Voice>,
    attack_step: f32,
    release_step: f32,
}

impl Synth {
    fn new(score: Score, config: &SequencerConfig) -> Self {
        let rate = config.sample_rate.max(1);
        let end_frame = if score.events.is_empty() && score.length_seconds <= 0.0 {
            0
        } else {
            ((score.length_seconds + TAIL_SECONDS) * rate as f64).ceil() as u64
        };
        Self {
            score,
            waveform: config.waveform,
            gain: config.gain,
            sample_rate: rate,
            next_event: 0,
            cursor: 0,
            end_frame,
            voices: Vec::new(),
            attack_step: 1.0 / (ATTACK_SECONDS * rate as f32),
            release_step: 1.0 / (RELEASE_SECONDS * rate as f32),
        }
    }

    fn apply_due_events(&mut self) {
        let now = self.cursor as f64 / self.sample_rate as f64;
        while let Some(event) = self.score.events.get(self.next_event) {
            if event.seconds > now {
                break;
            }
            let event = *event;
            self.next_event += 1;
            if event.velocity == 0 {
                self.note_off(event.channel, event.key);
            } else {
                self.note_on(event.channel, event.key, event.velocity);
            }
        }
    }

    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        if self.voices.len() >= MAX_VOICES {
            self.voices.remove(0);
        }
        let freq = 440.0 * 2f32.powf((key as f32 - 69.0) / 12.0);
        self.voices.push(Voice {
            channel,
            key,
            phase: 0.0,
            step: freq / self.sample_rate as f32,
            amplitude: velocity as f32 / 127.0 * self.gain,
            envelope: 0.0,
            releasing: false,
        });
    }

    fn note_off(&mut self, channel: u8, key: u8) {
        for voice in self
            .voices
            .iter_mut()
            .filter(|v| v.channel == channel && v.key == key)
        {
            voice.releasing = true;
        }
    }

    fn render_frame(&mut self) -> f32 {
        let mut mix = 0.0;
        for voice in &mut self.voices {
            if voice.releasing {
                voice.envelope = (voice.envelope - self.release_step).max(0.0);
            } else {
                voice.envelope = (voice.envelope + self.attack_step).min(1.0);
            }
            mix += oscillate(self.waveform, voice.phase) * voice.amplitude * voice.envelope;
            voice.phase = (voice.phase + voice.step).fract();
        }
        self.voices.retain(|v| !(v.releasing && v.envelope <= 0.0));
        mix.clamp(-1.0, 1.0)
    }
}

impl SampleSource for Synth {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        1
    }

    fn next_block(&mut self) -> Result<Option<Vec<f32>>, BackendError> {
        if self.cursor >= self.end_frame {
            return Ok(None);
        }
        let frames = BLOCK_FRAMES.min((self.end_frame - self.cursor) as usize);
        let mut block = Vec::with_capacity(frames);
        for _ in 0..frames {
            self.apply_due_events();
            block.push(self.render_frame());
            self.cursor += 1;
        }
        Ok(Some(block))
    }

    fn rewind(&mut self) -> Result<(), BackendError> {
        self.cursor = 0;
        self.next_event = 0;
        self.voices.clear();
        Ok(())
    }
}

/// One period of `waveform` sampled at `phase` in [0, 1).
fn oscillate(waveform: Waveform, phase: f32) -> f32 {
    match waveform {
        Waveform::Sine => (phase * std::f32::consts::TAU).sin(),
        Waveform::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        Waveform::Saw => 2.0 * phase - 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn parses_notes_with_tempo() {
        // 480 ppq, default 120 bpm: one quarter = 0.5 s
        let score = Score::parse(&fixtures::midi_bytes()).unwrap();
        assert_eq!(score.events.len(), 2);
        assert_eq!(score.events[0].key, 60);
        assert_eq!(score.events[0].velocity, 100);
        assert!((score.events[0].seconds - 0.0).abs() < 1e-9);
        assert_eq!(score.events[1].velocity, 0);
        assert!((score.events[1].seconds - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tempo_change_rescales_following_ticks() {
        let mut clock = TickClock::new(Timing::Metrical(midly::num::u15::new(480)));
        assert!((clock.seconds_at(480) - 0.5).abs() < 1e-9);
        clock.advance_to(480);
        clock.set_tempo(1_000_000);
        assert!((clock.seconds_at(960) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_midi_bytes() {
        assert!(Score::parse(b"RIFF....WAVEfmt ").is_err());
    }

    #[test]
    fn synth_renders_sound_then_ends() {
        let score = Score::parse(&fixtures::midi_bytes()).unwrap();
        let config = SequencerConfig {
            sample_rate: 8_000,
            ..SequencerConfig::default()
        };
        let mut synth = Synth::new(score, &config);

        let mut samples = Vec::new();
        while let Some(block) = synth.next_block().unwrap() {
            samples.extend(block);
        }
        // One second of note plus the release tail
        let expected = ((1.0 + TAIL_SECONDS) * 8_000.0).ceil() as usize;
        assert_eq!(samples.len(), expected);
        assert!(samples.iter().any(|s| s.abs() > 0.05));
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
        assert!(synth.voices.is_empty());

        synth.rewind().unwrap();
        assert!(synth.next_block().unwrap().is_some());
    }

    #[test]
    fn percussion_channel_is_skipped() {
        let bytes = fixtures::midi_bytes_on_channel(PERCUSSION_CHANNEL);
        let score = Score::parse(&bytes).unwrap();
        assert!(score.events.is_empty());
    }

    #[test]
    fn oscillator_shapes_stay_in_range() {
        for waveform in [Waveform::Sine, Waveform::Square, Waveform::Triangle, Waveform::Saw] {
            for i in 0..100 {
                let v = oscillate(waveform, i as f32 / 100.0);
                assert!((-1.0..=1.0).contains(&v), "{:?} at {}", waveform, i);
            }
        }
    }

    #[test]
    fn plays_midi_file() {
        let dir = tempfile::tempdir().unwrap();
        let theme = fixtures::write_midi(dir.path(), "theme.mid");

        let backend = SequencedBackend::new(&Config::headless()).unwrap();
        assert_eq!(backend.volume(), SequencedBackend::DEFAULT_VOLUME);
        backend
            .play(&theme, AudioContentKind::SynthesizedSequence)
            .unwrap();
        assert!(backend.is_playing());
        backend.stop().unwrap();
        assert!(!backend.is_playing());
    }

    #[test]
    fn wav_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let track = fixtures::write_wav(dir.path(), "track.wav", 0.5);

        let backend = SequencedBackend::new(&Config::headless()).unwrap();
        let err = backend
            .play(&track, AudioContentKind::SynthesizedSequence)
            .unwrap_err();
        assert!(matches!(err, BackendError::DecodeUnsupported { .. }));
        assert!(!backend.is_playing());
    }

    #[test]
    fn missing_file_is_unreadable() {
        let backend = SequencedBackend::new(&Config::headless()).unwrap();
        let err = backend
            .play(
                Path::new("/nonexistent/d_e1m1.mid"),
                AudioContentKind::SynthesizedSequence,
            )
            .unwrap_err();
        assert!(matches!(err, BackendError::AssetUnreadable { .. }));
    }
}
