//! Tiny on-disk assets for tests: a mono PCM WAV and a one-note MIDI file.

use std::path::{Path, PathBuf};

use midly::num::{u15, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

pub const WAV_RATE: u32 = 8_000;

/// 16-bit mono 440 Hz sine, `seconds` long.
pub fn write_wav(dir: &Path, name: &str, seconds: f32) -> PathBuf {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: WAV_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let path = dir.join(name);
    let mut writer = hound::WavWriter::create(&path, spec).expect("create wav fixture");

    let frames = (seconds * WAV_RATE as f32).round() as u32;
    for i in 0..frames {
        let t = i as f32 / WAV_RATE as f32;
        let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 0.5 * i16::MAX as f32;
        writer.write_sample(sample as i16).expect("write wav sample");
    }
    writer.finalize().expect("finalize wav fixture");
    path
}

/// Format 0, 480 ppq, default tempo: middle C for two quarters (1.0 s).
pub fn midi_bytes() -> Vec<u8> {
    midi_bytes_on_channel(0)
}

pub fn midi_bytes_on_channel(channel: u8) -> Vec<u8> {
    let channel = u4::new(channel);
    let key = u7::new(60);
    let note = |delta: u32, message: MidiMessage| TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Midi { channel, message },
    };

    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(480)),
    ));
    smf.tracks.push(vec![
        note(0, MidiMessage::NoteOn { key, vel: u7::new(100) }),
        note(960, MidiMessage::NoteOff { key, vel: u7::new(64) }),
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).expect("serialize midi fixture");
    bytes
}

pub fn write_midi(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, midi_bytes()).expect("write midi fixture");
    path
}
