//! Playback transport shared by every backend.
//!
//! A backend turns an asset into a [`SampleSource`]; the transport runs it:
//! 1. a producer thread pulls blocks from the source (resampling if needed)
//! 2. samples flow through a ring buffer
//! 3. an output thread feeds cpal (CoreAudio / ALSA / WASAPI) or the null sink
//!
//! The transport also owns the state every backend exposes (playing, paused,
//! volume, position) and the lifecycle rules they share: pause is idempotent,
//! resume requires a pause, stop resets, teardown is final.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[cfg(feature = "native")]
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use crate::config::{Config, OutputMode};
use crate::error::{validate_volume, BackendError};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Hard cap on ring size in samples (512 MiB of f32).
const MAX_RING_SAMPLES: usize = 1 << 27;

/// Something that renders interleaved f32 audio block by block.
pub(crate) trait SampleSource: Send + 'static {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    /// Next block of interleaved samples, `None` at end of stream.
    fn next_block(&mut self) -> Result<Option<Vec<f32>>, BackendError>;
    /// Jump back to the start of the asset.
    fn rewind(&mut self) -> Result<(), BackendError>;
}

pub(crate) struct Transport {
    id: u64,
    output: OutputMode,
    loop_tracks: bool,
    buffer_seconds: f32,
    torn_down: AtomicBool,
    state: Arc<TransportState>,
}

struct TransportState {
    playing: AtomicBool,
    paused: AtomicBool,
    /// `f32::to_bits` of the gain in [0, 1].
    volume: AtomicU32,
    /// Decode position of the producer in the current pass, ahead of the
    /// output by whatever is buffered.
    position_ms: AtomicU64,
    /// Rate of the samples in the ring (after resampling).
    sample_rate: AtomicU32,
    /// Channel count of the samples in the ring.
    channels: AtomicU32,
    /// Producer writes, output reads.
    samples: Mutex<SampleRing>,
    stop_signal: AtomicBool,
    /// Source reached its end without being stopped (never set while looping).
    finished: AtomicBool,
    /// Set when the producer or output thread exits with an error.
    error: AtomicBool,
    /// Producer + output handles, joined on halt.
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TransportState {
    fn new(volume: f32) -> Self {
        Self {
            playing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            volume: AtomicU32::new(volume.to_bits()),
            position_ms: AtomicU64::new(0),
            sample_rate: AtomicU32::new(44_100),
            channels: AtomicU32::new(2),
            samples: Mutex::new(SampleRing::new(0)),
            stop_signal: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            error: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::SeqCst))
    }
}

impl Transport {
    /// Acquire the output engine named by `config` and build an idle transport.
    pub fn open(config: &Config, default_volume: f32) -> Result<Self, BackendError> {
        acquire_engine(config.output)?;
        Ok(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            output: config.output,
            loop_tracks: config.loop_tracks,
            buffer_seconds: config.buffer_seconds,
            torn_down: AtomicBool::new(false),
            state: Arc::new(TransportState::new(default_volume)),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ensure_live(&self) -> Result<(), BackendError> {
        if self.torn_down.load(Ordering::SeqCst) {
            Err(BackendError::BackendTornDown)
        } else {
            Ok(())
        }
    }

    /// Stop whatever is running and start rendering `source`.
    pub fn start(&self, source: Box<dyn SampleSource>) -> Result<(), BackendError> {
        self.ensure_live()?;
        self.halt();

        let source_rate = source.sample_rate().max(1);
        let channels = source.channels().max(1);
        let output_rate = self.output_rate(source_rate, channels);
        let capacity = ring_capacity(output_rate, channels, self.buffer_seconds).ok_or_else(|| {
            BackendError::EngineFailure(format!(
                "a {}s ring at {}Hz x{} is too large",
                self.buffer_seconds, output_rate, channels
            ))
        })?;

        let st = &self.state;
        st.stop_signal.store(false, Ordering::SeqCst);
        st.finished.store(false, Ordering::SeqCst);
        st.error.store(false, Ordering::SeqCst);
        st.position_ms.store(0, Ordering::SeqCst);
        st.sample_rate.store(output_rate, Ordering::SeqCst);
        st.channels.store(channels as u32, Ordering::SeqCst);
        *st.samples.lock() = SampleRing::new(capacity);
        st.paused.store(false, Ordering::SeqCst);
        st.playing.store(true, Ordering::SeqCst);

        let producer_state = Arc::clone(&self.state);
        let loop_tracks = self.loop_tracks;
        let producer = thread::Builder::new()
            .name(format!("bgm-producer-{}", self.id))
            .spawn(move || {
                if let Err(e) = produce(source, output_rate, loop_tracks, &producer_state) {
                    log::error!("bgm: producer error: {}", e);
                    producer_state.error.store(true, Ordering::SeqCst);
                }
                if !producer_state.stop_signal.load(Ordering::SeqCst) {
                    producer_state.finished.store(true, Ordering::SeqCst);
                }
            });
        match producer {
            Ok(handle) => st.threads.lock().push(handle),
            Err(e) => {
                st.playing.store(false, Ordering::SeqCst);
                return Err(BackendError::EngineFailure(format!(
                    "cannot spawn producer thread: {}",
                    e
                )));
            }
        }

        match self.spawn_output() {
            Ok(handle) => {
                st.threads.lock().push(handle);
                Ok(())
            }
            Err(e) => {
                self.halt();
                Err(BackendError::EngineFailure(format!(
                    "cannot spawn output thread: {}",
                    e
                )))
            }
        }
    }

    fn spawn_output(&self) -> std::io::Result<JoinHandle<()>> {
        let output_state = Arc::clone(&self.state);
        let builder = thread::Builder::new().name(format!("bgm-output-{}", self.id));
        match self.output {
            OutputMode::Null => builder.spawn(move || drain_to_null(output_state)),
            #[cfg(feature = "native")]
            OutputMode::Device => builder.spawn(move || {
                let err_state = Arc::clone(&output_state);
                if let Err(e) = output_from_ring(output_state) {
                    log::error!("bgm: output error: {}", e);
                    err_state.error.store(true, Ordering::SeqCst);
                    err_state.playing.store(false, Ordering::SeqCst);
                }
            }),
            #[cfg(not(feature = "native"))]
            OutputMode::Device => builder.spawn(move || drain_to_null(output_state)),
        }
    }

    #[cfg_attr(not(feature = "native"), allow(unused_variables))]
    fn output_rate(&self, source_rate: u32, channels: u16) -> u32 {
        match self.output {
            OutputMode::Null => source_rate,
            #[cfg(feature = "native")]
            OutputMode::Device => probe_device_rate(source_rate, channels),
            #[cfg(not(feature = "native"))]
            OutputMode::Device => source_rate,
        }
    }

    /// Signal both workers, block until they exit, reset position.
    fn halt(&self) {
        let st = &self.state;
        st.stop_signal.store(true, Ordering::SeqCst);
        st.playing.store(false, Ordering::SeqCst);
        st.paused.store(false, Ordering::SeqCst);
        st.samples.lock().clear(); // Clear first so the output thread exits fast

        // Drain handles then join outside the lock
        let handles: Vec<_> = st.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                log::warn!("bgm: worker thread of backend #{} panicked", self.id);
            }
        }
        st.position_ms.store(0, Ordering::SeqCst);
    }

    pub fn pause(&self) -> Result<(), BackendError> {
        self.ensure_live()?;
        if self.is_playing() {
            self.state.paused.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<(), BackendError> {
        self.ensure_live()?;
        self.state
            .paused
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| BackendError::NotPaused)
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), BackendError> {
        self.ensure_live()?;
        let volume = validate_volume(volume)?;
        self.state.volume.store(volume.to_bits(), Ordering::SeqCst);
        Ok(())
    }

    pub fn stop(&self) -> Result<(), BackendError> {
        self.ensure_live()?;
        self.halt();
        Ok(())
    }

    /// Release the workers for good. Later calls are no-ops.
    pub fn tear_down(&self) -> Result<(), BackendError> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.halt();
        log::debug!("bgm: backend #{} torn down", self.id);
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> f32 {
        self.state.volume()
    }

    /// Audible position: the decode position minus what still sits in the ring.
    pub fn position_ms(&self) -> u64 {
        let st = &self.state;
        let buffered = st.samples.lock().len;
        audible_position_ms(
            st.position_ms.load(Ordering::SeqCst),
            buffered,
            st.channels.load(Ordering::SeqCst),
            st.sample_rate.load(Ordering::SeqCst),
        )
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::SeqCst)
    }

    pub fn is_error(&self) -> bool {
        self.state.error.load(Ordering::SeqCst)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.tear_down();
    }
}

fn acquire_engine(output: OutputMode) -> Result<(), BackendError> {
    match output {
        OutputMode::Null => Ok(()),
        #[cfg(feature = "native")]
        OutputMode::Device => cpal::default_host()
            .default_output_device()
            .map(|_| ())
            .ok_or_else(|| BackendError::EngineUnavailable("no default output device".into())),
        #[cfg(not(feature = "native"))]
        OutputMode::Device => Err(BackendError::EngineUnavailable(
            "built without native audio output".into(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Worker loops
// ---------------------------------------------------------------------------

/// Pull blocks from `source` into the ring until stopped or exhausted.
fn produce(
    mut source: Box<dyn SampleSource>,
    output_rate: u32,
    loop_tracks: bool,
    state: &TransportState,
) -> Result<(), BackendError> {
    let source_rate = source.sample_rate().max(1);
    let channels = source.channels().max(1);
    let mut resampler = if output_rate != source_rate {
        log::info!("bgm: resampling {}Hz -> {}Hz", source_rate, output_rate);
        Some(LinearResampler::new(source_rate, output_rate, channels))
    } else {
        None
    };

    let mut frames: u64 = 0;

    loop {
        if state.stop_signal.load(Ordering::SeqCst) {
            break;
        }

        while state.paused.load(Ordering::SeqCst) {
            if state.stop_signal.load(Ordering::SeqCst) {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }

        let block = match source.next_block()? {
            Some(block) => block,
            // An empty pass would spin forever, so only loop after real audio
            None if loop_tracks && frames > 0 => {
                source.rewind()?;
                frames = 0;
                state.position_ms.store(0, Ordering::SeqCst);
                continue;
            }
            None => break,
        };

        frames += (block.len() / channels as usize) as u64;
        state
            .position_ms
            .store(frames * 1000 / source_rate as u64, Ordering::SeqCst);

        let samples = match resampler.as_mut() {
            Some(rs) => rs.process(&block),
            None => block,
        };
        if !push_with_backpressure(state, &samples) {
            return Ok(());
        }
    }

    Ok(())
}

/// Returns false if stopped before everything was queued.
fn push_with_backpressure(state: &TransportState, mut samples: &[f32]) -> bool {
    while !samples.is_empty() {
        if state.stop_signal.load(Ordering::SeqCst) {
            return false;
        }
        let accepted = state.samples.lock().push(samples);
        samples = &samples[accepted..];
        if !samples.is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
    }
    true
}

/// Headless output: consume the ring at real-time rate and discard it.
fn drain_to_null(state: Arc<TransportState>) {
    const TICK: Duration = Duration::from_millis(10);
    let rate = state.sample_rate.load(Ordering::SeqCst) as usize;
    let channels = state.channels.load(Ordering::SeqCst).max(1) as usize;
    let mut scratch = vec![0.0f32; (rate * channels / 100).max(channels)];

    loop {
        thread::sleep(TICK);
        if state.stop_signal.load(Ordering::SeqCst) {
            break;
        }
        if state.paused.load(Ordering::SeqCst) {
            continue;
        }
        let pulled = state.samples.lock().pull(&mut scratch);
        if pulled == 0 && state.finished.load(Ordering::SeqCst) {
            break;
        }
    }

    state.playing.store(false, Ordering::SeqCst);
}

/// Pull samples from the ring buffer and send them to the cpal device.
///
/// The stream is configured at the ring's rate when the device supports it,
/// so playback speed never drifts; the producer resampled to that rate already.
#[cfg(feature = "native")]
fn output_from_ring(state: Arc<TransportState>) -> Result<(), Box<dyn std::error::Error>> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or("no output device")?;

    let ring_rate = state.sample_rate.load(Ordering::SeqCst);
    let ring_channels = state.channels.load(Ordering::SeqCst).max(1) as u16;

    // Same check `probe_device_rate` made for the producer
    let config: cpal::StreamConfig = if supports_f32_stream(&device, ring_rate, ring_channels) {
        cpal::StreamConfig {
            channels: ring_channels,
            sample_rate: cpal::SampleRate(ring_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    } else {
        let default_cfg = device.default_output_config()?;
        if default_cfg.sample_format() != cpal::SampleFormat::F32 {
            return Err(format!(
                "device does not support f32 output (got {:?})",
                default_cfg.sample_format()
            )
            .into());
        }
        default_cfg.into()
    };

    let out_channels = config.channels;
    let cb_state = Arc::clone(&state);
    let mut scratch = Vec::new();
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            fill_device_buffer(&cb_state, data, ring_channels, out_channels, &mut scratch);
        },
        move |err| {
            log::error!("bgm: cpal error: {}", err);
        },
        None,
    )?;

    stream.play()?;

    // Keep the stream alive while playing or draining
    loop {
        let stopped = state.stop_signal.load(Ordering::SeqCst);
        let finished = state.finished.load(Ordering::SeqCst);
        let buffered = state.samples.lock().len;

        if stopped || (finished && buffered == 0) {
            break;
        }

        thread::sleep(Duration::from_millis(25));
    }

    state.playing.store(false, Ordering::SeqCst);
    Ok(())
}

/// One cpal callback: silence while paused, else ring samples scaled by volume.
#[cfg(feature = "native")]
fn fill_device_buffer(
    state: &TransportState,
    data: &mut [f32],
    ring_channels: u16,
    out_channels: u16,
    scratch: &mut Vec<f32>,
) {
    if state.paused.load(Ordering::SeqCst) {
        data.fill(0.0);
        return;
    }
    if ring_channels == out_channels || out_channels == 0 {
        state.samples.lock().pull(data);
    } else {
        let frames = data.len() / out_channels as usize;
        scratch.resize(frames * ring_channels as usize, 0.0);
        state.samples.lock().pull(scratch);
        adapt_channels(scratch, ring_channels, data, out_channels);
    }
    let gain = state.volume();
    data.iter_mut().for_each(|s| *s *= gain);
}

/// Whether `device` can open an f32 stream at `rate` with at least `channels`.
#[cfg(feature = "native")]
fn supports_f32_stream(device: &cpal::Device, rate: u32, channels: u16) -> bool {
    device
        .supported_output_configs()
        .map(|mut configs| {
            configs.any(|range| {
                range.sample_format() == cpal::SampleFormat::F32
                    && range.channels() >= channels
                    && (range.min_sample_rate().0..=range.max_sample_rate().0).contains(&rate)
            })
        })
        .unwrap_or(false)
}

/// Rate the ring should hold: the source's own rate when the device takes
/// it directly, otherwise the device default so the producer resamples.
#[cfg(feature = "native")]
fn probe_device_rate(source_rate: u32, channels: u16) -> u32 {
    let Some(device) = cpal::default_host().default_output_device() else {
        return source_rate;
    };
    if supports_f32_stream(&device, source_rate, channels) {
        return source_rate;
    }
    device
        .default_output_config()
        .map(|c| c.sample_rate().0)
        .unwrap_or(source_rate)
}

fn audible_position_ms(decoded_ms: u64, buffered: usize, channels: u32, rate: u32) -> u64 {
    let frames = (buffered / channels.max(1) as usize) as u64;
    decoded_ms.saturating_sub(frames * 1000 / rate.max(1) as u64)
}

/// Ring size in samples, or `None` if it would be unreasonably large.
fn ring_capacity(rate: u32, channels: u16, seconds: f32) -> Option<usize> {
    let samples = rate as f64 * channels as f64 * seconds as f64;
    if !samples.is_finite() || samples < 0.0 || samples > MAX_RING_SAMPLES as f64 {
        return None;
    }
    Some((samples as usize).max(channels as usize * 1024))
}

// ---------------------------------------------------------------------------
// Ring buffer, resampler, channel adaptation
// ---------------------------------------------------------------------------

/// Fixed-capacity ring for interleaved f32 samples.
struct SampleRing {
    buf: Vec<f32>,
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity],
            read_pos: 0,
            write_pos: 0,
            len: 0,
        }
    }

    fn free(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Queue as many samples as fit. Returns how many were accepted.
    fn push(&mut self, samples: &[f32]) -> usize {
        let n = samples.len().min(self.free());
        for &s in &samples[..n] {
            self.buf[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % self.buf.len();
        }
        self.len += n;
        n
    }

    /// Fill `out`, zero-padding past what is buffered. Returns samples read.
    fn pull(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.len);
        for sample in out.iter_mut().take(n) {
            *sample = self.buf[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.buf.len();
        }
        self.len -= n;
        out[n..].fill(0.0);
        n
    }

    fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.len = 0;
    }
}

/// Linear interpolation resampler; enough for background music.
struct LinearResampler {
    ratio: f64,
    phase: f64,
    channels: usize,
}

impl LinearResampler {
    fn new(src_rate: u32, dst_rate: u32, channels: u16) -> Self {
        Self {
            ratio: dst_rate as f64 / src_rate as f64,
            phase: 0.0,
            channels: channels.max(1) as usize,
        }
    }

    fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let ch = self.channels;
        let in_frames = input.len() / ch;
        if in_frames == 0 {
            return Vec::new();
        }
        let out_frames = ((in_frames as f64) * self.ratio).ceil() as usize;
        let mut output = Vec::with_capacity(out_frames * ch);

        while output.len() < out_frames * ch {
            let src_idx = self.phase as usize;
            if src_idx >= in_frames {
                break;
            }
            let frac = (self.phase - src_idx as f64) as f32;
            let next_idx = (src_idx + 1).min(in_frames - 1);

            for c in 0..ch {
                let s0 = input[src_idx * ch + c];
                let s1 = input[next_idx * ch + c];
                output.push(s0 + (s1 - s0) * frac);
            }

            self.phase += 1.0 / self.ratio;
        }

        // Carry the fractional phase into the next block
        self.phase = (self.phase - in_frames as f64).max(0.0);
        output
    }
}

/// Adapt interleaved samples between channel counts: mono fans out,
/// multichannel to mono averages, anything else copies and zero-fills.
fn adapt_channels(src: &[f32], src_ch: u16, dst: &mut [f32], dst_ch: u16) {
    let src_ch = src_ch as usize;
    let dst_ch = dst_ch as usize;
    let at = |i: usize| src.get(i).copied().unwrap_or(0.0);

    for (f, frame) in dst.chunks_exact_mut(dst_ch).enumerate() {
        let src_off = f * src_ch;
        if src_ch == 1 {
            frame.fill(at(src_off));
        } else if dst_ch == 1 {
            let sum: f32 = (0..src_ch).map(|c| at(src_off + c)).sum();
            frame[0] = sum / src_ch as f32;
        } else {
            for (c, sample) in frame.iter_mut().enumerate() {
                *sample = if c < src_ch { at(src_off + c) } else { 0.0 };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Constant-value source of a fixed length, counting rewinds.
    struct Tone {
        blocks_left: usize,
        blocks_per_pass: usize,
        rewinds: Arc<AtomicU32>,
    }

    impl SampleSource for Tone {
        fn sample_rate(&self) -> u32 {
            8_000
        }
        fn channels(&self) -> u16 {
            1
        }
        fn next_block(&mut self) -> Result<Option<Vec<f32>>, BackendError> {
            if self.blocks_left == 0 {
                return Ok(None);
            }
            self.blocks_left -= 1;
            Ok(Some(vec![0.5; 80]))
        }
        fn rewind(&mut self) -> Result<(), BackendError> {
            self.rewinds.fetch_add(1, Ordering::SeqCst);
            self.blocks_left = self.blocks_per_pass;
            Ok(())
        }
    }

    fn tone(blocks: usize) -> (Box<dyn SampleSource>, Arc<AtomicU32>) {
        let rewinds = Arc::new(AtomicU32::new(0));
        let source = Tone {
            blocks_left: blocks,
            blocks_per_pass: blocks,
            rewinds: Arc::clone(&rewinds),
        };
        (Box::new(source), rewinds)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..300 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn start_pause_resume_stop() {
        let transport = Transport::open(&Config::headless(), 1.0).unwrap();
        let (source, _) = tone(10_000);
        transport.start(source).unwrap();
        assert!(transport.is_playing());
        assert!(!transport.is_paused());

        transport.pause().unwrap();
        assert!(transport.is_playing());
        assert!(transport.is_paused());
        transport.pause().unwrap();
        assert!(transport.is_paused());

        transport.resume().unwrap();
        assert!(!transport.is_paused());
        assert!(matches!(transport.resume(), Err(BackendError::NotPaused)));

        transport.stop().unwrap();
        assert!(!transport.is_playing());
        assert!(!transport.is_paused());
        assert_eq!(transport.position_ms(), 0);
        transport.stop().unwrap();
    }

    #[test]
    fn pause_when_idle_is_a_no_op() {
        let transport = Transport::open(&Config::headless(), 1.0).unwrap();
        transport.pause().unwrap();
        assert!(!transport.is_paused());
        assert!(matches!(transport.resume(), Err(BackendError::NotPaused)));
    }

    #[test]
    fn loops_at_end_of_stream() {
        let transport = Transport::open(&Config::headless(), 1.0).unwrap();
        let (source, rewinds) = tone(2);
        transport.start(source).unwrap();
        assert!(wait_until(|| rewinds.load(Ordering::SeqCst) >= 2));
        assert!(transport.is_playing());
        assert!(!transport.is_finished());
    }

    #[test]
    fn finishes_without_looping() {
        let config = Config {
            loop_tracks: false,
            ..Config::headless()
        };
        let transport = Transport::open(&config, 1.0).unwrap();
        let (source, rewinds) = tone(2);
        transport.start(source).unwrap();
        assert!(wait_until(|| !transport.is_playing()));
        assert!(transport.is_finished());
        assert_eq!(rewinds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_source_never_spins() {
        let transport = Transport::open(&Config::headless(), 1.0).unwrap();
        let (source, rewinds) = tone(0);
        transport.start(source).unwrap();
        assert!(wait_until(|| !transport.is_playing()));
        assert_eq!(rewinds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn teardown_is_final_and_idempotent() {
        let transport = Transport::open(&Config::headless(), 0.8).unwrap();
        transport.tear_down().unwrap();
        transport.tear_down().unwrap();
        assert!(matches!(transport.pause(), Err(BackendError::BackendTornDown)));
        assert!(matches!(transport.set_volume(0.5), Err(BackendError::BackendTornDown)));
        let (source, _) = tone(1);
        assert!(matches!(transport.start(source), Err(BackendError::BackendTornDown)));
        assert_eq!(transport.volume(), 0.8);
    }

    #[test]
    fn volume_is_validated() {
        let transport = Transport::open(&Config::headless(), 1.0).unwrap();
        assert!(matches!(transport.set_volume(1.1), Err(BackendError::InvalidVolume(_))));
        assert_eq!(transport.volume(), 1.0);
        transport.set_volume(0.25).unwrap();
        assert_eq!(transport.volume(), 0.25);
    }

    #[test]
    fn ids_are_unique() {
        let a = Transport::open(&Config::headless(), 1.0).unwrap();
        let b = Transport::open(&Config::headless(), 1.0).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn position_excludes_buffered_audio() {
        // 2 s decoded, 1.5 s of stereo 8 kHz still queued
        assert_eq!(audible_position_ms(2_000, 24_000, 2, 8_000), 500);
        assert_eq!(audible_position_ms(2_000, 0, 2, 8_000), 2_000);
        // Tail of the previous pass right after a loop rewind
        assert_eq!(audible_position_ms(100, 16_000, 1, 8_000), 0);
    }

    #[test]
    fn ring_capacity_is_bounded() {
        assert_eq!(ring_capacity(8_000, 1, 4.0), Some(32_000));
        assert_eq!(ring_capacity(8_000, 2, 0.01), Some(2 * 1024));
        assert_eq!(ring_capacity(44_100, 2, 1e18), None);
        assert_eq!(ring_capacity(44_100, 2, f32::INFINITY), None);
    }

    #[test]
    fn oversized_buffer_fails_instead_of_panicking() {
        let config = Config {
            buffer_seconds: 1e18,
            ..Config::headless()
        };
        let transport = Transport::open(&config, 1.0).unwrap();
        let (source, _) = tone(1);
        assert!(matches!(transport.start(source), Err(BackendError::EngineFailure(_))));
        assert!(!transport.is_playing());
    }

    #[test]
    fn ring_accepts_only_what_fits() {
        let mut ring = SampleRing::new(4);
        assert_eq!(ring.push(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(ring.push(&[4.0, 5.0]), 1);
        let mut out = [0.0f32; 6];
        assert_eq!(ring.pull(&mut out), 4);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn ring_wraps_around() {
        let mut ring = SampleRing::new(4);
        ring.push(&[1.0, 2.0, 3.0]);
        let mut out = [0.0f32; 3];
        ring.pull(&mut out);
        ring.push(&[7.0, 8.0, 9.0, 10.0]);
        let mut out2 = [0.0f32; 4];
        assert_eq!(ring.pull(&mut out2), 4);
        assert_eq!(out2, [7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn ring_clear_empties() {
        let mut ring = SampleRing::new(8);
        ring.push(&[1.0, 2.0, 3.0]);
        ring.clear();
        assert_eq!(ring.len, 0);
        assert_eq!(ring.free(), 8);
    }

    #[test]
    fn resampler_changes_length_by_ratio() {
        let mut up = LinearResampler::new(22_050, 44_100, 1);
        assert_eq!(up.process(&[0.0, 1.0, 0.0, -1.0]).len(), 8);

        let mut down = LinearResampler::new(96_000, 48_000, 1);
        let input: Vec<f32> = (0..96).map(|i| i as f32 / 96.0).collect();
        assert_eq!(down.process(&input).len(), 48);
    }

    #[test]
    fn adapt_mono_to_stereo_and_back() {
        let mut stereo = [0.0f32; 6];
        adapt_channels(&[1.0, 2.0, 3.0], 1, &mut stereo, 2);
        assert_eq!(stereo, [1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);

        let mut mono = [0.0f32; 2];
        adapt_channels(&[1.0, 3.0, 2.0, 4.0], 2, &mut mono, 1);
        assert_eq!(mono, [2.0, 3.0]);
    }

    #[test]
    fn adapt_stereo_to_quad_zero_fills() {
        let mut quad = [9.0f32; 4];
        adapt_channels(&[0.5, 0.25], 2, &mut quad, 4);
        assert_eq!(quad, [0.5, 0.25, 0.0, 0.0]);
    }
}
