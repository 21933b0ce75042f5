use crate::core::log;
use crate::{
    AudioOutput, AudioStreamId, FadeControl, Mixer, OutputSpec, PlayCount, PlayingStream,
    PlayingStreamState, WaveSource,
};

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::HashMap;
use std::sync::Arc;

pub const AUDIO_NUM_CHANNELS: usize = 2;
pub const AUDIO_DEFAULT_SAMPLE_RATE_HZ: usize = 22050;
pub const AUDIO_DEFAULT_BUFFER_FRAMECOUNT: usize = 512;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Configuration

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Load(String),

    #[error("Sample rate must be positive")]
    InvalidSampleRate,

    #[error("Buffer framecount must be positive")]
    InvalidBufferFramecount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate_hz: usize,
    /// Preferred number of frames the output pulls per callback
    pub buffer_framecount: usize,
    /// All messages of a device are logged with this target
    pub log_target: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            sample_rate_hz: AUDIO_DEFAULT_SAMPLE_RATE_HZ,
            buffer_framecount: AUDIO_DEFAULT_BUFFER_FRAMECOUNT,
            log_target: "wavemix::audio".to_owned(),
        }
    }
}

impl AudioConfig {
    pub fn load_from_file(filepath: &str) -> Result<AudioConfig, ConfigError> {
        let config: AudioConfig =
            crate::core::load_json_file(filepath).map_err(ConfigError::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate_hz == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }
        if self.buffer_framecount == 0 {
            return Err(ConfigError::InvalidBufferFramecount);
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Mix engine

/// Live set entry. Only membership and the stop request are touched outside the mix cycle.
#[derive(Clone)]
struct LiveStream {
    handle: PlayingStream,
    source: Arc<dyn WaveSource>,
    play_count: PlayCount,
    fade_control: FadeControl,
    stop_request: Option<f32>,
}

struct LiveSet {
    next_stream_id: AudioStreamId,
    streams: HashMap<AudioStreamId, LiveStream>,
}

impl LiveSet {
    fn find_mut(&mut self, handle: &PlayingStream) -> Option<&mut LiveStream> {
        match self.streams.get_mut(&handle.id()) {
            Some(live_stream) if live_stream.handle == *handle => Some(live_stream),
            _ => None,
        }
    }
}

/// Everything the mix cycle owns between two callbacks
struct MixContext {
    cycle: u64,
    snapshot: Vec<LiveStream>,
    states: HashMap<AudioStreamId, PlayingStreamState>,
    mixer: Mixer,
    byte_render_samples: Vec<i16>,
}

/// The thread-safe part of a `Device`. The control thread plays and stops streams while the audio
/// output calls one of the `render_*` functions.
pub struct MixEngine {
    config: AudioConfig,
    live: Mutex<LiveSet>,
    mix_context: Mutex<MixContext>,
}

impl MixEngine {
    pub fn new(config: AudioConfig) -> MixEngine {
        let config = match config.validate() {
            Ok(()) => config,
            Err(error) => {
                log::warn!(
                    target: config.log_target.as_str(),
                    "Invalid audio config ({}) - using defaults",
                    error
                );
                AudioConfig {
                    log_target: config.log_target,
                    ..AudioConfig::default()
                }
            }
        };

        let buffer_framecount = config.buffer_framecount;
        MixEngine {
            config,
            live: Mutex::new(LiveSet {
                next_stream_id: 1,
                streams: HashMap::new(),
            }),
            mix_context: Mutex::new(MixContext {
                cycle: 0,
                snapshot: Vec::new(),
                states: HashMap::new(),
                mixer: Mixer::new(buffer_framecount),
                byte_render_samples: Vec::with_capacity(AUDIO_NUM_CHANNELS * buffer_framecount),
            }),
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    fn log_target(&self) -> &str {
        self.config.log_target.as_str()
    }

    pub fn output_spec(&self) -> OutputSpec {
        OutputSpec {
            sample_rate_hz: self.config.sample_rate_hz,
            channelcount: AUDIO_NUM_CHANNELS,
            buffer_framecount: self.config.buffer_framecount,
        }
    }

    /// Grows the scratch buffers so that the callback does not need to allocate
    pub fn reserve_framecount(&self, framecount: usize) {
        let mut context = self.mix_context.lock();
        context.mixer.reserve_framecount(framecount);
        let samplecount = AUDIO_NUM_CHANNELS * framecount;
        if context.byte_render_samples.capacity() < samplecount {
            let additional = samplecount - context.byte_render_samples.len();
            context.byte_render_samples.reserve(additional);
        }
    }

    /// Registers a new stream and returns immediately. Returns an inert handle if the source can't
    /// be played.
    pub fn play(
        &self,
        source: Option<Arc<dyn WaveSource>>,
        play_count: PlayCount,
        fade_control: FadeControl,
    ) -> PlayingStream {
        let source = match source {
            Some(source) => source,
            None => {
                log::warn!(target: self.log_target(), "Cannot play stream without a source");
                return PlayingStream::inert();
            }
        };
        if source.blockcount() == 0 {
            log::warn!(target: self.log_target(), "Cannot play empty source");
            return PlayingStream::inert();
        }
        let channelcount = source.channelcount();
        if channelcount != 1 && channelcount != 2 {
            log::warn!(
                target: self.log_target(),
                "Cannot play source with {} channels",
                channelcount
            );
            return PlayingStream::inert();
        }
        if play_count.is_exhausted(0) {
            log::debug!(target: self.log_target(), "Ignoring stream with a play count of zero");
            return PlayingStream::inert();
        }
        if source.sample_rate_hz() != self.config.sample_rate_hz {
            log::warn!(
                target: self.log_target(),
                "Source sample rate {}Hz differs from output sample rate {}Hz - playing unconverted",
                source.sample_rate_hz(),
                self.config.sample_rate_hz
            );
        }

        let handle = {
            let mut live = self.live.lock();
            let stream_id = live.next_stream_id;
            live.next_stream_id += 1;

            let handle = PlayingStream::new(stream_id);
            live.streams.insert(
                stream_id,
                LiveStream {
                    handle: handle.clone(),
                    source,
                    play_count,
                    fade_control,
                    stop_request: None,
                },
            );
            handle
        };

        log::trace!(
            target: self.log_target(),
            "Started stream {} ({:?}, {:?})",
            handle.id(),
            play_count,
            fade_control
        );
        handle
    }

    pub fn is_playing(&self, handle: &PlayingStream) -> bool {
        // No lock needed: the flag is only ever cleared, and that happens before or while the
        // stream leaves the live set
        handle.is_playing()
    }

    pub fn num_playing(&self) -> usize {
        self.live.lock().streams.len()
    }

    /// Fades the stream out over `fade_control.fade_out_seconds` starting with the next mix cycle
    pub fn stop(&self, handle: &PlayingStream, fade_control: FadeControl) {
        if handle.is_inert() {
            return;
        }
        let mut live = self.live.lock();
        if let Some(live_stream) = live.find_mut(handle) {
            if live_stream.stop_request.is_none() {
                live_stream.stop_request = Some(fade_control.fade_out_seconds);
                log::trace!(
                    target: self.log_target(),
                    "Stopping stream {} with fade out of {}s",
                    handle.id(),
                    fade_control.fade_out_seconds
                );
            }
        }
    }

    /// Removes the stream from the live set. It is not mixed anymore from the next cycle on.
    pub fn stop_immediately(&self, handle: &PlayingStream) {
        if handle.is_inert() {
            return;
        }
        let mut live = self.live.lock();
        if live.find_mut(handle).is_some() {
            live.streams.remove(&handle.id());
            handle.mark_finished();
            log::trace!(target: self.log_target(), "Stopped stream {}", handle.id());
        }
    }

    /// Fills `output` with interleaved stereo frames. A trailing odd sample is set to zero.
    pub fn render_interleaved(&self, output: &mut [i16]) {
        let mut context = self.mix_context.lock();
        self.render_with_context(&mut context, output);
    }

    /// Fills `output` with interleaved little endian 16-bit stereo frames. Trailing bytes that
    /// don't make up a whole frame are set to zero.
    pub fn render_bytes(&self, output: &mut [u8]) {
        const FRAME_SIZE_BYTES: usize = 2 * AUDIO_NUM_CHANNELS;

        let mut context = self.mix_context.lock();
        let framecount = output.len() / FRAME_SIZE_BYTES;
        let mut samples = std::mem::replace(&mut context.byte_render_samples, Vec::new());
        samples.resize(AUDIO_NUM_CHANNELS * framecount, 0);

        self.render_with_context(&mut context, &mut samples);

        let byte_count = framecount * FRAME_SIZE_BYTES;
        LittleEndian::write_i16_into(&samples, &mut output[..byte_count]);
        for byte in output[byte_count..].iter_mut() {
            *byte = 0;
        }
        context.byte_render_samples = samples;
    }

    fn render_with_context(&self, context: &mut MixContext, output: &mut [i16]) {
        context.cycle += 1;
        let cycle = context.cycle;

        {
            let live = self.live.lock();
            context.snapshot.clear();
            context.snapshot.extend(live.streams.values().cloned());
        }

        // Mixing happens outside the live set lock
        for live_stream in context.snapshot.iter() {
            let state = context
                .states
                .entry(live_stream.handle.id())
                .or_insert_with(|| {
                    PlayingStreamState::new(
                        live_stream.handle.clone(),
                        live_stream.source.clone(),
                        live_stream.play_count,
                        live_stream.fade_control,
                    )
                });
            state.last_seen_cycle = cycle;
            if let Some(fade_out_seconds) = live_stream.stop_request {
                state.request_stop(fade_out_seconds);
            }
        }
        context.snapshot.clear();
        context
            .states
            .retain(|_, state| state.last_seen_cycle == cycle);

        let finished_stream_ids = context.mixer.mix(context.states.values_mut(), output);

        for state in context.states.values_mut() {
            if state.take_read_shortfall() {
                log::warn!(
                    target: self.log_target(),
                    "Stream {} could not read all requested blocks - playing silence instead",
                    state.id()
                );
            }
        }

        if !finished_stream_ids.is_empty() {
            let mut live = self.live.lock();
            for stream_id in &finished_stream_ids {
                live.streams.remove(stream_id);
            }
        }
        for stream_id in &finished_stream_ids {
            context.states.remove(stream_id);
        }
    }

    #[cfg(test)]
    fn num_stream_states(&self) -> usize {
        self.mix_context.lock().states.len()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Device

/// Owns the platform output and shares the `MixEngine` with it
pub struct Device {
    engine: Arc<MixEngine>,
    output: Option<Box<dyn AudioOutput>>,
}

impl Device {
    pub fn new(config: AudioConfig) -> Device {
        Device {
            engine: Arc::new(MixEngine::new(config)),
            output: None,
        }
    }

    /// Opens the default platform output. On failure the device stays usable but silent.
    pub fn init(&mut self) {
        #[cfg(feature = "sdl2")]
        {
            self.init_with_output(Box::new(crate::platform_sdl2::Sdl2Output::new()));
        }

        #[cfg(not(feature = "sdl2"))]
        {
            log::error!(
                target: self.engine.log_target(),
                "Cannot open audio output: no platform backend available - audio stays silent"
            );
        }
    }

    pub fn init_with_output(&mut self, mut output: Box<dyn AudioOutput>) {
        if self.output.is_some() {
            log::warn!(target: self.engine.log_target(), "Audio output is already open");
            return;
        }

        let desired_spec = self.engine.output_spec();
        match output.open(desired_spec, self.engine.clone()) {
            Ok(obtained_spec) => {
                self.engine.reserve_framecount(obtained_spec.buffer_framecount);
                log::info!(
                    target: self.engine.log_target(),
                    "Opened audio output: (frequency: {}, channelcount: {}, buffer framecount: {})",
                    obtained_spec.sample_rate_hz,
                    obtained_spec.channelcount,
                    obtained_spec.buffer_framecount
                );
                self.output = Some(output);
            }
            Err(error) => {
                log::error!(
                    target: self.engine.log_target(),
                    "Could not open audio output: {} - audio stays silent",
                    error
                );
            }
        }
    }

    pub fn is_output_open(&self) -> bool {
        self.output.is_some()
    }

    pub fn engine(&self) -> Arc<MixEngine> {
        self.engine.clone()
    }

    pub fn config(&self) -> &AudioConfig {
        self.engine.config()
    }

    pub fn play(
        &self,
        source: Option<Arc<dyn WaveSource>>,
        play_count: PlayCount,
        fade_control: FadeControl,
    ) -> PlayingStream {
        self.engine.play(source, play_count, fade_control)
    }

    pub fn is_playing(&self, handle: &PlayingStream) -> bool {
        self.engine.is_playing(handle)
    }

    pub fn num_playing(&self) -> usize {
        self.engine.num_playing()
    }

    pub fn stop(&self, handle: &PlayingStream, fade_control: FadeControl) {
        self.engine.stop(handle, fade_control)
    }

    pub fn stop_immediately(&self, handle: &PlayingStream) {
        self.engine.stop_immediately(handle)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OutputError, ThreadedOutput, WaveBuffer};

    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    fn mono_source(samples: Vec<i16>) -> Option<Arc<dyn WaveSource>> {
        let source: Arc<dyn WaveSource> =
            Arc::new(WaveBuffer::new_mono(AUDIO_DEFAULT_SAMPLE_RATE_HZ, samples));
        Some(source)
    }

    /// Claims more blocks than it can deliver like a file truncated after loading
    struct TruncatedSource {
        blockcount: usize,
        available_blockcount: usize,
    }

    impl WaveSource for TruncatedSource {
        fn channelcount(&self) -> usize {
            1
        }
        fn sample_rate_hz(&self) -> usize {
            AUDIO_DEFAULT_SAMPLE_RATE_HZ
        }
        fn blockcount(&self) -> usize {
            self.blockcount
        }
        fn read_blocks(&self, first_block: usize, blockcount: usize, out_samples: &mut [i16]) -> usize {
            let available = self.available_blockcount.saturating_sub(first_block);
            let blocks_read = blockcount.min(available);
            for sample in out_samples[..blocks_read].iter_mut() {
                *sample = 500;
            }
            blocks_read
        }
    }

    struct SurroundSource;

    impl WaveSource for SurroundSource {
        fn channelcount(&self) -> usize {
            6
        }
        fn sample_rate_hz(&self) -> usize {
            AUDIO_DEFAULT_SAMPLE_RATE_HZ
        }
        fn blockcount(&self) -> usize {
            100
        }
        fn read_blocks(&self, _: usize, _: usize, _: &mut [i16]) -> usize {
            0
        }
    }

    struct FailingOutput;

    impl AudioOutput for FailingOutput {
        fn open(&mut self, _: OutputSpec, _: Arc<MixEngine>) -> Result<OutputSpec, OutputError> {
            Err(OutputError::Platform("no sound card".to_owned()))
        }
    }

    #[test]
    fn played_stream_is_live_until_finished() {
        let device = Device::new(AudioConfig::default());
        let engine = device.engine();
        let handle = device.play(mono_source(vec![10; 1000]), PlayCount::PLAY_ONCE, FadeControl::NO_FADE);

        assert_eq!(handle.id(), 1);
        assert!(device.is_playing(&handle));
        assert_eq!(device.num_playing(), 1);

        let mut output = vec![0i16; 2 * 512];
        engine.render_interleaved(&mut output);
        assert!(output.iter().all(|&sample| sample == 10));
        assert!(device.is_playing(&handle));

        engine.render_interleaved(&mut output);
        assert!(!device.is_playing(&handle));
        assert_eq!(device.num_playing(), 0);
        assert_eq!(engine.num_stream_states(), 0);
        assert_eq!(&output[..4], &[10, 10, 10, 10]);
        assert_eq!(output[2 * 488], 0);
    }

    #[test]
    fn unplayable_sources_yield_inert_handles() {
        let device = Device::new(AudioConfig::default());
        let surround: Arc<dyn WaveSource> = Arc::new(SurroundSource);

        let handles = vec![
            device.play(None, PlayCount::PLAY_ONCE, FadeControl::NO_FADE),
            device.play(mono_source(Vec::new()), PlayCount::PLAY_ONCE, FadeControl::NO_FADE),
            device.play(mono_source(vec![1; 10]), PlayCount::play_times(0), FadeControl::NO_FADE),
            device.play(Some(surround), PlayCount::PLAY_ONCE, FadeControl::NO_FADE),
        ];
        for handle in &handles {
            assert!(handle.is_inert());
            assert!(!device.is_playing(handle));
            device.stop(handle, FadeControl::NO_FADE);
            device.stop_immediately(handle);
        }
        assert_eq!(device.num_playing(), 0);
    }

    #[test]
    fn mismatched_sample_rate_still_plays() {
        let device = Device::new(AudioConfig::default());
        let source: Arc<dyn WaveSource> = Arc::new(WaveBuffer::new_mono(44100, vec![1; 10]));
        let handle = device.play(Some(source), PlayCount::PLAY_ONCE, FadeControl::NO_FADE);
        assert!(device.is_playing(&handle));
    }

    #[test]
    fn fade_in_is_measured_at_the_source_sample_rate() {
        let device = Device::new(AudioConfig::default());
        let engine = device.engine();
        let source: Arc<dyn WaveSource> = Arc::new(WaveBuffer::new_mono(11025, vec![10000; 100_000]));
        // round(11025 * 0.1) = 1103 blocks of fade in
        device.play(Some(source), PlayCount::PLAY_ONCE, FadeControl::fade_in_out(0.1, 0.0));

        let mut output = vec![0i16; 2 * 552];
        engine.render_interleaved(&mut output);
        assert_eq!(output[0], 0);
        engine.render_interleaved(&mut output);
        assert_eq!(output[0], 5000);
        engine.render_interleaved(&mut output);
        assert_eq!(output[0], 10000);
    }

    #[test]
    fn stream_ids_are_unique_and_never_zero() {
        let device = Device::new(AudioConfig::default());
        let first = device.play(mono_source(vec![1; 10]), PlayCount::PLAY_LOOPED, FadeControl::NO_FADE);
        let second = device.play(mono_source(vec![1; 10]), PlayCount::PLAY_LOOPED, FadeControl::NO_FADE);
        assert_ne!(first.id(), 0);
        assert_ne!(first.id(), second.id());
        assert_eq!(device.num_playing(), 2);
    }

    #[test]
    fn stop_immediately_silences_from_next_cycle() {
        let device = Device::new(AudioConfig::default());
        let engine = device.engine();
        let handle = device.play(mono_source(vec![100; 10]), PlayCount::PLAY_LOOPED, FadeControl::NO_FADE);

        let mut output = vec![0i16; 64];
        engine.render_interleaved(&mut output);
        assert_eq!(engine.num_stream_states(), 1);

        device.stop_immediately(&handle);
        assert!(!device.is_playing(&handle));
        assert_eq!(device.num_playing(), 0);

        engine.render_interleaved(&mut output);
        assert!(output.iter().all(|&sample| sample == 0));
        assert_eq!(engine.num_stream_states(), 0);

        // Stopping again is a no-op
        device.stop_immediately(&handle);
        device.stop(&handle, FadeControl::fade_in_out(0.0, 1.0));
    }

    #[test]
    fn stop_with_fade_ramps_down_to_silence() {
        let device = Device::new(AudioConfig::default());
        let engine = device.engine();
        let handle = device.play(mono_source(vec![10000; 100]), PlayCount::PLAY_LOOPED, FadeControl::NO_FADE);

        let mut output = vec![0i16; 2 * 512];
        engine.render_interleaved(&mut output);
        assert_eq!(output[0], 10000);

        // 2205 blocks of fade
        device.stop(&handle, FadeControl::fade_in_out(0.0, 0.1));
        device.stop(&handle, FadeControl::NO_FADE);
        assert!(device.is_playing(&handle));

        let mut previous_level = i16::max_value();
        let mut cycles = 0;
        while device.is_playing(&handle) {
            engine.render_interleaved(&mut output);
            assert!(output[0] <= previous_level);
            previous_level = output[0];
            cycles += 1;
            assert!(cycles <= 6);
        }
        assert_eq!(cycles, 6);
        assert!(output.iter().all(|&sample| sample == 0));
        assert_eq!(device.num_playing(), 0);
    }

    #[test]
    fn stop_with_zero_fade_finishes_next_cycle() {
        let device = Device::new(AudioConfig::default());
        let engine = device.engine();
        let handle = device.play(mono_source(vec![7; 100]), PlayCount::PLAY_LOOPED, FadeControl::NO_FADE);

        device.stop(&handle, FadeControl::NO_FADE);
        let mut output = vec![1i16; 16];
        engine.render_interleaved(&mut output);
        assert!(!device.is_playing(&handle));
        assert!(output.iter().all(|&sample| sample == 0));
    }

    #[test]
    fn fade_in_starts_silent() {
        let device = Device::new(AudioConfig::default());
        let engine = device.engine();
        device.play(
            mono_source(vec![10000; 100_000]),
            PlayCount::PLAY_ONCE,
            FadeControl::fade_in_out(0.05, 0.0),
        );

        let mut output = vec![0i16; 2 * 512];
        engine.render_interleaved(&mut output);
        assert_eq!(output[0], 0);
        engine.render_interleaved(&mut output);
        assert!(output[0] > 0 && output[0] < 10000);
        for _ in 0..3 {
            engine.render_interleaved(&mut output);
        }
        assert_eq!(output[0], 10000);
    }

    #[test]
    fn read_shortfall_plays_silence() {
        let device = Device::new(AudioConfig::default());
        let engine = device.engine();
        let source: Arc<dyn WaveSource> = Arc::new(TruncatedSource {
            blockcount: 8,
            available_blockcount: 3,
        });
        let handle = device.play(Some(source), PlayCount::PLAY_ONCE, FadeControl::NO_FADE);

        let mut output = vec![1i16; 2 * 10];
        engine.render_interleaved(&mut output);
        assert_eq!(&output[..6], &[500, 500, 500, 500, 500, 500]);
        assert!(output[6..].iter().all(|&sample| sample == 0));
        assert!(!device.is_playing(&handle));
    }

    #[test]
    fn bytes_are_rendered_little_endian() {
        let device = Device::new(AudioConfig::default());
        let engine = device.engine();
        let source: Arc<dyn WaveSource> = Arc::new(WaveBuffer::new_stereo_from_frames(
            AUDIO_DEFAULT_SAMPLE_RATE_HZ,
            &[(0x0102, -2), (0x0304, 0x7fff)],
        ));
        device.play(Some(source), PlayCount::PLAY_ONCE, FadeControl::NO_FADE);

        let mut output = vec![0xaau8; 11];
        engine.render_bytes(&mut output);
        assert_eq!(
            output,
            vec![0x02, 0x01, 0xfe, 0xff, 0x04, 0x03, 0xff, 0x7f, 0, 0, 0]
        );
    }

    #[test]
    fn failed_output_leaves_device_silent_but_usable() {
        let mut device = Device::new(AudioConfig::default());
        device.init_with_output(Box::new(FailingOutput));
        assert!(!device.is_output_open());

        let handle = device.play(mono_source(vec![1; 10]), PlayCount::PLAY_ONCE, FadeControl::NO_FADE);
        assert!(device.is_playing(&handle));
        assert_eq!(device.num_playing(), 1);
    }

    #[cfg(not(feature = "sdl2"))]
    #[test]
    fn init_without_platform_backend_stays_silent() {
        let mut device = Device::new(AudioConfig::default());
        device.init();
        assert!(!device.is_output_open());
    }

    #[test]
    fn invalid_config_falls_back_to_defaults() {
        let engine = MixEngine::new(AudioConfig {
            sample_rate_hz: 0,
            buffer_framecount: 64,
            log_target: "test".to_owned(),
        });
        assert_eq!(engine.config().sample_rate_hz, AUDIO_DEFAULT_SAMPLE_RATE_HZ);
        assert_eq!(engine.config().buffer_framecount, AUDIO_DEFAULT_BUFFER_FRAMECOUNT);
        assert_eq!(engine.config().log_target, "test");
    }

    #[test]
    fn config_is_loaded_from_json_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let filepath = dir.path().join("audio.json");
        std::fs::write(&filepath, r#"{ "buffer_framecount": 1024 }"#).unwrap();

        let config = AudioConfig::load_from_file(filepath.to_str().unwrap()).unwrap();
        assert_eq!(config.sample_rate_hz, 22050);
        assert_eq!(config.buffer_framecount, 1024);
        assert_eq!(config.log_target, "wavemix::audio");

        std::fs::write(&filepath, r#"{ "sample_rate_hz": 0 }"#).unwrap();
        assert!(matches!(
            AudioConfig::load_from_file(filepath.to_str().unwrap()),
            Err(ConfigError::InvalidSampleRate)
        ));
        assert!(matches!(
            AudioConfig::load_from_file("does/not/exist.json"),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn concurrent_play_and_stop_against_running_mix_loop() {
        let mut device = Device::new(AudioConfig::default());
        device.init_with_output(Box::new(ThreadedOutput::new_unpaced()));
        assert!(device.is_output_open());

        let engine = device.engine();
        let source: Arc<dyn WaveSource> =
            Arc::new(WaveBuffer::new_mono(AUDIO_DEFAULT_SAMPLE_RATE_HZ, vec![100; 300]));

        let control_threads: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                let source = source.clone();
                std::thread::spawn(move || {
                    let mut handles = Vec::new();
                    for index in 0..200 {
                        let handle = engine.play(
                            Some(source.clone()),
                            PlayCount::play_times(1 + index % 3),
                            FadeControl::NO_FADE,
                        );
                        assert!(!handle.is_inert());
                        match index % 4 {
                            0 => engine.stop(&handle, FadeControl::fade_in_out(0.0, 0.01)),
                            1 => {
                                engine.stop_immediately(&handle);
                                assert!(!engine.is_playing(&handle));
                            }
                            _ => {}
                        }
                        let _ = engine.num_playing();
                        handles.push(handle);
                    }
                    handles
                })
            })
            .collect();

        let handles: Vec<PlayingStream> = control_threads
            .into_iter()
            .flat_map(|thread| thread.join().unwrap())
            .collect();
        let stream_ids: HashSet<AudioStreamId> = handles.iter().map(|handle| handle.id()).collect();
        assert_eq!(stream_ids.len(), 4 * 200);

        let deadline = Instant::now() + Duration::from_secs(30);
        while engine.num_playing() > 0 {
            assert!(Instant::now() < deadline, "Streams did not finish playing");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(handles.iter().all(|handle| !engine.is_playing(handle)));
    }
}
