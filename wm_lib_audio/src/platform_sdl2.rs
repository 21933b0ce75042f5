use crate::core::log;
use crate::{AudioOutput, MixEngine, OutputError, OutputSpec};

use std::sync::Arc;

struct SdlMixCallback {
    engine: Arc<MixEngine>,
}

impl sdl2::audio::AudioCallback for SdlMixCallback {
    type Channel = i16;

    fn callback(&mut self, out_samples_stereo: &mut [i16]) {
        self.engine.render_interleaved(out_samples_stereo);
    }
}

/// Plays through the default SDL2 playback device
pub struct Sdl2Output {
    sdl_context: Option<sdl2::Sdl>,
    sdl_audio: Option<sdl2::AudioSubsystem>,
    sdl_audio_device: Option<sdl2::audio::AudioDevice<SdlMixCallback>>,
}

impl Sdl2Output {
    pub fn new() -> Sdl2Output {
        Sdl2Output {
            sdl_context: None,
            sdl_audio: None,
            sdl_audio_device: None,
        }
    }
}

impl Default for Sdl2Output {
    fn default() -> Self {
        Sdl2Output::new()
    }
}

impl AudioOutput for Sdl2Output {
    fn open(&mut self, desired: OutputSpec, engine: Arc<MixEngine>) -> Result<OutputSpec, OutputError> {
        if self.sdl_audio_device.is_some() {
            return Err(OutputError::AlreadyOpen);
        }
        if desired.buffer_framecount > u16::max_value() as usize
            || desired.channelcount > u8::max_value() as usize
        {
            return Err(OutputError::UnsupportedSpec(desired));
        }

        let sdl_context = sdl2::init().map_err(OutputError::Platform)?;
        let sdl_audio = sdl_context.audio().map_err(OutputError::Platform)?;

        let audio_format_desired = sdl2::audio::AudioSpecDesired {
            freq: Some(desired.sample_rate_hz as i32),
            channels: Some(desired.channelcount as u8),
            // IMPORTANT: `samples` is a misnomer - it is actually the frames
            samples: Some(desired.buffer_framecount as u16),
        };
        let sdl_audio_device = sdl_audio
            .open_playback(None, &audio_format_desired, |_spec| SdlMixCallback { engine })
            .map_err(OutputError::Platform)?;

        let obtained = {
            let spec = sdl_audio_device.spec();
            OutputSpec {
                sample_rate_hz: spec.freq.max(0) as usize,
                channelcount: spec.channels as usize,
                buffer_framecount: spec.samples as usize,
            }
        };
        if obtained.sample_rate_hz != desired.sample_rate_hz
            || obtained.channelcount != desired.channelcount
        {
            return Err(OutputError::UnsupportedSpec(obtained));
        }
        if obtained.buffer_framecount != desired.buffer_framecount {
            log::debug!(
                "Audio output uses buffer framecount {} instead of {}",
                obtained.buffer_framecount,
                desired.buffer_framecount
            );
        }

        sdl_audio_device.resume();

        self.sdl_audio_device = Some(sdl_audio_device);
        self.sdl_audio = Some(sdl_audio);
        self.sdl_context = Some(sdl_context);
        Ok(obtained)
    }
}

impl Drop for Sdl2Output {
    fn drop(&mut self) {
        // The device must close before the subsystem it was opened from
        self.sdl_audio_device = None;
        self.sdl_audio = None;
    }
}
