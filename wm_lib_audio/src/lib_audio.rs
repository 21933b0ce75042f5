pub mod device;
pub mod envelope;
pub mod mixer;
pub mod output;
pub mod stream;
pub mod wave;

#[cfg(feature = "sdl2")]
pub mod platform_sdl2;

pub use device::*;
pub use envelope::*;
pub use mixer::*;
pub use output::*;
pub use stream::*;
pub use wave::*;

use wm_lib_core as core;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Timing

/// A block is one sample instant across all channels (aka a frame)
pub type AudioBlockIndex = usize;

#[inline]
pub fn audio_frames_to_seconds(framecount: AudioBlockIndex, audio_samplerate_hz: usize) -> f64 {
    framecount as f64 / audio_samplerate_hz as f64
}

#[inline]
/// NOTE: This returns a float so we can round it down ourselves or use the value for further
///       calculations without forced rounding errors
pub fn audio_seconds_to_frames(time: f64, audio_samplerate_hz: usize) -> f64 {
    time * audio_samplerate_hz as f64
}

/// Rounds to the nearest block. Negative, zero and non-finite durations yield zero blocks.
#[inline]
pub fn audio_seconds_to_blockcount(time: f32, audio_samplerate_hz: usize) -> usize {
    if !time.is_finite() || time <= 0.0 {
        return 0;
    }
    audio_seconds_to_frames(time as f64, audio_samplerate_hz).round() as usize
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_are_rounded_to_nearest_block() {
        assert_eq!(audio_seconds_to_blockcount(0.5, 22050), 11025);
        assert_eq!(audio_seconds_to_blockcount(0.0104, 100), 1);
        assert_eq!(audio_seconds_to_blockcount(0.0049, 100), 0);
    }

    #[test]
    fn degenerate_durations_have_no_blocks() {
        assert_eq!(audio_seconds_to_blockcount(-1.0, 22050), 0);
        assert_eq!(audio_seconds_to_blockcount(f32::NAN, 22050), 0);
        assert_eq!(audio_seconds_to_blockcount(f32::INFINITY, 22050), 0);
    }

    #[test]
    fn frames_convert_to_seconds() {
        assert!((audio_frames_to_seconds(11025, 22050) - 0.5).abs() < 1e-9);
    }
}
