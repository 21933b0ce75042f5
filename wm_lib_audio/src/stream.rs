use crate::{
    accumulate_samples, audio_seconds_to_blockcount, combine_gains, AudioBlockIndex,
    GainEnvelope, GainState, StereoFrame32, StopFade, WaveSource,
};

use serde_derive::{Deserialize, Serialize};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Playback parameters

/// NOTE: This can never be zero for a valid stream
pub type AudioStreamId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayCount {
    pub num_repeats: usize,
    /// If set `num_repeats` is ignored
    pub loop_infinite: bool,
}

impl PlayCount {
    pub const PLAY_ONCE: PlayCount = PlayCount {
        num_repeats: 1,
        loop_infinite: false,
    };
    pub const PLAY_LOOPED: PlayCount = PlayCount {
        num_repeats: 0,
        loop_infinite: true,
    };

    pub fn play_times(num_repeats: usize) -> PlayCount {
        PlayCount {
            num_repeats,
            loop_infinite: false,
        }
    }

    #[inline]
    pub fn is_exhausted(&self, num_plays_completed: usize) -> bool {
        !self.loop_infinite && num_plays_completed >= self.num_repeats
    }
}

impl Default for PlayCount {
    fn default() -> Self {
        PlayCount::PLAY_ONCE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FadeControl {
    pub fade_in_seconds: f32,
    pub fade_out_seconds: f32,
}

impl FadeControl {
    pub const NO_FADE: FadeControl = FadeControl {
        fade_in_seconds: 0.0,
        fade_out_seconds: 0.0,
    };

    pub fn fade_in_out(fade_in_seconds: f32, fade_out_seconds: f32) -> FadeControl {
        FadeControl {
            fade_in_seconds: fade_in_seconds.max(0.0),
            fade_out_seconds: fade_out_seconds.max(0.0),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Handle

#[derive(Debug)]
struct StreamControl {
    id: AudioStreamId,
    is_playing: AtomicBool,
}

/// Opaque handle to one playback instance. Once finished it stays finished - playing the same
/// source again creates a new handle.
#[derive(Debug, Clone)]
pub struct PlayingStream {
    control: Arc<StreamControl>,
}

impl PartialEq for PlayingStream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.control, &other.control)
    }
}

impl Eq for PlayingStream {}

impl PlayingStream {
    pub(crate) fn new(id: AudioStreamId) -> PlayingStream {
        PlayingStream {
            control: Arc::new(StreamControl {
                id,
                is_playing: AtomicBool::new(true),
            }),
        }
    }

    /// A handle that never played. Returned when a stream could not be started.
    pub fn inert() -> PlayingStream {
        PlayingStream {
            control: Arc::new(StreamControl {
                id: 0,
                is_playing: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> AudioStreamId {
        self.control.id
    }

    pub fn is_inert(&self) -> bool {
        self.control.id == 0
    }

    pub(crate) fn is_playing(&self) -> bool {
        self.control.is_playing.load(Ordering::Acquire)
    }

    pub(crate) fn mark_finished(&self) {
        self.control.is_playing.store(false, Ordering::Release);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Stream state

/// Per stream playback state. Only the mixing thread touches it.
pub struct PlayingStreamState {
    handle: PlayingStream,
    source: Arc<dyn WaveSource>,
    play_count: PlayCount,
    /// Rate of the source which fade durations are measured in
    sample_rate_hz: usize,

    num_plays_completed: usize,
    is_playing: bool,
    looped_block_cursor: AudioBlockIndex,
    total_blocks_streamed: AudioBlockIndex,

    envelope: GainEnvelope,
    stop_fade: Option<StopFade>,
    had_read_shortfall: bool,
    read_shortfall_reported: bool,

    /// Mix cycle in which the stream was last seen in the live set
    pub(crate) last_seen_cycle: u64,
}

impl std::fmt::Debug for PlayingStreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayingStreamState")
            .field("id", &self.handle.id())
            .field("play_count", &self.play_count)
            .field("num_plays_completed", &self.num_plays_completed)
            .field("is_playing", &self.is_playing)
            .field("looped_block_cursor", &self.looped_block_cursor)
            .field("total_blocks_streamed", &self.total_blocks_streamed)
            .field("gain_state", &self.envelope.state())
            .finish()
    }
}

impl PlayingStreamState {
    pub fn new(
        handle: PlayingStream,
        source: Arc<dyn WaveSource>,
        play_count: PlayCount,
        fade_control: FadeControl,
    ) -> PlayingStreamState {
        let sample_rate_hz = source.sample_rate_hz();
        let envelope =
            GainEnvelope::new(fade_control, play_count, sample_rate_hz, source.blockcount());
        PlayingStreamState {
            handle,
            source,
            play_count,
            sample_rate_hz,
            num_plays_completed: 0,
            is_playing: true,
            looped_block_cursor: 0,
            total_blocks_streamed: 0,
            envelope,
            stop_fade: None,
            had_read_shortfall: false,
            read_shortfall_reported: false,
            last_seen_cycle: 0,
        }
    }

    pub fn id(&self) -> AudioStreamId {
        self.handle.id()
    }

    pub fn handle(&self) -> &PlayingStream {
        &self.handle
    }

    pub fn num_plays_completed(&self) -> usize {
        self.num_plays_completed
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn looped_block_cursor(&self) -> AudioBlockIndex {
        self.looped_block_cursor
    }

    pub fn total_blocks_streamed(&self) -> AudioBlockIndex {
        self.total_blocks_streamed
    }

    pub fn gain_state(&self) -> GainState {
        self.envelope.state()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_fade.is_some()
    }

    /// Starts fading out from the current position. Only the first request counts.
    pub fn request_stop(&mut self, fade_out_seconds: f32) {
        if self.stop_fade.is_none() {
            let fade_blockcount = audio_seconds_to_blockcount(fade_out_seconds, self.sample_rate_hz);
            self.stop_fade = Some(StopFade::new(self.total_blocks_streamed, fade_blockcount));
        }
    }

    pub fn finish(&mut self) {
        self.is_playing = false;
        self.handle.mark_finished();
    }

    /// Returns true only on the first call after a read came up short
    pub fn take_read_shortfall(&mut self) -> bool {
        if self.had_read_shortfall && !self.read_shortfall_reported {
            self.read_shortfall_reported = true;
            true
        } else {
            false
        }
    }

    /// Mixes the next `accumulate.len()` frames of this stream into `accumulate`, wrapping around
    /// the source as often as the play count allows. Returns true if the stream finished during
    /// this call.
    pub fn mix_into(&mut self, accumulate: &mut [StereoFrame32], read_buffer: &mut Vec<i16>) -> bool {
        if !self.is_playing {
            return false;
        }

        let channelcount = self.source.channelcount();
        let source_blockcount = self.source.blockcount();
        if source_blockcount == 0 || (channelcount != 1 && channelcount != 2) {
            self.finish();
            return true;
        }

        let envelope_gain = self.envelope.update(self.total_blocks_streamed);
        let gain = match self.stop_fade {
            Some(stop_fade) => match stop_fade.update(self.total_blocks_streamed) {
                Some(stop_gain) => combine_gains(envelope_gain, stop_gain),
                None => {
                    self.finish();
                    return true;
                }
            },
            None => envelope_gain,
        };

        let framecount = accumulate.len();
        let mut frames_written = 0;
        while frames_written < framecount {
            let blocks_left_in_pass = source_blockcount - self.looped_block_cursor;
            let blockcount = usize::min(framecount - frames_written, blocks_left_in_pass);
            let samplecount = blockcount * channelcount;
            if read_buffer.len() < samplecount {
                read_buffer.resize(samplecount, 0);
            }
            let samples = &mut read_buffer[..samplecount];

            let blocks_read = self
                .source
                .read_blocks(self.looped_block_cursor, blockcount, samples)
                .min(blockcount);
            if blocks_read < blockcount {
                // Missing data plays as silence
                for sample in samples[blocks_read * channelcount..].iter_mut() {
                    *sample = 0;
                }
                self.had_read_shortfall = true;
            }

            accumulate_samples(
                &mut accumulate[frames_written..frames_written + blockcount],
                gain,
                channelcount,
                samples,
            );

            self.looped_block_cursor += blockcount;
            self.total_blocks_streamed += blockcount;
            frames_written += blockcount;

            if self.looped_block_cursor == source_blockcount {
                self.num_plays_completed += 1;
                self.looped_block_cursor = 0;
                if self.play_count.is_exhausted(self.num_plays_completed) {
                    self.finish();
                    return true;
                }
            }
        }

        false
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Tests
