use crate::{audio_seconds_to_blockcount, AudioBlockIndex, FadeControl, PlayCount};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Fixed point gain

/// Linear amplitude multiplier where `GAIN_MAX` is unity
pub type Gain = i32;

pub const GAIN_MAX: Gain = 128;
pub const GAIN_SHIFT: u32 = 7;

#[inline]
pub fn apply_gain(sample: i32, gain: Gain) -> i32 {
    (sample * gain) >> GAIN_SHIFT
}

#[inline]
pub fn combine_gains(a: Gain, b: Gain) -> Gain {
    (a * b) >> GAIN_SHIFT
}

/// `GAIN_MAX * numerator / denominator` for `numerator <= denominator`
#[inline]
fn gain_linear_fraction(numerator: usize, denominator: usize) -> Gain {
    debug_assert!(denominator > 0);
    ((GAIN_MAX as u64 * numerator as u64) / denominator as u64) as Gain
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Envelope

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainState {
    Attack,
    Sustain,
    Release,
}

#[derive(Debug, Clone)]
pub struct GainEnvelope {
    state: GainState,
    fade_in_blockcount: AudioBlockIndex,
    fade_out_blockcount: AudioBlockIndex,
    fades_out: bool,
    /// `None` for infinitely looping streams
    total_blocks_to_play: Option<AudioBlockIndex>,
}

impl GainEnvelope {
    pub fn new(
        fade_control: FadeControl,
        play_count: PlayCount,
        sample_rate_hz: usize,
        source_blockcount: AudioBlockIndex,
    ) -> GainEnvelope {
        let state = if fade_control.fade_in_seconds > 0.0 {
            GainState::Attack
        } else {
            GainState::Sustain
        };
        let total_blocks_to_play = if play_count.loop_infinite {
            None
        } else {
            Some(source_blockcount.saturating_mul(play_count.num_repeats))
        };

        GainEnvelope {
            state,
            fade_in_blockcount: audio_seconds_to_blockcount(
                fade_control.fade_in_seconds,
                sample_rate_hz,
            ),
            fade_out_blockcount: audio_seconds_to_blockcount(
                fade_control.fade_out_seconds,
                sample_rate_hz,
            ),
            fades_out: fade_control.fade_out_seconds > 0.0,
            total_blocks_to_play,
        }
    }

    pub fn state(&self) -> GainState {
        self.state
    }

    pub fn fade_in_blockcount(&self) -> AudioBlockIndex {
        self.fade_in_blockcount
    }

    pub fn fade_out_blockcount(&self) -> AudioBlockIndex {
        self.fade_out_blockcount
    }

    pub fn total_blocks_to_play(&self) -> Option<AudioBlockIndex> {
        self.total_blocks_to_play
    }

    /// Advances the state machine to `total_blocks_streamed` and returns the gain for the next
    /// mix cycle. States fall through in order so one call can go from Attack to Release.
    pub fn update(&mut self, total_blocks_streamed: AudioBlockIndex) -> Gain {
        if self.state == GainState::Attack {
            if self.fade_in_blockcount == 0 || total_blocks_streamed > self.fade_in_blockcount {
                self.state = GainState::Sustain;
            } else {
                return gain_linear_fraction(total_blocks_streamed, self.fade_in_blockcount);
            }
        }

        if self.state == GainState::Sustain {
            match self.total_blocks_to_play {
                Some(total_blocks_to_play)
                    if self.fades_out
                        && total_blocks_streamed.saturating_add(self.fade_out_blockcount)
                            > total_blocks_to_play =>
                {
                    self.state = GainState::Release;
                }
                _ => return GAIN_MAX,
            }
        }

        // Release
        let total_blocks_to_play = match self.total_blocks_to_play {
            Some(total_blocks_to_play) => total_blocks_to_play,
            None => return GAIN_MAX,
        };
        if self.fade_out_blockcount == 0 || total_blocks_streamed >= total_blocks_to_play {
            return 0;
        }
        let blocks_remaining = total_blocks_to_play - total_blocks_streamed;
        gain_linear_fraction(
            blocks_remaining.min(self.fade_out_blockcount),
            self.fade_out_blockcount,
        )
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Stop fade

/// Externally requested fade to silence that runs alongside the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopFade {
    start_block: AudioBlockIndex,
    fade_blockcount: AudioBlockIndex,
}

impl StopFade {
    pub fn new(start_block: AudioBlockIndex, fade_blockcount: AudioBlockIndex) -> StopFade {
        StopFade {
            start_block,
            fade_blockcount,
        }
    }

    pub fn start_block(&self) -> AudioBlockIndex {
        self.start_block
    }

    /// Returns `None` once the fade has reached silence
    pub fn update(&self, total_blocks_streamed: AudioBlockIndex) -> Option<Gain> {
        let elapsed = total_blocks_streamed.saturating_sub(self.start_block);
        if self.fade_blockcount == 0 || elapsed >= self.fade_blockcount {
            None
        } else {
            Some(gain_linear_fraction(
                self.fade_blockcount - elapsed,
                self.fade_blockcount,
            ))
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_in_ramps_linearly_to_full_gain() {
        // 50 blocks of fade in
        let mut envelope = GainEnvelope::new(
            FadeControl::fade_in_out(0.5, 0.0),
            PlayCount::PLAY_LOOPED,
            100,
            1000,
        );
        assert_eq!(envelope.state(), GainState::Attack);
        assert_eq!(envelope.fade_in_blockcount(), 50);

        assert_eq!(envelope.update(0), 0);
        assert_eq!(envelope.update(25), 64);
        assert_eq!(envelope.update(50), GAIN_MAX);
        assert_eq!(envelope.state(), GainState::Attack);
        assert_eq!(envelope.update(51), GAIN_MAX);
        assert_eq!(envelope.state(), GainState::Sustain);
    }

    #[test]
    fn fade_in_is_monotonic() {
        let mut envelope = GainEnvelope::new(
            FadeControl::fade_in_out(1.0, 0.0),
            PlayCount::PLAY_ONCE,
            22050,
            100_000,
        );
        let mut previous_gain = 0;
        for streamed in (0..=22051).step_by(7) {
            let gain = envelope.update(streamed);
            assert!(gain >= previous_gain);
            previous_gain = gain;
        }
        assert_eq!(envelope.update(22051), GAIN_MAX);
    }

    #[test]
    fn fade_in_rounding_to_zero_blocks_starts_at_full_gain() {
        let mut envelope = GainEnvelope::new(
            FadeControl::fade_in_out(0.001, 0.0),
            PlayCount::PLAY_ONCE,
            100,
            10,
        );
        assert_eq!(envelope.state(), GainState::Attack);
        assert_eq!(envelope.fade_in_blockcount(), 0);
        assert_eq!(envelope.update(0), GAIN_MAX);
        assert_eq!(envelope.state(), GainState::Sustain);
    }

    #[test]
    fn no_fade_in_starts_in_sustain() {
        let mut envelope =
            GainEnvelope::new(FadeControl::NO_FADE, PlayCount::PLAY_ONCE, 22050, 10);
        assert_eq!(envelope.state(), GainState::Sustain);
        assert_eq!(envelope.update(0), GAIN_MAX);
        assert_eq!(envelope.update(10), GAIN_MAX);
    }

    #[test]
    fn fade_out_releases_towards_the_end_of_the_last_play() {
        // 100 block source played twice with a 50 block fade out
        let mut envelope = GainEnvelope::new(
            FadeControl::fade_in_out(0.0, 0.5),
            PlayCount::play_times(2),
            100,
            100,
        );
        assert_eq!(envelope.total_blocks_to_play(), Some(200));

        assert_eq!(envelope.update(150), GAIN_MAX);
        assert_eq!(envelope.state(), GainState::Sustain);

        assert_eq!(envelope.update(151), 125);
        assert_eq!(envelope.state(), GainState::Release);
        assert_eq!(envelope.update(175), 64);
        assert_eq!(envelope.update(200), 0);
        assert_eq!(envelope.update(250), 0);
    }

    #[test]
    fn attack_can_fall_through_into_release() {
        let mut envelope = GainEnvelope::new(
            FadeControl::fade_in_out(0.1, 0.5),
            PlayCount::PLAY_ONCE,
            100,
            60,
        );
        assert_eq!(envelope.update(5), 64);
        assert_eq!(envelope.state(), GainState::Attack);

        assert_eq!(envelope.update(20), 102);
        assert_eq!(envelope.state(), GainState::Release);
    }

    #[test]
    fn fade_out_rounding_to_zero_blocks_cuts_to_silence() {
        // round(100 * 0.001) = 0 blocks of fade out
        let mut envelope = GainEnvelope::new(
            FadeControl::fade_in_out(0.0, 0.001),
            PlayCount::PLAY_ONCE,
            100,
            10,
        );
        assert_eq!(envelope.fade_out_blockcount(), 0);
        assert_eq!(envelope.update(0), GAIN_MAX);
        assert_eq!(envelope.update(10), GAIN_MAX);
        assert_eq!(envelope.state(), GainState::Sustain);

        assert_eq!(envelope.update(11), 0);
        assert_eq!(envelope.state(), GainState::Release);
        assert_eq!(envelope.update(12), 0);
    }

    #[test]
    fn infinite_loop_never_releases() {
        let mut envelope = GainEnvelope::new(
            FadeControl::fade_in_out(0.0, 0.5),
            PlayCount::PLAY_LOOPED,
            100,
            100,
        );
        for streamed in (0..100_000).step_by(97) {
            assert_eq!(envelope.update(streamed), GAIN_MAX);
        }
        assert_eq!(envelope.state(), GainState::Sustain);
    }

    #[test]
    fn stop_fade_ramps_down_from_its_start() {
        let stop_fade = StopFade::new(10, 20);
        assert_eq!(stop_fade.update(10), Some(GAIN_MAX));
        assert_eq!(stop_fade.update(20), Some(64));
        assert_eq!(stop_fade.update(29), Some(6));
        assert_eq!(stop_fade.update(30), None);
        assert_eq!(stop_fade.update(31), None);
    }

    #[test]
    fn zero_length_stop_fade_finishes_at_once() {
        assert_eq!(StopFade::new(42, 0).update(42), None);
    }

    #[test]
    fn gains_are_combined_and_applied_in_fixed_point() {
        assert_eq!(combine_gains(GAIN_MAX, GAIN_MAX), GAIN_MAX);
        assert_eq!(combine_gains(64, 64), 32);
        assert_eq!(combine_gains(GAIN_MAX, 0), 0);

        assert_eq!(apply_gain(1000, GAIN_MAX), 1000);
        assert_eq!(apply_gain(1000, 64), 500);
        assert_eq!(apply_gain(-32768, GAIN_MAX), -32768);
    }
}
