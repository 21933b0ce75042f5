use crate::{apply_gain, AudioStreamId, Gain, PlayingStreamState, GAIN_MAX};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Accumulation

/// Wide stereo frame so that summing many loud streams cannot wrap before the final clamp
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StereoFrame32 {
    pub left: i32,
    pub right: i32,
}

#[inline]
pub fn clamp_sample(value: i32) -> i16 {
    value.max(i16::min_value() as i32).min(i16::max_value() as i32) as i16
}

#[inline]
fn accumulate_stereo(accumulate: &mut [StereoFrame32], samples: &[i16]) {
    for (frame, pair) in accumulate.iter_mut().zip(samples.chunks_exact(2)) {
        frame.left += pair[0] as i32;
        frame.right += pair[1] as i32;
    }
}

#[inline]
fn accumulate_stereo_with_gain(accumulate: &mut [StereoFrame32], samples: &[i16], gain: Gain) {
    for (frame, pair) in accumulate.iter_mut().zip(samples.chunks_exact(2)) {
        frame.left += apply_gain(pair[0] as i32, gain);
        frame.right += apply_gain(pair[1] as i32, gain);
    }
}

#[inline]
fn accumulate_mono(accumulate: &mut [StereoFrame32], samples: &[i16]) {
    for (frame, &sample) in accumulate.iter_mut().zip(samples.iter()) {
        frame.left += sample as i32;
        frame.right += sample as i32;
    }
}

#[inline]
fn accumulate_mono_with_gain(accumulate: &mut [StereoFrame32], samples: &[i16], gain: Gain) {
    for (frame, &sample) in accumulate.iter_mut().zip(samples.iter()) {
        let value = apply_gain(sample as i32, gain);
        frame.left += value;
        frame.right += value;
    }
}

/// Adds interleaved `samples` scaled by `gain` onto `accumulate`. Mono samples go to both
/// channels. Only as many frames as both slices hold are touched.
pub fn accumulate_samples(
    accumulate: &mut [StereoFrame32],
    gain: Gain,
    channelcount: usize,
    samples: &[i16],
) {
    if gain <= 0 {
        return;
    }
    match (channelcount, gain >= GAIN_MAX) {
        (1, true) => accumulate_mono(accumulate, samples),
        (1, false) => accumulate_mono_with_gain(accumulate, samples, gain),
        (2, true) => accumulate_stereo(accumulate, samples),
        (2, false) => accumulate_stereo_with_gain(accumulate, samples, gain),
        _ => {}
    }
}

/// Clamps every accumulated frame into 16 bit and writes it interleaved to `output`
pub fn write_clamped_frames(accumulate: &[StereoFrame32], output: &mut [i16]) {
    for (frame, pair) in accumulate.iter().zip(output.chunks_exact_mut(2)) {
        pair[0] = clamp_sample(frame.left);
        pair[1] = clamp_sample(frame.right);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Mixer

/// Scratch buffers of the mix cycle. They grow on demand and are reused between cycles.
#[derive(Debug, Default)]
pub struct Mixer {
    accumulate_buffer: Vec<StereoFrame32>,
    read_buffer: Vec<i16>,
}

impl Mixer {
    pub fn new(framecount: usize) -> Mixer {
        let mut mixer = Mixer::default();
        mixer.reserve_framecount(framecount);
        mixer
    }

    pub fn reserve_framecount(&mut self, framecount: usize) {
        if self.accumulate_buffer.len() < framecount {
            self.accumulate_buffer
                .resize(framecount, StereoFrame32::default());
        }
        // Enough for stereo sources
        if self.read_buffer.len() < 2 * framecount {
            self.read_buffer.resize(2 * framecount, 0);
        }
    }

    /// Mixes `output.len() / 2` interleaved stereo frames from all playing `streams` into
    /// `output` and returns the ids of streams that finished in this cycle. A trailing odd sample
    /// in `output` is set to zero.
    pub fn mix<'a, StreamIter>(&mut self, streams: StreamIter, output: &mut [i16]) -> Vec<AudioStreamId>
    where
        StreamIter: IntoIterator<Item = &'a mut PlayingStreamState>,
    {
        let framecount = output.len() / 2;
        self.reserve_framecount(framecount);

        let accumulate = &mut self.accumulate_buffer[..framecount];
        for frame in accumulate.iter_mut() {
            *frame = StereoFrame32::default();
        }

        let mut finished_stream_ids = Vec::new();
        for stream in streams {
            if stream.mix_into(accumulate, &mut self.read_buffer) {
                finished_stream_ids.push(stream.id());
            }
        }

        write_clamped_frames(accumulate, output);
        if output.len() % 2 == 1 {
            output[output.len() - 1] = 0;
        }

        finished_stream_ids
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Tests
