use crate::core::log;
use crate::MixEngine;

use thiserror::Error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Output backend contract

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate_hz: usize,
    pub channelcount: usize,
    pub buffer_framecount: usize,
}

impl OutputSpec {
    /// How long the hardware takes to drain one buffer
    pub fn buffer_period(&self) -> Duration {
        if self.sample_rate_hz == 0 {
            return Duration::from_secs(0);
        }
        Duration::from_secs_f64(self.buffer_framecount as f64 / self.sample_rate_hz as f64)
    }
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Audio output is already open")]
    AlreadyOpen,

    #[error("Audio output does not support {0:?}")]
    UnsupportedSpec(OutputSpec),

    #[error("Audio output platform error: {0}")]
    Platform(String),

    #[error("Could not start audio output thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Something that periodically pulls interleaved 16-bit stereo frames from a `MixEngine`
pub trait AudioOutput {
    /// Starts pulling from `engine` and returns the spec that was actually obtained
    fn open(&mut self, desired: OutputSpec, engine: Arc<MixEngine>) -> Result<OutputSpec, OutputError>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Headless output

pub type OutputSink = Box<dyn FnMut(&[i16]) + Send>;

/// Runs the mix cycle on a dedicated thread and hands the mixed buffers to an optional sink
pub struct ThreadedOutput {
    paced: bool,
    sink: Option<OutputSink>,
    keep_running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ThreadedOutput {
    /// Renders one buffer per buffer period like a sound card would drain it
    pub fn new() -> ThreadedOutput {
        ThreadedOutput {
            paced: true,
            sink: None,
            keep_running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Renders buffers back to back as fast as possible
    pub fn new_unpaced() -> ThreadedOutput {
        ThreadedOutput {
            paced: false,
            sink: None,
            keep_running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn with_sink<Sink>(mut self, sink: Sink) -> ThreadedOutput
    where
        Sink: FnMut(&[i16]) + Send + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some() && self.keep_running.load(Ordering::Acquire)
    }

    pub fn close(&mut self) {
        self.keep_running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio output thread panicked");
            }
        }
    }
}

impl Default for ThreadedOutput {
    fn default() -> Self {
        ThreadedOutput::new()
    }
}

impl Drop for ThreadedOutput {
    fn drop(&mut self) {
        self.close();
    }
}

impl AudioOutput for ThreadedOutput {
    fn open(&mut self, desired: OutputSpec, engine: Arc<MixEngine>) -> Result<OutputSpec, OutputError> {
        if self.thread.is_some() {
            return Err(OutputError::AlreadyOpen);
        }
        if desired.channelcount != crate::AUDIO_NUM_CHANNELS
            || desired.sample_rate_hz == 0
            || desired.buffer_framecount == 0
        {
            return Err(OutputError::UnsupportedSpec(desired));
        }

        let paced = self.paced;
        let mut sink = self.sink.take();
        let keep_running = self.keep_running.clone();
        keep_running.store(true, Ordering::Release);

        let spawn_result = std::thread::Builder::new()
            .name("wavemix-audio".to_owned())
            .spawn(move || {
                let buffer_period = desired.buffer_period();
                let mut buffer = vec![0i16; desired.buffer_framecount * desired.channelcount];
                let mut next_deadline = Instant::now();

                while keep_running.load(Ordering::Acquire) {
                    engine.render_interleaved(&mut buffer);
                    if let Some(sink) = sink.as_mut() {
                        sink(&buffer[..]);
                    }

                    if paced {
                        next_deadline += buffer_period;
                        let now = Instant::now();
                        if next_deadline > now {
                            std::thread::sleep(next_deadline - now);
                        } else {
                            // We fell behind - don't try to catch up with a burst
                            next_deadline = now;
                        }
                    } else {
                        std::thread::yield_now();
                    }
                }
            });

        match spawn_result {
            Ok(thread) => {
                self.thread = Some(thread);
                Ok(desired)
            }
            Err(error) => {
                self.keep_running.store(false, Ordering::Release);
                Err(OutputError::Thread(error))
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioConfig, FadeControl, PlayCount, WaveBuffer, WaveSource};

    use std::sync::mpsc;

    #[test]
    fn buffer_period_matches_framecount() {
        let spec = OutputSpec {
            sample_rate_hz: 22050,
            channelcount: 2,
            buffer_framecount: 512,
        };
        let period = spec.buffer_period().as_secs_f64();
        assert!((period - 512.0 / 22050.0).abs() < 1e-9);
    }

    #[test]
    fn threaded_output_delivers_mixed_buffers() {
        let engine = Arc::new(MixEngine::new(AudioConfig::default()));
        let source: Arc<dyn WaveSource> = Arc::new(WaveBuffer::new_mono(22050, vec![1000; 4]));
        engine.play(Some(source), PlayCount::PLAY_LOOPED, FadeControl::NO_FADE);

        let (sender, receiver) = mpsc::channel();
        let mut output = ThreadedOutput::new_unpaced().with_sink(move |buffer: &[i16]| {
            let _ = sender.send(buffer.to_vec());
        });
        let spec = output.open(engine.output_spec(), engine.clone()).unwrap();
        assert_eq!(spec.buffer_framecount, 512);
        assert!(output.is_running());

        let buffer = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(buffer.len(), 1024);
        assert!(buffer.iter().all(|&sample| sample == 1000));

        output.close();
        assert!(!output.is_running());
    }

    #[test]
    fn threaded_output_rejects_second_open() {
        let engine = Arc::new(MixEngine::new(AudioConfig::default()));
        let mut output = ThreadedOutput::new_unpaced();
        output.open(engine.output_spec(), engine.clone()).unwrap();
        assert!(matches!(
            output.open(engine.output_spec(), engine),
            Err(OutputError::AlreadyOpen)
        ));
    }

    #[test]
    fn threaded_output_rejects_mono() {
        let engine = Arc::new(MixEngine::new(AudioConfig::default()));
        let mut spec = engine.output_spec();
        spec.channelcount = 1;
        assert!(matches!(
            ThreadedOutput::new().open(spec, engine),
            Err(OutputError::UnsupportedSpec(_))
        ));
    }
}
