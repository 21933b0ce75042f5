use wm_lib_audio as audio;
use wm_lib_core as core;

use crate::core::serde_derive::{Deserialize, Serialize};
use crate::core::*;
use audio::*;

use std::sync::Arc;

const PROGRAM_USAGE: &str = "Expected usage: `wm_render <RENDER_JOB_JSON>`
The render job describes the output file, the render duration and the tracks to mix.";

////////////////////////////////////////////////////////////////////////////////////////////////////
// Render job

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct RenderJob {
    output_filepath: String,
    duration_seconds: f32,
    audio: AudioConfig,
    tracks: Vec<RenderTrack>,
}

impl Default for RenderJob {
    fn default() -> Self {
        RenderJob {
            output_filepath: "target/render.wav".to_owned(),
            duration_seconds: 10.0,
            audio: AudioConfig::default(),
            tracks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RenderTrack {
    filepath: String,
    #[serde(default)]
    mode: WaveLoadMode,
    #[serde(default)]
    play_count: PlayCount,
    #[serde(default)]
    fade: FadeControl,
    #[serde(default)]
    start_seconds: f32,
    #[serde(default)]
    stop_seconds: Option<f32>,
    #[serde(default)]
    stop_fade_seconds: f32,
}

fn load_render_job(filepath: &str) -> Result<RenderJob, ConfigError> {
    let job: RenderJob = load_json_file(filepath).map_err(ConfigError::Load)?;
    job.audio.validate()?;
    Ok(job)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Rendering

struct ScheduledTrack {
    source: Option<Arc<dyn WaveSource>>,
    play_count: PlayCount,
    fade: FadeControl,
    start_frame: usize,
    stop_frame: Option<usize>,
    stop_fade_seconds: f32,
    stream: Option<PlayingStream>,
    stop_requested: bool,
}

fn schedule_tracks(
    tracks: &[RenderTrack],
    sources: Vec<Option<Arc<dyn WaveSource>>>,
    sample_rate_hz: usize,
) -> Vec<ScheduledTrack> {
    tracks
        .iter()
        .zip(sources.into_iter())
        .map(|(track, source)| ScheduledTrack {
            source,
            play_count: track.play_count,
            fade: track.fade,
            start_frame: audio_seconds_to_blockcount(track.start_seconds, sample_rate_hz),
            stop_frame: track
                .stop_seconds
                .map(|stop_seconds| audio_seconds_to_blockcount(stop_seconds, sample_rate_hz)),
            stop_fade_seconds: track.stop_fade_seconds,
            stream: None,
            stop_requested: false,
        })
        .collect()
}

/// Mixes all tracks offline in output buffer sized chunks and returns the interleaved result
fn render_tracks(
    config: &AudioConfig,
    duration_seconds: f32,
    tracks: &[RenderTrack],
    sources: Vec<Option<Arc<dyn WaveSource>>>,
) -> Vec<i16> {
    // The device never opens a platform output - we pull the frames ourselves
    let device = Device::new(config.clone());
    let engine = device.engine();
    let sample_rate_hz = engine.config().sample_rate_hz;
    let buffer_framecount = engine.config().buffer_framecount;

    let mut scheduled_tracks = schedule_tracks(tracks, sources, sample_rate_hz);
    let total_framecount = audio_seconds_to_blockcount(duration_seconds, sample_rate_hz);
    let mut output = Vec::with_capacity(AUDIO_NUM_CHANNELS * total_framecount);
    let mut chunk = vec![0i16; AUDIO_NUM_CHANNELS * buffer_framecount];

    let mut frame_index = 0;
    while frame_index < total_framecount {
        for track in scheduled_tracks.iter_mut() {
            if track.stream.is_none() && track.start_frame <= frame_index {
                track.stream = Some(device.play(track.source.clone(), track.play_count, track.fade));
            }
            if let (Some(stream), Some(stop_frame)) = (&track.stream, track.stop_frame) {
                if !track.stop_requested && stop_frame <= frame_index {
                    device.stop(stream, FadeControl::fade_in_out(0.0, track.stop_fade_seconds));
                    track.stop_requested = true;
                }
            }
        }

        let chunk_framecount = usize::min(buffer_framecount, total_framecount - frame_index);
        let chunk_samples = &mut chunk[..AUDIO_NUM_CHANNELS * chunk_framecount];
        engine.render_interleaved(chunk_samples);
        output.extend_from_slice(chunk_samples);
        frame_index += chunk_framecount;
    }

    output
}

fn main() {
    init_logging("target/wm_render_log.txt", log::Level::Info).expect("Unable to init logging");
    panic_set_hook_log_and_abort();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        log::error!("{}", PROGRAM_USAGE);
        std::process::exit(1);
    }
    let job_filepath = &args[1];

    let _timer = TimerScoped::new_scoped(&format!("Rendered '{}'", job_filepath));
    let job = load_render_job(job_filepath)
        .unwrap_or_else(|error| panic!("Could not load render job '{}': {}", job_filepath, error));

    let sources: Vec<Option<Arc<dyn WaveSource>>> = job
        .tracks
        .iter()
        .map(|track| {
            load_wave(&track.filepath, track.mode).map(|wave| wave as Arc<dyn WaveSource>)
        })
        .collect();
    let num_skipped = sources.iter().filter(|source| source.is_none()).count();
    if num_skipped > 0 {
        log::warn!("Skipping {} track(s) that could not be loaded", num_skipped);
    }

    let samples = render_tracks(&job.audio, job.duration_seconds, &job.tracks, sources);
    write_wav_file_stereo_i16(&job.output_filepath, &samples, job.audio.sample_rate_hz)
        .unwrap_or_else(|error| {
            panic!(
                "Could not write rendered audio to '{}': {}",
                job.output_filepath, error
            )
        });

    log::info!(
        "Wrote {:.2}s of audio to '{}'",
        audio_frames_to_seconds(samples.len() / AUDIO_NUM_CHANNELS, job.audio.sample_rate_hz),
        job.output_filepath
    );
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Tests
