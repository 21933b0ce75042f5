use crate::core::log;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Wave sources

/// Read-only PCM provider that any number of playing streams can share
pub trait WaveSource: Send + Sync {
    /// Either 1 (mono) or 2 (stereo)
    fn channelcount(&self) -> usize;
    fn sample_rate_hz(&self) -> usize;
    fn blockcount(&self) -> usize;

    /// Reads the blocks `[first_block, first_block + blockcount)` as interleaved samples into
    /// `out_samples`. Returns how many blocks were actually delivered, which is less than
    /// requested if the range reaches past the end of the source, `out_samples` is too small or
    /// the backing store could not deliver.
    fn read_blocks(&self, first_block: usize, blockcount: usize, out_samples: &mut [i16]) -> usize;

    fn length_seconds(&self) -> f64 {
        crate::audio_frames_to_seconds(self.blockcount(), self.sample_rate_hz())
    }
}

/// Clamps a requested block range to what actually exists and fits into the output
#[inline]
fn readable_blockcount(
    source_blockcount: usize,
    channelcount: usize,
    first_block: usize,
    blockcount: usize,
    out_samplecount: usize,
) -> usize {
    if first_block >= source_blockcount || channelcount == 0 {
        return 0;
    }
    blockcount
        .min(source_blockcount - first_block)
        .min(out_samplecount / channelcount)
}

/// Memory-resident interleaved 16-bit PCM
#[derive(Debug, Clone)]
pub struct WaveBuffer {
    channelcount: usize,
    sample_rate_hz: usize,
    samples: Vec<i16>,
}

impl WaveBuffer {
    pub fn new_mono(sample_rate_hz: usize, samples: Vec<i16>) -> WaveBuffer {
        WaveBuffer {
            channelcount: 1,
            sample_rate_hz,
            samples,
        }
    }

    pub fn new_stereo_from_frames(sample_rate_hz: usize, frames: &[(i16, i16)]) -> WaveBuffer {
        let samples = frames
            .iter()
            .flat_map(|&(left, right)| vec![left, right])
            .collect();
        WaveBuffer {
            channelcount: 2,
            sample_rate_hz,
            samples,
        }
    }

    /// A trailing partial block is dropped
    pub fn new_interleaved(
        channelcount: usize,
        sample_rate_hz: usize,
        mut samples: Vec<i16>,
    ) -> Result<WaveBuffer, WaveError> {
        if channelcount != 1 && channelcount != 2 {
            return Err(WaveError::UnsupportedChannelCount(channelcount as u16));
        }
        if sample_rate_hz == 0 {
            return Err(WaveError::InvalidSampleRate);
        }
        let samplecount = samples.len() - samples.len() % channelcount;
        samples.truncate(samplecount);
        Ok(WaveBuffer {
            channelcount,
            sample_rate_hz,
            samples,
        })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}

impl WaveSource for WaveBuffer {
    fn channelcount(&self) -> usize {
        self.channelcount
    }
    fn sample_rate_hz(&self) -> usize {
        self.sample_rate_hz
    }
    fn blockcount(&self) -> usize {
        self.samples.len() / self.channelcount
    }

    fn read_blocks(&self, first_block: usize, blockcount: usize, out_samples: &mut [i16]) -> usize {
        let blockcount = readable_blockcount(
            self.blockcount(),
            self.channelcount,
            first_block,
            blockcount,
            out_samples.len(),
        );
        let begin = first_block * self.channelcount;
        let end = begin + blockcount * self.channelcount;
        out_samples[..end - begin].copy_from_slice(&self.samples[begin..end]);
        blockcount
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// RIFF/WAVE container

pub const WAVE_FORMAT_PCM: u16 = 1;

const RIFF_CHUNK_HEADER_SIZE: u64 = 8;
const FORMAT_CHUNK_PCM_SIZE: u64 = 16;

#[derive(Debug, Error)]
pub enum WaveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a RIFF file")]
    NotRiff,

    #[error("File too small (RIFF size is {0} bytes)")]
    FileTooSmall(u32),

    #[error("Not a WAVE file")]
    NotWave,

    #[error("Chunk '{chunk_id}' declares {chunk_size} bytes but only {bytes_left} bytes are left")]
    ChunkOverrun {
        chunk_id: String,
        chunk_size: u64,
        bytes_left: u64,
    },

    #[error("Data chunk should follow format chunk")]
    DataBeforeFormat,

    #[error("Format chunk too small ({0} bytes)")]
    FormatChunkTooSmall(u64),

    #[error("Format category {0} is not supported (only PCM)")]
    UnsupportedFormatCategory(u16),

    #[error("Only 8 and 16 bits per sample formats are supported - got {0}")]
    UnsupportedBitDepth(u16),

    #[error("Only mono and stereo are supported - got {0} channels")]
    UnsupportedChannelCount(u16),

    #[error("Sample rate must be positive")]
    InvalidSampleRate,

    #[error("Block align {block_align} does not fit {channelcount} channels of {bits_per_sample} bit")]
    InvalidBlockAlign {
        block_align: u16,
        channelcount: u16,
        bits_per_sample: u16,
    },

    #[error("File doesn't contain needed chunks (format found: {format_found}, data found: {data_found})")]
    MissingChunks { format_found: bool, data_found: bool },

    #[error("Could not write wav data: {0}")]
    Write(#[from] hound::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveLoadMode {
    /// Decodes the whole data chunk on load
    LoadInMemory,
    /// Keeps the reader around and decodes blocks on request
    StreamFromFile,
}

impl Default for WaveLoadMode {
    fn default() -> Self {
        WaveLoadMode::LoadInMemory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    pub format_category: u16,
    pub channelcount: u16,
    pub sample_rate_hz: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

#[derive(Debug, Clone, Copy)]
struct WaveHeader {
    format: WaveFormat,
    data_offset: u64,
    data_size: u64,
}

fn read_fourcc<R: Read>(reader: &mut R) -> Result<[u8; 4], WaveError> {
    let mut code = [0u8; 4];
    reader.read_exact(&mut code)?;
    Ok(code)
}

fn parse_format_chunk<R: Read>(reader: &mut R, chunk_size: u64) -> Result<WaveFormat, WaveError> {
    if chunk_size < FORMAT_CHUNK_PCM_SIZE {
        return Err(WaveError::FormatChunkTooSmall(chunk_size));
    }

    let format_category = reader.read_u16::<LittleEndian>()?;
    if format_category != WAVE_FORMAT_PCM {
        return Err(WaveError::UnsupportedFormatCategory(format_category));
    }

    let format = WaveFormat {
        format_category,
        channelcount: reader.read_u16::<LittleEndian>()?,
        sample_rate_hz: reader.read_u32::<LittleEndian>()?,
        byte_rate: reader.read_u32::<LittleEndian>()?,
        block_align: reader.read_u16::<LittleEndian>()?,
        bits_per_sample: reader.read_u16::<LittleEndian>()?,
    };

    if format.bits_per_sample != 8 && format.bits_per_sample != 16 {
        return Err(WaveError::UnsupportedBitDepth(format.bits_per_sample));
    }
    if format.channelcount != 1 && format.channelcount != 2 {
        return Err(WaveError::UnsupportedChannelCount(format.channelcount));
    }
    if format.sample_rate_hz == 0 {
        return Err(WaveError::InvalidSampleRate);
    }
    if format.block_align != format.channelcount * format.bits_per_sample / 8 {
        return Err(WaveError::InvalidBlockAlign {
            block_align: format.block_align,
            channelcount: format.channelcount,
            bits_per_sample: format.bits_per_sample,
        });
    }

    Ok(format)
}

/// Scans the chunk list and leaves the reader at an unspecified position
fn parse_wave_header<R: Read + Seek>(reader: &mut R) -> Result<WaveHeader, WaveError> {
    let stream_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    if &read_fourcc(reader)? != b"RIFF" {
        return Err(WaveError::NotRiff);
    }
    let riff_size = reader.read_u32::<LittleEndian>()?;
    if riff_size < 4 {
        return Err(WaveError::FileTooSmall(riff_size));
    }
    if &read_fourcc(reader)? != b"WAVE" {
        return Err(WaveError::NotWave);
    }

    let mut bytes_to_scan = riff_size as u64 - 4;
    let mut format = None;
    let mut data = None;
    while bytes_to_scan >= RIFF_CHUNK_HEADER_SIZE {
        let chunk_id = read_fourcc(reader)?;
        let chunk_size = reader.read_u32::<LittleEndian>()? as u64;
        bytes_to_scan -= RIFF_CHUNK_HEADER_SIZE;

        let chunk_start = reader.stream_position()?;
        let bytes_left = bytes_to_scan.min(stream_len.saturating_sub(chunk_start));
        if chunk_size > bytes_left {
            return Err(WaveError::ChunkOverrun {
                chunk_id: String::from_utf8_lossy(&chunk_id).into_owned(),
                chunk_size,
                bytes_left,
            });
        }

        match &chunk_id {
            b"fmt " => format = Some(parse_format_chunk(reader, chunk_size)?),
            b"data" => {
                if format.is_none() {
                    return Err(WaveError::DataBeforeFormat);
                }
                data = Some((chunk_start, chunk_size));
            }
            _ => {}
        }

        // Chunks are word aligned - odd sized chunks are followed by a pad byte
        let padded_size = u64::min(chunk_size + (chunk_size & 1), bytes_left);
        reader.seek(SeekFrom::Start(chunk_start + padded_size))?;
        bytes_to_scan -= padded_size;
    }

    match (format, data) {
        (Some(format), Some((data_offset, data_size))) => Ok(WaveHeader {
            format,
            data_offset,
            data_size,
        }),
        (format, data) => Err(WaveError::MissingChunks {
            format_found: format.is_some(),
            data_found: data.is_some(),
        }),
    }
}

/// Converts raw little endian PCM into signed 16-bit samples. 8-bit PCM is unsigned with its
/// midpoint at 128. Returns the number of samples written.
fn decode_pcm_samples(raw: &[u8], bits_per_sample: u16, out_samples: &mut [i16]) -> usize {
    match bits_per_sample {
        8 => {
            let samplecount = usize::min(raw.len(), out_samples.len());
            for (out_sample, &raw_sample) in out_samples.iter_mut().zip(raw[..samplecount].iter()) {
                *out_sample = (raw_sample as i16 - 128) << 8;
            }
            samplecount
        }
        16 => {
            let samplecount = usize::min(raw.len() / 2, out_samples.len());
            LittleEndian::read_i16_into(&raw[..2 * samplecount], &mut out_samples[..samplecount]);
            samplecount
        }
        _ => 0,
    }
}

/// Reads until `buffer` is full or the reader runs dry
fn read_up_to<R: Read + ?Sized>(reader: &mut R, buffer: &mut [u8]) -> usize {
    let mut bytes_read = 0;
    while bytes_read < buffer.len() {
        match reader.read(&mut buffer[bytes_read..]) {
            Ok(0) => break,
            Ok(count) => bytes_read += count,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    bytes_read
}

pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

struct StreamingReader {
    reader: Box<dyn ReadSeek>,
    raw_buffer: Vec<u8>,
}

enum WaveStorage {
    InMemory(Vec<i16>),
    Streaming(Mutex<StreamingReader>),
}

/// A parsed RIFF/WAVE container holding 8 or 16 bit PCM
pub struct WaveFile {
    name: String,
    format: WaveFormat,
    data_offset: u64,
    data_size: u64,
    blockcount: usize,
    storage: WaveStorage,
}

impl std::fmt::Debug for WaveFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveFile")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("blockcount", &self.blockcount)
            .field("mode", &self.mode())
            .finish()
    }
}

impl WaveFile {
    pub fn from_reader<R: Read + Seek + Send + 'static>(
        name: &str,
        mut reader: R,
        mode: WaveLoadMode,
    ) -> Result<WaveFile, WaveError> {
        let header = parse_wave_header(&mut reader)?;
        let format = header.format;
        let block_size = format.block_align as u64;
        let blockcount = (header.data_size / block_size) as usize;

        let storage = match mode {
            WaveLoadMode::LoadInMemory => {
                let mut raw = vec![0u8; blockcount * block_size as usize];
                reader.seek(SeekFrom::Start(header.data_offset))?;
                reader.read_exact(&mut raw)?;

                let mut samples = vec![0i16; blockcount * format.channelcount as usize];
                decode_pcm_samples(&raw, format.bits_per_sample, &mut samples);
                WaveStorage::InMemory(samples)
            }
            WaveLoadMode::StreamFromFile => WaveStorage::Streaming(Mutex::new(StreamingReader {
                reader: Box::new(reader),
                raw_buffer: Vec::new(),
            })),
        };

        Ok(WaveFile {
            name: name.to_owned(),
            format,
            data_offset: header.data_offset,
            data_size: header.data_size,
            blockcount,
            storage,
        })
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>, mode: WaveLoadMode) -> Result<WaveFile, WaveError> {
        WaveFile::from_reader(name, std::io::Cursor::new(bytes), mode)
    }

    pub fn load(filepath: &str, mode: WaveLoadMode) -> Result<WaveFile, WaveError> {
        let file = std::fs::File::open(filepath)?;
        WaveFile::from_reader(filepath, std::io::BufReader::new(file), mode)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> WaveFormat {
        self.format
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    pub fn mode(&self) -> WaveLoadMode {
        match self.storage {
            WaveStorage::InMemory(_) => WaveLoadMode::LoadInMemory,
            WaveStorage::Streaming(_) => WaveLoadMode::StreamFromFile,
        }
    }
}

impl WaveSource for WaveFile {
    fn channelcount(&self) -> usize {
        self.format.channelcount as usize
    }
    fn sample_rate_hz(&self) -> usize {
        self.format.sample_rate_hz as usize
    }
    fn blockcount(&self) -> usize {
        self.blockcount
    }

    fn read_blocks(&self, first_block: usize, blockcount: usize, out_samples: &mut [i16]) -> usize {
        let channelcount = self.channelcount();
        let blockcount = readable_blockcount(
            self.blockcount,
            channelcount,
            first_block,
            blockcount,
            out_samples.len(),
        );
        if blockcount == 0 {
            return 0;
        }

        match &self.storage {
            WaveStorage::InMemory(samples) => {
                let begin = first_block * channelcount;
                let end = begin + blockcount * channelcount;
                out_samples[..end - begin].copy_from_slice(&samples[begin..end]);
                blockcount
            }
            WaveStorage::Streaming(streaming) => {
                let mut streaming = streaming.lock();
                let streaming = &mut *streaming;

                let block_size = self.format.block_align as usize;
                let read_offset = self.data_offset + (first_block * block_size) as u64;
                if streaming.reader.seek(SeekFrom::Start(read_offset)).is_err() {
                    return 0;
                }

                streaming.raw_buffer.resize(blockcount * block_size, 0);
                let bytes_read = read_up_to(&mut streaming.reader, &mut streaming.raw_buffer);
                let blocks_read = bytes_read / block_size;
                decode_pcm_samples(
                    &streaming.raw_buffer[..blocks_read * block_size],
                    self.format.bits_per_sample,
                    &mut out_samples[..blocks_read * channelcount],
                );
                blocks_read
            }
        }
    }
}

/// Logs the reason and returns `None` if the file can't be used for playback
pub fn load_wave(filepath: &str, mode: WaveLoadMode) -> Option<Arc<WaveFile>> {
    match WaveFile::load(filepath, mode) {
        Ok(wave_file) => {
            log::debug!(
                "Loaded wave file '{}' ({} channels, {}Hz, {} blocks, {:?})",
                filepath,
                wave_file.channelcount(),
                wave_file.sample_rate_hz(),
                wave_file.blockcount(),
                mode
            );
            Some(Arc::new(wave_file))
        }
        Err(error) => {
            log::error!("Could not load wave file '{}': {}", filepath, error);
            None
        }
    }
}

pub fn write_wav_file_stereo_i16(
    filepath: &str,
    samples_interleaved: &[i16],
    sample_rate_hz: usize,
) -> Result<(), WaveError> {
    let header = hound::WavSpec {
        channels: 2,
        sample_rate: sample_rate_hz as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(filepath, header)?;
    for &sample in samples_interleaved {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Tests
