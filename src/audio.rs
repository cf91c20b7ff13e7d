//! Audio containers at the edges of the pipeline.
//!
//! Everything between reading and writing works on raw little-endian PCM
//! bytes, laid out exactly as a WAV `data` chunk stores them (8-bit samples
//! are unsigned, wider samples are two's complement).

use crate::error::{DenoiseError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Sample layout shared by input and output audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_width_bytes: u16,
    pub frame_rate_hz: u32,
    pub channel_count: u16,
}

impl AudioFormat {
    /// Single-channel format, the only layout the service accepts.
    pub fn mono(sample_width_bytes: u16, frame_rate_hz: u32) -> Self {
        Self {
            sample_width_bytes,
            frame_rate_hz,
            channel_count: 1,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.sample_width_bytes as usize * self.channel_count as usize
    }
}

/// Raw samples read from the input file. Cheap to clone, never mutated.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    format: AudioFormat,
    data: Arc<[u8]>,
}

impl AudioBuffer {
    pub fn new(format: AudioFormat, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            format,
            data: data.into(),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Duration in seconds, assuming whole frames
    pub fn duration_secs(&self) -> f64 {
        let frame_bytes = self.format.bytes_per_frame();
        if frame_bytes == 0 || self.format.frame_rate_hz == 0 {
            return 0.0;
        }
        (self.data.len() / frame_bytes) as f64 / self.format.frame_rate_hz as f64
    }
}

/// Denoised samples accumulated from the service, in chunk order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenoisedAudio {
    pub format: AudioFormat,
    pub data: Vec<u8>,
}

/// Reads input containers and writes output containers
pub trait AudioCodec: Send + Sync {
    fn read(&self, path: &Path) -> Result<AudioBuffer>;

    fn write(&self, path: &Path, audio: &DenoisedAudio) -> Result<()>;
}

/// Integer PCM WAV files via `hound`
#[derive(Debug, Default, Clone, Copy)]
pub struct WavCodec;

impl AudioCodec for WavCodec {
    fn read(&self, path: &Path) -> Result<AudioBuffer> {
        let mut reader = WavReader::open(path).map_err(|e| DenoiseError::input_read(path, e))?;
        let spec = reader.spec();

        log::info!(
            "Input audio {}: {}Hz, {} channels, {} bits",
            path.display(),
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample
        );

        if spec.sample_format != SampleFormat::Int {
            return Err(DenoiseError::input_read(
                path,
                "only integer PCM is supported",
            ));
        }
        if spec.channels != 1 {
            return Err(DenoiseError::input_read(
                path,
                format!("expected mono audio, got {} channels", spec.channels),
            ));
        }
        let sample_width = sample_width_bytes(spec.bits_per_sample)
            .ok_or_else(|| {
                DenoiseError::input_read(
                    path,
                    format!("unsupported bit depth {}", spec.bits_per_sample),
                )
            })?;

        let mut data = Vec::with_capacity(reader.len() as usize * sample_width as usize);
        for sample in reader.samples::<i32>() {
            let sample = sample.map_err(|e| DenoiseError::input_read(path, e))?;
            encode_sample(sample, sample_width, &mut data);
        }

        Ok(AudioBuffer::new(
            AudioFormat::mono(sample_width, spec.sample_rate),
            data,
        ))
    }

    fn write(&self, path: &Path, audio: &DenoisedAudio) -> Result<()> {
        let width = audio.format.sample_width_bytes;
        if width == 0 || width > 4 {
            return Err(DenoiseError::output_write(
                path,
                format!("unsupported sample width {}", width),
            ));
        }

        let spec = WavSpec {
            channels: audio.format.channel_count,
            sample_rate: audio.format.frame_rate_hz,
            bits_per_sample: width * 8,
            sample_format: SampleFormat::Int,
        };

        let trailing = audio.data.len() % width as usize;
        if trailing != 0 {
            log::warn!(
                "Dropping {} trailing bytes that do not form a whole {}-byte sample",
                trailing,
                width
            );
        }

        if let Ok(existing) = std::fs::metadata(path) {
            if existing.permissions().readonly() {
                return Err(DenoiseError::output_write(
                    path,
                    "refusing to overwrite a read-only file",
                ));
            }
        }

        // Samples go to a temporary file next to `path`, which only replaces
        // `path` once complete. A failure leaves whatever was there untouched.
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged =
            NamedTempFile::new_in(dir).map_err(|e| DenoiseError::output_write(path, e))?;
        write_samples(&mut staged, spec, &audio.data[..audio.data.len() - trailing])
            .map_err(|e| DenoiseError::output_write(path, e))?;
        staged
            .persist(path)
            .map_err(|e| DenoiseError::output_write(path, e.error))?;

        log::info!(
            "Wrote {} bytes of audio to {} ({}Hz, {} bits)",
            audio.data.len() - trailing,
            path.display(),
            spec.sample_rate,
            spec.bits_per_sample
        );
        Ok(())
    }
}

fn write_samples(
    file: &mut NamedTempFile,
    spec: WavSpec,
    data: &[u8],
) -> std::result::Result<(), hound::Error> {
    let width = (spec.bits_per_sample / 8) as usize;
    let mut writer = WavWriter::new(BufWriter::new(file), spec)?;
    for raw in data.chunks_exact(width) {
        match width {
            1 => writer.write_sample(decode_sample(raw) as i8)?,
            2 => writer.write_sample(decode_sample(raw) as i16)?,
            _ => writer.write_sample(decode_sample(raw))?,
        }
    }
    writer.finalize()
}

fn sample_width_bytes(bits_per_sample: u16) -> Option<u16> {
    match bits_per_sample {
        8 | 16 | 24 | 32 => Some(bits_per_sample / 8),
        _ => None,
    }
}

/// Append one sample as WAV stores it
fn encode_sample(sample: i32, width: u16, out: &mut Vec<u8>) {
    match width {
        1 => out.push((sample + 128) as u8),
        _ => out.extend_from_slice(&sample.to_le_bytes()[..width as usize]),
    }
}

/// Inverse of `encode_sample` for a slice of exactly one sample
fn decode_sample(raw: &[u8]) -> i32 {
    if raw.len() == 1 {
        return raw[0] as i32 - 128;
    }
    let mut buf = [0u8; 4];
    buf[..raw.len()].copy_from_slice(raw);
    let shift = 32 - 8 * raw.len() as u32;
    (i32::from_le_bytes(buf) << shift) >> shift
}
