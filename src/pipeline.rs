//! Read a WAV file, stream it through the denoiser, write the result.

use crate::audio::{AudioCodec, AudioFormat, DenoisedAudio, WavCodec};
use crate::chunker::Chunker;
use crate::config::{EndpointConfig, StreamConfig, DEFAULT_CHUNK_DURATION_MS};
use crate::endpoint::EndpointDescriptor;
use crate::error::DenoiseError;
use crate::latency::{LatencyObserver, LatencyRecorder, LatencySummary};
use crate::session::stream_chunks;
use std::path::{Path, PathBuf};
use strum::Display;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Where a run is, or where it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PipelineStage {
    #[strum(serialize = "reading input")]
    ReadingInput,
    #[strum(serialize = "streaming")]
    Streaming,
    #[strum(serialize = "writing output")]
    WritingOutput,
    #[strum(serialize = "done")]
    Done,
}

#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: PipelineStage,
    #[source]
    pub source: DenoiseError,
}

impl StageError {
    fn at(stage: PipelineStage) -> impl FnOnce(DenoiseError) -> StageError {
        move |source| StageError { stage, source }
    }
}

/// Arguments of one denoising run
#[derive(Debug, Clone)]
pub struct DenoiseRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub output_frequency_hz: u32,
    pub chunk_duration_ms: u32,
}

impl DenoiseRequest {
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        output_frequency_hz: u32,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            output_frequency_hz,
            chunk_duration_ms: DEFAULT_CHUNK_DURATION_MS,
        }
    }

    pub fn with_chunk_duration_ms(mut self, chunk_duration_ms: u32) -> Self {
        self.chunk_duration_ms = chunk_duration_ms;
        self
    }

    fn validate(&self) -> Result<(), DenoiseError> {
        if self.output_frequency_hz == 0 {
            return Err(DenoiseError::InvalidParameter(
                "output sampling frequency must be positive".to_string(),
            ));
        }
        if self.chunk_duration_ms == 0 {
            return Err(DenoiseError::InvalidParameter(
                "chunk duration must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// What a successful run did
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub output_path: PathBuf,
    pub chunks: usize,
    pub bytes_sent: usize,
    pub bytes_received: usize,
    pub latency: Option<LatencySummary>,
}

pub struct DenoisePipeline {
    endpoint: EndpointConfig,
    stream_config: StreamConfig,
    codec: Box<dyn AudioCodec>,
}

impl DenoisePipeline {
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self::with_config(endpoint, StreamConfig::default())
    }

    pub fn with_config(endpoint: EndpointConfig, stream_config: StreamConfig) -> Self {
        Self {
            endpoint,
            stream_config,
            codec: Box::new(WavCodec),
        }
    }

    /// Swap the container codec, e.g. for in-memory audio in tests
    pub fn with_codec(mut self, codec: impl AudioCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Run every stage: read, stream, write.
    ///
    /// Any failure aborts the run and no output file is left behind.
    pub async fn process(
        &self,
        request: &DenoiseRequest,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, StageError> {
        let mut recorder = LatencyRecorder::console();
        let audio = self.stream(request, &mut recorder, cancel).await?;
        self.write_output(&request.output_path, &audio)?;

        let samples = recorder.samples();
        let report = PipelineReport {
            output_path: request.output_path.clone(),
            chunks: samples.len(),
            bytes_sent: samples.iter().map(|s| s.bytes_sent).sum(),
            bytes_received: samples.iter().map(|s| s.bytes_received).sum(),
            latency: recorder.summary(),
        };

        if let Some(summary) = &report.latency {
            log::info!(
                "Round trips over {} chunks: min {:.2}ms, mean {:.2}ms, max {:.2}ms",
                summary.count,
                summary.min.as_secs_f64() * 1000.0,
                summary.mean.as_secs_f64() * 1000.0,
                summary.max.as_secs_f64() * 1000.0
            );
        }
        log::debug!("Pipeline stage: {}", PipelineStage::Done);

        Ok(report)
    }

    /// Read the input and stream it through the service, returning the
    /// denoised audio without writing it anywhere.
    pub async fn stream(
        &self,
        request: &DenoiseRequest,
        observer: &mut dyn LatencyObserver,
        cancel: &CancellationToken,
    ) -> Result<DenoisedAudio, StageError> {
        log::debug!("Pipeline stage: {}", PipelineStage::ReadingInput);
        request
            .validate()
            .map_err(StageError::at(PipelineStage::ReadingInput))?;

        let buffer = self
            .codec
            .read(&request.input_path)
            .map_err(StageError::at(PipelineStage::ReadingInput))?;
        let format = buffer.format();

        log::debug!("Pipeline stage: {}", PipelineStage::Streaming);
        let streaming = StageError::at(PipelineStage::Streaming);
        let prepared = EndpointDescriptor::build(
            &self.endpoint,
            format.sample_width_bytes,
            format.frame_rate_hz,
            request.output_frequency_hz,
        )
        .and_then(|endpoint| {
            Chunker::new(buffer.clone(), request.chunk_duration_ms).map(|c| (endpoint, c))
        });
        let (endpoint, chunker) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Err(streaming(e)),
        };

        log::info!(
            "Streaming {:.2}s of audio as {} chunks of up to {} bytes ({}ms each)",
            buffer.duration_secs(),
            chunker.chunk_count(),
            chunker.bytes_per_chunk(),
            request.chunk_duration_ms
        );

        let streamed = stream_chunks(
            &endpoint,
            &self.stream_config,
            chunker.into_stream(),
            observer,
            cancel,
        )
        .await
        .map_err(streaming)?;

        Ok(DenoisedAudio {
            format: AudioFormat::mono(format.sample_width_bytes, request.output_frequency_hz),
            data: streamed.data,
        })
    }

    /// Write already denoised audio. Safe to retry after a failure without
    /// streaming again.
    pub fn write_output(&self, path: &Path, audio: &DenoisedAudio) -> Result<(), StageError> {
        log::debug!("Pipeline stage: {}", PipelineStage::WritingOutput);
        self.codec
            .write(path, audio)
            .map_err(StageError::at(PipelineStage::WritingOutput))
    }
}
