pub mod audio;
pub mod chunker;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod latency;
pub mod pipeline;
pub mod session;

pub use error::{DenoiseError, Result};
pub use pipeline::{DenoisePipeline, DenoiseRequest, PipelineReport, PipelineStage, StageError};
