use anyhow::Context;
use clap::Parser;
use realtime_denoise::{
    config::{EndpointConfig, Scheme, StreamConfig, DEFAULT_CHUNK_DURATION_MS},
    DenoisePipeline, DenoiseRequest,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Denoise a WAV file in real time through a remote denoising service
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// File to denoise in .wav format
    #[arg(long, alias = "wav_file")]
    wav_file: PathBuf,

    /// Sampling frequency of denoised output
    #[arg(long, alias = "denoised_sampling_freq")]
    denoised_sampling_freq: u32,

    /// Chunk size in ms to send audio
    #[arg(long, alias = "chunk_size_ms", default_value_t = DEFAULT_CHUNK_DURATION_MS)]
    chunk_size_ms: u32,

    /// Where to write the denoised audio
    #[arg(long, default_value = "output.wav")]
    output: PathBuf,

    /// How long to wait for each denoised chunk
    #[arg(long, default_value_t = 10000)]
    response_timeout_ms: u64,

    /// Override DENOISE_HOST
    #[arg(long)]
    host: Option<String>,

    /// Override DENOISE_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Override DENOISE_SCHEME (ws or wss)
    #[arg(long)]
    scheme: Option<Scheme>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut endpoint = EndpointConfig::load().context("Failed to load endpoint configuration")?;
    if let Some(host) = args.host {
        endpoint.host = host;
    }
    if let Some(port) = args.port {
        endpoint.port = port;
    }
    if let Some(scheme) = args.scheme {
        endpoint.scheme = scheme;
    }

    let stream_config = StreamConfig {
        response_timeout: Duration::from_millis(args.response_timeout_ms),
        ..StreamConfig::default()
    };
    let pipeline = DenoisePipeline::with_config(endpoint, stream_config);
    let request = DenoiseRequest::new(args.wav_file, args.output, args.denoised_sampling_freq)
        .with_chunk_duration_ms(args.chunk_size_ms);

    log::info!(
        "🎧 Denoising {} -> {} at {}Hz",
        request.input_path.display(),
        request.output_path.display(),
        request.output_frequency_hz
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received Ctrl+C, stopping stream...");
            ctrl_c.cancel();
        }
    });

    match pipeline.process(&request, &cancel).await {
        Ok(report) => {
            println!(
                "✅ Wrote {} ({} chunks, {} bytes denoised)",
                report.output_path.display(),
                report.chunks,
                report.bytes_received
            );
            Ok(())
        }
        Err(e) => {
            log::error!("Denoising failed while {}: {}", e.stage, e.source);
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    }
}
