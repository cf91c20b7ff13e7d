//! Mock denoising service for integration tests.
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use hound::{SampleFormat, WavSpec, WavWriter};
use realtime_denoise::config::{EndpointConfig, Scheme};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

pub const TEST_API_KEY: &str = "test-key";

/// How the mock answers each binary frame
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Send the frame straight back
    Echo,
    /// Send back the first half of the frame
    Halve,
    /// Echo this many frames, then close the connection
    CloseAfter(usize),
    /// Never answer
    Silent,
    /// Answer with a text frame instead of audio
    TextReply,
}

pub struct MockDenoiseServer {
    pub port: u16,
    requested_paths: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<usize>>>,
    handle: JoinHandle<()>,
}

impl MockDenoiseServer {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requested_paths = Arc::new(Mutex::new(Vec::new()));
        let received = Arc::new(Mutex::new(Vec::new()));

        let paths = Arc::clone(&requested_paths);
        let frames = Arc::clone(&received);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_client(
                    stream,
                    behavior,
                    Arc::clone(&paths),
                    Arc::clone(&frames),
                ));
            }
        });

        Self {
            port,
            requested_paths,
            received,
            handle,
        }
    }

    pub fn endpoint(&self) -> EndpointConfig {
        EndpointConfig::new(Scheme::Ws, "127.0.0.1", self.port, TEST_API_KEY).unwrap()
    }

    /// Request paths of every accepted connection
    pub fn requested_paths(&self) -> Vec<String> {
        self.requested_paths.lock().unwrap().clone()
    }

    /// Sizes of the binary frames received, in arrival order
    pub fn received_sizes(&self) -> Vec<usize> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for MockDenoiseServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_client(
    stream: TcpStream,
    behavior: Behavior,
    paths: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<usize>>>,
) {
    let record_path = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        paths.lock().unwrap().push(request.uri().path().to_string());
        Ok(response)
    };
    let Ok(mut ws) = accept_hdr_async(stream, record_path).await else {
        return;
    };

    let mut answered = 0;
    while let Some(Ok(msg)) = ws.next().await {
        let data = match msg {
            Message::Binary(data) => data,
            Message::Close(_) => break,
            _ => continue,
        };
        received.lock().unwrap().push(data.len());

        let reply = match behavior {
            Behavior::Echo => Message::Binary(data),
            Behavior::Halve => Message::Binary(data.slice(..data.len() / 2)),
            Behavior::CloseAfter(limit) if answered >= limit => {
                let _ = ws.close(None).await;
                break;
            }
            Behavior::CloseAfter(_) => Message::Binary(data),
            Behavior::Silent => continue,
            Behavior::TextReply => Message::Text("not audio".into()),
        };

        if ws.send(reply).await.is_err() {
            break;
        }
        answered += 1;
    }
}

/// A port nothing is listening on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Write a mono 16-bit WAV file
pub fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

/// `count` samples of a 440Hz tone
pub fn tone_samples(sample_rate: u32, count: usize) -> Vec<i16> {
    (0..count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16
        })
        .collect()
}
