//! Lockstep streaming over one WebSocket connection.
//!
//! Each chunk is sent as a single binary frame and the session then waits for
//! exactly one binary response before pulling the next chunk. Response `i`
//! therefore always belongs to chunk `i`.

use crate::chunker::Chunk;
use crate::config::StreamConfig;
use crate::endpoint::EndpointDescriptor;
use crate::error::{DenoiseError, Result};
use crate::latency::{LatencyObserver, LatencySample};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{protocol::Message, Error as WsError};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub type DenoiseSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything the service sent back, in chunk order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamedAudio {
    pub data: Vec<u8>,
    pub chunks_sent: usize,
    pub bytes_sent: usize,
}

pub struct StreamingSession<S> {
    ws: S,
    response_timeout: Duration,
    chunks_sent: usize,
    responses_received: usize,
    bytes_sent: usize,
    output: Vec<u8>,
}

impl StreamingSession<DenoiseSocket> {
    /// Open the one connection this session will use
    pub async fn connect(
        endpoint: &EndpointDescriptor,
        config: &StreamConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let url = endpoint.url()?;
        log::info!("Connecting to denoising endpoint: {}", endpoint);

        let connected = tokio::select! {
            result = tokio::time::timeout(config.connect_timeout, connect_async(url.as_str())) => result,
            _ = cancel.cancelled() => return Err(DenoiseError::Cancelled),
        };

        let (ws, response) = connected
            .map_err(|_| {
                DenoiseError::Connection(format!(
                    "timed out after {:?} connecting to {}",
                    config.connect_timeout, endpoint
                ))
            })?
            .map_err(|e| DenoiseError::Connection(format!("{}: {}", endpoint, e)))?;

        log::info!("WebSocket connected, status: {}", response.status());
        Ok(Self::new(ws, config.response_timeout))
    }
}

impl<S> StreamingSession<S>
where
    S: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin,
{
    pub fn new(ws: S, response_timeout: Duration) -> Self {
        Self {
            ws,
            response_timeout,
            chunks_sent: 0,
            responses_received: 0,
            bytes_sent: 0,
            output: Vec::new(),
        }
    }

    /// Drain `chunks` through the connection and close it.
    ///
    /// On any failure the connection is closed and the partial output is
    /// dropped; the error carries how far the stream got.
    pub async fn run<C>(
        mut self,
        chunks: C,
        observer: &mut dyn LatencyObserver,
        cancel: &CancellationToken,
    ) -> Result<StreamedAudio>
    where
        C: Stream<Item = Chunk> + Unpin,
    {
        if let Err(e) = self.drive(chunks, observer, cancel).await {
            log::warn!(
                "Streaming aborted after {} chunks sent, {} responses received: {}",
                self.chunks_sent,
                self.responses_received,
                e
            );
            self.shutdown().await;
            return Err(e);
        }

        self.shutdown().await;
        log::info!(
            "Streaming complete: {} chunks, {} bytes sent, {} bytes received",
            self.chunks_sent,
            self.bytes_sent,
            self.output.len()
        );

        Ok(StreamedAudio {
            data: self.output,
            chunks_sent: self.chunks_sent,
            bytes_sent: self.bytes_sent,
        })
    }

    async fn drive<C>(
        &mut self,
        mut chunks: C,
        observer: &mut dyn LatencyObserver,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        C: Stream<Item = Chunk> + Unpin,
    {
        loop {
            let next = tokio::select! {
                chunk = chunks.next() => chunk,
                _ = cancel.cancelled() => return Err(DenoiseError::Cancelled),
            };
            let Some(chunk) = next else {
                return Ok(());
            };

            if chunk.sequence != self.chunks_sent {
                return Err(self.interrupted(format!(
                    "chunk {} arrived out of order, expected chunk {}",
                    chunk.sequence, self.chunks_sent
                )));
            }

            let sample = self.round_trip(chunk, cancel).await?;
            observer.observe(sample);
        }
    }

    /// Send one chunk and wait for its response
    async fn round_trip(&mut self, chunk: Chunk, cancel: &CancellationToken) -> Result<LatencySample> {
        if cancel.is_cancelled() {
            return Err(DenoiseError::Cancelled);
        }

        let sequence = chunk.sequence;
        let bytes_sent = chunk.len();
        let start = Instant::now();

        log::debug!("Sending chunk {} ({} bytes)", sequence, bytes_sent);
        let sent = tokio::select! {
            result = self.ws.send(Message::Binary(chunk.bytes.into())) => result,
            _ = cancel.cancelled() => return Err(DenoiseError::Cancelled),
        };
        if let Err(e) = sent {
            return Err(self.interrupted(format!("failed to send chunk {}: {}", sequence, e)));
        }
        self.chunks_sent += 1;
        self.bytes_sent += bytes_sent;

        let response = self.receive(sequence, cancel).await?;
        let round_trip = start.elapsed();

        self.responses_received += 1;
        self.output.extend_from_slice(&response);

        Ok(LatencySample {
            sequence,
            round_trip,
            bytes_sent,
            bytes_received: response.len(),
        })
    }

    /// Wait for the next binary frame, skipping control frames
    async fn receive(&mut self, sequence: usize, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + self.response_timeout;

        loop {
            let next = tokio::select! {
                result = tokio::time::timeout_at(deadline, self.ws.next()) => result,
                _ = cancel.cancelled() => return Err(DenoiseError::Cancelled),
            };

            match next {
                Err(_) => {
                    return Err(DenoiseError::Timeout {
                        sequence,
                        after: self.response_timeout,
                    });
                }
                Ok(None) => {
                    return Err(self.interrupted(format!(
                        "connection ended while waiting for chunk {}",
                        sequence
                    )));
                }
                Ok(Some(Err(e))) => {
                    return Err(self.interrupted(format!("WebSocket error: {}", e)));
                }
                Ok(Some(Ok(Message::Binary(data)))) => return Ok(data.to_vec()),
                Ok(Some(Ok(Message::Text(text)))) => {
                    return Err(self.interrupted(format!(
                        "expected binary audio for chunk {}, got text frame: {}",
                        sequence,
                        text.as_str()
                    )));
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    return Err(self.interrupted(format!("server closed connection: {:?}", frame)));
                }
                Ok(Some(Ok(_))) => {
                    log::trace!("Skipping control frame while waiting for chunk {}", sequence);
                }
            }
        }
    }

    fn interrupted(&self, reason: String) -> DenoiseError {
        DenoiseError::StreamInterrupted {
            reason,
            chunks_sent: self.chunks_sent,
            responses_received: self.responses_received,
        }
    }

    /// Best-effort close handshake
    async fn shutdown(&mut self) {
        match tokio::time::timeout(CLOSE_TIMEOUT, self.ws.close()).await {
            Ok(Ok(())) => log::debug!("WebSocket closed cleanly"),
            Ok(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                log::debug!("WebSocket was already closed")
            }
            Ok(Err(e)) => log::warn!("Failed to close WebSocket: {}", e),
            Err(_) => log::warn!("Timed out closing WebSocket"),
        }
    }
}

/// Connect to `endpoint` and stream `chunks` through it
pub async fn stream_chunks<C>(
    endpoint: &EndpointDescriptor,
    config: &StreamConfig,
    chunks: C,
    observer: &mut dyn LatencyObserver,
    cancel: &CancellationToken,
) -> Result<StreamedAudio>
where
    C: Stream<Item = Chunk> + Unpin,
{
    StreamingSession::connect(endpoint, config, cancel)
        .await?
        .run(chunks, observer, cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::LatencyRecorder;
    use futures_util::stream;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// In-memory socket that answers each binary frame from a script
    struct ScriptedSocket {
        replies: VecDeque<Vec<Message>>,
        pending: VecDeque<Message>,
        sent: Vec<Vec<u8>>,
        closed: bool,
    }

    impl ScriptedSocket {
        fn new(replies: Vec<Vec<Message>>) -> Self {
            Self {
                replies: replies.into(),
                pending: VecDeque::new(),
                sent: Vec::new(),
                closed: false,
            }
        }
    }

    impl Stream for ScriptedSocket {
        type Item = std::result::Result<Message, WsError>;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            match self.pending.pop_front() {
                Some(msg) => Poll::Ready(Some(Ok(msg))),
                None if self.replies.is_empty() => Poll::Ready(None),
                // Sent frame not answered yet: stay silent
                None => Poll::Pending,
            }
        }
    }

    impl Sink<Message> for ScriptedSocket {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(mut self: Pin<&mut Self>, item: Message) -> std::result::Result<(), WsError> {
            if let Message::Binary(data) = item {
                self.sent.push(data.to_vec());
                if let Some(reply) = self.replies.pop_front() {
                    self.pending.extend(reply);
                }
            }
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), WsError>> {
            self.closed = true;
            Poll::Ready(Ok(()))
        }
    }

    fn chunks(sizes: &[usize]) -> Vec<Chunk> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| Chunk {
                sequence: i,
                bytes: vec![i as u8; n],
            })
            .collect()
    }

    fn binary(data: Vec<u8>) -> Message {
        Message::Binary(data.into())
    }

    #[tokio::test]
    async fn test_responses_concatenate_in_order() {
        let socket = ScriptedSocket::new(vec![
            vec![binary(vec![10, 11])],
            vec![binary(vec![20])],
            vec![binary(vec![30, 31, 32])],
        ]);
        let session = StreamingSession::new(socket, Duration::from_secs(1));
        let mut recorder = LatencyRecorder::new();

        let out = session
            .run(
                stream::iter(chunks(&[4, 4, 2])),
                &mut recorder,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(out.data, vec![10, 11, 20, 30, 31, 32]);
        assert_eq!(out.chunks_sent, 3);
        assert_eq!(out.bytes_sent, 10);

        let sequences: Vec<usize> = recorder.samples().iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(recorder.samples()[1].bytes_received, 1);
    }

    #[tokio::test]
    async fn test_control_frames_are_skipped() {
        let socket = ScriptedSocket::new(vec![vec![
            Message::Ping(vec![1u8].into()),
            Message::Pong(Vec::<u8>::new().into()),
            binary(vec![7, 7]),
        ]]);
        let session = StreamingSession::new(socket, Duration::from_secs(1));

        let out = session
            .run(
                stream::iter(chunks(&[2])),
                &mut LatencyRecorder::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.data, vec![7, 7]);
    }

    #[tokio::test]
    async fn test_text_reply_interrupts_stream() {
        let socket = ScriptedSocket::new(vec![
            vec![binary(vec![1])],
            vec![Message::Text("oops".into())],
            vec![binary(vec![3])],
        ]);
        let session = StreamingSession::new(socket, Duration::from_secs(1));

        let err = session
            .run(
                stream::iter(chunks(&[2, 2, 2])),
                &mut LatencyRecorder::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            DenoiseError::StreamInterrupted {
                chunks_sent,
                responses_received,
                ..
            } => {
                assert_eq!(chunks_sent, 2);
                assert_eq!(responses_received, 1);
            }
            other => panic!("expected StreamInterrupted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_end_of_stream_interrupts() {
        // Only one scripted reply, so the socket ends after it
        let socket = ScriptedSocket::new(vec![vec![binary(vec![1])]]);
        let session = StreamingSession::new(socket, Duration::from_secs(1));

        let err = session
            .run(
                stream::iter(chunks(&[2, 2])),
                &mut LatencyRecorder::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_stream_interruption());
    }

    #[tokio::test]
    async fn test_silence_times_out() {
        let socket = ScriptedSocket::new(vec![vec![], vec![]]);
        let session = StreamingSession::new(socket, Duration::from_millis(20));

        let err = session
            .run(
                stream::iter(chunks(&[2, 2])),
                &mut LatencyRecorder::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DenoiseError::Timeout { sequence: 0, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let socket = ScriptedSocket::new(vec![vec![binary(vec![1])]]);
        let session = StreamingSession::new(socket, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = session
            .run(stream::iter(chunks(&[2])), &mut LatencyRecorder::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DenoiseError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_response() {
        let socket = ScriptedSocket::new(vec![vec![], vec![]]);
        let session = StreamingSession::new(socket, Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = session
            .run(stream::iter(chunks(&[2, 2])), &mut LatencyRecorder::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DenoiseError::Cancelled));
    }

    #[tokio::test]
    async fn test_out_of_order_chunk_is_rejected() {
        let socket = ScriptedSocket::new(vec![vec![binary(vec![1])], vec![binary(vec![2])]]);
        let session = StreamingSession::new(socket, Duration::from_secs(1));
        let mut out_of_order = chunks(&[2, 2, 2]);
        out_of_order.remove(1);

        let err = session
            .run(
                stream::iter(out_of_order),
                &mut LatencyRecorder::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            DenoiseError::StreamInterrupted {
                chunks_sent,
                responses_received,
                ..
            } => {
                assert_eq!(chunks_sent, 1);
                assert_eq!(responses_received, 1);
            }
            other => panic!("expected stream interruption, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_chunks_closes_cleanly() {
        let session = StreamingSession::new(ScriptedSocket::new(vec![]), Duration::from_secs(1));

        let out = session
            .run(
                stream::iter(Vec::<Chunk>::new()),
                &mut LatencyRecorder::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, StreamedAudio::default());
    }
}
