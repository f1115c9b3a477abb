//! Single-attempt WebSocket client for the primary backend.
//!
//! One attempt walks `Connecting → Sending → Receiving` and ends in `Done`,
//! `Error` (the backend refused) or `TimedOut`/transport failure. Every await
//! carries its own deadline: the connect is bounded by `connection_timeout`,
//! the send and each receive by `chunk_timeout`. The socket is closed on
//! every exit path.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::types::{Control, ControlFrame, RequestFrame};
use super::{Artifact, SpeechProvider, SynthesisRequest};
use crate::error::{AttemptError, TransportError};

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// `ws://` or `wss://` URL. Unset means the primary is unavailable.
    pub endpoint: Option<String>,
    pub connection_timeout: Duration,
    pub chunk_timeout: Duration,
    pub sample_rate: u32,
    pub default_voice: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            connection_timeout: Duration::from_secs(10),
            chunk_timeout: Duration::from_secs(30),
            sample_rate: 24_000,
            default_voice: "default".to_string(),
        }
    }
}

/// Where an attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Sending,
    Receiving,
    Done,
    Error,
    TimedOut,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Connecting => "CONNECTING",
            Phase::Sending => "SENDING",
            Phase::Receiving => "RECEIVING",
            Phase::Done => "DONE",
            Phase::Error => "ERROR",
            Phase::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// One inbound frame, reduced to what the exchange cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
    Closed,
}

/// A connected, bidirectional frame transport.
pub trait FrameChannel: Send {
    fn send_text(&mut self, text: String)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    fn recv(&mut self) -> impl Future<Output = Result<Frame, TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Tracks one attempt from `Connecting` to its terminal phase and drives the
/// request/response exchange once a channel is open.
///
/// [`Exchange::run`] returns the concatenated PCM payload and leaves the
/// channel open. A failed connect is recorded with [`Exchange::abort`].
pub struct Exchange {
    provider: String,
    chunk_timeout: Duration,
    phase: Phase,
    chunks: Vec<Vec<u8>>,
}

impl Exchange {
    pub fn new(provider: &str, chunk_timeout: Duration) -> Self {
        Self {
            provider: provider.to_string(),
            chunk_timeout,
            phase: Phase::Connecting,
            chunks: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn transition(&mut self, next: Phase) {
        debug!(provider = %self.provider, from = %self.phase, to = %next, "stream phase");
        self.phase = next;
    }

    /// Ends an attempt whose channel never opened.
    pub fn abort(&mut self, err: TransportError) -> AttemptError {
        let err = AttemptError::from(err);
        self.fail(&err);
        err
    }

    fn fail(&mut self, err: &AttemptError) {
        match err {
            AttemptError::Rejected { .. } => self.transition(Phase::Error),
            AttemptError::Transport(
                TransportError::IdleTimeout(_) | TransportError::ConnectTimeout(_),
            ) => self.transition(Phase::TimedOut),
            AttemptError::Transport(_) => self.transition(Phase::Error),
        }
    }

    pub async fn run<C: FrameChannel>(
        &mut self,
        channel: &mut C,
        request: &RequestFrame,
    ) -> Result<Vec<u8>, AttemptError> {
        self.transition(Phase::Sending);
        let result = self.drive(channel, request).await;
        match &result {
            Ok(_) => self.transition(Phase::Done),
            Err(err) => self.fail(err),
        }
        result
    }

    async fn drive<C: FrameChannel>(
        &mut self,
        channel: &mut C,
        request: &RequestFrame,
    ) -> Result<Vec<u8>, AttemptError> {
        let body = serde_json::to_string(request)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        timeout(self.chunk_timeout, channel.send_text(body))
            .await
            .map_err(|_| TransportError::IdleTimeout(self.chunk_timeout))??;
        info!(provider = %self.provider, chars = request.text.chars().count(), "sent synthesis request");

        self.transition(Phase::Receiving);
        loop {
            let frame = timeout(self.chunk_timeout, channel.recv())
                .await
                .map_err(|_| TransportError::IdleTimeout(self.chunk_timeout))??;

            match frame {
                Frame::Binary(chunk) => {
                    debug!(provider = %self.provider, bytes = chunk.len(), "received audio chunk");
                    self.chunks.push(chunk);
                }
                Frame::Text(text) => {
                    let control = ControlFrame::parse(&text)
                        .map_err(|e| TransportError::Protocol(e.to_string()))?;
                    match control.classify() {
                        Control::Completed => break,
                        Control::Error(message) => {
                            warn!(provider = %self.provider, %message, "backend reported an error");
                            return Err(AttemptError::rejected(&self.provider, message));
                        }
                        Control::Progress => {
                            debug!(provider = %self.provider, status = ?control.status, "status update");
                        }
                    }
                }
                Frame::Closed => return Err(TransportError::Closed.into()),
            }
        }

        let pcm = self.chunks.concat();
        if pcm.is_empty() {
            return Err(AttemptError::rejected(&self.provider, "no audio received"));
        }
        info!(provider = %self.provider, bytes = pcm.len(), chunks = self.chunks.len(), "audio generation completed");
        Ok(pcm)
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsChannel {
    socket: Socket,
    close_timeout: Duration,
}

impl FrameChannel for WsChannel {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Stream(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Frame, TransportError> {
        loop {
            match self.socket.next().await {
                None => return Ok(Frame::Closed),
                Some(Ok(Message::Binary(bytes))) => return Ok(Frame::Binary(bytes)),
                Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text)),
                Some(Ok(Message::Close(_))) => return Ok(Frame::Closed),
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Stream(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if timeout(self.close_timeout, self.socket.close(None))
            .await
            .is_err()
        {
            debug!("websocket close handshake timed out");
        }
    }
}

/// Makes `ring` the process-wide TLS crypto provider for `wss://` endpoints.
fn install_crypto_provider() {
    // Errs only when some provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// The primary provider: a streaming WebSocket backend.
pub struct StreamingProvider {
    name: String,
    config: StreamingConfig,
}

impl StreamingProvider {
    pub fn new(config: StreamingConfig) -> Self {
        install_crypto_provider();
        if config.endpoint.is_none() {
            warn!("primary endpoint not configured, every attempt will fail over");
        }
        Self {
            name: "primary".to_string(),
            config,
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    async fn connect(&self, endpoint: &str) -> Result<WsChannel, TransportError> {
        debug!(provider = %self.name, endpoint, "connecting");
        let (socket, _response) = timeout(self.config.connection_timeout, connect_async(endpoint))
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.config.connection_timeout))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(WsChannel {
            socket,
            close_timeout: self.config.chunk_timeout,
        })
    }
}

impl SpeechProvider for StreamingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Artifact, AttemptError> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or_else(|| AttemptError::rejected(&self.name, "endpoint not configured"))?;

        let voice = request
            .voice
            .voice_id
            .as_deref()
            .unwrap_or(&self.config.default_voice);
        let frame =
            RequestFrame::synthesize(&request.text, voice, self.config.sample_rate, &request.voice);

        let mut exchange = Exchange::new(&self.name, self.config.chunk_timeout);
        let mut channel = match self.connect(endpoint).await {
            Ok(channel) => channel,
            Err(err) => return Err(exchange.abort(err)),
        };
        let outcome = exchange.run(&mut channel, &frame).await;
        channel.close().await;

        let pcm = outcome?;
        Ok(Artifact::from_pcm(&pcm, request.format, self.config.sample_rate))
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "status": if self.config.endpoint.is_some() { "configured" } else { "not_configured" },
            "endpoint": self.config.endpoint.as_deref().unwrap_or("not_set"),
            "connection_timeout_secs": self.config.connection_timeout.as_secs_f64(),
            "chunk_timeout_secs": self.config.chunk_timeout.as_secs_f64(),
            "sample_rate": self.config.sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::net::TcpListener;

    use super::*;
    use crate::provider::{AudioFormat, VoiceParams, wav};

    /// Replays a fixed script of inbound frames. `None` stalls forever.
    struct ScriptedChannel {
        inbound: VecDeque<Option<Frame>>,
        sent: Vec<String>,
    }

    impl ScriptedChannel {
        fn new(frames: Vec<Option<Frame>>) -> Self {
            Self {
                inbound: frames.into(),
                sent: Vec::new(),
            }
        }
    }

    impl FrameChannel for ScriptedChannel {
        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            self.sent.push(text);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Frame, TransportError> {
            match self.inbound.pop_front() {
                Some(Some(frame)) => Ok(frame),
                Some(None) => std::future::pending::<Result<Frame, TransportError>>().await,
                None => Ok(Frame::Closed),
            }
        }

        async fn close(&mut self) {}
    }

    fn text(s: &str) -> Option<Frame> {
        Some(Frame::Text(s.to_string()))
    }

    fn binary(bytes: &[u8]) -> Option<Frame> {
        Some(Frame::Binary(bytes.to_vec()))
    }

    fn request() -> RequestFrame {
        RequestFrame::synthesize("Hello world", "default", 24_000, &VoiceParams::default())
    }

    #[tokio::test]
    async fn exchange_accumulates_chunks_in_order() {
        let mut channel = ScriptedChannel::new(vec![
            binary(&[1, 2]),
            text(r#"{"status":"generating"}"#),
            binary(&[3, 4]),
            text(r#"{"status":"completed"}"#),
        ]);
        let mut exchange = Exchange::new("primary", Duration::from_secs(1));

        let pcm = exchange.run(&mut channel, &request()).await.unwrap();
        assert_eq!(pcm, vec![1, 2, 3, 4]);
        assert_eq!(exchange.phase(), Phase::Done);

        let sent: serde_json::Value = serde_json::from_str(&channel.sent[0]).unwrap();
        assert_eq!(sent["text"], "Hello world");
    }

    #[tokio::test]
    async fn error_frame_is_a_rejection() {
        let mut channel = ScriptedChannel::new(vec![
            binary(&[1, 2]),
            text(r#"{"status":"error","message":"overloaded"}"#),
        ]);
        let mut exchange = Exchange::new("primary", Duration::from_secs(1));

        let err = exchange.run(&mut channel, &request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("overloaded"));
        assert_eq!(exchange.phase(), Phase::Error);
    }

    #[tokio::test]
    async fn idle_stream_times_out() {
        let mut channel = ScriptedChannel::new(vec![binary(&[1, 2]), None]);
        let mut exchange = Exchange::new("primary", Duration::from_millis(50));

        let err = exchange.run(&mut channel, &request()).await.unwrap_err();
        assert!(matches!(
            err,
            AttemptError::Transport(TransportError::IdleTimeout(_))
        ));
        assert!(err.is_retryable());
        assert_eq!(exchange.phase(), Phase::TimedOut);
    }

    #[tokio::test]
    async fn early_close_is_a_transport_error() {
        let mut channel = ScriptedChannel::new(vec![binary(&[1, 2]), Some(Frame::Closed)]);
        let mut exchange = Exchange::new("primary", Duration::from_secs(1));

        let err = exchange.run(&mut channel, &request()).await.unwrap_err();
        assert!(matches!(err, AttemptError::Transport(TransportError::Closed)));
    }

    #[tokio::test]
    async fn completed_without_audio_is_rejected() {
        let mut channel = ScriptedChannel::new(vec![text(r#"{"status":"completed"}"#)]);
        let mut exchange = Exchange::new("primary", Duration::from_secs(1));

        let err = exchange.run(&mut channel, &request()).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn structured_status_frames_do_not_abort() {
        let mut channel = ScriptedChannel::new(vec![
            binary(&[1, 2]),
            text(r#"{"status":"generating","message":{"percent":50}}"#),
            text(r#"{"progress":[0.5]}"#),
            text(r#"{"status":"completed"}"#),
        ]);
        let mut exchange = Exchange::new("primary", Duration::from_secs(1));

        let pcm = exchange.run(&mut channel, &request()).await.unwrap();
        assert_eq!(pcm, vec![1, 2]);
        assert_eq!(exchange.phase(), Phase::Done);
    }

    #[test]
    fn exchange_starts_connecting_and_records_connect_failures() {
        let mut exchange = Exchange::new("primary", Duration::from_secs(1));
        assert_eq!(exchange.phase(), Phase::Connecting);
        let err = exchange.abort(TransportError::ConnectTimeout(Duration::from_secs(1)));
        assert!(err.is_retryable());
        assert_eq!(exchange.phase(), Phase::TimedOut);

        let mut exchange = Exchange::new("primary", Duration::from_secs(1));
        exchange.abort(TransportError::Connect("refused".into()));
        assert_eq!(exchange.phase(), Phase::Error);
    }

    #[tokio::test]
    async fn malformed_text_frame_is_a_protocol_error() {
        let mut channel = ScriptedChannel::new(vec![text("not json")]);
        let mut exchange = Exchange::new("primary", Duration::from_secs(1));

        let err = exchange.run(&mut channel, &request()).await.unwrap_err();
        assert!(matches!(
            err,
            AttemptError::Transport(TransportError::Protocol(_))
        ));
    }

    async fn serve_once(frames: Vec<Message>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _request = ws.next().await;
            for frame in frames {
                ws.send(frame).await.unwrap();
            }
            // Drain until the client closes.
            while let Some(Ok(_)) = ws.next().await {}
        });
        format!("ws://{addr}")
    }

    fn provider(endpoint: Option<String>) -> StreamingProvider {
        StreamingProvider::new(StreamingConfig {
            endpoint,
            connection_timeout: Duration::from_secs(2),
            chunk_timeout: Duration::from_millis(500),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn websocket_round_trip_produces_wav() {
        let endpoint = serve_once(vec![
            Message::Binary(vec![0, 1, 2, 3]),
            Message::Text(r#"{"status":"generating"}"#.into()),
            Message::Binary(vec![4, 5]),
            Message::Text(r#"{"status":"completed"}"#.into()),
        ])
        .await;

        let artifact = provider(Some(endpoint))
            .synthesize(&SynthesisRequest::new("Hello world"))
            .await
            .unwrap();

        assert_eq!(artifact.format, AudioFormat::Wav);
        assert_eq!(artifact.sample_rate, 24_000);
        assert_eq!(artifact.len(), wav::HEADER_LEN + 6);
        assert_eq!(&artifact.data[wav::HEADER_LEN..], &[0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn websocket_idle_server_times_out() {
        let endpoint = serve_once(vec![Message::Binary(vec![0, 1])]).await;

        let err = provider(Some(endpoint))
            .synthesize(&SynthesisRequest::new("Hello world"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AttemptError::Transport(TransportError::IdleTimeout(_))
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = provider(Some(format!("ws://{addr}")))
            .synthesize(&SynthesisRequest::new("Hello world"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn tls_handshake_failure_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Plain TCP peer: answers the TLS hello with garbage and hangs up.
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = tokio::io::AsyncWriteExt::write_all(&mut stream, b"HTTP/1.1 400 nope\r\n\r\n").await;
        });

        let err = tokio::spawn(async move {
            provider(Some(format!("wss://{addr}")))
                .synthesize(&SynthesisRequest::new("Hello world"))
                .await
        })
        .await
        .expect("synthesize must not panic")
        .unwrap_err();

        assert!(matches!(err, AttemptError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_endpoint_is_rejected() {
        let err = provider(None)
            .synthesize(&SynthesisRequest::new("Hello world"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
