//! Hub transports: the connection layer under a push channel.
//!
//! [`HubTransport`] opens one connection to one hub and yields the named
//! messages it receives. The push channel owns the startup/retry policy;
//! transports only report what happened. [`SseHubTransport`] speaks
//! server-sent events over `reqwest`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::error::PushError;
use crate::event::HubMessage;
use crate::transport::parse_base_url;

/// Stream of messages from one hub connection. Ends when the connection
/// closes; yields `Err` once on a transport failure.
pub type HubStream = Pin<Box<dyn Stream<Item = Result<HubMessage, PushError>> + Send>>;

/// Boxed future returned by [`HubTransport::connect`].
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<HubStream, PushError>> + Send + 'a>>;

/// Opens connections to a hub.
///
/// Implementations must return [`PushError::Unauthorized`] when the hub
/// rejects the credential with 401 so the channel can stop retrying.
pub trait HubTransport: Send + Sync {
    /// Connect to `hub` with `token`.
    fn connect<'a>(&'a self, hub: &'a str, token: &'a str) -> ConnectFuture<'a>;
}

/// Server-sent-events hub transport.
///
/// Issues `GET {base_url}{hub}` with `Accept: text/event-stream` and a
/// bearer `Authorization` header. Each SSE event becomes a [`HubMessage`]:
/// the `event:` field is the target and the `data:` lines are parsed as
/// JSON. Events without an `event:` field are read as
/// `{"target": .., "arguments": ..}`.
#[derive(Clone)]
pub struct SseHubTransport {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl fmt::Debug for SseHubTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseHubTransport")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

/// Buffered messages between the reader task and the channel loop.
const SSE_BUFFER: usize = 64;

impl SseHubTransport {
    /// Build a transport rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Transport`] if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, PushError> {
        let base_url = parse_base_url(base_url).map_err(|e| PushError::Transport(e.to_string()))?;
        // No overall timeout: the response body is the long-lived stream.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PushError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    async fn open(&self, hub: &str, token: &str) -> Result<HubStream, PushError> {
        let url = self
            .base_url
            .join(hub.trim_start_matches('/'))
            .map_err(|e| PushError::Transport(format!("bad hub path {hub}: {e}")))?;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PushError::Unauthorized);
        }
        if !status.is_success() {
            return Err(PushError::Transport(format!("hub answered {status}")));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(SSE_BUFFER);
        let hub = hub.to_owned();
        tokio::spawn(async move {
            let mut body = std::pin::pin!(response.bytes_stream());
            let mut decoder = SseDecoder::default();
            loop {
                // Keep-alives never reach `tx`, so watch for the receiver
                // going away directly; returning drops the HTTP connection.
                let chunk = tokio::select! {
                    chunk = body.next() => chunk,
                    () = tx.closed() => {
                        tracing::debug!(hub = %hub, "hub stream dropped, closing sse connection");
                        return;
                    }
                };
                let Some(chunk) = chunk else { break };
                match chunk {
                    Ok(bytes) => {
                        for message in decoder.feed(&bytes) {
                            if tx.send(Ok(message)).await.is_err() {
                                // Receiver dropped: the channel moved on.
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!(hub = %hub, error = %e, "sse body error");
                        let _ = tx.send(Err(PushError::Transport(e.to_string()))).await;
                        return;
                    }
                }
            }
            tracing::debug!(hub = %hub, "sse stream closed by server");
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

impl HubTransport for SseHubTransport {
    fn connect<'a>(&'a self, hub: &'a str, token: &'a str) -> ConnectFuture<'a> {
        Box::pin(self.open(hub, token))
    }
}

/// Longest SSE line the decoder buffers before discarding it.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    /// Dropping the rest of an overlong line, up to its newline.
    skipping: bool,
}

impl SseDecoder {
    /// Feed a chunk; return every message completed by it.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<HubMessage> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            if std::mem::take(&mut self.skipping) {
                continue;
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if let Some(message) = self.dispatch() {
                    out.push(message);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_owned()),
                "data" => self.data.push(value.to_owned()),
                _ => {}
            }
        }
        if self.buf.len() > MAX_LINE_BYTES {
            tracing::warn!(len = self.buf.len(), "sse line too long, discarding event");
            self.buf.clear();
            self.event = None;
            self.data.clear();
            self.skipping = true;
        }
        out
    }

    fn dispatch(&mut self) -> Option<HubMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        let value: Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping non-JSON sse event");
                return None;
            }
        };
        match event {
            Some(target) if target != "message" => Some(HubMessage::new(target, value)),
            _ => {
                let target = value.get("target")?.as_str()?.to_owned();
                let arguments = value.get("arguments").cloned().unwrap_or(Value::Null);
                Some(HubMessage::new(target, arguments))
            }
        }
    }
}

/// Scripted hub transport for unit tests.
#[cfg(test)]
pub(crate) mod test_fixtures {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    /// One scripted connection attempt.
    pub(crate) enum Attempt {
        Fail(PushError),
        /// Connect, deliver the messages, then end the stream.
        Deliver(Vec<Result<HubMessage, PushError>>),
        /// Connect and stay open with the given receiver.
        Open(tokio::sync::mpsc::Receiver<Result<HubMessage, PushError>>),
    }

    #[derive(Default)]
    pub(crate) struct ScriptedHub {
        attempts: Mutex<VecDeque<Attempt>>,
        by_hub: Mutex<HashMap<String, VecDeque<Attempt>>>,
        pub(crate) tokens: Mutex<Vec<String>>,
    }

    impl ScriptedHub {
        pub(crate) fn push(&self, attempt: Attempt) -> &Self {
            self.attempts.lock().unwrap().push_back(attempt);
            self
        }

        /// Script an attempt for one hub path only; checked before the
        /// shared script.
        pub(crate) fn push_for(&self, hub: &str, attempt: Attempt) -> &Self {
            self.by_hub
                .lock()
                .unwrap()
                .entry(hub.to_owned())
                .or_default()
                .push_back(attempt);
            self
        }

        pub(crate) fn attempts_made(&self) -> usize {
            self.tokens.lock().unwrap().len()
        }
    }

    impl HubTransport for ScriptedHub {
        fn connect<'a>(&'a self, hub: &'a str, token: &'a str) -> ConnectFuture<'a> {
            self.tokens.lock().unwrap().push(token.to_owned());
            let scripted = self
                .by_hub
                .lock()
                .unwrap()
                .get_mut(hub)
                .and_then(VecDeque::pop_front);
            let attempt = scripted
                .or_else(|| self.attempts.lock().unwrap().pop_front())
                .unwrap_or(Attempt::Fail(PushError::Transport("script exhausted".into())));
            Box::pin(async move {
                match attempt {
                    Attempt::Fail(e) => Err(e),
                    Attempt::Deliver(messages) => {
                        Ok(Box::pin(tokio_stream::iter(messages)) as HubStream)
                    }
                    Attempt::Open(rx) => Ok(Box::pin(ReceiverStream::new(rx)) as HubStream),
                }
            })
        }
    }
}
