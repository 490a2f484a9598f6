//! WebSocket client for load testing.
//!
//! Every exchange opens its own connection, sends one `{"message": ...}`
//! frame, waits for exactly one reply and tears the connection down again.
//! Failures never escape this module: they come back as a
//! [`Response::Failure`] with zero latency.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::loadtest::error::{ExchangeError, LoadTestError};
use crate::loadtest::prompt::Prompt;

/// Upper bound on the closing handshake after a reply was received.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outcome of one exchange, decided once at the client boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The reply parsed as a JSON object.
    Success(Map<String, Value>),
    /// No usable reply; see [`ExchangeError`] for the category.
    Failure(ExchangeError),
}

impl Response {
    /// Decode a raw reply frame. Anything but a JSON object is a protocol error.
    pub fn from_reply(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Self::Success(map),
            _ => Self::Failure(ExchangeError::Protocol {
                raw: raw.to_owned(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn error(&self) -> Option<&ExchangeError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(err) => Some(err),
        }
    }

    /// The `message` field of a successful reply.
    pub fn message(&self) -> Option<&str> {
        self.field_str("message")
    }

    /// The `intent` field of a successful reply.
    pub fn intent(&self) -> Option<&str> {
        self.field_str("intent")
    }

    fn field_str(&self, field: &str) -> Option<&str> {
        match self {
            Self::Success(map) => map.get(field).and_then(Value::as_str),
            Self::Failure(_) => None,
        }
    }

    /// The value metrics are scored against.
    ///
    /// Failures become a synthetic object `{"error": <category>, "message": <detail>}`
    /// (plus `"raw"` for protocol errors) so scorers only ever see objects.
    pub fn payload(&self) -> Value {
        match self {
            Self::Success(map) => Value::Object(map.clone()),
            Self::Failure(err) => {
                let mut payload = json!({
                    "error": err.error_category(),
                    "message": err.to_string(),
                });
                if let ExchangeError::Protocol { raw } = err {
                    payload["raw"] = Value::String(raw.clone());
                }
                payload
            }
        }
    }
}

/// One completed exchange: the prompt, its decoded response, and the
/// send-to-receive latency (zero when no round trip completed).
#[derive(Debug, Clone)]
pub struct ExchangeResult {
    pub prompt: Prompt,
    pub response: Response,
    pub latency: Duration,
}

impl ExchangeResult {
    pub fn success(prompt: Prompt, payload: Map<String, Value>, latency: Duration) -> Self {
        Self {
            prompt,
            response: Response::Success(payload),
            latency,
        }
    }

    pub fn failure(prompt: Prompt, err: ExchangeError) -> Self {
        Self {
            prompt,
            response: Response::Failure(err),
            latency: Duration::ZERO,
        }
    }

    pub fn latency_secs(&self) -> f64 {
        self.latency.as_secs_f64()
    }
}

/// Something that can perform an exchange for a prompt.
///
/// [`WsClient`] is the production implementation; the concurrency controller
/// only depends on this trait.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(&self, prompt: &Prompt) -> ExchangeResult;
}

/// WebSocket client configured for one endpoint. Cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct WsClient {
    url: String,
    origin: String,
    timeout: Duration,
}

impl WsClient {
    /// Creates a client, checking that a handshake request can be built for
    /// the URL and origin.
    pub fn new(
        url: impl Into<String>,
        origin: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LoadTestError> {
        let client = Self {
            url: url.into(),
            origin: origin.into(),
            timeout,
        };
        client.request().map_err(|err| LoadTestError::InvalidEndpoint {
            url: client.url.clone(),
            message: err.to_string(),
        })?;
        Ok(client)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn request(&self) -> Result<Request, ExchangeError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| ExchangeError::classify_ws(&err))?;
        let origin = HeaderValue::from_str(&self.origin).map_err(|err| ExchangeError::Transport {
            message: format!("invalid origin header: {err}"),
        })?;
        request.headers_mut().insert(ORIGIN, origin);
        Ok(request)
    }

    /// Connect, send one frame, await one reply.
    ///
    /// The whole round trip runs under the per-exchange timeout; dropping the
    /// future on expiry drops the stream and closes the socket.
    pub async fn send_recv(&self, prompt: &Prompt) -> ExchangeResult {
        match tokio::time::timeout(self.timeout, self.round_trip(&prompt.question)).await {
            Ok(Ok((raw, latency))) => ExchangeResult {
                prompt: prompt.clone(),
                response: Response::from_reply(&raw),
                latency,
            },
            Ok(Err(err)) => ExchangeResult::failure(prompt.clone(), err),
            Err(_) => ExchangeResult::failure(
                prompt.clone(),
                ExchangeError::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                },
            ),
        }
    }

    async fn round_trip(&self, question: &str) -> Result<(String, Duration), ExchangeError> {
        let request = self.request()?;
        let (mut ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|err| ExchangeError::classify_ws(&err))?;

        let payload = json!({ "message": question }).to_string();
        let start = Instant::now();
        ws.send(Message::text(payload))
            .await
            .map_err(|err| ExchangeError::classify_ws(&err))?;
        let reply = next_reply(&mut ws).await;
        let latency = start.elapsed();

        let _ = tokio::time::timeout(CLOSE_GRACE, ws.close(None)).await;
        reply.map(|raw| (raw, latency))
    }
}

#[async_trait]
impl Exchange for WsClient {
    async fn exchange(&self, prompt: &Prompt) -> ExchangeResult {
        self.send_recv(prompt).await
    }
}

/// Wait for the first data frame, skipping control frames.
async fn next_reply(ws: &mut WsStream) -> Result<String, ExchangeError> {
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => return Ok(text.as_str().to_owned()),
            Ok(Message::Binary(bytes)) => return Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Ok(Message::Close(_)) => {
                return Err(ExchangeError::Transport {
                    message: "connection closed before reply".to_string(),
                })
            }
            Ok(_) => continue,
            Err(err) => return Err(ExchangeError::classify_ws(&err)),
        }
    }
    Err(ExchangeError::Transport {
        message: "stream ended before reply".to_string(),
    })
}
