use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use futures::stream::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::sse::{Frame, process_sse};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The frames of one open stream connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Everything needed to open one stream connection.
#[derive(Clone, Debug)]
pub struct OpenRequest {
    /// Bearer credential for this attempt.
    pub token: String,
    /// ID of the last event seen, sent back as `Last-Event-ID` on a transport retry.
    pub last_event_id: Option<String>,
    /// Abort handle for this connection; cancelled when the connection is replaced or torn down.
    pub cancel: CancellationToken,
}

impl OpenRequest {
    /// Creates a request for a fresh connection.
    pub fn new(token: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            token: token.into(),
            last_event_id: None,
            cancel,
        }
    }
}

/// Opens authenticated event streams.
///
/// `open` resolves once the server has answered.  A success status yields the frame stream; a
/// non-success status is reported as the matching [`Error`] (403 as [`Error::Permission`]), and
/// an unreachable endpoint as [`Error::Connection`] or [`Error::Timeout`].
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a stream with the credential in `request`.
    async fn open(&self, request: &OpenRequest) -> Result<FrameStream>;
}

/// [`Transport`] that speaks SSE over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
    endpoint: Url,
    connect_timeout: Option<Duration>,
}

impl HttpTransport {
    /// Create a transport for `endpoint` with the default connect timeout.
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_options(endpoint, Some(DEFAULT_CONNECT_TIMEOUT))
    }

    /// Create a transport with a custom connect timeout.  `None` waits indefinitely.
    ///
    /// Only connection establishment is bounded; an open stream may stay idle indefinitely.
    pub fn with_options(endpoint: &str, connect_timeout: Option<Duration>) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        let mut builder = ReqwestClient::builder();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            endpoint,
            connect_timeout,
        })
    }

    /// The endpoint streams are opened against.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The connect timeout, or `None` when connecting is unbounded.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    fn headers(&self, request: &OpenRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", request.token)).map_err(|_| {
            Error::validation(
                "token contains characters not allowed in a header",
                Some("token".to_string()),
            )
        })?;
        headers.insert(header::AUTHORIZATION, bearer);
        if let Some(id) = &request.last_event_id {
            let id = HeaderValue::from_str(id).map_err(|_| {
                Error::validation(
                    "last event id is not a valid header value",
                    Some("last-event-id".to_string()),
                )
            })?;
            headers.insert("last-event-id", id);
        }
        Ok(headers)
    }

    /// Process a non-success response and convert it to our Error type.
    ///
    /// The status decides the variant; a body that cannot be read only loses the message.
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        let message = match response.text().await {
            Ok(body) if !body.trim().is_empty() => body.trim().to_string(),
            Ok(_) => format!("HTTP {status_code}"),
            Err(e) => {
                tracing::debug!(status_code, err = %e, "could not read error response body");
                format!("HTTP {status_code}")
            }
        };

        match status_code {
            401 => Error::authentication(message),
            403 => Error::permission(message),
            _ => Error::api(status_code, message).with_retry_after(retry_after),
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &OpenRequest) -> Result<FrameStream> {
        let headers = self.headers(request)?;

        let send = self.client.get(self.endpoint.clone()).headers(headers).send();
        let sent = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => {
                return Err(Error::abort("connection cancelled before the endpoint answered"));
            }
            sent = send => sent,
        };
        let response = sent.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(format!("Request timed out: {e}"), self.connect_timeout)
            } else if e.is_builder() {
                Error::http_client(format!("Invalid request: {e}"), Some(Box::new(e)))
            } else {
                Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
            }
        })?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }

        let frames = process_sse(response.bytes_stream())
            .take_until(request.cancel.clone().cancelled_owned());
        Ok(Box::pin(frames))
    }
}
