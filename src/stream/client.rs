//! Endpoint composition and byte-stream transport for household events.
//!
//! `StreamClient` knows where the event stream lives and how to authenticate
//! against it. Opening the connection is delegated to a [`Transport`], which
//! hands back a plain stream of byte chunks.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Client;
use secrecy::ExposeSecret;
use thiserror::Error;
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::stream::providers::TokenSupplier;

/// Production base URL for the events service.
pub const EVENTS_BASE_URL: &str = "https://api.roomies.app";
/// Local development base URL for the events service.
pub const LOCAL_EVENTS_BASE_URL: &str = "http://localhost:8080";
/// Media type requested from the events endpoint.
pub const EVENT_STREAM_MEDIA_TYPE: &str = "text/event-stream";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamDefaults;

impl StreamDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const BACKOFF_BASE: Duration = Duration::from_secs(3);
    pub const BACKOFF_MAX: Duration = Duration::from_secs(30);
}

#[derive(Clone, Debug)]
pub struct StreamClientOptions {
    /// Limit for establishing the TCP/TLS connection only. The response body
    /// is allowed to stay open indefinitely.
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for StreamClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: StreamDefaults::CONNECT_TIMEOUT,
            backoff: BackoffPolicy::new(StreamDefaults::BACKOFF_BASE, StreamDefaults::BACKOFF_MAX),
        }
    }
}

/// Errors produced by request composition and the stream transport.
#[derive(Debug, Error)]
pub enum StreamError {
    /// HTTP transport error, including non-success response status.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Endpoint could not be combined with the subscription path.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Bearer token could not be converted to a valid HTTP header value.
    #[error("invalid authorization header: {0}")]
    InvalidAuthorizationHeader(#[from] InvalidHeaderValue),

    /// Subscription identifier is unusable.
    #[error("invalid subscription id: {0}")]
    InvalidSubscription(String),

    /// Stream contract violated by the peer or transport.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Session worker is no longer running.
    #[error("stream session closed")]
    SessionClosed,
}

/// Fully composed request for one subscription.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

/// Chunked body of an open event stream.
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

/// Issues a request and yields the response body as byte chunks.
///
/// Implementations must not apply an overall deadline to the body: idle
/// periods between events are normal.
pub trait Transport: Send + Sync {
    fn open(&self, request: StreamRequest) -> BoxFuture<'static, Result<ByteStream, StreamError>>;
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new(options: &StreamClientOptions) -> Result<Self, StreamError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    fn open(&self, request: StreamRequest) -> BoxFuture<'static, Result<ByteStream, StreamError>> {
        let builder = self.http.get(request.url).headers(request.headers);
        Box::pin(async move {
            let response = builder.send().await?.error_for_status()?;
            Ok(response.bytes_stream().map_err(StreamError::Transport).boxed())
        })
    }
}

/// Entry point for composing and opening household event streams.
#[derive(Clone)]
pub struct StreamClient {
    transport: Arc<dyn Transport>,
    token_supplier: Option<Arc<dyn TokenSupplier>>,
    backoff: BackoffPolicy,
    local: bool,
    endpoint_override: Option<String>,
}

impl StreamClient {
    /// Creates a client for production mode using HTTP transport.
    pub fn new() -> Result<Self, StreamError> {
        Self::with_options(StreamClientOptions::default())
    }

    pub fn with_options(options: StreamClientOptions) -> Result<Self, StreamError> {
        let transport = HttpTransport::new(&options)?;
        Ok(Self::from_transport(transport).with_backoff(options.backoff))
    }

    /// Creates a client over a caller-provided transport.
    pub fn from_transport<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        Self {
            transport: Arc::new(transport),
            token_supplier: None,
            backoff: StreamClientOptions::default().backoff,
            local: false,
            endpoint_override: None,
        }
    }

    /// Enables or disables local mode endpoint routing.
    pub fn with_local_mode(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Sets an explicit base URL override.
    ///
    /// The override takes precedence over local mode when set.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint_override = Some(endpoint.trim_end().to_string());
        self
    }

    /// Sets the supplier consulted for a bearer token on every connect.
    pub fn with_token_supplier<S>(mut self, supplier: S) -> Self
    where
        S: TokenSupplier + 'static,
    {
        self.token_supplier = Some(Arc::new(supplier));
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Builds the request for `subscription_id`.
    ///
    /// The token supplier is invoked here, so each attempt sees the current
    /// credential.
    pub fn build_request(&self, subscription_id: &str) -> Result<StreamRequest, StreamError> {
        let subscription_id = subscription_id.trim();
        if subscription_id.is_empty() {
            return Err(StreamError::InvalidSubscription(
                "subscription id must not be empty".to_string(),
            ));
        }

        let mut url =
            Url::parse(self.endpoint()).map_err(|err| StreamError::InvalidEndpoint(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| {
                StreamError::InvalidEndpoint(format!("{} cannot carry a path", self.endpoint()))
            })?
            .pop_if_empty()
            .extend(["events", "household", subscription_id]);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM_MEDIA_TYPE));
        if let Some(token) = self
            .token_supplier
            .as_ref()
            .and_then(|supplier| supplier.bearer_token())
        {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(StreamRequest { url, headers })
    }

    pub(crate) fn open(
        &self,
        request: StreamRequest,
    ) -> BoxFuture<'static, Result<ByteStream, StreamError>> {
        self.transport.open(request)
    }

    fn endpoint(&self) -> &str {
        if let Some(endpoint) = self.endpoint_override.as_deref() {
            return endpoint;
        }
        if self.local {
            LOCAL_EVENTS_BASE_URL
        } else {
            EVENTS_BASE_URL
        }
    }
}
