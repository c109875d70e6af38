//! REST transport seam.
//!
//! [`RestTransport`] is the only place a request leaves the process. The
//! production implementation is [`HttpTransport`] (reqwest); tests script
//! responses through their own implementations.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;

use crate::auth::BearerAuth;
use crate::error::StoreError;

/// HTTP verb of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A request relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP verb.
    pub method: Method,
    /// Path relative to the base URL, without a leading slash
    /// (e.g. `"contracts/c1"`).
    pub path: String,
    /// Query-string pairs.
    pub query: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl ApiRequest {
    /// A request with no query and no body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Attach query pairs.
    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Raw HTTP outcome: status plus parsed body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body; `Value::Null` for an empty body, `Value::String`
    /// for a body that is not JSON.
    pub body: Value,
}

/// Boxed future returned by [`RestTransport::send`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ApiResponse, StoreError>> + Send + 'a>>;

/// Sends one [`ApiRequest`] and returns the raw response.
///
/// Implementations return `Err` only when no HTTP response was obtained;
/// any status code, including errors, comes back as `Ok(ApiResponse)`.
pub trait RestTransport: Send + Sync {
    /// Send the request.
    fn send(&self, request: ApiRequest) -> TransportFuture<'_>;
}

/// [`RestTransport`] over `reqwest` with bearer authentication.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: reqwest::Url,
    auth: BearerAuth,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl HttpTransport {
    /// Build a transport for `base_url`.
    ///
    /// A trailing slash is added to `base_url` when missing so that request
    /// paths join underneath it instead of replacing its last segment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transport`] if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str, auth: BearerAuth, timeout: Duration) -> Result<Self, StoreError> {
        let base_url = parse_base_url(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, StoreError> {
        let url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| StoreError::Transport(format!("bad request path {}: {e}", request.path)))?;

        let request_id = uuid::Uuid::new_v4();
        let mut builder = self
            .client
            .request(request.method.as_reqwest(), url)
            .header("X-Request-Id", request_id.to_string());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(header) = self.auth.header_value() {
            builder = builder.header(reqwest::header::AUTHORIZATION, header);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(
            method = %request.method,
            path = %request.path,
            %request_id,
            "sending request"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Transport(format!("failed to read response body: {e}")))?;
        Ok(ApiResponse {
            status,
            body: parse_body(&text),
        })
    }
}

impl RestTransport for HttpTransport {
    fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
        Box::pin(self.execute(request))
    }
}

pub(crate) fn parse_base_url(base_url: &str) -> Result<reqwest::Url, StoreError> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_owned()
    } else {
        format!("{base_url}/")
    };
    reqwest::Url::parse(&normalized)
        .map_err(|e| StoreError::Transport(format!("invalid base url {base_url}: {e}")))
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}
