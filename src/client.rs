//! Typed REST client for entity endpoints.
//!
//! Provides ergonomic async methods ([`ApiClient::list`], [`ApiClient::create`],
//! [`ApiClient::update`], [`ApiClient::delete`]) that accept and return
//! Rust-native types so that stores never touch raw responses. Every call
//! goes through the same status and envelope checks: a `success: false`
//! envelope is an error for every operation, not just the ones that
//! remember to look.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::auth::BearerAuth;
use crate::envelope::{Envelope, decode_envelope, decode_page};
use crate::error::StoreError;
use crate::pagination::{Page, PageQuery};
use crate::record::Record;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Method, RestTransport};

/// Verb used for partial updates of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMethod {
    /// `PUT /{entity}/{id}`.
    #[default]
    Put,
    /// `PATCH /{entity}/{id}`.
    Patch,
}

impl From<UpdateMethod> for Method {
    fn from(value: UpdateMethod) -> Self {
        match value {
            UpdateMethod::Put => Method::Put,
            UpdateMethod::Patch => Method::Patch,
        }
    }
}

/// Typed client for the console's REST API.
///
/// Wraps a [`RestTransport`]. `Clone` is cheap because the transport is
/// held in an [`Arc`].
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), hrm_client::StoreError> {
/// use std::time::Duration;
/// use hrm_client::{ApiClient, BearerAuth, PageQuery};
///
/// let client = ApiClient::connect(
///     "https://hr.example.com/api",
///     BearerAuth::default(),
///     Duration::from_secs(30),
/// )?;
/// let page = client.list("contracts", &PageQuery::first(10)).await?;
/// println!("{} of {}", page.items.len(), page.meta.total);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn RestTransport>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient").finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Build a client that talks HTTP to `base_url`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root (e.g. `"https://hr.example.com/api"`).
    /// * `auth` - Bearer token read on every request.
    /// * `timeout` - Per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transport`] if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn connect(base_url: &str, auth: BearerAuth, timeout: Duration) -> Result<Self, StoreError> {
        let transport = HttpTransport::new(base_url, auth, timeout)?;
        Ok(Self::with_transport(Arc::new(transport)))
    }

    /// Build a client over any transport.
    pub fn with_transport(transport: Arc<dyn RestTransport>) -> Self {
        Self { transport }
    }

    /// `GET /{path}?current=&pageSize=&q=...` and decode the page.
    ///
    /// # Errors
    ///
    /// Returns any [`StoreError`]; see [`decode_page`] for shape errors.
    pub async fn list(&self, path: &str, query: &PageQuery) -> Result<Page, StoreError> {
        let request = ApiRequest::new(Method::Get, path).with_query(query.to_pairs());
        let response = self.send(request).await?;
        decode_page(response.status, response.body)
    }

    /// `POST /{path}` and return the created record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Rejected`] if the envelope reports failure, or
    /// [`StoreError::Envelope`] if no record came back.
    pub async fn create(&self, path: &str, payload: Value) -> Result<Record, StoreError> {
        let request = ApiRequest::new(Method::Post, path).with_body(payload);
        self.send_checked(request).await?.into_record()
    }

    /// `PUT|PATCH /{path}/{id}` and return the record the server echoed.
    ///
    /// Returns `Ok(None)` when the server confirmed success without
    /// returning a record body.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Rejected`] if the envelope reports failure.
    pub async fn update(
        &self,
        path: &str,
        id: &str,
        method: UpdateMethod,
        partial: Value,
    ) -> Result<Option<Record>, StoreError> {
        let request = ApiRequest::new(method.into(), item_path(path, id)).with_body(partial);
        self.send_checked(request).await?.into_partial_record(id)
    }

    /// `DELETE /{path}/{id}`.
    ///
    /// Returns only when the envelope reports success.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Rejected`] if the envelope reports failure.
    pub async fn delete(&self, path: &str, id: &str) -> Result<Envelope, StoreError> {
        let request = ApiRequest::new(Method::Delete, item_path(path, id));
        self.send_checked(request).await
    }

    /// Send, check the HTTP status, decode, and require envelope success.
    async fn send_checked(&self, request: ApiRequest) -> Result<Envelope, StoreError> {
        let response = self.send(request).await?;
        decode_envelope(response.status, response.body).ensure_success()
    }

    /// Send and map HTTP-level failures.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, StoreError> {
        let method = request.method;
        let path = request.path.clone();
        let response = self.transport.send(request).await.inspect_err(|e| {
            tracing::warn!(%method, %path, error = %e, "request failed");
        })?;
        check_status(response).inspect_err(|e| {
            tracing::warn!(%method, %path, error = %e, "request returned an error status");
        })
    }
}

fn item_path(path: &str, id: &str) -> String {
    format!("{}/{id}", path.trim_end_matches('/'))
}

/// Map 401 and other error statuses to typed errors; pass 2xx/3xx through.
fn check_status(response: ApiResponse) -> Result<ApiResponse, StoreError> {
    match response.status {
        401 => Err(StoreError::Unauthorized),
        status if status >= 400 => {
            let envelope = decode_envelope(status, response.body);
            let message = if envelope.message.is_empty() {
                format!("request failed with status {status}")
            } else {
                envelope.message
            };
            Err(StoreError::Http { status, message })
        }
        _ => Ok(response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_fixtures::ScriptedTransport;
    use serde_json::json;

    fn client_with(transport: Arc<ScriptedTransport>) -> ApiClient {
        ApiClient::with_transport(transport)
    }

    #[tokio::test]
    async fn list_sends_paging_params() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply(
            200,
            json!({"data": [{"result": [], "meta": {"current": 2, "pageSize": 5, "total": 7, "pages": 2}}]}),
        );
        let client = client_with(transport.clone());
        let query = PageQuery::new(2, 5).unwrap().with_search("ana");
        let page = client.list("employees", &query).await.unwrap();
        assert_eq!(page.meta.current, 2);

        let sent = transport.sent();
        assert_eq!(sent[0].method, Method::Get);
        assert_eq!(sent[0].path, "employees");
        assert!(sent[0].query.contains(&("q".into(), "ana".into())));
    }

    #[tokio::test]
    async fn update_uses_item_path_and_verb() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply(200, json!({"success": true, "data": {"status": 2}}));
        let client = client_with(transport.clone());
        let record = client
            .update("contracts/", "c1", UpdateMethod::Patch, json!({"status": 2}))
            .await
            .unwrap()
            .expect("record");
        assert_eq!(record.id(), "c1");
        let sent = transport.sent();
        assert_eq!(sent[0].method, Method::Patch);
        assert_eq!(sent[0].path, "contracts/c1");
    }

    #[tokio::test]
    async fn unauthorized_status_maps_to_unauthorized() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply(401, Value::Null);
        let err = client_with(transport)
            .create("overtime", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized));
    }

    #[tokio::test]
    async fn error_status_carries_envelope_message() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply(
            409,
            json!({"statusCode": 409, "success": false, "message": "duplicate code"}),
        );
        let err = client_with(transport)
            .create("contracts", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Http { status: 409, ref message } if message == "duplicate code"));
    }

    #[tokio::test]
    async fn delete_rejected_envelope_is_error() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reply(200, json!({"statusCode": 200, "success": false, "message": "in use"}));
        let err = client_with(transport)
            .delete("shift-templates", "s1")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
    }

    #[tokio::test]
    async fn transport_failure_is_propagated() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.fail(StoreError::Transport("connection refused".into()));
        let err = client_with(transport)
            .list("employees", &PageQuery::first(10))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn update_method_maps_to_http_verb() {
        assert_eq!(Method::from(UpdateMethod::Put), Method::Put);
        assert_eq!(Method::from(UpdateMethod::Patch), Method::Patch);
    }
}
