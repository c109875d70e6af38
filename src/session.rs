//! Forced logout.
//!
//! When the auth hub announces that the user's credentials changed, every
//! piece of session state is torn down and the UI is sent to the sign-in
//! route. Each teardown step runs even if an earlier one failed, and the
//! redirect is published no matter what.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::credentials::CredentialStore;
use crate::error::PushError;
use crate::live::PushChannel;
use crate::registry::StoreRegistry;

/// Route published after a forced logout unless overridden.
pub const DEFAULT_REDIRECT: &str = "/login";

/// Auth hub events that trigger a forced logout.
pub const LOGOUT_EVENTS: [&str; 2] = ["ForceLogout", "CredentialsChanged"];

/// One teardown step of [`SessionGuard::force_logout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutStep {
    StopChannels,
    ClearStores,
    ClearCredentials,
}

impl fmt::Display for LogoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StopChannels => "stop push channels",
            Self::ClearStores => "clear stores",
            Self::ClearCredentials => "clear credentials",
        };
        f.write_str(name)
    }
}

/// Outcome of a forced logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutReport {
    /// The route that was published.
    pub redirect: String,
    /// Steps that failed, in execution order.
    pub failed: Vec<LogoutStep>,
}

impl LogoutReport {
    /// `true` if every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Tears down the session on forced logout.
pub struct SessionGuard {
    registry: Arc<StoreRegistry>,
    credentials: Arc<CredentialStore>,
    channels: Vec<PushChannel>,
    redirect: String,
    redirect_tx: watch::Sender<Option<String>>,
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("channels", &self.channels.len())
            .field("redirect", &self.redirect)
            .finish_non_exhaustive()
    }
}

impl SessionGuard {
    /// Create a guard over the given session state.
    ///
    /// # Arguments
    ///
    /// * `registry` - Stores to clear.
    /// * `credentials` - Persisted sign-in state to wipe.
    /// * `channels` - Push channels to stop, including the auth hub's own.
    pub fn new(
        registry: Arc<StoreRegistry>,
        credentials: Arc<CredentialStore>,
        channels: Vec<PushChannel>,
    ) -> Self {
        let (redirect_tx, _) = watch::channel(None);
        Self {
            registry,
            credentials,
            channels,
            redirect: DEFAULT_REDIRECT.to_owned(),
            redirect_tx,
        }
    }

    /// Publish `redirect` instead of [`DEFAULT_REDIRECT`].
    pub fn with_redirect(mut self, redirect: impl Into<String>) -> Self {
        self.redirect = redirect.into();
        self
    }

    /// Watch for published redirects. The value is `None` until the first
    /// forced logout.
    pub fn watch_redirect(&self) -> watch::Receiver<Option<String>> {
        self.redirect_tx.subscribe()
    }

    /// Stop every channel, clear every store, clear the credentials, then
    /// publish the redirect.
    ///
    /// Steps are independent: a failing step is logged and recorded in the
    /// report, and the remaining steps still run.
    pub async fn force_logout(&self, reason: &str) -> LogoutReport {
        tracing::warn!(reason, "forced logout");
        let mut failed = Vec::new();

        if !self.stop_channels().await {
            failed.push(LogoutStep::StopChannels);
        }

        let registry = Arc::clone(&self.registry);
        if let Err(e) = tokio::spawn(async move { registry.clear_all().await }).await {
            tracing::error!(step = %LogoutStep::ClearStores, error = %e, "logout step failed");
            failed.push(LogoutStep::ClearStores);
        }

        if let Err(e) = self.credentials.clear() {
            tracing::error!(step = %LogoutStep::ClearCredentials, error = %e, "logout step failed");
            failed.push(LogoutStep::ClearCredentials);
        }

        self.redirect_tx.send_replace(Some(self.redirect.clone()));
        tracing::info!(redirect = %self.redirect, failed = failed.len(), "logout complete");

        LogoutReport {
            redirect: self.redirect.clone(),
            failed,
        }
    }

    /// Returns `false` if any channel failed to stop cleanly.
    async fn stop_channels(&self) -> bool {
        let mut ok = true;
        for channel in &self.channels {
            match channel.shutdown().await {
                Ok(()) => {}
                // The loop had already ended on its own; it is stopped.
                Err(
                    PushError::Unauthorized
                    | PushError::MissingCredential
                    | PushError::ReconnectExhausted,
                ) => {}
                Err(e) => {
                    tracing::error!(
                        step = %LogoutStep::StopChannels,
                        hub = %channel.hub(),
                        error = %e,
                        "logout step failed"
                    );
                    ok = false;
                }
            }
        }
        ok
    }

    /// Trigger [`force_logout`](SessionGuard::force_logout) on every
    /// [`LOGOUT_EVENTS`] message from `auth_channel`.
    ///
    /// The returned task runs until the channel is dropped; abort it to
    /// stop listening.
    pub fn listen(self: &Arc<Self>, auth_channel: &PushChannel) -> JoinHandle<()> {
        let mut events = UnboundedReceiverStream::new(auth_channel.subscribe(LOGOUT_EVENTS[0]))
            .merge(UnboundedReceiverStream::new(
                auth_channel.subscribe(LOGOUT_EVENTS[1]),
            ));
        let guard = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = events.next().await {
                let report = guard.force_logout(&message.target).await;
                if !report.is_clean() {
                    tracing::warn!(failed = ?report.failed, "logout finished with failures");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiClient;
    use crate::domain::Contract;
    use crate::event::HubMessage;
    use crate::hub::test_fixtures::{Attempt, ScriptedHub};
    use crate::live::{ConnectionState, PushConfig};
    use crate::transport::test_fixtures::ScriptedTransport;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: Arc<StoreRegistry>,
        credentials: Arc<CredentialStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let credentials = Arc::new(CredentialStore::open(dir.path()).unwrap());
        credentials.set_token("abc").unwrap();
        let registry = Arc::new(
            StoreRegistry::builder(ApiClient::with_transport(Arc::new(
                ScriptedTransport::default(),
            )))
            .store::<Contract>()
            .build(),
        );
        Fixture {
            _dir: dir,
            registry,
            credentials,
        }
    }

    #[tokio::test]
    async fn force_logout_clears_everything_and_redirects() {
        let fx = fixture();
        fx.registry.store::<Contract>().unwrap().set_search_text("x").await;
        let guard = SessionGuard::new(fx.registry.clone(), fx.credentials.clone(), Vec::new());
        let mut redirect = guard.watch_redirect();
        assert_eq!(*redirect.borrow(), None);

        let report = guard.force_logout("test").await;

        assert!(report.is_clean());
        assert_eq!(report.redirect, DEFAULT_REDIRECT);
        assert!(redirect.has_changed().unwrap());
        assert_eq!(redirect.borrow_and_update().as_deref(), Some("/login"));
        assert_eq!(fx.credentials.token(), None);
        assert!(!fx.credentials.path().exists());
        assert!(
            fx.registry
                .store::<Contract>()
                .unwrap()
                .snapshot()
                .await
                .search_text
                .is_empty()
        );
    }

    #[tokio::test]
    async fn custom_redirect_is_published() {
        let fx = fixture();
        let guard = SessionGuard::new(fx.registry, fx.credentials, Vec::new())
            .with_redirect("/signin");
        let report = guard.force_logout("test").await;
        assert_eq!(report.redirect, "/signin");
        assert_eq!(guard.watch_redirect().borrow().as_deref(), Some("/signin"));
    }

    #[tokio::test]
    async fn credential_failure_still_redirects() {
        let fx = fixture();
        // A directory where the file should be makes remove_file fail.
        std::fs::remove_file(fx.credentials.path()).unwrap();
        std::fs::create_dir(fx.credentials.path()).unwrap();
        let guard = SessionGuard::new(fx.registry, fx.credentials, Vec::new());

        let report = guard.force_logout("test").await;

        assert_eq!(report.failed, vec![LogoutStep::ClearCredentials]);
        assert_eq!(guard.watch_redirect().borrow().as_deref(), Some("/login"));
    }

    #[tokio::test]
    async fn auth_hub_event_triggers_logout() {
        let fx = fixture();
        let hub = Arc::new(ScriptedHub::default());
        let (tx, rx) = mpsc::channel(4);
        hub.push(Attempt::Open(rx));
        let auth = PushChannel::new(
            "/hubs/auth",
            hub.clone(),
            fx.credentials.token_factory(),
            PushConfig::default(),
        );

        let guard = Arc::new(SessionGuard::new(
            fx.registry.clone(),
            fx.credentials.clone(),
            vec![auth.clone()],
        ));
        let mut redirect = guard.watch_redirect();
        let _listener = guard.listen(&auth);
        auth.start().await.unwrap();

        tx.send(Ok(HubMessage::new("CredentialsChanged", json!([]))))
            .await
            .unwrap();

        redirect.changed().await.unwrap();
        assert_eq!(redirect.borrow().as_deref(), Some("/login"));
        assert_eq!(fx.credentials.token(), None);
        assert_eq!(auth.state(), ConnectionState::Disconnected);
    }
}
