//! The assembled console client: configuration, credentials, the REST
//! client, every HR entity store, the push channels, and forced logout.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::credentials::CredentialStore;
use crate::domain::{
    Contract, Employee, Notification, Overtime, Payroll, RewardPenalty, ShiftTemplate, Training,
    WorkSchedule,
};
use crate::entity::Entity;
use crate::error::{OpenError, PushError};
use crate::hub::{HubTransport, SseHubTransport};
use crate::live::PushChannel;
use crate::registry::StoreRegistry;
use crate::session::{LogoutReport, SessionGuard};
use crate::store::{EntityStore, MutationPolicy};
use crate::transport::RestTransport;

/// A signed-in (or signed-out) HR console session.
///
/// Built once at startup by [`ConsoleBuilder`] and shared by reference.
/// Holds one store per HR entity; all are live. Notifications follow the
/// notification hub, every other entity the table hub, and the auth hub
/// drives forced logout.
pub struct Console {
    config: ClientConfig,
    credentials: Arc<CredentialStore>,
    client: ApiClient,
    registry: Arc<StoreRegistry>,
    auth: PushChannel,
    notifications: PushChannel,
    tables: PushChannel,
    session: Arc<SessionGuard>,
    logout_listener: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("api_base_url", &self.config.api_base_url)
            .field("registry", &self.registry)
            .field("auth", &self.auth)
            .field("notifications", &self.notifications)
            .field("tables", &self.tables)
            .finish_non_exhaustive()
    }
}

impl Console {
    /// Start configuring a console.
    pub fn builder() -> ConsoleBuilder {
        ConsoleBuilder::new()
    }

    /// The shared store for `E`.
    ///
    /// Returns `None` only for entity types outside the HR catalog.
    pub fn store<E: Entity>(&self) -> Option<EntityStore<E>> {
        self.registry.store::<E>()
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The auth hub channel.
    pub fn auth_channel(&self) -> &PushChannel {
        &self.auth
    }

    /// The notification hub channel.
    pub fn notification_channel(&self) -> &PushChannel {
        &self.notifications
    }

    /// The table-change hub channel.
    pub fn table_channel(&self) -> &PushChannel {
        &self.tables
    }

    /// Watch for the route to navigate to after a forced logout.
    pub fn watch_redirect(&self) -> watch::Receiver<Option<String>> {
        self.session.watch_redirect()
    }

    /// Store `token` and connect every push channel.
    ///
    /// # Errors
    ///
    /// Returns [`OpenError::Credentials`] if the token cannot be persisted;
    /// push start failures are returned as [`OpenError::Push`].
    pub async fn sign_in(&self, token: impl Into<String>) -> Result<(), OpenError> {
        self.credentials.set_token(token)?;
        self.start_push().await?;
        Ok(())
    }

    /// Start every push channel that is not already running.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::MissingCredential`] when signed out. Channels
    /// already running are left alone.
    pub async fn start_push(&self) -> Result<(), PushError> {
        for channel in [&self.auth, &self.notifications, &self.tables] {
            match channel.start().await {
                Ok(_) | Err(PushError::AlreadyStarted) => {}
                Err(e) => {
                    tracing::warn!(hub = %channel.hub(), error = %e, "push channel not started");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Tear down the session and publish the logout redirect.
    pub async fn force_logout(&self, reason: &str) -> LogoutReport {
        self.session.force_logout(reason).await
    }

    /// Stop every push channel and the logout listener. Stores and
    /// credentials are kept.
    pub async fn shutdown(&self) {
        if let Some(listener) = self
            .logout_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
        for channel in [&self.auth, &self.notifications, &self.tables] {
            if let Err(e) = channel.shutdown().await {
                tracing::debug!(hub = %channel.hub(), error = %e, "channel had stopped with error");
            }
        }
        self.registry.detach_all();
    }
}

/// Builder for [`Console`].
///
/// # Examples
///
/// ```no_run
/// use hrm_client::{ClientConfig, Console, domain::Contract};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let console = Console::builder()
///     .config(ClientConfig::load("hrm.json")?)
///     .open()
///     .await?;
/// console.sign_in("token").await?;
/// let contracts = console.store::<Contract>().expect("registered");
/// contracts.refresh().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConsoleBuilder {
    config: ClientConfig,
    rest_transport: Option<Arc<dyn RestTransport>>,
    hub_transport: Option<Arc<dyn HubTransport>>,
    policy: MutationPolicy,
}

impl ConsoleBuilder {
    /// A builder with [`ClientConfig::default`].
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            rest_transport: None,
            hub_transport: None,
            policy: MutationPolicy::default(),
        }
    }

    /// Replace the configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `transport` for REST calls instead of HTTP to
    /// [`api_base_url`](ClientConfig::api_base_url).
    pub fn rest_transport(mut self, transport: Arc<dyn RestTransport>) -> Self {
        self.rest_transport = Some(transport);
        self
    }

    /// Use `transport` for hubs instead of server-sent events from
    /// [`hub_base_url`](ClientConfig::hub_base_url).
    pub fn hub_transport(mut self, transport: Arc<dyn HubTransport>) -> Self {
        self.hub_transport = Some(transport);
        self
    }

    /// How stores fold locally created records into the current page.
    pub fn mutation_policy(mut self, policy: MutationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Load credentials, build the transports and stores, and wire the
    /// push channels and logout listener. No connection is opened yet; call
    /// [`Console::start_push`] or [`Console::sign_in`].
    ///
    /// # Errors
    ///
    /// Returns [`OpenError`] if the credentials file cannot be read or a
    /// configured URL is invalid.
    pub async fn open(self) -> Result<Console, OpenError> {
        let config = self.config;
        let credentials = Arc::new(CredentialStore::open(&config.storage_dir)?);

        let client = match self.rest_transport {
            Some(transport) => ApiClient::with_transport(transport),
            None => ApiClient::connect(
                &config.api_base_url,
                credentials.bearer(),
                config.request_timeout,
            )?,
        };
        let hub_transport: Arc<dyn HubTransport> = match self.hub_transport {
            Some(transport) => transport,
            None => Arc::new(SseHubTransport::new(&config.hub_base_url)?),
        };

        let channel = |hub: &str| {
            PushChannel::new(
                hub,
                Arc::clone(&hub_transport),
                credentials.token_factory(),
                config.push.clone(),
            )
        };
        let auth = channel(&config.hubs.auth);
        let notifications = channel(&config.hubs.notifications);
        let tables = channel(&config.hubs.tables);

        let table_hub = config.hubs.tables.as_str();
        let registry = Arc::new(
            StoreRegistry::builder(client.clone())
                .policy(self.policy)
                .live_store::<Employee>(table_hub)
                .live_store::<Contract>(table_hub)
                .live_store::<Overtime>(table_hub)
                .live_store::<ShiftTemplate>(table_hub)
                .live_store::<WorkSchedule>(table_hub)
                .live_store::<RewardPenalty>(table_hub)
                .live_store::<Payroll>(table_hub)
                .live_store::<Training>(table_hub)
                .live_store::<Notification>(config.hubs.notifications.as_str())
                .build(),
        );
        registry.attach(&notifications);
        registry.attach(&tables);

        let session = Arc::new(
            SessionGuard::new(
                Arc::clone(&registry),
                Arc::clone(&credentials),
                vec![auth.clone(), notifications.clone(), tables.clone()],
            )
            .with_redirect(config.logout_redirect.clone()),
        );
        let listener = session.listen(&auth);

        tracing::info!(
            api = %config.api_base_url,
            hubs = %config.hub_base_url,
            stores = registry.entities().len(),
            signed_in = credentials.token().is_some(),
            "console opened"
        );

        Ok(Console {
            config,
            credentials,
            client,
            registry,
            auth,
            notifications,
            tables,
            session,
            logout_listener: Mutex::new(Some(listener)),
        })
    }
}

impl Default for ConsoleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::HubMessage;
    use crate::hub::test_fixtures::{Attempt, ScriptedHub};
    use crate::live::ConnectionState;
    use crate::transport::test_fixtures::ScriptedTransport;
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn open(dir: &std::path::Path, hub: Arc<ScriptedHub>) -> Console {
        Console::builder()
            .config(ClientConfig {
                storage_dir: dir.to_owned(),
                ..ClientConfig::default()
            })
            .rest_transport(Arc::new(ScriptedTransport::default()))
            .hub_transport(hub)
            .open()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn every_catalog_entity_is_registered() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let console = open(dir.path(), Arc::new(ScriptedHub::default())).await;
        assert_eq!(console.registry().entities().len(), 9);
        assert!(console.store::<WorkSchedule>().is_some());
        assert!(console.store::<Notification>().is_some());
    }

    #[tokio::test]
    async fn start_push_while_signed_out_fails() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let hub = Arc::new(ScriptedHub::default());
        let console = open(dir.path(), hub.clone()).await;
        assert_eq!(console.start_push().await, Err(PushError::MissingCredential));
        assert_eq!(hub.attempts_made(), 0);
        assert_eq!(console.auth_channel().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn sign_in_connects_and_routes_table_events() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let hub = Arc::new(ScriptedHub::default());
        let (_auth_tx, auth_rx) = mpsc::channel(1);
        let (_notif_tx, notif_rx) = mpsc::channel(1);
        let (table_tx, table_rx) = mpsc::channel(4);
        hub.push_for("/hubs/auth", Attempt::Open(auth_rx))
            .push_for("/notificationHub", Attempt::Open(notif_rx))
            .push_for("/notificationHubTable", Attempt::Open(table_rx));
        let console = open(dir.path(), hub.clone()).await;

        console.sign_in("abc").await.unwrap();
        let mut state = console.table_channel().watch_state();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        table_tx
            .send(Ok(HubMessage::new(
                "OvertimeChanged",
                json!({"action": "create", "data": {"id": "o1", "hours": 2}}),
            )))
            .await
            .unwrap();

        let overtime = console.store::<Overtime>().unwrap();
        for _ in 0..100 {
            if overtime.get("o1").await.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(overtime.items().await.len(), 1);
        console.shutdown().await;
    }
}
