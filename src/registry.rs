//! The store registry: one shared [`EntityStore`] per entity type, built
//! once at startup and passed by reference.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;

use crate::client::ApiClient;
use crate::entity::Entity;
use crate::event::{PushEvent, decode_push_event};
use crate::live::PushChannel;
use crate::store::{EntityStore, MutationPolicy};

/// Type-erased view of a store, used to route push events and to clear
/// every store on logout without knowing the entity types.
trait ChangeSink: Send + Sync {
    /// Entity name, for logging.
    fn entity(&self) -> &'static str;

    /// Event name the store listens for.
    fn change_event(&self) -> &'static str;

    /// Fold one push event into the store.
    fn apply<'a>(&'a self, event: &'a PushEvent) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Drop the store's state.
    fn clear(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

impl<E: Entity> ChangeSink for EntityStore<E> {
    fn entity(&self) -> &'static str {
        E::NAME
    }

    fn change_event(&self) -> &'static str {
        E::CHANGE_EVENT
    }

    fn apply<'a>(&'a self, event: &'a PushEvent) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(EntityStore::apply(self, event))
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(EntityStore::clear(self))
    }
}

/// A registered store and the hub it listens on, if any.
struct Registration {
    sink: Arc<dyn ChangeSink>,
    hub: Option<String>,
}

/// Holds exactly one [`EntityStore`] per registered entity type.
///
/// Construct with [`StoreRegistry::builder`]. Stores are looked up by type
/// with [`store`](StoreRegistry::store); every lookup returns a handle to
/// the same shared state.
pub struct StoreRegistry {
    /// Stores keyed by `TypeId::of::<E>()`, each holding an `EntityStore<E>`.
    stores: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    registrations: Vec<Registration>,
    /// Forwarding tasks spawned by [`attach`](StoreRegistry::attach).
    attachments: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entities: Vec<&str> = self.registrations.iter().map(|r| r.sink.entity()).collect();
        f.debug_struct("StoreRegistry")
            .field("entities", &entities)
            .finish_non_exhaustive()
    }
}

impl StoreRegistry {
    /// Start building a registry whose stores share `client`.
    pub fn builder(client: ApiClient) -> StoreRegistryBuilder {
        StoreRegistryBuilder {
            client,
            policy: MutationPolicy::default(),
            stores: HashMap::new(),
            registrations: Vec::new(),
        }
    }

    /// The shared store for `E`, or `None` if `E` was not registered.
    pub fn store<E: Entity>(&self) -> Option<EntityStore<E>> {
        self.stores
            .get(&TypeId::of::<E>())
            .and_then(|any| any.downcast_ref::<EntityStore<E>>())
            .cloned()
    }

    /// Names of all registered entities, in registration order.
    pub fn entities(&self) -> Vec<&'static str> {
        self.registrations.iter().map(|r| r.sink.entity()).collect()
    }

    /// Route `channel`'s change events into every store registered for
    /// its hub.
    ///
    /// One forwarding task is spawned per store. Each decodes incoming
    /// messages with [`decode_push_event`] and folds them into its store in
    /// arrival order; undecodable messages are logged and skipped. Must be
    /// called from within a Tokio runtime.
    ///
    /// # Returns
    ///
    /// The number of stores attached.
    pub fn attach(&self, channel: &PushChannel) -> usize {
        let mut attached = 0;
        let mut tasks = self.attachments.lock().unwrap_or_else(PoisonError::into_inner);
        for registration in &self.registrations {
            if registration.hub.as_deref() != Some(channel.hub()) {
                continue;
            }
            let sink = Arc::clone(&registration.sink);
            let mut rx = channel.subscribe(sink.change_event());
            let hub = channel.hub().to_owned();
            tasks.push(tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    match decode_push_event(&message) {
                        Some(event) => {
                            sink.apply(&event).await;
                        }
                        None => tracing::debug!(
                            hub = %hub,
                            entity = sink.entity(),
                            target = %message.target,
                            "skipping undecodable push message"
                        ),
                    }
                }
            }));
            attached += 1;
        }
        tracing::debug!(hub = %channel.hub(), attached, "stores attached to push channel");
        attached
    }

    /// Stop every forwarding task started by [`attach`](StoreRegistry::attach).
    pub fn detach_all(&self) {
        let tasks = std::mem::take(
            &mut *self.attachments.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
    }

    /// Clear every store.
    pub async fn clear_all(&self) {
        for registration in &self.registrations {
            registration.sink.clear().await;
        }
        tracing::debug!(stores = self.registrations.len(), "cleared all stores");
    }
}

impl Drop for StoreRegistry {
    fn drop(&mut self) {
        self.detach_all();
    }
}

/// Builder for [`StoreRegistry`].
pub struct StoreRegistryBuilder {
    client: ApiClient,
    policy: MutationPolicy,
    stores: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    registrations: Vec<Registration>,
}

impl StoreRegistryBuilder {
    /// Set the mutation policy for stores registered after this call.
    pub fn policy(mut self, policy: MutationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register a store for `E` that is only updated by its own calls.
    ///
    /// Registering the same type twice keeps the first store.
    pub fn store<E: Entity>(self) -> Self {
        self.register::<E>(None)
    }

    /// Register a store for `E` that also follows `E::CHANGE_EVENT` on
    /// the channel for `hub`.
    pub fn live_store<E: Entity>(self, hub: impl Into<String>) -> Self {
        self.register::<E>(Some(hub.into()))
    }

    fn register<E: Entity>(mut self, hub: Option<String>) -> Self {
        let key = TypeId::of::<E>();
        if self.stores.contains_key(&key) {
            tracing::warn!(entity = E::NAME, "store registered twice, keeping the first");
            return self;
        }
        let store = EntityStore::<E>::new(self.client.clone(), self.policy);
        self.registrations.push(Registration {
            sink: Arc::new(store.clone()),
            hub,
        });
        self.stores.insert(key, Box::new(store));
        self
    }

    /// Finish the registry.
    pub fn build(self) -> StoreRegistry {
        StoreRegistry {
            stores: self.stores,
            registrations: self.registrations,
            attachments: Mutex::new(Vec::new()),
        }
    }
}
