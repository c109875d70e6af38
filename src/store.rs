//! The generic entity store: one entity's paginated list plus CRUD.
//!
//! An [`EntityStore`] is the single source of truth for one entity's list
//! and pagination metadata. Screens read snapshots from it, call
//! [`fetch`](EntityStore::fetch) when paging parameters change, and call the
//! mutation methods in response to user actions. Live stores additionally
//! receive [`PushEvent`]s through the registry and fold them in with the
//! same rules.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::client::ApiClient;
use crate::entity::Entity;
use crate::error::StoreError;
use crate::event::{ChangeAction, PushEvent};
use crate::pagination::{PageQuery, PaginationMeta};
use crate::record::Record;

/// How locally created records are folded into the current page.
///
/// The server decides which page a new record lands on; the store cannot
/// know. [`AppendAlways`](MutationPolicy::AppendAlways) shows every new
/// record immediately at the tail of the current list, even if the server
/// would place it elsewhere. [`RespectPageWindow`](MutationPolicy::RespectPageWindow)
/// only appends while the current page has room, leaving the rest to the
/// next fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationPolicy {
    #[default]
    AppendAlways,
    RespectPageWindow,
}

/// Result of a successful [`EntityStore::fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page replaced the store's items and meta.
    Applied,
    /// A newer fetch was issued while this one was in flight; the response
    /// was discarded and the store was left for the newer fetch to update.
    Superseded,
}

/// Point-in-time copy of a store's state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    /// Records of the current page, plus any local additions.
    pub items: Vec<Record>,
    /// Server-reported paging state of the last applied fetch.
    pub meta: Option<PaginationMeta>,
    /// Whether the entity's editor dialog is open.
    pub modal_open: bool,
    /// Search text typed on the list screen.
    pub search_text: String,
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) snapshot: StoreSnapshot,
    pub(crate) query: Option<PageQuery>,
}

impl StoreState {
    /// Merge into an existing record with the same id, or append per policy.
    ///
    /// Returns `true` if the list changed.
    fn upsert(&mut self, record: Record, policy: MutationPolicy) -> bool {
        if self.merge(&record) {
            return true;
        }
        let has_room = match (policy, self.snapshot.meta) {
            (MutationPolicy::AppendAlways, _) | (_, None) => true,
            (MutationPolicy::RespectPageWindow, Some(meta)) => {
                self.snapshot.items.len() < meta.page_size as usize
            }
        };
        if has_room {
            self.snapshot.items.push(record);
        }
        has_room
    }

    /// Shallow-merge into the record with the same id. No-op if absent.
    fn merge(&mut self, record: &Record) -> bool {
        match self
            .snapshot
            .items
            .iter_mut()
            .find(|r| r.id() == record.id())
        {
            Some(existing) => {
                existing.merge(record);
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.snapshot.items.len();
        self.snapshot.items.retain(|r| r.id() != id);
        self.snapshot.items.len() != before
    }

    fn fold(&mut self, event: &PushEvent, policy: MutationPolicy) -> bool {
        match event.action {
            ChangeAction::Create => self.upsert(event.data.clone(), policy),
            ChangeAction::Update => self.merge(&event.data),
            ChangeAction::Delete => self.remove(event.data.id()),
        }
    }
}

struct StoreInner {
    client: ApiClient,
    policy: MutationPolicy,
    state: RwLock<StoreState>,
    /// Incremented by every fetch; a response only applies if its
    /// generation is still the latest.
    generation: AtomicU64,
}

/// Shared state container for one [`Entity`].
///
/// `Clone` is cheap: all clones share the same state. Construct stores
/// through [`StoreRegistry`](crate::StoreRegistry) so each entity has
/// exactly one instance.
///
/// # Consistency
///
/// Local mutations and push events are applied in whichever order they
/// complete. There is no version check; the last shallow merge wins. Fetch
/// responses are the exception: a response older than the latest issued
/// fetch is discarded.
pub struct EntityStore<E: Entity> {
    inner: Arc<StoreInner>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for EntityStore<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> fmt::Debug for EntityStore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("entity", &E::NAME)
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl<E: Entity> EntityStore<E> {
    /// Create an empty store.
    ///
    /// # Arguments
    ///
    /// * `client` - REST client used for every operation.
    /// * `policy` - How locally created records join the current page.
    pub fn new(client: ApiClient, policy: MutationPolicy) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                client,
                policy,
                state: RwLock::new(StoreState::default()),
                generation: AtomicU64::new(0),
            }),
            _entity: PhantomData,
        }
    }

    /// The entity's default query: page 1 at its default page size.
    pub fn default_query() -> PageQuery {
        PageQuery::first(E::DEFAULT_PAGE_SIZE)
    }

    /// Fetch one page and replace `items` and `meta` with it.
    ///
    /// On failure the previous state is left untouched. If another fetch
    /// is issued before this one completes, this response is discarded.
    ///
    /// # Arguments
    ///
    /// * `query` - Page, page size, search text, and filters.
    ///
    /// # Returns
    ///
    /// Whether the response was applied or superseded.
    ///
    /// # Errors
    ///
    /// Returns any [`StoreError`] from the request or page decoding.
    pub async fn fetch(&self, query: PageQuery) -> Result<FetchOutcome, StoreError> {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(
            entity = E::NAME,
            current = query.current(),
            page_size = query.page_size(),
            generation,
            "fetching page"
        );

        let mut page = self
            .inner
            .client
            .list(E::PATH, &query)
            .await
            .inspect_err(|e| {
                tracing::warn!(entity = E::NAME, error = %e, "fetch failed");
            })?;

        let limit = query.page_size() as usize;
        if page.items.len() > limit {
            tracing::warn!(
                entity = E::NAME,
                returned = page.items.len(),
                page_size = limit,
                "server returned more records than requested, truncating"
            );
            page.items.truncate(limit);
        }

        let mut state = self.inner.state.write().await;
        if self.inner.generation.load(Ordering::Acquire) != generation {
            tracing::debug!(entity = E::NAME, generation, "discarding stale page");
            return Ok(FetchOutcome::Superseded);
        }
        state.snapshot.items = page.items;
        state.snapshot.meta = Some(page.meta);
        state.query = Some(query);
        Ok(FetchOutcome::Applied)
    }

    /// Fetch `current`/`page_size` using the store's search text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidQuery`] for a zero page or size, or any
    /// error from [`fetch`](EntityStore::fetch).
    pub async fn fetch_page(&self, current: u32, page_size: u32) -> Result<FetchOutcome, StoreError> {
        let search = self.inner.state.read().await.snapshot.search_text.clone();
        let query = PageQuery::new(current, page_size)?.with_search(search);
        self.fetch(query).await
    }

    /// Re-run the last applied query, or the default query if none.
    ///
    /// # Errors
    ///
    /// Returns any error from [`fetch`](EntityStore::fetch).
    pub async fn refresh(&self) -> Result<FetchOutcome, StoreError> {
        let query = self
            .inner
            .state
            .read()
            .await
            .query
            .clone()
            .unwrap_or_else(Self::default_query);
        self.fetch(query).await
    }

    /// Create a record and fold the server's copy into the list.
    ///
    /// The returned record is appended to the tail (subject to the store's
    /// [`MutationPolicy`]). If a record with the same id is already present,
    /// for instance because a push event arrived first, it is merged
    /// instead of duplicated.
    ///
    /// # Errors
    ///
    /// Returns any [`StoreError`]; the list is unchanged on failure.
    pub async fn create(&self, payload: Value) -> Result<Record, StoreError> {
        let record = self
            .inner
            .client
            .create(E::PATH, payload)
            .await
            .inspect_err(|e| {
                tracing::warn!(entity = E::NAME, error = %e, "create failed");
            })?;
        tracing::debug!(entity = E::NAME, id = record.id(), "created");
        let mut state = self.inner.state.write().await;
        state.upsert(record.clone(), self.inner.policy);
        Ok(record)
    }

    /// Update a record and shallow-merge the server's answer into the list.
    ///
    /// Fields the server returns overwrite local ones; other local fields
    /// are kept. If the server confirms without a body, `partial` itself is
    /// merged. No local change if `id` is not in the list.
    ///
    /// # Errors
    ///
    /// Returns any [`StoreError`]; the list is unchanged on failure.
    pub async fn update(&self, id: &str, partial: Value) -> Result<(), StoreError> {
        let returned = self
            .inner
            .client
            .update(E::PATH, id, E::UPDATE_METHOD, partial.clone())
            .await
            .inspect_err(|e| {
                tracing::warn!(entity = E::NAME, id, error = %e, "update failed");
            })?;
        let record = match returned {
            Some(record) => record,
            None => Record::from_value_with_id(partial, id)?,
        };
        let mut state = self.inner.state.write().await;
        if !state.merge(&record) {
            tracing::debug!(entity = E::NAME, id, "updated record not on current page");
        }
        Ok(())
    }

    /// Delete a record; remove it locally only once the server confirms.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Rejected`] when the server reports failure;
    /// the list is unchanged on any error.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner
            .client
            .delete(E::PATH, id)
            .await
            .inspect_err(|e| {
                tracing::warn!(entity = E::NAME, id, error = %e, "delete failed");
            })?;
        let mut state = self.inner.state.write().await;
        state.remove(id);
        Ok(())
    }

    /// Fold a push event into the list.
    ///
    /// Create behaves like a local create, update like a local update
    /// (no-op for absent records), delete removes the record if present.
    ///
    /// # Returns
    ///
    /// `true` if the list changed.
    pub async fn apply(&self, event: &PushEvent) -> bool {
        let mut state = self.inner.state.write().await;
        let changed = state.fold(event, self.inner.policy);
        tracing::debug!(
            entity = E::NAME,
            action = ?event.action,
            id = event.data.id(),
            changed,
            "applied push event"
        );
        changed
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.inner.state.read().await.snapshot.clone()
    }

    /// Copy of the current items.
    pub async fn items(&self) -> Vec<Record> {
        self.inner.state.read().await.snapshot.items.clone()
    }

    /// Paging state of the last applied fetch.
    pub async fn meta(&self) -> Option<PaginationMeta> {
        self.inner.state.read().await.snapshot.meta
    }

    /// The record with `id`, if it is in the list.
    pub async fn get(&self, id: &str) -> Option<Record> {
        self.inner
            .state
            .read()
            .await
            .snapshot
            .items
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }

    /// The query of the last applied fetch.
    pub async fn last_query(&self) -> Option<PageQuery> {
        self.inner.state.read().await.query.clone()
    }

    /// Open or close the entity's editor dialog.
    pub async fn set_modal_open(&self, open: bool) {
        self.inner.state.write().await.snapshot.modal_open = open;
    }

    /// Set the search text used by [`fetch_page`](EntityStore::fetch_page).
    pub async fn set_search_text(&self, text: impl Into<String>) {
        self.inner.state.write().await.snapshot.search_text = text.into();
    }

    /// Drop all state and invalidate in-flight fetches.
    pub async fn clear(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        *self.inner.state.write().await = StoreState::default();
    }
}
