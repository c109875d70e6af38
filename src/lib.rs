//! Client engine for the HR management console: paginated entity stores
//! kept in sync by REST mutations and server push.
//!
//! The moving parts:
//!
//! * [`EntityStore`] holds one entity's current page and folds local CRUD
//!   results and [`PushEvent`]s into it.
//! * [`ApiClient`] speaks the REST envelope protocol; [`decode_envelope`]
//!   and [`decode_page`] normalize every response shape the server uses.
//! * [`PushChannel`] keeps one hub connection alive and fans named
//!   messages out to subscribers.
//! * [`StoreRegistry`] owns one store per entity type and routes change
//!   events into them.
//! * [`Console`] wires all of it together with persisted credentials and
//!   forced logout.

mod auth;
pub use auth::{BearerAuth, SharedToken, TokenFactory};
mod client;
pub use client::{ApiClient, UpdateMethod};
mod config;
pub use config::{ClientConfig, HubPaths};
mod console;
pub use console::{Console, ConsoleBuilder};
mod credentials;
pub use credentials::{CredentialStore, Credentials};
pub mod domain;
mod entity;
pub use entity::Entity;
mod envelope;
pub use envelope::{Envelope, EnvelopeData, decode_envelope, decode_page};
mod error;
pub use error::{OpenError, PushError, StoreError};
mod event;
pub use event::{ChangeAction, HubMessage, PushEvent, decode_push_event};
mod hub;
pub use hub::{ConnectFuture, HubStream, HubTransport, SseHubTransport};
mod live;
pub use live::{ConnectionState, PushChannel, PushConfig, PushHandle};
mod pagination;
pub use pagination::{
    CURRENT_PARAM, PAGE_SIZE_PARAM, Page, PageQuery, PaginationMeta, SEARCH_PARAM,
};
mod record;
pub use record::Record;
mod registry;
pub use registry::{StoreRegistry, StoreRegistryBuilder};
mod session;
pub use session::{DEFAULT_REDIRECT, LOGOUT_EVENTS, LogoutReport, LogoutStep, SessionGuard};
mod store;
pub use store::{EntityStore, FetchOutcome, MutationPolicy, StoreSnapshot};
mod transport;
pub use transport::{
    ApiRequest, ApiResponse, HttpTransport, Method, RestTransport, TransportFuture,
};
