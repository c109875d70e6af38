//! The `Entity` trait describing one REST-backed domain collection.

use crate::client::UpdateMethod;

/// A domain collection served by the API under its own path.
///
/// Entities are marker types: the records themselves stay untyped
/// [`Record`](crate::Record)s. The associated constants tell the store where
/// to send requests and which push event carries changes.
///
/// # Contract
///
/// - [`PATH`](Entity::PATH) is relative to the API base URL, without a
///   leading slash.
/// - [`CHANGE_EVENT`](Entity::CHANGE_EVENT) is the hub event name whose
///   payload is `{ action, data }`. Stores only listen for it when
///   registered as live.
/// - [`DEFAULT_PAGE_SIZE`](Entity::DEFAULT_PAGE_SIZE) must be at least 1.
pub trait Entity: Send + Sync + 'static {
    /// Human-readable name used in logs (e.g. `"Contract"`).
    const NAME: &'static str;

    /// Collection path (e.g. `"contracts"`).
    const PATH: &'static str;

    /// Push event name carrying changes (e.g. `"ContractChanged"`).
    const CHANGE_EVENT: &'static str;

    /// Page size used when the screen URL does not carry one.
    const DEFAULT_PAGE_SIZE: u32 = 10;

    /// Verb used by [`EntityStore::update`](crate::EntityStore::update).
    const UPDATE_METHOD: UpdateMethod = UpdateMethod::Put;
}
