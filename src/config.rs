//! Client configuration.
//!
//! Everything has a default, so an empty JSON object (or no file at all)
//! yields a working configuration for a local backend.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::live::PushConfig;
use crate::session::DEFAULT_REDIRECT;

/// Paths of the three push hubs, relative to
/// [`hub_base_url`](ClientConfig::hub_base_url).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubPaths {
    /// Credential-change events that force a logout.
    pub auth: String,
    /// The notification feed.
    pub notifications: String,
    /// Table change events for every other live entity.
    pub tables: String,
}

impl Default for HubPaths {
    fn default() -> Self {
        Self {
            auth: "/hubs/auth".to_owned(),
            notifications: "/notificationHub".to_owned(),
            tables: "/notificationHubTable".to_owned(),
        }
    }
}

/// Top-level configuration for a [`Console`](crate::Console).
///
/// # Examples
///
/// ```
/// use hrm_client::ClientConfig;
///
/// let config: ClientConfig =
///     serde_json::from_str(r#"{"api_base_url": "https://hr.example.com/api"}"#).unwrap();
/// assert_eq!(config.api_base_url, "https://hr.example.com/api");
/// assert_eq!(config.hubs.auth, "/hubs/auth");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Root of the REST API. Entity paths are joined onto it.
    pub api_base_url: String,

    /// Root the hub paths are joined onto.
    pub hub_base_url: String,

    /// Per-request timeout for REST calls.
    ///
    /// Default: 30 seconds.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,

    /// Directory holding `credentials.json`.
    pub storage_dir: PathBuf,

    pub hubs: HubPaths,

    /// Retry and reconnect delays shared by all push channels.
    pub push: PushConfig,

    /// Route published after a forced logout.
    pub logout_redirect: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_owned(),
            hub_base_url: "http://localhost:5000".to_owned(),
            request_timeout: Duration::from_secs(30),
            storage_dir: PathBuf::from(".hrm-client"),
            hubs: HubPaths::default(),
            push: PushConfig::default(),
            logout_redirect: DEFAULT_REDIRECT.to_owned(),
        }
    }
}

impl ClientConfig {
    /// Read a JSON configuration file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the file cannot be read, or with
    /// `ErrorKind::InvalidData` if it is not valid configuration JSON.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let config = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

/// `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// `Vec<Duration>` as integer milliseconds.
pub(crate) mod duration_ms_vec {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(v: &[Duration], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(
            v.iter()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        )
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Duration>, D::Error> {
        Vec::<u64>::deserialize(d).map(|v| v.into_iter().map(Duration::from_millis).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_gives_defaults() {
        let config: ClientConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.hubs.notifications, "/notificationHub");
        assert_eq!(config.hubs.tables, "/notificationHubTable");
        assert_eq!(config.logout_redirect, "/login");
        assert_eq!(config.push.retry_delay, Duration::from_secs(3));
    }

    #[test]
    fn nested_overrides_keep_sibling_defaults() {
        let config: ClientConfig = serde_json::from_value(json!({
            "request_timeout": 5000,
            "hubs": {"auth": "/auth"},
            "push": {"reconnect_delays": [0, 1000]}
        }))
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.hubs.auth, "/auth");
        assert_eq!(config.hubs.tables, "/notificationHubTable");
        assert_eq!(config.push.reconnect_delays.len(), 2);
        assert_eq!(config.push.retry_delay, Duration::from_secs(3));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("hrm.json");
        std::fs::write(&path, br#"{"storage_dir": "/var/lib/hrm"}"#).unwrap();
        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/var/lib/hrm"));
    }

    #[test]
    fn load_rejects_invalid_json() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("hrm.json");
        std::fs::write(&path, b"[1, 2").unwrap();
        let err = ClientConfig::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn durations_serialize_as_millis() {
        let value = serde_json::to_value(ClientConfig::default()).unwrap();
        assert_eq!(value["request_timeout"], json!(30000));
        assert_eq!(value["push"]["reconnect_delays"], json!([0, 2000, 10000, 30000]));
    }
}
