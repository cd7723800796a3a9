//! Desired-state document and the store that persists it.
//!
//! The store presents one logical document (settings, services, tokens,
//! timestamps). `save` replaces the whole document: it validates first, and
//! only a validated document reaches disk.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use common::api::{GlobalSettings, Service};

use crate::validate;

/// A webhook bearer token; only the bcrypt hash is ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiToken {
    /// 16-hex-char id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// bcrypt hash of the plaintext token.
    pub hash: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last successful authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

/// The full desired-state document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct State {
    /// Singleton settings.
    pub settings: GlobalSettings,
    /// Registered services, in insertion order.
    pub services: Vec<Service>,
    /// Webhook tokens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<ApiToken>,
    /// Document creation time.
    pub created_at: DateTime<Utc>,
    /// Advanced on every successful save.
    pub updated_at: DateTime<Utc>,
}

impl State {
    /// A freshly defaulted document.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            settings: GlobalSettings::default(),
            services: Vec::new(),
            tokens: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Find a service by case-insensitive name.
    pub fn service_by_name(&self, name: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|svc| svc.name.eq_ignore_ascii_case(name))
    }

    /// Checks the document invariants. Every save path runs this; a document
    /// that fails never reaches disk.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.settings.compose_project_name.is_empty() {
            return Err(StoreError::Validation(
                "compose project name is required".to_string(),
            ));
        }

        let mut seen_names: Vec<String> = Vec::new();
        let mut seen_hosts: Vec<String> = Vec::new();
        for svc in &self.services {
            validate::service_name(&svc.name).map_err(StoreError::from)?;
            validate::image_name(&svc.image).map_err(StoreError::from)?;
            validate::port(u32::from(svc.internal_port)).map_err(StoreError::from)?;

            let lower = svc.name.to_lowercase();
            if seen_names.contains(&lower) {
                return Err(StoreError::Validation(format!(
                    "duplicate service name {:?}",
                    svc.name
                )));
            }
            seen_names.push(lower);

            for host in &svc.hostnames {
                validate::hostname(host).map_err(StoreError::from)?;
                let lower = host.to_lowercase();
                if seen_hosts.contains(&lower) {
                    return Err(StoreError::Validation(format!(
                        "duplicate hostname {host:?}"
                    )));
                }
                seen_hosts.push(lower);
            }

            for (key, value) in &svc.env {
                validate::env_key(key).map_err(StoreError::from)?;
                validate::env_value(value).map_err(StoreError::from)?;
            }
            for vol in &svc.volumes {
                validate::volume_spec(vol).map_err(StoreError::from)?;
            }
            if let Some(hc) = &svc.healthcheck {
                validate::healthcheck_command(&hc.command).map_err(StoreError::from)?;
            }
        }

        if self.updated_at < self.created_at {
            return Err(StoreError::Validation(
                "updated_at precedes created_at".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Store failures, split so callers can map validation to 4xx and
/// persistence to 5xx.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The document violates an invariant; nothing was written.
    #[error("{0}")]
    Validation(String),
    /// The backing store failed; callers should treat as transient.
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl From<validate::ValidationError> for StoreError {
    fn from(err: validate::ValidationError) -> Self {
        StoreError::Validation(err.0)
    }
}

/// Durable home of the desired-state document.
///
/// `load` yields a consistent snapshot; `save` validates, then atomically
/// replaces the whole document. Writers are serialized; readers may run
/// concurrently. Callers hold no lock between `load` and `save`; `save`
/// is the sole arbiter of commit.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load a snapshot. A missing document is not an error; it yields a
    /// freshly defaulted state.
    async fn load(&self) -> Result<State, StoreError>;
    /// Validate and persist the document, advancing `updated_at`.
    async fn save(&self, state: State) -> Result<(), StoreError>;
}

/// In-process store used by tests and embedded setups.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<State>,
}

impl InMemoryStore {
    /// Wrap an existing document.
    pub fn new(state: State) -> Self {
        Self {
            inner: RwLock::new(state),
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn load(&self) -> Result<State, StoreError> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, mut state: State) -> Result<(), StoreError> {
        state.validate()?;
        state.touch();
        *self.inner.write().await = state;
        Ok(())
    }
}
