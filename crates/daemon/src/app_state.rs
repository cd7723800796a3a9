//! Shared application state passed into handlers.

use std::sync::Arc;

use crate::access_logs::AccessLogs;
use crate::compose::ComposeBackend;
use crate::deploy::DeployEngine;
use crate::generate::ListenerPorts;
use crate::paths::DataPaths;
use crate::state::Store;

/// Everything the HTTP layer needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// The desired-state store.
    pub store: Arc<dyn Store>,
    /// Compose driver for status, logs, and image helpers.
    pub compose: Arc<dyn ComposeBackend>,
    /// The deploy engine; one per generator root.
    pub engine: Arc<DeployEngine>,
    /// Data-directory layout.
    pub paths: DataPaths,
    /// Listener ports baked into generated tunnel ingress rules.
    pub ports: ListenerPorts,
    /// Per-listener access-log rings.
    pub access_logs: AccessLogs,
}
