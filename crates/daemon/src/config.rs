//! Daemon configuration: defaults overridable through the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::generate::ListenerPorts;

/// Environment variable prefix (`TINYSERVE_UI_ADDR`, …).
pub const ENV_PREFIX: &str = "TINYSERVE";

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Root of all persisted data.
    pub data_dir: PathBuf,
    /// Admin listener; loopback by default.
    pub admin_addr: String,
    /// UI listener.
    pub ui_addr: String,
    /// Webhook listener.
    pub webhook_addr: String,
    /// Directory of static dashboard assets, when present.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
    /// Lines kept per access-log channel.
    pub access_log_lines: usize,
}

impl AppConfig {
    /// Ports of the UI and webhook listeners, for generated ingress rules.
    pub fn listener_ports(&self) -> ListenerPorts {
        let defaults = ListenerPorts::default();
        ListenerPorts {
            ui_port: addr_port(&self.ui_addr).unwrap_or(defaults.ui_port),
            webhook_port: addr_port(&self.webhook_addr).unwrap_or(defaults.webhook_port),
        }
    }
}

fn addr_port(addr: &str) -> Option<u16> {
    addr.parse::<SocketAddr>().ok().map(|a| a.port())
}

fn default_data_dir() -> String {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => format!("{home}/.local/share/tinyserve"),
        _ => "./data".to_string(),
    }
}

/// Load configuration from the environment over built-in defaults.
pub fn load() -> anyhow::Result<AppConfig> {
    let env = config::Environment::with_prefix(ENV_PREFIX);

    let cfg = config::Config::builder()
        .add_source(env)
        .set_default("data_dir", default_data_dir())?
        .set_default("admin_addr", "127.0.0.1:7070")?
        .set_default("ui_addr", "0.0.0.0:7071")?
        .set_default("webhook_addr", "0.0.0.0:7072")?
        .set_default("access_log_lines", 500)?
        .build()?;

    cfg.try_deserialize()
        .map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))
}
