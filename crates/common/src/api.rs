//! Shared API DTOs used by the tinyserve daemon and CLI.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the cloudflared container authenticates to the tunnel edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TunnelMode {
    /// Run-token handed out by the Cloudflare API.
    #[default]
    Token,
    /// Credentials JSON written next to the tunnel config.
    CredentialsFile,
}

impl TunnelMode {
    /// Returns the canonical snake_case representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelMode::Token => "token",
            TunnelMode::CredentialsFile => "credentials_file",
        }
    }
}

/// Browser-facing authentication applied in front of the UI listener.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BrowserAuthType {
    /// No browser auth; every request passes through.
    #[default]
    None,
    /// Cloudflare Access sits in front and asserts the user identity.
    CloudflareAccess,
}

/// Tunnel configuration persisted in settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TunnelSettings {
    /// Authentication mode for cloudflared.
    pub mode: TunnelMode,
    /// Run token (token mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Path to the credentials JSON (credentials-file mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<String>,
    /// Cloudflare tunnel id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<String>,
    /// Cloudflare tunnel name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_name: Option<String>,
    /// Cloudflare account id that owns the tunnel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

/// Browser-auth settings nested under remote access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BrowserAuthSettings {
    /// Selected browser-auth provider.
    #[serde(rename = "type")]
    pub auth_type: BrowserAuthType,
    /// Cloudflare Access team domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_domain: Option<String>,
    /// Cloudflare Access policy audience tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_aud: Option<String>,
}

/// Remote-access settings: public hostnames for the UI and webhook API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RemoteSettings {
    /// Whether remote access is enabled.
    pub enabled: bool,
    /// Public hostname routed to the UI listener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_hostname: Option<String>,
    /// Public hostname routed to the webhook listener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_hostname: Option<String>,
    /// Browser auth wrapped around the UI surface.
    #[serde(default)]
    pub browser_auth: BrowserAuthSettings,
}

/// Singleton daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalSettings {
    /// Compose project name; never empty.
    pub compose_project_name: String,
    /// DNS suffix used to synthesize hostnames for services without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_domain: Option<String>,
    /// Tunnel configuration.
    #[serde(default)]
    pub tunnel: TunnelSettings,
    /// Local admin port the UI proxies to.
    pub ui_local_port: u16,
    /// Bound on retained backup bundles and state snapshots.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    /// Remote access configuration.
    #[serde(default)]
    pub remote: RemoteSettings,
    /// Cloudflare API token used for tunnel and DNS provisioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudflare_api_token: Option<String>,
}

fn default_max_backups() -> usize {
    10
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            compose_project_name: "tinyserve".to_string(),
            default_domain: None,
            tunnel: TunnelSettings::default(),
            ui_local_port: 7070,
            max_backups: default_max_backups(),
            remote: RemoteSettings::default(),
            cloudflare_api_token: None,
        }
    }
}

/// Per-service resource limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceResources {
    /// Container memory limit in megabytes; 0 disables the limit.
    pub memory_limit_mb: u64,
}

impl Default for ServiceResources {
    fn default() -> Self {
        Self {
            memory_limit_mb: 256,
        }
    }
}

/// Compose healthcheck attached to a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServiceHealthcheck {
    /// Command run inside the container (CMD form).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Seconds between probes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u32>,
    /// Probe timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    /// Consecutive failures before the container is unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Grace period before probes count, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period_seconds: Option<u32>,
}

/// Service type for registry-hosted container images.
pub const SERVICE_TYPE_REGISTRY_IMAGE: &str = "registry-image";

/// A registered service in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    /// Stable server-assigned id.
    pub id: String,
    /// Unique (case-insensitive) service name.
    pub name: String,
    /// Service type; currently always `registry-image`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Container image reference.
    pub image: String,
    /// Port the container listens on.
    pub internal_port: u16,
    /// Public hostnames routed to this service.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    /// Environment variables; ordered map so generation is deterministic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Volume mounts, `host:container[:mode]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Optional compose healthcheck.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<ServiceHealthcheck>,
    /// Resource limits.
    #[serde(default)]
    pub resources: ServiceResources,
    /// Whether the service is included in generated bundles.
    pub enabled: bool,
    /// Set on successful promotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deploy: Option<DateTime<Utc>>,
    /// Live container status, derived at read time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Body of `POST /services`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceSpec {
    /// Optional client-supplied id; assigned by the server when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Service name; derived from the image when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Service type.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Container image reference (required).
    #[serde(default)]
    pub image: String,
    /// Container port; auto-detected from the image when absent.
    #[serde(default)]
    pub internal_port: Option<u16>,
    /// Public hostnames.
    #[serde(default)]
    pub hostnames: Vec<String>,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Volume mounts.
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Optional healthcheck.
    #[serde(default)]
    pub healthcheck: Option<ServiceHealthcheck>,
    /// Resource limits; defaulted when absent.
    #[serde(default)]
    pub resources: Option<ServiceResources>,
    /// Whether the service starts enabled (default true).
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Create a Cloudflare DNS record for each hostname.
    #[serde(default)]
    pub cloudflare: bool,
}

/// Body of `POST /deploy`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeployRequest {
    /// Single target service name.
    #[serde(default)]
    pub service: Option<String>,
    /// Additional target service names; the union with `service` is deployed.
    #[serde(default)]
    pub services: Vec<String>,
    /// Health-check timeout in milliseconds (default 60 000).
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Response of `POST /deploy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResponse {
    /// Always `deployed`.
    pub status: String,
    /// Promotion timestamp (RFC 3339).
    pub time: String,
}

/// Response of `POST /rollback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResponse {
    /// Always `rolled_back`.
    pub status: String,
    /// Name of the backup bundle that became current.
    pub from: String,
}

/// Response of `POST /webhook/deploy/{service}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeployResponse {
    /// Always `deployed`.
    pub status: String,
    /// The deployed service name.
    pub service: String,
    /// Promotion timestamp (RFC 3339).
    pub time: String,
}

/// Body of `POST /init`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InitRequest {
    /// Default domain to adopt.
    #[serde(default)]
    pub domain: Option<String>,
    /// Cloudflare API token (required).
    #[serde(default)]
    pub api_token: String,
    /// Tunnel name; defaults to `tinyserve-<hostname>`.
    #[serde(default)]
    pub tunnel_name: Option<String>,
    /// Cloudflare account id; discovered when the token sees one account.
    #[serde(default)]
    pub account_id: Option<String>,
}

/// Response of `POST /init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitResponse {
    /// Always `initialized`.
    pub status: String,
    /// Tunnel id that is now configured.
    pub tunnel_id: String,
    /// Tunnel name that is now configured.
    pub tunnel_name: String,
    /// Default domain that was adopted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Cloudflare account id.
    pub account_id: String,
    /// Whether the tunnel was created by this call.
    pub created: bool,
}

/// Body of `POST /remote/enable`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemoteEnableRequest {
    /// Legacy alias for `ui_hostname`.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Public hostname for the UI.
    #[serde(default)]
    pub ui_hostname: Option<String>,
    /// Public hostname for the webhook API.
    #[serde(default)]
    pub api_hostname: Option<String>,
    /// Also create DNS records and promote an infrastructure bundle.
    #[serde(default)]
    pub cloudflare: bool,
}

/// Body of `POST /tokens`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateTokenRequest {
    /// Human-readable token name.
    #[serde(default)]
    pub name: Option<String>,
}

/// A stored API token, without its hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    /// 16-hex-char token id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last successful authentication, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

/// Response of `POST /tokens`; the only place plaintext ever appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedToken {
    /// Token id.
    pub id: String,
    /// Token name.
    pub name: String,
    /// Plaintext bearer token, shown exactly once.
    pub token: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Reminder that the plaintext is not retrievable again.
    pub message: String,
}

/// Live summary of an infrastructure container (proxy or tunnel).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContainerSummary {
    /// Compose service name.
    pub service: String,
    /// Container state as reported by compose.
    pub state: String,
    /// Health, when the container declares a healthcheck.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
}

/// Response of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Always `ok`.
    pub status: String,
    /// Number of registered services.
    pub service_count: usize,
    /// Last state mutation (RFC 3339).
    pub updated_at: String,
    /// Proxy container summary, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ContainerSummary>,
    /// Tunnel container summary, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<ContainerSummary>,
    /// Tunnel identity, once initialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_config: Option<TunnelConfigSummary>,
    /// Whether a Cloudflare API token is stored.
    pub has_cloudflare_token: bool,
}

/// Tunnel identity reported by `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfigSummary {
    /// Tunnel id.
    pub id: String,
    /// Tunnel name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Default domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Response of `GET /version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    /// Crate version.
    pub version: String,
    /// Build commit, when injected at build time.
    pub commit: String,
    /// Build date, when injected at build time.
    pub date: String,
}

/// Health of one infrastructure endpoint in `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EndpointHealth {
    /// Whether the container state is `running`.
    pub running: bool,
    /// Raw container state.
    pub state: String,
    /// Health, when a healthcheck is declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    /// Failure description, when not running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` while the daemon can answer.
    pub daemon: String,
    /// Reverse-proxy container health.
    pub proxy: EndpointHealth,
    /// Tunnel container health.
    pub tunnel: EndpointHealth,
    /// True when both proxy and tunnel are running and healthy.
    pub healthy: bool,
    /// Status-query failure, when compose could not be consulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
