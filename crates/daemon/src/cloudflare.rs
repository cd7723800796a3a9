//! Cloudflare API client for tunnel provisioning and DNS.
//!
//! Used only by `/init`, `/remote/enable`, and hostname setup on service
//! creation. Every call is idempotent from the caller's perspective;
//! failures surface unchanged.

use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// A Cloudflare API client bound to one API token.
pub struct CloudflareClient {
    token: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    message: String,
}

fn error_message(errors: &[ApiError]) -> String {
    if errors.is_empty() {
        return "unknown error".to_string();
    }
    errors
        .iter()
        .map(|e| format!("[{}] {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A Cloudflare account visible to the token.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    /// Account id.
    pub id: String,
    /// Account display name.
    pub name: String,
}

/// A named Cloudflare tunnel.
#[derive(Debug, Clone, Deserialize)]
pub struct Tunnel {
    /// Tunnel id.
    pub id: String,
    /// Tunnel name.
    pub name: String,
    /// Deletion marker; deleted tunnels keep their name.
    #[serde(default)]
    pub deleted_at: Option<String>,
}

/// Credentials for running cloudflared against a tunnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelCredentials {
    /// Owning account id.
    #[serde(rename = "AccountTag")]
    pub account_tag: String,
    /// Tunnel id.
    #[serde(rename = "TunnelID")]
    pub tunnel_id: String,
    /// Tunnel name.
    #[serde(rename = "TunnelName")]
    pub tunnel_name: String,
    /// Base64 tunnel secret.
    #[serde(rename = "TunnelSecret")]
    pub tunnel_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Zone {
    id: String,
}

/// A DNS record in a zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Record id.
    #[serde(default)]
    pub id: String,
    /// Record type (`A`, `AAAA`, `CNAME`, …).
    #[serde(rename = "type")]
    pub record_type: String,
    /// Record name (the hostname).
    pub name: String,
    /// Record target.
    pub content: String,
    /// TTL; 1 means automatic.
    pub ttl: u32,
    /// Whether the record is proxied through Cloudflare.
    pub proxied: bool,
}

impl CloudflareClient {
    /// Build a client for `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.request(reqwest::Method::GET, path, None::<&()>).await
    }

    async fn request<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> anyhow::Result<T> {
        let mut req = self
            .http
            .request(method, format!("{API_BASE}{path}"))
            .bearer_auth(&self.token)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.context("contact Cloudflare API")?;
        let parsed: ApiResponse<T> = resp.json().await.context("parse Cloudflare response")?;
        if !parsed.success {
            anyhow::bail!("cloudflare: {}", error_message(&parsed.errors));
        }
        parsed
            .result
            .ok_or_else(|| anyhow::anyhow!("cloudflare: response carried no result"))
    }

    /// Accounts the token can see.
    pub async fn list_accounts(&self) -> anyhow::Result<Vec<Account>> {
        self.get("/accounts").await
    }

    /// The single account id, or an error asking for an explicit one.
    pub async fn account_id(&self) -> anyhow::Result<String> {
        let accounts = self.list_accounts().await?;
        match accounts.len() {
            0 => anyhow::bail!("no accounts found for this API token"),
            1 => Ok(accounts.into_iter().next().map(|a| a.id).unwrap_or_default()),
            _ => anyhow::bail!("multiple accounts found, please specify account_id"),
        }
    }

    /// Tunnels registered under `account_id`.
    pub async fn list_tunnels(&self, account_id: &str) -> anyhow::Result<Vec<Tunnel>> {
        self.get(&format!("/accounts/{account_id}/cfd_tunnel")).await
    }

    /// Find a live tunnel by name; `None` when absent.
    pub async fn find_tunnel(
        &self,
        account_id: &str,
        name: &str,
    ) -> anyhow::Result<Option<Tunnel>> {
        let tunnels = self.list_tunnels(account_id).await?;
        Ok(tunnels
            .into_iter()
            .find(|t| t.name == name && t.deleted_at.as_deref().unwrap_or("").is_empty()))
    }

    /// Create a named tunnel, returning it plus freshly minted credentials.
    pub async fn create_tunnel(
        &self,
        account_id: &str,
        name: &str,
    ) -> anyhow::Result<(Tunnel, TunnelCredentials)> {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        let secret_b64 = base64::engine::general_purpose::STANDARD.encode(secret);

        let body = serde_json::json!({
            "name": name,
            "tunnel_secret": secret_b64,
        });
        let tunnel: Tunnel = self
            .request(
                reqwest::Method::POST,
                &format!("/accounts/{account_id}/cfd_tunnel"),
                Some(&body),
            )
            .await?;

        let creds = TunnelCredentials {
            account_tag: account_id.to_string(),
            tunnel_id: tunnel.id.clone(),
            tunnel_name: tunnel.name.clone(),
            tunnel_secret: secret_b64,
        };
        Ok((tunnel, creds))
    }

    /// Fetch the run token cloudflared uses to connect.
    pub async fn tunnel_token(&self, account_id: &str, tunnel_id: &str) -> anyhow::Result<String> {
        self.get(&format!("/accounts/{account_id}/cfd_tunnel/{tunnel_id}/token"))
            .await
    }

    /// Find the zone containing `hostname`, walking up its dot-suffixes.
    /// For `staging.app.example.com` it tries `staging.app.example.com`,
    /// `app.example.com`, then `example.com`.
    pub async fn find_zone_for_hostname(&self, hostname: &str) -> anyhow::Result<String> {
        let labels: Vec<&str> = hostname.split('.').filter(|l| !l.is_empty()).collect();
        for start in 0..labels.len().saturating_sub(1) {
            let candidate = labels[start..].join(".");
            let zones: Vec<Zone> = self
                .get(&format!("/zones?name={candidate}&status=active"))
                .await?;
            if let Some(zone) = zones.into_iter().next() {
                return Ok(zone.id);
            }
        }
        anyhow::bail!("no zone found for hostname: {hostname}")
    }

    /// DNS records of `record_type` named `name` in the zone.
    pub async fn list_dns_records(
        &self,
        zone_id: &str,
        record_type: &str,
        name: &str,
    ) -> anyhow::Result<Vec<DnsRecord>> {
        self.get(&format!(
            "/zones/{zone_id}/dns_records?type={record_type}&name={name}"
        ))
        .await
    }

    /// Ensure a proxied CNAME from `name` to `target`, deleting conflicting
    /// `A`/`AAAA` records first. Creates or updates as needed.
    pub async fn ensure_cname(
        &self,
        zone_id: &str,
        name: &str,
        target: &str,
        proxied: bool,
    ) -> anyhow::Result<()> {
        for record_type in ["A", "AAAA"] {
            let conflicting = self
                .list_dns_records(zone_id, record_type, name)
                .await
                .with_context(|| format!("list {record_type} records"))?;
            for record in conflicting {
                self.delete_dns_record(zone_id, &record.id)
                    .await
                    .with_context(|| format!("delete conflicting {record_type} record"))?;
            }
        }

        let existing = self.list_dns_records(zone_id, "CNAME", name).await?;
        let desired = DnsRecord {
            id: String::new(),
            record_type: "CNAME".to_string(),
            name: name.to_string(),
            content: target.to_string(),
            ttl: 1,
            proxied,
        };

        match existing.into_iter().next() {
            None => {
                let _: DnsRecord = self
                    .request(
                        reqwest::Method::POST,
                        &format!("/zones/{zone_id}/dns_records"),
                        Some(&desired),
                    )
                    .await?;
            }
            Some(record) if record.content == target && record.proxied == proxied => {}
            Some(record) => {
                let _: DnsRecord = self
                    .request(
                        reqwest::Method::PUT,
                        &format!("/zones/{zone_id}/dns_records/{}", record.id),
                        Some(&desired),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Delete a DNS record by id.
    pub async fn delete_dns_record(&self, zone_id: &str, record_id: &str) -> anyhow::Result<()> {
        let _: serde_json::Value = self
            .request(
                reqwest::Method::DELETE,
                &format!("/zones/{zone_id}/dns_records/{record_id}"),
                None::<&()>,
            )
            .await?;
        Ok(())
    }
}

/// The CNAME target for a tunnel id.
pub fn tunnel_cname_target(tunnel_id: &str) -> String {
    format!("{tunnel_id}.cfargotunnel.com")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_successful_tunnel_response() {
        let json = r#"{
            "success": true,
            "result": {
                "id": "f70ff985-a4ef-4643-bbbc-4a0ed4fc8415",
                "name": "tinyserve-host",
                "created_at": "2026-01-01T00:00:00Z",
                "status": "inactive"
            },
            "errors": [],
            "messages": []
        }"#;
        let resp: ApiResponse<Tunnel> = serde_json::from_str(json).unwrap();
        assert!(resp.success);
        let tunnel = resp.result.unwrap();
        assert_eq!(tunnel.name, "tinyserve-host");
        assert!(tunnel.deleted_at.is_none());
    }

    #[test]
    fn parses_error_response() {
        let json = r#"{
            "success": false,
            "result": null,
            "errors": [{"code": 1003, "message": "Invalid or missing account id"}]
        }"#;
        let resp: ApiResponse<Tunnel> = serde_json::from_str(json).unwrap();
        assert!(!resp.success);
        assert_eq!(
            error_message(&resp.errors),
            "[1003] Invalid or missing account id"
        );
    }

    #[test]
    fn credentials_serialize_with_cloudflared_field_names() {
        let creds = TunnelCredentials {
            account_tag: "acct".into(),
            tunnel_id: "tid".into(),
            tunnel_name: "tname".into(),
            tunnel_secret: "c2VjcmV0".into(),
        };
        let json = serde_json::to_string(&creds).unwrap();
        assert!(json.contains("\"AccountTag\":\"acct\""));
        assert!(json.contains("\"TunnelID\":\"tid\""));
        assert!(json.contains("\"TunnelSecret\":\"c2VjcmV0\""));
    }

    #[test]
    fn cname_target_shape() {
        assert_eq!(tunnel_cname_target("abc-123"), "abc-123.cfargotunnel.com");
    }
}
