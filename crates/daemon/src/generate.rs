//! Deterministic bundle generation.
//!
//! A bundle is a staging directory holding the compose file, the tunnel
//! ingress config, and a proxy dynamic-config skeleton. Generation is a pure
//! function of the state snapshot (plus the listener ports): the same input
//! produces byte-identical files, and the previous `current/` is never read.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;

use common::api::{Service, TunnelMode};

use crate::paths::{create_private_dir, write_private_file};
use crate::state::State;

/// Host-side listener ports baked into the tunnel ingress rules.
#[derive(Debug, Clone, Copy)]
pub struct ListenerPorts {
    /// Port of the UI listener; remote UI hostnames route here.
    pub ui_port: u16,
    /// Port of the webhook listener; remote API hostnames route here.
    pub webhook_port: u16,
}

impl Default for ListenerPorts {
    fn default() -> Self {
        Self {
            ui_port: 7071,
            webhook_port: 7072,
        }
    }
}

/// Paths produced by one generation run.
#[derive(Debug, Clone)]
pub struct BundleOutput {
    /// The fresh staging directory.
    pub staging_dir: PathBuf,
    /// `docker-compose.yml` inside the staging dir.
    pub compose_path: PathBuf,
    /// `cloudflared/config.yml` inside the staging dir.
    pub cloudflared_path: PathBuf,
    /// `traefik/dynamic.yml` inside the staging dir.
    pub traefik_path: PathBuf,
    /// `services/` scratch dir inside the staging dir.
    pub services_root: PathBuf,
    /// Every public hostname the tunnel will route.
    pub hostnames: Vec<String>,
}

/// Generate a staging bundle under `root/.staging-<ts>`.
pub fn generate_bundle(
    state: &State,
    root: &Path,
    ports: ListenerPorts,
    ts: &str,
) -> anyhow::Result<BundleOutput> {
    let staging = root.join(format!(".staging-{ts}"));

    for dir in [
        staging.clone(),
        staging.join("traefik"),
        staging.join("cloudflared"),
        staging.join("services"),
    ] {
        create_private_dir(&dir)
            .with_context(|| format!("create staging dir {}", dir.display()))?;
    }

    let compose_path = staging.join("docker-compose.yml");
    let cloudflared_path = staging.join("cloudflared").join("config.yml");
    let traefik_path = staging.join("traefik").join("dynamic.yml");

    write_private_file(&compose_path, render_compose(state))
        .context("write docker-compose.yml")?;
    let hostnames = collect_hostnames(state);
    write_private_file(
        &cloudflared_path,
        render_cloudflared(state, &hostnames, ports),
    )
    .context("write cloudflared config")?;
    write_private_file(&traefik_path, render_traefik_dynamic())
        .context("write traefik dynamic config")?;

    Ok(BundleOutput {
        services_root: staging.join("services"),
        staging_dir: staging,
        compose_path,
        cloudflared_path,
        traefik_path,
        hostnames,
    })
}

/// Lowercase a name and squash anything outside `[a-z0-9-]` to dashes.
pub fn sanitize_name(name: &str) -> String {
    static SANITIZER: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9-]+").expect("sanitizer regex"));
    let lowered = name.trim().to_lowercase();
    SANITIZER
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

fn default_domain(state: &State) -> &str {
    state
        .settings
        .default_domain
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or("example.com")
}

fn render_compose(state: &State) -> String {
    let domain = default_domain(state);
    let whoami_host = format!("whoami.{domain}");

    let mut out = String::new();
    out.push_str(&format!(
        "name: {}\n",
        state.settings.compose_project_name
    ));
    out.push_str("services:\n");
    out.push_str(
        r#"  traefik:
    image: traefik:v3.0
    command:
      - --providers.docker=true
      - --providers.docker.exposedbydefault=false
      - --entrypoints.web.address=:80
      - --accesslog=true
    networks: [edge]
    volumes:
      - /var/run/docker.sock:/var/run/docker.sock:ro
    labels:
      - "traefik.enable=true"
    logging:
      driver: json-file
      options:
        max-size: "10m"
        max-file: "3"
    # No host ports published; access via cloudflared -> traefik
"#,
    );
    out.push_str(
        r#"  cloudflared:
    image: cloudflare/cloudflared:latest
    command: tunnel run
    volumes:
      - ./cloudflared:/etc/cloudflared
    networks: [edge]
    extra_hosts:
      - "host.docker.internal:host-gateway"
"#,
    );
    out.push_str(&format!(
        r#"  whoami:
    image: traefik/whoami:v1.10
    networks: [edge]
    labels:
      - "traefik.enable=true"
      - "traefik.http.routers.whoami.rule=Host(`{whoami_host}`)"
      - "traefik.http.services.whoami.loadbalancer.server.port=80"
"#,
    ));

    for svc in &state.services {
        if !svc.enabled {
            continue;
        }
        append_service(&mut out, svc, domain);
    }

    out.push_str("networks:\n  edge: {}\n");

    format!("{}\n", out.trim_end())
}

fn append_service(out: &mut String, svc: &Service, domain: &str) {
    let name = sanitize_name(&svc.name);
    if name.is_empty() {
        return;
    }
    out.push_str(&format!("  {name}:\n"));
    out.push_str(&format!("    image: {}\n", svc.image));
    out.push_str("    networks: [edge]\n");

    if !svc.env.is_empty() {
        out.push_str("    environment:\n");
        // BTreeMap iteration is already ascending by key.
        for (key, value) in &svc.env {
            out.push_str(&format!("      {key}: {}\n", yaml_quote(value)));
        }
    }

    if !svc.volumes.is_empty() {
        out.push_str("    volumes:\n");
        for vol in &svc.volumes {
            out.push_str(&format!("      - {vol}\n"));
        }
    }

    if let Some(hc) = &svc.healthcheck {
        out.push_str("    healthcheck:\n");
        if !hc.command.is_empty() {
            let quoted: Vec<String> = hc.command.iter().map(|c| yaml_quote(c)).collect();
            out.push_str(&format!("      test: [\"CMD\", {}]\n", quoted.join(", ")));
        }
        if let Some(interval) = hc.interval_seconds.filter(|v| *v > 0) {
            out.push_str(&format!("      interval: {interval}s\n"));
        }
        if let Some(timeout) = hc.timeout_seconds.filter(|v| *v > 0) {
            out.push_str(&format!("      timeout: {timeout}s\n"));
        }
        if let Some(retries) = hc.retries.filter(|v| *v > 0) {
            out.push_str(&format!("      retries: {retries}\n"));
        }
        if let Some(start) = hc.start_period_seconds.filter(|v| *v > 0) {
            out.push_str(&format!("      start_period: {start}s\n"));
        }
    }

    if svc.resources.memory_limit_mb > 0 {
        out.push_str("    deploy:\n");
        out.push_str("      resources:\n");
        out.push_str("        limits:\n");
        out.push_str(&format!(
            "          memory: {}m\n",
            svc.resources.memory_limit_mb
        ));
    }

    let labels = traefik_labels(&name, svc, domain);
    if !labels.is_empty() {
        out.push_str("    labels:\n");
        for label in labels {
            out.push_str(&format!("      - {}\n", yaml_quote(&label)));
        }
    }
}

fn traefik_labels(name: &str, svc: &Service, domain: &str) -> Vec<String> {
    let mut labels = vec![format!("traefik.enable={}", svc.enabled)];

    let fallback;
    let hosts: &[String] = if svc.hostnames.is_empty() && !domain.is_empty() {
        fallback = [format!("{name}.{domain}")];
        &fallback
    } else {
        &svc.hostnames
    };
    for (i, host) in hosts.iter().enumerate() {
        let router = format!("{name}-{i}");
        labels.push(format!("traefik.http.routers.{router}.rule=Host(`{host}`)"));
        labels.push(format!("traefik.http.routers.{router}.entrypoints=web"));
        labels.push(format!("traefik.http.routers.{router}.service={name}"));
    }
    if svc.internal_port > 0 {
        labels.push(format!(
            "traefik.http.services.{name}.loadbalancer.server.port={}",
            svc.internal_port
        ));
    }
    labels
}

fn render_cloudflared(state: &State, hostnames: &[String], ports: ListenerPorts) -> String {
    let mut hosts: Vec<String> = if hostnames.is_empty() {
        vec!["whoami.example.com".to_string()]
    } else {
        hostnames.to_vec()
    };
    hosts.sort_by_key(|h| h.to_lowercase());

    let mut out = String::new();
    let tunnel_id = state
        .settings
        .tunnel
        .tunnel_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .unwrap_or("YOUR_TUNNEL_ID");
    out.push_str(&format!("tunnel: {tunnel_id}\n"));

    match (&state.settings.tunnel.mode, &state.settings.tunnel.credentials_file) {
        (TunnelMode::CredentialsFile, Some(file)) if !file.is_empty() => {
            out.push_str(&format!("credentials-file: {file}\n"));
        }
        _ => {
            out.push_str("credentials-file: /etc/cloudflared/credentials.json\n");
            if let Some(token) = state
                .settings
                .tunnel
                .token
                .as_deref()
                .filter(|t| !t.is_empty())
            {
                out.push_str(&format!("token: {token}\n"));
            }
        }
    }

    out.push_str("ingress:\n");
    let ui_host = remote_ui_hostname(state);
    let api_host = remote_api_hostname(state);
    for host in &hosts {
        let service = if ui_host.is_some_and(|ui| host.eq_ignore_ascii_case(ui)) {
            format!("http://host.docker.internal:{}", ports.ui_port)
        } else if api_host.is_some_and(|api| host.eq_ignore_ascii_case(api)) {
            format!("http://host.docker.internal:{}", ports.webhook_port)
        } else {
            "http://traefik:80".to_string()
        };
        out.push_str(&format!("  - hostname: {host}\n    service: {service}\n"));
    }
    out.push_str("  - service: http_status:404\n");
    out
}

fn render_traefik_dynamic() -> String {
    "http:\n  middlewares: {}\n  routers: {}\n  services: {}\n".to_string()
}

fn remote_ui_hostname(state: &State) -> Option<&str> {
    state
        .settings
        .remote
        .ui_hostname
        .as_deref()
        .filter(|h| !h.is_empty())
}

fn remote_api_hostname(state: &State) -> Option<&str> {
    state
        .settings
        .remote
        .api_hostname
        .as_deref()
        .filter(|h| !h.is_empty())
}

fn collect_hostnames(state: &State) -> Vec<String> {
    let domain = default_domain(state);
    let mut hosts = vec![format!("whoami.{domain}")];
    for svc in &state.services {
        if !svc.enabled {
            continue;
        }
        if !svc.hostnames.is_empty() {
            hosts.extend(svc.hostnames.iter().cloned());
        } else if !svc.name.is_empty() {
            hosts.push(format!("{}.{domain}", sanitize_name(&svc.name)));
        }
    }
    if state.settings.remote.enabled {
        if let Some(ui) = remote_ui_hostname(state) {
            hosts.push(ui.to_string());
        }
        if let Some(api) = remote_api_hostname(state) {
            hosts.push(api.to_string());
        }
    }
    dedup_case_insensitive(hosts)
}

fn dedup_case_insensitive(hosts: Vec<String>) -> Vec<String> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for host in hosts {
        if host.is_empty() {
            continue;
        }
        let lower = host.to_lowercase();
        if seen.contains(&lower) {
            continue;
        }
        seen.push(lower);
        out.push(host);
    }
    out
}

// Double-quote a scalar the way the compose file expects; validators have
// already rejected newlines and null bytes for every value that lands here.
fn yaml_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
