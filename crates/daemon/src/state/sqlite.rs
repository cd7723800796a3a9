//! SQLite-backed store.
//!
//! One document, three tables plus a `schema_version` marker. Complex
//! service fields are embedded JSON. WAL mode and a busy timeout let a
//! second writer block briefly instead of failing; an in-process mutex
//! serializes writers on top of that.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;

use common::api::{
    GlobalSettings, RemoteSettings, Service, ServiceHealthcheck, ServiceResources, TunnelMode,
    TunnelSettings,
};

use super::{ApiToken, State, Store, StoreError};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Durable store backed by a single SQLite database file.
pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Persistence(err.into())
    }
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create state dir {}", parent.display()))?;
            }
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(opts)
            .await
            .context("open sqlite state db")?;

        MIGRATOR
            .run(&pool)
            .await
            .context("apply state db migrations")?;

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    /// The underlying pool, for diagnostics.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(FromRow)]
struct SettingsRow {
    compose_project_name: String,
    default_domain: Option<String>,
    tunnel_mode: String,
    tunnel_token: Option<String>,
    tunnel_credentials_file: Option<String>,
    tunnel_id: Option<String>,
    tunnel_name: Option<String>,
    tunnel_account_id: Option<String>,
    ui_local_port: i64,
    max_backups: i64,
    remote: Option<String>,
    cloudflare_api_token: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ServiceRow {
    id: String,
    name: String,
    #[sqlx(rename = "type")]
    kind: String,
    image: String,
    internal_port: i64,
    hostnames: Option<String>,
    env: Option<String>,
    volumes: Option<String>,
    healthcheck: Option<String>,
    memory_limit_mb: i64,
    enabled: bool,
    last_deploy: Option<DateTime<Utc>>,
    status: Option<String>,
}

#[derive(FromRow)]
struct TokenRow {
    id: String,
    name: String,
    hash: String,
    created_at: DateTime<Utc>,
    last_used: Option<DateTime<Utc>>,
}

fn tunnel_mode_from_str(mode: &str) -> TunnelMode {
    match mode {
        "credentials_file" => TunnelMode::CredentialsFile,
        _ => TunnelMode::Token,
    }
}

fn decode_json<T: serde::de::DeserializeOwned + Default>(raw: Option<String>) -> T {
    raw.filter(|s| !s.is_empty())
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

impl ServiceRow {
    fn into_service(self) -> Service {
        let healthcheck: Option<ServiceHealthcheck> = self
            .healthcheck
            .filter(|s| !s.is_empty())
            .and_then(|s| serde_json::from_str(&s).ok());
        Service {
            id: self.id,
            name: self.name,
            kind: self.kind,
            image: self.image,
            internal_port: u16::try_from(self.internal_port).unwrap_or_default(),
            hostnames: decode_json(self.hostnames),
            env: decode_json(self.env),
            volumes: decode_json(self.volumes),
            healthcheck,
            resources: ServiceResources {
                memory_limit_mb: u64::try_from(self.memory_limit_mb).unwrap_or_default(),
            },
            enabled: self.enabled,
            last_deploy: self.last_deploy,
            status: self.status,
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load(&self) -> Result<State, StoreError> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT compose_project_name, default_domain, tunnel_mode, tunnel_token,
                   tunnel_credentials_file, tunnel_id, tunnel_name, tunnel_account_id,
                   ui_local_port, max_backups, remote, cloudflare_api_token,
                   created_at, updated_at
            FROM settings WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        // No singleton row yet: a freshly defaulted document, not an error.
        let Some(row) = row else {
            return Ok(State::new());
        };

        let remote: RemoteSettings = decode_json(row.remote);
        let settings = GlobalSettings {
            compose_project_name: row.compose_project_name,
            default_domain: row.default_domain,
            tunnel: TunnelSettings {
                mode: tunnel_mode_from_str(&row.tunnel_mode),
                token: row.tunnel_token,
                credentials_file: row.tunnel_credentials_file,
                tunnel_id: row.tunnel_id,
                tunnel_name: row.tunnel_name,
                account_id: row.tunnel_account_id,
            },
            ui_local_port: u16::try_from(row.ui_local_port).unwrap_or(7070),
            max_backups: usize::try_from(row.max_backups).unwrap_or(10),
            remote,
            cloudflare_api_token: row.cloudflare_api_token,
        };

        let services = sqlx::query_as::<_, ServiceRow>(
            r#"
            SELECT id, name, type, image, internal_port, hostnames, env, volumes,
                   healthcheck, memory_limit_mb, enabled, last_deploy, status
            FROM services
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ServiceRow::into_service)
        .collect();

        let tokens = sqlx::query_as::<_, TokenRow>(
            "SELECT id, name, hash, created_at, last_used FROM tokens ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| ApiToken {
            id: row.id,
            name: row.name,
            hash: row.hash,
            created_at: row.created_at,
            last_used: row.last_used,
        })
        .collect();

        Ok(State {
            settings,
            services,
            tokens,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    async fn save(&self, mut state: State) -> Result<(), StoreError> {
        state.validate()?;

        let _guard = self.write_lock.lock().await;
        state.touch();

        let mut tx = self.pool.begin().await?;

        let remote =
            serde_json::to_string(&state.settings.remote).map_err(anyhow::Error::from)?;
        sqlx::query(
            r#"
            INSERT INTO settings (id, compose_project_name, default_domain, tunnel_mode,
                                  tunnel_token, tunnel_credentials_file, tunnel_id, tunnel_name,
                                  tunnel_account_id, ui_local_port, max_backups, remote,
                                  cloudflare_api_token, created_at, updated_at)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                compose_project_name = excluded.compose_project_name,
                default_domain = excluded.default_domain,
                tunnel_mode = excluded.tunnel_mode,
                tunnel_token = excluded.tunnel_token,
                tunnel_credentials_file = excluded.tunnel_credentials_file,
                tunnel_id = excluded.tunnel_id,
                tunnel_name = excluded.tunnel_name,
                tunnel_account_id = excluded.tunnel_account_id,
                ui_local_port = excluded.ui_local_port,
                max_backups = excluded.max_backups,
                remote = excluded.remote,
                cloudflare_api_token = excluded.cloudflare_api_token,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.settings.compose_project_name)
        .bind(&state.settings.default_domain)
        .bind(state.settings.tunnel.mode.as_str())
        .bind(&state.settings.tunnel.token)
        .bind(&state.settings.tunnel.credentials_file)
        .bind(&state.settings.tunnel.tunnel_id)
        .bind(&state.settings.tunnel.tunnel_name)
        .bind(&state.settings.tunnel.account_id)
        .bind(i64::from(state.settings.ui_local_port))
        .bind(i64::try_from(state.settings.max_backups).unwrap_or(10))
        .bind(&remote)
        .bind(&state.settings.cloudflare_api_token)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&mut *tx)
        .await?;

        // Full-document replacement: rows absent from the new sets are gone.
        let existing: Vec<(String,)> = sqlx::query_as("SELECT id FROM services")
            .fetch_all(&mut *tx)
            .await?;
        for (id,) in existing {
            if !state.services.iter().any(|svc| svc.id == id) {
                sqlx::query("DELETE FROM services WHERE id = ?1")
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for svc in &state.services {
            let hostnames =
                serde_json::to_string(&svc.hostnames).map_err(anyhow::Error::from)?;
            let env = serde_json::to_string(&svc.env).map_err(anyhow::Error::from)?;
            let volumes = serde_json::to_string(&svc.volumes).map_err(anyhow::Error::from)?;
            let healthcheck = match &svc.healthcheck {
                Some(hc) => Some(serde_json::to_string(hc).map_err(anyhow::Error::from)?),
                None => None,
            };
            sqlx::query(
                r#"
                INSERT INTO services (id, name, type, image, internal_port, hostnames, env,
                                      volumes, healthcheck, memory_limit_mb, enabled,
                                      last_deploy, status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    type = excluded.type,
                    image = excluded.image,
                    internal_port = excluded.internal_port,
                    hostnames = excluded.hostnames,
                    env = excluded.env,
                    volumes = excluded.volumes,
                    healthcheck = excluded.healthcheck,
                    memory_limit_mb = excluded.memory_limit_mb,
                    enabled = excluded.enabled,
                    last_deploy = excluded.last_deploy,
                    status = excluded.status
                "#,
            )
            .bind(&svc.id)
            .bind(&svc.name)
            .bind(&svc.kind)
            .bind(&svc.image)
            .bind(i64::from(svc.internal_port))
            .bind(&hostnames)
            .bind(&env)
            .bind(&volumes)
            .bind(&healthcheck)
            .bind(i64::try_from(svc.resources.memory_limit_mb).unwrap_or_default())
            .bind(svc.enabled)
            .bind(svc.last_deploy)
            .bind(&svc.status)
            .execute(&mut *tx)
            .await?;
        }

        let existing: Vec<(String,)> = sqlx::query_as("SELECT id FROM tokens")
            .fetch_all(&mut *tx)
            .await?;
        for (id,) in existing {
            if !state.tokens.iter().any(|tok| tok.id == id) {
                sqlx::query("DELETE FROM tokens WHERE id = ?1")
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for tok in &state.tokens {
            sqlx::query(
                r#"
                INSERT INTO tokens (id, name, hash, created_at, last_used)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    hash = excluded.hash,
                    last_used = excluded.last_used
                "#,
            )
            .bind(&tok.id)
            .bind(&tok.name)
            .bind(&tok.hash)
            .bind(tok.created_at)
            .bind(tok.last_used)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
