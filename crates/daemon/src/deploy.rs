//! The staged apply-and-promote engine.
//!
//! One deploy walks: generate → pull → backup → up → wait-healthy →
//! promote → prune. Health failures restore the backed-up bundle and bring
//! it back up. Promotion is a same-filesystem rename, so a reader of
//! `current/` sees either the old bundle or the new one, never a mix.
//!
//! Backup strategy is copy-only: BACKUP copies `current/` to
//! `backups/backup-<ts>/`, and PROMOTE deletes the old `current/` before
//! renaming staging into place. Exactly one backup artifact per deploy.
//!
//! Concurrency: a single-flight gate per engine. An overlapping deploy or
//! rollback is rejected with a busy error rather than queued.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::compose::{wait_healthy, ComposeBackend, ComposeError};
use crate::generate::{generate_bundle, ListenerPorts};
use crate::paths::{copy_dir, create_private_dir, write_private_file, DataPaths};
use crate::state::{State, Store};

const DEFAULT_MAX_BACKUPS: usize = 10;
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Deploy failures, one variant per phase so the API body can name it.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Another deploy or rollback currently holds the gate.
    #[error("another deploy is already in progress")]
    Busy,
    /// Bundle generation failed; nothing was touched.
    #[error("generate: {0}")]
    Generate(#[source] anyhow::Error),
    /// Image pull failed before any backup was taken.
    #[error("docker pull: {0}")]
    Pull(#[source] ComposeError),
    /// Writing the state snapshot failed.
    #[error("backup state: {0}")]
    BackupState(#[source] anyhow::Error),
    /// Copying `current/` aside failed.
    #[error("backup config: {0}")]
    BackupConfig(#[source] anyhow::Error),
    /// A post-backup phase failed and the previous bundle was restored.
    #[error("{phase} failed, rolled back: {source}")]
    RolledBack {
        /// The phase that failed (`docker up` or `health check`).
        phase: &'static str,
        /// The failure itself.
        #[source]
        source: anyhow::Error,
    },
    /// A post-backup phase failed and so did the restore; both messages kept.
    #[error("{phase} failed: {source}; rollback also failed: {restore}")]
    RestoreFailed {
        /// The phase that failed.
        phase: &'static str,
        /// The original failure.
        source: anyhow::Error,
        /// The restore failure.
        restore: anyhow::Error,
    },
    /// The atomic cutover failed after health passed.
    #[error("promote staging: {0}")]
    Promote(#[source] anyhow::Error),
    /// Manual rollback found nothing to roll back to.
    #[error("no backups found")]
    NoBackups,
    /// Manual rollback could not restore the chosen backup.
    #[error("restore backup: {0}")]
    Restore(#[source] anyhow::Error),
    /// Containers failed to come up from the restored bundle.
    #[error("docker up after rollback: {0}")]
    UpAfterRollback(#[source] ComposeError),
}

/// Coordinates single deploys against the generated-bundle directories.
pub struct DeployEngine {
    store: Arc<dyn Store>,
    compose: Arc<dyn ComposeBackend>,
    paths: DataPaths,
    ports: ListenerPorts,
    poll_interval: Duration,
    gate: Mutex<()>,
}

impl DeployEngine {
    /// Build an engine over the shared store, compose backend, and data dirs.
    pub fn new(
        store: Arc<dyn Store>,
        compose: Arc<dyn ComposeBackend>,
        paths: DataPaths,
        ports: ListenerPorts,
    ) -> Self {
        Self {
            store,
            compose,
            paths,
            ports,
            poll_interval: HEALTH_POLL_INTERVAL,
            gate: Mutex::new(()),
        }
    }

    /// Override the health poll cadence (tests).
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The live bundle directory.
    pub fn current_dir(&self) -> PathBuf {
        self.paths.current_dir()
    }

    /// Run one apply restricted to `targets` (empty means every service).
    /// Returns the promotion timestamp on success.
    pub async fn apply(
        &self,
        state: &State,
        targets: &[String],
        timeout: Duration,
    ) -> Result<DateTime<Utc>, DeployError> {
        let _guard = self.gate.try_lock().map_err(|_| DeployError::Busy)?;

        let ts = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        info!(%ts, ?targets, "deploy: generating config");
        let out = generate_bundle(state, &self.paths.generated_root, self.ports, &ts)
            .map_err(DeployError::Generate)?;

        info!("deploy: docker pull start");
        match self.compose.pull(&out.staging_dir, targets).await {
            Ok(_) => {}
            Err(err) if err.is_no_such_service() => {
                // A target naming an infrastructure component that is not a
                // bundle service yet; the up below will materialize it.
            }
            Err(err) => {
                self.discard_staging(&out.staging_dir);
                return Err(DeployError::Pull(err));
            }
        }
        info!("deploy: docker pull complete");

        if let Err(err) = self.backup_state(state, &ts) {
            self.discard_staging(&out.staging_dir);
            return Err(DeployError::BackupState(err));
        }
        if let Err(err) = self.backup_current(&ts) {
            self.discard_staging(&out.staging_dir);
            return Err(DeployError::BackupConfig(err));
        }

        info!("deploy: docker up start");
        if let Err(err) = self.compose.up(&out.staging_dir, targets).await {
            return self
                .restore_and_fail("docker up", err.into(), &ts, &out.staging_dir)
                .await;
        }
        info!("deploy: docker up complete");

        info!("deploy: wait healthy start");
        if let Err(err) = wait_healthy(
            self.compose.as_ref(),
            &out.staging_dir,
            targets,
            timeout,
            self.poll_interval,
        )
        .await
        {
            return self
                .restore_and_fail("health check", err.into(), &ts, &out.staging_dir)
                .await;
        }
        info!("deploy: wait healthy complete");

        info!("deploy: promote staging");
        self.promote(&out.staging_dir).map_err(DeployError::Promote)?;

        let max_backups = match state.settings.max_backups {
            0 => DEFAULT_MAX_BACKUPS,
            n => n,
        };
        if let Err(err) = self.prune_backups(max_backups) {
            warn!(error = %err, "deploy: prune backups failed");
        }

        Ok(Utc::now())
    }

    /// Regenerate and promote without starting containers or waiting for
    /// health. Used by remote-enable so the caller returns promptly.
    pub async fn promote_infra_only(&self, state: &State) -> Result<(), DeployError> {
        let _guard = self.gate.try_lock().map_err(|_| DeployError::Busy)?;

        let ts = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let out = generate_bundle(state, &self.paths.generated_root, self.ports, &ts)
            .map_err(DeployError::Generate)?;
        self.backup_current(&ts).map_err(DeployError::BackupConfig)?;
        self.promote(&out.staging_dir).map_err(DeployError::Promote)?;
        Ok(())
    }

    /// Manual rollback: the newest backup bundle becomes `current/`, the old
    /// `current/` is kept as a pre-rollback backup, and containers are
    /// brought up from the restored bundle. Returns the backup name.
    pub async fn rollback(&self) -> Result<String, DeployError> {
        let _guard = self.gate.try_lock().map_err(|_| DeployError::Busy)?;

        let target = self.latest_backup_dir().ok_or(DeployError::NoBackups)?;
        let target_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let current = self.paths.current_dir();
        if current.exists() {
            let aside = self.paths.backups_dir.join(format!(
                "backup-{}-pre-rollback",
                Utc::now().format("%Y%m%d-%H%M%S")
            ));
            let _ = fs::remove_dir_all(&aside);
            fs::rename(&current, &aside)
                .context("move current aside")
                .map_err(DeployError::Restore)?;
        }
        fs::rename(&target, &current)
            .context("rename backup to current")
            .map_err(DeployError::Restore)?;

        self.compose
            .up(&current, &[])
            .await
            .map_err(DeployError::UpAfterRollback)?;

        // Best-effort: put the matching state snapshot back through the store.
        if let Some(ts) = target_name.strip_prefix("backup-") {
            let snapshot = self.paths.backups_dir.join(format!("state-{ts}.json"));
            if snapshot.exists() {
                match fs::read_to_string(&snapshot)
                    .map_err(anyhow::Error::from)
                    .and_then(|raw| serde_json::from_str::<State>(&raw).map_err(Into::into))
                {
                    Ok(restored) => {
                        if let Err(err) = self.store.save(restored).await {
                            warn!(error = %err, "rollback: state snapshot restore failed");
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "rollback: state snapshot unreadable");
                    }
                }
            }
        }

        Ok(target_name)
    }

    async fn restore_and_fail(
        &self,
        phase: &'static str,
        source: anyhow::Error,
        ts: &str,
        staging: &Path,
    ) -> Result<DateTime<Utc>, DeployError> {
        warn!(%phase, error = %source, "deploy: failed, restoring previous bundle");
        let result = match self.restore_backup(ts).await {
            Ok(()) => Err(DeployError::RolledBack { phase, source }),
            Err(restore) => Err(DeployError::RestoreFailed {
                phase,
                source,
                restore,
            }),
        };
        self.discard_staging(staging);
        result
    }

    // Restore `backups/backup-<ts>/` over `current/` and bring it up.
    async fn restore_backup(&self, ts: &str) -> anyhow::Result<()> {
        let backup = self.paths.backups_dir.join(format!("backup-{ts}"));
        if !backup.exists() {
            anyhow::bail!("backup not found: {}", backup.display());
        }

        let current = self.paths.current_dir();
        if current.exists() {
            fs::remove_dir_all(&current).context("remove partial current")?;
        }
        copy_dir(&backup, &current).context("restore backup")?;

        self.compose
            .up(&current, &[])
            .await
            .context("docker up after rollback")?;
        Ok(())
    }

    // Atomic cutover: delete the old current (already copied to backups) and
    // rename staging into place. Rename is the only promotion primitive.
    fn promote(&self, staging: &Path) -> anyhow::Result<()> {
        let current = self.paths.current_dir();
        if current.exists() {
            fs::remove_dir_all(&current).context("remove old current")?;
        }
        fs::rename(staging, &current).context("rename staging to current")?;
        Ok(())
    }

    fn backup_state(&self, state: &State, ts: &str) -> anyhow::Result<()> {
        create_private_dir(&self.paths.backups_dir).context("ensure backups dir")?;
        let dst = self.paths.backups_dir.join(format!("state-{ts}.json"));
        let raw = serde_json::to_string_pretty(state).context("serialize state snapshot")?;
        write_private_file(&dst, raw).context("write state snapshot")?;
        Ok(())
    }

    fn backup_current(&self, ts: &str) -> anyhow::Result<()> {
        let current = self.paths.current_dir();
        if !current.exists() {
            return Ok(());
        }
        create_private_dir(&self.paths.backups_dir).context("ensure backups dir")?;
        let backup = self.paths.backups_dir.join(format!("backup-{ts}"));
        // Never overwrite an existing backup path; a duplicate timestamp
        // means the clock moved or two deploys raced.
        if backup.exists() {
            anyhow::bail!("backup already exists: {}", backup.display());
        }
        copy_dir(&current, &backup).context("copy current to backup")?;
        Ok(())
    }

    fn discard_staging(&self, staging: &Path) {
        if let Err(err) = fs::remove_dir_all(staging) {
            warn!(dir = %staging.display(), error = %err, "deploy: staging cleanup failed");
        }
    }

    fn latest_backup_dir(&self) -> Option<PathBuf> {
        let mut backups: Vec<PathBuf> = fs::read_dir(&self.paths.backups_dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_name().to_string_lossy().starts_with("backup-")
                    && entry.path().is_dir()
            })
            .map(|entry| entry.path())
            .collect();
        backups.sort();
        backups.pop()
    }

    // Keep the newest `max_keep` of each backup kind; names embed the
    // timestamp, so lexicographic order is chronological order.
    fn prune_backups(&self, max_keep: usize) -> anyhow::Result<()> {
        let entries = match fs::read_dir(&self.paths.backups_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let mut backup_dirs = Vec::new();
        let mut state_files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("backup-") && entry.path().is_dir() {
                backup_dirs.push(name);
            } else if name.starts_with("state-") && name.ends_with(".json") {
                state_files.push(name);
            }
        }
        backup_dirs.sort();
        state_files.sort();

        if backup_dirs.len() > max_keep {
            for name in &backup_dirs[..backup_dirs.len() - max_keep] {
                let _ = fs::remove_dir_all(self.paths.backups_dir.join(name));
            }
        }
        if state_files.len() > max_keep {
            for name in &state_files[..state_files.len() - max_keep] {
                let _ = fs::remove_file(self.paths.backups_dir.join(name));
            }
        }
        Ok(())
    }
}
