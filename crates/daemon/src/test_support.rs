//! In-process fakes shared by unit and integration tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::compose::{ComposeBackend, ComposeError, ContainerStatus};

/// Scriptable compose backend; no containers are ever touched.
#[derive(Default)]
pub struct FakeCompose {
    healthy: AtomicBool,
    fail_next_up: AtomicBool,
    pull_error: Mutex<Option<String>>,
    up_delay: Mutex<Duration>,
    up_count: AtomicUsize,
    pull_count: AtomicUsize,
    image_port: Mutex<Option<u16>>,
    logs_body: Mutex<String>,
}

impl FakeCompose {
    /// A backend whose services report running and healthy.
    pub fn healthy() -> Self {
        let fake = Self::default();
        fake.healthy.store(true, Ordering::SeqCst);
        *fake.logs_body.lock().unwrap() = "fake log line\n".to_string();
        fake
    }

    /// Flip whether `ps_status` reports ready containers.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Fail exactly the next `up` call; later calls succeed again.
    pub fn fail_next_up(&self) {
        self.fail_next_up.store(true, Ordering::SeqCst);
    }

    /// Make every `pull` fail with this message.
    pub fn fail_pull_with(&self, message: &str) {
        *self.pull_error.lock().unwrap() = Some(message.to_string());
    }

    /// Delay `up` calls, to widen race windows in tests.
    pub fn set_up_delay(&self, delay: Duration) {
        *self.up_delay.lock().unwrap() = delay;
    }

    /// Port reported by `inspect_image_port`.
    pub fn set_image_port(&self, port: Option<u16>) {
        *self.image_port.lock().unwrap() = port;
    }

    /// Body returned by `logs` and streamed by `logs_follow`.
    pub fn set_logs(&self, body: &str) {
        *self.logs_body.lock().unwrap() = body.to_string();
    }

    /// How many times `up` ran.
    pub fn up_calls(&self) -> usize {
        self.up_count.load(Ordering::SeqCst)
    }

    /// How many times `pull` ran.
    pub fn pull_calls(&self) -> usize {
        self.pull_count.load(Ordering::SeqCst)
    }

    fn statuses(&self) -> Vec<ContainerStatus> {
        let mk = |service: &str, state: &str, health: &str| ContainerStatus {
            name: format!("tinyserve-{service}-1"),
            service: service.to_string(),
            state: state.to_string(),
            health: health.to_string(),
        };
        if self.healthy.load(Ordering::SeqCst) {
            vec![
                mk("traefik", "running", ""),
                mk("cloudflared", "running", ""),
                mk("whoami", "running", ""),
                mk("app1", "running", "healthy"),
            ]
        } else {
            vec![
                mk("traefik", "running", ""),
                mk("cloudflared", "running", ""),
                mk("app1", "restarting", "unhealthy"),
            ]
        }
    }
}

#[async_trait]
impl ComposeBackend for FakeCompose {
    async fn pull(&self, _dir: &Path, _services: &[String]) -> Result<String, ComposeError> {
        self.pull_count.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.pull_error.lock().unwrap().clone() {
            return Err(ComposeError::CommandFailed {
                command: "docker compose pull".to_string(),
                message,
            });
        }
        Ok(String::new())
    }

    async fn up(&self, _dir: &Path, _services: &[String]) -> Result<String, ComposeError> {
        let delay = *self.up_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next_up.swap(false, Ordering::SeqCst) {
            return Err(ComposeError::CommandFailed {
                command: "docker compose up -d".to_string(),
                message: "simulated up failure".to_string(),
            });
        }
        self.up_count.fetch_add(1, Ordering::SeqCst);
        Ok(String::new())
    }

    async fn ps_status(&self, _dir: &Path) -> Result<Vec<ContainerStatus>, ComposeError> {
        Ok(self.statuses())
    }

    async fn logs(
        &self,
        _dir: &Path,
        _service: &str,
        _tail: usize,
    ) -> Result<String, ComposeError> {
        Ok(self.logs_body.lock().unwrap().clone())
    }

    async fn logs_follow(
        &self,
        _dir: &Path,
        _service: &str,
        _tail: usize,
        sink: mpsc::Sender<Bytes>,
    ) -> Result<(), ComposeError> {
        let body = self.logs_body.lock().unwrap().clone();
        let _ = sink.send(Bytes::from(body)).await;
        Ok(())
    }

    async fn verify_daemon(&self) -> Result<(), ComposeError> {
        Ok(())
    }

    async fn pull_image(&self, _image: &str) -> Result<(), ComposeError> {
        self.pull_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn inspect_image_port(&self, _image: &str) -> Result<Option<u16>, ComposeError> {
        Ok(*self.image_port.lock().unwrap())
    }

    async fn inspect_image_volumes(&self, _image: &str) -> Result<Vec<String>, ComposeError> {
        Ok(Vec::new())
    }
}
