//! Daemon Supervisor: one `rclone serve http` sidecar per remote.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::env_scrub::scrub_env;
use inkvault_core::config::DaemonConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Starting,
    Running,
    Dead,
}

struct Daemon {
    remote: String,
    port: u16,
    base_url: String,
    child: Option<Child>,
    state: DaemonState,
    restart_count: u32,
}

/// Owns one `rclone serve http` child process per configured remote and
/// probes readiness in the background. `Arc`-shared; interior state behind
/// an `RwLock` keyed by remote name.
pub struct DaemonSupervisor {
    config: DaemonConfig,
    binary: String,
    env_reserved_prefix: String,
    worker_index: u16,
    worker_port_slots: u16,
    remote_counter: AtomicU32,
    daemons: RwLock<HashMap<String, Daemon>>,
    http: reqwest::Client,
}

impl DaemonSupervisor {
    pub fn new(
        config: DaemonConfig,
        binary: impl Into<String>,
        env_reserved_prefix: impl Into<String>,
        worker_index: u16,
        worker_port_slots: u16,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            binary: binary.into(),
            env_reserved_prefix: env_reserved_prefix.into(),
            worker_index,
            worker_port_slots,
            remote_counter: AtomicU32::new(0),
            daemons: RwLock::new(HashMap::new()),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client"),
        })
    }

    fn allocate_port(&self) -> u16 {
        let offset = self.remote_counter.fetch_add(1, Ordering::Relaxed);
        self.config.port_start + self.worker_index * self.worker_port_slots + offset as u16
    }

    /// Start (or restart) the sidecar for `remote`, returning once the child
    /// has spawned. Readiness is tracked asynchronously via `spawn_probe`.
    pub async fn start(self: &Arc<Self>, remote: &str) -> Result<(), std::io::Error> {
        if !self.config.serve_http_enabled {
            return Ok(());
        }
        let port = {
            let existing = self.daemons.read().await;
            existing.get(remote).map(|d| d.port)
        };
        let port = port.unwrap_or_else(|| self.allocate_port());
        let base_url = format!("http://{}:{}", self.config.host, port);

        let env = scrub_env(&self.env_reserved_prefix);
        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "serve",
            "http",
            &format!("{}:", remote),
            "--addr",
            &format!("{}:{}", self.config.host, port),
            "--vfs-cache-mode",
            &self.config.vfs_cache_mode,
            "--buffer-size",
            &self.config.buffer_size,
            "--vfs-cache-max-size",
            &self.config.vfs_cache_max_size,
            "--vfs-cache-max-age",
            &self.config.vfs_cache_max_age,
            "--log-level",
            "ERROR",
        ]);
        if self.config.read_only {
            cmd.arg("--read-only");
        }
        if self.config.no_checksum {
            cmd.arg("--no-checksum");
        }
        if let Some(auth) = &self.config.auth {
            cmd.args(["--user", auth]);
        }
        cmd.env_clear().envs(env).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped()).kill_on_drop(true);

        info!(remote, port, "starting rclone serve http sidecar");
        let child = cmd.spawn()?;

        {
            let mut daemons = self.daemons.write().await;
            daemons.insert(
                remote.to_string(),
                Daemon { remote: remote.to_string(), port, base_url: base_url.clone(), child: Some(child), state: DaemonState::Starting, restart_count: 0 },
            );
        }

        self.spawn_probe(remote.to_string());
        Ok(())
    }

    /// Poll until the child either answers HTTP or the startup window
    /// expires, then hand off to `watch_liveness` for as long as the process
    /// stays registered.
    fn spawn_probe(self: &Arc<Self>, remote: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(this.config.startup_timeout_secs);
            loop {
                if tokio::time::Instant::now() >= deadline {
                    let reason = this.child_exit_reason(&remote).await.unwrap_or_else(|| "startup timeout".to_string());
                    this.mark_dead(&remote, &reason).await;
                    this.restart_if_dead(&remote).await;
                    return;
                }
                if let Some(reason) = this.child_exit_reason(&remote).await {
                    this.mark_dead(&remote, &reason).await;
                    this.restart_if_dead(&remote).await;
                    return;
                }
                let url = {
                    let daemons = this.daemons.read().await;
                    daemons.get(&remote).map(|d| d.base_url.clone())
                };
                let Some(url) = url else { return };
                match this.http.get(&url).send().await {
                    Ok(resp) if (resp.status().as_u16()) < 500 => {
                        let mut daemons = this.daemons.write().await;
                        if let Some(d) = daemons.get_mut(&remote) {
                            d.state = DaemonState::Running;
                        }
                        debug!(remote = %remote, "daemon probe ready");
                        break;
                    }
                    _ => {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
            this.watch_liveness(remote).await;
        });
    }

    /// Poll a running daemon's child process until it exits unexpectedly,
    /// then mark it dead and attempt a bounded restart.
    async fn watch_liveness(self: &Arc<Self>, remote: String) {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            if let Some(reason) = self.child_exit_reason(&remote).await {
                self.mark_dead(&remote, &reason).await;
                self.restart_if_dead(&remote).await;
                return;
            }
            if !self.daemons.read().await.contains_key(&remote) {
                return;
            }
        }
    }

    /// `None` if the child is still running (or untracked); `Some(reason)`
    /// with a best-effort stderr excerpt if it has exited.
    async fn child_exit_reason(&self, remote: &str) -> Option<String> {
        let mut daemons = self.daemons.write().await;
        let d = daemons.get_mut(remote)?;
        let child = d.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                let mut snippet = String::new();
                if let Some(stderr) = child.stderr.as_mut() {
                    use tokio::io::AsyncReadExt;
                    let mut buf = [0u8; 2048];
                    if let Ok(Ok(n)) = tokio::time::timeout(Duration::from_millis(50), stderr.read(&mut buf)).await {
                        snippet = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                    }
                }
                Some(if snippet.is_empty() { format!("process exited: {status}") } else { snippet })
            }
            _ => None,
        }
    }

    async fn mark_dead(&self, remote: &str, reason: &str) {
        let mut daemons = self.daemons.write().await;
        if let Some(d) = daemons.get_mut(remote) {
            warn!(remote, reason, "daemon marked dead");
            d.state = DaemonState::Dead;
        }
    }

    pub async fn is_running(&self, remote: &str) -> bool {
        let daemons = self.daemons.read().await;
        daemons.get(remote).map(|d| d.state == DaemonState::Running).unwrap_or(false)
    }

    pub async fn url_of(&self, remote: &str) -> Option<String> {
        let daemons = self.daemons.read().await;
        daemons.get(remote).and_then(|d| if d.state == DaemonState::Running { Some(d.base_url.clone()) } else { None })
    }

    /// Attempt a bounded restart of a dead daemon. Returns false once
    /// `max_restart_attempts` has been exhausted.
    pub async fn restart_if_dead(self: &Arc<Self>, remote: &str) -> bool {
        if !self.config.auto_restart {
            return false;
        }
        let should_restart = {
            let mut daemons = self.daemons.write().await;
            match daemons.get_mut(remote) {
                Some(d) if d.state == DaemonState::Dead && d.restart_count < self.config.max_restart_attempts => {
                    d.restart_count += 1;
                    true
                }
                _ => false,
            }
        };
        if should_restart {
            info!(remote, "restarting dead daemon");
            let _ = self.start(remote).await;
        }
        should_restart
    }

    pub async fn shutdown_all(&self) {
        let mut daemons = self.daemons.write().await;
        for (remote, daemon) in daemons.iter_mut() {
            if let Some(mut child) = daemon.child.take() {
                info!(remote, "stopping daemon sidecar");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }

    pub async fn snapshot(&self) -> Vec<(String, u16, DaemonState)> {
        let daemons = self.daemons.read().await;
        daemons.values().map(|d| (d.remote.clone(), d.port, d.state)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DaemonConfig {
        DaemonConfig {
            serve_http_enabled: true,
            port_start: 18000,
            host: "127.0.0.1".to_string(),
            vfs_cache_mode: "minimal".to_string(),
            buffer_size: "32M".to_string(),
            vfs_cache_max_size: "1G".to_string(),
            vfs_cache_max_age: "1h".to_string(),
            startup_timeout_secs: 5,
            auto_restart: true,
            max_restart_attempts: 3,
            fallback: true,
            read_only: true,
            no_checksum: true,
            auth: None,
        }
    }

    #[test]
    fn port_allocation_spreads_by_worker_and_counter() {
        let sup = DaemonSupervisor::new(cfg(), "rclone", "RCLONE_", 2, 10);
        let p1 = sup.allocate_port();
        let p2 = sup.allocate_port();
        assert_eq!(p1, 18000 + 2 * 10);
        assert_eq!(p2, 18000 + 2 * 10 + 1);
    }
}
