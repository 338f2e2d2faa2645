//! Storage Group Router: selects a healthy remote within the active
//! storage group, balancing load across primary/backup remotes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use inkvault_core::config::{DaemonConfig, GroupDef, GroupsConfig};

use crate::daemon::DaemonSupervisor;
use crate::error::StorageError;
use crate::health::RemoteStatus;
use crate::path;
use crate::remote_client::RcloneClient;

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancingStrategy {
    RoundRobin,
    Random,
    Weighted,
    LeastUsed,
}

impl LoadBalancingStrategy {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "random" => Self::Random,
            "weighted" => Self::Weighted,
            "least_used" | "least-used" => Self::LeastUsed,
            _ => Self::RoundRobin,
        }
    }
}

struct Group {
    id: u32,
    primary: String,
    backups: Vec<String>,
    quota_gb: u64,
    status: HashMap<String, Arc<RemoteStatus>>,
    rr_counter: AtomicU64,
    full: std::sync::atomic::AtomicBool,
    uploaded_bytes: AtomicU64,
    full_since: AtomicU64,
}

impl Group {
    fn remotes(&self) -> Vec<&str> {
        std::iter::once(self.primary.as_str()).chain(self.backups.iter().map(String::as_str)).collect()
    }
}

struct CachedUrls {
    urls: Vec<String>,
    at: Instant,
}

/// Central coordinator for remote selection. Holds one `RcloneClient` per
/// configured remote and per-remote health counters grouped by storage
/// group, plus a short-lived cache of each group's live daemon base URLs.
pub struct StorageGroupRouter {
    groups: Vec<Group>,
    clients: HashMap<String, RcloneClient>,
    strategy: LoadBalancingStrategy,
    daemon: Arc<DaemonSupervisor>,
    url_cache: AsyncMutex<HashMap<u32, CachedUrls>>,
    daemon_config: DaemonConfig,
}

const URL_CACHE_TTL: Duration = Duration::from_secs(30);

impl StorageGroupRouter {
    pub fn new(
        groups_config: &GroupsConfig,
        rclone_binary: &str,
        env_reserved_prefix: &str,
        daemon: Arc<DaemonSupervisor>,
        daemon_config: DaemonConfig,
    ) -> Self {
        let mut clients = HashMap::new();
        let groups = groups_config
            .groups
            .iter()
            .map(|g: &GroupDef| {
                let mut status = HashMap::new();
                for remote in std::iter::once(&g.primary).chain(g.backups.iter()) {
                    clients
                        .entry(remote.clone())
                        .or_insert_with(|| RcloneClient::new(rclone_binary, env_reserved_prefix, remote.clone()));
                    status.entry(remote.clone()).or_insert_with(|| Arc::new(RemoteStatus::new(remote.clone())));
                }
                Group {
                    id: g.id,
                    primary: g.primary.clone(),
                    backups: g.backups.clone(),
                    quota_gb: g.quota_gb,
                    status,
                    rr_counter: AtomicU64::new(0),
                    full: std::sync::atomic::AtomicBool::new(false),
                    uploaded_bytes: AtomicU64::new(0),
                    full_since: AtomicU64::new(0),
                }
            })
            .collect();

        Self {
            groups,
            clients,
            strategy: LoadBalancingStrategy::parse(&groups_config.load_balancing_strategy),
            daemon,
            url_cache: AsyncMutex::new(HashMap::new()),
            daemon_config,
        }
    }

    fn group(&self, id: u32) -> Result<&Group, StorageError> {
        self.groups.iter().find(|g| g.id == id).ok_or(StorageError::UnknownGroup(id))
    }

    pub fn get_group_for_path(&self, path: &str) -> u32 {
        path::group_of(path)
    }

    pub fn client_for(&self, remote: &str) -> Option<&RcloneClient> {
        self.clients.get(remote)
    }

    /// Pick a healthy remote from `group_id` per the configured load
    /// balancing strategy. If no remote is currently healthy, runs an
    /// auto-recovery pass over the group and retries once before giving up.
    pub fn next_remote(&self, group_id: u32) -> Result<&str, StorageError> {
        let group = self.group(group_id)?;
        if group.full.load(Ordering::Relaxed) {
            return Err(StorageError::NoHealthyRemotes(group_id));
        }

        let mut candidates: Vec<&str> = group.remotes().into_iter().filter(|r| group.status[*r].is_available()).collect();
        if candidates.is_empty() {
            for status in group.status.values() {
                status.try_auto_recover();
            }
            candidates = group.remotes().into_iter().filter(|r| group.status[*r].is_available()).collect();
        }
        if candidates.is_empty() {
            return Err(StorageError::NoHealthyRemotes(group_id));
        }

        let chosen = match self.strategy {
            LoadBalancingStrategy::RoundRobin => {
                let idx = group.rr_counter.fetch_add(1, Ordering::Relaxed) as usize % candidates.len();
                candidates[idx]
            }
            LoadBalancingStrategy::Random => {
                let idx = rand::thread_rng().gen_range(0..candidates.len());
                candidates[idx]
            }
            LoadBalancingStrategy::Weighted => {
                // Primary gets double weight over any single backup.
                if candidates.contains(&group.primary.as_str()) && candidates.len() > 1 {
                    let roll = rand::thread_rng().gen_range(0..candidates.len() + 1);
                    if roll < 2 {
                        group.primary.as_str()
                    } else {
                        candidates[roll - 2]
                    }
                } else {
                    candidates[0]
                }
            }
            LoadBalancingStrategy::LeastUsed => {
                candidates
                    .iter()
                    .min_by_key(|r| group.status[**r].snapshot().total)
                    .copied()
                    .unwrap_or(candidates[0])
            }
        };
        Ok(chosen)
    }

    pub fn mark_success(&self, group_id: u32, remote: &str) {
        if let Ok(group) = self.group(group_id) {
            if let Some(status) = group.status.get(remote) {
                status.mark_success();
            }
        }
    }

    pub fn mark_failure(&self, group_id: u32, remote: &str, stderr: &str) {
        if let Ok(group) = self.group(group_id) {
            if let Some(status) = group.status.get(remote) {
                status.mark_failure(crate::health::classify_quota_error(stderr));
            }
        }
    }

    pub fn mark_group_full(&self, group_id: u32) {
        if let Ok(group) = self.group(group_id) {
            if !group.full.swap(true, Ordering::Relaxed) {
                group.full_since.store(now_secs(), Ordering::Relaxed);
            }
        }
    }

    pub fn group_quota_gb(&self, group_id: u32) -> Result<u64, StorageError> {
        Ok(self.group(group_id)?.quota_gb)
    }

    /// Account `bytes` of a completed upload against `group_id`'s byte
    /// quota. Marks the group full the moment cumulative uploads reach
    /// `quota_gb`; a quota of 0 means unlimited.
    pub fn record_upload_bytes(&self, group_id: u32, bytes: u64) {
        let Ok(group) = self.group(group_id) else { return };
        let total = group.uploaded_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if group.quota_gb == 0 {
            return;
        }
        let quota_bytes = group.quota_gb.saturating_mul(1024 * 1024 * 1024);
        if total >= quota_bytes && !group.full.swap(true, Ordering::Relaxed) {
            group.full_since.store(now_secs(), Ordering::Relaxed);
            info!(group_id, total_bytes = total, quota_bytes, "storage group reached byte quota");
        }
    }

    pub fn uploaded_bytes(&self, group_id: u32) -> Result<u64, StorageError> {
        Ok(self.group(group_id)?.uploaded_bytes.load(Ordering::Relaxed))
    }

    pub fn is_full(&self, group_id: u32) -> Result<bool, StorageError> {
        Ok(self.group(group_id)?.full.load(Ordering::Relaxed))
    }

    pub fn full_since(&self, group_id: u32) -> Result<Option<u64>, StorageError> {
        let at = self.group(group_id)?.full_since.load(Ordering::Relaxed);
        Ok(if at == 0 { None } else { Some(at) })
    }

    pub fn backups_of(&self, group_id: u32) -> Result<Vec<String>, StorageError> {
        Ok(self.group(group_id)?.backups.clone())
    }

    pub fn remote_count(&self, group_id: u32) -> Result<usize, StorageError> {
        Ok(self.group(group_id)?.remotes().len())
    }

    pub fn group_has_available_remote(&self, group_id: u32) -> Result<bool, StorageError> {
        Ok(self.group(group_id)?.status.values().any(|s| s.is_available()))
    }

    /// Re-admit quota-excluded remotes whose cooldown has elapsed. Intended
    /// to run from a periodic background sweep, not the request path.
    pub fn sweep_auto_recover(&self) {
        for group in &self.groups {
            for status in group.status.values() {
                status.try_auto_recover();
            }
        }
    }

    pub fn reset(&self) {
        for group in &self.groups {
            group.full.store(false, Ordering::Relaxed);
            group.rr_counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn get_health(&self, group_id: u32) -> Result<Vec<crate::health::RemoteStatusSnapshot>, StorageError> {
        Ok(self.group(group_id)?.status.values().map(|s| s.snapshot()).collect())
    }

    pub fn all_health(&self) -> Vec<crate::health::RemoteStatusSnapshot> {
        self.groups.iter().flat_map(|g| g.status.values().map(|s| s.snapshot())).collect()
    }

    pub fn configured_groups(&self) -> Vec<u32> {
        self.groups.iter().map(|g| g.id).collect()
    }

    /// Base URLs of every running daemon in `group_id`, cached for
    /// `URL_CACHE_TTL` to avoid re-querying the supervisor on every request.
    pub async fn active_daemon_urls(&self, group_id: u32) -> Result<Vec<String>, StorageError> {
        {
            let cache = self.url_cache.lock().await;
            if let Some(entry) = cache.get(&group_id) {
                if entry.at.elapsed() < URL_CACHE_TTL {
                    return Ok(entry.urls.clone());
                }
            }
        }
        let group = self.group(group_id)?;
        let mut urls = Vec::new();
        for remote in group.remotes() {
            if let Some(url) = self.daemon.url_of(remote).await {
                urls.push(url);
            }
        }
        let mut cache = self.url_cache.lock().await;
        cache.insert(group_id, CachedUrls { urls: urls.clone(), at: Instant::now() });
        Ok(urls)
    }

    pub async fn next_daemon_url(&self, group_id: u32, remote: &str) -> Option<String> {
        if !self.daemon_config.serve_http_enabled {
            return None;
        }
        self.daemon.url_of(remote).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkvault_core::config::DaemonConfig as CoreDaemonConfig;

    fn groups_config() -> GroupsConfig {
        GroupsConfig {
            groups: vec![
                GroupDef { id: 1, primary: "p1".into(), backups: vec!["b1".into()], quota_gb: 100 },
                GroupDef { id: 2, primary: "p2".into(), backups: vec![], quota_gb: 50 },
            ],
            auto_switch_group: true,
            group2_path_prefix: "@".into(),
            load_balancing_strategy: "round_robin".into(),
        }
    }

    fn daemon_cfg() -> CoreDaemonConfig {
        CoreDaemonConfig {
            serve_http_enabled: false,
            port_start: 19000,
            host: "127.0.0.1".into(),
            vfs_cache_mode: "minimal".into(),
            buffer_size: "16M".into(),
            vfs_cache_max_size: "1G".into(),
            vfs_cache_max_age: "1h".into(),
            startup_timeout_secs: 5,
            auto_restart: false,
            max_restart_attempts: 0,
            fallback: true,
            read_only: true,
            no_checksum: true,
            auth: None,
        }
    }

    #[test]
    fn round_robin_cycles_through_remotes() {
        let cfg = groups_config();
        let daemon = DaemonSupervisor::new(daemon_cfg(), "rclone", "RCLONE_", 0, 10);
        let router = StorageGroupRouter::new(&cfg, "rclone", "RCLONE_", daemon, daemon_cfg());
        let first = router.next_remote(1).unwrap().to_string();
        let second = router.next_remote(1).unwrap().to_string();
        assert_ne!(first, second);
    }

    #[test]
    fn unhealthy_remotes_are_skipped() {
        let cfg = groups_config();
        let daemon = DaemonSupervisor::new(daemon_cfg(), "rclone", "RCLONE_", 0, 10);
        let router = StorageGroupRouter::new(&cfg, "rclone", "RCLONE_", daemon, daemon_cfg());
        for _ in 0..crate::health::ERROR_STREAK_THRESHOLD {
            router.mark_failure(1, "p1", "500 internal error");
        }
        assert_eq!(router.next_remote(1).unwrap(), "b1");
    }

    #[test]
    fn byte_quota_marks_group_full() {
        let cfg = groups_config();
        let daemon = DaemonSupervisor::new(daemon_cfg(), "rclone", "RCLONE_", 0, 10);
        let router = StorageGroupRouter::new(&cfg, "rclone", "RCLONE_", daemon, daemon_cfg());
        assert!(!router.is_full(2).unwrap());
        router.record_upload_bytes(2, 50 * 1024 * 1024 * 1024);
        assert!(router.is_full(2).unwrap());
        assert!(router.full_since(2).unwrap().is_some());
        assert!(router.next_remote(2).is_err());
    }

    #[test]
    fn next_remote_retries_once_after_auto_recover() {
        let cfg = groups_config();
        let daemon = DaemonSupervisor::new(daemon_cfg(), "rclone", "RCLONE_", 0, 10);
        let router = StorageGroupRouter::new(&cfg, "rclone", "RCLONE_", daemon, daemon_cfg());
        for _ in 0..crate::health::ERROR_STREAK_THRESHOLD {
            router.mark_failure(2, "p2", "500 internal error");
        }
        assert!(router.next_remote(2).is_err());

        let group = router.group(2).unwrap();
        group.status["p2"].force_recovery_window_elapsed();
        assert!(router.next_remote(2).is_ok());
    }

    #[test]
    fn full_group_rejects_all_requests() {
        let cfg = groups_config();
        let daemon = DaemonSupervisor::new(daemon_cfg(), "rclone", "RCLONE_", 0, 10);
        let router = StorageGroupRouter::new(&cfg, "rclone", "RCLONE_", daemon, daemon_cfg());
        router.mark_group_full(2);
        assert!(router.next_remote(2).is_err());
    }

    #[test]
    fn unknown_group_is_an_error() {
        let cfg = groups_config();
        let daemon = DaemonSupervisor::new(daemon_cfg(), "rclone", "RCLONE_", 0, 10);
        let router = StorageGroupRouter::new(&cfg, "rclone", "RCLONE_", daemon, daemon_cfg());
        assert!(router.next_remote(99).is_err());
    }
}
