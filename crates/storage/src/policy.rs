//! Upload Group Policy: single active-write-group cursor, persisted to
//! disk so a restart resumes writing into the same group.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::StorageError;
use crate::router::StorageGroupRouter;

const STATE_FILE_NAME: &str = "active_group.txt";

struct PolicyState {
    active_group: u32,
}

/// Coordinates which storage group new uploads land in. Backed by a single
/// state file so the active group survives a process restart.
pub struct UploadGroupPolicy {
    state_file: PathBuf,
    state: Mutex<PolicyState>,
}

impl UploadGroupPolicy {
    /// Load the active group from `state_dir/active_group.txt`, defaulting to
    /// group 1 if absent or unreadable. Marks every group below the loaded
    /// one as full so `StorageGroupRouter::next_remote` never routes new
    /// writes backwards.
    pub fn load(state_dir: &Path, router: &StorageGroupRouter) -> Result<Self, StorageError> {
        let state_file = state_dir.join(STATE_FILE_NAME);
        let active_group = std::fs::read_to_string(&state_file)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|g| router.configured_groups().contains(g))
            .unwrap_or(1);

        for g in router.configured_groups() {
            if g < active_group {
                router.mark_group_full(g);
            }
        }

        info!(active_group, "upload group policy loaded");
        Ok(Self { state_file, state: Mutex::new(PolicyState { active_group }) })
    }

    pub fn get_active(&self) -> u32 {
        self.state.lock().expect("policy mutex poisoned").active_group
    }

    /// Switch the active write group, persisting the change atomically
    /// (write to a temp file in the same directory, then rename) so a crash
    /// mid-write can never leave a truncated or partially-written state
    /// file behind.
    pub fn set_active(&self, group: u32, router: &StorageGroupRouter) -> Result<(), StorageError> {
        if !router.configured_groups().contains(&group) {
            return Err(StorageError::UnknownGroup(group));
        }
        if !router.group_has_available_remote(group)? {
            return Err(StorageError::NoHealthyRemotes(group));
        }

        {
            let mut state = self.state.lock().expect("policy mutex poisoned");
            state.active_group = group;
        }

        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.state_file.with_extension("tmp");
        std::fs::write(&tmp_path, group.to_string())?;
        std::fs::rename(&tmp_path, &self.state_file)?;

        for g in router.configured_groups() {
            if g < group {
                router.mark_group_full(g);
            }
        }

        info!(group, "upload group switched");
        Ok(())
    }

    /// Called when the router reports a group has no healthy remotes left;
    /// advances to the next configured group if auto-switch is enabled.
    pub fn advance_on_exhaustion(&self, router: &StorageGroupRouter, auto_switch: bool) -> Option<u32> {
        if !auto_switch {
            return None;
        }
        let current = self.get_active();
        let mut groups = router.configured_groups();
        groups.sort_unstable();
        let next = groups.into_iter().find(|g| *g > current)?;
        match self.set_active(next, router) {
            Ok(()) => Some(next),
            Err(e) => {
                warn!(error = %e, "failed to advance upload group");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::DaemonSupervisor;
    use inkvault_core::config::{DaemonConfig, GroupDef, GroupsConfig};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn router() -> StorageGroupRouter {
        let cfg = GroupsConfig {
            groups: vec![
                GroupDef { id: 1, primary: "p1".into(), backups: vec![], quota_gb: 100 },
                GroupDef { id: 2, primary: "p2".into(), backups: vec![], quota_gb: 100 },
            ],
            auto_switch_group: true,
            group2_path_prefix: "@".into(),
            load_balancing_strategy: "round_robin".into(),
        };
        let daemon_cfg = DaemonConfig {
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
        };
        let daemon: Arc<DaemonSupervisor> = DaemonSupervisor::new(daemon_cfg.clone(), "rclone", "RCLONE_", 0, 10);
        StorageGroupRouter::new(&cfg, "rclone", "RCLONE_", daemon, daemon_cfg)
    }

    #[test]
    fn defaults_to_group_one_when_no_state_file() {
        let dir = tempdir().unwrap();
        let router = router();
        let policy = UploadGroupPolicy::load(dir.path(), &router).unwrap();
        assert_eq!(policy.get_active(), 1);
    }

    #[test]
    fn set_active_persists_across_reload() {
        let dir = tempdir().unwrap();
        let router = router();
        let policy = UploadGroupPolicy::load(dir.path(), &router).unwrap();
        policy.set_active(2, &router).unwrap();

        let reloaded = UploadGroupPolicy::load(dir.path(), &router).unwrap();
        assert_eq!(reloaded.get_active(), 2);
    }

    #[test]
    fn rejects_unconfigured_group() {
        let dir = tempdir().unwrap();
        let router = router();
        let policy = UploadGroupPolicy::load(dir.path(), &router).unwrap();
        assert!(policy.set_active(99, &router).is_err());
    }

    #[test]
    fn rejects_switch_to_group_with_no_available_remotes() {
        let dir = tempdir().unwrap();
        let router = router();
        let policy = UploadGroupPolicy::load(dir.path(), &router).unwrap();
        for _ in 0..crate::health::ERROR_STREAK_THRESHOLD {
            router.mark_failure(2, "p2", "500 internal error");
        }
        assert!(policy.set_active(2, &router).is_err());
    }
}
