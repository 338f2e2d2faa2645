use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    profiled_env_opt(profile, key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn csv(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub groups: GroupsConfig,
    pub daemon: DaemonConfig,
    pub worker: WorkerConfig,
    pub rclone: RcloneConfig,
    pub ingest: IngestConfig,
}

const PROFILE_MARKER_KEYS: &[&str] = &["PRIMARY_REMOTE", "SERVE_HTTP_HOST", "PORT"];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `INKVAULT_PROFILE`. When set, every key is first
    /// looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("INKVAULT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
            groups: GroupsConfig::from_env_profiled(p),
            daemon: DaemonConfig::from_env_profiled(p),
            worker: WorkerConfig::from_env_profiled(p),
            rclone: RcloneConfig::from_env_profiled(p),
            ingest: IngestConfig::from_env_profiled(p),
        }
    }

    /// Discover available profiles by scanning env vars for `{PREFIX}_{MARKER_KEY}` patterns.
    pub fn available_profiles() -> Vec<String> {
        let mut profiles = std::collections::BTreeSet::new();
        profiles.insert("default".to_string());

        for (key, _) in env::vars() {
            for marker in PROFILE_MARKER_KEYS {
                if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                    if !prefix.is_empty()
                        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    {
                        profiles.insert(prefix.to_string());
                    }
                }
            }
        }

        profiles.into_iter().collect()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:   {}:{}", self.server.host, self.server.port);
        tracing::info!("  groups:   {} configured, active-write policy at {}", self.groups.groups.len(), self.storage.state_dir.display());
        tracing::info!("  daemon:   enabled={} port_start={}", self.daemon.serve_http_enabled, self.daemon.port_start);
        tracing::info!("  rclone:   binary={}", self.rclone.binary);
    }

    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "groups": self.groups.groups.iter().map(|g| serde_json::json!({
                "id": g.id,
                "primary": g.primary,
                "backups": g.backups,
                "quota_gb": g.quota_gb,
            })).collect::<Vec<_>>(),
            "daemon": { "enabled": self.daemon.serve_http_enabled, "port_start": self.daemon.port_start },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 8080),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

// ── Storage (local filesystem paths) ───────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Writable path used for temp staging during ingest (`REMOTE_CACHE_DIR`).
    pub remote_cache_dir: PathBuf,
    /// Directory holding `active_group.txt` and other on-disk state.
    pub state_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let remote_cache_dir = PathBuf::from(profiled_env_or(p, "REMOTE_CACHE_DIR", "data/cache"));
        let state_dir = PathBuf::from(profiled_env_or(p, "STATE_DIR", "storage"));
        Self { remote_cache_dir, state_dir }
    }
}

// ── Storage groups ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDef {
    pub id: u32,
    pub primary: String,
    pub backups: Vec<String>,
    pub quota_gb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupsConfig {
    pub groups: Vec<GroupDef>,
    pub auto_switch_group: bool,
    /// Reserved legacy single-char prefix, read-compat only (always maps to group 2).
    pub group2_path_prefix: String,
    pub load_balancing_strategy: String,
}

impl GroupsConfig {
    fn from_env_profiled(p: &str) -> Self {
        let mut groups = Vec::new();

        if let Some(primary) = profiled_env_opt(p, "PRIMARY_REMOTE") {
            groups.push(GroupDef {
                id: 1,
                primary,
                backups: csv(profiled_env_opt(p, "BACKUP_REMOTES")),
                quota_gb: profiled_env_u32(p, "GROUP1_QUOTA_GB", 0) as u64,
            });
        }

        if let Some(primary) = profiled_env_opt(p, "NEXT_PRIMARY_REMOTE") {
            groups.push(GroupDef {
                id: 2,
                primary,
                backups: csv(profiled_env_opt(p, "NEXT_BACKUP_REMOTES")),
                quota_gb: profiled_env_u32(p, "GROUP2_QUOTA_GB", 0) as u64,
            });
        }

        // GROUP_{N}_PRIMARY / _BACKUPS / _QUOTA_GB for N >= 3; stop at first unconfigured N.
        let mut n = 3;
        loop {
            let primary_key = format!("GROUP_{}_PRIMARY", n);
            match profiled_env_opt(p, &primary_key) {
                Some(primary) => {
                    let backups = csv(profiled_env_opt(p, &format!("GROUP_{}_BACKUPS", n)));
                    let quota_gb = profiled_env_opt(p, &format!("GROUP_{}_QUOTA_GB", n))
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0u64);
                    groups.push(GroupDef { id: n, primary, backups, quota_gb });
                    n += 1;
                }
                None => break,
            }
        }

        Self {
            groups,
            auto_switch_group: profiled_env_bool(p, "AUTO_SWITCH_GROUP", true),
            group2_path_prefix: profiled_env_or(p, "GROUP2_PATH_PREFIX", "@"),
            load_balancing_strategy: profiled_env_or(p, "LOAD_BALANCING_STRATEGY", "round_robin"),
        }
    }
}

// ── Daemon supervisor tuning ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub serve_http_enabled: bool,
    pub port_start: u16,
    pub host: String,
    pub vfs_cache_mode: String,
    pub buffer_size: String,
    pub vfs_cache_max_size: String,
    pub vfs_cache_max_age: String,
    pub startup_timeout_secs: u64,
    pub auto_restart: bool,
    pub max_restart_attempts: u32,
    pub fallback: bool,
    pub read_only: bool,
    pub no_checksum: bool,
    pub auth: Option<String>,
}

impl DaemonConfig {
    fn from_env_profiled(p: &str) -> Self {
        let startup_timeout_secs = profiled_env_u32(p, "SERVE_HTTP_STARTUP_TIMEOUT", 15).clamp(3, 60) as u64;
        Self {
            serve_http_enabled: profiled_env_bool(p, "SERVE_HTTP_ENABLED", true),
            port_start: profiled_env_u16(p, "SERVE_HTTP_PORT_START", 19000).max(1024),
            host: profiled_env_or(p, "SERVE_HTTP_HOST", "127.0.0.1"),
            vfs_cache_mode: profiled_env_or(p, "SERVE_HTTP_VFS_CACHE_MODE", "minimal"),
            buffer_size: profiled_env_or(p, "SERVE_HTTP_BUFFER_SIZE", "16M"),
            vfs_cache_max_size: profiled_env_or(p, "SERVE_HTTP_VFS_CACHE_MAX_SIZE", "1G"),
            vfs_cache_max_age: profiled_env_or(p, "SERVE_HTTP_VFS_CACHE_MAX_AGE", "1h"),
            startup_timeout_secs,
            auto_restart: profiled_env_bool(p, "SERVE_HTTP_AUTO_RESTART", true),
            max_restart_attempts: profiled_env_u32(p, "SERVE_HTTP_MAX_RESTART_ATTEMPTS", 3),
            fallback: profiled_env_bool(p, "SERVE_HTTP_FALLBACK", true),
            read_only: profiled_env_bool(p, "SERVE_HTTP_READ_ONLY", true),
            no_checksum: profiled_env_bool(p, "SERVE_HTTP_NO_CHECKSUM", true),
            auth: profiled_env_opt(p, "SERVE_HTTP_AUTH"),
        }
    }
}

// ── Worker / port allocation ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker_index: u16,
    pub worker_port_slots: u16,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            worker_index: profiled_env_u16(p, "WORKER_INDEX", 0),
            worker_port_slots: profiled_env_u16(p, "WORKER_PORT_SLOTS", 20),
        }
    }
}

// ── Sync tool (rclone) invocation ────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcloneConfig {
    pub binary: String,
    /// Reserved env-var prefix scrubbed before every subprocess exec.
    pub env_reserved_prefix: String,
}

impl RcloneConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            binary: profiled_env_or(p, "RCLONE_BINARY", "rclone"),
            env_reserved_prefix: profiled_env_or(p, "RCLONE_ENV_PREFIX", "RCLONE_"),
        }
    }
}

// ── Ingest (archive intake tuning) ───────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Regex a chapter subfolder's name must match to be treated as a
    /// chapter rather than supplementary material (artbooks, omake, etc).
    /// Capture group 1 is the main chapter number, group 2 the optional
    /// decimal suffix.
    pub chapter_folder_pattern: String,
}

pub const DEFAULT_CHAPTER_FOLDER_PATTERN: &str = r"(?i)chapter[_\s]?(\d+)(?:[.,](\d+))?";

impl IngestConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self { chapter_folder_pattern: profiled_env_or(p, "CHAPTER_FOLDER_PATTERN", DEFAULT_CHAPTER_FOLDER_PATTERN) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_label_defaults() {
        let cfg = Config::for_profile("");
        assert_eq!(cfg.profile_label(), "default");
    }

    #[test]
    fn daemon_startup_timeout_is_clamped() {
        std::env::set_var("SERVE_HTTP_STARTUP_TIMEOUT", "999");
        let cfg = DaemonConfig::from_env_profiled("");
        assert_eq!(cfg.startup_timeout_secs, 60);
        std::env::remove_var("SERVE_HTTP_STARTUP_TIMEOUT");
    }
}
