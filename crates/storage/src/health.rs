//! Remote Health Tracking: per-remote error streaks and quota cooldowns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Consecutive failures before a remote is marked unhealthy.
pub const ERROR_STREAK_THRESHOLD: u32 = 5;
/// How long a remote that went unhealthy from a generic error streak stays
/// excluded before the periodic sweep re-admits it.
pub const UNHEALTHY_RECOVERY_SECS: u64 = 10 * 60;
/// How long a quota-exceeded remote stays excluded before the periodic sweep
/// re-admits it. Distinct from `UNHEALTHY_RECOVERY_SECS`: quota windows reset
/// daily, not every 10 minutes.
pub const QUOTA_RESET_SECS: u64 = 24 * 60 * 60;

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Keyword-based classifier for whether an rclone stderr blob indicates a
/// quota/rate-limit condition rather than a generic transient failure.
pub fn classify_quota_error(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    const MARKERS: &[&str] = &["quota", "rate limit", "too many requests", "403", "forbidden"];
    MARKERS.iter().any(|m| lower.contains(m))
}

/// Live health state for a single remote. All counters are atomics so the
/// router can read/update concurrently from many request tasks without a
/// lock around the whole group.
#[derive(Debug)]
pub struct RemoteStatus {
    pub remote: String,
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    error_streak: AtomicU64,
    healthy: AtomicBool,
    quota_exceeded: AtomicBool,
    quota_reset_at: AtomicU64,
    last_used: AtomicU64,
}

impl RemoteStatus {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            error_streak: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
            quota_exceeded: AtomicBool::new(false),
            quota_reset_at: AtomicU64::new(0),
            last_used: AtomicU64::new(0),
        }
    }

    pub fn mark_success(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.error_streak.store(0, Ordering::Relaxed);
        self.healthy.store(true, Ordering::Relaxed);
        self.last_used.store(now_secs(), Ordering::Relaxed);
    }

    pub fn mark_failure(&self, is_quota: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.last_used.store(now_secs(), Ordering::Relaxed);

        if is_quota {
            self.quota_exceeded.store(true, Ordering::Relaxed);
            self.quota_reset_at.store(now_secs() + QUOTA_RESET_SECS, Ordering::Relaxed);
            self.healthy.store(false, Ordering::Relaxed);
            return;
        }

        let streak = self.error_streak.fetch_add(1, Ordering::Relaxed) + 1;
        if streak as u32 >= ERROR_STREAK_THRESHOLD {
            self.healthy.store(false, Ordering::Relaxed);
        }
    }

    /// Re-admit a remote once its cooldown has elapsed. Called from the
    /// router's periodic sweep, not inline on the request path. Quota
    /// exclusions wait out `QUOTA_RESET_SECS`; a remote that just went
    /// unhealthy from an error streak recovers after `UNHEALTHY_RECOVERY_SECS`
    /// of no further failures.
    pub fn try_auto_recover(&self) -> bool {
        if self.quota_exceeded.load(Ordering::Relaxed) {
            if now_secs() >= self.quota_reset_at.load(Ordering::Relaxed) {
                self.quota_exceeded.store(false, Ordering::Relaxed);
                self.error_streak.store(0, Ordering::Relaxed);
                self.healthy.store(true, Ordering::Relaxed);
                return true;
            }
            return false;
        }

        if !self.healthy.load(Ordering::Relaxed) {
            let since_last_failure = now_secs().saturating_sub(self.last_used.load(Ordering::Relaxed));
            if since_last_failure >= UNHEALTHY_RECOVERY_SECS {
                self.error_streak.store(0, Ordering::Relaxed);
                self.healthy.store(true, Ordering::Relaxed);
                return true;
            }
        }

        false
    }

    pub fn is_available(&self) -> bool {
        self.healthy.load(Ordering::Relaxed) && !self.quota_exceeded.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RemoteStatusSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        RemoteStatusSnapshot {
            remote: self.remote.clone(),
            total,
            successful,
            failed: self.failed.load(Ordering::Relaxed),
            error_streak: self.error_streak.load(Ordering::Relaxed),
            healthy: self.healthy.load(Ordering::Relaxed),
            quota_exceeded: self.quota_exceeded.load(Ordering::Relaxed),
            last_used: self.last_used.load(Ordering::Relaxed),
            success_rate: if total == 0 { 1.0 } else { successful as f64 / total as f64 },
            available: self.is_available(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RemoteStatusSnapshot {
    pub remote: String,
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub error_streak: u64,
    pub healthy: bool,
    pub quota_exceeded: bool,
    pub last_used: u64,
    pub success_rate: f64,
    pub available: bool,
}

#[cfg(test)]
impl RemoteStatus {
    /// Backdate the failure/quota clocks so the next `try_auto_recover` call
    /// succeeds regardless of which cooldown applies. Test-only seam for
    /// exercising auto-recovery from outside this module without sleeping.
    pub(crate) fn force_recovery_window_elapsed(&self) {
        self.last_used.store(0, Ordering::Relaxed);
        self.quota_reset_at.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn becomes_unhealthy_after_threshold_failures() {
        let s = RemoteStatus::new("r1");
        assert!(s.is_available());
        for _ in 0..4 {
            s.mark_failure(false);
        }
        assert!(s.is_available(), "4 failures is below the 5-failure threshold");
        s.mark_failure(false);
        assert!(!s.is_available(), "the 5th consecutive failure should mark the remote unhealthy");
    }

    #[test]
    fn non_quota_unhealthy_remote_recovers_after_window() {
        let s = RemoteStatus::new("r1");
        for _ in 0..ERROR_STREAK_THRESHOLD {
            s.mark_failure(false);
        }
        assert!(!s.is_available());
        assert!(!s.try_auto_recover(), "recovery window has not elapsed yet");

        s.last_used.store(0, Ordering::Relaxed);
        assert!(s.try_auto_recover());
        assert!(s.is_available());
    }

    #[test]
    fn quota_excluded_remote_recovers_after_24h_cooldown() {
        let s = RemoteStatus::new("r1");
        s.mark_failure(true);
        assert!(!s.try_auto_recover(), "quota cooldown has not elapsed yet");

        s.quota_reset_at.store(0, Ordering::Relaxed);
        assert!(s.try_auto_recover());
        assert!(s.is_available());
    }

    #[test]
    fn success_resets_streak() {
        let s = RemoteStatus::new("r1");
        s.mark_failure(false);
        s.mark_failure(false);
        s.mark_success();
        s.mark_failure(false);
        assert!(s.is_available());
    }

    #[test]
    fn quota_error_immediately_excludes() {
        let s = RemoteStatus::new("r1");
        s.mark_failure(true);
        assert!(!s.is_available());
        assert!(!s.try_auto_recover());
    }

    #[test]
    fn classifier_matches_known_markers() {
        assert!(classify_quota_error("Error 403: User Rate Limit Exceeded"));
        assert!(classify_quota_error("quota exceeded for this file"));
        assert!(!classify_quota_error("connection reset by peer"));
    }
}
