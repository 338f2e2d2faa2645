use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use inkvault_core::Config;
use inkvault_ingest::IngestEngine;
use inkvault_storage::{DaemonClientPool, DaemonSupervisor, StorageGroupRouter, UploadGroupPolicy};

/// Lock-free request counters for the `/health` endpoint. All fields use
/// `Ordering::Relaxed` — monotonic counters where eventual visibility
/// across request tasks is acceptable.
pub struct ProxyMetrics {
    pub reads_total: AtomicU64,
    pub reads_failed: AtomicU64,
    pub daemon_hits: AtomicU64,
    pub fallback_hits: AtomicU64,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self {
            reads_total: AtomicU64::new(0),
            reads_failed: AtomicU64::new(0),
            daemon_hits: AtomicU64::new(0),
            fallback_hits: AtomicU64::new(0),
        }
    }

    pub fn record_read(&self, ok: bool, via_daemon: bool) {
        self.reads_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.reads_failed.fetch_add(1, Ordering::Relaxed);
        }
        if via_daemon {
            self.daemon_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fallback_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ProxyMetricsSnapshot {
        ProxyMetricsSnapshot {
            reads_total: self.reads_total.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            daemon_hits: self.daemon_hits.load(Ordering::Relaxed),
            fallback_hits: self.fallback_hits.load(Ordering::Relaxed),
        }
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct ProxyMetricsSnapshot {
    pub reads_total: u64,
    pub reads_failed: u64,
    pub daemon_hits: u64,
    pub fallback_hits: u64,
}

pub struct AppState {
    pub config: Config,
    pub router: Arc<StorageGroupRouter>,
    pub daemon: Arc<DaemonSupervisor>,
    pub http_pool: Arc<DaemonClientPool>,
    pub policy: Arc<UploadGroupPolicy>,
    pub ingest: Arc<IngestEngine>,
    pub metrics: Arc<ProxyMetrics>,
}
