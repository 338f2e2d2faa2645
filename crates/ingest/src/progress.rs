//! Ingest Progress & Resume: in-memory job tracking plus resume
//! tokens for chapters that failed partway through upload.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use uuid::Uuid;

use crate::error::IngestError;

const RESUME_TOKEN_TTL_SECS: u64 = 48 * 60 * 60;
const JOB_TTL_SECS: u64 = 24 * 60 * 60;

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Extracting,
    Analyzing,
    Uploading,
    Mirroring,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterResult {
    pub folder_name: String,
    pub uploaded: bool,
    pub mirrored: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub total_mangas: usize,
    pub completed_mangas: usize,
    pub current_manga: Option<String>,
    pub chapter_results: Vec<ChapterResult>,
    pub error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    pub percent: f64,
    pub chapters_failed: usize,
    pub files_uploaded: usize,
    pub files_total: usize,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
}

impl Job {
    fn new(id: String) -> Self {
        let now = now_secs();
        Self {
            id,
            status: JobStatus::Queued,
            total_mangas: 0,
            completed_mangas: 0,
            current_manga: None,
            chapter_results: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            percent: 0.0,
            chapters_failed: 0,
            files_uploaded: 0,
            files_total: 0,
            started_at: None,
            completed_at: None,
        }
    }

    /// Recompute `percent` from `files_uploaded`/`files_total`. A no-op
    /// (percent stays 0) until `files_total` is known, which happens once
    /// the pre-scan of all manga folders completes.
    pub(crate) fn recompute_percent(&mut self) {
        if self.files_total == 0 {
            self.percent = 0.0;
        } else {
            self.percent = (self.files_uploaded as f64 / self.files_total as f64 * 100.0).min(100.0);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeToken {
    pub token: String,
    pub job_id: String,
    pub manga_folder: String,
    pub remaining_chapters: Vec<String>,
    pub created_at: u64,
    pub expires_at: u64,
}

/// In-memory store for ingest job progress and resume tokens. Cleared on
/// process restart by design: a restart means the sidecar daemons and any
/// staged temp extraction directories are gone too, so there is nothing
/// left worth resuming.
pub struct ProgressStore {
    jobs: Mutex<HashMap<String, Job>>,
    tokens: Mutex<HashMap<String, ResumeToken>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self { jobs: Mutex::new(HashMap::new()), tokens: Mutex::new(HashMap::new()) }
    }

    pub fn create_job(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let job = Job::new(id.clone());
        self.jobs.lock().expect("jobs mutex poisoned").insert(id.clone(), job);
        id
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.jobs.lock().expect("jobs mutex poisoned").get(id).cloned()
    }

    pub fn update<F: FnOnce(&mut Job)>(&self, id: &str, f: F) -> Result<(), IngestError> {
        let mut jobs = self.jobs.lock().expect("jobs mutex poisoned");
        let job = jobs.get_mut(id).ok_or_else(|| IngestError::UnknownJob(id.to_string()))?;
        f(job);
        job.updated_at = now_secs();
        Ok(())
    }

    /// Issue a resume token for a manga whose chapter upload failed partway
    /// through, naming the chapters still pending.
    pub fn issue_resume_token(&self, job_id: &str, manga_folder: &str, remaining_chapters: Vec<String>) -> String {
        let token = Uuid::new_v4().to_string();
        let now = now_secs();
        let entry = ResumeToken {
            token: token.clone(),
            job_id: job_id.to_string(),
            manga_folder: manga_folder.to_string(),
            remaining_chapters,
            created_at: now,
            expires_at: now + RESUME_TOKEN_TTL_SECS,
        };
        self.tokens.lock().expect("tokens mutex poisoned").insert(token.clone(), entry);
        token
    }

    pub fn consume_resume_token(&self, token: &str) -> Result<ResumeToken, IngestError> {
        let mut tokens = self.tokens.lock().expect("tokens mutex poisoned");
        let entry = tokens.remove(token).ok_or_else(|| IngestError::UnknownResumeToken(token.to_string()))?;
        if entry.expires_at < now_secs() {
            return Err(IngestError::UnknownResumeToken(token.to_string()));
        }
        Ok(entry)
    }

    /// Drop expired resume tokens. Intended for a periodic background sweep.
    pub fn sweep_expired_tokens(&self) -> usize {
        let mut tokens = self.tokens.lock().expect("tokens mutex poisoned");
        let now = now_secs();
        let before = tokens.len();
        tokens.retain(|_, t| t.expires_at >= now);
        before - tokens.len()
    }

    /// Drop jobs that finished (or failed) more than `JOB_TTL_SECS` ago.
    /// Jobs still in flight are never pruned regardless of age.
    pub fn sweep_expired_jobs(&self) -> usize {
        let mut jobs = self.jobs.lock().expect("jobs mutex poisoned");
        let now = now_secs();
        let before = jobs.len();
        jobs.retain(|_, j| match j.status {
            JobStatus::Completed | JobStatus::Failed => now.saturating_sub(j.updated_at) < JOB_TTL_SECS,
            _ => true,
        });
        before - jobs.len()
    }
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_lifecycle_updates_status() {
        let store = ProgressStore::new();
        let id = store.create_job();
        store.update(&id, |j| j.status = JobStatus::Uploading).unwrap();
        let job = store.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Uploading);
    }

    #[test]
    fn unknown_job_update_errors() {
        let store = ProgressStore::new();
        assert!(store.update("missing", |_| {}).is_err());
    }

    #[test]
    fn resume_token_round_trips_once() {
        let store = ProgressStore::new();
        let job_id = store.create_job();
        let token = store.issue_resume_token(&job_id, "One Piece", vec!["Chapter 3".into()]);
        let entry = store.consume_resume_token(&token).unwrap();
        assert_eq!(entry.manga_folder, "One Piece");
        assert!(store.consume_resume_token(&token).is_err());
    }

    #[test]
    fn resume_token_ttl_is_48_hours() {
        let store = ProgressStore::new();
        let job_id = store.create_job();
        let token = store.issue_resume_token(&job_id, "One Piece", vec![]);
        let tokens = store.tokens.lock().unwrap();
        let entry = tokens.get(&token).unwrap();
        assert_eq!(entry.expires_at - entry.created_at, 48 * 60 * 60);
    }

    #[test]
    fn percent_recomputes_from_file_counts() {
        let mut job = Job::new("j1".into());
        job.files_total = 40;
        job.files_uploaded = 10;
        job.recompute_percent();
        assert_eq!(job.percent, 25.0);
    }

    #[test]
    fn sweep_expired_jobs_removes_stale_entries() {
        let store = ProgressStore::new();
        let done_id = store.create_job();
        store.update(&done_id, |j| {
            j.status = JobStatus::Completed;
            j.updated_at = 0;
        }).unwrap();
        let active_id = store.create_job();

        let removed = store.sweep_expired_jobs();
        assert_eq!(removed, 1);
        assert!(store.get_job(&done_id).is_none());
        assert!(store.get_job(&active_id).is_some());
    }
}
