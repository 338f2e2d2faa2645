//! Bulk ingest orchestration: extract → detect → upload → mirror,
//! with progress tracked in a `ProgressStore` and page-one thumbnails
//! generated per chapter.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use tracing::{info, warn};

use inkvault_storage::{RcloneClient, StorageGroupRouter, UploadGroupPolicy};

use crate::archive::extract_zip;
use crate::catalog::{CatalogSink, ChapterRecord, MangaRecord};
use crate::chapters::{detect_chapters, ChapterInfo};
use crate::error::IngestError;
use crate::metadata::extract_metadata;
use crate::progress::{ChapterResult, JobStatus, ProgressStore};
use crate::thumbnail::generate_thumbnail;

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

pub struct IngestEngine {
    router: Arc<StorageGroupRouter>,
    policy: Arc<UploadGroupPolicy>,
    progress: Arc<ProgressStore>,
    catalog: Arc<dyn CatalogSink>,
    work_dir: std::path::PathBuf,
    auto_switch: bool,
    chapter_pattern: Regex,
}

impl IngestEngine {
    pub fn new(
        router: Arc<StorageGroupRouter>,
        policy: Arc<UploadGroupPolicy>,
        progress: Arc<ProgressStore>,
        catalog: Arc<dyn CatalogSink>,
        work_dir: std::path::PathBuf,
        auto_switch: bool,
        chapter_folder_pattern: &str,
    ) -> Self {
        let chapter_pattern = Regex::new(chapter_folder_pattern).unwrap_or_else(|e| {
            warn!(pattern = chapter_folder_pattern, error = %e, "invalid chapter folder pattern, falling back to default");
            Regex::new(inkvault_core::config::DEFAULT_CHAPTER_FOLDER_PATTERN).expect("default chapter pattern is valid")
        });
        Self { router, policy, progress, catalog, work_dir, auto_switch, chapter_pattern }
    }

    /// Kick off ingest of a ZIP archive's bytes. Returns the job id
    /// immediately; the actual extraction/upload work runs on a spawned
    /// task and reports through `self.progress`.
    pub fn start_ingest(self: &Arc<Self>, zip_bytes: Vec<u8>, default_type: String, default_status: String) -> String {
        let job_id = self.progress.create_job();
        let this = Arc::clone(self);
        let id_for_task = job_id.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_job(&id_for_task, zip_bytes, &default_type, &default_status).await {
                warn!(job_id = %id_for_task, error = %e, "ingest job failed");
                let _ = this.progress.update(&id_for_task, |j| {
                    j.status = JobStatus::Failed;
                    j.error = Some(e.to_string());
                });
            }
        });
        job_id
    }

    async fn run_job(self: &Arc<Self>, job_id: &str, zip_bytes: Vec<u8>, default_type: &str, default_status: &str) -> Result<(), IngestError> {
        let started_at = now_secs();
        self.progress.update(job_id, |j| {
            j.status = JobStatus::Extracting;
            j.started_at = Some(started_at);
        })?;

        let extract_dir = self.work_dir.join(job_id);
        let zip_bytes_clone = zip_bytes;
        let extract_dir_clone = extract_dir.clone();
        tokio::task::spawn_blocking(move || extract_zip(&zip_bytes_clone, &extract_dir_clone))
            .await
            .map_err(|e| IngestError::Other(e.to_string()))??;

        let manga_folders: Vec<std::path::PathBuf> = std::fs::read_dir(&extract_dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();

        if manga_folders.is_empty() {
            return Err(IngestError::NoMangaFound);
        }

        self.progress.update(job_id, |j| j.total_mangas = manga_folders.len())?;
        self.progress.update(job_id, |j| j.status = JobStatus::Analyzing)?;

        // Pre-scan every manga folder up front so `files_total` (and thus
        // `percent`) is known before the first byte is uploaded.
        let mut plan: Vec<(std::path::PathBuf, crate::metadata::MangaMetadata, Vec<ChapterInfo>)> = Vec::new();
        let mut files_total = 0usize;
        for folder in manga_folders {
            let meta = extract_metadata(&folder, default_type, default_status);
            let chapters = detect_chapters(&folder, &self.chapter_pattern)?;
            if chapters.is_empty() {
                let title = folder.file_name().and_then(|n| n.to_str()).unwrap_or("untitled");
                warn!(manga = %title, "no chapters detected, skipping");
                continue;
            }
            files_total += chapters.iter().map(|c| c.file_count).sum::<usize>();
            plan.push((folder, meta, chapters));
        }
        self.progress.update(job_id, |j| {
            j.files_total = files_total;
            j.recompute_percent();
        })?;

        let mut group_id = self.policy.get_active();

        for (_folder, meta, chapters) in &plan {
            let title = meta.title.clone();
            self.progress.update(job_id, |j| j.current_manga = Some(title.clone()))?;

            let remote = self.router.next_remote(group_id)?.to_string();
            let client = self
                .router
                .client_for(&remote)
                .ok_or_else(|| IngestError::Other(format!("no client for remote '{remote}'")))?
                .clone();

            let remote_root = format!("manga/{}", meta.slug);

            let cover_storage_path = if let Some(cover_path) = &meta.cover_path {
                let ext = cover_path.extension().and_then(|e| e.to_str()).unwrap_or("jpg");
                let dest = format!("{}/cover.{}", remote_root, ext);
                match client.upload_file(cover_path.to_str().unwrap_or_default(), &dest).await {
                    Ok(()) => {
                        self.router.mark_success(group_id, &remote);
                        Some(dest)
                    }
                    Err(e) => {
                        self.router.mark_failure(group_id, &remote, &e.to_string());
                        None
                    }
                }
            } else {
                None
            };

            self.catalog
                .upsert_manga(&MangaRecord::from_metadata(meta, cover_storage_path))
                .await
                .unwrap_or_else(|e| warn!(manga = %title, error = %e, "catalog upsert_manga failed"));

            self.progress.update(job_id, |j| j.status = JobStatus::Uploading)?;

            for chapter in chapters {
                let result = self
                    .upload_chapter(job_id, &client, &remote, group_id, &remote_root, &meta.slug, chapter)
                    .await;

                match result {
                    Ok(chapter_result) => {
                        let files_in_chapter = chapter.file_count;
                        self.progress.update(job_id, |j| {
                            j.files_uploaded += files_in_chapter;
                            j.chapter_results.push(chapter_result);
                            j.recompute_percent();
                        })?;

                        if self.router.is_full(group_id).unwrap_or(false) {
                            if let Some(next) = self.policy.advance_on_exhaustion(&self.router, self.auto_switch) {
                                info!(job_id, old_group = group_id, new_group = next, "storage group exhausted, switched active group");
                                group_id = next;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(manga = %title, chapter = %chapter.folder_name, error = %e, "chapter upload failed");
                        let remaining: Vec<String> = chapters
                            .iter()
                            .skip_while(|c| c.folder_name != chapter.folder_name)
                            .map(|c| c.folder_name.clone())
                            .collect();
                        let token = self.progress.issue_resume_token(job_id, &title, remaining);
                        self.progress.update(job_id, |j| {
                            j.chapters_failed += 1;
                            j.chapter_results.push(ChapterResult {
                                folder_name: chapter.folder_name.clone(),
                                uploaded: false,
                                mirrored: Vec::new(),
                                error: Some(format!("{e} (resume_token={token})")),
                            })
                        })?;
                        break;
                    }
                }
            }

            self.progress.update(job_id, |j| j.completed_mangas += 1)?;
        }

        let completed_at = now_secs();
        self.progress.update(job_id, |j| {
            j.status = JobStatus::Completed;
            j.completed_at = Some(completed_at);
        })?;
        let _ = std::fs::remove_dir_all(&extract_dir);
        Ok(())
    }

    async fn upload_chapter(
        self: &Arc<Self>,
        job_id: &str,
        client: &RcloneClient,
        remote: &str,
        group_id: u32,
        remote_root: &str,
        manga_slug: &str,
        chapter: &ChapterInfo,
    ) -> Result<ChapterResult, IngestError> {
        let chapter_remote_dir = format!("{}/ch-{}.{}", remote_root, chapter.chapter_main, chapter.chapter_sub);
        let local_dir = chapter.local_path.to_str().unwrap_or_default();

        client.upload_folder(local_dir, &chapter_remote_dir, chapter.file_count).await?;
        self.router.mark_success(group_id, remote);
        self.router.record_upload_bytes(group_id, chapter.total_size_bytes);

        let thumbnail_path = self.generate_and_upload_thumbnail(client, chapter, &chapter_remote_dir).await;

        self.catalog
            .upsert_chapter(
                manga_slug,
                &ChapterRecord {
                    slug: chapter.folder_name.clone(),
                    chapter_main: chapter.chapter_main,
                    chapter_sub: chapter.chapter_sub,
                    storage_group: group_id,
                    storage_path: chapter_remote_dir.clone(),
                    thumbnail_path,
                    page_count: chapter.file_count,
                },
            )
            .await
            .unwrap_or_else(|e| warn!(chapter = %chapter.folder_name, error = %e, "catalog upsert_chapter failed"));

        let backups = self.router.backups_of(group_id).unwrap_or_default();
        if !backups.is_empty() {
            self.spawn_mirror(job_id.to_string(), manga_slug.to_string(), chapter_remote_dir.clone(), remote.to_string(), backups.clone());
        }

        info!(manga = %manga_slug, chapter = %chapter.folder_name, "chapter uploaded");
        Ok(ChapterResult { folder_name: chapter.folder_name.clone(), uploaded: true, mirrored: backups, error: None })
    }

    async fn generate_and_upload_thumbnail(&self, client: &RcloneClient, chapter: &ChapterInfo, chapter_remote_dir: &str) -> Option<String> {
        let source_path = chapter.preview_path.clone().or_else(|| chapter.files.first().cloned())?;
        let source_bytes = tokio::fs::read(&source_path).await.ok()?;

        let thumbnail_bytes = tokio::task::spawn_blocking(move || generate_thumbnail(&source_bytes)).await.ok()?.ok()?;

        let thumbnail_path = format!("{}/thumbnail.jpg", chapter_remote_dir);
        let tmp_file = tempfile::NamedTempFile::new().ok()?;
        tokio::fs::write(tmp_file.path(), &thumbnail_bytes).await.ok()?;

        client.upload_file(tmp_file.path().to_str()?, &thumbnail_path).await.ok()?;
        Some(thumbnail_path)
    }

    pub fn job_status(&self, job_id: &str) -> Result<crate::progress::Job, IngestError> {
        self.progress.get_job(job_id).ok_or_else(|| IngestError::UnknownJob(job_id.to_string()))
    }

    /// Consume a resume token, reporting which chapters of a manga folder
    /// still need to be re-uploaded. The caller is expected to re-submit
    /// the archive; actual re-upload happens through `start_ingest` again.
    pub fn resume_info(&self, token: &str) -> Result<crate::progress::ResumeToken, IngestError> {
        self.progress.consume_resume_token(token)
    }

    /// Drop expired resume tokens. Intended to run on a periodic background tick.
    pub fn sweep_expired_resume_tokens(&self) -> usize {
        self.progress.sweep_expired_tokens()
    }

    /// Drop completed/failed jobs past their retention window. Intended to
    /// run on a periodic background tick.
    pub fn sweep_expired_jobs(&self) -> usize {
        self.progress.sweep_expired_jobs()
    }

    /// Mirror every chapter already uploaded to the primary into each
    /// configured backup remote. Runs detached from the request path;
    /// failures are logged, never surfaced to the uploader.
    pub fn spawn_mirror(self: &Arc<Self>, job_id: String, manga_slug: String, chapter_remote_dir: String, primary_remote: String, backups: Vec<String>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            for backup in backups {
                let Some(client) = this.router.client_for(&backup) else { continue };
                let source_spec = format!("{}:{}", primary_remote, chapter_remote_dir);
                match client.copy_from(&source_spec, &chapter_remote_dir, 1).await {
                    Ok(()) => {
                        info!(job_id = %job_id, manga = %manga_slug, backup = %backup, "mirrored chapter to backup");
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, manga = %manga_slug, backup = %backup, error = %e, "mirror failed");
                    }
                }
            }
        });
    }
}
