//! Thin interface to an external catalog (manga/chapter metadata store)
//! the ingest pipeline reports into. The proxy itself has no database;
//! whatever serves the public reading UI owns catalog storage and is
//! reached over HTTP.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::IngestError;
use crate::metadata::MangaMetadata;

#[derive(Debug, Clone, Serialize)]
pub struct ChapterRecord {
    pub slug: String,
    pub chapter_main: u32,
    pub chapter_sub: u32,
    pub storage_group: u32,
    pub storage_path: String,
    pub thumbnail_path: Option<String>,
    pub page_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MangaRecord {
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub genres: Vec<String>,
    pub type_slug: Option<String>,
    pub status: Option<String>,
    pub cover_storage_path: Option<String>,
}

impl MangaRecord {
    pub fn from_metadata(meta: &MangaMetadata, cover_storage_path: Option<String>) -> Self {
        Self {
            title: meta.title.clone(),
            slug: meta.slug.clone(),
            description: meta.description.clone(),
            genres: meta.genres.clone(),
            type_slug: meta.type_slug.clone(),
            status: meta.status.clone(),
            cover_storage_path,
        }
    }
}

#[async_trait]
pub trait CatalogSink: Send + Sync {
    async fn upsert_manga(&self, manga: &MangaRecord) -> Result<(), IngestError>;
    async fn upsert_chapter(&self, manga_slug: &str, chapter: &ChapterRecord) -> Result<(), IngestError>;
}

/// Used when no catalog URL is configured: ingest still runs (storage
/// upload completes) but nothing is reported anywhere for the reading UI
/// to pick up.
pub struct NullCatalogSink;

#[async_trait]
impl CatalogSink for NullCatalogSink {
    async fn upsert_manga(&self, _manga: &MangaRecord) -> Result<(), IngestError> {
        Ok(())
    }

    async fn upsert_chapter(&self, _manga_slug: &str, _chapter: &ChapterRecord) -> Result<(), IngestError> {
        Ok(())
    }
}

/// Posts JSON records to a configured external catalog service.
pub struct HttpCatalogSink {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCatalogSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: reqwest::Client::new() }
    }
}

#[async_trait]
impl CatalogSink for HttpCatalogSink {
    async fn upsert_manga(&self, manga: &MangaRecord) -> Result<(), IngestError> {
        let url = format!("{}/manga/{}", self.base_url, manga.slug);
        self.client.put(&url).json(manga).send().await.map_err(|e| IngestError::Other(e.to_string()))?;
        Ok(())
    }

    async fn upsert_chapter(&self, manga_slug: &str, chapter: &ChapterRecord) -> Result<(), IngestError> {
        let url = format!("{}/manga/{}/chapters/{}.{}", self.base_url, manga_slug, chapter.chapter_main, chapter.chapter_sub);
        self.client.put(&url).json(chapter).send().await.map_err(|e| IngestError::Other(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_sink_never_errors() {
        let sink = NullCatalogSink;
        let manga = MangaRecord {
            title: "One Piece".into(),
            slug: "one-piece".into(),
            description: None,
            genres: vec![],
            type_slug: None,
            status: None,
            cover_storage_path: None,
        };
        assert!(sink.upsert_manga(&manga).await.is_ok());
    }
}
