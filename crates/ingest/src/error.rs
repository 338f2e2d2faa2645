use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("unsafe archive entry path: {0}")]
    UnsafeEntryPath(String),

    #[error("no manga folders found in archive")]
    NoMangaFound,

    #[error("chapter has no page images")]
    EmptyChapter,

    #[error("thumbnail generation failed: {0}")]
    Thumbnail(String),

    #[error("storage error: {0}")]
    Storage(#[from] inkvault_storage::StorageError),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("unknown job id: {0}")]
    UnknownJob(String),

    #[error("unknown resume token: {0}")]
    UnknownResumeToken(String),

    #[error("{0}")]
    Other(String),
}
