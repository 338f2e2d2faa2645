//! ZIP extraction with path-traversal guards.

use std::fs::File;
use std::io::copy;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::IngestError;

/// Reject any entry name that could escape `dest_dir`: absolute paths,
/// `..` components, and (on read) embedded NUL bytes.
fn safe_entry_path(dest_dir: &Path, entry_name: &str) -> Result<PathBuf, IngestError> {
    let entry_path = Path::new(entry_name);
    if entry_path.is_absolute() || entry_name.contains('\0') {
        return Err(IngestError::UnsafeEntryPath(entry_name.to_string()));
    }
    if entry_path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(IngestError::UnsafeEntryPath(entry_name.to_string()));
    }
    Ok(dest_dir.join(entry_path))
}

/// Extract a ZIP archive's bytes into `dest_dir`, creating it if absent.
/// Every resolved entry path is verified to stay under `dest_dir`.
pub fn extract_zip(zip_bytes: &[u8], dest_dir: &Path) -> Result<usize, IngestError> {
    std::fs::create_dir_all(dest_dir)?;
    let reader = std::io::Cursor::new(zip_bytes);
    let mut archive = ZipArchive::new(reader)?;

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();
        let out_path = safe_entry_path(dest_dir, &name)?;

        if file.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out_file = File::create(&out_path)?;
        copy(&mut file, &mut out_file)?;
        extracted += 1;
    }

    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::{FileOptions, ZipWriter};

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = ZipWriter::new(cursor);
            let options = FileOptions::<()>::default();
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn extracts_nested_files() {
        let dir = tempdir().unwrap();
        let zip = build_zip(&[("Manga/Chapter 1/page1.jpg", b"data")]);
        let count = extract_zip(&zip, dir.path()).unwrap();
        assert_eq!(count, 1);
        assert!(dir.path().join("Manga/Chapter 1/page1.jpg").exists());
    }

    #[test]
    fn rejects_path_traversal_entries() {
        assert!(safe_entry_path(Path::new("/tmp/out"), "../../etc/passwd").is_err());
        assert!(safe_entry_path(Path::new("/tmp/out"), "a/../../b").is_err());
        assert!(safe_entry_path(Path::new("/tmp/out"), "/etc/passwd").is_err());
    }
}
