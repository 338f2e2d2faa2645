//! Chapter-folder detection: picks chapter subfolders out of a manga
//! folder, collects their page images, and figures out (main, sub)
//! chapter numbers for ordering.

use std::path::{Path, PathBuf};

use regex::Regex;

use inkvault_storage::natural_sort;

use crate::metadata::find_preview;

const ALLOWED_IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const SKIP_FOLDER_NAMES: &[&str] = &["metadata", "extras", "covers"];

#[derive(Debug, Clone)]
pub struct ChapterInfo {
    pub folder_name: String,
    pub local_path: PathBuf,
    pub chapter_main: u32,
    pub chapter_sub: u32,
    pub files: Vec<PathBuf>,
    pub preview_path: Option<PathBuf>,
    pub file_count: usize,
    pub total_size_bytes: u64,
}

/// Extract `(main, sub)` chapter numbers from a folder name using `pattern`.
/// `sub` is 0 when the name has no decimal part, or the pattern doesn't
/// match at all (e.g. a non-chapter folder).
pub fn parse_chapter_number(folder_name: &str, pattern: &Regex) -> (u32, u32) {
    let Some(caps) = pattern.captures(folder_name) else {
        return (0, 0);
    };
    let main = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let sub = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    (main, sub)
}

fn is_image(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).map(|e| ALLOWED_IMAGE_EXTS.contains(&e.to_lowercase().as_str())).unwrap_or(false)
}

fn is_preview_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_lowercase())
        .map(|n| ["preview.jpg", "preview.jpeg", "preview.png", "preview.webp"].contains(&n.as_str()))
        .unwrap_or(false)
}

/// Scan `manga_folder`'s immediate subdirectories for chapters: a chapter
/// folder is any directory (not named `metadata`/`extras`/`covers`, and
/// whose name matches `chapter_pattern`) that contains at least one page
/// image after excluding `preview.*`. Chapters are returned sorted by
/// `(chapter_main, chapter_sub)`.
pub fn detect_chapters(manga_folder: &Path, chapter_pattern: &Regex) -> std::io::Result<Vec<ChapterInfo>> {
    let mut chapters = Vec::new();

    for entry in std::fs::read_dir(manga_folder)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let folder_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        if SKIP_FOLDER_NAMES.contains(&folder_name.to_lowercase().as_str()) {
            continue;
        }
        if !chapter_pattern.is_match(&folder_name) {
            continue;
        }

        let preview_path = find_preview(&path);

        let mut files: Vec<PathBuf> = std::fs::read_dir(&path)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_image(p) && !is_preview_name(p))
            .collect();

        if files.is_empty() {
            continue;
        }

        files.sort_by(|a, b| {
            let an = a.file_name().unwrap().to_string_lossy().to_string();
            let bn = b.file_name().unwrap().to_string_lossy().to_string();
            natural_sort::natural_cmp(&an, &bn)
        });

        let total_size_bytes = files.iter().filter_map(|f| std::fs::metadata(f).ok()).map(|m| m.len()).sum();
        let (chapter_main, chapter_sub) = parse_chapter_number(&folder_name, chapter_pattern);

        chapters.push(ChapterInfo {
            file_count: files.len(),
            folder_name,
            local_path: path,
            chapter_main,
            chapter_sub,
            files,
            preview_path,
            total_size_bytes,
        });
    }

    chapters.sort_by_key(|c| (c.chapter_main, c.chapter_sub));
    Ok(chapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkvault_core::config::DEFAULT_CHAPTER_FOLDER_PATTERN;
    use tempfile::tempdir;

    fn pattern() -> Regex {
        Regex::new(DEFAULT_CHAPTER_FOLDER_PATTERN).unwrap()
    }

    #[test]
    fn parses_plain_and_decimal_chapter_numbers() {
        let re = pattern();
        assert_eq!(parse_chapter_number("Chapter 12", &re), (12, 0));
        assert_eq!(parse_chapter_number("chapter_12.5", &re), (12, 5));
        assert_eq!(parse_chapter_number("Artbook", &re), (0, 0));
        assert_eq!(parse_chapter_number("extras", &re), (0, 0));
    }

    #[test]
    fn detects_chapters_and_skips_metadata_folders() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Chapter 1")).unwrap();
        std::fs::write(dir.path().join("Chapter 1/002.jpg"), b"a").unwrap();
        std::fs::write(dir.path().join("Chapter 1/001.jpg"), b"a").unwrap();
        std::fs::create_dir_all(dir.path().join("metadata")).unwrap();
        std::fs::write(dir.path().join("metadata/notes.txt"), b"x").unwrap();

        let chapters = detect_chapters(dir.path(), &pattern()).unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].file_count, 2);
        assert_eq!(chapters[0].files[0].file_name().unwrap().to_str().unwrap(), "001.jpg");
    }

    #[test]
    fn non_chapter_folder_is_not_detected_as_a_chapter() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Artbook")).unwrap();
        std::fs::write(dir.path().join("Artbook/001.jpg"), b"a").unwrap();
        std::fs::create_dir_all(dir.path().join("Chapter 1")).unwrap();
        std::fs::write(dir.path().join("Chapter 1/001.jpg"), b"a").unwrap();

        let chapters = detect_chapters(dir.path(), &pattern()).unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].folder_name, "Chapter 1");
    }

    #[test]
    fn chapter_with_only_preview_and_no_pages_is_skipped() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Chapter 2")).unwrap();
        std::fs::write(dir.path().join("Chapter 2/preview.jpg"), b"a").unwrap();

        let chapters = detect_chapters(dir.path(), &pattern()).unwrap();
        assert!(chapters.is_empty());
    }

    #[test]
    fn chapters_sort_by_main_then_sub() {
        let dir = tempdir().unwrap();
        for name in ["Chapter 2", "Chapter 1.5", "Chapter 1"] {
            let p = dir.path().join(name);
            std::fs::create_dir_all(&p).unwrap();
            std::fs::write(p.join("001.jpg"), b"a").unwrap();
        }
        let chapters = detect_chapters(dir.path(), &pattern()).unwrap();
        let order: Vec<&str> = chapters.iter().map(|c| c.folder_name.as_str()).collect();
        assert_eq!(order, vec!["Chapter 1", "Chapter 1.5", "Chapter 2"]);
    }
}
