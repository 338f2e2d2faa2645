//! Manga metadata extraction from marker files dropped alongside a
//! manga's chapter folders (cover image, description, genres, alt
//! titles, type, status).

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

const COVER_NAMES: &[&str] = &["cover.jpg", "cover.jpeg", "cover.png", "cover.webp"];
const PREVIEW_NAMES: &[&str] = &["preview.jpg", "preview.jpeg", "preview.png", "preview.webp"];

const TYPE_MARKER_FILES: &[(&str, &str)] = &[
    ("manga.txt", "manga"),
    ("manhwa.txt", "manhwa"),
    ("manhua.txt", "manhua"),
    ("novel.txt", "novel"),
    ("doujinshi.txt", "doujinshi"),
    ("one-shot.txt", "one-shot"),
];

const VALID_TYPE_SLUGS: &[&str] = &["manga", "manhwa", "manhua", "novel", "doujinshi", "one-shot"];
const VALID_STATUSES: &[&str] = &["ongoing", "completed", "hiatus", "cancelled"];

static LANG_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z]{2,5}$").unwrap());
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AltTitle {
    pub title: String,
    pub lang: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeSource {
    File,
    Marker,
    /// Fell back to the caller-supplied default (no `type.txt`/marker present).
    Api,
}

#[derive(Debug, Clone)]
pub struct MangaMetadata {
    pub title: String,
    pub slug: String,
    pub cover_path: Option<PathBuf>,
    pub description: Option<String>,
    pub genres: Vec<String>,
    pub alt_titles: Vec<AltTitle>,
    pub type_slug: Option<String>,
    pub type_source: Option<TypeSource>,
    pub status: Option<String>,
}

/// Normalize an arbitrary title into an SEO slug: underscores and spaces to
/// hyphens, lowercase, strip anything outside `[a-z0-9-]`, collapse runs of
/// `-`, trim leading/trailing `-`.
pub fn normalize_slug(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let replaced = value.replace(['_', ' '], "-").to_lowercase();
    let filtered: String = replaced.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-').collect();
    let mut collapsed = String::with_capacity(filtered.len());
    let mut prev_dash = false;
    for c in filtered.chars() {
        if c == '-' {
            if !prev_dash {
                collapsed.push(c);
            }
            prev_dash = true;
        } else {
            collapsed.push(c);
            prev_dash = false;
        }
    }
    collapsed.trim_matches('-').to_string()
}

fn find_named_file(folder: &Path, names: &[&str]) -> Option<PathBuf> {
    for name in names {
        let candidate = folder.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    let entries = std::fs::read_dir(folder).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(fname) = path.file_name().and_then(|n| n.to_str()) {
            if names.contains(&fname.to_lowercase().as_str()) {
                return Some(path);
            }
        }
    }
    None
}

pub fn find_cover(folder: &Path) -> Option<PathBuf> {
    find_named_file(folder, COVER_NAMES)
}

pub fn find_preview(chapter_folder: &Path) -> Option<PathBuf> {
    find_named_file(chapter_folder, PREVIEW_NAMES)
}

pub fn read_description(folder: &Path) -> Option<String> {
    let text = std::fs::read_to_string(folder.join("description.txt")).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

pub fn read_genres(folder: &Path) -> Vec<String> {
    let Ok(text) = std::fs::read_to_string(folder.join("genres.txt")) else {
        return Vec::new();
    };
    text.trim().split(',').map(|g| g.trim().to_string()).filter(|g| !g.is_empty()).collect()
}

/// Parse `alt_titles.txt`: one `title|lang` pair per line, `#`-prefixed
/// comments and blank lines skipped. Malformed lines are dropped silently,
/// matching the source importer's tolerant behavior.
pub fn read_alt_titles(folder: &Path) -> Vec<AltTitle> {
    let Ok(text) = std::fs::read_to_string(folder.join("alt_titles.txt")) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((title, lang)) = line.split_once('|') else { continue };
        let title = title.trim();
        let lang = lang.trim().to_lowercase();
        if title.is_empty() || lang.is_empty() {
            continue;
        }
        if !LANG_CODE.is_match(&lang) {
            continue;
        }
        out.push(AltTitle { title: title.to_string(), lang });
    }
    out
}

/// File-marker type detection: presence of `manga.txt`/`manhwa.txt`/etc,
/// case-insensitive, content ignored.
pub fn read_type_from_marker(folder: &Path) -> Option<&'static str> {
    for (marker, type_slug) in TYPE_MARKER_FILES {
        if folder.join(marker).is_file() {
            return Some(type_slug);
        }
    }
    let entries = std::fs::read_dir(folder).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let fname = path.file_name()?.to_str()?.to_lowercase();
        if let Some((_, type_slug)) = TYPE_MARKER_FILES.iter().find(|(m, _)| *m == fname) {
            return Some(type_slug);
        }
    }
    None
}

/// Content-based type detection from `type.txt`, normalized to a known slug.
pub fn read_type_from_file(folder: &Path) -> Option<String> {
    let text = std::fs::read_to_string(folder.join("type.txt")).ok()?;
    let content = text.trim().to_lowercase();
    if content.is_empty() {
        return None;
    }
    let slug = WHITESPACE_RUN.replace_all(&content, "-").to_string();
    if VALID_TYPE_SLUGS.contains(&slug.as_str()) { Some(slug) } else { None }
}

pub fn read_status(folder: &Path) -> Option<String> {
    let text = std::fs::read_to_string(folder.join("status.txt")).ok()?;
    let content = text.trim().to_lowercase();
    if VALID_STATUSES.contains(&content.as_str()) { Some(content) } else { None }
}

/// Build full metadata for a manga folder. `type.txt` content wins over a
/// file-marker name, which wins over `default_type` (the API-supplied
/// default for this ingest job). Same priority for `status.txt` over
/// `default_status`.
pub fn extract_metadata(folder: &Path, default_type: &str, default_status: &str) -> MangaMetadata {
    let title = folder.file_name().and_then(|n| n.to_str()).unwrap_or("untitled").to_string();
    let slug = normalize_slug(&title);

    let type_from_file = read_type_from_file(folder);
    let type_from_marker = read_type_from_marker(folder);
    let (type_slug, type_source) = match (&type_from_file, type_from_marker) {
        (Some(t), _) => (Some(t.clone()), Some(TypeSource::File)),
        (None, Some(m)) => (Some(m.to_string()), Some(TypeSource::Marker)),
        (None, None) => (Some(default_type.to_string()), Some(TypeSource::Api)),
    };

    let status = read_status(folder).or_else(|| Some(default_status.to_string()));

    MangaMetadata {
        title,
        slug,
        cover_path: find_cover(folder),
        description: read_description(folder),
        genres: read_genres(folder),
        alt_titles: read_alt_titles(folder),
        type_slug,
        type_source,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn slug_normalizes_underscores_and_spaces() {
        assert_eq!(normalize_slug("crimson_reset"), "crimson-reset");
        assert_eq!(normalize_slug("One Piece"), "one-piece");
        assert_eq!(normalize_slug("solo  leveling"), "solo-leveling");
        assert_eq!(normalize_slug("action"), "action");
    }

    #[test]
    fn alt_titles_skip_comments_and_malformed_lines() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("alt_titles.txt"), "# comment\nOne Piece|en\nbad-line\n one|e1 \n").unwrap();
        let titles = read_alt_titles(dir.path());
        assert_eq!(titles, vec![AltTitle { title: "One Piece".into(), lang: "en".into() }]);
    }

    #[test]
    fn type_file_content_wins_over_marker() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("type.txt"), "Manhwa\n").unwrap();
        std::fs::write(dir.path().join("manga.txt"), "").unwrap();
        let meta = extract_metadata(dir.path(), "manga", "ongoing");
        assert_eq!(meta.type_slug.as_deref(), Some("manhwa"));
        assert_eq!(meta.type_source, Some(TypeSource::File));
    }

    #[test]
    fn marker_used_when_no_type_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("manhua.txt"), "").unwrap();
        let meta = extract_metadata(dir.path(), "manga", "ongoing");
        assert_eq!(meta.type_slug.as_deref(), Some("manhua"));
        assert_eq!(meta.type_source, Some(TypeSource::Marker));
    }

    #[test]
    fn api_default_used_when_no_file_or_marker_present() {
        let dir = tempdir().unwrap();
        let meta = extract_metadata(dir.path(), "novel", "hiatus");
        assert_eq!(meta.type_slug.as_deref(), Some("novel"));
        assert_eq!(meta.type_source, Some(TypeSource::Api));
        assert_eq!(meta.status.as_deref(), Some("hiatus"));
    }

    #[test]
    fn invalid_status_is_ignored() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("status.txt"), "paused\n").unwrap();
        assert_eq!(read_status(dir.path()), None);
    }
}
