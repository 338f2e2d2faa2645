//! Remote Client: thin wrapper over the `rclone` CLI.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, warn};

use crate::env_scrub::scrub_env;
use crate::error::StorageError;

const ALLOWED_IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Output of a completed subprocess invocation.
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct About {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub trashed: u64,
}

#[derive(Deserialize)]
struct LsjsonEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "IsDir", default)]
    is_dir: bool,
    #[serde(rename = "MimeType", default)]
    mime_type: Option<String>,
}

#[derive(Deserialize)]
struct AboutJson {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    used: u64,
    #[serde(default)]
    free: u64,
    #[serde(default)]
    trashed: u64,
}

/// Thin wrapper over one configured rclone remote (`remote:`).
#[derive(Clone)]
pub struct RcloneClient {
    binary: String,
    env_reserved_prefix: String,
    remote: String,
}

/// Validate a public path argument: non-empty, no `..`, no backslash, no
/// leading slash, minimum length 3.
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    if path.is_empty() || path.len() < 3 {
        return Err(StorageError::InvalidPath(format!("path too short: {:?}", path)));
    }
    if path.contains("..") || path.contains('\\') || path.starts_with('/') {
        return Err(StorageError::InvalidPath(format!("unsafe path: {:?}", path)));
    }
    Ok(())
}

pub fn validate_image_path(path: &str) -> Result<(), StorageError> {
    validate_path(path)?;
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    if !ALLOWED_IMAGE_EXTS.contains(&ext.as_str()) {
        return Err(StorageError::InvalidPath(format!("disallowed extension: {:?}", path)));
    }
    Ok(())
}

/// Format a duration as rclone expects (`"30s"`), never a bare number.
fn fmt_duration(d: Duration) -> String {
    format!("{}s", d.as_secs().max(1))
}

impl RcloneClient {
    pub fn new(binary: impl Into<String>, env_reserved_prefix: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            env_reserved_prefix: env_reserved_prefix.into(),
            remote: remote.into(),
        }
    }

    pub fn remote_name(&self) -> &str {
        &self.remote
    }

    fn remote_path(&self, path: &str) -> String {
        format!("{}:{}", self.remote, path)
    }

    async fn run(&self, args: &[&str], call_timeout: Duration) -> Result<CommandOutput, StorageError> {
        let env = scrub_env(&self.env_reserved_prefix);
        debug!(remote = %self.remote, args = ?args, "invoking rclone");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(StorageError::Io)?;

        // Process-level deadline = requested timeout + 5s grace.
        let deadline = call_timeout + Duration::from_secs(5);
        let output = tokio_timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| StorageError::RemoteTransient {
                remote: self.remote.clone(),
                reason: "subprocess deadline exceeded".to_string(),
            })?
            .map_err(StorageError::Io)?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            warn!(remote = %self.remote, code = ?output.status.code(), stderr = %truncate(&stderr, 2048), "rclone call failed");
        }

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr,
        })
    }

    pub async fn list_files(&self, folder: &str, mime_filter: Option<&str>) -> Result<Vec<String>, StorageError> {
        validate_path(folder)?;
        let remote_arg = self.remote_path(folder);
        let timeout = Duration::from_secs(30);
        let timeout_str = fmt_duration(timeout);
        let out = self
            .run(&["lsjson", "--files-only", &remote_arg, "--timeout", &timeout_str], timeout)
            .await?;
        if !out.success {
            return Err(tool_error(out));
        }
        let entries: Vec<LsjsonEntry> = serde_json::from_slice(&out.stdout)
            .map_err(|e| StorageError::Other(format!("bad lsjson output: {e}")))?;

        let mut names: Vec<String> = entries
            .into_iter()
            .filter(|e| !e.is_dir)
            .filter(|e| match mime_filter {
                Some(needle) => e.mime_type.as_deref().map(|m| m.contains(needle)).unwrap_or(false),
                None => true,
            })
            .map(|e| format!("{}/{}", folder.trim_end_matches('/'), e.name))
            .collect();

        crate::natural_sort::natural_sort(&mut names);
        Ok(names)
    }

    pub async fn download_bytes(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        validate_path(path)?;
        let remote_arg = self.remote_path(path);
        let timeout = Duration::from_secs(60);
        let timeout_str = fmt_duration(timeout);
        let out = self.run(&["cat", &remote_arg, "--timeout", &timeout_str], timeout).await?;
        if !out.success {
            return Err(tool_error(out));
        }
        Ok(out.stdout)
    }

    pub async fn upload_file(&self, local: &str, remote_path: &str) -> Result<(), StorageError> {
        validate_path(remote_path)?;
        let remote_arg = self.remote_path(remote_path);
        let timeout = Duration::from_secs(120);
        let timeout_str = fmt_duration(timeout);
        let out = self.run(&["copyto", local, &remote_arg, "--timeout", &timeout_str], timeout).await?;
        if !out.success {
            return Err(tool_error(out));
        }
        Ok(())
    }

    /// Canonical batch write: copy a whole local folder to a remote folder in
    /// a single tuned transfer. Timeout scales with file count.
    pub async fn upload_folder(
        &self,
        local_dir: &str,
        remote_dir: &str,
        file_count: usize,
    ) -> Result<(), StorageError> {
        validate_path(remote_dir)?;
        let remote_arg = self.remote_path(remote_dir);
        let timeout_secs = (file_count as u64 * 10).max(300);
        let timeout_str = fmt_duration(Duration::from_secs(timeout_secs));
        let out = self
            .run(
                &[
                    "copy",
                    local_dir,
                    &remote_arg,
                    "--transfers",
                    "8",
                    "--checkers",
                    "8",
                    "--drive-chunk-size",
                    "64M",
                    "--fast-list",
                    "--no-traverse",
                    "--timeout",
                    &timeout_str,
                ],
                Duration::from_secs(timeout_secs),
            )
            .await?;
        if !out.success {
            return Err(tool_error(out));
        }
        Ok(())
    }

    /// Server-side copy used for mirroring a chapter into a backup remote:
    /// `source_spec` is `"<primary_remote>:<path>"`, destination is this
    /// client's own remote.
    pub async fn copy_from(&self, source_spec: &str, remote_dir: &str, file_count: usize) -> Result<(), StorageError> {
        validate_path(remote_dir)?;
        let remote_arg = self.remote_path(remote_dir);
        let timeout_secs = (file_count as u64 * 10).max(300);
        let timeout_str = fmt_duration(Duration::from_secs(timeout_secs));
        let out = self
            .run(
                &[
                    "copy",
                    source_spec,
                    &remote_arg,
                    "--transfers",
                    "8",
                    "--checkers",
                    "8",
                    "--no-traverse",
                    "--timeout",
                    &timeout_str,
                ],
                Duration::from_secs(timeout_secs),
            )
            .await?;
        if !out.success {
            return Err(tool_error(out));
        }
        Ok(())
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        validate_path(path)?;
        let remote_arg = self.remote_path(path);
        let timeout = Duration::from_secs(15);
        let timeout_str = fmt_duration(timeout);
        let out = self.run(&["mkdir", &remote_arg, "--timeout", &timeout_str], timeout).await?;
        if !out.success {
            return Err(tool_error(out));
        }
        Ok(())
    }

    pub async fn purge(&self, path: &str) -> Result<(), StorageError> {
        validate_path(path)?;
        let remote_arg = self.remote_path(path);
        let timeout = Duration::from_secs(60);
        let timeout_str = fmt_duration(timeout);
        let out = self.run(&["purge", &remote_arg, "--timeout", &timeout_str], timeout).await?;
        if !out.success {
            return Err(tool_error(out));
        }
        Ok(())
    }

    pub async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        validate_path(path)?;
        let remote_arg = self.remote_path(path);
        let timeout = Duration::from_secs(15);
        let timeout_str = fmt_duration(timeout);
        let out = self.run(&["deletefile", &remote_arg, "--timeout", &timeout_str], timeout).await?;
        if !out.success {
            return Err(tool_error(out));
        }
        Ok(())
    }

    pub async fn about(&self) -> Result<About, StorageError> {
        let remote_arg = format!("{}:", self.remote);
        let timeout = Duration::from_secs(15);
        let timeout_str = fmt_duration(timeout);
        let out = self.run(&["about", "--json", &remote_arg, "--timeout", &timeout_str], timeout).await?;
        if !out.success {
            return Err(tool_error(out));
        }
        let parsed: AboutJson = serde_json::from_slice(&out.stdout)
            .map_err(|e| StorageError::Other(format!("bad about output: {e}")))?;
        Ok(About {
            total: parsed.total,
            used: parsed.used,
            free: parsed.free,
            trashed: parsed.trashed,
        })
    }

    pub async fn test_connection(&self) -> Result<bool, StorageError> {
        let timeout = Duration::from_secs(10);
        let timeout_str = fmt_duration(timeout);
        let out = self.run(&["listremotes", "--timeout", &timeout_str], timeout).await?;
        if !out.success {
            return Err(tool_error(out));
        }
        let listing = String::from_utf8_lossy(&out.stdout);
        let needle = format!("{}:", self.remote);
        Ok(listing.lines().any(|l| l.trim() == needle))
    }
}

fn tool_error(out: CommandOutput) -> StorageError {
    StorageError::ToolInvocation { code: out.code, stderr: truncate(&out.stderr, 2048) }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...(truncated)", &s[..max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_and_unsafe_paths() {
        assert!(validate_path("").is_err());
        assert!(validate_path("a").is_err());
        assert!(validate_path("../etc/passwd").is_err());
        assert!(validate_path("/abs/path").is_err());
        assert!(validate_path(r"a\b").is_err());
        assert!(validate_path("ok/path.jpg").is_ok());
    }

    #[test]
    fn image_path_requires_allowed_extension() {
        assert!(validate_image_path("a/b.jpg").is_ok());
        assert!(validate_image_path("a/b.gif").is_err());
    }

    #[test]
    fn duration_formats_with_unit_suffix() {
        assert_eq!(fmt_duration(Duration::from_secs(30)), "30s");
    }
}
