//! Centralized subprocess environment scrubbing.
//!
//! Every rclone invocation gets a freshly built environment map with any
//! variable whose name starts with the reserved prefix removed, so a stray
//! host-level `RCLONE_TIMEOUT=garbage` can never silently override a flag
//! this process passes explicitly. Must be called for every spawn; never
//! rely on a process-wide sanitized global.

use std::collections::HashMap;

/// Build a scrubbed environment map from the current process environment.
pub fn scrub_env(reserved_prefix: &str) -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| !k.starts_with(reserved_prefix))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_every_reserved_prefixed_var() {
        std::env::set_var("RCLONE_TIMEOUT", "garbage");
        std::env::set_var("RCLONE_CONFIG", "/tmp/rclone.conf");
        std::env::set_var("UNRELATED_VAR", "kept");

        let scrubbed = scrub_env("RCLONE_");

        assert!(!scrubbed.keys().any(|k| k.starts_with("RCLONE_")));
        assert_eq!(scrubbed.get("UNRELATED_VAR").map(String::as_str), Some("kept"));

        std::env::remove_var("RCLONE_TIMEOUT");
        std::env::remove_var("RCLONE_CONFIG");
        std::env::remove_var("UNRELATED_VAR");
    }
}
