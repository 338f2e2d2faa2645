//! Path-Prefix Group Encoding.
//!
//! Stored paths are `[@N/]<relative>` where the bracketed prefix appears iff
//! `N >= 2`. A bare `@` (no digit, no slash) is a legacy marker that read
//! paths map to group 2; new writes never emit it.

use std::sync::LazyLock;

use regex::Regex;

static GROUP_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^@(\d+)/").unwrap());

/// Decode the storage group a path belongs to. Defaults to group 1 when no
/// recognizable prefix is present.
pub fn group_of(path: &str) -> u32 {
    if let Some(caps) = GROUP_PREFIX.captures(path) {
        if let Ok(n) = caps[1].parse::<u32>() {
            return n;
        }
    }
    if path.starts_with('@') {
        return 2;
    }
    1
}

/// Strip a group prefix from `path`, returning the relative part.
///
/// This is a string-prefix strip, never a character-set trim: `clean("@@abc")`
/// yields `@abc` (only the outer `@` is a legacy marker), and a nested
/// numeric prefix like `@2/@3/x` strips only the outermost one.
pub fn clean(path: &str) -> String {
    if let Some(caps) = GROUP_PREFIX.captures(path) {
        let whole = caps.get(0).unwrap().as_str();
        return path[whole.len()..].to_string();
    }
    if let Some(rest) = path.strip_prefix('@') {
        return rest.to_string();
    }
    path.to_string()
}

/// Encode `relative` with the group prefix for `group`. Idempotent: calling
/// `mark` on an already-correctly-prefixed path leaves it unchanged.
pub fn mark(relative: &str, group: u32) -> String {
    if group <= 1 {
        return relative.to_string();
    }
    let expected_prefix = format!("@{}/", group);
    if relative.starts_with(&expected_prefix) {
        return relative.to_string();
    }
    format!("{}{}", expected_prefix, relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_for_all_groups() {
        for group in 1..=5u32 {
            let marked = mark("a/b/c.jpg", group);
            assert_eq!(clean(&marked), "a/b/c.jpg");
            assert_eq!(group_of(&marked), group);
        }
    }

    #[test]
    fn no_double_prefix() {
        let once = mark("x/y.jpg", 3);
        let twice = mark(&once, 3);
        assert_eq!(once, twice);
    }

    #[test]
    fn clean_is_string_prefix_not_charset() {
        assert_eq!(clean("@@abc"), "@abc");
        assert_eq!(clean("@2/@3/x"), "@3/x");
    }

    #[test]
    fn legacy_bare_at_maps_to_group_two() {
        assert_eq!(group_of("@x/y.jpg"), 2);
        assert_eq!(clean("@x/y.jpg"), "x/y.jpg");
    }

    #[test]
    fn plain_path_is_group_one() {
        assert_eq!(group_of("a/b.jpg"), 1);
        assert_eq!(clean("a/b.jpg"), "a/b.jpg");
        assert_eq!(mark("a/b.jpg", 1), "a/b.jpg");
    }
}
