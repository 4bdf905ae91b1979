//! Filesystem helpers for received payloads.
//!
//! File names arrive from an untrusted peer and must never escape the
//! receive directory or silently overwrite what is already there.

use std::path::{Path, PathBuf};

/// Strips path separators and leading dots from a received file name.
///
/// Separators become underscores, so `../../x` cannot traverse and a
/// name like `.bashrc` cannot hide itself. A name with nothing left
/// becomes `unnamed`.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Picks a destination path in `dir` that does not collide with an
/// existing file, appending ` (1)`, ` (2)`, … before the extension.
#[must_use]
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = split_name(file_name);
    let mut n: u32 = 1;
    loop {
        let renamed = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(renamed);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Given a traversal attempt, when sanitized, then no separator survives.
    #[test]
    fn given_traversal_name_when_sanitized_then_no_separators_survive() {
        let name = sanitize_file_name("../../etc/passwd");
        assert!(!name.contains('/'));
        assert!(!name.starts_with('.'));
    }

    /// Given a windows-style path, when sanitized, then backslashes become underscores.
    #[test]
    fn given_backslash_path_when_sanitized_then_flattened() {
        assert_eq!(sanitize_file_name("a\\b\\c.txt"), "a_b_c.txt");
    }

    /// Given a hidden-file name, when sanitized, then the leading dots are stripped.
    #[test]
    fn given_hidden_file_name_when_sanitized_then_dots_stripped() {
        assert_eq!(sanitize_file_name(".bashrc"), "bashrc");
    }

    /// Given a name that sanitizes to nothing, when sanitized, then a placeholder is used.
    #[test]
    fn given_empty_after_cleaning_when_sanitized_then_placeholder() {
        assert_eq!(sanitize_file_name("..."), "unnamed");
        assert_eq!(sanitize_file_name("   "), "unnamed");
    }

    /// Given an ordinary name, when sanitized, then it is unchanged.
    #[test]
    fn given_ordinary_name_when_sanitized_then_unchanged() {
        assert_eq!(sanitize_file_name("photo.jpg"), "photo.jpg");
    }

    /// Given no collision, when resolving, then the plain name is used.
    #[test]
    fn given_no_collision_when_resolving_then_plain_name() {
        let dir = tempfile::tempdir().unwrap();
        let dest = unique_destination(dir.path(), "report.pdf");
        assert_eq!(dest, dir.path().join("report.pdf"));
    }

    /// Given an existing file, when resolving, then a numbered name is chosen.
    #[test]
    fn given_collision_when_resolving_then_numbered_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"x").unwrap();
        let dest = unique_destination(dir.path(), "report.pdf");
        assert_eq!(dest, dir.path().join("report (1).pdf"));
    }

    /// Given two existing collisions, when resolving, then the counter advances.
    #[test]
    fn given_two_collisions_when_resolving_then_counter_advances() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data"), b"x").unwrap();
        std::fs::write(dir.path().join("data (1)"), b"x").unwrap();
        let dest = unique_destination(dir.path(), "data");
        assert_eq!(dest, dir.path().join("data (2)"));
    }
}
