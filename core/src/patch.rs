//! Unified-diff parsing: header extraction and hunk delimiting only.
//!
//! There is no intermediate AST (§9 design notes) — patches stay text
//! throughout; the parsing here is just enough to locate metadata, hunk
//! boundaries, and per-file diff slices.

use crate::types::{Hunk, PatchMetadata};
use once_cell::sync::Lazy;
use regex::Regex;

static HUNK_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@(.*)$").expect("static regex"));

static DIFF_GIT_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^diff --git a/(\S+) b/(\S+)").expect("static regex"));

/// Extracts the author, date, subject, and free-form body (the patch
/// intent) from a patch's leading envelope, stopping at the first bare
/// `---` separator.
pub fn parse_metadata(patch: &str) -> PatchMetadata {
    let mut metadata = PatchMetadata::default();
    let mut body_lines: Vec<&str> = Vec::new();
    let mut in_body = false;

    for line in patch.lines() {
        if line == "---" {
            break;
        }
        if let Some(rest) = line.strip_prefix("From: ") {
            metadata.author = rest.trim().to_string();
            continue;
        }
        if let Some(rest) = line.strip_prefix("Date: ") {
            metadata.date = rest.trim().to_string();
            continue;
        }
        if let Some(rest) = line.strip_prefix("Subject: ") {
            metadata.subject = rest.trim().to_string();
            in_body = true;
            continue;
        }
        if in_body {
            body_lines.push(line);
        }
    }

    while matches!(body_lines.first(), Some(&"")) {
        body_lines.remove(0);
    }
    metadata.body = body_lines.join("\n").trim().to_string();
    metadata
}

/// Parses every hunk in `text`, in order. Used both for a full patch and
/// for a single `*.rej` rejection artifact — both are just a sequence of
/// `@@` blocks.
pub fn parse_hunks(text: &str) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in text.lines() {
        if let Some(caps) = HUNK_HEADER.captures(line) {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            let old_start = caps[1].parse().unwrap_or(0);
            let old_len = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(1);
            let new_start = caps[3].parse().unwrap_or(0);
            let new_len = caps.get(4).and_then(|m| m.as_str().parse().ok()).unwrap_or(1);
            current = Some(Hunk {
                old_start,
                old_len,
                new_start,
                new_len,
                header: line.to_string(),
                lines: Vec::new(),
            });
            continue;
        }
        if let Some(hunk) = current.as_mut() {
            if line.starts_with(' ') || line.starts_with('+') || line.starts_with('-') || line.starts_with('\\') {
                hunk.lines.push(line.to_string());
            } else {
                // A non-hunk line (e.g. the next file's `diff --git` header)
                // ends the current hunk.
                hunks.push(current.take().expect("current hunk present"));
            }
        }
    }
    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }
    hunks
}

/// Splits a full patch into `(relative path, per-file diff text)` pairs,
/// one per `diff --git a/X b/Y` section. The path is taken from the `b/`
/// side so renames and additions resolve to their post-patch name.
pub fn split_file_diffs(patch: &str) -> Vec<(String, String)> {
    let mut result = Vec::new();
    let mut current_path: Option<String> = None;
    let mut current_body = String::new();

    for line in patch.lines() {
        if let Some(caps) = DIFF_GIT_HEADER.captures(line) {
            if let Some(path) = current_path.take() {
                result.push((path, std::mem::take(&mut current_body)));
            }
            current_path = Some(caps[2].to_string());
        }
        if current_path.is_some() {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    if let Some(path) = current_path.take() {
        result.push((path, current_body));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PATCH: &str = "From 1234567890abcdef1234567890abcdef12345678 Mon Sep 17 00:00:00 2001\nFrom: Jane Doe <jane@example.com>\nDate: Tue, 1 Jul 2025 00:00:00 +0000\nSubject: [PATCH] Bump default timeout\n\nThe default timeout was too aggressive for slow clusters.\n---\n foo.go | 2 +-\n 1 file changed, 1 insertion(+), 1 deletion(-)\n\ndiff --git a/foo.go b/foo.go\nindex 1111111..2222222 100644\n--- a/foo.go\n+++ b/foo.go\n@@ -40,7 +40,7 @@ func defaultTimeout() time.Duration {\n-\treturn 30 * time.Second\n+\treturn 60 * time.Second\n }\n";

    #[test]
    fn parses_metadata_envelope() {
        let metadata = parse_metadata(SAMPLE_PATCH);
        assert_eq!(metadata.author, "Jane Doe <jane@example.com>");
        assert_eq!(metadata.date, "Tue, 1 Jul 2025 00:00:00 +0000");
        assert_eq!(metadata.subject, "[PATCH] Bump default timeout");
        assert_eq!(
            metadata.body,
            "The default timeout was too aggressive for slow clusters."
        );
    }

    #[test]
    fn splits_single_file_diff() {
        let files = split_file_diffs(SAMPLE_PATCH);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "foo.go");
        assert!(files[0].1.starts_with("diff --git a/foo.go b/foo.go"));
    }

    #[test]
    fn parses_hunks_with_header_fields() {
        let hunks = parse_hunks(SAMPLE_PATCH);
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].old_start, 40);
        assert_eq!(hunks[0].old_len, 7);
        assert_eq!(hunks[0].new_start, 40);
        assert_eq!(hunks[0].new_len, 7);
        assert_eq!(hunks[0].lines.len(), 3);
    }

    #[test]
    fn multiple_file_diffs_split_independently() {
        let patch = "diff --git a/a.go b/a.go\n--- a/a.go\n+++ b/a.go\n@@ -1 +1 @@\n-x\n+y\ndiff --git a/b.go b/b.go\n--- a/b.go\n+++ b/b.go\n@@ -2 +2 @@\n-m\n+n\n";
        let files = split_file_diffs(patch);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "a.go");
        assert_eq!(files[1].0, "b.go");
        assert!(files[0].1.contains("-x"));
        assert!(files[1].1.contains("-m"));
    }
}
