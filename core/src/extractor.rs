//! Context Extractor (§4.2): turns rejection artifacts, the pristine
//! snapshot, and the original patch into a self-contained [`PatchContext`]
//! that needs no further filesystem access.

use crate::error::ExtractError;
use crate::patch::{parse_hunks, parse_metadata, split_file_diffs};
use crate::types::{FailedHunk, PatchApplicationResult, PatchContext};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Lines of surrounding-window context included verbatim around each
/// failed hunk, on the order of tens of lines per §4.2 step 4.
const DEFAULT_WINDOW_LINES: usize = 40;

pub struct ContextExtractor<'a> {
    checkout_root: &'a Path,
    window_lines: usize,
}

impl<'a> ContextExtractor<'a> {
    pub fn new(checkout_root: &'a Path) -> Self {
        Self {
            checkout_root,
            window_lines: DEFAULT_WINDOW_LINES,
        }
    }

    pub fn with_window(mut self, window_lines: usize) -> Self {
        self.window_lines = window_lines;
        self
    }

    /// Builds a `PatchContext` from rejection artifacts already on disk.
    /// Every `FailedHunk` in the result corresponds to exactly one of
    /// `reject_paths`, and `all_files` carries pristine content for every
    /// file the original patch touches, not just the failed ones.
    #[allow(clippy::too_many_arguments)]
    pub async fn extract(
        &self,
        project: &str,
        patch_filename: &str,
        original_patch: &str,
        reject_paths: &[PathBuf],
        application_result: &PatchApplicationResult,
        attempt: u32,
        previous_error: Option<String>,
    ) -> Result<PatchContext, ExtractError> {
        let metadata = parse_metadata(original_patch);
        let mut failed_hunks = Vec::new();

        for reject_path in reject_paths {
            let source_file = source_file_for_reject(reject_path, self.checkout_root);
            let reject_text = tokio::fs::read_to_string(reject_path).await?;
            let hunks = parse_hunks(&reject_text);
            if hunks.is_empty() {
                return Err(ExtractError::MalformedRejectFile {
                    path: reject_path.clone(),
                    reason: "no `@@` hunk headers found".to_string(),
                });
            }

            let pristine = application_result
                .pristine_content
                .get(&source_file)
                .cloned()
                .unwrap_or_default();
            let pristine_lines: Vec<&str> = pristine.lines().collect();

            for (index, hunk) in hunks.into_iter().enumerate() {
                let expected_context = hunk.expected_context();
                let target_line = hunk.old_start.saturating_sub(1);
                let actual_context = window(&pristine_lines, target_line, expected_context.len().max(3));
                let surrounding_window = window(&pristine_lines, target_line, self.window_lines);
                let differences = diff_context(&expected_context, &actual_context);
                let mut original_lines = vec![hunk.header.clone()];
                original_lines.extend(hunk.lines.clone());

                failed_hunks.push(FailedHunk {
                    file: source_file.clone(),
                    hunk_index: index,
                    original_lines,
                    expected_context,
                    actual_context,
                    differences,
                    surrounding_window,
                    current_line: hunk.old_start,
                });
            }
        }

        let mut all_files = HashMap::new();
        for (relative_path, _) in split_file_diffs(original_patch) {
            let key = PathBuf::from(&relative_path);
            if let Some(content) = application_result.pristine_content.get(&key) {
                all_files.insert(key, content.clone());
            }
        }

        Ok(PatchContext {
            project: project.to_string(),
            patch_filename: patch_filename.to_string(),
            metadata,
            original_patch: original_patch.to_string(),
            failed_hunks,
            all_files,
            application_result: application_result.clone(),
            attempt,
            previous_error,
        })
    }
}

/// Maps a `<file>.rej` artifact path back to the source file it describes,
/// relative to the checkout root.
fn source_file_for_reject(reject_path: &Path, checkout_root: &Path) -> PathBuf {
    let without_suffix = reject_path.with_extension("");
    without_suffix
        .strip_prefix(checkout_root)
        .map(Path::to_path_buf)
        .unwrap_or(without_suffix)
}

/// A slice of `radius` lines from `lines`, centered on `center`.
fn window(lines: &[&str], center: usize, radius: usize) -> Vec<String> {
    if lines.is_empty() {
        return Vec::new();
    }
    let half = radius / 2;
    let start = center.saturating_sub(half);
    let end = (start + radius).min(lines.len());
    let start = end.saturating_sub(radius).min(start);
    lines[start..end].iter().map(|s| s.to_string()).collect()
}

/// A bullet list of line-level differences between what the patch
/// expected and what is actually in the current file, computed with a
/// real line diff rather than a positional compare so a single inserted
/// or deleted line doesn't cascade into spurious mismatches on every line
/// after it.
fn diff_context(expected: &[String], actual: &[String]) -> Vec<String> {
    use similar::{DiffOp, TextDiff};

    let expected_lines: Vec<&str> = expected.iter().map(String::as_str).collect();
    let actual_lines: Vec<&str> = actual.iter().map(String::as_str).collect();
    let diff = TextDiff::from_slices(&expected_lines, &actual_lines);

    let mut bullets = Vec::new();
    for op in diff.ops() {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                for offset in 0..old_len.max(new_len) {
                    let expected_line = expected_lines.get(old_index + offset);
                    let actual_line = actual_lines.get(new_index + offset);
                    let line_no = old_index + offset + 1;
                    match (expected_line, actual_line) {
                        (Some(e), Some(a)) => {
                            bullets.push(format!("line {line_no}: expected \"{e}\", got \"{a}\""));
                        }
                        (Some(e), None) => {
                            bullets.push(format!("line {line_no}: expected \"{e}\", got <end of file>"));
                        }
                        (None, Some(a)) => {
                            bullets.push(format!("line {line_no}: expected <end of context>, got \"{a}\""));
                        }
                        (None, None) => {}
                    }
                }
            }
            DiffOp::Delete { old_index, old_len, .. } => {
                for offset in 0..old_len {
                    let line_no = old_index + offset + 1;
                    if let Some(e) = expected_lines.get(old_index + offset) {
                        bullets.push(format!("line {line_no}: expected \"{e}\", got <end of file>"));
                    }
                }
            }
            DiffOp::Insert { old_index, new_index, new_len } => {
                for offset in 0..new_len {
                    let line_no = old_index + offset + 1;
                    if let Some(a) = actual_lines.get(new_index + offset) {
                        bullets.push(format!("line {line_no}: expected <end of context>, got \"{a}\""));
                    }
                }
            }
        }
    }
    bullets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PatchApplicationResult;

    fn result_with_pristine(file: &str, content: &str) -> PatchApplicationResult {
        let mut pristine = HashMap::new();
        pristine.insert(PathBuf::from(file), content.to_string());
        PatchApplicationResult {
            offset_files: HashMap::new(),
            raw_output: String::new(),
            pristine_content: pristine,
        }
    }

    #[tokio::test]
    async fn extracts_context_drift_between_expected_and_actual() {
        let dir = tempfile::tempdir().unwrap();
        let reject_path = dir.path().join("foo.go.rej");
        tokio::fs::write(
            &reject_path,
            "@@ -1,3 +1,3 @@\n A\n-B\n+B2\n C\n",
        )
        .await
        .unwrap();

        let result = result_with_pristine("foo.go", "A\nB'\nC\nD\nE\n");
        let extractor = ContextExtractor::new(dir.path()).with_window(4);
        let context = extractor
            .extract(
                "eks-anywhere-build-tooling",
                "0001-bump-timeout.patch",
                "diff --git a/foo.go b/foo.go\n--- a/foo.go\n+++ b/foo.go\n@@ -1,3 +1,3 @@\n A\n-B\n+B2\n C\n",
                &[reject_path],
                &result,
                1,
                None,
            )
            .await
            .unwrap();

        assert_eq!(context.failed_hunks.len(), 1);
        let hunk = &context.failed_hunks[0];
        assert_eq!(hunk.expected_context, vec!["A", "B", "C"]);
        assert_eq!(hunk.actual_context, vec!["A", "B'", "C"]);
        assert_eq!(hunk.differences, vec!["line 2: expected \"B\", got \"B'\""]);
        assert_eq!(context.all_files.get(&PathBuf::from("foo.go")).unwrap(), "A\nB'\nC\nD\nE\n");
    }

    #[test]
    fn window_stays_within_bounds() {
        let lines = vec!["a", "b", "c"];
        let result = window(&lines, 1, 10);
        assert_eq!(result, vec!["a", "b", "c"]);
    }
}
