//! Prompt Builder: serializes a [`PatchContext`] into the structured,
//! section-delimited payload the LLM client sends as a [`GenerateRequest`].
//!
//! The section order is itself part of the contract: the previous-attempt
//! error block sits immediately before the task statement, not at the top,
//! because it is the thing the model should weigh most heavily when it has
//! already seen everything else once.

use crate::patch::split_file_diffs;
use crate::types::{FailedHunk, FileApplyStatus, PatchContext};
use mend_llm::{GenerateRequest, output_token_budget};
use std::collections::HashSet;
use std::fmt::Write as _;

const SYSTEM_PROMPT: &str = "You repair out-of-date unified-diff patch files so they apply cleanly \
to the current state of a third-party source tree. You are given the original patch's intent, the \
exact evidence of where it no longer applies, and the pristine content of every file it touches. \
Emit a single corrected unified-diff patch and nothing else: no explanation, no markdown fencing \
unless the patch itself requires it, no partial output.";

pub struct PromptBuilder {
    min_output_tokens: u32,
    max_output_tokens: u32,
}

impl PromptBuilder {
    pub fn new(min_output_tokens: u32, max_output_tokens: u32) -> Self {
        Self {
            min_output_tokens,
            max_output_tokens,
        }
    }

    /// Builds the full request: system prompt, user prompt, and an
    /// output-token ceiling sized proportionally to the input patch.
    pub fn build(&self, context: &PatchContext, model: &str) -> GenerateRequest {
        let user_prompt = self.build_user_prompt(context);
        let max_output_tokens = output_token_budget(
            context.original_patch.len(),
            self.min_output_tokens,
            self.max_output_tokens,
        );
        GenerateRequest {
            model: model.to_string(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt,
            max_output_tokens,
            extended_output: true,
        }
    }

    fn build_user_prompt(&self, context: &PatchContext) -> String {
        let mut out = String::new();

        writeln!(out, "# Project").ok();
        writeln!(out, "{}", context.project).ok();
        writeln!(out, "patch file: {}", context.patch_filename).ok();
        writeln!(out).ok();

        writeln!(out, "# Preserved patch metadata").ok();
        writeln!(out, "From: {}", context.metadata.author).ok();
        writeln!(out, "Date: {}", context.metadata.date).ok();
        writeln!(out, "Subject: {}", context.metadata.subject).ok();
        writeln!(out).ok();

        writeln!(out, "# Patch intent").ok();
        writeln!(out, "{}", context.metadata.body).ok();
        writeln!(out).ok();

        let rejected_files: HashSet<_> = context.failed_hunks.iter().map(|h| h.file.clone()).collect();

        for hunk in &context.failed_hunks {
            write_failed_hunk_block(&mut out, hunk);
        }

        writeln!(out, "# Current file states").ok();
        let mut files: Vec<_> = context.all_files.keys().cloned().collect();
        files.sort();
        for file in &files {
            let status = context
                .application_result
                .status_for(file, &rejected_files);
            let tag = match status {
                FileApplyStatus::Failed => "FAILED".to_string(),
                FileApplyStatus::AppliedWithOffset { offset_lines } => {
                    format!("APPLIED WITH OFFSET ({offset_lines:+} lines)")
                }
                FileApplyStatus::AppliedCleanly => "APPLIED CLEANLY".to_string(),
            };
            writeln!(out, "## {} [{tag}]", file.display()).ok();
            writeln!(out, "```").ok();
            out.push_str(context.all_files.get(file).map(String::as_str).unwrap_or(""));
            writeln!(out, "\n```").ok();
            writeln!(out).ok();
        }

        writeln!(out, "# Original patch").ok();
        writeln!(out, "```diff").ok();
        if context.attempt <= 1 {
            out.push_str(&context.original_patch);
        } else {
            out.push_str(&reduced_patch(&context.original_patch, &rejected_files));
        }
        writeln!(out, "\n```").ok();
        writeln!(out).ok();

        if let Some(error) = &context.previous_error {
            writeln!(out, "# Previous attempt failed").ok();
            writeln!(out, "```").ok();
            out.push_str(error);
            writeln!(out, "\n```").ok();
            writeln!(out).ok();
        }

        writeln!(out, "# Task").ok();
        writeln!(out, "- Preserve the `From`/`Date`/`Subject` metadata above verbatim.").ok();
        writeln!(
            out,
            "- Emit hunks for every file listed under \"Current file states\", including files applied \
             cleanly or with an offset, using their current line numbers."
        )
        .ok();
        writeln!(out, "- Use paths relative to the project root (`a/...` / `b/...`).").ok();
        writeln!(
            out,
            "- Produce a single valid unified-diff patch and nothing else."
        )
        .ok();

        out
    }
}

/// One block per failed hunk: what it tried to do, what it expected, what
/// is actually there, the differences, and a surrounding window with
/// current line numbers (§4.3).
fn write_failed_hunk_block(out: &mut String, hunk: &FailedHunk) {
    writeln!(
        out,
        "# Failed hunk: {} (hunk #{})",
        hunk.file.display(),
        hunk.hunk_index + 1
    )
    .ok();

    writeln!(out, "## What the patch tried to do").ok();
    writeln!(out, "```diff").ok();
    for line in &hunk.original_lines {
        out.push_str(line);
        out.push('\n');
    }
    writeln!(out, "```").ok();

    writeln!(out, "## What the patch expected").ok();
    writeln!(out, "```").ok();
    for line in &hunk.expected_context {
        out.push_str(line);
        out.push('\n');
    }
    writeln!(out, "```").ok();

    writeln!(out, "## What is actually there").ok();
    writeln!(out, "```").ok();
    for line in &hunk.actual_context {
        out.push_str(line);
        out.push('\n');
    }
    writeln!(out, "```").ok();

    writeln!(out, "## Differences").ok();
    if hunk.differences.is_empty() {
        writeln!(out, "(none detected beyond line count)").ok();
    } else {
        for diff in &hunk.differences {
            writeln!(out, "- {diff}").ok();
        }
    }

    writeln!(
        out,
        "## Surrounding window (current line {} is the target)",
        hunk.current_line
    )
    .ok();
    writeln!(out, "```").ok();
    for line in &hunk.surrounding_window {
        out.push_str(line);
        out.push('\n');
    }
    writeln!(out, "```").ok();
    writeln!(out).ok();
}

/// For attempt ≥ 2, only the diffs of files that still have a rejection
/// are included verbatim (§4.3); the rest are already fully described in
/// the "current file states" section, so repeating them would just burn
/// context.
fn reduced_patch(original_patch: &str, failed_files: &HashSet<std::path::PathBuf>) -> String {
    let mut reduced = String::new();
    for (path, body) in split_file_diffs(original_patch) {
        if failed_files.contains(&std::path::PathBuf::from(&path)) {
            reduced.push_str(&body);
        }
    }
    reduced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PatchApplicationResult, PatchMetadata};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn base_context(attempt: u32, previous_error: Option<String>) -> PatchContext {
        PatchContext {
            project: "eks-anywhere-build-tooling".to_string(),
            patch_filename: "0001-bump-timeout.patch".to_string(),
            metadata: PatchMetadata {
                author: "Jane Doe <jane@example.com>".to_string(),
                date: "Tue, 1 Jul 2025 00:00:00 +0000".to_string(),
                subject: "[PATCH] Bump default timeout".to_string(),
                body: "The default timeout was too aggressive for slow clusters.".to_string(),
            },
            original_patch: "diff --git a/foo.go b/foo.go\n--- a/foo.go\n+++ b/foo.go\n@@ -40,7 +40,7 @@\n-30\n+60\n".to_string(),
            failed_hunks: vec![FailedHunk {
                file: PathBuf::from("foo.go"),
                hunk_index: 0,
                original_lines: vec!["@@ -40,7 +40,7 @@".to_string(), "-30".to_string(), "+60".to_string()],
                expected_context: vec!["30".to_string()],
                actual_context: vec!["45".to_string()],
                differences: vec!["line 1: expected \"30\", got \"45\"".to_string()],
                surrounding_window: vec!["context".to_string()],
                current_line: 45,
            }],
            all_files: HashMap::from([(PathBuf::from("foo.go"), "package foo\n".to_string())]),
            application_result: PatchApplicationResult::default(),
            attempt,
            previous_error,
        }
    }

    #[test]
    fn includes_metadata_and_task_statement() {
        let builder = PromptBuilder::new(1_024, 65_536);
        let prompt = builder.build_user_prompt(&base_context(1, None));
        assert!(prompt.contains("From: Jane Doe <jane@example.com>"));
        assert!(prompt.contains("Subject: [PATCH] Bump default timeout"));
        assert!(prompt.contains("Produce a single valid unified-diff patch"));
    }

    #[test]
    fn error_block_sits_immediately_before_task_statement() {
        let builder = PromptBuilder::new(1_024, 65_536);
        let prompt = builder.build_user_prompt(&base_context(2, Some("build failed: undefined symbol".to_string())));
        let error_pos = prompt.find("# Previous attempt failed").unwrap();
        let task_pos = prompt.find("# Task").unwrap();
        assert!(error_pos < task_pos);
        // nothing else should separate them but blank lines
        let between = &prompt[error_pos..task_pos];
        assert!(between.contains("build failed: undefined symbol"));
    }

    #[test]
    fn request_has_no_system_leakage_of_api_key_fields() {
        let builder = PromptBuilder::new(1_024, 65_536);
        let request = builder.build(&base_context(1, None), "claude-opus-4");
        assert_eq!(request.model, "claude-opus-4");
        assert!(request.extended_output);
        assert!(request.max_output_tokens >= 1_024);
    }
}
