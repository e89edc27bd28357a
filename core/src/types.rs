//! The data model shared by every stage of the repair pipeline (§3).

use std::collections::HashMap;
use std::path::PathBuf;

/// The preserved envelope of a patch file: author, date, subject, and the
/// free-form body up to the first `---` separator (the patch's intent).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchMetadata {
    pub author: String,
    pub date: String,
    pub subject: String,
    pub body: String,
}

/// One hunk of a unified diff, exactly as the patch author wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    /// The raw `@@ -a,b +c,d @@ ...` header line.
    pub header: String,
    /// Lines following the header, each still carrying its leading
    /// ` `/`+`/`-` marker.
    pub lines: Vec<String>,
}

impl Hunk {
    /// Context (` `) and removed (`-`) lines: what the patch author
    /// asserted the target file contained before the edit.
    pub fn expected_context(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|l| l.starts_with(' ') || l.starts_with('-'))
            .map(|l| l[1..].to_string())
            .collect()
    }

}

/// How the diff tool resolved one file touched by a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileApplyStatus {
    AppliedCleanly,
    AppliedWithOffset { offset_lines: i64 },
    Failed,
}

/// Per-attempt record of what the diff tool did, plus the pristine
/// snapshot captured before it touched anything.
#[derive(Debug, Clone, Default)]
pub struct PatchApplicationResult {
    pub offset_files: HashMap<PathBuf, i64>,
    pub raw_output: String,
    pub pristine_content: HashMap<PathBuf, String>,
}

impl PatchApplicationResult {
    /// Status for `file`, given the set of files that ended up with a
    /// rejection artifact. Files touched by the patch but absent from
    /// both `offset_files` and `rejected` applied cleanly.
    pub fn status_for(&self, file: &std::path::Path, rejected: &std::collections::HashSet<PathBuf>) -> FileApplyStatus {
        if rejected.contains(file) {
            FileApplyStatus::Failed
        } else if let Some(offset) = self.offset_files.get(file) {
            FileApplyStatus::AppliedWithOffset {
                offset_lines: *offset,
            }
        } else {
            FileApplyStatus::AppliedCleanly
        }
    }
}

/// One rejected hunk, with expected-vs-actual context evidence.
#[derive(Debug, Clone)]
pub struct FailedHunk {
    pub file: PathBuf,
    pub hunk_index: usize,
    /// The `@@` header and all ± / context lines as the patch author wrote
    /// them.
    pub original_lines: Vec<String>,
    /// Unchanged + removed lines from the original hunk: what the patch
    /// assumed it would find.
    pub expected_context: Vec<String>,
    /// The current file's lines at the same semantic location, read from
    /// the pristine snapshot.
    pub actual_context: Vec<String>,
    /// `"line N: expected \"...\", got \"...\""` style bullets.
    pub differences: Vec<String>,
    /// A broader window of the current file around the target line.
    pub surrounding_window: Vec<String>,
    /// The current line number where the edit should apply.
    pub current_line: usize,
}

/// The complete, self-contained input to one LLM invocation.
#[derive(Debug, Clone)]
pub struct PatchContext {
    pub project: String,
    pub patch_filename: String,
    pub metadata: PatchMetadata,
    pub original_patch: String,
    pub failed_hunks: Vec<FailedHunk>,
    /// Pristine content of *every* file the patch touches, not just the
    /// failed ones (§4.2 step 5).
    pub all_files: HashMap<PathBuf, String>,
    pub application_result: PatchApplicationResult,
    pub attempt: u32,
    pub previous_error: Option<String>,
}

/// The LLM's output: the corrected patch plus usage accounting.
#[derive(Debug, Clone)]
pub struct PatchFix {
    pub patch_text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
}

/// Simple scalar summarizing how badly a patch diverged from the current
/// tree; an abort gate before invoking the LLM (§4.5, §9 open question).
///
/// Kept as a trait so the unweighted `hunks + files` placeholder can be
/// swapped for an empirically-calibrated scorer without touching the
/// orchestrator.
pub trait ComplexityScorer: Send + Sync {
    fn score(&self, failed_hunks: &[FailedHunk], rejected_files: &std::collections::HashSet<PathBuf>) -> u32;
}

/// The source's placeholder scorer: total failed hunks plus number of
/// rejected files, unweighted.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnweightedComplexityScorer;

impl ComplexityScorer for UnweightedComplexityScorer {
    fn score(&self, failed_hunks: &[FailedHunk], rejected_files: &std::collections::HashSet<PathBuf>) -> u32 {
        failed_hunks.len() as u32 + rejected_files.len() as u32
    }
}

/// A stricter (or looser) proxy for "does the repair still mean the same
/// thing". The default is the §4.4 changed-line ratio; a reimplementation
/// targeting a specific language could plug in an AST-level comparison.
pub trait DriftChecker: Send + Sync {
    /// Returns how far the candidate drifted from the original, as a
    /// ratio the caller compares against a configured limit.
    fn ratio(&self, original_patch: &str, candidate_patch: &str) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ChangedLineRatioChecker;

impl DriftChecker for ChangedLineRatioChecker {
    fn ratio(&self, original_patch: &str, candidate_patch: &str) -> f64 {
        let original = count_changed_lines(original_patch);
        let candidate = count_changed_lines(candidate_patch);
        if original == 0 {
            if candidate == 0 { 1.0 } else { f64::INFINITY }
        } else {
            candidate as f64 / original as f64
        }
    }
}

/// Counts lines beginning with `+` or `-`, excluding the file-marker
/// `+++`/`---` lines.
pub fn count_changed_lines(patch: &str) -> usize {
    patch
        .lines()
        .filter(|l| {
            (l.starts_with('+') && !l.starts_with("+++")) || (l.starts_with('-') && !l.starts_with("---"))
        })
        .count()
}

/// An optional pre-pass hook run before `ApplyWithReject`, per the
/// "autoscaler special case" open question (§9): project-specific,
/// pattern-matched rewrites belong behind this extension point, not baked
/// into the orchestrator. Empty by default.
pub trait PatchPrePass: Send + Sync {
    /// Returns a rewritten patch body if this pre-pass recognizes the
    /// patch (by title, project name, or content), or `None` to leave it
    /// untouched.
    fn try_rewrite(&self, project: &str, patch_filename: &str, patch_text: &str) -> Option<String>;
}
