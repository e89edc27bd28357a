//! Patch Applier (§4.1): drives `git apply --reject` against a checkout,
//! captures the pristine snapshot before it mutates anything, and parses
//! its output into offsets and rejection artifacts.

use crate::error::ApplyError;
use crate::patch::split_file_diffs;
use crate::types::PatchApplicationResult;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

static CHECKING_PATCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Checking patch (.+)\.\.\.$").expect("static regex"));

static HUNK_SUCCEEDED_WITH_OFFSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Hunk #\d+ succeeded at \d+ \(offset (-?\d+) lines?\)\.$").expect("static regex")
});

/// Matches `git apply`'s message for a patch target absent from the
/// checkout (§4.1 edge case: "an empty rejection list with a nonzero exit
/// status may occur when the patch targets a file absent from the index").
static MISSING_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:error: )?(\S+): No such file or directory").expect("static regex"));

/// Drives the external diff tool against one checkout directory.
pub struct PatchApplier {
    checkout_root: PathBuf,
}

impl PatchApplier {
    pub fn new(checkout_root: impl Into<PathBuf>) -> Self {
        Self {
            checkout_root: checkout_root.into(),
        }
    }

    pub fn checkout_root(&self) -> &Path {
        &self.checkout_root
    }

    /// Resets the checkout, applies `patch_path` in reject-on-conflict
    /// mode, and reports which files ended up rejected.
    ///
    /// Ordinary hunk rejection is not an error: the diff tool exits
    /// non-zero whenever any hunk was rejected, so an error is only
    /// returned when *no* rejection artifacts exist to explain the
    /// failure (missing file, malformed header, I/O error).
    #[instrument(skip(self), fields(patch = %patch_path.display()))]
    pub async fn apply_with_reject(
        &self,
        patch_path: &Path,
    ) -> Result<(Vec<PathBuf>, PatchApplicationResult), ApplyError> {
        self.reset_checkout().await?;

        let patch_text = tokio::fs::read_to_string(patch_path).await?;
        let pristine_content = self.capture_pristine_content(&patch_text).await?;

        let output = self.run_git_apply(patch_path).await?;
        let offset_files = parse_offsets(&output.combined, &self.checkout_root);
        let reject_paths = self.collect_reject_files().await?;

        if !output.success && reject_paths.is_empty() {
            if let Some(caps) = MISSING_FILE.captures(&output.combined) {
                let file = PathBuf::from(&caps[1]);
                warn!(file = %file.display(), "patch targets a file absent from the checkout");
                return Err(ApplyError::MissingFile { file });
            }
            warn!(output = %output.combined, "diff tool failed with no rejection artifacts");
            return Err(ApplyError::ToolFailed {
                output: output.combined,
            });
        }

        Ok((
            reject_paths,
            PatchApplicationResult {
                offset_files,
                raw_output: output.combined,
                pristine_content,
            },
        ))
    }

    /// Resets the working tree to its tagged upstream state: no staged,
    /// unstaged, or untracked files survive between attempts.
    async fn reset_checkout(&self) -> Result<(), ApplyError> {
        self.run_git(&["reset", "--hard", "HEAD"]).await?;
        self.run_git(&["clean", "-fd"]).await?;
        Ok(())
    }

    /// Reads every file named by a `diff --git a/X b/Y` header, *before*
    /// the diff tool runs. This is the single subtlest correctness
    /// requirement in the pipeline (§9): once hunks are partially applied,
    /// the working copy no longer reflects pre-patch state.
    async fn capture_pristine_content(
        &self,
        patch_text: &str,
    ) -> Result<HashMap<PathBuf, String>, ApplyError> {
        let mut pristine = HashMap::new();
        for (relative_path, _) in split_file_diffs(patch_text) {
            let full_path = self.checkout_root.join(&relative_path);
            match tokio::fs::read_to_string(&full_path).await {
                Ok(content) => {
                    pristine.insert(PathBuf::from(relative_path), content);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(file = %relative_path, "file absent from checkout; treating as an add");
                }
                Err(err) => return Err(ApplyError::Io(err)),
            }
        }
        Ok(pristine)
    }

    async fn run_git_apply(&self, patch_path: &Path) -> Result<ToolOutput, ApplyError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.checkout_root)
            .arg("apply")
            .arg("--reject")
            .arg("--whitespace=fix")
            .arg(patch_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(ToolOutput::from(output))
    }

    async fn run_git(&self, args: &[&str]) -> Result<(), ApplyError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.checkout_root)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            return Err(ApplyError::GitFailed {
                command: format!("git {}", args.join(" ")),
                output: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }

    /// Walks the checkout for `*.rej` files, skipping the VCS metadata
    /// directory. At most one rejection artifact exists per source file.
    async fn collect_reject_files(&self) -> Result<Vec<PathBuf>, ApplyError> {
        let root = self.checkout_root.clone();
        tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .into_iter()
                .filter_entry(|entry| entry.file_name() != ".git")
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "rej"))
                .map(|entry| entry.into_path())
                .collect()
        })
        .await
        .map_err(|err| ApplyError::Io(std::io::Error::other(err.to_string())))
    }
}

struct ToolOutput {
    success: bool,
    combined: String,
}

impl From<std::process::Output> for ToolOutput {
    fn from(output: std::process::Output) -> Self {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        ToolOutput {
            success: output.status.success(),
            combined,
        }
    }
}

/// Parses `git apply` output for `Checking patch <file>...` / `Hunk #n
/// succeeded at L (offset D lines).` pairs into `{file → offset}`.
fn parse_offsets(output: &str, checkout_root: &Path) -> HashMap<PathBuf, i64> {
    let mut offsets = HashMap::new();
    let mut current_file: Option<PathBuf> = None;
    for line in output.lines() {
        let line = line.trim();
        if let Some(caps) = CHECKING_PATCH.captures(line) {
            current_file = Some(normalize_relative(&caps[1], checkout_root));
            continue;
        }
        if let Some(caps) = HUNK_SUCCEEDED_WITH_OFFSET.captures(line) {
            if let Some(file) = &current_file {
                let offset: i64 = caps[1].parse().unwrap_or(0);
                offsets.insert(file.clone(), offset);
            }
        }
    }
    offsets
}

fn normalize_relative(path: &str, checkout_root: &Path) -> PathBuf {
    Path::new(path)
        .strip_prefix(checkout_root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_checking_patch_and_offset_pairs() {
        let output = "Checking patch foo.go...\nHunk #1 succeeded at 47 (offset 5 lines).\nChecking patch bar.go...\nApplied patch bar.go cleanly.\n";
        let offsets = parse_offsets(output, Path::new("/repo"));
        assert_eq!(offsets.get(&PathBuf::from("foo.go")), Some(&5));
        assert!(!offsets.contains_key(&PathBuf::from("bar.go")));
    }

    #[test]
    fn negative_offsets_are_preserved() {
        let output = "Checking patch baz.go...\nHunk #2 succeeded at 10 (offset -3 lines).\n";
        let offsets = parse_offsets(output, Path::new("/repo"));
        assert_eq!(offsets.get(&PathBuf::from("baz.go")), Some(&-3));
    }

    #[test]
    fn missing_file_message_is_recognized() {
        let output = "error: bar/missing.go: No such file or directory\n";
        let caps = MISSING_FILE.captures(output).unwrap();
        assert_eq!(&caps[1], "bar/missing.go");
    }
}
