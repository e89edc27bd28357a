//! Validator (§4.4): re-applies a candidate patch, runs the external build,
//! and checks semantic drift against the original. Two gates in order —
//! apply-ability, then build correctness — followed by the drift check,
//! because a candidate that doesn't even apply has nothing left to measure.

use crate::applier::PatchApplier;
use crate::error::ValidateError;
use crate::types::{DriftChecker, PatchApplicationResult};
use async_trait::async_trait;
use mend_common::RepairConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, instrument, warn};

/// The external build subprocess, modeled as a trait so tests (and
/// `SKIP_VALIDATION=true` runs) never have to shell out to a real build
/// system (§6: a build-system driver invoking `build` and `checksums`).
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run_build(&self, checkout_root: &Path) -> Result<(), String>;
}

/// Invokes a configured command line with the checkout as its working
/// directory; any nonzero exit is a build failure, with the combined
/// stdout/stderr captured verbatim as the error string (§4.4, §7).
pub struct ShellBuildRunner {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellBuildRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl BuildRunner for ShellBuildRunner {
    async fn run_build(&self, checkout_root: &Path) -> Result<(), String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(checkout_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| format!("failed to spawn build command: {err}"))?;

        if output.status.success() {
            return Ok(());
        }
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(combined)
    }
}

/// Suppresses the build step entirely; used when `SKIP_VALIDATION=true`.
pub struct NoopBuildRunner;

#[async_trait]
impl BuildRunner for NoopBuildRunner {
    async fn run_build(&self, _checkout_root: &Path) -> Result<(), String> {
        Ok(())
    }
}

/// What happened when a candidate patch was validated, mirroring the
/// branches the orchestrator's state machine needs to act on.
pub enum ValidationOutcome {
    /// The candidate applied cleanly (or with offsets only), the build
    /// passed, and its changed-line ratio stayed within the drift limit.
    Success,
    /// The candidate itself produced rejection artifacts; `reject_paths`
    /// and `application_result` are the candidate's own evidence, to be
    /// used for the *next* context extraction (§4.5: "replaces base
    /// context").
    ApplyConflict {
        reject_paths: Vec<PathBuf>,
        application_result: PatchApplicationResult,
    },
    /// The candidate applied but the build failed; `output` is fed
    /// verbatim into the next attempt's `previous_error`.
    BuildFailed { output: String },
    /// The candidate applied and built, but changed too many more lines
    /// than the original.
    Drift {
        original_lines: usize,
        candidate_lines: usize,
        ratio: f64,
        limit: f64,
    },
}

pub struct Validator<'a> {
    applier: PatchApplier,
    build_runner: &'a dyn BuildRunner,
    drift_checker: &'a dyn DriftChecker,
    drift_limit: f64,
}

impl<'a> Validator<'a> {
    pub fn new(
        checkout_root: impl Into<PathBuf>,
        build_runner: &'a dyn BuildRunner,
        drift_checker: &'a dyn DriftChecker,
        drift_limit: f64,
    ) -> Self {
        Self {
            applier: PatchApplier::new(checkout_root),
            build_runner,
            drift_checker,
            drift_limit,
        }
    }

    /// Whether the build step should run at all, per `SKIP_VALIDATION`
    /// (§4.4, a test escape hatch rather than a product setting).
    pub fn build_validation_enabled() -> bool {
        !RepairConfig::skip_validation()
    }

    #[instrument(skip(self, candidate_patch_path, original_patch))]
    pub async fn validate(
        &self,
        candidate_patch_path: &Path,
        original_patch: &str,
    ) -> Result<ValidationOutcome, ValidateError> {
        let (reject_paths, application_result) =
            self.applier.apply_with_reject(candidate_patch_path).await?;

        if !reject_paths.is_empty() {
            return Ok(ValidationOutcome::ApplyConflict {
                reject_paths,
                application_result,
            });
        }

        if Self::build_validation_enabled() {
            if let Err(output) = self
                .build_runner
                .run_build(self.applier.checkout_root())
                .await
            {
                warn!(output = %output, "build validation failed");
                return Ok(ValidationOutcome::BuildFailed { output });
            }
        } else {
            info!("SKIP_VALIDATION=true: build step suppressed");
        }

        let candidate_patch = tokio::fs::read_to_string(candidate_patch_path).await?;
        let ratio = self.drift_checker.ratio(original_patch, &candidate_patch);
        if ratio > self.drift_limit {
            return Ok(ValidationOutcome::Drift {
                original_lines: crate::types::count_changed_lines(original_patch),
                candidate_lines: crate::types::count_changed_lines(&candidate_patch),
                ratio,
                limit: self.drift_limit,
            });
        }

        Ok(ValidationOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangedLineRatioChecker;
    use std::process::Command as StdCommand;

    fn init_git_repo(dir: &Path) {
        let run = |args: &[&str]| {
            StdCommand::new("git")
                .arg("-C")
                .arg(dir)
                .args(args)
                .output()
                .unwrap()
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
    }

    fn write_and_commit(dir: &Path, file: &str, content: &str) {
        std::fs::write(dir.join(file), content).unwrap();
        StdCommand::new("git")
            .arg("-C")
            .arg(dir)
            .args(["add", "."])
            .output()
            .unwrap();
        StdCommand::new("git")
            .arg("-C")
            .arg(dir)
            .args(["commit", "-q", "-m", "init"])
            .output()
            .unwrap();
    }

    #[tokio::test]
    async fn clean_apply_passing_build_is_success() {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        write_and_commit(dir.path(), "foo.go", "package foo\n\nconst X = 1\n");

        let patch_dir = tempfile::tempdir().unwrap();
        let patch_path = patch_dir.path().join("0001.patch");
        tokio::fs::write(
            &patch_path,
            "diff --git a/foo.go b/foo.go\n--- a/foo.go\n+++ b/foo.go\n@@ -1,3 +1,3 @@\n package foo\n \n-const X = 1\n+const X = 2\n",
        )
        .await
        .unwrap();

        let build_runner = NoopBuildRunner;
        let drift_checker = ChangedLineRatioChecker;
        let validator = Validator::new(dir.path(), &build_runner, &drift_checker, 1.5);

        let outcome = validator
            .validate(&patch_path, "diff --git a/foo.go b/foo.go\n@@ -1,3 +1,3 @@\n-const X = 1\n+const X = 2\n")
            .await
            .unwrap();
        assert!(matches!(outcome, ValidationOutcome::Success));
    }

    #[tokio::test]
    async fn build_failure_is_reported_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        write_and_commit(dir.path(), "foo.go", "package foo\n\nconst X = 1\n");

        let patch_dir = tempfile::tempdir().unwrap();
        let patch_path = patch_dir.path().join("0001.patch");
        tokio::fs::write(
            &patch_path,
            "diff --git a/foo.go b/foo.go\n--- a/foo.go\n+++ b/foo.go\n@@ -1,3 +1,3 @@\n package foo\n \n-const X = 1\n+const X = 2\n",
        )
        .await
        .unwrap();

        struct FailingBuildRunner;
        #[async_trait]
        impl BuildRunner for FailingBuildRunner {
            async fn run_build(&self, _checkout_root: &Path) -> Result<(), String> {
                Err("undefined symbol: X".to_string())
            }
        }

        let build_runner = FailingBuildRunner;
        let drift_checker = ChangedLineRatioChecker;
        let validator = Validator::new(dir.path(), &build_runner, &drift_checker, 1.5);

        let outcome = validator.validate(&patch_path, "").await.unwrap();
        match outcome {
            ValidationOutcome::BuildFailed { output } => assert_eq!(output, "undefined symbol: X"),
            _ => panic!("expected BuildFailed"),
        }
    }

    #[tokio::test]
    async fn excessive_drift_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        init_git_repo(dir.path());
        write_and_commit(
            dir.path(),
            "foo.go",
            "package foo\n\nconst A = 1\nconst B = 2\nconst C = 3\nconst D = 4\n",
        );

        let patch_dir = tempfile::tempdir().unwrap();
        let patch_path = patch_dir.path().join("0001.patch");
        tokio::fs::write(
            &patch_path,
            "diff --git a/foo.go b/foo.go\n--- a/foo.go\n+++ b/foo.go\n@@ -1,6 +1,6 @@\n package foo\n \n-const A = 1\n-const B = 2\n-const C = 3\n-const D = 4\n+const A = 10\n+const B = 20\n+const C = 30\n+const D = 40\n",
        )
        .await
        .unwrap();

        let build_runner = NoopBuildRunner;
        let drift_checker = ChangedLineRatioChecker;
        let validator = Validator::new(dir.path(), &build_runner, &drift_checker, 1.5);

        let original = "diff --git a/foo.go b/foo.go\n@@ -1 +1 @@\n-const A = 1\n+const A = 10\n";
        let outcome = validator.validate(&patch_path, original).await.unwrap();
        match outcome {
            ValidationOutcome::Drift { ratio, limit, .. } => assert!(ratio > limit),
            _ => panic!("expected Drift"),
        }
    }
}
