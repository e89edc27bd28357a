//! Repair Loop / Orchestrator (§4.5): the per-patch state machine and the
//! sequential, one-patch-at-a-time project driver built on top of it.
//!
//! This is the only component that sequences the other four; it owns the
//! checkout for the duration of an attempt and is the sole place attempt
//! budgets, complexity gates, and context replacement rules are enforced.

use crate::applier::PatchApplier;
use crate::error::llm_error_to_repair_error;
use crate::extractor::ContextExtractor;
use crate::prompt::PromptBuilder;
use crate::types::{ComplexityScorer, DriftChecker, PatchContext, PatchPrePass};
use crate::validator::{BuildRunner, ValidationOutcome, Validator};
use mend_common::{RepairConfig, RepairError};
use mend_llm::{LlmBackend, RateLimitedClient, check_metadata_presence, estimate_cost, extract_patch, validate_patch_format};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

/// Outcome of repairing a single patch.
#[derive(Debug)]
pub enum RepairOutcome {
    /// The patch already applied cleanly with no offsets; nothing was
    /// written (idempotence law, §8).
    NoRepairNeeded,
    /// A repair was found, validated, and committed to disk.
    Repaired { attempts_used: u32, total_cost_usd: f64 },
}

pub struct RepairLoop<B: LlmBackend> {
    config: RepairConfig,
    checkout_root: PathBuf,
    client: RateLimitedClient<B>,
    build_runner: Box<dyn BuildRunner>,
    complexity_scorer: Box<dyn ComplexityScorer>,
    drift_checker: Box<dyn DriftChecker>,
    pre_passes: Vec<Box<dyn PatchPrePass>>,
}

impl<B: LlmBackend> RepairLoop<B> {
    pub fn new(
        config: RepairConfig,
        checkout_root: impl Into<PathBuf>,
        client: RateLimitedClient<B>,
        build_runner: Box<dyn BuildRunner>,
        complexity_scorer: Box<dyn ComplexityScorer>,
        drift_checker: Box<dyn DriftChecker>,
    ) -> Self {
        Self {
            config,
            checkout_root: checkout_root.into(),
            client,
            build_runner,
            complexity_scorer,
            drift_checker,
            pre_passes: Vec::new(),
        }
    }

    /// Registers an optional pre-pass hook (§9 open question): empty by
    /// default, never baked into the state machine above.
    pub fn with_pre_pass(mut self, pre_pass: Box<dyn PatchPrePass>) -> Self {
        self.pre_passes.push(pre_pass);
        self
    }

    /// Processes every patch in `patches_dir` in sorted filename order,
    /// stopping at the first failure (§4.5 sequential stability).
    #[instrument(skip(self))]
    pub async fn repair_project(&self, patches_dir: &Path) -> ProjectRepairReport {
        let mut patch_paths: Vec<PathBuf> = WalkDir::new(patches_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "patch"))
            .collect();
        patch_paths.sort();

        let mut report = ProjectRepairReport::default();
        for patch_path in patch_paths {
            match self.repair_patch(&patch_path).await {
                Ok(RepairOutcome::NoRepairNeeded) => {
                    info!(patch = %patch_path.display(), "already applies cleanly");
                    report.no_repair_needed.push(patch_path);
                }
                Ok(RepairOutcome::Repaired { attempts_used, total_cost_usd }) => {
                    info!(patch = %patch_path.display(), attempts_used, total_cost_usd, "repaired");
                    report.total_cost_usd += total_cost_usd;
                    report.repaired.push(patch_path);
                }
                Err(err) => {
                    if err.halts_patch() {
                        warn!(patch = %patch_path.display(), error = %err, "patch rejected outright (complexity gate or attempt budget), halting project");
                    } else {
                        warn!(patch = %patch_path.display(), error = %err, "patch failed after its final attempt, halting project");
                    }
                    report.failed = Some((patch_path, err));
                    break;
                }
            }
        }
        report
    }

    /// Runs the full state machine (§4.5) for one patch file.
    ///
    /// `run_id` is a random correlation id, logged on every span for this
    /// patch so its attempts can be grepped out of a run that interleaves
    /// many patches' logs (they themselves never interleave, per §5, but a
    /// log aggregator sees the whole project's output as one stream).
    #[instrument(skip(self), fields(patch = %patch_path.display(), run_id = %uuid::Uuid::new_v4()))]
    pub async fn repair_patch(&self, patch_path: &Path) -> Result<RepairOutcome, RepairError> {
        let patch_filename = patch_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| patch_path.display().to_string());

        let original_patch_text = tokio::fs::read_to_string(patch_path)
            .await
            .map_err(anyhow::Error::from)?;

        let input_patch_text = self.run_pre_passes(&patch_filename, &original_patch_text);
        let initial_apply_path = self.write_temp_patch(&input_patch_text).await?;

        let applier = PatchApplier::new(&self.checkout_root);
        let (reject_paths, application_result) = applier
            .apply_with_reject(initial_apply_path.path())
            .await
            .map_err(RepairError::from)?;

        if reject_paths.is_empty() && application_result.offset_files.is_empty() {
            return Ok(RepairOutcome::NoRepairNeeded);
        }

        let extractor = ContextExtractor::new(&self.checkout_root);
        let mut context = extractor
            .extract(
                &self.config.project,
                &patch_filename,
                &input_patch_text,
                &reject_paths,
                &application_result,
                1,
                None,
            )
            .await
            .map_err(RepairError::from)?;

        // The complexity gate only applies when hunks were actually rejected.
        // An offset-only patch (no rejects, but the diff tool shifted some
        // hunks) still needs an LLM call to re-derive correct line numbers —
        // it just never had anything to score.
        if !reject_paths.is_empty() {
            let rejected_files: HashSet<_> = context.failed_hunks.iter().map(|h| h.file.clone()).collect();
            let score = self.complexity_scorer.score(&context.failed_hunks, &rejected_files);
            if score > self.config.complexity_threshold {
                return Err(RepairError::ComplexityTooHigh {
                    score,
                    threshold: self.config.complexity_threshold,
                });
            }
        }

        self.refine_until_success(patch_path, &mut context).await
    }

    /// INVOKE_LLM → RESET_TREE → APPLY_CANDIDATE → ... → RETRY loop.
    async fn refine_until_success(
        &self,
        patch_path: &Path,
        context: &mut PatchContext,
    ) -> Result<RepairOutcome, RepairError> {
        let prompt_builder = PromptBuilder::new(self.config.min_output_tokens, self.config.max_output_tokens);
        let mut last_error: Option<RepairError> = None;
        let mut total_cost_usd = 0.0_f64;

        loop {
            if context.attempt > self.config.max_attempts {
                return Err(last_error.unwrap_or(RepairError::MaxAttemptsExceeded {
                    max_attempts: self.config.max_attempts,
                }));
            }

            let request = prompt_builder.build(context, &self.config.model);
            let response = match self.client.generate(&request).await {
                Ok(response) => response,
                Err(err) => {
                    let repair_err = llm_error_to_repair_error(err, context.attempt);
                    context.previous_error = Some(repair_err.to_string());
                    context.attempt += 1;
                    last_error = Some(repair_err);
                    continue;
                }
            };

            total_cost_usd += estimate_cost(
                response.usage,
                self.config.input_price_per_mtok,
                self.config.output_price_per_mtok,
            );

            let Some(candidate_text) = extract_patch(&response.content) else {
                let repair_err = RepairError::PatchFormatInvalid {
                    reason: "no patch found in LLM response".to_string(),
                };
                context.previous_error = Some(repair_err.to_string());
                context.attempt += 1;
                last_error = Some(repair_err);
                continue;
            };

            if let Err(format_err) = validate_patch_format(&candidate_text) {
                let repair_err = RepairError::PatchFormatInvalid {
                    reason: format_err.to_string(),
                };
                context.previous_error = Some(repair_err.to_string());
                context.attempt += 1;
                last_error = Some(repair_err);
                continue;
            }

            let metadata_presence = check_metadata_presence(
                &candidate_text,
                &context.metadata.author,
                &context.metadata.date,
                &context.metadata.subject,
            );
            if !metadata_presence.has_author || !metadata_presence.has_date || !metadata_presence.has_subject {
                warn!(
                    patch = %context.patch_filename,
                    has_author = metadata_presence.has_author,
                    has_date = metadata_presence.has_date,
                    has_subject = metadata_presence.has_subject,
                    "candidate patch dropped preserved metadata; continuing, operator should review"
                );
            }

            let candidate_path = self.write_temp_patch(&candidate_text).await?;
            let build_runner = self.build_runner.as_ref();
            let validator = Validator::new(&self.checkout_root, build_runner, self.drift_checker.as_ref(), self.config.drift_limit);
            let outcome = validator
                .validate(candidate_path.path(), &context.original_patch)
                .await
                .map_err(RepairError::from)?;

            match outcome {
                ValidationOutcome::Success => {
                    self.commit(patch_path, &candidate_text).await?;
                    info!(total_cost_usd, "repair accepted");
                    return Ok(RepairOutcome::Repaired {
                        attempts_used: context.attempt,
                        total_cost_usd,
                    });
                }
                ValidationOutcome::ApplyConflict {
                    reject_paths,
                    application_result,
                } => {
                    let extractor = ContextExtractor::new(&self.checkout_root);
                    let next_attempt = context.attempt + 1;
                    *context = extractor
                        .extract(
                            &context.project,
                            &context.patch_filename,
                            &candidate_text,
                            &reject_paths,
                            &application_result,
                            next_attempt,
                            None,
                        )
                        .await
                        .map_err(RepairError::from)?;
                    last_error = None;
                }
                ValidationOutcome::BuildFailed { output } => {
                    let repair_err = RepairError::BuildFailed {
                        output: output.clone(),
                    };
                    context.previous_error = Some(output);
                    context.attempt += 1;
                    last_error = Some(repair_err);
                }
                ValidationOutcome::Drift {
                    original_lines,
                    candidate_lines,
                    ratio,
                    limit,
                } => {
                    let repair_err = RepairError::SemanticDrift {
                        original_lines,
                        candidate_lines,
                        ratio,
                        limit,
                    };
                    context.previous_error = Some(repair_err.to_string());
                    context.attempt += 1;
                    last_error = Some(repair_err);
                }
            }
        }
    }

    fn run_pre_passes(&self, patch_filename: &str, patch_text: &str) -> String {
        for pre_pass in &self.pre_passes {
            if let Some(rewritten) = pre_pass.try_rewrite(&self.config.project, patch_filename, patch_text) {
                return rewritten;
            }
        }
        patch_text.to_string()
    }

    async fn write_temp_patch(&self, text: &str) -> Result<tempfile::NamedTempFile, RepairError> {
        let mut file = tempfile::NamedTempFile::new().map_err(anyhow::Error::from)?;
        use std::io::Write as _;
        file.write_all(text.as_bytes()).map_err(anyhow::Error::from)?;
        Ok(file)
    }

    /// Overwrites the original patch file with the model's output (with a
    /// trailing newline) and removes rejection artifacts left beside it.
    async fn commit(&self, patch_path: &Path, candidate_text: &str) -> Result<(), RepairError> {
        let mut text = candidate_text.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        tokio::fs::write(patch_path, text)
            .await
            .map_err(anyhow::Error::from)?;

        if let Some(dir) = patch_path.parent() {
            remove_reject_artifacts(dir).map_err(anyhow::Error::from)?;
        }
        Ok(())
    }
}

/// Removes any `*.rej` files sitting beside the patches in `dir`; cleaned
/// on success per §6, outputs.
fn remove_reject_artifacts(dir: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "rej"))
    {
        std::fs::remove_file(entry.path())?;
    }
    Ok(())
}

/// Result of running `repair_project` over a patch directory: patches
/// 1…n-1 remain on disk successfully repaired even when patch *n* fails
/// (§4.5 sequential processing).
#[derive(Debug, Default)]
pub struct ProjectRepairReport {
    pub repaired: Vec<PathBuf>,
    pub no_repair_needed: Vec<PathBuf>,
    pub failed: Option<(PathBuf, RepairError)>,
    pub total_cost_usd: f64,
}

/// Reads the upstream tag to check out for a project from its `GIT_TAG`
/// file (§6), at the project root or a release-branch subdirectory.
pub fn read_git_tag(project_dir: &Path) -> Result<String, RepairError> {
    let candidates = [project_dir.join("GIT_TAG"), project_dir.join("release").join("GIT_TAG")];
    for candidate in &candidates {
        if let Ok(contents) = std::fs::read_to_string(candidate) {
            return Ok(contents.trim().to_string());
        }
    }
    Err(RepairError::Other(anyhow::anyhow!(
        "no GIT_TAG file found under {}",
        project_dir.display()
    )))
}

/// Locates the directory a project's patches live in: `patches/` or, for
/// release-branched projects, `<release-branch>/patches/`, where the
/// release branch is read from a sibling metadata file (§6).
pub fn resolve_patches_dir(
    project_dir: &Path,
    release_branched: bool,
    release_branches: &[String],
) -> Result<PathBuf, RepairError> {
    if !release_branched {
        return Ok(project_dir.join("patches"));
    }
    let branch = release_branches.last().ok_or_else(|| {
        RepairError::Other(anyhow::anyhow!(
            "project {} is release-branched but lists no supported branches",
            project_dir.display()
        ))
    })?;
    Ok(project_dir.join(branch).join("patches"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_branch_patches_dir_uses_latest_branch() {
        let dir = resolve_patches_dir(
            Path::new("/projects/cluster-api"),
            true,
            &["release-0.18".to_string(), "release-0.19".to_string()],
        )
        .unwrap();
        assert_eq!(dir, PathBuf::from("/projects/cluster-api/release-0.19/patches"));
    }

    #[test]
    fn non_release_branched_uses_flat_patches_dir() {
        let dir = resolve_patches_dir(Path::new("/projects/foo"), false, &[]).unwrap();
        assert_eq!(dir, PathBuf::from("/projects/foo/patches"));
    }

    #[test]
    fn release_branched_without_branches_is_an_error() {
        assert!(resolve_patches_dir(Path::new("/projects/foo"), true, &[]).is_err());
    }
}
