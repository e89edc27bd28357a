//! Thin CLI wiring: argument parsing, logging initialization, configuration
//! loading, and handing a real project directory and checkout to
//! `mend-core`. No patch-repair logic lives here — see `mend-core` for the
//! actual pipeline (§4, §10.1).

use clap::Parser;
use mend_common::RepairConfig;
use mend_core::{
    ChangedLineRatioChecker, RepairLoop, ShellBuildRunner, UnweightedComplexityScorer, read_git_tag,
    resolve_patches_dir,
};
use mend_llm::{HttpBackend, RateLimitedClient};
use std::path::PathBuf;
use tracing::{error, info};

/// Repairs out-of-date patch files in `project_dir` against a checkout
/// already materialized at `checkout_dir`.
///
/// Project discovery, checkout orchestration, and build-system glue are
/// the invoking pipeline's job; this binary only drives the repair loop
/// once both directories exist on disk.
#[derive(Parser, Debug)]
#[command(name = "mend", about = "Repairs out-of-date source patches against a bumped upstream checkout")]
struct Cli {
    /// Root directory of the project whose `patches/` this run repairs.
    project_dir: PathBuf,

    /// Root of the already-checked-out upstream tree the patches apply to.
    checkout_dir: PathBuf,

    /// A `RepairConfig` TOML file; CLI flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// LLM model identifier. Required unless `--config` supplies it.
    #[arg(long)]
    model: Option<String>,

    /// PR number this run is associated with, for logging/tracing only.
    #[arg(long)]
    pr_number: Option<u64>,

    /// Maximum refinement attempts per patch.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Complexity gate: `failed_hunks + rejected_files` above this skips the LLM.
    #[arg(long)]
    complexity_threshold: Option<u32>,

    /// Whether this project's binaries are release-branched (patches live
    /// under `<release-branch>/patches/` rather than `patches/`).
    #[arg(long)]
    release_branched: bool,

    /// Supported release branches, oldest first; the last one is used.
    /// Required when `--release-branched` is set.
    #[arg(long = "release-branch")]
    release_branches: Vec<String>,

    /// Build validation command, split on whitespace (e.g. `make build`).
    /// Ignored entirely when `SKIP_VALIDATION=true`.
    #[arg(long, default_value = "make build")]
    build_command: String,

    /// LLM backend HTTP endpoint.
    #[arg(long, env = "MEND_LLM_ENDPOINT")]
    llm_endpoint: String,

    /// LLM backend API key.
    #[arg(long, env = "MEND_LLM_API_KEY")]
    llm_api_key: String,

    /// Maximum retries for a transient LLM transport failure.
    #[arg(long, default_value_t = 5)]
    llm_max_retries: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Picks up MEND_LLM_ENDPOINT / MEND_LLM_API_KEY from a local `.env` for
    // interactive use; absent in CI, where they come from the real
    // environment, so a missing file is not an error.
    dotenvy::dotenv().ok();
    mend_common::logging::init_logging();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let patches_dir = resolve_patches_dir(&cli.project_dir, cli.release_branched, &cli.release_branches)?;

    match read_git_tag(&cli.project_dir) {
        Ok(tag) => info!(tag, "upstream tag for this project"),
        Err(err) => info!(error = %err, "no GIT_TAG file found; assuming the checkout is already at the right tag"),
    }

    let (program, args) = split_command(&cli.build_command);
    let build_runner = Box::new(ShellBuildRunner::new(program, args));

    let backend = HttpBackend::new(cli.llm_endpoint.clone(), cli.llm_api_key.clone());
    let client = RateLimitedClient::new(backend, config.min_request_gap(), cli.llm_max_retries);

    let repair_loop = RepairLoop::new(
        config,
        cli.checkout_dir.clone(),
        client,
        build_runner,
        Box::new(UnweightedComplexityScorer),
        Box::new(ChangedLineRatioChecker),
    );

    let report = repair_loop.repair_project(&patches_dir).await;

    info!(
        repaired = report.repaired.len(),
        no_repair_needed = report.no_repair_needed.len(),
        total_cost_usd = report.total_cost_usd,
        "repair run finished"
    );
    for patch in &report.repaired {
        println!("repaired: {}", patch.display());
    }
    for patch in &report.no_repair_needed {
        println!("already clean: {}", patch.display());
    }

    if let Some((patch, err)) = &report.failed {
        error!(patch = %patch.display(), error = %err, "project halted");
        println!("FAILED at {}: {err}", patch.display());
        std::process::exit(1);
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<RepairConfig> {
    let mut config = if let Some(path) = &cli.config {
        let contents = std::fs::read_to_string(path)?;
        RepairConfig::from_toml_str(&contents)?
    } else {
        let project = cli
            .project_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| cli.project_dir.display().to_string());
        let model = cli
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--model is required when --config is not provided"))?;
        toml::from_str(&format!(
            "project = {project:?}\nmodel = {model:?}\n"
        ))?
    };

    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if cli.pr_number.is_some() {
        config.pr_number = cli.pr_number;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(threshold) = cli.complexity_threshold {
        config.complexity_threshold = threshold;
    }

    Ok(config)
}

/// Splits a shell-style build command into its program and arguments on
/// whitespace. No quoting support: the build command is operator-supplied
/// configuration, not untrusted input.
fn split_command(command: &str) -> (String, Vec<String>) {
    let mut parts = command.split_whitespace();
    let program = parts.next().unwrap_or("make").to_string();
    let args = parts.map(str::to_string).collect();
    (program, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_program_and_args() {
        let (program, args) = split_command("make build --verbose");
        assert_eq!(program, "make");
        assert_eq!(args, vec!["build", "--verbose"]);
    }
}
