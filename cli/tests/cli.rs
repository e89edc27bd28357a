//! CLI-level smoke tests: argument parsing and usage surface only. The
//! binary's actual repair run needs a live LLM endpoint and a real project
//! checkout, so these exercise the boundary clap gives us for free rather
//! than the pipeline itself (covered end-to-end under `mend-core`).

use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn help_lists_required_positional_arguments_and_flags() {
    Command::cargo_bin("mend")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("PROJECT_DIR"))
        .stdout(contains("CHECKOUT_DIR"))
        .stdout(contains("--model"))
        .stdout(contains("--complexity-threshold"));
}

#[test]
fn missing_positional_arguments_fail_with_usage_message() {
    Command::cargo_bin("mend")
        .unwrap()
        .assert()
        .failure()
        .stderr(contains("Usage"));
}

#[test]
fn missing_model_without_config_file_fails_before_any_llm_call() {
    let project_dir = tempfile::tempdir().unwrap();
    let checkout_dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("mend")
        .unwrap()
        .arg(project_dir.path())
        .arg(checkout_dir.path())
        .env("MEND_LLM_ENDPOINT", "http://127.0.0.1:1")
        .env("MEND_LLM_API_KEY", "test-key")
        .assert()
        .failure()
        .stderr(contains("--model is required"));
}
