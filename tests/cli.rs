use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// `ytblog` isolated from the user's config, .env and API keys
fn ytblog(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ytblog").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env_remove("ASSEMBLYAI_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("GEMINI_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn strategies_lists_backends_and_keys() {
    let home = TempDir::new().unwrap();

    ytblog(&home)
        .arg("strategies")
        .assert()
        .success()
        .stdout(predicate::str::contains("captions"))
        .stdout(predicate::str::contains("ASSEMBLYAI_API_KEY"))
        .stdout(predicate::str::contains("GEMINI_API_KEY"));
}

#[test]
fn invalid_url_is_reported_without_network() {
    let home = TempDir::new().unwrap();

    ytblog(&home)
        .args(["generate", "not a url", "--strategy", "captions", "--quiet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Please enter a valid YouTube URL"))
        .stderr(predicate::str::contains("parsing URL"));
}

#[test]
fn missing_llm_key_fails_before_any_request() {
    let home = TempDir::new().unwrap();

    ytblog(&home)
        .args([
            "generate",
            "https://www.youtube.com/watch?v=vQChW_jgCLM",
            "--strategy",
            "captions",
            "--quiet",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("API key not set: GEMINI_API_KEY"))
        .stderr(predicate::str::contains("generating article"));
}

#[test]
fn config_show_writes_defaults_and_hides_keys() {
    let home = TempDir::new().unwrap();

    ytblog(&home)
        .args(["config", "--show"])
        .env("GEMINI_API_KEY", "super-secret")
        .assert()
        .success()
        .stdout(predicate::str::contains("Transcript Strategy: remote"))
        .stdout(predicate::str::contains("GEMINI_API_KEY): set"))
        .stdout(predicate::str::contains("super-secret").not());

    assert!(home.path().join("config/ytblog/config.yaml").exists());
}
