use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn bin() -> Command {
    let path = assert_cmd::cargo::cargo_bin!("gantry");
    Command::new(path)
}

fn parse_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("json output")
}

fn make_repo_dir(root: &Path) -> std::path::PathBuf {
    let repo = root.join("MCP_git_repo_to_single_file");
    fs::create_dir_all(&repo).unwrap();
    repo
}

#[test]
fn config_init_creates_and_preserves_existing() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");

    let output = bin()
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .arg("--json")
        .arg("config")
        .arg("init")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert!(value["ok"].as_bool().unwrap());
    assert!(value["result"]["created"].as_bool().unwrap());

    let config_path = config_dir.join("config.yaml");
    assert!(config_path.exists());

    fs::write(&config_path, "sentinel: true\n").unwrap();

    let output = bin()
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .arg("--json")
        .arg("config")
        .arg("init")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert!(value["ok"].as_bool().unwrap());
    assert!(!value["result"]["created"].as_bool().unwrap());

    let content = fs::read_to_string(&config_path).unwrap();
    assert_eq!(content, "sentinel: true\n");
}

#[test]
fn config_validate_rejects_unknown_fields() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    fs::write(&config_path, "version: 1\nunknown_field: true\n").unwrap();

    let output = bin()
        .arg("--json")
        .arg("--config")
        .arg(&config_path)
        .arg("config")
        .arg("validate")
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert!(!value["ok"].as_bool().unwrap());
    let error = value["error"].as_str().unwrap_or_default();
    assert!(error.contains("unknown_field") || error.contains("unknown field"));
}

#[test]
fn config_validate_accepts_generated_template() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");

    bin()
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .arg("config")
        .arg("init")
        .assert()
        .success();

    bin()
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .arg("config")
        .arg("validate")
        .assert()
        .success();
}

#[test]
fn up_dry_run_writes_parseable_launch_config() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");
    let repo = make_repo_dir(dir.path());

    let output = bin()
        .current_dir(dir.path())
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .arg("--json")
        .arg("up")
        .arg("--dry-run")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert!(value["ok"].as_bool().unwrap());
    assert_eq!(value["result"]["dry_run"], true);
    assert_eq!(value["result"]["handed_off"], false);
    let repo_dir = value["result"]["repo_dir"].as_str().unwrap();
    assert!(repo_dir.ends_with("MCP_git_repo_to_single_file"));
    assert!(repo.exists());

    let config_path = value["result"]["launch_config_path"].as_str().unwrap();
    let content = fs::read_to_string(config_path).unwrap();
    let launch: Value = serde_json::from_str(&content).unwrap();
    let target = &launch["mcpServers"]["git-files-server"];
    assert_eq!(target["command"], "uv");
    let args: Vec<&str> = target["args"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(args, vec!["--directory", repo_dir, "run", "server.py"]);
    assert_eq!(target["env"], serde_json::json!({}));

    fs::remove_file(config_path).ok();
}

#[test]
fn up_dry_run_uses_fresh_config_file_per_invocation() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");
    make_repo_dir(dir.path());

    let mut paths = Vec::new();
    for _ in 0..2 {
        let output = bin()
            .current_dir(dir.path())
            .env("GANTRY_CONFIG_DIR", &config_dir)
            .arg("--json")
            .arg("up")
            .arg("--dry-run")
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let value = parse_json(&output);
        paths.push(
            value["result"]["launch_config_path"]
                .as_str()
                .unwrap()
                .to_string(),
        );
    }
    assert_ne!(paths[0], paths[1]);
    for path in paths {
        fs::remove_file(path).ok();
    }
}

#[cfg(unix)]
#[test]
fn up_dry_run_packaged_mode_extends_search_path() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");
    make_repo_dir(dir.path());

    let output = bin()
        .current_dir(dir.path())
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .env("PATH", "/original/bin")
        .arg("--json")
        .arg("up")
        .arg("--dry-run")
        .arg("--packaged")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    let search_path = value["result"]["search_path"].as_str().unwrap();
    assert!(search_path.starts_with("/opt/homebrew/bin:"));
    assert!(search_path.ends_with(":/original/bin"));

    if let Some(path) = value["result"]["launch_config_path"].as_str() {
        fs::remove_file(path).ok();
    }
}

#[cfg(unix)]
#[test]
fn up_dry_run_without_packaged_mode_keeps_inherited_path() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");
    make_repo_dir(dir.path());

    let output = bin()
        .current_dir(dir.path())
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .env("PATH", "/original/bin")
        .arg("--json")
        .arg("up")
        .arg("--dry-run")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert_eq!(value["result"]["search_path"], "/original/bin");

    if let Some(path) = value["result"]["launch_config_path"].as_str() {
        fs::remove_file(path).ok();
    }
}

#[test]
fn up_reports_fetch_failure_when_git_missing() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");

    let output = bin()
        .current_dir(dir.path())
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .env("PATH", "")
        .arg("--json")
        .arg("up")
        .arg("--dry-run")
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert!(!value["ok"].as_bool().unwrap());
    let error = value["error"].as_str().unwrap_or_default();
    assert!(error.contains("fetch error"));
    assert!(error.contains("git"));
}

#[test]
fn up_fetch_failure_prints_to_stderr_without_json() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");

    bin()
        .current_dir(dir.path())
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .env("PATH", "")
        .arg("up")
        .arg("--dry-run")
        .assert()
        .failure()
        .stderr(contains("fetch error"));
}

#[test]
fn doctor_reports_missing_tools_in_json() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");

    let output = bin()
        .current_dir(dir.path())
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .env("PATH", "")
        .arg("--json")
        .arg("doctor")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert!(!value["ok"].as_bool().unwrap());
    let checks = value["result"]["checks"].as_array().expect("checks");
    let git = checks
        .iter()
        .find(|row| row["id"] == "git_client")
        .expect("git_client check");
    assert_eq!(git["ok"], false);
    let proxy = checks
        .iter()
        .find(|row| row["id"] == "proxy_program")
        .expect("proxy_program check");
    assert_eq!(proxy["ok"], false);
}

#[test]
fn doctor_fails_without_json_when_tools_missing() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");

    bin()
        .current_dir(dir.path())
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .env("PATH", "")
        .arg("doctor")
        .assert()
        .failure();
}

#[test]
fn paths_reports_resolved_values() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");

    let output = bin()
        .current_dir(dir.path())
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .arg("--json")
        .arg("paths")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert!(value["ok"].as_bool().unwrap());
    assert_eq!(value["result"]["config_exists"], false);
    let repo_dir = value["result"]["repo_dir"].as_str().unwrap();
    assert!(repo_dir.ends_with("MCP_git_repo_to_single_file"));
    assert_eq!(value["result"]["last_run"], Value::Null);
}

#[test]
fn setup_defaults_writes_config() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");

    let output = bin()
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .arg("--json")
        .arg("setup")
        .arg("--defaults")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert!(value["ok"].as_bool().unwrap());
    assert!(value["result"]["created"].as_bool().unwrap());

    let config_path = config_dir.join("config.yaml");
    assert!(config_path.exists());

    bin()
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .arg("config")
        .arg("validate")
        .assert()
        .success();
}

#[test]
fn setup_dry_run_writes_nothing() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");

    let output = bin()
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .arg("--json")
        .arg("setup")
        .arg("--defaults")
        .arg("--dry-run")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    assert!(value["ok"].as_bool().unwrap());
    assert!(value["result"]["dry_run"].as_bool().unwrap());
    assert!(!config_dir.join("config.yaml").exists());
}

#[test]
fn setup_interactive_json_is_rejected() {
    let dir = tempdir().unwrap();
    let config_dir = dir.path().join("config");

    let output = bin()
        .env("GANTRY_CONFIG_DIR", &config_dir)
        .arg("--json")
        .arg("setup")
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();

    let value = parse_json(&output);
    let error = value["error"].as_str().unwrap_or_default();
    assert!(error.contains("--defaults"));
}
