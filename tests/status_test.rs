use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_fake_qmd(bin_path: &Path) {
    fs::write(bin_path, "#!/usr/bin/env bash\nexit 0\n").expect("write fake qmd");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(bin_path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(bin_path, perms).expect("chmod");
    }
}

fn status_json(root: &Path, extra_env: &[(&str, &str)]) -> (bool, serde_json::Value) {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("convo-index");
    cmd.current_dir(root)
        .env("HOME", root)
        .env("CONVO_HOME", root.join("convo"))
        .env("CLAUDE_PROJECTS_DIR", root.join("projects"))
        .env("QMD_BIN", root.join("qmd"))
        .env_remove("CONVO_CONFIG_PATH")
        .args(["status", "--json"]);
    for (key, value) in extra_env {
        cmd.env(key, value);
    }
    let output = cmd.output().expect("run status");
    let report = serde_json::from_slice(&output.stdout).expect("json report");
    (output.status.success(), report)
}

fn details(report: &serde_json::Value) -> Vec<String> {
    report["details"]
        .as_array()
        .expect("details")
        .iter()
        .filter_map(|d| d.as_str().map(str::to_string))
        .collect()
}

#[test]
fn status_reports_paths_env_keys_and_no_prior_run() {
    let tmp = tempdir().expect("tempdir");
    fs::create_dir_all(tmp.path().join("projects")).expect("mkdir projects");
    write_fake_qmd(&tmp.path().join("qmd"));

    let (ok, report) = status_json(tmp.path(), &[("CONVO_INTERVAL_SECS", "900")]);
    assert!(ok);
    assert_eq!(report["command"], "status");
    let details = details(&report);
    assert!(details.iter().any(|d| d == "last_run=never"));
    assert!(details.iter().any(|d| d == "interval_secs=900"));
    assert!(
        details
            .iter()
            .any(|d| d.starts_with("env.configured=") && d.contains("CONVO_INTERVAL_SECS"))
    );
}

#[test]
fn status_lists_path_overrides_and_version() {
    let tmp = tempdir().expect("tempdir");
    fs::create_dir_all(tmp.path().join("projects")).expect("mkdir projects");
    write_fake_qmd(&tmp.path().join("qmd"));

    let (ok, report) = status_json(tmp.path(), &[("CONVO_PRUNE_STALE", "true")]);
    assert!(ok);
    let details = details(&report);
    let configured = details
        .iter()
        .find_map(|d| d.strip_prefix("env.configured="))
        .expect("env.configured detail");
    let keys: Vec<&str> = configured.split(',').collect();
    for key in ["CONVO_HOME", "CLAUDE_PROJECTS_DIR", "QMD_BIN", "CONVO_PRUNE_STALE"] {
        assert!(keys.contains(&key), "{key} missing from {configured}");
    }
    assert!(!keys.contains(&"CONVO_INTERVAL_SECS"));
    assert!(details.iter().any(|d| d == "prune_stale=true"));
    assert!(
        details
            .iter()
            .any(|d| d == &format!("version={}", env!("CARGO_PKG_VERSION")))
    );
}

#[test]
fn status_flags_missing_search_engine() {
    let tmp = tempdir().expect("tempdir");
    fs::create_dir_all(tmp.path().join("projects")).expect("mkdir projects");

    let (ok, report) = status_json(tmp.path(), &[("PATH", "/nonexistent")]);
    assert!(!ok);
    assert_eq!(report["ok"], false);
    let issues = report["issues"].as_array().expect("issues");
    assert!(
        issues
            .iter()
            .any(|i| i.as_str().unwrap_or_default().contains("qmd binary unavailable"))
    );
}

#[test]
fn invalid_config_is_fatal() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("convo");
    fs::create_dir_all(&home).expect("mkdir home");
    fs::write(home.join("config.toml"), "[schedule]\ninterval_secs = \"soon\"\n")
        .expect("write config");

    assert_cmd::cargo::cargo_bin_cmd!("convo-index")
        .current_dir(tmp.path())
        .env("HOME", tmp.path())
        .env("CONVO_HOME", &home)
        .env_remove("CONVO_CONFIG_PATH")
        .arg("status")
        .assert()
        .failure()
        .stderr(predicates::str::contains("config file invalid or unreadable"));
}
