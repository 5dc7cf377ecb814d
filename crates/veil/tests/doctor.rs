use std::process::Command;

use eyre::Context as _;

fn veil(cfg_dir: &std::path::Path, data_dir: &std::path::Path) -> Command {
    let exe = assert_cmd::cargo::cargo_bin!("veil");
    let mut cmd = Command::new(exe);
    cmd.env("VEIL_CONFIG_DIR", cfg_dir)
        .env("VEIL_DATA_DIR", data_dir)
        .env_remove("VEIL_PASSWORD");
    cmd
}

#[test]
fn doctor_json_runs_and_returns_valid_json() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = veil(cfg_dir.path(), data_dir.path())
        .args(["doctor", "--json"])
        .output()
        .context("run veil doctor --json")?;

    assert!(
        out.status.success(),
        "doctor exited non-zero: status={:?}, stderr={}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse doctor json")?;
    assert_eq!(v.get("ok").and_then(serde_json::Value::as_bool), Some(true));
    assert!(v.get("version").and_then(|x| x.as_str()).is_some());
    assert!(v.get("paths").and_then(|x| x.as_object()).is_some());
    assert_eq!(
        v.pointer("/store/wallet_exists")
            .and_then(serde_json::Value::as_bool),
        Some(false)
    );
    Ok(())
}

#[test]
fn wipe_requires_confirmation() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = veil(cfg_dir.path(), data_dir.path())
        .arg("wipe")
        .output()
        .context("run veil wipe")?;
    assert!(!out.status.success(), "wipe without --yes must fail");

    let out = veil(cfg_dir.path(), data_dir.path())
        .args(["wipe", "--yes"])
        .output()
        .context("run veil wipe --yes")?;
    assert!(
        out.status.success(),
        "wipe --yes failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse wipe json")?;
    assert_eq!(v.get("wiped").and_then(serde_json::Value::as_bool), Some(true));
    Ok(())
}

#[test]
fn view_key_decode_rejects_garbage() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;
    let out = veil(cfg_dir.path(), data_dir.path())
        .args(["view-key", "decode", "not base64!"])
        .output()
        .context("run veil view-key decode")?;
    assert!(!out.status.success(), "garbage view key must be rejected");
    Ok(())
}

#[test]
fn address_without_password_fails_non_interactively() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;
    let out = veil(cfg_dir.path(), data_dir.path())
        .arg("address")
        .stdin(std::process::Stdio::null())
        .output()
        .context("run veil address")?;
    assert!(!out.status.success(), "address needs a password");
    Ok(())
}

#[test]
fn paths_reports_overridden_dirs() -> eyre::Result<()> {
    use predicates::prelude::*;

    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;
    let data = data_dir.path().to_string_lossy().to_string();

    assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("veil"))
        .env("VEIL_CONFIG_DIR", cfg_dir.path())
        .env("VEIL_DATA_DIR", data_dir.path())
        .arg("paths")
        .assert()
        .success()
        .stdout(
            predicate::str::contains(data).and(predicate::str::contains("veil.log.jsonl")),
        );
    Ok(())
}

#[test]
fn address_rejects_empty_password() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;
    let out = veil(cfg_dir.path(), data_dir.path())
        .arg("address")
        .env("VEIL_PASSWORD", "")
        .stdin(std::process::Stdio::null())
        .output()
        .context("run veil address")?;
    assert!(!out.status.success(), "empty password must be refused");
    assert!(
        String::from_utf8_lossy(&out.stderr).contains("password must not be empty"),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    Ok(())
}
