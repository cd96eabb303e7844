use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn cloudsdk() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("cloudsdk"))
}

/// Writes `cloudsdk.toml` into `dir` with the given `[sdk]` body. Logging stays off stderr so
/// assertions only see the command's own output.
fn write_config(dir: &Path, sdk: &str) -> PathBuf {
    let path = dir.join("cloudsdk.toml");
    std::fs::write(
        &path,
        format!("[sdk]\n{sdk}\n\n[logging]\nstderr = false\n"),
    )
    .unwrap();
    path
}

fn fake_sdk(root: &Path) {
    let gcloud = if cfg!(windows) { "gcloud.cmd" } else { "gcloud" };
    std::fs::create_dir_all(root.join("bin")).unwrap();
    std::fs::write(root.join("bin").join(gcloud), "").unwrap();
}

#[cfg(unix)]
fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

#[test]
fn help_mentions_commands() {
    cloudsdk().arg("--help").assert().success().stdout(
        predicate::str::contains("status")
            .and(predicate::str::contains("locate"))
            .and(predicate::str::contains("install"))
            .and(predicate::str::contains("update")),
    );
}

#[test]
fn locate_json_reports_configured_sdk() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("google-cloud-sdk");
    fake_sdk(&root);
    let config = write_config(
        temp.path(),
        &format!(
            "path = '{}'\nmanaged_root = '{}'",
            root.display(),
            temp.path().join("managed").display()
        ),
    );

    let output = cloudsdk()
        .arg("locate")
        .arg("--config")
        .arg(&config)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["root"], serde_json::json!(root));
    assert!(value["gcloud"].as_str().is_some());
}

#[test]
fn locate_without_sdk_exits_one() {
    let temp = TempDir::new().unwrap();
    let config = write_config(
        temp.path(),
        &format!(
            "management = 'managed'\nmanaged_root = '{}'",
            temp.path().join("missing").display()
        ),
    );

    cloudsdk()
        .arg("locate")
        .arg("--config")
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("bin/gcloud"));
}

#[test]
fn status_json_lists_fields() {
    let temp = TempDir::new().unwrap();
    let config = write_config(
        temp.path(),
        &format!(
            "management = 'managed'\nauto_update = false\nmanaged_root = '{}'",
            temp.path().join("managed").display()
        ),
    );

    let output = cloudsdk()
        .arg("status")
        .arg("--config")
        .arg(&config)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["management"], "managed");
    assert_eq!(value["auto_update"], false);
    assert_eq!(value["managed_feature_enabled"], false);
    assert_eq!(value["managed_installed"], false);
    assert!(value["sdk_root"].is_null());
    assert!(value["sdk_error"].as_str().is_some());
    for key in ["config_path", "managed_root"] {
        assert!(value.get(key).is_some(), "missing `{key}` in {value}");
    }
}

#[test]
fn install_without_feature_is_refused() {
    let temp = TempDir::new().unwrap();
    let config = write_config(
        temp.path(),
        &format!(
            "management = 'managed'\nmanaged_root = '{}'",
            temp.path().join("managed").join("google-cloud-sdk").display()
        ),
    );

    cloudsdk()
        .arg("install")
        .arg("--config")
        .arg(&config)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("feature is not enabled"));
}

#[test]
fn install_in_custom_mode_is_refused() {
    let temp = TempDir::new().unwrap();
    let config = write_config(
        temp.path(),
        &format!(
            "managed_root = '{}'",
            temp.path().join("managed").join("google-cloud-sdk").display()
        ),
    );

    cloudsdk()
        .arg("install")
        .arg("--config")
        .arg(&config)
        .arg("--force-feature")
        .arg("--json")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"ok\": false"));
}

#[cfg(unix)]
#[test]
fn failing_installer_exits_one_with_error_chain() {
    let temp = TempDir::new().unwrap();
    let installer = temp.path().join("install.sh");
    write_script(&installer, "echo 'downloading'\necho 'disk full' >&2\nexit 3");
    let config = write_config(
        temp.path(),
        &format!(
            "management = 'managed'\nmanaged_root = '{}'\ninstaller = ['{}']",
            temp.path().join("managed").join("google-cloud-sdk").display(),
            installer.display()
        ),
    );

    cloudsdk()
        .arg("install")
        .arg("--config")
        .arg(&config)
        .arg("--force-feature")
        .assert()
        .code(1)
        .stdout(
            predicate::str::contains("Installing/upgrading the Cloud SDK")
                .and(predicate::str::contains("downloading")),
        )
        .stderr(predicate::str::contains("Install Google Cloud SDK failed"));
}

#[cfg(unix)]
#[test]
fn interrupt_kills_running_installer() {
    use std::process::{Command as ProcessCommand, Stdio};
    use std::time::{Duration, Instant};

    let temp = TempDir::new().unwrap();
    let pid_file = temp.path().join("installer.pid");
    let installer = temp.path().join("install.sh");
    write_script(
        &installer,
        &format!("echo $$ > '{}'\nsleep 30", pid_file.display()),
    );
    let config = write_config(
        temp.path(),
        &format!(
            "management = 'managed'\nmanaged_root = '{}'\ninstaller = ['{}']",
            temp.path().join("managed").join("google-cloud-sdk").display(),
            installer.display()
        ),
    );

    let mut child = ProcessCommand::new(env!("CARGO_BIN_EXE_cloudsdk"))
        .arg("install")
        .arg("--config")
        .arg(&config)
        .arg("--force-feature")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let installer_pid: libc::pid_t = loop {
        let pid = std::fs::read_to_string(&pid_file)
            .ok()
            .and_then(|text| text.trim().parse().ok());
        if let Some(pid) = pid {
            break pid;
        }
        assert!(Instant::now() < deadline, "installer never started");
        std::thread::sleep(Duration::from_millis(20));
    };

    // SAFETY: plain signal delivery to a child we spawned.
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGINT);
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("cloudsdk did not exit after SIGINT");
        }
        std::thread::sleep(Duration::from_millis(20));
    };
    assert_eq!(status.code(), Some(130));

    // The runner reaps the installer before the job reports cancellation.
    // SAFETY: signal 0 only checks for existence.
    let alive = unsafe { libc::kill(installer_pid, 0) } == 0;
    assert!(!alive, "installer {installer_pid} outlived the interrupted CLI");
}
