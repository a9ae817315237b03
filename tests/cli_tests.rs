//! Command-line surface checks. None of these reach the database.

use assert_cmd::Command;

fn portal_sync() -> Command {
    Command::cargo_bin("portal-sync").expect("binary builds")
}

#[test]
fn help_lists_every_trigger() {
    let output = portal_sync().arg("--help").output().expect("runs");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["serve", "sync-all", "sync", "aggregate", "migrate"] {
        assert!(stdout.contains(command), "missing `{command}` in help:\n{stdout}");
    }
}

#[test]
fn aggregate_rejects_unknown_period() {
    portal_sync()
        .args([
            "aggregate",
            "--period",
            "daily",
            "--from",
            "2024-05-06",
            "--to",
            "2024-05-12",
        ])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn sync_requires_an_integration_id() {
    portal_sync().args(["sync", "not-a-uuid"]).assert().failure().code(2);
}
