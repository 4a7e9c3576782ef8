//! End-to-end tests for `latest`, `checkout` and `poll` against local git
//! repositories. They need a `git` binary and run with
//! `--features integration-tests`.

mod common;
use common::prelude::*;

#[test]
fn test_latest_unknown_pipeline() {
    let fixture = TestFixture::new().with_config(configs::EMPTY);
    let mut cmd = cargo_bin_cmd!("material-tracker");

    cmd.env("MATERIAL_TRACKER_HOME", fixture.home())
        .arg("latest")
        .arg("--config")
        .arg(fixture.config_path())
        .arg("--pipeline")
        .arg("nope")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No pipeline named 'nope'"));
}

#[test]
fn test_checkout_requires_dest() {
    let mut cmd = cargo_bin_cmd!("material-tracker");

    cmd.arg("checkout")
        .arg("--pipeline")
        .arg("build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--dest"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_latest_shows_head_and_build_cause() {
    let fixture = TestFixture::new();
    let repo = GitRepo::init(&fixture.path().join("origin"));
    repo.commit("initial", &[("README.md", "# app")]);
    let head = repo.commit("add code", &[("src/lib.rs", "pub fn f() {}")]);
    let fixture = fixture.with_config(&configs::single_git(&repo.url()));
    let mut cmd = cargo_bin_cmd!("material-tracker");

    cmd.env("MATERIAL_TRACKER_HOME", fixture.home())
        .arg("--color")
        .arg("never")
        .arg("latest")
        .arg("--config")
        .arg(fixture.config_path())
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains(format!("app @ {}", &head[..7])))
        .stdout(predicate::str::contains("modified by Test User"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_checkout_then_update_in_place() {
    let fixture = TestFixture::new();
    let repo = GitRepo::init(&fixture.path().join("origin"));
    repo.commit("initial", &[("README.md", "v1")]);
    let fixture = fixture.with_config(&configs::single_git(&repo.url()));
    let dest = fixture.path().join("work");

    cargo_bin_cmd!("material-tracker")
        .env("MATERIAL_TRACKER_HOME", fixture.home())
        .args(["checkout", "--pipeline", "build", "--dest"])
        .arg(&dest)
        .arg("--config")
        .arg(fixture.config_path())
        .assert()
        .success()
        .stdout(predicate::str::contains("fresh checkout"));
    fixture.child("work/README.md").assert("v1");

    repo.commit("second", &[("README.md", "v2")]);
    cargo_bin_cmd!("material-tracker")
        .env("MATERIAL_TRACKER_HOME", fixture.home())
        .args(["checkout", "--pipeline", "build", "--dest"])
        .arg(&dest)
        .arg("--config")
        .arg(fixture.config_path())
        .assert()
        .success()
        .stdout(predicate::str::contains("updated in place"));
    fixture.child("work/README.md").assert("v2");
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_poll_once_parses_config_repo() {
    let fixture = TestFixture::new();
    let repo = GitRepo::init(&fixture.path().join("infra"));
    let head = repo.commit(
        "pipelines",
        &[(
            "pipelines/deploy.pipeline.yaml",
            "name: deploy\nmaterials:\n  - type: git\n    url: https://example.com/app.git\n    branch: main\n",
        )],
    );
    let fixture = fixture.with_config(&configs::config_repo(&repo.url()));

    cargo_bin_cmd!("material-tracker")
        .env("MATERIAL_TRACKER_HOME", fixture.home())
        .args(["--color", "never", "poll", "--once", "--config"])
        .arg(fixture.config_path())
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("[ OK ] config-repo infra @ {}", &head[..7])))
        .stdout(predicate::str::contains("1 pipeline(s) in the merged configuration"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_poll_once_reports_broken_config_repo() {
    let fixture = TestFixture::new();
    let repo = GitRepo::init(&fixture.path().join("infra"));
    repo.commit("broken", &[("deploy.pipeline.yaml", "name: [unclosed")]);
    let fixture = fixture.with_config(&configs::config_repo(&repo.url()));

    cargo_bin_cmd!("material-tracker")
        .env("MATERIAL_TRACKER_HOME", fixture.home())
        .args(["--color", "never", "poll", "--once", "--config"])
        .arg(fixture.config_path())
        .assert()
        .success()
        .stdout(predicate::str::contains("[FAIL] config-repo infra"))
        .stdout(predicate::str::contains("deploy.pipeline.yaml"))
        .stdout(predicate::str::contains("0 pipeline(s) in the merged configuration"));
}
