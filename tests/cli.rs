use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn ezlang_run_demo_script() {
    let mut cmd = Command::cargo_bin("ezlang").expect("binary exists");
    cmd.arg("run").arg("demos/hello.ez");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Hello, EzLang!"))
        .stdout(predicate::str::contains("Hello, Grace!"))
        .stdout(predicate::str::contains("module name: greeter"));
}

#[test]
fn ezlang_eval_prints_value() {
    let mut cmd = Command::cargo_bin("ezlang").expect("binary exists");
    cmd.arg("eval").arg("1 + 2 + 3");
    cmd.assert().success().stdout(predicate::str::diff("6\n"));
}

#[test]
fn ezlang_eval_reports_runtime_errors() {
    let mut cmd = Command::cargo_bin("ezlang").expect("binary exists");
    cmd.arg("eval").arg("1 < \"a\"");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("comparison requires numbers"))
        .stderr(predicate::str::starts_with("error: 1:"));
}

#[test]
fn ezlang_modules_lists_loaded_modules() {
    let mut cmd = Command::cargo_bin("ezlang").expect("binary exists");
    cmd.arg("modules").arg("demos/lib/greetings.ez");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("greeter"))
        .stdout(predicate::str::contains("exports=3"));
}

#[test]
fn ezlang_honours_config_export_prefix() {
    let dir = tempdir().expect("create temp dir");
    let config = dir.path().join("custom.toml");
    fs::write(&config, "[modules]\nexport_prefix = \"pub_\"\n").expect("write config");
    let module = dir.path().join("shop.ez");
    fs::write(&module, "var pub_price = 3\nvar pub_name = \"tea\"\nvar export_old = 1\n")
        .expect("write module");

    let mut cmd = Command::cargo_bin("ezlang").expect("binary exists");
    cmd.arg("--config").arg(&config).arg("modules").arg(&module);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("shop"))
        .stdout(predicate::str::contains("exports=2"));
}

#[test]
fn ezlang_run_missing_script_fails() {
    let dir = tempdir().expect("create temp dir");
    let mut cmd = Command::cargo_bin("ezlang").expect("binary exists");
    cmd.arg("run").arg(dir.path().join("nope.ez"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}
