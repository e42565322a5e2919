use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_cli_stitch_to_stdout() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("main.tex"), "Start\n\\input{body}\nEnd\n").unwrap();
    fs::write(dir.path().join("body.tex"), "BODY TEXT").unwrap();

    let mut cmd = Command::cargo_bin("texpack").unwrap();
    cmd.arg("stitch").arg(dir.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Start\nBODY TEXT\nEnd"))
        .stdout(predicate::str::contains("\\input").not());
}

#[test]
fn test_cli_inputs_json() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("main.tex"), "\\includegraphics{fig}\n").unwrap();
    fs::write(dir.path().join("fig.png"), "").unwrap();

    let mut cmd = Command::cargo_bin("texpack").unwrap();
    cmd.arg("inputs").arg(dir.path()).arg("--json");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"fig.png\""))
        .stdout(predicate::str::contains("\"extension_included\": false"));
}

#[test]
fn test_cli_project_name_needs_root() {
    let mut cmd = Command::cargo_bin("texpack").unwrap();
    cmd.env_remove("OVERLEAF_ROOT").arg("stitch").arg("no-such-project").write_stdin("");
    cmd.assert().failure().stderr(predicate::str::contains("Project root not specified"));
}

#[test]
fn test_cli_resolves_project_under_root() {
    let root = tempdir().unwrap();
    let project = root.path().join("paper");
    fs::create_dir(&project).unwrap();
    fs::write(project.join("main.tex"), "hello").unwrap();

    let mut cmd = Command::cargo_bin("texpack").unwrap();
    cmd.current_dir(root.path().parent().unwrap())
        .env("OVERLEAF_ROOT", root.path())
        .arg("stitch")
        .arg("paper");
    cmd.assert().success().stdout(predicate::str::contains("hello"));
}

#[test]
fn test_cli_bundle_writes_submission() {
    let dir = tempdir().unwrap();
    let project = dir.path().join("paper");
    fs::create_dir_all(project.join("figures")).unwrap();
    fs::write(project.join("main.tex"), "\\includegraphics{figures/fig.png}\n\\bibliography{refs}\n").unwrap();
    fs::write(project.join("figures/fig.png"), "png").unwrap();
    fs::write(project.join("refs.bib"), "@misc{k, title={T}}\n").unwrap();
    let output = dir.path().join("out");

    let mut cmd = Command::cargo_bin("texpack").unwrap();
    cmd.arg("bundle").arg(&project).arg(&output);
    cmd.assert().success();

    let manuscript = fs::read_to_string(output.join("manuscript.tex")).unwrap();
    assert_eq!(manuscript, "\\includegraphics{fig.png}\n\\bibliography{references}\n");
    assert!(output.join("references.bib").exists());
    assert!(!output.join("refs.bib").exists());
}

#[test]
fn test_cli_archive_rejects_unknown_format() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("texpack").unwrap();
    cmd.arg("archive")
        .arg(dir.path())
        .arg(dir.path().join("pack"))
        .arg("--format")
        .arg("rar");
    cmd.assert().failure().stderr(predicate::str::contains("Unsupported archive format"));
}
