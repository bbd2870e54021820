//! End-to-end binary tests for `fdfc`.

use assert_cmd::Command;
use predicates::prelude::*;

const MINIMAL: &str = "\
[FD.Boot]
BaseAddress   = 0
Size          = 0x1000
ErasePolarity = 1

0x100|0x10
DATA = { 0x5A, 0xA5 }
";

fn write_fdf(dir: &tempfile::TempDir, text: &str) -> std::path::PathBuf {
    let path = dir.path().join("Platform.fdf");
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn check_accepts_a_valid_document() {
    let dir = tempfile::tempdir().unwrap();
    let fdf = write_fdf(&dir, MINIMAL);
    Command::cargo_bin("fdfc")
        .unwrap()
        .arg(&fdf)
        .arg("--check")
        .arg("-q")
        .assert()
        .success();
}

#[test]
fn diagnostics_go_to_stderr_with_exit_one() {
    let dir = tempfile::tempdir().unwrap();
    let fdf = write_fdf(&dir, "[FD.Boot]\nBaseAddress = 0\nSize = 0x1000\n");
    Command::cargo_bin("fdfc")
        .unwrap()
        .arg(&fdf)
        .arg("--check")
        .arg("-q")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("ErasePolarity"));
}

#[test]
fn dump_document_emits_json() {
    let dir = tempfile::tempdir().unwrap();
    let fdf = write_fdf(&dir, MINIMAL);
    Command::cargo_bin("fdfc")
        .unwrap()
        .arg(&fdf)
        .arg("--dump-document")
        .arg("-q")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Boot\""));
}

#[test]
fn dry_run_plans_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let fdf = write_fdf(&dir, MINIMAL);
    Command::cargo_bin("fdfc")
        .unwrap()
        .arg(&fdf)
        .arg("--dry-run")
        .arg("-q")
        .arg("-o")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("BOOT.fd"));
    assert!(!out.exists());
}

#[test]
fn generate_writes_the_image() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let fdf = write_fdf(&dir, MINIMAL);
    Command::cargo_bin("fdfc")
        .unwrap()
        .arg(&fdf)
        .arg("-q")
        .arg("-o")
        .arg(&out)
        .assert()
        .success();
    let image = std::fs::read(out.join("BOOT.fd")).unwrap();
    assert_eq!(image.len(), 0x1000);
    assert_eq!(image[0x100], 0x5A);
    assert_eq!(image[0x0FF], 0xFF);
}

#[test]
fn cli_define_reaches_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let fdf = write_fdf(
        &dir,
        "[FD.Boot]\nBaseAddress = 0\nSize = $(FLASH_SIZE)\nErasePolarity = 1\n",
    );
    Command::cargo_bin("fdfc")
        .unwrap()
        .arg(&fdf)
        .arg("-D")
        .arg("FLASH_SIZE=0x2000")
        .arg("--dump-document")
        .arg("-q")
        .assert()
        .success()
        .stdout(predicate::str::contains("8192"));
}
