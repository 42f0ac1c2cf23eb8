//! End-to-end tests for the `cw` binary

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const ECHOER: &str = "name: echoer\ndescription: says hi\npath: /bin/echo\nargs:\n  - name: msg\n    default: hi\n";
const SLEEPER: &str = "name: sleeper\npath: /bin/sleep\nargs:\n  - name: seconds\n    default: \"30\"\n";

/// A workspace with one program repository and a quiet config file
struct Fixture {
    temp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("programs")).unwrap();
        fs::write(temp.path().join("programs/a.yaml"), ECHOER).unwrap();
        fs::write(temp.path().join("cw.yml"), "log-level: warn\n").unwrap();
        Self { temp }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.temp.path().join(relative)
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Start `cw` with `args`, interrupt it with SIGINT once it is running
    fn interrupt(&self, args: &[&str]) -> std::process::Output {
        let child = Command::new(assert_cmd::cargo::cargo_bin!("cw"))
            .current_dir(self.temp.path())
            .arg("-c")
            .arg(self.path("cw.yml"))
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        thread::sleep(Duration::from_millis(800));
        let status = Command::new("kill")
            .args(["-INT", &child.id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());
        child.wait_with_output().unwrap()
    }

    fn cw(&self) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("cw");
        cmd.current_dir(self.temp.path()).arg("-c").arg(self.path("cw.yml"));
        cmd
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn test_ls_json() {
    let fixture = Fixture::new();
    let output = fixture
        .cw()
        .args(["ls", "-r", "programs", "-f", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let listings: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listings[0]["name"], "echoer");
    assert_eq!(listings[0]["desc"], "says hi");
    assert_eq!(listings[0]["args"], "hi");
}

#[test]
fn test_ls_duplicate_names_fail() {
    let fixture = Fixture::new();
    fixture.write("programs/b.yaml", ECHOER);
    fixture
        .cw()
        .args(["ls", "-r", "programs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("echoer"));
}

#[test]
fn test_run_file() {
    let fixture = Fixture::new();
    fixture
        .cw()
        .args(["run", "--file", "programs/a.yaml"])
        .assert()
        .success()
        .stdout("hi\n");
}

#[test]
fn test_run_positional_file_or_name() {
    let fixture = Fixture::new();
    fixture
        .cw()
        .args(["run", "programs/a.yaml"])
        .assert()
        .success()
        .stdout("hi\n");

    fixture
        .cw()
        .args(["run", "echoer", "-r", "programs"])
        .assert()
        .success()
        .stdout("hi\n");
}

#[test]
fn test_run_unknown_name_fails() {
    let fixture = Fixture::new();
    fixture
        .cw()
        .args(["run", "--program", "nobody", "-r", "programs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nobody"));
}

#[test]
fn test_run_without_source_fails() {
    let fixture = Fixture::new();
    fixture.cw().arg("run").assert().failure();
}

#[test]
fn test_render_file_to_stdout() {
    let fixture = Fixture::new();
    fixture.write("page.md", "say: {{ run \"echoer\" msg=\"hello\" }}");
    fixture
        .cw()
        .args(["render", "page.md", "-r", "programs", "-q"])
        .assert()
        .success()
        .stdout("say: hello\n");
}

#[test]
fn test_render_directory_with_rename() {
    let fixture = Fixture::new();
    fixture.write("docs/index.md.tmpl", "{{ run \"echoer\" }}");
    fixture.write("docs/guide/intro.md.tmpl", "intro {{ run \"echoer\" msg=\"there\" }}");

    fixture
        .cw()
        .args(["render", "docs", "-o", "out", "--rename", ".tmpl:", "-r", "programs", "-q"])
        .assert()
        .success();

    assert_eq!(read(&fixture.path("out/index.md")), "hi\n");
    assert_eq!(read(&fixture.path("out/guide/intro.md")), "intro there\n");
}

#[test]
fn test_render_output_file_with_delimiters() {
    let fixture = Fixture::new();
    fixture.write("page.txt", "<% run \"echoer\" %> and {{ kept }}");

    fixture
        .cw()
        .args([
            "render",
            "page.txt",
            "--output-file",
            "rendered.txt",
            "--delimiters",
            "<%",
            "%>",
            "-r",
            "programs",
            "-q",
        ])
        .assert()
        .success();

    assert_eq!(read(&fixture.path("rendered.txt")), "hi\n and {{ kept }}");
}

#[test]
fn test_render_unknown_program_fails() {
    let fixture = Fixture::new();
    fixture.write("page.md", "{{ run \"missing\" }}");
    fixture
        .cw()
        .args(["render", "page.md", "-r", "programs", "-q"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing"));
}

#[test]
fn test_render_directory_requires_output_directory() {
    let fixture = Fixture::new();
    fixture.write("docs/index.md", "static");
    fixture
        .cw()
        .args(["render", "docs", "-q"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("output directory"));
}

#[test]
fn test_run_interrupted_is_not_an_error() {
    let fixture = Fixture::new();
    let sleeper = fixture.write("sleeper.yaml", SLEEPER);

    let output = fixture.interrupt(&["run", "--file", sleeper.to_str().unwrap()]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("Error:"), "stderr: {}", stderr);
    assert!(output.status.success(), "status: {:?}", output.status);
}

#[test]
fn test_render_interrupted_is_not_an_error() {
    let fixture = Fixture::new();
    fixture.write("programs/sleeper.yaml", SLEEPER);
    fixture.write("page.md", "{{ run \"sleeper\" }}");

    let output = fixture.interrupt(&["render", "page.md", "-r", "programs", "-q"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("Error:"), "stderr: {}", stderr);
    assert!(output.status.success(), "status: {:?}", output.status);
    assert!(output.stdout.is_empty());
}
