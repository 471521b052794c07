use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};

use zip::write::{SimpleFileOptions, ZipWriter};

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_log-sift")
}

fn stored() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored)
}

fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = ZipWriter::new(&mut cursor);
    for (name, bytes) in members {
        writer.start_file(*name, stored()).expect("start member");
        writer.write_all(bytes).expect("write member");
    }
    writer.finish().expect("finish archive");
    cursor.into_inner()
}

fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
    fs::write(path, zip_bytes(members)).expect("write archive");
}

fn run(args: &[&str]) -> Output {
    Command::new(bin())
        .args(args)
        .output()
        .expect("command should run")
}

fn run_with_stdin(args: &[&str], input: &str) -> Output {
    let mut child = Command::new(bin())
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("command should spawn");
    child
        .stdin
        .take()
        .expect("stdin handle")
        .write_all(input.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("command should finish")
}

fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

const APP_LOG: &[u8] = b"INFO start\nERROR boom\ndetail 1\ndetail 2\nINFO end\n";

#[test]
fn test_excerpt_is_one_line_and_round_trips() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_zip(&dir.path().join("run.zip"), &[("app.log", APP_LOG)]);
    let root = dir.path().to_string_lossy().into_owned();

    let output = run(&[
        "regex",
        &root,
        r"\.log$",
        "^ERROR",
        "--after",
        "2",
        "--line-delimiter",
        "<NL>",
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let lines = stdout_lines(&output);
    assert_eq!(lines, vec!["ERROR boom<NL>detail 1<NL>detail 2"]);
    assert_eq!(
        log_sift::decode_window(&lines[0], "<NL>"),
        "ERROR boom\ndetail 1\ndetail 2"
    );
}

#[test]
fn test_excerpt_with_path_prefix() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_zip(&dir.path().join("run.zip"), &[("app.log", APP_LOG)]);
    let root = dir.path().to_string_lossy().into_owned();

    let output = run(&["regex", &root, r"\.log$", "^ERROR", "--with-path"]);
    assert!(output.status.success());

    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0], format!("{root}/run.zip/app.log: ERROR boom"));
}

#[test]
fn test_name_listing_chains_into_content_search() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_zip(
        &dir.path().join("run.zip"),
        &[("app.log", APP_LOG), ("quiet.log", b"INFO only\n")],
    );
    fs::write(dir.path().join("notes.txt"), "ERROR in notes\n").expect("write");
    let root = dir.path().to_string_lossy().into_owned();

    let listing = run(&["name", &root, r"\.log$"]);
    assert!(listing.status.success());
    let ids = String::from_utf8_lossy(&listing.stdout).into_owned();
    assert_eq!(
        stdout_lines(&listing),
        vec![
            format!("{root}/run.zip/app.log"),
            format!("{root}/run.zip/quiet.log"),
        ]
    );

    // Feed the identifiers into a second invocation in chained mode.
    let chained = run_with_stdin(&["regex", "-", ".*", "ERROR", "-l"], &ids);
    assert!(
        chained.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&chained.stderr)
    );

    // A fresh traversal with the same staging finds the same entries.
    let fresh = run(&["regex", &root, r"\.log$", "ERROR", "-l"]);
    assert!(fresh.status.success());
    assert_eq!(stdout_lines(&chained), stdout_lines(&fresh));
    assert_eq!(
        stdout_lines(&chained),
        vec![format!("{root}/run.zip/app.log")]
    );
}

#[test]
fn test_corrupt_member_yields_matches_warning_and_success() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_zip(
        &dir.path().join("mixed.zip"),
        &[
            ("bad.zip", b"this is not an archive".as_slice()),
            ("ok1.log", b"hit one\n".as_slice()),
            ("ok2.log", b"hit two\n".as_slice()),
        ],
    );
    let root = dir.path().to_string_lossy().into_owned();

    let output = run(&["regex", &root, r"\.log$", "hit", "-l"]);
    assert!(output.status.success());
    assert_eq!(
        stdout_lines(&output),
        vec![
            format!("{root}/mixed.zip/ok1.log"),
            format!("{root}/mixed.zip/ok2.log"),
        ]
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.matches("WARN:").count(), 1, "stderr: {stderr}");
    assert!(stderr.contains("bad.zip"));
}

#[test]
fn test_quiet_suppresses_warnings() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_zip(
        &dir.path().join("mixed.zip"),
        &[
            ("bad.zip", b"garbage".as_slice()),
            ("ok.log", b"hit\n".as_slice()),
        ],
    );
    let root = dir.path().to_string_lossy().into_owned();

    let output = run(&["--quiet", "regex", &root, r"\.log$", "hit", "-l"]);
    assert!(output.status.success());
    assert!(output.stderr.is_empty());
    assert_eq!(stdout_lines(&output).len(), 1);
}

#[test]
fn test_jq_selects_members_of_matching_archives() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_zip(
        &dir.path().join("r1.zip"),
        &[
            (
                "manifest",
                br#"{"tags":["application log"],"applicationVersion":"1.24.36"}"#.as_slice(),
            ),
            ("app.log", b"payload one\n".as_slice()),
        ],
    );
    write_zip(
        &dir.path().join("r2.zip"),
        &[
            (
                "manifest",
                br#"{"tags":["trace"],"applicationVersion":"2.0.0"}"#.as_slice(),
            ),
            ("app.log", b"payload two\n".as_slice()),
        ],
    );
    let root = dir.path().to_string_lossy().into_owned();

    let output = run(&[
        "jq",
        &root,
        "manifest",
        r#"applicationVersion == "1.24.36" and tags contains "application log""#,
        "-l",
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        stdout_lines(&output),
        vec![
            format!("{root}/r1.zip/app.log"),
            format!("{root}/r1.zip/manifest"),
        ]
    );
}

#[test]
fn test_directory_manifest_scopes_plain_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let run_dir = dir.path().join("run1");
    fs::create_dir(&run_dir).expect("mkdir");
    fs::write(run_dir.join("manifest"), r#"{"applicationVersion":"1.24.36"}"#).expect("write");
    fs::write(run_dir.join("app.log"), "payload\n").expect("write");
    let other = dir.path().join("run2");
    fs::create_dir(&other).expect("mkdir");
    fs::write(other.join("app.log"), "payload\n").expect("write");
    let root = dir.path().to_string_lossy().into_owned();

    let output = run(&["jq", &root, "manifest", r#"applicationVersion == "1.24.36""#, "-l"]);
    assert!(output.status.success());
    assert_eq!(
        stdout_lines(&output),
        vec![
            format!("{root}/run1/app.log"),
            format!("{root}/run1/manifest"),
        ]
    );
}

#[test]
fn test_negative_after_is_a_configuration_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let root = dir.path().to_string_lossy().into_owned();

    let output = run(&["regex", &root, ".*", "x", "--after=-1"]);
    assert!(!output.status.success());
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("must not be negative"),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_invalid_predicate_is_a_configuration_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let root = dir.path().to_string_lossy().into_owned();

    let output = run(&["jq", &root, "manifest", "version = \"1\""]);
    assert!(!output.status.success());
}

#[test]
fn test_missing_root_is_a_configuration_error() {
    let output = run(&["name", "/definitely/not/here", ".*"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot open root path"));
}

#[test]
fn test_zero_matches_is_still_success() {
    let dir = tempfile::tempdir().expect("temp dir");
    fs::write(dir.path().join("a.log"), "nothing here\n").expect("write");
    let root = dir.path().to_string_lossy().into_owned();

    let output = run(&["regex", &root, ".*", "no-such-needle"]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_parallel_output_matches_sequential() {
    let dir = tempfile::tempdir().expect("temp dir");
    for i in 0..6 {
        let sub = dir.path().join(format!("part{i}"));
        fs::create_dir(&sub).expect("mkdir");
        fs::write(sub.join("a.log"), format!("hit {i}\n")).expect("write");
        write_zip(
            &sub.join("inner.zip"),
            &[("b.log", format!("hit zip {i}\n").as_bytes())],
        );
    }
    let root = dir.path().to_string_lossy().into_owned();

    let sequential = run(&["regex", &root, r"\.log$", "hit", "-l"]);
    let parallel = run(&["--parallel", "3", "regex", &root, r"\.log$", "hit", "-l"]);
    assert!(sequential.status.success());
    assert!(parallel.status.success());
    assert_eq!(sequential.stdout, parallel.stdout);
    assert_eq!(stdout_lines(&sequential).len(), 12);
}
