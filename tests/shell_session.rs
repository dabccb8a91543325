//! Scripted sessions against the real binary.

use std::io::Write;
use std::process::{Command, Stdio};

/// Run a script through the shell and return its stdout.
fn session(script: &str) -> String {
    let mut child = Command::new(env!("CARGO_BIN_EXE_minnow"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to launch shell");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(script.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success(), "shell exited with {}", output.status);
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn set_show_round_trip() {
    let out = session("set fruit pear\nshow\nquit\n");
    assert!(out.contains("Data store:"));
    assert!(out.contains("\tfruit:\t\"pear\"\n"));
}

#[test]
fn eof_ends_the_session() {
    let out = session("set a 1\n");
    assert!(!out.contains("error"));
}

#[test]
fn capture_deposits_into_variable() {
    let out = session("echo hi | tr h H >@ result\nshow\nquit\n");
    assert!(out.contains("\tresult:\t\"Hi\"\n"), "got: {}", out);
}

#[test]
fn captured_variable_feeds_later_pipelines() {
    let out = session("echo ping >@ first\necho $first pong >@ second\nshow\nquit\n");
    assert!(out.contains("\tsecond:\t\"ping pong\"\n"), "got: {}", out);
}

#[test]
fn stored_program_runs_in_line_order() {
    let out = session("20 set b 2\n10 set a 1\nlist\nrun\nshow\nquit\n");
    let listing = "10 set a 1\n20 set b 2\n-->\n";
    assert!(out.contains(listing), "got: {}", out);
    assert!(out.contains("\ta:\t\"1\"\n"));
    assert!(out.contains("\tb:\t\"2\"\n"));
}

#[test]
fn delete_and_goto_manage_the_cursor() {
    let out = session("10 set a 1\n20 set b 2\n30 set c 3\ngoto 20\ndelete 20 30\nlist\nquit\n");
    assert!(out.contains("10 set a 1\n-->\n"), "got: {}", out);
}

#[test]
fn errors_are_reported_and_do_not_kill_the_repl() {
    let out = session("goto 5\nset x 1\nshow\nquit\n");
    assert!(out.contains("error: no line 5"));
    assert!(out.contains("\tx:\t\"1\"\n"));
}

#[test]
fn jobs_listing_shows_completed_capture_job() {
    let out = session("echo done >@ d\njobs\nquit\n");
    let line = out
        .lines()
        .find(|l| l.contains("completed"))
        .expect("no completed job line");
    assert!(line.contains("echo done >@"), "got: {}", line);
}

#[test]
fn launched_pipeline_reports_its_job_id() {
    let out = session("echo one >@ x\nquit\n");
    assert!(out.contains("[0]\n"), "got: {}", out);
}
