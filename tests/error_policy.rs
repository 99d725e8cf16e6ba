//! Error-policy discipline: fail-fast by default, `?` to ignore or fall
//! back, `!` to fall back and halt.

use std::process::{Command, Output};

use tempfile::TempDir;

fn run_script(source: &str) -> Output {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("script.box");
    std::fs::write(&path, source).unwrap();
    Command::new(env!("CARGO_BIN_EXE_box"))
        .arg(&path)
        .current_dir(dir.path())
        .output()
        .expect("failed to run box")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn fail_fast_default() {
    let out = run_script("[main]\necho \"before\"\nexists \"/nonexistent/path\"\necho \"after\"\nend");
    assert_eq!(stdout(&out), "before\n");
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn ignore_error_with_question_mark() {
    let out = run_script(
        "[main]\necho \"before\"\nexists \"/nonexistent/path\" ?\necho \"after\"\nend",
    );
    assert_eq!(stdout(&out), "before\nafter\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn fallback_command_runs_on_failure() {
    let out = run_script(
        "[main]\necho \"before\"\nexists \"/nonexistent/path\" ? echo \"file not found\"\n\
         echo \"after\"\nend",
    );
    assert_eq!(stdout(&out), "before\nfile not found\nafter\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn fallback_skipped_on_success() {
    let out = run_script("[main]\nexists \".\" ? echo \"not printed\"\necho ok\nend");
    assert_eq!(stdout(&out), "ok\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn bang_runs_fallback_then_halts() {
    let out = run_script(
        "[main]\necho \"before\"\nexists \"/nonexistent/path\" ! echo \"critical error\"\n\
         echo \"should not print\"\nend",
    );
    assert_eq!(stdout(&out), "before\ncritical error\n");
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn bang_fallback_skipped_on_success() {
    let out = run_script("[main]\nexists \".\" ! echo \"not printed\"\necho ok\nend");
    assert_eq!(stdout(&out), "ok\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn nested_fallbacks() {
    let out = run_script(
        "[main]\nexists \"/bad1\" ? exists \"/bad2\" ? echo \"double fallback\"\n\
         echo \"continued\"\nend",
    );
    assert_eq!(stdout(&out), "double fallback\ncontinued\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn status_keeps_real_exit_after_ignore() {
    let out = run_script("[main]\nexists \"/nonexistent\" ?\necho $status\nend");
    assert_eq!(stdout(&out), "1\n");
}

#[test]
fn failing_function_halts_the_caller() {
    let out = run_script(
        "[fn doomed]\nexists \"/nonexistent\"\nend\n\
         [main]\ndoomed\necho \"not reached\"\nend",
    );
    assert_eq!(stdout(&out), "");
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn failing_function_caught_at_call_site() {
    let out = run_script(
        "[fn doomed]\nexists \"/nonexistent\"\nend\n\
         [main]\ndoomed ? echo \"caught\"\necho \"continues\"\nend",
    );
    assert_eq!(stdout(&out), "caught\ncontinues\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn hard_error_with_bang_still_reports() {
    let out = run_script("[main]\narith 1 \"/\" 0 ! echo cleanup\necho never\nend");
    assert_eq!(stdout(&out), "cleanup\n");
    assert_eq!(out.status.code(), Some(1));
    let err = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(err.contains("division by zero"), "stderr: {err}");
}

#[test]
fn failure_inside_loop_halts_script() {
    let out = run_script(
        "[main]\nfor i in 1 2 3\necho $i\nexists \"/nonexistent\"\nend\necho done\nend",
    );
    assert_eq!(stdout(&out), "1\n");
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn redirect_open_failure_respects_policy() {
    let out = run_script(
        "[main]\necho hi > /nonexistent-dir/deep/out.txt ? echo \"redirect failed\"\n\
         echo done\nend",
    );
    assert_eq!(stdout(&out), "redirect failed\ndone\n");
    assert_eq!(out.status.code(), Some(0));
}
