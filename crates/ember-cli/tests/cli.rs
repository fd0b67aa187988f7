use predicates::prelude::*;
use std::fs;

fn ember() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("ember").into()
}

fn fixture_path(name: &str) -> String {
    format!(
        "{}/tests/fixtures/{}.em",
        env!("CARGO_MANIFEST_DIR"),
        name
    )
}

fn temp_source(contents: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("input.em");
    fs::write(&file, contents).unwrap();
    let path = file.to_str().unwrap().to_string();
    (dir, path)
}

// ── run command ─────────────────────────────────────────────

#[test]
fn run_factorial_produces_output() {
    ember()
        .args(["run", &fixture_path("factorial")])
        .assert()
        .success()
        .stdout(predicate::str::contains("fact : fn(int) -> int"))
        .stdout(predicate::str::contains("120"));
}

#[test]
fn run_closures_share_state() {
    ember()
        .args(["run", &fixture_path("closures")])
        .assert()
        .success()
        .stdout(predicate::str::contains("next : closure() -> int\n1\n2\n"));
}

#[test]
fn run_records() {
    ember()
        .args(["run", &fixture_path("records")])
        .assert()
        .success()
        .stdout(predicate::str::contains("Point : fn(int, int) -> Point"))
        .stdout(predicate::str::contains("7\n2\nPoint(x: 2, y: 0)\n"));
}

#[test]
fn run_type_error_exits_nonzero() {
    let (_dir, file) = temp_source("var x = 5;\nx + 2.0;\n");
    ember()
        .args(["run", &file])
        .assert()
        .failure()
        .stdout(predicate::str::contains("x : int"))
        .stderr(predicate::str::contains(
            "type error: type mismatch: expected int, found double",
        ));
}

#[test]
fn run_runtime_error_exits_nonzero() {
    let (_dir, file) = temp_source("var zero = 0;\n10 / zero;\n");
    ember()
        .args(["run", &file])
        .assert()
        .failure()
        .stderr(predicate::str::contains("runtime error: division by zero"));
}

#[test]
fn syntax_error_exits_nonzero() {
    let (_dir, file) = temp_source("var = 1;");
    ember()
        .args(["run", &file])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parse error"));
}

#[test]
fn missing_file_produces_error() {
    ember()
        .args(["run", "does-not-exist.em"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not read"));
}

#[test]
fn trace_prints_assignments() {
    let (_dir, file) = temp_source("var x = 5;");
    ember()
        .args(["--trace", "run", &file])
        .assert()
        .success()
        .stdout(predicate::str::contains("+ binder(x) : int"))
        .stdout(predicate::str::contains("assignments:\n  T1 := int"));
}

// ── check command ───────────────────────────────────────────

#[test]
fn check_valid_file_exits_zero() {
    ember()
        .args(["check", &fixture_path("factorial")])
        .assert()
        .success()
        .stdout(predicate::str::contains("fact : fn(int) -> int"))
        .stdout(predicate::str::contains("OK"))
        .stdout(predicate::str::contains("120").not());
}

#[test]
fn check_type_error_exits_nonzero() {
    let (_dir, file) = temp_source("var a = 1, a = 2;");
    ember()
        .args(["check", &file])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "type error: 'a' is declared twice in the same statement",
        ));
}

// ── parse command ───────────────────────────────────────────

#[test]
fn parse_outputs_ast() {
    ember()
        .args(["parse", &fixture_path("factorial")])
        .assert()
        .success()
        .stdout(predicate::str::contains("+ fndec"))
        .stdout(predicate::str::contains("+ binder(fact)"));
}

// ── repl ────────────────────────────────────────────────────

#[test]
fn repl_reads_piped_forms() {
    ember()
        .write_stdin("var x = 5;\nx + 1;\ny;\nx;\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("x : int\n6\n5\n"))
        .stderr(predicate::str::contains(
            "error: type error: unbound symbol 'y'",
        ));
}

#[test]
fn repl_joins_unbalanced_lines() {
    ember()
        .arg("repl")
        .write_stdin("fn add(a, b) {\n    return a + b;\n}\nadd(2, 3);\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("add : fn(int, int) -> int"))
        .stdout(predicate::str::contains("5\n"));
}

#[test]
fn repl_forgets_failed_forms() {
    ember()
        .write_stdin("var keep = 1;\nvar a = 1, b = missing;\na;\nkeep;\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("keep : int\n1\n"))
        .stderr(predicate::str::contains("unbound symbol 'missing'"))
        .stderr(predicate::str::contains("unbound symbol 'a'"));
}
