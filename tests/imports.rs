//! Import and namespace behavior: qualified calls, namespaced data,
//! namespace context inside imported functions, collisions, re-imports.

use std::process::{Command, Output};

use tempfile::TempDir;

const UTIL: &str = "[data info]\n\
name \"utils\"\n\
version \"2.0\"\n\
end\n\
\n\
[fn greet who]\n\
echo \"hello, $who\"\n\
end\n\
\n\
[fn describe]\n\
echo \"${info.name} v${info.version}\"\n\
end\n\
\n\
[fn helper]\n\
echo \"helped\"\n\
end\n\
\n\
[fn outer]\n\
helper\n\
end\n\
\n\
[main]\n\
echo \"import main is never run\"\n\
end\n";

fn run_main(dir: &TempDir, source: &str) -> Output {
    let path = dir.path().join("main.box");
    std::fs::write(&path, source).unwrap();
    Command::new(env!("CARGO_BIN_EXE_box"))
        .arg(&path)
        .current_dir(dir.path())
        .output()
        .expect("failed to run box")
}

fn with_util(source: &str) -> Output {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("util.box"), UTIL).unwrap();
    run_main(&dir, source)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn qualified_function_call() {
    let out = with_util("import util.box\n[main]\nutil.greet \"box\"\nend");
    assert_eq!(stdout(&out), "hello, box\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn imported_main_is_discarded() {
    let out = with_util("import util.box\n[main]\necho \"only this\"\nend");
    assert_eq!(stdout(&out), "only this\n");
}

#[test]
fn namespaced_data_lookup() {
    let out = with_util("import util.box\n[main]\necho \"${util.info.name} ${util.info.version}\"\nend");
    assert_eq!(stdout(&out), "utils 2.0\n");
}

#[test]
fn imported_function_sees_its_own_data() {
    let out = with_util("import util.box\n[main]\nutil.describe\nend");
    assert_eq!(stdout(&out), "utils v2.0\n");
}

#[test]
fn imported_function_calls_sibling_unqualified() {
    let out = with_util("import util.box\n[main]\nutil.outer\nend");
    assert_eq!(stdout(&out), "helped\n");
}

#[test]
fn import_extension_may_be_omitted() {
    let out = with_util("import util\n[main]\nutil.greet \"short\"\nend");
    assert_eq!(stdout(&out), "hello, short\n");
}

#[test]
fn reimporting_same_path_is_a_noop() {
    let out = with_util("import util.box\nimport util.box\n[main]\nutil.greet \"twice\"\nend");
    assert_eq!(stdout(&out), "hello, twice\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn namespace_collision_with_local_function() {
    let out = with_util("import util.box\n[fn util]\nend\n[main]\nend");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("collides"), "stderr: {}", stderr(&out));
}

#[test]
fn missing_import_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let out = run_main(&dir, "import nothing.box\n[main]\nend");
    assert_eq!(out.status.code(), Some(1));
    assert!(
        stderr(&out).contains("failed to import"),
        "stderr: {}",
        stderr(&out)
    );
}

#[test]
fn unknown_namespace_function_is_an_error() {
    let out = with_util("import util.box\n[main]\nutil.missing\nend");
    assert_eq!(out.status.code(), Some(1));
    assert!(
        stderr(&out).contains("not found in namespace"),
        "stderr: {}",
        stderr(&out)
    );
}

#[test]
fn imports_resolve_relative_to_the_importing_file() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("lib")).unwrap();
    std::fs::write(
        dir.path().join("lib/deep.box"),
        "[fn ping]\necho \"pong\"\nend\n",
    )
    .unwrap();
    // The main script lives in a subdirectory; its import path is relative
    // to that subdirectory, not the process working directory.
    std::fs::create_dir(dir.path().join("app")).unwrap();
    std::fs::write(
        dir.path().join("app/main.box"),
        "import ../lib/deep.box\n[main]\ndeep.ping\nend\n",
    )
    .unwrap();
    let out = Command::new(env!("CARGO_BIN_EXE_box"))
        .arg(dir.path().join("app/main.box"))
        .current_dir(dir.path())
        .output()
        .expect("failed to run box");
    assert_eq!(stdout(&out), "pong\n");
}

#[test]
fn namespaces_form_a_flat_root_table() {
    // An imported file may itself import; cross-namespace calls still
    // resolve against the root import table, so the main script names both.
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("inner.box"),
        "[fn core]\necho \"from inner\"\nend\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("middle.box"),
        "import inner.box\n[fn relay]\ninner.core\nend\n",
    )
    .unwrap();
    let out = run_main(
        &dir,
        "import middle.box\nimport inner.box\n[main]\nmiddle.relay\nend",
    );
    assert_eq!(stdout(&out), "from inner\n");
}
