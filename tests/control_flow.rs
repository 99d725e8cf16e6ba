//! Control structures and function calls: if/else, for, while, break,
//! continue, return, argument binding, and `-i` dispatch.

use std::process::{Command, Output};

use tempfile::TempDir;

fn run_with_args(source: &str, args: &[&str]) -> Output {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("script.box");
    std::fs::write(&path, source).unwrap();
    Command::new(env!("CARGO_BIN_EXE_box"))
        .arg(&path)
        .args(args)
        .current_dir(dir.path())
        .output()
        .expect("failed to run box")
}

fn run_script(source: &str) -> Output {
    run_with_args(source, &[])
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn if_takes_then_branch_on_success() {
    let out = run_script("[main]\nif exists \".\"\n  echo \"current dir exists\"\nend\nend");
    assert_eq!(stdout(&out), "current dir exists\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn if_takes_else_branch_on_failure() {
    let out = run_script(
        "[main]\nif exists \"/nonexistent\"\n  echo \"should not print\"\nelse\n  \
         echo \"in else block\"\nend\nend",
    );
    assert_eq!(stdout(&out), "in else block\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn failing_condition_does_not_halt() {
    let out = run_script("[main]\nif exists \"/nonexistent\"\n  echo hidden\nend\necho after\nend");
    assert_eq!(stdout(&out), "after\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn if_condition_sees_variables() {
    let out = run_script("[main]\nset flag yes\nif test $flag\n  echo \"flag set\"\nend\nend");
    assert_eq!(stdout(&out), "flag set\n");
}

#[test]
fn for_iterates_literal_items() {
    let out = run_script("[main]\nfor i in 1 2 3\n  echo \"item: $i\"\nend\nend");
    assert_eq!(stdout(&out), "item: 1\nitem: 2\nitem: 3\n");
}

#[test]
fn for_iterates_a_list_splat() {
    let out = run_script("[main]\nset xs a b c\nfor x in ${xs[*]}\n  echo $x\nend\nend");
    assert_eq!(stdout(&out), "a\nb\nc\n");
}

#[test]
fn for_with_continue_skips_items() {
    let out = run_script(
        "[main]\nfor x in a skip b\n  if match $x \"skip\"\n    continue\n  end\n  echo $x\nend\nend",
    );
    assert_eq!(stdout(&out), "a\nb\n");
}

#[test]
fn for_with_break_stops_early() {
    let out = run_script(
        "[main]\nfor x in a b c\n  if match $x \"b\"\n    break\n  end\n  echo $x\nend\n\
         echo done\nend",
    );
    assert_eq!(stdout(&out), "a\ndone\n");
}

#[test]
fn while_counts_with_arith() {
    let out = run_script(
        "[main]\nset i 0\nwhile match $i \"[0-2]\"\n  echo $i\n  arith $i \"+\" 1\n  \
         set i $_arith_result\nend\necho \"final: $i\"\nend",
    );
    assert_eq!(stdout(&out), "0\n1\n2\nfinal: 3\n");
}

#[test]
fn while_with_break() {
    let out = run_script(
        "[main]\nset i 0\nwhile exists \".\"\n  if match $i \"3\"\n    break\n  end\n  \
         echo $i\n  arith $i \"+\" 1\n  set i $_arith_result\nend\necho out\nend",
    );
    assert_eq!(stdout(&out), "0\n1\n2\nout\n");
}

#[test]
fn nested_loops_break_only_inner() {
    let out = run_script(
        "[main]\nfor a in 1 2\n  for b in x y\n    if match $b \"y\"\n      break\n    end\n    \
         echo \"$a$b\"\n  end\nend\nend",
    );
    assert_eq!(stdout(&out), "1x\n2x\n");
}

#[test]
fn function_call_with_arguments() {
    let out = run_script("[fn greet name]\necho \"Hello, $name!\"\nend\n[main]\ngreet \"Alice\"\nend");
    assert_eq!(stdout(&out), "Hello, Alice!\n");
}

#[test]
fn function_default_arguments() {
    let out = run_script(
        "[fn hi name=world]\necho \"hello $name\"\nend\n[main]\nhi\nhi box\nend",
    );
    assert_eq!(stdout(&out), "hello world\nhello box\n");
}

#[test]
fn extra_positionals_bind_by_number() {
    let out = run_script("[fn f a]\necho \"$a $2 $3\"\nend\n[main]\nf x y z\nend");
    assert_eq!(stdout(&out), "x y z\n");
}

#[test]
fn return_stops_the_function_only() {
    let out = run_script(
        "[fn f]\necho \"in function\"\nreturn 0\necho \"not printed\"\nend\n\
         [main]\nf\necho \"after function\"\nend",
    );
    assert_eq!(stdout(&out), "in function\nafter function\n");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn nonzero_return_is_visible_in_status() {
    let out = run_script("[fn f]\nreturn 3\nend\n[main]\nf ?\necho $status\nend");
    assert_eq!(stdout(&out), "3\n");
}

#[test]
fn callee_variables_reflect_back() {
    let out = run_script("[fn f]\nset inner 42\nend\n[main]\nf\necho $inner\nend");
    assert_eq!(stdout(&out), "42\n");
}

#[test]
fn splat_argument_supplies_multiple_positionals() {
    let out = run_script(
        "[fn pair a b]\necho \"$a/$b\"\nend\n[main]\nset xs left right\npair ${xs[*]}\nend",
    );
    assert_eq!(stdout(&out), "left/right\n");
}

#[test]
fn interface_function_dispatch() {
    let out = run_with_args(
        "[fn -i build target]\necho \"building $target\"\nend\n[main]\necho \"main ran\"\nend",
        &["build", "web"],
    );
    assert_eq!(stdout(&out), "building web\n");
}

#[test]
fn non_matching_first_arg_runs_main() {
    let out = run_with_args(
        "[fn -i build target]\necho \"building $target\"\nend\n[main]\necho \"main ran\"\nend",
        &["deploy"],
    );
    assert_eq!(stdout(&out), "main ran\n");
}

#[test]
fn exit_propagates_through_functions_and_loops() {
    let out = run_script(
        "[fn f]\nfor i in 1 2 3\n  exit 4\nend\nend\n[main]\nf\necho unreachable\nend",
    );
    assert_eq!(stdout(&out), "");
    assert_eq!(out.status.code(), Some(4));
}

#[test]
fn runaway_recursion_is_reported() {
    let out = run_script("[fn f]\nf\nend\n[main]\nf\nend");
    assert_eq!(out.status.code(), Some(1));
    let err = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(err.contains("call depth exceeded"), "stderr: {err}");
}
