//! Integration tests for running commands: pipelines, redirections,
//! builtins, control flow and background jobs.
//!
//! Every test forks or swaps the process's standard descriptors, so they
//! all run serially.

#[path = "common/mod.rs"]
mod common;
use common::{capture, path_str, run, CommandResult, Shell};

use serial_test::serial;
use std::fs;

fn three_files() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.txt", "b.txt", "c.log"] {
        fs::write(dir.path().join(name), name).unwrap();
    }
    dir
}

#[test]
#[serial]
fn test_three_stage_pipeline() {
    let files = three_files();
    let out = tempfile::tempdir().unwrap();
    let mut shell = Shell::new();
    let line = format!("ls {} | sort | wc -l", path_str(files.path()));
    let (result, text) = capture(&mut shell, out.path(), &line);
    assert_eq!(result, CommandResult::SuccessContinue);
    assert_eq!(text.trim(), "3");
}

#[test]
#[serial]
fn test_ls_sort_wc_succeeds() {
    let out = tempfile::tempdir().unwrap();
    let mut shell = Shell::new();
    let (result, text) = capture(&mut shell, out.path(), "ls | sort | wc -c");
    assert_eq!(result, CommandResult::SuccessContinue);
    assert!(text.trim().parse::<u64>().is_ok());
}

#[test]
#[serial]
fn test_builtin_feeds_pipeline() {
    let out = tempfile::tempdir().unwrap();
    let mut shell = Shell::new();
    let (result, text) = capture(&mut shell, out.path(), "echo hello | wc -c");
    assert_eq!(result, CommandResult::SuccessContinue);
    assert_eq!(text.trim(), "6");
}

#[test]
#[serial]
fn test_output_redirect_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("out.txt");
    fs::write(&file, "old contents that are longer\n").unwrap();
    let result = run(&format!("echo hi > {}", path_str(&file)));
    assert_eq!(result, CommandResult::SuccessContinue);
    assert_eq!(fs::read_to_string(&file).unwrap(), "hi\n");
}

#[test]
#[serial]
fn test_output_redirect_appends() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("log.txt");
    let mut shell = Shell::new();
    for word in ["one", "two"] {
        shell
            .run_line(&format!("echo {} >> {}", word, path_str(&file)))
            .unwrap();
    }
    assert_eq!(fs::read_to_string(&file).unwrap(), "one\ntwo\n");
}

#[test]
#[serial]
fn test_external_output_redirect() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("listing.txt");
    fs::write(dir.path().join("marker"), "").unwrap();
    let result = run(&format!("ls {} > {}", path_str(dir.path()), path_str(&file)));
    assert_eq!(result, CommandResult::SuccessContinue);
    assert!(fs::read_to_string(&file).unwrap().contains("marker"));
}

#[test]
#[serial]
fn test_input_redirect() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("in.txt");
    fs::write(&file, "hello world\n").unwrap();
    assert_eq!(
        run(&format!("grep -q hello < {}", path_str(&file))),
        CommandResult::SuccessContinue
    );
    assert_eq!(
        run(&format!("grep -q absent < {}", path_str(&file))),
        CommandResult::Failed(1)
    );
}

#[test]
#[serial]
fn test_stderr_redirects() {
    let dir = tempfile::tempdir().unwrap();
    let err = dir.path().join("err.txt");
    let both = dir.path().join("both.txt");
    let missing = dir.path().join("missing");

    let result = run(&format!("ls {} 2> {}", path_str(&missing), path_str(&err)));
    assert!(matches!(result, CommandResult::Failed(_)));
    assert!(!fs::read_to_string(&err).unwrap().is_empty());

    run(&format!("ls {} &> {}", path_str(&missing), path_str(&both)));
    assert!(!fs::read_to_string(&both).unwrap().is_empty());
}

#[test]
#[serial]
fn test_redirect_to_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("no-such-dir").join("out.txt");
    let result = run(&format!("echo hi > {}", path_str(&target)));
    assert_eq!(result, CommandResult::FailedContinue);
}

#[test]
#[serial]
fn test_input_and_output_redirects_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    fs::write(&input, "x").unwrap();
    let line = format!(
        "cat < {} > {}",
        path_str(&input),
        path_str(&dir.path().join("out.txt"))
    );
    assert_eq!(run(&line), CommandResult::SyntaxError);
}

#[test]
#[serial]
fn test_command_not_found() {
    assert_eq!(
        run("opsh-definitely-not-a-command --flag"),
        CommandResult::CommandNotFound
    );
}

#[test]
#[serial]
fn test_exit_status_is_reported() {
    assert_eq!(run("sh -c 'exit 3'"), CommandResult::Failed(3));
    assert_eq!(run("sh -c 'exit 0'"), CommandResult::SuccessContinue);
}

#[test]
#[serial]
fn test_and_or_short_circuit() {
    let dir = tempfile::tempdir().unwrap();
    let skipped = dir.path().join("skipped");
    let made = dir.path().join("made");
    let fallback = dir.path().join("fallback");
    let mut shell = Shell::new();

    shell
        .run_line(&format!("false && touch {}", path_str(&skipped)))
        .unwrap();
    shell
        .run_line(&format!("true && touch {}", path_str(&made)))
        .unwrap();
    shell
        .run_line(&format!("false || touch {}", path_str(&fallback)))
        .unwrap();

    assert!(!skipped.exists());
    assert!(made.exists());
    assert!(fallback.exists());
}

#[test]
#[serial]
fn test_separator_runs_every_command() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    let result = run(&format!(
        "false; touch {}; touch {}",
        path_str(&first),
        path_str(&second)
    ));
    assert_eq!(result, CommandResult::SuccessContinue);
    assert!(first.exists() && second.exists());
}

#[test]
#[serial]
fn test_leading_assignment_binds_and_expands() {
    let out = tempfile::tempdir().unwrap();
    let mut shell = Shell::new();
    let (_, text) = capture(&mut shell, out.path(), "VAR=5 echo $VAR");
    assert_eq!(text, "5\n");
    assert_eq!(shell.state.vars.get("VAR"), Some("5"));

    let (_, text) = capture(&mut shell, out.path(), "echo VAR=7");
    assert_eq!(text, "VAR=7\n");
    assert_eq!(shell.state.vars.get("VAR"), Some("5"));
}

#[test]
#[serial]
fn test_value_with_apostrophe_expands() {
    let out = tempfile::tempdir().unwrap();
    let mut shell = Shell::new();
    shell.run_line("MSG=\"don't panic\"").unwrap();
    let (result, text) = capture(&mut shell, out.path(), "echo $MSG");
    assert_eq!(result, CommandResult::SuccessContinue);
    assert_eq!(text, "don't panic\n");
}

#[test]
#[serial]
fn test_value_with_hash_is_not_a_comment() {
    let out = tempfile::tempdir().unwrap();
    let mut shell = Shell::new();
    shell.run_line("TAG=\"issue #42 open\"").unwrap();
    let (result, text) = capture(&mut shell, out.path(), "echo $TAG done");
    assert_eq!(result, CommandResult::SuccessContinue);
    assert_eq!(text, "issue #42 open done\n");
}

#[test]
#[serial]
fn test_if_else_runs_one_branch() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("branch.txt");
    let f = path_str(&file);
    let mut shell = Shell::new();

    shell
        .run_line(&format!(
            "if [ 1 -eq 1 ]; then echo yes > {f}; else echo no > {f}; fi"
        ))
        .unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "yes\n");

    shell
        .run_line(&format!(
            "if [ 1 -gt 2 ]; then echo yes > {f}; else echo no > {f}; fi"
        ))
        .unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "no\n");
}

#[test]
#[serial]
fn test_elif_chain() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("branch.txt");
    let f = path_str(&file);
    let result = run(&format!(
        "if [ 3 -lt 1 ]; then echo a > {f}; elif [ 3 -le 3 ]; then echo b > {f}; else echo c > {f}; fi"
    ));
    assert_eq!(result, CommandResult::SuccessContinue);
    assert_eq!(fs::read_to_string(&file).unwrap(), "b\n");
}

#[test]
#[serial]
fn test_alias_replaces_first_word() {
    let out = tempfile::tempdir().unwrap();
    let mut shell = Shell::new();
    shell.run_line("alias greet=echo").unwrap();
    let (_, text) = capture(&mut shell, out.path(), "greet hi");
    assert_eq!(text, "hi\n");
}

#[test]
#[serial]
fn test_export_reaches_children() {
    let out = tempfile::tempdir().unwrap();
    let mut shell = Shell::new();
    shell.run_line("export OPSH_VM_EXPORT=visible").unwrap();
    let (_, text) = capture(&mut shell, out.path(), "printenv OPSH_VM_EXPORT");
    assert_eq!(text, "visible\n");
    shell.run_line("unset OPSH_VM_EXPORT").unwrap();
}

#[test]
#[serial]
fn test_glob_expands_to_matches() {
    let files = three_files();
    let out = tempfile::tempdir().unwrap();
    let mut shell = Shell::new();
    let line = format!("ls {}/*.txt", path_str(files.path()));
    let (result, text) = capture(&mut shell, out.path(), &line);
    assert_eq!(result, CommandResult::SuccessContinue);
    assert!(text.contains("a.txt"));
    assert!(text.contains("b.txt"));
    assert!(!text.contains("c.log"));
}

#[test]
#[serial]
fn test_math_folds() {
    let out = tempfile::tempdir().unwrap();
    let mut shell = Shell::new();
    let (_, text) = capture(&mut shell, out.path(), "echo $( 2 + 3 * 4 )");
    assert_eq!(text, "14\n");
}

#[test]
#[serial]
fn test_cd_and_back() {
    let start = std::env::current_dir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().canonicalize().unwrap();
    let mut shell = Shell::new();

    let result = shell
        .run_line(&format!("cd {}", path_str(&target)))
        .unwrap();
    assert_eq!(result, CommandResult::SuccessContinue);
    assert_eq!(std::env::current_dir().unwrap(), target);
    assert_eq!(std::env::var("PWD").unwrap(), path_str(&target));

    let out = tempfile::tempdir().unwrap();
    capture(&mut shell, out.path(), "cd -");
    assert_eq!(std::env::current_dir().unwrap(), start);

    assert_eq!(
        shell.run_line("cd /opsh/no/such/dir").unwrap(),
        CommandResult::FailedContinue
    );
    std::env::set_current_dir(start).unwrap();
}

#[test]
#[serial]
fn test_background_job_is_recorded_and_reaped() {
    let mut shell = Shell::new();
    let result = shell.run_line("sleep 0 &").unwrap();
    assert!(matches!(result, CommandResult::Background { job: 1, .. }));
    assert_eq!(shell.state.jobs.len(), 1);

    std::thread::sleep(std::time::Duration::from_millis(300));
    shell.run_line("true").unwrap();
    assert!(shell.state.jobs.is_empty());
}

#[test]
#[serial]
fn test_exit_stops_the_line() {
    let dir = tempfile::tempdir().unwrap();
    let after = dir.path().join("after");
    let result = run(&format!("exit; touch {}", path_str(&after)));
    assert_eq!(result, CommandResult::Exit);
    assert!(!after.exists());
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_pipelines_do_not_leak_descriptors() {
    let mut shell = Shell::new();
    shell.run_line("ls | sort | wc -c > /dev/null").unwrap();
    let before = common::open_fds();
    for line in [
        "ls | sort | wc -c > /dev/null",
        "echo a | cat | cat | cat | wc -l > /dev/null",
        "echo hi > /dev/null",
        "opsh-definitely-not-a-command | wc -c > /dev/null",
    ] {
        shell.run_line(line).unwrap();
    }
    assert_eq!(common::open_fds(), before);
}
