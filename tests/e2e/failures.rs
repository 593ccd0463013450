//! Tests for failure handling and cleanup.

use crate::*;

#[test]
fn failed_command_removes_its_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: { echo partial > a; false }\n")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_stderr_contains(&out, "command for 'a' failed with exit code 1");
    assert_stderr_contains(&out, "Removing file 'a' because command failed");
    assert!(!space.exists("a"));
    Ok(())
}

#[test]
fn keep_partial_keeps_the_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: { echo partial > a; false }\n")?;
    let out = space.run(&mut s2_command(vec!["-K", "a"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert!(space.exists("a"));
    Ok(())
}

#[test]
fn untouched_output_is_not_removed() -> anyhow::Result<()> {
    // The file predates the command and the command never wrote it, so it
    // survives the failure.
    let space = TestSpace::new()?;
    space.write("main.s2", "a: b { false }\n")?;
    space.write("a", "old\n")?;
    space.write("b", "")?;
    space.set_mtime("a", "2020-01-01")?;
    space.set_mtime("b", "2020-06-01")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(space.read("a")?, b"old\n");
    Ok(())
}

#[test]
fn keep_going_attempts_independent_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "x: { false }\ny: { touch y }\n")?;
    let out = space.run(&mut s2_command(vec!["-k", "x", "y"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert!(space.exists("y"));
    assert!(!space.exists("x"));
    assert_stderr_contains(&out, "Targets not rebuilt because of errors");
    Ok(())
}

#[test]
fn without_keep_going_the_first_failure_stops() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "x: { false }\ny: { touch y }\n")?;
    let out = space.run(&mut s2_command(vec!["x", "y"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert!(!space.exists("y"));
    Ok(())
}

#[test]
fn keep_going_combines_build_and_logical_errors() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: b;\nb: a;\nx: { false }\n")?;
    let out = space.run(&mut s2_command(vec!["-k", "a", "x"]))?;
    assert_eq!(out.status.code(), Some(3));
    Ok(())
}

#[test]
fn optional_missing_dependency_is_fine() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: ?b { touch a }\n")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(0));
    assert!(space.exists("a"));
    Ok(())
}

#[test]
fn missing_dependency_without_rule() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: b { touch a }\n")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_stderr_contains(&out, "no rule to build 'b'");
    assert_stderr_contains(&out, "'b' is needed by 'a'");
    Ok(())
}

#[test]
fn question_mode() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: { touch a }\n")?;

    let out = space.run(&mut s2_command(vec!["-q", "a"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "Targets are not up to date");
    assert!(!space.exists("a"));

    space.run_expect(&mut s2_command(vec!["a"]))?;
    let out = space.run(&mut s2_command(vec!["-q", "a"]))?;
    assert_eq!(out.status.code(), Some(0));
    Ok(())
}

#[test]
fn command_that_does_not_build_its_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: { true }\n")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_stderr_contains(&out, "file 'a' was not built by command");
    Ok(())
}

#[test]
fn file_without_command_and_without_dependencies() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: ;\n")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_stderr_contains(
        &out,
        "file without command and without dependencies 'a' does not exist",
    );
    Ok(())
}

#[test]
fn file_without_command_with_up_to_date_dependencies() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: b;\n")?;
    space.write("b", "")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_stderr_contains(
        &out,
        "file without command 'a' does not exist, although all its dependencies are up to date",
    );
    Ok(())
}

#[test]
fn grouping_rule_older_than_dependency_warns_only() -> anyhow::Result<()> {
    // A command-less rule is a logical grouping: an out-of-date target is
    // worth a warning but no error.
    let space = TestSpace::new()?;
    space.write("main.s2", "a: b;\n")?;
    space.write("a", "")?;
    space.write("b", "")?;
    space.set_mtime("a", "2020-01-01")?;
    space.set_mtime("b", "2020-06-01")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(0));
    assert_stderr_contains(&out, "which has no command is older than its dependency");
    Ok(())
}

#[test]
fn future_timestamp_warns() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: b { touch a }\n")?;
    space.write("b", "")?;
    space.set_mtime("b", "+1 hour")?;
    let out = space.run_expect(&mut s2_command(vec!["a"]))?;
    assert_stderr_contains(&out, "has modification time in the future");
    assert!(space.exists("a"));
    Ok(())
}

#[test]
fn duplicate_rule_is_logical_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: { touch a }\na: { touch a }\n")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "duplicate rule for 'a'");
    assert_stderr_contains(&out, "previous definition");
    Ok(())
}

#[test]
fn ambiguous_parametrized_rules_are_logical_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "a$X: { touch a$X }\n$Xb: { touch $Xb }\n",
    )?;
    let out = space.run(&mut s2_command(vec!["ab"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "Multiple minimal rules for target 'ab'");
    Ok(())
}

#[test]
fn unused_parameter_is_logical_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a$X: b$Y { touch a$X }\n")?;
    let out = space.run(&mut s2_command(vec!["ab"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "parameter $Y is not used");
    Ok(())
}

#[test]
fn parse_error_is_logical_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: { touch a\n")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "while reading command");
    Ok(())
}

#[test]
fn missing_rule_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(1));
    Ok(())
}
