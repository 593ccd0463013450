//! Tests for dynamic dependencies.

use crate::*;

#[test]
fn dynamic_list_builds_named_targets_first() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "A: [deps] { cat $(cat deps) > A }\n\
         x: { echo built-x; echo 1 > x }\n\
         y: { echo built-y; echo 2 > y }\n",
    )?;
    space.write("deps", "x y\n")?;

    let out = space.run_expect(&mut s2_command(vec!["A"]))?;
    assert_output_contains(&out, "built-x");
    assert_output_contains(&out, "built-y");
    assert_eq!(space.read("A")?, b"1\n2\n");

    // Narrow the list to x and make x newer than A: A is rebuilt from x
    // alone, and y is not rebuilt.
    space.write("deps", "x\n")?;
    space.set_mtime("A", "2020-01-01")?;
    space.set_mtime("x", "2020-06-01")?;
    let out = space.run_expect(&mut s2_command(vec!["A"]))?;
    assert_output_not_contains(&out, "built-y");
    assert_output_not_contains(&out, "built-x");
    assert_eq!(space.read("A")?, b"1\n");

    Ok(())
}

#[test]
fn dynamic_list_is_built_by_its_own_rule() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "A: [deps] { cat $(cat deps) > A }\n\
         deps = { x }\n\
         x = { 1 }\n",
    )?;
    space.run_expect(&mut s2_command(vec!["A"]))?;
    assert_eq!(space.read("A")?, b"1\n");
    Ok(())
}

#[test]
fn newline_separated_list() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "A: -n [deps] { cat $(cat deps) > A }\n\
         x = { 1 }\n\
         y = { 2 }\n",
    )?;
    // In -n mode the names are taken verbatim, one per line, no markup.
    space.write("deps", "x\ny\n")?;
    space.run_expect(&mut s2_command(vec!["A"]))?;
    assert_eq!(space.read("A")?, b"1\n2\n");
    Ok(())
}

#[test]
fn flags_inside_the_list_apply() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "A: [deps] { touch A }\n")?;
    // An optional dependency that is absent is fine.
    space.write("deps", "?missing\n")?;
    space.run_expect(&mut s2_command(vec!["A"]))?;
    assert!(space.exists("A"));
    Ok(())
}

#[test]
fn doubly_dynamic_dependency() -> anyhow::Result<()> {
    // meta lists the name of a list file, which lists the dependencies.
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "A: [[meta]] { cat x > A }\n\
         x = { 1 }\n",
    )?;
    space.write("meta", "lst\n")?;
    space.write("lst", "x\n")?;
    space.run_expect(&mut s2_command(vec!["A"]))?;
    assert_eq!(space.read("A")?, b"1\n");
    Ok(())
}

#[test]
fn parse_error_in_list_is_logical() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "A: [deps] { touch A }\n")?;
    space.write("deps", "[unclosed\n")?;
    let out = space.run(&mut s2_command(vec!["A"]))?;
    assert_eq!(out.status.code(), Some(2));
    Ok(())
}

#[test]
fn parametrized_names_in_list_are_rejected() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "A: [deps] { touch A }\n")?;
    space.write("deps", "$X.o\n")?;
    let out = space.run(&mut s2_command(vec!["A"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "must not contain parametrized dependencies");
    Ok(())
}

#[test]
fn input_redirection_in_list_is_rejected() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "A: [deps] { touch A }\n")?;
    space.write("deps", "<x\n")?;
    space.write("x", "")?;
    let out = space.run(&mut s2_command(vec!["A"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "must not contain input redirection");
    Ok(())
}

#[test]
fn variable_dependency_under_double_dynamic_is_rejected() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "A: [[meta]] { touch A }\n")?;
    space.write("meta", "$[v]\n")?;
    space.write("v", "1\n")?;
    let out = space.run(&mut s2_command(vec!["A"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "must not appear");
    Ok(())
}

#[test]
fn variable_in_single_dynamic_is_allowed() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", ">A: [deps] { printf '%s' \"$v\" }\n")?;
    space.write("deps", "$[v]\n")?;
    space.write("v", "hello\n")?;
    space.run_expect(&mut s2_command(vec!["A"]))?;
    assert_eq!(space.read("A")?, b"hello");
    Ok(())
}

#[test]
fn optional_dynamic_list_missing_is_fine() -> anyhow::Result<()> {
    // The optional flag is written inside the brackets: it belongs to the
    // list file itself, at its own nesting level.
    let space = TestSpace::new()?;
    space.write("main.s2", "A: [?deps] { touch A }\n")?;
    let out = space.run(&mut s2_command(vec!["A"]))?;
    assert_eq!(out.status.code(), Some(0));
    assert!(space.exists("A"));
    Ok(())
}
