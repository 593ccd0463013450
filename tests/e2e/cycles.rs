//! Tests for cycle detection.

use crate::*;

#[test]
fn two_node_cycle_names_both_edges() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: b;\nb: a;\n")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "cyclic dependency");
    assert_stderr_contains(&out, "'a' depends on 'b'");
    assert_stderr_contains(&out, "'b' depends on 'a'");
    Ok(())
}

#[test]
fn self_loop() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: a { touch a }\n")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "target must not depend on itself");
    Ok(())
}

#[test]
fn strong_cycle_compares_rules_not_targets() -> anyhow::Result<()> {
    // 'ab' and 'aby' are different targets, but both instantiate the same
    // parametrized rule, which counts as a cycle.
    let space = TestSpace::new()?;
    space.write("main.s2", "a$X: a${X}y { touch a$X }\n")?;
    let out = space.run(&mut s2_command(vec!["ab"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "match the same rule");
    Ok(())
}

#[test]
fn longer_cycle() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: b;\nb: c;\nc: a;\n")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "cyclic dependency");
    assert_stderr_contains(&out, "'c' depends on 'a'");
    Ok(())
}

#[test]
fn cycle_through_dynamic_dependency() -> anyhow::Result<()> {
    // A's dependency list names A itself.
    let space = TestSpace::new()?;
    space.write("main.s2", "A: [deps] { touch A }\n")?;
    space.write("deps", "A\n")?;
    let out = space.run(&mut s2_command(vec!["A"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "depends on");
    Ok(())
}
