//! Tests for trivial/persistent semantics, parametrized rules, and
//! scheduling options.

use crate::*;

#[test]
fn trivial_dependency_skipped_when_up_to_date() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "a: &t { cat t > a }\nt: { echo built-t; echo T > t }\n",
    )?;
    space.write("a", "old\n")?;

    // a is up to date, so the trivial dependency is never considered.
    let out = space.run_expect(&mut s2_command(vec!["a"]))?;
    assert_output_contains(&out, "Nothing to be done");
    assert_output_not_contains(&out, "built-t");
    assert!(!space.exists("t"));
    Ok(())
}

#[test]
fn trivial_dependency_built_in_second_pass() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "a: &t { cat t > a }\nt: { echo built-t; echo T > t }\n",
    )?;

    // a does not exist: the rebuild is committed, so the second pass
    // builds t before the command runs.
    let out = space.run_expect(&mut s2_command(vec!["a"]))?;
    assert_output_contains(&out, "built-t");
    assert_eq!(space.read("a")?, b"T\n");
    Ok(())
}

#[test]
fn trivial_is_carried_over_transient_targets() -> anyhow::Result<()> {
    // The trivial flag on the edge to @group is transitive: it applies to
    // the transient's own dependency c.  Once the rebuild of a is
    // committed, the second pass re-enters the whole subtree.
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "a: &@group { cat c > a }\n\
         @group: c;\n\
         c: { echo built-c; echo C > c }\n",
    )?;

    space.write("a", "old\n")?;
    let out = space.run_expect(&mut s2_command(vec!["a"]))?;
    assert_output_contains(&out, "Nothing to be done");
    assert_output_not_contains(&out, "built-c");

    space.remove("a")?;
    let out = space.run_expect(&mut s2_command(vec!["a"]))?;
    assert_output_contains(&out, "built-c");
    assert_eq!(space.read("a")?, b"C\n");
    Ok(())
}

#[test]
fn persistent_dependency_does_not_force_rebuild() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: -p b { touch a }\n")?;
    space.write("a", "")?;
    space.write("b", "")?;
    space.set_mtime("a", "2020-01-01")?;
    space.set_mtime("b", "2020-06-01")?;

    let out = space.run_expect(&mut s2_command(vec!["a"]))?;
    assert_output_contains(&out, "Nothing to be done");
    Ok(())
}

#[test]
fn existence_sugar_behaves_like_persistent() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: !b { touch a }\n")?;
    space.write("a", "")?;
    space.write("b", "")?;
    space.set_mtime("a", "2020-01-01")?;
    space.set_mtime("b", "2020-06-01")?;

    let out = space.run_expect(&mut s2_command(vec!["a"]))?;
    assert_output_contains(&out, "Nothing to be done");

    // But a missing target is still built.
    space.write("main.s2", "c: !b { touch c }\n")?;
    space.run_expect(&mut s2_command(vec!["c"]))?;
    assert!(space.exists("c"));
    Ok(())
}

#[test]
fn existence_and_optional_clash() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: !?b { touch a }\n")?;
    space.write("b", "")?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_stderr_contains(&out, "clashes with declaration of optional dependency");
    Ok(())
}

#[test]
fn parametrized_rule_builds_and_exports_parameters() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "$X.out: $X.in { cp \"$X.in\" \"$X.out\" }\n")?;
    space.write("foo.in", "payload\n")?;
    let out = space.run_expect(&mut s2_command(vec!["foo.out"]))?;
    // The parameter binding is echoed before the command.
    assert_output_contains(&out, "X=foo");
    assert_eq!(space.read("foo.out")?, b"payload\n");
    Ok(())
}

#[test]
fn most_specific_rule_wins() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "$X: { echo generic > $X }\n$X.o: { echo object > $X.o }\n",
    )?;
    space.run_expect(&mut s2_command(vec!["foo.o"]))?;
    assert_eq!(space.read("foo.o")?, b"object\n");
    Ok(())
}

#[test]
fn parallel_jobs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "@all: x y z;\n\
         x: { touch x }\n\
         y: { touch y }\n\
         z: { touch z }\n",
    )?;
    space.run_expect(&mut s2_command(vec!["-j", "3", "@all"]))?;
    assert!(space.exists("x"));
    assert!(space.exists("y"));
    assert!(space.exists("z"));
    Ok(())
}

#[test]
fn random_order_with_seed() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "@all: x y;\nx: { touch x }\ny: { touch y }\n",
    )?;
    space.run_expect(&mut s2_command(vec!["-M", "7", "@all"]))?;
    assert!(space.exists("x"));
    assert!(space.exists("y"));
    Ok(())
}

#[test]
fn dependency_groups_flatten() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "a: (b c) { cat b c > a }\nb = { 1 }\nc = { 2 }\n",
    )?;
    space.run_expect(&mut s2_command(vec!["a"]))?;
    assert_eq!(space.read("a")?, b"1\n2\n");
    Ok(())
}

#[test]
fn transient_passes_attributes_to_its_dependencies() -> anyhow::Result<()> {
    // An optional edge to a transient makes the transient's own missing
    // file dependencies optional as well.
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "a: ?@group { touch a }\n@group: missing;\n",
    )?;
    let out = space.run(&mut s2_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(0));
    assert!(space.exists("a"));
    Ok(())
}
