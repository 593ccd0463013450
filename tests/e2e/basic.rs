use crate::*;

#[test]
fn build_then_up_to_date_then_rebuild() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: b { touch a }\n")?;
    space.write("b", "")?;
    space.set_mtime("b", "2020-01-01")?;

    // First run creates a.
    let out = space.run_expect(&mut s2_command(vec!["a"]))?;
    assert_output_contains(&out, "touch a");
    assert!(space.exists("a"));

    // Second run has nothing to do.
    let out = space.run_expect(&mut s2_command(vec!["a"]))?;
    assert_output_contains(&out, "Nothing to be done");

    // Making b newer than a forces a rebuild.
    space.set_mtime("a", "2020-01-01")?;
    space.set_mtime("b", "2020-06-01")?;
    let out = space.run_expect(&mut s2_command(vec!["a"]))?;
    assert_output_contains(&out, "touch a");

    Ok(())
}

#[test]
fn default_target_is_the_first_rule() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: { touch a }\nb: { touch b }\n")?;
    space.run_expect(&mut s2_command(vec![]))?;
    assert!(space.exists("a"));
    assert!(!space.exists("b"));
    Ok(())
}

#[test]
fn specify_rule_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("other.s2", "a: { touch a }\n")?;
    space.run_expect(&mut s2_command(vec!["-f", "other.s2", "a"]))?;
    assert!(space.exists("a"));
    Ok(())
}

#[test]
fn multi_target_rule_builds_both() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a b: { touch a b }\n")?;
    space.run_expect(&mut s2_command(vec!["a"]))?;
    assert!(space.exists("a"));
    assert!(space.exists("b"));

    // Requesting the sibling afterwards is a no-op.
    let out = space.run_expect(&mut s2_command(vec!["b"]))?;
    assert_output_contains(&out, "Nothing to be done");
    Ok(())
}

#[test]
fn hardcoded_content() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "version = { 1.2 }\n")?;
    let out = space.run_expect(&mut s2_command(vec!["version"]))?;
    assert_output_contains(&out, "Creating version");
    assert_eq!(space.read("version")?, b"1.2\n");
    Ok(())
}

#[test]
fn copy_rule() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "conf = 'conf.default';\n")?;
    space.write("conf.default", "option=1\n")?;
    let out = space.run_expect(&mut s2_command(vec!["conf"]))?;
    assert_output_contains(&out, "cp conf.default conf");
    assert_eq!(space.read("conf")?, b"option=1\n");
    Ok(())
}

#[test]
fn output_redirection() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", ">out: in { cat in }\n")?;
    space.write("in", "hello\n")?;
    space.run_expect(&mut s2_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"hello\n");
    Ok(())
}

#[test]
fn input_redirection() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", ">out: <in { sort }\n")?;
    space.write("in", "b\na\n")?;
    space.run_expect(&mut s2_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"a\nb\n");
    Ok(())
}

#[test]
fn variable_dependency_round_trip() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "out: $[greeting] { printf '%s' \"$greeting\" > out }\n")?;
    // Whitespace around the content is trimmed.
    space.write("greeting", "  hello world \n")?;
    space.run_expect(&mut s2_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"hello world");
    Ok(())
}

#[test]
fn variable_dependency_with_explicit_name() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "out: $[V=greeting] { printf '%s' \"$V\" > out }\n")?;
    space.write("greeting", "hi\n")?;
    space.run_expect(&mut s2_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"hi");
    Ok(())
}

#[test]
fn transient_target_groups_work() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "main.s2",
        "@all: a b;\na: { touch a }\nb: { touch b }\n",
    )?;
    space.run_expect(&mut s2_command(vec!["@all"]))?;
    assert!(space.exists("a"));
    assert!(space.exists("b"));

    let out = space.run_expect(&mut s2_command(vec!["@all"]))?;
    assert_output_contains(&out, "Nothing to be done");
    Ok(())
}

#[test]
fn transient_with_command_reruns_every_invocation() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "@t: { echo ran-t }\n")?;
    let out = space.run_expect(&mut s2_command(vec!["@t"]))?;
    assert_output_contains(&out, "ran-t");
    // Within an invocation it runs at most once, but a fresh process has
    // no memory of it.
    let out = space.run_expect(&mut s2_command(vec!["@t"]))?;
    assert_output_contains(&out, "ran-t");
    Ok(())
}

#[test]
fn source_file_without_rule_is_reported() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: { touch a }\n")?;
    space.write("src", "")?;
    let out = space.run_expect(&mut s2_command(vec!["src"]))?;
    assert_output_contains(&out, "No rule for building 'src', but the file exists");
    Ok(())
}

#[test]
fn silent_suppresses_command_echo() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("main.s2", "a: { touch a }\n")?;
    let out = space.run_expect(&mut s2_command(vec!["-s", "a"]))?;
    assert_output_not_contains(&out, "touch a");
    assert!(space.exists("a"));
    Ok(())
}
