//! End-to-end tests, which run the s2 binary against temp directories.

mod basic;
mod cycles;
mod dynamic;
mod failures;
mod features;

pub fn s2_binary() -> std::path::PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join("s2")
}

pub fn s2_command(args: Vec<&str>) -> std::process::Command {
    let mut cmd = std::process::Command::new(s2_binary());
    cmd.args(args);
    cmd
}

fn print_output(out: &std::process::Output) {
    // Replay both streams through print! so the test framework captures
    // them and only shows them for failing tests.
    print!("{}", String::from_utf8_lossy(&out.stdout));
    print!("{}", String::from_utf8_lossy(&out.stderr));
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let stdout = String::from_utf8_lossy(&out.stdout);
    if !stdout.contains(text) {
        panic!(
            "assertion failed; expected stdout to contain {:?} but got:\n{}",
            text, stdout
        );
    }
}

pub fn assert_output_not_contains(out: &std::process::Output, text: &str) {
    let stdout = String::from_utf8_lossy(&out.stdout);
    if stdout.contains(text) {
        panic!(
            "assertion failed; expected stdout to not contain {:?} but got:\n{}",
            text, stdout
        );
    }
}

pub fn assert_stderr_contains(out: &std::process::Output, text: &str) {
    let stderr = String::from_utf8_lossy(&out.stderr);
    if !stderr.contains(text) {
        panic!(
            "assertion failed; expected stderr to contain {:?} but got:\n{}",
            text, stderr
        );
    }
}

/// A scratch directory holding a rule file, its sources and its targets;
/// each test drives the s2 binary inside one and asserts on the files and
/// output left behind.
pub struct TestSpace {
    dir: tempfile::TempDir,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    /// Write a rule file or source file into the space.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.dir.path().join(path), content)
    }

    /// Read a built target (or any other file) back out.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.dir.path().join(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.dir.path().join(path).exists()
    }

    pub fn remove(&self, path: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.dir.path().join(path))
    }

    /// Set a file's mtime via touch -d, so timestamp ordering between
    /// files is explicit rather than racing the clock.
    pub fn set_mtime(&self, path: &str, date: &str) -> anyhow::Result<()> {
        let status = std::process::Command::new("touch")
            .args(["-d", date, path])
            .current_dir(self.dir.path())
            .status()?;
        anyhow::ensure!(status.success(), "touch failed");
        Ok(())
    }

    /// Invoke s2 with the space as its working directory, returning the
    /// process output.  The exit status is the engine's error bits.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, for scenarios where the build must succeed: a nonzero
    /// exit fails the test and replays the build's output.
    pub fn run_expect(
        &self,
        cmd: &mut std::process::Command,
    ) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("build failed, status {}", out.status);
        }
        Ok(out)
    }

    /// Keep the directory on disk and abort, so a failing scenario can be
    /// poked at by hand with the s2 binary.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}
