//! Starting and reaping child processes.
//!
//! Commands are spawned with posix_spawn rather than std::process because
//! every child must be placed in its own process group (PGID = PID), so
//! that terminating a job can signal the whole group and reach
//! grandchildren, and because stdout/stdin redirection to the target files
//! happens in the child via spawn file actions.  Commands run under
//! `/bin/sh -c`, with $0 set so shell error messages name the rule file
//! location of the command.

use std::collections::HashMap;
use std::ffi::{CStr, CString};

use anyhow::bail;

use crate::signal;

fn check_posix(func: &str, ret: libc::c_int) -> anyhow::Result<()> {
    if ret != 0 {
        let err_str = unsafe { CStr::from_ptr(libc::strerror(ret)) };
        bail!("{}: {}", func, err_str.to_string_lossy());
    }
    Ok(())
}

/// Wraps libc::posix_spawn_file_actions_t, in particular to implement Drop.
struct PosixSpawnFileActions(libc::posix_spawn_file_actions_t);

impl PosixSpawnFileActions {
    fn new() -> anyhow::Result<Self> {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            check_posix(
                "posix_spawn_file_actions_init",
                libc::posix_spawn_file_actions_init(&mut actions),
            )?;
            Ok(Self(actions))
        }
    }

    fn as_ptr(&mut self) -> *mut libc::posix_spawn_file_actions_t {
        &mut self.0
    }

    fn addopen(
        &mut self,
        fd: i32,
        path: &CStr,
        oflag: libc::c_int,
        mode: libc::mode_t,
    ) -> anyhow::Result<()> {
        unsafe {
            check_posix(
                "posix_spawn_file_actions_addopen",
                libc::posix_spawn_file_actions_addopen(&mut self.0, fd, path.as_ptr(), oflag, mode),
            )
        }
    }
}

impl Drop for PosixSpawnFileActions {
    fn drop(&mut self) {
        unsafe { libc::posix_spawn_file_actions_destroy(&mut self.0) };
    }
}

/// Wraps libc::posix_spawnattr_t, likewise.
struct PosixSpawnAttr(libc::posix_spawnattr_t);

impl PosixSpawnAttr {
    fn new() -> anyhow::Result<Self> {
        unsafe {
            let mut attr: libc::posix_spawnattr_t = std::mem::zeroed();
            check_posix("posix_spawnattr_init", libc::posix_spawnattr_init(&mut attr))?;
            Ok(Self(attr))
        }
    }

    fn as_ptr(&mut self) -> *mut libc::posix_spawnattr_t {
        &mut self.0
    }

    /// Give the child its own process group, with PGID equal to its PID.
    fn set_own_process_group(&mut self) -> anyhow::Result<()> {
        unsafe {
            check_posix(
                "posix_spawnattr_setflags",
                libc::posix_spawnattr_setflags(&mut self.0, libc::POSIX_SPAWN_SETPGROUP as i16),
            )?;
            check_posix(
                "posix_spawnattr_setpgroup",
                libc::posix_spawnattr_setpgroup(&mut self.0, 0),
            )
        }
    }
}

impl Drop for PosixSpawnAttr {
    fn drop(&mut self) {
        unsafe { libc::posix_spawnattr_destroy(&mut self.0) };
    }
}

fn cstring(s: &str) -> anyhow::Result<CString> {
    match CString::new(s) {
        Ok(c) => Ok(c),
        Err(_) => bail!("string contains NUL: {:?}", s),
    }
}

/// The full environment for a child: the parent's, with MAPPING entries
/// overriding.
fn child_env(mapping: &HashMap<String, String>) -> anyhow::Result<Vec<CString>> {
    let mut vars: HashMap<String, String> = std::env::vars().collect();
    for (k, v) in mapping {
        vars.insert(k.clone(), v.clone());
    }
    vars.iter()
        .map(|(k, v)| cstring(&format!("{}={}", k, v)))
        .collect()
}

fn spawn(
    path: &CStr,
    argv: &[&CStr],
    envp: &[CString],
    actions: &mut PosixSpawnFileActions,
) -> anyhow::Result<libc::pid_t> {
    let mut attr = PosixSpawnAttr::new()?;
    attr.set_own_process_group()?;

    let mut argv_ptrs: Vec<*mut libc::c_char> =
        argv.iter().map(|a| a.as_ptr() as *mut _).collect();
    argv_ptrs.push(std::ptr::null_mut());
    let mut envp_ptrs: Vec<*mut libc::c_char> =
        envp.iter().map(|e| e.as_ptr() as *mut _).collect();
    envp_ptrs.push(std::ptr::null_mut());

    let mut pid: libc::pid_t = 0;
    unsafe {
        check_posix(
            "posix_spawn",
            libc::posix_spawn(
                &mut pid,
                path.as_ptr(),
                actions.as_ptr(),
                attr.as_ptr(),
                argv_ptrs.as_ptr(),
                envp_ptrs.as_ptr(),
            ),
        )?;
    }
    Ok(pid)
}

/// The outgoing child process of one execution.
#[derive(Default)]
pub struct Job {
    pid: Option<libc::pid_t>,
}

impl Job {
    /// Whether the job was ever started.
    pub fn started(&self) -> bool {
        self.pid.is_some()
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid.expect("job was not started")
    }

    /// Start `/bin/sh -c COMMAND`.  STDOUT_FILE and STDIN_FILE redirect the
    /// corresponding streams; ARGV0 is passed to the shell as $0.
    pub fn start(
        &mut self,
        command: &str,
        mapping: &HashMap<String, String>,
        stdout_file: Option<&str>,
        stdin_file: Option<&str>,
        argv0: Option<&str>,
    ) -> anyhow::Result<libc::pid_t> {
        assert!(!self.started());

        let mut actions = PosixSpawnFileActions::new()?;
        if let Some(path) = stdout_file {
            actions.addopen(
                1,
                &cstring(path)?,
                libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
                0o666,
            )?;
        }
        if let Some(path) = stdin_file {
            actions.addopen(0, &cstring(path)?, libc::O_RDONLY, 0)?;
        }

        let sh = cstring("/bin/sh")?;
        let dash_c = cstring("-c")?;
        let command = cstring(command)?;
        let argv0 = cstring(argv0.unwrap_or("sh"))?;
        let argv = [
            sh.as_c_str(),
            dash_c.as_c_str(),
            command.as_c_str(),
            argv0.as_c_str(),
        ];

        let envp = child_env(mapping)?;
        let pid = spawn(&sh, &argv, &envp, &mut actions)?;
        self.pid = Some(pid);
        Ok(pid)
    }

    /// Start `cp -- SOURCE TARGET`.
    pub fn start_copy(&mut self, target: &str, source: &str) -> anyhow::Result<libc::pid_t> {
        assert!(!self.started());

        let mut actions = PosixSpawnFileActions::new()?;
        let cp = cstring("/bin/cp")?;
        let dashes = cstring("--")?;
        let source = cstring(source)?;
        let target = cstring(target)?;
        let argv = [
            cp.as_c_str(),
            dashes.as_c_str(),
            source.as_c_str(),
            target.as_c_str(),
        ];

        let envp = child_env(&HashMap::new())?;
        let pid = spawn(&cp, &argv, &envp, &mut actions)?;
        self.pid = Some(pid);
        Ok(pid)
    }
}

/// Block until any child terminates.  Returns None when interrupted by a
/// signal, so the caller can check the interrupt flag.
pub fn wait() -> anyhow::Result<Option<(libc::pid_t, libc::c_int)>> {
    let mut status: libc::c_int = 0;
    let pid = unsafe { libc::wait(&mut status) };
    if pid < 0 {
        let err = std::io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::EINTR) => Ok(None),
            _ => bail!("wait: {}", err),
        };
    }
    Ok(Some((pid, status)))
}

pub fn success(status: libc::c_int) -> bool {
    libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0
}

/// Human-readable description of a failed wait status.
pub fn format_status(status: libc::c_int) -> String {
    if libc::WIFEXITED(status) {
        format!("failed with exit code {}", libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        let sig = libc::WTERMSIG(status);
        let name = unsafe {
            let ptr = libc::strsignal(sig);
            if ptr.is_null() {
                "unknown".to_string()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        };
        format!("received signal {} ({})", sig, name)
    } else {
        // Should not happen, but the standard does not exclude it.
        format!("failed with status code {}", status)
    }
}

/// SIGTERM the process group of PID.  Zombies (ESRCH) are fine: the child
/// terminated but has not been reaped yet.
pub fn kill_group(pid: libc::pid_t) {
    assert!(pid > 1);
    if unsafe { libc::kill(-pid, libc::SIGTERM) } < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            eprintln!("{}: kill: {}", crate::error::dollar_zero(), err);
        }
    }
}

/// Reap children until none remain.
pub fn drain() {
    loop {
        let mut status: libc::c_int = 0;
        let ret = unsafe { libc::wait(&mut status) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECHILD) => return,
                _ => {
                    eprintln!("{}: wait: {}", crate::error::dollar_zero(), err);
                    return;
                }
            }
        }
    }
}

/// Blocks the terminating signals for its lifetime.  Held around the
/// spawn-and-register critical section so a signal cannot observe a child
/// that is running but not yet tracked.
pub struct SignalBlocker {
    old: libc::sigset_t,
}

impl SignalBlocker {
    pub fn new() -> SignalBlocker {
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            for sig in signal::TERMINATING {
                libc::sigaddset(&mut set, sig);
            }
            let mut old: libc::sigset_t = std::mem::zeroed();
            libc::sigprocmask(libc::SIG_BLOCK, &set, &mut old);
            SignalBlocker { old }
        }
    }
}

impl Drop for SignalBlocker {
    fn drop(&mut self) {
        unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, &self.old, std::ptr::null_mut());
        }
    }
}
