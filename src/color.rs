//! ANSI color selection for diagnostics.
//!
//! Colors are decided once per stream at startup: error output is colored
//! only when stderr is a terminal, the few stdout messages only when stdout
//! is.  All escape sequences are plain ANSI; there is no Windows console
//! path.

use std::sync::OnceLock;

pub struct Colors {
    /// Highlight for the message part of errors.
    pub error: &'static str,
    /// Highlight for warnings.
    pub warning: &'static str,
    /// Highlight for quoted names and other load-bearing words.
    pub word: &'static str,
    pub end: &'static str,
}

const PLAIN: Colors = Colors {
    error: "",
    warning: "",
    word: "",
    end: "",
};

const ANSI: Colors = Colors {
    error: "\x1b[31m",
    warning: "\x1b[35m",
    word: "\x1b[1m",
    end: "\x1b[0m",
};

fn is_tty(fd: i32) -> bool {
    unsafe { libc::isatty(fd) == 1 }
}

/// Colors for stderr diagnostics.
pub fn stderr() -> &'static Colors {
    static COLORS: OnceLock<&'static Colors> = OnceLock::new();
    COLORS.get_or_init(|| if is_tty(2) { &ANSI } else { &PLAIN })
}

/// Colors for the rare stdout messages.
pub fn stdout() -> &'static Colors {
    static COLORS: OnceLock<&'static Colors> = OnceLock::new();
    COLORS.get_or_init(|| if is_tty(1) { &ANSI } else { &PLAIN })
}
