//! Error codes and source locations.
//!
//! Errors are represented by small integers that double as the process exit
//! status: 1 for build errors (failed commands, missing files), 2 for
//! logical errors (cycles, bad rules, parse errors), 4 for fatal errors.
//! Build and logical errors are recoverable under the keep-going option and
//! may combine to 3; fatal errors abort immediately and never combine.
//!
//! There are two kinds of error output lines: messages of the form
//! `$0: *** MESSAGE`, used when no source location is available, and traces
//! of the form `FILE:LINE:COL: message`, used whenever the error can be
//! pinned to a place in the input.  Columns are stored zero-based and
//! printed one-based.  Messages begin with an uppercase letter, traces with
//! a lowercase one, and neither ends in a period.

use std::rc::Rc;
use std::sync::OnceLock;

use crate::color;

pub type ErrorBits = i32;

pub const ERROR_BUILD: ErrorBits = 1;
pub const ERROR_LOGICAL: ErrorBits = 2;
pub const ERROR_FATAL: ErrorBits = 4;

/// Carries accumulated error bits out of the execution engine.  Raising an
/// error produces one of these unless the keep-going option is set, in
/// which case the bits are recorded on the node and traversal continues.
#[derive(Debug, Clone, Copy)]
pub struct Abort(pub ErrorBits);

static DOLLAR_ZERO: OnceLock<String> = OnceLock::new();

/// Record the name the program was invoked under, for `$0: *** ...` output.
pub fn set_dollar_zero(name: String) {
    let _ = DOLLAR_ZERO.set(name);
}

pub fn dollar_zero() -> &'static str {
    DOLLAR_ZERO.get().map(|s| s.as_str()).unwrap_or("s2")
}

/// Print an error message without a place.
pub fn print_error(message: &str) {
    let c = color::stderr();
    eprintln!("{}{}{}: *** {}", c.word, dollar_zero(), c.end, message);
}

/// Like perror(): the name plus the system error text.
pub fn print_error_system(name: &str, err: &std::io::Error) {
    let c = color::stderr();
    eprintln!("{}{}{}: {}", c.word, name, c.end, err);
}

/// Print a warning without a place.
pub fn print_warning(message: &str) {
    let c = color::stderr();
    eprintln!(
        "{}{}{}: warning: {}",
        c.warning,
        dollar_zero(),
        c.end,
        message
    );
}

/// Informational stderr output accompanying error handling, e.g. the notice
/// that a partially built file is being removed.
pub fn print_info(message: &str) {
    let c = color::stderr();
    eprintln!("{}{}{}: {}", c.warning, dollar_zero(), c.end, message);
}

/// A position in input.  This is either in a rule file or in the arguments
/// or options the process was started with; it can also be empty, which is
/// the uninitialized value.  Places are printed as the head of trace lines.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Place {
    #[default]
    Empty,
    /// In a file, with a 1-based line and a 0-based column.
    File {
        name: Rc<str>,
        line: u32,
        column: u32,
    },
    /// A command line argument.
    Argument,
    /// In an option.
    Option(char),
}

impl Place {
    pub fn in_file(name: &Rc<str>, line: u32, column: u32) -> Place {
        Place::File {
            name: Rc::clone(name),
            line,
            column,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Place::Empty)
    }

    /// Print a trace line for this place as part of an error.
    pub fn trace(&self, message: &str) {
        let c = color::stderr();
        self.print(message, c.error, c.word);
    }

    /// Print a warning trace for this place.
    pub fn warn(&self, message: &str) {
        let c = color::stderr();
        self.print(&format!("warning: {}", message), c.warning, c.word);
    }

    fn print(&self, message: &str, color: &str, color_word: &str) {
        let end = color::stderr().end;
        match self {
            Place::Empty => {
                // Empty places indicate a bookkeeping bug; still print the
                // message rather than lose it.
                debug_assert!(false, "trace for an empty place");
                eprintln!("{}", message);
            }
            Place::File { name, line, column } => {
                eprintln!(
                    "{}{}{}:{}{}{}:{}{}{}: {}",
                    color_word,
                    name,
                    end,
                    color,
                    line,
                    end,
                    color,
                    column + 1,
                    end,
                    message
                );
            }
            Place::Argument => {
                eprintln!("{}Command line argument{}: {}", color, end, message);
            }
            Place::Option(opt) => {
                eprintln!("{}Option {}-{}{}: {}", color, color_word, opt, end, message);
            }
        }
    }

    /// The string passed as $0 to child shells, so that shell error output
    /// names the rule file location of the command.  Empty when no special
    /// value applies.
    pub fn as_argv0(&self) -> Option<String> {
        match self {
            Place::File { name, line, .. } => {
                // A leading dash would trigger login-shell behavior.
                let prefix = if name.starts_with('-') { "file " } else { "" };
                Some(format!("{}{}:{}", prefix, name, line))
            }
            _ => None,
        }
    }
}
