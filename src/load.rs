//! Loads the rule file into a rule set.

use crate::dep::Target;
use crate::error::{print_error_system, ErrorBits, ERROR_BUILD, ERROR_LOGICAL};
use crate::parse;
use crate::rule::RuleSet;

pub struct State {
    pub rules: RuleSet,
    /// The first target in the file, built when none is requested.
    pub default: Option<Target>,
}

/// Read and parse FILENAME.  Diagnostics are printed here; the returned
/// error bits become the exit status.
pub fn read(filename: &str) -> Result<State, ErrorBits> {
    let mut bytes = match std::fs::read(filename) {
        Ok(bytes) => bytes,
        Err(err) => {
            print_error_system(filename, &err);
            return Err(ERROR_BUILD);
        }
    };
    bytes.push(0);

    let rules = match parse::parse_rules(&bytes, filename) {
        Ok(rules) => rules,
        Err(err) => {
            eprintln!("{}", parse::format_error(&bytes, filename, err));
            return Err(ERROR_LOGICAL);
        }
    };

    for rule in &rules {
        rule.check_parameters()?;
    }

    let default = rules
        .iter()
        .find(|rule| !rule.is_parametrized())
        .map(|rule| rule.targets[0].unparametrized());

    let mut set = RuleSet::default();
    set.add(rules)?;

    Ok(State {
        rules: set,
        default,
    })
}
