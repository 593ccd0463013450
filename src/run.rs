//! Command line interface and top-level driver.

use std::rc::Rc;

use crate::dep::Dep;
use crate::dep::Pattern;
use crate::error::{print_error, set_dollar_zero, Place, ERROR_LOGICAL};
use crate::load;
use crate::parse;
use crate::signal;
use crate::work::{Options, Order, Work};

#[derive(argh::FromArgs)]
/// s2, a declarative build system with dynamic dependencies
struct Opts {
    /// rule file [default=main.s2]
    #[argh(option, short = 'f', default = "(\"main.s2\".into())")]
    file: String,

    /// number of parallel jobs [default=1]
    #[argh(option, short = 'j', default = "1")]
    jobs: i64,

    /// keep going after errors
    #[argh(switch, short = 'k')]
    keep_going: bool,

    /// question mode: exit 1 when targets are not up to date
    #[argh(switch, short = 'q')]
    question: bool,

    /// silent operation
    #[argh(switch, short = 's')]
    silent: bool,

    /// keep partially built files when a command fails
    #[argh(switch, short = 'K')]
    keep_partial: bool,

    /// scheduling order: dfs or random [default=dfs]
    #[argh(option, short = 'm', default = "(\"dfs\".into())")]
    order: String,

    /// seed for random order; implies -m random
    #[argh(option, short = 'M')]
    seed: Option<u64>,

    /// targets to bring up to date [default: the first target in the file]
    #[argh(positional)]
    targets: Vec<String>,
}

pub fn run() -> i32 {
    set_dollar_zero(std::env::args().next().unwrap_or_else(|| "s2".into()));
    signal::register();

    let opts: Opts = argh::from_env();

    if opts.jobs < 1 {
        print_error("Argument to option '-j' must be a positive integer");
        return ERROR_LOGICAL;
    }

    let order = if opts.seed.is_some() {
        Order::Random
    } else {
        match opts.order.as_str() {
            "dfs" => Order::Dfs,
            "random" => Order::Random,
            other => {
                print_error(&format!("Invalid argument '{}' to option '-m'", other));
                return ERROR_LOGICAL;
            }
        }
    };

    let state = match load::read(&opts.file) {
        Ok(state) => state,
        Err(bits) => return bits,
    };

    let deps: Vec<Rc<Dep>> = if opts.targets.is_empty() {
        match &state.default {
            Some(target) => vec![Rc::new(Dep::direct(
                0,
                target.base,
                Pattern::literal(&target.name),
                Place::Argument,
            ))],
            None => {
                print_error("No target given and no rule in the rule file");
                return ERROR_LOGICAL;
            }
        }
    } else {
        match parse::parse_args(&opts.targets) {
            Ok(deps) => deps,
            Err(err) => {
                print_error(&format!("Invalid target: {}", err.msg));
                return ERROR_LOGICAL;
            }
        }
    };

    for dep in &deps {
        if !dep.is_unparametrized() {
            print_error(&format!(
                "Target '{}' must not contain parameters",
                dep.innermost().name.format()
            ));
            return ERROR_LOGICAL;
        }
    }

    let options = Options {
        jobs: opts.jobs,
        keep_going: opts.keep_going,
        question: opts.question,
        silent: opts.silent,
        no_delete: opts.keep_partial,
        order,
        seed: opts.seed,
    };
    let mut work = Work::new(&state.rules, options);
    work.run(deps)
}
