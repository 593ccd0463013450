//! The execution engine.
//!
//! Each target is represented at run time by one Execution node.  Nodes are
//! created on first reference and never freed: the arena doubles as a cache,
//! so a target finished once is finished for every later parent.  The
//! active nodes form a rooted acyclic graph, not a tree; a node can have
//! several parents, and each back-edge carries a Link with the edge's flags
//! and the avoid mask of attributes already handled above it.
//!
//! Control flow: the driver repeatedly calls execute() on the root.
//! execute() either queues children, returns when the job budget is
//! exhausted, or spawns the node's command; wait() reaps one finished child
//! process and propagation back up happens in unlink().

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dep::{BaseKind, Dep, DynamicDep, FlagPlaces, Pattern, Target};
use crate::error::{
    dollar_zero, print_error, print_error_system, print_info, print_warning, Abort, ErrorBits,
    Place, ERROR_BUILD, ERROR_FATAL, ERROR_LOGICAL,
};
use crate::flags::*;
use crate::job::{self, Job, SignalBlocker};
use crate::parse;
use crate::rule::{Command, RuleFlavor, RuleSet};
use crate::signal;
use crate::smallmap::SmallMap;
use crate::timestamp::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    /// Depth-first through each node's children, in declaration order.
    Dfs,
    /// Uniform sampling among a node's children, for stress testing.
    Random,
}

pub struct Options {
    pub jobs: i64,
    pub keep_going: bool,
    pub question: bool,
    pub silent: bool,
    /// Keep partially built files after a failed command.
    pub no_delete: bool,
    pub order: Order,
    pub seed: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            jobs: 1,
            keep_going: false,
            question: false,
            silent: false,
            no_delete: false,
            order: Order::Dfs,
            seed: None,
        }
    }
}

/// Handle to one execution node.  An id handed out once stays valid until
/// the process exits, because nodes are never freed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExecId(usize);

/// Storage for the execution nodes.  Allocation-only: the cache's
/// "created on first reference, never freed" lifecycle is the graph's
/// memory model, which is what lets `parents` and `children` hold plain
/// ids instead of owning references to each other.
#[derive(Default)]
struct ExecArena {
    nodes: Vec<Execution>,
}

impl ExecArena {
    fn get(&self, id: ExecId) -> &Execution {
        &self.nodes[id.0]
    }

    fn get_mut(&mut self, id: ExecId) -> &mut Execution {
        &mut self.nodes[id.0]
    }

    fn push(&mut self, exec: Execution) -> ExecId {
        let id = ExecId(self.nodes.len());
        self.nodes.push(exec);
        id
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// An annotated edge from a parent execution to a child.
#[derive(Clone)]
pub struct Link {
    /// Attributes already handled on the parent's side, per dynamic level.
    pub avoid: FlagStack,
    /// The edge's own flags, as seen by the scheduler.
    pub flags: Flags,
    /// Where the dependency was declared.
    pub place: Place,
    /// The dependency expression; None only on the root's own link.
    pub dep: Option<Rc<Dep>>,
}

impl Link {
    fn root() -> Link {
        Link {
            avoid: FlagStack::new(),
            flags: 0,
            place: Place::Empty,
            dep: None,
        }
    }

    fn of_dep(dep: Rc<Dep>) -> Link {
        Link {
            avoid: FlagStack::of_dep(&dep),
            flags: dep.flags(),
            place: dep.place(),
            dep: Some(dep),
        }
    }
}

/// One node of the execution graph.
struct Execution {
    /// Empty only for the root.  All entries share one dynamic depth, and
    /// depth > 0 implies exactly one entry.
    targets: Vec<Target>,
    rule: Option<Rc<crate::rule::Rule>>,
    /// The rule this node was derived from, identity for strong-cycle
    /// detection.  None exactly when RULE is None.
    param_rule: Option<Rc<crate::rule::Rule>>,
    /// Currently active children, in creation order.
    children: Vec<ExecId>,
    parents: SmallMap<ExecId, Link>,
    job: Job,
    /// Dependencies not yet deployed (first pass).
    buf_default: VecDeque<Link>,
    /// Dependencies deferred under trivial semantics (second pass).
    buf_trivial: VecDeque<Link>,
    /// Per-target mtime captured before the command ran; None for targets
    /// that were absent.  Indexes parallel TARGETS.
    timestamps_old: Vec<Option<Timestamp>>,
    mapping_parameter: HashMap<String, String>,
    mapping_variable: HashMap<String, String>,
    /// OR-accumulated error bits; never contains ERROR_FATAL.
    error: ErrorBits,
    /// Which aspects have been discharged, per dynamic level.
    done: FlagStack,
    /// Latest timestamp of a dependency that was not rebuilt.
    timestamp: Option<Timestamp>,
    need_build: bool,
    /// Whether the existence/timestamp probe ran.
    checked: bool,
    /// -1 = some file target known missing, 0 = unknown, +1 = all present.
    exists: i8,
}

impl Execution {
    fn root(deps: &[Rc<Dep>]) -> Execution {
        let mut buf = VecDeque::new();
        for dep in deps {
            push_dep_links(&mut buf, dep);
        }
        Execution {
            targets: Vec::new(),
            rule: None,
            param_rule: None,
            children: Vec::new(),
            parents: SmallMap::new(),
            job: Job::default(),
            buf_default: buf,
            buf_trivial: VecDeque::new(),
            timestamps_old: Vec::new(),
            mapping_parameter: HashMap::new(),
            mapping_variable: HashMap::new(),
            error: 0,
            done: FlagStack::new(),
            timestamp: None,
            need_build: false,
            checked: false,
            exists: 0,
        }
    }

    fn depth(&self) -> usize {
        self.targets.first().map_or(0, |t| t.depth)
    }

    fn is_dynamic(&self) -> bool {
        self.depth() > 0
    }

    /// Whether this node has done everything the given edge needs from it.
    fn finished_for(&self, avoid: &FlagStack) -> bool {
        FlagStack::covers(&self.done, avoid)
    }

    /// Whether this node is completely finished.
    fn finished(&self) -> bool {
        let mut to_do = 0;
        for k in 0..=self.done.depth() {
            to_do |= !self.done.get(k);
        }
        to_do & F_ALL == 0
    }
}

/// Queue links for a dependency, flattening groups in declaration order.
fn push_dep_links(buf: &mut VecDeque<Link>, dep: &Rc<Dep>) {
    match &**dep {
        Dep::Concat(parts) => {
            for part in parts {
                push_dep_links(buf, part);
            }
        }
        _ => buf.push_back(Link::of_dep(Rc::clone(dep))),
    }
}

/// Flatten groups into their elements, in declaration order.
fn flatten_dep(dep: &Rc<Dep>, out: &mut Vec<Rc<Dep>>) {
    match &**dep {
        Dep::Concat(parts) => {
            for part in parts {
                flatten_dep(part, out);
            }
        }
        _ => out.push(Rc::clone(dep)),
    }
}

/// The whitespace characters stripped from variable dependency content.
fn trim_ws(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c'))
}

pub struct Work<'a> {
    rules: &'a RuleSet,
    options: Options,
    execs: ExecArena,
    /// The execution cache.  Multi-target rules coalesce: every target of
    /// a node maps to it.
    by_target: HashMap<Target, ExecId>,
    /// Running executions by child process id.
    by_pid: HashMap<libc::pid_t, ExecId>,
    /// When each transient target was executed this invocation.  Plays the
    /// role of the filesystem for transients.
    transients: HashMap<String, Timestamp>,
    /// The instant of the last wait(); no file should be newer than this.
    timestamp_last: Timestamp,
    startup: Timestamp,
    /// Free job slots.
    jobs: i64,
    /// Whether any job ran or file was created, for "Nothing to be done".
    worked: bool,
    rng: StdRng,
}

impl<'a> Work<'a> {
    pub fn new(rules: &'a RuleSet, options: Options) -> Work<'a> {
        assert!(options.jobs >= 1);
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let startup = Timestamp::now();
        Work {
            rules,
            jobs: options.jobs,
            options,
            execs: ExecArena::default(),
            by_target: HashMap::new(),
            by_pid: HashMap::new(),
            transients: HashMap::new(),
            timestamp_last: startup,
            startup,
            worked: false,
            rng,
        }
    }

    /// Bring the given root dependencies up to date.  Returns the error
    /// bits, which double as the exit status.
    pub fn run(&mut self, deps: Vec<Rc<Dep>>) -> ErrorBits {
        self.timestamp_last = Timestamp::now();
        let root = self.execs.push(Execution::root(&deps));

        match self.drive(root) {
            Ok(()) => {
                let error = self.exec(root).error;
                debug_assert!(error == 0 || self.options.keep_going);
                if error == 0 {
                    if !self.worked && !self.options.silent {
                        println!("Nothing to be done");
                    }
                } else {
                    print_info("Targets not rebuilt because of errors");
                }
                error
            }
            Err(Abort(bits)) => {
                if !self.by_pid.is_empty() {
                    print_error("Terminating all running jobs");
                    self.terminate_jobs();
                }
                if bits & ERROR_FATAL != 0 {
                    std::process::exit(ERROR_FATAL);
                }
                bits
            }
        }
    }

    fn drive(&mut self, root: ExecId) -> Result<(), Abort> {
        while !self.exec(root).finished() {
            if signal::interrupted() {
                self.interrupt();
            }
            while self.execute(root, None, Link::root())? {}
            if !self.by_pid.is_empty() {
                self.wait()?;
            }
            if signal::interrupted() {
                self.interrupt();
            }
        }
        Ok(())
    }

    /// A termination signal arrived: kill outstanding jobs, clean up, and
    /// die from the signal.
    fn interrupt(&mut self) -> ! {
        self.terminate_jobs();
        signal::die();
    }

    /// SIGTERM every child's process group, remove partially built files,
    /// and reap everything.
    fn terminate_jobs(&mut self) {
        let entries: Vec<(libc::pid_t, ExecId)> =
            self.by_pid.iter().map(|(&pid, &id)| (pid, id)).collect();
        for (pid, _) in &entries {
            job::kill_group(*pid);
        }
        let mut removed = false;
        for (_, id) in &entries {
            removed |= self.remove_if_existing(*id, false);
        }
        if removed {
            eprintln!("Removing partially built files");
        }
        job::drain();
        self.by_pid.clear();
    }

    /// Wait for the next job to finish and finish it.  Starts nothing new.
    fn wait(&mut self) -> Result<(), Abort> {
        debug_assert!(!self.by_pid.is_empty());
        let (pid, status) = match job::wait() {
            Ok(Some(reaped)) => reaped,
            // Interrupted: the driver re-checks the signal flag.
            Ok(None) => return Ok(()),
            Err(err) => {
                print_error(&err.to_string());
                return Err(Abort(ERROR_FATAL));
            }
        };
        self.timestamp_last = Timestamp::now();
        let id = match self.by_pid.remove(&pid) {
            Some(id) => id,
            None => return Ok(()),
        };
        let result = self.waited(id, pid, status);
        self.jobs += 1;
        result
    }

    fn exec(&self, id: ExecId) -> &Execution {
        self.execs.get(id)
    }

    fn exec_mut(&mut self, id: ExecId) -> &mut Execution {
        self.execs.get_mut(id)
    }

    /// All errors raised by the engine funnel through here: record the bits
    /// on the node, and abort the traversal unless keep-going is set.
    fn raise(&mut self, id: ExecId, error: ErrorBits) -> Result<(), Abort> {
        debug_assert!((1..=3).contains(&error));
        self.exec_mut(id).error |= error;
        if !self.options.keep_going {
            return Err(Abort(self.exec(id).error));
        }
        Ok(())
    }

    /// Work on this node for the edge described by LINK.  Returns true iff
    /// the caller should immediately try to start more work, which is only
    /// possible in random order while job slots remain.
    fn execute(
        &mut self,
        id: ExecId,
        parent: Option<ExecId>,
        mut link: Link,
    ) -> Result<bool, Abort> {
        debug_assert!(self.jobs >= 0);
        debug_assert_eq!(self.exec(id).done.depth(), self.exec(id).depth());
        debug_assert_eq!(link.avoid.depth(), self.exec(id).depth());

        // A second-pass edge cancels the trivial skip below it.
        if link.flags & F_OVERRIDE_TRIVIAL != 0 {
            link.flags &= !F_TRIVIAL;
            link.avoid.remove_highest(F_TRIVIAL);
        }

        if self.exec(id).finished_for(&link.avoid) {
            return Ok(false);
        }

        // In depth-first order, continue the already-active children before
        // opening new ones; in random order the other way around.
        if self.options.order != Order::Random {
            match self.execute_children(id, &link)? {
                -1 => {}
                0 => return Ok(false),
                _ => return Ok(true),
            }
        }

        // An optional dependency on a missing file is not built at all.
        if link.flags & F_OPTIONAL != 0 {
            let file_name = link.dep.as_ref().and_then(|dep| match &**dep {
                Dep::Direct(d) if d.base == BaseKind::File => {
                    Some(d.name.unparametrized().expect("parametrized link").to_string())
                }
                _ => None,
            });
            if let Some(name) = file_name {
                match std::fs::metadata(&name) {
                    Ok(_) => self.exec_mut(id).exists = 1,
                    Err(err) => {
                        self.exec_mut(id).exists = -1;
                        if err.kind() != std::io::ErrorKind::NotFound {
                            print_error_system(&name, &err);
                            self.raise(id, ERROR_BUILD)?;
                            let avoid = link.avoid.clone();
                            self.exec_mut(id).done.add_neg(&avoid);
                            return Ok(false);
                        }
                        let high = link.avoid.highest();
                        self.exec_mut(id).done.add_highest_neg(high);
                        return Ok(false);
                    }
                }
            }
        }

        // Trivial dependencies wait for the second pass.
        if link.flags & F_TRIVIAL != 0 {
            let avoid = link.avoid.clone();
            self.exec_mut(id).done.add_neg(&avoid);
            return Ok(false);
        }

        debug_assert!(self.exec(id).error == 0 || self.options.keep_going);

        // First pass: deploy pending dependencies, queueing each for the
        // second pass with override-trivial set.
        loop {
            let link_child = match self.exec_mut(id).buf_default.pop_front() {
                None => break,
                Some(link_child) => link_child,
            };
            let mut second = link_child.clone();
            second.avoid.add_highest(F_OVERRIDE_TRIVIAL);
            second.flags |= F_OVERRIDE_TRIVIAL;
            self.exec_mut(id).buf_trivial.push_back(second);
            if self.deploy(id, &link, link_child)? {
                return Ok(true);
            }
            if self.jobs == 0 {
                return Ok(false);
            }
        }

        if self.options.order == Order::Random {
            match self.execute_children(id, &link)? {
                -1 => {}
                0 => return Ok(false),
                _ => return Ok(true),
            }
        }

        // Some dependencies are still running.
        if !self.exec(id).children.is_empty() {
            return Ok(false);
        }

        // There was an error in a child.
        if self.exec(id).error != 0 {
            debug_assert!(self.options.keep_going);
            let avoid = link.avoid.clone();
            self.exec_mut(id).done.add_neg(&avoid);
            return Ok(false);
        }

        // The root and dynamic wrappers run no command themselves.
        // Ordinary targets are still checked below even without one.
        if self.exec(id).targets.is_empty() || self.exec(id).depth() != 0 {
            let avoid = link.avoid.clone();
            self.exec_mut(id).done.add_neg(&avoid);
            return Ok(false);
        }

        // Job already started, pending its wait.
        if self.exec(id).job.started() {
            return Ok(false);
        }

        debug_assert!(self.jobs > 0);
        debug_assert!(self.exec(id).error == 0);

        // A target for which no execution has to be done.
        let no_execution = self
            .exec(id)
            .rule
            .as_ref()
            .map_or(false, |r| r.command.is_none() && r.flavor != RuleFlavor::Copy);

        if !self.exec(id).checked {
            if let Some(ret) = self.check_targets(id, parent, &link, no_execution)? {
                return Ok(ret);
            }
        }

        // Transients with no file targets alongside rebuild once per
        // invocation.
        if !self.exec(id).need_build {
            let exec = self.exec(id);
            let has_file = exec.targets.iter().any(|t| t.base == BaseKind::File);
            let mut rebuild = false;
            for target in &exec.targets {
                if target.base != BaseKind::Transient {
                    continue;
                }
                if !self.transients.contains_key(&target.name) {
                    if !no_execution && !has_file {
                        rebuild = true;
                    }
                    break;
                }
            }
            if rebuild {
                self.exec_mut(id).need_build = true;
            }
        }

        if !self.exec(id).need_build {
            let avoid = link.avoid.clone();
            self.exec_mut(id).done.add_neg(&avoid);
            return Ok(false);
        }

        // Second pass: the target is being rebuilt, so the dependencies
        // skipped as trivial are now deployed with override-trivial.
        loop {
            let link_child = match self.exec_mut(id).buf_trivial.pop_front() {
                None => break,
                Some(link_child) => link_child,
            };
            if self.deploy(id, &link, link_child)? {
                return Ok(true);
            }
            if self.jobs == 0 {
                return Ok(false);
            }
        }
        if !self.exec(id).children.is_empty() {
            return Ok(false);
        }

        if no_execution {
            let avoid = link.avoid.clone();
            self.exec_mut(id).done.add_neg(&avoid);
            return Ok(false);
        }

        if self.options.question {
            if !self.options.silent {
                println!("Targets are not up to date");
            }
            std::process::exit(ERROR_BUILD);
        }

        self.worked = true;
        self.print_command(id);

        let rule = Rc::clone(self.exec(id).rule.as_ref().unwrap());

        if rule.flavor == RuleFlavor::Hardcoded {
            debug_assert_eq!(self.exec(id).targets.len(), 1);
            self.exec_mut(id).done.add_lowest_neg(0);
            let name = self.exec(id).targets[0].name.clone();
            self.write_content(id, &name, rule.command.as_ref().unwrap())?;
            return Ok(false);
        }

        // Transient targets count as executed from the moment the command
        // starts.
        for target in self.exec(id).targets.clone() {
            if target.base != BaseKind::Transient {
                continue;
            }
            debug_assert!(!self.transients.contains_key(&target.name));
            self.transients.insert(target.name, Timestamp::now());
        }

        let mut mapping = self.exec(id).mapping_parameter.clone();
        mapping.extend(self.exec(id).mapping_variable.clone());
        self.exec_mut(id).mapping_parameter.clear();
        self.exec_mut(id).mapping_variable.clear();

        let spawned = {
            // Block termination signals from the time the process is
            // started until it is entered in the pid table, so a signal
            // cannot observe a running but untracked child.
            let _blocker = SignalBlocker::new();
            let result = if rule.flavor == RuleFlavor::Copy {
                let target = rule.targets[0].name.unparametrized().unwrap().to_string();
                let source = rule.input.as_ref().unwrap().unparametrized().unwrap();
                self.exec_mut(id).job.start_copy(&target, source)
            } else {
                let command = rule.command.as_ref().unwrap();
                let stdout_file = rule
                    .redirect_index
                    .map(|i| rule.targets[i].name.unparametrized().unwrap());
                let stdin_file = rule.input.as_ref().map(|i| i.unparametrized().unwrap());
                let argv0 = command.place.as_argv0();
                self.exec_mut(id).job.start(
                    &command.text,
                    &mapping,
                    stdout_file,
                    stdin_file,
                    argv0.as_deref(),
                )
            };
            if let Ok(pid) = &result {
                self.by_pid.insert(*pid, id);
            }
            result
        };

        if let Err(err) = spawned {
            print_error(&err.to_string());
            let target = self.exec(id).targets[0].format();
            if !self.options.silent {
                self.print_traces(id, &format!("error executing command for {}", target));
            }
            self.raise(id, ERROR_BUILD)?;
            let avoid = link.avoid.clone();
            self.exec_mut(id).done.add_neg(&avoid);
            return Ok(false);
        }

        self.jobs -= 1;
        debug_assert!(self.jobs >= 0);

        Ok(self.options.order == Order::Random && self.jobs > 0)
    }

    /// The once-only existence and timestamp probe of the file targets.
    /// Returns Some(ret) when execute() should return RET immediately.
    fn check_targets(
        &mut self,
        id: ExecId,
        parent: Option<ExecId>,
        link: &Link,
        no_execution: bool,
    ) -> Result<Option<bool>, Abort> {
        self.exec_mut(id).checked = true;
        self.exec_mut(id).exists = 1;
        let n = self.exec(id).targets.len();
        self.exec_mut(id).timestamps_old = vec![None; n];

        for i in 0..n {
            let target = self.exec(id).targets[i].clone();
            if target.base != BaseKind::File {
                continue;
            }
            match std::fs::metadata(&target.name) {
                Ok(meta) => {
                    let ts = Timestamp::of_metadata(&meta);
                    self.exec_mut(id).timestamps_old[i] = Some(ts);
                    if parent.is_none() || link.flags & (F_EXISTENCE | F_PERSISTENT) == 0 {
                        self.warn_future_file(ts, &target.name);
                    }
                    // Existing but older than a dependency: rebuild, or
                    // warn when the rule is only a logical grouping.
                    if let Some(max) = self.exec(id).timestamp {
                        if ts < max {
                            if no_execution {
                                print_warning(&format!(
                                    "File target {} which has no command is older than its dependency",
                                    target.format()
                                ));
                            } else {
                                self.exec_mut(id).need_build = true;
                            }
                        }
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    self.exec_mut(id).exists = -1;
                    if !self.exec(id).need_build {
                        if link.flags & F_OPTIONAL == 0 {
                            self.exec_mut(id).need_build = true;
                        } else {
                            // Optional: don't create the file; it will then
                            // not exist when the parent is called.
                            self.exec_mut(id).done.add_lowest_neg(F_OPTIONAL);
                            return Ok(Some(false));
                        }
                    }
                    if no_execution {
                        // The file does not exist, its dependencies are up
                        // to date, and there is no command to make it.
                        let rule = Rc::clone(self.exec(id).rule.as_ref().unwrap());
                        if !self.options.silent {
                            if !rule.deps.is_empty() {
                                self.print_traces(
                                    id,
                                    &format!(
                                        "file without command {} does not exist, although all its dependencies are up to date",
                                        target.format()
                                    ),
                                );
                            } else {
                                rule.targets[i].place.trace(&format!(
                                    "file without command and without dependencies {} does not exist",
                                    target.format()
                                ));
                                self.print_traces(id, "");
                            }
                        }
                        let low = link.avoid.lowest();
                        self.exec_mut(id).done.add_lowest_neg(low);
                        self.raise(id, ERROR_BUILD)?;
                        return Ok(Some(false));
                    }
                }
                Err(err) => {
                    self.exec_mut(id).exists = -1;
                    print_error_system(&target.name, &err);
                    self.raise(id, ERROR_BUILD)?;
                    let low = link.avoid.lowest();
                    self.exec_mut(id).done.add_lowest_neg(low);
                    return Ok(Some(false));
                }
            }
        }

        // Fold the old timestamps into the running maximum.  This cannot
        // happen inside the loop: each comparison above needs the maximum
        // over dependencies only.
        for i in 0..n {
            if let Some(old) = self.exec(id).timestamps_old[i] {
                let exec = self.exec_mut(id);
                if exec.timestamp.map_or(true, |t| t < old) {
                    exec.timestamp = Some(old);
                }
            }
        }
        Ok(None)
    }

    /// Work on the already-active children.  Returns 1 for "tell the
    /// caller to return true", 0 for "return false", -1 for "fall
    /// through".
    fn execute_children(&mut self, id: ExecId, link: &Link) -> Result<i32, Abort> {
        // unlink() mutates the children list, so iterate over a snapshot.
        let mut vec = self.exec(id).children.clone();
        if self.options.order != Order::Random {
            // Popping from the back then preserves declaration order.
            vec.reverse();
        }

        while !vec.is_empty() {
            if self.options.order == Order::Random && vec.len() > 1 {
                let last = vec.len() - 1;
                let pick = self.rng.gen_range(0..vec.len());
                vec.swap(pick, last);
            }
            let child = vec.pop().unwrap();

            let edge = match self.exec(child).parents.get(&id) {
                // The edge is already gone.
                None => continue,
                Some(edge) => edge.clone(),
            };
            let mut flags_child = edge.flags;
            // Transient targets pass their own attributes through to their
            // dependencies.
            if let Some(dep) = &link.dep {
                if let Dep::Direct(d) = &**dep {
                    if d.base == BaseKind::Transient {
                        flags_child |= link.flags;
                    }
                }
            }
            let link_child = Link {
                avoid: edge.avoid.clone(),
                flags: flags_child,
                place: edge.place.clone(),
                dep: edge.dep.clone(),
            };

            if self.execute(child, Some(id), link_child)? {
                return Ok(1);
            }
            debug_assert!(self.jobs >= 0);
            if self.jobs == 0 {
                return Ok(0);
            }
            if self.exec(child).finished_for(&edge.avoid) {
                self.unlink(
                    id,
                    child,
                    link.dep.clone(),
                    &link.avoid,
                    edge.dep.clone().expect("edge without dependency"),
                    &edge.avoid,
                    flags_child,
                )?;
            }
        }

        debug_assert!(self.exec(id).error == 0 || self.options.keep_going);
        Ok(-1)
    }

    /// Open the child named by LINK_CHILD and work on it.  Same return
    /// convention as execute().
    fn deploy(&mut self, id: ExecId, link: &Link, link_child: Link) -> Result<bool, Abort> {
        let dep_rc = link_child.dep.clone().expect("deploy without dependency");
        debug_assert!(dep_rc.is_unparametrized());

        let direct_place = dep_rc.innermost().place.clone();
        let target_child = dep_rc.single_target();
        debug_assert_eq!(target_child.depth, dep_rc.depth());

        let flags_child = link_child.flags;
        let mut flags_child_additional: Flags = 0;
        let mut avoid_child = link_child.avoid.clone();
        let mut dep_child = dep_rc;

        // Carry attributes over transient targets: the transitive flags of
        // the edge onto a transient apply to the transient's dependencies.
        if !self.exec(id).targets.is_empty() {
            if let Some(parent_dep) = &link.dep {
                if let Dep::Direct(d) = &**parent_dep {
                    if d.base == BaseKind::Transient {
                        flags_child_additional |= link.flags;
                        avoid_child.add_highest(link.flags);
                        let mut changed = (*dep_child).clone();
                        if link.flags & (F_EXISTENCE | F_PERSISTENT) != 0 {
                            changed.set_existence_place(parent_dep.existence_place());
                        }
                        if link.flags & F_OPTIONAL != 0 {
                            changed.set_optional_place(parent_dep.optional_place());
                        }
                        if link.flags & F_TRIVIAL != 0 {
                            changed.set_trivial_place(parent_dep.trivial_place());
                        }
                        dep_child = Rc::new(changed);
                    }
                }
            }
        }

        let flags_child_new = flags_child | flags_child_additional;

        // '!' and '?' do not mix, even when one of them was carried in.
        if flags_child_new & (F_EXISTENCE | F_PERSISTENT) != 0
            && flags_child_new & F_OPTIONAL != 0
        {
            let place_existence = dep_child.existence_place();
            let place_optional = dep_child.optional_place();
            place_existence.trace("declaration of existence-only dependency using '!'");
            place_optional.trace("clashes with declaration of optional dependency using '?'");
            direct_place.trace(&format!(
                "in declaration of dependency {}",
                target_child.format()
            ));
            self.print_traces(id, "");
            self.raise(id, ERROR_LOGICAL)?;
            return Ok(false);
        }

        // '!', '?' and '&' do not mix with '$[': a variable dependency is
        // read unconditionally.
        if flags_child & F_VARIABLE != 0
            && flags_child_additional & (F_EXISTENCE | F_PERSISTENT | F_OPTIONAL | F_TRIVIAL) != 0
        {
            let name = target_child.format();
            if flags_child_additional & (F_EXISTENCE | F_PERSISTENT) != 0 {
                direct_place.trace(&format!(
                    "variable dependency $[{}] must not be declared as existence-only dependency",
                    name
                ));
                dep_child.existence_place().trace("using '!'");
            } else if flags_child_additional & F_OPTIONAL != 0 {
                direct_place.trace(&format!(
                    "variable dependency $[{}] must not be declared as optional dependency",
                    name
                ));
                dep_child.optional_place().trace("using '?'");
            } else {
                direct_place.trace(&format!(
                    "variable dependency $[{}] must not be declared as trivial dependency",
                    name
                ));
                dep_child.trivial_place().trace("using '&'");
            }
            self.print_traces(id, "");
            self.raise(id, ERROR_LOGICAL)?;
            return Ok(false);
        }

        let flags_child = flags_child_new;

        let child = self.get_execution(
            target_child,
            Link {
                avoid: avoid_child.clone(),
                flags: flags_child,
                place: direct_place,
                dep: Some(Rc::clone(&dep_child)),
            },
            id,
        )?;
        let child = match child {
            // A strong cycle was found.
            None => return Ok(false),
            Some(child) => child,
        };

        if !self.exec(id).children.contains(&child) {
            self.exec_mut(id).children.push(child);
        }

        let link_child_new = Link {
            avoid: avoid_child.clone(),
            flags: flags_child,
            place: link_child.place.clone(),
            dep: Some(Rc::clone(&dep_child)),
        };
        if self.execute(child, Some(id), link_child_new)? {
            return Ok(true);
        }
        debug_assert!(self.jobs >= 0);
        if self.jobs == 0 {
            return Ok(false);
        }

        if self.exec(child).finished_for(&avoid_child) {
            self.unlink(
                id,
                child,
                link.dep.clone(),
                &link.avoid,
                dep_child,
                &avoid_child,
                flags_child,
            )?;
        }
        Ok(false)
    }

    /// Get the cached execution for TARGET or create one, connecting it to
    /// PARENT.  Returns None when the new edge would close a cycle; the
    /// error has then been raised on PARENT.
    fn get_execution(
        &mut self,
        target: Target,
        link: Link,
        parent: ExecId,
    ) -> Result<Option<ExecId>, Abort> {
        let avoid = link.avoid.clone();
        let mut connected = false;
        let id = match self.by_target.get(&target) {
            Some(&id) => {
                if self.exec(id).parents.contains_key(&parent) {
                    // Already connected: merge the new flags in.
                    let edge = self.exec_mut(id).parents.get_mut(&parent).unwrap();
                    edge.avoid.add(&link.avoid);
                    edge.flags |= link.flags;
                } else {
                    self.exec_mut(id).parents.insert(parent, link.clone());
                    connected = true;
                }
                id
            }
            None => {
                connected = true;
                self.create_execution(target, &link, parent)?
            }
        };

        if self.find_cycle(parent, id, &link) {
            // Take the freshly added back-edge out again, so the rejected
            // edge leaves no half-connected state behind.
            if connected {
                self.exec_mut(id).parents.remove(&parent);
            }
            self.raise(parent, ERROR_LOGICAL)?;
            return Ok(None);
        }

        self.initialize(id, &avoid);
        Ok(Some(id))
    }

    /// Construct the node for a target: look up its rule, seed the
    /// dependency buffer, and report rule-less targets that cannot stand
    /// on their own.
    fn create_execution(
        &mut self,
        target: Target,
        link: &Link,
        parent: ExecId,
    ) -> Result<ExecId, Abort> {
        let lookup = if target.depth == 0 {
            self.rules.get(&target)
        } else {
            // Dynamic wrappers fetch the base rule only so that cycle
            // detection sees the same identity; they run nothing.
            self.rules.get(&target.base_target())
        };
        let (rule, param_rule, mapping) = match lookup {
            Err(bits) => return Err(Abort(bits)),
            Ok(None) => (None, None, HashMap::new()),
            Ok(Some(m)) => (Some(m.rule), Some(m.param_rule), m.mapping),
        };

        let targets: Vec<Target> = if target.depth > 0 {
            vec![target.clone()]
        } else {
            match &rule {
                None => vec![target.clone()],
                // Multi-target rules coalesce into a single node.
                Some(rule) => rule.targets.iter().map(|t| t.unparametrized()).collect(),
            }
        };

        let exec = Execution {
            targets,
            rule: rule.clone(),
            param_rule,
            children: Vec::new(),
            parents: {
                let mut parents = SmallMap::new();
                parents.insert(parent, link.clone());
                parents
            },
            job: Job::default(),
            buf_default: VecDeque::new(),
            buf_trivial: VecDeque::new(),
            timestamps_old: Vec::new(),
            mapping_parameter: mapping,
            mapping_variable: HashMap::new(),
            error: 0,
            done: FlagStack::with_depth(target.depth),
            timestamp: None,
            need_build: false,
            checked: false,
            exists: 0,
        };
        let id = self.execs.push(exec);
        for t in self.exec(id).targets.clone() {
            self.by_target.insert(t, id);
        }

        let dynamic_file = target.depth > 0 && target.base == BaseKind::File;
        if !dynamic_file && rule.is_some() {
            // Seed the dependency buffer.  For transients at a dynamic
            // depth, wrap each dependency so the nesting levels line up.
            let rule = rule.unwrap();
            for dep in &rule.deps {
                let mut flat = Vec::new();
                flatten_dep(dep, &mut flat);
                for part in flat {
                    let mut d = (*part).clone();
                    if target.base == BaseKind::Transient {
                        d.add_flags(link.avoid.lowest());
                        for i in 0..target.depth {
                            d = Dep::Dynamic(DynamicDep {
                                flags: link.avoid.get(i + 1),
                                inner: Rc::new(d),
                                flag_places: FlagPlaces::default(),
                            });
                        }
                    }
                    self.exec_mut(id).buf_default.push_back(Link::of_dep(Rc::new(d)));
                }
            }
        } else if rule.is_none() {
            let mut rule_not_found = false;
            if target.depth == 0 {
                match target.base {
                    BaseKind::File => {
                        if link.flags & F_OPTIONAL == 0 {
                            match std::fs::metadata(&target.name) {
                                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                                    self.exec_mut(id).error |= ERROR_BUILD;
                                    rule_not_found = true;
                                }
                                Err(err) => {
                                    print_error_system(&target.name, &err);
                                    self.raise(id, ERROR_BUILD)?;
                                }
                                Ok(_) => {
                                    // A source file: nothing to do.
                                    if self.exec(parent).targets.is_empty()
                                        && !self.options.silent
                                    {
                                        println!(
                                            "No rule for building '{}', but the file exists",
                                            target.name
                                        );
                                    }
                                }
                            }
                        }
                    }
                    BaseKind::Transient => rule_not_found = true,
                }
            }
            if rule_not_found {
                if !self.options.silent {
                    self.print_traces(id, &format!("no rule to build {}", target.format()));
                }
                self.raise(id, ERROR_BUILD)?;
                // The node stays cached even without a rule.
            }
        }
        Ok(id)
    }

    /// Seed a dynamic node with the expansion edge to its base target.
    fn initialize(&mut self, id: ExecId, avoid: &FlagStack) {
        let target = match self.exec(id).targets.first() {
            Some(t) if t.is_dynamic() => t.clone(),
            _ => return,
        };
        debug_assert_eq!(self.exec(id).targets.len(), 1);

        let mut flags_child = avoid.lowest() | F_DYNAMIC;
        if target.base == BaseKind::File {
            flags_child |= F_READ;
        }
        let dep = Rc::new(Dep::direct(
            flags_child,
            target.base,
            Pattern::literal(&target.name),
            // Expansion edges have no place and are skipped in traces.
            Place::Empty,
        ));
        self.exec_mut(id).buf_default.push_back(Link::of_dep(dep));
    }

    /// Propagate a finished child's results to PARENT and remove the edge.
    #[allow(clippy::too_many_arguments)]
    fn unlink(
        &mut self,
        parent: ExecId,
        child: ExecId,
        dep_parent: Option<Rc<Dep>>,
        avoid_parent: &FlagStack,
        dep_child: Rc<Dep>,
        avoid_child: &FlagStack,
        flags_child: Flags,
    ) -> Result<(), Abort> {
        debug_assert!(parent != child);
        debug_assert!(self.exec(child).finished_for(avoid_child));
        if !self.options.keep_going {
            debug_assert_eq!(self.exec(child).error, 0);
        }

        // An expansion edge finished: parse the file as a dependency list.
        if flags_child & F_READ != 0 {
            let mut do_read = self.exec(child).error == 0;
            // An optional list that was never built is simply not read.
            if do_read && flags_child & F_OPTIONAL != 0 && self.exec(child).exists <= 0 {
                do_read = false;
            }
            if do_read {
                self.read_dynamics(
                    parent,
                    avoid_parent.clone(),
                    dep_parent.clone().expect("read edge without dependency"),
                )?;
            }
        }

        // Propagate the timestamp, except over edges whose attributes hide
        // it from the parent.
        if flags_child & (F_EXISTENCE | F_PERSISTENT | F_READ) == 0 {
            if let Some(ts) = self.exec(child).timestamp {
                let p = self.exec_mut(parent);
                if p.timestamp.map_or(true, |t| t < ts) {
                    p.timestamp = Some(ts);
                }
            }
        }

        // A variable dependency binds the file content.
        if flags_child & F_VARIABLE != 0 && self.exec(child).exists > 0 {
            if let Some((name, content)) = self.read_variable(child, &dep_child)? {
                self.exec_mut(parent).mapping_variable.insert(name, content);
            }
        }

        // Variables travel over dynamic wrappers and command-less
        // transients.
        let transparent = self.exec(child).is_dynamic()
            || (matches!(&*dep_child, Dep::Direct(d) if d.base == BaseKind::Transient)
                && self
                    .exec(child)
                    .rule
                    .as_ref()
                    .map_or(false, |r| r.command.is_none()));
        if transparent {
            let vars = self.exec(child).mapping_variable.clone();
            self.exec_mut(parent).mapping_variable.extend(vars);
        }

        self.exec_mut(parent).error |= self.exec(child).error;

        if self.exec(child).need_build && flags_child & (F_EXISTENCE | F_PERSISTENT | F_READ) == 0
        {
            self.exec_mut(parent).need_build = true;
        }

        // Remove both halves of the edge.
        let p = self.exec_mut(parent);
        debug_assert!(p.children.contains(&child));
        p.children.retain(|&c| c != child);
        let removed = self.exec_mut(child).parents.remove(&parent);
        debug_assert!(removed.is_some());
        Ok(())
    }

    /// Parse the freshly built dynamic list file of PARENT and queue the
    /// dependencies it names, re-wrapped one level shallower.
    fn read_dynamics(
        &mut self,
        parent: ExecId,
        avoid: FlagStack,
        dep_this: Rc<Dep>,
    ) -> Result<(), Abort> {
        let target = dep_this.single_target();
        debug_assert!(target.is_dynamic());
        debug_assert_eq!(avoid.depth(), target.depth);

        let filename = target.name.clone();
        let bytes = match std::fs::read(&filename) {
            Ok(bytes) => bytes,
            Err(err) => {
                print_error_system(&filename, &err);
                if !self.options.silent {
                    self.print_traces(
                        parent,
                        &format!("cannot read dynamic dependency {}", target.format()),
                    );
                }
                return self.raise(parent, ERROR_BUILD);
            }
        };

        let list_flags = dep_this.innermost_wrapper_flags();
        let parsed: Vec<Rc<Dep>> = if list_flags & (F_NEWLINE_SEPARATED | F_NUL_SEPARATED) != 0 {
            // Bare filenames without any markup.
            let sep = if list_flags & F_NUL_SEPARATED != 0 {
                b'\0'
            } else {
                b'\n'
            };
            let file_rc: Rc<str> = Rc::from(filename.as_str());
            bytes
                .split(|&b| b == sep)
                .enumerate()
                .filter_map(|(i, chunk)| {
                    let name = String::from_utf8_lossy(chunk);
                    let name = name.trim_end_matches('\r');
                    if name.is_empty() {
                        return None;
                    }
                    Some(Rc::new(Dep::direct(
                        0,
                        BaseKind::File,
                        Pattern::literal(name),
                        Place::in_file(&file_rc, i as u32 + 1, 0),
                    )))
                })
                .collect()
        } else {
            let mut buf = bytes;
            buf.push(0);
            match parse::parse_dynamic(&buf, &filename) {
                Err(err) => {
                    eprintln!("{}", parse::format_error(&buf, &filename, err));
                    if !self.options.silent {
                        self.print_traces(
                            parent,
                            &format!("in dynamic dependency {}", target.format()),
                        );
                    }
                    return self.raise(parent, ERROR_LOGICAL);
                }
                Ok(list) => {
                    if let Some(place) = list.input {
                        place.trace(&format!(
                            "dynamic dependency {} must not contain input redirection",
                            target.format()
                        ));
                        let declared = Target::file(target.name.clone());
                        if !self.options.silent {
                            self.print_traces(
                                parent,
                                &format!("{} is declared here", declared.format()),
                            );
                        }
                        return self.raise(parent, ERROR_LOGICAL);
                    }
                    list.deps
                }
            }
        };

        let mut flat = Vec::new();
        for dep in &parsed {
            flatten_dep(dep, &mut flat);
        }

        // The dynamic wrappers of the expanded dependency, outermost
        // first, as the source of place metadata for the re-wrapping.
        let mut wrappers: Vec<&DynamicDep> = Vec::new();
        let mut walk: &Dep = &dep_this;
        while let Dep::Dynamic(d) = walk {
            wrappers.push(d);
            walk = &d.inner;
        }
        debug_assert_eq!(wrappers.len(), target.depth);

        for j in flat {
            if !j.is_unparametrized() {
                j.place().trace(&format!(
                    "dynamic dependency {} must not contain parametrized dependencies",
                    target.format()
                ));
                if !self.options.silent {
                    self.print_traces(
                        parent,
                        &format!("{} is declared here", target.base_target().format()),
                    );
                }
                self.raise(parent, ERROR_LOGICAL)?;
                continue;
            }
            // A variable dependency cannot be nested two levels deep: the
            // binding would have no execution to land on.
            if target.depth >= 2 {
                if let Dep::Direct(d) = &*j {
                    if d.flags & F_VARIABLE != 0 {
                        j.place().trace(&format!(
                            "variable dependency $[{}] must not appear",
                            d.name.format()
                        ));
                        if !self.options.silent {
                            self.print_traces(
                                parent,
                                &format!(
                                    "within multiply-dynamic dependency {}",
                                    target.format()
                                ),
                            );
                        }
                        self.raise(parent, ERROR_LOGICAL)?;
                        continue;
                    }
                }
            }

            // Re-wrap with one dynamic level less.  Every avoid level
            // moves down by one, and the wrappers' flag places carry over
            // so diagnostics point at the original declaration site.
            let mut avoid_this = avoid.clone();
            avoid_this.pop();
            let mut dep_new = (*j).clone();
            dep_new.add_flags(avoid_this.lowest());
            let innermost = wrappers[target.depth - 1];
            if dep_new.existence_place().is_empty() {
                dep_new.set_existence_place(innermost.flag_places.existence.clone());
            }
            if dep_new.optional_place().is_empty() {
                dep_new.set_optional_place(innermost.flag_places.optional.clone());
            }
            if dep_new.trivial_place().is_empty() {
                dep_new.set_trivial_place(innermost.flag_places.trivial.clone());
            }

            for k in (1..target.depth).rev() {
                avoid_this.pop();
                let mut wrapped = Dep::Dynamic(DynamicDep {
                    flags: avoid_this.lowest(),
                    inner: Rc::new(dep_new),
                    flag_places: FlagPlaces::default(),
                });
                let outer = wrappers[k - 1];
                wrapped.set_existence_place(outer.flag_places.existence.clone());
                wrapped.set_optional_place(outer.flag_places.optional.clone());
                wrapped.set_trivial_place(outer.flag_places.trivial.clone());
                dep_new = wrapped;
            }
            debug_assert_eq!(avoid_this.depth(), 0);

            self.exec_mut(parent)
                .buf_default
                .push_back(Link::of_dep(Rc::new(dep_new)));
        }
        Ok(())
    }

    /// Find a directed cycle that the new edge PARENT -> CHILD would
    /// close, by depth-first search upward from PARENT.  Cycle identity is
    /// the originating parametrized rule, not the target, so two targets
    /// instantiated from the same pattern count as the same node.
    fn find_cycle(&self, parent: ExecId, child: ExecId, link: &Link) -> bool {
        // Files that just have to be present have no rule and cannot be
        // part of a cycle themselves.
        if self.exec(child).param_rule.is_none() {
            return false;
        }
        let mut path = vec![parent];
        self.find_cycle_path(&mut path, child, link)
    }

    fn find_cycle_path(&self, path: &mut Vec<ExecId>, child: ExecId, link: &Link) -> bool {
        if self.same_rule(*path.last().unwrap(), child) {
            self.cycle_print(path, link);
            return true;
        }
        // The ascent passes through rule-less nodes: a dynamic-list node
        // whose file is a plain source has no rule of its own, but a cycle
        // can still run through its expansion edges.
        let parents: Vec<ExecId> = self
            .exec(*path.last().unwrap())
            .parents
            .iter()
            .map(|(k, _)| *k)
            .collect();
        for next in parents {
            path.push(next);
            if self.find_cycle_path(path, child, link) {
                return true;
            }
            path.pop();
        }
        false
    }

    fn same_rule(&self, a: ExecId, b: ExecId) -> bool {
        match (&self.exec(a).param_rule, &self.exec(b).param_rule) {
            (Some(ra), Some(rb)) => {
                self.exec(a).depth() == self.exec(b).depth() && Rc::ptr_eq(ra, rb)
            }
            _ => false,
        }
    }

    /// Report a found cycle, one line per edge.  PATH is the chain from
    /// the proposed parent up to the node matching the proposed child;
    /// LINK is the edge that would have closed the cycle.
    fn cycle_print(&self, path: &[ExecId], link: &Link) {
        debug_assert!(!path.is_empty());
        let link_dep = link.dep.as_ref().unwrap();

        // names[i]: how path[i] is named on its edge from path[i+1].
        let mut names: Vec<String> = Vec::with_capacity(path.len());
        for i in 0..path.len() - 1 {
            let edge = self.exec(path[i]).parents.get(&path[i + 1]).unwrap();
            names.push(edge.dep.as_ref().unwrap().single_target().format());
        }
        names.push(
            self.exec(*path.last().unwrap())
                .parents
                .first()
                .map(|(_, edge)| edge.dep.as_ref().unwrap().single_target().format())
                .unwrap_or_default(),
        );

        for i in (0..path.len()).rev() {
            // Expansion edges are bookkeeping, not user-visible structure.
            if i != 0 {
                let flags = self.exec(path[i - 1]).parents.get(&path[i]).unwrap().flags;
                if flags & F_DYNAMIC != 0 {
                    continue;
                }
            } else if link_dep.flags() & F_DYNAMIC != 0 {
                continue;
            }

            let place = if i == 0 {
                link.place.clone()
            } else {
                self.exec(path[i - 1])
                    .parents
                    .get(&path[i])
                    .unwrap()
                    .place
                    .clone()
            };
            let head = if i == path.len() - 1 {
                if path.len() == 1 || (path.len() == 2 && link_dep.flags() & F_DYNAMIC != 0) {
                    "target must not depend on itself: "
                } else {
                    "cyclic dependency: "
                }
            } else {
                ""
            };
            let depends_on = if i == 0 {
                link_dep.single_target().format()
            } else {
                names[i - 1].clone()
            };
            place.trace(&format!("{}{} depends on {}", head, names[i], depends_on));
        }

        // Two different targets matched the same pattern rule: say so.
        let last = *path.last().unwrap();
        if let Some((_, first_edge)) = self.exec(last).parents.first() {
            let t_last = first_edge.dep.as_ref().unwrap().single_target();
            let t_link = link_dep.single_target();
            if t_link != t_last {
                if let Some(rule) = &self.exec(last).rule {
                    rule.place.trace(&format!(
                        "both {} and {} match the same rule",
                        t_last.base_target().format(),
                        t_link.base_target().format()
                    ));
                }
            }
        }

        self.print_traces(last, "");
    }

    /// Called when the scheduler has reaped this node's child process.
    fn waited(&mut self, id: ExecId, pid: libc::pid_t, status: libc::c_int) -> Result<(), Abort> {
        debug_assert!(self.exec(id).job.started());
        debug_assert_eq!(self.exec(id).job.pid(), pid);
        debug_assert!(self.exec(id).buf_default.is_empty());
        debug_assert!(self.exec(id).buf_trivial.is_empty());
        debug_assert!(self.exec(id).children.is_empty());
        debug_assert_eq!(self.exec(id).done.depth(), 0);

        self.exec_mut(id).done.add_lowest_neg(0);

        // The files may have been built: forget that they were missing.
        if self.exec(id).exists < 0 {
            self.exec_mut(id).exists = 0;
        }

        if job::success(status) {
            self.exec_mut(id).exists = 1;
            for i in 0..self.exec(id).targets.len() {
                let target = self.exec(id).targets[i].clone();
                if target.base != BaseKind::File {
                    continue;
                }
                match std::fs::metadata(&target.name) {
                    Ok(meta) => {
                        let ts = Timestamp::of_metadata(&meta);
                        self.warn_future_file(ts, &target.name);
                        {
                            let exec = self.exec_mut(id);
                            if exec.timestamp.map_or(true, |t| t < ts) {
                                exec.timestamp = Some(ts);
                            }
                        }
                        // A file older than startup was not actually
                        // touched by the command.  Symlinks carry their
                        // referent's time and are exempt.
                        if ts < self.startup {
                            match std::fs::symlink_metadata(&target.name) {
                                Err(err) => {
                                    print_error_system(&target.name, &err);
                                    self.raise(id, ERROR_BUILD)?;
                                }
                                Ok(meta) if !meta.file_type().is_symlink() => {
                                    let place =
                                        self.exec(id).rule.as_ref().unwrap().place.clone();
                                    place.trace(&format!(
                                        "timestamp of file {} after execution of its command is older than {} startup",
                                        target.format(),
                                        dollar_zero()
                                    ));
                                    place.trace(&format!(
                                        "timestamp of {} is {}",
                                        target.format(),
                                        ts.format()
                                    ));
                                    place.trace(&format!(
                                        "startup timestamp is {}",
                                        self.startup.format()
                                    ));
                                    if !self.options.silent {
                                        self.print_traces(id, "");
                                    }
                                    self.raise(id, ERROR_BUILD)?;
                                }
                                Ok(_) => {}
                            }
                        }
                    }
                    Err(_) => {
                        self.exec_mut(id).exists = -1;
                        let rule = self.exec(id).rule.as_ref().unwrap();
                        let place = rule
                            .command
                            .as_ref()
                            .map(|c| c.place.clone())
                            .unwrap_or_else(|| rule.place.clone());
                        place.trace(&format!(
                            "file {} was not built by command",
                            target.format()
                        ));
                        if !self.options.silent {
                            self.print_traces(id, "");
                        }
                        self.raise(id, ERROR_BUILD)?;
                    }
                }
            }
            Ok(())
        } else {
            if !self.options.silent {
                let reason = job::format_status(status);
                let param_rule = Rc::clone(self.exec(id).param_rule.as_ref().unwrap());
                if param_rule.flavor == RuleFlavor::Copy {
                    param_rule.place.trace(&format!(
                        "cp to {} {}",
                        self.exec(id).targets[0].format(),
                        reason
                    ));
                } else {
                    let target = self
                        .exec(id)
                        .parents
                        .first()
                        .unwrap()
                        .1
                        .dep
                        .as_ref()
                        .unwrap()
                        .single_target();
                    param_rule.command.as_ref().unwrap().place.trace(&format!(
                        "command for {} {}",
                        target.format(),
                        reason
                    ));
                }
                self.print_traces(id, "");
            }
            self.remove_if_existing(id, true);
            self.raise(id, ERROR_BUILD)?;
            Ok(())
        }
    }

    /// Remove each file target whose mtime advanced past the pre-command
    /// snapshot, i.e. which the failing command visibly modified.  With
    /// OUTPUT false, only prints the bare minimum.
    fn remove_if_existing(&mut self, id: ExecId, output: bool) -> bool {
        if self.options.no_delete {
            return false;
        }
        let mut removed = false;
        for i in 0..self.exec(id).targets.len() {
            let target = self.exec(id).targets[i].clone();
            if target.base != BaseKind::File {
                continue;
            }
            let meta = match std::fs::metadata(&target.name) {
                Err(_) => continue,
                Ok(meta) => meta,
            };
            let old = self.exec(id).timestamps_old.get(i).copied().flatten();
            if old.map_or(true, |o| o < Timestamp::of_metadata(&meta)) {
                if output {
                    print_info(&format!(
                        "Removing file '{}' because command failed",
                        target.name
                    ));
                }
                removed = true;
                if let Err(err) = std::fs::remove_file(&target.name) {
                    if output {
                        print_error_system(&target.name, &err);
                    } else {
                        eprintln!("{}: unlink: {}", dollar_zero(), err);
                    }
                }
            }
        }
        removed
    }

    /// Read a variable dependency's file into (variable name, content).
    fn read_variable(
        &mut self,
        id: ExecId,
        dep: &Rc<Dep>,
    ) -> Result<Option<(String, String)>, Abort> {
        let target = dep.single_target();
        debug_assert_eq!(target.base, BaseKind::File);
        match std::fs::read(&target.name) {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                let content = trim_ws(&content).to_string();
                let name = match &**dep {
                    Dep::Direct(d) => d.variable_name.clone(),
                    _ => None,
                }
                .unwrap_or_else(|| target.name.clone());
                Ok(Some((name, content)))
            }
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    print_error_system(&target.name, &err);
                }
                match &self.exec(id).rule {
                    None => dep.place().trace(&format!(
                        "file {} was up to date but cannot be found now",
                        target.format()
                    )),
                    Some(rule) => {
                        for rt in &rule.targets {
                            if rt.unparametrized() == target {
                                rt.place.trace(&format!(
                                    "generated file {} was built but cannot be found now",
                                    target.format()
                                ));
                                break;
                            }
                        }
                    }
                }
                if !self.options.silent {
                    self.print_traces(id, "");
                }
                self.raise(id, ERROR_BUILD)?;
                Ok(None)
            }
        }
    }

    /// Create FILENAME with the hardcoded content of COMMAND.
    fn write_content(&mut self, id: ExecId, filename: &str, command: &Command) -> Result<(), Abort> {
        let mut content = String::new();
        for line in command.lines() {
            content.push_str(line);
            content.push('\n');
        }
        if let Err(err) = std::fs::write(filename, content) {
            print_error_system(filename, &err);
            if !self.options.silent {
                command
                    .place
                    .trace(&format!("error creating '{}'", filename));
            }
            self.raise(id, ERROR_BUILD)?;
            return Ok(());
        }
        self.exec_mut(id).exists = 1;
        Ok(())
    }

    /// Files should not be newer than the last reap; warn about clock skew
    /// on shared filesystems.
    fn warn_future_file(&self, ts: Timestamp, name: &str) {
        if self.timestamp_last < ts {
            print_warning(&format!(
                "File '{}' has modification time in the future",
                name
            ));
        }
    }

    /// Echo the command about to run.
    fn print_command(&self, id: ExecId) {
        if self.options.silent {
            return;
        }
        let exec = self.exec(id);
        let rule = exec.rule.as_ref().unwrap();
        match rule.flavor {
            RuleFlavor::Hardcoded => {
                println!("Creating {}", exec.targets[0].name);
                return;
            }
            RuleFlavor::Copy => {
                println!(
                    "cp {} {}",
                    rule.input.as_ref().unwrap().unparametrized().unwrap(),
                    exec.targets[0].name
                );
                return;
            }
            RuleFlavor::Command => {}
        }
        let command = rule.command.as_ref().unwrap();

        // Redirections and parameter values precede the command; variable
        // assignments are not echoed.
        let mut prefix = String::new();
        if let Some(i) = rule.redirect_index {
            prefix.push_str(&format!(">{}", rule.targets[i].name.unparametrized().unwrap()));
        }
        if let Some(input) = &rule.input {
            if !prefix.is_empty() {
                prefix.push(' ');
            }
            prefix.push_str(&format!("<{}", input.unparametrized().unwrap()));
        }
        let mut params: Vec<(&String, &String)> = exec.mapping_parameter.iter().collect();
        params.sort();
        for (k, v) in params {
            if !prefix.is_empty() {
                prefix.push(' ');
            }
            prefix.push_str(&format!("{}={}", k, v));
        }

        if prefix.is_empty() {
            for line in command.lines() {
                println!("{}", line);
            }
        } else if command.lines().count() == 1 {
            println!("{}: {}", prefix, command.text);
        } else {
            println!("{}:", prefix);
            for line in command.lines() {
                println!("{}", line);
            }
        }
    }

    /// Print the trace chain from this node up to a root dependency.  TEXT
    /// is the leading message; pass "" when the lines above already said
    /// what happened.
    fn print_traces(&self, id: ExecId, text: &str) {
        let mut execution = id;
        // An error directly on the root was an error on the command line;
        // nothing to trace.
        if self.exec(execution).targets.is_empty() {
            return;
        }

        let mut first = true;
        if let Some(param_rule) = &self.exec(execution).param_rule {
            if !text.is_empty() {
                param_rule.place.trace(text);
                first = false;
            }
        }

        let first_edge = match self.exec(execution).parents.first() {
            None => return,
            Some((_, edge)) => edge,
        };
        let mut text_parent = first_edge
            .dep
            .as_ref()
            .map(|d| d.single_target().format())
            .unwrap_or_default();

        loop {
            let (parent, edge) = match self.exec(execution).parents.first() {
                None => return,
                Some((&parent, edge)) => (parent, edge.clone()),
            };
            if self.exec(parent).targets.is_empty() {
                if first && !text.is_empty() && !self.options.silent {
                    print_error(&format!("No rule to build {}", text_parent));
                }
                return;
            }

            let text_child = text_parent.clone();
            text_parent = self
                .exec(parent)
                .parents
                .first()
                .and_then(|(_, e)| e.dep.as_ref())
                .map(|d| d.single_target().format())
                .unwrap_or_default();

            // Don't show expansion edges.
            if edge.flags & F_DYNAMIC != 0 {
                execution = parent;
                continue;
            }

            let msg = if first && !text.is_empty() {
                first = false;
                format!("{}, needed by {}", text, text_parent)
            } else {
                format!("{} is needed by {}", text_child, text_parent)
            };
            edge.place.trace(&msg);
            execution = parent;
        }
    }

    /// Whether all edges have been fully torn down; every finished run
    /// ends in this state.  Test support.
    #[cfg(test)]
    fn graph_is_torn_down(&self) -> bool {
        (0..self.execs.len()).all(|i| self.exec(ExecId(i)).children.is_empty())
    }
}
