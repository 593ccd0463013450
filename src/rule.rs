//! Rules and the rule set.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::dep::{anchoring_dominates, BaseKind, Dep, Pattern, Target};
use crate::error::{print_error, ErrorBits, Place, ERROR_LOGICAL};

/// A command token: shell text for command rules, file content for
/// hardcoded-content rules.  Carries its own place.
#[derive(Clone, Debug)]
pub struct Command {
    pub place: Place,
    pub text: String,
}

impl Command {
    pub fn lines(&self) -> std::str::Lines {
        self.text.lines()
    }
}

/// The three disjoint rule flavors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleFlavor {
    /// Runs a shell command (or nothing, when the rule has no body).
    Command,
    /// Writes fixed content into the single file target.
    Hardcoded,
    /// Copies the input file onto the single file target.
    Copy,
}

/// One target of a rule, possibly parametrized.
#[derive(Clone, Debug)]
pub struct RuleTarget {
    pub base: BaseKind,
    pub name: Pattern,
    pub place: Place,
}

impl RuleTarget {
    pub fn unparametrized(&self) -> Target {
        Target {
            base: self.base,
            depth: 0,
            name: self
                .name
                .unparametrized()
                .expect("unparametrized() on parametrized rule target")
                .to_string(),
        }
    }

    pub fn format(&self) -> String {
        match self.base {
            BaseKind::File => format!("'{}'", self.name.format()),
            BaseKind::Transient => format!("'@{}'", self.name.format()),
        }
    }
}

/// An immutable build rule.
#[derive(Debug)]
pub struct Rule {
    pub targets: Vec<RuleTarget>,
    /// Dependencies in declaration order; duplicates are kept.
    pub deps: Vec<Rc<Dep>>,
    /// The place of the rule as a whole.
    pub place: Place,
    pub command: Option<Command>,
    pub flavor: RuleFlavor,
    /// The stdin-redirection filename for command rules (always also one of
    /// the file dependencies), or the source file for copy rules.
    pub input: Option<Pattern>,
    /// Index into TARGETS of the file receiving the command's stdout.
    pub redirect_index: Option<usize>,
}

impl Rule {
    pub fn is_parametrized(&self) -> bool {
        self.targets.iter().any(|t| t.name.n_params() > 0)
    }

    /// Validate parameter usage: every parameter used in a dependency or in
    /// the input filename must occur in the targets, and multi-target rules
    /// must use the same parameters in every target, or instantiation would
    /// leave holes.
    pub fn check_parameters(&self) -> Result<(), ErrorBits> {
        let params: HashSet<&str> = self.targets[0].name.params().collect();
        for target in &self.targets[1..] {
            let other: HashSet<&str> = target.name.params().collect();
            if other != params {
                for p in params.symmetric_difference(&other) {
                    target
                        .place
                        .trace(&format!("parameter ${} must be used in all targets", p));
                    self.place
                        .trace(&format!("in rule for {}", self.targets[0].format()));
                    return Err(ERROR_LOGICAL);
                }
            }
        }
        let mut patterns: Vec<(&Pattern, Place)> = Vec::new();
        for dep in &self.deps {
            collect_patterns(dep, &mut patterns);
        }
        if let Some(input) = &self.input {
            patterns.push((input, self.place.clone()));
        }
        for (pattern, place) in patterns {
            for param in pattern.params() {
                if !params.contains(param) {
                    place.trace(&format!("parameter ${} is not used", param));
                    self.targets[0]
                        .place
                        .trace(&format!("in target {}", self.targets[0].format()));
                    return Err(ERROR_LOGICAL);
                }
            }
        }
        Ok(())
    }

    /// The same rule with MAPPING substituted everywhere.  Unparametrized
    /// rules are returned as-is.
    pub fn instantiate(rule: &Rc<Rule>, mapping: &HashMap<String, String>) -> Rc<Rule> {
        if !rule.is_parametrized() {
            return Rc::clone(rule);
        }
        Rc::new(Rule {
            targets: rule
                .targets
                .iter()
                .map(|t| RuleTarget {
                    base: t.base,
                    name: t.name.instantiate(mapping),
                    place: t.place.clone(),
                })
                .collect(),
            deps: rule
                .deps
                .iter()
                .map(|d| Rc::new(d.instantiate(mapping)))
                .collect(),
            place: rule.place.clone(),
            command: rule.command.clone(),
            flavor: rule.flavor,
            input: rule.input.as_ref().map(|i| i.instantiate(mapping)),
            redirect_index: rule.redirect_index,
        })
    }
}

fn collect_patterns<'a>(dep: &'a Dep, out: &mut Vec<(&'a Pattern, Place)>) {
    match dep {
        Dep::Direct(d) => out.push((&d.name, d.place.clone())),
        Dep::Dynamic(d) => collect_patterns(&d.inner, out),
        Dep::Concat(parts) => {
            for part in parts {
                collect_patterns(part, out);
            }
        }
    }
}

/// A successful rule lookup: the instantiated rule, the rule it was derived
/// from (the identity used for strong-cycle detection), and the parameter
/// binding.
#[derive(Debug)]
pub struct RuleMatch {
    pub rule: Rc<Rule>,
    pub param_rule: Rc<Rule>,
    pub mapping: HashMap<String, String>,
}

/// The set of all rules, indexed for lookup.
#[derive(Default)]
pub struct RuleSet {
    /// Unparametrized rules by each of their targets.
    unparametrized: HashMap<Target, Rc<Rule>>,
    /// All parametrized rules, matched by linear scan.
    parametrized: Vec<Rc<Rule>>,
}

impl RuleSet {
    /// Add rules, checking for duplicate unparametrized targets.
    pub fn add(&mut self, rules: Vec<Rc<Rule>>) -> Result<(), ErrorBits> {
        for rule in rules {
            if rule.is_parametrized() {
                self.parametrized.push(rule);
                continue;
            }
            for target in &rule.targets {
                let target = target.unparametrized();
                if let Some(previous) = self.unparametrized.get(&target) {
                    rule.place
                        .trace(&format!("duplicate rule for {}", target.format()));
                    previous.place.trace("previous definition");
                    return Err(ERROR_LOGICAL);
                }
                self.unparametrized.insert(target, Rc::clone(&rule));
            }
        }
        Ok(())
    }

    /// Match TARGET to a rule and return the instantiated rule, or None
    /// when no rule matches.  Multiple co-minimal parametrized matches are
    /// a logical error.
    pub fn get(&self, target: &Target) -> Result<Option<RuleMatch>, ErrorBits> {
        assert_eq!(target.depth, 0);

        // Unparametrized rules are unique per target by construction.
        if let Some(rule) = self.unparametrized.get(target) {
            return Ok(Some(RuleMatch {
                rule: Rc::clone(rule),
                param_rule: Rc::clone(rule),
                mapping: HashMap::new(),
            }));
        }

        // Search for the minimal parametrized rules under the dominance
        // order.  All entries of BEST are mutually non-dominating.
        let mut best: Vec<(
            &Rc<Rule>,
            HashMap<String, String>,
            Vec<(usize, usize)>,
        )> = Vec::new();

        'rules: for rule in &self.parametrized {
            let matched = rule.targets.iter().find_map(|t| {
                if t.base != target.base {
                    return None;
                }
                t.name.matches(&target.name)
            });
            let (mapping, anchoring) = match matched {
                None => continue,
                Some(m) => m,
            };

            for (_, _, existing) in &best {
                if anchoring_dominates(existing, &anchoring) {
                    continue 'rules;
                }
            }
            if best
                .iter()
                .all(|(_, _, existing)| anchoring_dominates(&anchoring, existing))
            {
                best.clear();
            }
            best.push((rule, mapping, anchoring));
        }

        if best.is_empty() {
            return Ok(None);
        }
        if best.len() > 1 {
            print_error(&format!(
                "Multiple minimal rules for target {}",
                target.format()
            ));
            for (rule, _, _) in &best {
                rule.place
                    .trace(&format!("rule with target {}", rule.targets[0].format()));
            }
            return Err(ERROR_LOGICAL);
        }

        let (rule, mapping, _) = best.pop().unwrap();
        Ok(Some(RuleMatch {
            rule: Rule::instantiate(rule, &mapping),
            param_rule: Rc::clone(rule),
            mapping,
        }))
    }
}
