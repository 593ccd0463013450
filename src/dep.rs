//! Targets, parametrized names, and dependency expressions.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::Place;
use crate::flags::{Flags, F_ALL};

/// What a depth-zero target is: a file on disk, or a transient that exists
/// only as an in-memory name for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BaseKind {
    File,
    Transient,
}

/// A build target.  DEPTH counts dynamic wrappers: `[A]` has depth one,
/// `[[A]]` depth two.  Equality is structural; targets key the execution
/// cache.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    pub base: BaseKind,
    pub depth: usize,
    pub name: String,
}

impl Target {
    pub fn file(name: impl Into<String>) -> Target {
        Target {
            base: BaseKind::File,
            depth: 0,
            name: name.into(),
        }
    }

    pub fn transient(name: impl Into<String>) -> Target {
        Target {
            base: BaseKind::Transient,
            depth: 0,
            name: name.into(),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.depth > 0
    }

    /// The same target without dynamic wrappers.
    pub fn base_target(&self) -> Target {
        Target {
            base: self.base,
            depth: 0,
            name: self.name.clone(),
        }
    }

    /// Quoted form for error output, e.g. `'x.o'`, `'@all'`, `['deps']`.
    pub fn format(&self) -> String {
        let mut inner = match self.base {
            BaseKind::File => format!("'{}'", self.name),
            BaseKind::Transient => format!("'@{}'", self.name),
        };
        for _ in 0..self.depth {
            inner = format!("[{}]", inner);
        }
        inner
    }
}

/// A target or dependency name with `$NAME` parameters.  Literal runs are
/// merged and two parameters are never adjacent (the parser rejects that,
/// since such a pattern has no unique decomposition).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    parts: Vec<Part>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Part {
    Lit(String),
    Param(String),
}

impl Pattern {
    pub fn literal(name: impl Into<String>) -> Pattern {
        Pattern {
            parts: vec![Part::Lit(name.into())],
        }
    }

    pub fn new(parts: Vec<Part>) -> Pattern {
        // Normalize: merge neighboring literals so matching can assume
        // alternation.
        let mut merged: Vec<Part> = Vec::with_capacity(parts.len());
        for part in parts {
            match (merged.last_mut(), part) {
                (Some(Part::Lit(prev)), Part::Lit(next)) => prev.push_str(&next),
                (_, part) => merged.push(part),
            }
        }
        if merged.is_empty() {
            merged.push(Part::Lit(String::new()));
        }
        Pattern { parts: merged }
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn n_params(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, Part::Param(_)))
            .count()
    }

    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Param(name) => Some(name.as_str()),
            Part::Lit(_) => None,
        })
    }

    /// The plain name, when the pattern has no parameters.
    pub fn unparametrized(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [Part::Lit(name)] => Some(name),
            _ => None,
        }
    }

    /// Replace every parameter bound in MAPPING by its value.
    pub fn instantiate(&self, mapping: &HashMap<String, String>) -> Pattern {
        Pattern::new(
            self.parts
                .iter()
                .map(|part| match part {
                    Part::Lit(s) => Part::Lit(s.clone()),
                    Part::Param(name) => match mapping.get(name) {
                        Some(value) => Part::Lit(value.clone()),
                        None => Part::Param(name.clone()),
                    },
                })
                .collect(),
        )
    }

    /// Match NAME against the pattern.  Parameters match non-empty spans;
    /// a repeated parameter must match the same text each time.  On
    /// success, returns the parameter binding and the anchoring: the byte
    /// interval each parameter matched, in declaration order.  When several
    /// decompositions exist the leftmost-shortest one is chosen.
    pub fn matches(&self, name: &str) -> Option<(HashMap<String, String>, Vec<(usize, usize)>)> {
        let mut mapping = HashMap::new();
        let mut anchoring = Vec::new();
        if match_parts(&self.parts, name, 0, &mut mapping, &mut anchoring) {
            Some((mapping, anchoring))
        } else {
            None
        }
    }

    pub fn format(&self) -> String {
        let mut ret = String::new();
        for part in &self.parts {
            match part {
                Part::Lit(s) => ret.push_str(s),
                Part::Param(name) => {
                    ret.push('$');
                    ret.push_str(name);
                }
            }
        }
        ret
    }
}

fn match_parts(
    parts: &[Part],
    name: &str,
    pos: usize,
    mapping: &mut HashMap<String, String>,
    anchoring: &mut Vec<(usize, usize)>,
) -> bool {
    let (part, rest) = match parts.split_first() {
        None => return pos == name.len(),
        Some(x) => x,
    };
    match part {
        Part::Lit(lit) => {
            name[pos..].starts_with(lit.as_str())
                && match_parts(rest, name, pos + lit.len(), mapping, anchoring)
        }
        Part::Param(param) => {
            // A parameter is always followed by a literal or the end.
            let ends: Vec<usize> = match rest.first() {
                None => vec![name.len()],
                Some(Part::Lit(lit)) => name[pos..]
                    .match_indices(lit.as_str())
                    .map(|(i, _)| pos + i)
                    .collect(),
                Some(Part::Param(_)) => unreachable!("adjacent parameters"),
            };
            for end in ends {
                if end <= pos {
                    continue; // parameters match non-empty spans
                }
                let value = &name[pos..end];
                if let Some(prev) = mapping.get(param) {
                    if prev != value {
                        continue;
                    }
                }
                let inserted = mapping
                    .insert(param.clone(), value.to_string())
                    .is_none();
                anchoring.push((pos, end));
                if match_parts(rest, name, end, mapping, anchoring) {
                    return true;
                }
                anchoring.pop();
                if inserted {
                    mapping.remove(param);
                }
            }
            false
        }
    }
}

/// Whether anchoring A dominates anchoring B: every parameter interval of A
/// lies within some parameter interval of B, i.e. A binds its parameters to
/// smaller pieces of the target name and is the more specific match.  Equal
/// anchorings dominate each other.
pub fn anchoring_dominates(a: &[(usize, usize)], b: &[(usize, usize)]) -> bool {
    a.iter()
        .all(|&(sa, ea)| b.iter().any(|&(sb, eb)| sb <= sa && ea <= eb))
}

/// Places of the individual flags on a dependency, kept so that errors
/// about a flag point at where the flag was written rather than at the
/// dependency as a whole.
#[derive(Clone, Debug, Default)]
pub struct FlagPlaces {
    pub existence: Place,
    pub optional: Place,
    pub trivial: Place,
}

/// A direct dependency on a file or transient.
#[derive(Clone, Debug)]
pub struct DirectDep {
    pub flags: Flags,
    pub base: BaseKind,
    pub name: Pattern,
    pub place: Place,
    /// Explicit variable name for `$[NAME=file]` dependencies.
    pub variable_name: Option<String>,
    pub flag_places: FlagPlaces,
}

/// One level of dynamic wrapping: the inner dependency names a file whose
/// content is itself a dependency list.
#[derive(Clone, Debug)]
pub struct DynamicDep {
    pub flags: Flags,
    pub inner: Rc<Dep>,
    pub flag_places: FlagPlaces,
}

/// A dependency expression.  The innermost base of a dynamic dependency is
/// always a direct dependency.
#[derive(Clone, Debug)]
pub enum Dep {
    Direct(DirectDep),
    Dynamic(DynamicDep),
    /// A parenthesized group; the engine flattens it in declaration order.
    Concat(Vec<Rc<Dep>>),
}

impl Dep {
    pub fn direct(flags: Flags, base: BaseKind, name: Pattern, place: Place) -> Dep {
        Dep::Direct(DirectDep {
            flags,
            base,
            name,
            place,
            variable_name: None,
            flag_places: FlagPlaces::default(),
        })
    }

    /// The expression's own (outermost) flags.
    pub fn flags(&self) -> Flags {
        match self {
            Dep::Direct(d) => d.flags,
            Dep::Dynamic(d) => d.flags,
            Dep::Concat(_) => 0,
        }
    }

    /// OR flags into the outermost level; on a group, into every element.
    pub fn add_flags(&mut self, flags: Flags) {
        match self {
            Dep::Direct(d) => d.flags |= flags & F_ALL,
            Dep::Dynamic(d) => d.flags |= flags & F_ALL,
            Dep::Concat(parts) => {
                for part in parts {
                    Rc::make_mut(part).add_flags(flags);
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Dep::Direct(_) => 0,
            Dep::Dynamic(d) => 1 + d.inner.depth(),
            Dep::Concat(_) => 0,
        }
    }

    /// The innermost direct dependency.  Only valid once groups have been
    /// flattened away, which the engine does before any of this is needed.
    pub fn innermost(&self) -> &DirectDep {
        match self {
            Dep::Direct(d) => d,
            Dep::Dynamic(d) => d.inner.innermost(),
            Dep::Concat(_) => panic!("innermost() on a dependency group"),
        }
    }

    /// Flags of the dynamic wrapper directly around the base, which govern
    /// how the base file's content is parsed.  Zero for direct deps.
    pub fn innermost_wrapper_flags(&self) -> Flags {
        match self {
            Dep::Dynamic(d) if matches!(&*d.inner, Dep::Direct(_)) => d.flags,
            Dep::Dynamic(d) => d.inner.innermost_wrapper_flags(),
            _ => 0,
        }
    }

    /// The target this dependency denotes, with its dynamic depth.  The
    /// name must be unparametrized.
    pub fn single_target(&self) -> Target {
        let base = self.innermost();
        let name = base
            .name
            .unparametrized()
            .expect("single_target on a parametrized dependency")
            .to_string();
        Target {
            base: base.base,
            depth: self.depth(),
            name,
        }
    }

    pub fn place(&self) -> Place {
        match self {
            Dep::Direct(d) => d.place.clone(),
            Dep::Dynamic(d) => d.inner.place(),
            Dep::Concat(parts) => parts.first().map_or(Place::Empty, |p| p.place()),
        }
    }

    pub fn is_unparametrized(&self) -> bool {
        match self {
            Dep::Direct(d) => d.name.n_params() == 0,
            Dep::Dynamic(d) => d.inner.is_unparametrized(),
            Dep::Concat(parts) => parts.iter().all(|p| p.is_unparametrized()),
        }
    }

    pub fn instantiate(&self, mapping: &HashMap<String, String>) -> Dep {
        match self {
            Dep::Direct(d) => Dep::Direct(DirectDep {
                name: d.name.instantiate(mapping),
                ..d.clone()
            }),
            Dep::Dynamic(d) => Dep::Dynamic(DynamicDep {
                flags: d.flags,
                inner: Rc::new(d.inner.instantiate(mapping)),
                flag_places: d.flag_places.clone(),
            }),
            Dep::Concat(parts) => Dep::Concat(
                parts
                    .iter()
                    .map(|p| Rc::new(p.instantiate(mapping)))
                    .collect(),
            ),
        }
    }

    pub fn flag_places(&self) -> Option<&FlagPlaces> {
        match self {
            Dep::Direct(d) => Some(&d.flag_places),
            Dep::Dynamic(d) => Some(&d.flag_places),
            Dep::Concat(_) => None,
        }
    }

    pub fn existence_place(&self) -> Place {
        self.flag_places()
            .map_or(Place::Empty, |p| p.existence.clone())
    }

    pub fn optional_place(&self) -> Place {
        self.flag_places()
            .map_or(Place::Empty, |p| p.optional.clone())
    }

    pub fn trivial_place(&self) -> Place {
        self.flag_places()
            .map_or(Place::Empty, |p| p.trivial.clone())
    }

    pub fn set_existence_place(&mut self, place: Place) {
        if let Some(p) = self.flag_places_mut() {
            p.existence = place;
        }
    }

    pub fn set_optional_place(&mut self, place: Place) {
        if let Some(p) = self.flag_places_mut() {
            p.optional = place;
        }
    }

    pub fn set_trivial_place(&mut self, place: Place) {
        if let Some(p) = self.flag_places_mut() {
            p.trivial = place;
        }
    }

    fn flag_places_mut(&mut self) -> Option<&mut FlagPlaces> {
        match self {
            Dep::Direct(d) => Some(&mut d.flag_places),
            Dep::Dynamic(d) => Some(&mut d.flag_places),
            Dep::Concat(_) => None,
        }
    }
}
