//! Parser for rule files and dynamic dependency lists.
//!
//! The surface syntax:
//!
//! ```text
//! # build the program from two objects
//! prog: main.o lib.o { cc -o prog main.o lib.o }
//! $X.o: $X.c { cc -c -o $X.o $X.c }
//! @all: prog;
//! version = { 1.2 }
//! prog.conf = 'default.conf';
//! A: [deps] ?opt !exists &lazy $[flags] <input { sort }
//! ```
//!
//! Dependency lists reuse the same sublanguage both in rules and in dynamic
//! list files, so `read_dep` is shared between the two entry points.

use std::rc::Rc;

use crate::dep::{BaseKind, Dep, DirectDep, DynamicDep, FlagPlaces, Part, Pattern};
use crate::error::Place;
use crate::flags::*;
use crate::rule::{Command, Rule, RuleFlavor, RuleTarget};
use crate::scanner::{ParseResult, Scanner};

pub struct Parser<'text> {
    scanner: Scanner<'text>,
    filename: Rc<str>,
    /// Places come from the rule file, or from the command line when
    /// parsing argument dependencies.
    arg_mode: bool,
    /// Input redirection seen in the current dependency list.
    input: Option<(Pattern, Place)>,
}

/// The contents of one dynamic dependency list file.
pub struct DepList {
    pub deps: Vec<Rc<Dep>>,
    /// Place of an input redirection, which is not allowed in dynamic
    /// lists; the caller rejects it.
    pub input: Option<Place>,
}

/// Parse a whole rule file.  BUF must be nul-terminated.
pub fn parse_rules(buf: &[u8], filename: &str) -> ParseResult<Vec<Rc<Rule>>> {
    let mut parser = Parser::new(buf, filename);
    let mut rules = Vec::new();
    while let Some(rule) = parser.read_rule()? {
        rules.push(Rc::new(rule));
    }
    Ok(rules)
}

/// Parse a dynamic dependency list file.  BUF must be nul-terminated.
pub fn parse_dynamic(buf: &[u8], filename: &str) -> ParseResult<DepList> {
    let mut parser = Parser::new(buf, filename);
    let deps = parser.read_deps(&['\0'])?;
    Ok(DepList {
        deps,
        input: parser.input.take().map(|(_, place)| place),
    })
}

/// Parse dependencies given on the command line.
pub fn parse_args(args: &[String]) -> ParseResult<Vec<Rc<Dep>>> {
    let mut buf = args.join(" ").into_bytes();
    buf.push(0);
    let mut parser = Parser::new(&buf, "");
    parser.arg_mode = true;
    let deps = parser.read_deps(&['\0'])?;
    if let Some((_, _)) = parser.input {
        return Err(crate::scanner::ParseError {
            msg: "input redirection using '<' must not be used on the command line".to_string(),
            ofs: 0,
        });
    }
    Ok(deps)
}

/// Render a parse error with its source context.  FILENAME is shown in the
/// header line.
pub fn format_error(buf: &[u8], filename: &str, err: crate::scanner::ParseError) -> String {
    Scanner::new(buf).format_parse_error(filename, err)
}

const NAME_DELIMITERS: &str = " \t\r\n:;{}[]()<>=#'\"!?&$%\0";

impl<'text> Parser<'text> {
    pub fn new(buf: &'text [u8], filename: &str) -> Parser<'text> {
        Parser {
            scanner: Scanner::new(buf),
            filename: Rc::from(filename),
            arg_mode: false,
            input: None,
        }
    }

    fn place(&self) -> Place {
        if self.arg_mode {
            Place::Argument
        } else {
            self.scanner.place(&self.filename)
        }
    }

    fn skip_space(&mut self) {
        loop {
            match self.scanner.peek() {
                ' ' | '\t' | '\r' | '\n' => self.scanner.next(),
                '#' => loop {
                    match self.scanner.read() {
                        '\0' => {
                            self.scanner.back();
                            break;
                        }
                        '\n' => break,
                        _ => {}
                    }
                },
                _ => return,
            }
        }
    }

    /// Read one rule, or None at end of file.
    fn read_rule(&mut self) -> ParseResult<Option<Rule>> {
        self.skip_space();
        if self.scanner.peek() == '\0' {
            return Ok(None);
        }
        if self.scanner.peek() == '%' {
            return self
                .scanner
                .parse_error("'%' directives are not supported");
        }

        // Targets up to ':' or '='.
        let mut targets = Vec::new();
        let mut redirect_index = None;
        loop {
            self.skip_space();
            match self.scanner.peek() {
                ':' | '=' => break,
                '\0' => return self.scanner.parse_error("expected ':' or '='"),
                _ => {}
            }
            let place = self.place();
            let redirect = self.scanner.skip('>');
            let transient = self.scanner.skip('@');
            let name = match self.read_name()? {
                Some((name, _)) => name,
                None => {
                    return self
                        .scanner
                        .parse_error("expected a target name")
                }
            };
            if redirect {
                if transient {
                    return self
                        .scanner
                        .parse_error("output redirection using '>' must be used with a file");
                }
                if redirect_index.is_some() {
                    return self
                        .scanner
                        .parse_error("duplicate output redirection using '>'");
                }
                redirect_index = Some(targets.len());
            }
            targets.push(RuleTarget {
                base: if transient {
                    BaseKind::Transient
                } else {
                    BaseKind::File
                },
                name,
                place,
            });
        }
        if targets.is_empty() {
            return self.scanner.parse_error("expected a target name");
        }
        let place = targets[0].place.clone();

        self.input = None;
        let rule = match self.scanner.read() {
            ':' => {
                let deps = self.read_deps(&[';', '{'])?;
                let command = match self.scanner.read() {
                    ';' => None,
                    '{' => Some(self.read_command()?),
                    _ => {
                        self.scanner.back();
                        return self
                            .scanner
                            .parse_error("expected a command using '{', or ';'");
                    }
                };
                let input = self.input.take();
                if command.is_none() && input.is_some() {
                    return self
                        .scanner
                        .parse_error("input redirection using '<' must be used with a command");
                }
                Rule {
                    targets,
                    deps,
                    place,
                    command,
                    flavor: RuleFlavor::Command,
                    input: input.map(|(name, _)| name),
                    redirect_index,
                }
            }
            '=' => self.read_assignment_rule(targets, redirect_index, place)?,
            _ => unreachable!(),
        };
        Ok(Some(rule))
    }

    /// The `A = { content }` and `A = 'source';` rule forms.
    fn read_assignment_rule(
        &mut self,
        targets: Vec<RuleTarget>,
        redirect_index: Option<usize>,
        place: Place,
    ) -> ParseResult<Rule> {
        if redirect_index.is_some() {
            return self
                .scanner
                .parse_error("output redirection using '>' must not be used with '='");
        }
        if targets.len() != 1 {
            return self
                .scanner
                .parse_error("multiple targets must not be used with '='");
        }
        if targets[0].base != BaseKind::File {
            return self
                .scanner
                .parse_error("transient targets cannot be used with copy rule");
        }
        self.skip_space();
        if self.scanner.peek() == '{' {
            // Hardcoded content.
            self.scanner.next();
            let command = self.read_command()?;
            return Ok(Rule {
                targets,
                deps: Vec::new(),
                place,
                command: Some(command),
                flavor: RuleFlavor::Hardcoded,
                input: None,
                redirect_index: None,
            });
        }

        // Copy rule: an optional '!' then the source filename.
        let mut flags = 0;
        let mut flag_places = FlagPlaces::default();
        if self.scanner.peek() == '!' {
            flag_places.existence = self.place();
            self.scanner.next();
            flags |= F_EXISTENCE;
            self.skip_space();
        }
        let dep_place = self.place();
        let source = match self.read_name()? {
            Some((name, _)) => name,
            None => {
                return self
                    .scanner
                    .parse_error("expected a filename after '='")
            }
        };
        self.skip_space();
        self.scanner.expect(';')?;
        let dep = Dep::Direct(DirectDep {
            flags,
            base: BaseKind::File,
            name: source.clone(),
            place: dep_place,
            variable_name: None,
            flag_places,
        });
        Ok(Rule {
            targets,
            deps: vec![Rc::new(dep)],
            place,
            command: None,
            flavor: RuleFlavor::Copy,
            input: Some(source),
            redirect_index: None,
        })
    }

    /// Read dependencies until one of the UNTIL characters, which is left
    /// unconsumed.
    fn read_deps(&mut self, until: &[char]) -> ParseResult<Vec<Rc<Dep>>> {
        let mut deps = Vec::new();
        loop {
            self.skip_space();
            let c = self.scanner.peek();
            if until.contains(&c) {
                return Ok(deps);
            }
            if c == '\0' {
                return self.scanner.parse_error("unexpected end of file");
            }
            if !self.read_dep(&mut deps)? {
                return self.scanner.parse_error("expected a dependency");
            }
        }
    }

    /// Read one dependency expression, pushing the result onto OUT.  A
    /// bracket group `[a b]` denotes one dynamic dependency per element, so
    /// this can push more than one.  Returns false when no dependency
    /// starts here.
    fn read_dep(&mut self, out: &mut Vec<Rc<Dep>>) -> ParseResult<bool> {
        self.skip_space();

        // Flags preceding the dependency proper.
        let mut flags: Flags = 0;
        let mut flag_places = FlagPlaces::default();
        loop {
            self.skip_space();
            match self.scanner.peek() {
                '!' => {
                    flag_places.existence = self.place();
                    self.scanner.next();
                    flags |= F_EXISTENCE;
                }
                '?' => {
                    flag_places.optional = self.place();
                    self.scanner.next();
                    flags |= F_OPTIONAL;
                }
                '&' => {
                    flag_places.trivial = self.place();
                    self.scanner.next();
                    flags |= F_TRIVIAL;
                }
                '-' => {
                    let place = self.place();
                    self.scanner.next();
                    match self.scanner.read() {
                        'p' => {
                            flag_places.existence = place;
                            flags |= F_PERSISTENT;
                        }
                        'o' => {
                            flag_places.optional = place;
                            flags |= F_OPTIONAL;
                        }
                        't' => {
                            flag_places.trivial = place;
                            flags |= F_TRIVIAL;
                        }
                        'n' => flags |= F_NEWLINE_SEPARATED,
                        '0' => flags |= F_NUL_SEPARATED,
                        c => {
                            self.scanner.back();
                            return self
                                .scanner
                                .parse_error(format!("invalid flag '-{}'", c));
                        }
                    }
                }
                _ => break,
            }
        }

        // '$' opens a variable dependency only when followed by '[';
        // otherwise it starts a parametrized name.
        let variable = self.scanner.peek() == '$' && {
            self.scanner.next();
            let bracket = self.scanner.peek() == '[';
            self.scanner.back();
            bracket
        };

        match self.scanner.peek() {
            '[' => {
                // Dynamic dependencies: each element gets its own wrapper
                // carrying the prefix flags.
                self.scanner.next();
                let inner = self.read_deps(&[']'])?;
                self.scanner.expect(']')?;
                if inner.is_empty() {
                    return self
                        .scanner
                        .parse_error("expected a dependency inside '['");
                }
                for dep in inner {
                    out.push(Rc::new(Dep::Dynamic(DynamicDep {
                        flags,
                        inner: dep,
                        flag_places: flag_places.clone(),
                    })));
                }
                Ok(true)
            }
            '(' => {
                self.scanner.next();
                let parts = self.read_deps(&[')'])?;
                self.scanner.expect(')')?;
                if parts.is_empty() {
                    return self
                        .scanner
                        .parse_error("expected a dependency inside '('");
                }
                let mut group = Dep::Concat(parts);
                group.add_flags(flags);
                out.push(Rc::new(group));
                Ok(true)
            }
            '$' if variable => {
                // A variable dependency $[file] or $[NAME=file].
                self.check_list_flags(flags)?;
                self.scanner.next();
                self.scanner.expect('[')?;
                self.skip_space();
                let place = self.place();
                let (first, _) = match self.read_name()? {
                    Some(n) => n,
                    None => {
                        return self
                            .scanner
                            .parse_error("expected a filename inside '$['")
                    }
                };
                self.skip_space();
                let (variable_name, name) = if self.scanner.skip('=') {
                    let var = match first.unparametrized() {
                        Some(v) => v.to_string(),
                        None => {
                            return self
                                .scanner
                                .parse_error("variable name must not be parametrized")
                        }
                    };
                    self.skip_space();
                    let (name, _) = match self.read_name()? {
                        Some(n) => n,
                        None => {
                            return self
                                .scanner
                                .parse_error("expected a filename after '='")
                        }
                    };
                    (Some(var), name)
                } else {
                    (None, first)
                };
                self.skip_space();
                self.scanner.expect(']')?;
                out.push(Rc::new(Dep::Direct(DirectDep {
                    flags: flags | F_VARIABLE,
                    base: BaseKind::File,
                    name,
                    place,
                    variable_name,
                    flag_places,
                })));
                Ok(true)
            }
            '<' => {
                self.check_list_flags(flags)?;
                let redirect_place = self.place();
                self.scanner.next();
                self.skip_space();
                let place = self.place();
                let (name, _) = match self.read_name()? {
                    Some(n) => n,
                    None => {
                        return self
                            .scanner
                            .parse_error("expected a filename after input redirection using '<'")
                    }
                };
                if self.input.is_some() {
                    return self
                        .scanner
                        .parse_error("duplicate input redirection using '<'");
                }
                self.input = Some((name.clone(), redirect_place));
                out.push(Rc::new(Dep::Direct(DirectDep {
                    flags,
                    base: BaseKind::File,
                    name,
                    place,
                    variable_name: None,
                    flag_places,
                })));
                Ok(true)
            }
            _ => {
                let transient = self.scanner.peek() == '@';
                if transient {
                    self.scanner.next();
                }
                self.check_list_flags(flags)?;
                let place = self.place();
                let (name, _) = match self.read_name()? {
                    Some(n) => n,
                    None => {
                        if transient {
                            return self
                                .scanner
                                .parse_error("expected a name after '@'");
                        }
                        if flags != 0 {
                            return self
                                .scanner
                                .parse_error("expected a dependency after flags");
                        }
                        return Ok(false);
                    }
                };
                out.push(Rc::new(Dep::Direct(DirectDep {
                    flags,
                    base: if transient {
                        BaseKind::Transient
                    } else {
                        BaseKind::File
                    },
                    name,
                    place,
                    variable_name: None,
                    flag_places,
                })));
                Ok(true)
            }
        }
    }

    /// -n and -0 describe the format of a dynamic list file and are only
    /// meaningful on a '[' wrapper.
    fn check_list_flags(&mut self, flags: Flags) -> ParseResult<()> {
        if flags & (F_NEWLINE_SEPARATED | F_NUL_SEPARATED) != 0 {
            return self
                .scanner
                .parse_error("flag '-n' or '-0' must be used with a dynamic dependency");
        }
        Ok(())
    }

    /// Read a possibly-parametrized name.  Returns None when no name starts
    /// at the current position.
    fn read_name(&mut self) -> ParseResult<Option<(Pattern, Place)>> {
        let place = self.place();
        let mut parts: Vec<Part> = Vec::new();

        match self.scanner.peek() {
            q @ ('\'' | '"') => {
                self.scanner.next();
                let start = self.scanner.ofs;
                loop {
                    match self.scanner.read() {
                        '\0' => {
                            self.scanner.back();
                            return self
                                .scanner
                                .parse_error(format!("unterminated {} quote", q));
                        }
                        c if c == q => break,
                        _ => {}
                    }
                }
                let end = self.scanner.ofs - 1;
                if end == start {
                    return self.scanner.parse_error("name must not be empty");
                }
                parts.push(Part::Lit(self.scanner.slice(start, end).to_string()));
            }
            _ => loop {
                let c = self.scanner.peek();
                if c == '$' {
                    self.scanner.next();
                    let param = self.read_param_name()?;
                    if matches!(parts.last(), Some(Part::Param(_))) {
                        return self.scanner.parse_error(
                            "two parameters in a row must be separated by a literal",
                        );
                    }
                    parts.push(Part::Param(param));
                    continue;
                }
                if NAME_DELIMITERS.contains(c) {
                    break;
                }
                let start = self.scanner.ofs;
                while !NAME_DELIMITERS.contains(self.scanner.peek())
                    && self.scanner.peek() != '$'
                {
                    self.scanner.next();
                }
                parts.push(Part::Lit(
                    self.scanner.slice(start, self.scanner.ofs).to_string(),
                ));
            },
        }

        if parts.is_empty() {
            return Ok(None);
        }
        Ok(Some((Pattern::new(parts), place)))
    }

    fn read_param_name(&mut self) -> ParseResult<String> {
        let braced = self.scanner.skip('{');
        let start = self.scanner.ofs;
        while matches!(self.scanner.peek(), 'a'..='z' | 'A'..='Z' | '0'..='9' | '_') {
            self.scanner.next();
        }
        if self.scanner.ofs == start {
            return self.scanner.parse_error("expected a parameter name after '$'");
        }
        let name = self.scanner.slice(start, self.scanner.ofs).to_string();
        if braced {
            self.scanner.expect('}')?;
        }
        Ok(name)
    }

    /// Read a command body.  The opening '{' has been consumed; consumes
    /// through the matching '}'.  Braces inside shell quotes do not count
    /// toward nesting.
    fn read_command(&mut self) -> ParseResult<Command> {
        let place = self.place();
        let start = self.scanner.ofs;
        let mut depth = 1usize;
        loop {
            match self.scanner.read() {
                '\0' => {
                    self.scanner.back();
                    return self
                        .scanner
                        .parse_error("unexpected end of file while reading command");
                }
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                '\\' => {
                    // Backslash escapes the next character.
                    if self.scanner.peek() != '\0' {
                        self.scanner.next();
                    }
                }
                q @ ('\'' | '"') => loop {
                    match self.scanner.read() {
                        '\0' => {
                            self.scanner.back();
                            return self
                                .scanner
                                .parse_error(format!("unterminated {} quote in command", q));
                        }
                        '\\' if q == '"' => {
                            if self.scanner.peek() != '\0' {
                                self.scanner.next();
                            }
                        }
                        c if c == q => break,
                        _ => {}
                    }
                },
                _ => {}
            }
        }
        let text = self
            .scanner
            .slice(start, self.scanner.ofs - 1)
            .trim()
            .to_string();
        Ok(Command { place, text })
    }
}
