//! Command template engine
//!
//! A command template is literal text mixed with three bracket kinds:
//!
//! - `{<cond> yes no}` conditional: picks the first shell token when `cond` is
//!   set in the pool, the second otherwise
//! - `[ ... <var>]` optional fragment: kept only when it ends in a variable
//!   that is set, dropped when it ends in `None` or in anything else
//! - `<name>` variable: replaced by the value of `name`, removed when unset
//!
//! Templates are tokenized once into a segment tree. Resolution runs three
//! passes over that tree in a fixed order (conditionals, optionals, variables),
//! because a conditional may produce an optional's trailing `None` and both
//! may produce variable references.
//!
//! Malformed brackets are not validated; whatever cannot be matched is kept as
//! literal text.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use tracing::trace;

use crate::error::DefinitionError;
use crate::pool::VariablePool;
use metrun_core::paths::absolutize;
use metrun_core::protocol::NONE_MARKER;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Var(String),
    Conditional { var: String, branches: String },
    Optional(Vec<Segment>),
}

/// Which bracket kinds are recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    /// All three kinds
    Command,
    /// Conditionals and variables only; `[` and `]` are literal
    Output,
}

// =============================================================================
// Tokenizer
// =============================================================================

fn parse(src: &str, syntax: Syntax) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = src;

    while let Some(c) = rest.chars().next() {
        let parsed = match c {
            '<' => take_var(rest).map(|(name, tail)| (vec![Segment::Var(name.to_string())], tail)),
            '{' => take_group(rest, '{', '}').map(|(body, tail)| (parse_braces(body, syntax), tail)),
            '[' if syntax == Syntax::Command => take_group(rest, '[', ']')
                .map(|(body, tail)| (vec![Segment::Optional(parse(body, syntax))], tail)),
            _ => None,
        };

        match parsed {
            Some((parsed, tail)) => {
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.extend(parsed);
                rest = tail;
            }
            None => {
                text.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }

    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    segments
}

/// A `{...}` group is a conditional only when it opens with a variable
fn parse_braces(body: &str, syntax: Syntax) -> Vec<Segment> {
    match take_var(body) {
        Some((var, branches)) => vec![Segment::Conditional {
            var: var.to_string(),
            branches: branches.to_string(),
        }],
        None => {
            let mut segments = vec![Segment::Text("{".to_string())];
            segments.extend(parse(body, syntax));
            segments.push(Segment::Text("}".to_string()));
            segments
        }
    }
}

/// Splits `<name>rest` into `(name, rest)`
///
/// Names may contain inner spaces but not bracket characters, and may not
/// start or end with whitespace (so `<in.txt >out.txt` stays literal).
fn take_var(s: &str) -> Option<(&str, &str)> {
    let inner = s.strip_prefix('<')?;
    let end = inner.find(|c: char| matches!(c, '<' | '>' | '{' | '}' | '[' | ']' | '\n'))?;
    let name = &inner[..end];

    if !inner[end..].starts_with('>') || name.is_empty() || name.trim() != name {
        return None;
    }
    Some((name, &inner[end + 1..]))
}

/// Splits `(open)body(close)rest` into `(body, rest)`, honouring nesting
fn take_group(s: &str, open: char, close: char) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some((&s[open.len_utf8()..i], &s[i + close.len_utf8()..]));
            }
        }
    }
    None
}

fn render_raw(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Var(name) => {
                out.push('<');
                out.push_str(name);
                out.push('>');
            }
            Segment::Conditional { var, branches } => {
                out.push_str("{<");
                out.push_str(var);
                out.push('>');
                out.push_str(branches);
                out.push('}');
            }
            Segment::Optional(children) => {
                out.push('[');
                out.push_str(&render_raw(children));
                out.push(']');
            }
        }
    }
    out
}

fn collect_variables(segments: &[Segment], syntax: Syntax, names: &mut BTreeSet<String>) {
    for segment in segments {
        match segment {
            Segment::Text(_) => {}
            Segment::Var(name) => {
                names.insert(name.clone());
            }
            Segment::Conditional { var, branches } => {
                names.insert(var.clone());
                for branch in split_branches(branches) {
                    collect_variables(&parse(&branch, syntax), syntax, names);
                }
            }
            Segment::Optional(children) => collect_variables(children, syntax, names),
        }
    }
}

// =============================================================================
// Resolution passes
// =============================================================================

fn split_branches(branches: &str) -> Vec<String> {
    shell_words::split(branches)
        .unwrap_or_else(|_| branches.split_whitespace().map(str::to_string).collect())
}

fn resolve_conditionals(
    segments: Vec<Segment>,
    vars: &VariablePool,
    syntax: Syntax,
) -> Vec<Segment> {
    let mut out = Vec::with_capacity(segments.len());
    for segment in segments {
        match segment {
            Segment::Conditional { var, branches } => {
                let index = if vars.is_truthy(&var) { 0 } else { 1 };
                let branch = split_branches(&branches)
                    .into_iter()
                    .nth(index)
                    .unwrap_or_default();
                trace!("conditional <{}> chose '{}'", var, branch);
                // The branch is strictly shorter than the conditional, so this terminates
                out.extend(resolve_conditionals(parse(&branch, syntax), vars, syntax));
            }
            Segment::Optional(children) => {
                out.push(Segment::Optional(resolve_conditionals(children, vars, syntax)))
            }
            other => out.push(other),
        }
    }
    out
}

fn resolve_optionals(segments: Vec<Segment>, vars: &VariablePool) -> Vec<Segment> {
    let mut out = Vec::with_capacity(segments.len());
    for segment in segments {
        match segment {
            Segment::Optional(children) => {
                let children = resolve_optionals(children, vars);
                if keeps_optional(&children, vars) {
                    out.extend(children);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn keeps_optional(children: &[Segment], vars: &VariablePool) -> bool {
    if render_raw(children).trim_end().ends_with(NONE_MARKER) {
        return false;
    }

    let last = children
        .iter()
        .rev()
        .find(|s| !matches!(s, Segment::Text(text) if text.trim().is_empty()));

    match last {
        Some(Segment::Var(name)) => vars.is_truthy(name),
        _ => false,
    }
}

fn substitute(segments: &[Segment], vars: &VariablePool) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Var(name) => {
                if let Some(value) = vars.truthy(name) {
                    out.push_str(value);
                }
            }
            Segment::Optional(children) => out.push_str(&substitute(children, vars)),
            Segment::Conditional { .. } => out.push_str(&render_raw(std::slice::from_ref(segment))),
        }
    }
    out
}

fn expand_segments(segments: Vec<Segment>, vars: &VariablePool, syntax: Syntax) -> String {
    let segments = resolve_conditionals(segments, vars, syntax);
    let segments = resolve_optionals(segments, vars);
    substitute(&segments, vars)
}

/// Expands a command template against a set of variables
///
/// # Example
/// ```
/// use metrun_pipeline::{VariablePool, expand};
///
/// let vars: VariablePool = [("paired", "1"), ("r1", "a.fq"), ("r2", "b.fq")]
///     .into_iter()
///     .collect();
/// let line = expand(r#"tool {<paired> "-1 <r1> -2 <r2>" "-U <r1>"} [-t <threads>]"#, &vars);
/// assert_eq!(line.split_whitespace().collect::<Vec<_>>(), ["tool", "-1", "a.fq", "-2", "b.fq"]);
/// ```
pub fn expand(template: &str, vars: &VariablePool) -> String {
    expand_segments(parse(template, Syntax::Command), vars, Syntax::Command)
}

// =============================================================================
// Command templates
// =============================================================================

/// Outcome of resolving a template against a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The concrete command line
    pub command_line: String,
    /// Output values for the requested keys
    pub updated: VariablePool,
}

/// One pipeline step: a template plus its options and declared outputs
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    template: String,
    segments: Vec<Segment>,
    inputs: Vec<String>,
    outputs: BTreeMap<String, String>,
    options: BTreeMap<String, String>,
    command: Option<String>,
}

impl CommandTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let segments = parse(&template, Syntax::Command);
        Self {
            template,
            segments,
            inputs: Vec::new(),
            outputs: BTreeMap::new(),
            options: BTreeMap::new(),
            command: None,
        }
    }

    /// Declares the variables this step consumes
    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Declares output key -> value expression pairs
    pub fn with_outputs(mut self, outputs: BTreeMap<String, String>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Sets option defaults
    ///
    /// Values starting with `./` are made absolute against `base_dir` now, once,
    /// rather than at resolution time.
    pub fn with_options(
        mut self,
        options: impl IntoIterator<Item = (String, String)>,
        base_dir: &Path,
    ) -> Self {
        for (key, value) in options {
            let value = match value.strip_prefix("./") {
                Some(rest) => absolutize(base_dir, rest).to_string_lossy().into_owned(),
                None => value,
            };
            self.options.insert(key, value);
        }
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<String, String> {
        &self.outputs
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Overrides the value of a declared option
    pub fn set_option(&mut self, key: &str, value: impl Into<String>) -> Result<(), DefinitionError> {
        match self.options.get_mut(key) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(DefinitionError::UnknownOption {
                command: self.template.clone(),
                option: key.to_string(),
            }),
        }
    }

    /// Every variable name the template refers to, including conditions and branches
    pub fn referenced_variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        collect_variables(&self.segments, Syntax::Command, &mut names);
        names
    }

    /// Name of the executable, with variable brackets stripped
    pub fn tool_name(&self) -> Option<&str> {
        self.template
            .split_whitespace()
            .next()
            .map(|tool| tool.trim_start_matches('<').trim_end_matches('>'))
            .filter(|tool| !tool.is_empty())
    }

    /// Resolves the template and its outputs against `pool`
    ///
    /// Options take precedence over pool entries of the same name. Only output
    /// keys contained in `requested` are returned.
    pub fn resolve(&self, pool: &VariablePool, requested: &HashSet<String>) -> Resolution {
        let vars = pool.overlaid(&self.options);
        let command_line = expand_segments(self.segments.clone(), &vars, Syntax::Command)
            .trim()
            .to_string();

        let mut updated = VariablePool::new();
        for (key, expression) in &self.outputs {
            if !requested.contains(key) {
                continue;
            }
            let value = expand_segments(parse(expression, Syntax::Output), &vars, Syntax::Output);
            updated.set(key.clone(), value);
        }

        Resolution {
            command_line,
            updated,
        }
    }

    /// Resolves and remembers the resulting command line
    pub fn update(&mut self, pool: &VariablePool, requested: &HashSet<String>) -> VariablePool {
        let resolution = self.resolve(pool, requested);
        self.command = Some(resolution.command_line);
        resolution.updated
    }

    /// The last resolved command line, or the template resolved against its options alone
    pub fn command_line(&self) -> String {
        match &self.command {
            Some(command) => command.clone(),
            None => self.resolve(&VariablePool::new(), &HashSet::new()).command_line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(pairs: &[(&str, &str)]) -> VariablePool {
        pairs.iter().copied().collect()
    }

    fn words(line: &str) -> Vec<&str> {
        line.split_whitespace().collect()
    }

    #[test]
    fn test_conditional_picks_branch_by_truthiness() {
        let template = "tool {<paired> -p -s} <reads>";

        let line = expand(template, &pool(&[("paired", "1"), ("reads", "r.fq")]));
        assert_eq!(words(&line), ["tool", "-p", "r.fq"]);

        let line = expand(template, &pool(&[("paired", "false"), ("reads", "r.fq")]));
        assert_eq!(words(&line), ["tool", "-s", "r.fq"]);

        let line = expand(template, &pool(&[("reads", "r.fq")]));
        assert_eq!(words(&line), ["tool", "-s", "r.fq"]);
    }

    #[test]
    fn test_conditional_branches_use_shell_quoting() {
        let template = r#"bowtie2 {<paired> "-1 <r1> -2 <r2>" "-U <reads>"} -S out.sam"#;

        let line = expand(template, &pool(&[("paired", "yes"), ("r1", "a.fq"), ("r2", "b.fq")]));
        assert_eq!(line, "bowtie2 -1 a.fq -2 b.fq -S out.sam");

        let line = expand(template, &pool(&[("reads", "x.fq")]));
        assert_eq!(line, "bowtie2 -U x.fq -S out.sam");
    }

    #[test]
    fn test_missing_false_branch_resolves_to_nothing() {
        let line = expand("tool {<fast> --fast}", &pool(&[]));
        assert_eq!(line.trim(), "tool");
    }

    #[test]
    fn test_optional_ending_in_none_is_removed() {
        let template = "kraken [--paired {<paired> <reads2> None}] <reads>";

        let line = expand(template, &pool(&[("reads", "r.fq")]));
        assert!(!line.contains("--paired"));
        assert!(!line.contains("None"));
        assert_eq!(words(&line), ["kraken", "r.fq"]);

        let line = expand(
            template,
            &pool(&[("reads", "r.fq"), ("paired", "1"), ("reads2", "b.fq")]),
        );
        assert_eq!(words(&line), ["kraken", "--paired", "b.fq", "r.fq"]);
    }

    #[test]
    fn test_optional_collapses_only_with_set_variable() {
        let template = "kraken [--threads <threads>] <reads>";

        let line = expand(template, &pool(&[("threads", "4"), ("reads", "r.fq")]));
        assert_eq!(words(&line), ["kraken", "--threads", "4", "r.fq"]);

        let line = expand(template, &pool(&[("threads", ""), ("reads", "r.fq")]));
        assert_eq!(words(&line), ["kraken", "r.fq"]);
    }

    #[test]
    fn test_optional_without_variable_is_dropped() {
        let line = expand("tool [--fast] input", &pool(&[]));
        assert_eq!(words(&line), ["tool", "input"]);
    }

    #[test]
    fn test_unset_variables_are_removed() {
        let line = expand("tool <present> <absent> <empty>", &pool(&[("present", "x"), ("empty", "")]));
        assert_eq!(words(&line), ["tool", "x"]);
    }

    #[test]
    fn test_unmatched_markers_stay_literal() {
        let line = expand("echo {oops [half <x", &pool(&[("x", "1")]));
        assert_eq!(line, "echo {oops [half <x");

        let line = expand("sort <in.txt >out.txt", &pool(&[]));
        assert_eq!(line, "sort <in.txt >out.txt");
    }

    #[test]
    fn test_braces_without_condition_keep_variables() {
        let line = expand("awk {print <col>}", &pool(&[("col", "$1")]));
        assert_eq!(line, "awk {print $1}");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let template = CommandTemplate::new("a {<c> x y} [-o <o>] <v>")
            .with_options([("o".to_string(), "out".to_string())], Path::new("/base"));
        let pool = pool(&[("c", "1"), ("v", "val")]);
        let requested = HashSet::new();

        let first = template.resolve(&pool, &requested);
        let second = template.resolve(&pool, &requested);
        assert_eq!(first, second);
        assert_eq!(words(&first.command_line), ["a", "x", "-o", "out", "val"]);
    }

    #[test]
    fn test_options_override_pool_and_are_absolutised() {
        let template = CommandTemplate::new("kraken --db <db> -t <threads>").with_options(
            [
                ("db".to_string(), "./db/k2".to_string()),
                ("threads".to_string(), "8".to_string()),
            ],
            Path::new("/base"),
        );

        let resolution = template.resolve(&pool(&[("threads", "2")]), &HashSet::new());
        assert_eq!(resolution.command_line, "kraken --db /base/db/k2 -t 8");
    }

    #[test]
    fn test_outputs_only_written_when_requested() {
        let mut outputs = BTreeMap::new();
        outputs.insert("trimmed".to_string(), "<sample>.trimmed.fq".to_string());
        outputs.insert("report".to_string(), "{<paired> paired.txt single.txt}".to_string());
        let template = CommandTemplate::new("trim <reads>").with_outputs(outputs);

        let requested: HashSet<String> = ["trimmed".to_string(), "report".to_string()].into();
        let resolution = template.resolve(&pool(&[("sample", "s1")]), &requested);
        assert_eq!(resolution.updated.get("trimmed"), Some("s1.trimmed.fq"));
        assert_eq!(resolution.updated.get("report"), Some("single.txt"));

        let requested: HashSet<String> = ["trimmed".to_string()].into();
        let resolution = template.resolve(&pool(&[("sample", "s1")]), &requested);
        assert_eq!(resolution.updated.len(), 1);
    }

    #[test]
    fn test_output_expressions_treat_square_brackets_literally() {
        let mut outputs = BTreeMap::new();
        outputs.insert("pattern".to_string(), "[<x>]".to_string());
        let template = CommandTemplate::new("tool").with_outputs(outputs);

        let requested: HashSet<String> = ["pattern".to_string()].into();
        let resolution = template.resolve(&pool(&[("x", "abc")]), &requested);
        assert_eq!(resolution.updated.get("pattern"), Some("[abc]"));
    }

    #[test]
    fn test_set_option_rejects_unknown_keys() {
        let mut template = CommandTemplate::new("tool -t <threads>")
            .with_options([("threads".to_string(), "1".to_string())], Path::new("/"));

        template.set_option("threads", "16").unwrap();
        assert_eq!(template.command_line(), "tool -t 16");
        assert!(matches!(
            template.set_option("memory", "2G"),
            Err(DefinitionError::UnknownOption { .. })
        ));
    }

    #[test]
    fn test_referenced_variables_include_branches() {
        let template = CommandTemplate::new("<bowtie> {<paired> \"-1 <r1>\" \"-U <r>\"} [-p <threads>]");
        let names: Vec<String> = template.referenced_variables().into_iter().collect();
        assert_eq!(names, ["bowtie", "paired", "r", "r1", "threads"]);
        assert_eq!(template.tool_name(), Some("bowtie"));
    }
}
