//! Grammar definition: the closed set of parsing expressions, named rules,
//! and the ordered rule table a parser executes.
//!
//! Expressions are built either by the grammar parser (see [`bootstrap`]) or
//! directly through the constructors here, and are immutable once a parser
//! has been assembled from them. Every node serialises back to its grammar
//! surface with [`Expr::as_grammar`].

use indexmap::IndexMap;

use crate::GrammarError;

pub(crate) mod bootstrap;

/// A compiled regular expression alongside nothing else; exists so that
/// expression trees stay comparable (`regex::Regex` itself is not `PartialEq`).
#[derive(Debug, Clone)]
pub struct CompiledRegex(pub(crate) regex::Regex);

impl PartialEq for CompiledRegex {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

/// One node of a parsing expression.
///
/// `report_errors` is cleared on every node beneath a `*` repetition: a
/// repetition child failing is the ordinary loop exit, not an expectation
/// worth reporting. The flag is set at construction time and the clearing
/// walk stops at rule references, so failures inside *called* rules still
/// report.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub(crate) kind: ExprKind,
    pub(crate) report_errors: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Exact string match, optionally ASCII case-insensitive. The empty
    /// literal always succeeds without consuming.
    Literal { lit: String, ignore_case: bool },
    /// Any single character.
    AnyChar,
    /// One character out of `chars`. Ranges and the `i` flag are expanded
    /// into the set when the grammar is parsed.
    CharRange { chars: String },
    /// Anchored match of a compiled regular expression at the cursor.
    /// The dialect is the Rust `regex` crate; surface flags are compiled
    /// into the pattern as an inline group.
    Regex {
        pattern: String,
        flags: String,
        compiled: CompiledRegex,
    },
    /// Invocation of a named rule.
    Rule(String),
    /// All children in order; the value is the list of child values.
    Sequence(Vec<Expr>),
    /// Ordered alternatives; the first success wins.
    Choice(Vec<Expr>),
    Optional(Box<Expr>),
    ZeroOrMore(Box<Expr>),
    OneOrMore(Box<Expr>),
    /// Succeeds (empty match) iff the child fails; consumes nothing.
    Not(Box<Expr>),
    /// Succeeds (empty match) iff the child succeeds; consumes nothing.
    LookAhead(Box<Expr>),
    /// Evaluates the child and binds its value under `label` in the frame
    /// of `owner` (the enclosing rule, filled in by the action binder).
    Labeled {
        label: String,
        owner: Option<String>,
        expr: Box<Expr>,
    },
}

impl Expr {
    fn node(kind: ExprKind) -> Expr {
        Expr {
            kind,
            report_errors: true,
        }
    }

    pub fn literal(lit: impl Into<String>, ignore_case: bool) -> Expr {
        Expr::node(ExprKind::Literal {
            lit: lit.into(),
            ignore_case,
        })
    }

    pub fn any_char() -> Expr {
        Expr::node(ExprKind::AnyChar)
    }

    pub fn char_range(chars: impl Into<String>) -> Expr {
        Expr::node(ExprKind::CharRange {
            chars: chars.into(),
        })
    }

    /// Compile `~"pattern"flags`. The pattern is anchored at the cursor and
    /// the flags become an inline group, so unsupported flags (the surface
    /// admits `[iLmsux]`, the engine fewer) fail here rather than mid-parse.
    pub fn regex(pattern: impl Into<String>, flags: impl Into<String>) -> Result<Expr, GrammarError> {
        let pattern = pattern.into();
        let flags = flags.into();
        let anchored = if flags.is_empty() {
            format!(r"\A(?:{pattern})")
        } else {
            format!(r"\A(?{flags}:{pattern})")
        };
        let compiled = regex::Regex::new(&anchored).map_err(|err| {
            GrammarError::Invalid(format!("regex `~\"{pattern}\"{flags}` rejected: {err}"))
        })?;
        Ok(Expr::node(ExprKind::Regex {
            pattern,
            flags,
            compiled: CompiledRegex(compiled),
        }))
    }

    pub fn rule(name: impl Into<String>) -> Expr {
        Expr::node(ExprKind::Rule(name.into()))
    }

    pub fn sequence(exprs: Vec<Expr>) -> Expr {
        Expr::node(ExprKind::Sequence(exprs))
    }

    pub fn choice(exprs: Vec<Expr>) -> Expr {
        Expr::node(ExprKind::Choice(exprs))
    }

    pub fn optional(expr: Expr) -> Expr {
        Expr::node(ExprKind::Optional(Box::new(expr)))
    }

    pub fn zero_or_more(mut expr: Expr) -> Expr {
        expr.silence();
        Expr::node(ExprKind::ZeroOrMore(Box::new(expr)))
    }

    pub fn one_or_more(expr: Expr) -> Expr {
        Expr::node(ExprKind::OneOrMore(Box::new(expr)))
    }

    pub fn not(expr: Expr) -> Expr {
        Expr::node(ExprKind::Not(Box::new(expr)))
    }

    pub fn look_ahead(expr: Expr) -> Expr {
        Expr::node(ExprKind::LookAhead(Box::new(expr)))
    }

    pub fn labeled(label: impl Into<String>, expr: Expr) -> Expr {
        Expr::node(ExprKind::Labeled {
            label: label.into(),
            owner: None,
            expr: Box::new(expr),
        })
    }

    /// Suppress failure reporting for this node and its structural subtree.
    /// Stops at rule references: the referenced rule is shared and reports
    /// for itself.
    fn silence(&mut self) {
        self.walk_mut(&mut |e| e.report_errors = false);
    }

    /// Visit this node and every structural descendant, parents first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match &self.kind {
            ExprKind::Sequence(exprs) | ExprKind::Choice(exprs) => {
                for e in exprs {
                    e.walk(f);
                }
            }
            ExprKind::Optional(e)
            | ExprKind::ZeroOrMore(e)
            | ExprKind::OneOrMore(e)
            | ExprKind::Not(e)
            | ExprKind::LookAhead(e)
            | ExprKind::Labeled { expr: e, .. } => e.walk(f),
            _ => {}
        }
    }

    pub(crate) fn walk_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        f(self);
        match &mut self.kind {
            ExprKind::Sequence(exprs) | ExprKind::Choice(exprs) => {
                for e in exprs {
                    e.walk_mut(f);
                }
            }
            ExprKind::Optional(e)
            | ExprKind::ZeroOrMore(e)
            | ExprKind::OneOrMore(e)
            | ExprKind::Not(e)
            | ExprKind::LookAhead(e)
            | ExprKind::Labeled { expr: e, .. } => e.walk_mut(f),
            _ => {}
        }
    }

    /// Repetitions over character-level children concatenate into a string
    /// instead of collecting a list.
    pub(crate) fn is_char_level(&self) -> bool {
        matches!(self.kind, ExprKind::CharRange { .. } | ExprKind::AnyChar)
    }

    /// Leaf expressions eligible for the diagnostic fallback pass.
    pub(crate) fn is_atomic_leaf(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Literal { .. }
                | ExprKind::CharRange { .. }
                | ExprKind::AnyChar
                | ExprKind::Regex { .. }
        )
    }

    /// The canonical grammar surface of this expression. With `atomic` set,
    /// multi-element sequences and choices are parenthesised so the result
    /// can be embedded as an operand.
    pub fn as_grammar(&self, atomic: bool) -> String {
        match &self.kind {
            ExprKind::Literal { lit, ignore_case } => {
                let flag = if *ignore_case { "i" } else { "" };
                format!("\"{}\"{}", escape_literal(lit), flag)
            }
            ExprKind::AnyChar => ".".to_string(),
            ExprKind::CharRange { chars } => format!("[{}]", class_surface(chars)),
            ExprKind::Regex { pattern, flags, .. } => {
                format!("~\"{}\"{}", escape_literal(pattern), flags)
            }
            ExprKind::Rule(name) => name.clone(),
            ExprKind::Sequence(exprs) => {
                let joined = exprs
                    .iter()
                    .map(|e| e.as_grammar(true))
                    .collect::<Vec<_>>()
                    .join(" ");
                if atomic && exprs.len() > 1 {
                    format!("( {joined} )")
                } else {
                    joined
                }
            }
            ExprKind::Choice(exprs) => {
                let joined = exprs
                    .iter()
                    .map(|e| e.as_grammar(true))
                    .collect::<Vec<_>>()
                    .join(" / ");
                if atomic && exprs.len() > 1 {
                    format!("( {joined} )")
                } else {
                    joined
                }
            }
            ExprKind::Optional(e) => format!("{}?", e.as_grammar(true)),
            ExprKind::ZeroOrMore(e) => format!("{}*", e.as_grammar(true)),
            ExprKind::OneOrMore(e) => format!("{}+", e.as_grammar(true)),
            ExprKind::Not(e) => format!("!{}", e.as_grammar(true)),
            ExprKind::LookAhead(e) => format!("&{}", e.as_grammar(true)),
            ExprKind::Labeled { label, expr, .. } => {
                format!("{}:{}", label, expr.as_grammar(true))
            }
        }
    }

    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }
}

fn escape_literal(lit: &str) -> String {
    let mut out = String::with_capacity(lit.len());
    for c in lit.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\x0c' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            '\x0b' => out.push_str("\\v"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out
}

/// Re-compact a character set for display: full alphabet and digit spans
/// fold back into ranges, class metacharacters get their escapes back.
fn class_surface(chars: &str) -> String {
    let mut out = String::with_capacity(chars.len());
    for c in chars.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ']' => out.push_str("\\]"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.replace("abcdefghijklmnopqrstuvwxyz", "a-z")
        .replace("ABCDEFGHIJKLMNOPQRSTUVWXYZ", "A-Z")
        .replace("0123456789", "0-9")
}

/// How a rule turns its raw match into a semantic value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionSpec {
    /// `{@label}`: yield the value bound to `label` in the rule's frame.
    Capture(String),
    /// `{name}`: call the host action `name` with the raw match and the
    /// frame's bindings.
    Method(String),
}

impl ActionSpec {
    /// Interpret the text of a `{ ... }` code block. Blank blocks mean no
    /// action.
    pub(crate) fn from_code(code: &str) -> Option<ActionSpec> {
        let code = code.trim();
        if code.is_empty() {
            None
        } else if let Some(label) = code.strip_prefix('@') {
            Some(ActionSpec::Capture(label.to_string()))
        } else {
            Some(ActionSpec::Method(code.to_string()))
        }
    }
}

/// A named rule: an expression plus the action and diagnostic attributes
/// attached at its definition site.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub expr: Expr,
    pub action: Option<ActionSpec>,
    /// Display name used in diagnostics instead of the rule's internals.
    pub alias: Option<String>,
    /// Terminal rules are opaque in diagnostics.
    pub terminal: bool,
}

impl Rule {
    pub fn new(name: impl Into<String>, expr: Expr) -> Rule {
        Rule::define(name, expr, None, None, false)
    }

    pub fn with_action(name: impl Into<String>, expr: Expr, action: ActionSpec) -> Rule {
        Rule::define(name, expr, Some(action), None, false)
    }

    /// Full constructor. A non-empty alias marks the rule terminal; a rule
    /// marked terminal whose name is all uppercase is its own alias.
    pub fn define(
        name: impl Into<String>,
        expr: Expr,
        action: Option<ActionSpec>,
        alias: Option<String>,
        terminal: bool,
    ) -> Rule {
        let name = name.into();
        let alias = alias.filter(|a| !a.is_empty());
        let (alias, terminal) = if alias.is_some() {
            (alias, true)
        } else if terminal && is_upper_name(&name) {
            (Some(name.clone()), true)
        } else {
            (None, terminal)
        };
        Rule {
            name,
            expr,
            action,
            alias,
            terminal,
        }
    }

    /// What an error message should say this rule expected: the alias when
    /// one exists, otherwise the body's grammar surface.
    pub(crate) fn expected(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => self.expr.as_grammar(false),
        }
    }

    /// The rule's canonical definition line.
    pub fn as_grammar(&self) -> String {
        let mut head = String::new();
        if self.terminal && self.alias.is_none() {
            head.push('`');
        }
        head.push_str(&self.name);
        if let Some(alias) = &self.alias {
            head.push_str(" \"");
            head.push_str(&escape_literal(alias));
            head.push('"');
        }
        let action = match &self.action {
            Some(ActionSpec::Capture(label)) => format!(" {{@{label}}}"),
            Some(ActionSpec::Method(m)) if *m != format!("on_{}", self.name) => {
                format!(" {{{m}}}")
            }
            _ => String::new(),
        };
        format!("{} <- {}{}", head, self.expr.as_grammar(false), action)
    }
}

fn is_upper_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase())
        && !name.chars().any(|c| c.is_ascii_lowercase())
}

/// The rule table of a validated grammar, in declaration order. The first
/// rule declared is the default entry point.
#[derive(Debug, Clone)]
pub struct Grammar {
    rules: IndexMap<String, Rule>,
}

impl Grammar {
    /// Build the table from a checked rule list. Callers are expected to
    /// have run [`crate::check::check`] first; duplicates would silently
    /// collapse here.
    pub(crate) fn index(rules: Vec<Rule>) -> Grammar {
        Grammar {
            rules: rules.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    pub(crate) fn get_full(&self, name: &str) -> Option<(usize, &Rule)> {
        self.rules.get_full(name).map(|(i, _, r)| (i, r))
    }

    pub fn default_entry(&self) -> Option<&str> {
        self.rules.keys().next().map(String::as_str)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The whole grammar back as text, one rule per line.
    pub fn as_grammar(&self) -> String {
        self.rules()
            .map(Rule::as_grammar)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_or_more_silences_its_subtree() {
        let expr = Expr::zero_or_more(Expr::sequence(vec![
            Expr::literal("a", false),
            Expr::rule("other"),
        ]));
        let mut silent = 0;
        expr.walk(&mut |e| {
            if !e.report_errors {
                silent += 1;
            }
        });
        // The repetition node itself still reports; the sequence, the
        // literal and the reference node do not.
        assert_eq!(silent, 3);
    }

    #[test]
    fn literal_surface_escapes() {
        assert_eq!(Expr::literal("<-", false).as_grammar(false), "\"<-\"");
        assert_eq!(Expr::literal("\n", false).as_grammar(false), "\"\\n\"");
        assert_eq!(Expr::literal("\\", false).as_grammar(false), "\"\\\\\"");
        assert_eq!(Expr::literal("\"", false).as_grammar(false), "\"\\\"\"");
        assert_eq!(Expr::literal("x", true).as_grammar(false), "\"x\"i");
    }

    #[test]
    fn class_surface_recompacts_ranges() {
        let expr = Expr::char_range("0123456789");
        assert_eq!(expr.as_grammar(false), "[0-9]");
        let expr = Expr::char_range("0123456789\\");
        assert_eq!(expr.as_grammar(false), "[0-9\\\\]");
        let expr = Expr::char_range("ab]");
        assert_eq!(expr.as_grammar(false), "[ab\\]]");
    }

    #[test]
    fn sequence_parenthesised_only_as_operand() {
        let seq = Expr::sequence(vec![Expr::literal("a", false), Expr::any_char()]);
        assert_eq!(seq.as_grammar(false), "\"a\" .");
        assert_eq!(Expr::optional(seq).as_grammar(false), "( \"a\" . )?");
    }

    #[test]
    fn alias_implies_terminal_and_upper_names_alias_themselves() {
        let aliased = Rule::define("num", Expr::any_char(), None, Some("NUMBER".into()), false);
        assert!(aliased.terminal);
        assert_eq!(aliased.expected(), "NUMBER");

        let upper = Rule::define("EOL", Expr::literal("\n", false), None, None, true);
        assert_eq!(upper.alias.as_deref(), Some("EOL"));

        let plain = Rule::define("ws", Expr::any_char(), None, None, true);
        assert_eq!(plain.alias, None);
        assert!(plain.terminal);
    }

    #[test]
    fn rule_surface_includes_markers() {
        let rule = Rule::define(
            "int",
            Expr::one_or_more(Expr::char_range("0123456789")),
            Some(ActionSpec::Method("on_int".into())),
            None,
            false,
        );
        // Actions named by the on_<rule> convention are implicit.
        assert_eq!(rule.as_grammar(), "int <- [0-9]+");

        let rule = Rule::define(
            "sub",
            Expr::labeled("e", Expr::rule("expr")),
            Some(ActionSpec::Capture("e".into())),
            None,
            false,
        );
        assert_eq!(rule.as_grammar(), "sub <- e:expr {@e}");

        let rule = Rule::define("ws", Expr::char_range(" \t"), None, None, true);
        assert_eq!(rule.as_grammar(), "`ws <- [ \\t]");
    }
}
