//! The evaluator: a single recursive dispatch over the expression tree,
//! with a savepoint stack for backtracking, rule-level packrat memoisation,
//! per-rule capture frames, and the farthest-failure trail.

use std::collections::HashMap;

use super::report::{diagnose, expect_eof, Site, SyntaxDiagnostic, Trail};
use super::{Bindings, Host, Match, ParseError};
use crate::define::{ActionSpec, Expr, ExprKind, Grammar, Rule};

/// The mutable state of one parse. Borrows the grammar and host immutably,
/// so any number of machines can run against one parser at once.
pub(crate) struct Machine<'g, H: Host> {
    grammar: &'g Grammar,
    host: &'g H,
    input: &'g str,
    pos: usize,
    savepoints: Vec<usize>,
    memoize: bool,
    /// Only rule invocations are memoised; the key is (rule index, start
    /// position) and the cached value is the post-action result.
    memo: HashMap<(usize, usize), (Match<H::Value>, usize)>,
    /// One stack of frames per rule name; a frame is pushed on rule entry
    /// and popped on exit, matched or not.
    frames: HashMap<&'g str, Vec<Bindings<H::Value>>>,
    trail: Trail<'g>,
}

impl<'g, H: Host> Machine<'g, H> {
    pub(crate) fn new(
        grammar: &'g Grammar,
        host: &'g H,
        input: &'g str,
        memoize: bool,
    ) -> Machine<'g, H> {
        Machine {
            grammar,
            host,
            input,
            pos: 0,
            savepoints: Vec::new(),
            memoize,
            memo: HashMap::new(),
            frames: HashMap::new(),
            trail: Trail::new(),
        }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    pub(crate) fn failure_diagnostic(&self) -> SyntaxDiagnostic {
        diagnose(self.input, &self.trail)
    }

    /// Diagnostic for a parse that matched but left input behind. Failures
    /// at or past the stopping point explain the stop; otherwise the parse
    /// was simply complete and only end of input would have extended it.
    pub(crate) fn leftover_diagnostic(&self) -> SyntaxDiagnostic {
        if !self.trail.is_empty() && self.trail.pos() >= self.pos {
            diagnose(self.input, &self.trail)
        } else {
            expect_eof(self.input, self.pos)
        }
    }

    /// Evaluate an entry rule against the input.
    pub(crate) fn apply(&mut self, rule: &'g Rule) -> Result<Match<H::Value>, ParseError> {
        self.eval_rule(rule)
    }

    fn save(&mut self) {
        self.savepoints.push(self.pos);
    }

    fn restore(&mut self) {
        if let Some(pos) = self.savepoints.pop() {
            self.pos = pos;
        }
    }

    fn discard(&mut self) {
        self.savepoints.pop();
    }

    /// Record a failed expectation and yield NoMatch.
    fn fail(&mut self, expr: &'g Expr) -> Result<Match<H::Value>, ParseError> {
        if expr.report_errors {
            self.trail.note(self.pos, Site::Expr(expr));
        }
        Ok(None)
    }

    fn eval_rule(&mut self, rule: &'g Rule) -> Result<Match<H::Value>, ParseError> {
        self.frames
            .entry(rule.name.as_str())
            .or_default()
            .push(Bindings::new());
        let outcome = self.eval(&rule.expr);
        let frame = self
            .frames
            .get_mut(rule.name.as_str())
            .and_then(Vec::pop)
            .unwrap_or_default();

        let raw = match outcome? {
            Some(raw) => raw,
            None => {
                self.trail.note(self.pos, Site::Rule(rule));
                return Ok(None);
            }
        };
        match &rule.action {
            None => Ok(Some(raw)),
            Some(ActionSpec::Capture(label)) => Ok(frame.get(label).cloned().flatten()),
            Some(ActionSpec::Method(name)) => {
                match self.host.call(name, raw, &frame) {
                    Ok(value) => Ok(Some(value)),
                    Err(fault) => Err(ParseError::Action {
                        rule: rule.name.clone(),
                        message: fault.message,
                    }),
                }
            }
        }
    }

    fn eval(&mut self, expr: &'g Expr) -> Result<Match<H::Value>, ParseError> {
        // Deeply nested grammars recurse deeply; grow the stack instead of
        // overflowing it.
        stacker::maybe_grow(32 * 1024, 1024 * 1024, || self.eval_expr(expr))
    }

    fn eval_expr(&mut self, expr: &'g Expr) -> Result<Match<H::Value>, ParseError> {
        match &expr.kind {
            ExprKind::Literal { lit, ignore_case } => {
                if lit.is_empty() {
                    return Ok(Some(self.host.terminal("")));
                }
                let end = self.pos + lit.len();
                let matched = end <= self.input.len() && self.input.is_char_boundary(end) && {
                    let slice = &self.input[self.pos..end];
                    if *ignore_case {
                        slice.eq_ignore_ascii_case(lit)
                    } else {
                        slice == lit
                    }
                };
                if matched {
                    let value = self.host.terminal(&self.input[self.pos..end]);
                    self.pos = end;
                    Ok(Some(value))
                } else {
                    self.fail(expr)
                }
            }

            ExprKind::AnyChar => match self.input[self.pos..].chars().next() {
                Some(c) => Ok(Some(self.consume_char(c))),
                None => self.fail(expr),
            },

            ExprKind::CharRange { chars } => match self.input[self.pos..].chars().next() {
                Some(c) if chars.contains(c) => Ok(Some(self.consume_char(c))),
                _ => self.fail(expr),
            },

            ExprKind::Regex { compiled, .. } => {
                match compiled.0.find(&self.input[self.pos..]) {
                    Some(m) => {
                        let end = self.pos + m.end();
                        let value = self.host.terminal(m.as_str());
                        self.pos = end;
                        Ok(Some(value))
                    }
                    None => self.fail(expr),
                }
            }

            ExprKind::Rule(name) => {
                let Some((index, rule)) = self.grammar.get_full(name) else {
                    return Err(ParseError::UnknownRule(name.clone()));
                };
                let start = self.pos;
                if self.memoize {
                    if let Some((cached, end)) = self.memo.get(&(index, start)) {
                        let cached = cached.clone();
                        self.pos = *end;
                        return Ok(cached);
                    }
                }
                let result = self.eval_rule(rule)?;
                if self.memoize {
                    self.memo.insert((index, start), (result.clone(), self.pos));
                }
                Ok(result)
            }

            ExprKind::Sequence(children) => {
                self.save();
                let mut items = Vec::with_capacity(children.len());
                for child in children {
                    match self.eval(child)? {
                        Some(value) => items.push(value),
                        None => {
                            self.restore();
                            return self.fail(expr);
                        }
                    }
                }
                self.discard();
                Ok(Some(self.host.sequence(items)))
            }

            ExprKind::Choice(children) => {
                self.save();
                for child in children {
                    if let Some(value) = self.eval(child)? {
                        self.discard();
                        return Ok(Some(value));
                    }
                }
                self.restore();
                self.fail(expr)
            }

            ExprKind::Optional(child) => Ok(Some(match self.eval(child)? {
                Some(value) => value,
                None => self.host.terminal(""),
            })),

            ExprKind::ZeroOrMore(child) => {
                let start = self.pos;
                let mut items = Vec::new();
                loop {
                    let before = self.pos;
                    match self.eval(child)? {
                        Some(value) => {
                            items.push(value);
                            // An empty match would repeat forever.
                            if self.pos == before {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Ok(Some(self.repetition_value(child, start, items)))
            }

            ExprKind::OneOrMore(child) => {
                self.save();
                let start = self.pos;
                let mut items = Vec::new();
                loop {
                    let before = self.pos;
                    match self.eval(child)? {
                        Some(value) => {
                            items.push(value);
                            if self.pos == before {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                if items.is_empty() {
                    self.restore();
                    self.fail(expr)
                } else {
                    self.discard();
                    Ok(Some(self.repetition_value(child, start, items)))
                }
            }

            ExprKind::Not(child) => {
                self.save();
                if self.eval(child)?.is_some() {
                    // Recorded at the position after the unwanted match.
                    let failed = self.fail(expr);
                    self.restore();
                    failed
                } else {
                    self.restore();
                    Ok(Some(self.host.terminal("")))
                }
            }

            ExprKind::LookAhead(child) => {
                self.save();
                if self.eval(child)?.is_some() {
                    self.restore();
                    Ok(Some(self.host.terminal("")))
                } else {
                    let failed = self.fail(expr);
                    self.restore();
                    failed
                }
            }

            ExprKind::Labeled {
                label,
                owner,
                expr: child,
            } => {
                let result = self.eval(child)?;
                let owner = owner.as_deref().ok_or_else(|| {
                    ParseError::Internal(format!("label `{label}` was never bound to a rule"))
                })?;
                let frame = self
                    .frames
                    .get_mut(owner)
                    .and_then(|stack| stack.last_mut())
                    .ok_or_else(|| {
                        ParseError::Internal(format!("no active frame for rule `{owner}`"))
                    })?;
                frame.insert(label.clone(), result.clone());
                Ok(result)
            }
        }
    }

    fn consume_char(&mut self, c: char) -> H::Value {
        let end = self.pos + c.len_utf8();
        let value = self.host.terminal(&self.input[self.pos..end]);
        self.pos = end;
        value
    }

    /// Repetitions over character-level expressions concatenate into the
    /// consumed slice; everything else keeps the list of child values.
    fn repetition_value(&self, child: &Expr, start: usize, items: Vec<H::Value>) -> H::Value {
        if child.is_char_level() {
            self.host.terminal(&self.input[start..self.pos])
        } else {
            self.host.sequence(items)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Actions, Value};

    fn eval_str(expr: Expr, input: &str) -> (Option<Value>, usize) {
        let grammar = Grammar::index(vec![Rule::new("start", expr)]);
        let host = Actions::new();
        let mut machine = Machine::new(&grammar, &host, input, true);
        let result = machine.apply(grammar.get("start").unwrap()).unwrap();
        (result, machine.pos())
    }

    fn s(text: &str) -> Value {
        Value::Str(text.to_string())
    }

    #[test]
    fn literal() {
        assert_eq!(eval_str(Expr::literal("a", false), "ab"), (Some(s("a")), 1));
        assert_eq!(eval_str(Expr::literal("", false), "ab"), (Some(s("")), 0));
        assert_eq!(eval_str(Expr::literal("b", false), "Bb"), (None, 0));
        assert_eq!(
            eval_str(Expr::literal("\\", false), "\\rest"),
            (Some(s("\\")), 1)
        );
        // ASCII case folding keeps the matched spelling.
        assert_eq!(eval_str(Expr::literal("a", true), "Ab"), (Some(s("A")), 1));
        assert_eq!(eval_str(Expr::literal("b", true), "ab"), (None, 0));
    }

    #[test]
    fn regex() {
        assert_eq!(
            eval_str(Expr::regex("a*", "").unwrap(), "aab"),
            (Some(s("aa")), 2)
        );
        assert_eq!(
            eval_str(Expr::regex("a*", "i").unwrap(), "Aabc"),
            (Some(s("Aa")), 2)
        );
        assert_eq!(eval_str(Expr::regex("a+", "").unwrap(), "b"), (None, 0));
    }

    #[test]
    fn char_range() {
        assert_eq!(eval_str(Expr::char_range("ab"), "add"), (Some(s("a")), 1));
        assert_eq!(eval_str(Expr::char_range("ab"), "bdd"), (Some(s("b")), 1));
        assert_eq!(eval_str(Expr::char_range("ab"), "cab"), (None, 0));
    }

    #[test]
    fn any_char_steps_whole_characters() {
        assert_eq!(eval_str(Expr::any_char(), "été"), (Some(s("é")), 2));
        assert_eq!(eval_str(Expr::any_char(), ""), (None, 0));
    }

    #[test]
    fn sequence_collects_and_restores() {
        let make = || {
            Expr::sequence(vec![
                Expr::literal("aa", false),
                Expr::any_char(),
                Expr::literal("bb", false),
            ])
        };
        assert_eq!(
            eval_str(make(), "aa bb"),
            (Some(Value::List(vec![s("aa"), s(" "), s("bb")])), 5)
        );
        // The cursor is back at the start after a mid-sequence failure.
        assert_eq!(eval_str(make(), "aa cc"), (None, 0));
    }

    #[test]
    fn choice_is_ordered() {
        let make = || Expr::choice(vec![Expr::literal("aa", false), Expr::literal("a", false)]);
        assert_eq!(eval_str(make(), "aab"), (Some(s("aa")), 2));
        assert_eq!(eval_str(make(), "ab"), (Some(s("a")), 1));
        assert_eq!(eval_str(make(), "b"), (None, 0));
    }

    #[test]
    fn one_or_more() {
        let lits = || Expr::one_or_more(Expr::literal("a", false));
        assert_eq!(
            eval_str(lits(), "aab"),
            (Some(Value::List(vec![s("a"), s("a")])), 2)
        );
        assert_eq!(eval_str(lits(), "bbb"), (None, 0));
        // Character-level children concatenate instead.
        let digits = Expr::one_or_more(Expr::char_range("0123456789"));
        assert_eq!(eval_str(digits, "042x"), (Some(s("042")), 3));
    }

    #[test]
    fn zero_or_more_never_fails() {
        let digits = || Expr::zero_or_more(Expr::char_range("0123456789"));
        assert_eq!(eval_str(digits(), "12x"), (Some(s("12")), 2));
        assert_eq!(eval_str(digits(), "x"), (Some(s("")), 0));
    }

    #[test]
    fn optional_matches_empty_on_failure() {
        let opt = || Expr::optional(Expr::literal("a", false));
        assert_eq!(eval_str(opt(), "ab"), (Some(s("a")), 1));
        assert_eq!(eval_str(opt(), "b"), (Some(s("")), 0));
    }

    #[test]
    fn lookaheads_consume_nothing() {
        assert_eq!(
            eval_str(Expr::not(Expr::literal("a", false)), "b"),
            (Some(s("")), 0)
        );
        assert_eq!(eval_str(Expr::not(Expr::literal("a", false)), "a"), (None, 0));
        assert_eq!(
            eval_str(Expr::look_ahead(Expr::literal("a", false)), "a"),
            (Some(s("")), 0)
        );
        assert_eq!(
            eval_str(Expr::look_ahead(Expr::literal("a", false)), "b"),
            (None, 0)
        );
    }

    #[test]
    fn empty_repetition_child_terminates() {
        let star = Expr::zero_or_more(Expr::literal("", false));
        assert_eq!(eval_str(star, "xyz").1, 0);
    }

    #[test]
    fn unknown_reference_is_fatal() {
        let grammar = Grammar::index(vec![Rule::new("start", Expr::rule("ghost"))]);
        let host = Actions::new();
        let mut machine = Machine::new(&grammar, &host, "x", true);
        let err = machine.apply(grammar.get("start").unwrap()).unwrap_err();
        assert!(matches!(err, ParseError::UnknownRule(name) if name == "ghost"));
    }
}
