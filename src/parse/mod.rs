//! Parse-time machinery: the [`Host`] seam between the evaluator and the
//! caller's semantic values, the [`Parser`] handle, and parse errors.
//!
//! A `Parser` is immutable once built and owns nothing mutable: each parse
//! runs on its own state, so one parser can serve any number of concurrent
//! parses.

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

use crate::define::{Grammar, Rule};
use crate::{bind, check, GrammarError};

pub(crate) mod packrat_parser;
pub(crate) mod report;

pub use report::SyntaxDiagnostic;

use packrat_parser::Machine;

/// Outcome of evaluating one expression: a value, or the NoMatch sentinel.
/// `None` is distinct from every legitimate value, including the empty
/// string and the empty list.
pub type Match<V> = Option<V>;

/// Labelled captures of one in-flight rule invocation, in binding order.
/// A label whose subexpression failed is bound to `None`; a label that was
/// never reached is absent.
pub type Bindings<V> = IndexMap<String, Option<V>>;

/// An action refusing its input. Surfaces as [`ParseError::Action`] (or a
/// build error when the grammar itself is being compiled).
#[derive(Debug, Clone)]
pub struct ActionFault {
    pub message: String,
}

impl ActionFault {
    pub fn new(message: impl Into<String>) -> ActionFault {
        ActionFault {
            message: message.into(),
        }
    }
}

impl fmt::Display for ActionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<String> for ActionFault {
    fn from(message: String) -> ActionFault {
        ActionFault { message }
    }
}

impl From<&str> for ActionFault {
    fn from(message: &str) -> ActionFault {
        ActionFault::new(message)
    }
}

/// Supplies semantic values and actions to the evaluator.
///
/// The engine is generic over the value it produces: terminals and empty
/// matches come from [`Host::terminal`], sequences and repetitions from
/// [`Host::sequence`], and rule actions are dispatched by name through
/// [`Host::call`]. [`crate::actions::Actions`] is the ordinary registry
/// host; the grammar compiler itself runs on a host whose values are
/// expression nodes.
pub trait Host {
    type Value: Clone + fmt::Debug;

    /// The value of a matched input slice (also the empty match of
    /// lookaheads, optionals and empty literals).
    fn terminal(&self, text: &str) -> Self::Value;

    /// The value of a sequence: the ordered child values.
    fn sequence(&self, items: Vec<Self::Value>) -> Self::Value;

    /// Whether `name` can be called; consulted by the action binder.
    fn has_action(&self, name: &str) -> bool;

    /// Invoke action `name` with a rule's raw match and captured labels.
    fn call(
        &self,
        name: &str,
        raw: Self::Value,
        args: &Bindings<Self::Value>,
    ) -> Result<Self::Value, ActionFault>;
}

#[derive(Debug, Error)]
pub enum ParseError {
    /// The input did not match; the farthest-failure diagnostic.
    #[error("{0}")]
    Syntax(SyntaxDiagnostic),
    /// An entry rule that does not exist, or a dangling reference that
    /// validation should have made impossible.
    #[error("rule `{0}` is not part of this parser")]
    UnknownRule(String),
    /// A host action refused its input mid-parse.
    #[error("action failed in rule `{rule}`: {message}")]
    Action { rule: String, message: String },
    /// Frame or label bookkeeping violated an invariant.
    #[error("parser invariant violated: {0}")]
    Internal(String),
}

/// A compiled, validated, bound grammar plus its host. Cheap to share;
/// every parse owns its own cursor, memo table, frames and error trail.
pub struct Parser<H: Host> {
    grammar: Grammar,
    host: H,
    memoize: bool,
}

impl<H: Host> fmt::Debug for Parser<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("grammar", &self.grammar)
            .field("memoize", &self.memoize)
            .finish_non_exhaustive()
    }
}

impl<H: Host> Parser<H> {
    /// Assemble a parser from an already-built rule list: validate names
    /// and recursion, then bind labels and actions against `host`. This is
    /// the constructor used both by [`crate::define_parser`] and by callers
    /// that build expression trees directly.
    pub fn from_rules(mut rules: Vec<Rule>, host: H) -> Result<Parser<H>, GrammarError> {
        check::check(&rules)?;
        bind::bind(&mut rules, &host)?;
        Ok(Parser {
            grammar: Grammar::index(rules),
            host,
            memoize: true,
        })
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Toggle packrat memoisation. On by default; results are identical
    /// either way, only the running time changes.
    pub fn set_memoize(&mut self, on: bool) {
        self.memoize = on;
    }

    /// Parse `input` from the first rule declared, requiring the whole
    /// input to be consumed.
    pub fn parse_string(&self, input: &str) -> Result<H::Value, ParseError> {
        let entry = self
            .grammar
            .default_entry()
            .ok_or_else(|| ParseError::Internal("grammar has no rules".to_string()))?
            .to_string();
        self.parse_rule(&entry, input)
    }

    /// Parse `input` from a named entry rule, requiring the whole input to
    /// be consumed.
    pub fn parse_rule(&self, entry: &str, input: &str) -> Result<H::Value, ParseError> {
        self.run(entry, input, true).map(|(value, _)| value)
    }

    /// Parse a prefix of `input` from a named entry rule; trailing input is
    /// not an error. Returns the value and the number of bytes consumed.
    pub fn parse_prefix(&self, entry: &str, input: &str) -> Result<(H::Value, usize), ParseError> {
        self.run(entry, input, false)
    }

    fn run(
        &self,
        entry: &str,
        input: &str,
        parse_all: bool,
    ) -> Result<(H::Value, usize), ParseError> {
        let rule = self
            .grammar
            .get(entry)
            .ok_or_else(|| ParseError::UnknownRule(entry.to_string()))?;
        let mut machine = Machine::new(&self.grammar, &self.host, input, self.memoize);
        match machine.apply(rule)? {
            Some(value) if !parse_all || machine.at_end() => Ok((value, machine.pos())),
            Some(_) => Err(ParseError::Syntax(machine.leftover_diagnostic())),
            None => Err(ParseError::Syntax(machine.failure_diagnostic())),
        }
    }
}
