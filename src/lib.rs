//! A PEG parser generator.
//!
//! Grammars are plain text in the classic parsing-expression style: ordered
//! choice (`/`), sequencing, `? * +` repetition, `!` and `&` lookahead,
//! labelled captures bound to named actions. The engine interprets the
//! compiled expression tree directly, with packrat memoisation at rule
//! level, full backtracking, and farthest-failure diagnostics. The grammar
//! parser is itself one of these parsers, bootstrapped from a hand-built
//! rule set.
//!
//! ```
//! use persnickety::{define_parser, Actions, Value};
//!
//! let grammar = r#"
//!     greeting <- "hello" _ name:[a-z]+ {@name}
//!     _ <- " "*
//! "#;
//! let parser = define_parser(grammar, Actions::new()).unwrap();
//! assert_eq!(
//!     parser.parse_string("hello world").unwrap(),
//!     Value::Str("world".into()),
//! );
//! ```
//!
//! Actions receive the rule's raw match plus its captures and build the
//! caller's semantic values; see [`Actions`]. Regex expressions
//! (`~"pattern"flags`) use the Rust `regex` crate's dialect, anchored at
//! the cursor.

use thiserror::Error;
use tracing::debug;

pub mod actions;
mod bind;
mod check;
pub mod define;
pub mod graph;
pub mod parse;

pub use actions::{flatten, Actions, Value};
pub use define::{ActionSpec, Expr, ExprKind, Grammar, Rule};
pub use parse::{
    ActionFault, Bindings, Host, Match, ParseError, Parser, SyntaxDiagnostic,
};

/// Errors raised while building a parser. All of them are fatal: a parser
/// handle is only returned for a grammar that parsed, validated and bound
/// cleanly.
#[derive(Debug, Error)]
pub enum GrammarError {
    /// The grammar text itself did not parse.
    #[error("{0}")]
    Syntax(SyntaxDiagnostic),
    #[error("Rule `{0}` is defined twice.")]
    DuplicateRule(String),
    #[error("Rule `{name}` referenced in {referenced_in} is not defined")]
    UnknownRule {
        name: String,
        referenced_in: String,
    },
    #[error("rule `{0}` and `{1}` are left recursive (maybe through another rule)")]
    LeftRecursion(String, String),
    #[error("rule `{rule}` captures `@{label}` but no such label exists")]
    UnknownLabel { rule: String, label: String },
    #[error("rule `{rule}` names action `{action}` but the host does not provide it")]
    UnknownAction { rule: String, action: String },
    /// A construct the engine rejects: a backwards character range, a
    /// regex its dialect cannot compile.
    #[error("{0}")]
    Invalid(String),
}

/// Compile a grammar and bind its actions against `host`: parse the text
/// with the self-hosted meta-parser, validate the rule set, resolve labels
/// and actions, and hand back a reusable [`Parser`].
///
/// The grammar may be indented uniformly (say, inside a raw string); the
/// first non-blank line's leading whitespace is stripped from every line.
pub fn define_parser<H: Host>(grammar: &str, host: H) -> Result<Parser<H>, GrammarError> {
    let rules = define::bootstrap::parse_rules(&dedent(grammar))?;
    debug!(rules = rules.len(), "compiled grammar");
    Parser::from_rules(rules, host)
}

/// Parse and validate a grammar without binding actions. Enough for
/// tooling that only inspects the rule set, such as the DOT emitter.
pub fn load_rules(grammar: &str) -> Result<Vec<Rule>, GrammarError> {
    let rules = define::bootstrap::parse_rules(&dedent(grammar))?;
    check::check(&rules)?;
    Ok(rules)
}

/// Strip the first non-blank line's indentation from every line.
fn dedent(text: &str) -> String {
    let indent = text
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| &line[..line.len() - line.trim_start().len()])
        .unwrap_or("");
    if indent.is_empty() {
        return text.to_string();
    }
    text.lines()
        .map(|line| line.strip_prefix(indent).unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedent_strips_the_common_prefix() {
        assert_eq!(dedent("a <- 'x'"), "a <- 'x'");
        assert_eq!(dedent("\n    a <- 'x'\n    b <- 'y'"), "\na <- 'x'\nb <- 'y'");
        // Lines indented deeper keep the remainder.
        assert_eq!(dedent("  a <-\n      'x'"), "a <-\n    'x'");
    }

    #[test]
    fn dedent_leaves_interior_spacing_alone() {
        // Four spaces of indent must not eat aligned spacing further in.
        assert_eq!(dedent("    a <- 'x'    # note"), "a <- 'x'    # note");
    }
}
