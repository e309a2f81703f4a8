//! Farthest-failure tracking and its rendering into a human diagnostic.

use std::fmt;

use by_address::ByAddress;
use itertools::Itertools;

use crate::define::{Expr, Rule};

/// Where a failure was recorded: an expression node, or a whole rule.
pub(crate) enum Site<'g> {
    Expr(&'g Expr),
    Rule(&'g Rule),
}

/// Node identity for deduplication; two sites are the same expectation only
/// if they are the same node.
#[derive(PartialEq, Eq, Hash)]
enum SiteKey<'g> {
    Expr(ByAddress<&'g Expr>),
    Rule(ByAddress<&'g Rule>),
}

impl<'g> Site<'g> {
    fn key(&self) -> SiteKey<'g> {
        match self {
            Site::Expr(e) => SiteKey::Expr(ByAddress(e)),
            Site::Rule(r) => SiteKey::Rule(ByAddress(r)),
        }
    }

    /// Syntactic terminals are preferred in diagnostics: rules flagged with
    /// a backtick or carrying an alias.
    fn is_terminal(&self) -> bool {
        match self {
            Site::Rule(rule) => rule.terminal,
            Site::Expr(_) => false,
        }
    }

    /// Fallback candidates: atomic leaf expressions, whose surface form is
    /// short enough to read.
    fn is_leaf(&self) -> bool {
        match self {
            Site::Expr(expr) => expr.is_atomic_leaf(),
            Site::Rule(_) => false,
        }
    }

    fn expected(&self) -> String {
        match self {
            Site::Rule(rule) => rule.expected(),
            Site::Expr(expr) => expr.as_grammar(false),
        }
    }
}

/// The farthest-failure record: every site that failed at the maximum
/// position reached. A farther failure resets the list; nearer failures are
/// dropped.
pub(crate) struct Trail<'g> {
    pos: usize,
    sites: Vec<Site<'g>>,
}

impl<'g> Trail<'g> {
    pub(crate) fn new() -> Trail<'g> {
        Trail {
            pos: 0,
            sites: Vec::new(),
        }
    }

    pub(crate) fn note(&mut self, pos: usize, site: Site<'g>) {
        if pos > self.pos {
            self.pos = pos;
            self.sites.clear();
            self.sites.push(site);
        } else if pos == self.pos {
            self.sites.push(site);
        }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Build the diagnostic for a failed parse. Aliased and terminal rules are
/// collected first; only if none failed at the farthest position do raw
/// leaf expressions stand in.
pub(crate) fn diagnose(input: &str, trail: &Trail) -> SyntaxDiagnostic {
    let pos = if trail.sites.is_empty() { 0 } else { trail.pos };
    let mut expected: Vec<String> = trail
        .sites
        .iter()
        .unique_by(|site| site.key())
        .filter(|site| site.is_terminal())
        .map(|site| site.expected())
        .collect();
    if expected.is_empty() {
        expected = trail
            .sites
            .iter()
            .unique_by(|site| site.key())
            .filter(|site| site.is_leaf())
            .map(|site| site.expected())
            .collect();
    }
    at(input, pos, expected)
}

/// Diagnostic for input left over after a complete match.
pub(crate) fn expect_eof(input: &str, pos: usize) -> SyntaxDiagnostic {
    at(input, pos, vec!["end of input".to_string()])
}

fn at(input: &str, pos: usize, expected: Vec<String>) -> SyntaxDiagnostic {
    let prefix = &input[..pos];
    let line = prefix.matches('\n').count();
    let (line_start, col) = match prefix.rfind('\n') {
        Some(idx) => (idx + 1, pos - idx),
        None => (0, pos),
    };
    let line_end = input[line_start..]
        .find('\n')
        .map(|idx| line_start + idx)
        .unwrap_or(input.len());
    SyntaxDiagnostic {
        line,
        col,
        line_text: input[line_start..line_end].to_string(),
        caret: pos - line_start,
        found: found_text(input, pos),
        expected: expected.into_iter().unique().collect(),
    }
}

/// The next few characters of input, the way the message quotes them.
fn found_text(input: &str, pos: usize) -> String {
    let taken: String = input[pos..].chars().take(10).collect();
    if taken.is_empty() {
        return "EOF".to_string();
    }
    let mut found = taken.replace('\n', "\\n");
    if taken.chars().count() == 10 {
        found.push_str("...");
    }
    found
}

/// A syntax error pinned to the farthest position the parse reached.
///
/// Line numbers are 0-based; the column is the byte offset from the start
/// of the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxDiagnostic {
    pub line: usize,
    pub col: usize,
    pub line_text: String,
    pub caret: usize,
    pub found: String,
    pub expected: Vec<String>,
}

impl fmt::Display for SyntaxDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Syntax error at line {}, col {}:", self.line, self.col)?;
        writeln!(f)?;
        writeln!(f, "{}", self.line_text)?;
        writeln!(f, "{}^", "-".repeat(self.caret))?;
        let expected = self.expected.iter().map(|item| prettify(item)).join(" or ");
        write!(f, "Got `{}` expected {}", self.found, expected)
    }
}

impl std::error::Error for SyntaxDiagnostic {}

/// Identifier-like expectations read fine bare; anything else is quoted.
fn prettify(item: &str) -> String {
    let bare = item.replace('_', "");
    if !bare.is_empty() && bare.chars().all(char::is_alphanumeric) {
        item.to_string()
    } else {
        format!("`{item}`")
    }
}
