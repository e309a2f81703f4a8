//! Static validation of a rule list: name hygiene and the left-recursion
//! ban. Both run before any action binding or parsing.

use indexmap::IndexMap;

use crate::define::{Expr, ExprKind, Rule};
use crate::GrammarError;

pub(crate) fn check(rules: &[Rule]) -> Result<(), GrammarError> {
    check_names(rules)?;
    check_left_recursion(rules)
}

/// No rule defined twice; every reference resolves.
fn check_names(rules: &[Rule]) -> Result<(), GrammarError> {
    let mut names: Vec<&str> = Vec::with_capacity(rules.len());
    let mut refs: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for rule in rules {
        if names.contains(&rule.name.as_str()) {
            return Err(GrammarError::DuplicateRule(rule.name.clone()));
        }
        names.push(&rule.name);
        rule.expr.walk(&mut |expr| {
            if let ExprKind::Rule(target) = expr.kind() {
                refs.entry(target.as_str()).or_default().push(&rule.name);
            }
        });
    }
    for (name, locations) in refs {
        if !names.contains(&name) {
            return Err(GrammarError::UnknownRule {
                name: name.to_string(),
                referenced_in: join_and(&locations),
            });
        }
    }
    Ok(())
}

fn join_and(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [only] => (*only).to_string(),
        [head @ .., last] => format!("{} and {}", head.join(", "), last),
    }
}

/// Reject any rule that can reach itself without consuming input: compute
/// the set of rules reachable through leftmost positions only (first child
/// of a sequence, any child of a choice, the body of a label, a reference),
/// close it transitively, and look for self-membership.
fn check_left_recursion(rules: &[Rule]) -> Result<(), GrammarError> {
    let mut leftmosts: IndexMap<&str, Vec<&str>> = rules
        .iter()
        .map(|rule| (rule.name.as_str(), leftmost(&rule.expr)))
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        let names: Vec<&str> = leftmosts.keys().copied().collect();
        for name in names {
            let lefts = leftmosts[name].clone();
            let mut expanded = lefts.clone();
            for left in &lefts {
                if let Some(more) = leftmosts.get(left) {
                    for &m in more {
                        if !expanded.contains(&m) {
                            expanded.push(m);
                        }
                    }
                }
            }
            if expanded != lefts {
                changed = true;
                leftmosts.insert(name, expanded);
            }
        }
    }

    for (rule, lefts) in &leftmosts {
        for left in lefts {
            if leftmosts
                .get(left)
                .map_or(false, |others| others.contains(rule))
            {
                return Err(GrammarError::LeftRecursion(
                    rule.to_string(),
                    left.to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Rules reachable from `expr` at its leftmost position. Repetitions,
/// predicates and optionals contribute nothing: their children either
/// consume input before a reference recurs or are not leftmost-mandatory.
fn leftmost(expr: &Expr) -> Vec<&str> {
    match expr.kind() {
        ExprKind::Sequence(children) => children.first().map(leftmost).unwrap_or_default(),
        ExprKind::Choice(children) => {
            let mut out = Vec::new();
            for child in children {
                for name in leftmost(child) {
                    if !out.contains(&name) {
                        out.push(name);
                    }
                }
            }
            out
        }
        ExprKind::Rule(name) => vec![name.as_str()],
        ExprKind::Labeled { expr, .. } => leftmost(expr),
        _ => Vec::new(),
    }
}
