//! DOT rendering of a grammar: one bold box per rule, leaves labelled with
//! their grammar surface, sequences chained left to right, choices fanned
//! out, repetitions drawn as self-loops. Pipe the output through `dot -Tsvg`.

use std::collections::HashMap;
use std::fmt::Write as _;

use by_address::ByAddress;

use crate::define::{ActionSpec, Expr, ExprKind, Rule};

pub fn render_dot(rules: &[Rule]) -> String {
    let mut graph = DotGraph::new();
    for rule in rules {
        graph.rule(rule);
    }
    graph.finish()
}

/// Where a subexpression starts and ends in the drawing; choices have
/// several of each.
struct Span {
    entries: Vec<usize>,
    exits: Vec<usize>,
}

struct DotGraph<'g> {
    out: String,
    ids: HashMap<ByAddress<&'g Expr>, usize>,
    next_id: usize,
}

impl<'g> DotGraph<'g> {
    fn new() -> DotGraph<'g> {
        let mut out = String::new();
        out.push_str(
            "digraph astgraph {\n\
             \x20 node [fontsize=12, fontname=\"Courier\", height=.1];\n\
             \x20 ranksep=.3;\n\
             \x20 rankdir=LR;\n\
             \x20 edge [arrowsize=.5, fontname=\"Courier\"]\n",
        );
        DotGraph {
            out,
            ids: HashMap::new(),
            next_id: 0,
        }
    }

    fn finish(mut self) -> String {
        self.out.push_str("}\n");
        self.out
    }

    fn fresh(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn node_id(&mut self, expr: &'g Expr) -> usize {
        if let Some(&id) = self.ids.get(&ByAddress(expr)) {
            return id;
        }
        let id = self.fresh();
        self.ids.insert(ByAddress(expr), id);
        id
    }

    fn edge(&mut self, from: usize, to: usize, label: Option<&str>) {
        match label {
            Some(label) => {
                let _ = writeln!(
                    self.out,
                    "  node_{from} -> node_{to} [label=\"{}\"]",
                    escape(label)
                );
            }
            None => {
                let _ = writeln!(self.out, "  node_{from} -> node_{to}");
            }
        }
    }

    fn rule(&mut self, rule: &'g Rule) {
        let rule_id = self.fresh();
        let _ = writeln!(
            self.out,
            "  node_{rule_id} [label=\"{}\", shape=\"rect\", style=bold]",
            escape(&rule.name)
        );
        let span = self.visit(&rule.expr);
        for &entry in &span.entries {
            self.edge(rule_id, entry, None);
        }
        let action_id = self.fresh();
        let action = match &rule.action {
            Some(ActionSpec::Capture(label)) => format!("@{label}"),
            Some(ActionSpec::Method(name)) => name.clone(),
            None => " ".to_string(),
        };
        let _ = writeln!(
            self.out,
            "  node_{action_id} [label=\"{}\", shape=\"box\"]",
            escape(&action)
        );
        for &exit in &span.exits {
            self.edge(exit, action_id, None);
        }
    }

    fn visit(&mut self, expr: &'g Expr) -> Span {
        match expr.kind() {
            ExprKind::Sequence(children) => {
                let spans: Vec<Span> = children.iter().map(|child| self.visit(child)).collect();
                for pair in spans.windows(2) {
                    for &from in &pair[0].exits {
                        for &to in &pair[1].entries {
                            self.edge(from, to, None);
                        }
                    }
                }
                Span {
                    entries: spans.first().map(|s| s.entries.clone()).unwrap_or_default(),
                    exits: spans.last().map(|s| s.exits.clone()).unwrap_or_default(),
                }
            }
            ExprKind::Choice(children) => {
                let mut entries = Vec::new();
                let mut exits = Vec::new();
                for child in children {
                    let span = self.visit(child);
                    entries.extend(span.entries);
                    exits.extend(span.exits);
                }
                Span { entries, exits }
            }
            ExprKind::Optional(child) => self.visit(child),
            ExprKind::ZeroOrMore(child) => self.repetition(child, "*"),
            ExprKind::OneOrMore(child) => self.repetition(child, "+"),
            ExprKind::Not(child) => self.cluster(child, "!", "style=\"dashed\""),
            ExprKind::LookAhead(child) => self.cluster(child, "&", "style=\"dashed\""),
            ExprKind::Labeled { label, expr, .. } => {
                let label = label.clone();
                self.cluster(expr, &label, "color=grey")
            }
            _ => {
                let id = self.node_id(expr);
                let _ = writeln!(
                    self.out,
                    "  node_{id} [label=\"{}\"]",
                    escape(&expr.as_grammar(false))
                );
                Span {
                    entries: vec![id],
                    exits: vec![id],
                }
            }
        }
    }

    fn repetition(&mut self, child: &'g Expr, label: &str) -> Span {
        let span = self.visit(child);
        for &from in &span.exits {
            for &to in &span.entries {
                self.edge(from, to, Some(label));
            }
        }
        span
    }

    fn cluster(&mut self, child: &'g Expr, label: &str, style: &str) -> Span {
        let cluster_id = self.fresh();
        let _ = writeln!(
            self.out,
            "  subgraph cluster_{cluster_id} {{\n    label=\"{}\";\n    {style};",
            escape(label)
        );
        let span = self.visit(child);
        self.out.push_str("  }\n");
        span
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_rules;

    #[test]
    fn renders_rules_loops_and_clusters() {
        let rules = load_rules(
            "a <- '1'? !'2' / foo:('2'+ 'bar'*)?\n\
             b <- 'a'* 'b'\n",
        )
        .unwrap();
        let dot = render_dot(&rules);
        assert!(dot.starts_with("digraph astgraph {"));
        assert!(dot.ends_with("}\n"));
        assert!(dot.contains("label=\"a\", shape=\"rect\", style=bold"));
        assert!(dot.contains("label=\"b\", shape=\"rect\", style=bold"));
        assert!(dot.contains("[label=\"*\"]"));
        assert!(dot.contains("[label=\"+\"]"));
        assert!(dot.contains("label=\"foo\";"));
        assert!(dot.contains("label=\"!\";"));
    }
}
