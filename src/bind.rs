//! The action binder: the last build step before a rule list becomes a
//! parser. Labels learn which rule owns them, and every action spec is
//! resolved against the host.

use crate::define::{ActionSpec, ExprKind, Rule};
use crate::parse::Host;
use crate::GrammarError;

/// Back-fill label ownership and resolve actions. Runs after validation,
/// so rule references are known to resolve.
pub(crate) fn bind<H: Host>(rules: &mut [Rule], host: &H) -> Result<(), GrammarError> {
    for rule in rules.iter_mut() {
        let rule_name = rule.name.clone();

        let mut labels: Vec<String> = Vec::new();
        rule.expr.walk_mut(&mut |expr| {
            if let ExprKind::Labeled { label, owner, .. } = &mut expr.kind {
                if owner.is_none() {
                    *owner = Some(rule_name.clone());
                }
                labels.push(label.clone());
            }
        });

        match rule.action.clone() {
            None => {
                let conventional = format!("on_{}", rule.name);
                if host.has_action(&conventional) {
                    rule.action = Some(ActionSpec::Method(conventional));
                }
            }
            Some(ActionSpec::Capture(label)) => {
                if !labels.contains(&label) {
                    return Err(GrammarError::UnknownLabel {
                        rule: rule.name.clone(),
                        label,
                    });
                }
            }
            Some(ActionSpec::Method(name)) => {
                if !host.has_action(&name) {
                    return Err(GrammarError::UnknownAction {
                        rule: rule.name.clone(),
                        action: name,
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Actions, Value};
    use crate::define::Expr;

    fn labeled_rule(action: Option<ActionSpec>) -> Rule {
        Rule::define(
            "r",
            Expr::labeled("x", Expr::literal("a", false)),
            action,
            None,
            false,
        )
    }

    #[test]
    fn fills_label_owners() {
        let mut rules = vec![labeled_rule(None)];
        bind(&mut rules, &Actions::new()).unwrap();
        let mut owner = None;
        rules[0].expr.walk(&mut |expr| {
            if let ExprKind::Labeled { owner: o, .. } = expr.kind() {
                owner = o.clone();
            }
        });
        assert_eq!(owner.as_deref(), Some("r"));
    }

    #[test]
    fn capture_must_name_an_existing_label() {
        let mut rules = vec![labeled_rule(Some(ActionSpec::Capture("x".into())))];
        assert!(bind(&mut rules, &Actions::new()).is_ok());

        let mut rules = vec![labeled_rule(Some(ActionSpec::Capture("missing".into())))];
        assert!(matches!(
            bind(&mut rules, &Actions::new()),
            Err(GrammarError::UnknownLabel { label, .. }) if label == "missing"
        ));
    }

    #[test]
    fn methods_must_exist_on_the_host() {
        let host = Actions::new().add("on_custom", |raw, _| Ok(raw));
        let mut rules = vec![labeled_rule(Some(ActionSpec::Method("on_custom".into())))];
        assert!(bind(&mut rules, &host).is_ok());

        let mut rules = vec![labeled_rule(Some(ActionSpec::Method("nowhere".into())))];
        assert!(matches!(
            bind(&mut rules, &host),
            Err(GrammarError::UnknownAction { action, .. }) if action == "nowhere"
        ));
    }

    #[test]
    fn convention_binds_on_rulename() {
        let host = Actions::new().add("on_r", |_, _| Ok(Value::Null));
        let mut rules = vec![labeled_rule(None)];
        bind(&mut rules, &host).unwrap();
        assert_eq!(rules[0].action, Some(ActionSpec::Method("on_r".into())));

        // Without the method the rule keeps returning its raw match.
        let mut rules = vec![labeled_rule(None)];
        bind(&mut rules, &Actions::new()).unwrap();
        assert_eq!(rules[0].action, None);
    }
}
