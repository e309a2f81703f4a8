//! The ordinary host: semantic values as a closed sum type and actions as a
//! registry of named closures.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::parse::{ActionFault, Bindings, Host};

/// A semantic value. Raw matches arrive as `Str` (terminals) and `List`
/// (sequences); actions turn them into whatever shape the grammar's caller
/// wants, within this set.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    List(Vec<Value>),
    Int(i64),
    Bool(bool),
    Null,
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Value {
        Value::List(items)
    }
}

/// Concatenate a tree of lists of strings into one string. Available to
/// every grammar as the builtin `{flatten}` action:
///
/// ```text
/// identifier <- identifier_start identifier_part* {flatten}
/// ```
pub fn flatten(value: &Value) -> Result<String, ActionFault> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::List(items) => {
            let mut out = String::new();
            for item in items {
                out.push_str(&flatten(item)?);
            }
            Ok(out)
        }
        other => Err(ActionFault::new(format!(
            "flatten expects strings and lists, got {other:?}"
        ))),
    }
}

type ActionFn = Arc<dyn Fn(Value, &Bindings<Value>) -> Result<Value, ActionFault> + Send + Sync>;

/// A registry of named semantic actions over [`Value`]. Each action
/// receives the rule's raw match and its captured labels; a label bound
/// while its subexpression failed arrives as `None`.
///
/// Rules pick actions up explicitly (`{name}`) or by the `on_<rulename>`
/// naming convention.
#[derive(Clone, Default)]
pub struct Actions {
    table: HashMap<String, ActionFn>,
}

impl Actions {
    pub fn new() -> Actions {
        Actions::default()
    }

    /// Register `name`; replaces any earlier action of the same name.
    pub fn add(
        mut self,
        name: &str,
        action: impl Fn(Value, &Bindings<Value>) -> Result<Value, ActionFault>
            + Send
            + Sync
            + 'static,
    ) -> Actions {
        self.table.insert(name.to_string(), Arc::new(action));
        self
    }
}

impl Host for Actions {
    type Value = Value;

    fn terminal(&self, text: &str) -> Value {
        Value::Str(text.to_string())
    }

    fn sequence(&self, items: Vec<Value>) -> Value {
        Value::List(items)
    }

    fn has_action(&self, name: &str) -> bool {
        name == "flatten" || self.table.contains_key(name)
    }

    fn call(
        &self,
        name: &str,
        raw: Value,
        args: &Bindings<Value>,
    ) -> Result<Value, ActionFault> {
        if let Some(action) = self.table.get(name) {
            return action(raw, args);
        }
        if name == "flatten" {
            return flatten(&raw).map(Value::Str);
        }
        Err(ActionFault::new(format!("no action named `{name}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_concatenates_nested_lists() {
        let value = Value::List(vec![
            Value::Str("a".into()),
            Value::List(vec![Value::Str("b".into()), Value::Str("c".into())]),
        ]);
        assert_eq!(flatten(&value).unwrap(), "abc");
        assert!(flatten(&Value::Int(1)).is_err());
    }

    #[test]
    fn registry_dispatch_and_builtin() {
        let host = Actions::new().add("double", |raw, _| {
            let n = raw.as_int().ok_or("expected an int")?;
            Ok(Value::Int(n * 2))
        });
        assert!(host.has_action("double"));
        assert!(host.has_action("flatten"));
        assert!(!host.has_action("missing"));

        let args = Bindings::new();
        assert_eq!(
            host.call("double", Value::Int(21), &args).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            host.call("flatten", Value::List(vec!["4".into(), "2".into()]), &args)
                .unwrap(),
            Value::Str("42".into())
        );
        assert!(host.call("missing", Value::Null, &args).is_err());
    }
}
