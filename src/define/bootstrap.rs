//! The self-hosted grammar parser.
//!
//! The meta-grammar is compiled in two stages. A hand-built bootstrap rule
//! set (constructor calls only, no regex support) parses [`META_GRAMMAR`]
//! once; the parser built from that result understands the full surface,
//! including `~"regex"` expressions, and compiles every user grammar. Both
//! stages run on [`GrammarActions`], a host whose semantic values carry
//! expression and rule nodes.

use std::sync::OnceLock;

use crate::define::{ActionSpec, Expr, ExprKind, Rule};
use crate::parse::{ActionFault, Bindings, Host, ParseError, Parser};
use crate::GrammarError;

/// The grammar of grammars. The first rule, `grammar`, is the entry point.
pub(crate) const META_GRAMMAR: &str = r##"
grammar <- __ rules:( rule __ )+

rule "RULE" <- terminal:"`"? name:identifier_name __ ( :alias _ )? "<-" __ expr:expression code:( __ code_block )? EOS

code_block "CODE_BLOCK" <- "{" code:code "}" {@code}
code <- ( ( ![{}] source_char )+ / ( "{" code "}" ) )* {flatten}

alias "ALIAS" <- string_literal {flatten}

expression "EXPRESSION" <- choice_expr
choice_expr <- first:seq_expr rest:( __ "/" __ seq_expr )*
primary_expr <- regexp_expr / lit_expr / char_range_expr / any_char_expr / rule_expr / sub_expr
sub_expr <- "(" __ expr:expression __ ")" {@expr}

regexp_expr <- "~" lit:string_literal flags:[iLmsux]*

lit_expr <- lit:string_literal ignore:"i"?

string_literal <- ( '"' content:double_string_char* '"' ) / ( "'" content:single_string_char* "'" ) {@content}
double_string_char <- ( !( '"' / "\\" / EOL ) char:source_char ) / ( "\\" char:double_string_escape ) {@char}
single_string_char <- ( !( "'" / "\\" / EOL ) char:source_char ) / ( "\\" char:single_string_escape ) {@char}
single_string_escape <- "'" / common_escape
double_string_escape <- '"' / common_escape

any_char_expr <- "."

rule_expr <- name:identifier_name !( __ ( string_literal __ )? "<-" )

seq_expr <- first:labeled_expr rest:( __ labeled_expr )*

labeled_expr <- label:( identifier? __ ":" __ )? expr:prefixed_expr

prefixed_expr <- prefix:( prefix __ )? expr:suffixed_expr
suffixed_expr <- expr:primary_expr suffix:( __ suffix )?
suffix <- [?+*]
prefix <- [!&]

char_range_expr <- "[" content:( class_char_range / class_char )* "]" ignore:"i"?
class_char_range <- start:class_char "-" end:class_char
class_char <- ( !( "]" / "\\" / EOL ) char:source_char ) / ( "\\" char:char_class_escape ) {@char}
char_class_escape <- "]" / common_escape

common_escape <- single_char_escape
single_char_escape <- "a" / "b" / "n" / "f" / "r" / "t" / "v" / "\\"

comment <- "#" ( !EOL source_char )*

source_char <- .
identifier <- identifier_name
identifier_name <- identifier_start identifier_part* {flatten}
identifier_start <- [A-Za-z_]
identifier_part <- identifier_start / [0-9]

__ <- ( whitespace / EOL / comment )*
_ <- whitespace*
whitespace <- [ \t\r]
EOL <- "\n"
EOS <- ( _ comment? EOL ) / ( __ EOF )
EOF <- !.
"##;

fn lit(s: &str) -> Expr {
    Expr::literal(s, false)
}
fn r(name: &str) -> Expr {
    Expr::rule(name)
}
fn lbl(name: &str, expr: Expr) -> Expr {
    Expr::labeled(name, expr)
}
fn seq(exprs: Vec<Expr>) -> Expr {
    Expr::sequence(exprs)
}
fn alt(exprs: Vec<Expr>) -> Expr {
    Expr::choice(exprs)
}
fn opt(expr: Expr) -> Expr {
    Expr::optional(expr)
}
fn star(expr: Expr) -> Expr {
    Expr::zero_or_more(expr)
}
fn plus(expr: Expr) -> Expr {
    Expr::one_or_more(expr)
}
fn neg(expr: Expr) -> Expr {
    Expr::not(expr)
}
fn chars(set: &str) -> Expr {
    Expr::char_range(set)
}
fn on(name: &str, expr: Expr, action: &str) -> Rule {
    Rule::with_action(name, expr, ActionSpec::Method(action.to_string()))
}
fn cap(name: &str, expr: Expr, label: &str) -> Rule {
    Rule::with_action(name, expr, ActionSpec::Capture(label.to_string()))
}

/// The hand-built seed: enough of the meta-grammar, straight from the
/// constructors, to parse [`META_GRAMMAR`] itself. Regex expressions are
/// absent on purpose; the meta-grammar defines them as text, so only the
/// stage-2 parser needs to recognise them.
pub(crate) fn bootstrap_rules() -> Vec<Rule> {
    vec![
        // grammar <- __ rules:( rule __ )+
        on(
            "grammar",
            seq(vec![r("__"), lbl("rules", plus(seq(vec![r("rule"), r("__")])))]),
            "on_grammar",
        ),
        // rule <- terminal:"`"? name:identifier_name __ ( :alias _ )?
        //         "<-" __ expr:expression code:( __ code_block )? EOS
        on(
            "rule",
            seq(vec![
                lbl("terminal", opt(lit("`"))),
                lbl("name", r("identifier_name")),
                r("__"),
                opt(seq(vec![lbl("alias", r("alias")), r("_")])),
                lit("<-"),
                r("__"),
                lbl("expr", r("expression")),
                lbl("code", opt(seq(vec![r("__"), r("code_block")]))),
                r("EOS"),
            ]),
            "on_rule",
        ),
        // alias <- string_literal {flatten}
        on("alias", r("string_literal"), "flatten"),
        // code_block <- "{" code:code "}" {@code}
        cap(
            "code_block",
            seq(vec![lit("{"), lbl("code", r("code")), lit("}")]),
            "code",
        ),
        // code <- ( ( ![{}] source_char )+ / "{" code "}" )* {flatten}
        on(
            "code",
            star(alt(vec![
                plus(seq(vec![neg(chars("{}")), r("source_char")])),
                seq(vec![lit("{"), r("code"), lit("}")]),
            ])),
            "flatten",
        ),
        // expression <- choice_expr
        Rule::new("expression", r("choice_expr")),
        // choice_expr <- first:seq_expr rest:( __ "/" __ seq_expr )*
        on(
            "choice_expr",
            seq(vec![
                lbl("first", r("seq_expr")),
                lbl(
                    "rest",
                    star(seq(vec![r("__"), lit("/"), r("__"), r("seq_expr")])),
                ),
            ]),
            "on_choice_expr",
        ),
        // primary_expr <- lit_expr / char_range_expr / any_char_expr
        //              /  rule_expr / sub_expr
        Rule::new(
            "primary_expr",
            alt(vec![
                r("lit_expr"),
                r("char_range_expr"),
                r("any_char_expr"),
                r("rule_expr"),
                r("sub_expr"),
            ]),
        ),
        // sub_expr <- "(" __ expr:expression __ ")" {@expr}
        cap(
            "sub_expr",
            seq(vec![
                lit("("),
                r("__"),
                lbl("expr", r("expression")),
                r("__"),
                lit(")"),
            ]),
            "expr",
        ),
        // lit_expr <- lit:string_literal ignore:"i"?
        on(
            "lit_expr",
            seq(vec![
                lbl("lit", r("string_literal")),
                lbl("ignore", opt(lit("i"))),
            ]),
            "on_lit_expr",
        ),
        // string_literal <- '"' content:double_string_char* '"'
        //                /  "'" content:single_string_char* "'" {@content}
        cap(
            "string_literal",
            alt(vec![
                seq(vec![
                    lit("\""),
                    lbl("content", star(r("double_string_char"))),
                    lit("\""),
                ]),
                seq(vec![
                    lit("'"),
                    lbl("content", star(r("single_string_char"))),
                    lit("'"),
                ]),
            ]),
            "content",
        ),
        // double_string_char <- !( '"' / "\\" / EOL ) char:source_char
        //                    /  "\\" char:double_string_escape {@char}
        cap(
            "double_string_char",
            alt(vec![
                seq(vec![
                    neg(alt(vec![lit("\""), lit("\\"), r("EOL")])),
                    lbl("char", r("source_char")),
                ]),
                seq(vec![lit("\\"), lbl("char", r("double_string_escape"))]),
            ]),
            "char",
        ),
        // single_string_char <- !( "'" / "\\" / EOL ) char:source_char
        //                    /  "\\" char:single_string_escape {@char}
        cap(
            "single_string_char",
            alt(vec![
                seq(vec![
                    neg(alt(vec![lit("'"), lit("\\"), r("EOL")])),
                    lbl("char", r("source_char")),
                ]),
                seq(vec![lit("\\"), lbl("char", r("single_string_escape"))]),
            ]),
            "char",
        ),
        // single_string_escape <- "'" / common_escape
        Rule::new(
            "single_string_escape",
            alt(vec![lit("'"), r("common_escape")]),
        ),
        // double_string_escape <- '"' / common_escape
        Rule::new(
            "double_string_escape",
            alt(vec![lit("\""), r("common_escape")]),
        ),
        // common_escape <- single_char_escape
        on("common_escape", r("single_char_escape"), "on_common_escape"),
        // single_char_escape <- "a" / "b" / "n" / "f" / "r" / "t" / "v" / "\\"
        Rule::new(
            "single_char_escape",
            alt(vec![
                lit("a"),
                lit("b"),
                lit("n"),
                lit("f"),
                lit("r"),
                lit("t"),
                lit("v"),
                lit("\\"),
            ]),
        ),
        // any_char_expr <- "."
        on("any_char_expr", lit("."), "on_any_char_expr"),
        // rule_expr <- name:identifier_name !( __ ( string_literal __ )? "<-" )
        on(
            "rule_expr",
            seq(vec![
                lbl("name", r("identifier_name")),
                neg(seq(vec![
                    r("__"),
                    opt(seq(vec![r("string_literal"), r("__")])),
                    lit("<-"),
                ])),
            ]),
            "on_rule_expr",
        ),
        // seq_expr <- first:labeled_expr rest:( __ labeled_expr )*
        on(
            "seq_expr",
            seq(vec![
                lbl("first", r("labeled_expr")),
                lbl("rest", star(seq(vec![r("__"), r("labeled_expr")]))),
            ]),
            "on_seq_expr",
        ),
        // labeled_expr <- label:( identifier? __ ":" __ )? expr:prefixed_expr
        on(
            "labeled_expr",
            seq(vec![
                lbl(
                    "label",
                    opt(seq(vec![
                        opt(r("identifier")),
                        r("__"),
                        lit(":"),
                        r("__"),
                    ])),
                ),
                lbl("expr", r("prefixed_expr")),
            ]),
            "on_labeled_expr",
        ),
        // prefixed_expr <- prefix:( prefix __ )? expr:suffixed_expr
        on(
            "prefixed_expr",
            seq(vec![
                lbl("prefix", opt(seq(vec![r("prefix"), r("__")]))),
                lbl("expr", r("suffixed_expr")),
            ]),
            "on_prefixed_expr",
        ),
        // suffixed_expr <- expr:primary_expr suffix:( __ suffix )?
        on(
            "suffixed_expr",
            seq(vec![
                lbl("expr", r("primary_expr")),
                lbl("suffix", opt(seq(vec![r("__"), r("suffix")]))),
            ]),
            "on_suffixed_expr",
        ),
        // suffix <- [?+*]
        Rule::new("suffix", chars("?+*")),
        // prefix <- [!&]
        Rule::new("prefix", chars("!&")),
        // char_range_expr <- "[" content:( class_char_range / class_char )* "]"
        //                    ignore:"i"?
        on(
            "char_range_expr",
            seq(vec![
                lit("["),
                lbl(
                    "content",
                    star(alt(vec![r("class_char_range"), r("class_char")])),
                ),
                lit("]"),
                lbl("ignore", opt(lit("i"))),
            ]),
            "on_char_range_expr",
        ),
        // class_char_range <- start:class_char "-" end:class_char
        on(
            "class_char_range",
            seq(vec![
                lbl("start", r("class_char")),
                lit("-"),
                lbl("end", r("class_char")),
            ]),
            "on_class_char_range",
        ),
        // class_char <- !( "]" / "\\" / EOL ) char:source_char
        //            /  "\\" char:char_class_escape {@char}
        cap(
            "class_char",
            alt(vec![
                seq(vec![
                    neg(alt(vec![lit("]"), lit("\\"), r("EOL")])),
                    lbl("char", r("source_char")),
                ]),
                seq(vec![lit("\\"), lbl("char", r("char_class_escape"))]),
            ]),
            "char",
        ),
        // char_class_escape <- "]" / common_escape
        Rule::new("char_class_escape", alt(vec![lit("]"), r("common_escape")])),
        // comment <- "#" ( !EOL source_char )*
        Rule::new(
            "comment",
            seq(vec![
                lit("#"),
                star(seq(vec![neg(r("EOL")), r("source_char")])),
            ]),
        ),
        // source_char <- .
        Rule::new("source_char", Expr::any_char()),
        // identifier <- identifier_name
        Rule::new("identifier", r("identifier_name")),
        // identifier_name <- identifier_start identifier_part* {flatten}
        on(
            "identifier_name",
            seq(vec![r("identifier_start"), star(r("identifier_part"))]),
            "flatten",
        ),
        // identifier_start <- [A-Za-z_]
        Rule::new(
            "identifier_start",
            chars("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_"),
        ),
        // identifier_part <- identifier_start / [0-9]
        Rule::new(
            "identifier_part",
            alt(vec![r("identifier_start"), chars("0123456789")]),
        ),
        // __ <- ( whitespace / EOL / comment )*
        Rule::new(
            "__",
            star(alt(vec![r("whitespace"), r("EOL"), r("comment")])),
        ),
        // _ <- whitespace*
        Rule::new("_", star(r("whitespace"))),
        // whitespace <- [ \t\r]
        Rule::new("whitespace", chars(" \t\r")),
        // EOL <- "\n"
        Rule::new("EOL", lit("\n")),
        // EOS <- ( _ comment? EOL ) / ( __ EOF )
        Rule::new(
            "EOS",
            alt(vec![
                seq(vec![r("_"), opt(r("comment")), r("EOL")]),
                seq(vec![r("__"), r("EOF")]),
            ]),
        ),
        // EOF <- !.
        Rule::new("EOF", neg(Expr::any_char())),
    ]
}

/// Semantic values of the grammar parser: plain matches, plus the
/// expression and rule nodes its actions assemble.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MetaValue {
    Str(String),
    List(Vec<MetaValue>),
    Expr(Expr),
    Rule(Rule),
    Rules(Vec<Rule>),
}

/// The host behind the grammar parser. Stateless; every action builds
/// grammar objects out of its raw match and captures.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GrammarActions;

impl Host for GrammarActions {
    type Value = MetaValue;

    fn terminal(&self, text: &str) -> MetaValue {
        MetaValue::Str(text.to_string())
    }

    fn sequence(&self, items: Vec<MetaValue>) -> MetaValue {
        MetaValue::List(items)
    }

    fn has_action(&self, name: &str) -> bool {
        matches!(
            name,
            "flatten"
                | "on_grammar"
                | "on_rule"
                | "on_choice_expr"
                | "on_seq_expr"
                | "on_labeled_expr"
                | "on_prefixed_expr"
                | "on_suffixed_expr"
                | "on_lit_expr"
                | "on_regexp_expr"
                | "on_char_range_expr"
                | "on_class_char_range"
                | "on_common_escape"
                | "on_any_char_expr"
                | "on_rule_expr"
        )
    }

    fn call(
        &self,
        name: &str,
        raw: MetaValue,
        args: &Bindings<MetaValue>,
    ) -> Result<MetaValue, ActionFault> {
        match name {
            "flatten" => flat(&raw).map(MetaValue::Str),
            "on_grammar" => on_grammar(args),
            "on_rule" => on_rule(args),
            "on_choice_expr" => on_choice_expr(args),
            "on_seq_expr" => on_seq_expr(args),
            "on_labeled_expr" => on_labeled_expr(args),
            "on_prefixed_expr" => on_prefixed_expr(args),
            "on_suffixed_expr" => on_suffixed_expr(args),
            "on_lit_expr" => on_lit_expr(args),
            "on_regexp_expr" => on_regexp_expr(args),
            "on_char_range_expr" => on_char_range_expr(args),
            "on_class_char_range" => on_class_char_range(&raw, args),
            "on_common_escape" => on_common_escape(&raw),
            "on_any_char_expr" => Ok(MetaValue::Expr(Expr::any_char())),
            "on_rule_expr" => Ok(MetaValue::Expr(Expr::rule(flat_arg(args, "name")?))),
            other => Err(ActionFault::new(format!("no grammar action `{other}`"))),
        }
    }
}

fn arg<'a>(args: &'a Bindings<MetaValue>, label: &str) -> Option<&'a MetaValue> {
    args.get(label).and_then(Option::as_ref)
}

fn flat(value: &MetaValue) -> Result<String, ActionFault> {
    match value {
        MetaValue::Str(s) => Ok(s.clone()),
        MetaValue::List(items) => {
            let mut out = String::new();
            for item in items {
                out.push_str(&flat(item)?);
            }
            Ok(out)
        }
        other => Err(ActionFault::new(format!("cannot flatten {other:?}"))),
    }
}

fn flat_arg(args: &Bindings<MetaValue>, label: &str) -> Result<String, ActionFault> {
    match arg(args, label) {
        Some(value) => flat(value),
        None => Err(ActionFault::new(format!("missing capture `{label}`"))),
    }
}

fn expr_arg(args: &Bindings<MetaValue>, label: &str) -> Result<Expr, ActionFault> {
    match arg(args, label) {
        Some(MetaValue::Expr(expr)) => Ok(expr.clone()),
        other => Err(ActionFault::new(format!(
            "capture `{label}` is not an expression: {other:?}"
        ))),
    }
}

fn list_arg<'a>(
    args: &'a Bindings<MetaValue>,
    label: &str,
) -> Result<&'a [MetaValue], ActionFault> {
    match arg(args, label) {
        Some(MetaValue::List(items)) => Ok(items),
        other => Err(ActionFault::new(format!(
            "capture `{label}` is not a list: {other:?}"
        ))),
    }
}

fn on_grammar(args: &Bindings<MetaValue>) -> Result<MetaValue, ActionFault> {
    let mut rules = Vec::new();
    for entry in list_arg(args, "rules")? {
        match entry {
            MetaValue::List(pair) => match pair.first() {
                Some(MetaValue::Rule(rule)) => rules.push(rule.clone()),
                other => return Err(ActionFault::new(format!("not a rule: {other:?}"))),
            },
            other => return Err(ActionFault::new(format!("not a rule entry: {other:?}"))),
        }
    }
    Ok(MetaValue::Rules(rules))
}

fn on_rule(args: &Bindings<MetaValue>) -> Result<MetaValue, ActionFault> {
    let terminal = matches!(arg(args, "terminal"), Some(MetaValue::Str(s)) if s == "`");
    let name = flat_arg(args, "name")?;
    let alias = match arg(args, "alias") {
        Some(value) => Some(flat(value)?),
        None => None,
    };
    let expr = expr_arg(args, "expr")?;
    let action = match arg(args, "code") {
        Some(MetaValue::List(items)) => match items.get(1) {
            Some(MetaValue::Str(code)) => ActionSpec::from_code(code),
            _ => None,
        },
        _ => None,
    };
    Ok(MetaValue::Rule(Rule::define(
        name, expr, action, alias, terminal,
    )))
}

fn on_choice_expr(args: &Bindings<MetaValue>) -> Result<MetaValue, ActionFault> {
    let first = expr_arg(args, "first")?;
    let rest = list_arg(args, "rest")?;
    if rest.is_empty() {
        // Only one alternative is no choice at all.
        return Ok(MetaValue::Expr(first));
    }
    let mut alternatives = vec![first];
    for entry in rest {
        match entry {
            MetaValue::List(items) => match items.get(3) {
                Some(MetaValue::Expr(expr)) => alternatives.push(expr.clone()),
                other => return Err(ActionFault::new(format!("not an alternative: {other:?}"))),
            },
            other => return Err(ActionFault::new(format!("not an alternative: {other:?}"))),
        }
    }
    Ok(MetaValue::Expr(Expr::choice(alternatives)))
}

fn on_seq_expr(args: &Bindings<MetaValue>) -> Result<MetaValue, ActionFault> {
    let first = expr_arg(args, "first")?;
    let rest = list_arg(args, "rest")?;
    if rest.is_empty() {
        return Ok(MetaValue::Expr(first));
    }
    let mut elements = vec![first];
    for entry in rest {
        match entry {
            MetaValue::List(items) => match items.get(1) {
                Some(MetaValue::Expr(expr)) => elements.push(expr.clone()),
                other => return Err(ActionFault::new(format!("not an element: {other:?}"))),
            },
            other => return Err(ActionFault::new(format!("not an element: {other:?}"))),
        }
    }
    Ok(MetaValue::Expr(Expr::sequence(elements)))
}

fn on_labeled_expr(args: &Bindings<MetaValue>) -> Result<MetaValue, ActionFault> {
    let expr = expr_arg(args, "expr")?;
    let items = match arg(args, "label") {
        Some(MetaValue::List(items)) => items,
        _ => return Ok(MetaValue::Expr(expr)),
    };
    let label = match items.first() {
        Some(value) => flat(value)?,
        None => String::new(),
    };
    let label = if label.is_empty() {
        // `:name` borrows the referenced rule's name.
        match expr.kind() {
            ExprKind::Rule(rule) => rule.clone(),
            _ => {
                return Err(ActionFault::new(
                    "a label can be omitted only on a rule reference",
                ))
            }
        }
    } else {
        label
    };
    Ok(MetaValue::Expr(Expr::labeled(label, expr)))
}

fn on_prefixed_expr(args: &Bindings<MetaValue>) -> Result<MetaValue, ActionFault> {
    let expr = expr_arg(args, "expr")?;
    let items = match arg(args, "prefix") {
        Some(MetaValue::List(items)) => items,
        _ => return Ok(MetaValue::Expr(expr)),
    };
    let op = match items.first() {
        Some(value) => flat(value)?,
        None => String::new(),
    };
    match op.as_str() {
        "!" => Ok(MetaValue::Expr(Expr::not(expr))),
        "&" => Ok(MetaValue::Expr(Expr::look_ahead(expr))),
        other => Err(ActionFault::new(format!("unknown prefix `{other}`"))),
    }
}

fn on_suffixed_expr(args: &Bindings<MetaValue>) -> Result<MetaValue, ActionFault> {
    let expr = expr_arg(args, "expr")?;
    let items = match arg(args, "suffix") {
        Some(MetaValue::List(items)) => items,
        _ => return Ok(MetaValue::Expr(expr)),
    };
    let op = match items.get(1) {
        Some(value) => flat(value)?,
        None => String::new(),
    };
    match op.as_str() {
        "?" => Ok(MetaValue::Expr(Expr::optional(expr))),
        "+" => Ok(MetaValue::Expr(Expr::one_or_more(expr))),
        "*" => Ok(MetaValue::Expr(Expr::zero_or_more(expr))),
        other => Err(ActionFault::new(format!("unknown suffix `{other}`"))),
    }
}

fn on_lit_expr(args: &Bindings<MetaValue>) -> Result<MetaValue, ActionFault> {
    let lit = flat_arg(args, "lit")?;
    let ignore = matches!(arg(args, "ignore"), Some(MetaValue::Str(s)) if s == "i");
    Ok(MetaValue::Expr(Expr::literal(lit, ignore)))
}

fn on_regexp_expr(args: &Bindings<MetaValue>) -> Result<MetaValue, ActionFault> {
    let pattern = flat_arg(args, "lit")?;
    let flags = flat_arg(args, "flags")?;
    Expr::regex(pattern, flags)
        .map(MetaValue::Expr)
        .map_err(|err| ActionFault::new(err.to_string()))
}

fn on_char_range_expr(args: &Bindings<MetaValue>) -> Result<MetaValue, ActionFault> {
    let content = flat_arg(args, "content")?;
    let ignore = matches!(arg(args, "ignore"), Some(MetaValue::Str(s)) if s == "i");
    let chars = if ignore {
        fold_class(&content)
    } else {
        content
    };
    Ok(MetaValue::Expr(Expr::char_range(chars)))
}

/// `[...]i` folds ASCII only: the class is lowered, then the uppercase
/// counterparts not already present are appended.
fn fold_class(content: &str) -> String {
    let lower: String = content.chars().map(|c| c.to_ascii_lowercase()).collect();
    let mut folded = lower.clone();
    for c in lower.chars() {
        let upper = c.to_ascii_uppercase();
        if upper != c && !folded.contains(upper) {
            folded.push(upper);
        }
    }
    folded
}

fn on_class_char_range(
    raw: &MetaValue,
    args: &Bindings<MetaValue>,
) -> Result<MetaValue, ActionFault> {
    let start = flat_arg(args, "start")?;
    let end = flat_arg(args, "end")?;
    expand_range(&start, &end).map(MetaValue::Str).ok_or_else(|| {
        ActionFault::new(format!(
            "Invalid char range : `{}`",
            flat(raw).unwrap_or_default()
        ))
    })
}

/// Expand `a-z`-style spans. Both ends must sit in the same charset
/// (lowercase, uppercase or digits), in order.
fn expand_range(start: &str, end: &str) -> Option<String> {
    let s = single_char(start)?;
    let e = single_char(end)?;
    let charset = if s.is_ascii_lowercase() {
        "abcdefghijklmnopqrstuvwxyz"
    } else if s.is_ascii_uppercase() {
        "ABCDEFGHIJKLMNOPQRSTUVWXYZ"
    } else if s.is_ascii_digit() {
        "0123456789"
    } else {
        return None;
    };
    let start_idx = charset.find(s)?;
    let end_idx = charset.find(e)?;
    if start_idx > end_idx {
        return None;
    }
    Some(charset[start_idx..=end_idx].to_string())
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    let c = chars.next()?;
    chars.next().is_none().then_some(c)
}

fn on_common_escape(raw: &MetaValue) -> Result<MetaValue, ActionFault> {
    let text = flat(raw)?;
    let unescaped = match text.as_str() {
        "a" => "\x07",
        "b" => "\x08",
        "t" => "\t",
        "n" => "\n",
        "f" => "\x0c",
        "r" => "\r",
        "v" => "\x0b",
        "\\" => "\\",
        other => return Err(ActionFault::new(format!("unknown escape `\\{other}`"))),
    };
    Ok(MetaValue::Str(unescaped.to_string()))
}

/// Run a grammar-building parser over grammar text.
pub(crate) fn rules_from(
    parser: &Parser<GrammarActions>,
    text: &str,
) -> Result<Vec<Rule>, GrammarError> {
    match parser.parse_rule("grammar", text) {
        Ok(MetaValue::Rules(rules)) => Ok(rules),
        Ok(other) => Err(GrammarError::Invalid(format!(
            "grammar parse produced {other:?}"
        ))),
        Err(ParseError::Syntax(diagnostic)) => Err(GrammarError::Syntax(diagnostic)),
        Err(ParseError::Action { message, .. }) => Err(GrammarError::Invalid(message)),
        Err(other) => Err(GrammarError::Invalid(other.to_string())),
    }
}

/// The shared stage-2 meta-parser. Built on first use: the bootstrap rules
/// compile [`META_GRAMMAR`], and the parser built from the result compiles
/// everything else.
pub(crate) fn meta_parser() -> &'static Parser<GrammarActions> {
    static META: OnceLock<Parser<GrammarActions>> = OnceLock::new();
    META.get_or_init(|| {
        let bootstrap = Parser::from_rules(bootstrap_rules(), GrammarActions)
            .expect("the bootstrap rule set is well formed");
        let rules =
            rules_from(&bootstrap, META_GRAMMAR).expect("the meta-grammar parses itself");
        Parser::from_rules(rules, GrammarActions).expect("the parsed meta-grammar is well formed")
    })
}

/// Compile grammar text into a rule list with the stage-2 meta-parser.
pub(crate) fn parse_rules(text: &str) -> Result<Vec<Rule>, GrammarError> {
    rules_from(meta_parser(), text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(grammar: &str) -> Rule {
        let mut rules = parse_rules(grammar).unwrap();
        assert_eq!(rules.len(), 1);
        rules.remove(0)
    }

    fn literal_of(rule: &Rule) -> &str {
        match rule.expr.kind() {
            ExprKind::Literal { lit, .. } => lit,
            other => panic!("expected a literal, got {other:?}"),
        }
    }

    fn class_of(rule: &Rule) -> &str {
        match rule.expr.kind() {
            ExprKind::CharRange { chars } => chars,
            other => panic!("expected a char range, got {other:?}"),
        }
    }

    #[test]
    fn string_literal_escapes() {
        assert_eq!(literal_of(&parse_one(r#"r <- "\n""#)), "\n");
        assert_eq!(literal_of(&parse_one(r#"r <- "\"""#)), "\"");
        assert_eq!(literal_of(&parse_one(r#"r <- '\n'"#)), "\n");
        assert_eq!(literal_of(&parse_one(r#"r <- "\\""#)), "\\");
    }

    #[test]
    fn char_class_parsing() {
        assert_eq!(class_of(&parse_one(r"r <- [ab]")), "ab");
        assert_eq!(class_of(&parse_one(r"r <- [ab\]]")), "ab]");
        assert_eq!(class_of(&parse_one(r"r <- [a-c]")), "abc");
        assert_eq!(class_of(&parse_one(r"r <- [ab\n]")), "ab\n");
        assert_eq!(class_of(&parse_one(r"r <- [0-9\\]")), "0123456789\\");
        assert_eq!(class_of(&parse_one(r"r <- [a-b]i")), "abAB");
    }

    #[test]
    fn bad_char_range_is_rejected() {
        let err = parse_rules(r"r <- [9-0]").unwrap_err();
        assert!(err.to_string().contains("Invalid char range"));
    }

    #[test]
    fn regex_expressions_compile() {
        let rule = parse_one(r#"r <- ~"[0-9]+""#);
        match rule.expr.kind() {
            ExprKind::Regex { pattern, flags, .. } => {
                assert_eq!(pattern, "[0-9]+");
                assert_eq!(flags, "");
            }
            other => panic!("expected a regex, got {other:?}"),
        }
        assert!(parse_rules(r#"r <- ~"(unclosed""#).is_err());
    }

    #[test]
    fn terminal_marker_and_alias() {
        let rule = parse_one("`r <- \"x\"");
        assert!(rule.terminal);
        assert_eq!(rule.alias, None);

        let rule = parse_one("r \"NAME\" <- \"x\"");
        assert!(rule.terminal);
        assert_eq!(rule.alias.as_deref(), Some("NAME"));
    }

    #[test]
    fn action_specs() {
        let rule = parse_one("r <- e:\"x\" {@e}");
        assert_eq!(rule.action, Some(ActionSpec::Capture("e".into())));

        let rule = parse_one("r <- \"x\" {make_it}");
        assert_eq!(rule.action, Some(ActionSpec::Method("make_it".into())));

        let rule = parse_one("r <- \"x\"");
        assert_eq!(rule.action, None);
    }

    #[test]
    fn omitted_label_takes_the_rule_name() {
        let rules = parse_rules("a <- :b\nb <- \"x\"").unwrap();
        match rules[0].expr.kind() {
            ExprKind::Labeled { label, expr, .. } => {
                assert_eq!(label, "b");
                assert!(matches!(expr.kind(), ExprKind::Rule(name) if name == "b"));
            }
            other => panic!("expected a label, got {other:?}"),
        }
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let rules = parse_rules("# leading comment\n\na <- \"x\" # trailing\nb <- \"y\"\n")
            .unwrap();
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn meta_grammar_reaches_a_fixed_point() {
        let bootstrap = Parser::from_rules(bootstrap_rules(), GrammarActions).unwrap();
        let first = rules_from(&bootstrap, META_GRAMMAR).unwrap();
        let stage2 = Parser::from_rules(first.clone(), GrammarActions).unwrap();
        let second = rules_from(&stage2, META_GRAMMAR).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn meta_grammar_round_trips_through_serialisation() {
        let first = parse_rules(META_GRAMMAR).unwrap();
        let surface = first
            .iter()
            .map(Rule::as_grammar)
            .collect::<Vec<_>>()
            .join("\n");
        let second = parse_rules(&surface).unwrap();
        assert_eq!(first, second);
    }
}
