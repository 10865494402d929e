//! TG-004: Expression tree and partial evaluation.
//!
//! HCL expressions are lowered into a small tree that covers what remote
//! state paths actually use: literals, `local.*`/`each.*` references,
//! attribute access, indexing, string interpolation and collection
//! constructors. Anything else is kept as `Opaque` source text and never
//! evaluates. Evaluation against an incomplete context is expected to fail
//! often, so the failure case is a plain [`Unresolved`] value.

use super::context::EvalContext;
use hcl::expr::{Expression, ObjectKey, TemplateExpr, TraversalOperator};
use hcl::template::{Element, Template};
use indexmap::IndexMap;
use std::fmt;

/// A fully evaluated value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// String form used inside `${...}`. Collections and null have none.
    pub fn interpolate(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Number(_) | Self::Bool(_) => Some(self.to_string()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Object(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{} = {}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// Why an expression could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub reason: String,
}

impl Unresolved {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Result of evaluating an expression.
pub type Eval = Result<Value, Unresolved>;

/// One piece of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Interpolation(Expr),
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Root variable such as `local` or `each`
    Variable(String),
    GetAttr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Template(Vec<TemplatePart>),
    List(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Call(String, Vec<Expr>),
    /// Unsupported construct, kept as source text
    Opaque(String),
}

impl Expr {
    pub fn string(s: &str) -> Self {
        Self::Literal(Value::String(s.to_string()))
    }

    /// Lower an HCL expression.
    pub fn from_hcl(expr: &Expression) -> Self {
        match expr {
            Expression::Null => Self::Literal(Value::Null),
            Expression::Bool(b) => Self::Literal(Value::Bool(*b)),
            Expression::Number(n) => match n.as_f64() {
                Some(f) => Self::Literal(Value::Number(f)),
                None => Self::Opaque(n.to_string()),
            },
            Expression::String(s) => Self::string(s),
            Expression::Array(items) => Self::List(items.iter().map(Self::from_hcl).collect()),
            Expression::Object(object) => Self::Object(
                object
                    .iter()
                    .map(|(key, value)| (object_key(key), Self::from_hcl(value)))
                    .collect(),
            ),
            Expression::TemplateExpr(template) => {
                lower_template(template).unwrap_or_else(|| Self::Opaque(hcl_source(expr)))
            }
            Expression::Variable(var) => Self::Variable(var.to_string()),
            Expression::Traversal(traversal) => {
                let mut current = Self::from_hcl(&traversal.expr);
                for op in &traversal.operators {
                    current = match op {
                        TraversalOperator::GetAttr(ident) => {
                            Self::GetAttr(Box::new(current), ident.to_string())
                        }
                        TraversalOperator::Index(index) => {
                            Self::Index(Box::new(current), Box::new(Self::from_hcl(index)))
                        }
                        TraversalOperator::LegacyIndex(i) => Self::Index(
                            Box::new(current),
                            Box::new(Self::Literal(Value::Number(*i as f64))),
                        ),
                        // splats
                        _ => return Self::Opaque(hcl_source(expr)),
                    };
                }
                current
            }
            Expression::FuncCall(call) => Self::Call(
                call.name.to_string(),
                call.args.iter().map(Self::from_hcl).collect(),
            ),
            Expression::Parenthesis(inner) => Self::from_hcl(inner),
            other => Self::Opaque(hcl_source(other)),
        }
    }

    /// Evaluate against a context.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Eval {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Variable(name) => ctx
                .lookup(name)
                .cloned()
                .ok_or_else(|| Unresolved::new(format!("unknown variable '{}'", name))),
            Self::GetAttr(base, attr) => match base.eval(ctx)? {
                Value::Object(mut map) => map
                    .swap_remove(attr)
                    .ok_or_else(|| Unresolved::new(format!("'{}' has no attribute '{}'", base, attr))),
                other => Err(Unresolved::new(format!(
                    "cannot read attribute '{}' of {} '{}'",
                    attr,
                    other.type_name(),
                    base
                ))),
            },
            Self::Index(base, index) => {
                let collection = base.eval(ctx)?;
                let key = index.eval(ctx)?;
                index_value(collection, &key)
                    .ok_or_else(|| Unresolved::new(format!("'{}' has no element {}", base, key)))
            }
            Self::Template(parts) => eval_template(parts, ctx),
            Self::List(items) => items
                .iter()
                .map(|item| item.eval(ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Self::Object(entries) => {
                let mut map = IndexMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.eval(ctx)?);
                }
                Ok(Value::Object(map))
            }
            Self::Call(name, args) => eval_call(name, args, ctx),
            Self::Opaque(text) => Err(Unresolved::new(format!("unsupported expression '{}'", text))),
        }
    }

    /// Text suitable as a path template: string contents without quotes.
    pub fn source_text(&self) -> String {
        match self {
            Self::Literal(Value::String(s)) => s.clone(),
            Self::Template(parts) => render_parts(parts),
            other => other.to_string(),
        }
    }

    /// Names `N` referenced as `local.N` anywhere in the tree.
    pub fn local_refs(&self) -> Vec<String> {
        let mut refs = Vec::new();
        self.collect_local_refs(&mut refs);
        refs
    }

    fn collect_local_refs(&self, refs: &mut Vec<String>) {
        match self {
            Self::GetAttr(base, attr) => {
                if matches!(base.as_ref(), Self::Variable(v) if v == "local") {
                    refs.push(attr.clone());
                } else {
                    base.collect_local_refs(refs);
                }
            }
            Self::Index(base, index) => {
                base.collect_local_refs(refs);
                index.collect_local_refs(refs);
            }
            Self::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Interpolation(expr) = part {
                        expr.collect_local_refs(refs);
                    }
                }
            }
            Self::List(items) | Self::Call(_, items) => {
                for item in items {
                    item.collect_local_refs(refs);
                }
            }
            Self::Object(entries) => {
                for (_, value) in entries {
                    value.collect_local_refs(refs);
                }
            }
            Self::Literal(_) | Self::Variable(_) | Self::Opaque(_) => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(Value::String(s)) => write!(f, "\"{}\"", s),
            Self::Literal(value) => write!(f, "{}", value),
            Self::Variable(name) => write!(f, "{}", name),
            Self::GetAttr(base, attr) => write!(f, "{}.{}", base, attr),
            Self::Index(base, index) => write!(f, "{}[{}]", base, index),
            Self::Template(parts) => write!(f, "\"{}\"", render_parts(parts)),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Object(entries) => {
                let parts: Vec<String> = entries.iter().map(|(k, v)| format!("{} = {}", k, v)).collect();
                write!(f, "{{ {} }}", parts.join(", "))
            }
            Self::Call(name, args) => {
                let parts: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, parts.join(", "))
            }
            Self::Opaque(text) => write!(f, "{}", text),
        }
    }
}

/// Object keys are identifiers or (rarely) expressions.
pub(crate) fn object_key(key: &ObjectKey) -> String {
    match key {
        ObjectKey::Identifier(ident) => ident.to_string(),
        ObjectKey::Expression(Expression::String(s)) => s.clone(),
        ObjectKey::Expression(expr) => Expr::from_hcl(expr).source_text(),
        #[allow(unreachable_patterns)]
        _ => String::new(),
    }
}

fn hcl_source(expr: &Expression) -> String {
    hcl::format::to_string(expr).unwrap_or_else(|_| "<expression>".to_string())
}

fn lower_template(expr: &TemplateExpr) -> Option<Expr> {
    let template = Template::from_expr(expr).ok()?;
    let mut parts = Vec::new();
    for element in template.elements() {
        match element {
            Element::Literal(text) => parts.push(TemplatePart::Literal(text.clone())),
            Element::Interpolation(interp) => {
                parts.push(TemplatePart::Interpolation(Expr::from_hcl(&interp.expr)))
            }
            // %{ if } / %{ for } directives
            _ => return None,
        }
    }
    match parts.as_slice() {
        [] => Some(Expr::string("")),
        [TemplatePart::Literal(text)] => Some(Expr::string(text)),
        _ => Some(Expr::Template(parts)),
    }
}

fn render_parts(parts: &[TemplatePart]) -> String {
    let mut out = String::new();
    for part in parts {
        match part {
            TemplatePart::Literal(text) => out.push_str(text),
            TemplatePart::Interpolation(expr) => {
                out.push_str("${");
                out.push_str(&expr.to_string());
                out.push('}');
            }
        }
    }
    out
}

fn eval_template(parts: &[TemplatePart], ctx: &EvalContext<'_>) -> Eval {
    // "${x}" alone yields x itself, not its string form
    if let [TemplatePart::Interpolation(expr)] = parts {
        return expr.eval(ctx);
    }
    let mut out = String::new();
    for part in parts {
        match part {
            TemplatePart::Literal(text) => out.push_str(text),
            TemplatePart::Interpolation(expr) => {
                let value = expr.eval(ctx)?;
                let text = value.interpolate().ok_or_else(|| {
                    Unresolved::new(format!("cannot interpolate {} '{}'", value.type_name(), expr))
                })?;
                out.push_str(&text);
            }
        }
    }
    Ok(Value::String(out))
}

fn index_value(collection: Value, key: &Value) -> Option<Value> {
    match (collection, key) {
        (Value::Object(mut map), Value::String(k)) => map.swap_remove(k),
        (Value::List(mut items), Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
            let i = *n as usize;
            (i < items.len()).then(|| items.swap_remove(i))
        }
        _ => None,
    }
}

fn eval_call(name: &str, args: &[Expr], ctx: &EvalContext<'_>) -> Eval {
    let [arg] = args else {
        return Err(Unresolved::new(format!("unsupported call '{}'", name)));
    };
    match name {
        "tolist" => match arg.eval(ctx)? {
            list @ Value::List(_) => Ok(list),
            other => Err(Unresolved::new(format!("tolist of {}", other.type_name()))),
        },
        "toset" => match arg.eval(ctx)? {
            Value::List(items) => {
                let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    if !unique.contains(&item) {
                        unique.push(item);
                    }
                }
                Ok(Value::List(unique))
            }
            other => Err(Unresolved::new(format!("toset of {}", other.type_name()))),
        },
        "tomap" => match arg.eval(ctx)? {
            map @ Value::Object(_) => Ok(map),
            other => Err(Unresolved::new(format!("tomap of {}", other.type_name()))),
        },
        _ => Err(Unresolved::new(format!("unsupported function '{}'", name))),
    }
}
