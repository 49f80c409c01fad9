//! Expression and template evaluation over an execution context (C1).
//!
//! Two entry points, matching exactly:
//!
//! - [`eval_condition`] — booleans for edge conditions, `condition`/`switch`
//! steps, and `while`/`try_catch` group config.
//! - [`render_template`] — `{{expr}}` interpolation for templated step config
//! (an `llm` step's `prompt`, for instance).
//!
//! Path syntax: `$.a.b.c` and `$input.a.b.c` are equivalent roots into the
//! context's `input`; `$steps.<name>.output.x`, `$project.<name>`,
//! `$org.<name>`, `$personal.<name>`, `$vars.<name>`, `$run.<field>`, and
//! `$secrets.<name>` name the other scopes in `[i]` indexes into
//! arrays anywhere in a path.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by path resolution and expression parsing (C1 "Errors").
///
/// [`eval_condition`] and [`render_template`] handle `MissingPath`
/// internally per invariant 5 (absent path -> `false` / `""`) and
/// never let it escape; callers only ever observe [`EvalError::Parse`] or
/// [`EvalError::TypeMismatch`] from those two entry points. Lower-level
/// callers that use [`resolve_path`] directly do see `MissingPath`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("failed to parse expression: {0}")]
    Parse(String),
    #[error("path not found: {0}")]
    MissingPath(String),
    #[error("type mismatch evaluating `{op}`: {lhs} vs {rhs}")]
    TypeMismatch {
        op: String,
        lhs: String,
        rhs: String,
    },
    #[error("secrets access is not permitted in this evaluation context")]
    SecretsForbidden,
}

/// Read-only capability set gating which scopes an evaluation may touch.
/// `$secrets.<name>` is read-guarded: most evaluations (edge conditions,
/// templates authored by a tenant) run with `allow_secrets = false`; only
/// the credential-bound executor path flips it on for a single step's
/// resolved bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalCapabilities {
    pub allow_secrets: bool,
}

impl EvalCapabilities {
    #[must_use]
    pub const fn with_secrets() -> Self {
        Self { allow_secrets: true }
    }
}

/// The scopes an expression may resolve against. This is
/// a read-only view; the scheduler's mutable `ctx` (C7) builds one of these
/// per step dispatch from its authoritative state.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub input: Value,
    pub steps: HashMap<String, Value>,
    pub project_variables: HashMap<String, Value>,
    pub org_variables: HashMap<String, Value>,
    pub personal_variables: HashMap<String, Value>,
    pub secrets: HashMap<String, Value>,
    pub run: Value,
    pub vars: HashMap<String, Value>,
    pub capabilities: EvalCapabilities,
}

impl EvalContext {
    #[must_use]
    pub fn new(input: Value) -> Self {
        Self {
            input,
            steps: HashMap::new(),
            project_variables: HashMap::new(),
            org_variables: HashMap::new(),
            personal_variables: HashMap::new(),
            secrets: HashMap::new(),
            run: Value::Null,
            vars: HashMap::new(),
            capabilities: EvalCapabilities::default(),
        }
    }

    /// Record a completed step's output under `$steps.<name>.output`.
    pub fn record_step_output(&mut self, step_name: impl Into<String>, output: Value) {
        self.steps
            .insert(step_name.into(), serde_json::json!({ "output": output }));
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    Field(String),
    Index(usize),
}

/// A parsed reference into one of the context's scopes, e.g. `$steps.fnA.output.x[0]`.
#[derive(Debug, Clone, PartialEq)]
struct Path {
    root: Root,
    segments: Vec<PathSegment>,
    raw: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Root {
    Input,
    Steps,
    Project,
    Org,
    Personal,
    Secrets,
    Run,
    Vars,
}

fn parse_path(raw: &str) -> std::result::Result<Path, EvalError> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('$') {
        return Err(EvalError::Parse(format!(
            "path must start with `$`: {trimmed}"
        )));
    }
    let body = &trimmed[1..];
    let (root, rest) = if let Some(rest) = body.strip_prefix(".") {
        (Root::Input, rest)
    } else if let Some(rest) = body.strip_prefix("input") {
        (Root::Input, rest.trim_start_matches('.'))
    } else if let Some(rest) = body.strip_prefix("steps.") {
        (Root::Steps, rest)
    } else if let Some(rest) = body.strip_prefix("project.") {
        (Root::Project, rest)
    } else if let Some(rest) = body.strip_prefix("org.") {
        (Root::Org, rest)
    } else if let Some(rest) = body.strip_prefix("personal.") {
        (Root::Personal, rest)
    } else if let Some(rest) = body.strip_prefix("secrets.") {
        (Root::Secrets, rest)
    } else if let Some(rest) = body.strip_prefix("vars.") {
        (Root::Vars, rest)
    } else if let Some(rest) = body.strip_prefix("run") {
        (Root::Run, rest.trim_start_matches('.'))
    } else {
        return Err(EvalError::Parse(format!("unknown scope in path: {trimmed}")));
    };

    let segments = tokenize_segments(rest)?;
    Ok(Path {
        root,
        segments,
        raw: trimmed.to_string(),
    })
}

fn tokenize_segments(rest: &str) -> std::result::Result<Vec<PathSegment>, EvalError> {
    let mut segments = Vec::new();
    for dotted in rest.split('.') {
        if dotted.is_empty() {
            continue;
        }
        let mut field = String::new();
        let mut chars = dotted.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c == '[' {
                break;
            }
            field.push(c);
            chars.next();
        }
        if !field.is_empty() {
            segments.push(PathSegment::Field(field));
        }
        let remainder: String = chars.collect();
        let mut idx_str = remainder.as_str();
        while let Some(open) = idx_str.find('[') {
            let close = idx_str[open..].find(']').ok_or_else(|| {
                EvalError::Parse(format!("unterminated index in path segment: {dotted}"))
            })? + open;
            let idx: usize = idx_str[open + 1..close].parse().map_err(|_| {
                EvalError::Parse(format!("invalid array index in path segment: {dotted}"))
            })?;
            segments.push(PathSegment::Index(idx));
            idx_str = &idx_str[close + 1..];
        }
    }
    Ok(segments)
}

fn resolve_parsed(
    path: &Path,
    ctx: &EvalContext,
) -> std::result::Result<Value, EvalError> {
    let root_value: Value = match path.root {
        Root::Input => ctx.input.clone(),
        Root::Run => ctx.run.clone(),
        Root::Steps => {
            let PathSegment::Field(name) = path
                .segments
                .first()
                .ok_or_else(|| EvalError::MissingPath(path.raw.clone()))?
            else {
                return Err(EvalError::MissingPath(path.raw.clone()));
            };
            let value = ctx
                .steps
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::MissingPath(path.raw.clone()))?;
            return walk(&value, &path.segments[1..], &path.raw);
        }
        Root::Project => return lookup_map(&ctx.project_variables, &path.segments, &path.raw),
        Root::Org => return lookup_map(&ctx.org_variables, &path.segments, &path.raw),
        Root::Personal => return lookup_map(&ctx.personal_variables, &path.segments, &path.raw),
        Root::Vars => return lookup_map(&ctx.vars, &path.segments, &path.raw),
        Root::Secrets => {
            if !ctx.capabilities.allow_secrets {
                return Err(EvalError::SecretsForbidden);
            }
            return lookup_map(&ctx.secrets, &path.segments, &path.raw);
        }
    };
    walk(&root_value, &path.segments, &path.raw)
}

fn lookup_map(
    map: &HashMap<String, Value>,
    segments: &[PathSegment],
    raw: &str,
) -> std::result::Result<Value, EvalError> {
    let PathSegment::Field(name) = segments
        .first()
        .ok_or_else(|| EvalError::MissingPath(raw.to_string()))?
    else {
        return Err(EvalError::MissingPath(raw.to_string()));
    };
    let value = map
        .get(name)
        .cloned()
        .ok_or_else(|| EvalError::MissingPath(raw.to_string()))?;
    walk(&value, &segments[1..], raw)
}

fn walk(start: &Value, segments: &[PathSegment], raw: &str) -> std::result::Result<Value, EvalError> {
    let mut current = start.clone();
    for segment in segments {
        current = match (segment, &current) {
            (PathSegment::Field(name), Value::Object(map)) => map
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::MissingPath(raw.to_string()))?,
            (PathSegment::Index(i), Value::Array(items)) => items
                .get(*i)
                .cloned()
                .ok_or_else(|| EvalError::MissingPath(raw.to_string()))?,
            _ => return Err(EvalError::MissingPath(raw.to_string())),
        };
    }
    Ok(current)
}

/// Resolve a single path expression (e.g. `$steps.fnA.output.x`) against a
/// context. Used directly by callers that need a `Value`, not a boolean or
/// rendered string (e.g. `foreach`'s `input_path`).
pub fn resolve_path(expr: &str, ctx: &EvalContext) -> std::result::Result<Value, EvalError> {
    resolve_parsed(&parse_path(expr)?, ctx)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    And,
    Or,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    LParen,
    RParen,
}

fn lex(expr: &str) -> std::result::Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(EvalError::Parse(format!(
                        "unterminated string literal in expression: {expr}"
                    )));
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            '$' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || "._[]".contains(chars[i]))
                {
                    i += 1;
                }
                tokens.push(Token::Path(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num: f64 = text
                    .parse()
                    .map_err(|_| EvalError::Parse(format!("invalid number literal: {text}")))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_alphabetic() => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_alphanumeric() {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    "null" => tokens.push(Token::Null),
                    other => {
                        return Err(EvalError::Parse(format!("unexpected identifier: {other}")))
                    }
                }
            }
            other => {
                return Err(EvalError::Parse(format!(
                    "unexpected character `{other}` in expression: {expr}"
                )))
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Path(Path),
    Literal(Value),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

#[derive(Debug, Clone)]
enum Expr {
    Atom(Operand),
    Compare {
        op: Token,
        lhs: Operand,
        rhs: Operand,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_or(&mut self) -> std::result::Result<Expr, EvalError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> std::result::Result<Expr, EvalError> {
        let mut lhs = self.parse_comparison()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.bump();
            let rhs = self.parse_comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> std::result::Result<Expr, EvalError> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.bump();
            let inner = self.parse_or()?;
            if !matches!(self.bump(), Some(Token::RParen)) {
                return Err(EvalError::Parse("unmatched `(`".to_string()));
            }
            return Ok(inner);
        }
        let lhs = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(Token::Eq),
            Some(Token::Ne) => Some(Token::Ne),
            Some(Token::Gt) => Some(Token::Gt),
            Some(Token::Ge) => Some(Token::Ge),
            Some(Token::Lt) => Some(Token::Lt),
            Some(Token::Le) => Some(Token::Le),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let rhs = self.parse_operand()?;
            Ok(Expr::Compare { op, lhs, rhs })
        } else {
            Ok(Expr::Atom(lhs))
        }
    }

    fn parse_operand(&mut self) -> std::result::Result<Operand, EvalError> {
        match self.bump() {
            Some(Token::Path(p)) => Ok(Operand::Path(parse_path(&p)?)),
            Some(Token::Str(s)) => Ok(Operand::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Operand::Literal(
                serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number),
            )),
            Some(Token::Bool(b)) => Ok(Operand::Literal(Value::Bool(b))),
            Some(Token::Null) => Ok(Operand::Literal(Value::Null)),
            Some(Token::LParen) => {
                // A parenthesized operand only makes sense as a boolean
                // sub-expression; reject here, the caller's parse_comparison
                // already handles full parenthesization above this operand.
                Err(EvalError::Parse("unexpected `(` in operand position".to_string()))
            }
            other => Err(EvalError::Parse(format!(
                "expected a value or path, found {other:?}"
            ))),
        }
    }
}

fn parse_expr(expr: &str) -> std::result::Result<Expr, EvalError> {
    let tokens = lex(expr)?;
    if tokens.is_empty() {
        return Err(EvalError::Parse("empty expression".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let parsed = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(EvalError::Parse(format!(
            "trailing tokens after parsing expression: {expr}"
        )));
    }
    Ok(parsed)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Resolve an [`Operand`] to a `Value`, applying the documented
/// missing-path behavior for the caller's context (condition -> `false`,
/// template -> `""`) by returning `Ok(None)` rather than propagating
/// [`EvalError::MissingPath`].
fn resolve_operand(
    operand: &Operand,
    ctx: &EvalContext,
) -> std::result::Result<Option<Value>, EvalError> {
    match operand {
        Operand::Literal(v) => Ok(Some(v.clone())),
        Operand::Path(p) => match resolve_parsed(p, ctx) {
            Ok(v) => Ok(Some(v)),
            Err(EvalError::MissingPath(_)) => Ok(None),
            Err(e) => Err(e),
        },
    }
}

fn compare(op: &Token, lhs: &Value, rhs: &Value) -> std::result::Result<bool, EvalError> {
    let op_name = |t: &Token| match t {
        Token::Eq => "==",
        Token::Ne => "!=",
        Token::Gt => ">",
        Token::Ge => ">=",
        Token::Lt => "<",
        Token::Le => "<=",
        _ => "?",
    };
    match op {
        Token::Eq => Ok(values_equal(lhs, rhs)),
        Token::Ne => Ok(!values_equal(lhs, rhs)),
        Token::Gt | Token::Ge | Token::Lt | Token::Le => {
            if let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) {
                Ok(match op {
                    Token::Gt => l > r,
                    Token::Ge => l >= r,
                    Token::Lt => l < r,
                    Token::Le => l <= r,
                    _ => unreachable!(),
                })
            } else if let (Some(l), Some(r)) = (lhs.as_str(), rhs.as_str()) {
                Ok(match op {
                    Token::Gt => l > r,
                    Token::Ge => l >= r,
                    Token::Lt => l < r,
                    Token::Le => l <= r,
                    _ => unreachable!(),
                })
            } else {
                Err(EvalError::TypeMismatch {
                    op: op_name(op).to_string(),
                    lhs: lhs.to_string(),
                    rhs: rhs.to_string(),
                })
            }
        }
        _ => unreachable!("compare called with non-comparison token"),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) {
        return (l - r).abs() < f64::EPSILON;
    }
    lhs == rhs
}

fn eval_expr(expr: &Expr, ctx: &EvalContext) -> std::result::Result<bool, EvalError> {
    match expr {
        Expr::Atom(operand) => Ok(resolve_operand(operand, ctx)?
            .as_ref()
            .is_some_and(is_truthy)),
        Expr::Compare { op, lhs, rhs } => {
            let lhs_v = resolve_operand(lhs, ctx)?;
            let rhs_v = resolve_operand(rhs, ctx)?;
            match (lhs_v, rhs_v) {
                (Some(l), Some(r)) => compare(op, &l, &r),
                // Missing-path in a condition evaluates to false.
                _ => Ok(false),
            }
        }
        Expr::And(l, r) => Ok(eval_expr(l, ctx)? && eval_expr(r, ctx)?),
        Expr::Or(l, r) => Ok(eval_expr(l, ctx)? || eval_expr(r, ctx)?),
    }
}

/// Evaluate an edge condition / `condition`-step expression.
///
/// A missing path anywhere in the expression makes the enclosing
/// comparison (or truthy check) evaluate to `false` rather than raising an
/// error ; a genuine type mismatch between present
/// values (e.g. `"abc" > 3`) is a real [`EvalError::TypeMismatch`].
pub fn eval_condition(expr: &str, ctx: &EvalContext) -> std::result::Result<bool, EvalError> {
    let parsed = parse_expr(expr)?;
    eval_expr(&parsed, ctx)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Render a template, replacing every `{{expr}}` with the stringified value
/// of `expr` evaluated against `ctx`. A missing path renders as an empty
/// string ; a malformed expression or a genuine type
/// error propagates.
pub fn render_template(text: &str, ctx: &EvalContext) -> std::result::Result<String, EvalError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            return Err(EvalError::Parse(format!(
                "unterminated template expression in: {text}"
            )));
        };
        let inner = after_open[..end].trim();
        let operand = if inner.starts_with('$') {
            Operand::Path(parse_path(inner)?)
        } else {
            Operand::Literal(Value::String(inner.to_string()))
        };
        let resolved = resolve_operand(&operand, ctx)?;
        out.push_str(&resolved.as_ref().map_or_else(String::new, stringify));
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_input(input: Value) -> EvalContext {
        EvalContext::new(input)
    }

    #[test]
    fn truthy_check_on_present_path() {
        let ctx = ctx_with_input(serde_json::json!({ "v": 7 }));
        assert!(eval_condition("$.v", &ctx).unwrap());
    }

    #[test]
    fn missing_path_condition_is_false() {
        let ctx = ctx_with_input(serde_json::json!({}));
        assert!(!eval_condition("$.missing", &ctx).unwrap());
        assert!(!eval_condition("$.missing == 1", &ctx).unwrap());
    }

    #[test]
    fn numeric_comparisons() {
        let ctx = ctx_with_input(serde_json::json!({ "v": 7 }));
        assert!(eval_condition("$.v > 5", &ctx).unwrap());
        assert!(!eval_condition("$.v > 10", &ctx).unwrap());
        assert!(eval_condition("$.v >= 7 && $.v <= 10", &ctx).unwrap());
    }

    #[test]
    fn string_lexicographic_comparison() {
        let ctx = ctx_with_input(serde_json::json!({ "name": "bob" }));
        assert!(eval_condition("$.name == \"bob\"", &ctx).unwrap());
        assert!(eval_condition("$.name < \"zoe\"", &ctx).unwrap());
    }

    #[test]
    fn short_circuit_or() {
        let ctx = ctx_with_input(serde_json::json!({ "v": 0 }));
        assert!(eval_condition("$.v || true", &ctx).unwrap());
        assert!(!eval_condition("$.v || false", &ctx).unwrap());
    }

    #[test]
    fn type_mismatch_on_ordering_is_an_error() {
        let ctx = ctx_with_input(serde_json::json!({ "v": "abc" }));
        let err = eval_condition("$.v > 3", &ctx).unwrap_err();
        assert!(matches!(err, EvalError::TypeMismatch { .. }));
    }

    #[test]
    fn steps_scope_resolves_nested_output() {
        let mut ctx = ctx_with_input(Value::Null);
        ctx.record_step_output("fnA", serde_json::json!({ "items": [1, 2, 3] }));
        let v = resolve_path("$steps.fnA.output.items[1]", &ctx).unwrap();
        assert_eq!(v, serde_json::json!(2));
    }

    #[test]
    fn template_renders_missing_as_empty() {
        let ctx = ctx_with_input(serde_json::json!({ "v": 5 }));
        let rendered = render_template("value is {{$.v}}, missing is [{{$.nope}}]", &ctx).unwrap();
        assert_eq!(rendered, "value is 5, missing is []");
    }

    #[test]
    fn secrets_are_capability_gated() {
        let mut ctx = ctx_with_input(Value::Null);
        ctx.secrets.insert("api_key".to_string(), Value::String("shh".to_string()));
        let err = resolve_path("$secrets.api_key", &ctx).unwrap_err();
        assert_eq!(err, EvalError::SecretsForbidden);

        ctx.capabilities = EvalCapabilities::with_secrets();
        let v = resolve_path("$secrets.api_key", &ctx).unwrap();
        assert_eq!(v, Value::String("shh".to_string()));
    }
}
