//! Sandboxed assertion expressions for the `code` grader.
//!
//! A small, side-effect-free language: literals, the context variables in
//! [`CONTEXT_VARIABLES`], boolean/comparison/arithmetic operators, list
//! indexing and the functions in [`ALLOWED_FUNCTIONS`]. Names outside those
//! lists are rejected when the expression is parsed, so a spec with a bad
//! assertion fails at load time rather than mid-run.

use std::collections::BTreeMap;
use std::fmt;

/// Variables an assertion may reference.
pub const CONTEXT_VARIABLES: &[&str] = &[
    "output",
    "transcript",
    "tool_calls",
    "skills",
    "errors",
    "duration_ms",
    "turns",
    "tokens",
];

/// Functions an assertion may call.
pub const ALLOWED_FUNCTIONS: &[&str] = &[
    "len",
    "lower",
    "upper",
    "contains",
    "startswith",
    "endswith",
    "matches",
    "count",
    "any",
    "all",
    "int",
    "float",
    "str",
    "re.search",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("unknown name '{0}'")]
    UnknownName(String),

    #[error("function '{0}' is not allowed")]
    ForbiddenFunction(String),

    #[error("{0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("invalid regex: {0}")]
    Regex(String),
}

/// Runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }

    fn as_str(&self, func: &str) -> Result<&str, ExprError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(ExprError::Type(format!(
                "{func}() expects a string, got {}",
                other.type_name()
            ))),
        }
    }

    fn as_list(&self, func: &str) -> Result<&[Value], ExprError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(ExprError::Type(format!(
                "{func}() expects a list, got {}",
                other.type_name()
            ))),
        }
    }

    /// Convenience constructor for a list of strings.
    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(items.into_iter().map(|s| Value::Str(s.into())).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Num(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Num(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        Value::Str(s) => write!(f, "'{s}'")?,
                        other => write!(f, "{other}")?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}

/// Variable bindings for one evaluation.
pub type Scope = BTreeMap<&'static str, Value>;

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

fn lex(src: &str) -> Result<Vec<(usize, Tok)>, ExprError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let start = i;
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '(' => {
                out.push((start, Tok::LParen));
                i += 1;
            }
            ')' => {
                out.push((start, Tok::RParen));
                i += 1;
            }
            '[' => {
                out.push((start, Tok::LBracket));
                i += 1;
            }
            ']' => {
                out.push((start, Tok::RBracket));
                i += 1;
            }
            ',' => {
                out.push((start, Tok::Comma));
                i += 1;
            }
            '.' if !bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                out.push((start, Tok::Dot));
                i += 1;
            }
            '+' | '-' | '*' | '/' => {
                let op = match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    _ => "/",
                };
                out.push((start, Tok::Op(op)));
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let two = bytes.get(i + 1) == Some(&b'=');
                let op = match (c, two) {
                    ('=', true) => "==",
                    ('!', true) => "!=",
                    ('<', true) => "<=",
                    ('>', true) => ">=",
                    ('<', false) => "<",
                    ('>', false) => ">",
                    _ => {
                        return Err(ExprError::Parse {
                            offset: start,
                            message: format!("unexpected '{c}'"),
                        })
                    }
                };
                out.push((start, Tok::Op(op)));
                i += if two { 2 } else { 1 };
            }
            '\'' | '"' => {
                let quote = bytes[i];
                let mut s = String::new();
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => {
                            return Err(ExprError::Parse {
                                offset: start,
                                message: "unterminated string".into(),
                            })
                        }
                        Some(&b) if b == quote => {
                            i += 1;
                            break;
                        }
                        Some(&b'\\') => {
                            let esc = bytes
                                .get(i + 1)
                                .copied()
                                .filter(u8::is_ascii)
                                .ok_or(ExprError::Parse {
                                    offset: i,
                                    message: "invalid escape".into(),
                                })?;
                            // Unknown escapes stay literal so regex classes like `\d` survive.
                            match esc {
                                b'n' => s.push('\n'),
                                b't' => s.push('\t'),
                                b'\\' | b'\'' | b'"' => s.push(esc as char),
                                other => {
                                    s.push('\\');
                                    s.push(other as char);
                                }
                            }
                            i += 2;
                        }
                        Some(_) => {
                            // Copy one UTF-8 scalar.
                            let ch = src[i..].chars().next().ok_or(ExprError::Parse {
                                offset: i,
                                message: "invalid character".into(),
                            })?;
                            s.push(ch);
                            i += ch.len_utf8();
                        }
                    }
                }
                out.push((start, Tok::Str(s)));
            }
            c if c.is_ascii_digit() || c == '.' => {
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let text = &src[start..i];
                let n = text.parse::<f64>().map_err(|_| ExprError::Parse {
                    offset: start,
                    message: format!("invalid number '{text}'"),
                })?;
                out.push((start, Tok::Num(n)));
            }
            'r' | 'R' if matches!(bytes.get(i + 1), Some(b'\'' | b'"')) => {
                // Raw string: backslashes are kept, `\'` does not terminate.
                let quote = bytes[i + 1];
                let body = i + 2;
                let mut end = body;
                loop {
                    match bytes.get(end) {
                        None => {
                            return Err(ExprError::Parse {
                                offset: start,
                                message: "unterminated string".into(),
                            })
                        }
                        Some(&b) if b == quote => break,
                        Some(&b'\\') if end + 1 < bytes.len() => end += 2,
                        Some(_) => end += 1,
                    }
                }
                out.push((start, Tok::Str(src[body..end].to_string())));
                i = end + 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                out.push((start, Tok::Ident(src[start..i].to_string())));
            }
            other => {
                return Err(ExprError::Parse {
                    offset: start,
                    message: format!("unexpected '{other}'"),
                })
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Lit(Value),
    Var(String),
    List(Vec<Node>),
    Not(Box<Node>),
    Neg(Box<Node>),
    Bin(BinOp, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
    Index(Box<Node>, Box<Node>),
}

/// A parsed assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    source: String,
    root: Node,
}

impl Expr {
    /// Parse `src`, rejecting names outside the allow-lists.
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        let tokens = lex(src)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            len: src.len(),
        };
        let root = parser.or_expr()?;
        if let Some((offset, tok)) = parser.tokens.get(parser.pos) {
            return Err(ExprError::Parse {
                offset: *offset,
                message: format!("unexpected token {tok:?}"),
            });
        }
        Ok(Self {
            source: src.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, scope: &Scope) -> Result<Value, ExprError> {
        eval(&self.root, scope)
    }
}

struct Parser {
    tokens: Vec<(usize, Tok)>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(self.len)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        tok
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Parse {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn expect(&mut self, want: Tok, what: &str) -> Result<(), ExprError> {
        if self.peek() == Some(&want) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(s)) if s == kw)
    }

    fn or_expr(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.and_expr()?;
        while self.at_keyword("or") {
            self.pos += 1;
            let rhs = self.and_expr()?;
            lhs = Node::Bin(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.not_expr()?;
        while self.at_keyword("and") {
            self.pos += 1;
            let rhs = self.not_expr()?;
            lhs = Node::Bin(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Node, ExprError> {
        if self.at_keyword("not") {
            self.pos += 1;
            let inner = self.not_expr()?;
            return Ok(Node::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op("==")) => BinOp::Eq,
                Some(Tok::Op("!=")) => BinOp::Ne,
                Some(Tok::Op("<")) => BinOp::Lt,
                Some(Tok::Op("<=")) => BinOp::Le,
                Some(Tok::Op(">")) => BinOp::Gt,
                Some(Tok::Op(">=")) => BinOp::Ge,
                Some(Tok::Ident(s)) if s == "in" => BinOp::In,
                Some(Tok::Ident(s)) if s == "not" => {
                    // `not in`
                    match self.tokens.get(self.pos + 1) {
                        Some((_, Tok::Ident(next))) if next == "in" => {
                            self.pos += 1;
                            BinOp::NotIn
                        }
                        _ => return Ok(lhs),
                    }
                }
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn additive(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op("+")) => BinOp::Add,
                Some(Tok::Op("-")) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op("*")) => BinOp::Mul,
                Some(Tok::Op("/")) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Node, ExprError> {
        if self.peek() == Some(&Tok::Op("-")) {
            self.pos += 1;
            let inner = self.unary()?;
            return Ok(Node::Neg(Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Node, ExprError> {
        let mut node = self.primary()?;
        while self.peek() == Some(&Tok::LBracket) {
            self.pos += 1;
            let index = self.or_expr()?;
            self.expect(Tok::RBracket, "']'")?;
            node = Node::Index(Box::new(node), Box::new(index));
        }
        Ok(node)
    }

    fn primary(&mut self) -> Result<Node, ExprError> {
        let offset = self.offset();
        match self.bump() {
            Some(Tok::Num(n)) => Ok(Node::Lit(Value::Num(n))),
            Some(Tok::Str(s)) => Ok(Node::Lit(Value::Str(s))),
            Some(Tok::LParen) => {
                let inner = self.or_expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Some(Tok::LBracket) => {
                let items = self.args(Tok::RBracket, "']'")?;
                Ok(Node::List(items))
            }
            Some(Tok::Ident(name)) => self.identifier(name),
            Some(tok) => Err(ExprError::Parse {
                offset,
                message: format!("unexpected token {tok:?}"),
            }),
            None => Err(ExprError::Parse {
                offset,
                message: "unexpected end of expression".into(),
            }),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Node, ExprError> {
        match name.as_str() {
            "true" | "True" => return Ok(Node::Lit(Value::Bool(true))),
            "false" | "False" => return Ok(Node::Lit(Value::Bool(false))),
            _ => {}
        }

        let mut func = name;
        if self.peek() == Some(&Tok::Dot) {
            self.pos += 1;
            match self.bump() {
                Some(Tok::Ident(attr)) => func = format!("{func}.{attr}"),
                _ => return Err(self.error("expected attribute name after '.'")),
            }
            if self.peek() != Some(&Tok::LParen) {
                return Err(ExprError::UnknownName(func));
            }
        }

        if self.peek() == Some(&Tok::LParen) {
            if !ALLOWED_FUNCTIONS.contains(&func.as_str()) {
                return Err(ExprError::ForbiddenFunction(func));
            }
            self.pos += 1;
            let args = self.args(Tok::RParen, "')'")?;
            return Ok(Node::Call(func, args));
        }

        if CONTEXT_VARIABLES.contains(&func.as_str()) {
            Ok(Node::Var(func))
        } else {
            Err(ExprError::UnknownName(func))
        }
    }

    fn args(&mut self, close: Tok, what: &str) -> Result<Vec<Node>, ExprError> {
        let mut items = Vec::new();
        if self.peek() == Some(&close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.or_expr()?);
            match self.peek() {
                Some(Tok::Comma) => {
                    self.pos += 1;
                    if self.peek() == Some(&close) {
                        self.pos += 1;
                        return Ok(items);
                    }
                }
                Some(t) if *t == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.error(format!("expected ',' or {what}"))),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(node: &Node, scope: &Scope) -> Result<Value, ExprError> {
    match node {
        Node::Lit(v) => Ok(v.clone()),
        Node::Var(name) => scope
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| ExprError::UnknownName(name.clone())),
        Node::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|n| eval(n, scope))
                .collect::<Result<_, _>>()?,
        )),
        Node::Not(inner) => Ok(Value::Bool(!eval(inner, scope)?.truthy())),
        Node::Neg(inner) => match eval(inner, scope)? {
            Value::Num(n) => Ok(Value::Num(-n)),
            other => Err(ExprError::Type(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        },
        Node::Bin(BinOp::Or, lhs, rhs) => {
            if eval(lhs, scope)?.truthy() {
                Ok(Value::Bool(true))
            } else {
                Ok(Value::Bool(eval(rhs, scope)?.truthy()))
            }
        }
        Node::Bin(BinOp::And, lhs, rhs) => {
            if !eval(lhs, scope)?.truthy() {
                Ok(Value::Bool(false))
            } else {
                Ok(Value::Bool(eval(rhs, scope)?.truthy()))
            }
        }
        Node::Bin(op, lhs, rhs) => binary(op, eval(lhs, scope)?, eval(rhs, scope)?),
        Node::Index(target, index) => {
            let target = eval(target, scope)?;
            let index = match eval(index, scope)? {
                Value::Num(n) if n.fract() == 0.0 => n as i64,
                other => {
                    return Err(ExprError::Type(format!(
                        "index must be an integer, got {}",
                        other.type_name()
                    )))
                }
            };
            match target {
                Value::List(items) => pick(&items, index).cloned(),
                Value::Str(s) => {
                    let chars: Vec<Value> = s.chars().map(|c| Value::Str(c.to_string())).collect();
                    pick(&chars, index).cloned()
                }
                other => Err(ExprError::Type(format!(
                    "cannot index {}",
                    other.type_name()
                ))),
            }
        }
        Node::Call(name, args) => {
            let args = args
                .iter()
                .map(|n| eval(n, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, &args)
        }
    }
}

fn pick(items: &[Value], index: i64) -> Result<&Value, ExprError> {
    let len = items.len();
    let resolved = if index < 0 { len as i64 + index } else { index };
    if resolved < 0 || resolved as usize >= len {
        return Err(ExprError::IndexOutOfRange { index, len });
    }
    Ok(&items[resolved as usize])
}

fn binary(op: &BinOp, lhs: Value, rhs: Value) -> Result<Value, ExprError> {
    use Value::*;
    let out = match (op, lhs, rhs) {
        (BinOp::Eq, a, b) => Bool(a == b),
        (BinOp::Ne, a, b) => Bool(a != b),
        (BinOp::In, a, b) => Bool(contains(&b, &a)?),
        (BinOp::NotIn, a, b) => Bool(!contains(&b, &a)?),

        (BinOp::Lt, Num(a), Num(b)) => Bool(a < b),
        (BinOp::Le, Num(a), Num(b)) => Bool(a <= b),
        (BinOp::Gt, Num(a), Num(b)) => Bool(a > b),
        (BinOp::Ge, Num(a), Num(b)) => Bool(a >= b),
        (BinOp::Lt, Str(a), Str(b)) => Bool(a < b),
        (BinOp::Le, Str(a), Str(b)) => Bool(a <= b),
        (BinOp::Gt, Str(a), Str(b)) => Bool(a > b),
        (BinOp::Ge, Str(a), Str(b)) => Bool(a >= b),

        (BinOp::Add, Num(a), Num(b)) => Num(a + b),
        (BinOp::Add, Str(a), Str(b)) => Str(a + &b),
        (BinOp::Add, List(mut a), List(b)) => {
            a.extend(b);
            List(a)
        }
        (BinOp::Sub, Num(a), Num(b)) => Num(a - b),
        (BinOp::Mul, Num(a), Num(b)) => Num(a * b),
        (BinOp::Div, Num(_), Num(b)) if b == 0.0 => return Err(ExprError::DivisionByZero),
        (BinOp::Div, Num(a), Num(b)) => Num(a / b),

        (op, a, b) => {
            return Err(ExprError::Type(format!(
                "unsupported operand types for {op:?}: {} and {}",
                a.type_name(),
                b.type_name()
            )))
        }
    };
    Ok(out)
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, ExprError> {
    match (haystack, needle) {
        (Value::Str(h), Value::Str(n)) => Ok(h.contains(n.as_str())),
        (Value::List(items), n) => Ok(items.contains(n)),
        (h, n) => Err(ExprError::Type(format!(
            "cannot test {} membership in {}",
            n.type_name(),
            h.type_name()
        ))),
    }
}

fn arity(name: &str, args: &[Value], n: usize) -> Result<(), ExprError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(ExprError::Type(format!(
            "{name}() takes {n} argument(s), got {}",
            args.len()
        )))
    }
}

fn regex_search(pattern: &str, text: &str) -> Result<bool, ExprError> {
    let re = regex::Regex::new(pattern).map_err(|e| ExprError::Regex(e.to_string()))?;
    Ok(re.is_match(text))
}

fn call(name: &str, args: &[Value]) -> Result<Value, ExprError> {
    match name {
        "len" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Num(s.chars().count() as f64)),
                Value::List(items) => Ok(Value::Num(items.len() as f64)),
                other => Err(ExprError::Type(format!(
                    "len() of {}",
                    other.type_name()
                ))),
            }
        }
        "lower" => {
            arity(name, args, 1)?;
            Ok(Value::Str(args[0].as_str(name)?.to_lowercase()))
        }
        "upper" => {
            arity(name, args, 1)?;
            Ok(Value::Str(args[0].as_str(name)?.to_uppercase()))
        }
        "contains" => {
            arity(name, args, 2)?;
            Ok(Value::Bool(contains(&args[0], &args[1])?))
        }
        "startswith" => {
            arity(name, args, 2)?;
            let s = args[0].as_str(name)?;
            Ok(Value::Bool(s.starts_with(args[1].as_str(name)?)))
        }
        "endswith" => {
            arity(name, args, 2)?;
            let s = args[0].as_str(name)?;
            Ok(Value::Bool(s.ends_with(args[1].as_str(name)?)))
        }
        // matches(text, pattern)
        "matches" => {
            arity(name, args, 2)?;
            Ok(Value::Bool(regex_search(
                args[1].as_str(name)?,
                args[0].as_str(name)?,
            )?))
        }
        // re.search(pattern, text)
        "re.search" => {
            arity(name, args, 2)?;
            Ok(Value::Bool(regex_search(
                args[0].as_str(name)?,
                args[1].as_str(name)?,
            )?))
        }
        "count" => {
            arity(name, args, 2)?;
            let n = match (&args[0], &args[1]) {
                (Value::Str(h), Value::Str(n)) if !n.is_empty() => h.matches(n.as_str()).count(),
                (Value::Str(_), Value::Str(_)) => 0,
                (Value::List(items), n) => items.iter().filter(|v| *v == n).count(),
                (h, _) => {
                    return Err(ExprError::Type(format!(
                        "count() on {}",
                        h.type_name()
                    )))
                }
            };
            Ok(Value::Num(n as f64))
        }
        "any" => {
            arity(name, args, 1)?;
            Ok(Value::Bool(args[0].as_list(name)?.iter().any(Value::truthy)))
        }
        "all" => {
            arity(name, args, 1)?;
            Ok(Value::Bool(args[0].as_list(name)?.iter().all(Value::truthy)))
        }
        "int" => {
            arity(name, args, 1)?;
            let n = match &args[0] {
                Value::Num(n) => n.trunc(),
                Value::Bool(b) => f64::from(u8::from(*b)),
                Value::Str(s) => s.trim().parse::<i64>().map_err(|_| {
                    ExprError::Type(format!("int() cannot parse '{s}'"))
                })? as f64,
                other => {
                    return Err(ExprError::Type(format!(
                        "int() of {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Num(n))
        }
        "float" => {
            arity(name, args, 1)?;
            let n = match &args[0] {
                Value::Num(n) => *n,
                Value::Bool(b) => f64::from(u8::from(*b)),
                Value::Str(s) => s.trim().parse::<f64>().map_err(|_| {
                    ExprError::Type(format!("float() cannot parse '{s}'"))
                })?,
                other => {
                    return Err(ExprError::Type(format!(
                        "float() of {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Num(n))
        }
        "str" => {
            arity(name, args, 1)?;
            Ok(Value::Str(args[0].to_string()))
        }
        other => Err(ExprError::ForbiddenFunction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        let mut s = Scope::new();
        s.insert("output", Value::Str("Deployed to Azure in 3 steps".into()));
        s.insert("tool_calls", Value::strings(["bash", "edit", "bash"]));
        s.insert("skills", Value::strings(["azure-deploy"]));
        s.insert("errors", Value::List(vec![]));
        s.insert("transcript", Value::strings(["user.message", "assistant.message"]));
        s.insert("duration_ms", Value::Num(1500.0));
        s.insert("turns", Value::Num(2.0));
        s.insert("tokens", Value::Num(420.0));
        s
    }

    fn check(src: &str) -> bool {
        Expr::parse(src).unwrap().eval(&scope()).unwrap().truthy()
    }

    #[test]
    fn test_basic_assertions() {
        assert!(check("len(output) > 0"));
        assert!(check("'azure' in lower(output)"));
        assert!(check("'bash' in tool_calls and 'view' not in tool_calls"));
        assert!(check("count(tool_calls, 'bash') == 2"));
        assert!(check("len(errors) == 0"));
        assert!(check("duration_ms < 2000 or tokens > 10000"));
        assert!(check("not startswith(output, 'Error')"));
        assert!(check("tool_calls[0] == 'bash' and tool_calls[-1] == 'bash'"));
    }

    #[test]
    fn test_regex_functions() {
        assert!(check(r"matches(output, '\d+ steps')"));
        assert!(check(r"re.search('[Aa]zure', output)"));
        assert!(!check("matches(output, '^Failed')"));
    }

    #[test]
    fn test_raw_strings_keep_backslashes() {
        assert!(check(r"re.search(r'\d+ steps', output)"));
        assert!(check(r#"R"\d" == '\\d'"#));
        assert!(check(r"len(r'a\'b') == 4"));
        assert!(matches!(Expr::parse("r'open"), Err(ExprError::Parse { .. })));
    }

    #[test]
    fn test_precedence() {
        assert!(check("1 + 2 * 3 == 7"));
        assert!(check("-turns + 3 == 1"));
        assert!(check("not false and true"));
        assert!(check("(1 + 2) * 3 == 9"));
    }

    #[test]
    fn test_conversions_and_lists() {
        assert!(check("int('42') == 42"));
        assert!(check("float('0.5') * 2 == 1"));
        assert!(check("str(turns) == '2'"));
        assert!(check("all([True, len(skills) == 1])"));
        assert!(check("any([False, 'azure-deploy' in skills])"));
        assert!(check("upper('ok') == 'OK'"));
        assert!(check("endswith(output, 'steps')"));
        assert!(check("contains(output, 'Azure')"));
    }

    #[test]
    fn test_unknown_variable_rejected_at_parse() {
        assert_eq!(
            Expr::parse("secret == 1"),
            Err(ExprError::UnknownName("secret".into()))
        );
    }

    #[test]
    fn test_forbidden_function_rejected_at_parse() {
        assert_eq!(
            Expr::parse("open('/etc/passwd')"),
            Err(ExprError::ForbiddenFunction("open".into()))
        );
        assert_eq!(
            Expr::parse("os.system('ls')"),
            Err(ExprError::ForbiddenFunction("os.system".into()))
        );
        assert!(matches!(
            Expr::parse("output.__class__"),
            Err(ExprError::UnknownName(_))
        ));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(Expr::parse("len(output"), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse("output = 1"), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse("'open"), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse(""), Err(ExprError::Parse { .. })));
    }

    #[test]
    fn test_runtime_errors() {
        let s = scope();
        assert_eq!(
            Expr::parse("turns / 0").unwrap().eval(&s),
            Err(ExprError::DivisionByZero)
        );
        assert!(matches!(
            Expr::parse("tool_calls[10]").unwrap().eval(&s),
            Err(ExprError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            Expr::parse("output < 3").unwrap().eval(&s),
            Err(ExprError::Type(_))
        ));
    }
}
