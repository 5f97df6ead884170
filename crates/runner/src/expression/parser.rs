//! Recursive-descent parser and evaluator for operator expressions
//!
//! ```text
//! expr       := or
//! or         := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | comparison
//! comparison := infix ( ( "==" | "!=" | "<" | "<=" | ">" | ">=" | "contains" ) infix )?
//! infix      := primary ( "extract" primary )*
//! primary    := literal | $$path | ident "(" args ")" | ident | "(" expr ")"
//! ```
//!
//! Bare identifiers evaluate to the context key of that name when present,
//! otherwise to the identifier text itself.

use serde_json::Value;

use super::{jq, resolve_meta_path, scan_meta_ref, stringify};
use crate::error::{RunnerError, RunnerResult};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Meta(String),
    LParen,
    RParen,
    Comma,
    Op(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Meta(String),
    Ident(String),
    Call(String, Vec<Expr>),
    Not(Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
}

fn err(msg: impl Into<String>) -> RunnerError {
    RunnerError::Expression(msg.into())
}

fn tokenize(input: &str) -> RunnerResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '$' if chars.get(i + 1) == Some(&'$') => {
                let end = scan_meta_ref(&chars, i);
                if end == i + 2 {
                    return Err(err("empty $$ reference"));
                }
                tokens.push(Token::Meta(chars[i + 2..end].iter().collect()));
                i = end;
            }
            '"' | '\'' => {
                let quote = c;
                let mut out = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(err("unterminated string literal")),
                        Some('\\') if matches!(chars.get(i + 1), Some(n) if *n == quote || *n == '\\') => {
                            out.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            out.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(out));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| err(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.' || chars[i] == '-') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let op = match two.as_str() {
                    "==" => Some("=="),
                    "!=" => Some("!="),
                    "<=" => Some("<="),
                    ">=" => Some(">="),
                    "&&" => Some("&&"),
                    "||" => Some("||"),
                    _ => None,
                };
                if let Some(op) = op {
                    tokens.push(Token::Op(op));
                    i += 2;
                    continue;
                }
                let op = match c {
                    '<' => "<",
                    '>' => ">",
                    '!' => "!",
                    other => return Err(err(format!("unexpected character '{}'", other))),
                };
                tokens.push(Token::Op(op));
                i += 1;
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> RunnerResult<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(err(format!("expected {:?}, found {:?}", expected, other))),
        }
    }

    fn peek_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(Token::Op(o)) if *o == op)
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn parse_or(&mut self) -> RunnerResult<Expr> {
        let mut left = self.parse_and()?;
        while self.peek_op("||") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Binary("||", Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> RunnerResult<Expr> {
        let mut left = self.parse_unary()?;
        while self.peek_op("&&") {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary("&&", Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> RunnerResult<Expr> {
        if self.peek_op("!") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> RunnerResult<Expr> {
        let left = self.parse_infix()?;
        let op = match self.peek() {
            Some(Token::Op(op)) if matches!(*op, "==" | "!=" | "<" | "<=" | ">" | ">=") => *op,
            Some(Token::Ident(w)) if w == "contains" => "contains",
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_infix()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_infix(&mut self) -> RunnerResult<Expr> {
        let mut left = self.parse_primary()?;
        while self.peek_word("extract") && !matches!(self.tokens.get(self.pos + 1), Some(Token::LParen)) {
            self.pos += 1;
            let right = self.parse_primary()?;
            left = Expr::Call("extract".to_string(), vec![left, right]);
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> RunnerResult<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::from(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Meta(path)) => Ok(Expr::Meta(path)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if matches!(self.peek(), Some(Token::LParen)) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Token::RParen)) {
                        loop {
                            args.push(self.parse_or()?);
                            match self.next() {
                                Some(Token::Comma) => continue,
                                Some(Token::RParen) => break,
                                other => return Err(err(format!("expected ',' or ')', found {:?}", other))),
                            }
                        }
                    } else {
                        self.pos += 1;
                    }
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Ident(name)),
            },
            other => Err(err(format!("unexpected token {:?}", other))),
        }
    }
}

/// Parse a complete expression
pub(crate) fn parse(input: &str) -> RunnerResult<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(err("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(err(format!("unexpected trailing input in '{}'", input)));
    }
    Ok(expr)
}

/// Evaluate an expression against a context object
pub(crate) fn evaluate(expr: &Expr, context: &Value) -> RunnerResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Meta(path) => resolve_meta_path(path, context)
            .ok_or_else(|| err(format!("unresolved reference $${}", path))),
        Expr::Ident(name) => Ok(context
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::String(name.clone()))),
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&evaluate(inner, context)?))),
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, context))
                .collect::<RunnerResult<Vec<_>>>()?;
            call(name, values)
        }
        Expr::Binary(op, left, right) => {
            let l = evaluate(left, context)?;
            match *op {
                "&&" => {
                    if !truthy(&l) {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(truthy(&evaluate(right, context)?)))
                }
                "||" => {
                    if truthy(&l) {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(truthy(&evaluate(right, context)?)))
                }
                _ => {
                    let r = evaluate(right, context)?;
                    compare(op, &l, &r).map(Value::Bool)
                }
            }
        }
    }
}

fn call(name: &str, args: Vec<Value>) -> RunnerResult<Value> {
    match (name, args.as_slice()) {
        ("extract", [subject, pattern]) => extract(subject, pattern),
        ("jq", [json, query]) => {
            let input = match json {
                Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| json.clone()),
                other => other.clone(),
            };
            let query = stringify(query);
            let mut outputs = jq::run(&query, &input)?;
            Ok(match outputs.len() {
                0 => Value::Null,
                1 => outputs.remove(0),
                _ => Value::Array(outputs),
            })
        }
        ("extract", _) | ("jq", _) => Err(err(format!("{} expects 2 arguments, got {}", name, args.len()))),
        _ => Err(err(format!("unknown operator '{}'", name))),
    }
}

fn extract(subject: &Value, pattern: &Value) -> RunnerResult<Value> {
    let subject = stringify(subject);
    let mut pattern = stringify(pattern);
    if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        pattern = pattern[1..pattern.len() - 1].to_string();
    }
    let re = regex::Regex::new(&pattern)?;
    Ok(match re.captures(&subject) {
        Some(caps) => caps
            .get(1)
            .or_else(|| caps.get(0))
            .map(|m| Value::String(m.as_str().to_string()))
            .unwrap_or(Value::Null),
        None => Value::Null,
    })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare(op: &str, l: &Value, r: &Value) -> RunnerResult<bool> {
    if op == "contains" {
        return Ok(match l {
            Value::String(s) => s.contains(&stringify(r)),
            Value::Array(items) => items.iter().any(|item| loosely_equal(item, r)),
            Value::Object(map) => map.contains_key(&stringify(r)),
            _ => false,
        });
    }

    if op == "==" {
        return Ok(loosely_equal(l, r));
    }
    if op == "!=" {
        return Ok(!loosely_equal(l, r));
    }

    let ordering = match (as_number(l), as_number(r)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(stringify(l).cmp(&stringify(r))),
    }
    .ok_or_else(|| err("values cannot be ordered"))?;

    Ok(match op {
        "<" => ordering.is_lt(),
        "<=" => ordering.is_le(),
        ">" => ordering.is_gt(),
        ">=" => ordering.is_ge(),
        other => return Err(err(format!("unknown comparison '{}'", other))),
    })
}

fn loosely_equal(l: &Value, r: &Value) -> bool {
    if l == r {
        return true;
    }
    match (l, r) {
        (Value::Number(_), _) | (_, Value::Number(_)) => match (as_number(l), as_number(r)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => s == &b.to_string(),
        _ => false,
    }
}

/// Truthiness used for assertions and logical operators
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(_) | Value::Object(_) => true,
    }
}
