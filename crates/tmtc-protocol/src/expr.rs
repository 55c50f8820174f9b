//! Expressions for computed fields.
//!
//! Computed fields evaluate an expression against the current field map, with
//! one variable per field. The evaluation technology is pluggable through
//! [`ExpressionEvaluator`]; [`BuiltinEvaluator`] covers arithmetic,
//! comparisons, boolean logic and a handful of functions:
//!
//! ```text
//! raw * 0.1 - 40
//! if(status == 'ON', 1, 0)
//! max(a, b) + abs(offset)
//! ```

use crate::error::{FieldError, FieldResult};
use std::cmp::Ordering;
use std::fmt;
use tmtc_common::{FieldMap, Value};

/// Compiles expression sources.
pub trait ExpressionEvaluator: Send + Sync {
    /// Compile `source`, reporting syntax errors as [`FieldError::Expression`].
    fn compile(&self, source: &str) -> FieldResult<Box<dyn CompiledExpression>>;
}

/// A compiled expression, evaluated against named bindings.
pub trait CompiledExpression: Send + Sync + fmt::Debug {
    /// Evaluate the expression. The error is a human-readable reason.
    fn evaluate(&self, bindings: &FieldMap) -> Result<Value, String>;
}

/// The built-in expression language.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEvaluator;

impl ExpressionEvaluator for BuiltinEvaluator {
    fn compile(&self, source: &str) -> FieldResult<Box<dyn CompiledExpression>> {
        let err = |reason: String| FieldError::Expression {
            expression: source.to_string(),
            reason,
        };
        let tokens = tokenize(source).map_err(err)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expression().map_err(err)?;
        if let Some(token) = parser.peek() {
            return Err(err(format!("unexpected {:?}", token)));
        }
        Ok(Box::new(expr))
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Value),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

const TWO_CHAR_OPS: &[&str] = &["==", "!=", "<=", ">=", "&&", "||"];
const ONE_CHAR_OPS: &[&str] = &["+", "-", "*", "/", "%", "<", ">", "!"];

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            if c == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
                i += 2;
                while i < chars.len() && chars[i].is_ascii_hexdigit() {
                    i += 1;
                }
                let digits: String = chars[start + 2..i].iter().collect();
                let value = i64::from_str_radix(&digits, 16)
                    .map_err(|_| format!("bad hex literal at {}", start))?;
                tokens.push(Token::Literal(Value::Integer(value)));
                continue;
            }
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = if text.contains('.') {
                text.parse::<f64>().map(Value::Float).ok()
            } else {
                text.parse::<i64>().map(Value::Integer).ok()
            };
            tokens.push(Token::Literal(
                value.ok_or_else(|| format!("bad number '{}'", text))?,
            ));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(match word.as_str() {
                "true" => Token::Literal(Value::Bool(true)),
                "false" => Token::Literal(Value::Bool(false)),
                "null" => Token::Literal(Value::Null),
                _ => Token::Ident(word),
            });
        } else if c == '\'' || c == '"' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|&ch| ch == c)
                .map(|p| start + p)
                .ok_or_else(|| format!("unterminated string at {}", i))?;
            tokens.push(Token::Literal(Value::String(chars[start..end].iter().collect())));
            i = end + 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == ',' {
            tokens.push(Token::Comma);
            i += 1;
        } else {
            let pair: String = chars[i..chars.len().min(i + 2)].iter().collect();
            if let Some(op) = TWO_CHAR_OPS.iter().find(|op| **op == pair) {
                tokens.push(Token::Op(*op));
                i += 2;
            } else if let Some(op) = ONE_CHAR_OPS.iter().find(|op| op.starts_with(c)) {
                tokens.push(Token::Op(*op));
                i += 1;
            } else {
                return Err(format!("unexpected character '{}'", c));
            }
        }
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Abs,
    Min,
    Max,
    Round,
    Floor,
    Ceil,
    If,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Function::Abs,
            "min" => Function::Min,
            "max" => Function::Max,
            "round" => Function::Round,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            "if" => Function::If,
            _ => return None,
        })
    }

    fn accepts(&self, argc: usize) -> bool {
        match self {
            Function::Min | Function::Max => argc >= 2,
            Function::If => argc == 3,
            _ => argc == 1,
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Variable(String),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
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

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expression(&mut self) -> Result<Expr, String> {
        self.binary_level(0)
    }

    fn binary_level(&mut self, level: usize) -> Result<Expr, String> {
        const LEVELS: &[&[&str]] = &[
            &["||"],
            &["&&"],
            &["==", "!="],
            &["<", "<=", ">", ">="],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary_level(level + 1)?;
        while let Some(op) = self.eat_op(LEVELS[level]) {
            let rhs = self.binary_level(level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if let Some(op) = self.eat_op(&["-", "!"]) {
            return Ok(Expr::Unary(op, Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Literal(v)) => Ok(Expr::Literal(v)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Expr::Variable(name));
                }
                self.pos += 1;
                let function =
                    Function::lookup(&name).ok_or_else(|| format!("unknown function '{}'", name))?;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::RParen) {
                    self.pos += 1;
                } else {
                    loop {
                        args.push(self.expression()?);
                        match self.next() {
                            Some(Token::Comma) => continue,
                            Some(Token::RParen) => break,
                            _ => return Err(format!("missing ')' after arguments of '{}'", name)),
                        }
                    }
                }
                if !function.accepts(args.len()) {
                    return Err(format!("wrong number of arguments for '{}'", name));
                }
                Ok(Expr::Call(function, args))
            }
            Some(other) => Err(format!("unexpected {:?}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

impl CompiledExpression for Expr {
    fn evaluate(&self, bindings: &FieldMap) -> Result<Value, String> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Variable(name) => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| format!("unknown variable '{}'", name)),
            Expr::Unary(op, inner) => {
                let v = inner.evaluate(bindings)?;
                match (*op, v) {
                    ("-", Value::Integer(i)) => i
                        .checked_neg()
                        .map(Value::Integer)
                        .ok_or_else(|| "integer overflow".to_string()),
                    ("-", Value::Float(f)) => Ok(Value::Float(-f)),
                    ("!", v) => Ok(Value::Bool(!truthy(&v)?)),
                    (_, v) => Err(format!("cannot negate '{}'", v)),
                }
            }
            Expr::Binary("&&", lhs, rhs) => Ok(Value::Bool(
                truthy(&lhs.evaluate(bindings)?)? && truthy(&rhs.evaluate(bindings)?)?,
            )),
            Expr::Binary("||", lhs, rhs) => Ok(Value::Bool(
                truthy(&lhs.evaluate(bindings)?)? || truthy(&rhs.evaluate(bindings)?)?,
            )),
            Expr::Binary(op, lhs, rhs) => {
                binary(op, lhs.evaluate(bindings)?, rhs.evaluate(bindings)?)
            }
            Expr::Call(function, args) => {
                if *function == Function::If {
                    return if truthy(&args[0].evaluate(bindings)?)? {
                        args[1].evaluate(bindings)
                    } else {
                        args[2].evaluate(bindings)
                    };
                }
                let values = args
                    .iter()
                    .map(|a| a.evaluate(bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                call(*function, values)
            }
        }
    }
}

fn truthy(v: &Value) -> Result<bool, String> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Integer(i) => Ok(*i != 0),
        Value::Float(f) => Ok(*f != 0.0),
        other => Err(format!("'{}' is not a boolean", other)),
    }
}

fn number(v: &Value) -> Result<f64, String> {
    v.as_f64().ok_or_else(|| format!("'{}' is not a number", v))
}

fn binary(op: &str, a: Value, b: Value) -> Result<Value, String> {
    match op {
        "==" => return Ok(Value::Bool(a.matches(&b))),
        "!=" => return Ok(Value::Bool(!a.matches(&b))),
        "<" | "<=" | ">" | ">=" => {
            let ordering = match (&a, &b) {
                (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
                _ => number(&a)?.partial_cmp(&number(&b)?),
            };
            let result = match ordering {
                Some(Ordering::Less) => op.starts_with('<'),
                Some(Ordering::Greater) => op.starts_with('>'),
                Some(Ordering::Equal) => op.ends_with('='),
                None => false,
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    if op == "+" && (matches!(a, Value::String(_)) || matches!(b, Value::String(_))) {
        return Ok(Value::String(format!("{}{}", a, b)));
    }

    if let (Value::Integer(x), Value::Integer(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        let overflow = || format!("integer overflow in {} {} {}", x, op, y);
        return match op {
            "+" => x.checked_add(y).map(Value::Integer).ok_or_else(overflow),
            "-" => x.checked_sub(y).map(Value::Integer).ok_or_else(overflow),
            "*" => x.checked_mul(y).map(Value::Integer).ok_or_else(overflow),
            "/" | "%" if y == 0 => Err("division by zero".to_string()),
            "/" => match x.checked_rem(y).ok_or_else(overflow)? {
                0 => x.checked_div(y).map(Value::Integer).ok_or_else(overflow),
                _ => Ok(Value::Float(x as f64 / y as f64)),
            },
            "%" => x.checked_rem(y).map(Value::Integer).ok_or_else(overflow),
            _ => Err(format!("unsupported operator '{}'", op)),
        };
    }

    let (x, y) = (number(&a)?, number(&b)?);
    match op {
        "+" => Ok(Value::Float(x + y)),
        "-" => Ok(Value::Float(x - y)),
        "*" => Ok(Value::Float(x * y)),
        "/" if y == 0.0 => Err("division by zero".to_string()),
        "/" => Ok(Value::Float(x / y)),
        "%" => Ok(Value::Float(x % y)),
        _ => Err(format!("unsupported operator '{}'", op)),
    }
}

fn call(function: Function, args: Vec<Value>) -> Result<Value, String> {
    let first = &args[0];
    match function {
        Function::Abs => match first {
            Value::Integer(i) => i
                .checked_abs()
                .map(Value::Integer)
                .ok_or_else(|| "integer overflow".to_string()),
            other => Ok(Value::Float(number(other)?.abs())),
        },
        Function::Round | Function::Floor | Function::Ceil => {
            if let Value::Integer(_) = first {
                return Ok(first.clone());
            }
            let x = number(first)?;
            let rounded = match function {
                Function::Round => x.round(),
                Function::Floor => x.floor(),
                _ => x.ceil(),
            };
            Ok(Value::Integer(rounded as i64))
        }
        Function::Min | Function::Max => {
            let mut best = first.clone();
            for candidate in &args[1..] {
                let better = match function {
                    Function::Min => number(candidate)? < number(&best)?,
                    _ => number(candidate)? > number(&best)?,
                };
                if better {
                    best = candidate.clone();
                }
            }
            Ok(best)
        }
        Function::If => Err("if() is evaluated lazily".to_string()),
    }
}
