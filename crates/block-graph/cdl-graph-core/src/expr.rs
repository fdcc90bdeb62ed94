//! Closed expression grammar for block equations.
//!
//! Equation right-hand sides are small arithmetic/boolean expressions over
//! named values. They are compiled into an AST here rather than handed to
//! any host-language evaluator: the grammar admits literals, identifiers,
//! the usual arithmetic/comparison/boolean operators, list literals, and a
//! fixed allow-list of pure functions. Anything else fails at compile time,
//! which is how malformed equations are rejected at document load rather
//! than mid-evaluation.

use hashbrown::HashMap;
use thiserror::Error;

use cdl_api_core::{coercion, Value};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("undefined name '{0}'")]
    UndefinedName(String),
    #[error("{func}() expects {expected} argument(s), got {got}")]
    Arity {
        func: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("{func}() argument must be {expected}")]
    BadArgument {
        func: &'static str,
        expected: &'static str,
    },
    #[error("unsupported operand types for '{0}'")]
    UnsupportedOperands(&'static str),
    #[error("division by zero")]
    DivisionByZero,
    #[error("cannot convert '{0}' to a number")]
    BadNumericText(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// The function allow-list. Calls to any other name are compile errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Min,
    Max,
    Abs,
    Round,
    Sum,
    Len,
    Range,
    Int,
    Float,
    Bool,
    Str,
}

impl Func {
    fn from_name(name: &str) -> Option<Func> {
        Some(match name {
            "min" => Func::Min,
            "max" => Func::Max,
            "abs" => Func::Abs,
            "round" => Func::Round,
            "sum" => Func::Sum,
            "len" => Func::Len,
            "range" => Func::Range,
            "int" => Func::Int,
            "float" => Func::Float,
            "bool" => Func::Bool,
            "str" => Func::Str,
            _ => return None,
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Func::Min => "min",
            Func::Max => "max",
            Func::Abs => "abs",
            Func::Round => "round",
            Func::Sum => "sum",
            Func::Len => "len",
            Func::Range => "range",
            Func::Int => "int",
            Func::Float => "float",
            Func::Bool => "bool",
            Func::Str => "str",
        }
    }
}

/// Compiled equation expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Real(f64),
    Integer(i64),
    Bool(bool),
    Text(String),
    Ident(String),
    List(Vec<Expr>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Real(f64),
    Integer(i64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Real(v) => v.to_string(),
            Token::Integer(v) => v.to_string(),
            Token::Str(s) => format!("\"{s}\""),
            Token::Ident(s) => s.clone(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::StarStar => "**".into(),
            Token::Slash => "/".into(),
            Token::Percent => "%".into(),
            Token::Lt => "<".into(),
            Token::Le => "<=".into(),
            Token::Gt => ">".into(),
            Token::Ge => ">=".into(),
            Token::EqEq => "==".into(),
            Token::Ne => "!=".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::LBracket => "[".into(),
            Token::RBracket => "]".into(),
            Token::Comma => ",".into(),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' => {
                let mut text = String::new();
                let mut is_real = false;
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        text.push(d);
                        chars.next();
                    } else if d == '.' && !is_real {
                        is_real = true;
                        text.push(d);
                        chars.next();
                    } else if (d == 'e' || d == 'E') && !text.is_empty() {
                        is_real = true;
                        text.push(d);
                        chars.next();
                        if let Some(&sign @ ('+' | '-')) = chars.peek() {
                            text.push(sign);
                            chars.next();
                        }
                    } else {
                        break;
                    }
                }
                if is_real {
                    let v = text
                        .parse::<f64>()
                        .map_err(|_| ExprError::BadNumericText(text.clone()))?;
                    tokens.push(Token::Real(v));
                } else {
                    match text.parse::<i64>() {
                        Ok(v) => tokens.push(Token::Integer(v)),
                        // Integer literals wider than i64 degrade to Real.
                        Err(_) => {
                            let v = text
                                .parse::<f64>()
                                .map_err(|_| ExprError::BadNumericText(text.clone()))?;
                            tokens.push(Token::Real(v));
                        }
                    }
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        name.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(name));
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                for d in chars.by_ref() {
                    if d == quote {
                        closed = true;
                        break;
                    }
                    text.push(d);
                }
                if !closed {
                    return Err(ExprError::UnterminatedString);
                }
                tokens.push(Token::Str(text));
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                if chars.peek() == Some(&'*') {
                    chars.next();
                    tokens.push(Token::StarStar);
                } else {
                    tokens.push(Token::Star);
                }
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::EqEq);
                } else {
                    return Err(ExprError::UnexpectedChar('='));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    return Err(ExprError::UnexpectedChar('!'));
                }
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser (precedence climbing: or < and < not < cmp < +- < */% < unary < **)
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(ExprError::UnexpectedToken(tok.describe())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == word)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.is_keyword("or") {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_not()?;
        while self.is_keyword("and") {
            self.next();
            let rhs = self.parse_not()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.is_keyword("not") {
            self.next();
            let inner = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(inner),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            _ => return Ok(lhs),
        };
        self.next();
        let rhs = self.parse_additive()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(inner),
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ExprError> {
        let base = self.parse_primary()?;
        if matches!(self.peek(), Some(Token::StarStar)) {
            self.next();
            // Right-associative; the exponent may itself be signed.
            let exp = self.parse_unary()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exp),
            });
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Real(v)) => Ok(Expr::Real(v)),
            Some(Token::Integer(v)) => Ok(Expr::Integer(v)),
            Some(Token::Str(s)) => Ok(Expr::Text(s)),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" | "True" => Ok(Expr::Bool(true)),
                "false" | "False" => Ok(Expr::Bool(false)),
                _ => {
                    if matches!(self.peek(), Some(Token::LParen)) {
                        self.next();
                        let args = self.parse_args(Token::RParen)?;
                        let func = Func::from_name(&name)
                            .ok_or(ExprError::UnknownFunction(name))?;
                        Ok(Expr::Call { func, args })
                    } else {
                        Ok(Expr::Ident(name))
                    }
                }
            },
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let items = self.parse_args(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(tok) => Err(ExprError::UnexpectedToken(tok.describe())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_args(&mut self, closing: Token) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.peek() == Some(&closing) {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(tok) if tok == closing => break,
                Some(tok) => return Err(ExprError::UnexpectedToken(tok.describe())),
                None => return Err(ExprError::UnexpectedEnd),
            }
        }
        Ok(args)
    }
}

/// Compile an expression source string into an AST.
pub fn compile(src: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(ExprError::UnexpectedToken(extra.describe()));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Integer view of a value where one exists (bools promote to 0/1).
fn integral(v: &Value) -> Option<i64> {
    match v {
        Value::Integer(i) => Some(*i),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    if a.is_numeric() && b.is_numeric() {
        return coercion::to_real(a) == coercion::to_real(b);
    }
    a == b
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, ExprError> {
    if let (Value::Text(x), Value::Text(y)) = (a, b) {
        if op == BinaryOp::Add {
            return Ok(Value::Text(format!("{x}{y}")));
        }
        return Err(ExprError::UnsupportedOperands(op.symbol()));
    }
    if let (Value::List(x), Value::List(y)) = (a, b) {
        if op == BinaryOp::Add {
            let mut items = x.clone();
            items.extend(y.iter().cloned());
            return Ok(Value::List(items));
        }
        return Err(ExprError::UnsupportedOperands(op.symbol()));
    }

    let numeric_ok = |v: &Value| matches!(v, Value::Real(_) | Value::Integer(_) | Value::Bool(_));
    if !numeric_ok(a) || !numeric_ok(b) {
        return Err(ExprError::UnsupportedOperands(op.symbol()));
    }

    if let (Some(x), Some(y)) = (integral(a), integral(b)) {
        match op {
            // Division always yields a real, even for integral operands.
            BinaryOp::Div => {}
            BinaryOp::Add => return Ok(Value::Integer(x.wrapping_add(y))),
            BinaryOp::Sub => return Ok(Value::Integer(x.wrapping_sub(y))),
            BinaryOp::Mul => return Ok(Value::Integer(x.wrapping_mul(y))),
            BinaryOp::Mod => {
                if y == 0 {
                    return Err(ExprError::DivisionByZero);
                }
                return Ok(Value::Integer(x.rem_euclid(y)));
            }
            BinaryOp::Pow => {
                if y >= 0 {
                    if let Ok(exp) = u32::try_from(y) {
                        if let Some(v) = x.checked_pow(exp) {
                            return Ok(Value::Integer(v));
                        }
                    }
                }
                // Negative or overflowing exponents fall through to reals.
            }
            _ => {}
        }
    }

    let x = coercion::to_real(a);
    let y = coercion::to_real(b);
    let v = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => {
            if y == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            x / y
        }
        BinaryOp::Mod => {
            if y == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            x.rem_euclid(y)
        }
        BinaryOp::Pow => x.powf(y),
        _ => return Err(ExprError::UnsupportedOperands(op.symbol())),
    };
    Ok(Value::Real(v))
}

fn ordering(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, ExprError> {
    if let (Value::Text(x), Value::Text(y)) = (a, b) {
        let result = match op {
            BinaryOp::Lt => x < y,
            BinaryOp::Le => x <= y,
            BinaryOp::Gt => x > y,
            BinaryOp::Ge => x >= y,
            _ => unreachable!(),
        };
        return Ok(Value::Bool(result));
    }
    let numeric_ok = |v: &Value| matches!(v, Value::Real(_) | Value::Integer(_) | Value::Bool(_));
    if !numeric_ok(a) || !numeric_ok(b) {
        return Err(ExprError::UnsupportedOperands(op.symbol()));
    }
    let x = coercion::to_real(a);
    let y = coercion::to_real(b);
    let result = match op {
        BinaryOp::Lt => x < y,
        BinaryOp::Le => x <= y,
        BinaryOp::Gt => x > y,
        BinaryOp::Ge => x >= y,
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

/// Variadic numeric arguments: a single list argument spreads into its
/// elements, matching `min([a, b])` == `min(a, b)`.
fn spread(args: Vec<Value>) -> Vec<Value> {
    if args.len() == 1 {
        if let Value::List(items) = &args[0] {
            return items.clone();
        }
    }
    args
}

fn call(func: Func, args: Vec<Value>) -> Result<Value, ExprError> {
    match func {
        Func::Min | Func::Max => {
            let items = spread(args);
            if items.is_empty() {
                return Err(ExprError::Arity {
                    func: func.name(),
                    expected: "at least 1",
                    got: 0,
                });
            }
            if !items.iter().all(|v| v.is_numeric() || matches!(v, Value::Bool(_))) {
                return Err(ExprError::BadArgument {
                    func: func.name(),
                    expected: "numeric",
                });
            }
            let mut best = items[0].clone();
            for item in &items[1..] {
                let better = if func == Func::Min {
                    coercion::to_real(item) < coercion::to_real(&best)
                } else {
                    coercion::to_real(item) > coercion::to_real(&best)
                };
                if better {
                    best = item.clone();
                }
            }
            Ok(best)
        }
        Func::Abs => {
            let [arg] = one_arg(func, args)?;
            match arg {
                Value::Integer(i) => Ok(Value::Integer(i.wrapping_abs())),
                v if v.is_numeric() || matches!(v, Value::Bool(_)) => {
                    Ok(Value::Real(coercion::to_real(&v).abs()))
                }
                _ => Err(ExprError::BadArgument {
                    func: func.name(),
                    expected: "numeric",
                }),
            }
        }
        Func::Round => {
            let [arg] = one_arg(func, args)?;
            if !(arg.is_numeric() || matches!(arg, Value::Bool(_))) {
                return Err(ExprError::BadArgument {
                    func: func.name(),
                    expected: "numeric",
                });
            }
            Ok(Value::Integer(coercion::to_real(&arg).round() as i64))
        }
        Func::Sum => {
            let items = spread(args);
            if items.iter().all(|v| integral(v).is_some()) {
                let mut total: i64 = 0;
                for item in &items {
                    total = total.wrapping_add(integral(item).unwrap_or(0));
                }
                Ok(Value::Integer(total))
            } else if items.iter().all(|v| v.is_numeric() || matches!(v, Value::Bool(_))) {
                Ok(Value::Real(items.iter().map(coercion::to_real).sum()))
            } else {
                Err(ExprError::BadArgument {
                    func: func.name(),
                    expected: "numeric",
                })
            }
        }
        Func::Len => {
            let [arg] = one_arg(func, args)?;
            match arg {
                Value::Text(s) => Ok(Value::Integer(s.chars().count() as i64)),
                Value::List(items) => Ok(Value::Integer(items.len() as i64)),
                _ => Err(ExprError::BadArgument {
                    func: func.name(),
                    expected: "text or list",
                }),
            }
        }
        Func::Range => {
            let (start, stop) = match args.len() {
                1 => (0, coercion::to_integer(&args[0])),
                2 => (coercion::to_integer(&args[0]), coercion::to_integer(&args[1])),
                got => {
                    return Err(ExprError::Arity {
                        func: func.name(),
                        expected: "1 or 2",
                        got,
                    })
                }
            };
            let items = (start..stop).map(Value::Integer).collect();
            Ok(Value::List(items))
        }
        Func::Int => {
            let [arg] = one_arg(func, args)?;
            match &arg {
                Value::Text(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| ExprError::BadNumericText(s.clone())),
                Value::List(_) => Err(ExprError::BadArgument {
                    func: func.name(),
                    expected: "scalar",
                }),
                v => Ok(Value::Integer(coercion::to_integer(v))),
            }
        }
        Func::Float => {
            let [arg] = one_arg(func, args)?;
            match &arg {
                Value::Text(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Real)
                    .map_err(|_| ExprError::BadNumericText(s.clone())),
                Value::List(_) => Err(ExprError::BadArgument {
                    func: func.name(),
                    expected: "scalar",
                }),
                v => Ok(Value::Real(coercion::to_real(v))),
            }
        }
        Func::Bool => {
            let [arg] = one_arg(func, args)?;
            Ok(Value::Bool(coercion::to_bool(&arg)))
        }
        Func::Str => {
            let [arg] = one_arg(func, args)?;
            Ok(Value::Text(coercion::to_text(&arg)))
        }
    }
}

fn one_arg(func: Func, args: Vec<Value>) -> Result<[Value; 1], ExprError> {
    let got = args.len();
    <[Value; 1]>::try_from(args).map_err(|_| ExprError::Arity {
        func: func.name(),
        expected: "1",
        got,
    })
}

/// Evaluate a compiled expression against a namespace of named values.
pub fn eval(expr: &Expr, env: &HashMap<String, Value>) -> Result<Value, ExprError> {
    match expr {
        Expr::Real(v) => Ok(Value::Real(*v)),
        Expr::Integer(v) => Ok(Value::Integer(*v)),
        Expr::Bool(v) => Ok(Value::Bool(*v)),
        Expr::Text(s) => Ok(Value::Text(s.clone())),
        Expr::Ident(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::UndefinedName(name.clone())),
        Expr::List(items) => {
            let values = items
                .iter()
                .map(|item| eval(item, env))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(values))
        }
        Expr::Unary { op, expr } => {
            let v = eval(expr, env)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!coercion::to_bool(&v))),
                UnaryOp::Neg => match v {
                    Value::Integer(i) => Ok(Value::Integer(i.wrapping_neg())),
                    v if v.is_numeric() || matches!(v, Value::Bool(_)) => {
                        Ok(Value::Real(-coercion::to_real(&v)))
                    }
                    _ => Err(ExprError::UnsupportedOperands("-")),
                },
            }
        }
        Expr::Binary { op, lhs, rhs } => match op {
            BinaryOp::And => {
                let left = eval(lhs, env)?;
                if !coercion::to_bool(&left) {
                    return Ok(Value::Bool(false));
                }
                let right = eval(rhs, env)?;
                Ok(Value::Bool(coercion::to_bool(&right)))
            }
            BinaryOp::Or => {
                let left = eval(lhs, env)?;
                if coercion::to_bool(&left) {
                    return Ok(Value::Bool(true));
                }
                let right = eval(rhs, env)?;
                Ok(Value::Bool(coercion::to_bool(&right)))
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let left = eval(lhs, env)?;
                let right = eval(rhs, env)?;
                let eq = value_eq(&left, &right);
                Ok(Value::Bool(if *op == BinaryOp::Eq { eq } else { !eq }))
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let left = eval(lhs, env)?;
                let right = eval(rhs, env)?;
                ordering(*op, &left, &right)
            }
            _ => {
                let left = eval(lhs, env)?;
                let right = eval(rhs, env)?;
                arithmetic(*op, &left, &right)
            }
        },
        Expr::Call { func, args } => {
            let values = args
                .iter()
                .map(|arg| eval(arg, env))
                .collect::<Result<Vec<_>, _>>()?;
            call(*func, values)
        }
    }
}

/// Compile and evaluate in one step.
pub fn eval_str(src: &str, env: &HashMap<String, Value>) -> Result<Value, ExprError> {
    let expr = compile(src)?;
    eval(&expr, env)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn arithmetic_with_precedence() {
        let env = env(&[("k", Value::Real(2.0)), ("u", Value::Real(5.0))]);
        assert_eq!(eval_str("k * u + 1", &env).unwrap(), Value::Real(11.0));
        assert_eq!(eval_str("k * (u + 1)", &env).unwrap(), Value::Real(12.0));
        assert_eq!(eval_str("-u ** 2", &env).unwrap(), Value::Real(-25.0));
    }

    #[test]
    fn integer_arithmetic_stays_integral() {
        let env = env(&[("n", Value::Integer(7))]);
        assert_eq!(eval_str("n + 1", &env).unwrap(), Value::Integer(8));
        assert_eq!(eval_str("n % 4", &env).unwrap(), Value::Integer(3));
        // Division is always real.
        assert_eq!(eval_str("n / 2", &env).unwrap(), Value::Real(3.5));
    }

    #[test]
    fn boolean_operators_short_circuit() {
        let env = env(&[("a", Value::Bool(true)), ("b", Value::Bool(false))]);
        assert_eq!(eval_str("a and b", &env).unwrap(), Value::Bool(false));
        assert_eq!(eval_str("a or missing", &env).unwrap(), Value::Bool(true));
        assert_eq!(eval_str("not b", &env).unwrap(), Value::Bool(true));
    }

    #[test]
    fn comparisons() {
        let env = env(&[("t", Value::Real(21.5)), ("set", Value::Real(22.0))]);
        assert_eq!(eval_str("t < set", &env).unwrap(), Value::Bool(true));
        assert_eq!(eval_str("t >= set", &env).unwrap(), Value::Bool(false));
        assert_eq!(eval_str("1 == 1.0", &env).unwrap(), Value::Bool(true));
    }

    #[test]
    fn allow_listed_functions() {
        let env = env(&[("e", Value::Real(30.0)), ("yMax", Value::Real(10.0))]);
        assert_eq!(
            eval_str("min(yMax, 0.5 * e)", &env).unwrap(),
            Value::Real(10.0)
        );
        assert_eq!(eval_str("abs(-3)", &env).unwrap(), Value::Integer(3));
        assert_eq!(eval_str("round(2.6)", &env).unwrap(), Value::Integer(3));
        assert_eq!(
            eval_str("sum([1, 2, 3])", &env).unwrap(),
            Value::Integer(6)
        );
        assert_eq!(eval_str("len(range(4))", &env).unwrap(), Value::Integer(4));
        assert_eq!(eval_str("float('2.5')", &env).unwrap(), Value::Real(2.5));
    }

    #[test]
    fn unknown_function_rejected_at_compile_time() {
        assert_eq!(
            compile("exec('rm -rf')"),
            Err(ExprError::UnknownFunction("exec".into()))
        );
        assert!(compile("__import__('os')").is_err());
    }

    #[test]
    fn undefined_name_is_an_evaluation_error() {
        let env = env(&[("u", Value::Real(1.0))]);
        assert_eq!(
            eval_str("y + u", &env),
            Err(ExprError::UndefinedName("y".into()))
        );
    }

    #[test]
    fn malformed_expressions_fail_to_compile() {
        assert!(compile("1 +").is_err());
        assert!(compile("foo(").is_err());
        assert!(compile("a = b").is_err());
        assert!(compile("'unterminated").is_err());
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let env = HashMap::new();
        assert_eq!(eval_str("1 / 0", &env), Err(ExprError::DivisionByZero));
        assert_eq!(eval_str("5 % 0", &env), Err(ExprError::DivisionByZero));
    }
}
