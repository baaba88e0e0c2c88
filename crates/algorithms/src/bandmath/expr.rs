//! Band math expression language
//!
//! An expression combines the step's input bands `A0, A1, ...`, single bits
//! of unpacked inputs (`A0[6]`), the current output value `B` and its bits
//! (`B[3]`). Booleans are numbers: comparisons yield 1 or 0 and any non-zero
//! value is true.
//!
//! ```text
//! or_expr  = and_expr (("or" | "||") and_expr)*
//! and_expr = not_expr (("and" | "&&") not_expr)*
//! not_expr = ("not" | "!") not_expr | cmp_expr
//! cmp_expr = add_expr (("==" | "!=" | "<" | "<=" | ">" | ">=") add_expr)*
//! add_expr = mul_expr (("+" | "-") mul_expr)*
//! mul_expr = unary (("*" | "/" | "%") unary)*
//! unary    = ("-" | "+") unary | power
//! power    = atom ("**" unary)?
//! atom     = number | "true" | "false" | operand | name "(" args ")" | "(" or_expr ")"
//! operand  = "A" index ("[" bit "]")? | "B" ("[" bit "]")?
//! ```

use super::eval::{apply_binary, apply_call, apply_unary};
use hrwsi_core::raster::BITS_PER_BYTE;
use hrwsi_core::{Error, Result};
use std::fmt;

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
            BinaryOp::Pow => 8,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
        }
    }

    fn comparison(symbol: &str) -> Option<Self> {
        match symbol {
            "==" => Some(BinaryOp::Eq),
            "!=" => Some(BinaryOp::Ne),
            "<" => Some(BinaryOp::Lt),
            "<=" => Some(BinaryOp::Le),
            ">" => Some(BinaryOp::Gt),
            ">=" => Some(BinaryOp::Ge),
            _ => None,
        }
    }
}

/// Built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Min,
    Max,
    Abs,
    Floor,
    Ceil,
    Round,
    Clip,
    Where,
    Any,
    All,
    /// Truncate toward zero, then wrap modulo 256
    Uint8,
}

const FUNCTIONS: [(Function, &str); 11] = [
    (Function::Min, "min"),
    (Function::Max, "max"),
    (Function::Abs, "abs"),
    (Function::Floor, "floor"),
    (Function::Ceil, "ceil"),
    (Function::Round, "round"),
    (Function::Clip, "clip"),
    (Function::Where, "where"),
    (Function::Any, "any"),
    (Function::All, "all"),
    (Function::Uint8, "uint8"),
];

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        FUNCTIONS.iter().find(|(_, n)| *n == name).map(|(f, _)| *f)
    }

    pub fn name(self) -> &'static str {
        FUNCTIONS
            .iter()
            .find(|(f, _)| *f == self)
            .map(|(_, n)| *n)
            .unwrap_or("?")
    }

    /// Accepted argument count as (min, max); `None` means unbounded
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Function::Min | Function::Max | Function::Any | Function::All => (1, None),
            Function::Abs
            | Function::Floor
            | Function::Ceil
            | Function::Round
            | Function::Uint8 => (1, Some(1)),
            Function::Clip | Function::Where => (3, Some(3)),
        }
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    /// Input `A<index>`, or one of its bits
    Source { index: usize, bit: Option<u8> },
    /// Current output value `B`, or one of its bits
    Output { bit: Option<u8> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Call { func: Function, args: Vec<Expr> },
}

impl Expr {
    /// Parse an expression
    pub fn parse(text: &str) -> Result<Expr> {
        parse(text)
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Visit every node, parents before children
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Unary { operand, .. } => operand.walk(f),
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.walk(f)),
            Expr::Const(_) | Expr::Source { .. } | Expr::Output { .. } => {}
        }
    }

    /// Sorted, deduplicated source indices referenced by the expression
    pub fn sources(&self) -> Vec<usize> {
        let mut indices = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Source { index, .. } = e {
                indices.push(*index);
            }
        });
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Whether the expression reads the current output band
    pub fn uses_output(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| found |= matches!(e, Expr::Output { .. }));
        found
    }

    /// Copy of the expression with every source index renumbered by `f`
    pub fn map_sources(&self, f: &dyn Fn(usize) -> usize) -> Expr {
        match self {
            Expr::Source { index, bit } => Expr::Source {
                index: f(*index),
                bit: *bit,
            },
            Expr::Const(_) | Expr::Output { .. } => self.clone(),
            Expr::Unary { op, operand } => Expr::unary(*op, operand.map_sources(f)),
            Expr::Binary { op, left, right } => {
                Expr::binary(*op, left.map_sources(f), right.map_sources(f))
            }
            Expr::Call { func, args } => Expr::Call {
                func: *func,
                args: args.iter().map(|a| a.map_sources(f)).collect(),
            },
        }
    }

    /// Evaluate constant sub-expressions.
    ///
    /// Sub-expressions folding to NaN or infinity are left as they are so
    /// the result still prints as valid syntax.
    pub fn fold_constants(self) -> Expr {
        let folded = match self {
            Expr::Unary { op, operand } => match operand.fold_constants() {
                Expr::Const(x) => Expr::Const(apply_unary(op, x)),
                operand => Expr::unary(op, operand),
            },
            Expr::Binary { op, left, right } => {
                match (left.fold_constants(), right.fold_constants()) {
                    (Expr::Const(a), Expr::Const(b)) => Expr::Const(apply_binary(op, a, b)),
                    (left, right) => Expr::binary(op, left, right),
                }
            }
            Expr::Call { func, args } => {
                let args: Vec<Expr> = args.into_iter().map(Expr::fold_constants).collect();
                let values: Option<Vec<f64>> = args
                    .iter()
                    .map(|a| match a {
                        Expr::Const(v) => Some(*v),
                        _ => None,
                    })
                    .collect();
                match values {
                    Some(values) => Expr::Const(apply_call(func, &values)),
                    None => Expr::Call { func, args },
                }
            }
            leaf => return leaf,
        };

        match folded {
            Expr::Const(v) if !v.is_finite() => folded_back(v),
            other => other,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Const(v) if v.is_sign_negative() => 7,
            Expr::Unary { op: UnaryOp::Neg, .. } => 7,
            Expr::Unary { op: UnaryOp::Not, .. } => 3,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Const(_) | Expr::Source { .. } | Expr::Output { .. } | Expr::Call { .. } => 9,
        }
    }
}

/// Spell a non-finite constant as an expression that evaluates to it
fn folded_back(v: f64) -> Expr {
    if v.is_nan() {
        Expr::binary(BinaryOp::Div, Expr::Const(0.0), Expr::Const(0.0))
    } else {
        let inf = Expr::binary(BinaryOp::Pow, Expr::Const(10.0), Expr::Const(400.0));
        if v > 0.0 {
            inf
        } else {
            Expr::unary(UnaryOp::Neg, inf)
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, min_precedence: u8) -> fmt::Result {
    if expr.precedence() < min_precedence {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

fn write_bit(f: &mut fmt::Formatter<'_>, bit: Option<u8>) -> fmt::Result {
    match bit {
        Some(k) => write!(f, "[{}]", k),
        None => Ok(()),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{}", v),
            Expr::Source { index, bit } => {
                write!(f, "A{}", index)?;
                write_bit(f, *bit)
            }
            Expr::Output { bit } => {
                f.write_str("B")?;
                write_bit(f, *bit)
            }
            Expr::Unary { op: UnaryOp::Neg, operand } => {
                f.write_str("-")?;
                write_operand(f, operand, 8)
            }
            Expr::Unary { op: UnaryOp::Not, operand } => {
                f.write_str("not ")?;
                write_operand(f, operand, 3)
            }
            Expr::Binary { op, left, right } => {
                let p = op.precedence();
                let (left_min, right_min) = match op {
                    BinaryOp::Pow => (p + 1, 7),
                    _ => (p, p + 1),
                };
                write_operand(f, left, left_min)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, right, right_min)
            }
            Expr::Call { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
        }
    }
}

// Lexer

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::Ident(name) => f.write_str(name),
            TokenKind::Op(op) => f.write_str(op),
            TokenKind::LParen => f.write_str("("),
            TokenKind::RParen => f.write_str(")"),
            TokenKind::LBracket => f.write_str("["),
            TokenKind::RBracket => f.write_str("]"),
            TokenKind::Comma => f.write_str(","),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    /// 1-based character column
    column: usize,
}

// Two-character operators first
const SYMBOLS: [&str; 15] = [
    "**", "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "!",
];

fn syntax_error(text: &str, column: usize, reason: impl Into<String>) -> Error {
    Error::Expression {
        expr: text.to_string(),
        position: column,
        reason: reason.into(),
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let column = i + 1;
        let c = chars[i];

        let single = match c {
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            ',' => Some(TokenKind::Comma),
            _ => None,
        };
        if let Some(kind) = single {
            tokens.push(Token { kind, column });
            i += 1;
            continue;
        }

        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let value = literal.parse::<f64>().map_err(|_| {
                syntax_error(text, column, format!("invalid number `{}`", literal))
            })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                column,
            });
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(chars[start..i].iter().collect()),
                column,
            });
        } else {
            let rest: String = chars[i..].iter().take(2).collect();
            let symbol = SYMBOLS
                .iter()
                .find(|s| rest.starts_with(**s))
                .ok_or_else(|| syntax_error(text, column, format!("unexpected character `{}`", c)))?;
            tokens.push(Token {
                kind: TokenKind::Op(symbol),
                column,
            });
            i += symbol.len();
        }
    }

    Ok(tokens)
}

// Parser

/// Recursive descent parser, one method per precedence level
struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            text,
            tokens,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<TokenKind> {
        let token = self.tokens.get(self.pos).map(|t| t.kind.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Column of the next token, or just past the end of the text
    fn column(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.column)
            .unwrap_or_else(|| self.text.chars().count() + 1)
    }

    fn error_here(&self, reason: impl Into<String>) -> Error {
        syntax_error(self.text, self.column(), reason)
    }

    fn unexpected(&self) -> Error {
        match self.peek() {
            Some(kind) => self.error_here(format!("unexpected `{}`", kind)),
            None => self.error_here("unexpected end of expression"),
        }
    }

    /// Consume the operator `symbol`, or its keyword spelling
    fn eat(&mut self, symbol: &str, keyword: Option<&str>) -> bool {
        let found = match self.peek() {
            Some(TokenKind::Op(op)) => *op == symbol,
            Some(TokenKind::Ident(name)) => keyword == Some(name.as_str()),
            _ => false,
        };
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect(&mut self, kind: TokenKind) -> Result<()> {
        if self.peek() == Some(&kind) {
            self.pos += 1;
            Ok(())
        } else {
            match self.peek() {
                Some(found) => Err(self.error_here(format!("expected `{}`, found `{}`", kind, found))),
                None => Err(self.error_here(format!("expected `{}`", kind))),
            }
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat("||", Some("or")) {
            let right = self.parse_and()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat("&&", Some("and")) {
            let right = self.parse_not()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat("!", Some("not")) {
            let operand = self.parse_not()?;
            return Ok(Expr::unary(UnaryOp::Not, operand));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        while let Some(op) = match self.peek() {
            Some(TokenKind::Op(symbol)) => BinaryOp::comparison(symbol),
            _ => None,
        } {
            self.pos += 1;
            let right = self.parse_additive()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat("+", None) {
                BinaryOp::Add
            } else if self.eat("-", None) {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat("*", None) {
                BinaryOp::Mul
            } else if self.eat("/", None) {
                BinaryOp::Div
            } else if self.eat("%", None) {
                BinaryOp::Rem
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat("-", None) {
            let operand = self.parse_unary()?;
            return Ok(Expr::unary(UnaryOp::Neg, operand));
        }
        if self.eat("+", None) {
            return self.parse_unary();
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_atom()?;
        if self.eat("**", None) {
            let exponent = self.parse_unary()?;
            return Ok(Expr::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let column = self.column();
        match self.peek().cloned() {
            Some(TokenKind::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Const(n))
            }
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let expr = self.parse_or()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            Some(TokenKind::Ident(name)) => {
                self.pos += 1;
                self.parse_name(&name, column)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_name(&mut self, name: &str, column: usize) -> Result<Expr> {
        match name {
            "true" => return Ok(Expr::Const(1.0)),
            "false" => return Ok(Expr::Const(0.0)),
            "B" => {
                let bit = self.parse_bit()?;
                return Ok(Expr::Output { bit });
            }
            "and" | "or" | "not" => {
                return Err(syntax_error(self.text, column, format!("unexpected `{}`", name)))
            }
            _ => {}
        }

        if let Some(digits) = name.strip_prefix('A') {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                let index = digits.parse::<usize>().map_err(|_| {
                    syntax_error(self.text, column, format!("invalid source `{}`", name))
                })?;
                let bit = self.parse_bit()?;
                return Ok(Expr::Source { index, bit });
            }
        }

        if self.peek() == Some(&TokenKind::LParen) {
            let func = Function::from_name(name).ok_or_else(|| {
                syntax_error(self.text, column, format!("unknown function `{}`", name))
            })?;
            self.pos += 1;
            let args = self.parse_args()?;

            let (min, max) = func.arity();
            if args.len() < min || max.is_some_and(|m| args.len() > m) {
                let expected = match max {
                    Some(m) if m == min => format!("{}", min),
                    Some(m) => format!("{} to {}", min, m),
                    None => format!("at least {}", min),
                };
                return Err(syntax_error(
                    self.text,
                    column,
                    format!("{}() takes {} argument(s), got {}", name, expected, args.len()),
                ));
            }
            return Ok(Expr::Call { func, args });
        }

        Err(syntax_error(self.text, column, format!("unknown name `{}`", name)))
    }

    /// Arguments after the opening parenthesis, through the closing one
    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&TokenKind::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.peek() {
                Some(TokenKind::Comma) => self.pos += 1,
                Some(TokenKind::RParen) => {
                    self.pos += 1;
                    return Ok(args);
                }
                _ => return Err(self.error_here("expected `,` or `)` in argument list")),
            }
        }
    }

    /// Optional `[k]` bit selector
    fn parse_bit(&mut self) -> Result<Option<u8>> {
        if self.peek() != Some(&TokenKind::LBracket) {
            return Ok(None);
        }
        self.pos += 1;

        let column = self.column();
        let bit = match self.advance() {
            Some(TokenKind::Number(n)) if n.fract() == 0.0 && n >= 0.0 && n < BITS_PER_BYTE as f64 => {
                n as u8
            }
            Some(other) => {
                return Err(syntax_error(
                    self.text,
                    column,
                    format!("bit index must be an integer below {}, found `{}`", BITS_PER_BYTE, other),
                ))
            }
            None => return Err(self.error_here("expected a bit index")),
        };

        self.expect(TokenKind::RBracket)?;
        Ok(Some(bit))
    }
}

/// Parse an expression.
///
/// Errors carry the 1-based column of the offending token.
pub fn parse(text: &str) -> Result<Expr> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(syntax_error(text, 1, "empty expression"));
    }

    let mut parser = Parser::new(text, tokens);
    let expr = parser.parse_or()?;
    if parser.peek().is_some() {
        return Err(parser.unexpected());
    }
    Ok(expr)
}
