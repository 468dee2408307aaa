//! The entry-rule expression language.
//!
//! Rules are line-oriented: `#` starts a comment, `name = expr` assigns,
//! `if expr: name = expr` assigns conditionally, and a final `return name`
//! names the entry-decision flag. Expressions support `or`/`and`/`not`,
//! comparisons, arithmetic, numeric literals, `true`/`false`, identifiers,
//! `param[i]` indexed parameters and the builtins `floor`, `abs`, `min`,
//! `max`. Validation happens through this parser, not through substring
//! matching, so only constructs the grammar knows can ever reach a merge.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::domain::errors::SynthesisError;
use crate::domain::features::FeatureCatalog;

/// Name of the implicit decision flag used when a rule has no `return`.
pub const DECISION_FLAG: &str = "allow_entry";

/// Builtin arity table; anything else is rejected at validation.
pub fn builtin_arity(name: &str) -> Option<usize> {
    match name {
        "floor" | "abs" => Some(1),
        "min" | "max" => Some(2),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

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
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
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
        }
    }

    fn precedence(&self) -> u8 {
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
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Ident(String),
    Param(usize),
    Call { name: String, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

impl Expr {
    /// Logical negation with double-negation collapse: `not (not x)` is `x`.
    pub fn negated(self) -> Expr {
        match self {
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => *operand,
            other => Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(other),
            },
        }
    }

    /// Collects every referenced identifier, including call arguments.
    pub fn identifiers(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Ident(name) => {
                out.insert(name.clone());
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.identifiers(out);
                }
            }
            Expr::Unary { operand, .. } => operand.identifiers(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.identifiers(out);
                rhs.identifiers(out);
            }
            Expr::Number(_) | Expr::Bool(_) | Expr::Param(_) => {}
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { op: UnaryOp::Not, .. } => 3,
            Expr::Unary { op: UnaryOp::Neg, .. } => 7,
            _ => 8,
        }
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, min_prec: u8) -> fmt::Result {
        let own = self.precedence();
        let parens = own < min_prec;
        if parens {
            write!(f, "(")?;
        }
        match self {
            Expr::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    write!(f, "{:.1}", n)?;
                } else {
                    write!(f, "{}", n)?;
                }
            }
            Expr::Bool(b) => write!(f, "{}", b)?,
            Expr::Ident(name) => write!(f, "{}", name)?,
            Expr::Param(i) => write!(f, "param[{}]", i)?,
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    arg.fmt_prec(f, 0)?;
                }
                write!(f, ")")?;
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    write!(f, "not ")?;
                    operand.fmt_prec(f, 4)?;
                }
                UnaryOp::Neg => {
                    write!(f, "-")?;
                    operand.fmt_prec(f, 8)?;
                }
            },
            Expr::Binary { op, lhs, rhs } => {
                lhs.fmt_prec(f, own)?;
                write!(f, " {} ", op.symbol())?;
                // Right side binds one tighter; ops here are left-associative.
                rhs.fmt_prec(f, own + 1)?;
            }
        }
        if parens {
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, 0)
    }
}

/// Runtime value; numbers and booleans coerce both ways.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Num(f64),
    Bool(bool),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
        }
    }

    pub fn as_num(&self) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Evaluation environment: the trade snapshot, the indexed parameter array
/// and the catalog supplying neutral defaults for missing inputs.
pub struct EvalContext<'a> {
    pub snapshot: &'a HashMap<String, f64>,
    pub params: &'a [f64],
    pub catalog: &'a FeatureCatalog,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        snapshot: &'a HashMap<String, f64>,
        params: &'a [f64],
        catalog: &'a FeatureCatalog,
    ) -> Self {
        Self {
            snapshot,
            params,
            catalog,
        }
    }

    /// Identifier resolution: rule locals, then the snapshot, then the
    /// catalog's neutral default, then 0.0. Missing inputs never fail.
    fn resolve(&self, locals: &HashMap<String, Value>, name: &str) -> Value {
        if let Some(v) = locals.get(name) {
            return *v;
        }
        if let Some(v) = self.snapshot.get(name).copied().filter(|v| v.is_finite()) {
            return Value::Num(v);
        }
        Value::Num(self.catalog.neutral_default(name).unwrap_or(0.0))
    }

    fn param(&self, index: usize) -> f64 {
        self.params.get(index).copied().unwrap_or(0.0)
    }
}

impl Expr {
    /// Evaluates under IEEE float semantics; division by zero yields
    /// infinity rather than an error.
    pub fn eval(
        &self,
        ctx: &EvalContext<'_>,
        locals: &HashMap<String, Value>,
    ) -> Result<Value, SynthesisError> {
        match self {
            Expr::Number(n) => Ok(Value::Num(*n)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Ident(name) => Ok(ctx.resolve(locals, name)),
            Expr::Param(i) => Ok(Value::Num(ctx.param(*i))),
            Expr::Call { name, args } => {
                let arity = builtin_arity(name).ok_or_else(|| SynthesisError::UnknownFunction {
                    name: name.clone(),
                })?;
                if args.len() != arity {
                    return Err(SynthesisError::BadArity {
                        name: name.clone(),
                        expected: arity,
                        got: args.len(),
                    });
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.eval(ctx, locals)?.as_num());
                }
                let result = match name.as_str() {
                    "floor" => values[0].floor(),
                    "abs" => values[0].abs(),
                    "min" => values[0].min(values[1]),
                    "max" => values[0].max(values[1]),
                    _ => unreachable!("arity table covers all builtins"),
                };
                Ok(Value::Num(result))
            }
            Expr::Unary { op, operand } => {
                let v = operand.eval(ctx, locals)?;
                Ok(match op {
                    UnaryOp::Neg => Value::Num(-v.as_num()),
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                })
            }
            Expr::Binary { op, lhs, rhs } => {
                match op {
                    // Short-circuiting logic.
                    BinaryOp::And => {
                        if !lhs.eval(ctx, locals)?.truthy() {
                            return Ok(Value::Bool(false));
                        }
                        return Ok(Value::Bool(rhs.eval(ctx, locals)?.truthy()));
                    }
                    BinaryOp::Or => {
                        if lhs.eval(ctx, locals)?.truthy() {
                            return Ok(Value::Bool(true));
                        }
                        return Ok(Value::Bool(rhs.eval(ctx, locals)?.truthy()));
                    }
                    _ => {}
                }
                let l = lhs.eval(ctx, locals)?.as_num();
                let r = rhs.eval(ctx, locals)?.as_num();
                Ok(match op {
                    BinaryOp::Eq => Value::Bool(l == r),
                    BinaryOp::Ne => Value::Bool(l != r),
                    BinaryOp::Lt => Value::Bool(l < r),
                    BinaryOp::Le => Value::Bool(l <= r),
                    BinaryOp::Gt => Value::Bool(l > r),
                    BinaryOp::Ge => Value::Bool(l >= r),
                    BinaryOp::Add => Value::Num(l + r),
                    BinaryOp::Sub => Value::Num(l - r),
                    BinaryOp::Mul => Value::Num(l * r),
                    BinaryOp::Div => Value::Num(l / r),
                    BinaryOp::Rem => Value::Num(l % r),
                    BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign { name: String, expr: Expr },
    Guard { condition: Expr, name: String, expr: Expr },
    Return { name: String },
}

/// A parsed rule. Comments and blank lines are not retained; the builder
/// works on the raw text and uses parsing for validation and evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub statements: Vec<Statement>,
}

impl Rule {
    /// Name returned by the final decision statement, if present.
    pub fn decision_flag(&self) -> Option<&str> {
        self.statements.iter().rev().find_map(|s| match s {
            Statement::Return { name } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Runs the rule over one entry snapshot and reports the entry decision.
    ///
    /// Without a `return`, the implicit `allow_entry` flag decides; a rule
    /// that never assigns it allows the entry.
    pub fn evaluate(
        &self,
        snapshot: &HashMap<String, f64>,
        params: &[f64],
        catalog: &FeatureCatalog,
    ) -> Result<bool, SynthesisError> {
        let ctx = EvalContext::new(snapshot, params, catalog);
        let mut locals: HashMap<String, Value> = HashMap::new();
        for statement in &self.statements {
            match statement {
                Statement::Assign { name, expr } => {
                    let value = expr.eval(&ctx, &locals)?;
                    locals.insert(name.clone(), value);
                }
                Statement::Guard {
                    condition,
                    name,
                    expr,
                } => {
                    if condition.eval(&ctx, &locals)?.truthy() {
                        let value = expr.eval(&ctx, &locals)?;
                        locals.insert(name.clone(), value);
                    }
                }
                Statement::Return { name } => {
                    return Ok(ctx.resolve(&locals, name).truthy());
                }
            }
        }
        Ok(locals.get(DECISION_FLAG).map(Value::truthy).unwrap_or(true))
    }

    /// Identifiers referenced anywhere in the rule body.
    pub fn identifiers(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for statement in &self.statements {
            match statement {
                Statement::Assign { expr, .. } => expr.identifiers(&mut out),
                Statement::Guard {
                    condition, expr, ..
                } => {
                    condition.identifiers(&mut out);
                    expr.identifiers(&mut out);
                }
                Statement::Return { .. } => {}
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    True,
    False,
    Or,
    And,
    Not,
    If,
    Return,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Assign,
}

fn tokenize(text: &str, line: usize) -> Result<Vec<Token>, SynthesisError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '#' => break,
            c if c.is_whitespace() => {
                chars.next();
            }
            c if c.is_ascii_digit() => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = literal.parse::<f64>().map_err(|_| SynthesisError::Parse {
                    line,
                    message: format!("invalid number literal '{}'", literal),
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "or" => Token::Or,
                    "and" => Token::And,
                    "not" => Token::Not,
                    "if" => Token::If,
                    "return" => Token::Return,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(ident),
                });
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::EqEq);
                } else {
                    tokens.push(Token::Assign);
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    return Err(SynthesisError::Parse {
                        line,
                        message: "unexpected character '!'".to_string(),
                    });
                }
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
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
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
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            other => {
                return Err(SynthesisError::Parse {
                    line,
                    message: format!("unexpected character '{}'", other),
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    line: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, line: usize) -> Self {
        Self { tokens, pos: 0, line }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> SynthesisError {
        SynthesisError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), SynthesisError> {
        match self.advance() {
            Some(ref t) if t == expected => Ok(()),
            _ => Err(self.error(format!("expected {}", what))),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn parse_expr(&mut self) -> Result<Expr, SynthesisError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, SynthesisError> {
        let mut expr = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            expr = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, SynthesisError> {
        let mut expr = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.parse_not()?;
            expr = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Expr, SynthesisError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn comparison_op(token: &Token) -> Option<BinaryOp> {
        match token {
            Token::EqEq => Some(BinaryOp::Eq),
            Token::NotEq => Some(BinaryOp::Ne),
            Token::Lt => Some(BinaryOp::Lt),
            Token::Le => Some(BinaryOp::Le),
            Token::Gt => Some(BinaryOp::Gt),
            Token::Ge => Some(BinaryOp::Ge),
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, SynthesisError> {
        let lhs = self.parse_additive()?;
        let Some(op) = self.peek().and_then(Self::comparison_op) else {
            return Ok(lhs);
        };
        self.advance();
        let rhs = self.parse_additive()?;
        if self.peek().and_then(Self::comparison_op).is_some() {
            return Err(self.error("chained comparisons are not supported"));
        }
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, SynthesisError> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, SynthesisError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, SynthesisError> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, SynthesisError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Token::Ident(name)) => {
                if name == "param" && self.peek() == Some(&Token::LBracket) {
                    self.advance();
                    let index = match self.advance() {
                        Some(Token::Number(n)) if n.fract() == 0.0 && n >= 0.0 => n as usize,
                        _ => {
                            return Err(
                                self.error("param index must be a non-negative integer")
                            );
                        }
                    };
                    self.expect(&Token::RBracket, "']'")?;
                    return Ok(Expr::Param(index));
                }
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RParen, "')'")?;
                    return Ok(Expr::Call { name, args });
                }
                Ok(Expr::Ident(name))
            }
            _ => Err(self.error("expected expression")),
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, SynthesisError> {
        match self.peek() {
            Some(Token::If) => {
                self.advance();
                let condition = self.parse_expr()?;
                self.expect(&Token::Colon, "':' after guard condition")?;
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => return Err(self.error("expected assignment target after ':'")),
                };
                self.expect(&Token::Assign, "'=' in guard assignment")?;
                let expr = self.parse_expr()?;
                Ok(Statement::Guard {
                    condition,
                    name,
                    expr,
                })
            }
            Some(Token::Return) => {
                self.advance();
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => return Err(self.error("expected identifier after 'return'")),
                };
                Ok(Statement::Return { name })
            }
            Some(Token::Ident(_)) => {
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => unreachable!("peeked an identifier"),
                };
                self.expect(&Token::Assign, "'=' in assignment")?;
                let expr = self.parse_expr()?;
                Ok(Statement::Assign { name, expr })
            }
            _ => Err(self.error("expected statement")),
        }
    }
}

/// Parses a single boolean/arithmetic expression, as used by candidate
/// conditions.
pub fn parse_expression(text: &str) -> Result<Expr, SynthesisError> {
    let tokens = tokenize(text, 1)?;
    if tokens.is_empty() {
        return Err(SynthesisError::EmptyCondition);
    }
    let mut parser = Parser::new(tokens, 1);
    let expr = parser.parse_expr()?;
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing tokens"));
    }
    Ok(expr)
}

/// Parses full rule source. Statements after the `return` line are rejected.
pub fn parse_rule(source: &str) -> Result<Rule, SynthesisError> {
    let mut statements = Vec::new();
    let mut returned = false;

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let tokens = tokenize(raw, line)?;
        if tokens.is_empty() {
            continue;
        }
        if returned {
            return Err(SynthesisError::Parse {
                line,
                message: "statement after return".to_string(),
            });
        }
        let mut parser = Parser::new(tokens, line);
        let statement = parser.parse_statement()?;
        if !parser.at_end() {
            return Err(parser.error("unexpected trailing tokens"));
        }
        if matches!(statement, Statement::Return { .. }) {
            returned = true;
        }
        statements.push(statement);
    }

    Ok(Rule { statements })
}
