//! Embedded contract interpreter
//!
//! Contracts are plain source text in a small deterministic language:
//! `state` field declarations whose initializers form the constructor, an
//! optional `init { ... }` block run once at deploy time, and named methods
//! (`fn`, or `view fn` for read-only ones; the legacy `@view` annotation is
//! also accepted). Every method parameter is an opaque string at the call
//! boundary.
//!
//! The evaluator is a tree walker with a hard step budget and a wall-clock
//! watchdog. It reaches the outside world only through the [`Host`] trait;
//! there are no ambient globals.

use crate::crypto::Amount;
use crate::error::{ChainError, Result};
use crate::vm::value::Value;
use primitive_types::U256;
use std::collections::BTreeMap;
use std::time::Instant;

/// Everything the sandbox can reach beyond pure computation.
pub trait Host {
    fn invoke(&mut self, name: &str, args: Vec<Value>) -> Result<Value>;
}

/// Step/time budget for one sandbox invocation.
pub struct Budget {
    steps_remaining: u64,
    deadline: Option<Instant>,
    timeout_ms: u64,
    ticks: u64,
}

impl Budget {
    /// `timeout_ms == 0` disables the watchdog (debugging only).
    pub fn new(max_steps: u64, timeout_ms: u64) -> Self {
        let deadline = if timeout_ms == 0 {
            None
        } else {
            Some(Instant::now() + std::time::Duration::from_millis(timeout_ms))
        };
        Budget {
            steps_remaining: max_steps,
            deadline,
            timeout_ms,
            ticks: 0,
        }
    }

    fn charge(&mut self) -> Result<()> {
        if self.steps_remaining == 0 {
            return Err(ChainError::ExecutionLimit(
                "step budget exhausted".to_string(),
            ));
        }
        self.steps_remaining -= 1;
        self.ticks += 1;
        // The clock read is amortized; the step counter alone bounds the
        // interval between checks.
        if self.ticks % 128 == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() > deadline {
                    return Err(ChainError::ExecutionTimeout(self.timeout_ms));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Annotation(String),
    Number(U256),
    Str(String),
    // keywords
    State,
    Init,
    Fn,
    View,
    Let,
    If,
    Else,
    While,
    Return,
    True,
    False,
    Null,
    // punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Assign,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
}

fn eat(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, next: char) -> bool {
    if chars.peek() == Some(&next) {
        chars.next();
        true
    } else {
        false
    }
}

fn lex(source: &str) -> Result<Vec<(Token, u32)>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                // comment to end of line
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '@' => {
                chars.next();
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Annotation(word), line));
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => break,
                        },
                        '\n' => {
                            return Err(ChainError::ContractParse(format!(
                                "line {}: unterminated string literal",
                                line
                            )))
                        }
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(ChainError::ContractParse(format!(
                        "line {}: unterminated string literal",
                        line
                    )));
                }
                tokens.push((Token::Str(s), line));
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = U256::from_dec_str(&digits).map_err(|e| {
                    ChainError::ContractParse(format!("line {}: bad number {}: {}", line, digits, e))
                })?;
                tokens.push((Token::Number(n), line));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let tok = match word.as_str() {
                    "state" => Token::State,
                    "init" => Token::Init,
                    "fn" => Token::Fn,
                    "view" => Token::View,
                    "let" => Token::Let,
                    "if" => Token::If,
                    "else" => Token::Else,
                    "while" => Token::While,
                    "return" => Token::Return,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                };
                tokens.push((tok, line));
            }
            _ => {
                chars.next();
                let tok = match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    ',' => Token::Comma,
                    ';' => Token::Semi,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '=' => {
                        if eat(&mut chars, '=') {
                            Token::Eq
                        } else {
                            Token::Assign
                        }
                    }
                    '!' => {
                        if eat(&mut chars, '=') {
                            Token::Ne
                        } else {
                            Token::Bang
                        }
                    }
                    '<' => {
                        if eat(&mut chars, '=') {
                            Token::Le
                        } else {
                            Token::Lt
                        }
                    }
                    '>' => {
                        if eat(&mut chars, '=') {
                            Token::Ge
                        } else {
                            Token::Gt
                        }
                    }
                    '&' => {
                        if eat(&mut chars, '&') {
                            Token::AndAnd
                        } else {
                            return Err(ChainError::ContractParse(format!(
                                "line {}: stray '&'",
                                line
                            )));
                        }
                    }
                    '|' => {
                        if eat(&mut chars, '|') {
                            Token::OrOr
                        } else {
                            return Err(ChainError::ContractParse(format!(
                                "line {}: stray '|'",
                                line
                            )));
                        }
                    }
                    other => {
                        return Err(ChainError::ContractParse(format!(
                            "line {}: unexpected character {:?}",
                            line, other
                        )))
                    }
                };
                tokens.push((tok, line));
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Let(String, Expr),
    Assign(String, Expr),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    While(Expr, Vec<Stmt>),
    Return(Option<Expr>),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub view: bool,
}

/// Parsed contract: field initializers (the constructor), an optional init
/// block, and the methods.
#[derive(Debug, Clone)]
pub struct ContractSource {
    pub fields: Vec<(String, Expr)>,
    pub init: Vec<Stmt>,
    pub methods: Vec<MethodDef>,
}

impl ContractSource {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = lex(source)?;
        Parser { tokens, pos: 0 }.contract()
    }

    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }
}

struct Parser {
    tokens: Vec<(Token, u32)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|(_, l)| *l)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Result<Token> {
        let tok = self
            .tokens
            .get(self.pos)
            .map(|(t, _)| t.clone())
            .ok_or_else(|| ChainError::ContractParse("unexpected end of source".to_string()))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let line = self.line();
        let tok = self.next()?;
        if tok == expected {
            Ok(())
        } else {
            Err(ChainError::ContractParse(format!(
                "line {}: expected {:?}, found {:?}",
                line, expected, tok
            )))
        }
    }

    fn ident(&mut self) -> Result<String> {
        let line = self.line();
        match self.next()? {
            Token::Ident(name) => Ok(name),
            other => Err(ChainError::ContractParse(format!(
                "line {}: expected identifier, found {:?}",
                line, other
            ))),
        }
    }

    fn contract(&mut self) -> Result<ContractSource> {
        let mut fields = Vec::new();
        let mut init = Vec::new();
        let mut methods = Vec::new();
        let mut pending_view = false;

        while let Some(tok) = self.peek() {
            match tok.clone() {
                Token::State => {
                    self.next()?;
                    let name = self.ident()?;
                    self.expect(Token::Assign)?;
                    let expr = self.expr()?;
                    self.expect(Token::Semi)?;
                    fields.push((name, expr));
                }
                Token::Init => {
                    self.next()?;
                    init = self.block()?;
                }
                Token::Annotation(word) => {
                    self.next()?;
                    if word == "view" {
                        pending_view = true;
                    }
                    // unknown annotations are tolerated for compatibility
                }
                Token::View => {
                    self.next()?;
                    pending_view = true;
                }
                Token::Fn => {
                    self.next()?;
                    let name = self.ident()?;
                    self.expect(Token::LParen)?;
                    let mut params = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            params.push(self.ident()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.next()?;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    let body = self.block()?;
                    methods.push(MethodDef {
                        name,
                        params,
                        body,
                        view: pending_view,
                    });
                    pending_view = false;
                }
                other => {
                    return Err(ChainError::ContractParse(format!(
                        "line {}: expected declaration, found {:?}",
                        self.line(),
                        other
                    )))
                }
            }
        }
        Ok(ContractSource {
            fields,
            init,
            methods,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            stmts.push(self.stmt()?);
        }
        self.expect(Token::RBrace)?;
        Ok(stmts)
    }

    fn stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::Let) => {
                self.next()?;
                let name = self.ident()?;
                self.expect(Token::Assign)?;
                let expr = self.expr()?;
                self.expect(Token::Semi)?;
                Ok(Stmt::Let(name, expr))
            }
            Some(Token::If) => {
                self.next()?;
                let cond = self.expr()?;
                let then_branch = self.block()?;
                let else_branch = if self.peek() == Some(&Token::Else) {
                    self.next()?;
                    if self.peek() == Some(&Token::If) {
                        vec![self.stmt()?]
                    } else {
                        self.block()?
                    }
                } else {
                    Vec::new()
                };
                Ok(Stmt::If(cond, then_branch, else_branch))
            }
            Some(Token::While) => {
                self.next()?;
                let cond = self.expr()?;
                let body = self.block()?;
                Ok(Stmt::While(cond, body))
            }
            Some(Token::Return) => {
                self.next()?;
                if self.peek() == Some(&Token::Semi) {
                    self.next()?;
                    Ok(Stmt::Return(None))
                } else {
                    let expr = self.expr()?;
                    self.expect(Token::Semi)?;
                    Ok(Stmt::Return(Some(expr)))
                }
            }
            _ => {
                // assignment or expression statement
                if let Some(Token::Ident(name)) = self.peek().cloned() {
                    if self.tokens.get(self.pos + 1).map(|(t, _)| t) == Some(&Token::Assign) {
                        self.next()?;
                        self.next()?;
                        let expr = self.expr()?;
                        self.expect(Token::Semi)?;
                        return Ok(Stmt::Assign(name, expr));
                    }
                }
                let expr = self.expr()?;
                self.expect(Token::Semi)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::OrOr) {
            self.next()?;
            let rhs = self.and_expr()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.equality()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.next()?;
            let rhs = self.equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinOp::Eq,
                Some(Token::Ne) => BinOp::Ne,
                _ => break,
            };
            self.next()?;
            let rhs = self.comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Ge) => BinOp::Ge,
                _ => break,
            };
            self.next()?;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next()?;
            let rhs = self.factor()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.next()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Bang) {
            self.next()?;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.next()? {
            Token::Number(n) => Ok(Expr::Literal(Value::Uint(Amount(n)))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next()?;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.expr()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.next()?;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => Err(ChainError::ContractParse(format!(
                "line {}: unexpected token {:?}",
                line, other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

enum Flow {
    Normal,
    Return(Value),
}

pub struct Evaluator<'a> {
    storage: &'a mut BTreeMap<String, Value>,
    view: bool,
    budget: &'a mut Budget,
    host: &'a mut dyn Host,
    scopes: Vec<BTreeMap<String, Value>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        storage: &'a mut BTreeMap<String, Value>,
        view: bool,
        budget: &'a mut Budget,
        host: &'a mut dyn Host,
    ) -> Self {
        Evaluator {
            storage,
            view,
            budget,
            host,
            scopes: vec![BTreeMap::new()],
        }
    }

    /// Run the constructor: field initializers in declaration order, then
    /// the init block.
    pub fn run_constructor(&mut self, contract: &ContractSource) -> Result<()> {
        for (name, expr) in &contract.fields {
            let value = self.eval(expr)?;
            self.storage.insert(name.clone(), value);
        }
        self.exec_block(&contract.init)?;
        Ok(())
    }

    /// Run a method body with its parameters bound; fall-through returns
    /// `null`.
    pub fn run_method(&mut self, method: &MethodDef, args: Vec<Value>) -> Result<Value> {
        if args.len() != method.params.len() {
            return Err(ChainError::WrongArgumentCount {
                method: method.name.clone(),
                expected: method.params.len(),
                got: args.len(),
            });
        }
        let mut frame = BTreeMap::new();
        for (param, arg) in method.params.iter().zip(args) {
            frame.insert(param.clone(), arg);
        }
        self.scopes.push(frame);
        let flow = self.exec_block(&method.body)?;
        self.scopes.pop();
        Ok(match flow {
            Flow::Return(v) => v,
            Flow::Normal => Value::Null,
        })
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            if let Flow::Return(v) = self.exec_stmt(stmt)? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        self.budget.charge()?;
        match stmt {
            Stmt::Let(name, expr) => {
                let value = self.eval(expr)?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), value);
                }
                Ok(Flow::Normal)
            }
            Stmt::Assign(name, expr) => {
                let value = self.eval(expr)?;
                // locals shadow storage, innermost scope first
                for scope in self.scopes.iter_mut().rev() {
                    if scope.contains_key(name) {
                        scope.insert(name.clone(), value);
                        return Ok(Flow::Normal);
                    }
                }
                if self.view {
                    return Err(ChainError::Execution(format!(
                        "storage write to {:?} in a read-only method",
                        name
                    )));
                }
                self.storage.insert(name.clone(), value);
                Ok(Flow::Normal)
            }
            Stmt::If(cond, then_branch, else_branch) => {
                if self.eval(cond)?.truthy() {
                    self.exec_block(then_branch)
                } else {
                    self.exec_block(else_branch)
                }
            }
            Stmt::While(cond, body) => {
                while self.eval(cond)?.truthy() {
                    if let Flow::Return(v) = self.exec_block(body)? {
                        return Ok(Flow::Return(v));
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(e) => self.eval(e)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        self.budget.charge()?;
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Ident(name) => {
                for scope in self.scopes.iter().rev() {
                    if let Some(v) = scope.get(name) {
                        return Ok(v.clone());
                    }
                }
                self.storage
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ChainError::Execution(format!("unknown identifier {:?}", name)))
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.truthy())),
            Expr::Binary(op, lhs, rhs) => {
                // short-circuit forms first
                match op {
                    BinOp::And => {
                        let l = self.eval(lhs)?;
                        if !l.truthy() {
                            return Ok(Value::Bool(false));
                        }
                        return Ok(Value::Bool(self.eval(rhs)?.truthy()));
                    }
                    BinOp::Or => {
                        let l = self.eval(lhs)?;
                        if l.truthy() {
                            return Ok(Value::Bool(true));
                        }
                        return Ok(Value::Bool(self.eval(rhs)?.truthy()));
                    }
                    _ => {}
                }
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                binary_op(*op, l, r)
            }
            Expr::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(name, values)
            }
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        // pure language builtins; everything else is a host capability
        match name {
            "int" => {
                expect_arity(name, &args, 1)?;
                match &args[0] {
                    Value::Uint(a) => Ok(Value::Uint(*a)),
                    Value::Str(s) => Amount::from_decimal(s.trim())
                        .map(Value::Uint)
                        .map_err(|_| {
                            ChainError::Execution(format!("int(): not a decimal: {:?}", s))
                        }),
                    other => Err(ChainError::Execution(format!(
                        "int(): cannot convert {}",
                        other.type_name()
                    ))),
                }
            }
            "str" => {
                expect_arity(name, &args, 1)?;
                Ok(Value::Str(args[0].to_string()))
            }
            "len" => {
                expect_arity(name, &args, 1)?;
                let s = args[0].as_str()?;
                Ok(Value::Uint(Amount::from_u64(s.chars().count() as u64)))
            }
            _ => self.host.invoke(name, args),
        }
    }
}

fn expect_arity(name: &str, args: &[Value], expected: usize) -> Result<()> {
    if args.len() != expected {
        return Err(ChainError::WrongArgumentCount {
            method: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn binary_op(op: BinOp, l: Value, r: Value) -> Result<Value> {
    use BinOp::*;
    match op {
        Add => match (&l, &r) {
            (Value::Uint(a), Value::Uint(b)) => a
                .checked_add(*b)
                .map(Value::Uint)
                .ok_or_else(|| ChainError::Execution("uint overflow".to_string())),
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!("{}{}", l, r))),
            _ => Err(type_error("+", &l, &r)),
        },
        Sub => {
            let (a, b) = (l.as_uint()?, r.as_uint()?);
            a.checked_sub(b)
                .map(Value::Uint)
                .ok_or_else(|| ChainError::Execution("uint underflow".to_string()))
        }
        Mul => {
            let (a, b) = (l.as_uint()?, r.as_uint()?);
            a.0.checked_mul(b.0)
                .map(|n| Value::Uint(Amount(n)))
                .ok_or_else(|| ChainError::Execution("uint overflow".to_string()))
        }
        Div => {
            let (a, b) = (l.as_uint()?, r.as_uint()?);
            if b.is_zero() {
                return Err(ChainError::Execution("division by zero".to_string()));
            }
            Ok(Value::Uint(Amount(a.0 / b.0)))
        }
        Rem => {
            let (a, b) = (l.as_uint()?, r.as_uint()?);
            if b.is_zero() {
                return Err(ChainError::Execution("division by zero".to_string()));
            }
            Ok(Value::Uint(Amount(a.0 % b.0)))
        }
        Eq => Ok(Value::Bool(l == r)),
        Ne => Ok(Value::Bool(l != r)),
        Lt | Gt | Le | Ge => {
            let ordering = match (&l, &r) {
                (Value::Uint(a), Value::Uint(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => return Err(type_error("comparison", &l, &r)),
            };
            let result = match op {
                Lt => ordering.is_lt(),
                Gt => ordering.is_gt(),
                Le => ordering.is_le(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        And | Or => unreachable!("short-circuited above"),
    }
}

fn type_error(op: &str, l: &Value, r: &Value) -> ChainError {
    ChainError::Execution(format!(
        "type error: {} between {} and {}",
        op,
        l.type_name(),
        r.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoHost;

    impl Host for NoHost {
        fn invoke(&mut self, name: &str, _args: Vec<Value>) -> Result<Value> {
            Err(ChainError::UnknownMethod(name.to_string()))
        }
    }

    const COUNTER: &str = r#"
        state counter = 0;

        fn increment() {
            counter = counter + 1;
        }

        view fn current() {
            return counter;
        }

        fn add(amount) {
            counter = counter + int(amount);
        }
    "#;

    fn run(
        source: &str,
        method: &str,
        args: Vec<Value>,
        storage: &mut BTreeMap<String, Value>,
    ) -> Result<Value> {
        let contract = ContractSource::parse(source)?;
        let def = contract
            .method(method)
            .ok_or_else(|| ChainError::UnknownMethod(method.to_string()))?
            .clone();
        let mut budget = Budget::new(10_000, 0);
        let mut host = NoHost;
        let mut eval = Evaluator::new(storage, def.view, &mut budget, &mut host);
        eval.run_method(&def, args)
    }

    #[test]
    fn test_constructor_initializes_fields() {
        let contract = ContractSource::parse(COUNTER).unwrap();
        let mut storage = BTreeMap::new();
        let mut budget = Budget::new(10_000, 0);
        let mut host = NoHost;
        let mut eval = Evaluator::new(&mut storage, false, &mut budget, &mut host);
        eval.run_constructor(&contract).unwrap();
        assert_eq!(storage.get("counter"), Some(&Value::Uint(Amount::zero())));
    }

    #[test]
    fn test_increment_mutates_storage() {
        let mut storage = BTreeMap::new();
        storage.insert("counter".to_string(), Value::Uint(Amount::zero()));
        run(COUNTER, "increment", vec![], &mut storage).unwrap();
        assert_eq!(
            storage.get("counter"),
            Some(&Value::Uint(Amount::from_u64(1)))
        );
    }

    #[test]
    fn test_view_method_rejects_storage_write() {
        let source = r#"
            state x = 1;
            view fn poke() {
                x = 2;
            }
        "#;
        let mut storage = BTreeMap::new();
        storage.insert("x".to_string(), Value::Uint(Amount::from_u64(1)));
        let err = run(source, "poke", vec![], &mut storage).unwrap_err();
        assert!(matches!(err, ChainError::Execution(_)));
        assert_eq!(storage.get("x"), Some(&Value::Uint(Amount::from_u64(1))));
    }

    #[test]
    fn test_legacy_view_annotation() {
        let source = r#"
            state x = 1;
            @view
            fn peek() {
                return x;
            }
        "#;
        let contract = ContractSource::parse(source).unwrap();
        assert!(contract.method("peek").unwrap().view);
    }

    #[test]
    fn test_string_args_are_opaque_until_converted() {
        let mut storage = BTreeMap::new();
        storage.insert("counter".to_string(), Value::Uint(Amount::from_u64(40)));
        run(
            COUNTER,
            "add",
            vec![Value::Str("2".to_string())],
            &mut storage,
        )
        .unwrap();
        assert_eq!(
            storage.get("counter"),
            Some(&Value::Uint(Amount::from_u64(42)))
        );
    }

    #[test]
    fn test_step_budget_stops_infinite_loop() {
        let source = r#"
            state x = 0;
            fn spin() {
                while true {
                    x = x + 1;
                }
            }
        "#;
        let contract = ContractSource::parse(source).unwrap();
        let def = contract.method("spin").unwrap().clone();
        let mut storage = BTreeMap::new();
        storage.insert("x".to_string(), Value::Uint(Amount::zero()));
        let mut budget = Budget::new(1_000, 0);
        let mut host = NoHost;
        let mut eval = Evaluator::new(&mut storage, false, &mut budget, &mut host);
        let err = eval.run_method(&def, vec![]).unwrap_err();
        assert!(matches!(err, ChainError::ExecutionLimit(_)));
    }

    #[test]
    fn test_wrong_argument_count() {
        let mut storage = BTreeMap::new();
        storage.insert("counter".to_string(), Value::Uint(Amount::zero()));
        let err = run(COUNTER, "add", vec![], &mut storage).unwrap_err();
        assert!(matches!(err, ChainError::WrongArgumentCount { .. }));
    }

    #[test]
    fn test_arithmetic_and_control_flow() {
        let source = r#"
            state total = 0;
            fn sum_to(n) {
                let i = 1;
                let acc = 0;
                while i <= int(n) {
                    acc = acc + i;
                    i = i + 1;
                }
                total = acc;
                return acc;
            }
        "#;
        let mut storage = BTreeMap::new();
        storage.insert("total".to_string(), Value::Uint(Amount::zero()));
        let result = run(
            source,
            "sum_to",
            vec![Value::Str("10".to_string())],
            &mut storage,
        )
        .unwrap();
        assert_eq!(result, Value::Uint(Amount::from_u64(55)));
        assert_eq!(
            storage.get("total"),
            Some(&Value::Uint(Amount::from_u64(55)))
        );
    }

    #[test]
    fn test_underflow_is_an_error() {
        let source = r#"
            state x = 0;
            fn bad() {
                x = x - 1;
            }
        "#;
        let mut storage = BTreeMap::new();
        storage.insert("x".to_string(), Value::Uint(Amount::zero()));
        let err = run(source, "bad", vec![], &mut storage).unwrap_err();
        assert!(matches!(err, ChainError::Execution(_)));
    }
}
