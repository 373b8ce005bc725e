//! Tokenizer and recursive-descent parser for column expressions.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! program   := statement ((";" | NEWLINE) statement)*
//! statement := IDENT "=" sum | sum
//! sum       := term (("+" | "-") term)*
//! term      := unary (("*" | "/" | "//" | "%") unary)*
//! unary     := ("+" | "-") unary | power
//! power     := atom ("**" unary)?
//! atom      := NUMBER | IDENT | IDENT "(" args ")" | "(" sum ")"
//! ```
//!
//! Newlines inside parentheses are ignored. `#` starts a comment.

use super::ast::{BinaryOp, Expr, Program, Statement, UnaryOp};
use crate::error::{ExprError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Assign,
    Separator,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    pos: usize,
}

fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut depth: usize = 0;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\r' => i += 1,
            b'\n' => {
                if depth == 0 {
                    tokens.push(Spanned {
                        token: Token::Separator,
                        pos: start,
                    });
                }
                i += 1;
            }
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b';' => {
                tokens.push(Spanned {
                    token: Token::Separator,
                    pos: start,
                });
                i += 1;
            }
            b'(' => {
                depth += 1;
                tokens.push(Spanned {
                    token: Token::LParen,
                    pos: start,
                });
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                tokens.push(Spanned {
                    token: Token::RParen,
                    pos: start,
                });
                i += 1;
            }
            b',' => {
                tokens.push(Spanned {
                    token: Token::Comma,
                    pos: start,
                });
                i += 1;
            }
            b'+' | b'-' | b'%' => {
                let op = match c {
                    b'+' => "+",
                    b'-' => "-",
                    _ => "%",
                };
                tokens.push(Spanned {
                    token: Token::Op(op),
                    pos: start,
                });
                i += 1;
            }
            b'*' | b'/' => {
                let doubled = bytes.get(i + 1) == Some(&c);
                let op = match (c, doubled) {
                    (b'*', true) => "**",
                    (b'*', false) => "*",
                    (_, true) => "//",
                    (_, false) => "/",
                };
                tokens.push(Spanned {
                    token: Token::Op(op),
                    pos: start,
                });
                i += if doubled { 2 } else { 1 };
            }
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    return Err(ExprError::syntax("comparison is not supported", start));
                }
                tokens.push(Spanned {
                    token: Token::Assign,
                    pos: start,
                });
                i += 1;
            }
            b'0'..=b'9' | b'.' => {
                i = scan_number(bytes, i)?;
                tokens.push(Spanned {
                    token: Token::Number(source[start..i].to_string()),
                    pos: start,
                });
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                    i += 1;
                }
                tokens.push(Spanned {
                    token: Token::Ident(source[start..i].to_string()),
                    pos: start,
                });
            }
            _ => {
                let ch = source[start..].chars().next().unwrap_or('?');
                return Err(ExprError::syntax(
                    format!("unexpected character '{}'", ch),
                    start,
                ));
            }
        }
    }

    Ok(tokens)
}

/// Scan a numeric literal starting at `start`, returning the end offset.
fn scan_number(bytes: &[u8], start: usize) -> Result<usize> {
    let mut i = start;
    let mut digits = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return Err(ExprError::syntax("invalid number", start));
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j == exp_start {
            return Err(ExprError::syntax("invalid number exponent", i));
        }
        i = j;
    }
    if i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.')
    {
        return Err(ExprError::syntax("invalid number", start));
    }
    Ok(i)
}

/// Deepest allowed nesting of groups, calls, unary operators and operator
/// chains. Printing and evaluation recurse over the tree.
const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|t| t.pos).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ExprError::syntax(format!("expected {}", what), self.position()))
        }
    }

    fn descend(&mut self) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::syntax(
                "expression nested too deeply",
                self.position(),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn skip_separators(&mut self) {
        while self.peek() == Some(&Token::Separator) {
            self.pos += 1;
        }
    }

    fn program(&mut self) -> Result<Program> {
        let mut statements = Vec::new();
        self.skip_separators();
        while self.peek().is_some() {
            statements.push(self.statement()?);
            match self.peek() {
                None => break,
                Some(Token::Separator) => self.skip_separators(),
                Some(_) => {
                    return Err(ExprError::syntax("unexpected token", self.position()));
                }
            }
        }
        if statements.is_empty() {
            return Err(ExprError::syntax("empty expression", 0));
        }
        Ok(Program { statements })
    }

    fn statement(&mut self) -> Result<Statement> {
        if let (Some(Token::Ident(name)), Some(Token::Assign)) = (self.peek(), self.peek_at(1)) {
            let target = name.clone();
            self.pos += 2;
            let value = self.sum()?;
            return Ok(Statement::Assign { target, value });
        }
        Ok(Statement::Expr(self.sum()?))
    }

    fn sum(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinaryOp::Add
            } else if self.eat_op("-") {
                BinaryOp::Sub
            } else {
                self.depth = base;
                return Ok(lhs);
            };
            self.descend()?;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinaryOp::Mul
            } else if self.eat_op("/") {
                BinaryOp::Div
            } else if self.eat_op("//") {
                BinaryOp::FloorDiv
            } else if self.eat_op("%") {
                BinaryOp::Mod
            } else {
                self.depth = base;
                return Ok(lhs);
            };
            self.descend()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = if self.eat_op("-") {
            UnaryOp::Minus
        } else if self.eat_op("+") {
            UnaryOp::Plus
        } else {
            return self.power();
        };
        self.descend()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.atom()?;
        if self.eat_op("**") {
            self.descend()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr> {
        let pos = self.position();
        match self.advance() {
            Some(Token::Number(text)) => {
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::syntax("invalid number", pos))?;
                Ok(Expr::Number { value, text })
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.descend()?;
                    let args = self.arguments()?;
                    self.depth -= 1;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.sum()?;
                self.expect(Token::RParen, "')'")?;
                self.depth -= 1;
                Ok(Expr::Group(Box::new(inner)))
            }
            Some(_) => Err(ExprError::syntax("unexpected token", pos)),
            None => Err(ExprError::syntax("unexpected end of expression", pos)),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.sum()?);
            if self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                continue;
            }
            self.expect(Token::RParen, "')' or ','")?;
            return Ok(args);
        }
    }
}

/// Parse expression text into a [`Program`].
pub fn parse(source: &str) -> Result<Program> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
        depth: 0,
    };
    parser.program()
}
