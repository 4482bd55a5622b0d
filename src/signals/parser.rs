//! Lexer and recursive-descent parser for entry/exit logic.
//!
//! Precedence (loosest to tightest): OR, AND, NOT, comparison, atom.
//! Keywords are case-insensitive; `&&`/`||`/`!` are accepted as synonyms.
//! Dotted sub-field access (`bb.upper`) is normalized to `bb_upper`
//! during lexing.

use crate::error::EngineError;

use super::ast::{CmpOp, Expr};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
    Cmp(CmpOp),
    And,
    Or,
    Not,
}

fn lex(src: &str) -> Result<Vec<Token>, EngineError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
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
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Cmp(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Cmp(CmpOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Cmp(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Cmp(CmpOp::Gt));
                    i += 1;
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Cmp(CmpOp::Eq));
                    i += 2;
                } else {
                    return Err(EngineError::ExpressionBind(format!(
                        "single '=' at offset {i}; use '==' for comparison"
                    )));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Cmp(CmpOp::Ne));
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(EngineError::ExpressionBind(format!(
                        "unexpected '&' at offset {i}"
                    )));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(EngineError::ExpressionBind(format!(
                        "unexpected '|' at offset {i}"
                    )));
                }
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_digit() || bytes[i] == b'.')
                {
                    i += 1;
                }
                let text = &src[start..i];
                let value: f64 = text.parse().map_err(|_| {
                    EngineError::ExpressionBind(format!("invalid number literal: {text}"))
                })?;
                tokens.push(Token::Number(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
                {
                    i += 1;
                }
                // `bb.upper` -> `bb_upper`
                let word = src[start..i].replace('.', "_");
                match word.to_ascii_uppercase().as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "NOT" => tokens.push(Token::Not),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            other => {
                return Err(EngineError::ExpressionBind(format!(
                    "unexpected character '{other}' at offset {i}"
                )));
            }
        }
    }
    Ok(tokens)
}

pub fn parse(src: &str) -> Result<Expr, EngineError> {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return Err(EngineError::ExpressionBind("empty expression".into()));
    }
    let tokens = lex(trimmed)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(EngineError::ExpressionBind(format!(
            "trailing input after expression: {:?}",
            &parser.tokens[parser.pos..]
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), EngineError> {
        match self.advance() {
            Some(ref t) if t == expected => Ok(()),
            other => Err(EngineError::ExpressionBind(format!(
                "expected {what}, found {other:?}"
            ))),
        }
    }

    fn or_expr(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.and_expr()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.not_expr()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, EngineError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let inner = self.not_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, EngineError> {
        let lhs = self.atom()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.advance();
            let rhs = self.atom()?;
            return Ok(Expr::Cmp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn atom(&mut self) -> Result<Expr, EngineError> {
        match self.advance() {
            Some(Token::Number(v)) => Ok(Expr::Number(v)),
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    return self.helper_call(&name);
                }
                Ok(Expr::Column(name))
            }
            other => Err(EngineError::ExpressionBind(format!(
                "expected a column, number, or helper call, found {other:?}"
            ))),
        }
    }

    fn helper_call(&mut self, name: &str) -> Result<Expr, EngineError> {
        self.expect(&Token::LParen, "'('")?;
        let a = self.or_expr()?;
        self.expect(&Token::Comma, "','")?;
        let b = self.or_expr()?;

        let lowered = name.to_ascii_lowercase();
        match lowered.as_str() {
            "crossover" | "crossunder" => {
                self.expect(&Token::RParen, "')'")?;
                if lowered == "crossover" {
                    Ok(Expr::Crossover(Box::new(a), Box::new(b)))
                } else {
                    Ok(Expr::Crossunder(Box::new(a), Box::new(b)))
                }
            }
            "above" | "below" => {
                let periods = if matches!(self.peek(), Some(Token::Comma)) {
                    self.advance();
                    match self.advance() {
                        Some(Token::Number(v)) if v >= 1.0 && v.fract() == 0.0 => v as usize,
                        other => {
                            return Err(EngineError::ExpressionBind(format!(
                                "{lowered}() needs an integer period, found {other:?}"
                            )));
                        }
                    }
                } else {
                    1
                };
                self.expect(&Token::RParen, "')'")?;
                if lowered == "above" {
                    Ok(Expr::Above {
                        a: Box::new(a),
                        b: Box::new(b),
                        periods,
                    })
                } else {
                    Ok(Expr::Below {
                        a: Box::new(a),
                        b: Box::new(b),
                        periods,
                    })
                }
            }
            // Unknown helpers fail at parse, never coerce to false.
            other => Err(EngineError::ExpressionBind(format!(
                "unknown helper function: {other}"
            ))),
        }
    }
}
