use crate::ast::{BinOp, Expr, IncDec, Span, Spanned};
use crate::lexer::Token;
use crate::object::ObjRef;

use super::{Compiler, Result};

// Binding power, loosest first. Assignment is right-associative.
const PREC_ASSIGN: u8 = 1;
const PREC_OR: u8 = 3;
const PREC_XOR: u8 = 4;
const PREC_AND: u8 = 5;
const PREC_COMPARE: u8 = 7;
const PREC_TERM: u8 = 8;
const PREC_FACTOR: u8 = 9;
const PREC_UNARY: u8 = 10;

enum Infix {
    Assign,
    Binary(BinOp),
}

fn infix(token: Token) -> Option<(u8, Infix)> {
    let (prec, op) = match token {
        Token::Assign => return Some((PREC_ASSIGN, Infix::Assign)),
        Token::Or => (PREC_OR, BinOp::Or),
        Token::Xor => (PREC_XOR, BinOp::Xor),
        Token::And => (PREC_AND, BinOp::And),
        Token::EqualEqual => (PREC_COMPARE, BinOp::Equal),
        Token::BangEqual => (PREC_COMPARE, BinOp::NotEqual),
        Token::Greater => (PREC_COMPARE, BinOp::Greater),
        Token::GreaterEqual => (PREC_COMPARE, BinOp::GreaterEqual),
        Token::Less => (PREC_COMPARE, BinOp::Less),
        Token::LessEqual => (PREC_COMPARE, BinOp::LessEqual),
        Token::Plus => (PREC_TERM, BinOp::Add),
        Token::Minus => (PREC_TERM, BinOp::Sub),
        Token::Star => (PREC_FACTOR, BinOp::Mul),
        Token::Slash => (PREC_FACTOR, BinOp::Div),
        _ => return None,
    };
    Some((prec, Infix::Binary(op)))
}

impl Compiler<'_, '_> {
    pub(super) fn expression(&mut self) -> Result<Spanned<Expr>> {
        self.parse_precedence(PREC_ASSIGN)
    }

    fn parse_precedence(&mut self, min: u8) -> Result<Spanned<Expr>> {
        let mut left = self.prefix()?;
        loop {
            let Some(next) = self.peek()? else { break };
            let Some((prec, op)) = infix(next.token) else { break };
            if prec < min {
                break;
            }
            self.advance()?;
            left = match op {
                Infix::Assign => {
                    if !left.is_assignable() {
                        return Err(self.error_span(left.span, "Invalid assignment target"));
                    }
                    let value = self.parse_precedence(PREC_ASSIGN)?;
                    let span = left.span.merge(value.span);
                    Spanned::new(Expr::Assign { target: Box::new(left), value: Box::new(value) }, span)
                }
                Infix::Binary(op) => {
                    let right = self.parse_precedence(prec + 1)?;
                    let span = left.span.merge(right.span);
                    Spanned::new(Expr::Binary { op, left: Box::new(left), right: Box::new(right) }, span)
                }
            };
        }
        Ok(left)
    }

    fn prefix(&mut self) -> Result<Spanned<Expr>> {
        let Some(first) = self.next()? else {
            return Err(self.error_eof("Expected expression, found end of input"));
        };
        let span = first.span;
        let primary = match first.token {
            Token::Int(n) => Spanned::new(Expr::Number(n), span),
            Token::True => Spanned::new(Expr::Bool(true), span),
            Token::False => Spanned::new(Expr::Bool(false), span),
            Token::Str(r) => Spanned::new(Expr::Str(r), span),
            Token::This => Spanned::new(Expr::This, span),
            Token::Minus => return self.negation(span),
            Token::Bang | Token::Not => {
                let operand = self.parse_precedence(PREC_UNARY)?;
                let span = span.merge(operand.span);
                return Ok(Spanned::new(Expr::Not(Box::new(operand)), span));
            }
            Token::PlusPlus | Token::MinusMinus => {
                let context = format!("after {}", first.token.describe(self.ctx));
                let (name, at) = self.expect_ident(&context)?;
                let kind = if first.token == Token::PlusPlus { IncDec::PreIncr } else { IncDec::PreDecr };
                return Ok(Spanned::new(Expr::IncDec { kind, name }, span.merge(at.span)));
            }
            Token::LParen => {
                let inner = self.expression()?;
                let close = self.expect(Token::RParen, "after expression")?;
                Spanned::new(inner.node, span.merge(close.span))
            }
            Token::Ident(name) => self.identifier(name, span)?,
            other => {
                let found = other.describe(self.ctx);
                return Err(self.error(first, format!("Expected expression, found {found}")));
            }
        };
        self.postfix(primary)
    }

    /// `-5` folds to a literal; anything else becomes `-1 * operand`.
    fn negation(&mut self, span: Span) -> Result<Spanned<Expr>> {
        if let Some(next) = self.peek()? {
            if let Token::Int(n) = next.token {
                self.advance()?;
                let literal = Spanned::new(Expr::Number(n.wrapping_neg()), span.merge(next.span));
                return self.postfix(literal);
            }
        }
        let operand = self.parse_precedence(PREC_UNARY)?;
        let span = span.merge(operand.span);
        let minus_one = Box::new(Spanned::new(Expr::Number(-1), span));
        Ok(Spanned::new(Expr::Binary { op: BinOp::Mul, left: minus_one, right: Box::new(operand) }, span))
    }

    /// A bare name, a call `f(..)` or a postfix `x++`.
    fn identifier(&mut self, name: ObjRef, span: Span) -> Result<Spanned<Expr>> {
        match self.peek_token()? {
            Some(Token::LParen) => {
                let (args, end) = self.arguments()?;
                Ok(Spanned::new(Expr::Call { callee: name, args }, span.merge(end)))
            }
            Some(t @ (Token::PlusPlus | Token::MinusMinus)) => {
                let op = self.advance()?;
                let kind = if t == Token::PlusPlus { IncDec::PostIncr } else { IncDec::PostDecr };
                Ok(Spanned::new(Expr::IncDec { kind, name }, span.merge(op.span)))
            }
            _ => Ok(Spanned::new(Expr::Ident(name), span)),
        }
    }

    /// `.name` and `.name(..)` chains.
    fn postfix(&mut self, mut expr: Spanned<Expr>) -> Result<Spanned<Expr>> {
        while self.eat(Token::Dot)? {
            let (name, at) = self.expect_ident("after '.'")?;
            if self.check(Token::LParen)? {
                let (args, end) = self.arguments()?;
                let span = expr.span.merge(end);
                expr = Spanned::new(Expr::MethodCall { object: Box::new(expr), name, args }, span);
            } else {
                let span = expr.span.merge(at.span);
                expr = Spanned::new(Expr::Property { object: Box::new(expr), name }, span);
            }
        }
        Ok(expr)
    }

    /// `( expr, .. )`. Returns the arguments and the span of `)`.
    fn arguments(&mut self) -> Result<(Vec<Spanned<Expr>>, Span)> {
        self.expect(Token::LParen, "before arguments")?;
        let mut args = Vec::new();
        if let Some(close) = self.peek()? {
            if close.token == Token::RParen {
                self.advance()?;
                return Ok((args, close.span));
            }
        }
        loop {
            args.push(self.expression()?);
            if !self.eat(Token::Comma)? {
                break;
            }
        }
        let close = self.expect(Token::RParen, "after arguments")?;
        Ok((args, close.span))
    }
}
