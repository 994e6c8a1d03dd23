use crate::ast::*;
use crate::error::ParseError;
use crate::token::{Span, Spanned, Token};

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Recursive constructs currently open (parentheses, operands, blocks).
    nesting: usize,
}

/// Deepest recursion the parser itself will enter.
pub const MAX_NESTING: usize = 32;
/// Tallest syntax tree accepted. Later passes recurse over the tree, so
/// this also bounds their stack use.
pub const MAX_DEPTH: usize = 128;

/// Binary operator levels, lowest precedence first.
const BINARY_LEVELS: usize = 10;

/// Operator found at a binary precedence level.
enum InfixOp {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn infix_op(level: usize, token: &Token) -> Option<InfixOp> {
    use InfixOp::{Binary, Logical};
    let op = match (level, token) {
        (0, Token::PipePipe) => Logical(LogicalOp::Or),
        (1, Token::AmpAmp) => Logical(LogicalOp::And),
        (2, Token::Pipe) => Binary(BinaryOp::BitOr),
        (3, Token::Caret) => Binary(BinaryOp::BitXor),
        (4, Token::Amp) => Binary(BinaryOp::BitAnd),
        (5, Token::EqEq) => Binary(BinaryOp::Eq),
        (5, Token::NotEq) => Binary(BinaryOp::NotEq),
        (5, Token::EqEqEq) => Binary(BinaryOp::StrictEq),
        (5, Token::NotEqEq) => Binary(BinaryOp::StrictNotEq),
        (6, Token::Lt) => Binary(BinaryOp::Lt),
        (6, Token::Gt) => Binary(BinaryOp::Gt),
        (6, Token::LtEq) => Binary(BinaryOp::LtEq),
        (6, Token::GtEq) => Binary(BinaryOp::GtEq),
        (7, Token::Shl) => Binary(BinaryOp::Shl),
        (7, Token::Shr) => Binary(BinaryOp::Shr),
        (7, Token::UShr) => Binary(BinaryOp::UShr),
        (8, Token::Plus) => Binary(BinaryOp::Add),
        (8, Token::Minus) => Binary(BinaryOp::Sub),
        (9, Token::Star) => Binary(BinaryOp::Mul),
        (9, Token::Slash) => Binary(BinaryOp::Div),
        (9, Token::Percent) => Binary(BinaryOp::Rem),
        _ => return None,
    };
    Some(op)
}

/// Map the operator carried by a compound assignment token.
fn compound_op(token: &Token) -> Option<BinaryOp> {
    let op = match token {
        Token::Plus => BinaryOp::Add,
        Token::Minus => BinaryOp::Sub,
        Token::Star => BinaryOp::Mul,
        Token::Slash => BinaryOp::Div,
        Token::Percent => BinaryOp::Rem,
        Token::StarStar => BinaryOp::Pow,
        Token::Amp => BinaryOp::BitAnd,
        Token::Pipe => BinaryOp::BitOr,
        Token::Caret => BinaryOp::BitXor,
        Token::Shl => BinaryOp::Shl,
        Token::Shr => BinaryOp::Shr,
        Token::UShr => BinaryOp::UShr,
        _ => return None,
    };
    Some(op)
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser {
            tokens,
            pos: 0,
            nesting: 0,
        }
    }

    // ── Helpers ──────────────────────────────────────────────

    fn peek(&self) -> Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Token {
        let idx = (self.pos + offset).min(self.tokens.len().saturating_sub(1));
        self.tokens
            .get(idx)
            .map(|s| s.token.clone())
            .unwrap_or(Token::EOF)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.span)
            .unwrap_or_default()
    }

    /// End offset of the most recently consumed token.
    fn prev_end(&self) -> usize {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map(|s| s.span.end)
            .unwrap_or(0)
    }

    fn since(&self, start: usize) -> Span {
        Span::new(start, self.prev_end().max(start))
    }

    fn advance(&mut self) -> Token {
        let token = self.peek();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek(), Token::EOF)
    }

    fn newline_before(&self) -> bool {
        self.tokens.get(self.pos).is_some_and(|s| s.newline_before)
    }

    fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(&self.peek()) == std::mem::discriminant(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            expected: expected.into(),
            found: self.peek(),
            span: self.span(),
        }
    }

    fn too_deep(&self) -> ParseError {
        ParseError::TooDeep { span: self.span() }
    }

    /// Run `parse` one nesting level down.
    fn nested<T>(&mut self, parse: fn(&mut Self) -> Result<T, ParseError>) -> Result<T, ParseError> {
        if self.nesting >= MAX_NESTING {
            return Err(self.too_deep());
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn checked(&self, expr: Expr) -> Result<Expr, ParseError> {
        if expr.depth > MAX_DEPTH {
            return Err(ParseError::TooDeep { span: expr.span });
        }
        Ok(expr)
    }

    fn build(&self, kind: ExprKind, start: usize) -> Result<Expr, ParseError> {
        self.checked(Expr::new(kind, self.since(start)))
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", crate::token::token_to_string(expected))))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Statement terminator with automatic semicolon insertion at line breaks,
    /// before `}` and at end of input.
    fn expect_terminator(&mut self) -> Result<(), ParseError> {
        if self.eat(&Token::Semicolon)
            || self.check(&Token::RBrace)
            || self.is_at_end()
            || self.newline_before()
        {
            Ok(())
        } else {
            Err(self.unexpected("';'"))
        }
    }

    // ── Programs ─────────────────────────────────────────────

    /// Parse the whole input as one expression. Empty input evaluates to 0.
    pub fn parse_expression_program(&mut self) -> Result<Program, ParseError> {
        while self.eat(&Token::Semicolon) {}
        if self.is_at_end() {
            return Ok(Program::Expression(Expr::new(ExprKind::Number(0.0), self.span())));
        }
        let expr = self.parse_sequence()?;
        while self.eat(&Token::Semicolon) {}
        if !self.is_at_end() {
            return Err(self.unexpected("end of expression"));
        }
        Ok(Program::Expression(expr))
    }

    /// Parse the whole input as a function body.
    pub fn parse_body_program(&mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }
        Ok(Program::Body(statements))
    }

    // ── Statements ───────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, ParseError> {
        let start = self.span().start;
        let kind = match self.peek() {
            Token::Semicolon => {
                self.advance();
                StmtKind::Empty
            }
            Token::LBrace => StmtKind::Block(self.parse_block()?),
            Token::Let | Token::Const | Token::Var => {
                let kind = self.parse_declaration()?;
                self.expect_terminator()?;
                kind
            }
            Token::Function if matches!(self.peek_at(1), Token::Ident(_)) => {
                StmtKind::FunctionDecl(Box::new(self.parse_function_expr()?))
            }
            Token::Return => {
                self.advance();
                let value = if self.check(&Token::Semicolon)
                    || self.check(&Token::RBrace)
                    || self.is_at_end()
                    || self.newline_before()
                {
                    None
                } else {
                    Some(self.parse_sequence()?)
                };
                self.expect_terminator()?;
                StmtKind::Return(value)
            }
            Token::If => {
                self.advance();
                self.expect(&Token::LParen)?;
                let test = self.parse_sequence()?;
                self.expect(&Token::RParen)?;
                let then = Box::new(self.parse_statement()?);
                let otherwise = if self.eat(&Token::Else) {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                StmtKind::If { test, then, otherwise }
            }
            Token::While => {
                self.advance();
                self.expect(&Token::LParen)?;
                let test = self.parse_sequence()?;
                self.expect(&Token::RParen)?;
                let body = Box::new(self.parse_statement()?);
                StmtKind::While { test, body }
            }
            Token::For => self.parse_for()?,
            Token::Break => {
                self.advance();
                self.expect_terminator()?;
                StmtKind::Break
            }
            Token::Continue => {
                self.advance();
                self.expect_terminator()?;
                StmtKind::Continue
            }
            _ => {
                let expr = self.parse_sequence()?;
                self.expect_terminator()?;
                StmtKind::Expr(expr)
            }
        };
        let stmt = Stmt::new(kind, self.since(start));
        if stmt.depth > MAX_DEPTH {
            return Err(ParseError::TooDeep { span: stmt.span });
        }
        Ok(stmt)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.is_at_end() {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.parse_statement()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    fn parse_declaration(&mut self) -> Result<StmtKind, ParseError> {
        let kind = match self.advance() {
            Token::Let => DeclKind::Let,
            Token::Const => DeclKind::Const,
            _ => DeclKind::Var,
        };
        let mut bindings = Vec::new();
        loop {
            let start = self.span().start;
            let name = self.expect_ident()?;
            let init = if self.eat(&Token::Eq) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            bindings.push(Binding {
                name,
                init,
                span: self.since(start),
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(StmtKind::Declare { kind, bindings })
    }

    fn parse_for(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(&Token::For)?;
        self.expect(&Token::LParen)?;
        let init = if self.check(&Token::Semicolon) {
            None
        } else {
            let start = self.span().start;
            let kind = if matches!(self.peek(), Token::Let | Token::Const | Token::Var) {
                self.parse_declaration()?
            } else {
                StmtKind::Expr(self.parse_sequence()?)
            };
            Some(Box::new(Stmt::new(kind, self.since(start))))
        };
        self.expect(&Token::Semicolon)?;
        let test = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_sequence()?)
        };
        self.expect(&Token::Semicolon)?;
        let update = if self.check(&Token::RParen) {
            None
        } else {
            Some(self.parse_sequence()?)
        };
        self.expect(&Token::RParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    // ── Expressions ──────────────────────────────────────────

    fn parse_sequence(&mut self) -> Result<Expr, ParseError> {
        let start = self.span().start;
        let first = self.parse_assignment()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            items.push(self.parse_assignment()?);
        }
        self.build(ExprKind::Sequence(items), start)
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, ParseError> {
        if self.is_arrow_ahead() {
            return self.parse_arrow_function();
        }
        let start = self.span().start;
        let target = self.parse_conditional()?;
        let op = match self.peek() {
            Token::Eq => None,
            Token::OpAssign(inner) => match compound_op(&inner) {
                Some(op) => Some(op),
                None => return Err(self.unexpected("assignment operator")),
            },
            _ => return Ok(target),
        };
        if !target.is_assignable() {
            return Err(ParseError::InvalidAssignmentTarget { span: target.span });
        }
        self.advance();
        let value = self.parse_assignment()?;
        self.build(
            ExprKind::Assign {
                target: Box::new(target),
                op,
                value: Box::new(value),
            },
            start,
        )
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let start = self.span().start;
        let test = self.parse_binary(0)?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let then = self.parse_assignment()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.parse_assignment()?;
        self.build(
            ExprKind::Conditional {
                test: Box::new(test),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            start,
        )
    }

    fn parse_binary(&mut self, level: usize) -> Result<Expr, ParseError> {
        if level == BINARY_LEVELS {
            return self.parse_unary();
        }
        let start = self.span().start;
        let mut left = self.parse_binary(level + 1)?;
        while let Some(op) = infix_op(level, &self.peek()) {
            self.advance();
            let right = Box::new(self.parse_binary(level + 1)?);
            let left_box = Box::new(left);
            let kind = match op {
                InfixOp::Binary(op) => ExprKind::Binary {
                    op,
                    left: left_box,
                    right,
                },
                InfixOp::Logical(op) => ExprKind::Logical {
                    op,
                    left: left_box,
                    right,
                },
            };
            left = self.build(kind, start)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let start = self.span().start;
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            Token::Bang => UnaryOp::Not,
            Token::Tilde => UnaryOp::BitNot,
            Token::PlusPlus | Token::MinusMinus => {
                let increment = self.advance() == Token::PlusPlus;
                let target = self.nested(Self::parse_unary)?;
                if !target.is_assignable() {
                    return Err(ParseError::InvalidAssignmentTarget { span: target.span });
                }
                return self.build(
                    ExprKind::Update {
                        target: Box::new(target),
                        increment,
                        prefix: true,
                    },
                    start,
                );
            }
            _ => return self.parse_exponent(),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        self.build(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            start,
        )
    }

    /// `**` binds tighter than unary minus on its left and is right-associative.
    fn parse_exponent(&mut self) -> Result<Expr, ParseError> {
        let start = self.span().start;
        let base = self.parse_postfix()?;
        if !self.eat(&Token::StarStar) {
            return Ok(base);
        }
        let exponent = self.nested(Self::parse_unary)?;
        self.build(
            ExprKind::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            },
            start,
        )
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let start = self.span().start;
        let expr = self.parse_call_member()?;
        if matches!(self.peek(), Token::PlusPlus | Token::MinusMinus) && !self.newline_before() {
            if !expr.is_assignable() {
                return Err(ParseError::InvalidAssignmentTarget { span: expr.span });
            }
            let increment = self.advance() == Token::PlusPlus;
            return self.build(
                ExprKind::Update {
                    target: Box::new(expr),
                    increment,
                    prefix: false,
                },
                start,
            );
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> Result<Expr, ParseError> {
        let start = self.span().start;
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::LParen => {
                    self.advance();
                    let args = self.parse_arguments()?;
                    expr = self.build(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        start,
                    )?;
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_sequence()?;
                    self.expect(&Token::RBracket)?;
                    expr = self.build(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        start,
                    )?;
                }
                Token::Dot => {
                    self.advance();
                    let property = self.expect_ident()?;
                    expr = self.build(
                        ExprKind::Member {
                            object: Box::new(expr),
                            property,
                        },
                        start,
                    )?;
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Arguments after an opening `(`, consuming the closing `)`.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        while !self.check(&Token::RParen) {
            args.push(self.parse_assignment()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let start = self.span().start;
        let kind = match self.peek() {
            Token::Number(n) => {
                self.advance();
                ExprKind::Number(n)
            }
            Token::StringLit(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            Token::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            Token::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            Token::Ident(name) => {
                self.advance();
                ExprKind::Ident(name)
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_sequence()?;
                self.expect(&Token::RParen)?;
                // Keep the inner node; parentheses only affect grouping.
                return self.build(inner.kind, start);
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.parse_assignment()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket)?;
                ExprKind::Array(items)
            }
            Token::Function => ExprKind::Function(Box::new(self.parse_function_expr()?)),
            _ => return Err(self.unexpected("expression")),
        };
        self.build(kind, start)
    }

    // ── Functions ────────────────────────────────────────────

    /// Looks past a parameter list for `=>`.
    fn is_arrow_ahead(&self) -> bool {
        match self.peek() {
            Token::Ident(_) => self.peek_at(1) == Token::Arrow,
            Token::LParen => {
                let mut depth = 0usize;
                let mut offset = 0;
                loop {
                    match self.peek_at(offset) {
                        Token::LParen => depth += 1,
                        Token::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                return self.peek_at(offset + 1) == Token::Arrow;
                            }
                        }
                        Token::EOF => return false,
                        _ => {}
                    }
                    offset += 1;
                }
            }
            _ => false,
        }
    }

    fn parse_arrow_function(&mut self) -> Result<Expr, ParseError> {
        let start = self.span().start;
        let params = if self.check(&Token::LParen) {
            self.advance();
            self.parse_params()?
        } else {
            vec![self.expect_ident()?]
        };
        self.expect(&Token::Arrow)?;
        let body = if self.check(&Token::LBrace) {
            FunctionBody::Block(self.parse_block()?)
        } else {
            FunctionBody::Expr(Box::new(self.parse_assignment()?))
        };
        let span = self.since(start);
        self.checked(Expr::new(
            ExprKind::Function(Box::new(FunctionDef {
                name: None,
                params,
                body,
                span,
            })),
            span,
        ))
    }

    fn parse_function_expr(&mut self) -> Result<FunctionDef, ParseError> {
        let start = self.span().start;
        self.expect(&Token::Function)?;
        let name = match self.peek() {
            Token::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ => None,
        };
        self.expect(&Token::LParen)?;
        let params = self.parse_params()?;
        let body = FunctionBody::Block(self.parse_block()?);
        Ok(FunctionDef {
            name,
            params,
            body,
            span: self.since(start),
        })
    }

    /// Parameter names after an opening `(`, consuming the closing `)`.
    fn parse_params(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            params.push(self.expect_ident()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(params)
    }
}
