use ember_ast::*;
use ember_lexer::{lex, Span, Token};
use smol_str::SmolStr;

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.span.start, self.span.end, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a whole source text into a fresh module.
pub fn parse(source: &str) -> (Module, Vec<ParseError>) {
    let mut module = Module::new();
    let (_, errors) = parse_into(&mut module, source);
    (module, errors)
}

/// Parse `source` and append its top-level forms to `module`. Returns the ids
/// of the forms that parsed cleanly, in order, together with any errors.
/// Forms that failed to parse are not appended.
pub fn parse_into(module: &mut Module, source: &str) -> (Vec<ExprId>, Vec<ParseError>) {
    let (tokens, lex_errors) = lex(source);
    let mut errors: Vec<ParseError> = lex_errors
        .into_iter()
        .map(|span| ParseError {
            message: "unexpected character".into(),
            span,
        })
        .collect();
    let mut parser = Parser::new(tokens, module);
    let forms = parser.parse_forms();
    errors.append(&mut parser.errors);
    (forms, errors)
}

struct Parser<'m> {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    module: &'m mut Module,
    errors: Vec<ParseError>,
}

impl<'m> Parser<'m> {
    fn new(tokens: Vec<(Token, Span)>, module: &'m mut Module) -> Self {
        Self {
            tokens,
            pos: 0,
            module,
            errors: Vec::new(),
        }
    }

    // ── Token helpers ─────────────────────────────────────────────

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .unwrap_or_else(|| {
                self.tokens
                    .last()
                    .map(|(_, s)| Span::new(s.end, s.end))
                    .unwrap_or(Span::new(0, 0))
            })
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            return self.peek_span();
        }
        self.tokens
            .get(self.pos - 1)
            .map(|(_, s)| *s)
            .unwrap_or_else(|| self.peek_span())
    }

    fn advance(&mut self) -> (Token, Span) {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        tok
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Option<Span> {
        if self.check(expected) {
            let (_, span) = self.advance();
            Some(span)
        } else {
            let span = self.peek_span();
            let found = self.describe_next();
            self.error(format!("expected '{}', found {}", expected, found), span);
            None
        }
    }

    fn expect_ident(&mut self) -> Option<(SmolStr, Span)> {
        if let Some(Token::Ident(_)) = self.peek() {
            let (tok, span) = self.advance();
            if let Token::Ident(s) = tok {
                return Some((s, span));
            }
        }
        let span = self.peek_span();
        let found = self.describe_next();
        self.error(format!("expected identifier, found {}", found), span);
        None
    }

    fn describe_next(&self) -> String {
        match self.peek() {
            Some(tok) => format!("'{}'", tok),
            None => "end of input".to_string(),
        }
    }

    fn error(&mut self, message: String, span: Span) {
        self.errors.push(ParseError { message, span });
    }

    /// Skip to just past the next `;` at depth 0, or to an unmatched `}`.
    fn synchronize(&mut self) {
        let mut depth = 0usize;
        while !self.at_end() {
            match self.peek() {
                Some(Token::LParen | Token::LBracket | Token::LBrace) => {
                    depth += 1;
                    self.advance();
                }
                Some(Token::RParen | Token::RBracket | Token::RBrace) => {
                    self.advance();
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    if depth == 0 && self.prev_token_is(&Token::RBrace) {
                        return;
                    }
                }
                Some(Token::Semicolon) if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn prev_token_is(&self, tok: &Token) -> bool {
        self.pos > 0 && self.tokens.get(self.pos - 1).map(|(t, _)| t) == Some(tok)
    }

    // ── Allocators ────────────────────────────────────────────────

    fn alloc_expr(&mut self, kind: ExprKind, span: Span) -> ExprId {
        self.module.exprs.alloc(Expr { kind, span })
    }

    fn alloc_type(&mut self, kind: TypeExprKind, span: Span) -> TypeExprId {
        self.module.type_exprs.alloc(TypeExpr { kind, span })
    }

    // ── Top level ─────────────────────────────────────────────────

    fn parse_forms(&mut self) -> Vec<ExprId> {
        let mut forms = Vec::new();
        while !self.at_end() {
            let errors_before = self.errors.len();
            match self.parse_statement() {
                Some(form) if self.errors.len() == errors_before => {
                    self.module.forms.push(form);
                    forms.push(form);
                }
                Some(_) => {}
                None => self.synchronize(),
            }
        }
        forms
    }

    // ── Statements ────────────────────────────────────────────────

    fn parse_statement(&mut self) -> Option<ExprId> {
        match self.peek() {
            Some(Token::Var) => self.parse_var_decl(),
            Some(Token::Fn) if matches!(self.peek_nth(1), Some(Token::Ident(_))) => {
                self.parse_fn_decl()
            }
            Some(Token::Datatype) => self.parse_datatype(),
            Some(Token::If) => self.parse_if_statement(),
            Some(Token::While) => self.parse_while(),
            Some(Token::LBrace) => self.parse_block(),
            Some(Token::Break) => {
                let (_, span) = self.advance();
                self.expect_terminator()?;
                Some(self.alloc_expr(ExprKind::Break, span))
            }
            Some(Token::Return) => {
                let (_, start) = self.advance();
                let value = if self.check(&Token::Semicolon) || self.at_end() {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                let end = self.prev_span();
                self.expect_terminator()?;
                Some(self.alloc_expr(ExprKind::Return(value), start.merge(end)))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect_terminator()?;
                Some(expr)
            }
        }
    }

    /// A `;`, which may be left off the last statement of the input.
    fn expect_terminator(&mut self) -> Option<()> {
        if self.eat(&Token::Semicolon) || self.at_end() {
            Some(())
        } else {
            self.expect(&Token::Semicolon).map(|_| ())
        }
    }

    fn parse_var_decl(&mut self) -> Option<ExprId> {
        let (_, start) = self.advance();
        let mut items = Vec::new();
        loop {
            let (name, name_span) = self.expect_ident()?;
            let target = self.alloc_expr(ExprKind::Binder(name), name_span);
            let init = if self.eat(&Token::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            let span = name_span.merge(self.prev_span());
            items.push(VarItem { target, init, span });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        let end = self.prev_span();
        self.expect_terminator()?;
        Some(self.alloc_expr(ExprKind::VarDecl(items), start.merge(end)))
    }

    fn parse_fn_decl(&mut self) -> Option<ExprId> {
        let (_, start) = self.advance();
        let (name, name_span) = self.expect_ident()?;
        let name = self.alloc_expr(ExprKind::Binder(name), name_span);
        let params = self.parse_params()?;
        let body = self.parse_body()?;
        let end = self.prev_span();
        self.eat(&Token::Semicolon);
        Some(self.alloc_expr(ExprKind::FnDecl { name, params, body }, start.merge(end)))
    }

    fn parse_params(&mut self) -> Option<Vec<ExprId>> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                // `return` is lexed as a keyword; keep it as a name so the
                // checker can report it properly.
                let (name, span) = if self.check(&Token::Return) {
                    let (_, span) = self.advance();
                    (SmolStr::new("return"), span)
                } else {
                    self.expect_ident()?
                };
                params.push(self.alloc_expr(ExprKind::Binder(name), span));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        Some(params)
    }

    fn parse_body(&mut self) -> Option<Vec<ExprId>> {
        self.expect(&Token::LBrace)?;
        let mut body = Vec::new();
        while !self.at_end() && !self.check(&Token::RBrace) {
            body.push(self.parse_statement()?);
        }
        self.expect(&Token::RBrace)?;
        Some(body)
    }

    fn parse_block(&mut self) -> Option<ExprId> {
        let start = self.peek_span();
        let stmts = self.parse_body()?;
        let end = self.prev_span();
        Some(self.alloc_expr(ExprKind::Block(stmts), start.merge(end)))
    }

    fn parse_datatype(&mut self) -> Option<ExprId> {
        let (_, start) = self.advance();
        let (name, name_span) = self.expect_ident()?;
        let name = self.alloc_expr(ExprKind::Binder(name), name_span);
        self.expect(&Token::LParen)?;
        let mut slots = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                let (slot_name, slot_span) = if self.check(&Token::Return) {
                    let (_, span) = self.advance();
                    (SmolStr::new("return"), span)
                } else {
                    self.expect_ident()?
                };
                self.expect(&Token::Colon)?;
                let type_ann = self.parse_type_expr()?;
                slots.push(SlotDecl {
                    name: slot_name,
                    name_span: slot_span,
                    type_ann,
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        let end = self.prev_span();
        self.expect_terminator()?;
        Some(self.alloc_expr(ExprKind::Datatype { name, slots }, start.merge(end)))
    }

    fn parse_if_statement(&mut self) -> Option<ExprId> {
        let (_, start) = self.advance();
        let cond = self.parse_condition()?;
        let then_branch = self.parse_statement()?;
        let else_branch = if self.eat(&Token::Else) {
            Some(self.parse_statement()?)
        } else {
            None
        };
        let end = self.prev_span();
        Some(self.alloc_expr(
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            },
            start.merge(end),
        ))
    }

    fn parse_while(&mut self) -> Option<ExprId> {
        let (_, start) = self.advance();
        let cond = self.parse_condition()?;
        let body = self.parse_statement()?;
        let end = self.prev_span();
        Some(self.alloc_expr(ExprKind::While { cond, body }, start.merge(end)))
    }

    fn parse_condition(&mut self) -> Option<ExprId> {
        self.expect(&Token::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        Some(cond)
    }

    // ── Expressions ───────────────────────────────────────────────

    fn parse_expr(&mut self) -> Option<ExprId> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Option<ExprId> {
        let target = self.parse_binary(0)?;
        let compound = match self.peek() {
            Some(Token::Assign) => None,
            Some(tok) => match compound_op(tok) {
                Some(op) => Some(op),
                None => return Some(target),
            },
            None => return Some(target),
        };
        let (_, op_span) = self.advance();
        self.make_assignable(target, op_span)?;
        let value = self.parse_assignment()?;
        let span = self.module.exprs[target]
            .span
            .merge(self.module.exprs[value].span);
        let kind = match compound {
            None => ExprKind::Assign { target, value },
            Some(op) => ExprKind::CompoundAssign { op, target, value },
        };
        Some(self.alloc_expr(kind, span))
    }

    /// Turn a parsed expression into an assignment target. Identifiers become
    /// `LValue` nodes; slot and index accesses are kept as they are.
    fn make_assignable(&mut self, target: ExprId, op_span: Span) -> Option<()> {
        let expr = &self.module.exprs[target];
        match &expr.kind {
            ExprKind::Ident(name) => {
                let kind = ExprKind::LValue(name.clone());
                self.module.exprs[target].kind = kind;
                Some(())
            }
            ExprKind::Slot { .. } | ExprKind::Index { .. } => Some(()),
            _ => {
                let span = expr.span.merge(op_span);
                self.error("invalid assignment target".into(), span);
                None
            }
        }
    }

    fn parse_binary(&mut self, min_prec: u8) -> Option<ExprId> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = self.peek().and_then(binary_op) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(prec + 1)?;
            let span = self.module.exprs[lhs].span.merge(self.module.exprs[rhs].span);
            lhs = self.alloc_expr(ExprKind::Binary { op, lhs, rhs }, span);
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<ExprId> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Tilde) => UnaryOp::BitNot,
            _ => return self.parse_postfix(),
        };
        let (_, start) = self.advance();
        let operand = self.parse_unary()?;
        let span = start.merge(self.module.exprs[operand].span);
        Some(self.alloc_expr(ExprKind::Unary { op, operand }, span))
    }

    fn parse_postfix(&mut self) -> Option<ExprId> {
        let mut expr = self.parse_primary()?;
        loop {
            let start = self.module.exprs[expr].span;
            match self.peek() {
                Some(Token::LParen) => {
                    self.advance();
                    let args = self.parse_expr_list(&Token::RParen)?;
                    let end = self.prev_span();
                    expr = self.alloc_expr(ExprKind::Call { callee: expr, args }, start.merge(end));
                }
                Some(Token::Dot) => {
                    self.advance();
                    let (slot, end) = self.expect_ident()?;
                    expr = self.alloc_expr(ExprKind::Slot { target: expr, slot }, start.merge(end));
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    let end = self.expect(&Token::RBracket)?;
                    expr = self.alloc_expr(ExprKind::Index { target: expr, index }, start.merge(end));
                }
                Some(Token::PlusPlus | Token::MinusMinus) => {
                    let (tok, op_span) = self.advance();
                    let op = if tok == Token::PlusPlus {
                        PostfixOp::Inc
                    } else {
                        PostfixOp::Dec
                    };
                    self.make_assignable(expr, op_span)?;
                    expr = self.alloc_expr(ExprKind::Postfix { op, target: expr }, start.merge(op_span));
                }
                _ => break,
            }
        }
        Some(expr)
    }

    /// Comma separated expressions up to and including `close`.
    fn parse_expr_list(&mut self, close: &Token) -> Option<Vec<ExprId>> {
        let mut items = Vec::new();
        if !self.check(close) {
            loop {
                items.push(self.parse_expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(close)?;
        Some(items)
    }

    fn parse_primary(&mut self) -> Option<ExprId> {
        let span = self.peek_span();
        let lit = match self.peek() {
            Some(Token::Int(s)) => Some(Literal::Int(s.clone())),
            Some(Token::Double(s)) => Some(Literal::Double(s.clone())),
            Some(Token::Str(s)) => Some(Literal::Str(s.clone())),
            Some(Token::Char(s)) => Some(Literal::Char(s.clone())),
            Some(Token::True) => Some(Literal::Bool(true)),
            Some(Token::False) => Some(Literal::Bool(false)),
            Some(Token::Nil) => Some(Literal::Nil),
            _ => None,
        };
        if let Some(lit) = lit {
            self.advance();
            return Some(self.alloc_expr(ExprKind::Lit(lit), span));
        }

        match self.peek() {
            Some(Token::Ident(_)) => {
                let (name, span) = self.expect_ident()?;
                Some(self.alloc_expr(ExprKind::Ident(name), span))
            }
            Some(Token::LParen) => {
                self.advance();
                if self.eat(&Token::RParen) {
                    let end = self.prev_span();
                    return Some(self.alloc_expr(ExprKind::Tuple(Vec::new()), span.merge(end)));
                }
                let first = self.parse_expr()?;
                if self.eat(&Token::RParen) {
                    return Some(first);
                }
                self.expect(&Token::Comma)?;
                let mut elems = vec![first];
                elems.extend(self.parse_expr_list(&Token::RParen)?);
                let end = self.prev_span();
                Some(self.alloc_expr(ExprKind::Tuple(elems), span.merge(end)))
            }
            Some(Token::LBracket) => {
                self.advance();
                let elems = self.parse_expr_list(&Token::RBracket)?;
                let end = self.prev_span();
                Some(self.alloc_expr(ExprKind::Array(elems), span.merge(end)))
            }
            Some(Token::LBrace) => self.parse_record_literal(),
            Some(Token::Fn) => {
                self.advance();
                let params = self.parse_params()?;
                let body = self.parse_body()?;
                let end = self.prev_span();
                Some(self.alloc_expr(ExprKind::Lambda { params, body }, span.merge(end)))
            }
            Some(Token::If) => {
                self.advance();
                let cond = self.parse_condition()?;
                let then_branch = self.parse_expr()?;
                self.expect(&Token::Else)?;
                let else_branch = self.parse_expr()?;
                let end = self.prev_span();
                Some(self.alloc_expr(
                    ExprKind::IfExpr {
                        cond,
                        then_branch,
                        else_branch,
                    },
                    span.merge(end),
                ))
            }
            _ => {
                let found = self.describe_next();
                self.error(format!("expected expression, found {}", found), span);
                None
            }
        }
    }

    fn parse_record_literal(&mut self) -> Option<ExprId> {
        let (_, start) = self.advance();
        let mut fields = Vec::new();
        if !self.check(&Token::RBrace) {
            loop {
                let (name, name_span) = self.expect_ident()?;
                self.expect(&Token::Colon)?;
                let value = self.parse_expr()?;
                fields.push(RecordField {
                    name,
                    name_span,
                    value,
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        let end = self.expect(&Token::RBrace)?;
        Some(self.alloc_expr(ExprKind::Record(fields), start.merge(end)))
    }

    // ── Type expressions ──────────────────────────────────────────

    fn parse_type_expr(&mut self) -> Option<TypeExprId> {
        let start = self.peek_span();
        match self.peek() {
            Some(Token::Ident(_)) => {
                let (name, span) = self.expect_ident()?;
                Some(self.alloc_type(TypeExprKind::Named(name), span))
            }
            // `nil` is a keyword but also names the unit type.
            Some(Token::Nil) => {
                let (_, span) = self.advance();
                Some(self.alloc_type(TypeExprKind::Named(SmolStr::new("nil")), span))
            }
            Some(Token::LBracket) => {
                self.advance();
                let elem = self.parse_type_expr()?;
                let end = self.expect(&Token::RBracket)?;
                Some(self.alloc_type(TypeExprKind::Array(elem), start.merge(end)))
            }
            Some(Token::LParen) => {
                self.advance();
                let mut elems = Vec::new();
                if !self.check(&Token::RParen) {
                    loop {
                        elems.push(self.parse_type_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                let end = self.expect(&Token::RParen)?;
                if elems.len() == 1 {
                    return Some(elems[0]);
                }
                Some(self.alloc_type(TypeExprKind::Tuple(elems), start.merge(end)))
            }
            _ => {
                let found = self.describe_next();
                self.error(format!("expected type, found {}", found), start);
                None
            }
        }
    }
}

/// Binary operators with C precedence; higher binds tighter.
fn binary_op(tok: &Token) -> Option<(BinOp, u8)> {
    let entry = match tok {
        Token::OrOr => (BinOp::Or, 1),
        Token::AndAnd => (BinOp::And, 2),
        Token::Pipe => (BinOp::BitOr, 3),
        Token::Caret => (BinOp::BitXor, 4),
        Token::Amp => (BinOp::BitAnd, 5),
        Token::EqEq => (BinOp::Eq, 6),
        Token::NotEq => (BinOp::Ne, 6),
        Token::Lt => (BinOp::Lt, 7),
        Token::Gt => (BinOp::Gt, 7),
        Token::Le => (BinOp::Le, 7),
        Token::Ge => (BinOp::Ge, 7),
        Token::Shl => (BinOp::Shl, 8),
        Token::Shr => (BinOp::Shr, 8),
        Token::Plus => (BinOp::Add, 9),
        Token::Minus => (BinOp::Sub, 9),
        Token::Star => (BinOp::Mul, 10),
        Token::Slash => (BinOp::Div, 10),
        Token::Percent => (BinOp::Rem, 10),
        _ => return None,
    };
    Some(entry)
}

fn compound_op(tok: &Token) -> Option<BinOp> {
    let op = match tok {
        Token::PlusAssign => BinOp::Add,
        Token::MinusAssign => BinOp::Sub,
        Token::StarAssign => BinOp::Mul,
        Token::SlashAssign => BinOp::Div,
        Token::PercentAssign => BinOp::Rem,
        Token::AmpAssign => BinOp::BitAnd,
        Token::PipeAssign => BinOp::BitOr,
        Token::CaretAssign => BinOp::BitXor,
        Token::ShlAssign => BinOp::Shl,
        Token::ShrAssign => BinOp::Shr,
        _ => return None,
    };
    Some(op)
}
