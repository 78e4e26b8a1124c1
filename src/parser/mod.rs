//! Single-pass compiler: statements go straight to bytecode, expressions go
//! through a small AST first (see `expr` and `emit`).

use std::collections::HashSet;

use crate::ast::{Span, Spanned, Expr};
use crate::bytecode::*;
use crate::context::{Context, SCRIPT_ENTRY};
use crate::cycler::Cycler;
use crate::lexer::{LexError, Lexeme, Scanner, Token};
use crate::object::{ClassObj, MAX_CONSTRUCTORS, ObjRef, Object, Value};
use crate::scope::{FunctionKind, Scope, ScopeError, write_pops};
use crate::table::Table;

mod emit;
mod expr;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("Syntax error at line {line}: {message}")]
    Syntax { line: u32, span: Span, message: String },
    #[error("FATAL: {0}")]
    Fatal(String),
}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        match e {
            LexError::Syntax { line, span, message } => CompileError::Syntax { line, span, message },
            LexError::Fatal(message) => CompileError::Fatal(message),
        }
    }
}

impl From<PatchError> for CompileError {
    fn from(e: PatchError) -> Self {
        CompileError::Fatal(e.to_string())
    }
}

type Result<T> = std::result::Result<T, CompileError>;

/// Compiles a whole program into one chunk.
///
/// Top-level statements become the body of the `<script>` function at offset
/// 0. If the program defines `main`, the script calls it last.
pub fn compile(source: &str, ctx: &mut Context) -> Result<Chunk> {
    let mut compiler = Compiler::new(source, ctx);
    compiler.program()?;
    let chunk = compiler.chunk;
    tracing::debug!(code = chunk.len(), constants = chunk.data.len(), "compiled");
    Ok(chunk)
}

pub struct Compiler<'src, 'ctx> {
    scanner: Scanner<'src>,
    ctx: &'ctx mut Context,
    chunk: Chunk,
    scope: Scope,
    cycler: Cycler,
    /// Names bound by a top-level `var`.
    declared_globals: HashSet<ObjRef>,
}

impl<'src, 'ctx> Compiler<'src, 'ctx> {
    pub fn new(source: &'src str, ctx: &'ctx mut Context) -> Self {
        Compiler {
            scanner: Scanner::new(source),
            ctx,
            chunk: Chunk::new(),
            scope: Scope::new(),
            cycler: Cycler::new(),
            declared_globals: HashSet::new(),
        }
    }

    // ---- Token helpers ----

    fn next(&mut self) -> Result<Option<Lexeme>> {
        Ok(self.scanner.next_token(self.ctx)?)
    }

    fn peek(&mut self) -> Result<Option<Lexeme>> {
        let lexeme = self.scanner.next_token(self.ctx)?;
        self.scanner.putback_token()?;
        Ok(lexeme)
    }

    fn peek_token(&mut self) -> Result<Option<Token>> {
        Ok(self.peek()?.map(|l| l.token))
    }

    fn check(&mut self, token: Token) -> Result<bool> {
        Ok(self.peek_token()? == Some(token))
    }

    fn advance(&mut self) -> Result<Lexeme> {
        match self.next()? {
            Some(l) => Ok(l),
            None => Err(self.error_eof("Unexpected end of input")),
        }
    }

    /// Consumes `token` if it is next.
    fn eat(&mut self, token: Token) -> Result<bool> {
        if self.check(token)? {
            self.advance()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect(&mut self, token: Token, context: &str) -> Result<Lexeme> {
        let wanted = token.describe(self.ctx);
        match self.next()? {
            Some(l) if l.token == token => Ok(l),
            Some(l) => {
                let found = l.token.describe(self.ctx);
                Err(self.error(l, format!("Expected {wanted} {context}, found {found}")))
            }
            None => Err(self.error_eof(format!("Expected {wanted} {context}, found end of input"))),
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<(ObjRef, Lexeme)> {
        match self.next()? {
            Some(l) => match l.token {
                Token::Ident(id) => Ok((id, l)),
                other => {
                    let found = other.describe(self.ctx);
                    Err(self.error(l, format!("Expected identifier {context}, found {found}")))
                }
            },
            None => Err(self.error_eof(format!("Expected identifier {context}, found end of input"))),
        }
    }

    // ---- Errors ----

    fn error(&self, at: Lexeme, message: impl Into<String>) -> CompileError {
        CompileError::Syntax { line: at.line, span: at.span, message: message.into() }
    }

    fn error_span(&self, span: Span, message: impl Into<String>) -> CompileError {
        CompileError::Syntax { line: self.line_of(span), span, message: message.into() }
    }

    fn error_eof(&self, message: impl Into<String>) -> CompileError {
        let end = self.scanner.source().len();
        CompileError::Syntax {
            line: self.scanner.line(),
            span: Span { start: end, end },
            message: message.into(),
        }
    }

    fn scope_error(&self, e: ScopeError, span: Span) -> CompileError {
        self.error_span(span, e.to_string())
    }

    fn line_of(&self, span: Span) -> u32 {
        self.scanner.source_map().line(span.start) as u32
    }

    fn name(&self, id: ObjRef) -> String {
        self.ctx.name(id).to_string()
    }

    fn patch(&mut self, offset: usize) -> Result<()> {
        Ok(self.chunk.patch_jump(offset)?)
    }

    // ---- Program ----

    fn program(&mut self) -> Result<()> {
        let script_id = self.ctx.intern_identifier(SCRIPT_ENTRY);
        let script = self.ctx.new_function(script_id, 0);
        if let Some(f) = self.ctx.heap.function_mut(script) {
            f.entry = Some(0);
        }
        self.ctx.set_global(script_id, Value::Obj(script));

        self.chunk.write_simple_op(OP_PUSH_BP, 1);
        self.chunk.write_simple_op(OP_BP_AS_SP, 1);

        while self.peek()?.is_some() {
            self.declaration()?;
        }

        let line = self.scanner.line();
        self.call_main(line)?;
        self.chunk.write_simple_op(OP_NULL, line);
        self.chunk.write_simple_op(OP_RETURN, line);
        Ok(())
    }

    fn call_main(&mut self, line: u32) -> Result<()> {
        let main_id = self.ctx.intern_identifier("main");
        let Some(Value::Obj(main)) = self.ctx.global(main_id) else {
            return Ok(());
        };
        let Some(f) = self.ctx.heap.function(main) else {
            return Ok(());
        };
        let end = self.scanner.source().len();
        let at = Span { start: end, end };
        if f.arity != 0 {
            return Err(self.error_span(at, "'main' must not take arguments"));
        }
        if f.entry.is_none() {
            return Err(self.error_span(at, "'main' is declared but never defined"));
        }
        self.chunk.write_op_value(OP_CALL, Value::Obj(main), line);
        self.chunk.write_simple_op(OP_POP, line);
        Ok(())
    }

    // ---- Declarations ----

    fn declaration(&mut self) -> Result<()> {
        match self.peek_token()? {
            Some(Token::Var) => self.var_declaration(),
            Some(Token::Func) => self.function_declaration(),
            Some(Token::Class) => self.class_declaration(),
            _ => self.statement(),
        }
    }

    fn top_level_only(&self, at: Lexeme, what: &str) -> Result<()> {
        if self.scope.depth() > 0 || self.scope.in_function() {
            return Err(self.error(at, format!("{what} can only be declared at the top level")));
        }
        Ok(())
    }

    /// Rejects a new global binding for a name that already has one.
    fn check_unbound(&self, id: ObjRef, at: Lexeme) -> Result<()> {
        if self.declared_globals.contains(&id) || self.ctx.is_bound(id) {
            return Err(self.error(at, format!("'{}' has already been defined", self.name(id))));
        }
        Ok(())
    }

    fn var_declaration(&mut self) -> Result<()> {
        self.advance()?;
        let (id, at) = self.expect_ident("after 'var'")?;

        if self.scope.depth() == 0 {
            self.check_unbound(id, at)?;
            self.declared_globals.insert(id);
            self.var_initializer(at)?;
            self.chunk.write_op_value(OP_DEFINE_GLOBAL, Value::Obj(id), at.line);
            return Ok(());
        }

        let declared = self.scope.declare_variable(id).map_err(|e| self.scope_error(e, at.span))?;
        if !declared {
            return Err(self.error(at, format!("Variable '{}' already declared in this scope", self.name(id))));
        }
        self.var_initializer(at)?;
        self.scope.define_variable();
        Ok(())
    }

    /// `= expr;` or `;`, leaving the value on the stack.
    fn var_initializer(&mut self, at: Lexeme) -> Result<()> {
        if self.eat(Token::Assign)? {
            let value = self.expression()?;
            self.expect(Token::Semicolon, "after variable declaration")?;
            self.emit_expr(&value)
        } else {
            self.expect(Token::Semicolon, "after variable declaration")?;
            self.chunk.write_simple_op(OP_NULL, at.line);
            Ok(())
        }
    }

    fn parameters(&mut self) -> Result<Vec<(ObjRef, Lexeme)>> {
        self.expect(Token::LParen, "before parameters")?;
        let mut params: Vec<(ObjRef, Lexeme)> = Vec::new();
        if !self.eat(Token::RParen)? {
            loop {
                let (id, at) = self.expect_ident("in parameter list")?;
                if params.iter().any(|(p, _)| *p == id) {
                    return Err(self.error(at, format!("Duplicate argument '{}'", self.name(id))));
                }
                params.push((id, at));
                if !self.eat(Token::Comma)? {
                    break;
                }
            }
            self.expect(Token::RParen, "after parameters")?;
        }
        Ok(params)
    }

    fn function_declaration(&mut self) -> Result<()> {
        let func = self.advance()?;
        self.top_level_only(func, "Functions")?;
        let (id, at) = self.expect_ident("after 'func'")?;
        let params = self.parameters()?;
        let is_declaration = self.eat(Token::Semicolon)?;

        let function = match self.ctx.global(id) {
            Some(Value::Obj(r)) if self.ctx.heap.native(r).is_some() => {
                return Err(self.error(at, format!("Cannot redefine native function '{}'", self.name(id))));
            }
            Some(Value::Obj(r)) if self.ctx.heap.function(r).is_some() => {
                let (arity, defined) = match self.ctx.heap.function(r) {
                    Some(f) => (f.arity, f.entry.is_some()),
                    None => (0, false),
                };
                if is_declaration || defined {
                    return Err(self.error(at, format!("'{}' function redefinition", self.name(id))));
                }
                if arity != params.len() {
                    return Err(self.error(
                        at,
                        format!("Conflicting with a declaration of '{}' function", self.name(id)),
                    ));
                }
                r
            }
            _ => {
                self.check_unbound(id, at)?;
                let r = self.ctx.new_function(id, params.len());
                self.ctx.set_global(id, Value::Obj(r));
                r
            }
        };
        if is_declaration {
            return Ok(());
        }

        self.function_body(function, FunctionKind::Function, &params, None, func.line)
    }

    /// Emits a body guarded by a jump over it and records its entry offset.
    fn function_body(
        &mut self,
        function: ObjRef,
        kind: FunctionKind,
        params: &[(ObjRef, Lexeme)],
        class: Option<ObjRef>,
        line: u32,
    ) -> Result<()> {
        let skip = self.chunk.write_jump(OP_JUMP, line);
        let entry = self.chunk.len();
        if let Some(f) = self.ctx.heap.function_mut(function) {
            f.entry = Some(entry);
        }

        self.scope.begin_function(kind);
        if kind == FunctionKind::Method {
            let this = self.ctx.this_id;
            self.scope.declare_argument(this).map_err(|e| self.scope_error(e, Span::UNKNOWN))?;
        }
        for &(param, at) in params {
            let declared = self.scope.declare_argument(param).map_err(|e| self.scope_error(e, at.span))?;
            if !declared {
                return Err(self.error(at, format!("Duplicate argument '{}'", self.name(param))));
            }
        }
        self.chunk.write_simple_op(OP_PUSH_BP, line);
        self.chunk.write_simple_op(OP_BP_AS_SP, line);
        if let (FunctionKind::Constructor, Some(class)) = (kind, class) {
            let ctx = &*self.ctx;
            self.scope
                .add_instance_data(ctx, &mut self.chunk, class, line)
                .map_err(|e| CompileError::Fatal(e.to_string()))?;
        }

        self.expect(Token::LBrace, "before function body")?;
        while !self.check(Token::RBrace)? {
            if self.peek()?.is_none() {
                return Err(self.error_eof("Expected '}' after function body, found end of input"));
            }
            self.declaration()?;
        }
        let close = self.advance()?;
        self.write_implicit_return(close.line);
        self.scope.end_function();
        self.patch(skip)
    }

    fn write_implicit_return(&mut self, line: u32) {
        if self.scope.kind() == FunctionKind::Constructor {
            self.chunk.write_op(OP_GET_LOCAL, 0, line);
        } else {
            self.chunk.write_simple_op(OP_NULL, line);
        }
        self.chunk.write_simple_op(OP_RETURN, line);
    }

    // ---- Classes ----

    fn class_declaration(&mut self) -> Result<()> {
        let kw = self.advance()?;
        self.top_level_only(kw, "Classes")?;
        let (name, at) = self.expect_ident("after 'class'")?;
        self.check_unbound(name, at)?;

        let class = self.ctx.heap.alloc(Object::Class(ClassObj {
            name,
            fields: Table::new(),
            methods: Table::new(),
            constructors: Vec::new(),
            default_constructor: None,
        }));
        self.ctx.set_global(name, Value::Obj(class));
        self.scope.set_class(Some(class));

        self.expect(Token::LBrace, "before class body")?;
        loop {
            let Some(member) = self.peek()? else {
                return Err(self.error_eof("Expected '}' after class body, found end of input"));
            };
            match member.token {
                Token::RBrace => break,
                Token::Field => self.field_declaration(class)?,
                Token::Meth => self.method_declaration(class)?,
                Token::Ident(id) if id == name => self.constructor_declaration(class, name)?,
                other => {
                    let found = other.describe(self.ctx);
                    return Err(self.error(
                        member,
                        format!("Expected 'field', 'meth' or constructor in class body, found {found}"),
                    ));
                }
            }
        }
        let close = self.advance()?;

        let has_default = self.ctx.heap.class(class).is_some_and(|c| c.default_constructor.is_some());
        if !has_default {
            self.synthesize_default_constructor(class, name, close.line)?;
        }
        self.scope.set_class(None);
        Ok(())
    }

    fn field_declaration(&mut self, class: ObjRef) -> Result<()> {
        self.advance()?;
        loop {
            let (id, at) = self.expect_ident("after 'field'")?;
            let hash = self.ctx.heap.hash_of(id);
            if self.ctx.heap.class(class).is_some_and(|c| c.fields.contains(id, hash)) {
                let class_name = self.class_name(class);
                return Err(self.error(
                    at,
                    format!("Field '{}' already declared in class '{class_name}'", self.name(id)),
                ));
            }
            let Some(c) = self.ctx.heap.class_mut(class) else {
                return Err(CompileError::Fatal("class vanished during compilation".into()));
            };
            let offset = c.fields.len() as i64;
            c.fields.set(id, hash, Value::Number(offset));
            if !self.eat(Token::Comma)? {
                break;
            }
        }
        self.expect(Token::Semicolon, "after field declaration")?;
        Ok(())
    }

    fn method_declaration(&mut self, class: ObjRef) -> Result<()> {
        let meth = self.advance()?;
        let (id, at) = self.expect_ident("after 'meth'")?;
        let hash = self.ctx.heap.hash_of(id);
        let params = self.parameters()?;

        let exists = self.ctx.heap.class(class).is_some_and(|c| c.methods.contains(id, hash));
        if exists {
            let class_name = self.class_name(class);
            return Err(self.error(
                at,
                format!("Method '{}' already defined in class '{class_name}'", self.name(id)),
            ));
        }
        // the receiver is the implicit first argument
        let function = self.ctx.new_function(id, params.len() + 1);
        if let Some(c) = self.ctx.heap.class_mut(class) {
            c.methods.set(id, hash, Value::Obj(function));
        }
        self.function_body(function, FunctionKind::Method, &params, Some(class), meth.line)
    }

    fn constructor_declaration(&mut self, class: ObjRef, name: ObjRef) -> Result<()> {
        let at = self.advance()?;
        let params = self.parameters()?;
        let argc = params.len();
        let class_name = self.name(name);

        let Some(c) = self.ctx.heap.class(class) else {
            return Err(CompileError::Fatal("class vanished during compilation".into()));
        };
        let duplicate = if argc == 0 {
            c.default_constructor.is_some()
        } else {
            c.constructors
                .iter()
                .any(|&k| self.ctx.heap.function(k).is_some_and(|f| f.arity == argc))
        };
        if duplicate {
            return Err(self.error(
                at,
                format!("Constructor of '{class_name}' with {argc} arguments already defined"),
            ));
        }
        if argc > 0 && c.constructors.len() >= MAX_CONSTRUCTORS {
            return Err(self.error(at, format!("Too many constructors in class '{class_name}'")));
        }

        let function = self.ctx.new_function(name, argc);
        if let Some(c) = self.ctx.heap.class_mut(class) {
            if argc == 0 {
                c.default_constructor = Some(function);
            } else {
                c.constructors.push(function);
            }
        }
        self.function_body(function, FunctionKind::Constructor, &params, Some(class), at.line)
    }

    fn synthesize_default_constructor(&mut self, class: ObjRef, name: ObjRef, line: u32) -> Result<()> {
        let function = self.ctx.new_function(name, 0);
        let skip = self.chunk.write_jump(OP_JUMP, line);
        let entry = self.chunk.len();
        self.chunk.write_simple_op(OP_PUSH_BP, line);
        self.chunk.write_simple_op(OP_BP_AS_SP, line);
        self.chunk.write_op_value(OP_INSTANCE, Value::Obj(class), line);
        self.chunk.write_simple_op(OP_RETURN, line);
        self.patch(skip)?;
        if let Some(f) = self.ctx.heap.function_mut(function) {
            f.entry = Some(entry);
        }
        if let Some(c) = self.ctx.heap.class_mut(class) {
            c.default_constructor = Some(function);
        }
        Ok(())
    }

    fn class_name(&self, class: ObjRef) -> String {
        match self.ctx.heap.class(class) {
            Some(c) => self.name(c.name),
            None => String::new(),
        }
    }

    // ---- Statements ----

    fn statement(&mut self) -> Result<()> {
        let Some(first) = self.peek()? else {
            return Err(self.error_eof("Expected statement, found end of input"));
        };
        match first.token {
            Token::LBrace => self.block(),
            Token::RBrace => {
                self.advance()?;
                Err(self.scope_error(ScopeError::ExtraneousBrace, first.span))
            }
            Token::If => self.if_statement(),
            Token::While => self.while_statement(),
            Token::For => self.for_statement(),
            Token::Break => self.break_statement(),
            Token::Continue => self.continue_statement(),
            Token::Return => self.return_statement(),
            Token::Semicolon => {
                self.advance()?;
                Ok(())
            }
            Token::Var | Token::Func | Token::Class => {
                let found = first.token.describe(self.ctx);
                Err(self.error(first, format!("Expected statement, found {found}")))
            }
            _ => self.expression_statement(),
        }
    }

    fn block(&mut self) -> Result<()> {
        self.expect(Token::LBrace, "to open a block")?;
        self.scope.begin_scope();
        while !self.check(Token::RBrace)? {
            if self.peek()?.is_none() {
                return Err(self.error_eof("Expected '}' after block, found end of input"));
            }
            self.declaration()?;
        }
        let close = self.advance()?;
        self.scope.end_scope(&mut self.chunk, close.line).map_err(|e| self.scope_error(e, close.span))
    }

    /// A loop or branch body gets a scope of its own.
    fn scoped_statement(&mut self) -> Result<()> {
        self.scope.begin_scope();
        self.statement()?;
        let line = self.scanner.line();
        self.scope.end_scope(&mut self.chunk, line).map_err(|e| self.scope_error(e, Span::UNKNOWN))
    }

    fn expression_statement(&mut self) -> Result<()> {
        let expr = self.expression()?;
        let semi = self.expect(Token::Semicolon, "after expression")?;
        self.emit_expr(&expr)?;
        self.chunk.write_simple_op(OP_POP, semi.line);
        Ok(())
    }

    fn condition(&mut self, keyword: &str) -> Result<Spanned<Expr>> {
        self.expect(Token::LParen, &format!("after '{keyword}'"))?;
        let cond = self.expression()?;
        self.expect(Token::RParen, "after condition")?;
        Ok(cond)
    }

    fn if_statement(&mut self) -> Result<()> {
        let kw = self.advance()?;
        let cond = self.condition("if")?;
        self.emit_expr(&cond)?;
        let else_jump = self.chunk.write_jump(OP_FJUMP, kw.line);
        self.scoped_statement()?;

        if self.check(Token::Else)? {
            let else_kw = self.advance()?;
            let end_jump = self.chunk.write_jump(OP_JUMP, else_kw.line);
            self.patch(else_jump)?;
            self.scoped_statement()?;
            self.patch(end_jump)
        } else {
            self.patch(else_jump)
        }
    }

    fn while_statement(&mut self) -> Result<()> {
        let kw = self.advance()?;
        let start = self.chunk.len();
        let cond = self.condition("while")?;
        self.emit_expr(&cond)?;
        let exit = self.chunk.write_jump(OP_FJUMP, kw.line);

        self.cycler.start_parse_cycle(start, self.scope.depth());
        self.scoped_statement()?;
        self.chunk.write_loop(start, kw.line);
        self.patch(exit)?;
        Ok(self.cycler.end_parse_cycle(&mut self.chunk)?)
    }

    fn for_statement(&mut self) -> Result<()> {
        let kw = self.advance()?;
        self.scope.begin_scope();
        self.expect(Token::LParen, "after 'for'")?;

        match self.peek_token()? {
            Some(Token::Semicolon) => {
                self.advance()?;
            }
            Some(Token::Var) => self.var_declaration()?,
            _ => self.expression_statement()?,
        }

        let loop_start = self.chunk.len();
        if self.check(Token::Semicolon)? {
            self.chunk.write_op(OP_BOOLEAN, 1, kw.line);
        } else {
            let cond = self.expression()?;
            self.emit_expr(&cond)?;
        }
        self.expect(Token::Semicolon, "after loop condition")?;
        let exit = self.chunk.write_jump(OP_FJUMP, kw.line);

        let post = if self.check(Token::RParen)? { None } else { Some(self.expression()?) };
        self.expect(Token::RParen, "after for clauses")?;

        self.cycler.start_parse_cycle(loop_start, self.scope.depth());
        self.scoped_statement()?;

        self.cycler.change_start_offset(self.chunk.len());
        if let Some(post) = post {
            self.emit_expr(&post)?;
            self.chunk.write_simple_op(OP_POP, kw.line);
        }
        self.chunk.write_loop(loop_start, kw.line);
        self.patch(exit)?;
        self.cycler.end_parse_cycle(&mut self.chunk)?;

        let line = self.scanner.line();
        self.scope.end_scope(&mut self.chunk, line).map_err(|e| self.scope_error(e, kw.span))
    }

    /// Pops locals of the loop body before jumping out of it.
    fn unwind_loop_locals(&mut self, line: u32) {
        let depth = self.cycler.depth().unwrap_or(0);
        let count = self.scope.locals_deeper_than(depth);
        write_pops(&mut self.chunk, count, line);
    }

    fn break_statement(&mut self) -> Result<()> {
        let kw = self.advance()?;
        if !self.cycler.is_cycle() {
            return Err(self.error(kw, "'break' outside of a loop"));
        }
        self.expect(Token::Semicolon, "after 'break'")?;
        self.unwind_loop_locals(kw.line);
        self.cycler.parse_break(&mut self.chunk, kw.line);
        Ok(())
    }

    fn continue_statement(&mut self) -> Result<()> {
        let kw = self.advance()?;
        if !self.cycler.is_cycle() {
            return Err(self.error(kw, "'continue' outside of a loop"));
        }
        self.expect(Token::Semicolon, "after 'continue'")?;
        self.unwind_loop_locals(kw.line);
        self.cycler.parse_continue(&mut self.chunk, kw.line);
        Ok(())
    }

    fn return_statement(&mut self) -> Result<()> {
        let kw = self.advance()?;
        if !self.scope.in_function() {
            return Err(self.error(kw, "'return' outside of a function"));
        }

        if self.scope.kind() == FunctionKind::Constructor {
            if !self.eat(Token::Semicolon)? {
                let value = self.expression()?;
                if value.node != Expr::This {
                    return Err(self.error_span(value.span, "Cannot return a value from a constructor"));
                }
                self.expect(Token::Semicolon, "after return value")?;
            }
            self.chunk.write_op(OP_GET_LOCAL, 0, kw.line);
            self.chunk.write_simple_op(OP_RETURN, kw.line);
            return Ok(());
        }

        if self.eat(Token::Semicolon)? {
            self.chunk.write_simple_op(OP_NULL, kw.line);
        } else {
            let value = self.expression()?;
            self.expect(Token::Semicolon, "after return value")?;
            self.emit_expr(&value)?;
        }
        self.chunk.write_simple_op(OP_RETURN, kw.line);
        Ok(())
    }
}
