use crate::ast::IncDec;
use crate::bytecode::*;
use crate::context::Context;
use crate::object::{ObjRef, Value};

pub const MAX_LOCALS: usize = 256;
pub const MAX_ARGUMENTS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("Too many local variables in function")]
    TooManyLocals,
    #[error("Too many arguments in function")]
    TooManyArguments,
    #[error("Extraneous closing brace")]
    ExtraneousBrace,
    #[error("Cannot use a variable in its own initializer")]
    OwnInitializer,
    #[error("'this' used outside of a method or constructor")]
    ThisOutsideClass,
    #[error("Cannot increment or decrement field '{0}'")]
    FieldIncDec(String),
}

type Result<T> = std::result::Result<T, ScopeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Top-level statements.
    Script,
    Function,
    Method,
    Constructor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Local {
    pub name: ObjRef,
    /// `None` while the initializer is still being compiled.
    pub depth: Option<usize>,
}

/// Where a name lives once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Field of `this`.
    Field(ObjRef),
    /// Slot relative to the base pointer; arguments are negative.
    Local(i32),
    Global(ObjRef),
}

/// Compile-time view of the frame being emitted.
///
/// Frame layout at run time is `[args.., return_ip, saved_bp | locals..]`
/// with the base pointer on the first local. Depth 0 is the global level.
#[derive(Debug)]
pub struct Scope {
    locals: Vec<Local>,
    arguments: Vec<ObjRef>,
    depth: usize,
    class: Option<ObjRef>,
    kind: FunctionKind,
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            locals: Vec::new(),
            arguments: Vec::new(),
            depth: 0,
            class: None,
            kind: FunctionKind::Script,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub fn in_function(&self) -> bool {
        self.kind != FunctionKind::Script
    }

    pub fn class(&self) -> Option<ObjRef> {
        self.class
    }

    pub fn set_class(&mut self, class: Option<ObjRef>) {
        self.class = class;
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    // ── Blocks ───────────────────────────────────────────────────────

    pub fn begin_scope(&mut self) {
        self.depth += 1;
    }

    /// Leaves a block, popping the locals it declared.
    pub fn end_scope(&mut self, chunk: &mut Chunk, line: u32) -> Result<()> {
        if self.depth == 0 {
            return Err(ScopeError::ExtraneousBrace);
        }
        self.depth -= 1;
        let dying = self.locals_deeper_than(self.depth);
        self.locals.truncate(self.locals.len() - dying);
        write_pops(chunk, dying, line);
        Ok(())
    }

    /// Number of locals declared below `depth`. Loop exits pop these.
    pub fn locals_deeper_than(&self, depth: usize) -> usize {
        self.locals
            .iter()
            .rev()
            .take_while(|l| l.depth.is_none_or(|d| d > depth))
            .count()
    }

    // ── Functions ────────────────────────────────────────────────────

    /// Opens a function body. Arguments are declared afterwards.
    pub fn begin_function(&mut self, kind: FunctionKind) {
        self.kind = kind;
        self.arguments.clear();
        self.locals.clear();
        self.depth = 1;
    }

    /// Closes a function body. `RETURN` discards the frame, so nothing is
    /// popped here.
    pub fn end_function(&mut self) {
        self.kind = FunctionKind::Script;
        self.arguments.clear();
        self.locals.clear();
        self.depth = 0;
    }

    /// Returns false when an argument of that name exists.
    pub fn declare_argument(&mut self, name: ObjRef) -> Result<bool> {
        if self.arguments.contains(&name) {
            return Ok(false);
        }
        if self.arguments.len() >= MAX_ARGUMENTS {
            return Err(ScopeError::TooManyArguments);
        }
        self.arguments.push(name);
        Ok(true)
    }

    pub fn argument_count(&self) -> usize {
        self.arguments.len()
    }

    /// Constructors keep the new instance in local 0.
    pub fn add_instance_data(&mut self, ctx: &Context, chunk: &mut Chunk, class: ObjRef, line: u32) -> Result<()> {
        self.declare_variable(ctx.this_id)?;
        self.define_variable();
        chunk.write_op_value(OP_INSTANCE, Value::Obj(class), line);
        Ok(())
    }

    // ── Locals ───────────────────────────────────────────────────────

    /// Returns false when `name` is already declared in the current block.
    pub fn declare_variable(&mut self, name: ObjRef) -> Result<bool> {
        let clash = self
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth.is_none_or(|d| d >= self.depth))
            .any(|l| l.name == name);
        if clash {
            return Ok(false);
        }
        if self.locals.len() >= MAX_LOCALS {
            return Err(ScopeError::TooManyLocals);
        }
        self.locals.push(Local { name, depth: None });
        Ok(true)
    }

    /// Marks the newest local as initialized.
    pub fn define_variable(&mut self) {
        let depth = self.depth;
        if let Some(local) = self.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    pub fn resolve_local(&self, name: ObjRef) -> Result<Option<i32>> {
        if let Some(i) = self.locals.iter().rposition(|l| l.name == name) {
            if self.locals[i].depth.is_none() {
                return Err(ScopeError::OwnInitializer);
            }
            return Ok(Some(i as i32));
        }
        let n = self.arguments.len() as i32;
        Ok(self
            .arguments
            .iter()
            .position(|&a| a == name)
            .map(|p| -(n - 1 - p as i32) - 3))
    }

    // ── Name emission ────────────────────────────────────────────────

    fn is_field(&self, ctx: &Context, name: ObjRef) -> bool {
        if !matches!(self.kind, FunctionKind::Method | FunctionKind::Constructor) {
            return false;
        }
        self.class
            .and_then(|c| ctx.heap.class(c))
            .is_some_and(|c| c.fields.contains(name, ctx.heap.hash_of(name)))
    }

    /// Fields of the current class win, then locals and arguments, then
    /// globals.
    pub fn resolve(&self, ctx: &Context, name: ObjRef) -> Result<Binding> {
        if self.is_field(ctx, name) {
            return Ok(Binding::Field(name));
        }
        match self.resolve_local(name)? {
            Some(slot) => Ok(Binding::Local(slot)),
            None => Ok(Binding::Global(name)),
        }
    }

    pub fn write_this(&self, ctx: &Context, chunk: &mut Chunk, line: u32) -> Result<()> {
        if !matches!(self.kind, FunctionKind::Method | FunctionKind::Constructor) {
            return Err(ScopeError::ThisOutsideClass);
        }
        match self.resolve_local(ctx.this_id)? {
            Some(slot) => {
                chunk.write_op(OP_GET_LOCAL, slot, line);
                Ok(())
            }
            None => Err(ScopeError::ThisOutsideClass),
        }
    }

    pub fn write_get_var(&self, ctx: &Context, chunk: &mut Chunk, name: ObjRef, line: u32) -> Result<()> {
        match self.resolve(ctx, name)? {
            Binding::Field(field) => {
                self.write_this(ctx, chunk, line)?;
                chunk.write_op_value(OP_GET_FIELD, Value::Obj(field), line);
            }
            Binding::Local(slot) => {
                chunk.write_op(OP_GET_LOCAL, slot, line);
            }
            Binding::Global(id) => {
                chunk.write_op_value(OP_GET_GLOBAL, Value::Obj(id), line);
            }
        }
        Ok(())
    }

    /// Stores the value on top of the stack into `binding`, leaving it there.
    /// A field store also expects the receiver right below the value.
    pub fn write_set_var(&self, chunk: &mut Chunk, binding: Binding, line: u32) {
        match binding {
            Binding::Field(field) => chunk.write_op_value(OP_SET_FIELD, Value::Obj(field), line),
            Binding::Local(slot) => chunk.write_op(OP_SET_LOCAL, slot, line),
            Binding::Global(id) => chunk.write_op_value(OP_SET_GLOBAL, Value::Obj(id), line),
        };
    }

    pub fn write_incdec(&self, ctx: &Context, chunk: &mut Chunk, name: ObjRef, kind: IncDec, line: u32) -> Result<()> {
        match self.resolve(ctx, name)? {
            Binding::Field(field) => Err(ScopeError::FieldIncDec(ctx.name(field).to_string())),
            Binding::Local(slot) => {
                let op = match kind {
                    IncDec::PreIncr => OP_PREFINCR_LOCAL,
                    IncDec::PreDecr => OP_PREFDECR_LOCAL,
                    IncDec::PostIncr => OP_POSTINCR_LOCAL,
                    IncDec::PostDecr => OP_POSTDECR_LOCAL,
                };
                chunk.write_op(op, slot, line);
                Ok(())
            }
            Binding::Global(id) => {
                let op = match kind {
                    IncDec::PreIncr => OP_PREFINCR_GLOBAL,
                    IncDec::PreDecr => OP_PREFDECR_GLOBAL,
                    IncDec::PostIncr => OP_POSTINCR_GLOBAL,
                    IncDec::PostDecr => OP_POSTDECR_GLOBAL,
                };
                chunk.write_op_value(op, Value::Obj(id), line);
                Ok(())
            }
        }
    }
}

/// `POP` for one value, `POPN` for more, nothing for zero.
pub fn write_pops(chunk: &mut Chunk, count: usize, line: u32) {
    match count {
        0 => {}
        1 => chunk.write_simple_op(OP_POP, line),
        n => {
            chunk.write_op(OP_POPN, n as i32, line);
        }
    }
}
