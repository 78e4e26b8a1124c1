use std::cmp::Ordering;
use std::io::{Read, Write};
use std::time::Instant;

use crate::bytecode::*;
use crate::config::Config;
use crate::context::Context;
use crate::gc;
use crate::natives::Host;
use crate::object::{InstanceObj, ObjRef, Object, Value};
use crate::table::hash_string;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("Error at line {line}: {message}")]
    Runtime { line: u32, message: String },
    #[error("FATAL: {0}")]
    Fatal(String),
}

type Result<T> = std::result::Result<T, VmError>;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The entry function returned.
    Finished,
    /// `exit(code)` was called.
    Exit(i32),
}

/// Return address that marks the outermost frame.
const RETURN_TO_HOST: i64 = -1;

/// Stack machine over one chunk.
///
/// A frame is `[args.., return_ip, saved_bp | locals..]` with `bp` on the
/// first local. Arguments sit at negative offsets from `bp`.
pub struct Vm<'a> {
    ctx: &'a mut Context,
    chunk: &'a Chunk,
    out: &'a mut dyn Write,
    input: &'a mut dyn Read,
    stack: Vec<Value>,
    capacity: usize,
    ip: usize,
    /// Offset of the opcode being executed, for line lookup.
    op_start: usize,
    bp: usize,
    gc_stress: bool,
    started: Instant,
}

impl<'a> Vm<'a> {
    pub fn new(
        ctx: &'a mut Context,
        chunk: &'a Chunk,
        config: &Config,
        out: &'a mut dyn Write,
        input: &'a mut dyn Read,
    ) -> Self {
        Vm {
            ctx,
            chunk,
            out,
            input,
            stack: Vec::with_capacity(config.stack_size.min(1 << 16)),
            capacity: config.stack_size,
            ip: 0,
            op_start: 0,
            bp: 0,
            gc_stress: config.gc_stress,
            started: Instant::now(),
        }
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// Runs the zero-argument function registered as `entry` until its
    /// frame returns.
    pub fn run(&mut self, entry: &str) -> Result<Outcome> {
        let id = self
            .ctx
            .globals
            .find_str(&self.ctx.heap, entry, hash_string(entry))
            .ok_or_else(|| VmError::Fatal(format!("Entry function '{entry}' not found")))?;
        let function = match self.ctx.global(id) {
            Some(Value::Obj(r)) => self.ctx.heap.function(r),
            _ => None,
        }
        .ok_or_else(|| VmError::Fatal(format!("'{entry}' is not a function")))?;
        if function.arity != 0 {
            return Err(VmError::Fatal(format!("Entry function '{entry}' must not take arguments")));
        }
        let start = function
            .entry
            .ok_or_else(|| VmError::Fatal(format!("Entry function '{entry}' is not defined")))?;

        self.stack.clear();
        self.bp = 0;
        self.push(Value::Number(RETURN_TO_HOST))?;
        self.ip = start;
        self.execute()
    }

    // ── Stack and operands ───────────────────────────────────────────

    fn push(&mut self, value: Value) -> Result<()> {
        if self.stack.len() >= self.capacity {
            return Err(VmError::Fatal("Stack overflow".into()));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(|| VmError::Fatal("Stack underflow".into()))
    }

    fn peek(&self) -> Result<Value> {
        self.stack.last().copied().ok_or_else(|| VmError::Fatal("Stack underflow".into()))
    }

    /// Drops `n` values from the top.
    fn discard(&mut self, n: usize) -> Result<()> {
        let len = self.stack.len();
        if n > len {
            return Err(VmError::Fatal(format!("Cannot pop {n} values from a stack of {len}")));
        }
        self.stack.truncate(len - n);
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8> {
        let byte = self
            .chunk
            .code
            .get(self.ip)
            .copied()
            .ok_or_else(|| VmError::Fatal(format!("Instruction pointer {} ran off the code", self.ip)))?;
        self.ip += 1;
        Ok(byte)
    }

    fn read_operand(&mut self) -> Result<i32> {
        let operand = self
            .chunk
            .read_operand(self.ip)
            .ok_or_else(|| VmError::Fatal(format!("Truncated operand at {}", self.ip)))?;
        self.ip += 4;
        Ok(operand)
    }

    fn read_count(&mut self) -> Result<usize> {
        let n = self.read_operand()?;
        usize::try_from(n).map_err(|_| VmError::Fatal(format!("Negative count {n}")))
    }

    fn read_constant(&mut self) -> Result<Value> {
        let k = self.read_operand()?;
        usize::try_from(k)
            .ok()
            .and_then(|i| self.chunk.data.get(i))
            .copied()
            .ok_or_else(|| VmError::Fatal(format!("Bad constant index {k}")))
    }

    fn read_obj(&mut self) -> Result<ObjRef> {
        match self.read_constant()? {
            Value::Obj(r) if self.ctx.heap.contains(r) => Ok(r),
            other => Err(VmError::Fatal(format!("Expected an object constant, found {other:?}"))),
        }
    }

    /// Argument count pushed before `NATIVE_CALL` and `METHOD`.
    fn pop_argc(&mut self) -> Result<usize> {
        match self.pop()? {
            Value::Number(n) if n >= 0 && n as usize <= self.stack.len() => Ok(n as usize),
            other => Err(VmError::Fatal(format!("Bad argument count {other:?}"))),
        }
    }

    fn local_slot(&self, offset: i32) -> Result<usize> {
        let slot = self.bp as i64 + i64::from(offset);
        if slot < 0 || slot as usize >= self.stack.len() {
            return Err(VmError::Fatal(format!("Local slot {offset} outside the frame")));
        }
        Ok(slot as usize)
    }

    fn jump(&mut self, distance: i32) -> Result<()> {
        let target = self.ip as i64 + i64::from(distance);
        if target < 0 || target as usize > self.chunk.len() {
            return Err(VmError::Fatal(format!("Jump to {target} outside the code")));
        }
        self.ip = target as usize;
        Ok(())
    }

    // ── Errors ───────────────────────────────────────────────────────

    fn runtime(&self, message: impl Into<String>) -> VmError {
        VmError::Runtime { line: self.chunk.line_at(self.op_start), message: message.into() }
    }

    fn type_name(&self, value: Value) -> &'static str {
        value.type_name(&self.ctx.heap)
    }

    fn name(&self, r: ObjRef) -> String {
        self.ctx.name(r).to_string()
    }

    /// Stores are rejected unless the slot is unset or keeps its type.
    fn check_store(&self, old: Value, new: Value, target: &str) -> Result<()> {
        if old.accepts(new, &self.ctx.heap) {
            return Ok(());
        }
        Err(self.runtime(format!(
            "Cannot assign a {} to {target} holding a {}",
            self.type_name(new),
            self.type_name(old)
        )))
    }

    fn is_string(&self, value: Value) -> bool {
        matches!(value, Value::Obj(r) if matches!(self.ctx.heap.get(r), Some(Object::String(_))))
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    fn execute(&mut self) -> Result<Outcome> {
        loop {
            if self.gc_stress || self.ctx.heap.should_collect() {
                gc::collect(self.ctx, &self.stack, self.bp, &self.chunk.data);
            }

            self.op_start = self.ip;
            let op = self.read_byte()?;
            tracing::trace!(
                offset = self.op_start,
                op = op_info(op).map_or("UNKNOWN", |(name, _)| name),
                depth = self.stack.len(),
                "dispatch"
            );

            match op {
                OP_RETURN => {
                    let value = self.pop()?;
                    if self.bp > self.stack.len() {
                        return Err(VmError::Fatal("Corrupt frame: base above stack top".into()));
                    }
                    self.stack.truncate(self.bp);
                    self.bp = match self.pop()? {
                        Value::Number(saved) if saved >= 0 => saved as usize,
                        other => return Err(VmError::Fatal(format!("Corrupt frame: saved base {other:?}"))),
                    };
                    match self.pop()? {
                        Value::Number(ip) if ip < 0 => return Ok(Outcome::Finished),
                        Value::Number(ip) => {
                            self.push(value)?;
                            self.ip = ip as usize;
                        }
                        other => return Err(VmError::Fatal(format!("Corrupt frame: return address {other:?}"))),
                    }
                }
                OP_POP => {
                    self.pop()?;
                }
                OP_POPN => {
                    let n = self.read_count()?;
                    self.discard(n)?;
                }
                OP_CLARGS => {
                    let n = self.read_count()?;
                    let top = self.pop()?;
                    self.discard(n)?;
                    self.push(top)?;
                }
                OP_JUMP => {
                    let distance = self.read_operand()?;
                    self.jump(distance)?;
                }
                OP_FJUMP => {
                    let distance = self.read_operand()?;
                    match self.pop()? {
                        Value::Bool(true) => {}
                        Value::Bool(false) => self.jump(distance)?,
                        other => {
                            return Err(self.runtime(format!(
                                "Condition must be a boolean, found {}",
                                self.type_name(other)
                            )));
                        }
                    }
                }
                OP_NUMBER | OP_STRING => {
                    let value = self.read_constant()?;
                    self.push(value)?;
                }
                OP_BOOLEAN => {
                    let b = self.read_operand()?;
                    self.push(Value::Bool(b != 0))?;
                }
                OP_NULL => self.push(Value::Uninit)?,

                OP_DEFINE_GLOBAL => {
                    let id = self.read_obj()?;
                    let value = self.pop()?;
                    self.ctx.set_global(id, value);
                }
                OP_GET_GLOBAL => {
                    let id = self.read_obj()?;
                    let value = self.global(id)?;
                    self.push(value)?;
                }
                OP_SET_GLOBAL => {
                    let id = self.read_obj()?;
                    let value = self.peek()?;
                    let old = self.global(id)?;
                    self.check_store(old, value, &format!("'{}'", self.name(id)))?;
                    self.ctx.set_global(id, value);
                }
                OP_GET_LOCAL => {
                    let offset = self.read_operand()?;
                    let slot = self.local_slot(offset)?;
                    let value = self.stack[slot];
                    self.push(value)?;
                }
                OP_SET_LOCAL => {
                    let offset = self.read_operand()?;
                    let slot = self.local_slot(offset)?;
                    let value = self.peek()?;
                    self.check_store(self.stack[slot], value, "a variable")?;
                    self.stack[slot] = value;
                }
                OP_GET_FIELD => {
                    let name = self.read_obj()?;
                    let receiver = self.pop()?;
                    let (instance, index) = self.field_slot(receiver, name)?;
                    let value = self.ctx.heap.instance(instance).and_then(|i| i.fields.get(index).copied());
                    let value = value.ok_or_else(|| VmError::Fatal("Field offset outside instance".into()))?;
                    self.push(value)?;
                }
                OP_SET_FIELD => {
                    let name = self.read_obj()?;
                    let value = self.pop()?;
                    let receiver = self.pop()?;
                    let (instance, index) = self.field_slot(receiver, name)?;
                    let old = self.ctx.heap.instance(instance).and_then(|i| i.fields.get(index).copied());
                    let old = old.ok_or_else(|| VmError::Fatal("Field offset outside instance".into()))?;
                    self.check_store(old, value, &format!("field '{}'", self.name(name)))?;
                    if let Some(slot) = self.ctx.heap.instance_mut(instance).and_then(|i| i.fields.get_mut(index)) {
                        *slot = value;
                    }
                    self.push(value)?;
                }

                OP_ADD => self.add()?,
                OP_SUB => {
                    let (a, b) = self.numbers("-")?;
                    self.push(Value::Number(a.wrapping_sub(b)))?;
                }
                OP_MUL => {
                    let (a, b) = self.numbers("*")?;
                    self.push(Value::Number(a.wrapping_mul(b)))?;
                }
                OP_DIV => {
                    let (a, b) = self.numbers("/")?;
                    if b == 0 {
                        return Err(self.runtime("Division by zero"));
                    }
                    self.push(Value::Number(a.wrapping_div(b)))?;
                }
                OP_AND => {
                    let (a, b) = self.booleans("and")?;
                    self.push(Value::Bool(a && b))?;
                }
                OP_OR => {
                    let (a, b) = self.booleans("or")?;
                    self.push(Value::Bool(a || b))?;
                }
                OP_XOR => {
                    let (a, b) = self.booleans("xor")?;
                    self.push(Value::Bool(a ^ b))?;
                }
                OP_NOT => match self.pop()? {
                    Value::Bool(b) => self.push(Value::Bool(!b))?,
                    other => {
                        return Err(self.runtime(format!(
                            "Operand of '!' must be a boolean, found {}",
                            self.type_name(other)
                        )));
                    }
                },
                OP_EQUAL => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let equal = self.values_equal(a, b)?;
                    self.push(Value::Bool(equal))?;
                }
                OP_GREATER => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let ordering = self.compare(a, b, ">")?;
                    self.push(Value::Bool(ordering == Ordering::Greater))?;
                }
                OP_LESS => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let ordering = self.compare(a, b, "<")?;
                    self.push(Value::Bool(ordering == Ordering::Less))?;
                }

                OP_PUSH_BP => {
                    let saved = Value::Number(self.bp as i64);
                    self.push(saved)?;
                }
                OP_BP_AS_SP => self.bp = self.stack.len(),
                OP_CALL => {
                    let function = self.read_obj()?;
                    self.call(function)?;
                }
                OP_NATIVE_CALL => {
                    let native = self.read_obj()?;
                    if let Some(code) = self.call_native(native)? {
                        return Ok(Outcome::Exit(code));
                    }
                }
                OP_METHOD => {
                    let name = self.read_obj()?;
                    self.call_method(name)?;
                }
                OP_INSTANCE => {
                    let class = self.read_obj()?;
                    let size = self
                        .ctx
                        .heap
                        .class(class)
                        .map(|c| c.fields.len())
                        .ok_or_else(|| VmError::Fatal("INSTANCE operand is not a class".into()))?;
                    let instance = self.ctx.heap.alloc(Object::Instance(InstanceObj {
                        class,
                        fields: vec![Value::Uninit; size],
                    }));
                    self.push(Value::Obj(instance))?;
                }

                OP_PREFINCR_LOCAL | OP_PREFDECR_LOCAL | OP_POSTINCR_LOCAL | OP_POSTDECR_LOCAL => {
                    let offset = self.read_operand()?;
                    let slot = self.local_slot(offset)?;
                    let (stored, result) = self.step(op, self.stack[slot])?;
                    self.stack[slot] = stored;
                    self.push(result)?;
                }
                OP_PREFINCR_GLOBAL | OP_PREFDECR_GLOBAL | OP_POSTINCR_GLOBAL | OP_POSTDECR_GLOBAL => {
                    let id = self.read_obj()?;
                    let old = self.global(id)?;
                    let (stored, result) = self.step(op, old)?;
                    self.ctx.set_global(id, stored);
                    self.push(result)?;
                }

                unknown => {
                    return Err(VmError::Fatal(format!("Unknown opcode {unknown} at offset {}", self.op_start)));
                }
            }
        }
    }

    // ── Globals and fields ───────────────────────────────────────────

    fn global(&self, id: ObjRef) -> Result<Value> {
        match self.ctx.global(id) {
            Some(value) => Ok(value),
            None => Err(self.runtime(format!("Undefined identifier '{}'", self.name(id)))),
        }
    }

    fn field_slot(&self, receiver: Value, name: ObjRef) -> Result<(ObjRef, usize)> {
        let heap = &self.ctx.heap;
        let Some((instance, class)) = receiver.as_obj().and_then(|r| heap.instance(r).map(|i| (r, i.class))) else {
            return Err(self.runtime(format!("Only instances have fields, found {}", self.type_name(receiver))));
        };
        let class = heap.class(class).ok_or_else(|| VmError::Fatal("Instance of a non-class".into()))?;
        match class.fields.get(name, heap.hash_of(name)) {
            Some(Value::Number(offset)) if offset >= 0 => Ok((instance, offset as usize)),
            _ => Err(self.runtime(format!(
                "Undefined field '{}' in class '{}'",
                self.name(name),
                self.name(class.name)
            ))),
        }
    }

    // ── Operators ────────────────────────────────────────────────────

    fn add(&mut self) -> Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => self.push(Value::Number(x.wrapping_add(y))),
            (Value::Obj(x), Value::Obj(y)) if self.is_string(a) && self.is_string(b) => {
                let text = format!("{}{}", self.ctx.heap.text(x), self.ctx.heap.text(y));
                let joined = self.ctx.intern_string(&text);
                self.push(Value::Obj(joined))
            }
            _ => Err(self.runtime(format!(
                "Operands of '+' must be two numbers or two strings, found {} and {}",
                self.type_name(a),
                self.type_name(b)
            ))),
        }
    }

    fn numbers(&mut self, op: &str) -> Result<(i64, i64)> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => Ok((x, y)),
            _ => Err(self.runtime(format!(
                "Operands of '{op}' must be numbers, found {} and {}",
                self.type_name(a),
                self.type_name(b)
            ))),
        }
    }

    fn booleans(&mut self, op: &str) -> Result<(bool, bool)> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => Ok((x, y)),
            _ => Err(self.runtime(format!(
                "Operands of '{op}' must be booleans, found {} and {}",
                self.type_name(a),
                self.type_name(b)
            ))),
        }
    }

    /// Strings are interned, so identity is equality for every object kind.
    fn values_equal(&self, a: Value, b: Value) -> Result<bool> {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => Ok(x == y),
            (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
            (Value::None, Value::None) | (Value::Uninit, Value::Uninit) => Ok(true),
            (Value::Obj(x), Value::Obj(y)) if self.type_name(a) == self.type_name(b) => Ok(x == y),
            _ => Err(self.runtime(format!(
                "Cannot compare a {} with a {}",
                self.type_name(a),
                self.type_name(b)
            ))),
        }
    }

    fn compare(&self, a: Value, b: Value, op: &str) -> Result<Ordering> {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => Ok(x.cmp(&y)),
            (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(&y)),
            (Value::Obj(x), Value::Obj(y)) if self.is_string(a) && self.is_string(b) => {
                Ok(self.ctx.heap.text(x).cmp(self.ctx.heap.text(y)))
            }
            _ => Err(self.runtime(format!(
                "Operands of '{op}' must be two numbers, booleans or strings, found {} and {}",
                self.type_name(a),
                self.type_name(b)
            ))),
        }
    }

    /// Increment or decrement `old`. Returns the value to store and the
    /// value the expression produces.
    fn step(&self, op: u8, old: Value) -> Result<(Value, Value)> {
        let (delta, prefix) = match op {
            OP_PREFINCR_LOCAL | OP_PREFINCR_GLOBAL => (1, true),
            OP_PREFDECR_LOCAL | OP_PREFDECR_GLOBAL => (-1, true),
            OP_POSTINCR_LOCAL | OP_POSTINCR_GLOBAL => (1, false),
            _ => (-1, false),
        };
        let Value::Number(n) = old else {
            let symbol = if delta > 0 { "++" } else { "--" };
            return Err(self.runtime(format!(
                "Operand of '{symbol}' must be a number, found {}",
                self.type_name(old)
            )));
        };
        let stored = Value::Number(n.wrapping_add(delta));
        Ok((stored, if prefix { stored } else { old }))
    }

    // ── Calls ────────────────────────────────────────────────────────

    /// Pushes the return address and enters `function`. The callee's
    /// preamble saves `bp`.
    fn call(&mut self, function: ObjRef) -> Result<()> {
        let (name, entry) = match self.ctx.heap.function(function) {
            Some(f) => (f.name, f.entry),
            None => return Err(VmError::Fatal("CALL operand is not a function".into())),
        };
        let Some(entry) = entry else {
            return Err(self.runtime(format!("Function '{}' is declared but not defined", self.name(name))));
        };
        tracing::trace!(function = self.ctx.name(name), entry, "call");
        let return_ip = Value::Number(self.ip as i64);
        self.push(return_ip)?;
        self.ip = entry;
        Ok(())
    }

    /// Stack: `[receiver, args.., argc]`. The receiver becomes argument 0.
    fn call_method(&mut self, name: ObjRef) -> Result<()> {
        let argc = self.pop_argc()?;
        let len = self.stack.len();
        if argc + 1 > len {
            return Err(VmError::Fatal("Method call without a receiver".into()));
        }
        let receiver = self.stack[len - 1 - argc];
        let heap = &self.ctx.heap;
        let Some(class) = receiver.as_obj().and_then(|r| heap.instance(r)).map(|i| i.class) else {
            return Err(self.runtime(format!("Only instances have methods, found {}", self.type_name(receiver))));
        };
        let class_obj = heap.class(class).ok_or_else(|| VmError::Fatal("Instance of a non-class".into()))?;
        let Some(Value::Obj(method)) = class_obj.methods.get(name, heap.hash_of(name)) else {
            return Err(self.runtime(format!(
                "Undefined method '{}' in class '{}'",
                self.name(name),
                self.name(class_obj.name)
            )));
        };
        let arity = heap.function(method).map(|f| f.arity).unwrap_or(0);
        if arity != argc + 1 {
            return Err(self.runtime(format!(
                "Expected {} arguments in '{}' method call, found {argc}",
                arity.saturating_sub(1),
                self.name(name)
            )));
        }
        self.call(method)
    }

    /// Stack: `[args.., argc]`. Returns the exit code when the native asked
    /// the program to stop.
    fn call_native(&mut self, native: ObjRef) -> Result<Option<i32>> {
        let argc = self.pop_argc()?;
        let (name, function) = match self.ctx.heap.native(native) {
            Some(n) => (n.name, n.function),
            None => return Err(VmError::Fatal("NATIVE_CALL operand is not a native".into())),
        };
        let args = self.stack[self.stack.len() - argc..].to_vec();
        tracing::trace!(native = self.ctx.name(name), argc, "native call");

        let result = {
            let mut host = Host {
                ctx: &mut *self.ctx,
                out: &mut *self.out,
                input: &mut *self.input,
                started: self.started,
            };
            function(&mut host, &args)
        };
        let value = result.map_err(|e| self.runtime(e.0))?;
        self.push(value)?;
        Ok(self.ctx.exit_code.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::compile;

    fn run_with(source: &str, config: &Config, input: &str) -> (String, Result<Outcome>) {
        let mut ctx = Context::new();
        let chunk = compile(source, &mut ctx).unwrap();
        let mut out = Vec::new();
        let mut input = input.as_bytes();
        let outcome = Vm::new(&mut ctx, &chunk, config, &mut out, &mut input).run(crate::context::SCRIPT_ENTRY);
        (String::from_utf8(out).unwrap(), outcome)
    }

    fn run(source: &str) -> String {
        let (out, outcome) = run_with(source, &Config::default(), "");
        assert_eq!(outcome, Ok(Outcome::Finished), "output so far: {out}");
        out
    }

    fn run_err(source: &str) -> String {
        let (_, outcome) = run_with(source, &Config::default(), "");
        outcome.unwrap_err().to_string()
    }

    #[test]
    fn function_call() {
        assert_eq!(run("func add(a,b){ return a+b; } print(add(2,3));"), "5\n");
    }

    #[test]
    fn while_loop() {
        assert_eq!(run("var x = 0; while(x<3){ print(x); x = x+1; }"), "0\n1\n2\n");
    }

    #[test]
    fn for_with_break_and_continue() {
        let src = "for(var i=0; i<5; i=i+1){ if(i==2) continue; if(i==4) break; print(i); }";
        assert_eq!(run(src), "0\n1\n3\n");
    }

    #[test]
    fn class_with_constructor_and_method() {
        let src = "class Point{ field x; field y; Point(a,b){ this.x=a; this.y=b; return this; } \
                   meth sum(){ return this.x+this.y; } } var p = Point(2,5); print(p.sum());";
        assert_eq!(run(src), "7\n");
    }

    #[test]
    fn concatenation() {
        assert_eq!(run("print(\"a\"+\"b\");"), "ab\n");
    }

    #[test]
    fn arguments_and_locals_for_each_arity() {
        for k in 0..=5usize {
            let params: Vec<String> = (0..k).map(|i| format!("a{i}")).collect();
            let args: Vec<String> = (0..k).map(|i| ((i + 1) * 11).to_string()).collect();
            let prints: String = params.iter().map(|p| format!("print({p});")).collect();
            let src = format!(
                "func f({}) {{ var l = 7; var m = l + 1; {prints} print(l); print(m); return m; }}\nprint(f({}));",
                params.join(", "),
                args.join(", ")
            );
            let mut expected: String = args.iter().map(|a| format!("{a}\n")).collect();
            expected.push_str("7\n8\n8\n");
            assert_eq!(run(&src), expected, "arity {k}");
        }
    }

    #[test]
    fn recursion() {
        let src = "func fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print(fib(15));";
        assert_eq!(run(src), "610\n");
    }

    #[test]
    fn deep_recursion_until_overflow() {
        let src = "func down(n) { if (n == 0) return 0; return down(n - 1); }";
        assert_eq!(run(&format!("{src} print(down(500));")), "0\n");
        assert_eq!(run_err(&format!("{src} print(down(100000));")), "FATAL: Stack overflow");
    }

    #[test]
    fn main_runs_after_top_level() {
        assert_eq!(run("func main() { print(2); } print(1);"), "1\n2\n");
    }

    #[test]
    fn block_locals_survive_nested_breaks() {
        let src = "{ var z = 42; \
                   for (var i = 0; i < 3; i = i + 1) { var a = i; { var b = a; if (b == 1) break; } } \
                   var w = z + 1; print(z); print(w); }";
        assert_eq!(run(src), "42\n43\n");
    }

    #[test]
    fn continue_in_while_pops_body_locals() {
        let src = "var n = 0; var hits = 0; \
                   while (n < 5) { var t = n; n = n + 1; if (t == 2) continue; hits = hits + 1; } \
                   print(hits);";
        assert_eq!(run(src), "4\n");
    }

    #[test]
    fn increments() {
        let src = "var i = 5; print(i++); print(i); print(++i); print(i--); print(--i); \
                   { var j = 1; j++; ++j; print(j); }";
        assert_eq!(run(src), "5\n6\n7\n7\n5\n3\n");
    }

    #[test]
    fn fields_by_bare_name_and_implicit_methods() {
        let src = "class C { field n; C(v) { n = v; } \
                   meth twice() { return n * 2; } meth quad() { return twice() * 2; } } \
                   var c = C(3); print(c.quad()); c.n = 10; print(c.n);";
        assert_eq!(run(src), "12\n10\n");
    }

    #[test]
    fn default_constructor_leaves_fields_unset() {
        let src = "class C { field a; C(x, y) { a = x + y; } } var c = C(); print(c.a); print(c);";
        assert_eq!(run(src), "NULL\nInstance of class C\n");
    }

    #[test]
    fn printing_objects() {
        let src = "class K {} func f() {} print(K); print(f); print(true, 1, \"s\");";
        assert_eq!(run(src), "Class K\nFunction f\ntrue1s\n");
    }

    #[test]
    fn comparisons() {
        let src = "print(1 < 2); print(2 <= 2); print(3 >= 4); print(1 != 1); \
                   print(\"abc\" < \"abd\"); print(\"x\" == \"x\"); print(true > false);";
        assert_eq!(run(src), "true\ntrue\nfalse\nfalse\ntrue\ntrue\ntrue\n");
    }

    #[test]
    fn logic_ops() {
        let src = "print(true and false); print(true or false); print(true xor true); print(!false); print(not true);";
        assert_eq!(run(src), "false\ntrue\nfalse\ntrue\nfalse\n");
    }

    #[test]
    fn arithmetic_wraps_and_negates() {
        let src = "var x = 4; print(-x); print(7 / 2); print(10 - 4 - 3); print(9223372036854775807 + 1);";
        assert_eq!(run(src), "-4\n3\n3\n-9223372036854775808\n");
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(run_err("var a = 1;\nprint(a / 0);"), "Error at line 2: Division by zero");
    }

    #[test]
    fn type_checked_stores() {
        let err = run_err("var a = 1;\na = \"s\";");
        assert_eq!(err, "Error at line 2: Cannot assign a string to 'a' holding a number");
        let err = run_err("{ var b = true; b = 3; }");
        assert!(err.contains("Cannot assign a number to a variable holding a boolean"));
        let err = run_err("class C { field f; C(v) { f = v; } } var c = C(1); c.f = false;");
        assert!(err.contains("to field 'f' holding a number"));
        // an unset value takes any type
        assert_eq!(run("var u; u = \"now a string\"; print(u);"), "now a string\n");
    }

    #[test]
    fn mismatched_operands() {
        assert!(run_err("print(1 + \"a\");").contains("Operands of '+' must be two numbers or two strings"));
        assert!(run_err("print(1 == true);").contains("Cannot compare a number with a boolean"));
        assert!(run_err("if (1) print(1);").contains("Condition must be a boolean, found number"));
        assert!(run_err("var s = \"a\"; s++;").contains("Operand of '++' must be a number, found string"));
    }

    #[test]
    fn undefined_identifier() {
        assert_eq!(run_err("print(1);\nprint(nope);"), "Error at line 2: Undefined identifier 'nope'");
    }

    #[test]
    fn declared_but_undefined_function() {
        let err = run_err("func later();\nfunc main() { later(); }\n");
        assert_eq!(err, "Error at line 2: Function 'later' is declared but not defined");
    }

    #[test]
    fn method_errors() {
        assert!(run_err("var x = 1; x.go();").contains("Only instances have methods, found number"));
        assert!(run_err("class A {} var a = A(); a.go();").contains("Undefined method 'go' in class 'A'"));
        assert!(run_err("class A { meth m(x) {} } var a = A(); a.m();").contains("Expected 1 arguments in 'm' method call"));
        assert!(run_err("class A {} var a = A(); print(a.z);").contains("Undefined field 'z' in class 'A'"));
    }

    #[test]
    fn native_errors_carry_the_line() {
        assert_eq!(run_err("\n\nprint(isnum());"), "Error at line 3: Expected 1 argument in 'isnum' function call, found 0");
        let (_, outcome) = run_with("print(1);\nprint(getchar());", &Config::default(), "");
        assert_eq!(outcome.unwrap_err().to_string(), "Error at line 2: Cannot print this expression!");
    }

    #[test]
    fn exit_stops_the_program() {
        let (out, outcome) = run_with("print(1); exit(3); print(2);", &Config::default(), "");
        assert_eq!(out, "1\n");
        assert_eq!(outcome, Ok(Outcome::Exit(3)));
    }

    #[test]
    fn getchar_reads_input() {
        let src = "print(getchar()); print(getchar()); print(isnone(getchar()));";
        let (out, outcome) = run_with(src, &Config::default(), "hi");
        assert_eq!(outcome, Ok(Outcome::Finished));
        assert_eq!(out, "h\ni\ntrue\n");
    }

    #[test]
    fn predicates() {
        let src = "class A {} var a = A(); \
                   print(isnum(1), isstr(\"s\"), isbool(false), isinst(a), isinst(1), isuninit(a));";
        assert_eq!(run(src), "truetruetruetruefalsefalse\n");
    }

    #[test]
    fn stress_collection_keeps_live_objects() {
        let config = Config { gc_stress: true, ..Config::default() };
        let src = "class Box { field v; Box(x) { v = x; } meth get() { return v; } } \
                   var keep = Box(\"kept\"); \
                   for (var i = 0; i < 20; i = i + 1) { var tmp = Box(\"t\" + \"mp\"); } \
                   var s = \"\"; for (var j = 0; j < 5; j++) { s = s + \"x\"; } \
                   print(keep.get()); print(s);";
        let (out, outcome) = run_with(src, &config, "");
        assert_eq!(outcome, Ok(Outcome::Finished));
        assert_eq!(out, "kept\nxxxxx\n");
    }

    #[test]
    fn concatenation_reuses_interned_result() {
        let mut ctx = Context::new();
        let chunk = compile("var a = \"a\" + \"b\"; var b = \"a\" + \"b\"; print(a == b);", &mut ctx).unwrap();
        let mut out = Vec::new();
        let mut input: &[u8] = &[];
        let before = ctx.heap.allocations();
        Vm::new(&mut ctx, &chunk, &Config::default(), &mut out, &mut input).run(crate::context::SCRIPT_ENTRY).unwrap();
        assert_eq!(out, b"true\n");
        assert_eq!(ctx.heap.allocations() - before, 1);
    }

    #[test]
    fn missing_entry_is_fatal() {
        let mut ctx = Context::new();
        let chunk = Chunk::new();
        let mut out = Vec::new();
        let mut input: &[u8] = &[];
        let err = Vm::new(&mut ctx, &chunk, &Config::default(), &mut out, &mut input).run("nowhere").unwrap_err();
        assert_eq!(err, VmError::Fatal("Entry function 'nowhere' not found".into()));
    }

    #[test]
    fn global_holding_none_is_readable() {
        let (out, outcome) = run_with("var c = getchar();\nprint(isnone(c));", &Config::default(), "");
        assert_eq!(outcome, Ok(Outcome::Finished));
        assert_eq!(out, "true\n");
        assert_eq!(run("var r = print(1);\nprint(isnone(r));"), "1\ntrue\n");
    }

    #[test]
    fn global_holding_none_can_be_reassigned() {
        assert_eq!(run("var r = print(1);\nr = 5;\nprint(r + 1);"), "1\n6\n");
    }

    #[test]
    fn global_read_in_function_before_definition_runs() {
        let src = "func f() { return g; }\nprint(isnone(f()));\nvar g = 1;";
        assert_eq!(run_err(src), "Error at line 1: Undefined identifier 'g'");
    }

    #[test]
    fn println_matches_print() {
        assert_eq!(run("println(1, \"a\");\nprint(2);"), "1a\n2\n");
    }

    #[test]
    fn stack_is_clean_after_script() {
        let mut ctx = Context::new();
        let chunk = compile("{ var a = 1; print(a); } var b = 2;", &mut ctx).unwrap();
        let mut out = Vec::new();
        let mut input: &[u8] = &[];
        let mut vm = Vm::new(&mut ctx, &chunk, &Config::default(), &mut out, &mut input);
        assert_eq!(vm.run(crate::context::SCRIPT_ENTRY), Ok(Outcome::Finished));
        assert!(vm.stack().is_empty());
    }
}
