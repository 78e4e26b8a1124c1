use std::fmt;

use serde::Serialize;

use crate::context::Context;
use crate::object::{Object, Value};

// ── Opcodes ──────────────────────────────────────────────────────────
//
// Operands are 4-byte little-endian i32. A `K` operand indexes the constant
// pool; an `n` operand is a literal count, slot or jump distance.

pub(crate) const OP_RETURN: u8 = 0;
pub(crate) const OP_POP: u8 = 1;
pub(crate) const OP_POPN: u8 = 2; // n
pub(crate) const OP_CLARGS: u8 = 3; // n
pub(crate) const OP_JUMP: u8 = 4; // n, relative to the next instruction
pub(crate) const OP_FJUMP: u8 = 5; // n
pub(crate) const OP_NUMBER: u8 = 6; // K
pub(crate) const OP_BOOLEAN: u8 = 7; // n: 0 or 1
pub(crate) const OP_STRING: u8 = 8; // K
pub(crate) const OP_NULL: u8 = 9;

pub(crate) const OP_DEFINE_GLOBAL: u8 = 10; // K: identifier
pub(crate) const OP_SET_GLOBAL: u8 = 11; // K
pub(crate) const OP_GET_GLOBAL: u8 = 12; // K
pub(crate) const OP_SET_LOCAL: u8 = 13; // n: slot relative to bp
pub(crate) const OP_GET_LOCAL: u8 = 14; // n
pub(crate) const OP_GET_FIELD: u8 = 15; // K: field name
pub(crate) const OP_SET_FIELD: u8 = 16; // K

pub(crate) const OP_ADD: u8 = 17;
pub(crate) const OP_SUB: u8 = 18;
pub(crate) const OP_MUL: u8 = 19;
pub(crate) const OP_DIV: u8 = 20;
pub(crate) const OP_AND: u8 = 21;
pub(crate) const OP_OR: u8 = 22;
pub(crate) const OP_XOR: u8 = 23;
pub(crate) const OP_NOT: u8 = 24;
pub(crate) const OP_EQUAL: u8 = 25;
pub(crate) const OP_GREATER: u8 = 26;
pub(crate) const OP_LESS: u8 = 27;

pub(crate) const OP_PUSH_BP: u8 = 28;
pub(crate) const OP_BP_AS_SP: u8 = 29;
pub(crate) const OP_CALL: u8 = 30; // K: function
pub(crate) const OP_NATIVE_CALL: u8 = 31; // K: native
pub(crate) const OP_METHOD: u8 = 32; // K: method name
pub(crate) const OP_INSTANCE: u8 = 33; // K: class

pub(crate) const OP_PREFINCR_LOCAL: u8 = 34; // n
pub(crate) const OP_PREFDECR_LOCAL: u8 = 35;
pub(crate) const OP_POSTINCR_LOCAL: u8 = 36;
pub(crate) const OP_POSTDECR_LOCAL: u8 = 37;
pub(crate) const OP_PREFINCR_GLOBAL: u8 = 38; // K
pub(crate) const OP_PREFDECR_GLOBAL: u8 = 39;
pub(crate) const OP_POSTINCR_GLOBAL: u8 = 40;
pub(crate) const OP_POSTDECR_GLOBAL: u8 = 41;

/// Operand shape of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operand {
    None,
    Literal,
    Constant,
    Jump,
}

pub(crate) fn op_info(op: u8) -> Option<(&'static str, Operand)> {
    use Operand::*;
    let info = match op {
        OP_RETURN => ("RETURN", None),
        OP_POP => ("POP", None),
        OP_POPN => ("POPN", Literal),
        OP_CLARGS => ("CLARGS", Literal),
        OP_JUMP => ("JUMP", Jump),
        OP_FJUMP => ("FJUMP", Jump),
        OP_NUMBER => ("NUMBER", Constant),
        OP_BOOLEAN => ("BOOLEAN", Literal),
        OP_STRING => ("STRING", Constant),
        OP_NULL => ("NULL", None),
        OP_DEFINE_GLOBAL => ("DEFINE_GLOBAL", Constant),
        OP_SET_GLOBAL => ("SET_GLOBAL", Constant),
        OP_GET_GLOBAL => ("GET_GLOBAL", Constant),
        OP_SET_LOCAL => ("SET_LOCAL", Literal),
        OP_GET_LOCAL => ("GET_LOCAL", Literal),
        OP_GET_FIELD => ("GET_FIELD", Constant),
        OP_SET_FIELD => ("SET_FIELD", Constant),
        OP_ADD => ("ADD", None),
        OP_SUB => ("SUB", None),
        OP_MUL => ("MUL", None),
        OP_DIV => ("DIV", None),
        OP_AND => ("AND", None),
        OP_OR => ("OR", None),
        OP_XOR => ("XOR", None),
        OP_NOT => ("NOT", None),
        OP_EQUAL => ("EQUAL", None),
        OP_GREATER => ("GREATER", None),
        OP_LESS => ("LESS", None),
        OP_PUSH_BP => ("PUSH_BP", None),
        OP_BP_AS_SP => ("BP_AS_SP", None),
        OP_CALL => ("CALL", Constant),
        OP_NATIVE_CALL => ("NATIVE_CALL", Constant),
        OP_METHOD => ("METHOD", Constant),
        OP_INSTANCE => ("INSTANCE", Constant),
        OP_PREFINCR_LOCAL => ("PREFINCR_LOCAL", Literal),
        OP_PREFDECR_LOCAL => ("PREFDECR_LOCAL", Literal),
        OP_POSTINCR_LOCAL => ("POSTINCR_LOCAL", Literal),
        OP_POSTDECR_LOCAL => ("POSTDECR_LOCAL", Literal),
        OP_PREFINCR_GLOBAL => ("PREFINCR_GLOBAL", Constant),
        OP_PREFDECR_GLOBAL => ("PREFDECR_GLOBAL", Constant),
        OP_POSTINCR_GLOBAL => ("POSTINCR_GLOBAL", Constant),
        OP_POSTDECR_GLOBAL => ("POSTDECR_GLOBAL", Constant),
        _ => return Option::None,
    };
    Some(info)
}

/// Operand written by `write_jump` until the jump is patched.
pub const JUMP_PLACEHOLDER: i32 = -4;

const OPERAND_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("operand offset {offset} is outside the chunk (size {size})")]
    OutOfBounds { offset: usize, size: usize },
    #[error("jump distance {0} does not fit in an operand")]
    TooFar(usize),
}

// ── Chunk ────────────────────────────────────────────────────────────

/// Flat bytecode for a whole program plus its constant pool.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    /// Source line of every code byte.
    pub lines: Vec<u32>,
    pub data: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn write_simple_op(&mut self, op: u8, line: u32) {
        self.code.push(op);
        self.lines.push(line);
    }

    /// Appends a raw operand. Returns its offset.
    pub fn write_constant(&mut self, operand: i32, line: u32) -> usize {
        let offset = self.code.len();
        self.code.extend_from_slice(&operand.to_le_bytes());
        self.lines.extend([line; OPERAND_SIZE]);
        offset
    }

    /// Opcode followed by a literal operand.
    pub fn write_op(&mut self, op: u8, operand: i32, line: u32) -> usize {
        self.write_simple_op(op, line);
        self.write_constant(operand, line)
    }

    /// Adds `value` to the constant pool and writes its index.
    pub fn write_value(&mut self, value: Value, line: u32) -> usize {
        let index = self.add_value(value);
        self.write_constant(index, line)
    }

    /// Opcode followed by a constant-pool operand.
    pub fn write_op_value(&mut self, op: u8, value: Value, line: u32) -> usize {
        self.write_simple_op(op, line);
        self.write_value(value, line)
    }

    fn add_value(&mut self, value: Value) -> i32 {
        if let Some(i) = self.data.iter().position(|&v| v == value) {
            return i as i32;
        }
        self.data.push(value);
        (self.data.len() - 1) as i32
    }

    pub fn rewrite_constant(&mut self, offset: usize, operand: i32) -> Result<(), PatchError> {
        let size = self.code.len();
        let slot = self
            .code
            .get_mut(offset..offset + OPERAND_SIZE)
            .ok_or(PatchError::OutOfBounds { offset, size })?;
        slot.copy_from_slice(&operand.to_le_bytes());
        Ok(())
    }

    pub fn read_operand(&self, offset: usize) -> Option<i32> {
        let bytes = self.code.get(offset..offset + OPERAND_SIZE)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Emits a jump with a placeholder distance. Returns the operand offset
    /// for `patch_jump`.
    pub fn write_jump(&mut self, op: u8, line: u32) -> usize {
        self.write_op(op, JUMP_PLACEHOLDER, line)
    }

    /// Points the jump at `offset` to the current end of code.
    pub fn patch_jump(&mut self, offset: usize) -> Result<(), PatchError> {
        self.patch_jump_to(offset, self.code.len())
    }

    pub fn patch_jump_to(&mut self, offset: usize, target: usize) -> Result<(), PatchError> {
        let distance = target as i64 - (offset + OPERAND_SIZE) as i64;
        let distance = i32::try_from(distance).map_err(|_| PatchError::TooFar(target))?;
        self.rewrite_constant(offset, distance)
    }

    /// Unconditional backward jump to `start`.
    pub fn write_loop(&mut self, start: usize, line: u32) {
        self.write_simple_op(OP_JUMP, line);
        let from = self.code.len() + OPERAND_SIZE;
        let distance = start as i64 - from as i64;
        self.write_constant(distance as i32, line);
    }

    pub fn line_at(&self, offset: usize) -> u32 {
        self.lines.get(offset).or(self.lines.last()).copied().unwrap_or(0)
    }

    pub fn disassemble(&self, ctx: &Context) -> Vec<Instruction> {
        let mut out = Vec::new();
        let mut ip = 0;
        while ip < self.code.len() {
            let offset = ip;
            let byte = self.code[ip];
            ip += 1;
            let line = self.line_at(offset);
            let Some((op, shape)) = op_info(byte) else {
                out.push(Instruction {
                    offset,
                    line,
                    op: "UNKNOWN",
                    operand: Some(i32::from(byte)),
                    detail: None,
                });
                continue;
            };
            if shape == Operand::None {
                out.push(Instruction { offset, line, op, operand: None, detail: None });
                continue;
            }
            let operand = self.read_operand(ip);
            ip += OPERAND_SIZE;
            let detail = match (shape, operand) {
                (Operand::Jump, Some(d)) => Some(format!("-> {}", ip as i64 + i64::from(d))),
                (Operand::Constant, Some(k)) => {
                    let value = usize::try_from(k).ok().and_then(|k| self.data.get(k));
                    Some(value.map_or("<bad constant>".to_string(), |v| describe_value(ctx, *v)))
                }
                (_, None) => Some("<truncated>".to_string()),
                _ => None,
            };
            out.push(Instruction { offset, line, op, operand, detail });
        }
        out
    }
}

/// Constant rendering for listings.
pub fn describe_value(ctx: &Context, value: Value) -> String {
    match value {
        Value::None => "none".into(),
        Value::Uninit => "NULL".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Obj(r) => match ctx.heap.get(r) {
            None => "<freed>".into(),
            Some(Object::String(s)) => format!("{:?}", &*s.text),
            Some(Object::Identifier(s)) => s.text.to_string(),
            Some(Object::Function(f)) => format!("<func {}/{}>", ctx.name(f.name), f.arity),
            Some(Object::Native(n)) => format!("<native {}>", ctx.name(n.name)),
            Some(Object::Class(c)) => format!("<class {}>", ctx.name(c.name)),
            Some(Object::Instance(_)) => "<instance>".into(),
        },
    }
}

/// Jump sites waiting for a common target.
#[derive(Debug, Clone, Default)]
pub struct PatchList {
    sites: Vec<usize>,
}

impl PatchList {
    pub fn new() -> Self {
        PatchList::default()
    }

    pub fn push(&mut self, offset: usize) {
        self.sites.push(offset);
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn patch_all(self, chunk: &mut Chunk, target: usize) -> Result<(), PatchError> {
        for offset in self.sites {
            chunk.patch_jump_to(offset, target)?;
        }
        Ok(())
    }
}

// ── Listing ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Instruction {
    pub offset: usize,
    pub line: u32,
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operand: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04} {:>4} {:<16}", self.offset, self.line, self.op)?;
        if let Some(n) = self.operand {
            write!(f, " {n:>5}")?;
        }
        if let Some(d) = &self.detail {
            write!(f, "  {d}")?;
        }
        Ok(())
    }
}
