use std::fmt;

use crate::natives::NativeFn;
use crate::table::Table;

// ── Values ───────────────────────────────────────────────────────────

/// Handle to a heap object. The generation guards against reusing a handle
/// after its slot was swept and reallocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// A name that exists but was never given a value.
    None,
    /// Default content of fresh instance fields and the result of `NULL`.
    Uninit,
    Bool(bool),
    Number(i64),
    Obj(ObjRef),
}

impl Value {
    pub fn is_sentinel(self) -> bool {
        matches!(self, Value::None | Value::Uninit)
    }

    pub fn as_obj(self) -> Option<ObjRef> {
        match self {
            Value::Obj(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_number(self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Type name used in error messages.
    pub fn type_name(self, heap: &Heap) -> &'static str {
        match self {
            Value::None => "none",
            Value::Uninit => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Obj(r) => heap.kind_of(r),
        }
    }

    /// Assignment compatibility: a sentinel may be overwritten by anything,
    /// otherwise both sides must carry the same kind of value.
    pub fn accepts(self, new: Value, heap: &Heap) -> bool {
        match (self, new) {
            (Value::None | Value::Uninit, _) => true,
            (Value::Bool(_), Value::Bool(_)) | (Value::Number(_), Value::Number(_)) => true,
            (Value::Obj(a), Value::Obj(b)) => heap.kind_of(a) == heap.kind_of(b),
            _ => false,
        }
    }
}

// ── Objects ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StrObj {
    pub text: Box<str>,
    pub hash: u32,
}

#[derive(Debug, Clone)]
pub struct FunctionObj {
    pub name: ObjRef,
    pub arity: usize,
    /// Code offset of the preamble; `None` while only declared.
    pub entry: Option<usize>,
}

#[derive(Clone)]
pub struct NativeObj {
    pub name: ObjRef,
    pub arity: Option<usize>,
    pub function: NativeFn,
}

impl fmt::Debug for NativeObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeObj").field("name", &self.name).field("arity", &self.arity).finish()
    }
}

pub const MAX_CONSTRUCTORS: usize = 16;

#[derive(Debug)]
pub struct ClassObj {
    pub name: ObjRef,
    /// Field name -> `Number(offset)`. Its length is the instance size.
    pub fields: Table,
    /// Method name -> `Obj(function)`.
    pub methods: Table,
    /// Explicit constructors, pairwise distinct in arity.
    pub constructors: Vec<ObjRef>,
    /// Zero-argument constructor, explicit or synthesized.
    pub default_constructor: Option<ObjRef>,
}

#[derive(Debug)]
pub struct InstanceObj {
    pub class: ObjRef,
    pub fields: Vec<Value>,
}

#[derive(Debug)]
pub enum Object {
    String(StrObj),
    Identifier(StrObj),
    Function(FunctionObj),
    Native(NativeObj),
    Class(ClassObj),
    Instance(InstanceObj),
}

impl Object {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Object::String(_) | Object::Identifier(_) => "string",
            Object::Function(_) => "function",
            Object::Native(_) => "native function",
            Object::Class(_) => "class",
            Object::Instance(_) => "instance",
        }
    }

    pub fn as_str(&self) -> Option<&StrObj> {
        match self {
            Object::String(s) | Object::Identifier(s) => Some(s),
            _ => None,
        }
    }
}

// ── Heap ─────────────────────────────────────────────────────────────

struct Cell {
    object: Object,
    marked: bool,
}

struct Slot {
    generation: u32,
    cell: Option<Cell>,
}

pub const DEFAULT_GC_THRESHOLD: usize = 256;

/// Owning registry for every heap object. Freed slots are reused through a
/// free list; each reuse bumps the slot generation.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    allocations: usize,
    initial_threshold: usize,
    next_gc: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::with_threshold(DEFAULT_GC_THRESHOLD)
    }
}

impl Heap {
    pub fn with_threshold(threshold: usize) -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            allocations: 0,
            initial_threshold: threshold,
            next_gc: threshold,
        }
    }

    pub fn alloc(&mut self, object: Object) -> ObjRef {
        self.live += 1;
        self.allocations += 1;
        let cell = Some(Cell { object, marked: false });
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.cell = cell;
            return ObjRef { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, cell });
        ObjRef { index, generation: 0 }
    }

    fn cell(&self, r: ObjRef) -> Option<&Cell> {
        self.slots
            .get(r.index as usize)
            .filter(|s| s.generation == r.generation)
            .and_then(|s| s.cell.as_ref())
    }

    fn cell_mut(&mut self, r: ObjRef) -> Option<&mut Cell> {
        self.slots
            .get_mut(r.index as usize)
            .filter(|s| s.generation == r.generation)
            .and_then(|s| s.cell.as_mut())
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        self.cell(r).is_some()
    }

    /// `None` for a handle whose object has been freed.
    pub fn get(&self, r: ObjRef) -> Option<&Object> {
        self.cell(r).map(|c| &c.object)
    }

    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut Object> {
        self.cell_mut(r).map(|c| &mut c.object)
    }

    /// Kind of the object behind `r`, for messages.
    pub fn kind_of(&self, r: ObjRef) -> &'static str {
        self.get(r).map_or("freed object", Object::kind_name)
    }

    // ---- typed accessors ----

    pub fn string(&self, r: ObjRef) -> Option<&StrObj> {
        self.get(r).and_then(Object::as_str)
    }

    /// Spelling of a string or identifier; other objects yield their kind.
    pub fn text(&self, r: ObjRef) -> &str {
        match self.get(r) {
            Some(Object::String(s) | Object::Identifier(s)) => &s.text,
            other => other.map_or("freed object", Object::kind_name),
        }
    }

    pub fn hash_of(&self, r: ObjRef) -> u32 {
        self.string(r).map_or(0, |s| s.hash)
    }

    pub fn function(&self, r: ObjRef) -> Option<&FunctionObj> {
        match self.get(r) {
            Some(Object::Function(f)) => Some(f),
            _ => None,
        }
    }

    pub fn function_mut(&mut self, r: ObjRef) -> Option<&mut FunctionObj> {
        match self.get_mut(r) {
            Some(Object::Function(f)) => Some(f),
            _ => None,
        }
    }

    pub fn native(&self, r: ObjRef) -> Option<&NativeObj> {
        match self.get(r) {
            Some(Object::Native(n)) => Some(n),
            _ => None,
        }
    }

    pub fn class(&self, r: ObjRef) -> Option<&ClassObj> {
        match self.get(r) {
            Some(Object::Class(c)) => Some(c),
            _ => None,
        }
    }

    pub fn class_mut(&mut self, r: ObjRef) -> Option<&mut ClassObj> {
        match self.get_mut(r) {
            Some(Object::Class(c)) => Some(c),
            _ => None,
        }
    }

    pub fn instance(&self, r: ObjRef) -> Option<&InstanceObj> {
        match self.get(r) {
            Some(Object::Instance(i)) => Some(i),
            _ => None,
        }
    }

    pub fn instance_mut(&mut self, r: ObjRef) -> Option<&mut InstanceObj> {
        match self.get_mut(r) {
            Some(Object::Instance(i)) => Some(i),
            _ => None,
        }
    }

    // ---- collector support ----

    /// Sets the mark bit. Returns true if the object was not marked before.
    pub fn mark(&mut self, r: ObjRef) -> bool {
        match self.cell_mut(r) {
            Some(c) if !c.marked => {
                c.marked = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_marked(&self, r: ObjRef) -> bool {
        self.cell(r).is_some_and(|c| c.marked)
    }

    /// Frees every unmarked object and clears the mark on survivors.
    /// Returns the number of objects freed.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match &mut slot.cell {
                Some(c) if c.marked => c.marked = false,
                Some(_) => {
                    slot.cell = None;
                    self.free.push(index as u32);
                    freed += 1;
                }
                None => {}
            }
        }
        self.live -= freed;
        self.next_gc = (self.live * 2).max(self.initial_threshold);
        freed
    }

    /// Unconditionally frees everything.
    pub fn free_all(&mut self) -> usize {
        let freed = self.live;
        self.slots.clear();
        self.free.clear();
        self.live = 0;
        self.next_gc = self.initial_threshold;
        freed
    }

    pub fn should_collect(&self) -> bool {
        self.live > self.next_gc
    }

    pub fn live(&self) -> usize {
        self.live
    }

    /// Total allocations over the heap's lifetime.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjRef, &Object)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.cell.as_ref().map(|c| {
                (ObjRef { index: i as u32, generation: s.generation }, &c.object)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(text: &str) -> Object {
        Object::String(StrObj { text: text.into(), hash: crate::table::hash_string(text) })
    }

    #[test]
    fn alloc_and_read_back() {
        let mut heap = Heap::default();
        let r = heap.alloc(string("hello"));
        assert_eq!(heap.text(r), "hello");
        assert_eq!(heap.live(), 1);
        assert!(heap.contains(r));
    }

    #[test]
    fn sweep_frees_unmarked_and_clears_marks() {
        let mut heap = Heap::default();
        let keep = heap.alloc(string("keep"));
        let drop = heap.alloc(string("drop"));
        assert!(heap.mark(keep));
        assert!(!heap.mark(keep));
        assert_eq!(heap.sweep(), 1);
        assert!(heap.contains(keep));
        assert!(!heap.contains(drop));
        assert!(!heap.is_marked(keep));
    }

    #[test]
    fn reused_slot_invalidates_old_handle() {
        let mut heap = Heap::default();
        let old = heap.alloc(string("a"));
        heap.sweep();
        let new = heap.alloc(string("b"));
        assert!(!heap.contains(old));
        assert_eq!(heap.text(new), "b");
        assert_eq!(heap.allocations(), 2);
    }

    #[test]
    fn freed_handle_reads_as_absent() {
        let mut heap = Heap::default();
        let gone = heap.alloc(string("gone"));
        heap.sweep();
        assert!(heap.get(gone).is_none());
        assert!(heap.get_mut(gone).is_none());
        assert_eq!(heap.kind_of(gone), "freed object");
        assert_eq!(heap.string(gone), None);
    }

    #[test]
    fn threshold_tracks_live_objects() {
        let mut heap = Heap::with_threshold(2);
        for i in 0..3 {
            heap.alloc(string(&i.to_string()));
        }
        assert!(heap.should_collect());
        heap.sweep();
        assert!(!heap.should_collect());
        assert_eq!(heap.free_all(), 0);
    }

    #[test]
    fn value_assignment_compatibility() {
        let mut heap = Heap::default();
        let s = Value::Obj(heap.alloc(string("s")));
        assert!(Value::None.accepts(Value::Number(1), &heap));
        assert!(Value::Uninit.accepts(s, &heap));
        assert!(Value::Number(3).accepts(Value::Number(4), &heap));
        assert!(!Value::Number(3).accepts(Value::Bool(true), &heap));
        assert!(!s.accepts(Value::Number(1), &heap));
        assert_eq!(s.type_name(&heap), "string");
    }
}
