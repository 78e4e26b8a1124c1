use std::collections::HashSet;

use crate::natives;
use crate::object::{FunctionObj, Heap, NativeObj, ObjRef, Object, StrObj, Value};
use crate::table::{Table, hash_string};

/// Name under which the top-level statements are registered. It cannot be
/// spelled as an identifier in source.
pub const SCRIPT_ENTRY: &str = "<script>";

/// Everything an interpreter session owns: the object heap, the global
/// namespace and the string interning pool.
pub struct Context {
    pub heap: Heap,
    /// Identifier -> value. Every identifier the lexer has seen is a key.
    pub globals: Table,
    /// Identifiers that have been given a value. A bound name may still
    /// hold `None`, e.g. the result of `getchar()` at end of input.
    bound: HashSet<ObjRef>,
    /// Interned string literals and concatenation results.
    pub strings: Table,
    /// The `this` identifier, interned once.
    pub this_id: ObjRef,
    /// Set by the `exit` native.
    pub exit_code: Option<i32>,
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Context::with_heap(Heap::default())
    }

    pub fn with_heap(mut heap: Heap) -> Self {
        let mut globals = Table::new();
        let hash = hash_string("this");
        let this_id = heap.alloc(Object::Identifier(StrObj { text: "this".into(), hash }));
        globals.set(this_id, hash, Value::None);

        let mut ctx = Context {
            heap,
            globals,
            bound: HashSet::new(),
            strings: Table::new(),
            this_id,
            exit_code: None,
        };
        natives::register_all(&mut ctx);
        ctx
    }

    /// Interns `text` as an identifier. First sight allocates the object and
    /// enters it, unbound, in the global namespace.
    pub fn intern_identifier(&mut self, text: &str) -> ObjRef {
        let hash = hash_string(text);
        if let Some(r) = self.globals.find_str(&self.heap, text, hash) {
            return r;
        }
        let r = self.heap.alloc(Object::Identifier(StrObj { text: text.into(), hash }));
        self.globals.set(r, hash, Value::None);
        r
    }

    /// Interns `text` as a string value through the string table.
    pub fn intern_string(&mut self, text: &str) -> ObjRef {
        let hash = hash_string(text);
        if let Some(r) = self.strings.find_str(&self.heap, text, hash) {
            return r;
        }
        let r = self.heap.alloc(Object::String(StrObj { text: text.into(), hash }));
        self.strings.set(r, hash, Value::Bool(true));
        r
    }

    /// Value bound to `id`, or `None` if nothing has been bound yet.
    pub fn global(&self, id: ObjRef) -> Option<Value> {
        if !self.bound.contains(&id) {
            return None;
        }
        self.globals.get(id, self.heap.hash_of(id))
    }

    pub fn is_bound(&self, id: ObjRef) -> bool {
        self.bound.contains(&id)
    }

    pub fn set_global(&mut self, id: ObjRef, value: Value) {
        let hash = self.heap.hash_of(id);
        self.globals.set(id, hash, value);
        self.bound.insert(id);
    }

    /// Forgets every binding. Used at shutdown with the globals table.
    pub fn clear_bindings(&mut self) {
        self.bound.clear();
    }

    pub fn name(&self, r: ObjRef) -> &str {
        self.heap.text(r)
    }

    pub fn new_function(&mut self, name: ObjRef, arity: usize) -> ObjRef {
        self.heap.alloc(Object::Function(FunctionObj { name, arity, entry: None }))
    }

    pub fn define_native(&mut self, name: &str, arity: Option<usize>, function: natives::NativeFn) {
        let id = self.intern_identifier(name);
        let native = self.heap.alloc(Object::Native(NativeObj { name: id, arity, function }));
        self.set_global(id, Value::Obj(native));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_interned_once() {
        let mut ctx = Context::new();
        let a = ctx.intern_identifier("counter");
        let b = ctx.intern_identifier("counter");
        assert_eq!(a, b);
        assert_eq!(ctx.global(a), None);
        assert!(!ctx.is_bound(a));
    }

    #[test]
    fn none_is_a_bindable_value() {
        let mut ctx = Context::new();
        let c = ctx.intern_identifier("c");
        ctx.set_global(c, Value::None);
        assert!(ctx.is_bound(c));
        assert_eq!(ctx.global(c), Some(Value::None));
    }

    #[test]
    fn strings_and_identifiers_use_separate_pools() {
        let mut ctx = Context::new();
        let id = ctx.intern_identifier("word");
        let s = ctx.intern_string("word");
        assert_ne!(id, s);
        assert_eq!(ctx.intern_string("word"), s);
        assert!(matches!(ctx.heap.get(s), Some(Object::String(_))));
    }

    #[test]
    fn empty_and_prefix_strings_stay_distinct() {
        let mut ctx = Context::new();
        let empty = ctx.intern_string("");
        let ab = ctx.intern_string("ab");
        let abc = ctx.intern_string("abc");
        assert_eq!(ctx.intern_string(""), empty);
        assert_ne!(ab, abc);
        assert_eq!(ctx.intern_string("abc"), abc);
    }

    #[test]
    fn natives_are_bound_at_startup() {
        let mut ctx = Context::new();
        let print = ctx.intern_identifier("print");
        let bound = ctx.global(print).and_then(Value::as_obj);
        assert!(bound.is_some_and(|r| ctx.heap.native(r).is_some()));
    }

    #[test]
    fn this_is_a_regular_identifier() {
        let mut ctx = Context::new();
        let this = ctx.this_id;
        assert_eq!(ctx.intern_identifier("this"), this);
    }
}
