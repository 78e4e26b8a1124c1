use crate::context::Context;
use crate::object::{ObjRef, Object, Value};

/// Outcome of one collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub marked: usize,
    pub freed: usize,
    pub interned_dropped: usize,
}

/// Stop-the-world mark and sweep.
///
/// Roots are the values resident in every stack frame, every key and value
/// of the global namespace, and the chunk constants. The string table is
/// weak: an interned string survives only when something else reaches it.
pub fn collect(ctx: &mut Context, stack: &[Value], bp: usize, constants: &[Value]) -> GcStats {
    let mut gray: Vec<ObjRef> = Vec::new();
    let mut marked = 0;

    for range in frames(stack, bp) {
        for &value in &stack[range] {
            root(ctx, value, &mut gray);
        }
    }
    for &value in constants {
        root(ctx, value, &mut gray);
    }
    let globals: Vec<(ObjRef, Value)> = ctx.globals.iter().collect();
    for (key, value) in globals {
        root(ctx, Value::Obj(key), &mut gray);
        root(ctx, value, &mut gray);
    }

    while let Some(r) = gray.pop() {
        marked += 1;
        for child in children(ctx, r) {
            root(ctx, child, &mut gray);
        }
    }

    let heap = &ctx.heap;
    let interned_dropped = ctx.strings.retain(|k| heap.is_marked(k));
    let freed = ctx.heap.sweep();

    let stats = GcStats { marked, freed, interned_dropped };
    tracing::debug!(
        marked = stats.marked,
        freed = stats.freed,
        interned_dropped = stats.interned_dropped,
        live = ctx.heap.live(),
        "gc cycle"
    );
    stats
}

/// Stack ranges owned by each frame, innermost first. A frame header is
/// `[return_ip, saved_bp]` directly below its base pointer. A header that does
/// not look like one ends the walk with the rest of the stack as one range.
fn frames(stack: &[Value], bp: usize) -> Vec<std::ops::Range<usize>> {
    let mut out = Vec::new();
    let mut top = stack.len();
    let mut base = bp.min(top);
    while base >= 2 {
        out.push(base..top);
        match stack[base - 1] {
            Value::Number(saved) if saved >= 0 && (saved as usize) <= base - 2 => {
                top = base - 2;
                base = saved as usize;
            }
            _ => {
                top = base;
                base = 0;
            }
        }
    }
    out.push(base..top);
    out
}

fn root(ctx: &mut Context, value: Value, gray: &mut Vec<ObjRef>) {
    if let Value::Obj(r) = value {
        if ctx.heap.mark(r) {
            gray.push(r);
        }
    }
}

/// Outgoing references of one object.
fn children(ctx: &Context, r: ObjRef) -> Vec<Value> {
    let Some(object) = ctx.heap.get(r) else {
        return Vec::new();
    };
    match object {
        Object::String(_) | Object::Identifier(_) => Vec::new(),
        Object::Function(f) => vec![Value::Obj(f.name)],
        Object::Native(n) => vec![Value::Obj(n.name)],
        Object::Class(c) => {
            let mut out = vec![Value::Obj(c.name)];
            for table in [&c.fields, &c.methods] {
                for (key, value) in table.iter() {
                    out.push(Value::Obj(key));
                    out.push(value);
                }
            }
            out.extend(c.constructors.iter().map(|&k| Value::Obj(k)));
            out.extend(c.default_constructor.map(Value::Obj));
            out
        }
        Object::Instance(i) => {
            let mut out = Vec::with_capacity(i.fields.len() + 1);
            out.push(Value::Obj(i.class));
            out.extend(i.fields.iter().copied());
            out
        }
    }
}

/// Releases every object and empties both namespaces. Run once at shutdown.
pub fn cleanup(ctx: &mut Context) -> usize {
    ctx.globals.clear();
    ctx.clear_bindings();
    ctx.strings.clear();
    let freed = ctx.heap.free_all();
    tracing::debug!(freed, "heap released");
    freed
}
