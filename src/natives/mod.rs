use std::io::{Read, Write};
use std::time::Instant;

use crate::context::Context;
use crate::object::{Object, Value};

/// What a native function may touch while it runs.
pub struct Host<'a> {
    pub ctx: &'a mut Context,
    pub out: &'a mut dyn Write,
    pub input: &'a mut dyn Read,
    pub started: Instant,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct NativeError(pub String);

/// Arguments arrive in call order.
pub type NativeFn = fn(&mut Host<'_>, &[Value]) -> Result<Value, NativeError>;

pub fn register_all(ctx: &mut Context) {
    ctx.define_native("clock", Some(0), native_clock);
    ctx.define_native("print", None, native_print);
    // Alias: `print` already ends the line.
    ctx.define_native("println", None, native_print);
    ctx.define_native("isnum", Some(1), native_isnum);
    ctx.define_native("isstr", Some(1), native_isstr);
    ctx.define_native("isbool", Some(1), native_isbool);
    ctx.define_native("isinst", Some(1), native_isinst);
    ctx.define_native("isnone", Some(1), native_isnone);
    ctx.define_native("isuninit", Some(1), native_isuninit);
    ctx.define_native("exit", Some(1), native_exit);
    ctx.define_native("getchar", Some(0), native_getchar);
}

fn expect_args(name: &str, args: &[Value], expected: usize) -> Result<(), NativeError> {
    if args.len() != expected {
        let noun = if expected == 1 { "argument" } else { "arguments" };
        return Err(NativeError(format!(
            "Expected {expected} {noun} in '{name}' function call, found {}",
            args.len()
        )));
    }
    Ok(())
}

// ── Time and process ─────────────────────────────────────────────────

fn native_clock(host: &mut Host<'_>, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("clock", args, 0)?;
    Ok(Value::Number(host.started.elapsed().as_secs() as i64))
}

fn native_exit(host: &mut Host<'_>, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("exit", args, 1)?;
    let Value::Number(code) = args[0] else {
        return Err(NativeError("Expected number as argument in 'exit' function call".into()));
    };
    let code = i32::try_from(code).map_err(|_| NativeError(format!("Exit code {code} is out of range")))?;
    host.ctx.exit_code = Some(code);
    Ok(Value::None)
}

fn native_getchar(host: &mut Host<'_>, args: &[Value]) -> Result<Value, NativeError> {
    expect_args("getchar", args, 0)?;
    let mut buf = [0u8; 4];
    let n = host.input.read(&mut buf[..1]).map_err(|e| NativeError(format!("getchar: {e}")))?;
    if n == 0 {
        return Ok(Value::None);
    }
    let width = utf8_width(buf[0]);
    let mut len = 1;
    while len < width {
        match host.input.read(&mut buf[len..width]) {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(e) => return Err(NativeError(format!("getchar: {e}"))),
        }
    }
    // Malformed input becomes U+FFFD rather than an error.
    let ch = String::from_utf8_lossy(&buf[..len]).into_owned();
    Ok(Value::Obj(host.ctx.intern_string(&ch)))
}

/// Encoded length announced by a UTF-8 leading byte.
fn utf8_width(lead: u8) -> usize {
    match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

// ── Output ───────────────────────────────────────────────────────────

/// Textual form used by `print`. `None` has no printable form.
pub fn render(ctx: &Context, value: Value) -> Option<String> {
    let text = match value {
        Value::None => return None,
        Value::Uninit => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Obj(r) => match ctx.heap.get(r)? {
            Object::String(s) | Object::Identifier(s) => s.text.to_string(),
            Object::Instance(i) => format!("Instance of class {}", ctx.name(class_name(ctx, i.class))),
            Object::Class(c) => format!("Class {}", ctx.name(c.name)),
            Object::Function(f) => format!("Function {}", ctx.name(f.name)),
            Object::Native(n) => format!("Native function {}", ctx.name(n.name)),
        },
    };
    Some(text)
}

fn class_name(ctx: &Context, class: crate::object::ObjRef) -> crate::object::ObjRef {
    ctx.heap.class(class).map_or(class, |c| c.name)
}

fn native_print(host: &mut Host<'_>, args: &[Value]) -> Result<Value, NativeError> {
    let mut line = String::new();
    for &arg in args {
        match render(&*host.ctx, arg) {
            Some(text) => line.push_str(&text),
            None => return Err(NativeError("Cannot print this expression!".into())),
        }
    }
    writeln!(host.out, "{line}").map_err(|e| NativeError(format!("print: {e}")))?;
    Ok(Value::None)
}

// ── Type predicates ──────────────────────────────────────────────────

macro_rules! predicate {
    ($fn_name:ident, $name:literal, |$ctx:ident, $v:ident| $test:expr) => {
        fn $fn_name(host: &mut Host<'_>, args: &[Value]) -> Result<Value, NativeError> {
            expect_args($name, args, 1)?;
            let $ctx: &Context = &*host.ctx;
            let $v = args[0];
            Ok(Value::Bool($test))
        }
    };
}

predicate!(native_isnum, "isnum", |_ctx, v| matches!(v, Value::Number(_)));
predicate!(native_isbool, "isbool", |_ctx, v| matches!(v, Value::Bool(_)));
predicate!(native_isnone, "isnone", |_ctx, v| v == Value::None);
predicate!(native_isuninit, "isuninit", |_ctx, v| v == Value::Uninit);
predicate!(native_isstr, "isstr", |ctx, v| {
    v.as_obj().is_some_and(|r| matches!(ctx.heap.get(r), Some(Object::String(_))))
});
predicate!(native_isinst, "isinst", |ctx, v| {
    v.as_obj().is_some_and(|r| ctx.heap.instance(r).is_some())
});
