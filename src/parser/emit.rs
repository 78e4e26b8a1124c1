use crate::ast::{BinOp, Expr, Span, Spanned};
use crate::bytecode::*;
use crate::object::{ObjRef, Object, Value};
use crate::scope::{Binding, FunctionKind};

use super::{Compiler, Result};

/// What a call site resolves to at compile time.
enum Callee {
    Method,
    Function(ObjRef),
    Native(ObjRef),
}

impl Compiler<'_, '_> {
    pub(super) fn emit_expr(&mut self, expr: &Spanned<Expr>) -> Result<()> {
        let line = self.line_of(expr.span);
        match &expr.node {
            Expr::Number(n) => {
                self.chunk.write_op_value(OP_NUMBER, Value::Number(*n), line);
            }
            Expr::Bool(b) => {
                self.chunk.write_op(OP_BOOLEAN, i32::from(*b), line);
            }
            Expr::Str(r) => {
                self.chunk.write_op_value(OP_STRING, Value::Obj(*r), line);
            }
            Expr::Ident(name) => {
                let ctx = &*self.ctx;
                self.scope
                    .write_get_var(ctx, &mut self.chunk, *name, line)
                    .map_err(|e| self.scope_error(e, expr.span))?;
            }
            Expr::This => self.emit_this(expr.span, line)?,
            Expr::Not(operand) => {
                self.emit_expr(operand)?;
                self.chunk.write_simple_op(OP_NOT, line);
            }
            Expr::Binary { op, left, right } => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.emit_binary(*op, line);
            }
            Expr::Assign { target, value } => self.emit_assign(target, value, line)?,
            Expr::IncDec { kind, name } => {
                let ctx = &*self.ctx;
                self.scope
                    .write_incdec(ctx, &mut self.chunk, *name, *kind, line)
                    .map_err(|e| self.scope_error(e, expr.span))?;
            }
            Expr::Call { callee, args } => self.emit_call(*callee, args, expr.span)?,
            Expr::Property { object, name } => {
                self.emit_expr(object)?;
                self.chunk.write_op_value(OP_GET_FIELD, Value::Obj(*name), line);
            }
            Expr::MethodCall { object, name, args } => {
                self.emit_expr(object)?;
                self.emit_method_call(*name, args, line)?;
            }
        }
        Ok(())
    }

    fn emit_this(&mut self, span: Span, line: u32) -> Result<()> {
        let ctx = &*self.ctx;
        self.scope
            .write_this(ctx, &mut self.chunk, line)
            .map_err(|e| self.scope_error(e, span))
    }

    fn emit_binary(&mut self, op: BinOp, line: u32) {
        let (code, negate) = match op {
            BinOp::Add => (OP_ADD, false),
            BinOp::Sub => (OP_SUB, false),
            BinOp::Mul => (OP_MUL, false),
            BinOp::Div => (OP_DIV, false),
            BinOp::And => (OP_AND, false),
            BinOp::Or => (OP_OR, false),
            BinOp::Xor => (OP_XOR, false),
            BinOp::Equal => (OP_EQUAL, false),
            BinOp::Greater => (OP_GREATER, false),
            BinOp::Less => (OP_LESS, false),
            // a != b is !(a == b), a >= b is !(a < b), a <= b is !(a > b)
            BinOp::NotEqual => (OP_EQUAL, true),
            BinOp::GreaterEqual => (OP_LESS, true),
            BinOp::LessEqual => (OP_GREATER, true),
        };
        self.chunk.write_simple_op(code, line);
        if negate {
            self.chunk.write_simple_op(OP_NOT, line);
        }
    }

    fn emit_assign(&mut self, target: &Spanned<Expr>, value: &Spanned<Expr>, line: u32) -> Result<()> {
        match &target.node {
            Expr::Ident(name) => {
                let binding = self
                    .scope
                    .resolve(&*self.ctx, *name)
                    .map_err(|e| self.scope_error(e, target.span))?;
                if let Binding::Field(_) = binding {
                    self.emit_this(target.span, line)?;
                }
                self.emit_expr(value)?;
                self.scope.write_set_var(&mut self.chunk, binding, line);
            }
            Expr::Property { object, name } => {
                self.emit_expr(object)?;
                self.emit_expr(value)?;
                self.chunk.write_op_value(OP_SET_FIELD, Value::Obj(*name), line);
            }
            _ => return Err(self.error_span(target.span, "Invalid assignment target")),
        }
        Ok(())
    }

    /// Receiver is already on the stack.
    fn emit_method_call(&mut self, name: ObjRef, args: &[Spanned<Expr>], line: u32) -> Result<()> {
        for arg in args {
            self.emit_expr(arg)?;
        }
        let argc = args.len() as i64;
        self.chunk.write_op_value(OP_NUMBER, Value::Number(argc), line);
        self.chunk.write_op_value(OP_METHOD, Value::Obj(name), line);
        self.chunk.write_op(OP_CLARGS, argc as i32 + 1, line);
        Ok(())
    }

    fn emit_call(&mut self, callee: ObjRef, args: &[Spanned<Expr>], span: Span) -> Result<()> {
        let line = self.line_of(span);
        match self.resolve_callee(callee, args.len(), span)? {
            Callee::Method => {
                self.emit_this(span, line)?;
                self.emit_method_call(callee, args, line)
            }
            Callee::Function(function) => {
                for arg in args {
                    self.emit_expr(arg)?;
                }
                self.chunk.write_op_value(OP_CALL, Value::Obj(function), line);
                self.write_clargs(args.len(), line);
                Ok(())
            }
            Callee::Native(native) => {
                for arg in args {
                    self.emit_expr(arg)?;
                }
                self.chunk.write_op_value(OP_NUMBER, Value::Number(args.len() as i64), line);
                self.chunk.write_op_value(OP_NATIVE_CALL, Value::Obj(native), line);
                self.write_clargs(args.len(), line);
                Ok(())
            }
        }
    }

    fn write_clargs(&mut self, argc: usize, line: u32) {
        if argc > 0 {
            self.chunk.write_op(OP_CLARGS, argc as i32, line);
        }
    }

    /// Methods of the enclosing class shadow globals inside its bodies.
    /// Classes resolve to the constructor taking `argc` arguments.
    fn resolve_callee(&self, callee: ObjRef, argc: usize, span: Span) -> Result<Callee> {
        let heap = &self.ctx.heap;
        if matches!(self.scope.kind(), FunctionKind::Method | FunctionKind::Constructor) {
            let own_method = self
                .scope
                .class()
                .and_then(|c| heap.class(c))
                .is_some_and(|c| c.methods.contains(callee, heap.hash_of(callee)));
            if own_method {
                return Ok(Callee::Method);
            }
        }

        let name = self.name(callee);
        let target = match self.ctx.global(callee) {
            Some(Value::Obj(r)) => r,
            None => {
                return Err(self.error_span(span, format!("Undefined function '{name}'")));
            }
            Some(_) => return Err(self.error_span(span, format!("'{name}' is not callable"))),
        };
        match heap.get(target) {
            Some(Object::Function(f)) => {
                if f.arity != argc {
                    return Err(self.error_span(
                        span,
                        format!("Expected {} arguments in '{name}' function call, found {argc}", f.arity),
                    ));
                }
                Ok(Callee::Function(target))
            }
            Some(Object::Native(_)) => Ok(Callee::Native(target)),
            Some(Object::Class(class)) => {
                let constructor = if argc == 0 {
                    class.default_constructor
                } else {
                    class
                        .constructors
                        .iter()
                        .copied()
                        .find(|&k| heap.function(k).is_some_and(|f| f.arity == argc))
                };
                constructor.map(Callee::Function).ok_or_else(|| {
                    self.error_span(span, format!("No constructor of '{name}' takes {argc} arguments"))
                })
            }
            _ => Err(self.error_span(span, format!("'{name}' is not callable"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::context::Context;
    use crate::parser::compile;

    fn listing(source: &str) -> Vec<String> {
        let mut ctx = Context::new();
        let chunk = compile(source, &mut ctx).unwrap();
        chunk
            .disassemble(&ctx)
            .into_iter()
            .map(|i| match i.detail {
                Some(d) if i.op != "JUMP" && i.op != "FJUMP" => format!("{} {d}", i.op),
                _ => match i.operand {
                    Some(n) if i.op != "JUMP" && i.op != "FJUMP" => format!("{} {n}", i.op),
                    _ => i.op.to_string(),
                },
            })
            .collect()
    }

    fn contains_run(haystack: &[String], needle: &[&str]) -> bool {
        haystack.windows(needle.len()).any(|w| w.iter().zip(needle).all(|(a, b)| a == b))
    }

    #[test]
    fn native_call_pushes_argc_and_clears_args() {
        let code = listing("print(1, 2);");
        assert!(contains_run(
            &code,
            &["NUMBER 1", "NUMBER 2", "NUMBER 2", "NATIVE_CALL <native print>", "CLARGS 2", "POP"]
        ));
    }

    #[test]
    fn zero_argument_call_has_no_clargs() {
        let code = listing("func f() { return 1; }\nf();");
        assert!(contains_run(&code, &["CALL <func f/0>", "POP"]));
    }

    #[test]
    fn method_call_counts_the_receiver() {
        let code = listing("class P { meth m(a) { return a; } }\nvar p = P();\np.m(4);");
        assert!(contains_run(
            &code,
            &["GET_GLOBAL p", "NUMBER 4", "NUMBER 1", "METHOD m", "CLARGS 2", "POP"]
        ));
    }

    #[test]
    fn field_assignment_inside_method_targets_this() {
        let code = listing("class P { field x; meth set(v) { x = v; } }");
        assert!(contains_run(&code, &["GET_LOCAL -4", "GET_LOCAL -3", "SET_FIELD x", "POP"]));
    }

    #[test]
    fn implicit_method_call_uses_this() {
        let code = listing("class P { meth a() { return 1; } meth b() { return a(); } }");
        assert!(contains_run(&code, &["GET_LOCAL -3", "NUMBER 0", "METHOD a", "CLARGS 1", "RETURN"]));
    }

    #[test]
    fn constructor_selected_by_arity() {
        let code = listing("class P { field x; P(a) { this.x = a; } }\nvar p = P(3);\nvar q = P();");
        assert!(contains_run(&code, &["NUMBER 3", "CALL <func P/1>", "CLARGS 1", "DEFINE_GLOBAL p"]));
        assert!(contains_run(&code, &["CALL <func P/0>", "DEFINE_GLOBAL q"]));
    }

    #[test]
    fn locals_use_slots() {
        let code = listing("{ var a = 1; var b = a; b = 2; }");
        assert!(contains_run(&code, &["NUMBER 1", "GET_LOCAL 0", "NUMBER 2", "SET_LOCAL 1", "POP", "POPN 2"]));
    }

    #[test]
    fn no_matching_constructor() {
        let mut ctx = Context::new();
        let err = compile("class P { }\nP(1);", &mut ctx).unwrap_err().to_string();
        assert_eq!(err, "Syntax error at line 2: No constructor of 'P' takes 1 arguments");
    }

    #[test]
    fn calling_a_non_function() {
        let mut ctx = Context::new();
        let err = compile("class P { field v; meth m() { return v(); } }", &mut ctx).unwrap_err().to_string();
        assert!(err.contains("Undefined function 'v'"), "{err}");
    }

    #[test]
    fn this_outside_a_class() {
        let mut ctx = Context::new();
        let err = compile("func f() { return this; }", &mut ctx).unwrap_err().to_string();
        assert!(err.contains("'this' used outside of a method or constructor"));
    }
}
