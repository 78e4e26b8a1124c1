pub mod ast;
pub mod bytecode;
pub mod config;
pub mod context;
pub mod cycler;
pub mod diagnostic;
pub mod gc;
pub mod lexer;
pub mod natives;
pub mod object;
pub mod parser;
pub mod scope;
pub mod table;
pub mod vm;

use std::io::{Read, Write};

pub use config::Config;
pub use vm::Outcome;

use context::{Context, SCRIPT_ENTRY};
use object::Heap;
use parser::CompileError;
use vm::{Vm, VmError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] VmError),
}

/// Compiles and runs `source` in a fresh context.
///
/// Nothing executes if compilation fails. The heap is torn down before
/// returning, whichever way the run ended.
pub fn interpret(source: &str, config: &Config, out: &mut dyn Write, input: &mut dyn Read) -> Result<Outcome, Error> {
    let mut ctx = Context::with_heap(Heap::with_threshold(config.gc_threshold));
    let chunk = parser::compile(source, &mut ctx)?;
    let outcome = Vm::new(&mut ctx, &chunk, config, out, input).run(SCRIPT_ENTRY);
    gc::cleanup(&mut ctx);
    Ok(outcome?)
}
