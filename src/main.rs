use std::fs;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use cinder::config::{Config, DEFAULT_STACK_SIZE};
use cinder::context::Context;
use cinder::diagnostic::{Diagnostic, ansi::AnsiRenderer, json};
use cinder::object::DEFAULT_GC_THRESHOLD;
use cinder::{Error, Outcome, lexer, parser};

#[derive(Parser, Debug)]
#[command(name = "cinder", version, about = "Run a cinder script")]
struct Cli {
    /// Script to run
    file: PathBuf,

    /// Print the token stream or compiled bytecode instead of running
    #[arg(long, value_enum)]
    dump: Option<Dump>,

    /// Emit diagnostics (and dumps) as JSON
    #[arg(long)]
    json: bool,

    #[arg(long)]
    no_color: bool,

    /// Value stack capacity in slots
    #[arg(long, default_value_t = DEFAULT_STACK_SIZE)]
    stack_size: usize,

    /// Live objects allowed before the first collection
    #[arg(long, default_value_t = DEFAULT_GC_THRESHOLD)]
    gc_threshold: usize,

    /// Collect garbage before every instruction
    #[arg(long)]
    gc_stress: bool,

    /// Log VM dispatch to stderr (filter with CINDER_LOG)
    #[arg(long)]
    trace: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Dump {
    Tokens,
    Bytecode,
}

impl Cli {
    fn config(&self) -> Config {
        let config = Config {
            stack_size: self.stack_size,
            gc_threshold: self.gc_threshold,
            gc_stress: self.gc_stress,
            color: !self.no_color,
            json: self.json,
            trace: self.trace,
        }
        .with_env();
        Config { color: config.color && io::stderr().is_terminal(), ..config }
    }
}

fn init_tracing(trace: bool) {
    let filter = match std::env::var("CINDER_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) if trace => EnvFilter::new("trace"),
        Err(_) => return,
    };
    // Ignore the error if a subscriber is somehow already set.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn report(config: &Config, d: &Diagnostic) {
    if config.json {
        eprintln!("{}", json::render(d));
    } else {
        eprint!("{}", AnsiRenderer { use_color: config.color }.render(d));
    }
}

fn report_error(config: &Config, e: &Error, source: &str) {
    report(config, &Diagnostic::from(e).with_source(source));
}

fn dump(kind: Dump, source: &str, config: &Config) -> i32 {
    let mut ctx = Context::new();
    let listing = match kind {
        Dump::Tokens => dump_tokens(source, &mut ctx, config.json),
        Dump::Bytecode => parser::compile(source, &mut ctx)
            .map_err(Error::from)
            .map(|chunk| {
                let listing = chunk.disassemble(&ctx);
                if config.json {
                    serde_json::to_string_pretty(&listing).unwrap_or_default()
                } else {
                    listing.iter().map(|i| format!("{i}\n")).collect()
                }
            }),
    };
    match listing {
        Ok(text) => {
            let mut out = io::stdout().lock();
            // A closed pipe is not worth reporting.
            let _ = out.write_all(text.as_bytes()).and_then(|()| out.flush());
            0
        }
        Err(e) => {
            report_error(config, &e, source);
            1
        }
    }
}

fn dump_tokens(source: &str, ctx: &mut Context, as_json: bool) -> Result<String, Error> {
    let lexemes = lexer::tokens(source, ctx).map_err(|e| Error::from(parser::CompileError::from(e)))?;
    let rows = lexemes.iter().map(|l| {
        let text = source.get(l.span.start..l.span.end).unwrap_or_default();
        (l.line, l.token.kind(), text)
    });
    if as_json {
        let rows: Vec<_> = rows
            .map(|(line, kind, text)| serde_json::json!({ "line": line, "kind": kind, "text": text }))
            .collect();
        Ok(serde_json::to_string_pretty(&rows).unwrap_or_default())
    } else {
        Ok(rows.map(|(line, kind, text)| format!("{line:>4} {kind:<8} {text}\n")).collect())
    }
}

fn run(cli: &Cli) -> i32 {
    let config = cli.config();

    let source = match fs::read_to_string(&cli.file) {
        Ok(s) => s,
        Err(e) => {
            report(&config, &Diagnostic::io(format!("Failed to open {}: {e}", cli.file.display())));
            return 1;
        }
    };

    if let Some(kind) = cli.dump {
        return dump(kind, &source, &config);
    }

    let mut out = BufWriter::new(io::stdout().lock());
    let mut input = io::stdin().lock();
    let result = cinder::interpret(&source, &config, &mut out, &mut input);
    // Program output comes before any diagnostic.
    let _ = out.flush();
    match result {
        Ok(Outcome::Finished) => 0,
        Ok(Outcome::Exit(code)) => code,
        Err(e) => {
            report_error(&config, &e, &source);
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.trace);
    let code = run(&cli);
    std::process::exit(code);
}
