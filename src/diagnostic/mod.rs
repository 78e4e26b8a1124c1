pub mod ansi;
pub mod json;

use crate::ast::Span;
use crate::lexer::LexError;
use crate::parser::CompileError;
use crate::vm::VmError;

/// Which part of the pipeline gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The file could not be read.
    Io,
    Syntax,
    Runtime,
    /// Internal invariant broken: stack overflow, corrupt frame, bad opcode.
    Fatal,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Io => "io",
            Stage::Syntax => "syntax",
            Stage::Runtime => "runtime",
            Stage::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub stage: Stage,
    pub message: String,
    pub line: Option<u32>,
    pub label: Option<Label>,
    pub notes: Vec<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Diagnostic {
            stage,
            message: message.into(),
            line: None,
            label: None,
            notes: Vec::new(),
            source: None,
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Diagnostic::new(Stage::Io, message)
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.label = Some(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// First line of the report, in the interpreter's fixed wording.
    pub fn headline(&self) -> String {
        match (self.stage, self.line) {
            (Stage::Syntax, Some(line)) => format!("Syntax error at line {line}: {}", self.message),
            (Stage::Runtime, Some(line)) => format!("Error at line {line}: {}", self.message),
            (Stage::Fatal, _) => format!("FATAL: {}", self.message),
            _ => self.message.clone(),
        }
    }
}

// ---- From impls for the pipeline's error types ----

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        match e {
            LexError::Syntax { line, span, message } => {
                Diagnostic::new(Stage::Syntax, message).with_line(*line).with_span(*span, "here")
            }
            LexError::Fatal(message) => Diagnostic::new(Stage::Fatal, message),
        }
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        match e {
            CompileError::Syntax { line, span, message } => {
                Diagnostic::new(Stage::Syntax, message).with_line(*line).with_span(*span, "here")
            }
            CompileError::Fatal(message) => Diagnostic::new(Stage::Fatal, message),
        }
    }
}

impl From<&VmError> for Diagnostic {
    fn from(e: &VmError) -> Self {
        match e {
            VmError::Runtime { line, message } => Diagnostic::new(Stage::Runtime, message).with_line(*line),
            VmError::Fatal(message) => Diagnostic::new(Stage::Fatal, message),
        }
    }
}

impl From<&crate::Error> for Diagnostic {
    fn from(e: &crate::Error) -> Self {
        match e {
            crate::Error::Compile(e) => e.into(),
            crate::Error::Runtime(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headline_wording() {
        let d = Diagnostic::new(Stage::Syntax, "Undefined function 'f'").with_line(3);
        assert_eq!(d.headline(), "Syntax error at line 3: Undefined function 'f'");
        let d = Diagnostic::new(Stage::Runtime, "Division by zero").with_line(1);
        assert_eq!(d.headline(), "Error at line 1: Division by zero");
        assert_eq!(Diagnostic::new(Stage::Fatal, "Stack overflow").headline(), "FATAL: Stack overflow");
        assert_eq!(Diagnostic::io("Failed to open x: gone").headline(), "Failed to open x: gone");
    }

    #[test]
    fn builder_keeps_span_and_notes() {
        let d = Diagnostic::new(Stage::Syntax, "bad")
            .with_span(Span { start: 5, end: 8 }, "here")
            .with_note("first")
            .with_note("second");
        let label = d.label.as_ref().unwrap();
        assert_eq!((label.span.start, label.span.end), (5, 8));
        assert_eq!(d.notes, vec!["first", "second"]);
    }

    #[test]
    fn from_compile_error() {
        let e = CompileError::Syntax { line: 2, span: Span { start: 10, end: 15 }, message: "oops".into() };
        let d = Diagnostic::from(&e);
        assert_eq!(d.stage, Stage::Syntax);
        assert_eq!(d.line, Some(2));
        assert_eq!(d.label.unwrap().span, Span { start: 10, end: 15 });
        assert_eq!(Diagnostic::from(&CompileError::Fatal("x".into())).stage, Stage::Fatal);
    }

    #[test]
    fn from_lex_error() {
        let e = LexError::Syntax { line: 1, span: Span { start: 0, end: 1 }, message: "Unclosed '\"'".into() };
        let d = Diagnostic::from(&e);
        assert_eq!(d.headline(), e.to_string());
    }

    #[test]
    fn from_vm_error_matches_display() {
        let e = VmError::Runtime { line: 4, message: "Undefined identifier 'x'".into() };
        let d = Diagnostic::from(&e);
        assert_eq!(d.stage, Stage::Runtime);
        assert!(d.label.is_none());
        assert_eq!(d.headline(), e.to_string());
        let e = VmError::Fatal("Stack overflow".into());
        assert_eq!(Diagnostic::from(&e).headline(), e.to_string());
    }
}
