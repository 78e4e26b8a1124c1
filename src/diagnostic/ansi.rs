use super::{Diagnostic, Stage};
use crate::ast::SourceMap;

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn bold(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold_red(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;31m{s}\x1b[0m") } else { s.to_string() }
    }

    fn cyan(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[36m{s}\x1b[0m") } else { s.to_string() }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[2m{s}\x1b[0m") } else { s.to_string() }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        let headline = d.headline();
        let headline = match d.stage {
            Stage::Io => self.bold(&headline),
            _ => self.bold_red(&headline),
        };
        out.push_str(&headline);
        out.push('\n');

        if let Some(source) = &d.source {
            let map = SourceMap::new(source);
            // Compile errors point at a span; runtime errors only know the line.
            let (line, col) = match (&d.label, d.line) {
                (Some(label), _) => map.lookup(label.span.start),
                (None, Some(line)) => (line as usize, 0),
                (None, None) => (0, 0),
            };
            if line > 0 && line <= map.line_count() {
                self.snippet(&mut out, d, source, &map, line, col);
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }
        out
    }

    fn snippet(&self, out: &mut String, d: &Diagnostic, source: &str, map: &SourceMap, line: usize, col: usize) {
        let line_text = map.line_text(source, line);
        let gutter = line.to_string().len();
        let pipe = self.cyan("|");
        let pad = " ".repeat(gutter);

        if col > 0 {
            out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), line, col));
        } else {
            out.push_str(&format!("  {} line {}\n", self.cyan("-->"), line));
        }
        out.push_str(&format!("{pad} {pipe}\n"));
        let line_num = self.cyan(&format!("{line:>gutter$}"));
        out.push_str(&format!("{line_num} {pipe} {line_text}\n"));

        if let Some(label) = &d.label {
            let indent = " ".repeat(col.saturating_sub(1));
            // keep the carets on the reported line
            let room = line_text.len().saturating_sub(col.saturating_sub(1)).max(1);
            let span_len = label.span.end.saturating_sub(label.span.start).clamp(1, room);
            let carets = self.bold_red(&"^".repeat(span_len));
            if label.message.is_empty() {
                out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
            } else {
                out.push_str(&format!("{pad} {pipe} {indent}{carets} {}\n", self.bold_red(&label.message)));
            }
        }
        out.push_str(&format!("{pad} {pipe}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn syntax(source: &str, start: usize, end: usize) -> Diagnostic {
        Diagnostic::new(Stage::Syntax, "Expected ';' after expression")
            .with_line(1)
            .with_span(Span { start, end }, "here")
            .with_source(source.to_string())
    }

    #[test]
    fn render_starts_with_headline() {
        let r = AnsiRenderer { use_color: false };
        let out = r.render(&syntax("var a = 1 var", 10, 13));
        assert!(out.starts_with("Syntax error at line 1: Expected ';' after expression\n"), "{out}");
    }

    #[test]
    fn render_contains_location_and_source_line() {
        let r = AnsiRenderer { use_color: false };
        let out = r.render(&syntax("var a = 1 var", 10, 13));
        assert!(out.contains("--> 1:11"), "{out}");
        assert!(out.contains("1 | var a = 1 var"), "{out}");
    }

    #[test]
    fn caret_length_matches_span() {
        let r = AnsiRenderer { use_color: false };
        let out = r.render(&syntax("var a = 1 var", 10, 13));
        assert!(out.contains("           ^^^ here"), "{out}");
    }

    #[test]
    fn carets_stop_at_end_of_line() {
        let r = AnsiRenderer { use_color: false };
        let out = r.render(&syntax("ab\ncd", 1, 5));
        assert!(out.contains(" ^ here"), "{out}");
        assert!(!out.contains("^^"), "{out}");
    }

    #[test]
    fn runtime_error_shows_line_without_carets() {
        let r = AnsiRenderer { use_color: false };
        let d = Diagnostic::new(Stage::Runtime, "Division by zero")
            .with_line(2)
            .with_source("var a = 1;\nprint(a / 0);".to_string());
        let out = r.render(&d);
        assert!(out.starts_with("Error at line 2: Division by zero\n"));
        assert!(out.contains("--> line 2"));
        assert!(out.contains("print(a / 0);"));
        assert!(!out.contains('^'));
    }

    #[test]
    fn render_without_source() {
        let r = AnsiRenderer { use_color: false };
        let out = r.render(&Diagnostic::new(Stage::Fatal, "Stack overflow"));
        assert_eq!(out, "FATAL: Stack overflow\n");
    }

    #[test]
    fn color_toggle() {
        let d = syntax("var a = 1 var", 10, 13).with_note("a note");
        assert!(AnsiRenderer { use_color: true }.render(&d).contains("\x1b["));
        let plain = AnsiRenderer { use_color: false }.render(&d);
        assert!(!plain.contains("\x1b["));
        assert!(plain.contains("= note: a note"));
    }
}
