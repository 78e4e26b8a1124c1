/// Maps byte offsets to line/column positions within source text.
pub struct SourceMap {
    line_starts: Vec<usize>,
    len: usize,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        SourceMap { line_starts, len: source.len() }
    }

    /// 1-based line containing `offset`. Offsets past the end land on the last line.
    pub fn line(&self, offset: usize) -> usize {
        let offset = offset.min(self.len);
        match self.line_starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    /// Returns (line, col), both 1-based.
    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let line = self.line(offset);
        let col = offset.min(self.len) - self.line_starts[line - 1];
        (line, col + 1)
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Full text of the given 1-based line, without its terminator.
    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        if line == 0 || line > self.line_starts.len() {
            return "";
        }
        let start = self.line_starts[line - 1];
        let end = self.line_starts.get(line).copied().unwrap_or(source.len());
        source[start..end].trim_end_matches(['\n', '\r'])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_line_offsets() {
        let sm = SourceMap::new("var x = 1;");
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.lookup(4), (1, 5));
        assert_eq!(sm.line(9), 1);
    }

    #[test]
    fn lines_after_newlines() {
        let src = "func f() {\n  return 1;\n}\n";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line(10), 1); // the newline itself
        assert_eq!(sm.line(11), 2);
        assert_eq!(sm.lookup(13), (2, 3));
        assert_eq!(sm.line(23), 3);
        assert_eq!(sm.line_count(), 4);
    }

    #[test]
    fn offset_past_end_clamps() {
        let sm = SourceMap::new("a\nb");
        assert_eq!(sm.line(100), 2);
        assert_eq!(sm.lookup(100), (2, 2));
    }

    #[test]
    fn line_text_strips_terminators() {
        let src = "print(1);\r\nprint(2);\n";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line_text(src, 1), "print(1);");
        assert_eq!(sm.line_text(src, 2), "print(2);");
        assert_eq!(sm.line_text(src, 3), "");
        assert_eq!(sm.line_text(src, 0), "");
        assert_eq!(sm.line_text(src, 9), "");
    }

    #[test]
    fn empty_source_is_one_line() {
        let sm = SourceMap::new("");
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.line_count(), 1);
    }
}
