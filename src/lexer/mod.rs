use logos::Logos;

use crate::ast::{SourceMap, Span};
use crate::context::Context;
use crate::object::ObjRef;

#[derive(Debug, Clone, Default, PartialEq)]
enum LexErrorKind {
    #[default]
    UnknownCharacter,
    BadEscape,
    Unclosed,
}

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(error = LexErrorKind)]
#[logos(skip r"[ \t\r\n\x0C]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
#[logos(skip(r"#[^\n]*", allow_greedy = true))]
enum RawToken {
    #[token("false")]
    False,
    #[token("true")]
    True,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("xor")]
    Xor,
    #[token("not")]
    Not,
    #[token("var")]
    Var,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("func")]
    Func,
    #[token("return")]
    Return,
    #[token("class")]
    Class,
    #[token("field")]
    Field,
    #[token("meth")]
    Meth,
    #[token("this")]
    This,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("=")]
    Assign,
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    BangEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,
    #[token("!")]
    Bang,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // Unsigned; overflow wraps.
    #[regex(r"[0-9]+", |lex| {
        lex.slice()
            .bytes()
            .fold(0i64, |acc, b| acc.wrapping_mul(10).wrapping_add(i64::from(b - b'0')))
    })]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    // A string that runs into end of input or a dangling backslash.
    #[regex(r#""([^"\\]|\\.)*"#, |_| { Err::<(), _>(LexErrorKind::Unclosed) })]
    UnclosedStr,

    #[regex(r"[A-Za-z][A-Za-z0-9_]*", |lex| lex.slice().to_owned())]
    Word(String),
}

fn unescape(quoted: &str) -> Result<String, LexErrorKind> {
    let body = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escaped = match chars.next() {
            Some('\\') => '\\',
            Some('n') => '\n',
            Some('t') => '\t',
            Some('\'') => '\'',
            Some('"') => '"',
            Some('?') => '?',
            Some('a') => '\x07',
            Some('b') => '\x08',
            Some('f') => '\x0C',
            Some('r') => '\r',
            Some('v') => '\x0B',
            _ => return Err(LexErrorKind::BadEscape),
        };
        out.push(escaped);
    }
    Ok(out)
}

/// A token with its payload resolved against the session: words are interned
/// identifiers and literals are interned strings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token {
    Int(i64),
    Str(ObjRef),
    Ident(ObjRef),

    False,
    True,
    And,
    Or,
    Xor,
    Not,
    Var,
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    Func,
    Return,
    Class,
    Field,
    Meth,
    This,

    Plus,
    Minus,
    Star,
    Slash,
    Assign,
    EqualEqual,
    BangEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Bang,
    PlusPlus,
    MinusMinus,
    Dot,
    Comma,
    Semicolon,
    LParen,
    RParen,
    LBrace,
    RBrace,
}

impl Token {
    /// Short name for token dumps.
    pub fn kind(self) -> &'static str {
        match self {
            Token::Int(_) => "INT",
            Token::Str(_) => "STRING",
            Token::Ident(_) => "IDENT",
            Token::False
            | Token::True
            | Token::And
            | Token::Or
            | Token::Xor
            | Token::Not
            | Token::Var
            | Token::If
            | Token::Else
            | Token::While
            | Token::For
            | Token::Break
            | Token::Continue
            | Token::Func
            | Token::Return
            | Token::Class
            | Token::Field
            | Token::Meth
            | Token::This => "KEYWORD",
            _ => "PUNCT",
        }
    }

    /// How the token reads in an error message.
    pub fn describe(self, ctx: &Context) -> String {
        match self {
            Token::Int(n) => n.to_string(),
            Token::Str(r) => format!("\"{}\"", ctx.heap.text(r)),
            Token::Ident(r) => format!("'{}'", ctx.heap.text(r)),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Token::Int(_) | Token::Str(_) | Token::Ident(_) => "literal",
            Token::False => "false",
            Token::True => "true",
            Token::And => "and",
            Token::Or => "or",
            Token::Xor => "xor",
            Token::Not => "not",
            Token::Var => "var",
            Token::If => "if",
            Token::Else => "else",
            Token::While => "while",
            Token::For => "for",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Func => "func",
            Token::Return => "return",
            Token::Class => "class",
            Token::Field => "field",
            Token::Meth => "meth",
            Token::This => "this",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Assign => "=",
            Token::EqualEqual => "==",
            Token::BangEqual => "!=",
            Token::Greater => ">",
            Token::GreaterEqual => ">=",
            Token::Less => "<",
            Token::LessEqual => "<=",
            Token::Bang => "!",
            Token::PlusPlus => "++",
            Token::MinusMinus => "--",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub span: Span,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LexError {
    #[error("Syntax error at line {line}: {message}")]
    Syntax { line: u32, span: Span, message: String },
    #[error("FATAL: {0}")]
    Fatal(String),
}

/// Pull-based token source with a single token of putback.
pub struct Scanner<'src> {
    source: &'src str,
    lexer: logos::Lexer<'src, RawToken>,
    map: SourceMap,
    last: Option<Lexeme>,
    replay: bool,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Scanner {
            source,
            lexer: RawToken::lexer(source),
            map: SourceMap::new(source),
            last: None,
            replay: false,
        }
    }

    pub fn source(&self) -> &'src str {
        self.source
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.map
    }

    /// Line of the last token handed out, or of end of input.
    pub fn line(&self) -> u32 {
        match self.last {
            Some(l) => l.line,
            None => self.map.line(self.source.len()) as u32,
        }
    }

    /// `Ok(None)` at end of input.
    pub fn next_token(&mut self, ctx: &mut Context) -> Result<Option<Lexeme>, LexError> {
        if self.replay {
            self.replay = false;
            return Ok(self.last);
        }
        let Some(raw) = self.lexer.next() else {
            self.last = None;
            return Ok(None);
        };
        let span = Span::from(self.lexer.span());
        let line = self.map.line(span.start) as u32;
        let raw = raw.map_err(|kind| self.error(kind, span, line))?;
        let token = match raw {
            RawToken::False => Token::False,
            RawToken::True => Token::True,
            RawToken::And => Token::And,
            RawToken::Or => Token::Or,
            RawToken::Xor => Token::Xor,
            RawToken::Not => Token::Not,
            RawToken::Var => Token::Var,
            RawToken::If => Token::If,
            RawToken::Else => Token::Else,
            RawToken::While => Token::While,
            RawToken::For => Token::For,
            RawToken::Break => Token::Break,
            RawToken::Continue => Token::Continue,
            RawToken::Func => Token::Func,
            RawToken::Return => Token::Return,
            RawToken::Class => Token::Class,
            RawToken::Field => Token::Field,
            RawToken::Meth => Token::Meth,
            RawToken::This => Token::This,
            RawToken::Plus => Token::Plus,
            RawToken::Minus => Token::Minus,
            RawToken::Star => Token::Star,
            RawToken::Slash => Token::Slash,
            RawToken::Assign => Token::Assign,
            RawToken::EqualEqual => Token::EqualEqual,
            RawToken::BangEqual => Token::BangEqual,
            RawToken::Greater => Token::Greater,
            RawToken::GreaterEqual => Token::GreaterEqual,
            RawToken::Less => Token::Less,
            RawToken::LessEqual => Token::LessEqual,
            RawToken::Bang => Token::Bang,
            RawToken::PlusPlus => Token::PlusPlus,
            RawToken::MinusMinus => Token::MinusMinus,
            RawToken::Dot => Token::Dot,
            RawToken::Comma => Token::Comma,
            RawToken::Semicolon => Token::Semicolon,
            RawToken::LParen => Token::LParen,
            RawToken::RParen => Token::RParen,
            RawToken::LBrace => Token::LBrace,
            RawToken::RBrace => Token::RBrace,
            RawToken::Int(n) => Token::Int(n),
            RawToken::Str(text) => Token::Str(ctx.intern_string(&text)),
            RawToken::Word(word) => Token::Ident(ctx.intern_identifier(&word)),
            RawToken::UnclosedStr => return Err(self.error(LexErrorKind::Unclosed, span, line)),
        };
        let lexeme = Lexeme { token, span, line };
        self.last = Some(lexeme);
        Ok(Some(lexeme))
    }

    /// Makes the next `next_token` hand back the last token again.
    pub fn putback_token(&mut self) -> Result<(), LexError> {
        if self.replay {
            return Err(LexError::Fatal("token put back twice".into()));
        }
        self.replay = true;
        Ok(())
    }

    fn error(&self, kind: LexErrorKind, span: Span, line: u32) -> LexError {
        let message = match kind {
            LexErrorKind::BadEscape => "Expected escape sequence".to_string(),
            LexErrorKind::Unclosed => "Unclosed '\"'".to_string(),
            LexErrorKind::UnknownCharacter => {
                let slice = &self.source[span.start..span.end];
                match slice.chars().next() {
                    Some('"') => "Unclosed '\"'".to_string(),
                    Some(c) => format!("Unknown character '{c}'"),
                    None => "Unexpected end of input".to_string(),
                }
            }
        };
        LexError::Syntax { line, span, message }
    }
}

/// Lexes a whole file. Used by the token dump.
pub fn tokens(source: &str, ctx: &mut Context) -> Result<Vec<Lexeme>, LexError> {
    let mut scanner = Scanner::new(source);
    let mut out = Vec::new();
    while let Some(lexeme) = scanner.next_token(ctx)? {
        out.push(lexeme);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        let mut ctx = Context::new();
        tokens(source, &mut ctx).unwrap().into_iter().map(|l| l.token).collect()
    }

    fn lex_err(source: &str) -> String {
        let mut ctx = Context::new();
        tokens(source, &mut ctx).unwrap_err().to_string()
    }

    #[test]
    fn keywords_and_operators() {
        let toks = kinds("var x = 1 >= 2;");
        assert_eq!(toks.len(), 7);
        assert_eq!(toks[0], Token::Var);
        assert!(matches!(toks[1], Token::Ident(_)));
        assert_eq!(&toks[2..], &[
            Token::Assign,
            Token::Int(1),
            Token::GreaterEqual,
            Token::Int(2),
            Token::Semicolon,
        ]);
        assert_eq!(kinds("++ -- != == <= !"), vec![
            Token::PlusPlus,
            Token::MinusMinus,
            Token::BangEqual,
            Token::EqualEqual,
            Token::LessEqual,
            Token::Bang,
        ]);
    }

    #[test]
    fn keyword_prefix_is_an_identifier() {
        let mut ctx = Context::new();
        let toks = tokens("variable classy this_", &mut ctx).unwrap();
        for l in toks {
            assert!(matches!(l.token, Token::Ident(_)));
        }
    }

    #[test]
    fn print_is_not_a_keyword() {
        let mut ctx = Context::new();
        let toks = tokens("print", &mut ctx).unwrap();
        assert_eq!(toks[0].token, Token::Ident(ctx.intern_identifier("print")));
    }

    #[test]
    fn identifiers_are_interned_unbound() {
        let mut ctx = Context::new();
        let toks = tokens("alpha alpha", &mut ctx).unwrap();
        assert_eq!(toks[0].token, toks[1].token);
        let Token::Ident(id) = toks[0].token else { panic!("expected identifier") };
        assert_eq!(ctx.global(id), None);
    }

    #[test]
    fn comments_and_lines() {
        let mut ctx = Context::new();
        let toks = tokens("// one\n# two\n  x\n\ny", &mut ctx).unwrap();
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[0].line, 3);
        assert_eq!(toks[1].line, 5);
    }

    #[test]
    fn integers_wrap() {
        assert_eq!(kinds("42"), vec![Token::Int(42)]);
        assert_eq!(kinds("9223372036854775808"), vec![Token::Int(i64::MIN)]);
    }

    #[test]
    fn string_escapes() {
        let mut ctx = Context::new();
        let toks = tokens(r#""a\tb\n\"q\"\\\?""#, &mut ctx).unwrap();
        let Token::Str(r) = toks[0].token else { panic!("expected string") };
        assert_eq!(ctx.heap.text(r), "a\tb\n\"q\"\\?");
    }

    #[test]
    fn equal_literals_share_one_object() {
        let mut ctx = Context::new();
        let toks = tokens(r#""hi" "hi" "h""#, &mut ctx).unwrap();
        assert_eq!(toks[0].token, toks[1].token);
        assert_ne!(toks[0].token, toks[2].token);
    }

    #[test]
    fn bad_escape() {
        assert_eq!(lex_err(r#""a\qb""#), "Syntax error at line 1: Expected escape sequence");
    }

    #[test]
    fn unclosed_string() {
        assert_eq!(lex_err("\n\"abc"), "Syntax error at line 2: Unclosed '\"'");
    }

    #[test]
    fn unknown_character() {
        assert_eq!(lex_err("var x = 1 @ 2;"), "Syntax error at line 1: Unknown character '@'");
    }

    #[test]
    fn putback_replays_once() {
        let mut ctx = Context::new();
        let mut s = Scanner::new("a b");
        let a = s.next_token(&mut ctx).unwrap();
        s.putback_token().unwrap();
        assert!(matches!(s.putback_token(), Err(LexError::Fatal(_))));
        assert_eq!(s.next_token(&mut ctx).unwrap(), a);
        let b = s.next_token(&mut ctx).unwrap();
        assert_ne!(a, b);
        assert_eq!(s.next_token(&mut ctx).unwrap(), None);
    }
}
