//! Token-level cursor over the preprocessed buffer
//!
//! The parser consumes the flattened text through this reader: a line/column
//! tracked cursor with whitespace skipping, single-token extraction, and
//! cheap mark/rewind so construct parsers can try a match and leave the
//! position unchanged when it fails.
//!
//! Token classification is deliberately shallow here (separators, quoted
//! strings, everything-else words); numbers, GUIDs, and keywords are
//! recognized by the consuming grammar via [`Token`] helpers.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{LexError, Location, Result, SyntaxError};
use crate::expr::parse_integer;
use crate::source::SourceBuffer;

/// Registry-format GUID literal.
static GUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    )
    .expect("GUID regex compiles")
});

const SEPARATORS: &[char] = &['=', '{', '}', '|', ',', '[', ']'];

/// True when `text` is a registry-format GUID literal.
pub fn is_guid_text(text: &str) -> bool {
    GUID_RE.is_match(text)
}

/// One extracted token and where it came from (already remapped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub location: Location,
    pub quoted: bool,
}

impl Token {
    pub fn is(&self, keyword: &str) -> bool {
        !self.quoted && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_separator(&self, sep: char) -> bool {
        !self.quoted && self.text.len() == 1 && self.text.starts_with(sep)
    }

    pub fn as_integer(&self) -> Option<u64> {
        if self.quoted {
            return None;
        }
        parse_integer(&self.text)
    }

    pub fn is_guid_literal(&self) -> bool {
        !self.quoted && GUID_RE.is_match(&self.text)
    }
}

/// Saved cursor state for rewinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    line: usize,
    col: usize,
}

pub struct Reader<'a> {
    buf: &'a SourceBuffer,
    line: usize,
    col: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a SourceBuffer) -> Self {
        Self { buf, line: 0, col: 0 }
    }

    pub fn buffer(&self) -> &SourceBuffer {
        self.buf
    }

    /// Remapped location of the cursor (clamped to the last line at EOF).
    pub fn location(&self) -> Location {
        let line = self.line.min(self.buf.line_count().saturating_sub(1));
        self.buf.origin(line)
    }

    pub fn mark(&self) -> Mark {
        Mark {
            line: self.line,
            col: self.col,
        }
    }

    pub fn rewind(&mut self, mark: Mark) {
        self.line = mark.line;
        self.col = mark.col;
    }

    fn current_char(&self) -> Option<char> {
        if self.line >= self.buf.line_count() {
            return None;
        }
        self.buf.line(self.line).get(self.col).copied()
    }

    fn advance(&mut self) {
        if self.line >= self.buf.line_count() {
            return;
        }
        self.col += 1;
        while self.line < self.buf.line_count() && self.col >= self.buf.line(self.line).len() {
            self.line += 1;
            self.col = 0;
        }
    }

    /// Skip whitespace, including line breaks.
    pub fn skip_ws(&mut self) {
        while self.line < self.buf.line_count() {
            match self.buf.line(self.line).get(self.col) {
                Some(c) if c.is_whitespace() => self.advance(),
                Some(_) => return,
                None => {
                    self.line += 1;
                    self.col = 0;
                }
            }
        }
    }

    pub fn at_eof(&mut self) -> bool {
        self.skip_ws();
        self.line >= self.buf.line_count()
    }

    /// Extract the next token. Separators are single-character tokens;
    /// quoted strings are returned without their quotes and flagged.
    pub fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_ws();
        if self.line >= self.buf.line_count() {
            return Ok(None);
        }
        let location = self.buf.origin(self.line);
        let first = match self.current_char() {
            Some(c) => c,
            None => return Ok(None),
        };
        if SEPARATORS.contains(&first) {
            self.advance();
            return Ok(Some(Token {
                text: first.to_string(),
                location,
                quoted: false,
            }));
        }
        if first == '"' {
            let start_line = self.line;
            self.advance();
            let mut text = String::new();
            loop {
                if self.line != start_line || self.line >= self.buf.line_count() {
                    return Err(LexError::UnterminatedString { location }.into());
                }
                match self.current_char() {
                    Some('"') => {
                        self.advance();
                        break;
                    }
                    Some(c) => {
                        text.push(c);
                        self.advance();
                    }
                    None => return Err(LexError::UnterminatedString { location }.into()),
                }
            }
            return Ok(Some(Token {
                text,
                location,
                quoted: true,
            }));
        }
        let mut text = String::new();
        while let Some(c) = self.current_char() {
            if c.is_whitespace() || SEPARATORS.contains(&c) || c == '"' {
                break;
            }
            text.push(c);
            self.advance();
        }
        Ok(Some(Token {
            text,
            location,
            quoted: false,
        }))
    }

    /// Peek one token without consuming it.
    pub fn peek_token(&mut self) -> Result<Option<Token>> {
        let mark = self.mark();
        let tok = self.next_token();
        self.rewind(mark);
        tok
    }

    /// Consume the next token if it matches `keyword` (case-insensitive).
    pub fn try_keyword(&mut self, keyword: &str) -> bool {
        let mark = self.mark();
        match self.next_token() {
            Ok(Some(tok)) if tok.is(keyword) => true,
            _ => {
                self.rewind(mark);
                false
            }
        }
    }

    /// Consume the next token if it is the single-character separator `sep`.
    pub fn try_separator(&mut self, sep: char) -> bool {
        let mark = self.mark();
        match self.next_token() {
            Ok(Some(tok)) if tok.is_separator(sep) => true,
            _ => {
                self.rewind(mark);
                false
            }
        }
    }

    /// Require `expected` (keyword or separator) or fail with a
    /// [`SyntaxError::Expected`] diagnostic.
    pub fn expect(&mut self, expected: &str) -> Result<Token> {
        let location = self.location();
        match self.next_token()? {
            Some(tok)
                if tok.is(expected)
                    || (expected.len() == 1
                        && tok.is_separator(expected.chars().next().unwrap())) =>
            {
                Ok(tok)
            }
            Some(tok) => Err(SyntaxError::Expected {
                location: tok.location,
                expected: format!("'{}'", expected),
                found: tok.text,
            }
            .into()),
            None => Err(SyntaxError::UnexpectedEof {
                location,
                context: format!("'{}'", expected),
            }
            .into()),
        }
    }

    /// Require any token, failing with an EOF diagnostic naming `context`.
    pub fn require_token(&mut self, context: &str) -> Result<Token> {
        let location = self.location();
        self.next_token()?.ok_or_else(|| {
            SyntaxError::UnexpectedEof {
                location,
                context: context.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceBuffer;

    fn reader_over(text: &str) -> SourceBuffer {
        SourceBuffer::new("t.fdf", text)
    }

    fn texts(buf: &SourceBuffer) -> Vec<String> {
        let mut r = Reader::new(buf);
        let mut out = Vec::new();
        while let Ok(Some(tok)) = r.next_token() {
            out.push(tok.text);
        }
        out
    }

    #[test]
    fn separators_split_tokens() {
        let buf = reader_over("0xFC0000|0x40000\nBaseAddress = 0xFF800000\n");
        assert_eq!(
            texts(&buf),
            vec!["0xFC0000", "|", "0x40000", "BaseAddress", "=", "0xFF800000"]
        );
    }

    #[test]
    fn quoted_strings_keep_spaces_and_drop_quotes() {
        let buf = reader_over("FvNameString = \"Main Volume\"\n");
        let mut r = Reader::new(&buf);
        r.next_token().unwrap();
        r.next_token().unwrap();
        let tok = r.next_token().unwrap().unwrap();
        assert!(tok.quoted);
        assert_eq!(tok.text, "Main Volume");
    }

    #[test]
    fn unterminated_string_is_a_lex_error() {
        let buf = reader_over("NAME = \"oops\n");
        let mut r = Reader::new(&buf);
        r.next_token().unwrap();
        r.next_token().unwrap();
        assert!(r.next_token().is_err());
    }

    #[test]
    fn guid_literals_survive_as_one_token() {
        let buf = reader_over("8C8CE578-8A3D-4F1C-9935-896185C32DD3\n");
        let mut r = Reader::new(&buf);
        let tok = r.next_token().unwrap().unwrap();
        assert!(tok.is_guid_literal());
    }

    #[test]
    fn rewind_restores_position() {
        let buf = reader_over("A B C\n");
        let mut r = Reader::new(&buf);
        let mark = r.mark();
        assert_eq!(r.next_token().unwrap().unwrap().text, "A");
        r.rewind(mark);
        assert_eq!(r.next_token().unwrap().unwrap().text, "A");
    }

    #[test]
    fn try_keyword_is_case_insensitive_and_rewinds() {
        let buf = reader_over("BaseAddress = 1\n");
        let mut r = Reader::new(&buf);
        assert!(!r.try_keyword("Size"));
        assert!(r.try_keyword("BASEADDRESS"));
    }

    #[test]
    fn integers_parse_in_both_radices() {
        let buf = reader_over("0x10 16\n");
        let mut r = Reader::new(&buf);
        assert_eq!(r.next_token().unwrap().unwrap().as_integer(), Some(16));
        assert_eq!(r.next_token().unwrap().unwrap().as_integer(), Some(16));
    }
}
