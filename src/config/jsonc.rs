//! Span-preserving parser for JSON with comments.
//!
//! Worker configuration files are JSON documents that humans annotate with
//! `//` and `/* */` comments and leave trailing commas in. The parser keeps
//! the byte range of every value so edits can rewrite a single scalar in
//! place instead of re-serializing the document.

use std::fmt;
use std::ops::Range;

use serde_json::{Map, Number, Value};

/// A parsed value together with its byte range in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// The value.
    pub kind: NodeKind,
    /// Byte range of the value in the source text.
    pub span: Range<usize>,
}

/// The shape of a parsed value.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// An object, with members in source order.
    Object(Vec<Member>),
    /// An array.
    Array(Vec<Node>),
    /// A string, unescaped.
    String(String),
    /// A number, as written in the source.
    Number(String),
    /// A boolean.
    Bool(bool),
    /// `null`.
    Null,
}

/// An object member.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    /// Unescaped key.
    pub key: String,
    /// Byte range of the quoted key.
    pub key_span: Range<usize>,
    /// The member's value.
    pub value: Node,
}

/// A syntax error with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// What went wrong.
    pub message: String,
    /// Byte offset of the error.
    pub offset: usize,
    /// 1-based line.
    pub line: usize,
    /// 1-based column, in characters.
    pub column: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at line {}, column {}", self.message, self.line, self.column)
    }
}

impl std::error::Error for SyntaxError {}

impl Node {
    /// Returns true for strings, numbers, booleans and null.
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        !matches!(self.kind, NodeKind::Object(_) | NodeKind::Array(_))
    }

    /// Looks up an object member by key. The last duplicate wins.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Node> {
        match &self.kind {
            NodeKind::Object(members) => members
                .iter()
                .rev()
                .find(|m| m.key == key)
                .map(|m| &m.value),
            _ => None,
        }
    }

    /// Returns the scalar as the text it would compare equal to in a path
    /// discriminator: strings unescaped, other scalars as written.
    #[must_use]
    pub fn scalar_text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::String(s) | NodeKind::Number(s) => Some(s),
            NodeKind::Bool(true) => Some("true"),
            NodeKind::Bool(false) => Some("false"),
            NodeKind::Null => Some("null"),
            NodeKind::Object(_) | NodeKind::Array(_) => None,
        }
    }

    /// Converts the tree into a `serde_json::Value`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match &self.kind {
            NodeKind::Object(members) => {
                let mut map = Map::new();
                for member in members {
                    map.insert(member.key.clone(), member.value.to_value());
                }
                Value::Object(map)
            }
            NodeKind::Array(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            NodeKind::String(s) => Value::String(s.clone()),
            NodeKind::Number(raw) => raw
                .parse::<Number>()
                .map_or_else(|_| Value::String(raw.clone()), Value::Number),
            NodeKind::Bool(b) => Value::Bool(*b),
            NodeKind::Null => Value::Null,
        }
    }
}

/// Parses a JSON-with-comments document.
///
/// # Errors
///
/// Returns a [`SyntaxError`] pointing at the first offending byte.
pub fn parse(text: &str) -> Result<Node, SyntaxError> {
    // Spans stay relative to the full text, BOM included.
    let start = if text.starts_with('\u{feff}') { '\u{feff}'.len_utf8() } else { 0 };
    let mut parser = Parser { text, bytes: text.as_bytes(), pos: start };
    parser.skip_trivia()?;
    let node = parser.value()?;
    parser.skip_trivia()?;
    if parser.pos < parser.bytes.len() {
        return Err(parser.error("unexpected content after the top-level value"));
    }
    Ok(node)
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> SyntaxError {
        self.error_at(self.pos, message)
    }

    fn error_at(&self, offset: usize, message: &str) -> SyntaxError {
        let offset = offset.min(self.bytes.len());
        let before = &self.text[..floor_char_boundary(self.text, offset)];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rfind('\n')
            .map_or(before, |nl| &before[nl + 1..])
            .chars()
            .count()
            + 1;
        SyntaxError {
            message: message.to_string(),
            offset,
            line,
            column,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\n' | b'\r') => self.pos += 1,
                Some(b'/') => match self.bytes.get(self.pos + 1) {
                    Some(b'/') => {
                        while let Some(b) = self.peek() {
                            if b == b'\n' {
                                break;
                            }
                            self.pos += 1;
                        }
                    }
                    Some(b'*') => {
                        let start = self.pos;
                        self.pos += 2;
                        loop {
                            match self.peek() {
                                None => return Err(self.error_at(start, "unterminated block comment")),
                                Some(b'*') if self.bytes.get(self.pos + 1) == Some(&b'/') => {
                                    self.pos += 2;
                                    break;
                                }
                                Some(_) => self.pos += 1,
                            }
                        }
                    }
                    _ => return Err(self.error("unexpected '/'")),
                },
                _ => return Ok(()),
            }
        }
    }

    fn value(&mut self) -> Result<Node, SyntaxError> {
        match self.peek() {
            Some(b'{') => self.object(),
            Some(b'[') => self.array(),
            Some(b'"') => {
                let start = self.pos;
                let s = self.string()?;
                Ok(Node { kind: NodeKind::String(s), span: start..self.pos })
            }
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(b't') => self.literal("true", NodeKind::Bool(true)),
            Some(b'f') => self.literal("false", NodeKind::Bool(false)),
            Some(b'n') => self.literal("null", NodeKind::Null),
            Some(_) => Err(self.error("expected a value")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn object(&mut self) -> Result<Node, SyntaxError> {
        let start = self.pos;
        self.pos += 1;
        let mut members = Vec::new();
        loop {
            self.skip_trivia()?;
            match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Node { kind: NodeKind::Object(members), span: start..self.pos });
                }
                Some(b'"') => {}
                None => return Err(self.error_at(start, "unterminated object")),
                Some(_) => return Err(self.error("expected a quoted key or '}'")),
            }

            let key_start = self.pos;
            let key = self.string()?;
            let key_span = key_start..self.pos;

            self.skip_trivia()?;
            if self.peek() != Some(b':') {
                return Err(self.error("expected ':' after object key"));
            }
            self.pos += 1;
            self.skip_trivia()?;
            let value = self.value()?;
            members.push(Member { key, key_span, value });

            self.skip_trivia()?;
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {}
                None => return Err(self.error_at(start, "unterminated object")),
                Some(_) => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn array(&mut self) -> Result<Node, SyntaxError> {
        let start = self.pos;
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_trivia()?;
            match self.peek() {
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Node { kind: NodeKind::Array(items), span: start..self.pos });
                }
                None => return Err(self.error_at(start, "unterminated array")),
                Some(_) => {}
            }

            items.push(self.value()?);

            self.skip_trivia()?;
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {}
                None => return Err(self.error_at(start, "unterminated array")),
                Some(_) => return Err(self.error("expected ',' or ']'")),
            }
        }
    }

    fn string(&mut self) -> Result<String, SyntaxError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(b) = self.peek() else {
                return Err(self.error_at(start, "unterminated string"));
            };
            match b {
                b'"' => {
                    self.pos += 1;
                    return Ok(out);
                }
                b'\\' => {
                    self.pos += 1;
                    self.escape(&mut out)?;
                }
                b'\n' => return Err(self.error("newline inside string")),
                _ => {
                    // Copy a run of plain bytes; multi-byte UTF-8 passes through untouched.
                    let run_start = self.pos;
                    while let Some(c) = self.peek() {
                        if c == b'"' || c == b'\\' || c == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                    out.push_str(&self.text[run_start..self.pos]);
                }
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), SyntaxError> {
        let Some(b) = self.peek() else {
            return Err(self.error("unterminated escape"));
        };
        self.pos += 1;
        match b {
            b'"' => out.push('"'),
            b'\\' => out.push('\\'),
            b'/' => out.push('/'),
            b'b' => out.push('\u{0008}'),
            b'f' => out.push('\u{000c}'),
            b'n' => out.push('\n'),
            b'r' => out.push('\r'),
            b't' => out.push('\t'),
            b'u' => {
                let high = self.hex4()?;
                let c = if (0xD800..0xDC00).contains(&high) {
                    if self.bytes.get(self.pos) != Some(&b'\\') || self.bytes.get(self.pos + 1) != Some(&b'u') {
                        return Err(self.error("unpaired surrogate in string"));
                    }
                    self.pos += 2;
                    let low = self.hex4()?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err(self.error("invalid low surrogate in string"));
                    }
                    char::from_u32(0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00))
                } else {
                    char::from_u32(high)
                };
                out.push(c.ok_or_else(|| self.error("invalid unicode escape"))?);
            }
            _ => return Err(self.error_at(self.pos - 1, "invalid escape sequence")),
        }
        Ok(())
    }

    fn hex4(&mut self) -> Result<u32, SyntaxError> {
        let digits = self
            .text
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| self.error("truncated unicode escape"))?;
        let value = u32::from_str_radix(digits, 16).map_err(|_| self.error("invalid unicode escape"))?;
        self.pos += 4;
        Ok(value)
    }

    fn number(&mut self) -> Result<Node, SyntaxError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        if !self.digits() {
            return Err(self.error("expected digits"));
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            if !self.digits() {
                return Err(self.error("expected digits after '.'"));
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if !self.digits() {
                return Err(self.error("expected exponent digits"));
            }
        }
        Ok(Node {
            kind: NodeKind::Number(self.text[start..self.pos].to_string()),
            span: start..self.pos,
        })
    }

    fn digits(&mut self) -> bool {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn literal(&mut self, word: &str, kind: NodeKind) -> Result<Node, SyntaxError> {
        let start = self.pos;
        if self.bytes[start..].starts_with(word.as_bytes()) {
            self.pos += word.len();
            Ok(Node { kind, span: start..self.pos })
        } else {
            Err(self.error("invalid literal"))
        }
    }
}

fn floor_char_boundary(text: &str, mut offset: usize) -> usize {
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
  // worker identity
  "name": "bridge", /* inline */
  "containers": [
    { "class_name": "Sandbox", "max_instances": 10, },
  ],
  "vars": { "MODE": "prod!" },
}
"#;

    #[test]
    fn test_parse_with_comments_and_trailing_commas() {
        let root = parse(SAMPLE).expect("sample should parse");
        let value = root.to_value();
        assert_eq!(value["name"], "bridge");
        assert_eq!(value["containers"][0]["max_instances"], 10);
        assert_eq!(value["vars"]["MODE"], "prod!");
    }

    #[test]
    fn test_spans_point_at_values() {
        let root = parse(SAMPLE).expect("sample should parse");
        let name = root.get("name").expect("name exists");
        assert_eq!(&SAMPLE[name.span.clone()], "\"bridge\"");

        let containers = root.get("containers").expect("containers exist");
        let NodeKind::Array(items) = &containers.kind else {
            panic!("containers should be an array");
        };
        let count = items[0].get("max_instances").expect("count exists");
        assert_eq!(&SAMPLE[count.span.clone()], "10");
        assert_eq!(count.scalar_text(), Some("10"));
    }

    #[test]
    fn test_comment_markers_inside_strings_are_content() {
        let root = parse(r#"{"url": "https://example.com/*x*/"}"#).expect("should parse");
        assert_eq!(root.to_value()["url"], "https://example.com/*x*/");
    }

    #[test]
    fn test_error_reports_line_and_column() {
        let err = parse("{\n  \"a\": 1\n  \"b\": 2\n}").expect_err("missing comma");
        assert_eq!(err.line, 3);
        assert_eq!(err.column, 3);
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = parse("{ /* never closed ").expect_err("should fail");
        assert!(err.message.contains("block comment"));
    }

    #[test]
    fn test_surrogate_pair_escape() {
        let root = parse(r#"["\ud83d\ude80"]"#).expect("should parse");
        assert_eq!(root.to_value()[0], "\u{1F680}");
    }

    #[test]
    fn test_leading_byte_order_mark_is_skipped() {
        let text = "\u{feff}{ \"name\": \"bridge\" }";
        let root = parse(text).expect("BOM-prefixed text should parse");
        let name = root.get("name").expect("name exists");
        assert_eq!(&text[name.span.clone()], "\"bridge\"");
        assert_eq!(root.span.start, 3);
    }

    #[test]
    fn test_rejects_trailing_garbage() {
        assert!(parse("{} {}").is_err());
        assert!(parse("").is_err());
    }
}
