// Loosely-typed key/value objects carried inside control frames.
//
// Control frame payloads look like JSON objects but older peers emit them
// with unquoted keys and quoted numbers (`{sessionId:"42"}`), so a strict JSON
// parser would reject real traffic. This module parses a flat object whose
// keys may be bare identifiers or quoted strings and whose values may be
// quoted strings, numbers, `true`/`false`, `null`, or bare tokens. Nested
// objects and arrays are not part of the vocabulary and are rejected.
//
// Numbers are kept as their source text; `LooseValue::as_u64` and friends
// accept either a number or a quoted number so callers need not care which
// form the peer used.

use crate::error::FrameError;

/// A single value in a loose object.
#[derive(Clone, Debug, PartialEq)]
pub enum LooseValue {
    Null,
    Bool(bool),
    /// Unquoted numeric token, kept verbatim.
    Number(String),
    /// Quoted string, or an unquoted token that is not a number/keyword.
    Text(String),
}

impl LooseValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            LooseValue::Number(s) | LooseValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            LooseValue::Number(s) | LooseValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Booleans also arrive as the strings `"true"` / `"false"`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            LooseValue::Bool(b) => Some(*b),
            LooseValue::Text(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            LooseValue::Text(s) | LooseValue::Number(s) => Some(s),
            _ => None,
        }
    }

    fn encode_into(&self, out: &mut String) {
        match self {
            LooseValue::Null => out.push_str("null"),
            LooseValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            LooseValue::Number(n) => out.push_str(n),
            LooseValue::Text(s) => quote_into(s, out),
        }
    }
}

/// An ordered list of key/value pairs. Duplicate keys keep the first value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LooseObject {
    entries: Vec<(String, LooseValue)>,
}

impl LooseObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: LooseValue) -> Self {
        self.entries.push((key.to_owned(), value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&LooseValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as `{key: value, key: value}` with bare keys.
    pub fn encode(&self) -> String {
        let mut out = String::from("{");
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(key);
            out.push_str(": ");
            value.encode_into(&mut out);
        }
        out.push('}');
        out
    }

    pub fn parse(input: &str) -> Result<Self, FrameError> {
        Parser::new(input).object()
    }
}

fn quote_into(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn err(&self, reason: &'static str) -> FrameError {
        FrameError::Malformed {
            offset: self.pos,
            reason,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char, reason: &'static str) -> Result<(), FrameError> {
        if self.peek() == Some(want) {
            self.bump();
            Ok(())
        } else {
            Err(self.err(reason))
        }
    }

    fn object(mut self) -> Result<LooseObject, FrameError> {
        let mut obj = LooseObject::new();
        self.skip_ws();
        self.expect('{', "expected `{`")?;
        self.skip_ws();
        if self.peek() == Some('}') {
            self.bump();
        } else {
            loop {
                self.skip_ws();
                let key = self.key()?;
                self.skip_ws();
                self.expect(':', "expected `:` after key")?;
                self.skip_ws();
                let value = self.value()?;
                if !obj.contains(&key) {
                    obj.entries.push((key, value));
                }
                self.skip_ws();
                match self.bump() {
                    Some(',') => continue,
                    Some('}') => break,
                    _ => return Err(self.err("expected `,` or `}`")),
                }
            }
        }
        self.skip_ws();
        if self.pos != self.src.len() {
            return Err(self.err("trailing characters after object"));
        }
        Ok(obj)
    }

    fn key(&mut self) -> Result<String, FrameError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                self.quoted(q)
            }
            Some(_) => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '-' | '.'))
                {
                    self.bump();
                }
                if start == self.pos {
                    return Err(self.err("expected key"));
                }
                Ok(self.src[start..self.pos].to_owned())
            }
            None => Err(self.err("unexpected end of frame")),
        }
    }

    fn value(&mut self) -> Result<LooseValue, FrameError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                Ok(LooseValue::Text(self.quoted(q)?))
            }
            Some('{' | '[') => Err(self.err("nested values are not supported")),
            Some(_) => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c != ',' && c != '}') {
                    self.bump();
                }
                let token = self.src[start..self.pos].trim();
                if token.is_empty() {
                    return Err(self.err("expected value"));
                }
                Ok(match token {
                    "null" => LooseValue::Null,
                    "true" => LooseValue::Bool(true),
                    "false" => LooseValue::Bool(false),
                    t if t.parse::<f64>().is_ok() => LooseValue::Number(t.to_owned()),
                    t => LooseValue::Text(t.to_owned()),
                })
            }
            None => Err(self.err("unexpected end of frame")),
        }
    }

    fn quoted(&mut self, quote: char) -> Result<String, FrameError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('u') => {
                        let start = self.pos;
                        for _ in 0..4 {
                            self.bump();
                        }
                        let code = self
                            .src
                            .get(start..self.pos)
                            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                            .and_then(char::from_u32)
                            .ok_or_else(|| self.err("invalid unicode escape"))?;
                        out.push(code);
                    }
                    Some(c) => out.push(c),
                    None => return Err(self.err("unterminated string")),
                },
                Some(c) => out.push(c),
            }
        }
    }
}
