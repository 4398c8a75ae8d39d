//! Line-based readable-data parser.
//!
//! Statements are one of `path = values`, `path[index] = values`,
//! `path { `, `path +{ ` and `}`. Identifiers are `[A-Za-z_][A-Za-z0-9_]*`
//! with `.` as path separator; strings are double-quoted with the usual
//! escapes. Comment lines start with `//` and blank lines are skipped;
//! comments are recognized at line granularity only.

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

use crate::intern::intern;
use crate::stream::{Stream, read_to_end};

use super::event::{MAX_OUTPUT_TARGET_COMPONENTS, OutputTarget, RdEvent};

pub struct RdParser {
    text: String,
    cursor: usize,
    line_number: usize,
}

impl RdParser {
    pub fn new(text: String) -> Self {
        Self {
            text,
            cursor: 0,
            line_number: 0,
        }
    }

    /// Read the remainder of `stream` and parse it.
    pub fn from_stream(stream: &mut dyn Stream) -> LodestoneResult<Self> {
        let bytes = read_to_end(stream)?;
        let text = String::from_utf8(bytes)
            .map_err(|e| LodestoneError::Serialization(format!("not valid UTF-8: {e}")))?;
        Ok(Self::new(text))
    }

    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Parse the next event, or `None` at end of input.
    pub fn step(&mut self) -> LodestoneResult<Option<RdEvent>> {
        loop {
            let Some(raw_line) = self.next_line() else {
                return Ok(None);
            };
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            return self.parse_statement(line).map(Some);
        }
    }

    fn next_line(&mut self) -> Option<String> {
        if self.cursor >= self.text.len() {
            return None;
        }
        let rest = &self.text[self.cursor..];
        let (line, consumed) = match rest.find('\n') {
            Some(position) => (&rest[..position], position + 1),
            None => (rest, rest.len()),
        };
        self.cursor += consumed;
        self.line_number += 1;
        Some(line.to_string())
    }

    fn error(&self, message: impl Into<String>) -> LodestoneError {
        LodestoneError::Serialization(format!(
            "line {}: {}",
            self.line_number,
            message.into()
        ))
    }

    fn parse_statement(&self, line: &str) -> LodestoneResult<RdEvent> {
        if line == "}" {
            return Ok(RdEvent::BlockEnd);
        }

        let mut lexer = Lexer::new(line);
        let target = self.parse_target(&mut lexer)?;
        lexer.skip_whitespace();

        if lexer.consume_str("+{") {
            lexer.skip_whitespace();
            if !lexer.is_at_end() {
                return Err(self.error("unexpected input after '+{'"));
            }
            if target.array_index.is_some() {
                return Err(self.error("array appender cannot carry an index"));
            }
            return Ok(RdEvent::ArrayAppenderBegin { target });
        }

        if lexer.consume('{') {
            lexer.skip_whitespace();
            if !lexer.is_at_end() {
                return Err(self.error("unexpected input after '{'"));
            }
            return Ok(RdEvent::StructuralSetterBegin { target });
        }

        if !lexer.consume('=') {
            return Err(self.error("expected '=', '{' or '+{' after output target"));
        }

        self.parse_setter(&mut lexer, target)
    }

    fn parse_target(&self, lexer: &mut Lexer) -> LodestoneResult<OutputTarget> {
        let mut target = OutputTarget::default();
        loop {
            lexer.skip_whitespace();
            let identifier = lexer
                .take_identifier()
                .ok_or_else(|| self.error("expected identifier"))?;
            if target.components.len() >= MAX_OUTPUT_TARGET_COMPONENTS {
                return Err(self.error(format!(
                    "output target exceeds {MAX_OUTPUT_TARGET_COMPONENTS} components"
                )));
            }
            target.components.push(intern(&identifier));

            if lexer.consume('.') {
                continue;
            }
            break;
        }

        if lexer.consume('[') {
            lexer.skip_whitespace();
            let digits = lexer
                .take_while(|c| c.is_ascii_digit())
                .ok_or_else(|| self.error("expected array index"))?;
            let index: u32 = digits
                .parse()
                .map_err(|_| self.error("array index out of range"))?;
            lexer.skip_whitespace();
            if !lexer.consume(']') {
                return Err(self.error("expected ']' after array index"));
            }
            target.array_index = Some(index);
        }

        Ok(target)
    }

    fn parse_setter(&self, lexer: &mut Lexer, target: OutputTarget) -> LodestoneResult<RdEvent> {
        #[derive(PartialEq)]
        enum Kind {
            Identifier,
            Str,
            Integer,
            Floating,
        }

        let mut kind: Option<Kind> = None;
        let mut identifiers = Vec::new();
        let mut strings = Vec::new();
        let mut integers = Vec::new();
        let mut floats = Vec::new();

        loop {
            lexer.skip_whitespace();
            if lexer.is_at_end() {
                return Err(self.error("expected value after '='"));
            }

            let value_kind = if lexer.peek() == Some('"') {
                strings.push(self.parse_string(lexer)?);
                Kind::Str
            } else if lexer
                .peek()
                .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+')
            {
                let literal = lexer
                    .take_while(|c| {
                        c.is_ascii_digit()
                            || c == '-'
                            || c == '+'
                            || c == '.'
                            || c == 'e'
                            || c == 'E'
                    })
                    .ok_or_else(|| self.error("expected numeric value"))?;
                if literal.contains(['.', 'e', 'E']) {
                    let value: f64 = literal
                        .parse()
                        .map_err(|_| self.error(format!("bad floating value '{literal}'")))?;
                    floats.push(value);
                    Kind::Floating
                } else {
                    let value: i64 = literal
                        .parse()
                        .map_err(|_| self.error(format!("bad integer value '{literal}'")))?;
                    integers.push(value);
                    Kind::Integer
                }
            } else if let Some(identifier) = lexer.take_identifier() {
                identifiers.push(intern(&identifier));
                Kind::Identifier
            } else {
                return Err(self.error("unrecognized value"));
            };

            match &kind {
                None => kind = Some(value_kind),
                Some(existing) if *existing == value_kind => {}
                Some(_) => {
                    // Integers promote into an existing float list and
                    // vice versa; everything else must stay homogeneous.
                    match (kind.as_ref().expect("set on first value"), &value_kind) {
                        (Kind::Floating, Kind::Integer) => {
                            floats.push(integers.pop().expect("just parsed") as f64);
                        }
                        (Kind::Integer, Kind::Floating) => {
                            for value in integers.drain(..) {
                                floats.push(value as f64);
                            }
                            floats.rotate_left(1);
                            kind = Some(Kind::Floating);
                        }
                        _ => return Err(self.error("mixed value kinds in one setter")),
                    }
                }
            }

            lexer.skip_whitespace();
            if lexer.consume(',') {
                continue;
            }
            if lexer.is_at_end() {
                break;
            }
            return Err(self.error("unexpected input after value list"));
        }

        Ok(match kind.expect("at least one value parsed") {
            Kind::Identifier => RdEvent::ElementalIdentifierSetter {
                target,
                values: identifiers,
            },
            Kind::Str => RdEvent::ElementalStringSetter {
                target,
                values: strings,
            },
            Kind::Integer => RdEvent::ElementalIntegerSetter {
                target,
                values: integers,
            },
            Kind::Floating => RdEvent::ElementalFloatingSetter {
                target,
                values: floats,
            },
        })
    }

    fn parse_string(&self, lexer: &mut Lexer) -> LodestoneResult<String> {
        debug_assert_eq!(lexer.peek(), Some('"'));
        lexer.consume('"');

        let mut value = String::new();
        loop {
            match lexer.next() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(value),
                Some('\\') => match lexer.next() {
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    other => {
                        return Err(self.error(format!("bad string escape '\\{other:?}'")));
                    }
                },
                Some(c) => value.push(c),
            }
        }
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            chars: line.chars().peekable(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn next(&mut self) -> Option<char> {
        self.chars.next()
    }

    fn is_at_end(&mut self) -> bool {
        self.peek().is_none()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.next();
        }
    }

    fn consume(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.next();
            return true;
        }
        false
    }

    fn consume_str(&mut self, expected: &str) -> bool {
        let mut probe = self.chars.clone();
        for expected_char in expected.chars() {
            if probe.next() != Some(expected_char) {
                return false;
            }
        }
        self.chars = probe;
        true
    }

    fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) -> Option<String> {
        let mut taken = String::new();
        while self.peek().is_some_and(&mut predicate) {
            taken.push(self.next().expect("peek succeeded"));
        }
        (!taken.is_empty()).then_some(taken)
    }

    fn take_identifier(&mut self) -> Option<String> {
        if !self
            .peek()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            return None;
        }
        self.take_while(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}
