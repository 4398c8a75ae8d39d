//! Readable-data text emitter.

use lodestone_shared::errors::LodestoneResult;

use crate::stream::Stream;

use super::event::{OutputTarget, RdEvent};

/// Emits readable-data statements, tracking block indentation.
pub struct RdEmitter<'a> {
    stream: &'a mut dyn Stream,
    depth: usize,
}

impl<'a> RdEmitter<'a> {
    pub fn new(stream: &'a mut dyn Stream) -> Self {
        Self { stream, depth: 0 }
    }

    pub fn emit(&mut self, event: &RdEvent) -> LodestoneResult<()> {
        let line = match event {
            RdEvent::ElementalIdentifierSetter { target, values } => {
                let rendered: Vec<String> =
                    values.iter().map(|v| v.as_str().to_string()).collect();
                format!("{} = {}", render_target(target), rendered.join(", "))
            }
            RdEvent::ElementalStringSetter { target, values } => {
                let rendered: Vec<String> = values.iter().map(|v| escape_string(v)).collect();
                format!("{} = {}", render_target(target), rendered.join(", "))
            }
            RdEvent::ElementalIntegerSetter { target, values } => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                format!("{} = {}", render_target(target), rendered.join(", "))
            }
            RdEvent::ElementalFloatingSetter { target, values } => {
                let rendered: Vec<String> = values.iter().map(|v| render_float(*v)).collect();
                format!("{} = {}", render_target(target), rendered.join(", "))
            }
            RdEvent::StructuralSetterBegin { target } => {
                let line = format!("{} {{", render_target(target));
                self.write_line(&line)?;
                self.depth += 1;
                return Ok(());
            }
            RdEvent::ArrayAppenderBegin { target } => {
                let line = format!("{} +{{", render_target(target));
                self.write_line(&line)?;
                self.depth += 1;
                return Ok(());
            }
            RdEvent::BlockEnd => {
                debug_assert!(self.depth > 0, "block end without open block");
                self.depth = self.depth.saturating_sub(1);
                self.write_line("}")?;
                return Ok(());
            }
        };
        self.write_line(&line)
    }

    fn write_line(&mut self, line: &str) -> LodestoneResult<()> {
        let mut rendered = String::with_capacity(self.depth * 4 + line.len() + 1);
        for _ in 0..self.depth {
            rendered.push_str("    ");
        }
        rendered.push_str(line);
        rendered.push('\n');
        self.stream.write_all(rendered.as_bytes())
    }
}

fn render_target(target: &OutputTarget) -> String {
    target.path()
}

/// Render a float so it always parses back as a float (keeps a decimal
/// point or exponent) without losing precision.
fn render_float(value: f64) -> String {
    let rendered = format!("{value:?}");
    if rendered.contains(['.', 'e', 'E', 'n', 'i']) {
        rendered
    } else {
        format!("{rendered}.0")
    }
}

fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::intern;
    use crate::rdata::parser::RdParser;
    use crate::stream::MemoryStream;

    #[test]
    fn emitted_statements_parse_back() {
        let mut stream = MemoryStream::new();
        {
            let mut emitter = RdEmitter::new(&mut stream);
            let events = vec![
                RdEvent::ElementalIntegerSetter {
                    target: OutputTarget {
                        components: vec![intern("a")],
                        array_index: None,
                    },
                    values: vec![7, -2],
                },
                RdEvent::StructuralSetterBegin {
                    target: OutputTarget {
                        components: vec![intern("inner")],
                        array_index: None,
                    },
                },
                RdEvent::ElementalStringSetter {
                    target: OutputTarget {
                        components: vec![intern("name")],
                        array_index: None,
                    },
                    values: vec!["two\nlines".to_string()],
                },
                RdEvent::BlockEnd,
                RdEvent::ElementalFloatingSetter {
                    target: OutputTarget {
                        components: vec![intern("ratio")],
                        array_index: Some(1),
                    },
                    values: vec![2.0],
                },
            ];
            for event in &events {
                emitter.emit(event).unwrap();
            }
        }

        let text = String::from_utf8(stream.into_inner()).unwrap();
        let mut parser = RdParser::new(text);
        let mut parsed = Vec::new();
        while let Some(event) = parser.step().unwrap() {
            parsed.push(event);
        }

        assert_eq!(parsed.len(), 5);
        assert!(matches!(
            &parsed[0],
            RdEvent::ElementalIntegerSetter { values, .. } if values == &vec![7, -2]
        ));
        assert!(matches!(
            &parsed[2],
            RdEvent::ElementalStringSetter { values, .. } if values[0] == "two\nlines"
        ));
        assert!(matches!(
            &parsed[4],
            RdEvent::ElementalFloatingSetter { values, .. } if values == &vec![2.0]
        ));
    }
}
