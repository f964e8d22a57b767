//! Message templates for the `tracing` layer
//!
//! `{message}` expands to the event message and `{name}` to the value of the
//! field `name`, or nothing when the event has no such field. A section
//! `{?name}...{/name}` is rendered only when the field is present. `{{` and
//! `}}` are literal braces.

use crate::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(String),
    Section(String, Vec<Segment>),
}

/// Parsed message template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    segments: Vec<Segment>,
}

impl MessageTemplate {
    /// Parse a template
    pub fn parse(source: &str) -> Result<Self> {
        let mut parser = Parser {
            rest: source,
            offset: 0,
        };
        let segments = parser.segments(None)?;
        Ok(Self { segments })
    }

    /// Render with `message` and a field lookup
    pub fn render<F>(&self, message: &str, field: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = String::new();
        render_into(&self.segments, message, &field, &mut out);
        out
    }
}

fn render_into<F>(segments: &[Segment], message: &str, field: &F, out: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Field(name) if name == "message" => out.push_str(message),
            Segment::Field(name) => {
                if let Some(value) = field(name) {
                    out.push_str(&value);
                }
            }
            Segment::Section(name, body) => {
                if field(name).is_some() {
                    render_into(body, message, field, out);
                }
            }
        }
    }
}

struct Parser<'a> {
    rest: &'a str,
    offset: usize,
}

impl Parser<'_> {
    fn error(&self, what: &str) -> ClientError {
        ClientError::Config(format!("template {} at offset {}", what, self.offset))
    }

    fn advance(&mut self, n: usize) {
        self.rest = &self.rest[n..];
        self.offset += n;
    }

    /// Parse until the end of input, or until `{/name}` closes `section`
    fn segments(&mut self, section: Option<&str>) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut text = String::new();

        loop {
            let Some(pos) = self.rest.find(['{', '}']) else {
                text.push_str(self.rest);
                self.advance(self.rest.len());
                break;
            };
            text.push_str(&self.rest[..pos]);
            self.advance(pos);

            if self.rest.starts_with("{{") || self.rest.starts_with("}}") {
                text.push_str(&self.rest[..1]);
                self.advance(2);
                continue;
            }
            if self.rest.starts_with('}') {
                return Err(self.error("has an unmatched '}'"));
            }

            let Some(end) = self.rest.find('}') else {
                return Err(self.error("has an unclosed '{'"));
            };
            let tag = self.rest[1..end].trim().to_string();
            self.advance(end + 1);

            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }

            if let Some(name) = tag.strip_prefix('?') {
                let name = valid_name(name).ok_or_else(|| self.error("has an empty section name"))?;
                let body = self.segments(Some(name))?;
                segments.push(Segment::Section(name.to_string(), body));
            } else if let Some(name) = tag.strip_prefix('/') {
                return match section {
                    Some(open) if open == name.trim() => Ok(segments),
                    _ => Err(self.error(&format!("closes '{}' which is not open", name.trim()))),
                };
            } else {
                let name = valid_name(&tag).ok_or_else(|| self.error("has an empty field name"))?;
                segments.push(Segment::Field(name.to_string()));
            }
        }

        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        match section {
            Some(open) => Err(self.error(&format!("ends inside section '{}'", open))),
            None => Ok(segments),
        }
    }
}

fn valid_name(name: &str) -> Option<&str> {
    let name = name.trim();
    (!name.is_empty()).then_some(name)
}
