// record emission.
//
// the driver produces structured records; how they look on the wire is a
// template concern. templates are printf-like format strings with named
// `{field}` placeholders, parsed once up front so a bad template fails
// before the batch starts rather than on the first match.

use std::io::Write;

use chrono::{DateTime, Local};
use failure::{Error, Fail};

/// One emitted record: a preferred match, or a no-match marker.
#[derive(Debug, Clone)]
pub enum Record {
    Match {
        /// object name: a path, or `archive.zip!entry`.
        path: String,
        format_id: u64,
        puid: String,
        format_name: String,
        signature_id: u64,
        signature_name: String,
        /// total preferred matches for this object.
        count: usize,
        size: u64,
        timestamp: DateTime<Local>,
        elapsed_ms: u64,
    },
    NoMatch {
        path: String,
        size: u64,
        timestamp: DateTime<Local>,
        elapsed_ms: u64,
    },
}

#[derive(Debug, Fail)]
pub enum TemplateError {
    #[fail(display = "unknown template field: {{{}}}", _0)]
    UnknownField(String),
    #[fail(display = "unclosed {{ in template")]
    Unclosed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Path,
    FormatId,
    Puid,
    Format,
    SignatureId,
    Signature,
    Count,
    Size,
    Timestamp,
    Elapsed,
}

impl Field {
    fn parse(name: &str) -> Result<Field, TemplateError> {
        match name {
            "path" => Ok(Field::Path),
            "format_id" => Ok(Field::FormatId),
            "puid" => Ok(Field::Puid),
            "format" => Ok(Field::Format),
            "signature_id" => Ok(Field::SignatureId),
            "signature" => Ok(Field::Signature),
            "count" => Ok(Field::Count),
            "size" => Ok(Field::Size),
            "timestamp" => Ok(Field::Timestamp),
            "elapsed" => Ok(Field::Elapsed),
            other => Err(TemplateError::UnknownField(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// A parsed record template.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(text: &str) -> Result<Template, TemplateError> {
        let mut segments = vec![];
        let mut literal = String::new();
        let mut chars = text.chars();

        while let Some(c) = chars.next() {
            if c != '{' {
                literal.push(c);
                continue;
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(literal.clone()));
                literal.clear();
            }

            let mut name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => name.push(c),
                    None => return Err(TemplateError::Unclosed),
                }
            }
            segments.push(Segment::Field(Field::parse(&name)?));
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Template { segments })
    }

    /// Render the record through this template. Fields a no-match record
    /// does not carry render empty.
    pub fn render(&self, record: &Record) -> String {
        let mut out = String::new();
        for segment in self.segments.iter() {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => out.push_str(&render_field(record, *field)),
            }
        }
        out
    }
}

fn render_field(record: &Record, field: Field) -> String {
    match record {
        Record::Match {
            path,
            format_id,
            puid,
            format_name,
            signature_id,
            signature_name,
            count,
            size,
            timestamp,
            elapsed_ms,
        } => match field {
            Field::Path => path.clone(),
            Field::FormatId => format_id.to_string(),
            Field::Puid => puid.clone(),
            Field::Format => format_name.clone(),
            Field::SignatureId => signature_id.to_string(),
            Field::Signature => signature_name.clone(),
            Field::Count => count.to_string(),
            Field::Size => size.to_string(),
            Field::Timestamp => timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            Field::Elapsed => elapsed_ms.to_string(),
        },
        Record::NoMatch {
            path,
            size,
            timestamp,
            elapsed_ms,
        } => match field {
            Field::Path => path.clone(),
            Field::Size => size.to_string(),
            Field::Timestamp => timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            Field::Elapsed => elapsed_ms.to_string(),
            Field::Count => "0".to_string(),
            _ => String::new(),
        },
    }
}

/// Consumes records. The driver serialises calls, so whatever a sink
/// writes is atomic per object.
pub trait RecordSink {
    fn emit(&mut self, record: &Record) -> Result<(), Error>;
}

/// Renders records through the configured templates onto a writer.
pub struct TemplateSink<W: Write> {
    match_template: Template,
    nomatch_template: Template,
    out: W,
}

impl<W: Write> TemplateSink<W> {
    pub fn new(out: W, match_template: &str, nomatch_template: &str) -> Result<TemplateSink<W>, Error> {
        Ok(TemplateSink {
            match_template: Template::parse(match_template)?,
            nomatch_template: Template::parse(nomatch_template)?,
            out,
        })
    }
}

impl<W: Write> RecordSink for TemplateSink<W> {
    fn emit(&mut self, record: &Record) -> Result<(), Error> {
        let line = match record {
            Record::Match { .. } => self.match_template.render(record),
            Record::NoMatch { .. } => self.nomatch_template.render(record),
        };
        self.out.write_all(line.as_bytes())?;
        Ok(())
    }
}
