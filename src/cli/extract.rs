//! Incremental recovery of a JSON object from process output.
//!
//! Output arrives in arbitrary chunks and may mix log lines, partial
//! writes and the actual JSON document. The extractor scans for the first
//! balanced `{...}` span, tracking string literals so braces inside quoted
//! text do not affect nesting, and resolves as soon as that span parses.
//! A span that fails to parse, or is still open when the stream ends, is
//! abandoned and scanning resumes at the next `{` inside it.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

/// Value recovered from a single attempt's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtractedValue {
    /// Output contained parseable JSON.
    Json(Value),
    /// No JSON found; the trimmed output text.
    Raw(String),
}

impl ExtractedValue {
    /// Returns true if this is the raw-text fallback.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }

    /// Returns true if this is a JSON object carrying `"is_error": true`.
    #[must_use]
    pub fn reports_error(&self) -> bool {
        match self {
            Self::Json(Value::Object(map)) => {
                map.get("is_error").and_then(Value::as_bool) == Some(true)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct ScanState {
    pos: usize,
    start: Option<usize>,
    /// Open braces of the current span outside strings, outermost first.
    opens: Vec<usize>,
    /// Matching `}` of every nested `{` already closed in the current span.
    closes: HashMap<usize, usize>,
    in_string: bool,
    escaped: bool,
}

/// Streaming extractor for the first complete top-level JSON object.
#[derive(Debug, Default)]
pub struct StreamJsonExtractor {
    buffer: Vec<u8>,
    scan: ScanState,
    resolved: Option<Value>,
}

impl StreamJsonExtractor {
    /// Create an empty extractor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of output.
    ///
    /// Returns the resolved object once one is available. After resolution
    /// further chunks are ignored.
    pub fn push(&mut self, chunk: &[u8]) -> Option<&Value> {
        if self.resolved.is_none() {
            self.buffer.extend_from_slice(chunk);
            self.resolved = self.scan();
            if self.resolved.is_some() {
                self.buffer = Vec::new();
            }
        }
        self.resolved.as_ref()
    }

    /// Returns true once a balanced object has parsed.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    /// Get the resolved object, if any.
    #[must_use]
    pub fn resolved(&self) -> Option<&Value> {
        self.resolved.as_ref()
    }

    /// Finish the stream.
    ///
    /// Without a resolved object, the whole trimmed buffer is parsed as JSON;
    /// failing that, the trimmed text itself is returned.
    #[must_use]
    pub fn finish(mut self) -> ExtractedValue {
        while self.resolved.is_none() && self.scan.start.is_some() {
            self.resolved = self.abandon_span().or_else(|| self.scan());
        }

        if let Some(value) = self.resolved {
            return ExtractedValue::Json(value);
        }

        let text = String::from_utf8_lossy(&self.buffer);
        let trimmed = text.trim();
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => ExtractedValue::Json(value),
            Err(_) => ExtractedValue::Raw(trimmed.to_string()),
        }
    }

    /// Give up on the current span and try the braces nested inside it.
    ///
    /// A nested `{` outside any string scans exactly as it did within the
    /// span, so its recorded closing brace is reused instead of rescanning.
    /// A `{` inside a string of the abandoned span restarts a full scan there.
    fn abandon_span(&mut self) -> Option<Value> {
        let start = self.scan.start?;
        let end = self.scan.pos;
        let scan = std::mem::take(&mut self.scan);

        let mut at = start + 1;
        while let Some(offset) = self.buffer[at..end].iter().position(|&b| b == b'{') {
            let open = at + offset;
            match scan.closes.get(&open) {
                Some(&close) => {
                    if let Some(value) = parse_object(&self.buffer[open..=close]) {
                        return Some(value);
                    }
                }
                None if scan.opens.binary_search(&open).is_ok() => {}
                None => {
                    self.scan.pos = open;
                    return None;
                }
            }
            at = open + 1;
        }

        self.scan.pos = end;
        None
    }

    fn scan(&mut self) -> Option<Value> {
        while self.scan.pos < self.buffer.len() {
            let byte = self.buffer[self.scan.pos];
            let here = self.scan.pos;
            self.scan.pos += 1;

            if self.scan.start.is_none() {
                if byte == b'{' {
                    self.scan.start = Some(here);
                    self.scan.opens.push(here);
                }
                continue;
            }

            if self.scan.in_string {
                if self.scan.escaped {
                    self.scan.escaped = false;
                } else if byte == b'\\' {
                    self.scan.escaped = true;
                } else if byte == b'"' {
                    self.scan.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.scan.in_string = true,
                b'{' => self.scan.opens.push(here),
                b'}' => {
                    let Some(open) = self.scan.opens.pop() else {
                        continue;
                    };
                    if !self.scan.opens.is_empty() {
                        self.scan.closes.insert(open, here);
                        continue;
                    }
                    if let Some(value) = parse_object(&self.buffer[open..=here]) {
                        return Some(value);
                    }
                    if let Some(value) = self.abandon_span() {
                        return Some(value);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

fn parse_object(span: &[u8]) -> Option<Value> {
    match serde_json::from_slice::<Value>(span) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}
