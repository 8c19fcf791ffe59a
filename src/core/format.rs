//! Purpose: Accept/Content-Type negotiation for response and upload formats.
//! Exports: `ResponseFormat`, `CsvOptions`, `UploadFormat`, `resolve`, `upload_format`.
//! Role: Single place where media types and their extension params are read.
//! Invariants: `resolve(media_type())` reconstructs an equivalent format.
//! Invariants: Ranges are tried in ascending quality order; first match wins.
//! Invariants: CR/LF inside extension values travel escaped as `\r`/`\n`.

use crate::core::data::DataCodec;

pub const MT_LDJSON: &str = "application/ldjson";
pub const MT_X_LDJSON: &str = "application/x-ldjson";
pub const MT_JSON: &str = "application/json";
pub const MT_CSV: &str = "text/csv";

/// Canonical media types in precedence order. A wildcard range matches the
/// first of these, so `*/*` selects the line-delimited stream.
const CANONICAL: [&str; 4] = [MT_LDJSON, MT_X_LDJSON, MT_JSON, MT_CSV];

/// CSV framing characters. The row delimiter may be several characters; the
/// other three are single characters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsvOptions {
    pub column_delimiter: char,
    pub row_delimiter: String,
    pub quote_char: char,
    pub escape_char: char,
}

impl Default for CsvOptions {
    fn default() -> CsvOptions {
        CsvOptions {
            column_delimiter: ',',
            row_delimiter: "\r\n".to_string(),
            quote_char: '"',
            escape_char: '"',
        }
    }
}

/// The negotiated shape of a response body.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseFormat {
    JsonStream {
        codec: DataCodec,
        disposition: Option<String>,
    },
    JsonArray {
        codec: DataCodec,
        disposition: Option<String>,
    },
    Csv {
        options: CsvOptions,
        disposition: Option<String>,
    },
}

impl Default for ResponseFormat {
    fn default() -> ResponseFormat {
        ResponseFormat::JsonStream {
            codec: DataCodec::Readable,
            disposition: None,
        }
    }
}

impl ResponseFormat {
    pub fn disposition(&self) -> Option<&str> {
        match self {
            ResponseFormat::JsonStream { disposition, .. }
            | ResponseFormat::JsonArray { disposition, .. }
            | ResponseFormat::Csv { disposition, .. } => disposition.as_deref(),
        }
    }

    /// The parameterized media type for the Content-Type header. Feeding it
    /// back through `resolve` yields an equivalent format.
    pub fn media_type(&self) -> String {
        match self {
            ResponseFormat::JsonStream { codec, disposition } => {
                render_media_type(MT_LDJSON, *codec, &[], disposition.as_deref())
            }
            ResponseFormat::JsonArray { codec, disposition } => {
                render_media_type(MT_JSON, *codec, &[], disposition.as_deref())
            }
            ResponseFormat::Csv {
                options,
                disposition,
            } => {
                let params = [
                    ("columnDelimiter", options.column_delimiter.to_string()),
                    ("rowDelimiter", options.row_delimiter.clone()),
                    ("quoteChar", options.quote_char.to_string()),
                    ("escapeChar", options.escape_char.to_string()),
                ];
                render_media_type(MT_CSV, DataCodec::Readable, &params, disposition.as_deref())
            }
        }
    }
}

fn render_media_type(
    essence: &str,
    codec: DataCodec,
    params: &[(&str, String)],
    disposition: Option<&str>,
) -> String {
    let mut out = essence.to_string();
    for (name, value) in params {
        out.push_str("; ");
        out.push_str(name);
        out.push('=');
        out.push_str(&render_param_value(value));
    }
    if codec == DataCodec::Precise {
        out.push_str("; mode=precise");
    }
    if let Some(value) = disposition {
        out.push_str("; disposition=");
        out.push_str(&render_param_value(value));
    }
    out
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '-' | '_' | '.' | '+' | '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '^' | '`' | '|'
                | '~'
        )
}

/// Bare token when possible, otherwise a quoted string with `\"`, `\\`, and
/// the CR/LF escapes the media-type grammar cannot carry raw.
fn render_param_value(raw: &str) -> String {
    if !raw.is_empty() && raw.chars().all(is_token_char) {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn unescape_param_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// One parsed Accept media range (or a lone Content-Type value).
#[derive(Clone, Debug)]
struct MediaRange {
    kind: String,
    subtype: String,
    q: f32,
    params: Vec<(String, String)>,
}

impl MediaRange {
    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn matches(&self, canonical: &str) -> bool {
        let Some((kind, subtype)) = canonical.split_once('/') else {
            return false;
        };
        (self.kind == "*" || self.kind == kind) && (self.subtype == "*" || self.subtype == subtype)
    }
}

/// Splits on `sep` outside quoted strings, honoring backslash escapes.
fn split_quoted(input: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if in_quotes {
            current.push(c);
            match c {
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                '"' => in_quotes = false,
                _ => {}
            }
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            if c == '"' {
                in_quotes = true;
            }
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn parse_range(part: &str) -> Option<MediaRange> {
    let mut pieces = split_quoted(part, ';').into_iter();
    let essence = pieces.next()?.trim().to_ascii_lowercase();
    let (kind, subtype) = essence.split_once('/')?;
    if kind.is_empty() || subtype.is_empty() {
        return None;
    }
    let mut q = 1.0f32;
    let mut params = Vec::new();
    for piece in pieces {
        let Some((name, value)) = piece.split_once('=') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            continue;
        }
        let value = if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            unescape_param_value(&value[1..value.len() - 1])
        } else {
            value.to_string()
        };
        if name.eq_ignore_ascii_case("q") {
            q = value.parse::<f32>().unwrap_or(1.0).clamp(0.0, 1.0);
        } else {
            params.push((name.to_string(), value));
        }
    }
    Some(MediaRange {
        kind: kind.to_string(),
        subtype: subtype.to_string(),
        q,
        params,
    })
}

fn parse_ranges(header: &str) -> Vec<MediaRange> {
    split_quoted(header, ',')
        .iter()
        .filter_map(|part| parse_range(part))
        .collect()
}

fn codec_of(range: &MediaRange) -> DataCodec {
    if range.param("mode") == Some("precise") {
        DataCodec::Precise
    } else {
        DataCodec::Readable
    }
}

fn one_char(value: &str) -> Option<char> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

fn csv_options_of(range: &MediaRange) -> CsvOptions {
    let mut options = CsvOptions::default();
    if let Some(c) = range.param("columnDelimiter").and_then(one_char) {
        options.column_delimiter = c;
    }
    if let Some(value) = range.param("rowDelimiter") {
        if !value.is_empty() {
            options.row_delimiter = value.to_string();
        }
    }
    if let Some(c) = range.param("quoteChar").and_then(one_char) {
        options.quote_char = c;
    }
    if let Some(c) = range.param("escapeChar").and_then(one_char) {
        options.escape_char = c;
    }
    options
}

fn materialize(canonical: &str, range: &MediaRange) -> ResponseFormat {
    let disposition = range.param("disposition").map(str::to_string);
    match canonical {
        MT_CSV => ResponseFormat::Csv {
            options: csv_options_of(range),
            disposition,
        },
        MT_JSON if range.param("boundary") != Some("NL") => ResponseFormat::JsonArray {
            codec: codec_of(range),
            disposition,
        },
        _ => ResponseFormat::JsonStream {
            codec: codec_of(range),
            disposition,
        },
    }
}

/// Negotiates the response format from an Accept header.
///
/// Ranges sort by ascending quality value and the first range matching a
/// canonical type wins, so the lowest-q acceptable alternative is selected.
/// Documented behavior; callers rely on it staying put. Absent, empty, or
/// unmatched headers fall back to the readable line stream.
pub fn resolve(accept: Option<&str>) -> ResponseFormat {
    let Some(header) = accept else {
        return ResponseFormat::default();
    };
    let mut ranges = parse_ranges(header);
    if ranges.is_empty() {
        return ResponseFormat::default();
    }
    ranges.sort_by(|a, b| a.q.total_cmp(&b.q));
    for range in &ranges {
        for canonical in CANONICAL {
            if range.matches(canonical) {
                return materialize(canonical, range);
            }
        }
    }
    ResponseFormat::default()
}

/// How an upload body should be decoded.
#[derive(Clone, Debug, PartialEq)]
pub enum UploadFormat {
    Csv(CsvOptions),
    Lines(DataCodec),
}

/// Maps a Content-Type to a decode strategy: CSV with its parameters,
/// line-delimited JSON for the ldjson types (and `application/json` with
/// `boundary=NL`), otherwise the Precise line fallback.
pub fn upload_format(content_type: Option<&str>) -> UploadFormat {
    let Some(header) = content_type else {
        return UploadFormat::Lines(DataCodec::Precise);
    };
    let Some(range) = parse_ranges(header).into_iter().next() else {
        return UploadFormat::Lines(DataCodec::Precise);
    };
    let essence = format!("{}/{}", range.kind, range.subtype);
    match essence.as_str() {
        MT_CSV => UploadFormat::Csv(csv_options_of(&range)),
        MT_LDJSON | MT_X_LDJSON => UploadFormat::Lines(codec_of(&range)),
        MT_JSON if range.param("boundary") == Some("NL") => UploadFormat::Lines(codec_of(&range)),
        _ => UploadFormat::Lines(DataCodec::Precise),
    }
}
