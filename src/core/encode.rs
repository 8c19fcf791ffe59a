//! Purpose: Stream encoders turning datum streams into response bodies.
//! Exports: `Encoded`, `ByteStream`, `encode`, `CSV_SAMPLE_ROWS`.
//! Role: The only producer of response body bytes for data and query routes.
//! Invariants: Encoders are pull-based; unpolled input is never consumed.
//! Invariants: Item-level failures encode inline; the stream keeps going.
//! Invariants: The CSV schema freezes after the first 1000 rows.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::json;

use crate::core::backend::DatumStream;
use crate::core::columns::{flatten, render_cell};
use crate::core::data::DataCodec;
use crate::core::error::{ApiResult, Error};
use crate::core::format::{CsvOptions, ResponseFormat};

pub type ByteStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Rows inspected to derive the CSV header before output begins.
pub const CSV_SAMPLE_ROWS: usize = 1000;

/// A negotiated body ready to send: media type, optional disposition, bytes.
pub struct Encoded {
    pub media_type: String,
    pub disposition: Option<String>,
    pub body: ByteStream,
}

pub fn encode(format: &ResponseFormat, data: DatumStream) -> Encoded {
    let media_type = format.media_type();
    let disposition = format.disposition().map(str::to_string);
    let body = match format {
        ResponseFormat::JsonStream { codec, .. } => json_stream(*codec, data),
        ResponseFormat::JsonArray { codec, .. } => json_array(*codec, data),
        ResponseFormat::Csv { options, .. } => csv(options.clone(), data),
    };
    Encoded {
        media_type,
        disposition,
        body,
    }
}

fn render_item(codec: DataCodec, item: ApiResult<crate::core::data::Datum>) -> String {
    match item.and_then(|datum| codec.render(&datum)) {
        Ok(text) => text,
        Err(err) => error_text(&err),
    }
}

fn error_text(err: &Error) -> String {
    json!({ "error": err.to_string() }).to_string()
}

/// One rendered value per CRLF-terminated line.
fn json_stream(codec: DataCodec, data: DatumStream) -> ByteStream {
    Box::pin(data.map(move |item| {
        let mut line = render_item(codec, item);
        line.push_str("\r\n");
        Bytes::from(line)
    }))
}

struct ArrayState {
    codec: DataCodec,
    data: DatumStream,
    opened: bool,
    any: bool,
    done: bool,
}

/// Chunked JSON array: `[\n`, comma-newline separated values, `\n]\n`.
/// Zero rows collapse to `[\n]\n`.
fn json_array(codec: DataCodec, data: DatumStream) -> ByteStream {
    let state = ArrayState {
        codec,
        data,
        opened: false,
        any: false,
        done: false,
    };
    Box::pin(stream::unfold(state, |mut st| async move {
        if !st.opened {
            st.opened = true;
            return Some((Bytes::from_static(b"[\n"), st));
        }
        if st.done {
            return None;
        }
        match st.data.next().await {
            Some(item) => {
                let text = render_item(st.codec, item);
                let chunk = if st.any {
                    format!(",\n{text}")
                } else {
                    text
                };
                st.any = true;
                Some((Bytes::from(chunk), st))
            }
            None => {
                st.done = true;
                let close: &'static [u8] = if st.any { b"\n]\n" } else { b"]\n" };
                Some((Bytes::from_static(close), st))
            }
        }
    }))
}

enum CsvRow {
    Cells(HashMap<String, String>),
    Broken(String),
}

struct CsvState {
    options: CsvOptions,
    data: DatumStream,
    header: Vec<String>,
    seen: BTreeSet<String>,
    buffered: VecDeque<CsvRow>,
    sampling: bool,
    header_pending: bool,
    exhausted: bool,
}

impl CsvState {
    /// Sample-phase row: unseen column paths still extend the header.
    fn buffer_row(&mut self, item: ApiResult<crate::core::data::Datum>) {
        let row = match item {
            Ok(datum) => {
                let mut cells = HashMap::new();
                for (path, scalar) in flatten(&datum) {
                    let name = path.render();
                    if self.seen.insert(name.clone()) {
                        self.header.push(name.clone());
                    }
                    cells.insert(name, render_cell(&scalar));
                }
                CsvRow::Cells(cells)
            }
            Err(err) => CsvRow::Broken(err.to_string()),
        };
        self.buffered.push_back(row);
    }

    /// Post-freeze row: the header no longer grows, new columns drop.
    fn make_row(&self, item: ApiResult<crate::core::data::Datum>) -> CsvRow {
        match item {
            Ok(datum) => CsvRow::Cells(
                flatten(&datum)
                    .into_iter()
                    .map(|(path, scalar)| (path.render(), render_cell(&scalar)))
                    .collect(),
            ),
            Err(err) => CsvRow::Broken(err.to_string()),
        }
    }

    fn header_line(&self) -> String {
        let mut line = self
            .header
            .iter()
            .map(|name| csv_escape(name, &self.options))
            .collect::<Vec<_>>()
            .join(&self.options.column_delimiter.to_string());
        line.push_str(&self.options.row_delimiter);
        line
    }

    fn render_row(&self, row: CsvRow) -> Option<String> {
        match row {
            CsvRow::Cells(cells) => {
                if self.header.is_empty() {
                    return None;
                }
                let mut line = self
                    .header
                    .iter()
                    .map(|name| {
                        csv_escape(cells.get(name).map_or("", String::as_str), &self.options)
                    })
                    .collect::<Vec<_>>()
                    .join(&self.options.column_delimiter.to_string());
                line.push_str(&self.options.row_delimiter);
                Some(line)
            }
            CsvRow::Broken(message) => {
                let mut line = csv_escape(&format!("error: {message}"), &self.options);
                line.push_str(&self.options.row_delimiter);
                Some(line)
            }
        }
    }
}

/// Buffers at most `CSV_SAMPLE_ROWS` rows to fix the header, then streams.
fn csv(options: CsvOptions, data: DatumStream) -> ByteStream {
    let state = CsvState {
        options,
        data,
        header: Vec::new(),
        seen: BTreeSet::new(),
        buffered: VecDeque::new(),
        sampling: true,
        header_pending: true,
        exhausted: false,
    };
    Box::pin(stream::unfold(state, |mut st| async move {
        if st.sampling {
            while st.buffered.len() < CSV_SAMPLE_ROWS {
                match st.data.next().await {
                    Some(item) => st.buffer_row(item),
                    None => {
                        st.exhausted = true;
                        break;
                    }
                }
            }
            st.sampling = false;
        }
        if st.header_pending {
            st.header_pending = false;
            if !st.header.is_empty() {
                let line = st.header_line();
                return Some((Bytes::from(line), st));
            }
        }
        loop {
            if let Some(row) = st.buffered.pop_front() {
                match st.render_row(row) {
                    Some(line) => return Some((Bytes::from(line), st)),
                    None => continue,
                }
            }
            if st.exhausted {
                return None;
            }
            match st.data.next().await {
                Some(item) => {
                    let row = st.make_row(item);
                    st.buffered.push_back(row);
                }
                None => st.exhausted = true,
            }
        }
    }))
}

/// Quotes a field when it contains framing characters; the quote and escape
/// characters inside a quoted field are prefixed with the escape character.
fn csv_escape(field: &str, options: &CsvOptions) -> String {
    let needs_quoting = field.contains(options.column_delimiter)
        || field.contains(options.quote_char)
        || field.contains(options.escape_char)
        || field.contains('\r')
        || field.contains('\n')
        || field.contains(&options.row_delimiter);
    if !needs_quoting {
        return field.to_string();
    }
    let mut out = String::with_capacity(field.len() + 2);
    out.push(options.quote_char);
    for c in field.chars() {
        if c == options.quote_char || c == options.escape_char {
            out.push(options.escape_char);
        }
        out.push(c);
    }
    out.push(options.quote_char);
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::StreamExt;
    use futures_util::stream;

    use super::{ByteStream, CSV_SAMPLE_ROWS, encode};
    use crate::core::backend::{DatumStream, datum_stream};
    use crate::core::data::{DataCodec, Datum};
    use crate::core::error::Error;
    use crate::core::format::{CsvOptions, ResponseFormat};

    async fn collect(body: ByteStream) -> String {
        let chunks: Vec<_> = body.collect().await;
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(&chunk);
        }
        String::from_utf8(out).expect("utf8 body")
    }

    fn ok_rows(rows: Vec<Datum>) -> DatumStream {
        datum_stream(rows.into_iter().map(Ok).collect())
    }

    fn stream_format() -> ResponseFormat {
        ResponseFormat::JsonStream {
            codec: DataCodec::Readable,
            disposition: None,
        }
    }

    fn array_format() -> ResponseFormat {
        ResponseFormat::JsonArray {
            codec: DataCodec::Readable,
            disposition: None,
        }
    }

    fn csv_format() -> ResponseFormat {
        ResponseFormat::Csv {
            options: CsvOptions::default(),
            disposition: None,
        }
    }

    #[tokio::test]
    async fn stream_renders_one_crlf_line_per_datum() {
        let rows = ok_rows(vec![Datum::Int(1), Datum::Int(2)]);
        let body = collect(encode(&stream_format(), rows).body).await;
        assert_eq!(body, "1\r\n2\r\n");
    }

    #[tokio::test]
    async fn stream_is_empty_for_no_rows() {
        let body = collect(encode(&stream_format(), ok_rows(vec![])).body).await;
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn stream_recovers_inline_from_failures() {
        let rows = datum_stream(vec![
            Ok(Datum::Int(1)),
            Ok(Datum::Dec(f64::NAN)),
            Err(Error::scan("boom")),
            Ok(Datum::Int(2)),
        ]);
        let body = collect(encode(&stream_format(), rows).body).await;
        let lines: Vec<_> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "1");
        assert!(lines[1].starts_with("{\"error\":"));
        assert!(lines[2].contains("scan failed: boom"));
        assert_eq!(lines[3], "2");
    }

    #[tokio::test]
    async fn array_with_no_rows_is_open_close() {
        let body = collect(encode(&array_format(), ok_rows(vec![])).body).await;
        assert_eq!(body, "[\n]\n");
    }

    #[tokio::test]
    async fn array_layout_matches_expected_framing() {
        let rows = ok_rows(vec![Datum::Int(1), Datum::Int(2)]);
        let body = collect(encode(&array_format(), rows).body).await;
        assert_eq!(body, "[\n1,\n2\n]\n");
        let rows = ok_rows(vec![Datum::Int(7)]);
        let body = collect(encode(&array_format(), rows).body).await;
        assert_eq!(body, "[\n7\n]\n");
    }

    #[tokio::test]
    async fn array_output_parses_as_json() {
        let rows = ok_rows(vec![
            Datum::obj([("a", Datum::Int(1))]),
            Datum::obj([("a", Datum::Int(2))]),
        ]);
        let body = collect(encode(&array_format(), rows).body).await;
        let value: serde_json::Value = serde_json::from_str(&body).expect("valid json");
        assert_eq!(value, serde_json::json!([{ "a": 1 }, { "a": 2 }]));
    }

    #[tokio::test]
    async fn csv_header_is_first_seen_union() {
        let rows = ok_rows(vec![
            Datum::obj([("a", Datum::Int(1))]),
            Datum::obj([("b", Datum::Int(2))]),
        ]);
        let body = collect(encode(&csv_format(), rows).body).await;
        assert_eq!(body, "a,b\r\n1,\r\n,2\r\n");
    }

    #[tokio::test]
    async fn csv_flattens_nested_values_into_dotted_columns() {
        let rows = ok_rows(vec![Datum::obj([
            ("addr", Datum::obj([("street", Datum::Str("Elm".into()))])),
            ("tags", Datum::Arr(vec![Datum::Int(1), Datum::Int(2)])),
        ])]);
        let body = collect(encode(&csv_format(), rows).body).await;
        assert_eq!(body, "addr.street,tags[0],tags[1]\r\nElm,1,2\r\n");
    }

    #[tokio::test]
    async fn csv_schema_freezes_after_sample_window() {
        let mut rows: Vec<_> = (0..CSV_SAMPLE_ROWS)
            .map(|i| Ok(Datum::obj([("a", Datum::Int(i as i64))])))
            .collect();
        rows.push(Ok(Datum::obj([
            ("a", Datum::Int(-1)),
            ("late", Datum::Str("dropped".into())),
        ])));
        let body = collect(encode(&csv_format(), datum_stream(rows)).body).await;
        let lines: Vec<_> = body.split("\r\n").collect();
        assert_eq!(lines[0], "a");
        assert_eq!(lines[CSV_SAMPLE_ROWS + 1], "-1");
        assert!(!body.contains("late"));
        assert!(!body.contains("dropped"));
    }

    #[tokio::test]
    async fn csv_escapes_fields_containing_framing_characters() {
        let rows = ok_rows(vec![Datum::obj([
            ("a", Datum::Str("x,y".into())),
            ("b", Datum::Str("he said \"hi\"".into())),
        ])]);
        let body = collect(encode(&csv_format(), rows).body).await;
        assert_eq!(body, "a,b\r\n\"x,y\",\"he said \"\"hi\"\"\"\r\n");
    }

    #[tokio::test]
    async fn csv_honors_custom_delimiters() {
        let format = ResponseFormat::Csv {
            options: CsvOptions {
                column_delimiter: '|',
                row_delimiter: ";".into(),
                quote_char: '\'',
                escape_char: '\'',
            },
            disposition: None,
        };
        let rows = ok_rows(vec![Datum::obj([
            ("a", Datum::Str("p|q".into())),
            ("b", Datum::Int(2)),
        ])]);
        let body = collect(encode(&format, rows).body).await;
        assert_eq!(body, "a|b;'p|q'|2;");
    }

    #[tokio::test]
    async fn csv_with_no_rows_is_empty() {
        let body = collect(encode(&csv_format(), ok_rows(vec![])).body).await;
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn encoder_pulls_only_what_is_polled() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let rows: DatumStream = Box::pin(stream::unfold(0u64, move |n| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Some((Ok(Datum::Int(n as i64)), n + 1))
            }
        }));
        let mut body = encode(&stream_format(), rows).body;
        let first = body.next().await.expect("chunk");
        assert_eq!(&first[..], b"0\r\n");
        let _second = body.next().await.expect("chunk");
        drop(body);
        assert!(pulled.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn encoded_media_type_matches_format() {
        let encoded = encode(&csv_format(), ok_rows(vec![]));
        assert!(encoded.media_type.starts_with("text/csv"));
        assert!(encoded.disposition.is_none());
    }
}
