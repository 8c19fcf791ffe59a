//! Purpose: Upload decoding from request bodies into datums.
//! Exports: `decode`.
//! Role: Inverse of the encoders, tolerant of per-row failures.
//! Invariants: A bad row or line becomes a `WriteError`, never an abort.
//! Invariants: Row delimiters inside quoted CSV fields are field content.

use crate::core::backend::WriteError;
use crate::core::columns::{ColumnPath, Seg, parse_cell, unflatten};
use crate::core::data::{DataCodec, Datum};
use crate::core::format::{CsvOptions, UploadFormat, upload_format};

/// Decodes an upload body per its Content-Type. Returns the failed rows and
/// the decoded values; either side may be empty, neither aborts the other.
pub fn decode(content_type: Option<&str>, body: &str) -> (Vec<WriteError>, Vec<Datum>) {
    match upload_format(content_type) {
        UploadFormat::Csv(options) => decode_csv(&options, body),
        UploadFormat::Lines(codec) => decode_lines(codec, body),
    }
}

fn decode_lines(codec: DataCodec, body: &str) -> (Vec<WriteError>, Vec<Datum>) {
    let mut errors = Vec::new();
    let mut values = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match codec.parse(line) {
            Ok(datum) => values.push(datum),
            Err(err) => errors.push(WriteError::new(
                Datum::Str(line.to_string()),
                err.to_string(),
            )),
        }
    }
    (errors, values)
}

fn decode_csv(options: &CsvOptions, body: &str) -> (Vec<WriteError>, Vec<Datum>) {
    let mut errors = Vec::new();
    let mut values = Vec::new();
    let mut records = split_records(body, options).into_iter();

    let header: Vec<ColumnPath> = match records.next() {
        None => {
            errors.push(WriteError::new(Datum::Null, "the CSV body has no header row"));
            return (errors, values);
        }
        Some(record) => match record.cells {
            Ok(cells) => cells
                .into_iter()
                .map(|cell| match ColumnPath::parse(&cell) {
                    Ok(path) => path,
                    Err(_) => ColumnPath::new(vec![Seg::Field(cell)]),
                })
                .collect(),
            Err(message) => {
                errors.push(WriteError::new(
                    Datum::Str(record.raw),
                    format!("malformed header row: {message}"),
                ));
                return (errors, values);
            }
        },
    };

    for record in records {
        match record.cells {
            Err(message) => errors.push(WriteError::new(Datum::Str(record.raw), message)),
            Ok(cells) => {
                let pairs: Vec<(ColumnPath, Datum)> = header
                    .iter()
                    .zip(cells.iter())
                    .filter(|(_, cell)| !cell.is_empty())
                    .map(|(path, cell)| (path.clone(), parse_cell(cell)))
                    .collect();
                match unflatten(pairs) {
                    Ok(datum) => values.push(datum),
                    Err(err) => {
                        errors.push(WriteError::new(Datum::Str(record.raw), err.to_string()))
                    }
                }
            }
        }
    }
    (errors, values)
}

struct RawRecord {
    raw: String,
    cells: Result<Vec<String>, String>,
}

/// Splits a CSV body into records. Quoting follows the negotiated characters:
/// a field beginning with the quote character runs to the matching close,
/// with the escape character protecting embedded quotes and escapes. The row
/// delimiter only terminates records outside quotes; blank records drop.
fn split_records(body: &str, options: &CsvOptions) -> Vec<RawRecord> {
    let chars: Vec<char> = body.chars().collect();
    let delim: Vec<char> = options.row_delimiter.chars().collect();
    let mut records = Vec::new();
    let mut raw = String::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut closed = false;
    let mut error: Option<String> = None;
    let mut i = 0;

    while i < chars.len() {
        if !in_quotes && !delim.is_empty() && chars[i..].starts_with(&delim[..]) {
            if raw.is_empty() {
                fields.clear();
                field.clear();
                error = None;
            } else {
                fields.push(std::mem::take(&mut field));
                let cells = match error.take() {
                    Some(message) => {
                        fields.clear();
                        Err(message)
                    }
                    None => Ok(std::mem::take(&mut fields)),
                };
                records.push(RawRecord {
                    raw: std::mem::take(&mut raw),
                    cells,
                });
            }
            closed = false;
            i += delim.len();
            continue;
        }
        let c = chars[i];
        raw.push(c);
        if in_quotes {
            if c == options.escape_char
                && i + 1 < chars.len()
                && (chars[i + 1] == options.quote_char || chars[i + 1] == options.escape_char)
            {
                field.push(chars[i + 1]);
                raw.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == options.quote_char {
                in_quotes = false;
                closed = true;
                i += 1;
                continue;
            }
            field.push(c);
            i += 1;
        } else {
            if c == options.column_delimiter {
                fields.push(std::mem::take(&mut field));
                closed = false;
                i += 1;
                continue;
            }
            if c == options.quote_char && field.is_empty() && !closed {
                in_quotes = true;
                i += 1;
                continue;
            }
            if closed && error.is_none() {
                error = Some("unexpected character after closing quote".to_string());
            }
            field.push(c);
            i += 1;
        }
    }

    if in_quotes && error.is_none() {
        error = Some("unterminated quoted field".to_string());
    }
    if !raw.is_empty() {
        fields.push(field);
        let cells = match error {
            Some(message) => Err(message),
            None => Ok(fields),
        };
        records.push(RawRecord { raw, cells });
    }
    records
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::decode;
    use crate::core::backend::datum_stream;
    use crate::core::data::Datum;
    use crate::core::encode::encode;
    use crate::core::format::{CsvOptions, ResponseFormat};

    const CSV: Option<&str> = Some("text/csv");

    #[test]
    fn csv_one_malformed_row_yields_one_error_two_values() {
        let body = "a,b\r\n1,2\r\n\"x\"junk,3\r\n4,5\r\n";
        let (errors, values) = decode(CSV, body);
        assert_eq!(errors.len(), 1);
        assert_eq!(values.len(), 2);
        assert_eq!(
            errors[0].detail.as_deref(),
            Some("unexpected character after closing quote")
        );
        assert_eq!(
            values[0],
            Datum::obj([("a", Datum::Int(1)), ("b", Datum::Int(2))])
        );
    }

    #[test]
    fn csv_without_header_is_one_error_no_data() {
        let (errors, values) = decode(CSV, "");
        assert_eq!(errors.len(), 1);
        assert!(values.is_empty());
        assert_eq!(errors[0].value, Datum::Null);
    }

    #[test]
    fn csv_unterminated_quote_swallows_the_rest() {
        let body = "a,b\r\n\"open,2\r\n3,4\r\n";
        let (errors, values) = decode(CSV, body);
        assert_eq!(errors.len(), 1);
        assert!(values.is_empty());
        assert_eq!(
            errors[0].detail.as_deref(),
            Some("unterminated quoted field")
        );
    }

    #[test]
    fn csv_empty_cells_are_missing_fields() {
        let body = "a,b\r\n1,\r\n,2\r\n";
        let (errors, values) = decode(CSV, body);
        assert!(errors.is_empty());
        assert_eq!(values[0], Datum::obj([("a", Datum::Int(1))]));
        assert_eq!(values[1], Datum::obj([("b", Datum::Int(2))]));
    }

    #[test]
    fn csv_quoted_fields_keep_delimiters_and_newlines() {
        let body = "a,b\r\n\"x,y\",\"line\r\nbreak\"\r\n";
        let (errors, values) = decode(CSV, body);
        assert!(errors.is_empty());
        assert_eq!(
            values[0],
            Datum::obj([
                ("a", Datum::Str("x,y".into())),
                ("b", Datum::Str("line\r\nbreak".into()))
            ])
        );
    }

    #[test]
    fn csv_dotted_header_builds_nested_rows() {
        let body = "name,addr.street,tags[0]\r\nAnn,Elm,7\r\n";
        let (errors, values) = decode(CSV, body);
        assert!(errors.is_empty());
        assert_eq!(
            values[0],
            Datum::obj([
                ("name", Datum::Str("Ann".into())),
                ("addr", Datum::obj([("street", Datum::Str("Elm".into()))])),
                ("tags", Datum::Arr(vec![Datum::Int(7)])),
            ])
        );
    }

    #[test]
    fn csv_huge_array_indices_decode_as_plain_field_names() {
        // Indices past the cap fail the path parse, so the header cell keeps
        // its literal text, like any other unparseable name.
        for header in ["a[18446744073709551615]", "a[4000000000]", "a[10001]"] {
            let body = format!("{header}\r\n1\r\n");
            let (errors, values) = decode(CSV, &body);
            assert!(errors.is_empty(), "{header} should still decode");
            assert_eq!(values[0], Datum::obj([(header, Datum::Int(1))]));
        }
    }

    #[test]
    fn csv_conflicting_columns_fail_only_that_row() {
        let body = "a,a.b\r\n1,2\r\n,3\r\n";
        let (errors, values) = decode(CSV, body);
        assert_eq!(errors.len(), 1);
        assert_eq!(values.len(), 1);
        assert_eq!(
            values[0],
            Datum::obj([("a", Datum::obj([("b", Datum::Int(3))]))])
        );
    }

    #[test]
    fn readable_lines_collect_errors_without_aborting() {
        let body = "{\"a\": 1}\nnot json\n{\"a\": 2}\n";
        let (errors, values) = decode(Some("application/ldjson"), body);
        assert_eq!(errors.len(), 1);
        assert_eq!(values.len(), 2);
        assert_eq!(errors[0].value, Datum::Str("not json".into()));
    }

    #[test]
    fn unknown_content_type_falls_back_to_precise_lines() {
        let body = "{\"$oid\":\"abc\"}\n";
        let (errors, values) = decode(Some("text/plain"), body);
        assert!(errors.is_empty());
        assert_eq!(values[0], Datum::Id("abc".into()));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let (errors, values) = decode(None, "\n\n{\"a\":1}\n\n");
        assert!(errors.is_empty());
        assert_eq!(values.len(), 1);
    }

    #[tokio::test]
    async fn csv_decode_inverts_the_encoder() {
        let rows = vec![
            Datum::obj([("a", Datum::Int(1))]),
            Datum::obj([("b", Datum::Str("x,y".into()))]),
        ];
        let format = ResponseFormat::Csv {
            options: CsvOptions::default(),
            disposition: None,
        };
        let encoded = encode(
            &format,
            datum_stream(rows.iter().cloned().map(Ok).collect()),
        );
        let chunks: Vec<_> = encoded.body.collect().await;
        let body: String = chunks
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk).to_string())
            .collect();
        let (errors, values) = decode(Some(&encoded.media_type), &body);
        assert!(errors.is_empty());
        assert_eq!(values, rows);
    }
}
