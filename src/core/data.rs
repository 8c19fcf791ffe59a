//! Purpose: The gateway's value model and its two JSON codecs.
//! Exports: `Datum`, `DataCodec`.
//! Role: Everything streamed in or out of a backend is a `Datum`.
//! Invariants: Precise is lossless via `$`-tagged wrappers; Readable is not.
//! Invariants: Precise parse inverts Precise render for every datum.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::{Map, Number, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::error::{ApiResult, Error};

#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Dec(f64),
    Str(String),
    Timestamp(OffsetDateTime),
    Id(String),
    Binary(Vec<u8>),
    Arr(Vec<Datum>),
    Obj(BTreeMap<String, Datum>),
}

impl Datum {
    pub fn obj(pairs: impl IntoIterator<Item = (&'static str, Datum)>) -> Datum {
        Datum::Obj(
            pairs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        )
    }
}

/// How datums cross the JSON boundary.
///
/// `Readable` favors humans: timestamps become plain RFC 3339 strings, ids
/// plain strings, binary a base64 string. `Precise` keeps the type through a
/// single-key tag object and round-trips exactly.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataCodec {
    Readable,
    Precise,
}

const TAG_TIMESTAMP: &str = "$timestamp";
const TAG_OID: &str = "$oid";
const TAG_BINARY: &str = "$binary";

impl DataCodec {
    /// Renders one datum as a single-line JSON string.
    pub fn render(&self, datum: &Datum) -> ApiResult<String> {
        let value = self.to_json(datum)?;
        serde_json::to_string(&value)
            .map_err(|err| Error::result_other(format!("failed to encode value: {err}")))
    }

    /// Parses one JSON text into a datum.
    pub fn parse(&self, text: &str) -> ApiResult<Datum> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| Error::parsing_other(format!("invalid JSON: {err}")))?;
        self.from_json(&value)
    }

    pub fn to_json(&self, datum: &Datum) -> ApiResult<Value> {
        match datum {
            Datum::Null => Ok(Value::Null),
            Datum::Bool(value) => Ok(Value::Bool(*value)),
            Datum::Int(value) => Ok(Value::Number(Number::from(*value))),
            Datum::Dec(value) => Number::from_f64(*value)
                .map(Value::Number)
                .ok_or_else(|| Error::result_other("cannot encode a non-finite number")),
            Datum::Str(value) => Ok(Value::String(value.clone())),
            Datum::Timestamp(value) => {
                let text = format_timestamp(value)?;
                Ok(match self {
                    DataCodec::Readable => Value::String(text),
                    DataCodec::Precise => tag(TAG_TIMESTAMP, text),
                })
            }
            Datum::Id(value) => Ok(match self {
                DataCodec::Readable => Value::String(value.clone()),
                DataCodec::Precise => tag(TAG_OID, value.clone()),
            }),
            Datum::Binary(bytes) => {
                let text = BASE64.encode(bytes);
                Ok(match self {
                    DataCodec::Readable => Value::String(text),
                    DataCodec::Precise => tag(TAG_BINARY, text),
                })
            }
            Datum::Arr(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.to_json(item)?);
                }
                Ok(Value::Array(out))
            }
            Datum::Obj(fields) => {
                let mut out = Map::new();
                for (key, value) in fields {
                    out.insert(key.clone(), self.to_json(value)?);
                }
                Ok(Value::Object(out))
            }
        }
    }

    pub fn from_json(&self, value: &Value) -> ApiResult<Datum> {
        match value {
            Value::Null => Ok(Datum::Null),
            Value::Bool(b) => Ok(Datum::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Datum::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Datum::Dec(f))
                } else {
                    Err(Error::parsing_other(format!("unrepresentable number {n}")))
                }
            }
            Value::String(s) => Ok(match self {
                DataCodec::Readable => parse_timestamp(s)
                    .map(Datum::Timestamp)
                    .unwrap_or_else(|_| Datum::Str(s.clone())),
                DataCodec::Precise => Datum::Str(s.clone()),
            }),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.from_json(item)?);
                }
                Ok(Datum::Arr(out))
            }
            Value::Object(fields) => {
                if *self == DataCodec::Precise {
                    if let Some(datum) = precise_tagged(fields)? {
                        return Ok(datum);
                    }
                }
                let mut out = BTreeMap::new();
                for (key, value) in fields {
                    out.insert(key.clone(), self.from_json(value)?);
                }
                Ok(Datum::Obj(out))
            }
        }
    }
}

/// Recognizes single-key `$`-tagged objects in Precise input. A single key
/// starting with `$` is reserved; unknown tags are an error rather than
/// silently becoming objects.
fn precise_tagged(fields: &Map<String, Value>) -> ApiResult<Option<Datum>> {
    if fields.len() != 1 {
        return Ok(None);
    }
    let Some((key, value)) = fields.iter().next() else {
        return Ok(None);
    };
    if !key.starts_with('$') {
        return Ok(None);
    }
    let Value::String(text) = value else {
        return Err(Error::parsing_other(format!(
            "tag {key} requires a string value"
        )));
    };
    match key.as_str() {
        TAG_TIMESTAMP => parse_timestamp(text).map(|ts| Some(Datum::Timestamp(ts))),
        TAG_OID => Ok(Some(Datum::Id(text.clone()))),
        TAG_BINARY => BASE64
            .decode(text)
            .map(|bytes| Some(Datum::Binary(bytes)))
            .map_err(|err| Error::parsing_other(format!("invalid base64 in {TAG_BINARY}: {err}"))),
        other => Err(Error::parsing_other(format!("unrecognized tag {other}"))),
    }
}

fn tag(name: &str, text: String) -> Value {
    let mut map = Map::new();
    map.insert(name.to_string(), Value::String(text));
    Value::Object(map)
}

pub fn format_timestamp(value: &OffsetDateTime) -> ApiResult<String> {
    value
        .format(&Rfc3339)
        .map_err(|err| Error::result_other(format!("cannot format timestamp: {err}")))
}

pub fn parse_timestamp(text: &str) -> ApiResult<OffsetDateTime> {
    OffsetDateTime::parse(text, &Rfc3339)
        .map_err(|err| Error::parsing_other(format!("invalid timestamp {text:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::{DataCodec, Datum, parse_timestamp};

    fn ts(text: &str) -> Datum {
        Datum::Timestamp(parse_timestamp(text).expect("timestamp"))
    }

    #[test]
    fn precise_round_trips_every_variant() {
        let datum = Datum::obj([
            ("n", Datum::Null),
            ("b", Datum::Bool(true)),
            ("i", Datum::Int(-42)),
            ("d", Datum::Dec(1.5)),
            ("s", Datum::Str("plain".into())),
            ("t", ts("2021-06-01T12:00:00Z")),
            ("id", Datum::Id("abc123".into())),
            ("bin", Datum::Binary(vec![0, 159, 146, 150])),
            (
                "a",
                Datum::Arr(vec![Datum::Int(1), Datum::Str("two".into())]),
            ),
        ]);
        let text = DataCodec::Precise.render(&datum).expect("render");
        let back = DataCodec::Precise.parse(&text).expect("parse");
        assert_eq!(back, datum);
    }

    #[test]
    fn precise_tags_are_visible_in_output() {
        let text = DataCodec::Precise
            .render(&ts("2021-06-01T12:00:00Z"))
            .expect("render");
        assert_eq!(text, r#"{"$timestamp":"2021-06-01T12:00:00Z"}"#);
        let text = DataCodec::Precise
            .render(&Datum::Id("x".into()))
            .expect("render");
        assert_eq!(text, r#"{"$oid":"x"}"#);
    }

    #[test]
    fn readable_renders_timestamps_as_plain_strings() {
        let text = DataCodec::Readable
            .render(&ts("2021-06-01T12:00:00Z"))
            .expect("render");
        assert_eq!(text, r#""2021-06-01T12:00:00Z""#);
    }

    #[test]
    fn readable_parse_rehydrates_timestamps() {
        let back = DataCodec::Readable
            .parse(r#""2021-06-01T12:00:00Z""#)
            .expect("parse");
        assert_eq!(back, ts("2021-06-01T12:00:00Z"));
        let back = DataCodec::Readable.parse(r#""not a time""#).expect("parse");
        assert_eq!(back, Datum::Str("not a time".into()));
    }

    #[test]
    fn precise_parse_keeps_strings_as_strings() {
        let back = DataCodec::Precise
            .parse(r#""2021-06-01T12:00:00Z""#)
            .expect("parse");
        assert_eq!(back, Datum::Str("2021-06-01T12:00:00Z".into()));
    }

    #[test]
    fn unknown_tag_is_rejected_in_precise_input() {
        assert!(DataCodec::Precise.parse(r#"{"$nope":"x"}"#).is_err());
        assert!(DataCodec::Precise.parse(r#"{"$timestamp":7}"#).is_err());
    }

    #[test]
    fn multi_key_objects_with_dollar_keys_stay_objects() {
        let back = DataCodec::Precise
            .parse(r#"{"$oid":"x","extra":1}"#)
            .expect("parse");
        match back {
            Datum::Obj(fields) => assert_eq!(fields.len(), 2),
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_numbers_cannot_render() {
        assert!(DataCodec::Precise.render(&Datum::Dec(f64::NAN)).is_err());
    }

    #[test]
    fn integral_and_decimal_numbers_stay_distinct() {
        assert_eq!(
            DataCodec::Precise.parse("7").expect("parse"),
            Datum::Int(7)
        );
        assert_eq!(
            DataCodec::Precise.parse("7.5").expect("parse"),
            Datum::Dec(7.5)
        );
    }
}
