//! Purpose: Flattening between nested datums and CSV columns.
//! Exports: `ColumnPath`, `Seg`, `flatten`, `unflatten`, `render_cell`, `parse_cell`.
//! Role: The CSV encoder and decoder meet the datum model here.
//! Invariants: `flatten` emits scalars only; nesting lives in the path.
//! Invariants: `render` of a parsed path round-trips for well-formed names.
//! Invariants: Parsed array indices never exceed `MAX_INDEX`.

use std::collections::BTreeMap;

use serde_json::Number;

use crate::core::data::{Datum, format_timestamp, parse_timestamp};
use crate::core::error::{ApiResult, Error};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// Largest array index a parsed column path may name. Rebuilt arrays are
/// dense, so the cap bounds what one row can allocate.
const MAX_INDEX: usize = 10_000;

/// One step into a nested datum: an object field or an array index.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Seg {
    Field(String),
    Index(usize),
}

/// A dotted-and-bracketed column name such as `addr.street` or `tags[2]`.
/// The empty path names a bare scalar row.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ColumnPath {
    segs: Vec<Seg>,
}

impl ColumnPath {
    pub fn new(segs: Vec<Seg>) -> ColumnPath {
        ColumnPath { segs }
    }

    pub fn segs(&self) -> &[Seg] {
        &self.segs
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for seg in &self.segs {
            match seg {
                Seg::Field(name) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                Seg::Index(index) => {
                    out.push('[');
                    out.push_str(&index.to_string());
                    out.push(']');
                }
            }
        }
        out
    }

    pub fn parse(text: &str) -> ApiResult<ColumnPath> {
        let chars: Vec<char> = text.chars().collect();
        let mut segs = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '[' {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
                if j == i + 1 || j >= chars.len() || chars[j] != ']' {
                    return Err(Error::parsing_other(format!(
                        "invalid column path {text:?}: malformed index"
                    )));
                }
                let digits: String = chars[i + 1..j].iter().collect();
                let index = digits
                    .parse::<usize>()
                    .ok()
                    .filter(|index| *index <= MAX_INDEX)
                    .ok_or_else(|| {
                        Error::parsing_other(format!(
                            "invalid column path {text:?}: index too large"
                        ))
                    })?;
                segs.push(Seg::Index(index));
                i = j + 1;
            } else {
                let mut j = i;
                while j < chars.len() && chars[j] != '.' && chars[j] != '[' {
                    j += 1;
                }
                if j == i {
                    return Err(Error::parsing_other(format!(
                        "invalid column path {text:?}: empty field segment"
                    )));
                }
                segs.push(Seg::Field(chars[i..j].iter().collect()));
                i = j;
            }
            if i < chars.len() && chars[i] == '.' {
                i += 1;
                if i >= chars.len() {
                    return Err(Error::parsing_other(format!(
                        "invalid column path {text:?}: trailing dot"
                    )));
                }
            }
        }
        Ok(ColumnPath { segs })
    }
}

/// Walks a datum and emits one `(path, scalar)` pair per leaf. Empty objects
/// and arrays contribute nothing; a bare scalar emits the empty path.
pub fn flatten(datum: &Datum) -> Vec<(ColumnPath, Datum)> {
    let mut out = Vec::new();
    let mut prefix = Vec::new();
    walk(datum, &mut prefix, &mut out);
    out
}

fn walk(datum: &Datum, prefix: &mut Vec<Seg>, out: &mut Vec<(ColumnPath, Datum)>) {
    match datum {
        Datum::Obj(fields) => {
            for (key, value) in fields {
                prefix.push(Seg::Field(key.clone()));
                walk(value, prefix, out);
                prefix.pop();
            }
        }
        Datum::Arr(items) => {
            for (index, value) in items.iter().enumerate() {
                prefix.push(Seg::Index(index));
                walk(value, prefix, out);
                prefix.pop();
            }
        }
        scalar => out.push((ColumnPath::new(prefix.clone()), scalar.clone())),
    }
}

enum Node {
    Leaf(Datum),
    Obj(BTreeMap<String, Node>),
    Arr(BTreeMap<usize, Node>),
}

/// Rebuilds a datum from `(path, scalar)` pairs. Conflicting paths (a scalar
/// where a container is needed, or a duplicate column) are an error; missing
/// array indices fill with nulls.
pub fn unflatten(pairs: Vec<(ColumnPath, Datum)>) -> ApiResult<Datum> {
    let mut root: Option<Node> = None;
    for (path, value) in pairs {
        match root.as_mut() {
            None => root = Some(build(path.segs(), value)),
            Some(node) => insert(node, &path, path.segs(), value)?,
        }
    }
    Ok(match root {
        None => Datum::Obj(BTreeMap::new()),
        Some(node) => finish(node),
    })
}

fn build(segs: &[Seg], value: Datum) -> Node {
    match segs.split_first() {
        None => Node::Leaf(value),
        Some((Seg::Field(name), rest)) => {
            let mut fields = BTreeMap::new();
            fields.insert(name.clone(), build(rest, value));
            Node::Obj(fields)
        }
        Some((Seg::Index(index), rest)) => {
            let mut items = BTreeMap::new();
            items.insert(*index, build(rest, value));
            Node::Arr(items)
        }
    }
}

fn insert(node: &mut Node, path: &ColumnPath, segs: &[Seg], value: Datum) -> ApiResult<()> {
    let conflict = || {
        Error::parsing_other(format!(
            "column {:?} conflicts with an earlier column",
            path.render()
        ))
    };
    match segs.split_first() {
        None => Err(conflict()),
        Some((Seg::Field(name), rest)) => match node {
            Node::Obj(fields) => match fields.get_mut(name) {
                Some(child) => insert(child, path, rest, value),
                None => {
                    fields.insert(name.clone(), build(rest, value));
                    Ok(())
                }
            },
            _ => Err(conflict()),
        },
        Some((Seg::Index(index), rest)) => match node {
            Node::Arr(items) => match items.get_mut(index) {
                Some(child) => insert(child, path, rest, value),
                None => {
                    items.insert(*index, build(rest, value));
                    Ok(())
                }
            },
            _ => Err(conflict()),
        },
    }
}

fn finish(node: Node) -> Datum {
    match node {
        Node::Leaf(datum) => datum,
        Node::Obj(fields) => Datum::Obj(
            fields
                .into_iter()
                .map(|(key, child)| (key, finish(child)))
                .collect(),
        ),
        Node::Arr(items) => {
            let len = items
                .keys()
                .next_back()
                .map_or(0, |max| max.saturating_add(1));
            let mut out = vec![Datum::Null; len];
            for (index, child) in items {
                out[index] = finish(child);
            }
            Datum::Arr(out)
        }
    }
}

/// Renders one scalar as CSV cell text. Null is the empty cell. Total: the
/// containers `flatten` never emits fall back to their debug-free JSON text.
pub fn render_cell(datum: &Datum) -> String {
    match datum {
        Datum::Null => String::new(),
        Datum::Bool(value) => value.to_string(),
        Datum::Int(value) => value.to_string(),
        Datum::Dec(value) => Number::from_f64(*value)
            .map(|n| n.to_string())
            .unwrap_or_else(|| value.to_string()),
        Datum::Str(value) => value.clone(),
        Datum::Timestamp(value) => format_timestamp(value).unwrap_or_default(),
        Datum::Id(value) => value.clone(),
        Datum::Binary(bytes) => BASE64.encode(bytes),
        Datum::Arr(_) | Datum::Obj(_) => crate::core::data::DataCodec::Readable
            .render(datum)
            .unwrap_or_default(),
    }
}

/// Re-hydrates CSV cell text. The empty cell is a missing value handled by
/// the caller; here it parses as Null. Numeric-looking and RFC 3339 text
/// become typed datums, everything else stays a string.
pub fn parse_cell(text: &str) -> Datum {
    if text.is_empty() {
        return Datum::Null;
    }
    if text == "true" {
        return Datum::Bool(true);
    }
    if text == "false" {
        return Datum::Bool(false);
    }
    if let Ok(value) = text.parse::<i64>() {
        return Datum::Int(value);
    }
    if looks_numeric(text) {
        if let Ok(value) = text.parse::<f64>() {
            if value.is_finite() {
                return Datum::Dec(value);
            }
        }
    }
    if let Ok(value) = parse_timestamp(text) {
        return Datum::Timestamp(value);
    }
    Datum::Str(text.to_string())
}

fn looks_numeric(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
}

#[cfg(test)]
mod tests {
    use super::{ColumnPath, Seg, flatten, parse_cell, render_cell, unflatten};
    use crate::core::data::Datum;

    fn col(text: &str) -> ColumnPath {
        ColumnPath::parse(text).expect("column path")
    }

    #[test]
    fn flatten_emits_dotted_and_indexed_paths() {
        let datum = Datum::obj([
            (
                "addr",
                Datum::obj([("street", Datum::Str("Elm".into()))]),
            ),
            ("tags", Datum::Arr(vec![Datum::Int(1), Datum::Int(2)])),
        ]);
        let pairs = flatten(&datum);
        let names: Vec<String> = pairs.iter().map(|(p, _)| p.render()).collect();
        assert_eq!(names, ["addr.street", "tags[0]", "tags[1]"]);
    }

    #[test]
    fn flatten_of_scalar_emits_empty_path() {
        let pairs = flatten(&Datum::Int(7));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.render(), "");
    }

    #[test]
    fn column_path_parse_round_trips() {
        for text in ["a", "a.b", "a[0]", "a[0].b", "[3]", "a.b[10].c"] {
            assert_eq!(col(text).render(), text);
        }
    }

    #[test]
    fn column_path_rejects_malformed_text() {
        assert!(ColumnPath::parse("a.").is_err());
        assert!(ColumnPath::parse(".a").is_err());
        assert!(ColumnPath::parse("a[x]").is_err());
        assert!(ColumnPath::parse("a[").is_err());
    }

    #[test]
    fn column_path_caps_array_indices() {
        assert!(ColumnPath::parse("a[10000]").is_ok());
        assert!(ColumnPath::parse("a[10001]").is_err());
        assert!(ColumnPath::parse("a[4000000000]").is_err());
        assert!(ColumnPath::parse("a[18446744073709551615]").is_err());
        assert!(ColumnPath::parse("a[99999999999999999999]").is_err());
    }

    #[test]
    fn unflatten_fills_up_to_the_largest_parsed_index() {
        let pairs = vec![(col("a[10000]"), Datum::Int(1))];
        let back = unflatten(pairs).expect("unflatten");
        let Datum::Obj(fields) = back else {
            panic!("expected an object row");
        };
        let Some(Datum::Arr(items)) = fields.get("a") else {
            panic!("expected an array under \"a\"");
        };
        assert_eq!(items.len(), 10_001);
        assert_eq!(items[10_000], Datum::Int(1));
        assert_eq!(items[0], Datum::Null);
    }

    #[test]
    fn unflatten_inverts_flatten() {
        let datum = Datum::obj([
            ("a", Datum::obj([("b", Datum::Int(1))])),
            ("c", Datum::Arr(vec![Datum::Str("x".into())])),
        ]);
        let back = unflatten(flatten(&datum)).expect("unflatten");
        assert_eq!(back, datum);
    }

    #[test]
    fn unflatten_pads_missing_indices_with_null() {
        let pairs = vec![
            (col("a[0]"), Datum::Int(1)),
            (col("a[2]"), Datum::Int(3)),
        ];
        let back = unflatten(pairs).expect("unflatten");
        assert_eq!(
            back,
            Datum::obj([(
                "a",
                Datum::Arr(vec![Datum::Int(1), Datum::Null, Datum::Int(3)])
            )])
        );
    }

    #[test]
    fn unflatten_rejects_conflicting_columns() {
        let pairs = vec![
            (col("a"), Datum::Int(1)),
            (col("a.b"), Datum::Int(2)),
        ];
        assert!(unflatten(pairs).is_err());
        let pairs = vec![
            (col("a"), Datum::Int(1)),
            (col("a"), Datum::Int(2)),
        ];
        assert!(unflatten(pairs).is_err());
    }

    #[test]
    fn empty_row_becomes_empty_object() {
        assert_eq!(
            unflatten(Vec::new()).expect("unflatten"),
            Datum::obj([])
        );
    }

    #[test]
    fn cell_round_trip_keeps_types() {
        assert_eq!(parse_cell(""), Datum::Null);
        assert_eq!(parse_cell("true"), Datum::Bool(true));
        assert_eq!(parse_cell("-42"), Datum::Int(-42));
        assert_eq!(parse_cell("1.5"), Datum::Dec(1.5));
        assert_eq!(parse_cell("hello"), Datum::Str("hello".into()));
        assert_eq!(render_cell(&Datum::Dec(1.0)), "1.0");
        assert_eq!(render_cell(&Datum::Int(1)), "1");
        assert_eq!(render_cell(&Datum::Null), "");
    }

    #[test]
    fn timestamp_cells_rehydrate() {
        let cell = "2021-06-01T12:00:00Z";
        match parse_cell(cell) {
            Datum::Timestamp(_) => {}
            other => panic!("expected timestamp, got {other:?}"),
        }
        assert_eq!(render_cell(&parse_cell(cell)), cell);
    }

    #[test]
    fn numeric_looking_words_stay_strings() {
        assert_eq!(parse_cell("NaN"), Datum::Str("NaN".into()));
        assert_eq!(parse_cell("inf"), Datum::Str("inf".into()));
    }

    #[test]
    fn first_index_segment_renders_bare() {
        assert_eq!(
            ColumnPath::new(vec![Seg::Index(0), Seg::Field("a".into())]).render(),
            "[0].a"
        );
    }
}
