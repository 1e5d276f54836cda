// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Attribute codec.
//!
//! Converts typed field values to the store's string-only representation and
//! back. NULL is stored as the sentinel `~`; a string made only of sentinel
//! characters is stored with one extra `~` in front so the two never meet.
//!
//! | kind        | stored as                                  |
//! |-------------|--------------------------------------------|
//! | `string`    | the text (sentinel-only text gets a `~`)   |
//! | `int`       | base-10 integer                            |
//! | `boolean`   | `true` / `false`                           |
//! | `date`      | RFC 3339, UTC, at least millisecond digits |
//! | `timestamp` | integer milliseconds since the Unix epoch  |

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rigid_script::NULL_SENTINEL;
use serde_json::Value;

use crate::error::ErrorCode;
use crate::schema::{Collection, FieldKind, FieldType};

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Date(DateTime<Utc>),
}

/// A record: field name to value.
pub type Record = BTreeMap<String, FieldValue>;

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Date(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

impl FieldValue {
    /// Convert a JSON scalar. Fractional numbers are truncated toward zero.
    pub fn from_json(value: &Value) -> Result<FieldValue, ErrorCode> {
        match value {
            Value::Null => Ok(FieldValue::Null),
            Value::Bool(b) => Ok(FieldValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                        .map(|f| f.trunc() as i64)
                })
                .map(FieldValue::Int)
                .ok_or(ErrorCode::WrongType),
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Err(ErrorCode::WrongType),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Date(d) => Value::String(format_date(d)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// Millisecond digits, or as many more as the value needs to read back
/// exactly.
fn format_date(date: &DateTime<Utc>) -> String {
    let nanos = date.timestamp_subsec_nanos();
    let digits = if nanos % 1_000_000 == 0 {
        SecondsFormat::Millis
    } else if nanos % 1_000 == 0 {
        SecondsFormat::Micros
    } else {
        SecondsFormat::Nanos
    };
    date.to_rfc3339_opts(digits, true)
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn is_sentinel_run(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| NULL_SENTINEL.starts_with(c))
}

/// Encode `value` for a field of type `field`.
pub fn encode(field: &FieldType, value: &FieldValue) -> Result<String, ErrorCode> {
    if value.is_null() {
        return if field.allow_null {
            Ok(NULL_SENTINEL.to_string())
        } else {
            Err(ErrorCode::NullNotAllowed)
        };
    }

    match (field.kind, value) {
        (FieldKind::String, FieldValue::Text(s)) => Ok(if is_sentinel_run(s) {
            format!("{NULL_SENTINEL}{s}")
        } else {
            s.clone()
        }),
        (FieldKind::Int, FieldValue::Int(i)) => Ok(i.to_string()),
        (FieldKind::Boolean, FieldValue::Bool(b)) => Ok(b.to_string()),
        (FieldKind::Date, FieldValue::Date(d)) => Ok(format_date(d)),
        (FieldKind::Date, FieldValue::Text(s)) => {
            parse_date(s).map(|d| format_date(&d)).ok_or(ErrorCode::WrongType)
        }
        (FieldKind::Date, FieldValue::Int(ms)) => DateTime::from_timestamp_millis(*ms)
            .map(|d| format_date(&d))
            .ok_or(ErrorCode::WrongType),
        (FieldKind::Timestamp, FieldValue::Int(ms)) => Ok(ms.to_string()),
        (FieldKind::Timestamp, FieldValue::Date(d)) => Ok(d.timestamp_millis().to_string()),
        (FieldKind::Timestamp, FieldValue::Text(s)) => parse_date(s)
            .map(|d| d.timestamp_millis().to_string())
            .ok_or(ErrorCode::WrongType),
        _ => Err(ErrorCode::WrongType),
    }
}

/// Decode a stored string for a field of type `field`.
pub fn decode(field: &FieldType, stored: &str) -> Result<FieldValue, String> {
    if stored == NULL_SENTINEL {
        return Ok(FieldValue::Null);
    }

    let bad = || format!("cannot decode '{stored}' as {}", field.kind);
    match field.kind {
        FieldKind::String => Ok(FieldValue::Text(if is_sentinel_run(stored) {
            stored[NULL_SENTINEL.len()..].to_string()
        } else {
            stored.to_string()
        })),
        FieldKind::Int | FieldKind::Timestamp => {
            stored.parse().map(FieldValue::Int).map_err(|_| bad())
        }
        FieldKind::Boolean => match stored {
            "true" => Ok(FieldValue::Bool(true)),
            "false" => Ok(FieldValue::Bool(false)),
            _ => Err(bad()),
        },
        FieldKind::Date => parse_date(stored).map(FieldValue::Date).ok_or_else(bad),
    }
}

/// Decode a flat `field, value, field, value, ...` list into a record.
/// Fields the collection does not declare are skipped.
pub fn decode_record(collection: &Collection, flat: &[String]) -> Result<Record, String> {
    let mut record = Record::new();
    for pair in flat.chunks(2) {
        if let [name, stored] = pair {
            if let Some(field) = collection.field(name) {
                record.insert(name.clone(), decode(field, stored)?);
            }
        }
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ty(kind: FieldKind) -> FieldType {
        FieldType::new(kind)
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(
            encode(&ty(FieldKind::Int), &FieldValue::Null),
            Err(ErrorCode::NullNotAllowed)
        );
        let nullable = ty(FieldKind::Int).nullable();
        assert_eq!(encode(&nullable, &FieldValue::Null).unwrap(), "~");
        assert_eq!(decode(&nullable, "~").unwrap(), FieldValue::Null);
    }

    #[test]
    fn test_sentinel_strings_are_escaped() {
        let string = ty(FieldKind::String).nullable();
        assert_eq!(encode(&string, &"~".into()).unwrap(), "~~");
        assert_eq!(encode(&string, &"~~~".into()).unwrap(), "~~~~");
        assert_eq!(encode(&string, &"a~".into()).unwrap(), "a~");
        assert_eq!(encode(&string, &"".into()).unwrap(), "");
        assert_eq!(decode(&string, "~~").unwrap(), FieldValue::Text("~".into()));
        assert_eq!(decode(&string, "a~").unwrap(), FieldValue::Text("a~".into()));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(encode(&ty(FieldKind::Boolean), &true.into()).unwrap(), "true");
        assert_eq!(encode(&ty(FieldKind::Int), &(-42).into()).unwrap(), "-42");
        assert_eq!(
            encode(&ty(FieldKind::Int), &"42".into()),
            Err(ErrorCode::WrongType)
        );
        assert_eq!(
            encode(&ty(FieldKind::String), &5.into()),
            Err(ErrorCode::WrongType)
        );
        assert_eq!(decode(&ty(FieldKind::Boolean), "false").unwrap(), false.into());
        assert!(decode(&ty(FieldKind::Int), "x").is_err());
    }

    #[test]
    fn test_date_inputs() {
        let date = ty(FieldKind::Date);
        let when = Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 0).unwrap();
        assert_eq!(encode(&date, &when.into()).unwrap(), "2024-02-29T12:30:00.000Z");
        assert_eq!(
            encode(&date, &"2024-02-29T14:30:00+02:00".into()).unwrap(),
            "2024-02-29T12:30:00.000Z"
        );
        assert_eq!(
            encode(&date, &when.timestamp_millis().into()).unwrap(),
            "2024-02-29T12:30:00.000Z"
        );
        assert_eq!(encode(&date, &"yesterday".into()), Err(ErrorCode::WrongType));
        assert_eq!(
            decode(&date, "2024-02-29T12:30:00.000Z").unwrap(),
            FieldValue::Date(when)
        );
    }

    #[test]
    fn test_sub_millisecond_dates_keep_their_digits() {
        let date = ty(FieldKind::Date);
        let nanos = Utc.timestamp_nanos(1_700_000_000_123_456_789);
        assert_eq!(encode(&date, &nanos.into()).unwrap(), "2023-11-14T22:13:20.123456789Z");
        let micros = Utc.timestamp_nanos(1_700_000_000_123_456_000);
        assert_eq!(encode(&date, &micros.into()).unwrap(), "2023-11-14T22:13:20.123456Z");
        assert_eq!(
            encode(&date, &"2023-11-14T22:13:20.1234567Z".into()).unwrap(),
            "2023-11-14T22:13:20.123456700Z"
        );

        for value in [nanos, micros] {
            let stored = encode(&date, &value.into()).unwrap();
            assert_eq!(decode(&date, &stored).unwrap(), FieldValue::Date(value));
        }
    }

    #[test]
    fn test_timestamp_inputs() {
        let ts = ty(FieldKind::Timestamp);
        let when = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(encode(&ts, &when.into()).unwrap(), "1577836800000");
        assert_eq!(encode(&ts, &1_577_836_800_000i64.into()).unwrap(), "1577836800000");
        assert_eq!(
            decode(&ts, "1577836800000").unwrap(),
            FieldValue::Int(1_577_836_800_000)
        );
    }

    #[test]
    fn test_from_json_truncates_fractions() {
        assert_eq!(FieldValue::from_json(&serde_json::json!(3.9)).unwrap(), FieldValue::Int(3));
        assert_eq!(FieldValue::from_json(&serde_json::json!(-3.9)).unwrap(), FieldValue::Int(-3));
        assert_eq!(
            FieldValue::from_json(&serde_json::json!([1])),
            Err(ErrorCode::WrongType)
        );
        assert_eq!(FieldValue::from(None::<i64>), FieldValue::Null);
    }

    #[test]
    fn test_decode_record_skips_undeclared_fields() {
        let mut definition = BTreeMap::new();
        definition.insert("color".to_string(), ty(FieldKind::String));
        definition.insert("mileage".to_string(), ty(FieldKind::Int));
        let collection = Collection {
            definition,
            indices: BTreeMap::new(),
        };
        let flat: Vec<String> = ["color", "red", "mileage", "5", "legacy", "x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let record = decode_record(&collection, &flat).unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record["color"], FieldValue::Text("red".into()));
        assert_eq!(record["mileage"], FieldValue::Int(5));
    }

    fn arb_value(kind: FieldKind) -> BoxedStrategy<FieldValue> {
        let value = match kind {
            FieldKind::String => any::<String>().prop_map(FieldValue::Text).boxed(),
            FieldKind::Int | FieldKind::Timestamp => any::<i64>().prop_map(FieldValue::Int).boxed(),
            FieldKind::Boolean => any::<bool>().prop_map(FieldValue::Bool).boxed(),
            FieldKind::Date => (
                -62_135_596_800i64..253_402_300_799i64,
                prop_oneof![
                    (0u32..1_000).prop_map(|ms| ms * 1_000_000),
                    (0u32..1_000_000).prop_map(|us| us * 1_000),
                    0u32..1_000_000_000,
                ],
            )
                .prop_filter_map("representable", |(secs, nanos)| {
                    DateTime::from_timestamp(secs, nanos).map(FieldValue::Date)
                })
                .boxed(),
        };
        prop_oneof![1 => Just(FieldValue::Null), 9 => value].boxed()
    }

    fn arb_kind() -> impl Strategy<Value = FieldKind> {
        prop_oneof![
            Just(FieldKind::String),
            Just(FieldKind::Int),
            Just(FieldKind::Boolean),
            Just(FieldKind::Date),
            Just(FieldKind::Timestamp),
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(
            (kind, value) in arb_kind().prop_flat_map(|k| (Just(k), arb_value(k)))
        ) {
            let field = FieldType::new(kind).nullable();
            let stored = encode(&field, &value).unwrap();
            prop_assert_eq!(decode(&field, &stored).unwrap(), value);
        }

        #[test]
        fn prop_sentinel_text_never_reads_as_null(n in 1usize..8) {
            let field = FieldType::new(FieldKind::String).nullable();
            let text = "~".repeat(n);
            let stored = encode(&field, &FieldValue::Text(text.clone())).unwrap();
            prop_assert_ne!(stored.as_str(), NULL_SENTINEL);
            prop_assert_eq!(decode(&field, &stored).unwrap(), FieldValue::Text(text));
        }
    }
}
