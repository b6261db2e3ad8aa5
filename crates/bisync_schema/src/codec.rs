//! Per-field decoding and encoding between server JSON and [`Value`].
//!
//! Every codec obeys the round-trip law: for any value `v` produced by
//! `decode`, `decode(encode(v)) == v`. JSON `null` decodes to
//! [`Value::Null`] under every codec and encodes back to `null`.

use crate::error::{DecodeError, EncodeError};
use crate::name::{camel_to_snake, snake_to_camel};
use crate::value::Value;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};

/// Textual timestamp formats used by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// RFC 3339 with millisecond precision, e.g. `2024-01-02T03:04:05.678Z`.
    Rfc3339,
    /// A chrono format string. Must include an offset (`%z`).
    Pattern(&'static str),
}

impl DateFormat {
    /// The server's full datetime format, e.g. `2024-01-02T03:04:05.678+0000`.
    pub const FULL_DATETIME: DateFormat = DateFormat::Pattern("%Y-%m-%dT%H:%M:%S%.3f%z");

    fn parse(&self, raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        let parsed = match self {
            DateFormat::Rfc3339 => DateTime::parse_from_rfc3339(raw)?,
            DateFormat::Pattern(pattern) => DateTime::parse_from_str(raw, pattern)?,
        };
        Ok(parsed.with_timezone(&Utc))
    }

    fn format(&self, dt: &DateTime<Utc>) -> String {
        match self {
            DateFormat::Rfc3339 => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            DateFormat::Pattern(pattern) => dt.format(pattern).to_string(),
        }
    }
}

/// Where the id sits inside each element of an id-set array.
///
/// An empty path means the elements are bare strings. `["privilege", "id"]`
/// reads `{"privilege": {"id": "…"}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdPath {
    path: &'static [&'static str],
    direct_only: bool,
}

impl IdPath {
    /// Elements are bare id strings.
    pub const fn bare() -> Self {
        Self {
            path: &[],
            direct_only: false,
        }
    }

    /// Elements are objects with the id at `path`.
    pub const fn at(path: &'static [&'static str]) -> Self {
        Self {
            path,
            direct_only: false,
        }
    }

    /// Keep only elements granted directly.
    ///
    /// Elements carrying a `sources` array are kept only when one of the
    /// sources has `"direct": true`. Elements without `sources` are kept.
    pub const fn direct_only(mut self) -> Self {
        self.direct_only = true;
        self
    }

    fn is_inherited(&self, item: &Json) -> bool {
        if !self.direct_only {
            return false;
        }
        match item.get("sources").and_then(Json::as_array) {
            Some(sources) => !sources
                .iter()
                .any(|s| s.get("direct").and_then(Json::as_bool) == Some(true)),
            None => false,
        }
    }

    fn extract<'a>(&self, item: &'a Json) -> Option<&'a str> {
        let mut cursor = item;
        for key in self.path {
            cursor = cursor.get(*key)?;
        }
        cursor.as_str()
    }

    fn wrap(&self, id: &str) -> Json {
        let mut out = Json::String(id.to_string());
        for key in self.path.iter().rev() {
            let mut obj = Map::new();
            obj.insert((*key).to_string(), out);
            out = Json::Object(obj);
        }
        out
    }
}

/// How a field's server representation maps to a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCodec {
    /// JSON string ⇄ [`Value::Text`].
    Text,
    /// JSON boolean ⇄ [`Value::Bool`].
    Bool,
    /// JSON integer ⇄ [`Value::Integer`].
    Integer,
    /// Formatted timestamp string ⇄ [`Value::DateTime`].
    DateTime(DateFormat),
    /// JSON string restricted to the listed wire names ⇄ [`Value::Enum`].
    Enum(&'static [&'static str]),
    /// Array of ids (bare or nested) ⇄ [`Value::IdSet`].
    IdSet(IdPath),
    /// Array of strings ⇄ [`Value::TextList`].
    TextList,
    /// camelCase object ⇄ snake_case [`Value::Record`].
    Record,
    /// Any JSON ⇄ [`Value::Json`].
    Json,
}

impl FieldCodec {
    /// Short name of the value kind this codec produces.
    pub fn expected_kind(&self) -> &'static str {
        match self {
            FieldCodec::Text => "text",
            FieldCodec::Bool => "bool",
            FieldCodec::Integer => "integer",
            FieldCodec::DateTime(_) => "datetime",
            FieldCodec::Enum(_) => "enum",
            FieldCodec::IdSet(_) => "id set",
            FieldCodec::TextList => "text list",
            FieldCodec::Record => "record",
            FieldCodec::Json => "json",
        }
    }

    /// Decodes a raw server value for `field`.
    pub fn decode(&self, field: &str, raw: &Json) -> Result<Value, DecodeError> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let fail = |reason: String| DecodeError::new(field, raw, reason);

        match self {
            FieldCodec::Text => raw
                .as_str()
                .map(|s| Value::Text(s.to_string()))
                .ok_or_else(|| fail("expected a string".into())),
            FieldCodec::Bool => raw
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| fail("expected a boolean".into())),
            FieldCodec::Integer => raw
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| fail("expected an integer".into())),
            FieldCodec::DateTime(format) => {
                let text = raw.as_str().ok_or_else(|| fail("expected a date string".into()))?;
                format
                    .parse(text)
                    .map(Value::DateTime)
                    .map_err(|e| fail(format!("bad timestamp: {e}")))
            }
            FieldCodec::Enum(variants) => {
                let text = raw.as_str().ok_or_else(|| fail("expected a string".into()))?;
                if variants.contains(&text) {
                    Ok(Value::Enum(text.to_string()))
                } else {
                    Err(fail(format!("unknown variant, expected one of {variants:?}")))
                }
            }
            FieldCodec::IdSet(path) => {
                let items = raw.as_array().ok_or_else(|| fail("expected an array".into()))?;
                let mut ids = BTreeSet::new();
                for item in items {
                    if path.is_inherited(item) {
                        continue;
                    }
                    let id = path
                        .extract(item)
                        .ok_or_else(|| fail(format!("element {item} has no id")))?;
                    ids.insert(id.to_string());
                }
                Ok(Value::IdSet(ids))
            }
            FieldCodec::TextList => {
                let items = raw.as_array().ok_or_else(|| fail("expected an array".into()))?;
                items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| fail(format!("element {item} is not a string")))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::TextList)
            }
            FieldCodec::Record => {
                let obj = raw.as_object().ok_or_else(|| fail("expected an object".into()))?;
                let record: BTreeMap<String, Json> = obj
                    .iter()
                    .map(|(k, v)| (camel_to_snake(k), v.clone()))
                    .collect();
                Ok(Value::Record(record))
            }
            FieldCodec::Json => Ok(Value::Json(raw.clone())),
        }
    }

    /// Encodes a local value for `field` into its server representation.
    pub fn encode(&self, field: &str, value: &Value) -> Result<Json, EncodeError> {
        let mismatch = || EncodeError {
            field: field.to_string(),
            expected: self.expected_kind(),
            found: value.kind(),
        };

        let json = match (self, value) {
            (_, Value::Null) => Json::Null,
            (FieldCodec::Text, Value::Text(s)) => Json::String(s.clone()),
            (FieldCodec::Bool, Value::Bool(b)) => Json::Bool(*b),
            (FieldCodec::Integer, Value::Integer(n)) => Json::from(*n),
            (FieldCodec::DateTime(format), Value::DateTime(dt)) => Json::String(format.format(dt)),
            (FieldCodec::Enum(variants), Value::Enum(name)) => {
                if !variants.contains(&name.as_str()) {
                    return Err(mismatch());
                }
                Json::String(name.clone())
            }
            (FieldCodec::IdSet(path), Value::IdSet(ids)) => {
                Json::Array(ids.iter().map(|id| path.wrap(id)).collect())
            }
            (FieldCodec::TextList, Value::TextList(items)) => {
                Json::Array(items.iter().cloned().map(Json::String).collect())
            }
            (FieldCodec::Record, Value::Record(record)) => Json::Object(
                record
                    .iter()
                    .map(|(k, v)| (snake_to_camel(k), v.clone()))
                    .collect(),
            ),
            (FieldCodec::Json, Value::Json(raw)) => raw.clone(),
            _ => return Err(mismatch()),
        };
        Ok(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    const FENCE_TYPES: &[&str] = &["user_fence", "workload_fence"];

    #[test]
    fn decodes_full_datetime() {
        let value = FieldCodec::DateTime(DateFormat::FULL_DATETIME)
            .decode("date_created", &json!("2024-03-05T10:11:12.345+0000"))
            .unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 10, 11, 12).unwrap()
            + chrono::Duration::milliseconds(345);
        assert_eq!(value, Value::DateTime(expected));
    }

    #[test]
    fn datetime_offsets_normalize_to_utc() {
        let value = FieldCodec::DateTime(DateFormat::Rfc3339)
            .decode("d", &json!("2024-03-05T12:00:00.000+02:00"))
            .unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        assert_eq!(value, Value::DateTime(expected));
    }

    #[test]
    fn bad_datetime_names_field_and_raw() {
        let err = FieldCodec::DateTime(DateFormat::FULL_DATETIME)
            .decode("date_created", &json!("yesterday"))
            .unwrap_err();
        assert_eq!(err.field, "date_created");
        assert_eq!(err.raw, json!("yesterday"));
    }

    #[test]
    fn enum_rejects_unknown_variant() {
        let codec = FieldCodec::Enum(FENCE_TYPES);
        assert_eq!(
            codec.decode("type", &json!("user_fence")).unwrap(),
            Value::Enum("user_fence".into())
        );
        assert!(codec.decode("type", &json!("other")).is_err());
        assert!(codec.encode("type", &Value::Enum("other".into())).is_err());
    }

    #[test]
    fn nested_id_set_with_direct_filter() {
        let codec = FieldCodec::IdSet(IdPath::at(&["privilege", "id"]).direct_only());
        let raw = json!([
            {"privilege": {"id": "P1", "name": "Use"}, "sources": [{"direct": true}]},
            {"privilege": {"id": "P2", "name": "Edit"}, "sources": [{"direct": false}]},
            {"privilege": {"id": "P3"}}
        ]);
        let value = codec.decode("privileges", &raw).unwrap();
        let ids: BTreeSet<String> = ["P1", "P3"].iter().map(|s| s.to_string()).collect();
        assert_eq!(value, Value::IdSet(ids.clone()));

        let encoded = codec.encode("privileges", &Value::IdSet(ids)).unwrap();
        assert_eq!(
            encoded,
            json!([{"privilege": {"id": "P1"}}, {"privilege": {"id": "P3"}}])
        );
    }

    #[test]
    fn id_set_element_without_id_fails() {
        let codec = FieldCodec::IdSet(IdPath::at(&["id"]));
        let err = codec.decode("members", &json!([{"name": "x"}])).unwrap_err();
        assert!(err.reason.contains("no id"));
    }

    #[test]
    fn record_translates_keys() {
        let codec = FieldCodec::Record;
        let value = codec
            .decode("owner", &json!({"id": "U1", "fullName": "Ada"}))
            .unwrap();
        match &value {
            Value::Record(record) => {
                assert_eq!(record.get("full_name"), Some(&json!("Ada")));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            codec.encode("owner", &value).unwrap(),
            json!({"id": "U1", "fullName": "Ada"})
        );
    }

    #[test]
    fn null_passes_through_every_codec() {
        for codec in [FieldCodec::Text, FieldCodec::Integer, FieldCodec::Record] {
            assert_eq!(codec.decode("f", &Json::Null).unwrap(), Value::Null);
            assert_eq!(codec.encode("f", &Value::Null).unwrap(), Json::Null);
        }
    }

    #[test]
    fn encode_mismatch_is_reported() {
        let err = FieldCodec::Bool.encode("enabled", &Value::Text("yes".into())).unwrap_err();
        assert_eq!(err.expected, "bool");
        assert_eq!(err.found, "text");
    }

    fn millis_datetime() -> impl Strategy<Value = DateTime<Utc>> {
        (0i64..4_102_444_800_000).prop_map(|ms| {
            DateTime::from_timestamp_millis(ms).expect("in range")
        })
    }

    fn roundtrip(codec: FieldCodec, value: Value) -> Result<(), TestCaseError> {
        let encoded = codec.encode("f", &value).unwrap();
        prop_assert_eq!(codec.decode("f", &encoded).unwrap(), value);
        Ok(())
    }

    proptest! {
        #[test]
        fn datetime_roundtrip(dt in millis_datetime()) {
            roundtrip(FieldCodec::DateTime(DateFormat::FULL_DATETIME), Value::DateTime(dt))?;
            roundtrip(FieldCodec::DateTime(DateFormat::Rfc3339), Value::DateTime(dt))?;
        }

        #[test]
        fn enum_roundtrip(i in 0usize..FENCE_TYPES.len()) {
            roundtrip(FieldCodec::Enum(FENCE_TYPES), Value::Enum(FENCE_TYPES[i].to_string()))?;
        }

        #[test]
        fn id_set_roundtrip(ids in prop::collection::btree_set("[A-F0-9]{8}", 0..12)) {
            roundtrip(FieldCodec::IdSet(IdPath::bare()), Value::IdSet(ids.clone()))?;
            roundtrip(
                FieldCodec::IdSet(IdPath::at(&["privilege", "id"]).direct_only()),
                Value::IdSet(ids),
            )?;
        }

        #[test]
        fn record_roundtrip(
            record in prop::collection::btree_map("[a-z]{1,6}(_[a-z]{1,6}){0,2}", any::<i32>(), 0..6)
        ) {
            let record = record.into_iter().map(|(k, v)| (k, json!(v))).collect();
            roundtrip(FieldCodec::Record, Value::Record(record))?;
        }

        #[test]
        fn scalar_roundtrip(n in any::<i64>(), b in any::<bool>(), s in ".*") {
            roundtrip(FieldCodec::Integer, Value::Integer(n))?;
            roundtrip(FieldCodec::Bool, Value::Bool(b))?;
            roundtrip(FieldCodec::Text, Value::Text(s))?;
        }
    }
}
