//! Typed field descriptors over the dynamic [`Value`] store.

use crate::name::FieldName;
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;

/// Conversion between a Rust type and a field [`Value`].
pub trait FieldType: Sized {
    /// Extracts `Self` from a value, or `None` if the variant does not match.
    fn from_value(value: &Value) -> Option<Self>;

    /// Wraps `self` in the matching value variant.
    fn into_value(self) -> Value;
}

/// A field name tagged with the Rust type its value converts to.
///
/// Entity modules declare these as constants so getters and setters are
/// checked at compile time:
///
/// ```
/// use bisync_schema::Field;
/// const FULL_NAME: Field<String> = Field::new("full_name");
/// assert_eq!(FULL_NAME.name().as_str(), "full_name");
/// ```
pub struct Field<T> {
    name: FieldName,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Field<T> {
    /// Creates a typed field descriptor.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: FieldName::new(name),
            _marker: PhantomData,
        }
    }

    /// Returns the untyped field name.
    pub const fn name(&self) -> FieldName {
        self.name
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Field").field(&self.name).finish()
    }
}

impl FieldType for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) | Value::Enum(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl FieldType for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FieldType for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_integer()
    }

    fn into_value(self) -> Value {
        Value::Integer(self)
    }
}

impl FieldType for DateTime<Utc> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::DateTime(self)
    }
}

impl FieldType for BTreeSet<String> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_id_set().cloned()
    }

    fn into_value(self) -> Value {
        Value::IdSet(self)
    }
}

impl FieldType for Vec<String> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::TextList(items) => Some(items.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::TextList(self)
    }
}

impl FieldType for BTreeMap<String, serde_json::Value> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Record(record) => Some(record.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Record(self)
    }
}

impl FieldType for serde_json::Value {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Json(raw) => Some(raw.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Json(self)
    }
}
