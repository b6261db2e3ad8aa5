//! Field and group identifiers plus REST name translation.

use std::borrow::Borrow;
use std::fmt;

/// Logical (snake_case) name of an entity field.
///
/// Field names are declared statically by entity schemas, so the type is a
/// thin `Copy` wrapper over a `&'static str`. It borrows as `str`, which lets
/// maps keyed by `FieldName` be queried with plain string slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldName(&'static str);

impl FieldName {
    /// Creates a field name.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the name as a string slice.
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl Borrow<str> for FieldName {
    fn borrow(&self) -> &str {
        self.0
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Identifier of a read group, write group or collection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(&'static str);

impl GroupId {
    /// Creates a group identifier.
    pub const fn new(id: &'static str) -> Self {
        Self(id)
    }

    /// Returns the identifier as a string slice.
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl Borrow<str> for GroupId {
    fn borrow(&self) -> &str {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Converts a camelCase REST key to snake_case.
///
/// ```
/// use bisync_schema::camel_to_snake;
/// assert_eq!(camel_to_snake("passwordExpirationDate"), "password_expiration_date");
/// assert_eq!(camel_to_snake("usergroups"), "usergroups");
/// ```
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Converts a snake_case field name to camelCase.
///
/// ```
/// use bisync_schema::snake_to_camel;
/// assert_eq!(snake_to_camel("full_name"), "fullName");
/// ```
pub fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}
