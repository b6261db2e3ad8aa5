//! # bisync Schema
//!
//! Static entity descriptions for the bisync synchronization engine.
//!
//! This crate provides:
//! - Field names and REST name translation (snake_case ⇄ camelCase)
//! - The dynamic [`Value`] type held in entity field state
//! - Per-field codecs with an exact decode/encode round trip
//! - Server version parsing and comparison
//! - [`AttributeSchema`]: read groups, write groups and nested collections
//!
//! ## Key Invariants
//!
//! - A field is claimed by at most one write group
//! - Schemas are immutable once built
//! - `decode(encode(v)) == v` for every value a codec produces

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod name;
mod schema;
mod typed;
mod value;
mod version;

pub use codec::{DateFormat, FieldCodec, IdPath};
pub use error::{DecodeError, EncodeError, SchemaError, SchemaResult};
pub use name::{camel_to_snake, snake_to_camel, FieldName, GroupId};
pub use schema::{
    AttributeSchema, CollectionSpec, CollectionVerbs, Endpoint, FieldSpec, HttpMethod,
    MemberShape, PatchStyle, ReadGroup, ReadShape, SchemaBuilder, WriteGroup,
};
pub use typed::{Field, FieldType};
pub use value::Value;
pub use version::{GatePolicy, ServerVersion, VersionParseError};
