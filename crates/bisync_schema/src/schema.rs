//! Attribute schemas: which fields an entity type has, where they are read
//! from, and how they are written back.

use crate::codec::FieldCodec;
use crate::error::{DecodeError, EncodeError, SchemaError, SchemaResult};
use crate::name::{snake_to_camel, FieldName, GroupId};
use crate::value::Value;
use crate::version::ServerVersion;
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// HTTP verbs used by schema endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// PATCH.
    Patch,
    /// DELETE.
    Delete,
}

impl HttpMethod {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether repeating the request leaves the server in the same state.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Put | HttpMethod::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A REST endpoint template.
///
/// `{id}` in the path is replaced by the entity id and `{project}` by the
/// project id of the call's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path template.
    pub path: &'static str,
    /// Fixed query parameters.
    pub query: &'static [(&'static str, &'static str)],
}

impl Endpoint {
    /// Creates an endpoint.
    pub const fn new(method: HttpMethod, path: &'static str) -> Self {
        Self {
            method,
            path,
            query: &[],
        }
    }

    /// GET endpoint.
    pub const fn get(path: &'static str) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// POST endpoint.
    pub const fn post(path: &'static str) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    /// PUT endpoint.
    pub const fn put(path: &'static str) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    /// PATCH endpoint.
    pub const fn patch(path: &'static str) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    /// DELETE endpoint.
    pub const fn delete(path: &'static str) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Adds fixed query parameters.
    pub const fn with_query(mut self, query: &'static [(&'static str, &'static str)]) -> Self {
        self.query = query;
        self
    }

    /// Returns true if the path needs a project scope.
    pub fn needs_project(&self) -> bool {
        self.path.contains("{project}")
    }

    /// Substitutes the placeholders. Returns `None` when the template needs
    /// a project and none was given.
    pub fn render(&self, id: &str, project: Option<&str>) -> Option<String> {
        let path = self.path.replace("{id}", &urlencoding::encode(id));
        if self.needs_project() {
            Some(path.replace("{project}", &urlencoding::encode(project?)))
        } else {
            Some(path)
        }
    }
}

/// How a read endpoint's response maps onto fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadShape {
    /// The body is an object keyed by REST names.
    Object,
    /// The body is the value of the group's only field, either bare (e.g. a
    /// list) or wrapped in a single-key object.
    Single,
}

/// Fields populated by one read endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadGroup {
    id: GroupId,
    fields: Vec<FieldName>,
    endpoint: Endpoint,
    shape: ReadShape,
    min_version: Option<ServerVersion>,
}

impl ReadGroup {
    /// A group whose endpoint returns an object of several fields.
    pub fn new(id: &'static str, endpoint: Endpoint, fields: &[&'static str]) -> Self {
        Self {
            id: GroupId::new(id),
            fields: fields.iter().copied().map(FieldName::new).collect(),
            endpoint,
            shape: ReadShape::Object,
            min_version: None,
        }
    }

    /// A group whose endpoint returns the value of a single field.
    pub fn single(id: &'static str, endpoint: Endpoint, field: &'static str) -> Self {
        Self {
            shape: ReadShape::Single,
            ..Self::new(id, endpoint, &[field])
        }
    }

    /// Requires a minimum server version for the whole group.
    pub fn since(mut self, version: ServerVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    /// Group identifier.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Fields this group populates.
    pub fn fields(&self) -> &[FieldName] {
        &self.fields
    }

    /// Endpoint to call.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Response shape.
    pub fn shape(&self) -> ReadShape {
        self.shape
    }

    /// Minimum server version, if any.
    pub fn min_version(&self) -> Option<ServerVersion> {
        self.min_version
    }

    /// Returns true if the group populates `field`.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.as_str() == field)
    }
}

/// Payload style accepted by a write endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStyle {
    /// Every field of the group, dirty or not.
    WholePut,
    /// `{"operationList": [{"op": "replace", "path": "/restName", "value": …}]}`
    /// with one entry per dirty field.
    JsonPatch,
    /// An object holding only the dirty fields.
    PartialPut,
}

/// Fields written through one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteGroup {
    id: GroupId,
    fields: Vec<FieldName>,
    endpoint: Endpoint,
    style: PatchStyle,
    min_version: Option<ServerVersion>,
}

impl WriteGroup {
    /// Creates a write group.
    pub fn new(
        id: &'static str,
        endpoint: Endpoint,
        style: PatchStyle,
        fields: &[&'static str],
    ) -> Self {
        Self {
            id: GroupId::new(id),
            fields: fields.iter().copied().map(FieldName::new).collect(),
            endpoint,
            style,
            min_version: None,
        }
    }

    /// Requires a minimum server version for the whole group.
    pub fn since(mut self, version: ServerVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    /// Group identifier.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Fields this group writes.
    pub fn fields(&self) -> &[FieldName] {
        &self.fields
    }

    /// Endpoint to call.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Payload style.
    pub fn style(&self) -> PatchStyle {
        self.style
    }

    /// Minimum server version, if any.
    pub fn min_version(&self) -> Option<ServerVersion> {
        self.min_version
    }

    /// Returns true if the group writes `field`.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.as_str() == field)
    }
}

/// Operation names a collection endpoint understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionVerbs {
    /// Verb adding members.
    pub add: &'static str,
    /// Verb removing members.
    pub remove: &'static str,
    /// Verb replacing the whole set, if supported.
    pub replace: Option<&'static str>,
}

impl CollectionVerbs {
    /// `add` / `remove` / `replace`.
    pub const STANDARD: CollectionVerbs = CollectionVerbs {
        add: "add",
        remove: "remove",
        replace: Some("replace"),
    };

    /// `addElement` / `removeElement`, no replace.
    pub const ELEMENT: CollectionVerbs = CollectionVerbs {
        add: "addElement",
        remove: "removeElement",
        replace: None,
    };
}

/// Shape of the `value` sent in a collection operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberShape {
    /// A JSON array of bare ids.
    Ids,
    /// An array shaped like the field's server representation, e.g.
    /// `[{"id": …}]`.
    Encoded,
    /// `{"projectId": …, "memberIds": [...]}`; membership is per project.
    ProjectScoped,
}

/// A field mutated through add/remove/replace operations.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    field: FieldName,
    endpoint: Endpoint,
    verbs: CollectionVerbs,
    shape: MemberShape,
    min_version: Option<ServerVersion>,
}

impl CollectionSpec {
    /// A collection of bare ids using the standard verbs.
    pub fn new(field: &'static str, endpoint: Endpoint) -> Self {
        Self {
            field: FieldName::new(field),
            endpoint,
            verbs: CollectionVerbs::STANDARD,
            shape: MemberShape::Ids,
            min_version: None,
        }
    }

    /// Overrides the operation verbs.
    pub fn with_verbs(mut self, verbs: CollectionVerbs) -> Self {
        self.verbs = verbs;
        self
    }

    /// Sends members in the field's own representation.
    pub fn encoded(mut self) -> Self {
        self.shape = MemberShape::Encoded;
        self
    }

    /// Membership is per project; operations need a project scope.
    pub fn project_scoped(mut self) -> Self {
        self.shape = MemberShape::ProjectScoped;
        self
    }

    /// Requires a minimum server version.
    pub fn since(mut self, version: ServerVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    /// The collection field.
    pub fn field(&self) -> FieldName {
        self.field
    }

    /// Endpoint receiving the operation list.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Operation verbs.
    pub fn verbs(&self) -> &CollectionVerbs {
        &self.verbs
    }

    /// Value shape.
    pub fn shape(&self) -> MemberShape {
        self.shape
    }

    /// Minimum server version, if any.
    pub fn min_version(&self) -> Option<ServerVersion> {
        self.min_version
    }
}

/// Declaration of one logical field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    name: FieldName,
    rest_name: String,
    codec: FieldCodec,
    min_version: Option<ServerVersion>,
}

impl FieldSpec {
    /// Declares a field whose REST name is the camelCase of `name`.
    pub fn new(name: &'static str, codec: FieldCodec) -> Self {
        Self {
            name: FieldName::new(name),
            rest_name: snake_to_camel(name),
            codec,
            min_version: None,
        }
    }

    /// Overrides the REST name.
    pub fn rest_name(mut self, rest_name: &str) -> Self {
        self.rest_name = rest_name.to_string();
        self
    }

    /// Requires a minimum server version for this field.
    pub fn since(mut self, version: ServerVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    /// Logical name.
    pub fn name(&self) -> FieldName {
        self.name
    }

    /// Name used on the wire.
    pub fn rest(&self) -> &str {
        &self.rest_name
    }

    /// Codec.
    pub fn codec(&self) -> &FieldCodec {
        &self.codec
    }

    /// Minimum server version, if any.
    pub fn min_version(&self) -> Option<ServerVersion> {
        self.min_version
    }

    /// Decodes a raw server value.
    pub fn decode(&self, raw: &Json) -> Result<Value, DecodeError> {
        self.codec.decode(self.name.as_str(), raw)
    }

    /// Encodes a local value.
    pub fn encode(&self, value: &Value) -> Result<Json, EncodeError> {
        self.codec.encode(self.name.as_str(), value)
    }
}

/// Immutable description of an entity type's fields and endpoints.
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    name: &'static str,
    min_version: Option<ServerVersion>,
    fields: Vec<FieldSpec>,
    by_name: BTreeMap<FieldName, usize>,
    by_rest: BTreeMap<String, usize>,
    read_groups: Vec<ReadGroup>,
    write_groups: Vec<WriteGroup>,
    collections: Vec<CollectionSpec>,
    read_index: BTreeMap<FieldName, usize>,
    write_index: BTreeMap<FieldName, usize>,
}

impl AttributeSchema {
    /// Starts building a schema.
    pub fn builder(name: &'static str) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Entity type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Minimum server version for the entity type as a whole.
    pub fn min_version(&self) -> Option<ServerVersion> {
        self.min_version
    }

    /// All declared fields, in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Looks up a field by logical name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    /// Looks up a field by REST name.
    pub fn field_by_rest_name(&self, rest: &str) -> Option<&FieldSpec> {
        self.by_rest.get(rest).map(|&i| &self.fields[i])
    }

    /// Read groups in declaration order.
    pub fn read_groups(&self) -> &[ReadGroup] {
        &self.read_groups
    }

    /// Write groups in declaration order.
    pub fn write_groups(&self) -> &[WriteGroup] {
        &self.write_groups
    }

    /// Nested collections.
    pub fn collections(&self) -> &[CollectionSpec] {
        &self.collections
    }

    /// Looks up a nested collection by field name.
    pub fn collection(&self, field: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.field.as_str() == field)
    }

    /// The first read group populating `field`.
    pub fn resolve_read(&self, field: &str) -> Option<&ReadGroup> {
        self.read_index.get(field).map(|&i| &self.read_groups[i])
    }

    /// The write group accepting `field`.
    pub fn resolve_write(&self, field: &str) -> Option<&WriteGroup> {
        self.write_index.get(field).map(|&i| &self.write_groups[i])
    }

    /// Looks up a read group by id.
    pub fn read_group(&self, id: &str) -> Option<&ReadGroup> {
        self.read_groups.iter().find(|g| g.id.as_str() == id)
    }

    /// Decodes a read group's response body into field values.
    ///
    /// Fields missing from the body are left out. Decode failures are
    /// returned alongside the successfully decoded fields.
    pub fn decode_group(
        &self,
        group: &ReadGroup,
        body: &Json,
    ) -> (Vec<(FieldName, Value)>, Vec<DecodeError>) {
        let mut decoded = Vec::new();
        let mut errors = Vec::new();

        match group.shape {
            ReadShape::Single => {
                let Some(spec) = group.fields.first().and_then(|f| self.field(f.as_str())) else {
                    return (decoded, errors);
                };
                let raw = match body {
                    Json::Object(obj) => match obj.get(spec.rest()) {
                        Some(inner) => inner,
                        None if obj.len() == 1 => obj.values().next().unwrap_or(body),
                        None => body,
                    },
                    _ => body,
                };
                match spec.decode(raw) {
                    Ok(value) => decoded.push((spec.name, value)),
                    Err(e) => errors.push(e),
                }
            }
            ReadShape::Object => {
                let Some(obj) = body.as_object() else {
                    errors.push(DecodeError::new(
                        group.id.as_str(),
                        body,
                        "expected a JSON object",
                    ));
                    return (decoded, errors);
                };
                for name in &group.fields {
                    let Some(spec) = self.field(name.as_str()) else {
                        continue;
                    };
                    if let Some(raw) = obj.get(spec.rest()) {
                        match spec.decode(raw) {
                            Ok(value) => decoded.push((spec.name, value)),
                            Err(e) => errors.push(e),
                        }
                    }
                }
            }
        }
        (decoded, errors)
    }

    /// Decodes every known REST key of an object, e.g. a listing entry or a
    /// write response echo. Unknown keys are ignored.
    pub fn decode_object(&self, obj: &Map<String, Json>) -> (Vec<(FieldName, Value)>, Vec<DecodeError>) {
        let mut decoded = Vec::new();
        let mut errors = Vec::new();
        for (key, raw) in obj {
            let Some(spec) = self.field_by_rest_name(key) else {
                continue;
            };
            match spec.decode(raw) {
                Ok(value) => decoded.push((spec.name, value)),
                Err(e) => errors.push(e),
            }
        }
        (decoded, errors)
    }
}

/// Builder for [`AttributeSchema`].
///
/// ```
/// use bisync_schema::{AttributeSchema, Endpoint, FieldCodec, PatchStyle, ReadGroup, WriteGroup};
///
/// let schema = AttributeSchema::builder("user")
///     .field("id", FieldCodec::Text)
///     .field("name", FieldCodec::Text)
///     .read(ReadGroup::new("info", Endpoint::get("/api/users/{id}"), &["id", "name"]))
///     .write(WriteGroup::new("patch", Endpoint::patch("/api/users/{id}"), PatchStyle::JsonPatch, &["name"]))
///     .build();
/// assert!(schema.resolve_write("name").is_some());
/// assert!(schema.resolve_write("id").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: &'static str,
    min_version: Option<ServerVersion>,
    fields: Vec<FieldSpec>,
    read_groups: Vec<ReadGroup>,
    write_groups: Vec<WriteGroup>,
    collections: Vec<CollectionSpec>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            min_version: None,
            fields: Vec::new(),
            read_groups: Vec::new(),
            write_groups: Vec::new(),
            collections: Vec::new(),
        }
    }

    /// Requires a minimum server version for the entity type.
    pub fn since(mut self, version: ServerVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    /// Declares a field with the default camelCase REST name.
    pub fn field(self, name: &'static str, codec: FieldCodec) -> Self {
        self.field_spec(FieldSpec::new(name, codec))
    }

    /// Declares a field with an explicit REST name.
    pub fn renamed(self, name: &'static str, rest_name: &str, codec: FieldCodec) -> Self {
        self.field_spec(FieldSpec::new(name, codec).rest_name(rest_name))
    }

    /// Declares a fully specified field.
    pub fn field_spec(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Adds a read group.
    pub fn read(mut self, group: ReadGroup) -> Self {
        self.read_groups.push(group);
        self
    }

    /// Adds a write group.
    pub fn write(mut self, group: WriteGroup) -> Self {
        self.write_groups.push(group);
        self
    }

    /// Adds a nested collection.
    pub fn collection(mut self, spec: CollectionSpec) -> Self {
        self.collections.push(spec);
        self
    }

    /// Builds the schema.
    ///
    /// # Panics
    ///
    /// Panics on any [`SchemaError`]: schemas are static declarations, so an
    /// invalid one is a bug in the declaring code.
    pub fn build(self) -> AttributeSchema {
        match self.try_build() {
            Ok(schema) => schema,
            Err(e) => panic!("invalid attribute schema: {e}"),
        }
    }

    /// Builds the schema, returning the first inconsistency found.
    pub fn try_build(self) -> SchemaResult<AttributeSchema> {
        let schema_name = self.name;

        let mut by_name = BTreeMap::new();
        let mut by_rest = BTreeMap::new();
        for (i, spec) in self.fields.iter().enumerate() {
            if by_name.insert(spec.name, i).is_some() {
                return Err(SchemaError::DuplicateField {
                    schema: schema_name.to_string(),
                    field: spec.name.to_string(),
                });
            }
            by_rest.entry(spec.rest_name.clone()).or_insert(i);
        }

        let mut group_ids = BTreeSet::new();
        let check_group = |id: GroupId,
                           fields: &[FieldName],
                           group_ids: &mut BTreeSet<GroupId>|
         -> SchemaResult<()> {
            if !group_ids.insert(id) {
                return Err(SchemaError::DuplicateGroup {
                    schema: schema_name.to_string(),
                    group: id.to_string(),
                });
            }
            if fields.is_empty() {
                return Err(SchemaError::EmptyGroup {
                    group: id.to_string(),
                });
            }
            if let Some(missing) = fields.iter().find(|f| !by_name.contains_key(*f)) {
                return Err(SchemaError::UnknownField {
                    group: id.to_string(),
                    field: missing.to_string(),
                });
            }
            Ok(())
        };

        let mut read_index = BTreeMap::new();
        for (i, group) in self.read_groups.iter().enumerate() {
            check_group(group.id, &group.fields, &mut group_ids)?;
            if group.shape == ReadShape::Single && group.fields.len() != 1 {
                return Err(SchemaError::SingleFieldShape {
                    group: group.id.to_string(),
                    count: group.fields.len(),
                });
            }
            for field in &group.fields {
                read_index.entry(*field).or_insert(i);
            }
        }

        let mut write_index: BTreeMap<FieldName, usize> = BTreeMap::new();
        for (i, group) in self.write_groups.iter().enumerate() {
            check_group(group.id, &group.fields, &mut group_ids)?;
            for field in &group.fields {
                if let Some(&first) = write_index.get(field) {
                    return Err(SchemaError::AmbiguousWrite {
                        field: field.to_string(),
                        first: self.write_groups[first].id.to_string(),
                        second: group.id.to_string(),
                    });
                }
                write_index.insert(*field, i);
            }
        }

        let mut seen_collections = BTreeSet::new();
        for spec in &self.collections {
            let Some(&idx) = by_name.get(&spec.field) else {
                return Err(SchemaError::UnknownField {
                    group: format!("collection {}", spec.field),
                    field: spec.field.to_string(),
                });
            };
            if !seen_collections.insert(spec.field) {
                return Err(SchemaError::DuplicateCollection {
                    field: spec.field.to_string(),
                });
            }
            if !matches!(self.fields[idx].codec, FieldCodec::IdSet(_)) {
                return Err(SchemaError::CollectionCodec {
                    field: spec.field.to_string(),
                });
            }
            if !read_index.contains_key(&spec.field) {
                return Err(SchemaError::CollectionNotReadable {
                    field: spec.field.to_string(),
                });
            }
        }

        Ok(AttributeSchema {
            name: self.name,
            min_version: self.min_version,
            fields: self.fields,
            by_name,
            by_rest,
            read_groups: self.read_groups,
            write_groups: self.write_groups,
            collections: self.collections,
            read_index,
            write_index,
        })
    }
}
