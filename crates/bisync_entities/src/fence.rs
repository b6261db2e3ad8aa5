//! Workload and user fences: rules pinning users or projects to cluster nodes.
//!
//! Fences need server version 11.3.0800 or later; every operation goes
//! through the version gate first.

use crate::entity::{create, set_some, typed_entity, Entity, EntityType};
use bisync_engine::{FlushReport, Scope, SyncEngine, SyncError, SyncResult};
use bisync_schema::{
    AttributeSchema, Endpoint, Field, FieldCodec, FieldType, IdPath, PatchStyle, ReadGroup,
    ServerVersion, Value, WriteGroup,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// First server version with fences.
pub const FENCE_MIN_VERSION: ServerVersion = ServerVersion::new(11, 3, 800, 0);

const FENCE_TYPES: &[&str] = &["user_fence", "workload_fence"];

/// The fence entity type.
pub static FENCE: EntityType = EntityType::new(fence_schema)
    .listed_under(Endpoint::get("/api/v2/fences"), "fences")
    .creatable(Endpoint::post("/api/v2/fences"))
    .deletable(Endpoint::delete("/api/v2/fences/{id}"));

fn fence_schema() -> &'static AttributeSchema {
    static SCHEMA: OnceLock<AttributeSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let ids = FieldCodec::IdSet(IdPath::at(&["id"]));
        AttributeSchema::builder("fence")
            .since(FENCE_MIN_VERSION)
            .field("id", FieldCodec::Text)
            .field("name", FieldCodec::Text)
            .field("rank", FieldCodec::Integer)
            .field("type", FieldCodec::Enum(FENCE_TYPES))
            .field("nodes", FieldCodec::TextList)
            .field("users", ids)
            .renamed("user_groups", "usergroups", ids)
            .field("projects", ids)
            .read(ReadGroup::new(
                "info",
                Endpoint::get("/api/v2/fences/{id}"),
                &["id", "name", "rank", "type", "nodes", "users", "user_groups", "projects"],
            ))
            .write(WriteGroup::new(
                "patch",
                Endpoint::patch("/api/v2/fences/{id}"),
                PatchStyle::JsonPatch,
                &["rank", "nodes", "users", "user_groups", "projects"],
            ))
            .build()
    })
}

/// What a fence restricts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceType {
    /// Pins users and user groups to nodes.
    UserFence,
    /// Pins workloads of projects to nodes.
    WorkloadFence,
}

impl FenceType {
    /// Server representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            FenceType::UserFence => "user_fence",
            FenceType::WorkloadFence => "workload_fence",
        }
    }
}

impl fmt::Display for FenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FieldType for FenceType {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Enum(s) | Value::Text(s) => match s.as_str() {
                "user_fence" => Some(FenceType::UserFence),
                "workload_fence" => Some(FenceType::WorkloadFence),
                _ => None,
            },
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Enum(self.as_str().to_string())
    }
}

#[derive(Debug, Serialize)]
struct Ref<'a> {
    id: &'a str,
}

fn refs(ids: &[String]) -> Vec<Ref<'_>> {
    ids.iter().map(|id| Ref { id: id.as_str() }).collect()
}

/// Body of a fence creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFence {
    /// Precedence; lower ranks win.
    pub rank: i64,
    /// Name.
    pub name: String,
    /// Fence type.
    pub fence_type: FenceType,
    /// Cluster nodes the fence applies across.
    pub nodes: Vec<String>,
    /// User ids.
    pub users: Vec<String>,
    /// User group ids.
    pub user_groups: Vec<String>,
    /// Project ids.
    pub projects: Vec<String>,
}

impl NewFence {
    /// A fence over `nodes` with no users, groups or projects yet.
    pub fn new(rank: i64, name: impl Into<String>, fence_type: FenceType, nodes: Vec<String>) -> Self {
        Self {
            rank,
            name: name.into(),
            fence_type,
            nodes,
            users: Vec::new(),
            user_groups: Vec::new(),
            projects: Vec::new(),
        }
    }

    fn body(&self) -> SyncResult<serde_json::Value> {
        if self.fence_type == FenceType::UserFence && self.users.is_empty() && self.user_groups.is_empty() {
            return Err(SyncError::InvalidArgument(
                "a user fence needs at least one user or user group".into(),
            ));
        }
        Ok(serde_json::json!({
            "rank": self.rank,
            "name": self.name,
            "type": self.fence_type,
            "nodes": self.nodes,
            "users": refs(&self.users),
            "usergroups": refs(&self.user_groups),
            "projects": refs(&self.projects),
        }))
    }
}

/// Changes applied by [`Fence::alter`]. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct FenceChanges {
    /// New rank.
    pub rank: Option<i64>,
    /// New nodes.
    pub nodes: Option<Vec<String>>,
    /// New user ids.
    pub users: Option<BTreeSet<String>>,
    /// New user group ids.
    pub user_groups: Option<BTreeSet<String>>,
    /// New project ids.
    pub projects: Option<BTreeSet<String>>,
}

/// A fence.
#[derive(Debug)]
pub struct Fence(Entity);

typed_entity!(Fence, FENCE);

impl Fence {
    /// Name.
    pub const NAME: Field<String> = Field::new("name");
    /// Rank.
    pub const RANK: Field<i64> = Field::new("rank");
    /// Fence type.
    pub const TYPE: Field<FenceType> = Field::new("type");
    /// Cluster nodes.
    pub const NODES: Field<Vec<String>> = Field::new("nodes");
    /// User ids.
    pub const USERS: Field<BTreeSet<String>> = Field::new("users");
    /// User group ids.
    pub const USER_GROUPS: Field<BTreeSet<String>> = Field::new("user_groups");
    /// Project ids.
    pub const PROJECTS: Field<BTreeSet<String>> = Field::new("projects");

    /// Creates a fence. A user fence must name users or user groups.
    pub fn create(engine: &Arc<SyncEngine>, fence: &NewFence) -> SyncResult<Self> {
        let body = fence.body()?;
        create(engine, &FENCE, body, &Scope::global()).map(Self)
    }

    /// Rank.
    pub fn rank(&mut self) -> SyncResult<Option<i64>> {
        self.get(Self::RANK)
    }

    /// Fence type.
    pub fn fence_type(&mut self) -> SyncResult<Option<FenceType>> {
        self.get(Self::TYPE)
    }

    /// Cluster nodes.
    pub fn nodes(&mut self) -> SyncResult<Vec<String>> {
        Ok(self.get(Self::NODES)?.unwrap_or_default())
    }

    /// Applies `changes` in one patch request.
    pub fn alter(&mut self, changes: FenceChanges) -> SyncResult<FlushReport> {
        let FenceChanges {
            rank,
            nodes,
            users,
            user_groups,
            projects,
        } = changes;
        set_some(self, Self::RANK, rank)?;
        set_some(self, Self::NODES, nodes)?;
        set_some(self, Self::USERS, users)?;
        set_some(self, Self::USER_GROUPS, user_groups)?;
        set_some(self, Self::PROJECTS, projects)?;
        self.flush()
    }
}
