//! User groups.

use crate::entity::{create, set_some, typed_entity, Entity, EntityType};
use bisync_engine::{CollectionOp, CollectionOutcome, FlushReport, Scope, SyncEngine, SyncResult};
use bisync_schema::{
    AttributeSchema, CollectionSpec, DateFormat, Endpoint, Field, FieldCodec, IdPath, PatchStyle,
    ReadGroup, WriteGroup,
};
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

/// The user group entity type.
pub static USER_GROUP: EntityType = EntityType::new(user_group_schema)
    .listed_at(Endpoint::get("/api/usergroups"))
    .creatable(Endpoint::post("/api/usergroups"))
    .deletable(Endpoint::delete("/api/usergroups/{id}"));

fn user_group_schema() -> &'static AttributeSchema {
    static SCHEMA: OnceLock<AttributeSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let full = FieldCodec::DateTime(DateFormat::FULL_DATETIME);
        let ids = FieldCodec::IdSet(IdPath::at(&["id"]));
        AttributeSchema::builder("user_group")
            .field("id", FieldCodec::Text)
            .field("name", FieldCodec::Text)
            .field("description", FieldCodec::Text)
            .field("type", FieldCodec::Integer)
            .field("subtype", FieldCodec::Integer)
            .field("ext_type", FieldCodec::Integer)
            .field("abbreviation", FieldCodec::Text)
            .field("date_created", full)
            .field("date_modified", full)
            .field("version", FieldCodec::Text)
            .field("owner", FieldCodec::Record)
            .field("ancestors", FieldCodec::Json)
            .field("acg", FieldCodec::Integer)
            .field("acl", FieldCodec::Json)
            .field("memberships", ids)
            .field("members", ids)
            .field("security_roles", FieldCodec::Json)
            .field(
                "privileges",
                FieldCodec::IdSet(IdPath::at(&["privilege", "id"]).direct_only()),
            )
            .read(ReadGroup::new(
                "info",
                Endpoint::get("/api/usergroups/{id}"),
                &[
                    "id",
                    "name",
                    "description",
                    "type",
                    "subtype",
                    "ext_type",
                    "abbreviation",
                    "date_created",
                    "date_modified",
                    "version",
                    "owner",
                    "ancestors",
                    "acg",
                    "acl",
                ],
            ))
            .read(ReadGroup::single(
                "memberships",
                Endpoint::get("/api/usergroups/{id}/memberships"),
                "memberships",
            ))
            .read(ReadGroup::single(
                "members",
                Endpoint::get("/api/usergroups/{id}/members"),
                "members",
            ))
            .read(ReadGroup::single(
                "security_roles",
                Endpoint::get("/api/usergroups/{id}/securityRoles"),
                "security_roles",
            ))
            .read(ReadGroup::single(
                "privileges",
                Endpoint::get("/api/usergroups/{id}/privileges"),
                "privileges",
            ))
            .write(WriteGroup::new(
                "object",
                Endpoint::put("/api/objects/{id}").with_query(&[("type", "34")]),
                PatchStyle::PartialPut,
                &["abbreviation"],
            ))
            .write(WriteGroup::new(
                "patch",
                Endpoint::patch("/api/usergroups/{id}"),
                PatchStyle::JsonPatch,
                &["name", "description"],
            ))
            .collection(CollectionSpec::new("members", Endpoint::patch("/api/usergroups/{id}")))
            .collection(CollectionSpec::new("memberships", Endpoint::patch("/api/usergroups/{id}")))
            .collection(CollectionSpec::new("privileges", Endpoint::patch("/api/usergroups/{id}")))
            .build()
    })
}

/// Body of a user group creation request.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserGroup {
    /// Group name.
    pub name: String,
    /// Description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ids of the groups this group joins.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub memberships: Vec<String>,
    /// Ids of the initial members.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

impl NewUserGroup {
    /// A group with a name only.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A group of users.
#[derive(Debug)]
pub struct UserGroup(Entity);

typed_entity!(UserGroup, USER_GROUP);

impl UserGroup {
    /// Name.
    pub const NAME: Field<String> = Field::new("name");
    /// Description.
    pub const DESCRIPTION: Field<String> = Field::new("description");
    /// Abbreviation; written through the generic object endpoint.
    pub const ABBREVIATION: Field<String> = Field::new("abbreviation");
    /// Ids of the groups this group belongs to.
    pub const MEMBERSHIPS: Field<BTreeSet<String>> = Field::new("memberships");
    /// Ids of the users and groups in this group.
    pub const MEMBERS: Field<BTreeSet<String>> = Field::new("members");
    /// Ids of directly granted privileges.
    pub const PRIVILEGES: Field<BTreeSet<String>> = Field::new("privileges");
    /// Raw security roles per project.
    pub const SECURITY_ROLES: Field<Json> = Field::new("security_roles");

    /// Creates a user group.
    pub fn create(engine: &Arc<SyncEngine>, group: &NewUserGroup) -> SyncResult<Self> {
        let body = serde_json::to_value(group)?;
        create(engine, &USER_GROUP, body, &Scope::global()).map(Self)
    }

    /// Ids of the users and groups in this group.
    pub fn members(&mut self) -> SyncResult<BTreeSet<String>> {
        Ok(self.get(Self::MEMBERS)?.unwrap_or_default())
    }

    /// Ids of the groups this group belongs to.
    pub fn memberships(&mut self) -> SyncResult<BTreeSet<String>> {
        Ok(self.get(Self::MEMBERSHIPS)?.unwrap_or_default())
    }

    /// Ids of the privileges granted to the group directly.
    pub fn privileges(&mut self) -> SyncResult<BTreeSet<String>> {
        Ok(self.get(Self::PRIVILEGES)?.unwrap_or_default())
    }

    /// Changes name, description and abbreviation; `None` leaves a field alone.
    pub fn alter(
        &mut self,
        name: Option<String>,
        description: Option<String>,
        abbreviation: Option<String>,
    ) -> SyncResult<FlushReport> {
        set_some(self, Self::NAME, name)?;
        set_some(self, Self::DESCRIPTION, description)?;
        set_some(self, Self::ABBREVIATION, abbreviation)?;
        self.flush()
    }

    /// Adds users or groups to this group.
    pub fn add_users<I, S>(&mut self, users: I) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutate("members", CollectionOp::Add, users)
    }

    /// Removes users or groups from this group.
    pub fn remove_users<I, S>(&mut self, users: I) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutate("members", CollectionOp::Remove, users)
    }

    /// Removes every member.
    pub fn remove_all_users(&mut self) -> SyncResult<CollectionOutcome> {
        let current = self.members()?;
        self.mutate_set("members", CollectionOp::Remove, &current)
    }

    /// Makes this group a member of other groups.
    pub fn add_to_user_groups<I, S>(&mut self, groups: I) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutate("memberships", CollectionOp::Add, groups)
    }

    /// Removes this group from other groups.
    pub fn remove_from_user_groups<I, S>(&mut self, groups: I) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutate("memberships", CollectionOp::Remove, groups)
    }

    /// Grants privileges directly to the group.
    pub fn grant_privilege<I, S>(&mut self, privileges: I) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutate("privileges", CollectionOp::Add, privileges)
    }

    /// Revokes directly granted privileges.
    pub fn revoke_privilege<I, S>(&mut self, privileges: I) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutate("privileges", CollectionOp::Remove, privileges)
    }
}
