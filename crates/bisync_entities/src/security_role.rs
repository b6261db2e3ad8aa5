//! Security roles: project-level privilege sets granted per project.

use crate::entity::{create, set_some, typed_entity, Entity, EntityType};
use bisync_engine::{
    CollectionOp, CollectionOutcome, FlushReport, Scope, Selection, SyncEngine, SyncResult,
};
use bisync_schema::{
    AttributeSchema, CollectionSpec, CollectionVerbs, DateFormat, Endpoint, Field, FieldCodec,
    IdPath, PatchStyle, ReadGroup, WriteGroup,
};
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

/// The security role entity type.
pub static SECURITY_ROLE: EntityType = EntityType::new(security_role_schema)
    .listed_at(Endpoint::get("/api/securityRoles"))
    .creatable(Endpoint::post("/api/securityRoles"))
    .deletable(Endpoint::delete("/api/securityRoles/{id}"));

fn security_role_schema() -> &'static AttributeSchema {
    static SCHEMA: OnceLock<AttributeSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let full = FieldCodec::DateTime(DateFormat::FULL_DATETIME);
        let ids = FieldCodec::IdSet(IdPath::at(&["id"]));
        AttributeSchema::builder("security_role")
            .field("id", FieldCodec::Text)
            .field("name", FieldCodec::Text)
            .field("description", FieldCodec::Text)
            .field("type", FieldCodec::Integer)
            .field("subtype", FieldCodec::Integer)
            .field("date_created", full)
            .field("date_modified", full)
            .field("version", FieldCodec::Text)
            .field("owner", FieldCodec::Record)
            .field("acg", FieldCodec::Integer)
            .field("acl", FieldCodec::Json)
            .field("projects", FieldCodec::Json)
            .field("privileges", ids)
            .field("members", ids)
            .read(ReadGroup::new(
                "info",
                Endpoint::get("/api/securityRoles/{id}"),
                &[
                    "id",
                    "name",
                    "description",
                    "type",
                    "subtype",
                    "date_created",
                    "date_modified",
                    "version",
                    "owner",
                    "acg",
                    "acl",
                    "projects",
                    "privileges",
                ],
            ))
            .read(ReadGroup::single(
                "members",
                Endpoint::get("/api/securityRoles/{id}/projects/{project}/members"),
                "members",
            ))
            .write(WriteGroup::new(
                "update",
                Endpoint::patch("/api/securityRoles/{id}"),
                PatchStyle::WholePut,
                &["name", "description"],
            ))
            .collection(
                CollectionSpec::new("privileges", Endpoint::patch("/api/securityRoles/{id}"))
                    .with_verbs(CollectionVerbs::ELEMENT)
                    .encoded(),
            )
            .collection(
                CollectionSpec::new("members", Endpoint::patch("/api/securityRoles/{id}"))
                    .project_scoped(),
            )
            .build()
    })
}

#[derive(Debug, Serialize)]
struct PrivilegeRef<'a> {
    id: &'a str,
}

/// A named set of project-level privileges.
#[derive(Debug)]
pub struct SecurityRole(Entity);

typed_entity!(SecurityRole, SECURITY_ROLE);

impl SecurityRole {
    /// Name.
    pub const NAME: Field<String> = Field::new("name");
    /// Description.
    pub const DESCRIPTION: Field<String> = Field::new("description");
    /// Ids of the privileges in the role.
    pub const PRIVILEGES: Field<BTreeSet<String>> = Field::new("privileges");
    /// Member ids in the project last queried.
    pub const MEMBERS: Field<BTreeSet<String>> = Field::new("members");
    /// Raw per-project assignments.
    pub const PROJECTS: Field<Json> = Field::new("projects");

    /// Creates a role holding `privileges`.
    pub fn create<I, S>(
        engine: &Arc<SyncEngine>,
        name: &str,
        description: &str,
        privileges: I,
    ) -> SyncResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let privileges: Vec<S> = privileges.into_iter().collect();
        let refs: Vec<PrivilegeRef<'_>> = privileges
            .iter()
            .map(|p| PrivilegeRef { id: p.as_ref() })
            .collect();
        let body = serde_json::json!({
            "name": name,
            "description": description,
            "privileges": refs,
        });
        create(engine, &SECURITY_ROLE, body, &Scope::global()).map(Self)
    }

    /// Ids of the privileges in the role.
    pub fn privileges(&mut self) -> SyncResult<BTreeSet<String>> {
        Ok(self.get(Self::PRIVILEGES)?.unwrap_or_default())
    }

    /// Ids of the users and groups holding the role in `project`.
    ///
    /// Always read from the server; membership differs per project.
    pub fn members(&mut self, project: &str) -> SyncResult<BTreeSet<String>> {
        self.fetch_in(&Selection::field("members"), true, &Scope::project(project))?;
        Ok(self.cached(Self::MEMBERS)?.unwrap_or_default())
    }

    /// Changes name and description; `None` leaves a field alone.
    pub fn alter(&mut self, name: Option<String>, description: Option<String>) -> SyncResult<FlushReport> {
        set_some(self, Self::NAME, name)?;
        set_some(self, Self::DESCRIPTION, description)?;
        self.flush()
    }

    /// Grants the role to users or groups in `project`.
    pub fn grant_to<I, S>(&mut self, members: I, project: &str) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: BTreeSet<String> = members.into_iter().map(Into::into).collect();
        self.mutate_in("members", CollectionOp::Add, &members, &Scope::project(project))
    }

    /// Revokes the role from users or groups in `project`.
    pub fn revoke_from<I, S>(&mut self, members: I, project: &str) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: BTreeSet<String> = members.into_iter().map(Into::into).collect();
        self.mutate_in("members", CollectionOp::Remove, &members, &Scope::project(project))
    }

    /// Adds privileges to the role.
    pub fn grant_privilege<I, S>(&mut self, privileges: I) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutate("privileges", CollectionOp::Add, privileges)
    }

    /// Removes privileges from the role.
    pub fn revoke_privilege<I, S>(&mut self, privileges: I) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutate("privileges", CollectionOp::Remove, privileges)
    }

    /// Removes every privilege from the role.
    pub fn revoke_all_privileges(&mut self) -> SyncResult<CollectionOutcome> {
        let current = self.privileges()?;
        self.mutate_set("privileges", CollectionOp::Remove, &current)
    }
}
