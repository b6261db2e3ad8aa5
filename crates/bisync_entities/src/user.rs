//! Users.

use crate::entity::{create, set_some, typed_entity, Entity, EntityType};
use bisync_engine::{CollectionOp, CollectionOutcome, FlushReport, Scope, SyncEngine, SyncResult};
use bisync_schema::{
    AttributeSchema, CollectionSpec, DateFormat, Endpoint, Field, FieldCodec, IdPath, PatchStyle,
    ReadGroup, WriteGroup,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

/// The user entity type.
pub static USER: EntityType = EntityType::new(user_schema)
    .listed_at(Endpoint::get("/api/users"))
    .creatable(Endpoint::post("/api/users"))
    .deletable(Endpoint::delete("/api/users/{id}"));

fn user_schema() -> &'static AttributeSchema {
    static SCHEMA: OnceLock<AttributeSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let full = FieldCodec::DateTime(DateFormat::FULL_DATETIME);
        AttributeSchema::builder("user")
            .field("id", FieldCodec::Text)
            .field("name", FieldCodec::Text)
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
            .field("username", FieldCodec::Text)
            .field("full_name", FieldCodec::Text)
            .field("description", FieldCodec::Text)
            .field("enabled", FieldCodec::Bool)
            .field("password", FieldCodec::Text)
            .field("password_modifiable", FieldCodec::Bool)
            .field("password_expiration_date", full)
            .field("require_new_password", FieldCodec::Bool)
            .field("standard_auth", FieldCodec::Bool)
            .field("ldapdn", FieldCodec::Text)
            .field("trust_id", FieldCodec::Text)
            .field("initials", FieldCodec::Text)
            .field("memberships", FieldCodec::IdSet(IdPath::at(&["id"])))
            .field("addresses", FieldCodec::Json)
            .field("security_roles", FieldCodec::Json)
            .field(
                "privileges",
                FieldCodec::IdSet(IdPath::at(&["privilege", "id"]).direct_only()),
            )
            .read(ReadGroup::new(
                "info",
                Endpoint::get("/api/users/{id}"),
                &[
                    "id",
                    "name",
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
                    "username",
                    "full_name",
                    "enabled",
                    "password_modifiable",
                    "require_new_password",
                    "standard_auth",
                    "trust_id",
                    "initials",
                    "memberships",
                ],
            ))
            .read(ReadGroup::single(
                "addresses",
                Endpoint::get("/api/users/{id}/addresses"),
                "addresses",
            ))
            .read(ReadGroup::single(
                "security_roles",
                Endpoint::get("/api/users/{id}/securityRoles"),
                "security_roles",
            ))
            .read(ReadGroup::single(
                "privileges",
                Endpoint::get("/api/users/{id}/privileges"),
                "privileges",
            ))
            .write(WriteGroup::new(
                "patch",
                Endpoint::patch("/api/users/{id}"),
                PatchStyle::JsonPatch,
                &[
                    "name",
                    "abbreviation",
                    "username",
                    "full_name",
                    "description",
                    "enabled",
                    "password",
                    "password_modifiable",
                    "password_expiration_date",
                    "require_new_password",
                    "standard_auth",
                    "ldapdn",
                    "trust_id",
                    "initials",
                ],
            ))
            .collection(CollectionSpec::new("memberships", Endpoint::patch("/api/users/{id}")))
            .collection(CollectionSpec::new("privileges", Endpoint::patch("/api/users/{id}")))
            .build()
    })
}

/// A delivery address of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    /// Address id.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Delivery mode, e.g. `EMAIL`.
    #[serde(default)]
    pub delivery_mode: Option<String>,
    /// Device the address delivers to.
    #[serde(default)]
    pub device: Option<Json>,
    /// The address itself.
    #[serde(default)]
    pub value: Option<String>,
    /// Whether this is the user's default address.
    #[serde(default)]
    pub is_default: bool,
}

/// Body of a user creation request.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    /// Login name.
    pub username: String,
    /// Display name.
    pub full_name: String,
    /// Description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Initial password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Whether the account is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Whether the user may change the password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_modifiable: Option<bool>,
    /// When the password expires.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "full_datetime"
    )]
    pub password_expiration_date: Option<DateTime<Utc>>,
    /// Force a password change at next login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_new_password: Option<bool>,
    /// Whether standard authentication is allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard_auth: Option<bool>,
    /// LDAP distinguished name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ldapdn: Option<String>,
    /// Trusted authentication id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_id: Option<String>,
    /// User groups to join.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub memberships: Vec<String>,
}

impl NewUser {
    /// A user with a login and a display name.
    pub fn new(username: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            full_name: full_name.into(),
            ..Self::default()
        }
    }
}

fn full_datetime<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(dt) => serializer.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%S%.3f%z").to_string()),
        None => serializer.serialize_none(),
    }
}

/// Changes applied by [`User::alter`]. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    /// New login name.
    pub username: Option<String>,
    /// New display name.
    pub full_name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New password.
    pub password: Option<String>,
    /// Enable or disable the account.
    pub enabled: Option<bool>,
    /// Whether the user may change the password.
    pub password_modifiable: Option<bool>,
    /// New password expiration.
    pub password_expiration_date: Option<DateTime<Utc>>,
    /// Force a password change at next login.
    pub require_new_password: Option<bool>,
    /// Whether standard authentication is allowed.
    pub standard_auth: Option<bool>,
    /// LDAP distinguished name.
    pub ldapdn: Option<String>,
    /// Trusted authentication id.
    pub trust_id: Option<String>,
}

/// A user account.
#[derive(Debug)]
pub struct User(Entity);

typed_entity!(User, USER);

impl User {
    /// Display name.
    pub const NAME: Field<String> = Field::new("name");
    /// Abbreviation.
    pub const ABBREVIATION: Field<String> = Field::new("abbreviation");
    /// Login name.
    pub const USERNAME: Field<String> = Field::new("username");
    /// Full name.
    pub const FULL_NAME: Field<String> = Field::new("full_name");
    /// Description. Write-only.
    pub const DESCRIPTION: Field<String> = Field::new("description");
    /// Whether the account is enabled.
    pub const ENABLED: Field<bool> = Field::new("enabled");
    /// Password. Write-only.
    pub const PASSWORD: Field<String> = Field::new("password");
    /// Whether the user may change the password.
    pub const PASSWORD_MODIFIABLE: Field<bool> = Field::new("password_modifiable");
    /// Password expiration. Write-only.
    pub const PASSWORD_EXPIRATION_DATE: Field<DateTime<Utc>> = Field::new("password_expiration_date");
    /// Force a password change at next login.
    pub const REQUIRE_NEW_PASSWORD: Field<bool> = Field::new("require_new_password");
    /// Whether standard authentication is allowed.
    pub const STANDARD_AUTH: Field<bool> = Field::new("standard_auth");
    /// LDAP distinguished name. Write-only.
    pub const LDAPDN: Field<String> = Field::new("ldapdn");
    /// Trusted authentication id.
    pub const TRUST_ID: Field<String> = Field::new("trust_id");
    /// Initials.
    pub const INITIALS: Field<String> = Field::new("initials");
    /// Creation time.
    pub const DATE_CREATED: Field<DateTime<Utc>> = Field::new("date_created");
    /// Last modification time.
    pub const DATE_MODIFIED: Field<DateTime<Utc>> = Field::new("date_modified");
    /// Owner record.
    pub const OWNER: Field<BTreeMap<String, Json>> = Field::new("owner");
    /// Ids of the user groups the user belongs to.
    pub const MEMBERSHIPS: Field<BTreeSet<String>> = Field::new("memberships");
    /// Ids of directly granted privileges.
    pub const PRIVILEGES: Field<BTreeSet<String>> = Field::new("privileges");
    /// Raw delivery addresses.
    pub const ADDRESSES: Field<Json> = Field::new("addresses");
    /// Raw security roles per project.
    pub const SECURITY_ROLES: Field<Json> = Field::new("security_roles");

    /// Creates a user.
    pub fn create(engine: &Arc<SyncEngine>, user: &NewUser) -> SyncResult<Self> {
        let body = serde_json::to_value(user)?;
        create(engine, &USER, body, &Scope::global()).map(Self)
    }

    /// Login name.
    pub fn username(&mut self) -> SyncResult<Option<String>> {
        self.get(Self::USERNAME)
    }

    /// Full name.
    pub fn full_name(&mut self) -> SyncResult<Option<String>> {
        self.get(Self::FULL_NAME)
    }

    /// Returns true if the account is enabled.
    pub fn is_enabled(&mut self) -> SyncResult<bool> {
        Ok(self.get(Self::ENABLED)?.unwrap_or(false))
    }

    /// Ids of the user groups the user belongs to.
    pub fn memberships(&mut self) -> SyncResult<BTreeSet<String>> {
        Ok(self.get(Self::MEMBERSHIPS)?.unwrap_or_default())
    }

    /// Ids of the privileges granted to the user directly.
    pub fn privileges(&mut self) -> SyncResult<BTreeSet<String>> {
        Ok(self.get(Self::PRIVILEGES)?.unwrap_or_default())
    }

    /// Delivery addresses.
    pub fn addresses(&mut self) -> SyncResult<Vec<Address>> {
        match self.get(Self::ADDRESSES)? {
            Some(raw) => Ok(serde_json::from_value(raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Applies `changes` and sends them.
    pub fn alter(&mut self, changes: UserChanges) -> SyncResult<FlushReport> {
        let UserChanges {
            username,
            full_name,
            description,
            password,
            enabled,
            password_modifiable,
            password_expiration_date,
            require_new_password,
            standard_auth,
            ldapdn,
            trust_id,
        } = changes;
        set_some(self, Self::USERNAME, username)?;
        set_some(self, Self::FULL_NAME, full_name)?;
        set_some(self, Self::DESCRIPTION, description)?;
        set_some(self, Self::PASSWORD, password)?;
        set_some(self, Self::ENABLED, enabled)?;
        set_some(self, Self::PASSWORD_MODIFIABLE, password_modifiable)?;
        set_some(self, Self::PASSWORD_EXPIRATION_DATE, password_expiration_date)?;
        set_some(self, Self::REQUIRE_NEW_PASSWORD, require_new_password)?;
        set_some(self, Self::STANDARD_AUTH, standard_auth)?;
        set_some(self, Self::LDAPDN, ldapdn)?;
        set_some(self, Self::TRUST_ID, trust_id)?;
        self.flush()
    }

    /// Adds the user to user groups.
    pub fn add_to_user_groups<I, S>(&mut self, groups: I) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutate("memberships", CollectionOp::Add, groups)
    }

    /// Removes the user from user groups.
    pub fn remove_from_user_groups<I, S>(&mut self, groups: I) -> SyncResult<CollectionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutate("memberships", CollectionOp::Remove, groups)
    }

    /// Removes the user from every user group.
    pub fn remove_from_all_user_groups(&mut self) -> SyncResult<CollectionOutcome> {
        let current = self.memberships()?;
        self.mutate_set("memberships", CollectionOp::Remove, &current)
    }

    /// Grants privileges directly to the user.
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

    /// Revokes every directly granted privilege.
    pub fn revoke_all_privileges(&mut self) -> SyncResult<CollectionOutcome> {
        let current = self.privileges()?;
        self.mutate_set("privileges", CollectionOp::Remove, &current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bisync_engine::{HttpMethod, MockSession, SyncConfig};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine(session: Arc<MockSession>) -> Arc<SyncEngine> {
        Arc::new(SyncEngine::new(SyncConfig::new("11.3.0100".parse().unwrap()), session))
    }

    #[test]
    fn schema_builds() {
        let schema = USER.schema();
        assert_eq!(schema.name(), "user");
        assert!(schema.resolve_write("memberships").is_none());
        assert!(schema.resolve_read("password").is_none());
        assert_eq!(schema.field("full_name").unwrap().rest(), "fullName");
    }

    #[test]
    fn new_user_body_skips_unset_fields() {
        let mut user = NewUser::new("jdoe", "John Doe");
        user.password_expiration_date = Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap());
        user.memberships = vec!["G1".into()];
        assert_eq!(
            serde_json::to_value(&user).unwrap(),
            json!({
                "username": "jdoe",
                "fullName": "John Doe",
                "passwordExpirationDate": "2030-01-02T03:04:05.000+0000",
                "memberships": ["G1"],
            })
        );
    }

    #[test]
    fn alter_sends_one_patch() {
        let session = Arc::new(MockSession::new());
        session.respond_json(HttpMethod::Patch, "/api/users/U1", 200, json!({"id": "U1"}));
        let mut user = User::new(engine(session.clone()), "U1");

        user.alter(UserChanges {
            full_name: Some("Jane".into()),
            enabled: Some(false),
            ..UserChanges::default()
        })
        .unwrap();

        let sent = session.requests_to(HttpMethod::Patch, "/api/users/U1");
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].body,
            Some(json!({"operationList": [
                {"op": "replace", "path": "/enabled", "value": false},
                {"op": "replace", "path": "/fullName", "value": "Jane"},
            ]}))
        );
    }

    #[test]
    fn addresses_deserialize() {
        let session = Arc::new(MockSession::new());
        session.respond_json(
            HttpMethod::Get,
            "/api/users/U1/addresses",
            200,
            json!({"addresses": [{
                "id": "A1",
                "name": "work",
                "deliveryMode": "EMAIL",
                "value": "jane@example.com",
                "isDefault": true
            }]}),
        );
        let mut user = User::new(engine(session), "U1");
        let addresses = user.addresses().unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].delivery_mode.as_deref(), Some("EMAIL"));
        assert!(addresses[0].is_default);
    }
}
