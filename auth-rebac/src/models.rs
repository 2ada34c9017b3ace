use crate::error::{RebacError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Longest object id the engine accepts.
pub const MAX_ID_LENGTH: usize = 1024;

/// Closed set of names that serialise to the engine's lower-case identifiers.
macro_rules! engine_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = RebacError;

            fn from_str(s: &str) -> Result<Self> {
                let normalized = s.trim().to_ascii_lowercase();
                match normalized.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(RebacError::InvalidRequest(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        s
                    ))),
                }
            }
        }
    };
}

engine_enum!(
    /// Resource types the engine schema defines
    ResourceType {
        File => "file",
        Folder => "folder",
        Group => "group",
        Dataverse => "dataverse",
    }
);

engine_enum!(
    /// Subject types; every resource type can also be the subject of a `parent` edge
    SubjectType {
        Tenant => "tenant",
        Group => "group",
        File => "file",
        Folder => "folder",
        Dataverse => "dataverse",
    }
);

engine_enum!(
    /// Relations stored as tuples
    Relation {
        Owner => "owner",
        Editor => "editor",
        Viewer => "viewer",
        Member => "member",
        Parent => "parent",
    }
);

engine_enum!(
    /// Permissions computed by the engine
    Permission {
        Read => "read",
        Write => "write",
        Delete => "delete",
        Grant => "grant",
        Revoke => "revoke",
    }
);

impl From<ResourceType> for SubjectType {
    fn from(resource_type: ResourceType) -> Self {
        match resource_type {
            ResourceType::File => SubjectType::File,
            ResourceType::Folder => SubjectType::Folder,
            ResourceType::Group => SubjectType::Group,
            ResourceType::Dataverse => SubjectType::Dataverse,
        }
    }
}

impl SubjectType {
    /// The resource type a subject names, if it names a resource at all.
    pub fn resource_type(self) -> Option<ResourceType> {
        match self {
            SubjectType::Tenant => None,
            SubjectType::Group => Some(ResourceType::Group),
            SubjectType::File => Some(ResourceType::File),
            SubjectType::Folder => Some(ResourceType::Folder),
            SubjectType::Dataverse => Some(ResourceType::Dataverse),
        }
    }
}

impl Relation {
    /// Ownership is assigned at creation and transferred explicitly, never granted.
    pub fn is_grantable(self) -> bool {
        !matches!(self, Relation::Owner)
    }
}

pub(crate) fn validate_id(what: &str, id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LENGTH {
        return Err(RebacError::InvalidRequest(format!(
            "{} id must be between 1 and {} characters",
            what, MAX_ID_LENGTH
        )));
    }
    let valid = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '|' | '-' | '=' | '+'));
    if !valid {
        return Err(RebacError::InvalidRequest(format!(
            "{} id '{}' contains unsupported characters",
            what, id
        )));
    }
    Ok(())
}

/// A node in the relation graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub id: String,
}

impl ResourceRef {
    pub fn new(resource_type: ResourceType, id: impl Into<String>) -> Self {
        Self {
            resource_type,
            id: id.into(),
        }
    }

    pub fn file(id: impl Into<String>) -> Self {
        Self::new(ResourceType::File, id)
    }

    pub fn folder(id: impl Into<String>) -> Self {
        Self::new(ResourceType::Folder, id)
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::new(ResourceType::Group, id)
    }

    pub fn dataverse(id: impl Into<String>) -> Self {
        Self::new(ResourceType::Dataverse, id)
    }

    /// `type:id`, unique per node.
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource_type, self.id)
    }

    pub fn validate(&self) -> Result<()> {
        validate_id("resource", &self.id)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id)
    }
}

/// A principal, or with `sub_relation` set, the set of subjects holding that relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    #[serde(rename = "type")]
    pub subject_type: SubjectType,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_relation: Option<Relation>,
}

impl SubjectRef {
    pub fn new(subject_type: SubjectType, id: impl Into<String>) -> Self {
        Self {
            subject_type,
            id: id.into(),
            sub_relation: None,
        }
    }

    pub fn tenant(id: impl Into<String>) -> Self {
        Self::new(SubjectType::Tenant, id)
    }

    /// `group:{id}#member`
    pub fn group_members(group_id: impl Into<String>) -> Self {
        Self::new(SubjectType::Group, group_id).with_sub_relation(Relation::Member)
    }

    pub fn with_sub_relation(mut self, relation: Relation) -> Self {
        self.sub_relation = Some(relation);
        self
    }

    /// The resource this subject names, ignoring any sub-relation.
    pub fn as_resource(&self) -> Option<ResourceRef> {
        self.subject_type
            .resource_type()
            .map(|resource_type| ResourceRef::new(resource_type, self.id.clone()))
    }

    pub fn validate(&self) -> Result<()> {
        validate_id("subject", &self.id)
    }
}

impl From<&ResourceRef> for SubjectRef {
    fn from(resource: &ResourceRef) -> Self {
        SubjectRef::new(resource.resource_type.into(), resource.id.clone())
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub_relation {
            Some(relation) => write!(f, "{}:{}#{}", self.subject_type, self.id, relation),
            None => write!(f, "{}:{}", self.subject_type, self.id),
        }
    }
}

/// Named condition attached to a tuple; the engine compares these fields
/// with the context presented at check time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaveatContext {
    pub caveat_name: String,
    pub fields: HashMap<String, String>,
}

impl CaveatContext {
    pub fn new(caveat_name: impl Into<String>) -> Self {
        Self {
            caveat_name: caveat_name.into(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

// Field values are often secrets (passwords), so only keys are printed.
impl fmt::Debug for CaveatContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.fields.keys().collect();
        keys.sort();
        f.debug_struct("CaveatContext")
            .field("caveat_name", &self.caveat_name)
            .field("fields", &keys)
            .finish()
    }
}

/// A caveat name plus the key it is stored under and the key it is presented under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaveatPolicy {
    pub name: String,
    pub allowed_key: String,
    pub supplied_key: String,
}

impl CaveatPolicy {
    pub fn new(
        name: impl Into<String>,
        allowed_key: impl Into<String>,
        supplied_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            allowed_key: allowed_key.into(),
            supplied_key: supplied_key.into(),
        }
    }

    pub fn password() -> Self {
        Self::new("password_match", "allowed_password", "supplied_password")
    }

    pub fn ip() -> Self {
        Self::new("ip_allowlist", "allowed_ip", "supplied_ip")
    }

    pub fn platform() -> Self {
        Self::new("platform_app_match", "appId", "platformId")
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::password(), Self::ip(), Self::platform()]
    }

    /// Write-side context: the value a grant is conditioned on.
    pub fn allow(&self, value: impl Into<String>) -> CaveatContext {
        CaveatContext::new(self.name.clone()).with_field(self.allowed_key.clone(), value)
    }

    /// Check-side context: the value the requester presents.
    pub fn supply(&self, value: impl Into<String>) -> HashMap<String, String> {
        let mut context = HashMap::new();
        context.insert(self.supplied_key.clone(), value.into());
        context
    }
}

/// Known caveat policies, by name
#[derive(Debug, Clone, Default)]
pub struct CaveatPolicies {
    by_name: HashMap<String, CaveatPolicy>,
}

impl CaveatPolicies {
    pub fn new(policies: impl IntoIterator<Item = CaveatPolicy>) -> Self {
        Self {
            by_name: policies
                .into_iter()
                .map(|policy| (policy.name.clone(), policy))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&CaveatPolicy> {
        self.by_name
            .get(name)
            .ok_or_else(|| RebacError::InvalidRequest(format!("unknown caveat '{}'", name)))
    }
}

/// A caller-presented caveat: policy name plus the value to store or compare.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaveatValue {
    pub caveat: String,
    pub value: String,
}

impl CaveatValue {
    pub fn new(caveat: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            caveat: caveat.into(),
            value: value.into(),
        }
    }

    /// Check-time context for this value
    pub fn supplied(&self, policies: &CaveatPolicies) -> Result<HashMap<String, String>> {
        Ok(policies.get(&self.caveat)?.supply(self.value.clone()))
    }
}

impl fmt::Debug for CaveatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaveatValue")
            .field("caveat", &self.caveat)
            .field("value", &"***")
            .finish()
    }
}

/// Optional caveat and expiry attached to a grant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantConditions {
    pub caveat: Option<CaveatContext>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GrantConditions {
    pub fn none() -> Self {
        Self::default()
    }

    /// Resolve a request's caveat value and `daysFromNow` into conditions
    pub fn from_request(
        policies: &CaveatPolicies,
        caveat: Option<&CaveatValue>,
        days_from_now: Option<u32>,
    ) -> Result<Self> {
        let caveat = match caveat {
            Some(requested) => Some(policies.get(&requested.caveat)?.allow(requested.value.clone())),
            None => None,
        };
        Ok(Self {
            caveat,
            expires_at: days_from_now.map(|days| Utc::now() + Duration::days(i64::from(days))),
        })
    }

    pub fn with_caveat(mut self, caveat: CaveatContext) -> Self {
        self.caveat = Some(caveat);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn apply(self, mut tuple: RelationshipTuple) -> RelationshipTuple {
        tuple.caveat = self.caveat;
        tuple.expires_at = self.expires_at;
        tuple
    }
}

/// Directed edge `resource --relation--> subject`.
///
/// Addressed by (resource, relation, subject); caveat and expiry are payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipTuple {
    pub resource: ResourceRef,
    pub relation: Relation,
    pub subject: SubjectRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caveat: Option<CaveatContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RelationshipTuple {
    pub fn new(resource: ResourceRef, relation: Relation, subject: SubjectRef) -> Self {
        Self {
            resource,
            relation,
            subject,
            caveat: None,
            expires_at: None,
        }
    }

    /// Tuple for the generic grant/revoke path; ownership is rejected.
    pub fn grant(resource: ResourceRef, relation: Relation, subject: SubjectRef) -> Result<Self> {
        if !relation.is_grantable() {
            return Err(RebacError::InvalidRequest(format!(
                "relation '{}' cannot be granted or revoked",
                relation
            )));
        }
        Ok(Self::new(resource, relation, subject))
    }

    pub fn with_caveat(mut self, caveat: CaveatContext) -> Self {
        self.caveat = Some(caveat);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn expires_in_days(self, days: u32) -> Self {
        self.expires_at(Utc::now() + Duration::days(i64::from(days)))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Upsert address of the tuple.
    pub fn key(&self) -> String {
        format!("{}#{}@{}", self.resource, self.relation, self.subject)
    }

    pub fn validate(&self) -> Result<()> {
        self.resource.validate()?;
        self.subject.validate()?;
        if let Some(ref caveat) = self.caveat {
            if caveat.caveat_name.trim().is_empty() {
                return Err(RebacError::InvalidRequest("caveat name is empty".to_string()));
            }
        }
        Ok(())
    }
}

impl fmt::Display for RelationshipTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.relation, self.subject)
    }
}

/// Does `subject` hold `permission` on `resource`?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionQuery {
    pub resource: ResourceRef,
    pub permission: Permission,
    pub subject: SubjectRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, String>>,
}

impl PermissionQuery {
    pub fn new(resource: ResourceRef, permission: Permission, subject: SubjectRef) -> Self {
        Self {
            resource,
            permission,
            subject,
            context: None,
        }
    }

    pub fn with_context(mut self, context: HashMap<String, String>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.resource.validate()?;
        self.subject.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessType {
    Direct,
    Indirect,
}

impl AccessType {
    pub fn for_level(level: u32) -> Self {
        if level <= 1 {
            AccessType::Direct
        } else {
            AccessType::Indirect
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HierarchyDirection {
    Parent,
    Child,
}

/// One ancestor or descendant of the queried resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyRelation {
    pub access_type: AccessType,
    pub resource: ResourceRef,
    pub relation: HierarchyDirection,
    pub level: u32,
}

impl HierarchyRelation {
    pub fn new(relation: HierarchyDirection, resource: ResourceRef, level: u32) -> Self {
        Self {
            access_type: AccessType::for_level(level),
            resource,
            relation,
            level,
        }
    }
}
