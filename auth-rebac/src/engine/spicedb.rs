//! SpiceDB transport over its HTTP/JSON API.
//!
//! Reads are issued fully consistent; the read endpoint streams one JSON
//! object per line, each holding either a `result` or an `error`.

use super::{PermissionEngine, RelationshipFilter, SubRelationFilter, SubjectFilter};
use crate::{config::EngineConfig, error::RebacError, models::*};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error};

const HAS_PERMISSION: &str = "PERMISSIONSHIP_HAS_PERMISSION";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectReference {
    object_type: String,
    object_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectReference {
    object: ObjectReference,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    optional_relation: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextualizedCaveat {
    caveat_name: String,
    #[serde(default)]
    context: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Relationship {
    resource: ObjectReference,
    relation: String,
    subject: SubjectReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    optional_caveat: Option<ContextualizedCaveat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    optional_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelationshipUpdate {
    operation: &'static str,
    relationship: Relationship,
}

#[derive(Debug, Serialize)]
struct WriteRelationshipsRequest {
    updates: Vec<RelationshipUpdate>,
}

#[derive(Debug, Serialize)]
struct OptionalRelation {
    relation: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireSubjectFilter {
    subject_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional_subject_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional_relation: Option<OptionalRelation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRelationshipFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional_resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional_relation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optional_subject_filter: Option<WireSubjectFilter>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Consistency {
    fully_consistent: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRelationshipsRequest {
    relationship_filter: WireRelationshipFilter,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadRelationshipsRequest {
    consistency: Consistency,
    relationship_filter: WireRelationshipFilter,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckPermissionRequest {
    consistency: Consistency,
    resource: ObjectReference,
    permission: String,
    subject: SubjectReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct CheckPermissionResponse {
    #[serde(default)]
    permissionship: String,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ReadResult {
    relationship: Relationship,
}

#[derive(Debug, Deserialize)]
struct ReadStreamLine {
    result: Option<ReadResult>,
    error: Option<StreamError>,
}

impl From<&ResourceRef> for ObjectReference {
    fn from(resource: &ResourceRef) -> Self {
        Self {
            object_type: resource.resource_type.as_str().to_string(),
            object_id: resource.id.clone(),
        }
    }
}

impl From<&SubjectRef> for SubjectReference {
    fn from(subject: &SubjectRef) -> Self {
        Self {
            object: ObjectReference {
                object_type: subject.subject_type.as_str().to_string(),
                object_id: subject.id.clone(),
            },
            optional_relation: subject
                .sub_relation
                .map(|relation| relation.as_str().to_string())
                .unwrap_or_default(),
        }
    }
}

impl From<&RelationshipTuple> for Relationship {
    fn from(tuple: &RelationshipTuple) -> Self {
        Self {
            resource: (&tuple.resource).into(),
            relation: tuple.relation.as_str().to_string(),
            subject: (&tuple.subject).into(),
            optional_caveat: tuple.caveat.as_ref().map(|caveat| ContextualizedCaveat {
                caveat_name: caveat.caveat_name.clone(),
                context: caveat
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect(),
            }),
            optional_expires_at: tuple.expires_at,
        }
    }
}

fn unexpected(what: &str, err: RebacError) -> RebacError {
    RebacError::EngineUnavailable(format!("unexpected {} in engine response: {}", what, err))
}

impl TryFrom<Relationship> for RelationshipTuple {
    type Error = RebacError;

    fn try_from(rel: Relationship) -> Result<Self, Self::Error> {
        let resource_type: ResourceType = rel
            .resource
            .object_type
            .parse()
            .map_err(|e| unexpected("resource type", e))?;
        let relation: Relation = rel.relation.parse().map_err(|e| unexpected("relation", e))?;
        let subject_type: SubjectType = rel
            .subject
            .object
            .object_type
            .parse()
            .map_err(|e| unexpected("subject type", e))?;
        let sub_relation = if rel.subject.optional_relation.is_empty() {
            None
        } else {
            Some(
                rel.subject
                    .optional_relation
                    .parse::<Relation>()
                    .map_err(|e| unexpected("sub-relation", e))?,
            )
        };

        let caveat = rel.optional_caveat.map(|caveat| CaveatContext {
            caveat_name: caveat.caveat_name,
            fields: caveat
                .context
                .into_iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => (k, s),
                    other => (k, other.to_string()),
                })
                .collect(),
        });

        Ok(RelationshipTuple {
            resource: ResourceRef::new(resource_type, rel.resource.object_id),
            relation,
            subject: SubjectRef {
                subject_type,
                id: rel.subject.object.object_id,
                sub_relation,
            },
            caveat,
            expires_at: rel.optional_expires_at,
        })
    }
}

impl From<SubjectFilter> for WireSubjectFilter {
    fn from(filter: SubjectFilter) -> Self {
        Self {
            subject_type: filter.subject_type.as_str().to_string(),
            optional_subject_id: filter.subject_id,
            optional_relation: match filter.sub_relation {
                SubRelationFilter::Any => None,
                SubRelationFilter::Exactly(relation) => Some(OptionalRelation {
                    relation: relation
                        .map(|r| r.as_str().to_string())
                        .unwrap_or_default(),
                }),
            },
        }
    }
}

impl From<RelationshipFilter> for WireRelationshipFilter {
    fn from(filter: RelationshipFilter) -> Self {
        Self {
            resource_type: filter.resource_type.map(|t| t.as_str().to_string()),
            optional_resource_id: filter.resource_id,
            optional_relation: filter.relation.map(|r| r.as_str().to_string()),
            optional_subject_filter: filter.subject.map(Into::into),
        }
    }
}

/// SpiceDB engine reached through its HTTP gateway
pub struct SpiceDbHttpEngine {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl SpiceDbHttpEngine {
    /// Create a transport from engine configuration
    ///
    /// `call_timeout_ms` bounds every request made by the client.
    pub fn new(config: &EngineConfig) -> Result<Self, RebacError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.call_timeout_ms))
            .build()
            .map_err(|e| RebacError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoint, path.trim_start_matches('/'))
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<String, RebacError> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            error!("SpiceDB {} failed with status {}", path, status);
            let message = serde_json::from_str::<StreamError>(&text)
                .map(|e| e.message)
                .unwrap_or_default();
            return Err(RebacError::EngineUnavailable(format!(
                "{} returned {}: {}",
                path, status, message
            )));
        }
        Ok(text)
    }
}

#[async_trait]
impl PermissionEngine for SpiceDbHttpEngine {
    async fn write_relationships(&self, tuples: Vec<RelationshipTuple>) -> Result<(), RebacError> {
        let request = WriteRelationshipsRequest {
            updates: tuples
                .iter()
                .map(|tuple| RelationshipUpdate {
                    operation: "OPERATION_TOUCH",
                    relationship: tuple.into(),
                })
                .collect(),
        };
        self.post("relationships/write", &request).await?;
        Ok(())
    }

    async fn delete_relationships(&self, filter: RelationshipFilter) -> Result<(), RebacError> {
        let request = DeleteRelationshipsRequest {
            relationship_filter: filter.into(),
        };
        self.post("relationships/delete", &request).await?;
        Ok(())
    }

    async fn read_relationships(
        &self,
        filter: RelationshipFilter,
    ) -> Result<Vec<RelationshipTuple>, RebacError> {
        let request = ReadRelationshipsRequest {
            consistency: Consistency {
                fully_consistent: true,
            },
            relationship_filter: filter.into(),
        };
        let body = self.post("relationships/read", &request).await?;

        let mut tuples = Vec::new();
        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let parsed: ReadStreamLine = serde_json::from_str(line).map_err(|e| {
                RebacError::EngineUnavailable(format!("malformed read stream: {}", e))
            })?;
            if let Some(err) = parsed.error {
                return Err(RebacError::EngineUnavailable(err.message));
            }
            if let Some(result) = parsed.result {
                tuples.push(result.relationship.try_into()?);
            }
        }
        debug!("SpiceDB read returned {} tuples", tuples.len());
        Ok(tuples)
    }

    async fn check_permission(&self, query: PermissionQuery) -> Result<bool, RebacError> {
        let request = CheckPermissionRequest {
            consistency: Consistency {
                fully_consistent: true,
            },
            resource: (&query.resource).into(),
            permission: query.permission.as_str().to_string(),
            subject: (&query.subject).into(),
            context: query.context,
        };
        let body = self.post("permissions/check", &request).await?;
        let response: CheckPermissionResponse = serde_json::from_str(&body).map_err(|e| {
            RebacError::EngineUnavailable(format!("malformed check response: {}", e))
        })?;

        // CONDITIONAL means caveat context was missing: treat as denied.
        Ok(response.permissionship == HAS_PERMISSION)
    }
}
