use crate::{
    error::{RebacError, Result},
    gateway::AuthorizationGateway,
    hierarchy::{HierarchyEngine, HierarchyResponse},
    models::*,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceRequest {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub requester_id: String,
    #[serde(default)]
    pub parent_resource_type: Option<ResourceType>,
    #[serde(default)]
    pub parent_resource_id: Option<String>,
}

impl CreateResourceRequest {
    pub fn resource(&self) -> ResourceRef {
        ResourceRef::new(self.resource_type, self.resource_id.clone())
    }

    /// The parent is linked only when both its type and a non-blank id are given
    pub fn parent(&self) -> Option<ResourceRef> {
        match (self.parent_resource_type, self.parent_resource_id.as_deref()) {
            (Some(parent_type), Some(id)) if !id.trim().is_empty() => {
                Some(ResourceRef::new(parent_type, id))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionCheckRequest {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub permission: Permission,
    pub requester_id: String,
    #[serde(default)]
    pub context: Option<CaveatValue>,
}

/// Grant or revoke of a relation for another tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub relation: Relation,
    pub requester_id: String,
    pub target_subject_id: String,
    #[serde(default)]
    pub context: Option<CaveatValue>,
    #[serde(default)]
    pub days_from_now: Option<u32>,
}

impl AccessRequest {
    pub fn resource(&self) -> ResourceRef {
        ResourceRef::new(self.resource_type, self.resource_id.clone())
    }
}

/// Resource lifecycle, direct grants and hierarchy queries
#[derive(Clone)]
pub struct ResourceService {
    gateway: AuthorizationGateway,
    hierarchy: Arc<HierarchyEngine>,
    caveats: CaveatPolicies,
}

impl ResourceService {
    pub fn new(
        gateway: AuthorizationGateway,
        hierarchy: Arc<HierarchyEngine>,
        caveats: CaveatPolicies,
    ) -> Self {
        Self {
            gateway,
            hierarchy,
            caveats,
        }
    }

    /// Record the requester as owner, and link the parent if one is given.
    /// An object that already has an owner cannot be created again.
    pub async fn create_resource(&self, request: &CreateResourceRequest) -> Result<()> {
        let resource = request.resource();
        let parent = request.parent();
        resource.validate()?;
        if let Some(parent) = &parent {
            parent.validate()?;
        }
        self.gateway.ensure_unowned(&resource).await?;

        info!("Creating {} for {}", resource, request.requester_id);
        let mut tuples = vec![RelationshipTuple::new(
            resource.clone(),
            Relation::Owner,
            SubjectRef::tenant(request.requester_id.as_str()),
        )];
        if let Some(parent) = parent {
            tuples.push(RelationshipTuple::new(
                resource,
                Relation::Parent,
                SubjectRef::from(&parent),
            ));
        }
        self.gateway.write_relationships(tuples).await
    }

    pub async fn check_permission(&self, request: &PermissionCheckRequest) -> Result<bool> {
        let mut query = PermissionQuery::new(
            ResourceRef::new(request.resource_type, request.resource_id.as_str()),
            request.permission,
            SubjectRef::tenant(request.requester_id.as_str()),
        );
        if let Some(context) = &request.context {
            query = query.with_context(context.supplied(&self.caveats)?);
        }
        self.gateway.check_permission(query).await
    }

    pub async fn delete_resource(&self, resource: &ResourceRef, requester_id: &str) -> Result<()> {
        self.gateway
            .ensure_permission(
                resource,
                Permission::Delete,
                &SubjectRef::tenant(requester_id),
                "Subject does not have delete permission.",
            )
            .await?;
        self.gateway.delete_all_relationships(resource).await
    }

    pub async fn grant_permission(&self, request: &AccessRequest) -> Result<()> {
        let resource = request.resource();
        let tuple = RelationshipTuple::grant(
            resource.clone(),
            request.relation,
            SubjectRef::tenant(request.target_subject_id.as_str()),
        )?;
        let conditions = GrantConditions::from_request(
            &self.caveats,
            request.context.as_ref(),
            request.days_from_now,
        )?;

        self.gateway
            .ensure_permission(
                &resource,
                Permission::Grant,
                &SubjectRef::tenant(request.requester_id.as_str()),
                "Subject does not have grant permission.",
            )
            .await?;
        self.gateway.write_relationship(conditions.apply(tuple)).await
    }

    pub async fn revoke_permission(&self, request: &AccessRequest) -> Result<()> {
        let resource = request.resource();
        if !request.relation.is_grantable() {
            return Err(RebacError::InvalidRequest(format!(
                "relation '{}' cannot be granted or revoked",
                request.relation
            )));
        }

        self.gateway
            .ensure_permission(
                &resource,
                Permission::Revoke,
                &SubjectRef::tenant(request.requester_id.as_str()),
                "Subject does not have revoke permission.",
            )
            .await?;
        self.gateway
            .delete_relationship(
                &resource,
                request.relation,
                &SubjectRef::tenant(request.target_subject_id.as_str()),
            )
            .await
    }

    pub async fn hierarchy(
        &self,
        resource: &ResourceRef,
        requester_id: &str,
    ) -> Result<HierarchyResponse> {
        self.hierarchy
            .compute_hierarchy(resource, &SubjectRef::tenant(requester_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HierarchyConfig;
    use crate::engine::{MockPermissionEngine, RelationshipFilter};
    use std::time::Duration;

    fn service(engine: MockPermissionEngine) -> ResourceService {
        let gateway = AuthorizationGateway::new(Arc::new(engine), Duration::from_secs(1));
        let hierarchy = Arc::new(HierarchyEngine::new(gateway.clone(), HierarchyConfig::default()));
        ResourceService::new(gateway, hierarchy, CaveatPolicies::new(CaveatPolicy::builtin()))
    }

    fn access(relation: Relation) -> AccessRequest {
        AccessRequest {
            resource_type: ResourceType::File,
            resource_id: "f1".to_string(),
            relation,
            requester_id: "alice".to_string(),
            target_subject_id: "bob".to_string(),
            context: None,
            days_from_now: None,
        }
    }

    #[test]
    fn test_parent_requires_type_and_id() {
        let request: CreateResourceRequest = serde_json::from_value(serde_json::json!({
            "resourceType": "file",
            "resourceId": "f1",
            "requesterId": "alice",
            "parentResourceType": "folder",
            "parentResourceId": "  "
        }))
        .unwrap();
        assert_eq!(request.parent(), None);
    }

    #[tokio::test]
    async fn test_create_writes_owner_and_parent_together() {
        let mut engine = MockPermissionEngine::new();
        engine
            .expect_read_relationships()
            .withf(|filter: &RelationshipFilter| filter.relation == Some(Relation::Owner))
            .times(1)
            .returning(|_| Ok(Vec::new()));
        engine
            .expect_write_relationships()
            .withf(|tuples: &Vec<RelationshipTuple>| {
                tuples.len() == 2
                    && tuples[0].relation == Relation::Owner
                    && tuples[1].relation == Relation::Parent
                    && tuples[1].subject == SubjectRef::from(&ResourceRef::folder("d1"))
            })
            .times(1)
            .returning(|_| Ok(()));

        let request = CreateResourceRequest {
            resource_type: ResourceType::File,
            resource_id: "f1".to_string(),
            requester_id: "alice".to_string(),
            parent_resource_type: Some(ResourceType::Folder),
            parent_resource_id: Some("d1".to_string()),
        };
        service(engine).create_resource(&request).await.unwrap();
    }

    #[tokio::test]
    async fn test_owner_grant_rejected_before_engine() {
        let mut engine = MockPermissionEngine::new();
        engine.expect_check_permission().times(0);
        engine.expect_write_relationships().times(0);
        engine.expect_delete_relationships().times(0);

        let resources = service(engine);
        let err = resources.grant_permission(&access(Relation::Owner)).await.unwrap_err();
        assert!(matches!(err, RebacError::InvalidRequest(_)));
        let err = resources.revoke_permission(&access(Relation::Owner)).await.unwrap_err();
        assert!(matches!(err, RebacError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_grant_denied_without_grant_permission() {
        let mut engine = MockPermissionEngine::new();
        engine
            .expect_check_permission()
            .withf(|query: &PermissionQuery| query.permission == Permission::Grant)
            .times(1)
            .returning(|_| Ok(false));
        engine.expect_write_relationships().times(0);

        let err = service(engine)
            .grant_permission(&access(Relation::Viewer))
            .await
            .unwrap_err();
        assert!(matches!(err, RebacError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_check_passes_supplied_context() {
        let mut engine = MockPermissionEngine::new();
        engine
            .expect_check_permission()
            .withf(|query: &PermissionQuery| {
                query
                    .context
                    .as_ref()
                    .and_then(|c| c.get("supplied_ip"))
                    .map(String::as_str)
                    == Some("10.0.0.1")
            })
            .times(1)
            .returning(|_| Ok(true));

        let request = PermissionCheckRequest {
            resource_type: ResourceType::File,
            resource_id: "f1".to_string(),
            permission: Permission::Read,
            requester_id: "bob".to_string(),
            context: Some(CaveatValue::new("ip_allowlist", "10.0.0.1")),
        };
        assert!(service(engine).check_permission(&request).await.unwrap());
    }
}
