//! Group indirection
//!
//! A grant to a group is stored as a single tuple whose subject is the
//! group's member set (`group:<id>#member`). Membership is resolved by the
//! engine at check time, so adding or removing a member changes that
//! member's access everywhere without touching the granted resources.

use crate::{
    error::{RebacError, Result},
    gateway::AuthorizationGateway,
    models::*,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Writes and removes grants whose subject is a group's member set
#[derive(Clone)]
pub struct GroupManager {
    gateway: AuthorizationGateway,
}

impl GroupManager {
    pub fn new(gateway: AuthorizationGateway) -> Self {
        Self { gateway }
    }

    /// Grant `relation` on `resource` to every member of `group_id`
    pub async fn grant_to_group(
        &self,
        resource: &ResourceRef,
        relation: Relation,
        group_id: &str,
        conditions: GrantConditions,
    ) -> Result<()> {
        let tuple = RelationshipTuple::grant(
            resource.clone(),
            relation,
            SubjectRef::group_members(group_id),
        )?;
        info!("Granting {} on {} to group {}", relation, resource, group_id);
        self.gateway.write_relationship(conditions.apply(tuple)).await
    }

    /// Remove exactly the group-member grant; direct grants to individual
    /// members stay untouched.
    pub async fn revoke_from_group(
        &self,
        resource: &ResourceRef,
        relation: Relation,
        group_id: &str,
    ) -> Result<()> {
        if !relation.is_grantable() {
            return Err(RebacError::InvalidRequest(format!(
                "relation '{}' cannot be granted or revoked",
                relation
            )));
        }
        info!("Revoking {} on {} from group {}", relation, resource, group_id);
        self.gateway
            .delete_relationship(resource, relation, &SubjectRef::group_members(group_id))
            .await
    }
}

/// Body of a grant or revoke of group access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAccessRequest {
    pub group_id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub relation: Relation,
    pub requester_id: String,
    #[serde(default)]
    pub context: Option<CaveatValue>,
    #[serde(default)]
    pub days_from_now: Option<u32>,
}

impl GroupAccessRequest {
    pub fn resource(&self) -> ResourceRef {
        ResourceRef::new(self.resource_type, self.resource_id.clone())
    }
}

/// Group lifecycle, membership and group grants, gated on the requester's
/// own permissions
#[derive(Clone)]
pub struct GroupService {
    gateway: AuthorizationGateway,
    manager: GroupManager,
    caveats: CaveatPolicies,
}

impl GroupService {
    pub fn new(gateway: AuthorizationGateway, caveats: CaveatPolicies) -> Self {
        Self {
            manager: GroupManager::new(gateway.clone()),
            gateway,
            caveats,
        }
    }

    /// Create a group owned by the requester
    pub async fn create_group(&self, group_id: &str, requester_id: &str) -> Result<()> {
        let group = ResourceRef::group(group_id);
        group.validate()?;
        self.gateway.ensure_unowned(&group).await?;
        info!("Creating group {} for {}", group_id, requester_id);
        self.gateway
            .write_relationship(RelationshipTuple::new(
                group,
                Relation::Owner,
                SubjectRef::tenant(requester_id),
            ))
            .await
    }

    pub async fn add_member(&self, group_id: &str, member_id: &str, requester_id: &str) -> Result<()> {
        let group = ResourceRef::group(group_id);
        self.gateway
            .ensure_permission(
                &group,
                Permission::Write,
                &SubjectRef::tenant(requester_id),
                "Only group owner or editor can add members.",
            )
            .await?;

        self.gateway
            .write_relationship(RelationshipTuple::new(
                group,
                Relation::Member,
                SubjectRef::tenant(member_id),
            ))
            .await
    }

    /// Remove a member. An owner of the group cannot be removed this way;
    /// ownership moves through [`GroupService::transfer_ownership`].
    pub async fn remove_member(
        &self,
        group_id: &str,
        member_id: &str,
        requester_id: &str,
    ) -> Result<()> {
        let group = ResourceRef::group(group_id);
        let member = SubjectRef::tenant(member_id);
        self.gateway
            .ensure_permission(
                &group,
                Permission::Write,
                &SubjectRef::tenant(requester_id),
                "Only group owner or editor can remove members.",
            )
            .await?;

        let owns = self
            .gateway
            .check_permission(PermissionQuery::new(
                group.clone(),
                Permission::Delete,
                member.clone(),
            ))
            .await?;
        if owns {
            return Err(RebacError::InvalidRequest(
                "Cannot remove group owner.".to_string(),
            ));
        }

        self.gateway
            .delete_relationship(&group, Relation::Member, &member)
            .await
    }

    /// Grant a relation on a resource to all members of a group
    pub async fn grant_group_access(&self, request: &GroupAccessRequest) -> Result<()> {
        let resource = request.resource();
        if !request.relation.is_grantable() {
            return Err(RebacError::InvalidRequest(
                "Owner relation cannot be granted.".to_string(),
            ));
        }
        self.authorize_group_access(request, &resource, Permission::Grant)
            .await?;

        let conditions = GrantConditions::from_request(
            &self.caveats,
            request.context.as_ref(),
            request.days_from_now,
        )?;
        self.manager
            .grant_to_group(&resource, request.relation, &request.group_id, conditions)
            .await
    }

    pub async fn revoke_group_access(&self, request: &GroupAccessRequest) -> Result<()> {
        let resource = request.resource();
        if !request.relation.is_grantable() {
            return Err(RebacError::InvalidRequest(
                "Owner relation cannot be revoked.".to_string(),
            ));
        }
        self.authorize_group_access(request, &resource, Permission::Revoke)
            .await?;

        self.manager
            .revoke_from_group(&resource, request.relation, &request.group_id)
            .await
    }

    async fn authorize_group_access(
        &self,
        request: &GroupAccessRequest,
        resource: &ResourceRef,
        permission: Permission,
    ) -> Result<()> {
        let requester = SubjectRef::tenant(request.requester_id.as_str());
        self.gateway
            .ensure_permission(
                &ResourceRef::group(request.group_id.as_str()),
                Permission::Write,
                &requester,
                "Only group owner or editor can manage group access.",
            )
            .await?;
        self.gateway
            .ensure_permission(
                resource,
                permission,
                &requester,
                &format!("Subject does not have {} permission.", permission),
            )
            .await
    }

    /// Delete a group and every tuple it is the source of. Grants that name
    /// the group's member set resolve to nobody afterwards.
    pub async fn delete_group(&self, group_id: &str, requester_id: &str) -> Result<()> {
        let group = ResourceRef::group(group_id);
        self.gateway
            .ensure_permission(
                &group,
                Permission::Delete,
                &SubjectRef::tenant(requester_id),
                "Only group owner can delete the group.",
            )
            .await?;
        self.gateway.delete_all_relationships(&group).await
    }

    /// Make `new_owner_id` the owner, then drop the requester's ownership
    pub async fn transfer_ownership(
        &self,
        group_id: &str,
        new_owner_id: &str,
        requester_id: &str,
    ) -> Result<()> {
        let group = ResourceRef::group(group_id);
        let requester = SubjectRef::tenant(requester_id);
        self.gateway
            .ensure_permission(
                &group,
                Permission::Delete,
                &requester,
                "Only group owner can transfer ownership.",
            )
            .await?;

        self.gateway
            .write_relationship(RelationshipTuple::new(
                group.clone(),
                Relation::Owner,
                SubjectRef::tenant(new_owner_id),
            ))
            .await?;
        if new_owner_id != requester_id {
            self.gateway
                .delete_relationship(&group, Relation::Owner, &requester)
                .await?;
        }
        info!("Transferred group {} from {} to {}", group_id, requester_id, new_owner_id);
        Ok(())
    }

    /// Ids of the group's direct members
    pub async fn list_members(&self, group_id: &str, requester_id: &str) -> Result<Vec<String>> {
        let group = ResourceRef::group(group_id);
        self.gateway
            .ensure_permission(
                &group,
                Permission::Read,
                &SubjectRef::tenant(requester_id),
                "Subject does not have read permission.",
            )
            .await?;

        Ok(self
            .gateway
            .read_outgoing(&group, Relation::Member)
            .await?
            .into_iter()
            .filter(|tuple| tuple.subject.subject_type == SubjectType::Tenant)
            .map(|tuple| tuple.subject.id)
            .collect())
    }
}
