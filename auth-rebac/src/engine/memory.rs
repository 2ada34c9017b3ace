use super::{PermissionEngine, RelationshipFilter};
use crate::{error::RebacError, models::*};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// In-memory engine for testing and local development.
///
/// Resolves permissions with a fixed table that mirrors `schema/gateway.zed`:
///
/// | permission | relations                                 |
/// |------------|-------------------------------------------|
/// | read       | owner, editor, viewer (+ member on group) |
/// | write      | owner, editor                             |
/// | delete     | owner                                     |
/// | grant      | owner                                     |
/// | revoke     | owner                                     |
///
/// Files and folders also inherit every permission from their `parent`;
/// groups and dataverses have no parent.
///
/// A subject with a sub-relation (`group:g#member`) stands for every subject
/// holding that relation on the named object.
pub struct InMemoryEngine {
    tuples: Arc<DashMap<String, (u64, RelationshipTuple)>>,
    sequence: AtomicU64,
    policies: HashMap<String, CaveatPolicy>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::with_policies(CaveatPolicy::builtin())
    }

    pub fn with_policies(policies: Vec<CaveatPolicy>) -> Self {
        Self {
            tuples: Arc::new(DashMap::new()),
            sequence: AtomicU64::new(0),
            policies: policies
                .into_iter()
                .map(|policy| (policy.name.clone(), policy))
                .collect(),
        }
    }

    /// Number of stored tuples, expired ones included.
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    fn relations_for(resource_type: ResourceType, permission: Permission) -> &'static [Relation] {
        match permission {
            Permission::Read if resource_type == ResourceType::Group => &[
                Relation::Owner,
                Relation::Editor,
                Relation::Viewer,
                Relation::Member,
            ],
            Permission::Read => &[Relation::Owner, Relation::Editor, Relation::Viewer],
            Permission::Write => &[Relation::Owner, Relation::Editor],
            Permission::Delete | Permission::Grant | Permission::Revoke => &[Relation::Owner],
        }
    }

    fn inherits_from_parent(resource_type: ResourceType) -> bool {
        matches!(resource_type, ResourceType::File | ResourceType::Folder)
    }

    /// Live tuples matching the filter, in first-write order.
    fn live(&self, filter: &RelationshipFilter, now: DateTime<Utc>) -> Vec<RelationshipTuple> {
        let mut found: Vec<(u64, RelationshipTuple)> = self
            .tuples
            .iter()
            .filter(|entry| {
                let (_, tuple) = entry.value();
                !tuple.is_expired(now) && filter.matches(tuple)
            })
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|(sequence, _)| *sequence);
        found.into_iter().map(|(_, tuple)| tuple).collect()
    }

    fn caveat_satisfied(
        &self,
        caveat: &CaveatContext,
        context: Option<&HashMap<String, String>>,
    ) -> bool {
        let Some(policy) = self.policies.get(&caveat.caveat_name) else {
            return false;
        };
        let allowed = caveat.fields.get(&policy.allowed_key);
        let supplied = context.and_then(|ctx| ctx.get(&policy.supplied_key));
        matches!((allowed, supplied), (Some(a), Some(s)) if a == s)
    }

    fn subject_matches(
        &self,
        candidate: &SubjectRef,
        subject: &SubjectRef,
        context: Option<&HashMap<String, String>>,
        now: DateTime<Utc>,
        visited: &mut HashSet<String>,
    ) -> bool {
        match candidate.sub_relation {
            None => candidate.subject_type == subject.subject_type && candidate.id == subject.id,
            Some(relation) => {
                if candidate == subject {
                    return true;
                }
                match candidate.as_resource() {
                    Some(set_owner) => {
                        self.holds(&set_owner, &[relation], None, subject, context, now, visited)
                    }
                    None => false,
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn holds(
        &self,
        resource: &ResourceRef,
        relations: &[Relation],
        inherit: Option<Permission>,
        subject: &SubjectRef,
        context: Option<&HashMap<String, String>>,
        now: DateTime<Utc>,
        visited: &mut HashSet<String>,
    ) -> bool {
        let visit_key = format!("{}|{:?}|{:?}", resource.key(), relations, inherit);
        if !visited.insert(visit_key) {
            return false;
        }

        let edges = self.live(&RelationshipFilter::for_resource(resource), now);

        for tuple in edges.iter().filter(|t| relations.contains(&t.relation)) {
            if let Some(ref caveat) = tuple.caveat {
                if !self.caveat_satisfied(caveat, context) {
                    continue;
                }
            }
            if self.subject_matches(&tuple.subject, subject, context, now, visited) {
                return true;
            }
        }

        let inherit = inherit.filter(|_| Self::inherits_from_parent(resource.resource_type));
        if let Some(permission) = inherit {
            for tuple in edges.iter().filter(|t| t.relation == Relation::Parent) {
                if let Some(parent) = tuple.subject.as_resource() {
                    if self.holds(
                        &parent,
                        Self::relations_for(parent.resource_type, permission),
                        Some(permission),
                        subject,
                        context,
                        now,
                        visited,
                    ) {
                        return true;
                    }
                }
            }
        }

        false
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionEngine for InMemoryEngine {
    async fn write_relationships(&self, tuples: Vec<RelationshipTuple>) -> Result<(), RebacError> {
        for tuple in tuples {
            let key = tuple.key();
            let sequence = self
                .tuples
                .get(&key)
                .map(|existing| existing.value().0)
                .unwrap_or_else(|| self.sequence.fetch_add(1, Ordering::Relaxed));
            self.tuples.insert(key, (sequence, tuple));
        }
        Ok(())
    }

    async fn delete_relationships(&self, filter: RelationshipFilter) -> Result<(), RebacError> {
        self.tuples.retain(|_, (_, tuple)| !filter.matches(tuple));
        Ok(())
    }

    async fn read_relationships(
        &self,
        filter: RelationshipFilter,
    ) -> Result<Vec<RelationshipTuple>, RebacError> {
        Ok(self.live(&filter, Utc::now()))
    }

    async fn check_permission(&self, query: PermissionQuery) -> Result<bool, RebacError> {
        let mut visited = HashSet::new();
        let allowed = self.holds(
            &query.resource,
            Self::relations_for(query.resource.resource_type, query.permission),
            Some(query.permission),
            &query.subject,
            query.context.as_ref(),
            Utc::now(),
            &mut visited,
        );
        debug!(
            "In-memory check {} {} {} -> {}",
            query.subject, query.permission, query.resource, allowed
        );
        Ok(allowed)
    }
}
