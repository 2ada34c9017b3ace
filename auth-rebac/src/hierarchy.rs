//! Ancestor/descendant traversal over `parent` edges.
//!
//! Both passes walk the graph depth-first with an explicit stack. A node is
//! expanded (its edges read) at most once per pass, tracked by a
//! [`VisitedSet`] keyed by `type:id`. Edges leading to an already expanded
//! node are still reported, but not followed; when several paths reach the
//! same node only the first one discovered is expanded.

use crate::{
    config::HierarchyConfig,
    error::{RebacError, Result},
    gateway::AuthorizationGateway,
    models::*,
    summary::HierarchySummary,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use std::vec::IntoIter;
use tracing::{debug, info, warn};

/// Nodes already expanded in one traversal pass
#[derive(Debug, Default, Clone)]
pub struct VisitedSet {
    keys: HashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the node was not yet present.
    pub fn insert(&mut self, resource: &ResourceRef) -> bool {
        self.keys.insert(resource.key())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Node-count and wall-clock limits shared by the passes of one query
#[derive(Debug)]
pub struct TraversalBudget {
    started: Instant,
    deadline: Duration,
    max_nodes: usize,
    expanded: usize,
}

impl TraversalBudget {
    pub fn new(max_nodes: usize, deadline: Duration) -> Self {
        Self {
            started: Instant::now(),
            deadline,
            max_nodes,
            expanded: 0,
        }
    }

    pub fn from_config(config: &HierarchyConfig) -> Self {
        Self::new(config.max_nodes, config.deadline())
    }

    pub fn expanded(&self) -> usize {
        self.expanded
    }

    fn check_deadline(&self) -> Result<()> {
        if self.started.elapsed() > self.deadline {
            return Err(RebacError::LimitExceeded(format!(
                "hierarchy traversal exceeded {:?}",
                self.deadline
            )));
        }
        Ok(())
    }

    fn expand(&mut self) -> Result<()> {
        if self.expanded >= self.max_nodes {
            return Err(RebacError::LimitExceeded(format!(
                "hierarchy traversal exceeded {} nodes",
                self.max_nodes
            )));
        }
        self.expanded += 1;
        self.check_deadline()
    }
}

/// Result of a hierarchy query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyResponse {
    pub resource: ResourceRef,
    pub relations: Vec<HierarchyRelation>,
    pub summary: HierarchySummary,
}

impl HierarchyResponse {
    pub fn parents(&self) -> impl Iterator<Item = &HierarchyRelation> {
        self.relations
            .iter()
            .filter(|r| r.relation == HierarchyDirection::Parent)
    }

    pub fn children(&self) -> impl Iterator<Item = &HierarchyRelation> {
        self.relations
            .iter()
            .filter(|r| r.relation == HierarchyDirection::Child)
    }
}

struct Frame {
    level: u32,
    pending: IntoIter<ResourceRef>,
}

/// Computes permission-filtered ancestors and descendants of a resource
pub struct HierarchyEngine {
    gateway: AuthorizationGateway,
    config: HierarchyConfig,
}

impl HierarchyEngine {
    pub fn new(gateway: AuthorizationGateway, config: HierarchyConfig) -> Self {
        Self { gateway, config }
    }

    /// Every ancestor, and every descendant `requester` can read.
    ///
    /// Fails with [`RebacError::Forbidden`] before any traversal when the
    /// requester cannot read `resource` itself.
    pub async fn compute_hierarchy(
        &self,
        resource: &ResourceRef,
        requester: &SubjectRef,
    ) -> Result<HierarchyResponse> {
        info!("Getting complete hierarchy for {}", resource);

        let query = PermissionQuery::new(resource.clone(), Permission::Read, requester.clone());
        if !self.gateway.check_permission(query).await? {
            return Err(RebacError::Forbidden(
                "Subject does not have read permission.".to_string(),
            ));
        }

        let mut budget = TraversalBudget::from_config(&self.config);

        let mut relations = self
            .traverse_parents(resource, &mut VisitedSet::new(), &mut budget)
            .await?;
        relations.extend(
            self.traverse_children(resource, requester, &mut VisitedSet::new(), &mut budget)
                .await?,
        );

        let summary = HierarchySummary::from_relations(&relations);
        debug!(
            "Hierarchy for {}: {} relations, {} nodes expanded",
            resource,
            summary.total_relations,
            budget.expanded()
        );

        Ok(HierarchyResponse {
            resource: resource.clone(),
            relations,
            summary,
        })
    }

    /// Ancestors of `start`, nearest first along each branch.
    pub async fn traverse_parents(
        &self,
        start: &ResourceRef,
        visited: &mut VisitedSet,
        budget: &mut TraversalBudget,
    ) -> Result<Vec<HierarchyRelation>> {
        let mut relations = Vec::new();
        if !visited.insert(start) {
            return Ok(relations);
        }
        budget.expand()?;

        let mut stack = vec![Frame {
            level: 1,
            pending: self.parents_of(start, budget).await?.into_iter(),
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(parent) = frame.pending.next() else {
                stack.pop();
                continue;
            };
            let level = frame.level;

            relations.push(HierarchyRelation::new(
                HierarchyDirection::Parent,
                parent.clone(),
                level,
            ));

            if visited.insert(&parent) {
                budget.expand()?;
                let pending = self.parents_of(&parent, budget).await?.into_iter();
                stack.push(Frame {
                    level: level + 1,
                    pending,
                });
            }
        }

        Ok(relations)
    }

    /// Descendants of `start` the requester may read; a denied child hides
    /// its whole subtree.
    pub async fn traverse_children(
        &self,
        start: &ResourceRef,
        requester: &SubjectRef,
        visited: &mut VisitedSet,
        budget: &mut TraversalBudget,
    ) -> Result<Vec<HierarchyRelation>> {
        let mut relations = Vec::new();
        if !visited.insert(start) {
            return Ok(relations);
        }
        budget.expand()?;

        let mut stack = vec![Frame {
            level: 1,
            pending: self.readable_children_of(start, requester, budget).await?.into_iter(),
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(child) = frame.pending.next() else {
                stack.pop();
                continue;
            };
            let level = frame.level;

            relations.push(HierarchyRelation::new(
                HierarchyDirection::Child,
                child.clone(),
                level,
            ));

            if visited.insert(&child) {
                budget.expand()?;
                let pending = self
                    .readable_children_of(&child, requester, budget)
                    .await?
                    .into_iter();
                stack.push(Frame {
                    level: level + 1,
                    pending,
                });
            }
        }

        Ok(relations)
    }

    async fn parents_of(
        &self,
        resource: &ResourceRef,
        budget: &TraversalBudget,
    ) -> Result<Vec<ResourceRef>> {
        if resource.resource_type == self.config.root_resource_type {
            return Ok(Vec::new());
        }
        budget.check_deadline()?;

        let tuples = self.gateway.read_outgoing(resource, Relation::Parent).await?;
        Ok(tuples
            .into_iter()
            .filter_map(|tuple| {
                let parent = tuple.subject.as_resource();
                if parent.is_none() {
                    warn!("Ignoring parent edge to non-resource subject: {}", tuple);
                }
                parent
            })
            .collect())
    }

    async fn readable_children_of(
        &self,
        resource: &ResourceRef,
        requester: &SubjectRef,
        budget: &TraversalBudget,
    ) -> Result<Vec<ResourceRef>> {
        budget.check_deadline()?;

        let candidates: Vec<ResourceRef> = self
            .gateway
            .read_incoming(resource, Relation::Parent)
            .await?
            .into_iter()
            .map(|tuple| tuple.resource)
            .collect();

        budget.check_deadline()?;

        let checked: Vec<(ResourceRef, bool)> = stream::iter(candidates)
            .map(move |candidate| async move {
                let query =
                    PermissionQuery::new(candidate.clone(), Permission::Read, requester.clone());
                let allowed = self.gateway.check_permission(query).await?;
                Ok::<_, RebacError>((candidate, allowed))
            })
            .buffered(self.config.check_concurrency.max(1))
            .try_collect()
            .await?;

        Ok(checked
            .into_iter()
            .filter_map(|(candidate, allowed)| {
                if !allowed {
                    debug!("Pruning unreadable child {} of {}", candidate, resource);
                }
                allowed.then_some(candidate)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockPermissionEngine, RelationshipFilter};
    use std::sync::Arc;

    fn parent_edge(child: &ResourceRef, parent: &ResourceRef) -> RelationshipTuple {
        RelationshipTuple::new(child.clone(), Relation::Parent, SubjectRef::from(parent))
    }

    #[tokio::test]
    async fn test_root_type_never_reads_upward() {
        let a = ResourceRef::file("a");
        let b = ResourceRef::folder("b");
        let c = ResourceRef::dataverse("c");

        let mut engine = MockPermissionEngine::new();
        let (a2, b2, c2) = (a.clone(), b.clone(), c.clone());
        engine
            .expect_read_relationships()
            .returning(move |filter: RelationshipFilter| {
                assert_ne!(filter.resource_type, Some(ResourceType::Dataverse));
                let edges = [parent_edge(&a2, &b2), parent_edge(&b2, &c2), parent_edge(&c2, &a2)];
                Ok(edges.into_iter().filter(|t| filter.matches(t)).collect())
            });

        let gateway = AuthorizationGateway::new(Arc::new(engine), Duration::from_secs(1));
        let hierarchy = HierarchyEngine::new(gateway, HierarchyConfig::default());

        let mut budget = TraversalBudget::new(100, Duration::from_secs(5));
        let parents = hierarchy
            .traverse_parents(&a, &mut VisitedSet::new(), &mut budget)
            .await
            .unwrap();

        assert_eq!(
            parents,
            vec![
                HierarchyRelation::new(HierarchyDirection::Parent, b, 1),
                HierarchyRelation::new(HierarchyDirection::Parent, c, 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_node_cap_is_enforced() {
        let mut engine = MockPermissionEngine::new();
        engine.expect_read_relationships().returning(|filter: RelationshipFilter| {
            // an endless chain: folder:n -> folder:n+1
            let id: u64 = filter.resource_id.as_deref().unwrap_or("0").parse().unwrap_or(0);
            let child = ResourceRef::folder(id.to_string());
            let parent = ResourceRef::folder((id + 1).to_string());
            Ok(vec![parent_edge(&child, &parent)])
        });

        let gateway = AuthorizationGateway::new(Arc::new(engine), Duration::from_secs(1));
        let hierarchy = HierarchyEngine::new(gateway, HierarchyConfig::default());

        let mut budget = TraversalBudget::new(5, Duration::from_secs(5));
        let err = hierarchy
            .traverse_parents(&ResourceRef::folder("0"), &mut VisitedSet::new(), &mut budget)
            .await
            .unwrap_err();

        assert!(matches!(err, RebacError::LimitExceeded(_)));
        assert_eq!(budget.expanded(), 5);
    }

    #[test]
    fn test_visited_set_is_keyed_by_type_and_id() {
        let mut visited = VisitedSet::new();
        assert!(visited.insert(&ResourceRef::file("x")));
        assert!(visited.insert(&ResourceRef::folder("x")));
        assert!(!visited.insert(&ResourceRef::file("x")));
        assert_eq!(visited.len(), 2);
    }
}
