#![allow(dead_code)]

use async_trait::async_trait;
use auth_rebac::{
    CreateResourceRequest, GatewayConfig, InMemoryEngine, PermissionEngine, PermissionQuery,
    RebacError, RebacServices, Relation, RelationshipFilter, RelationshipTuple, ResourceRef,
    ResourceType,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Wraps the in-memory engine, counting `parent` reads per queried node and
/// denying checks on selected resources regardless of stored tuples. Reads
/// can be slowed down to exercise timeouts.
#[derive(Default)]
pub struct ObservedEngine {
    inner: InMemoryEngine,
    reads: Mutex<HashMap<String, usize>>,
    denied: Mutex<HashSet<String>>,
    read_delay: Mutex<Option<Duration>>,
}

impl ObservedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, resource: &ResourceRef) {
        self.denied.lock().unwrap().insert(resource.key());
    }

    /// Delay every later read by `delay`
    pub fn slow_reads(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    /// `parent` reads issued with `resource` as source or as subject
    pub fn reads_of(&self, resource: &ResourceRef) -> usize {
        self.reads
            .lock()
            .unwrap()
            .get(&resource.key())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_reads(&self) -> usize {
        self.reads.lock().unwrap().values().sum()
    }

    pub fn stored(&self) -> usize {
        self.inner.len()
    }

    fn queried_node(filter: &RelationshipFilter) -> Option<String> {
        if filter.relation != Some(Relation::Parent) {
            return None;
        }
        match (&filter.resource_type, &filter.resource_id, &filter.subject) {
            (Some(resource_type), Some(id), _) => Some(format!("{}:{}", resource_type, id)),
            (_, _, Some(subject)) => subject
                .subject_id
                .as_ref()
                .map(|id| format!("{}:{}", subject.subject_type, id)),
            _ => None,
        }
    }
}

#[async_trait]
impl PermissionEngine for ObservedEngine {
    async fn write_relationships(&self, tuples: Vec<RelationshipTuple>) -> Result<(), RebacError> {
        self.inner.write_relationships(tuples).await
    }

    async fn delete_relationships(&self, filter: RelationshipFilter) -> Result<(), RebacError> {
        self.inner.delete_relationships(filter).await
    }

    async fn read_relationships(
        &self,
        filter: RelationshipFilter,
    ) -> Result<Vec<RelationshipTuple>, RebacError> {
        if let Some(node) = Self::queried_node(&filter) {
            *self.reads.lock().unwrap().entry(node).or_default() += 1;
        }
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.read_relationships(filter).await
    }

    async fn check_permission(&self, query: PermissionQuery) -> Result<bool, RebacError> {
        if self.denied.lock().unwrap().contains(&query.resource.key()) {
            return Ok(false);
        }
        self.inner.check_permission(query).await
    }
}

pub fn services(engine: Arc<ObservedEngine>) -> RebacServices {
    services_with(engine, &GatewayConfig::default())
}

pub fn services_with(engine: Arc<ObservedEngine>, config: &GatewayConfig) -> RebacServices {
    RebacServices::new(engine, config)
}

pub fn create_request(
    resource: &ResourceRef,
    owner: &str,
    parent: Option<&ResourceRef>,
) -> CreateResourceRequest {
    CreateResourceRequest {
        resource_type: resource.resource_type,
        resource_id: resource.id.clone(),
        requester_id: owner.to_string(),
        parent_resource_type: parent.map(|p| p.resource_type),
        parent_resource_id: parent.map(|p| p.id.clone()),
    }
}

/// Create `resource` owned by `owner`, linked under `parent`
pub async fn create(
    services: &RebacServices,
    resource: &ResourceRef,
    owner: &str,
    parent: Option<&ResourceRef>,
) {
    services
        .resources
        .create_resource(&create_request(resource, owner, parent))
        .await
        .unwrap();
}

pub fn ids(resources: impl Iterator<Item = ResourceRef>) -> Vec<String> {
    resources.map(|r| r.id).collect()
}

pub fn is_type(resource: &ResourceRef, resource_type: ResourceType) -> bool {
    resource.resource_type == resource_type
}
