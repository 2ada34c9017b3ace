use crate::{
    engine::{PermissionEngine, RelationshipFilter, SubjectFilter},
    error::{RebacError, Result},
    models::*,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Translates tuple-model operations into the engine's four primitives.
///
/// The gateway holds no authorization state of its own and never retries;
/// any transport failure or elapsed call timeout surfaces as
/// [`RebacError::EngineUnavailable`].
#[derive(Clone)]
pub struct AuthorizationGateway {
    engine: Arc<dyn PermissionEngine>,
    call_timeout: Duration,
}

impl AuthorizationGateway {
    pub fn new(engine: Arc<dyn PermissionEngine>, call_timeout: Duration) -> Self {
        Self {
            engine,
            call_timeout,
        }
    }

    async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(RebacError::EngineUnavailable(message))) => {
                Err(RebacError::EngineUnavailable(message))
            }
            Ok(Err(other)) => Err(RebacError::EngineUnavailable(format!(
                "{} failed: {}",
                operation, other
            ))),
            Err(_) => Err(RebacError::EngineUnavailable(format!(
                "{} timed out after {:?}",
                operation, self.call_timeout
            ))),
        }
    }

    /// Upsert a tuple, with its caveat and expiry if set
    pub async fn write_relationship(&self, tuple: RelationshipTuple) -> Result<()> {
        self.write_relationships(vec![tuple]).await
    }

    /// Upsert several tuples in one engine request; either all are written
    /// or none are.
    pub async fn write_relationships(&self, tuples: Vec<RelationshipTuple>) -> Result<()> {
        for tuple in &tuples {
            tuple.validate()?;
            info!(
                tuple = %tuple,
                caveat = tuple.caveat.as_ref().map(|c| c.caveat_name.as_str()),
                expires_at = ?tuple.expires_at,
                "Writing relationship"
            );
        }
        self.call("write", self.engine.write_relationships(tuples))
            .await
    }

    /// Remove every tuple whose source is `resource`
    pub async fn delete_all_relationships(&self, resource: &ResourceRef) -> Result<()> {
        resource.validate()?;
        info!(resource = %resource, "Deleting all relationships");
        self.call(
            "delete",
            self.engine
                .delete_relationships(RelationshipFilter::for_resource(resource)),
        )
        .await
    }

    /// Remove exactly one edge
    pub async fn delete_relationship(
        &self,
        resource: &ResourceRef,
        relation: Relation,
        subject: &SubjectRef,
    ) -> Result<()> {
        resource.validate()?;
        subject.validate()?;
        info!(
            resource = %resource,
            relation = %relation,
            subject = %subject,
            "Deleting relationship"
        );
        let filter = RelationshipFilter::for_resource(resource)
            .with_relation(relation)
            .with_subject(SubjectFilter::exact(subject));
        self.call("delete", self.engine.delete_relationships(filter))
            .await
    }

    pub async fn check_permission(&self, query: PermissionQuery) -> Result<bool> {
        query.validate()?;
        let description = format!("{} {} {}", query.subject, query.permission, query.resource);
        let allowed = self
            .call("check", self.engine.check_permission(query))
            .await?;
        debug!("Permission check {} -> {}", description, allowed);
        Ok(allowed)
    }

    /// Check `permission` and turn a denial into [`RebacError::Forbidden`]
    pub async fn ensure_permission(
        &self,
        resource: &ResourceRef,
        permission: Permission,
        subject: &SubjectRef,
        denial: &str,
    ) -> Result<()> {
        let query = PermissionQuery::new(resource.clone(), permission, subject.clone());
        if self.check_permission(query).await? {
            Ok(())
        } else {
            warn!(resource = %resource, subject = %subject, "Denied {}", permission);
            Err(RebacError::Forbidden(denial.to_string()))
        }
    }

    /// Fail with [`RebacError::Forbidden`] when `resource` already has an owner
    pub async fn ensure_unowned(&self, resource: &ResourceRef) -> Result<()> {
        let owners = self.read_outgoing(resource, Relation::Owner).await?;
        if owners.is_empty() {
            return Ok(());
        }
        warn!(resource = %resource, "Refusing to re-create owned resource");
        Err(RebacError::Forbidden(format!("{} already exists.", resource)))
    }

    /// Tuples where `resource` is the source of `relation` edges
    pub async fn read_outgoing(
        &self,
        resource: &ResourceRef,
        relation: Relation,
    ) -> Result<Vec<RelationshipTuple>> {
        resource.validate()?;
        let filter = RelationshipFilter::for_resource(resource).with_relation(relation);
        let tuples = self
            .call("read", self.engine.read_relationships(filter))
            .await?;
        debug!("{} outgoing {} edges from {}", tuples.len(), relation, resource);
        Ok(tuples)
    }

    /// Tuples of any resource type that point at `resource` through `relation`
    pub async fn read_incoming(
        &self,
        resource: &ResourceRef,
        relation: Relation,
    ) -> Result<Vec<RelationshipTuple>> {
        resource.validate()?;
        let filter = RelationshipFilter::default()
            .with_relation(relation)
            .with_subject(SubjectFilter::exact(&SubjectRef::from(resource)));
        let tuples = self
            .call("read", self.engine.read_relationships(filter))
            .await?;
        debug!("{} incoming {} edges to {}", tuples.len(), relation, resource);
        Ok(tuples)
    }
}
