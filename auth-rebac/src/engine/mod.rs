//! Transports to the external permission engine.
//!
//! The engine is consumed through four primitives only. Everything that
//! resolves permissions (set algebra over relations, caveat evaluation)
//! stays on the engine's side of this trait.

use crate::{error::RebacError, models::*};
use async_trait::async_trait;

pub mod memory;
pub mod spicedb;

pub use memory::InMemoryEngine;
pub use spicedb::SpiceDbHttpEngine;

/// Sub-relation component of a [`SubjectFilter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubRelationFilter {
    #[default]
    Any,
    /// `Exactly(None)` matches only plain subjects.
    Exactly(Option<Relation>),
}

/// Subject side of a [`RelationshipFilter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFilter {
    pub subject_type: SubjectType,
    pub subject_id: Option<String>,
    pub sub_relation: SubRelationFilter,
}

impl SubjectFilter {
    pub fn new(subject_type: SubjectType) -> Self {
        Self {
            subject_type,
            subject_id: None,
            sub_relation: SubRelationFilter::Any,
        }
    }

    pub fn with_id(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Matches exactly this subject, including its sub-relation.
    pub fn exact(subject: &SubjectRef) -> Self {
        Self {
            subject_type: subject.subject_type,
            subject_id: Some(subject.id.clone()),
            sub_relation: SubRelationFilter::Exactly(subject.sub_relation),
        }
    }

    /// Matches this subject id with any sub-relation.
    pub fn any_relation(subject: &SubjectRef) -> Self {
        Self {
            sub_relation: SubRelationFilter::Any,
            ..Self::exact(subject)
        }
    }

    pub fn matches(&self, subject: &SubjectRef) -> bool {
        self.subject_type == subject.subject_type
            && self.subject_id.as_ref().map_or(true, |id| *id == subject.id)
            && match self.sub_relation {
                SubRelationFilter::Any => true,
                SubRelationFilter::Exactly(relation) => subject.sub_relation == relation,
            }
    }
}

/// Tuple filter; every `None` component is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipFilter {
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<String>,
    pub relation: Option<Relation>,
    pub subject: Option<SubjectFilter>,
}

impl RelationshipFilter {
    /// Every tuple whose source is `resource`.
    pub fn for_resource(resource: &ResourceRef) -> Self {
        Self {
            resource_type: Some(resource.resource_type),
            resource_id: Some(resource.id.clone()),
            ..Self::default()
        }
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = Some(relation);
        self
    }

    pub fn with_subject(mut self, subject: SubjectFilter) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn matches(&self, tuple: &RelationshipTuple) -> bool {
        self.resource_type
            .map_or(true, |resource_type| resource_type == tuple.resource.resource_type)
            && self
                .resource_id
                .as_ref()
                .map_or(true, |id| *id == tuple.resource.id)
            && self.relation.map_or(true, |relation| relation == tuple.relation)
            && self
                .subject
                .as_ref()
                .map_or(true, |subject| subject.matches(&tuple.subject))
    }
}

/// The four-primitive contract of the external engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionEngine: Send + Sync {
    /// Upsert tuples (TOUCH semantics)
    async fn write_relationships(&self, tuples: Vec<RelationshipTuple>) -> Result<(), RebacError>;

    /// Delete every tuple matching the filter
    async fn delete_relationships(&self, filter: RelationshipFilter) -> Result<(), RebacError>;

    /// Read live (non-expired) tuples matching the filter
    async fn read_relationships(
        &self,
        filter: RelationshipFilter,
    ) -> Result<Vec<RelationshipTuple>, RebacError>;

    /// Resolve a permission; a caveated path without matching context is `false`
    async fn check_permission(&self, query: PermissionQuery) -> Result<bool, RebacError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_wildcards() {
        let tuple = RelationshipTuple::new(
            ResourceRef::file("f1"),
            Relation::Parent,
            SubjectRef::new(SubjectType::Folder, "d1"),
        );

        assert!(RelationshipFilter::default().matches(&tuple));
        assert!(RelationshipFilter::for_resource(&ResourceRef::file("f1"))
            .with_relation(Relation::Parent)
            .matches(&tuple));
        assert!(!RelationshipFilter::for_resource(&ResourceRef::file("f2")).matches(&tuple));

        let incoming = RelationshipFilter::default()
            .with_relation(Relation::Parent)
            .with_subject(SubjectFilter::exact(&SubjectRef::new(SubjectType::Folder, "d1")));
        assert!(incoming.matches(&tuple));
    }

    #[test]
    fn test_subject_filter_respects_sub_relation() {
        let members = SubjectRef::group_members("g1");
        let group = SubjectRef::new(SubjectType::Group, "g1");

        assert!(SubjectFilter::exact(&members).matches(&members));
        assert!(!SubjectFilter::exact(&members).matches(&group));
        assert!(!SubjectFilter::exact(&group).matches(&members));
        assert!(SubjectFilter::any_relation(&group).matches(&members));
        assert!(SubjectFilter::new(SubjectType::Group).matches(&group));
    }
}
