use crate::models::{AccessType, HierarchyDirection, HierarchyRelation};
use serde::{Deserialize, Serialize};

/// Counts over a hierarchy relation list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchySummary {
    pub total_relations: usize,
    pub direct_parents: usize,
    pub direct_children: usize,
    pub indirect_parents: usize,
    pub indirect_children: usize,
    pub max_parent_level: u32,
    pub max_child_level: u32,
}

impl HierarchySummary {
    pub fn from_relations(relations: &[HierarchyRelation]) -> Self {
        relations
            .iter()
            .fold(Self::default(), |mut summary, relation| {
                summary.total_relations += 1;
                match (relation.relation, relation.access_type) {
                    (HierarchyDirection::Parent, AccessType::Direct) => summary.direct_parents += 1,
                    (HierarchyDirection::Parent, AccessType::Indirect) => {
                        summary.indirect_parents += 1
                    }
                    (HierarchyDirection::Child, AccessType::Direct) => summary.direct_children += 1,
                    (HierarchyDirection::Child, AccessType::Indirect) => {
                        summary.indirect_children += 1
                    }
                }
                match relation.relation {
                    HierarchyDirection::Parent => {
                        summary.max_parent_level = summary.max_parent_level.max(relation.level)
                    }
                    HierarchyDirection::Child => {
                        summary.max_child_level = summary.max_child_level.max(relation.level)
                    }
                }
                summary
            })
    }
}
