//! Hierarchy traversal against the in-memory engine
//!
//! Covers level classification, root termination, child subtree pruning,
//! cycles and the read gate in front of the traversal.

mod common;

use auth_rebac::*;
use common::{create, ids, services, services_with, ObservedEngine};
use std::sync::Arc;

fn parent_edge(child: &ResourceRef, parent: &ResourceRef) -> RelationshipTuple {
    RelationshipTuple::new(child.clone(), Relation::Parent, SubjectRef::from(parent))
}

#[tokio::test]
async fn test_chain_is_classified_by_level() {
    let engine = Arc::new(ObservedEngine::new());
    let services = services(engine.clone());

    let root = ResourceRef::dataverse("c");
    let folder = ResourceRef::folder("b");
    let file = ResourceRef::file("a");
    create(&services, &root, "alice", None).await;
    create(&services, &folder, "alice", Some(&root)).await;
    create(&services, &file, "alice", Some(&folder)).await;

    let hierarchy = services.resources.hierarchy(&file, "alice").await.unwrap();

    assert_eq!(
        hierarchy.relations,
        vec![
            HierarchyRelation::new(HierarchyDirection::Parent, folder, 1),
            HierarchyRelation::new(HierarchyDirection::Parent, root, 2),
        ]
    );
    assert_eq!(hierarchy.relations[0].access_type, AccessType::Direct);
    assert_eq!(hierarchy.relations[1].access_type, AccessType::Indirect);

    let summary = hierarchy.summary;
    assert_eq!(summary.total_relations, 2);
    assert_eq!(summary.direct_parents, 1);
    assert_eq!(summary.indirect_parents, 1);
    assert_eq!(summary.max_parent_level, 2);
    assert_eq!(summary.direct_children + summary.indirect_children, 0);
    assert_eq!(summary.max_child_level, 0);
}

#[tokio::test]
async fn test_root_type_stops_upward_traversal() {
    let engine = Arc::new(ObservedEngine::new());
    let mut config = GatewayConfig::default();
    config.hierarchy.root_resource_type = ResourceType::Folder;
    let services = services_with(engine.clone(), &config);

    let above_root = ResourceRef::dataverse("x");
    let root = ResourceRef::folder("c");
    let file = ResourceRef::file("a");
    create(&services, &above_root, "alice", None).await;
    create(&services, &root, "alice", Some(&above_root)).await;
    create(&services, &file, "alice", Some(&root)).await;

    let hierarchy = services.resources.hierarchy(&file, "alice").await.unwrap();

    assert_eq!(ids(hierarchy.parents().map(|r| r.resource.clone())), vec!["c"]);
    assert_eq!(engine.reads_of(&root), 0, "root must never be read for parents");
    assert_eq!(engine.reads_of(&above_root), 0);
}

#[tokio::test]
async fn test_denied_child_hides_its_subtree() {
    let engine = Arc::new(ObservedEngine::new());
    let services = services(engine.clone());

    let a = ResourceRef::folder("a");
    let b = ResourceRef::folder("b");
    let d = ResourceRef::file("d");
    let e = ResourceRef::file("e");
    create(&services, &a, "alice", None).await;
    create(&services, &b, "alice", Some(&a)).await;
    create(&services, &d, "alice", Some(&a)).await;
    create(&services, &e, "alice", Some(&b)).await;
    engine.deny(&b);

    let hierarchy = services.resources.hierarchy(&a, "alice").await.unwrap();

    assert_eq!(
        hierarchy.children().cloned().collect::<Vec<_>>(),
        vec![HierarchyRelation::new(HierarchyDirection::Child, d, 1)]
    );
    assert_eq!(engine.reads_of(&b), 0, "a pruned child is never expanded");
    assert_eq!(hierarchy.summary.direct_children, 1);
    assert_eq!(hierarchy.summary.indirect_children, 0);
}

#[tokio::test]
async fn test_children_keep_discovery_order() {
    let engine = Arc::new(ObservedEngine::new());
    let services = services(engine.clone());

    let root = ResourceRef::folder("root");
    create(&services, &root, "alice", None).await;
    let names: Vec<String> = (0..20).map(|i| format!("doc-{}", i)).collect();
    for name in &names {
        create(&services, &ResourceRef::file(name.as_str()), "alice", Some(&root)).await;
    }

    let hierarchy = services.resources.hierarchy(&root, "alice").await.unwrap();

    assert_eq!(ids(hierarchy.children().map(|r| r.resource.clone())), names);
    assert!(hierarchy.children().all(|r| r.level == 1));
}

#[tokio::test]
async fn test_cycle_terminates() {
    let engine = Arc::new(ObservedEngine::new());
    let services = services(engine.clone());

    let a = ResourceRef::folder("a");
    let b = ResourceRef::folder("b");
    create(&services, &a, "alice", None).await;
    create(&services, &b, "alice", Some(&a)).await;
    services.gateway.write_relationship(parent_edge(&a, &b)).await.unwrap();

    let hierarchy = services.resources.hierarchy(&a, "alice").await.unwrap();

    let parents: Vec<(String, u32)> = hierarchy
        .parents()
        .map(|r| (r.resource.id.clone(), r.level))
        .collect();
    assert_eq!(parents, vec![("b".to_string(), 1), ("a".to_string(), 2)]);

    let children: Vec<(String, u32)> = hierarchy
        .children()
        .map(|r| (r.resource.id.clone(), r.level))
        .collect();
    assert_eq!(children, vec![("b".to_string(), 1), ("a".to_string(), 2)]);

    // one read per node and pass
    assert_eq!(engine.reads_of(&a), 2);
    assert_eq!(engine.reads_of(&b), 2);
}

#[tokio::test]
async fn test_diamond_expands_shared_ancestor_once() {
    let engine = Arc::new(ObservedEngine::new());
    let services = services(engine.clone());

    let top = ResourceRef::folder("top");
    let left = ResourceRef::folder("left");
    let right = ResourceRef::folder("right");
    let file = ResourceRef::file("leaf");
    create(&services, &top, "alice", None).await;
    create(&services, &left, "alice", Some(&top)).await;
    create(&services, &right, "alice", Some(&top)).await;
    create(&services, &file, "alice", Some(&left)).await;
    services.gateway.write_relationship(parent_edge(&file, &right)).await.unwrap();

    let hierarchy = services.resources.hierarchy(&file, "alice").await.unwrap();

    let parents: Vec<(String, u32)> = hierarchy
        .parents()
        .map(|r| (r.resource.id.clone(), r.level))
        .collect();
    assert_eq!(
        parents,
        vec![
            ("left".to_string(), 1),
            ("top".to_string(), 2),
            ("right".to_string(), 1),
            ("top".to_string(), 2),
        ]
    );
    assert_eq!(engine.reads_of(&top), 1);
}

#[tokio::test]
async fn test_self_parent_is_reported_once() {
    let engine = Arc::new(ObservedEngine::new());
    let services = services(engine.clone());

    let a = ResourceRef::folder("a");
    create(&services, &a, "alice", None).await;
    services.gateway.write_relationship(parent_edge(&a, &a)).await.unwrap();

    let hierarchy = services.resources.hierarchy(&a, "alice").await.unwrap();

    assert_eq!(
        hierarchy.parents().cloned().collect::<Vec<_>>(),
        vec![HierarchyRelation::new(HierarchyDirection::Parent, a.clone(), 1)]
    );
    assert_eq!(hierarchy.summary.max_parent_level, 1);
}

#[tokio::test]
async fn test_unreadable_start_is_forbidden_before_traversal() {
    let engine = Arc::new(ObservedEngine::new());
    let services = services(engine.clone());

    let root = ResourceRef::folder("root");
    let file = ResourceRef::file("a");
    create(&services, &root, "alice", None).await;
    create(&services, &file, "alice", Some(&root)).await;

    let err = services.resources.hierarchy(&file, "bob").await.unwrap_err();

    assert!(matches!(err, RebacError::Forbidden(_)));
    assert_eq!(err.kind().status_code(), 403);
    assert_eq!(engine.total_reads(), 0);
}

#[tokio::test]
async fn test_isolated_resource_has_empty_summary() {
    let engine = Arc::new(ObservedEngine::new());
    let services = services(engine.clone());

    let file = ResourceRef::file("lonely");
    create(&services, &file, "alice", None).await;

    let hierarchy = services.resources.hierarchy(&file, "alice").await.unwrap();

    assert!(hierarchy.relations.is_empty());
    assert_eq!(hierarchy.summary, HierarchySummary::default());
}

#[tokio::test]
async fn test_response_serializes_camel_case() {
    let engine = Arc::new(ObservedEngine::new());
    let services = services(engine.clone());

    let folder = ResourceRef::folder("b");
    let file = ResourceRef::file("a");
    create(&services, &folder, "alice", None).await;
    create(&services, &file, "alice", Some(&folder)).await;

    let hierarchy = services.resources.hierarchy(&file, "alice").await.unwrap();
    let json = serde_json::to_value(&hierarchy).unwrap();

    assert_eq!(json["relations"][0]["accessType"], "DIRECT");
    assert_eq!(json["relations"][0]["relation"], "PARENT");
    assert_eq!(json["relations"][0]["resource"]["type"], "folder");
    assert_eq!(json["summary"]["directParents"], 1);
}
