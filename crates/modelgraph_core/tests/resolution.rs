mod common;

use common::{kinds_with_counter, registry, stream, LINK, NODE};
use modelgraph_core::{
    load_str, resolve_references, BaseId, HookResult, LoadOptions, ObjectKind, ObjectRegistry,
    PendingRef, RegistryError, RemapTable, ScopePath, TypeTag,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Fragile;

impl ObjectKind for Fragile {
    fn type_tag(&self) -> &'static str {
        "FRAGILE"
    }

    fn after_resolve(&self, _registry: &mut ObjectRegistry, id: BaseId) -> HookResult {
        Err(RegistryError::NotFound(id))
    }
}

fn pending(type_tag: &str, target: BaseId) -> PendingRef {
    PendingRef::new(TypeTag::new(type_tag).unwrap(), target, ScopePath::root())
}

#[test]
fn resolve_hook_runs_once_per_loaded_object() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut loaded = ObjectRegistry::new(kinds_with_counter(counter.clone()));
    let text = stream(
        2,
        "LINK 1 {\n  ID = 1;\n  PARTNER = LINK 2;\n}\n\nLINK 2 {\n  ID = 2;\n  PARTNER = LINK 1;\n}\n",
    );
    let summary = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();

    assert_eq!(summary.dangling_references, 0);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(loaded.reference(BaseId(1), "PARTNER").unwrap(), Some(BaseId(2)));
    assert_eq!(loaded.reference(BaseId(2), "PARTNER").unwrap(), Some(BaseId(1)));

    let report = resolve_references(&mut loaded, &RemapTable::new());
    assert_eq!(report.objects, 0);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn pending_references_set_through_the_api_resolve() {
    let mut registry = registry();
    let link = registry.create(LINK, None).unwrap();
    let partner = registry.create(LINK, None).unwrap();
    let node = registry.create(NODE, None).unwrap();

    registry
        .set_pending_reference(link, "PARTNER", None, pending(LINK, partner))
        .unwrap();
    registry
        .set_pending_reference(link, "ENDS", Some(1), pending(NODE, node))
        .unwrap();
    assert_eq!(registry.reference(link, "PARTNER").unwrap(), None);
    assert!(registry.find_by_id(link).unwrap().has_pending_references());

    let report = resolve_references(&mut registry, &RemapTable::new());
    assert_eq!(report.resolved, 2);
    assert_eq!(report.dangling, 0);
    assert_eq!(registry.reference(link, "PARTNER").unwrap(), Some(partner));
    assert_eq!(
        registry.reference_list(link, "ENDS").unwrap(),
        vec![None, Some(node)]
    );
    assert!(!registry.find_by_id(link).unwrap().has_pending_references());
}

#[test]
fn tuples_must_match_type_and_declared_target() {
    let mut registry = registry();
    let link = registry.create(LINK, None).unwrap();
    let node = registry.create(NODE, None).unwrap();

    registry
        .set_pending_reference(link, "PARTNER", None, pending(NODE, node))
        .unwrap();
    registry
        .set_pending_reference(link, "ENDS", None, pending(LINK, node))
        .unwrap();

    let report = resolve_references(&mut registry, &RemapTable::new());
    assert_eq!(report.dangling, 2);
    assert_eq!(registry.reference(link, "PARTNER").unwrap(), None);
    assert_eq!(registry.reference_list(link, "ENDS").unwrap(), vec![None]);
    assert!(registry.referrers_of(node).is_empty());
}

#[test]
fn pending_single_reference_rejects_a_position() {
    let mut registry = registry();
    let node = registry.create(NODE, None).unwrap();
    assert!(registry
        .set_pending_reference(node, "OWNER", Some(0), pending(NODE, node))
        .is_err());
}

#[test]
fn failing_resolve_hook_is_counted_not_fatal() {
    let kinds = common::kinds().with_kind(Fragile).unwrap();
    let mut loaded = ObjectRegistry::new(kinds);
    let text = stream(2, "FRAGILE 1 {\n  ID = 1;\n}\n\nNODE 2 {\n  ID = 1;\n}\n");

    let summary = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();
    assert_eq!(summary.hook_failures, 1);
    assert_eq!(summary.objects_created, 2);
    assert!(loaded.find_by_id(BaseId(1)).is_some());
}
