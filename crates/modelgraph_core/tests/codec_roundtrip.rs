mod common;

use common::{registry, stream, LINK, NODE};
use modelgraph_core::{
    load_str, to_string, BaseId, ChangeEvent, CodecError, FieldDecl, IssuePolicy, Lifecycle,
    LoadOptions, ObjectKind, ObjectRegistry, ScopePath, SUB_ASSEMBLY,
};

/// Singleton-style kind whose records update the object at the same address.
struct Setting;

impl ObjectKind for Setting {
    fn type_tag(&self) -> &'static str {
        "SETTING"
    }

    fn fields(&self) -> Vec<FieldDecl> {
        vec![FieldDecl::int("VALUE", 0)]
    }

    fn merge_on_load(&self) -> bool {
        true
    }
}

#[test]
fn saved_reference_resolves_after_reload() {
    let mut source = registry();
    let a = source.create(NODE, None).unwrap();
    source.set_field(a, "LABEL", "alpha").unwrap();
    source.set_field(a, "WEIGHT", 5).unwrap();
    let b = source.create(NODE, None).unwrap();
    source.set_reference(b, "OWNER", Some(a)).unwrap();
    assert_eq!(a, BaseId(1));

    let text = to_string(&source);
    let mut loaded = registry();
    let summary = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.records_read, 2);
    assert_eq!(summary.objects_created, 2);
    let target = loaded.reference(b, "OWNER").unwrap().unwrap();
    assert_eq!(target, BaseId(1));
    assert_eq!(loaded.field::<String>(target, "LABEL").unwrap(), "alpha");
    assert_eq!(loaded.field::<i64>(target, "WEIGHT").unwrap(), 5);
    assert_eq!(
        loaded.find_by_id(b).unwrap().state(),
        Lifecycle::Resolved
    );
    assert_eq!(loaded.model_id(), source.model_id());
}

#[test]
fn default_fields_are_omitted_and_restored() {
    let mut source = registry();
    let a = source.create(NODE, None).unwrap();
    let b = source.create(NODE, None).unwrap();
    source.set_reference(b, "OWNER", Some(a)).unwrap();

    let text = to_string(&source);
    assert!(!text.contains("WEIGHT"));
    assert!(!text.contains("POSITION"));
    assert!(!text.contains("LABEL"));
    assert!(text.contains("NODE 2 {\n  ID = 2;\n  OWNER = NODE 1;\n}\n"));

    let mut loaded = registry();
    load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();
    assert_eq!(loaded.field::<i64>(a, "WEIGHT").unwrap(), 0);
    assert_eq!(
        loaded.field::<Vec<f64>>(a, "POSITION").unwrap(),
        vec![0.0, 0.0]
    );
}

#[test]
fn reference_lists_keep_null_positions() {
    let mut source = registry();
    let first = source.create(NODE, None).unwrap();
    let second = source.create(NODE, None).unwrap();
    let link = source.create(LINK, None).unwrap();
    source.push_reference(link, "ENDS", Some(first)).unwrap();
    source.push_reference(link, "ENDS", None).unwrap();
    source.push_reference(link, "ENDS", Some(second)).unwrap();

    let text = to_string(&source);
    assert!(text.contains("ENDS = NODE 1, NULL, NODE 2;"));

    let mut loaded = registry();
    load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();
    assert_eq!(
        loaded.reference_list(link, "ENDS").unwrap(),
        vec![Some(first), None, Some(second)]
    );
}

#[test]
fn scoped_objects_round_trip_with_scoped_references() {
    let mut source = registry();
    let assembly = source.create(SUB_ASSEMBLY, None).unwrap();
    let inner = source.create(NODE, Some(assembly)).unwrap();
    source.set_field(inner, "LABEL", "inside \"quoted\"").unwrap();
    let outer = source.create(NODE, None).unwrap();
    source.set_reference(outer, "OWNER", Some(inner)).unwrap();

    let text = to_string(&source);
    assert!(text.contains("NODE 2 [1] {"));
    assert!(text.contains("OWNER = NODE 2 [1];"));

    let mut loaded = registry();
    let summary = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();
    assert_eq!(summary.unresolved_scopes, 0);
    let found = loaded
        .find_by_scope(NODE, 1, &ScopePath::new(vec![1]))
        .unwrap();
    assert_eq!(found.base_id(), inner);
    assert_eq!(found.value::<String>("LABEL").unwrap(), "inside \"quoted\"");
    assert_eq!(loaded.reference(outer, "OWNER").unwrap(), Some(inner));
}

#[test]
fn undefined_target_is_nulled_and_counted() {
    let text = stream(2, "NODE 1 {\n  ID = 1;\n  OWNER = NODE 99;\n}\n");
    let mut loaded = registry();
    let summary = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();

    assert_eq!(summary.dangling_references, 1);
    assert_eq!(loaded.reference(BaseId(1), "OWNER").unwrap(), None);
    assert!(loaded.referrers_of(BaseId(99)).is_empty());
}

#[test]
fn rejected_dangling_reference_leaves_atomic_load_untouched() {
    let text = stream(2, "NODE 1 {\n  ID = 1;\n  OWNER = NODE 99;\n}\n");
    let mut loaded = registry();
    let existing = loaded.create(LINK, None).unwrap();
    let options = LoadOptions {
        dangling_references: IssuePolicy::Reject,
        atomic: true,
        ..LoadOptions::default()
    };

    let err = load_str(&mut loaded, &text, &options).unwrap_err();
    let CodecError::Rejected(summary) = err else {
        panic!("expected a rejected load");
    };
    assert_eq!(summary.dangling_references, 1);
    assert_eq!(loaded.len(), 1);
    assert!(loaded.find_by_id(existing).is_some());
    assert!(loaded.find_by_id(BaseId(2)).is_none());
}

#[test]
fn newer_stream_is_refused_unless_forced() {
    let text = stream(3, "NODE 1 {\n  ID = 1;\n}\n");
    let mut loaded = registry();
    let err = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        CodecError::VersionRefused {
            stream_version: 3,
            latest_supported: 2
        }
    ));
    assert!(loaded.is_empty());

    let options = LoadOptions {
        force_version: true,
        ..LoadOptions::default()
    };
    let summary = load_str(&mut loaded, &text, &options).unwrap();
    assert_eq!(summary.format_version, 3);
    assert_eq!(loaded.len(), 1);
}

#[test]
fn stream_without_version_stamp_is_refused() {
    let mut loaded = registry();
    let err = load_str(&mut loaded, "NODE 1 {\n  ID = 1;\n}\n", &LoadOptions::default())
        .unwrap_err();
    assert!(matches!(err, CodecError::MissingVersionStamp));
}

#[test]
fn version_one_keywords_and_parent_assembly_are_migrated() {
    let text = stream(
        1,
        "SUB_ASSEMBLY 1 {\n  ID = 1;\n}\n\nNODE 4 {\n  ID = 1;\n  MASS = 9;\n  PARENT_ASSEMBLY = 1;\n}\n",
    );
    let mut loaded = registry();
    let summary = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();

    assert!(summary.is_clean());
    let node = loaded.find_by_id(BaseId(4)).unwrap();
    assert_eq!(node.scope(), &ScopePath::new(vec![1]));
    assert_eq!(node.value::<i64>("WEIGHT").unwrap(), 9);

    let saved = to_string(&loaded);
    assert!(saved.starts_with("MODELGRAPH_FILE_VERSION 2\n"));
    assert!(saved.contains("NODE 4 [1] {\n  ID = 1;\n  WEIGHT = 9;\n}"));
}

#[test]
fn unknown_keywords_and_record_types_are_counted() {
    let text = stream(
        2,
        "NODE 1 {\n  ID = 1;\n  COLOR = 3;\n}\n\nWIDGET 2 {\n  ID = 1;\n}\n",
    );
    let mut loaded = registry();
    let summary = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();

    assert_eq!(summary.records_read, 2);
    assert_eq!(summary.objects_created, 1);
    assert_eq!(summary.unknown_keywords.get("COLOR on NODE"), Some(&1));
    assert_eq!(summary.unknown_record_types.get("WIDGET"), Some(&1));
    assert!(!summary.is_clean());

    let options = LoadOptions {
        unknown_keywords: IssuePolicy::Reject,
        atomic: true,
        ..LoadOptions::default()
    };
    let mut strict = registry();
    let err = load_str(&mut strict, &text, &options).unwrap_err();
    assert!(matches!(err, CodecError::Rejected(summary) if summary.unknown_keyword_count() == 1));
    assert!(strict.is_empty());
}

#[test]
fn malformed_lines_are_skipped() {
    let text = stream(
        2,
        "NODE 1 {\n  ID = 1;\n  WEIGHT = heavy;\n  garbage line\n  LABEL = \"kept\";\n}\n",
    );
    let mut loaded = registry();
    let summary = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();

    assert_eq!(summary.malformed_lines, 2);
    assert_eq!(loaded.field::<i64>(BaseId(1), "WEIGHT").unwrap(), 0);
    assert_eq!(loaded.field::<String>(BaseId(1), "LABEL").unwrap(), "kept");
}

#[test]
fn colliding_ids_are_remapped_and_references_follow() {
    let mut loaded = registry();
    let existing = loaded.create(NODE, None).unwrap();
    loaded.set_field(existing, "LABEL", "resident").unwrap();

    let text = stream(
        2,
        "NODE 1 {\n  ID = 1;\n  LABEL = \"first\";\n}\n\nNODE 2 {\n  ID = 2;\n  OWNER = NODE 1;\n}\n",
    );
    let summary = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();

    assert_eq!(summary.objects_created, 2);
    assert_eq!(summary.remapped_ids.len(), 2);
    let first = summary.remapped_ids[&BaseId(1)];
    let second = summary.remapped_ids[&BaseId(2)];
    assert_ne!(first, existing);
    assert_eq!(loaded.field::<String>(first, "LABEL").unwrap(), "first");
    assert_eq!(loaded.reference(second, "OWNER").unwrap(), Some(first));
    assert_eq!(
        loaded.field::<String>(existing, "LABEL").unwrap(),
        "resident"
    );
    assert_ne!(loaded.find_by_id(first).unwrap().local_id(), 1);
}

#[test]
fn replaying_a_stream_rehomes_assembly_members() {
    let mut source = registry();
    let assembly = source.create(SUB_ASSEMBLY, None).unwrap();
    let member = source.create(NODE, Some(assembly)).unwrap();
    let holder = source.create(NODE, None).unwrap();
    source.set_reference(holder, "OWNER", Some(member)).unwrap();
    let text = to_string(&source);

    let mut loaded = registry();
    load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();
    let summary = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.dangling_references, 0);
    assert_eq!(summary.remapped_ids.len(), 3);
    let second_assembly = summary.remapped_ids[&assembly];
    let second_member = summary.remapped_ids[&member];
    let second_holder = summary.remapped_ids[&holder];
    assert_eq!(loaded.find_by_id(second_assembly).unwrap().local_id(), 2);

    let first_scope = loaded.resolve_scope(&ScopePath::new(vec![1])).unwrap();
    let first_members: Vec<BaseId> = first_scope
        .all_of_type(NODE)
        .iter()
        .map(|object| object.base_id())
        .collect();
    assert_eq!(first_members, vec![member]);

    let second_scope = loaded.resolve_scope(&ScopePath::new(vec![2])).unwrap();
    assert_eq!(second_scope.assembly_id(), Some(second_assembly));
    assert_eq!(second_scope.find(NODE, 1).unwrap().base_id(), second_member);
    assert!(loaded.is_part_of(second_member, second_assembly));

    assert_eq!(loaded.reference(holder, "OWNER").unwrap(), Some(member));
    assert_eq!(
        loaded.reference(second_holder, "OWNER").unwrap(),
        Some(second_member)
    );
}

#[test]
fn import_into_scope_prefixes_records_and_references() {
    let mut loaded = registry();
    let assembly = loaded.create(SUB_ASSEMBLY, None).unwrap();
    let text = stream(
        2,
        "NODE 1 {\n  ID = 1;\n}\n\nNODE 2 {\n  ID = 2;\n  OWNER = NODE 1;\n}\n",
    );
    let options = LoadOptions {
        into_scope: Some(ScopePath::new(vec![1])),
        ..LoadOptions::default()
    };
    let summary = load_str(&mut loaded, &text, &options).unwrap();

    assert_eq!(summary.dangling_references, 0);
    let scope = loaded.resolve_scope(&ScopePath::new(vec![1])).unwrap();
    assert_eq!(scope.assembly_id(), Some(assembly));
    let nodes = scope.all_of_type(NODE);
    assert_eq!(nodes.len(), 2);
    let owner = scope.find(NODE, 1).unwrap().base_id();
    let holder = scope.find(NODE, 2).unwrap().base_id();
    assert_eq!(loaded.reference(holder, "OWNER").unwrap(), Some(owner));
    assert!(loaded.is_part_of(holder, assembly));

    let missing = LoadOptions {
        into_scope: Some(ScopePath::new(vec![7])),
        ..LoadOptions::default()
    };
    assert!(matches!(
        load_str(&mut loaded, &text, &missing),
        Err(CodecError::ScopeNotFound(_))
    ));
}

#[test]
fn bulk_load_emits_one_model_loaded_event() {
    let mut source = registry();
    source.create(NODE, None).unwrap();
    source.create(NODE, None).unwrap();
    let text = to_string(&source);

    let mut loaded = registry();
    let events = loaded.subscribe();
    load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();

    let received: Vec<ChangeEvent> = events.try_iter().collect();
    assert_eq!(received, vec![ChangeEvent::ModelLoaded { objects: 2 }]);
}

#[test]
fn records_in_unknown_scopes_are_reported() {
    let text = stream(2, "NODE 5 [7] {\n  ID = 1;\n}\n");
    let mut loaded = registry();
    let summary = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();
    assert_eq!(summary.unresolved_scopes, 1);
    assert_eq!(
        loaded.find_by_id(BaseId(5)).unwrap().scope(),
        &ScopePath::new(vec![7])
    );
}

#[test]
fn merge_kinds_update_the_existing_object() {
    let kinds = common::kinds().with_kind(Setting).unwrap();
    let mut loaded = ObjectRegistry::new(kinds);
    let setting = loaded.create("SETTING", None).unwrap();
    loaded.set_field(setting, "VALUE", 1).unwrap();

    let text = stream(2, "SETTING 5 {\n  ID = 1;\n  VALUE = 9;\n}\n");
    let summary = load_str(&mut loaded, &text, &LoadOptions::default()).unwrap();

    assert_eq!(summary.objects_merged, 1);
    assert_eq!(summary.objects_created, 0);
    assert_eq!(summary.remapped_ids.get(&BaseId(5)), Some(&setting));
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.field::<i64>(setting, "VALUE").unwrap(), 9);
}
