#![allow(dead_code)]

use modelgraph_core::codec::KeywordMigration;
use modelgraph_core::{
    BaseId, FieldDecl, HookResult, KindTable, ObjectKind, ObjectRegistry, Printable, RefDecl,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const NODE: &str = "NODE";
pub const LINK: &str = "LINK";

/// Plain value object with one non-owning reference.
pub struct Node;

impl ObjectKind for Node {
    fn type_tag(&self) -> &'static str {
        NODE
    }

    fn display_name(&self) -> &'static str {
        "Node"
    }

    fn fields(&self) -> Vec<FieldDecl> {
        vec![
            FieldDecl::text("LABEL", "").printable(Printable::NonEmpty),
            FieldDecl::int("WEIGHT", 0),
            FieldDecl::reals("POSITION", vec![0.0, 0.0]),
        ]
    }

    fn references(&self) -> Vec<RefDecl> {
        vec![RefDecl::single("OWNER")]
    }

    fn keyword_migrations(&self) -> Vec<KeywordMigration> {
        vec![KeywordMigration::rename("MASS", "WEIGHT", 2)]
    }
}

/// Object owning its ends and partner; counts resolve hook calls.
#[derive(Default)]
pub struct Link {
    pub resolved: Arc<AtomicUsize>,
}

impl ObjectKind for Link {
    fn type_tag(&self) -> &'static str {
        LINK
    }

    fn fields(&self) -> Vec<FieldDecl> {
        vec![FieldDecl::real("STIFFNESS", 1.0)]
    }

    fn references(&self) -> Vec<RefDecl> {
        vec![
            RefDecl::list("ENDS").to_type(NODE).owned(),
            RefDecl::single("PARTNER").to_type(LINK).owned(),
        ]
    }

    fn after_resolve(&self, _registry: &mut ObjectRegistry, _id: BaseId) -> HookResult {
        self.resolved.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn kinds() -> KindTable {
    kinds_with_counter(Arc::default())
}

pub fn kinds_with_counter(resolved: Arc<AtomicUsize>) -> KindTable {
    KindTable::with_builtins()
        .with_kind(Node)
        .unwrap()
        .with_kind(Link { resolved })
        .unwrap()
}

pub fn registry() -> ObjectRegistry {
    ObjectRegistry::new(kinds())
}

/// Prepends the version stamp to a record body.
pub fn stream(version: u32, body: &str) -> String {
    format!("MODELGRAPH_FILE_VERSION {version}\n{body}")
}
