//! Hierarchical sub-assembly namespaces.
//!
//! # Responsibility
//! - Provide the built-in `SUB_ASSEMBLY` kind.
//! - Resolve scope paths into read-only `AssemblyScope` views.
//!
//! # Invariants
//! - The root scope always resolves.
//! - A path resolves only when every level names a connected sub-assembly;
//!   partial matches yield `None`, never an error.

use crate::model::field::{FieldDecl, Printable};
use crate::model::ids::{BaseId, LocalId, ScopePath};
use crate::model::kind::ObjectKind;
use crate::model::object::ModelObject;
use crate::registry::{IdOrder, ObjectRegistry, ScopeFilter};

/// Type tag of the built-in assembly kind.
pub const SUB_ASSEMBLY: &str = "SUB_ASSEMBLY";

/// Nested sub-model; objects connected below it get `scope + [local_id]`.
pub struct SubAssemblyKind;

impl ObjectKind for SubAssemblyKind {
    fn type_tag(&self) -> &'static str {
        SUB_ASSEMBLY
    }

    fn display_name(&self) -> &'static str {
        "Subassembly"
    }

    fn fields(&self) -> Vec<FieldDecl> {
        vec![FieldDecl::text("MODEL_FILE", "").printable(Printable::NonEmpty)]
    }
}

/// Read-only view of one scope level.
#[derive(Debug, Clone)]
pub struct AssemblyScope<'a> {
    registry: &'a ObjectRegistry,
    path: ScopePath,
    assembly: Option<BaseId>,
}

impl<'a> AssemblyScope<'a> {
    pub fn path(&self) -> &ScopePath {
        &self.path
    }

    /// Sub-assembly owning this scope; `None` for the root.
    pub fn assembly_id(&self) -> Option<BaseId> {
        self.assembly
    }

    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    /// Objects of one type directly in this scope, head-list order.
    pub fn all_of_type(&self, type_tag: &str) -> Vec<&'a ModelObject> {
        self.registry.all_of_type(
            type_tag,
            &ScopeFilter::Exactly(self.path.clone()),
            IdOrder::Insertion,
        )
    }

    /// Objects of one type in this scope and every nested scope.
    pub fn all_of_type_within(&self, type_tag: &str) -> Vec<&'a ModelObject> {
        self.registry.all_of_type(
            type_tag,
            &ScopeFilter::Within(self.path.clone()),
            IdOrder::Insertion,
        )
    }

    pub fn find(&self, type_tag: &str, local_id: LocalId) -> Option<&'a ModelObject> {
        self.registry.find_by_scope(type_tag, local_id, &self.path)
    }

    /// Direct child scopes, in head-list order.
    pub fn sub_scopes(&self) -> Vec<AssemblyScope<'a>> {
        self.all_of_type(SUB_ASSEMBLY)
            .into_iter()
            .map(|assembly| AssemblyScope {
                registry: self.registry,
                path: self.path.child(assembly.local_id()),
                assembly: Some(assembly.base_id()),
            })
            .collect()
    }

    pub fn parent(&self) -> Option<AssemblyScope<'a>> {
        self.registry.resolve_scope(&self.path.parent()?)
    }

    /// Returns whether `id` is connected in this scope or below it.
    pub fn contains(&self, id: BaseId) -> bool {
        self.registry.find_by_id(id).is_some_and(|object| {
            object.state().is_connected() && object.scope().starts_with(&self.path)
        })
    }
}

impl ObjectRegistry {
    /// Resolves a scope path level by level.
    pub fn resolve_scope(&self, path: &ScopePath) -> Option<AssemblyScope<'_>> {
        let mut current = ScopePath::root();
        let mut assembly = None;
        for &local_id in path.ids() {
            let level = self.find_by_scope(SUB_ASSEMBLY, local_id, &current)?;
            assembly = Some(level.base_id());
            current = current.child(local_id);
        }
        Some(AssemblyScope {
            registry: self,
            path: current,
            assembly,
        })
    }

    pub fn root_scope(&self) -> AssemblyScope<'_> {
        AssemblyScope {
            registry: self,
            path: ScopePath::root(),
            assembly: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SUB_ASSEMBLY;
    use crate::model::ids::ScopePath;
    use crate::registry::ObjectRegistry;

    #[test]
    fn resolves_nested_paths_and_rejects_partial_matches() {
        let mut registry = ObjectRegistry::with_builtin_kinds();
        let outer = registry.create(SUB_ASSEMBLY, None).unwrap();
        let inner = registry.create(SUB_ASSEMBLY, Some(outer)).unwrap();

        let scope = registry
            .resolve_scope(&ScopePath::new(vec![1, 1]))
            .expect("nested path should resolve");
        assert_eq!(scope.assembly_id(), Some(inner));
        assert_eq!(scope.parent().unwrap().assembly_id(), Some(outer));

        assert!(registry.resolve_scope(&ScopePath::new(vec![1, 2])).is_none());
        assert!(registry.resolve_scope(&ScopePath::new(vec![3])).is_none());
        assert!(registry.resolve_scope(&ScopePath::root()).is_some());
    }

    #[test]
    fn sub_scopes_and_containment() {
        let mut registry = ObjectRegistry::with_builtin_kinds();
        let first = registry.create(SUB_ASSEMBLY, None).unwrap();
        let second = registry.create(SUB_ASSEMBLY, None).unwrap();
        let nested = registry.create(SUB_ASSEMBLY, Some(second)).unwrap();

        let root = registry.root_scope();
        let children: Vec<_> = root
            .sub_scopes()
            .iter()
            .map(|scope| scope.path().clone())
            .collect();
        assert_eq!(
            children,
            vec![ScopePath::new(vec![1]), ScopePath::new(vec![2])]
        );
        assert_eq!(root.all_of_type_within(SUB_ASSEMBLY).len(), 3);

        let second_scope = registry.resolve_scope(&ScopePath::new(vec![2])).unwrap();
        assert!(second_scope.contains(nested));
        assert!(!second_scope.contains(first));
        assert_eq!(second_scope.find(SUB_ASSEMBLY, 1).unwrap().base_id(), nested);
    }
}
