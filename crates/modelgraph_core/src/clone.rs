//! Sub-graph duplication with reference remapping.
//!
//! # Responsibility
//! - Clone one object, optionally with the closure of its ownership edges.
//! - Redirect references inside the cloned closure to the clones.
//!
//! # Invariants
//! - Every object of the closure is cloned exactly once; the remap table
//!   doubles as the visited set, so cyclic ownership terminates.
//! - References leaving the closure keep pointing at the originals.
//! - The source graph is never mutated.

use crate::model::ids::BaseId;
use crate::registry::{LocalIdPolicy, ObjectRegistry, RegistryError, RegistryResult, RemapTable};
use log::info;
use std::collections::VecDeque;

/// How far ownership edges are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloneDepth {
    /// Scalar fields only; references are shared.
    #[default]
    Shallow,
    /// Follow ownership edges up to `n` hops.
    Hops(u32),
    /// Follow ownership edges to the full closure.
    Full,
}

impl CloneDepth {
    fn allows(self, hops: u32) -> bool {
        match self {
            Self::Shallow => false,
            Self::Hops(limit) => hops < limit,
            Self::Full => true,
        }
    }
}

/// Result of one clone operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneOutcome {
    pub root: BaseId,
    /// Original id -> clone id, one entry per cloned object.
    pub remap: RemapTable,
}

/// Clones `source` into its own scope.
///
/// # Errors
/// - `NotFound` / `Erased` when `source` is not live.
/// - Hook errors raised by `after_connect` on a clone.
pub fn clone_object(
    registry: &mut ObjectRegistry,
    source: BaseId,
    depth: CloneDepth,
) -> RegistryResult<CloneOutcome> {
    if registry.find_by_id(source).is_none() {
        return Err(if registry.is_erased(source) {
            RegistryError::Erased(source)
        } else {
            RegistryError::NotFound(source)
        });
    }

    let mut remap = RemapTable::new();
    let root = clone_single(registry, source)?;
    remap.insert(source, root);

    let mut queue = VecDeque::from([(source, 0_u32)]);
    while let Some((original, hops)) = queue.pop_front() {
        if !depth.allows(hops) {
            continue;
        }
        for target in owned_targets(registry, original) {
            if remap.contains_key(&target) {
                continue;
            }
            let copy = clone_single(registry, target)?;
            remap.insert(target, copy);
            queue.push_back((target, hops + 1));
        }
    }

    if remap.len() > 1 {
        for copy in remap.values().copied().collect::<Vec<_>>() {
            registry.redirect_targets(copy, &remap);
        }
    }

    for copy in remap.values().copied().collect::<Vec<_>>() {
        registry.run_after_connect(copy)?;
    }

    info!(
        "event=clone_object module=clone status=ok source={} root={} depth={:?} cloned={}",
        source,
        root,
        depth,
        remap.len()
    );
    Ok(CloneOutcome { root, remap })
}

/// Copies scalar fields and shares references; connects in the source scope.
fn clone_single(registry: &mut ObjectRegistry, original: BaseId) -> RegistryResult<BaseId> {
    let source = registry
        .find_by_id(original)
        .ok_or(RegistryError::NotFound(original))?;
    let mut copy = registry.instantiate(source.type_tag().as_str())?;
    source
        .schema()
        .kind()
        .clone_scalar_fields(source, &mut copy);
    copy.copy_references_from(source);
    let scope = source.scope().clone();
    let connected = source.state().is_connected();

    let id = registry.register(copy, None)?;
    if connected {
        registry.connect_in_scope(id, scope, LocalIdPolicy::Reassign)?;
    }
    Ok(id)
}

/// Live targets reached through ownership edges, in declaration order.
fn owned_targets(registry: &ObjectRegistry, id: BaseId) -> Vec<BaseId> {
    let Some(object) = registry.find_by_id(id) else {
        return Vec::new();
    };
    object
        .references()
        .iter()
        .filter(|field| field.decl().ownership)
        .flat_map(|field| field.value().targets())
        .collect()
}
