//! Resolution pass: pending reference tuples become live handles.
//!
//! # Responsibility
//! - Convert every pending tuple into a handle or a counted null.
//! - Run each processed object's `after_resolve` hook exactly once.
//!
//! # Invariants
//! - A tuple binds only when the target is live and its type tag and scope
//!   match the tuple.
//! - Dangling references are non-fatal.
//! - A second pass over an already-resolved graph is a no-op.

use crate::model::ids::BaseId;
use crate::model::object::Lifecycle;
use crate::model::reference::{PendingRef, RefField, RefSlot};
use crate::registry::{ObjectRegistry, RemapTable};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Counters produced by one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolveReport {
    pub objects: usize,
    pub resolved: usize,
    pub dangling: usize,
    pub hook_failures: usize,
}

struct PendingSlot {
    field_index: usize,
    slot_index: usize,
    keyword: &'static str,
    required_type: Option<&'static str>,
    pending: PendingRef,
}

/// Resolves every object waiting for resolution.
///
/// `remap` translates stream ids that were reassigned during construction.
pub fn resolve_references(registry: &mut ObjectRegistry, remap: &RemapTable) -> ResolveReport {
    let mut report = ResolveReport::default();
    for id in registry.take_pending_resolve() {
        let Some(object) = registry.find_by_id(id) else {
            continue;
        };
        report.objects += 1;

        let pending = pending_slots(object.references());
        for slot in pending {
            let target = lookup(registry, &slot, remap);
            match target {
                Some(_) => report.resolved += 1,
                None => {
                    report.dangling += 1;
                    warn!(
                        "event=dangling_reference module=resolve status=nulled id={} keyword={} target_type={} target={} scope={}",
                        id, slot.keyword, slot.pending.type_tag, slot.pending.target, slot.pending.scope
                    );
                }
            }
            registry.bind_slot(id, slot.field_index, slot.slot_index, target);
        }

        if let Err(err) = registry.run_after_resolve(id) {
            report.hook_failures += 1;
            warn!(
                "event=after_resolve module=resolve status=error id={} error={}",
                id, err
            );
        }
        if registry
            .find_by_id(id)
            .is_some_and(|object| object.state() == Lifecycle::Connected)
        {
            registry.set_state(id, Lifecycle::Resolved);
        }
    }
    debug!(
        "event=resolve_pass module=resolve status=ok objects={} resolved={} dangling={}",
        report.objects, report.resolved, report.dangling
    );
    report
}

fn pending_slots(fields: &[RefField]) -> Vec<PendingSlot> {
    let mut pending = Vec::new();
    for (field_index, field) in fields.iter().enumerate() {
        for (slot_index, slot) in field.value().slots().iter().enumerate() {
            if let RefSlot::Unresolved(tuple) = slot {
                pending.push(PendingSlot {
                    field_index,
                    slot_index,
                    keyword: field.keyword(),
                    required_type: field.decl().target_type,
                    pending: tuple.clone(),
                });
            }
        }
    }
    pending
}

fn lookup(registry: &ObjectRegistry, slot: &PendingSlot, remap: &RemapTable) -> Option<BaseId> {
    let tuple = &slot.pending;
    let target_id = remap.get(&tuple.target).copied().unwrap_or(tuple.target);
    let target = registry.find_by_id(target_id)?;
    if target.type_tag() != &tuple.type_tag || target.scope() != &tuple.scope {
        return None;
    }
    if let Some(required) = slot.required_type {
        if target.type_tag() != required {
            return None;
        }
    }
    Some(target_id)
}
