//! Reference declarations and slots.
//!
//! # Responsibility
//! - Represent relationships to other objects as pending tuples or handles.
//! - Keep list positions stable, including explicit nulls.
//!
//! # Invariants
//! - A handle is a `BaseId`; the registry guarantees it names a live object.
//! - Lists never compact: nulling position k leaves position k in place.

use crate::model::ids::{BaseId, ScopePath, TypeTag};
use serde::{Deserialize, Serialize};

/// Identifier tuple read from a stream, waiting for the resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingRef {
    pub type_tag: TypeTag,
    pub target: BaseId,
    pub scope: ScopePath,
}

impl PendingRef {
    pub fn new(type_tag: TypeTag, target: BaseId, scope: ScopePath) -> Self {
        Self {
            type_tag,
            target,
            scope,
        }
    }
}

/// State of one reference position. `Resolved(None)` is the null reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefSlot {
    Unresolved(PendingRef),
    Resolved(Option<BaseId>),
}

impl Default for RefSlot {
    fn default() -> Self {
        Self::NULL
    }
}

impl RefSlot {
    pub const NULL: RefSlot = RefSlot::Resolved(None);

    /// Live target handle, if resolved and non-null.
    pub fn target(&self) -> Option<BaseId> {
        match self {
            Self::Resolved(target) => *target,
            Self::Unresolved(_) => None,
        }
    }

    pub fn pending(&self) -> Option<&PendingRef> {
        match self {
            Self::Unresolved(pending) => Some(pending),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Resolved(None))
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved(_))
    }
}

/// Single or positional multi-valued reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    Single,
    List,
}

/// Declaration of one reference field on an object kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefDecl {
    pub keyword: &'static str,
    /// Required target type; `None` accepts any kind.
    pub target_type: Option<&'static str>,
    pub multiplicity: Multiplicity,
    /// Ownership edges are followed by deep clone.
    pub ownership: bool,
}

impl RefDecl {
    pub fn single(keyword: &'static str) -> Self {
        Self {
            keyword,
            target_type: None,
            multiplicity: Multiplicity::Single,
            ownership: false,
        }
    }

    pub fn list(keyword: &'static str) -> Self {
        Self {
            multiplicity: Multiplicity::List,
            ..Self::single(keyword)
        }
    }

    pub fn to_type(mut self, target_type: &'static str) -> Self {
        self.target_type = Some(target_type);
        self
    }

    pub fn owned(mut self) -> Self {
        self.ownership = true;
        self
    }
}

/// Value held by a reference field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefValue {
    Single(RefSlot),
    List(Vec<RefSlot>),
}

impl RefValue {
    pub fn slots(&self) -> &[RefSlot] {
        match self {
            Self::Single(slot) => std::slice::from_ref(slot),
            Self::List(slots) => slots,
        }
    }

    pub fn slots_mut(&mut self) -> &mut [RefSlot] {
        match self {
            Self::Single(slot) => std::slice::from_mut(slot),
            Self::List(slots) => slots,
        }
    }

    /// Live targets in position order, skipping nulls and pendings.
    pub fn targets(&self) -> impl Iterator<Item = BaseId> + '_ {
        self.slots().iter().filter_map(RefSlot::target)
    }
}

/// Per-object state of one reference field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefField {
    decl: RefDecl,
    value: RefValue,
}

impl RefField {
    pub fn from_decl(decl: &RefDecl) -> Self {
        let value = match decl.multiplicity {
            Multiplicity::Single => RefValue::Single(RefSlot::NULL),
            Multiplicity::List => RefValue::List(Vec::new()),
        };
        Self {
            decl: decl.clone(),
            value,
        }
    }

    pub fn keyword(&self) -> &'static str {
        self.decl.keyword
    }

    pub fn decl(&self) -> &RefDecl {
        &self.decl
    }

    pub fn value(&self) -> &RefValue {
        &self.value
    }

    pub(crate) fn value_mut(&mut self) -> &mut RefValue {
        &mut self.value
    }

    pub fn is_list(&self) -> bool {
        self.decl.multiplicity == Multiplicity::List
    }

    /// Null single references and empty lists are elided from streams.
    pub fn is_printable(&self) -> bool {
        match &self.value {
            RefValue::Single(slot) => !slot.is_null(),
            RefValue::List(slots) => !slots.is_empty(),
        }
    }
}
