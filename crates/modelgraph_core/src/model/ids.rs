//! Identity primitives shared by every model object.
//!
//! # Responsibility
//! - Define the global `BaseId`, the per-scope `LocalId` and the `TypeTag`.
//! - Define `ScopePath`, the ordered list of enclosing sub-assembly ids.
//!
//! # Invariants
//! - `BaseId(0)` means "not yet registered" and never names a live object.
//! - `TypeTag` values are uppercase keywords (`[A-Z][A-Z0-9_]*`).
//! - An empty `ScopePath` is the root scope.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt::{Display, Formatter};

static TYPE_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("valid type tag regex"));

/// Globally unique object identifier, independent of type and scope.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BaseId(pub u32);

impl BaseId {
    /// Placeholder carried by objects that are not registered yet.
    pub const UNASSIGNED: BaseId = BaseId(0);

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl Display for BaseId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for BaseId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// User-facing identifier, unique per type inside one scope.
pub type LocalId = u32;

/// Stable tag identifying an object kind, e.g. `NODE` or `SUB_ASSEMBLY`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(String);

impl TypeTag {
    /// Builds a tag, returning `None` when `value` is not an uppercase keyword.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if is_valid_keyword(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TypeTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TypeTag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for TypeTag {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for TypeTag {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Returns whether `value` is usable as a type tag or field keyword.
pub fn is_valid_keyword(value: &str) -> bool {
    TYPE_TAG_RE.is_match(value)
}

/// Ordered list of enclosing sub-assembly local ids, outermost first.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ScopePath(Vec<LocalId>);

impl ScopePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(ids: Vec<LocalId>) -> Self {
        Self(ids)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn ids(&self) -> &[LocalId] {
        &self.0
    }

    /// Scope of objects owned by the assembly `assembly_local_id` in `self`.
    pub fn child(&self, assembly_local_id: LocalId) -> Self {
        let mut ids = self.0.clone();
        ids.push(assembly_local_id);
        Self(ids)
    }

    /// Enclosing scope, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Innermost assembly id, or `None` for the root.
    pub fn last(&self) -> Option<LocalId> {
        self.0.last().copied()
    }

    /// Returns whether `self` equals `ancestor` or lies below it.
    pub fn starts_with(&self, ancestor: &ScopePath) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    /// Re-roots this path below `prefix`.
    pub fn prefixed(&self, prefix: &ScopePath) -> Self {
        let mut ids = prefix.0.clone();
        ids.extend_from_slice(&self.0);
        Self(ids)
    }

    /// Parses the bracket body of a persisted path, e.g. `1,3` or `1, 3`.
    ///
    /// Returns `None` on any non-numeric element. An empty body is the root.
    pub fn parse(body: &str) -> Option<Self> {
        let trimmed = body.trim().trim_start_matches('[').trim_end_matches(']');
        if trimmed.trim().is_empty() {
            return Some(Self::root());
        }
        let mut ids = Vec::new();
        for part in trimmed.split(',') {
            ids.push(part.trim().parse::<LocalId>().ok()?);
        }
        Some(Self(ids))
    }
}

impl Display for ScopePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (index, id) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{id}")?;
        }
        f.write_str("]")
    }
}

impl From<Vec<LocalId>> for ScopePath {
    fn from(value: Vec<LocalId>) -> Self {
        Self(value)
    }
}
