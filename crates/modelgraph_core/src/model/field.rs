//! Scalar field declarations and slots.
//!
//! # Responsibility
//! - Define the value space persisted by the codec (`FieldValue`).
//! - Hold per-object field state with default and printable predicate.
//!
//! # Invariants
//! - A slot's value always has the same variant as its default.
//! - `changed` is raised only by assignments that alter the value.

use serde::{Deserialize, Serialize};

/// Value stored in one scalar field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Int(i64),
    Real(f64),
    Bool(bool),
    Text(String),
    Reals(Vec<f64>),
}

impl FieldValue {
    /// Short variant name used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Real(_) => "real",
            Self::Bool(_) => "bool",
            Self::Text(_) => "text",
            Self::Reals(_) => "reals",
        }
    }

    pub fn same_kind(&self, other: &FieldValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Returns whether the value is "empty" for the `NonEmpty` predicate.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Int(value) => *value == 0,
            Self::Real(value) => *value == 0.0,
            Self::Bool(value) => !*value,
            Self::Text(value) => value.is_empty(),
            Self::Reals(values) => values.is_empty(),
        }
    }

    /// Converts `self` to the variant of `template`.
    ///
    /// Only `Int -> Real` is coerced; every other mismatch hands the value back.
    pub fn coerce_to(self, template: &FieldValue) -> Result<FieldValue, FieldValue> {
        match (self, template) {
            (Self::Int(value), Self::Real(_)) => Ok(Self::Real(value as f64)),
            (value, template) if value.same_kind(template) => Ok(value),
            (value, _) => Err(value),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<f64>> for FieldValue {
    fn from(value: Vec<f64>) -> Self {
        Self::Reals(value)
    }
}

/// Rust types readable from a `FieldValue`.
pub trait FieldType: Sized {
    fn from_value(value: &FieldValue) -> Option<Self>;
}

impl FieldType for i64 {
    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl FieldType for f64 {
    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Real(value) => Some(*value),
            FieldValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }
}

impl FieldType for bool {
    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl FieldType for String {
    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Text(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl FieldType for Vec<f64> {
    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Reals(values) => Some(values.clone()),
            _ => None,
        }
    }
}

impl FieldType for FieldValue {
    fn from_value(value: &FieldValue) -> Option<Self> {
        Some(value.clone())
    }
}

/// Rule deciding whether a field is written to the model stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Printable {
    /// Written when the value differs from the default.
    #[default]
    NonDefault,
    /// Written when the value is non-empty, regardless of the default.
    NonEmpty,
    Always,
    Never,
}

/// Declaration of one scalar field on an object kind.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub keyword: &'static str,
    pub default: FieldValue,
    pub printable: Printable,
}

impl FieldDecl {
    pub fn new(keyword: &'static str, default: impl Into<FieldValue>) -> Self {
        Self {
            keyword,
            default: default.into(),
            printable: Printable::NonDefault,
        }
    }

    pub fn int(keyword: &'static str, default: i64) -> Self {
        Self::new(keyword, default)
    }

    pub fn real(keyword: &'static str, default: f64) -> Self {
        Self::new(keyword, default)
    }

    pub fn flag(keyword: &'static str, default: bool) -> Self {
        Self::new(keyword, default)
    }

    pub fn text(keyword: &'static str, default: &str) -> Self {
        Self::new(keyword, default)
    }

    pub fn reals(keyword: &'static str, default: Vec<f64>) -> Self {
        Self::new(keyword, default)
    }

    /// Overrides the printable predicate.
    pub fn printable(mut self, printable: Printable) -> Self {
        self.printable = printable;
        self
    }
}

/// Per-object state of one scalar field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSlot {
    keyword: &'static str,
    value: FieldValue,
    default: FieldValue,
    printable: Printable,
    changed: bool,
}

impl FieldSlot {
    pub fn from_decl(decl: &FieldDecl) -> Self {
        Self {
            keyword: decl.keyword,
            value: decl.default.clone(),
            default: decl.default.clone(),
            printable: decl.printable,
            changed: false,
        }
    }

    pub fn keyword(&self) -> &'static str {
        self.keyword
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn default_value(&self) -> &FieldValue {
        &self.default
    }

    pub fn is_default(&self) -> bool {
        self.value == self.default
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn clear_changed(&mut self) {
        self.changed = false;
    }

    /// Returns whether the codec must write this field.
    pub fn is_printable(&self) -> bool {
        match self.printable {
            Printable::NonDefault => !self.is_default(),
            Printable::NonEmpty => !self.value.is_empty(),
            Printable::Always => true,
            Printable::Never => false,
        }
    }

    /// Assigns a new value, coercing ints into real fields.
    ///
    /// Returns `Ok(true)` when the stored value changed, or the rejected
    /// value when its variant does not match the declaration.
    pub fn assign(&mut self, value: FieldValue) -> Result<bool, FieldValue> {
        let coerced = value.coerce_to(&self.default)?;
        if coerced == self.value {
            return Ok(false);
        }
        self.value = coerced;
        self.changed = true;
        Ok(true)
    }

    pub fn reset(&mut self) -> bool {
        if self.is_default() {
            return false;
        }
        self.value = self.default.clone();
        self.changed = true;
        true
    }
}
