//! Model object: core identity plus declared field and reference sets.
//!
//! # Responsibility
//! - Hold identity (`BaseId`, `LocalId`, `ScopePath`) and lifecycle state.
//! - Expose typed field access and read-only reference access.
//!
//! # Invariants
//! - Field and reference order follows the kind declaration order.
//! - Erased objects reject field mutation.
//! - Identity and reference slots are only mutated by the registry.

use crate::model::field::{FieldSlot, FieldType, FieldValue};
use crate::model::ids::{BaseId, LocalId, ScopePath, TypeTag};
use crate::model::kind::{KindSchema, DESCRIPTION_KEYWORD};
use crate::model::reference::{RefField, RefSlot, RefValue};
use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Lifecycle position of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Instantiated, no base id yet.
    Unregistered,
    /// Registered, not linked into a head list.
    Constructing,
    Connected,
    /// Reached through the load path after the resolve hook ran.
    Resolved,
    Erased,
}

impl Lifecycle {
    /// Connected and resolved objects are visible to queries.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Resolved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Constructing => "constructing",
            Self::Connected => "connected",
            Self::Resolved => "resolved",
            Self::Erased => "erased",
        }
    }
}

impl Display for Lifecycle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scoped address: unique per connected object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectAddress {
    pub type_tag: TypeTag,
    pub local_id: LocalId,
    pub scope: ScopePath,
}

impl Display for ObjectAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.type_tag, self.local_id, self.scope)
    }
}

/// Field-level errors raised by object access.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    UnknownField {
        type_tag: TypeTag,
        keyword: String,
    },
    UnknownReference {
        type_tag: TypeTag,
        keyword: String,
    },
    TypeMismatch {
        keyword: String,
        expected: &'static str,
        found: &'static str,
    },
    /// Positional access on a single reference.
    NotAList {
        keyword: String,
    },
    /// Single-valued access on a reference list.
    NotSingle {
        keyword: String,
    },
    ObjectErased(BaseId),
    /// Identity can no longer change once the object is connected.
    IdentityLocked(BaseId),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField { type_tag, keyword } => {
                write!(f, "{type_tag} declares no field `{keyword}`")
            }
            Self::UnknownReference { type_tag, keyword } => {
                write!(f, "{type_tag} declares no reference `{keyword}`")
            }
            Self::TypeMismatch {
                keyword,
                expected,
                found,
            } => write!(f, "field `{keyword}` expects {expected}, got {found}"),
            Self::NotAList { keyword } => write!(f, "reference `{keyword}` is not a list"),
            Self::NotSingle { keyword } => write!(f, "reference `{keyword}` is a list"),
            Self::ObjectErased(id) => write!(f, "object {id} is erased"),
            Self::IdentityLocked(id) => write!(f, "identity of object {id} is locked"),
        }
    }
}

impl Error for ModelError {}

/// One domain object owned by the registry arena.
#[derive(Debug, Clone)]
pub struct ModelObject {
    schema: Arc<KindSchema>,
    base_id: BaseId,
    local_id: LocalId,
    scope: ScopePath,
    state: Lifecycle,
    fields: Vec<FieldSlot>,
    references: Vec<RefField>,
}

impl ModelObject {
    pub(crate) fn new(schema: Arc<KindSchema>) -> Self {
        let fields = schema.fields().iter().map(FieldSlot::from_decl).collect();
        let references = schema.references().iter().map(RefField::from_decl).collect();
        Self {
            schema,
            base_id: BaseId::UNASSIGNED,
            local_id: 0,
            scope: ScopePath::root(),
            state: Lifecycle::Unregistered,
            fields,
            references,
        }
    }

    pub fn schema(&self) -> &Arc<KindSchema> {
        &self.schema
    }

    pub fn type_tag(&self) -> &TypeTag {
        self.schema.tag()
    }

    pub fn base_id(&self) -> BaseId {
        self.base_id
    }

    pub fn local_id(&self) -> LocalId {
        self.local_id
    }

    pub fn scope(&self) -> &ScopePath {
        &self.scope
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn address(&self) -> ObjectAddress {
        ObjectAddress {
            type_tag: self.type_tag().clone(),
            local_id: self.local_id,
            scope: self.scope.clone(),
        }
    }

    pub fn description(&self) -> &str {
        match self.field_slot(DESCRIPTION_KEYWORD).map(FieldSlot::value) {
            Some(FieldValue::Text(text)) => text,
            _ => "",
        }
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> Result<bool, ModelError> {
        self.set_value(DESCRIPTION_KEYWORD, description.into())
    }

    pub fn fields(&self) -> &[FieldSlot] {
        &self.fields
    }

    pub fn field_slot(&self, keyword: &str) -> Option<&FieldSlot> {
        self.fields.iter().find(|slot| slot.keyword() == keyword)
    }

    /// Typed read of a scalar field.
    pub fn value<T: FieldType>(&self, keyword: &str) -> Result<T, ModelError> {
        let slot = self.field_slot(keyword).ok_or_else(|| self.unknown_field(keyword))?;
        T::from_value(slot.value()).ok_or_else(|| ModelError::TypeMismatch {
            keyword: keyword.to_string(),
            expected: std::any::type_name::<T>(),
            found: slot.value().kind_name(),
        })
    }

    /// Assigns a scalar field; returns whether the value changed.
    pub fn set_value(
        &mut self,
        keyword: &str,
        value: impl Into<FieldValue>,
    ) -> Result<bool, ModelError> {
        if self.state == Lifecycle::Erased {
            return Err(ModelError::ObjectErased(self.base_id));
        }
        let type_tag = self.type_tag().clone();
        let slot = self
            .fields
            .iter_mut()
            .find(|slot| slot.keyword() == keyword)
            .ok_or_else(|| ModelError::UnknownField {
                type_tag,
                keyword: keyword.to_string(),
            })?;
        slot.assign(value.into())
            .map_err(|rejected| ModelError::TypeMismatch {
                keyword: keyword.to_string(),
                expected: slot.default_value().kind_name(),
                found: rejected.kind_name(),
            })
    }

    pub fn reset_value(&mut self, keyword: &str) -> Result<bool, ModelError> {
        if self.state == Lifecycle::Erased {
            return Err(ModelError::ObjectErased(self.base_id));
        }
        let type_tag = self.type_tag().clone();
        let slot = self
            .fields
            .iter_mut()
            .find(|slot| slot.keyword() == keyword)
            .ok_or_else(|| ModelError::UnknownField {
                type_tag,
                keyword: keyword.to_string(),
            })?;
        Ok(slot.reset())
    }

    /// Copies every scalar field value from another object.
    ///
    /// Fields unknown to `self` are ignored. Values that cannot be coerced
    /// to the target field's type are skipped and their keywords returned.
    pub fn copy_fields_from(&mut self, source: &ModelObject) -> Vec<&'static str> {
        let mut skipped = Vec::new();
        for source_slot in &source.fields {
            let Some(slot) = self
                .fields
                .iter_mut()
                .find(|slot| slot.keyword() == source_slot.keyword())
            else {
                continue;
            };
            if let Err(rejected) = slot.assign(source_slot.value().clone()) {
                warn!(
                    "event=field_copy module=model status=skipped type_tag={} keyword={} found={}",
                    self.schema.tag(),
                    slot.keyword(),
                    rejected.kind_name()
                );
                skipped.push(slot.keyword());
            }
        }
        skipped
    }

    /// Keywords of fields changed since the last `clear_changed`.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|slot| slot.is_changed())
            .map(FieldSlot::keyword)
            .collect()
    }

    pub fn clear_changed(&mut self) {
        for slot in &mut self.fields {
            slot.clear_changed();
        }
    }

    /// Requests a local id before the object is connected.
    ///
    /// `0` lets connect allocate the next free id.
    pub fn request_local_id(&mut self, local_id: LocalId) -> Result<(), ModelError> {
        match self.state {
            Lifecycle::Unregistered | Lifecycle::Constructing => {
                self.local_id = local_id;
                Ok(())
            }
            _ => Err(ModelError::IdentityLocked(self.base_id)),
        }
    }

    pub fn references(&self) -> &[RefField] {
        &self.references
    }

    pub fn reference_field(&self, keyword: &str) -> Result<&RefField, ModelError> {
        self.references
            .iter()
            .find(|field| field.keyword() == keyword)
            .ok_or_else(|| self.unknown_reference(keyword))
    }

    /// Target of a single reference; pending and null slots read as `None`.
    pub fn reference(&self, keyword: &str) -> Result<Option<BaseId>, ModelError> {
        match self.reference_field(keyword)?.value() {
            RefValue::Single(slot) => Ok(slot.target()),
            RefValue::List(_) => Err(ModelError::NotSingle {
                keyword: keyword.to_string(),
            }),
        }
    }

    /// Targets of a reference list, one entry per position.
    pub fn reference_list(&self, keyword: &str) -> Result<Vec<Option<BaseId>>, ModelError> {
        match self.reference_field(keyword)?.value() {
            RefValue::List(slots) => Ok(slots.iter().map(RefSlot::target).collect()),
            RefValue::Single(_) => Err(ModelError::NotAList {
                keyword: keyword.to_string(),
            }),
        }
    }

    /// Every live target handle, once per slot naming it.
    pub fn outgoing_targets(&self) -> Vec<BaseId> {
        self.references
            .iter()
            .flat_map(|field| field.value().targets())
            .collect()
    }

    pub fn has_pending_references(&self) -> bool {
        self.references
            .iter()
            .any(|field| field.value().slots().iter().any(RefSlot::is_unresolved))
    }

    pub(crate) fn reference_field_mut(&mut self, keyword: &str) -> Result<&mut RefField, ModelError> {
        let type_tag = self.type_tag().clone();
        self.references
            .iter_mut()
            .find(|field| field.keyword() == keyword)
            .ok_or_else(|| ModelError::UnknownReference {
                type_tag,
                keyword: keyword.to_string(),
            })
    }

    pub(crate) fn references_mut(&mut self) -> &mut [RefField] {
        &mut self.references
    }

    /// Shares every reference slot of `source`, pending tuples included.
    pub(crate) fn copy_references_from(&mut self, source: &ModelObject) {
        for field in &mut self.references {
            if let Ok(source_field) = source.reference_field(field.keyword()) {
                if source_field.is_list() == field.is_list() {
                    *field.value_mut() = source_field.value().clone();
                }
            }
        }
    }

    pub(crate) fn set_base_id(&mut self, base_id: BaseId) {
        self.base_id = base_id;
    }

    pub(crate) fn set_local_id(&mut self, local_id: LocalId) {
        self.local_id = local_id;
    }

    pub(crate) fn set_scope(&mut self, scope: ScopePath) {
        self.scope = scope;
    }

    pub(crate) fn set_state(&mut self, state: Lifecycle) {
        self.state = state;
    }

    fn unknown_field(&self, keyword: &str) -> ModelError {
        ModelError::UnknownField {
            type_tag: self.type_tag().clone(),
            keyword: keyword.to_string(),
        }
    }

    fn unknown_reference(&self, keyword: &str) -> ModelError {
        ModelError::UnknownReference {
            type_tag: self.type_tag().clone(),
            keyword: keyword.to_string(),
        }
    }
}
