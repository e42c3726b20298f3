//! Object registry: the explicit context owning every live object.
//!
//! # Responsibility
//! - Allocate base ids and register objects into the arena.
//! - Connect objects into per-scope, per-type head lists.
//! - Maintain the scoped address index and the back-reference index.
//! - Mutate fields and references while keeping both indexes consistent.
//!
//! # Invariants
//! - No two live objects share a `BaseId`.
//! - No two connected objects share an `ObjectAddress`.
//! - A resolved, non-null slot always names a live object; erase sweeps
//!   every referrer through the back-reference index.
//! - Automatic allocation never hands out an erased id before `purge`.
//!
//! # See also
//! - crate::registry::scope
//! - crate::resolve

pub mod scope;

use crate::model::field::{FieldType, FieldValue};
use crate::model::ids::{BaseId, LocalId, ScopePath, TypeTag};
use crate::model::kind::{HookResult, KindError, KindTable, ObjectKind};
use crate::model::object::{Lifecycle, ModelError, ModelObject, ObjectAddress};
use crate::model::reference::{PendingRef, RefDecl, RefSlot, RefValue};
use crate::notify::{ChangeEvent, ChangeFeed};
use log::{debug, info, warn};
use scope::SUB_ASSEMBLY;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use uuid::Uuid;

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Old id -> new id pairs recorded by a load session or a clone.
pub type RemapTable = BTreeMap<BaseId, BaseId>;

/// Registry-level errors.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// An explicitly requested base id names a live object.
    IdentityCollision(BaseId),
    /// An erased base id is still the target of an unresolved tuple.
    IdentityPending(BaseId),
    LocalIdCollision(ObjectAddress),
    NotFound(BaseId),
    Erased(BaseId),
    UnknownType(String),
    InvalidState {
        id: BaseId,
        state: Lifecycle,
        operation: &'static str,
    },
    NotAnAssembly(BaseId),
    ScopeNotFound(ScopePath),
    TargetTypeMismatch {
        keyword: String,
        expected: &'static str,
        found: TypeTag,
    },
    Model(ModelError),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdentityCollision(id) => write!(f, "base id {id} is already in use"),
            Self::IdentityPending(id) => {
                write!(f, "base id {id} is still named by an unresolved reference")
            }
            Self::LocalIdCollision(address) => {
                write!(f, "address {address} is already in use")
            }
            Self::NotFound(id) => write!(f, "object {id} not found"),
            Self::Erased(id) => write!(f, "object {id} is erased"),
            Self::UnknownType(tag) => write!(f, "type tag is not registered: {tag}"),
            Self::InvalidState {
                id,
                state,
                operation,
            } => write!(f, "cannot {operation} object {id} in state {state}"),
            Self::NotAnAssembly(id) => write!(f, "object {id} is not a sub-assembly"),
            Self::ScopeNotFound(path) => write!(f, "scope {path} does not exist"),
            Self::TargetTypeMismatch {
                keyword,
                expected,
                found,
            } => write!(f, "reference `{keyword}` expects {expected}, got {found}"),
            Self::Model(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Model(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ModelError> for RegistryError {
    fn from(value: ModelError) -> Self {
        Self::Model(value)
    }
}

/// Scope restriction for type enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScopeFilter {
    #[default]
    Any,
    Exactly(ScopePath),
    /// The given scope and every scope below it.
    Within(ScopePath),
}

impl ScopeFilter {
    pub fn matches(&self, path: &ScopePath) -> bool {
        match self {
            Self::Any => true,
            Self::Exactly(scope) => scope == path,
            Self::Within(scope) => path.starts_with(scope),
        }
    }
}

/// Ordering of enumeration results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdOrder {
    /// Head-list order, scopes in path order.
    #[default]
    Insertion,
    /// Stable sort by (scope, local id).
    ByLocalId,
    ByBaseId,
}

/// Reaction to an occupied address on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LocalIdPolicy {
    Reject,
    Reassign,
}

#[derive(Debug, Clone, Copy)]
enum SlotPosition {
    Single,
    At(usize),
    Push,
}

/// Arena of model objects plus the indexes that keep it navigable.
#[derive(Debug)]
pub struct ObjectRegistry {
    model_id: Uuid,
    kinds: KindTable,
    objects: HashMap<BaseId, ModelObject>,
    heads: BTreeMap<ScopePath, BTreeMap<TypeTag, Vec<BaseId>>>,
    addresses: HashMap<ObjectAddress, BaseId>,
    referrers: HashMap<BaseId, BTreeMap<BaseId, usize>>,
    tombstones: BTreeSet<BaseId>,
    next_base_id: u32,
    pending_resolve: BTreeSet<BaseId>,
    feed: ChangeFeed,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::with_builtin_kinds()
    }
}

impl ObjectRegistry {
    /// Creates an empty registry; built-in kinds are always available.
    pub fn new(mut kinds: KindTable) -> Self {
        kinds.ensure_builtins();
        Self {
            model_id: Uuid::new_v4(),
            kinds,
            objects: HashMap::new(),
            heads: BTreeMap::new(),
            addresses: HashMap::new(),
            referrers: HashMap::new(),
            tombstones: BTreeSet::new(),
            next_base_id: 1,
            pending_resolve: BTreeSet::new(),
            feed: ChangeFeed::new(),
        }
    }

    pub fn with_builtin_kinds() -> Self {
        Self::new(KindTable::with_builtins())
    }

    pub fn model_id(&self) -> Uuid {
        self.model_id
    }

    pub fn kinds(&self) -> &KindTable {
        &self.kinds
    }

    pub fn register_kind(&mut self, kind: Arc<dyn ObjectKind>) -> Result<(), KindError> {
        self.kinds.register(kind)
    }

    /// Number of live objects, connected or not.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn is_erased(&self, id: BaseId) -> bool {
        self.tombstones.contains(&id)
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> Vec<BaseId> {
        let mut ids: Vec<BaseId> = self.objects.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Opens a change-feed subscription.
    pub fn subscribe(&mut self) -> Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Builds an unregistered object with declared defaults applied.
    pub fn instantiate(&self, type_tag: &str) -> RegistryResult<ModelObject> {
        let schema = self
            .kinds
            .get(type_tag)
            .ok_or_else(|| RegistryError::UnknownType(type_tag.to_string()))?;
        Ok(ModelObject::new(schema.clone()))
    }

    /// Registers an object under `requested` or a freshly allocated id.
    ///
    /// # Errors
    /// - `IdentityCollision` when `requested` names a live object.
    /// - `IdentityPending` when `requested` is erased but an unresolved
    ///   reference tuple still names it.
    /// - `InvalidState` when the object was registered before.
    /// - `UnknownType` when the object's kind is not in this registry's table.
    pub fn register(
        &mut self,
        object: ModelObject,
        requested: Option<BaseId>,
    ) -> RegistryResult<BaseId> {
        self.check_registrable(&object)?;
        let id = match requested.filter(|id| id.is_assigned()) {
            Some(id) if self.objects.contains_key(&id) => {
                return Err(RegistryError::IdentityCollision(id));
            }
            Some(id) if self.tombstones.contains(&id) && self.is_pending_target(id) => {
                return Err(RegistryError::IdentityPending(id));
            }
            Some(id) => {
                self.claim(id);
                id
            }
            None => self.allocate(),
        };
        self.insert_registered(object, id);
        Ok(id)
    }

    /// Load-path registration: a colliding id is replaced by a fresh one.
    ///
    /// Returns the assigned id and whether it differs from `requested`.
    pub(crate) fn register_remapping(
        &mut self,
        object: ModelObject,
        requested: BaseId,
    ) -> RegistryResult<(BaseId, bool)> {
        self.check_registrable(&object)?;
        let (id, remapped) = if !requested.is_assigned() {
            (self.allocate(), false)
        } else if self.objects.contains_key(&requested) {
            let fresh = self.allocate();
            warn!(
                "event=base_id_remapped module=registry status=ok requested={} assigned={}",
                requested, fresh
            );
            (fresh, true)
        } else {
            self.claim(requested);
            (requested, false)
        };
        self.insert_registered(object, id);
        Ok((id, remapped))
    }

    /// Connects a registered object below `parent` (or the root).
    ///
    /// Assigns the next local id when none was requested, then runs the
    /// kind's `after_connect` hook. A hook error is returned with the object
    /// left connected.
    pub fn connect(&mut self, id: BaseId, parent: Option<BaseId>) -> RegistryResult<()> {
        let scope = match parent {
            Some(parent) => self.member_scope_of(parent)?,
            None => ScopePath::root(),
        };
        self.connect_in_scope(id, scope, LocalIdPolicy::Reject)?;
        self.run_after_connect(id)
    }

    /// Connects a registered object into the scope named by `path`.
    ///
    /// # Errors
    /// - `ScopeNotFound` when `path` does not resolve to a connected scope.
    pub fn connect_at(&mut self, id: BaseId, path: &ScopePath) -> RegistryResult<()> {
        if self.resolve_scope(path).is_none() {
            return Err(RegistryError::ScopeNotFound(path.clone()));
        }
        self.connect_in_scope(id, path.clone(), LocalIdPolicy::Reject)?;
        self.run_after_connect(id)
    }

    /// Instantiates, registers and connects a new object.
    ///
    /// An object that could not be connected is dropped again; its id is
    /// not reused.
    pub fn create(&mut self, type_tag: &str, parent: Option<BaseId>) -> RegistryResult<BaseId> {
        let object = self.instantiate(type_tag)?;
        let id = self.register(object, None)?;
        if let Err(err) = self.connect(id, parent) {
            if self
                .objects
                .get(&id)
                .is_some_and(|object| !object.state().is_connected())
            {
                self.objects.remove(&id);
                self.pending_resolve.remove(&id);
            }
            return Err(err);
        }
        Ok(id)
    }

    /// Unlinks an object from its head list; it keeps id, scope and fields.
    pub fn disconnect(&mut self, id: BaseId) -> RegistryResult<()> {
        let object = self.live(id)?;
        if !object.state().is_connected() {
            return Err(RegistryError::InvalidState {
                id,
                state: object.state(),
                operation: "disconnect",
            });
        }
        self.unlink(id);
        if let Some(object) = self.objects.get_mut(&id) {
            object.set_state(Lifecycle::Constructing);
        }
        self.feed.publish(ChangeEvent::Disconnected { id });
        Ok(())
    }

    pub fn find_by_id(&self, id: BaseId) -> Option<&ModelObject> {
        self.objects.get(&id)
    }

    pub fn find_by_scope(
        &self,
        type_tag: &str,
        local_id: LocalId,
        scope: &ScopePath,
    ) -> Option<&ModelObject> {
        let address = ObjectAddress {
            type_tag: TypeTag::new(type_tag)?,
            local_id,
            scope: scope.clone(),
        };
        self.addresses
            .get(&address)
            .and_then(|id| self.objects.get(id))
    }

    /// Connected objects of one type.
    pub fn all_of_type(
        &self,
        type_tag: &str,
        filter: &ScopeFilter,
        order: IdOrder,
    ) -> Vec<&ModelObject> {
        let mut found: Vec<&ModelObject> = self
            .heads
            .iter()
            .filter(|(path, _)| filter.matches(path))
            .filter_map(|(_, types)| types.get(type_tag))
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.objects.get(id))
            .collect();
        match order {
            IdOrder::Insertion => {}
            IdOrder::ByLocalId => {
                found.sort_by(|left, right| {
                    (left.scope(), left.local_id()).cmp(&(right.scope(), right.local_id()))
                });
            }
            IdOrder::ByBaseId => found.sort_by_key(|object| object.base_id()),
        }
        found
    }

    pub fn count_of_type(&self, type_tag: &str, filter: &ScopeFilter) -> usize {
        self.heads
            .iter()
            .filter(|(path, _)| filter.matches(path))
            .filter_map(|(_, types)| types.get(type_tag))
            .map(Vec::len)
            .sum()
    }

    pub fn has_objects_of_type(&self, type_tag: &str, filter: &ScopeFilter) -> bool {
        self.count_of_type(type_tag, filter) > 0
    }

    /// Re-sorts every stored head list by local id.
    pub fn sort_head_lists(&mut self) {
        let objects = &self.objects;
        for types in self.heads.values_mut() {
            for ids in types.values_mut() {
                ids.sort_by_key(|id| objects.get(id).map_or(0, ModelObject::local_id));
            }
        }
    }

    /// Assigns a scalar field; emits `FieldChanged` only on actual change.
    pub fn set_field(
        &mut self,
        id: BaseId,
        keyword: &str,
        value: impl Into<FieldValue>,
    ) -> RegistryResult<bool> {
        let object = self.live_mut(id)?;
        let changed = object.set_value(keyword, value)?;
        let declared = object.field_slot(keyword).map(|slot| slot.keyword());
        if let (true, Some(keyword)) = (changed, declared) {
            self.feed
                .publish(ChangeEvent::FieldChanged { id, keyword });
        }
        Ok(changed)
    }

    pub fn field<T: FieldType>(&self, id: BaseId, keyword: &str) -> RegistryResult<T> {
        Ok(self.live(id)?.value(keyword)?)
    }

    /// Binds a single reference; `None` clears it.
    pub fn set_reference(
        &mut self,
        id: BaseId,
        keyword: &str,
        target: Option<BaseId>,
    ) -> RegistryResult<()> {
        let slot = self.checked_slot(id, keyword, target)?;
        self.write_slot(id, keyword, SlotPosition::Single, slot)
            .map(|_| ())
    }

    /// Binds position `index` of a list, padding with nulls as needed.
    pub fn set_reference_at(
        &mut self,
        id: BaseId,
        keyword: &str,
        index: usize,
        target: Option<BaseId>,
    ) -> RegistryResult<()> {
        let slot = self.checked_slot(id, keyword, target)?;
        self.write_slot(id, keyword, SlotPosition::At(index), slot)
            .map(|_| ())
    }

    /// Appends to a list; returns the new position.
    pub fn push_reference(
        &mut self,
        id: BaseId,
        keyword: &str,
        target: Option<BaseId>,
    ) -> RegistryResult<usize> {
        let slot = self.checked_slot(id, keyword, target)?;
        self.write_slot(id, keyword, SlotPosition::Push, slot)
    }

    /// Stores an unresolved tuple for the next resolution pass.
    ///
    /// `position` must be `None` for single references; on lists `None`
    /// appends.
    pub fn set_pending_reference(
        &mut self,
        id: BaseId,
        keyword: &str,
        position: Option<usize>,
        pending: PendingRef,
    ) -> RegistryResult<()> {
        let is_list = self.live(id)?.reference_field(keyword)?.is_list();
        let position = match (is_list, position) {
            (false, None) => SlotPosition::Single,
            (false, Some(_)) => {
                return Err(ModelError::NotAList {
                    keyword: keyword.to_string(),
                }
                .into())
            }
            (true, None) => SlotPosition::Push,
            (true, Some(index)) => SlotPosition::At(index),
        };
        self.write_slot(id, keyword, position, RefSlot::Unresolved(pending))
            .map(|_| ())
    }

    pub fn reference(&self, id: BaseId, keyword: &str) -> RegistryResult<Option<BaseId>> {
        Ok(self.live(id)?.reference(keyword)?)
    }

    pub fn reference_list(
        &self,
        id: BaseId,
        keyword: &str,
    ) -> RegistryResult<Vec<Option<BaseId>>> {
        Ok(self.live(id)?.reference_list(keyword)?)
    }

    /// Objects holding at least one slot naming `id`, ascending.
    pub fn referrers_of(&self, id: BaseId) -> Vec<BaseId> {
        self.referrers
            .get(&id)
            .map(|referrers| referrers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Erases an object and nulls every slot naming it.
    ///
    /// Members of an erased sub-assembly are erased first. Returns `None`
    /// when `id` is not live, which makes repeated calls no-ops.
    pub fn erase(&mut self, id: BaseId) -> Option<ModelObject> {
        let members = self.assembly_members(id)?;
        for member in members {
            self.erase(member);
        }

        if self.objects.get(&id)?.state().is_connected() {
            self.unlink(id);
        }

        let referrers = self.referrers.remove(&id).unwrap_or_default();
        for referrer in referrers.keys() {
            let Some(object) = self.objects.get_mut(referrer) else {
                continue;
            };
            let mut touched = Vec::new();
            for field in object.references_mut() {
                let mut hit = false;
                for slot in field.value_mut().slots_mut() {
                    if slot.target() == Some(id) {
                        *slot = RefSlot::NULL;
                        hit = true;
                    }
                }
                if hit {
                    touched.push(field.keyword());
                }
            }
            for keyword in touched {
                self.feed.publish(ChangeEvent::ReferenceChanged {
                    id: *referrer,
                    keyword,
                });
            }
        }

        let mut object = self.objects.remove(&id)?;
        for target in object.outgoing_targets() {
            self.unindex_reference(id, target);
        }
        self.pending_resolve.remove(&id);
        object.set_state(Lifecycle::Erased);
        self.tombstones.insert(id);
        self.feed.publish(ChangeEvent::Erased { id });
        info!(
            "event=object_erase module=registry status=ok id={} type={} referrers={}",
            id,
            object.type_tag(),
            referrers.len()
        );
        Some(object)
    }

    /// Erases every object and resets id allocation to 1.
    ///
    /// The only operation that makes erased ids available again.
    pub fn purge(&mut self) -> usize {
        let ids = self.ids();
        self.feed.suspend();
        let mut erased = 0;
        for id in ids {
            if self.erase(id).is_some() {
                erased += 1;
            }
        }
        self.feed.resume();

        self.objects.clear();
        self.heads.clear();
        self.addresses.clear();
        self.referrers.clear();
        self.tombstones.clear();
        self.pending_resolve.clear();
        self.next_base_id = 1;
        self.feed.publish(ChangeEvent::Purged);
        info!(
            "event=registry_purge module=registry status=ok erased={}",
            erased
        );
        erased
    }

    /// Local id followed by the scope path bottom-up, e.g. `[3,5,1]`.
    pub fn id_path(&self, id: BaseId) -> Option<String> {
        let object = self.objects.get(&id)?;
        let parts: Vec<String> = std::iter::once(object.local_id())
            .chain(object.scope().ids().iter().rev().copied())
            .map(|part| part.to_string())
            .collect();
        Some(format!("[{}]", parts.join(",")))
    }

    /// Human-readable identification, e.g. `NODE [3,1] "anchor"`.
    pub fn id_string(&self, id: BaseId) -> Option<String> {
        let object = self.objects.get(&id)?;
        let path = self.id_path(id)?;
        let name = object.schema().display_name();
        if object.description().is_empty() {
            Some(format!("{name} {path}"))
        } else {
            Some(format!("{name} {path} \"{}\"", object.description()))
        }
    }

    /// Returns whether `id` lives anywhere below the sub-assembly `assembly`.
    pub fn is_part_of(&self, id: BaseId, assembly: BaseId) -> bool {
        let (Some(object), Ok(member_scope)) = (self.objects.get(&id), self.member_scope_of(assembly))
        else {
            return false;
        };
        object.state().is_connected() && object.scope().starts_with(&member_scope)
    }

    /// Deepest scope enclosing both objects.
    pub fn common_ancestor(&self, left: BaseId, right: BaseId) -> Option<ScopePath> {
        let left = self.objects.get(&left)?.scope().ids();
        let right = self.objects.get(&right)?.scope().ids();
        let shared = left
            .iter()
            .zip(right.iter())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| *a)
            .collect();
        Some(ScopePath::new(shared))
    }

    pub(crate) fn heads(&self) -> &BTreeMap<ScopePath, BTreeMap<TypeTag, Vec<BaseId>>> {
        &self.heads
    }

    pub(crate) fn set_model_id(&mut self, model_id: Uuid) {
        self.model_id = model_id;
    }

    pub(crate) fn feed_mut(&mut self) -> &mut ChangeFeed {
        &mut self.feed
    }

    /// Connects into an explicit scope without running hooks.
    pub(crate) fn connect_in_scope(
        &mut self,
        id: BaseId,
        scope: ScopePath,
        policy: LocalIdPolicy,
    ) -> RegistryResult<()> {
        let object = self.live(id)?;
        if object.state() != Lifecycle::Constructing {
            return Err(RegistryError::InvalidState {
                id,
                state: object.state(),
                operation: "connect",
            });
        }
        let type_tag = object.type_tag().clone();
        let mut local_id = object.local_id();
        if local_id != 0 {
            let address = ObjectAddress {
                type_tag: type_tag.clone(),
                local_id,
                scope: scope.clone(),
            };
            if self.addresses.contains_key(&address) {
                match policy {
                    LocalIdPolicy::Reject => {
                        return Err(RegistryError::LocalIdCollision(address));
                    }
                    LocalIdPolicy::Reassign => {
                        warn!(
                            "event=local_id_reassigned module=registry status=ok id={} address=\"{}\"",
                            id, address
                        );
                        local_id = 0;
                    }
                }
            }
        }
        if local_id == 0 {
            local_id = self.next_local_id(&type_tag, &scope);
        }

        let object = self.live_mut(id)?;
        object.set_scope(scope.clone());
        object.set_local_id(local_id);
        object.set_state(Lifecycle::Connected);
        self.addresses.insert(
            ObjectAddress {
                type_tag: type_tag.clone(),
                local_id,
                scope: scope.clone(),
            },
            id,
        );
        self.heads
            .entry(scope)
            .or_default()
            .entry(type_tag.clone())
            .or_default()
            .push(id);
        debug!(
            "event=object_connect module=registry status=ok id={} type={} local_id={}",
            id, type_tag, local_id
        );
        self.feed
            .publish(ChangeEvent::Connected { id, type_tag });
        Ok(())
    }

    pub(crate) fn run_after_connect(&mut self, id: BaseId) -> HookResult {
        let kind = self.live(id)?.schema().kind().clone();
        kind.after_connect(self, id)
    }

    pub(crate) fn run_after_resolve(&mut self, id: BaseId) -> HookResult {
        let kind = self.live(id)?.schema().kind().clone();
        kind.after_resolve(self, id)
    }

    pub(crate) fn mark_pending_resolve(&mut self, id: BaseId) {
        if self.objects.contains_key(&id) {
            self.pending_resolve.insert(id);
        }
    }

    pub(crate) fn take_pending_resolve(&mut self) -> Vec<BaseId> {
        std::mem::take(&mut self.pending_resolve).into_iter().collect()
    }

    pub(crate) fn set_state(&mut self, id: BaseId, state: Lifecycle) {
        if let Some(object) = self.objects.get_mut(&id) {
            object.set_state(state);
        }
    }

    /// Overwrites one slot by index, keeping the back-reference index current.
    ///
    /// No change event is emitted; callers own notification.
    pub(crate) fn bind_slot(
        &mut self,
        id: BaseId,
        field_index: usize,
        slot_index: usize,
        target: Option<BaseId>,
    ) {
        let Some(object) = self.objects.get_mut(&id) else {
            return;
        };
        let Some(slot) = object
            .references_mut()
            .get_mut(field_index)
            .and_then(|field| field.value_mut().slots_mut().get_mut(slot_index))
        else {
            return;
        };
        let previous = slot.target();
        *slot = RefSlot::Resolved(target);
        if let Some(previous) = previous {
            self.unindex_reference(id, previous);
        }
        if let Some(target) = target {
            self.index_reference(id, target);
        }
    }

    /// Replaces a whole reference value read from a stream.
    pub(crate) fn load_reference(
        &mut self,
        id: BaseId,
        keyword: &str,
        value: RefValue,
    ) -> RegistryResult<()> {
        let field = self.live_mut(id)?.reference_field_mut(keyword)?;
        match (&value, field.is_list()) {
            (RefValue::List(_), false) => {
                return Err(ModelError::NotAList {
                    keyword: keyword.to_string(),
                }
                .into())
            }
            (RefValue::Single(_), true) => {
                return Err(ModelError::NotSingle {
                    keyword: keyword.to_string(),
                }
                .into())
            }
            _ => {}
        }
        let previous = std::mem::replace(field.value_mut(), value);
        let pending = field.value().slots().iter().any(RefSlot::is_unresolved);
        let targets: Vec<BaseId> = field.value().targets().collect();

        for target in previous.targets() {
            self.unindex_reference(id, target);
        }
        for target in targets {
            self.index_reference(id, target);
        }
        if pending {
            self.pending_resolve.insert(id);
        }
        Ok(())
    }

    /// Rewrites the scope of every unresolved tuple held by `id`.
    pub(crate) fn rescope_pending(
        &mut self,
        id: BaseId,
        rescope: impl Fn(&ScopePath) -> ScopePath,
    ) {
        let Some(object) = self.objects.get_mut(&id) else {
            return;
        };
        for field in object.references_mut() {
            for slot in field.value_mut().slots_mut() {
                if let RefSlot::Unresolved(pending) = slot {
                    pending.scope = rescope(&pending.scope);
                }
            }
        }
    }

    fn is_pending_target(&self, target: BaseId) -> bool {
        self.objects.values().any(|object| {
            object.references().iter().any(|field| {
                field
                    .value()
                    .slots()
                    .iter()
                    .any(|slot| slot.pending().is_some_and(|pending| pending.target == target))
            })
        })
    }

    /// Applies `remap` to every resolved slot of `id`.
    pub(crate) fn redirect_targets(&mut self, id: BaseId, remap: &RemapTable) {
        let Some(object) = self.objects.get(&id) else {
            return;
        };
        let mut rewrites = Vec::new();
        for (field_index, field) in object.references().iter().enumerate() {
            for (slot_index, slot) in field.value().slots().iter().enumerate() {
                if let Some(replacement) = slot.target().and_then(|target| remap.get(&target)) {
                    rewrites.push((field_index, slot_index, *replacement));
                }
            }
        }
        for (field_index, slot_index, replacement) in rewrites {
            self.bind_slot(id, field_index, slot_index, Some(replacement));
        }
    }

    /// Copy used by atomic loads; subscribers stay with the original.
    pub(crate) fn scratch_copy(&self) -> Self {
        Self {
            model_id: self.model_id,
            kinds: self.kinds.clone(),
            objects: self.objects.clone(),
            heads: self.heads.clone(),
            addresses: self.addresses.clone(),
            referrers: self.referrers.clone(),
            tombstones: self.tombstones.clone(),
            next_base_id: self.next_base_id,
            pending_resolve: self.pending_resolve.clone(),
            feed: ChangeFeed::new(),
        }
    }

    /// Adopts the contents of a scratch copy, keeping this registry's feed.
    pub(crate) fn replace_contents(&mut self, scratch: Self) {
        let feed = std::mem::take(&mut self.feed);
        *self = Self { feed, ..scratch };
    }

    fn check_registrable(&self, object: &ModelObject) -> RegistryResult<()> {
        if object.state() != Lifecycle::Unregistered {
            return Err(RegistryError::InvalidState {
                id: object.base_id(),
                state: object.state(),
                operation: "register",
            });
        }
        if !self.kinds.contains(object.type_tag().as_str()) {
            return Err(RegistryError::UnknownType(object.type_tag().to_string()));
        }
        Ok(())
    }

    fn allocate(&mut self) -> BaseId {
        while self.objects.contains_key(&BaseId(self.next_base_id)) {
            self.next_base_id = self.next_base_id.saturating_add(1);
        }
        let id = BaseId(self.next_base_id);
        self.next_base_id = self.next_base_id.saturating_add(1);
        self.tombstones.remove(&id);
        id
    }

    fn claim(&mut self, id: BaseId) {
        self.tombstones.remove(&id);
        if id.get() >= self.next_base_id {
            self.next_base_id = id.get().saturating_add(1);
        }
    }

    fn insert_registered(&mut self, mut object: ModelObject, id: BaseId) {
        object.set_base_id(id);
        object.set_state(Lifecycle::Constructing);
        if object.has_pending_references() {
            self.pending_resolve.insert(id);
        }
        for target in object.outgoing_targets() {
            self.index_reference(id, target);
        }
        debug!(
            "event=object_register module=registry status=ok id={} type={}",
            id,
            object.type_tag()
        );
        self.objects.insert(id, object);
    }

    fn live(&self, id: BaseId) -> RegistryResult<&ModelObject> {
        match self.objects.get(&id) {
            Some(object) => Ok(object),
            None if self.tombstones.contains(&id) => Err(RegistryError::Erased(id)),
            None => Err(RegistryError::NotFound(id)),
        }
    }

    fn live_mut(&mut self, id: BaseId) -> RegistryResult<&mut ModelObject> {
        if self.tombstones.contains(&id) {
            return Err(RegistryError::Erased(id));
        }
        self.objects
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Scope assigned to objects connected below the sub-assembly `assembly`.
    fn member_scope_of(&self, assembly: BaseId) -> RegistryResult<ScopePath> {
        let object = self.live(assembly)?;
        if object.type_tag() != SUB_ASSEMBLY {
            return Err(RegistryError::NotAnAssembly(assembly));
        }
        if !object.state().is_connected() {
            return Err(RegistryError::InvalidState {
                id: assembly,
                state: object.state(),
                operation: "use as parent",
            });
        }
        Ok(object.scope().child(object.local_id()))
    }

    /// Members to erase before `id`; `None` when `id` is not live.
    fn assembly_members(&self, id: BaseId) -> Option<Vec<BaseId>> {
        let object = self.objects.get(&id)?;
        if object.type_tag() != SUB_ASSEMBLY || !object.state().is_connected() {
            return Some(Vec::new());
        }
        let member_scope = object.scope().child(object.local_id());
        let mut members: Vec<BaseId> = self
            .objects
            .values()
            .filter(|member| {
                member.base_id() != id
                    && member.state().is_connected()
                    && member.scope().starts_with(&member_scope)
            })
            .map(ModelObject::base_id)
            .collect();
        members.sort();
        Some(members)
    }

    fn next_local_id(&self, type_tag: &TypeTag, scope: &ScopePath) -> LocalId {
        self.heads
            .get(scope)
            .and_then(|types| types.get(type_tag))
            .and_then(|ids| {
                ids.iter()
                    .filter_map(|id| self.objects.get(id))
                    .map(ModelObject::local_id)
                    .max()
            })
            .unwrap_or(0)
            + 1
    }

    fn unlink(&mut self, id: BaseId) {
        let Some(object) = self.objects.get(&id) else {
            return;
        };
        let address = object.address();
        self.addresses.remove(&address);
        if let Some(types) = self.heads.get_mut(&address.scope) {
            if let Some(ids) = types.get_mut(address.type_tag.as_str()) {
                ids.retain(|member| *member != id);
                if ids.is_empty() {
                    types.remove(address.type_tag.as_str());
                }
            }
            if types.is_empty() {
                self.heads.remove(&address.scope);
            }
        }
    }

    fn checked_slot(
        &self,
        id: BaseId,
        keyword: &str,
        target: Option<BaseId>,
    ) -> RegistryResult<RefSlot> {
        let decl: RefDecl = self.live(id)?.reference_field(keyword)?.decl().clone();
        let Some(target) = target else {
            return Ok(RefSlot::NULL);
        };
        let target_object = self.live(target)?;
        if let Some(expected) = decl.target_type {
            if target_object.type_tag() != expected {
                return Err(RegistryError::TargetTypeMismatch {
                    keyword: keyword.to_string(),
                    expected,
                    found: target_object.type_tag().clone(),
                });
            }
        }
        Ok(RefSlot::Resolved(Some(target)))
    }

    fn write_slot(
        &mut self,
        id: BaseId,
        keyword: &str,
        position: SlotPosition,
        slot: RefSlot,
    ) -> RegistryResult<usize> {
        let field = self.live_mut(id)?.reference_field_mut(keyword)?;
        let static_keyword = field.keyword();
        let pending = slot.is_unresolved();
        let new_target = slot.target();
        let (index, previous) = match (field.value_mut(), position) {
            (RefValue::Single(current), SlotPosition::Single) => {
                (0, std::mem::replace(current, slot))
            }
            (RefValue::Single(_), _) => {
                return Err(ModelError::NotAList {
                    keyword: keyword.to_string(),
                }
                .into())
            }
            (RefValue::List(_), SlotPosition::Single) => {
                return Err(ModelError::NotSingle {
                    keyword: keyword.to_string(),
                }
                .into())
            }
            (RefValue::List(slots), SlotPosition::Push) => {
                slots.push(slot);
                (slots.len() - 1, RefSlot::NULL)
            }
            (RefValue::List(slots), SlotPosition::At(index)) => {
                if slots.len() <= index {
                    slots.resize(index + 1, RefSlot::NULL);
                }
                (index, std::mem::replace(&mut slots[index], slot))
            }
        };

        if let Some(previous) = previous.target() {
            self.unindex_reference(id, previous);
        }
        if let Some(target) = new_target {
            self.index_reference(id, target);
        }
        if pending {
            self.pending_resolve.insert(id);
        }
        self.feed.publish(ChangeEvent::ReferenceChanged {
            id,
            keyword: static_keyword,
        });
        Ok(index)
    }

    fn index_reference(&mut self, referrer: BaseId, target: BaseId) {
        *self
            .referrers
            .entry(target)
            .or_default()
            .entry(referrer)
            .or_insert(0) += 1;
    }

    fn unindex_reference(&mut self, referrer: BaseId, target: BaseId) {
        let Some(referrers) = self.referrers.get_mut(&target) else {
            return;
        };
        if let Some(count) = referrers.get_mut(&referrer) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                referrers.remove(&referrer);
            }
        }
        if referrers.is_empty() {
            self.referrers.remove(&target);
        }
    }
}
