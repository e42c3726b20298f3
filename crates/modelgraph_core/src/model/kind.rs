//! Object kind contracts and the type-tag dispatch table.
//!
//! # Responsibility
//! - Define the `ObjectKind` capability trait implemented by collaborators.
//! - Validate kind declarations once and share them as `KindSchema`.
//! - Map persisted type tags to schemas (`KindTable`).
//!
//! # Invariants
//! - Type tags and keywords are uppercase keywords.
//! - `ID`, `DESCR` and `PARENT_ASSEMBLY` are reserved by the core.
//! - A keyword is declared at most once per kind, across fields and references.

use crate::codec::migrations::KeywordMigration;
use crate::model::field::{FieldDecl, Printable};
use crate::model::ids::{is_valid_keyword, BaseId, TypeTag};
use crate::model::object::ModelObject;
use crate::model::reference::RefDecl;
use crate::registry::scope::SubAssemblyKind;
use crate::registry::{ObjectRegistry, RegistryError};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Keyword carrying the local id of every object.
pub const ID_KEYWORD: &str = "ID";
/// Keyword of the implicit description field.
pub const DESCRIPTION_KEYWORD: &str = "DESCR";
/// Keyword that carried the scope path in format version 1.
pub const PARENT_ASSEMBLY_KEYWORD: &str = "PARENT_ASSEMBLY";

const RESERVED_KEYWORDS: &[&str] = &[ID_KEYWORD, DESCRIPTION_KEYWORD, PARENT_ASSEMBLY_KEYWORD];

/// Result type of kind hooks.
pub type HookResult = Result<(), RegistryError>;

/// Capability interface implemented once per concrete object kind.
///
/// The core derives connect, persistence, resolution and clone behavior
/// from the declarations; hooks let a kind rebuild derived state.
pub trait ObjectKind: Send + Sync {
    fn type_tag(&self) -> &'static str;

    /// Name used in diagnostics and id strings.
    fn display_name(&self) -> &'static str {
        self.type_tag()
    }

    fn fields(&self) -> Vec<FieldDecl> {
        Vec::new()
    }

    fn references(&self) -> Vec<RefDecl> {
        Vec::new()
    }

    /// Keyword renames applied when reading older streams.
    fn keyword_migrations(&self) -> Vec<KeywordMigration> {
        Vec::new()
    }

    /// When `true`, a record whose address already exists on load updates
    /// the existing object instead of creating a second one.
    fn merge_on_load(&self) -> bool {
        false
    }

    fn after_connect(&self, _registry: &mut ObjectRegistry, _id: BaseId) -> HookResult {
        Ok(())
    }

    /// Runs once per object after its pending references were resolved.
    fn after_resolve(&self, _registry: &mut ObjectRegistry, _id: BaseId) -> HookResult {
        Ok(())
    }

    /// Copies scalar state from `source` into a freshly instantiated clone.
    fn clone_scalar_fields(&self, source: &ModelObject, target: &mut ModelObject) {
        target.copy_fields_from(source);
    }
}

/// Validated, shareable declaration set of one kind.
pub struct KindSchema {
    tag: TypeTag,
    kind: Arc<dyn ObjectKind>,
    fields: Vec<FieldDecl>,
    references: Vec<RefDecl>,
    migrations: Vec<KeywordMigration>,
}

impl KindSchema {
    fn build(kind: Arc<dyn ObjectKind>) -> Result<Self, KindError> {
        let tag = TypeTag::new(kind.type_tag())
            .ok_or_else(|| KindError::InvalidTypeTag(kind.type_tag().to_string()))?;

        let mut fields =
            vec![FieldDecl::text(DESCRIPTION_KEYWORD, "").printable(Printable::NonEmpty)];
        let declared_fields = kind.fields();
        let references = kind.references();

        let mut seen = BTreeSet::new();
        let keywords = declared_fields
            .iter()
            .map(|decl| decl.keyword)
            .chain(references.iter().map(|decl| decl.keyword));
        for keyword in keywords {
            if !is_valid_keyword(keyword) {
                return Err(KindError::InvalidKeyword {
                    type_tag: tag.clone(),
                    keyword: keyword.to_string(),
                });
            }
            if RESERVED_KEYWORDS.contains(&keyword) {
                return Err(KindError::ReservedKeyword {
                    type_tag: tag.clone(),
                    keyword,
                });
            }
            if !seen.insert(keyword) {
                return Err(KindError::DuplicateKeyword {
                    type_tag: tag.clone(),
                    keyword,
                });
            }
        }
        fields.extend(declared_fields);

        Ok(Self {
            tag,
            migrations: kind.keyword_migrations(),
            kind,
            fields,
            references,
        })
    }

    pub fn tag(&self) -> &TypeTag {
        &self.tag
    }

    pub fn kind(&self) -> &Arc<dyn ObjectKind> {
        &self.kind
    }

    pub fn display_name(&self) -> &'static str {
        self.kind.display_name()
    }

    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    pub fn references(&self) -> &[RefDecl] {
        &self.references
    }

    pub fn migrations(&self) -> &[KeywordMigration] {
        &self.migrations
    }

    pub fn field(&self, keyword: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|decl| decl.keyword == keyword)
    }

    pub fn reference(&self, keyword: &str) -> Option<&RefDecl> {
        self.references.iter().find(|decl| decl.keyword == keyword)
    }
}

impl Debug for KindSchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindSchema")
            .field("tag", &self.tag)
            .field("fields", &self.fields)
            .field("references", &self.references)
            .finish_non_exhaustive()
    }
}

/// Closed mapping from persisted type tag to kind schema.
#[derive(Debug, Clone, Default)]
pub struct KindTable {
    schemas: BTreeMap<TypeTag, Arc<KindSchema>>,
}

impl KindTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the kinds the core itself depends on (`SUB_ASSEMBLY`).
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        table.ensure_builtins();
        table
    }

    pub(crate) fn ensure_builtins(&mut self) {
        let schema = KindSchema::build(Arc::new(SubAssemblyKind))
            .map(Arc::new)
            .expect("built-in kind declaration is valid");
        self.schemas.entry(schema.tag.clone()).or_insert(schema);
    }

    /// Registers one kind after declaration validation.
    pub fn register(&mut self, kind: Arc<dyn ObjectKind>) -> Result<(), KindError> {
        let schema = KindSchema::build(kind)?;
        if self.schemas.contains_key(schema.tag.as_str()) {
            return Err(KindError::DuplicateTypeTag(schema.tag));
        }
        self.schemas.insert(schema.tag.clone(), Arc::new(schema));
        Ok(())
    }

    /// Builder-style registration.
    pub fn with_kind(mut self, kind: impl ObjectKind + 'static) -> Result<Self, KindError> {
        self.register(Arc::new(kind))?;
        Ok(self)
    }

    pub fn get(&self, tag: &str) -> Option<&Arc<KindSchema>> {
        self.schemas.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.schemas.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Sorted type tags.
    pub fn tags(&self) -> Vec<TypeTag> {
        self.schemas.keys().cloned().collect()
    }
}

/// Kind declaration/registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindError {
    InvalidTypeTag(String),
    DuplicateTypeTag(TypeTag),
    InvalidKeyword {
        type_tag: TypeTag,
        keyword: String,
    },
    ReservedKeyword {
        type_tag: TypeTag,
        keyword: &'static str,
    },
    DuplicateKeyword {
        type_tag: TypeTag,
        keyword: &'static str,
    },
}

impl Display for KindError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTypeTag(value) => write!(f, "type tag is invalid: `{value}`"),
            Self::DuplicateTypeTag(tag) => write!(f, "type tag already registered: {tag}"),
            Self::InvalidKeyword { type_tag, keyword } => {
                write!(f, "keyword `{keyword}` on {type_tag} is invalid")
            }
            Self::ReservedKeyword { type_tag, keyword } => {
                write!(f, "keyword `{keyword}` on {type_tag} is reserved by the core")
            }
            Self::DuplicateKeyword { type_tag, keyword } => {
                write!(f, "keyword `{keyword}` declared twice on {type_tag}")
            }
        }
    }
}

impl Error for KindError {}
