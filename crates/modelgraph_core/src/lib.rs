//! Core object-graph store for ModelGraph.
//! This crate owns object identity, scoping, persistence and cloning rules.

pub mod clone;
pub mod codec;
pub mod logging;
pub mod model;
pub mod notify;
pub mod registry;
pub mod resolve;
pub mod store;

pub use clone::{clone_object, CloneDepth, CloneOutcome};
pub use codec::{
    load, load_str, serialize, to_string, CodecError, CodecResult, IssuePolicy, LoadOptions,
    LoadSummary, FORMAT_VERSION,
};
pub use logging::{default_log_level, init_logging, logging_status, LogConfig, LoggingError};
pub use model::field::{FieldDecl, FieldSlot, FieldType, FieldValue, Printable};
pub use model::ids::{BaseId, LocalId, ScopePath, TypeTag};
pub use model::kind::{HookResult, KindError, KindSchema, KindTable, ObjectKind};
pub use model::object::{Lifecycle, ModelError, ModelObject, ObjectAddress};
pub use model::reference::{Multiplicity, PendingRef, RefDecl, RefSlot, RefValue};
pub use notify::{ChangeEvent, ChangeFeed};
pub use registry::scope::{AssemblyScope, SubAssemblyKind, SUB_ASSEMBLY};
pub use registry::{
    IdOrder, ObjectRegistry, RegistryError, RegistryResult, RemapTable, ScopeFilter,
};
pub use resolve::{resolve_references, ResolveReport};
pub use store::{open_model, save_model, StoreError, StoreResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
