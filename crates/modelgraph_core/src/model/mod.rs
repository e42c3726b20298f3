//! Object model shared by the registry, codec and clone engine.
//!
//! # Responsibility
//! - Define identity primitives, field and reference slots.
//! - Define the kind contract collaborators implement.
//!
//! # Invariants
//! - Every object is identified by a stable `BaseId` once registered.
//! - References are stored as ids, never as pointers into the arena.
//!
//! # See also
//! - crate::registry

pub mod field;
pub mod ids;
pub mod kind;
pub mod object;
pub mod reference;
