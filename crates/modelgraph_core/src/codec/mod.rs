//! Sparse keyworded text persistence with two-phase load.
//!
//! # Responsibility
//! - Serialize connected objects as one record per object.
//! - Load streams in two phases: construct records, then resolve references.
//! - Report record-local problems as counters instead of aborting.
//!
//! # Invariants
//! - Fields whose printable predicate is false are never written.
//! - List references write every position, including `NULL`.
//! - A stream newer than `FORMAT_VERSION` is refused unless forced.
//! - With `LoadOptions::atomic`, a failed load leaves the registry untouched.
//!
//! # See also
//! - crate::resolve

pub mod migrations;
mod reader;
mod writer;

use crate::model::ids::{BaseId, ScopePath};
use crate::notify::ChangeEvent;
use crate::registry::{ObjectRegistry, RegistryError};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Read;
use std::time::Instant;

pub use migrations::{latest_version, KeywordMigration, FORMAT_VERSION};
pub use writer::{serialize, to_string};

pub type CodecResult<T> = Result<T, CodecError>;

/// Reaction to a recoverable load issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuePolicy {
    /// Count, log and continue.
    #[default]
    Tolerate,
    /// Fail the load with `CodecError::Rejected` once it completes.
    Reject,
}

/// Load configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Read streams newer than `FORMAT_VERSION`.
    pub force_version: bool,
    pub dangling_references: IssuePolicy,
    pub unknown_keywords: IssuePolicy,
    /// Build into a scratch copy and swap it in only on success.
    pub atomic: bool,
    /// Import the stream below an existing sub-assembly scope.
    pub into_scope: Option<ScopePath>,
}

/// Diagnostics collected by one load.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadSummary {
    pub format_version: u32,
    pub records_read: usize,
    pub objects_created: usize,
    pub objects_merged: usize,
    /// Stream id -> assigned id for colliding base ids.
    pub remapped_ids: BTreeMap<BaseId, BaseId>,
    pub dangling_references: usize,
    /// Keyed by `"<KEYWORD> on <TYPE>"`.
    pub unknown_keywords: BTreeMap<String, usize>,
    pub unknown_record_types: BTreeMap<String, usize>,
    pub malformed_lines: usize,
    pub hook_failures: usize,
    /// Scopes of loaded objects that name no connected sub-assembly.
    pub unresolved_scopes: usize,
}

impl LoadSummary {
    pub fn unknown_keyword_count(&self) -> usize {
        self.unknown_keywords.values().sum()
    }

    pub fn unknown_record_count(&self) -> usize {
        self.unknown_record_types.values().sum()
    }

    /// Returns whether the load hit no recoverable issue at all.
    pub fn is_clean(&self) -> bool {
        self.dangling_references == 0
            && self.unknown_keywords.is_empty()
            && self.unknown_record_types.is_empty()
            && self.malformed_lines == 0
            && self.hook_failures == 0
            && self.unresolved_scopes == 0
    }
}

/// Codec-level errors.
#[derive(Debug)]
pub enum CodecError {
    Io(std::io::Error),
    MissingVersionStamp,
    VersionRefused {
        stream_version: u32,
        latest_supported: u32,
    },
    ScopeNotFound(ScopePath),
    /// A `Reject` policy was violated; the summary describes the load.
    Rejected(Box<LoadSummary>),
    Registry(RegistryError),
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::MissingVersionStamp => write!(f, "stream has no version stamp"),
            Self::VersionRefused {
                stream_version,
                latest_supported,
            } => write!(
                f,
                "stream version {stream_version} is newer than supported {latest_supported}"
            ),
            Self::ScopeNotFound(path) => write!(f, "import scope {path} does not exist"),
            Self::Rejected(summary) => write!(
                f,
                "load rejected: dangling_references={} unknown_keywords={}",
                summary.dangling_references,
                summary.unknown_keyword_count()
            ),
            Self::Registry(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Registry(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CodecError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<RegistryError> for CodecError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

/// Loads a model stream from `text` into `registry`.
///
/// # Side effects
/// - Suspends change notification and emits one `ModelLoaded` event.
/// - Emits `model_load` logging events with duration and status.
pub fn load_str(
    registry: &mut ObjectRegistry,
    text: &str,
    options: &LoadOptions,
) -> CodecResult<LoadSummary> {
    let started_at = Instant::now();
    info!(
        "event=model_load module=codec status=start atomic={}",
        options.atomic
    );

    let result = if options.atomic {
        let mut scratch = registry.scratch_copy();
        reader::read_into(&mut scratch, text, options).map(|summary| {
            registry.replace_contents(scratch);
            summary
        })
    } else {
        registry.feed_mut().suspend();
        let result = reader::read_into(registry, text, options);
        registry.feed_mut().resume();
        result
    };

    if result.is_ok() || !options.atomic {
        let objects = registry.len();
        registry
            .feed_mut()
            .publish(ChangeEvent::ModelLoaded { objects });
    }

    match &result {
        Ok(summary) => info!(
            "event=model_load module=codec status=ok duration_ms={} records={} created={} dangling={} unknown_keywords={}",
            started_at.elapsed().as_millis(),
            summary.records_read,
            summary.objects_created,
            summary.dangling_references,
            summary.unknown_keyword_count()
        ),
        Err(err) => error!(
            "event=model_load module=codec status=error duration_ms={} error={}",
            started_at.elapsed().as_millis(),
            err
        ),
    }
    result
}

/// Loads a model stream from any reader.
pub fn load(
    registry: &mut ObjectRegistry,
    mut source: impl Read,
    options: &LoadOptions,
) -> CodecResult<LoadSummary> {
    let mut text = String::new();
    source.read_to_string(&mut text)?;
    load_str(registry, &text, options)
}
