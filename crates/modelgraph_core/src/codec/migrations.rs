//! Stream format versions and keyword migrations.
//!
//! # Responsibility
//! - Register format revisions in strictly increasing order.
//! - Decide whether a stream version is readable.
//! - Rename keywords of older streams before records are applied.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Migrations only ever apply to streams older than their version.

use crate::codec::CodecError;

#[derive(Debug, Clone, Copy)]
struct FormatRevision {
    version: u32,
    summary: &'static str,
}

const REVISIONS: &[FormatRevision] = &[
    FormatRevision {
        version: 1,
        summary: "keyworded records, scope carried by PARENT_ASSEMBLY",
    },
    FormatRevision {
        version: 2,
        summary: "scope path carried by the record header",
    },
];

/// Version written by this codec.
pub const FORMAT_VERSION: u32 = 2;

/// First version whose record headers carry the scope path.
pub(crate) const HEADER_SCOPE_VERSION: u32 = 2;

/// Returns the latest format version known by this binary.
pub fn latest_version() -> u32 {
    REVISIONS.last().map_or(0, |revision| revision.version)
}

/// Summaries of the revisions a stream of `stream_version` is upgraded through.
pub(crate) fn pending_revisions(stream_version: u32) -> Vec<&'static str> {
    REVISIONS
        .iter()
        .filter(|revision| revision.version > stream_version)
        .map(|revision| revision.summary)
        .collect()
}

/// Keyword rename declared by an object kind.
///
/// Applies to streams whose version is lower than `before_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordMigration {
    pub from: &'static str,
    pub to: &'static str,
    pub before_version: u32,
}

impl KeywordMigration {
    pub const fn rename(from: &'static str, to: &'static str, before_version: u32) -> Self {
        Self {
            from,
            to,
            before_version,
        }
    }
}

/// Validates a stream version against the codec version.
pub(crate) fn check_version(stream_version: u32, force: bool) -> Result<(), CodecError> {
    let latest = latest_version();
    if stream_version > latest && !force {
        return Err(CodecError::VersionRefused {
            stream_version,
            latest_supported: latest,
        });
    }
    Ok(())
}

/// Applies every matching rename in declaration order.
pub(crate) fn migrate_keyword<'a>(
    migrations: &[KeywordMigration],
    keyword: &'a str,
    stream_version: u32,
) -> std::borrow::Cow<'a, str> {
    let mut current = std::borrow::Cow::Borrowed(keyword);
    for migration in migrations {
        if stream_version < migration.before_version && current == migration.from {
            current = std::borrow::Cow::Borrowed(migration.to);
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::{check_version, latest_version, migrate_keyword, KeywordMigration, FORMAT_VERSION};
    use crate::codec::CodecError;

    #[test]
    fn latest_version_matches_written_version() {
        assert_eq!(latest_version(), FORMAT_VERSION);
    }

    #[test]
    fn newer_streams_are_refused_unless_forced() {
        assert!(check_version(FORMAT_VERSION, false).is_ok());
        assert!(check_version(1, false).is_ok());
        match check_version(FORMAT_VERSION + 1, false) {
            Err(CodecError::VersionRefused {
                stream_version,
                latest_supported,
            }) => {
                assert_eq!(stream_version, FORMAT_VERSION + 1);
                assert_eq!(latest_supported, FORMAT_VERSION);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(check_version(FORMAT_VERSION + 1, true).is_ok());
    }

    #[test]
    fn renames_chain_only_for_older_streams() {
        let migrations = [
            KeywordMigration::rename("MASS", "WEIGHT", 2),
            KeywordMigration::rename("WEIGHT", "LOAD", 3),
        ];
        assert_eq!(migrate_keyword(&migrations, "MASS", 1), "LOAD");
        assert_eq!(migrate_keyword(&migrations, "MASS", 2), "MASS");
        assert_eq!(migrate_keyword(&migrations, "WEIGHT", 2), "LOAD");
        assert_eq!(migrate_keyword(&migrations, "OTHER", 1), "OTHER");
    }
}
