//! Record reader: lexing and the construct phase.
//!
//! # Responsibility
//! - Split a stream into records and statements.
//! - Instantiate or merge one object per record and store references as
//!   pending tuples.
//! - Hand over to the resolution pass.
//!
//! # Invariants
//! - Problems local to a line or record are counted, never fatal.
//! - Values are parsed by the declared default's variant.

use crate::codec::migrations::{
    check_version, migrate_keyword, pending_revisions, FORMAT_VERSION, HEADER_SCOPE_VERSION,
};
use crate::codec::writer::{MODEL_ID_KEYWORD, NULL_TOKEN, VERSION_KEYWORD};
use crate::codec::{CodecError, CodecResult, IssuePolicy, LoadOptions, LoadSummary};
use crate::model::field::FieldValue;
use crate::model::ids::{BaseId, LocalId, ScopePath, TypeTag};
use crate::model::kind::{KindSchema, ID_KEYWORD, PARENT_ASSEMBLY_KEYWORD};
use crate::model::reference::{Multiplicity, PendingRef, RefSlot, RefValue};
use crate::registry::scope::SUB_ASSEMBLY;
use crate::registry::{LocalIdPolicy, ObjectRegistry, RegistryError, RemapTable};
use crate::resolve::resolve_references;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use uuid::Uuid;

static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^{VERSION_KEYWORD}\s+(\d+)$")).expect("valid version regex")
});
static MODEL_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^{MODEL_ID_KEYWORD}\s+(\S+)$")).expect("valid model id regex")
});
static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z][A-Z0-9_]*)\s+(\d+)(?:\s+\[([0-9,\s]*)\])?\s*\{$")
        .expect("valid record header regex")
});
static STATEMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z][A-Z0-9_]*)\s*=\s*(.*?)\s*;$").expect("valid statement regex")
});
static REF_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z][A-Z0-9_]*)\s+(\d+)(?:\s+\[([0-9,\s]*)\])?$")
        .expect("valid reference token regex")
});

#[derive(Debug)]
struct Statement<'a> {
    keyword: &'a str,
    value: &'a str,
    line: usize,
}

#[derive(Debug)]
struct RawRecord<'a> {
    type_tag: &'a str,
    base_id: BaseId,
    scope: ScopePath,
    line: usize,
    statements: Vec<Statement<'a>>,
}

#[derive(Debug, Default)]
struct LexedStream<'a> {
    version: u32,
    model_id: Option<Uuid>,
    records: Vec<RawRecord<'a>>,
    malformed_lines: usize,
}

/// Runs both load phases against `registry`.
pub(crate) fn read_into(
    registry: &mut ObjectRegistry,
    text: &str,
    options: &LoadOptions,
) -> CodecResult<LoadSummary> {
    let lexed = lex(text)?;
    check_version(lexed.version, options.force_version)?;
    if lexed.version > FORMAT_VERSION {
        warn!(
            "event=stream_version module=codec status=forced stream_version={} latest={}",
            lexed.version, FORMAT_VERSION
        );
    } else if lexed.version < FORMAT_VERSION {
        info!(
            "event=stream_migrate module=codec status=start stream_version={} revisions=\"{}\"",
            lexed.version,
            pending_revisions(lexed.version).join("; ")
        );
    }

    let prefix = match &options.into_scope {
        Some(path) => {
            if registry.resolve_scope(path).is_none() {
                return Err(CodecError::ScopeNotFound(path.clone()));
            }
            path.clone()
        }
        None => ScopePath::root(),
    };

    if let (Some(model_id), true, true) = (
        lexed.model_id,
        registry.is_empty(),
        options.into_scope.is_none(),
    ) {
        registry.set_model_id(model_id);
    }

    let mut summary = LoadSummary {
        format_version: lexed.version,
        malformed_lines: lexed.malformed_lines,
        ..LoadSummary::default()
    };
    let mut session = Session {
        registry,
        version: lexed.version,
        prefix,
        remap: RemapTable::new(),
        loaded: BTreeSet::new(),
        seen: HashSet::new(),
        rehomed: BTreeMap::new(),
    };

    for record in &lexed.records {
        session.construct(record, &mut summary)?;
    }

    let Session {
        registry,
        remap,
        loaded,
        rehomed,
        ..
    } = session;

    if !rehomed.is_empty() {
        for id in &loaded {
            registry.rescope_pending(*id, |scope| rehome(&rehomed, scope));
        }
    }

    let scopes: BTreeSet<ScopePath> = loaded
        .iter()
        .filter_map(|id| registry.find_by_id(*id))
        .map(|object| object.scope().clone())
        .collect();
    summary.unresolved_scopes = scopes
        .iter()
        .filter(|scope| registry.resolve_scope(scope).is_none())
        .count();

    let report = resolve_references(registry, &remap);
    summary.dangling_references += report.dangling;
    summary.hook_failures += report.hook_failures;

    if options.unknown_keywords == IssuePolicy::Reject && !summary.unknown_keywords.is_empty() {
        return Err(CodecError::Rejected(Box::new(summary)));
    }
    if options.dangling_references == IssuePolicy::Reject && summary.dangling_references > 0 {
        return Err(CodecError::Rejected(Box::new(summary)));
    }
    Ok(summary)
}

struct Session<'r> {
    registry: &'r mut ObjectRegistry,
    version: u32,
    prefix: ScopePath,
    remap: RemapTable,
    loaded: BTreeSet<BaseId>,
    /// Stream ids already read, to tell stream duplicates from collisions.
    seen: HashSet<BaseId>,
    /// Stream scope of a reassigned sub-assembly -> scope it owns now.
    rehomed: BTreeMap<ScopePath, ScopePath>,
}

impl Session<'_> {
    fn construct(&mut self, record: &RawRecord<'_>, summary: &mut LoadSummary) -> CodecResult<()> {
        summary.records_read += 1;
        let Some(schema) = self.registry.kinds().get(record.type_tag).cloned() else {
            *summary
                .unknown_record_types
                .entry(record.type_tag.to_string())
                .or_insert(0) += 1;
            warn!(
                "event=unknown_record_type module=codec status=skipped type={} line={}",
                record.type_tag, record.line
            );
            return Ok(());
        };

        let mut local_id: LocalId = 0;
        let mut scope = record.scope.clone();
        let mut statements = Vec::new();
        for statement in &record.statements {
            let keyword = migrate_keyword(schema.migrations(), statement.keyword, self.version);
            if keyword == ID_KEYWORD {
                match statement.value.parse::<LocalId>() {
                    Ok(value) => local_id = value,
                    Err(_) => malformed(summary, statement, "invalid_local_id"),
                }
            } else if keyword == PARENT_ASSEMBLY_KEYWORD && self.version < HEADER_SCOPE_VERSION {
                match ScopePath::parse(statement.value) {
                    Some(path) => scope = path,
                    None => malformed(summary, statement, "invalid_scope"),
                }
            } else {
                statements.push((keyword, statement));
            }
        }
        let stream_scope = scope.prefixed(&self.prefix);
        let scope = rehome(&self.rehomed, &stream_scope);
        let duplicate = record.base_id.is_assigned() && !self.seen.insert(record.base_id);

        let (id, created) = match self.merge_target(&schema, local_id, &scope) {
            Some(existing) => {
                if existing != record.base_id && record.base_id.is_assigned() {
                    self.remap.insert(record.base_id, existing);
                    summary.remapped_ids.insert(record.base_id, existing);
                }
                summary.objects_merged += 1;
                (existing, false)
            }
            None => {
                let mut object = self.registry.instantiate(record.type_tag)?;
                object
                    .request_local_id(local_id)
                    .map_err(RegistryError::from)?;
                let (id, remapped) = self.registry.register_remapping(object, record.base_id)?;
                if remapped {
                    if duplicate {
                        warn!(
                            "event=duplicate_base_id module=codec status=ok base_id={} assigned={} line={}",
                            record.base_id, id, record.line
                        );
                    } else {
                        self.remap.insert(record.base_id, id);
                        summary.remapped_ids.insert(record.base_id, id);
                    }
                }
                self.registry
                    .connect_in_scope(id, scope.clone(), LocalIdPolicy::Reassign)?;
                if *schema.tag() == SUB_ASSEMBLY && local_id != 0 {
                    self.track_assembly(id, &stream_scope, local_id, &scope);
                }
                summary.objects_created += 1;
                (id, true)
            }
        };

        for (keyword, statement) in statements {
            self.apply_statement(&schema, id, &keyword, statement, summary);
        }

        self.loaded.insert(id);
        if created {
            if let Err(err) = self.registry.run_after_connect(id) {
                summary.hook_failures += 1;
                warn!(
                    "event=after_connect module=codec status=error id={} error={}",
                    id, err
                );
            }
        }
        self.registry.mark_pending_resolve(id);
        Ok(())
    }

    /// Records where members of a reassigned sub-assembly must go.
    fn track_assembly(
        &mut self,
        id: BaseId,
        stream_scope: &ScopePath,
        stream_local_id: LocalId,
        scope: &ScopePath,
    ) {
        let Some(assigned) = self.registry.find_by_id(id).map(|object| object.local_id()) else {
            return;
        };
        if assigned == stream_local_id {
            return;
        }
        let from = stream_scope.child(stream_local_id);
        let to = scope.child(assigned);
        info!(
            "event=scope_rehomed module=codec status=ok id={} from={} to={}",
            id, from, to
        );
        self.rehomed.insert(from, to);
    }

    fn merge_target(
        &self,
        schema: &Arc<KindSchema>,
        local_id: LocalId,
        scope: &ScopePath,
    ) -> Option<BaseId> {
        if !schema.kind().merge_on_load() || local_id == 0 {
            return None;
        }
        self.registry
            .find_by_scope(schema.tag().as_str(), local_id, scope)
            .map(|object| object.base_id())
    }

    fn apply_statement(
        &mut self,
        schema: &Arc<KindSchema>,
        id: BaseId,
        keyword: &str,
        statement: &Statement<'_>,
        summary: &mut LoadSummary,
    ) {
        if let Some(decl) = schema.field(keyword) {
            let Some(value) = parse_value(statement.value, &decl.default) else {
                malformed(summary, statement, "invalid_value");
                return;
            };
            if let Err(err) = self.registry.set_field(id, keyword, value) {
                warn!(
                    "event=field_assign module=codec status=error id={} keyword={} error={}",
                    id, keyword, err
                );
                summary.malformed_lines += 1;
            }
            return;
        }

        if let Some(decl) = schema.reference(keyword) {
            let value = match decl.multiplicity {
                Multiplicity::Single => parse_ref_token(statement.value, &self.prefix)
                    .map(RefValue::Single),
                Multiplicity::List => parse_ref_list(statement.value, &self.prefix)
                    .map(RefValue::List),
            };
            let Some(value) = value else {
                malformed(summary, statement, "invalid_reference");
                return;
            };
            if let Err(err) = self.registry.load_reference(id, keyword, value) {
                warn!(
                    "event=reference_assign module=codec status=error id={} keyword={} error={}",
                    id, keyword, err
                );
                summary.malformed_lines += 1;
            }
            return;
        }

        *summary
            .unknown_keywords
            .entry(format!("{} on {}", statement.keyword, schema.tag()))
            .or_insert(0) += 1;
        warn!(
            "event=unknown_keyword module=codec status=skipped keyword={} type={} line={}",
            statement.keyword,
            schema.tag(),
            statement.line
        );
    }
}

fn malformed(summary: &mut LoadSummary, statement: &Statement<'_>, reason: &str) {
    summary.malformed_lines += 1;
    warn!(
        "event=malformed_statement module=codec status=skipped reason={} keyword={} line={}",
        reason, statement.keyword, statement.line
    );
}

fn lex(text: &str) -> CodecResult<LexedStream<'_>> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

    let version = lines
        .next()
        .and_then(|(_, line)| VERSION_RE.captures(line))
        .and_then(|captures| captures[1].parse::<u32>().ok())
        .ok_or(CodecError::MissingVersionStamp)?;

    let mut lexed = LexedStream {
        version,
        ..LexedStream::default()
    };
    let mut current: Option<RawRecord<'_>> = None;

    for (line_no, line) in lines {
        if let Some(record) = current.as_mut() {
            if line == "}" {
                lexed.records.extend(current.take());
                continue;
            }
            if let Some(captures) = STATEMENT_RE.captures(line) {
                let keyword = captures.get(1).map_or("", |m| m.as_str());
                let value = captures.get(2).map_or("", |m| m.as_str());
                record.statements.push(Statement {
                    keyword,
                    value,
                    line: line_no,
                });
                continue;
            }
            lexed.malformed_lines += 1;
            if !HEADER_RE.is_match(line) {
                warn!(
                    "event=malformed_line module=codec status=skipped line={}",
                    line_no
                );
                continue;
            }
            warn!(
                "event=unterminated_record module=codec status=ok line={}",
                line_no
            );
            lexed.records.extend(current.take());
        }

        if let Some(captures) = HEADER_RE.captures(line) {
            let type_tag = captures.get(1).map_or("", |m| m.as_str());
            let base_id = captures[2].parse::<u32>().ok();
            let scope = ScopePath::parse(captures.get(3).map_or("", |m| m.as_str()));
            match (base_id, scope) {
                (Some(base_id), Some(scope)) => {
                    current = Some(RawRecord {
                        type_tag,
                        base_id: BaseId(base_id),
                        scope,
                        line: line_no,
                        statements: Vec::new(),
                    });
                }
                _ => {
                    lexed.malformed_lines += 1;
                    warn!(
                        "event=malformed_header module=codec status=skipped line={}",
                        line_no
                    );
                }
            }
            continue;
        }

        if let Some(captures) = MODEL_ID_RE.captures(line) {
            if let Ok(model_id) = Uuid::parse_str(&captures[1]) {
                lexed.model_id = Some(model_id);
                continue;
            }
        }

        lexed.malformed_lines += 1;
        warn!(
            "event=malformed_line module=codec status=skipped line={}",
            line_no
        );
    }

    if let Some(record) = current.take() {
        lexed.malformed_lines += 1;
        warn!(
            "event=unterminated_record module=codec status=ok line={}",
            record.line
        );
        lexed.records.push(record);
    }
    Ok(lexed)
}

/// Rewrites `path` below the deepest rehomed scope it starts with.
fn rehome(rehomed: &BTreeMap<ScopePath, ScopePath>, path: &ScopePath) -> ScopePath {
    let ids = path.ids();
    for depth in (1..=ids.len()).rev() {
        if let Some(target) = rehomed.get(&ScopePath::new(ids[..depth].to_vec())) {
            let mut moved = target.ids().to_vec();
            moved.extend_from_slice(&ids[depth..]);
            return ScopePath::new(moved);
        }
    }
    path.clone()
}

/// Parses `raw` as the variant of `template`.
pub(crate) fn parse_value(raw: &str, template: &FieldValue) -> Option<FieldValue> {
    let raw = raw.trim();
    match template {
        FieldValue::Int(_) => raw.parse::<i64>().ok().map(FieldValue::Int),
        FieldValue::Real(_) => raw.parse::<f64>().ok().map(FieldValue::Real),
        FieldValue::Bool(_) => match raw {
            "true" => Some(FieldValue::Bool(true)),
            "false" => Some(FieldValue::Bool(false)),
            _ => None,
        },
        FieldValue::Text(_) => unquote(raw).map(FieldValue::Text),
        FieldValue::Reals(_) => raw
            .split_whitespace()
            .map(|part| part.parse::<f64>().ok())
            .collect::<Option<Vec<_>>>()
            .map(FieldValue::Reals),
    }
}

fn unquote(raw: &str) -> Option<String> {
    let inner = raw.strip_prefix('"')?.strip_suffix('"')?;
    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => value.push(match chars.next()? {
                '"' => '"',
                '\\' => '\\',
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                _ => return None,
            }),
            '"' => return None,
            other => value.push(other),
        }
    }
    Some(value)
}

fn parse_ref_token(raw: &str, prefix: &ScopePath) -> Option<RefSlot> {
    let raw = raw.trim();
    if raw == NULL_TOKEN {
        return Some(RefSlot::NULL);
    }
    let captures = REF_TOKEN_RE.captures(raw)?;
    let type_tag = TypeTag::new(&captures[1])?;
    let target = captures[2].parse::<u32>().ok()?;
    let scope = ScopePath::parse(captures.get(3).map_or("", |m| m.as_str()))?;
    Some(RefSlot::Unresolved(PendingRef::new(
        type_tag,
        BaseId(target),
        scope.prefixed(prefix),
    )))
}

fn parse_ref_list(raw: &str, prefix: &ScopePath) -> Option<Vec<RefSlot>> {
    if raw.trim().is_empty() {
        return Some(Vec::new());
    }
    split_list(raw)
        .into_iter()
        .map(|token| parse_ref_token(token, prefix))
        .collect()
}

/// Splits on commas outside `[...]` scope brackets.
fn split_list(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, ch) in raw.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&raw[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::{lex, parse_ref_list, parse_value, rehome, split_list, unquote};
    use crate::codec::CodecError;
    use crate::model::field::FieldValue;
    use crate::model::ids::{BaseId, ScopePath};
    use crate::model::reference::RefSlot;
    use std::collections::BTreeMap;

    #[test]
    fn lexer_requires_version_stamp_first() {
        let err = lex("NODE 1 {\n}\n").unwrap_err();
        assert!(matches!(err, CodecError::MissingVersionStamp));

        let lexed = lex("# header comment\nMODELGRAPH_FILE_VERSION 2\n").unwrap();
        assert_eq!(lexed.version, 2);
        assert!(lexed.records.is_empty());
    }

    #[test]
    fn lexer_counts_malformed_lines_and_recovers_unterminated_records() {
        let text = "MODELGRAPH_FILE_VERSION 2\n\
                    NODE 1 {\n\
                    ID = 1;\n\
                    garbage here\n\
                    NODE 2 [1] {\n\
                    ID = 4;\n\
                    }\n\
                    stray\n";
        let lexed = lex(text).unwrap();
        assert_eq!(lexed.records.len(), 2);
        assert_eq!(lexed.records[1].scope, ScopePath::new(vec![1]));
        assert_eq!(lexed.records[1].statements[0].value, "4");
        assert_eq!(lexed.malformed_lines, 3);
    }

    #[test]
    fn values_parse_by_declared_variant() {
        assert_eq!(
            parse_value("7", &FieldValue::Real(0.0)),
            Some(FieldValue::Real(7.0))
        );
        assert_eq!(parse_value("7.5", &FieldValue::Int(0)), None);
        assert_eq!(
            parse_value("1 2.5", &FieldValue::Reals(vec![])),
            Some(FieldValue::Reals(vec![1.0, 2.5]))
        );
        assert_eq!(
            parse_value("", &FieldValue::Reals(vec![1.0])),
            Some(FieldValue::Reals(vec![]))
        );
        assert_eq!(parse_value("yes", &FieldValue::Bool(false)), None);
    }

    #[test]
    fn rehome_uses_the_deepest_matching_scope() {
        let rehomed = BTreeMap::from([
            (ScopePath::new(vec![1]), ScopePath::new(vec![3])),
            (ScopePath::new(vec![1, 2]), ScopePath::new(vec![3, 5])),
        ]);
        assert_eq!(
            rehome(&rehomed, &ScopePath::new(vec![1, 4])),
            ScopePath::new(vec![3, 4])
        );
        assert_eq!(
            rehome(&rehomed, &ScopePath::new(vec![1, 2, 7])),
            ScopePath::new(vec![3, 5, 7])
        );
        assert_eq!(
            rehome(&rehomed, &ScopePath::new(vec![2, 1])),
            ScopePath::new(vec![2, 1])
        );
        assert_eq!(rehome(&rehomed, &ScopePath::root()), ScopePath::root());
    }

    #[test]
    fn unquote_handles_escapes() {
        assert_eq!(unquote(r#""a \"b\"\n""#), Some("a \"b\"\n".to_string()));
        assert_eq!(unquote("unquoted"), None);
        assert_eq!(unquote(r#""bad \q""#), None);
    }

    #[test]
    fn reference_lists_keep_null_positions_and_scoped_tokens() {
        assert_eq!(split_list("A 1 [1,2], NULL"), vec!["A 1 [1,2]", " NULL"]);
        let slots =
            parse_ref_list("NODE 3 [1,2], NULL, NODE 4", &ScopePath::new(vec![7])).unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[1], RefSlot::NULL);
        let pending = slots[0].pending().unwrap();
        assert_eq!(pending.target, BaseId(3));
        assert_eq!(pending.scope, ScopePath::new(vec![7, 1, 2]));
        assert!(parse_ref_list("NODE x", &ScopePath::root()).is_none());
    }
}
