//! Record writer.

use crate::codec::migrations::FORMAT_VERSION;
use crate::codec::CodecResult;
use crate::model::field::FieldValue;
use crate::model::ids::{BaseId, ScopePath, TypeTag};
use crate::model::kind::ID_KEYWORD;
use crate::model::object::ModelObject;
use crate::model::reference::{RefSlot, RefValue};
use crate::registry::ObjectRegistry;
use log::info;
use std::io::Write;
use std::time::Instant;

pub(crate) const VERSION_KEYWORD: &str = "MODELGRAPH_FILE_VERSION";
pub(crate) const MODEL_ID_KEYWORD: &str = "MODEL_ID";
pub(crate) const NULL_TOKEN: &str = "NULL";

/// Writes every connected object to `out`; returns the record count.
///
/// Scopes are written in path order, types in tag order and objects in
/// head-list order.
pub fn serialize(registry: &ObjectRegistry, out: &mut impl Write) -> CodecResult<usize> {
    let started_at = Instant::now();
    let (text, records) = render(registry);
    out.write_all(text.as_bytes())?;
    out.flush()?;
    info!(
        "event=model_save module=codec status=ok duration_ms={} records={}",
        started_at.elapsed().as_millis(),
        records
    );
    Ok(records)
}

/// Renders the registry as a model stream.
pub fn to_string(registry: &ObjectRegistry) -> String {
    render(registry).0
}

fn render(registry: &ObjectRegistry) -> (String, usize) {
    let mut text = format!(
        "{VERSION_KEYWORD} {FORMAT_VERSION}\n{MODEL_ID_KEYWORD} {}\n",
        registry.model_id()
    );
    let mut records = 0;
    for types in registry.heads().values() {
        for ids in types.values() {
            for object in ids.iter().filter_map(|id| registry.find_by_id(*id)) {
                text.push('\n');
                render_record(registry, object, &mut text);
                records += 1;
            }
        }
    }
    (text, records)
}

fn render_record(registry: &ObjectRegistry, object: &ModelObject, text: &mut String) {
    text.push_str(&header_tokens(
        object.type_tag(),
        object.base_id(),
        object.scope(),
    ));
    text.push_str(" {\n");
    text.push_str(&format!("  {ID_KEYWORD} = {};\n", object.local_id()));

    for slot in object.fields().iter().filter(|slot| slot.is_printable()) {
        text.push_str(&format!(
            "  {} = {};\n",
            slot.keyword(),
            format_value(slot.value())
        ));
    }

    for field in object.references().iter().filter(|field| field.is_printable()) {
        let rendered = match field.value() {
            RefValue::Single(slot) => format_slot(registry, slot),
            RefValue::List(slots) => slots
                .iter()
                .map(|slot| format_slot(registry, slot))
                .collect::<Vec<_>>()
                .join(", "),
        };
        text.push_str(&format!("  {} = {};\n", field.keyword(), rendered));
    }
    text.push_str("}\n");
}

fn header_tokens(type_tag: &TypeTag, base_id: BaseId, scope: &ScopePath) -> String {
    if scope.is_root() {
        format!("{type_tag} {base_id}")
    } else {
        format!("{type_tag} {base_id} {scope}")
    }
}

fn format_slot(registry: &ObjectRegistry, slot: &RefSlot) -> String {
    match slot {
        RefSlot::Unresolved(pending) => {
            header_tokens(&pending.type_tag, pending.target, &pending.scope)
        }
        RefSlot::Resolved(Some(target)) => match registry.find_by_id(*target) {
            Some(object) => header_tokens(object.type_tag(), object.base_id(), object.scope()),
            None => NULL_TOKEN.to_string(),
        },
        RefSlot::Resolved(None) => NULL_TOKEN.to_string(),
    }
}

pub(crate) fn format_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Int(value) => value.to_string(),
        FieldValue::Real(value) => format_real(*value),
        FieldValue::Bool(value) => value.to_string(),
        FieldValue::Text(value) => quote_text(value),
        FieldValue::Reals(values) => values
            .iter()
            .map(|value| format_real(*value))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Shortest representation that parses back to the same bits.
fn format_real(value: f64) -> String {
    format!("{value:?}")
}

fn quote_text(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}
