//! Record → document extraction.
//!
//! Builds the attribute map sent to the remote index:
//!
//! 1. base attributes: the custom serializer if one is declared, else the
//!    allow-list, else every native field of the record;
//! 2. additional attributes are overlaid on top;
//! 3. binary fields become text (strict, or lossy with
//!    `force_utf8_encoding`);
//! 4. with `sanitize`, HTML markup is stripped from every string, at any
//!    depth.
//!
//! [`build_document`] then attaches the object id and refuses a blank one.

use serde_json::{Map, Value};

use crate::config::{Attribute, AttributeSource, IndexConfiguration};
use crate::error::{Result, SyncError};
use crate::models::Document;
use crate::store::{RawValue, Record, StoreAdapter};

/// Extract the attribute map of `record` for `config`.
pub fn attributes_of<R: Record>(
    record: &R,
    config: &IndexConfiguration<R>,
    adapter: &dyn StoreAdapter<R>,
) -> Result<Map<String, Value>> {
    let mut attrs = if let Some(serialize) = config.serializer() {
        serialize(record).map_err(|e| SyncError::extraction("<serializer>", e))?
    } else if config.attributes().is_empty() {
        adapter.default_attributes(record)
    } else {
        read_attributes(record, config.attributes(), config.force_utf8_encoding())?
    };
    let extra = read_attributes(
        record,
        config.additional_attributes(),
        config.force_utf8_encoding(),
    )?;
    attrs.extend(extra);

    if config.sanitize() {
        for value in attrs.values_mut() {
            sanitize_value(value);
        }
    }
    Ok(attrs)
}

/// Build the remote document for `record`.
///
/// Fails with [`ConfigError::BlankObjectId`](crate::error::ConfigError::BlankObjectId)
/// before any attribute is computed when the id is blank.
pub fn build_document<R: Record>(
    record: &R,
    config: &IndexConfiguration<R>,
    adapter: &dyn StoreAdapter<R>,
) -> Result<Document> {
    let object_id = config.object_id_of(record);
    if crate::models::is_blank(&object_id) {
        return Err(crate::error::ConfigError::BlankObjectId.into());
    }
    let attrs = attributes_of(record, config, adapter)?;
    Ok(Document::new(object_id, attrs)?)
}

/// Names of the attributes `config` would emit for `record`.
///
/// Used by change detection; computing the names may require running the
/// serializer.
pub fn attribute_names<R: Record>(
    record: &R,
    config: &IndexConfiguration<R>,
    adapter: &dyn StoreAdapter<R>,
) -> Result<Vec<String>> {
    let mut names: Vec<String> = if let Some(serialize) = config.serializer() {
        serialize(record)
            .map_err(|e| SyncError::extraction("<serializer>", e))?
            .keys()
            .cloned()
            .collect()
    } else if config.attributes().is_empty() {
        adapter.default_attributes(record).keys().cloned().collect()
    } else {
        config.attributes().iter().map(|a| a.name.clone()).collect()
    };
    for a in config.additional_attributes() {
        if !names.contains(&a.name) {
            names.push(a.name.clone());
        }
    }
    Ok(names)
}

fn read_attributes<R: Record>(
    record: &R,
    attributes: &[Attribute<R>],
    force_utf8: bool,
) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for attr in attributes {
        let value = match &attr.source {
            AttributeSource::Field => match record.raw_field(&attr.name) {
                Some(raw) => decode_raw(&attr.name, raw, force_utf8)?,
                None => Value::Null,
            },
            AttributeSource::Computed(f) => {
                f(record).map_err(|e| SyncError::extraction(attr.name.clone(), e))?
            }
        };
        out.insert(attr.name.clone(), value);
    }
    Ok(out)
}

/// Turn a raw field into JSON. Invalid UTF-8 is an error unless `force_utf8`.
fn decode_raw(name: &str, raw: RawValue, force_utf8: bool) -> Result<Value> {
    match raw {
        RawValue::Json(v) => Ok(v),
        RawValue::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Ok(Value::String(s)),
            Err(e) if force_utf8 => Ok(Value::String(
                String::from_utf8_lossy(e.as_bytes()).into_owned(),
            )),
            Err(e) => Err(SyncError::extraction(name, anyhow::Error::new(e))),
        },
    }
}

/// Strip markup from every string inside `value`.
pub fn sanitize_value(value: &mut Value) {
    match value {
        Value::String(s) => {
            if s.contains('<') || s.contains('&') {
                *s = strip_markup(s);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(sanitize_value),
        Value::Object(map) => map.values_mut().for_each(sanitize_value),
        _ => {}
    }
}

/// Keep only the text content of an HTML fragment.
///
/// Well-formed fragments go through an XML event reader so entities are
/// decoded; anything it rejects falls back to dropping `<...>` spans. A `<`
/// that does not open a tag is text in both paths.
pub fn strip_markup(input: &str) -> String {
    let wrapped = format!("<fragment>{}</fragment>", escape_stray_angles(input));
    let mut reader = quick_xml::Reader::from_reader(wrapped.as_bytes());
    reader.config_mut().check_end_names = false;
    let mut out = String::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Text(te)) => match te.unescape() {
                Ok(text) => out.push_str(&text),
                Err(_) => out.push_str(&String::from_utf8_lossy(&te)),
            },
            Ok(quick_xml::events::Event::CData(cd)) => {
                out.push_str(&String::from_utf8_lossy(&cd));
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => return strip_tags_lenient(input),
            _ => {}
        }
        buf.clear();
    }
    out
}

/// Length of the tag starting at `s` (which begins with `<`), if it is one:
/// a letter, `/`, `!` or `?` right after the `<` and a closing `>` later on.
fn tag_len(s: &str) -> Option<usize> {
    let next = s[1..].chars().next()?;
    if !(next.is_ascii_alphabetic() || matches!(next, '/' | '!' | '?')) {
        return None;
    }
    s.find('>').map(|close| close + 1)
}

fn escape_stray_angles(input: &str) -> std::borrow::Cow<'_, str> {
    if !input.match_indices('<').any(|(i, _)| tag_len(&input[i..]).is_none()) {
        return std::borrow::Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len() + 8);
    let mut rest = input;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        match tag_len(&rest[open..]) {
            Some(len) => {
                out.push_str(&rest[open..open + len]);
                rest = &rest[open + len..];
            }
            None => {
                out.push_str("&lt;");
                rest = &rest[open + 1..];
            }
        }
    }
    out.push_str(rest);
    std::borrow::Cow::Owned(out)
}

fn strip_tags_lenient(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        match tag_len(&rest[open..]) {
            Some(len) => rest = &rest[open + len..],
            None => {
                // not a tag: keep the `<` as text
                out.push('<');
                rest = &rest[open + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}
