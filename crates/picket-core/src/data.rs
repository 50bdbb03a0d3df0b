// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Per-transaction data store and `%{NAME}` expansion.

use bytes::{Bytes, BytesMut};
use rustc_hash::FxHashMap;

use crate::field::{norm, Field, FieldValue};
use crate::status::{EngineError, EngineResult};

/// Well-known name of the capture list.
pub const CAPTURE: &str = "CAPTURE";

/// Default bound on expanded output, generous enough for any header line.
pub const EXPAND_LIMIT: usize = 8192;

/// Case-insensitive per-transaction key/value context.
///
/// Names of the form `BASE:sub` resolve into list fields: a numeric `sub`
/// indexes the list (`CAPTURE:0`), any other `sub` matches elements by
/// case-insensitive name (`REQUEST_HEADERS:Host`).
#[derive(Debug, Default)]
pub struct TxData {
    vars: FxHashMap<String, Field>,
}

impl TxData {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a field by (case-insensitive) name, resolving `BASE:sub`
    /// subscripts into list elements.
    pub fn get(&self, name: &str) -> Option<&Field> {
        if let Some(field) = self.vars.get(&norm(name)) {
            return Some(field);
        }
        let (base, sub) = name.rsplit_once(':')?;
        let list = self.vars.get(&norm(base))?.as_list()?;
        if let Ok(index) = sub.parse::<usize>() {
            return list.get(index);
        }
        let want = norm(sub);
        list.iter().find(|f| norm(&f.name) == want)
    }

    /// Stores a field under its own name, replacing any previous value.
    pub fn set(&mut self, field: Field) {
        self.vars.insert(norm(&field.name), field);
    }

    /// Removes and returns the field stored under `name`.
    pub fn remove(&mut self, name: &str) -> Option<Field> {
        self.vars.remove(&norm(name))
    }

    /// Appends `item` to the list stored under `name`, creating the list
    /// when absent.
    ///
    /// # Errors
    /// `BadValue` when `name` holds a non-list field.
    pub fn list_append(&mut self, name: &str, item: Field) -> EngineResult<()> {
        let entry = self
            .vars
            .entry(norm(name))
            .or_insert_with(|| Field::list(name, Vec::new()));
        match &mut entry.value {
            FieldValue::List(items) => {
                items.push(item);
                Ok(())
            }
            _ => Err(EngineError::BadValue(format!("{name} is not a list"))),
        }
    }

    /// Replaces the capture list, clearing any previous capture first.
    ///
    /// Items land at `<prefix>:0 .. <prefix>:N-1`; the default prefix is
    /// [`CAPTURE`].
    pub fn set_capture(&mut self, prefix: Option<&str>, items: Vec<Bytes>) {
        let base = prefix.unwrap_or(CAPTURE);
        self.remove(base);
        let fields = items
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| Field::bytes(i.to_string(), chunk))
            .collect();
        self.set(Field::list(base, fields));
    }

    /// Expands `%{NAME}` tokens in `template`.
    ///
    /// Unknown names expand to empty bytes; `%%{` escapes a literal `%{`;
    /// a template with no tokens is returned verbatim. The output is bounded
    /// by `max_len` bytes.
    ///
    /// # Errors
    /// `Truncated` when the expanded output would exceed `max_len`.
    pub fn expand(&self, template: &[u8], max_len: usize) -> EngineResult<Bytes> {
        let mut out = BytesMut::with_capacity(template.len().min(max_len));
        let mut rest = template;
        loop {
            let Some(pos) = find(rest, b"%{") else {
                push_bounded(&mut out, rest, max_len)?;
                return Ok(out.freeze());
            };
            if pos > 0 && rest[pos - 1] == b'%' {
                // `%%{` escapes the token opener.
                push_bounded(&mut out, &rest[..pos - 1], max_len)?;
                push_bounded(&mut out, b"%{", max_len)?;
                rest = &rest[pos + 2..];
                continue;
            }
            push_bounded(&mut out, &rest[..pos], max_len)?;
            let body = &rest[pos + 2..];
            let Some(end) = find(body, b"}") else {
                // Unterminated token: emit literally.
                push_bounded(&mut out, &rest[pos..], max_len)?;
                return Ok(out.freeze());
            };
            let name = String::from_utf8_lossy(&body[..end]);
            if let Some(field) = self.get(&name) {
                push_bounded(&mut out, &field.render(), max_len)?;
            }
            rest = &body[end + 1..];
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len().max(1))
        .position(|w| w == needle)
}

fn push_bounded(out: &mut BytesMut, chunk: &[u8], max_len: usize) -> EngineResult<()> {
    if out.len() + chunk.len() > max_len {
        return Err(EngineError::Truncated);
    }
    out.extend_from_slice(chunk);
    Ok(())
}
