// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Typed fields: the values rules inspect.
//!
//! A field is a named value of one of four shapes: a signed number, an
//! opaque byte string, an ordered list of fields, or a stream of byte
//! chunks fed incrementally by the host. Field names are case-insensitive
//! for lookup; the original spelling is preserved for logs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

/// Normalizes a field name for case-insensitive lookup.
pub(crate) fn norm(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Shared handle over a finite sequence of byte chunks.
///
/// The host pushes chunks as body data arrives; stream-phase operators pop
/// them. Clones share the same underlying queue.
#[derive(Clone, Default)]
pub struct StreamHandle {
    chunks: Arc<Mutex<VecDeque<Bytes>>>,
}

impl StreamHandle {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk to the stream.
    pub fn push_chunk(&self, chunk: Bytes) {
        if let Ok(mut q) = self.chunks.lock() {
            q.push_back(chunk);
        }
    }

    /// Removes and returns the oldest buffered chunk.
    pub fn next_chunk(&self) -> Option<Bytes> {
        self.chunks.lock().ok().and_then(|mut q| q.pop_front())
    }

    /// Number of chunks currently buffered.
    pub fn buffered(&self) -> usize {
        self.chunks.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl core::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("buffered", &self.buffered())
            .finish()
    }
}

impl PartialEq for StreamHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.chunks, &other.chunks)
    }
}

impl Eq for StreamHandle {}

/// Value shapes a field can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Signed number.
    Num(i64),
    /// Opaque byte string.
    Bytes(Bytes),
    /// Ordered list of fields.
    List(Vec<Field>),
    /// Stream of byte chunks (shared handle).
    Stream(StreamHandle),
}

/// A named, typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Name as originally spelled; lookup is case-insensitive.
    pub name: String,
    /// The carried value.
    pub value: FieldValue,
}

impl Field {
    /// Numeric field.
    pub fn num(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Num(value),
        }
    }

    /// Byte-string field.
    pub fn bytes(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Bytes(value.into()),
        }
    }

    /// List field.
    pub fn list(name: impl Into<String>, items: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::List(items),
        }
    }

    /// Stream field.
    pub fn stream(name: impl Into<String>, handle: StreamHandle) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Stream(handle),
        }
    }

    /// Byte-string view, when this field carries bytes.
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match &self.value {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// List view, when this field carries a list.
    pub fn as_list(&self) -> Option<&[Field]> {
        match &self.value {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Numeric view, when this field carries a number.
    pub const fn as_num(&self) -> Option<i64> {
        match &self.value {
            FieldValue::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// String form used by `%{NAME}` expansion.
    ///
    /// Numbers render in decimal; byte strings render as-is; a list renders
    /// its first element (a zero-element list renders empty, matching its
    /// absent-field semantics); streams render empty.
    pub fn render(&self) -> Bytes {
        match &self.value {
            FieldValue::Num(n) => Bytes::from(n.to_string()),
            FieldValue::Bytes(b) => b.clone(),
            FieldValue::List(items) => items.first().map(Field::render).unwrap_or_default(),
            FieldValue::Stream(_) => Bytes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_forms() {
        assert_eq!(Field::num("n", -42).render(), Bytes::from("-42"));
        assert_eq!(Field::bytes("b", "hi").render(), Bytes::from("hi"));
        let list = Field::list("l", vec![Field::bytes("0", "first"), Field::bytes("1", "x")]);
        assert_eq!(list.render(), Bytes::from("first"));
        assert_eq!(Field::list("e", Vec::new()).render(), Bytes::new());
        assert_eq!(Field::stream("s", StreamHandle::new()).render(), Bytes::new());
    }

    #[test]
    fn stream_clones_share_chunks() {
        let a = StreamHandle::new();
        let b = a.clone();
        a.push_chunk(Bytes::from("one"));
        assert_eq!(b.next_chunk(), Some(Bytes::from("one")));
        assert_eq!(a.next_chunk(), None);
        assert_eq!(a, b);
    }
}
