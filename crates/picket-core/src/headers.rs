// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Parsed header sets handed over by the host.
//!
//! The engine never parses HTTP itself; the host delivers name/value pairs
//! already split. Order is preserved; name lookup is case-insensitive.

use bytes::Bytes;

use crate::field::{norm, Field};

/// Ordered set of header name/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, Bytes)>,
}

impl HeaderSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pair, preserving arrival order.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value under `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        let want = norm(name);
        self.entries
            .iter()
            .find(|(n, _)| norm(n) == want)
            .map(|(_, v)| v)
    }

    /// All values under `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Bytes> {
        let want = norm(name);
        self.entries
            .iter()
            .filter(move |(n, _)| norm(n) == want)
            .map(|(_, v)| v)
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no pairs are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates pairs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Projects the set into a list field for the data store, one element
    /// per pair, element names carrying the header names.
    pub fn to_field(&self, name: impl Into<String>) -> Field {
        let items = self
            .entries
            .iter()
            .map(|(n, v)| Field::bytes(n.clone(), v.clone()))
            .collect();
        Field::list(name, items)
    }
}

impl FromIterator<(String, Bytes)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (String, Bytes)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_ordered() {
        let mut headers = HeaderSet::new();
        headers.add("Host", "a");
        headers.add("Cookie", "one");
        headers.add("cookie", "two");
        assert_eq!(headers.get("HOST").unwrap(), "a");
        let cookies: Vec<_> = headers.get_all("Cookie").collect();
        assert_eq!(cookies, vec!["one", "two"]);
    }

    #[test]
    fn field_projection_keeps_names() {
        let mut headers = HeaderSet::new();
        headers.add("Host", "h");
        let field = headers.to_field("REQUEST_HEADERS");
        assert_eq!(field.as_list().unwrap()[0].name, "Host");
    }
}
