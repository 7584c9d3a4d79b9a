//! Cache key namespaces.
//!
//! Ids are allocated per table, so `"{id}_{kind}"` alone would collide between
//! (say) Country 1 and District 1. Each node kind therefore gets its own
//! namespace and descendant keys live inside it:
//! `sector::12_village`.

use crate::geography::{Id, Kind, NodeRef};
use bytes::Bytes;
use std::fmt;

/// Key prefix for the cache entries of one node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Namespace {
    kind: Kind,
}

impl Namespace {
    pub const SEPARATOR: &'static str = "::";

    /// Namespace holding the descendant caches of nodes of `kind`.
    pub fn for_kind(kind: Kind) -> Self {
        Self { kind }
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Prefixes `key` with the namespace.
    ///
    /// # Arguments
    ///
    /// * `key` - Key inside the namespace, e.g. `12_village`
    ///
    /// # Returns
    ///
    /// `{namespace}::{key}` as raw bytes for the cache backend.
    pub fn key<K: AsRef<[u8]>>(&self, key: K) -> Bytes {
        let name = self.name().as_bytes();
        let key_bytes = key.as_ref();
        let mut result = Vec::with_capacity(name.len() + Self::SEPARATOR.len() + key_bytes.len());

        result.extend_from_slice(name);
        result.extend_from_slice(Self::SEPARATOR.as_bytes());
        result.extend_from_slice(key_bytes);

        Bytes::from(result)
    }

    /// Prefix shared by every key in the namespace, for prefix scans.
    pub fn prefix(&self) -> Bytes {
        self.key(b"")
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Cache key for the ids of every `descendant` below `node`.
pub fn descendant_key(node: NodeRef, descendant: Kind) -> Bytes {
    Namespace::for_kind(node.kind).key(format!("{}_{}", node.id, descendant.as_str()))
}

/// Inverse of [`descendant_key`].
pub fn parse_descendant_key(key: &[u8]) -> Option<(NodeRef, Kind)> {
    let text = std::str::from_utf8(key).ok()?;
    let (ns, rest) = text.split_once(Namespace::SEPARATOR)?;
    let owner: Kind = ns.parse().ok()?;
    let (id, descendant) = rest.split_once('_')?;
    let id: Id = id.parse().ok()?;
    let descendant: Kind = descendant.parse().ok()?;
    Some((NodeRef::new(owner, id), descendant))
}
