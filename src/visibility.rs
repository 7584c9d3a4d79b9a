//! Hidden-flag propagation.
//!
//! Hiding a node hides its whole subtree. Showing a node shows its subtree.
//! Showing a Sector or anything above it also shows every strict ancestor;
//! showing a Cell, Village or Facility leaves the levels above it alone, so
//! a single Cell can be published under a Sector that stays hidden.

use crate::cache::DescendantCache;
use crate::db::GeoStore;
use crate::error::Result;
use crate::geography::{Id, Kind, NodeRef};
use std::sync::Arc;

/// Rows whose flag actually flipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisibilityChange {
    pub node: usize,
    pub descendants: usize,
    pub ancestors: usize,
}

impl VisibilityChange {
    pub fn total(&self) -> usize {
        self.node + self.descendants + self.ancestors
    }

    pub fn is_noop(&self) -> bool {
        self.total() == 0
    }
}

/// Deepest kind whose un-hiding also un-hides its ancestors.
pub const ANCESTOR_CASCADE_LIMIT: Kind = Kind::Sector;

/// Whether showing a node of `kind` walks up to its ancestors.
pub fn shows_ancestors(kind: Kind) -> bool {
    !kind.is_deeper_than(ANCESTOR_CASCADE_LIMIT)
}

/// Sets `hidden` on `node` and cascades. A node already in the requested
/// state is left alone, subtree included.
///
/// # Arguments
///
/// * `cache` - Source of the descendant id lists to update
/// * `hidden` - `true` hides the subtree; `false` shows it, plus the strict
///   ancestors when [`shows_ancestors`] holds for the node's kind
///
/// # Returns
///
/// The number of rows that actually flipped, per part of the tree.
pub fn toggle_visibility(
    store: &mut GeoStore,
    cache: &DescendantCache,
    node: NodeRef,
    hidden: bool,
) -> Result<VisibilityChange> {
    if store.node(node)?.hidden == hidden {
        return Ok(VisibilityChange::default());
    }

    let descendants: Vec<(Kind, Arc<[Id]>)> = cache.lookup(store).all_descendants(node);
    let ancestors = if !hidden && shows_ancestors(node.kind) {
        store.ancestors(node)?
    } else {
        Vec::new()
    };

    let change = store.transaction(|s| {
        let mut change = VisibilityChange {
            node: s.set_hidden(node.kind, &[node.id], hidden),
            ..VisibilityChange::default()
        };
        for (kind, ids) in &descendants {
            change.descendants += s.set_hidden(*kind, ids, hidden);
        }
        for ancestor in &ancestors {
            change.ancestors += s.set_hidden(ancestor.kind, &[ancestor.id], false);
        }
        Ok(change)
    })?;

    log::debug!(
        "{} {}: {} descendants, {} ancestors changed",
        if hidden { "Hid" } else { "Showed" },
        node,
        change.descendants,
        change.ancestors
    );
    Ok(change)
}
