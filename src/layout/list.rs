//! Filtered lists of descendant elements.
//!
//! Chords, beams, fingered tremolos and tuplets each work on a filtered view
//! of their descendants. The view is cached in the [`LayoutContext`] and
//! rebuilt when the tree generation has moved on since it was computed.

use crate::model::{ElementId, ElementKind};
use crate::tree::ElementTree;

use super::{beam, chord, tuplet, LayoutContext};

#[derive(Debug, Clone, Default)]
pub(crate) struct CachedList {
    pub(crate) generation: u64,
    pub(crate) items: Vec<ElementId>,
}

/// Filtered descendant list of `owner`, rebuilt if stale.
pub(crate) fn get_list(tree: &ElementTree, ctx: &mut LayoutContext, owner: ElementId) -> Vec<ElementId> {
    if let Some(cached) = ctx.lists.get(&owner) {
        if cached.generation == tree.generation() {
            return cached.items.clone();
        }
    }

    let mut items = tree.descendants(owner);
    match tree.kind(owner) {
        Some(ElementKind::Chord) => chord::filter_list(tree, ctx, owner, &mut items),
        Some(ElementKind::Beam) | Some(ElementKind::FTrem) => beam::filter_list(tree, &mut items),
        Some(ElementKind::Tuplet) => tuplet::filter_list(tree, &mut items),
        _ => {}
    }

    ctx.lists.insert(
        owner,
        CachedList {
            generation: tree.generation(),
            items: items.clone(),
        },
    );
    items
}

/// Position of `element` in the filtered list of `owner`.
pub(crate) fn list_index(
    tree: &ElementTree,
    ctx: &mut LayoutContext,
    owner: ElementId,
    element: ElementId,
) -> Option<usize> {
    get_list(tree, ctx, owner).iter().position(|&e| e == element)
}
