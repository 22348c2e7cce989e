//! Element arena with parent/child navigation, typed searches, and a
//! visitor used by the layout passes.

use std::ops::{Index, IndexMut};

use crate::error::{LayoutError, Result};
use crate::layout::tuplet;
use crate::model::*;

/// Result of visiting one element, steering the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctorCode {
    /// Descend into the children
    Continue,
    /// Skip the children and move on to the next sibling
    Siblings,
    /// Abort the whole traversal
    Stop,
}

/// A traversal with accumulated parameters. The functor itself carries the
/// parameters; `visit` runs before the children, `visit_end` after them.
pub trait Functor {
    fn visit(&mut self, tree: &mut ElementTree, id: ElementId) -> FunctorCode;

    fn visit_end(&mut self, _tree: &mut ElementTree, _id: ElementId) -> FunctorCode {
        FunctorCode::Continue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

/// Arena owning every element of a score.
#[derive(Debug, Default, Clone)]
pub struct ElementTree {
    elements: Vec<Option<Element>>,
    roots: Vec<ElementId>,
    generation: u64,
}

impl ElementTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parentless element.
    pub fn add_root(&mut self, element: Element) -> ElementId {
        let id = self.insert(element);
        self.roots.push(id);
        id
    }

    pub fn roots(&self) -> &[ElementId] {
        &self.roots
    }

    /// Counter bumped on every structural change; cached lists compare
    /// against it to know whether they are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Mark derived lists as stale without changing the structure.
    pub fn modify(&mut self) {
        self.generation += 1;
    }

    fn insert(&mut self, mut element: Element) -> ElementId {
        element.parent = None;
        element.children.clear();
        let id = ElementId(self.elements.len());
        self.elements.push(Some(element));
        self.generation += 1;
        id
    }

    /// Attach `element` under `parent`, honoring the parent's whitelist of
    /// supported children. Rejected children leave the tree untouched.
    pub fn add_child(&mut self, parent: ElementId, element: Element) -> Result<ElementId> {
        let parent_kind = self.get(parent).map(Element::kind).ok_or_else(|| {
            LayoutError::InvalidState(format!("parent {parent:?} is not in the tree"))
        })?;
        let child_kind = element.kind();
        if !is_supported_child(parent_kind, child_kind) {
            log::error!("Adding '{child_kind}' to a '{parent_kind}'");
            return Err(LayoutError::UnsupportedChild {
                child: child_kind,
                parent: parent_kind,
            });
        }

        let id = self.insert(element);
        self[id].parent = Some(parent);
        let children = &mut self[parent].children;
        // Bracket and num go first so that they are drawn before the content
        if matches!(child_kind, ElementKind::TupletBracket | ElementKind::TupletNum) {
            children.insert(0, id);
        } else {
            children.push(id);
        }
        Ok(id)
    }

    /// Detach and drop `child` with its subtree. Returns false when `child`
    /// is not a child of `parent`.
    pub fn delete_child(&mut self, parent: ElementId, child: ElementId) -> bool {
        let Some(pos) = self
            .get(parent)
            .and_then(|p| p.children.iter().position(|&c| c == child))
        else {
            return false;
        };
        self[parent].children.remove(pos);
        let mut doomed = vec![child];
        while let Some(id) = doomed.pop() {
            if let Some(el) = self.elements.get_mut(id.0).and_then(Option::take) {
                doomed.extend(el.children);
            }
        }
        self.generation += 1;
        true
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.elements.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.get(id).is_some()
    }

    pub fn kind(&self, id: ElementId) -> Option<ElementKind> {
        self.get(id).map(Element::kind)
    }

    pub fn is(&self, id: ElementId, kind: ElementKind) -> bool {
        self.kind(id) == Some(kind)
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.get(id).and_then(|e| e.parent)
    }

    pub fn children(&self, id: ElementId) -> &[ElementId] {
        self.get(id).map_or(&[], |e| e.children.as_slice())
    }

    /// Number of direct children, optionally restricted to one kind.
    pub fn child_count(&self, id: ElementId, kind: Option<ElementKind>) -> usize {
        self.children(id)
            .iter()
            .filter(|&&c| kind.map_or(true, |k| self.is(c, k)))
            .count()
    }

    /// Nearest ancestor of `kind`, looking at most `max_depth` levels up.
    pub fn first_ancestor(
        &self,
        id: ElementId,
        kind: ElementKind,
        max_depth: Option<usize>,
    ) -> Option<ElementId> {
        let mut current = self.parent(id);
        let mut depth = 1;
        while let Some(ancestor) = current {
            if max_depth.is_some_and(|max| depth > max) {
                return None;
            }
            if self.is(ancestor, kind) {
                return Some(ancestor);
            }
            current = self.parent(ancestor);
            depth += 1;
        }
        None
    }

    /// First descendant whose kind is in `kinds`. `Backward` walks the
    /// children from the last one, still testing a container before its
    /// content, so a chord is found before its notes.
    pub fn find_descendant(
        &self,
        id: ElementId,
        kinds: &[ElementKind],
        max_depth: Option<usize>,
        direction: SearchDirection,
    ) -> Option<ElementId> {
        self.find_descendant_from(id, kinds, max_depth, direction, 1)
    }

    fn find_descendant_from(
        &self,
        id: ElementId,
        kinds: &[ElementKind],
        max_depth: Option<usize>,
        direction: SearchDirection,
        depth: usize,
    ) -> Option<ElementId> {
        if max_depth.is_some_and(|max| depth > max) {
            return None;
        }
        let children = self.children(id);
        let ordered: Box<dyn Iterator<Item = &ElementId>> = match direction {
            SearchDirection::Forward => Box::new(children.iter()),
            SearchDirection::Backward => Box::new(children.iter().rev()),
        };
        for &child in ordered {
            if self.get(child).is_some_and(|c| c.is_any(kinds)) {
                return Some(child);
            }
            if let Some(found) =
                self.find_descendant_from(child, kinds, max_depth, direction, depth + 1)
            {
                return Some(found);
            }
        }
        None
    }

    pub fn find_descendant_by_kind(&self, id: ElementId, kind: ElementKind) -> Option<ElementId> {
        self.find_descendant(id, &[kind], None, SearchDirection::Forward)
    }

    /// All descendants in document order (the element itself excluded).
    pub fn descendants(&self, id: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack: Vec<ElementId> = self.children(id).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// All descendants whose kind is in `kinds`, in document order.
    pub fn find_all_descendants(&self, id: ElementId, kinds: &[ElementKind]) -> Vec<ElementId> {
        self.descendants(id)
            .into_iter()
            .filter(|&d| self.get(d).is_some_and(|e| e.is_any(kinds)))
            .collect()
    }

    /// Depth-first traversal of `id` and its subtree.
    pub fn process<F: Functor + ?Sized>(&mut self, id: ElementId, functor: &mut F) -> FunctorCode {
        if !self.contains(id) {
            return FunctorCode::Continue;
        }
        match functor.visit(self, id) {
            FunctorCode::Stop => return FunctorCode::Stop,
            FunctorCode::Siblings => return FunctorCode::Continue,
            FunctorCode::Continue => {}
        }
        // Children may be added or removed by the functor
        let children = self.children(id).to_vec();
        for child in children {
            if self.process(child, functor) == FunctorCode::Stop {
                return FunctorCode::Stop;
            }
        }
        match functor.visit_end(self, id) {
            FunctorCode::Stop => FunctorCode::Stop,
            _ => FunctorCode::Continue,
        }
    }

    /// Run `functor` over every root.
    pub fn process_all<F: Functor + ?Sized>(&mut self, functor: &mut F) {
        for root in self.roots.clone() {
            if self.process(root, functor) == FunctorCode::Stop {
                break;
            }
        }
    }

    /// Staff with number `n` inside the measure containing `id`.
    pub fn staff_by_n(&self, id: ElementId, n: u32) -> Option<ElementId> {
        let measure = if self.is(id, ElementKind::Measure) {
            id
        } else {
            self.first_ancestor(id, ElementKind::Measure, None)?
        };
        self.children(measure)
            .iter()
            .copied()
            .find(|&s| self.get(s).and_then(Element::staff_attrs).is_some_and(|a| a.n == n))
    }

    /// Whether `note` is a tone of a chord.
    pub fn chord_of(&self, note: ElementId) -> Option<ElementId> {
        if !self.is(note, ElementKind::Note) {
            return None;
        }
        let mut current = self.parent(note);
        while let Some(p) = current {
            match self.kind(p) {
                Some(ElementKind::Chord) => return Some(p),
                Some(ElementKind::Editorial) => current = self.parent(p),
                _ => return None,
            }
        }
        None
    }
}

impl Index<ElementId> for ElementTree {
    type Output = Element;

    fn index(&self, id: ElementId) -> &Element {
        self.elements[id.0]
            .as_ref()
            .unwrap_or_else(|| panic!("element {id:?} was deleted"))
    }
}

impl IndexMut<ElementId> for ElementTree {
    fn index_mut(&mut self, id: ElementId) -> &mut Element {
        self.elements[id.0]
            .as_mut()
            .unwrap_or_else(|| panic!("element {id:?} was deleted"))
    }
}

/// Children each container accepts.
fn is_supported_child(parent: ElementKind, child: ElementKind) -> bool {
    use ElementKind::*;
    match parent {
        Tuplet => tuplet::is_supported_child(child),
        Chord => matches!(child, Note | Artic | Stem | Dot | Editorial),
        Note => matches!(child, Accid | Artic | Stem | Dot),
        Stem => child == Flag,
        Measure => child == Staff,
        Staff => child == Layer,
        TupletBracket | TupletNum | Accid | Artic | Dot | Flag | Clef => false,
        _ => child != Measure && child != Staff,
    }
}
