//! Layout pipeline.
//!
//! A run resets every drawing record, seeds positions, prepares chords,
//! beams, stems and tuplets and then adjusts the tuplet decorations, first
//! horizontally and then vertically. All per-pass derived state lives in a
//! [`LayoutContext`] that is dropped or cleared between runs.

mod constants;
pub(crate) mod list;

pub mod alignment;
pub mod beam;
pub mod chord;
pub mod stem;
pub mod tuplet;

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::model::{Drawing, ElementId, ElementKind, StaffRel};
use crate::options::LayoutOptions;
use crate::report::LayoutReport;
use crate::tree::ElementTree;

use self::beam::BeamDrawing;
use self::chord::{ChordDrawing, ClusterRef};
use self::list::CachedList;
use self::tuplet::{AdjustTupletsX, AdjustTupletsY, TupletDrawing};

/// Pass-scoped derived state, keyed by the owning element.
#[derive(Debug, Default)]
pub struct LayoutContext {
    pub(crate) lists: HashMap<ElementId, CachedList>,
    pub(crate) chords: HashMap<ElementId, ChordDrawing>,
    /// Cluster membership of chord tones
    pub(crate) clusters: HashMap<ElementId, ClusterRef>,
    pub(crate) beams: HashMap<ElementId, BeamDrawing>,
    pub(crate) tuplets: HashMap<ElementId, TupletDrawing>,
}

impl LayoutContext {
    pub fn reset(&mut self) {
        self.lists.clear();
        self.chords.clear();
        self.clusters.clear();
        self.beams.clear();
        self.tuplets.clear();
    }

    pub fn chord(&self, chord: ElementId) -> Option<&ChordDrawing> {
        self.chords.get(&chord)
    }

    pub fn cluster_of(&self, note: ElementId) -> Option<&ClusterRef> {
        self.clusters.get(&note)
    }

    pub fn beam(&self, beam: ElementId) -> Option<&BeamDrawing> {
        self.beams.get(&beam)
    }

    pub fn tuplet(&self, tuplet: ElementId) -> Option<&TupletDrawing> {
        self.tuplets.get(&tuplet)
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Size (percent) of the staff an element belongs to.
pub(crate) fn staff_size_of(tree: &ElementTree, id: ElementId) -> i32 {
    let staff = if tree.is(id, ElementKind::Staff) {
        Some(id)
    } else {
        tree.first_ancestor(id, ElementKind::Staff, None)
    };
    staff
        .and_then(|s| tree[s].staff_attrs())
        .map_or(100, |attrs| attrs.size)
}

/// Where `staff` sits relative to `reference`.
pub(crate) fn staff_rel(tree: &ElementTree, staff: ElementId, reference: ElementId) -> StaffRel {
    if staff == reference {
        StaffRel::None
    } else if tree[staff].drawing.y > tree[reference].drawing.y {
        StaffRel::Above
    } else {
        StaffRel::Below
    }
}

/// Staff an element is drawn on: its cross staff, else its own.
pub(crate) fn drawing_staff(tree: &ElementTree, id: ElementId) -> Option<ElementId> {
    tree[id]
        .drawing
        .cross_staff
        .or_else(|| tree.first_ancestor(id, ElementKind::Staff, None))
}

fn all_of(tree: &ElementTree, kinds: &[ElementKind]) -> Vec<ElementId> {
    let mut out = Vec::new();
    for &root in tree.roots() {
        if tree.kind(root).is_some_and(|k| kinds.contains(&k)) {
            out.push(root);
        }
        out.extend(tree.find_all_descendants(root, kinds));
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════

/// Runs the layout passes over a tree.
pub struct Layout<'a> {
    options: &'a LayoutOptions,
    ctx: LayoutContext,
}

impl<'a> Layout<'a> {
    pub fn new(options: &'a LayoutOptions) -> Self {
        Self {
            options,
            ctx: LayoutContext::default(),
        }
    }

    /// State left by the last run.
    pub fn context(&self) -> &LayoutContext {
        &self.ctx
    }

    /// Lay out the whole tree and summarise the result.
    pub fn run(&mut self, tree: &mut ElementTree) -> Result<LayoutReport> {
        self.options.validate()?;
        self.reset(tree);

        log::debug!("Alignment");
        alignment::align(tree, self.options)?;

        log::debug!("Preparing chords, beams and stems");
        for chord in all_of(tree, &[ElementKind::Chord]) {
            list::get_list(tree, &mut self.ctx, chord);
        }
        for beam in all_of(tree, &[ElementKind::Beam, ElementKind::FTrem]) {
            beam::layout_beam(tree, &mut self.ctx, self.options, beam);
        }
        self.layout_unbeamed_stems(tree);
        for chord in all_of(tree, &[ElementKind::Chord]) {
            chord::adjust_cluster_offsets(tree, &mut self.ctx, self.options, chord);
            chord::place_accidentals(tree, &mut self.ctx, self.options, chord);
        }
        alignment::place_artics(tree, &mut self.ctx, self.options);

        log::debug!("Preparing tuplets");
        for tuplet in all_of(tree, &[ElementKind::Tuplet]) {
            if let Err(e) = tuplet::prepare_layer_element_parts(tree, &mut self.ctx, tuplet) {
                log::error!("Tuplet {}: {e}", tuplet.index());
                continue;
            }
            tuplet::calc_drawing_bracket_and_num_pos(tree, &mut self.ctx, tuplet, self.options.tuplet_num_head);
        }

        log::debug!("Adjusting tuplets");
        tree.process_all(&mut AdjustTupletsX {
            ctx: &mut self.ctx,
            options: self.options,
        });
        tree.process_all(&mut AdjustTupletsY {
            ctx: &mut self.ctx,
            options: self.options,
        });

        Ok(LayoutReport::build(tree, &mut self.ctx))
    }

    /// Drop all drawing state so a run never builds on a previous one.
    fn reset(&mut self, tree: &mut ElementTree) {
        let mut all = Vec::new();
        for &root in tree.roots() {
            all.push(root);
            all.extend(tree.descendants(root));
        }
        for &id in &all {
            tree[id].drawing = Drawing::default();
        }
        self.ctx.reset();
        let tuplets: Vec<ElementId> = all.into_iter().filter(|&id| tree.is(id, ElementKind::Tuplet)).collect();
        for tuplet in tuplets {
            tuplet::reset_drawing(tree, &mut self.ctx, tuplet);
            tuplet::reset_horizontal_alignment(&mut self.ctx, tuplet);
        }
    }

    /// Stems of notes and chords that no beam has claimed.
    fn layout_unbeamed_stems(&mut self, tree: &mut ElementTree) {
        let beamed: HashSet<ElementId> = self
            .ctx
            .beams
            .values()
            .flat_map(|b| b.coords.iter().filter_map(|c| c.element))
            .collect();
        for id in all_of(tree, &[ElementKind::Note, ElementKind::Chord]) {
            if beamed.contains(&id) || tree.chord_of(id).is_some() || stem::drawing_stem(tree, id).is_none() {
                continue;
            }
            let dir = stem::calc_unbeamed_stem_dir(tree, &mut self.ctx, id);
            stem::set_stem_geometry(tree, &mut self.ctx, self.options, id, dir, None);
        }
    }
}

/// Lay out `tree` with `options`.
pub fn run_layout(tree: &mut ElementTree, options: &LayoutOptions) -> Result<LayoutReport> {
    Layout::new(options).run(tree)
}
