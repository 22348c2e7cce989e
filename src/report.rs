//! Serializable summary of a layout run.
//!
//! Elements are named by their `xml:id` when the encoding has one, and by
//! kind and arena index otherwise.

use serde::Serialize;

use crate::error::{LayoutError, Result};
use crate::layout::{beam, chord, stem, LayoutContext};
use crate::model::{BeamPlace, BoundingBox, ElementId, ElementKind, StaffRel, StemDirection};
use crate::tree::ElementTree;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutReport {
    pub measures: usize,
    pub chords: Vec<ChordReport>,
    pub beams: Vec<BeamReport>,
    pub tuplets: Vec<TupletReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChordReport {
    pub id: String,
    pub stem_dir: StemDirection,
    /// Notes in ascending pitch order
    pub notes: Vec<NoteReport>,
    pub clusters: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteReport {
    pub id: String,
    pub diatonic: i32,
    pub x: i32,
    pub y: i32,
    /// Horizontal shift away from the chord x (flipped noteheads)
    pub offset: i32,
    /// 1-based position in its cluster
    pub cluster_position: Option<usize>,
    pub accid_x: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeamReport {
    pub id: String,
    pub kind: ElementKind,
    pub place: BeamPlace,
    pub horizontal: bool,
    pub cue_size: bool,
    pub starting_x: i32,
    pub starting_y: i32,
    pub slope: f64,
    pub members: Vec<BeamMemberReport>,
    /// Staves the beam reaches into, as `[above, below]`
    pub overflow: Option<[Option<String>; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeamMemberReport {
    pub id: String,
    pub place: BeamPlace,
    pub stem_dir: StemDirection,
    pub stem_len: i32,
    pub y_beam: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TupletReport {
    pub id: String,
    pub bracket_pos: StaffRel,
    pub num_pos: StaffRel,
    pub left: Option<String>,
    pub right: Option<String>,
    pub bracket: Option<PartReport>,
    pub num: Option<PartReport>,
    pub bracket_aligned_beam: Option<String>,
    pub num_aligned_beam: Option<String>,
    pub num_in_bracket: bool,
}

/// Bracket or num geometry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartReport {
    pub y_rel: i32,
    pub x_rel_left: i32,
    pub x_rel_right: i32,
    pub bbox: Option<BoundingBox>,
}

/// Name an element for the report.
pub fn label(tree: &ElementTree, id: ElementId) -> String {
    match &tree[id].xml_id {
        Some(xml_id) => xml_id.clone(),
        None => format!("{}-{}", tree[id].kind(), id.index()),
    }
}

impl LayoutReport {
    pub(crate) fn build(tree: &ElementTree, ctx: &mut LayoutContext) -> Self {
        let mut report = LayoutReport::default();
        for &root in tree.roots() {
            if tree.is(root, ElementKind::Measure) {
                report.measures += 1;
            }
            for id in tree.descendants(root) {
                match tree.kind(id) {
                    Some(ElementKind::Chord) => report.chords.push(chord_report(tree, ctx, id)),
                    Some(ElementKind::Beam) | Some(ElementKind::FTrem) => {
                        if let Some(b) = beam_report(tree, ctx, id) {
                            report.beams.push(b);
                        }
                    }
                    Some(ElementKind::Tuplet) => {
                        if let Some(t) = tuplet_report(tree, ctx, id) {
                            report.tuplets.push(t);
                        }
                    }
                    _ => {}
                }
            }
        }
        report
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LayoutError::Json(e.to_string()))
    }
}

fn chord_report(tree: &ElementTree, ctx: &mut LayoutContext, id: ElementId) -> ChordReport {
    let chord_x = tree[id].drawing.x;
    let notes = crate::layout::list::get_list(tree, ctx, id)
        .into_iter()
        .map(|note| {
            let accid_x = tree
                .children(note)
                .iter()
                .find(|&&c| tree.is(c, ElementKind::Accid))
                .and_then(|&c| tree[c].drawing.bbox.map(|_| tree[c].drawing.x));
            NoteReport {
                id: label(tree, note),
                diatonic: tree[note].diatonic_pitch(),
                x: tree[note].drawing.x,
                y: tree[note].drawing.y,
                offset: tree[note].drawing.x - chord_x,
                cluster_position: ctx.cluster_of(note).map(|c| c.position),
                accid_x,
            }
        })
        .collect();
    ChordReport {
        id: label(tree, id),
        stem_dir: stem::drawing_stem_dir(tree, id),
        notes,
        clusters: chord::clusters(tree, ctx, id)
            .into_iter()
            .map(|cluster| cluster.into_iter().map(|n| label(tree, n)).collect())
            .collect(),
    }
}

fn beam_report(tree: &ElementTree, ctx: &LayoutContext, id: ElementId) -> Option<BeamReport> {
    let drawing: &beam::BeamDrawing = ctx.beam(id)?;
    let members = drawing
        .coords
        .iter()
        .filter_map(|c| {
            let element = c.element?;
            Some(BeamMemberReport {
                id: label(tree, element),
                place: c.beam_relative_place,
                stem_dir: stem::drawing_stem_dir(tree, element),
                stem_len: stem::drawing_stem_len(tree, element),
                y_beam: c.y_beam,
            })
        })
        .collect();
    Some(BeamReport {
        id: label(tree, id),
        kind: tree[id].kind(),
        place: drawing.drawing_place,
        horizontal: drawing.horizontal,
        cue_size: drawing.cue_size,
        starting_x: drawing.segment.starting_x,
        starting_y: drawing.segment.starting_y,
        slope: drawing.segment.beam_slope,
        members,
        overflow: drawing
            .beam_overflow()
            .map(|(above, below)| [above.map(|s| label(tree, s)), below.map(|s| label(tree, s))]),
    })
}

fn tuplet_report(tree: &ElementTree, ctx: &LayoutContext, id: ElementId) -> Option<TupletReport> {
    let td = ctx.tuplet(id)?;
    let part = |kind: ElementKind| {
        tree.children(id).iter().find(|&&c| tree.is(c, kind)).map(|&c| {
            let d = &tree[c].drawing;
            PartReport {
                y_rel: d.y_rel,
                x_rel_left: d.x_rel_left,
                x_rel_right: d.x_rel_right,
                bbox: d.bbox,
            }
        })
    };
    Some(TupletReport {
        id: label(tree, id),
        bracket_pos: td.bracket_pos,
        num_pos: td.num_pos,
        left: td.drawing_left.map(|e| label(tree, e)),
        right: td.drawing_right.map(|e| label(tree, e)),
        bracket: part(ElementKind::TupletBracket),
        num: part(ElementKind::TupletNum),
        bracket_aligned_beam: td.bracket_aligned_beam.map(|b| label(tree, b)),
        num_aligned_beam: td.num_aligned_beam.map(|b| label(tree, b)),
        num_in_bracket: td.num_aligned_bracket.is_some(),
    })
}
