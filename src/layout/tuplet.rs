//! Tuplet brackets and numbers.
//!
//! Preparation creates or removes the bracket and num children and finds the
//! leftmost and rightmost notes. Placement then decides the side of each
//! decoration, aligns them with a beam where the beam goes the same way and
//! finally pushes them clear of the tuplet content.

use serde::Serialize;

use crate::error::{LayoutError, Result};
use crate::model::{BeamPlace, BoundingBox, Element, ElementData, ElementId, ElementKind, StaffRel, StemDirection};
use crate::options::LayoutOptions;
use crate::tree::{ElementTree, Functor, FunctorCode, SearchDirection};

use super::constants::*;
use super::list::get_list;
use super::{alignment, chord, drawing_staff, staff_size_of, stem, LayoutContext};

/// Per-pass tuplet state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TupletDrawing {
    /// First note, chord or rest of the tuplet
    pub drawing_left: Option<ElementId>,
    /// Last note, chord or rest of the tuplet
    pub drawing_right: Option<ElementId>,
    pub bracket_pos: StaffRel,
    pub num_pos: StaffRel,
    pub bracket_aligned_beam: Option<ElementId>,
    pub num_aligned_beam: Option<ElementId>,
    /// Bracket the num sits in, when both are on the same side
    pub num_aligned_bracket: Option<ElementId>,
}

/// Kinds a tuplet may contain.
pub fn is_supported_child(child: ElementKind) -> bool {
    use ElementKind::*;
    matches!(
        child,
        Beam | TupletBracket | BTrem | Chord | Clef | FTrem | Note | TupletNum | Rest | Space | Tuplet | Editorial
    )
}

/// Keep the layer elements that take time.
pub(crate) fn filter_list(tree: &ElementTree, list: &mut Vec<ElementId>) {
    list.retain(|&id| tree.kind(id).is_some_and(|k| k.is_layer_element() && k.has_duration()));
}

fn state(ctx: &mut LayoutContext, tuplet: ElementId) -> &mut TupletDrawing {
    ctx.tuplets.entry(tuplet).or_default()
}

/// Forget the cached list and the left/right anchors.
pub fn reset_drawing(tree: &mut ElementTree, ctx: &mut LayoutContext, tuplet: ElementId) {
    tree.modify();
    let td = state(ctx, tuplet);
    td.drawing_left = None;
    td.drawing_right = None;
}

/// Forget the placement decisions.
pub fn reset_horizontal_alignment(ctx: &mut LayoutContext, tuplet: ElementId) {
    let td = state(ctx, tuplet);
    td.bracket_pos = StaffRel::None;
    td.bracket_aligned_beam = None;
    td.num_aligned_beam = None;
    td.num_aligned_bracket = None;
}

// ── Preparation ─────────────────────────────────────────────────────

/// Create or remove the bracket and the num according to their visibility,
/// propagate cue sizing and find the left and right anchors.
pub(crate) fn prepare_layer_element_parts(
    tree: &mut ElementTree,
    ctx: &mut LayoutContext,
    tuplet: ElementId,
) -> Result<()> {
    let attrs = tree[tuplet]
        .tuplet_attrs()
        .cloned()
        .ok_or_else(|| LayoutError::InvalidState(format!("element {} is not a tuplet", tuplet.index())))?;
    let current_bracket = tree.find_descendant(tuplet, &[ElementKind::TupletBracket], Some(1), SearchDirection::Forward);
    let current_num = tree.find_descendant(tuplet, &[ElementKind::TupletNum], Some(1), SearchDirection::Forward);

    let mut beamed = tree
        .first_ancestor(tuplet, ElementKind::Beam, Some(MAX_BEAM_DEPTH))
        .is_some_and(|beam| tree.child_count(beam, None) == 1);
    // A beam or bTrem as only child
    if tree.child_count(tuplet, None) == 1
        && (tree.child_count(tuplet, Some(ElementKind::Beam)) == 1
            || tree.child_count(tuplet, Some(ElementKind::BTrem)) == 1)
    {
        beamed = true;
    }

    let show_bracket = match attrs.bracket_visible {
        None => !beamed,
        Some(visible) => visible,
    };
    if show_bracket {
        if current_bracket.is_none() {
            tree.add_child(tuplet, Element::new(ElementData::TupletBracket))?;
        }
    } else if let Some(bracket) = current_bracket {
        tree.delete_child(tuplet, bracket);
    }

    let show_num = attrs.num.is_some() && attrs.num_visible != Some(false);
    if show_num {
        if current_num.is_none() {
            tree.add_child(tuplet, Element::new(ElementData::TupletNum))?;
        }
    } else if let Some(num) = current_num {
        tree.delete_child(tuplet, num);
    }

    alignment::propagate_cue_size(tree, tuplet);

    let anchors = [ElementKind::Chord, ElementKind::Note, ElementKind::Rest];
    let left = tree.find_descendant(tuplet, &anchors, None, SearchDirection::Forward);
    let right = tree.find_descendant(tuplet, &anchors, None, SearchDirection::Backward);
    let td = state(ctx, tuplet);
    td.drawing_left = left;
    td.drawing_right = right;
    Ok(())
}

/// Decide the bracket and num sides. Encoded places win; otherwise the side
/// of the majority of stems, where a tie goes below.
pub fn calc_drawing_bracket_and_num_pos(
    tree: &ElementTree,
    ctx: &mut LayoutContext,
    tuplet: ElementId,
    tuplet_num_head: bool,
) {
    let attrs = tree[tuplet].tuplet_attrs().cloned().unwrap_or_default();
    let mut bracket_pos = attrs.bracket_place.unwrap_or(StaffRel::None);
    let mut num_pos = attrs.num_place.unwrap_or(bracket_pos);

    if bracket_pos == StaffRel::None {
        let (mut ups, mut downs) = (0, 0);
        for id in get_list(tree, ctx, tuplet) {
            match tree.kind(id) {
                Some(ElementKind::Chord) => {
                    if stem::drawing_stem_dir(tree, id) == StemDirection::Up {
                        ups += 1;
                    } else {
                        downs += 1;
                    }
                }
                Some(ElementKind::Note) if tree.chord_of(id).is_none() => match stem::drawing_stem_dir(tree, id) {
                    StemDirection::Up => ups += 1,
                    StemDirection::Down => downs += 1,
                    StemDirection::None => {}
                },
                _ => {}
            }
        }
        bracket_pos = if ups > downs { StaffRel::Above } else { StaffRel::Below };
        if tuplet_num_head {
            bracket_pos = bracket_pos.flipped();
        }
        if num_pos == StaffRel::None {
            num_pos = bracket_pos;
        }
    }

    let td = state(ctx, tuplet);
    td.bracket_pos = bracket_pos;
    td.num_pos = num_pos;
}

fn drawing_radius(tree: &ElementTree, options: &LayoutOptions, id: ElementId) -> i32 {
    let unit = options.drawing_unit(staff_size_of(tree, id));
    let unit = if tree[id].drawing.cue_size { options.cue_size(unit) } else { unit };
    tenths(unit, NOTEHEAD_RADIUS_TENTHS)
}

/// Horizontal extent of the tuplet relative to its left and right anchors.
pub fn drawing_left_right_x_rel(
    tree: &ElementTree,
    ctx: &mut LayoutContext,
    options: &LayoutOptions,
    tuplet: ElementId,
) -> Result<(i32, i32)> {
    let td = state(ctx, tuplet).clone();
    let (Some(left), Some(right)) = (td.drawing_left, td.drawing_right) else {
        return Err(LayoutError::InvalidState(format!(
            "tuplet {} has no left or right element",
            tuplet.index()
        )));
    };

    let x_rel_left = if tree.is(left, ElementKind::Chord) {
        chord::x_extremes(tree, ctx, left).0 - tree[left].drawing.x
    } else {
        0
    };

    let x_rel_right = match tree.kind(right) {
        Some(ElementKind::Note) => 2 * drawing_radius(tree, options, right),
        Some(ElementKind::Rest) => tree[right]
            .drawing
            .bbox
            .map_or(0, |bb| bb.right - tree[right].drawing.x),
        Some(ElementKind::Chord) => {
            chord::x_extremes(tree, ctx, right).1 - tree[right].drawing.x + 2 * drawing_radius(tree, options, right)
        }
        _ => 0,
    };
    Ok((x_rel_left, x_rel_right))
}

// ── Horizontal pass ─────────────────────────────────────────────────

/// Whether the tuplet has nothing to place.
fn skip_placement(tree: &ElementTree, ctx: &mut LayoutContext, tuplet: ElementId) -> bool {
    let Some(attrs) = tree[tuplet].tuplet_attrs() else {
        return true;
    };
    if attrs.num.is_none() {
        return true;
    }
    if attrs.bracket_visible == Some(false) && attrs.num_visible == Some(false) {
        return true;
    }
    let td = state(ctx, tuplet);
    td.drawing_left.is_none() || td.drawing_right.is_none()
}

fn beam_place(ctx: &LayoutContext, beam: ElementId) -> BeamPlace {
    ctx.beams.get(&beam).map_or(BeamPlace::None, |b| b.drawing_place)
}

/// Drop a beam alignment when the beam goes to the other side.
fn concordant(ctx: &LayoutContext, beam: Option<ElementId>, pos: StaffRel) -> Option<ElementId> {
    let beam = beam?;
    match (beam_place(ctx, beam), pos) {
        (BeamPlace::Above, StaffRel::Below) | (BeamPlace::Below, StaffRel::Above) => None,
        _ => Some(beam),
    }
}

/// Resolve beam alignment and the horizontal extent of bracket and num.
pub(crate) fn adjust_tuplets_x(
    tree: &mut ElementTree,
    ctx: &mut LayoutContext,
    options: &LayoutOptions,
    tuplet: ElementId,
) -> FunctorCode {
    if skip_placement(tree, ctx, tuplet) {
        return FunctorCode::Siblings;
    }
    let td = state(ctx, tuplet).clone();
    if td.bracket_pos == StaffRel::None {
        log::warn!("Tuplet {} reached horizontal adjustment without a bracket side", tuplet.index());
        return FunctorCode::Siblings;
    }
    let attrs = tree[tuplet].tuplet_attrs().cloned().unwrap_or_default();

    let mut aligned = tree.first_ancestor(tuplet, ElementKind::Beam, Some(MAX_BEAM_DEPTH));
    if let Some(beam_child) = tree.find_descendant_by_kind(tuplet, ElementKind::Beam) {
        if tree.child_count(tuplet, Some(ElementKind::Note)) == 0
            && tree.child_count(tuplet, Some(ElementKind::Chord)) == 0
            && tree.child_count(tuplet, Some(ElementKind::Beam)) == 1
        {
            aligned = Some(beam_child);
        }
    }
    let bracket_aligned_beam = concordant(ctx, aligned, td.bracket_pos);
    let num_aligned_beam = concordant(ctx, aligned, td.num_pos);

    let (x_rel_left, x_rel_right) = match drawing_left_right_x_rel(tree, ctx, options, tuplet) {
        Ok(rels) => rels,
        Err(e) => {
            log::warn!("{e}");
            return FunctorCode::Siblings;
        }
    };

    let bracket = tree
        .find_descendant_by_kind(tuplet, ElementKind::TupletBracket)
        .filter(|_| attrs.bracket_visible != Some(false));
    if let Some(bracket) = bracket {
        let d = &mut tree[bracket].drawing;
        d.x_rel_left = x_rel_left;
        d.x_rel_right = x_rel_right;
    }

    let mut num_aligned_bracket = None;
    if let Some(num) = tree
        .find_descendant_by_kind(tuplet, ElementKind::TupletNum)
        .filter(|_| attrs.num_visible != Some(false))
    {
        if td.num_pos == td.bracket_pos {
            num_aligned_bracket = bracket;
        }
        let d = &mut tree[num].drawing;
        d.x_rel_left = x_rel_left;
        d.x_rel_right = x_rel_right;
    }

    let td = state(ctx, tuplet);
    td.bracket_aligned_beam = bracket_aligned_beam;
    td.num_aligned_beam = num_aligned_beam;
    td.num_aligned_bracket = num_aligned_bracket;
    let td = td.clone();

    // Provisional boxes, used by the vertical pass
    if let Some(staff) = drawing_staff(tree, tuplet) {
        if let Some(bracket) = bracket {
            tree[bracket].drawing.bbox = bracket_bbox(tree, ctx, options, &td, bracket, staff);
        }
        if let Some(num) = tree.find_descendant_by_kind(tuplet, ElementKind::TupletNum) {
            tree[num].drawing.bbox = num_bbox(tree, options, &td, tuplet, num, staff);
        }
    }
    FunctorCode::Siblings
}

fn anchor_xs(tree: &ElementTree, td: &TupletDrawing, holder: ElementId) -> Option<(i32, i32)> {
    let left = tree[td.drawing_left?].drawing.x + tree[holder].drawing.x_rel_left;
    let right = tree[td.drawing_right?].drawing.x + tree[holder].drawing.x_rel_right;
    Some((left, right))
}

fn bracket_bbox(
    tree: &ElementTree,
    ctx: &LayoutContext,
    options: &LayoutOptions,
    td: &TupletDrawing,
    bracket: ElementId,
    staff: ElementId,
) -> Option<BoundingBox> {
    let (left, right) = anchor_xs(tree, td, bracket)?;
    let hook = TUPLET_BRACKET_HOOK_UNITS * options.drawing_unit(staff_size_of(tree, staff));
    let y_rel = tree[bracket].drawing.y_rel;
    let (y_left, y_right) = match td.bracket_aligned_beam.and_then(|b| ctx.beams.get(&b)) {
        Some(beam) => (beam.segment.y_at(left) + y_rel, beam.segment.y_at(right) + y_rel),
        None => {
            let y = tree[staff].drawing.y + y_rel;
            (y, y)
        }
    };
    let (low, high) = (y_left.min(y_right), y_left.max(y_right));
    Some(if td.bracket_pos == StaffRel::Below {
        BoundingBox::new(left, right, low, high + hook)
    } else {
        BoundingBox::new(left, right, low - hook, high)
    })
}

/// Horizontal middle of the num.
fn num_x_mid(tree: &ElementTree, td: &TupletDrawing, num: ElementId) -> Option<i32> {
    let holder = td.num_aligned_bracket.unwrap_or(num);
    let (left, right) = anchor_xs(tree, td, holder)?;
    Some((left + right) / 2)
}

fn num_bbox(
    tree: &ElementTree,
    options: &LayoutOptions,
    td: &TupletDrawing,
    tuplet: ElementId,
    num: ElementId,
    staff: ElementId,
) -> Option<BoundingBox> {
    let mid = num_x_mid(tree, td, num)?;
    let unit = options.drawing_unit(staff_size_of(tree, staff));
    let digits = tree[tuplet]
        .tuplet_attrs()
        .and_then(|a| a.num)
        .map_or(1, |n| n.to_string().len() as i32);
    let half_width = digits * TUPLET_DIGIT_WIDTH_UNITS * unit / 2;
    let height = 2 * unit;
    let y = tree[staff].drawing.y + tree[num].drawing.y_rel;
    Some(if td.num_pos == StaffRel::Below {
        BoundingBox::new(mid - half_width, mid + half_width, y - height, y)
    } else {
        BoundingBox::new(mid - half_width, mid + half_width, y, y + height)
    })
}

// ── Vertical pass ───────────────────────────────────────────────────

pub(crate) fn adjust_tuplets_y(
    tree: &mut ElementTree,
    ctx: &mut LayoutContext,
    options: &LayoutOptions,
    tuplet: ElementId,
) -> FunctorCode {
    if skip_placement(tree, ctx, tuplet) {
        return FunctorCode::Siblings;
    }
    if state(ctx, tuplet).bracket_pos == StaffRel::None {
        log::warn!("Tuplet {} reached vertical adjustment without a bracket side", tuplet.index());
        return FunctorCode::Siblings;
    }
    let Some(staff) = tree.first_ancestor(tuplet, ElementKind::Staff, None) else {
        log::warn!("Tuplet {} is not inside a staff", tuplet.index());
        return FunctorCode::Siblings;
    };
    let staff_size = staff_size_of(tree, staff);
    let relevant = tree[tuplet].drawing.cross_staff.unwrap_or(staff);

    adjust_tuplet_bracket_y(tree, ctx, options, tuplet, relevant, staff_size);
    adjust_tuplet_num_y(tree, ctx, options, tuplet, relevant, staff_size);
    FunctorCode::Siblings
}

/// Vertical offset of the bracket: along the aligned beam, or clear of the
/// staff and of the tuplet content.
pub(crate) fn adjust_tuplet_bracket_y(
    tree: &mut ElementTree,
    ctx: &mut LayoutContext,
    options: &LayoutOptions,
    tuplet: ElementId,
    staff: ElementId,
    staff_size: i32,
) {
    let Some(bracket) = tree.find_descendant_by_kind(tuplet, ElementKind::TupletBracket) else {
        return;
    };
    if tree[tuplet].tuplet_attrs().and_then(|a| a.bracket_visible) == Some(false) {
        return;
    }
    let td = state(ctx, tuplet).clone();
    let above = td.bracket_pos == StaffRel::Above;

    let y_reference = tree[staff].drawing.y;
    let double_unit = options.drawing_double_unit(staff_size);
    let staff_height = options.drawing_staff_size(staff_size);
    let mut margin = if above { double_unit } else { -double_unit };

    let aligned = td.bracket_aligned_beam.and_then(|b| ctx.beams.get(&b)).map(|b| b.segment);
    if let Some(segment) = aligned {
        let line_at = |x: i32| segment.starting_y + (segment.beam_slope * f64::from(x - segment.starting_x)) as i32;

        let mut artic_padding = 0;
        for artic in tree.find_all_descendants(tuplet, &[ElementKind::Artic]) {
            let Some(bb) = tree[artic].drawing.bbox else {
                continue;
            };
            if above {
                let x = if segment.beam_slope > 0.0 { bb.left } else { bb.right };
                artic_padding = artic_padding.min(line_at(x) - bb.top);
            } else {
                let x = if segment.beam_slope > 0.0 { bb.right } else { bb.left };
                artic_padding = artic_padding.max(line_at(x) - bb.bottom);
            }
        }

        // Rests next to the beam inside the tuplet
        let bracket_rel = tree[bracket].drawing.y_rel - artic_padding + margin;
        let (self_top, self_bottom) = tree[bracket].drawing.bbox.map_or((0, 0), |bb| (bb.top, bb.bottom));
        let bracket_position = (self_top + self_bottom + bracket_rel) / 2;
        let mut rest_adjust = 0;
        for rest in tree.find_all_descendants(tuplet, &[ElementKind::Rest]) {
            if tree.first_ancestor(rest, ElementKind::Beam, None).is_some() {
                continue;
            }
            let Some(bb) = tree[rest].drawing.bbox else {
                continue;
            };
            if above {
                if bracket_position < bb.top {
                    let shift = bb.top - bracket_position;
                    if rest_adjust == 0 || rest_adjust < shift {
                        rest_adjust = shift;
                    }
                }
            } else if bracket_position > bb.bottom {
                let shift = bb.bottom - bracket_position;
                if rest_adjust == 0 || rest_adjust > shift {
                    rest_adjust = shift;
                }
            }
        }
        margin += rest_adjust;

        // Horizontal beam lying on a staff line
        if segment.beam_slope == 0.0 {
            let y = segment.starting_y;
            if y < y_reference && y > y_reference - staff_height && (y - y_reference) % double_unit == 0 {
                margin += double_unit / 4;
            }
        }
        tree[bracket].drawing.y_rel += margin - artic_padding;
    } else {
        let mut y_rel = if above { 0 } else { -staff_height };
        let kinds = [
            ElementKind::Artic,
            ElementKind::Accid,
            ElementKind::Beam,
            ElementKind::Dot,
            ElementKind::Flag,
            ElementKind::Note,
            ElementKind::Rest,
            ElementKind::Stem,
        ];
        for id in tree.find_all_descendants(tuplet, &kinds) {
            let Some(bb) = tree[id].drawing.bbox else {
                continue;
            };
            if above {
                y_rel = y_rel.max(bb.top - y_reference);
            } else {
                y_rel = y_rel.min(bb.bottom - y_reference);
            }
        }
        tree[bracket].drawing.y_rel += y_rel + margin;
    }

    tree[bracket].drawing.bbox = bracket_bbox(tree, ctx, options, &td, bracket, staff);
}

/// Vertical offset of the num: in its bracket, or clear of the content and,
/// when possible, next to the aligned beam.
pub(crate) fn adjust_tuplet_num_y(
    tree: &mut ElementTree,
    ctx: &mut LayoutContext,
    options: &LayoutOptions,
    tuplet: ElementId,
    staff: ElementId,
    staff_size: i32,
) {
    let Some(num) = tree.find_descendant_by_kind(tuplet, ElementKind::TupletNum) else {
        return;
    };
    if tree[tuplet].tuplet_attrs().and_then(|a| a.num_visible) == Some(false) {
        return;
    }
    calculate_tuplet_num_cross_staff(tree, ctx, tuplet, num);

    let num_staff = tree[num].drawing.cross_staff.unwrap_or(staff);
    let y_reference = tree[num_staff].drawing.y;
    let double_unit = options.drawing_double_unit(staff_size);
    let td = state(ctx, tuplet).clone();

    if let Some(bracket) = td.num_aligned_bracket {
        tree[num].drawing.y_rel = tree[bracket].drawing.y_rel;
        tree[num].drawing.bbox = num_bbox(tree, options, &td, tuplet, num, num_staff);
        return;
    }

    let above = td.num_pos == StaffRel::Above;
    let margin = if above { double_unit } else { -double_unit };
    let staff_height = options.drawing_staff_size(staff_size);
    let adjusted_position = if above { 0 } else { -staff_height };
    let beam = td.num_aligned_beam.and_then(|b| ctx.beams.get(&b)).map(|b| b.segment);
    if beam.is_none() {
        tree[num].drawing.y_rel = adjusted_position;
    }

    let num_box = num_bbox(tree, options, &td, tuplet, num, num_staff);
    let mut overlap = TupletNumOverlap {
        num_bbox: num_box,
        staff: num_staff,
        num_pos: td.num_pos,
        horizontal_margin: 2 * options.drawing_unit(staff_size),
        y_rel: y_reference + tree[num].drawing.y_rel,
    };
    tree.process(tuplet, &mut overlap);
    let mut y_rel = overlap.y_rel - y_reference;

    let has_artic = tree.find_descendant_by_kind(tuplet, ElementKind::Artic).is_some();
    match beam {
        Some(segment) if tree[tuplet].drawing.cross_staff.is_none() && !has_artic => {
            if let Some(x_mid) = num_x_mid(tree, &td, num) {
                let y_mid = segment.starting_y + (segment.beam_slope * f64::from(x_mid - segment.starting_x)) as i32;
                let beam_y_rel = y_mid - y_reference + margin;
                if (above && beam_y_rel > 0) || (!above && beam_y_rel < -staff_height) {
                    y_rel = beam_y_rel;
                }
            }
        }
        _ => y_rel += margin,
    }

    // Too far away: back to the staff edge
    if (!above && y_rel > adjusted_position) || (above && y_rel < adjusted_position) {
        y_rel = adjusted_position;
    }
    tree[num].drawing.y_rel = y_rel;
    tree[num].drawing.bbox = num_bbox(tree, options, &td, tuplet, num, num_staff);
}

/// Draw the num on another staff when the tuplet content is there.
pub(crate) fn calculate_tuplet_num_cross_staff(
    tree: &mut ElementTree,
    ctx: &mut LayoutContext,
    tuplet: ElementId,
    num: ElementId,
) {
    if let Some(cross) = tree[tuplet].drawing.cross_staff {
        tree[num].drawing.cross_staff = Some(cross);
        return;
    }
    let Some(staff) = tree.first_ancestor(tuplet, ElementKind::Staff, None) else {
        return;
    };

    let descendants =
        tree.find_all_descendants(tuplet, &[ElementKind::Chord, ElementKind::Note, ElementKind::Rest]);
    let mut cross_staff: Option<ElementId> = None;
    let mut cross_count = 0;
    for &id in &descendants {
        let element_cross = tree[id].drawing.cross_staff;
        match (cross_staff, element_cross) {
            (Some(current), Some(other)) if current != other => {
                cross_staff = None;
                break;
            }
            (_, Some(other)) => {
                cross_count += 1;
                cross_staff = Some(other);
            }
            _ => {}
        }
    }
    let Some(cross) = cross_staff else {
        return;
    };

    let mostly_cross = cross_count > descendants.len() / 2;
    if (mostly_cross && has_valid_tuplet_num_position(tree, ctx, tuplet, cross, staff))
        || (!mostly_cross && !has_valid_tuplet_num_position(tree, ctx, tuplet, staff, cross))
    {
        tree[num].drawing.cross_staff = Some(cross);
    }
}

/// Whether the num can go on `preferred` given the aligned beam placement.
pub fn has_valid_tuplet_num_position(
    tree: &ElementTree,
    ctx: &mut LayoutContext,
    tuplet: ElementId,
    preferred: ElementId,
    other: ElementId,
) -> bool {
    let td = state(ctx, tuplet).clone();
    let Some(beam) = td.num_aligned_beam else {
        return true;
    };
    let place = beam_place(ctx, beam);
    if place == BeamPlace::Mixed {
        return false;
    }
    let n = |staff: ElementId| tree[staff].staff_attrs().map_or(0, |a| a.n);
    if n(preferred) < n(other) {
        !(place == BeamPlace::Below && td.num_pos == StaffRel::Below)
    } else {
        !(place == BeamPlace::Above && td.num_pos == StaffRel::Above)
    }
}

/// Pushes the num clear of every tuplet element below (or above) it.
struct TupletNumOverlap {
    num_bbox: Option<BoundingBox>,
    staff: ElementId,
    num_pos: StaffRel,
    horizontal_margin: i32,
    /// Absolute y the num is pushed to
    y_rel: i32,
}

impl Functor for TupletNumOverlap {
    fn visit(&mut self, tree: &mut ElementTree, id: ElementId) -> FunctorCode {
        use ElementKind::*;
        let element = &tree[id];
        if !element.is_any(&[Artic, Accid, Beam, Dot, Flag, Note, Rest, Stem]) {
            return FunctorCode::Continue;
        }
        if drawing_staff(tree, id).is_some_and(|s| s != self.staff) {
            return FunctorCode::Siblings;
        }
        let (Some(bb), Some(num_bb)) = (tree[id].drawing.bbox, self.num_bbox) else {
            return FunctorCode::Continue;
        };
        if !num_bb.horizontal_overlap(&bb, self.horizontal_margin) {
            return FunctorCode::Continue;
        }
        if self.num_pos == StaffRel::Above {
            self.y_rel = self.y_rel.max(bb.top);
        } else {
            self.y_rel = self.y_rel.min(bb.bottom);
        }
        FunctorCode::Continue
    }
}

// ── Pass functors ───────────────────────────────────────────────────

/// Horizontal tuplet adjustment over a subtree.
pub(crate) struct AdjustTupletsX<'a> {
    pub(crate) ctx: &'a mut LayoutContext,
    pub(crate) options: &'a LayoutOptions,
}

impl Functor for AdjustTupletsX<'_> {
    fn visit(&mut self, tree: &mut ElementTree, id: ElementId) -> FunctorCode {
        if tree.is(id, ElementKind::Tuplet) {
            adjust_tuplets_x(tree, self.ctx, self.options, id)
        } else {
            FunctorCode::Continue
        }
    }
}

/// Vertical tuplet adjustment over a subtree.
pub(crate) struct AdjustTupletsY<'a> {
    pub(crate) ctx: &'a mut LayoutContext,
    pub(crate) options: &'a LayoutOptions,
}

impl Functor for AdjustTupletsY<'_> {
    fn visit(&mut self, tree: &mut ElementTree, id: ElementId) -> FunctorCode {
        if tree.is(id, ElementKind::Tuplet) {
            adjust_tuplets_y(tree, self.ctx, self.options, id)
        } else {
            FunctorCode::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::beam::{BeamDrawing, BeamSegment};
    use crate::model::*;
    use pretty_assertions::assert_eq;

    fn tuplet_with_stems(dirs: &[StemDirection], attrs: TupletAttrs) -> (ElementTree, ElementId, Vec<ElementId>) {
        let mut tree = ElementTree::new();
        let measure = tree.add_root(Element::new(ElementData::Measure));
        let staff = tree.add_child(measure, Element::staff(1)).unwrap();
        let layer = tree.add_child(staff, Element::new(ElementData::Layer)).unwrap();
        let tuplet = tree.add_child(layer, Element::new(ElementData::Tuplet(attrs))).unwrap();
        let mut notes = Vec::new();
        for &dir in dirs {
            let note = tree
                .add_child(tuplet, Element::note(Pitch::from_diatonic(32), Some(Duration::Quarter)))
                .unwrap();
            let stem = tree.add_child(note, Element::new(ElementData::Stem)).unwrap();
            tree[stem].drawing.stem_dir = dir;
            notes.push(note);
        }
        (tree, tuplet, notes)
    }

    fn triplet() -> TupletAttrs {
        TupletAttrs {
            num: Some(3),
            numbase: Some(2),
            ..Default::default()
        }
    }

    use StemDirection::{Down, Up};

    #[test]
    fn majority_of_up_stems_puts_bracket_above() {
        let (tree, tuplet, _) = tuplet_with_stems(&[Up, Up, Down, Up], triplet());
        let mut ctx = LayoutContext::default();
        calc_drawing_bracket_and_num_pos(&tree, &mut ctx, tuplet, false);
        assert_eq!(ctx.tuplets[&tuplet].bracket_pos, StaffRel::Above);
        assert_eq!(ctx.tuplets[&tuplet].num_pos, StaffRel::Above);
    }

    #[test]
    fn tie_goes_below() {
        let (tree, tuplet, _) = tuplet_with_stems(&[Up, Down, Up, Down], triplet());
        let mut ctx = LayoutContext::default();
        calc_drawing_bracket_and_num_pos(&tree, &mut ctx, tuplet, false);
        assert_eq!(ctx.tuplets[&tuplet].bracket_pos, StaffRel::Below);
    }

    #[test]
    fn num_head_option_flips_derived_side() {
        let (tree, tuplet, _) = tuplet_with_stems(&[Up, Up, Down, Up], triplet());
        let mut ctx = LayoutContext::default();
        calc_drawing_bracket_and_num_pos(&tree, &mut ctx, tuplet, true);
        assert_eq!(ctx.tuplets[&tuplet].bracket_pos, StaffRel::Below);
        assert_eq!(ctx.tuplets[&tuplet].num_pos, StaffRel::Below);
    }

    #[test]
    fn encoded_places_are_kept() {
        let attrs = TupletAttrs {
            bracket_place: Some(StaffRel::Below),
            num_place: Some(StaffRel::Above),
            ..triplet()
        };
        let (tree, tuplet, _) = tuplet_with_stems(&[Up, Up, Up], attrs);
        let mut ctx = LayoutContext::default();
        calc_drawing_bracket_and_num_pos(&tree, &mut ctx, tuplet, true);
        assert_eq!(ctx.tuplets[&tuplet].bracket_pos, StaffRel::Below);
        assert_eq!(ctx.tuplets[&tuplet].num_pos, StaffRel::Above);
    }

    #[test]
    fn unsupported_child_is_rejected() {
        let (mut tree, tuplet, _) = tuplet_with_stems(&[Up], triplet());
        let err = tree
            .add_child(tuplet, Element::new(ElementData::Artic(ArticAttrs::default())))
            .unwrap_err();
        assert_eq!(
            err,
            LayoutError::UnsupportedChild {
                child: ElementKind::Artic,
                parent: ElementKind::Tuplet
            }
        );
        assert_eq!(tree.children(tuplet).len(), 1);
    }

    #[test]
    fn parts_are_created_in_front_once() {
        let (mut tree, tuplet, notes) = tuplet_with_stems(&[Up, Up, Up], triplet());
        let mut ctx = LayoutContext::default();
        prepare_layer_element_parts(&mut tree, &mut ctx, tuplet).unwrap();
        prepare_layer_element_parts(&mut tree, &mut ctx, tuplet).unwrap();

        let kinds: Vec<ElementKind> = tree.children(tuplet).iter().map(|&c| tree[c].kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ElementKind::TupletNum,
                ElementKind::TupletBracket,
                ElementKind::Note,
                ElementKind::Note,
                ElementKind::Note
            ]
        );
        assert_eq!(ctx.tuplets[&tuplet].drawing_left, Some(notes[0]));
        assert_eq!(ctx.tuplets[&tuplet].drawing_right, Some(notes[2]));
    }

    #[test]
    fn hidden_bracket_is_removed() {
        let (mut tree, tuplet, _) = tuplet_with_stems(&[Up, Up, Up], triplet());
        let mut ctx = LayoutContext::default();
        prepare_layer_element_parts(&mut tree, &mut ctx, tuplet).unwrap();
        if let ElementData::Tuplet(attrs) = &mut tree[tuplet].data {
            attrs.bracket_visible = Some(false);
        }
        prepare_layer_element_parts(&mut tree, &mut ctx, tuplet).unwrap();
        assert_eq!(tree.child_count(tuplet, Some(ElementKind::TupletBracket)), 0);
        assert_eq!(tree.child_count(tuplet, Some(ElementKind::TupletNum)), 1);
    }

    #[test]
    fn tuplet_around_a_single_beam_gets_no_bracket() {
        let mut tree = ElementTree::new();
        let measure = tree.add_root(Element::new(ElementData::Measure));
        let staff = tree.add_child(measure, Element::staff(1)).unwrap();
        let layer = tree.add_child(staff, Element::new(ElementData::Layer)).unwrap();
        let tuplet = tree.add_child(layer, Element::new(ElementData::Tuplet(triplet()))).unwrap();
        let beam = tree.add_child(tuplet, Element::new(ElementData::Beam(BeamAttrs::default()))).unwrap();
        for p in [30, 31, 32] {
            tree.add_child(beam, Element::note(Pitch::from_diatonic(p), Some(Duration::Eighth)))
                .unwrap();
        }
        let mut ctx = LayoutContext::default();
        prepare_layer_element_parts(&mut tree, &mut ctx, tuplet).unwrap();
        assert_eq!(tree.child_count(tuplet, Some(ElementKind::TupletBracket)), 0);
        assert_eq!(tree.child_count(tuplet, Some(ElementKind::TupletNum)), 1);
    }

    #[test]
    fn num_position_without_beam_is_valid() {
        let (tree, tuplet, _) = tuplet_with_stems(&[Up], triplet());
        let mut ctx = LayoutContext::default();
        let staff = tree.first_ancestor(tuplet, ElementKind::Staff, None).unwrap();
        assert!(has_valid_tuplet_num_position(&tree, &mut ctx, tuplet, staff, staff));
    }

    #[test]
    fn unaligned_bracket_clears_content_above() {
        let (mut tree, tuplet, notes) = tuplet_with_stems(&[Up, Up, Up], triplet());
        let options = LayoutOptions::default();
        let mut ctx = LayoutContext::default();
        prepare_layer_element_parts(&mut tree, &mut ctx, tuplet).unwrap();
        calc_drawing_bracket_and_num_pos(&tree, &mut ctx, tuplet, false);
        tree[notes[1]].drawing.bbox = Some(BoundingBox::new(100, 200, 50, 250));
        let staff = tree.first_ancestor(tuplet, ElementKind::Staff, None).unwrap();
        adjust_tuplet_bracket_y(&mut tree, &mut ctx, &options, tuplet, staff, 100);
        let bracket = tree.find_descendant_by_kind(tuplet, ElementKind::TupletBracket).unwrap();
        // Content top plus one double unit
        assert_eq!(tree[bracket].drawing.y_rel, 250 + 180);
    }

    /// Tuplet with its parts prepared and its sides decided.
    fn prepared(dirs: &[StemDirection], attrs: TupletAttrs) -> (ElementTree, LayoutContext, ElementId, Vec<ElementId>) {
        let (mut tree, tuplet, notes) = tuplet_with_stems(dirs, attrs);
        let mut ctx = LayoutContext::default();
        prepare_layer_element_parts(&mut tree, &mut ctx, tuplet).unwrap();
        calc_drawing_bracket_and_num_pos(&tree, &mut ctx, tuplet, false);
        (tree, ctx, tuplet, notes)
    }

    /// A beam next to the tuplet with an already fitted line.
    fn beam_line(
        tree: &mut ElementTree,
        ctx: &mut LayoutContext,
        tuplet: ElementId,
        place: BeamPlace,
        starting_y: i32,
        beam_slope: f64,
    ) -> ElementId {
        let layer = tree.first_ancestor(tuplet, ElementKind::Layer, None).unwrap();
        let beam = tree.add_child(layer, Element::new(ElementData::Beam(BeamAttrs::default()))).unwrap();
        ctx.beams.insert(
            beam,
            BeamDrawing {
                drawing_place: place,
                segment: BeamSegment {
                    starting_x: 0,
                    starting_y,
                    beam_slope,
                },
                ..Default::default()
            },
        );
        beam
    }

    fn home_staff(tree: &ElementTree, tuplet: ElementId) -> ElementId {
        tree.first_ancestor(tuplet, ElementKind::Staff, None).unwrap()
    }

    fn bracket_y_rel(tree: &ElementTree, tuplet: ElementId) -> i32 {
        let bracket = tree.find_descendant_by_kind(tuplet, ElementKind::TupletBracket).unwrap();
        tree[bracket].drawing.y_rel
    }

    #[test]
    fn aligned_bracket_makes_room_for_articulations() {
        let (mut tree, mut ctx, tuplet, notes) = prepared(&[Up, Up, Up], triplet());
        let beam = beam_line(&mut tree, &mut ctx, tuplet, BeamPlace::Above, 900, 0.0);
        ctx.tuplets.get_mut(&tuplet).unwrap().bracket_aligned_beam = Some(beam);
        let artic = tree
            .add_child(notes[1], Element::new(ElementData::Artic(ArticAttrs::default())))
            .unwrap();
        tree[artic].drawing.bbox = Some(BoundingBox::new(100, 200, 850, 1000));

        let staff = home_staff(&tree, tuplet);
        adjust_tuplet_bracket_y(&mut tree, &mut ctx, &LayoutOptions::default(), tuplet, staff, 100);
        // A double unit plus the 100 the articulation rises past the beam
        assert_eq!(bracket_y_rel(&tree, tuplet), 180 + 100);
    }

    #[test]
    fn aligned_bracket_clears_rests_outside_the_beam() {
        let (mut tree, mut ctx, tuplet, _) = prepared(&[Down, Down, Down], triplet());
        let inner = tree
            .add_child(tuplet, Element::new(ElementData::Beam(BeamAttrs::default())))
            .unwrap();
        let beamed_rest = tree.add_child(inner, Element::rest(Duration::Eighth)).unwrap();
        tree[beamed_rest].drawing.bbox = Some(BoundingBox::new(0, 100, -3000, -2800));
        let rest = tree.add_child(tuplet, Element::rest(Duration::Quarter)).unwrap();
        tree[rest].drawing.bbox = Some(BoundingBox::new(300, 400, -1500, -1100));

        let beam = beam_line(&mut tree, &mut ctx, tuplet, BeamPlace::Below, -1000, 0.0);
        ctx.tuplets.get_mut(&tuplet).unwrap().bracket_aligned_beam = Some(beam);
        let staff = home_staff(&tree, tuplet);
        adjust_tuplet_bracket_y(&mut tree, &mut ctx, &LayoutOptions::default(), tuplet, staff, 100);

        // Past the free rest (bottom -1500), the beamed one is ignored
        let y_rel = bracket_y_rel(&tree, tuplet);
        assert_eq!(y_rel, -1590);
        assert!(y_rel < -1500 && y_rel > -2800);
    }

    #[test]
    fn horizontal_beam_on_a_staff_line_nudges_the_bracket() {
        for (starting_y, expected) in [(-360, -180 + 45), (-450, -180), (-900, -180)] {
            let (mut tree, mut ctx, tuplet, _) = prepared(&[Down, Down, Down], triplet());
            let beam = beam_line(&mut tree, &mut ctx, tuplet, BeamPlace::Below, starting_y, 0.0);
            ctx.tuplets.get_mut(&tuplet).unwrap().bracket_aligned_beam = Some(beam);
            let staff = home_staff(&tree, tuplet);
            adjust_tuplet_bracket_y(&mut tree, &mut ctx, &LayoutOptions::default(), tuplet, staff, 100);
            assert_eq!(bracket_y_rel(&tree, tuplet), expected, "beam at {starting_y}");
        }
    }

    /// Num without a bracket, aligned with a beam.
    fn num_on_beam(
        dirs: &[StemDirection],
        place: BeamPlace,
        starting_y: i32,
        beam_slope: f64,
    ) -> (ElementTree, LayoutContext, ElementId, ElementId) {
        let attrs = TupletAttrs {
            bracket_visible: Some(false),
            ..triplet()
        };
        let (mut tree, mut ctx, tuplet, notes) = prepared(dirs, attrs);
        tree[notes[0]].drawing.x = 0;
        tree[notes[2]].drawing.x = 400;
        let beam = beam_line(&mut tree, &mut ctx, tuplet, place, starting_y, beam_slope);
        ctx.tuplets.get_mut(&tuplet).unwrap().num_aligned_beam = Some(beam);
        let num = tree.find_descendant_by_kind(tuplet, ElementKind::TupletNum).unwrap();
        (tree, ctx, tuplet, num)
    }

    #[test]
    fn num_snaps_to_the_beam_slope_at_its_middle() {
        let (mut tree, mut ctx, tuplet, num) = num_on_beam(&[Up, Up, Up], BeamPlace::Above, 1000, 0.5);
        let staff = home_staff(&tree, tuplet);
        adjust_tuplet_num_y(&mut tree, &mut ctx, &LayoutOptions::default(), tuplet, staff, 100);
        // Beam at x 200 is 1100, plus a double unit
        assert_eq!(tree[num].drawing.y_rel, 1100 + 180);

        let (mut tree, mut ctx, tuplet, num) = num_on_beam(&[Down, Down, Down], BeamPlace::Below, -1000, 0.0);
        let staff = home_staff(&tree, tuplet);
        adjust_tuplet_num_y(&mut tree, &mut ctx, &LayoutOptions::default(), tuplet, staff, 100);
        assert_eq!(tree[num].drawing.y_rel, -1000 - 180);
    }

    #[test]
    fn num_inside_the_staff_goes_back_to_the_staff_edge() {
        let (mut tree, mut ctx, tuplet, num) = num_on_beam(&[Down, Down, Down], BeamPlace::Below, -300, 0.0);
        let staff = home_staff(&tree, tuplet);
        adjust_tuplet_num_y(&mut tree, &mut ctx, &LayoutOptions::default(), tuplet, staff, 100);
        assert_eq!(tree[num].drawing.y_rel, -720);
    }

    /// Tuplet on staff 1 with its first `crossing` notes drawn on staff 2.
    fn tuplet_reaching_down(crossing: usize) -> (ElementTree, LayoutContext, ElementId, ElementId, ElementId) {
        let (mut tree, tuplet, notes) = tuplet_with_stems(&[Down, Down, Down], triplet());
        let measure = tree.roots()[0];
        let lower = tree.add_child(measure, Element::staff(2)).unwrap();
        tree[lower].drawing.y = -1800;
        for &note in notes.iter().take(crossing) {
            tree[note].drawing.cross_staff = Some(lower);
        }
        let mut ctx = LayoutContext::default();
        prepare_layer_element_parts(&mut tree, &mut ctx, tuplet).unwrap();
        calc_drawing_bracket_and_num_pos(&tree, &mut ctx, tuplet, false);
        let num = tree.find_descendant_by_kind(tuplet, ElementKind::TupletNum).unwrap();
        (tree, ctx, tuplet, num, lower)
    }

    fn align_num_with(tree: &mut ElementTree, ctx: &mut LayoutContext, tuplet: ElementId, place: BeamPlace) {
        let beam = beam_line(tree, ctx, tuplet, place, 0, 0.0);
        ctx.tuplets.get_mut(&tuplet).unwrap().num_aligned_beam = Some(beam);
    }

    #[test]
    fn num_follows_content_to_the_other_staff() {
        let (mut tree, mut ctx, tuplet, num, lower) = tuplet_reaching_down(3);
        calculate_tuplet_num_cross_staff(&mut tree, &mut ctx, tuplet, num);
        assert_eq!(tree[num].drawing.cross_staff, Some(lower));

        // No valid spot next to a mixed beam
        let (mut tree, mut ctx, tuplet, num, lower) = tuplet_reaching_down(3);
        align_num_with(&mut tree, &mut ctx, tuplet, BeamPlace::Mixed);
        let home = home_staff(&tree, tuplet);
        assert!(!has_valid_tuplet_num_position(&tree, &mut ctx, tuplet, lower, home));
        calculate_tuplet_num_cross_staff(&mut tree, &mut ctx, tuplet, num);
        assert_eq!(tree[num].drawing.cross_staff, None);
    }

    #[test]
    fn num_leaves_its_staff_only_when_the_beam_is_in_the_way() {
        let (mut tree, mut ctx, tuplet, num, _) = tuplet_reaching_down(1);
        calculate_tuplet_num_cross_staff(&mut tree, &mut ctx, tuplet, num);
        assert_eq!(tree[num].drawing.cross_staff, None);

        // Beam and num both below the upper staff
        let (mut tree, mut ctx, tuplet, num, lower) = tuplet_reaching_down(1);
        align_num_with(&mut tree, &mut ctx, tuplet, BeamPlace::Below);
        let home = home_staff(&tree, tuplet);
        assert!(!has_valid_tuplet_num_position(&tree, &mut ctx, tuplet, home, lower));
        assert!(has_valid_tuplet_num_position(&tree, &mut ctx, tuplet, lower, home));
        calculate_tuplet_num_cross_staff(&mut tree, &mut ctx, tuplet, num);
        assert_eq!(tree[num].drawing.cross_staff, Some(lower));

        let (mut tree, mut ctx, tuplet, num, _) = tuplet_reaching_down(1);
        align_num_with(&mut tree, &mut ctx, tuplet, BeamPlace::Above);
        calculate_tuplet_num_cross_staff(&mut tree, &mut ctx, tuplet, num);
        assert_eq!(tree[num].drawing.cross_staff, None);
    }
}
