//! Beam geometry: per-member coordinates, placement and slant.
//!
//! The same engine drives beams and fingered tremolos. Every pass rebuilds
//! one [`BeamDrawing`] per beam from the beam's filtered member list, resolves
//! its placement, decides whether the beam is drawn horizontally and then
//! fits the beam line and the member stems.

use serde::Serialize;

use crate::error::{LayoutError, Result};
use crate::model::{BeamPlace, BoundingBox, Duration, ElementId, ElementKind, StaffRel, StemDirection};
use crate::options::LayoutOptions;
use crate::tree::ElementTree;

use super::constants::*;
use super::list::{get_list, list_index};
use super::{chord, staff_rel, staff_size_of, stem, LayoutContext};

/// Layout facts for one beam member.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BeamElementCoord {
    pub element: Option<ElementId>,
    /// Duration code of the member
    pub dur: i32,
    /// Secondary beam break count
    pub breaksec: u8,
    pub stem: Option<ElementId>,
    /// Note the beam anchors on (the chord tone nearest to the beam)
    pub closest_note: Option<ElementId>,
    /// Side of this member the beam is drawn on
    pub beam_relative_place: BeamPlace,
    /// Stem x once resolved
    pub x: i32,
    /// Beam line y at `x`
    pub y_beam: i32,
}

impl BeamElementCoord {
    /// Encoded stem direction of the member.
    fn stem_dir(&self, tree: &ElementTree) -> StemDirection {
        self.element.map_or(StemDirection::None, |e| tree[e].encoded_stem_dir())
    }
}

/// Beam line: start point and slope (rise over run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BeamSegment {
    pub starting_x: i32,
    pub starting_y: i32,
    pub beam_slope: f64,
}

impl BeamSegment {
    pub fn y_at(&self, x: i32) -> i32 {
        self.starting_y + (self.beam_slope * f64::from(x - self.starting_x)).round() as i32
    }
}

/// Per-pass state of one beam or fTrem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeamDrawing {
    pub coords: Vec<BeamElementCoord>,
    /// Members do not all share the same duration (or carry beam breaks)
    pub changing_dur: bool,
    pub beam_has_chord: bool,
    pub has_multiple_stem_dir: bool,
    pub cue_size: bool,
    /// Percentage applied to beam thickness
    pub fraction_size: i32,
    pub cross_staff_content: Option<ElementId>,
    pub cross_staff_rel: StaffRel,
    /// Largest duration code among notes, chords and tab groups
    pub shortest_dur: i32,
    /// Baseline stem direction of the members, `None` when mixed
    pub notes_stem_dir: StemDirection,
    /// Encoded `@place`
    pub encoded_place: Option<BeamPlace>,
    pub drawing_place: BeamPlace,
    pub beam_staff: Option<ElementId>,
    pub beam_width: i32,
    pub beam_width_black: i32,
    pub beam_width_white: i32,
    pub horizontal: bool,
    pub segment: BeamSegment,
}

impl Default for BeamDrawing {
    fn default() -> Self {
        Self {
            coords: Vec::new(),
            changing_dur: false,
            beam_has_chord: false,
            has_multiple_stem_dir: false,
            cue_size: false,
            fraction_size: 100,
            cross_staff_content: None,
            cross_staff_rel: StaffRel::None,
            shortest_dur: 0,
            notes_stem_dir: StemDirection::None,
            encoded_place: None,
            drawing_place: BeamPlace::None,
            beam_staff: None,
            beam_width: 0,
            beam_width_black: 0,
            beam_width_white: 0,
            horizontal: false,
            segment: BeamSegment::default(),
        }
    }
}

/// Direction of the line from `left` to `right`.
fn note_direction(left: i32, right: i32) -> StemDirection {
    if left == right {
        StemDirection::None
    } else if left < right {
        StemDirection::Up
    } else {
        StemDirection::Down
    }
}

fn is_sorted(items: impl Iterator<Item = i32>) -> bool {
    let items: Vec<i32> = items.collect();
    items.windows(2).all(|w| w[0] <= w[1])
}

impl BeamDrawing {
    pub fn reset(&mut self) {
        *self = BeamDrawing::default();
    }

    /// Thickness of the whole beam stack for the shortest duration.
    pub fn total_beam_width(&self) -> i32 {
        let extra = (self.shortest_dur - Duration::Eighth.code()).max(0);
        self.beam_width_black + extra * self.beam_width
    }

    /// Build one coordinate per member and gather the beam statistics.
    pub fn init_coords(
        &mut self,
        tree: &ElementTree,
        ctx: &mut LayoutContext,
        elements: &[ElementId],
        staff: ElementId,
        place: Option<BeamPlace>,
    ) {
        self.reset();
        self.encoded_place = place;
        if elements.is_empty() {
            return;
        }
        self.beam_staff = Some(staff);

        let mut last_dur: Option<i32> = None;
        for &current in elements {
            let Some(element) = tree.get(current) else {
                log::debug!("Error accessing element in beam list");
                return;
            };
            let dur = stem::actual_dur(tree, current).code();
            let breaksec = element.timing().and_then(|t| t.breaksec);

            if element.is(ElementKind::Chord) {
                self.beam_has_chord = true;
            }
            if breaksec.is_some() {
                self.changing_dur = true;
            }
            let coord = BeamElementCoord {
                element: Some(current),
                dur,
                breaksec: breaksec.unwrap_or(0),
                ..Default::default()
            };

            if self.cross_staff_content.is_none() {
                self.detect_cross_staff(tree, ctx, current, staff);
            }

            if element.is_any(&[ElementKind::Chord, ElementKind::Note]) && !self.has_multiple_stem_dir {
                let dir = coord.stem_dir(tree);
                if dir != StemDirection::None {
                    if self.notes_stem_dir != StemDirection::None && self.notes_stem_dir != dir {
                        self.has_multiple_stem_dir = true;
                        self.notes_stem_dir = StemDirection::None;
                    } else {
                        self.notes_stem_dir = dir;
                    }
                }
            }
            if element.is_any(&[ElementKind::Chord, ElementKind::Note, ElementKind::TabGrp]) {
                self.shortest_dur = self.shortest_dur.max(dur);
            }
            if last_dur.is_some_and(|last| last != dur) {
                self.changing_dur = true;
            }
            last_dur = Some(dur);
            self.coords.push(coord);
        }

        if self.coords.is_empty() {
            log::debug!("Beam with no countable elements");
        }
    }

    /// Record the first member drawn on another staff than the beam.
    fn detect_cross_staff(&mut self, tree: &ElementTree, ctx: &mut LayoutContext, current: ElementId, staff: ElementId) {
        let mut candidates = vec![current];
        if tree.is(current, ElementKind::Chord) {
            candidates.extend(chord::top_note(tree, ctx, current));
            candidates.extend(chord::bottom_note(tree, ctx, current));
        }
        for candidate in candidates {
            if let Some(cross) = tree[candidate].drawing.cross_staff.filter(|&s| s != staff) {
                self.cross_staff_content = Some(cross);
                self.cross_staff_rel = staff_rel(tree, cross, staff);
                return;
            }
        }
    }

    /// Decide cue sizing; grace beams default to stems up.
    pub fn init_cue(&mut self, tree: &ElementTree, force_cue: bool) {
        self.cue_size = force_cue
            || self.coords.iter().all(|coord| {
                coord
                    .element
                    .is_some_and(|e| tree[e].is_grace() || tree[e].drawing.cue_size)
            });
        if self.cue_size && self.notes_stem_dir == StemDirection::None {
            self.notes_stem_dir = StemDirection::Up;
        }
    }

    /// Anchor y values and relative places of members with a stem and a
    /// closest note.
    fn anchors(&self, tree: &ElementTree) -> (Vec<i32>, Vec<BeamPlace>) {
        self.coords
            .iter()
            .filter_map(|coord| match (coord.stem, coord.closest_note) {
                (Some(_), Some(note)) => Some((tree[note].drawing.y, coord.beam_relative_place)),
                _ => None,
            })
            .unzip()
    }

    /// Whether the beam is drawn without slant. The checks run in a fixed
    /// order and the first that applies decides.
    pub fn is_horizontal(&self, tree: &ElementTree) -> bool {
        if self.is_repeated_pattern(tree) {
            return true;
        }
        if self.has_one_step_height(tree) {
            return true;
        }
        if self.drawing_place == BeamPlace::None {
            return true;
        }

        let (items, directions) = self.anchors(tree);
        if items.len() < 2 {
            return true;
        }
        let first = items[0];
        let last = items[items.len() - 1];
        if first == last {
            return true;
        }

        if self.drawing_place == BeamPlace::Mixed && self.is_horizontal_mixed_beam(&items, &directions) {
            return true;
        }

        // Two pitches only with a single step at one end
        let first_step = first != items[1];
        let last_step = last != items[items.len() - 2];
        if items.len() > 2 && (first_step || last_step) {
            // Concave shapes
            for &item in &items[1..items.len() - 1] {
                match self.drawing_place {
                    BeamPlace::Above if item >= first && item >= last => return true,
                    BeamPlace::Below if item <= first && item <= last => return true,
                    _ => {}
                }
            }
            let mut pitches = items.clone();
            pitches.dedup();
            if pitches.len() == 2 {
                let ascending = is_sorted(items.iter().copied());
                let descending = is_sorted(items.iter().rev().copied());
                if self.drawing_place == BeamPlace::Above {
                    if (first_step && ascending) || (last_step && descending) {
                        return true;
                    }
                } else if (last_step && ascending) || (first_step && descending) {
                    return true;
                }
            }
        }
        false
    }

    /// Mixed beams going back and forth between the stem sides are drawn
    /// horizontally unless their outer notes follow the inner direction.
    pub fn is_horizontal_mixed_beam(&self, items: &[i32], directions: &[BeamPlace]) -> bool {
        if items.len() != directions.len() || items.is_empty() {
            return false;
        }
        if items.len() == 3
            && self.cross_staff_content.is_some()
            && directions[0] == directions[2]
            && directions[0] != directions[1]
        {
            return true;
        }

        let mut changes = 0;
        let mut previous = directions[0];
        for &current in directions {
            if current != previous {
                changes += 1;
                previous = current;
            }
        }
        if changes <= 1 {
            return false;
        }

        let outside = note_direction(items[0], items[items.len() - 1]);
        let slot = |dir: StemDirection| match dir {
            StemDirection::None => 0,
            StemDirection::Up => 1,
            StemDirection::Down => 2,
        };
        let mut counts = [0usize; 3];
        let mut previous_top: Option<i32> = None;
        let mut previous_bottom: Option<i32> = None;
        for (&item, &place) in items.iter().zip(directions) {
            let previous = match place {
                BeamPlace::Above => &mut previous_top,
                BeamPlace::Below => &mut previous_bottom,
                _ => continue,
            };
            if let Some(p) = *previous {
                counts[slot(note_direction(p, item))] += 1;
            } else {
                *previous = Some(item);
            }
        }
        let outside_count = counts[slot(outside)];
        (0..3).any(|i| i != slot(outside) && counts[i] > outside_count)
    }

    /// A beam repeating the same figure (position and duration) is drawn
    /// horizontally.
    pub fn is_repeated_pattern(&self, tree: &ElementTree) -> bool {
        if matches!(self.drawing_place, BeamPlace::Mixed | BeamPlace::None) {
            return false;
        }
        if self.coords.len() < 4 {
            return false;
        }
        let items: Vec<i64> = self
            .coords
            .iter()
            .filter_map(|coord| match (coord.stem, coord.closest_note) {
                (Some(_), Some(note)) => {
                    Some(i64::from(tree[note].drawing.y) * Duration::COUNT + i64::from(coord.dur))
                }
                _ => None,
            })
            .collect();
        let count = items.len();
        if count < 4 || items.iter().all(|&item| item == items[0]) {
            return false;
        }

        (2..=count / 2).filter(|d| count % d == 0).any(|divider| {
            let pattern = &items[..divider];
            items.chunks(divider).all(|chunk| chunk == pattern)
        })
    }

    /// Very short values spanning at most one staff step.
    pub fn has_one_step_height(&self, tree: &ElementTree) -> bool {
        if self.shortest_dur < Duration::ThirtySecond.code() {
            return false;
        }
        let locs: Vec<i32> = self
            .coords
            .iter()
            .filter_map(|coord| coord.closest_note.map(|n| tree[n].drawing.loc))
            .collect();
        let top = locs.iter().copied().max().unwrap_or(-128);
        let bottom = locs.iter().copied().min().unwrap_or(128);
        (top - bottom).abs() <= 1
    }

    /// Staves the beam itself extends into, as `(above, below)`; `None`
    /// when the beam stays on its own staff.
    pub fn beam_overflow(&self) -> Option<(Option<ElementId>, Option<ElementId>)> {
        let (Some(beam_staff), Some(cross)) = (self.beam_staff, self.cross_staff_content) else {
            return None;
        };
        match self.drawing_place {
            BeamPlace::Mixed => Some((None, None)),
            BeamPlace::Below => {
                let below = if self.cross_staff_rel == StaffRel::Above { beam_staff } else { cross };
                Some((None, Some(below)))
            }
            BeamPlace::Above => {
                let above = if self.cross_staff_rel == StaffRel::Below { beam_staff } else { cross };
                Some((Some(above), None))
            }
            BeamPlace::None => None,
        }
    }

    /// Staves the members of a cross-staff beam extend into.
    pub fn beam_child_overflow(&self) -> Option<(Option<ElementId>, Option<ElementId>)> {
        let (Some(beam_staff), Some(cross)) = (self.beam_staff, self.cross_staff_content) else {
            return None;
        };
        if self.cross_staff_rel == StaffRel::Above {
            Some((Some(cross), Some(beam_staff)))
        } else {
            Some((Some(beam_staff), Some(cross)))
        }
    }

    /// Side of the staff the beam goes to.
    fn resolve_place(&self, tree: &ElementTree, ctx: &mut LayoutContext) -> BeamPlace {
        if let Some(place) = self.encoded_place.filter(|&p| p != BeamPlace::None) {
            return place;
        }
        if self.has_multiple_stem_dir {
            return BeamPlace::Mixed;
        }
        match self.notes_stem_dir {
            StemDirection::Up => return BeamPlace::Above,
            StemDirection::Down => return BeamPlace::Below,
            StemDirection::None => {}
        }
        if self.cross_staff_content.is_some() {
            return BeamPlace::Mixed;
        }

        let mut locs = Vec::new();
        for element in self.coords.iter().filter_map(|c| c.element) {
            match tree.kind(element) {
                Some(ElementKind::Note) => locs.push(tree[element].drawing.loc),
                Some(ElementKind::Chord) => {
                    if let Some((top, bottom)) = chord::loc_extremes(tree, ctx, element) {
                        locs.extend([top, bottom]);
                    }
                }
                _ => {}
            }
        }
        let (Some(top), Some(bottom)) = (locs.iter().max(), locs.iter().min()) else {
            return BeamPlace::None;
        };
        if top - MIDDLE_LINE_LOC >= MIDDLE_LINE_LOC - bottom {
            BeamPlace::Below
        } else {
            BeamPlace::Above
        }
    }

    /// Side of one member the beam is drawn on.
    fn relative_place(&self, tree: &ElementTree, element: ElementId) -> BeamPlace {
        if self.drawing_place != BeamPlace::Mixed {
            return self.drawing_place;
        }
        match tree[element].encoded_stem_dir() {
            StemDirection::Up => BeamPlace::Above,
            StemDirection::Down => BeamPlace::Below,
            StemDirection::None => {
                let on_staff_above = match (tree[element].drawing.cross_staff, self.beam_staff) {
                    (Some(cross), Some(staff)) => staff_rel(tree, cross, staff) == StaffRel::Above,
                    _ => false,
                };
                if on_staff_above {
                    BeamPlace::Below
                } else {
                    BeamPlace::Above
                }
            }
        }
    }
}

/// Members of a beam: notes, chords, rests and tab groups. Chord tones and
/// tab notes are reached through their container; grace notes are only kept
/// in a beam that starts with one.
pub(crate) fn filter_list(tree: &ElementTree, list: &mut Vec<ElementId>) {
    list.retain(|&id| {
        tree.get(id).is_some_and(|e| {
            e.is_any(&[ElementKind::Note, ElementKind::Chord, ElementKind::Rest, ElementKind::TabGrp])
        }) && tree.chord_of(id).is_none()
            && tree.first_ancestor(id, ElementKind::TabGrp, None).is_none()
    });
    let grace_beam = list.first().is_some_and(|&first| tree[first].is_grace());
    list.retain(|&id| tree[id].is_grace() == grace_beam);
}

/// Position of `element` in the beam; a chord tone resolves to its chord.
pub fn position(tree: &ElementTree, ctx: &mut LayoutContext, owner: ElementId, element: ElementId) -> Option<usize> {
    list_index(tree, ctx, owner, element)
        .or_else(|| tree.chord_of(element).and_then(|c| list_index(tree, ctx, owner, c)))
}

pub fn is_first_in(tree: &ElementTree, ctx: &mut LayoutContext, owner: ElementId, element: ElementId) -> Result<bool> {
    let position = position(tree, ctx, owner, element).ok_or_else(|| not_a_member(owner, element))?;
    Ok(position == 0)
}

pub fn is_last_in(tree: &ElementTree, ctx: &mut LayoutContext, owner: ElementId, element: ElementId) -> Result<bool> {
    let size = get_list(tree, ctx, owner).len();
    let position = position(tree, ctx, owner, element).ok_or_else(|| not_a_member(owner, element))?;
    Ok(position + 1 == size)
}

fn not_a_member(owner: ElementId, element: ElementId) -> LayoutError {
    LayoutError::InvalidState(format!("element {} is not part of beam {}", element.index(), owner.index()))
}

// ═══════════════════════════════════════════════════════════════════════
// Layout pass
// ═══════════════════════════════════════════════════════════════════════

/// Lay out one beam or fTrem: statistics, placement, slant, line and stems.
pub(crate) fn layout_beam(tree: &mut ElementTree, ctx: &mut LayoutContext, options: &LayoutOptions, beam: ElementId) {
    let Some(staff) = tree.first_ancestor(beam, ElementKind::Staff, None) else {
        log::warn!("Beam {} is not inside a staff", beam.index());
        return;
    };
    let Some(attrs) = tree[beam].beam_attrs().cloned() else {
        return;
    };

    let elements = get_list(tree, ctx, beam);
    let mut drawing = BeamDrawing::default();
    drawing.init_coords(tree, ctx, &elements, staff, attrs.place);
    if drawing.coords.is_empty() {
        ctx.beams.insert(beam, drawing);
        return;
    }
    drawing.init_cue(tree, attrs.cue);
    drawing.drawing_place = drawing.resolve_place(tree, ctx);

    let unit = options.drawing_unit(staff_size_of(tree, beam));
    drawing.fraction_size = if drawing.cue_size { options.grace_factor } else { 100 };
    drawing.beam_width_black = tenths(unit, BEAM_WIDTH_BLACK_TENTHS) * drawing.fraction_size / 100;
    drawing.beam_width_white = tenths(unit, BEAM_WIDTH_WHITE_TENTHS) * drawing.fraction_size / 100;
    drawing.beam_width = drawing.beam_width_black + drawing.beam_width_white;

    for i in 0..drawing.coords.len() {
        let Some(element) = drawing.coords[i].element else {
            continue;
        };
        let place = drawing.relative_place(tree, element);
        let dir = if place == BeamPlace::Below { StemDirection::Down } else { StemDirection::Up };
        let closest = match tree.kind(element) {
            Some(ElementKind::Note) => Some(element),
            Some(ElementKind::Chord) if dir == StemDirection::Up => chord::top_note(tree, ctx, element),
            Some(ElementKind::Chord) => chord::bottom_note(tree, ctx, element),
            _ => None,
        };
        let stem = stem::drawing_stem(tree, element);
        if stem.is_some() {
            stem::set_stem_geometry(tree, ctx, options, element, dir, None);
        }
        let coord = &mut drawing.coords[i];
        coord.beam_relative_place = place;
        coord.closest_note = closest;
        coord.stem = stem;
        if let Some(stem) = stem {
            coord.x = tree[stem].drawing.x;
        }
    }

    drawing.horizontal = drawing.is_horizontal(tree);
    fit_segment(tree, ctx, options, &mut drawing, unit);

    for coord in &mut drawing.coords {
        let (Some(element), Some(_)) = (coord.element, coord.stem) else {
            continue;
        };
        coord.y_beam = drawing.segment.y_at(coord.x);
        let dir = if coord.beam_relative_place == BeamPlace::Below {
            StemDirection::Down
        } else {
            StemDirection::Up
        };
        stem::set_stem_geometry(tree, ctx, options, element, dir, Some(coord.y_beam));
    }
    tree[beam].drawing.bbox = beam_bbox(&drawing);
    log::debug!(
        "Beam {}: place {:?}, horizontal {}, slope {:.3}",
        beam.index(),
        drawing.drawing_place,
        drawing.horizontal,
        drawing.segment.beam_slope
    );
    ctx.beams.insert(beam, drawing);
}

/// Fit the beam line through the stem ends of the outer members, clamp its
/// slope and move it away from the notes until every stem is long enough.
fn fit_segment(
    tree: &ElementTree,
    ctx: &mut LayoutContext,
    options: &LayoutOptions,
    drawing: &mut BeamDrawing,
    unit: i32,
) {
    let scale = |v: i32| if drawing.cue_size { options.cue_size(v) } else { v };
    let unit = scale(unit);
    let min_stem = MIN_BEAMED_STEM_UNITS * unit;

    // (stem x, closest note y, side)
    let anchors: Vec<(i32, i32, BeamPlace)> = drawing
        .coords
        .iter()
        .filter_map(|c| {
            let note = c.closest_note?;
            c.stem?;
            Some((c.x, tree[note].drawing.y, c.beam_relative_place))
        })
        .collect();
    let (Some(&first), Some(&last)) = (anchors.first(), anchors.last()) else {
        drawing.segment = BeamSegment::default();
        return;
    };

    let stem_ends: Vec<i32> = drawing
        .coords
        .iter()
        .filter(|c| c.closest_note.is_some())
        .filter_map(|c| c.element.filter(|_| c.stem.is_some()))
        .map(|e| stem::drawing_stem_end(tree, ctx, e).1)
        .collect();

    let dx = last.0 - first.0;
    let slope = if drawing.horizontal || dx == 0 {
        0.0
    } else {
        let rise = f64::from(stem_ends[stem_ends.len() - 1] - stem_ends[0]);
        (rise / f64::from(dx)).clamp(-options.beam_max_slope, options.beam_max_slope)
    };

    let starting_y = if drawing.drawing_place == BeamPlace::Mixed {
        // Between the highest note with the beam above and the lowest with
        // the beam below
        let top = anchors.iter().filter(|a| a.2 == BeamPlace::Above).map(|a| a.1).max();
        let bottom = anchors.iter().filter(|a| a.2 == BeamPlace::Below).map(|a| a.1).min();
        match (top, bottom) {
            (Some(t), Some(b)) => (t + b) / 2,
            _ => stem_ends[0],
        }
    } else if drawing.horizontal {
        let ends = stem_ends.iter().copied();
        if drawing.drawing_place == BeamPlace::Below {
            ends.min().unwrap_or(stem_ends[0])
        } else {
            ends.max().unwrap_or(stem_ends[0])
        }
    } else {
        stem_ends[0]
    };
    let mut segment = BeamSegment {
        starting_x: first.0,
        starting_y,
        beam_slope: slope,
    };

    if drawing.drawing_place != BeamPlace::Mixed {
        let sign = if drawing.drawing_place == BeamPlace::Below { -1 } else { 1 };
        let shift = anchors
            .iter()
            .map(|&(x, note_y, _)| min_stem - (segment.y_at(x) - note_y) * sign)
            .max()
            .unwrap_or(0)
            .max(0);
        segment.starting_y += sign * shift;
    }
    drawing.segment = segment;
}

fn beam_bbox(drawing: &BeamDrawing) -> Option<BoundingBox> {
    let stems: Vec<&BeamElementCoord> = drawing.coords.iter().filter(|c| c.stem.is_some()).collect();
    let (first, last) = (stems.first()?, stems.last()?);
    let width = drawing.total_beam_width();
    let (y1, y2) = (first.y_beam, last.y_beam);
    Some(match drawing.drawing_place {
        BeamPlace::Below => BoundingBox::new(first.x, last.x, y1.min(y2), y1.max(y2) + width),
        BeamPlace::Mixed => BoundingBox::new(first.x, last.x, y1.min(y2) - width / 2, y1.max(y2) + width / 2),
        _ => BoundingBox::new(first.x, last.x, y1.min(y2) - width, y1.max(y2)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use pretty_assertions::assert_eq;

    /// Beam of eighth notes with stems whose drawing y is set directly.
    fn beam_with_ys(ys: &[i32]) -> (ElementTree, ElementId, ElementId, Vec<ElementId>) {
        let mut tree = ElementTree::new();
        let measure = tree.add_root(Element::new(ElementData::Measure));
        let staff = tree.add_child(measure, Element::staff(1)).unwrap();
        let layer = tree.add_child(staff, Element::new(ElementData::Layer)).unwrap();
        let beam = tree.add_child(layer, Element::new(ElementData::Beam(BeamAttrs::default()))).unwrap();
        let mut notes = Vec::new();
        for (i, &y) in ys.iter().enumerate() {
            let note = tree
                .add_child(beam, Element::note(Pitch::from_diatonic(30), Some(Duration::Eighth)))
                .unwrap();
            tree.add_child(note, Element::new(ElementData::Stem)).unwrap();
            tree[note].drawing.y = y;
            tree[note].drawing.loc = y;
            tree[note].drawing.x = i as i32 * 100;
            notes.push(note);
        }
        (tree, staff, beam, notes)
    }

    fn drawing_for(tree: &ElementTree, staff: ElementId, beam: ElementId, place: BeamPlace) -> BeamDrawing {
        let mut ctx = LayoutContext::default();
        let elements = get_list(tree, &mut ctx, beam);
        let mut drawing = BeamDrawing::default();
        drawing.init_coords(tree, &mut ctx, &elements, staff, None);
        drawing.drawing_place = place;
        for coord in &mut drawing.coords {
            let element = coord.element.unwrap();
            coord.stem = stem::drawing_stem(tree, element);
            coord.closest_note = Some(element);
            coord.beam_relative_place = place;
        }
        drawing
    }

    #[test]
    fn flat_beam_is_horizontal() {
        let (tree, staff, beam, _) = beam_with_ys(&[0, 0, 0]);
        assert!(drawing_for(&tree, staff, beam, BeamPlace::Above).is_horizontal(&tree));
    }

    #[test]
    fn unplaced_beam_is_horizontal() {
        let (tree, staff, beam, _) = beam_with_ys(&[0, 5]);
        assert!(drawing_for(&tree, staff, beam, BeamPlace::None).is_horizontal(&tree));
    }

    #[test]
    fn rising_beam_above_is_angled() {
        let (tree, staff, beam, _) = beam_with_ys(&[0, 5, 10]);
        let drawing = drawing_for(&tree, staff, beam, BeamPlace::Above);
        assert!(!drawing.is_horizontal(&tree));
        // Pure: same input, same answer
        assert_eq!(drawing.is_horizontal(&tree), drawing.clone().is_horizontal(&tree));
    }

    #[test]
    fn concave_beam_is_horizontal() {
        let (tree, staff, beam, _) = beam_with_ys(&[0, 20, 10]);
        assert!(drawing_for(&tree, staff, beam, BeamPlace::Above).is_horizontal(&tree));
        assert!(!drawing_for(&tree, staff, beam, BeamPlace::Below).is_horizontal(&tree));
    }

    #[test]
    fn repeated_pattern_detection() {
        let (tree, staff, beam, _) = beam_with_ys(&[0, 90, 0, 90, 0, 90]);
        let drawing = drawing_for(&tree, staff, beam, BeamPlace::Above);
        assert!(drawing.is_repeated_pattern(&tree));
        assert!(drawing.is_horizontal(&tree));

        let (tree, staff, beam, _) = beam_with_ys(&[0, 10, 20, 30, 40, 50]);
        assert!(!drawing_for(&tree, staff, beam, BeamPlace::Above).is_repeated_pattern(&tree));

        let (tree, staff, beam, _) = beam_with_ys(&[0, 90, 0]);
        assert!(!drawing_for(&tree, staff, beam, BeamPlace::Above).is_repeated_pattern(&tree));

        let (tree, staff, beam, _) = beam_with_ys(&[45, 45, 45, 45]);
        assert!(!drawing_for(&tree, staff, beam, BeamPlace::Above).is_repeated_pattern(&tree));
    }

    #[test]
    fn mixed_beam_switching_sides_against_outer_direction() {
        let drawing = BeamDrawing::default();
        let above = BeamPlace::Above;
        let below = BeamPlace::Below;
        // Outer notes rise, but both inner groups fall
        let items = [100, 400, 90, -200, 110];
        let directions = [above, below, above, below, above];
        assert!(drawing.is_horizontal_mixed_beam(&items, &directions));
        // A single side switch never forces horizontal
        assert!(!drawing.is_horizontal_mixed_beam(&[0, 10, 20], &[above, above, below]));
    }

    #[test]
    fn stem_direction_statistics() {
        let (mut tree, staff, beam, notes) = beam_with_ys(&[0, 10, 20]);
        if let ElementData::Note(n) = &mut tree[notes[0]].data {
            n.timing.stem_dir = StemDirection::Up;
        }
        if let ElementData::Note(n) = &mut tree[notes[2]].data {
            n.timing.stem_dir = StemDirection::Down;
            n.timing.dur = Some(Duration::Sixteenth);
        }
        let drawing = drawing_for(&tree, staff, beam, BeamPlace::None);
        assert!(drawing.has_multiple_stem_dir);
        assert_eq!(drawing.notes_stem_dir, StemDirection::None);
        assert!(drawing.changing_dur);
        assert_eq!(drawing.shortest_dur, Duration::Sixteenth.code());
    }

    #[test]
    fn grace_beam_defaults_to_stems_up() {
        let (mut tree, staff, beam, notes) = beam_with_ys(&[0, 10]);
        for &note in &notes {
            tree[note].timing_mut().unwrap().grace = true;
        }
        let mut drawing = drawing_for(&tree, staff, beam, BeamPlace::None);
        drawing.init_cue(&tree, false);
        assert!(drawing.cue_size);
        assert_eq!(drawing.notes_stem_dir, StemDirection::Up);
    }

    #[test]
    fn chord_tone_position_resolves_to_chord() {
        let (mut tree, _, beam, notes) = beam_with_ys(&[0, 10]);
        let chord = tree.add_child(beam, Element::chord(Duration::Eighth)).unwrap();
        let tone = tree.add_child(chord, Element::note(Pitch::from_diatonic(33), None)).unwrap();
        let mut ctx = LayoutContext::default();
        assert_eq!(position(&tree, &mut ctx, beam, tone), Some(2));
        assert_eq!(is_first_in(&tree, &mut ctx, beam, notes[0]), Ok(true));
        assert_eq!(is_last_in(&tree, &mut ctx, beam, tone), Ok(true));
        let outsider = tree.add_root(Element::new(ElementData::Measure));
        assert!(matches!(
            is_first_in(&tree, &mut ctx, beam, outsider),
            Err(LayoutError::InvalidState(_))
        ));
    }

    #[test]
    fn overflow_needs_cross_staff_content() {
        let mut drawing = BeamDrawing::default();
        assert_eq!(drawing.beam_overflow(), None);
        drawing.beam_staff = Some(ElementId(1));
        drawing.cross_staff_content = Some(ElementId(7));
        drawing.cross_staff_rel = StaffRel::Below;
        drawing.drawing_place = BeamPlace::Above;
        assert_eq!(drawing.beam_overflow(), Some((Some(ElementId(1)), None)));
        drawing.drawing_place = BeamPlace::Mixed;
        assert_eq!(drawing.beam_overflow(), Some((None, None)));
        assert_eq!(drawing.beam_child_overflow(), Some((Some(ElementId(1)), Some(ElementId(7)))));
    }

    #[test]
    fn overflow_below_and_child_overflow_follow_the_cross_staff_side() {
        let mut drawing = BeamDrawing {
            beam_staff: Some(ElementId(1)),
            cross_staff_content: Some(ElementId(7)),
            cross_staff_rel: StaffRel::Below,
            drawing_place: BeamPlace::Below,
            ..Default::default()
        };
        assert_eq!(drawing.beam_overflow(), Some((None, Some(ElementId(7)))));
        assert_eq!(drawing.beam_child_overflow(), Some((Some(ElementId(1)), Some(ElementId(7)))));

        drawing.cross_staff_rel = StaffRel::Above;
        assert_eq!(drawing.beam_overflow(), Some((None, Some(ElementId(1)))));
        assert_eq!(drawing.beam_child_overflow(), Some((Some(ElementId(7)), Some(ElementId(1)))));
        drawing.drawing_place = BeamPlace::Above;
        assert_eq!(drawing.beam_overflow(), Some((Some(ElementId(7)), None)));

        drawing.cross_staff_content = None;
        assert_eq!(drawing.beam_child_overflow(), None);
    }

    #[test]
    fn three_note_cross_staff_zigzag_is_horizontal() {
        let above = BeamPlace::Above;
        let below = BeamPlace::Below;
        let items = [0, 10, 20];
        let directions = [above, below, above];
        let mut drawing = BeamDrawing::default();
        assert!(!drawing.is_horizontal_mixed_beam(&items, &directions));
        drawing.cross_staff_content = Some(ElementId(7));
        assert!(drawing.is_horizontal_mixed_beam(&items, &directions));
        // Only an outer pair on the same side qualifies
        assert!(!drawing.is_horizontal_mixed_beam(&items, &[above, below, below]));
    }

    fn set_dur(tree: &mut ElementTree, notes: &[ElementId], dur: Duration) {
        for &note in notes {
            tree[note].timing_mut().unwrap().dur = Some(dur);
        }
    }

    #[test]
    fn short_values_within_one_step_are_horizontal() {
        let (mut tree, staff, beam, notes) = beam_with_ys(&[0, 1, 1]);
        let drawing = drawing_for(&tree, staff, beam, BeamPlace::Below);
        assert!(!drawing.has_one_step_height(&tree));
        assert!(!drawing.is_horizontal(&tree));

        set_dur(&mut tree, &notes, Duration::ThirtySecond);
        let drawing = drawing_for(&tree, staff, beam, BeamPlace::Below);
        assert!(drawing.has_one_step_height(&tree));
        assert!(drawing.is_horizontal(&tree));

        let (mut tree, staff, beam, notes) = beam_with_ys(&[0, 2, 2]);
        set_dur(&mut tree, &notes, Duration::ThirtySecond);
        assert!(!drawing_for(&tree, staff, beam, BeamPlace::Below).has_one_step_height(&tree));
    }

    /// Staves above and below the beam's own staff.
    fn outer_staves(tree: &mut ElementTree) -> (ElementId, ElementId) {
        let measure = tree.roots()[0];
        let upper = tree.add_child(measure, Element::staff(2)).unwrap();
        let lower = tree.add_child(measure, Element::staff(3)).unwrap();
        tree[upper].drawing.y = 1800;
        tree[lower].drawing.y = -1800;
        (upper, lower)
    }

    #[test]
    fn first_member_on_another_staff_decides_cross_staff() {
        let (mut tree, staff, beam, notes) = beam_with_ys(&[0, 10, 20]);
        let (upper, lower) = outer_staves(&mut tree);
        tree[notes[0]].drawing.cross_staff = Some(staff);
        tree[notes[1]].drawing.cross_staff = Some(lower);
        tree[notes[2]].drawing.cross_staff = Some(upper);
        let drawing = drawing_for(&tree, staff, beam, BeamPlace::None);
        assert_eq!(drawing.cross_staff_content, Some(lower));
        assert_eq!(drawing.cross_staff_rel, StaffRel::Below);
    }

    #[test]
    fn chords_cross_staff_through_their_outer_tones() {
        let (mut tree, staff, beam, _) = beam_with_ys(&[0]);
        let (upper, _) = outer_staves(&mut tree);
        let chord = tree.add_child(beam, Element::chord(Duration::Eighth)).unwrap();
        let tones: Vec<ElementId> = [28, 31, 35]
            .iter()
            .map(|&p| tree.add_child(chord, Element::note(Pitch::from_diatonic(p), None)).unwrap())
            .collect();

        tree[tones[2]].drawing.cross_staff = Some(upper);
        let drawing = drawing_for(&tree, staff, beam, BeamPlace::None);
        assert!(drawing.beam_has_chord);
        assert_eq!(drawing.cross_staff_content, Some(upper));
        assert_eq!(drawing.cross_staff_rel, StaffRel::Above);

        // A middle tone alone does not count
        tree[tones[2]].drawing.cross_staff = None;
        tree[tones[1]].drawing.cross_staff = Some(upper);
        assert_eq!(drawing_for(&tree, staff, beam, BeamPlace::None).cross_staff_content, None);
    }
}
