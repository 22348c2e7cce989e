//! Seed alignment: the horizontal and vertical positions the engines start
//! from.
//!
//! Every measure gets a beat map shared by all its staves: each distinct
//! onset time maps to an x position, so simultaneous events line up across
//! staves. Staves are stacked top to bottom and every pitched element gets
//! its staff location from the clef in force.

use crate::error::Result;
use crate::model::{BoundingBox, Clef, Duration, Element, ElementData, ElementId, ElementKind, StaffRel, StemDirection};
use crate::options::LayoutOptions;
use crate::tree::{ElementTree, Functor, FunctorCode};

use super::constants::*;
use super::{chord, drawing_staff, stem, LayoutContext};

/// Onset times closer than this are the same beat (in whole notes).
const BEAT_EPSILON: f64 = 1e-6;

/// One timed event of a layer.
#[derive(Debug, Clone)]
struct Event {
    element: ElementId,
    /// Onset in whole notes from the start of the measure
    time: f64,
    /// Clef in force at the event
    clef: Clef,
    /// Position before the main note for grace notes (1 = closest)
    grace_rank: i32,
}

/// Running state while walking a layer.
struct LayerWalk {
    time: f64,
    clef: Clef,
    pending_graces: Vec<ElementId>,
    events: Vec<Event>,
}

/// Seed positions for every measure of the tree.
pub(crate) fn align(tree: &mut ElementTree, options: &LayoutOptions) -> Result<()> {
    resolve_cross_staff(tree);
    create_parts(tree)?;
    for root in tree.roots().to_vec() {
        propagate_cue_size(tree, root);
    }

    let mut measure_x = 0;
    for measure in tree.roots().to_vec() {
        if !tree.is(measure, ElementKind::Measure) {
            log::warn!("Skipping a {:?} at the top level", tree.kind(measure));
            continue;
        }
        measure_x = align_measure(tree, options, measure, measure_x);
    }
    Ok(())
}

/// Lay out one measure starting at `x`; returns the x of its right edge.
fn align_measure(tree: &mut ElementTree, options: &LayoutOptions, measure: ElementId, x: i32) -> i32 {
    tree[measure].drawing.x = x;

    // ── Staves ──
    let mut y = 0;
    let staves: Vec<ElementId> = tree
        .children(measure)
        .iter()
        .copied()
        .filter(|&s| tree.is(s, ElementKind::Staff))
        .collect();
    for &staff in &staves {
        let size = tree[staff].staff_attrs().map_or(100, |a| a.size);
        let d = &mut tree[staff].drawing;
        d.x = x;
        d.y = y;
        y -= options.drawing_staff_size(size) + options.staff_spacing_units * options.drawing_unit(size);
    }

    // ── Events ──
    let mut events = Vec::new();
    let mut end_time: f64 = 0.0;
    for &staff in &staves {
        let clef = tree[staff].staff_attrs().map(|a| a.clef).unwrap_or_default();
        for layer in tree.children(staff).to_vec() {
            let mut walk = LayerWalk {
                time: 0.0,
                clef,
                pending_graces: Vec::new(),
                events: Vec::new(),
            };
            collect_events(tree, layer, 1.0, &mut walk);
            flush_graces(&mut walk);
            end_time = end_time.max(walk.time);
            events.extend(walk.events);
        }
    }

    // ── Beat map ──
    let unit = options.unit;
    let mut beats: Vec<(f64, i32)> = Vec::new();
    for event in &events {
        match beats.iter_mut().find(|(t, _)| (t - event.time).abs() < BEAT_EPSILON) {
            Some(beat) => beat.1 = beat.1.max(event.grace_rank),
            None => beats.push((event.time, event.grace_rank)),
        }
    }
    if !beats.iter().any(|(t, _)| (t - end_time).abs() < BEAT_EPSILON) {
        beats.push((end_time, 0));
    }
    beats.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut beat_x: Vec<(f64, i32)> = Vec::with_capacity(beats.len());
    let mut cursor = x + LEFT_PADDING_UNITS * unit;
    let mut previous: Option<f64> = None;
    for &(time, graces) in &beats {
        if let Some(p) = previous {
            cursor += (spacing_units(time - p) * f64::from(unit)).round() as i32;
        }
        cursor += graces * GRACE_SPACING_UNITS * unit;
        beat_x.push((time, cursor));
        previous = Some(time);
    }
    let x_at = |time: f64| {
        beat_x
            .iter()
            .find(|(t, _)| (t - time).abs() < BEAT_EPSILON)
            .map_or(x, |&(_, bx)| bx)
    };

    // ── Positions ──
    for event in &events {
        let grace_unit = options.cue_size(unit);
        let ex = x_at(event.time) - event.grace_rank * GRACE_SPACING_UNITS * grace_unit;
        place_event(tree, options, event, ex);
    }

    let right = beat_x.last().map_or(x, |&(_, bx)| bx) + LEFT_PADDING_UNITS * unit;
    for &staff in &staves {
        let size = tree[staff].staff_attrs().map_or(100, |a| a.size);
        let top = tree[staff].drawing.y;
        tree[staff].drawing.bbox = Some(BoundingBox::new(x, right, top - options.drawing_staff_size(size), top));
    }
    right
}

/// Horizontal space given to a duration, in units.
fn spacing_units(gap: f64) -> f64 {
    (6.0 * (gap * 16.0).sqrt()).max(3.0)
}

/// Length of a timed element in whole notes.
fn whole_notes(tree: &ElementTree, id: ElementId) -> f64 {
    let dur = stem::actual_dur(tree, id);
    let base = 2f64.powi(Duration::Whole.code() - dur.code());
    let dots = tree[id].timing().map_or(0, |t| t.dots);
    base * (2.0 - 0.5f64.powi(i32::from(dots)))
}

fn collect_events(tree: &ElementTree, parent: ElementId, ratio: f64, walk: &mut LayerWalk) {
    for &child in tree.children(parent) {
        let element = &tree[child];
        match &element.data {
            ElementData::Note(_) | ElementData::Chord(_) | ElementData::Rest(_) | ElementData::Space(_) | ElementData::TabGrp(_) => {
                if element.is_grace() {
                    walk.pending_graces.push(child);
                    continue;
                }
                walk.events.push(Event {
                    element: child,
                    time: walk.time,
                    clef: walk.clef,
                    grace_rank: 0,
                });
                flush_graces(walk);
                walk.time += whole_notes(tree, child) * ratio;
            }
            ElementData::Tuplet(attrs) => {
                let factor = match (attrs.num, attrs.numbase) {
                    (Some(num), Some(base)) if num > 0 => f64::from(base) / f64::from(num),
                    _ => 1.0,
                };
                collect_events(tree, child, ratio * factor, walk);
            }
            // Both members of a fingered tremolo carry the full duration
            ElementData::FTrem(_) => collect_events(tree, child, ratio * 0.5, walk),
            ElementData::Clef(clef) => walk.clef = *clef,
            _ => collect_events(tree, child, ratio, walk),
        }
    }
}

/// Attach pending grace notes to the current onset.
fn flush_graces(walk: &mut LayerWalk) {
    let count = walk.pending_graces.len() as i32;
    for (i, grace) in walk.pending_graces.drain(..).enumerate() {
        walk.events.push(Event {
            element: grace,
            time: walk.time,
            clef: walk.clef,
            grace_rank: count - i as i32,
        });
    }
}

struct StaffFrame {
    bottom: i32,
    unit: i32,
    clef: Clef,
}

fn staff_frame(tree: &ElementTree, options: &LayoutOptions, id: ElementId, event_clef: Clef) -> Option<StaffFrame> {
    let staff = drawing_staff(tree, id)?;
    let attrs = tree[staff].staff_attrs().cloned().unwrap_or_default();
    let own = tree.first_ancestor(id, ElementKind::Staff, None);
    Some(StaffFrame {
        bottom: tree[staff].drawing.y - options.drawing_staff_size(attrs.size),
        unit: options.drawing_unit(attrs.size),
        clef: if own == Some(staff) { event_clef } else { attrs.clef },
    })
}

fn scaled(tree: &ElementTree, options: &LayoutOptions, id: ElementId, value: i32) -> i32 {
    if tree[id].drawing.cue_size {
        options.cue_size(value)
    } else {
        value
    }
}

fn place_event(tree: &mut ElementTree, options: &LayoutOptions, event: &Event, x: i32) {
    let id = event.element;
    let Some(frame) = staff_frame(tree, options, id, event.clef) else {
        log::warn!("Element {} is not on a staff", id.index());
        return;
    };
    tree[id].drawing.x = x;
    match tree.kind(id) {
        Some(ElementKind::Note) => place_note(tree, options, id, x, &frame),
        Some(ElementKind::Chord) => {
            let mut top: Option<i32> = None;
            for note in tree.find_all_descendants(id, &[ElementKind::Note]) {
                let note_frame = if tree[note].drawing.cross_staff.is_some() {
                    staff_frame(tree, options, note, event.clef)
                } else {
                    staff_frame(tree, options, id, event.clef)
                };
                if let Some(note_frame) = note_frame {
                    place_note(tree, options, note, x, &note_frame);
                    top = Some(top.map_or(tree[note].drawing.y, |t: i32| t.max(tree[note].drawing.y)));
                }
            }
            tree[id].drawing.y = top.unwrap_or(frame.bottom + MIDDLE_LINE_LOC * frame.unit);
        }
        Some(ElementKind::Rest) => {
            let y = frame.bottom + MIDDLE_LINE_LOC * frame.unit;
            let unit = scaled(tree, options, id, frame.unit);
            let width = 2 * tenths(unit, NOTEHEAD_RADIUS_TENTHS);
            let code = stem::actual_dur(tree, id).code();
            let half_height = match code {
                c if c <= Duration::Half.code() => unit / 2,
                c if c == Duration::Quarter.code() => 3 * unit,
                c => 2 * unit + (c - Duration::Eighth.code()) * unit,
            };
            let d = &mut tree[id].drawing;
            d.y = y;
            d.loc = MIDDLE_LINE_LOC;
            d.bbox = Some(BoundingBox::new(x, x + width, y - half_height, y + half_height));
        }
        _ => {
            let d = &mut tree[id].drawing;
            d.y = frame.bottom + MIDDLE_LINE_LOC * frame.unit;
            d.loc = MIDDLE_LINE_LOC;
        }
    }
    place_dots(tree, options, id, frame.unit);
}

fn place_note(tree: &mut ElementTree, options: &LayoutOptions, note: ElementId, x: i32, frame: &StaffFrame) {
    let loc_override = match &tree[note].data {
        ElementData::Note(n) => n.loc,
        _ => return,
    };
    let loc = loc_override.unwrap_or_else(|| frame.clef.loc_of(tree[note].diatonic_pitch()));
    let y = frame.bottom + loc * frame.unit;
    let unit = scaled(tree, options, note, frame.unit);
    let radius = tenths(unit, NOTEHEAD_RADIUS_TENTHS);
    {
        let d = &mut tree[note].drawing;
        d.x = x;
        d.y = y;
        d.loc = loc;
        d.bbox = Some(BoundingBox::new(x, x + 2 * radius, y - unit, y + unit));
    }

    // Chord tones get their accidentals from the chord column layout
    if tree.chord_of(note).is_none() {
        if let Some(accid) = tree
            .children(note)
            .iter()
            .copied()
            .find(|&c| tree.is(c, ElementKind::Accid))
        {
            let width = tenths(unit, ACCID_GLYPH_WIDTH_TENTHS);
            let half = unit / 2;
            let ax = x - width - half;
            let d = &mut tree[accid].drawing;
            d.x = ax;
            d.y = y;
            d.bbox = Some(BoundingBox::new(ax, ax + width, y - 3 * half, y + 3 * half));
        }
    }
}

/// Augmentation dots right of the notehead, moved off staff lines.
fn place_dots(tree: &mut ElementTree, options: &LayoutOptions, id: ElementId, staff_unit: i32) {
    let Some(dot) = tree
        .children(id)
        .iter()
        .copied()
        .find(|&c| tree.is(c, ElementKind::Dot))
    else {
        return;
    };
    let unit = scaled(tree, options, id, staff_unit);
    let d = &tree[id].drawing;
    let (x, mut y, loc) = (d.x + 2 * tenths(unit, NOTEHEAD_RADIUS_TENTHS) + unit, d.y, d.loc);
    if loc % 2 == 0 {
        y += unit;
    }
    let dots = tree[id].timing().map_or(1, |t| i32::from(t.dots.max(1)));
    let size = tenths(unit, DOT_SIZE_TENTHS);
    let right = x + dots * size + (dots - 1) * size / 2;
    let d = &mut tree[dot].drawing;
    d.x = x;
    d.y = y;
    d.bbox = Some(BoundingBox::new(x, right, y - size / 2, y + size / 2));
}

/// Point `@staff` references at the staff they name.
fn resolve_cross_staff(tree: &mut ElementTree) {
    let mut all = Vec::new();
    for &root in tree.roots() {
        all.push(root);
        all.extend(tree.descendants(root));
    }
    for id in all {
        let target_n = match &tree[id].data {
            ElementData::Tuplet(t) => t.staff,
            _ => tree[id].timing().and_then(|t| t.staff),
        };
        let own = tree.first_ancestor(id, ElementKind::Staff, None);
        let resolved = match target_n {
            Some(n) => match tree.staff_by_n(id, n) {
                Some(target) => Some(target).filter(|&t| Some(t) != own),
                None => {
                    log::warn!("Element {} refers to missing staff {n}", id.index());
                    None
                }
            },
            // Chord tones follow their chord
            None => tree.chord_of(id).and_then(|c| tree[c].drawing.cross_staff),
        };
        tree[id].drawing.cross_staff = resolved;
    }
}

/// Add the stem, flag and dot children the drawing needs.
fn create_parts(tree: &mut ElementTree) -> Result<()> {
    let mut stemmed = Vec::new();
    for &root in tree.roots() {
        for id in tree.descendants(root) {
            match tree.kind(id) {
                Some(ElementKind::Note) if tree.chord_of(id).is_none() && !in_tab_group(tree, id) => stemmed.push(id),
                Some(ElementKind::Chord) | Some(ElementKind::Rest) => stemmed.push(id),
                _ => {}
            }
        }
    }

    for id in stemmed {
        let dots = tree[id].timing().map_or(0, |t| t.dots);
        if dots > 0 && !tree.children(id).iter().any(|&c| tree.is(c, ElementKind::Dot)) {
            tree.add_child(id, Element::new(ElementData::Dot))?;
        }
        if tree.is(id, ElementKind::Rest) {
            continue;
        }

        let dur = stem::actual_dur(tree, id);
        if !dur.has_stem() {
            continue;
        }
        let stem = match stem::drawing_stem(tree, id) {
            Some(stem) => stem,
            None => tree.add_child(id, Element::new(ElementData::Stem))?,
        };
        let beamed = tree
            .first_ancestor(id, ElementKind::Beam, None)
            .or_else(|| tree.first_ancestor(id, ElementKind::FTrem, None))
            .is_some();
        let flag = tree
            .children(stem)
            .iter()
            .copied()
            .find(|&c| tree.is(c, ElementKind::Flag));
        match flag {
            None if !beamed && dur.flag_count() > 0 => {
                tree.add_child(stem, Element::new(ElementData::Flag))?;
            }
            Some(flag) if beamed || dur.flag_count() == 0 => {
                tree.delete_child(stem, flag);
            }
            _ => {}
        }
    }
    Ok(())
}

fn in_tab_group(tree: &ElementTree, id: ElementId) -> bool {
    tree.first_ancestor(id, ElementKind::TabGrp, Some(2)).is_some()
}

/// Marks grace and cue elements, and everything inside them, as cue-sized.
struct PrepareCueSize;

impl Functor for PrepareCueSize {
    fn visit(&mut self, tree: &mut ElementTree, id: ElementId) -> FunctorCode {
        let element = &tree[id];
        let own = element.is_grace()
            || element.timing().is_some_and(|t| t.cue)
            || element.beam_attrs().is_some_and(|b| b.cue);
        let inherited = tree.parent(id).is_some_and(|p| tree[p].drawing.cue_size);
        tree[id].drawing.cue_size = own || inherited;
        FunctorCode::Continue
    }
}

/// Propagate cue sizing through the subtree of `root`.
pub(crate) fn propagate_cue_size(tree: &mut ElementTree, root: ElementId) {
    tree.process(root, &mut PrepareCueSize);
}

/// Articulations on the notehead side, or on their encoded side.
pub(crate) fn place_artics(tree: &mut ElementTree, ctx: &mut LayoutContext, options: &LayoutOptions) {
    let mut artics = Vec::new();
    for &root in tree.roots() {
        artics.extend(tree.find_all_descendants(root, &[ElementKind::Artic]));
    }
    for artic in artics {
        let Some(host) = tree.parent(artic) else {
            continue;
        };
        let place = match &tree[artic].data {
            ElementData::Artic(a) => a.place,
            _ => None,
        };
        let above = match place {
            Some(StaffRel::Above) => true,
            Some(StaffRel::Below) => false,
            _ => stem::drawing_stem_dir(tree, host) != StemDirection::Up,
        };
        let (top, bottom) = if tree.is(host, ElementKind::Chord) {
            chord::y_extremes(tree, ctx, host).unwrap_or((tree[host].drawing.y, tree[host].drawing.y))
        } else {
            (tree[host].drawing.y, tree[host].drawing.y)
        };
        let staff_unit = options.drawing_unit(super::staff_size_of(tree, host));
        let unit = scaled(tree, options, host, staff_unit);
        let size = tenths(unit, ARTIC_SIZE_TENTHS);
        let center_x = tree[host].drawing.x + tenths(unit, NOTEHEAD_RADIUS_TENTHS);
        let y = if above { top + 2 * unit } else { bottom - 2 * unit };
        let d = &mut tree[artic].drawing;
        d.x = center_x - size / 2;
        d.y = y;
        d.bbox = Some(BoundingBox::new(center_x - size / 2, center_x + size / 2, y - size / 2, y + size / 2));
    }
}
