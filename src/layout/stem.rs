//! Stems of notes and chords.
//!
//! A stemmed element owns at most one `Stem` child. The stem carries the
//! resolved direction and length; the element's own drawing state only
//! holds its notehead position. Stem lengths are stored unsigned and the
//! direction decides which way the stem grows.

use crate::model::{BoundingBox, Duration, ElementData, ElementId, ElementKind, StemDirection};
use crate::options::LayoutOptions;
use crate::tree::ElementTree;

use super::constants::*;
use super::{chord, staff_size_of, LayoutContext};

/// Stem child of a note or chord.
pub fn drawing_stem(tree: &ElementTree, id: ElementId) -> Option<ElementId> {
    tree.children(id)
        .iter()
        .copied()
        .find(|&c| tree.is(c, ElementKind::Stem))
}

pub fn drawing_stem_dir(tree: &ElementTree, id: ElementId) -> StemDirection {
    drawing_stem(tree, id).map_or(StemDirection::None, |s| tree[s].drawing.stem_dir)
}

pub fn set_drawing_stem_dir(tree: &mut ElementTree, id: ElementId, dir: StemDirection) {
    if let Some(stem) = drawing_stem(tree, id) {
        tree[stem].drawing.stem_dir = dir;
    }
}

pub fn drawing_stem_len(tree: &ElementTree, id: ElementId) -> i32 {
    drawing_stem(tree, id).map_or(0, |s| tree[s].drawing.stem_len)
}

pub fn set_drawing_stem_len(tree: &mut ElementTree, id: ElementId, len: i32) {
    if let Some(stem) = drawing_stem(tree, id) {
        tree[stem].drawing.stem_len = len;
    }
}

/// Point where the stem leaves the notehead.
pub fn drawing_stem_start(tree: &ElementTree, id: ElementId) -> (i32, i32) {
    match drawing_stem(tree, id) {
        Some(stem) => (tree[stem].drawing.x, tree[stem].drawing.y),
        None => (tree[id].drawing.x, tree[id].drawing.y),
    }
}

/// Free end of the stem. Without a stem a chord ends at its bottom note.
pub fn drawing_stem_end(tree: &ElementTree, ctx: &mut LayoutContext, id: ElementId) -> (i32, i32) {
    let Some(stem) = drawing_stem(tree, id) else {
        if tree.is(id, ElementKind::Chord) {
            let bottom = chord::y_extremes(tree, ctx, id).map_or(tree[id].drawing.y, |(_, min)| min);
            return (tree[id].drawing.x, bottom);
        }
        return (tree[id].drawing.x, tree[id].drawing.y);
    };
    let s = &tree[stem].drawing;
    match s.stem_dir {
        StemDirection::Down => (s.x, s.y - s.stem_len),
        _ => (s.x, s.y + s.stem_len),
    }
}

/// Resolve direction, origin and length of the stem of `id` so that it
/// ends at `end_y`, and refresh the stem and flag boxes.
pub(crate) fn set_stem_geometry(
    tree: &mut ElementTree,
    ctx: &mut LayoutContext,
    options: &LayoutOptions,
    id: ElementId,
    dir: StemDirection,
    end_y: Option<i32>,
) {
    let Some(stem) = drawing_stem(tree, id) else {
        return;
    };
    let staff_size = staff_size_of(tree, id);
    let cue = tree[id].drawing.cue_size;
    let scale = |v: i32| if cue { options.cue_size(v) } else { v };
    let unit = scale(options.drawing_unit(staff_size));
    let radius = tenths(unit, NOTEHEAD_RADIUS_TENTHS);
    let stem_width = tenths(unit, STEM_WIDTH_TENTHS).max(1);

    // Notes farthest from the stem end anchor the stem
    let (top, bottom) = if tree.is(id, ElementKind::Chord) {
        chord::y_extremes(tree, ctx, id).unwrap_or((tree[id].drawing.y, tree[id].drawing.y))
    } else {
        (tree[id].drawing.y, tree[id].drawing.y)
    };
    let x = tree[id].drawing.x;
    let (stem_x, start_y) = match dir {
        StemDirection::Down => (x + stem_width / 2, top),
        _ => (x + 2 * radius - stem_width / 2, bottom),
    };
    let default_len = scale(options.drawing_stem_len(staff_size)) + (top - bottom);
    let len = match end_y {
        Some(end) => (end - start_y).abs(),
        None => default_len,
    };

    let s = &mut tree[stem].drawing;
    s.stem_dir = dir;
    s.x = stem_x;
    s.y = start_y;
    s.stem_len = len;
    let end = match dir {
        StemDirection::Down => start_y - len,
        _ => start_y + len,
    };
    s.bbox = Some(BoundingBox::new(stem_x - stem_width / 2, stem_x + stem_width / 2, start_y, end));

    if let Some(flag) = tree
        .children(stem)
        .iter()
        .copied()
        .find(|&c| tree.is(c, ElementKind::Flag))
    {
        let flags = actual_dur(tree, id).flag_count().max(1);
        let flag_w = tenths(unit, FLAG_WIDTH_TENTHS);
        let flag_h = flags * unit + unit;
        let f = &mut tree[flag].drawing;
        f.x = stem_x;
        f.y = end;
        f.bbox = Some(match dir {
            StemDirection::Down => BoundingBox::new(stem_x, stem_x + flag_w, end, end + flag_h),
            _ => BoundingBox::new(stem_x, stem_x + flag_w, end - flag_h, end),
        });
    }
}

/// Stem direction of an element outside any beam: the encoded one, or the
/// one pointing away from the note farthest from the middle line.
pub(crate) fn calc_unbeamed_stem_dir(tree: &ElementTree, ctx: &mut LayoutContext, id: ElementId) -> StemDirection {
    let encoded = tree[id].encoded_stem_dir();
    if encoded != StemDirection::None {
        return encoded;
    }
    let (top_loc, bottom_loc) = if tree.is(id, ElementKind::Chord) {
        chord::loc_extremes(tree, ctx, id).unwrap_or((MIDDLE_LINE_LOC, MIDDLE_LINE_LOC))
    } else {
        (tree[id].drawing.loc, tree[id].drawing.loc)
    };
    let above = top_loc - MIDDLE_LINE_LOC;
    let below = MIDDLE_LINE_LOC - bottom_loc;
    if above >= below {
        StemDirection::Down
    } else {
        StemDirection::Up
    }
}

/// Written duration, falling back to the enclosing chord and then to a
/// quarter.
pub fn actual_dur(tree: &ElementTree, id: ElementId) -> Duration {
    if let Some(dur) = tree[id].timing().and_then(|t| t.dur) {
        return dur;
    }
    if let Some(chord) = tree.chord_of(id) {
        if let ElementData::Chord(t) = &tree[chord].data {
            if let Some(dur) = t.dur {
                return dur;
            }
        }
    }
    Duration::Quarter
}
