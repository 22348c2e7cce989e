//! Chord layout: note clusters, accidental bookkeeping and vertical extremes.
//!
//! Notes a second apart cannot sit on the same side of the stem. The
//! cluster pass groups them so that every other notehead of a cluster can be
//! flipped to the opposite side.

use crate::model::{BoundingBox, ElementId, ElementKind, StemDirection};
use crate::options::LayoutOptions;
use crate::tree::ElementTree;

use super::constants::*;
use super::list::get_list;
use super::{staff_size_of, stem, LayoutContext};

/// Derived per-chord state, rebuilt every pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChordDrawing {
    /// Runs of notes a second apart, each in ascending pitch order
    pub clusters: Vec<Vec<ElementId>>,
    /// Notes with a written accidental, top note first
    pub accid_list: Vec<ElementId>,
    /// Occupancy grid for accidental placement (rows of half units)
    pub accid_space: Vec<Vec<bool>>,
}

/// Back-reference from a note to its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterRef {
    pub chord: ElementId,
    pub cluster: usize,
    /// 1-based position within the cluster, lowest note first
    pub position: usize,
}

/// Keep the notes of the chord, sort them by pitch and rebuild the clusters.
pub(crate) fn filter_list(
    tree: &ElementTree,
    ctx: &mut LayoutContext,
    chord: ElementId,
    list: &mut Vec<ElementId>,
) {
    list.retain(|&id| {
        tree.get(id).is_some_and(|e| {
            e.kind().is_layer_element() && e.kind().has_duration() && e.is(ElementKind::Note)
        })
    });
    // Stable: notes at the same pitch keep their encoded order
    list.sort_by_key(|&id| tree[id].diatonic_pitch());

    clear_clusters(ctx, chord);
    if list.len() < 2 {
        return;
    }

    let mut clusters: Vec<Vec<ElementId>> = Vec::new();
    let mut last_clustered = false;
    for pair in list.windows(2) {
        let (last, current) = (pair[0], pair[1]);
        if tree[current].diatonic_pitch() - tree[last].diatonic_pitch() == 1 {
            if !last_clustered {
                clusters.push(vec![last]);
            }
            if let Some(cluster) = clusters.last_mut() {
                cluster.push(current);
            }
            last_clustered = true;
        } else {
            last_clustered = false;
        }
    }

    for (index, cluster) in clusters.iter().enumerate() {
        for (i, &note) in cluster.iter().enumerate() {
            ctx.clusters.insert(
                note,
                ClusterRef {
                    chord,
                    cluster: index,
                    position: i + 1,
                },
            );
        }
    }
    ctx.chords.entry(chord).or_default().clusters = clusters;
}

fn clear_clusters(ctx: &mut LayoutContext, chord: ElementId) {
    if let Some(drawing) = ctx.chords.get_mut(&chord) {
        for note in drawing.clusters.drain(..).flatten() {
            ctx.clusters.remove(&note);
        }
    }
}

/// Clusters of `chord` for the current pass.
pub fn clusters(tree: &ElementTree, ctx: &mut LayoutContext, chord: ElementId) -> Vec<Vec<ElementId>> {
    get_list(tree, ctx, chord);
    ctx.chords.get(&chord).map(|c| c.clusters.clone()).unwrap_or_default()
}

fn has_accid(tree: &ElementTree, note: ElementId) -> bool {
    tree.children(note).iter().any(|&c| tree.is(c, ElementKind::Accid))
}

/// Collect the notes carrying an accidental, walking the chord top-down.
pub fn reset_accid_list(tree: &ElementTree, ctx: &mut LayoutContext, chord: ElementId) {
    let list = get_list(tree, ctx, chord);
    let accid_list: Vec<ElementId> = list.into_iter().rev().filter(|&n| has_accid(tree, n)).collect();
    ctx.chords.entry(chord).or_default().accid_list = accid_list;
}

/// Allocate the accidental occupancy grid: one row per half unit of the
/// accidental span, and room for every accidental side by side.
pub fn reset_accid_space(tree: &ElementTree, ctx: &mut LayoutContext, chord: ElementId, full_unit: i32) {
    let drawing = ctx.chords.entry(chord).or_default();
    drawing.accid_space.clear();

    let (Some(&first), Some(&last)) = (drawing.accid_list.first(), drawing.accid_list.last()) else {
        return;
    };
    let half_unit = full_unit / 2;
    if half_unit <= 0 {
        log::warn!("Accidental space requested with a unit of {full_unit}");
        return;
    }
    let double_unit = full_unit * 2;
    let size = drawing.accid_list.len() as i32;

    let rows = (tree[first].drawing.y - tree[last].drawing.y) / half_unit;
    let rows = rows.max(ACCID_WIDTH as i32) as usize;
    let line_length = ((double_unit * size) / half_unit) as usize;
    drawing.accid_space = vec![vec![false; line_length]; rows];
}

/// Highest and lowest note y, or `None` for a chord without notes.
pub fn y_extremes(tree: &ElementTree, ctx: &mut LayoutContext, chord: ElementId) -> Option<(i32, i32)> {
    extremes_by(tree, ctx, chord, |tree, id| tree[id].drawing.y)
}

/// Highest and lowest staff location.
pub(crate) fn loc_extremes(tree: &ElementTree, ctx: &mut LayoutContext, chord: ElementId) -> Option<(i32, i32)> {
    extremes_by(tree, ctx, chord, |tree, id| tree[id].drawing.loc)
}

fn extremes_by(
    tree: &ElementTree,
    ctx: &mut LayoutContext,
    chord: ElementId,
    value: impl Fn(&ElementTree, ElementId) -> i32,
) -> Option<(i32, i32)> {
    let mut extremes: Option<(i32, i32)> = None;
    for id in get_list(tree, ctx, chord) {
        if !tree.is(id, ElementKind::Note) {
            continue;
        }
        let y = value(tree, id);
        extremes = Some(match extremes {
            None => (y, y),
            Some((max, min)) => {
                if y > max {
                    (y, min)
                } else if y < min {
                    (max, y)
                } else {
                    (max, min)
                }
            }
        });
    }
    extremes
}

pub fn top_note(tree: &ElementTree, ctx: &mut LayoutContext, chord: ElementId) -> Option<ElementId> {
    get_list(tree, ctx, chord).last().copied()
}

pub fn bottom_note(tree: &ElementTree, ctx: &mut LayoutContext, chord: ElementId) -> Option<ElementId> {
    get_list(tree, ctx, chord).first().copied()
}

/// Leftmost and rightmost notehead x.
pub fn x_extremes(tree: &ElementTree, ctx: &mut LayoutContext, chord: ElementId) -> (i32, i32) {
    let xs: Vec<i32> = get_list(tree, ctx, chord)
        .into_iter()
        .map(|n| tree[n].drawing.x)
        .collect();
    let x = tree[chord].drawing.x;
    (
        xs.iter().copied().min().unwrap_or(x),
        xs.iter().copied().max().unwrap_or(x),
    )
}

/// Move every other notehead of each cluster to the far side of the stem.
///
/// With the stem up the lowest note stays in place; with the stem down the
/// highest one does.
pub(crate) fn adjust_cluster_offsets(
    tree: &mut ElementTree,
    ctx: &mut LayoutContext,
    options: &LayoutOptions,
    chord: ElementId,
) {
    let dir = stem::drawing_stem_dir(tree, chord);
    let unit = options.drawing_unit(staff_size_of(tree, chord));
    let unit = if tree[chord].drawing.cue_size { options.cue_size(unit) } else { unit };
    let shift = 2 * tenths(unit, NOTEHEAD_RADIUS_TENTHS) - tenths(unit, STEM_WIDTH_TENTHS);

    for cluster in clusters(tree, ctx, chord) {
        let size = cluster.len();
        for (i, &note) in cluster.iter().enumerate() {
            let position = i + 1;
            let dx = match dir {
                StemDirection::Down if (size - position) % 2 == 1 => -shift,
                StemDirection::Down => 0,
                _ if position % 2 == 0 => shift,
                _ => 0,
            };
            if dx == 0 {
                continue;
            }
            let d = &mut tree[note].drawing;
            d.x += dx;
            if let Some(bb) = d.bbox.as_mut() {
                bb.left += dx;
                bb.right += dx;
            }
        }
    }
}

/// Stack the chord's accidentals into columns left of the noteheads,
/// top note first, using the occupancy grid.
pub(crate) fn place_accidentals(
    tree: &mut ElementTree,
    ctx: &mut LayoutContext,
    options: &LayoutOptions,
    chord: ElementId,
) {
    let staff_size = staff_size_of(tree, chord);
    let unit = options.drawing_unit(staff_size);
    reset_accid_list(tree, ctx, chord);
    reset_accid_space(tree, ctx, chord, unit);

    let half_unit = options.drawing_half_unit(staff_size);
    let Some(drawing) = ctx.chords.get_mut(&chord) else {
        return;
    };
    let (Some(&top), true) = (drawing.accid_list.first(), half_unit > 0) else {
        return;
    };
    let top_y = tree[top].drawing.y;
    let left = drawing
        .accid_list
        .iter()
        .map(|&n| tree[n].drawing.x)
        .min()
        .unwrap_or(tree[chord].drawing.x);

    let rows = drawing.accid_space.len();
    let columns = drawing.accid_space.first().map_or(0, Vec::len);
    for &note in &drawing.accid_list {
        // Pitch order is not page order with `@loc` or cross-staff tones
        let row = ((top_y - tree[note].drawing.y) / half_unit).clamp(0, rows.saturating_sub(1) as i32) as usize;
        let first_row = row.saturating_sub(ACCID_HEIGHT / 2).min(rows);
        let last_row = (row + ACCID_HEIGHT / 2).min(rows);

        let fits = |space: &[Vec<bool>], col: usize| {
            space[first_row..last_row]
                .iter()
                .all(|line| line[col..(col + ACCID_WIDTH).min(columns)].iter().all(|&taken| !taken))
        };
        let max_col = columns.saturating_sub(ACCID_WIDTH);
        let col = (0..=max_col)
            .find(|&c| fits(&drawing.accid_space, c))
            .unwrap_or(max_col);
        for line in &mut drawing.accid_space[first_row..last_row] {
            for cell in line.iter_mut().skip(col).take(ACCID_WIDTH) {
                *cell = true;
            }
        }

        let x = left - (col + ACCID_WIDTH) as i32 * half_unit;
        let y = tree[note].drawing.y;
        let width = tenths(unit, ACCID_GLYPH_WIDTH_TENTHS);
        if let Some(accid) = tree
            .children(note)
            .iter()
            .copied()
            .find(|&c| tree.is(c, ElementKind::Accid))
        {
            let a = &mut tree[accid].drawing;
            a.x = x;
            a.y = y;
            a.bbox = Some(BoundingBox::new(x, x + width, y - 3 * half_unit, y + 3 * half_unit));
        }
    }
}
