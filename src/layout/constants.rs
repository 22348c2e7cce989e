//! Shared engraving constants (in drawing units unless noted).

// ── Tree search bounds ──────────────────────────────────────────────
/// How far up a tuplet looks for an enclosing beam.
pub(crate) const MAX_BEAM_DEPTH: usize = 5;

// ── Accidental grid (half units) ────────────────────────────────────
pub(crate) const ACCID_WIDTH: usize = 4;
pub(crate) const ACCID_HEIGHT: usize = 12;

// ── Notes ───────────────────────────────────────────────────────────
/// Notehead radius as a fraction of the unit (x10)
pub(crate) const NOTEHEAD_RADIUS_TENTHS: i32 = 12;
pub(crate) const STEM_WIDTH_TENTHS: i32 = 2;
pub(crate) const DOT_SIZE_TENTHS: i32 = 6;
pub(crate) const FLAG_WIDTH_TENTHS: i32 = 14;
pub(crate) const ARTIC_SIZE_TENTHS: i32 = 10;
pub(crate) const ACCID_GLYPH_WIDTH_TENTHS: i32 = 16;

/// Staff location of the middle line
pub(crate) const MIDDLE_LINE_LOC: i32 = 4;

// ── Horizontal spacing (units per event) ────────────────────────────
pub(crate) const LEFT_PADDING_UNITS: i32 = 4;
pub(crate) const GRACE_SPACING_UNITS: i32 = 3;

// ── Beams ───────────────────────────────────────────────────────────
/// Shortest stem allowed under a beam, in units
pub(crate) const MIN_BEAMED_STEM_UNITS: i32 = 5;
/// Beam line thickness as a fraction of the unit (x10)
pub(crate) const BEAM_WIDTH_BLACK_TENTHS: i32 = 10;
pub(crate) const BEAM_WIDTH_WHITE_TENTHS: i32 = 5;

// ── Tuplets ─────────────────────────────────────────────────────────
/// Height of a bracket hook, in units
pub(crate) const TUPLET_BRACKET_HOOK_UNITS: i32 = 2;
/// Width of one digit of the tuplet number, in units
pub(crate) const TUPLET_DIGIT_WIDTH_UNITS: i32 = 2;

/// Scale a unit by a tenths ratio.
pub(crate) fn tenths(unit: i32, ratio: i32) -> i32 {
    unit * ratio / 10
}
