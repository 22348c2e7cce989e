//! Data model for the elements of an MEI layer that the layout engine works on.
//!
//! Each element carries the encoded attributes that drive layout (duration,
//! pitch, stem direction, placement hints) and a [`Drawing`] record that the
//! layout passes fill in. Drawing coordinates are integer units with y
//! growing upward: "above" always means a larger y.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle of an element inside an [`ElementTree`](crate::tree::ElementTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub(crate) usize);

impl ElementId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Closed set of element kinds known to the layout engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementKind {
    Measure,
    Staff,
    Layer,
    Note,
    Chord,
    Rest,
    Space,
    TabGrp,
    Beam,
    FTrem,
    BTrem,
    Tuplet,
    TupletBracket,
    TupletNum,
    Clef,
    Artic,
    Accid,
    Dot,
    Flag,
    Stem,
    Editorial,
}

impl ElementKind {
    /// MEI element name.
    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Measure => "measure",
            ElementKind::Staff => "staff",
            ElementKind::Layer => "layer",
            ElementKind::Note => "note",
            ElementKind::Chord => "chord",
            ElementKind::Rest => "rest",
            ElementKind::Space => "space",
            ElementKind::TabGrp => "tabGrp",
            ElementKind::Beam => "beam",
            ElementKind::FTrem => "fTrem",
            ElementKind::BTrem => "bTrem",
            ElementKind::Tuplet => "tuplet",
            ElementKind::TupletBracket => "tupletBracket",
            ElementKind::TupletNum => "tupletNum",
            ElementKind::Clef => "clef",
            ElementKind::Artic => "artic",
            ElementKind::Accid => "accid",
            ElementKind::Dot => "dots",
            ElementKind::Flag => "flag",
            ElementKind::Stem => "stem",
            ElementKind::Editorial => "editorial",
        }
    }

    /// Everything below the layer level.
    pub fn is_layer_element(self) -> bool {
        !matches!(
            self,
            ElementKind::Measure | ElementKind::Staff | ElementKind::Layer | ElementKind::Editorial
        )
    }

    /// Elements that take time in the layer.
    pub fn has_duration(self) -> bool {
        matches!(
            self,
            ElementKind::Note
                | ElementKind::Chord
                | ElementKind::Rest
                | ElementKind::Space
                | ElementKind::TabGrp
        )
    }

    pub fn has_pitch(self) -> bool {
        self == ElementKind::Note
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Written duration, ordered from longest to shortest.
///
/// The discriminant is the duration code used by the beam heuristics:
/// a larger code means a shorter note value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Duration {
    Long = 0,
    Breve,
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
    SixtyFourth,
    HundredTwentyEighth,
    TwoHundredFiftySixth,
}

impl Duration {
    /// Number of duration codes.
    pub const COUNT: i64 = 11;

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Parse an MEI `@dur` value.
    pub fn from_mei(value: &str) -> Option<Self> {
        Some(match value {
            "long" => Duration::Long,
            "breve" => Duration::Breve,
            "1" => Duration::Whole,
            "2" => Duration::Half,
            "4" => Duration::Quarter,
            "8" => Duration::Eighth,
            "16" => Duration::Sixteenth,
            "32" => Duration::ThirtySecond,
            "64" => Duration::SixtyFourth,
            "128" => Duration::HundredTwentyEighth,
            "256" => Duration::TwoHundredFiftySixth,
            _ => return None,
        })
    }

    /// Number of flags (or beams) the value needs.
    pub fn flag_count(self) -> i32 {
        (self.code() - Duration::Quarter.code()).max(0)
    }

    pub fn has_stem(self) -> bool {
        self >= Duration::Half
    }
}

/// Stem direction, either encoded or resolved for drawing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemDirection {
    #[default]
    None,
    Up,
    Down,
}

impl StemDirection {
    pub fn from_mei(value: &str) -> Self {
        match value {
            "up" => StemDirection::Up,
            "down" => StemDirection::Down,
            _ => StemDirection::None,
        }
    }
}

/// Side a beam is drawn on relative to its noteheads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeamPlace {
    #[default]
    None,
    Above,
    Below,
    Mixed,
}

impl BeamPlace {
    pub fn from_mei(value: &str) -> Option<Self> {
        match value {
            "above" => Some(BeamPlace::Above),
            "below" => Some(BeamPlace::Below),
            "mixed" => Some(BeamPlace::Mixed),
            _ => None,
        }
    }
}

/// Basic placement relative to a staff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRel {
    #[default]
    None,
    Above,
    Below,
}

impl StaffRel {
    pub fn from_mei(value: &str) -> Option<Self> {
        match value {
            "above" => Some(StaffRel::Above),
            "below" => Some(StaffRel::Below),
            _ => None,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            StaffRel::Above => StaffRel::Below,
            StaffRel::Below => StaffRel::Above,
            StaffRel::None => StaffRel::None,
        }
    }
}

/// Written accidental.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Accidental {
    Sharp,
    Flat,
    Natural,
    DoubleSharp,
    DoubleFlat,
}

impl Accidental {
    pub fn from_mei(value: &str) -> Option<Self> {
        match value {
            "s" => Some(Accidental::Sharp),
            "f" => Some(Accidental::Flat),
            "n" => Some(Accidental::Natural),
            "x" | "ss" => Some(Accidental::DoubleSharp),
            "ff" => Some(Accidental::DoubleFlat),
            _ => None,
        }
    }
}

/// Pitch name (diatonic step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchName {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl PitchName {
    const ALL: [PitchName; 7] = [
        PitchName::C,
        PitchName::D,
        PitchName::E,
        PitchName::F,
        PitchName::G,
        PitchName::A,
        PitchName::B,
    ];

    pub fn from_mei(value: &str) -> Option<Self> {
        match value {
            "c" | "C" => Some(PitchName::C),
            "d" | "D" => Some(PitchName::D),
            "e" | "E" => Some(PitchName::E),
            "f" | "F" => Some(PitchName::F),
            "g" | "G" => Some(PitchName::G),
            "a" | "A" => Some(PitchName::A),
            "b" | "B" => Some(PitchName::B),
            _ => None,
        }
    }

    pub fn step(self) -> i32 {
        self as i32
    }
}

/// Written pitch of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pitch {
    pub pname: PitchName,
    /// Octave number (middle C = C4)
    pub oct: i32,
}

impl Pitch {
    pub fn new(pname: PitchName, oct: i32) -> Self {
        Self { pname, oct }
    }

    /// Build a pitch from a diatonic step value (`oct * 7 + step`).
    pub fn from_diatonic(value: i32) -> Self {
        let oct = value.div_euclid(7);
        let step = value.rem_euclid(7) as usize;
        Self {
            pname: PitchName::ALL[step],
            oct,
        }
    }

    pub fn diatonic(&self) -> i32 {
        self.oct * 7 + self.pname.step()
    }
}

/// Clef shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClefShape {
    #[default]
    G,
    F,
    C,
}

/// Clef definition for a staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clef {
    pub shape: ClefShape,
    /// Staff line the clef sits on (1 = bottom line)
    pub line: i32,
}

impl Default for Clef {
    fn default() -> Self {
        Self {
            shape: ClefShape::G,
            line: 2,
        }
    }
}

impl Clef {
    /// Staff location (0 = bottom line, 8 = top line) of a diatonic pitch.
    pub fn loc_of(&self, diatonic: i32) -> i32 {
        // Reference pitch sitting on the clef line: G4, F3 or C4
        let reference = match self.shape {
            ClefShape::G => 4 * 7 + 4,
            ClefShape::F => 3 * 7 + 3,
            ClefShape::C => 4 * 7,
        };
        diatonic - reference + (self.line - 1) * 2
    }
}

/// Axis-aligned box in drawing units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub right: i32,
    pub bottom: i32,
    pub top: i32,
}

impl BoundingBox {
    pub fn new(left: i32, right: i32, bottom: i32, top: i32) -> Self {
        Self {
            left: left.min(right),
            right: left.max(right),
            bottom: bottom.min(top),
            top: bottom.max(top),
        }
    }

    pub fn horizontal_overlap(&self, other: &BoundingBox, margin: i32) -> bool {
        self.left - margin < other.right && other.left < self.right + margin
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Encoded attributes
// ═══════════════════════════════════════════════════════════════════════

/// Attributes shared by everything that takes time in a layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationAttrs {
    /// Written duration (`@dur`)
    pub dur: Option<Duration>,
    /// Augmentation dots
    pub dots: u8,
    /// Encoded stem direction (`@stem.dir`)
    pub stem_dir: StemDirection,
    /// Secondary beam break after this element (`@breaksec`)
    pub breaksec: Option<u8>,
    /// Grace note
    pub grace: bool,
    /// Cue-sized
    pub cue: bool,
    /// Staff the element is drawn on when it differs from its own (`@staff`)
    pub staff: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteAttrs {
    pub timing: DurationAttrs,
    pub pitch: Option<Pitch>,
    /// Staff location override (`@loc`)
    pub loc: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeamAttrs {
    /// Encoded beam placement (`@place`)
    pub place: Option<BeamPlace>,
    pub cue: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TupletAttrs {
    /// Number shown in the tuplet label (`@num`)
    pub num: Option<u32>,
    pub numbase: Option<u32>,
    pub bracket_visible: Option<bool>,
    pub num_visible: Option<bool>,
    pub bracket_place: Option<StaffRel>,
    pub num_place: Option<StaffRel>,
    /// Cross-staff target (`@staff`)
    pub staff: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffAttrs {
    /// Staff number (`@n`)
    pub n: u32,
    /// Staff size in percent
    pub size: i32,
    pub clef: Clef,
}

impl Default for StaffAttrs {
    fn default() -> Self {
        Self {
            n: 1,
            size: 100,
            clef: Clef::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticAttrs {
    /// Articulation name, e.g. "stacc", "acc", "ten"
    pub artic: String,
    pub place: Option<StaffRel>,
}

/// Kind-specific element data.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementData {
    Measure,
    Staff(StaffAttrs),
    Layer,
    Note(NoteAttrs),
    Chord(DurationAttrs),
    Rest(DurationAttrs),
    Space(DurationAttrs),
    TabGrp(DurationAttrs),
    Beam(BeamAttrs),
    FTrem(BeamAttrs),
    BTrem,
    Tuplet(TupletAttrs),
    TupletBracket,
    TupletNum,
    Clef(Clef),
    Artic(ArticAttrs),
    Accid(Accidental),
    Dot,
    Flag,
    Stem,
    Editorial,
}

impl ElementData {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementData::Measure => ElementKind::Measure,
            ElementData::Staff(_) => ElementKind::Staff,
            ElementData::Layer => ElementKind::Layer,
            ElementData::Note(_) => ElementKind::Note,
            ElementData::Chord(_) => ElementKind::Chord,
            ElementData::Rest(_) => ElementKind::Rest,
            ElementData::Space(_) => ElementKind::Space,
            ElementData::TabGrp(_) => ElementKind::TabGrp,
            ElementData::Beam(_) => ElementKind::Beam,
            ElementData::FTrem(_) => ElementKind::FTrem,
            ElementData::BTrem => ElementKind::BTrem,
            ElementData::Tuplet(_) => ElementKind::Tuplet,
            ElementData::TupletBracket => ElementKind::TupletBracket,
            ElementData::TupletNum => ElementKind::TupletNum,
            ElementData::Clef(_) => ElementKind::Clef,
            ElementData::Artic(_) => ElementKind::Artic,
            ElementData::Accid(_) => ElementKind::Accid,
            ElementData::Dot => ElementKind::Dot,
            ElementData::Flag => ElementKind::Flag,
            ElementData::Stem => ElementKind::Stem,
            ElementData::Editorial => ElementKind::Editorial,
        }
    }
}

/// Drawing state written by the layout passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    /// Absolute x (left edge for noteheads)
    pub x: i32,
    /// Absolute y
    pub y: i32,
    /// Staff location for pitched elements (0 = bottom line)
    pub loc: i32,
    /// Vertical offset relative to the element's reference (staff or beam)
    pub y_rel: i32,
    /// Horizontal extent relative to the left/right anchors (brackets, nums)
    pub x_rel_left: i32,
    pub x_rel_right: i32,
    /// Extent of the element itself, if it has been positioned
    pub bbox: Option<BoundingBox>,
    /// Direction of a stem element
    pub stem_dir: StemDirection,
    /// Length of a stem element
    pub stem_len: i32,
    pub cue_size: bool,
    /// Staff element this element is drawn on, when cross-staff
    pub cross_staff: Option<ElementId>,
}

/// A node of the layout tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub data: ElementData,
    /// `xml:id` from the encoding
    pub xml_id: Option<String>,
    pub(crate) parent: Option<ElementId>,
    pub(crate) children: Vec<ElementId>,
    pub drawing: Drawing,
}

impl Element {
    pub fn new(data: ElementData) -> Self {
        Self {
            data,
            xml_id: None,
            parent: None,
            children: Vec::new(),
            drawing: Drawing::default(),
        }
    }

    pub fn note(pitch: Pitch, dur: Option<Duration>) -> Self {
        Self::new(ElementData::Note(NoteAttrs {
            timing: DurationAttrs {
                dur,
                ..Default::default()
            },
            pitch: Some(pitch),
            loc: None,
        }))
    }

    pub fn chord(dur: Duration) -> Self {
        Self::new(ElementData::Chord(DurationAttrs {
            dur: Some(dur),
            ..Default::default()
        }))
    }

    pub fn rest(dur: Duration) -> Self {
        Self::new(ElementData::Rest(DurationAttrs {
            dur: Some(dur),
            ..Default::default()
        }))
    }

    pub fn staff(n: u32) -> Self {
        Self::new(ElementData::Staff(StaffAttrs {
            n,
            ..Default::default()
        }))
    }

    pub fn with_xml_id(mut self, id: impl Into<String>) -> Self {
        self.xml_id = Some(id.into());
        self
    }

    pub fn kind(&self) -> ElementKind {
        self.data.kind()
    }

    pub fn is(&self, kind: ElementKind) -> bool {
        self.kind() == kind
    }

    pub fn is_any(&self, kinds: &[ElementKind]) -> bool {
        kinds.contains(&self.kind())
    }

    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    pub fn children(&self) -> &[ElementId] {
        &self.children
    }

    /// Duration attributes, for elements that have them.
    pub fn timing(&self) -> Option<&DurationAttrs> {
        match &self.data {
            ElementData::Note(n) => Some(&n.timing),
            ElementData::Chord(t)
            | ElementData::Rest(t)
            | ElementData::Space(t)
            | ElementData::TabGrp(t) => Some(t),
            _ => None,
        }
    }

    pub fn timing_mut(&mut self) -> Option<&mut DurationAttrs> {
        match &mut self.data {
            ElementData::Note(n) => Some(&mut n.timing),
            ElementData::Chord(t)
            | ElementData::Rest(t)
            | ElementData::Space(t)
            | ElementData::TabGrp(t) => Some(t),
            _ => None,
        }
    }

    pub fn pitch(&self) -> Option<&Pitch> {
        match &self.data {
            ElementData::Note(n) => n.pitch.as_ref(),
            _ => None,
        }
    }

    /// Diatonic pitch, 0 for unpitched elements.
    pub fn diatonic_pitch(&self) -> i32 {
        self.pitch().map_or(0, Pitch::diatonic)
    }

    pub fn encoded_stem_dir(&self) -> StemDirection {
        self.timing().map_or(StemDirection::None, |t| t.stem_dir)
    }

    pub fn is_grace(&self) -> bool {
        self.timing().is_some_and(|t| t.grace)
    }

    pub fn staff_attrs(&self) -> Option<&StaffAttrs> {
        match &self.data {
            ElementData::Staff(s) => Some(s),
            _ => None,
        }
    }

    pub fn tuplet_attrs(&self) -> Option<&TupletAttrs> {
        match &self.data {
            ElementData::Tuplet(t) => Some(t),
            _ => None,
        }
    }

    pub fn beam_attrs(&self) -> Option<&BeamAttrs> {
        match &self.data {
            ElementData::Beam(b) | ElementData::FTrem(b) => Some(b),
            _ => None,
        }
    }
}
