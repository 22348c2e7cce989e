//! Layout options and the doc-level drawing unit helpers derived from them.

use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, Result};

/// Options controlling the layout passes.
///
/// Every field has a default, so a partial JSON object is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    /// Drawing unit (half a staff space) at staff size 100
    pub unit: i32,
    /// Place tuplet brackets on the notehead side instead of the stem side
    pub tuplet_num_head: bool,
    /// Size of grace and cue notes, in percent
    pub grace_factor: i32,
    /// Maximum beam slope (rise over run)
    pub beam_max_slope: f64,
    /// Default stem length in units
    pub stem_length_units: i32,
    /// Gap between two staves in units
    pub staff_spacing_units: i32,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            unit: 90,
            tuplet_num_head: false,
            grace_factor: 75,
            beam_max_slope: 0.5,
            stem_length_units: 7,
            staff_spacing_units: 12,
        }
    }
}

impl LayoutOptions {
    /// Decode options from a JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: LayoutOptions =
            serde_json::from_str(json).map_err(|e| LayoutError::Options(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.unit <= 0 {
            return Err(LayoutError::Options(format!("unit must be positive, got {}", self.unit)));
        }
        if !(1..=100).contains(&self.grace_factor) {
            return Err(LayoutError::Options(format!(
                "grace_factor must be within 1..=100, got {}",
                self.grace_factor
            )));
        }
        if !self.beam_max_slope.is_finite() || self.beam_max_slope < 0.0 {
            return Err(LayoutError::Options(format!(
                "beam_max_slope must be a non-negative number, got {}",
                self.beam_max_slope
            )));
        }
        Ok(())
    }

    pub fn drawing_unit(&self, staff_size: i32) -> i32 {
        self.unit * staff_size / 100
    }

    pub fn drawing_half_unit(&self, staff_size: i32) -> i32 {
        self.drawing_unit(staff_size) / 2
    }

    pub fn drawing_double_unit(&self, staff_size: i32) -> i32 {
        self.drawing_unit(staff_size) * 2
    }

    /// Height of a five-line staff.
    pub fn drawing_staff_size(&self, staff_size: i32) -> i32 {
        4 * self.drawing_double_unit(staff_size)
    }

    pub fn drawing_stem_len(&self, staff_size: i32) -> i32 {
        self.stem_length_units * self.drawing_unit(staff_size)
    }

    /// Scale a length for cue-sized elements.
    pub fn cue_size(&self, value: i32) -> i32 {
        value * self.grace_factor / 100
    }
}
