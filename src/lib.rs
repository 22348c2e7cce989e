//! engravelib: engraving layout engine for MEI scores.
//!
//! Reads MEI into an element tree and computes the geometry a renderer needs
//! for chords (note clusters and accidental columns), beams (placement, slant
//! and stems) and tuplets (bracket and number placement).
//!
//! # Example
//! ```no_run
//! use engravelib::{layout_file, LayoutOptions};
//!
//! let report = layout_file("path/to/score.mei", &LayoutOptions::default()).unwrap();
//! println!("Beams: {}", report.beams.len());
//! println!("Tuplets: {}", report.tuplets.len());
//! ```

pub mod error;
pub mod layout;
pub mod mei;
pub mod model;
pub mod options;
pub mod report;
pub mod tree;

use std::path::Path;

pub use error::{LayoutError, Result};
pub use layout::{run_layout, Layout, LayoutContext};
pub use mei::parse_mei;
pub use model::*;
pub use options::LayoutOptions;
pub use report::LayoutReport;
pub use tree::ElementTree;

/// Read an MEI string and lay it out.
pub fn layout_mei(xml: &str, options: &LayoutOptions) -> Result<LayoutReport> {
    let mut tree = parse_mei(xml)?;
    run_layout(&mut tree, options)
}

/// Read an MEI file and lay it out.
pub fn layout_file<P: AsRef<Path>>(path: P, options: &LayoutOptions) -> Result<LayoutReport> {
    let path = path.as_ref();
    let xml = std::fs::read_to_string(path).map_err(|e| {
        LayoutError::UnsupportedDocument(format!("failed to read '{}': {e}", path.display()))
    })?;
    layout_mei(&xml, options)
}

/// Convert a layout report to a JSON string.
/// Useful for passing data across FFI boundaries.
pub fn report_to_json(report: &LayoutReport) -> Result<String> {
    report.to_json()
}

// ═══════════════════════════════════════════════════════════════════════
// C FFI
// ═══════════════════════════════════════════════════════════════════════

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

unsafe fn optional_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        None
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_str().ok()
    }
}

/// Lay out an MEI document and return the report as a JSON C string, or
/// null on failure. The caller must free the returned string with
/// `engravelib_free_string`.
///
/// `options_json` may be null for the default options.
///
/// # Safety
/// `xml` must be a valid null-terminated UTF-8 C string; `options_json` must
/// be one as well, or null.
#[no_mangle]
pub unsafe extern "C" fn engravelib_layout_mei(xml: *const c_char, options_json: *const c_char) -> *mut c_char {
    let Some(xml) = (unsafe { optional_str(xml) }) else {
        return std::ptr::null_mut();
    };
    let options = match unsafe { optional_str(options_json) } {
        Some(json) => match LayoutOptions::from_json(json) {
            Ok(options) => options,
            Err(e) => {
                log::error!("{e}");
                return std::ptr::null_mut();
            }
        },
        None => LayoutOptions::default(),
    };

    match layout_mei(xml, &options).and_then(|report| report_to_json(&report)) {
        Ok(json) => CString::new(json).unwrap_or_default().into_raw(),
        Err(e) => {
            log::error!("{e}");
            std::ptr::null_mut()
        }
    }
}

/// Free a string previously returned by engravelib functions.
///
/// # Safety
/// `ptr` must be a string previously returned by an engravelib function, or null.
#[no_mangle]
pub unsafe extern "C" fn engravelib_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}
