//! Error types for reading and laying out MEI scores.

use thiserror::Error;

use crate::model::ElementKind;

/// Crate-wide error type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayoutError {
    /// A precondition of a layout routine does not hold (e.g. a chord tone
    /// without a parent chord, or a beam member that is not in the beam).
    #[error("invalid layout state: {0}")]
    InvalidState(String),

    /// A child of an unsupported kind was offered to a container.
    #[error("cannot add '{child}' to a '{parent}'")]
    UnsupportedChild {
        child: ElementKind,
        parent: ElementKind,
    },

    /// XML is malformed
    #[error("XML parse error: {0}")]
    Xml(String),

    /// Well-formed XML that is not an MEI document we can lay out
    #[error("unsupported MEI document: {0}")]
    UnsupportedDocument(String),

    /// Layout options could not be decoded
    #[error("invalid layout options: {0}")]
    Options(String),

    /// Report serialization failed
    #[error("JSON serialization error: {0}")]
    Json(String),
}

impl From<roxmltree::Error> for LayoutError {
    fn from(e: roxmltree::Error) -> Self {
        LayoutError::Xml(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LayoutError>;
