use thiserror::Error;

/// Overlay payloads that cannot be drawn. The affected layer is skipped; the base
/// image and the other layers still render.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    #[error("{layer} is empty")]
    Empty { layer: &'static str },

    #[error("{layer} row {row} has {found} values, expected {expected}")]
    RaggedRow {
        layer: &'static str,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("{layer} pixel at row {row} has {found} channels, expected 1 or 3")]
    BadChannels {
        layer: &'static str,
        row: usize,
        found: usize,
    },

    #[error("{layer} row {row} has a cell that is not a number")]
    BadCell { layer: &'static str, row: usize },

    #[error("{layer} mixes grayscale and RGB pixels")]
    MixedChannels { layer: &'static str },
}
