use thiserror::Error;

/// Errors surfaced by the detection, alignment and folder-reading APIs.
///
/// Low-confidence alignments and empty detections are not errors; see
/// [`crate::AlignmentOutcome`] and [`crate::RoiDetector::crop_to_largest_contour`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument `{name}` ({value}): {reason}")]
    InvalidArgument {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("font could not be loaded: {0}")]
    Font(String),
}

impl Error {
    pub(crate) fn invalid_argument(
        name: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidArgument {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
