pub mod alignment;
pub mod annotate;
pub mod binarize;
pub mod cli;
pub mod contour;
pub mod coordinate;
pub mod detection;
pub mod error;
pub mod features;
pub mod folder;
pub mod geometry;
pub mod transform;

pub use alignment::{AlignConfig, Aligner, Alignment, AlignmentOutcome, AngleStats, Rejection};
pub use binarize::binarize_document;
pub use cli::Cli;
pub use contour::Contour;
pub use coordinate::{ImageDimensions, ProportionalCoordinate, ProportionalKey};
pub use detection::{RoiConfig, RoiDetector};
pub use error::{Error, Result};
pub use folder::{read_image, read_image_as, read_image_folder, LoadMode};
