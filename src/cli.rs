use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::alignment::AlignConfig;
use crate::detection::RoiConfig;

#[derive(Parser, Debug)]
#[command(name = "page-align")]
#[command(version, about = "Find the page in a photo and align scans against a reference")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Show detection details
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crop an image to its largest page contour
    Crop {
        input: PathBuf,

        /// Output path [default: input_cropped.png]
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        roi: RoiArgs,
    },

    /// Draw every detected contour over the image
    Contours {
        input: PathBuf,

        /// Output path [default: input_contours.png]
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        roi: RoiArgs,
    },

    /// Rotate TRAIN onto the orientation of QUERY
    Align {
        query: PathBuf,
        train: PathBuf,

        /// Output path [default: train_aligned.png]
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        align: AlignArgs,
    },

    /// Sauvola binarization of a document photo
    Binarize {
        input: PathBuf,

        /// Output path [default: input_binarized.png]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Crop every image in a folder
    BatchCrop {
        folder: PathBuf,
        output_dir: PathBuf,

        #[command(flatten)]
        roi: RoiArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RoiArgs {
    /// Median filter radius at processing resolution
    #[arg(long, default_value = "17")]
    pub median_radius: u32,

    /// Douglas-Peucker epsilon, in processing pixels
    #[arg(long, default_value = "50")]
    pub epsilon: f64,

    /// Smallest contour area kept, in processing pixels
    #[arg(long, default_value = "76800")]
    pub min_area: f64,
}

impl RoiArgs {
    pub fn config(&self) -> RoiConfig {
        RoiConfig {
            median_radius: self.median_radius,
            polygon_epsilon: self.epsilon,
            min_area: self.min_area,
            ..RoiConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AlignArgs {
    /// Largest Hamming distance of an accepted match
    #[arg(long, default_value = "20")]
    pub max_distance: u32,

    /// Fewest good matches needed
    #[arg(long, default_value = "25")]
    pub min_matches: usize,

    /// Largest spread of match angles, in degrees
    #[arg(long, default_value = "10")]
    pub max_angle_std_dev: f64,

    /// Keypoints kept per image
    #[arg(long, default_value = "10000")]
    pub max_keypoints: usize,
}

impl AlignArgs {
    pub fn config(&self) -> AlignConfig {
        AlignConfig {
            max_distance: self.max_distance,
            min_matches: self.min_matches,
            max_angle_std_dev: self.max_angle_std_dev,
            max_keypoints: self.max_keypoints,
            ..AlignConfig::default()
        }
    }
}

/// `<dir>/<stem>_<suffix>.png` next to `input`
pub fn sibling_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}_{}.png", stem, suffix))
}

/// File name for one batch result: `<stem>_<extension>.png`.
///
/// Keeping the source extension stops `scan.jpg` and `scan.png` from
/// landing on the same output.
pub fn batch_output_name(input: &Path) -> String {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    match input.extension() {
        Some(ext) => format!("{}_{}.png", stem, ext.to_string_lossy()),
        None => format!("{}.png", stem),
    }
}

/// `output` if given, otherwise [`sibling_path`]
pub fn output_path(output: &Option<PathBuf>, input: &Path, suffix: &str) -> PathBuf {
    output
        .clone()
        .unwrap_or_else(|| sibling_path(input, suffix))
}
