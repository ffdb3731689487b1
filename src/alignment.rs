use std::fmt;

use image::{DynamicImage, RgbaImage};
use tracing::{debug, info, instrument};

use crate::annotate::{Annotator, LABEL_GREEN, LABEL_RED};
use crate::error::{Error, Result};
use crate::features::{match_features, Feature, FeatureExtractor, FeatureMatch};
use crate::geometry::{normalize_degrees, rotation_fitted_to_canvas};
use crate::transform::apply_affine_transform;

/// Confidence limits and detector settings for rotation alignment
#[derive(Debug, Clone, PartialEq)]
pub struct AlignConfig {
    pub max_keypoints: usize,
    pub fast_threshold: u8,
    /// Gaussian sigma applied before sampling descriptors
    pub smoothing_sigma: f32,
    /// Largest Hamming distance accepted for a match
    pub max_distance: u32,
    pub min_matches: usize,
    /// Largest standard deviation of match angles, in degrees
    pub max_angle_std_dev: f64,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            max_keypoints: 10_000,
            fast_threshold: 20,
            smoothing_sigma: 2.0,
            max_distance: 20,
            min_matches: 25,
            max_angle_std_dev: 10.0,
        }
    }
}

impl AlignConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_keypoints == 0 {
            return Err(Error::invalid_argument(
                "max_keypoints",
                self.max_keypoints,
                "must be positive",
            ));
        }
        if self.smoothing_sigma < 0.0 {
            return Err(Error::invalid_argument(
                "smoothing_sigma",
                self.smoothing_sigma,
                "must not be negative",
            ));
        }
        if self.max_angle_std_dev < 0.0 {
            return Err(Error::invalid_argument(
                "max_angle_std_dev",
                self.max_angle_std_dev,
                "must not be negative",
            ));
        }
        Ok(())
    }
}

/// Mean and population standard deviation of a set of angles, in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleStats {
    pub mean: f64,
    pub std_dev: f64,
}

impl AngleStats {
    pub fn of(angles: &[f64]) -> Self {
        if angles.is_empty() {
            return Self {
                mean: 0.0,
                std_dev: 0.0,
            };
        }
        let n = angles.len() as f64;
        let mean = angles.iter().sum::<f64>() / n;
        let variance = angles.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std_dev: variance.sqrt(),
        }
    }
}

/// Why a match set was judged unreliable
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Even the closest descriptor pair is too far apart
    BestDistance { distance: u32, limit: u32 },
    /// Too few matches survived the distance filter
    MatchCount { count: usize, minimum: usize },
    /// Match angles disagree on a single rotation
    AngleSpread { std_dev: f64, limit: f64 },
}

impl Rejection {
    /// The value that failed its gate
    pub fn metric(&self) -> f64 {
        match *self {
            Rejection::BestDistance { distance, .. } => distance as f64,
            Rejection::MatchCount { count, .. } => count as f64,
            Rejection::AngleSpread { std_dev, .. } => std_dev,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::BestDistance { distance, limit } => write!(
                f,
                "best match distance {} exceeds {}, images look unrelated",
                distance, limit
            ),
            Rejection::MatchCount { count, minimum } => write!(
                f,
                "only {} matches within distance limit, need {}",
                count, minimum
            ),
            Rejection::AngleSpread { std_dev, limit } => write!(
                f,
                "match angles spread {:.2}° exceeds {:.2}°, no single rotation fits",
                std_dev, limit
            ),
        }
    }
}

/// Statistics of a match set that passed every confidence gate
#[derive(Debug, Clone, PartialEq)]
pub struct MatchEvaluation {
    pub best_distance: u32,
    pub match_count: usize,
    pub angles: AngleStats,
    /// Counter-clockwise rotation, in degrees, that brings train onto query
    pub rotation: f64,
}

/// A successful alignment
#[derive(Debug, Clone)]
pub struct Alignment {
    pub image: RgbaImage,
    pub evaluation: MatchEvaluation,
}

/// Result of [`Aligner::align`]; a rejection is a normal outcome, not an error
#[derive(Debug, Clone)]
pub enum AlignmentOutcome {
    Aligned(Alignment),
    Rejected {
        image: RgbaImage,
        rejection: Rejection,
    },
}

impl AlignmentOutcome {
    pub fn is_aligned(&self) -> bool {
        matches!(self, AlignmentOutcome::Aligned(_))
    }

    /// The output image, rotated or diagnostic
    pub fn image(&self) -> &RgbaImage {
        match self {
            AlignmentOutcome::Aligned(alignment) => &alignment.image,
            AlignmentOutcome::Rejected { image, .. } => image,
        }
    }

    pub fn into_image(self) -> RgbaImage {
        match self {
            AlignmentOutcome::Aligned(alignment) => alignment.image,
            AlignmentOutcome::Rejected { image, .. } => image,
        }
    }
}

/// Orientation of each query keypoint relative to its train keypoint, in `[0, 360)`
pub fn relative_angles(query: &[Feature], train: &[Feature], matches: &[FeatureMatch]) -> Vec<f64> {
    matches
        .iter()
        .map(|m| {
            let q = query[m.query_index].keypoint.angle as f64;
            let t = train[m.train_index].keypoint.angle as f64;
            normalize_degrees(q - t)
        })
        .collect()
}

/// `360 - mean(ceil(angle))`.
///
/// Rounding every angle up biases the estimate toward over-rotation.
pub fn estimate_rotation(angles: &[f64]) -> f64 {
    if angles.is_empty() {
        return 0.0;
    }
    let mean_ceiled = angles.iter().map(|a| a.ceil()).sum::<f64>() / angles.len() as f64;
    360.0 - mean_ceiled
}

/// Run the three confidence gates over a match set.
pub fn evaluate_matches(
    query: &[Feature],
    train: &[Feature],
    matches: &[FeatureMatch],
    config: &AlignConfig,
) -> std::result::Result<MatchEvaluation, Rejection> {
    let best_distance = match matches.iter().map(|m| m.distance).min() {
        Some(distance) => distance,
        None => {
            return Err(Rejection::MatchCount {
                count: 0,
                minimum: config.min_matches,
            })
        }
    };
    if best_distance > config.max_distance {
        return Err(Rejection::BestDistance {
            distance: best_distance,
            limit: config.max_distance,
        });
    }

    let good: Vec<FeatureMatch> = matches
        .iter()
        .filter(|m| m.distance <= config.max_distance)
        .copied()
        .collect();
    if good.len() < config.min_matches {
        return Err(Rejection::MatchCount {
            count: good.len(),
            minimum: config.min_matches,
        });
    }

    let angles = relative_angles(query, train, &good);
    let stats = AngleStats::of(&angles);
    if stats.std_dev > config.max_angle_std_dev {
        return Err(Rejection::AngleSpread {
            std_dev: stats.std_dev,
            limit: config.max_angle_std_dev,
        });
    }

    Ok(MatchEvaluation {
        best_distance,
        match_count: good.len(),
        angles: stats,
        rotation: estimate_rotation(&angles),
    })
}

/// Aligns a train image to the orientation of a query image.
#[derive(Debug, Clone)]
pub struct Aligner {
    config: AlignConfig,
    extractor: FeatureExtractor,
    annotator: Annotator,
}

impl Aligner {
    pub fn new(config: AlignConfig) -> Result<Self> {
        config.validate()?;
        let extractor = FeatureExtractor::new(
            config.max_keypoints,
            config.fast_threshold,
            config.smoothing_sigma,
        );
        Ok(Self {
            config,
            extractor,
            annotator: Annotator::new()?,
        })
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// Estimate the rotation between the two images without rendering output
    pub fn evaluate(
        &self,
        query: &DynamicImage,
        train: &DynamicImage,
    ) -> std::result::Result<MatchEvaluation, Rejection> {
        let query_features = self.extractor.detect(&query.to_luma8());
        let train_features = self.extractor.detect(&train.to_luma8());
        let matches = match_features(&query_features, &train_features);

        debug!(
            query_features = query_features.len(),
            train_features = train_features.len(),
            matches = matches.len(),
            "Descriptors matched"
        );

        evaluate_matches(&query_features, &train_features, &matches, &self.config)
    }

    /// Rotate `train` onto the orientation of `query`.
    ///
    /// The returned canvas holds the whole rotated train image. When a
    /// confidence gate fails the train image comes back unrotated, labelled
    /// with the failing metric.
    #[instrument(skip_all, fields(
        query_width = query.width(),
        query_height = query.height(),
        train_width = train.width(),
        train_height = train.height()
    ))]
    pub fn align(&self, query: &DynamicImage, train: &DynamicImage) -> AlignmentOutcome {
        let evaluation = match self.evaluate(query, train) {
            Ok(evaluation) => evaluation,
            Err(rejection) => {
                info!(metric = rejection.metric(), %rejection, "Alignment rejected");
                let mut image = train.to_rgba8();
                let lines = [
                    format!("{:.2}", rejection.metric()),
                    rejection.to_string(),
                    "no match".to_string(),
                ];
                self.annotator.draw_lines(&mut image, &lines, LABEL_RED);
                return AlignmentOutcome::Rejected { image, rejection };
            }
        };

        let (matrix, canvas_width, canvas_height) =
            rotation_fitted_to_canvas(evaluation.rotation, train.width(), train.height());
        let mut image = apply_affine_transform(&train.to_rgba8(), &matrix);

        info!(
            rotation = evaluation.rotation,
            best_distance = evaluation.best_distance,
            matches = evaluation.match_count,
            mean = evaluation.angles.mean,
            std_dev = evaluation.angles.std_dev,
            canvas_width,
            canvas_height,
            "Alignment accepted"
        );

        let lines = [
            format!("best distance: {}", evaluation.best_distance),
            format!(
                "angle mean: {:.2} std dev: {:.2}",
                evaluation.angles.mean, evaluation.angles.std_dev
            ),
            format!("rotation: {:.2}", evaluation.rotation),
        ];
        self.annotator.draw_lines(&mut image, &lines, LABEL_GREEN);

        AlignmentOutcome::Aligned(Alignment { image, evaluation })
    }
}
