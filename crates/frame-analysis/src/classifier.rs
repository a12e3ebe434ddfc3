//! Frame health classification.
//!
//! Precedence is `corrupt > black > ok`: black-frame scoring only runs on a
//! frame that decoded, and a frame that did not decode never gets a
//! fingerprint.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AnalysisError, Result};
use crate::fingerprint::Fingerprint;
use crate::quality::Resolution;

/// Health verdict for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    Ok,
    Black,
    Corrupt,
}

impl FrameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Black => "black",
            Self::Corrupt => "corrupt",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a decoded frame is judged black.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlackFramePolicy {
    /// Mean luma below `black_luma_threshold`.
    #[default]
    MeanLuma,
    /// At least `black_ratio_threshold` of pixels have every channel below
    /// `black_pixel_cutoff`.
    DarkRatio,
}

impl std::str::FromStr for BlackFramePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean_luma" | "mean" => Ok(Self::MeanLuma),
            "dark_ratio" | "ratio" => Ok(Self::DarkRatio),
            other => Err(format!("unknown black frame policy: {other}")),
        }
    }
}

/// Classifier thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub policy: BlackFramePolicy,
    /// Mean luma (0-255) below which a frame is black under `MeanLuma`.
    pub black_luma_threshold: f64,
    /// Per-channel value below which a pixel counts as dark under `DarkRatio`.
    pub black_pixel_cutoff: u8,
    /// Fraction of dark pixels at or above which a frame is black under `DarkRatio`.
    pub black_ratio_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            policy: BlackFramePolicy::MeanLuma,
            black_luma_threshold: 16.0,
            black_pixel_cutoff: 24,
            black_ratio_threshold: 0.9,
        }
    }
}

/// Outcome of classifying one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub status: FrameStatus,
    /// `None` for corrupt frames, and for decoded frames whose fingerprint
    /// could not be computed.
    pub fingerprint: Option<Fingerprint>,
    pub resolution: Option<Resolution>,
    /// The policy score the black verdict was based on.
    pub black_score: Option<f64>,
}

impl ClassificationResult {
    pub fn corrupt() -> Self {
        Self {
            status: FrameStatus::Corrupt,
            fingerprint: None,
            resolution: None,
            black_score: None,
        }
    }
}

/// Turns raw frame bytes into a verdict.
pub trait FrameAnalyzer: Send + Sync {
    fn analyze(&self, bytes: &[u8]) -> ClassificationResult;
}

/// Stateless frame classifier.
#[derive(Debug, Clone, Default)]
pub struct FrameClassifier {
    config: ClassifierConfig,
}

impl FrameClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify raw frame bytes. Never fails: undecodable input is `corrupt`.
    pub fn classify(&self, bytes: &[u8]) -> ClassificationResult {
        let image = match decode(bytes) {
            Ok(image) => image,
            Err(e) => {
                debug!(error = %e, len = bytes.len(), "Frame failed to decode");
                return ClassificationResult::corrupt();
            }
        };

        let black_score = self.black_score(&image);
        let status = if self.is_black(black_score) {
            FrameStatus::Black
        } else {
            FrameStatus::Ok
        };

        let fingerprint = match Fingerprint::of_image(&image) {
            Ok(fp) => Some(fp),
            Err(e) => {
                warn!(error = %e, "Fingerprint unavailable for decoded frame");
                None
            }
        };

        ClassificationResult {
            status,
            fingerprint,
            resolution: Some(Resolution::new(image.width(), image.height())),
            black_score: Some(black_score),
        }
    }

    fn black_score(&self, image: &DynamicImage) -> f64 {
        match self.config.policy {
            BlackFramePolicy::MeanLuma => mean_luma(image),
            BlackFramePolicy::DarkRatio => dark_ratio(image, self.config.black_pixel_cutoff),
        }
    }

    fn is_black(&self, score: f64) -> bool {
        match self.config.policy {
            BlackFramePolicy::MeanLuma => score < self.config.black_luma_threshold,
            BlackFramePolicy::DarkRatio => score >= self.config.black_ratio_threshold,
        }
    }
}

impl FrameAnalyzer for FrameClassifier {
    fn analyze(&self, bytes: &[u8]) -> ClassificationResult {
        self.classify(bytes)
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(AnalysisError::EmptyPayload);
    }
    Ok(image::load_from_memory(bytes)?)
}

fn mean_luma(image: &DynamicImage) -> f64 {
    let luma = image.to_luma8();
    let count = luma.pixels().len();
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = luma.pixels().map(|p| u64::from(p.0[0])).sum();
    sum as f64 / count as f64
}

fn dark_ratio(image: &DynamicImage, cutoff: u8) -> f64 {
    let rgb = image.to_rgb8();
    let count = rgb.pixels().len();
    if count == 0 {
        return 1.0;
    }
    let dark = rgb
        .pixels()
        .filter(|p| p.0.iter().all(|&c| c < cutoff))
        .count();
    dark as f64 / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode(img: RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, format)
            .unwrap();
        buf.into_inner()
    }

    fn solid(value: u8) -> RgbImage {
        ImageBuffer::from_pixel(64, 36, Rgb([value, value, value]))
    }

    fn gradient() -> RgbImage {
        ImageBuffer::from_fn(64, 36, |x, _| {
            let v = (x * 4) as u8;
            Rgb([v, 255 - v, 128])
        })
    }

    #[test]
    fn test_non_image_bytes_are_corrupt() {
        let classifier = FrameClassifier::default();
        let result = classifier.classify(b"definitely not a jpeg");
        assert_eq!(result.status, FrameStatus::Corrupt);
        assert!(result.fingerprint.is_none());
        assert!(result.resolution.is_none());
    }

    #[test]
    fn test_empty_bytes_are_corrupt() {
        let result = FrameClassifier::default().classify(&[]);
        assert_eq!(result, ClassificationResult::corrupt());
    }

    #[test]
    fn test_truncated_png_is_corrupt() {
        let bytes = encode(gradient(), ImageFormat::Png);
        let result = FrameClassifier::default().classify(&bytes[..bytes.len() / 4]);
        assert_eq!(result.status, FrameStatus::Corrupt);
    }

    #[test]
    fn test_black_jpeg_is_black() {
        let bytes = encode(solid(0), ImageFormat::Jpeg);
        let result = FrameClassifier::default().classify(&bytes);
        assert_eq!(result.status, FrameStatus::Black);
        assert!(result.fingerprint.is_some());
        assert_eq!(result.resolution, Some(Resolution::new(64, 36)));
    }

    #[test]
    fn test_bright_png_is_ok() {
        let bytes = encode(gradient(), ImageFormat::Png);
        let result = FrameClassifier::default().classify(&bytes);
        assert_eq!(result.status, FrameStatus::Ok);
        assert!(result.fingerprint.is_some());
    }

    #[test]
    fn test_dark_ratio_policy() {
        let classifier = FrameClassifier::new(ClassifierConfig {
            policy: BlackFramePolicy::DarkRatio,
            ..Default::default()
        });

        // 95% of the frame is black, the rest is white.
        let mostly_black: RgbImage = ImageBuffer::from_fn(100, 20, |x, _| {
            if x < 95 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        });
        let result = classifier.classify(&encode(mostly_black, ImageFormat::Png));
        assert_eq!(result.status, FrameStatus::Black);

        let half_black: RgbImage = ImageBuffer::from_fn(100, 20, |x, _| {
            if x < 50 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        });
        let result = classifier.classify(&encode(half_black, ImageFormat::Png));
        assert_eq!(result.status, FrameStatus::Ok);
    }

    #[test]
    fn test_dark_ratio_boundary_is_inclusive() {
        let classifier = FrameClassifier::new(ClassifierConfig {
            policy: BlackFramePolicy::DarkRatio,
            ..Default::default()
        });
        let columns = |dark: u32| -> RgbImage {
            ImageBuffer::from_fn(100, 20, move |x, _| {
                if x < dark { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
            })
        };

        let at_threshold = classifier.classify(&encode(columns(90), ImageFormat::Png));
        assert_eq!(at_threshold.black_score, Some(0.9));
        assert_eq!(at_threshold.status, FrameStatus::Black);

        let below = classifier.classify(&encode(columns(89), ImageFormat::Png));
        assert_eq!(below.status, FrameStatus::Ok);
    }

    #[test]
    fn test_threshold_is_configurable() {
        let bytes = encode(solid(40), ImageFormat::Png);
        assert_eq!(
            FrameClassifier::default().classify(&bytes).status,
            FrameStatus::Ok
        );

        let strict = FrameClassifier::new(ClassifierConfig {
            black_luma_threshold: 50.0,
            ..Default::default()
        });
        assert_eq!(strict.classify(&bytes).status, FrameStatus::Black);
    }

    #[test]
    fn test_reencoded_frame_keeps_fingerprint() {
        let classifier = FrameClassifier::default();
        let png = classifier.classify(&encode(gradient(), ImageFormat::Png));
        let jpeg = classifier.classify(&encode(gradient(), ImageFormat::Jpeg));
        let a = png.fingerprint.unwrap();
        let b = jpeg.fingerprint.unwrap();
        assert!(a.distance(&b) <= 4, "distance was {}", a.distance(&b));
    }

    #[test]
    fn test_analyzer_matches_classify() {
        let classifier = FrameClassifier::default();
        let analyzer: &dyn FrameAnalyzer = &classifier;
        let bytes = encode(gradient(), ImageFormat::Png);
        assert_eq!(analyzer.analyze(&bytes), classifier.classify(&bytes));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("dark_ratio".parse::<BlackFramePolicy>().unwrap(), BlackFramePolicy::DarkRatio);
        assert_eq!("MEAN_LUMA".parse::<BlackFramePolicy>().unwrap(), BlackFramePolicy::MeanLuma);
        assert!("brightest".parse::<BlackFramePolicy>().is_err());
    }
}
