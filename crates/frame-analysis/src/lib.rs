//! Single-frame health analysis for live stream thumbnails.
//!
//! A thumbnail is decoded once and yields three things:
//! - a [`FrameStatus`] (`ok`, `black` or `corrupt`, in that reverse precedence)
//! - a [`Fingerprint`], a 64-bit difference hash used for freeze comparison
//! - the decoded [`Resolution`]
//!
//! Everything here is a pure function of the input bytes and the
//! [`ClassifierConfig`]; no state is kept between calls.

mod classifier;
mod error;
mod fingerprint;
mod quality;

pub use classifier::{
    BlackFramePolicy, ClassificationResult, ClassifierConfig, FrameAnalyzer, FrameClassifier,
    FrameStatus,
};
pub use error::{AnalysisError, Result};
pub use fingerprint::Fingerprint;
pub use quality::{QualityTier, Resolution};
