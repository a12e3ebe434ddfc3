//! Difference-hash fingerprint.
//!
//! The frame is reduced to a 9x8 grayscale thumbnail and each bit records
//! whether a pixel is brighter than its right-hand neighbour. Downsampling
//! averages away re-encoding noise, so two encodes of the same picture hash
//! identically while any material change of content flips bits.

use std::str::FromStr;

use image::DynamicImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

const HASH_WIDTH: u32 = 8;
const HASH_HEIGHT: u32 = 8;

/// 64-bit perceptual fingerprint of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Compute the fingerprint of a decoded image.
    pub fn of_image(image: &DynamicImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(AnalysisError::Fingerprint {
                width: image.width(),
                height: image.height(),
            });
        }

        let small = image
            .resize_exact(HASH_WIDTH + 1, HASH_HEIGHT, FilterType::Triangle)
            .to_luma8();

        let mut bits = 0u64;
        for y in 0..HASH_HEIGHT {
            for x in 0..HASH_WIDTH {
                let left = small.get_pixel(x, y).0[0];
                let right = small.get_pixel(x + 1, y).0[0];
                bits <<= 1;
                if left > right {
                    bits |= 1;
                }
            }
        }

        Ok(Self(bits))
    }

    /// Number of differing bits.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Whether two fingerprints describe the same picture within `tolerance` bits.
    pub fn matches(&self, other: &Fingerprint, tolerance: u32) -> bool {
        self.distance(other) <= tolerance
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(Self)
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.to_string()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = std::num::ParseIntError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}
