use image::{DynamicImage, ImageReader};
use image_hasher::{HashAlg, Hasher, HasherConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerceptualError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Unexpected fingerprint width: {bytes} bytes")]
    UnexpectedWidth { bytes: usize },

    #[error("Invalid fingerprint: {0}")]
    InvalidHex(String),
}

/// 64-bit visual fingerprint. Hamming distance between two fingerprints
/// approximates how different the images look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PerceptualHash(u64);

impl PerceptualHash {
    pub const BITS: u32 = u64::BITS;

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn distance(self, other: PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self, PerceptualError> {
        if hex.len() != 16 {
            return Err(PerceptualError::InvalidHex(hex.to_string()));
        }
        u64::from_str_radix(hex, 16)
            .map(Self)
            .map_err(|_| PerceptualError::InvalidHex(hex.to_string()))
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<PerceptualHash> for String {
    fn from(hash: PerceptualHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for PerceptualHash {
    type Error = PerceptualError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

/// Similarity score for a Hamming distance: `100 × (1 − distance / 64)`.
pub fn score_for_distance(distance: u32) -> f64 {
    100.0 * (1.0 - distance as f64 / PerceptualHash::BITS as f64)
}

/// Similarity in `[0, 100]`; symmetric, and exactly 100.0 for identical fingerprints.
pub fn similarity(a: PerceptualHash, b: PerceptualHash) -> f64 {
    score_for_distance(a.distance(b))
}

/// Largest Hamming distance whose score still reaches `threshold`.
/// `None` only for thresholds above 100.
pub fn max_distance_for(threshold: f64) -> Option<u32> {
    (0..=PerceptualHash::BITS)
        .rev()
        .find(|&distance| score_for_distance(distance) >= threshold)
}

/// Gradient (dHash) fingerprints over an 8×8 grid.
pub struct PerceptualHasher {
    hasher: Hasher,
}

impl PerceptualHasher {
    pub fn new() -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(8, 8)
            .to_hasher();
        Self { hasher }
    }

    pub fn hash_image(&self, image: &DynamicImage) -> Result<PerceptualHash, PerceptualError> {
        let hash = self.hasher.hash_image(image);
        let bytes = hash.as_bytes();
        let array: [u8; 8] = bytes
            .try_into()
            .map_err(|_| PerceptualError::UnexpectedWidth { bytes: bytes.len() })?;
        Ok(PerceptualHash(u64::from_be_bytes(array)))
    }

    /// Decodes the file (format sniffed from content) and fingerprints it.
    /// Also returns the decoded pixel dimensions.
    pub fn hash_file(&self, path: &Path) -> Result<(PerceptualHash, (u32, u32)), PerceptualError> {
        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        let hash = self.hash_image(&image)?;
        Ok((hash, (image.width(), image.height())))
    }
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new()
    }
}
