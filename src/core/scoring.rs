use crate::database::models::{Asset, QualityMetrics};
use image::{DynamicImage, GenericImageView, GrayImage};
use rayon::prelude::*;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("Image decoding error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Image is too small to score: {width}x{height}")]
    TooSmall { width: u32, height: u32 },
}

/// Answers whether optional advanced scoring is enabled.
pub trait CapabilityOracle: Send + Sync {
    fn advanced_scoring_enabled(&self) -> bool;
}

impl CapabilityOracle for bool {
    fn advanced_scoring_enabled(&self) -> bool {
        *self
    }
}

/// A pluggable quality model. Output is attached to assets as opaque
/// metrics and never consulted by grouping or planning.
pub trait QualityScorer: Send + Sync {
    fn score(&self, asset: &Asset) -> Result<QualityMetrics, ScoringError>;
}

/// Attaches metrics to every asset when the oracle allows it. Returns how
/// many assets were scored; failures leave `quality` untouched.
pub fn decorate<O, S>(assets: &mut [Asset], oracle: &O, scorer: &S) -> usize
where
    O: CapabilityOracle + ?Sized,
    S: QualityScorer + ?Sized,
{
    if !oracle.advanced_scoring_enabled() {
        log::debug!("Advanced scoring disabled, skipping quality metrics");
        return 0;
    }

    assets
        .par_iter_mut()
        .map(|asset| match scorer.score(asset) {
            Ok(metrics) => {
                asset.quality = Some(metrics);
                1usize
            }
            Err(e) => {
                log::debug!("Could not score {}: {}", asset.path.display(), e);
                0
            }
        })
        .sum()
}

/// Cheap pixel statistics: Laplacian-variance sharpness, mean luminance
/// exposure and aspect-ratio composition.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score_path(&self, path: &Path) -> Result<QualityMetrics, ScoringError> {
        let image = image::open(path)?;
        self.score_image(&image)
    }

    pub fn score_image(&self, image: &DynamicImage) -> Result<QualityMetrics, ScoringError> {
        let (width, height) = image.dimensions();
        if width < 3 || height < 3 {
            return Err(ScoringError::TooSmall { width, height });
        }

        let sharpness = (laplacian_variance(&image.to_luma8()) / 1000.0).min(1.0);
        let exposure = exposure(image);
        let composition = composition(width, height);

        let mut technical_issues = Vec::new();
        if sharpness < 0.3 {
            technical_issues.push("Image appears blurry".to_string());
        }
        if !(0.2..=0.8).contains(&exposure) {
            technical_issues.push("Poor exposure detected".to_string());
        }

        Ok(QualityMetrics {
            overall: sharpness * 0.4 + exposure * 0.3 + composition * 0.3,
            sharpness,
            exposure,
            composition,
            technical_issues,
        })
    }
}

impl QualityScorer for HeuristicScorer {
    fn score(&self, asset: &Asset) -> Result<QualityMetrics, ScoringError> {
        self.score_path(&asset.path)
    }
}

fn laplacian_variance(image: &GrayImage) -> f64 {
    let (width, height) = image.dimensions();
    let at = |x: u32, y: u32| image.get_pixel(x, y)[0] as f64;

    let mut sum = 0.0;
    let mut count = 0u64;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let laplacian =
                4.0 * at(x, y) - at(x - 1, y) - at(x + 1, y) - at(x, y - 1) - at(x, y + 1);
            sum += laplacian * laplacian;
            count += 1;
        }
    }

    if count > 0 {
        sum / count as f64
    } else {
        0.0
    }
}

/// 1.0 at mid-grey average luminance, falling to 0.0 at pure black or white.
fn exposure(image: &DynamicImage) -> f64 {
    let rgb = image.to_rgb8();
    let pixels = (rgb.width() as f64 * rgb.height() as f64).max(1.0);
    let brightness: f64 = rgb
        .pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .sum();

    let normalized = brightness / pixels / 255.0;
    (1.0 - (normalized - 0.5).abs() * 2.0).max(0.0)
}

fn composition(width: u32, height: u32) -> f64 {
    let ratio = width.max(height) as f64 / width.min(height) as f64;
    match ratio {
        r if (r - 1.618).abs() < 0.1 => 1.0, // golden ratio
        r if (r - 1.5).abs() < 0.1 => 0.9,   // 3:2
        r if (r - 1.333).abs() < 0.1 => 0.8, // 4:3
        r if (r - 1.0).abs() < 0.1 => 0.7,
        _ => 0.5,
    }
}
