//! Visual comparison of two captures of the same page.
//!
//! Scores two images with a structural similarity metric on luminance and,
//! when they differ meaningfully, extracts bounding boxes of the changed
//! areas. Everything here is pure: the same inputs and thresholds always
//! give the same output.

pub mod regions;

use anyhow::{anyhow, bail, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage};
use image_compare::Algorithm;

use crate::config::DiffConfig;
use regions::{abs_diff, Mask, PixelBox};

/// A changed area, in the first image's pixel space and normalized to [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub area: u64,
    pub norm_x: f64,
    pub norm_y: f64,
    pub norm_w: f64,
    pub norm_h: f64,
}

impl ChangeRegion {
    fn from_box(b: &PixelBox, width: u32, height: u32) -> Self {
        let (fw, fh) = (width as f64, height as f64);
        Self {
            x: b.x,
            y: b.y,
            w: b.w,
            h: b.h,
            area: b.area(),
            norm_x: b.x as f64 / fw,
            norm_y: b.y as f64 / fh,
            norm_w: b.w as f64 / fw,
            norm_h: b.h as f64 / fh,
        }
    }
}

/// Outcome of comparing two images.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub similarity: f64,
    pub changed: bool,
    /// Unordered; empty when the pair is unchanged.
    pub regions: Vec<ChangeRegion>,
    pub width: u32,
    pub height: u32,
}

pub struct ImageDiffEngine {
    config: DiffConfig,
}

impl ImageDiffEngine {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Whether a similarity score counts as a meaningful change.
    pub fn is_changed(&self, similarity: f64) -> bool {
        similarity < self.config.global_threshold
    }

    /// Score and, if needed, locate the changes between `a` and `b`.
    pub fn compare(&self, a: &DynamicImage, b: &DynamicImage) -> Result<Comparison> {
        let (gray_a, gray_b) = luminance_pair(a, b)?;
        let similarity = similarity_of(&gray_a, &gray_b)?;
        let changed = self.is_changed(similarity);
        let regions = if changed {
            self.regions_of(&gray_a, &gray_b)
        } else {
            Vec::new()
        };

        Ok(Comparison {
            similarity,
            changed,
            regions,
            width: gray_a.width(),
            height: gray_a.height(),
        })
    }

    /// Structural similarity of the two images in [0, 1].
    ///
    /// `b` is resampled to `a`'s dimensions when they differ.
    pub fn global_similarity(&self, a: &DynamicImage, b: &DynamicImage) -> Result<f64> {
        let (gray_a, gray_b) = luminance_pair(a, b)?;
        similarity_of(&gray_a, &gray_b)
    }

    /// Bounding boxes of changed areas, in `a`'s pixel space.
    ///
    /// Returns nothing without looking at pixels when `score` is at or above
    /// the global threshold.
    pub fn change_regions(
        &self,
        a: &DynamicImage,
        b: &DynamicImage,
        score: f64,
    ) -> Result<Vec<ChangeRegion>> {
        if !self.is_changed(score) {
            return Ok(Vec::new());
        }
        let (gray_a, gray_b) = luminance_pair(a, b)?;
        Ok(self.regions_of(&gray_a, &gray_b))
    }

    fn regions_of(&self, a: &GrayImage, b: &GrayImage) -> Vec<ChangeRegion> {
        let (width, height) = a.dimensions();

        let diff = abs_diff(a, b);
        let blurred = image::imageops::blur(&diff, self.config.blur_sigma);

        let mut mask = Mask::from_threshold(&blurred, self.config.pixel_threshold);
        for _ in 0..self.config.dilate_iterations {
            mask = mask.dilate();
        }
        for _ in 0..self.config.erode_iterations {
            mask = mask.erode();
        }

        let min_area = self.config.min_area_ratio * width as f64 * height as f64;

        mask.component_boxes()
            .iter()
            .filter(|b| b.area() as f64 >= min_area)
            .map(|b| ChangeRegion::from_box(b, width, height))
            .collect()
    }
}

/// Grayscale versions of both images in `a`'s dimensions.
fn luminance_pair(a: &DynamicImage, b: &DynamicImage) -> Result<(GrayImage, GrayImage)> {
    let (width, height) = a.dimensions();
    if width == 0 || height == 0 {
        bail!("Cannot compare an empty image");
    }
    if b.width() == 0 || b.height() == 0 {
        bail!("Cannot compare against an empty image");
    }

    let gray_a = a.to_luma8();
    let gray_b = if b.dimensions() == (width, height) {
        b.to_luma8()
    } else {
        b.resize_exact(width, height, FilterType::Triangle).to_luma8()
    };

    Ok((gray_a, gray_b))
}

fn similarity_of(a: &GrayImage, b: &GrayImage) -> Result<f64> {
    if a.as_raw() == b.as_raw() {
        return Ok(1.0);
    }

    let result = image_compare::gray_similarity_structure(&Algorithm::MSSIMSimple, a, b)
        .map_err(|e| anyhow!("SSIM calculation failed: {:?}", e))?;

    // SSIM can dip below zero for inverted content
    Ok(result.score.clamp(0.0, 1.0))
}
