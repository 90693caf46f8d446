//! Pixel-level readiness oracle.
//!
//! Template matching uses the normalized correlation coefficient over luma,
//! taking the best score across every placement of the template inside the
//! crop. Without a template, a crop counts as "lit" when its mean value
//! channel (max of R, G, B) exceeds a brightness threshold; greyed-out icons
//! fall below it.

use image::{imageops, GrayImage, RgbaImage};

use crate::collaborators::ReadinessOracle;
use crate::error::VisionError;
use crate::types::Region;

pub const DEFAULT_BRIGHTNESS_THRESHOLD: u8 = 100;

#[derive(Debug, Clone, Copy)]
pub struct PixelOracle {
    brightness_threshold: u8,
}

impl Default for PixelOracle {
    fn default() -> Self {
        Self::new(DEFAULT_BRIGHTNESS_THRESHOLD)
    }
}

impl PixelOracle {
    pub fn new(brightness_threshold: u8) -> Self {
        Self {
            brightness_threshold,
        }
    }
}

impl ReadinessOracle for PixelOracle {
    fn match_region(
        &self,
        image: &RgbaImage,
        region: Region,
        template: Option<&RgbaImage>,
        threshold: f32,
    ) -> Result<bool, VisionError> {
        let crop = crop(image, region)?;
        match template {
            Some(t) => Ok(best_match(&crop, t)? >= threshold),
            None => Ok(mean_value(&crop) > f32::from(self.brightness_threshold)),
        }
    }
}

/// Copy `region` out of `image`, rejecting empty or out-of-frame regions.
pub fn crop(image: &RgbaImage, region: Region) -> Result<RgbaImage, VisionError> {
    if region.is_empty() {
        return Err(VisionError::EmptyRegion);
    }
    if !region.fits_within(image.width(), image.height()) {
        return Err(VisionError::RegionOutOfBounds {
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
            frame_width: image.width(),
            frame_height: image.height(),
        });
    }
    Ok(imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image())
}

/// Mean of max(R, G, B) over the image, i.e. the HSV value channel.
pub fn mean_value(image: &RgbaImage) -> f32 {
    let n = u64::from(image.width()) * u64::from(image.height());
    if n == 0 {
        return 0.0;
    }
    let sum: u64 = image
        .pixels()
        .map(|p| u64::from(p.0[0].max(p.0[1]).max(p.0[2])))
        .sum();
    sum as f32 / n as f32
}

/// Best normalized correlation coefficient of `template` over `crop`, in
/// `[-1, 1]`.
pub fn best_match(crop: &RgbaImage, template: &RgbaImage) -> Result<f32, VisionError> {
    let (cw, ch) = crop.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 {
        return Err(VisionError::EmptyRegion);
    }
    if tw > cw || th > ch {
        return Err(VisionError::TemplateTooLarge {
            template_width: tw,
            template_height: th,
            crop_width: cw,
            crop_height: ch,
        });
    }

    let crop = imageops::grayscale(crop);
    let tmpl = imageops::grayscale(template);
    let tmpl_mean = mean_luma(&tmpl, 0, 0, tw, th);
    let tmpl_var: f64 = tmpl
        .pixels()
        .map(|p| {
            let d = f64::from(p.0[0]) - tmpl_mean;
            d * d
        })
        .sum();

    let mut best = f64::NEG_INFINITY;
    for oy in 0..=(ch - th) {
        for ox in 0..=(cw - tw) {
            let score = coefficient(&crop, &tmpl, ox, oy, tmpl_mean, tmpl_var);
            best = best.max(score);
        }
    }
    Ok(best as f32)
}

fn mean_luma(img: &GrayImage, ox: u32, oy: u32, w: u32, h: u32) -> f64 {
    let mut sum = 0u64;
    for y in 0..h {
        for x in 0..w {
            sum += u64::from(img.get_pixel(ox + x, oy + y).0[0]);
        }
    }
    sum as f64 / (f64::from(w) * f64::from(h))
}

fn coefficient(
    crop: &GrayImage,
    tmpl: &GrayImage,
    ox: u32,
    oy: u32,
    tmpl_mean: f64,
    tmpl_var: f64,
) -> f64 {
    let (tw, th) = tmpl.dimensions();
    let win_mean = mean_luma(crop, ox, oy, tw, th);
    let mut cross = 0.0;
    let mut win_var = 0.0;
    for y in 0..th {
        for x in 0..tw {
            let t = f64::from(tmpl.get_pixel(x, y).0[0]) - tmpl_mean;
            let w = f64::from(crop.get_pixel(ox + x, oy + y).0[0]) - win_mean;
            cross += t * w;
            win_var += w * w;
        }
    }
    let denom = (tmpl_var * win_var).sqrt();
    if denom > f64::EPSILON {
        return cross / denom;
    }
    // Flat patches carry no shape; match them on level alone.
    if tmpl_var <= f64::EPSILON && win_var <= f64::EPSILON && (tmpl_mean - win_mean).abs() < 1.0 {
        1.0
    } else {
        0.0
    }
}
