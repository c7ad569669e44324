//! Hough-style circle detection by gradient voting
//!
//! Every pixel with a strong Sobel gradient votes along its gradient line at
//! each radius in `[min_radius, max_radius]`. The boundary of a disk sends
//! all of its votes through the disk center, so after smoothing the
//! accumulator its peaks are circle centers. Each peak's radius is then
//! picked from a histogram of distances to the voting edge pixels.

use arrayvec::ArrayVec;
use image::{GrayImage, ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Most candidates a single detection pass returns
pub const MAX_CANDIDATES: usize = 8;

/// Candidates from one pass, strongest first
pub type CircleCandidates = ArrayVec<Circle, MAX_CANDIDATES>;

/// A detected circle in rectified pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    /// Center x, pixels
    pub x: f32,
    /// Center y, pixels
    pub y: f32,
    /// Radius, pixels
    pub radius: f32,
    /// Fraction of the circumference backed by edge pixels (0-1)
    pub support: f32,
    /// Smoothed accumulator value at the center
    pub votes: f32,
}

/// Finds circles in a grayscale image
///
/// Implementations return candidates ordered strongest first.
pub trait CircleDetector: Send {
    fn detect(&self, image: &GrayImage) -> CircleCandidates;
}

/// Parameters of [`HoughCircleDetector`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughConfig {
    /// Smallest ball radius considered, pixels
    pub min_radius: f32,
    /// Largest ball radius considered, pixels
    pub max_radius: f32,
    /// Edge threshold as a fraction of the strongest gradient
    pub edge_threshold: f32,
    /// Peak threshold as a fraction of the strongest accumulator value
    pub min_vote_frac: f32,
    /// Gaussian sigma applied to the accumulator
    pub accumulator_sigma: f32,
    /// Minimum distance between two reported centers, pixels
    pub min_center_distance: f32,
    /// Minimum fraction of the circumference that must be edge-backed
    pub min_support: f32,
}

impl Default for HoughConfig {
    fn default() -> Self {
        Self {
            min_radius: 8.0,
            max_radius: 40.0,
            edge_threshold: 0.25,
            min_vote_frac: 0.3,
            accumulator_sigma: 1.5,
            min_center_distance: 20.0,
            min_support: 0.5,
        }
    }
}

impl HoughConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.min_radius >= 1.0 && self.max_radius > self.min_radius) {
            return Err(Error::Config(format!(
                "hough radius range [{}, {}] is invalid",
                self.min_radius, self.max_radius
            )));
        }
        for (name, frac) in [
            ("edge_threshold", self.edge_threshold),
            ("min_vote_frac", self.min_vote_frac),
            ("min_support", self.min_support),
        ] {
            if !(0.0..=1.0).contains(&frac) {
                return Err(Error::Config(format!("hough.{} must be in [0, 1]", name)));
            }
        }
        if !(self.accumulator_sigma > 0.0 && self.min_center_distance >= 0.0) {
            return Err(Error::Config("hough smoothing/spacing must be positive".into()));
        }
        Ok(())
    }
}

struct EdgePixel {
    x: f32,
    y: f32,
    dx: f32,
    dy: f32,
    magnitude: f32,
}

/// Gradient-voting circle detector with fixed parameters
#[derive(Debug, Clone, Default)]
pub struct HoughCircleDetector {
    config: HoughConfig,
}

impl HoughCircleDetector {
    pub fn new(config: HoughConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HoughConfig {
        &self.config
    }

    fn edges(&self, image: &GrayImage) -> Vec<EdgePixel> {
        let gx = imageproc::gradients::horizontal_sobel(image);
        let gy = imageproc::gradients::vertical_sobel(image);

        let magnitude = |x: u32, y: u32| {
            let (a, b) = (gx.get_pixel(x, y)[0] as f32, gy.get_pixel(x, y)[0] as f32);
            (a * a + b * b).sqrt()
        };

        let (w, h) = image.dimensions();
        let mut max_mag = 0.0f32;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                max_mag = max_mag.max(magnitude(x, y));
            }
        }
        if max_mag < 1e-3 {
            return Vec::new();
        }

        let threshold = self.config.edge_threshold * max_mag;
        let mut edges = Vec::new();
        // Border rows and columns of the Sobel output are clamped, skip them
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let mag = magnitude(x, y);
                if mag < threshold {
                    continue;
                }
                edges.push(EdgePixel {
                    x: x as f32,
                    y: y as f32,
                    dx: gx.get_pixel(x, y)[0] as f32 / mag,
                    dy: gy.get_pixel(x, y)[0] as f32 / mag,
                    magnitude: mag,
                });
            }
        }
        edges
    }

    fn accumulate(&self, edges: &[EdgePixel], w: u32, h: u32) -> ImageBuffer<Luma<f32>, Vec<f32>> {
        let mut accumulator = ImageBuffer::<Luma<f32>, Vec<f32>>::new(w, h);
        for edge in edges {
            for sign in [-1.0f32, 1.0] {
                let mut r = self.config.min_radius;
                while r <= self.config.max_radius {
                    let vx = (edge.x + sign * edge.dx * r).round();
                    let vy = (edge.y + sign * edge.dy * r).round();
                    if vx >= 0.0 && vy >= 0.0 && vx < w as f32 && vy < h as f32 {
                        accumulator.get_pixel_mut(vx as u32, vy as u32)[0] += edge.magnitude;
                    }
                    r += 1.0;
                }
            }
        }
        imageproc::filter::gaussian_blur_f32(&accumulator, self.config.accumulator_sigma)
    }

    /// Local maxima of the accumulator above the vote threshold, strongest first
    fn peaks(&self, accumulator: &ImageBuffer<Luma<f32>, Vec<f32>>) -> Vec<(u32, u32, f32)> {
        let (w, h) = accumulator.dimensions();
        let max_val = accumulator.as_raw().iter().copied().fold(0.0f32, f32::max);
        if max_val < 1e-6 {
            return Vec::new();
        }
        let threshold = self.config.min_vote_frac * max_val;

        let mut peaks = Vec::new();
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let v = accumulator.get_pixel(x, y)[0];
                if v < threshold {
                    continue;
                }
                let is_max = (-1i32..=1).all(|dy| {
                    (-1i32..=1).all(|dx| {
                        let n = accumulator.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0];
                        (dx == 0 && dy == 0) || n < v || (n == v && (dy, dx) > (0, 0))
                    })
                });
                if is_max {
                    peaks.push((x, y, v));
                }
            }
        }
        peaks.sort_by(|a, b| b.2.total_cmp(&a.2));
        peaks
    }

    /// Sub-pixel center from the 3x3 neighbourhood centroid
    fn refine(accumulator: &ImageBuffer<Luma<f32>, Vec<f32>>, x: u32, y: u32) -> (f32, f32) {
        let (mut sx, mut sy, mut sw) = (0.0f32, 0.0f32, 0.0f32);
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                let v = accumulator.get_pixel(nx, ny)[0];
                sx += v * nx as f32;
                sy += v * ny as f32;
                sw += v;
            }
        }
        if sw > 0.0 {
            (sx / sw, sy / sw)
        } else {
            (x as f32, y as f32)
        }
    }

    /// Radius with the most edge pixels at that distance, and its circumference support
    fn radius(&self, edges: &[EdgePixel], cx: f32, cy: f32) -> Option<(f32, f32)> {
        let r_min = self.config.min_radius.floor() as usize;
        let r_max = self.config.max_radius.ceil() as usize;
        let mut histogram = vec![0u32; r_max + 2];
        for edge in edges {
            let d = (edge.x - cx).hypot(edge.y - cy).round() as usize;
            if d >= r_min && d <= r_max {
                histogram[d] += 1;
            }
        }

        // An edge ring is a couple of pixels thick; score radius r by bins r-1..=r+1
        let (best, count) = (r_min..=r_max)
            .map(|r| {
                let lo = r.saturating_sub(1);
                (r, histogram[lo..=r + 1].iter().sum::<u32>())
            })
            .max_by_key(|&(_, count)| count)?;
        if count == 0 {
            return None;
        }
        let circumference = 2.0 * std::f32::consts::PI * best as f32;
        // Sobel marks about two pixels across a step edge
        let support = (count as f32 / (2.0 * circumference)).min(1.0);
        Some((best as f32, support))
    }
}

impl CircleDetector for HoughCircleDetector {
    fn detect(&self, image: &GrayImage) -> CircleCandidates {
        let mut circles = CircleCandidates::new();
        let (w, h) = image.dimensions();
        if w < 3 || h < 3 {
            return circles;
        }

        let edges = self.edges(image);
        if edges.is_empty() {
            return circles;
        }
        let accumulator = self.accumulate(&edges, w, h);

        for (px, py, votes) in self.peaks(&accumulator) {
            let (x, y) = Self::refine(&accumulator, px, py);
            if circles.iter().any(|c| (c.x - x).hypot(c.y - y) < self.config.min_center_distance) {
                continue;
            }
            let Some((radius, support)) = self.radius(&edges, x, y) else {
                continue;
            };
            if circles
                .try_push(Circle {
                    x,
                    y,
                    radius,
                    support,
                    votes,
                })
                .is_err()
            {
                break;
            }
        }
        circles
    }
}
