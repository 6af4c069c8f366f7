//! Image transforms applied to generated samples before embedding.
//!
//! Generated images are center-cropped and resized to the extractor's input
//! resolution; reference images never pass through here.
//!
//! Transforms can also be built by name from [`TransformSpec`] entries:
//!
//! | name         | transform      |
//! |--------------|----------------|
//! | `CenterCrop` | [`CenterCrop`] |
//! | `Resize`     | [`Resize`]     |

use crate::core::{ImageBatch, MetricError, MetricResult};
use ndarray::Axis;
use serde::{Deserialize, Serialize};

/// Target size: one integer for a square, or an explicit `[height, width]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageSize {
    Square(usize),
    Exact(usize, usize),
}

impl ImageSize {
    /// `(height, width)`.
    pub fn hw(self) -> (usize, usize) {
        match self {
            ImageSize::Square(s) => (s, s),
            ImageSize::Exact(h, w) => (h, w),
        }
    }
}

/// Batch-level image transform.
pub trait ImageTransform: Send + Sync {
    /// Transform a `(n, h, w, c)` batch.
    fn apply(&self, images: &ImageBatch) -> MetricResult<ImageBatch>;

    /// Name for debugging
    fn name(&self) -> &'static str;
}

/// Crop the central region of every image.
///
/// Offsets are `round((h - th) / 2)` and `round((w - tw) / 2)` with ties to
/// even. A crop larger than the image pads the missing border with zeros.
#[derive(Debug, Clone, Copy)]
pub struct CenterCrop {
    pub size: ImageSize,
}

impl ImageTransform for CenterCrop {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn apply(&self, images: &ImageBatch) -> MetricResult<ImageBatch> {
        let (n, h, w, c) = images.dim();
        let (th, tw) = self.size.hw();
        if th == 0 || tw == 0 {
            return Err(MetricError::InvalidConfig(
                "center crop size must be positive".to_string(),
            ));
        }

        let top = ((h as f64 - th as f64) / 2.0).round_ties_even() as isize;
        let left = ((w as f64 - tw as f64) / 2.0).round_ties_even() as isize;

        let mut out = ImageBatch::zeros((n, th, tw, c));
        for y in 0..th {
            let sy = y as isize + top;
            if sy < 0 || sy >= h as isize {
                continue;
            }
            for x in 0..tw {
                let sx = x as isize + left;
                if sx < 0 || sx >= w as isize {
                    continue;
                }
                for i in 0..n {
                    for ch in 0..c {
                        out[[i, y, x, ch]] = images[[i, sy as usize, sx as usize, ch]];
                    }
                }
            }
        }

        Ok(out)
    }

    fn name(&self) -> &'static str {
        "CenterCrop"
    }
}

/// Bilinear resize with half-pixel centers (no corner alignment).
///
/// Source coordinate for output pixel `d` is `(d + 0.5) * (in / out) - 0.5`,
/// clamped at zero.
#[derive(Debug, Clone, Copy)]
pub struct Resize {
    pub size: ImageSize,
}

/// Interpolation taps along one axis: `(lower, upper, upper_weight)`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn bilinear_taps(input: usize, output: usize) -> Vec<(usize, usize, f32)> {
    let scale = input as f64 / output as f64;
    (0..output)
        .map(|d| {
            let src = ((d as f64 + 0.5) * scale - 0.5).max(0.0);
            let lo = (src.floor() as usize).min(input - 1);
            let hi = (lo + 1).min(input - 1);
            (lo, hi, (src - lo as f64) as f32)
        })
        .collect()
}

impl ImageTransform for Resize {
    fn apply(&self, images: &ImageBatch) -> MetricResult<ImageBatch> {
        let (n, h, w, c) = images.dim();
        let (th, tw) = self.size.hw();
        if th == 0 || tw == 0 {
            return Err(MetricError::InvalidConfig(
                "resize target must be positive".to_string(),
            ));
        }
        if h == 0 || w == 0 {
            return Err(MetricError::ShapeMismatch(format!(
                "cannot resize empty {h}x{w} images"
            )));
        }
        if (h, w) == (th, tw) {
            return Ok(images.clone());
        }

        let rows = bilinear_taps(h, th);
        let cols = bilinear_taps(w, tw);
        let mut out = ImageBatch::zeros((n, th, tw, c));

        for (i, image) in images.axis_iter(Axis(0)).enumerate() {
            for (y, &(y0, y1, wy)) in rows.iter().enumerate() {
                for (x, &(x0, x1, wx)) in cols.iter().enumerate() {
                    for ch in 0..c {
                        let top = image[[y0, x0, ch]] * (1.0 - wx) + image[[y0, x1, ch]] * wx;
                        let bottom = image[[y1, x0, ch]] * (1.0 - wx) + image[[y1, x1, ch]] * wx;
                        out[[i, y, x, ch]] = top * (1.0 - wy) + bottom * wy;
                    }
                }
            }
        }

        Ok(out)
    }

    fn name(&self) -> &'static str {
        "Resize"
    }
}

/// Apply transforms in sequence.
pub struct Compose {
    steps: Vec<Box<dyn ImageTransform>>,
}

impl Compose {
    pub fn new(steps: Vec<Box<dyn ImageTransform>>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the steps, in application order.
    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl ImageTransform for Compose {
    fn apply(&self, images: &ImageBatch) -> MetricResult<ImageBatch> {
        let mut current = images.clone();
        for step in &self.steps {
            current = step.apply(&current)?;
        }
        Ok(current)
    }

    fn name(&self) -> &'static str {
        "Compose"
    }
}

/// Optional center crop followed by optional resize.
///
/// Returns `None` when neither step is requested.
pub fn crop_and_resize(
    crop_size: Option<ImageSize>,
    resize: Option<ImageSize>,
) -> Option<Compose> {
    let mut steps: Vec<Box<dyn ImageTransform>> = Vec::new();
    if let Some(size) = crop_size {
        steps.push(Box::new(CenterCrop { size }));
    }
    if let Some(size) = resize {
        steps.push(Box::new(Resize { size }));
    }
    if steps.is_empty() {
        None
    } else {
        Some(Compose::new(steps))
    }
}

/// Named transform entry, e.g. `{"name": "CenterCrop", "size": 800}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformSpec {
    pub name: String,
    pub size: ImageSize,
}

/// Construct a transform from its registered name.
///
/// # Errors
/// - `UnknownType` if no transform is registered under `spec.name`
pub fn transform_from_spec(spec: &TransformSpec) -> MetricResult<Box<dyn ImageTransform>> {
    match spec.name.as_str() {
        "CenterCrop" => Ok(Box::new(CenterCrop { size: spec.size })),
        "Resize" => Ok(Box::new(Resize { size: spec.size })),
        other => Err(MetricError::UnknownType(format!(
            "{other} is not a registered transform"
        ))),
    }
}

/// Build a [`Compose`] from a list of specs, validating every name up front.
///
/// Returns `None` for an empty list.
pub fn compose_from_specs(specs: &[TransformSpec]) -> MetricResult<Option<Compose>> {
    let steps = specs
        .iter()
        .map(transform_from_spec)
        .collect::<MetricResult<Vec<_>>>()?;
    if steps.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Compose::new(steps)))
    }
}
