//! Class activation map methods.
//!
//! Every method reduces to the same two steps on host arrays:
//! weight the activations `(N, C, h, w)` channel-wise or element-wise, then
//! collapse the channels either by summing or by projecting onto the first
//! principal component. The collapsed map is rectified and min-max scaled
//! to `[0, 1]`.

use std::fmt;
use std::str::FromStr;

use ndarray::{s, Array2, Array4, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};

const EPS: f32 = 1e-7;

/// Attribution method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CamMethod {
    /// Activations weighted by spatially averaged gradients.
    #[default]
    GradCam,
    /// Element-wise gradient × activation.
    HiResCam,
    /// Grad-CAM++ weights from second and third order gradient terms.
    #[serde(rename = "gradcam++")]
    GradCamPlusPlus,
    /// Gradients normalized by the activation mass.
    XGradCam,
    /// Element-wise positive gradient × activation.
    LayerCam,
    /// First principal component of gradient × activation.
    EigenGradCam,
    /// Score drop when each channel is zeroed.
    AblationCam,
    /// Score of the input masked by each upsampled channel.
    ScoreCam,
    /// First principal component of the activations.
    EigenCam,
}

impl CamMethod {
    /// Every method, in declaration order.
    pub const ALL: [CamMethod; 9] = [
        Self::GradCam,
        Self::HiResCam,
        Self::GradCamPlusPlus,
        Self::XGradCam,
        Self::LayerCam,
        Self::EigenGradCam,
        Self::AblationCam,
        Self::ScoreCam,
        Self::EigenCam,
    ];

    /// Short lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GradCam => "gradcam",
            Self::HiResCam => "hirescam",
            Self::GradCamPlusPlus => "gradcam++",
            Self::XGradCam => "xgradcam",
            Self::LayerCam => "layercam",
            Self::EigenGradCam => "eigengradcam",
            Self::AblationCam => "ablationcam",
            Self::ScoreCam => "scorecam",
            Self::EigenCam => "eigencam",
        }
    }

    /// Whether the method differentiates the target score.
    pub fn requires_gradients(&self) -> bool {
        matches!(
            self,
            Self::GradCam
                | Self::HiResCam
                | Self::GradCamPlusPlus
                | Self::XGradCam
                | Self::LayerCam
                | Self::EigenGradCam
        )
    }

    /// Whether the channels are always collapsed by projection.
    pub fn projects(&self) -> bool {
        matches!(self, Self::EigenGradCam | Self::EigenCam)
    }
}

impl fmt::Display for CamMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CamMethod {
    type Err = ExplainError;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        let key = key.replace("plusplus", "++");
        Self::ALL
            .into_iter()
            .find(|m| m.name() == key)
            .ok_or_else(|| {
                ExplainError::InvalidOption(format!(
                    "unknown CAM method '{}', expected one of: {}",
                    s,
                    Self::ALL.map(|m| m.name()).join(", ")
                ))
            })
    }
}

/// Weighted activations of a gradient method.
///
/// `activations` and `gradients` are `(N, C, h, w)`.
///
/// # Errors
///
/// Returns [`ExplainError::InvalidOption`] for a gradient-free method and
/// [`ExplainError::TensorData`] when the two arrays disagree in shape.
pub fn gradient_weighted(
    method: CamMethod,
    activations: &Array4<f32>,
    gradients: &Array4<f32>,
) -> Result<Array4<f32>> {
    if activations.shape() != gradients.shape() {
        return Err(ExplainError::TensorData(format!(
            "activation shape {:?} does not match gradient shape {:?}",
            activations.shape(),
            gradients.shape()
        )));
    }
    let weighted = match method {
        CamMethod::GradCam => {
            let weights = spatial_mean(gradients);
            apply_channel_weights(activations, &weights)
        }
        CamMethod::HiResCam | CamMethod::EigenGradCam => activations * gradients,
        CamMethod::GradCamPlusPlus => {
            let weights = grad_cam_plus_plus_weights(activations, gradients);
            apply_channel_weights(activations, &weights)
        }
        CamMethod::XGradCam => {
            let mass = spatial_sum(activations);
            let mut weights = spatial_sum(&(activations * gradients));
            Zip::from(&mut weights).and(&mass).for_each(|w, &m| *w /= m + EPS);
            apply_channel_weights(activations, &weights)
        }
        CamMethod::LayerCam => gradients.mapv(|g| g.max(0.0)) * activations,
        other => {
            return Err(ExplainError::InvalidOption(format!(
                "{} does not use gradients",
                other
            )))
        }
    };
    Ok(weighted)
}

fn grad_cam_plus_plus_weights(activations: &Array4<f32>, gradients: &Array4<f32>) -> Array2<f32> {
    let mass = spatial_sum(activations);
    let (n, c, _, _) = activations.dim();
    let mut weights = Array2::<f32>::zeros((n, c));
    for ((i, j), w) in weights.indexed_iter_mut() {
        let sum_a = mass[[i, j]];
        *w = gradients
            .slice(s![i, j, .., ..])
            .iter()
            .map(|&g| {
                if g == 0.0 {
                    return 0.0;
                }
                let g2 = g * g;
                let alpha = g2 / (2.0 * g2 + sum_a * g2 * g + EPS);
                alpha * g.max(0.0)
            })
            .sum();
    }
    weights
}

/// Multiply each `(sample, channel)` plane by its weight.
pub fn apply_channel_weights(activations: &Array4<f32>, weights: &Array2<f32>) -> Array4<f32> {
    let mut out = activations.clone();
    for ((i, j), &w) in weights.indexed_iter() {
        out.slice_mut(s![i, j, .., ..]).mapv_inplace(|a| a * w);
    }
    out
}

/// Per `(sample, channel)` sum over the spatial axes.
pub fn spatial_sum(values: &Array4<f32>) -> Array2<f32> {
    values.sum_axis(Axis(3)).sum_axis(Axis(2))
}

/// Per `(sample, channel)` mean over the spatial axes.
pub fn spatial_mean(values: &Array4<f32>) -> Array2<f32> {
    let (_, _, h, w) = values.dim();
    let area = (h * w).max(1) as f32;
    spatial_sum(values).mapv(|v| v / area)
}

/// Collapse weighted activations into one `[0, 1]` map per sample.
///
/// Channels are summed, or projected onto their first principal component
/// when `project` is set.
pub fn reduce_maps(weighted: &Array4<f32>, project: bool) -> Vec<Array2<f32>> {
    weighted
        .outer_iter()
        .map(|sample| {
            let map = if project {
                project_first_component(sample)
            } else {
                sample.sum_axis(Axis(0))
            };
            scale_to_unit(map)
        })
        .collect()
}

/// Rectify a map and min-max scale it into `[0, 1]`.
///
/// Non-finite entries count as 0. A constant map becomes all zeros.
pub fn scale_to_unit(map: Array2<f32>) -> Array2<f32> {
    let mut map = map.mapv(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
    let min = map.iter().copied().fold(f32::INFINITY, f32::min);
    map.mapv_inplace(|v| v - min);
    let max = map.iter().copied().fold(0.0f32, f32::max);
    map.mapv_inplace(|v| (v / (max + EPS)).clamp(0.0, 1.0));
    map
}

/// Project a `(C, h, w)` activation volume onto its first principal component.
///
/// Spatial positions are the observations and channels the features; the
/// observations are centered before the projection. The sign of the
/// component is fixed so that its largest-magnitude projection is positive.
pub fn project_first_component(volume: ArrayView3<f32>) -> Array2<f32> {
    let (c, h, w) = volume.dim();
    let mut x = Array2::<f64>::zeros((h * w, c));
    for ((ch, row, col), &v) in volume.indexed_iter() {
        x[[row * w + col, ch]] = if v.is_finite() { f64::from(v) } else { 0.0 };
    }
    if let Some(mean) = x.mean_axis(Axis(0)) {
        x -= &mean;
    }

    let projection = match principal_axis(&x.t().dot(&x)) {
        Some(axis) => x.dot(&axis),
        None => return Array2::zeros((h, w)),
    };

    let pivot = projection
        .iter()
        .copied()
        .fold(0.0f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
    let sign = if pivot < 0.0 { -1.0 } else { 1.0 };

    Array2::from_shape_fn((h, w), |(row, col)| (sign * projection[row * w + col]) as f32)
}

/// Dominant eigenvector of a symmetric positive semi-definite matrix.
fn principal_axis(cov: &Array2<f64>) -> Option<ndarray::Array1<f64>> {
    const MAX_ITERS: usize = 500;
    const TOL: f64 = 1e-10;

    let n = cov.nrows();
    let start = (0..n).max_by(|&a, &b| cov[[a, a]].total_cmp(&cov[[b, b]]))?;
    if cov[[start, start]] <= 0.0 {
        return None;
    }

    let mut v = cov.column(start).to_owned();
    let mut norm = v.dot(&v).sqrt();
    if norm == 0.0 {
        return None;
    }
    v /= norm;

    for _ in 0..MAX_ITERS {
        let mut next = cov.dot(&v);
        norm = next.dot(&next).sqrt();
        if norm == 0.0 {
            return None;
        }
        next /= norm;
        let delta = (&next - &v).mapv(f64::abs).sum();
        v = next;
        if delta < TOL {
            break;
        }
    }
    Some(v)
}
