//! Evaluation results and their JSON persistence.
//!
//! A run never stops at a group-local failure; the failed group is stored as
//! [`MetricOutcome::Unavailable`] with the reason, next to every metric that
//! did succeed.

use crate::core::{ClassLabel, LayerIndex, MetricResult};
use crate::prdc::PrdcScores;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A metric value, or the reason it could not be computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricOutcome<T> {
    Available { value: T },
    Unavailable { reason: String },
}

impl<T> MetricOutcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            MetricOutcome::Available { value } => Some(value),
            MetricOutcome::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, MetricOutcome::Available { .. })
    }
}

/// PRDC result for one class of one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    /// `None` when the whole set was compared at once.
    pub class: ClassLabel,
    pub prdc: MetricOutcome<PrdcScores>,
}

/// Everything computed for one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerReport {
    pub layer: LayerIndex,
    pub fake_samples: usize,
    pub fid: MetricOutcome<f64>,
    pub classes: Vec<ClassReport>,
    /// Mean over the available class results.
    pub prdc: MetricOutcome<PrdcScores>,
}

/// Results of a complete evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Neighbour count used for PRDC.
    pub k: usize,
    pub real_samples: usize,
    pub layers: Vec<LayerReport>,
}

impl EvaluationReport {
    pub fn layer(&self, layer: LayerIndex) -> Option<&LayerReport> {
        self.layers.iter().find(|l| l.layer == layer)
    }

    /// Number of metrics (FID, per-class PRDC, aggregate PRDC) marked unavailable.
    pub fn unavailable_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| {
                usize::from(!l.fid.is_available())
                    + usize::from(!l.prdc.is_available())
                    + l.classes.iter().filter(|c| !c.prdc.is_available()).count()
            })
            .sum()
    }
}

/// Save a report as pretty-printed JSON, creating parent directories.
///
/// # Errors
///
/// Returns an error if the report cannot be serialized or the file cannot be written.
pub fn save_report(report: &EvaluationReport, path: &Path) -> MetricResult<()> {
    let json = serde_json::to_string_pretty(report)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, json)?;
    Ok(())
}

/// Load a report written by [`save_report`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_report(path: &Path) -> MetricResult<EvaluationReport> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
