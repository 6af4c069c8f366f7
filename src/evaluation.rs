//! Evaluation driver: FID and per-class PRDC for every generated layer.
//!
//! The reference set is embedded once per run and every fake layer once per
//! layer. Class subsets are row selections of those embeddings, so no dataset
//! is scanned twice.
//!
//! Group-local failures (too few samples, unstable Fréchet distance, empty
//! aggregate) become [`MetricOutcome::Unavailable`] markers; shape errors
//! abort the run.

use crate::core::{
    ClassLabel, EmbeddingExtractor, LayerIndex, MetricError, MetricResult, Role,
};
use crate::data::Dataset;
use crate::embed::{BatchEmbedder, LabeledEmbeddings, Progress};
use crate::fid::FidEngine;
use crate::prdc::PrdcEngine;
use crate::report::{ClassReport, EvaluationReport, LayerReport, MetricOutcome};
use crate::Config;
use std::sync::Arc;
use tracing::{info, warn};

/// Turn a metric result into an outcome, keeping only fatal errors as `Err`.
fn outcome<T>(
    result: MetricResult<T>,
    layer: LayerIndex,
    metric: &str,
) -> MetricResult<MetricOutcome<T>> {
    match result {
        Ok(value) => Ok(MetricOutcome::Available { value }),
        Err(e) if e.is_group_local() => {
            warn!(layer, metric, error = %e, "metric unavailable");
            Ok(MetricOutcome::Unavailable {
                reason: e.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

/// One evaluation run. Construct a fresh evaluator for every run.
#[derive(Debug)]
pub struct Evaluator {
    config: Config,
    embedder: BatchEmbedder,
    fid: FidEngine,
    prdc: PrdcEngine,
    real: Option<LabeledEmbeddings>,
    /// Layers whose fake set has already been consumed
    evaluated: Vec<bool>,
    layers: Vec<LayerReport>,
}

impl Evaluator {
    /// Create an evaluator tracking `layer_num` generated layers.
    ///
    /// # Errors
    /// - `InvalidConfig` / `ShapeMismatch` from [`BatchEmbedder::new`]
    pub fn new(
        layer_num: usize,
        extractor: Arc<dyn EmbeddingExtractor>,
        config: Config,
    ) -> MetricResult<Self> {
        let embedder = BatchEmbedder::new(extractor, &config)?;
        Ok(Self {
            fid: FidEngine::new(layer_num, config.frechet),
            prdc: PrdcEngine::new(layer_num, config.k),
            config,
            embedder,
            real: None,
            evaluated: vec![false; layer_num],
            layers: Vec::with_capacity(layer_num),
        })
    }

    /// Replace the fake-side transform built from the configuration.
    #[must_use]
    pub fn with_transform(
        mut self,
        transform: Option<Box<dyn crate::data::ImageTransform>>,
    ) -> Self {
        self.embedder = self.embedder.with_transform(transform);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fid_engine(&self) -> &FidEngine {
        &self.fid
    }

    pub fn prdc_engine(&self) -> &PrdcEngine {
        &self.prdc
    }

    /// Embed the reference set. Allowed once per run.
    ///
    /// # Errors
    /// - `InvalidConfig` if the reference set was already embedded
    /// - `ShapeMismatch` from the extractor
    pub fn set_real<D: Dataset + ?Sized>(
        &mut self,
        dataset: &D,
        progress: &mut dyn Progress,
    ) -> MetricResult<()> {
        if self.real.is_some() {
            return Err(MetricError::InvalidConfig(
                "reference set already embedded for this run".to_string(),
            ));
        }
        let real = self.embedder.embed_labeled(dataset, Role::Real, progress)?;
        self.fid.push_real(real.embeddings.clone())?;
        info!(samples = real.len(), "embedded reference set");
        self.real = Some(real);
        Ok(())
    }

    /// Compute FID and PRDC for one generated layer.
    ///
    /// `classes` lists the target classes to compare one by one; an empty list
    /// compares the full sets once.
    ///
    /// # Errors
    /// - `InvalidConfig` if [`Evaluator::set_real`] was not called
    /// - `LayerFinalized` if `layer` was already evaluated in this run, even
    ///   when its metrics came out unavailable
    /// - `ShapeMismatch`, `UnknownLayer`: fatal for the run
    pub fn evaluate_layer<D: Dataset + ?Sized>(
        &mut self,
        layer: LayerIndex,
        fake: &D,
        classes: &[usize],
        progress: &mut dyn Progress,
    ) -> MetricResult<LayerReport> {
        let real = self.real.as_ref().ok_or_else(|| {
            MetricError::InvalidConfig("reference set must be embedded first".to_string())
        })?;
        match self.evaluated.get(layer) {
            None => {
                return Err(MetricError::UnknownLayer {
                    layer,
                    layer_num: self.evaluated.len(),
                })
            }
            Some(true) => return Err(MetricError::LayerFinalized(layer)),
            Some(false) => {}
        }

        let fake = self.embedder.embed_labeled(fake, Role::Fake, progress)?;
        self.fid.push_fake(layer, fake.embeddings.clone())?;
        self.evaluated[layer] = true;
        let fid = outcome(self.fid.compute_fid(layer), layer, "fid")?;

        let groups: Vec<ClassLabel> = if classes.is_empty() {
            vec![None]
        } else {
            classes.iter().map(|&c| Some(c)).collect()
        };

        let mut class_reports = Vec::with_capacity(groups.len());
        for class in groups {
            let real_class = real.select(class);
            let fake_class = fake.select(class);
            let result = self.prdc.compute_metric(
                layer,
                class,
                None,
                real_class.view(),
                fake_class.view(),
            );
            class_reports.push(ClassReport {
                class,
                prdc: outcome(result, layer, "prdc")?,
            });
            progress.step(&format!("PRDC computation of {class:?}"));
        }

        let prdc = outcome(self.prdc.aggregate(layer), layer, "prdc aggregate")?;

        info!(
            layer,
            fid = ?fid.value(),
            prdc = ?prdc.value(),
            "layer evaluated"
        );

        let report = LayerReport {
            layer,
            fake_samples: fake.len(),
            fid,
            classes: class_reports,
            prdc,
        };
        self.layers.push(report.clone());
        Ok(report)
    }

    /// Close the run and collect every evaluated layer.
    pub fn into_report(self) -> EvaluationReport {
        EvaluationReport {
            k: self.config.k,
            real_samples: self.real.as_ref().map_or(0, LabeledEmbeddings::len),
            layers: self.layers,
        }
    }
}

/// Evaluate every generated layer against one reference set.
///
/// `fakes[l]` holds the samples of layer `l`.
pub fn evaluate(
    extractor: Arc<dyn EmbeddingExtractor>,
    config: Config,
    real: &dyn Dataset,
    fakes: &[&dyn Dataset],
    classes: &[usize],
    progress: &mut dyn Progress,
) -> MetricResult<EvaluationReport> {
    let mut evaluator = Evaluator::new(fakes.len(), extractor, config)?;
    evaluator.set_real(real, progress)?;
    for (layer, fake) in fakes.iter().enumerate() {
        evaluator.evaluate_layer(layer, *fake, classes, progress)?;
    }
    Ok(evaluator.into_report())
}
