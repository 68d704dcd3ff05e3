//! Inference results aligned with the input dataset.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{concatenate, ArrayD, ArrayViewD, Axis};
use pots_data::PotsDataLoader;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::model::Trainable;

/// Key of an inference result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKey {
    /// Imputed series, `(N, T, F)`.
    Imputation,
    /// Class probabilities, `(N, C)`.
    Classification,
    /// Cluster assignments, `(N,)`.
    Clustering,
    /// Forecast horizon, `(N, H, F)`.
    Forecasting,
}

impl ResultKey {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKey::Imputation => "imputation",
            ResultKey::Classification => "classification",
            ResultKey::Clustering => "clustering",
            ResultKey::Forecasting => "forecasting",
        }
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model output for one batch. The first axis follows batch order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    /// What the values are.
    pub key: ResultKey,
    /// Values, first axis aligned with the batch.
    pub values: ArrayD<f32>,
}

impl BatchOutput {
    /// Create a batch output.
    pub fn new(key: ResultKey, values: ArrayD<f32>) -> Self {
        Self { key, values }
    }
}

/// Inference results, each aligned index-for-index with the input dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceResult {
    results: BTreeMap<ResultKey, ArrayD<f32>>,
}

impl InferenceResult {
    /// Look up a result.
    #[must_use]
    pub fn get(&self, key: ResultKey) -> Option<&ArrayD<f32>> {
        self.results.get(&key)
    }

    /// Remove and return a result.
    pub fn take(&mut self, key: ResultKey) -> Option<ArrayD<f32>> {
        self.results.remove(&key)
    }

    /// Keys present.
    pub fn keys(&self) -> impl Iterator<Item = ResultKey> + '_ {
        self.results.keys().copied()
    }

    /// Consume into the underlying map.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<ResultKey, ArrayD<f32>> {
        self.results
    }
}

/// Runs a frozen model over an order-preserving loader.
pub struct Predictor<'a, M: Trainable> {
    model: &'a mut M,
}

impl<'a, M: Trainable> Predictor<'a, M> {
    /// Wrap a model.
    pub fn new(model: &'a mut M) -> Self {
        Self { model }
    }

    /// Predict every sample of `loader`.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::ConfigurationError`] if the loader shuffles or
    /// drops samples, and propagates data and model errors.
    pub fn predict(&mut self, loader: &PotsDataLoader) -> Result<InferenceResult> {
        if loader.shuffles() || loader.drops_last() {
            return Err(TrainError::ConfigurationError(format!(
                "prediction needs an order-preserving loader over every sample (stage {})",
                loader.stage()
            )));
        }

        let mut parts: BTreeMap<ResultKey, Vec<ArrayD<f32>>> = BTreeMap::new();
        let mut seen = 0usize;
        for batch in loader.iter() {
            let batch = batch?;
            let output = self.model.predict_batch(&batch)?;
            if output.values.shape().first() != Some(&batch.len()) {
                return Err(TrainError::ModelError(format!(
                    "{} output has {:?} rows for a batch of {}",
                    output.key,
                    output.values.shape().first(),
                    batch.len()
                )));
            }
            seen += batch.len();
            parts.entry(output.key).or_default().push(output.values);
        }
        if seen != loader.len() {
            return Err(TrainError::ConfigurationError(format!(
                "loader yielded {seen} of {} samples",
                loader.len()
            )));
        }

        let mut results = BTreeMap::new();
        for (key, arrays) in parts {
            let views: Vec<ArrayViewD<'_, f32>> = arrays.iter().map(|a| a.view()).collect();
            let joined = concatenate(Axis(0), &views)
                .map_err(|e| TrainError::ModelError(format!("cannot join {key} outputs: {e}")))?;
            results.insert(key, joined);
        }
        tracing::debug!(samples = seen, "prediction finished");
        Ok(InferenceResult { results })
    }
}
