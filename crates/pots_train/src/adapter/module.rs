//! Traits a burn module implements to be trained by [`super::BurnTrainer`].

use burn::module::{AutodiffModule, ParamId};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use ndarray::{ArrayD, IxDyn};

use super::inputs::{InputKind, ModelInputs};
use crate::error::{Result, TrainError};
use crate::model::LossStream;
use crate::predict::{BatchOutput, ResultKey};

/// Training-side contract of a burn model.
///
/// Multi-optimizer models (e.g. generator and discriminator) declare one
/// stream per optimizer and restrict each stream to its parameter group
/// with [`PotsModule::stream_params`].
pub trait PotsModule<B: AutodiffBackend>: AutodiffModule<B> {
    /// Class name used for checkpoint files.
    const NAME: &'static str;

    /// Input layout the model consumes.
    fn input_kind(&self) -> InputKind {
        InputKind::Bidirectional
    }

    /// Loss streams in stepping order.
    fn streams(&self) -> Vec<LossStream> {
        vec![LossStream::every_batch("loss")]
    }

    /// Whether training batches should carry labels.
    fn uses_labels(&self) -> bool {
        false
    }

    /// Parameters updated by `stream`. `None` updates every parameter.
    fn stream_params(&self, _stream: &str) -> Option<Vec<ParamId>> {
        None
    }

    /// Forward pass computing the scalar loss of `stream`.
    fn stream_loss(&self, inputs: ModelInputs<B>, stream: &str) -> Result<Tensor<B, 1>>;
}

/// Inference-side contract, implemented by the module on the inner backend.
pub trait PotsInference<B: Backend>: Module<B> {
    /// Scalar validation loss.
    fn validation_loss(&self, inputs: ModelInputs<B>) -> Result<Tensor<B, 1>>;

    /// Model output for a batch.
    fn infer(&self, inputs: ModelInputs<B>) -> Result<ModelOutput<B>>;
}

/// Output of [`PotsInference::infer`].
#[derive(Debug, Clone)]
pub enum ModelOutput<B: Backend> {
    /// Imputed series, `(B, T, F)`.
    Imputation(Tensor<B, 3>),
    /// Class probabilities, `(B, C)`.
    Classification(Tensor<B, 2>),
    /// Cluster assignments, `(B,)`.
    Clustering(Tensor<B, 1>),
    /// Forecasts, `(B, H, F)`.
    Forecasting(Tensor<B, 3>),
}

impl<B: Backend> ModelOutput<B> {
    /// Copy to host memory.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::ModelError`] if the tensor data cannot be read as `f32`.
    pub fn into_batch_output(self) -> Result<BatchOutput> {
        match self {
            ModelOutput::Imputation(t) => to_host(ResultKey::Imputation, t),
            ModelOutput::Classification(t) => to_host(ResultKey::Classification, t),
            ModelOutput::Clustering(t) => to_host(ResultKey::Clustering, t),
            ModelOutput::Forecasting(t) => to_host(ResultKey::Forecasting, t),
        }
    }
}

fn to_host<B: Backend, const D: usize>(key: ResultKey, tensor: Tensor<B, D>) -> Result<BatchOutput> {
    let dims = tensor.dims().to_vec();
    let values: Vec<f32> = tensor
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| TrainError::ModelError(format!("cannot read {key} output: {e:?}")))?;
    let values = ArrayD::from_shape_vec(IxDyn(&dims), values)
        .map_err(|e| TrainError::ModelError(format!("{key} output: {e}")))?;
    Ok(BatchOutput::new(key, values))
}

/// Scalar value of a one-element tensor.
pub(crate) fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f32 {
    tensor.clone().into_scalar().elem::<f32>()
}
