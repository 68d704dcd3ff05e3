//! Per-stream optimizers, replicated steps, snapshots and persistence.

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsAccumulator, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use pots_compute::{DeviceDispatcher, DevicePlan};
use pots_data::SampleBatch;

use super::module::{scalar, PotsInference, PotsModule};
use crate::config::TrainerConfig;
use crate::error::{Result, TrainError};
use crate::model::{LossStream, Trainable};
use crate::predict::BatchOutput;

/// Adam configured from the trainer settings.
pub fn adam_config(config: &TrainerConfig) -> AdamConfig {
    AdamConfig::new().with_weight_decay(config.weight_decay.map(WeightDecayConfig::new))
}

/// The optimizer attached to one loss stream.
pub struct StreamOptimizer<O> {
    stream: LossStream,
    // Only `None` while a record is being loaded.
    optimizer: Option<O>,
}

impl<O> StreamOptimizer<O> {
    /// Attach `optimizer` to `stream`.
    pub fn new(stream: LossStream, optimizer: O) -> Self {
        Self {
            stream,
            optimizer: Some(optimizer),
        }
    }

    /// The stream this optimizer steps.
    pub fn stream(&self) -> &LossStream {
        &self.stream
    }

    fn get_mut(&mut self) -> Result<&mut O> {
        self.optimizer.as_mut().ok_or_else(|| {
            TrainError::ModelError(format!("optimizer of stream '{}' is missing", self.stream.name))
        })
    }
}

/// Model and optimizer state captured at an improving epoch.
#[derive(Clone, Debug)]
pub struct BurnSnapshot<M> {
    module: M,
    optimizers: Vec<Vec<u8>>,
}

impl<M> BurnSnapshot<M> {
    /// The captured module.
    pub fn module(&self) -> &M {
        &self.module
    }
}

/// Trains a burn module through the [`Trainable`] contract.
///
/// With a replicated [`DevicePlan`] each batch is split into balanced
/// shards, one per device. Every replica computes its shard's loss scaled
/// by the shard's share of the batch, the gradients are moved to the
/// primary device and summed, and only then does the optimizer step.
///
/// # Example
///
/// ```rust,ignore
/// use pots_compute::{DeviceCatalog, DeviceDispatcher};
/// use pots_train::{adapter::BurnTrainer, Estimator, TrainerConfig};
///
/// let dispatcher = DeviceDispatcher::new(DeviceCatalog::ndarray());
/// let trainer = BurnTrainer::from_config(model, &dispatcher, &config)?;
/// let mut estimator = Estimator::new(trainer, config)?;
/// estimator.fit(train_set, Some(val_set))?;
/// ```
pub struct BurnTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: PotsModule<B>,
{
    model: M,
    plan: DevicePlan<B::Device>,
    optimizers: Vec<StreamOptimizer<O>>,
    lr: f64,
    frozen: bool,
    inner: Option<M::InnerModule>,
}

impl<B, M, O> BurnTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: PotsModule<B>,
{
    /// The module being trained.
    pub fn module(&self) -> &M {
        &self.model
    }

    /// The device plan.
    pub fn plan(&self) -> &DevicePlan<B::Device> {
        &self.plan
    }

    /// Whether gradient tracking was disabled.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

impl<B, M> BurnTrainer<B, M, ()>
where
    B: AutodiffBackend,
    M: PotsModule<B>,
    M::InnerModule: PotsInference<B::InnerBackend>,
{
    /// Resolve `config.device` and attach one Adam optimizer per stream.
    ///
    /// # Errors
    ///
    /// Returns the dispatcher's error for an unavailable device.
    pub fn from_config(
        model: M,
        dispatcher: &DeviceDispatcher<B::Device>,
        config: &TrainerConfig,
    ) -> Result<BurnTrainer<B, M, impl Optimizer<M, B>>> {
        let plan = dispatcher.resolve(&config.device)?;
        let adam = adam_config(config);
        Ok(BurnTrainer::new(model, plan, config.lr, |_| adam.init::<B, M>()))
    }
}

impl<B, M, O> BurnTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: PotsModule<B>,
    M::InnerModule: PotsInference<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    /// Place `model` on the plan's primary device and attach an optimizer to
    /// each of its streams.
    pub fn new<F>(model: M, plan: DevicePlan<B::Device>, lr: f64, mut make_optimizer: F) -> Self
    where
        F: FnMut(&LossStream) -> O,
    {
        let model = plan.place::<B, M>(model);
        let optimizers = model
            .streams()
            .into_iter()
            .map(|stream| {
                let optimizer = make_optimizer(&stream);
                StreamOptimizer::new(stream, optimizer)
            })
            .collect();
        Self {
            model,
            plan,
            optimizers,
            lr,
            frozen: false,
            inner: None,
        }
    }

    fn primary_device(&self) -> B::Device {
        self.plan.primary().device.clone()
    }

    fn inner_module(&mut self) -> &M::InnerModule {
        let model = &self.model;
        self.inner.get_or_insert_with(|| model.clone().valid())
    }

    /// Loss value and gradients of `stream` over `batch`.
    fn gradients(&self, batch: &SampleBatch, stream: &str) -> Result<(f32, GradientsParams)> {
        let kind = self.model.input_kind();
        if !self.plan.is_replicated() {
            let device = self.primary_device();
            let inputs = kind.assemble::<B>(batch, &device);
            let loss = self.model.stream_loss(inputs, stream)?;
            let value = scalar(&loss);
            return Ok((value, stream_gradients(&self.model, loss, stream)));
        }

        let n = batch.len();
        let shards = batch.shard(&self.plan.shard_sizes(n))?;
        let devices = self.plan.devices();
        let results: Vec<Result<(f32, GradientsParams)>> = std::thread::scope(|scope| {
            let handles: Vec<_> = shards
                .into_iter()
                .zip(devices)
                .map(|(shard, device)| {
                    let replica = self.model.clone().fork(&device);
                    scope.spawn(move || {
                        let share = shard.len() as f32 / n as f32;
                        let inputs = kind.assemble::<B>(&shard, &device);
                        let loss = replica.stream_loss(inputs, stream)?.mul_scalar(share);
                        let value = scalar(&loss);
                        Ok((value, stream_gradients(&replica, loss, stream)))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(TrainError::ModelError("a replica panicked".to_string()))
                    })
                })
                .collect()
        });

        let primary = self.primary_device();
        let mut accumulator = GradientsAccumulator::<M>::new();
        let mut total = 0.0;
        for result in results {
            let (value, grads) = result?;
            total += value;
            accumulator.accumulate(&self.model, grads.to_device(&primary, &self.model));
        }
        Ok((total, accumulator.grads()))
    }

    fn optimizer_bytes(&self) -> Result<Vec<Vec<u8>>> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        self.optimizers
            .iter()
            .map(|slot| {
                let optimizer = slot.optimizer.as_ref().ok_or_else(|| {
                    TrainError::ModelError(format!("optimizer of stream '{}' is missing", slot.stream.name))
                })?;
                Recorder::<B>::record(&recorder, optimizer.to_record(), ())
                    .map_err(|e| TrainError::CheckpointError(format!("optimizer state: {e}")))
            })
            .collect()
    }

    fn load_optimizer_bytes(&mut self, index: usize, bytes: Vec<u8>) -> Result<()> {
        let device = self.primary_device();
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let slot = &mut self.optimizers[index];
        let record = Recorder::<B>::load(&recorder, bytes, &device)
            .map_err(|e| TrainError::CheckpointError(format!("optimizer state: {e}")))?;
        let optimizer = slot.optimizer.take().ok_or_else(|| {
            TrainError::ModelError(format!("optimizer of stream '{}' is missing", slot.stream.name))
        })?;
        slot.optimizer = Some(optimizer.load_record(record));
        Ok(())
    }
}

fn stream_gradients<B, M>(module: &M, loss: Tensor<B, 1>, stream: &str) -> GradientsParams
where
    B: AutodiffBackend,
    M: PotsModule<B>,
{
    let mut grads = loss.backward();
    match module.stream_params(stream) {
        Some(params) => GradientsParams::from_params(&mut grads, module, &params),
        None => GradientsParams::from_grads(grads, module),
    }
}

fn optimizer_path(model_path: &Path, stream: &str) -> PathBuf {
    let stem = model_path.to_string_lossy();
    let stem = stem.strip_suffix(".mpk").unwrap_or(&stem);
    PathBuf::from(format!("{stem}.{stream}.optim"))
}

impl<B, M, O> Trainable for BurnTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: PotsModule<B>,
    M::InnerModule: PotsInference<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    type Snapshot = BurnSnapshot<M>;

    fn name(&self) -> &str {
        M::NAME
    }

    fn streams(&self) -> Vec<LossStream> {
        self.optimizers.iter().map(|o| o.stream.clone()).collect()
    }

    fn uses_labels(&self) -> bool {
        self.model.uses_labels()
    }

    fn train_step(&mut self, batch: &SampleBatch, stream: &LossStream) -> Result<f32> {
        if self.frozen {
            return Err(TrainError::ModelError(format!(
                "{} is frozen and cannot be trained further",
                M::NAME
            )));
        }
        let index = self
            .optimizers
            .iter()
            .position(|o| o.stream.name == stream.name)
            .ok_or_else(|| TrainError::ModelError(format!("unknown loss stream '{}'", stream.name)))?;

        let (value, grads) = self.gradients(batch, &stream.name)?;
        let lr = self.lr;
        let model = self.model.clone();
        self.model = self.optimizers[index].get_mut()?.step(lr, model, grads);
        self.inner = None;
        Ok(value)
    }

    fn validation_loss(&mut self, batch: &SampleBatch) -> Result<f32> {
        let device: <B::InnerBackend as Backend>::Device = self.primary_device().into();
        let kind = self.model.input_kind();
        let inner = self.inner_module();
        let loss = inner.validation_loss(kind.assemble(batch, &device))?;
        Ok(scalar(&loss))
    }

    fn predict_batch(&mut self, batch: &SampleBatch) -> Result<BatchOutput> {
        let device: <B::InnerBackend as Backend>::Device = self.primary_device().into();
        let kind = self.model.input_kind();
        let inner = self.inner_module();
        inner.infer(kind.assemble(batch, &device))?.into_batch_output()
    }

    fn snapshot(&self) -> Result<BurnSnapshot<M>> {
        Ok(BurnSnapshot {
            module: self.model.clone(),
            optimizers: self.optimizer_bytes()?,
        })
    }

    fn restore(&mut self, snapshot: &BurnSnapshot<M>) -> Result<()> {
        self.model = snapshot.module.clone();
        for (index, bytes) in snapshot.optimizers.iter().enumerate() {
            self.load_optimizer_bytes(index, bytes.clone())?;
        }
        self.inner = None;
        Ok(())
    }

    fn freeze(&mut self) {
        self.model = self.model.clone().no_grad();
        self.inner = Some(self.model.clone().valid());
        self.frozen = true;
    }

    fn persist(&self, snapshot: &BurnSnapshot<M>, stem: &Path) -> Result<PathBuf> {
        // The recorder replaces the extension, so pass one explicitly to keep
        // dots in the stem (e.g. a loss value) intact.
        let model_path = PathBuf::from(format!("{}.mpk", stem.display()));
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        Recorder::<B>::record(&recorder, snapshot.module.clone().into_record(), model_path.clone())
            .map_err(|e| TrainError::CheckpointError(format!("Failed to save model: {e}")))?;

        for (slot, bytes) in self.optimizers.iter().zip(&snapshot.optimizers) {
            std::fs::write(optimizer_path(&model_path, &slot.stream.name), bytes)?;
        }
        Ok(model_path)
    }

    fn load_persisted(&mut self, path: &Path) -> Result<()> {
        let device = self.primary_device();
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let record = Recorder::<B>::load(&recorder, path.to_path_buf(), &device)
            .map_err(|e| TrainError::CheckpointError(format!("Failed to load model: {e}")))?;
        self.model = self.model.clone().load_record(record);

        for index in 0..self.optimizers.len() {
            let optim_path = optimizer_path(path, &self.optimizers[index].stream.name);
            if optim_path.exists() {
                let bytes = std::fs::read(&optim_path)?;
                self.load_optimizer_bytes(index, bytes)?;
            } else {
                tracing::debug!(path = %optim_path.display(), "no optimizer state next to model");
            }
        }
        self.inner = None;
        Ok(())
    }
}
