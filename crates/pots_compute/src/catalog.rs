//! Devices a backend can place a model on.

use crate::device::{DeviceId, DeviceKind};

/// The devices available to one burn backend, keyed by [`DeviceId`].
///
/// # Example
///
/// ```rust,ignore
/// use pots_compute::{DeviceCatalog, DeviceId};
///
/// let catalog = DeviceCatalog::ndarray();
/// assert!(catalog.get(&DeviceId::cpu()).is_some());
/// ```
#[derive(Debug, Clone)]
pub struct DeviceCatalog<D> {
    entries: Vec<(DeviceId, D)>,
}

impl<D> Default for DeviceCatalog<D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<D: Clone> DeviceCatalog<D> {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device. A second registration of the same id replaces the first.
    #[must_use]
    pub fn with(mut self, id: DeviceId, device: D) -> Self {
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.push((id, device));
        self
    }

    /// Look up a device.
    #[must_use]
    pub fn get(&self, id: &DeviceId) -> Option<&D> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, device)| device)
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    /// Check if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The device auto-selection picks: the highest-priority accelerator,
    /// else the CPU, else the first registered device.
    #[must_use]
    pub fn preferred(&self) -> Option<(DeviceId, D)> {
        let best_accel = self
            .entries
            .iter()
            .filter(|(id, _)| id.kind.is_accelerator())
            .max_by_key(|(id, _)| (id.kind.priority(), std::cmp::Reverse(id.index)));
        best_accel
            .or_else(|| self.entries.iter().find(|(id, _)| id.kind == DeviceKind::Cpu))
            .or_else(|| self.entries.first())
            .cloned()
    }
}

#[cfg(feature = "backend-ndarray")]
impl DeviceCatalog<burn_ndarray::NdArrayDevice> {
    /// Catalog of the ndarray backend: the CPU only.
    #[must_use]
    pub fn ndarray() -> Self {
        Self::new().with(DeviceId::cpu(), burn_ndarray::NdArrayDevice::Cpu)
    }
}

#[cfg(feature = "backend-wgpu")]
impl DeviceCatalog<burn_wgpu::WgpuDevice> {
    /// Catalog of the wgpu backend with `n_gpus` discrete adapters.
    ///
    /// Adapters are not enumerated here: wgpu only discovers them when a
    /// device is first used, so `wgpu:0..n_gpus` are registered on the
    /// caller's word. Auto-selection then picks `wgpu:0`. If that adapter
    /// does not exist, the failure surfaces from burn on first use rather
    /// than from [`DeviceDispatcher::resolve`](crate::DeviceDispatcher::resolve).
    /// Pass `0` to expose only the CPU adapter when the GPU count is unknown.
    #[must_use]
    pub fn wgpu(n_gpus: usize) -> Self {
        let mut catalog = Self::new().with(DeviceId::cpu(), burn_wgpu::WgpuDevice::Cpu);
        for i in 0..n_gpus {
            catalog = catalog.with(
                DeviceId::wgpu(i as u32),
                burn_wgpu::WgpuDevice::DiscreteGpu(i),
            );
        }
        catalog
    }
}
