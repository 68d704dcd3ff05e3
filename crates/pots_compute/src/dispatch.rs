//! Resolution of a requested device specification into a placement plan.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use burn::module::Module;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::catalog::DeviceCatalog;
use crate::device::DeviceId;
use crate::error::{ComputeError, ComputeResult};

/// Which device(s) training should run on.
///
/// Serialized untagged: `null` is auto, a string is one device and an
/// array is a list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceSpec {
    /// Prefer an available accelerator, else the CPU.
    #[default]
    Auto,
    /// One device.
    Single(DeviceId),
    /// Replicated data parallelism over several devices.
    Multi(Vec<DeviceId>),
}

impl DeviceSpec {
    /// Build a spec from a list of identifiers.
    ///
    /// # Errors
    ///
    /// Returns an error if any identifier fails to parse.
    pub fn from_ids<I, S>(ids: I) -> ComputeResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = ids
            .into_iter()
            .map(|s| s.as_ref().parse())
            .collect::<ComputeResult<Vec<DeviceId>>>()?;
        Ok(Self::Multi(ids))
    }
}

impl FromStr for DeviceSpec {
    type Err = ComputeError;

    /// Parses `auto`, `cuda:0` or a comma-separated list `cuda:0,cuda:1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        if s.contains(',') {
            return Self::from_ids(s.split(',').map(str::trim).filter(|p| !p.is_empty()));
        }
        Ok(Self::Single(s.parse()?))
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Auto => f.write_str("auto"),
            DeviceSpec::Single(id) => write!(f, "{id}"),
            DeviceSpec::Multi(ids) => {
                let parts: Vec<String> = ids.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

/// One resolved device.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement<D> {
    /// Its identifier.
    pub id: DeviceId,
    /// The backend device handle.
    pub device: D,
}

/// The devices a model is placed on.
///
/// The first placement is the primary: parameters live there, the
/// optimizer steps there and replicas are synchronized from it.
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePlan<D> {
    placements: Vec<Placement<D>>,
}

impl<D: Clone> DevicePlan<D> {
    /// A plan over a single device.
    #[must_use]
    pub fn single(id: DeviceId, device: D) -> Self {
        Self {
            placements: vec![Placement { id, device }],
        }
    }

    /// The primary placement.
    #[must_use]
    pub fn primary(&self) -> &Placement<D> {
        &self.placements[0]
    }

    /// All placements, primary first.
    #[must_use]
    pub fn placements(&self) -> &[Placement<D>] {
        &self.placements
    }

    /// All backend devices, primary first.
    #[must_use]
    pub fn devices(&self) -> Vec<D> {
        self.placements.iter().map(|p| p.device.clone()).collect()
    }

    /// Number of replicas.
    #[must_use]
    pub fn replicas(&self) -> usize {
        self.placements.len()
    }

    /// Whether the model is mirrored over more than one device.
    #[must_use]
    pub fn is_replicated(&self) -> bool {
        self.placements.len() > 1
    }

    /// Split `n` samples over the replicas as evenly as possible.
    ///
    /// The first `n % replicas` shards get one extra sample. Shards can be
    /// empty when `n` is smaller than the replica count.
    #[must_use]
    pub fn shard_sizes(&self, n: usize) -> Vec<usize> {
        let k = self.replicas();
        let base = n / k;
        let extra = n % k;
        (0..k).map(|i| base + usize::from(i < extra)).collect()
    }

    /// Move `module` onto the primary device.
    ///
    /// This is the one-time placement; batches are moved per step by the
    /// training loop.
    pub fn place<B, M>(&self, module: M) -> M
    where
        B: Backend<Device = D>,
        M: Module<B>,
    {
        let primary = self.primary();
        tracing::debug!(device = %primary.id, replicas = self.replicas(), "placing model");
        module.to_device(&primary.device)
    }
}

/// Resolves [`DeviceSpec`]s against the devices of one backend.
///
/// # Example
///
/// ```rust,ignore
/// use pots_compute::{DeviceCatalog, DeviceDispatcher, DeviceSpec};
///
/// let dispatcher = DeviceDispatcher::new(DeviceCatalog::ndarray());
/// let plan = dispatcher.resolve(&DeviceSpec::Auto)?;
/// let model = plan.place(model);
/// ```
#[derive(Debug, Clone)]
pub struct DeviceDispatcher<D> {
    catalog: DeviceCatalog<D>,
}

impl<D: Clone> DeviceDispatcher<D> {
    /// Create a dispatcher over `catalog`.
    #[must_use]
    pub fn new(catalog: DeviceCatalog<D>) -> Self {
        Self { catalog }
    }

    /// The devices this dispatcher can resolve to.
    #[must_use]
    pub fn catalog(&self) -> &DeviceCatalog<D> {
        &self.catalog
    }

    /// Resolve `spec` into a plan.
    ///
    /// # Errors
    ///
    /// - [`ComputeError::UnsupportedDevice`] if a requested id is not available
    /// - [`ComputeError::EmptyDeviceList`] for an empty list
    /// - [`ComputeError::InvalidSpec`] if a list names a device twice
    /// - [`ComputeError::NoDevice`] if auto-selection finds nothing
    pub fn resolve(&self, spec: &DeviceSpec) -> ComputeResult<DevicePlan<D>> {
        let plan = match spec {
            DeviceSpec::Auto => {
                let (id, device) = self.catalog.preferred().ok_or(ComputeError::NoDevice)?;
                DevicePlan::single(id, device)
            }
            DeviceSpec::Single(id) => DevicePlan::single(*id, self.lookup(id)?),
            DeviceSpec::Multi(ids) => {
                if ids.is_empty() {
                    return Err(ComputeError::EmptyDeviceList);
                }
                let mut seen = HashSet::with_capacity(ids.len());
                let mut placements = Vec::with_capacity(ids.len());
                for id in ids {
                    if !seen.insert(*id) {
                        return Err(ComputeError::InvalidSpec(format!(
                            "device {id} listed more than once"
                        )));
                    }
                    placements.push(Placement {
                        id: *id,
                        device: self.lookup(id)?,
                    });
                }
                DevicePlan { placements }
            }
        };
        tracing::debug!(%spec, primary = %plan.primary().id, replicas = plan.replicas(), "resolved devices");
        Ok(plan)
    }

    fn lookup(&self, id: &DeviceId) -> ComputeResult<D> {
        self.catalog.get(id).cloned().ok_or_else(|| {
            let available: Vec<String> = self.catalog.ids().map(|i| i.to_string()).collect();
            ComputeError::UnsupportedDevice(format!(
                "{id} is not available (have: {})",
                available.join(", ")
            ))
        })
    }
}
