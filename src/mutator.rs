//! Ratio-based container resource mutation
//!
//! For each container, in this order:
//!
//! 1. memory request = memory limit × `memoryRequestToLimitRatio`, rounded
//!    down to a whole MiB (binary limits) or MB (decimal limits)
//! 2. CPU limit = memory limit × `limitCPUToMemoryRatio`, at 1000 milli-cores
//!    per GiB
//! 3. CPU request = CPU limit × `cpuRequestToLimitRatio`, reading the CPU
//!    limit after step 2 may have rewritten it
//!
//! Every derived value is raised to the absolute floor and then to the
//! namespace floor when it falls below either. A ratio of zero disables its
//! step.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as KubeQuantity;
use tracing::debug;

use crate::config::OverrideConfig;
use crate::quantity::{Format, Quantity};
use crate::{Error, Result, CPU_BASE_SCALE_FACTOR, DEFAULT_CPU_FLOOR_MILLI, DEFAULT_MEMORY_FLOOR_BYTES};

/// Resource name for CPU
pub const RESOURCE_CPU: &str = "cpu";

/// Resource name for memory
pub const RESOURCE_MEMORY: &str = "memory";

const MEBIBYTE: i64 = 1024 * 1024;
const MEGABYTE: i64 = 1000 * 1000;

/// Fixed-point denominator for the memory request ratio
const RATIO_SCALE: i128 = 1_000_000;

/// How derived values are applied to the container
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApplyMode {
    /// Overwrite the target field
    #[default]
    Mutate,
    /// Fail unless the target field already holds the derived value
    Validate,
}

/// Absolute lower bounds for derived values
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Floors {
    /// CPU floor (default `1m`)
    pub cpu: Quantity,
    /// Memory floor (default `1Mi`)
    pub memory: Quantity,
}

impl Default for Floors {
    fn default() -> Self {
        Self {
            cpu: Quantity::new_milli(DEFAULT_CPU_FLOOR_MILLI, Format::DecimalSI),
            memory: Quantity::new(DEFAULT_MEMORY_FLOOR_BYTES, Format::BinarySI),
        }
    }
}

/// Applies the override ratios to containers of one Pod
pub struct Mutator<'a> {
    config: &'a OverrideConfig,
    floors: &'a Floors,
    ns_cpu_floor: Option<Quantity>,
    ns_memory_floor: Option<Quantity>,
    mode: ApplyMode,
}

impl<'a> Mutator<'a> {
    /// Create a mutator for one request's namespace floors
    pub fn new(
        config: &'a OverrideConfig,
        floors: &'a Floors,
        ns_cpu_floor: Option<Quantity>,
        ns_memory_floor: Option<Quantity>,
    ) -> Self {
        Self {
            config,
            floors,
            ns_cpu_floor,
            ns_memory_floor,
            mode: ApplyMode::Mutate,
        }
    }

    /// Switch how derived values are applied
    pub fn with_mode(mut self, mode: ApplyMode) -> Self {
        self.mode = mode;
        self
    }

    /// Apply the overrides to a single container
    ///
    /// Errors carry the field path relative to the container, e.g.
    /// `resources.requests.cpu`.
    pub fn mutate(&self, container: &mut Container) -> Result<()> {
        let Some(resources) = container.resources.as_mut() else {
            return Ok(());
        };

        let memory_limit = read_quantity(&resources.limits, "limits", RESOURCE_MEMORY)?;
        if let Some(memory_limit) = &memory_limit {
            if self.config.memory_request_to_limit_ratio != 0.0 {
                let request = self.memory_request(memory_limit);
                self.apply(&mut resources.requests, "requests", RESOURCE_MEMORY, request)?;
            }

            if self.config.limit_cpu_to_memory_ratio != 0.0 {
                let limit = self.cpu_limit(memory_limit);
                self.apply(&mut resources.limits, "limits", RESOURCE_CPU, limit)?;
            }
        }

        let cpu_limit = read_quantity(&resources.limits, "limits", RESOURCE_CPU)?;
        if let Some(cpu_limit) = &cpu_limit {
            if self.config.cpu_request_to_limit_ratio != 0.0 {
                let request = self.cpu_request(cpu_limit);
                self.apply(&mut resources.requests, "requests", RESOURCE_CPU, request)?;
            }
        }

        Ok(())
    }

    fn memory_request(&self, memory_limit: &Quantity) -> Quantity {
        // integer product; the ratio is taken to six decimal places
        let ratio = (self.config.memory_request_to_limit_ratio * RATIO_SCALE as f64).round() as i128;
        let raw = i128::from(memory_limit.value()) * ratio / RATIO_SCALE;
        let mut amount = i64::try_from(raw).unwrap_or(i64::MAX);

        // readability only: whole MiB for binary limits, whole MB otherwise
        let step = if memory_limit.format().is_binary() {
            MEBIBYTE
        } else {
            MEGABYTE
        };
        amount -= amount % step;

        self.clamp(
            Quantity::new(amount, memory_limit.format()),
            &self.floors.memory,
            self.ns_memory_floor.as_ref(),
            RESOURCE_MEMORY,
        )
    }

    fn cpu_limit(&self, memory_limit: &Quantity) -> Quantity {
        let milli = memory_limit.value() as f64
            * self.config.limit_cpu_to_memory_ratio
            * CPU_BASE_SCALE_FACTOR;

        self.clamp(
            Quantity::new_milli(milli as i64, Format::DecimalSI),
            &self.floors.cpu,
            self.ns_cpu_floor.as_ref(),
            RESOURCE_CPU,
        )
    }

    fn cpu_request(&self, cpu_limit: &Quantity) -> Quantity {
        let milli = cpu_limit.milli_value() as f64 * self.config.cpu_request_to_limit_ratio;

        self.clamp(
            Quantity::new_milli(milli as i64, cpu_limit.format()),
            &self.floors.cpu,
            self.ns_cpu_floor.as_ref(),
            RESOURCE_CPU,
        )
    }

    fn clamp(
        &self,
        derived: Quantity,
        floor: &Quantity,
        ns_floor: Option<&Quantity>,
        resource: &str,
    ) -> Quantity {
        let mut value = derived;
        if value < *floor {
            value = floor.clone();
        }
        if let Some(ns_floor) = ns_floor {
            if value < *ns_floor {
                debug!(
                    resource,
                    derived = %value,
                    namespace_floor = %ns_floor,
                    "Derived value below namespace minimum, raising to floor"
                );
                value = ns_floor.clone();
            }
        }
        value
    }

    fn apply(
        &self,
        list: &mut Option<BTreeMap<String, KubeQuantity>>,
        field: &str,
        resource: &str,
        value: Quantity,
    ) -> Result<()> {
        match self.mode {
            ApplyMode::Mutate => {
                list.get_or_insert_with(BTreeMap::new)
                    .insert(resource.to_string(), value.to_kube());
                Ok(())
            }
            ApplyMode::Validate => {
                let path = format!("resources.{field}.{resource}");
                let Some(current) = list.as_ref().and_then(|l| l.get(resource)) else {
                    return Err(Error::mutation(
                        path,
                        format!("mutated, expected: {value}, now absent"),
                    ));
                };
                let parsed = Quantity::try_from(current)
                    .map_err(|e| Error::mutation(&path, e.to_string()))?;
                if parsed != value {
                    return Err(Error::mutation(
                        path,
                        format!("mutated, expected: {value}, got {}", current.0),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn read_quantity(
    list: &Option<BTreeMap<String, KubeQuantity>>,
    field: &str,
    resource: &str,
) -> Result<Option<Quantity>> {
    list.as_ref()
        .and_then(|l| l.get(resource))
        .map(|q| {
            Quantity::try_from(q)
                .map_err(|e| Error::mutation(format!("resources.{field}.{resource}"), e.to_string()))
        })
        .transpose()
}
