//! Resource quantities shared by node capacity and container allocation.

use super::FleetDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Memory, CPU, and storage quantities.
///
/// The same shape describes both a node's maximum capacity and the slice of
/// it allocated to one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resources {
    /// Memory in megabytes.
    pub memory_mb: u64,
    /// Whole CPU cores.
    pub cpu_cores: u32,
    /// Storage in gigabytes.
    pub storage_gb: u64,
}

impl Resources {
    /// Default node capacity and per-container allocation.
    pub const DEFAULT: Self = Self {
        memory_mb: 4096,
        cpu_cores: 4,
        storage_gb: 15,
    };

    /// Creates a resource quantity.
    #[must_use]
    pub const fn new(memory_mb: u64, cpu_cores: u32, storage_gb: u64) -> Self {
        Self {
            memory_mb,
            cpu_cores,
            storage_gb,
        }
    }

    /// Validates that every dimension is positive.
    ///
    /// # Errors
    ///
    /// Returns [`FleetDomainError::InvalidCapacity`] when any dimension is
    /// zero.
    pub fn validated(self) -> Result<Self, FleetDomainError> {
        if self.memory_mb == 0 || self.cpu_cores == 0 || self.storage_gb == 0 {
            return Err(FleetDomainError::InvalidCapacity(self.to_string()));
        }
        Ok(self)
    }

    /// Returns whether `other` fits inside `self` in every dimension.
    #[must_use]
    pub const fn covers(&self, other: &Self) -> bool {
        self.memory_mb >= other.memory_mb
            && self.cpu_cores >= other.cpu_cores
            && self.storage_gb >= other.storage_gb
    }

    /// Adds two quantities, saturating at the numeric maximum.
    #[must_use]
    pub const fn saturating_add(&self, other: &Self) -> Self {
        Self {
            memory_mb: self.memory_mb.saturating_add(other.memory_mb),
            cpu_cores: self.cpu_cores.saturating_add(other.cpu_cores),
            storage_gb: self.storage_gb.saturating_add(other.storage_gb),
        }
    }

    /// Subtracts `other`, clamping every dimension at zero.
    #[must_use]
    pub const fn saturating_sub(&self, other: &Self) -> Self {
        Self {
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            cpu_cores: self.cpu_cores.saturating_sub(other.cpu_cores),
            storage_gb: self.storage_gb.saturating_sub(other.storage_gb),
        }
    }

    /// Returns the used share of `capacity` in parts per thousand, taking the
    /// most constrained dimension.
    #[must_use]
    pub fn load_permille(&self, capacity: &Self) -> u64 {
        let ratios = [
            permille(self.memory_mb, capacity.memory_mb),
            permille(u64::from(self.cpu_cores), u64::from(capacity.cpu_cores)),
            permille(self.storage_gb, capacity.storage_gb),
        ];
        ratios.into_iter().max().unwrap_or_default()
    }
}

fn permille(used: u64, total: u64) -> u64 {
    used.saturating_mul(1000).checked_div(total).unwrap_or(u64::MAX)
}

impl fmt::Display for Resources {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}MB/{}cpu/{}GB",
            self.memory_mb, self.cpu_cores, self.storage_gb
        )
    }
}
