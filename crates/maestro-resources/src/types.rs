use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A resource dimension tracked by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// CPU, in millicores.
    Cpu,
    /// Memory, in megabytes.
    Memory,
    /// Disk, in megabytes.
    Disk,
    /// Inbound network bandwidth, in kilobits per second.
    NetworkIn,
    /// Outbound network bandwidth, in kilobits per second.
    NetworkOut,
}

impl Dimension {
    /// All dimensions in canonical order.
    pub const ALL: [Dimension; 5] = [
        Dimension::Cpu,
        Dimension::Memory,
        Dimension::Disk,
        Dimension::NetworkIn,
        Dimension::NetworkOut,
    ];
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Dimension::Cpu => "cpu",
            Dimension::Memory => "memory",
            Dimension::Disk => "disk",
            Dimension::NetworkIn => "network_in",
            Dimension::NetworkOut => "network_out",
        };
        write!(f, "{name}")
    }
}

/// A quantity per resource dimension.
///
/// Used both for requests ("this much is needed") and for limits/usage
/// ("this much exists / is in use"). A zero dimension means "none
/// requested" in a request and "unlimited is not implied" in limits —
/// a zero limit simply admits nothing on that dimension unless the
/// request is also zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CPU millicores.
    #[serde(default)]
    pub cpu: u64,
    /// Memory in MB.
    #[serde(default)]
    pub memory_mb: u64,
    /// Disk in MB.
    #[serde(default)]
    pub disk_mb: u64,
    /// Inbound bandwidth in kbps.
    #[serde(default)]
    pub net_in_kbps: u64,
    /// Outbound bandwidth in kbps.
    #[serde(default)]
    pub net_out_kbps: u64,
}

impl ResourceSpec {
    /// The quantity on a single dimension.
    pub fn get(&self, dim: Dimension) -> u64 {
        match dim {
            Dimension::Cpu => self.cpu,
            Dimension::Memory => self.memory_mb,
            Dimension::Disk => self.disk_mb,
            Dimension::NetworkIn => self.net_in_kbps,
            Dimension::NetworkOut => self.net_out_kbps,
        }
    }

    fn get_mut(&mut self, dim: Dimension) -> &mut u64 {
        match dim {
            Dimension::Cpu => &mut self.cpu,
            Dimension::Memory => &mut self.memory_mb,
            Dimension::Disk => &mut self.disk_mb,
            Dimension::NetworkIn => &mut self.net_in_kbps,
            Dimension::NetworkOut => &mut self.net_out_kbps,
        }
    }

    /// Adds `other` dimension-wise, saturating.
    pub fn add(&mut self, other: &ResourceSpec) {
        for dim in Dimension::ALL {
            let slot = self.get_mut(dim);
            *slot = slot.saturating_add(other.get(dim));
        }
    }

    /// Subtracts `other` dimension-wise, saturating at zero.
    pub fn sub(&mut self, other: &ResourceSpec) {
        for dim in Dimension::ALL {
            let slot = self.get_mut(dim);
            *slot = slot.saturating_sub(other.get(dim));
        }
    }

    /// True when every dimension is zero.
    pub fn is_zero(&self) -> bool {
        Dimension::ALL.iter().all(|d| self.get(*d) == 0)
    }
}

/// Static per-dimension capacity limits for a [`pool::ResourcePool`].
///
/// [`pool::ResourcePool`]: crate::pool::ResourcePool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits(pub ResourceSpec);

impl ResourceLimits {
    /// The limit on a single dimension.
    pub fn get(&self, dim: Dimension) -> u64 {
        self.0.get(dim)
    }
}

impl Default for ResourceLimits {
    /// Conservative single-host defaults.
    fn default() -> Self {
        Self(ResourceSpec {
            cpu: 4000,
            memory_mb: 8192,
            disk_mb: 51_200,
            net_in_kbps: 100_000,
            net_out_kbps: 100_000,
        })
    }
}

/// A granted resource request, live until released exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAllocation {
    /// Unique allocation id.
    pub id: Uuid,
    /// The entity this allocation belongs to (an agent id, typically).
    pub owner_id: String,
    /// Quantities granted, per dimension.
    pub requested: ResourceSpec,
    /// When the allocation was admitted.
    pub granted_at: DateTime<Utc>,
    /// When the allocation was released, if it has been.
    pub released_at: Option<DateTime<Utc>>,
}

impl ResourceAllocation {
    /// True while the allocation still counts against the pool.
    pub fn is_active(&self) -> bool {
        self.released_at.is_none()
    }
}

/// Consistent point-in-time view of the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReport {
    /// Booked usage per dimension.
    pub usage: ResourceSpec,
    /// Configured limits per dimension.
    pub limits: ResourceLimits,
    /// Allocations that are currently live.
    pub active_allocations: Vec<ResourceAllocation>,
}
