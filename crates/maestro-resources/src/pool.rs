use crate::types::{
    Dimension, ResourceAllocation, ResourceLimits, ResourceReport, ResourceSpec,
};
use chrono::Utc;
use maestro_core::{MaestroError, MaestroResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

struct PoolLedger {
    usage: ResourceSpec,
    allocations: HashMap<Uuid, ResourceAllocation>,
}

/// Capacity ledger with wholesale admission control.
///
/// Invariant: for every dimension, the sum of `requested` over all live
/// allocations never exceeds the configured limit. A request that would
/// violate this on any single dimension is rejected in full — the pool
/// never grants part of a request.
///
/// Released allocations are retained (with `released_at` set) so that a
/// repeated release of the same id is detected and never double-credits
/// the ledger.
pub struct ResourcePool {
    limits: ResourceLimits,
    ledger: RwLock<PoolLedger>,
}

impl ResourcePool {
    /// Creates an empty pool with the given limits.
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            ledger: RwLock::new(PoolLedger {
                usage: ResourceSpec::default(),
                allocations: HashMap::new(),
            }),
        }
    }

    /// Admits `request` for `owner_id`, or rejects it wholesale.
    ///
    /// Admission requires `usage[d] + request[d] <= limit[d]` for every
    /// dimension `d`; the first violating dimension is named in the
    /// returned [`MaestroError::InsufficientResources`].
    pub fn allocate(
        &self,
        owner_id: impl Into<String>,
        request: ResourceSpec,
    ) -> MaestroResult<ResourceAllocation> {
        let owner_id = owner_id.into();
        let mut ledger = self.ledger.write();

        for dim in Dimension::ALL {
            let in_use = ledger.usage.get(dim);
            let wanted = request.get(dim);
            let limit = self.limits.get(dim);
            if in_use.saturating_add(wanted) > limit {
                debug!(
                    owner_id = %owner_id,
                    dimension = %dim,
                    requested = wanted,
                    in_use,
                    limit,
                    "allocation rejected"
                );
                return Err(MaestroError::InsufficientResources(format!(
                    "{dim}: requested {wanted}, in use {in_use}, limit {limit}"
                )));
            }
        }

        let allocation = ResourceAllocation {
            id: Uuid::new_v4(),
            owner_id,
            requested: request,
            granted_at: Utc::now(),
            released_at: None,
        };
        ledger.usage.add(&request);
        ledger.allocations.insert(allocation.id, allocation.clone());

        info!(
            allocation_id = %allocation.id,
            owner_id = %allocation.owner_id,
            "allocation granted"
        );
        Ok(allocation)
    }

    /// Releases a live allocation, crediting its usage back exactly once.
    ///
    /// Unknown and already-released ids return [`MaestroError::NotFound`]
    /// without mutating the ledger.
    pub fn release(&self, allocation_id: Uuid) -> MaestroResult<()> {
        let mut ledger = self.ledger.write();
        let allocation = ledger
            .allocations
            .get_mut(&allocation_id)
            .filter(|a| a.is_active())
            .ok_or_else(|| {
                MaestroError::NotFound(format!("allocation {allocation_id} (unknown or released)"))
            })?;

        allocation.released_at = Some(Utc::now());
        let requested = allocation.requested;
        ledger.usage.sub(&requested);

        info!(allocation_id = %allocation_id, "allocation released");
        Ok(())
    }

    /// Releases every live allocation owned by `owner_id`.
    ///
    /// Returns the number of allocations released. Used by the engine to
    /// tear down an agent's footprint on stop.
    pub fn release_owned_by(&self, owner_id: &str) -> usize {
        let mut ledger = self.ledger.write();
        let now = Utc::now();
        let mut freed = ResourceSpec::default();
        let mut count = 0;

        for allocation in ledger.allocations.values_mut() {
            if allocation.is_active() && allocation.owner_id == owner_id {
                allocation.released_at = Some(now);
                freed.add(&allocation.requested);
                count += 1;
            }
        }
        ledger.usage.sub(&freed);

        if count > 0 {
            info!(owner_id = %owner_id, count, "owner allocations released");
        }
        count
    }

    /// Booked usage per dimension.
    pub fn usage(&self) -> ResourceSpec {
        self.ledger.read().usage
    }

    /// Configured limits per dimension.
    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    /// A consistent `{usage, limits, active allocations}` view.
    pub fn snapshot(&self) -> ResourceReport {
        let ledger = self.ledger.read();
        let mut active: Vec<ResourceAllocation> = ledger
            .allocations
            .values()
            .filter(|a| a.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|a| a.granted_at);
        ResourceReport {
            usage: ledger.usage,
            limits: self.limits,
            active_allocations: active,
        }
    }

    /// Looks up an allocation by id, live or released.
    pub fn get(&self, allocation_id: Uuid) -> Option<ResourceAllocation> {
        self.ledger.read().allocations.get(&allocation_id).cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn cpu_only(limit: u64) -> ResourceLimits {
        ResourceLimits(ResourceSpec {
            cpu: limit,
            ..Default::default()
        })
    }

    fn cpu_request(amount: u64) -> ResourceSpec {
        ResourceSpec {
            cpu: amount,
            ..Default::default()
        }
    }

    #[test]
    fn test_admit_then_reject_then_admit_after_release() {
        let pool = ResourcePool::new(cpu_only(100));

        let first = pool.allocate("agent-1", cpu_request(80)).unwrap();
        assert_eq!(pool.usage().cpu, 80);

        let rejected = pool.allocate("agent-2", cpu_request(30));
        assert!(matches!(
            rejected,
            Err(MaestroError::InsufficientResources(_))
        ));
        assert_eq!(pool.usage().cpu, 80);

        pool.release(first.id).unwrap();
        assert_eq!(pool.usage().cpu, 0);

        pool.allocate("agent-2", cpu_request(30)).unwrap();
        assert_eq!(pool.usage().cpu, 30);
    }

    #[test]
    fn test_rejection_is_wholesale_across_dimensions() {
        let pool = ResourcePool::new(ResourceLimits(ResourceSpec {
            cpu: 1000,
            memory_mb: 100,
            ..Default::default()
        }));

        // CPU fits easily, memory does not: nothing may be granted.
        let result = pool.allocate(
            "agent-1",
            ResourceSpec {
                cpu: 10,
                memory_mb: 200,
                ..Default::default()
            },
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("memory"));
        assert!(pool.usage().is_zero());
        assert!(pool.snapshot().active_allocations.is_empty());
    }

    #[test]
    fn test_release_is_idempotent_safe() {
        let pool = ResourcePool::new(cpu_only(100));
        let allocation = pool.allocate("agent-1", cpu_request(60)).unwrap();

        pool.release(allocation.id).unwrap();
        assert_eq!(pool.usage().cpu, 0);

        // Second release: NotFound, and usage must not go negative
        // (or wrap) via a double credit.
        let second = pool.release(allocation.id);
        assert!(matches!(second, Err(MaestroError::NotFound(_))));
        assert_eq!(pool.usage().cpu, 0);
    }

    #[test]
    fn test_release_unknown_id() {
        let pool = ResourcePool::new(cpu_only(100));
        assert!(matches!(
            pool.release(Uuid::new_v4()),
            Err(MaestroError::NotFound(_))
        ));
    }

    #[test]
    fn test_usage_never_exceeds_limit_under_many_requests() {
        let pool = ResourcePool::new(cpu_only(100));
        let mut granted = 0;
        for i in 0..10 {
            if pool.allocate(format!("agent-{i}"), cpu_request(30)).is_ok() {
                granted += 1;
            }
        }
        // 3 x 30 fit under 100; the rest are rejected.
        assert_eq!(granted, 3);
        assert!(pool.usage().cpu <= 100);
    }

    #[test]
    fn test_release_owned_by() {
        let pool = ResourcePool::new(cpu_only(100));
        pool.allocate("agent-1", cpu_request(20)).unwrap();
        pool.allocate("agent-1", cpu_request(20)).unwrap();
        let other = pool.allocate("agent-2", cpu_request(20)).unwrap();

        assert_eq!(pool.release_owned_by("agent-1"), 2);
        assert_eq!(pool.usage().cpu, 20);
        assert!(pool.get(other.id).unwrap().is_active());

        // Nothing left to release for that owner.
        assert_eq!(pool.release_owned_by("agent-1"), 0);
    }

    #[test]
    fn test_snapshot_consistency() {
        let pool = ResourcePool::new(cpu_only(100));
        let a = pool.allocate("agent-1", cpu_request(40)).unwrap();
        pool.allocate("agent-2", cpu_request(25)).unwrap();
        pool.release(a.id).unwrap();

        let report = pool.snapshot();
        assert_eq!(report.usage.cpu, 25);
        assert_eq!(report.active_allocations.len(), 1);
        assert_eq!(report.active_allocations[0].owner_id, "agent-2");
        assert_eq!(report.limits.get(Dimension::Cpu), 100);
    }

    #[test]
    fn test_zero_request_always_admitted() {
        let pool = ResourcePool::new(cpu_only(0));
        let allocation = pool.allocate("agent-1", ResourceSpec::default()).unwrap();
        assert!(allocation.requested.is_zero());
    }
}
