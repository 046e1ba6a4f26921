//! Per-frame descriptor set allocation.
//!
//! Descriptor sets acquired during a frame are only valid until the GPU
//! finishes that frame, so the arena keeps one group of descriptor pools
//! per frame slot. Sets are handed out bump-style during recording; once
//! the slot's fence has been observed, the whole group is reset and every
//! set from it becomes available again. A set acquired in frame K is
//! therefore never reused while frame K's work can still be pending.
//!
//! When the active pool runs out, a fresh pool is appended to the slot's
//! group; allocation grows by whole pools and never blocks the frame.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use framegraph_rhi::RhiResult;
use framegraph_rhi::descriptor::{DescriptorPool, DescriptorSetLayout};
use framegraph_rhi::device::Device;

/// Sets per pool; a new pool is appended when a frame needs more.
const SETS_PER_POOL: u32 = 64;

/// Descriptors of each type provisioned per pool.
const DESCRIPTORS_PER_TYPE: u32 = 128;

/// Pools for one frame slot.
struct SlotPools {
    pools: Vec<DescriptorPool>,
    /// Index of the pool currently being allocated from.
    active: usize,
}

/// Frame-slot-scoped descriptor set allocator.
pub struct DescriptorArena {
    device: Arc<Device>,
    slots: Vec<SlotPools>,
}

impl DescriptorArena {
    /// Creates an arena with one pool group per frame slot.
    ///
    /// # Errors
    ///
    /// Returns an error if initial pool creation fails.
    pub fn new(device: Arc<Device>, num_slots: usize) -> RhiResult<Self> {
        let mut slots = Vec::with_capacity(num_slots);
        for _ in 0..num_slots {
            let pool = Self::create_pool(&device)?;
            slots.push(SlotPools {
                pools: vec![pool],
                active: 0,
            });
        }

        debug!("Descriptor arena created with {} slot group(s)", num_slots);

        Ok(Self { device, slots })
    }

    /// Acquires a fresh descriptor set for `slot` with the given layout.
    ///
    /// The set stays valid until the slot is next reset; the caller must
    /// not hold it across that boundary.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails even from a freshly created
    /// pool.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub fn acquire(
        &mut self,
        slot: usize,
        layout: &DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        let group = &mut self.slots[slot];
        let layouts = [layout.handle()];

        // Fast path: the active pool still has room.
        match group.pools[group.active].allocate(&layouts) {
            Ok(sets) => return Ok(sets[0]),
            Err(e) => {
                debug!("Descriptor pool exhausted, growing slot {}: {}", slot, e);
            }
        }

        // Grow by a whole pool and retry once.
        let pool = Self::create_pool(&self.device)?;
        group.pools.push(pool);
        group.active = group.pools.len() - 1;

        let sets = group.pools[group.active].allocate(&layouts)?;
        Ok(sets[0])
    }

    /// Resets all pools of `slot`, recycling every set allocated from it.
    ///
    /// Call only after the slot's fence has been observed.
    ///
    /// # Errors
    ///
    /// Returns an error if a pool reset fails.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub fn reset_slot(&mut self, slot: usize) -> RhiResult<()> {
        let group = &mut self.slots[slot];
        for pool in &group.pools {
            pool.reset()?;
        }
        group.active = 0;
        Ok(())
    }

    /// Number of pools currently backing `slot`.
    pub fn pool_count(&self, slot: usize) -> usize {
        self.slots[slot].pools.len()
    }

    fn create_pool(device: &Arc<Device>) -> RhiResult<DescriptorPool> {
        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(DESCRIPTORS_PER_TYPE),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(DESCRIPTORS_PER_TYPE),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(DESCRIPTORS_PER_TYPE),
        ];

        DescriptorPool::new(device.clone(), SETS_PER_POOL, &pool_sizes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_provisioning_constants() {
        // Each pool must be able to satisfy its set count with at least one
        // descriptor per set for the common types.
        assert!(SETS_PER_POOL > 0);
        assert!(DESCRIPTORS_PER_TYPE >= SETS_PER_POOL);
    }
}
