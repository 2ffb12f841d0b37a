// Synchronization primitives
//
// Fences and semaphores for GPU-CPU and GPU-GPU sync, one set per frame slot.
// Slots are created once per device lifetime and handed from each swap chain
// to its successor.

use ash::vk;
use std::sync::Arc;

use super::error::RenderResult;
use super::gpu::GpuDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    /// A frame acquired on this slot never reached the queue
    needs_rearm: bool,
    device: Arc<dyn GpuDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<dyn GpuDevice>) -> RenderResult<Self> {
        // Fill in one handle at a time so a failure part-way is cleaned up by Drop
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            needs_rearm: false,
            device,
        };
        sync.image_available = sync.device.create_semaphore()?;
        sync.render_finished = sync.device.create_semaphore()?;
        // Start signaled so the first wait on this slot returns immediately
        sync.in_flight = sync.device.create_fence(true)?;
        Ok(sync)
    }

    /// Record that the slot's acquire semaphore holds a signal nothing will
    /// wait on, and its fence may never be signaled again.
    pub fn abandon(&mut self) {
        self.needs_rearm = true;
    }

    pub fn needs_rearm(&self) -> bool {
        self.needs_rearm
    }

    /// Replace the acquire semaphore and the fence with fresh ones.
    ///
    /// Only valid once the device is idle. Both replacements are created
    /// before anything is swapped, so on error the slot is left untouched and
    /// still marked for rearming.
    pub fn rearm(&mut self) -> RenderResult<()> {
        let semaphore = self.device.create_semaphore()?;
        let fence = match self.device.create_fence(true) {
            Ok(fence) => fence,
            Err(err) => {
                self.device.destroy_semaphore(semaphore);
                return Err(err);
            }
        };

        let old_semaphore = std::mem::replace(&mut self.image_available, semaphore);
        let old_fence = std::mem::replace(&mut self.in_flight, fence);
        self.device.destroy_semaphore(old_semaphore);
        self.device.destroy_fence(old_fence);
        self.needs_rearm = false;
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        if self.in_flight != vk::Fence::null() {
            self.device.destroy_fence(self.in_flight);
        }
        if self.render_finished != vk::Semaphore::null() {
            self.device.destroy_semaphore(self.render_finished);
        }
        if self.image_available != vk::Semaphore::null() {
            self.device.destroy_semaphore(self.image_available);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockGpu;

    #[test]
    fn new_slot_fence_starts_signaled() {
        let gpu = MockGpu::new();
        let sync = FrameSync::new(gpu.clone()).unwrap();
        assert!(gpu.wait_for_fence(sync.in_flight, 0).is_ok());
    }

    #[test]
    fn rearm_replaces_unsignaled_fence() {
        let gpu = MockGpu::new();
        let mut sync = FrameSync::new(gpu.clone()).unwrap();
        gpu.reset_fence(sync.in_flight).unwrap();
        assert!(gpu.wait_for_fence(sync.in_flight, 0).is_err());

        let (semaphore, fence) = (sync.image_available, sync.in_flight);
        sync.abandon();
        sync.rearm().unwrap();
        assert!(!sync.needs_rearm());
        assert_ne!(fence, sync.in_flight);
        assert!(!gpu.is_live(fence));
        assert!(!gpu.is_live(semaphore));
        assert!(gpu.wait_for_fence(sync.in_flight, 0).is_ok());
        assert_eq!(gpu.live_count(), 3);
    }

    #[test]
    fn failed_rearm_leaves_slot_untouched() {
        let gpu = MockGpu::new();
        let mut sync = FrameSync::new(gpu.clone()).unwrap();
        let (semaphore, fence) = (sync.image_available, sync.in_flight);
        sync.abandon();

        gpu.fail_next_fence_create();
        assert!(sync.rearm().is_err());
        assert_eq!(sync.image_available, semaphore);
        assert_eq!(sync.in_flight, fence);
        assert!(gpu.is_live(semaphore));
        assert!(sync.needs_rearm());
        // The semaphore created for the replacement was released again
        assert_eq!(gpu.live_count(), 3);

        sync.rearm().unwrap();
        assert_ne!(sync.image_available, semaphore);
        assert_eq!(gpu.live_count(), 3);
    }

    #[test]
    fn drop_releases_every_handle() {
        let gpu = MockGpu::new();
        {
            let _sync = FrameSync::new(gpu.clone()).unwrap();
            assert_eq!(gpu.live_count(), 3);
        }
        assert_eq!(gpu.live_count(), 0);
    }
}
