// Recording GPU for tests
//
// Hands out fake handles, tracks which ones are alive, models fence and
// binary semaphore state plus queue completion, and records a timeline of the calls that matter for frame
// synchronization. Nothing completes on the "GPU" until it is waited on, so
// every test sees the worst-case ordering.

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::error::{RenderError, RenderResult};
use super::gpu::{
    DescriptorWrite, FrameSubmission, GpuDevice, GraphicsPipelineDesc, ImageDesc, SurfaceInfo,
    SwapchainDesc,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuEvent {
    FenceWait(vk::Fence),
    FenceReset(vk::Fence),
    Submit {
        command_buffer: vk::CommandBuffer,
        fence: vk::Fence,
    },
    Acquire {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    },
    Present {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    },
    /// Host writes made visible; `busy_fences` were still pending at that moment
    Flush {
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        busy_fences: Vec<vk::Fence>,
    },
    Invalidate {
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    Transition {
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    CopyBufferToImage {
        image: vk::Image,
        width: u32,
        height: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    OneShotSubmit,
    BeginRenderPass {
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    },
    DescriptorUpdate(usize),
    Draw(u32),
    WaitIdle,
}

/// Result injected into the next acquire or present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    OutOfDate,
    Suboptimal,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending,
}

struct MockSwapchain {
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    next_image: u32,
}

#[derive(Default)]
struct PoolState {
    max_sets: u32,
    allocated: u32,
}

struct MockState {
    next_handle: u64,
    live: HashMap<u64, &'static str>,
    /// Raw handles in the order they were destroyed
    destroyed: Vec<u64>,
    events: Vec<GpuEvent>,
    fences: HashMap<vk::Fence, FenceState>,
    /// Binary semaphores: true while a signal is waiting to be consumed
    semaphores: HashMap<vk::Semaphore, bool>,
    pending: VecDeque<vk::Fence>,
    memory: HashMap<vk::DeviceMemory, Vec<u8>>,
    swapchains: HashMap<vk::SwapchainKHR, MockSwapchain>,
    pools: HashMap<vk::DescriptorPool, PoolState>,
    surface_extent: vk::Extent2D,
    acquire_script: VecDeque<Scripted>,
    present_script: VecDeque<Scripted>,
    fail_next_submit: bool,
    fail_next_fence_wait: bool,
    fail_next_fence_create: bool,
    fail_next_pipeline: bool,
}

pub struct MockGpu {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    state: Mutex<MockState>,
}

impl MockGpu {
    pub fn new() -> Arc<Self> {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            ..Default::default()
        };
        memory_properties.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        memory_properties.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        Arc::new(Self {
            memory_properties,
            state: Mutex::new(MockState {
                next_handle: 0x1000,
                live: HashMap::new(),
                destroyed: Vec::new(),
                events: Vec::new(),
                fences: HashMap::new(),
                semaphores: HashMap::new(),
                pending: VecDeque::new(),
                memory: HashMap::new(),
                swapchains: HashMap::new(),
                pools: HashMap::new(),
                surface_extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fail_next_submit: false,
                fail_next_fence_wait: false,
                fail_next_fence_create: false,
                fail_next_pipeline: false,
            }),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // TEST CONTROLS
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_surface_extent(&self, width: u32, height: u32) {
        self.state.lock().surface_extent = vk::Extent2D { width, height };
    }

    pub fn script_acquire(&self, result: Scripted) {
        self.state.lock().acquire_script.push_back(result);
    }

    pub fn script_present(&self, result: Scripted) {
        self.state.lock().present_script.push_back(result);
    }

    pub fn fail_next_submit(&self) {
        self.state.lock().fail_next_submit = true;
    }

    /// The next fence wait times out, whatever the fence state
    pub fn fail_next_fence_wait(&self) {
        self.state.lock().fail_next_fence_wait = true;
    }

    pub fn fail_next_fence_create(&self) {
        self.state.lock().fail_next_fence_create = true;
    }

    pub fn fail_next_pipeline(&self) {
        self.state.lock().fail_next_pipeline = true;
    }

    pub fn is_signaled(&self, semaphore: vk::Semaphore) -> bool {
        self.state.lock().semaphores.get(&semaphore).copied().unwrap_or(false)
    }

    pub fn events(&self) -> Vec<GpuEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn live_of(&self, kind: &str) -> usize {
        self.state.lock().live.values().filter(|k| **k == kind).count()
    }

    pub fn destroyed(&self) -> Vec<u64> {
        self.state.lock().destroyed.clone()
    }

    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.state.lock().live.contains_key(&handle.as_raw())
    }

    pub fn swapchain_extent(&self, swapchain: vk::SwapchainKHR) -> Option<vk::Extent2D> {
        self.state.lock().swapchains.get(&swapchain).map(|s| s.extent)
    }

    pub fn read_memory(&self, memory: vk::DeviceMemory) -> Vec<u8> {
        self.state.lock().memory.get(&memory).cloned().unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // INTERNALS
    // ─────────────────────────────────────────────────────────────────────────

    fn create<H: Handle>(&self, kind: &'static str) -> H {
        let mut state = self.state.lock();
        state.next_handle += 1;
        let raw = state.next_handle;
        state.live.insert(raw, kind);
        H::from_raw(raw)
    }

    fn release<H: Handle>(&self, handle: H, kind: &'static str) {
        let raw = handle.as_raw();
        let mut state = self.state.lock();
        match state.live.remove(&raw) {
            Some(k) if k == kind => {}
            Some(k) => panic!("destroyed {raw:#x} as {kind}, but it is a {k}"),
            None => panic!("{kind} {raw:#x} destroyed twice or never created"),
        }
        state.destroyed.push(raw);
    }

    fn record(&self, event: GpuEvent) {
        self.state.lock().events.push(event);
    }

    fn allocate_memory(&self, size: usize) -> vk::DeviceMemory {
        let memory: vk::DeviceMemory = self.create("memory");
        self.state.lock().memory.insert(memory, vec![0; size]);
        memory
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.state.lock().memory.remove(&memory);
        self.release(memory, "memory");
    }

    fn signal(state: &mut MockState, semaphore: vk::Semaphore, by: &str) {
        match state.semaphores.get_mut(&semaphore) {
            Some(signaled) => {
                assert!(
                    !*signaled,
                    "{by} signals semaphore {:#x} that is already signaled",
                    semaphore.as_raw()
                );
                *signaled = true;
            }
            None => panic!("{by} signals unknown semaphore {:#x}", semaphore.as_raw()),
        }
    }

    fn consume(state: &mut MockState, semaphore: vk::Semaphore, by: &str) {
        match state.semaphores.get_mut(&semaphore) {
            Some(signaled) => {
                assert!(
                    *signaled,
                    "{by} waits on semaphore {:#x} that nothing signaled",
                    semaphore.as_raw()
                );
                *signaled = false;
            }
            None => panic!("{by} waits on unknown semaphore {:#x}", semaphore.as_raw()),
        }
    }

    /// Complete queued submissions in order up to and including `fence`
    fn retire_until(state: &mut MockState, fence: vk::Fence) {
        while let Some(done) = state.pending.pop_front() {
            state.fences.insert(done, FenceState::Signaled);
            if done == fence {
                break;
            }
        }
    }
}

impl GpuDevice for MockGpu {
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    fn limits(&self) -> vk::PhysicalDeviceLimits {
        vk::PhysicalDeviceLimits {
            min_uniform_buffer_offset_alignment: 256,
            max_sampler_anisotropy: 16.0,
            ..Default::default()
        }
    }

    fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        _tiling: vk::ImageTiling,
        _features: vk::FormatFeatureFlags,
    ) -> RenderResult<vk::Format> {
        candidates
            .first()
            .copied()
            .ok_or(RenderError::Initialization("no supported format".into()))
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<(vk::Buffer, vk::DeviceMemory)> {
        self.find_memory_type(0b11, properties)?;
        let buffer = self.create("buffer");
        Ok((buffer, self.allocate_memory(size as usize)))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) {
        self.release(buffer, "buffer");
        self.free_memory(memory);
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        _size: vk::DeviceSize,
    ) -> RenderResult<*mut u8> {
        let mut state = self.state.lock();
        let bytes = state
            .memory
            .get_mut(&memory)
            .ok_or(RenderError::InvalidState("mapping unknown memory"))?;
        // SAFETY: offset stays inside the allocation; the Vec is never resized
        Ok(unsafe { bytes.as_mut_ptr().add(offset as usize) })
    }

    fn unmap_memory(&self, _memory: vk::DeviceMemory) {}

    fn flush_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RenderResult<()> {
        let mut state = self.state.lock();
        let busy_fences = state.pending.iter().copied().collect();
        state.events.push(GpuEvent::Flush {
            memory,
            offset,
            size,
            busy_fences,
        });
        Ok(())
    }

    #[cfg(test)]
    fn invalidate_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RenderResult<()> {
        self.state.lock().events.push(GpuEvent::Invalidate {
            memory,
            offset,
            size,
        });
        Ok(())
    }

    fn create_image(
        &self,
        _desc: &ImageDesc,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<(vk::Image, vk::DeviceMemory)> {
        self.find_memory_type(0b11, properties)?;
        let image = self.create("image");
        Ok((image, self.allocate_memory(0)))
    }

    fn destroy_image(&self, image: vk::Image, memory: vk::DeviceMemory) {
        self.release(image, "image");
        self.free_memory(memory);
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> RenderResult<vk::ImageView> {
        Ok(self.create("image_view"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release(view, "image_view");
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> RenderResult<vk::Sampler> {
        Ok(self.create("sampler"))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.release(sampler, "sampler");
    }

    fn submit_one_shot(
        &self,
        record: &mut dyn FnMut(vk::CommandBuffer) -> RenderResult<()>,
    ) -> RenderResult<()> {
        let cmd: vk::CommandBuffer = self.create("command_buffer");
        let result = record(cmd);
        self.release(cmd, "command_buffer");
        result?;
        self.record(GpuEvent::OneShotSubmit);
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        self.record(GpuEvent::CopyBuffer { src, dst, size });
    }

    fn cmd_upload_image(
        &self,
        _cmd: vk::CommandBuffer,
        _staging: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
    ) {
        self.record(GpuEvent::Transition {
            image,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        });
        self.record(GpuEvent::CopyBufferToImage {
            image,
            width,
            height,
        });
        self.record(GpuEvent::Transition {
            image,
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        });
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let semaphore: vk::Semaphore = self.create("semaphore");
        self.state.lock().semaphores.insert(semaphore, false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().semaphores.remove(&semaphore);
        self.release(semaphore, "semaphore");
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        if std::mem::take(&mut self.state.lock().fail_next_fence_create) {
            return Err(RenderError::from_vk(
                "create_fence",
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ));
        }
        let fence: vk::Fence = self.create("fence");
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        self.state.lock().fences.insert(fence, state);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        {
            let mut state = self.state.lock();
            state.fences.remove(&fence);
            state.pending.retain(|f| *f != fence);
        }
        self.release(fence, "fence");
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> RenderResult<()> {
        let mut state = self.state.lock();
        state.events.push(GpuEvent::FenceWait(fence));
        if std::mem::take(&mut state.fail_next_fence_wait) {
            return Err(RenderError::AcquireTimeout);
        }
        match state.fences.get(&fence).copied() {
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Pending) => {
                Self::retire_until(&mut state, fence);
                Ok(())
            }
            // Reset but never submitted: a real wait would never return
            Some(FenceState::Unsignaled) => Err(RenderError::AcquireTimeout),
            None => panic!("waited on unknown fence {:#x}", fence.as_raw()),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        let mut state = self.state.lock();
        assert_ne!(
            state.fences.get(&fence),
            Some(&FenceState::Pending),
            "reset of a fence that is still in use"
        );
        state.fences.insert(fence, FenceState::Unsignaled);
        state.events.push(GpuEvent::FenceReset(fence));
        Ok(())
    }

    fn queue_submit(&self, submission: &FrameSubmission) -> RenderResult<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_submit) {
            return Err(RenderError::from_vk("queue_submit", vk::Result::ERROR_UNKNOWN));
        }
        assert_eq!(
            state.fences.get(&submission.fence),
            Some(&FenceState::Unsignaled),
            "submitted with a fence that was not reset"
        );
        Self::consume(&mut state, submission.wait_semaphore, "submit");
        Self::signal(&mut state, submission.signal_semaphore, "submit");
        state.fences.insert(submission.fence, FenceState::Pending);
        state.pending.push_back(submission.fence);
        state.events.push(GpuEvent::Submit {
            command_buffer: submission.command_buffer,
            fence: submission.fence,
        });
        Ok(())
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let mut state = self.state.lock();
        while let Some(done) = state.pending.pop_front() {
            state.fences.insert(done, FenceState::Signaled);
        }
        state.events.push(GpuEvent::WaitIdle);
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RenderResult<vk::DescriptorSetLayout> {
        Ok(self.create("descriptor_set_layout"))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.release(layout, "descriptor_set_layout");
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
        _flags: vk::DescriptorPoolCreateFlags,
    ) -> RenderResult<vk::DescriptorPool> {
        let pool: vk::DescriptorPool = self.create("descriptor_pool");
        self.state.lock().pools.insert(
            pool,
            PoolState {
                max_sets,
                allocated: 0,
            },
        );
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.lock().pools.remove(&pool);
        self.release(pool, "descriptor_pool");
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> RenderResult<vk::DescriptorSet> {
        let mut state = self.state.lock();
        let pool = state.pools.entry(pool).or_default();
        if pool.allocated >= pool.max_sets {
            return Err(RenderError::from_vk(
                "allocate_descriptor_sets",
                vk::Result::ERROR_OUT_OF_POOL_MEMORY,
            ));
        }
        pool.allocated += 1;
        state.next_handle += 1;
        Ok(vk::DescriptorSet::from_raw(state.next_handle))
    }

    #[cfg(test)]
    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> RenderResult<()> {
        let mut state = self.state.lock();
        let pool = state.pools.entry(pool).or_default();
        pool.allocated = pool.allocated.saturating_sub(sets.len() as u32);
        Ok(())
    }

    #[cfg(test)]
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RenderResult<()> {
        self.state.lock().pools.entry(pool).or_default().allocated = 0;
        Ok(())
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        self.record(GpuEvent::DescriptorUpdate(writes.len()));
    }

    fn surface_info(&self) -> RenderResult<SurfaceInfo> {
        let extent = self.state.lock().surface_extent;
        Ok(SurfaceInfo {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: extent,
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 8192,
                    height: 8192,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        })
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR> {
        if desc.old_swapchain != vk::SwapchainKHR::null() {
            assert!(
                self.is_live(desc.old_swapchain),
                "old_swapchain hint refers to a destroyed chain"
            );
        }
        let swapchain: vk::SwapchainKHR = self.create("swapchain");
        let mut state = self.state.lock();
        let images = (0..desc.image_count)
            .map(|_| {
                state.next_handle += 1;
                vk::Image::from_raw(state.next_handle)
            })
            .collect();
        state.swapchains.insert(
            swapchain,
            MockSwapchain {
                extent: desc.extent,
                images,
                next_image: 0,
            },
        );
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>> {
        self.state
            .lock()
            .swapchains
            .get(&swapchain)
            .map(|s| s.images.clone())
            .ok_or(RenderError::InvalidState("unknown swap chain"))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.state.lock().swapchains.remove(&swapchain);
        self.release(swapchain, "swapchain");
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RenderResult<(u32, bool)> {
        let mut state = self.state.lock();
        let suboptimal = match state.acquire_script.pop_front() {
            Some(Scripted::OutOfDate) => return Err(RenderError::SwapChainOutOfDate),
            Some(Scripted::Timeout) => return Err(RenderError::AcquireTimeout),
            Some(Scripted::Suboptimal) => true,
            None => false,
        };
        let chain = state
            .swapchains
            .get_mut(&swapchain)
            .ok_or(RenderError::InvalidState("unknown swap chain"))?;
        let image_index = chain.next_image;
        chain.next_image = (chain.next_image + 1) % chain.images.len() as u32;
        Self::signal(&mut state, signal, "acquire");
        state.events.push(GpuEvent::Acquire {
            swapchain,
            image_index,
        });
        Ok((image_index, suboptimal))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RenderResult<bool> {
        let mut state = self.state.lock();
        // The wait executes even when the presentation engine rejects the image
        Self::consume(&mut state, wait, "present");
        state.events.push(GpuEvent::Present {
            swapchain,
            image_index,
        });
        match state.present_script.pop_front() {
            Some(Scripted::OutOfDate) => Err(RenderError::SwapChainOutOfDate),
            Some(Scripted::Timeout) => Err(RenderError::AcquireTimeout),
            Some(Scripted::Suboptimal) => Ok(true),
            None => Ok(false),
        }
    }

    fn create_render_pass(
        &self,
        _color_format: vk::Format,
        _depth_format: vk::Format,
    ) -> RenderResult<vk::RenderPass> {
        Ok(self.create("render_pass"))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.release(render_pass, "render_pass");
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer> {
        Ok(self.create("framebuffer"))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release(framebuffer, "framebuffer");
    }

    fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>> {
        Ok((0..count).map(|_| self.create("command_buffer")).collect())
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        for &cmd in buffers {
            self.release(cmd, "command_buffer");
        }
    }

    fn begin_command_buffer(&self, _cmd: vk::CommandBuffer) -> RenderResult<()> {
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> RenderResult<()> {
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        _cmd: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        _clear_color: [f32; 4],
    ) {
        self.record(GpuEvent::BeginRenderPass {
            framebuffer,
            extent,
        });
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {}

    fn cmd_set_viewport_scissor(&self, _cmd: vk::CommandBuffer, _extent: vk::Extent2D) {}

    fn create_shader_module(&self, _code: &[u32]) -> RenderResult<vk::ShaderModule> {
        Ok(self.create("shader_module"))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.release(module, "shader_module");
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constants: &[vk::PushConstantRange],
    ) -> RenderResult<vk::PipelineLayout> {
        Ok(self.create("pipeline_layout"))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.release(layout, "pipeline_layout");
    }

    fn create_graphics_pipeline(
        &self,
        _desc: &GraphicsPipelineDesc<'_>,
    ) -> RenderResult<vk::Pipeline> {
        if std::mem::take(&mut self.state.lock().fail_next_pipeline) {
            return Err(RenderError::from_vk(
                "create_graphics_pipelines",
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ));
        }
        Ok(self.create("pipeline"))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.release(pipeline, "pipeline");
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, _pipeline: vk::Pipeline) {}

    fn cmd_bind_descriptor_set(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _set: vk::DescriptorSet,
    ) {
    }

    fn cmd_push_constants(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _data: &[u8],
    ) {
    }

    fn cmd_bind_vertex_buffer(&self, _cmd: vk::CommandBuffer, _buffer: vk::Buffer) {}

    fn cmd_bind_index_buffer(&self, _cmd: vk::CommandBuffer, _buffer: vk::Buffer) {}

    fn cmd_draw(&self, _cmd: vk::CommandBuffer, vertex_count: u32) {
        self.record(GpuEvent::Draw(vertex_count));
    }

    fn cmd_draw_indexed(&self, _cmd: vk::CommandBuffer, index_count: u32) {
        self.record(GpuEvent::Draw(index_count));
    }
}
