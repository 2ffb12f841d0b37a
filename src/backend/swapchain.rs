// Swapchain - Window presentation
//
// Owns the chain of presentable images plus everything sized to them: image
// views, per-image depth buffers, the render pass and framebuffers. Also owns
// the frame slots (fences + semaphores) that pace the CPU against the GPU.
//
// FRAME PROTOCOL:
// ┌──────────────────────────────────────────────────────────────────────────┐
// │ acquire_next_image: wait slot fence ─> acquire (signal image_available)  │
// │ submit_command_buffers: wait image fence ─> reset slot fence ─> submit   │
// │                         ─> present (wait render_finished) ─> next slot   │
// └──────────────────────────────────────────────────────────────────────────┘
//
// The slot index advances after every submit attempt, successful or not. A
// frame that fails anywhere between acquire and submit leaves the chain stale;
// its slot is rearmed by the replacement chain, after the device went idle.

use ash::vk;
use std::sync::Arc;

use super::error::{RenderError, RenderResult};
use super::gpu::{FrameSubmission, GpuDevice, ImageDesc, SwapchainDesc};
use super::sync::FrameSync;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

#[derive(Debug, Clone, Copy)]
pub struct SwapchainSettings {
    pub window_extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub frames_in_flight: usize,
    pub acquire_timeout_ns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Ready,
    /// An image is acquired and waiting for submit + present
    Presenting,
    /// The last acquire failed without touching the chain; retry is allowed
    AcquireFailed,
    /// Out of date or suboptimal; must be recreated
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub suboptimal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
}

struct DepthAttachment {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

pub struct Swapchain {
    handle: vk::SwapchainKHR,
    image_format: vk::Format,
    depth_format: vk::Format,
    extent: vk::Extent2D,

    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth_attachments: Vec<DepthAttachment>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,

    // ─────────────────────────────────────────────────────────────────────────
    // SYNCHRONIZATION
    // ─────────────────────────────────────────────────────────────────────────
    frames: Vec<FrameSync>,
    /// Fence of the slot that last rendered into each image
    images_in_flight: Vec<Option<vk::Fence>>,
    current_frame: usize,
    state: SwapchainState,
    acquire_timeout_ns: u64,

    device: Arc<dyn GpuDevice>,
}

impl Swapchain {
    pub fn new(device: Arc<dyn GpuDevice>, settings: &SwapchainSettings) -> RenderResult<Self> {
        Self::build(device, settings, None)
    }

    /// Build a replacement chain, taking over the frame slots of `previous`.
    ///
    /// The caller must have waited for the device to go idle. `previous` is
    /// handed to the driver as the old chain and released once the new one
    /// exists.
    pub fn from_previous(
        device: Arc<dyn GpuDevice>,
        settings: &SwapchainSettings,
        previous: Swapchain,
    ) -> RenderResult<Self> {
        Self::build(device, settings, Some(previous))
    }

    fn build(
        device: Arc<dyn GpuDevice>,
        settings: &SwapchainSettings,
        previous: Option<Swapchain>,
    ) -> RenderResult<Self> {
        // Every handle starts null; Drop releases whatever was created if a
        // later step fails
        let mut chain = Self {
            handle: vk::SwapchainKHR::null(),
            image_format: vk::Format::UNDEFINED,
            depth_format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            image_views: Vec::new(),
            depth_attachments: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            frames: Vec::new(),
            images_in_flight: Vec::new(),
            current_frame: 0,
            state: SwapchainState::Ready,
            acquire_timeout_ns: settings.acquire_timeout_ns,
            device,
        };

        let old_handle = previous
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |p| p.handle);

        chain.create_swapchain(settings, old_handle)?;
        chain.create_image_views()?;
        chain.depth_format = chain.device.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        chain.render_pass = chain
            .device
            .create_render_pass(chain.image_format, chain.depth_format)?;
        chain.create_depth_resources()?;
        chain.create_framebuffers()?;

        match previous {
            Some(mut previous) => {
                if !previous.formats_match(&chain) {
                    return Err(RenderError::FormatChanged);
                }
                chain.frames = std::mem::take(&mut previous.frames);
                chain.current_frame = previous.current_frame;
                // `previous` drops here and releases its own resources
            }
            None => {
                let count = settings.frames_in_flight.max(1);
                for _ in 0..count {
                    chain.frames.push(FrameSync::new(chain.device.clone())?);
                }
            }
        }
        chain.images_in_flight = vec![None; chain.images.len()];

        // Slots abandoned by the old chain still hold an acquire signal that
        // nothing will wait on; the device is idle, so they can be replaced
        for (slot, frame) in chain.frames.iter_mut().enumerate() {
            if frame.needs_rearm() {
                log::debug!("Rearming frame slot {}", slot);
                frame.rearm()?;
            }
        }

        log::info!(
            "Created swapchain: {}x{}, {} images, {} frames in flight",
            chain.extent.width,
            chain.extent.height,
            chain.images.len(),
            chain.frames.len()
        );
        Ok(chain)
    }

    fn create_swapchain(
        &mut self,
        settings: &SwapchainSettings,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<()> {
        let surface = self.device.surface_info()?;
        let caps = surface.capabilities;

        // Choose surface format (prefer SRGB)
        let surface_format = surface
            .formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| surface.formats.first())
            .copied()
            .ok_or_else(|| RenderError::Initialization("surface reports no formats".into()))?;

        // FIFO is always supported
        let present_mode = if surface.present_modes.contains(&settings.present_mode) {
            settings.present_mode
        } else {
            log::warn!(
                "Present mode {:?} not supported, falling back to FIFO",
                settings.present_mode
            );
            vk::PresentModeKHR::FIFO
        };
        log::info!("Present mode: {:?}", present_mode);

        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: settings
                    .window_extent
                    .width
                    .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: settings
                    .window_extent
                    .height
                    .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };

        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }

        self.handle = self.device.create_swapchain(&SwapchainDesc {
            surface_format,
            present_mode,
            extent,
            image_count,
            pre_transform: caps.current_transform,
            old_swapchain,
        })?;
        self.images = self.device.swapchain_images(self.handle)?;
        self.image_format = surface_format.format;
        self.extent = extent;
        Ok(())
    }

    fn create_image_views(&mut self) -> RenderResult<()> {
        for i in 0..self.images.len() {
            let view = self.device.create_image_view(
                self.images[i],
                self.image_format,
                vk::ImageAspectFlags::COLOR,
            )?;
            self.image_views.push(view);
        }
        Ok(())
    }

    fn create_depth_resources(&mut self) -> RenderResult<()> {
        let desc = ImageDesc {
            width: self.extent.width,
            height: self.extent.height,
            format: self.depth_format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        };

        for _ in 0..self.images.len() {
            let (image, memory) = self
                .device
                .create_image(&desc, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
            let view = match self.device.create_image_view(
                image,
                self.depth_format,
                vk::ImageAspectFlags::DEPTH,
            ) {
                Ok(view) => view,
                Err(err) => {
                    self.device.destroy_image(image, memory);
                    return Err(err);
                }
            };
            self.depth_attachments.push(DepthAttachment {
                image,
                memory,
                view,
            });
        }
        Ok(())
    }

    fn create_framebuffers(&mut self) -> RenderResult<()> {
        for i in 0..self.images.len() {
            let attachments = [self.image_views[i], self.depth_attachments[i].view];
            let framebuffer =
                self.device
                    .create_framebuffer(self.render_pass, &attachments, self.extent)?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    // =========================================================================
    // FRAME PROTOCOL
    // =========================================================================

    /// Wait for the current slot to retire, then acquire the next image.
    ///
    /// Errors: `SwapChainOutOfDate` (chain becomes stale), `AcquireTimeout`
    /// (retry allowed), `InvalidState` if an image is already acquired.
    pub fn acquire_next_image(&mut self) -> RenderResult<AcquiredImage> {
        match self.state {
            SwapchainState::Presenting => {
                return Err(RenderError::InvalidState("an image is already acquired"))
            }
            SwapchainState::Stale => return Err(RenderError::SwapChainOutOfDate),
            SwapchainState::Ready | SwapchainState::AcquireFailed => {}
        }

        let frame = &self.frames[self.current_frame];
        if let Err(err) = self
            .device
            .wait_for_fence(frame.in_flight, self.acquire_timeout_ns)
        {
            self.state = SwapchainState::AcquireFailed;
            return Err(err);
        }

        match self.device.acquire_next_image(
            self.handle,
            self.acquire_timeout_ns,
            frame.image_available,
        ) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Acquired image {} from a suboptimal swapchain", index);
                }
                self.state = SwapchainState::Presenting;
                Ok(AcquiredImage { index, suboptimal })
            }
            Err(RenderError::SwapChainOutOfDate) => {
                self.state = SwapchainState::Stale;
                Err(RenderError::SwapChainOutOfDate)
            }
            Err(err) => {
                self.state = SwapchainState::AcquireFailed;
                Err(err)
            }
        }
    }

    /// Submit `cmd` for the acquired image and present it.
    ///
    /// The frame slot advances whatever the outcome. Any error leaves the
    /// chain stale so the caller recreates it after waiting for the device.
    pub fn submit_command_buffers(
        &mut self,
        cmd: vk::CommandBuffer,
        image_index: u32,
    ) -> RenderResult<PresentStatus> {
        if self.state != SwapchainState::Presenting {
            return Err(RenderError::InvalidState("submit without an acquired image"));
        }

        let slot = self.current_frame;
        let result = self.submit_and_present(slot, cmd, image_index);
        self.current_frame = (slot + 1) % self.frames.len();

        self.state = match &result {
            Ok(PresentStatus::Optimal) => SwapchainState::Ready,
            Ok(PresentStatus::Suboptimal) | Err(_) => SwapchainState::Stale,
        };
        result
    }

    fn submit_and_present(
        &mut self,
        slot: usize,
        cmd: vk::CommandBuffer,
        image_index: u32,
    ) -> RenderResult<PresentStatus> {
        // Until the submit is queued, a failure strands the acquired image and
        // the slot's acquire signal
        if let Err(err) = self.submit(slot, cmd, image_index) {
            log::warn!("Abandoning frame slot {}: {}", slot, err);
            self.frames[slot].abandon();
            return Err(err);
        }

        let frame = &self.frames[slot];
        match self
            .device
            .queue_present(self.handle, image_index, frame.render_finished)?
        {
            false => Ok(PresentStatus::Optimal),
            true => Ok(PresentStatus::Suboptimal),
        }
    }

    fn submit(&mut self, slot: usize, cmd: vk::CommandBuffer, image_index: u32) -> RenderResult<()> {
        let image = image_index as usize;
        if image >= self.images.len() {
            return Err(RenderError::InvalidState("image index out of range"));
        }

        // A previous frame may still be rendering into this image
        if let Some(fence) = self.images_in_flight[image] {
            self.device.wait_for_fence(fence, self.acquire_timeout_ns)?;
        }

        let frame = &self.frames[slot];
        self.device.reset_fence(frame.in_flight)?;
        self.device.queue_submit(&FrameSubmission {
            command_buffer: cmd,
            wait_semaphore: frame.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: frame.render_finished,
            fence: frame.in_flight,
        })?;
        self.images_in_flight[image] = Some(frame.in_flight);
        Ok(())
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Both chains use the same color and depth formats
    pub fn formats_match(&self, other: &Swapchain) -> bool {
        self.image_format == other.image_format && self.depth_format == other.depth_format
    }

    #[cfg(test)]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn extent_aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }

    #[cfg(test)]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[cfg(test)]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    #[cfg(test)]
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    /// Force recreation before the next acquire
    pub fn mark_stale(&mut self) {
        if self.state != SwapchainState::Presenting {
            self.state = SwapchainState::Stale;
        }
    }

    #[cfg(test)]
    pub(crate) fn slot_fences(&self) -> Vec<vk::Fence> {
        self.frames.iter().map(|f| f.in_flight).collect()
    }

    #[cfg(test)]
    pub(crate) fn slot_semaphores(&self) -> Vec<vk::Semaphore> {
        self.frames.iter().map(|f| f.image_available).collect()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            self.device.destroy_framebuffer(framebuffer);
        }
        if self.render_pass != vk::RenderPass::null() {
            self.device.destroy_render_pass(self.render_pass);
        }
        for depth in self.depth_attachments.drain(..) {
            self.device.destroy_image_view(depth.view);
            self.device.destroy_image(depth.image, depth.memory);
        }
        for view in self.image_views.drain(..) {
            self.device.destroy_image_view(view);
        }
        if self.handle != vk::SwapchainKHR::null() {
            self.device.destroy_swapchain(self.handle);
        }
        // Frame slots (if still owned) are released by FrameSync's Drop
    }
}
