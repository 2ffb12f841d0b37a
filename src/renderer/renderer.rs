// Renderer - Frame protocol around the swap chain
//
// Owns the swap chain and one primary command buffer per frame slot. A frame
// is bracketed by `begin_frame` / `end_frame`; everything recorded in between
// goes into the slot's command buffer.
//
// FRAME TIMELINE:
// ┌──────────────────────────────────────────────────────────────────────────┐
// │ begin_frame: recreate if stale ─> acquire ─> begin command buffer        │
// │   ... caller records render pass + draws ...                             │
// │ end_frame:   end command buffer ─> submit + present ─> recreate if stale │
// └──────────────────────────────────────────────────────────────────────────┘

use ash::vk;
use std::sync::Arc;

use crate::backend::{
    GpuDevice, PresentStatus, RenderError, RenderResult, Swapchain, SwapchainSettings,
    SwapchainState,
};

/// Handle to the frame between `begin_frame` and `end_frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToken {
    pub command_buffer: vk::CommandBuffer,
    pub frame_index: usize,
    pub image_index: u32,
    /// The image came from a chain that no longer matches the surface
    pub suboptimal: bool,
}

pub struct Renderer {
    // ─────────────────────────────────────────────────────────────────────────
    // PRESENTATION
    // ─────────────────────────────────────────────────────────────────────────
    swapchain: Option<Swapchain>,
    /// One per frame slot, indexed by the slot the swap chain waited on
    command_buffers: Vec<vk::CommandBuffer>,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE
    // ─────────────────────────────────────────────────────────────────────────
    settings: SwapchainSettings,
    clear_color: [f32; 4],
    current: Option<FrameToken>,
    /// Set by `notify_resized`; the chain is rebuilt at the next opportunity
    resized: bool,

    device: Arc<dyn GpuDevice>,
}

impl Renderer {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        settings: SwapchainSettings,
        clear_color: [f32; 4],
    ) -> RenderResult<Self> {
        let slots = settings.frames_in_flight.max(1);
        let command_buffers = device.allocate_command_buffers(slots as u32)?;

        let mut renderer = Self {
            swapchain: None,
            command_buffers,
            settings,
            clear_color,
            current: None,
            resized: false,
            device,
        };
        renderer.recreate_swapchain()?;
        Ok(renderer)
    }

    // =========================================================================
    // SWAP CHAIN LIFECYCLE
    // =========================================================================

    fn is_minimized(&self) -> bool {
        self.settings.window_extent.width == 0 || self.settings.window_extent.height == 0
    }

    /// Rebuild the chain for the current window extent.
    ///
    /// Does nothing while minimized; the pending resize is kept for later.
    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        if self.is_minimized() {
            log::debug!("Window minimized, deferring swapchain creation");
            return Ok(());
        }

        // Nothing may still reference the old chain's images
        self.device.wait_idle()?;

        let chain = match self.swapchain.take() {
            Some(previous) => {
                Swapchain::from_previous(self.device.clone(), &self.settings, previous)?
            }
            None => Swapchain::new(self.device.clone(), &self.settings)?,
        };
        self.swapchain = Some(chain);
        self.resized = false;
        Ok(())
    }

    /// Record the new window size; the chain is recreated before the next frame
    pub fn notify_resized(&mut self, extent: vk::Extent2D) {
        log::debug!("Resize to {}x{}", extent.width, extent.height);
        self.settings.window_extent = extent;
        self.resized = true;
        if let Some(chain) = self.swapchain.as_mut() {
            chain.mark_stale();
        }
    }

    // =========================================================================
    // FRAME PROTOCOL
    // =========================================================================

    /// Start a frame.
    ///
    /// Returns `None` when this iteration must be skipped: the window is
    /// minimized, the chain was just recreated, or the GPU timed out.
    pub fn begin_frame(&mut self) -> RenderResult<Option<FrameToken>> {
        if self.current.is_some() {
            return Err(RenderError::InvalidState("a frame is already in progress"));
        }
        if self.is_minimized() {
            return Ok(None);
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Make sure the chain matches the window
        // ─────────────────────────────────────────────────────────────────────
        let stale = self
            .swapchain
            .as_ref()
            .map_or(true, |chain| chain.state() == SwapchainState::Stale);
        if self.resized || stale {
            self.recreate_swapchain()?;
        }
        let Some(chain) = self.swapchain.as_mut() else {
            return Ok(None);
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Wait for this slot and acquire an image
        // ─────────────────────────────────────────────────────────────────────
        let acquired = match chain.acquire_next_image() {
            Ok(acquired) => acquired,
            Err(RenderError::SwapChainOutOfDate) => {
                self.recreate_swapchain()?;
                return Ok(None);
            }
            Err(RenderError::AcquireTimeout) => {
                log::warn!("Timed out acquiring a swapchain image, skipping frame");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Start recording into the slot's command buffer
        // ─────────────────────────────────────────────────────────────────────
        let frame_index = chain.current_frame() % self.command_buffers.len();
        let command_buffer = self.command_buffers[frame_index];
        self.device.begin_command_buffer(command_buffer)?;

        let token = FrameToken {
            command_buffer,
            frame_index,
            image_index: acquired.index,
            suboptimal: acquired.suboptimal,
        };
        self.current = Some(token);
        Ok(Some(token))
    }

    /// Finish recording, submit and present.
    ///
    /// Out-of-date, suboptimal or resized chains are rebuilt here, so the
    /// next `begin_frame` starts on a fresh chain. Other failures leave the
    /// chain stale and are returned; `begin_frame` rebuilds it.
    pub fn end_frame(&mut self) -> RenderResult<()> {
        let token = self
            .current
            .take()
            .ok_or(RenderError::InvalidState("end_frame without begin_frame"))?;
        let chain = self
            .swapchain
            .as_mut()
            .ok_or(RenderError::InvalidState("no swap chain"))?;

        self.device.end_command_buffer(token.command_buffer)?;

        match chain.submit_command_buffers(token.command_buffer, token.image_index) {
            Ok(PresentStatus::Optimal) if !self.resized && !token.suboptimal => Ok(()),
            Ok(_) | Err(RenderError::SwapChainOutOfDate) => self.recreate_swapchain(),
            Err(err) => Err(err),
        }
    }

    pub fn begin_swap_chain_render_pass(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        let token = self.frame_in_progress(cmd)?;
        let chain = self
            .swapchain
            .as_ref()
            .ok_or(RenderError::InvalidState("no swap chain"))?;

        let extent = chain.extent();
        self.device.cmd_begin_render_pass(
            cmd,
            chain.render_pass(),
            chain.framebuffer(token.image_index),
            extent,
            self.clear_color,
        );
        self.device.cmd_set_viewport_scissor(cmd, extent);
        Ok(())
    }

    pub fn end_swap_chain_render_pass(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        self.frame_in_progress(cmd)?;
        self.device.cmd_end_render_pass(cmd);
        Ok(())
    }

    fn frame_in_progress(&self, cmd: vk::CommandBuffer) -> RenderResult<FrameToken> {
        match self.current {
            Some(token) if token.command_buffer == cmd => Ok(token),
            Some(_) => Err(RenderError::InvalidState(
                "command buffer belongs to a different frame",
            )),
            None => Err(RenderError::InvalidState("no frame in progress")),
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Width over height of the chain, or 1.0 before a chain exists
    pub fn aspect_ratio(&self) -> f32 {
        match &self.swapchain {
            Some(chain) if chain.extent().height > 0 => chain.extent_aspect_ratio(),
            _ => 1.0,
        }
    }

    /// Slot of the frame in progress
    #[cfg(test)]
    pub fn frame_index(&self) -> RenderResult<usize> {
        self.current
            .map(|token| token.frame_index)
            .ok_or(RenderError::InvalidState("no frame in progress"))
    }

    #[cfg(test)]
    pub fn is_frame_in_progress(&self) -> bool {
        self.current.is_some()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.command_buffers.len()
    }

    pub fn swapchain_render_pass(&self) -> RenderResult<vk::RenderPass> {
        self.swapchain
            .as_ref()
            .map(Swapchain::render_pass)
            .ok_or(RenderError::InvalidState("no swap chain"))
    }

    #[cfg(test)]
    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::error!("wait_idle failed during renderer teardown: {}", err);
        }
        self.device.free_command_buffers(&self.command_buffers);
        // The swap chain and its frame slots drop after this
    }
}
