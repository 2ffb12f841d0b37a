// GPU device interface
//
// Everything above the device layer talks to the GPU through `GpuDevice`.
// `VulkanDevice` implements it on top of ash; tests drive the same code paths
// through a recording mock.

use ash::vk;

use super::error::{RenderError, RenderResult};
use super::pipeline::PipelineConfig;

/// Parameters for a 2D, single-mip, single-layer image
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
}

/// Surface properties queried before (re)creating a swap chain
#[derive(Debug, Clone)]
pub struct SurfaceInfo {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Previous chain handed to the driver for resource reuse
    pub old_swapchain: vk::SwapchainKHR,
}

/// One frame's queue submission
#[derive(Debug, Clone, Copy)]
pub struct FrameSubmission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

/// Resource bound by a single descriptor write
#[derive(Debug, Clone, Copy)]
pub enum DescriptorResource {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub resource: DescriptorResource,
}

/// Everything needed to build one graphics pipeline
pub struct GraphicsPipelineDesc<'a> {
    pub config: &'a PipelineConfig,
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
}

/// Pick the first memory type allowed by `type_bits` that has all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            let allowed = type_bits & (1 << i) != 0;
            allowed
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(RenderError::NoSuitableMemoryType {
            type_bits,
            properties,
        })
}

/// The GPU as seen by the renderer.
///
/// Handles are plain `vk` handles; ownership lives in the RAII wrappers of the
/// backend (`Buffer`, `Texture`, `FrameSync`, `Swapchain`, ...), which call
/// the matching `destroy_*` exactly once.
pub trait GpuDevice: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // PROPERTIES
    // ─────────────────────────────────────────────────────────────────────────
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties;
    fn limits(&self) -> vk::PhysicalDeviceLimits;
    fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> RenderResult<vk::Format>;

    fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<u32> {
        find_memory_type(self.memory_properties(), type_bits, properties)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // MEMORY, BUFFERS & IMAGES
    // ─────────────────────────────────────────────────────────────────────────
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<(vk::Buffer, vk::DeviceMemory)>;
    fn destroy_buffer(&self, buffer: vk::Buffer, memory: vk::DeviceMemory);
    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RenderResult<*mut u8>;
    fn unmap_memory(&self, memory: vk::DeviceMemory);
    fn flush_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RenderResult<()>;
    #[cfg(test)]
    fn invalidate_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RenderResult<()>;

    fn create_image(
        &self,
        desc: &ImageDesc,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<(vk::Image, vk::DeviceMemory)>;
    fn destroy_image(&self, image: vk::Image, memory: vk::DeviceMemory);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RenderResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> RenderResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // ─────────────────────────────────────────────────────────────────────────
    // ONE-SHOT TRANSFERS (blocking)
    // ─────────────────────────────────────────────────────────────────────────
    /// Record with `record`, submit, and wait for the queue to drain
    fn submit_one_shot(
        &self,
        record: &mut dyn FnMut(vk::CommandBuffer) -> RenderResult<()>,
    ) -> RenderResult<()>;
    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    );
    /// Copy tightly packed pixels from `staging` into the whole of `image`.
    ///
    /// Records the transition to a transfer target, the copy, and the
    /// transition to shader-read, in that order.
    fn cmd_upload_image(
        &self,
        cmd: vk::CommandBuffer,
        staging: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
    );

    // ─────────────────────────────────────────────────────────────────────────
    // SYNCHRONIZATION
    // ─────────────────────────────────────────────────────────────────────────
    fn create_semaphore(&self) -> RenderResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// `AcquireTimeout` if the fence is not signaled within `timeout_ns`
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RenderResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()>;
    fn queue_submit(&self, submission: &FrameSubmission) -> RenderResult<()>;
    fn wait_idle(&self) -> RenderResult<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // DESCRIPTORS
    // ─────────────────────────────────────────────────────────────────────────
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RenderResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        flags: vk::DescriptorPoolCreateFlags,
    ) -> RenderResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// `PoolExhausted` when the pool has no room left
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RenderResult<vk::DescriptorSet>;
    #[cfg(test)]
    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> RenderResult<()>;
    #[cfg(test)]
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RenderResult<()>;
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    // ─────────────────────────────────────────────────────────────────────────
    // SURFACE & SWAP CHAIN
    // ─────────────────────────────────────────────────────────────────────────
    fn surface_info(&self) -> RenderResult<SurfaceInfo>;
    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Returns `(image_index, suboptimal)`
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RenderResult<(u32, bool)>;
    /// Returns `true` when the presentation was suboptimal
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RenderResult<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // RENDER PASS & FRAMEBUFFERS
    // ─────────────────────────────────────────────────────────────────────────
    fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RenderResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // ─────────────────────────────────────────────────────────────────────────
    // COMMAND BUFFERS
    // ─────────────────────────────────────────────────────────────────────────
    fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]);
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RenderResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RenderResult<()>;
    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    );
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_set_viewport_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D);

    // ─────────────────────────────────────────────────────────────────────────
    // PIPELINES & DRAWING
    // ─────────────────────────────────────────────────────────────────────────
    fn create_shader_module(&self, code: &[u32]) -> RenderResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> RenderResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> RenderResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );
    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    );
    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32);
    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = f;
        }
        props
    }

    #[test]
    fn picks_first_type_with_all_flags() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b111, wanted).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
    }

    #[test]
    fn respects_type_bits() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            1
        );
    }

    #[test]
    fn no_match_reports_request() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        match err {
            RenderError::NoSuitableMemoryType { type_bits, properties } => {
                assert_eq!(type_bits, 1);
                assert_eq!(properties, vk::MemoryPropertyFlags::HOST_VISIBLE);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
