// Graphics pipeline configuration and ownership
//
// The pipeline defines how vertices are processed and rasterized: vertex
// input, shaders, rasterization, depth test and blending. `PipelineConfig`
// is plain data; the device turns it into Vulkan create-info structs.

use ash::vk;
use std::sync::Arc;

use super::error::RenderResult;
use super::gpu::{GpuDevice, GraphicsPipelineDesc};
use super::shader::ShaderModule;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub binding_descriptions: Vec<vk::VertexInputBindingDescription>,
    pub attribute_descriptions: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
    pub blend_enable: bool,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub subpass: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            binding_descriptions: Vec::new(),
            attribute_descriptions: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            // Depth testing - closer fragments win
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS,
            blend_enable: false,
            // Viewport and scissor follow the swap chain extent without a rebuild
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            subpass: 0,
        }
    }
}

impl PipelineConfig {
    pub fn with_vertex_input(
        mut self,
        bindings: Vec<vk::VertexInputBindingDescription>,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> Self {
        self.binding_descriptions = bindings;
        self.attribute_descriptions = attributes;
        self
    }
}

pub struct Pipeline {
    pipeline: vk::Pipeline,
    device: Arc<dyn GpuDevice>,
}

impl Pipeline {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        config: &PipelineConfig,
        vertex_code: &[u32],
        fragment_code: &[u32],
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> RenderResult<Self> {
        // Modules are only needed until the pipeline exists
        let vertex = ShaderModule::new(device.clone(), vertex_code)?;
        let fragment = ShaderModule::new(device.clone(), fragment_code)?;

        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDesc {
            config,
            vertex_shader: vertex.handle(),
            fragment_shader: fragment.handle(),
            layout,
            render_pass,
        })?;

        Ok(Self { pipeline, device })
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        self.device.cmd_bind_pipeline(cmd, self.pipeline);
    }

    #[cfg(test)]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.device.destroy_pipeline(self.pipeline);
    }
}
