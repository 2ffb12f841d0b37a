// Simple render system
//
// One pipeline, one global descriptor set, one push-constant block per
// object. Objects without a model are skipped.

use ash::vk;
use std::mem::size_of;
use std::sync::Arc;

use super::frame::{FrameInfo, PushConstantData};
use super::model::Vertex;
use super::scene::GameObject;
use crate::backend::{GpuDevice, Pipeline, PipelineConfig, RenderResult};

const PUSH_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// Pipeline layout that is destroyed when dropped
struct OwnedLayout {
    layout: vk::PipelineLayout,
    device: Arc<dyn GpuDevice>,
}

impl Drop for OwnedLayout {
    fn drop(&mut self) {
        self.device.destroy_pipeline_layout(self.layout);
    }
}

/// Fields drop top to bottom: the pipeline goes before the layout it was
/// built against.
pub struct SimpleRenderSystem {
    pipeline: Pipeline,
    layout: OwnedLayout,
    device: Arc<dyn GpuDevice>,
}

impl SimpleRenderSystem {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        render_pass: vk::RenderPass,
        global_set_layout: vk::DescriptorSetLayout,
        vertex_code: &[u32],
        fragment_code: &[u32],
    ) -> RenderResult<Self> {
        let push_constant_range = vk::PushConstantRange {
            stage_flags: PUSH_STAGES,
            offset: 0,
            size: size_of::<PushConstantData>() as u32,
        };
        let layout = OwnedLayout {
            layout: device.create_pipeline_layout(&[global_set_layout], &[push_constant_range])?,
            device: device.clone(),
        };

        // The layout is released again if the pipeline cannot be built
        let config = PipelineConfig::default()
            .with_vertex_input(Vertex::binding_descriptions(), Vertex::attribute_descriptions());
        let pipeline = Pipeline::new(
            device.clone(),
            &config,
            vertex_code,
            fragment_code,
            layout.layout,
            render_pass,
        )?;

        Ok(Self {
            pipeline,
            layout,
            device,
        })
    }

    pub fn render(&self, frame: &FrameInfo, objects: &[GameObject]) {
        let cmd = frame.command_buffer;
        let layout = self.layout.layout;

        self.pipeline.bind(cmd);
        self.device
            .cmd_bind_descriptor_set(cmd, layout, frame.global_descriptor_set);

        for object in objects {
            let Some(model) = &object.model else {
                continue;
            };
            let push = PushConstantData {
                model_matrix: object.transform.mat4(),
                normal_matrix: object.transform.normal_matrix(),
            };
            self.device
                .cmd_push_constants(cmd, layout, PUSH_STAGES, bytemuck::bytes_of(&push));
            model.bind(cmd);
            model.draw(cmd);
        }
    }
}
