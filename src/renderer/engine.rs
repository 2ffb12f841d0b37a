// =============================================================================
// ENGINE - Per-iteration driver
// =============================================================================
//
// Owns everything a frame needs beyond the swap chain: a uniform buffer with
// one aligned instance and one descriptor set per frame slot, the default
// texture, the render system, the scene and the viewer.
//
// TICK:
// ┌──────────────────────────────────────────────────────────────────────────┐
// │ controller ─> camera ─> begin_frame ─> write slot UBO ─> flush slot      │
// │   ─> render pass { draw objects } ─> end_frame (submit + present)        │
// └──────────────────────────────────────────────────────────────────────────┘
//
// A slot's uniforms are only written after `begin_frame` returned that slot,
// which means the GPU has retired the slot's previous frame.

use anyhow::Context;
use ash::vk;
use glam::Vec3;
use std::mem::size_of;
use std::sync::Arc;

use super::camera::Camera;
use super::frame::{FrameInfo, GlobalUbo};
use super::input::{InputState, KeyboardController};
use super::model::{MeshData, Model};
use super::render_system::SimpleRenderSystem;
use super::renderer::Renderer;
use super::scene::{Scene, Transform};
use crate::backend::shader::load_spirv;
use crate::backend::{
    Buffer, DescriptorPool, DescriptorSetLayout, DescriptorWriter, GpuDevice, RenderResult,
    SwapchainSettings, Texture, TexturePixels,
};
use crate::config::{Config, ModelEntry, SceneConfig};

/// Where the viewer starts: behind the origin, slightly raised, looking down
const VIEWER_START: Vec3 = Vec3::new(0.0, -2.0, 1.0);
const VIEWER_START_PITCH: f32 = 0.4;

// =============================================================================
// SETTINGS & ASSETS
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub swapchain: SwapchainSettings,
    pub clear_color: [f32; 4],
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub move_speed: f32,
    pub look_speed: f32,
}

impl EngineSettings {
    pub fn from_config(config: &Config, window_extent: vk::Extent2D) -> Self {
        Self {
            swapchain: SwapchainSettings {
                window_extent,
                present_mode: config.get_present_mode(),
                frames_in_flight: config.graphics.max_frames_in_flight,
                acquire_timeout_ns: config.acquire_timeout_ns(),
            },
            clear_color: config.graphics.clear_color,
            fov_degrees: config.camera.fov_degrees,
            near: config.camera.near,
            far: config.camera.far,
            move_speed: config.camera.move_speed,
            look_speed: config.camera.look_speed,
        }
    }
}

/// Everything read from disk before the GPU side is built
pub struct SceneAssets {
    pub meshes: Vec<(MeshData, Transform)>,
    pub texture: Option<TexturePixels>,
    pub vertex_shader: Vec<u32>,
    pub fragment_shader: Vec<u32>,
}

impl SceneAssets {
    pub fn load(config: &SceneConfig) -> anyhow::Result<Self> {
        let mut meshes = Vec::with_capacity(config.models.len().max(1));
        for entry in &config.models {
            let mesh = MeshData::load_obj(&entry.path)?;
            meshes.push((mesh, entry_transform(entry)));
        }
        if meshes.is_empty() {
            log::info!("No models configured, using the built-in cube");
            meshes.push((MeshData::cube(), Transform::default()));
        }

        let texture = config
            .texture
            .as_ref()
            .map(|path| {
                TexturePixels::load(path).with_context(|| format!("Failed to load texture {:?}", path))
            })
            .transpose()?;

        let vertex_shader = load_spirv(&config.vertex_shader)
            .with_context(|| format!("Failed to load {:?}", config.vertex_shader))?;
        let fragment_shader = load_spirv(&config.fragment_shader)
            .with_context(|| format!("Failed to load {:?}", config.fragment_shader))?;

        Ok(Self {
            meshes,
            texture,
            vertex_shader,
            fragment_shader,
        })
    }
}

fn entry_transform(entry: &ModelEntry) -> Transform {
    Transform {
        translation: Vec3::from(entry.position),
        rotation: Vec3::from(entry.rotation.map(f32::to_radians)),
        scale: Vec3::from(entry.scale),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    /// Minimized, recreated or timed out; nothing was submitted
    Skipped,
}

// =============================================================================
// ENGINE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! Resources are released top to
/// bottom, which is the reverse of the order `new` creates them in.
pub struct Engine {
    // ─────────────────────────────────────────────────────────────────────────
    // SCENE & DRAWING
    // ─────────────────────────────────────────────────────────────────────────
    scene: Scene,
    render_system: SimpleRenderSystem,

    // ─────────────────────────────────────────────────────────────────────────
    // PER-SLOT GLOBALS
    // ─────────────────────────────────────────────────────────────────────────
    /// Freed with the pool
    global_sets: Vec<vk::DescriptorSet>,
    _global_pool: DescriptorPool,
    _global_layout: DescriptorSetLayout,
    _texture: Texture,
    /// One aligned `GlobalUbo` instance per slot
    ubo_buffer: Buffer,

    // ─────────────────────────────────────────────────────────────────────────
    // FRAME PROTOCOL
    // ─────────────────────────────────────────────────────────────────────────
    renderer: Renderer,

    // ─────────────────────────────────────────────────────────────────────────
    // VIEWER
    // ─────────────────────────────────────────────────────────────────────────
    camera: Camera,
    viewer: Transform,
    controller: KeyboardController,

    settings: EngineSettings,
    device: Arc<dyn GpuDevice>,
}

impl Engine {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        settings: EngineSettings,
        assets: &SceneAssets,
    ) -> RenderResult<Self> {
        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Swap chain, frame slots and command buffers
        // ─────────────────────────────────────────────────────────────────────
        let renderer = Renderer::new(device.clone(), settings.swapchain, settings.clear_color)?;
        let slots = renderer.frames_in_flight();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Persistently mapped uniforms, one instance per slot
        // ─────────────────────────────────────────────────────────────────────
        let mut ubo_buffer = Buffer::new(
            device.clone(),
            size_of::<GlobalUbo>() as vk::DeviceSize,
            slots as u32,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            device.limits().min_uniform_buffer_offset_alignment,
        )?;
        ubo_buffer.map()?;

        let texture = match &assets.texture {
            Some(pixels) => Texture::from_pixels(device.clone(), pixels)?,
            None => Texture::white(device.clone())?,
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Global descriptor sets (UBO + sampler) per slot
        // ─────────────────────────────────────────────────────────────────────
        let global_layout = DescriptorSetLayout::builder(device.clone())
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                1,
            )
            .add_binding(
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
                1,
            )
            .build()?;

        let global_pool = DescriptorPool::builder(device.clone())
            .max_sets(slots as u32)
            .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, slots as u32)
            .add_pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, slots as u32)
            .build()?;

        let global_sets = (0..slots as u32)
            .map(|slot| {
                DescriptorWriter::new(&global_layout, &global_pool)
                    .write_buffer(0, ubo_buffer.descriptor_info_for_index(slot))
                    .write_image(1, texture.descriptor_info())
                    .build()
            })
            .collect::<RenderResult<Vec<_>>>()?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Pipeline and scene
        // ─────────────────────────────────────────────────────────────────────
        let render_system = SimpleRenderSystem::new(
            device.clone(),
            renderer.swapchain_render_pass()?,
            global_layout.handle(),
            &assets.vertex_shader,
            &assets.fragment_shader,
        )?;

        let mut scene = Scene::default();
        for (mesh, transform) in &assets.meshes {
            let model = Arc::new(Model::new(device.clone(), mesh)?);
            scene.spawn(Some(model), *transform);
        }
        log::info!(
            "Scene ready: {} objects, {} frame slots",
            scene.objects().len(),
            slots
        );

        let viewer = Transform {
            translation: VIEWER_START,
            rotation: Vec3::new(VIEWER_START_PITCH, 0.0, 0.0),
            ..Default::default()
        };

        Ok(Self {
            scene,
            render_system,
            global_sets,
            _global_pool: global_pool,
            _global_layout: global_layout,
            _texture: texture,
            ubo_buffer,
            renderer,
            camera: Camera::new(),
            viewer,
            controller: KeyboardController::new(settings.move_speed, settings.look_speed),
            settings,
            device,
        })
    }

    /// Run one iteration of the render loop.
    ///
    /// `dt` is the time since the previous tick in seconds.
    pub fn tick(&mut self, dt: f32, input: &InputState) -> RenderResult<FrameOutcome> {
        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Move the viewer and aim the camera
        // ─────────────────────────────────────────────────────────────────────
        self.controller.update(dt, input, &mut self.viewer);
        let eye = self.viewer.translation;
        self.camera.look_at(eye, eye + self.viewer.forward(), Vec3::Z);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire (recreating the chain if needed)
        // ─────────────────────────────────────────────────────────────────────
        let Some(frame) = self.renderer.begin_frame()? else {
            return Ok(FrameOutcome::Skipped);
        };

        // After begin_frame so a just-recreated chain's extent is used
        self.camera.set_perspective_projection(
            self.settings.fov_degrees.to_radians(),
            self.renderer.aspect_ratio(),
            self.settings.near,
            self.settings.far,
        );

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Update this slot's uniforms
        // ─────────────────────────────────────────────────────────────────────
        let ubo = GlobalUbo::new(self.camera.projection_view());
        let slot = frame.frame_index as u32;
        self.ubo_buffer.write_to_index(bytemuck::bytes_of(&ubo), slot)?;
        self.ubo_buffer.flush_index(slot)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Record
        // ─────────────────────────────────────────────────────────────────────
        let cmd = frame.command_buffer;
        self.renderer.begin_swap_chain_render_pass(cmd)?;
        let info = FrameInfo {
            command_buffer: cmd,
            global_descriptor_set: self.global_sets[frame.frame_index],
        };
        self.render_system.render(&info, self.scene.objects());
        self.renderer.end_swap_chain_render_pass(cmd)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Submit and present
        // ─────────────────────────────────────────────────────────────────────
        self.renderer.end_frame()?;
        Ok(FrameOutcome::Rendered)
    }

    pub fn notify_resized(&mut self, width: u32, height: u32) {
        self.renderer.notify_resized(vk::Extent2D { width, height });
    }

    /// Wait for all submitted frames to finish
    pub fn shutdown(&self) -> RenderResult<()> {
        log::info!("Waiting for the GPU before shutdown");
        self.device.wait_idle()
    }

    #[cfg(test)]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::error!("wait_idle failed during engine teardown: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{GpuEvent, MockGpu, Scripted};

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn settings(frames_in_flight: usize) -> EngineSettings {
        let mut config = Config::default();
        config.graphics.max_frames_in_flight = frames_in_flight;
        EngineSettings::from_config(
            &config,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        )
    }

    fn assets(texture: Option<TexturePixels>) -> SceneAssets {
        SceneAssets {
            meshes: vec![(MeshData::cube(), Transform::default())],
            texture,
            vertex_shader: vec![SPIRV_MAGIC],
            fragment_shader: vec![SPIRV_MAGIC],
        }
    }

    fn engine(gpu: &Arc<MockGpu>, frames_in_flight: usize) -> Engine {
        Engine::new(gpu.clone(), settings(frames_in_flight), &assets(None)).unwrap()
    }

    fn count(events: &[GpuEvent], pred: impl Fn(&GpuEvent) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    #[test]
    fn tick_draws_scene_once_per_frame() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu, 2);
        gpu.clear_events();

        for _ in 0..3 {
            assert_eq!(
                engine.tick(0.016, &InputState::default()).unwrap(),
                FrameOutcome::Rendered
            );
        }
        let events = gpu.events();
        assert_eq!(count(&events, |e| *e == GpuEvent::Draw(36)), 3);
        assert_eq!(count(&events, |e| matches!(e, GpuEvent::Present { .. })), 3);
    }

    #[test]
    fn construction_writes_one_set_per_slot() {
        let gpu = MockGpu::new();
        let _engine = engine(&gpu, 3);
        let events = gpu.events();
        assert_eq!(count(&events, |e| *e == GpuEvent::DescriptorUpdate(2)), 3);
    }

    #[test]
    fn slot_uniforms_are_written_only_after_slot_retires() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu, 2);
        let fences = engine.renderer.swapchain().unwrap().slot_fences();
        let memory = engine.ubo_buffer.memory();
        let stride = engine.ubo_buffer.alignment_size();
        gpu.clear_events();

        for _ in 0..7 {
            engine.tick(0.016, &InputState::default()).unwrap();
        }

        let mut overlapped = false;
        let mut flushes = 0;
        for event in gpu.events() {
            if let GpuEvent::Flush {
                memory: flushed,
                offset,
                size,
                busy_fences,
            } = event
            {
                assert_eq!(flushed, memory);
                assert_eq!(size, stride);
                let slot = (offset / stride) as usize;
                assert!(
                    !busy_fences.contains(&fences[slot]),
                    "slot {slot} uniforms written while its frame was in flight"
                );
                overlapped |= !busy_fences.is_empty();
                flushes += 1;
            }
        }
        assert_eq!(flushes, 7);
        // The other slot's frame was still on the GPU, so frames did overlap
        assert!(overlapped);
    }

    #[test]
    fn uniform_buffer_holds_camera_matrix() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu, 2);
        engine.tick(0.0, &InputState::default()).unwrap();
        engine.tick(0.0, &InputState::default()).unwrap();

        let bytes = gpu.read_memory(engine.ubo_buffer.memory());
        let stride = engine.ubo_buffer.alignment_size() as usize;
        assert_eq!(bytes.len(), 2 * stride);
        // Each slot writes its own instance
        for slot in 0..2 {
            let start = slot * stride;
            let written: GlobalUbo =
                bytemuck::pod_read_unaligned(&bytes[start..start + size_of::<GlobalUbo>()]);
            assert_eq!(written.projection_view, engine.camera().projection_view());
            assert_eq!(written.light_direction, GlobalUbo::default_light_direction());
        }
    }

    #[test]
    fn resize_renders_at_new_extent() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu, 2);
        engine.tick(0.016, &InputState::default()).unwrap();

        gpu.set_surface_extent(1024, 768);
        engine.notify_resized(1024, 768);
        gpu.clear_events();
        assert_eq!(
            engine.tick(0.016, &InputState::default()).unwrap(),
            FrameOutcome::Rendered
        );

        let extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        assert!(gpu
            .events()
            .iter()
            .any(|e| matches!(e, GpuEvent::BeginRenderPass { extent: x, .. } if *x == extent)));
    }

    #[test]
    fn out_of_date_skips_one_frame() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu, 2);

        gpu.script_acquire(Scripted::OutOfDate);
        let input = InputState::default();
        assert_eq!(engine.tick(0.016, &input).unwrap(), FrameOutcome::Skipped);
        assert_eq!(engine.tick(0.016, &input).unwrap(), FrameOutcome::Rendered);
    }

    #[test]
    fn minimized_window_draws_nothing() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu, 2);
        engine.notify_resized(0, 0);
        gpu.clear_events();

        assert_eq!(
            engine.tick(0.016, &InputState::default()).unwrap(),
            FrameOutcome::Skipped
        );
        assert_eq!(count(&gpu.events(), |e| matches!(e, GpuEvent::Draw(_))), 0);
    }

    #[test]
    fn custom_texture_is_uploaded() {
        let gpu = MockGpu::new();
        let pixels = TexturePixels::solid(4, 2, [255, 0, 0, 255]);
        let _engine = Engine::new(gpu.clone(), settings(2), &assets(Some(pixels))).unwrap();
        assert_eq!(
            count(&gpu.events(), |e| matches!(
                e,
                GpuEvent::CopyBufferToImage {
                    width: 4,
                    height: 2,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn shutdown_waits_and_drop_releases_everything() {
        let gpu = MockGpu::new();
        let mut engine = engine(&gpu, 2);
        engine.tick(0.016, &InputState::default()).unwrap();

        gpu.clear_events();
        engine.shutdown().unwrap();
        assert_eq!(gpu.events(), vec![GpuEvent::WaitIdle]);

        drop(engine);
        assert_eq!(gpu.live_count(), 0);
    }

    #[test]
    fn model_entry_rotation_is_converted_to_radians() {
        let entry = ModelEntry {
            rotation: [90.0, 0.0, 180.0],
            ..Default::default()
        };
        let t = entry_transform(&entry);
        assert!((t.rotation.x - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert!((t.rotation.z - std::f32::consts::PI).abs() < 1e-6);
        assert_eq!(t.scale, Vec3::ONE);
    }
}
