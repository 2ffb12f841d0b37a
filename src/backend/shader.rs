// Shader module loading
//
// SPIR-V is read at runtime (build.rs compiles the GLSL sources when glslc is
// available) and wrapped in an RAII module that lives until the pipeline using
// it has been created.

use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::error::{RenderError, RenderResult};
use super::gpu::GpuDevice;

/// Decode SPIR-V bytes into aligned words, checking the magic number
pub fn read_spirv(bytes: &[u8]) -> RenderResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| RenderError::Initialization(format!("invalid SPIR-V: {}", e)))
}

pub fn load_spirv<P: AsRef<Path>>(path: P) -> RenderResult<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| {
        RenderError::Initialization(format!("failed to read shader {}: {}", path.display(), e))
    })?;
    read_spirv(&bytes)
}

pub struct ShaderModule {
    module: vk::ShaderModule,
    device: Arc<dyn GpuDevice>,
}

impl ShaderModule {
    pub fn new(device: Arc<dyn GpuDevice>, code: &[u32]) -> RenderResult<Self> {
        let module = device.create_shader_module(code)?;
        Ok(Self { module, device })
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.device.destroy_shader_module(self.module);
    }
}
