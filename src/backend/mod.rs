// Backend module - Vulkan abstraction layer
//
// Design: RAII wrappers over a `GpuDevice` trait object. `VulkanDevice` is
// the ash implementation; tests swap in the recording `MockGpu`.

pub mod buffer;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod gpu;
#[cfg(test)]
pub mod mock;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use buffer::Buffer;
pub use descriptors::{DescriptorPool, DescriptorSetLayout, DescriptorWriter};
pub use device::{DeviceSettings, VulkanDevice};
pub use error::{RenderError, RenderResult};
pub use gpu::GpuDevice;
pub use pipeline::{Pipeline, PipelineConfig};
pub use swapchain::{PresentStatus, Swapchain, SwapchainSettings, SwapchainState};
pub use texture::{Texture, TexturePixels};
