// Sampled 2D textures
//
// Pixel data is decoded to RGBA8, staged in host-visible memory and copied
// into a device-local optimal-tiling image. The layout transitions around the
// copy are recorded by the device as part of the upload itself.

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::buffer::Buffer;
use super::error::{RenderError, RenderResult};
use super::gpu::{GpuDevice, ImageDesc};

/// Decoded RGBA8 pixels, row-major, tightly packed
#[derive(Debug, Clone)]
pub struct TexturePixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TexturePixels {
    /// Decode an image file, forcing an alpha channel
    pub fn load<P: AsRef<Path>>(path: P) -> RenderResult<Self> {
        let path = path.as_ref();
        let decoded = image::open(path)
            .map_err(|e| RenderError::InvalidTexture(format!("{}: {}", path.display(), e)))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        Ok(Self {
            width,
            height,
            rgba: decoded.into_raw(),
        })
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self {
            width,
            height,
            rgba: rgba.repeat((width * height) as usize),
        }
    }

    fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

pub struct Texture {
    sampler: vk::Sampler,
    view: vk::ImageView,
    image: vk::Image,
    memory: vk::DeviceMemory,
    width: u32,
    height: u32,
    device: Arc<dyn GpuDevice>,
}

impl Texture {
    pub const FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

    #[cfg(test)]
    pub fn from_file<P: AsRef<Path>>(device: Arc<dyn GpuDevice>, path: P) -> RenderResult<Self> {
        let pixels = TexturePixels::load(path)?;
        Self::from_pixels(device, &pixels)
    }

    /// 1x1 opaque white, bound when a scene has no texture
    pub fn white(device: Arc<dyn GpuDevice>) -> RenderResult<Self> {
        Self::from_pixels(device, &TexturePixels::solid(1, 1, [255; 4]))
    }

    pub fn from_pixels(device: Arc<dyn GpuDevice>, pixels: &TexturePixels) -> RenderResult<Self> {
        if pixels.width == 0 || pixels.height == 0 {
            return Err(RenderError::InvalidTexture("zero-sized image".into()));
        }
        if pixels.rgba.len() < pixels.byte_len() {
            return Err(RenderError::InvalidTexture(format!(
                "{}x{} image needs {} bytes, got {}",
                pixels.width,
                pixels.height,
                pixels.byte_len(),
                pixels.rgba.len()
            )));
        }

        let mut texture = Self {
            sampler: vk::Sampler::null(),
            view: vk::ImageView::null(),
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            width: pixels.width,
            height: pixels.height,
            device,
        };

        let (image, memory) = texture.device.create_image(
            &ImageDesc {
                width: pixels.width,
                height: pixels.height,
                format: Self::FORMAT,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        texture.image = image;
        texture.memory = memory;

        texture.upload(&pixels.rgba[..pixels.byte_len()])?;

        texture.view = texture.device.create_image_view(
            texture.image,
            Self::FORMAT,
            vk::ImageAspectFlags::COLOR,
        )?;
        texture.sampler = texture.create_sampler()?;

        log::debug!("Uploaded {}x{} texture", texture.width, texture.height);
        Ok(texture)
    }

    /// Stage, then copy into the image. The staging buffer is dropped on return.
    fn upload(&self, rgba: &[u8]) -> RenderResult<()> {
        let mut staging = Buffer::new(
            self.device.clone(),
            rgba.len() as vk::DeviceSize,
            1,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            0,
        )?;
        staging.map()?;
        staging.write_to_buffer(rgba, 0)?;
        staging.unmap();

        let device = &self.device;
        let (image, width, height) = (self.image, self.width, self.height);
        let source = staging.handle();
        device.submit_one_shot(&mut |cmd| {
            device.cmd_upload_image(cmd, source, image, width, height);
            Ok(())
        })
    }

    fn create_sampler(&self) -> RenderResult<vk::Sampler> {
        let max_anisotropy = self.device.limits().max_sampler_anisotropy;
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(max_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);
        self.device.create_sampler(&info)
    }

    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    #[cfg(test)]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[cfg(test)]
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if self.sampler != vk::Sampler::null() {
            self.device.destroy_sampler(self.sampler);
        }
        if self.view != vk::ImageView::null() {
            self.device.destroy_image_view(self.view);
        }
        if self.image != vk::Image::null() {
            self.device.destroy_image(self.image, self.memory);
        }
    }
}
