// GPU buffers for vertex, index, uniform and staging data
//
// `Buffer` owns one VkBuffer plus its memory. Instances are laid out at an
// aligned stride so a single buffer can back several per-frame or per-object
// slots, each bindable with its own descriptor range.

use ash::vk;
use std::ptr::NonNull;
use std::sync::Arc;

use super::error::{RenderError, RenderResult};
use super::gpu::GpuDevice;

pub struct Buffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: Option<NonNull<u8>>,

    buffer_size: vk::DeviceSize,
    instance_size: vk::DeviceSize,
    alignment_size: vk::DeviceSize,

    device: Arc<dyn GpuDevice>,
}

impl Buffer {
    /// Round `instance_size` up to a multiple of `min_offset_alignment`
    ///
    /// The alignment must be zero or a power of two, which Vulkan guarantees
    /// for every offset limit.
    pub fn alignment(instance_size: vk::DeviceSize, min_offset_alignment: vk::DeviceSize) -> vk::DeviceSize {
        if min_offset_alignment > 0 {
            (instance_size + min_offset_alignment - 1) & !(min_offset_alignment - 1)
        } else {
            instance_size
        }
    }

    pub fn new(
        device: Arc<dyn GpuDevice>,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
        min_offset_alignment: vk::DeviceSize,
    ) -> RenderResult<Self> {
        let alignment_size = Self::alignment(instance_size, min_offset_alignment);
        let buffer_size = alignment_size * instance_count as vk::DeviceSize;
        let (buffer, memory) = device.create_buffer(buffer_size, usage, memory_properties)?;

        Ok(Self {
            buffer,
            memory,
            mapped: None,
            buffer_size,
            instance_size,
            alignment_size,
            device,
        })
    }

    /// Upload `bytes` into a new device-local buffer through a staging buffer.
    ///
    /// Blocks until the copy has completed; the staging buffer is released
    /// before returning.
    pub fn device_local_with_data(
        device: Arc<dyn GpuDevice>,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> RenderResult<Self> {
        let size = bytes.len() as vk::DeviceSize;

        let mut staging = Self::new(
            device.clone(),
            size,
            1,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            0,
        )?;
        staging.map()?;
        staging.write_to_buffer(bytes, 0)?;
        staging.unmap();

        let target = Self::new(
            device.clone(),
            size,
            1,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            0,
        )?;

        let (src, dst) = (staging.handle(), target.handle());
        device.submit_one_shot(&mut |cmd| {
            device.cmd_copy_buffer(cmd, src, dst, size);
            Ok(())
        })?;

        Ok(target)
    }

    /// Map the whole buffer into host memory
    pub fn map(&mut self) -> RenderResult<()> {
        if self.mapped.is_none() {
            let ptr = self.device.map_memory(self.memory, 0, self.buffer_size)?;
            self.mapped = NonNull::new(ptr);
        }
        Ok(())
    }

    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            self.device.unmap_memory(self.memory);
        }
    }

    /// Copy `data` into the mapped buffer at byte `offset`
    pub fn write_to_buffer(&mut self, data: &[u8], offset: vk::DeviceSize) -> RenderResult<()> {
        let mapped = self.mapped.ok_or(RenderError::NotMapped)?;
        let size = data.len() as vk::DeviceSize;
        if offset.checked_add(size).map_or(true, |end| end > self.buffer_size) {
            return Err(RenderError::BufferOverflow {
                offset,
                size,
                capacity: self.buffer_size,
            });
        }

        // SAFETY: the range was checked against the mapped allocation above
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                mapped.as_ptr().add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    /// Write one instance at `index * alignment`
    pub fn write_to_index(&mut self, data: &[u8], index: u32) -> RenderResult<()> {
        if data.len() as vk::DeviceSize > self.instance_size {
            return Err(RenderError::BufferOverflow {
                offset: 0,
                size: data.len() as vk::DeviceSize,
                capacity: self.instance_size,
            });
        }
        self.write_to_buffer(data, index as vk::DeviceSize * self.alignment_size)
    }

    /// Make host writes to the whole buffer visible to the device
    #[cfg(test)]
    pub fn flush(&self) -> RenderResult<()> {
        self.device.flush_memory(self.memory, 0, vk::WHOLE_SIZE)
    }

    pub fn flush_index(&self, index: u32) -> RenderResult<()> {
        self.device.flush_memory(
            self.memory,
            index as vk::DeviceSize * self.alignment_size,
            self.alignment_size,
        )
    }

    /// Make device writes visible to the host
    #[cfg(test)]
    pub fn invalidate(&self) -> RenderResult<()> {
        self.device.invalidate_memory(self.memory, 0, vk::WHOLE_SIZE)
    }

    /// The whole buffer as one binding
    #[cfg(test)]
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    pub fn descriptor_info_for_index(&self, index: u32) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: index as vk::DeviceSize * self.alignment_size,
            range: self.alignment_size,
        }
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[cfg(test)]
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    #[cfg(test)]
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer_size
    }

    #[cfg(test)]
    pub fn alignment_size(&self) -> vk::DeviceSize {
        self.alignment_size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.unmap();
        self.device.destroy_buffer(self.buffer, self.memory);
    }
}
