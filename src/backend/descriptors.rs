// Descriptor set layouts, pools and writers
//
// Builders collect their input by value and validate it once in `build`, so
// callers chain without intermediate `?` and still get typed errors.

use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::{RenderError, RenderResult};
use super::gpu::{DescriptorResource, DescriptorWrite, GpuDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutBinding {
    pub descriptor_type: vk::DescriptorType,
    pub stage_flags: vk::ShaderStageFlags,
    pub count: u32,
}

// =============================================================================
// SET LAYOUT
// =============================================================================

pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    bindings: BTreeMap<u32, LayoutBinding>,
    device: Arc<dyn GpuDevice>,
}

pub struct DescriptorSetLayoutBuilder {
    device: Arc<dyn GpuDevice>,
    bindings: BTreeMap<u32, LayoutBinding>,
    error: Option<RenderError>,
}

impl DescriptorSetLayoutBuilder {
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        if count == 0 {
            self.error = Some(RenderError::InvalidBinding {
                binding,
                reason: "descriptor count must be at least 1",
            });
        } else if self.bindings.contains_key(&binding) {
            self.error = Some(RenderError::DuplicateBinding(binding));
        } else {
            self.bindings.insert(
                binding,
                LayoutBinding {
                    descriptor_type,
                    stage_flags,
                    count,
                },
            );
        }
        self
    }

    pub fn build(self) -> RenderResult<DescriptorSetLayout> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let raw: Vec<vk::DescriptorSetLayoutBinding> = self
            .bindings
            .iter()
            .map(|(&binding, b)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stage_flags)
            })
            .collect();
        let layout = self.device.create_descriptor_set_layout(&raw)?;

        Ok(DescriptorSetLayout {
            layout,
            bindings: self.bindings,
            device: self.device,
        })
    }
}

impl DescriptorSetLayout {
    pub fn builder(device: Arc<dyn GpuDevice>) -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder {
            device,
            bindings: BTreeMap::new(),
            error: None,
        }
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn binding(&self, binding: u32) -> Option<&LayoutBinding> {
        self.bindings.get(&binding)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.device.destroy_descriptor_set_layout(self.layout);
    }
}

// =============================================================================
// POOL
// =============================================================================

pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    #[cfg(test)]
    flags: vk::DescriptorPoolCreateFlags,
    device: Arc<dyn GpuDevice>,
}

pub struct DescriptorPoolBuilder {
    device: Arc<dyn GpuDevice>,
    max_sets: u32,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    flags: vk::DescriptorPoolCreateFlags,
}

impl DescriptorPoolBuilder {
    pub fn max_sets(mut self, count: u32) -> Self {
        self.max_sets = count;
        self
    }

    pub fn add_pool_size(mut self, descriptor_type: vk::DescriptorType, count: u32) -> Self {
        self.pool_sizes.push(vk::DescriptorPoolSize {
            ty: descriptor_type,
            descriptor_count: count,
        });
        self
    }

    #[cfg(test)]
    pub fn pool_flags(mut self, flags: vk::DescriptorPoolCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn build(self) -> RenderResult<DescriptorPool> {
        let pool = self
            .device
            .create_descriptor_pool(self.max_sets, &self.pool_sizes, self.flags)?;
        log::debug!(
            "Created descriptor pool: {} sets, {} pool sizes",
            self.max_sets,
            self.pool_sizes.len()
        );
        Ok(DescriptorPool {
            pool,
            #[cfg(test)]
            flags: self.flags,
            device: self.device,
        })
    }
}

impl DescriptorPool {
    pub fn builder(device: Arc<dyn GpuDevice>) -> DescriptorPoolBuilder {
        DescriptorPoolBuilder {
            device,
            max_sets: 1000,
            pool_sizes: Vec::new(),
            flags: vk::DescriptorPoolCreateFlags::empty(),
        }
    }

    /// `PoolExhausted` once the pool's capacity is used up
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> RenderResult<vk::DescriptorSet> {
        self.device.allocate_descriptor_set(self.pool, layout.handle())
    }

    /// Requires the pool to be built with `FREE_DESCRIPTOR_SET`
    #[cfg(test)]
    pub fn free(&self, sets: &[vk::DescriptorSet]) -> RenderResult<()> {
        if !self
            .flags
            .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        {
            return Err(RenderError::InvalidState(
                "descriptor pool was not built with FREE_DESCRIPTOR_SET",
            ));
        }
        self.device.free_descriptor_sets(self.pool, sets)
    }

    /// Return every set allocated from this pool
    #[cfg(test)]
    pub fn reset(&self) -> RenderResult<()> {
        self.device.reset_descriptor_pool(self.pool)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        self.device.destroy_descriptor_pool(self.pool);
    }
}

// =============================================================================
// WRITER
// =============================================================================

/// Stages writes against a layout, then allocates and updates a set in one go
pub struct DescriptorWriter<'a> {
    layout: &'a DescriptorSetLayout,
    pool: &'a DescriptorPool,
    writes: Vec<(u32, vk::DescriptorType, DescriptorResource)>,
    error: Option<RenderError>,
}

impl<'a> DescriptorWriter<'a> {
    pub fn new(layout: &'a DescriptorSetLayout, pool: &'a DescriptorPool) -> Self {
        Self {
            layout,
            pool,
            writes: Vec::new(),
            error: None,
        }
    }

    pub fn write_buffer(self, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        self.stage(binding, DescriptorResource::Buffer(info))
    }

    pub fn write_image(self, binding: u32, info: vk::DescriptorImageInfo) -> Self {
        self.stage(binding, DescriptorResource::Image(info))
    }

    fn stage(mut self, binding: u32, resource: DescriptorResource) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.check(binding, &resource) {
            Ok(descriptor_type) => self.writes.push((binding, descriptor_type, resource)),
            Err(err) => self.error = Some(err),
        }
        self
    }

    fn check(&self, binding: u32, resource: &DescriptorResource) -> RenderResult<vk::DescriptorType> {
        let declared = self
            .layout
            .binding(binding)
            .ok_or(RenderError::UnknownBinding(binding))?;

        if declared.count != 1 {
            return Err(RenderError::DescriptorCountMismatch {
                binding,
                expected: declared.count,
            });
        }

        let accepts = match resource {
            DescriptorResource::Buffer(_) => is_buffer_type(declared.descriptor_type),
            DescriptorResource::Image(_) => !is_buffer_type(declared.descriptor_type),
        };
        if !accepts {
            return Err(RenderError::DescriptorTypeMismatch {
                binding,
                declared: declared.descriptor_type,
            });
        }
        Ok(declared.descriptor_type)
    }

    /// Allocate a set from the pool and apply the staged writes to it
    pub fn build(self) -> RenderResult<vk::DescriptorSet> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let set = self.pool.allocate(self.layout)?;
        self.apply(set);
        Ok(set)
    }

    /// Apply the staged writes to an existing set
    #[cfg(test)]
    pub fn overwrite(self, set: vk::DescriptorSet) -> RenderResult<()> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.apply(set);
        Ok(())
    }

    fn apply(&self, set: vk::DescriptorSet) {
        let writes: Vec<DescriptorWrite> = self
            .writes
            .iter()
            .map(|&(binding, descriptor_type, resource)| DescriptorWrite {
                set,
                binding,
                descriptor_type,
                resource,
            })
            .collect();
        self.pool.device.update_descriptor_sets(&writes);
    }
}

fn is_buffer_type(ty: vk::DescriptorType) -> bool {
    matches!(
        ty,
        vk::DescriptorType::UNIFORM_BUFFER
            | vk::DescriptorType::STORAGE_BUFFER
            | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
    )
}
