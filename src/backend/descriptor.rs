// Descriptor set for the scene: the camera uniform buffer and the texture
//
// Binding 0: uniform buffer, vertex stage
// Binding 1: combined image sampler, fragment stage

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub const UNIFORM_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;

pub fn layout_bindings() -> [vk::DescriptorSetLayoutBinding; 2] {
    [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(UNIFORM_BINDING)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(SAMPLER_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build(),
    ]
}

/// One pool slot per binding, enough for a single set
pub fn pool_sizes() -> Vec<vk::DescriptorPoolSize> {
    layout_bindings()
        .iter()
        .map(|binding| vk::DescriptorPoolSize {
            ty: binding.descriptor_type,
            descriptor_count: binding.descriptor_count,
        })
        .collect()
}

/// Layout, pool and the one set allocated from it
pub struct SceneDescriptors {
    pub layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
    device: Arc<VulkanDevice>,
}

impl SceneDescriptors {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let bindings = layout_bindings();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create descriptor set layout")?;

        let mut descriptors = Self {
            layout,
            pool: vk::DescriptorPool::null(),
            set: vk::DescriptorSet::null(),
            device: device.clone(),
        };

        let sizes = pool_sizes();
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .max_sets(1);
        descriptors.pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptors.pool)
            .set_layouts(&layouts);
        descriptors.set = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?
            .into_iter()
            .next()
            .context("Descriptor set allocation returned nothing")?;

        Ok(descriptors)
    }

    /// Point both bindings at their resources
    pub fn write(
        &self,
        uniform_buffer: vk::Buffer,
        uniform_size: vk::DeviceSize,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: uniform_buffer,
            offset: 0,
            range: uniform_size,
        }];
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(self.set)
                .dst_binding(UNIFORM_BINDING)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(self.set)
                .dst_binding(SAMPLER_BINDING)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info)
                .build(),
        ];

        unsafe { self.device.device.update_descriptor_sets(&writes, &[]) };
    }
}

impl Drop for SceneDescriptors {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees the set
            if self.pool != vk::DescriptorPool::null() {
                self.device.device.destroy_descriptor_pool(self.pool, None);
            }
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_match_shader_interface() {
        let bindings = layout_bindings();

        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX);

        assert_eq!(bindings[1].binding, 1);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_pool_holds_one_of_each() {
        let sizes = pool_sizes();
        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|size| size.descriptor_count == 1));
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }
}
