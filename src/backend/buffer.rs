// Buffer and image allocations
//
// Memory comes from the device's gpu-allocator instance. Each wrapper owns
// its handle and allocation and gives both back on drop.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
];

fn allocate(
    device: &VulkanDevice,
    name: &str,
    requirements: vk::MemoryRequirements,
    location: MemoryLocation,
    linear: bool,
) -> Result<Allocation> {
    device
        .allocator
        .lock()
        .allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .with_context(|| format!("Failed to allocate memory for {}", name))
}

fn free(device: &VulkanDevice, allocation: Option<Allocation>) {
    if let Some(allocation) = allocation {
        if let Err(e) = device.allocator.lock().free(allocation) {
            log::error!("Failed to free GPU allocation: {}", e);
        }
    }
}

/// A buffer bound to its own allocation
pub struct BufferAllocation {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
    device: Arc<VulkanDevice>,
}

impl BufferAllocation {
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer {}", name))?;

        // From here on Drop cleans up whatever got created
        let mut allocated = Self {
            buffer,
            allocation: None,
            size,
            device: device.clone(),
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
        allocated.allocation = Some(allocate(device, name, requirements, location, true)?);

        if let Some(allocation) = &allocated.allocation {
            unsafe {
                device
                    .device
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            }
            .with_context(|| format!("Failed to bind memory of buffer {}", name))?;
        }

        Ok(allocated)
    }

    /// Host visible buffer filled with `data`
    pub fn with_data<T: Pod>(
        device: &Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(
            device,
            name,
            bytes.len() as vk::DeviceSize,
            usage,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write(bytes)?;
        Ok(buffer)
    }

    /// Copy `bytes` to the start of a host visible buffer
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            anyhow::bail!(
                "Data size ({} bytes) exceeds buffer size ({} bytes)",
                bytes.len(),
                self.size
            );
        }

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer memory is not host mapped")?;
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for BufferAllocation {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        free(&self.device, self.allocation.take());
    }
}

/// Properties of a device local 2D image
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
}

/// A device local image with its allocation and a view over every mip level
pub struct ImageAllocation {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub view: vk::ImageView,
    device: Arc<VulkanDevice>,
}

impl ImageAllocation {
    pub fn new(device: &Arc<VulkanDevice>, name: &str, desc: ImageDesc) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create image {}", name))?;

        let mut allocated = Self {
            image,
            allocation: None,
            view: vk::ImageView::null(),
            device: device.clone(),
        };

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        allocated.allocation = Some(allocate(
            device,
            name,
            requirements,
            MemoryLocation::GpuOnly,
            false,
        )?);

        if let Some(allocation) = &allocated.allocation {
            unsafe {
                device
                    .device
                    .bind_image_memory(image, allocation.memory(), allocation.offset())
            }
            .with_context(|| format!("Failed to bind memory of image {}", name))?;
        }

        allocated.view = create_image_view(device, image, desc.format, desc.aspect, desc.mip_levels)?;
        Ok(allocated)
    }
}

impl Drop for ImageAllocation {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.device.destroy_image_view(self.view, None);
            }
            self.device.device.destroy_image(self.image, None);
        }
        free(&self.device, self.allocation.take());
    }
}

pub fn create_image_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.device.create_image_view(&view_info, None) }
        .context("Failed to create image view")
}

// ─────────────────────────────────────────────────────────────────────────────
// Depth buffer
// ─────────────────────────────────────────────────────────────────────────────

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// First candidate whose optimal tiling features allow a depth attachment
pub fn pick_depth_format(
    candidates: &[vk::Format],
    features: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| features(format).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
        .with_context(|| format!("None of the depth formats {:?} is supported", candidates))
}

pub fn find_depth_format(device: &VulkanDevice) -> Result<vk::Format> {
    let format = pick_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| device.format_features(format))?;
    log::info!("Depth format: {:?}", format);
    Ok(format)
}

pub fn create_depth_buffer(
    device: &Arc<VulkanDevice>,
    extent: vk::Extent2D,
    format: vk::Format,
) -> Result<ImageAllocation> {
    ImageAllocation::new(
        device,
        "depth buffer",
        ImageDesc {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: depth_aspect(format),
            mip_levels: 1,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_format_skips_unsupported_candidates() {
        let supported = |format| {
            if format == vk::Format::D32_SFLOAT_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                    | vk::FormatFeatureFlags::SAMPLED_IMAGE
            } else {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            }
        };
        assert_eq!(
            pick_depth_format(&DEPTH_FORMAT_CANDIDATES, supported).unwrap(),
            vk::Format::D32_SFLOAT_S8_UINT
        );
    }

    #[test]
    fn test_depth_format_prefers_first_candidate() {
        let everything = |_| vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(
            pick_depth_format(&DEPTH_FORMAT_CANDIDATES, everything).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
        assert!(pick_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| vk::FormatFeatureFlags::empty()).is_err());
    }

    #[test]
    fn test_stencil_aspect_only_for_stencil_formats() {
        assert_eq!(
            depth_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert!(!has_stencil(vk::Format::B8G8R8A8_SRGB));
    }
}
