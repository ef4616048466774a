// Swapchain - Window presentation
//
// Everything that has to be rebuilt when the surface changes lives in one
// `SwapchainBundle`: the swapchain, its images and views, one framebuffer
// and one command buffer per image, and the depth image when the demo uses
// one. A stale bundle is dropped whole and a fresh one is built.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::buffer::{self, ImageAllocation};
use super::commands;
use super::VulkanDevice;
use crate::frame::{AcquireOutcome, PresentOutcome};

/// The format we ask for when the surface leaves the choice to us
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// What the surface reports it can do
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(device: &VulkanDevice) -> Result<Self> {
        let loader = &device.surface_loader;
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(device.physical_device, device.surface)
                    .context("Failed to query surface capabilities")?,
                formats: loader
                    .get_physical_device_surface_formats(device.physical_device, device.surface)
                    .context("Failed to query surface formats")?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(device.physical_device, device.surface)
                    .context("Failed to query present modes")?,
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameter selection
// ─────────────────────────────────────────────────────────────────────────────

pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Result<vk::SurfaceFormatKHR> {
    // A lone UNDEFINED entry means the surface takes whatever we like
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Ok(preferred);
        }
    }

    if formats
        .iter()
        .any(|f| f.format == preferred.format && f.color_space == preferred.color_space)
    {
        return Ok(preferred);
    }

    if let Some(first_with_format) = formats.iter().find(|f| f.format == preferred.format) {
        return Ok(*first_with_format);
    }

    formats
        .first()
        .copied()
        .context("Surface reports no formats")
}

pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        // FIFO is the only mode every implementation has to support
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        wanted.min(capabilities.max_image_count)
    } else {
        wanted
    }
}

pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

pub fn choose_usage(capabilities: &vk::SurfaceCapabilitiesKHR) -> Result<vk::ImageUsageFlags> {
    let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
    if !capabilities.supported_usage_flags.contains(usage) {
        anyhow::bail!(
            "Surface images cannot be color attachments (supported usage {:?})",
            capabilities.supported_usage_flags
        );
    }
    Ok(usage)
}

pub fn choose_transform(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

/// Map the raw acquire result onto the two outcomes the frame loop expects
pub fn acquire_outcome(result: VkResult<(u32, bool)>) -> Result<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(anyhow::Error::new(e).context("Failed to acquire swapchain image")),
    }
}

pub fn present_outcome(result: VkResult<bool>) -> Result<PresentOutcome> {
    match result {
        Ok(suboptimal) => Ok(PresentOutcome::Presented { suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(anyhow::Error::new(e).context("Failed to present swapchain image")),
    }
}

/// Look up the per-image object for an acquired index
pub fn per_image<T: Copy>(items: &[T], image_index: u32) -> Result<T> {
    items.get(image_index as usize).copied().with_context(|| {
        format!(
            "Image index {} out of range for {} swapchain images",
            image_index,
            items.len()
        )
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Swapchain
// ─────────────────────────────────────────────────────────────────────────────

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    pub fn new(
        device: &VulkanDevice,
        surface_format: vk::SurfaceFormatKHR,
        preferred_present_mode: vk::PresentModeKHR,
        window_extent: vk::Extent2D,
    ) -> Result<Self> {
        let support = SurfaceSupport::query(device)?;
        let caps = &support.capabilities;

        let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
        if present_mode != preferred_present_mode {
            log::warn!(
                "Present mode {:?} not supported, using {:?}",
                preferred_present_mode,
                present_mode
            );
        }
        let extent = choose_extent(caps, window_extent);
        let image_count = choose_image_count(caps);
        let usage = choose_usage(caps)?;
        let transform = choose_transform(caps);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            image_count,
            present_mode
        );

        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);

        // Graphics and present share one family, so no concurrent sharing
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(anyhow::Error::new(e).context("Failed to get swapchain images"));
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            extent,
        })
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<AcquireOutcome> {
        acquire_outcome(unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, timeout, semaphore, fence)
        })
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        present_outcome(unsafe { self.swapchain_loader.queue_present(queue, &present_info) })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bundle
// ─────────────────────────────────────────────────────────────────────────────

/// Inputs that stay fixed across rebuilds
#[derive(Debug, Clone, Copy)]
pub struct BundleDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub window_extent: vk::Extent2D,
    pub render_pass: vk::RenderPass,
    pub command_pool: vk::CommandPool,
    pub depth_format: Option<vk::Format>,
}

/// Swapchain plus every object sized or counted by it.
///
/// `image_views`, `framebuffers` and `command_buffers` always have one
/// entry per swapchain image.
pub struct SwapchainBundle {
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    command_pool: vk::CommandPool,
    // Destroyed after the views and framebuffers that reference them
    pub swapchain: Swapchain,
    pub depth: Option<ImageAllocation>,
    device: Arc<VulkanDevice>,
}

impl SwapchainBundle {
    pub fn new(device: &Arc<VulkanDevice>, desc: &BundleDesc) -> Result<Self> {
        let swapchain = Swapchain::new(
            device,
            desc.surface_format,
            desc.present_mode,
            desc.window_extent,
        )?;
        let extent = swapchain.extent;

        // Partially built state is released by Drop if a later step fails
        let mut bundle = Self {
            image_views: Vec::with_capacity(swapchain.images.len()),
            framebuffers: Vec::with_capacity(swapchain.images.len()),
            command_buffers: Vec::new(),
            command_pool: desc.command_pool,
            swapchain,
            depth: None,
            device: device.clone(),
        };

        for &image in &bundle.swapchain.images {
            let view = buffer::create_image_view(
                device,
                image,
                desc.surface_format.format,
                vk::ImageAspectFlags::COLOR,
                1,
            )?;
            bundle.image_views.push(view);
        }

        if let Some(format) = desc.depth_format {
            bundle.depth = Some(buffer::create_depth_buffer(device, extent, format)?);
        }
        let depth_view = bundle.depth.as_ref().map(|depth| depth.view);

        for &view in &bundle.image_views {
            let framebuffer = create_framebuffer(device, desc.render_pass, view, depth_view, extent)?;
            bundle.framebuffers.push(framebuffer);
        }

        bundle.command_buffers = commands::allocate_command_buffers(
            device,
            desc.command_pool,
            bundle.image_views.len() as u32,
        )?;

        log::debug!(
            "Swapchain bundle ready: {} views, {} framebuffers, {} command buffers",
            bundle.image_views.len(),
            bundle.framebuffers.len(),
            bundle.command_buffers.len()
        );

        Ok(bundle)
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        per_image(&self.framebuffers, image_index)
    }

    pub fn command_buffer(&self, image_index: u32) -> Result<vk::CommandBuffer> {
        per_image(&self.command_buffers, image_index)
    }
}

impl Drop for SwapchainBundle {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            if !self.command_buffers.is_empty() {
                device.free_command_buffers(self.command_pool, &self.command_buffers);
            }
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.image_views {
                device.destroy_image_view(view, None);
            }
            self.swapchain
                .swapchain_loader
                .destroy_swapchain(self.swapchain.swapchain, None);
        }
        // `depth` releases its image and memory when the fields drop
    }
}

fn create_framebuffer(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    color_view: vk::ImageView,
    depth_view: Option<vk::ImageView>,
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let attachments: Vec<vk::ImageView> = std::iter::once(color_view).chain(depth_view).collect();

    let framebuffer_info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(&attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
        .context("Failed to create framebuffer")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn pair(f: vk::SurfaceFormatKHR) -> (vk::Format, vk::ColorSpaceKHR) {
        (f.format, f.color_space)
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    #[test]
    fn test_undefined_surface_format_yields_preference() {
        let formats = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let chosen = choose_surface_format(&formats, PREFERRED_SURFACE_FORMAT).unwrap();
        assert_eq!(pair(chosen), pair(PREFERRED_SURFACE_FORMAT));
    }

    #[test]
    fn test_surface_format_fallbacks() {
        let exact = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            PREFERRED_SURFACE_FORMAT,
        ];
        assert_eq!(
            pair(choose_surface_format(&exact, PREFERRED_SURFACE_FORMAT).unwrap()),
            pair(PREFERRED_SURFACE_FORMAT)
        );

        let other_space = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(
            pair(choose_surface_format(&other_space, PREFERRED_SURFACE_FORMAT).unwrap()),
            pair(other_space[1])
        );

        let neither = [format(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        )];
        assert_eq!(
            pair(choose_surface_format(&neither, PREFERRED_SURFACE_FORMAT).unwrap()),
            pair(neither[0])
        );

        assert!(choose_surface_format(&[], PREFERRED_SURFACE_FORMAT).is_err());
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::FIFO_RELAXED),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_image_count_is_min_plus_one_clamped() {
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
        // max == 0 means unbounded
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
    }

    #[test]
    fn test_extent_uses_window_size_only_for_sentinel() {
        let window = vk::Extent2D {
            width: 10_000,
            height: 300,
        };

        let fixed = caps(2, 3);
        assert_eq!(choose_extent(&fixed, window), fixed.current_extent);

        let mut free = caps(2, 3);
        free.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        assert_eq!(
            choose_extent(&free, window),
            vk::Extent2D {
                width: 4096,
                height: 300
            }
        );
    }

    #[test]
    fn test_usage_requires_color_attachment() {
        assert_eq!(
            choose_usage(&caps(2, 3)).unwrap(),
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        );

        let mut no_color = caps(2, 3);
        no_color.supported_usage_flags = vk::ImageUsageFlags::TRANSFER_DST;
        assert!(choose_usage(&no_color).is_err());
    }

    #[test]
    fn test_transform_prefers_identity() {
        let mut rotated = caps(2, 3);
        rotated.current_transform = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(choose_transform(&rotated), vk::SurfaceTransformFlagsKHR::IDENTITY);

        rotated.supported_transforms = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(choose_transform(&rotated), vk::SurfaceTransformFlagsKHR::ROTATE_90);
    }

    #[test]
    fn test_out_of_date_is_the_only_recoverable_result() {
        assert_eq!(
            acquire_outcome(Ok((1, true))).unwrap(),
            AcquireOutcome::Ready {
                image_index: 1,
                suboptimal: true
            }
        );
        assert_eq!(
            acquire_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert!(acquire_outcome(Err(vk::Result::TIMEOUT)).is_err());
        assert!(acquire_outcome(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());

        assert_eq!(
            present_outcome(Ok(true)).unwrap(),
            PresentOutcome::Presented { suboptimal: true }
        );
        assert_eq!(
            present_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::OutOfDate
        );
        assert!(present_outcome(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn test_per_image_picks_the_acquired_slot() {
        let framebuffers: Vec<vk::Framebuffer> =
            (10..13).map(vk::Framebuffer::from_raw).collect();

        assert_eq!(per_image(&framebuffers, 2).unwrap(), vk::Framebuffer::from_raw(12));
        assert!(per_image(&framebuffers, 3).is_err());
    }
}
