// =============================================================================
// VULKAN RENDERER
// =============================================================================
//
// Owns every Vulkan object of the demo and implements `FrameTarget` so the
// frame loop can drive it. Setup is linear and happens once, except for the
// swapchain bundle which is rebuilt whenever presentation reports it stale.
//
// Field order is drop order: the bundle goes first, the device and the
// window it presents to go last.

use anyhow::{Context, Result};
use ash::vk;
use glam::Mat4;
use std::sync::Arc;
use winit::window::Window;

use crate::backend::buffer::{self, BufferAllocation};
use crate::backend::commands::{self, DrawInfo};
use crate::backend::descriptor::SceneDescriptors;
use crate::backend::pipeline::{self, GraphicsPipeline};
use crate::backend::shader;
use crate::backend::swapchain::{self, SurfaceSupport};
use crate::backend::texture::Texture;
use crate::backend::{BundleDesc, FrameSync, SwapchainBundle, VulkanDevice};
use crate::config::Config;
use crate::frame::{AcquireOutcome, FrameTarget, PresentOutcome};
use crate::scene::{self, DemoVersion};
use crate::tga::{self, BgraImage};

/// Side of the procedural texture used when the TGA file is missing
const FALLBACK_TEXTURE_SIZE: u32 = 256;
const FALLBACK_TEXTURE_CELL: u32 = 32;

pub struct VulkanRenderer {
    bundle: Option<SwapchainBundle>,
    pipeline: GraphicsPipeline,
    descriptors: SceneDescriptors,
    // Sampled through the descriptor set
    _texture: Texture,
    uniform: BufferAllocation,
    vertices: BufferAllocation,
    persistent: PersistentObjects,

    bundle_desc: BundleDesc,
    demo: DemoVersion,
    clear_color: [f32; 4],
    acquire_timeout: u64,

    device: Arc<VulkanDevice>,
    window: Arc<Window>,
}

/// Raw objects that live as long as the renderer and outlast every bundle
struct PersistentObjects {
    sync: FrameSync,
    command_pool: vk::CommandPool,
    render_pass: vk::RenderPass,
    device: Arc<VulkanDevice>,
}

impl Drop for PersistentObjects {
    fn drop(&mut self) {
        let device = &self.device.device;
        self.sync.destroy(device);
        unsafe {
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

impl VulkanRenderer {
    pub fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        let demo = config.graphics.demo;
        log::info!(
            "Initializing renderer for {:?} ({} vertices, depth: {}, mipmaps: {})",
            demo,
            demo.vertex_count(),
            demo.uses_depth(),
            demo.uses_mipmaps()
        );

        let device = VulkanDevice::new(&config.window.title, &window, config.debug.validation_layers)?;

        // ─────────────────────────────────────────────────────────────────────
        // Formats, render pass, command pool and sync objects
        // ─────────────────────────────────────────────────────────────────────
        let support = SurfaceSupport::query(&device)?;
        let surface_format =
            swapchain::choose_surface_format(&support.formats, swapchain::PREFERRED_SURFACE_FORMAT)?;
        log::info!(
            "Surface format: {:?} / {:?}",
            surface_format.format,
            surface_format.color_space
        );

        let depth_format = if demo.uses_depth() {
            Some(buffer::find_depth_format(&device)?)
        } else {
            None
        };

        let sync = FrameSync::new(&device)?;
        let mut persistent = PersistentObjects {
            sync,
            command_pool: vk::CommandPool::null(),
            render_pass: vk::RenderPass::null(),
            device: device.clone(),
        };
        persistent.command_pool = commands::create_command_pool(&device)?;
        persistent.render_pass =
            pipeline::create_render_pass(&device, surface_format.format, depth_format)?;

        // ─────────────────────────────────────────────────────────────────────
        // Scene resources: vertices, camera uniform, texture, descriptor set
        // ─────────────────────────────────────────────────────────────────────
        let vertices = BufferAllocation::with_data(
            &device,
            "vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            demo.vertices(),
        )?;

        let size = window.inner_size();
        let uniform = BufferAllocation::with_data(
            &device,
            "camera uniform",
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            &[scene::view_projection(size.width, size.height)],
        )?;

        let pixels = load_texture_pixels(config)?;
        let texture = Texture::upload(&device, persistent.command_pool, &pixels, demo.uses_mipmaps())?;

        let descriptors = SceneDescriptors::new(&device)?;
        descriptors.write(
            uniform.buffer,
            std::mem::size_of::<Mat4>() as vk::DeviceSize,
            texture.image.view,
            texture.sampler,
        );

        // ─────────────────────────────────────────────────────────────────────
        // Pipeline
        // ─────────────────────────────────────────────────────────────────────
        let vert = shader::load_shader_module(&device, &config.assets.vertex_shader)?;
        let frag = match shader::load_shader_module(&device, &config.assets.fragment_shader) {
            Ok(frag) => frag,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vert, None) };
                return Err(e);
            }
        };
        let pipeline = GraphicsPipeline::new(
            &device,
            persistent.render_pass,
            descriptors.layout,
            vert,
            frag,
            demo.uses_depth(),
        );
        // Modules are only needed while the pipeline is built
        unsafe {
            device.device.destroy_shader_module(vert, None);
            device.device.destroy_shader_module(frag, None);
        }
        let pipeline = pipeline?;

        // ─────────────────────────────────────────────────────────────────────
        // First swapchain bundle
        // ─────────────────────────────────────────────────────────────────────
        let bundle_desc = BundleDesc {
            surface_format,
            present_mode: config.present_mode(),
            window_extent: vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            render_pass: persistent.render_pass,
            command_pool: persistent.command_pool,
            depth_format,
        };
        let bundle = SwapchainBundle::new(&device, &bundle_desc)?;

        log::info!("Renderer ready ({} texture mip levels)", texture.mip_levels);

        Ok(Self {
            bundle: Some(bundle),
            pipeline,
            descriptors,
            _texture: texture,
            uniform,
            vertices,
            persistent,
            bundle_desc,
            demo,
            clear_color: config.graphics.clear_color,
            acquire_timeout: config.acquire_timeout_ns(),
            device,
            window,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    fn bundle(&self) -> Result<&SwapchainBundle> {
        self.bundle
            .as_ref()
            .context("No swapchain bundle, the last rebuild failed")
    }

    fn draw_info(&self) -> DrawInfo {
        DrawInfo {
            render_pass: self.persistent.render_pass,
            pipeline: self.pipeline.pipeline,
            pipeline_layout: self.pipeline.layout,
            descriptor_set: self.descriptors.set,
            vertex_buffer: self.vertices.buffer,
            vertex_count: self.demo.vertex_count(),
            clear_color: self.clear_color,
            with_depth: self.demo.uses_depth(),
        }
    }
}

fn load_texture_pixels(config: &Config) -> Result<BgraImage> {
    let path = &config.assets.texture;
    if !path.exists() {
        log::warn!(
            "Texture {:?} not found, using a {}x{} checkerboard",
            path,
            FALLBACK_TEXTURE_SIZE,
            FALLBACK_TEXTURE_SIZE
        );
        return Ok(BgraImage::checkerboard(
            FALLBACK_TEXTURE_SIZE,
            FALLBACK_TEXTURE_CELL,
        ));
    }
    tga::load(path)
}

impl FrameTarget for VulkanRenderer {
    fn image_count(&self) -> usize {
        self.bundle.as_ref().map_or(0, SwapchainBundle::image_count)
    }

    fn reset_fence(&mut self) -> Result<()> {
        self.persistent.sync.reset_fence(&self.device.device)
    }

    fn acquire_next_image(&mut self) -> Result<AcquireOutcome> {
        let sync = &self.persistent.sync;
        self.bundle()?
            .swapchain
            .acquire_next_image(self.acquire_timeout, sync.image_available, sync.fence)
    }

    fn record_commands(&mut self, image_index: u32) -> Result<()> {
        let bundle = self.bundle()?;
        commands::record_draw(
            &self.device.device,
            bundle.command_buffer(image_index)?,
            bundle.framebuffer(image_index)?,
            bundle.extent(),
            &self.draw_info(),
        )
    }

    fn submit(&mut self, image_index: u32) -> Result<()> {
        let command_buffers = [self.bundle()?.command_buffer(image_index)?];
        let waits = self.persistent.sync.submit_waits();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&waits.wait_semaphores)
            .wait_dst_stage_mask(&waits.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&waits.signal_semaphores);

        // The fence already belongs to the acquire
        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                vk::Fence::null(),
            )
        }
        .context("Failed to submit draw commands")?;

        self.device.wait_queue_idle(self.device.graphics_queue)
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        let waits = self.persistent.sync.present_waits();
        self.bundle()?
            .swapchain
            .present(self.device.present_queue, image_index, &waits)
    }

    fn finish_frame(&mut self, image_index: u32) -> Result<()> {
        self.persistent.sync.wait_fence(&self.device.device)?;

        // Reset explicitly instead of relying on the implicit reset at begin
        let cmd = self.bundle()?.command_buffer(image_index)?;
        unsafe {
            self.device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .context("Failed to reset command buffer")
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        self.device.wait_idle()?;

        // The old bundle is gone before the new swapchain is created
        self.bundle = None;

        let size = self.window.inner_size();
        self.bundle_desc.window_extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        let bundle = SwapchainBundle::new(&self.device, &self.bundle_desc)?;

        // Keep the aspect ratio in step with the new extent
        let extent = bundle.extent();
        let camera = scene::view_projection(extent.width, extent.height);
        self.uniform.write(bytemuck::bytes_of(&camera))?;

        self.bundle = Some(bundle);
        Ok(())
    }

    fn wait_queue_idle(&mut self) -> Result<()> {
        self.device.wait_queue_idle(self.device.graphics_queue)
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        log::info!("Destroying renderer...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle during cleanup: {:#}", e);
        }
    }
}
