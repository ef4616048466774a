// Command pool, per-image command buffers and the fixed draw recording

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

/// Everything the draw of one frame binds
#[derive(Debug, Clone, Copy)]
pub struct DrawInfo {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub clear_color: [f32; 4],
    pub with_depth: bool,
}

/// Pool whose buffers can be reset one by one
pub fn create_command_pool(device: &VulkanDevice) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(device.queue_family);

    unsafe { device.device.create_command_pool(&pool_info, None) }
        .context("Failed to create command pool")
}

pub fn allocate_command_buffers(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .context("Failed to allocate command buffers")
}

/// Clear values in attachment order: color, then depth when present
pub fn clear_values(clear_color: [f32; 4], with_depth: bool) -> Vec<vk::ClearValue> {
    let mut values = vec![vk::ClearValue {
        color: vk::ClearColorValue {
            float32: clear_color,
        },
    }];
    if with_depth {
        values.push(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        });
    }
    values
}

/// Viewport covering the whole framebuffer
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Record the single draw of the scene into `cmd`
pub fn record_draw(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    draw: &DrawInfo,
) -> Result<()> {
    let clear_values = clear_values(draw.clear_color, draw.with_depth);

    unsafe {
        // ─────────────────────────────────────────────────────────────────────
        // Begin recording
        // ─────────────────────────────────────────────────────────────────────
        let begin_info = vk::CommandBufferBeginInfo::builder();
        device
            .begin_command_buffer(cmd, &begin_info)
            .context("Failed to begin command buffer")?;

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(draw.render_pass)
            .framebuffer(framebuffer)
            .render_area(full_scissor(extent))
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);

        // ─────────────────────────────────────────────────────────────────────
        // Draw
        // ─────────────────────────────────────────────────────────────────────
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
        device.cmd_set_viewport(cmd, 0, &[full_viewport(extent)]);
        device.cmd_set_scissor(cmd, 0, &[full_scissor(extent)]);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            draw.pipeline_layout,
            0,
            &[draw.descriptor_set],
            &[],
        );
        device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
        device.cmd_draw(cmd, draw.vertex_count, 1, 0, 0);

        device.cmd_end_render_pass(cmd);

        device
            .end_command_buffer(cmd)
            .context("Failed to end command buffer")?;
    }

    Ok(())
}

/// Command buffer for a one-off transfer, submitted and waited on by `submit`
pub struct OneTimeCommands<'a> {
    device: &'a VulkanDevice,
    pool: vk::CommandPool,
    pub cmd: vk::CommandBuffer,
}

impl<'a> OneTimeCommands<'a> {
    pub fn begin(device: &'a VulkanDevice, pool: vk::CommandPool) -> Result<Self> {
        let cmd = allocate_command_buffers(device, pool, 1)?
            .into_iter()
            .next()
            .context("Command buffer allocation returned nothing")?;

        let commands = Self { device, pool, cmd };

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.device.begin_command_buffer(cmd, &begin_info) }
            .context("Failed to begin one-time command buffer")?;

        Ok(commands)
    }

    /// End, submit to the graphics queue and block until the queue is idle
    pub fn submit(self) -> Result<()> {
        let device = &self.device.device;
        unsafe {
            device
                .end_command_buffer(self.cmd)
                .context("Failed to end one-time command buffer")?;

            let command_buffers = [self.cmd];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    vk::Fence::null(),
                )
                .context("Failed to submit one-time commands")?;
        }
        self.device.wait_queue_idle(self.device.graphics_queue)
    }
}

impl Drop for OneTimeCommands<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .free_command_buffers(self.pool, &[self.cmd]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_values_follow_attachment_order() {
        let color = [0.1, 0.2, 0.3, 1.0];

        let flat = clear_values(color, false);
        assert_eq!(flat.len(), 1);
        assert_eq!(unsafe { flat[0].color.float32 }, color);

        let layered = clear_values(color, true);
        assert_eq!(layered.len(), 2);
        let depth = unsafe { layered[1].depth_stencil };
        assert_eq!(depth.depth, 1.0);
        assert_eq!(depth.stencil, 0);
    }

    #[test]
    fn test_viewport_and_scissor_cover_extent() {
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };

        let viewport = full_viewport(extent);
        assert_eq!((viewport.width, viewport.height), (640.0, 480.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));

        let scissor = full_scissor(extent);
        assert_eq!((scissor.offset.x, scissor.offset.y), (0, 0));
        assert_eq!(scissor.extent, extent);
    }
}
