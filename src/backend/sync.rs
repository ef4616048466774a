// Synchronization primitives
//
// One set shared by every frame: "image available" is signalled by the
// acquire and waited on by the submit, "render finished" is signalled by
// the submit and waited on by the present. The fence is handed to the
// acquire and waited on once the frame is done.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

/// Stage at which the submit waits for the acquired image
pub const IMAGE_WAIT_STAGE: vk::PipelineStageFlags = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;

/// The single frame synchronization set
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub fence: vk::Fence,
}

/// Semaphores and stages of one queue submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitWaits {
    pub wait_semaphores: [vk::Semaphore; 1],
    pub wait_stages: [vk::PipelineStageFlags; 1],
    pub signal_semaphores: [vk::Semaphore; 1],
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device
                    .device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create semaphore")?,
                render_finished: device
                    .device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create semaphore")?,
                fence: device
                    .device
                    .create_fence(&fence_info, None)
                    .context("Failed to create fence")?,
            })
        }
    }

    /// Submit waits on "image available" and signals "render finished"
    pub fn submit_waits(&self) -> SubmitWaits {
        SubmitWaits {
            wait_semaphores: [self.image_available],
            wait_stages: [IMAGE_WAIT_STAGE],
            signal_semaphores: [self.render_finished],
        }
    }

    /// Present waits on "render finished"
    pub fn present_waits(&self) -> [vk::Semaphore; 1] {
        [self.render_finished]
    }

    pub fn reset_fence(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_fences(&[self.fence]) }.context("Failed to reset fence")
    }

    pub fn wait_fence(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.wait_for_fences(&[self.fence], true, u64::MAX) }
            .context("Failed to wait for fence")
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.fence, None);
        }
    }
}
