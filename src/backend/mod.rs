// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Every wrapper that owns a Vulkan object keeps an Arc<VulkanDevice> and
// releases the object on drop.

pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use device::VulkanDevice;
pub use swapchain::{BundleDesc, SwapchainBundle};
pub use sync::FrameSync;
