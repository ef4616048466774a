// Sampled texture upload
//
// Pixels go through a host visible staging buffer into a device local
// image. With mipmaps on, every level below the first is blitted from the
// one above it, each level turning shader-readable once it has been read.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::buffer::{BufferAllocation, ImageAllocation, ImageDesc};
use super::commands::OneTimeCommands;
use super::VulkanDevice;
use crate::tga::BgraImage;

/// Decoded TGA pixels are BGRA and conventionally gamma encoded
pub const TEXTURE_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

pub struct Texture {
    pub image: ImageAllocation,
    pub sampler: vk::Sampler,
    pub mip_levels: u32,
    device: Arc<VulkanDevice>,
}

/// `floor(log2(max(width, height))) + 1`
pub fn mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// One level-to-level blit of the mip chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipBlit {
    pub src_level: u32,
    pub src_size: [i32; 2],
    pub dst_size: [i32; 2],
}

/// Blits that fill levels `1..levels`, halving each side down to 1
pub fn mip_blits(width: u32, height: u32, levels: u32) -> Vec<MipBlit> {
    let mut size = [width as i32, height as i32];
    (1..levels)
        .map(|level| {
            let next = [(size[0] / 2).max(1), (size[1] / 2).max(1)];
            let blit = MipBlit {
                src_level: level - 1,
                src_size: size,
                dst_size: next,
            };
            size = next;
            blit
        })
        .collect()
}

fn color_range(base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn color_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[allow(clippy::too_many_arguments)]
fn barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    (old_layout, new_layout): (vk::ImageLayout, vk::ImageLayout),
    (src_access, dst_access): (vk::AccessFlags, vk::AccessFlags),
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

impl Texture {
    pub fn upload(
        device: &Arc<VulkanDevice>,
        command_pool: vk::CommandPool,
        pixels: &BgraImage,
        with_mipmaps: bool,
    ) -> Result<Self> {
        let mut mip_levels = if with_mipmaps {
            mip_levels(pixels.width, pixels.height)
        } else {
            1
        };

        // Blitting between levels needs linear filtering support
        if mip_levels > 1
            && !device
                .format_features(TEXTURE_FORMAT)
                .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            log::warn!("{:?} cannot be blitted linearly, skipping mipmaps", TEXTURE_FORMAT);
            mip_levels = 1;
        }

        log::info!(
            "Uploading {}x{} texture with {} mip levels",
            pixels.width,
            pixels.height,
            mip_levels
        );

        let mut staging = BufferAllocation::new(
            device,
            "texture staging",
            pixels.byte_len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(&pixels.pixels)?;

        let extent = vk::Extent2D {
            width: pixels.width,
            height: pixels.height,
        };
        let image = ImageAllocation::new(
            device,
            "texture",
            ImageDesc {
                extent,
                format: TEXTURE_FORMAT,
                usage: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED,
                aspect: vk::ImageAspectFlags::COLOR,
                mip_levels,
            },
        )?;

        let commands = OneTimeCommands::begin(device, command_pool)?;
        let cmd = commands.cmd;
        let raw = &device.device;

        // ─────────────────────────────────────────────────────────────────────
        // UNDEFINED -> TRANSFER_DST for every level, then copy level 0
        // ─────────────────────────────────────────────────────────────────────
        barrier(
            raw,
            cmd,
            image.image,
            color_range(0, mip_levels),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            (vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE),
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        );

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(color_layers(0))
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .build();

        unsafe {
            raw.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        // ─────────────────────────────────────────────────────────────────────
        // Mip chain: level i-1 becomes TRANSFER_SRC, is blitted into level
        // i, then goes to SHADER_READ_ONLY
        // ─────────────────────────────────────────────────────────────────────
        for blit in mip_blits(extent.width, extent.height, mip_levels) {
            let src = color_range(blit.src_level, 1);

            barrier(
                raw,
                cmd,
                image.image,
                src,
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                ),
                (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::TRANSFER_READ),
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
            );

            let image_blit = vk::ImageBlit::builder()
                .src_subresource(color_layers(blit.src_level))
                .src_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: blit.src_size[0],
                        y: blit.src_size[1],
                        z: 1,
                    },
                ])
                .dst_subresource(color_layers(blit.src_level + 1))
                .dst_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: blit.dst_size[0],
                        y: blit.dst_size[1],
                        z: 1,
                    },
                ])
                .build();

            unsafe {
                raw.cmd_blit_image(
                    cmd,
                    image.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[image_blit],
                    vk::Filter::LINEAR,
                );
            }

            barrier(
                raw,
                cmd,
                image.image,
                src,
                (
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ),
                (vk::AccessFlags::TRANSFER_READ, vk::AccessFlags::SHADER_READ),
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            );
        }

        // The last level was only written
        barrier(
            raw,
            cmd,
            image.image,
            color_range(mip_levels - 1, 1),
            (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            (vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::SHADER_READ),
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        );

        commands.submit()?;
        drop(staging);

        let sampler = create_sampler(device, mip_levels)?;

        Ok(Self {
            image,
            sampler,
            mip_levels,
            device: device.clone(),
        })
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_sampler(self.sampler, None) };
    }
}

fn create_sampler(device: &VulkanDevice, mip_levels: u32) -> Result<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .mip_lod_bias(0.0)
        .anisotropy_enable(false)
        .max_anisotropy(1.0)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .min_lod(0.0)
        .max_lod(mip_levels as f32)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false);

    unsafe { device.device.create_sampler(&sampler_info, None) }
        .context("Failed to create texture sampler")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_levels_is_floor_log2_plus_one() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(2, 1), 2);
        assert_eq!(mip_levels(256, 256), 9);
        assert_eq!(mip_levels(300, 17), 9);
        assert_eq!(mip_levels(512, 1024), 11);
    }

    #[test]
    fn test_mip_blits_halve_and_clamp_to_one() {
        let blits = mip_blits(8, 2, mip_levels(8, 2));
        assert_eq!(
            blits,
            vec![
                MipBlit {
                    src_level: 0,
                    src_size: [8, 2],
                    dst_size: [4, 1]
                },
                MipBlit {
                    src_level: 1,
                    src_size: [4, 1],
                    dst_size: [2, 1]
                },
                MipBlit {
                    src_level: 2,
                    src_size: [2, 1],
                    dst_size: [1, 1]
                },
            ]
        );
    }

    #[test]
    fn test_single_level_has_no_blits() {
        assert!(mip_blits(64, 64, 1).is_empty());
    }
}
