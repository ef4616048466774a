// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. The blobs are compiled ahead of time by
// build.rs and read from disk at startup.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode a SPIR-V blob into words, checking the magic number
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    // read_spv copies into aligned storage and fixes up endianness
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).context("Malformed SPIR-V")?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => anyhow::bail!("Not SPIR-V: magic number {:#010x}", other),
        None => anyhow::bail!("SPIR-V blob is empty"),
    }
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

/// Read a compiled shader from disk and wrap it in a module
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let bytes = std::fs::read(path).with_context(|| {
        format!(
            "Failed to read shader {:?} (build.rs compiles shaders/ with glslc)",
            path
        )
    })?;
    let code = parse_spirv(&bytes).with_context(|| format!("Failed to load shader {:?}", path))?;

    log::debug!("Loaded shader {:?} ({} words)", path, code.len());
    create_shader_module(device, &code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_parse_spirv_accepts_magic() {
        let words = parse_spirv(&blob(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0])).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_parse_spirv_rejects_garbage() {
        assert!(parse_spirv(&blob(&[0xdead_beef, 0])).is_err());
        // Not a whole number of words
        assert!(parse_spirv(&[0x03, 0x02, 0x23]).is_err());
        assert!(parse_spirv(&[]).is_err());
    }
}
