// Uncompressed TGA decoding
//
// Only what the demo texture needs: image type 2 (uncompressed true color),
// 24 or 32 bits per pixel. Pixels come out as tightly packed BGRA rows,
// top row first, ready for a B8G8R8A8_SRGB upload.

use anyhow::{Context, Result};
use std::path::Path;

const HEADER_LEN: usize = 18;
const UNCOMPRESSED_TRUE_COLOR: u8 = 2;
/// Image descriptor bit 5: rows are stored top to bottom
const TOP_LEFT_ORIGIN: u8 = 0x20;

/// Decoded image, 4 bytes per pixel in BGRA order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgraImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl BgraImage {
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Two-color checkerboard used when no texture file is around
    pub fn checkerboard(size: u32, cell: u32) -> Self {
        let cell = cell.max(1);
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let light = ((x / cell) + (y / cell)) % 2 == 0;
                let bgra = if light {
                    [0xee, 0xee, 0xee, 0xff]
                } else {
                    [0x8a, 0x3a, 0x1e, 0xff]
                };
                pixels.extend_from_slice(&bgra);
            }
        }

        Self {
            width: size,
            height: size,
            pixels,
        }
    }
}

pub fn load(path: &Path) -> Result<BgraImage> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read texture {:?}", path))?;
    decode(&bytes).with_context(|| format!("Failed to decode {:?} as TGA", path))
}

pub fn decode(bytes: &[u8]) -> Result<BgraImage> {
    if bytes.len() < HEADER_LEN {
        anyhow::bail!("file is shorter than a TGA header ({} bytes)", bytes.len());
    }

    let id_len = bytes[0] as usize;
    let color_map_type = bytes[1];
    let image_type = bytes[2];
    let color_map_len = u16::from_le_bytes([bytes[5], bytes[6]]) as usize;
    let color_map_entry_bits = bytes[7] as usize;
    let width = u16::from_le_bytes([bytes[12], bytes[13]]) as u32;
    let height = u16::from_le_bytes([bytes[14], bytes[15]]) as u32;
    let bpp = bytes[16];
    let descriptor = bytes[17];

    if image_type != UNCOMPRESSED_TRUE_COLOR {
        anyhow::bail!("unsupported TGA image type {}", image_type);
    }
    if bpp != 24 && bpp != 32 {
        anyhow::bail!("unsupported TGA pixel depth {}", bpp);
    }
    if width == 0 || height == 0 {
        anyhow::bail!("TGA has an empty extent {}x{}", width, height);
    }

    let color_map_bytes = if color_map_type == 0 {
        0
    } else {
        color_map_len * color_map_entry_bits.div_ceil(8)
    };
    let data_start = HEADER_LEN + id_len + color_map_bytes;
    let src_pixel = (bpp / 8) as usize;
    let row_bytes = width as usize * src_pixel;
    let data_len = row_bytes * height as usize;

    let data = bytes
        .get(data_start..data_start + data_len)
        .with_context(|| {
            format!(
                "pixel data truncated: need {} bytes at offset {}, file has {}",
                data_len,
                data_start,
                bytes.len()
            )
        })?;

    let top_down = descriptor & TOP_LEFT_ORIGIN != 0;
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for row in 0..height as usize {
        let src_row = if top_down { row } else { height as usize - 1 - row };
        let line = &data[src_row * row_bytes..(src_row + 1) * row_bytes];
        for px in line.chunks_exact(src_pixel) {
            let alpha = if src_pixel == 4 { px[3] } else { 0xff };
            pixels.extend_from_slice(&[px[0], px[1], px[2], alpha]);
        }
    }

    Ok(BgraImage {
        width,
        height,
        pixels,
    })
}
