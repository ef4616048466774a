// Static scene data: which demo version runs, its vertices, and the camera
// matrix written once into the uniform buffer.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use serde::Deserialize;

/// The three successive versions of the demo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemoVersion {
    /// One textured triangle
    Triangle,
    /// One textured quad
    Quad,
    /// Two stacked quads with a depth buffer and a mipmapped texture
    #[default]
    LayeredQuads,
}

impl DemoVersion {
    pub fn vertices(self) -> &'static [Vertex] {
        match self {
            DemoVersion::Triangle => &TRIANGLE,
            DemoVersion::Quad => &LAYERED_QUADS[..6],
            DemoVersion::LayeredQuads => &LAYERED_QUADS,
        }
    }

    /// Vertex count of the single draw call
    pub fn vertex_count(self) -> u32 {
        self.vertices().len() as u32
    }

    pub fn uses_depth(self) -> bool {
        matches!(self, DemoVersion::LayeredQuads)
    }

    pub fn uses_mipmaps(self) -> bool {
        matches!(self, DemoVersion::LayeredQuads)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

const fn v(x: f32, y: f32, z: f32, u: f32, w: f32) -> Vertex {
    Vertex { position: [x, y, z], uv: [u, w] }
}

// Vulkan clip space puts (-1, -1) in the upper-left corner, Y grows downwards.
static TRIANGLE: [Vertex; 3] = [
    v(-0.5, 0.5, 0.0, 0.0, 0.0),
    v(0.5, 0.5, 0.0, 1.0, 0.0),
    v(0.0, -0.5, 0.0, 0.5, 1.0),
];

static LAYERED_QUADS: [Vertex; 12] = [
    v(-0.5, 0.5, 0.0, 0.0, 0.0),
    v(0.5, 0.5, 0.0, 1.0, 0.0),
    v(-0.5, -0.5, 0.0, 0.0, 1.0),
    v(-0.5, -0.5, 0.0, 0.0, 1.0),
    v(0.5, 0.5, 0.0, 1.0, 0.0),
    v(0.5, -0.5, 0.0, 1.0, 1.0),
    v(-0.5, 0.5, 0.2, 0.0, 0.0),
    v(0.5, 0.5, 0.2, 1.0, 0.0),
    v(-0.5, -0.5, 0.2, 0.0, 1.0),
    v(-0.5, -0.5, 0.2, 0.0, 1.0),
    v(0.5, 0.5, 0.2, 1.0, 0.0),
    v(0.5, -0.5, 0.2, 1.0, 1.0),
];

/// Vertex input layout matching `Vertex` (location 0 = position, 1 = uv)
pub fn vertex_input_info() -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let binding = vk::VertexInputBindingDescription::builder()
        .binding(0)
        .stride(std::mem::size_of::<Vertex>() as u32)
        .input_rate(vk::VertexInputRate::VERTEX)
        .build();

    let position_attr = vk::VertexInputAttributeDescription::builder()
        .binding(0)
        .location(0)
        .format(vk::Format::R32G32B32_SFLOAT)
        .offset(0)
        .build();

    let uv_attr = vk::VertexInputAttributeDescription::builder()
        .binding(0)
        .location(1)
        .format(vk::Format::R32G32_SFLOAT)
        .offset(std::mem::size_of::<[f32; 3]>() as u32)
        .build();

    (vec![binding], vec![position_attr, uv_attr])
}

/// Camera matrix for the uniform buffer.
///
/// 90 degree vertical field of view, eye slightly off the quads looking at
/// the origin. The Y axis is flipped for Vulkan's clip space.
pub fn view_projection(width: u32, height: u32) -> Mat4 {
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    let mut projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, aspect, 0.1, 100.0);
    projection.y_axis.y *= -1.0;

    let view = Mat4::look_at_rh(Vec3::new(1.0, 0.0, -0.1), Vec3::ZERO, Vec3::Y);
    projection * view
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_counts_per_version() {
        assert_eq!(DemoVersion::Triangle.vertex_count(), 3);
        assert_eq!(DemoVersion::Quad.vertex_count(), 6);
        assert_eq!(DemoVersion::LayeredQuads.vertex_count(), 12);
    }

    #[test]
    fn test_only_layered_version_has_depth_and_mips() {
        assert!(!DemoVersion::Triangle.uses_depth());
        assert!(!DemoVersion::Quad.uses_mipmaps());
        assert!(DemoVersion::LayeredQuads.uses_depth());
        assert!(DemoVersion::LayeredQuads.uses_mipmaps());
    }

    #[test]
    fn test_vertex_layout_matches_struct() {
        let (bindings, attributes) = vertex_input_info();
        assert_eq!(bindings[0].stride, 20);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(std::mem::size_of::<Vertex>(), 20);
    }

    #[test]
    fn test_view_projection_keeps_origin_in_front() {
        let clip = view_projection(1280, 720) * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(clip.w > 0.0);
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn test_view_projection_survives_zero_height() {
        let m = view_projection(640, 0);
        assert!(m.is_finite());
    }
}
