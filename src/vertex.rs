//! Vertices to be passed on to the GPU in vertex buffers and such.

use std::hash::{Hash, Hasher};
use std::mem::size_of;

use ash::vk;
use nalgebra_glm as glm;

/// Bytes fetched per vertex-shader invocation. Vertex bandwidth figures are
/// derived from this.
pub const VERTEX_SIZE: usize = size_of::<Vertex>();

/// A mesh vertex: position, normal and a single texture coordinate.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Vertex {
    pub pos: glm::Vec3,
    pub normal: glm::Vec3,
    pub tex_coord: glm::Vec2,
}

impl Vertex {
    pub const fn new(pos: glm::Vec3, normal: glm::Vec3, tex_coord: glm::Vec2) -> Self {
        Self {
            pos,
            normal,
            tex_coord,
        }
    }

    /// Return a descriptor telling Vulkan the number of bytes between data
    /// entries and whether to move to the next data entry after each vertex
    /// or after each instance.
    pub const fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Attributes consumed by the textured program.
    pub const fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        let normal = vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: size_of::<glm::Vec3>() as u32,
        };

        let tex_coord = vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 2 * size_of::<glm::Vec3>() as u32,
        };

        [Self::position_attribute(), normal, tex_coord]
    }

    /// The only attribute the cull and rasterizer programs read.
    pub const fn position_attribute() -> vk::VertexInputAttributeDescription {
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        }
    }
}

impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.pos == other.pos && self.normal == other.normal && self.tex_coord == other.tex_coord
    }
}

/// Note: This implementation of Eq is only valid if the vertices being compared
/// do not contain NaN in any of their data. For now, this is a safe assumption.
impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for component in self
            .pos
            .iter()
            .chain(self.normal.iter())
            .chain(self.tex_coord.iter())
        {
            component.to_bits().hash(state);
        }
    }
}
