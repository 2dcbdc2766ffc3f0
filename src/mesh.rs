//! CPU-side geometry, before it is uploaded to the GPU.

use nalgebra_glm as glm;

use crate::vertex::Vertex;

/// A triangle list, optionally indexed.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    /// Empty for non-indexed meshes.
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }

    /// Number of vertices the draw call submits: the index count for indexed
    /// meshes, the vertex count otherwise.
    pub fn submitted_vertex_count(&self) -> usize {
        if self.is_indexed() {
            self.indices.len()
        } else {
            self.vertices.len()
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.submitted_vertex_count() / 3
    }

    /// Axis-aligned bounds of all vertex positions, or `None` if empty.
    pub fn bounds(&self) -> Option<(glm::Vec3, glm::Vec3)> {
        let first = self.vertices.first()?.pos;
        Some(self.vertices.iter().fold((first, first), |(lo, hi), v| {
            (glm::min2(&lo, &v.pos), glm::max2(&hi, &v.pos))
        }))
    }
}

/// Triangle and vertex totals the harness needs for its derived metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshStats {
    pub triangles: u64,
    pub submitted_vertices: u64,
}

impl From<&Mesh> for MeshStats {
    fn from(mesh: &Mesh) -> Self {
        Self {
            triangles: mesh.triangle_count() as u64,
            submitted_vertices: mesh.submitted_vertex_count() as u64,
        }
    }
}
