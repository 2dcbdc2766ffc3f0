//! Procedural benchmark geometry: a stack of square grids.
//!
//! The first slice faces the viewer. Every other slice has its winding
//! reversed, so it is back-face culled and never rasterized. That way the
//! vertex load scales with `--triangles` while the fill load stays at one
//! screen-sized grid.

use nalgebra_glm as glm;
use thiserror::Error;
use tracing::debug;

use crate::{mesh::Mesh, vertex::Vertex};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("Grid size must be at least 1")]
    EmptyGrid,
    #[error("{triangles} triangles do not fill a whole number of {size}x{size} grid slices")]
    UnevenSlices { triangles: u32, size: u32 },
    #[error("Generated {generated} triangles, but {requested} were requested")]
    TriangleCountMismatch { generated: usize, requested: u32 },
}

/// Dimensions of a grid stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridShape {
    /// Cells per axis within one slice.
    pub size: u32,
    /// Number of stacked slices.
    pub slices: u32,
}

impl GridShape {
    /// Work out how many slices of `size`x`size` cells hold exactly
    /// `triangles` triangles.
    pub fn for_triangles(triangles: u32, size: u32) -> Result<Self, GridError> {
        if size == 0 {
            return Err(GridError::EmptyGrid);
        }

        let per_slice = u64::from(size) * u64::from(size) * 2;
        let slices = u64::from(triangles) / per_slice;
        if slices == 0 || slices * per_slice != u64::from(triangles) {
            return Err(GridError::UnevenSlices { triangles, size });
        }

        Ok(Self {
            size,
            slices: slices as u32,
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.size as usize * self.size as usize * 2 * self.slices as usize
    }
}

/// Build the non-indexed grid stack holding exactly `triangles` triangles.
#[tracing::instrument(level = "DEBUG")]
pub fn build_grid(triangles: u32, size: u32) -> Result<Mesh, GridError> {
    let shape = GridShape::for_triangles(triangles, size)?;

    let mut vertices = Vec::with_capacity(shape.triangle_count() * 3);
    let normal = glm::vec3(0.0, 0.0, 1.0);
    let mut push = |x: f32, y: f32, z: f32, u: f32, v: f32| {
        vertices.push(Vertex::new(glm::vec3(x, y, z), normal, glm::vec2(u, v)));
    };

    // Scaled by sqrt(2) so the grid still covers the viewport once rotated.
    let extent = std::f32::consts::SQRT_2;
    let coord = |n: u32| n as f32 / shape.size as f32 * extent - extent / 2.0;

    for nz in 0..shape.slices {
        let z = nz as f32 / shape.slices as f32;
        let front = nz == 0;

        for ny in 0..shape.size {
            for nx in 0..shape.size {
                let (x, y) = (coord(nx), coord(ny));
                let (x1, y1) = (coord(nx + 1), coord(ny + 1));

                push(x, y, z, 0.0, 0.0);
                if front {
                    push(x1, y, z, 1.0, 0.0);
                    push(x1, y1, z, 1.0, 1.0);
                } else {
                    push(x1, y1, z, 1.0, 1.0);
                    push(x1, y, z, 1.0, 0.0);
                }

                push(x1, y1, z, 0.0, 0.0);
                if front {
                    push(x, y1, z, 1.0, 0.0);
                    push(x, y, z, 1.0, 1.0);
                } else {
                    push(x, y, z, 1.0, 1.0);
                    push(x, y1, z, 1.0, 0.0);
                }
            }
        }
    }

    let mesh = Mesh {
        vertices,
        indices: Vec::new(),
    };

    if mesh.triangle_count() != triangles as usize {
        return Err(GridError::TriangleCountMismatch {
            generated: mesh.triangle_count(),
            requested: triangles,
        });
    }

    debug!(
        size = shape.size,
        slices = shape.slices,
        vertex_count = mesh.vertices.len(),
        "Generated grid mesh"
    );

    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Twice the signed area of a triangle's XY projection; positive for
    /// counter-clockwise winding.
    fn winding(mesh: &Mesh, triangle: usize) -> f32 {
        let [a, b, c] = [0, 1, 2].map(|i| mesh.vertices[triangle * 3 + i].pos);
        (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)
    }

    #[test]
    fn slices_follow_triangle_budget() {
        let shape = GridShape::for_triangles(131_072, 16).unwrap();
        assert_eq!(shape.slices, 256);
        assert_eq!(shape.triangle_count(), 131_072);

        let default = GridShape::for_triangles(1024 * 1024 * 2, 16).unwrap();
        assert_eq!(default.slices, 4096);
    }

    #[test]
    fn generated_count_is_exact() {
        let mesh = build_grid(131_072, 16).unwrap();
        assert_eq!(mesh.triangle_count(), 131_072);
        assert_eq!(mesh.vertices.len(), 131_072 * 3);
        assert!(!mesh.is_indexed());
    }

    #[test]
    fn uneven_budgets_are_rejected() {
        assert_eq!(
            GridShape::for_triangles(1000, 16),
            Err(GridError::UnevenSlices {
                triangles: 1000,
                size: 16
            })
        );
        assert_eq!(
            build_grid(256, 16).unwrap_err(),
            GridError::UnevenSlices {
                triangles: 256,
                size: 16
            }
        );
        assert_eq!(GridShape::for_triangles(512, 0), Err(GridError::EmptyGrid));
    }

    #[test]
    fn only_the_first_slice_faces_forward() {
        let mesh = build_grid(2 * 4 * 4 * 2, 4).unwrap();
        let per_slice = 4 * 4 * 2;

        for t in 0..per_slice {
            assert!(winding(&mesh, t) > 0.0, "front triangle {t} is clockwise");
        }
        for t in per_slice..2 * per_slice {
            assert!(winding(&mesh, t) < 0.0, "back triangle {t} is counter-clockwise");
            assert_eq!(mesh.vertices[t * 3].pos.z, 0.5);
        }
    }

    #[test]
    fn grid_spans_the_rotated_viewport() {
        let mesh = build_grid(2 * 8 * 8, 8).unwrap();
        let (lo, hi) = mesh.bounds().unwrap();
        let half = std::f32::consts::SQRT_2 / 2.0;
        assert!((lo.x + half).abs() < 1e-6 && (hi.x - half).abs() < 1e-6);
        assert!((lo.y + half).abs() < 1e-6 && (hi.y - half).abs() < 1e-6);
    }
}
