//! The per-frame uniform block shared by every benchmark program.

use nalgebra_glm as glm;

/// Size of the light array in the textured program's uniform block.
pub const MAX_LIGHTS: usize = 64;

/// Transforms and lights for one frame.
///
/// This is sent to the GPU within a uniform buffer object, which is why it's
/// `#[repr(C)]`. Lights are `vec4` to match std140 array stride.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Transforms {
    pub mvp: glm::Mat4,
    pub mv: glm::Mat4,
    pub lights: [glm::Vec4; MAX_LIGHTS],
}

impl Transforms {
    /// Model rotated about Z by `degrees`, with identity view and projection.
    /// The benchmark geometry is built directly in clip space.
    pub fn rotation_z(degrees: f32) -> Self {
        let model = glm::rotate_z(&glm::identity(), degrees.to_radians());
        let view = glm::identity::<f32, 4>();
        let projection = glm::identity::<f32, 4>();

        let mv = view * model;
        Self {
            mvp: projection * mv,
            mv,
            lights: [glm::Vec4::zeros(); MAX_LIGHTS],
        }
    }
}

impl Default for Transforms {
    fn default() -> Self {
        Self::rotation_z(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_turn_maps_x_to_y() {
        let t = Transforms::rotation_z(90.0);
        let p = t.mvp * glm::vec4(1.0, 0.0, 0.5, 1.0);
        assert!((p.x - 0.0).abs() < 1e-6);
        assert!((p.y - 1.0).abs() < 1e-6);
        assert!((p.z - 0.5).abs() < 1e-6);
        assert_eq!(t.mv, t.mvp);
    }

    #[test]
    fn uniform_block_layout() {
        assert_eq!(std::mem::size_of::<Transforms>(), 2 * 64 + MAX_LIGHTS * 16);
    }
}
