pub mod app;
pub mod bench;
pub mod grid;
pub mod mesh;
pub mod metrics;
pub mod model;
pub mod mvp_matrix;
pub mod options;
pub mod queries;
pub(crate) mod renderer;
pub mod stats;
pub mod util;
pub mod vertex;

/// The maximum number of frames that the app is allowed to submit to the GPU
/// for rendering before we have to wait for the GPU to finish rendering a
/// frame.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
