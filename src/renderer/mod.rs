pub(crate) mod buffers;
pub(crate) mod commands;
pub(crate) mod depth_tests;
pub(crate) mod devices;
pub(crate) mod extensions;
pub(crate) mod instance;
pub(crate) mod memory;
pub(crate) mod pipeline;
pub(crate) mod queries;
pub(crate) mod swapchain;
pub(crate) mod synchronization;
pub(crate) mod texture;
pub(crate) mod uniforms;
pub(crate) mod validation;
