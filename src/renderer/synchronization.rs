//! Semaphores and fences pacing frames in flight.

use crate::{app::AppData, MAX_FRAMES_IN_FLIGHT};
use ash::{vk, Device};
use color_eyre::Result;

/// Create an acquire semaphore, a render-finished semaphore and a fence for
/// each frame in flight. Fences start signalled so the first frames do not
/// wait.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_sync_objects(device: &Device, data: &mut AppData) -> Result<()> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

    for _ in 0..MAX_FRAMES_IN_FLIGHT {
        data.image_available_semaphores
            .push(device.create_semaphore(&semaphore_info, None)?);
        data.render_finished_semaphores
            .push(device.create_semaphore(&semaphore_info, None)?);
        data.in_flight_fences
            .push(device.create_fence(&fence_info, None)?);
    }

    reset_images_in_flight(data);

    Ok(())
}

/// Forget which frame last rendered to each swapchain image. Call whenever
/// the swapchain images change.
pub(crate) fn reset_images_in_flight(data: &mut AppData) {
    data.images_in_flight = vec![vk::Fence::null(); data.swapchain_images.len()];
}

pub(crate) unsafe fn destroy_sync_objects(device: &Device, data: &AppData) {
    data.render_finished_semaphores
        .iter()
        .chain(&data.image_available_semaphores)
        .for_each(|s| device.destroy_semaphore(*s, None));

    data.in_flight_fences
        .iter()
        .for_each(|f| device.destroy_fence(*f, None));
}
