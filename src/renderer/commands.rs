//! Command pools, per-frame command buffers, and one-shot transient commands.

use super::devices::QueueFamilyIndices;
use crate::{app::AppData, MAX_FRAMES_IN_FLIGHT};
use ash::{vk, Device, Entry, Instance};
use color_eyre::Result;

/// Create the command pools, which manage the memory used to store command
/// buffers.
///
/// Frame command buffers are re-recorded every frame, so their pool allows
/// resetting individual buffers. The transient pool serves one-shot uploads.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_command_pools(
    entry: &Entry,
    instance: &Instance,
    device: &Device,
    data: &mut AppData,
) -> Result<()> {
    let qf_indices = QueueFamilyIndices::get(entry, instance, data, data.physical_device)?;

    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(qf_indices.graphics);
    data.command_pool = device.create_command_pool(&info, None)?;

    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::TRANSIENT)
        .queue_family_index(qf_indices.graphics);
    data.transient_command_pool = device.create_command_pool(&info, None)?;

    Ok(())
}

/// Allocate one command buffer per frame in flight.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_command_buffers(device: &Device, data: &mut AppData) -> Result<()> {
    let allocate_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(data.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);

    data.command_buffers = device.allocate_command_buffers(&allocate_info)?;

    Ok(())
}

/// Allocate a command buffer from the transient pool and start recording.
/// Finish with [`end_transient_commands()`].
pub(crate) unsafe fn begin_transient_commands(
    device: &Device,
    data: &AppData,
) -> Result<vk::CommandBuffer> {
    let info = vk::CommandBufferAllocateInfo::builder()
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_pool(data.transient_command_pool)
        .command_buffer_count(1);

    let command_buffer = device.allocate_command_buffers(&info)?[0];

    let info =
        vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(command_buffer, &info)?;

    Ok(command_buffer)
}

/// Submit a transient command buffer, wait for the graphics queue to drain and
/// free the buffer.
pub(crate) unsafe fn end_transient_commands(
    device: &Device,
    data: &AppData,
    command_buffer: vk::CommandBuffer,
) -> Result<()> {
    device.end_command_buffer(command_buffer)?;

    let command_buffers = &[command_buffer];
    let info = vk::SubmitInfo::builder().command_buffers(command_buffers);

    let submitted = device
        .queue_submit(data.graphics_queue, &[*info], vk::Fence::null())
        .and_then(|_| device.queue_wait_idle(data.graphics_queue));

    device.free_command_buffers(data.transient_command_pool, command_buffers);

    Ok(submitted?)
}
