//! Buffer allocation, and the device-local vertex and index buffers holding the
//! benchmark mesh.

use std::{mem::size_of_val, ptr};

use ash::{vk, Device};
use color_eyre::Result;
use tracing::debug;

use crate::{app::AppData, mesh::Mesh};

use super::{
    commands::{begin_transient_commands, end_transient_commands},
    memory::memory_type_index,
};

/// Create a buffer and bind freshly allocated memory to it.
pub(crate) unsafe fn create_buffer(
    device: &Device,
    data: &AppData,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        // only ever used from the graphics queue
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = device.create_buffer(&buffer_info, None)?;

    let requirements = device.get_buffer_memory_requirements(buffer);
    let memory_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index(
            &data.memory_properties,
            properties,
            requirements,
        )?);

    let memory = device.allocate_memory(&memory_info, None)?;
    device.bind_buffer_memory(buffer, memory, 0)?;

    Ok((buffer, memory))
}

/// Copy `size` bytes between buffers, waiting for the copy to finish.
unsafe fn copy_buffer(
    device: &Device,
    data: &AppData,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<()> {
    let command_buffer = begin_transient_commands(device, data)?;

    let region = vk::BufferCopy::builder().size(size);
    device.cmd_copy_buffer(command_buffer, src, dst, &[*region]);

    end_transient_commands(device, data, command_buffer)
}

/// Upload `items` into a new device-local buffer through a host-visible
/// staging buffer.
unsafe fn create_device_local_buffer<T: Copy>(
    device: &Device,
    data: &AppData,
    items: &[T],
    usage: vk::BufferUsageFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let size = size_of_val(items) as vk::DeviceSize;

    let (staging_buffer, staging_memory) = create_buffer(
        device,
        data,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
    )?;

    {
        let memory = device.map_memory(staging_memory, 0, size, vk::MemoryMapFlags::empty())?;
        ptr::copy_nonoverlapping(items.as_ptr(), memory.cast(), items.len());
        device.unmap_memory(staging_memory);
    }

    let (buffer, memory) = create_buffer(
        device,
        data,
        size,
        vk::BufferUsageFlags::TRANSFER_DST | usage,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let copied = copy_buffer(device, data, staging_buffer, buffer, size);

    device.destroy_buffer(staging_buffer, None);
    device.free_memory(staging_memory, None);

    copied?;
    Ok((buffer, memory))
}

/// Upload the mesh. Non-indexed meshes get no index buffer.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_mesh_buffers(
    device: &Device,
    data: &mut AppData,
    mesh: &Mesh,
) -> Result<()> {
    let (vertex_buffer, vertex_memory) = create_device_local_buffer(
        device,
        data,
        &mesh.vertices,
        vk::BufferUsageFlags::VERTEX_BUFFER,
    )?;
    data.vertex_buffer = vertex_buffer;
    data.vertex_buffer_memory = vertex_memory;

    if mesh.is_indexed() {
        let (index_buffer, index_memory) = create_device_local_buffer(
            device,
            data,
            &mesh.indices,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        data.index_buffer = index_buffer;
        data.index_buffer_memory = index_memory;
    }

    data.indexed = mesh.is_indexed();
    data.draw_count = mesh.submitted_vertex_count() as u32;

    debug!(
        vertices = mesh.vertices.len(),
        indices = mesh.indices.len(),
        indexed = data.indexed,
        "Uploaded mesh"
    );

    Ok(())
}

/// Destroy the buffers created by [`create_mesh_buffers()`].
pub(crate) unsafe fn destroy_mesh_buffers(device: &Device, data: &AppData) {
    device.destroy_buffer(data.vertex_buffer, None);
    device.free_memory(data.vertex_buffer_memory, None);

    // null handles are ignored
    device.destroy_buffer(data.index_buffer, None);
    device.free_memory(data.index_buffer_memory, None);
}
