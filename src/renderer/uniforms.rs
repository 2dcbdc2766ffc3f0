//! The uniform block, texture binding and light-count push constant shared by
//! every benchmark program.

use std::{mem::size_of, ptr};

use ash::{vk, Device};
use color_eyre::Result;

use crate::{app::AppData, mvp_matrix::Transforms, MAX_FRAMES_IN_FLIGHT};

use super::buffers::create_buffer;

/// Byte size of the `nlights` push constant.
pub(crate) const PUSH_CONSTANT_SIZE: u32 = size_of::<u32>() as u32;

/// Binding 0 is the [`Transforms`] block, binding 1 the texture.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_descriptor_set_layout(
    device: &Device,
    data: &mut AppData,
) -> Result<()> {
    let transforms_binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);

    let sampler_binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(1)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT);

    let bindings = &[*transforms_binding, *sampler_binding];
    let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);

    data.descriptor_set_layout = device.create_descriptor_set_layout(&info, None)?;

    Ok(())
}

/// One host-visible uniform buffer per frame in flight, so a frame never
/// overwrites transforms the GPU is still reading.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_uniform_buffers(device: &Device, data: &mut AppData) -> Result<()> {
    data.uniform_buffers.clear();
    data.uniform_buffers_memory.clear();

    for _ in 0..MAX_FRAMES_IN_FLIGHT {
        let (buffer, memory) = create_buffer(
            device,
            data,
            size_of::<Transforms>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?;

        data.uniform_buffers.push(buffer);
        data.uniform_buffers_memory.push(memory);
    }

    Ok(())
}

/// Copy this frame's transforms into its uniform buffer.
pub(crate) unsafe fn update_uniform_buffer(
    device: &Device,
    data: &AppData,
    frame: usize,
    transforms: &Transforms,
) -> Result<()> {
    let memory = data.uniform_buffers_memory[frame];
    let mapped = device.map_memory(
        memory,
        0,
        size_of::<Transforms>() as u64,
        vk::MemoryMapFlags::empty(),
    )?;
    ptr::copy_nonoverlapping(transforms, mapped.cast(), 1);
    device.unmap_memory(memory);

    Ok(())
}

/// Deallocate the buffers created by [`create_uniform_buffers()`].
pub(crate) unsafe fn destroy_uniform_buffers(device: &Device, data: &AppData) {
    data.uniform_buffers
        .iter()
        .for_each(|b| device.destroy_buffer(*b, None));
    data.uniform_buffers_memory
        .iter()
        .for_each(|m| device.free_memory(*m, None));
}

/// Allocate and fill one descriptor set per frame in flight. The texture and
/// uniform buffers must already exist.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_descriptor_sets(device: &Device, data: &mut AppData) -> Result<()> {
    let pool_sizes = &[
        *vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(MAX_FRAMES_IN_FLIGHT as u32),
        *vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(MAX_FRAMES_IN_FLIGHT as u32),
    ];
    let info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(pool_sizes)
        .max_sets(MAX_FRAMES_IN_FLIGHT as u32);
    data.descriptor_pool = device.create_descriptor_pool(&info, None)?;

    let layouts = vec![data.descriptor_set_layout; MAX_FRAMES_IN_FLIGHT];
    let info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(data.descriptor_pool)
        .set_layouts(&layouts);
    data.descriptor_sets = device.allocate_descriptor_sets(&info)?;

    for (set, buffer) in data.descriptor_sets.iter().zip(&data.uniform_buffers) {
        let buffer_info = vk::DescriptorBufferInfo::builder()
            .buffer(*buffer)
            .offset(0)
            .range(size_of::<Transforms>() as u64)
            .build();
        let image_info = vk::DescriptorImageInfo::builder()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(data.texture_image_view)
            .sampler(data.texture_sampler)
            .build();

        let writes = &[
            *vk::WriteDescriptorSet::builder()
                .dst_set(*set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(std::slice::from_ref(&buffer_info)),
            *vk::WriteDescriptorSet::builder()
                .dst_set(*set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(std::slice::from_ref(&image_info)),
        ];
        device.update_descriptor_sets(writes, &[]);
    }

    Ok(())
}
