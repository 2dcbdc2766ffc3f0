//! Images, and the texture sampled by the textured program.

use std::{fmt::Debug, fs::File, io::Read, path::Path, ptr};

use ash::{vk, Device};
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, warn};

use crate::app::AppData;

use super::{
    buffers::create_buffer,
    commands::{begin_transient_commands, end_transient_commands},
    memory::memory_type_index,
};

/// Every texture is uploaded as 8-bit sRGB RGBA.
pub(crate) const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Decoded texture texels, tightly packed RGBA.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TexturePixels {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) rgba: Vec<u8>,
}

impl TexturePixels {
    /// Load a PNG, falling back to [`TexturePixels::grid()`] when it cannot
    /// be read.
    #[tracing::instrument(level = "DEBUG", skip_all, fields(path = ?path))]
    pub(crate) fn load<P>(path: P) -> Self
    where
        P: AsRef<Path> + Debug,
    {
        match File::open(&path)
            .map_err(Into::into)
            .and_then(Self::decode_png)
        {
            Ok(pixels) => pixels,
            Err(err) => {
                warn!(?path, %err, "Could not load texture, using a generated grid");
                Self::grid(256, 8)
            }
        }
    }

    /// Decode a PNG into RGBA.
    ///
    /// Indexed and low bit depth images are expanded and 16-bit channels are
    /// stripped to 8 bits. Every image is assumed to be sRGB encoded.
    pub(crate) fn decode_png<R: Read>(reader: R) -> Result<Self> {
        let mut decoder = png::Decoder::new(reader);
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);

        let mut reader = decoder.read_info()?;
        let mut pixels = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut pixels)?;
        pixels.truncate(info.buffer_size());

        debug!(
            width = info.width,
            height = info.height,
            color_type = ?info.color_type,
            bit_depth = ?info.bit_depth,
            "Decoded texture"
        );

        Ok(Self {
            width: info.width,
            height: info.height,
            rgba: expand_to_rgba(info.color_type, &pixels)?,
        })
    }

    /// A square of light grid lines on a dark background, `cells` cells per side.
    pub(crate) fn grid(size: u32, cells: u32) -> Self {
        let size = size.max(1);
        let pitch = (size / cells.max(1)).max(1);

        let mut rgba = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let line = x % pitch == 0 || y % pitch == 0;
                let v = if line { 230 } else { 48 };
                rgba.extend_from_slice(&[v, v, v, 255]);
            }
        }

        Self {
            width: size,
            height: size,
            rgba,
        }
    }
}

/// Widen 8-bit texels of any non-indexed PNG color type to RGBA.
fn expand_to_rgba(color_type: png::ColorType, pixels: &[u8]) -> Result<Vec<u8>> {
    use png::ColorType;

    let rgba = match color_type {
        ColorType::Rgba => pixels.to_vec(),
        ColorType::Rgb => pixels
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        ColorType::GrayscaleAlpha => pixels
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        ColorType::Grayscale => pixels.iter().flat_map(|g| [*g, *g, *g, 255]).collect(),
        ColorType::Indexed => return Err(eyre!("Indexed PNG texels were not expanded")),
    };

    Ok(rgba)
}

/// Create the texture image from decoded texels, plus its view and sampler.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_texture(
    device: &Device,
    data: &mut AppData,
    pixels: &TexturePixels,
) -> Result<()> {
    let size = pixels.rgba.len() as vk::DeviceSize;

    let (staging_buffer, staging_memory) = create_buffer(
        device,
        data,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
    )?;

    {
        let memory = device.map_memory(staging_memory, 0, size, vk::MemoryMapFlags::empty())?;
        ptr::copy_nonoverlapping(pixels.rgba.as_ptr(), memory.cast(), pixels.rgba.len());
        device.unmap_memory(staging_memory);
    }

    let (image, image_memory) = create_image(
        device,
        data,
        pixels.width,
        pixels.height,
        TEXTURE_FORMAT,
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
    )?;
    data.texture_image = image;
    data.texture_image_memory = image_memory;

    let uploaded = upload_texels(device, data, staging_buffer, image, pixels.width, pixels.height);

    device.destroy_buffer(staging_buffer, None);
    device.free_memory(staging_memory, None);
    uploaded?;

    data.texture_image_view =
        create_image_view(device, image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR)?;
    data.texture_sampler = create_texture_sampler(device)?;

    Ok(())
}

/// Destroy the objects made by [`create_texture()`].
pub(crate) unsafe fn destroy_texture(device: &Device, data: &AppData) {
    device.destroy_sampler(data.texture_sampler, None);
    device.destroy_image_view(data.texture_image_view, None);
    device.destroy_image(data.texture_image, None);
    device.free_memory(data.texture_image_memory, None);
}

/// Create a single-level, optimally tiled, device-local 2D image.
pub(crate) unsafe fn create_image(
    device: &Device,
    data: &AppData,
    width: u32,
    height: u32,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
) -> Result<(vk::Image, vk::DeviceMemory)> {
    let info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(usage)
        .samples(vk::SampleCountFlags::TYPE_1)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let image = device.create_image(&info, None)?;

    let requirements = device.get_image_memory_requirements(image);
    let info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index(
            &data.memory_properties,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            requirements,
        )?);

    let image_memory = device.allocate_memory(&info, None)?;
    device.bind_image_memory(image, image_memory, 0)?;

    Ok((image, image_memory))
}

/// Create a view onto the single level and layer of an image.
///
/// Remember to destroy the view before destroying its image.
pub(crate) unsafe fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let subresource_range = vk::ImageSubresourceRange::builder()
        .aspect_mask(aspect_mask)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(*subresource_range);

    Ok(device.create_image_view(&info, None)?)
}

/// Copy staged texels into `image`, leaving it ready for sampling.
unsafe fn upload_texels(
    device: &Device,
    data: &AppData,
    staging_buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) -> Result<()> {
    let subresource = vk::ImageSubresourceRange::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    let to_transfer = vk::ImageMemoryBarrier::builder()
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(*subresource)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);

    let to_shader = vk::ImageMemoryBarrier::builder()
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(*subresource)
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ);

    let region = vk::BufferImageCopy::builder()
        .image_subresource(
            *vk::ImageSubresourceLayers::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        });

    let command_buffer = begin_transient_commands(device, data)?;

    device.cmd_pipeline_barrier(
        command_buffer,
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[*to_transfer],
    );
    device.cmd_copy_buffer_to_image(
        command_buffer,
        staging_buffer,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[*region],
    );
    device.cmd_pipeline_barrier(
        command_buffer,
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[*to_shader],
    );

    end_transient_commands(device, data, command_buffer)
}

/// Bilinear, repeating sampler. Anisotropic filtering stays off since the
/// device feature is not enabled.
unsafe fn create_texture_sampler(device: &Device) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(false)
        .max_anisotropy(1.0)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);

    Ok(device.create_sampler(&info, None)?)
}
