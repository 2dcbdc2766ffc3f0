//! The render pass, framebuffers and the graphics pipelines of each pass.

use std::{ffi::CStr, fs::File, path::Path};

use ash::{vk, Device, Instance};
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use tracing::{debug, error};

use crate::{
    app::AppData,
    bench::{Pass, Program},
    vertex::Vertex,
};

use super::{depth_tests::get_depth_format, uniforms::PUSH_CONSTANT_SIZE};

/// One pipeline per distinct pass configuration.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Pipelines {
    pub(crate) textured: vk::Pipeline,
    pub(crate) textured_discard: vk::Pipeline,
    pub(crate) cull: vk::Pipeline,
    pub(crate) rasterizer: vk::Pipeline,
}

impl Pipelines {
    pub(crate) fn for_pass(&self, pass: Pass) -> vk::Pipeline {
        match (pass.program(), pass.rasterizer_discard()) {
            (Program::Textured, false) => self.textured,
            (Program::Textured, true) => self.textured_discard,
            (Program::Cull, _) => self.cull,
            (Program::Rasterizer, _) => self.rasterizer,
        }
    }

    fn all(&self) -> [vk::Pipeline; 4] {
        [self.textured, self.textured_discard, self.cull, self.rasterizer]
    }
}

/// Vertex and fragment modules of one program.
#[derive(Clone, Copy, Debug)]
struct ShaderProgram {
    vertex: vk::ShaderModule,
    fragment: vk::ShaderModule,
}

/// Create the render pass every benchmark pass runs in.
///
/// Color and depth are cleared on load. Passes run back to back within a
/// frame, so the external dependency orders each pass's attachment writes
/// after the previous pass's.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_render_pass(
    instance: &Instance,
    device: &Device,
    data: &mut AppData,
) -> Result<()> {
    data.depth_format = get_depth_format(instance, data.physical_device)?;

    let color_attachment = vk::AttachmentDescription::builder()
        .format(data.swapchain_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let depth_attachment = vk::AttachmentDescription::builder()
        .format(data.depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&*color_attachment_ref))
        .depth_stencil_attachment(&depth_attachment_ref);

    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let writes =
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;

    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(writes)
        .dst_stage_mask(stages)
        .dst_access_mask(writes);

    let attachments = &[*color_attachment, *depth_attachment];
    let subpasses = &[*subpass];
    let dependencies = &[*dependency];
    let info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    data.render_pass = device.create_render_pass(&info, None)?;

    Ok(())
}

/// Layout shared by every pipeline: the descriptor set and the `nlights`
/// push constant.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_pipeline_layout(device: &Device, data: &mut AppData) -> Result<()> {
    let push_constant_range = vk::PushConstantRange::builder()
        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        .offset(0)
        .size(PUSH_CONSTANT_SIZE);

    let set_layouts = &[data.descriptor_set_layout];
    let push_constant_ranges = &[*push_constant_range];
    let info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);

    data.pipeline_layout = device.create_pipeline_layout(&info, None)?;

    Ok(())
}

/// Load the three programs from `shader_dir` and build every pipeline.
///
/// Each program that fails to load is reported. If any does, no pipeline is
/// created.
#[tracing::instrument(level = "DEBUG", skip(device, data))]
pub(crate) unsafe fn create_pipelines(
    device: &Device,
    data: &mut AppData,
    shader_dir: &Path,
) -> Result<()> {
    let mut programs = Vec::with_capacity(Program::ALL.len());
    let mut failures = 0;

    for program in Program::ALL {
        match load_program(device, shader_dir, program) {
            Ok(modules) => programs.push((program, modules)),
            Err(err) => {
                error!(program = program.file_stem(), "Shader program failed: {err:?}");
                failures += 1;
            }
        }
    }

    let built = if failures > 0 {
        Err(eyre!("{failures} shader program(s) failed to load from {shader_dir:?}"))
    } else {
        build_pipelines(device, data, &programs)
    };

    for (_, modules) in &programs {
        device.destroy_shader_module(modules.vertex, None);
        device.destroy_shader_module(modules.fragment, None);
    }

    data.pipelines = built?;
    debug!(pipelines = ?data.pipelines, "Created graphics pipelines");

    Ok(())
}

unsafe fn build_pipelines(
    device: &Device,
    data: &AppData,
    programs: &[(Program, ShaderProgram)],
) -> Result<Pipelines> {
    let program = |wanted: Program| {
        programs
            .iter()
            .find(|(p, _)| *p == wanted)
            .map(|(_, modules)| *modules)
            .ok_or_else(|| eyre!("Shader program {wanted:?} was not loaded"))
    };

    let full_attributes = Vertex::attribute_descriptions();
    let position_only = [Vertex::position_attribute()];

    let textured = program(Program::Textured)?;
    Ok(Pipelines {
        textured: build_pipeline(device, data, textured, &full_attributes, false)?,
        textured_discard: build_pipeline(device, data, textured, &full_attributes, true)?,
        cull: build_pipeline(device, data, program(Program::Cull)?, &position_only, false)?,
        rasterizer: build_pipeline(
            device,
            data,
            program(Program::Rasterizer)?,
            &position_only,
            false,
        )?,
    })
}

/// Read `<stem>.vert.spv` and `<stem>.frag.spv` into shader modules.
unsafe fn load_program(device: &Device, dir: &Path, program: Program) -> Result<ShaderProgram> {
    let stem = program.file_stem();
    let vertex = create_shader_module(device, &dir.join(format!("{stem}.vert.spv")))?;
    match create_shader_module(device, &dir.join(format!("{stem}.frag.spv"))) {
        Ok(fragment) => Ok(ShaderProgram { vertex, fragment }),
        Err(err) => {
            device.destroy_shader_module(vertex, None);
            Err(err)
        }
    }
}

/// Create a shader module from a SPIR-V file.
unsafe fn create_shader_module(device: &Device, path: &Path) -> Result<vk::ShaderModule> {
    let mut file =
        File::open(path).wrap_err_with(|| format!("Error opening shader {}", path.display()))?;
    let code = ash::util::read_spv(&mut file)
        .wrap_err_with(|| format!("Error reading SPIR-V from {}", path.display()))?;

    let info = vk::ShaderModuleCreateInfo::builder().code(&code);

    device
        .create_shader_module(&info, None)
        .wrap_err_with(|| format!("Error creating shader module from {}", path.display()))
}

unsafe fn build_pipeline(
    device: &Device,
    data: &AppData,
    program: ShaderProgram,
    attributes: &[vk::VertexInputAttributeDescription],
    rasterizer_discard: bool,
) -> Result<vk::Pipeline> {
    let entry_point = CStr::from_bytes_with_nul_unchecked(b"main\0");
    let stages = &[
        *vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(program.vertex)
            .name(entry_point),
        *vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(program.fragment)
            .name(entry_point),
    ];

    let bindings = &[Vertex::binding_description()];
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(bindings)
        .vertex_attribute_descriptions(attributes);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // set per frame, so a resize does not rebuild the pipelines
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);
    let dynamic_states = &[vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(dynamic_states);

    // Clip space y points down in Vulkan, which flips the apparent winding.
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(rasterizer_discard)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false);
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(std::slice::from_ref(&*attachment));

    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(data.pipeline_layout)
        .render_pass(data.render_pass)
        .subpass(0);

    let pipelines = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[*info], None)
        .map_err(|(_, e)| eyre!("Error creating graphics pipeline: [{e:?}] {e}"))?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| eyre!("Driver returned no graphics pipeline"))
}

pub(crate) unsafe fn destroy_pipelines(device: &Device, data: &AppData) {
    data.pipelines
        .all()
        .into_iter()
        .for_each(|p| device.destroy_pipeline(p, None));
    device.destroy_pipeline_layout(data.pipeline_layout, None);
}

/// Create a framebuffer for every swapchain image, sharing the depth image.
#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_framebuffers(device: &Device, data: &mut AppData) -> Result<()> {
    data.framebuffers = data
        .swapchain_image_views
        .iter()
        .map(|view| {
            let attachments = &[*view, data.depth_image_view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(data.render_pass)
                .attachments(attachments)
                .width(data.swapchain_extent.width)
                .height(data.swapchain_extent.height)
                .layers(1);

            device.create_framebuffer(&create_info, None)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(())
}
