use crate::{
    bench::{GpuBackend, Pass},
    mesh::Mesh,
    mvp_matrix::Transforms,
    options::BenchOptions,
    queries::{QueryBackend, QueryKind},
    renderer::{
        buffers::{create_mesh_buffers, destroy_mesh_buffers},
        commands::{create_command_buffers, create_command_pools},
        depth_tests::{create_depth_objects, destroy_depth_objects},
        devices::{create_logical_device, pick_physical_device},
        extensions::Extensions,
        instance::create_instance,
        pipeline::{
            create_framebuffers, create_pipeline_layout, create_pipelines, create_render_pass,
            destroy_pipelines, Pipelines,
        },
        queries::{
            create_query_pools, destroy_query_pools, prime_query_pools, query_ready,
            query_result, reset_slot, timestamp_index,
        },
        swapchain::{create_swapchain, create_swapchain_image_views},
        synchronization::{create_sync_objects, destroy_sync_objects, reset_images_in_flight},
        texture::{create_texture, destroy_texture, TexturePixels},
        uniforms::{
            create_descriptor_set_layout, create_descriptor_sets, create_uniform_buffers,
            destroy_uniform_buffers, update_uniform_buffer,
        },
    },
    MAX_FRAMES_IN_FLIGHT,
};

use ash::{vk, Device, Entry, Instance};
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use tracing::{debug, info};
use winit::{dpi::PhysicalSize, window::Window};

/// Clear color of every pass.
const CLEAR_COLOR: [f32; 4] = [0.2, 0.2, 0.2, 1.0];

/// The Vulkan renderer driven by the benchmark harness.
pub struct App {
    entry: Entry,
    instance: Instance,
    data: AppData,
    device: Device,
    extensions: Extensions,

    /// The frame in flight we're currently recording.
    frame: usize,

    /// Set when the window has been resized; the swapchain is recreated
    /// after the next present.
    resized: bool,

    /// Current inner size of the window.
    window_size: PhysicalSize<u32>,

    /// Command buffer of the frame being recorded, between `begin_frame` and
    /// `end_frame`.
    recording: Option<vk::CommandBuffer>,

    /// Swapchain image acquired for the frame being recorded.
    image_index: u32,

    /// Open brackets on the shared pipeline statistics query.
    statistics_depth: u32,

    /// Set once every Vulkan object has been destroyed.
    released: bool,
}

/// Vulkan handles and associated properties used by our Vulkan [`App`].
#[derive(Clone, Debug, Default)]
pub struct AppData {
    pub surface: vk::SurfaceKHR,

    pub physical_device: vk::PhysicalDevice,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period: f32,
    /// Meaningful bits of a timestamp on the graphics queue.
    pub timestamp_mask: u64,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    pub swapchain: vk::SwapchainKHR,
    pub swapchain_images: Vec<vk::Image>,
    pub swapchain_image_views: Vec<vk::ImageView>,
    pub swapchain_format: vk::Format,
    pub swapchain_extent: vk::Extent2D,

    pub render_pass: vk::RenderPass,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    pub(crate) pipelines: Pipelines,

    pub framebuffers: Vec<vk::Framebuffer>,

    pub vertex_buffer: vk::Buffer,
    pub vertex_buffer_memory: vk::DeviceMemory,
    /// Null for non-indexed meshes.
    pub index_buffer: vk::Buffer,
    pub index_buffer_memory: vk::DeviceMemory,
    pub indexed: bool,
    /// Indices, or vertices for non-indexed meshes, per draw.
    pub draw_count: u32,

    /// One uniform buffer per frame in flight.
    pub uniform_buffers: Vec<vk::Buffer>,
    pub uniform_buffers_memory: Vec<vk::DeviceMemory>,
    pub descriptor_pool: vk::DescriptorPool,
    /// One descriptor set per frame in flight.
    pub descriptor_sets: Vec<vk::DescriptorSet>,

    pub depth_format: vk::Format,
    pub depth_image: vk::Image,
    pub depth_image_memory: vk::DeviceMemory,
    pub depth_image_view: vk::ImageView,

    pub texture_image: vk::Image,
    pub texture_image_memory: vk::DeviceMemory,
    pub texture_image_view: vk::ImageView,
    pub texture_sampler: vk::Sampler,

    pub command_pool: vk::CommandPool,
    /// One per frame in flight, re-recorded every frame.
    pub command_buffers: Vec<vk::CommandBuffer>,
    /// Only for very short-lived command buffers, which is why there's no
    /// place in this struct to store buffers allocated from it.
    pub transient_command_pool: vk::CommandPool,

    /// Signalled when an image has been acquired from the swapchain and is
    /// ready for rendering.
    pub image_available_semaphores: Vec<vk::Semaphore>,
    /// Signalled when rendering has finished and presentation may begin.
    pub render_finished_semaphores: Vec<vk::Semaphore>,
    /// Pause the CPU once [`MAX_FRAMES_IN_FLIGHT`] frames are queued.
    pub in_flight_fences: Vec<vk::Fence>,
    /// The fence of the frame last rendering to each swapchain image.
    pub images_in_flight: Vec<vk::Fence>,

    pub timestamp_pool: vk::QueryPool,
    pub statistics_pool: vk::QueryPool,

    /// For handling debug messages sent from Vulkan's validation layers.
    pub messenger: vk::DebugUtilsMessengerEXT,
}

impl App {
    /// Creates the renderer for `mesh`, binding it to a surface on `window`.
    ///
    /// # Safety
    ///
    /// Makes a great many raw calls to the Vulkan API, any of which may crash
    /// or corrupt memory if the driver misbehaves.
    #[tracing::instrument(level = "DEBUG", name = "App::create", skip_all)]
    pub unsafe fn create(window: &Window, options: &BenchOptions, mesh: &Mesh) -> Result<Self> {
        let mut data = AppData::default();

        debug!("Loading instance of Vulkan library");
        let entry = Entry::load()
            .map_err(|e| eyre!("{e}"))
            .wrap_err("Error loading Vulkan library")?;
        let instance = create_instance(window, &entry, &mut data)?;

        debug!("Creating render surface on main window");
        data.surface = ash_window::create_surface(&entry, &instance, window, None)?;

        debug!("Selecting render device");
        pick_physical_device(&entry, &instance, &mut data)?;
        let device = create_logical_device(&entry, &instance, &mut data)?;

        let window_size = window.inner_size();
        create_swapchain(window_size, &entry, &instance, &device, &mut data)?;
        create_swapchain_image_views(&device, &mut data)?;

        debug!("Creating render pipelines");
        create_render_pass(&instance, &device, &mut data)?;
        create_descriptor_set_layout(&device, &mut data)?;
        create_pipeline_layout(&device, &mut data)?;
        create_pipelines(&device, &mut data, &options.shaders)?;

        create_command_pools(&entry, &instance, &device, &mut data)?;
        create_depth_objects(&device, &mut data)?;
        create_framebuffers(&device, &mut data)?;

        debug!("Uploading mesh and texture");
        create_mesh_buffers(&device, &mut data, mesh)?;
        create_texture(&device, &mut data, &TexturePixels::load(&options.texture))?;

        create_uniform_buffers(&device, &mut data)?;
        create_descriptor_sets(&device, &mut data)?;
        create_command_buffers(&device, &mut data)?;
        create_sync_objects(&device, &mut data)?;
        create_query_pools(&device, &mut data)?;

        let extensions = Extensions::load(&entry, &instance, &device);

        info!(
            extent = ?data.swapchain_extent,
            draw_count = data.draw_count,
            indexed = data.indexed,
            "Renderer ready"
        );

        Ok(Self {
            entry,
            instance,
            data,
            device,
            extensions,
            frame: 0,
            resized: false,
            window_size,
            recording: None,
            image_index: 0,
            statistics_depth: 0,
            released: false,
        })
    }

    /// Trigger an app resize. Call this if the window manager has indicated that
    /// the window has resized. The swapchain is recreated after the next
    /// present.
    #[inline]
    pub fn trigger_resize(&mut self, size: PhysicalSize<u32>) {
        self.window_size = size;
        self.resized = true;
    }

    /// Re-creates the swapchain and everything sized to it: image views, the
    /// depth buffer and the framebuffers. Pipelines use dynamic viewports and
    /// survive.
    #[tracing::instrument(level = "DEBUG", name = "App::recreate_swapchain", skip_all)]
    unsafe fn recreate_swapchain(&mut self) -> Result<()> {
        self.device.device_wait_idle()?;
        self.destroy_swapchain();

        create_swapchain(
            self.window_size,
            &self.entry,
            &self.instance,
            &self.device,
            &mut self.data,
        )?;
        create_swapchain_image_views(&self.device, &mut self.data)?;
        create_depth_objects(&self.device, &mut self.data)?;
        create_framebuffers(&self.device, &mut self.data)?;
        reset_images_in_flight(&mut self.data);

        self.resized = false;

        Ok(())
    }

    unsafe fn acquire_image(&self) -> Result<Option<u32>> {
        let result = self.extensions.swapchain.acquire_next_image(
            self.data.swapchain,
            u64::MAX,
            self.data.image_available_semaphores[self.frame],
            vk::Fence::null(),
        );

        match result {
            Ok((image_index, _suboptimal)) => Ok(Some(image_index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(eyre!(
                "Acquiring swapchain image failed due to Vulkan error: [{0:?}] {0}",
                e
            )),
        }
    }

    fn command_buffer(&self) -> Result<vk::CommandBuffer> {
        self.recording
            .ok_or_else(|| eyre!("No frame is being recorded"))
    }

    /// Destroy objects associated with the swapchain.
    #[tracing::instrument(level = "DEBUG", name = "App::destroy_swapchain", skip_all)]
    unsafe fn destroy_swapchain(&mut self) {
        self.data
            .framebuffers
            .drain(..)
            .for_each(|f| self.device.destroy_framebuffer(f, None));

        destroy_depth_objects(&self.device, &self.data);

        self.data
            .swapchain_image_views
            .drain(..)
            .for_each(|v| self.device.destroy_image_view(v, None));
        self.extensions
            .swapchain
            .destroy_swapchain(self.data.swapchain, None);
    }

    /// Destroys every Vulkan object, in reverse order of creation.
    #[tracing::instrument(level = "DEBUG", name = "App::destroy", skip_all)]
    unsafe fn destroy(&mut self) {
        destroy_query_pools(&self.device, &self.data);
        destroy_sync_objects(&self.device, &self.data);

        self.device
            .destroy_descriptor_pool(self.data.descriptor_pool, None);
        destroy_uniform_buffers(&self.device, &self.data);
        destroy_texture(&self.device, &self.data);
        destroy_mesh_buffers(&self.device, &self.data);

        self.destroy_swapchain();

        self.device
            .destroy_command_pool(self.data.command_pool, None);
        self.device
            .destroy_command_pool(self.data.transient_command_pool, None);

        destroy_pipelines(&self.device, &self.data);
        self.device
            .destroy_descriptor_set_layout(self.data.descriptor_set_layout, None);
        self.device.destroy_render_pass(self.data.render_pass, None);

        self.device.destroy_device(None);

        self.extensions
            .surface
            .destroy_surface(self.data.surface, None);

        if let Some(debug_utils) = &self.extensions.debug_utils {
            debug_utils.destroy_debug_utils_messenger(self.data.messenger, None);
        }

        self.instance.destroy_instance(None);
    }
}

impl QueryBackend for App {
    fn prime_queries(&mut self, slots: usize) -> Result<()> {
        unsafe { prime_query_pools(&self.device, &self.data, slots) }
    }

    fn begin_query(&mut self, kind: QueryKind, slot: usize) -> Result<()> {
        let command_buffer = self.command_buffer()?;

        unsafe {
            if let Some(first) = timestamp_index(kind, slot) {
                self.device.cmd_write_timestamp(
                    command_buffer,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    self.data.timestamp_pool,
                    first,
                );
            } else {
                if self.statistics_depth == 0 {
                    self.device.cmd_begin_query(
                        command_buffer,
                        self.data.statistics_pool,
                        slot as u32,
                        vk::QueryControlFlags::empty(),
                    );
                }
                self.statistics_depth += 1;
            }
        }

        Ok(())
    }

    fn end_query(&mut self, kind: QueryKind, slot: usize) -> Result<()> {
        let command_buffer = self.command_buffer()?;

        unsafe {
            if let Some(first) = timestamp_index(kind, slot) {
                self.device.cmd_write_timestamp(
                    command_buffer,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    self.data.timestamp_pool,
                    first + 1,
                );
            } else {
                self.statistics_depth = self
                    .statistics_depth
                    .checked_sub(1)
                    .ok_or_else(|| eyre!("Statistics query ended more often than begun"))?;
                if self.statistics_depth == 0 {
                    self.device
                        .cmd_end_query(command_buffer, self.data.statistics_pool, slot as u32);
                }
            }
        }

        Ok(())
    }

    fn query_ready(&mut self, kind: QueryKind, slot: usize) -> Result<bool> {
        unsafe { query_ready(&self.device, &self.data, kind, slot) }
    }

    fn query_result(&mut self, kind: QueryKind, slot: usize) -> Result<u64> {
        unsafe { query_result(&self.device, &self.data, kind, slot) }
    }
}

impl GpuBackend for App {
    fn begin_frame(&mut self, slot: usize, transforms: &Transforms) -> Result<()> {
        if self.released {
            return Err(eyre!("Renderer has been released"));
        }

        unsafe {
            // Wait until this frame-in-flight's previous submission is done.
            self.device
                .wait_for_fences(&[self.data.in_flight_fences[self.frame]], true, u64::MAX)?;

            let image_index = match self.acquire_image()? {
                Some(index) => index,
                None => {
                    self.recreate_swapchain()?;
                    self.acquire_image()?
                        .ok_or_else(|| eyre!("Swapchain out of date right after recreation"))?
                }
            };

            let image_fence = self.data.images_in_flight[image_index as usize];
            if image_fence != vk::Fence::null() {
                self.device
                    .wait_for_fences(&[image_fence], true, u64::MAX)?;
            }
            self.data.images_in_flight[image_index as usize] =
                self.data.in_flight_fences[self.frame];

            update_uniform_buffer(&self.device, &self.data, self.frame, transforms)?;

            let command_buffer = self.data.command_buffers[self.frame];
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            let info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device.begin_command_buffer(command_buffer, &info)?;

            reset_slot(&self.device, &self.data, command_buffer, slot);

            self.image_index = image_index;
            self.recording = Some(command_buffer);
        }

        Ok(())
    }

    fn begin_pass(&mut self, pass: Pass, lights: u32) -> Result<()> {
        let command_buffer = self.command_buffer()?;
        let extent = self.data.swapchain_extent;

        let clear_values = &[
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.data.render_pass)
            .framebuffer(self.data.framebuffers[self.image_index as usize])
            .render_area(render_area)
            .clear_values(clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            self.device
                .cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);
            self.device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(command_buffer, 0, &[render_area]);

            self.device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.data.pipelines.for_pass(pass),
            );
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.data.pipeline_layout,
                0,
                &[self.data.descriptor_sets[self.frame]],
                &[],
            );
            self.device.cmd_push_constants(
                command_buffer,
                self.data.pipeline_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                &lights.to_ne_bytes(),
            );

            self.device
                .cmd_bind_vertex_buffers(command_buffer, 0, &[self.data.vertex_buffer], &[0]);
            if self.data.indexed {
                self.device.cmd_bind_index_buffer(
                    command_buffer,
                    self.data.index_buffer,
                    0,
                    vk::IndexType::UINT32,
                );
            }
        }

        Ok(())
    }

    fn draw_mesh(&mut self) -> Result<()> {
        let command_buffer = self.command_buffer()?;

        unsafe {
            if self.data.indexed {
                self.device
                    .cmd_draw_indexed(command_buffer, self.data.draw_count, 1, 0, 0, 0);
            } else {
                self.device
                    .cmd_draw(command_buffer, self.data.draw_count, 1, 0, 0);
            }
        }

        Ok(())
    }

    fn end_pass(&mut self) -> Result<()> {
        let command_buffer = self.command_buffer()?;
        unsafe { self.device.cmd_end_render_pass(command_buffer) };
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        let command_buffer = self.command_buffer()?;
        self.recording = None;

        unsafe {
            self.device.end_command_buffer(command_buffer)?;

            let wait_semaphores = &[self.data.image_available_semaphores[self.frame]];
            let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let command_buffers = &[command_buffer];
            let signal_semaphores = &[self.data.render_finished_semaphores[self.frame]];

            let submit_info = vk::SubmitInfo::builder()
                .wait_semaphores(wait_semaphores)
                .wait_dst_stage_mask(wait_stages)
                .command_buffers(command_buffers)
                .signal_semaphores(signal_semaphores);

            self.device
                .reset_fences(&[self.data.in_flight_fences[self.frame]])?;
            self.device.queue_submit(
                self.data.graphics_queue,
                &[*submit_info],
                self.data.in_flight_fences[self.frame],
            )?;

            let swapchains = &[self.data.swapchain];
            let image_indices = &[self.image_index];
            let present_info = vk::PresentInfoKHR::builder()
                .wait_semaphores(signal_semaphores)
                .swapchains(swapchains)
                .image_indices(image_indices);

            let result = self
                .extensions
                .swapchain
                .queue_present(self.data.present_queue, &present_info);

            // Ok(true) means the swapchain is suboptimal for the surface
            let out_of_date =
                result == Ok(true) || result == Err(vk::Result::ERROR_OUT_OF_DATE_KHR);

            if self.resized || out_of_date {
                self.recreate_swapchain()?;
            } else if let Err(e) = result {
                return Err(eyre!(
                    "Failed to queue image in swapchain for presentation due to Vulkan error: [{0:?}] {0}",
                    e
                ));
            }
        }

        self.frame = (self.frame + 1) % MAX_FRAMES_IN_FLIGHT;

        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }

        info!("Releasing renderer");
        unsafe {
            self.device
                .device_wait_idle()
                .wrap_err("Error waiting for the device to go idle")?;
            self.destroy();
        }
        self.released = true;

        Ok(())
    }
}
