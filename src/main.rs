use color_eyre::{eyre::Context, Result};
use raster_bench::{
    app::App,
    bench::{Bench, FrameStatus},
    grid::build_grid,
    mesh::{Mesh, MeshStats},
    model::load_model,
    options::BenchOptions,
};
use tracing::{debug, error, info};
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

fn main() -> Result<()> {
    setup_logging()?;

    let options = BenchOptions::parse(std::env::args().skip(1))?;
    if options.help {
        print!("{}", BenchOptions::usage());
        return Ok(());
    }
    info!(?options, "Starting benchmark");

    let mesh = build_mesh(&options)?;
    let mesh_stats = MeshStats::from(&mesh);
    info!(
        triangles = mesh_stats.triangles,
        submitted_vertices = mesh_stats.submitted_vertices,
        "Benchmark geometry ready"
    );

    let (event_loop, window) = build_window()?;

    info!("Initializing renderer");
    let app = unsafe { App::create(&window, &options, &mesh)? };
    drop(mesh);

    let mut bench = Bench::new(app, options, mesh_stats);
    bench.init()?;

    let mut finished = false;

    info!("Running event loop");
    event_loop.run(move |event, _, control_flow| {
        // Hot loop: never sleep waiting for events
        *control_flow = ControlFlow::Poll;

        match event {
            Event::MainEventsCleared if !finished => match bench.render() {
                Ok(FrameStatus::Continue) => {}
                Ok(FrameStatus::Done) => finished = finish(&mut bench, control_flow),
                Err(err) => {
                    error!("Rendering failed: {err:?}");
                    finished = finish(&mut bench, control_flow);
                }
            },

            // The window is owned by this closure so it outlives the surface.
            Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                window_id,
            } if window_id == window.id() => finished = finish(&mut bench, control_flow),

            Event::WindowEvent {
                event: WindowEvent::Resized(size),
                ..
            } if !finished => bench.backend_mut().trigger_resize(size),

            _ => {}
        }
    });
}

/// The generated grid, or the `--mesh` model when one is given.
#[tracing::instrument(level = "DEBUG", skip_all)]
fn build_mesh(options: &BenchOptions) -> Result<Mesh> {
    match &options.mesh {
        Some(path) => load_model(path),
        None => build_grid(options.triangles, options.grid_size).wrap_err_with(|| {
            format!(
                "Cannot build a {} triangle grid of {}x{} cells",
                options.triangles, options.grid_size, options.grid_size
            )
        }),
    }
}

/// Write the results and release the renderer, then leave the event loop.
/// Always returns true, for storing in the loop's `finished` flag.
fn finish(bench: &mut Bench<App>, control_flow: &mut ControlFlow) -> bool {
    *control_flow = ControlFlow::Exit;

    match bench.quit() {
        Ok(report) => info!(
            frames = bench.frames_rendered(),
            raw = ?report.raw,
            filtered = ?report.filtered,
            "Benchmark finished"
        ),
        Err(err) => error!("Shutdown failed: {err:?}"),
    }

    true
}

/// Create the window and event loop.
#[tracing::instrument(level = "DEBUG")]
fn build_window() -> Result<(EventLoop<()>, Window)> {
    debug!("Creating fixed-size window and event loop");

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("raster-bench")
        .with_inner_size(PhysicalSize::new(1024, 1024))
        .with_resizable(false)
        .build(&event_loop)?;

    debug!(window_id = ?window.id(), "Window creation successful");

    Ok((event_loop, window))
}

fn setup_logging() -> Result<()> {
    use tracing_subscriber::{prelude::*, EnvFilter};
    use tracing_tree::HierarchicalLayer;

    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(HierarchicalLayer::new(4).with_bracketed_fields(true))
        .with(EnvFilter::from_default_env())
        .try_init()?;

    Ok(())
}
