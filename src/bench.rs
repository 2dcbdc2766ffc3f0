//! The benchmark harness.
//!
//! Each frame draws the same mesh five times. Each pass uses a different
//! program or rasterizer state, and each is bracketed by queries from the
//! current slot of the [`QueryRing`]. Holding the geometry constant across
//! passes is what makes the per-pass timings comparable.

use std::time::Instant;

use color_eyre::Result;
use tracing::{debug, info};

use crate::{
    mesh::MeshStats,
    metrics::{FrameCounters, Rate, Throughput},
    mvp_matrix::Transforms,
    options::BenchOptions,
    queries::{QueryBackend, QueryKind, QueryResults, QueryRing},
    stats::{FlushReport, Sample, StatsLog},
};

/// Shader programs the benchmark needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Program {
    /// Textured and lit.
    Textured,
    /// Pushes every vertex out of the view volume.
    Cull,
    /// Position-only vertex stage with a constant-color fragment stage.
    Rasterizer,
}

impl Program {
    pub const ALL: [Program; 3] = [Program::Textured, Program::Cull, Program::Rasterizer];

    /// Base name of the program's shader files.
    pub const fn file_stem(self) -> &'static str {
        match self {
            Program::Textured => "textured",
            Program::Cull => "cull",
            Program::Rasterizer => "rasterizer",
        }
    }
}

/// One draw of the benchmark frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Full textured draw; counts shader invocations.
    Baseline,
    /// Textured draw with rasterizer discard, isolating the vertex stage.
    Discard,
    /// Every primitive culled, isolating primitive setup and clipping.
    Cull,
    /// Minimal fragment work, isolating rasterization.
    Rasterizer,
    /// Textured draw that ends up on screen.
    Display,
}

impl Pass {
    /// Passes in submission order.
    pub const ORDER: [Pass; 5] = [
        Pass::Baseline,
        Pass::Discard,
        Pass::Cull,
        Pass::Rasterizer,
        Pass::Display,
    ];

    pub const fn program(self) -> Program {
        match self {
            Pass::Baseline | Pass::Discard | Pass::Display => Program::Textured,
            Pass::Cull => Program::Cull,
            Pass::Rasterizer => Program::Rasterizer,
        }
    }

    pub const fn rasterizer_discard(self) -> bool {
        matches!(self, Pass::Discard)
    }

    /// Queries bracketing this pass's draw call, outermost first.
    pub const fn queries(self) -> &'static [QueryKind] {
        match self {
            Pass::Baseline => &[QueryKind::Vertices, QueryKind::Fragments],
            Pass::Discard => &[QueryKind::Bench1],
            Pass::Cull => &[QueryKind::Bench3],
            Pass::Rasterizer => &[QueryKind::Bench2],
            Pass::Display => &[QueryKind::Draw],
        }
    }
}

/// Rendering capabilities the harness drives.
///
/// A frame is `begin_frame`, then for each pass `begin_pass`, `draw_mesh` and
/// `end_pass`, then `end_frame`. Queries are issued between `begin_pass` and
/// `end_pass`.
pub trait GpuBackend: QueryBackend {
    /// Start recording a frame that uses query `slot`.
    fn begin_frame(&mut self, slot: usize, transforms: &Transforms) -> Result<()>;

    /// Clear the targets and bind the pass's program and rasterizer state.
    fn begin_pass(&mut self, pass: Pass, lights: u32) -> Result<()>;

    fn draw_mesh(&mut self) -> Result<()>;

    fn end_pass(&mut self) -> Result<()>;

    /// Submit and present the frame.
    fn end_frame(&mut self) -> Result<()>;

    /// Wait for the GPU and release every object. Calling this again is a
    /// no-op.
    fn release(&mut self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Continue,
    Done,
}

/// Owns the backend, the query ring and the run's samples.
pub struct Bench<B: GpuBackend> {
    backend: B,
    ring: QueryRing,
    stats: StatsLog,
    options: BenchOptions,
    mesh: MeshStats,
    frames_rendered: u64,
    started: Instant,
    finished: Option<FlushReport>,
}

impl<B: GpuBackend> Bench<B> {
    pub fn new(backend: B, options: BenchOptions, mesh: MeshStats) -> Self {
        Self {
            backend,
            ring: QueryRing::new(),
            stats: StatsLog::new(),
            options,
            mesh,
            frames_rendered: 0,
            started: Instant::now(),
            finished: None,
        }
    }

    /// Prime the query ring. Call once before the first frame.
    #[tracing::instrument(level = "DEBUG", name = "Bench::init", skip_all)]
    pub fn init(&mut self) -> Result<()> {
        self.ring.prime(&mut self.backend)?;
        self.started = Instant::now();
        Ok(())
    }

    /// Collect the queries of the slot about to be reused, record a sample,
    /// then render the five passes.
    pub fn render(&mut self) -> Result<FrameStatus> {
        let frame = self.frames_rendered;
        let slot = self.ring.slot();

        let results = self.ring.collect(&mut self.backend)?;
        self.record(&results);

        if self.options.verbose {
            info!(frame, "Rendering frame");
        } else {
            debug!(frame, "Rendering frame");
        }

        let transforms = Transforms::rotation_z(self.model_rotation());
        self.backend.begin_frame(slot, &transforms)?;
        for pass in Pass::ORDER {
            self.run_pass(pass)?;
        }
        self.backend.end_frame()?;

        self.ring.advance();
        self.frames_rendered += 1;

        let limit = u64::from(self.options.frames);
        if limit > 0 && self.frames_rendered >= limit {
            info!(frames = self.frames_rendered, "Frame limit reached");
            return Ok(FrameStatus::Done);
        }

        Ok(FrameStatus::Continue)
    }

    fn run_pass(&mut self, pass: Pass) -> Result<()> {
        let lights = match pass {
            Pass::Display => self.options.lights,
            _ => 1,
        };

        self.backend.begin_pass(pass, lights)?;
        for kind in pass.queries() {
            self.ring.begin(&mut self.backend, *kind)?;
        }
        self.backend.draw_mesh()?;
        for kind in pass.queries().iter().rev() {
            self.ring.end(&mut self.backend, *kind)?;
        }
        self.backend.end_pass()
    }

    fn record(&mut self, results: &QueryResults) {
        let counters = FrameCounters::from(results);

        if self.options.verbose {
            info!(
                slot = results.slot,
                ready = results.ready,
                "Collected queries in {:.3}ms",
                results.wait.as_secs_f64() * 1000.0
            );
            self.log_throughput(&counters);
        }

        self.stats.push(Sample::from(&counters));
    }

    fn log_throughput(&self, c: &FrameCounters) {
        let t = Throughput::derive(c, self.mesh.triangles, self.mesh.submitted_vertices);
        let us = |ns: u64| ns as f64 / 1000.0;

        info!(
            "{:.2}us draw time = {:.2}us vertex ({:.2}us culled) + {:.2}us rasterizer",
            us(c.draw_ns),
            us(c.discard_ns),
            us(c.cull_ns),
            us(c.rasterizer_ns)
        );
        info!("triangle rate {}Mt/s", Rate(t.triangle_rate));
        info!(
            "vertex rate discard {}Mv/s cull {}Mv/s",
            Rate(t.vertex_rate_discard),
            Rate(t.vertex_rate_cull)
        );
        info!("vertex bw {}MB/s", Rate(t.vertex_bandwidth));
        info!(
            "vertex {:.2}M, transformed {:.2}M, x{}",
            self.mesh.submitted_vertices as f64 / 1e6,
            c.vertex_invocations as f64 / 1e6,
            Rate(t.vertex_reuse)
        );
        info!(
            "fragment {:.2}M, fragment rate {}Mf/s",
            c.fragment_invocations as f64 / 1e6,
            Rate(t.fragment_rate)
        );
    }

    /// Model rotation about Z, in degrees.
    fn model_rotation(&self) -> f32 {
        if self.options.rotation {
            self.started.elapsed().as_secs_f32() * 1000.0 / 120.0
        } else {
            30.0
        }
    }

    /// Write the raw and filtered series, then release the backend.
    ///
    /// The backend is released even when writing fails, and the write error
    /// is returned afterwards. Only the first call does anything; later calls
    /// return the same report.
    #[tracing::instrument(level = "DEBUG", name = "Bench::quit", skip_all)]
    pub fn quit(&mut self) -> Result<FlushReport> {
        if let Some(report) = &self.finished {
            return Ok(report.clone());
        }

        if self.stats.is_empty() {
            info!("No frames were recorded");
        }
        info!(path = ?self.options.output, samples = self.stats.len(), "Writing output");
        let flushed = self.stats.flush(&self.options.output);

        // Whatever happens next, the output is not written twice.
        self.finished = Some(flushed.as_ref().cloned().unwrap_or_default());
        self.backend.release()?;

        flushed
    }

    pub fn samples(&self) -> &[Sample] {
        self.stats.samples()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
