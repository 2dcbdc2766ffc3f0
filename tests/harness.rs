//! Drives the benchmark harness against an in-memory backend.

use std::{collections::VecDeque, fs, path::PathBuf};

use color_eyre::{eyre::eyre, Result};
use raster_bench::{
    bench::{Bench, FrameStatus, GpuBackend, Pass},
    mesh::MeshStats,
    metrics::{FrameCounters, Rate, Throughput},
    mvp_matrix::Transforms,
    options::BenchOptions,
    queries::{QueryBackend, QueryKind, QUERY_SLOTS},
    stats::FlushReport,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    BeginFrame(usize),
    BeginPass(Pass, u32),
    Begin(QueryKind),
    Draw,
    End(QueryKind),
    EndPass,
    EndFrame,
}

/// Backend whose queries produce `base * (frame + 1)` for every kind, where
/// `base` depends on the kind and `frame` counts `begin_frame` calls.
#[derive(Default)]
struct ScriptedBackend {
    calls: Vec<Call>,
    frame: u64,
    results: [[u64; QueryKind::COUNT]; QUERY_SLOTS],
    /// Slots whose next readiness check reports "not ready".
    late: VecDeque<usize>,
    primed: bool,
    releases: u32,
    rotations: Vec<f32>,
}

fn base(kind: QueryKind) -> u64 {
    match kind {
        QueryKind::Draw => 1_000_000,
        QueryKind::Vertices => 393_216,
        QueryKind::Fragments => 2_000,
        QueryKind::Bench1 => 400_000,
        QueryKind::Bench2 => 250_000,
        QueryKind::Bench3 => 300_000,
        QueryKind::Bench4 => 7,
    }
}

impl QueryBackend for ScriptedBackend {
    fn prime_queries(&mut self, slots: usize) -> Result<()> {
        assert_eq!(slots, QUERY_SLOTS);
        self.primed = true;
        Ok(())
    }

    fn begin_query(&mut self, kind: QueryKind, _slot: usize) -> Result<()> {
        self.calls.push(Call::Begin(kind));
        Ok(())
    }

    fn end_query(&mut self, kind: QueryKind, slot: usize) -> Result<()> {
        self.calls.push(Call::End(kind));
        self.results[slot][kind.index()] = base(kind) * self.frame;
        Ok(())
    }

    fn query_ready(&mut self, _kind: QueryKind, slot: usize) -> Result<bool> {
        if self.late.front() == Some(&slot) {
            self.late.pop_front();
            return Ok(false);
        }
        Ok(true)
    }

    fn query_result(&mut self, kind: QueryKind, slot: usize) -> Result<u64> {
        Ok(self.results[slot][kind.index()])
    }
}

impl GpuBackend for ScriptedBackend {
    fn begin_frame(&mut self, slot: usize, transforms: &Transforms) -> Result<()> {
        self.frame += 1;
        self.calls.push(Call::BeginFrame(slot));
        // recover the rotation angle from the first column
        self.rotations
            .push(transforms.mvp[(1, 0)].atan2(transforms.mvp[(0, 0)]).to_degrees());
        Ok(())
    }

    fn begin_pass(&mut self, pass: Pass, lights: u32) -> Result<()> {
        self.calls.push(Call::BeginPass(pass, lights));
        Ok(())
    }

    fn draw_mesh(&mut self) -> Result<()> {
        self.calls.push(Call::Draw);
        Ok(())
    }

    fn end_pass(&mut self) -> Result<()> {
        self.calls.push(Call::EndPass);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.calls.push(Call::EndFrame);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.releases += 1;
        Ok(())
    }
}

/// Fails the n-th draw call.
struct BrokenBackend {
    inner: ScriptedBackend,
    fail_after: usize,
}

impl QueryBackend for BrokenBackend {
    fn prime_queries(&mut self, slots: usize) -> Result<()> {
        self.inner.prime_queries(slots)
    }
    fn begin_query(&mut self, kind: QueryKind, slot: usize) -> Result<()> {
        self.inner.begin_query(kind, slot)
    }
    fn end_query(&mut self, kind: QueryKind, slot: usize) -> Result<()> {
        self.inner.end_query(kind, slot)
    }
    fn query_ready(&mut self, kind: QueryKind, slot: usize) -> Result<bool> {
        self.inner.query_ready(kind, slot)
    }
    fn query_result(&mut self, kind: QueryKind, slot: usize) -> Result<u64> {
        self.inner.query_result(kind, slot)
    }
}

impl GpuBackend for BrokenBackend {
    fn begin_frame(&mut self, slot: usize, transforms: &Transforms) -> Result<()> {
        self.inner.begin_frame(slot, transforms)
    }
    fn begin_pass(&mut self, pass: Pass, lights: u32) -> Result<()> {
        self.inner.begin_pass(pass, lights)
    }
    fn draw_mesh(&mut self) -> Result<()> {
        if self.fail_after == 0 {
            return Err(eyre!("device lost"));
        }
        self.fail_after -= 1;
        self.inner.draw_mesh()
    }
    fn end_pass(&mut self) -> Result<()> {
        self.inner.end_pass()
    }
    fn end_frame(&mut self) -> Result<()> {
        self.inner.end_frame()
    }
    fn release(&mut self) -> Result<()> {
        self.inner.release()
    }
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("raster-bench-harness-{}-{name}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn options(args: &[&str]) -> BenchOptions {
    BenchOptions::parse(args.iter().copied()).unwrap()
}

const MESH: MeshStats = MeshStats {
    triangles: 131_072,
    submitted_vertices: 393_216,
};

#[test]
fn frame_issues_five_bracketed_passes_in_order() {
    let mut bench = Bench::new(ScriptedBackend::default(), options(&["--lights", "4"]), MESH);
    bench.init().unwrap();
    assert!(bench.backend().primed);

    assert_eq!(bench.render().unwrap(), FrameStatus::Continue);

    use Call::*;
    use QueryKind::{Bench1, Bench2, Bench3, Fragments, Vertices};
    assert_eq!(
        bench.backend().calls,
        vec![
            BeginFrame(0),
            BeginPass(Pass::Baseline, 1),
            Begin(Vertices),
            Begin(Fragments),
            Draw,
            End(Fragments),
            End(Vertices),
            EndPass,
            BeginPass(Pass::Discard, 1),
            Begin(Bench1),
            Draw,
            End(Bench1),
            EndPass,
            BeginPass(Pass::Cull, 1),
            Begin(Bench3),
            Draw,
            End(Bench3),
            EndPass,
            BeginPass(Pass::Rasterizer, 1),
            Begin(Bench2),
            Draw,
            End(Bench2),
            EndPass,
            BeginPass(Pass::Display, 4),
            Begin(QueryKind::Draw),
            Call::Draw,
            End(QueryKind::Draw),
            EndPass,
            EndFrame,
        ]
    );
}

#[test]
fn samples_lag_by_one_lap_of_the_ring() {
    let mut bench = Bench::new(ScriptedBackend::default(), options(&[]), MESH);
    bench.init().unwrap();

    for _ in 0..QUERY_SLOTS + 2 {
        bench.render().unwrap();
    }

    let samples = bench.samples();
    assert_eq!(samples.len(), QUERY_SLOTS + 2);

    // the first lap only sees primed queries
    for s in &samples[..QUERY_SLOTS] {
        assert_eq!(s.draw_time, 0.0);
    }

    // frame K reads what frame 0 issued, frame K+1 what frame 1 issued
    let first = samples[QUERY_SLOTS];
    assert_eq!(first.draw_time, 1000.0);
    assert_eq!(first.discard_time, 400.0);
    assert_eq!(first.rasterizer_time, 250.0);
    assert_eq!(first.cull_time, 300.0);
    assert_eq!(first.fragment_time, 2.0);
    assert_eq!(samples[QUERY_SLOTS + 1].draw_time, 2000.0);
}

#[test]
fn slots_rotate_every_frame() {
    let mut bench = Bench::new(ScriptedBackend::default(), options(&[]), MESH);
    bench.init().unwrap();
    for _ in 0..2 * QUERY_SLOTS + 1 {
        bench.render().unwrap();
    }

    let slots = bench
        .backend()
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::BeginFrame(slot) => Some(*slot),
            _ => None,
        })
        .collect::<Vec<_>>();
    let expected = (0..2 * QUERY_SLOTS + 1)
        .map(|f| f % QUERY_SLOTS)
        .collect::<Vec<_>>();
    assert_eq!(slots, expected);
}

#[test]
fn late_queries_do_not_stop_the_run() {
    let backend = ScriptedBackend {
        late: VecDeque::from(vec![0, 3]),
        ..Default::default()
    };
    let mut bench = Bench::new(backend, options(&["--frames", "10"]), MESH);
    bench.init().unwrap();

    let mut frames = 0;
    while bench.render().unwrap() == FrameStatus::Continue {
        frames += 1;
    }
    assert_eq!(frames + 1, 10);
    assert_eq!(bench.samples().len(), 10);
}

#[test]
fn frame_limit_stops_after_n_frames() {
    let mut bench = Bench::new(ScriptedBackend::default(), options(&["--frames", "3"]), MESH);
    bench.init().unwrap();

    assert_eq!(bench.render().unwrap(), FrameStatus::Continue);
    assert_eq!(bench.render().unwrap(), FrameStatus::Continue);
    assert_eq!(bench.render().unwrap(), FrameStatus::Done);
    assert_eq!(bench.frames_rendered(), 3);
}

#[test]
fn fixed_rotation_is_thirty_degrees() {
    let mut bench = Bench::new(ScriptedBackend::default(), options(&["--rotation", "0"]), MESH);
    bench.init().unwrap();
    bench.render().unwrap();
    bench.render().unwrap();

    for angle in &bench.backend().rotations {
        assert!((angle - 30.0).abs() < 1e-3, "{angle}");
    }
}

#[test]
fn quit_writes_raw_and_filtered_files_once() {
    let dir = scratch("quit");
    let raw = dir.join("bench.txt");
    let raw_arg = raw.to_string_lossy().into_owned();

    let mut bench = Bench::new(ScriptedBackend::default(), options(&["-o", raw_arg.as_str()]), MESH);
    bench.init().unwrap();
    for _ in 0..QUERY_SLOTS + 4 {
        bench.render().unwrap();
    }

    let report = bench.quit().unwrap();
    assert_eq!(report.raw.as_deref(), Some(raw.as_path()));
    assert_eq!(report.filtered, Some(dir.join("filtered-bench.txt")));
    assert_eq!(bench.backend().releases, 1);

    let raw_lines = fs::read_to_string(&raw).unwrap().lines().count();
    let filtered_lines = fs::read_to_string(dir.join("filtered-bench.txt"))
        .unwrap()
        .lines()
        .count();
    assert_eq!(raw_lines, QUERY_SLOTS + 4);
    assert_eq!(filtered_lines, raw_lines - 2);

    for line in fs::read_to_string(&raw).unwrap().lines() {
        assert_eq!(line.split(' ').count(), 5);
    }

    // second quit is a no-op
    assert_eq!(bench.quit().unwrap(), report);
    assert_eq!(bench.backend().releases, 1);

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn short_runs_leave_the_filtered_file_empty() {
    let dir = scratch("short");
    let raw = dir.join("short.txt");
    let raw_arg = raw.to_string_lossy().into_owned();

    let mut bench = Bench::new(ScriptedBackend::default(), options(&["-o", raw_arg.as_str()]), MESH);
    bench.init().unwrap();
    bench.render().unwrap();
    bench.render().unwrap();
    bench.quit().unwrap();

    assert_eq!(fs::read_to_string(&raw).unwrap().lines().count(), 2);
    assert_eq!(
        fs::read_to_string(dir.join("filtered-short.txt")).unwrap(),
        ""
    );

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn backend_errors_propagate() {
    let backend = BrokenBackend {
        inner: ScriptedBackend::default(),
        fail_after: 7,
    };
    let mut bench = Bench::new(backend, options(&[]), MESH);
    bench.init().unwrap();

    bench.render().unwrap();
    let err = bench.render().unwrap_err();
    assert_eq!(err.to_string(), "device lost");
}

#[cfg(target_os = "linux")]
#[test]
fn failed_write_still_releases_the_backend() {
    let mut bench = Bench::new(ScriptedBackend::default(), options(&["-o", "/dev/full"]), MESH);
    bench.init().unwrap();
    for _ in 0..3 {
        bench.render().unwrap();
    }

    let err = bench.quit().unwrap_err();
    assert!(err.to_string().contains("/dev/full"), "{err}");
    assert_eq!(bench.backend().releases, 1);

    // neither the write nor the release is attempted again
    assert_eq!(bench.quit().unwrap(), FlushReport::default());
    assert_eq!(bench.backend().releases, 1);
}

#[test]
fn verbose_runs_record_the_same_samples() {
    let frames = QUERY_SLOTS + 2;
    let run = |args: &[&str]| {
        let mut bench = Bench::new(ScriptedBackend::default(), options(args), MESH);
        bench.init().unwrap();
        for _ in 0..frames {
            bench.render().unwrap();
        }
        bench.samples().to_vec()
    };

    let verbose = run(&["-v"]);
    assert_eq!(verbose.len(), frames);
    assert_eq!(verbose, run(&[]));

    // the primed lap has no timings, so every rate logged for it is n/a
    let primed = Throughput::derive(
        &FrameCounters::default(),
        MESH.triangles,
        MESH.submitted_vertices,
    );
    assert_eq!(Rate(primed.triangle_rate).to_string(), "n/a");
    assert_eq!(Rate(primed.fragment_rate).to_string(), "n/a");
    assert_eq!(verbose[QUERY_SLOTS].draw_time, 1000.0);
}
