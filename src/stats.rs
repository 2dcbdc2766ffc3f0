//! Per-frame timing samples, the spike filter, and the text dumps written at
//! shutdown.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use color_eyre::{eyre::Context, Result};
use tracing::{debug, info};

use crate::metrics::FrameCounters;

/// One frame's timings, in microseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sample {
    pub draw_time: f32,
    pub discard_time: f32,
    pub rasterizer_time: f32,
    pub cull_time: f32,
    /// Fragment shader invocations / 1000, kept in the time column layout.
    pub fragment_time: f32,
}

impl Sample {
    pub const FIELDS: usize = 5;

    pub fn from_fields([draw, discard, rasterizer, cull, fragment]: [f32; Self::FIELDS]) -> Self {
        Self {
            draw_time: draw,
            discard_time: discard,
            rasterizer_time: rasterizer,
            cull_time: cull,
            fragment_time: fragment,
        }
    }

    /// Fields in output column order.
    pub fn fields(&self) -> [f32; Self::FIELDS] {
        [
            self.draw_time,
            self.discard_time,
            self.rasterizer_time,
            self.cull_time,
            self.fragment_time,
        ]
    }
}

impl From<&FrameCounters> for Sample {
    fn from(c: &FrameCounters) -> Self {
        Self {
            draw_time: c.draw_ns as f32 / 1000.0,
            discard_time: c.discard_ns as f32 / 1000.0,
            rasterizer_time: c.rasterizer_ns as f32 / 1000.0,
            cull_time: c.cull_ns as f32 / 1000.0,
            fragment_time: c.fragment_invocations as f32 / 1000.0,
        }
    }
}

pub fn median3(a: f32, b: f32, c: f32) -> f32 {
    a.min(b).max(a.max(b).min(c))
}

/// Replace each interior sample by the per-field median of itself and its
/// two neighbours. The first and last samples are dropped.
pub fn filter_spikes(samples: &[Sample]) -> Vec<Sample> {
    samples
        .windows(3)
        .map(|w| {
            let (before, value, after) = (w[0].fields(), w[1].fields(), w[2].fields());
            let mut filtered = [0.0; Sample::FIELDS];
            for (i, f) in filtered.iter_mut().enumerate() {
                *f = median3(before[i], value[i], after[i]);
            }
            Sample::from_fields(filtered)
        })
        .collect()
}

/// Write one line per sample, five space-separated fields.
pub fn write_samples<W: Write>(mut out: W, samples: &[Sample]) -> io::Result<()> {
    for sample in samples {
        let [a, b, c, d, e] = sample.fields();
        writeln!(out, "{a:.6} {b:.6} {c:.6} {d:.6} {e:.6}")?;
    }
    out.flush()
}

/// `dir/filtered-name` for a raw output path `dir/name`; `.` when the raw
/// path has no directory.
pub fn filtered_path(raw: &Path) -> PathBuf {
    let dir = match raw.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut name = std::ffi::OsString::from("filtered-");
    name.push(raw.file_name().unwrap_or(raw.as_os_str()));
    dir.join(name)
}

/// Files actually written by [`StatsLog::flush()`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub raw: Option<PathBuf>,
    pub filtered: Option<PathBuf>,
}

/// The growing series of samples for one run.
#[derive(Clone, Debug, Default)]
pub struct StatsLog {
    samples: Vec<Sample>,
}

impl StatsLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Write the raw series to `raw_path`, and the filtered series next to it.
    ///
    /// A file that cannot be created is skipped; failing to write to one that
    /// was created is an error.
    #[tracing::instrument(level = "DEBUG", name = "StatsLog::flush", skip(self))]
    pub fn flush(&self, raw_path: &Path) -> Result<FlushReport> {
        let mut report = FlushReport::default();

        if write_series(raw_path, &self.samples)? {
            report.raw = Some(raw_path.to_owned());
        }

        let filtered = filtered_path(raw_path);
        info!(path = ?filtered, "Writing filtered data");
        if write_series(&filtered, &filter_spikes(&self.samples))? {
            report.filtered = Some(filtered);
        }

        Ok(report)
    }
}

/// Returns false if the file could not be created.
fn write_series(path: &Path, samples: &[Sample]) -> Result<bool> {
    let file = match File::create(path) {
        Ok(file) => file,
        Err(err) => {
            debug!(?path, %err, "Skipping output file");
            return Ok(false);
        }
    };

    write_samples(BufWriter::new(file), samples)
        .wrap_err_with(|| format!("Error writing samples to {}", path.display()))?;
    debug!(?path, count = samples.len(), "Wrote samples");

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample(fields: [f32; 5]) -> Sample {
        Sample::from_fields(fields)
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("raster-bench-{}-{name}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn median_of_three() {
        assert_eq!(median3(1.0, 2.0, 3.0), 2.0);
        assert_eq!(median3(3.0, 1.0, 2.0), 2.0);
        assert_eq!(median3(2.0, 3.0, 1.0), 2.0);
        assert_eq!(median3(10.0, 12.0, 9.0), 10.0);
        assert_eq!(median3(5.0, 5.0, 1.0), 5.0);
    }

    #[test]
    fn monotonic_windows_keep_the_middle_sample() {
        let windows = [
            (1.0, 2.0, 3.0),
            (3.0, 2.0, 1.0),
            (1.0, 1.0, 4.0),
            (4.0, 4.0, 4.0),
            (-2.0, 0.5, 0.5),
        ];
        for (a, b, c) in windows {
            assert_eq!(median3(a, b, c), b);
        }
    }

    #[test]
    fn filter_is_per_field() {
        let raw = [
            sample([10.0, 2.0, 3.0, 1.0, 4.0]),
            sample([12.0, 2.0, 3.0, 1.0, 5.0]),
            sample([9.0, 2.0, 3.0, 1.0, 4.0]),
        ];
        assert_eq!(
            filter_spikes(&raw),
            vec![sample([10.0, 2.0, 3.0, 1.0, 4.0])]
        );

        // a joint (row-wise) median would pick one whole row
        let mixed = [
            sample([1.0, 9.0, 5.0, 0.0, 0.0]),
            sample([9.0, 5.0, 1.0, 0.0, 0.0]),
            sample([5.0, 1.0, 9.0, 0.0, 0.0]),
        ];
        assert_eq!(
            filter_spikes(&mixed),
            vec![sample([5.0, 5.0, 5.0, 0.0, 0.0])]
        );
    }

    #[test]
    fn filtered_length_drops_the_boundaries() {
        for n in 0..10usize {
            let raw = (0..n).map(|i| sample([i as f32; 5])).collect::<Vec<_>>();
            let filtered = filter_spikes(&raw);
            assert_eq!(filtered.len(), n.saturating_sub(2));
        }
    }

    #[test]
    fn isolated_spike_is_removed() {
        let raw = [10.0, 10.5, 80.0, 10.2, 10.1].map(|t| sample([t, 1.0, 1.0, 1.0, 1.0]));
        let filtered = filter_spikes(&raw);
        let draw = filtered.iter().map(|s| s.draw_time).collect::<Vec<_>>();
        assert_eq!(draw, vec![10.5, 10.5, 10.2]);
    }

    #[test]
    fn samples_convert_nanoseconds_to_microseconds() {
        let counters = FrameCounters {
            draw_ns: 1_500_000,
            discard_ns: 2_000,
            rasterizer_ns: 500,
            cull_ns: 0,
            vertex_invocations: 99,
            fragment_invocations: 4_000,
        };
        assert_eq!(
            Sample::from(&counters),
            sample([1500.0, 2.0, 0.5, 0.0, 4.0])
        );
    }

    #[test]
    fn output_lines_have_five_fields() {
        let mut out = Vec::new();
        write_samples(&mut out, &[sample([1.0, 2.5, 3.0, 4.0, 0.125])]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "1.000000 2.500000 3.000000 4.000000 0.125000\n"
        );
    }

    #[test]
    fn filtered_file_sits_next_to_the_raw_file() {
        assert_eq!(
            filtered_path(Path::new("bench3.txt")),
            PathBuf::from("./filtered-bench3.txt")
        );
        assert_eq!(
            filtered_path(Path::new("runs/gpu/a.txt")),
            PathBuf::from("runs/gpu/filtered-a.txt")
        );
        assert_eq!(
            filtered_path(Path::new("/tmp/a.txt")),
            PathBuf::from("/tmp/filtered-a.txt")
        );
    }

    #[test]
    fn flush_writes_both_series() {
        let dir = scratch_dir("flush");
        let raw = dir.join("run.txt");

        let mut log = StatsLog::new();
        for t in [3.0, 1.0, 2.0, 5.0] {
            log.push(sample([t; 5]));
        }

        let report = log.flush(&raw).unwrap();
        assert_eq!(report.raw.as_deref(), Some(raw.as_path()));
        assert_eq!(report.filtered, Some(dir.join("filtered-run.txt")));

        let raw_text = fs::read_to_string(&raw).unwrap();
        assert_eq!(raw_text.lines().count(), 4);
        let filtered_text = fs::read_to_string(dir.join("filtered-run.txt")).unwrap();
        let firsts = filtered_text
            .lines()
            .map(|l| l.split(' ').next().unwrap().parse::<f32>().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(firsts, vec![2.0, 2.0]);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn unopenable_outputs_are_skipped() {
        let dir = scratch_dir("missing");
        let raw = dir.join("no-such-dir").join("run.txt");

        let mut log = StatsLog::new();
        log.push(Sample::default());
        assert_eq!(log.flush(&raw).unwrap(), FlushReport::default());

        fs::remove_dir_all(dir).unwrap();
    }
}
