//! Throughput figures derived from one frame's raw query results.

use std::fmt;

use crate::{
    queries::{QueryKind, QueryResults},
    vertex::VERTEX_SIZE,
};

/// Raw counters for one frame, as read back from the query ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCounters {
    /// Display pass.
    pub draw_ns: u64,
    /// Rasterizer-discard pass.
    pub discard_ns: u64,
    /// Rasterizer-only pass.
    pub rasterizer_ns: u64,
    /// Cull pass.
    pub cull_ns: u64,
    pub vertex_invocations: u64,
    pub fragment_invocations: u64,
}

impl From<&QueryResults> for FrameCounters {
    fn from(results: &QueryResults) -> Self {
        Self {
            draw_ns: results.get(QueryKind::Draw),
            discard_ns: results.get(QueryKind::Bench1),
            rasterizer_ns: results.get(QueryKind::Bench2),
            cull_ns: results.get(QueryKind::Bench3),
            vertex_invocations: results.get(QueryKind::Vertices),
            fragment_invocations: results.get(QueryKind::Fragments),
        }
    }
}

/// `count / duration_ns * scale`, or `None` if the duration is not positive
/// or the result is not finite.
fn rate(count: f64, duration_ns: f64, scale: f64) -> Option<f64> {
    if duration_ns <= 0.0 {
        return None;
    }
    Some(count / duration_ns * scale).filter(|r| r.is_finite())
}

/// Derived throughput. `None` marks a rate whose pass measured no time.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Throughput {
    /// Millions of triangles per second, display pass.
    pub triangle_rate: Option<f64>,
    /// Millions of vertices per second, rasterizer-discard pass.
    pub vertex_rate_discard: Option<f64>,
    /// Millions of vertices per second, cull pass.
    pub vertex_rate_cull: Option<f64>,
    /// MiB of vertex data fetched per second, rasterizer-discard pass.
    pub vertex_bandwidth: Option<f64>,
    /// Millions of fragments per second, once rasterization cost is removed.
    pub fragment_rate: Option<f64>,
    /// Vertex shader invocations per submitted vertex.
    pub vertex_reuse: Option<f64>,
}

impl Throughput {
    pub fn derive(counters: &FrameCounters, triangles: u64, submitted_vertices: u64) -> Self {
        let vertices = counters.vertex_invocations as f64;
        let vertex_bytes = vertices * VERTEX_SIZE as f64 / (1024.0 * 1024.0);
        let shading_ns = counters.draw_ns as f64 - counters.rasterizer_ns as f64;

        Self {
            triangle_rate: rate(triangles as f64, counters.draw_ns as f64, 1e3),
            vertex_rate_discard: rate(vertices, counters.discard_ns as f64, 1e3),
            vertex_rate_cull: rate(vertices, counters.cull_ns as f64, 1e3),
            vertex_bandwidth: rate(vertex_bytes, counters.discard_ns as f64, 1e9),
            fragment_rate: rate(counters.fragment_invocations as f64, shading_ns, 1e3),
            vertex_reuse: rate(vertices, submitted_vertices as f64, 1.0),
        }
    }
}

/// Display adapter printing a rate with two decimals, or `n/a`.
pub struct Rate(pub Option<f64>);

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(r) => write!(f, "{r:.2}"),
            None => f.write_str("n/a"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters() -> FrameCounters {
        FrameCounters {
            draw_ns: 1_000_000,
            discard_ns: 500_000,
            rasterizer_ns: 250_000,
            cull_ns: 400_000,
            vertex_invocations: 6_000_000,
            fragment_invocations: 1_500_000,
        }
    }

    #[test]
    fn triangle_rate_in_millions_per_second() {
        let t = Throughput::derive(&counters(), 2_000_000, 6_000_000);
        assert_eq!(t.triangle_rate, Some(2000.0));
    }

    #[test]
    fn vertex_and_fragment_rates() {
        let t = Throughput::derive(&counters(), 2_000_000, 6_000_000);
        assert_eq!(t.vertex_rate_discard, Some(12_000.0));
        assert_eq!(t.vertex_rate_cull, Some(15_000.0));
        assert_eq!(t.fragment_rate, Some(2000.0));
        assert_eq!(t.vertex_reuse, Some(1.0));

        let bytes = 6_000_000.0 * 32.0 / (1024.0 * 1024.0);
        let bandwidth = t.vertex_bandwidth.unwrap();
        assert!((bandwidth - bytes / 500_000.0 * 1e9).abs() < 1e-6);
    }

    #[test]
    fn zero_durations_yield_no_rate() {
        let t = Throughput::derive(&FrameCounters::default(), 2_000_000, 0);
        assert_eq!(t, Throughput::default());
    }

    #[test]
    fn fragment_rate_needs_positive_shading_time() {
        let mut c = counters();
        c.rasterizer_ns = c.draw_ns;
        assert_eq!(Throughput::derive(&c, 1, 1).fragment_rate, None);

        c.rasterizer_ns = c.draw_ns + 10;
        assert_eq!(Throughput::derive(&c, 1, 1).fragment_rate, None);
    }

    #[test]
    fn rates_are_non_negative_with_positive_durations() {
        for draw_ns in [1, 7, 1_000, 123_456_789] {
            let c = FrameCounters {
                draw_ns,
                discard_ns: draw_ns,
                rasterizer_ns: 0,
                cull_ns: draw_ns,
                vertex_invocations: 3,
                fragment_invocations: 0,
            };
            let t = Throughput::derive(&c, 1, 3);
            for r in [
                t.triangle_rate,
                t.vertex_rate_discard,
                t.vertex_rate_cull,
                t.vertex_bandwidth,
                t.fragment_rate,
                t.vertex_reuse,
            ] {
                assert!(r.unwrap() >= 0.0);
            }
        }
    }

    #[test]
    fn rate_display() {
        assert_eq!(Rate(Some(1234.5678)).to_string(), "1234.57");
        assert_eq!(Rate(None).to_string(), "n/a");
    }
}
