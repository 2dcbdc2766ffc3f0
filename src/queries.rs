//! The frame-slot query ring.
//!
//! GPU queries complete asynchronously. Reading a result the frame it was
//! issued would stall the CPU until the GPU catches up, so each frame uses
//! one of [`QUERY_SLOTS`] sets of query objects and reads back the set it is
//! about to reuse, issued [`QUERY_SLOTS`] frames earlier.

use std::time::{Duration, Instant};

use color_eyre::Result;
use thiserror::Error;
use tracing::warn;

/// Number of query sets in flight.
pub const QUERY_SLOTS: usize = 6;

/// A blocking readback longer than this is reported.
const WAIT_WARNING: Duration = Duration::from_micros(100);

/// The queries making up one slot's set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Elapsed time of the display pass.
    Draw,
    /// Vertex shader invocations.
    Vertices,
    /// Fragment shader invocations.
    Fragments,
    /// Elapsed time of the rasterizer-discard pass.
    Bench1,
    /// Elapsed time of the rasterizer-only pass.
    Bench2,
    /// Elapsed time of the cull pass.
    Bench3,
    /// Spare elapsed-time query. Primed, never issued by a pass.
    Bench4,
}

impl QueryKind {
    pub const COUNT: usize = 7;

    pub const ALL: [QueryKind; Self::COUNT] = [
        QueryKind::Draw,
        QueryKind::Vertices,
        QueryKind::Fragments,
        QueryKind::Bench1,
        QueryKind::Bench2,
        QueryKind::Bench3,
        QueryKind::Bench4,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Lifecycle of one query object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueryState {
    /// Never issued.
    #[default]
    Idle,
    /// Begun, not yet ended.
    Active,
    /// Ended during `frame`; the result may still be in flight.
    Issued { frame: u64 },
    /// Result read back.
    Collected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("{kind:?} query in slot {slot} is already active")]
    AlreadyActive { kind: QueryKind, slot: usize },
    #[error("{kind:?} query in slot {slot} was ended without being begun")]
    NotActive { kind: QueryKind, slot: usize },
    #[error("{kind:?} query in slot {slot} was still active when collected")]
    StillActive { kind: QueryKind, slot: usize },
}

/// GPU query capabilities of a rendering backend.
pub trait QueryBackend {
    /// Issue every query of every slot once over an empty span, so the first
    /// pass around the ring has results to collect.
    fn prime_queries(&mut self, slots: usize) -> Result<()>;

    fn begin_query(&mut self, kind: QueryKind, slot: usize) -> Result<()>;

    fn end_query(&mut self, kind: QueryKind, slot: usize) -> Result<()>;

    /// Non-blocking availability check.
    fn query_ready(&mut self, kind: QueryKind, slot: usize) -> Result<bool>;

    /// Read a result, blocking until the GPU has produced it.
    fn query_result(&mut self, kind: QueryKind, slot: usize) -> Result<u64>;
}

/// Results read back from one slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryResults {
    pub slot: usize,
    values: [Option<u64>; QueryKind::COUNT],
    /// False if any result was still in flight when collection started.
    pub ready: bool,
    /// Time spent in blocking readback.
    pub wait: Duration,
}

impl QueryResults {
    /// The result for `kind`, or 0 if it was not issued in this slot.
    pub fn get(&self, kind: QueryKind) -> u64 {
        self.values[kind.index()].unwrap_or(0)
    }

    pub fn was_issued(&self, kind: QueryKind) -> bool {
        self.values[kind.index()].is_some()
    }
}

/// Ring of [`QUERY_SLOTS`] query sets, advanced once per frame.
#[derive(Clone, Debug, Default)]
pub struct QueryRing {
    slot: usize,
    frame: u64,
    states: [[QueryState; QueryKind::COUNT]; QUERY_SLOTS],
}

impl QueryRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn slot_for_frame(frame: u64) -> usize {
        (frame % QUERY_SLOTS as u64) as usize
    }

    /// Slot used by the current frame.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Frames advanced so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn state(&self, slot: usize, kind: QueryKind) -> QueryState {
        self.states[slot][kind.index()]
    }

    #[tracing::instrument(level = "DEBUG", name = "QueryRing::prime", skip_all)]
    pub fn prime<B: QueryBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        backend.prime_queries(QUERY_SLOTS)?;
        for slot in self.states.iter_mut() {
            slot.fill(QueryState::Issued { frame: self.frame });
        }
        Ok(())
    }

    pub fn begin<B: QueryBackend + ?Sized>(&mut self, backend: &mut B, kind: QueryKind) -> Result<()> {
        let slot = self.slot;
        let state = &mut self.states[slot][kind.index()];
        if *state == QueryState::Active {
            return Err(QueryError::AlreadyActive { kind, slot }.into());
        }

        backend.begin_query(kind, slot)?;
        *state = QueryState::Active;
        Ok(())
    }

    pub fn end<B: QueryBackend + ?Sized>(&mut self, backend: &mut B, kind: QueryKind) -> Result<()> {
        let slot = self.slot;
        let state = &mut self.states[slot][kind.index()];
        if *state != QueryState::Active {
            return Err(QueryError::NotActive { kind, slot }.into());
        }

        backend.end_query(kind, slot)?;
        *state = QueryState::Issued { frame: self.frame };
        Ok(())
    }

    /// Read back every query issued in the current slot.
    ///
    /// A result that is not ready yet means the GPU is more than
    /// [`QUERY_SLOTS`] frames behind. That is logged, and the readback then
    /// blocks until the result arrives.
    pub fn collect<B: QueryBackend + ?Sized>(&mut self, backend: &mut B) -> Result<QueryResults> {
        let slot = self.slot;
        let mut issued = Vec::with_capacity(QueryKind::COUNT);
        for kind in QueryKind::ALL {
            match self.states[slot][kind.index()] {
                QueryState::Issued { frame } => issued.push((kind, frame)),
                QueryState::Active => return Err(QueryError::StillActive { kind, slot }.into()),
                QueryState::Idle | QueryState::Collected => {}
            }
        }

        let mut late = None;
        for (kind, issued_frame) in &issued {
            if !backend.query_ready(*kind, slot)? {
                late = Some((*kind, *issued_frame));
                break;
            }
        }
        if let Some((kind, issued_frame)) = late {
            warn!(
                frame = self.frame,
                slot,
                ?kind,
                issued_frame,
                "Waiting on GPU query results"
            );
        }

        let mut values = [None; QueryKind::COUNT];
        let start = Instant::now();
        for (kind, _) in issued {
            values[kind.index()] = Some(backend.query_result(kind, slot)?);
            self.states[slot][kind.index()] = QueryState::Collected;
        }
        let wait = start.elapsed();

        if wait > WAIT_WARNING {
            warn!(
                frame = self.frame,
                "Query readback stalled for {:.2}ms",
                wait.as_secs_f64() * 1000.0
            );
        }

        Ok(QueryResults {
            slot,
            values,
            ready: late.is_none(),
            wait,
        })
    }

    /// Move on to the next frame's slot.
    pub fn advance(&mut self) {
        self.frame += 1;
        self.slot = Self::slot_for_frame(self.frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;
    use color_eyre::eyre::eyre;

    /// Queries land `latency` collections after they end.
    #[derive(Default)]
    struct FakeQueries {
        latency: u32,
        pending: AHashMap<(QueryKind, usize), (u64, u32)>,
        primed: usize,
        next_value: u64,
        log: Vec<String>,
        /// Time each blocking read takes.
        stall: Duration,
    }

    impl QueryBackend for FakeQueries {
        fn prime_queries(&mut self, slots: usize) -> Result<()> {
            self.primed = slots;
            for slot in 0..slots {
                for kind in QueryKind::ALL {
                    self.pending.insert((kind, slot), (0, 0));
                }
            }
            Ok(())
        }

        fn begin_query(&mut self, kind: QueryKind, slot: usize) -> Result<()> {
            self.log.push(format!("begin {kind:?} {slot}"));
            Ok(())
        }

        fn end_query(&mut self, kind: QueryKind, slot: usize) -> Result<()> {
            self.log.push(format!("end {kind:?} {slot}"));
            self.next_value += 1;
            self.pending
                .insert((kind, slot), (self.next_value, self.latency));
            Ok(())
        }

        fn query_ready(&mut self, kind: QueryKind, slot: usize) -> Result<bool> {
            let (_, remaining) = self.pending.get(&(kind, slot)).ok_or_else(|| eyre!("unknown"))?;
            Ok(*remaining == 0)
        }

        fn query_result(&mut self, kind: QueryKind, slot: usize) -> Result<u64> {
            let (value, remaining) = self
                .pending
                .get_mut(&(kind, slot))
                .ok_or_else(|| eyre!("unknown"))?;
            std::thread::sleep(self.stall);
            *remaining = 0;
            Ok(*value)
        }
    }

    #[test]
    fn slot_sequence_is_periodic() {
        let mut ring = QueryRing::new();
        for frame in 0..10 * QUERY_SLOTS as u64 + 3 {
            assert_eq!(ring.frame(), frame);
            assert!(ring.slot() < QUERY_SLOTS);
            assert_eq!(ring.slot(), QueryRing::slot_for_frame(frame));
            assert_eq!(
                QueryRing::slot_for_frame(frame),
                QueryRing::slot_for_frame(frame + QUERY_SLOTS as u64)
            );
            ring.advance();
        }
        assert_eq!(QueryRing::slot_for_frame(u64::MAX), (u64::MAX % 6) as usize);
    }

    #[test]
    fn primed_ring_collects_zeros_without_waiting() {
        let mut backend = FakeQueries::default();
        let mut ring = QueryRing::new();
        ring.prime(&mut backend).unwrap();
        assert_eq!(backend.primed, QUERY_SLOTS);

        let results = ring.collect(&mut backend).unwrap();
        assert!(results.ready);
        for kind in QueryKind::ALL {
            assert!(results.was_issued(kind));
            assert_eq!(results.get(kind), 0);
            assert_eq!(ring.state(0, kind), QueryState::Collected);
        }
    }

    #[test]
    fn results_come_back_one_lap_later() {
        let mut backend = FakeQueries::default();
        let mut ring = QueryRing::new();
        ring.prime(&mut backend).unwrap();

        ring.collect(&mut backend).unwrap();
        ring.begin(&mut backend, QueryKind::Draw).unwrap();
        ring.end(&mut backend, QueryKind::Draw).unwrap();
        assert_eq!(ring.state(0, QueryKind::Draw), QueryState::Issued { frame: 0 });

        for _ in 0..QUERY_SLOTS {
            ring.advance();
        }
        assert_eq!(ring.slot(), 0);

        let results = ring.collect(&mut backend).unwrap();
        assert_eq!(results.get(QueryKind::Draw), 1);
        // collected during the first lap and never re-issued
        assert!(!results.was_issued(QueryKind::Bench4));
        assert_eq!(results.get(QueryKind::Bench4), 0);
    }

    #[test]
    fn late_results_are_flagged_not_fatal() {
        let mut backend = FakeQueries {
            latency: 1,
            ..Default::default()
        };
        let mut ring = QueryRing::new();

        ring.begin(&mut backend, QueryKind::Vertices).unwrap();
        ring.end(&mut backend, QueryKind::Vertices).unwrap();

        let results = ring.collect(&mut backend).unwrap();
        assert!(!results.ready);
        assert_eq!(results.get(QueryKind::Vertices), 1);
        assert_eq!(ring.state(0, QueryKind::Vertices), QueryState::Collected);
    }

    #[test]
    fn slow_readback_is_timed() {
        let mut backend = FakeQueries {
            latency: 1,
            stall: Duration::from_millis(2),
            ..Default::default()
        };
        let mut ring = QueryRing::new();
        ring.advance();

        ring.begin(&mut backend, QueryKind::Bench2).unwrap();
        ring.end(&mut backend, QueryKind::Bench2).unwrap();

        let results = ring.collect(&mut backend).unwrap();
        assert_eq!(results.slot, 1);
        assert!(!results.ready);
        assert!(results.wait > WAIT_WARNING);
        assert!(results.wait >= Duration::from_millis(2));
    }

    #[test]
    fn unprimed_slots_have_nothing_to_collect() {
        let mut backend = FakeQueries::default();
        let mut ring = QueryRing::new();
        let results = ring.collect(&mut backend).unwrap();
        assert!(results.ready);
        assert!(QueryKind::ALL.iter().all(|k| !results.was_issued(*k)));
    }

    #[test]
    fn unbalanced_brackets_are_rejected() {
        let mut backend = FakeQueries::default();
        let mut ring = QueryRing::new();

        let err = ring.end(&mut backend, QueryKind::Bench1).unwrap_err();
        assert_eq!(
            err.downcast_ref::<QueryError>(),
            Some(&QueryError::NotActive {
                kind: QueryKind::Bench1,
                slot: 0
            })
        );

        ring.begin(&mut backend, QueryKind::Bench1).unwrap();
        assert!(ring.begin(&mut backend, QueryKind::Bench1).is_err());
        assert!(ring.collect(&mut backend).is_err());
        assert_eq!(backend.log, vec!["begin Bench1 0"]);
    }

    #[test]
    fn kinds_are_indexed_densely() {
        for (i, kind) in QueryKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
