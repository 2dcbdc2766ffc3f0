//! Query pools backing the frame-slot query ring.
//!
//! Elapsed-time kinds are pairs of timestamps in one pool. The two counter
//! kinds share a single pipeline statistics query per slot, since only one
//! query of a type may be active at a time.

use ash::{vk, Device};
use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::{
    app::AppData,
    queries::{QueryKind, QUERY_SLOTS},
};

use super::commands::{begin_transient_commands, end_transient_commands};

/// Elapsed-time kinds per slot.
const ELAPSED_KINDS: u32 = 5;

/// Timestamps per slot: a start and an end for each elapsed-time kind.
const TIMESTAMPS_PER_SLOT: u32 = ELAPSED_KINDS * 2;

/// Counters gathered by the statistics query, in result order.
const STATISTICS: vk::QueryPipelineStatisticFlags = vk::QueryPipelineStatisticFlags::from_raw(
    vk::QueryPipelineStatisticFlags::VERTEX_SHADER_INVOCATIONS.as_raw()
        | vk::QueryPipelineStatisticFlags::FRAGMENT_SHADER_INVOCATIONS.as_raw(),
);

/// Mask of the meaningful bits in a raw timestamp.
pub(crate) const fn timestamp_mask(valid_bits: u32) -> u64 {
    if valid_bits >= 64 {
        u64::MAX
    } else {
        (1 << valid_bits) - 1
    }
}

/// Position of an elapsed-time kind within its slot.
const fn elapsed_ordinal(kind: QueryKind) -> Option<u32> {
    match kind {
        QueryKind::Draw => Some(0),
        QueryKind::Bench1 => Some(1),
        QueryKind::Bench2 => Some(2),
        QueryKind::Bench3 => Some(3),
        QueryKind::Bench4 => Some(4),
        QueryKind::Vertices | QueryKind::Fragments => None,
    }
}

/// Index of the start timestamp for `kind` in `slot`; the end timestamp
/// follows it.
pub(crate) fn timestamp_index(kind: QueryKind, slot: usize) -> Option<u32> {
    elapsed_ordinal(kind).map(|ordinal| (slot as u32 * ELAPSED_KINDS + ordinal) * 2)
}

/// Nanoseconds between two raw timestamps, tolerating one wrap of the
/// counter.
pub(crate) fn elapsed_ns(start: u64, end: u64, mask: u64, period_ns: f32) -> u64 {
    let ticks = end.wrapping_sub(start) & mask;
    (ticks as f64 * f64::from(period_ns)).round() as u64
}

#[tracing::instrument(level = "DEBUG", skip_all)]
pub(crate) unsafe fn create_query_pools(device: &Device, data: &mut AppData) -> Result<()> {
    let info = vk::QueryPoolCreateInfo::builder()
        .query_type(vk::QueryType::TIMESTAMP)
        .query_count(QUERY_SLOTS as u32 * TIMESTAMPS_PER_SLOT);
    data.timestamp_pool = device.create_query_pool(&info, None)?;

    let info = vk::QueryPoolCreateInfo::builder()
        .query_type(vk::QueryType::PIPELINE_STATISTICS)
        .query_count(QUERY_SLOTS as u32)
        .pipeline_statistics(STATISTICS);
    data.statistics_pool = device.create_query_pool(&info, None)?;

    debug!(
        timestamps = QUERY_SLOTS as u32 * TIMESTAMPS_PER_SLOT,
        statistics = QUERY_SLOTS,
        "Created query pools"
    );

    Ok(())
}

pub(crate) unsafe fn destroy_query_pools(device: &Device, data: &AppData) {
    device.destroy_query_pool(data.timestamp_pool, None);
    device.destroy_query_pool(data.statistics_pool, None);
}

/// Issue every query of the first `slots` slots over an empty span and wait
/// for the results to land.
#[tracing::instrument(level = "DEBUG", skip(device, data))]
pub(crate) unsafe fn prime_query_pools(device: &Device, data: &AppData, slots: usize) -> Result<()> {
    if slots > QUERY_SLOTS {
        return Err(eyre!("Cannot prime {slots} query slots, only {QUERY_SLOTS} exist"));
    }

    let command_buffer = begin_transient_commands(device, data)?;

    device.cmd_reset_query_pool(
        command_buffer,
        data.timestamp_pool,
        0,
        QUERY_SLOTS as u32 * TIMESTAMPS_PER_SLOT,
    );
    device.cmd_reset_query_pool(command_buffer, data.statistics_pool, 0, QUERY_SLOTS as u32);

    for slot in 0..slots as u32 {
        let first = slot * TIMESTAMPS_PER_SLOT;
        for query in first..first + TIMESTAMPS_PER_SLOT {
            device.cmd_write_timestamp(
                command_buffer,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                data.timestamp_pool,
                query,
            );
        }

        device.cmd_begin_query(
            command_buffer,
            data.statistics_pool,
            slot,
            vk::QueryControlFlags::empty(),
        );
        device.cmd_end_query(command_buffer, data.statistics_pool, slot);
    }

    end_transient_commands(device, data, command_buffer)
}

/// Reset the queries of `slot` so the frame can issue them again. Must be
/// recorded outside a render pass.
pub(crate) unsafe fn reset_slot(
    device: &Device,
    data: &AppData,
    command_buffer: vk::CommandBuffer,
    slot: usize,
) {
    device.cmd_reset_query_pool(
        command_buffer,
        data.timestamp_pool,
        slot as u32 * TIMESTAMPS_PER_SLOT,
        TIMESTAMPS_PER_SLOT,
    );
    device.cmd_reset_query_pool(command_buffer, data.statistics_pool, slot as u32, 1);
}

/// Raw results of one query kind.
enum Readback {
    Timestamps([u64; 2]),
    Statistics([u64; 2]),
}

/// Read `kind` in `slot`. With `wait` unset, returns `None` while the GPU
/// has not produced the result.
unsafe fn read_back(
    device: &Device,
    data: &AppData,
    kind: QueryKind,
    slot: usize,
    wait: bool,
) -> Result<Option<Readback>> {
    let mut flags = vk::QueryResultFlags::TYPE_64;
    if wait {
        flags |= vk::QueryResultFlags::WAIT;
    }

    let result = if let Some(first) = timestamp_index(kind, slot) {
        let mut stamps = [0u64; 2];
        device
            .get_query_pool_results(data.timestamp_pool, first, 2, &mut stamps, flags)
            .map(|_| Readback::Timestamps(stamps))
    } else {
        let mut counters = [[0u64; 2]; 1];
        device
            .get_query_pool_results(data.statistics_pool, slot as u32, 1, &mut counters, flags)
            .map(|_| Readback::Statistics(counters[0]))
    };

    match result {
        Ok(readback) => Ok(Some(readback)),
        Err(vk::Result::NOT_READY) if !wait => Ok(None),
        Err(e) => Err(eyre!("Reading {kind:?} query in slot {slot} failed: [{e:?}] {e}")),
    }
}

/// Non-blocking availability check.
pub(crate) unsafe fn query_ready(
    device: &Device,
    data: &AppData,
    kind: QueryKind,
    slot: usize,
) -> Result<bool> {
    Ok(read_back(device, data, kind, slot, false)?.is_some())
}

/// Blocking read. Elapsed kinds report nanoseconds, counter kinds report
/// invocations.
pub(crate) unsafe fn query_result(
    device: &Device,
    data: &AppData,
    kind: QueryKind,
    slot: usize,
) -> Result<u64> {
    let readback = read_back(device, data, kind, slot, true)?
        .ok_or_else(|| eyre!("{kind:?} query in slot {slot} has no result"))?;

    Ok(match (readback, kind) {
        (Readback::Timestamps([start, end]), _) => {
            elapsed_ns(start, end, data.timestamp_mask, data.timestamp_period)
        }
        (Readback::Statistics([vertices, _]), QueryKind::Vertices) => vertices,
        (Readback::Statistics([_, fragments]), _) => fragments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_indices_cover_the_pool_without_overlap() {
        let mut seen = Vec::new();
        for slot in 0..QUERY_SLOTS {
            for kind in QueryKind::ALL {
                if let Some(i) = timestamp_index(kind, slot) {
                    assert!(i + 1 < QUERY_SLOTS as u32 * TIMESTAMPS_PER_SLOT);
                    seen.extend([i, i + 1]);
                }
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..QUERY_SLOTS as u32 * TIMESTAMPS_PER_SLOT).collect::<Vec<_>>());
    }

    #[test]
    fn counter_kinds_use_the_statistics_pool() {
        assert_eq!(timestamp_index(QueryKind::Vertices, 3), None);
        assert_eq!(timestamp_index(QueryKind::Fragments, 0), None);
        assert_eq!(timestamp_index(QueryKind::Bench3, 2), Some(26));
    }

    #[test]
    fn masks() {
        assert_eq!(timestamp_mask(64), u64::MAX);
        assert_eq!(timestamp_mask(36), 0xF_FFFF_FFFF);
        assert_eq!(timestamp_mask(1), 1);
    }

    #[test]
    fn elapsed_time_scales_ticks_and_survives_wraparound() {
        assert_eq!(elapsed_ns(100, 350, u64::MAX, 1.0), 250);
        assert_eq!(elapsed_ns(100, 350, u64::MAX, 52.08), 13_020);

        let mask = timestamp_mask(36);
        assert_eq!(elapsed_ns(mask - 9, 10, mask, 1.0), 20);
    }
}
