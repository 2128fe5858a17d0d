//! Chunk geometry for uploads.

use crate::constants::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Clamps a configured bound into the accepted range; zero selects the maximum.
fn clamp_bound(max_chunk_size: u64) -> u64 {
    if max_chunk_size == 0 {
        MAX_CHUNK_SIZE
    } else {
        max_chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
    }
}

/// Largest divisor of `total` in `[MIN_CHUNK_SIZE, bound]`, if any.
fn largest_divisor_within(total: u64, bound: u64) -> Option<u64> {
    let mut best: Option<u64> = None;
    let mut d = 1_u64;
    while d.saturating_mul(d) <= total {
        if total % d == 0 {
            for candidate in [d, total / d] {
                if (MIN_CHUNK_SIZE..=bound).contains(&candidate) && best.is_none_or(|b| candidate > b)
                {
                    best = Some(candidate);
                }
            }
        }
        d += 1;
    }
    best
}

/// Chunk size used to upload `total` bytes under `max_chunk_size`.
///
/// Totals at or below the bound go in one chunk. Larger totals use the
/// largest size at or below the bound that divides the total evenly. When no
/// such size is at least [`MIN_CHUNK_SIZE`], the bound itself is used and the
/// final chunk carries the remainder.
#[must_use]
pub fn chunk_size_for(total: u64, max_chunk_size: u64) -> u64 {
    let bound = clamp_bound(max_chunk_size);
    if total <= bound {
        return total;
    }
    largest_divisor_within(total, bound).unwrap_or(bound)
}

/// Number of chunks needed to upload `total` bytes under `max_chunk_size`.
///
/// Always at least one; an empty upload is still submitted once.
#[must_use]
pub fn chunk_count(total: u64, max_chunk_size: u64) -> u64 {
    let size = chunk_size_for(total, max_chunk_size);
    if size == 0 { 1 } else { total.div_ceil(size) }
}
