use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` sent in one append request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub start: u64,
    pub end: u64,
}

impl ChunkPlan {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Plans the next chunk starting at `offset`.
///
/// Returns `None` once `offset` has reached `total`, or when `chunk_size`
/// is zero.
pub fn plan_chunk(offset: u64, total: u64, chunk_size: usize) -> Option<ChunkPlan> {
    if offset >= total || chunk_size == 0 {
        return None;
    }
    let end = offset.saturating_add(chunk_size as u64).min(total);
    Some(ChunkPlan { start: offset, end })
}

/// Splits `[0, total)` into `parts` contiguous ranges.
///
/// Sizes differ by at most one byte, larger ranges first. Never returns
/// empty ranges, so fewer than `parts` come back when `total < parts`.
pub fn split_ranges(total: u64, parts: usize) -> Vec<ChunkPlan> {
    if total == 0 || parts == 0 {
        return Vec::new();
    }
    let parts = (parts as u64).min(total);
    let base = total / parts;
    let extra = total % parts;

    let mut ranges = Vec::with_capacity(parts as usize);
    let mut start = 0;
    for i in 0..parts {
        let size = base + u64::from(i < extra);
        ranges.push(ChunkPlan {
            start,
            end: start + size,
        });
        start += size;
    }
    ranges
}
