// THEORY:
// The partitioner decides which rows each worker owns. It splits *blocks*, not rows:
// the image has `ceil(rows / block_size)` block-rows and worker `i` receives the
// proportional slice `[i * blocks / workers, (i + 1) * blocks / workers)` of them,
// converted back to pixel rows. Every boundary is therefore a multiple of the block
// size, except the final `end_row`, which is clamped to the image height.
//
// Because no boundary ever falls inside a block, no block is ever shared by two
// workers, which is what makes lock-free parallel writes into one buffer sound.
// When there are more workers than block-rows the trailing workers get empty ranges;
// the dispatcher skips them.

use crate::error::PartitionError;

/// A contiguous, block-aligned span of rows `[start_row, end_row)` owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkRange {
    pub worker_index: usize,
    pub start_row: usize,
    pub end_row: usize,
}

impl WorkRange {
    pub fn new(worker_index: usize, start_row: usize, end_row: usize) -> Self {
        Self {
            worker_index,
            start_row,
            end_row,
        }
    }

    /// A range with `start_row >= end_row` carries no work.
    pub fn is_empty(&self) -> bool {
        self.start_row >= self.end_row
    }

    pub fn rows(&self) -> usize {
        self.end_row.saturating_sub(self.start_row)
    }
}

/// Splits `total_rows` into `worker_count` ordered, disjoint, block-aligned ranges
/// that together cover `[0, total_rows)` exactly once.
pub fn partition(
    total_rows: usize,
    block_size: usize,
    worker_count: usize,
) -> Result<Vec<WorkRange>, PartitionError> {
    if block_size == 0 {
        return Err(PartitionError::ZeroBlockSize);
    }
    if worker_count == 0 {
        return Err(PartitionError::ZeroWorkers);
    }

    let total_blocks = total_rows.div_ceil(block_size);
    let ranges = (0..worker_count)
        .map(|i| {
            let start_block = i * total_blocks / worker_count;
            let end_block = (i + 1) * total_blocks / worker_count;
            let start_row = (start_block * block_size).min(total_rows);
            let end_row = (end_block * block_size).min(total_rows);
            WorkRange::new(i, start_row, end_row)
        })
        .collect();

    Ok(ranges)
}
