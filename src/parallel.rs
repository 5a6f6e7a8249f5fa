//! Fork-join fan-out over contiguous row chunks.
//!
//! Work is split along the leading (batch/sequence/head) dimension into one
//! contiguous chunk per worker. Each worker writes only its own chunk of a
//! pre-allocated output buffer, and the caller blocks until all chunks are
//! done.

use rayon::prelude::*;

use crate::errors::{BitNetError, Result};

/// Number of workers in the current pool (CPU count for the global rayon pool).
#[inline]
pub fn worker_count() -> usize {
    rayon::current_num_threads().max(1)
}

/// Rows per chunk so that `rows` split into at most one chunk per worker.
#[inline]
pub fn rows_per_chunk(rows: usize) -> usize {
    rows.div_ceil(worker_count()).max(1)
}

/// Run `f(first_row, chunk)` over disjoint chunks of `out`, each holding whole rows of `row_len`.
///
/// `out.len()` must be a multiple of `row_len`. Blocks until every chunk completes.
pub fn for_each_row_chunk<T, F>(out: &mut [T], row_len: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync,
{
    if row_len == 0 || out.is_empty() {
        return;
    }
    debug_assert_eq!(out.len() % row_len, 0);
    let rows = out.len() / row_len;
    let chunk_rows = rows_per_chunk(rows);
    if chunk_rows >= rows {
        f(0, out);
        return;
    }
    out.par_chunks_mut(chunk_rows * row_len)
        .enumerate()
        .for_each(|(chunk, slice)| f(chunk * chunk_rows, slice));
}

/// Run `f` inside a dedicated pool of `threads` workers.
pub fn with_workers<R, F>(threads: usize, f: F) -> Result<R>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("bitnet-worker-{i}"))
        .build()
        .map_err(|e| BitNetError::InvalidConfig(format!("worker pool: {e}")))?;
    Ok(pool.install(f))
}
