// THEORY:
// The `ParallelDispatcher` runs one pixelation pass over one buffer with exactly the
// number of worker threads the caller asked for.
//
// A pass is:
// 1.  Look up the requested backend in the injected `KernelRegistry`.
// 2.  Partition the image rows into `thread_count` block-aligned `WorkRange`s.
// 3.  Acquire the buffer once and split the guard into one exclusive `RowBand` per
//     non-empty range. Empty ranges never get a thread.
// 4.  Spawn one named, scoped OS thread per band and join every one of them.
// 5.  Release the buffer (the guard drops) and only then report the outcome.
//
// Workers are fresh per call; there is no process-wide pool to tune. A worker that
// returns an error or panics does not stop the others: every failure is collected
// and surfaced as one `DispatchError::Workers`, ordered by worker index, whose first
// entry is the reported cause. A buffer whose dispatch failed is partially processed
// and should be treated as invalid by the caller.

use std::any::Any;
use std::sync::Arc;
use std::thread;

use log::{debug, error, info};

use crate::core_modules::kernel::{KernelParams, KernelRegistry, KernelVariant, PixelationAlgorithm};
use crate::core_modules::partitioner::{WorkRange, partition};
use crate::core_modules::pixel_buffer::PixelBuffer;
use crate::error::{DispatchError, WorkerCause, WorkerFailure};

/// Everything one pass needs besides the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub thread_count: usize,
    pub block_size: usize,
    pub variant: KernelVariant,
    pub algorithm: PixelationAlgorithm,
    /// Seed for `Random`. `None` draws a fresh one from entropy for this pass.
    pub seed: Option<u64>,
}

/// What a successful pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Threads actually spawned (non-empty ranges).
    pub workers_spawned: usize,
    /// The full partition, including empty ranges.
    pub ranges: Vec<WorkRange>,
    /// The seed the kernels ran with.
    pub seed: u64,
}

/// Fans a pixelation pass out over caller-sized sets of worker threads.
#[derive(Debug, Clone)]
pub struct ParallelDispatcher {
    registry: Arc<KernelRegistry>,
}

impl Default for ParallelDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(KernelRegistry::with_builtin()))
    }
}

impl ParallelDispatcher {
    pub fn new(registry: Arc<KernelRegistry>) -> Self {
        Self { registry }
    }

    /// Pixelates `buffer` in place and blocks until every worker has finished.
    pub fn dispatch(
        &self,
        buffer: &PixelBuffer,
        request: &DispatchRequest,
    ) -> Result<DispatchReport, DispatchError> {
        let kernel = self
            .registry
            .get(request.variant)
            .ok_or(DispatchError::KernelUnavailable(request.variant))?;
        let ranges = partition(buffer.height() as usize, request.block_size, request.thread_count)?;
        let seed = request.seed.unwrap_or_else(rand::random);
        let params = KernelParams {
            block_size: request.block_size,
            algorithm: request.algorithm,
            seed,
        };

        debug!(
            "dispatching {} {} over {} with block size {}: {:?}",
            request.variant,
            request.algorithm,
            buffer.resolution(),
            request.block_size,
            ranges
        );

        let mut guard = buffer.acquire()?;
        let bands = guard.bands(&ranges)?;
        let workers_spawned = bands.len();
        let kernel = kernel.as_ref();
        let params = &params;

        let mut failures = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers_spawned);
            let mut failures = Vec::new();

            for mut band in bands {
                let range = WorkRange::new(band.worker_index(), band.start_row(), band.end_row());
                let spawned = thread::Builder::new()
                    .name(format!("photopix-worker-{}", range.worker_index))
                    .spawn_scoped(scope, move || kernel.apply(&mut band, params));

                match spawned {
                    Ok(handle) => handles.push((range, handle)),
                    Err(err) => failures.push(worker_failure(range, WorkerCause::Spawn(err.to_string()))),
                }
            }

            for (range, handle) in handles {
                let cause = match handle.join() {
                    Ok(Ok(())) => continue,
                    Ok(Err(kernel_error)) => WorkerCause::Kernel(kernel_error),
                    Err(payload) => WorkerCause::Panicked(panic_message(payload.as_ref())),
                };
                failures.push(worker_failure(range, cause));
            }

            failures
        });
        drop(guard);

        failures.sort_by_key(|failure| failure.worker_index);
        if let Some(first) = failures.first().cloned() {
            let err = DispatchError::Workers {
                workers: workers_spawned,
                first: Box::new(first),
                failures,
            };
            error!("{err}");
            return Err(err);
        }

        info!(
            "{} {} pass over {} finished on {} worker(s)",
            request.variant,
            request.algorithm,
            buffer.resolution(),
            workers_spawned
        );

        Ok(DispatchReport {
            workers_spawned,
            ranges,
            seed,
        })
    }
}

fn worker_failure(range: WorkRange, cause: WorkerCause) -> WorkerFailure {
    WorkerFailure {
        worker_index: range.worker_index,
        start_row: range.start_row,
        end_row: range.end_row,
        cause,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
