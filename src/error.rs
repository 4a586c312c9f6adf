// THEORY:
// Every layer of the engine owns a small error enum describing exactly what can go
// wrong at that layer. Errors flow upward and are wrapped, never flattened into
// strings, so the first underlying cause is always reachable through `source()`.
//
// The top-level `PixelateError` is what a front end sees. It names the stage that
// failed (load / process / save / benchmark) so a single message is enough to tell
// the user what happened, while the wrapped error keeps the detail.

use std::path::PathBuf;

use thiserror::Error;

/// Geometry and locking failures of a `PixelBuffer`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("image dimensions must be non-zero (got {width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("stride of {stride} bytes is smaller than a {width}-pixel row")]
    StrideTooSmall { width: u32, stride: usize },
    #[error("pixel store holds {actual} bytes but the geometry requires {required}")]
    DataTooShort { required: usize, actual: usize },
    #[error("{height} rows of {stride} bytes do not fit in memory")]
    GeometryOverflow { stride: usize, height: u32 },
    #[error("buffer is already acquired by another processing pass")]
    Busy,
    #[error("row range {start_row}..{end_row} is out of order or outside the image")]
    RangeOutOfBounds { start_row: usize, end_row: usize },
}

/// Caller contract violations when computing work ranges.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("block size must be at least 1")]
    ZeroBlockSize,
    #[error("worker count must be at least 1")]
    ZeroWorkers,
}

/// A kernel refused or failed to process its band.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("block size must be at least 1")]
    ZeroBlockSize,
    #[error("band starting at row {start_row} is not aligned to block size {block_size}")]
    MisalignedBand { start_row: usize, block_size: usize },
    #[error("band rows {start_row}..{end_row} need {required} bytes but only {actual} were provided")]
    BandTooShort {
        start_row: usize,
        end_row: usize,
        required: usize,
        actual: usize,
    },
}

/// One worker's failure inside a dispatch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("worker {worker_index} (rows {start_row}..{end_row}) failed: {cause}")]
pub struct WorkerFailure {
    pub worker_index: usize,
    pub start_row: usize,
    pub end_row: usize,
    #[source]
    pub cause: WorkerCause,
}

/// What actually went wrong inside a worker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerCause {
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("worker panicked: {0}")]
    Panicked(String),
    #[error("could not spawn worker thread: {0}")]
    Spawn(String),
}

/// Failure of a whole `ParallelDispatcher::dispatch` call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("no kernel registered for variant {0}")]
    KernelUnavailable(crate::core_modules::kernel::KernelVariant),
    #[error(
        "{} of {workers} workers failed, first at worker {} (rows {}..{})",
        .failures.len(),
        .first.worker_index,
        .first.start_row,
        .first.end_row
    )]
    Workers {
        workers: usize,
        /// Lowest-indexed failure; also the first entry of `failures`.
        #[source]
        first: Box<WorkerFailure>,
        failures: Vec<WorkerFailure>,
    },
}

impl DispatchError {
    /// The first underlying worker failure, when the dispatch failed inside workers.
    pub fn first_failure(&self) -> Option<&WorkerFailure> {
        match self {
            DispatchError::Workers { first, .. } => Some(first.as_ref()),
            _ => None,
        }
    }
}

/// Decode/encode failures at the codec boundary.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to read image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write image {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Result log I/O failures.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to open result log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append to result log: {0}")]
    Write(#[from] std::io::Error),
}

/// Sweep-level failures. Individual trial failures are not errors; they are counted.
#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("invalid sweep plan: {0}")]
    InvalidPlan(String),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("benchmark task ended unexpectedly: {0}")]
    Task(String),
}

/// The single error type a front end reports, tagged with the failing stage.
#[derive(Debug, Error)]
pub enum PixelateError {
    #[error("no image loaded")]
    NoImageLoaded,
    #[error("load failed")]
    Load(#[source] CodecError),
    #[error("process failed")]
    Process(#[source] DispatchError),
    #[error("save failed")]
    Save(#[source] CodecError),
    #[error("benchmark failed")]
    Benchmark(#[source] BenchmarkError),
}
