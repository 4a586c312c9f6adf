// THEORY:
// This file is the entry point for the `photopix` library crate. It exposes the
// pixelation engine as a small public API:
//
// - `pipeline::PixelationSession` and `PipelineConfig` for applications that load an
//   image, pixelate it and save the result.
// - `parallel_dispatch::ParallelDispatcher` for callers that already hold pixels and
//   want one parallel pass with an explicit thread count.
// - `benchmark::BenchmarkHarness` for measuring how the kernels scale with threads.
//
// The building blocks (buffer, partitioner, kernels) live in `core_modules` and are
// public so that alternative kernels can be registered from outside the crate.

pub mod benchmark;
pub mod codec;
pub mod core_modules;
pub mod error;
pub mod parallel_dispatch;
pub mod pipeline;
pub mod result_log;

#[cfg(test)]
mod test_support;

pub use benchmark::{BenchmarkHarness, CancelToken, SweepPlan, SweepProgress, SweepSummary};
pub use core_modules::kernel::{KernelRegistry, KernelVariant, PixelationAlgorithm, PixelationKernel};
pub use core_modules::pixel_buffer::PixelBuffer;
pub use error::PixelateError;
pub use parallel_dispatch::{DispatchRequest, ParallelDispatcher};
pub use pipeline::{PipelineConfig, PixelationSession, ProcessOutcome};
