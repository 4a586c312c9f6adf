// THEORY:
// The `pipeline` module is the top-level API of the engine. A `PixelationSession`
// wraps the whole stack (codec, dispatcher, benchmark harness) behind the handful of
// operations an application front end needs: load, process, save, benchmark.
//
// A session holds two images:
// - the *original*, as decoded. It is never modified; every pass and every benchmark
//   trial works on a copy of it.
// - the *result* of the last successful `process`, which is what `save` writes.
//
// Every failure leaves the session exactly as it was: a failed load keeps the old
// original, a failed pass keeps the old result, a failed save keeps both.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::benchmark::{BenchmarkHarness, CancelToken, ProgressSink, SweepPlan, SweepProgress, SweepSummary, spawn_sweep};
use crate::codec::{ImageCodec, ImageCrateCodec, ImageFormat};
use crate::core_modules::kernel::{KernelVariant, PixelationAlgorithm};
use crate::core_modules::pixel_buffer::PixelBuffer;
use crate::error::{BenchmarkError, PixelateError};
use crate::parallel_dispatch::{DispatchRequest, ParallelDispatcher};
use crate::result_log::ResultLog;

/// Smallest block edge a pass will use, whatever the requested block count.
pub const MIN_BLOCK_SIZE: usize = 2;

/// Tunable settings for one pixelation pass.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub thread_count: usize,
    /// Blocks across the image width; the block size is derived from it.
    pub block_count: usize,
    pub variant: KernelVariant,
    pub algorithm: PixelationAlgorithm,
    /// Fixed seed for `Random`; `None` draws a fresh one per pass.
    pub random_seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            thread_count: num_cpus::get(),
            block_count: 100,
            variant: KernelVariant::Native,
            algorithm: PixelationAlgorithm::Average,
            random_seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn block_size_for(&self, width: u32) -> usize {
        (width as usize)
            .checked_div(self.block_count)
            .unwrap_or(0)
            .max(MIN_BLOCK_SIZE)
    }

    fn dispatch_request(&self, width: u32) -> DispatchRequest {
        DispatchRequest {
            thread_count: self.thread_count,
            block_size: self.block_size_for(width),
            variant: self.variant,
            algorithm: self.algorithm,
            seed: self.random_seed,
        }
    }
}

/// What a successful `process` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub elapsed: Duration,
    pub block_size: usize,
    pub thread_count: usize,
    pub variant: KernelVariant,
    pub algorithm: PixelationAlgorithm,
    pub seed: u64,
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Time: {} ms | {} | {} | Threads: {}",
            self.elapsed.as_millis(),
            self.variant,
            self.algorithm,
            self.thread_count
        )
    }
}

pub struct PixelationSession<C: ImageCodec = ImageCrateCodec> {
    codec: C,
    dispatcher: ParallelDispatcher,
    original: Option<Arc<PixelBuffer>>,
    result: Option<PixelBuffer>,
}

impl PixelationSession<ImageCrateCodec> {
    /// A session with the `image`-crate codec and both built-in kernels.
    pub fn with_defaults() -> Self {
        Self::new(ImageCrateCodec, ParallelDispatcher::default())
    }
}

impl<C: ImageCodec> PixelationSession<C> {
    pub fn new(codec: C, dispatcher: ParallelDispatcher) -> Self {
        Self {
            codec,
            dispatcher,
            original: None,
            result: None,
        }
    }

    /// Decodes `path` as the new original and clears any previous result.
    pub fn load(&mut self, path: &Path) -> Result<&PixelBuffer, PixelateError> {
        let image = self.codec.decode(path).map_err(PixelateError::Load)?;
        info!("loaded {} ({})", path.display(), image.resolution());
        Ok(self.set_original(image))
    }

    /// Installs an already decoded image as the original.
    pub fn set_original(&mut self, image: PixelBuffer) -> &PixelBuffer {
        self.result = None;
        self.original.insert(Arc::new(image))
    }

    pub fn original(&self) -> Option<&PixelBuffer> {
        self.original.as_deref()
    }

    pub fn result(&self) -> Option<&PixelBuffer> {
        self.result.as_ref()
    }

    /// Pixelates a copy of the original and keeps it as the result.
    pub fn process(&mut self, config: &PipelineConfig) -> Result<ProcessOutcome, PixelateError> {
        let original = self.original.as_ref().ok_or(PixelateError::NoImageLoaded)?;
        let request = config.dispatch_request(original.width());

        let copy = PixelBuffer::clone(original);

        let started = Instant::now();
        let report = self
            .dispatcher
            .dispatch(&copy, &request)
            .map_err(PixelateError::Process)?;
        let elapsed = started.elapsed();

        let outcome = ProcessOutcome {
            elapsed,
            block_size: request.block_size,
            thread_count: request.thread_count,
            variant: request.variant,
            algorithm: request.algorithm,
            seed: report.seed,
        };
        info!("{outcome}");
        self.result = Some(copy);
        Ok(outcome)
    }

    /// Encodes the result; the format follows the extension of `path`.
    pub fn save(&self, path: &Path) -> Result<(), PixelateError> {
        let result = self.result.as_ref().ok_or(PixelateError::NoImageLoaded)?;
        self.codec
            .encode(result, path, ImageFormat::from_path(path))
            .map_err(PixelateError::Save)?;
        info!("saved {}", path.display());
        Ok(())
    }

    /// The full default sweep at the block size `config` would process with.
    pub fn benchmark_plan(&self, config: &PipelineConfig) -> Result<SweepPlan, PixelateError> {
        let original = self.original.as_ref().ok_or(PixelateError::NoImageLoaded)?;
        let mut plan = SweepPlan::default_for(config.block_size_for(original.width()));
        plan.seed = config.random_seed;
        Ok(plan)
    }

    /// Runs `plan` against the original on the calling thread.
    pub fn run_benchmark(
        &self,
        plan: &SweepPlan,
        log_path: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<SweepSummary, PixelateError> {
        let original = self.original.as_ref().ok_or(PixelateError::NoImageLoaded)?;
        let mut log = open_log(log_path)?;
        BenchmarkHarness::new(self.dispatcher.clone())
            .run_sweep(original, plan, &mut log, progress, cancel)
            .map_err(PixelateError::Benchmark)
    }

    /// Runs `plan` on tokio's blocking pool. Must be called within a tokio runtime.
    pub fn spawn_benchmark(
        &self,
        plan: SweepPlan,
        log_path: &Path,
        cancel: CancelToken,
    ) -> Result<
        (
            JoinHandle<Result<SweepSummary, BenchmarkError>>,
            mpsc::UnboundedReceiver<SweepProgress>,
        ),
        PixelateError,
    > {
        let original = self.original.clone().ok_or(PixelateError::NoImageLoaded)?;
        plan.validate().map_err(PixelateError::Benchmark)?;
        let log = open_log(log_path)?;
        Ok(spawn_sweep(
            BenchmarkHarness::new(self.dispatcher.clone()),
            original,
            plan,
            log,
            cancel,
        ))
    }
}

fn open_log(path: &Path) -> Result<ResultLog, PixelateError> {
    ResultLog::open(path).map_err(|err| PixelateError::Benchmark(BenchmarkError::Log(err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScratchDir;
    use crate::benchmark::finish_sweep;
    use crate::core_modules::kernel::{KernelRegistry, NativeKernel};
    use crate::core_modules::pixel::pixel::Pixel;
    use crate::error::{CodecError, DispatchError};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Keeps "files" in memory; decoding an unknown path fails.
    #[derive(Default)]
    struct MemoryCodec {
        files: Mutex<HashMap<PathBuf, PixelBuffer>>,
    }

    impl MemoryCodec {
        fn with_file(path: &str, image: PixelBuffer) -> Self {
            let codec = Self::default();
            codec.files.lock().unwrap().insert(PathBuf::from(path), image);
            codec
        }
    }

    impl ImageCodec for MemoryCodec {
        fn decode(&self, path: &Path) -> Result<PixelBuffer, CodecError> {
            match self.files.lock().unwrap().get(path) {
                Some(image) => Ok(image.clone()),
                None => Err(CodecError::Decode {
                    path: path.to_path_buf(),
                    source: image::ImageError::IoError(std::io::ErrorKind::NotFound.into()),
                }),
            }
        }

        fn encode(&self, buffer: &PixelBuffer, path: &Path, _format: ImageFormat) -> Result<(), CodecError> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), buffer.clone());
            Ok(())
        }
    }

    fn stripes() -> PixelBuffer {
        let data = (0..40u32 * 20)
            .flat_map(|i| if (i % 40) % 2 == 0 { [0, 0, 0, 255] } else { [100, 100, 100, 255] })
            .collect();
        PixelBuffer::from_rgba(40, 20, data).unwrap()
    }

    fn config(block_count: usize) -> PipelineConfig {
        PipelineConfig {
            thread_count: 3,
            block_count,
            variant: KernelVariant::Native,
            algorithm: PixelationAlgorithm::Average,
            random_seed: Some(5),
        }
    }

    fn session() -> PixelationSession<MemoryCodec> {
        PixelationSession::new(MemoryCodec::with_file("in.png", stripes()), ParallelDispatcher::default())
    }

    #[test]
    fn block_size_is_derived_from_width_with_a_floor() {
        assert_eq!(config(100).block_size_for(1000), 10);
        assert_eq!(config(100).block_size_for(150), 2);
        assert_eq!(config(5).block_size_for(40), 8);
        assert_eq!(config(0).block_size_for(40), MIN_BLOCK_SIZE);
    }

    #[test]
    fn default_config_uses_every_core() {
        let config = PipelineConfig::default();
        assert_eq!(config.thread_count, num_cpus::get());
        assert_eq!(config.block_count, 100);
        assert_eq!(config.random_seed, None);
    }

    #[test]
    fn nothing_loaded_is_an_input_error() {
        let mut session = session();
        assert!(matches!(session.process(&config(5)), Err(PixelateError::NoImageLoaded)));
        assert!(matches!(session.save(Path::new("out.png")), Err(PixelateError::NoImageLoaded)));
        assert!(matches!(session.benchmark_plan(&config(5)), Err(PixelateError::NoImageLoaded)));
    }

    #[test]
    fn process_works_on_a_copy_and_save_writes_the_result() {
        let mut session = session();
        session.load(Path::new("in.png")).unwrap();

        let outcome = session.process(&config(10)).unwrap();

        assert_eq!(outcome.block_size, 4);
        assert_eq!(outcome.seed, 5);
        assert!(outcome.to_string().ends_with("ms | Native | Average | Threads: 3"));
        assert_eq!(session.original().unwrap().to_rgba_vec(), stripes().to_rgba_vec());
        let result = session.result().unwrap().acquire().unwrap();
        assert_eq!(result.pixel(0, 0), Some(Pixel::new(50, 50, 50, 255)));
        drop(result);

        session.save(Path::new("out.png")).unwrap();
        assert!(session.codec.files.lock().unwrap().contains_key(Path::new("out.png")));
    }

    #[test]
    fn failed_load_keeps_the_previous_original() {
        let mut session = session();
        session.load(Path::new("in.png")).unwrap();
        session.process(&config(10)).unwrap();

        let err = session.load(Path::new("missing.png")).unwrap_err();

        assert!(matches!(err, PixelateError::Load(_)));
        assert!(session.original().is_some());
        assert!(session.result().is_some());
    }

    #[test]
    fn failed_process_keeps_the_previous_result() {
        let mut registry = KernelRegistry::new();
        registry.register(Arc::new(NativeKernel));
        let mut session = PixelationSession::new(MemoryCodec::default(), ParallelDispatcher::new(Arc::new(registry)));
        session.set_original(stripes());
        session.process(&config(10)).unwrap();
        let before = session.result().unwrap().to_rgba_vec();

        let mut tuned = config(5);
        tuned.variant = KernelVariant::Tuned;
        let err = session.process(&tuned).unwrap_err();

        assert!(matches!(
            err,
            PixelateError::Process(DispatchError::KernelUnavailable(KernelVariant::Tuned))
        ));
        assert_eq!(session.result().unwrap().to_rgba_vec(), before);
    }

    #[test]
    fn loading_clears_the_previous_result() {
        let mut session = session();
        session.load(Path::new("in.png")).unwrap();
        session.process(&config(10)).unwrap();
        session.set_original(stripes());
        assert!(session.result().is_none());
    }

    #[test]
    fn benchmark_runs_against_the_original() {
        let dir = ScratchDir::new();
        let log_path = dir.path().join("test.txt");
        let mut session = session();
        session.load(Path::new("in.png")).unwrap();

        let mut plan = session.benchmark_plan(&config(10)).unwrap();
        assert_eq!(plan.block_size, 4);
        assert_eq!(plan.seed, Some(5));
        plan.thread_counts = vec![1, 4];
        plan.iterations = 1;

        let summary = session
            .run_benchmark(&plan, &log_path, &|_: SweepProgress| {}, &CancelToken::new())
            .unwrap();

        assert_eq!(summary.records.len(), 2 * 2 * 3);
        assert!(session.result().is_none());
        assert_eq!(std::fs::read_to_string(&log_path).unwrap().lines().count(), 13);
    }

    #[test]
    fn unwritable_log_is_a_benchmark_error() {
        let dir = ScratchDir::new();
        let mut session = session();
        session.load(Path::new("in.png")).unwrap();
        let plan = session.benchmark_plan(&config(10)).unwrap();

        let err = session
            .run_benchmark(&plan, dir.path(), &|_: SweepProgress| {}, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, PixelateError::Benchmark(BenchmarkError::Log(_))));
    }

    #[tokio::test]
    async fn spawned_benchmark_reports_every_trial() {
        let dir = ScratchDir::new();
        let mut session = session();
        session.load(Path::new("in.png")).unwrap();
        let mut plan = session.benchmark_plan(&config(10)).unwrap();
        plan.thread_counts = vec![2];
        plan.variants = vec![KernelVariant::Tuned];
        plan.iterations = 2;

        let (handle, mut progress) = session
            .spawn_benchmark(plan, &dir.path().join("async.txt"), CancelToken::new())
            .unwrap();

        let mut lines = Vec::new();
        while let Some(update) = progress.recv().await {
            lines.push(update.to_string());
        }
        let summary = finish_sweep(handle).await.unwrap();

        assert_eq!(summary.records.len(), 3);
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "TEST: T=2 Tuned Average Iter=1/2");
        assert_eq!(lines[5], "TEST: T=2 Tuned Random Iter=2/2");
    }
}
