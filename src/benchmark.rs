// THEORY:
// The `BenchmarkHarness` measures how the dispatcher scales. A sweep is the full
// cross-product of thread counts x kernel variants x algorithms, visited in exactly
// that nesting order (threads outermost).
//
// Key architectural principles:
// 1.  **Comparable Trials**: every trial pixelates its own fresh copy of the original
//     image. The copy is made before the clock starts; only `dispatch` is timed.
// 2.  **Sequential Measurement**: trials run one at a time so no two dispatches
//     compete for cores. Parallelism lives inside a trial, never across trials.
// 3.  **Fault Isolation**: a failed trial is reported, counted and left out of the
//     mean. A combination whose trials all failed writes no record. Neither stops
//     the sweep. Only a failing result log does, since results could not be kept.
// 4.  **Non-blocking Progress**: after each trial a `SweepProgress` goes to a
//     `ProgressSink`. The channel-backed sink never blocks, so an observer on another
//     thread (a UI, an async task) cannot stall the measurement.
// 5.  **Cooperative Cancellation**: a `CancelToken` is checked before each
//     combination. A running trial is never interrupted.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core_modules::kernel::{KernelVariant, PixelationAlgorithm};
use crate::core_modules::pixel_buffer::PixelBuffer;
use crate::error::BenchmarkError;
use crate::parallel_dispatch::{DispatchRequest, ParallelDispatcher};
use crate::result_log::{BenchmarkResult, ResultLog};

/// What to sweep and how often to repeat each combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPlan {
    pub block_size: usize,
    pub thread_counts: Vec<usize>,
    pub variants: Vec<KernelVariant>,
    pub algorithms: Vec<PixelationAlgorithm>,
    pub iterations: usize,
    /// Fixed seed for `Random` trials; `None` lets every trial draw its own.
    pub seed: Option<u64>,
}

impl SweepPlan {
    pub const DEFAULT_THREAD_COUNTS: [usize; 8] = [1, 2, 4, 8, 12, 16, 32, 64];
    pub const DEFAULT_ITERATIONS: usize = 5;

    /// The full default sweep: all variants, all algorithms, 1 to 64 threads.
    pub fn default_for(block_size: usize) -> Self {
        Self {
            block_size,
            thread_counts: Self::DEFAULT_THREAD_COUNTS.to_vec(),
            variants: KernelVariant::ALL.to_vec(),
            algorithms: PixelationAlgorithm::ALL.to_vec(),
            iterations: Self::DEFAULT_ITERATIONS,
            seed: None,
        }
    }

    pub fn combinations(&self) -> usize {
        self.thread_counts.len() * self.variants.len() * self.algorithms.len()
    }

    pub fn validate(&self) -> Result<(), BenchmarkError> {
        let problem = if self.block_size == 0 {
            "block size must be at least 1"
        } else if self.thread_counts.is_empty() || self.variants.is_empty() || self.algorithms.is_empty() {
            "thread counts, variants and algorithms must all be non-empty"
        } else if self.thread_counts.contains(&0) {
            "thread counts must be at least 1"
        } else if self.iterations == 0 {
            "iterations per combination must be at least 1"
        } else {
            return Ok(());
        };
        Err(BenchmarkError::InvalidPlan(problem.to_string()))
    }
}

/// Status of the sweep after one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepProgress {
    pub thread_count: usize,
    pub variant: KernelVariant,
    pub algorithm: PixelationAlgorithm,
    /// 1-based trial number within the combination.
    pub iteration: usize,
    pub iterations: usize,
    /// 1-based combination number within the sweep.
    pub combination: usize,
    pub combinations: usize,
    /// Time of the trial's dispatch; `None` if the trial failed.
    pub elapsed: Option<Duration>,
}

impl fmt::Display for SweepProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TEST: T={} {} {} Iter={}/{}",
            self.thread_count, self.variant, self.algorithm, self.iteration, self.iterations
        )
    }
}

/// Receives progress updates. Must not block.
pub trait ProgressSink {
    fn report(&self, progress: SweepProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(SweepProgress),
{
    fn report(&self, progress: SweepProgress) {
        self(progress)
    }
}

impl ProgressSink for mpsc::UnboundedSender<SweepProgress> {
    fn report(&self, progress: SweepProgress) {
        // A departed observer does not stop the sweep.
        let _ = self.send(progress);
    }
}

/// Shared flag for abandoning a sweep between combinations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepSummary {
    /// Records written to the log, in sweep order.
    pub records: Vec<BenchmarkResult>,
    /// Combinations that produced no record because every trial failed.
    pub skipped_combinations: usize,
    pub failed_trials: usize,
    pub cancelled: bool,
}

/// Runs sweeps through one dispatcher.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkHarness {
    dispatcher: ParallelDispatcher,
}

impl BenchmarkHarness {
    pub fn new(dispatcher: ParallelDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Runs every combination of `plan` against copies of `image`, appending one
    /// record per combination to `log`.
    pub fn run_sweep(
        &self,
        image: &PixelBuffer,
        plan: &SweepPlan,
        log: &mut ResultLog,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<SweepSummary, BenchmarkError> {
        plan.validate()?;

        let resolution = image.resolution();
        let combinations = plan.combinations();
        let mut summary = SweepSummary::default();
        let mut combination = 0;

        info!(
            "starting sweep over {resolution}: {combinations} combinations x {} iterations",
            plan.iterations
        );

        for &thread_count in &plan.thread_counts {
            for &variant in &plan.variants {
                for &algorithm in &plan.algorithms {
                    if cancel.is_cancelled() {
                        info!("sweep cancelled after {combination} of {combinations} combinations");
                        summary.cancelled = true;
                        return Ok(summary);
                    }
                    combination += 1;

                    let request = DispatchRequest {
                        thread_count,
                        block_size: plan.block_size,
                        variant,
                        algorithm,
                        seed: plan.seed,
                    };

                    let mut total = Duration::ZERO;
                    let mut succeeded = 0u32;
                    for iteration in 1..=plan.iterations {
                        let elapsed = self.run_trial(image, &request);
                        match elapsed {
                            Some(elapsed) => {
                                total += elapsed;
                                succeeded += 1;
                            }
                            None => summary.failed_trials += 1,
                        }
                        progress.report(SweepProgress {
                            thread_count,
                            variant,
                            algorithm,
                            iteration,
                            iterations: plan.iterations,
                            combination,
                            combinations,
                            elapsed,
                        });
                    }

                    if succeeded == 0 {
                        warn!("T={thread_count} {variant} {algorithm}: every trial failed, no record written");
                        summary.skipped_combinations += 1;
                        continue;
                    }

                    let result = BenchmarkResult {
                        thread_count,
                        variant,
                        algorithm,
                        resolution: resolution.clone(),
                        avg_time_ms: total.as_secs_f64() * 1000.0 / succeeded as f64,
                    };
                    log.append(&result)?;
                    summary.records.push(result);
                }
            }
        }

        info!(
            "sweep finished: {} records, {} skipped combinations, {} failed trials",
            summary.records.len(),
            summary.skipped_combinations,
            summary.failed_trials
        );
        Ok(summary)
    }

    /// One timed dispatch on a fresh copy. `None` if the dispatch failed.
    fn run_trial(&self, image: &PixelBuffer, request: &DispatchRequest) -> Option<Duration> {
        let trial = image.clone();

        let started = Instant::now();
        let outcome = self.dispatcher.dispatch(&trial, request);
        let elapsed = started.elapsed();

        match outcome {
            Ok(_) => Some(elapsed),
            Err(err) => {
                warn!(
                    "trial T={} {} {} failed: {err}",
                    request.thread_count, request.variant, request.algorithm
                );
                None
            }
        }
    }
}

/// Runs a sweep on tokio's blocking pool and streams its progress back.
///
/// Must be called from within a tokio runtime. Dropping the receiver does not stop
/// the sweep; use `cancel` for that.
pub fn spawn_sweep(
    harness: BenchmarkHarness,
    image: Arc<PixelBuffer>,
    plan: SweepPlan,
    mut log: ResultLog,
    cancel: CancelToken,
) -> (
    JoinHandle<Result<SweepSummary, BenchmarkError>>,
    mpsc::UnboundedReceiver<SweepProgress>,
) {
    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let handle = tokio::task::spawn_blocking(move || {
        harness.run_sweep(&image, &plan, &mut log, &progress_tx, &cancel)
    });
    (handle, progress_rx)
}

/// Awaits a sweep started by `spawn_sweep`. A panicked or aborted task becomes
/// `BenchmarkError::Task`.
pub async fn finish_sweep(
    handle: JoinHandle<Result<SweepSummary, BenchmarkError>>,
) -> Result<SweepSummary, BenchmarkError> {
    handle
        .await
        .map_err(|err| BenchmarkError::Task(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScratchDir;
    use crate::core_modules::kernel::{KernelParams, KernelRegistry, PixelationKernel};
    use crate::core_modules::pixel::pixel::Pixel;
    use crate::core_modules::pixel_buffer::RowBand;
    use crate::error::KernelError;
    use crate::result_log::HEADER;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn image() -> PixelBuffer {
        let data = (0..32u32 * 24 * 4).map(|i| (i * 13 % 256) as u8).collect();
        PixelBuffer::from_rgba(32, 24, data).unwrap()
    }

    fn plan(thread_counts: Vec<usize>, iterations: usize) -> SweepPlan {
        SweepPlan {
            block_size: 4,
            thread_counts,
            variants: vec![KernelVariant::Native],
            algorithms: vec![PixelationAlgorithm::Average],
            iterations,
            seed: Some(3),
        }
    }

    /// Fails every other call.
    struct FlakyKernel {
        calls: AtomicUsize,
    }

    impl PixelationKernel for FlakyKernel {
        fn variant(&self) -> KernelVariant {
            KernelVariant::Native
        }

        fn apply(&self, _band: &mut RowBand<'_>, _params: &KernelParams) -> Result<(), KernelError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Err(KernelError::ZeroBlockSize)
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn two_thread_counts_write_two_records() {
        let dir = ScratchDir::new();
        let path = dir.path().join("test.txt");
        let mut log = ResultLog::open(&path).unwrap();
        let updates = Mutex::new(Vec::new());
        let sink = |p: SweepProgress| updates.lock().unwrap().push(p);

        let summary = BenchmarkHarness::default()
            .run_sweep(&image(), &plan(vec![1, 2], 2), &mut log, &sink, &CancelToken::new())
            .unwrap();

        assert_eq!(summary.records.len(), 2);
        assert!(summary.records.iter().all(|r| r.avg_time_ms >= 0.0 && r.resolution == "32x24"));
        assert_eq!(
            summary.records.iter().map(|r| r.thread_count).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].starts_with("1;Native;Average;32x24;"));
        assert!(lines[2].starts_with("2;Native;Average;32x24;"));

        let updates = updates.into_inner().unwrap();
        assert_eq!(updates.len(), 4);
        assert_eq!(updates[3].to_string(), "TEST: T=2 Native Average Iter=2/2");
        assert_eq!((updates[3].combination, updates[3].combinations), (2, 2));
    }

    #[test]
    fn sweep_order_is_threads_then_variant_then_algorithm() {
        let dir = ScratchDir::new();
        let mut log = ResultLog::open(dir.path().join("order.txt")).unwrap();
        let plan = SweepPlan {
            variants: KernelVariant::ALL.to_vec(),
            algorithms: vec![PixelationAlgorithm::Median, PixelationAlgorithm::Random],
            ..plan(vec![2, 1], 1)
        };

        let summary = BenchmarkHarness::default()
            .run_sweep(&image(), &plan, &mut log, &|_: SweepProgress| {}, &CancelToken::new())
            .unwrap();

        let order: Vec<_> = summary
            .records
            .iter()
            .map(|r| (r.thread_count, r.variant, r.algorithm))
            .collect();
        assert_eq!(
            order,
            vec![
                (2, KernelVariant::Native, PixelationAlgorithm::Median),
                (2, KernelVariant::Native, PixelationAlgorithm::Random),
                (2, KernelVariant::Tuned, PixelationAlgorithm::Median),
                (2, KernelVariant::Tuned, PixelationAlgorithm::Random),
                (1, KernelVariant::Native, PixelationAlgorithm::Median),
                (1, KernelVariant::Native, PixelationAlgorithm::Random),
                (1, KernelVariant::Tuned, PixelationAlgorithm::Median),
                (1, KernelVariant::Tuned, PixelationAlgorithm::Random),
            ]
        );
    }

    #[test]
    fn trials_never_see_a_previous_trials_output() {
        let original = image();
        let before = original.to_rgba_vec();
        let dir = ScratchDir::new();
        let mut log = ResultLog::open(dir.path().join("t.txt")).unwrap();

        BenchmarkHarness::default()
            .run_sweep(&original, &plan(vec![1], 3), &mut log, &|_: SweepProgress| {}, &CancelToken::new())
            .unwrap();

        assert_eq!(original.to_rgba_vec(), before);
    }

    #[test]
    fn copying_the_original_elsewhere_does_not_fail_trials() {
        let original = Arc::new(image());
        let dir = ScratchDir::new();
        let mut log = ResultLog::open(dir.path().join("shared.txt")).unwrap();
        let done = AtomicBool::new(false);

        let summary = std::thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let mut copies = 0usize;
                loop {
                    let _ = PixelBuffer::clone(&original);
                    let _ = original.to_rgba_vec();
                    copies += 1;
                    if done.load(Ordering::SeqCst) {
                        break copies;
                    }
                }
            });
            let summary = BenchmarkHarness::default().run_sweep(
                &original,
                &plan(vec![1, 2, 4], 3),
                &mut log,
                &|_: SweepProgress| {},
                &CancelToken::new(),
            );
            done.store(true, Ordering::SeqCst);
            assert!(reader.join().unwrap() > 0);
            summary
        })
        .unwrap();

        assert_eq!(summary.records.len(), 3);
        assert_eq!(summary.failed_trials, 0);
        assert_eq!(summary.skipped_combinations, 0);
    }

    #[tokio::test]
    async fn panicked_sweep_task_is_reported_as_task_error() {
        let handle = tokio::task::spawn_blocking(|| -> Result<SweepSummary, BenchmarkError> {
            panic!("sweep worker died")
        });
        let err = finish_sweep(handle).await.unwrap_err();
        assert!(matches!(err, BenchmarkError::Task(ref m) if m.contains("panicked")), "{err}");
    }

    #[test]
    fn failed_trials_are_excluded_and_all_failed_combinations_skipped() {
        let mut registry = KernelRegistry::new();
        registry.register(Arc::new(FlakyKernel {
            calls: AtomicUsize::new(0),
        }));
        let harness = BenchmarkHarness::new(ParallelDispatcher::new(Arc::new(registry)));
        let dir = ScratchDir::new();
        let mut log = ResultLog::open(dir.path().join("flaky.txt")).unwrap();

        // Single worker: calls alternate fail, ok, fail, ok.
        let summary = harness
            .run_sweep(&image(), &plan(vec![1], 4), &mut log, &|_: SweepProgress| {}, &CancelToken::new())
            .unwrap();
        assert_eq!(summary.records.len(), 1);
        assert_eq!(summary.failed_trials, 2);
        assert_eq!(summary.skipped_combinations, 0);

        // Tuned is not registered: every trial fails, the sweep still completes.
        let mut missing = plan(vec![1, 2], 2);
        missing.variants = vec![KernelVariant::Tuned];
        let summary = harness
            .run_sweep(&image(), &missing, &mut log, &|_: SweepProgress| {}, &CancelToken::new())
            .unwrap();
        assert!(summary.records.is_empty());
        assert_eq!(summary.skipped_combinations, 2);
        assert_eq!(summary.failed_trials, 4);
    }

    #[test]
    fn cancellation_stops_at_the_next_combination() {
        let dir = ScratchDir::new();
        let mut log = ResultLog::open(dir.path().join("cancel.txt")).unwrap();
        let cancel = CancelToken::new();
        let sink = |p: SweepProgress| {
            if p.combination == 1 && p.iteration == p.iterations {
                cancel.cancel();
            }
        };

        let summary = BenchmarkHarness::default()
            .run_sweep(&image(), &plan(vec![1, 2, 4], 2), &mut log, &sink, &cancel)
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.records.len(), 1);
    }

    #[test]
    fn invalid_plans_are_rejected() {
        let dir = ScratchDir::new();
        let mut log = ResultLog::open(dir.path().join("x.txt")).unwrap();
        for bad in [plan(vec![], 1), plan(vec![0], 1), plan(vec![1], 0)] {
            let err = BenchmarkHarness::default()
                .run_sweep(&image(), &bad, &mut log, &|_: SweepProgress| {}, &CancelToken::new())
                .unwrap_err();
            assert!(matches!(err, BenchmarkError::InvalidPlan(_)));
        }
    }

    #[test]
    fn default_plan_matches_the_full_sweep() {
        let plan = SweepPlan::default_for(8);
        assert_eq!(plan.thread_counts, vec![1, 2, 4, 8, 12, 16, 32, 64]);
        assert_eq!(plan.iterations, 5);
        assert_eq!(plan.combinations(), 8 * 2 * 3);
        assert!(plan.validate().is_ok());
    }

    #[tokio::test]
    async fn spawned_sweep_streams_progress() {
        let dir = ScratchDir::new();
        let log = ResultLog::open(dir.path().join("async.txt")).unwrap();
        let image = Arc::new(PixelBuffer::filled(16, 16, Pixel::new(1, 2, 3, 4)).unwrap());

        let (handle, mut progress) = spawn_sweep(
            BenchmarkHarness::default(),
            image,
            plan(vec![1, 2], 3),
            log,
            CancelToken::new(),
        );

        let mut seen = 0;
        while let Some(update) = progress.recv().await {
            assert!(update.elapsed.is_some());
            seen += 1;
        }
        let summary = finish_sweep(handle).await.unwrap();

        assert_eq!(seen, 6);
        assert_eq!(summary.records.len(), 2);
    }
}
