// THEORY:
// A kernel is the code that actually pixelates. The dispatcher hands each worker a
// `RowBand` and a kernel; the kernel walks the band block by block, reduces each
// block to one representative `Pixel`, and broadcasts that value over the block.
//
// Two axes select a kernel's behaviour:
// 1.  **Algorithm** (`PixelationAlgorithm`): what the representative value is.
//     - `Average`: per-channel arithmetic mean, rounded half-up.
//     - `Median`:  per-channel median; for an even count the two middle values are
//       averaged, rounded half-up.
//     - `Random`:  one pixel of the block, picked with a seeded RNG.
// 2.  **Variant** (`KernelVariant`): which independently written backend runs it.
//     `Native` gathers each block into a `Block` and reduces it; `Tuned` makes a single
//     pass per block-row strip and never materialises pixels. They agree bit for bit
//     on `Average` and `Median`. For `Random` they only agree in distribution.
//
// Backends are plugged in through the `PixelationKernel` trait and looked up in a
// `KernelRegistry` that is injected into the dispatcher, so the dispatcher never
// knows which concrete type it is running.

pub mod native;
pub mod tuned;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::core_modules::pixel_buffer::RowBand;
use crate::error::KernelError;

pub use native::NativeKernel;
pub use tuned::TunedKernel;

/// How a block's representative value is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PixelationAlgorithm {
    Average,
    Median,
    Random,
}

impl PixelationAlgorithm {
    pub const ALL: [PixelationAlgorithm; 3] = [
        PixelationAlgorithm::Average,
        PixelationAlgorithm::Median,
        PixelationAlgorithm::Random,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PixelationAlgorithm::Average => "Average",
            PixelationAlgorithm::Median => "Median",
            PixelationAlgorithm::Random => "Random",
        }
    }
}

impl fmt::Display for PixelationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelationAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PixelationAlgorithm::ALL
            .into_iter()
            .find(|algorithm| algorithm.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown algorithm '{s}' (expected average, median or random)"))
    }
}

/// Which backend executes the algorithm. Purely a performance axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelVariant {
    /// Straightforward per-block gather, reduce, scatter.
    Native,
    /// Strip-wise single pass with selection-based medians.
    Tuned,
}

impl KernelVariant {
    pub const ALL: [KernelVariant; 2] = [KernelVariant::Native, KernelVariant::Tuned];

    pub fn name(&self) -> &'static str {
        match self {
            KernelVariant::Native => "Native",
            KernelVariant::Tuned => "Tuned",
        }
    }
}

impl fmt::Display for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KernelVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KernelVariant::ALL
            .into_iter()
            .find(|variant| variant.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown kernel variant '{s}' (expected native or tuned)"))
    }
}

/// Per-dispatch parameters shared by every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelParams {
    pub block_size: usize,
    pub algorithm: PixelationAlgorithm,
    /// Seed for `Random`; ignored by the other algorithms.
    pub seed: u64,
}

/// A pixelation backend.
///
/// `apply` must only touch the rows of `band` and must leave every block of the band
/// uniform. Implementations are shared across worker threads.
pub trait PixelationKernel: Send + Sync {
    fn variant(&self) -> KernelVariant;

    fn apply(&self, band: &mut RowBand<'_>, params: &KernelParams) -> Result<(), KernelError>;
}

/// The set of backends a dispatcher may select from.
#[derive(Clone, Default)]
pub struct KernelRegistry {
    kernels: HashMap<KernelVariant, Arc<dyn PixelationKernel>>,
}

impl KernelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the `Native` and `Tuned` backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NativeKernel));
        registry.register(Arc::new(TunedKernel));
        registry
    }

    /// Registers `kernel` under its own variant, returning the one it replaced.
    pub fn register(
        &mut self,
        kernel: Arc<dyn PixelationKernel>,
    ) -> Option<Arc<dyn PixelationKernel>> {
        self.kernels.insert(kernel.variant(), kernel)
    }

    pub fn get(&self, variant: KernelVariant) -> Option<Arc<dyn PixelationKernel>> {
        self.kernels.get(&variant).cloned()
    }

    /// Registered variants in declaration order.
    pub fn variants(&self) -> Vec<KernelVariant> {
        let mut variants: Vec<_> = self.kernels.keys().copied().collect();
        variants.sort();
        variants
    }
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("variants", &self.variants())
            .finish()
    }
}

/// Checks the band against the kernel contract before any byte is touched.
pub(crate) fn validate_band(band: &RowBand<'_>, params: &KernelParams) -> Result<(), KernelError> {
    let block_size = params.block_size;
    if block_size == 0 {
        return Err(KernelError::ZeroBlockSize);
    }
    let ends_on_block = band.end_row() % block_size == 0 || band.end_row() == band.image_height();
    if band.start_row() % block_size != 0 || !ends_on_block {
        return Err(KernelError::MisalignedBand {
            start_row: band.start_row(),
            block_size,
        });
    }
    if band.data_len() < band.required_len() {
        return Err(KernelError::BandTooShort {
            start_row: band.start_row(),
            end_row: band.end_row(),
            required: band.required_len(),
            actual: band.data_len(),
        });
    }
    Ok(())
}

/// Arithmetic mean of `count` channel values summing to `sum`, rounded half-up.
#[inline]
pub(crate) fn rounded_mean(sum: u64, count: u64) -> u8 {
    debug_assert!(count > 0);
    ((sum + count / 2) / count) as u8
}

/// Mean of two channel values, rounded half-up.
#[inline]
pub(crate) fn midpoint(lower: u8, upper: u8) -> u8 {
    ((lower as u16 + upper as u16 + 1) / 2) as u8
}

/// Seed for block (`block_x`, `block_y`) of an image pixelated with `seed`.
#[inline]
pub(crate) fn block_seed(seed: u64, block_x: usize, block_y: usize) -> u64 {
    seed ^ ((block_y as u64) << 32) ^ block_x as u64
}
