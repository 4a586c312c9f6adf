//! The throughput backend.
//!
//! Works one block-row strip at a time. `Average` accumulates every block of the
//! strip in a single row-major pass; `Median` copies each block's channels into
//! reusable scratch vectors and uses `select_nth_unstable` instead of a full sort.
//! Results are written by building one pattern row per strip and copying it into
//! each row of the strip.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{KernelParams, KernelVariant, PixelationAlgorithm, PixelationKernel, midpoint, rounded_mean, validate_band};
use crate::core_modules::pixel::pixel::{CHANNELS, Pixel};
use crate::core_modules::pixel_buffer::{BYTES_PER_PIXEL, RowBand};
use crate::error::KernelError;

/// Strip-wise backend.
///
/// `Random` draws from one `SmallRng` per band, seeded from the dispatch seed and the
/// band's first row, so its output depends on the partitioning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TunedKernel;

impl PixelationKernel for TunedKernel {
    fn variant(&self) -> KernelVariant {
        KernelVariant::Tuned
    }

    fn apply(&self, band: &mut RowBand<'_>, params: &KernelParams) -> Result<(), KernelError> {
        validate_band(band, params)?;

        let block_size = params.block_size;
        let width = band.width();
        let rows = band.rows();
        let blocks_across = width.div_ceil(block_size);

        let mut strip = StripScratch::new(blocks_across, block_size);
        let mut pattern = vec![0u8; band.row_bytes()];
        let mut rng = SmallRng::seed_from_u64(params.seed ^ band.start_row() as u64);

        for y in (0..rows).step_by(block_size) {
            let strip_height = block_size.min(rows - y);

            match params.algorithm {
                PixelationAlgorithm::Average => strip.average(band, y, strip_height, block_size),
                PixelationAlgorithm::Median => strip.median(band, y, strip_height, block_size),
                PixelationAlgorithm::Random => {
                    strip.sample(band, y, strip_height, block_size, &mut rng)
                }
            }

            for (block_x, value) in strip.values.iter().enumerate() {
                let start = block_x * block_size * BYTES_PER_PIXEL;
                let end = ((block_x + 1) * block_size).min(width) * BYTES_PER_PIXEL;
                let bytes = value.to_bytes();
                for pixel in pattern[start..end].chunks_exact_mut(BYTES_PER_PIXEL) {
                    pixel.copy_from_slice(&bytes);
                }
            }
            for row in y..y + strip_height {
                band.row_mut(row).copy_from_slice(&pattern);
            }
        }

        Ok(())
    }
}

/// Per-strip working memory, reused for every strip of a band.
struct StripScratch {
    sums: Vec<[u64; CHANNELS]>,
    channels: [Vec<u8>; CHANNELS],
    values: Vec<Pixel>,
}

impl StripScratch {
    fn new(blocks_across: usize, block_size: usize) -> Self {
        let block_area = block_size * block_size;
        Self {
            sums: vec![[0; CHANNELS]; blocks_across],
            channels: std::array::from_fn(|_| Vec::with_capacity(block_area)),
            values: vec![Pixel::default(); blocks_across],
        }
    }

    fn average(&mut self, band: &RowBand<'_>, y: usize, strip_height: usize, block_size: usize) {
        self.sums.iter_mut().for_each(|sum| *sum = [0; CHANNELS]);

        for row in y..y + strip_height {
            for (x, pixel) in band.row(row).chunks_exact(BYTES_PER_PIXEL).enumerate() {
                let sum = &mut self.sums[x / block_size];
                sum[0] += pixel[0] as u64;
                sum[1] += pixel[1] as u64;
                sum[2] += pixel[2] as u64;
                sum[3] += pixel[3] as u64;
            }
        }

        let width = band.width();
        for (block_x, (sum, value)) in self.sums.iter().zip(self.values.iter_mut()).enumerate() {
            let block_width = block_size.min(width - block_x * block_size);
            let count = (block_width * strip_height) as u64;
            *value = Pixel::new(
                rounded_mean(sum[0], count),
                rounded_mean(sum[1], count),
                rounded_mean(sum[2], count),
                rounded_mean(sum[3], count),
            );
        }
    }

    fn median(&mut self, band: &RowBand<'_>, y: usize, strip_height: usize, block_size: usize) {
        let width = band.width();

        for (block_x, value) in self.values.iter_mut().enumerate() {
            let x_start = block_x * block_size * BYTES_PER_PIXEL;
            let x_end = ((block_x + 1) * block_size).min(width) * BYTES_PER_PIXEL;

            self.channels.iter_mut().for_each(Vec::clear);
            for row in y..y + strip_height {
                for pixel in band.row(row)[x_start..x_end].chunks_exact(BYTES_PER_PIXEL) {
                    for (channel, scratch) in self.channels.iter_mut().enumerate() {
                        scratch.push(pixel[channel]);
                    }
                }
            }

            let mut median = [0u8; CHANNELS];
            for (channel, scratch) in self.channels.iter_mut().enumerate() {
                median[channel] = select_median(scratch);
            }
            *value = Pixel::from(median);
        }
    }

    fn sample(
        &mut self,
        band: &RowBand<'_>,
        y: usize,
        strip_height: usize,
        block_size: usize,
        rng: &mut SmallRng,
    ) {
        let width = band.width();
        for (block_x, value) in self.values.iter_mut().enumerate() {
            let x = block_x * block_size;
            let block_width = block_size.min(width - x);
            let chosen_x = rng.gen_range(0..block_width);
            let chosen_y = rng.gen_range(0..strip_height);
            *value = band.pixel(x + chosen_x, y + chosen_y);
        }
    }
}

/// Median of `values` by selection; reorders `values`.
fn select_median(values: &mut [u8]) -> u8 {
    let len = values.len();
    if len == 0 {
        return 0;
    }
    let middle = len / 2;
    let (lower_half, upper, _) = values.select_nth_unstable(middle);
    let upper = *upper;
    if len % 2 == 1 {
        upper
    } else {
        let lower = lower_half.iter().copied().max().unwrap_or(upper);
        midpoint(lower, upper)
    }
}
